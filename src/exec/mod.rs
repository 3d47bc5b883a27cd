//! Tiered dispatch: route an analyzed expression to the pre-compiled
//! catalog, the register-stack evaluator, the JIT, or the materializing
//! fallback.

pub mod catalog;
pub mod stack_machine;
pub mod unfused;

#[cfg(all(unix, target_arch = "x86_64"))]
pub mod jit;

use std::collections::HashMap;

use tracing::debug;

use crate::column::AnyColumn;
use crate::error::{EngineError, Result};
use crate::expr::ast::Expr;
use crate::expr::fusion::{self, Tier};

/// Named-column environment the tiers execute against
pub type Env = HashMap<String, AnyColumn>;

/// Per-interpreter execution state (the JIT kernel cache)
#[derive(Default)]
pub struct ExecState {
    #[cfg(all(unix, target_arch = "x86_64"))]
    pub jit_cache: jit::KernelCache,
}

impl ExecState {
    pub fn new() -> ExecState {
        ExecState::default()
    }
}

fn fallback_reason(err: &EngineError) -> Option<&str> {
    match err {
        EngineError::NotSupported(msg) => Some(msg),
        EngineError::CodegenError(msg) => Some(msg),
        _ => None,
    }
}

/// Execute an analyzed expression, falling back tier by tier when a
/// kernel cannot cover the shape
pub fn execute(expr: &Expr, env: &Env, state: &mut ExecState) -> Result<AnyColumn> {
    let opp = fusion::analyze(expr);
    debug!(
        pattern = ?opp.pattern,
        tier = ?opp.tier,
        fuse = opp.fuse,
        nodes = opp.node_count,
        pressure = opp.register_pressure,
        "dispatching expression"
    );

    execute_at(expr, env, state, opp.tier, opp.fuse)
}

/// Execute starting from an explicit tier; used by the dispatcher and by
/// benchmarks that pin a tier for comparison
pub fn execute_at(
    expr: &Expr,
    env: &Env,
    state: &mut ExecState,
    tier: Tier,
    fuse: bool,
) -> Result<AnyColumn> {
    let _ = &state;
    match tier {
        Tier::Tier0 => {
            let opp = fusion::analyze(expr);
            if let Some(result) = catalog::try_execute(expr, opp.pattern, env)? {
                return Ok(result);
            }
            debug!("tier 0 catalog miss, falling back");
            unfused::evaluate(expr, env)
        }
        Tier::Tier1 => {
            if fuse {
                match stack_machine::execute(expr, env) {
                    Ok(result) => return Ok(result),
                    Err(err) => match fallback_reason(&err) {
                        Some(reason) => debug!(reason, "tier 1 fallback"),
                        None => return Err(err),
                    },
                }
            }
            unfused::evaluate(expr, env)
        }
        Tier::Tier2 => {
            if fuse {
                #[cfg(all(unix, target_arch = "x86_64"))]
                {
                    match jit::execute(expr, env, &mut state.jit_cache) {
                        Ok(result) => return Ok(result),
                        Err(err) => match fallback_reason(&err) {
                            Some(reason) => debug!(reason, "tier 2 fallback"),
                            None => return Err(err),
                        },
                    }
                }
                match stack_machine::execute(expr, env) {
                    Ok(result) => return Ok(result),
                    Err(err) => match fallback_reason(&err) {
                        Some(reason) => debug!(reason, "tier 1 fallback"),
                        None => return Err(err),
                    },
                }
            }
            unfused::evaluate(expr, env)
        }
    }
}
