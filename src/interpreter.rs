//! Interpreter façade: a named-column environment plus the full
//! parse → infer → optimize → analyze → dispatch → execute pipeline.

use std::collections::HashMap;

use serde::Serialize;
use tracing::debug;

use crate::column::{AnyColumn, Bf16, Column};
use crate::error::Result;
use crate::exec::{self, Env, ExecState};
use crate::expr::ast::Expr;
use crate::expr::fusion::{self, ExprPattern, Tier};
use crate::expr::{infer, optimizer, parser};
use crate::types::DataType;

/// Dispatch plan for an expression, serializable for host tooling
#[derive(Debug, Clone, Serialize)]
pub struct EvalPlan {
    /// The optimized expression in grammar form
    pub expression: String,
    pub result_type: DataType,
    pub pattern: ExprPattern,
    pub tier: Tier,
    pub node_count: usize,
    pub input_columns: usize,
    pub register_pressure: usize,
    pub speedup_estimate: f64,
    pub fused: bool,
}

/// Named-column environment with owned columns. Rebinding a name destroys
/// the prior column; evaluation returns a fresh caller-owned column.
#[derive(Default)]
pub struct Interpreter {
    columns: Env,
    state: ExecState,
}

impl Interpreter {
    pub fn new() -> Interpreter {
        Interpreter::default()
    }

    /// Bind `name` to a column, taking ownership; a previous binding is
    /// dropped
    pub fn register(&mut self, name: impl Into<String>, column: AnyColumn) {
        let name = name.into();
        debug!(name = %name, len = column.len(), ty = %column.data_type(), "register column");
        self.columns.insert(name, column);
    }

    pub fn register_i32(&mut self, name: impl Into<String>, column: Column<i32>) {
        self.register(name, AnyColumn::I32(column));
    }

    pub fn register_f32(&mut self, name: impl Into<String>, column: Column<f32>) {
        self.register(name, AnyColumn::F32(column));
    }

    pub fn register_bf16(&mut self, name: impl Into<String>, column: Column<Bf16>) {
        self.register(name, AnyColumn::Bf16(column));
    }

    /// Drop a binding; unknown names are a no-op
    pub fn unregister(&mut self, name: &str) {
        self.columns.remove(name);
    }

    pub fn has(&self, name: &str) -> bool {
        self.columns.contains_key(name)
    }

    /// Number of registered columns
    pub fn size(&self) -> usize {
        self.columns.len()
    }

    pub fn get(&self, name: &str) -> Option<&AnyColumn> {
        self.columns.get(name)
    }

    fn column_types(&self) -> HashMap<String, DataType> {
        self.columns
            .iter()
            .map(|(name, col)| (name.clone(), col.data_type()))
            .collect()
    }

    /// Parse, infer, and optimize an expression against the current
    /// environment; also reports the columns the source referenced before
    /// optimization, which may fold references away entirely
    fn front_end(&self, expression: &str) -> Result<(Expr, Vec<String>)> {
        let types = self.column_types();
        let mut expr = parser::parse(expression, &types)?;
        infer::infer(&mut expr)?;
        let referenced: Vec<String> = expr
            .referenced_columns()
            .into_iter()
            .map(str::to_string)
            .collect();
        optimizer::optimize(&mut expr);
        // Rewrites preserve types but re-inference keeps every node
        // annotated for dispatch
        infer::infer(&mut expr)?;
        Ok((expr, referenced))
    }

    /// Evaluate an expression and return a freshly allocated column owned
    /// by the caller
    pub fn eval(&mut self, expression: &str) -> Result<AnyColumn> {
        let (expr, referenced) = self.front_end(expression)?;
        // Identities like `x ^ x` fold the tree to a constant; the output
        // length still comes from the columns the source named
        if expr.memory_loads() == 0 && !referenced.is_empty() {
            if let Some(len) = referenced
                .iter()
                .filter_map(|name| self.columns.get(name).map(AnyColumn::len))
                .min()
            {
                return exec::unfused::evaluate_broadcast(&expr, &self.columns, len);
            }
        }
        exec::execute(&expr, &self.columns, &mut self.state)
    }

    /// Evaluate pinned to a specific tier; used by benchmarks and tests
    /// comparing tier behavior
    pub fn eval_at_tier(&mut self, expression: &str, tier: Tier) -> Result<AnyColumn> {
        let (expr, _) = self.front_end(expression)?;
        exec::execute_at(&expr, &self.columns, &mut self.state, tier, true)
    }

    /// Report the dispatch decision for an expression without executing
    /// it
    pub fn explain(&self, expression: &str) -> Result<EvalPlan> {
        let (expr, _) = self.front_end(expression)?;
        let opp = fusion::analyze(&expr);
        let result_type = expr
            .result_type()
            .ok_or_else(|| crate::error::EngineError::Internal("untyped root".to_string()))?;
        Ok(EvalPlan {
            expression: expr.to_string(),
            result_type,
            pattern: opp.pattern,
            tier: opp.tier,
            node_count: opp.node_count,
            input_columns: opp.input_columns,
            register_pressure: opp.register_pressure,
            speedup_estimate: opp.speedup_estimate,
            fused: opp.fuse,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::EngineError;

    #[test]
    fn test_register_and_rebind() {
        let mut interp = Interpreter::new();
        interp.register_i32("a", Column::from_slice(&[1, 2, 3]).unwrap());
        assert!(interp.has("a"));
        assert_eq!(interp.size(), 1);
        interp.register_i32("a", Column::from_slice(&[9]).unwrap());
        assert_eq!(interp.get("a").unwrap().len(), 1);
        interp.unregister("a");
        assert!(!interp.has("a"));
        assert_eq!(interp.size(), 0);
    }

    #[test]
    fn test_eval_simple_add() {
        let mut interp = Interpreter::new();
        interp.register_i32("a", Column::from_slice(&[1, 2, 3]).unwrap());
        interp.register_i32("b", Column::from_slice(&[10, 20, 30]).unwrap());
        let out = interp.eval("a + b").unwrap();
        assert_eq!(
            (0..3).map(|i| out.get_as_f64(i).unwrap()).collect::<Vec<_>>(),
            vec![11.0, 22.0, 33.0]
        );
    }

    #[test]
    fn test_eval_unknown_column_is_parse_error() {
        let mut interp = Interpreter::new();
        let err = interp.eval("missing + 1").unwrap_err();
        assert!(matches!(err, EngineError::ParseError { .. }));
    }

    #[test]
    fn test_structural_error_leaves_environment_intact() {
        let mut interp = Interpreter::new();
        interp.register_i32("a", Column::from_slice(&[1, 2]).unwrap());
        let before = interp.size();
        assert!(interp.eval("a * (b + )").is_err());
        assert_eq!(interp.size(), before);
        assert!(interp.eval("a + 1").is_ok());
    }

    #[test]
    fn test_explain_reports_plan() {
        let mut interp = Interpreter::new();
        interp.register_f32("x", Column::from_slice(&[1.0]).unwrap());
        interp.register_f32("y", Column::from_slice(&[2.0]).unwrap());
        interp.register_f32("z", Column::from_slice(&[3.0]).unwrap());
        let plan = interp.explain("x * y + z").unwrap();
        assert_eq!(plan.pattern, ExprPattern::Fma);
        assert_eq!(plan.tier, Tier::Tier0);
        assert_eq!(plan.input_columns, 3);

        let json = serde_json::to_value(&plan).unwrap();
        assert_eq!(json["pattern"], "Fma");
        assert_eq!(json["tier"], "Tier0");
        let _ = interp.eval("x * y + z").unwrap();
    }

    #[test]
    fn test_explain_does_not_execute() {
        let interp = Interpreter::new();
        // No columns registered; a constant expression still plans
        let plan = interp.explain("1 + 2").unwrap();
        assert_eq!(plan.expression, "3");
    }
}
