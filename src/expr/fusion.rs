//! Fusion analysis: pattern classification, register pressure, and the
//! memory-traffic cost model that decides whether a subtree is worth
//! evaluating without materializing intermediates, plus the tier the
//! dispatcher should use.

use serde::Serialize;

use crate::expr::ast::Expr;
use crate::types::BinOp;

/// Shape classification for tier selection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum ExprPattern {
    /// Bare column reference
    SingleColumn,
    /// Binary over two column references
    BinaryOp,
    /// Binary where one side is a column and the other a binary of two
    /// columns
    NestedBinary,
    /// `a * b + c` over three column references
    Fma,
    /// At most eight nodes, no ternary
    ComplexFusible,
    ComplexUnfusible,
}

/// Execution tier the dispatcher should try first
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum Tier {
    /// Pre-compiled kernel catalog
    Tier0,
    /// Register-stack evaluator over a bounded tree
    Tier1,
    /// Runtime code generation
    Tier2,
}

/// Result of analyzing one expression tree
#[derive(Debug, Clone, Serialize)]
pub struct FusionOpportunity {
    pub pattern: ExprPattern,
    pub tier: Tier,
    pub node_count: usize,
    pub input_columns: usize,
    pub register_pressure: usize,
    pub speedup_estimate: f64,
    /// Whether fusing beats materializing intermediates under the cost
    /// model
    pub fuse: bool,
}

/// Reference column assumed by the memory model: 1M lanes of 4 bytes
const COLUMN_BYTES: f64 = 4_000_000.0;
/// Nominal main-memory bandwidth in bytes per millisecond (50 GB/s)
const BANDWIDTH_BYTES_PER_MS: f64 = 50.0e9 / 1000.0;
/// Nominal cost per operator application over the reference column
const COMPUTE_MS_PER_NODE: f64 = 0.5;

/// Registers a fused kernel may claim; the remainder of the 16-register
/// SIMD file is reserved for temporaries
const REGISTER_PRESSURE_LIMIT: usize = 12;
const MIN_SPEEDUP: f64 = 1.2;

fn is_column_ref(e: &Expr) -> bool {
    matches!(e, Expr::ColumnRef { .. })
}

fn is_binary_of_refs(e: &Expr) -> bool {
    match e {
        Expr::Binary { left, right, .. } => is_column_ref(left) && is_column_ref(right),
        _ => false,
    }
}

fn classify(root: &Expr) -> ExprPattern {
    if is_column_ref(root) {
        return ExprPattern::SingleColumn;
    }

    // a * b + c over plain column references
    if let Expr::Binary {
        op: BinOp::Add,
        left,
        right,
        ..
    } = root
    {
        if let Expr::Binary {
            op: BinOp::Mul,
            left: mul_left,
            right: mul_right,
            ..
        } = &**left
        {
            if is_column_ref(mul_left) && is_column_ref(mul_right) && is_column_ref(right) {
                return ExprPattern::Fma;
            }
        }
    }

    if let Expr::Binary { left, right, .. } = root {
        if is_column_ref(left) && is_column_ref(right) {
            return ExprPattern::BinaryOp;
        }
        if (is_column_ref(left) && is_binary_of_refs(right))
            || (is_binary_of_refs(left) && is_column_ref(right))
        {
            return ExprPattern::NestedBinary;
        }
    }

    if root.node_count() <= 8 && !root.contains_ternary() {
        ExprPattern::ComplexFusible
    } else {
        ExprPattern::ComplexUnfusible
    }
}

/// Analyze a tree and produce its fusion opportunity
pub fn analyze(root: &Expr) -> FusionOpportunity {
    let pattern = classify(root);
    let node_count = root.node_count();
    let input_columns = root.memory_loads() as usize;
    let intermediates = root.intermediate_count();
    let register_pressure = input_columns + intermediates;

    // Unfused execution writes one intermediate column per intermediate
    // node back to memory; fusing saves that traffic
    let speedup_estimate = if intermediates > 0 {
        let memory_time_saved_ms = intermediates as f64 * COLUMN_BYTES / BANDWIDTH_BYTES_PER_MS;
        let compute_time_ms = node_count as f64 * COMPUTE_MS_PER_NODE;
        (compute_time_ms + memory_time_saved_ms) / compute_time_ms
    } else {
        1.0
    };

    let fusible = !root.contains_ternary();
    let fuse = register_pressure <= REGISTER_PRESSURE_LIMIT
        && speedup_estimate >= MIN_SPEEDUP
        && node_count >= 2
        && fusible;

    let tier = match pattern {
        ExprPattern::SingleColumn
        | ExprPattern::BinaryOp
        | ExprPattern::NestedBinary
        | ExprPattern::Fma => Tier::Tier0,
        _ if node_count <= 8 && !root.contains_ternary() => Tier::Tier1,
        _ => Tier::Tier2,
    };

    FusionOpportunity {
        pattern,
        tier,
        node_count,
        input_columns,
        register_pressure,
        speedup_estimate,
        fuse,
    }
}
