//! colvex: a columnar, in-memory vectorized compute engine.
//!
//! Columns of `i32`, `f32`, or `bf16` pair a dense, cache-line-aligned
//! value buffer (backed by a buddy region allocator) with a presence
//! bitmap. An interpreter owns named columns and evaluates C-like infix
//! expressions over them through a tiered pipeline: parse, type
//! inference, algebraic optimization, fusion analysis, then dispatch to
//! pre-compiled kernels, a register-stack evaluator, or a runtime code
//! generator.
//!
//! # Example
//! ```
//! use colvex::{Column, Interpreter};
//!
//! let mut interp = Interpreter::new();
//! interp.register_i32("a", Column::from_slice(&[1, 2, 3, 4]).unwrap());
//! interp.register_i32("b", Column::from_slice(&[10, 20, 30, 40]).unwrap());
//!
//! let out = interp.eval("a * 2 + b").unwrap();
//! assert_eq!(out.get_as_f64(3), Some(48.0));
//! ```

pub mod bitmap;
pub mod column;
pub mod error;
pub mod exec;
pub mod expr;
pub mod ffi;
pub mod interpreter;
pub mod mem;
pub mod types;

pub use bitmap::PresenceBitmap;
pub use column::{AnyColumn, Bf16, Column, Reduced};
pub use error::{EngineError, Result};
pub use expr::{ExprPattern, Tier};
pub use interpreter::{EvalPlan, Interpreter};
pub use types::{BinOp, DataType, UnOp};

/// Evaluate a one-off expression over named columns.
///
/// Convenience wrapper that builds a throwaway interpreter, registers the
/// given columns, and evaluates the expression.
pub fn eval_expression(
    expression: &str,
    columns: impl IntoIterator<Item = (String, AnyColumn)>,
) -> Result<AnyColumn> {
    let mut interp = Interpreter::new();
    for (name, column) in columns {
        interp.register(name, column);
    }
    interp.eval(expression)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_eval_expression_convenience() {
        let out = eval_expression(
            "a + b",
            vec![
                (
                    "a".to_string(),
                    AnyColumn::I32(Column::from_slice(&[1, 2]).unwrap()),
                ),
                (
                    "b".to_string(),
                    AnyColumn::I32(Column::from_slice(&[3, 4]).unwrap()),
                ),
            ],
        )
        .unwrap();
        assert_eq!(out.get_as_f64(0), Some(4.0));
        assert_eq!(out.get_as_f64(1), Some(6.0));
    }
}
