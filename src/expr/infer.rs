//! Bottom-up type inference with C-style promotion rules.

use crate::error::{EngineError, Result};
use crate::expr::ast::Expr;
use crate::types::{BinOp, DataType, UnOp};

/// Wider of two integral types under mixed-signedness rules: equal width
/// prefers signed, unequal width takes the wider type
fn wider_int(a: DataType, b: DataType) -> Result<DataType> {
    // Bool participates in integer arithmetic as i32
    let a = if a == DataType::Bool { DataType::I32 } else { a };
    let b = if b == DataType::Bool { DataType::I32 } else { b };
    if !a.is_integral() || !b.is_integral() {
        return Err(EngineError::TypeError(format!(
            "expected integral operands, found {} and {}",
            a, b
        )));
    }
    if a.is_signed() == b.is_signed() {
        return Ok(a.wider_of(b));
    }
    let (wa, wb) = (a.byte_width(), b.byte_width());
    if wa > wb {
        Ok(a)
    } else if wb > wa {
        Ok(b)
    } else if a.is_signed() {
        Ok(a)
    } else {
        Ok(b)
    }
}

/// Arithmetic promotion: float beats int, wider beats narrower
pub(crate) fn promote_arith(lhs: DataType, rhs: DataType) -> Result<DataType> {
    if lhs.is_floating() || rhs.is_floating() {
        Ok(lhs.to_float().wider_of(rhs.to_float()))
    } else {
        wider_int(lhs, rhs)
    }
}

fn promote(lhs: DataType, rhs: DataType, op: BinOp) -> Result<DataType> {
    if op.is_bitwise() {
        if lhs.is_floating() || rhs.is_floating() {
            return Err(EngineError::TypeError(format!(
                "bitwise {} requires integral operands, found {} and {}",
                op, lhs, rhs
            )));
        }
        return wider_int(lhs, rhs);
    }
    if op.is_comparison() || op.is_logical() {
        return Ok(DataType::Bool);
    }
    promote_arith(lhs, rhs)
}

fn is_condition_type(ty: DataType) -> bool {
    ty == DataType::Bool || ty.is_integral()
}

/// Infer and record the result type of every node, bottom-up in a single
/// pass
pub fn infer(expr: &mut Expr) -> Result<DataType> {
    match expr {
        Expr::ColumnRef { ty, .. } => Ok(*ty),
        Expr::Constant { value } => Ok(value.data_type()),
        Expr::Unary { op, child, ty } => {
            let child_ty = infer(child)?;
            let result = match op {
                UnOp::BitNot => {
                    if child_ty.is_floating() {
                        return Err(EngineError::TypeError(format!(
                            "bitwise ~ requires an integral operand, found {}",
                            child_ty
                        )));
                    }
                    child_ty
                }
                UnOp::LogNot => DataType::Bool,
            };
            *ty = Some(result);
            Ok(result)
        }
        Expr::Binary {
            op,
            left,
            right,
            ty,
        } => {
            let lhs = infer(left)?;
            let rhs = infer(right)?;
            let result = promote(lhs, rhs, *op)?;
            *ty = Some(result);
            Ok(result)
        }
        Expr::Ternary {
            cond,
            then_branch,
            else_branch,
            ty,
        } => {
            let cond_ty = infer(cond)?;
            let then_ty = infer(then_branch)?;
            let else_ty = infer(else_branch)?;
            if !is_condition_type(cond_ty) {
                return Err(EngineError::TypeError(format!(
                    "conditional requires an integral or bool condition, found {}",
                    cond_ty
                )));
            }
            let result = promote_arith(then_ty, else_ty)?;
            *ty = Some(result);
            Ok(result)
        }
        Expr::Cast { target, child } => {
            infer(child)?;
            Ok(*target)
        }
    }
}
