//! Materializing evaluator: the ground-truth execution path.
//!
//! Walks the tree bottom-up, materializing one intermediate column per
//! operator node through the elementwise kernels. Every operator and type
//! combination runs here, including the shapes the fused tiers reject
//! (ternary select, mixed compute domains, integer division inside a
//! fused subtree).

use crate::bitmap::PresenceBitmap;
use crate::column::ops;
use crate::column::{AnyColumn, Bf16, Column, ElementDomain};
use crate::error::{EngineError, Result};
use crate::expr::ast::{ConstValue, Expr};
use crate::expr::infer::promote_arith;
use crate::types::{BinOp, DataType, UnOp};

use super::Env;

/// Intermediate value: a materialized column or a still-scalar constant
enum Value {
    Col(AnyColumn),
    Scalar(ConstValue),
}

fn cast_scalar(value: ConstValue, target: DataType) -> ConstValue {
    if target == DataType::Bool {
        ConstValue::Bool(value.is_truthy())
    } else if target.is_floating() {
        ConstValue::Float(value.as_f64())
    } else {
        ConstValue::Int(value.as_i64())
    }
}

/// Runtime constant arithmetic; integer division by zero is an evaluation
/// error here, unlike in the optimizer where it is simply left unfolded
fn scalar_binary(op: BinOp, lhs: ConstValue, rhs: ConstValue) -> Result<ConstValue> {
    let integral = matches!(lhs, ConstValue::Int(_) | ConstValue::Bool(_))
        && matches!(rhs, ConstValue::Int(_) | ConstValue::Bool(_));
    if op.is_comparison() {
        let (a, b) = (lhs.as_f64(), rhs.as_f64());
        let hit = match op {
            BinOp::Eq => a == b,
            BinOp::Ne => a != b,
            BinOp::Lt => a < b,
            BinOp::Le => a <= b,
            BinOp::Gt => a > b,
            _ => a >= b,
        };
        return Ok(ConstValue::Bool(hit));
    }
    if op.is_logical() {
        let hit = match op {
            BinOp::LogAnd => lhs.is_truthy() && rhs.is_truthy(),
            _ => lhs.is_truthy() || rhs.is_truthy(),
        };
        return Ok(ConstValue::Bool(hit));
    }
    if integral {
        let (a, b) = (lhs.as_i64(), rhs.as_i64());
        let v = match op {
            BinOp::Add => a.wrapping_add(b),
            BinOp::Sub => a.wrapping_sub(b),
            BinOp::Mul => a.wrapping_mul(b),
            BinOp::Div | BinOp::Mod => {
                if b == 0 {
                    return Err(EngineError::DivisionByZero);
                }
                if op == BinOp::Div {
                    a.wrapping_div(b)
                } else {
                    a.wrapping_rem(b)
                }
            }
            BinOp::BitAnd => a & b,
            BinOp::BitOr => a | b,
            BinOp::BitXor => a ^ b,
            BinOp::Shl => a.wrapping_shl(b as u32),
            BinOp::Shr => a.wrapping_shr(b as u32),
            BinOp::Min => a.min(b),
            BinOp::Max => a.max(b),
            _ => {
                return Err(EngineError::Internal(format!(
                    "scalar op {} fell through",
                    op
                )));
            }
        };
        return Ok(ConstValue::Int(v));
    }
    let (a, b) = (lhs.as_f64(), rhs.as_f64());
    let v = match op {
        BinOp::Add => a + b,
        BinOp::Sub => a - b,
        BinOp::Mul => a * b,
        BinOp::Div => a / b,
        BinOp::Mod => a % b,
        BinOp::Min => a.min(b),
        BinOp::Max => a.max(b),
        _ => {
            return Err(EngineError::TypeError(format!(
                "{} is not defined for floats",
                op
            )));
        }
    };
    Ok(ConstValue::Float(v))
}

/// Operand type both sides convert to before the kernel runs
fn operand_target(op: BinOp, l: DataType, r: DataType, node_ty: DataType) -> Result<DataType> {
    if op.is_comparison() || op.is_logical() {
        Ok(promote_arith(l, r)?.materialize())
    } else {
        Ok(node_ty.materialize())
    }
}

fn scalar_for_i32(v: ConstValue) -> i32 {
    v.as_i64() as i32
}

fn scalar_for_f32(v: ConstValue) -> f32 {
    v.as_f64() as f32
}

fn col_scalar(col: &AnyColumn, scalar: ConstValue, op: BinOp, scalar_on_left: bool) -> Result<AnyColumn> {
    if op.is_comparison() {
        return Ok(AnyColumn::I32(match col {
            AnyColumn::I32(c) => ops::compare_scalar(c, scalar_for_i32(scalar), op, scalar_on_left)?,
            AnyColumn::F32(c) => ops::compare_scalar(c, scalar_for_f32(scalar), op, scalar_on_left)?,
            AnyColumn::Bf16(c) => {
                ops::compare_scalar(c, scalar_for_f32(scalar), op, scalar_on_left)?
            }
        }));
    }
    if op.is_logical() {
        // Broadcast the scalar's truth value through a filled column; the
        // column side reduces to 0/1 through a double negation so float
        // truthiness survives
        let n = col.len();
        let fill = scalar.is_truthy() as i32;
        let filled = AnyColumn::I32(Column::with_fill(n, fill)?);
        let truth = AnyColumn::I32(match col {
            AnyColumn::I32(c) => ops::unary_lognot(&ops::unary_lognot(c)?)?,
            AnyColumn::F32(c) => ops::unary_lognot(&ops::unary_lognot(c)?)?,
            AnyColumn::Bf16(c) => ops::unary_lognot(&ops::unary_lognot(c)?)?,
        });
        return if scalar_on_left {
            Ok(AnyColumn::I32(filled.logical(&truth, op)?))
        } else {
            Ok(AnyColumn::I32(truth.logical(&filled, op)?))
        };
    }
    if op.is_bitwise() {
        let AnyColumn::I32(c) = col else {
            return Err(EngineError::TypeError(format!(
                "bitwise {} requires integral operands, found {}",
                op,
                col.data_type()
            )));
        };
        return Ok(AnyColumn::I32(ops::bitwise_scalar(
            c,
            scalar_for_i32(scalar),
            op,
            scalar_on_left,
        )?));
    }
    Ok(match col {
        AnyColumn::I32(c) => {
            AnyColumn::I32(ops::binary_scalar(c, scalar_for_i32(scalar), op, scalar_on_left)?)
        }
        AnyColumn::F32(c) => {
            AnyColumn::F32(ops::binary_scalar(c, scalar_for_f32(scalar), op, scalar_on_left)?)
        }
        AnyColumn::Bf16(c) => {
            AnyColumn::Bf16(ops::binary_scalar(c, scalar_for_f32(scalar), op, scalar_on_left)?)
        }
    })
}

fn col_col(a: &AnyColumn, b: &AnyColumn, op: BinOp) -> Result<AnyColumn> {
    if op.is_comparison() {
        return Ok(AnyColumn::I32(a.compare(b, op)?));
    }
    if op.is_logical() {
        return Ok(AnyColumn::I32(a.logical(b, op)?));
    }
    if op.is_bitwise() {
        let (AnyColumn::I32(a), AnyColumn::I32(b)) = (a, b) else {
            return Err(EngineError::TypeError(format!(
                "bitwise {} requires integral operands",
                op
            )));
        };
        return Ok(AnyColumn::I32(ops::binary_bitwise(a, b, op)?));
    }
    a.elementwise(b, op)
}

fn blend_select<T: ElementDomain>(
    cond: &Column<i32>,
    then_col: &Column<T>,
    else_col: &Column<T>,
) -> Result<Column<T>> {
    let n = cond.len().min(then_col.len()).min(else_col.len());
    let mut out = Column::with_len(n)?;
    let mut presence = PresenceBitmap::with_len(n, false);
    for i in 0..n {
        let take_then = cond.value_unchecked(i) != 0;
        let (branch_present, value) = if take_then {
            (then_col.present_unchecked(i), then_col.value_unchecked(i))
        } else {
            (else_col.present_unchecked(i), else_col.value_unchecked(i))
        };
        if cond.present_unchecked(i) && branch_present {
            out.set(i, value)?;
            presence.set(i, true);
        }
    }
    *out.presence_mut() = presence;
    Ok(out)
}

fn materialize_scalar(value: ConstValue, target: DataType, len: usize) -> Result<AnyColumn> {
    Ok(match target.materialize() {
        DataType::I32 => AnyColumn::I32(Column::with_fill(len, value.as_i64() as i32)?),
        DataType::Bf16 => AnyColumn::Bf16(Column::with_fill(
            len,
            Bf16::from_f32(value.as_f64() as f32),
        )?),
        _ => AnyColumn::F32(Column::with_fill(len, value.as_f64() as f32)?),
    })
}

fn eval_node(expr: &Expr, env: &Env) -> Result<Value> {
    match expr {
        Expr::ColumnRef { name, .. } => {
            let col = env.get(name).ok_or_else(|| {
                EngineError::Internal(format!("column '{}' vanished from the environment", name))
            })?;
            Ok(Value::Col(col.clone()))
        }
        Expr::Constant { value } => Ok(Value::Scalar(*value)),
        Expr::Cast { target, child } => match eval_node(child, env)? {
            Value::Col(col) => Ok(Value::Col(col.cast_to(target.materialize())?)),
            Value::Scalar(v) => Ok(Value::Scalar(cast_scalar(v, *target))),
        },
        Expr::Unary { op, child, .. } => match eval_node(child, env)? {
            Value::Scalar(v) => match op {
                UnOp::BitNot => match v {
                    ConstValue::Int(i) => Ok(Value::Scalar(ConstValue::Int(!i))),
                    ConstValue::Bool(b) => Ok(Value::Scalar(ConstValue::Int(!(b as i64)))),
                    ConstValue::Float(_) => Err(EngineError::TypeError(
                        "bitwise ~ requires an integral operand".to_string(),
                    )),
                },
                UnOp::LogNot => Ok(Value::Scalar(ConstValue::Bool(!v.is_truthy()))),
            },
            Value::Col(col) => match op {
                UnOp::BitNot => {
                    let AnyColumn::I32(c) = &col else {
                        return Err(EngineError::TypeError(
                            "bitwise ~ requires an integral operand".to_string(),
                        ));
                    };
                    Ok(Value::Col(AnyColumn::I32(ops::unary_bitnot(c)?)))
                }
                UnOp::LogNot => Ok(Value::Col(AnyColumn::I32(match &col {
                    AnyColumn::I32(c) => ops::unary_lognot(c)?,
                    AnyColumn::F32(c) => ops::unary_lognot(c)?,
                    AnyColumn::Bf16(c) => ops::unary_lognot(c)?,
                }))),
            },
        },
        Expr::Binary {
            op, left, right, ty,
        } => {
            let lv = eval_node(left, env)?;
            let rv = eval_node(right, env)?;
            let node_ty = ty.ok_or_else(|| {
                EngineError::Internal("expression not typed".to_string())
            })?;
            match (lv, rv) {
                (Value::Scalar(a), Value::Scalar(b)) => {
                    Ok(Value::Scalar(scalar_binary(*op, a, b)?))
                }
                (Value::Col(a), Value::Col(b)) => {
                    let target = operand_target(
                        *op,
                        type_of_col(&a),
                        type_of_col(&b),
                        node_ty,
                    )?;
                    let a = a.cast_to(target)?;
                    let b = b.cast_to(target)?;
                    Ok(Value::Col(col_col(&a, &b, *op)?))
                }
                (Value::Col(a), Value::Scalar(s)) => {
                    let target =
                        operand_target(*op, type_of_col(&a), s.data_type(), node_ty)?;
                    let a = a.cast_to(target)?;
                    Ok(Value::Col(col_scalar(&a, s, *op, false)?))
                }
                (Value::Scalar(s), Value::Col(b)) => {
                    let target =
                        operand_target(*op, s.data_type(), type_of_col(&b), node_ty)?;
                    let b = b.cast_to(target)?;
                    Ok(Value::Col(col_scalar(&b, s, *op, true)?))
                }
            }
        }
        Expr::Ternary {
            cond,
            then_branch,
            else_branch,
            ty,
        } => {
            let node_ty = ty.ok_or_else(|| {
                EngineError::Internal("expression not typed".to_string())
            })?;
            let cond_v = eval_node(cond, env)?;
            let then_v = eval_node(then_branch, env)?;
            let else_v = eval_node(else_branch, env)?;

            let cond_col = match cond_v {
                Value::Col(c) => c.cast_to(DataType::I32)?,
                Value::Scalar(v) => {
                    // A constant condition selects a branch outright
                    let chosen = if v.is_truthy() { then_v } else { else_v };
                    return match chosen {
                        Value::Col(c) => Ok(Value::Col(c.cast_to(node_ty.materialize())?)),
                        Value::Scalar(s) => Ok(Value::Scalar(s)),
                    };
                }
            };
            let AnyColumn::I32(cond_i32) = &cond_col else {
                return Err(EngineError::Internal("condition cast failed".to_string()));
            };

            let len = cond_col.len();
            let then_col = to_column(then_v, node_ty, len)?.cast_to(node_ty.materialize())?;
            let else_col = to_column(else_v, node_ty, len)?.cast_to(node_ty.materialize())?;

            Ok(Value::Col(match (&then_col, &else_col) {
                (AnyColumn::I32(t), AnyColumn::I32(e)) => {
                    AnyColumn::I32(blend_select(cond_i32, t, e)?)
                }
                (AnyColumn::F32(t), AnyColumn::F32(e)) => {
                    AnyColumn::F32(blend_select(cond_i32, t, e)?)
                }
                (AnyColumn::Bf16(t), AnyColumn::Bf16(e)) => {
                    AnyColumn::Bf16(blend_select(cond_i32, t, e)?)
                }
                _ => {
                    return Err(EngineError::Internal(
                        "branch materialization diverged".to_string(),
                    ));
                }
            }))
        }
    }
}

fn type_of_col(col: &AnyColumn) -> DataType {
    col.data_type()
}

fn to_column(value: Value, node_ty: DataType, len: usize) -> Result<AnyColumn> {
    match value {
        Value::Col(c) => Ok(c),
        Value::Scalar(s) => materialize_scalar(s, node_ty, len),
    }
}

/// Evaluate a tree by materializing every intermediate
pub fn evaluate(expr: &Expr, env: &Env) -> Result<AnyColumn> {
    match eval_node(expr, env)? {
        Value::Col(col) => Ok(col),
        Value::Scalar(_) => Err(EngineError::NotSupported(
            "expression references no columns".to_string(),
        )),
    }
}

/// Evaluate a tree that the optimizer reduced to a pure constant (for
/// example `x ^ x`), broadcasting the result over `len` lanes
pub fn evaluate_broadcast(expr: &Expr, env: &Env, len: usize) -> Result<AnyColumn> {
    match eval_node(expr, env)? {
        Value::Col(col) => Ok(col),
        Value::Scalar(s) => {
            let ty = expr
                .result_type()
                .ok_or_else(|| EngineError::Internal("expression not typed".to_string()))?;
            materialize_scalar(s, ty, len)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::expr::infer::infer;
    use crate::expr::parser::parse;
    use std::collections::HashMap;

    fn env() -> Env {
        let mut e = Env::new();
        e.insert(
            "a".to_string(),
            AnyColumn::I32(Column::from_slice(&[1, 2, 3, 4]).unwrap()),
        );
        e.insert(
            "b".to_string(),
            AnyColumn::I32(Column::from_slice(&[5, 6, 7, 8]).unwrap()),
        );
        e.insert(
            "f".to_string(),
            AnyColumn::F32(Column::from_slice(&[0.5, 1.5, 2.5, 3.5]).unwrap()),
        );
        e
    }

    fn eval(src: &str, env: &Env) -> Result<AnyColumn> {
        let types: HashMap<String, DataType> = env
            .iter()
            .map(|(k, v)| (k.clone(), v.data_type()))
            .collect();
        let mut e = parse(src, &types).unwrap();
        infer(&mut e).unwrap();
        evaluate(&e, env)
    }

    #[test]
    fn test_basic_arith() {
        let env = env();
        let out = eval("a + b * a", &env).unwrap();
        assert_eq!(out.get_as_f64(0), Some(6.0));
        assert_eq!(out.get_as_f64(3), Some(36.0));
    }

    #[test]
    fn test_mixed_types_promote() {
        let env = env();
        let out = eval("a + f", &env).unwrap();
        assert_eq!(out.data_type(), DataType::F32);
        assert_eq!(out.get_as_f64(0), Some(1.5));
    }

    #[test]
    fn test_scalar_broadcast_left_and_right() {
        let env = env();
        let out = eval("10 - a", &env).unwrap();
        assert_eq!(out.get_as_f64(0), Some(9.0));
        let out = eval("a - 10", &env).unwrap();
        assert_eq!(out.get_as_f64(0), Some(-9.0));
    }

    #[test]
    fn test_float_scalar_promotes_int_column() {
        let env = env();
        let out = eval("a * 0.5", &env).unwrap();
        assert_eq!(out.data_type(), DataType::F32);
        assert_eq!(out.get_as_f64(1), Some(1.0));
    }

    #[test]
    fn test_comparisons_and_logicals() {
        let env = env();
        let out = eval("a < 3 && b > 5", &env).unwrap();
        assert_eq!(out.get_as_f64(0), Some(0.0));
        assert_eq!(out.get_as_f64(1), Some(1.0));
        assert_eq!(out.get_as_f64(2), Some(0.0));
    }

    #[test]
    fn test_ternary_blend() {
        let env = env();
        let out = eval("a < 3 ? a : b", &env).unwrap();
        assert_eq!(
            (0..4).map(|i| out.get_as_f64(i).unwrap()).collect::<Vec<_>>(),
            vec![1.0, 2.0, 7.0, 8.0]
        );
    }

    #[test]
    fn test_ternary_scalar_branches() {
        let env = env();
        let out = eval("a < 3 ? 1 : 0", &env).unwrap();
        assert_eq!(
            (0..4).map(|i| out.get_as_f64(i).unwrap()).collect::<Vec<_>>(),
            vec![1.0, 1.0, 0.0, 0.0]
        );
    }

    #[test]
    fn test_constant_division_by_zero_at_runtime() {
        let env = env();
        let err = eval("a + 1 / 0", &env).unwrap_err();
        assert_eq!(err, EngineError::DivisionByZero);
    }

    #[test]
    fn test_unary_ops() {
        let env = env();
        let out = eval("~a", &env).unwrap();
        assert_eq!(out.get_as_f64(0), Some(-2.0));
        let out = eval("!a", &env).unwrap();
        assert_eq!(out.get_as_f64(0), Some(0.0));
    }

    #[test]
    fn test_cast_chain() {
        let env = env();
        let out = eval("bf16(f32(a))", &env).unwrap();
        assert_eq!(out.data_type(), DataType::Bf16);
        assert_eq!(out.get_as_f64(2), Some(3.0));
    }

    #[test]
    fn test_no_columns_is_not_supported() {
        let env = env();
        let err = eval("1 + 2", &env).unwrap_err();
        assert!(matches!(err, EngineError::NotSupported(_)));
    }
}
