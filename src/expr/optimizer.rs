//! Algebraic optimizer: five idempotent passes in fixed order.
//!
//! 1. constant folding (integer `/` and `%` by zero never fold)
//! 2. algebraic identities
//! 3. strength reduction
//! 4. cast folding
//! 5. conversion hoisting, so codegen emits conversions at the leaves
//!    where they fuse with loads

use crate::expr::ast::{ConstValue, Expr};
use crate::expr::infer::promote_arith;
use crate::types::{BinOp, DataType, UnOp};

/// Run every pass over the tree. Requires inference to have annotated the
/// nodes; idempotent.
pub fn optimize(expr: &mut Expr) {
    constant_folding(expr);
    algebraic_identities(expr);
    strength_reduction(expr);
    cast_folding(expr);
    conversion_hoisting(expr);
}

fn take(slot: &mut Expr) -> Expr {
    std::mem::replace(slot, Expr::int(0))
}

fn const_of(e: &Expr) -> Option<ConstValue> {
    match e {
        Expr::Constant { value } => Some(*value),
        _ => None,
    }
}

fn is_zero(e: &Expr) -> bool {
    const_of(e).is_some_and(|v| v.is_zero())
}

fn is_one(e: &Expr) -> bool {
    const_of(e).is_some_and(|v| v.is_one())
}

fn eval_const_binary(op: BinOp, lhs: ConstValue, rhs: ConstValue) -> Option<ConstValue> {
    let integral = matches!(lhs, ConstValue::Int(_) | ConstValue::Bool(_))
        && matches!(rhs, ConstValue::Int(_) | ConstValue::Bool(_));
    if integral {
        let a = lhs.as_i64();
        let b = rhs.as_i64();
        let v = match op {
            BinOp::Add => a.wrapping_add(b),
            BinOp::Sub => a.wrapping_sub(b),
            BinOp::Mul => a.wrapping_mul(b),
            // A zero divisor is preserved for the runtime error
            BinOp::Div if b != 0 => a.wrapping_div(b),
            BinOp::Mod if b != 0 => a.wrapping_rem(b),
            BinOp::BitAnd => a & b,
            BinOp::BitOr => a | b,
            BinOp::BitXor => a ^ b,
            BinOp::Shl => a.wrapping_shl(b as u32),
            BinOp::Shr => a.wrapping_shr(b as u32),
            _ => return None,
        };
        return Some(ConstValue::Int(v));
    }
    let a = lhs.as_f64();
    let b = rhs.as_f64();
    let v = match op {
        BinOp::Add => a + b,
        BinOp::Sub => a - b,
        BinOp::Mul => a * b,
        BinOp::Div if b != 0.0 => a / b,
        _ => return None,
    };
    Some(ConstValue::Float(v))
}

fn eval_const_unary(op: UnOp, child: ConstValue) -> Option<ConstValue> {
    match op {
        UnOp::BitNot => match child {
            ConstValue::Int(v) => Some(ConstValue::Int(!v)),
            _ => None,
        },
        UnOp::LogNot => Some(ConstValue::Bool(!child.is_truthy())),
    }
}

fn constant_folding(expr: &mut Expr) {
    match expr {
        Expr::Binary {
            op, left, right, ..
        } => {
            constant_folding(left);
            constant_folding(right);
            if let (Some(lv), Some(rv)) = (const_of(left), const_of(right)) {
                if let Some(folded) = eval_const_binary(*op, lv, rv) {
                    *expr = Expr::Constant { value: folded };
                }
            }
        }
        Expr::Unary { op, child, .. } => {
            constant_folding(child);
            if let Some(cv) = const_of(child) {
                if let Some(folded) = eval_const_unary(*op, cv) {
                    *expr = Expr::Constant { value: folded };
                }
            }
        }
        Expr::Cast { child, .. } => constant_folding(child),
        Expr::Ternary {
            cond,
            then_branch,
            else_branch,
            ..
        } => {
            constant_folding(cond);
            constant_folding(then_branch);
            constant_folding(else_branch);
            if let Some(cv) = const_of(cond) {
                let branch = if cv.is_truthy() { then_branch } else { else_branch };
                *expr = take(branch);
            }
        }
        Expr::ColumnRef { .. } | Expr::Constant { .. } => {}
    }
}

fn algebraic_identities(expr: &mut Expr) {
    if let Expr::Ternary {
        cond,
        then_branch,
        else_branch,
        ..
    } = expr
    {
        algebraic_identities(cond);
        algebraic_identities(then_branch);
        algebraic_identities(else_branch);
        return;
    }
    if let Expr::Unary { child, .. } | Expr::Cast { child, .. } = expr {
        algebraic_identities(child);
        return;
    }
    let Expr::Binary {
        op, left, right, ..
    } = expr
    else {
        return;
    };
    algebraic_identities(left);
    algebraic_identities(right);

    let replacement = match op {
        // x + 0, 0 + x, x - 0
        BinOp::Add if is_zero(right) => Some(take(left)),
        BinOp::Add if is_zero(left) => Some(take(right)),
        BinOp::Sub if is_zero(right) => Some(take(left)),
        // x * 0, 0 * x, x * 1, 1 * x
        BinOp::Mul if is_zero(right) || is_zero(left) => Some(Expr::int(0)),
        BinOp::Mul if is_one(right) => Some(take(left)),
        BinOp::Mul if is_one(left) => Some(take(right)),
        // x / 1, 0 / x
        BinOp::Div if is_one(right) => Some(take(left)),
        BinOp::Div if is_zero(left) => Some(Expr::int(0)),
        // x & 0, x | 0, x ^ 0
        BinOp::BitAnd if is_zero(right) => Some(Expr::int(0)),
        BinOp::BitOr if is_zero(right) => Some(take(left)),
        BinOp::BitXor if is_zero(right) => Some(take(left)),
        // x & x, x | x, x ^ x
        BinOp::BitAnd if Expr::same_column_ref(left, right) => Some(take(left)),
        BinOp::BitOr if Expr::same_column_ref(left, right) => Some(take(left)),
        BinOp::BitXor if Expr::same_column_ref(left, right) => Some(Expr::int(0)),
        _ => None,
    };
    if let Some(new_expr) = replacement {
        *expr = new_expr;
    }
}

fn const_power_of_two(e: &Expr) -> Option<u32> {
    match const_of(e) {
        Some(ConstValue::Int(v)) if v > 0 && (v & (v - 1)) == 0 => {
            Some(v.trailing_zeros())
        }
        _ => None,
    }
}

fn strength_reduction(expr: &mut Expr) {
    match expr {
        Expr::Unary { child, .. } | Expr::Cast { child, .. } => strength_reduction(child),
        Expr::Ternary {
            cond,
            then_branch,
            else_branch,
            ..
        } => {
            strength_reduction(cond);
            strength_reduction(then_branch);
            strength_reduction(else_branch);
        }
        Expr::Binary {
            op, left, right, ty,
        } => {
            strength_reduction(left);
            strength_reduction(right);
            let node_ty = *ty;
            let left_integral = left
                .result_type()
                .map(|t| t.is_integral())
                .unwrap_or(false);

            if *op == BinOp::Mul {
                if let Some(k) = const_power_of_two(right) {
                    if k == 1 {
                        // x * 2 becomes x + x
                        let lhs = take(left);
                        *expr = Expr::Binary {
                            op: BinOp::Add,
                            left: Box::new(lhs.clone()),
                            right: Box::new(lhs),
                            ty: node_ty,
                        };
                        return;
                    }
                    if k >= 2 && left_integral {
                        // x * 2^k becomes x << k
                        let lhs = take(left);
                        *expr = Expr::Binary {
                            op: BinOp::Shl,
                            left: Box::new(lhs),
                            right: Box::new(Expr::int(k as i64)),
                            ty: node_ty,
                        };
                        return;
                    }
                }
            }
            if *op == BinOp::Div && left_integral {
                if let Some(k) = const_power_of_two(right) {
                    if k >= 1 {
                        // x / 2^k becomes x >> k; signed shift is arithmetic
                        let lhs = take(left);
                        *expr = Expr::Binary {
                            op: BinOp::Shr,
                            left: Box::new(lhs),
                            right: Box::new(Expr::int(k as i64)),
                            ty: node_ty,
                        };
                    }
                }
            }
        }
        Expr::ColumnRef { .. } | Expr::Constant { .. } => {}
    }
}

fn cast_folding(expr: &mut Expr) {
    match expr {
        Expr::Cast { target, child } => {
            cast_folding(child);
            // T(U(x)) collapses to T(x)
            if let Expr::Cast { child: inner, .. } = &mut **child {
                let inner_expr = take(inner);
                **child = inner_expr;
            }
            // T(x) where x already has type T is a no-op
            if child.result_type() == Some(*target) {
                *expr = take(child);
            }
        }
        Expr::Unary { child, .. } => cast_folding(child),
        Expr::Binary { left, right, .. } => {
            cast_folding(left);
            cast_folding(right);
        }
        Expr::Ternary {
            cond,
            then_branch,
            else_branch,
            ..
        } => {
            cast_folding(cond);
            cast_folding(then_branch);
            cast_folding(else_branch);
        }
        Expr::ColumnRef { .. } | Expr::Constant { .. } => {}
    }
}

fn ensure_type(slot: &mut Expr, target: DataType) {
    if slot.result_type() == Some(target) || matches!(slot, Expr::Cast { .. }) {
        return;
    }
    let child = take(slot);
    *slot = Expr::Cast {
        target,
        child: Box::new(child),
    };
}

fn conversion_hoisting(expr: &mut Expr) {
    match expr {
        Expr::Binary {
            op, left, right, ty,
        } => {
            conversion_hoisting(left);
            conversion_hoisting(right);
            // Comparisons and logicals return bool; their operands convert
            // to the promoted operand type instead
            let target = if op.is_comparison() || op.is_logical() {
                match (left.result_type(), right.result_type()) {
                    (Some(l), Some(r)) => promote_arith(l, r).ok(),
                    _ => None,
                }
            } else {
                *ty
            };
            if let Some(target) = target {
                ensure_type(left, target);
                ensure_type(right, target);
            }
        }
        Expr::Unary { child, .. } | Expr::Cast { child, .. } => conversion_hoisting(child),
        Expr::Ternary {
            cond,
            then_branch,
            else_branch,
            ty,
        } => {
            conversion_hoisting(cond);
            conversion_hoisting(then_branch);
            conversion_hoisting(else_branch);
            if let Some(target) = *ty {
                ensure_type(then_branch, target);
                ensure_type(else_branch, target);
            }
        }
        Expr::ColumnRef { .. } | Expr::Constant { .. } => {}
    }
}
