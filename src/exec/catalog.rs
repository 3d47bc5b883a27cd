//! Tier 0: pre-compiled kernel catalog.
//!
//! A dense mapping from `(pattern, operand type, op)` to a kernel function
//! pointer. Kernels are vectorized elementwise loops following the domain
//! pipeline; the i32/f32 entries route through the AVX2 fast paths when the
//! host supports them. Lookup is a constant-time match.

use crate::bitmap::PresenceBitmap;
use crate::column::ops;
use crate::column::{AnyColumn, Column, ElementDomain};
use crate::error::{EngineError, Result};
use crate::expr::ast::Expr;
use crate::expr::fusion::ExprPattern;
use crate::types::{BinOp, DataType};

use super::Env;

/// Kernel for the `BinaryOp` pattern
pub type BinaryKernel = fn(&AnyColumn, &AnyColumn) -> Result<AnyColumn>;
/// Kernel for the `Fma` and `NestedBinary` patterns
pub type TernaryInputKernel = fn(&AnyColumn, &AnyColumn, &AnyColumn) -> Result<AnyColumn>;

/// Binary arithmetic kernel with the SIMD fast path for 4-byte lanes
fn simd_or_portable_i32(a: &Column<i32>, b: &Column<i32>, op: BinOp) -> Result<Column<i32>> {
    #[cfg(target_arch = "x86_64")]
    {
        if matches!(
            op,
            BinOp::Add | BinOp::Sub | BinOp::Mul | BinOp::Min | BinOp::Max
        ) {
            let n = a.len().min(b.len());
            let mut out = Column::<i32>::with_len(n)?;
            let done = unsafe {
                crate::column::simd::binary_i32_avx2(op, a.as_ptr(), b.as_ptr(), out.as_mut_ptr(), n)
            };
            if done {
                *out.presence_mut() =
                    PresenceBitmap::and_truncated(a.presence(), b.presence(), n);
                return Ok(out);
            }
        }
    }
    ops::binary_elementwise(a, b, op)
}

fn simd_or_portable_f32(a: &Column<f32>, b: &Column<f32>, op: BinOp) -> Result<Column<f32>> {
    #[cfg(target_arch = "x86_64")]
    {
        if matches!(
            op,
            BinOp::Add | BinOp::Sub | BinOp::Mul | BinOp::Div | BinOp::Min | BinOp::Max
        ) {
            let n = a.len().min(b.len());
            let mut out = Column::<f32>::with_len(n)?;
            let done = unsafe {
                crate::column::simd::binary_f32_avx2(op, a.as_ptr(), b.as_ptr(), out.as_mut_ptr(), n)
            };
            if done {
                *out.presence_mut() =
                    PresenceBitmap::and_truncated(a.presence(), b.presence(), n);
                return Ok(out);
            }
        }
    }
    ops::binary_elementwise(a, b, op)
}

macro_rules! arith_kernel {
    ($name:ident, $variant:ident, $simd:ident, $op:expr) => {
        fn $name(a: &AnyColumn, b: &AnyColumn) -> Result<AnyColumn> {
            match (a, b) {
                (AnyColumn::$variant(a), AnyColumn::$variant(b)) => {
                    Ok(AnyColumn::$variant($simd(a, b, $op)?))
                }
                _ => Err(EngineError::TypeMismatch {
                    expected: a.data_type(),
                    found: b.data_type(),
                }),
            }
        }
    };
}

macro_rules! plain_arith_kernel {
    ($name:ident, $variant:ident, $op:expr) => {
        fn $name(a: &AnyColumn, b: &AnyColumn) -> Result<AnyColumn> {
            match (a, b) {
                (AnyColumn::$variant(a), AnyColumn::$variant(b)) => {
                    Ok(AnyColumn::$variant(ops::binary_elementwise(a, b, $op)?))
                }
                _ => Err(EngineError::TypeMismatch {
                    expected: a.data_type(),
                    found: b.data_type(),
                }),
            }
        }
    };
}

macro_rules! bitwise_kernel {
    ($name:ident, $op:expr) => {
        fn $name(a: &AnyColumn, b: &AnyColumn) -> Result<AnyColumn> {
            match (a, b) {
                (AnyColumn::I32(a), AnyColumn::I32(b)) => {
                    Ok(AnyColumn::I32(ops::binary_bitwise(a, b, $op)?))
                }
                _ => Err(EngineError::TypeMismatch {
                    expected: DataType::I32,
                    found: a.data_type(),
                }),
            }
        }
    };
}

macro_rules! compare_kernel {
    ($name:ident, $op:expr) => {
        fn $name(a: &AnyColumn, b: &AnyColumn) -> Result<AnyColumn> {
            Ok(AnyColumn::I32(a.compare(b, $op)?))
        }
    };
}

arith_kernel!(add_i32, I32, simd_or_portable_i32, BinOp::Add);
arith_kernel!(sub_i32, I32, simd_or_portable_i32, BinOp::Sub);
arith_kernel!(mul_i32, I32, simd_or_portable_i32, BinOp::Mul);
arith_kernel!(min_i32, I32, simd_or_portable_i32, BinOp::Min);
arith_kernel!(max_i32, I32, simd_or_portable_i32, BinOp::Max);
plain_arith_kernel!(div_i32, I32, BinOp::Div);
plain_arith_kernel!(mod_i32, I32, BinOp::Mod);

arith_kernel!(add_f32, F32, simd_or_portable_f32, BinOp::Add);
arith_kernel!(sub_f32, F32, simd_or_portable_f32, BinOp::Sub);
arith_kernel!(mul_f32, F32, simd_or_portable_f32, BinOp::Mul);
arith_kernel!(div_f32, F32, simd_or_portable_f32, BinOp::Div);
arith_kernel!(min_f32, F32, simd_or_portable_f32, BinOp::Min);
arith_kernel!(max_f32, F32, simd_or_portable_f32, BinOp::Max);
plain_arith_kernel!(mod_f32, F32, BinOp::Mod);

plain_arith_kernel!(add_bf16, Bf16, BinOp::Add);
plain_arith_kernel!(sub_bf16, Bf16, BinOp::Sub);
plain_arith_kernel!(mul_bf16, Bf16, BinOp::Mul);
plain_arith_kernel!(div_bf16, Bf16, BinOp::Div);
plain_arith_kernel!(min_bf16, Bf16, BinOp::Min);
plain_arith_kernel!(max_bf16, Bf16, BinOp::Max);

bitwise_kernel!(and_i32, BinOp::BitAnd);
bitwise_kernel!(or_i32, BinOp::BitOr);
bitwise_kernel!(xor_i32, BinOp::BitXor);
bitwise_kernel!(shl_i32, BinOp::Shl);
bitwise_kernel!(shr_i32, BinOp::Shr);

compare_kernel!(eq_any, BinOp::Eq);
compare_kernel!(ne_any, BinOp::Ne);
compare_kernel!(lt_any, BinOp::Lt);
compare_kernel!(le_any, BinOp::Le);
compare_kernel!(gt_any, BinOp::Gt);
compare_kernel!(ge_any, BinOp::Ge);

fn logand_any(a: &AnyColumn, b: &AnyColumn) -> Result<AnyColumn> {
    Ok(AnyColumn::I32(a.logical(b, BinOp::LogAnd)?))
}

fn logor_any(a: &AnyColumn, b: &AnyColumn) -> Result<AnyColumn> {
    Ok(AnyColumn::I32(a.logical(b, BinOp::LogOr)?))
}

/// Constant-time lookup of the `BinaryOp` catalog
pub fn lookup_binary(ty: DataType, op: BinOp) -> Option<BinaryKernel> {
    Some(match (ty, op) {
        (DataType::I32, BinOp::Add) => add_i32,
        (DataType::I32, BinOp::Sub) => sub_i32,
        (DataType::I32, BinOp::Mul) => mul_i32,
        (DataType::I32, BinOp::Div) => div_i32,
        (DataType::I32, BinOp::Mod) => mod_i32,
        (DataType::I32, BinOp::Min) => min_i32,
        (DataType::I32, BinOp::Max) => max_i32,
        (DataType::I32, BinOp::BitAnd) => and_i32,
        (DataType::I32, BinOp::BitOr) => or_i32,
        (DataType::I32, BinOp::BitXor) => xor_i32,
        (DataType::I32, BinOp::Shl) => shl_i32,
        (DataType::I32, BinOp::Shr) => shr_i32,
        (DataType::F32, BinOp::Add) => add_f32,
        (DataType::F32, BinOp::Sub) => sub_f32,
        (DataType::F32, BinOp::Mul) => mul_f32,
        (DataType::F32, BinOp::Div) => div_f32,
        (DataType::F32, BinOp::Mod) => mod_f32,
        (DataType::F32, BinOp::Min) => min_f32,
        (DataType::F32, BinOp::Max) => max_f32,
        (DataType::Bf16, BinOp::Add) => add_bf16,
        (DataType::Bf16, BinOp::Sub) => sub_bf16,
        (DataType::Bf16, BinOp::Mul) => mul_bf16,
        (DataType::Bf16, BinOp::Div) => div_bf16,
        (DataType::Bf16, BinOp::Min) => min_bf16,
        (DataType::Bf16, BinOp::Max) => max_bf16,
        (_, BinOp::Eq) => eq_any,
        (_, BinOp::Ne) => ne_any,
        (_, BinOp::Lt) => lt_any,
        (_, BinOp::Le) => le_any,
        (_, BinOp::Gt) => gt_any,
        (_, BinOp::Ge) => ge_any,
        (_, BinOp::LogAnd) => logand_any,
        (_, BinOp::LogOr) => logor_any,
        _ => return None,
    })
}

fn fma_i32(a: &AnyColumn, b: &AnyColumn, c: &AnyColumn) -> Result<AnyColumn> {
    match (a, b, c) {
        (AnyColumn::I32(a), AnyColumn::I32(b), AnyColumn::I32(c)) => {
            Ok(AnyColumn::I32(ops::fused_multiply_add(a, b, c)?))
        }
        _ => Err(EngineError::TypeMismatch {
            expected: DataType::I32,
            found: a.data_type(),
        }),
    }
}

fn fma_f32(a: &AnyColumn, b: &AnyColumn, c: &AnyColumn) -> Result<AnyColumn> {
    match (a, b, c) {
        (AnyColumn::F32(a), AnyColumn::F32(b), AnyColumn::F32(c)) => {
            #[cfg(target_arch = "x86_64")]
            {
                let n = a.len().min(b.len()).min(c.len());
                let mut out = Column::<f32>::with_len(n)?;
                let done = unsafe {
                    crate::column::simd::fma_f32_avx2(
                        a.as_ptr(),
                        b.as_ptr(),
                        c.as_ptr(),
                        out.as_mut_ptr(),
                        n,
                    )
                };
                if done {
                    let mut presence =
                        PresenceBitmap::and_truncated(a.presence(), b.presence(), n);
                    presence &= c.presence();
                    *out.presence_mut() = presence;
                    return Ok(AnyColumn::F32(out));
                }
            }
            Ok(AnyColumn::F32(ops::fused_multiply_add(a, b, c)?))
        }
        _ => Err(EngineError::TypeMismatch {
            expected: DataType::F32,
            found: a.data_type(),
        }),
    }
}

fn fma_bf16(a: &AnyColumn, b: &AnyColumn, c: &AnyColumn) -> Result<AnyColumn> {
    match (a, b, c) {
        (AnyColumn::Bf16(a), AnyColumn::Bf16(b), AnyColumn::Bf16(c)) => {
            Ok(AnyColumn::Bf16(ops::fused_multiply_add(a, b, c)?))
        }
        _ => Err(EngineError::TypeMismatch {
            expected: DataType::Bf16,
            found: a.data_type(),
        }),
    }
}

/// Constant-time lookup of the `Fma` catalog
pub fn lookup_fma(ty: DataType) -> Option<TernaryInputKernel> {
    Some(match ty {
        DataType::I32 => fma_i32,
        DataType::F32 => fma_f32,
        DataType::Bf16 => fma_bf16,
        _ => return None,
    })
}

fn nested<T: ElementDomain>(
    a: &Column<T>,
    b: &Column<T>,
    c: &Column<T>,
    outer: BinOp,
    inner: BinOp,
    a_on_left: bool,
) -> Result<Column<T>> {
    ops::fused_nested(a, b, c, outer, inner, a_on_left)
}

fn resolve<'e>(env: &'e Env, name: &str) -> Result<&'e AnyColumn> {
    env.get(name).ok_or_else(|| {
        EngineError::Internal(format!("column '{}' vanished from the environment", name))
    })
}

fn column_name(e: &Expr) -> Option<&str> {
    match e {
        Expr::ColumnRef { name, .. } => Some(name),
        _ => None,
    }
}

fn arithmetic_fusible(op: BinOp) -> bool {
    matches!(
        op,
        BinOp::Add | BinOp::Sub | BinOp::Mul | BinOp::Div | BinOp::Mod | BinOp::Min | BinOp::Max
    )
}

/// Execute a tree through the catalog; `Ok(None)` when no kernel covers
/// the shape, letting the dispatcher fall through
pub fn try_execute(expr: &Expr, pattern: ExprPattern, env: &Env) -> Result<Option<AnyColumn>> {
    match pattern {
        ExprPattern::SingleColumn => {
            let Some(name) = column_name(expr) else {
                return Ok(None);
            };
            Ok(Some(resolve(env, name)?.clone()))
        }
        ExprPattern::BinaryOp => {
            let Expr::Binary {
                op, left, right, ..
            } = expr
            else {
                return Ok(None);
            };
            let (Some(ln), Some(rn)) = (column_name(left), column_name(right)) else {
                return Ok(None);
            };
            let a = resolve(env, ln)?;
            let b = resolve(env, rn)?;
            if a.data_type() != b.data_type() {
                return Ok(None);
            }
            match lookup_binary(a.data_type(), *op) {
                Some(kernel) => kernel(a, b).map(Some),
                None => Ok(None),
            }
        }
        ExprPattern::Fma => {
            let Expr::Binary {
                op: BinOp::Add,
                left,
                right,
                ..
            } = expr
            else {
                return Ok(None);
            };
            let Expr::Binary {
                op: BinOp::Mul,
                left: mul_left,
                right: mul_right,
                ..
            } = &**left
            else {
                return Ok(None);
            };
            let (Some(an), Some(bn), Some(cn)) = (
                column_name(mul_left),
                column_name(mul_right),
                column_name(right),
            ) else {
                return Ok(None);
            };
            let a = resolve(env, an)?;
            let b = resolve(env, bn)?;
            let c = resolve(env, cn)?;
            if a.data_type() != b.data_type() || a.data_type() != c.data_type() {
                return Ok(None);
            }
            match lookup_fma(a.data_type()) {
                Some(kernel) => kernel(a, b, c).map(Some),
                None => Ok(None),
            }
        }
        ExprPattern::NestedBinary => {
            let Expr::Binary {
                op: outer,
                left,
                right,
                ..
            } = expr
            else {
                return Ok(None);
            };
            let (a_expr, inner_expr, a_on_left) = if column_name(left).is_some() {
                (&**left, &**right, true)
            } else {
                (&**right, &**left, false)
            };
            let Expr::Binary {
                op: inner,
                left: b_expr,
                right: c_expr,
                ..
            } = inner_expr
            else {
                return Ok(None);
            };
            if !arithmetic_fusible(*outer) || !arithmetic_fusible(*inner) {
                return Ok(None);
            }
            let (Some(an), Some(bn), Some(cn)) = (
                column_name(a_expr),
                column_name(b_expr),
                column_name(c_expr),
            ) else {
                return Ok(None);
            };
            let a = resolve(env, an)?;
            let b = resolve(env, bn)?;
            let c = resolve(env, cn)?;
            if a.data_type() != b.data_type() || a.data_type() != c.data_type() {
                return Ok(None);
            }
            match (a, b, c) {
                (AnyColumn::I32(a), AnyColumn::I32(b), AnyColumn::I32(c)) => Ok(Some(
                    AnyColumn::I32(nested(a, b, c, *outer, *inner, a_on_left)?),
                )),
                (AnyColumn::F32(a), AnyColumn::F32(b), AnyColumn::F32(c)) => Ok(Some(
                    AnyColumn::F32(nested(a, b, c, *outer, *inner, a_on_left)?),
                )),
                (AnyColumn::Bf16(a), AnyColumn::Bf16(b), AnyColumn::Bf16(c)) => Ok(Some(
                    AnyColumn::Bf16(nested(a, b, c, *outer, *inner, a_on_left)?),
                )),
                _ => Ok(None),
            }
        }
        _ => Ok(None),
    }
}
