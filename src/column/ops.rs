//! Elementwise kernels over lane groups.
//!
//! Every kernel follows the pipeline contract of the element domain: load a
//! full lane group, widen, operate, narrow, store. Output length is the
//! minimum of the input lengths; output presence is the AND of the input
//! presences. Absent lanes have the operation's identity blended in before
//! the op, so no lane can trap regardless of the unspecified values it
//! holds.

use super::domain::{ComputeScalar, ElementDomain, blend_identity, map2};
use super::{AnyColumn, Column};
use crate::bitmap::PresenceBitmap;
use crate::error::{EngineError, Result};
use crate::types::BinOp;

const GROUP: usize = 8;

/// Lanewise arithmetic application in the compute domain
#[inline]
fn apply_arith<C: ComputeScalar>(op: BinOp, a: [C; 8], b: [C; 8]) -> Result<[C; 8]> {
    Ok(match op {
        BinOp::Add => map2(a, b, C::add),
        BinOp::Sub => map2(a, b, C::sub),
        BinOp::Mul => map2(a, b, C::mul),
        BinOp::Div => map2(a, b, C::div),
        BinOp::Mod => map2(a, b, C::rem),
        BinOp::Min => map2(a, b, C::min_of),
        BinOp::Max => map2(a, b, C::max_of),
        other => {
            return Err(EngineError::Internal(format!(
                "operator {} is not an arithmetic kernel",
                other
            )));
        }
    })
}

/// Identity blended into absent lanes so the op cannot trap or poison a
/// present lane
#[inline]
fn blend_value<C: ComputeScalar>(op: BinOp) -> C {
    match op {
        BinOp::Mul | BinOp::Div | BinOp::Mod => C::MUL_IDENTITY,
        BinOp::Min => C::MIN_IDENTITY,
        BinOp::Max => C::MAX_IDENTITY,
        _ => C::ADD_IDENTITY,
    }
}

fn integer_domain<T: ElementDomain>() -> bool {
    T::DATA_TYPE.is_integral()
}

/// Reject evaluation when a present output lane divides by zero
fn check_divisors<T: ElementDomain>(
    divisor: &Column<T>,
    presence: &PresenceBitmap,
) -> Result<()> {
    for i in 0..presence.len() {
        if presence.test_unchecked(i)
            && T::widen(divisor.value_unchecked(i)) == <T::Compute>::ADD_IDENTITY
        {
            return Err(EngineError::DivisionByZero);
        }
    }
    Ok(())
}

/// Non-destructive elementwise arithmetic: `out[i] = a[i] op b[i]`
pub(crate) fn binary_elementwise<T: ElementDomain>(
    a: &Column<T>,
    b: &Column<T>,
    op: BinOp,
) -> Result<Column<T>> {
    let n = a.len().min(b.len());
    let presence = PresenceBitmap::and_truncated(a.presence(), b.presence(), n);

    if integer_domain::<T>() && matches!(op, BinOp::Div | BinOp::Mod) {
        check_divisors(b, &presence)?;
    }

    let mut out: Column<T> = Column::with_len(n)?;
    let blend = blend_value::<T::Compute>(op);
    let guard = matches!(op, BinOp::Div | BinOp::Mod) && integer_domain::<T>();

    let mut i = 0;
    while i < n {
        let mask = presence.group8(i);
        unsafe {
            let ga = T::load_group(a.as_ptr().add(i));
            let mut gb = T::load_group(b.as_ptr().add(i));
            if guard {
                // Absent-lane garbage may still be zero; force it to the
                // identity so the division is defined everywhere
                gb = blend_identity(gb, mask, blend);
                gb = gb.map(|v| {
                    if v == <T::Compute>::ADD_IDENTITY {
                        <T::Compute>::MUL_IDENTITY
                    } else {
                        v
                    }
                });
            }
            let gr = apply_arith(op, ga, gb)?;
            T::store_group(out.as_mut_ptr().add(i), gr);
        }
        i += GROUP;
    }
    *out.presence_mut() = presence;
    Ok(out)
}

/// Destructive variant reusing the left operand's buffer
pub(crate) fn binary_elementwise_in_place<T: ElementDomain>(
    a: &mut Column<T>,
    b: &Column<T>,
    op: BinOp,
) -> Result<()> {
    let n = a.len().min(b.len());
    a.truncate(n);
    let presence = PresenceBitmap::and_truncated(a.presence(), b.presence(), n);

    if integer_domain::<T>() && matches!(op, BinOp::Div | BinOp::Mod) {
        check_divisors(b, &presence)?;
    }

    let blend = blend_value::<T::Compute>(op);
    let guard = matches!(op, BinOp::Div | BinOp::Mod) && integer_domain::<T>();
    let mut i = 0;
    while i < n {
        let mask = presence.group8(i);
        unsafe {
            let ga = T::load_group(a.as_ptr().add(i));
            let mut gb = T::load_group(b.as_ptr().add(i));
            if guard {
                gb = blend_identity(gb, mask, blend);
                gb = gb.map(|v| {
                    if v == <T::Compute>::ADD_IDENTITY {
                        <T::Compute>::MUL_IDENTITY
                    } else {
                        v
                    }
                });
            }
            let gr = apply_arith(op, ga, gb)?;
            T::store_group(a.as_mut_ptr().add(i), gr);
        }
        i += GROUP;
    }
    *a.presence_mut() = presence;
    Ok(())
}

/// Column-scalar arithmetic with the scalar broadcast across lanes
pub(crate) fn binary_scalar<T: ElementDomain>(
    col: &Column<T>,
    scalar: T::Compute,
    op: BinOp,
    scalar_on_left: bool,
) -> Result<Column<T>> {
    let n = col.len();

    if integer_domain::<T>() && matches!(op, BinOp::Div | BinOp::Mod) {
        if !scalar_on_left {
            // Constant divisor: a single zero poisons every present lane
            if scalar == <T::Compute>::ADD_IDENTITY && col.presence().any() {
                return Err(EngineError::DivisionByZero);
            }
        } else {
            check_divisors(col, col.presence())?;
        }
    }

    let mut out: Column<T> = Column::with_len(n)?;
    let splat = [scalar; 8];
    let blend = blend_value::<T::Compute>(op);
    let guard =
        matches!(op, BinOp::Div | BinOp::Mod) && integer_domain::<T>() && scalar_on_left;

    let mut i = 0;
    while i < n {
        unsafe {
            let gc = T::load_group(col.as_ptr().add(i));
            let gr = if scalar_on_left {
                let mut gb = gc;
                if guard {
                    let mask = col.presence().group8(i);
                    gb = blend_identity(gb, mask, blend);
                    gb = gb.map(|v| {
                        if v == <T::Compute>::ADD_IDENTITY {
                            <T::Compute>::MUL_IDENTITY
                        } else {
                            v
                        }
                    });
                }
                apply_arith(op, splat, gb)?
            } else {
                apply_arith(op, gc, splat)?
            };
            T::store_group(out.as_mut_ptr().add(i), gr);
        }
        i += GROUP;
    }
    *out.presence_mut() = col.presence().clone();
    Ok(out)
}

/// Lanewise bitwise op in the integer domain; shift amounts are masked to
/// the lane width
#[inline]
fn apply_bitwise(op: BinOp, a: [i32; 8], b: [i32; 8]) -> Result<[i32; 8]> {
    Ok(match op {
        BinOp::BitAnd => map2(a, b, |x, y| x & y),
        BinOp::BitOr => map2(a, b, |x, y| x | y),
        BinOp::BitXor => map2(a, b, |x, y| x ^ y),
        BinOp::Shl => map2(a, b, |x, y| x.wrapping_shl(y as u32)),
        BinOp::Shr => map2(a, b, |x, y| x.wrapping_shr(y as u32)),
        other => {
            return Err(EngineError::Internal(format!(
                "operator {} is not a bitwise kernel",
                other
            )));
        }
    })
}

pub(crate) fn binary_bitwise(
    a: &Column<i32>,
    b: &Column<i32>,
    op: BinOp,
) -> Result<Column<i32>> {
    let n = a.len().min(b.len());
    let presence = PresenceBitmap::and_truncated(a.presence(), b.presence(), n);
    let mut out: Column<i32> = Column::with_len(n)?;
    let mut i = 0;
    while i < n {
        unsafe {
            let ga = <i32 as ElementDomain>::load_group(a.as_ptr().add(i));
            let gb = <i32 as ElementDomain>::load_group(b.as_ptr().add(i));
            let gr = apply_bitwise(op, ga, gb)?;
            <i32 as ElementDomain>::store_group(out.as_mut_ptr().add(i), gr);
        }
        i += GROUP;
    }
    *out.presence_mut() = presence;
    Ok(out)
}

pub(crate) fn bitwise_scalar(
    col: &Column<i32>,
    scalar: i32,
    op: BinOp,
    scalar_on_left: bool,
) -> Result<Column<i32>> {
    let n = col.len();
    let mut out: Column<i32> = Column::with_len(n)?;
    let splat = [scalar; 8];
    let mut i = 0;
    while i < n {
        unsafe {
            let gc = <i32 as ElementDomain>::load_group(col.as_ptr().add(i));
            let gr = if scalar_on_left {
                apply_bitwise(op, splat, gc)?
            } else {
                apply_bitwise(op, gc, splat)?
            };
            <i32 as ElementDomain>::store_group(out.as_mut_ptr().add(i), gr);
        }
        i += GROUP;
    }
    *out.presence_mut() = col.presence().clone();
    Ok(out)
}

#[inline]
fn compare_lane<C: ComputeScalar>(op: BinOp, a: C, b: C) -> i32 {
    let hit = match op {
        BinOp::Eq => a == b,
        BinOp::Ne => a != b,
        BinOp::Lt => a < b,
        BinOp::Le => a <= b,
        BinOp::Gt => a > b,
        BinOp::Ge => a >= b,
        _ => false,
    };
    hit as i32
}

/// Comparison producing an i32 column of 0/1
pub(crate) fn binary_compare<T: ElementDomain>(
    a: &Column<T>,
    b: &Column<T>,
    op: BinOp,
) -> Result<Column<i32>> {
    let n = a.len().min(b.len());
    let presence = PresenceBitmap::and_truncated(a.presence(), b.presence(), n);
    let mut out: Column<i32> = Column::with_len(n)?;
    let mut i = 0;
    while i < n {
        unsafe {
            let ga = T::load_group(a.as_ptr().add(i));
            let gb = T::load_group(b.as_ptr().add(i));
            let gr: [i32; 8] = std::array::from_fn(|l| compare_lane(op, ga[l], gb[l]));
            <i32 as ElementDomain>::store_group(out.as_mut_ptr().add(i), gr);
        }
        i += GROUP;
    }
    *out.presence_mut() = presence;
    Ok(out)
}

pub(crate) fn compare_scalar<T: ElementDomain>(
    col: &Column<T>,
    scalar: T::Compute,
    op: BinOp,
    scalar_on_left: bool,
) -> Result<Column<i32>> {
    let n = col.len();
    let mut out: Column<i32> = Column::with_len(n)?;
    let mut i = 0;
    while i < n {
        unsafe {
            let gc = T::load_group(col.as_ptr().add(i));
            let gr: [i32; 8] = std::array::from_fn(|l| {
                if scalar_on_left {
                    compare_lane(op, scalar, gc[l])
                } else {
                    compare_lane(op, gc[l], scalar)
                }
            });
            <i32 as ElementDomain>::store_group(out.as_mut_ptr().add(i), gr);
        }
        i += GROUP;
    }
    *out.presence_mut() = col.presence().clone();
    Ok(out)
}

/// Logical and/or over lane truth values, producing 0/1
pub(crate) fn binary_logical<T: ElementDomain>(
    a: &Column<T>,
    b: &Column<T>,
    op: BinOp,
) -> Result<Column<i32>> {
    let n = a.len().min(b.len());
    let presence = PresenceBitmap::and_truncated(a.presence(), b.presence(), n);
    let mut out: Column<i32> = Column::with_len(n)?;
    let mut i = 0;
    while i < n {
        unsafe {
            let ga = T::load_group(a.as_ptr().add(i));
            let gb = T::load_group(b.as_ptr().add(i));
            let gr: [i32; 8] = std::array::from_fn(|l| {
                let (ta, tb) = (ga[l].is_truthy(), gb[l].is_truthy());
                let hit = match op {
                    BinOp::LogAnd => ta && tb,
                    BinOp::LogOr => ta || tb,
                    _ => false,
                };
                hit as i32
            });
            <i32 as ElementDomain>::store_group(out.as_mut_ptr().add(i), gr);
        }
        i += GROUP;
    }
    *out.presence_mut() = presence;
    Ok(out)
}

/// Bitwise complement of an i32 column
pub(crate) fn unary_bitnot(col: &Column<i32>) -> Result<Column<i32>> {
    let n = col.len();
    let mut out: Column<i32> = Column::with_len(n)?;
    let mut i = 0;
    while i < n {
        unsafe {
            let gc = <i32 as ElementDomain>::load_group(col.as_ptr().add(i));
            <i32 as ElementDomain>::store_group(out.as_mut_ptr().add(i), gc.map(|v| !v));
        }
        i += GROUP;
    }
    *out.presence_mut() = col.presence().clone();
    Ok(out)
}

/// Logical negation of lane truth values, producing 0/1
pub(crate) fn unary_lognot<T: ElementDomain>(col: &Column<T>) -> Result<Column<i32>> {
    let n = col.len();
    let mut out: Column<i32> = Column::with_len(n)?;
    let mut i = 0;
    while i < n {
        unsafe {
            let gc = T::load_group(col.as_ptr().add(i));
            let gr: [i32; 8] = std::array::from_fn(|l| (!gc[l].is_truthy()) as i32);
            <i32 as ElementDomain>::store_group(out.as_mut_ptr().add(i), gr);
        }
        i += GROUP;
    }
    *out.presence_mut() = col.presence().clone();
    Ok(out)
}

/// Fused `a * b + c` over three columns
pub(crate) fn fused_multiply_add<T: ElementDomain>(
    a: &Column<T>,
    b: &Column<T>,
    c: &Column<T>,
) -> Result<Column<T>> {
    let n = a.len().min(b.len()).min(c.len());
    let mut presence = PresenceBitmap::and_truncated(a.presence(), b.presence(), n);
    presence &= c.presence();
    let mut out: Column<T> = Column::with_len(n)?;
    let mut i = 0;
    while i < n {
        unsafe {
            let ga = T::load_group(a.as_ptr().add(i));
            let gb = T::load_group(b.as_ptr().add(i));
            let gc = T::load_group(c.as_ptr().add(i));
            let gr = map2(map2(ga, gb, <T::Compute>::mul), gc, <T::Compute>::add);
            T::store_group(out.as_mut_ptr().add(i), gr);
        }
        i += GROUP;
    }
    *out.presence_mut() = presence;
    Ok(out)
}

/// Fused two-op kernel for nested binaries; `inner` combines `b` and `c`,
/// `outer` combines `a` with that, on the side given by `a_on_left`
pub(crate) fn fused_nested<T: ElementDomain>(
    a: &Column<T>,
    b: &Column<T>,
    c: &Column<T>,
    outer: BinOp,
    inner: BinOp,
    a_on_left: bool,
) -> Result<Column<T>> {
    let n = a.len().min(b.len()).min(c.len());
    let mut presence = PresenceBitmap::and_truncated(a.presence(), b.presence(), n);
    presence &= c.presence();

    // Division feeding a fused kernel keeps the unfused error semantics
    if integer_domain::<T>() && matches!(inner, BinOp::Div | BinOp::Mod) {
        check_divisors(c, &presence)?;
    }

    let mut out: Column<T> = Column::with_len(n)?;
    let inner_blend = blend_value::<T::Compute>(inner);
    let guard_inner = integer_domain::<T>() && matches!(inner, BinOp::Div | BinOp::Mod);
    let guard_outer = integer_domain::<T>() && matches!(outer, BinOp::Div | BinOp::Mod);

    // Force a group's zero divisor lanes to the identity; a zero in a
    // present lane is the evaluation error
    let sanitize = |group: [T::Compute; 8], mask: u8| -> Result<[T::Compute; 8]> {
        for lane in 0..GROUP {
            if mask & (1 << lane) != 0 && group[lane] == <T::Compute>::ADD_IDENTITY {
                return Err(EngineError::DivisionByZero);
            }
        }
        Ok(group.map(|v| {
            if v == <T::Compute>::ADD_IDENTITY {
                <T::Compute>::MUL_IDENTITY
            } else {
                v
            }
        }))
    };

    let mut i = 0;
    while i < n {
        let mask = presence.group8(i);
        unsafe {
            let mut ga = T::load_group(a.as_ptr().add(i));
            let gb = T::load_group(b.as_ptr().add(i));
            let mut gc = T::load_group(c.as_ptr().add(i));
            if guard_inner {
                gc = blend_identity(gc, mask, inner_blend);
                gc = sanitize(gc, mask)?;
            }
            let mut gi = apply_arith(inner, gb, gc)?;
            if guard_outer {
                if a_on_left {
                    gi = sanitize(gi, mask)?;
                } else {
                    ga = sanitize(ga, mask)?;
                }
            }
            let gr = if a_on_left {
                apply_arith(outer, ga, gi)?
            } else {
                apply_arith(outer, gi, ga)?
            };
            T::store_group(out.as_mut_ptr().add(i), gr);
        }
        i += GROUP;
    }
    *out.presence_mut() = presence;
    Ok(out)
}

impl<T: ElementDomain> Column<T> {
    pub fn try_add(&self, other: &Column<T>) -> Result<Column<T>> {
        binary_elementwise(self, other, BinOp::Add)
    }

    pub fn try_sub(&self, other: &Column<T>) -> Result<Column<T>> {
        binary_elementwise(self, other, BinOp::Sub)
    }

    pub fn try_mul(&self, other: &Column<T>) -> Result<Column<T>> {
        binary_elementwise(self, other, BinOp::Mul)
    }

    pub fn try_div(&self, other: &Column<T>) -> Result<Column<T>> {
        binary_elementwise(self, other, BinOp::Div)
    }

    pub fn try_rem(&self, other: &Column<T>) -> Result<Column<T>> {
        binary_elementwise(self, other, BinOp::Mod)
    }

    pub fn try_min(&self, other: &Column<T>) -> Result<Column<T>> {
        binary_elementwise(self, other, BinOp::Min)
    }

    pub fn try_max(&self, other: &Column<T>) -> Result<Column<T>> {
        binary_elementwise(self, other, BinOp::Max)
    }

    /// Destructive add reusing this column's buffer
    pub fn add_in_place(&mut self, other: &Column<T>) -> Result<()> {
        binary_elementwise_in_place(self, other, BinOp::Add)
    }

    pub fn compare(&self, other: &Column<T>, op: BinOp) -> Result<Column<i32>> {
        if !op.is_comparison() {
            return Err(EngineError::Internal(format!(
                "{} is not a comparison operator",
                op
            )));
        }
        binary_compare(self, other, op)
    }
}

impl Column<i32> {
    pub fn try_bitand(&self, other: &Column<i32>) -> Result<Column<i32>> {
        binary_bitwise(self, other, BinOp::BitAnd)
    }

    pub fn try_bitor(&self, other: &Column<i32>) -> Result<Column<i32>> {
        binary_bitwise(self, other, BinOp::BitOr)
    }

    pub fn try_bitxor(&self, other: &Column<i32>) -> Result<Column<i32>> {
        binary_bitwise(self, other, BinOp::BitXor)
    }

    pub fn try_shl(&self, other: &Column<i32>) -> Result<Column<i32>> {
        binary_bitwise(self, other, BinOp::Shl)
    }

    pub fn try_shr(&self, other: &Column<i32>) -> Result<Column<i32>> {
        binary_bitwise(self, other, BinOp::Shr)
    }

    pub fn try_bitnot(&self) -> Result<Column<i32>> {
        unary_bitnot(self)
    }
}

impl AnyColumn {
    /// Comparison between same-typed columns, producing an i32 0/1 column
    pub fn compare(&self, other: &AnyColumn, op: BinOp) -> Result<Column<i32>> {
        match (self, other) {
            (AnyColumn::I32(a), AnyColumn::I32(b)) => binary_compare(a, b, op),
            (AnyColumn::F32(a), AnyColumn::F32(b)) => binary_compare(a, b, op),
            (AnyColumn::Bf16(a), AnyColumn::Bf16(b)) => binary_compare(a, b, op),
            (a, b) => Err(EngineError::TypeMismatch {
                expected: a.data_type(),
                found: b.data_type(),
            }),
        }
    }

    /// Logical and/or between same-typed columns
    pub fn logical(&self, other: &AnyColumn, op: BinOp) -> Result<Column<i32>> {
        match (self, other) {
            (AnyColumn::I32(a), AnyColumn::I32(b)) => binary_logical(a, b, op),
            (AnyColumn::F32(a), AnyColumn::F32(b)) => binary_logical(a, b, op),
            (AnyColumn::Bf16(a), AnyColumn::Bf16(b)) => binary_logical(a, b, op),
            (a, b) => Err(EngineError::TypeMismatch {
                expected: a.data_type(),
                found: b.data_type(),
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::column::Bf16;

    #[test]
    fn test_add_i32() {
        let a = Column::from_slice(&[1i32, 2, 3, 4, 5, 6, 7, 8]).unwrap();
        let b = Column::from_slice(&[10i32, 20, 30, 40, 50, 60, 70, 80]).unwrap();
        let c = a.try_add(&b).unwrap();
        assert_eq!(
            c.iter().map(|v| v.unwrap()).collect::<Vec<_>>(),
            vec![11, 22, 33, 44, 55, 66, 77, 88]
        );
        assert!(c.presence().all());
    }

    #[test]
    fn test_tail_not_multiple_of_group() {
        let a = Column::from_slice(&(0..11).collect::<Vec<i32>>()).unwrap();
        let b = Column::with_fill(11, 2i32).unwrap();
        let c = a.try_mul(&b).unwrap();
        assert_eq!(c.len(), 11);
        for i in 0..11 {
            assert_eq!(c.get(i), Some(i as i32 * 2));
        }
    }

    #[test]
    fn test_mismatched_lengths_truncate() {
        let a = Column::from_slice(&[1i32, 2, 3, 4, 5]).unwrap();
        let b = Column::from_slice(&[1i32, 1, 1]).unwrap();
        let c = a.try_add(&b).unwrap();
        assert_eq!(c.len(), 3);
    }

    #[test]
    fn test_presence_intersection() {
        let a = Column::from_optional(&[Some(1i32), None, Some(3)]).unwrap();
        let b = Column::from_optional(&[None, Some(2i32), Some(3)]).unwrap();
        let c = a.try_add(&b).unwrap();
        assert_eq!(c.get(0), None);
        assert_eq!(c.get(1), None);
        assert_eq!(c.get(2), Some(6));
        assert_eq!(c.presence().count(), 1);
    }

    #[test]
    fn test_int_division_by_zero_present_lane() {
        let a = Column::from_slice(&[10i32, 20]).unwrap();
        let b = Column::from_slice(&[2i32, 0]).unwrap();
        assert_eq!(a.try_div(&b).unwrap_err(), EngineError::DivisionByZero);
        assert_eq!(a.try_rem(&b).unwrap_err(), EngineError::DivisionByZero);
    }

    #[test]
    fn test_int_division_by_zero_absent_lane_is_fine() {
        let a = Column::from_slice(&[10i32, 20]).unwrap();
        let b = Column::from_optional(&[Some(2i32), None]).unwrap();
        // The zero sits in an absent lane's unspecified storage
        let c = a.try_div(&b).unwrap();
        assert_eq!(c.get(0), Some(5));
        assert_eq!(c.get(1), None);
    }

    #[test]
    fn test_float_division_follows_ieee() {
        let a = Column::from_slice(&[1.0f32, 0.0, -1.0]).unwrap();
        let b = Column::from_slice(&[0.0f32, 0.0, 0.0]).unwrap();
        let c = a.try_div(&b).unwrap();
        assert_eq!(c.get(0), Some(f32::INFINITY));
        assert!(c.get(1).unwrap().is_nan());
        assert_eq!(c.get(2), Some(f32::NEG_INFINITY));
    }

    #[test]
    fn test_bitwise_and_shifts() {
        let a = Column::from_slice(&[0b1100i32, 0b1010, 1]).unwrap();
        let b = Column::from_slice(&[0b1010i32, 0b0110, 10]).unwrap();
        assert_eq!(a.try_bitand(&b).unwrap().get(0), Some(0b1000));
        assert_eq!(a.try_bitor(&b).unwrap().get(1), Some(0b1110));
        assert_eq!(a.try_bitxor(&b).unwrap().get(0), Some(0b0110));
        assert_eq!(a.try_shl(&b).unwrap().get(2), Some(1024));
        let neg = Column::from_slice(&[-8i32]).unwrap();
        let one = Column::from_slice(&[1i32]).unwrap();
        // Signed shift right is arithmetic
        assert_eq!(neg.try_shr(&one).unwrap().get(0), Some(-4));
    }

    #[test]
    fn test_compare_yields_zero_one() {
        let a = Column::from_slice(&[1.0f32, 2.0, 3.0]).unwrap();
        let b = Column::from_slice(&[2.0f32, 2.0, 2.0]).unwrap();
        let lt = a.compare(&b, BinOp::Lt).unwrap();
        assert_eq!(
            lt.iter().map(|v| v.unwrap()).collect::<Vec<_>>(),
            vec![1, 0, 0]
        );
        let ge = a.compare(&b, BinOp::Ge).unwrap();
        assert_eq!(
            ge.iter().map(|v| v.unwrap()).collect::<Vec<_>>(),
            vec![0, 1, 1]
        );
    }

    #[test]
    fn test_min_max() {
        let a = Column::from_slice(&[1i32, 9, -4]).unwrap();
        let b = Column::from_slice(&[3i32, 2, -8]).unwrap();
        let mn = a.try_min(&b).unwrap();
        let mx = a.try_max(&b).unwrap();
        assert_eq!(
            mn.iter().map(|v| v.unwrap()).collect::<Vec<_>>(),
            vec![1, 2, -8]
        );
        assert_eq!(
            mx.iter().map(|v| v.unwrap()).collect::<Vec<_>>(),
            vec![3, 9, -4]
        );
    }

    #[test]
    fn test_bf16_add() {
        let a = Column::from_slice(&[Bf16::from_f32(1.5), Bf16::from_f32(2.5)]).unwrap();
        let b = Column::from_slice(&[Bf16::from_f32(0.5), Bf16::from_f32(0.5)]).unwrap();
        let c = a.try_add(&b).unwrap();
        assert_eq!(c.get(0).unwrap().to_f32(), 2.0);
        assert_eq!(c.get(1).unwrap().to_f32(), 3.0);
    }

    #[test]
    fn test_fused_multiply_add() {
        let a = Column::from_slice(&[1.0f32, 2.0, 3.0]).unwrap();
        let b = Column::from_slice(&[4.0f32, 5.0, 6.0]).unwrap();
        let c = Column::from_slice(&[0.5f32, 0.5, 0.5]).unwrap();
        let r = fused_multiply_add(&a, &b, &c).unwrap();
        assert_eq!(
            r.iter().map(|v| v.unwrap()).collect::<Vec<_>>(),
            vec![4.5, 10.5, 18.5]
        );
    }

    #[test]
    fn test_fused_nested() {
        // a + (b * c)
        let a = Column::from_slice(&[1i32, 2]).unwrap();
        let b = Column::from_slice(&[3i32, 4]).unwrap();
        let c = Column::from_slice(&[5i32, 6]).unwrap();
        let r = fused_nested(&a, &b, &c, BinOp::Add, BinOp::Mul, true).unwrap();
        assert_eq!(r.get(0), Some(16));
        assert_eq!(r.get(1), Some(26));
    }

    #[test]
    fn test_in_place_add() {
        let mut a = Column::from_slice(&[1i32, 2, 3]).unwrap();
        let b = Column::from_slice(&[10i32, 10]).unwrap();
        a.add_in_place(&b).unwrap();
        assert_eq!(a.len(), 2);
        assert_eq!(a.get(0), Some(11));
        assert_eq!(a.get(1), Some(12));
    }

    #[test]
    fn test_scalar_broadcast() {
        let a = Column::from_slice(&[1i32, 2, 3]).unwrap();
        let r = binary_scalar(&a, 10, BinOp::Mul, false).unwrap();
        assert_eq!(
            r.iter().map(|v| v.unwrap()).collect::<Vec<_>>(),
            vec![10, 20, 30]
        );
        let r = binary_scalar(&a, 10, BinOp::Sub, true).unwrap();
        assert_eq!(
            r.iter().map(|v| v.unwrap()).collect::<Vec<_>>(),
            vec![9, 8, 7]
        );
    }

    #[test]
    fn test_scalar_zero_divisor_errors() {
        let a = Column::from_slice(&[1i32, 2]).unwrap();
        assert_eq!(
            binary_scalar(&a, 0, BinOp::Div, false).unwrap_err(),
            EngineError::DivisionByZero
        );
    }

    #[test]
    fn test_logical_ops() {
        let a = Column::from_slice(&[0i32, 1, 1, 0]).unwrap();
        let b = Column::from_slice(&[0i32, 0, 1, 1]).unwrap();
        let and = binary_logical(&a, &b, BinOp::LogAnd).unwrap();
        assert_eq!(
            and.iter().map(|v| v.unwrap()).collect::<Vec<_>>(),
            vec![0, 0, 1, 0]
        );
        let or = binary_logical(&a, &b, BinOp::LogOr).unwrap();
        assert_eq!(
            or.iter().map(|v| v.unwrap()).collect::<Vec<_>>(),
            vec![0, 1, 1, 1]
        );
    }
}
