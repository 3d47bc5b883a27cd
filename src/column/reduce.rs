//! Column reductions over lane groups.
//!
//! Each reduction processes a full lane group per iteration and blends the
//! operation's identity into absent and out-of-range lanes, so the answer
//! never depends on unspecified memory. An all-absent column reduces to the
//! identity with `present = false`.

use super::domain::{ComputeScalar, ElementDomain, blend_identity, map2};
use super::Column;

/// Result of a reduction: the folded value and whether any lane
/// participated
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Reduced<C> {
    pub value: C,
    pub present: bool,
}

fn reduce<T: ElementDomain>(
    col: &Column<T>,
    identity: T::Compute,
    op: impl Fn(T::Compute, T::Compute) -> T::Compute + Copy,
) -> Reduced<T::Compute> {
    let n = col.len();
    let mut acc = [identity; 8];
    let mut i = 0;
    while i < n {
        let mask = col.presence().group8(i);
        unsafe {
            let group = T::load_group(col.as_ptr().add(i));
            let blended = blend_identity(group, mask, identity);
            acc = map2(acc, blended, op);
        }
        i += 8;
    }
    let value = acc.into_iter().fold(identity, op);
    Reduced {
        value,
        present: col.presence().any(),
    }
}

impl<T: ElementDomain> Column<T> {
    pub fn sum(&self) -> Reduced<T::Compute> {
        reduce(self, <T::Compute>::ADD_IDENTITY, <T::Compute>::add)
    }

    pub fn product(&self) -> Reduced<T::Compute> {
        reduce(self, <T::Compute>::MUL_IDENTITY, <T::Compute>::mul)
    }

    /// Lane minimum; NaN lanes make the result unspecified
    pub fn min(&self) -> Reduced<T::Compute> {
        reduce(self, <T::Compute>::MIN_IDENTITY, <T::Compute>::min_of)
    }

    pub fn max(&self) -> Reduced<T::Compute> {
        reduce(self, <T::Compute>::MAX_IDENTITY, <T::Compute>::max_of)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::column::Bf16;

    #[test]
    fn test_sum_matches_scalar_loop() {
        for n in [1usize, 7, 8, 9, 16, 17, 100] {
            let data: Vec<i32> = (1..=n as i32).collect();
            let col = Column::from_slice(&data).unwrap();
            let expected: i32 = data.iter().sum();
            let r = col.sum();
            assert!(r.present);
            assert_eq!(r.value, expected, "n = {}", n);
        }
    }

    #[test]
    fn test_product() {
        let col = Column::from_slice(&[1i32, 2, 3, 4]).unwrap();
        assert_eq!(col.product().value, 24);
    }

    #[test]
    fn test_min_max() {
        let col = Column::from_slice(&[5i32, -3, 9, 0, 7, -1, 2, 8, 4]).unwrap();
        assert_eq!(col.min().value, -3);
        assert_eq!(col.max().value, 9);
    }

    #[test]
    fn test_absent_lanes_are_identity() {
        let col =
            Column::from_optional(&[Some(10i32), None, Some(5), None, Some(1)]).unwrap();
        assert_eq!(col.sum().value, 16);
        assert_eq!(col.product().value, 50);
        assert_eq!(col.min().value, 1);
        assert_eq!(col.max().value, 10);
    }

    #[test]
    fn test_all_absent_reduces_to_identity_not_present() {
        let col: Column<i32> = Column::with_len(12).unwrap();
        let s = col.sum();
        assert_eq!(s.value, 0);
        assert!(!s.present);
        let p = col.product();
        assert_eq!(p.value, 1);
        assert!(!p.present);
        let m = col.min();
        assert_eq!(m.value, i32::MAX);
        assert!(!m.present);
    }

    #[test]
    fn test_empty_column() {
        let col: Column<f32> = Column::new();
        let s = col.sum();
        assert_eq!(s.value, 0.0);
        assert!(!s.present);
    }

    #[test]
    fn test_float_sum_over_ragged_tail() {
        let data: Vec<f32> = (0..13).map(|i| i as f32 * 0.5).collect();
        let col = Column::from_slice(&data).unwrap();
        let expected: f32 = data.iter().sum();
        assert!((col.sum().value - expected).abs() < 1e-4);
    }

    #[test]
    fn test_bf16_reduces_in_f32_domain() {
        let col = Column::from_slice(&[
            Bf16::from_f32(1.0),
            Bf16::from_f32(2.0),
            Bf16::from_f32(3.0),
        ])
        .unwrap();
        let r = col.sum();
        assert_eq!(r.value, 6.0f32);
    }
}
