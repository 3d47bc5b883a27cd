//! AVX2 fast paths for the hot elementwise kernels.
//!
//! The portable lane-group implementations in `ops.rs` are the reference
//! semantics; these intrinsics compute the same lanes eight at a time and
//! are selected at runtime when the host supports AVX2. Buffers come from
//! the region allocator, so full-register loads and stores at the tail stay
//! inside the allocation.

#[cfg(target_arch = "x86_64")]
use std::arch::x86_64::*;

use crate::types::BinOp;

/// Whether the running host can use these kernels
#[inline]
pub fn avx2_available() -> bool {
    #[cfg(target_arch = "x86_64")]
    {
        std::arch::is_x86_feature_detected!("avx2")
    }
    #[cfg(not(target_arch = "x86_64"))]
    {
        false
    }
}

#[inline]
pub fn fma_available() -> bool {
    #[cfg(target_arch = "x86_64")]
    {
        std::arch::is_x86_feature_detected!("avx2") && std::arch::is_x86_feature_detected!("fma")
    }
    #[cfg(not(target_arch = "x86_64"))]
    {
        false
    }
}

/// Vectorized `out[i] = a[i] op b[i]` over i32 lanes.
///
/// Supports Add, Sub, Mul, Min, Max; returns false for anything else so
/// the caller can take the portable path. `n` is rounded up to full
/// registers, which the power-of-two buffers absorb.
///
/// # Safety
/// All three buffers must have capacity for `n` rounded up to a multiple
/// of 8 elements.
#[cfg(target_arch = "x86_64")]
pub unsafe fn binary_i32_avx2(
    op: BinOp,
    a: *const i32,
    b: *const i32,
    out: *mut i32,
    n: usize,
) -> bool {
    if !avx2_available() {
        return false;
    }
    match op {
        BinOp::Add | BinOp::Sub | BinOp::Mul | BinOp::Min | BinOp::Max => {}
        _ => return false,
    }
    unsafe { binary_i32_avx2_inner(op, a, b, out, n) };
    true
}

#[cfg(target_arch = "x86_64")]
#[target_feature(enable = "avx2")]
unsafe fn binary_i32_avx2_inner(op: BinOp, a: *const i32, b: *const i32, out: *mut i32, n: usize) {
    let mut i = 0usize;
    while i < n {
        unsafe {
            let va = _mm256_loadu_si256(a.add(i) as *const __m256i);
            let vb = _mm256_loadu_si256(b.add(i) as *const __m256i);
            let vr = match op {
                BinOp::Add => _mm256_add_epi32(va, vb),
                BinOp::Sub => _mm256_sub_epi32(va, vb),
                BinOp::Mul => _mm256_mullo_epi32(va, vb),
                BinOp::Min => _mm256_min_epi32(va, vb),
                BinOp::Max => _mm256_max_epi32(va, vb),
                _ => unreachable!(),
            };
            _mm256_storeu_si256(out.add(i) as *mut __m256i, vr);
        }
        i += 8;
    }
}

/// Vectorized `out[i] = a[i] op b[i]` over f32 lanes.
///
/// Supports Add, Sub, Mul, Div, Min, Max.
///
/// # Safety
/// Same capacity contract as [`binary_i32_avx2`].
#[cfg(target_arch = "x86_64")]
pub unsafe fn binary_f32_avx2(
    op: BinOp,
    a: *const f32,
    b: *const f32,
    out: *mut f32,
    n: usize,
) -> bool {
    if !avx2_available() {
        return false;
    }
    match op {
        BinOp::Add | BinOp::Sub | BinOp::Mul | BinOp::Div | BinOp::Min | BinOp::Max => {}
        _ => return false,
    }
    unsafe { binary_f32_avx2_inner(op, a, b, out, n) };
    true
}

#[cfg(target_arch = "x86_64")]
#[target_feature(enable = "avx2")]
unsafe fn binary_f32_avx2_inner(op: BinOp, a: *const f32, b: *const f32, out: *mut f32, n: usize) {
    let mut i = 0usize;
    while i < n {
        unsafe {
            let va = _mm256_loadu_ps(a.add(i));
            let vb = _mm256_loadu_ps(b.add(i));
            let vr = match op {
                BinOp::Add => _mm256_add_ps(va, vb),
                BinOp::Sub => _mm256_sub_ps(va, vb),
                BinOp::Mul => _mm256_mul_ps(va, vb),
                BinOp::Div => _mm256_div_ps(va, vb),
                BinOp::Min => _mm256_min_ps(va, vb),
                BinOp::Max => _mm256_max_ps(va, vb),
                _ => unreachable!(),
            };
            _mm256_storeu_ps(out.add(i), vr);
        }
        i += 8;
    }
}

/// Vectorized `out[i] = a[i] * b[i] + c[i]` using a single FMA per group.
///
/// # Safety
/// Same capacity contract as [`binary_i32_avx2`].
#[cfg(target_arch = "x86_64")]
pub unsafe fn fma_f32_avx2(
    a: *const f32,
    b: *const f32,
    c: *const f32,
    out: *mut f32,
    n: usize,
) -> bool {
    if !fma_available() {
        return false;
    }
    unsafe { fma_f32_inner(a, b, c, out, n) };
    true
}

#[cfg(target_arch = "x86_64")]
#[target_feature(enable = "avx2,fma")]
unsafe fn fma_f32_inner(a: *const f32, b: *const f32, c: *const f32, out: *mut f32, n: usize) {
    let mut i = 0usize;
    while i < n {
        unsafe {
            let va = _mm256_loadu_ps(a.add(i));
            let vb = _mm256_loadu_ps(b.add(i));
            let vc = _mm256_loadu_ps(c.add(i));
            _mm256_storeu_ps(out.add(i), _mm256_fmadd_ps(va, vb, vc));
        }
        i += 8;
    }
}

#[cfg(all(test, target_arch = "x86_64"))]
mod tests {
    use super::*;
    use crate::column::Column;

    #[test]
    fn test_avx2_matches_portable_i32() {
        if !avx2_available() {
            return;
        }
        let a = Column::from_slice(&(0..37).collect::<Vec<i32>>()).unwrap();
        let b = Column::from_slice(&(0..37).map(|i| i * 3 - 5).collect::<Vec<i32>>()).unwrap();
        for op in [BinOp::Add, BinOp::Sub, BinOp::Mul, BinOp::Min, BinOp::Max] {
            let portable = crate::column::ops::binary_elementwise(&a, &b, op).unwrap();
            let mut fast = Column::<i32>::with_len(37).unwrap();
            let ok = unsafe {
                binary_i32_avx2(op, a.as_ptr(), b.as_ptr(), fast.as_mut_ptr(), 37)
            };
            assert!(ok);
            assert_eq!(fast.values(), portable.values());
        }
    }

    #[test]
    fn test_avx2_matches_portable_f32() {
        if !avx2_available() {
            return;
        }
        let a = Column::from_slice(&(0..21).map(|i| i as f32 * 0.75).collect::<Vec<f32>>())
            .unwrap();
        let b = Column::from_slice(&(0..21).map(|i| 10.0 - i as f32).collect::<Vec<f32>>())
            .unwrap();
        for op in [BinOp::Add, BinOp::Sub, BinOp::Mul, BinOp::Div, BinOp::Min, BinOp::Max] {
            let portable = crate::column::ops::binary_elementwise(&a, &b, op).unwrap();
            let mut fast = Column::<f32>::with_len(21).unwrap();
            let ok = unsafe {
                binary_f32_avx2(op, a.as_ptr(), b.as_ptr(), fast.as_mut_ptr(), 21)
            };
            assert!(ok);
            assert_eq!(fast.values(), portable.values());
        }
    }

    #[test]
    fn test_fma_kernel() {
        if !fma_available() {
            return;
        }
        let a = Column::from_slice(&[1.0f32, 2.0, 3.0]).unwrap();
        let b = Column::from_slice(&[4.0f32, 5.0, 6.0]).unwrap();
        let c = Column::from_slice(&[0.5f32, 0.5, 0.5]).unwrap();
        let mut out = Column::<f32>::with_len(3).unwrap();
        let ok = unsafe {
            fma_f32_avx2(a.as_ptr(), b.as_ptr(), c.as_ptr(), out.as_mut_ptr(), 3)
        };
        assert!(ok);
        assert_eq!(out.values(), &[4.5, 10.5, 18.5]);
    }
}
