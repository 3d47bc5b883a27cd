//! Seeded random column generation for stress tests and benchmarks.

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use super::bf16::Bf16;
use super::Column;
use crate::error::Result;

/// Random i32 column in `[low, high)`, all present
pub fn random_i32_column(len: usize, low: i32, high: i32, seed: u64) -> Result<Column<i32>> {
    let mut rng = StdRng::seed_from_u64(seed);
    let data: Vec<i32> = (0..len).map(|_| rng.random_range(low..high)).collect();
    Column::from_slice(&data)
}

/// Random f32 column in `[0, scale)`, all present
pub fn random_f32_column(len: usize, scale: f32, seed: u64) -> Result<Column<f32>> {
    let mut rng = StdRng::seed_from_u64(seed);
    let data: Vec<f32> = (0..len).map(|_| rng.random::<f32>() * scale).collect();
    Column::from_slice(&data)
}

/// Random bf16 column in `[0, scale)`, all present
pub fn random_bf16_column(len: usize, scale: f32, seed: u64) -> Result<Column<Bf16>> {
    let mut rng = StdRng::seed_from_u64(seed);
    let data: Vec<Bf16> = (0..len)
        .map(|_| Bf16::from_f32(rng.random::<f32>() * scale))
        .collect();
    Column::from_slice(&data)
}

/// Random i32 column where each lane is absent with probability
/// `null_ratio`
pub fn random_nullable_i32_column(
    len: usize,
    low: i32,
    high: i32,
    null_ratio: f64,
    seed: u64,
) -> Result<Column<i32>> {
    let mut rng = StdRng::seed_from_u64(seed);
    let data: Vec<Option<i32>> = (0..len)
        .map(|_| {
            if rng.random::<f64>() < null_ratio {
                None
            } else {
                Some(rng.random_range(low..high))
            }
        })
        .collect();
    Column::from_optional(&data)
}
