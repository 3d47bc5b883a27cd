//! Property tests for the core invariants.

use proptest::prelude::*;

use colvex::mem::BuddyAllocator;
use colvex::{AnyColumn, BinOp, Column, Interpreter, PresenceBitmap};

fn column_from(values: &[i32], mask: &[bool]) -> Column<i32> {
    let data: Vec<Option<i32>> = values
        .iter()
        .zip(mask.iter())
        .map(|(&v, &p)| if p { Some(v) } else { None })
        .collect();
    Column::from_optional(&data).unwrap()
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    /// count(presence) <= len and presence len == value len
    #[test]
    fn prop_column_presence_invariants(
        values in prop::collection::vec(-1000i32..1000, 0..200),
        seed in any::<u64>(),
    ) {
        let mask: Vec<bool> = values
            .iter()
            .enumerate()
            .map(|(i, _)| (seed >> (i % 64)) & 1 == 1)
            .collect();
        let col = column_from(&values, &mask);
        prop_assert_eq!(col.presence().len(), col.len());
        prop_assert!(col.presence().count() <= col.len());
    }

    /// (a op b).presence == a.presence & b.presence, and present lanes
    /// match the scalar computation
    #[test]
    fn prop_elementwise_presence_and_values(
        a_vals in prop::collection::vec(-1000i32..1000, 1..100),
        b_vals in prop::collection::vec(-1000i32..1000, 1..100),
        a_seed in any::<u64>(),
        b_seed in any::<u64>(),
        op_pick in 0usize..4,
    ) {
        let n = a_vals.len().min(b_vals.len());
        let a_mask: Vec<bool> = (0..a_vals.len()).map(|i| (a_seed >> (i % 64)) & 1 == 1).collect();
        let b_mask: Vec<bool> = (0..b_vals.len()).map(|i| (b_seed >> (i % 64)) & 1 == 1).collect();
        let a = column_from(&a_vals, &a_mask);
        let b = column_from(&b_vals, &b_mask);

        let op = [BinOp::Add, BinOp::Sub, BinOp::Mul, BinOp::Max][op_pick];
        let out = match op {
            BinOp::Add => a.try_add(&b).unwrap(),
            BinOp::Sub => a.try_sub(&b).unwrap(),
            BinOp::Mul => a.try_mul(&b).unwrap(),
            _ => a.try_max(&b).unwrap(),
        };

        prop_assert_eq!(out.len(), n);
        for i in 0..n {
            let expected_present = a.present_unchecked(i) && b.present_unchecked(i);
            prop_assert_eq!(out.present_unchecked(i), expected_present);
            if expected_present {
                let (va, vb) = (a.value_unchecked(i), b.value_unchecked(i));
                let expected = match op {
                    BinOp::Add => va.wrapping_add(vb),
                    BinOp::Sub => va.wrapping_sub(vb),
                    BinOp::Mul => va.wrapping_mul(vb),
                    _ => va.max(vb),
                };
                prop_assert_eq!(out.value_unchecked(i), expected);
            }
        }
    }

    /// Reductions agree with a scalar loop over present lanes, for any
    /// length including ragged tails
    #[test]
    fn prop_reductions_match_scalar_loop(
        values in prop::collection::vec(-100i32..100, 0..150),
        seed in any::<u64>(),
    ) {
        let mask: Vec<bool> = (0..values.len()).map(|i| (seed >> (i % 64)) & 1 == 1).collect();
        let col = column_from(&values, &mask);

        let present: Vec<i32> = values
            .iter()
            .zip(mask.iter())
            .filter(|&(_, &p)| p)
            .map(|(&v, _)| v)
            .collect();

        let sum = col.sum();
        prop_assert_eq!(sum.present, !present.is_empty());
        prop_assert_eq!(sum.value, present.iter().fold(0i32, |acc, &v| acc.wrapping_add(v)));

        let mn = col.min();
        if present.is_empty() {
            prop_assert_eq!(mn.value, i32::MAX);
            prop_assert!(!mn.present);
        } else {
            prop_assert_eq!(mn.value, *present.iter().min().unwrap());
        }

        let mx = col.max();
        if !present.is_empty() {
            prop_assert_eq!(mx.value, *present.iter().max().unwrap());
        }
    }

    /// The buddy allocator returns cache-line-aligned blocks and loses no
    /// memory across arbitrary alloc/free interleavings
    #[test]
    fn prop_buddy_allocator_no_leaks(
        sizes in prop::collection::vec(1usize..2048, 1..40),
        order_seed in any::<u64>(),
    ) {
        let mut arena = BuddyAllocator::new(1 << 20).unwrap();
        let mut blocks = Vec::new();
        for &size in &sizes {
            let ptr = arena.allocate(size).unwrap();
            prop_assert_eq!(ptr.as_ptr() as usize % 64, 0);
            blocks.push(ptr);
        }
        // Free in a seed-scrambled order
        let mut order: Vec<usize> = (0..blocks.len()).collect();
        order.sort_by_key(|&i| order_seed.rotate_left(i as u32) ^ i as u64);
        for i in order {
            arena.deallocate(blocks[i]);
        }
        prop_assert!(arena.is_pristine());
    }

    /// Bitmap in-place AND matches the per-bit model over the common
    /// prefix, with the longer side cleared
    #[test]
    fn prop_bitmap_and_model(
        a_bits in prop::collection::vec(any::<bool>(), 0..300),
        b_bits in prop::collection::vec(any::<bool>(), 0..300),
    ) {
        let mut a = PresenceBitmap::with_len(a_bits.len(), false);
        for (i, &bit) in a_bits.iter().enumerate() {
            a.set(i, bit);
        }
        let mut b = PresenceBitmap::with_len(b_bits.len(), false);
        for (i, &bit) in b_bits.iter().enumerate() {
            b.set(i, bit);
        }
        a &= &b;
        for i in 0..a_bits.len() {
            let expected = a_bits[i] && i < b_bits.len() && b_bits[i];
            prop_assert_eq!(a.test_unchecked(i), expected, "bit {}", i);
        }
        prop_assert_eq!(a.len(), a_bits.len());
    }

    /// Evaluating an expression built from random small integer columns
    /// matches a scalar interpreter
    #[test]
    fn prop_eval_matches_scalar_reference(
        a_vals in prop::collection::vec(-50i32..50, 1..60),
        b_vals in prop::collection::vec(-50i32..50, 1..60),
        c_vals in prop::collection::vec(1i32..50, 1..60),
    ) {
        let n = a_vals.len().min(b_vals.len()).min(c_vals.len());
        let mut interp = Interpreter::new();
        interp.register_i32("a", Column::from_slice(&a_vals).unwrap());
        interp.register_i32("b", Column::from_slice(&b_vals).unwrap());
        interp.register_i32("c", Column::from_slice(&c_vals).unwrap());

        let out = interp.eval("a * b + b * 2 - a + b / c").unwrap();
        prop_assert_eq!(out.len(), n);
        let out = match out {
            AnyColumn::I32(c) => c,
            other => panic!("unexpected result type {:?}", other.data_type()),
        };
        for i in 0..n {
            let (a, b, c) = (a_vals[i], b_vals[i], c_vals[i]);
            let expected = a
                .wrapping_mul(b)
                .wrapping_add(b.wrapping_mul(2))
                .wrapping_sub(a)
                .wrapping_add(b.wrapping_div(c));
            prop_assert_eq!(out.value_unchecked(i), expected, "lane {}", i);
        }
    }
}
