//! Grammar round-trip and optimizer preservation checks at the public
//! interpreter surface.

use colvex::{AnyColumn, Column, Interpreter};

fn interp_with_data() -> Interpreter {
    let mut interp = Interpreter::new();
    interp.register_i32("i", Column::from_slice(&[3, 7, 11, 15, 2, 9]).unwrap());
    interp.register_i32("j", Column::from_slice(&[1, 2, 3, 4, 5, 6]).unwrap());
    interp.register_f32(
        "x",
        Column::from_slice(&[0.25, 1.5, -2.0, 4.75, 3.0, -0.5]).unwrap(),
    );
    interp.register_f32(
        "y",
        Column::from_slice(&[2.0, -1.0, 0.5, 3.25, -4.0, 1.0]).unwrap(),
    );
    interp
}

fn assert_columns_close(a: &AnyColumn, b: &AnyColumn) {
    assert_eq!(a.len(), b.len());
    for i in 0..a.len() {
        match (a.get_as_f64(i), b.get_as_f64(i)) {
            (None, None) => {}
            (Some(va), Some(vb)) => {
                let close = if va.is_nan() {
                    vb.is_nan()
                } else {
                    (va - vb).abs() <= 1e-4 * va.abs().max(vb.abs()).max(1.0)
                };
                assert!(close, "lane {}: {} vs {}", i, va, vb);
            }
            other => panic!("presence mismatch at lane {}: {:?}", i, other),
        }
    }
}

/// eval(parse(pretty_print(ast))) equals eval(ast): the printed form of
/// the optimized tree re-parses to the same result
#[test]
fn test_grammar_round_trip() {
    let mut interp = interp_with_data();
    for src in [
        "i + j",
        "i * j - i",
        "i * 2 + j",
        "x * y + x",
        "i + x",
        "(i + j) * (i - j)",
        "i & j | 3",
        "i << 2 >> 1",
        "i < j && x < y",
        "i > 3 ? i : j",
        "-i + ~j",
        "!(i < j)",
        "f32(i) / y",
        "bf16(x) + bf16(y)",
        "1 + i * 3",
    ] {
        let direct = interp.eval(src).unwrap();
        let printed = interp.explain(src).unwrap().expression;
        let reparsed = interp.eval(&printed).unwrap();
        assert_columns_close(&direct, &reparsed);
    }
}

/// Optimized and unoptimized trees agree up to floating-point
/// associativity; the engine always optimizes, so agreement is checked
/// against hand-computed scalar results
#[test]
fn test_optimizer_preserves_semantics_against_scalar_reference() {
    let mut interp = interp_with_data();
    let i = [3i32, 7, 11, 15, 2, 9];
    let j = [1i32, 2, 3, 4, 5, 6];
    let x = [0.25f64, 1.5, -2.0, 4.75, 3.0, -0.5];

    let cases: Vec<(&str, Box<dyn Fn(usize) -> f64>)> = vec![
        ("i + 0", Box::new(move |k| i[k] as f64)),
        ("i * 1", Box::new(move |k| i[k] as f64)),
        ("i * 2", Box::new(move |k| (i[k] * 2) as f64)),
        ("i * 8", Box::new(move |k| (i[k] * 8) as f64)),
        ("i / 4", Box::new(move |k| (i[k] / 4) as f64)),
        ("i * 0", Box::new(move |_| 0.0)),
        ("i ^ i", Box::new(move |_| 0.0)),
        ("i | 0", Box::new(move |k| i[k] as f64)),
        ("j & j", Box::new(move |k| j[k] as f64)),
        ("x * 2.0", Box::new(move |k| x[k] * 2.0)),
        ("x + 0.5 * 4.0", Box::new(move |k| x[k] + 2.0)),
        ("2 + 3 * 4 + i", Box::new(move |k| 14.0 + i[k] as f64)),
    ];

    for (src, reference) in cases {
        let out = interp.eval(src).unwrap();
        for k in 0..6 {
            let got = out.get_as_f64(k).unwrap();
            let want = reference(k);
            assert!(
                (got - want).abs() <= 1e-4 * want.abs().max(1.0),
                "{} lane {}: {} vs {}",
                src,
                k,
                got,
                want
            );
        }
    }
}

#[test]
fn test_explain_is_stable_across_calls() {
    let interp = {
        let mut it = interp_with_data();
        // Rebind to make sure explain sees current types
        it.register_i32("i", Column::from_slice(&[1, 2, 3]).unwrap());
        it
    };
    let p1 = interp.explain("i * 2 + j").unwrap();
    let p2 = interp.explain("i * 2 + j").unwrap();
    assert_eq!(p1.expression, p2.expression);
    assert_eq!(p1.node_count, p2.node_count);
    assert_eq!(p1.register_pressure, p2.register_pressure);
}

#[test]
fn test_explain_serializes_to_json() {
    let interp = interp_with_data();
    let plan = interp.explain("i + j").unwrap();
    let json = serde_json::to_string(&plan).unwrap();
    assert!(json.contains("\"pattern\""));
    assert!(json.contains("\"speedup_estimate\""));
}
