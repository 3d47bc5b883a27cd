//! Tier 2: runtime code generation for elementwise kernels.

pub mod cache;
pub mod codebuf;
pub mod compiler;
pub mod emitter;

pub use cache::KernelCache;

use crate::bitmap::PresenceBitmap;
use crate::column::{AnyColumn, Bf16, Column};
use crate::error::{EngineError, Result};
use crate::expr::ast::Expr;
use crate::types::DataType;

use super::Env;
use compiler::{column_base_ptr, prepare, storage_of};

/// Compile (or fetch from cache) and run a kernel for `expr`.
///
/// `NotSupported` and `CodegenError` mean the tree cannot run here and the
/// dispatcher should fall back to a lower tier.
pub fn execute(expr: &Expr, env: &Env, cache: &mut KernelCache) -> Result<AnyColumn> {
    let prepared = prepare(expr, &|name| {
        env.get(name)
            .map(storage_of)
            .ok_or_else(|| {
                EngineError::Internal(format!("column '{}' vanished from the environment", name))
            })
    })?;

    let kernel = cache.get_or_compile(&prepared)?;

    let mut inputs = Vec::with_capacity(kernel.leaves.len());
    let mut n = usize::MAX;
    let mut presence: Option<PresenceBitmap> = None;
    for leaf in &kernel.leaves {
        let col = env.get(&leaf.name).ok_or_else(|| {
            EngineError::Internal(format!("column '{}' vanished from the environment", leaf.name))
        })?;
        n = n.min(col.len());
        inputs.push(column_base_ptr(col));
    }
    for leaf in &kernel.leaves {
        let col = &env[&leaf.name];
        presence = Some(match presence {
            None => PresenceBitmap::and_truncated(col.presence(), col.presence(), n),
            Some(mut acc) => {
                acc &= col.presence();
                acc
            }
        });
    }
    let presence = presence.ok_or_else(|| {
        EngineError::NotSupported("jit: expression references no columns".to_string())
    })?;

    match kernel.out_ty {
        DataType::I32 => {
            let mut out = Column::<i32>::with_len(n)?;
            unsafe { kernel.call(&inputs, out.as_mut_ptr() as *mut u8, n) };
            *out.presence_mut() = presence;
            Ok(AnyColumn::I32(out))
        }
        DataType::F32 => {
            let mut out = Column::<f32>::with_len(n)?;
            unsafe { kernel.call(&inputs, out.as_mut_ptr() as *mut u8, n) };
            *out.presence_mut() = presence;
            Ok(AnyColumn::F32(out))
        }
        DataType::Bf16 => {
            let mut out = Column::<Bf16>::with_len(n)?;
            unsafe { kernel.call(&inputs, out.as_mut_ptr() as *mut u8, n) };
            *out.presence_mut() = presence;
            Ok(AnyColumn::Bf16(out))
        }
        other => Err(EngineError::Internal(format!(
            "non-physical kernel output {}",
            other
        ))),
    }
}

#[cfg(all(test, unix, target_arch = "x86_64"))]
mod tests {
    use super::*;
    use crate::expr::infer::infer;
    use crate::expr::optimizer::optimize;
    use crate::expr::parser::parse;
    use std::collections::HashMap;

    fn env() -> Env {
        let mut e = Env::new();
        e.insert(
            "a".to_string(),
            AnyColumn::I32(Column::from_slice(&(0..20).collect::<Vec<i32>>()).unwrap()),
        );
        e.insert(
            "b".to_string(),
            AnyColumn::I32(
                Column::from_slice(&(0..20).map(|i| 100 - i).collect::<Vec<i32>>()).unwrap(),
            ),
        );
        e
    }

    fn eval(src: &str, env: &Env, cache: &mut KernelCache) -> Result<AnyColumn> {
        let types: HashMap<String, DataType> = env
            .iter()
            .map(|(k, v)| (k.clone(), v.data_type()))
            .collect();
        let mut e = parse(src, &types).unwrap();
        infer(&mut e).unwrap();
        optimize(&mut e);
        infer(&mut e).unwrap();
        execute(&e, env, cache)
    }

    #[test]
    fn test_jit_end_to_end() {
        if !crate::column::simd::avx2_available() {
            return;
        }
        let env = env();
        let mut cache = KernelCache::new();
        let out = eval("a * a + b * a + a", &env, &mut cache).unwrap();
        for i in 0..20i64 {
            let expected = i * i + (100 - i) * i + i;
            assert_eq!(out.get_as_f64(i as usize), Some(expected as f64));
        }
    }

    #[test]
    fn test_cache_hits_on_same_shape() {
        if !crate::column::simd::avx2_available() {
            return;
        }
        let env = env();
        let mut cache = KernelCache::new();
        eval("a + b", &env, &mut cache).unwrap();
        eval("a + b", &env, &mut cache).unwrap();
        assert_eq!(cache.len(), 1);
        assert_eq!(cache.hits(), 1);
        assert_eq!(cache.misses(), 1);
        // A different shape compiles a second kernel
        eval("a - b", &env, &mut cache).unwrap();
        assert_eq!(cache.len(), 2);
    }

    #[test]
    fn test_presence_and_lengths() {
        if !crate::column::simd::avx2_available() {
            return;
        }
        let mut env = env();
        env.insert(
            "p".to_string(),
            AnyColumn::I32(
                Column::from_optional(&[Some(5), None, Some(7)]).unwrap(),
            ),
        );
        let mut cache = KernelCache::new();
        let out = eval("p + a", &env, &mut cache).unwrap();
        assert_eq!(out.len(), 3);
        assert_eq!(out.get_as_f64(0), Some(5.0));
        assert_eq!(out.get_as_f64(1), None);
        assert_eq!(out.get_as_f64(2), Some(9.0));
    }
}
