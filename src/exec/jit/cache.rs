//! Kernel cache keyed by normalized tree shape and type tuple.
//!
//! Entries own their executable pages; dropping the cache releases every
//! generated kernel. The cache is per-interpreter, so no cross-actor
//! serialization is needed.

use std::collections::HashMap;
use std::rc::Rc;

use tracing::debug;

use super::compiler::{JitKernel, Prepared, emit};
use crate::error::Result;

#[derive(Default)]
pub struct KernelCache {
    kernels: HashMap<String, Rc<JitKernel>>,
    hits: u64,
    misses: u64,
}

impl KernelCache {
    pub fn new() -> KernelCache {
        KernelCache::default()
    }

    /// Fetch the kernel for a prepared program, generating and caching it
    /// on first sight
    pub fn get_or_compile(&mut self, prepared: &Prepared) -> Result<Rc<JitKernel>> {
        if let Some(kernel) = self.kernels.get(&prepared.key) {
            self.hits += 1;
            debug!(key = %prepared.key, "jit cache hit");
            return Ok(Rc::clone(kernel));
        }
        self.misses += 1;
        debug!(key = %prepared.key, "jit cache miss, generating kernel");
        let kernel = Rc::new(emit(prepared)?);
        self.kernels
            .insert(prepared.key.clone(), Rc::clone(&kernel));
        Ok(kernel)
    }

    pub fn len(&self) -> usize {
        self.kernels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.kernels.is_empty()
    }

    pub fn hits(&self) -> u64 {
        self.hits
    }

    pub fn misses(&self) -> u64 {
        self.misses
    }
}
