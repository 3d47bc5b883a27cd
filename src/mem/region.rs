//! RAII handle over a block of the process-wide buddy arena.

use std::ptr::NonNull;

use once_cell::sync::Lazy;
use parking_lot::Mutex;
use tracing::debug;

use super::buddy::{BuddyAllocator, MIN_BLOCK_SIZE};
use crate::error::{EngineError, Result};

/// Default arena size when the pool is not configured explicitly
const DEFAULT_POOL_SIZE: usize = 256 * 1024 * 1024;

struct Arena {
    allocator: Option<BuddyAllocator>,
    configured_size: usize,
}

static ARENA: Lazy<Mutex<Arena>> = Lazy::new(|| {
    Mutex::new(Arena {
        allocator: None,
        configured_size: DEFAULT_POOL_SIZE,
    })
});

/// Set the arena size before any column is allocated. The size must be a
/// power of two no smaller than the cache line; the call fails once the
/// pool exists.
pub fn configure_pool(bytes: usize) -> Result<()> {
    if bytes < MIN_BLOCK_SIZE || !bytes.is_power_of_two() {
        return Err(EngineError::AllocationFailure { requested: bytes });
    }
    let mut arena = ARENA.lock();
    if arena.allocator.is_some() {
        return Err(EngineError::Internal(
            "arena already initialized; configure_pool must run first".to_string(),
        ));
    }
    arena.configured_size = bytes;
    Ok(())
}

/// A cache-line-aligned, power-of-two-sized block owned by the holder.
/// Dropping the region returns the block to the arena.
#[derive(Debug)]
pub struct Region {
    ptr: NonNull<u8>,
    capacity: usize,
}

// Regions hand out raw memory; the arena lock serializes alloc/free.
unsafe impl Send for Region {}

impl Region {
    /// Allocate at least `bytes` from the arena; the backing block is the
    /// next power of two, at least [`MIN_BLOCK_SIZE`]
    pub fn allocate(bytes: usize) -> Result<Region> {
        let request = bytes.max(1);
        let mut arena = ARENA.lock();
        if arena.allocator.is_none() {
            let size = arena.configured_size;
            debug!(pool_bytes = size, "initializing buddy arena");
            arena.allocator = Some(
                BuddyAllocator::new(size)
                    .ok_or(EngineError::AllocationFailure { requested: size })?,
            );
        }
        let allocator = arena.allocator.as_mut().ok_or(EngineError::Internal(
            "arena initialization lost".to_string(),
        ))?;
        let capacity = allocator.block_capacity(request);
        let ptr = allocator
            .allocate(request)
            .ok_or(EngineError::AllocationFailure { requested: request })?;
        Ok(Region { ptr, capacity })
    }

    #[inline]
    pub fn as_ptr(&self) -> *const u8 {
        self.ptr.as_ptr()
    }

    #[inline]
    pub fn as_mut_ptr(&mut self) -> *mut u8 {
        self.ptr.as_ptr()
    }

    /// Usable bytes in the backing block (a power of two >= 64)
    #[inline]
    pub fn capacity(&self) -> usize {
        self.capacity
    }
}

impl Drop for Region {
    fn drop(&mut self) {
        let mut arena = ARENA.lock();
        if let Some(allocator) = arena.allocator.as_mut() {
            allocator.deallocate(self.ptr);
        }
    }
}
