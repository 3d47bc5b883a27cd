//! Buddy allocator over a single power-of-two arena.
//!
//! Levels are numbered 0 (the whole arena) through L, where the level-L
//! block size equals [`MIN_BLOCK_SIZE`]. Allocations round up to the next
//! power of two (clamped at `MIN_BLOCK_SIZE`), so every block is aligned to
//! the cache line and a SIMD register load of the final lane group of a
//! column never reads past its allocation.

use std::alloc::{self, Layout};
use std::ptr::NonNull;

use crate::bitmap::PresenceBitmap;

/// Cache-line size; the smallest block the arena hands out
pub const MIN_BLOCK_SIZE: usize = 64;

fn next_pow2(x: usize) -> usize {
    if x <= 1 { 1 } else { x.next_power_of_two() }
}

fn log2_pow2(x: usize) -> usize {
    debug_assert!(x.is_power_of_two());
    x.trailing_zeros() as usize
}

pub struct BuddyAllocator {
    pool: NonNull<u8>,
    pool_size: usize,
    num_levels: usize,
    /// One bit per tree node, laid out level by level: level L starts at
    /// offset 2^L - 1
    allocation_map: PresenceBitmap,
    /// Per-level free block indices
    free_lists: Vec<Vec<usize>>,
}

// The raw pool pointer is only reachable through the owning allocator,
// which callers already serialize behind a lock.
unsafe impl Send for BuddyAllocator {}

impl BuddyAllocator {
    /// Create an arena of `pool_size` bytes; the size must be a power of
    /// two no smaller than [`MIN_BLOCK_SIZE`]
    pub fn new(pool_size: usize) -> Option<BuddyAllocator> {
        if pool_size < MIN_BLOCK_SIZE || !pool_size.is_power_of_two() {
            return None;
        }
        let num_levels = log2_pow2(pool_size / MIN_BLOCK_SIZE) + 1;

        // Zeroed so recycled blocks never expose uninitialized memory
        let layout = Layout::from_size_align(pool_size, MIN_BLOCK_SIZE).ok()?;
        let pool = NonNull::new(unsafe { alloc::alloc_zeroed(layout) })?;

        let total_nodes = (1usize << num_levels) - 1;
        let mut free_lists = vec![Vec::new(); num_levels];
        free_lists[0].push(0);

        Some(BuddyAllocator {
            pool,
            pool_size,
            num_levels,
            allocation_map: PresenceBitmap::with_len(total_nodes, false),
            free_lists,
        })
    }

    pub fn pool_size(&self) -> usize {
        self.pool_size
    }

    /// Block size served at `level`
    fn level_block_size(&self, level: usize) -> usize {
        self.pool_size >> level
    }

    /// Level whose block size is the rounded-up fit for `size`
    fn size_to_level(&self, size: usize) -> usize {
        let rounded = next_pow2(size).max(MIN_BLOCK_SIZE);
        log2_pow2(self.pool_size / rounded)
    }

    fn node_index(level: usize, index: usize) -> usize {
        ((1usize << level) - 1) + index
    }

    fn buddy_of(index: usize) -> usize {
        index ^ 1
    }

    fn block_ptr(&self, level: usize, index: usize) -> NonNull<u8> {
        let offset = index * self.level_block_size(level);
        debug_assert!(offset < self.pool_size);
        unsafe { NonNull::new_unchecked(self.pool.as_ptr().add(offset)) }
    }

    /// Recover (level, index) from a block pointer. Each allocation sits at
    /// the smallest level whose block size suffices, so the correct level
    /// is the deepest one whose allocated bit at the computed index is set.
    fn ptr_to_block(&self, ptr: NonNull<u8>) -> Option<(usize, usize)> {
        let base = self.pool.as_ptr() as usize;
        let addr = ptr.as_ptr() as usize;
        if addr < base || addr >= base + self.pool_size {
            return None;
        }
        let offset = addr - base;
        for level in (0..self.num_levels).rev() {
            let index = offset / self.level_block_size(level);
            if self.allocation_map.test_unchecked(Self::node_index(level, index)) {
                return Some((level, index));
            }
        }
        None
    }

    /// Mark a block split and push both children onto the next level's
    /// free list
    fn split_block(&mut self, level: usize, index: usize) {
        debug_assert!(level + 1 < self.num_levels);
        self.allocation_map.set(Self::node_index(level, index), true);
        self.free_lists[level + 1].push(index * 2);
        self.free_lists[level + 1].push(index * 2 + 1);
    }

    /// Coalesce a freed block with its buddy, recursively up the tree
    fn merge_block(&mut self, level: usize, index: usize) {
        if level == 0 {
            return;
        }
        let buddy = Self::buddy_of(index);
        if self.allocation_map.test_unchecked(Self::node_index(level, buddy)) {
            return;
        }

        let free_list = &mut self.free_lists[level];
        free_list.retain(|&i| i != index && i != buddy);
        self.allocation_map.set(Self::node_index(level, index), false);
        self.allocation_map.set(Self::node_index(level, buddy), false);

        let parent_level = level - 1;
        let parent_index = index / 2;
        self.free_lists[parent_level].push(parent_index);
        self.allocation_map
            .set(Self::node_index(parent_level, parent_index), false);

        self.merge_block(parent_level, parent_index);
    }

    /// Allocate a block of at least `size` bytes, rounded up to a power of
    /// two and aligned to [`MIN_BLOCK_SIZE`]. `None` when the arena cannot
    /// satisfy the request.
    pub fn allocate(&mut self, size: usize) -> Option<NonNull<u8>> {
        if size == 0 || size > self.pool_size {
            return None;
        }
        let target_level = self.size_to_level(size);

        // Smallest free block whose size suffices
        let mut level = target_level;
        loop {
            if !self.free_lists[level].is_empty() {
                break;
            }
            if level == 0 {
                return None;
            }
            level -= 1;
        }

        // Split down to the target level
        while level < target_level {
            let index = self.free_lists[level].pop()?;
            self.split_block(level, index);
            level += 1;
        }

        let index = self.free_lists[target_level].pop()?;
        self.allocation_map
            .set(Self::node_index(target_level, index), true);
        Some(self.block_ptr(target_level, index))
    }

    /// Return a previously allocated block; coalesces with its buddy when
    /// the buddy is free
    pub fn deallocate(&mut self, ptr: NonNull<u8>) {
        let Some((level, index)) = self.ptr_to_block(ptr) else {
            debug_assert!(false, "deallocate of a pointer the arena does not own");
            return;
        };
        self.allocation_map.set(Self::node_index(level, index), false);
        self.free_lists[level].push(index);
        self.merge_block(level, index);
    }

    /// The usable size of the block that would back a request of `size`
    /// bytes
    pub fn block_capacity(&self, size: usize) -> usize {
        next_pow2(size).max(MIN_BLOCK_SIZE)
    }

    /// True when every block has been returned and the tree is back to its
    /// initial state
    pub fn is_pristine(&self) -> bool {
        self.allocation_map.none()
            && self.free_lists[0] == [0]
            && self.free_lists[1..].iter().all(|l| l.is_empty())
    }
}

impl Drop for BuddyAllocator {
    fn drop(&mut self) {
        // Layout was validated in new()
        if let Ok(layout) = Layout::from_size_align(self.pool_size, MIN_BLOCK_SIZE) {
            unsafe { alloc::dealloc(self.pool.as_ptr(), layout) };
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rejects_bad_pool_sizes() {
        assert!(BuddyAllocator::new(32).is_none());
        assert!(BuddyAllocator::new(100).is_none());
        assert!(BuddyAllocator::new(128).is_some());
    }

    #[test]
    fn test_allocate_aligned_to_min_block() {
        let mut arena = BuddyAllocator::new(4096).unwrap();
        for size in [1usize, 63, 64, 65, 100, 1000] {
            let ptr = arena.allocate(size).unwrap();
            assert_eq!(ptr.as_ptr() as usize % MIN_BLOCK_SIZE, 0);
            arena.deallocate(ptr);
        }
    }

    #[test]
    fn test_rounds_up_to_power_of_two() {
        let arena = BuddyAllocator::new(4096).unwrap();
        assert_eq!(arena.block_capacity(1), 64);
        assert_eq!(arena.block_capacity(64), 64);
        assert_eq!(arena.block_capacity(65), 128);
        assert_eq!(arena.block_capacity(100), 128);
        assert_eq!(arena.block_capacity(4000), 4096);
    }

    #[test]
    fn test_exhaustion_returns_none() {
        let mut arena = BuddyAllocator::new(256).unwrap();
        let a = arena.allocate(128).unwrap();
        let b = arena.allocate(128).unwrap();
        assert!(arena.allocate(64).is_none());
        arena.deallocate(a);
        arena.deallocate(b);
        assert!(arena.allocate(256).is_some());
    }

    #[test]
    fn test_oversized_request_returns_none() {
        let mut arena = BuddyAllocator::new(256).unwrap();
        assert!(arena.allocate(512).is_none());
        assert!(arena.allocate(0).is_none());
    }

    #[test]
    fn test_release_all_restores_initial_state() {
        let mut arena = BuddyAllocator::new(1024).unwrap();
        assert!(arena.is_pristine());

        let mut blocks = Vec::new();
        for size in [64usize, 64, 128, 256, 64, 128] {
            blocks.push(arena.allocate(size).unwrap());
        }
        assert!(!arena.is_pristine());

        // Release in a scrambled order to exercise merging
        for i in [3usize, 0, 5, 2, 4, 1] {
            arena.deallocate(blocks[i]);
        }
        assert!(arena.is_pristine());
    }

    #[test]
    fn test_buddies_coalesce() {
        let mut arena = BuddyAllocator::new(256).unwrap();
        let a = arena.allocate(64).unwrap();
        let b = arena.allocate(64).unwrap();
        let c = arena.allocate(64).unwrap();
        let d = arena.allocate(64).unwrap();
        arena.deallocate(a);
        arena.deallocate(b);
        arena.deallocate(c);
        arena.deallocate(d);
        // The whole arena is a single free block again
        assert!(arena.allocate(256).is_some());
    }

    #[test]
    fn test_distinct_blocks_do_not_overlap() {
        let mut arena = BuddyAllocator::new(1024).unwrap();
        let a = arena.allocate(64).unwrap();
        let b = arena.allocate(64).unwrap();
        let diff = (a.as_ptr() as isize - b.as_ptr() as isize).unsigned_abs();
        assert!(diff >= 64);
        arena.deallocate(a);
        arena.deallocate(b);
    }
}
