//! Aligned region allocation for column storage.

pub mod buddy;
pub mod region;

pub use buddy::{BuddyAllocator, MIN_BLOCK_SIZE};
pub use region::{Region, configure_pool};
