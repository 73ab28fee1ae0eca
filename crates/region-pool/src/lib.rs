//! Pool allocators over caller-supplied memory regions.
//!
//! Both pools impose their structure directly on a region the caller hands
//! them: every piece of bookkeeping that is not a handful of counters lives
//! in-band, in headers written into the region itself. Neither pool ever
//! obtains memory from anywhere else, so the crate is `no_std` and usable
//! before any global allocator exists.
//!
//! # Available Pools
//!
//! ## [`SlabPool`](slab::SlabPool)
//!
//! Carves the region into equally sized slots and hands them out one at a
//! time. Best suited for:
//!
//! - Many objects of one size
//! - Code paths that need constant-time allocation and release
//!
//! **Performance**: O(1) allocation and release.
//!
//! ## [`ArenaPool`](arena::ArenaPool)
//!
//! Serves requests of any size from a chain of boundary-tagged blocks,
//! splitting on allocation and merging adjacent free blocks. Best suited for:
//!
//! - Variable-sized allocations
//! - Callers that can trade release cost for less fragmentation
//!
//! **Performance**: O(n) allocation where n is the number of blocks; release
//! is O(1) unordered or O(n) ordered.
//!
//! # Usage Examples
//!
//! ```rust
//! use region_pool::{ArenaPool, SlabPool};
//!
//! let mut slab_heap = vec![0_usize; 64];
//! let mut arena_heap = vec![0_usize; 64];
//!
//! let mut slab = SlabPool::new();
//! let mut arena = ArenaPool::new();
//! unsafe {
//!     let range = slab_heap.as_mut_ptr_range();
//!     slab.init(16, range.start.cast(), range.end.cast()).unwrap();
//!     let range = arena_heap.as_mut_ptr_range();
//!     arena.init(8, range.start.cast(), range.end.cast()).unwrap();
//! }
//!
//! let slot = slab.allocate().unwrap();
//! let block = arena.allocate_size(100).unwrap();
//! assert_eq!(arena.size_of(block.as_ptr()), 104);
//!
//! unsafe {
//!     slab.release(slot.as_ptr());
//!     arena.ordered_release(block.as_ptr());
//! }
//! assert_eq!(slab.available(), slab.capacity());
//! assert_eq!(arena.available(), arena.capacity());
//! ```
//!
//! # Design Considerations
//!
//! ## Error Handling
//!
//! Every operation comes in two forms. The `try_*` form returns a
//! [`PoolError`]. The plain form refuses the request instead (returning
//! `None`, `0` or doing nothing), logs it through the [`log`] facade, and
//! passes the error to an optional [`DiagnosticHook`]. A pointer that this
//! pool did not hand out is never written through.
//!
//! ## Memory Safety
//!
//! Initialization and release are `unsafe`. Callers must ensure:
//!
//! - The region is valid, exclusive to the pool, and outlives it
//! - Memory is not used after it is released
//!
//! ## Thread Safety
//!
//! The pools are `Send` but not `Sync`. They can be moved between threads
//! but require external synchronization (e.g., mutexes) for concurrent access.
//!
//! ## Performance Characteristics
//!
//! | Pool | Allocation | Release | Overhead | Best Use Case |
//! |------|------------|---------|----------|---------------|
//! | `SlabPool` | O(1) | O(1) | 1 word/slot | One object size |
//! | `ArenaPool` | O(n) | O(1) / O(n)* | 2 words/block | Variable sizes |
//!
//! *Unordered / ordered release

#![cfg_attr(not(test), no_std)]
#![cfg_attr(coverage_nightly, feature(coverage_attribute))]

pub mod arena;
pub mod error;
pub mod region;
pub mod slab;

pub use self::{
    arena::{ArenaConfig, ArenaPool, ArenaStats},
    error::{DiagnosticHook, PoolError},
    region::{PoolId, Region, RegionOrigin},
    slab::SlabPool,
};
