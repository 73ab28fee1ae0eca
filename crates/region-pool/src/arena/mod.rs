//! Variable-size arena pool.
//!
//! An [`ArenaPool`] manages one caller-supplied region as a chain of blocks.
//! Every block starts with a boundary tag linking to the next block, so the
//! chain threads through the *whole* region, free and allocated blocks
//! alike, in strictly increasing address order. A block never stores its
//! size: it is the distance from the end of its header to the next header.
//!
//! # Memory Layout
//!
//! ```text
//! Arena after two allocations:
//! ┌────────┬─────────┬────────┬─────────┬────────┬──────────────┬──────────┐
//! │ header │ payload │ header │ payload │ header │ free payload │ sentinel │
//! │ alloc  │  (32)   │ alloc  │  (16)   │ free   │              │ next = 0 │
//! └───┬────┴─────────┴──▲─┬───┴─────────┴──▲─┬───┴──────────────┴────▲─────┘
//!     └─────────────────┘ └────────────────┘ └───────────────────────┘
//! ```
//!
//! # Algorithm
//!
//! - **Allocation**: first fit, scanning forward from a search cursor. A free
//!   block that is too small is merged with a free successor and examined
//!   again. A block with enough slack is split so the remainder stays free.
//! - **Unordered release**: O(1). Marks the block free and merges it with a
//!   free successor; a free predecessor is left for a later scan or
//!   [`defragment`](ArenaPool::defragment).
//! - **Ordered release**: O(blocks). Locates the block by walking the chain,
//!   which also proves the pointer is genuine, then merges it with both
//!   free neighbors.
//!
//! No free block ever lies before the search cursor, so a forward scan sees
//! every free block.
//!
//! # Usage Example
//!
//! ```rust
//! use region_pool::arena::ArenaPool;
//!
//! let mut heap = vec![0_usize; 32];
//! let range = heap.as_mut_ptr_range();
//! let mut pool = ArenaPool::new();
//! unsafe {
//!     pool.init(8, range.start.cast(), range.end.cast()).unwrap();
//! }
//!
//! let a = pool.allocate_size(32).unwrap();
//! let b = pool.allocate_size(16).unwrap();
//! assert_eq!(pool.size_of(a.as_ptr()), 32);
//!
//! unsafe {
//!     pool.ordered_release(a.as_ptr());
//!     pool.ordered_release(b.as_ptr());
//! }
//! assert_eq!(pool.fragments(), 1);
//! assert_eq!(pool.available(), pool.capacity());
//! ```

use core::ptr::NonNull;

use snafu::{OptionExt as _, ensure};

use self::block::{Header, RawHeader};
pub use self::block::{BlockInfo, BlockStatus, Blocks, HEADER_SIZE};
use crate::{
    error::{
        DiagnosticHook, Diagnostics, ExhaustedCapacitySnafu, ForeignOrCorruptPointerSnafu,
        InvalidConfigurationSnafu, InvalidRequestSnafu, PoolError,
        StructuralInvariantViolationSnafu,
    },
    region::{PoolId, Region, RegionOrigin, WORD_SIZE},
};

mod block;

/// Default smallest payload a split may leave behind.
pub const DEFAULT_MIN_BLOCK: usize = 16;

/// Construction parameters of an [`ArenaPool`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ArenaConfig {
    /// Allocation granularity; also the size of one [`ArenaPool::allocate`]
    /// segment. Clamped to at least one word and rounded to a word multiple.
    pub alignment: usize,
    /// Smallest payload a split may leave free. Rounded up to the alignment.
    pub min_block: usize,
}

impl Default for ArenaConfig {
    fn default() -> Self {
        Self {
            alignment: WORD_SIZE,
            min_block: DEFAULT_MIN_BLOCK,
        }
    }
}

impl ArenaConfig {
    /// Sets the allocation granularity.
    #[must_use]
    pub const fn with_alignment(self, alignment: usize) -> Self {
        Self { alignment, ..self }
    }

    /// Sets the smallest payload a split may leave free.
    #[must_use]
    pub const fn with_min_block(self, min_block: usize) -> Self {
        Self { min_block, ..self }
    }

    fn normalized(self) -> Result<Self, PoolError> {
        let alignment = self
            .alignment
            .max(WORD_SIZE)
            .checked_next_multiple_of(WORD_SIZE)
            .context(InvalidConfigurationSnafu {
                reason: "arena alignment overflows",
            })?;
        let min_block = self
            .min_block
            .max(1)
            .checked_next_multiple_of(alignment)
            .filter(|min_block| min_block.checked_add(HEADER_SIZE).is_some())
            .context(InvalidConfigurationSnafu {
                reason: "minimum block size overflows",
            })?;
        Ok(Self {
            alignment,
            min_block,
        })
    }
}

/// Counters describing the fragmentation of an arena.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ArenaStats {
    /// Free payload bytes right after initialization.
    pub capacity: usize,
    /// Free payload bytes now.
    pub available: usize,
    /// Number of free blocks.
    pub fragments: usize,
    /// Number of blocks handed out.
    pub allocated_blocks: usize,
    /// Payload size of the largest free block.
    pub largest_free: usize,
}

impl ArenaStats {
    /// Share of free bytes that lie outside the largest free block.
    ///
    /// `0.0` means all free memory is one block; values close to `1.0` mean
    /// free memory is scattered over many small blocks.
    #[must_use]
    #[expect(clippy::cast_precision_loss)]
    pub fn fragmentation(&self) -> f64 {
        if self.available == 0 {
            return 0.0;
        }
        1.0 - self.largest_free as f64 / self.available as f64
    }
}

/// A variable-size allocator over a caller-supplied region.
///
/// The pool is inert until [`init`](Self::init) succeeds.
///
/// # Thread Safety
///
/// The pool is `Send` but not `Sync`. Concurrent use requires external
/// synchronization.
#[derive(Debug)]
pub struct ArenaPool {
    region: Option<Region>,
    sentinel: usize,
    search: usize,
    alignment: usize,
    min_block: usize,
    capacity: usize,
    available: usize,
    fragments: usize,
    diagnostics: Diagnostics,
}

unsafe impl Send for ArenaPool {}

impl Default for ArenaPool {
    fn default() -> Self {
        Self::new()
    }
}

impl ArenaPool {
    /// Creates an inert pool with no region.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            region: None,
            sentinel: 0,
            search: 0,
            alignment: 0,
            min_block: 0,
            capacity: 0,
            available: 0,
            fragments: 0,
            diagnostics: Diagnostics::new(),
        }
    }

    /// Creates a pool over `region`.
    pub fn with_region(config: ArenaConfig, region: Region) -> Result<Self, PoolError> {
        let mut pool = Self::new();
        pool.layout(region, config)?;
        Ok(pool)
    }

    /// Lays the pool out over `start..end` as one free block and a sentinel.
    ///
    /// `alignment` is clamped to at least one word. On failure the pool is
    /// left inert.
    ///
    /// # Safety
    ///
    /// The caller must ensure that `start..end` satisfies the contract of
    /// [`Region::from_bounds`].
    pub unsafe fn init(
        &mut self,
        alignment: usize,
        start: *mut u8,
        end: *mut u8,
    ) -> Result<(), PoolError> {
        unsafe {
            self.init_with_config(
                ArenaConfig::default().with_alignment(alignment),
                start,
                end,
            )
        }
    }

    /// Like [`init`](Self::init), with every parameter configurable.
    ///
    /// # Safety
    ///
    /// Same contract as [`init`](Self::init).
    pub unsafe fn init_with_config(
        &mut self,
        config: ArenaConfig,
        start: *mut u8,
        end: *mut u8,
    ) -> Result<(), PoolError> {
        self.clear();
        let region = unsafe { Region::from_bounds(start, end)? };
        self.layout(region, config)
    }

    fn layout(&mut self, region: Region, config: ArenaConfig) -> Result<(), PoolError> {
        let ArenaConfig {
            alignment,
            min_block,
        } = config.normalized()?;
        let smallest = alignment
            .checked_add(2 * HEADER_SIZE)
            .context(InvalidConfigurationSnafu {
                reason: "arena alignment overflows",
            })?;
        ensure!(
            region.len() >= smallest,
            InvalidConfigurationSnafu {
                reason: "region cannot hold one segment and the sentinel",
            }
        );

        let mut region = region;
        let sentinel = region.len() - HEADER_SIZE;
        region.write(0, Header::Free { next: sentinel }.encode());
        region.write(sentinel, Header::Sentinel.encode());

        let capacity = sentinel - HEADER_SIZE;
        log::debug!(
            "{}: arena of {capacity} bytes, alignment {alignment}, min block {min_block}",
            region.id()
        );
        self.region = Some(region);
        self.sentinel = sentinel;
        self.search = 0;
        self.alignment = alignment;
        self.min_block = min_block;
        self.capacity = capacity;
        self.available = capacity;
        self.fragments = 1;
        Ok(())
    }

    fn clear(&mut self) {
        let diagnostics = self.diagnostics;
        *self = Self::new();
        self.diagnostics = diagnostics;
    }

    /// Returns the pool to the inert state and hands back its region.
    ///
    /// The memory itself is untouched; releasing it is the business of
    /// whoever supplied it.
    pub fn destroy(&mut self) -> Option<Region> {
        let region = self.region.take();
        if let Some(region) = &region {
            log::debug!("{}: destroyed ({:?} storage)", region.id(), region.origin());
        }
        self.clear();
        region
    }

    /// Installs (or removes) the callback that observes refused operations.
    pub fn set_diagnostic_hook(&mut self, hook: Option<DiagnosticHook>) {
        self.diagnostics.set_hook(hook);
    }

    fn max_blocks(&self) -> usize {
        self.sentinel / (HEADER_SIZE + self.alignment) + 1
    }

    /// Returns `true` if the bookkeeping is consistent with the region.
    #[must_use]
    pub fn is_valid(&self) -> bool {
        self.region.as_ref().is_some_and(|region| {
            self.sentinel + HEADER_SIZE == region.len()
                && self.capacity + 2 * HEADER_SIZE == region.len()
                && self.search <= self.sentinel
                && self.available <= self.capacity
                && self.fragments < self.max_blocks()
                && (self.fragments == 0) == (self.available == 0)
        })
    }

    fn checked_region(&self) -> Result<Region, PoolError> {
        let region = self.region.as_ref().context(InvalidConfigurationSnafu {
            reason: "pool is not initialized",
        })?;
        ensure!(
            self.is_valid(),
            StructuralInvariantViolationSnafu {
                reason: "arena bookkeeping does not match its region",
            }
        );
        Ok(region.alias())
    }

    /// Reads the header at `offset`, checking that its link moves forward
    /// inside the region.
    fn read_block(&self, region: &Region, offset: usize) -> Result<Header, PoolError> {
        let header = Header::decode(region.read::<RawHeader>(offset));
        match header.next() {
            None => ensure!(
                offset == self.sentinel,
                StructuralInvariantViolationSnafu {
                    reason: "block chain ends before the region does",
                }
            ),
            Some(next) => ensure!(
                offset < self.sentinel && self.is_link(offset, next),
                StructuralInvariantViolationSnafu {
                    reason: "block link does not move forward inside the region",
                }
            ),
        }
        Ok(header)
    }

    fn is_link(&self, offset: usize, next: usize) -> bool {
        next >= offset + HEADER_SIZE && next <= self.sentinel && next.is_multiple_of(WORD_SIZE)
    }

    /// Merges the free block at `offset` with the free block that follows it
    /// and ends at `after`.
    fn merge(&mut self, region: &mut Region, offset: usize, after: usize) {
        region.write(offset, Header::Free { next: after }.encode());
        self.fragments -= 1;
        self.available += HEADER_SIZE;
        log::trace!("{}: merged free blocks at offset {offset}", region.id());
    }

    /// Hands out the free block at `offset`, splitting off the tail when it
    /// can hold a header and a minimum block. Returns the offset of the block
    /// that now follows it.
    fn grant(&mut self, region: &mut Region, offset: usize, next: usize, size: usize) -> usize {
        let owner = region.id();
        let block_size = next - offset - HEADER_SIZE;
        let residual = block_size - size;
        if residual >= HEADER_SIZE + self.min_block {
            let split = offset + HEADER_SIZE + size;
            region.write(split, Header::Free { next }.encode());
            region.write(offset, Header::Allocated { next: split, owner }.encode());
            self.available -= size + HEADER_SIZE;
            log::trace!("{owner}: split block at offset {offset}, {size} + {residual} bytes");
            split
        } else {
            region.write(offset, Header::Allocated { next, owner }.encode());
            self.available -= block_size;
            self.fragments -= 1;
            next
        }
    }

    /// Allocates one segment of [`alignment`](Self::alignment) bytes.
    pub fn try_allocate(&mut self) -> Result<NonNull<u8>, PoolError> {
        self.checked_region()?;
        self.try_allocate_size(self.alignment)
    }

    /// Allocates one segment, or returns `None` if no free block is left.
    pub fn allocate(&mut self) -> Option<NonNull<u8>> {
        self.try_allocate()
            .inspect_err(|err| self.report("allocate", err))
            .ok()
    }

    /// Allocates at least `size` bytes, rounded up to the alignment.
    ///
    /// Free blocks met during the scan that are too small are merged with a
    /// free successor before being skipped.
    pub fn try_allocate_size(&mut self, size: usize) -> Result<NonNull<u8>, PoolError> {
        let mut region = self.checked_region()?;
        ensure!(size > 0, InvalidRequestSnafu { size });
        let size = size
            .checked_next_multiple_of(self.alignment)
            .context(ExhaustedCapacitySnafu { requested: size })?;

        let mut offset = self.search;
        let mut first_free = None;
        let mut budget = 2 * self.max_blocks();
        loop {
            ensure!(
                budget > 0,
                StructuralInvariantViolationSnafu {
                    reason: "block chain is longer than the region allows",
                }
            );
            budget -= 1;

            match self.read_block(&region, offset)? {
                Header::Sentinel => {
                    self.search = first_free.unwrap_or(self.sentinel);
                    return ExhaustedCapacitySnafu { requested: size }.fail();
                }
                Header::Allocated { next, .. } => offset = next,
                Header::Free { next } if next - offset - HEADER_SIZE >= size => {
                    let after = self.grant(&mut region, offset, next, size);
                    self.search = first_free.unwrap_or(after);
                    log::trace!("{}: allocated {size} bytes at offset {offset}", region.id());
                    return Ok(region.ptr_at(offset + HEADER_SIZE));
                }
                Header::Free { next } => match self.read_block(&region, next)? {
                    Header::Free { next: after } => self.merge(&mut region, offset, after),
                    Header::Allocated { next: after, .. } => {
                        first_free.get_or_insert(offset);
                        offset = after;
                    }
                    Header::Sentinel => {
                        first_free.get_or_insert(offset);
                        offset = next;
                    }
                },
            }
        }
    }

    /// Allocates at least `size` bytes, or returns `None` if no free block
    /// is large enough or `size` is zero.
    pub fn allocate_size(&mut self, size: usize) -> Option<NonNull<u8>> {
        self.try_allocate_size(size)
            .inspect_err(|err| self.report("allocate_size", err))
            .ok()
    }

    /// Resolves a caller pointer to the offset of a block this pool handed
    /// out, returning that offset and the block's successor.
    ///
    /// Nothing but the candidate header is read, and only after the pointer
    /// is known to lie inside the region.
    fn locate(&self, region: &Region, ptr: *const u8) -> Result<(usize, usize), PoolError> {
        let foreign = ForeignOrCorruptPointerSnafu { address: ptr.addr() };
        let offset = region
            .offset_of(ptr)
            .and_then(|offset| offset.checked_sub(HEADER_SIZE))
            .filter(|offset| offset.is_multiple_of(WORD_SIZE) && *offset < self.sentinel)
            .context(foreign)?;
        let Header::Allocated { next, owner } = Header::decode(region.read(offset)) else {
            return foreign.fail();
        };
        ensure!(owner == region.id() && self.is_link(offset, next), foreign);
        Ok((offset, next))
    }

    fn check_release_size(block_size: usize, size: Option<usize>) -> Result<(), PoolError> {
        if let Some(size) = size {
            ensure!(
                size > 0 && size <= block_size,
                InvalidRequestSnafu { size }
            );
        }
        Ok(())
    }

    /// Marks the allocated block at `offset` free and merges it with a free
    /// successor.
    fn free_block(&mut self, region: &mut Region, offset: usize, next: usize) -> Result<(), PoolError> {
        let successor = self.read_block(region, next)?;
        region.write(offset, Header::Free { next }.encode());
        self.available += next - offset - HEADER_SIZE;
        self.fragments += 1;
        if let Header::Free { next: after } = successor {
            self.merge(region, offset, after);
        }
        Ok(())
    }

    fn release_unordered(&mut self, ptr: *mut u8, size: Option<usize>) -> Result<(), PoolError> {
        if ptr.is_null() {
            return Ok(());
        }
        let mut region = self.checked_region()?;
        let (offset, next) = self.locate(&region, ptr)?;
        Self::check_release_size(next - offset - HEADER_SIZE, size)?;

        self.free_block(&mut region, offset, next)?;
        self.search = self.search.min(offset);
        log::trace!("{}: released block at offset {offset}", region.id());
        Ok(())
    }

    fn release_ordered(&mut self, ptr: *mut u8, size: Option<usize>) -> Result<(), PoolError> {
        if ptr.is_null() {
            return Ok(());
        }
        let mut region = self.checked_region()?;
        let (target, next) = self.locate(&region, ptr)?;
        Self::check_release_size(next - target - HEADER_SIZE, size)?;

        let mut previous = None;
        let mut offset = 0;
        let mut budget = self.max_blocks();
        while offset < target {
            ensure!(
                budget > 0,
                StructuralInvariantViolationSnafu {
                    reason: "block chain is longer than the region allows",
                }
            );
            budget -= 1;
            let header = self.read_block(&region, offset)?;
            let Some(following) = header.next() else {
                break;
            };
            previous = Some((offset, header));
            offset = following;
        }
        ensure!(
            offset == target,
            ForeignOrCorruptPointerSnafu { address: ptr.addr() }
        );

        self.free_block(&mut region, target, next)?;
        let mut start = target;
        if let Some((previous, Header::Free { .. })) = previous {
            let after = self
                .read_block(&region, target)?
                .next()
                .context(StructuralInvariantViolationSnafu {
                    reason: "released block became the sentinel",
                })?;
            self.merge(&mut region, previous, after);
            start = previous;
        }
        self.search = self.search.min(start);
        log::trace!("{}: released block at offset {target} in order", region.id());
        Ok(())
    }

    /// Releases the block at `ptr` in O(1), without merging it into a free
    /// predecessor.
    ///
    /// A null pointer is accepted and ignored.
    ///
    /// # Safety
    ///
    /// The caller must ensure that:
    ///
    /// - no reference into the block is used after it is released
    /// - if `ptr` points into this pool's region, no live reference covers
    ///   the header in front of it
    pub unsafe fn try_release(&mut self, ptr: *mut u8) -> Result<(), PoolError> {
        self.release_unordered(ptr, None)
    }

    /// Releases the block at `ptr`, reporting refusals to the diagnostic hook.
    ///
    /// # Safety
    ///
    /// Same contract as [`try_release`](Self::try_release).
    pub unsafe fn release(&mut self, ptr: *mut u8) {
        if let Err(err) = self.release_unordered(ptr, None) {
            self.report("release", &err);
        }
    }

    /// Releases the `size`-byte block at `ptr` in O(1).
    ///
    /// `size` must be non-zero and no larger than the block.
    ///
    /// # Safety
    ///
    /// Same contract as [`try_release`](Self::try_release).
    pub unsafe fn try_release_size(&mut self, ptr: *mut u8, size: usize) -> Result<(), PoolError> {
        self.release_unordered(ptr, Some(size))
    }

    /// Releases the `size`-byte block at `ptr`, reporting refusals to the
    /// diagnostic hook.
    ///
    /// # Safety
    ///
    /// Same contract as [`try_release`](Self::try_release).
    pub unsafe fn release_size(&mut self, ptr: *mut u8, size: usize) {
        if let Err(err) = self.release_unordered(ptr, Some(size)) {
            self.report("release_size", &err);
        }
    }

    /// Releases the block at `ptr` and merges it with both free neighbors.
    ///
    /// Costs a walk over the blocks in front of `ptr`; pointers that are not
    /// a block boundary of this pool are refused.
    ///
    /// # Safety
    ///
    /// Same contract as [`try_release`](Self::try_release).
    pub unsafe fn try_ordered_release(&mut self, ptr: *mut u8) -> Result<(), PoolError> {
        self.release_ordered(ptr, None)
    }

    /// Ordered release, reporting refusals to the diagnostic hook.
    ///
    /// # Safety
    ///
    /// Same contract as [`try_release`](Self::try_release).
    pub unsafe fn ordered_release(&mut self, ptr: *mut u8) {
        if let Err(err) = self.release_ordered(ptr, None) {
            self.report("ordered_release", &err);
        }
    }

    /// Ordered release of the `size`-byte block at `ptr`.
    ///
    /// # Safety
    ///
    /// Same contract as [`try_release`](Self::try_release).
    pub unsafe fn try_ordered_release_size(
        &mut self,
        ptr: *mut u8,
        size: usize,
    ) -> Result<(), PoolError> {
        self.release_ordered(ptr, Some(size))
    }

    /// Ordered release of the `size`-byte block at `ptr`, reporting refusals
    /// to the diagnostic hook.
    ///
    /// # Safety
    ///
    /// Same contract as [`try_release`](Self::try_release).
    pub unsafe fn ordered_release_size(&mut self, ptr: *mut u8, size: usize) {
        if let Err(err) = self.release_ordered(ptr, Some(size)) {
            self.report("ordered_release_size", &err);
        }
    }

    /// Merges every run of adjacent free blocks, returning how many merges
    /// took place.
    ///
    /// Never allocates and is idempotent: a second call merges nothing.
    pub fn try_defragment(&mut self) -> Result<usize, PoolError> {
        let mut region = self.checked_region()?;
        let mut offset = 0;
        let mut first_free = None;
        let mut merged = 0;
        let mut budget = 2 * self.max_blocks();
        loop {
            ensure!(
                budget > 0,
                StructuralInvariantViolationSnafu {
                    reason: "block chain is longer than the region allows",
                }
            );
            budget -= 1;

            match self.read_block(&region, offset)? {
                Header::Sentinel => break,
                Header::Allocated { next, .. } => offset = next,
                Header::Free { next } => {
                    first_free.get_or_insert(offset);
                    match self.read_block(&region, next)? {
                        Header::Free { next: after } => {
                            self.merge(&mut region, offset, after);
                            merged += 1;
                        }
                        Header::Allocated { next: after, .. } => offset = after,
                        Header::Sentinel => break,
                    }
                }
            }
        }
        self.search = first_free.unwrap_or(self.sentinel);
        if merged > 0 {
            log::debug!(
                "{}: defragment merged {merged} blocks, {} fragments left",
                region.id(),
                self.fragments
            );
        }
        Ok(merged)
    }

    /// Merges every run of adjacent free blocks, reporting refusals to the
    /// diagnostic hook.
    pub fn defragment(&mut self) {
        if let Err(err) = self.try_defragment() {
            self.report("defragment", &err);
        }
    }

    /// Returns the payload size of the allocated block at `ptr`.
    ///
    /// Free blocks have no size from the caller's point of view, and neither
    /// do pointers this pool never handed out.
    pub fn try_size_of(&self, ptr: *const u8) -> Result<usize, PoolError> {
        let region = self.checked_region()?;
        let (offset, next) = self.locate(&region, ptr)?;
        Ok(next - offset - HEADER_SIZE)
    }

    /// Returns the payload size of the allocated block at `ptr`, or `0` for
    /// null, free or foreign pointers.
    #[must_use]
    pub fn size_of(&self, ptr: *const u8) -> usize {
        if ptr.is_null() {
            return 0;
        }
        self.try_size_of(ptr)
            .inspect_err(|err| self.report("size_of", err))
            .unwrap_or(0)
    }

    fn report(&self, op: &'static str, err: &PoolError) {
        self.diagnostics
            .report(self.region.as_ref().map(Region::id), op, err);
    }

    /// Returns `true` if no free block is reachable from the search cursor.
    ///
    /// This is a hint: a free block smaller than a pending request still
    /// makes the pool non-empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.region.is_none() || self.fragments == 0 || self.search == self.sentinel
    }

    /// Walks the block chain read-only, from the first block to the
    /// sentinel.
    pub fn blocks(&self) -> Blocks<'_> {
        Blocks::new(self.region.as_ref(), self.sentinel, self.max_blocks() + 1)
    }

    /// Collects fragmentation counters, walking the block chain once.
    #[must_use]
    pub fn stats(&self) -> ArenaStats {
        let mut stats = ArenaStats {
            capacity: self.capacity,
            available: self.available,
            fragments: self.fragments,
            ..ArenaStats::default()
        };
        for block in self.blocks() {
            match block.status {
                BlockStatus::Free => stats.largest_free = stats.largest_free.max(block.size),
                BlockStatus::Allocated => stats.allocated_blocks += 1,
                BlockStatus::Sentinel => {}
            }
        }
        stats
    }

    /// Returns the allocation granularity, `0` for an inert pool.
    #[must_use]
    pub const fn alignment(&self) -> usize {
        self.alignment
    }

    /// Returns the free payload bytes right after initialization.
    #[must_use]
    pub const fn capacity(&self) -> usize {
        self.capacity
    }

    /// Returns the free payload bytes.
    #[must_use]
    pub const fn available(&self) -> usize {
        self.available
    }

    /// Returns the number of free blocks.
    #[must_use]
    pub const fn fragments(&self) -> usize {
        self.fragments
    }

    /// Returns the pool identity, or `None` for an inert pool.
    #[must_use]
    pub fn id(&self) -> Option<PoolId> {
        self.region.as_ref().map(Region::id)
    }

    /// Returns who must free the managed region, or `None` for an inert
    /// pool.
    #[must_use]
    pub fn origin(&self) -> Option<RegionOrigin> {
        self.region.as_ref().map(Region::origin)
    }

    /// Returns the managed region, or `None` for an inert pool.
    #[must_use]
    pub const fn region(&self) -> Option<&Region> {
        self.region.as_ref()
    }

    /// Returns `true` if `ptr` lies inside the managed region.
    #[must_use]
    pub fn contains(&self, ptr: *const u8) -> bool {
        self.region.as_ref().is_some_and(|region| region.contains(ptr))
    }
}

#[cfg_attr(coverage_nightly, coverage(off))]
#[cfg(test)]
mod tests {
    use core::{
        alloc::Layout,
        ptr,
        sync::atomic::{AtomicUsize, Ordering},
    };

    use proptest::prelude::*;

    use super::*;

    fn with_test_heap<F>(heap_size: usize, test_fn: F)
    where
        F: FnOnce(*mut u8, *mut u8),
    {
        unsafe {
            let layout = Layout::from_size_align(heap_size, 16).unwrap();
            let heap_start = std::alloc::alloc(layout);
            heap_start.write_bytes(0x11, heap_size);
            test_fn(heap_start, heap_start.add(heap_size));
            std::alloc::dealloc(heap_start, layout);
        }
    }

    fn with_test_arena<F>(heap_size: usize, alignment: usize, test_fn: F)
    where
        F: FnOnce(&mut ArenaPool, *mut u8),
    {
        with_test_heap(heap_size, |start, end| unsafe {
            let mut pool = ArenaPool::new();
            pool.init(alignment, start, end).unwrap();
            test_fn(&mut pool, start);
        });
    }

    fn fill(ptr: NonNull<u8>, len: usize, byte: u8) {
        unsafe {
            ptr.as_ptr().write_bytes(byte, len);
        }
    }

    fn check(ptr: NonNull<u8>, len: usize, byte: u8) {
        for i in 0..len {
            assert_eq!(unsafe { ptr.as_ptr().add(i).read() }, byte);
        }
    }

    fn assert_inert(pool: &ArenaPool) {
        assert!(!pool.is_valid());
        assert!(pool.is_empty());
        assert_eq!(pool.capacity(), 0);
        assert_eq!(pool.fragments(), 0);
        assert!(pool.id().is_none());
        assert_eq!(pool.blocks().count(), 0);
    }

    fn assert_chain_matches_counters(pool: &ArenaPool) {
        let region = pool.region().unwrap();
        let blocks = pool.blocks().collect::<Vec<_>>();
        assert!(blocks.last().unwrap().status.is_sentinel());
        assert_eq!(
            blocks.iter().map(|b| b.size + HEADER_SIZE).sum::<usize>(),
            region.len()
        );
        let free = blocks.iter().filter(|b| b.status.is_free());
        assert_eq!(free.clone().count(), pool.fragments());
        assert_eq!(free.map(|b| b.size).sum::<usize>(), pool.available());
    }

    #[test]
    fn test_init_sets_correct_values() {
        with_test_arena(256, 8, |pool, start| {
            assert!(pool.is_valid());
            assert!(!pool.is_empty());
            assert_eq!(pool.alignment(), 8);
            assert_eq!(pool.capacity(), 256 - 2 * HEADER_SIZE);
            assert_eq!(pool.available(), pool.capacity());
            assert_eq!(pool.fragments(), 1);
            assert_eq!(pool.id().unwrap().get(), start.addr());
            assert!(pool.contains(start));

            let blocks = pool.blocks().collect::<Vec<_>>();
            assert_eq!(blocks.len(), 2);
            assert_eq!(blocks[0].address.as_ptr(), start);
            assert!(blocks[0].status.is_free());
            assert_eq!(blocks[0].size, pool.capacity());
            assert!(blocks[1].status.is_sentinel());
            assert_eq!(blocks[1].next, None);
        });
    }

    #[test]
    fn test_init_rejects_bad_inputs() {
        with_test_heap(256, |start, end| unsafe {
            let mut pool = ArenaPool::new();

            pool.init(8, ptr::null_mut(), end).unwrap_err();
            assert_inert(&pool);

            pool.init(8, end, start).unwrap_err();
            assert_inert(&pool);

            let err = pool
                .init(8, start, start.add(2 * HEADER_SIZE))
                .unwrap_err();
            assert!(err.is_invalid_configuration());
            assert_inert(&pool);

            let err = pool.init(usize::MAX, start, end).unwrap_err();
            assert!(err.is_invalid_configuration());
            assert_inert(&pool);

            pool.init(8, start, start.add(8 + 2 * HEADER_SIZE)).unwrap();
            assert_eq!(pool.capacity(), 8);
        });
    }

    #[test]
    fn test_failed_init_clears_previous_layout() {
        with_test_heap(256, |start, end| unsafe {
            let mut pool = ArenaPool::new();
            pool.init(8, start, end).unwrap();
            pool.init(8, end, start).unwrap_err();
            assert_inert(&pool);
        });
    }

    #[test]
    fn test_alignment_is_clamped_to_words() {
        with_test_arena(256, 0, |pool, _| {
            assert_eq!(pool.alignment(), WORD_SIZE);
        });
        with_test_arena(256, WORD_SIZE + 1, |pool, _| {
            assert_eq!(pool.alignment(), 2 * WORD_SIZE);
            let ptr = pool.allocate_size(1).unwrap();
            assert_eq!(pool.size_of(ptr.as_ptr()), 2 * WORD_SIZE);
        });
    }

    #[test]
    fn test_zero_size_request_is_refused() {
        with_test_arena(256, 8, |pool, _| {
            let err = pool.try_allocate_size(0).unwrap_err();
            assert!(err.is_invalid_request());
            assert!(pool.allocate_size(0).is_none());
            assert_eq!(pool.available(), pool.capacity());
        });
    }

    #[test]
    fn test_allocate_segment() {
        with_test_arena(256, 32, |pool, start| {
            let ptr = pool.allocate().unwrap();
            assert_eq!(ptr.as_ptr(), start.wrapping_add(HEADER_SIZE));
            assert_eq!(pool.size_of(ptr.as_ptr()), 32);
        });
    }

    #[test]
    fn test_allocate_splits_block() {
        with_test_arena(256, 8, |pool, start| {
            let a = pool.allocate_size(32).unwrap();
            assert_eq!(a.as_ptr(), start.wrapping_add(HEADER_SIZE));
            assert_eq!(pool.available(), pool.capacity() - 32 - HEADER_SIZE);
            assert_eq!(pool.fragments(), 1);

            let b = pool.allocate_size(16).unwrap();
            assert_eq!(b.as_ptr(), start.wrapping_add(32 + 2 * HEADER_SIZE));
            assert_eq!(pool.size_of(b.as_ptr()), 16);
            assert_chain_matches_counters(pool);
        });
    }

    #[test]
    fn test_small_residual_is_not_split() {
        with_test_arena(256, 8, |pool, _| {
            let capacity = pool.capacity();
            let ptr = pool.allocate_size(capacity - HEADER_SIZE).unwrap();
            assert_eq!(pool.size_of(ptr.as_ptr()), capacity);
            assert_eq!(pool.available(), 0);
            assert_eq!(pool.fragments(), 0);
            assert!(pool.is_empty());

            let err = pool.try_allocate_size(8).unwrap_err();
            assert!(err.is_exhausted_capacity());
            assert!(pool.allocate().is_none());
            assert_chain_matches_counters(pool);
        });
    }

    #[test]
    fn test_min_block_controls_splitting() {
        with_test_heap(256, |start, end| unsafe {
            let mut pool = ArenaPool::new();
            let config = ArenaConfig::default().with_min_block(64);
            pool.init_with_config(config, start, end).unwrap();
            let capacity = pool.capacity();

            let a = pool.allocate_size(32).unwrap();
            let rest = capacity - 32 - HEADER_SIZE;
            let b = pool.allocate_size(rest - HEADER_SIZE - 8).unwrap();
            assert_eq!(pool.size_of(a.as_ptr()), 32);
            assert_eq!(pool.size_of(b.as_ptr()), rest);
            assert!(pool.is_empty());
        });
    }

    #[test]
    fn test_with_region() {
        with_test_heap(256, |start, _| {
            let region = unsafe { Region::from_raw_parts(start, 256) }.unwrap();
            let pool = ArenaPool::with_region(ArenaConfig::default(), region).unwrap();
            assert_eq!(pool.region().unwrap().start().as_ptr(), start);
            assert_eq!(pool.alignment(), WORD_SIZE);
            assert!(pool.is_valid());
        });
    }

    #[test]
    fn test_region_moves_between_pools() {
        with_test_heap(256, |start, _| {
            let region = unsafe { Region::from_raw_parts(start, 256) }.unwrap();
            let mut first = ArenaPool::with_region(ArenaConfig::default(), region).unwrap();
            let a = first.allocate_size(32).unwrap();
            let region = first.destroy().unwrap();
            assert!(first.allocate_size(32).is_none());

            let mut second = ArenaPool::with_region(ArenaConfig::default(), region).unwrap();
            assert_eq!(second.available(), second.capacity());
            assert_eq!(second.size_of(a.as_ptr()), 0);
            let b = second.allocate_size(32).unwrap();
            assert_eq!(b, a);
            assert_eq!(first.size_of(b.as_ptr()), 0);
            assert_chain_matches_counters(&second);
        });
    }

    #[test]
    fn test_min_block_overflow_is_rejected() {
        with_test_heap(256, |start, end| unsafe {
            let mut pool = ArenaPool::new();
            let config = ArenaConfig::default().with_min_block(usize::MAX - 7);
            let err = pool.init_with_config(config, start, end).unwrap_err();
            assert!(err.is_invalid_configuration());
            assert_inert(&pool);

            let config = ArenaConfig::default().with_min_block(usize::MAX / 2);
            pool.init_with_config(config, start, end).unwrap();
            let ptr = pool.allocate_size(8).unwrap();
            assert_eq!(pool.size_of(ptr.as_ptr()), pool.capacity());
            assert_eq!(pool.fragments(), 0);
        });
    }

    #[test]
    fn test_unordered_release_merges_forward_only() {
        with_test_arena(256, 8, |pool, _| unsafe {
            let a = pool.allocate_size(32).unwrap();
            let b = pool.allocate_size(32).unwrap();

            pool.try_release(a.as_ptr()).unwrap();
            assert_eq!(pool.fragments(), 2);
            pool.try_release(b.as_ptr()).unwrap();
            assert_eq!(pool.fragments(), 2);
            assert_eq!(pool.available(), pool.capacity() - HEADER_SIZE);
            assert_chain_matches_counters(pool);

            assert_eq!(pool.try_defragment().unwrap(), 1);
            assert_eq!(pool.fragments(), 1);
            assert_eq!(pool.available(), pool.capacity());
        });
    }

    #[test]
    fn test_ordered_release_merges_both_neighbors() {
        with_test_arena(256, 8, |pool, _| unsafe {
            let a = pool.allocate_size(32).unwrap();
            let b = pool.allocate_size(32).unwrap();
            let c = pool.allocate_size(32).unwrap();

            pool.try_ordered_release(a.as_ptr()).unwrap();
            pool.try_ordered_release(c.as_ptr()).unwrap();
            assert_eq!(pool.fragments(), 2);
            pool.try_ordered_release(b.as_ptr()).unwrap();
            assert_eq!(pool.fragments(), 1);
            assert_eq!(pool.available(), pool.capacity());
            assert_eq!(pool.try_defragment().unwrap(), 0);
        });
    }

    #[test]
    fn test_partial_release_leaves_two_fragments() {
        with_test_arena(256, 8, |pool, _| unsafe {
            let a = pool.allocate_size(32).unwrap();
            let b = pool.allocate_size(16).unwrap();
            pool.ordered_release_size(a.as_ptr(), 32);
            pool.defragment();
            assert_eq!(pool.fragments(), 2);
            assert_eq!(pool.size_of(b.as_ptr()), 16);

            let statuses = pool.blocks().map(|b| b.status).collect::<Vec<_>>();
            assert_eq!(
                statuses,
                [
                    BlockStatus::Free,
                    BlockStatus::Allocated,
                    BlockStatus::Free,
                    BlockStatus::Sentinel
                ]
            );
        });
    }

    #[test]
    fn test_scan_merges_small_free_blocks() {
        with_test_arena(256, 8, |pool, _| unsafe {
            let a = pool.allocate_size(32).unwrap();
            let b = pool.allocate_size(32).unwrap();
            let _c = pool.allocate_size(32).unwrap();
            let tail = pool.available();
            let _d = pool.allocate_size(tail).unwrap();
            assert_eq!(pool.fragments(), 0);

            pool.release(a.as_ptr());
            pool.release(b.as_ptr());
            assert_eq!(pool.fragments(), 2);

            let merged = pool.allocate_size(64).unwrap();
            assert_eq!(merged, a);
            assert_eq!(pool.size_of(merged.as_ptr()), 64 + HEADER_SIZE);
            assert_eq!(pool.fragments(), 0);
            assert_eq!(pool.available(), 0);
            assert_chain_matches_counters(pool);
        });
    }

    #[test]
    fn test_exhaustion_keeps_small_blocks_reachable() {
        with_test_arena(256, 8, |pool, _| unsafe {
            let a = pool.allocate_size(32).unwrap();
            let rest = pool.available();
            let _b = pool.allocate_size(rest).unwrap();
            pool.release(a.as_ptr());

            let err = pool.try_allocate_size(64).unwrap_err();
            assert!(err.is_exhausted_capacity());
            assert!(!pool.is_empty());

            assert_eq!(pool.allocate_size(32), Some(a));
            assert!(pool.is_empty());
        });
    }

    #[test]
    fn test_release_ignores_null() {
        with_test_arena(256, 8, |pool, _| unsafe {
            pool.try_release(ptr::null_mut()).unwrap();
            pool.try_ordered_release(ptr::null_mut()).unwrap();
            assert_eq!(pool.size_of(ptr::null()), 0);
            assert_eq!(pool.available(), pool.capacity());
        });
    }

    #[test]
    fn test_release_refuses_foreign_pointers() {
        with_test_arena(256, 8, |pool, start| unsafe {
            let a = pool.allocate_size(32).unwrap();
            fill(a, 32, 0x33);
            let available = pool.available();

            let mut local = 0_usize;
            let outside = (&raw mut local).cast::<u8>();
            let inside_block = a.as_ptr().add(8);
            for ptr in [outside, start, inside_block] {
                let err = pool.try_release(ptr).unwrap_err();
                assert!(err.is_foreign_or_corrupt_pointer());
                let err = pool.try_ordered_release(ptr).unwrap_err();
                assert!(err.is_foreign_or_corrupt_pointer());
                assert_eq!(pool.size_of(ptr), 0);
            }
            assert_eq!(pool.available(), available);
            check(a, 32, 0x33);

            pool.try_release(a.as_ptr()).unwrap();
            let err = pool.try_release(a.as_ptr()).unwrap_err();
            assert!(err.is_foreign_or_corrupt_pointer());
            let err = pool.try_ordered_release(a.as_ptr()).unwrap_err();
            assert!(err.is_foreign_or_corrupt_pointer());
            assert_eq!(pool.available(), pool.capacity());
        });
    }

    #[test]
    fn test_release_rejects_other_pool() {
        with_test_arena(256, 8, |first, _| {
            with_test_arena(256, 8, |second, _| unsafe {
                let ptr = first.allocate_size(16).unwrap();
                let err = second.try_release(ptr.as_ptr()).unwrap_err();
                assert!(err.is_foreign_or_corrupt_pointer());
                assert_eq!(second.available(), second.capacity());
                first.try_release(ptr.as_ptr()).unwrap();
            });
        });
    }

    #[test]
    fn test_release_size_must_fit_block() {
        with_test_arena(256, 8, |pool, _| unsafe {
            let a = pool.allocate_size(32).unwrap();
            let err = pool.try_release_size(a.as_ptr(), 0).unwrap_err();
            assert!(err.is_invalid_request());
            let err = pool.try_ordered_release_size(a.as_ptr(), 40).unwrap_err();
            assert!(err.is_invalid_request());
            assert_eq!(pool.size_of(a.as_ptr()), 32);

            pool.try_release_size(a.as_ptr(), 24).unwrap();
            assert_eq!(pool.available(), pool.capacity());
        });
    }

    #[test]
    fn test_size_of_reports_allocated_blocks_only() {
        with_test_arena(256, 8, |pool, _| unsafe {
            let a = pool.allocate_size(20).unwrap();
            assert_eq!(pool.size_of(a.as_ptr()), 24);
            assert_eq!(pool.try_size_of(a.as_ptr()).unwrap(), 24);
            pool.release(a.as_ptr());
            assert_eq!(pool.size_of(a.as_ptr()), 0);
            assert!(
                pool.try_size_of(a.as_ptr())
                    .unwrap_err()
                    .is_foreign_or_corrupt_pointer()
            );
        });
    }

    #[test]
    fn test_defragment_is_idempotent() {
        with_test_arena(512, 8, |pool, _| unsafe {
            let ptrs = [16, 24, 8, 40].map(|size| pool.allocate_size(size).unwrap());
            for ptr in ptrs {
                pool.release(ptr.as_ptr());
            }
            assert_eq!(pool.fragments(), 4);

            assert_eq!(pool.try_defragment().unwrap(), 3);
            assert_eq!(pool.fragments(), 1);
            assert_eq!(pool.available(), pool.capacity());
            assert_eq!(pool.try_defragment().unwrap(), 0);
            assert_chain_matches_counters(pool);
        });
    }

    #[test]
    fn test_stats() {
        with_test_arena(256, 8, |pool, _| unsafe {
            let a = pool.allocate_size(32).unwrap();
            let _b = pool.allocate_size(32).unwrap();
            let tail = pool.available();
            pool.release(a.as_ptr());

            let stats = pool.stats();
            assert_eq!(stats.capacity, pool.capacity());
            assert_eq!(stats.available, tail + 32);
            assert_eq!(stats.fragments, 2);
            assert_eq!(stats.allocated_blocks, 1);
            assert_eq!(stats.largest_free, tail);
            #[expect(clippy::cast_precision_loss)]
            let expected = 32.0 / (tail + 32) as f64;
            assert!((stats.fragmentation() - expected).abs() < 1e-9);
        });
        assert!(ArenaStats::default().fragmentation().abs() < f64::EPSILON);
    }

    #[test]
    fn test_corrupted_chain_is_refused() {
        with_test_arena(256, 8, |pool, start| unsafe {
            let a = pool.allocate_size(32).unwrap();
            start
                .add(32 + HEADER_SIZE)
                .cast::<usize>()
                .write(WORD_SIZE);

            let err = pool.try_allocate_size(8).unwrap_err();
            assert!(err.is_structural_invariant_violation());
            let err = pool.try_defragment().unwrap_err();
            assert!(err.is_structural_invariant_violation());
            let err = pool.try_ordered_release(a.as_ptr()).unwrap_err();
            assert!(err.is_structural_invariant_violation());
            assert_eq!(pool.size_of(a.as_ptr()), 32);
            assert_eq!(pool.blocks().count(), 1);
        });
    }

    #[test]
    fn test_inert_pool_refuses_everything() {
        let mut pool = ArenaPool::default();
        assert_inert(&pool);
        assert!(pool.try_allocate().unwrap_err().is_invalid_configuration());
        assert!(pool.allocate_size(8).is_none());
        assert!(pool.try_defragment().unwrap_err().is_invalid_configuration());
        assert_eq!(pool.stats(), ArenaStats::default());

        let mut local = 0_usize;
        let err = unsafe { pool.try_release((&raw mut local).cast()) }.unwrap_err();
        assert!(err.is_invalid_configuration());
    }

    #[test]
    fn test_destroy_returns_region() {
        with_test_heap(256, |start, end| unsafe {
            let mut pool = ArenaPool::new();
            pool.init(8, start, end).unwrap();
            let _ = pool.allocate_size(8).unwrap();
            let region = pool.destroy().unwrap();
            assert_eq!(region.start().as_ptr(), start);
            assert_eq!(region.len(), 256);
            assert!(region.origin().is_external());
            assert_inert(&pool);
            assert!(pool.destroy().is_none());

            pool.init(8, start, end).unwrap();
            assert_eq!(pool.available(), pool.capacity());
        });
    }

    #[test]
    fn test_destroy_reports_allocated_origin() {
        with_test_heap(256, |start, _| {
            let region = unsafe { Region::from_raw_parts(start, 256) }
                .unwrap()
                .with_origin(RegionOrigin::Allocated);
            let mut pool = ArenaPool::with_region(ArenaConfig::default(), region).unwrap();
            assert_eq!(pool.origin(), Some(RegionOrigin::Allocated));
            let region = pool.destroy().unwrap();
            assert!(region.origin().is_allocated());
            assert_eq!(pool.origin(), None);
        });
    }

    #[test]
    fn test_diagnostic_hook_sees_refusals() {
        static REFUSED: AtomicUsize = AtomicUsize::new(0);

        with_test_arena(256, 8, |pool, _| unsafe {
            let hook: DiagnosticHook = |err| {
                assert!(err.is_foreign_or_corrupt_pointer());
                REFUSED.fetch_add(1, Ordering::Relaxed);
            };
            pool.set_diagnostic_hook(Some(hook));
            let ptr = pool.allocate_size(8).unwrap();
            pool.release(ptr.as_ptr());
            pool.release(ptr.as_ptr());
            pool.ordered_release(ptr.as_ptr());
            assert_eq!(REFUSED.load(Ordering::Relaxed), 2);

            pool.set_diagnostic_hook(None);
            pool.release(ptr.as_ptr());
            assert_eq!(REFUSED.load(Ordering::Relaxed), 2);
        });
    }

    /// Checks that every live payload lies before the sentinel and that no
    /// two of them share a byte.
    fn assert_payloads_disjoint(pool: &ArenaPool, live: &[(NonNull<u8>, usize, usize, u8)]) {
        let region = pool.region().unwrap();
        let lowest = region.start().as_ptr().addr() + HEADER_SIZE;
        let highest = region.end().as_ptr().addr() - HEADER_SIZE;
        let mut ranges = live
            .iter()
            .map(|(ptr, _, granted, _)| (ptr.as_ptr().addr(), ptr.as_ptr().addr() + granted))
            .collect::<Vec<_>>();
        ranges.sort_unstable();
        for (start, end) in &ranges {
            assert!(lowest <= *start && *end <= highest);
        }
        for pair in ranges.windows(2) {
            assert!(pair[0].1 + HEADER_SIZE <= pair[1].0);
        }
    }

    fn run_random_ops(ops: Vec<(Option<prop::sample::Index>, usize, bool)>, always_ordered: bool) {
        with_test_arena(1024, 8, |pool, _| unsafe {
            let capacity = pool.capacity();
            let mut live: Vec<(NonNull<u8>, usize, usize, u8)> = Vec::new();
            for (i, (op, size, ordered)) in ops.into_iter().enumerate() {
                match op {
                    None => {
                        if let Some(ptr) = pool.allocate_size(size) {
                            let granted = pool.size_of(ptr.as_ptr());
                            assert!(granted >= size);
                            #[expect(clippy::cast_possible_truncation)]
                            let byte = i as u8;
                            fill(ptr, size, byte);
                            live.push((ptr, size, granted, byte));
                        } else {
                            for (ptr, _, granted, _) in &live {
                                assert_eq!(pool.size_of(ptr.as_ptr()), *granted);
                            }
                        }
                    }
                    Some(index) if !live.is_empty() => {
                        let (ptr, size, _, byte) = live.swap_remove(index.index(live.len()));
                        check(ptr, size, byte);
                        if always_ordered || ordered {
                            pool.try_ordered_release_size(ptr.as_ptr(), size).unwrap();
                        } else {
                            pool.try_release_size(ptr.as_ptr(), size).unwrap();
                        }
                    }
                    Some(_) => {}
                }
                assert!(pool.is_valid());
                assert_chain_matches_counters(pool);
                assert_payloads_disjoint(pool, &live);
            }
            for (ptr, size, _, byte) in live {
                check(ptr, size, byte);
                if always_ordered {
                    pool.try_ordered_release(ptr.as_ptr()).unwrap();
                } else {
                    pool.try_release(ptr.as_ptr()).unwrap();
                }
            }
            if !always_ordered {
                pool.try_defragment().unwrap();
            }
            assert_eq!(pool.fragments(), 1);
            assert_eq!(pool.available(), capacity);
        });
    }

    proptest! {
        #[test]
        fn arena_ordered_release_restores_one_block(
            ops in proptest::collection::vec((any::<Option<prop::sample::Index>>(), 1..96_usize, any::<bool>()), 1..64)
        ) {
            run_random_ops(ops, true);
        }

        #[test]
        fn arena_mixed_release_restores_one_block_after_defragment(
            ops in proptest::collection::vec((any::<Option<prop::sample::Index>>(), 1..96_usize, any::<bool>()), 1..64)
        ) {
            run_random_ops(ops, false);
        }
    }
}
