//! Fixed-size slab pool.
//!
//! A [`SlabPool`] carves a region into equally sized slots and keeps the
//! free ones on an intrusive singly linked stack. Allocation and release are
//! both O(1).
//!
//! # Memory Layout
//!
//! Every slot is one header word followed by the payload. The payload size
//! is the pool's alignment rounded up to a whole number of words, so every
//! header stays word aligned.
//!
//! ```text
//! Slot Layout:
//! ┌──────────────────────┬──────────────────────────────┐
//! │ SlotHeader (1 word)  │ Payload (alignment bytes)    │
//! │  Free { next }       │                              │
//! │  Allocated { owner } │                              │
//! └──────────────────────┴──────────────────────────────┘
//!                        ▲
//!                        └── pointer returned to the caller
//! ```
//!
//! While a slot is free its header links to the next free slot. Once handed
//! out, the same word records the owning pool, which lets [`SlabPool::release`]
//! reject pointers that were never allocated here, or were already released.
//!
//! # Usage Example
//!
//! ```rust
//! use region_pool::slab::SlabPool;
//!
//! let mut heap = vec![0_usize; 64];
//! let range = heap.as_mut_ptr_range();
//! let mut pool = SlabPool::new();
//! unsafe {
//!     pool.init(32, range.start.cast(), range.end.cast()).unwrap();
//! }
//!
//! let slot = pool.allocate().unwrap();
//! assert_eq!(pool.available(), pool.capacity() - 1);
//!
//! unsafe {
//!     pool.release(slot.as_ptr());
//! }
//! assert_eq!(pool.available(), pool.capacity());
//! ```

use core::ptr::NonNull;

use snafu::{OptionExt as _, ensure};

use crate::{
    error::{
        DiagnosticHook, Diagnostics, ExhaustedCapacitySnafu, ForeignOrCorruptPointerSnafu,
        InvalidConfigurationSnafu, PoolError, StructuralInvariantViolationSnafu,
    },
    region::{PoolId, Region, RegionOrigin, WORD_SIZE},
};

/// Size of the header preceding every slot payload.
pub const HEADER_SIZE: usize = size_of::<SlotHeader>();

/// The in-band word in front of every slot.
///
/// Encoding:
///
/// - `0`: free, end of the free stack
/// - `offset + WORD_SIZE` (low bit clear): free, next free slot at `offset`
/// - `owner | 1`: allocated by the pool whose identity is `owner`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(transparent)]
struct SlotHeader(usize);

const _: () = assert!(size_of::<SlotHeader>() == WORD_SIZE);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SlotState {
    Free { next: Option<usize> },
    Allocated { owner: Option<PoolId> },
}

impl SlotHeader {
    const ALLOCATED_TAG: usize = 1;

    fn free(next: Option<usize>) -> Self {
        Self(next.map_or(0, |offset| offset + WORD_SIZE))
    }

    fn allocated(owner: PoolId) -> Self {
        Self(owner.get() | Self::ALLOCATED_TAG)
    }

    fn state(self) -> SlotState {
        if self.0 & Self::ALLOCATED_TAG == 0 {
            SlotState::Free {
                next: self.0.checked_sub(WORD_SIZE),
            }
        } else {
            SlotState::Allocated {
                owner: PoolId::from_raw(self.0 & !Self::ALLOCATED_TAG),
            }
        }
    }
}

/// A pool of fixed-size slots carved from a caller-supplied region.
///
/// The pool is inert until [`init`](Self::init) succeeds; an inert pool
/// refuses every allocation.
///
/// # Thread Safety
///
/// The pool is `Send` but not `Sync`. Concurrent use requires external
/// synchronization.
#[derive(Debug)]
pub struct SlabPool {
    region: Option<Region>,
    search: Option<usize>,
    alignment: usize,
    stride: usize,
    capacity: usize,
    available: usize,
    diagnostics: Diagnostics,
}

unsafe impl Send for SlabPool {}

impl Default for SlabPool {
    fn default() -> Self {
        Self::new()
    }
}

impl SlabPool {
    /// Creates an inert pool with no region.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            region: None,
            search: None,
            alignment: 0,
            stride: 0,
            capacity: 0,
            available: 0,
            diagnostics: Diagnostics::new(),
        }
    }

    /// Creates a pool of `alignment`-byte slots over `region`.
    pub fn with_region(alignment: usize, region: Region) -> Result<Self, PoolError> {
        let mut pool = Self::new();
        pool.layout(region, alignment)?;
        Ok(pool)
    }

    /// Lays the pool out over `start..end` with `alignment`-byte slots.
    ///
    /// On failure the pool is left inert and the error describes why: null
    /// bounds, a zero alignment, or a region too small for a single slot.
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
        self.clear();
        let region = unsafe { Region::from_bounds(start, end)? };
        self.layout(region, alignment)
    }

    /// Re-lays the pool out with a new slot size.
    ///
    /// Only a fully free pool can be reset; with live allocations the call is
    /// refused and nothing changes.
    pub fn try_reset(&mut self, alignment: usize) -> Result<(), PoolError> {
        let region = self.checked_region()?;
        ensure!(
            self.available == self.capacity,
            StructuralInvariantViolationSnafu {
                reason: "cannot reset a pool with live allocations",
            }
        );
        self.layout(region, alignment)
    }

    /// Like [`try_reset`](Self::try_reset), reporting refusals to the
    /// diagnostic hook.
    pub fn reset(&mut self, alignment: usize) {
        if let Err(err) = self.try_reset(alignment) {
            self.report("reset", &err);
        }
    }

    fn layout(&mut self, region: Region, alignment: usize) -> Result<(), PoolError> {
        ensure!(
            alignment > 0,
            InvalidConfigurationSnafu {
                reason: "slot alignment must be non-zero",
            }
        );
        let stride = alignment
            .checked_next_multiple_of(WORD_SIZE)
            .and_then(|payload| payload.checked_add(HEADER_SIZE))
            .context(InvalidConfigurationSnafu {
                reason: "slot alignment overflows",
            })?;
        let capacity = region.len() / stride;
        ensure!(
            capacity > 0,
            InvalidConfigurationSnafu {
                reason: "region is smaller than one slot",
            }
        );

        let mut region = region;
        for index in 0..capacity {
            let offset = index * stride;
            let next = (index + 1 < capacity).then_some(offset + stride);
            region.write(offset, SlotHeader::free(next));
        }

        log::debug!(
            "{}: laid out {capacity} slots of {alignment} bytes (stride {stride})",
            region.id()
        );
        self.region = Some(region);
        self.search = Some(0);
        self.alignment = alignment;
        self.stride = stride;
        self.capacity = capacity;
        self.available = capacity;
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

    /// Returns `true` if the bookkeeping is consistent with the region.
    #[must_use]
    pub fn is_valid(&self) -> bool {
        self.region.as_ref().is_some_and(|region| {
            self.stride > HEADER_SIZE
                && self.capacity <= region.len() / WORD_SIZE
                && self.capacity * self.stride <= region.len()
                && self.available <= self.capacity
        })
    }

    fn checked_region(&self) -> Result<Region, PoolError> {
        let region = self.region.as_ref().context(InvalidConfigurationSnafu {
            reason: "pool is not initialized",
        })?;
        ensure!(
            self.is_valid(),
            StructuralInvariantViolationSnafu {
                reason: "slab bookkeeping does not match its region",
            }
        );
        Ok(region.alias())
    }

    fn slot_of(&self, offset: usize) -> Option<usize> {
        (offset.is_multiple_of(self.stride) && offset / self.stride < self.capacity)
            .then_some(offset)
    }

    /// Pops a slot off the free stack.
    pub fn try_allocate(&mut self) -> Result<NonNull<u8>, PoolError> {
        let mut region = self.checked_region()?;
        let slot = self
            .search
            .filter(|_| self.available > 0)
            .context(ExhaustedCapacitySnafu {
                requested: self.alignment,
            })?;

        let SlotState::Free { next } = region.read::<SlotHeader>(slot).state() else {
            return StructuralInvariantViolationSnafu {
                reason: "free stack head is not a free slot",
            }
            .fail();
        };
        ensure!(
            next.is_none_or(|next| self.slot_of(next).is_some()),
            StructuralInvariantViolationSnafu {
                reason: "free stack link leaves the slot array",
            }
        );

        region.write(slot, SlotHeader::allocated(region.id()));
        self.search = next;
        self.available -= 1;
        log::trace!("{}: allocated slot at offset {slot}", region.id());
        Ok(region.ptr_at(slot + HEADER_SIZE))
    }

    /// Pops a slot off the free stack, or returns `None` if none is left.
    pub fn allocate(&mut self) -> Option<NonNull<u8>> {
        self.try_allocate()
            .inspect_err(|err| self.report("allocate", err))
            .ok()
    }

    /// Pushes the slot holding `ptr` back onto the free stack.
    ///
    /// A null pointer is accepted and ignored. Pointers outside the region,
    /// not at a slot payload, or whose header does not name this pool as
    /// owner (including slots already released) are refused without any
    /// write.
    ///
    /// # Safety
    ///
    /// The caller must ensure that:
    ///
    /// - no reference into the slot is used after it is released
    /// - if `ptr` points into this pool's region, no live reference covers
    ///   the header word in front of it
    pub unsafe fn try_release(&mut self, ptr: *mut u8) -> Result<(), PoolError> {
        if ptr.is_null() {
            return Ok(());
        }
        let mut region = self.checked_region()?;
        let foreign = ForeignOrCorruptPointerSnafu { address: ptr.addr() };
        let slot = region
            .offset_of(ptr)
            .and_then(|offset| offset.checked_sub(HEADER_SIZE))
            .and_then(|slot| self.slot_of(slot))
            .context(foreign)?;

        let SlotState::Allocated { owner } = region.read::<SlotHeader>(slot).state() else {
            return foreign.fail();
        };
        ensure!(owner == Some(region.id()), foreign);
        ensure!(
            self.available < self.capacity,
            StructuralInvariantViolationSnafu {
                reason: "release would exceed slab capacity",
            }
        );

        region.write(slot, SlotHeader::free(self.search));
        self.search = Some(slot);
        self.available += 1;
        log::trace!("{}: released slot at offset {slot}", region.id());
        Ok(())
    }

    /// Like [`try_release`](Self::try_release), reporting refusals to the
    /// diagnostic hook.
    ///
    /// # Safety
    ///
    /// Same contract as [`try_release`](Self::try_release).
    pub unsafe fn release(&mut self, ptr: *mut u8) {
        if let Err(err) = unsafe { self.try_release(ptr) } {
            self.report("release", &err);
        }
    }

    fn report(&self, op: &'static str, err: &PoolError) {
        self.diagnostics
            .report(self.region.as_ref().map(Region::id), op, err);
    }

    /// Returns the payload size requested at initialization.
    #[must_use]
    pub const fn alignment(&self) -> usize {
        self.alignment
    }

    /// Returns the total number of slots.
    #[must_use]
    pub const fn capacity(&self) -> usize {
        self.capacity
    }

    /// Returns the number of free slots.
    #[must_use]
    pub const fn available(&self) -> usize {
        self.available
    }

    /// Returns `true` if no slot can be allocated.
    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.available == 0
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
