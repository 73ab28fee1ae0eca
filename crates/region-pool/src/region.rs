//! Caller-owned memory regions and the bounds-checked accessors used to
//! read and write in-band headers.
//!
//! A [`Region`] never owns the memory it describes. The pools impose their
//! structure on it through [`Region::read`] and [`Region::write`], which are
//! keyed by byte offset from the region base and refuse (by panicking) any
//! access that would leave `[0, len)` or break word alignment. Those panics
//! indicate a bug in this crate, never a bad argument from the caller: every
//! caller-supplied pointer is range checked with [`Region::offset_of`] before
//! it is turned into an offset.
//!
//! A `Region` is move-only: handing it to a pool gives that pool exclusive
//! use of the memory, and [`destroy`](crate::ArenaPool::destroy) hands it
//! back. Two live pools can therefore never manage the same bytes.
//!
//! ```compile_fail
//! use region_pool::{ArenaConfig, ArenaPool, Region};
//!
//! let mut heap = vec![0_usize; 32];
//! let region = unsafe { Region::from_raw_parts(heap.as_mut_ptr().cast(), 256) }.unwrap();
//! let first = ArenaPool::with_region(ArenaConfig::default(), region).unwrap();
//! let second = ArenaPool::with_region(ArenaConfig::default(), region).unwrap();
//! ```

use core::{fmt, num::NonZeroUsize, ptr::NonNull};

use derive_more::IsVariant;
use snafu::{OptionExt as _, ensure};

use crate::error::{InvalidConfigurationSnafu, PoolError};

/// Size of one machine word, the unit of every in-band header.
pub const WORD_SIZE: usize = size_of::<usize>();

const _: () = assert!(WORD_SIZE == align_of::<usize>());

/// Identity of a pool, stamped into the headers of the memory it hands out.
///
/// The identity is the address of the pool's region base. Live regions never
/// overlap, so two live pools never share an identity. The base is word
/// aligned, which leaves the low bit free for tagging.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct PoolId(NonZeroUsize);

impl PoolId {
    /// Returns the raw identity value.
    #[must_use]
    pub const fn get(self) -> usize {
        self.0.get()
    }

    pub(crate) const fn from_raw(raw: usize) -> Option<Self> {
        match NonZeroUsize::new(raw) {
            Some(raw) => Some(Self(raw)),
            None => None,
        }
    }
}

impl fmt::Display for PoolId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "pool@{:#x}", self.0)
    }
}

/// Who is responsible for freeing the memory behind a [`Region`].
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, IsVariant)]
pub enum RegionOrigin {
    /// Supplied by a caller that keeps ownership of the storage.
    #[default]
    External,
    /// Obtained by the pool's owner for the pool alone; whoever gets the
    /// region back from `destroy` must free it.
    Allocated,
}

/// A contiguous, word-aligned byte range.
#[derive(PartialEq, Eq)]
pub struct Region {
    base: NonNull<u8>,
    len: usize,
    origin: RegionOrigin,
}

impl fmt::Debug for Region {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Region")
            .field("start", &self.base)
            .field("end", &self.end())
            .field("len", &self.len)
            .field("origin", &self.origin)
            .finish()
    }
}

impl Region {
    /// Describes the range `start..end`.
    ///
    /// Both bounds are trimmed inward to word alignment.
    ///
    /// # Safety
    ///
    /// The caller must ensure that:
    ///
    /// - `start..end` is valid for reads and writes
    /// - the memory is not used by anything else while a pool manages it
    /// - the memory outlives every pool built on this region
    pub unsafe fn from_bounds(start: *mut u8, end: *mut u8) -> Result<Self, PoolError> {
        ensure!(
            !start.is_null() && !end.is_null(),
            InvalidConfigurationSnafu {
                reason: "region bounds must not be null",
            }
        );
        ensure!(
            start < end,
            InvalidConfigurationSnafu {
                reason: "region start must precede its end",
            }
        );
        unsafe { Self::from_raw_parts(start, end.addr() - start.addr()) }
    }

    /// Describes the `len` bytes starting at `start`.
    ///
    /// The range is trimmed inward to word alignment.
    ///
    /// # Safety
    ///
    /// Same contract as [`from_bounds`](Self::from_bounds).
    pub unsafe fn from_raw_parts(start: *mut u8, len: usize) -> Result<Self, PoolError> {
        let base = NonNull::new(start).context(InvalidConfigurationSnafu {
            reason: "region start must not be null",
        })?;
        let align_offset = start.align_offset(WORD_SIZE);
        let len = len.saturating_sub(align_offset) / WORD_SIZE * WORD_SIZE;
        ensure!(
            len > 0,
            InvalidConfigurationSnafu {
                reason: "region holds no aligned word",
            }
        );
        let base = unsafe { base.add(align_offset) };
        Ok(Self {
            base,
            len,
            origin: RegionOrigin::External,
        })
    }

    /// Records who must free the memory once the region is handed back.
    #[must_use]
    pub fn with_origin(mut self, origin: RegionOrigin) -> Self {
        self.origin = origin;
        self
    }

    /// Returns who must free the memory.
    #[must_use]
    pub const fn origin(&self) -> RegionOrigin {
        self.origin
    }

    /// Duplicates the descriptor for the span of one pool operation.
    ///
    /// Only the pool that owns `self` may call this, and the copy must be
    /// dropped before the operation returns.
    pub(crate) const fn alias(&self) -> Self {
        Self {
            base: self.base,
            len: self.len,
            origin: self.origin,
        }
    }

    /// Returns the first byte of the region.
    #[must_use]
    pub const fn start(&self) -> NonNull<u8> {
        self.base
    }

    /// Returns one byte past the end of the region.
    #[must_use]
    pub fn end(&self) -> NonNull<u8> {
        unsafe { self.base.add(self.len) }
    }

    /// Returns the usable length in bytes.
    #[must_use]
    pub const fn len(&self) -> usize {
        self.len
    }

    /// Returns `true` if the region has no usable bytes.
    ///
    /// Constructors reject such regions, so this is always `false` for a
    /// region obtained from this crate.
    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub(crate) fn id(&self) -> PoolId {
        PoolId(self.base.addr())
    }

    /// Translates `ptr` into an offset, if it lies inside the region.
    #[must_use]
    pub fn offset_of(&self, ptr: *const u8) -> Option<usize> {
        let offset = ptr.addr().checked_sub(self.base.addr().get())?;
        (offset < self.len).then_some(offset)
    }

    /// Returns `true` if `ptr` lies inside the region.
    #[must_use]
    pub fn contains(&self, ptr: *const u8) -> bool {
        self.offset_of(ptr).is_some()
    }

    /// Returns a pointer `offset` bytes past the base.
    ///
    /// # Panics
    ///
    /// Panics if `offset` is beyond the end of the region.
    pub(crate) fn ptr_at(&self, offset: usize) -> NonNull<u8> {
        assert!(offset <= self.len, "offset {offset} outside region");
        unsafe { self.base.add(offset) }
    }

    fn check_access<T>(&self, offset: usize) {
        assert!(
            offset.is_multiple_of(align_of::<T>()),
            "misaligned header access at offset {offset}"
        );
        assert!(
            offset
                .checked_add(size_of::<T>())
                .is_some_and(|end| end <= self.len),
            "header access at offset {offset} outside region"
        );
    }

    /// Reads a header value stored at `offset`.
    ///
    /// # Panics
    ///
    /// Panics if the access is misaligned or leaves the region.
    pub(crate) fn read<T: Copy>(&self, offset: usize) -> T {
        self.check_access::<T>(offset);
        unsafe { self.base.add(offset).cast::<T>().read() }
    }

    /// Writes a header value at `offset`.
    ///
    /// # Panics
    ///
    /// Panics if the access is misaligned or leaves the region.
    pub(crate) fn write<T: Copy>(&mut self, offset: usize, value: T) {
        self.check_access::<T>(offset);
        unsafe { self.base.add(offset).cast::<T>().write(value) }
    }
}
