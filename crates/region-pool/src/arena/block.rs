//! Block headers of the arena pool and the read-only chain walker.

use core::{fmt, ptr::NonNull};

use derive_more::{Display, IsVariant};

use crate::region::{PoolId, Region, WORD_SIZE};

/// Size of the boundary tag in front of every arena block.
pub const HEADER_SIZE: usize = size_of::<RawHeader>();

/// The boundary tag as it is stored in the region.
///
/// `next` is the offset of the following header, `0` on the sentinel.
/// `owner` is `0` while the block is free.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(C)]
pub(super) struct RawHeader {
    next: usize,
    owner: usize,
}

const _: () = assert!(size_of::<RawHeader>() == 2 * WORD_SIZE);
const _: () = assert!(align_of::<RawHeader>() == WORD_SIZE);

/// A decoded boundary tag.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(super) enum Header {
    Free { next: usize },
    Allocated { next: usize, owner: PoolId },
    Sentinel,
}

impl Header {
    pub(super) fn decode(raw: RawHeader) -> Self {
        if raw.next == 0 {
            return Self::Sentinel;
        }
        match PoolId::from_raw(raw.owner) {
            None => Self::Free { next: raw.next },
            Some(owner) => Self::Allocated {
                next: raw.next,
                owner,
            },
        }
    }

    pub(super) fn encode(self) -> RawHeader {
        match self {
            Self::Free { next } => RawHeader { next, owner: 0 },
            Self::Allocated { next, owner } => RawHeader {
                next,
                owner: owner.get(),
            },
            Self::Sentinel => RawHeader { next: 0, owner: 0 },
        }
    }

    pub(super) fn next(self) -> Option<usize> {
        match self {
            Self::Free { next } | Self::Allocated { next, .. } => Some(next),
            Self::Sentinel => None,
        }
    }

    fn status(self) -> BlockStatus {
        match self {
            Self::Free { .. } => BlockStatus::Free,
            Self::Allocated { .. } => BlockStatus::Allocated,
            Self::Sentinel => BlockStatus::Sentinel,
        }
    }
}

/// Whether a block is free, handed out, or the terminal sentinel.
#[derive(Debug, Display, Clone, Copy, PartialEq, Eq, IsVariant)]
pub enum BlockStatus {
    #[display("free")]
    Free,
    #[display("allocated")]
    Allocated,
    #[display("sentinel")]
    Sentinel,
}

/// A snapshot of one block in an arena chain.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BlockInfo {
    /// Address of the block header.
    pub address: NonNull<u8>,
    /// Address of the following header, `None` for the sentinel.
    pub next: Option<NonNull<u8>>,
    /// Whether the block is free, allocated, or the sentinel.
    pub status: BlockStatus,
    /// Payload size in bytes, derived from the distance to `next`.
    pub size: usize,
}

impl BlockInfo {
    /// Returns the first payload byte, the pointer handed to callers.
    #[must_use]
    pub fn payload(&self) -> NonNull<u8> {
        unsafe { self.address.add(HEADER_SIZE) }
    }
}

impl fmt::Display for BlockInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:p} {} {} bytes", self.address, self.status, self.size)
    }
}

/// Iterator over the blocks of an arena, sentinel included.
///
/// Created by [`ArenaPool::blocks`](super::ArenaPool::blocks). The walk stops
/// early if it meets a link that does not move strictly forward inside the
/// region.
pub struct Blocks<'a> {
    region: Option<&'a Region>,
    cursor: Option<usize>,
    sentinel: usize,
    remaining: usize,
}

impl<'a> Blocks<'a> {
    pub(super) fn new(region: Option<&'a Region>, sentinel: usize, max_blocks: usize) -> Self {
        Self {
            region,
            cursor: region.map(|_| 0),
            sentinel,
            remaining: max_blocks,
        }
    }
}

impl Iterator for Blocks<'_> {
    type Item = BlockInfo;

    fn next(&mut self) -> Option<Self::Item> {
        let region = self.region?;
        let offset = self.cursor.take()?;
        if self.remaining == 0 {
            return None;
        }
        self.remaining -= 1;

        let header = Header::decode(region.read(offset));
        let address = region.ptr_at(offset);
        let Some(next) = header.next() else {
            return Some(BlockInfo {
                address,
                next: None,
                status: BlockStatus::Sentinel,
                size: 0,
            });
        };
        if next <= offset || next > self.sentinel || !next.is_multiple_of(WORD_SIZE) {
            return None;
        }
        let size = next.checked_sub(offset + HEADER_SIZE)?;
        self.cursor = Some(next);
        Some(BlockInfo {
            address,
            next: Some(region.ptr_at(next)),
            status: header.status(),
            size,
        })
    }
}
