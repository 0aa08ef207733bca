//! Pool registry: turns caller-donated memory spans into bounded arenas.
//!
//! A pool starts with a [`PoolHeader`], is followed by one or more blocks
//! and ends with a zero-size allocated sentinel that stops coalescing and
//! scanning from running past the arena edge. Pools are kept in a singly
//! linked list in registration order.

use core::fmt;
use core::marker::PhantomData;
use core::mem;
use core::ptr;
use core::ptr::NonNull;

use crate::block::BlockRef;
use crate::consts::{MIN_BLOCK_BYTES, UNIT};
use crate::engine::FreeIndex;
use crate::{MemorySpan, PoolError};

#[repr(C)]
pub(crate) struct PoolHeader {
    next: Option<NonNull<PoolHeader>>,
    total: usize,
    usable: usize,
}

pub(crate) const POOL_HEADER_BYTES: usize = mem::size_of::<PoolHeader>();

/// Smallest span `add_pool` accepts once unit-aligned: the pool header, one
/// minimal free block and the trailing sentinel.
pub const MIN_POOL_BYTES: usize = POOL_HEADER_BYTES + MIN_BLOCK_BYTES + UNIT;

// Per-pool fixed cost plus worst-case alignment slack; grow requests are
// padded by this much so a fresh pool is guaranteed to satisfy the request
// that triggered it.
pub(crate) const POOL_OVERHEAD_BYTES: usize = POOL_HEADER_BYTES + 2 * UNIT;

pub(crate) struct PoolList {
    head: Option<NonNull<PoolHeader>>,
}

impl PoolList {
    pub(crate) const fn new() -> Self {
        PoolList { head: None }
    }

    /// Formats `span` as a pool (header, one spanning free block and the
    /// sentinel), links it in and hands the free block to the policy index.
    pub(crate) unsafe fn add<I: FreeIndex>(
        &mut self,
        index: &mut I,
        span: MemorySpan,
    ) -> Result<usize, PoolError> {
        let base = span.as_ptr() as usize;
        let slack = base.wrapping_neg() % UNIT;

        if span.len() < slack + MIN_POOL_BYTES {
            return Err(PoolError::TooSmall);
        }
        let len = (span.len() - slack) & !(UNIT - 1);
        let usable = len - POOL_HEADER_BYTES - UNIT;

        let header = (base + slack) as *mut PoolHeader;
        ptr::write(
            header,
            PoolHeader {
                next: None,
                total: len,
                usable,
            },
        );

        let first = NonNull::new_unchecked((header as *mut u8).add(POOL_HEADER_BYTES));
        // nothing to the first block's left, so its predecessor counts as
        // allocated
        let block = BlockRef::format_free(first, usable, true);
        BlockRef::format_sentinel(NonNull::new_unchecked(first.as_ptr().add(usable)));

        self.link(NonNull::new_unchecked(header));
        index.insert(block);

        Ok(usable)
    }

    fn link(&mut self, pool: NonNull<PoolHeader>) {
        unsafe {
            let mut cur = match self.head {
                None => {
                    self.head = Some(pool);
                    return;
                }
                Some(head) => head,
            };
            while let Some(next) = (*cur.as_ptr()).next {
                cur = next;
            }
            (*cur.as_ptr()).next = Some(pool);
        }
    }

    pub(crate) fn iter(&self) -> Pools<'_> {
        Pools {
            next: self.head,
            _marker: PhantomData,
        }
    }
}

/// Read-only view of one registered pool.
#[derive(Clone, Copy)]
pub struct Pool<'a> {
    header: NonNull<PoolHeader>,
    _marker: PhantomData<&'a PoolHeader>,
}

impl<'a> Pool<'a> {
    /// Address of the pool header (the start of the aligned span).
    pub fn addr(&self) -> usize {
        self.header.as_ptr() as usize
    }

    /// Whole aligned span length in bytes, metadata included.
    pub fn total_bytes(&self) -> usize {
        unsafe { (*self.header.as_ptr()).total }
    }

    /// Bytes available to blocks: the span minus pool header and sentinel.
    pub fn usable_bytes(&self) -> usize {
        unsafe { (*self.header.as_ptr()).usable }
    }

    /// Walks the pool's blocks, reconstructing the sequence purely from
    /// boundary tags. The sentinel is not reported.
    pub fn blocks(&self) -> Blocks<'a> {
        let first = unsafe {
            BlockRef::from_header(NonNull::new_unchecked(
                (self.header.as_ptr() as *mut u8).add(POOL_HEADER_BYTES),
            ))
        };

        Blocks {
            next: Some(first),
            _marker: PhantomData,
        }
    }
}

impl fmt::Debug for Pool<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Pool")
            .field("addr", &self.addr())
            .field("usable_bytes", &self.usable_bytes())
            .field("blocks", &BlockList(self.blocks()))
            .finish()
    }
}

/// Iterator over an allocator's pools, in registration order.
#[derive(Clone)]
pub struct Pools<'a> {
    next: Option<NonNull<PoolHeader>>,
    _marker: PhantomData<&'a PoolHeader>,
}

impl<'a> Iterator for Pools<'a> {
    type Item = Pool<'a>;

    fn next(&mut self) -> Option<Pool<'a>> {
        let header = self.next?;
        self.next = unsafe { (*header.as_ptr()).next };

        Some(Pool {
            header,
            _marker: PhantomData,
        })
    }
}

/// One block as described by its boundary tags.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "ufmt", derive(ufmt::derive::uDebug))]
pub struct BlockInfo {
    /// Address of the block header.
    pub addr: usize,
    /// Total span in bytes, header included.
    pub size: usize,
    /// Whether the block is currently owned by a client.
    pub allocated: bool,
    /// Whether the block's left neighbor is allocated.
    pub prev_allocated: bool,
}

/// Iterator over the blocks of one pool.
#[derive(Clone)]
pub struct Blocks<'a> {
    next: Option<BlockRef>,
    _marker: PhantomData<&'a PoolHeader>,
}

impl<'a> Iterator for Blocks<'a> {
    type Item = BlockInfo;

    fn next(&mut self) -> Option<BlockInfo> {
        let block = self.next?;
        if block.is_sentinel() {
            self.next = None;
            return None;
        }
        self.next = Some(block.next_neighbor());

        Some(BlockInfo {
            addr: block.addr(),
            size: block.size(),
            allocated: block.is_allocated(),
            prev_allocated: block.prev_allocated(),
        })
    }
}

pub(crate) struct BlockList<'a>(pub(crate) Blocks<'a>);

impl fmt::Debug for BlockList<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list().entries(self.0.clone()).finish()
    }
}

pub(crate) struct PoolMaps<'a>(pub(crate) Pools<'a>);

impl fmt::Debug for PoolMaps<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list().entries(self.0.clone()).finish()
    }
}
