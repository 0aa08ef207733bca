//! The linear first-fit policy: one intrusive free list plus a rotating
//! cursor that remembers where the last successful search stopped, so
//! steady allocation patterns do not re-scan the head of the list and
//! starve blocks near the tail.

use core::fmt;
use core::ptr::NonNull;

use crate::block::FreeRef;
use crate::engine::FreeIndex;
use crate::heap::{Policy, RawHeap};
use crate::pool::{PoolMaps, Pools};
use crate::{AllocError, GrowFn, MemorySpan, PoolError};

pub(crate) struct FirstFitIndex {
    head: Option<FreeRef>,
    /// Search resumes here; always `None` or a block currently in the list.
    cursor: Option<FreeRef>,
}

impl FirstFitIndex {
    pub(crate) const fn new() -> Self {
        FirstFitIndex {
            head: None,
            cursor: None,
        }
    }

    unsafe fn unlink(&mut self, block: FreeRef) {
        if self.cursor == Some(block) {
            self.cursor = block.next_free();
        }

        match block.prev_free() {
            Some(prev) => prev.set_next_free(block.next_free()),
            None => {
                debug_assert_eq!(self.head, Some(block));
                self.head = block.next_free();
            }
        }
        if let Some(next) = block.next_free() {
            next.set_prev_free(block.prev_free());
        }

        block.clear_links();
    }

    /// Unlinks a block the search settled on and parks the cursor on its
    /// list successor.
    unsafe fn consume(&mut self, block: FreeRef) -> FreeRef {
        let next = block.next_free();
        self.unlink(block);
        self.cursor = next;

        block
    }
}

impl FreeIndex for FirstFitIndex {
    unsafe fn insert(&mut self, block: FreeRef) {
        block.set_prev_free(None);
        block.set_next_free(self.head);
        if let Some(head) = self.head {
            head.set_prev_free(Some(block));
        }
        self.head = Some(block);
    }

    unsafe fn remove(&mut self, block: FreeRef) {
        self.unlink(block);
    }
}

impl Policy for FirstFitIndex {
    unsafe fn pop_fit(&mut self, amt: usize) -> Option<FreeRef> {
        let start = match self.cursor.or(self.head) {
            Some(start) => start,
            None => return None,
        };

        // scan from the cursor to the end of the list, then wrap once
        let mut cur = Some(start);
        while let Some(block) = cur {
            if block.size() >= amt {
                return Some(self.consume(block));
            }
            cur = block.next_free();
        }

        let mut cur = self.head;
        while let Some(block) = cur {
            if block == start {
                break;
            }
            if block.size() >= amt {
                return Some(self.consume(block));
            }
            cur = block.next_free();
        }

        None
    }
}

/// The first-fit allocator: a single free list scanned from a rotating
/// cursor.
///
/// Allocation is O(free blocks) in the worst case but O(1) amortized for
/// steady allocation patterns. For bounded-time behavior use [`Tlsf`].
///
/// The allocator serves requests only from the pools registered through
/// [`add_pool`](FirstFit::add_pool) and, when those are exhausted, from a
/// pool obtained through the optional grow callback. It never calls any OS
/// allocation primitive itself.
///
/// [`Tlsf`]: crate::Tlsf
pub struct FirstFit {
    heap: RawHeap<FirstFitIndex>,
}

impl FirstFit {
    /// Constructs an allocator with no pools and no grow callback.
    pub const fn new() -> Self {
        FirstFit {
            heap: RawHeap::new(FirstFitIndex::new(), None),
        }
    }

    /// Constructs an allocator that asks `grow` for a fresh pool whenever
    /// every registered pool is exhausted.
    ///
    /// `grow` must not call back into this allocator, directly or
    /// indirectly; the allocator's structures are in a transient state
    /// while it runs.
    pub const fn with_grow(grow: GrowFn) -> Self {
        FirstFit {
            heap: RawHeap::new(FirstFitIndex::new(), Some(grow)),
        }
    }

    /// Sets the floor for grow-callback requests (default
    /// [`DEFAULT_GROW_BYTES`](crate::DEFAULT_GROW_BYTES)).
    pub fn set_grow_min(&mut self, bytes: usize) {
        self.heap.set_grow_min(bytes);
    }

    /// Registers `span` as a new pool and returns its usable size in bytes.
    ///
    /// Fails with [`PoolError::TooSmall`], registering nothing, if the
    /// span cannot hold the pool metadata plus one minimal block.
    pub fn add_pool(&mut self, span: MemorySpan) -> Result<usize, PoolError> {
        self.heap.add_pool(span)
    }

    /// Allocates `len` bytes, aligned to [`UNIT`](crate::UNIT) bytes.
    ///
    /// On failure the allocator is left exactly as it was; existing
    /// allocations are never disturbed.
    pub fn allocate(&mut self, len: usize) -> Result<NonNull<u8>, AllocError> {
        self.heap.allocate(len)
    }

    /// Returns an allocation to the allocator.
    ///
    /// # Safety
    ///
    /// `ptr` must have been returned by this allocator and not freed since.
    pub unsafe fn free(&mut self, ptr: NonNull<u8>) {
        self.heap.free(ptr)
    }

    /// Resizes an allocation: in place when possible, otherwise by
    /// allocate + copy + free. `ptr == None` behaves as
    /// [`allocate`](FirstFit::allocate); `new_len == 0` behaves as
    /// [`free`](FirstFit::free) and returns `Ok(None)`.
    ///
    /// # Safety
    ///
    /// `ptr`, when present, must have been returned by this allocator and
    /// not freed since. On success the old pointer is invalidated.
    pub unsafe fn resize(
        &mut self,
        ptr: Option<NonNull<u8>>,
        new_len: usize,
    ) -> Result<Option<NonNull<u8>>, AllocError> {
        self.heap.resize(ptr, new_len)
    }

    /// Iterates over the registered pools for diagnostics.
    pub fn pools(&self) -> Pools<'_> {
        self.heap.pools()
    }
}

impl Default for FirstFit {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for FirstFit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FirstFit")
            .field("pools", &PoolMaps(self.pools()))
            .finish()
    }
}
