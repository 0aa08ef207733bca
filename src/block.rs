//! Boundary-tag block representation.
//!
//! Every block starts with a one-word header: the block's total span in
//! bytes with the two low-order bits overloaded as flags. Unit alignment
//! guarantees those bits are never part of a size.
//!
//! ``` text
//! allocated:  [ size|A|P ][ payload ................................ ]
//! free:       [ size|0|P ][ next ][ prev ][ ...... ][ footer = size  ]
//! ```
//!
//! Free blocks additionally carry an intrusive doubly-linked node in their
//! first payload unit and a flag-free copy of the size in their last unit
//! (the footer), which is what lets a successor find its free predecessor
//! without any out-of-band index.
//!
//! This module is the only place that derives block addresses from raw
//! pointer arithmetic; everything above it works in terms of [`BlockRef`]
//! and [`FreeRef`] handles.

use core::ptr::NonNull;

use crate::consts::{HEADER_BYTES, MIN_BLOCK_BYTES, UNIT};

/// The block is owned by a client.
const ALLOC_BIT: usize = 1 << 0;
/// The block immediately to the left in memory is allocated.
const PREV_ALLOC_BIT: usize = 1 << 1;
const FLAG_MASK: usize = ALLOC_BIT | PREV_ALLOC_BIT;

/// Checked handle to a block header living inside some registered pool.
///
/// Constructed once (from a header or payload address) and then navigated
/// via [`next_neighbor`](BlockRef::next_neighbor) and
/// [`prev_free_neighbor`](BlockRef::prev_free_neighbor).
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub(crate) struct BlockRef {
    header: NonNull<usize>,
}

impl BlockRef {
    /* Constructors */
    pub(crate) unsafe fn from_header(header: NonNull<u8>) -> Self {
        debug_assert_eq!(header.as_ptr() as usize % UNIT, 0);

        BlockRef {
            header: header.cast(),
        }
    }

    pub(crate) unsafe fn from_payload(ptr: NonNull<u8>) -> Self {
        BlockRef::from_header(NonNull::new_unchecked(ptr.as_ptr().sub(HEADER_BYTES)))
    }

    /// Stamps a well-formed free block over `[at, at + size)`.
    pub(crate) unsafe fn format_free(
        at: NonNull<u8>,
        size: usize,
        prev_allocated: bool,
    ) -> FreeRef {
        debug_assert!(size >= MIN_BLOCK_BYTES);
        debug_assert_eq!(size % UNIT, 0);

        let block = BlockRef::from_header(at);
        block.set_word(size | if prev_allocated { PREV_ALLOC_BIT } else { 0 });
        block.write_footer();

        FreeRef::from_block(block)
    }

    /// Stamps a transient allocated block; used when carving excess space
    /// off a live block before handing it to the release path.
    pub(crate) unsafe fn format_allocated(
        at: NonNull<u8>,
        size: usize,
        prev_allocated: bool,
    ) -> BlockRef {
        debug_assert!(size >= MIN_BLOCK_BYTES);
        debug_assert_eq!(size % UNIT, 0);

        let block = BlockRef::from_header(at);
        block.set_word(size | ALLOC_BIT | if prev_allocated { PREV_ALLOC_BIT } else { 0 });

        block
    }

    /// Writes the permanently-allocated zero-size block that terminates a
    /// pool's usable region.
    pub(crate) unsafe fn format_sentinel(at: NonNull<u8>) -> BlockRef {
        let block = BlockRef::from_header(at);
        block.set_word(ALLOC_BIT);

        block
    }

    /* Header word */
    fn word(self) -> usize {
        unsafe { *self.header.as_ptr() }
    }

    fn set_word(self, word: usize) {
        unsafe { *self.header.as_ptr() = word }
    }

    pub(crate) fn size(self) -> usize {
        self.word() & !FLAG_MASK
    }

    pub(crate) fn is_allocated(self) -> bool {
        self.word() & ALLOC_BIT != 0
    }

    pub(crate) fn prev_allocated(self) -> bool {
        self.word() & PREV_ALLOC_BIT != 0
    }

    pub(crate) fn is_sentinel(self) -> bool {
        self.size() == 0
    }

    /// Updates the size, leaving both flag bits untouched.
    pub(crate) fn set_size(self, size: usize) {
        debug_assert_eq!(size % UNIT, 0);
        debug_assert!(size >= MIN_BLOCK_BYTES);

        self.set_word(size | (self.word() & FLAG_MASK));
    }

    pub(crate) fn mark_allocated(self) {
        self.set_word(self.word() | ALLOC_BIT);
    }

    pub(crate) fn mark_free(self) {
        self.set_word(self.word() & !ALLOC_BIT);
    }

    pub(crate) fn set_prev_allocated(self, prev_allocated: bool) {
        if prev_allocated {
            self.set_word(self.word() | PREV_ALLOC_BIT);
        } else {
            self.set_word(self.word() & !PREV_ALLOC_BIT);
        }
    }

    /* Addresses */
    pub(crate) fn addr(self) -> usize {
        self.header.as_ptr() as usize
    }

    fn byte_ptr(self) -> *mut u8 {
        self.header.as_ptr() as *mut u8
    }

    pub(crate) fn payload(self) -> NonNull<u8> {
        unsafe { NonNull::new_unchecked(self.byte_ptr().add(HEADER_BYTES)) }
    }

    /* Navigation */
    /// The block starting where this one ends. Every pool is terminated by
    /// a sentinel, so this is always a real header unless `self` *is* the
    /// sentinel, which callers must rule out.
    pub(crate) fn next_neighbor(self) -> BlockRef {
        debug_assert!(!self.is_sentinel());

        unsafe { BlockRef::from_header(NonNull::new_unchecked(self.byte_ptr().add(self.size()))) }
    }

    /// The free block ending right before this one, located through its
    /// footer. Only meaningful while `PREV_ALLOC_BIT` is clear.
    pub(crate) fn prev_free_neighbor(self) -> FreeRef {
        debug_assert!(!self.prev_allocated());

        unsafe {
            let prev_size = *self.header.as_ptr().sub(1);
            debug_assert!(prev_size >= MIN_BLOCK_BYTES);
            debug_assert_eq!(prev_size % UNIT, 0);

            let prev =
                BlockRef::from_header(NonNull::new_unchecked(self.byte_ptr().sub(prev_size)));
            debug_assert_eq!(prev.size(), prev_size);
            debug_assert!(!prev.is_allocated());

            FreeRef::from_block(prev)
        }
    }

    /// Duplicates the size (flag-free) into the block's last unit.
    pub(crate) fn write_footer(self) {
        debug_assert!(!self.is_allocated());

        unsafe {
            let end = self.byte_ptr().add(self.size());
            *(end.sub(UNIT) as *mut usize) = self.size();
        }
    }
}

/// The intrusive list node threaded through a free block's first payload
/// unit.
#[repr(C)]
struct FreeNode {
    next: Option<FreeRef>,
    prev: Option<FreeRef>,
}

/// A [`BlockRef`] known to be free, with access to the embedded list node.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub(crate) struct FreeRef {
    block: BlockRef,
}

impl FreeRef {
    pub(crate) unsafe fn from_block(block: BlockRef) -> Self {
        debug_assert!(!block.is_allocated());

        FreeRef { block }
    }

    pub(crate) fn block(self) -> BlockRef {
        self.block
    }

    pub(crate) fn size(self) -> usize {
        self.block.size()
    }

    fn node(self) -> *mut FreeNode {
        self.block.payload().as_ptr() as *mut FreeNode
    }

    /* Free-list links */
    pub(crate) fn next_free(self) -> Option<FreeRef> {
        unsafe { (*self.node()).next }
    }

    pub(crate) fn prev_free(self) -> Option<FreeRef> {
        unsafe { (*self.node()).prev }
    }

    pub(crate) fn set_next_free(self, next: Option<FreeRef>) {
        unsafe { (*self.node()).next = next }
    }

    pub(crate) fn set_prev_free(self, prev: Option<FreeRef>) {
        unsafe { (*self.node()).prev = prev }
    }

    pub(crate) fn clear_links(self) {
        self.set_next_free(None);
        self.set_prev_free(None);
    }

    /// Cuts this free block in two. The head keeps `at` bytes (and its
    /// flags); the freshly-formatted tail is returned, unlinked.
    pub(crate) unsafe fn split(self, at: usize) -> FreeRef {
        debug_assert_eq!(at % UNIT, 0);
        debug_assert!(at >= MIN_BLOCK_BYTES);
        debug_assert!(self.size() - at >= MIN_BLOCK_BYTES);

        let total = self.size();
        let tail_at = NonNull::new_unchecked(self.block.byte_ptr().add(at));
        // the head stays free, so the tail's predecessor is not allocated
        let tail = BlockRef::format_free(tail_at, total - at, false);

        self.block.set_size(at);
        self.block.write_footer();

        tail
    }
}
