//! Split/coalesce engine shared by both allocation policies.
//!
//! The policies differ only in how they index free blocks; everything that
//! touches boundary tags during an allocate/free/resize transition funnels
//! through here, parameterized over [`FreeIndex`].

use core::ptr::NonNull;

use crate::block::{BlockRef, FreeRef};
use crate::consts::MIN_BLOCK_BYTES;

/// A policy's free-block index. The engine owns the boundary tags; the
/// index owns the intrusive links and any derived bookkeeping (bitmaps,
/// cursors), which it must keep consistent within each call.
pub(crate) trait FreeIndex {
    /// Threads an unlinked free block into the index.
    unsafe fn insert(&mut self, block: FreeRef);

    /// Unlinks a block currently held by the index.
    unsafe fn remove(&mut self, block: FreeRef);
}

/// Turns an unlinked free block into an allocation of `amt` bytes,
/// splitting off the surplus when it is worth a block of its own.
pub(crate) unsafe fn take<I: FreeIndex>(index: &mut I, block: FreeRef, amt: usize) -> NonNull<u8> {
    debug_assert!(block.size() >= amt);

    let block = {
        if block.size() - amt >= MIN_BLOCK_BYTES {
            let tail = block.split(amt);
            index.insert(tail);
        }
        block.block()
    };

    block.mark_allocated();
    block.next_neighbor().set_prev_allocated(true);

    block.payload()
}

/// Transitions an allocated block to free: coalesce eagerly with both
/// neighbors, then hand the result to the index.
///
/// Postcondition: no free block in the pool has a free neighbor.
pub(crate) unsafe fn release<I: FreeIndex>(index: &mut I, block: BlockRef) {
    debug_assert!(block.is_allocated());

    let mut block = block;
    block.mark_free();

    if !block.prev_allocated() {
        let prev = block.prev_free_neighbor();
        index.remove(prev);

        let merged = prev.block();
        merged.set_size(merged.size() + block.size());
        block = merged;
    }

    let next = block.next_neighbor();
    if !next.is_allocated() {
        index.remove(FreeRef::from_block(next));
        block.set_size(block.size() + next.size());
    }

    block.write_footer();
    block.next_neighbor().set_prev_allocated(false);

    index.insert(FreeRef::from_block(block));
}

/// Carves the excess off an allocated block if the leftover makes a legal
/// block; returns whether any shrinking happened. Leaving the block at its
/// original size is not an error.
pub(crate) unsafe fn shrink_in_place<I: FreeIndex>(
    index: &mut I,
    block: BlockRef,
    amt: usize,
) -> bool {
    debug_assert!(block.is_allocated());
    debug_assert!(amt <= block.size());

    let excess = block.size() - amt;
    if excess < MIN_BLOCK_BYTES {
        return false;
    }

    block.set_size(amt);

    let tail_at = NonNull::new_unchecked((block.addr() + amt) as *mut u8);
    let tail = BlockRef::format_allocated(tail_at, excess, true);
    // the release path merges the carved-off tail with a free right
    // neighbor and fixes the successor's PREV_ALLOC_BIT
    release(index, tail);

    true
}

/// Extends an allocated block in place by absorbing a free right neighbor,
/// trimming any surplus back off. Returns whether the block now holds at
/// least `amt` bytes.
pub(crate) unsafe fn grow_in_place<I: FreeIndex>(
    index: &mut I,
    block: BlockRef,
    amt: usize,
) -> bool {
    debug_assert!(block.is_allocated());

    let next = block.next_neighbor();
    if next.is_allocated() {
        return false;
    }

    let merged = match block.size().checked_add(next.size()) {
        Some(merged) => merged,
        None => return false,
    };
    if merged < amt {
        return false;
    }

    index.remove(FreeRef::from_block(next));
    block.set_size(merged);
    block.next_neighbor().set_prev_allocated(true);

    shrink_in_place(index, block, amt);

    true
}
