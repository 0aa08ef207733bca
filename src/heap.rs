//! Policy-independent request layer: unit rounding, the grow-and-retry-once
//! flow and the three-way resize strategy, shared by both allocators.

use core::ptr;
use core::ptr::NonNull;

use crate::block::{BlockRef, FreeRef};
use crate::consts::{DEFAULT_GROW_BYTES, HEADER_BYTES};
use crate::engine::{self, FreeIndex};
use crate::pool::{PoolList, Pools, POOL_OVERHEAD_BYTES};
use crate::units::block_size_for;
use crate::{AllocError, GrowFn, MemorySpan, PoolError};

/// The per-policy hook: everything else about serving a request is shared.
pub(crate) trait Policy: FreeIndex {
    /// Finds and unlinks a free block spanning at least `amt` bytes.
    unsafe fn pop_fit(&mut self, amt: usize) -> Option<FreeRef>;
}

pub(crate) struct RawHeap<P> {
    pools: PoolList,
    pub(crate) index: P,
    grow: Option<GrowFn>,
    grow_min: usize,
}

impl<P: Policy> RawHeap<P> {
    pub(crate) const fn new(index: P, grow: Option<GrowFn>) -> Self {
        RawHeap {
            pools: PoolList::new(),
            index,
            grow,
            grow_min: DEFAULT_GROW_BYTES,
        }
    }

    pub(crate) fn set_grow_min(&mut self, bytes: usize) {
        self.grow_min = bytes;
    }

    pub(crate) fn add_pool(&mut self, span: MemorySpan) -> Result<usize, PoolError> {
        unsafe { self.pools.add(&mut self.index, span) }
    }

    pub(crate) fn allocate(&mut self, len: usize) -> Result<NonNull<u8>, AllocError> {
        let amt = block_size_for(len)?;

        unsafe {
            if let Some(block) = self.index.pop_fit(amt) {
                return Ok(engine::take(&mut self.index, block, amt));
            }

            self.grow_once(amt)?;

            match self.index.pop_fit(amt) {
                Some(block) => Ok(engine::take(&mut self.index, block, amt)),
                None => Err(AllocError::OutOfMemory),
            }
        }
    }

    /// Asks the grow callback for one more pool, sized so the pending
    /// request cannot fail again for lack of space.
    fn grow_once(&mut self, amt: usize) -> Result<(), AllocError> {
        let grow = self.grow.ok_or(AllocError::OutOfMemory)?;

        let need = amt
            .checked_add(POOL_OVERHEAD_BYTES)
            .ok_or(AllocError::SizeOverflow)?;
        let want = if need < self.grow_min {
            self.grow_min
        } else {
            need
        };

        let span = grow(want).ok_or(AllocError::OutOfMemory)?;
        self.add_pool(span).map_err(|_| AllocError::OutOfMemory)?;

        Ok(())
    }

    pub(crate) unsafe fn free(&mut self, ptr: NonNull<u8>) {
        let block = BlockRef::from_payload(ptr);
        debug_assert!(block.is_allocated());

        engine::release(&mut self.index, block);
    }

    pub(crate) unsafe fn resize(
        &mut self,
        ptr: Option<NonNull<u8>>,
        new_len: usize,
    ) -> Result<Option<NonNull<u8>>, AllocError> {
        let ptr = match ptr {
            Some(ptr) => ptr,
            None => return self.allocate(new_len).map(Some),
        };

        if new_len == 0 {
            self.free(ptr);
            return Ok(None);
        }

        let block = BlockRef::from_payload(ptr);
        debug_assert!(block.is_allocated());

        let amt = block_size_for(new_len)?;
        let old = block.size();

        if amt <= old {
            engine::shrink_in_place(&mut self.index, block, amt);
            return Ok(Some(ptr));
        }

        if engine::grow_in_place(&mut self.index, block, amt) {
            return Ok(Some(ptr));
        }

        // fall back on allocate + copy + free; the original allocation is
        // untouched if the new one cannot be served
        let new = self.allocate(new_len)?;
        let live = old - HEADER_BYTES;
        ptr::copy_nonoverlapping(
            ptr.as_ptr(),
            new.as_ptr(),
            if live < new_len { live } else { new_len },
        );
        self.free(ptr);

        Ok(Some(new))
    }

    pub(crate) fn pools(&self) -> Pools<'_> {
        self.pools.iter()
    }
}
