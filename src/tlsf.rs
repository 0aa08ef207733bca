//! The Two-Level Segregated Fit policy: free blocks are filed by size
//! class into buckets found through a two-level bitmap, giving bounded-time
//! allocation and free.
//!
//! A size maps to `(fl, sl)`: `fl` selects the power-of-two range holding
//! the size's most significant bit and `sl` subdivides that range linearly
//! into [`SL_LEN`](crate::consts::SL_LEN) sub-ranges. Sizes below
//! `SIZE_THRESHOLD` are too small to subdivide and share a single exactly-
//! indexed first row.

use core::fmt;
use core::ptr::NonNull;

use crate::block::FreeRef;
use crate::consts::{FLI_SHIFT, FL_LEN, SIZE_THRESHOLD, SLI_LOG2, SL_LEN, UNIT};
use crate::engine::FreeIndex;
use crate::heap::{Policy, RawHeap};
use crate::pool::{PoolMaps, Pools};
use crate::units::{bytes_to_units, units_to_bytes};
use crate::util::{ffs, fls};
use crate::{AllocError, GrowFn, MemorySpan, PoolError};

/// Two-level size-class coordinates. The derived ordering is lexicographic
/// `(fl, sl)`, which the mapping keeps monotonic in the size.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord)]
pub(crate) struct Class {
    pub(crate) fl: u32,
    pub(crate) sl: u32,
}

fn class_of_unchecked(size: usize) -> Class {
    if size < SIZE_THRESHOLD {
        Class {
            fl: 0,
            sl: bytes_to_units(size) as u32,
        }
    } else {
        let msb = fls(size);
        let sl = ((size >> (msb - SLI_LOG2)) ^ SL_LEN) as u32;

        Class {
            fl: msb - FLI_SHIFT + 1,
            sl,
        }
    }
}

/// The class a free block of `size` bytes is filed under.
pub(crate) fn class_of(size: usize) -> Class {
    debug_assert_eq!(size % UNIT, 0);

    let class = class_of_unchecked(size);
    debug_assert!((class.fl as usize) < FL_LEN);
    debug_assert!((class.sl as usize) < SL_LEN);

    class
}

/// Biases a request upward so that the class it maps to only holds blocks
/// large enough to satisfy it. `None` means no representable block could.
pub(crate) fn round_up_for_search(size: usize) -> Option<usize> {
    if size < SIZE_THRESHOLD {
        // linear classes are exact; nothing to round
        Some(size)
    } else {
        let bias = (1usize << (fls(size) - SLI_LOG2)) - 1;
        size.checked_add(bias)
    }
}

/// Smallest block size filed under `class`.
pub(crate) fn class_floor(class: Class) -> usize {
    if class.fl == 0 {
        units_to_bytes(class.sl as usize)
    } else {
        let msb = class.fl + FLI_SHIFT - 1;
        (1usize << msb) + ((class.sl as usize) << (msb - SLI_LOG2))
    }
}

pub(crate) struct TlsfIndex {
    fl_bitmap: usize,
    sl_bitmaps: [u16; FL_LEN],
    buckets: [[Option<FreeRef>; SL_LEN]; FL_LEN],
}

impl TlsfIndex {
    pub(crate) const fn new() -> Self {
        TlsfIndex {
            fl_bitmap: 0,
            sl_bitmaps: [0; FL_LEN],
            buckets: [[None; SL_LEN]; FL_LEN],
        }
    }

    fn set_bit(&mut self, class: Class) {
        self.fl_bitmap |= 1 << class.fl;
        self.sl_bitmaps[class.fl as usize] |= 1 << class.sl;
    }

    fn clear_bit(&mut self, class: Class) {
        self.sl_bitmaps[class.fl as usize] &= !(1 << class.sl);
        if self.sl_bitmaps[class.fl as usize] == 0 {
            self.fl_bitmap &= !(1 << class.fl);
        }
    }

    /// The central TLSF step: the first non-empty bucket at or above
    /// `class`, found with two bit scans and no loops.
    fn find_suitable(&self, class: Class) -> Option<Class> {
        let masked = self.sl_bitmaps[class.fl as usize] & (!0u16 << class.sl);
        if masked != 0 {
            return Some(Class {
                fl: class.fl,
                sl: ffs(masked as usize),
            });
        }

        let rows = self.fl_bitmap & (!0usize << (class.fl + 1));
        if rows == 0 {
            return None;
        }

        let fl = ffs(rows);
        let sl = ffs(self.sl_bitmaps[fl as usize] as usize);

        Some(Class { fl, sl })
    }

    unsafe fn pop_head(&mut self, class: Class) -> FreeRef {
        let head = match self.buckets[class.fl as usize][class.sl as usize] {
            Some(head) => head,
            None => unreachable!("bitmap marked an empty bucket as populated"),
        };
        debug_assert!(head.prev_free().is_none());

        let next = head.next_free();
        if let Some(next) = next {
            next.set_prev_free(None);
            head.set_next_free(None);
        }
        self.buckets[class.fl as usize][class.sl as usize] = next;
        if next.is_none() {
            self.clear_bit(class);
        }

        head
    }

    #[cfg(test)]
    pub(crate) fn assert_consistent(&self) {
        for fl in 0..FL_LEN {
            for sl in 0..SL_LEN {
                let marked = self.sl_bitmaps[fl] & (1 << sl) != 0;
                assert_eq!(marked, self.buckets[fl][sl].is_some());

                let mut cur = self.buckets[fl][sl];
                while let Some(block) = cur {
                    assert_eq!(
                        class_of(block.size()),
                        Class {
                            fl: fl as u32,
                            sl: sl as u32
                        }
                    );
                    cur = block.next_free();
                }
            }
            assert_eq!(self.fl_bitmap & (1 << fl) != 0, self.sl_bitmaps[fl] != 0);
        }
    }
}

impl FreeIndex for TlsfIndex {
    unsafe fn insert(&mut self, block: FreeRef) {
        let class = class_of(block.size());
        let head = self.buckets[class.fl as usize][class.sl as usize];

        block.set_prev_free(None);
        block.set_next_free(head);
        if let Some(head) = head {
            head.set_prev_free(Some(block));
        }

        self.buckets[class.fl as usize][class.sl as usize] = Some(block);
        self.set_bit(class);
    }

    unsafe fn remove(&mut self, block: FreeRef) {
        let next = block.next_free();
        let prev = block.prev_free();

        if let Some(prev) = prev {
            prev.set_next_free(next);
        } else {
            // head of its bucket; the bitmap update must not be separated
            // from the unlink
            let class = class_of(block.size());
            debug_assert_eq!(
                self.buckets[class.fl as usize][class.sl as usize],
                Some(block)
            );

            self.buckets[class.fl as usize][class.sl as usize] = next;
            if next.is_none() {
                self.clear_bit(class);
            }
        }
        if let Some(next) = next {
            next.set_prev_free(prev);
        }

        block.clear_links();
    }
}

impl Policy for TlsfIndex {
    unsafe fn pop_fit(&mut self, amt: usize) -> Option<FreeRef> {
        let rounded = round_up_for_search(amt)?;
        let hit = self.find_suitable(class_of_unchecked(rounded))?;

        let block = self.pop_head(hit);
        debug_assert!(block.size() >= amt);

        Some(block)
    }
}

/// The Two-Level Segregated Fit allocator.
///
/// `allocate` and `free` complete within a bounded number of steps
/// regardless of the number and sizes of free blocks: finding a fitting
/// block is two bitmap scans, and coalescing touches at most the two
/// physical neighbors.
///
/// The allocator serves requests only from the pools registered through
/// [`add_pool`](Tlsf::add_pool) and, when those are exhausted, from a pool
/// obtained through the optional grow callback. It never calls any OS
/// allocation primitive itself.
pub struct Tlsf {
    heap: RawHeap<TlsfIndex>,
}

impl Tlsf {
    /// Constructs an allocator with no pools and no grow callback.
    pub const fn new() -> Self {
        Tlsf {
            heap: RawHeap::new(TlsfIndex::new(), None),
        }
    }

    /// Constructs an allocator that asks `grow` for a fresh pool whenever
    /// every registered pool is exhausted.
    ///
    /// `grow` must not call back into this allocator, directly or
    /// indirectly; the allocator's structures are in a transient state
    /// while it runs.
    pub const fn with_grow(grow: GrowFn) -> Self {
        Tlsf {
            heap: RawHeap::new(TlsfIndex::new(), Some(grow)),
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
    /// [`allocate`](Tlsf::allocate); `new_len == 0` behaves as
    /// [`free`](Tlsf::free) and returns `Ok(None)`.
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

    #[cfg(test)]
    pub(crate) fn assert_index_consistent(&self) {
        self.heap.index.assert_consistent();
    }
}

impl Default for Tlsf {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for Tlsf {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Tlsf")
            .field("fl_bitmap", &self.heap.index.fl_bitmap)
            .field("pools", &PoolMaps(self.pools()))
            .finish()
    }
}
