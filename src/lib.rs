//! A pool-based boundary-tag memory sub-allocator with two interchangeable
//! policies sharing one block representation
//!
//! # Features
//!
//! - Carves caller-supplied contiguous memory regions ("pools") into
//!   variable-size blocks and serves `allocate` / `free` / `resize`
//!   requests from them; the crate never calls an OS allocation primitive
//!
//! - Two policies over the same boundary-tag block layout:
//!   [`FirstFit`], a single free list with a rotating search cursor, and
//!   [`Tlsf`], a Two-Level Segregated Fit index with bounded-time
//!   allocation and free (WCET analysis friendly)
//!
//! - One word of metadata (overhead) per allocation
//!
//! - Eager coalescing: no free block ever has a free neighbor, so
//!   fragmentation is bounded by the allocation pattern alone
//!
//! - An optional grow callback supplies fresh pools on exhaustion, keeping
//!   the policy for *when* to request more backing memory out of the core
//!
//! # Example
//!
//! ```
//! use dynmem::{MemorySpan, Tlsf};
//!
//! // any exclusively-owned span works; a leaked heap buffer keeps the
//! // example self-contained
//! let memory: &'static mut [u8] = Box::leak(vec![0u8; 4096].into_boxed_slice());
//!
//! let mut heap = Tlsf::new();
//! heap.add_pool(MemorySpan::from_slice(memory)).unwrap();
//!
//! let p = heap.allocate(100).unwrap();
//! // ... use the 100 bytes at `p` ...
//! unsafe { heap.free(p) };
//! ```
//!
//! # Block layout
//!
//! Every block starts with a one-word boundary tag: its total span in
//! bytes, with the two low bits (freed by unit alignment) holding "this
//! block is allocated" and "the block to my left is allocated". Free
//! blocks also carry a footer copy of the size in their last word and an
//! intrusive list node in their first payload word, so coalescing in both
//! directions is O(1) with no out-of-band index. A zero-size allocated
//! sentinel terminates each pool.
//!
//! # Concurrency
//!
//! None. An allocator instance has exactly one logical owner; share it
//! across threads only behind an external lock (e.g. `spin::Mutex`). No
//! operation blocks or suspends.
//!
//! # References
//!
//! 1. [TLSF: a New Dynamic Memory Allocator for Real-Time Systems][0]
//! 2. [Implementation of a constant-time dynamic storage allocator][1]
//!
//! [0]: http://wks.gii.upv.es/tlsf/files/ecrts04_tlsf_0.pdf
//! [1]: http://www.gii.upv.es/tlsf/files/spe_2008.pdf

#![cfg_attr(not(test), no_std)]
#![deny(missing_docs)]
#![deny(rust_2018_idioms)]

use core::fmt;
use core::ptr::NonNull;

pub use crate::consts::{DEFAULT_GROW_BYTES, MIN_BLOCK_BYTES, UNIT};
pub use crate::first_fit::FirstFit;
pub use crate::pool::{BlockInfo, Blocks, Pool, Pools, MIN_POOL_BYTES};
pub use crate::tlsf::Tlsf;

mod block;
mod consts;
mod engine;
mod first_fit;
mod heap;
mod pool;
#[cfg(test)]
mod tests;
mod tlsf;
mod units;
mod util;

/// An exclusive span of raw memory donated to an allocator.
#[derive(Debug)]
pub struct MemorySpan {
    ptr: NonNull<u8>,
    len: usize,
}

impl MemorySpan {
    /// Wraps `len` bytes starting at `ptr`.
    ///
    /// # Safety
    ///
    /// `[ptr, ptr + len)` must be valid for reads and writes, and nothing
    /// else may touch it for as long as the receiving allocator (or any
    /// allocation served from it) is live.
    pub unsafe fn new(ptr: NonNull<u8>, len: usize) -> Self {
        MemorySpan { ptr, len }
    }

    /// Wraps a static byte slice. Exclusive ownership for any lifetime is
    /// guaranteed by the `&'static mut` borrow.
    pub fn from_slice(mem: &'static mut [u8]) -> Self {
        let len = mem.len();
        let ptr = unsafe { NonNull::new_unchecked(mem.as_mut_ptr()) };

        MemorySpan { ptr, len }
    }

    /// The span's base address.
    pub fn as_ptr(&self) -> *mut u8 {
        self.ptr.as_ptr()
    }

    /// The span's length in bytes.
    pub fn len(&self) -> usize {
        self.len
    }

    /// Whether the span is empty.
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }
}

/// Callback used to obtain more backing memory when every pool is
/// exhausted: given the minimum number of bytes that would satisfy the
/// pending request, it returns a span to register as a new pool, or `None`.
///
/// The callback must not call back into the allocator that invoked it.
pub type GrowFn = fn(min_bytes: usize) -> Option<MemorySpan>;

/// Why a span could not be registered as a pool.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "ufmt", derive(ufmt::derive::uDebug))]
pub enum PoolError {
    /// The span cannot hold the pool header, one minimal block and the
    /// trailing sentinel. Nothing was registered.
    TooSmall,
}

impl fmt::Display for PoolError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PoolError::TooSmall => f.write_str("memory span too small to hold a pool"),
        }
    }
}

/// Why an allocation request failed. In either case the allocator's state
/// is exactly what it was before the call.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "ufmt", derive(ufmt::derive::uDebug))]
pub enum AllocError {
    /// The request, once padded with block overhead and unit-rounded,
    /// exceeds the platform's size representation.
    SizeOverflow,
    /// No free block satisfies the request and the grow callback (if any)
    /// could not supply more memory.
    OutOfMemory,
}

impl fmt::Display for AllocError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AllocError::SizeOverflow => f.write_str("requested size overflows"),
            AllocError::OutOfMemory => f.write_str("out of memory"),
        }
    }
}
