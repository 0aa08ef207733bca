use core::ptr::NonNull;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use crate::{AllocError, MemorySpan, PoolError, MIN_BLOCK_BYTES, MIN_POOL_BYTES, UNIT};

/// Leaks a word-aligned buffer of at least `bytes` bytes.
fn span(bytes: usize) -> MemorySpan {
    let words = (bytes + UNIT - 1) / UNIT;
    let mem = vec![0usize; words].into_boxed_slice();
    let ptr = NonNull::new(Box::into_raw(mem) as *mut u8).unwrap();

    unsafe { MemorySpan::new(ptr, words * UNIT) }
}

fn paint(p: NonNull<u8>, len: usize, tag: u8) {
    unsafe { core::ptr::write_bytes(p.as_ptr(), tag, len) }
}

fn check(p: NonNull<u8>, len: usize, tag: u8) {
    let bytes = unsafe { core::slice::from_raw_parts(p.as_ptr(), len) };
    assert!(
        bytes.iter().all(|&b| b == tag),
        "payload at {:p} lost its contents",
        p
    );
}

fn assert_no_overlap(live: &[(NonNull<u8>, usize, u8)]) {
    let mut ranges: Vec<(usize, usize)> = live
        .iter()
        .map(|&(p, len, _)| (p.as_ptr() as usize, len))
        .collect();
    ranges.sort();

    for pair in ranges.windows(2) {
        assert!(
            pair[0].0 + pair[0].1 <= pair[1].0,
            "allocations overlap: {:?}",
            pair
        );
    }
}

macro_rules! policy_suite {
    ($name:ident, $ty:ty) => {
        mod $name {
            use super::*;
            use crate::BlockInfo;

            fn heap() -> $ty {
                <$ty>::new()
            }

            fn blocks(h: &$ty) -> Vec<BlockInfo> {
                let mut all = Vec::new();
                for pool in h.pools() {
                    all.extend(pool.blocks());
                }
                all
            }

            fn free_blocks(h: &$ty) -> usize {
                blocks(h).iter().filter(|b| !b.allocated).count()
            }

            /// Walks every pool and checks the §-invariants the boundary
            /// tags must uphold: contiguity, PREV_ALLOC mirroring and
            /// maximal coalescing.
            fn assert_coalesced(h: &$ty) {
                for pool in h.pools() {
                    let infos: Vec<BlockInfo> = pool.blocks().collect();
                    let total: usize = infos.iter().map(|b| b.size).sum();
                    assert_eq!(total, pool.usable_bytes());
                    assert!(infos[0].prev_allocated);

                    for pair in infos.windows(2) {
                        assert_eq!(pair[1].addr, pair[0].addr + pair[0].size);
                        assert_eq!(pair[1].prev_allocated, pair[0].allocated);
                        assert!(
                            pair[0].allocated || pair[1].allocated,
                            "adjacent free blocks: {:?}",
                            pair
                        );
                    }
                }
            }

            #[test]
            fn fresh_pool_accounting() {
                let mut h = heap();
                let usable = h.add_pool(span(4096)).unwrap();

                let infos = blocks(&h);
                assert_eq!(infos.len(), 1);
                assert_eq!(infos[0].size, usable);
                assert!(!infos[0].allocated);
                assert!(infos[0].prev_allocated);
            }

            #[test]
            fn min_pool_boundary() {
                let mut h = heap();
                let usable = h.add_pool(span(MIN_POOL_BYTES)).unwrap();
                assert_eq!(usable, MIN_BLOCK_BYTES);

                // the single minimal block is usable
                let p = h.allocate(1).unwrap();
                assert!(h.allocate(1).is_err());
                unsafe { h.free(p) };
                assert_eq!(free_blocks(&h), 1);
            }

            #[test]
            fn pool_too_small() {
                let mut h = heap();
                assert_eq!(
                    h.add_pool(span(MIN_POOL_BYTES - UNIT)),
                    Err(PoolError::TooSmall)
                );
                assert_eq!(h.pools().count(), 0);
            }

            #[test]
            fn unaligned_span() {
                let raw = span(2048);
                let skewed = unsafe {
                    MemorySpan::new(
                        NonNull::new_unchecked(raw.as_ptr().add(1)),
                        raw.len() - 3,
                    )
                };

                let mut h = heap();
                let usable = h.add_pool(skewed).unwrap();
                assert!(usable > 1024);

                let p = h.allocate(100).unwrap();
                assert_eq!(p.as_ptr() as usize % UNIT, 0);
                unsafe { h.free(p) };
                assert_coalesced(&h);
            }

            #[test]
            fn alloc_reuse() {
                let mut h = heap();
                h.add_pool(span(4096)).unwrap();

                // X ~
                let x = h.allocate(1).unwrap();
                // X Y ~
                let y = h.allocate(1).unwrap();

                // (X) Y ~
                unsafe { h.free(x) };
                assert_eq!(free_blocks(&h), 2);

                // Z Y ~ (reclaims the freed `x` block)
                let z = h.allocate(1).unwrap();
                assert_eq!(z, x);
                assert_eq!(free_blocks(&h), 1);

                unsafe {
                    h.free(y);
                    h.free(z);
                }
                assert_eq!(free_blocks(&h), 1);
            }

            #[test]
            fn middle_block_reuse() {
                let mut h = heap();
                h.add_pool(span(4096)).unwrap();

                let a = h.allocate(128).unwrap();
                let b = h.allocate(64).unwrap();
                let c = h.allocate(64).unwrap();

                unsafe { h.free(b) };
                assert_coalesced(&h);

                // must land in the freed middle block, not further into
                // the pool
                let d = h.allocate(40).unwrap();
                assert_eq!(d, b);

                unsafe {
                    h.free(a);
                    h.free(c);
                    h.free(d);
                }
                let infos = blocks(&h);
                assert_eq!(infos.len(), 1);
                assert!(!infos[0].allocated);
                assert!(infos[0].prev_allocated);
            }

            #[test]
            fn merge_prev() {
                let mut h = heap();
                h.add_pool(span(4096)).unwrap();

                let x = h.allocate(64).unwrap();
                let y = h.allocate(64).unwrap();
                let _z = h.allocate(64).unwrap();

                // (X) Y Z ~
                unsafe { h.free(x) };
                assert_eq!(free_blocks(&h), 2);

                // (X<-Y) Z ~
                unsafe { h.free(y) };
                assert_eq!(free_blocks(&h), 2);
                assert_coalesced(&h);
            }

            #[test]
            fn merge_next() {
                let mut h = heap();
                h.add_pool(span(4096)).unwrap();

                let x = h.allocate(64).unwrap();
                let y = h.allocate(64).unwrap();
                let _z = h.allocate(64).unwrap();

                // X (Y) Z ~
                unsafe { h.free(y) };
                assert_eq!(free_blocks(&h), 2);

                // (X->Y) Z ~
                unsafe { h.free(x) };
                assert_eq!(free_blocks(&h), 2);
                assert_coalesced(&h);
            }

            #[test]
            fn merge_both() {
                let mut h = heap();
                h.add_pool(span(4096)).unwrap();

                let x = h.allocate(64).unwrap();
                let y = h.allocate(64).unwrap();
                let z = h.allocate(64).unwrap();
                let _w = h.allocate(64).unwrap();

                unsafe { h.free(x) };
                assert_eq!(free_blocks(&h), 2);
                unsafe { h.free(z) };
                assert_eq!(free_blocks(&h), 3);

                // freeing the middle of (X) Y (Z) collapses all three
                unsafe { h.free(y) };
                assert_eq!(free_blocks(&h), 2);
                assert_coalesced(&h);
            }

            #[test]
            fn empty_in_any_order() {
                let mut h = heap();
                let usable = h.add_pool(span(4096)).unwrap();

                let mut ptrs = Vec::new();
                loop {
                    match h.allocate(100) {
                        Ok(p) => ptrs.push(p),
                        Err(AllocError::OutOfMemory) => break,
                        Err(e) => panic!("unexpected error: {}", e),
                    }
                }
                assert!(ptrs.len() > 2);

                // evens first, then odds
                for (i, p) in ptrs.iter().enumerate() {
                    if i % 2 == 0 {
                        unsafe { h.free(*p) };
                    }
                }
                for (i, p) in ptrs.iter().enumerate() {
                    if i % 2 != 0 {
                        unsafe { h.free(*p) };
                    }
                }

                let infos = blocks(&h);
                assert_eq!(infos.len(), 1);
                assert_eq!(infos[0].size, usable);
                assert!(!infos[0].allocated);
                assert!(infos[0].prev_allocated);
            }

            #[test]
            fn no_overlap() {
                let mut h = heap();
                h.add_pool(span(4096)).unwrap();

                let mut live = Vec::new();
                for (i, len) in [16usize, 32, 64, 128, 256].iter().enumerate() {
                    let p = h.allocate(*len).unwrap();
                    paint(p, *len, i as u8);
                    live.push((p, *len, i as u8));
                }
                assert_no_overlap(&live);

                for (p, len, tag) in live {
                    check(p, len, tag);
                    unsafe { h.free(p) };
                }
                assert_eq!(free_blocks(&h), 1);
            }

            #[test]
            fn zero_len_allocations() {
                let mut h = heap();
                h.add_pool(span(4096)).unwrap();

                let p = h.allocate(0).unwrap();
                let q = h.allocate(0).unwrap();
                assert_ne!(p, q);

                unsafe {
                    h.free(p);
                    h.free(q);
                }
                assert_eq!(free_blocks(&h), 1);
            }

            #[test]
            fn resize_grow_in_place() {
                let mut h = heap();
                h.add_pool(span(4096)).unwrap();

                let p = h.allocate(64).unwrap();
                paint(p, 64, 0xa5);

                // the right neighbor is the pool's free tail, so growth
                // happens in place
                let q = unsafe { h.resize(Some(p), 200) }.unwrap().unwrap();
                assert_eq!(q, p);
                check(q, 64, 0xa5);
                assert_coalesced(&h);

                unsafe { h.free(q) };
            }

            #[test]
            fn resize_relocates_and_preserves() {
                let mut h = heap();
                h.add_pool(span(4096)).unwrap();

                let p = h.allocate(64).unwrap();
                paint(p, 64, 0x5a);
                let blocker = h.allocate(64).unwrap();

                let q = unsafe { h.resize(Some(p), 1024) }.unwrap().unwrap();
                assert_ne!(q, p);
                check(q, 64, 0x5a);
                assert_coalesced(&h);

                unsafe {
                    h.free(blocker);
                    h.free(q);
                }
                assert_eq!(free_blocks(&h), 1);
            }

            #[test]
            fn resize_shrink_keeps_pointer() {
                let mut h = heap();
                h.add_pool(span(4096)).unwrap();

                let p = h.allocate(512).unwrap();
                paint(p, 64, 0x3c);

                let q = unsafe { h.resize(Some(p), 64) }.unwrap().unwrap();
                assert_eq!(q, p);
                check(q, 64, 0x3c);
                // the carved-off excess rejoined the pool's free tail
                assert_eq!(free_blocks(&h), 1);
                assert_coalesced(&h);

                unsafe { h.free(q) };
            }

            #[test]
            fn resize_zero_frees() {
                let mut h = heap();
                h.add_pool(span(4096)).unwrap();

                let p = h.allocate(128).unwrap();
                assert_eq!(unsafe { h.resize(Some(p), 0) }, Ok(None));
                assert_eq!(free_blocks(&h), 1);

                // the same address may be handed out again
                let q = h.allocate(128).unwrap();
                assert_eq!(q, p);
                unsafe { h.free(q) };
            }

            #[test]
            fn resize_none_allocates() {
                let mut h = heap();
                h.add_pool(span(4096)).unwrap();

                let p = unsafe { h.resize(None, 100) }.unwrap().unwrap();
                assert_eq!(p.as_ptr() as usize % UNIT, 0);
                unsafe { h.free(p) };
            }

            #[test]
            fn size_overflow() {
                let mut h = heap();
                h.add_pool(span(4096)).unwrap();

                assert_eq!(
                    h.allocate(usize::max_value()),
                    Err(AllocError::SizeOverflow)
                );
                assert_eq!(
                    h.allocate(usize::max_value() - UNIT),
                    Err(AllocError::SizeOverflow)
                );

                let p = h.allocate(16).unwrap();
                assert_eq!(
                    unsafe { h.resize(Some(p), usize::max_value()) },
                    Err(AllocError::SizeOverflow)
                );
                // the failed resize left the allocation untouched
                unsafe { h.free(p) };
                assert_eq!(free_blocks(&h), 1);
            }

            #[test]
            fn oom_without_grow() {
                let mut h = heap();
                assert_eq!(h.allocate(1), Err(AllocError::OutOfMemory));

                let usable = h.add_pool(span(4096)).unwrap();
                assert_eq!(h.allocate(2 * usable), Err(AllocError::OutOfMemory));

                // failure is clean: the pool still serves requests
                let p = h.allocate(64).unwrap();
                unsafe { h.free(p) };
            }

            fn grower(min_bytes: usize) -> Option<MemorySpan> {
                Some(span(min_bytes))
            }

            fn no_memory(_min_bytes: usize) -> Option<MemorySpan> {
                None
            }

            #[test]
            fn grow_callback() {
                let mut h = <$ty>::with_grow(grower);

                let p = h.allocate(100).unwrap();
                assert_eq!(h.pools().count(), 1);

                // exceeds the first pool; grows exactly once more
                let q = h.allocate(100_000).unwrap();
                assert_eq!(h.pools().count(), 2);

                unsafe {
                    h.free(p);
                    h.free(q);
                }
                assert_coalesced(&h);
            }

            #[test]
            fn grow_callback_fails() {
                let mut h = <$ty>::with_grow(no_memory);
                assert_eq!(h.allocate(1), Err(AllocError::OutOfMemory));
                assert_eq!(h.pools().count(), 0);
            }

            #[test]
            fn grow_min_respected() {
                let mut h = <$ty>::with_grow(grower);
                h.set_grow_min(1 << 16);

                h.allocate(8).unwrap();
                let pool = h.pools().next().unwrap();
                assert!(pool.total_bytes() >= 1 << 16);
            }

            #[test]
            fn random_stress() {
                let mut rng = StdRng::seed_from_u64(0x5eed_cafe);
                let mut h = heap();
                h.add_pool(span(1 << 16)).unwrap();

                let mut live: Vec<(NonNull<u8>, usize, u8)> = Vec::new();
                for step in 0..1500 {
                    match rng.gen_range(0..4u32) {
                        0 | 1 => {
                            let len = rng.gen_range(1..600);
                            let tag = rng.gen::<u8>();
                            if let Ok(p) = h.allocate(len) {
                                assert_eq!(p.as_ptr() as usize % UNIT, 0);
                                paint(p, len, tag);
                                live.push((p, len, tag));
                            }
                        }
                        2 if !live.is_empty() => {
                            let i = rng.gen_range(0..live.len());
                            let (p, len, tag) = live.swap_remove(i);
                            check(p, len, tag);
                            unsafe { h.free(p) };
                        }
                        3 if !live.is_empty() => {
                            let i = rng.gen_range(0..live.len());
                            let (p, len, tag) = live[i];
                            let new_len = rng.gen_range(1..900);
                            if let Ok(Some(q)) = unsafe { h.resize(Some(p), new_len) } {
                                check(q, if len < new_len { len } else { new_len }, tag);
                                paint(q, new_len, tag);
                                live[i] = (q, new_len, tag);
                            }
                        }
                        _ => {}
                    }

                    if step % 128 == 0 {
                        assert_coalesced(&h);
                        assert_no_overlap(&live);
                    }
                }

                for (p, len, tag) in live.drain(..) {
                    check(p, len, tag);
                    unsafe { h.free(p) };
                }
                let infos = blocks(&h);
                assert_eq!(infos.len(), 1);
                assert!(!infos[0].allocated);
            }
        }
    };
}

policy_suite!(first_fit, crate::FirstFit);
policy_suite!(tlsf, crate::Tlsf);

mod tlsf_index {
    use super::*;
    use crate::Tlsf;

    #[test]
    fn bitmaps_track_buckets() {
        let mut h = Tlsf::new();
        h.add_pool(span(1 << 14)).unwrap();
        h.assert_index_consistent();

        let mut ptrs = Vec::new();
        for &len in &[24usize, 100, 500, 2000, 60, 60, 300] {
            ptrs.push(h.allocate(len).unwrap());
            h.assert_index_consistent();
        }
        for &p in ptrs.iter().step_by(2) {
            unsafe { h.free(p) };
            h.assert_index_consistent();
        }
        for &p in ptrs.iter().skip(1).step_by(2) {
            unsafe { h.free(p) };
            h.assert_index_consistent();
        }
    }

    #[test]
    fn bitmaps_under_stress() {
        let mut rng = StdRng::seed_from_u64(7);
        let mut h = Tlsf::new();
        h.add_pool(span(1 << 15)).unwrap();

        let mut live: Vec<(NonNull<u8>, usize)> = Vec::new();
        for _ in 0..400 {
            if rng.gen_bool(0.6) || live.is_empty() {
                let len = rng.gen_range(1..2048);
                if let Ok(p) = h.allocate(len) {
                    live.push((p, len));
                }
            } else {
                let i = rng.gen_range(0..live.len());
                let (p, _) = live.swap_remove(i);
                unsafe { h.free(p) };
            }
            h.assert_index_consistent();
        }

        for (p, _) in live.drain(..) {
            unsafe { h.free(p) };
        }
        h.assert_index_consistent();
    }
}
