//! Suballocation of device memory blocks.
//!
//! A [`BlockPool`] owns blocks of one memory type, obtained from a
//! [`MemoryBackend`], and carves them into ranges for buffers and images.
//! Each block tracks its ranges with a [`BlockMetadata`] implementation,
//! which honours alignment and the buffer/image granularity rules.

use ash::vk;

pub type DeviceSize = vk::DeviceSize;

mod error;
pub use error::*;

mod kind;
pub use kind::*;

mod suballocation;
pub use suballocation::*;

mod corruption;
pub use corruption::*;

mod stats;
pub use stats::*;

mod metadata;
pub use metadata::*;

mod backend;
pub use backend::*;

mod desc;
pub use desc::*;

mod block;

mod pool;
pub use pool::*;

#[cfg(test)]
mod tests {
    use super::SuballocationKind::*;
    use super::*;
    use rand::rngs::StdRng;
    use rand::seq::SliceRandom;
    use rand::{Rng, SeedableRng};
    use std::sync::Arc;

    fn small_pool(block_size: u64, max_block_count: Option<usize>) -> BlockPool<HostMemoryBackend> {
        let desc = PoolDesc {
            block_size,
            block_size_granularity: 256,
            max_block_count,
            ..Default::default()
        };
        BlockPool::new(desc, HostMemoryBackend::new()).unwrap()
    }

    fn req(size: u64, alignment: u64, kind: SuballocationKind) -> AllocationRequest {
        AllocationRequest::new(size, alignment, kind)
    }

    fn assert_block_invariants(pool: &BlockPool<HostMemoryBackend>, block: BlockId, block_size: u64) {
        let subs = pool.suballocations(block).unwrap();
        let total: u64 = subs.iter().map(|s| s.size).sum();
        assert_eq!(total, block_size);
        for pair in subs.windows(2) {
            assert_eq!(pair[0].end(), pair[1].offset);
            assert!(!(pair[0].is_free() && pair[1].is_free()));
        }
    }

    #[test]
    fn freed_gap_is_reused_in_a_1k_block() {
        let pool = small_pool(1024, Some(1));
        let first = pool.allocate(&req(100, 16, Buffer)).unwrap();
        let second = pool.allocate(&req(100, 16, Buffer)).unwrap();
        assert_eq!(first.offset(), 0);
        assert_eq!(second.offset(), 112);

        pool.free(first).unwrap();
        let third = pool.allocate(&req(50, 16, Buffer)).unwrap();
        assert!(third.offset() + third.size() <= 112, "{third:?}");
        assert_eq!(third.offset(), 0);
        assert_block_invariants(&pool, third.block_id(), 1024);
    }

    #[test]
    fn out_of_memory_then_free_makes_room_in_same_block() {
        let pool = small_pool(1024, Some(1));
        let mut live = Vec::new();
        let err = loop {
            match pool.allocate(&req(100, 16, Buffer)) {
                Ok(a) => live.push(a),
                Err(e) => break e,
            }
        };
        assert_eq!(err, AllocError::OutOfMemory);
        assert!(err.is_recoverable());
        assert_eq!(live.len(), 9);
        assert_eq!(pool.block_count(), 1);

        let victim = live.remove(4);
        pool.free(victim).unwrap();
        let again = pool.allocate(&req(80, 16, Buffer)).unwrap();
        assert_eq!(pool.block_count(), 1);
        assert_eq!(again.block_id(), live[0].block_id());
        pool.validate().unwrap();
    }

    #[test]
    fn buffer_next_to_optimal_image_gets_page_padding() {
        let desc = PoolDesc {
            block_size: 8192,
            block_size_granularity: 1024,
            buffer_image_granularity: 1024,
            ..Default::default()
        };
        let pool = BlockPool::new(desc, HostMemoryBackend::new()).unwrap();
        let image = pool.allocate(&req(1000, 16, ImageOptimal)).unwrap();
        let buffer = pool.allocate(&req(64, 16, Buffer)).unwrap();

        assert_eq!(image.offset(), 0);
        assert_eq!(buffer.offset(), 1024);
        let image_last_page = (image.offset() + image.size() - 1) / 1024;
        assert_ne!(image_last_page, buffer.offset() / 1024);

        let subs = pool.suballocations(image.block_id()).unwrap();
        assert_eq!(subs[1], Suballocation::free(1000, 24));
    }

    #[test]
    fn allocate_free_allocate_reuses_offset() {
        let pool = small_pool(64 * 1024, None);
        let _keep = pool.allocate(&req(4000, 256, ImageLinear)).unwrap();
        for (size, alignment, kind) in [(100, 16, Buffer), (3000, 1024, ImageOptimal), (7, 1, Unknown)] {
            let a = pool.allocate(&req(size, alignment, kind)).unwrap();
            let offset = a.offset();
            pool.free(a).unwrap();
            let b = pool.allocate(&req(size, alignment, kind)).unwrap();
            assert_eq!(b.offset(), offset);
            pool.free(b).unwrap();
        }
    }

    #[test]
    fn oversized_request_gets_its_own_block() {
        let pool = small_pool(1024, None);
        let small = pool.allocate(&req(100, 16, Buffer)).unwrap();
        let big = pool.allocate(&req(5000, 16, Buffer)).unwrap();
        assert_ne!(small.block_id(), big.block_id());
        assert_eq!(pool.block_count(), 2);

        let stats = pool.statistics();
        assert_eq!(stats.block_count, 2);
        // 5000 rounded up to the 256 byte block granularity
        assert_eq!(stats.block_bytes, 1024 + 5120);
        assert_eq!(stats.allocation_bytes, 5100);
    }

    #[test]
    fn invalid_requests_are_fatal() {
        let pool = small_pool(1024, None);
        let err = pool.allocate(&req(64, 48, Buffer)).unwrap_err();
        assert_eq!(err, AllocError::InvalidAlignment(48));
        assert!(!err.is_recoverable());
        assert_eq!(pool.allocate(&req(0, 16, Buffer)).unwrap_err(), AllocError::ZeroSize);
        assert_eq!(pool.block_count(), 0);
    }

    #[test]
    fn random_workload_keeps_every_invariant() {
        let desc = PoolDesc {
            block_size: 16 * 1024,
            block_size_granularity: 1024,
            buffer_image_granularity: 512,
            ..Default::default()
        };
        let pool = BlockPool::new(desc, HostMemoryBackend::new()).unwrap();
        let kinds = [Unknown, Buffer, ImageUnknown, ImageLinear, ImageOptimal];
        let mut rng = StdRng::seed_from_u64(42);
        let mut live: Vec<Allocation> = Vec::new();

        for _ in 0..3000 {
            if live.is_empty() || rng.random_bool(0.55) {
                let alignment = 1u64 << rng.random_range(0..10u32);
                let request = req(
                    rng.random_range(1..=3000),
                    alignment,
                    kinds[rng.random_range(0..kinds.len())],
                );
                let a = pool.allocate(&request).unwrap();
                assert_eq!(a.offset() % alignment, 0);
                for other in live.iter().filter(|o| o.block_id() == a.block_id()) {
                    assert!(
                        a.offset() + a.size() <= other.offset()
                            || other.offset() + other.size() <= a.offset(),
                        "{a:?} overlaps {other:?}"
                    );
                }
                live.push(a);
            } else {
                live.shuffle(&mut rng);
                let victim = live.pop().unwrap();
                pool.free(victim).unwrap();
            }
        }

        pool.validate().unwrap();
        let stats = pool.statistics();
        assert_eq!(stats.allocation_count, live.len());
        assert_eq!(stats.allocation_bytes + stats.unused_bytes, stats.block_bytes);

        for a in live.drain(..) {
            pool.free(a).unwrap();
        }
        // one empty block is kept warm
        assert_eq!(pool.block_count(), 1);
        assert_eq!(pool.statistics().allocation_count, 0);
    }

    fn guarded_workload(metadata_kind: BlockMetadataKind, seed: u64) {
        let desc = PoolDesc {
            block_size: 16 * 1024,
            block_size_granularity: 1024,
            buffer_image_granularity: 256,
            metadata_kind,
            debug: DebugDesc {
                margin: 16,
                corruption_detection: true,
                initialize_allocations: true,
                ..Default::default()
            },
            ..Default::default()
        };
        let pool = BlockPool::new(desc, HostMemoryBackend::new()).unwrap();
        let kinds = [Unknown, Buffer, ImageUnknown, ImageLinear, ImageOptimal];
        let mut rng = StdRng::seed_from_u64(seed);
        let mut live: Vec<Allocation> = Vec::new();

        for _ in 0..1500 {
            if live.is_empty() || rng.random_bool(0.55) {
                let alignment = 1u64 << rng.random_range(0..8u32);
                let request = req(
                    rng.random_range(1..=2000),
                    alignment,
                    kinds[rng.random_range(0..kinds.len())],
                );
                let a = pool.allocate(&request).unwrap();
                assert_eq!(a.offset() % alignment, 0);

                // in bounds writes never trip the guards
                let range = pool.map(&a).unwrap();
                let value = rng.random::<u8>();
                unsafe { range.as_mut_slice() }.fill(value);
                pool.unmap(&a).unwrap();
                live.push(a);
            } else {
                let victim = live.swap_remove(rng.random_range(0..live.len()));
                pool.free(victim).unwrap();
            }
            pool.check_corruption().unwrap();
        }

        pool.validate().unwrap();
        for a in live.drain(..) {
            pool.free(a).unwrap();
            pool.check_corruption().unwrap();
        }
        assert_eq!(pool.statistics().allocation_count, 0);
    }

    #[test]
    fn random_workload_with_guards_on_generic_blocks() {
        guarded_workload(BlockMetadataKind::Generic, 7);
    }

    #[test]
    fn random_workload_with_guards_on_linear_blocks() {
        guarded_workload(BlockMetadataKind::Linear, 11);
    }

    #[test]
    fn shared_between_threads() {
        let desc = PoolDesc {
            block_size: 64 * 1024,
            block_size_granularity: 1024,
            ..Default::default()
        };
        let pool = Arc::new(BlockPool::new(desc, HostMemoryBackend::new()).unwrap());

        let workers: Vec<_> = (0..4u64)
            .map(|seed| {
                let pool = Arc::clone(&pool);
                std::thread::spawn(move || {
                    let mut rng = StdRng::seed_from_u64(seed);
                    let mut live = Vec::new();
                    for _ in 0..500 {
                        if live.is_empty() || rng.random_bool(0.5) {
                            let request = req(rng.random_range(1..=512), 16, Buffer);
                            live.push(pool.allocate(&request).unwrap());
                        } else {
                            let victim = live.swap_remove(rng.random_range(0..live.len()));
                            pool.free(victim).unwrap();
                        }
                    }
                    live
                })
            })
            .collect();

        let mut all: Vec<Allocation> = Vec::new();
        for worker in workers {
            all.extend(worker.join().unwrap());
        }
        pool.validate().unwrap();
        assert_eq!(pool.statistics().allocation_count, all.len());

        for (i, a) in all.iter().enumerate() {
            for b in &all[i + 1..] {
                if a.block_id() == b.block_id() {
                    assert!(a.offset() + a.size() <= b.offset() || b.offset() + b.size() <= a.offset());
                }
            }
        }
        for a in all {
            pool.free(a).unwrap();
        }
        pool.validate().unwrap();
    }
}
