//! Concurrent allocate/deallocate: no double issue, no lost blocks
//!
//! The free list has no ABA protection (see the `pool` module docs), so
//! concurrent pops are never interleaved with concurrent pushes here:
//! mixed workloads run in barrier-separated phases, or with one allocating
//! thread and many freeing threads.

use std::collections::HashSet;
use std::ptr::NonNull;
use std::sync::mpsc;
use std::sync::{Arc, Barrier};
use std::thread;

use blockpool::{BlockPool, PoolConfig, SystemSource, TrackedSource};
use parking_lot::Mutex;

const THREADS: usize = 8;
const CYCLES: usize = 300;

/// A pool block that may cross threads in these tests
#[derive(Clone, Copy)]
struct Block(NonNull<u8>);

// SAFETY: Blocks are plain memory owned by whichever thread holds the handle.
unsafe impl Send for Block {}

/// Stamps every word of a block with `tag`
unsafe fn stamp(block: NonNull<u8>, words: usize, tag: usize) {
    let ptr = block.as_ptr().cast::<usize>();
    for i in 0..words {
        unsafe { ptr.add(i).write(tag) };
    }
}

/// Checks that every word of a block still holds `tag`
unsafe fn intact(block: NonNull<u8>, words: usize, tag: usize) -> bool {
    let ptr = block.as_ptr().cast::<usize>();
    (0..words).all(|i| unsafe { ptr.add(i).read() } == tag)
}

fn tag(thread: usize, cycle: usize, n: usize) -> usize {
    thread * 1_000_000 + cycle * 8 + n + 1
}

#[test]
fn test_no_double_issue_across_phases() {
    let pool = Arc::new(BlockPool::with_config(PoolConfig::new(64, 16)).unwrap());
    let live = Arc::new(Mutex::new(HashSet::new()));
    let barrier = Arc::new(Barrier::new(THREADS));
    let words = pool.block_size() / size_of::<usize>();

    let handles: Vec<_> = (0..THREADS)
        .map(|t| {
            let pool = Arc::clone(&pool);
            let live = Arc::clone(&live);
            let barrier = Arc::clone(&barrier);
            thread::spawn(move || {
                for cycle in 0..CYCLES {
                    // Allocation phase: concurrent pops and growth only
                    let batch = 1 + (cycle + t) % 5;
                    let mut held = Vec::with_capacity(batch);
                    for n in 0..batch {
                        let block = pool.allocate().unwrap();
                        assert!(
                            live.lock().insert(block.as_ptr() as usize),
                            "block {block:p} issued twice"
                        );
                        let tag = tag(t, cycle, n);
                        unsafe { stamp(block, words, tag) };
                        held.push((block, tag));
                    }
                    barrier.wait();

                    // Release phase: concurrent pushes only
                    for (block, tag) in held {
                        assert!(
                            unsafe { intact(block, words, tag) },
                            "block {block:p} aliased"
                        );
                        assert!(live.lock().remove(&(block.as_ptr() as usize)));
                        unsafe { pool.deallocate(block) };
                    }
                    barrier.wait();
                }
            })
        })
        .collect();

    for handle in handles {
        handle.join().unwrap();
    }
    assert!(live.lock().is_empty());
}

#[test]
fn test_conservation_after_alternating_cycles() {
    let source = Arc::new(TrackedSource::new(SystemSource));
    let pool = Arc::new(
        BlockPool::with_source(PoolConfig::production(32, 4), Arc::clone(&source)).unwrap(),
    );
    let barrier = Arc::new(Barrier::new(THREADS));

    let handles: Vec<_> = (0..THREADS)
        .map(|_| {
            let pool = Arc::clone(&pool);
            let barrier = Arc::clone(&barrier);
            thread::spawn(move || {
                for _ in 0..CYCLES {
                    let block = pool.allocate().unwrap();
                    barrier.wait();
                    unsafe { pool.deallocate(block) };
                    barrier.wait();
                }
            })
        })
        .collect();

    for handle in handles {
        handle.join().unwrap();
    }

    let mut pool = Arc::try_unwrap(pool).expect("all workers joined");
    let chunks = pool.chunk_count();
    assert_eq!(chunks, source.reserved_chunks());
    assert_eq!(pool.free_list_len(), pool.block_count() * chunks);
    assert_eq!(pool.free_blocks(), pool.block_count() * chunks);
    // At most THREADS blocks are ever in use at once.
    assert_eq!(chunks, THREADS.div_ceil(pool.block_count()));

    drop(pool);
    assert_eq!(source.released_chunks(), source.reserved_chunks());
}

#[test]
fn test_concurrent_growth_reserves_only_needed_chunks() {
    let source = Arc::new(TrackedSource::new(SystemSource));
    let pool = Arc::new(
        BlockPool::with_source(PoolConfig::performance(16, 2), Arc::clone(&source)).unwrap(),
    );
    let barrier = Arc::new(Barrier::new(THREADS));
    let per_thread = 50;

    let handles: Vec<_> = (0..THREADS)
        .map(|_| {
            let pool = Arc::clone(&pool);
            let barrier = Arc::clone(&barrier);
            thread::spawn(move || {
                barrier.wait();
                (0..per_thread)
                    .map(|_| pool.allocate().unwrap().as_ptr() as usize)
                    .collect::<Vec<_>>()
            })
        })
        .collect();

    let mut all = HashSet::new();
    for handle in handles {
        for addr in handle.join().unwrap() {
            assert!(all.insert(addr), "address {addr:#x} issued twice");
            assert!(pool.owns(addr as *const u8));
        }
    }

    assert_eq!(all.len(), THREADS * per_thread);
    // Racing growers re-check the free list under the chunk lock, so every
    // registered chunk was needed.
    assert_eq!(pool.chunk_count(), source.reserved_chunks());
    assert_eq!(pool.chunk_count(), THREADS * per_thread / 2);
    assert_eq!(pool.free_blocks(), 0);

    drop(pool);
    assert_eq!(source.live_chunks(), 0);
}

#[test]
fn test_blocks_freed_on_other_threads() {
    let pool = Arc::new(BlockPool::with_config(PoolConfig::new(32, 8)).unwrap());
    let words = pool.block_size() / size_of::<usize>();
    let workers = 4;
    let per_worker = 2_000;

    let mut senders = Vec::with_capacity(workers);
    let handles: Vec<_> = (0..workers)
        .map(|_| {
            let (tx, rx) = mpsc::channel::<(Block, usize)>();
            senders.push(tx);
            let pool = Arc::clone(&pool);
            thread::spawn(move || {
                for (Block(block), tag) in rx {
                    assert!(unsafe { intact(block, words, tag) }, "block {block:p} aliased");
                    unsafe { pool.deallocate(block) };
                }
            })
        })
        .collect();

    // Only this thread pops; workers only push.
    for i in 0..workers * per_worker {
        let block = pool.allocate().unwrap();
        let tag = tag(0, i, 0);
        unsafe { stamp(block, words, tag) };
        senders[i % workers].send((Block(block), tag)).unwrap();
    }
    drop(senders);

    for handle in handles {
        handle.join().unwrap();
    }

    let mut pool = Arc::try_unwrap(pool).expect("all workers joined");
    let capacity = pool.capacity();
    assert_eq!(pool.free_list_len(), capacity);
    assert_eq!(pool.allocated_blocks(), 0);
}
