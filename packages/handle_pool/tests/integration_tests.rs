//! Integration tests for the `handle_pool` package.
//!
//! These tests exercise `HandlePool` through its public API only, covering the allocation
//! lifecycle, handle validation and the byte layout of the arena.

#![allow(
    clippy::indexing_slicing,
    clippy::arithmetic_side_effects,
    clippy::undocumented_unsafe_blocks,
    clippy::cast_possible_truncation,
    reason = "tests focus on succinct code and do not need to tick all the boxes"
)]

use std::collections::HashSet;
use std::iter;
use std::sync::{Arc, Mutex};
use std::thread;

use handle_pool::{Error, HEADER_SIZE, Handle, HandlePool, PoolLayout, Validation};

fn pool(total_size: usize, block_size: usize) -> HandlePool {
    HandlePool::builder()
        .total_size(total_size)
        .block_size(block_size)
        .build()
        .unwrap()
}

#[test]
fn mebibyte_pool_scenario() {
    let mut pool = pool(1_048_576, 1024);

    // Several hundred blocks remain after the metadata overhead.
    assert!(pool.num_blocks() > 500);
    assert!(pool.num_blocks() < 1_048_576 / 1024);

    let first = pool.allocate().unwrap();
    let second = pool.allocate().unwrap();
    let third = pool.allocate().unwrap();

    let first_addr = pool.resolve_pointer(first).unwrap();
    let third_addr = pool.resolve_pointer(third).unwrap();

    pool.free(second).unwrap();
    let fourth = pool.allocate().unwrap();
    let fourth_addr = pool.resolve_pointer(fourth).unwrap();

    assert_ne!(fourth_addr, first_addr);
    assert_ne!(fourth_addr, third_addr);

    assert!(pool.resolve_pointer(second).is_none());
    assert_eq!(pool.num_allocated(), 3);
}

#[test]
fn allocate_then_free_restores_counters() {
    let mut pool = pool(16 * 1024, 64);

    let _keep = pool.allocate().unwrap();
    let allocated_before = pool.num_allocated();
    let used_before = pool.used_size();

    let handle = pool.allocate().unwrap();
    assert_eq!(pool.used_size(), used_before + 64);

    pool.free(handle).unwrap();

    assert_eq!(pool.num_allocated(), allocated_before);
    assert_eq!(pool.used_size(), used_before);
    assert!(matches!(
        pool.validate(handle),
        Validation::NotFound | Validation::NotAllocated
    ));
    assert!(pool.resolve_pointer(handle).is_none());
}

#[test]
fn live_handles_are_distinct_and_resolve_to_distinct_blocks() {
    let mut pool = pool(64 * 1024, 128);

    let num_blocks = pool.num_blocks();
    let handles: Vec<_> = iter::repeat_with(|| pool.allocate().unwrap())
        .take(num_blocks)
        .collect();

    let unique_handles: HashSet<_> = handles.iter().copied().collect();
    assert_eq!(unique_handles.len(), handles.len());

    let addresses: HashSet<_> = handles
        .iter()
        .map(|&h| pool.resolve_pointer(h).unwrap())
        .collect();
    assert_eq!(addresses.len(), handles.len());
}

#[test]
fn reuse_never_aliases_live_blocks() {
    let mut pool = pool(32 * 1024, 256);

    let mut live: Vec<Handle> = iter::repeat_with(|| pool.allocate().unwrap())
        .take(20)
        .collect();

    // Free every third block, then allocate the same number again.
    let freed: Vec<_> = live
        .iter()
        .copied()
        .enumerate()
        .filter(|(index, _)| index % 3 == 0)
        .map(|(_, handle)| handle)
        .collect();
    live.retain(|handle| !freed.contains(handle));

    for &handle in &freed {
        pool.free(handle).unwrap();
    }

    let live_addresses: HashSet<_> = live
        .iter()
        .map(|&h| pool.resolve_pointer(h).unwrap())
        .collect();

    for _ in 0..freed.len() {
        let handle = pool.allocate().unwrap();
        let address = pool.resolve_pointer(handle).unwrap();

        assert!(!live_addresses.contains(&address));
        assert!(!live.contains(&handle));
        live.push(handle);
    }

    // All old live handles still resolve to their original blocks.
    for &handle in &live {
        assert_eq!(pool.validate(handle), Validation::Valid);
    }
}

#[test]
fn full_pool_rejects_allocation_without_side_effects() {
    let mut pool = pool(4096, 256);

    while pool.num_allocated() < pool.num_blocks() {
        pool.allocate().unwrap();
    }

    let stats = pool.stats();
    assert!(matches!(pool.allocate(), Err(Error::PoolExhausted { .. })));
    assert_eq!(pool.stats(), stats);
}

#[test]
fn block_holds_exactly_block_size_bytes() {
    let mut pool = pool(8 * 1024, 100);

    let a = pool.allocate().unwrap();
    let b = pool.allocate().unwrap();

    let pattern: Vec<u8> = (0..100).map(|i| i as u8).collect();
    pool.block_mut(a).unwrap().copy_from_slice(&pattern);
    pool.block_mut(b).unwrap().fill(0xEE);

    assert_eq!(pool.block(a).unwrap(), &pattern[..]);
    assert_eq!(pool.block(a).unwrap().len(), 100);
    assert!(pool.block(b).unwrap().iter().all(|&x| x == 0xEE));
}

#[test]
fn pointer_writes_are_visible_through_block() {
    let mut pool = pool(8 * 1024, 32);
    let handle = pool.allocate().unwrap();

    let ptr = pool.resolve_pointer(handle).unwrap();
    for offset in 0..32 {
        unsafe { ptr.as_ptr().add(offset).write(offset as u8) };
    }

    let expected: Vec<u8> = (0..32).collect();
    assert_eq!(pool.block(handle).unwrap(), &expected[..]);
}

#[test]
fn freed_handles_are_rejected_everywhere() {
    let mut pool = pool(8 * 1024, 32);
    let handle = pool.allocate().unwrap();
    pool.free(handle).unwrap();

    assert!(matches!(
        pool.block(handle),
        Err(Error::HandleNotFound { .. })
    ));
    assert!(matches!(
        pool.block_mut(handle),
        Err(Error::HandleNotFound { .. })
    ));
    assert!(matches!(
        pool.free(handle),
        Err(Error::HandleNotFound { .. })
    ));
    assert_eq!(pool.num_allocated(), 0);
}

#[test]
fn invalid_handle_is_rejected() {
    let mut pool = pool(8 * 1024, 32);
    let _live = pool.allocate().unwrap();

    assert_eq!(pool.validate(Handle::INVALID), Validation::Invalid);
    assert!(matches!(
        pool.free(Handle::INVALID),
        Err(Error::InvalidHandle)
    ));
    assert!(pool.resolve_pointer(Handle::INVALID).is_none());
    assert_eq!(pool.num_allocated(), 1);
}

#[test]
fn only_the_salt_identifies_a_block() {
    let mut pool = pool(8 * 1024, 32);
    let handle = pool.allocate().unwrap();

    // The sequence half of a handle is not checked during resolution.
    let other_sequence = Handle::from_raw(handle.to_raw() ^ 0x0000_FFFF);
    assert_eq!(other_sequence.salt(), handle.salt());
    assert_eq!(pool.validate(other_sequence), Validation::Valid);

    // Any change to the salt half breaks resolution.
    let other_salt = Handle::from_raw(handle.to_raw() ^ 0x0001_0000);
    assert_ne!(pool.validate(other_salt), Validation::Valid);
}

#[test]
fn sequence_numbers_count_allocations() {
    let mut pool = pool(8 * 1024, 32);

    for expected in 1..=10_u16 {
        let handle = pool.allocate().unwrap();
        assert_eq!(handle.sequence(), expected);
        pool.free(handle).unwrap();
    }

    assert_eq!(pool.next_sequence(), 11);
}

#[test]
fn handle_space_runs_out_after_65535_allocations() {
    let mut pool = pool(2048, 256);

    for _ in 0..u16::MAX {
        let handle = pool.allocate().unwrap();
        pool.free(handle).unwrap();
    }

    assert_eq!(pool.next_sequence(), 0);
    assert!(matches!(pool.allocate(), Err(Error::HandleSpaceExhausted)));
    assert_eq!(pool.num_allocated(), 0);
}

#[test]
fn layout_is_reported_by_pool() {
    let pool = pool(1_048_576, 1024);
    let layout = pool.layout();

    assert_eq!(*layout, PoolLayout::plan(1_048_576, 1024).unwrap());
    assert_eq!(layout.bitmap_offset(), HEADER_SIZE);
    assert!(layout.bitmap_offset() < layout.handle_table_offset());
    assert!(layout.handle_table_offset() < layout.data_offset());
    assert!(layout.data_offset() + layout.num_blocks() * layout.block_size() <= pool.total_size());
    assert_eq!(pool.used_size(), HEADER_SIZE);
}

#[test]
fn per_block_allocation_bits() {
    let mut pool = pool(8 * 1024, 64);

    let a = pool.allocate().unwrap();
    let _b = pool.allocate().unwrap();
    pool.free(a).unwrap();

    assert_eq!(pool.is_block_allocated(0), Some(false));
    assert_eq!(pool.is_block_allocated(1), Some(true));
    assert_eq!(pool.is_block_allocated(2), Some(false));
    assert_eq!(pool.is_block_allocated(pool.num_blocks()), None);
}

#[test]
fn invalid_parameters_are_rejected() {
    for (total_size, block_size) in [(1024, 16), (100, 16), (4096, 0), (4096, 8192)] {
        let result = HandlePool::builder()
            .total_size(total_size)
            .block_size(block_size)
            .build();

        assert!(
            matches!(result, Err(Error::InvalidArgument { .. })),
            "({total_size}, {block_size}) was accepted"
        );
    }
}

#[test]
fn shared_behind_mutex() {
    let pool = Arc::new(Mutex::new(pool(64 * 1024, 64)));

    let workers: Vec<_> = (0..4)
        .map(|worker| {
            let pool = Arc::clone(&pool);

            thread::spawn(move || {
                for _ in 0..50 {
                    let mut pool = pool.lock().unwrap();
                    let handle = pool.allocate().unwrap();
                    pool.block_mut(handle).unwrap().fill(worker);
                    assert!(pool.block(handle).unwrap().iter().all(|&x| x == worker));
                    pool.free(handle).unwrap();
                }
            })
        })
        .collect();

    for worker in workers {
        worker.join().unwrap();
    }

    assert_eq!(pool.lock().unwrap().num_allocated(), 0);
}
