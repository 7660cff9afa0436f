//! Demonstrates the lifecycle of blocks in a `HandlePool`.
//!
//! This example creates a 1 MiB pool of 1 KiB blocks, allocates a few blocks, frees one of
//! them and shows that the freed handle is rejected while the others keep working.

use std::ptr::NonNull;

use handle_pool::{Error, HandlePool, PoolStats, Validation};

fn print_stats(stats: &PoolStats) {
    println!(
        "  Blocks: {} allocated, {} free of {}",
        stats.num_allocated,
        stats.free_blocks(),
        stats.num_blocks
    );
    println!(
        "  Bytes: {} used, {} free of {} (usage {:.3})",
        stats.used_size,
        stats.free_size(),
        stats.total_size,
        stats.usage_ratio()
    );
    println!("  Next sequence number: {}", stats.next_sequence);
}

fn main() -> Result<(), Error> {
    println!("=== HandlePool lifecycle ===");
    println!();

    let mut pool = HandlePool::builder()
        .total_size(1024 * 1024)
        .block_size(1024)
        .build()?;

    println!("Created pool:");
    print_stats(&pool.stats());
    println!();

    let first = pool.allocate()?;
    let second = pool.allocate()?;
    let third = pool.allocate()?;

    pool.block_mut(first)?.fill(1);
    pool.block_mut(second)?.fill(2);
    pool.block_mut(third)?.fill(3);

    println!("Allocated three blocks:");
    for handle in [first, second, third] {
        println!(
            "  {handle} -> {:?}",
            pool.resolve_pointer(handle).map(NonNull::as_ptr)
        );
    }
    print_stats(&pool.stats());
    println!();

    pool.free(second)?;
    let fourth = pool.allocate()?;

    println!("Freed {second} and allocated {fourth} in its place:");
    println!("  {second} validates as {:?}", pool.validate(second));
    println!("  {fourth} validates as {:?}", pool.validate(fourth));
    assert_eq!(pool.validate(second), Validation::NotFound);

    match pool.free(second) {
        Ok(()) => println!("  Freeing {second} again unexpectedly succeeded"),
        Err(error) => println!("  Freeing {second} again fails: {error}"),
    }

    let untouched = pool.block(third)?.iter().all(|&b| b == 3);
    println!("  Block of {third} still holds its data: {untouched}");
    println!();

    println!("Final state:");
    print_stats(&pool.stats());

    Ok(())
}
