#![cfg_attr(coverage_nightly, feature(coverage_attribute))]

//! A fixed-capacity pool of equal-size memory blocks that hands out opaque handles instead of
//! addresses.
//!
//! [`HandlePool`] reserves a single arena from the system allocator when it is built and
//! divides it into equal-size blocks. Allocating a block returns a [`Handle`], a 32-bit value
//! that must be resolved through the pool to reach the block. Once a block is freed, every copy
//! of its handle stops resolving, so use-after-free and double-free are reported as errors
//! instead of silently touching reused memory.
//!
//! # Key Features
//!
//! - **Single arena**: header, allocation bitmap, handle table and data live in one allocation
//!   whose layout is described by [`PoolLayout`]
//! - **Opaque handles**: a random 16-bit salt, unique among live allocations, plus a 16-bit
//!   allocation sequence number
//! - **Detected misuse**: invalid, stale and double-freed handles produce distinct [`Error`]s
//! - **No partial failure**: a failed operation leaves the pool exactly as it was
//! - **First-fit allocation**: the lowest-indexed free block is always chosen
//! - **Thread mobility**: the pool can be moved between threads (but not shared without
//!   synchronization)
//!
//! # Example
//!
//! ```
//! use handle_pool::{Error, HandlePool};
//!
//! let mut pool = HandlePool::builder()
//!     .total_size(1024 * 1024)
//!     .block_size(1024)
//!     .build()
//!     .unwrap();
//!
//! let first = pool.allocate().unwrap();
//! let second = pool.allocate().unwrap();
//!
//! pool.block_mut(first).unwrap().fill(1);
//! pool.free(second).unwrap();
//!
//! // A freed handle no longer resolves, whether to read, write or free again.
//! assert!(pool.resolve_pointer(second).is_none());
//! assert!(matches!(pool.free(second), Err(Error::HandleNotFound { .. })));
//!
//! // Live handles are unaffected.
//! assert!(pool.block(first).unwrap().iter().all(|&b| b == 1));
//! ```
//!
//! # Limits
//!
//! Every operation scans the pool linearly, which suits pools of up to a few thousand blocks.
//! A pool issues at most 65535 handles over its lifetime, after which allocation fails with
//! [`Error::HandleSpaceExhausted`]. The pool never grows and never moves its blocks.

mod arena;
mod bitmap;
mod builder;
mod drop_policy;
mod error;
mod handle;
mod handle_table;
mod layout;
mod pool;
mod salt;
mod stats;

pub(crate) use arena::*;
pub use builder::*;
pub use drop_policy::*;
pub use error::*;
pub use handle::*;
pub use layout::{HEADER_SIZE, MAX_POOL_SIZE, MIN_POOL_SIZE, PoolLayout};
pub use pool::{HandlePool, Validation};
pub(crate) use salt::*;
pub use stats::*;
