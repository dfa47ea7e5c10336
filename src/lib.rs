//! parfor - ordered parallel map on a pool of worker threads
//!
//! Items are pushed onto a bounded queue, executed by a fixed set of workers and
//! collected by handle, so results can be retrieved in any order while new work
//! keeps arriving. A task that fails in a worker is replayed in the calling
//! thread on retrieval, which gives the caller the real error (or panic) to
//! debug instead of a summary from another thread.
//!
//! # Quick Start
//!
//! ```
//! use parfor_rs::prelude::*;
//!
//! let squares = pmap(|i: &u64, a: &(u64,), _: &()| Ok(a.0 * i * i), 0..10u64, (3,), ()).unwrap();
//! assert_eq!(squares[4], 48);
//!
//! let mut pool = Pool::from_fn(PoolConfig::default(), |i: &u64, _: &(), _: &()| Ok(i + 1)).unwrap();
//! let h = pool.submit(1).unwrap();
//! assert_eq!(pool.retrieve(h).unwrap(), 2);
//! ```
//!
//! # Features
//!
//! - **Bounded queues**: submission blocks, draining results, once the input queue holds three tasks per worker
//! - **Handle-indexed results**: submit now, retrieve later in any order
//! - **Descriptor cache**: each worker decodes a given set of arguments once
//! - **In-process retry**: failures are re-run where the caller can see them
//! - **Progress bars**: `indicatif` completion and buffer bars (feature `progress`)

#![warn(missing_debug_implementations)]

pub mod chunks;
pub mod codec;
pub mod config;
pub mod error;
pub mod executor;
pub mod map;
pub mod prelude;
pub mod telemetry;

// Re-export key types at crate root
pub use chunks::{chunks, chunks_many, Chunks, ChunksMany};
pub use config::{PoolConfig, PoolConfigBuilder, Workers};
pub use error::{BoxError, Error, Result};
pub use executor::{Handle, Overrides, Pool};
pub use map::{pmap, ParMap};
pub use telemetry::{CompletionMeter, DepthMeter, MetricsSnapshot, NoopMeter};
