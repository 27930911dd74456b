//! Key-value store adapter for MediaFlipper.
//!
//! Everything the job system persists goes through the [`Store`] trait:
//! string records, lists (queues), sets and sorted sets (indices), plus
//! [`Pipeline`] batches for bulk writes. Two implementations ship here:
//! - [`RedisStore`] over a multiplexed async Redis connection
//! - [`MemoryStore`] in-process, for tests and single-node runs

pub mod error;
pub mod keys;
pub mod memory;
pub mod redis_store;
pub mod store;

pub use error::{StoreError, StoreResult};
pub use keys::{KeySpace, DEFAULT_PREFIX};
pub use memory::MemoryStore;
pub use redis_store::RedisStore;
pub use store::{escape_glob, Pipeline, PipelineOp, Store};
