//! Shared, persistent, rate-limited queues.
//!
//! A queue is one bucket record in a shared store. Handles enqueue and dequeue
//! through single conditional updates against that record, so any number of
//! uncoordinated processes can use the same queue without client-side locks.
//! Two admission controls apply: a capacity limit on outstanding items and a
//! minimum interval between successful removals.

pub mod bucket;
pub mod config;

pub use bucket::{
    Applied, AtomicStore, BucketError, BucketOptions, BucketRecord, Created, End, Guard,
    LeakyBucket, MemoryStore, Mutation, Payload,
};
pub use bucket::{env_flag, env_u64};
