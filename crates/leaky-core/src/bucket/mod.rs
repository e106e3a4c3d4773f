mod error;
mod handle;
mod memory;
mod options;
mod store;
mod types;

pub use error::BucketError;
pub use handle::LeakyBucket;
pub use memory::MemoryStore;
pub use options::{
    env_flag, env_u64, BucketOptions, DEFAULT_LIMIT, DEFAULT_QUEUE, MAX_QUEUE_NAME_LEN,
};
pub use store::AtomicStore;
pub use types::{Applied, BucketRecord, Created, End, Guard, Mutation, Payload};
