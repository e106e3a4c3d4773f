/// Failures surfaced by bucket handles.
///
/// An empty or throttled dequeue is not an error; it is reported as `Ok(None)`.
#[derive(thiserror::Error, Debug)]
pub enum BucketError {
    #[error("invalid bucket configuration: {0}")]
    Configuration(String),
    #[error("unable to push: bucket '{queue}' is at capacity (limit {limit}, batch {batch})")]
    Overflow {
        queue: String,
        limit: u64,
        batch: usize,
    },
    #[error("unable to push: at least one payload is required")]
    EmptyBatch,
    #[error("store error: {0:#}")]
    Store(#[source] anyhow::Error),
}

impl BucketError {
    pub fn is_overflow(&self) -> bool {
        matches!(self, BucketError::Overflow { .. })
    }
}
