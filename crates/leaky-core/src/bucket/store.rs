use super::types::{Applied, BucketRecord, Created, Guard, Mutation};

/// Backing store shared by every handle of a queue.
///
/// Implementations must evaluate `guard` and apply `mutation` as one
/// indivisible step per record; handles never lock and never read-then-write.
#[async_trait::async_trait]
pub trait AtomicStore: Send + Sync {
    /// Insert `record` unless a record with the same name already exists.
    async fn create_unique_if_absent(&self, record: BucketRecord) -> anyhow::Result<Created>;
    /// Apply `mutation` to the named record if `guard` matches; `None` on no-match.
    async fn conditional_update(
        &self,
        name: &str,
        guard: Guard,
        mutation: Mutation,
    ) -> anyhow::Result<Option<Applied>>;
    /// Read the named record without modifying it.
    async fn load(&self, name: &str) -> anyhow::Result<Option<BucketRecord>>;
}
