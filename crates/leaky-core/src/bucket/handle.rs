use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use chrono::Utc;
use leaky_events::{topics, Bus};
use serde_json::json;
use uuid::Uuid;

use super::error::BucketError;
use super::options::BucketOptions;
use super::store::AtomicStore;
use super::types::{BucketRecord, Created, End, Guard, Mutation, Payload};

/// Client handle onto one named bucket in a shared store.
///
/// Any number of handles, in any number of processes, may point at the same
/// queue. Every operation is a single conditional update against the store;
/// the handle itself holds no lock and caches nothing but the primed flag.
pub struct LeakyBucket<S: AtomicStore + ?Sized> {
    store: Arc<S>,
    options: BucketOptions,
    handle_id: String,
    primed: AtomicBool,
    bus: Option<Bus>,
}

impl<S: AtomicStore + ?Sized> LeakyBucket<S> {
    pub fn new(store: Arc<S>, options: BucketOptions) -> Result<Self, BucketError> {
        options.validate()?;
        Ok(Self {
            store,
            options,
            handle_id: Uuid::new_v4().to_string(),
            primed: AtomicBool::new(false),
            bus: None,
        })
    }

    /// Publish bucket events on `bus` in addition to logging them.
    pub fn with_bus(mut self, bus: Bus) -> Self {
        self.bus = Some(bus);
        self
    }

    pub fn options(&self) -> &BucketOptions {
        &self.options
    }

    pub fn queue(&self) -> &str {
        &self.options.queue
    }

    pub fn handle_id(&self) -> &str {
        &self.handle_id
    }

    pub fn is_primed(&self) -> bool {
        self.primed.load(Ordering::Acquire)
    }

    /// Ensure the bucket record exists. Losing a creation race counts as success.
    pub async fn prime(&self) -> Result<(), BucketError> {
        if self.is_primed() {
            return Ok(());
        }
        let record = BucketRecord::fresh(self.options.queue.clone(), Utc::now());
        let created = self
            .store
            .create_unique_if_absent(record)
            .await
            .map_err(BucketError::Store)?;
        match created {
            Created::Inserted => tracing::info!(
                queue = %self.options.queue,
                handle = %self.handle_id,
                "bucket created"
            ),
            Created::AlreadyExists => tracing::debug!(
                queue = %self.options.queue,
                handle = %self.handle_id,
                "bucket already exists"
            ),
        }
        self.primed.store(true, Ordering::Release);
        self.publish(
            topics::TOPIC_BUCKET_PRIMED,
            json!({
                "queue": self.options.queue,
                "handle": self.handle_id,
                "created": created == Created::Inserted,
            }),
        );
        Ok(())
    }

    /// Append `items` to the tail in order; returns the new item count.
    pub async fn push(&self, items: Vec<Payload>) -> Result<u64, BucketError> {
        self.enqueue(End::Tail, items).await
    }

    /// Prepend `items` to the head, keeping their order; returns the new item count.
    pub async fn unshift(&self, items: Vec<Payload>) -> Result<u64, BucketError> {
        self.enqueue(End::Head, items).await
    }

    pub async fn push_one(&self, item: impl Into<Payload>) -> Result<u64, BucketError> {
        self.push(vec![item.into()]).await
    }

    pub async fn unshift_one(&self, item: impl Into<Payload>) -> Result<u64, BucketError> {
        self.unshift(vec![item.into()]).await
    }

    /// Remove one item from the tail. `None` when empty or still throttled.
    pub async fn pop(&self) -> Result<Option<Payload>, BucketError> {
        self.dequeue(End::Tail).await
    }

    /// Remove one item from the head. `None` when empty or still throttled.
    pub async fn shift(&self) -> Result<Option<Payload>, BucketError> {
        self.dequeue(End::Head).await
    }

    /// Current record as seen by the store, without priming.
    pub async fn snapshot(&self) -> Result<Option<BucketRecord>, BucketError> {
        self.store
            .load(&self.options.queue)
            .await
            .map_err(BucketError::Store)
    }

    fn admission_guard(&self, batch: usize) -> Guard {
        let limit = self.options.limit;
        if self.options.strict_capacity {
            // count + batch <= limit
            Guard::admit_below(limit.saturating_add(1).saturating_sub(batch as u64))
        } else {
            Guard::admit_below(limit)
        }
    }

    async fn enqueue(&self, end: End, items: Vec<Payload>) -> Result<u64, BucketError> {
        if items.is_empty() {
            return Err(BucketError::EmptyBatch);
        }
        self.prime().await?;
        let batch = items.len();
        let guard = self.admission_guard(batch);
        let applied = self
            .store
            .conditional_update(&self.options.queue, guard, Mutation::Insert { end, items })
            .await
            .map_err(BucketError::Store)?;
        match applied {
            Some(applied) => {
                let count = applied.record.count;
                tracing::debug!(
                    queue = %self.options.queue,
                    handle = %self.handle_id,
                    end = end.as_str(),
                    batch,
                    count,
                    "enqueued"
                );
                self.publish(
                    topics::TOPIC_BUCKET_PUSHED,
                    json!({
                        "queue": self.options.queue,
                        "end": end,
                        "batch": batch,
                        "count": count,
                    }),
                );
                Ok(count)
            }
            None => {
                tracing::warn!(
                    queue = %self.options.queue,
                    handle = %self.handle_id,
                    batch,
                    limit = self.options.limit,
                    "enqueue rejected: bucket full"
                );
                self.publish(
                    topics::TOPIC_BUCKET_OVERFLOW,
                    json!({
                        "queue": self.options.queue,
                        "batch": batch,
                        "limit": self.options.limit,
                    }),
                );
                Err(BucketError::Overflow {
                    queue: self.options.queue.clone(),
                    limit: self.options.limit,
                    batch,
                })
            }
        }
    }

    async fn dequeue(&self, end: End) -> Result<Option<Payload>, BucketError> {
        self.prime().await?;
        let now = Utc::now();
        let guard = Guard::release(now, self.options.interval());
        let applied = self
            .store
            .conditional_update(
                &self.options.queue,
                guard,
                Mutation::Remove {
                    end,
                    released_at: now,
                },
            )
            .await
            .map_err(BucketError::Store)?;
        let Some(applied) = applied else {
            tracing::debug!(
                queue = %self.options.queue,
                handle = %self.handle_id,
                end = end.as_str(),
                "nothing released"
            );
            return Ok(None);
        };
        tracing::debug!(
            queue = %self.options.queue,
            handle = %self.handle_id,
            end = end.as_str(),
            count = applied.record.count,
            "released"
        );
        self.publish(
            topics::TOPIC_BUCKET_RELEASED,
            json!({
                "queue": self.options.queue,
                "end": end,
                "count": applied.record.count,
            }),
        );
        Ok(applied.removed)
    }

    fn publish(&self, kind: &str, payload: serde_json::Value) {
        if let Some(bus) = &self.bus {
            bus.publish(kind, &payload);
        }
    }
}
