use std::collections::VecDeque;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Opaque queue payload: null, bool, number, string, array or object, recursively.
pub type Payload = serde_json::Value;

/// Which end of the item sequence an operation touches.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum End {
    Head,
    Tail,
}

impl End {
    pub fn as_str(&self) -> &'static str {
        match self {
            End::Head => "head",
            End::Tail => "tail",
        }
    }
}

/// The single shared record holding one named queue's full state.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BucketRecord {
    pub name: String,
    pub count: u64,
    pub items: VecDeque<Payload>,
    /// Time of the most recent successful removal; seeded with the creation time.
    pub last_release: DateTime<Utc>,
}

impl BucketRecord {
    /// Initial state written by the first successful prime.
    pub fn fresh(name: impl Into<String>, now: DateTime<Utc>) -> Self {
        Self {
            name: name.into(),
            count: 0,
            items: VecDeque::new(),
            last_release: now,
        }
    }

    pub fn is_consistent(&self) -> bool {
        self.count == self.items.len() as u64
    }
}

/// Match predicate evaluated by a store against the current record.
///
/// Every populated condition must hold for the guard to match; an empty guard
/// matches any existing record.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Guard {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub count_below: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub count_above: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub released_at_or_before: Option<DateTime<Utc>>,
}

impl Guard {
    /// Enqueue admission: `count < bound`.
    pub fn admit_below(bound: u64) -> Self {
        Self {
            count_below: Some(bound),
            ..Self::default()
        }
    }

    /// Dequeue admission: non-empty and `last_release <= now - interval`.
    pub fn release(now: DateTime<Utc>, interval: Duration) -> Self {
        let cutoff = chrono::Duration::from_std(interval)
            .ok()
            .and_then(|d| now.checked_sub_signed(d))
            .unwrap_or(DateTime::<Utc>::MIN_UTC);
        Self {
            count_above: Some(0),
            released_at_or_before: Some(cutoff),
            ..Self::default()
        }
    }

    pub fn matches(&self, record: &BucketRecord) -> bool {
        if let Some(bound) = self.count_below {
            if record.count >= bound {
                return false;
            }
        }
        if let Some(floor) = self.count_above {
            if record.count <= floor {
                return false;
            }
        }
        if let Some(cutoff) = self.released_at_or_before {
            if record.last_release > cutoff {
                return false;
            }
        }
        true
    }
}

/// Change applied to a record in the same atomic step as a matching guard.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum Mutation {
    /// Add the whole batch at `end`, keeping argument order, and bump `count`.
    Insert { end: End, items: Vec<Payload> },
    /// Take one item from `end`, decrement `count` and stamp `last_release`.
    Remove {
        end: End,
        released_at: DateTime<Utc>,
    },
}

impl Mutation {
    /// Apply to `record` in place; returns the removed item for `Remove`.
    pub fn apply(self, record: &mut BucketRecord) -> Option<Payload> {
        match self {
            Mutation::Insert { end, items } => {
                record.count = record.count.saturating_add(items.len() as u64);
                match end {
                    End::Tail => record.items.extend(items),
                    End::Head => {
                        for item in items.into_iter().rev() {
                            record.items.push_front(item);
                        }
                    }
                }
                None
            }
            Mutation::Remove { end, released_at } => {
                let removed = match end {
                    End::Tail => record.items.pop_back(),
                    End::Head => record.items.pop_front(),
                };
                if removed.is_some() {
                    record.count = record.count.saturating_sub(1);
                    record.last_release = released_at;
                }
                removed
            }
        }
    }
}

/// Outcome of `AtomicStore::create_unique_if_absent`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Created {
    Inserted,
    AlreadyExists,
}

/// Post-mutation state returned by a matching conditional update.
#[derive(Debug, Clone, PartialEq)]
pub struct Applied {
    pub record: BucketRecord,
    pub removed: Option<Payload>,
}
