//! Canonical event topic constants published by bucket handles.
//!
//! Keep this list alphabetized and favor dot.case names.

pub const TOPIC_BUCKET_OVERFLOW: &str = "bucket.overflow";
pub const TOPIC_BUCKET_PRIMED: &str = "bucket.primed";
pub const TOPIC_BUCKET_PUSHED: &str = "bucket.pushed";
pub const TOPIC_BUCKET_RELEASED: &str = "bucket.released";
