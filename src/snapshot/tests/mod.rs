//! Unit tests for snapshot naming, retention, management and replication.
//!
//! Split by concern: the codec and retention engine are pure, while the
//! manager and replicator run against the in-memory `FakeStorage`.

mod transfer;

use chrono::{DateTime, Utc};

/// Fixed instant used as the newest snapshot in generated sequences.
pub(super) fn end_of_sequence() -> DateTime<Utc> {
    "2020-04-10T09:45:58.564585005Z"
        .parse()
        .expect("valid RFC 3339 timestamp")
}

pub(super) fn at(text: &str) -> DateTime<Utc> {
    text.parse().expect("valid RFC 3339 timestamp")
}
