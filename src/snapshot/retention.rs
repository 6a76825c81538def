//! Time-bucketed retention.
//!
//! A cleanup pass sorts one file system's snapshots newest first and offers
//! every snapshot to one bucket per configured interval. A bucket takes a
//! snapshot when it is empty, or when it still has room and the snapshot is
//! at least one interval older than the last one it took. Snapshots no
//! bucket takes are rejected. With several intervals configured this yields
//! the usual grandfather-father-son schedule: dense recent history, sparse
//! old history.

use std::fmt;

use chrono::{DateTime, Months, TimeDelta, Utc};

use super::Name;

/// Retention granularity, ordered from finest to coarsest.
#[derive(Clone, Copy, Debug, Eq, Hash, Ord, PartialEq, PartialOrd)]
pub enum Interval {
    /// One minute.
    Minute,
    /// One hour.
    Hour,
    /// One day (24 hours).
    Day,
    /// One week (7 days).
    Week,
    /// One calendar month.
    Month,
    /// One calendar year.
    Year,
}

impl Interval {
    /// Every interval in order.
    pub const ALL: [Self; 6] = [
        Self::Minute,
        Self::Hour,
        Self::Day,
        Self::Week,
        Self::Month,
        Self::Year,
    ];

    /// Returns `true` when the instants are at least one interval apart.
    ///
    /// The arguments may be given in either order. Months and years use
    /// calendar arithmetic, clamping to the last day of shorter months, so
    /// 31 January plus one month is 29 February in a leap year.
    #[must_use]
    pub fn exceeded(self, a: DateTime<Utc>, b: DateTime<Utc>) -> bool {
        let (earlier, later) = if b < a { (b, a) } else { (a, b) };
        match self {
            Self::Minute => later - earlier >= TimeDelta::minutes(1),
            Self::Hour => later - earlier >= TimeDelta::hours(1),
            Self::Day => later - earlier >= TimeDelta::days(1),
            Self::Week => later - earlier >= TimeDelta::weeks(1),
            Self::Month => calendar_exceeded(earlier, later, Months::new(1)),
            Self::Year => calendar_exceeded(earlier, later, Months::new(12)),
        }
    }
}

fn calendar_exceeded(earlier: DateTime<Utc>, later: DateTime<Utc>, step: Months) -> bool {
    earlier
        .checked_add_months(step)
        .is_some_and(|bound| later >= bound)
}

impl fmt::Display for Interval {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Minute => "minute",
            Self::Hour => "hour",
            Self::Day => "day",
            Self::Week => "week",
            Self::Month => "month",
            Self::Year => "year",
        })
    }
}

/// Bucket capacity per interval. A capacity of zero disables the interval.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub struct BucketConfig {
    /// Snapshots kept at minute granularity.
    pub minute: usize,
    /// Snapshots kept at hour granularity.
    pub hour: usize,
    /// Snapshots kept at day granularity.
    pub day: usize,
    /// Snapshots kept at week granularity.
    pub week: usize,
    /// Snapshots kept at month granularity.
    pub month: usize,
    /// Snapshots kept at year granularity.
    pub year: usize,
}

impl BucketConfig {
    /// Configuration without any bucket; every snapshot is kept.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            minute: 0,
            hour: 0,
            day: 0,
            week: 0,
            month: 0,
            year: 0,
        }
    }

    /// Returns a copy with the capacity of `interval` replaced.
    #[must_use]
    pub const fn with(mut self, interval: Interval, capacity: usize) -> Self {
        match interval {
            Interval::Minute => self.minute = capacity,
            Interval::Hour => self.hour = capacity,
            Interval::Day => self.day = capacity,
            Interval::Week => self.week = capacity,
            Interval::Month => self.month = capacity,
            Interval::Year => self.year = capacity,
        }
        self
    }

    /// Capacity configured for `interval`.
    #[must_use]
    pub const fn capacity(&self, interval: Interval) -> usize {
        match interval {
            Interval::Minute => self.minute,
            Interval::Hour => self.hour,
            Interval::Day => self.day,
            Interval::Week => self.week,
            Interval::Month => self.month,
            Interval::Year => self.year,
        }
    }

    fn buckets(&self) -> Vec<Bucket> {
        Interval::ALL
            .into_iter()
            .filter_map(|interval| match self.capacity(interval) {
                0 => None,
                capacity => Some(Bucket::new(interval, capacity)),
            })
            .collect()
    }
}

struct Bucket {
    interval: Interval,
    capacity: usize,
    last: Option<DateTime<Utc>>,
    len: usize,
}

impl Bucket {
    const fn new(interval: Interval, capacity: usize) -> Self {
        Self {
            interval,
            capacity,
            last: None,
            len: 0,
        }
    }

    fn offer(&mut self, candidate: &Name) -> bool {
        if self.len >= self.capacity {
            return false;
        }
        if let Some(last) = self.last
            && !self.interval.exceeded(last, candidate.timestamp())
        {
            return false;
        }
        self.last = Some(candidate.timestamp());
        self.len += 1;
        true
    }
}

/// Partitions one file system's snapshots into `(keep, reject)`.
///
/// The input is not reordered; the engine sorts its own copy newest first.
/// Both outputs are ordered newest first. With no bucket configured every
/// snapshot is kept.
///
/// # Panics
///
/// Panics when the names do not all share one file system. Callers group by
/// file system before cleaning.
#[must_use]
pub fn clean(config: &BucketConfig, names: &[Name]) -> (Vec<Name>, Vec<Name>) {
    let mut sorted = names.to_vec();
    sorted.sort_by_key(|name| std::cmp::Reverse(name.timestamp()));

    let Some(file_system) = sorted.first().map(|name| name.file_system().to_owned()) else {
        return (Vec::new(), Vec::new());
    };
    assert!(
        sorted.iter().all(|name| name.file_system() == file_system),
        "retention pass mixes file systems; expected only {file_system}"
    );

    let mut buckets = config.buckets();
    let mut keep = Vec::new();
    let mut reject = Vec::new();
    for name in sorted {
        let mut accepted = buckets.is_empty();
        for bucket in &mut buckets {
            accepted |= bucket.offer(&name);
        }
        if accepted {
            keep.push(name);
        } else {
            reject.push(name);
        }
    }
    (keep, reject)
}
