//! Retention policy for the audit log.

use std::time::Duration;

/// How long and how many entries to keep. Both limits apply when set.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RetentionPolicy {
    /// Entries older than this are removed.
    pub max_age: Option<Duration>,
    /// Only the newest `max_entries` are kept.
    pub max_entries: Option<usize>,
}

impl RetentionPolicy {
    pub fn keep_all() -> Self {
        Self::default()
    }

    pub fn max_age(mut self, age: Duration) -> Self {
        self.max_age = Some(age);
        self
    }

    pub fn max_entries(mut self, n: usize) -> Self {
        self.max_entries = Some(n);
        self
    }

    pub fn is_keep_all(&self) -> bool {
        self.max_age.is_none() && self.max_entries.is_none()
    }

    /// Timestamp (unix ms) before which entries expire, relative to `now`.
    pub fn cutoff(&self, now: i64) -> Option<i64> {
        self.max_age
            .map(|age| now.saturating_sub(i64::try_from(age.as_millis()).unwrap_or(i64::MAX)))
    }
}

/// What one pruning pass removed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RetentionReport {
    pub expired: usize,
    pub overflow: usize,
}

impl RetentionReport {
    pub fn total(&self) -> usize {
        self.expired + self.overflow
    }
}
