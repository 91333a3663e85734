//! Hook domain types

use chrono::{DateTime, Duration, Utc};

/// A lifecycle hook reported by the guest of a job's VM
///
/// Not persisted. Delivered at most once to the worker waiting on the job.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HookEvent {
    pub job_id: String,
    pub event: String,
    pub timestamp: DateTime<Utc>,
}

impl HookEvent {
    /// Creates an event stamped with the current time
    pub fn now(job_id: impl Into<String>, event: impl Into<String>) -> Self {
        Self {
            job_id: job_id.into(),
            event: event.into(),
            timestamp: Utc::now(),
        }
    }

    /// Time between `since` and the moment the guest reported the hook
    pub fn latency(&self, since: DateTime<Utc>) -> Duration {
        self.timestamp - since
    }
}
