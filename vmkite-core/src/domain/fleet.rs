//! Fleet domain types
//!
//! Records kept by the runner about the VMs it manages.

use chrono::{DateTime, Utc};

use crate::domain::job::Job;

/// Binding of one job to the VM created (or adopted) for it
#[derive(Debug, Clone)]
pub struct TrackedAssignment {
    pub job: Job,
    pub vm_name: String,
    pub created_at: DateTime<Utc>,
}

impl TrackedAssignment {
    pub fn new(job: Job, vm_name: impl Into<String>) -> Self {
        Self {
            job,
            vm_name: vm_name.into(),
            created_at: Utc::now(),
        }
    }
}

/// A point-in-time snapshot of a VM usable as a clone source
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SnapshotRecord {
    /// Name of the VM the snapshot was taken from
    pub vm_name: String,

    /// Name of the snapshot on that VM
    pub snapshot: String,
}
