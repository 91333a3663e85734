//! Fleet state
//!
//! In-memory registry of the VMs this process manages: one assignment per
//! job, the set of jobs currently being provisioned, and the snapshots that
//! can be reused per template. A single lock guards all of it.

use parking_lot::Mutex;
use std::collections::{HashMap, HashSet};
use thiserror::Error;
use vmkite_core::domain::fleet::{SnapshotRecord, TrackedAssignment};
use vmkite_core::domain::job::Job;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum FleetError {
    #[error("no snapshot available for template {0}")]
    NoSnapshot(String),
}

/// Outcome of trying to claim a job for provisioning
#[derive(Debug, Clone)]
pub enum Reservation {
    /// The caller now owns provisioning for this job
    Reserved,

    /// The job already has an assignment
    Tracked(TrackedAssignment),

    /// Another worker is provisioning the job right now
    InFlight,
}

#[derive(Debug, Default)]
struct Inner {
    assignments: HashMap<String, TrackedAssignment>,
    in_flight: HashSet<String>,
    snapshots: HashMap<String, Vec<SnapshotRecord>>,
}

#[derive(Debug, Default)]
pub struct FleetState {
    inner: Mutex<Inner>,
}

impl FleetState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, job_id: &str) -> Option<TrackedAssignment> {
        self.inner.lock().assignments.get(job_id).cloned()
    }

    /// Inserts or replaces the assignment for the job
    ///
    /// Also clears any reservation held for the job.
    pub fn track(&self, job: &Job, vm_name: &str) -> TrackedAssignment {
        let assignment = TrackedAssignment::new(job.clone(), vm_name);
        let mut inner = self.inner.lock();
        inner.in_flight.remove(&job.id);
        inner
            .assignments
            .insert(job.id.clone(), assignment.clone());
        assignment
    }

    pub fn untrack(&self, job: &Job) -> Option<TrackedAssignment> {
        self.inner.lock().assignments.remove(&job.id)
    }

    /// Copy of every current assignment
    pub fn list(&self) -> Vec<TrackedAssignment> {
        self.inner.lock().assignments.values().cloned().collect()
    }

    /// Atomically checks for an assignment and claims the job if there is none
    pub fn try_reserve(&self, job_id: &str) -> Reservation {
        let mut inner = self.inner.lock();
        if let Some(assignment) = inner.assignments.get(job_id) {
            return Reservation::Tracked(assignment.clone());
        }
        if !inner.in_flight.insert(job_id.to_string()) {
            return Reservation::InFlight;
        }
        Reservation::Reserved
    }

    /// Drops a reservation whose provisioning did not lead to an assignment
    pub fn release_reservation(&self, job_id: &str) {
        self.inner.lock().in_flight.remove(job_id);
    }

    /// Appends a snapshot to the template's list
    pub fn record_snapshot(&self, template: &str, vm_name: &str, snapshot: &str) {
        self.inner
            .lock()
            .snapshots
            .entry(template.to_string())
            .or_default()
            .push(SnapshotRecord {
                vm_name: vm_name.to_string(),
                snapshot: snapshot.to_string(),
            });
    }

    /// First snapshot recorded for the template
    pub fn best_snapshot(&self, template: &str) -> Result<SnapshotRecord, FleetError> {
        self.inner
            .lock()
            .snapshots
            .get(template)
            .and_then(|records| records.first())
            .cloned()
            .ok_or_else(|| FleetError::NoSnapshot(template.to_string()))
    }
}
