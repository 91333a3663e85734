//! Snapshot service
//!
//! Takes a snapshot of a job's VM when the guest reports it is about to run
//! the job's commands. Later jobs of the same template clone from it.

use anyhow::Result;
use async_trait::async_trait;
use std::sync::Arc;
use tracing::{debug, error, info};
use vmkite_core::domain::fleet::TrackedAssignment;
use vmkite_vsphere::VmBackend;

use crate::hooks::HookHandler;
use crate::state::FleetState;

/// Hook after which a VM is worth snapshotting
pub const SNAPSHOT_HOOK: &str = "pre-command";

pub struct SnapshotService {
    fleet: Arc<FleetState>,
    backend: Arc<dyn VmBackend>,
}

impl SnapshotService {
    pub fn new(fleet: Arc<FleetState>, backend: Arc<dyn VmBackend>) -> Self {
        Self { fleet, backend }
    }
}

#[async_trait]
impl HookHandler for SnapshotService {
    async fn handle_hook(&self, hook: &str, job_id: &str) -> Result<()> {
        if hook != SNAPSHOT_HOOK {
            debug!("No action for hook {} of job {}", hook, job_id);
            return Ok(());
        }

        let assignment = self
            .fleet
            .get(job_id)
            .ok_or_else(|| anyhow::anyhow!("job {} has no tracked VM", job_id))?;

        let fleet = Arc::clone(&self.fleet);
        let backend = Arc::clone(&self.backend);
        let name = hook.to_string();

        tokio::spawn(async move {
            if let Err(e) = snapshot_vm(&fleet, backend.as_ref(), &assignment, &name).await {
                error!(
                    "Failed to snapshot {} for job {}: {:#}",
                    assignment.vm_name, assignment.job.id, e
                );
            }
        });

        Ok(())
    }
}

/// Snapshots the assignment's VM and records it for its template
async fn snapshot_vm(
    fleet: &FleetState,
    backend: &dyn VmBackend,
    assignment: &TrackedAssignment,
    name: &str,
) -> Result<()> {
    let vm = backend
        .find_vm(&assignment.vm_name)
        .await?
        .ok_or_else(|| anyhow::anyhow!("VM {} not found", assignment.vm_name))?;

    let description = format!("Taken at {} of job {}", name, assignment.job);
    backend.create_snapshot(&vm, name, &description).await?;

    let template = assignment.job.template_key();
    fleet.record_snapshot(&template, &vm.name, name);
    info!(
        "Recorded snapshot {}@{} for template {}",
        vm.name, name, template
    );

    Ok(())
}
