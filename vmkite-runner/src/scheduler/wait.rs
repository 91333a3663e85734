//! Wait loop
//!
//! Watches a provisioned VM until it powers off or the deadline passes,
//! logging hook events reported by the guest along the way.

use std::time::Duration;
use thiserror::Error;
use tokio::sync::mpsc;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, info, warn};
use vmkite_core::domain::hook::HookEvent;
use vmkite_core::domain::job::Job;
use vmkite_vsphere::{VirtualMachine, VmBackend};

/// Lifecycle of a job's VM as seen by its worker
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobPhase {
    Provisioning,
    Running,
    PoweredOff,
    TimedOut,
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum WaitError {
    #[error("timed out after {after:?} waiting for {vm} to power off")]
    TimedOut { vm: String, after: Duration },
}

/// Blocks until the VM is no longer powered on or `deadline` is reached
///
/// The power state is queried every `tick`; query failures are logged and
/// the next tick tries again.
pub async fn wait_for_power_off(
    backend: &dyn VmBackend,
    vm: &VirtualMachine,
    job: &Job,
    events: &mut mpsc::UnboundedReceiver<HookEvent>,
    deadline: Instant,
    tick: Duration,
) -> Result<JobPhase, WaitError> {
    let started = Instant::now();
    debug!("Job {} is {:?} on {}", job.id, JobPhase::Running, vm.name);

    let mut ticker = tokio::time::interval_at(started + tick, tick);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    let expiry = tokio::time::sleep_until(deadline);
    tokio::pin!(expiry);

    let mut events_open = true;

    loop {
        tokio::select! {
            event = events.recv(), if events_open => match event {
                Some(event) => {
                    let latency = event.latency(job.created_at);
                    info!(
                        "Job {} hook {} ({}s after job creation)",
                        event.job_id,
                        event.event,
                        latency.num_seconds()
                    );
                }
                None => events_open = false,
            },
            _ = ticker.tick() => match backend.is_powered_on(vm).await {
                Ok(true) => {}
                Ok(false) => {
                    info!("VM {} powered off", vm.name);
                    return Ok(JobPhase::PoweredOff);
                }
                Err(e) => warn!("Failed to query power state of {}: {}", vm.name, e),
            },
            _ = &mut expiry => {
                warn!("Job {} is {:?} on {}", job.id, JobPhase::TimedOut, vm.name);
                return Err(WaitError::TimedOut {
                    vm: vm.name.clone(),
                    after: started.elapsed(),
                });
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_helpers::{MockBackend, job};
    use vmkite_vsphere::VmCloneParams;

    async fn provisioned(backend: &MockBackend) -> VirtualMachine {
        let vm = backend
            .clone_vm(&VmCloneParams {
                name: "vmkite-macos-14-J1".to_string(),
                src_name: "macos-14".to_string(),
                ..Default::default()
            })
            .await
            .unwrap();
        backend.power_on(&vm).await.unwrap();
        vm
    }

    #[tokio::test(start_paused = true)]
    async fn test_returns_when_vm_powers_off() {
        let backend = MockBackend::new();
        let vm = provisioned(&backend).await;
        backend.power_off_after(&vm.name, 3);
        let (_tx, mut events) = mpsc::unbounded_channel();

        let start = Instant::now();
        let phase = wait_for_power_off(
            &backend,
            &vm,
            &job("J1", "macos-14"),
            &mut events,
            start + Duration::from_secs(300),
            Duration::from_secs(1),
        )
        .await
        .unwrap();

        assert_eq!(phase, JobPhase::PoweredOff);
        assert_eq!(start.elapsed(), Duration::from_secs(3));
    }

    #[tokio::test(start_paused = true)]
    async fn test_times_out_at_deadline() {
        let backend = MockBackend::new();
        let vm = provisioned(&backend).await;
        let (_tx, mut events) = mpsc::unbounded_channel();

        let start = Instant::now();
        let err = wait_for_power_off(
            &backend,
            &vm,
            &job("J1", "macos-14"),
            &mut events,
            start + Duration::from_millis(5500),
            Duration::from_secs(1),
        )
        .await
        .unwrap_err();

        assert_eq!(start.elapsed(), Duration::from_millis(5500));
        assert!(matches!(err, WaitError::TimedOut { .. }));
    }

    #[tokio::test(start_paused = true)]
    async fn test_hook_events_do_not_end_wait() {
        let backend = MockBackend::new();
        let vm = provisioned(&backend).await;
        backend.power_off_after(&vm.name, 2);
        let (tx, mut events) = mpsc::unbounded_channel();
        tx.send(HookEvent::now("J1", "pre-command")).unwrap();
        tx.send(HookEvent::now("J1", "post-command")).unwrap();
        drop(tx);

        let start = Instant::now();
        let phase = wait_for_power_off(
            &backend,
            &vm,
            &job("J1", "macos-14"),
            &mut events,
            start + Duration::from_secs(60),
            Duration::from_secs(1),
        )
        .await
        .unwrap();

        assert_eq!(phase, JobPhase::PoweredOff);
        assert_eq!(start.elapsed(), Duration::from_secs(2));
    }

    #[tokio::test(start_paused = true)]
    async fn test_power_query_errors_are_retried() {
        let backend = MockBackend::new();
        let vm = provisioned(&backend).await;
        backend.fail_power_queries(&vm.name, 2);
        backend.power_off_after(&vm.name, 1);
        let (_tx, mut events) = mpsc::unbounded_channel();

        let start = Instant::now();
        let phase = wait_for_power_off(
            &backend,
            &vm,
            &job("J1", "macos-14"),
            &mut events,
            start + Duration::from_secs(60),
            Duration::from_secs(1),
        )
        .await
        .unwrap();

        assert_eq!(phase, JobPhase::PoweredOff);
        assert_eq!(start.elapsed(), Duration::from_secs(3));
    }
}
