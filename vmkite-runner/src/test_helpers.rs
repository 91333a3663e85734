//! In-memory job source and virtualization backend for tests

use async_trait::async_trait;
use chrono::{TimeZone, Utc};
use parking_lot::Mutex;
use std::collections::{BTreeMap, HashSet, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;
use tokio::time::Instant;
use vmkite_buildkite::{ClientError, JobQuery, JobSource};
use vmkite_core::domain::job::{Job, JobMetadata};
use vmkite_vsphere::{
    HostSystem, VirtualMachine, VmBackend, VmCloneParams, VmCreationParams, VsphereError,
};

pub fn job(id: &str, template: &str) -> Job {
    Job {
        id: id.to_string(),
        pipeline: "ci".to_string(),
        build_number: "42".to_string(),
        created_at: Utc.with_ymd_and_hms(2024, 3, 7, 9, 5, 1).unwrap(),
        metadata: JobMetadata::from_tags(&[format!("vmkite-template={}", template)]),
    }
}

pub fn disk_job(id: &str, vmdk: &str, guest_id: &str) -> Job {
    Job {
        metadata: JobMetadata::from_tags(&[
            format!("vmkite-vmdk={}", vmdk),
            format!("vmkite-guestid={}", guest_id),
        ]),
        ..job(id, "unused")
    }
}

/// Waits until the condition holds, failing the test after ten seconds
pub async fn eventually<F: Fn() -> bool>(condition: F) {
    let deadline = Instant::now() + Duration::from_secs(10);
    while !condition() {
        assert!(Instant::now() < deadline, "condition not met in time");
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}

/// Job source replaying scripted poll results, then empty batches
#[derive(Default)]
pub struct MockJobSource {
    batches: Mutex<VecDeque<Result<Vec<Job>, ()>>>,
    polls: AtomicUsize,
    finished_checks: Mutex<Vec<String>>,
}

impl MockJobSource {
    pub fn with_batches(batches: Vec<Result<Vec<Job>, ()>>) -> Self {
        Self {
            batches: Mutex::new(batches.into()),
            ..Default::default()
        }
    }

    pub fn polls(&self) -> usize {
        self.polls.load(Ordering::SeqCst)
    }

    pub fn finished_checks(&self) -> Vec<String> {
        self.finished_checks.lock().clone()
    }
}

#[async_trait]
impl JobSource for MockJobSource {
    async fn list_pending_jobs(&self, _query: &JobQuery) -> vmkite_buildkite::Result<Vec<Job>> {
        self.polls.fetch_add(1, Ordering::SeqCst);
        match self.batches.lock().pop_front() {
            Some(Ok(batch)) => Ok(batch),
            Some(Err(())) => Err(ClientError::status(502, "bad gateway")),
            None => Ok(Vec::new()),
        }
    }

    async fn is_job_finished(&self, job: &Job) -> vmkite_buildkite::Result<bool> {
        self.finished_checks.lock().push(job.id.clone());
        Ok(false)
    }
}

#[derive(Debug, Clone)]
struct MockVm {
    vm: VirtualMachine,
    powered_on: bool,
    /// Successful power queries still answering "on"
    on_for: Option<usize>,
    failing_queries: usize,
    guest_info: BTreeMap<String, String>,
    snapshots: Vec<String>,
}

#[derive(Default)]
struct BackendState {
    vms: BTreeMap<String, MockVm>,
    calls: Vec<String>,
    hosts: Vec<HostSystem>,
    failing_clone_sources: HashSet<String>,
    clone_requests: Vec<VmCloneParams>,
    create_requests: Vec<VmCreationParams>,
}

/// Backend keeping VMs in memory and recording every mutating call
#[derive(Default)]
pub struct MockBackend {
    state: Mutex<BackendState>,
}

impl MockBackend {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_hosts(hosts: Vec<HostSystem>) -> Self {
        let backend = Self::new();
        backend.state.lock().hosts = hosts;
        backend
    }

    fn add_vm(&self, name: &str, guest_info: BTreeMap<String, String>) -> VirtualMachine {
        let vm = VirtualMachine {
            name: name.to_string(),
            path: format!("/DC/vm/{}", name),
            host_system_id: None,
        };
        self.state.lock().vms.insert(
            name.to_string(),
            MockVm {
                vm: vm.clone(),
                powered_on: false,
                on_for: None,
                failing_queries: 0,
                guest_info,
                snapshots: Vec::new(),
            },
        );
        vm
    }

    /// Adds a VM that is already running, as if left by an earlier process
    pub fn insert_running(&self, name: &str) {
        self.add_vm(name, BTreeMap::new());
        self.with_vm(name, |vm| vm.powered_on = true);
    }

    /// The VM reports powered off from the `tick`-th power query on
    pub fn power_off_after(&self, name: &str, tick: usize) {
        self.with_vm(name, |vm| vm.on_for = Some(tick.saturating_sub(1)));
    }

    pub fn fail_power_queries(&self, name: &str, count: usize) {
        self.with_vm(name, |vm| vm.failing_queries = count);
    }

    pub fn shut_down(&self, name: &str) {
        self.with_vm(name, |vm| {
            vm.powered_on = false;
            vm.on_for = None;
        });
    }

    pub fn fail_clone_from(&self, src_name: &str) {
        self.state
            .lock()
            .failing_clone_sources
            .insert(src_name.to_string());
    }

    pub fn exists(&self, name: &str) -> bool {
        self.state.lock().vms.contains_key(name)
    }

    pub fn guest_info(&self, name: &str) -> BTreeMap<String, String> {
        self.state
            .lock()
            .vms
            .get(name)
            .map(|vm| vm.guest_info.clone())
            .unwrap_or_default()
    }

    pub fn snapshots(&self, name: &str) -> Vec<String> {
        self.state
            .lock()
            .vms
            .get(name)
            .map(|vm| vm.snapshots.clone())
            .unwrap_or_default()
    }

    pub fn calls(&self) -> Vec<String> {
        self.state.lock().calls.clone()
    }

    pub fn clone_requests(&self) -> Vec<VmCloneParams> {
        self.state.lock().clone_requests.clone()
    }

    pub fn create_requests(&self) -> Vec<VmCreationParams> {
        self.state.lock().create_requests.clone()
    }

    fn with_vm(&self, name: &str, update: impl FnOnce(&mut MockVm)) {
        if let Some(vm) = self.state.lock().vms.get_mut(name) {
            update(vm);
        }
    }

    fn record(&self, call: String) {
        self.state.lock().calls.push(call);
    }
}

fn not_found(name: &str) -> VsphereError {
    VsphereError::NotFound(name.to_string())
}

#[async_trait]
impl VmBackend for MockBackend {
    async fn find_vm(&self, name: &str) -> vmkite_vsphere::Result<Option<VirtualMachine>> {
        Ok(self.state.lock().vms.get(name).map(|vm| vm.vm.clone()))
    }

    async fn create_vm(&self, params: &VmCreationParams) -> vmkite_vsphere::Result<VirtualMachine> {
        self.record(format!("create {}", params.name));
        self.state.lock().create_requests.push(params.clone());
        Ok(self.add_vm(&params.name, params.guest_info.clone()))
    }

    async fn clone_vm(&self, params: &VmCloneParams) -> vmkite_vsphere::Result<VirtualMachine> {
        self.record(format!("clone {} from {}", params.name, params.src_name));
        {
            let mut state = self.state.lock();
            state.clone_requests.push(params.clone());
            if state.failing_clone_sources.contains(&params.src_name) {
                return Err(VsphereError::Command {
                    command: "clone".to_string(),
                    exit_code: 1,
                    stderr: format!("cannot clone {}", params.src_name),
                });
            }
        }
        Ok(self.add_vm(&params.name, params.guest_info.clone()))
    }

    async fn power_on(&self, vm: &VirtualMachine) -> vmkite_vsphere::Result<()> {
        self.record(format!("power_on {}", vm.name));
        let mut state = self.state.lock();
        let mock = state.vms.get_mut(&vm.name).ok_or_else(|| not_found(&vm.name))?;
        mock.powered_on = true;
        Ok(())
    }

    async fn power_off(&self, vm: &VirtualMachine) -> vmkite_vsphere::Result<()> {
        self.record(format!("power_off {}", vm.name));
        self.shut_down(&vm.name);
        Ok(())
    }

    async fn is_powered_on(&self, vm: &VirtualMachine) -> vmkite_vsphere::Result<bool> {
        let mut state = self.state.lock();
        let mock = state.vms.get_mut(&vm.name).ok_or_else(|| not_found(&vm.name))?;

        if mock.failing_queries > 0 {
            mock.failing_queries -= 1;
            return Err(VsphereError::Parse("power state unavailable".to_string()));
        }

        match mock.on_for {
            Some(0) => {
                mock.powered_on = false;
                mock.on_for = None;
            }
            Some(left) => mock.on_for = Some(left - 1),
            None => {}
        }

        Ok(mock.powered_on)
    }

    async fn destroy(&self, vm: &VirtualMachine) -> vmkite_vsphere::Result<()> {
        self.record(format!("destroy {}", vm.name));
        self.state
            .lock()
            .vms
            .remove(&vm.name)
            .map(|_| ())
            .ok_or_else(|| not_found(&vm.name))
    }

    async fn create_snapshot(
        &self,
        vm: &VirtualMachine,
        name: &str,
        _description: &str,
    ) -> vmkite_vsphere::Result<()> {
        self.record(format!("snapshot {}@{}", vm.name, name));
        let mut state = self.state.lock();
        let mock = state.vms.get_mut(&vm.name).ok_or_else(|| not_found(&vm.name))?;
        mock.snapshots.push(name.to_string());
        Ok(())
    }

    async fn host_systems(&self, _cluster_path: &str) -> vmkite_vsphere::Result<Vec<HostSystem>> {
        Ok(self.state.lock().hosts.clone())
    }

    async fn virtual_machines(&self, _folder: &str) -> vmkite_vsphere::Result<Vec<VirtualMachine>> {
        Ok(self
            .state
            .lock()
            .vms
            .values()
            .map(|vm| vm.vm.clone())
            .collect())
    }
}
