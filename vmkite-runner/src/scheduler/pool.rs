//! Worker pool
//!
//! A fixed number of workers share the job stream. For every job a worker
//! registers it with the hook gateway, provisions (or adopts) its VM, waits
//! for the VM to power off, then destroys it and releases the job.

use anyhow::{Result, bail};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, mpsc};
use tokio::task::JoinSet;
use tokio::time::Instant;
use tracing::{debug, error, info, warn};
use vmkite_buildkite::{JobQuery, JobSource};
use vmkite_core::domain::job::{Job, MANAGED_VM_PREFIX, VmSource};
use vmkite_vsphere::creator::{clone_and_power_on, create_and_power_on, power_off_and_destroy};
use vmkite_vsphere::inventory::Inventory;
use vmkite_vsphere::placement::pick_host;
use vmkite_vsphere::{VirtualMachine, VmBackend, VmCreationParams};

use crate::config::Config;
use crate::hooks::HookGateway;
use crate::scheduler::stream::JobStream;
use crate::scheduler::wait::{JobPhase, wait_for_power_off};
use crate::service::SnapshotService;
use crate::state::{FleetState, Reservation};

/// Guest info key with the hook gateway's base URL
pub const API_KEY: &str = "vmkite-api";

/// Guest info key with the job's bearer token
pub const API_TOKEN_KEY: &str = "vmkite-api-token";

pub const JOB_ID_KEY: &str = "vmkite-job-id";

/// Tunables of the worker pool
#[derive(Debug, Clone)]
pub struct RunnerSettings {
    pub query: JobQuery,
    pub concurrency: usize,
    pub poll_interval: Duration,
    pub power_poll_interval: Duration,
    pub job_timeout: Duration,
    pub api_listen: Option<String>,
    pub api_secret: Option<String>,
    pub cluster_path: String,
    pub host_ip_prefix: Option<String>,
}

impl RunnerSettings {
    pub fn from_config(config: &Config) -> Self {
        Self {
            query: JobQuery {
                pipelines: config.pipelines.clone(),
            },
            concurrency: config.concurrency,
            poll_interval: config.poll_interval,
            power_poll_interval: config.power_poll_interval,
            job_timeout: config.job_timeout,
            api_listen: config.api_listen.clone(),
            api_secret: config.api_secret.clone(),
            cluster_path: config.cluster_path.clone(),
            host_ip_prefix: config.host_ip_prefix.clone(),
        }
    }
}

pub struct JobRunner {
    source: Arc<dyn JobSource>,
    backend: Arc<dyn VmBackend>,
    fleet: Arc<FleetState>,
    settings: RunnerSettings,
}

/// Running gateway and workers
pub struct RunnerHandle {
    pub gateway: Arc<HookGateway>,
    workers: JoinSet<()>,
}

impl RunnerHandle {
    /// Waits for every worker to stop
    ///
    /// Workers only stop when the job stream closes.
    pub async fn join(mut self) {
        while let Some(result) = self.workers.join_next().await {
            if let Err(e) = result {
                error!("Worker task panicked: {}", e);
            }
        }
    }
}

impl JobRunner {
    pub fn new(
        source: Arc<dyn JobSource>,
        backend: Arc<dyn VmBackend>,
        fleet: Arc<FleetState>,
        settings: RunnerSettings,
    ) -> Self {
        Self {
            source,
            backend,
            fleet,
            settings,
        }
    }

    /// Starts the hook gateway, the job stream and the workers
    ///
    /// Failing to start the gateway is the only error.
    pub async fn start(self, template: VmCreationParams) -> Result<RunnerHandle> {
        let handler = Arc::new(SnapshotService::new(
            Arc::clone(&self.fleet),
            Arc::clone(&self.backend),
        ));
        let gateway = Arc::new(
            HookGateway::listen(
                self.settings.api_listen.as_deref(),
                self.settings.api_secret.clone(),
                handler,
            )
            .await?,
        );

        let jobs = JobStream::subscribe(
            Arc::clone(&self.source),
            self.settings.query.clone(),
            self.settings.poll_interval,
        );
        let jobs = Arc::new(Mutex::new(jobs));

        let worker = Arc::new(Worker {
            source: self.source,
            backend: self.backend,
            fleet: self.fleet,
            gateway: Arc::clone(&gateway),
            template,
            settings: self.settings,
            placement: Mutex::new(()),
        });

        info!("Starting {} worker(s)", worker.settings.concurrency);
        let mut workers = JoinSet::new();
        for id in 0..worker.settings.concurrency {
            workers.spawn(worker_loop(id, Arc::clone(&worker), Arc::clone(&jobs)));
        }

        Ok(RunnerHandle { gateway, workers })
    }

    /// Runs until the process is killed
    pub async fn run(self, template: VmCreationParams) -> Result<()> {
        let handle = self.start(template).await?;
        info!("Guests report hooks to {}", handle.gateway.url());
        handle.join().await;
        Ok(())
    }
}

async fn worker_loop(id: usize, worker: Arc<Worker>, jobs: Arc<Mutex<mpsc::UnboundedReceiver<Job>>>) {
    debug!("Worker {} started", id);
    loop {
        let next = jobs.lock().await.recv().await;
        let Some(job) = next else {
            debug!("Job stream closed, worker {} stopping", id);
            return;
        };
        worker.handle(job).await;
    }
}

struct Worker {
    source: Arc<dyn JobSource>,
    backend: Arc<dyn VmBackend>,
    fleet: Arc<FleetState>,
    gateway: Arc<HookGateway>,
    template: VmCreationParams,
    settings: RunnerSettings,
    /// Serializes inventory reads and creation on placed hosts
    placement: Mutex<()>,
}

impl Worker {
    async fn handle(&self, job: Job) {
        info!("Handling job {}", job);

        let subscription = match self.gateway.register_job(&job.id) {
            Ok(subscription) => subscription,
            Err(e) => {
                error!("Failed to register job {}: {}", job, e);
                return;
            }
        };
        let mut events = subscription.events;

        let params = self.params_for(&job, &subscription.token);
        debug!("Job {} is {:?}", job.id, JobPhase::Provisioning);

        let vm = match self.provision(&job, &params).await {
            Ok(vm) => vm,
            Err(e) => {
                error!("Failed to provision VM for job {}: {:#}", job, e);
                self.gateway.release(&job.id);
                return;
            }
        };

        let deadline = Instant::now() + self.settings.job_timeout;
        match wait_for_power_off(
            self.backend.as_ref(),
            &vm,
            &job,
            &mut events,
            deadline,
            self.settings.power_poll_interval,
        )
        .await
        {
            Ok(phase) => info!("Job {} finished: VM {} {:?}", job, vm.name, phase),
            Err(e) => {
                warn!("Job {}: {}", job, e);
                self.report_upstream_state(&job).await;
            }
        }

        if let Err(e) = power_off_and_destroy(self.backend.as_ref(), &vm).await {
            error!("Failed to destroy VM {} of job {}: {}", vm.name, job, e);
        }
        self.fleet.untrack(&job);
        self.gateway.release(&job.id);
        info!(
            "Released job {} ({} job(s) still tracked)",
            job,
            self.fleet.list().len()
        );
    }

    /// Creation parameters for the job's VM, guest info included
    fn params_for(&self, job: &Job, token: &str) -> VmCreationParams {
        let mut params = self.template.clone();
        params.name = job.vm_name();
        params
            .guest_info
            .insert(API_KEY.to_string(), self.gateway.url());
        params
            .guest_info
            .insert(API_TOKEN_KEY.to_string(), token.to_string());
        params
            .guest_info
            .insert(JOB_ID_KEY.to_string(), job.id.clone());

        if let Some(VmSource::Disk { path, guest_id }) = job.metadata.source() {
            params.src_disk_path = path;
            params.guest_id = guest_id;
        }

        params
    }

    /// Returns the job's VM, adopting an existing one where possible
    ///
    /// The job is tracked once this returns successfully.
    async fn provision(&self, job: &Job, params: &VmCreationParams) -> Result<VirtualMachine> {
        match self.fleet.try_reserve(&job.id) {
            Reservation::Reserved => {}
            Reservation::InFlight => bail!("job {} is already being provisioned", job.id),
            Reservation::Tracked(assignment) => {
                if let Some(vm) = self.backend.find_vm(&assignment.vm_name).await? {
                    info!("Adopting tracked VM {} for job {}", vm.name, job);
                    return Ok(vm);
                }
                warn!(
                    "Tracked VM {} of job {} no longer exists",
                    assignment.vm_name, job
                );
                self.fleet.untrack(job);
                if !matches!(self.fleet.try_reserve(&job.id), Reservation::Reserved) {
                    bail!("job {} was claimed by another worker", job.id);
                }
            }
        }

        match self.provision_reserved(job, params).await {
            Ok(vm) => {
                self.fleet.track(job, &vm.name);
                Ok(vm)
            }
            Err(e) => {
                self.fleet.release_reservation(&job.id);
                Err(e)
            }
        }
    }

    async fn provision_reserved(
        &self,
        job: &Job,
        params: &VmCreationParams,
    ) -> Result<VirtualMachine> {
        let backend = self.backend.as_ref();

        if let Some(vm) = backend.find_vm(&params.name).await? {
            info!("Adopting existing VM {} for job {}", vm.name, job);
            return Ok(vm);
        }

        let template = job.template_key();
        match self.fleet.best_snapshot(&template) {
            Ok(snapshot) => {
                let clone =
                    params.clone_params(&snapshot.vm_name, Some(snapshot.snapshot.clone()));
                match clone_and_power_on(backend, &clone).await {
                    Ok(vm) => {
                        info!(
                            "Cloned {} from snapshot {}@{}",
                            vm.name, snapshot.vm_name, snapshot.snapshot
                        );
                        return Ok(vm);
                    }
                    Err(e) => warn!(
                        "Cloning from snapshot {}@{} failed, using default source: {}",
                        snapshot.vm_name, snapshot.snapshot, e
                    ),
                }
            }
            Err(e) => debug!("{}", e),
        }

        match job.metadata.source() {
            Some(VmSource::Template { name }) => {
                Ok(clone_and_power_on(backend, &params.clone_params(name, None)).await?)
            }
            Some(VmSource::Disk { .. }) => match &self.settings.host_ip_prefix {
                Some(prefix) => self.create_on_host(params, prefix).await,
                None => Ok(create_and_power_on(backend, params).await?),
            },
            None => bail!("job {} has no VM source", job.id),
        }
    }

    /// Creates the VM on a host chosen by the placement policy
    ///
    /// Only the host is taken from the placement. The VM keeps the job's name,
    /// slot names are for VMs created with `vmkite create-vm`.
    async fn create_on_host(&self, params: &VmCreationParams, ip_prefix: &str) -> Result<VirtualMachine> {
        let backend = self.backend.as_ref();
        let _placement = self.placement.lock().await;

        let inventory = Inventory::load(
            backend,
            &self.settings.cluster_path,
            &params.vm_folder,
            MANAGED_VM_PREFIX,
        )
        .await?;
        let placement = pick_host(&inventory, ip_prefix)?;
        info!("Placing {} on host {}", params.name, placement.host.ip);

        let mut params = params.clone();
        params.host = Some(placement.host.path);
        Ok(create_and_power_on(backend, &params).await?)
    }

    async fn report_upstream_state(&self, job: &Job) {
        match self.source.is_job_finished(job).await {
            Ok(true) => info!("Job {} is finished upstream", job),
            Ok(false) => warn!("Job {} is still scheduled or running upstream", job),
            Err(e) if e.is_not_found() => info!("Build of job {} no longer exists upstream", job),
            Err(e) => warn!("Failed to check state of job {}: {}", job, e),
        }
    }
}
