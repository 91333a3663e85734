//! vmkite Runner
//!
//! Provisions an ephemeral vSphere VM for every Buildkite job that asks for
//! one and destroys it once the job's agent shuts the VM down.
//!
//! Architecture:
//! - Configuration: settings loaded from the environment
//! - Hooks: HTTP gateway guests report lifecycle hooks to
//! - Services: reactions to hooks (snapshots for faster clones)
//! - Scheduler: job stream, worker pool and per-job wait loop
//! - State: in-memory registry of managed VMs and snapshots

mod config;
mod hooks;
mod scheduler;
mod service;
mod state;

#[cfg(test)]
mod test_helpers;

use anyhow::{Context, Result};
use std::sync::Arc;
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use crate::config::Config;
use crate::scheduler::{JobRunner, RunnerSettings};
use crate::state::FleetState;
use vmkite_buildkite::BuildkiteClient;
use vmkite_vsphere::GovcBackend;

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "vmkite_runner=info,vmkite_vsphere=info,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!("Starting vmkite runner");

    let config = Config::from_env().context("Failed to load configuration")?;
    config.validate()?;
    info!(
        "Loaded configuration: org={}, vsphere={}, concurrency={}",
        config.buildkite_org, config.vsphere.host, config.concurrency
    );

    let client = Arc::new(BuildkiteClient::new(
        config.buildkite_org.clone(),
        config.buildkite_api_token.clone(),
    ));

    let backend = Arc::new(GovcBackend::new(
        config.vsphere.clone(),
        config.vm_path.clone(),
    ));
    backend
        .check_available()
        .await
        .context("govc is not usable")?;

    let fleet = Arc::new(FleetState::new());
    let runner = JobRunner::new(
        client,
        backend,
        fleet,
        RunnerSettings::from_config(&config),
    );

    info!(
        "Poll interval: {:?}, power poll interval: {:?}, job timeout: {:?}",
        config.poll_interval, config.power_poll_interval, config.job_timeout
    );

    if let Err(e) = runner.run(config.creation_template()).await {
        error!("Runner error: {:#}", e);
        return Err(e);
    }

    Ok(())
}
