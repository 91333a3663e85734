//! Runner configuration
//!
//! Everything is read from environment variables. Lookups go through a
//! closure so tests can supply their own variables.

use anyhow::{Context, Result};
use std::collections::BTreeMap;
use std::str::FromStr;
use std::time::Duration;
use vmkite_vsphere::{ConnectionParams, VmCreationParams, parse_key_values};

/// Guest info key carrying the agent registration token
pub const AGENT_TOKEN_KEY: &str = "vmkite-buildkite-agent-token";

const DEFAULT_CLUSTER_PATH: &str = "/MacStadium - Vegas/host/XSERVE_Cluster";
const DEFAULT_VM_PATH: &str = "/MacStadium - Vegas/vm";
const DEFAULT_DATASTORE: &str = "PURE1-1";
const DEFAULT_NETWORK: &str = "dvPortGroup-Private-1";

/// Runner configuration
#[derive(Debug, Clone)]
pub struct Config {
    pub buildkite_api_token: String,
    pub buildkite_org: String,

    /// Token agents inside the guests register with
    pub buildkite_agent_token: String,

    /// Pipeline slugs to watch; empty means the whole organization
    pub pipelines: Vec<String>,

    /// Number of jobs handled at once
    pub concurrency: usize,

    /// Sleep between two polls of the job source
    pub poll_interval: Duration,

    /// How often a running VM's power state is checked
    pub power_poll_interval: Duration,

    /// Maximum time a job's VM may run
    pub job_timeout: Duration,

    /// Hook gateway bind address; autodetected when unset
    pub api_listen: Option<String>,

    /// HMAC secret for hook tokens; generated when unset
    pub api_secret: Option<String>,

    pub vsphere: ConnectionParams,
    pub cluster_path: String,
    pub vm_path: String,
    pub datastore: String,
    pub disk_datastore: String,
    pub network: String,
    pub memory_mb: u64,
    pub num_cpus: u32,
    pub num_cores_per_socket: u32,

    /// Extra guest info injected into every VM
    pub guest_info: BTreeMap<String, String>,

    /// Enables host placement for disk-based VMs
    pub host_ip_prefix: Option<String>,
}

impl Config {
    /// Creates configuration from environment variables
    ///
    /// Required environment variables:
    /// - BUILDKITE_API_TOKEN, BUILDKITE_ORG, BUILDKITE_AGENT_TOKEN
    /// - VS_HOST, VS_USER, VS_PASS
    ///
    /// Everything else is optional, see the field docs for meaning.
    pub fn from_env() -> Result<Self> {
        Self::from_vars(|key| std::env::var(key).ok())
    }

    pub fn from_vars<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let var = |key: &str| lookup(key).filter(|value| !value.trim().is_empty());
        let required = |key: &str| {
            var(key).ok_or_else(|| anyhow::anyhow!("{} environment variable not set", key))
        };
        let or_default = |key: &str, default: &str| var(key).unwrap_or_else(|| default.to_string());

        let disk_datastore = or_default("VM_DISK_DATASTORE", DEFAULT_DATASTORE);

        Ok(Self {
            buildkite_api_token: required("BUILDKITE_API_TOKEN")?,
            buildkite_org: required("BUILDKITE_ORG")?,
            buildkite_agent_token: required("BUILDKITE_AGENT_TOKEN")?,
            pipelines: var("BUILDKITE_PIPELINES")
                .map(|value| {
                    value
                        .split(',')
                        .map(str::trim)
                        .filter(|p| !p.is_empty())
                        .map(str::to_string)
                        .collect()
                })
                .unwrap_or_default(),
            concurrency: parse(var("CONCURRENCY"), "CONCURRENCY", 6)?,
            poll_interval: seconds(var("POLL_INTERVAL"), "POLL_INTERVAL", 5)?,
            power_poll_interval: seconds(var("POWER_POLL_INTERVAL"), "POWER_POLL_INTERVAL", 1)?,
            job_timeout: seconds(var("JOB_TIMEOUT"), "JOB_TIMEOUT", 300)?,
            api_listen: var("VMKITE_API_LISTEN"),
            api_secret: var("VMKITE_API_SECRET"),
            vsphere: ConnectionParams {
                host: required("VS_HOST")?,
                user: required("VS_USER")?,
                pass: required("VS_PASS")?,
                insecure: parse(var("VS_INSECURE"), "VS_INSECURE", false)?,
            },
            cluster_path: or_default("VM_CLUSTER_PATH", DEFAULT_CLUSTER_PATH),
            vm_path: or_default("VM_PATH", DEFAULT_VM_PATH),
            datastore: or_default("VM_DATASTORE", DEFAULT_DATASTORE),
            disk_datastore,
            network: or_default("VM_NETWORK", DEFAULT_NETWORK),
            memory_mb: parse(var("VM_MEMORY_MB"), "VM_MEMORY_MB", 4096)?,
            num_cpus: parse(var("VM_NUM_CPUS"), "VM_NUM_CPUS", 4)?,
            num_cores_per_socket: parse(
                var("VM_NUM_CORES_PER_SOCKET"),
                "VM_NUM_CORES_PER_SOCKET",
                1,
            )?,
            guest_info: var("VM_GUEST_INFO")
                .map(|value| parse_key_values(&value))
                .unwrap_or_default(),
            host_ip_prefix: var("HOST_IP_PREFIX"),
        })
    }

    /// Validates the configuration
    pub fn validate(&self) -> Result<()> {
        if self.buildkite_api_token.is_empty() {
            anyhow::bail!("buildkite_api_token cannot be empty");
        }

        if self.buildkite_org.is_empty() {
            anyhow::bail!("buildkite_org cannot be empty");
        }

        if self.buildkite_agent_token.is_empty() {
            anyhow::bail!("buildkite_agent_token cannot be empty");
        }

        if self.vsphere.host.is_empty() {
            anyhow::bail!("vsphere host cannot be empty");
        }

        if self.concurrency == 0 {
            anyhow::bail!("concurrency must be greater than 0");
        }

        if self.poll_interval.is_zero() {
            anyhow::bail!("poll_interval must be greater than 0");
        }

        if self.power_poll_interval.is_zero() {
            anyhow::bail!("power_poll_interval must be greater than 0");
        }

        if self.job_timeout.is_zero() {
            anyhow::bail!("job_timeout must be greater than 0");
        }

        Ok(())
    }

    /// Base creation parameters every job's VM starts from
    pub fn creation_template(&self) -> VmCreationParams {
        let mut guest_info = self.guest_info.clone();
        guest_info.insert(
            AGENT_TOKEN_KEY.to_string(),
            self.buildkite_agent_token.clone(),
        );

        VmCreationParams {
            src_disk_datastore: self.disk_datastore.clone(),
            datastore: self.datastore.clone(),
            network: self.network.clone(),
            vm_folder: self.vm_path.clone(),
            memory_mb: self.memory_mb,
            num_cpus: self.num_cpus,
            num_cores_per_socket: self.num_cores_per_socket,
            guest_info,
            ..Default::default()
        }
    }
}

fn parse<T>(value: Option<String>, key: &str, default: T) -> Result<T>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match value {
        Some(value) => value
            .trim()
            .parse()
            .with_context(|| format!("invalid value for {}: {:?}", key, value)),
        None => Ok(default),
    }
}

fn seconds(value: Option<String>, key: &str, default: u64) -> Result<Duration> {
    parse(value, key, default).map(Duration::from_secs)
}
