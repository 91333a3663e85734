//! VM command handlers
//!
//! Create, clone and destroy VMs outside of the runner.

use anyhow::{Result, bail};
use clap::Args;
use colored::*;
use std::collections::BTreeMap;
use vmkite_core::domain::job::MANAGED_VM_PREFIX;
use vmkite_vsphere::creator::{
    clone_and_power_on, create_and_power_on, machine_label, power_off_and_destroy,
};
use vmkite_vsphere::inventory::Inventory;
use vmkite_vsphere::placement::pick_host;
use vmkite_vsphere::{VmBackend, VmCloneParams, VmCreationParams};

use crate::config::Config;

/// Sizing and guest info shared by create and clone
#[derive(Args, Debug)]
pub struct VmArgs {
    #[arg(long, env = "VM_MEMORY_MB", default_value_t = 4096)]
    pub memory_mb: u64,

    #[arg(long, env = "VM_NUM_CPUS", default_value_t = 4)]
    pub num_cpus: u32,

    #[arg(long, env = "VM_NUM_CORES_PER_SOCKET", default_value_t = 1)]
    pub num_cores_per_socket: u32,

    /// Guest info entry readable inside the VM (repeatable)
    #[arg(long = "guest-info", value_name = "KEY=VALUE", value_parser = parse_key_value)]
    pub guest_info: Vec<(String, String)>,
}

impl VmArgs {
    fn guest_info(&self) -> BTreeMap<String, String> {
        self.guest_info.iter().cloned().collect()
    }
}

#[derive(Args, Debug)]
pub struct CreateVmArgs {
    /// Source disk path inside the disk datastore
    #[arg(long)]
    pub vmdk: String,

    /// Guest OS identifier (e.g., darwin14_64Guest)
    #[arg(long)]
    pub guest_id: String,

    /// Only hosts whose IP starts with this prefix are used
    #[arg(long, env = "HOST_IP_PREFIX")]
    pub host_ip_prefix: String,

    #[arg(long, env = "VM_DATASTORE", default_value = "PURE1-1")]
    pub datastore: String,

    #[arg(long, env = "VM_DISK_DATASTORE", default_value = "PURE1-1")]
    pub disk_datastore: String,

    #[arg(long, env = "VM_NETWORK", default_value = "dvPortGroup-Private-1")]
    pub network: String,

    #[command(flatten)]
    pub vm: VmArgs,
}

#[derive(Args, Debug)]
pub struct CloneVmArgs {
    /// VM to clone from
    pub source: String,

    /// Name of the new VM
    pub name: String,

    /// Snapshot of the source to clone from
    #[arg(long)]
    pub snapshot: Option<String>,

    #[command(flatten)]
    pub vm: VmArgs,
}

/// Create a VM on the first host with a free slot
pub async fn create_vm(backend: &dyn VmBackend, config: &Config, args: CreateVmArgs) -> Result<()> {
    let inventory = Inventory::load(
        backend,
        &config.cluster_path,
        &config.vm_path,
        MANAGED_VM_PREFIX,
    )
    .await?;
    let placement = pick_host(&inventory, &args.host_ip_prefix)?;
    let name = placement.vm_name(&machine_label(&args.guest_id));

    println!(
        "Creating {} on host {} (slot {})",
        name.bold(),
        placement.host.ip.cyan(),
        placement.slot
    );

    let params = VmCreationParams {
        name,
        guest_id: args.guest_id.clone(),
        src_disk_datastore: args.disk_datastore.clone(),
        src_disk_path: args.vmdk.clone(),
        datastore: args.datastore.clone(),
        network: args.network.clone(),
        vm_folder: config.vm_path.clone(),
        host: Some(placement.host.path.clone()),
        memory_mb: args.vm.memory_mb,
        num_cpus: args.vm.num_cpus,
        num_cores_per_socket: args.vm.num_cores_per_socket,
        guest_info: args.vm.guest_info(),
    };

    let vm = create_and_power_on(backend, &params).await?;
    println!("{} {}", "✓ Created".green(), vm.path);

    Ok(())
}

/// Clone a VM and power it on
pub async fn clone_vm(backend: &dyn VmBackend, config: &Config, args: CloneVmArgs) -> Result<()> {
    let params = VmCloneParams {
        name: args.name.clone(),
        src_name: args.source.clone(),
        src_snapshot: args.snapshot.clone(),
        vm_folder: config.vm_path.clone(),
        memory_mb: args.vm.memory_mb,
        num_cpus: args.vm.num_cpus,
        num_cores_per_socket: args.vm.num_cores_per_socket,
        guest_info: args.vm.guest_info(),
    };

    println!("Cloning {} from {}", params.name.bold(), params.src_name);

    let vm = clone_and_power_on(backend, &params).await?;
    println!("{} {}", "✓ Cloned".green(), vm.path);

    Ok(())
}

/// Power off (if needed) and destroy a VM
pub async fn destroy_vm(backend: &dyn VmBackend, name: &str) -> Result<()> {
    let Some(vm) = backend.find_vm(name).await? else {
        bail!("VM {} not found", name);
    };

    power_off_and_destroy(backend, &vm).await?;
    println!("{} {}", "✓ Destroyed".green(), vm.path);

    Ok(())
}

fn parse_key_value(input: &str) -> Result<(String, String), String> {
    match input.split_once('=') {
        Some((key, value)) if !key.trim().is_empty() => {
            Ok((key.trim().to_string(), value.trim().to_string()))
        }
        _ => Err(format!("expected KEY=VALUE, got '{}'", input)),
    }
}
