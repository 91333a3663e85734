//! Commands module
//!
//! Defines all CLI commands and their handlers.

mod status;
mod vm;

use vm::{CloneVmArgs, CreateVmArgs};

use anyhow::Result;
use clap::Subcommand;
use vmkite_vsphere::GovcBackend;

use crate::config::Config;

/// Top-level CLI commands
#[derive(Subcommand)]
pub enum Commands {
    /// Show hosts and the managed VMs running on them
    Status {
        /// Print the inventory as JSON
        #[arg(long)]
        json: bool,
    },
    /// Create a VM from a disk image on a host with a free slot
    CreateVm(CreateVmArgs),
    /// Clone a VM from another VM or one of its snapshots
    CloneVm(CloneVmArgs),
    /// Power off and destroy a VM
    DestroyVm {
        /// Name of the VM
        name: String,
    },
}

/// Handle a CLI command
///
/// Routes the command to the appropriate handler module.
pub async fn handle_command(command: Commands, config: &Config) -> Result<()> {
    let backend = GovcBackend::new(config.connection.clone(), config.vm_path.clone());

    match command {
        Commands::Status { json } => status::show_status(&backend, config, json).await,
        Commands::CreateVm(args) => vm::create_vm(&backend, config, args).await,
        Commands::CloneVm(args) => vm::clone_vm(&backend, config, args).await,
        Commands::DestroyVm { name } => vm::destroy_vm(&backend, &name).await,
    }
}
