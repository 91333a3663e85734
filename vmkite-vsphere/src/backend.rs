//! Virtualization backend abstraction

use async_trait::async_trait;
use serde::Serialize;

use crate::error::Result;
use crate::params::{VmCloneParams, VmCreationParams};

/// A virtual machine known to the backend
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct VirtualMachine {
    pub name: String,

    /// Inventory path (e.g., "/DC/vm/vmkite-macos-14-...")
    pub path: String,

    /// Managed object ID of the host running the VM, when known
    pub host_system_id: Option<String>,
}

/// A physical host of the cluster
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct HostSystem {
    /// Managed object ID (e.g., "host-12")
    pub id: String,

    /// Host name as registered in the inventory, normally its IP address
    pub ip: String,

    /// Inventory path of the host
    pub path: String,
}

/// Operations vmkite needs from a hypervisor management plane
#[async_trait]
pub trait VmBackend: Send + Sync {
    /// Looks a VM up by name, returning `None` if it does not exist
    async fn find_vm(&self, name: &str) -> Result<Option<VirtualMachine>>;

    /// Creates a powered-off VM attached to a source disk
    async fn create_vm(&self, params: &VmCreationParams) -> Result<VirtualMachine>;

    /// Creates a powered-off linked clone of a source VM snapshot
    async fn clone_vm(&self, params: &VmCloneParams) -> Result<VirtualMachine>;

    async fn power_on(&self, vm: &VirtualMachine) -> Result<()>;

    async fn power_off(&self, vm: &VirtualMachine) -> Result<()>;

    async fn is_powered_on(&self, vm: &VirtualMachine) -> Result<bool>;

    /// Destroys the VM, powering it off first if needed
    async fn destroy(&self, vm: &VirtualMachine) -> Result<()>;

    async fn create_snapshot(
        &self,
        vm: &VirtualMachine,
        name: &str,
        description: &str,
    ) -> Result<()>;

    /// Lists the hosts below a cluster path
    async fn host_systems(&self, cluster_path: &str) -> Result<Vec<HostSystem>>;

    /// Lists the VMs in a folder together with the host they run on
    async fn virtual_machines(&self, folder: &str) -> Result<Vec<VirtualMachine>>;
}
