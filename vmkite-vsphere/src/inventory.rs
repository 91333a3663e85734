//! Snapshot of the cluster's hosts and managed VMs

use serde::Serialize;
use std::collections::BTreeMap;
use tracing::debug;

use crate::backend::{HostSystem, VirtualMachine, VmBackend};
use crate::error::Result;

/// Hosts and VMs of a cluster at one point in time
#[derive(Debug, Clone, Default, Serialize)]
pub struct Inventory {
    /// Hosts sorted by ID
    pub hosts: Vec<HostSystem>,

    pub virtual_machines: Vec<VirtualMachine>,

    /// Number of managed VMs per host ID; every host has an entry
    pub managed_vm_count: BTreeMap<String, usize>,
}

impl Inventory {
    /// Loads hosts below `cluster_path` and VMs in `vm_folder`
    ///
    /// VMs whose name starts with `managed_prefix` are counted against the
    /// host they run on.
    pub async fn load(
        backend: &dyn VmBackend,
        cluster_path: &str,
        vm_folder: &str,
        managed_prefix: &str,
    ) -> Result<Self> {
        let hosts = backend.host_systems(cluster_path).await?;
        let virtual_machines = backend.virtual_machines(vm_folder).await?;
        debug!(
            "Loaded {} hosts and {} VMs",
            hosts.len(),
            virtual_machines.len()
        );
        Ok(Self::from_parts(hosts, virtual_machines, managed_prefix))
    }

    pub fn from_parts(
        mut hosts: Vec<HostSystem>,
        virtual_machines: Vec<VirtualMachine>,
        managed_prefix: &str,
    ) -> Self {
        hosts.sort_by(|a, b| a.id.cmp(&b.id));

        let mut managed_vm_count: BTreeMap<String, usize> =
            hosts.iter().map(|host| (host.id.clone(), 0)).collect();

        for vm in &virtual_machines {
            if !vm.name.starts_with(managed_prefix) {
                continue;
            }
            if let Some(host_id) = &vm.host_system_id {
                *managed_vm_count.entry(host_id.clone()).or_default() += 1;
            }
        }

        Self {
            hosts,
            virtual_machines,
            managed_vm_count,
        }
    }

    /// Managed VMs running on the host
    pub fn managed_count(&self, host_id: &str) -> usize {
        self.managed_vm_count.get(host_id).copied().unwrap_or(0)
    }

    /// VMs running on the host
    pub fn vms_on<'a>(&'a self, host_id: &'a str) -> impl Iterator<Item = &'a VirtualMachine> {
        self.virtual_machines
            .iter()
            .filter(move |vm| vm.host_system_id.as_deref() == Some(host_id))
    }
}
