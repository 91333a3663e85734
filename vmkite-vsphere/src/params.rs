//! Connection and VM parameter types

use std::collections::BTreeMap;

/// Credentials for the vSphere management plane
#[derive(Debug, Clone, Default)]
pub struct ConnectionParams {
    pub host: String,
    pub user: String,
    pub pass: String,
    pub insecure: bool,
}

impl ConnectionParams {
    /// SDK endpoint URL of the vCenter/ESXi host
    pub fn url(&self) -> String {
        format!("https://{}/sdk", self.host)
    }
}

/// Everything needed to create a VM from a source disk
///
/// A template of these is built once from configuration; the runner fills in
/// the per-job fields (`name`, disk, guest type, guest info) for every job.
#[derive(Debug, Clone, Default)]
pub struct VmCreationParams {
    pub name: String,
    pub guest_id: String,
    pub src_disk_datastore: String,
    pub src_disk_path: String,
    pub datastore: String,
    pub network: String,
    /// Folder new VMs are placed in
    pub vm_folder: String,
    /// Inventory path of the host to place the VM on; any host when `None`
    pub host: Option<String>,
    pub memory_mb: u64,
    pub num_cpus: u32,
    pub num_cores_per_socket: u32,
    /// Key/value pairs the guest can read back as `guestinfo.<key>`
    pub guest_info: BTreeMap<String, String>,
}

impl VmCreationParams {
    /// Derives clone parameters sharing this template's sizing and guest info
    pub fn clone_params(
        &self,
        src_name: impl Into<String>,
        src_snapshot: Option<String>,
    ) -> VmCloneParams {
        VmCloneParams {
            name: self.name.clone(),
            src_name: src_name.into(),
            src_snapshot,
            vm_folder: self.vm_folder.clone(),
            memory_mb: self.memory_mb,
            num_cpus: self.num_cpus,
            num_cores_per_socket: self.num_cores_per_socket,
            guest_info: self.guest_info.clone(),
        }
    }
}

/// Everything needed to clone a VM from a snapshot of another VM
#[derive(Debug, Clone, Default)]
pub struct VmCloneParams {
    pub name: String,
    pub src_name: String,
    /// Snapshot to clone from; the source's current snapshot when `None`
    pub src_snapshot: Option<String>,
    pub vm_folder: String,
    pub memory_mb: u64,
    pub num_cpus: u32,
    pub num_cores_per_socket: u32,
    pub guest_info: BTreeMap<String, String>,
}

/// Parses `key=value` pairs separated by commas
///
/// Entries without `=` or with an empty key are skipped.
pub fn parse_key_values(input: &str) -> BTreeMap<String, String> {
    input
        .split(',')
        .filter_map(|pair| pair.split_once('='))
        .filter(|(key, _)| !key.trim().is_empty())
        .map(|(key, value)| (key.trim().to_string(), value.trim().to_string()))
        .collect()
}
