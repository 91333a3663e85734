//! Configuration module
//!
//! Connection and inventory settings shared by every command.

use vmkite_vsphere::ConnectionParams;

/// CLI configuration
#[derive(Debug, Clone)]
pub struct Config {
    pub connection: ConnectionParams,

    /// Inventory path of the cluster holding the hosts
    pub cluster_path: String,

    /// Folder managed VMs live in
    pub vm_path: String,
}
