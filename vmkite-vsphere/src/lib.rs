//! vmkite vSphere
//!
//! The virtualization side of vmkite:
//! - [`VmBackend`]: the operations the runner needs from a hypervisor
//!   management plane (find, create, clone, power, snapshot, destroy,
//!   inventory)
//! - [`GovcBackend`]: implementation driving the `govc` command line tool
//! - [`creator`]: create/clone followed by power-on, with rollback
//! - [`inventory`] and [`placement`]: host usage and the per-host quota rule
//!   used when VMs are placed on discrete physical hosts

mod backend;
pub mod creator;
pub mod error;
mod govc;
pub mod inventory;
mod params;
pub mod placement;

pub use backend::{HostSystem, VirtualMachine, VmBackend};
pub use error::{Result, VsphereError};
pub use govc::GovcBackend;
pub use params::{ConnectionParams, VmCloneParams, VmCreationParams, parse_key_values};
