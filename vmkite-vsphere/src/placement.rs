//! Host admission for VMs placed on discrete physical hosts
//!
//! Each host runs at most [`MAX_MANAGED_VMS_PER_HOST`] managed VMs, named
//! after the host and one of two slots so names never collide.

use std::fmt;
use tracing::debug;

use crate::backend::HostSystem;
use crate::error::{Result, VsphereError};
use crate::inventory::Inventory;

/// Managed VMs a single host may run at once
pub const MAX_MANAGED_VMS_PER_HOST: usize = 2;

/// One of the two VM slots of a host
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Slot {
    A,
    B,
}

impl Slot {
    pub fn suffix(&self) -> &'static str {
        match self {
            Slot::A => "a",
            Slot::B => "b",
        }
    }
}

impl fmt::Display for Slot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.suffix())
    }
}

/// Host and slot chosen for a new VM
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Placement {
    pub host: HostSystem,
    pub slot: Slot,
}

impl Placement {
    /// VM name for this placement, e.g. `vmkite-darwin14-64-host-10.0.0.5-a`
    pub fn vm_name(&self, label: &str) -> String {
        format!("vmkite-{}-host-{}-{}", label, self.host.ip, self.slot)
    }
}

/// Picks the first host (by ID) with a free slot whose IP matches the prefix
pub fn pick_host(inventory: &Inventory, ip_prefix: &str) -> Result<Placement> {
    for host in &inventory.hosts {
        let count = inventory.managed_count(&host.id);
        if count >= MAX_MANAGED_VMS_PER_HOST {
            debug!("Skipping host {}: {} managed VMs", host.ip, count);
            continue;
        }
        if !host.ip.starts_with(ip_prefix) {
            debug!("Skipping host {}: does not match {}", host.ip, ip_prefix);
            continue;
        }

        let slot_a = format!("-{}-a", host.ip);
        let slot = if inventory
            .virtual_machines
            .iter()
            .any(|vm| vm.name.ends_with(&slot_a))
        {
            Slot::B
        } else {
            Slot::A
        };

        return Ok(Placement {
            host: host.clone(),
            slot,
        });
    }

    Err(VsphereError::NoUsableHost)
}
