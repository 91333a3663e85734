//! Status command
//!
//! Prints every host of the cluster with the VMs running on it.

use anyhow::Result;
use colored::*;
use vmkite_core::domain::job::MANAGED_VM_PREFIX;
use vmkite_vsphere::VmBackend;
use vmkite_vsphere::inventory::Inventory;
use vmkite_vsphere::placement::MAX_MANAGED_VMS_PER_HOST;

use crate::config::Config;

pub async fn show_status(backend: &dyn VmBackend, config: &Config, json: bool) -> Result<()> {
    let inventory = Inventory::load(
        backend,
        &config.cluster_path,
        &config.vm_path,
        MANAGED_VM_PREFIX,
    )
    .await?;

    if json {
        println!("{}", serde_json::to_string_pretty(&inventory)?);
        return Ok(());
    }

    if inventory.hosts.is_empty() {
        println!(
            "{}",
            format!("No hosts found below {}.", config.cluster_path).yellow()
        );
        return Ok(());
    }

    println!(
        "{}",
        format!(
            "Found {} host(s) and {} VM(s):",
            inventory.hosts.len(),
            inventory.virtual_machines.len()
        )
        .bold()
    );
    println!();

    for host in &inventory.hosts {
        let managed = inventory.managed_count(&host.id);
        println!("  {} Host {} ({})", "▸".cyan(), host.ip.bold(), host.id.dimmed());
        println!("    Managed VMs:  {}", colorize_usage(managed));

        for vm in inventory.vms_on(&host.id) {
            let name = if vm.name.starts_with(MANAGED_VM_PREFIX) {
                vm.name.normal()
            } else {
                vm.name.dimmed()
            };
            println!("      - {}", name);
        }
        println!();
    }

    Ok(())
}

fn colorize_usage(managed: usize) -> ColoredString {
    let usage = format!("{}/{}", managed, MAX_MANAGED_VMS_PER_HOST);
    match managed {
        0 => usage.green(),
        n if n < MAX_MANAGED_VMS_PER_HOST => usage.yellow(),
        _ => usage.red(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use vmkite_vsphere::{HostSystem, VirtualMachine};

    #[test]
    fn test_inventory_json() {
        let inventory = Inventory::from_parts(
            vec![HostSystem {
                id: "host-1".to_string(),
                ip: "10.0.0.1".to_string(),
                path: "/DC/host/cluster/10.0.0.1".to_string(),
            }],
            vec![VirtualMachine {
                name: "vmkite-macos-14-J1-20240307-090501".to_string(),
                path: "/DC/vm/vmkite-macos-14-J1-20240307-090501".to_string(),
                host_system_id: Some("host-1".to_string()),
            }],
            MANAGED_VM_PREFIX,
        );

        let value = serde_json::to_value(&inventory).unwrap();

        assert_eq!(value["hosts"][0]["ip"], "10.0.0.1");
        assert_eq!(value["virtual_machines"][0]["host_system_id"], "host-1");
        assert_eq!(value["managed_vm_count"]["host-1"], 1);
    }
}
