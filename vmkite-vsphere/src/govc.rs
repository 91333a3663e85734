//! govc-backed virtualization backend
//!
//! Drives the `govc` command line tool against vSphere:
//! - Connection details are passed through the `GOVC_*` environment
//! - Every call is a single `govc` invocation whose stdout is parsed
//! - Guest info is written as `guestinfo.<key>` extra config

use async_trait::async_trait;
use std::collections::BTreeMap;
use tokio::process::Command;
use tracing::{debug, error, info, warn};

use crate::backend::{HostSystem, VirtualMachine, VmBackend};
use crate::error::{Result, VsphereError};
use crate::params::{ConnectionParams, VmCloneParams, VmCreationParams};

const POWERED_ON: &str = "poweredOn";

/// [`VmBackend`] implementation shelling out to `govc`
#[derive(Debug, Clone)]
pub struct GovcBackend {
    connection: ConnectionParams,

    /// Folder searched when looking VMs up by name
    vm_folder: String,

    binary: String,
}

impl GovcBackend {
    /// Creates a backend for the given connection and VM folder
    pub fn new(connection: ConnectionParams, vm_folder: impl Into<String>) -> Self {
        Self {
            connection,
            vm_folder: vm_folder.into(),
            binary: "govc".to_string(),
        }
    }

    /// Checks that govc is installed and can reach the management plane
    pub async fn check_available(&self) -> Result<()> {
        let about = self.run(vec!["about".to_string()]).await?;
        info!("govc is available: {}", about.lines().next().unwrap_or_default());
        Ok(())
    }

    fn command(&self) -> Command {
        let mut command = Command::new(&self.binary);
        command
            .env("GOVC_URL", self.connection.url())
            .env("GOVC_USERNAME", &self.connection.user)
            .env("GOVC_PASSWORD", &self.connection.pass)
            .env(
                "GOVC_INSECURE",
                if self.connection.insecure { "1" } else { "0" },
            )
            .kill_on_drop(true);
        command
    }

    /// Runs `govc <args...>` and returns its stdout
    async fn run(&self, args: Vec<String>) -> Result<String> {
        let subcommand = args.first().cloned().unwrap_or_default();
        debug!("govc {}", args.join(" "));

        let output = self.command().args(&args).output().await?;

        let stdout = String::from_utf8_lossy(&output.stdout).to_string();
        let stderr = String::from_utf8_lossy(&output.stderr);

        if !stderr.trim().is_empty() {
            debug!("govc {} stderr: {}", subcommand, stderr.trim());
        }

        if !output.status.success() {
            let exit_code = output.status.code().unwrap_or(-1);
            error!(
                "govc {} failed: exit_code={}, stderr='{}'",
                subcommand,
                exit_code,
                stderr.trim()
            );
            return Err(VsphereError::Command {
                command: format!("govc {}", subcommand),
                exit_code,
                stderr: stderr.trim().to_string(),
            });
        }

        Ok(stdout)
    }

    fn vm_path(&self, folder: &str, name: &str) -> String {
        let folder = if folder.is_empty() {
            &self.vm_folder
        } else {
            folder
        };
        format!("{}/{}", folder.trim_end_matches('/'), name)
    }

    async fn host_of(&self, vm_path: &str) -> Result<Option<String>> {
        let output = self
            .run(strings(&["object.collect", "-s", vm_path, "runtime.host"]))
            .await?;
        Ok(parse_moref(output.trim()))
    }
}

#[async_trait]
impl VmBackend for GovcBackend {
    async fn find_vm(&self, name: &str) -> Result<Option<VirtualMachine>> {
        let output = self
            .run(strings(&["find", &self.vm_folder, "-type", "m", "-name", name]))
            .await?;

        Ok(output
            .lines()
            .map(str::trim)
            .find(|line| !line.is_empty())
            .map(|path| VirtualMachine {
                name: name.to_string(),
                path: path.to_string(),
                host_system_id: None,
            }))
    }

    async fn create_vm(&self, params: &VmCreationParams) -> Result<VirtualMachine> {
        info!(
            "Creating VM {} from disk [{}] {}",
            params.name, params.src_disk_datastore, params.src_disk_path
        );
        self.run(create_args(params)).await?;

        let vm = VirtualMachine {
            name: params.name.clone(),
            path: self.vm_path(&params.vm_folder, &params.name),
            host_system_id: None,
        };

        let mut extra = BTreeMap::from([
            ("smc.present".to_string(), "TRUE".to_string()),
            ("ich7m.present".to_string(), "TRUE".to_string()),
            ("firmware".to_string(), "efi".to_string()),
            // consistent pci slot for the ethernet card, helps systemd
            ("ethernet0.pciSlotNumber".to_string(), "32".to_string()),
            ("guestinfo.name".to_string(), params.name.clone()),
            (
                "cpuid.coresPerSocket".to_string(),
                params.num_cores_per_socket.to_string(),
            ),
        ]);
        extra.extend(guest_info_config(&params.guest_info));

        let mut args = change_args(&vm.path, &extra);
        args.push("-nested-hv-enabled=true".to_string());

        if let Err(e) = self.run(args).await {
            warn!("Configuring {} failed, destroying it", vm.name);
            if let Err(destroy_err) = self.destroy(&vm).await {
                warn!("Failed to destroy {}: {}", vm.name, destroy_err);
            }
            return Err(e);
        }

        Ok(vm)
    }

    async fn clone_vm(&self, params: &VmCloneParams) -> Result<VirtualMachine> {
        info!(
            "Cloning VM {} from {}@{}",
            params.name,
            params.src_name,
            params.src_snapshot.as_deref().unwrap_or("current")
        );
        self.run(clone_args(params)).await?;

        let vm = VirtualMachine {
            name: params.name.clone(),
            path: self.vm_path(&params.vm_folder, &params.name),
            host_system_id: None,
        };

        let mut extra = guest_info_config(&params.guest_info);
        extra.insert(
            "cpuid.coresPerSocket".to_string(),
            params.num_cores_per_socket.to_string(),
        );

        if let Err(e) = self.run(change_args(&vm.path, &extra)).await {
            warn!("Configuring {} failed, destroying it", vm.name);
            if let Err(destroy_err) = self.destroy(&vm).await {
                warn!("Failed to destroy {}: {}", vm.name, destroy_err);
            }
            return Err(e);
        }

        Ok(vm)
    }

    async fn power_on(&self, vm: &VirtualMachine) -> Result<()> {
        self.run(strings(&["vm.power", "-on", &vm.path])).await?;
        Ok(())
    }

    async fn power_off(&self, vm: &VirtualMachine) -> Result<()> {
        self.run(strings(&["vm.power", "-off", "-force", &vm.path]))
            .await?;
        Ok(())
    }

    async fn is_powered_on(&self, vm: &VirtualMachine) -> Result<bool> {
        let output = self
            .run(strings(&["object.collect", "-s", &vm.path, "runtime.powerState"]))
            .await?;
        Ok(output.trim() == POWERED_ON)
    }

    async fn destroy(&self, vm: &VirtualMachine) -> Result<()> {
        info!("Destroying VM {}", vm.name);
        self.run(strings(&["vm.destroy", &vm.path])).await?;
        Ok(())
    }

    async fn create_snapshot(
        &self,
        vm: &VirtualMachine,
        name: &str,
        description: &str,
    ) -> Result<()> {
        info!("Creating snapshot {} of {}", name, vm.name);
        self.run(strings(&[
            "snapshot.create",
            "-vm",
            &vm.path,
            "-d",
            description,
            name,
        ]))
        .await?;
        Ok(())
    }

    async fn host_systems(&self, cluster_path: &str) -> Result<Vec<HostSystem>> {
        let paths = self
            .run(strings(&["find", cluster_path, "-type", "h"]))
            .await?;
        let refs = self
            .run(strings(&["find", "-i", cluster_path, "-type", "h"]))
            .await?;

        let paths: Vec<&str> = non_empty_lines(&paths).collect();
        let refs: Vec<&str> = non_empty_lines(&refs).collect();
        if paths.len() != refs.len() {
            return Err(VsphereError::Parse(format!(
                "found {} host paths but {} host references below {}",
                paths.len(),
                refs.len(),
                cluster_path
            )));
        }

        paths
            .into_iter()
            .zip(refs)
            .map(|(path, reference)| {
                let id = parse_moref(reference).ok_or_else(|| {
                    VsphereError::Parse(format!("unexpected host reference '{}'", reference))
                })?;
                Ok(HostSystem {
                    id,
                    ip: basename(path).to_string(),
                    path: path.to_string(),
                })
            })
            .collect()
    }

    async fn virtual_machines(&self, folder: &str) -> Result<Vec<VirtualMachine>> {
        let output = self.run(strings(&["find", folder, "-type", "m"])).await?;

        let mut vms = Vec::new();
        for path in non_empty_lines(&output) {
            debug!("Resolving host of {}", path);
            vms.push(VirtualMachine {
                name: basename(path).to_string(),
                path: path.to_string(),
                host_system_id: self.host_of(path).await?,
            });
        }

        Ok(vms)
    }
}

fn strings(args: &[&str]) -> Vec<String> {
    args.iter().map(|arg| arg.to_string()).collect()
}

fn non_empty_lines(output: &str) -> impl Iterator<Item = &str> {
    output.lines().map(str::trim).filter(|line| !line.is_empty())
}

fn basename(path: &str) -> &str {
    path.rsplit('/').next().unwrap_or(path)
}

/// Extracts the ID from a managed object reference ("HostSystem:host-12")
fn parse_moref(reference: &str) -> Option<String> {
    reference
        .split_once(':')
        .map(|(_, id)| id.trim())
        .filter(|id| !id.is_empty())
        .map(str::to_string)
}

fn guest_info_config(guest_info: &BTreeMap<String, String>) -> BTreeMap<String, String> {
    guest_info
        .iter()
        .map(|(key, value)| {
            debug!("setting guestinfo.{} => {:?}", key, value);
            (format!("guestinfo.{}", key), value.clone())
        })
        .collect()
}

fn create_args(params: &VmCreationParams) -> Vec<String> {
    let mut args = strings(&["vm.create", "-on=false", "-link=true"]);
    args.push(format!("-m={}", params.memory_mb));
    args.push(format!("-c={}", params.num_cpus));
    args.push(format!("-g={}", params.guest_id));
    args.push(format!("-net={}", params.network));
    args.push(format!("-ds={}", params.datastore));
    args.push(format!("-disk={}", params.src_disk_path));
    args.push(format!("-disk-datastore={}", params.src_disk_datastore));
    if !params.vm_folder.is_empty() {
        args.push(format!("-folder={}", params.vm_folder));
    }
    if let Some(host) = &params.host {
        args.push(format!("-host={}", host));
    }
    args.push(params.name.clone());
    args
}

fn clone_args(params: &VmCloneParams) -> Vec<String> {
    let mut args = strings(&["vm.clone", "-vm", &params.src_name, "-on=false", "-link=true"]);
    args.push(format!("-m={}", params.memory_mb));
    args.push(format!("-c={}", params.num_cpus));
    if !params.vm_folder.is_empty() {
        args.push(format!("-folder={}", params.vm_folder));
    }
    if let Some(snapshot) = &params.src_snapshot {
        args.push(format!("-snapshot={}", snapshot));
    }
    args.push(params.name.clone());
    args
}

fn change_args(vm_path: &str, extra_config: &BTreeMap<String, String>) -> Vec<String> {
    let mut args = strings(&["vm.change", "-vm", vm_path]);
    for (key, value) in extra_config {
        args.push("-e".to_string());
        args.push(format!("{}={}", key, value));
    }
    args
}
