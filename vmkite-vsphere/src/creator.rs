//! VM creation with power-on and rollback
//!
//! A VM that was created but could not be started is destroyed again so a
//! failed attempt never leaves a half-built machine behind.

use tracing::{info, warn};

use crate::backend::{VirtualMachine, VmBackend};
use crate::error::Result;
use crate::params::{VmCloneParams, VmCreationParams};

/// Creates a VM from a source disk and powers it on
pub async fn create_and_power_on(
    backend: &dyn VmBackend,
    params: &VmCreationParams,
) -> Result<VirtualMachine> {
    let vm = backend.create_vm(params).await?;
    power_on_or_destroy(backend, vm).await
}

/// Clones a VM from a source VM (and optional snapshot) and powers it on
pub async fn clone_and_power_on(
    backend: &dyn VmBackend,
    params: &VmCloneParams,
) -> Result<VirtualMachine> {
    let vm = backend.clone_vm(params).await?;
    power_on_or_destroy(backend, vm).await
}

/// Powers a VM off if it is running, then destroys it
///
/// Destroy is attempted even when the power state cannot be read or the
/// power off fails.
pub async fn power_off_and_destroy(backend: &dyn VmBackend, vm: &VirtualMachine) -> Result<()> {
    let power_off = match backend.is_powered_on(vm).await {
        Ok(powered_on) => powered_on,
        Err(e) => {
            warn!("Unknown power state of {}, forcing power off: {}", vm.name, e);
            true
        }
    };

    if power_off {
        info!("Powering off {}", vm.name);
        if let Err(e) = backend.power_off(vm).await {
            warn!("Power off of {} failed, destroying anyway: {}", vm.name, e);
        }
    }
    backend.destroy(vm).await
}

async fn power_on_or_destroy(backend: &dyn VmBackend, vm: VirtualMachine) -> Result<VirtualMachine> {
    info!("Powering on {}", vm.name);
    if let Err(e) = backend.power_on(&vm).await {
        warn!("Power on of {} failed, destroying it: {}", vm.name, e);
        if let Err(destroy_err) = backend.destroy(&vm).await {
            warn!("Failed to destroy {}: {}", vm.name, destroy_err);
        }
        return Err(e);
    }
    Ok(vm)
}

/// Short machine label derived from a guest OS identifier
///
/// `darwin14_64Guest` becomes `darwin14-64`.
pub fn machine_label(guest_id: &str) -> String {
    let trimmed = guest_id.strip_suffix("Guest").unwrap_or(guest_id);
    trimmed
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() {
                c.to_ascii_lowercase()
            } else {
                '-'
            }
        })
        .collect::<String>()
        .trim_matches('-')
        .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::HostSystem;
    use crate::error::VsphereError;
    use async_trait::async_trait;
    use std::sync::Mutex;

    #[derive(Default)]
    struct RecordingBackend {
        calls: Mutex<Vec<String>>,
        fail_power_on: bool,
        fail_power_query: bool,
        powered_on: bool,
    }

    impl RecordingBackend {
        fn record(&self, call: impl Into<String>) {
            self.calls.lock().unwrap().push(call.into());
        }

        fn calls(&self) -> Vec<String> {
            self.calls.lock().unwrap().clone()
        }
    }

    fn vm(name: &str) -> VirtualMachine {
        VirtualMachine {
            name: name.to_string(),
            path: format!("/DC/vm/{}", name),
            host_system_id: None,
        }
    }

    #[async_trait]
    impl VmBackend for RecordingBackend {
        async fn find_vm(&self, _name: &str) -> Result<Option<VirtualMachine>> {
            Ok(None)
        }

        async fn create_vm(&self, params: &VmCreationParams) -> Result<VirtualMachine> {
            self.record(format!("create {}", params.name));
            Ok(vm(&params.name))
        }

        async fn clone_vm(&self, params: &VmCloneParams) -> Result<VirtualMachine> {
            self.record(format!("clone {} from {}", params.name, params.src_name));
            Ok(vm(&params.name))
        }

        async fn power_on(&self, vm: &VirtualMachine) -> Result<()> {
            self.record(format!("power_on {}", vm.name));
            if self.fail_power_on {
                return Err(VsphereError::NotFound(vm.name.clone()));
            }
            Ok(())
        }

        async fn power_off(&self, vm: &VirtualMachine) -> Result<()> {
            self.record(format!("power_off {}", vm.name));
            Ok(())
        }

        async fn is_powered_on(&self, vm: &VirtualMachine) -> Result<bool> {
            if self.fail_power_query {
                return Err(VsphereError::Parse(format!("no power state for {}", vm.name)));
            }
            Ok(self.powered_on)
        }

        async fn destroy(&self, vm: &VirtualMachine) -> Result<()> {
            self.record(format!("destroy {}", vm.name));
            Ok(())
        }

        async fn create_snapshot(
            &self,
            _vm: &VirtualMachine,
            _name: &str,
            _description: &str,
        ) -> Result<()> {
            Ok(())
        }

        async fn host_systems(&self, _cluster_path: &str) -> Result<Vec<HostSystem>> {
            Ok(Vec::new())
        }

        async fn virtual_machines(&self, _folder: &str) -> Result<Vec<VirtualMachine>> {
            Ok(Vec::new())
        }
    }

    #[tokio::test]
    async fn test_clone_and_power_on() {
        let backend = RecordingBackend::default();
        let params = VmCloneParams {
            name: "vmkite-a".to_string(),
            src_name: "macos-14".to_string(),
            ..Default::default()
        };

        let vm = clone_and_power_on(&backend, &params).await.unwrap();

        assert_eq!(vm.name, "vmkite-a");
        assert_eq!(
            backend.calls(),
            vec!["clone vmkite-a from macos-14", "power_on vmkite-a"]
        );
    }

    #[tokio::test]
    async fn test_failed_power_on_destroys_vm() {
        let backend = RecordingBackend {
            fail_power_on: true,
            ..Default::default()
        };
        let params = VmCreationParams {
            name: "vmkite-b".to_string(),
            ..Default::default()
        };

        let result = create_and_power_on(&backend, &params).await;

        assert!(result.is_err());
        assert_eq!(
            backend.calls(),
            vec!["create vmkite-b", "power_on vmkite-b", "destroy vmkite-b"]
        );
    }

    #[tokio::test]
    async fn test_power_off_and_destroy() {
        let running = RecordingBackend {
            powered_on: true,
            ..Default::default()
        };
        power_off_and_destroy(&running, &vm("x")).await.unwrap();
        assert_eq!(running.calls(), vec!["power_off x", "destroy x"]);

        let stopped = RecordingBackend::default();
        power_off_and_destroy(&stopped, &vm("y")).await.unwrap();
        assert_eq!(stopped.calls(), vec!["destroy y"]);
    }

    #[tokio::test]
    async fn test_destroys_when_power_state_unknown() {
        let backend = RecordingBackend {
            fail_power_query: true,
            ..Default::default()
        };

        power_off_and_destroy(&backend, &vm("z")).await.unwrap();

        assert_eq!(backend.calls(), vec!["power_off z", "destroy z"]);
    }

    #[test]
    fn test_machine_label() {
        assert_eq!(machine_label("darwin14_64Guest"), "darwin14-64");
        assert_eq!(machine_label("ubuntu64"), "ubuntu64");
    }
}
