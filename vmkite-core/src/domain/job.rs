//! Job domain types
//!
//! A job is one unit of CI work reported by the provider that needs an
//! ephemeral VM. Placement metadata is carried by the job's agent query
//! rules (`key=value` tags) and parsed into [`JobMetadata`].

use chrono::{DateTime, Utc};
use std::fmt;

/// Tag naming the source VM/template a job's VM is cloned from
pub const TEMPLATE_TAG: &str = "vmkite-template";

/// Tag naming the source disk image a job's VM is created from
pub const VMDK_TAG: &str = "vmkite-vmdk";

/// Tag naming the guest OS type of a disk-based VM
pub const GUEST_ID_TAG: &str = "vmkite-guestid";

/// Prefix of every VM name managed by vmkite
pub const MANAGED_VM_PREFIX: &str = "vmkite-";

/// A pending job reported by the CI provider
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Job {
    /// Provider-assigned job ID, unique for the lifetime of the job
    pub id: String,
    pub pipeline: String,
    pub build_number: String,
    pub created_at: DateTime<Utc>,
    pub metadata: JobMetadata,
}

impl Job {
    /// Identifier of the template this job's VM derives from
    ///
    /// Used as the key for snapshot reuse.
    pub fn template_key(&self) -> String {
        self.metadata.template_key()
    }

    /// Deterministic name of the VM for this job
    ///
    /// Derived from template, job ID and job creation time so a VM left
    /// behind by a previous process can be found again.
    pub fn vm_name(&self) -> String {
        format!(
            "{}{}-{}-{}",
            MANAGED_VM_PREFIX,
            sanitize(&self.template_key()),
            self.id,
            self.created_at.format("%Y%m%d-%H%M%S")
        )
    }
}

impl fmt::Display for Job {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}/{}", self.pipeline, self.build_number, self.id)
    }
}

/// Placement metadata parsed from a job's tags
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct JobMetadata {
    pub template: Option<String>,
    pub vmdk: Option<String>,
    pub guest_id: Option<String>,
}

impl JobMetadata {
    /// Parses `key=value` tags
    ///
    /// Unknown keys, entries without `=` and empty values are ignored.
    pub fn from_tags<S: AsRef<str>>(tags: &[S]) -> Self {
        let mut metadata = Self::default();

        for tag in tags {
            let Some((key, value)) = tag.as_ref().split_once('=') else {
                continue;
            };
            let value = value.trim();
            if value.is_empty() {
                continue;
            }

            match key.trim() {
                TEMPLATE_TAG => metadata.template = Some(value.to_string()),
                VMDK_TAG => metadata.vmdk = Some(value.to_string()),
                GUEST_ID_TAG => metadata.guest_id = Some(value.to_string()),
                _ => {}
            }
        }

        metadata
    }

    /// Whether a job with this metadata can be scheduled
    pub fn is_eligible(&self) -> bool {
        self.source().is_some()
    }

    /// Where the job's VM comes from, preferring a template over a disk
    pub fn source(&self) -> Option<VmSource> {
        if let Some(template) = &self.template {
            return Some(VmSource::Template {
                name: template.clone(),
            });
        }

        match (&self.vmdk, &self.guest_id) {
            (Some(path), Some(guest_id)) => Some(VmSource::Disk {
                path: path.clone(),
                guest_id: guest_id.clone(),
            }),
            _ => None,
        }
    }

    /// Template name, or the directory holding the source disk
    pub fn template_key(&self) -> String {
        if let Some(template) = &self.template {
            return template.clone();
        }

        let Some(vmdk) = &self.vmdk else {
            return String::new();
        };

        match vmdk.rsplit_once('/') {
            Some((dir, _)) if !dir.is_empty() => dir.to_string(),
            _ => vmdk
                .rsplit_once('.')
                .map(|(stem, _)| stem.to_string())
                .unwrap_or_else(|| vmdk.clone()),
        }
    }
}

/// Default source of a job's VM when no snapshot can be reused
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum VmSource {
    /// Clone the named template VM from its current snapshot
    Template { name: String },

    /// Create a fresh VM attached to a source disk image
    Disk { path: String, guest_id: String },
}

fn sanitize(name: &str) -> String {
    name.chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '-' { c } else { '-' })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn job(metadata: JobMetadata) -> Job {
        Job {
            id: "J1".to_string(),
            pipeline: "ci".to_string(),
            build_number: "42".to_string(),
            created_at: Utc.with_ymd_and_hms(2024, 3, 7, 9, 5, 1).unwrap(),
            metadata,
        }
    }

    #[test]
    fn test_from_tags_recognized_keys() {
        let metadata = JobMetadata::from_tags(&[
            "queue=default",
            "vmkite-vmdk=macos-14/macos-14.vmdk",
            "vmkite-guestid=darwin14_64Guest",
            "vmkite-template=macos-14",
        ]);

        assert_eq!(metadata.template.as_deref(), Some("macos-14"));
        assert_eq!(metadata.vmdk.as_deref(), Some("macos-14/macos-14.vmdk"));
        assert_eq!(metadata.guest_id.as_deref(), Some("darwin14_64Guest"));
    }

    #[test]
    fn test_from_tags_ignores_malformed_and_empty() {
        let metadata = JobMetadata::from_tags(&["vmkite-template", "vmkite-vmdk=", "=x"]);
        assert_eq!(metadata, JobMetadata::default());
        assert!(!metadata.is_eligible());
    }

    #[test]
    fn test_value_may_contain_equals() {
        let metadata = JobMetadata::from_tags(&["vmkite-template=a=b"]);
        assert_eq!(metadata.template.as_deref(), Some("a=b"));
    }

    #[test]
    fn test_eligibility() {
        let disk_only = JobMetadata::from_tags(&["vmkite-vmdk=a/b.vmdk"]);
        assert!(!disk_only.is_eligible());

        let disk = JobMetadata::from_tags(&["vmkite-vmdk=a/b.vmdk", "vmkite-guestid=g"]);
        assert_eq!(
            disk.source(),
            Some(VmSource::Disk {
                path: "a/b.vmdk".to_string(),
                guest_id: "g".to_string()
            })
        );

        let template = JobMetadata::from_tags(&["vmkite-template=macos-14"]);
        assert_eq!(
            template.source(),
            Some(VmSource::Template {
                name: "macos-14".to_string()
            })
        );
    }

    #[test]
    fn test_template_key_from_vmdk() {
        let nested = JobMetadata::from_tags(&["vmkite-vmdk=macos-14/disk.vmdk"]);
        assert_eq!(nested.template_key(), "macos-14");

        let flat = JobMetadata::from_tags(&["vmkite-vmdk=macos-14.vmdk"]);
        assert_eq!(flat.template_key(), "macos-14");
    }

    #[test]
    fn test_vm_name_is_deterministic() {
        let job = job(JobMetadata::from_tags(&["vmkite-template=macos-14"]));
        assert_eq!(job.vm_name(), "vmkite-macos-14-J1-20240307-090501");
        assert_eq!(job.vm_name(), job.clone().vm_name());
    }

    #[test]
    fn test_vm_name_sanitizes_template() {
        let job = job(JobMetadata::from_tags(&["vmkite-template=macOS_10.12"]));
        assert!(job.vm_name().starts_with("vmkite-macOS-10-12-J1-"));
    }

    #[test]
    fn test_display() {
        let job = job(JobMetadata::default());
        assert_eq!(job.to_string(), "ci/42/J1");
    }
}
