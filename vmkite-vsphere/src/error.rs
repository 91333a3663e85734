//! Error types for the virtualization backend

use thiserror::Error;

/// Result type alias for backend operations
pub type Result<T> = std::result::Result<T, VsphereError>;

/// Errors raised while talking to the hypervisor management plane
#[derive(Debug, Error)]
pub enum VsphereError {
    /// A backend command exited unsuccessfully
    #[error("{command} failed (exit code {exit_code}): {stderr}")]
    Command {
        command: String,
        exit_code: i32,
        stderr: String,
    },

    /// The backend command could not be spawned
    #[error("Failed to run backend command: {0}")]
    Io(#[from] std::io::Error),

    /// Backend output could not be interpreted
    #[error("Failed to parse backend output: {0}")]
    Parse(String),

    /// The named object does not exist
    #[error("Not found: {0}")]
    NotFound(String),

    /// No host passed the placement rules
    #[error("no usable host found")]
    NoUsableHost,
}
