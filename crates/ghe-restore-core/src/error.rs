//! Error types for the restore orchestrator.

use thiserror::Error;

/// Result type alias using the library's Error type.
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for the restore library.
#[derive(Error, Debug)]
pub enum Error {
    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Snapshot could not be resolved or is malformed
    #[error("Snapshot error: {0}")]
    Snapshot(String),

    /// Version string could not be parsed
    #[error("Invalid version '{input}': {message}")]
    Version { input: String, message: String },

    /// Remote transport failure
    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),

    /// The target host could not be reached during probing
    #[error("Target {host} is unreachable: {message}")]
    UnreachableTarget { host: String, message: String },

    /// Cluster snapshot applied to a standalone target
    #[error("Snapshot {snapshot} was taken from a cluster and cannot be restored to standalone target {host}")]
    IncompatibleStrategy { host: String, snapshot: String },

    /// Replication is enabled on the target
    #[error("Target {host} has replication enabled")]
    ReplicationEnabled { host: String },

    /// Snapshot predates the audit log migration
    #[error("Snapshot {snapshot} (version {snapshot_version}) has not completed the audit log migration required by target version {remote_version}")]
    AuditMigrationRequired {
        snapshot: String,
        snapshot_version: String,
        remote_version: String,
    },

    /// Configured target is not in maintenance mode
    #[error("Target {host} must be put in maintenance mode before restoring")]
    MaintenanceModeRequired { host: String },

    /// Operator declined the confirmation prompt
    #[error("Restore aborted by user")]
    UserAborted,

    /// A fatal restore step failed
    #[error("Restore step '{step}' failed: {message}")]
    StepFailed { step: String, message: String },

    /// Publishing the restore status failed
    #[error("Failed to publish restore status '{state}': {message}")]
    StatusPublish { state: String, message: String },

    /// Restore was interrupted between steps
    #[error("Restore interrupted")]
    Interrupted,

    /// Exit guard misuse
    #[error("Exit guard error: {0}")]
    Guard(String),
}

/// Transport-specific errors
#[derive(Error, Debug)]
#[non_exhaustive]
pub enum TransportError {
    /// The remote command could not be spawned
    #[error("Failed to spawn '{program}': {message}")]
    Spawn { program: String, message: String },

    /// The remote command exited unsuccessfully
    #[error("Command on {host} exited with status {status}: {stderr}")]
    CommandFailed {
        host: String,
        status: i32,
        stderr: String,
    },

    /// Connection could not be established
    #[error("Failed to connect to {host}: {message}")]
    ConnectionFailed { host: String, message: String },

    /// Invalid host specification
    #[error("Invalid host: {0}")]
    InvalidHost(String),
}

impl Error {
    /// Whether this error was raised before any remote mutation took place.
    pub fn is_precondition(&self) -> bool {
        matches!(
            self,
            Error::IncompatibleStrategy { .. }
                | Error::ReplicationEnabled { .. }
                | Error::AuditMigrationRequired { .. }
                | Error::MaintenanceModeRequired { .. }
                | Error::UserAborted
        )
    }

    /// Operator-facing remediation hint, if one applies.
    pub fn hint(&self) -> Option<&'static str> {
        match self {
            Error::IncompatibleStrategy { .. } => {
                Some("Restore cluster snapshots to a configured cluster target only.")
            }
            Error::ReplicationEnabled { .. } => Some(
                "Restoring to an appliance with replication enabled is not supported. \
                 Please teardown replication before restoring.",
            ),
            Error::AuditMigrationRequired { .. } => Some(
                "Run the audit log migration on the source appliance and take a new snapshot, \
                 or pass --force to skip this check.",
            ),
            Error::MaintenanceModeRequired { .. } => {
                Some("Enable maintenance mode on the target and re-run the restore.")
            }
            Error::UnreachableTarget { .. } => {
                Some("Check that the host is reachable over SSH on the administrative port.")
            }
            _ => None,
        }
    }

    pub(crate) fn step(step: &str, err: impl std::fmt::Display) -> Self {
        Error::StepFailed {
            step: step.to_string(),
            message: err.to_string(),
        }
    }
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Error::Serialization(err.to_string())
    }
}

impl From<serde_yaml::Error> for Error {
    fn from(err: serde_yaml::Error) -> Self {
        Error::Serialization(err.to_string())
    }
}
