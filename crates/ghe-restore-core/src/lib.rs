//! Appliance Restore Core Library
//!
//! This crate restores an appliance snapshot onto a remote target host,
//! standalone or clustered. It probes the target, decides which restore
//! steps apply, publishes the restore status on the target and guarantees
//! that an interrupted or failed run leaves the target marked `failed`.

pub mod cluster;
pub mod config;
pub mod context;
pub mod error;
pub mod gate;
pub mod guard;
pub mod orchestrator;
pub mod preflight;
pub mod remote;
pub mod report;
pub mod snapshot;
pub mod status;
pub mod steps;
pub mod tools;
pub mod topology;
pub mod version;

pub use config::{Config, SshConfig};
pub use context::{RestoreRequest, RunContext};
pub use error::{Error, Result, TransportError};
pub use gate::{RepositoryStrategy, VersionGate};
pub use guard::{ExitGuard, GuardOutcome};
pub use orchestrator::RestoreOrchestrator;
pub use preflight::{Confirmation, ScriptedConfirmation};
pub use remote::{
    ExecOptions, ExecOutput, RecordingExecutor, RemoteCommand, RemoteExecutor, Scope,
    SshExecutor, TargetHost,
};
pub use report::RestoreReport;
pub use snapshot::{BackupStrategy, Snapshot};
pub use status::{RestoreState, StatusPublisher};
pub use steps::{PlannedStep, Step, StepPolicy};
pub use tools::{ProcessToolRunner, RecordingToolRunner, ToolEnv, ToolRunner};
pub use topology::{TargetTopology, TopologyProber};
