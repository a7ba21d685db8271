//! Restore request and the immutable per-run context.

use serde::{Deserialize, Serialize};
use std::sync::Arc;

use crate::config::Config;
use crate::gate::VersionGate;
use crate::remote::{Scope, TargetHost};
use crate::snapshot::Snapshot;
use crate::tools::ToolEnv;
use crate::topology::TargetTopology;

/// What the operator asked for
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RestoreRequest {
    /// Target host, optionally `host:port`
    pub target_host: String,
    /// Snapshot id; `None` means `current`
    pub snapshot_id: Option<String>,
    /// Restore appliance settings and license in addition to datastores
    pub restore_settings: bool,
    /// Skip confirmation and the audit migration check
    pub force: bool,
    pub verbose: bool,
}

/// Everything decided before the first remote mutation.
///
/// Built once after probing and validation and passed by reference to every
/// step; the topology is never re-queried during a run.
#[derive(Debug, Clone)]
pub struct RunContext {
    pub host: TargetHost,
    pub snapshot: Snapshot,
    pub topology: TargetTopology,
    pub gate: VersionGate,
    /// Effective settings flag (forced on for unconfigured targets)
    pub restore_settings: bool,
    pub force: bool,
    pub verbose: bool,
    pub config: Arc<Config>,
}

impl RunContext {
    pub fn is_cluster(&self) -> bool {
        self.topology.is_cluster
    }

    pub fn is_configured(&self) -> bool {
        self.topology.is_configured
    }

    /// Fan-out scope for service-level commands
    pub fn scope(&self) -> Scope {
        Scope::for_cluster(self.topology.is_cluster)
    }

    pub fn tool_env(&self) -> ToolEnv {
        ToolEnv {
            snapshot_id: self.snapshot.id.clone(),
            snapshot_path: self.snapshot.path.clone(),
            verbose: self.verbose,
        }
    }
}
