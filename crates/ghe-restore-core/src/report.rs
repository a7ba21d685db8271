//! Restore run report.

use serde::{Deserialize, Serialize};

use crate::context::RunContext;
use crate::gate::RepositoryStrategy;
use crate::status::RestoreState;

/// Summary of a restore run
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RestoreReport {
    /// Target host as given, including any port
    pub host: String,

    /// Target hostname without the port
    pub hostname: String,

    /// Restored snapshot id
    pub snapshot_id: String,

    /// Appliance version of the snapshot
    pub snapshot_version: String,

    /// Appliance version of the target
    pub remote_version: String,

    /// Whether the target is a cluster
    pub cluster: bool,

    /// Whether the target was configured before the restore
    pub target_was_configured: bool,

    /// Repository restore strategy that was selected
    pub repository_strategy: RepositoryStrategy,

    /// Last state published to the target
    pub state: Option<RestoreState>,

    /// Steps that ran (including best-effort steps that failed)
    pub executed_steps: Vec<String>,

    /// Steps disabled for this target
    pub skipped_steps: Vec<String>,

    /// Non-fatal problems
    pub warnings: Vec<String>,

    /// Start time (epoch milliseconds)
    pub start_time: i64,

    /// End time (epoch milliseconds)
    pub end_time: i64,

    /// Total duration in milliseconds
    pub duration_ms: u64,
}

impl RestoreReport {
    pub fn new(ctx: &RunContext) -> Self {
        Self {
            host: ctx.host.to_string(),
            hostname: ctx.host.hostname.clone(),
            snapshot_id: ctx.snapshot.id.clone(),
            snapshot_version: ctx.snapshot.instance_version.to_string(),
            remote_version: ctx.topology.remote_version.to_string(),
            cluster: ctx.is_cluster(),
            target_was_configured: ctx.is_configured(),
            repository_strategy: ctx.gate.repository_strategy,
            state: None,
            executed_steps: Vec::new(),
            skipped_steps: Vec::new(),
            warnings: Vec::new(),
            start_time: chrono::Utc::now().timestamp_millis(),
            end_time: 0,
            duration_ms: 0,
        }
    }

    pub fn success(&self) -> bool {
        self.state == Some(RestoreState::Complete)
    }

    /// Final line shown to the operator
    pub fn completion_message(&self) -> String {
        format!(
            "Restore of {} from snapshot {} finished.",
            self.host, self.snapshot_id
        )
    }

    /// Pointer to the web setup flow for targets that were not configured
    pub fn setup_hint(&self) -> Option<String> {
        if self.target_was_configured {
            return None;
        }
        let authority = if self.hostname.contains(':') {
            format!("[{}]", self.hostname)
        } else {
            self.hostname.clone()
        };
        Some(format!(
            "To complete the restore process, please visit https://{}/setup/settings \
             to review and save the appliance configuration.",
            authority
        ))
    }
}
