//! Restore status protocol.
//!
//! The current [`RestoreState`] is written as a single-line token to a file
//! under the remote user data directory, on every node for clusters.
//! Transitions are monotonic: `restoring` then exactly one of `failed` or
//! `complete`.

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use tracing::debug;

use crate::remote::{ExecOptions, RemoteCommand, RemoteExecutor, Scope, TargetHost};
use crate::{Error, Result};

/// Name of the status file below `<remote_data_user_dir>/common`
pub const STATUS_FILE: &str = "ghe-restore-status";

/// Observable restore state on the target
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RestoreState {
    Restoring,
    Failed,
    Complete,
}

impl RestoreState {
    pub fn as_str(&self) -> &'static str {
        match self {
            RestoreState::Restoring => "restoring",
            RestoreState::Failed => "failed",
            RestoreState::Complete => "complete",
        }
    }

    pub fn is_terminal(&self) -> bool {
        !matches!(self, RestoreState::Restoring)
    }

    /// Whether `next` may follow `current` within one run
    pub fn can_follow(current: Option<RestoreState>, next: RestoreState) -> bool {
        match (current, next) {
            (None, RestoreState::Restoring) => true,
            (Some(RestoreState::Restoring), s) => s.is_terminal(),
            _ => false,
        }
    }
}

impl fmt::Display for RestoreState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Writes the state token to the target, enforcing monotonic transitions
pub struct StatusPublisher {
    executor: Arc<dyn RemoteExecutor>,
    host: TargetHost,
    scope: Scope,
    path: String,
    last: Mutex<Option<RestoreState>>,
}

impl StatusPublisher {
    pub fn new(executor: Arc<dyn RemoteExecutor>, host: TargetHost, is_cluster: bool, path: String) -> Self {
        Self {
            executor,
            host,
            scope: Scope::for_cluster(is_cluster),
            path,
            last: Mutex::new(None),
        }
    }

    /// Last state successfully published in this run
    pub fn current(&self) -> Option<RestoreState> {
        *self.last.lock()
    }

    /// Command writing `state` to the status file
    pub fn write_command(&self, state: RestoreState) -> RemoteCommand {
        RemoteCommand::sudo("sh")
            .arg("-c")
            .arg("printf '%s\\n' \"$0\" > \"$1\"")
            .arg(state.as_str())
            .arg(self.path.as_str())
    }

    pub async fn publish(&self, state: RestoreState) -> Result<()> {
        let current = self.current();
        if !RestoreState::can_follow(current, state) {
            return Err(Error::Guard(format!(
                "refusing status transition {} -> {}",
                current.map(|s| s.as_str()).unwrap_or("unset"),
                state
            )));
        }

        debug!("Publishing restore status '{}' to {}", state, self.host);
        self.executor
            .run(&self.host, self.scope, &self.write_command(state), ExecOptions::default())
            .await
            .map_err(|e| Error::StatusPublish {
                state: state.to_string(),
                message: e.to_string(),
            })?;

        *self.last.lock() = Some(state);
        Ok(())
    }
}
