//! Precondition checks run before any remote mutation.

use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::VecDeque;
use tracing::{info, warn};

use crate::context::RestoreRequest;
use crate::gate::VersionGate;
use crate::remote::{RemoteCommand, RemoteExecutor, TargetHost};
use crate::snapshot::{BackupStrategy, Snapshot};
use crate::topology::TargetTopology;
use crate::{Error, Result};

/// Interactive operator confirmation
#[async_trait]
pub trait Confirmation: Send + Sync {
    /// Show `prompt` and return the operator's raw answer
    async fn ask(&self, prompt: &str) -> Result<String>;
}

/// Confirmation source answering from a fixed list (for tests and automation)
#[derive(Default)]
pub struct ScriptedConfirmation {
    answers: Mutex<VecDeque<String>>,
    prompts: Mutex<Vec<String>>,
}

impl ScriptedConfirmation {
    pub fn new<I, S>(answers: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            answers: Mutex::new(answers.into_iter().map(Into::into).collect()),
            prompts: Mutex::new(Vec::new()),
        }
    }

    /// Prompts shown so far
    pub fn prompts(&self) -> Vec<String> {
        self.prompts.lock().clone()
    }
}

#[async_trait]
impl Confirmation for ScriptedConfirmation {
    async fn ask(&self, prompt: &str) -> Result<String> {
        self.prompts.lock().push(prompt.to_string());
        Ok(self.answers.lock().pop_front().unwrap_or_default())
    }
}

/// Whether an answer confirms the restore
pub fn is_affirmative(answer: &str) -> bool {
    answer.trim().eq_ignore_ascii_case("yes")
}

/// Confirmation prompt shown before overwriting a configured target
pub fn confirmation_prompt(host: &TargetHost, topology: &TargetTopology, snapshot: &Snapshot) -> String {
    format!(
        "WARNING: All data on GitHub Enterprise appliance {} ({})\n         \
         will be overwritten with data from snapshot {}.\n\
         Please verify that this is the correct restore host before continuing.\n\
         Type 'yes' to continue: ",
        host.hostname, topology.remote_version, snapshot.id
    )
}

/// Snapshot/target compatibility rules that need no remote interaction
pub fn check_compatibility(
    host: &TargetHost,
    request: &RestoreRequest,
    snapshot: &Snapshot,
    topology: &TargetTopology,
    gate: &VersionGate,
) -> Result<()> {
    if !topology.is_cluster && snapshot.strategy == BackupStrategy::Cluster {
        return Err(Error::IncompatibleStrategy {
            host: host.to_string(),
            snapshot: snapshot.id.clone(),
        });
    }

    if topology.has_replication {
        return Err(Error::ReplicationEnabled {
            host: host.to_string(),
        });
    }

    if !request.force && gate.requires_audit_migration && !snapshot.has_audit_migration_sentinel {
        return Err(Error::AuditMigrationRequired {
            snapshot: snapshot.id.clone(),
            snapshot_version: snapshot.instance_version.to_string(),
            remote_version: topology.remote_version.to_string(),
        });
    }

    Ok(())
}

/// Runs every precondition in order
pub struct Preflight<'a> {
    executor: &'a dyn RemoteExecutor,
    confirmation: &'a dyn Confirmation,
}

impl<'a> Preflight<'a> {
    pub fn new(executor: &'a dyn RemoteExecutor, confirmation: &'a dyn Confirmation) -> Self {
        Self {
            executor,
            confirmation,
        }
    }

    /// Validate the run and return the effective settings-restore flag
    pub async fn check(
        &self,
        host: &TargetHost,
        request: &RestoreRequest,
        snapshot: &Snapshot,
        topology: &TargetTopology,
        gate: &VersionGate,
    ) -> Result<bool> {
        check_compatibility(host, request, snapshot, topology, gate)?;

        if !topology.is_configured {
            if !request.restore_settings {
                info!("Target {} is not configured, restoring settings as well", host);
            }
            return Ok(true);
        }

        if request.force {
            warn!("Skipping confirmation for configured target {} (--force)", host);
        } else {
            let answer = self
                .confirmation
                .ask(&confirmation_prompt(host, topology, snapshot))
                .await?;
            if !is_affirmative(&answer) {
                return Err(Error::UserAborted);
            }
        }

        let maintenance = self
            .executor
            .test(host, &RemoteCommand::new("ghe-maintenance").arg("-q"))
            .await
            .map_err(|e| Error::UnreachableTarget {
                host: host.to_string(),
                message: e.to_string(),
            })?;
        if !maintenance {
            return Err(Error::MaintenanceModeRequired {
                host: host.to_string(),
            });
        }

        Ok(request.restore_settings)
    }
}
