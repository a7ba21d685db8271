//! Version gate: which optional steps and strategies apply to a target.

use semver::Version;
use serde::{Deserialize, Serialize};

use crate::version::series;

/// How repositories, gists and pages are restored
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RepositoryStrategy {
    /// Per-datastore restore tools (clusters and 2.13.0+)
    Unified,
    /// Whole-directory rsync for older standalone targets
    LegacyRsync,
}

/// Compatibility decisions for a snapshot/target pair
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct VersionGate {
    pub repository_strategy: RepositoryStrategy,
    /// Audit and hookshot log restore is supported by the target
    pub audit_logs_enabled: bool,
    /// Snapshot must carry the audit migration sentinel (unless forced)
    pub requires_audit_migration: bool,
}

impl VersionGate {
    pub fn evaluate(snapshot_version: &Version, remote_version: &Version, is_cluster: bool) -> Self {
        let repository_strategy = if is_cluster || at_least(remote_version, 2, 13, 0) {
            RepositoryStrategy::Unified
        } else {
            RepositoryStrategy::LegacyRsync
        };

        let audit_logs_enabled = is_cluster || at_least(remote_version, 2, 12, 9);

        let requires_audit_migration = matches!(series(snapshot_version), (2, 9) | (2, 10))
            && at_least(remote_version, 2, 11, 0);

        Self {
            repository_strategy,
            audit_logs_enabled,
            requires_audit_migration,
        }
    }
}

/// Release comparison ignoring pre-release tags
fn at_least(version: &Version, major: u64, minor: u64, patch: u64) -> bool {
    (version.major, version.minor, version.patch) >= (major, minor, patch)
}
