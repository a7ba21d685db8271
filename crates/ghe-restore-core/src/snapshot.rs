//! Snapshot directory model.
//!
//! A snapshot is a directory below the data dir containing, among others:
//! - `strategy`: backup strategy name (`tarball`, `rsync` or `cluster`)
//! - `version`: appliance version the snapshot was taken from
//! - `uuid`: optional node identity
//! - `es-scan-complete`: optional audit log migration sentinel
//! - `elasticsearch/`: optional search index data

use semver::Version;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use tracing::debug;

use crate::version::parse_version;
use crate::{Error, Result};

/// Name of the snapshot alias pointing at the most recent snapshot
pub const CURRENT_SNAPSHOT: &str = "current";

/// Sentinel written once the audit log migration has finished
pub const AUDIT_MIGRATION_SENTINEL: &str = "es-scan-complete";

/// Backup strategy recorded in the snapshot
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackupStrategy {
    Tarball,
    Rsync,
    Cluster,
}

impl FromStr for BackupStrategy {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim() {
            "tarball" => Ok(BackupStrategy::Tarball),
            "rsync" => Ok(BackupStrategy::Rsync),
            "cluster" => Ok(BackupStrategy::Cluster),
            other => Err(Error::Snapshot(format!("Unknown backup strategy '{}'", other))),
        }
    }
}

impl fmt::Display for BackupStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            BackupStrategy::Tarball => "tarball",
            BackupStrategy::Rsync => "rsync",
            BackupStrategy::Cluster => "cluster",
        };
        f.write_str(name)
    }
}

/// A resolved, read-only snapshot
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Snapshot {
    /// Snapshot identifier (directory name, never `current`)
    pub id: String,
    /// Absolute or data-dir relative path of the snapshot
    pub path: PathBuf,
    /// Backup strategy used to take the snapshot
    pub strategy: BackupStrategy,
    /// Version of the appliance the snapshot was taken from
    pub instance_version: Version,
    /// Whether the audit log migration sentinel is present
    pub has_audit_migration_sentinel: bool,
    /// Node identity captured in the snapshot
    pub uuid: Option<String>,
    /// Whether the snapshot carries an `elasticsearch/` directory
    pub has_elasticsearch: bool,
}

impl Snapshot {
    /// Resolve and load a snapshot from `data_dir`.
    ///
    /// `None` or `current` resolves the `current` alias to the real snapshot id.
    pub async fn load(data_dir: &Path, id: Option<&str>) -> Result<Self> {
        let requested = id.unwrap_or(CURRENT_SNAPSHOT);
        let alias = data_dir.join(requested);

        let path = tokio::fs::canonicalize(&alias).await.map_err(|e| {
            Error::Snapshot(format!("Snapshot '{}' not found: {}", alias.display(), e))
        })?;
        if !tokio::fs::metadata(&path).await?.is_dir() {
            return Err(Error::Snapshot(format!(
                "Snapshot '{}' is not a directory",
                path.display()
            )));
        }

        let resolved_id = path
            .file_name()
            .and_then(|n| n.to_str())
            .map(str::to_string)
            .ok_or_else(|| Error::Snapshot(format!("Invalid snapshot path {}", path.display())))?;
        debug!("Resolved snapshot '{}' to {}", requested, path.display());

        let strategy = read_required(&path, "strategy").await?.parse()?;
        let version_raw = read_required(&path, "version").await?;
        let instance_version = parse_version(&version_raw)?;

        let uuid = match tokio::fs::read_to_string(path.join("uuid")).await {
            Ok(s) if !s.trim().is_empty() => Some(s.trim().to_string()),
            _ => None,
        };

        let has_audit_migration_sentinel = exists(&path.join(AUDIT_MIGRATION_SENTINEL)).await;
        let has_elasticsearch = is_dir(&path.join("elasticsearch")).await;

        Ok(Self {
            id: resolved_id,
            path,
            strategy,
            instance_version,
            has_audit_migration_sentinel,
            uuid,
            has_elasticsearch,
        })
    }

    pub fn has_uuid(&self) -> bool {
        self.uuid.is_some()
    }

    /// Path of a file inside the snapshot
    pub fn file(&self, name: &str) -> PathBuf {
        self.path.join(name)
    }
}

async fn read_required(dir: &Path, name: &str) -> Result<String> {
    let content = tokio::fs::read_to_string(dir.join(name))
        .await
        .map_err(|e| Error::Snapshot(format!("Missing '{}' in {}: {}", name, dir.display(), e)))?;
    let trimmed = content.trim();
    if trimmed.is_empty() {
        return Err(Error::Snapshot(format!(
            "Empty '{}' in {}",
            name,
            dir.display()
        )));
    }
    Ok(trimmed.to_string())
}

async fn exists(path: &Path) -> bool {
    tokio::fs::metadata(path).await.is_ok()
}

async fn is_dir(path: &Path) -> bool {
    tokio::fs::metadata(path)
        .await
        .map(|m| m.is_dir())
        .unwrap_or(false)
}
