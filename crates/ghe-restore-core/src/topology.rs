//! Target topology probing.
//!
//! Probes are read-only and independent of one another: three marker file
//! checks plus a version query.

use semver::Version;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::config::Config;
use crate::remote::{ExecOptions, RemoteCommand, RemoteExecutor, Scope, TargetHost};
use crate::version::parse_release;
use crate::{Error, Result};

/// Classification of the restore target, fixed for the whole run
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TargetTopology {
    pub is_configured: bool,
    pub is_cluster: bool,
    pub has_replication: bool,
    pub remote_version: Version,
}

/// Issues the probes against a host
pub struct TopologyProber<'a> {
    executor: &'a dyn RemoteExecutor,
    config: &'a Config,
}

impl<'a> TopologyProber<'a> {
    pub fn new(executor: &'a dyn RemoteExecutor, config: &'a Config) -> Self {
        Self { executor, config }
    }

    /// Probe the target. Any transport failure maps to `UnreachableTarget`.
    pub async fn probe(&self, host: &TargetHost) -> Result<TargetTopology> {
        let remote_version = self.remote_version(host).await?;
        let is_configured = self.marker(host, "/etc/github/configured").await?;
        let is_cluster = self.marker(host, "/etc/github/cluster").await?;
        let has_replication = self.marker(host, "/etc/github/repl-state").await?;

        let topology = TargetTopology {
            is_configured,
            is_cluster,
            has_replication,
            remote_version,
        };
        info!(
            "Target {} runs version {} (configured: {}, cluster: {}, replication: {})",
            host,
            topology.remote_version,
            topology.is_configured,
            topology.is_cluster,
            topology.has_replication
        );
        Ok(topology)
    }

    async fn marker(&self, host: &TargetHost, path: &str) -> Result<bool> {
        let path = self.config.remote_path(path);
        let command = RemoteCommand::new("test").args(["-f", path.as_str()]);
        let present = self
            .executor
            .test(host, &command)
            .await
            .map_err(|e| unreachable(host, e))?;
        debug!("Marker {} on {}: {}", path, host, present);
        Ok(present)
    }

    async fn remote_version(&self, host: &TargetHost) -> Result<Version> {
        let path = self.config.remote_path("/etc/github/enterprise-release");
        let command = RemoteCommand::new("cat").arg(path);
        let output = self
            .executor
            .run(host, Scope::Host, &command, ExecOptions::capture())
            .await
            .map_err(|e| unreachable(host, e))?;
        parse_release(&output.stdout)
    }
}

fn unreachable(host: &TargetHost, err: Error) -> Error {
    Error::UnreachableTarget {
        host: host.to_string(),
        message: err.to_string(),
    }
}
