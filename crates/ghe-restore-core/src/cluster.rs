//! Cluster membership queries used for stale node cleanup.
//!
//! Repeated restores onto a standalone target leave git-server records for
//! node identities that no longer exist. Membership is read as JSON from the
//! target and filtered locally.

use serde::Deserialize;
use tracing::debug;

use crate::remote::{ExecOptions, RemoteCommand, RemoteExecutor, Scope, TargetHost};
use crate::Result;

const GIT_SERVER_PREFIX: &str = "git-server-";

/// Remote helper removing every record of a node
pub const CLEANUP_NODE: &str = "/usr/local/share/enterprise/ghe-cluster-cleanup-node";

#[derive(Debug, Deserialize)]
struct ServerRecord {
    host: String,
}

/// Extract git-server node uuids from membership JSON, excluding `exclude`
pub fn parse_other_nodes(json: &str, exclude: &str) -> Result<Vec<String>> {
    let records: Vec<ServerRecord> = serde_json::from_str(json)?;
    let mut nodes: Vec<String> = records
        .into_iter()
        .filter_map(|r| r.host.strip_prefix(GIT_SERVER_PREFIX).map(str::to_string))
        .filter(|uuid| !uuid.is_empty() && uuid != exclude)
        .collect();
    nodes.sort();
    nodes.dedup();
    Ok(nodes)
}

/// Node uuids registered on the target other than `exclude`
pub async fn list_other_nodes(
    executor: &dyn RemoteExecutor,
    host: &TargetHost,
    exclude: &str,
) -> Result<Vec<String>> {
    let command = RemoteCommand::new("ghe-spokes").args(["server", "show", "--json"]);
    let output = executor
        .run(host, Scope::Host, &command, ExecOptions::capture())
        .await?;
    let nodes = parse_other_nodes(&output.stdout, exclude)?;
    debug!("Found {} stale node(s) on {}", nodes.len(), host);
    Ok(nodes)
}

/// Command removing a single stale node
pub fn cleanup_command(uuid: &str) -> RemoteCommand {
    RemoteCommand::new(CLEANUP_NODE).arg(uuid)
}
