//! External restore tools.
//!
//! Each datastore is restored by a dedicated executable that receives the
//! target host as its first argument and the snapshot through the
//! environment. The orchestrator never retries a tool.

use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use tokio::process::Command;
use tracing::debug;

use crate::remote::{Journal, TargetHost};
use crate::{Error, Result};

pub const RESTORE_SETTINGS: &str = "ghe-restore-settings";
pub const RESTORE_MYSQL: &str = "ghe-restore-mysql";
pub const RESTORE_REDIS: &str = "ghe-restore-redis";
pub const RESTORE_REPOSITORIES: &str = "ghe-restore-repositories";
pub const RESTORE_GISTS: &str = "ghe-restore-gists";
pub const RESTORE_PAGES: &str = "ghe-restore-pages";
pub const RESTORE_REPOSITORIES_RSYNC: &str = "ghe-restore-repositories-rsync";
pub const RESTORE_PAGES_RSYNC: &str = "ghe-restore-pages-rsync";
pub const RESTORE_SSH_KEYS: &str = "ghe-restore-ssh-keys";
pub const RESTORE_STORAGE: &str = "ghe-restore-storage";
pub const RESTORE_GIT_HOOKS: &str = "ghe-restore-git-hooks";
pub const RESTORE_ES_RSYNC: &str = "ghe-restore-es-rsync";
pub const RESTORE_ES_AUDIT_LOG: &str = "ghe-restore-es-audit-log";
pub const RESTORE_ES_HOOKSHOT: &str = "ghe-restore-es-hookshot";

/// Environment handed to every tool
#[derive(Debug, Clone)]
pub struct ToolEnv {
    pub snapshot_id: String,
    pub snapshot_path: PathBuf,
    pub verbose: bool,
}

impl ToolEnv {
    fn vars(&self) -> [(&'static str, String); 3] {
        [
            ("GHE_RESTORE_SNAPSHOT", self.snapshot_id.clone()),
            (
                "GHE_RESTORE_SNAPSHOT_PATH",
                self.snapshot_path.display().to_string(),
            ),
            ("GHE_VERBOSE", if self.verbose { "1" } else { "" }.to_string()),
        ]
    }
}

/// Runs external restore tools
#[async_trait]
pub trait ToolRunner: Send + Sync {
    /// Run `tool` against `host`; a non-zero exit is an error
    async fn run(&self, tool: &str, host: &TargetHost, env: &ToolEnv) -> Result<()>;
}

/// Spawns tools from a directory on the local machine
pub struct ProcessToolRunner {
    tools_dir: PathBuf,
}

impl ProcessToolRunner {
    pub fn new(tools_dir: impl AsRef<Path>) -> Self {
        Self {
            tools_dir: tools_dir.as_ref().to_path_buf(),
        }
    }
}

#[async_trait]
impl ToolRunner for ProcessToolRunner {
    async fn run(&self, tool: &str, host: &TargetHost, env: &ToolEnv) -> Result<()> {
        let program = self.tools_dir.join(tool);
        debug!("Running {} {}", program.display(), host);

        let mut cmd = Command::new(&program);
        cmd.arg(host.to_string())
            .envs(env.vars())
            .stdin(Stdio::null())
            .stdout(if env.verbose {
                Stdio::inherit()
            } else {
                Stdio::null()
            })
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let output = cmd
            .output()
            .await
            .map_err(|e| Error::step(tool, format!("failed to spawn {}: {}", program.display(), e)))?;

        if output.status.success() {
            Ok(())
        } else {
            let stderr = String::from_utf8_lossy(&output.stderr);
            Err(Error::step(
                tool,
                format!(
                    "exited with status {}: {}",
                    output.status.code().unwrap_or(-1),
                    stderr.trim()
                ),
            ))
        }
    }
}

/// Tool runner for tests: records invocations and fails selected tools
#[derive(Default)]
pub struct RecordingToolRunner {
    failing: Mutex<HashSet<String>>,
    runs: Mutex<Vec<String>>,
    journal: Journal,
}

impl RecordingToolRunner {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_journal(journal: Journal) -> Self {
        Self {
            journal,
            ..Default::default()
        }
    }

    pub fn fail(&self, tool: &str) -> &Self {
        self.failing.lock().insert(tool.to_string());
        self
    }

    pub fn runs(&self) -> Vec<String> {
        self.runs.lock().clone()
    }

    pub fn ran(&self, tool: &str) -> bool {
        self.runs.lock().iter().any(|t| t == tool)
    }
}

#[async_trait]
impl ToolRunner for RecordingToolRunner {
    async fn run(&self, tool: &str, _host: &TargetHost, _env: &ToolEnv) -> Result<()> {
        self.journal.push(format!("tool: {}", tool));
        self.runs.lock().push(tool.to_string());
        if self.failing.lock().contains(tool) {
            Err(Error::step(tool, "exited with status 1"))
        } else {
            Ok(())
        }
    }
}
