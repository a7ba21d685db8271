//! Remote command execution.
//!
//! Commands are built as typed argument vectors and only rendered into a
//! shell string at the transport boundary, with every argument quoted.
//! Fan-out to cluster nodes is a [`Scope`] of the call rather than part of
//! the command text.

mod host;
mod recording;
mod ssh;

use async_trait::async_trait;
use bytes::Bytes;
use std::fmt;

use crate::error::TransportError;
use crate::Result;

pub use host::TargetHost;
pub use recording::{Journal, RecordedCall, RecordingExecutor};
pub use ssh::SshExecutor;

/// Where a remote command runs
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Scope {
    /// Only on the named host
    Host,
    /// On every node of the cluster the named host belongs to
    AllNodes,
}

impl Scope {
    /// Broadcast scope for clusters, single host otherwise
    pub fn for_cluster(is_cluster: bool) -> Self {
        if is_cluster {
            Scope::AllNodes
        } else {
            Scope::Host
        }
    }
}

/// A command to run on the target
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteCommand {
    program: String,
    args: Vec<String>,
}

impl RemoteCommand {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
        }
    }

    /// `sudo <program>`
    pub fn sudo(program: impl Into<String>) -> Self {
        Self::new("sudo").arg(program)
    }

    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    /// Render as a single shell-safe string
    pub fn render(&self) -> String {
        std::iter::once(&self.program)
            .chain(self.args.iter())
            .map(|s| shell_quote(s))
            .collect::<Vec<_>>()
            .join(" ")
    }
}

impl fmt::Display for RemoteCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.render())
    }
}

/// Quote a word for a POSIX shell, leaving plain words untouched.
pub fn shell_quote(word: &str) -> String {
    let plain = !word.is_empty()
        && word
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || "-_./:=@%+,".contains(c));
    if plain {
        word.to_string()
    } else {
        format!("'{}'", word.replace('\'', "'\\''"))
    }
}

/// Options for a single remote execution
#[derive(Debug, Clone, Default)]
pub struct ExecOptions {
    /// Return stdout to the caller instead of only logging it
    pub capture_output: bool,
    /// Data fed to the remote command's stdin
    pub stdin: Option<Bytes>,
}

impl ExecOptions {
    pub fn capture() -> Self {
        Self {
            capture_output: true,
            stdin: None,
        }
    }

    pub fn with_stdin(data: impl Into<Bytes>) -> Self {
        Self {
            capture_output: false,
            stdin: Some(data.into()),
        }
    }
}

/// Result of a remote execution that reached the target
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExecOutput {
    pub success: bool,
    pub status: i32,
    pub stdout: String,
    pub stderr: String,
}

impl ExecOutput {
    pub fn ok(stdout: impl Into<String>) -> Self {
        Self {
            success: true,
            status: 0,
            stdout: stdout.into(),
            stderr: String::new(),
        }
    }

    pub fn failed(status: i32, stderr: impl Into<String>) -> Self {
        Self {
            success: false,
            status,
            stdout: String::new(),
            stderr: stderr.into(),
        }
    }
}

/// Synchronous remote command execution against a target host.
///
/// `Err` means the transport itself failed (spawn error, connection lost);
/// a command that ran and exited non-zero is `Ok` with `success == false`.
#[async_trait]
pub trait RemoteExecutor: Send + Sync {
    /// Execute a command on the host (or all nodes of its cluster)
    async fn exec(
        &self,
        host: &TargetHost,
        scope: Scope,
        command: &RemoteCommand,
        options: ExecOptions,
    ) -> Result<ExecOutput>;

    /// Release connection multiplexing resources held for the host
    async fn release(&self, host: &TargetHost) -> Result<()>;

    /// Run a command and return whether it exited zero
    async fn test(&self, host: &TargetHost, command: &RemoteCommand) -> Result<bool> {
        Ok(self
            .exec(host, Scope::Host, command, ExecOptions::default())
            .await?
            .success)
    }

    /// Run a command, turning a non-zero exit into an error
    async fn run(
        &self,
        host: &TargetHost,
        scope: Scope,
        command: &RemoteCommand,
        options: ExecOptions,
    ) -> Result<ExecOutput> {
        let output = self.exec(host, scope, command, options).await?;
        if output.success {
            Ok(output)
        } else {
            Err(TransportError::CommandFailed {
                host: host.to_string(),
                status: output.status,
                stderr: output.stderr.trim().to_string(),
            }
            .into())
        }
    }
}
