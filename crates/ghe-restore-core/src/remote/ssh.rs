//! OpenSSH-based executor.

use async_trait::async_trait;
use bytes::Bytes;
use std::io::ErrorKind;
use std::path::PathBuf;
use std::process::{Output, Stdio};
use tokio::io::AsyncWriteExt;
use tokio::process::{Child, Command};
use tracing::{debug, trace};

use super::{ExecOptions, ExecOutput, RemoteCommand, RemoteExecutor, Scope, TargetHost};
use crate::config::SshConfig;
use crate::error::TransportError;
use crate::Result;

/// ssh exits 255 when the connection itself fails
const SSH_CONNECTION_FAILURE: i32 = 255;

/// Remote command that runs its arguments on every cluster node
const CLUSTER_EACH: &str = "ghe-cluster-each";

/// Executes commands with the system `ssh` client.
pub struct SshExecutor {
    config: SshConfig,
}

impl SshExecutor {
    pub fn new(config: SshConfig) -> Self {
        Self { config }
    }

    fn control_path(&self) -> Option<PathBuf> {
        self.config.control_dir.as_ref().map(|dir| dir.join("%C"))
    }

    fn base_command(&self, host: &TargetHost) -> Command {
        let mut cmd = Command::new("ssh");
        cmd.arg("-p")
            .arg(host.port.unwrap_or(self.config.port).to_string())
            .arg("-l")
            .arg(&self.config.user)
            .arg("-o")
            .arg("BatchMode=yes");

        for option in &self.config.options {
            cmd.arg("-o").arg(option);
        }

        if let Some(control_path) = self.control_path() {
            cmd.arg("-o")
                .arg("ControlMaster=auto")
                .arg("-o")
                .arg(format!("ControlPath={}", control_path.display()))
                .arg("-o")
                .arg("ControlPersist=10m");
        }

        cmd
    }

    /// Render the remote command line for a scope
    pub fn remote_line(scope: Scope, command: &RemoteCommand) -> String {
        match scope {
            Scope::Host => command.render(),
            Scope::AllNodes => format!("{} -- {}", CLUSTER_EACH, command.render()),
        }
    }
}

/// Feed `input` to the child's stdin while its stdout and stderr are drained.
///
/// A child that exits without reading all of its input is not an error here;
/// its exit status tells the caller what happened.
async fn collect_output(mut child: Child, input: Option<Bytes>) -> std::io::Result<Output> {
    let stdin = child.stdin.take();
    let write = async move {
        match (stdin, input) {
            (Some(mut stdin), Some(data)) => {
                stdin.write_all(&data).await?;
                stdin.shutdown().await
            }
            _ => Ok(()),
        }
    };

    let (written, output) = tokio::join!(write, child.wait_with_output());
    if let Err(e) = written {
        if e.kind() != ErrorKind::BrokenPipe {
            return Err(e);
        }
    }
    output
}

#[async_trait]
impl RemoteExecutor for SshExecutor {
    async fn exec(
        &self,
        host: &TargetHost,
        scope: Scope,
        command: &RemoteCommand,
        options: ExecOptions,
    ) -> Result<ExecOutput> {
        let line = Self::remote_line(scope, command);
        debug!("ssh {}: {}", host, line);

        let mut cmd = self.base_command(host);
        cmd.arg(&host.hostname)
            .arg("--")
            .arg(&line)
            .stdin(if options.stdin.is_some() {
                Stdio::piped()
            } else {
                Stdio::null()
            })
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let child = cmd.spawn().map_err(|e| TransportError::Spawn {
            program: "ssh".to_string(),
            message: e.to_string(),
        })?;

        let output = collect_output(child, options.stdin).await?;
        let status = output.status.code().unwrap_or(-1);
        let stdout = String::from_utf8_lossy(&output.stdout).to_string();
        let stderr = String::from_utf8_lossy(&output.stderr).to_string();

        if status == SSH_CONNECTION_FAILURE {
            return Err(TransportError::ConnectionFailed {
                host: host.to_string(),
                message: stderr.trim().to_string(),
            }
            .into());
        }

        for l in stdout.lines() {
            trace!("[{}] {}", host, l);
        }

        Ok(ExecOutput {
            success: output.status.success(),
            status,
            stdout: if options.capture_output {
                stdout
            } else {
                String::new()
            },
            stderr,
        })
    }

    async fn release(&self, host: &TargetHost) -> Result<()> {
        let Some(control_path) = self.control_path() else {
            return Ok(());
        };

        debug!("Closing multiplexed connection to {}", host);
        let status = Command::new("ssh")
            .arg("-p")
            .arg(host.port.unwrap_or(self.config.port).to_string())
            .arg("-l")
            .arg(&self.config.user)
            .arg("-o")
            .arg(format!("ControlPath={}", control_path.display()))
            .arg("-O")
            .arg("exit")
            .arg(&host.hostname)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .status()
            .await
            .map_err(|e| TransportError::Spawn {
                program: "ssh".to_string(),
                message: e.to_string(),
            })?;

        // No master running is not an error worth surfacing.
        if !status.success() {
            debug!("No multiplexed connection to close for {}", host);
        }
        Ok(())
    }
}
