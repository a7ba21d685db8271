//! In-memory executor for testing.

use async_trait::async_trait;
use bytes::Bytes;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use super::{ExecOptions, ExecOutput, RemoteCommand, RemoteExecutor, Scope, TargetHost};
use crate::error::TransportError;
use crate::Result;

/// Shared, ordered log of every external interaction.
///
/// Entries are `remote: <command>` (prefixed with `[all] ` for broadcasts)
/// and `tool: <name>`, so tests can assert ordering across collaborators.
#[derive(Debug, Clone, Default)]
pub struct Journal(Arc<Mutex<Vec<String>>>);

impl Journal {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&self, entry: impl Into<String>) {
        self.0.lock().push(entry.into());
    }

    pub fn entries(&self) -> Vec<String> {
        self.0.lock().clone()
    }

    /// Index of the first entry containing `needle`
    pub fn position(&self, needle: &str) -> Option<usize> {
        self.0.lock().iter().position(|e| e.contains(needle))
    }

    pub fn count(&self, needle: &str) -> usize {
        self.0.lock().iter().filter(|e| e.contains(needle)).count()
    }
}

/// A call observed by [`RecordingExecutor`]
#[derive(Debug, Clone)]
pub struct RecordedCall {
    pub host: TargetHost,
    pub scope: Scope,
    pub command: String,
    pub stdin: Option<Bytes>,
}

enum Reply {
    Output(ExecOutput),
    Unreachable,
}

/// Executor that records every call and answers from scripted rules.
///
/// Rules match when the rendered command contains the pattern; the most
/// recently added matching rule wins. Unmatched commands succeed with
/// empty output.
#[derive(Default)]
pub struct RecordingExecutor {
    rules: Mutex<Vec<(String, Reply)>>,
    calls: Mutex<Vec<RecordedCall>>,
    releases: AtomicUsize,
    journal: Journal,
}

impl RecordingExecutor {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_journal(journal: Journal) -> Self {
        Self {
            journal,
            ..Default::default()
        }
    }

    /// Reply with the given output to commands containing `pattern`
    pub fn respond(&self, pattern: &str, output: ExecOutput) -> &Self {
        self.rules
            .lock()
            .push((pattern.to_string(), Reply::Output(output)));
        self
    }

    /// Make commands containing `pattern` exit with status 1
    pub fn fail(&self, pattern: &str) -> &Self {
        self.respond(pattern, ExecOutput::failed(1, format!("{} failed", pattern)))
    }

    /// Make commands containing `pattern` fail at the transport level
    pub fn unreachable(&self, pattern: &str) -> &Self {
        self.rules
            .lock()
            .push((pattern.to_string(), Reply::Unreachable));
        self
    }

    pub fn calls(&self) -> Vec<RecordedCall> {
        self.calls.lock().clone()
    }

    pub fn commands(&self) -> Vec<String> {
        self.calls.lock().iter().map(|c| c.command.clone()).collect()
    }

    pub fn release_count(&self) -> usize {
        self.releases.load(Ordering::SeqCst)
    }

    pub fn journal(&self) -> &Journal {
        &self.journal
    }
}

#[async_trait]
impl RemoteExecutor for RecordingExecutor {
    async fn exec(
        &self,
        host: &TargetHost,
        scope: Scope,
        command: &RemoteCommand,
        options: ExecOptions,
    ) -> Result<ExecOutput> {
        let rendered = command.render();
        let prefix = match scope {
            Scope::Host => "",
            Scope::AllNodes => "[all] ",
        };
        self.journal.push(format!("remote: {}{}", prefix, rendered));
        self.calls.lock().push(RecordedCall {
            host: host.clone(),
            scope,
            command: rendered.clone(),
            stdin: options.stdin.clone(),
        });

        let rules = self.rules.lock();
        match rules.iter().rev().find(|(p, _)| rendered.contains(p.as_str())) {
            Some((_, Reply::Output(output))) => Ok(output.clone()),
            Some((_, Reply::Unreachable)) => Err(TransportError::ConnectionFailed {
                host: host.to_string(),
                message: "connection refused".to_string(),
            }
            .into()),
            None => Ok(ExecOutput::ok("")),
        }
    }

    async fn release(&self, _host: &TargetHost) -> Result<()> {
        self.journal.push("release");
        self.releases.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}
