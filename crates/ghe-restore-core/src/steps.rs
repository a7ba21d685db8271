//! Restore step catalog.
//!
//! Steps run in catalog order. Each one is gated on the immutable
//! [`RunContext`] and either delegates to an external restore tool or issues
//! a small number of remote commands.

use bytes::Bytes;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::cluster::{cleanup_command, list_other_nodes};
use crate::context::RunContext;
use crate::gate::RepositoryStrategy;
use crate::remote::{ExecOptions, RemoteCommand, RemoteExecutor, Scope};
use crate::snapshot::AUDIT_MIGRATION_SENTINEL;
use crate::tools::{self, ToolRunner};
use crate::{Error, Result};

/// Failure handling for a step
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepPolicy {
    /// Abort the run on failure
    Fatal,
    /// Log a warning and continue
    BestEffort,
}

/// A catalog entry
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Step {
    RemoteLogStart,
    UploadVersion,
    StopScheduler,
    RestoreSettings,
    EnsureServices,
    RestoreUuid,
    Mysql,
    Redis,
    Repositories,
    SshKeys,
    Storage,
    GitHooks,
    Elasticsearch,
    AuditSentinel,
    AuditLogs,
    RestartCache,
    ConfigApply,
    StartScheduler,
    CleanupStaleNodes,
    HostKeys,
    RemoteLogFinish,
}

/// Steps run while the target reports `restoring`
pub const BEFORE_COMPLETE: &[Step] = &[
    Step::RemoteLogStart,
    Step::UploadVersion,
    Step::StopScheduler,
    Step::RestoreSettings,
    Step::EnsureServices,
    Step::RestoreUuid,
    Step::Mysql,
    Step::Redis,
    Step::Repositories,
    Step::SshKeys,
    Step::Storage,
    Step::GitHooks,
    Step::Elasticsearch,
    Step::AuditSentinel,
    Step::AuditLogs,
    Step::RestartCache,
    Step::ConfigApply,
    Step::StartScheduler,
    Step::CleanupStaleNodes,
];

/// Steps run after `complete` has been published.
///
/// Host keys come last because replacing them can break the SSH channel
/// used for status writes.
pub const AFTER_COMPLETE: &[Step] = &[Step::HostKeys, Step::RemoteLogFinish];

/// Scheduling services stopped for the duration of the restore
const SCHEDULER_SERVICES: &[&str] = &["cron", "github-timerd"];

/// A step together with its gating decision
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlannedStep {
    pub step: Step,
    pub enabled: bool,
    pub policy: StepPolicy,
}

/// Evaluate every catalog entry against a context
pub fn plan(ctx: &RunContext) -> Vec<PlannedStep> {
    BEFORE_COMPLETE
        .iter()
        .chain(AFTER_COMPLETE.iter())
        .map(|&step| PlannedStep {
            step,
            enabled: step.is_enabled(ctx),
            policy: step.policy(),
        })
        .collect()
}

/// External collaborators a step may use
pub struct StepDeps<'a> {
    pub executor: &'a dyn RemoteExecutor,
    pub tools: &'a dyn ToolRunner,
}

impl Step {
    pub fn name(&self) -> &'static str {
        match self {
            Step::RemoteLogStart => "remote-log-start",
            Step::UploadVersion => "upload-version",
            Step::StopScheduler => "stop-scheduler",
            Step::RestoreSettings => "settings",
            Step::EnsureServices => "ensure-services",
            Step::RestoreUuid => "uuid",
            Step::Mysql => "mysql",
            Step::Redis => "redis",
            Step::Repositories => "repositories",
            Step::SshKeys => "authorized-keys",
            Step::Storage => "storage",
            Step::GitHooks => "git-hooks",
            Step::Elasticsearch => "elasticsearch",
            Step::AuditSentinel => "audit-sentinel",
            Step::AuditLogs => "audit-logs",
            Step::RestartCache => "restart-cache",
            Step::ConfigApply => "config-apply",
            Step::StartScheduler => "start-scheduler",
            Step::CleanupStaleNodes => "cleanup-stale-nodes",
            Step::HostKeys => "host-keys",
            Step::RemoteLogFinish => "remote-log-finish",
        }
    }

    /// Operator-facing progress line
    pub fn description(&self) -> &'static str {
        match self {
            Step::RemoteLogStart => "Logging restore start on target",
            Step::UploadVersion => "Recording backup-utils version on target",
            Step::StopScheduler => "Stopping cron and timerd",
            Step::RestoreSettings => "Restoring settings and license",
            Step::EnsureServices => "Ensuring MySQL and Elasticsearch are running",
            Step::RestoreUuid => "Restoring UUID",
            Step::Mysql => "Restoring MySQL database",
            Step::Redis => "Restoring Redis database",
            Step::Repositories => "Restoring Git repositories, Gists and Pages",
            Step::SshKeys => "Restoring SSH authorized keys",
            Step::Storage => "Restoring storage data",
            Step::GitHooks => "Restoring custom Git hooks",
            Step::Elasticsearch => "Restoring Elasticsearch indices",
            Step::AuditSentinel => "Marking audit log migration complete",
            Step::AuditLogs => "Restoring Audit logs and hookshot logs",
            Step::RestartCache => "Restarting memcached",
            Step::ConfigApply => "Applying configuration",
            Step::StartScheduler => "Starting cron and timerd",
            Step::CleanupStaleNodes => "Cleaning up stale nodes",
            Step::HostKeys => "Restoring SSH host keys",
            Step::RemoteLogFinish => "Logging restore completion on target",
        }
    }

    pub fn policy(&self) -> StepPolicy {
        match self {
            Step::RemoteLogStart
            | Step::UploadVersion
            | Step::StopScheduler
            | Step::RestartCache
            | Step::StartScheduler
            | Step::RemoteLogFinish => StepPolicy::BestEffort,
            _ => StepPolicy::Fatal,
        }
    }

    pub fn is_enabled(&self, ctx: &RunContext) -> bool {
        match self {
            Step::RestoreSettings => ctx.restore_settings,
            Step::EnsureServices => !ctx.is_cluster(),
            Step::RestoreUuid => ctx.snapshot.has_uuid() && !ctx.is_cluster(),
            Step::Elasticsearch => !ctx.is_cluster() && ctx.snapshot.has_elasticsearch,
            Step::AuditSentinel => ctx.snapshot.has_audit_migration_sentinel,
            Step::AuditLogs => ctx.gate.audit_logs_enabled,
            Step::ConfigApply => ctx.is_cluster() || ctx.is_configured(),
            Step::CleanupStaleNodes => !ctx.is_cluster() && ctx.is_configured(),
            _ => true,
        }
    }

    /// Tools run by a tool-backed step, in order
    pub fn tools(&self, ctx: &RunContext) -> &'static [&'static str] {
        match self {
            Step::RestoreSettings => &[tools::RESTORE_SETTINGS],
            Step::Mysql => &[tools::RESTORE_MYSQL],
            Step::Redis => &[tools::RESTORE_REDIS],
            Step::Repositories => match ctx.gate.repository_strategy {
                RepositoryStrategy::Unified => &[
                    tools::RESTORE_REPOSITORIES,
                    tools::RESTORE_GISTS,
                    tools::RESTORE_PAGES,
                ],
                RepositoryStrategy::LegacyRsync => &[
                    tools::RESTORE_REPOSITORIES_RSYNC,
                    tools::RESTORE_PAGES_RSYNC,
                ],
            },
            Step::SshKeys => &[tools::RESTORE_SSH_KEYS],
            Step::Storage => &[tools::RESTORE_STORAGE],
            Step::GitHooks => &[tools::RESTORE_GIT_HOOKS],
            Step::Elasticsearch => &[tools::RESTORE_ES_RSYNC],
            Step::AuditLogs => &[tools::RESTORE_ES_AUDIT_LOG, tools::RESTORE_ES_HOOKSHOT],
            _ => &[],
        }
    }

    pub async fn execute(&self, ctx: &RunContext, deps: &StepDeps<'_>) -> Result<()> {
        let tools = self.tools(ctx);
        if !tools.is_empty() {
            if *self == Step::Repositories {
                debug!("Repository strategy: {:?}", ctx.gate.repository_strategy);
            }
            let env = ctx.tool_env();
            for tool in tools {
                deps.tools.run(tool, &ctx.host, &env).await?;
            }
            return Ok(());
        }

        let exec = deps.executor;
        let host = &ctx.host;
        let config = &ctx.config;

        match self {
            Step::RemoteLogStart => {
                let message = format!(
                    "Starting restore of {} from snapshot {} with backup-utils v{}",
                    host.hostname, ctx.snapshot.id, config.backup_utils_version
                );
                remote_log(exec, ctx, message).await
            }
            Step::RemoteLogFinish => {
                let message = format!(
                    "Completed restore of {} from snapshot {}",
                    host.hostname, ctx.snapshot.id
                );
                remote_log(exec, ctx, message).await
            }
            Step::UploadVersion => {
                let path = config.common_path("backup-utils-version");
                let data = Bytes::from(format!("{}\n", config.backup_utils_version));
                upload(exec, ctx, &path, data).await
            }
            Step::StopScheduler => services(exec, ctx, "stop").await,
            Step::StartScheduler => services(exec, ctx, "start").await,
            Step::EnsureServices => {
                for ensure in ["ghe-service-ensure-mysql", "ghe-service-ensure-elasticsearch"] {
                    exec.run(host, Scope::Host, &RemoteCommand::new(ensure), ExecOptions::default())
                        .await?;
                }
                Ok(())
            }
            Step::RestoreUuid => restore_uuid(exec, ctx).await,
            Step::AuditSentinel => {
                let command =
                    RemoteCommand::sudo("touch").arg(config.common_path(AUDIT_MIGRATION_SENTINEL));
                exec.run(host, Scope::Host, &command, ExecOptions::default())
                    .await?;
                Ok(())
            }
            Step::RestartCache => {
                let command = RemoteCommand::sudo("restart").args(["-q", "memcached"]);
                exec.run(host, ctx.scope(), &command, ExecOptions::default())
                    .await?;
                Ok(())
            }
            Step::ConfigApply => {
                let command = if ctx.is_cluster() {
                    RemoteCommand::new("ghe-cluster-config-apply")
                } else {
                    RemoteCommand::new("/usr/local/share/enterprise/ghe-config-apply")
                };
                exec.run(host, Scope::Host, &command, ExecOptions::default())
                    .await?;
                Ok(())
            }
            Step::CleanupStaleNodes => cleanup_stale_nodes(exec, ctx).await,
            Step::HostKeys => restore_host_keys(exec, ctx).await,
            other => Err(Error::step(other.name(), "step has no action")),
        }
    }
}

async fn remote_log(exec: &dyn RemoteExecutor, ctx: &RunContext, message: String) -> Result<()> {
    let command = RemoteCommand::new("ghe_remote_logger").arg(message);
    exec.run(&ctx.host, Scope::Host, &command, ExecOptions::default())
        .await?;
    Ok(())
}

async fn upload(exec: &dyn RemoteExecutor, ctx: &RunContext, path: &str, data: Bytes) -> Result<()> {
    let command = RemoteCommand::sudo("tee").arg(path);
    exec.run(&ctx.host, Scope::Host, &command, ExecOptions::with_stdin(data))
        .await?;
    Ok(())
}

/// Stop or start the scheduling services, attempting all of them
async fn services(exec: &dyn RemoteExecutor, ctx: &RunContext, action: &str) -> Result<()> {
    let mut first_error = None;
    for service in SCHEDULER_SERVICES {
        let command = RemoteCommand::sudo("service").args([*service, action]);
        if let Err(e) = exec
            .run(&ctx.host, ctx.scope(), &command, ExecOptions::default())
            .await
        {
            first_error.get_or_insert(e);
        }
    }
    match first_error {
        Some(e) => Err(e),
        None => Ok(()),
    }
}

async fn restore_uuid(exec: &dyn RemoteExecutor, ctx: &RunContext) -> Result<()> {
    let Some(uuid) = ctx.snapshot.uuid.as_deref() else {
        return Ok(());
    };
    let config = &ctx.config;

    upload(exec, ctx, &config.common_path("uuid"), Bytes::from(format!("{}\n", uuid))).await?;

    let stop_consul = RemoteCommand::sudo("systemctl").args(["stop", "consul"]);
    let output = exec
        .exec(&ctx.host, Scope::Host, &stop_consul, ExecOptions::default())
        .await?;
    if !output.success {
        warn!("Could not stop consul on {}: {}", ctx.host, output.stderr.trim());
    }

    let raft = format!(
        "{}/consul/raft",
        config.remote_data_user_dir.trim_end_matches('/')
    );
    exec.run(
        &ctx.host,
        Scope::Host,
        &RemoteCommand::sudo("rm").args(["-rf", raft.as_str()]),
        ExecOptions::default(),
    )
    .await?;
    Ok(())
}

async fn cleanup_stale_nodes(exec: &dyn RemoteExecutor, ctx: &RunContext) -> Result<()> {
    let restored_uuid = match ctx.snapshot.uuid.clone() {
        Some(uuid) => uuid,
        None => {
            let command = RemoteCommand::new("cat").arg(ctx.config.common_path("uuid"));
            let output = exec
                .run(&ctx.host, Scope::Host, &command, ExecOptions::capture())
                .await?;
            output.stdout.trim().to_string()
        }
    };
    if restored_uuid.is_empty() {
        warn!("No node uuid known for {}, skipping stale node cleanup", ctx.host);
        return Ok(());
    }

    let nodes = list_other_nodes(exec, &ctx.host, &restored_uuid).await?;
    for uuid in &nodes {
        info!("Removing stale node {}", uuid);
        exec.run(&ctx.host, Scope::Host, &cleanup_command(uuid), ExecOptions::default())
            .await?;
    }
    Ok(())
}

async fn restore_host_keys(exec: &dyn RemoteExecutor, ctx: &RunContext) -> Result<()> {
    let archive = ctx.snapshot.file("ssh-host-keys.tar");
    let data = Bytes::from(tokio::fs::read(&archive).await.map_err(|e| {
        Error::step(
            Step::HostKeys.name(),
            format!("cannot read {}: {}", archive.display(), e),
        )
    })?);
    let host = &ctx.host;

    if !ctx.is_cluster() {
        exec.run(
            host,
            Scope::Host,
            &RemoteCommand::new("ghe-import-ssh-host-keys"),
            ExecOptions::with_stdin(data),
        )
        .await?;
        return Ok(());
    }

    let common = ctx.config.common_dir();
    exec.run(
        host,
        Scope::Host,
        &RemoteCommand::sudo("tar").args(["-xpf", "-", "-C", common.as_str()]),
        ExecOptions::with_stdin(data),
    )
    .await?;
    exec.run(
        host,
        Scope::Host,
        &RemoteCommand::sudo("find").args([
            common.as_str(),
            "-maxdepth",
            "1",
            "-name",
            "ssh_host_*",
            "-exec",
            "chown",
            "git:git",
            "{}",
            "+",
        ]),
        ExecOptions::default(),
    )
    .await?;
    exec.run(
        host,
        Scope::Host,
        &RemoteCommand::new("ghe-cluster-config-update").arg("-s"),
        ExecOptions::default(),
    )
    .await?;
    Ok(())
}
