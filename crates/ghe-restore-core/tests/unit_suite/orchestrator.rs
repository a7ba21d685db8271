//! End-to-end orchestrator runs against recording collaborators.

use async_trait::async_trait;
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;

use super::helpers::*;
use ghe_restore_core::remote::Journal;
use ghe_restore_core::tools::{
    RESTORE_ES_AUDIT_LOG, RESTORE_ES_HOOKSHOT, RESTORE_ES_RSYNC, RESTORE_GISTS, RESTORE_MYSQL,
    RESTORE_PAGES, RESTORE_PAGES_RSYNC, RESTORE_REDIS, RESTORE_REPOSITORIES,
    RESTORE_REPOSITORIES_RSYNC, RESTORE_SETTINGS, RESTORE_STORAGE,
};
use ghe_restore_core::{
    Config, Error, RecordingExecutor, RecordingToolRunner, RepositoryStrategy, RestoreOrchestrator,
    ScriptedConfirmation, Scope, Step, TargetHost, ToolEnv, ToolRunner,
};

#[tokio::test]
async fn test_fresh_standalone_restore() {
    let h = Harness::new(TargetSpec::fresh("2.13.0"), SnapshotSpec::rsync("2.13.0"), &[]);

    let report = h.orchestrator.run(&h.request()).await.unwrap();

    assert!(report.success());
    assert!(!report.target_was_configured);
    assert_eq!(report.hostname, HOST);
    assert!(h.confirmation.prompts().is_empty());
    assert!(h.tools.ran(RESTORE_SETTINGS));
    assert!(report
        .setup_hint()
        .unwrap()
        .contains("https://ghe.example.com/setup/settings"));

    // unconfigured targets get neither config apply nor stale node cleanup
    assert_eq!(h.journal.count("ghe-config-apply"), 0);
    assert_eq!(h.journal.count("ghe-spokes"), 0);
    assert_eq!(h.journal.count("ghe-service-ensure-mysql"), 1);

    let restoring = h.status_position("restoring").unwrap();
    let settings = h.journal.position("tool: ghe-restore-settings").unwrap();
    let mysql = h.journal.position("tool: ghe-restore-mysql").unwrap();
    let complete = h.status_position("complete").unwrap();
    let host_keys = h.journal.position("ghe-import-ssh-host-keys").unwrap();
    assert!(restoring < settings);
    assert!(settings < mysql);
    assert!(mysql < complete);
    assert!(complete < host_keys);

    assert_eq!(h.status_writes("restoring"), 1);
    assert_eq!(h.status_writes("complete"), 1);
    assert_eq!(h.status_writes("failed"), 0);
    assert_eq!(h.exec.release_count(), 1);
}

#[tokio::test]
async fn test_uploads_version_uuid_and_host_keys() {
    let h = Harness::new(TargetSpec::fresh("2.13.0"), SnapshotSpec::rsync("2.13.0"), &[]);
    h.orchestrator.run(&h.request()).await.unwrap();

    let calls = h.exec.calls();
    let stdin_of = |needle: &str| {
        calls
            .iter()
            .find(|c| c.command.contains(needle))
            .and_then(|c| c.stdin.clone())
            .unwrap()
    };
    assert_eq!(&stdin_of("common/backup-utils-version")[..], b"2.13.0\n");
    assert_eq!(&stdin_of("common/uuid")[..], b"1111\n");
    assert_eq!(&stdin_of("ghe-import-ssh-host-keys")[..], b"host-keys-archive");

    assert_eq!(h.journal.count("sudo systemctl stop consul"), 1);
    assert_eq!(h.journal.count("sudo rm -rf /data/user/consul/raft"), 1);
}

#[tokio::test]
async fn test_configured_standalone_restore() {
    let h = Harness::new(
        TargetSpec::configured("2.13.0"),
        SnapshotSpec::rsync("2.13.0"),
        &["yes"],
    );

    let report = h.orchestrator.run(&h.request()).await.unwrap();

    assert!(report.success());
    assert!(report.setup_hint().is_none());
    assert_eq!(report.repository_strategy, RepositoryStrategy::Unified);
    assert!(!h.tools.ran(RESTORE_SETTINGS));
    for tool in [
        RESTORE_MYSQL,
        RESTORE_REDIS,
        RESTORE_REPOSITORIES,
        RESTORE_GISTS,
        RESTORE_PAGES,
        RESTORE_STORAGE,
        RESTORE_ES_RSYNC,
        RESTORE_ES_AUDIT_LOG,
        RESTORE_ES_HOOKSHOT,
    ] {
        assert!(h.tools.ran(tool), "{} did not run", tool);
    }
    assert!(!h.tools.ran(RESTORE_REPOSITORIES_RSYNC));

    assert_eq!(
        h.journal
            .count("/usr/local/share/enterprise/ghe-cluster-cleanup-node 9999"),
        1
    );
    assert_eq!(h.journal.count("ghe-cluster-cleanup-node 1111"), 0);
    assert_eq!(
        h.journal
            .count("/usr/local/share/enterprise/ghe-config-apply"),
        1
    );
    assert_eq!(h.journal.count("ghe-cluster-config-apply"), 0);

    let config_apply = h.journal.position("ghe-config-apply").unwrap();
    let complete = h.status_position("complete").unwrap();
    assert!(config_apply < complete);
}

#[tokio::test]
async fn test_legacy_standalone_uses_rsync_tools() {
    let h = Harness::new(
        TargetSpec::configured("2.12.5"),
        SnapshotSpec::rsync("2.12.5"),
        &["yes"],
    );

    let report = h.orchestrator.run(&h.request()).await.unwrap();

    assert_eq!(report.repository_strategy, RepositoryStrategy::LegacyRsync);
    assert!(h.tools.ran(RESTORE_REPOSITORIES_RSYNC));
    assert!(h.tools.ran(RESTORE_PAGES_RSYNC));
    assert!(!h.tools.ran(RESTORE_REPOSITORIES));
    assert!(!h.tools.ran(RESTORE_GISTS));
    assert!(!h.tools.ran(RESTORE_ES_AUDIT_LOG));
    assert!(report
        .skipped_steps
        .contains(&Step::AuditLogs.name().to_string()));
}

#[tokio::test]
async fn test_cluster_restore_broadcasts() {
    let h = Harness::new(
        TargetSpec::cluster("2.13.0"),
        SnapshotSpec::cluster("2.13.0"),
        &["yes"],
    );

    let report = h.orchestrator.run(&h.request()).await.unwrap();
    assert!(report.success());
    assert!(report.cluster);

    assert_eq!(h.journal.count("remote: [all] sudo service cron stop"), 1);
    assert_eq!(h.journal.count("remote: [all] sudo service github-timerd start"), 1);
    assert_eq!(h.journal.count("remote: [all] sudo restart -q memcached"), 1);

    let status_scopes: Vec<Scope> = h
        .exec
        .calls()
        .into_iter()
        .filter(|c| c.command.contains("ghe-restore-status"))
        .map(|c| c.scope)
        .collect();
    assert_eq!(status_scopes, vec![Scope::AllNodes, Scope::AllNodes]);

    assert_eq!(h.journal.count("ghe-service-ensure"), 0);
    assert!(!h.tools.ran(RESTORE_ES_RSYNC));
    assert!(h.tools.ran(RESTORE_ES_AUDIT_LOG));
    assert_eq!(h.journal.count("ghe-cluster-config-apply"), 1);
    assert_eq!(h.journal.count("ghe-spokes"), 0);

    assert_eq!(h.journal.count("ghe-import-ssh-host-keys"), 0);
    let untar = h
        .journal
        .position("sudo tar -xpf - -C /data/user/common")
        .unwrap();
    let update = h.journal.position("ghe-cluster-config-update -s").unwrap();
    assert!(h.status_position("complete").unwrap() < untar);
    assert!(untar < update);
}

#[tokio::test]
async fn test_fatal_step_marks_failed_once() {
    let h = Harness::new(
        TargetSpec::configured("2.13.0"),
        SnapshotSpec::rsync("2.13.0"),
        &["yes"],
    );
    h.tools.fail(RESTORE_MYSQL);

    let err = h.orchestrator.run(&h.request()).await.unwrap_err();
    match err {
        Error::StepFailed { step, .. } => assert_eq!(step, RESTORE_MYSQL),
        other => panic!("unexpected error: {other}"),
    }

    assert!(!h.tools.ran(RESTORE_REDIS));
    assert_eq!(h.status_writes("restoring"), 1);
    assert_eq!(h.status_writes("failed"), 1);
    assert_eq!(h.status_writes("complete"), 0);
    assert_eq!(h.journal.count("sudo service cron start"), 0);
    assert_eq!(h.exec.release_count(), 1);
}

#[tokio::test]
async fn test_best_effort_failures_become_warnings() {
    let h = Harness::new(
        TargetSpec::configured("2.13.0"),
        SnapshotSpec::rsync("2.13.0"),
        &["yes"],
    );
    h.exec.fail("ghe_remote_logger");
    h.exec.fail("sudo service cron stop");

    let report = h.orchestrator.run(&h.request()).await.unwrap();

    assert!(report.success());
    assert_eq!(report.warnings.len(), 3);
    // the second scheduler service is still attempted
    assert_eq!(h.journal.count("sudo service github-timerd stop"), 1);
}

#[tokio::test]
async fn test_host_key_failure_keeps_complete() {
    let h = Harness::new(
        TargetSpec::configured("2.13.0"),
        SnapshotSpec::rsync("2.13.0"),
        &["yes"],
    );
    h.exec.fail("ghe-import-ssh-host-keys");

    let err = h.orchestrator.run(&h.request()).await.unwrap_err();
    assert!(matches!(err, Error::StepFailed { .. }));
    assert_eq!(h.status_writes("complete"), 1);
    assert_eq!(h.status_writes("failed"), 0);
    assert_eq!(h.exec.release_count(), 1);
}

#[tokio::test]
async fn test_restoring_publish_failure_stops_before_steps() {
    let h = Harness::new(
        TargetSpec::configured("2.13.0"),
        SnapshotSpec::rsync("2.13.0"),
        &["yes"],
    );
    h.exec.fail("ghe-restore-status");

    let err = h.orchestrator.run(&h.request()).await.unwrap_err();
    assert!(matches!(err, Error::StatusPublish { .. }));
    assert!(h.tools.runs().is_empty());
    assert_eq!(h.journal.count("ghe-restore-status"), 1);
    assert_eq!(h.exec.release_count(), 1);
}

#[tokio::test]
async fn test_shutdown_before_first_step() {
    let h = Harness::new(
        TargetSpec::configured("2.13.0"),
        SnapshotSpec::rsync("2.13.0"),
        &["yes"],
    );
    h.orchestrator.shutdown();

    let err = h.orchestrator.run(&h.request()).await.unwrap_err();
    assert!(matches!(err, Error::Interrupted));
    assert!(h.tools.runs().is_empty());
    assert_eq!(h.status_writes("restoring"), 1);
    assert_eq!(h.status_writes("failed"), 1);
}

/// Tool runner that requests shutdown once a given tool has run
struct InterruptingRunner {
    inner: RecordingToolRunner,
    trigger: &'static str,
    shutdown: Mutex<Option<broadcast::Sender<()>>>,
}

#[async_trait]
impl ToolRunner for InterruptingRunner {
    async fn run(&self, tool: &str, host: &TargetHost, env: &ToolEnv) -> ghe_restore_core::Result<()> {
        self.inner.run(tool, host, env).await?;
        if tool == self.trigger {
            if let Some(tx) = self.shutdown.lock().as_ref() {
                let _ = tx.send(());
            }
        }
        Ok(())
    }
}

#[tokio::test]
async fn test_shutdown_mid_run_stops_at_step_boundary() {
    let data_dir = tempfile::tempdir().unwrap();
    write_snapshot(data_dir.path(), SNAPSHOT_ID, &SnapshotSpec::rsync("2.13.0"));

    let journal = Journal::new();
    let exec = Arc::new(RecordingExecutor::with_journal(journal.clone()));
    script_target(&exec, &TargetSpec::configured("2.13.0"));
    let tools = Arc::new(InterruptingRunner {
        inner: RecordingToolRunner::with_journal(journal.clone()),
        trigger: RESTORE_MYSQL,
        shutdown: Mutex::new(None),
    });
    let config = Config {
        data_dir: data_dir.path().to_path_buf(),
        ..Default::default()
    };
    let orchestrator = RestoreOrchestrator::new(
        config,
        exec.clone(),
        tools.clone(),
        Arc::new(ScriptedConfirmation::new(["yes"])),
    )
    .unwrap();
    *tools.shutdown.lock() = Some(orchestrator.shutdown_handle());

    let request = ghe_restore_core::RestoreRequest {
        target_host: HOST.to_string(),
        snapshot_id: Some(SNAPSHOT_ID.to_string()),
        ..Default::default()
    };
    let err = orchestrator.run(&request).await.unwrap_err();

    assert!(matches!(err, Error::Interrupted));
    assert!(tools.inner.ran(RESTORE_MYSQL));
    assert!(!tools.inner.ran(RESTORE_REDIS));
    assert_eq!(journal.count("failed"), 1);
    assert_eq!(journal.count("ghe-restore-status"), 2);
}

enum Fault {
    Panic,
    Stall,
}

/// Tool runner that panics or hangs once a given tool has run
struct FaultyRunner {
    inner: RecordingToolRunner,
    trigger: &'static str,
    fault: Fault,
}

#[async_trait]
impl ToolRunner for FaultyRunner {
    async fn run(&self, tool: &str, host: &TargetHost, env: &ToolEnv) -> ghe_restore_core::Result<()> {
        self.inner.run(tool, host, env).await?;
        if tool == self.trigger {
            match self.fault {
                Fault::Panic => panic!("boom"),
                Fault::Stall => std::future::pending::<()>().await,
            }
        }
        Ok(())
    }
}

fn faulty_orchestrator(
    data_dir: &std::path::Path,
    fault: Fault,
) -> (Journal, Arc<RecordingExecutor>, Arc<FaultyRunner>, RestoreOrchestrator) {
    write_snapshot(data_dir, SNAPSHOT_ID, &SnapshotSpec::rsync("2.13.0"));

    let journal = Journal::new();
    let exec = Arc::new(RecordingExecutor::with_journal(journal.clone()));
    script_target(&exec, &TargetSpec::configured("2.13.0"));
    let tools = Arc::new(FaultyRunner {
        inner: RecordingToolRunner::with_journal(journal.clone()),
        trigger: RESTORE_MYSQL,
        fault,
    });
    let config = Config {
        data_dir: data_dir.to_path_buf(),
        ..Default::default()
    };
    let orchestrator = RestoreOrchestrator::new(
        config,
        exec.clone(),
        tools.clone(),
        Arc::new(ScriptedConfirmation::new(["yes"])),
    )
    .unwrap();
    (journal, exec, tools, orchestrator)
}

fn status_writes(journal: &Journal, state: &str) -> usize {
    journal
        .entries()
        .iter()
        .filter(|e| e.contains("ghe-restore-status") && e.contains(&format!(" {} ", state)))
        .count()
}

fn faulty_request() -> ghe_restore_core::RestoreRequest {
    ghe_restore_core::RestoreRequest {
        target_host: HOST.to_string(),
        snapshot_id: Some(SNAPSHOT_ID.to_string()),
        ..Default::default()
    }
}

#[tokio::test]
async fn test_panicking_step_publishes_failed() {
    let data_dir = tempfile::tempdir().unwrap();
    let (journal, exec, tools, orchestrator) = faulty_orchestrator(data_dir.path(), Fault::Panic);

    let err = orchestrator.run(&faulty_request()).await.unwrap_err();

    match err {
        Error::StepFailed { step, message } => {
            assert_eq!(step, "orchestrator");
            assert!(message.contains("boom"));
        }
        other => panic!("unexpected error: {other:?}"),
    }
    assert!(tools.inner.ran(RESTORE_MYSQL));
    assert!(!tools.inner.ran(RESTORE_REDIS));
    assert_eq!(status_writes(&journal, "failed"), 1);
    assert_eq!(status_writes(&journal, "complete"), 0);
    assert_eq!(exec.release_count(), 1);
}

#[tokio::test]
async fn test_dropped_run_publishes_failed() {
    let data_dir = tempfile::tempdir().unwrap();
    let (journal, exec, tools, orchestrator) = faulty_orchestrator(data_dir.path(), Fault::Stall);

    let request = faulty_request();
    let outcome =
        tokio::time::timeout(Duration::from_millis(200), orchestrator.run(&request)).await;
    assert!(outcome.is_err());
    assert!(tools.inner.ran(RESTORE_MYSQL));
    assert_eq!(status_writes(&journal, "restoring"), 1);

    // Cleanup is spawned from the guard's destructor
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(status_writes(&journal, "failed"), 1);
    assert_eq!(status_writes(&journal, "complete"), 0);
    assert_eq!(exec.release_count(), 1);
}

#[tokio::test]
async fn test_prepare_and_plan_do_not_mutate() {
    let h = Harness::new(TargetSpec::fresh("2.13.0"), SnapshotSpec::rsync("2.13.0"), &[]);

    let ctx = h.orchestrator.prepare(&h.request()).await.unwrap();
    assert!(ctx.restore_settings);

    let plan = h.orchestrator.plan(&ctx);
    let enabled = |step: Step| plan.iter().find(|p| p.step == step).unwrap().enabled;
    assert!(enabled(Step::RestoreSettings));
    assert!(enabled(Step::EnsureServices));
    assert!(!enabled(Step::ConfigApply));
    assert!(!enabled(Step::CleanupStaleNodes));
    assert_eq!(plan.last().unwrap().step, Step::RemoteLogFinish);

    assert!(!h.mutated());
    assert_eq!(ctx.topology.remote_version.to_string(), "2.13.0");
    assert_eq!(h.exec.release_count(), 0);
}
