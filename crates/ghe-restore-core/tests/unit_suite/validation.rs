//! Precondition tests: every rejected run must leave the target untouched.

use super::helpers::*;
use ghe_restore_core::{Error, RestoreState};

#[tokio::test]
async fn test_cluster_snapshot_rejected_on_standalone() {
    let h = Harness::new(
        TargetSpec::configured("2.13.0"),
        SnapshotSpec::cluster("2.13.0"),
        &["yes"],
    );

    let err = h.orchestrator.run(&h.request()).await.unwrap_err();
    assert!(matches!(err, Error::IncompatibleStrategy { .. }));
    assert!(err.is_precondition());
    assert!(!h.mutated());
    assert!(h.confirmation.prompts().is_empty());
    assert_eq!(h.exec.release_count(), 1);
}

#[tokio::test]
async fn test_replication_target_rejected() {
    let mut target = TargetSpec::configured("2.13.0");
    target.replication = true;
    let h = Harness::new(target, SnapshotSpec::rsync("2.13.0"), &["yes"]);

    let err = h.orchestrator.run(&h.request()).await.unwrap_err();
    assert!(matches!(err, Error::ReplicationEnabled { .. }));
    assert!(err.hint().unwrap().contains("teardown replication"));
    assert!(!h.mutated());
}

#[tokio::test]
async fn test_audit_migration_checked_before_prompt() {
    let mut snapshot = SnapshotSpec::rsync("2.10.4");
    snapshot.audit_sentinel = false;
    let h = Harness::new(TargetSpec::configured("2.11.0"), snapshot, &["yes"]);

    let err = h.orchestrator.run(&h.request()).await.unwrap_err();
    match err {
        Error::AuditMigrationRequired {
            snapshot_version,
            remote_version,
            ..
        } => {
            assert_eq!(snapshot_version, "2.10.4");
            assert_eq!(remote_version, "2.11.0");
        }
        other => panic!("unexpected error: {other}"),
    }
    assert!(h.confirmation.prompts().is_empty());
    assert!(!h.mutated());
}

#[tokio::test]
async fn test_force_skips_audit_migration_and_prompt() {
    let mut snapshot = SnapshotSpec::rsync("2.10.4");
    snapshot.audit_sentinel = false;
    let h = Harness::new(TargetSpec::configured("2.11.0"), snapshot, &[]);

    let mut request = h.request();
    request.force = true;
    let report = h.orchestrator.run(&request).await.unwrap();

    assert!(report.success());
    assert!(h.confirmation.prompts().is_empty());
    assert_eq!(h.status_writes("complete"), 1);
}

#[tokio::test]
async fn test_declined_prompt_aborts_without_mutation() {
    for answer in ["no", "", "\n", "y", "ye", "yes please", "nope", "YES!"] {
        let h = Harness::new(
            TargetSpec::configured("2.13.0"),
            SnapshotSpec::rsync("2.13.0"),
            &[answer],
        );

        let err = h.orchestrator.run(&h.request()).await.unwrap_err();
        assert!(matches!(err, Error::UserAborted), "answer {:?}: {:?}", answer, err);

        let prompts = h.confirmation.prompts();
        assert_eq!(prompts.len(), 1);
        assert!(prompts[0].contains(HOST));
        assert!(prompts[0].contains(SNAPSHOT_ID));
        assert!(!h.mutated(), "answer {:?} mutated the target", answer);
        assert_eq!(h.journal.count("ghe-maintenance"), 0);
    }
}

#[tokio::test]
async fn test_uppercase_yes_is_accepted() {
    let h = Harness::new(
        TargetSpec::configured("2.13.0"),
        SnapshotSpec::rsync("2.13.0"),
        &["YES"],
    );

    let report = h.orchestrator.run(&h.request()).await.unwrap();
    assert_eq!(report.state, Some(RestoreState::Complete));
}

#[tokio::test]
async fn test_configured_target_requires_maintenance_mode() {
    let mut target = TargetSpec::configured("2.13.0");
    target.maintenance = false;
    let h = Harness::new(target, SnapshotSpec::rsync("2.13.0"), &["yes"]);

    let err = h.orchestrator.run(&h.request()).await.unwrap_err();
    assert!(matches!(err, Error::MaintenanceModeRequired { .. }));
    assert!(!h.mutated());
}

#[tokio::test]
async fn test_force_still_requires_maintenance_mode() {
    let mut target = TargetSpec::configured("2.13.0");
    target.maintenance = false;
    let h = Harness::new(target, SnapshotSpec::rsync("2.13.0"), &[]);

    let mut request = h.request();
    request.force = true;
    let err = h.orchestrator.run(&request).await.unwrap_err();
    assert!(matches!(err, Error::MaintenanceModeRequired { .. }));
}

#[tokio::test]
async fn test_unreachable_target() {
    let h = Harness::new(
        TargetSpec::configured("2.13.0"),
        SnapshotSpec::rsync("2.13.0"),
        &["yes"],
    );
    h.exec.unreachable("enterprise-release");

    let err = h.orchestrator.run(&h.request()).await.unwrap_err();
    assert!(matches!(err, Error::UnreachableTarget { .. }));
    assert!(err.hint().is_some());
    assert!(!h.mutated());
    assert_eq!(h.exec.release_count(), 1);
}

#[tokio::test]
async fn test_missing_snapshot() {
    let h = Harness::new(
        TargetSpec::configured("2.13.0"),
        SnapshotSpec::rsync("2.13.0"),
        &["yes"],
    );

    let mut request = h.request();
    request.snapshot_id = Some("19700101T000000".to_string());
    let err = h.orchestrator.run(&request).await.unwrap_err();
    assert!(matches!(err, Error::Snapshot(_)));
    assert!(h.exec.calls().is_empty());
}

#[tokio::test]
async fn test_option_like_host_is_rejected() {
    let h = Harness::new(
        TargetSpec::configured("2.13.0"),
        SnapshotSpec::rsync("2.13.0"),
        &["yes"],
    );

    let mut request = h.request();
    request.target_host = "-oProxyCommand=evil".to_string();
    assert!(h.orchestrator.run(&request).await.is_err());
    assert!(h.exec.calls().is_empty());
}
