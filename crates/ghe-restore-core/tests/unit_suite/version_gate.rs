//! Version gate decisions across appliance releases.

use ghe_restore_core::version::{parse_release, parse_version};
use ghe_restore_core::{RepositoryStrategy, VersionGate};

fn gate(snapshot: &str, remote: &str, cluster: bool) -> VersionGate {
    VersionGate::evaluate(
        &parse_version(snapshot).unwrap(),
        &parse_version(remote).unwrap(),
        cluster,
    )
}

#[test]
fn test_gate_table() {
    // (snapshot, remote, cluster, unified, audit logs, migration required)
    let cases = [
        ("2.12.5", "2.12.5", false, false, false, false),
        ("2.12.9", "2.12.9", false, false, true, false),
        ("2.13.0", "2.13.0", false, true, true, false),
        ("2.11.3", "2.14.2", false, true, true, false),
        ("2.10.4", "2.11.0", false, false, false, true),
        ("2.9.0", "2.10.8", false, false, false, false),
        ("2.9.0", "2.12.0", true, true, true, true),
    ];

    for (snapshot, remote, cluster, unified, audit, migration) in cases {
        let g = gate(snapshot, remote, cluster);
        let expected = if unified {
            RepositoryStrategy::Unified
        } else {
            RepositoryStrategy::LegacyRsync
        };
        assert_eq!(
            g.repository_strategy, expected,
            "strategy for {} -> {} (cluster: {})",
            snapshot, remote, cluster
        );
        assert_eq!(g.audit_logs_enabled, audit, "audit logs for {} -> {}", snapshot, remote);
        assert_eq!(
            g.requires_audit_migration, migration,
            "migration for {} -> {}",
            snapshot, remote
        );
    }
}

#[test]
fn test_prerelease_remote_counts_as_release() {
    let g = gate("2.13.0", "2.13.0-rc1", false);
    assert_eq!(g.repository_strategy, RepositoryStrategy::Unified);
    assert!(g.audit_logs_enabled);
}

#[test]
fn test_gate_from_release_file() {
    let remote = parse_release("RELEASE_PLATFORM=standard\nRELEASE_VERSION=\"2.12.9\"\n").unwrap();
    let g = VersionGate::evaluate(&parse_version("2.12.9").unwrap(), &remote, false);
    assert_eq!(g.repository_strategy, RepositoryStrategy::LegacyRsync);
    assert!(g.audit_logs_enabled);
}
