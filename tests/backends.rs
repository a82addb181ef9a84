//! Server-backed archive tests.
//!
//! Run only when `TOMB_TEST_POSTGRES_URL` / `TOMB_TEST_MARIADB_URL` point at a
//! scratch database; otherwise each test returns early.

use std::fs;

use tempfile::TempDir;

use tomb::ArchiveError;
use tomb::service::{ArchivePathRequest, ArchiveService};
use tomb::storage::dal::Dal;
use tomb::storage::evidence::EvidenceLog;
use tomb::storage::model::{ArchiveReason, DeleteApproval, EventAction, ListFilter};
use tomb::storage::schema::Backend;

fn connect(var: &str, backend: Backend, dir: &TempDir) -> Option<ArchiveService> {
    let url = std::env::var(var).ok().filter(|u| !u.trim().is_empty())?;
    let dal = Dal::connect(backend, &url).unwrap();
    let svc = ArchiveService::new(dal, EvidenceLog::in_dir(&dir.path().join("evidence")));
    svc.ensure_schema().unwrap();
    Some(svc)
}

/// Same flow for every server: archive, dedup, restore, purge.
fn exercise(svc: &ArchiveService, dir: &TempDir) {
    // unique bytes per run so earlier runs against the same database don't share the artifact
    let body = format!("payload {}", uuid::Uuid::new_v4());
    let first = dir.path().join("first.txt");
    let second = dir.path().join("second.txt");
    fs::write(&first, &body).unwrap();
    fs::write(&second, &body).unwrap();

    let a = svc
        .archive_path(ArchivePathRequest::new("it-repo", &first, ArchiveReason::Dead, "alice", "c1"))
        .unwrap();
    let b = svc
        .archive_path(ArchivePathRequest::new("it-repo", &second, ArchiveReason::Dead, "alice", "c1"))
        .unwrap();
    assert_ne!(a.tombstone_id, b.tombstone_id);
    let a_detail = svc.show_item(&a.tombstone_id).unwrap();
    let b_detail = svc.show_item(&b.tombstone_id).unwrap();
    assert_eq!(a_detail.item.artifact_id, b_detail.item.artifact_id);

    let out = dir.path().join("restored.txt");
    svc.restore_to_path(&a.tombstone_id, &out, "bob").unwrap();
    assert_eq!(fs::read_to_string(&out).unwrap(), body);

    let listed = svc
        .list_items(&ListFilter {
            repo: Some("it-repo".into()),
            limit: 500,
            ..ListFilter::default()
        })
        .unwrap();
    assert!(listed.iter().any(|i| i.tombstone_id == a.tombstone_id));

    // shared artifact: approval is recorded but bytes survive
    let scrubbed = svc
        .approve_delete(&DeleteApproval {
            tombstone_id: a.tombstone_id.clone(),
            primary_actor: "alice".into(),
            secondary_actor: "carol".into(),
            reason: "it".into(),
            apply: true,
        })
        .unwrap();
    assert!(!scrubbed);
    svc.restore_to_path(&b.tombstone_id, &out, "bob").unwrap();

    let events = svc.show_item(&a.tombstone_id).unwrap().events;
    assert_eq!(
        events.iter().filter(|e| e.action == EventAction::DeleteApproved).count(),
        2
    );

    // the last sharer's applied purge scrubs the bytes
    let scrubbed = svc
        .approve_delete(&DeleteApproval {
            tombstone_id: b.tombstone_id.clone(),
            primary_actor: "alice".into(),
            secondary_actor: "carol".into(),
            reason: "it".into(),
            apply: true,
        })
        .unwrap();
    assert!(scrubbed);
    let err = svc.restore_to_path(&b.tombstone_id, &out, "bob");
    assert!(matches!(err, Err(ArchiveError::ArtifactPurged(_))));

    let err = svc.restore_to_path("00000000-0000-0000-0000-000000000000", &out, "bob");
    assert!(matches!(err, Err(ArchiveError::UnknownTombstone(_))));
}

#[test]
fn postgres_archive_flow() {
    let dir = TempDir::new().unwrap();
    let Some(svc) = connect("TOMB_TEST_POSTGRES_URL", Backend::Postgres, &dir) else {
        return;
    };
    exercise(&svc, &dir);
}

#[test]
fn mariadb_archive_flow() {
    let dir = TempDir::new().unwrap();
    let Some(svc) = connect("TOMB_TEST_MARIADB_URL", Backend::MariaDb, &dir) else {
        return;
    };
    exercise(&svc, &dir);
}
