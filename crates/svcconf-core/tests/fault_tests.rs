//! Error classification during reconciliation
#![allow(clippy::unwrap_used, clippy::expect_used)]

mod common;

use common::*;
use svcconf_core::client::RepositoryClient;
use svcconf_core::errors::{ExErrorKind, RepoError};
use svcconf_core::reconcile::ReportStatus;
use svcconf_core::repo::FaultOp;
use svcconf_core::{Bundle, InstanceDecl, MemoryRepository, Progress, ServiceDecl};

fn two_services() -> Bundle {
    Bundle::new("pair", "pair.json")
        .with_service(
            ServiceDecl::new("first")
                .with_pg(counts("config", &[("port", 1)]))
                .with_instance(InstanceDecl::new("default").with_pg(general(true))),
        )
        .with_service(
            ServiceDecl::new("second")
                .with_pg(counts("config", &[("port", 2)]))
                .with_instance(InstanceDecl::new("default").with_pg(general(true))),
        )
}

#[test]
fn test_lost_connection_aborts_with_progress_table() {
    // GIVEN a repository that drops the connection while writing the first instance
    let repo = MemoryRepository::new();
    repo.inject_fault(
        FaultOp::Commit,
        Some(fmri("svc:/first:default")),
        RepoError::Unreachable {
            reason: "daemon restarted".to_string(),
        },
        true,
    )
    .unwrap();

    // WHEN importing
    let report = import(&repo, &two_services());

    // THEN the import aborts
    assert!(report.is_aborted());
    assert_eq!(
        report.status(),
        ReportStatus::Aborted(ExErrorKind::Unreachable)
    );
    assert_eq!(report.status().code(), "ERR_UNREACHABLE");

    // AND the table shows how far each entity got
    assert_eq!(
        report.entry(&fmri("svc:/first")).unwrap().progress,
        Progress::Imported
    );
    assert_eq!(
        report.entry(&fmri("svc:/first:default")).unwrap().progress,
        Progress::NotReached
    );
    assert_eq!(
        report.entry(&fmri("svc:/second")).unwrap().progress,
        Progress::NotReached
    );
    assert!(repo.get_entity(&fmri("svc:/second")).unwrap().is_none());
}

#[test]
fn test_permission_denied_skips_entity_only() {
    // GIVEN the first service cannot be written
    let repo = MemoryRepository::new();
    repo.inject_fault(
        FaultOp::Commit,
        Some(fmri("svc:/first")),
        RepoError::PermissionDenied {
            what: "config".to_string(),
        },
        true,
    )
    .unwrap();

    // WHEN importing
    let report = import(&repo, &two_services());

    // THEN the sibling service is fully imported
    assert!(!report.is_aborted());
    assert_eq!(
        report.status(),
        ReportStatus::Partial(ExErrorKind::PermissionDenied)
    );
    let first = report.entry(&fmri("svc:/first")).unwrap();
    assert_eq!(first.failures[0].kind(), ExErrorKind::PermissionDenied);
    assert_eq!(first.failures[0].entity(), Some("svc:/first"));
    assert!(first.progress < Progress::Imported);
    assert_eq!(
        report.entry(&fmri("svc:/second:default")).unwrap().progress,
        Progress::Imported
    );
}

#[test]
fn test_concurrent_delete_marks_busy() {
    let repo = MemoryRepository::new();
    repo.inject_fault(
        FaultOp::AddPropertyGroup,
        Some(fmri("svc:/second:default")),
        RepoError::deleted("svc:/second:default"),
        false,
    )
    .unwrap();

    let report = import(&repo, &two_services());

    assert!(!report.is_aborted());
    let entry = report.entry(&fmri("svc:/second:default")).unwrap();
    assert!(entry.busy);
    assert_eq!(report.status(), ReportStatus::Partial(ExErrorKind::Deleted));
    assert_eq!(
        report.entry(&fmri("svc:/first:default")).unwrap().progress,
        Progress::Imported
    );
}

#[test]
fn test_refresh_failure_is_not_an_error() {
    let repo = MemoryRepository::new();
    let bundle = two_services();
    import(&repo, &bundle);
    repo.inject_fault(
        FaultOp::Refresh,
        None,
        RepoError::PermissionDenied {
            what: "refresh".to_string(),
        },
        true,
    )
    .unwrap();

    let report = import(&repo, &bundle);

    assert_eq!(report.status(), ReportStatus::Success);
    assert!(repo.refresh_log().unwrap().is_empty());
}

#[test]
fn test_unreachable_from_the_start() {
    let repo = MemoryRepository::new();
    repo.set_unreachable(true).unwrap();

    let report = import(&repo, &two_services());

    assert_eq!(
        report.status(),
        ReportStatus::Aborted(ExErrorKind::Unreachable)
    );
    assert!(report
        .entries
        .iter()
        .all(|e| e.progress == Progress::NotReached));
    repo.set_unreachable(false).unwrap();
    assert!(repo.list_services().unwrap().is_empty());
}
