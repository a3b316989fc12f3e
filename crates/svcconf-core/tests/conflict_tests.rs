//! Concurrent writers racing the engine
#![allow(clippy::unwrap_used, clippy::expect_used)]

mod common;

use common::*;
use svcconf_core::client::RepositoryClient;
use svcconf_core::errors::ExErrorKind;
use svcconf_core::model::{Decoration, Value, ValueType};
use svcconf_core::reconcile::ReportStatus;
use svcconf_core::{
    Bundle, ImportOptions, InstanceDecl, MemoryRepository, RetryPolicy, ServiceDecl,
};

fn bundle() -> Bundle {
    Bundle::new("app", "app.json").with_service(
        ServiceDecl::new("app")
            .with_pg(counts("config", &[("port", 22)]))
            .with_instance(InstanceDecl::new("default").with_pg(general(true))),
    )
}

/// Admin writer bumping `config/admin_note` on the service
fn admin_edit(repo: &MemoryRepository) {
    let service = repo.get_entity(&fmri("svc:/app")).unwrap().unwrap();
    let pg = repo
        .get_property_group(&service, "config")
        .unwrap()
        .unwrap();
    let mut tx = repo.begin_transaction(&pg, &Decoration::admin()).unwrap();
    tx.set_values("admin_note", ValueType::Count, vec![Value::Count(7)]);
    repo.commit(tx).unwrap();
}

#[test]
fn test_conflicting_writer_converges() {
    // GIVEN a second writer that edits config right before the engine commits
    let repo = MemoryRepository::new();
    let client = InterferingClient::new(repo.clone(), "config", admin_edit);

    // WHEN importing through it
    let report = import(&client, &bundle());

    // THEN the engine retried once and both writes are present
    assert_eq!(report.status(), ReportStatus::Success);
    assert_eq!(*client.conflicts_seen.borrow(), 1);
    let config = read_pg(&repo, "svc:/app", "config").unwrap();
    assert_eq!(config.effective_values("port"), &[Value::Count(22)]);
    assert_eq!(config.effective_values("admin_note"), &[Value::Count(7)]);
}

#[test]
fn test_concurrent_imports_of_disjoint_properties_converge() {
    // GIVEN a second bundle writing another property of the same group,
    // imported right before the first import commits that group
    let repo = MemoryRepository::new();
    let client = InterferingClient::new(repo.clone(), "config", |inner| {
        let other = Bundle::new("app", "b.json")
            .with_service(ServiceDecl::new("app").with_pg(counts("config", &[("workers", 4)])));
        let report = import(inner, &other);
        assert_eq!(report.status(), ReportStatus::Success);
    });

    // WHEN the first import runs through it
    let report = import(&client, &bundle());

    // THEN it retried once and the group holds both imports' properties
    assert_eq!(report.status(), ReportStatus::Success);
    assert_eq!(*client.conflicts_seen.borrow(), 1);
    let config = read_pg(&repo, "svc:/app", "config").unwrap();
    assert_eq!(config.effective_values("port"), &[Value::Count(22)]);
    assert_eq!(config.effective_values("workers"), &[Value::Count(4)]);
    assert!(config.is_decorated_by(&Decoration::manifest("app.json")));
    assert!(config.is_decorated_by(&Decoration::manifest("b.json")));
}

#[test]
fn test_conflict_on_reimport_does_not_lose_admin_edit() {
    // GIVEN an imported bundle whose next version changes the port
    let repo = MemoryRepository::new();
    import(&repo, &bundle());
    let v2 = Bundle::new("app", "app.json").with_service(
        ServiceDecl::new("app")
            .with_pg(counts("config", &[("port", 2222)]))
            .with_instance(InstanceDecl::new("default").with_pg(general(true))),
    );
    let client = InterferingClient::new(repo.clone(), "config", admin_edit);

    // WHEN an admin edit lands mid-import
    import(&client, &v2);

    // THEN the rebuilt transaction keeps it
    let config = read_pg(&repo, "svc:/app", "config").unwrap();
    assert_eq!(config.effective_values("port"), &[Value::Count(2222)]);
    assert_eq!(config.effective_values("admin_note"), &[Value::Count(7)]);
}

#[test]
fn test_bounded_retry_reports_busy() {
    // GIVEN a retry budget of one attempt and a guaranteed conflict
    let repo = MemoryRepository::new();
    let client = InterferingClient::new(repo.clone(), "config", admin_edit);
    let options = ImportOptions {
        retry: RetryPolicy::bounded(1),
        ..ImportOptions::default()
    };

    // WHEN importing
    let report = import_with(&client, &bundle(), options);

    // THEN the service is reported busy and the import did not abort
    assert!(!report.is_aborted());
    let entry = report.entry(&fmri("svc:/app")).unwrap();
    assert!(entry.busy);
    assert_eq!(entry.failures[0].kind(), ExErrorKind::Conflict);
    assert_eq!(
        report.status(),
        ReportStatus::Partial(ExErrorKind::Conflict)
    );

    // AND its instances were skipped
    assert!(repo
        .get_entity(&fmri("svc:/app:default"))
        .unwrap()
        .is_none());
}
