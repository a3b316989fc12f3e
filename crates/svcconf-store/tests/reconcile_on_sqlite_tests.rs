// End-to-end reconciliation against the SQLite backend

use std::collections::BTreeSet;

use svcconf_core::client::{CommitOutcome, Connector, RepositoryClient};
use svcconf_core::model::{Decoration, Fmri, Layer, PgFlags, Value, ValueType};
use svcconf_core::{
    Bundle, CleanupScanner, EnabledOnRevert, ImportOptions, Importer, InstanceDecl, PgDecl,
    PropertyDecl, ReconcileReport, RetryPolicy, ServiceDecl, SnapshotManager,
};
use svcconf_store::{SqliteConnector, SqliteRepository};
use tempfile::TempDir;

fn fmri(s: &str) -> Fmri {
    Fmri::parse(s).unwrap()
}

fn bundle(source: &str, port: u64) -> Bundle {
    Bundle::new("app", source).with_service(
        ServiceDecl::new("app")
            .with_pg(PgDecl::new("config", "application").with_property(PropertyDecl::new(
                "port",
                ValueType::Count,
                [port.to_string()],
            )))
            .with_instance(InstanceDecl::new("default").with_pg(
                PgDecl::new("general", "framework").with_property(PropertyDecl::new(
                    "enabled",
                    ValueType::Boolean,
                    ["true"],
                )),
            )),
    )
}

fn import(repo: &dyn RepositoryClient, bundle: &Bundle) -> ReconcileReport {
    let mut report = ReconcileReport::new();
    Importer::new(repo, ImportOptions::default())
        .import(bundle, &mut report)
        .unwrap();
    report
}

fn value(repo: &dyn RepositoryClient, entity: &str, pg: &str, prop: &str) -> Option<Value> {
    let entity = repo.get_entity(&fmri(entity)).unwrap()?;
    let pg = repo.get_property_group(&entity, pg).unwrap()?;
    repo.read_property_group(&pg)
        .unwrap()
        .first_value(prop)
        .cloned()
}

fn admin_write(repo: &dyn RepositoryClient, entity: &str, pg: &str, prop: &str, v: Value) {
    let entity = repo.get_entity(&fmri(entity)).unwrap().unwrap();
    let pg = match repo.get_property_group(&entity, pg).unwrap() {
        Some(pg) => pg,
        None => repo
            .add_property_group(&entity, pg, "application", PgFlags::PERSISTENT)
            .unwrap(),
    };
    let mut tx = repo.begin_transaction(&pg, &Decoration::admin()).unwrap();
    tx.set_values(prop, v.value_type(), vec![v]);
    assert!(matches!(repo.commit(tx).unwrap(), CommitOutcome::Committed(_)));
}

#[test]
fn test_import_creates_and_reimport_is_stable() {
    // Given: An empty on-disk repository
    let dir = TempDir::new().unwrap();
    let connector = SqliteConnector::new(dir.path().join("repo.db"));
    let repo = connector.connect().unwrap();

    // When: A bundle is imported twice, the second time from a new connection
    let first = import(&repo, &bundle("app.json", 22));
    assert!(first.status().is_success());
    let config_version = {
        let service = repo.get_entity(&fmri("svc:/app")).unwrap().unwrap();
        let pg = repo
            .get_property_group(&service, "config")
            .unwrap()
            .unwrap();
        repo.read_property_group(&pg).unwrap().version
    };
    drop(repo);
    let repo = connector.connect().unwrap();
    let second = import(&repo, &bundle("app.json", 22));

    // Then: The declared state is present and unchanged by the re-import
    assert!(second.status().is_success());
    assert_eq!(
        value(&repo, "svc:/app", "config", "port"),
        Some(Value::Count(22))
    );
    assert_eq!(
        value(&repo, "svc:/app:default", "general", "enabled"),
        Some(Value::Boolean(true))
    );
    let service = repo.get_entity(&fmri("svc:/app")).unwrap().unwrap();
    let pg = repo
        .get_property_group(&service, "config")
        .unwrap()
        .unwrap();
    assert_eq!(
        repo.read_property_group(&pg).unwrap().version,
        config_version
    );

    // And: The instance carries "initial" plus the "running" taken on re-import
    let instance = repo.get_entity(&fmri("svc:/app:default")).unwrap().unwrap();
    let names: Vec<String> = repo
        .list_snapshots(&instance)
        .unwrap()
        .into_iter()
        .map(|s| s.name)
        .collect();
    assert!(names.contains(&"initial".to_string()));
    assert!(names.contains(&"running".to_string()));
    assert_eq!(repo.refresh_log().unwrap(), vec![fmri("svc:/app:default")]);
}

#[test]
fn test_admin_override_survives_new_manifest_value() {
    // Given: An imported bundle and an administrator override
    let repo = SqliteRepository::open_in_memory().unwrap();
    import(&repo, &bundle("app.json", 22));
    admin_write(&repo, "svc:/app", "config", "port", Value::Count(2222));

    // When: The bundle changes its declared port
    import(&repo, &bundle("app.json", 80));

    // Then: The admin value is still effective while the manifest layer moved on
    let service = repo.get_entity(&fmri("svc:/app")).unwrap().unwrap();
    let pg = repo
        .get_property_group(&service, "config")
        .unwrap()
        .unwrap();
    let contents = repo.read_property_group(&pg).unwrap();
    assert_eq!(contents.first_value("port"), Some(&Value::Count(2222)));
    let manifest = contents
        .property("port")
        .unwrap()
        .contribution(Layer::Manifest)
        .unwrap();
    assert_eq!(manifest.values, vec![Value::Count(80)]);
}

#[test]
fn test_restore_initial_snapshot() {
    // Given: An imported instance later edited by an administrator
    let repo = SqliteRepository::open_in_memory().unwrap();
    import(&repo, &bundle("app.json", 22));
    admin_write(
        &repo,
        "svc:/app:default",
        "tuning",
        "depth",
        Value::Count(9),
    );

    // When: The instance is reverted to "initial"
    let instance = repo.get_entity(&fmri("svc:/app:default")).unwrap().unwrap();
    let outcome = SnapshotManager::new(&repo, RetryPolicy::unbounded())
        .restore(&instance, "initial", EnabledOnRevert::default())
        .unwrap();

    // Then: The added group is gone and "previous" holds the edited state
    let instance = repo.get_entity(&fmri("svc:/app:default")).unwrap().unwrap();
    assert!(repo
        .get_property_group(&instance, "tuning")
        .unwrap()
        .is_none());
    let previous = outcome.previous.unwrap();
    let levels = repo.list_snaplevels(&previous).unwrap();
    assert!(levels[1].property_group("tuning").is_some());
}

#[test]
fn test_cleanup_removes_retired_bundle() {
    // Given: Two bundles, one of which is no longer delivered
    let repo = SqliteRepository::open_in_memory().unwrap();
    import(&repo, &bundle("app.json", 22));
    let db = Bundle::new("db", "db.json").with_service(ServiceDecl::new("db").with_pg(
        PgDecl::new("config", "application").with_property(PropertyDecl::new(
            "size",
            ValueType::Count,
            ["4"],
        )),
    ));
    import(&repo, &db);

    // When: Cleanup runs with only app.json live
    let live: BTreeSet<String> = ["app.json".to_string()].into_iter().collect();
    let removed = CleanupScanner::new(&repo, RetryPolicy::unbounded())
        .cleanup_bundles(&live, Layer::Manifest)
        .unwrap();

    // Then: Only the retired bundle's service disappears
    assert_eq!(removed.len(), 1);
    assert_eq!(removed[0].0, "db.json");
    assert!(repo.get_entity(&fmri("svc:/db")).unwrap().is_none());
    assert!(repo.get_entity(&fmri("svc:/app")).unwrap().is_some());
}

#[test]
fn test_import_converges_with_second_connection_writing() {
    // Given: A repository file shared by an importer and an administrator
    let dir = TempDir::new().unwrap();
    let connector = SqliteConnector::new(dir.path().join("repo.db"));
    let importer_conn = connector.connect().unwrap();
    let admin_conn = connector.connect().unwrap();
    import(&importer_conn, &bundle("app.json", 22));

    // When: The administrator edits between two imports
    admin_write(&admin_conn, "svc:/app", "config", "extra", Value::Count(1));
    let report = import(&importer_conn, &bundle("app.json", 23));

    // Then: Both edits are visible to every connection
    assert!(report.status().is_success());
    assert_eq!(
        value(&admin_conn, "svc:/app", "config", "port"),
        Some(Value::Count(23))
    );
    assert_eq!(
        value(&importer_conn, "svc:/app", "config", "extra"),
        Some(Value::Count(1))
    );
}
