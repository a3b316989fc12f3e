#![allow(clippy::unwrap_used, clippy::expect_used)]

mod common;

use std::collections::BTreeSet;

use common::{bundle, fmri, memory_engine, sqlite_config};
use svcconf_core::client::RepositoryClient;
use svcconf_core::errors::ExErrorKind;
use svcconf_core::model::{Layer, Value, ValueType};
use svcconf_core::reconcile::ReportStatus;
use svcconf_core::validator::{PgSchema, PropertySchema};
use svcconf_core::{
    Bundle, InstanceDecl, PgDecl, PropertyDecl, RefreshPolicy, ServiceDecl, StaticSchema,
};
use svcconf_engine::{
    apply_engine_command, Engine, EngineCommand, EngineCommandResult, EngineConfig,
};
use tempfile::TempDir;

fn port(repo: &dyn RepositoryClient, entity: &str) -> Option<Value> {
    let entity = repo.get_entity(&fmri(entity)).unwrap()?;
    let pg = repo.get_property_group(&entity, "config").unwrap()?;
    repo.read_property_group(&pg)
        .unwrap()
        .first_value("port")
        .cloned()
}

#[test]
fn test_import_bundle_reports_success_with_request_id() {
    // GIVEN an engine over an empty repository
    let (repo, mut engine) = memory_engine(EngineConfig::default());

    // WHEN a bundle is imported
    let report = engine.import_bundle(&bundle("app", "app.json", 22));

    // THEN the report is clean and carries its request id
    assert_eq!(report.status(), ReportStatus::Success);
    assert!(report.request_id.is_some());
    assert_eq!(port(&repo, "svc:/app"), Some(Value::Count(22)));
    assert!(engine.session().is_connected());
}

#[test]
fn test_unreachable_repository_is_fatal_and_reconnects_later() {
    // GIVEN a repository that cannot be reached
    let (repo, mut engine) = memory_engine(EngineConfig::default());
    repo.set_unreachable(true).unwrap();

    // WHEN importing
    let report = engine.import_bundle(&bundle("app", "app.json", 22));

    // THEN the import aborts with the connect failure
    let fatal = report.fatal.as_ref().expect("fatal error");
    assert_eq!(fatal.kind(), ExErrorKind::Unreachable);
    assert_eq!(fatal.op(), Some("connect"));
    assert_eq!(fatal.request_id(), report.request_id.as_ref());
    assert!(!engine.session().is_connected());

    // AND once the repository is back the next call connects afresh
    repo.set_unreachable(false).unwrap();
    assert!(engine
        .import_bundle(&bundle("app", "app.json", 22))
        .status()
        .is_success());
}

#[test]
fn test_connection_lost_mid_session_drops_client() {
    // GIVEN a connected engine
    let (repo, mut engine) = memory_engine(EngineConfig::default());
    assert!(engine
        .import_bundle(&bundle("app", "app.json", 22))
        .status()
        .is_success());

    // WHEN the repository goes away during the next import
    repo.set_unreachable(true).unwrap();
    let report = engine.import_bundle(&bundle("app", "app.json", 23));

    // THEN the call aborts and the stale client is discarded
    assert!(matches!(
        report.status(),
        ReportStatus::Aborted(ExErrorKind::Unreachable)
    ));
    assert!(!engine.session().is_connected());
}

#[test]
fn test_refresh_policy_from_config() {
    // GIVEN an engine configured never to refresh
    let mut config = EngineConfig::default();
    config.import.refresh = RefreshPolicy::Never;
    let (repo, mut engine) = memory_engine(config);

    // WHEN a bundle is imported twice
    engine.import_bundle(&bundle("app", "app.json", 22));
    engine.import_bundle(&bundle("app", "app.json", 22));

    // THEN no instance was refreshed
    assert!(repo.refresh_log().unwrap().is_empty());
}

#[test]
fn test_apply_profile_uses_validator_for_types() {
    // GIVEN an imported service, a schema for a group it lacks and an untyped profile
    let schema = StaticSchema::new().with_pg(
        "limits",
        PgSchema {
            pg_type: Some("application".to_string()),
            properties: vec![PropertySchema {
                name: "max_conn".to_string(),
                value_type: ValueType::Integer,
                required: false,
            }],
        },
    );
    let (repo, engine) = memory_engine(EngineConfig::default());
    let mut engine = engine.with_validator(schema);
    engine.import_bundle(&bundle("app", "app.json", 22));
    let profile = Bundle::new("site", "site.json").with_service(
        ServiceDecl::new("app")
            .with_pg(
                PgDecl::untyped("config").with_property(PropertyDecl::untyped("port", ["8080"])),
            )
            .with_pg(
                PgDecl::untyped("limits").with_property(PropertyDecl::untyped("max_conn", ["-1"])),
            ),
    );

    // WHEN the profile is applied at the site layer
    let report = engine.apply_profile(&profile, Layer::SitePolicy);

    // THEN live and schema types were inferred and the site values win
    assert!(report.status().is_success());
    assert_eq!(port(&repo, "svc:/app"), Some(Value::Count(8080)));
    let service = repo.get_entity(&fmri("svc:/app")).unwrap().unwrap();
    let limits = repo
        .get_property_group(&service, "limits")
        .unwrap()
        .unwrap();
    let contents = repo.read_property_group(&limits).unwrap();
    assert_eq!(contents.pg_type, "application");
    assert_eq!(contents.first_value("max_conn"), Some(&Value::Integer(-1)));
}

#[test]
fn test_snapshot_commands_on_sqlite() {
    // GIVEN an engine on a repository file in a directory that does not exist yet
    let dir = TempDir::new().unwrap();
    let config = sqlite_config(&dir.path().join("state").join("repo.db"));
    let mut engine = Engine::sqlite(config).unwrap();
    assert!(engine
        .import_bundle(&bundle("app", "app.json", 22))
        .status()
        .is_success());
    let instance = fmri("svc:/app:default");

    // WHEN taking a snapshot, editing, then restoring it
    let taken = engine
        .take_snapshot(&instance, "before_edit")
        .unwrap()
        .unwrap();
    engine.import_bundle(&bundle("app", "app.json", 99));
    let outcome = engine.restore_snapshot(&instance, "before_edit").unwrap();

    // THEN the instance's snapshots include the taken one and "previous"
    assert_eq!(outcome.restored.id, taken.id);
    let names: Vec<String> = engine
        .list_snapshots(&instance)
        .unwrap()
        .into_iter()
        .map(|s| s.name)
        .collect();
    assert!(names.contains(&"before_edit".to_string()));
    assert!(names.contains(&"previous".to_string()));
}

#[test]
fn test_snapshot_of_missing_or_non_instance_entity() {
    let (_repo, mut engine) = memory_engine(EngineConfig::default());
    engine.import_bundle(&bundle("app", "app.json", 22));

    let err = engine
        .take_snapshot(&fmri("svc:/app"), "running")
        .unwrap_err();
    assert_eq!(err.kind(), ExErrorKind::InvalidInput);
    assert_eq!(err.op(), Some("take_snapshot"));

    let err = engine
        .restore_snapshot(&fmri("svc:/app:other"), "initial")
        .unwrap_err();
    assert_eq!(err.kind(), ExErrorKind::NotFound);

    let err = engine
        .restore_snapshot(&fmri("svc:/app:default"), "nonexistent")
        .unwrap_err();
    assert_eq!(err.kind(), ExErrorKind::NotFound);
    assert_eq!(err.op(), Some("restore_snapshot"));
}

#[test]
fn test_commands_dispatch() {
    // GIVEN two imported bundles
    let (repo, mut engine) = memory_engine(EngineConfig::default());
    for (name, source) in [("app", "app.json"), ("db", "db.json")] {
        let result = apply_engine_command(
            EngineCommand::ImportBundle {
                bundle: bundle(name, source, 1),
            },
            &mut engine,
        )
        .unwrap();
        assert!(matches!(result, EngineCommandResult::Reconciled(r) if r.status().is_success()));
    }

    // WHEN cleanup runs with only app.json live
    let live: BTreeSet<String> = ["app.json".to_string()].into_iter().collect();
    let result = apply_engine_command(
        EngineCommand::CleanupBundles {
            live,
            layer: Layer::Manifest,
        },
        &mut engine,
    )
    .unwrap();

    // THEN db.json's service is gone and show still lists app's groups
    match result {
        EngineCommandResult::Cleaned(removed) => {
            assert_eq!(removed.len(), 1);
            assert_eq!(removed[0].0, "db.json");
        }
        other => panic!("unexpected result {:?}", other),
    }
    assert!(repo.get_entity(&fmri("svc:/db")).unwrap().is_none());
    let shown = apply_engine_command(
        EngineCommand::Show {
            fmri: fmri("svc:/app"),
        },
        &mut engine,
    )
    .unwrap();
    match shown {
        EngineCommandResult::PropertyGroups(groups) => {
            assert!(groups.iter().any(|pg| pg.name == "config"));
        }
        other => panic!("unexpected result {:?}", other),
    }
}

#[test]
fn test_delayed_enable_from_config() {
    // GIVEN an engine configured for delayed enable
    let mut config = EngineConfig::default();
    config.import.delayed_enable = true;
    let (repo, mut engine) = memory_engine(config);
    let b = Bundle::new("app", "app.json").with_service(
        ServiceDecl::new("app").with_instance(InstanceDecl::new("default").with_pg(
            PgDecl::new("general", "framework").with_property(PropertyDecl::new(
                "enabled",
                ValueType::Boolean,
                ["true"],
            )),
        )),
    );

    // WHEN importing
    assert!(engine.import_bundle(&b).status().is_success());

    // THEN "running" was taken before enabled was written
    let instance = repo.get_entity(&fmri("svc:/app:default")).unwrap().unwrap();
    let running = repo.get_snapshot(&instance, "running").unwrap().unwrap();
    let levels = repo.list_snaplevels(&running).unwrap();
    let general = levels[1].property_group("general");
    assert!(general.map_or(true, |pg| pg.property("enabled").is_none()));
}
