#![allow(clippy::unwrap_used, clippy::expect_used)]

use std::path::Path;

use svcconf_core::model::{Fmri, ValueType};
use svcconf_core::{
    Bundle, InstanceDecl, MemoryConnector, MemoryRepository, PgDecl, PropertyDecl, ServiceDecl,
};
use svcconf_engine::{Engine, EngineConfig};

#[allow(dead_code)]
pub fn fmri(s: &str) -> Fmri {
    Fmri::parse(s).unwrap()
}

/// Bundle `source` declaring `name` with a configured port and one enabled instance
#[allow(dead_code)]
pub fn bundle(name: &str, source: &str, port: u64) -> Bundle {
    Bundle::new(name, source).with_service(
        ServiceDecl::new(name)
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

/// Engine over a fresh shared in-memory repository
#[allow(dead_code)]
pub fn memory_engine(config: EngineConfig) -> (MemoryRepository, Engine<MemoryConnector>) {
    let repo = MemoryRepository::new();
    let engine = Engine::new(MemoryConnector::new(repo.clone()), config);
    (repo, engine)
}

#[allow(dead_code)]
pub fn sqlite_config(path: &Path) -> EngineConfig {
    let mut config = EngineConfig::default();
    config.repository.path = path.to_path_buf();
    config
}
