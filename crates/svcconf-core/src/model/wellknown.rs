//! Names with fixed meaning to the reconciliation engine

/// Property group holding run state
pub const PG_GENERAL: &str = "general";
/// Boolean run/stop property in `general`
pub const PROP_ENABLED: &str = "enabled";

/// Record of an entity's own dependent declarations
pub const PG_DEPENDENTS: &str = "dependents";

pub const PG_TYPE_DEPENDENCY: &str = "dependency";
pub const PG_TYPE_FRAMEWORK: &str = "framework";

/// Properties of a materialized dependency group
pub const PROP_ENTITIES: &str = "entities";
pub const PROP_GROUPING: &str = "grouping";
pub const PROP_RESTART_ON: &str = "restart_on";
pub const PROP_TYPE: &str = "type";
pub const PROP_EXTERNAL: &str = "external";

pub const DEPENDENCY_TYPE_SERVICE: &str = "service";
pub const DEFAULT_GROUPING: &str = "optional_all";
pub const DEFAULT_RESTART_ON: &str = "none";

pub const SNAPSHOT_INITIAL: &str = "initial";
pub const SNAPSHOT_PREVIOUS: &str = "previous";
pub const SNAPSHOT_RUNNING: &str = "running";
