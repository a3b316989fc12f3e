use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

use super::layer::Decoration;
use super::property::PropertyContents;
use super::value::Value;

/// Property group flags
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct PgFlags {
    /// Live-only data; never snapshotted and never reconciled
    #[serde(default)]
    pub non_persistent: bool,
}

impl PgFlags {
    pub const PERSISTENT: PgFlags = PgFlags {
        non_persistent: false,
    };
    pub const NON_PERSISTENT: PgFlags = PgFlags {
        non_persistent: true,
    };
}

/// Full contents of a property group as read from the repository
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PgContents {
    pub name: String,
    pub pg_type: String,
    #[serde(default)]
    pub flags: PgFlags,
    /// Bumped by every committed transaction
    #[serde(default)]
    pub version: u64,
    /// Every decoration that has written this group
    #[serde(default)]
    pub decorations: BTreeSet<Decoration>,
    #[serde(default)]
    pub properties: BTreeMap<String, PropertyContents>,
}

impl PgContents {
    pub fn new(name: impl Into<String>, pg_type: impl Into<String>, flags: PgFlags) -> Self {
        Self {
            name: name.into(),
            pg_type: pg_type.into(),
            flags,
            version: 0,
            decorations: BTreeSet::new(),
            properties: BTreeMap::new(),
        }
    }

    pub fn is_persistent(&self) -> bool {
        !self.flags.non_persistent
    }

    pub fn property(&self, name: &str) -> Option<&PropertyContents> {
        self.properties.get(name)
    }

    pub fn effective_values(&self, property: &str) -> &[Value] {
        self.properties
            .get(property)
            .map(|p| p.effective_values())
            .unwrap_or(&[])
    }

    /// First effective value of a property, the usual read of a scalar
    pub fn first_value(&self, property: &str) -> Option<&Value> {
        self.effective_values(property).first()
    }

    pub fn is_decorated_by(&self, decoration: &Decoration) -> bool {
        self.decorations.contains(decoration)
    }

    pub fn non_admin_decorations(&self) -> impl Iterator<Item = &Decoration> {
        self.decorations.iter().filter(|d| !d.is_admin())
    }

    /// True if `decoration` wrote this group and nothing else backs it
    ///
    /// Every non-admin group decoration must be `decoration`, and every
    /// property must be contributed by `decoration` alone. An admin group
    /// decoration is ignored, but an admin property contribution is not.
    pub fn is_owned_solely_by(&self, decoration: &Decoration) -> bool {
        self.is_decorated_by(decoration)
            && self.non_admin_decorations().all(|d| d == decoration)
            && self
                .properties
                .values()
                .all(|p| p.is_owned_solely_by(decoration))
    }
}
