//! Bundle model: the declared entity tree handed to the engine
//!
//! A bundle is produced by an external loader and arrives either in memory
//! or as its JSON serialization. Values stay textual until import, where
//! they are parsed against the declared or inferred property type.

use serde::{Deserialize, Serialize};

use crate::errors::{ExError, ExErrorKind, Result};
use crate::model::names::validate_simple_name;
use crate::model::{Fmri, PgFlags, ValueType};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Bundle {
    pub name: String,
    /// File the bundle was loaded from; becomes the decoration source
    pub source: String,
    #[serde(default)]
    pub services: Vec<ServiceDecl>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServiceDecl {
    pub name: String,
    #[serde(default)]
    pub property_groups: Vec<PgDecl>,
    #[serde(default)]
    pub instances: Vec<InstanceDecl>,
    #[serde(default)]
    pub dependents: Vec<DependentDecl>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InstanceDecl {
    pub name: String,
    #[serde(default)]
    pub property_groups: Vec<PgDecl>,
    #[serde(default)]
    pub dependents: Vec<DependentDecl>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PgDecl {
    pub name: String,
    /// Required by manifest import; profiles may leave it to inference
    #[serde(default)]
    pub pg_type: Option<String>,
    #[serde(default)]
    pub flags: PgFlags,
    #[serde(default)]
    pub properties: Vec<PropertyDecl>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PropertyDecl {
    pub name: String,
    #[serde(default)]
    pub value_type: Option<ValueType>,
    #[serde(default)]
    pub values: Vec<String>,
}

/// A property group to materialize inside another entity, pointing back here
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DependentDecl {
    /// Name of the group created in the target
    pub name: String,
    /// FMRI of the target entity
    pub target: String,
    #[serde(default)]
    pub grouping: Option<String>,
    #[serde(default)]
    pub restart_on: Option<String>,
    /// Extra properties copied into the materialized group
    #[serde(default)]
    pub properties: Vec<PropertyDecl>,
}

impl Bundle {
    pub fn new(name: impl Into<String>, source: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            source: source.into(),
            services: Vec::new(),
        }
    }

    pub fn with_service(mut self, service: ServiceDecl) -> Self {
        self.services.push(service);
        self
    }

    /// Parse the JSON form of a bundle
    ///
    /// # Errors
    ///
    /// `Serialization` for text that is not a bundle.
    pub fn from_json(text: &str) -> Result<Self> {
        let bundle: Bundle = serde_json::from_str(text)?;
        if bundle.source.is_empty() {
            return Err(ExError::new(ExErrorKind::InvalidInput)
                .with_op("bundle_from_json")
                .with_message("bundle source must not be empty"));
        }
        Ok(bundle)
    }
}

impl ServiceDecl {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            property_groups: Vec::new(),
            instances: Vec::new(),
            dependents: Vec::new(),
        }
    }

    pub fn with_pg(mut self, pg: PgDecl) -> Self {
        self.property_groups.push(pg);
        self
    }

    pub fn with_instance(mut self, instance: InstanceDecl) -> Self {
        self.instances.push(instance);
        self
    }

    pub fn with_dependent(mut self, dependent: DependentDecl) -> Self {
        self.dependents.push(dependent);
        self
    }

    /// # Errors
    ///
    /// `InvalidName` when the bundle names no valid service.
    pub fn fmri(&self) -> Result<Fmri> {
        Fmri::service(&self.name).map_err(|e| ExError::from(e).with_entity(&self.name))
    }
}

impl InstanceDecl {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            property_groups: Vec::new(),
            dependents: Vec::new(),
        }
    }

    pub fn with_pg(mut self, pg: PgDecl) -> Self {
        self.property_groups.push(pg);
        self
    }

    pub fn with_dependent(mut self, dependent: DependentDecl) -> Self {
        self.dependents.push(dependent);
        self
    }
}

impl PgDecl {
    pub fn new(name: impl Into<String>, pg_type: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            pg_type: Some(pg_type.into()),
            flags: PgFlags::default(),
            properties: Vec::new(),
        }
    }

    /// A declaration whose type is left to inference
    pub fn untyped(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            pg_type: None,
            flags: PgFlags::default(),
            properties: Vec::new(),
        }
    }

    pub fn with_flags(mut self, flags: PgFlags) -> Self {
        self.flags = flags;
        self
    }

    pub fn with_property(mut self, property: PropertyDecl) -> Self {
        self.properties.push(property);
        self
    }

    /// # Errors
    ///
    /// `InvalidName` for a name the repository would refuse.
    pub fn validate_name(&self) -> Result<()> {
        validate_simple_name(&self.name).map_err(|e| ExError::from(e).with_pg(&self.name))
    }
}

impl PropertyDecl {
    pub fn new<I, S>(name: impl Into<String>, value_type: ValueType, values: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            name: name.into(),
            value_type: Some(value_type),
            values: values.into_iter().map(Into::into).collect(),
        }
    }

    pub fn untyped<I, S>(name: impl Into<String>, values: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            name: name.into(),
            value_type: None,
            values: values.into_iter().map(Into::into).collect(),
        }
    }
}

impl DependentDecl {
    pub fn new(name: impl Into<String>, target: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            target: target.into(),
            grouping: None,
            restart_on: None,
            properties: Vec::new(),
        }
    }
}
