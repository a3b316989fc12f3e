//! Schema validator collaborator used for type inference by profiles

use serde::{Deserialize, Serialize};

use crate::model::{Fmri, ValueType};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PropertySchema {
    pub name: String,
    pub value_type: ValueType,
    #[serde(default)]
    pub required: bool,
}

/// Expected shape of a property group
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct PgSchema {
    #[serde(default)]
    pub pg_type: Option<String>,
    #[serde(default)]
    pub properties: Vec<PropertySchema>,
}

impl PgSchema {
    pub fn property(&self, name: &str) -> Option<&PropertySchema> {
        self.properties.iter().find(|p| p.name == name)
    }

    pub fn required(&self) -> impl Iterator<Item = &PropertySchema> {
        self.properties.iter().filter(|p| p.required)
    }
}

/// Describes the expected property group `pg` of `target`
pub trait SchemaValidator {
    fn describe(&self, target: &Fmri, pg: &str) -> Option<PgSchema>;
}

/// Validator that knows nothing
#[derive(Debug, Clone, Copy, Default)]
pub struct NoSchema;

impl SchemaValidator for NoSchema {
    fn describe(&self, _target: &Fmri, _pg: &str) -> Option<PgSchema> {
        None
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SchemaEntry {
    /// Service name the entry is limited to; applies everywhere when absent
    #[serde(default)]
    pub service: Option<String>,
    pub pg: String,
    pub schema: PgSchema,
}

/// Table-driven validator, loadable from JSON
///
/// Service-specific entries take precedence over general ones.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct StaticSchema {
    #[serde(default)]
    pub entries: Vec<SchemaEntry>,
}

impl StaticSchema {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_pg(mut self, pg: impl Into<String>, schema: PgSchema) -> Self {
        self.entries.push(SchemaEntry {
            service: None,
            pg: pg.into(),
            schema,
        });
        self
    }

    pub fn with_service_pg(
        mut self,
        service: impl Into<String>,
        pg: impl Into<String>,
        schema: PgSchema,
    ) -> Self {
        self.entries.push(SchemaEntry {
            service: Some(service.into()),
            pg: pg.into(),
            schema,
        });
        self
    }
}

impl SchemaValidator for StaticSchema {
    fn describe(&self, target: &Fmri, pg: &str) -> Option<PgSchema> {
        let matching = |specific: bool| {
            self.entries.iter().find(|e| {
                e.pg == pg
                    && match &e.service {
                        Some(service) => specific && service == target.service_name(),
                        None => !specific,
                    }
            })
        };
        matching(true)
            .or_else(|| matching(false))
            .map(|e| e.schema.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn port_schema(ty: ValueType) -> PgSchema {
        PgSchema {
            pg_type: Some("application".into()),
            properties: vec![PropertySchema {
                name: "port".into(),
                value_type: ty,
                required: true,
            }],
        }
    }

    #[test]
    fn test_service_specific_entry_wins() {
        let schema = StaticSchema::new()
            .with_pg("config", port_schema(ValueType::Count))
            .with_service_pg("app", "config", port_schema(ValueType::Integer));

        let app = Fmri::instance("app", "default").unwrap();
        let other = Fmri::service("other").unwrap();
        let ty = |f: &Fmri| {
            schema
                .describe(f, "config")
                .and_then(|s| s.property("port").map(|p| p.value_type))
        };
        assert_eq!(ty(&app), Some(ValueType::Integer));
        assert_eq!(ty(&other), Some(ValueType::Count));
        assert!(schema.describe(&other, "general").is_none());
        assert!(NoSchema.describe(&other, "config").is_none());
    }

    #[test]
    fn test_loads_from_json() {
        let schema: StaticSchema = serde_json::from_str(
            r#"{"entries": [{"pg": "config", "schema": {"properties": [{"name": "port", "value_type": "count"}]}}]}"#,
        )
        .unwrap();
        let described = schema
            .describe(&Fmri::service("x").unwrap(), "config")
            .unwrap();
        assert_eq!(described.required().count(), 0);
        assert_eq!(described.pg_type, None);
    }
}
