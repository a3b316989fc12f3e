//! Writing one declared property group into a live entity

use std::collections::BTreeSet;
use tracing::debug;

use crate::bundle::{PgDecl, PropertyDecl};
use crate::client::{EntityRef, PgRef, RepositoryClient};
use crate::errors::{ExError, ExErrorKind, RepoError, Result};
use crate::model::{Decoration, PgFlags, Value, ValueType};
use crate::retry::{with_retry, RetryPolicy, WriteOutcome};

/// A property with its type settled and its values parsed
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedProperty {
    pub name: String,
    pub value_type: ValueType,
    pub values: Vec<Value>,
}

impl ResolvedProperty {
    pub fn new(name: impl Into<String>, value_type: ValueType, values: Vec<Value>) -> Self {
        Self {
            name: name.into(),
            value_type,
            values,
        }
    }

    /// Parse declared text against `value_type`
    ///
    /// # Errors
    ///
    /// `InvalidType` when a value does not parse as `value_type`.
    pub fn parse(decl: &PropertyDecl, value_type: ValueType) -> Result<Self> {
        crate::model::names::validate_simple_name(&decl.name)
            .map_err(|e| ExError::from(e).with_property(&decl.name))?;
        let values = decl
            .values
            .iter()
            .map(|text| Value::parse(value_type, text))
            .collect::<std::result::Result<Vec<_>, RepoError>>()
            .map_err(|e| ExError::from(e).with_property(&decl.name))?;
        Ok(Self::new(&decl.name, value_type, values))
    }
}

/// A property group ready to be written
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedPg {
    pub name: String,
    pub pg_type: String,
    pub flags: PgFlags,
    pub properties: Vec<ResolvedProperty>,
}

impl ResolvedPg {
    pub fn new(name: impl Into<String>, pg_type: impl Into<String>, flags: PgFlags) -> Self {
        Self {
            name: name.into(),
            pg_type: pg_type.into(),
            flags,
            properties: Vec::new(),
        }
    }

    pub fn with_property(mut self, property: ResolvedProperty) -> Self {
        self.properties.push(property);
        self
    }

    /// Resolve a declaration that must carry every type itself
    ///
    /// # Errors
    ///
    /// `TypeRequired` when the group or a property carries no type,
    /// `InvalidName` or `InvalidType` for a malformed declaration.
    pub fn from_decl(decl: &PgDecl) -> Result<Self> {
        decl.validate_name()?;
        let pg_type = decl.pg_type.clone().ok_or_else(|| {
            ExError::new(ExErrorKind::TypeRequired)
                .with_pg(&decl.name)
                .with_message("property group type is required")
        })?;
        let properties = decl
            .properties
            .iter()
            .map(|p| {
                let ty = p.value_type.ok_or_else(|| {
                    ExError::new(ExErrorKind::TypeRequired)
                        .with_property(&p.name)
                        .with_message("property type is required")
                })?;
                ResolvedProperty::parse(p, ty)
            })
            .collect::<Result<Vec<_>>>()
            .map_err(|e| e.or_pg(&decl.name))?;
        Ok(Self {
            name: decl.name.clone(),
            pg_type,
            flags: decl.flags,
            properties,
        })
    }

    /// Split off a property so it can be written later
    pub fn take_property(&mut self, name: &str) -> Option<ResolvedProperty> {
        let index = self.properties.iter().position(|p| p.name == name)?;
        Some(self.properties.remove(index))
    }
}

/// What happens to properties present in the group but not in the declaration
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteMode {
    /// Retract the owner layer's contribution where it came from the owner's source
    Import,
    /// Retract the owner layer's contribution whatever its source
    Forced,
    /// Leave them alone
    Merge,
}

/// Summary of one group write
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PgWrite {
    pub created: bool,
    pub outcome: WriteOutcome,
}

/// Creates or updates declared groups, one atomic transaction each
pub struct PgWriter<'a> {
    client: &'a dyn RepositoryClient,
    retry: RetryPolicy,
}

impl<'a> PgWriter<'a> {
    pub fn new(client: &'a dyn RepositoryClient, retry: RetryPolicy) -> Self {
        Self { client, retry }
    }

    /// Get the named group, creating it with the given type if absent
    ///
    /// A group created concurrently by someone else is adopted.
    ///
    /// # Errors
    ///
    /// The repository's failure looking up or adding the group.
    pub fn ensure_group(
        &self,
        entity: &EntityRef,
        name: &str,
        pg_type: &str,
        flags: PgFlags,
    ) -> Result<(PgRef, bool)> {
        if let Some(pg) = self.client.get_property_group(entity, name)? {
            return Ok((pg, false));
        }
        match self.client.add_property_group(entity, name, pg_type, flags) {
            Ok(pg) => Ok((pg, true)),
            Err(RepoError::AlreadyExists { .. }) => {
                let pg = self
                    .client
                    .get_property_group(entity, name)?
                    .ok_or_else(|| RepoError::deleted(format!("{}/{}", entity.fmri, name)))?;
                Ok((pg, false))
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Write `pg` into `entity` on behalf of `owner`
    ///
    /// Declared properties replace the owner layer's contribution. Properties
    /// named in `held` are neither written nor retracted.
    ///
    /// # Errors
    ///
    /// `Conflict` when a bounded retry policy runs out, `Deleted` when the
    /// group or entity vanished, or any other repository failure.
    pub fn write(
        &self,
        entity: &EntityRef,
        pg: &ResolvedPg,
        owner: &Decoration,
        mode: WriteMode,
        held: &[&str],
    ) -> Result<PgWrite> {
        let context = |e: ExError| e.or_entity(entity.fmri.to_string()).or_pg(&pg.name);
        let (pg_ref, created) = self
            .ensure_group(entity, &pg.name, &pg.pg_type, pg.flags)
            .map_err(context)?;
        let declared: BTreeSet<&str> = pg
            .properties
            .iter()
            .map(|p| p.name.as_str())
            .chain(held.iter().copied())
            .collect();

        let outcome = with_retry(self.client, &self.retry, &pg_ref, owner, |tx| {
            let base = tx.base().clone();
            if base.pg_type != pg.pg_type || base.flags != pg.flags || !base.is_decorated_by(owner)
            {
                tx.modify_group(&pg.pg_type, pg.flags);
            }
            for prop in &pg.properties {
                if held.contains(&prop.name.as_str()) {
                    continue;
                }
                tx.set_values(&prop.name, prop.value_type, prop.values.clone());
            }
            for (name, existing) in &base.properties {
                if declared.contains(name.as_str()) {
                    continue;
                }
                let retract = match mode {
                    WriteMode::Import => existing.is_contributed_by(owner),
                    WriteMode::Forced => existing.contribution(owner.layer).is_some(),
                    WriteMode::Merge => false,
                };
                if retract {
                    tx.retract(name);
                }
            }
            Ok(())
        })
        .map_err(context)?;

        debug!(
            fmri = %entity.fmri,
            pg = %pg.name,
            created,
            changed = outcome.changed(),
            "property group written"
        );
        Ok(PgWrite { created, outcome })
    }
}
