use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use super::names::{validate_service_name, validate_simple_name};
use crate::errors::{RepoError, RepoResult};

const SCHEME: &str = "svc:/";

/// Whether an FMRI names a service or one of its instances
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntityKind {
    Service,
    Instance,
}

/// Name of a service or instance, `svc:/service[:instance]`
///
/// An FMRI is a weak reference: it is resolved by lookup and the entity it
/// names may not exist yet, or may have been deleted.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Fmri {
    service: String,
    instance: Option<String>,
}

impl Fmri {
    /// # Errors
    ///
    /// `InvalidName` for a malformed service name.
    pub fn service(name: &str) -> RepoResult<Self> {
        validate_service_name(name)?;
        Ok(Self {
            service: name.to_string(),
            instance: None,
        })
    }

    /// # Errors
    ///
    /// `InvalidName` when either name is malformed.
    pub fn instance(service: &str, instance: &str) -> RepoResult<Self> {
        validate_service_name(service)?;
        validate_simple_name(instance)?;
        Ok(Self {
            service: service.to_string(),
            instance: Some(instance.to_string()),
        })
    }

    /// Parse `svc:/name`, `svc:/name:inst`, or the same without the scheme
    ///
    /// # Errors
    ///
    /// `InvalidName` for text that names no entity.
    pub fn parse(text: &str) -> RepoResult<Self> {
        let body = text
            .strip_prefix(SCHEME)
            .or_else(|| text.strip_prefix('/'))
            .unwrap_or(text);
        match body.split_once(':') {
            Some((service, instance)) => Self::instance(service, instance),
            None => Self::service(body),
        }
        .map_err(|_| RepoError::InvalidName {
            name: text.to_string(),
        })
    }

    pub fn service_name(&self) -> &str {
        &self.service
    }

    pub fn instance_name(&self) -> Option<&str> {
        self.instance.as_deref()
    }

    pub fn kind(&self) -> EntityKind {
        match self.instance {
            Some(_) => EntityKind::Instance,
            None => EntityKind::Service,
        }
    }

    pub fn is_instance(&self) -> bool {
        self.instance.is_some()
    }

    /// The owning service of an instance; `None` for a service
    pub fn parent(&self) -> Option<Fmri> {
        self.instance.as_ref().map(|_| Fmri {
            service: self.service.clone(),
            instance: None,
        })
    }

    /// The service this FMRI belongs to (itself for a service)
    pub fn service_fmri(&self) -> Fmri {
        Fmri {
            service: self.service.clone(),
            instance: None,
        }
    }

    /// An instance of this service
    ///
    /// # Errors
    ///
    /// `InvalidName` for a malformed instance name.
    pub fn child(&self, instance: &str) -> RepoResult<Fmri> {
        Self::instance(&self.service, instance)
    }
}

impl fmt::Display for Fmri {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}", SCHEME, self.service)?;
        if let Some(instance) = &self.instance {
            write!(f, ":{}", instance)?;
        }
        Ok(())
    }
}

impl FromStr for Fmri {
    type Err = RepoError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Fmri::parse(s)
    }
}

impl TryFrom<String> for Fmri {
    type Error = RepoError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Fmri::parse(&value)
    }
}

impl From<Fmri> for String {
    fn from(value: Fmri) -> Self {
        value.to_string()
    }
}
