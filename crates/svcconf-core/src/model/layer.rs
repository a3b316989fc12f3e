use serde::{Deserialize, Serialize};
use std::fmt;

use crate::errors::{RepoError, RepoResult};

/// Decoration layer; later variants take precedence over earlier ones
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Layer {
    Manifest,
    SystemPolicy,
    SitePolicy,
    Admin,
}

impl Layer {
    pub fn as_str(&self) -> &'static str {
        match self {
            Layer::Manifest => "manifest",
            Layer::SystemPolicy => "system_policy",
            Layer::SitePolicy => "site_policy",
            Layer::Admin => "admin",
        }
    }

    /// # Errors
    ///
    /// `InvalidName` for an unknown layer.
    pub fn parse(s: &str) -> RepoResult<Self> {
        match s {
            "manifest" => Ok(Layer::Manifest),
            "system_policy" => Ok(Layer::SystemPolicy),
            "site_policy" => Ok(Layer::SitePolicy),
            "admin" => Ok(Layer::Admin),
            other => Err(RepoError::InvalidName {
                name: other.to_string(),
            }),
        }
    }
}

impl fmt::Display for Layer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Who wrote something: a layer and, except for admin writes, the bundle file
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Decoration {
    pub layer: Layer,
    pub source: Option<String>,
}

impl Decoration {
    pub fn new(layer: Layer, source: impl Into<String>) -> Self {
        Self {
            layer,
            source: Some(source.into()),
        }
    }

    pub fn manifest(source: impl Into<String>) -> Self {
        Self::new(Layer::Manifest, source)
    }

    pub fn admin() -> Self {
        Self {
            layer: Layer::Admin,
            source: None,
        }
    }

    pub fn is_admin(&self) -> bool {
        self.layer == Layer::Admin
    }
}

impl fmt::Display for Decoration {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.source {
            Some(source) => write!(f, "{}:{}", self.layer, source),
            None => write!(f, "{}", self.layer),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_precedence_order() {
        assert!(Layer::Admin > Layer::SitePolicy);
        assert!(Layer::SitePolicy > Layer::SystemPolicy);
        assert!(Layer::SystemPolicy > Layer::Manifest);
    }

    #[test]
    fn test_layer_names() {
        for layer in [
            Layer::Manifest,
            Layer::SystemPolicy,
            Layer::SitePolicy,
            Layer::Admin,
        ] {
            assert_eq!(Layer::parse(layer.as_str()).unwrap(), layer);
        }
        assert!(Layer::parse("vendor").is_err());
    }

    #[test]
    fn test_decoration_display() {
        assert_eq!(
            Decoration::manifest("ssh.xml").to_string(),
            "manifest:ssh.xml"
        );
        assert_eq!(Decoration::admin().to_string(), "admin");
    }
}
