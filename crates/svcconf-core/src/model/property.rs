use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use super::layer::{Decoration, Layer};
use super::value::{Value, ValueType};

/// One layer's contribution to a property
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Contribution {
    pub value_type: ValueType,
    /// Ordered, possibly empty; every value has `value_type`
    pub values: Vec<Value>,
    /// Bundle file that supplied this contribution; `None` for admin writes
    pub source: Option<String>,
}

impl Contribution {
    pub fn new(value_type: ValueType, source: Option<String>) -> Self {
        Self {
            value_type,
            values: Vec::new(),
            source,
        }
    }
}

/// A property with every layer's contribution kept side by side
///
/// Reads resolve to the highest layer present; lower layers stay stored so
/// that retracting a higher one reveals the next.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PropertyContents {
    pub name: String,
    pub contributions: BTreeMap<Layer, Contribution>,
}

impl PropertyContents {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            contributions: BTreeMap::new(),
        }
    }

    /// Convenience for building a single-contribution property
    pub fn with_contribution(
        name: impl Into<String>,
        decoration: &Decoration,
        value_type: ValueType,
        values: Vec<Value>,
    ) -> Self {
        let mut prop = Self::new(name);
        prop.contributions.insert(
            decoration.layer,
            Contribution {
                value_type,
                values,
                source: decoration.source.clone(),
            },
        );
        prop
    }

    /// Highest-precedence contribution
    pub fn effective(&self) -> Option<(Layer, &Contribution)> {
        self.contributions
            .iter()
            .next_back()
            .map(|(layer, c)| (*layer, c))
    }

    pub fn effective_values(&self) -> &[Value] {
        self.effective()
            .map(|(_, c)| c.values.as_slice())
            .unwrap_or(&[])
    }

    pub fn effective_type(&self) -> Option<ValueType> {
        self.effective().map(|(_, c)| c.value_type)
    }

    pub fn contribution(&self, layer: Layer) -> Option<&Contribution> {
        self.contributions.get(&layer)
    }

    /// True if `decoration` supplied this property's contribution at its layer
    pub fn is_contributed_by(&self, decoration: &Decoration) -> bool {
        self.contributions
            .get(&decoration.layer)
            .is_some_and(|c| c.source == decoration.source)
    }

    /// True if the only contribution left is the one from `decoration`
    pub fn is_owned_solely_by(&self, decoration: &Decoration) -> bool {
        self.contributions.len() == 1 && self.is_contributed_by(decoration)
    }

    pub fn is_empty(&self) -> bool {
        self.contributions.is_empty()
    }
}
