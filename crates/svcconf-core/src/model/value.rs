//! Typed property values

use chrono::DateTime;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::net::IpAddr;

use super::fmri::Fmri;
use crate::errors::{RepoError, RepoResult};

/// Declared type of a property
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ValueType {
    Boolean,
    Count,
    Integer,
    Time,
    Astring,
    Ustring,
    Opaque,
    Uri,
    Fmri,
    Host,
    Hostname,
    NetAddress,
}

impl ValueType {
    pub const ALL: [ValueType; 12] = [
        ValueType::Boolean,
        ValueType::Count,
        ValueType::Integer,
        ValueType::Time,
        ValueType::Astring,
        ValueType::Ustring,
        ValueType::Opaque,
        ValueType::Uri,
        ValueType::Fmri,
        ValueType::Host,
        ValueType::Hostname,
        ValueType::NetAddress,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ValueType::Boolean => "boolean",
            ValueType::Count => "count",
            ValueType::Integer => "integer",
            ValueType::Time => "time",
            ValueType::Astring => "astring",
            ValueType::Ustring => "ustring",
            ValueType::Opaque => "opaque",
            ValueType::Uri => "uri",
            ValueType::Fmri => "fmri",
            ValueType::Host => "host",
            ValueType::Hostname => "hostname",
            ValueType::NetAddress => "net_address",
        }
    }

    /// # Errors
    ///
    /// `InvalidType` for an unknown type name.
    pub fn parse(s: &str) -> RepoResult<Self> {
        Self::ALL
            .into_iter()
            .find(|t| t.as_str() == s)
            .ok_or_else(|| RepoError::invalid_type(format!("unknown value type '{}'", s)))
    }
}

impl fmt::Display for ValueType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A single typed scalar
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "snake_case")]
pub enum Value {
    Boolean(bool),
    Count(u64),
    Integer(i64),
    /// Seconds since the Unix epoch
    Time(i64),
    Astring(String),
    Ustring(String),
    /// Lowercase hex
    Opaque(String),
    Uri(String),
    Fmri(Fmri),
    Host(String),
    Hostname(String),
    NetAddress(IpAddr),
}

fn invalid(ty: ValueType, text: &str) -> RepoError {
    RepoError::invalid_type(format!("'{}' is not a valid {} value", text, ty))
}

fn is_hostname(text: &str) -> bool {
    !text.is_empty()
        && text.len() <= 253
        && text.split('.').all(|label| {
            !label.is_empty()
                && label.len() <= 63
                && !label.starts_with('-')
                && !label.ends_with('-')
                && label.chars().all(|c| c.is_ascii_alphanumeric() || c == '-')
        })
}

impl Value {
    /// Parse bundle text against a declared type
    ///
    /// # Errors
    ///
    /// `InvalidType` when `text` is not a `ty`.
    pub fn parse(ty: ValueType, text: &str) -> RepoResult<Value> {
        let value = match ty {
            ValueType::Boolean => match text {
                "true" => Value::Boolean(true),
                "false" => Value::Boolean(false),
                _ => return Err(invalid(ty, text)),
            },
            ValueType::Count => Value::Count(text.parse().map_err(|_| invalid(ty, text))?),
            ValueType::Integer => Value::Integer(text.parse().map_err(|_| invalid(ty, text))?),
            ValueType::Time => match text.parse::<i64>() {
                Ok(secs) => Value::Time(secs),
                Err(_) => DateTime::parse_from_rfc3339(text)
                    .map(|t| Value::Time(t.timestamp()))
                    .map_err(|_| invalid(ty, text))?,
            },
            ValueType::Astring => {
                if !text.is_ascii() {
                    return Err(invalid(ty, text));
                }
                Value::Astring(text.to_string())
            }
            ValueType::Ustring => Value::Ustring(text.to_string()),
            ValueType::Opaque => {
                if text.len() % 2 != 0 || !text.chars().all(|c| c.is_ascii_hexdigit()) {
                    return Err(invalid(ty, text));
                }
                Value::Opaque(text.to_ascii_lowercase())
            }
            ValueType::Uri => {
                if text.is_empty() || text.chars().any(char::is_whitespace) {
                    return Err(invalid(ty, text));
                }
                Value::Uri(text.to_string())
            }
            ValueType::Fmri => Value::Fmri(Fmri::parse(text).map_err(|_| invalid(ty, text))?),
            ValueType::Host => {
                if text.parse::<IpAddr>().is_err() && !is_hostname(text) {
                    return Err(invalid(ty, text));
                }
                Value::Host(text.to_string())
            }
            ValueType::Hostname => {
                if !is_hostname(text) {
                    return Err(invalid(ty, text));
                }
                Value::Hostname(text.to_string())
            }
            ValueType::NetAddress => {
                Value::NetAddress(text.parse().map_err(|_| invalid(ty, text))?)
            }
        };
        Ok(value)
    }

    pub fn value_type(&self) -> ValueType {
        match self {
            Value::Boolean(_) => ValueType::Boolean,
            Value::Count(_) => ValueType::Count,
            Value::Integer(_) => ValueType::Integer,
            Value::Time(_) => ValueType::Time,
            Value::Astring(_) => ValueType::Astring,
            Value::Ustring(_) => ValueType::Ustring,
            Value::Opaque(_) => ValueType::Opaque,
            Value::Uri(_) => ValueType::Uri,
            Value::Fmri(_) => ValueType::Fmri,
            Value::Host(_) => ValueType::Host,
            Value::Hostname(_) => ValueType::Hostname,
            Value::NetAddress(_) => ValueType::NetAddress,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Boolean(b) => Some(*b),
            _ => None,
        }
    }

    pub fn as_fmri(&self) -> Option<&Fmri> {
        match self {
            Value::Fmri(f) => Some(f),
            _ => None,
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Boolean(b) => write!(f, "{}", b),
            Value::Count(n) => write!(f, "{}", n),
            Value::Integer(n) | Value::Time(n) => write!(f, "{}", n),
            Value::Astring(s)
            | Value::Ustring(s)
            | Value::Opaque(s)
            | Value::Uri(s)
            | Value::Host(s)
            | Value::Hostname(s) => f.write_str(s),
            Value::Fmri(fmri) => write!(f, "{}", fmri),
            Value::NetAddress(addr) => write!(f, "{}", addr),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_type_names_round_trip() {
        for ty in ValueType::ALL {
            assert_eq!(ValueType::parse(ty.as_str()).unwrap(), ty);
        }
        assert!(matches!(
            ValueType::parse("float"),
            Err(RepoError::InvalidType { .. })
        ));
    }

    #[test]
    fn test_parse_scalars() {
        assert_eq!(
            Value::parse(ValueType::Boolean, "true").unwrap(),
            Value::Boolean(true)
        );
        assert!(Value::parse(ValueType::Boolean, "yes").is_err());
        assert!(Value::parse(ValueType::Count, "-1").is_err());
        assert_eq!(
            Value::parse(ValueType::Integer, "-7").unwrap(),
            Value::Integer(-7)
        );
        assert_eq!(
            Value::parse(ValueType::Time, "1970-01-01T00:01:00Z").unwrap(),
            Value::Time(60)
        );
        assert_eq!(
            Value::parse(ValueType::Opaque, "DEADbeef").unwrap(),
            Value::Opaque("deadbeef".into())
        );
        assert!(Value::parse(ValueType::Opaque, "abc").is_err());
        assert!(Value::parse(ValueType::Astring, "café").is_err());
        assert!(Value::parse(ValueType::Ustring, "café").is_ok());
    }

    #[test]
    fn test_parse_network_types() {
        assert!(Value::parse(ValueType::Host, "10.0.0.1").is_ok());
        assert!(Value::parse(ValueType::Host, "db.example.com").is_ok());
        assert!(Value::parse(ValueType::Hostname, "10.0.0.1").is_ok());
        assert!(Value::parse(ValueType::Hostname, "-bad.example").is_err());
        assert!(Value::parse(ValueType::NetAddress, "::1").is_ok());
        assert!(Value::parse(ValueType::NetAddress, "localhost").is_err());
    }

    #[test]
    fn test_fmri_value_and_display() {
        let v = Value::parse(ValueType::Fmri, "svc:/milestone/network").unwrap();
        assert_eq!(v.value_type(), ValueType::Fmri);
        assert_eq!(v.to_string(), "svc:/milestone/network");
        assert!(v.as_fmri().is_some());
    }

    #[test]
    fn test_serde_tagged_form() {
        let json = serde_json::to_string(&Value::Count(3)).unwrap();
        assert_eq!(json, r#"{"type":"count","value":3}"#);
        let back: Value = serde_json::from_str(r#"{"type":"boolean","value":false}"#).unwrap();
        assert_eq!(back, Value::Boolean(false));
    }
}
