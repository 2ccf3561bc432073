//! Free-form job property trees.
//!
//! BOSH properties are loosely typed YAML. They are converted into a
//! [`PropertyValue`] at the serde boundary so that dotted path traversal and
//! template evaluation can match on a closed set of variants instead of
//! poking at an untyped document.

use std::fmt;

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use snafu::Snafu;

/// An ordered property mapping. Insertion order is the manifest order.
pub type Properties = IndexMap<String, PropertyValue>;

#[derive(Debug, Snafu)]
pub enum Error {
    #[snafu(display("property mapping keys must be scalars, got {key:?}"))]
    UnsupportedKey { key: serde_yaml::Value },
}

/// A single node in a property tree.
#[derive(Clone, Debug, Default, PartialEq, Deserialize, Serialize)]
#[serde(try_from = "serde_yaml::Value", into = "serde_yaml::Value")]
pub enum PropertyValue {
    #[default]
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    String(String),
    Sequence(Vec<PropertyValue>),
    Mapping(Properties),
}

impl PropertyValue {
    pub fn as_mapping(&self) -> Option<&Properties> {
        match self {
            Self::Mapping(mapping) => Some(mapping),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::String(value) => Some(value),
            _ => None,
        }
    }

    /// Short, user facing name of the variant. Used in error messages.
    pub fn type_name(&self) -> &'static str {
        match self {
            Self::Null => "nil",
            Self::Bool(_) => "boolean",
            Self::Int(_) => "integer",
            Self::Float(_) => "float",
            Self::String(_) => "string",
            Self::Sequence(_) => "array",
            Self::Mapping(_) => "hash",
        }
    }
}

/// Looks up a dotted path like `health.disk.warning`.
///
/// Every segment but the last has to resolve to a mapping. A missing key or a
/// non-mapping intermediate yields [`None`]; a key that is present with a null
/// value yields `Some(&PropertyValue::Null)`.
pub fn lookup<'a>(properties: &'a Properties, path: &str) -> Option<&'a PropertyValue> {
    let mut segments = path.split('.');
    let mut current = properties.get(segments.next()?)?;

    for segment in segments {
        current = current.as_mapping()?.get(segment)?;
    }

    Some(current)
}

/// Inserts `value` at a dotted path, creating intermediate mappings as needed.
///
/// An intermediate that exists but is not a mapping is replaced.
pub fn insert_dotted(properties: &mut Properties, path: &str, value: PropertyValue) {
    match path.split_once('.') {
        None => {
            properties.insert(path.to_owned(), value);
        }
        Some((head, rest)) => {
            let entry = properties
                .entry(head.to_owned())
                .or_insert_with(|| PropertyValue::Mapping(Properties::new()));

            if !matches!(entry, PropertyValue::Mapping(_)) {
                *entry = PropertyValue::Mapping(Properties::new());
            }

            if let PropertyValue::Mapping(nested) = entry {
                insert_dotted(nested, rest, value);
            }
        }
    }
}

/// Deserializes a string, integer or boolean scalar as its string form.
/// Versions such as `36` are frequently left unquoted in manifests.
///
/// Floats are rejected, their text is lost once parsed (`1.10` would become
/// `1.1`).
pub(crate) fn stringified<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: serde::Deserializer<'de>,
{
    match PropertyValue::deserialize(deserializer)? {
        PropertyValue::Float(value) => Err(serde::de::Error::custom(format!(
            "ambiguous number {value}, quote the value to keep it verbatim"
        ))),
        value @ (PropertyValue::Sequence(_) | PropertyValue::Mapping(_)) => Err(
            serde::de::Error::custom(format!("expected a scalar, got {}", value.type_name())),
        ),
        value => Ok(value.to_string()),
    }
}

fn mapping_key(key: serde_yaml::Value) -> Result<String, Error> {
    match key {
        serde_yaml::Value::String(key) => Ok(key),
        serde_yaml::Value::Number(key) => Ok(key.to_string()),
        serde_yaml::Value::Bool(key) => Ok(key.to_string()),
        key => UnsupportedKeySnafu { key }.fail(),
    }
}

impl TryFrom<serde_yaml::Value> for PropertyValue {
    type Error = Error;

    fn try_from(value: serde_yaml::Value) -> Result<Self, Self::Error> {
        Ok(match value {
            serde_yaml::Value::Null => Self::Null,
            serde_yaml::Value::Bool(value) => Self::Bool(value),
            serde_yaml::Value::Number(number) => match number.as_i64() {
                Some(value) => Self::Int(value),
                None => Self::Float(number.as_f64().unwrap_or(f64::NAN)),
            },
            serde_yaml::Value::String(value) => Self::String(value),
            serde_yaml::Value::Sequence(values) => Self::Sequence(
                values
                    .into_iter()
                    .map(Self::try_from)
                    .collect::<Result<_, _>>()?,
            ),
            serde_yaml::Value::Mapping(mapping) => {
                let mut properties = Properties::with_capacity(mapping.len());
                for (key, value) in mapping {
                    properties.insert(mapping_key(key)?, Self::try_from(value)?);
                }
                Self::Mapping(properties)
            }
            // Custom tags carry no meaning for properties
            serde_yaml::Value::Tagged(tagged) => Self::try_from(tagged.value)?,
        })
    }
}

impl From<PropertyValue> for serde_yaml::Value {
    fn from(value: PropertyValue) -> Self {
        match value {
            PropertyValue::Null => Self::Null,
            PropertyValue::Bool(value) => Self::Bool(value),
            PropertyValue::Int(value) => Self::Number(value.into()),
            PropertyValue::Float(value) => Self::Number(value.into()),
            PropertyValue::String(value) => Self::String(value),
            PropertyValue::Sequence(values) => {
                Self::Sequence(values.into_iter().map(Self::from).collect())
            }
            PropertyValue::Mapping(properties) => Self::Mapping(
                properties
                    .into_iter()
                    .map(|(key, value)| (Self::String(key), Self::from(value)))
                    .collect(),
            ),
        }
    }
}

impl From<&str> for PropertyValue {
    fn from(value: &str) -> Self {
        Self::String(value.to_owned())
    }
}

impl From<String> for PropertyValue {
    fn from(value: String) -> Self {
        Self::String(value)
    }
}

impl From<i64> for PropertyValue {
    fn from(value: i64) -> Self {
        Self::Int(value)
    }
}

impl From<bool> for PropertyValue {
    fn from(value: bool) -> Self {
        Self::Bool(value)
    }
}

impl From<Properties> for PropertyValue {
    fn from(value: Properties) -> Self {
        Self::Mapping(value)
    }
}

/// Renders the value the way it ends up in a configuration file: scalars
/// verbatim, nil as an empty string, collections as JSON.
impl fmt::Display for PropertyValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Null => Ok(()),
            Self::Bool(value) => write!(f, "{value}"),
            Self::Int(value) => write!(f, "{value}"),
            Self::Float(value) => write!(f, "{value:?}"),
            Self::String(value) => f.write_str(value),
            Self::Sequence(_) | Self::Mapping(_) => {
                let json = serde_json::to_string(self).map_err(|_| fmt::Error)?;
                f.write_str(&json)
            }
        }
    }
}
