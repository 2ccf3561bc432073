//! BOSH Process Manager (BPM) launch descriptors as rendered from a job's
//! `bpm.yml` template.

use indexmap::IndexMap;
use serde::{Deserialize, Deserializer, Serialize};

use crate::manifest::property::PropertyValue;

/// The rendered template destination BPM information is read from.
pub const BPM_TEMPLATE_DESTINATION: &str = "config/bpm.yml";

#[derive(Clone, Debug, Default, PartialEq, Eq, Deserialize, Serialize)]
pub struct BpmConfig {
    #[serde(default)]
    pub processes: Vec<BpmProcess>,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Deserialize, Serialize)]
pub struct BpmProcess {
    pub name: String,
    pub executable: String,

    #[serde(default, deserialize_with = "stringified_list")]
    pub args: Vec<String>,

    /// Values are stringified, rendered templates often produce bare numbers
    /// like `PORT: 6379`.
    #[serde(default, deserialize_with = "stringified_map")]
    pub env: IndexMap<String, String>,

    #[serde(default)]
    pub workdir: String,
}

impl BpmConfig {
    pub fn from_yaml(contents: &str) -> Result<Self, serde_yaml::Error> {
        serde_yaml::from_str(contents)
    }
}

fn stringified_list<'de, D>(deserializer: D) -> Result<Vec<String>, D::Error>
where
    D: Deserializer<'de>,
{
    let values = Option::<Vec<PropertyValue>>::deserialize(deserializer)?;
    Ok(values
        .unwrap_or_default()
        .iter()
        .map(ToString::to_string)
        .collect())
}

fn stringified_map<'de, D>(deserializer: D) -> Result<IndexMap<String, String>, D::Error>
where
    D: Deserializer<'de>,
{
    let values = Option::<IndexMap<String, PropertyValue>>::deserialize(deserializer)?;
    Ok(values
        .unwrap_or_default()
        .into_iter()
        .map(|(name, value)| (name, value.to_string()))
        .collect())
}
