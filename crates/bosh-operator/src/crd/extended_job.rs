use std::collections::BTreeMap;

use k8s_openapi::api::core::v1::PodTemplateSpec;
use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use strum::Display;

/// A job that is run once, on demand or on pod state changes, and optionally
/// persists the JSON its containers print on stdout as one secret per
/// container.
#[derive(Clone, CustomResource, Debug, Default, Deserialize, JsonSchema, PartialEq, Serialize)]
#[kube(
    group = "fissile.cloudfoundry.org",
    version = "v1alpha1",
    kind = "ExtendedJob",
    plural = "extendedjobs",
    shortname = "ejob",
    namespaced,
    derive = "Default",
    derive = "PartialEq"
)]
#[serde(rename_all = "camelCase")]
pub struct ExtendedJobSpec {
    pub trigger: Trigger,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output: Option<Output>,

    /// Re-run the job when a referenced config map or secret changes.
    #[serde(default)]
    pub update_on_config_change: bool,

    pub template: PodTemplateSpec,
}

#[derive(Clone, Debug, Default, Deserialize, Eq, JsonSchema, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Trigger {
    pub strategy: TriggerStrategy,
}

impl From<TriggerStrategy> for Trigger {
    fn from(strategy: TriggerStrategy) -> Self {
        Self { strategy }
    }
}

#[derive(
    Clone, Copy, Debug, Default, Deserialize, Display, Eq, Hash, JsonSchema, PartialEq, Serialize,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum TriggerStrategy {
    /// Run as soon as the resource is created.
    Once,

    /// Run only when explicitly requested.
    #[default]
    Manual,

    /// Run whenever a matching pod changes state.
    Podstate,
}

/// Where the output of the job containers ends up.
#[derive(Clone, Debug, Default, Deserialize, Eq, JsonSchema, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Output {
    /// Output secrets are named `{name_prefix}{container}`.
    pub name_prefix: String,

    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub secret_labels: BTreeMap<String, String>,

    /// Keep every output as a new `-v{n}` secret instead of overwriting.
    #[serde(default)]
    pub versioned: bool,
}
