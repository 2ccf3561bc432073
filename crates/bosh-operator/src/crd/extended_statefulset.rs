use k8s_openapi::api::apps::v1::StatefulSet;
use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// A stateful set that is restarted when its configuration changes and is
/// spread over availability zones.
#[derive(Clone, CustomResource, Debug, Default, Deserialize, JsonSchema, PartialEq, Serialize)]
#[kube(
    group = "fissile.cloudfoundry.org",
    version = "v1alpha1",
    kind = "ExtendedStatefulSet",
    plural = "extendedstatefulsets",
    shortname = "ests",
    namespaced,
    derive = "Default",
    derive = "PartialEq"
)]
#[serde(rename_all = "camelCase")]
pub struct ExtendedStatefulSetSpec {
    #[serde(default)]
    pub update_on_config_change: bool,

    /// One copy of `template` is run per zone. The replica count of the
    /// template is per zone.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub zones: Vec<String>,

    pub template: StatefulSet,
}
