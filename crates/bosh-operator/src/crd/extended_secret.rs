use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use strum::Display;

use crate::manifest::VariableType;

/// A secret whose content is generated by the secret controller, one per
/// manifest variable.
#[derive(Clone, CustomResource, Debug, Default, Deserialize, Eq, JsonSchema, PartialEq, Serialize)]
#[kube(
    group = "fissile.cloudfoundry.org",
    version = "v1alpha1",
    kind = "ExtendedSecret",
    plural = "extendedsecrets",
    shortname = "esec",
    namespaced,
    derive = "Default",
    derive = "PartialEq"
)]
#[serde(rename_all = "camelCase")]
pub struct ExtendedSecretSpec {
    #[serde(rename = "type")]
    pub type_: SecretType,

    /// Name of the generated Kubernetes secret.
    pub secret_name: String,

    #[serde(default)]
    pub request: Request,
}

#[derive(
    Clone, Copy, Debug, Default, Deserialize, Display, Eq, Hash, JsonSchema, PartialEq, Serialize,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum SecretType {
    #[default]
    Password,
    Certificate,
    Ssh,
    Rsa,
}

impl From<VariableType> for SecretType {
    fn from(value: VariableType) -> Self {
        match value {
            VariableType::Password => Self::Password,
            VariableType::Certificate => Self::Certificate,
            VariableType::Ssh => Self::Ssh,
            VariableType::Rsa => Self::Rsa,
        }
    }
}

#[derive(Clone, Debug, Default, Deserialize, Eq, JsonSchema, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Request {
    #[serde(default)]
    pub certificate: CertificateRequest,
}

#[derive(Clone, Debug, Default, Deserialize, Eq, JsonSchema, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CertificateRequest {
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub common_name: String,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub alternative_names: Vec<String>,

    #[serde(default, rename = "isCA")]
    pub is_ca: bool,

    /// The secret holding the signing CA certificate.
    #[serde(default, rename = "CARef", skip_serializing_if = "SecretReference::is_empty")]
    pub ca_ref: SecretReference,

    /// The secret holding the signing CA private key.
    #[serde(default, rename = "CAKeyRef", skip_serializing_if = "SecretReference::is_empty")]
    pub ca_key_ref: SecretReference,
}

/// Points at a single key of a secret.
#[derive(Clone, Debug, Default, Deserialize, Eq, JsonSchema, PartialEq, Serialize)]
pub struct SecretReference {
    pub name: String,
    pub key: String,
}

impl SecretReference {
    pub fn new(name: impl Into<String>, key: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            key: key.into(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.name.is_empty() && self.key.is_empty()
    }
}
