use crate::{
    builder::meta::ObjectMetaBuilder,
    crd::{CertificateRequest, ExtendedSecret, ExtendedSecretSpec, Request, SecretReference, SecretType},
    labels,
    manifest::{Manifest, Variable},
    names::{self, DeploymentSecretType},
};

/// Key of the certificate inside a generated certificate secret.
const CERTIFICATE_KEY: &str = "certificate";

/// Key of the private key inside a generated certificate secret.
const PRIVATE_KEY_KEY: &str = "private_key";

/// One extended secret per manifest variable.
pub(super) fn extended_secrets(manifest: &Manifest, namespace: &str) -> Vec<ExtendedSecret> {
    manifest
        .variables
        .iter()
        .map(|variable| extended_secret(&manifest.name, namespace, variable))
        .collect()
}

fn extended_secret(deployment: &str, namespace: &str, variable: &Variable) -> ExtendedSecret {
    let secret_name =
        names::secret_name(DeploymentSecretType::GeneratedVariable, deployment, &variable.name);
    let type_ = SecretType::from(variable.type_);

    let mut request = Request::default();
    if type_ == SecretType::Certificate {
        let options = &variable.options;
        request.certificate = CertificateRequest {
            common_name: options.common_name.clone(),
            alternative_names: options.alternative_names.clone(),
            is_ca: options.is_ca,
            ..CertificateRequest::default()
        };

        if !options.ca.is_empty() {
            let ca_secret =
                names::secret_name(DeploymentSecretType::GeneratedVariable, deployment, &options.ca);
            request.certificate.ca_ref = SecretReference::new(&ca_secret, CERTIFICATE_KEY);
            request.certificate.ca_key_ref = SecretReference::new(ca_secret, PRIVATE_KEY_KEY);
        }
    }

    ExtendedSecret {
        metadata: ObjectMetaBuilder::new()
            .name(&secret_name)
            .namespace(namespace)
            .with_label(labels::VARIABLE_NAME_KEY, &variable.name)
            .build(),
        spec: ExtendedSecretSpec {
            type_,
            secret_name,
            request,
        },
    }
}
