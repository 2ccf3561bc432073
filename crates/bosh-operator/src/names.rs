//! Names of the objects generated for a deployment.

use sha1::{Digest, Sha1};

/// Maximum length of a DNS-1035 label, which Service names must be.
const MAX_SERVICE_NAME_LENGTH: usize = 63;

/// Hex digits of the SHA-1 kept when a name has to be shortened.
const NAME_HASH_LENGTH: usize = 8;

/// The kinds of secrets created while a deployment moves through the
/// pipeline.
#[derive(Clone, Copy, Debug, PartialEq, Eq, strum::Display)]
pub enum DeploymentSecretType {
    /// The manifest with ops files applied.
    #[strum(serialize = "with-ops")]
    ManifestWithOps,

    /// The manifest with variables interpolated.
    #[strum(serialize = "with-vars")]
    ManifestWithVars,

    /// A generated credential.
    #[strum(serialize = "var")]
    GeneratedVariable,

    /// The resolved properties of a single instance group.
    #[strum(serialize = "ig-resolved")]
    InstanceGroupResolvedProperties,
}

/// Returns `{deployment}.{type}` or `{deployment}.{type}-{name}`.
pub fn secret_name(secret_type: DeploymentSecretType, deployment: &str, name: &str) -> String {
    let secret_name = if name.is_empty() {
        format!("{deployment}.{secret_type}")
    } else {
        format!("{deployment}.{secret_type}-{name}")
    };

    sanitize(&secret_name)
}

/// Returns the name prefix an extended job writes its output secrets with
/// and the name of the secret produced for `container`.
pub fn output_secret_prefix_and_name(
    secret_type: DeploymentSecretType,
    deployment: &str,
    container: &str,
    versioned: bool,
) -> (String, String) {
    let prefix = format!("{}.", secret_name(secret_type, deployment, ""));
    let mut name = format!("{prefix}{}", sanitize(container));
    if versioned {
        name.push_str("-v1");
    }

    (prefix, name)
}

/// Returns the Service name of instance `index` of an instance group, or of
/// the headless Service governing the group if `index` is [`None`].
pub fn service_name(deployment: &str, instance_group: &str, index: Option<usize>) -> String {
    let name = match index {
        Some(index) => format!("{deployment}-{instance_group}-{index}"),
        None => format!("{deployment}-{instance_group}"),
    };

    truncate_with_hash(&sanitize(&name), MAX_SERVICE_NAME_LENGTH)
}

/// Derives a volume name from a secret name: the first segment after the
/// deployment name.
pub fn volume_name(secret_name: &str) -> String {
    let mut segments = secret_name.split('.');
    match (segments.next(), segments.next()) {
        (Some(_), Some(name)) => name.to_owned(),
        _ => secret_name.to_owned(),
    }
}

fn sanitize(name: &str) -> String {
    name.to_lowercase().replace('_', "-")
}

fn truncate_with_hash(name: &str, max_length: usize) -> String {
    if name.len() <= max_length {
        return name.to_owned();
    }

    let digest = format!("{:x}", Sha1::digest(name.as_bytes()));
    let keep = max_length - NAME_HASH_LENGTH - 1;
    // Cut at a char boundary, names are not guaranteed to be ASCII
    let end = name
        .char_indices()
        .map(|(index, c)| index + c.len_utf8())
        .take_while(|end| *end <= keep)
        .last()
        .unwrap_or_default();
    let prefix = name[..end].trim_end_matches('-');

    format!("{prefix}-{}", &digest[..NAME_HASH_LENGTH])
}

#[cfg(test)]
mod tests {
    use rstest::rstest;

    use super::*;

    #[rstest]
    #[case(DeploymentSecretType::ManifestWithOps, "", "foo-deployment.with-ops")]
    #[case(DeploymentSecretType::GeneratedVariable, "adminpass", "foo-deployment.var-adminpass")]
    #[case(DeploymentSecretType::GeneratedVariable, "Router_CA", "foo-deployment.var-router-ca")]
    fn secret_names(
        #[case] secret_type: DeploymentSecretType,
        #[case] name: &str,
        #[case] expected: &str,
    ) {
        assert_eq!(secret_name(secret_type, "foo-deployment", name), expected);
    }

    #[test]
    fn output_secret_names() {
        assert_eq!(
            output_secret_prefix_and_name(
                DeploymentSecretType::ManifestWithVars,
                "foo-deployment",
                "interpolation",
                true
            ),
            (
                "foo-deployment.with-vars.".to_owned(),
                "foo-deployment.with-vars.interpolation-v1".to_owned()
            )
        );
        assert_eq!(
            output_secret_prefix_and_name(
                DeploymentSecretType::InstanceGroupResolvedProperties,
                "foo-deployment",
                "redis-slave",
                false
            )
            .1,
            "foo-deployment.ig-resolved.redis-slave"
        );
    }

    #[rstest]
    #[case(Some(3), "foo-deployment-redis-slave-3")]
    #[case(None, "foo-deployment-redis-slave")]
    fn service_names(#[case] index: Option<usize>, #[case] expected: &str) {
        assert_eq!(service_name("foo-deployment", "redis-slave", index), expected);
    }

    #[test]
    fn long_service_names_are_shortened() {
        let instance_group = "a".repeat(70);
        let first = service_name("foo", &instance_group, Some(0));
        let second = service_name("foo", &instance_group, Some(1));

        assert_eq!(first.len(), MAX_SERVICE_NAME_LENGTH);
        assert_ne!(first, second);
    }

    #[test]
    fn long_service_names_are_cut_at_char_boundaries() {
        let deployment = format!("{}é{}", "a".repeat(53), "b".repeat(10));
        let name = service_name(&deployment, "ig", Some(0));

        assert!(name.len() <= MAX_SERVICE_NAME_LENGTH);
        assert!(name.starts_with(&"a".repeat(53)));
        assert!(!name.contains('é'));
    }

    #[rstest]
    #[case("foo-deployment.with-vars.interpolation-v1", "with-vars")]
    #[case("foo-deployment.ig-resolved.redis-slave-v1", "ig-resolved")]
    #[case("no-vars", "no-vars")]
    fn volume_names(#[case] secret_name: &str, #[case] expected: &str) {
        assert_eq!(volume_name(secret_name), expected);
    }
}
