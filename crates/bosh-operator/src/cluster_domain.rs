use std::{env, sync::LazyLock};

use const_format::concatcp;
use regex::Regex;
use snafu::{Snafu, ensure};
use tracing::instrument;

const KUBERNETES_CLUSTER_DOMAIN_ENV: &str = "KUBERNETES_CLUSTER_DOMAIN";
const KUBERNETES_CLUSTER_DOMAIN_DEFAULT: &str = "cluster.local";

const RFC_1123_LABEL_FMT: &str = "[a-zA-Z0-9]([-a-zA-Z0-9]*[a-zA-Z0-9])?";
const RFC_1123_LABEL_MAX_LENGTH: usize = 63;
const RFC_1123_SUBDOMAIN_MAX_LENGTH: usize = 253;
const DOMAIN_FMT: &str = concatcp!(RFC_1123_LABEL_FMT, "(\\.", RFC_1123_LABEL_FMT, ")*");

static DOMAIN_REGEX: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(&format!("^{DOMAIN_FMT}$")).expect("failed to compile domain regex")
});

#[derive(Debug, Snafu)]
pub enum Error {
    #[snafu(display("{cluster_domain:?} is not a valid domain name"))]
    InvalidDomainName { cluster_domain: String },
}

/// Tries to retrieve the Kubernetes cluster domain.
///
/// Return `KUBERNETES_CLUSTER_DOMAIN` if set, otherwise default to
/// [`KUBERNETES_CLUSTER_DOMAIN_DEFAULT`].
#[instrument]
pub fn retrieve_cluster_domain() -> Result<String, Error> {
    tracing::debug!("Trying to determine the Kubernetes cluster domain...");
    cluster_domain_from(env::var(KUBERNETES_CLUSTER_DOMAIN_ENV).ok())
}

fn cluster_domain_from(value: Option<String>) -> Result<String, Error> {
    Ok(match value {
        Some(cluster_domain) if !cluster_domain.is_empty() => {
            let cluster_domain = cluster_domain.trim_end_matches('.').to_owned();
            ensure!(
                is_domain_name(&cluster_domain),
                InvalidDomainNameSnafu { cluster_domain }
            );
            tracing::info!(
                %cluster_domain,
                "Using Kubernetes cluster domain from {KUBERNETES_CLUSTER_DOMAIN_ENV:?} environment variable"
            );
            cluster_domain
        }
        _ => {
            tracing::info!(
                cluster_domain = KUBERNETES_CLUSTER_DOMAIN_DEFAULT,
                "Using default Kubernetes cluster domain as {KUBERNETES_CLUSTER_DOMAIN_ENV:?} environment variable is not set"
            );
            KUBERNETES_CLUSTER_DOMAIN_DEFAULT.to_owned()
        }
    })
}

fn is_domain_name(value: &str) -> bool {
    value.len() <= RFC_1123_SUBDOMAIN_MAX_LENGTH
        && DOMAIN_REGEX.is_match(value)
        && value
            .split('.')
            .all(|label| label.len() <= RFC_1123_LABEL_MAX_LENGTH)
}
