use std::fmt::Display;

use clap::Args;

/// The image of this operator, used for the containers that run one of its
/// `util` commands inside the cluster.
#[derive(Clone, Debug, PartialEq, Eq, Args)]
#[command(next_help_heading = "Operator Image Options")]
pub struct OperatorImage {
    /// Organization of the operator image.
    #[arg(long = "docker-image-org", env = "DOCKER_IMAGE_ORG", default_value = "cfcontainerization")]
    pub organization: String,

    /// Repository of the operator image.
    #[arg(
        long = "docker-image-repository",
        env = "DOCKER_IMAGE_REPOSITORY",
        default_value = "bosh-operator"
    )]
    pub repository: String,

    /// Tag of the operator image.
    #[arg(long = "docker-image-tag", env = "DOCKER_IMAGE_TAG", default_value = "latest")]
    pub tag: String,
}

impl OperatorImage {
    pub fn new(
        organization: impl Into<String>,
        repository: impl Into<String>,
        tag: impl Into<String>,
    ) -> Self {
        Self {
            organization: organization.into(),
            repository: repository.into(),
            tag: tag.into(),
        }
    }
}

impl Display for OperatorImage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}:{}", self.organization, self.repository, self.tag)
    }
}
