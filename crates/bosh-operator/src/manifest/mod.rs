//! The in-memory representation of a BOSH deployment manifest.
//!
//! A [`Manifest`] is deserialized from YAML once per pipeline invocation. The
//! reserved `properties.bosh_containerization` sub-tree of every [`Job`] holds
//! the data computed by later stages (instances, consumed links, BPM
//! processes) so that a resolved manifest can be handed between the pods of
//! the in-cluster pipeline as a single document.

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use sha1::{Digest, Sha1};
use snafu::{OptionExt, ResultExt, Snafu};
use url::Url;

pub mod bpm;
pub mod property;

pub use bpm::{BpmConfig, BpmProcess};
pub use property::{Properties, PropertyValue};

type Result<T, E = Error> = std::result::Result<T, E>;

#[derive(Debug, Snafu)]
pub enum Error {
    #[snafu(display("instance group {instance_group:?} not found"))]
    InstanceGroupNotFound { instance_group: String },

    #[snafu(display("job {job:?} not found in instance group {instance_group:?}"))]
    JobNotFound {
        job: String,
        instance_group: String,
    },

    #[snafu(display("release {release:?} not found"))]
    ReleaseNotFound { release: String },

    #[snafu(display("stemcell could not be resolved for instance group {instance_group:?}"))]
    StemcellNotResolved { instance_group: String },

    #[snafu(display("failed to parse manifest"))]
    ParseManifest { source: serde_yaml::Error },

    #[snafu(display("failed to serialize manifest"))]
    SerializeManifest { source: serde_yaml::Error },
}

#[derive(Clone, Debug, Default, PartialEq, Deserialize, Serialize)]
pub struct Manifest {
    pub name: String,

    #[serde(default)]
    pub releases: Vec<Release>,

    #[serde(default)]
    pub stemcells: Vec<Stemcell>,

    #[serde(default)]
    pub variables: Vec<Variable>,

    #[serde(default)]
    pub instance_groups: Vec<InstanceGroup>,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Deserialize, Serialize)]
pub struct Release {
    pub name: String,

    #[serde(default)]
    pub url: String,

    #[serde(deserialize_with = "property::stringified")]
    pub version: String,

    /// Overrides the stemcell of the instance group using this release.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stemcell: Option<ReleaseStemcell>,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Deserialize, Serialize)]
pub struct ReleaseStemcell {
    pub os: String,

    #[serde(deserialize_with = "property::stringified")]
    pub version: String,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Deserialize, Serialize)]
pub struct Stemcell {
    pub alias: String,
    pub os: String,

    #[serde(deserialize_with = "property::stringified")]
    pub version: String,
}

#[derive(Clone, Debug, PartialEq, Eq, Deserialize, Serialize)]
pub struct Variable {
    pub name: String,

    #[serde(rename = "type")]
    pub type_: VariableType,

    #[serde(default)]
    pub options: VariableOptions,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Deserialize, Serialize, strum::Display)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum VariableType {
    Password,
    Certificate,
    Ssh,
    Rsa,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Deserialize, Serialize)]
pub struct VariableOptions {
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub common_name: String,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub alternative_names: Vec<String>,

    #[serde(default)]
    pub is_ca: bool,

    /// Name of the variable holding the signing CA.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub ca: String,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Deserialize, Serialize, strum::Display)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum Lifecycle {
    #[default]
    Service,
    Errand,
}

#[derive(Clone, Debug, Default, PartialEq, Deserialize, Serialize)]
pub struct InstanceGroup {
    pub name: String,

    /// Number of replicas per availability zone.
    #[serde(default)]
    pub instances: u32,

    #[serde(default)]
    pub azs: Vec<String>,

    #[serde(default)]
    pub lifecycle: Lifecycle,

    /// Alias of an entry in [`Manifest::stemcells`].
    #[serde(default)]
    pub stemcell: String,

    #[serde(default)]
    pub jobs: Vec<Job>,
}

impl InstanceGroup {
    pub fn job(&self, name: &str) -> Option<&Job> {
        self.jobs.iter().find(|job| job.name == name)
    }
}

#[derive(Clone, Debug, Default, PartialEq, Deserialize, Serialize)]
pub struct Job {
    pub name: String,
    pub release: String,

    #[serde(default)]
    pub properties: JobProperties,

    /// Manifest level overrides for consumed links. A `null` entry blocks the
    /// link from being resolved at all.
    #[serde(default, skip_serializing_if = "IndexMap::is_empty")]
    pub consumes: IndexMap<String, Option<ConsumesOverride>>,

    /// Manifest level aliases for provided links.
    #[serde(default, skip_serializing_if = "IndexMap::is_empty")]
    pub provides: IndexMap<String, ProvidesOverride>,
}

impl Job {
    /// Looks up a dotted property path in the manifest properties of this job.
    ///
    /// Absence is not an error, see [`property::lookup`].
    pub fn property(&self, path: &str) -> Option<&PropertyValue> {
        property::lookup(&self.properties.properties, path)
    }

    pub fn containerization(&self) -> &BoshContainerization {
        &self.properties.bosh_containerization
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Deserialize, Serialize)]
pub struct ConsumesOverride {
    /// Name of the provided link to consume instead of the declared one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub from: Option<String>,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Deserialize, Serialize)]
pub struct ProvidesOverride {
    #[serde(default, rename = "as", skip_serializing_if = "Option::is_none")]
    pub alias: Option<String>,
}

#[derive(Clone, Debug, Default, PartialEq, Deserialize, Serialize)]
pub struct JobProperties {
    #[serde(default)]
    pub bosh_containerization: BoshContainerization,

    #[serde(flatten)]
    pub properties: Properties,
}

/// Pipeline computed state stashed inside a job's properties.
#[derive(Clone, Debug, Default, PartialEq, Deserialize, Serialize)]
pub struct BoshContainerization {
    #[serde(default)]
    pub instances: Vec<JobInstance>,

    #[serde(default)]
    pub consumes: IndexMap<String, JobLink>,

    #[serde(default)]
    pub bpm: BpmConfig,

    #[serde(default)]
    pub ports: Vec<Port>,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Deserialize, Serialize)]
pub struct Port {
    pub name: String,

    #[serde(default = "Port::default_protocol")]
    pub protocol: String,

    pub internal: i32,
}

impl Port {
    fn default_protocol() -> String {
        "TCP".to_owned()
    }
}

/// The identity of one replica of a job.
#[derive(Clone, Debug, Default, PartialEq, Eq, Deserialize, Serialize)]
pub struct JobInstance {
    pub address: String,

    #[serde(default)]
    pub az: String,

    /// `{instance-group}-{index}-{job}`
    pub id: String,

    /// Position in the flattened (ordinal, zone) enumeration of the group.
    pub index: usize,

    /// Ordinal of the replica within its availability zone.
    pub instance: usize,

    /// `{instance-group}-{job}`
    pub name: String,

    #[serde(default)]
    pub bootstrap: bool,
}

/// A resolved provider link as seen by a consumer.
#[derive(Clone, Debug, Default, PartialEq, Deserialize, Serialize)]
pub struct JobLink {
    pub instances: Vec<JobInstance>,

    /// Only the properties the provider exposes, dotted names expanded into
    /// nested mappings.
    pub properties: Properties,
}

impl Manifest {
    pub fn from_yaml(contents: &[u8]) -> Result<Self> {
        serde_yaml::from_slice(contents).context(ParseManifestSnafu)
    }

    pub fn to_yaml(&self) -> Result<String> {
        serde_yaml::to_string(self).context(SerializeManifestSnafu)
    }

    /// Calculates the lower-case hex SHA-1 digest of the serialized manifest.
    pub fn sha1(&self) -> Result<String> {
        let digest = Sha1::digest(self.to_yaml()?.as_bytes());
        Ok(format!("{digest:x}"))
    }

    pub fn instance_group(&self, name: &str) -> Option<&InstanceGroup> {
        self.instance_groups.iter().find(|ig| ig.name == name)
    }

    pub fn lookup_job_in_instance_group(&self, instance_group: &str, job: &str) -> Result<&Job> {
        self.instance_group(instance_group)
            .context(InstanceGroupNotFoundSnafu { instance_group })?
            .job(job)
            .context(JobNotFoundSnafu {
                job,
                instance_group,
            })
    }

    /// Returns the container image providing the given job of the instance
    /// group.
    ///
    /// The image has the form
    /// `{release-url}/{release-name}:{stemcell-os}-{stemcell-version}-{release-version}`,
    /// with the URL scheme and trailing slashes removed. The stemcell of the
    /// release takes precedence over the stemcell of the instance group.
    pub fn get_release_image(&self, instance_group_name: &str, job_name: &str) -> Result<String> {
        let instance_group =
            self.instance_group(instance_group_name)
                .context(InstanceGroupNotFoundSnafu {
                    instance_group: instance_group_name,
                })?;
        let job = instance_group.job(job_name).context(JobNotFoundSnafu {
            job: job_name,
            instance_group: instance_group_name,
        })?;
        let release = self
            .releases
            .iter()
            .find(|release| release.name == job.release)
            .context(ReleaseNotFoundSnafu {
                release: &job.release,
            })?;

        let stemcell_version = match &release.stemcell {
            Some(stemcell) => format!("{}-{}", stemcell.os, stemcell.version),
            None => {
                let stemcell = self
                    .stemcells
                    .iter()
                    .find(|stemcell| stemcell.alias == instance_group.stemcell)
                    .context(StemcellNotResolvedSnafu {
                        instance_group: instance_group_name,
                    })?;
                format!("{}-{}", stemcell.os, stemcell.version)
            }
        };

        Ok(format!(
            "{registry}/{name}:{stemcell_version}-{version}",
            registry = image_registry(&release.url),
            name = release.name,
            version = release.version,
        ))
    }
}

/// Strips the scheme and trailing slashes from a release URL. Values without
/// a scheme (`docker.io/org`) are kept as they are.
fn image_registry(release_url: &str) -> String {
    let registry = match Url::parse(release_url) {
        Ok(url) if url.has_host() => {
            let mut registry = url.host_str().unwrap_or_default().to_owned();
            if let Some(port) = url.port() {
                registry.push(':');
                registry.push_str(&port.to_string());
            }
            registry.push_str(url.path());
            registry
        }
        _ => release_url.to_owned(),
    };

    registry.trim_end_matches('/').to_owned()
}

#[cfg(test)]
mod tests {
    use indoc::indoc;
    use rstest::{fixture, rstest};

    use super::*;

    #[fixture]
    fn manifest() -> Manifest {
        Manifest::from_yaml(
            indoc! {r#"
                name: foo-deployment
                releases:
                - name: redis
                  url: https://example/redis/
                  version: "1.0"
                - name: cflinuxfs3
                  url: docker.io/cfcontainerization
                  version: 0.62.0
                  stemcell:
                    os: opensuse-42.3
                    version: 36.g03b4653-30.80-7.0.0_316.gcf9fe4a7
                stemcells:
                - alias: default
                  os: ubuntu
                  version: 2
                instance_groups:
                - name: redis-slave
                  instances: 2
                  azs: [z1, z2]
                  stemcell: default
                  jobs:
                  - name: redis-server
                    release: redis
                    properties:
                      health:
                        disk:
                          warning: 42
                      bosh_containerization:
                        ports:
                        - name: redis
                          internal: 6379
                - name: diego-cell
                  instances: 2
                  lifecycle: errand
                  jobs:
                  - name: cflinuxfs3-rootfs-setup
                    release: cflinuxfs3
                  - name: unreleased
                    release: missing
            "#}
            .as_bytes(),
        )
        .unwrap()
    }

    #[rstest]
    fn parses_manifest(manifest: Manifest) {
        assert_eq!(manifest.name, "foo-deployment");
        assert_eq!(manifest.releases[0].version, "1.0");
        assert_eq!(manifest.stemcells[0].version, "2");
        assert_eq!(manifest.instance_groups[0].lifecycle, Lifecycle::Service);
        assert_eq!(manifest.instance_groups[1].lifecycle, Lifecycle::Errand);

        let job = &manifest.instance_groups[0].jobs[0];
        assert_eq!(job.containerization().ports[0].protocol, "TCP");
        assert_eq!(job.property("health.disk.warning"), Some(&PropertyValue::Int(42)));
        assert_eq!(job.property("health.disk.nonexisting"), None);
        assert_eq!(job.property("bosh_containerization"), None);
    }

    #[rstest]
    #[case("redis-slave", "redis-server", "example/redis/redis:ubuntu-2-1.0")]
    #[case(
        "diego-cell",
        "cflinuxfs3-rootfs-setup",
        "docker.io/cfcontainerization/cflinuxfs3:opensuse-42.3-36.g03b4653-30.80-7.0.0_316.gcf9fe4a7-0.62.0"
    )]
    fn release_image(
        manifest: Manifest,
        #[case] instance_group: &str,
        #[case] job: &str,
        #[case] expected: &str,
    ) {
        assert_eq!(
            manifest.get_release_image(instance_group, job).unwrap(),
            expected
        );
    }

    #[rstest]
    fn release_image_errors(mut manifest: Manifest) {
        assert!(matches!(
            manifest.get_release_image("unknown", "redis-server"),
            Err(Error::InstanceGroupNotFound { .. })
        ));
        assert!(matches!(
            manifest.get_release_image("redis-slave", "unknown"),
            Err(Error::JobNotFound { .. })
        ));
        assert!(matches!(
            manifest.get_release_image("diego-cell", "unreleased"),
            Err(Error::ReleaseNotFound { release }) if release == "missing"
        ));

        manifest.stemcells.clear();
        assert!(matches!(
            manifest.get_release_image("redis-slave", "redis-server"),
            Err(Error::StemcellNotResolved { .. })
        ));
    }

    #[rstest]
    #[case(indoc! {"
        name: app
        releases:
        - name: redis
          version: 1.10
    "})]
    #[case(indoc! {"
        name: app
        stemcells:
        - alias: default
          os: ubuntu
          version: 3.20
    "})]
    fn unquoted_float_versions_are_rejected(#[case] yaml: &str) {
        let error = Manifest::from_yaml(yaml.as_bytes()).unwrap_err();
        let Error::ParseManifest { source } = &error else {
            unreachable!("expected a parse error, got {error:?}");
        };
        assert!(source.to_string().contains("quote the value"), "{source}");
    }

    #[test]
    fn quoted_versions_are_kept_verbatim() {
        let manifest = Manifest::from_yaml(
            indoc! {r#"
                name: app
                releases:
                - name: redis
                  version: "1.10"
            "#}
            .as_bytes(),
        )
        .unwrap();

        assert_eq!(manifest.releases[0].version, "1.10");
    }

    #[rstest]
    fn sha1_is_stable_and_content_addressed(manifest: Manifest) {
        let first = manifest.sha1().unwrap();
        assert_eq!(first.len(), 40);
        assert_eq!(manifest.clone().sha1().unwrap(), first);

        let mut changed = manifest;
        changed.instance_groups[0].instances = 3;
        assert_ne!(changed.sha1().unwrap(), first);
    }

    #[rstest]
    fn yaml_round_trip_keeps_properties(manifest: Manifest) {
        let reparsed = Manifest::from_yaml(manifest.to_yaml().unwrap().as_bytes()).unwrap();
        assert_eq!(reparsed, manifest);
    }
}
