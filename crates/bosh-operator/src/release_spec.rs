//! Job specifications (`job.MF`) of the releases referenced by a manifest.
//!
//! Release sources are laid out on disk as
//! `{base_dir}/jobs-src/{release}/{job}/job.MF` with the ERB templates of a
//! job below `{base_dir}/jobs-src/{release}/{job}/templates/`.

use std::{
    fs,
    path::{Path, PathBuf},
};

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use snafu::{ResultExt, Snafu};
use tracing::debug;

use crate::manifest::{Job, PropertyValue};

/// Directory below the base directory holding the release sources.
pub const JOBS_SOURCE_DIR: &str = "jobs-src";

/// Release name -> job name -> specification.
pub type ReleaseSpecs = IndexMap<String, IndexMap<String, ReleaseSpec>>;

#[derive(Debug, Snafu)]
pub enum Error {
    #[snafu(display("failed to read job spec {path:?}"))]
    ReadSpec {
        source: std::io::Error,
        path: PathBuf,
    },

    #[snafu(display("failed to parse job spec {path:?}"))]
    ParseSpec {
        source: serde_yaml::Error,
        path: PathBuf,
    },
}

#[derive(Clone, Debug, Default, PartialEq, Deserialize, Serialize)]
pub struct ReleaseSpec {
    pub name: String,

    /// Template source file -> rendered destination, in declaration order.
    #[serde(default)]
    pub templates: IndexMap<String, String>,

    #[serde(default)]
    pub packages: Vec<String>,

    #[serde(default)]
    pub properties: IndexMap<String, PropertyDefinition>,

    #[serde(default)]
    pub provides: Vec<ProvidedLink>,

    #[serde(default)]
    pub consumes: Vec<ConsumedLink>,
}

#[derive(Clone, Debug, Default, PartialEq, Deserialize, Serialize)]
pub struct PropertyDefinition {
    #[serde(default)]
    pub description: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default: Option<PropertyValue>,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Deserialize, Serialize)]
pub struct ProvidedLink {
    pub name: String,

    #[serde(rename = "type")]
    pub type_: String,

    /// Dotted names of the properties exposed through the link.
    #[serde(default)]
    pub properties: Vec<String>,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Deserialize, Serialize)]
pub struct ConsumedLink {
    pub name: String,

    #[serde(rename = "type")]
    pub type_: String,

    #[serde(default)]
    pub optional: bool,
}

impl ReleaseSpec {
    pub fn job_dir(base_dir: &Path, release: &str, job: &str) -> PathBuf {
        base_dir.join(JOBS_SOURCE_DIR).join(release).join(job)
    }

    pub fn load(base_dir: &Path, release: &str, job: &str) -> Result<Self, Error> {
        let path = Self::job_dir(base_dir, release, job).join("job.MF");
        debug!(path = %path.display(), "loading job spec");

        let contents = fs::read(&path).context(ReadSpecSnafu { path: &path })?;
        serde_yaml::from_slice(&contents).context(ParseSpecSnafu { path })
    }

    pub fn default_value(&self, name: &str) -> Option<&PropertyValue> {
        self.properties.get(name)?.default.as_ref()
    }

    /// Resolves a property for `job`: the manifest value wins, the spec
    /// default is the fallback.
    pub fn resolve_property<'a>(&'a self, job: &'a Job, name: &str) -> Option<&'a PropertyValue> {
        job.property(name).or_else(|| self.default_value(name))
    }
}

#[cfg(test)]
mod tests {
    use indoc::indoc;

    use super::*;

    fn spec() -> ReleaseSpec {
        serde_yaml::from_str(indoc! {"
            name: redis-server
            templates:
              bpm.yml.erb: config/bpm.yml
              redis.conf.erb: config/redis.conf
            provides:
            - name: redis
              type: redis
              properties: [port, password]
            consumes:
            - name: redis
              type: redis
              optional: true
            properties:
              port:
                description: Port to listen on
                default: 6379
              password:
                description: Password
        "})
        .unwrap()
    }

    #[test]
    fn templates_keep_declaration_order() {
        let spec = spec();
        assert_eq!(
            spec.templates.values().collect::<Vec<_>>(),
            ["config/bpm.yml", "config/redis.conf"]
        );
        assert!(spec.consumes[0].optional);
        assert_eq!(spec.provides[0].properties, ["port", "password"]);
    }

    #[test]
    fn manifest_value_overrides_default() {
        let spec = spec();
        let mut job = Job::default();

        assert_eq!(
            spec.resolve_property(&job, "port"),
            Some(&PropertyValue::Int(6379))
        );
        assert_eq!(spec.resolve_property(&job, "password"), None);

        job.properties
            .properties
            .insert("port".to_owned(), PropertyValue::Int(7000));
        assert_eq!(
            spec.resolve_property(&job, "port"),
            Some(&PropertyValue::Int(7000))
        );
    }

    #[test]
    fn missing_spec_is_a_read_error() {
        let dir = tempfile::tempdir().unwrap();
        let result = ReleaseSpec::load(dir.path(), "redis", "redis-server");

        assert!(matches!(result, Err(Error::ReadSpec { path, .. }) if path.ends_with("jobs-src/redis/redis-server/job.MF")));
    }

    #[test]
    fn malformed_spec_is_a_parse_error() {
        let dir = tempfile::tempdir().unwrap();
        let job_dir = ReleaseSpec::job_dir(dir.path(), "redis", "redis-server");
        fs::create_dir_all(&job_dir).unwrap();
        fs::write(job_dir.join("job.MF"), "templates: [unterminated").unwrap();

        let result = ReleaseSpec::load(dir.path(), "redis", "redis-server");
        assert!(matches!(result, Err(Error::ParseSpec { .. })));
    }
}
