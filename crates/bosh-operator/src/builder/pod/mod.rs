use indexmap::IndexMap;
use k8s_openapi::{
    api::core::v1::{Container, PodSpec, PodTemplateSpec, Volume},
    apimachinery::pkg::apis::meta::v1::ObjectMeta,
};
use snafu::Snafu;
use tracing::instrument;

use crate::builder::meta::ObjectMetaBuilder;

use self::volume::VolumeBuilder;

pub mod container;
pub mod volume;

type Result<T, E = Error> = std::result::Result<T, E>;

#[derive(Debug, PartialEq, Eq, Snafu)]
pub enum Error {
    #[snafu(display(
        "colliding volume name {colliding_volume_name:?} in volumes with different content"
    ))]
    VolumeNameCollision { colliding_volume_name: String },
}

/// A builder to build [`PodTemplateSpec`] objects.
///
/// Volumes are kept in an [`IndexMap`] so they keep the order they were
/// added in and a volume name is only ever used once.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct PodBuilder {
    containers: Vec<Container>,
    init_containers: Option<Vec<Container>>,
    metadata: Option<ObjectMeta>,
    restart_policy: Option<String>,
    volumes: IndexMap<String, Volume>,
}

impl PodBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn metadata_builder<F>(&mut self, f: F) -> &mut Self
    where
        F: Fn(&mut ObjectMetaBuilder) -> &mut ObjectMetaBuilder,
    {
        let mut builder = ObjectMetaBuilder::new();
        let builder = f(&mut builder);
        self.metadata = Some(builder.build());
        self
    }

    pub fn add_container(&mut self, container: Container) -> &mut Self {
        self.containers.push(container);
        self
    }

    pub fn add_containers(&mut self, containers: impl IntoIterator<Item = Container>) -> &mut Self {
        self.containers.extend(containers);
        self
    }

    pub fn add_init_container(&mut self, container: Container) -> &mut Self {
        self.init_containers
            .get_or_insert_with(Vec::new)
            .push(container);
        self
    }

    pub fn add_init_containers(
        &mut self,
        containers: impl IntoIterator<Item = Container>,
    ) -> &mut Self {
        self.init_containers
            .get_or_insert_with(Vec::new)
            .extend(containers);
        self
    }

    /// Adds an emptyDir volume with the given name.
    pub fn add_empty_dir_volume(&mut self, name: impl Into<String>) -> Result<&mut Self> {
        self.add_volume(VolumeBuilder::new(name).with_empty_dir().build())
    }

    /// Adds a volume named `name` backed by the secret `secret_name`.
    pub fn add_secret_volume(
        &mut self,
        name: impl Into<String>,
        secret_name: impl Into<String>,
    ) -> Result<&mut Self> {
        self.add_volume(VolumeBuilder::new(name).with_secret(secret_name).build())
    }

    /// Adds a new [`Volume`] while ensuring that no colliding [`Volume`]
    /// exists. Adding an identical volume twice is a no-op.
    #[instrument(skip(self))]
    pub fn add_volume(&mut self, volume: Volume) -> Result<&mut Self> {
        if let Some(existing_volume) = self.volumes.get(&volume.name) {
            if existing_volume != &volume {
                let colliding_volume_name = &volume.name;
                // The details only go to the trace, not into the error message
                tracing::error!(
                    colliding_volume_name,
                    ?existing_volume,
                    "colliding volume name in volumes with different content"
                );

                VolumeNameCollisionSnafu {
                    colliding_volume_name,
                }
                .fail()?;
            }
        } else {
            self.volumes.insert(volume.name.clone(), volume);
        }

        Ok(self)
    }

    pub fn restart_policy(&mut self, restart_policy: &str) -> &mut Self {
        self.restart_policy = Some(restart_policy.to_owned());
        self
    }

    /// Returns a [`PodTemplateSpec`], usable for building a
    /// [`StatefulSet`](k8s_openapi::api::apps::v1::StatefulSet) or a job.
    pub fn build_template(&self) -> PodTemplateSpec {
        PodTemplateSpec {
            metadata: self.metadata.clone(),
            spec: Some(self.build_spec()),
        }
    }

    fn build_spec(&self) -> PodSpec {
        let volumes = if self.volumes.is_empty() {
            None
        } else {
            Some(self.volumes.values().cloned().collect())
        };

        PodSpec {
            containers: self.containers.clone(),
            init_containers: self.init_containers.clone(),
            restart_policy: self.restart_policy.clone(),
            volumes,
            ..PodSpec::default()
        }
    }
}
