use std::fmt;

use k8s_openapi::api::core::v1::{Container, EnvVar, EnvVarSource, ObjectFieldSelector, VolumeMount};

/// A builder to build [`Container`] objects.
#[derive(Clone, Debug, Default)]
pub struct ContainerBuilder {
    name: String,
    image: Option<String>,
    command: Option<Vec<String>>,
    args: Option<Vec<String>>,
    env: Option<Vec<EnvVar>>,
    volume_mounts: Option<Vec<VolumeMount>>,
}

impl ContainerBuilder {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Self::default()
        }
    }

    pub fn image(&mut self, image: impl Into<String>) -> &mut Self {
        self.image = Some(image.into());
        self
    }

    pub fn command(&mut self, command: Vec<String>) -> &mut Self {
        self.command = Some(command);
        self
    }

    pub fn args(&mut self, args: Vec<String>) -> &mut Self {
        self.args = Some(args);
        self
    }

    /// Runs `script` with `/bin/sh -c`.
    pub fn shell_command(&mut self, script: impl Into<String>) -> &mut Self {
        self.command(vec!["/bin/sh".to_owned()])
            .args(vec!["-c".to_owned(), script.into()])
    }

    pub fn add_env_var(&mut self, name: impl Into<String>, value: impl Into<String>) -> &mut Self {
        self.env.get_or_insert_with(Vec::new).push(EnvVar {
            name: name.into(),
            value: Some(value.into()),
            ..EnvVar::default()
        });
        self
    }

    /// Used for pushing down attributes of the pod, like its labels, into the
    /// container.
    pub fn add_env_var_from_field_path(
        &mut self,
        name: impl Into<String>,
        field_path: &FieldPathEnvVar,
    ) -> &mut Self {
        self.env.get_or_insert_with(Vec::new).push(EnvVar {
            name: name.into(),
            value_from: Some(EnvVarSource {
                field_ref: Some(ObjectFieldSelector {
                    field_path: field_path.to_string(),
                    ..ObjectFieldSelector::default()
                }),
                ..EnvVarSource::default()
            }),
            ..EnvVar::default()
        });
        self
    }

    pub fn add_volume_mount(
        &mut self,
        name: impl Into<String>,
        path: impl Into<String>,
    ) -> &mut Self {
        self.volume_mounts
            .get_or_insert_with(Vec::new)
            .push(VolumeMount {
                name: name.into(),
                mount_path: path.into(),
                ..VolumeMount::default()
            });
        self
    }

    pub fn add_volume_mounts(
        &mut self,
        volume_mounts: impl IntoIterator<Item = VolumeMount>,
    ) -> &mut Self {
        self.volume_mounts
            .get_or_insert_with(Vec::new)
            .extend(volume_mounts);
        self
    }

    pub fn build(&self) -> Container {
        Container {
            name: self.name.clone(),
            image: self.image.clone(),
            command: self.command.clone(),
            args: self.args.clone(),
            env: self.env.clone(),
            volume_mounts: self.volume_mounts.clone(),
            ..Container::default()
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum FieldPathEnvVar {
    /// A label of the pod, filled in by the downward API.
    Label(String),
}

impl fmt::Display for FieldPathEnvVar {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Label(key) => write!(f, "metadata.labels['{key}']"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::builder::pod::volume::VolumeMountBuilder;

    #[test]
    fn container_builder() {
        let container = ContainerBuilder::new("renderer-log-api")
            .image("cfcontainerization/bosh-operator:latest")
            .shell_command("bosh-operator util template-render")
            .add_env_var("INSTANCE_GROUP_NAME", "log-api")
            .add_env_var_from_field_path(
                "AZ_INDEX",
                &FieldPathEnvVar::Label("fissile.cloudfoundry.org/az-index".to_owned()),
            )
            .add_volume_mount("rendering-data", "/var/vcap/all-releases")
            .add_volume_mounts([VolumeMountBuilder::new("secret", "/var/run/secrets")
                .read_only(true)
                .build()])
            .build();

        assert_eq!(container.name, "renderer-log-api");
        assert_eq!(
            container.command,
            Some(vec!["/bin/sh".to_owned()])
        );
        assert_eq!(
            container.args,
            Some(vec![
                "-c".to_owned(),
                "bosh-operator util template-render".to_owned()
            ])
        );

        let env = container.env.expect("env must be set");
        assert_eq!(env.len(), 2);
        assert_eq!(env[0].value.as_deref(), Some("log-api"));
        assert_eq!(
            env[1]
                .value_from
                .as_ref()
                .and_then(|source| source.field_ref.as_ref())
                .map(|field| field.field_path.as_str()),
            Some("metadata.labels['fissile.cloudfoundry.org/az-index']")
        );

        let mounts = container.volume_mounts.expect("mounts must be set");
        assert_eq!(mounts.len(), 2);
        assert_eq!(mounts[1].read_only, Some(true));
    }
}
