use k8s_openapi::api::core::v1::{EmptyDirVolumeSource, SecretVolumeSource, Volume, VolumeMount};

/// A builder to build [`Volume`] objects. Only one volume source is kept, a
/// call like `with_secret` after `with_empty_dir` replaces the empty dir.
#[derive(Clone, Debug, Default)]
pub struct VolumeBuilder {
    name: String,
    volume_source: VolumeSource,
}

#[derive(Clone, Debug)]
pub enum VolumeSource {
    EmptyDir(EmptyDirVolumeSource),
    Secret(SecretVolumeSource),
}

impl Default for VolumeSource {
    fn default() -> Self {
        Self::EmptyDir(EmptyDirVolumeSource::default())
    }
}

impl VolumeBuilder {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Self::default()
        }
    }

    pub fn with_empty_dir(&mut self) -> &mut Self {
        self.volume_source = VolumeSource::EmptyDir(EmptyDirVolumeSource::default());
        self
    }

    pub fn with_secret(&mut self, secret_name: impl Into<String>) -> &mut Self {
        self.volume_source = VolumeSource::Secret(SecretVolumeSource {
            secret_name: Some(secret_name.into()),
            ..SecretVolumeSource::default()
        });
        self
    }

    pub fn build(&self) -> Volume {
        let name = self.name.clone();
        match &self.volume_source {
            VolumeSource::EmptyDir(empty_dir) => Volume {
                name,
                empty_dir: Some(empty_dir.clone()),
                ..Volume::default()
            },
            VolumeSource::Secret(secret) => Volume {
                name,
                secret: Some(secret.clone()),
                ..Volume::default()
            },
        }
    }
}

/// A builder to build [`VolumeMount`] objects.
#[derive(Clone, Debug, Default)]
pub struct VolumeMountBuilder {
    name: String,
    mount_path: String,
    read_only: Option<bool>,
}

impl VolumeMountBuilder {
    pub fn new(name: impl Into<String>, mount_path: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            mount_path: mount_path.into(),
            ..Self::default()
        }
    }

    pub fn read_only(&mut self, read_only: bool) -> &mut Self {
        self.read_only = Some(read_only);
        self
    }

    pub fn build(&self) -> VolumeMount {
        VolumeMount {
            name: self.name.clone(),
            mount_path: self.mount_path.clone(),
            read_only: self.read_only,
            ..VolumeMount::default()
        }
    }
}
