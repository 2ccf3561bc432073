//! Converts a BOSH deployment manifest into the Kubernetes objects running
//! it.
//!
//! Every instance group becomes an [`ExtendedStatefulSet`] (or an
//! [`ExtendedJob`] for errands) whose pods first copy the job specs out of the
//! release images, then render the job templates from the resolved properties
//! and finally run one container per job. Two bootstrap jobs produce the
//! inputs of that rendering: the variable interpolation job and the data
//! gathering job.

use std::collections::{BTreeMap, HashSet};

use const_format::concatcp;
use k8s_openapi::{
    api::{
        apps::v1::{StatefulSet, StatefulSetSpec},
        core::v1::{Container, EnvVar, PodSpec, Service},
    },
    apimachinery::pkg::apis::meta::v1::{LabelSelector, ObjectMeta},
};
use serde::Serialize;
use snafu::{OptionExt, ResultExt, Snafu, ensure};
use tracing::{debug, info, instrument};

use crate::{
    builder::{
        meta::ObjectMetaBuilder,
        pod::{
            self, PodBuilder,
            container::{ContainerBuilder, FieldPathEnvVar},
            volume::VolumeMountBuilder,
        },
    },
    config::OperatorImage,
    crd::{
        ExtendedJob, ExtendedJobSpec, ExtendedSecret, ExtendedStatefulSet,
        ExtendedStatefulSetSpec, TriggerStrategy,
    },
    labels,
    manifest::{self, InstanceGroup, Lifecycle, Manifest},
    names::{self, DeploymentSecretType},
};

mod bootstrap;
mod services;
mod variables;

type Result<T, E = Error> = std::result::Result<T, E>;

/// Name of the binary the bootstrap and renderer containers run.
pub const OPERATOR_BINARY: &str = "bosh-operator";

/// Name of the variable interpolation container, and therefore of its output
/// secret.
pub const VAR_INTERPOLATION_CONTAINER_NAME: &str = "interpolation";

/// Key of the manifest inside the manifest secrets.
pub const DESIRED_MANIFEST_KEY: &str = "manifest.yaml";

/// Key of the resolved manifest inside the data gathering output secrets.
pub const RESOLVED_PROPERTIES_KEY: &str = "properties.yaml";

const RENDERING_DATA_VOLUME: &str = "rendering-data";
const JOBS_DIR_VOLUME: &str = "jobs-dir";

const ALL_RELEASES_DIR: &str = "/var/vcap/all-releases";
const JOBS_DIR: &str = "/var/vcap/jobs";
const RESOLVED_PROPERTIES_DIR: &str = "/var/run/secrets/resolved-properties";

const TEMPLATE_RENDER_COMMAND: &str = concatcp!(OPERATOR_BINARY, " util template-render");

#[derive(Debug, Snafu)]
pub enum Error {
    #[snafu(display("instance group {instance_group:?} has no jobs defined"))]
    NoJobs { instance_group: String },

    #[snafu(display(
        "failed to calculate the release image of job {job:?} in instance group {instance_group:?}"
    ))]
    ReleaseImage {
        source: manifest::Error,
        instance_group: String,
        job: String,
    },

    #[snafu(display("failed to build the pod template of {name:?}"))]
    BuildPod { source: pod::Error, name: String },

    #[snafu(display("failed to calculate the SHA-1 of the manifest"))]
    ManifestSha1 { source: manifest::Error },

    #[snafu(display("object {name:?} has no instance group label"))]
    MissingInstanceGroupLabel { name: String },

    #[snafu(display("object {name:?} has no pod spec"))]
    MissingPodSpec { name: String },

    #[snafu(display("couldn't find instance group {instance_group:?} in the resolved manifests"))]
    ResolvedManifestNotFound { instance_group: String },

    #[snafu(display("failed to find job {job:?} in the resolved manifest"))]
    LookupJob { source: manifest::Error, job: String },

    #[snafu(display(
        "containerization data of job {job:?} in instance group {instance_group:?} has no instances"
    ))]
    NoInstances { job: String, instance_group: String },

    #[snafu(display(
        "bpm info of job {job:?} in instance group {instance_group:?} has no processes"
    ))]
    NoBpmProcesses { job: String, instance_group: String },
}

/// The Kubernetes objects of one deployment.
#[derive(Clone, Debug, Default, PartialEq, Serialize)]
pub struct KubeConfig {
    pub namespace: String,
    pub variables: Vec<ExtendedSecret>,
    pub instance_groups: Vec<ExtendedStatefulSet>,
    pub errands: Vec<ExtendedJob>,
    pub services: Vec<Service>,
    pub variable_interpolation_job: ExtendedJob,
    pub data_gathering_job: ExtendedJob,
}

impl KubeConfig {
    /// Serializes all objects into one multi-document YAML stream, in the
    /// order they would be applied.
    pub fn to_yaml(&self) -> Result<String, serde_yaml::Error> {
        let mut documents = Vec::new();
        for variable in &self.variables {
            documents.push(serde_yaml::to_string(variable)?);
        }
        documents.push(serde_yaml::to_string(&self.variable_interpolation_job)?);
        documents.push(serde_yaml::to_string(&self.data_gathering_job)?);
        for service in &self.services {
            documents.push(serde_yaml::to_string(service)?);
        }
        for instance_group in &self.instance_groups {
            documents.push(serde_yaml::to_string(instance_group)?);
        }
        for errand in &self.errands {
            documents.push(serde_yaml::to_string(errand)?);
        }

        Ok(documents
            .iter()
            .map(|document| format!("---\n{document}"))
            .collect())
    }

    /// Rewrites the runtime containers of every instance group with the BPM
    /// information found in the resolved manifests, keyed by instance group
    /// name.
    ///
    /// The command, arguments, environment and working directory of each
    /// container are taken from the first BPM process of its job.
    #[instrument(skip_all, fields(namespace = %self.namespace))]
    pub fn apply_bpm_info(&mut self, manifests: &BTreeMap<String, Manifest>) -> Result<()> {
        for stateful_set in &mut self.instance_groups {
            let instance_group = instance_group_label(&stateful_set.metadata)?;
            let name = stateful_set.metadata.name.clone().unwrap_or_default();
            let pod_spec = stateful_set
                .spec
                .template
                .spec
                .as_mut()
                .and_then(|spec| spec.template.spec.as_mut())
                .context(MissingPodSpecSnafu { name })?;
            apply_bpm_to_pod(pod_spec, &instance_group, manifests)?;
        }

        for errand in &mut self.errands {
            let instance_group = instance_group_label(&errand.metadata)?;
            let name = errand.metadata.name.clone().unwrap_or_default();
            let pod_spec = errand
                .spec
                .template
                .spec
                .as_mut()
                .context(MissingPodSpecSnafu { name })?;
            apply_bpm_to_pod(pod_spec, &instance_group, manifests)?;
        }

        Ok(())
    }
}

/// Converts one manifest. The operator image is used for every container
/// running a `util` command of this operator.
pub struct KubeConverter<'a> {
    manifest: &'a Manifest,
    operator_image: &'a OperatorImage,
}

impl<'a> KubeConverter<'a> {
    pub fn new(manifest: &'a Manifest, operator_image: &'a OperatorImage) -> Self {
        Self {
            manifest,
            operator_image,
        }
    }

    #[instrument(skip(self), fields(deployment = %self.manifest.name))]
    pub fn convert_to_kube(&self, namespace: &str) -> Result<KubeConfig> {
        let mut kube_config = KubeConfig {
            namespace: namespace.to_owned(),
            variables: variables::extended_secrets(self.manifest, namespace),
            variable_interpolation_job: self.variable_interpolation_job(namespace)?,
            data_gathering_job: self.data_gathering_job(namespace)?,
            ..KubeConfig::default()
        };

        for instance_group in &self.manifest.instance_groups {
            match instance_group.lifecycle {
                Lifecycle::Service => {
                    let services =
                        services::instance_group_services(&self.manifest.name, namespace, instance_group);
                    let headless_service = services
                        .headless
                        .as_ref()
                        .and_then(|service| service.metadata.name.clone());

                    kube_config.instance_groups.push(self.extended_statefulset(
                        namespace,
                        instance_group,
                        headless_service,
                    )?);
                    kube_config.services.extend(services.instances);
                    kube_config.services.extend(services.headless);
                }
                Lifecycle::Errand => {
                    kube_config
                        .errands
                        .push(self.errand_job(namespace, instance_group)?);
                }
            }
        }

        info!(
            variables = kube_config.variables.len(),
            instance_groups = kube_config.instance_groups.len(),
            errands = kube_config.errands.len(),
            services = kube_config.services.len(),
            "converted manifest"
        );
        Ok(kube_config)
    }

    fn extended_statefulset(
        &self,
        namespace: &str,
        instance_group: &InstanceGroup,
        headless_service: Option<String>,
    ) -> Result<ExtendedStatefulSet> {
        let name = self.object_name(instance_group);
        let pod_labels = self.pod_labels(instance_group);
        let pod_template = self
            .instance_group_pod(instance_group)?
            .metadata_builder(|meta| meta.name(&instance_group.name).with_labels(pod_labels.clone()))
            .build_template();

        let stateful_set = StatefulSet {
            metadata: ObjectMetaBuilder::new()
                .name(&instance_group.name)
                .with_labels(pod_labels.clone())
                .build(),
            spec: Some(StatefulSetSpec {
                replicas: Some(instance_group.instances as i32),
                selector: LabelSelector {
                    match_labels: Some(pod_labels),
                    ..LabelSelector::default()
                },
                service_name: headless_service,
                template: pod_template,
                ..StatefulSetSpec::default()
            }),
            ..StatefulSet::default()
        };

        debug!(%name, replicas = instance_group.instances, "built extended stateful set");
        Ok(ExtendedStatefulSet {
            metadata: object_meta(namespace, &name, instance_group),
            spec: ExtendedStatefulSetSpec {
                update_on_config_change: true,
                zones: instance_group.azs.clone(),
                template: stateful_set,
            },
        })
    }

    fn errand_job(&self, namespace: &str, instance_group: &InstanceGroup) -> Result<ExtendedJob> {
        let name = self.object_name(instance_group);
        let mut pod_labels = self.pod_labels(instance_group);
        pod_labels.insert(labels::DELETE_KEY.to_owned(), labels::DELETE_POD_VALUE.to_owned());

        let template = self
            .instance_group_pod(instance_group)?
            .metadata_builder(|meta| meta.name(&instance_group.name).with_labels(pod_labels.clone()))
            .restart_policy("OnFailure")
            .build_template();

        debug!(%name, "built errand");
        Ok(ExtendedJob {
            metadata: object_meta(namespace, &name, instance_group),
            spec: ExtendedJobSpec {
                trigger: TriggerStrategy::Manual.into(),
                output: None,
                update_on_config_change: true,
                template,
            },
        })
    }

    /// The pod shared by stateful sets and errands: spec copiers and the
    /// template renderer as init containers, one container per job.
    fn instance_group_pod(&self, instance_group: &InstanceGroup) -> Result<PodBuilder> {
        ensure!(
            !instance_group.jobs.is_empty(),
            NoJobsSnafu {
                instance_group: &instance_group.name
            }
        );

        let deployment = &self.manifest.name;
        let (_, interpolated_manifest_secret) = names::output_secret_prefix_and_name(
            DeploymentSecretType::ManifestWithVars,
            deployment,
            VAR_INTERPOLATION_CONTAINER_NAME,
            true,
        );
        let (_, resolved_properties_secret) = names::output_secret_prefix_and_name(
            DeploymentSecretType::InstanceGroupResolvedProperties,
            deployment,
            &instance_group.name,
            true,
        );

        let mut pod_builder = PodBuilder::new();
        pod_builder
            .add_init_containers(self.spec_copier_containers(
                std::slice::from_ref(instance_group),
                RENDERING_DATA_VOLUME,
            )?)
            .add_init_container(
                self.renderer_container(instance_group, &resolved_properties_secret),
            );

        for job in &instance_group.jobs {
            let image = self.release_image(instance_group, &job.name)?;
            pod_builder.add_container(
                ContainerBuilder::new(&job.name)
                    .image(image)
                    .add_volume_mount(RENDERING_DATA_VOLUME, ALL_RELEASES_DIR)
                    .add_volume_mount(JOBS_DIR_VOLUME, JOBS_DIR)
                    .build(),
            );
        }

        let pod_name = &instance_group.name;
        pod_builder
            .add_empty_dir_volume(RENDERING_DATA_VOLUME)
            .and_then(|builder| builder.add_empty_dir_volume(JOBS_DIR_VOLUME))
            .and_then(|builder| {
                builder.add_secret_volume(
                    names::volume_name(&interpolated_manifest_secret),
                    &interpolated_manifest_secret,
                )
            })
            .and_then(|builder| {
                builder.add_secret_volume(
                    names::volume_name(&resolved_properties_secret),
                    &resolved_properties_secret,
                )
            })
            .context(BuildPodSnafu { name: pod_name })?;

        Ok(pod_builder)
    }

    /// Renders the job templates of the pod's instance into the jobs
    /// directory. The instance is identified by the zone and ordinal
    /// labels of the pod.
    fn renderer_container(
        &self,
        instance_group: &InstanceGroup,
        resolved_properties_secret: &str,
    ) -> Container {
        let resolved_properties_dir = format!("{RESOLVED_PROPERTIES_DIR}/{}", instance_group.name);

        ContainerBuilder::new(format!("renderer-{}", instance_group.name))
            .image(self.operator_image.to_string())
            .shell_command(TEMPLATE_RENDER_COMMAND)
            .add_volume_mount(RENDERING_DATA_VOLUME, ALL_RELEASES_DIR)
            .add_volume_mount(JOBS_DIR_VOLUME, JOBS_DIR)
            .add_volume_mounts([VolumeMountBuilder::new(
                names::volume_name(resolved_properties_secret),
                &resolved_properties_dir,
            )
            .read_only(true)
            .build()])
            .add_env_var("INSTANCE_GROUP_NAME", &instance_group.name)
            .add_env_var(
                "BOSH_MANIFEST_PATH",
                format!("{resolved_properties_dir}/{RESOLVED_PROPERTIES_KEY}"),
            )
            .add_env_var("JOBS_DIR", ALL_RELEASES_DIR)
            .add_env_var("OUTPUT_DIR", JOBS_DIR)
            .add_env_var_from_field_path(
                "AZ_INDEX",
                &FieldPathEnvVar::Label(labels::AZ_INDEX_KEY.to_owned()),
            )
            .add_env_var_from_field_path(
                "POD_ORDINAL",
                &FieldPathEnvVar::Label(labels::POD_ORDINAL_KEY.to_owned()),
            )
            .build()
    }

    /// One container per distinct release of the given instance groups, in
    /// order of first use, copying the job specs of the release image into
    /// `volume`.
    fn spec_copier_containers(
        &self,
        instance_groups: &[InstanceGroup],
        volume: &str,
    ) -> Result<Vec<Container>> {
        let mut copied_releases = HashSet::new();
        let mut containers = Vec::new();

        for instance_group in instance_groups {
            for job in &instance_group.jobs {
                if !copied_releases.insert(job.release.as_str()) {
                    continue;
                }

                let image = self.release_image(instance_group, &job.name)?;
                containers.push(spec_copier_container(&job.release, image, volume));
            }
        }

        Ok(containers)
    }

    fn release_image(&self, instance_group: &InstanceGroup, job: &str) -> Result<String> {
        self.manifest
            .get_release_image(&instance_group.name, job)
            .context(ReleaseImageSnafu {
                instance_group: &instance_group.name,
                job,
            })
    }

    fn object_name(&self, instance_group: &InstanceGroup) -> String {
        format!("{}-{}", self.manifest.name, instance_group.name)
    }

    fn pod_labels(&self, instance_group: &InstanceGroup) -> BTreeMap<String, String> {
        BTreeMap::from([
            (
                labels::DEPLOYMENT_NAME_KEY.to_owned(),
                self.manifest.name.clone(),
            ),
            (
                labels::INSTANCE_GROUP_NAME_KEY.to_owned(),
                instance_group.name.clone(),
            ),
        ])
    }
}

fn object_meta(namespace: &str, name: &str, instance_group: &InstanceGroup) -> ObjectMeta {
    ObjectMetaBuilder::new()
        .name(name)
        .namespace(namespace)
        .with_label(labels::INSTANCE_GROUP_NAME_KEY, &instance_group.name)
        .build()
}

fn spec_copier_container(release: &str, image: String, volume: &str) -> Container {
    let destination = format!("{ALL_RELEASES_DIR}/jobs-src/{release}");

    ContainerBuilder::new(format!("spec-copier-{release}"))
        .image(image)
        .command(vec!["bash".to_owned(), "-c".to_owned()])
        .args(vec![format!(
            r#"mkdir -p "{destination}" && cp -ar /var/vcap/jobs-src/* "{destination}""#
        )])
        .add_volume_mount(volume, ALL_RELEASES_DIR)
        .build()
}

fn instance_group_label(metadata: &ObjectMeta) -> Result<String> {
    metadata
        .labels
        .as_ref()
        .and_then(|labels| labels.get(labels::INSTANCE_GROUP_NAME_KEY))
        .cloned()
        .context(MissingInstanceGroupLabelSnafu {
            name: metadata.name.clone().unwrap_or_default(),
        })
}

fn apply_bpm_to_pod(
    pod_spec: &mut PodSpec,
    instance_group: &str,
    manifests: &BTreeMap<String, Manifest>,
) -> Result<()> {
    let manifest = manifests
        .get(instance_group)
        .context(ResolvedManifestNotFoundSnafu { instance_group })?;

    for container in &mut pod_spec.containers {
        let job = manifest
            .lookup_job_in_instance_group(instance_group, &container.name)
            .context(LookupJobSnafu {
                job: &container.name,
            })?;
        let containerization = job.containerization();

        ensure!(
            !containerization.instances.is_empty(),
            NoInstancesSnafu {
                job: &job.name,
                instance_group,
            }
        );
        let process = containerization
            .bpm
            .processes
            .first()
            .context(NoBpmProcessesSnafu {
                job: &job.name,
                instance_group,
            })?;

        container.command = Some(vec![process.executable.clone()]);
        container.args = Some(process.args.clone());
        let env = container.env.get_or_insert_with(Vec::new);
        for (name, value) in &process.env {
            let var = EnvVar {
                name: name.clone(),
                value: Some(value.clone()),
                ..EnvVar::default()
            };
            match env.iter_mut().find(|existing| existing.name == *name) {
                Some(existing) => *existing = var,
                None => env.push(var),
            }
        }
        if !process.workdir.is_empty() {
            container.working_dir = Some(process.workdir.clone());
        }

        debug!(job = %job.name, process = %process.name, "applied bpm info");
    }

    Ok(())
}
