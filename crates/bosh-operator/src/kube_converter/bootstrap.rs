//! The jobs preparing the inputs of the instance group pods.

use std::collections::BTreeMap;

use const_format::concatcp;
use snafu::ResultExt;

use super::{
    ALL_RELEASES_DIR, BuildPodSnafu, DESIRED_MANIFEST_KEY, KubeConverter, ManifestSha1Snafu,
    OPERATOR_BINARY, Result, VAR_INTERPOLATION_CONTAINER_NAME,
};
use crate::{
    builder::{
        meta::ObjectMetaBuilder,
        pod::{PodBuilder, container::ContainerBuilder, volume::VolumeMountBuilder},
    },
    crd::{ExtendedJob, ExtendedJobSpec, Output, TriggerStrategy},
    labels,
    names::{self, DeploymentSecretType},
};

const DEPLOYMENT_DIR: &str = "/var/run/secrets/deployment/";
const VARIABLES_DIR: &str = "/var/run/secrets/variables/";
const DATA_GATHERING_VOLUME: &str = "data-gathering";
const NO_VARIABLES_VOLUME: &str = "no-vars";

pub(super) const VARIABLE_INTERPOLATION_COMMAND: &str =
    concatcp!(OPERATOR_BINARY, " util variable-interpolation");
pub(super) const DATA_GATHER_COMMAND: &str = concatcp!(
    OPERATOR_BINARY,
    r#" util data-gather --cf-operator-namespace "$KUBERNETES_NAMESPACE""#
);

impl KubeConverter<'_> {
    /// Interpolates the variables into the manifest with ops files applied.
    /// The result is written to a versioned `with-vars` secret.
    pub(super) fn variable_interpolation_job(&self, namespace: &str) -> Result<ExtendedJob> {
        let deployment = &self.manifest.name;
        let name = format!("var-interpolation-{deployment}");
        let manifest_secret = names::secret_name(DeploymentSecretType::ManifestWithOps, deployment, "");

        let mut container = ContainerBuilder::new(VAR_INTERPOLATION_CONTAINER_NAME);
        container
            .image(self.operator_image.to_string())
            .shell_command(VARIABLE_INTERPOLATION_COMMAND)
            .add_env_var(
                "BOSH_MANIFEST_PATH",
                format!("{DEPLOYMENT_DIR}{DESIRED_MANIFEST_KEY}"),
            )
            .add_env_var("VARIABLES_DIR", VARIABLES_DIR)
            .add_volume_mounts([VolumeMountBuilder::new(
                names::volume_name(&manifest_secret),
                DEPLOYMENT_DIR,
            )
            .read_only(true)
            .build()]);

        let mut pod_builder = PodBuilder::new();
        pod_builder
            .add_secret_volume(names::volume_name(&manifest_secret), &manifest_secret)
            .context(BuildPodSnafu { name: &name })?;

        for variable in &self.manifest.variables {
            let secret_name =
                names::secret_name(DeploymentSecretType::GeneratedVariable, deployment, &variable.name);
            let volume_name = names::volume_name(&secret_name);

            container.add_volume_mounts([VolumeMountBuilder::new(
                &volume_name,
                format!("{VARIABLES_DIR}{}", variable.name),
            )
            .read_only(true)
            .build()]);
            pod_builder
                .add_secret_volume(volume_name, secret_name)
                .context(BuildPodSnafu { name: &name })?;
        }

        if self.manifest.variables.is_empty() {
            container.add_volume_mounts([VolumeMountBuilder::new(
                NO_VARIABLES_VOLUME,
                VARIABLES_DIR,
            )
            .read_only(true)
            .build()]);
            pod_builder
                .add_empty_dir_volume(NO_VARIABLES_VOLUME)
                .context(BuildPodSnafu { name: &name })?;
        }

        let template = pod_builder
            .metadata_builder(|meta| meta.name(&name).with_label(labels::DELETE_KEY, labels::DELETE_POD_VALUE))
            .add_container(container.build())
            .restart_policy("OnFailure")
            .build_template();

        let (name_prefix, _) = names::output_secret_prefix_and_name(
            DeploymentSecretType::ManifestWithVars,
            deployment,
            VAR_INTERPOLATION_CONTAINER_NAME,
            false,
        );
        let secret_labels = BTreeMap::from([
            (labels::DEPLOYMENT_NAME_KEY.to_owned(), deployment.clone()),
            (
                labels::MANIFEST_SHA1_KEY.to_owned(),
                self.manifest.sha1().context(ManifestSha1Snafu)?,
            ),
            (
                labels::REFERENCED_JOB_NAME_KEY.to_owned(),
                format!("data-gathering-{deployment}"),
            ),
        ]);

        Ok(ExtendedJob {
            metadata: ObjectMetaBuilder::new()
                .name(&name)
                .namespace(namespace)
                .with_label(labels::DEPLOYMENT_NAME_KEY, deployment)
                .build(),
            spec: ExtendedJobSpec {
                trigger: TriggerStrategy::Once.into(),
                output: Some(Output {
                    name_prefix,
                    secret_labels,
                    versioned: true,
                }),
                update_on_config_change: true,
                template,
            },
        })
    }

    /// Resolves links and renders the BPM information of every instance
    /// group, one container and therefore one output secret per group.
    pub(super) fn data_gathering_job(&self, namespace: &str) -> Result<ExtendedJob> {
        let deployment = &self.manifest.name;
        let name = format!("data-gathering-{deployment}");
        let (_, interpolated_manifest_secret) = names::output_secret_prefix_and_name(
            DeploymentSecretType::ManifestWithVars,
            deployment,
            VAR_INTERPOLATION_CONTAINER_NAME,
            true,
        );
        let interpolated_manifest_volume = names::volume_name(&interpolated_manifest_secret);

        let containers = self.manifest.instance_groups.iter().map(|instance_group| {
            ContainerBuilder::new(&instance_group.name)
                .image(self.operator_image.to_string())
                .shell_command(DATA_GATHER_COMMAND)
                .add_volume_mounts([
                    VolumeMountBuilder::new(&interpolated_manifest_volume, DEPLOYMENT_DIR)
                        .read_only(true)
                        .build(),
                    VolumeMountBuilder::new(DATA_GATHERING_VOLUME, ALL_RELEASES_DIR).build(),
                ])
                .add_env_var(
                    "BOSH_MANIFEST_PATH",
                    format!("{DEPLOYMENT_DIR}{DESIRED_MANIFEST_KEY}"),
                )
                .add_env_var("KUBERNETES_NAMESPACE", namespace)
                .add_env_var("BASE_DIR", ALL_RELEASES_DIR)
                .add_env_var("INSTANCE_GROUP_NAME", &instance_group.name)
                .build()
        });

        let template = PodBuilder::new()
            .metadata_builder(|meta| meta.name(&name).with_label(labels::DELETE_KEY, labels::DELETE_POD_VALUE))
            .add_init_containers(self.spec_copier_containers(
                &self.manifest.instance_groups,
                DATA_GATHERING_VOLUME,
            )?)
            .add_containers(containers)
            .restart_policy("OnFailure")
            .add_secret_volume(&interpolated_manifest_volume, &interpolated_manifest_secret)
            .and_then(|builder| builder.add_empty_dir_volume(DATA_GATHERING_VOLUME))
            .context(BuildPodSnafu { name: &name })?
            .build_template();

        let (name_prefix, _) = names::output_secret_prefix_and_name(
            DeploymentSecretType::InstanceGroupResolvedProperties,
            deployment,
            "",
            false,
        );

        Ok(ExtendedJob {
            metadata: ObjectMetaBuilder::new()
                .name(&name)
                .namespace(namespace)
                .with_label(labels::DEPLOYMENT_NAME_KEY, deployment)
                .build(),
            spec: ExtendedJobSpec {
                trigger: TriggerStrategy::Once.into(),
                output: Some(Output {
                    name_prefix,
                    secret_labels: BTreeMap::from([(
                        labels::DEPLOYMENT_NAME_KEY.to_owned(),
                        deployment.clone(),
                    )]),
                    versioned: true,
                }),
                update_on_config_change: true,
                template,
            },
        })
    }
}
