//! The `util` commands run inside the containers the converter generates.

use std::{
    collections::BTreeMap,
    fs,
    io::{self, Write},
    num::ParseIntError,
    path::{Path, PathBuf},
};

use clap::{Args, Parser, Subcommand};
use snafu::{OptionExt, ResultExt, Snafu, ensure};
use tracing::{info, instrument};

use crate::{
    cluster_domain,
    config::OperatorImage,
    data_gatherer::{self, DataGatherer},
    interpolation::{self, Variables},
    kube_converter::{self, DESIRED_MANIFEST_KEY, KubeConverter, RESOLVED_PROPERTIES_KEY},
    manifest::{self, Manifest},
    release_spec::{self, ReleaseSpec},
    template::{self, JobRenderer},
};

type Result<T, E = Error> = std::result::Result<T, E>;

#[derive(Debug, Snafu)]
pub enum Error {
    #[snafu(display("{argument} cannot be empty"))]
    EmptyArgument { argument: &'static str },

    #[snafu(display("failed to read manifest {path:?}"))]
    ReadManifest { source: io::Error, path: PathBuf },

    #[snafu(display("failed to load manifest {path:?}"))]
    LoadManifest {
        source: manifest::Error,
        path: PathBuf,
    },

    #[snafu(display("failed to load the variables"))]
    LoadVariables { source: interpolation::Error },

    #[snafu(display("failed to interpolate the variables into {path:?}"))]
    InterpolateVariables {
        source: interpolation::Error,
        path: PathBuf,
    },

    #[snafu(display("failed to determine the cluster domain"))]
    RetrieveClusterDomain { source: cluster_domain::Error },

    #[snafu(display("failed to gather data for instance group {instance_group:?}"))]
    GatherData {
        source: data_gatherer::Error,
        instance_group: String,
    },

    #[snafu(display("instance group {instance_group:?} not found in the manifest"))]
    InstanceGroupNotFound { instance_group: String },

    #[snafu(display("invalid value {value:?} for {argument}"))]
    InvalidIndex {
        source: ParseIntError,
        argument: &'static str,
        value: String,
    },

    #[snafu(display("instance index of pod ordinal {pod_ordinal} in zone {az_index} is out of range"))]
    IndexOverflow { pod_ordinal: usize, az_index: usize },

    #[snafu(display("failed to load the spec of job {job:?}"))]
    LoadReleaseSpec {
        source: release_spec::Error,
        job: String,
    },

    #[snafu(display("failed to render the templates of job {job:?}"))]
    RenderTemplates { source: template::Error, job: String },

    #[snafu(display("failed to convert the manifest"))]
    ConvertManifest { source: kube_converter::Error },

    #[snafu(display("failed to apply the bpm information"))]
    ApplyBpmInfo { source: kube_converter::Error },

    #[snafu(display("failed to serialize the output"))]
    SerializeJson { source: serde_json::Error },

    #[snafu(display("failed to serialize the Kubernetes objects"))]
    SerializeYaml { source: serde_yaml::Error },

    #[snafu(display("failed to write the output"))]
    WriteOutput { source: io::Error },
}

#[derive(Debug, Parser)]
#[command(
    name = "bosh-operator",
    author,
    version,
    about = "Converts BOSH deployment manifests into Kubernetes workloads"
)]
pub struct Opts {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Commands run by the containers of a converted deployment.
    #[command(subcommand)]
    Util(UtilCommand),
}

#[derive(Debug, Subcommand)]
pub enum UtilCommand {
    /// Interpolate the generated variables into the manifest and print it.
    VariableInterpolation(VariableInterpolationArguments),

    /// Resolve the links and BPM information of an instance group and print
    /// the resolved manifest.
    DataGather(DataGatherArguments),

    /// Render the job templates of one instance of an instance group.
    TemplateRender(TemplateRenderArguments),

    /// Print the Kubernetes objects of a deployment.
    Convert(ConvertArguments),
}

#[derive(Debug, PartialEq, Eq, Args)]
pub struct VariableInterpolationArguments {
    /// Path to the manifest with ops files applied.
    #[arg(long, env = "BOSH_MANIFEST_PATH", default_value = "")]
    pub bosh_manifest_path: PathBuf,

    /// Directory with one sub directory per variable, one file per key.
    #[arg(long, env = "VARIABLES_DIR", default_value = "")]
    pub variables_dir: PathBuf,
}

#[derive(Debug, PartialEq, Eq, Args)]
pub struct DataGatherArguments {
    /// Path to the interpolated manifest.
    #[arg(long, env = "BOSH_MANIFEST_PATH", default_value = "")]
    pub bosh_manifest_path: PathBuf,

    /// Directory the job specs of all releases were copied to.
    #[arg(long, env = "BASE_DIR", default_value = "")]
    pub base_dir: PathBuf,

    /// Namespace the deployment runs in.
    #[arg(long, env = "CF_OPERATOR_NAMESPACE", default_value = "")]
    pub cf_operator_namespace: String,

    #[arg(long, env = "INSTANCE_GROUP_NAME", default_value = "")]
    pub instance_group_name: String,
}

#[derive(Debug, PartialEq, Eq, Args)]
pub struct TemplateRenderArguments {
    /// Path to the resolved manifest of the instance group.
    #[arg(long, env = "BOSH_MANIFEST_PATH", default_value = "")]
    pub bosh_manifest_path: PathBuf,

    /// Directory the job specs of all releases were copied to.
    #[arg(long, env = "JOBS_DIR", default_value = "")]
    pub jobs_dir: PathBuf,

    /// Directory the rendered jobs are written to.
    #[arg(long, env = "OUTPUT_DIR", default_value = "/var/vcap/jobs")]
    pub output_dir: PathBuf,

    #[arg(long, env = "INSTANCE_GROUP_NAME", default_value = "")]
    pub instance_group_name: String,

    /// Index of the instance to render. Calculated from the zone and ordinal
    /// of the pod if empty.
    #[arg(long, env = "SPEC_INDEX", default_value = "")]
    pub spec_index: String,

    #[arg(long, env = "AZ_INDEX", default_value = "")]
    pub az_index: String,

    #[arg(long, env = "POD_ORDINAL", default_value = "")]
    pub pod_ordinal: String,
}

#[derive(Debug, PartialEq, Eq, Args)]
pub struct ConvertArguments {
    /// Path to the interpolated manifest.
    #[arg(long, env = "BOSH_MANIFEST_PATH", default_value = "")]
    pub bosh_manifest_path: PathBuf,

    /// Namespace the deployment runs in.
    #[arg(long, env = "CF_OPERATOR_NAMESPACE", default_value = "")]
    pub cf_operator_namespace: String,

    /// Directory holding the resolved manifest of every instance group at
    /// `{instance-group}/properties.yaml`. The BPM information of the
    /// resolved manifests is applied if set.
    #[arg(long, env = "RESOLVED_PROPERTIES_DIR")]
    pub resolved_properties_dir: Option<PathBuf>,

    #[command(flatten)]
    pub operator_image: OperatorImage,
}

impl UtilCommand {
    /// Runs the command, writing its output to `out`.
    pub fn run(&self, out: &mut impl Write) -> Result<()> {
        match self {
            Self::VariableInterpolation(arguments) => arguments.run(out),
            Self::DataGather(arguments) => arguments.run(out),
            Self::TemplateRender(arguments) => arguments.run(),
            Self::Convert(arguments) => arguments.run(out),
        }
    }
}

impl Command {
    pub fn run(&self, out: &mut impl Write) -> Result<()> {
        match self {
            Self::Util(command) => command.run(out),
        }
    }
}

impl VariableInterpolationArguments {
    /// Prints `{"manifest.yaml": "<interpolated manifest>"}`.
    #[instrument(skip_all, fields(manifest = %self.bosh_manifest_path.display()))]
    pub fn run(&self, out: &mut impl Write) -> Result<()> {
        ensure_path(&self.bosh_manifest_path, "manifest")?;
        ensure_path(&self.variables_dir, "variables directory")?;

        let manifest = fs::read(&self.bosh_manifest_path).context(ReadManifestSnafu {
            path: &self.bosh_manifest_path,
        })?;
        let variables = Variables::load(&self.variables_dir).context(LoadVariablesSnafu)?;
        let interpolated = interpolation::interpolate(&manifest, &variables).context(
            InterpolateVariablesSnafu {
                path: &self.bosh_manifest_path,
            },
        )?;

        info!("interpolated variables");
        write_output(out, DESIRED_MANIFEST_KEY, &interpolated)
    }
}

impl DataGatherArguments {
    /// Prints `{"properties.yaml": "<resolved manifest>"}`, the format the
    /// output of an extended job is persisted from.
    #[instrument(skip_all, fields(instance_group = %self.instance_group_name))]
    pub fn run(&self, out: &mut impl Write) -> Result<()> {
        ensure_path(&self.bosh_manifest_path, "manifest")?;
        ensure_path(&self.base_dir, "base directory")?;
        ensure!(
            !self.cf_operator_namespace.is_empty(),
            EmptyArgumentSnafu {
                argument: "namespace"
            }
        );
        ensure!(
            !self.instance_group_name.is_empty(),
            EmptyArgumentSnafu {
                argument: "instance group name"
            }
        );

        let manifest = read_manifest(&self.bosh_manifest_path)?;
        let cluster_domain =
            cluster_domain::retrieve_cluster_domain().context(RetrieveClusterDomainSnafu)?;

        let resolved = DataGatherer::new(&self.cf_operator_namespace, manifest)
            .with_cluster_domain(cluster_domain)
            .generate_manifest(&self.base_dir, &self.instance_group_name)
            .context(GatherDataSnafu {
                instance_group: &self.instance_group_name,
            })?;

        write_output(
            out,
            RESOLVED_PROPERTIES_KEY,
            &String::from_utf8_lossy(&resolved),
        )
    }
}

impl TemplateRenderArguments {
    #[instrument(skip_all, fields(instance_group = %self.instance_group_name))]
    pub fn run(&self) -> Result<()> {
        ensure_path(&self.bosh_manifest_path, "manifest")?;
        ensure_path(&self.jobs_dir, "jobs directory")?;
        ensure_path(&self.output_dir, "output directory")?;
        ensure!(
            !self.instance_group_name.is_empty(),
            EmptyArgumentSnafu {
                argument: "instance group name"
            }
        );

        let manifest = read_manifest(&self.bosh_manifest_path)?;
        let instance_group = manifest
            .instance_group(&self.instance_group_name)
            .context(InstanceGroupNotFoundSnafu {
                instance_group: &self.instance_group_name,
            })?;
        let index = self.instance_index(instance_group.azs.len())?;

        for job in &instance_group.jobs {
            let spec = ReleaseSpec::load(&self.jobs_dir, &job.release, &job.name)
                .context(LoadReleaseSpecSnafu { job: &job.name })?;
            let rendered = JobRenderer::new(
                &self.jobs_dir,
                &manifest.name,
                &instance_group.name,
                job,
                &spec,
            )
            .render(index)
            .context(RenderTemplatesSnafu { job: &job.name })?;

            template::write_rendered(&self.output_dir, &job.name, &rendered)
                .context(RenderTemplatesSnafu { job: &job.name })?;
            info!(job = %job.name, index, templates = rendered.len(), "rendered job");
        }

        Ok(())
    }

    /// The position of the instance in the (ordinal, zone) enumeration of the
    /// instance group.
    fn instance_index(&self, zones: usize) -> Result<usize> {
        if let Some(index) = parse_index(&self.spec_index, "spec index")? {
            return Ok(index);
        }

        let az_index = parse_index(&self.az_index, "az index")?.unwrap_or_default();
        let pod_ordinal = parse_index(&self.pod_ordinal, "pod ordinal")?.unwrap_or_default();
        pod_ordinal
            .checked_mul(zones.max(1))
            .and_then(|index| index.checked_add(az_index))
            .context(IndexOverflowSnafu {
                pod_ordinal,
                az_index,
            })
    }
}

impl ConvertArguments {
    /// Prints the objects as a multi-document YAML stream.
    #[instrument(skip_all, fields(namespace = %self.cf_operator_namespace))]
    pub fn run(&self, out: &mut impl Write) -> Result<()> {
        ensure_path(&self.bosh_manifest_path, "manifest")?;
        ensure!(
            !self.cf_operator_namespace.is_empty(),
            EmptyArgumentSnafu {
                argument: "namespace"
            }
        );

        let manifest = read_manifest(&self.bosh_manifest_path)?;
        let mut kube_config = KubeConverter::new(&manifest, &self.operator_image)
            .convert_to_kube(&self.cf_operator_namespace)
            .context(ConvertManifestSnafu)?;

        if let Some(resolved_properties_dir) = &self.resolved_properties_dir {
            let manifests = manifest
                .instance_groups
                .iter()
                .map(|instance_group| {
                    let path = resolved_properties_dir
                        .join(&instance_group.name)
                        .join(RESOLVED_PROPERTIES_KEY);
                    Ok((instance_group.name.clone(), read_manifest(&path)?))
                })
                .collect::<Result<BTreeMap<_, _>>>()?;

            kube_config
                .apply_bpm_info(&manifests)
                .context(ApplyBpmInfoSnafu)?;
        }

        let yaml = kube_config.to_yaml().context(SerializeYamlSnafu)?;
        out.write_all(yaml.as_bytes()).context(WriteOutputSnafu)
    }
}

/// Writes `{key: value}` as a single line of JSON, the format extended jobs
/// persist their output from.
fn write_output(out: &mut impl Write, key: &str, value: &str) -> Result<()> {
    let output = BTreeMap::from([(key, value)]);
    serde_json::to_writer(&mut *out, &output).context(SerializeJsonSnafu)?;
    writeln!(out).context(WriteOutputSnafu)
}

fn ensure_path(path: &Path, argument: &'static str) -> Result<()> {
    ensure!(
        !path.as_os_str().is_empty(),
        EmptyArgumentSnafu { argument }
    );
    Ok(())
}

fn read_manifest(path: &Path) -> Result<Manifest> {
    let contents = fs::read(path).context(ReadManifestSnafu { path })?;
    Manifest::from_yaml(&contents).context(LoadManifestSnafu { path })
}

fn parse_index(value: &str, argument: &'static str) -> Result<Option<usize>> {
    if value.is_empty() {
        return Ok(None);
    }

    value
        .parse()
        .map(Some)
        .context(InvalidIndexSnafu { argument, value })
}

#[cfg(test)]
mod tests {
    use clap::CommandFactory;
    use rstest::rstest;

    use super::*;

    #[test]
    fn verify_cli() {
        Opts::command().debug_assert();
    }

    fn template_render(spec_index: &str, az_index: &str, pod_ordinal: &str) -> TemplateRenderArguments {
        TemplateRenderArguments {
            bosh_manifest_path: PathBuf::from("manifest.yaml"),
            jobs_dir: PathBuf::from("/var/vcap/all-releases"),
            output_dir: PathBuf::from("/var/vcap/jobs"),
            instance_group_name: "redis-slave".to_owned(),
            spec_index: spec_index.to_owned(),
            az_index: az_index.to_owned(),
            pod_ordinal: pod_ordinal.to_owned(),
        }
    }

    #[rstest]
    #[case("3", "", "", 2, 3)]
    #[case("", "", "", 2, 0)]
    #[case("", "1", "0", 2, 1)]
    #[case("", "0", "1", 2, 2)]
    #[case("", "1", "1", 2, 3)]
    #[case("", "", "2", 0, 2)]
    fn instance_index(
        #[case] spec_index: &str,
        #[case] az_index: &str,
        #[case] pod_ordinal: &str,
        #[case] zones: usize,
        #[case] expected: usize,
    ) {
        let arguments = template_render(spec_index, az_index, pod_ordinal);
        assert_eq!(arguments.instance_index(zones).unwrap(), expected);
    }

    #[test]
    fn overflowing_instance_index() {
        let ordinal = usize::MAX.to_string();
        let err = template_render("", "1", &ordinal).instance_index(2).unwrap_err();
        assert!(matches!(err, Error::IndexOverflow { az_index: 1, .. }));

        let err = template_render("", "1", &ordinal).instance_index(1).unwrap_err();
        assert!(matches!(err, Error::IndexOverflow { .. }));
    }

    #[test]
    fn invalid_instance_index() {
        let err = template_render("one", "", "").instance_index(1).unwrap_err();
        assert!(matches!(err, Error::InvalidIndex { argument: "spec index", .. }));
    }

    #[test]
    fn empty_manifest_path() {
        let arguments = DataGatherArguments {
            bosh_manifest_path: PathBuf::new(),
            base_dir: PathBuf::from("/var/vcap/all-releases"),
            cf_operator_namespace: "default".to_owned(),
            instance_group_name: "log-api".to_owned(),
        };

        let err = arguments.run(&mut Vec::new()).unwrap_err();
        assert_eq!(err.to_string(), "manifest cannot be empty");
    }

    #[test]
    fn empty_namespace() {
        let arguments = DataGatherArguments {
            bosh_manifest_path: PathBuf::from("manifest.yaml"),
            base_dir: PathBuf::from("/var/vcap/all-releases"),
            cf_operator_namespace: String::new(),
            instance_group_name: "log-api".to_owned(),
        };

        let err = arguments.run(&mut Vec::new()).unwrap_err();
        assert_eq!(err.to_string(), "namespace cannot be empty");
    }

    #[test]
    fn parse_convert() {
        let opts = Opts::parse_from([
            "bosh-operator",
            "util",
            "convert",
            "--bosh-manifest-path",
            "manifest.yaml",
            "--cf-operator-namespace",
            "default",
            "--docker-image-tag",
            "dev",
        ]);
        let Command::Util(UtilCommand::Convert(arguments)) = opts.command else {
            unreachable!("expected the convert command");
        };

        assert_eq!(arguments.bosh_manifest_path, PathBuf::from("manifest.yaml"));
        assert_eq!(arguments.cf_operator_namespace, "default");
        assert_eq!(arguments.operator_image.tag, "dev");
    }

    #[test]
    fn parse_variable_interpolation() {
        let opts = Opts::parse_from([
            "bosh-operator",
            "util",
            "variable-interpolation",
            "--bosh-manifest-path",
            "manifest.yaml",
            "--variables-dir",
            "/var/run/secrets/variables",
        ]);
        let Command::Util(UtilCommand::VariableInterpolation(arguments)) = opts.command else {
            unreachable!("expected the variable-interpolation command");
        };

        assert_eq!(arguments.bosh_manifest_path, PathBuf::from("manifest.yaml"));
        assert_eq!(
            arguments.variables_dir,
            PathBuf::from("/var/run/secrets/variables")
        );
    }

    #[test]
    fn empty_variables_dir() {
        let arguments = VariableInterpolationArguments {
            bosh_manifest_path: PathBuf::from("manifest.yaml"),
            variables_dir: PathBuf::new(),
        };

        let err = arguments.run(&mut Vec::new()).unwrap_err();
        assert_eq!(err.to_string(), "variables directory cannot be empty");
    }
}
