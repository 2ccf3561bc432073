//! Rendering of BOSH job templates.
//!
//! Job templates are ERB files. Only the subset of embedded Ruby that job
//! templates use in practice is understood: conditionals, blocks over arrays
//! and hashes, property and link accessors and a handful of core methods.
//! Anything else fails to render instead of being silently skipped.

use std::{
    fs,
    path::{Component, Path, PathBuf},
};

use snafu::{ResultExt, Snafu, ensure};
use tracing::{debug, instrument};

use crate::{manifest::Job, release_spec::ReleaseSpec};

pub mod context;
pub mod eval;
pub mod parser;
pub mod segment;

pub use context::Context;
pub use eval::Value;

type Result<T, E = Error> = std::result::Result<T, E>;

#[derive(Debug, Snafu)]
pub enum Error {
    #[snafu(display("failed to read template {path:?}"))]
    ReadTemplate {
        source: std::io::Error,
        path: PathBuf,
    },

    #[snafu(display("failed to parse template {template:?}"))]
    ParseTemplate {
        source: parser::Error,
        template: String,
    },

    #[snafu(display("failed to render template {template:?}"))]
    EvaluateTemplate {
        source: eval::Error,
        template: String,
    },

    #[snafu(display("job {job:?} has no instance with index {index}"))]
    InstanceNotFound { job: String, index: usize },

    #[snafu(display("template destination {destination:?} escapes the job directory"))]
    InvalidDestination { destination: String },

    #[snafu(display("failed to create directory {path:?}"))]
    CreateDirectory {
        source: std::io::Error,
        path: PathBuf,
    },

    #[snafu(display("failed to write rendered template {path:?}"))]
    WriteTemplate {
        source: std::io::Error,
        path: PathBuf,
    },
}

/// A template rendered for one instance of a job.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RenderedTemplate {
    pub source: String,

    /// Path relative to the job directory, for example `config/bpm.yml`.
    pub destination: String,
    pub contents: String,
}

/// Renders a single template text. `name` is only used in errors.
pub fn render_template(name: &str, template: &str, context: &Context<'_>) -> Result<String> {
    let nodes = parser::parse(template).context(ParseTemplateSnafu { template: name })?;
    eval::render(&nodes, context).context(EvaluateTemplateSnafu { template: name })
}

/// Renders all templates of a job, as listed in its spec.
pub struct JobRenderer<'a> {
    deployment: &'a str,
    instance_group: &'a str,
    job: &'a Job,
    spec: &'a ReleaseSpec,
    templates_dir: PathBuf,
}

impl<'a> JobRenderer<'a> {
    pub fn new(
        base_dir: &Path,
        deployment: &'a str,
        instance_group: &'a str,
        job: &'a Job,
        spec: &'a ReleaseSpec,
    ) -> Self {
        Self {
            deployment,
            instance_group,
            job,
            spec,
            templates_dir: ReleaseSpec::job_dir(base_dir, &job.release, &job.name).join("templates"),
        }
    }

    /// Renders every template for the instance at `index`.
    ///
    /// A job without instances can still be rendered for index 0, the
    /// instance specific `spec` values are nil then.
    #[instrument(skip(self), fields(job = %self.job.name, instance_group = %self.instance_group))]
    pub fn render(&self, index: usize) -> Result<Vec<RenderedTemplate>> {
        let instances = &self.job.containerization().instances;
        let instance = instances.get(index);
        ensure!(
            instance.is_some() || (instances.is_empty() && index == 0),
            InstanceNotFoundSnafu {
                job: &self.job.name,
                index
            }
        );

        let context = Context {
            deployment: self.deployment,
            instance_group: self.instance_group,
            job: self.job,
            spec: self.spec,
            instance,
        };

        self.spec
            .templates
            .iter()
            .map(|(source, destination)| {
                let path = self.templates_dir.join(source);
                let template =
                    fs::read_to_string(&path).context(ReadTemplateSnafu { path: &path })?;
                let contents = render_template(source, &template, &context)?;
                debug!(%source, %destination, "rendered template");

                Ok(RenderedTemplate {
                    source: source.clone(),
                    destination: destination.clone(),
                    contents,
                })
            })
            .collect()
    }
}

/// Writes rendered templates below `{jobs_dir}/{job}/`.
pub fn write_rendered(jobs_dir: &Path, job: &str, templates: &[RenderedTemplate]) -> Result<()> {
    let job_dir = jobs_dir.join(job);

    for template in templates {
        let destination = Path::new(&template.destination);
        ensure!(
            destination
                .components()
                .all(|component| matches!(component, Component::Normal(_))),
            InvalidDestinationSnafu {
                destination: &template.destination
            }
        );

        let path = job_dir.join(destination);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).context(CreateDirectorySnafu { path: parent })?;
        }
        fs::write(&path, &template.contents).context(WriteTemplateSnafu { path: &path })?;
        debug!(path = %path.display(), "wrote rendered template");
    }

    Ok(())
}
