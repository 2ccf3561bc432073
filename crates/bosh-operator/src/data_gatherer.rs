//! Resolves links between jobs and renders their BPM information.
//!
//! Gathering happens in three stages, each producing a new snapshot of the
//! manifest:
//!
//! 1. [`DataGatherer::collect_release_specs_and_provider_links`] loads the job
//!    specs, synthesizes the instances of every job and records the links
//!    jobs provide ([`InstancedManifest`]).
//! 2. [`DataGatherer::resolve_links`] attaches the provided links to the jobs
//!    consuming them ([`LinkedManifest`]).
//! 3. [`DataGatherer::render_bpm`] renders the job templates and stores the
//!    BPM processes of each job ([`RenderedManifest`]).

use std::{collections::HashMap, path::Path};

use indexmap::{IndexMap, map::Entry};
use snafu::{OptionExt, ResultExt, Snafu, ensure};
use tracing::{debug, info, instrument, warn};

use crate::{
    manifest::{
        self, BpmConfig, ConsumesOverride, InstanceGroup, JobInstance, JobLink, Manifest,
        Properties, bpm::BPM_TEMPLATE_DESTINATION, property::insert_dotted,
    },
    names,
    release_spec::{self, ReleaseSpec, ReleaseSpecs},
    template::{self, JobRenderer},
};

type Result<T, E = Error> = std::result::Result<T, E>;

const DEFAULT_CLUSTER_DOMAIN: &str = "cluster.local";

/// Link name -> providing job name -> link.
pub type ProviderLinks = IndexMap<String, IndexMap<String, JobLink>>;

#[derive(Debug, Snafu)]
pub enum Error {
    #[snafu(display("instance group name cannot be empty"))]
    EmptyInstanceGroupName,

    #[snafu(display("instance group {instance_group:?} not found"))]
    InstanceGroupNotFound { instance_group: String },

    #[snafu(display("failed to load spec of job {job:?} from release {release:?}"))]
    LoadReleaseSpec {
        source: release_spec::Error,
        job: String,
        release: String,
    },

    #[snafu(display("no spec loaded for job {job:?} from release {release:?}"))]
    ReleaseSpecMissing { job: String, release: String },

    #[snafu(display(
        "job {job:?} provides link {link:?} but has no value or default for property {property:?}"
    ))]
    ProvidedPropertyMissing {
        job: String,
        link: String,
        property: String,
    },

    #[snafu(display(
        "job {job:?} in instance group {instance_group:?} consumes link {link:?} which nothing provides"
    ))]
    LinkNotFound {
        job: String,
        instance_group: String,
        link: String,
    },

    #[snafu(display("failed to render templates of job {job:?} in instance group {instance_group:?}"))]
    RenderTemplates {
        source: template::Error,
        job: String,
        instance_group: String,
    },

    #[snafu(display("failed to parse rendered BPM information of job {job:?}"))]
    ParseBpm {
        source: serde_yaml::Error,
        job: String,
    },

    #[snafu(display("failed to serialize the resolved manifest"))]
    SerializeManifest { source: manifest::Error },
}

/// The manifest with instances synthesized, plus the specs of all jobs and
/// the links they provide.
#[derive(Clone, Debug, PartialEq)]
pub struct InstancedManifest {
    pub manifest: Manifest,
    pub release_specs: ReleaseSpecs,
    pub provider_links: ProviderLinks,
}

impl InstancedManifest {
    pub fn release_spec(&self, release: &str, job: &str) -> Option<&ReleaseSpec> {
        self.release_specs.get(release)?.get(job)
    }
}

/// The manifest with consumed links attached.
#[derive(Clone, Debug, PartialEq)]
pub struct LinkedManifest {
    pub manifest: Manifest,
    pub release_specs: ReleaseSpecs,
}

/// The manifest with consumed links and BPM processes attached.
#[derive(Clone, Debug, PartialEq)]
pub struct RenderedManifest {
    pub manifest: Manifest,
}

/// One slot of the (ordinal, zone) enumeration of an instance group. Shared
/// by all jobs of the group.
#[derive(Clone, Debug)]
struct InstanceSlot {
    index: usize,
    ordinal: usize,
    az: String,
    address: String,
}

pub struct DataGatherer {
    namespace: String,
    cluster_domain: String,
    manifest: Manifest,
}

impl DataGatherer {
    pub fn new(namespace: impl Into<String>, manifest: Manifest) -> Self {
        Self {
            namespace: namespace.into(),
            cluster_domain: DEFAULT_CLUSTER_DOMAIN.to_owned(),
            manifest,
        }
    }

    pub fn with_cluster_domain(mut self, cluster_domain: impl Into<String>) -> Self {
        self.cluster_domain = cluster_domain.into();
        self
    }

    pub fn manifest(&self) -> &Manifest {
        &self.manifest
    }

    /// Runs all stages for one instance group and serializes the resulting
    /// manifest.
    #[instrument(skip(self, base_dir), fields(deployment = %self.manifest.name))]
    pub fn generate_manifest(&self, base_dir: &Path, instance_group: &str) -> Result<Vec<u8>> {
        ensure!(!instance_group.is_empty(), EmptyInstanceGroupNameSnafu);

        let instanced = self.collect_release_specs_and_provider_links(base_dir)?;
        let rendered =
            self.process_consumers_and_render_bpm(base_dir, &instanced, Some(instance_group))?;

        let yaml = rendered.manifest.to_yaml().context(SerializeManifestSnafu)?;
        info!("generated resolved manifest");
        Ok(yaml.into_bytes())
    }

    /// Loads the spec of every job, attaches the synthesized instances and
    /// builds the table of provided links.
    #[instrument(skip(self, base_dir), fields(deployment = %self.manifest.name))]
    pub fn collect_release_specs_and_provider_links(
        &self,
        base_dir: &Path,
    ) -> Result<InstancedManifest> {
        let mut manifest = self.manifest.clone();
        let mut release_specs = ReleaseSpecs::new();
        let mut provider_links = ProviderLinks::new();
        let mut slots_by_group: HashMap<String, Vec<InstanceSlot>> = HashMap::new();

        for instance_group in &mut manifest.instance_groups {
            let slots = slots_by_group
                .entry(instance_group.name.clone())
                .or_insert_with(|| self.instance_slots(instance_group))
                .clone();

            for job in &mut instance_group.jobs {
                let spec = match release_specs
                    .entry(job.release.clone())
                    .or_default()
                    .entry(job.name.clone())
                {
                    Entry::Occupied(entry) => entry.into_mut(),
                    Entry::Vacant(entry) => {
                        let spec = ReleaseSpec::load(base_dir, &job.release, &job.name).context(
                            LoadReleaseSpecSnafu {
                                job: &job.name,
                                release: &job.release,
                            },
                        )?;
                        entry.insert(spec)
                    }
                };

                let instances: Vec<JobInstance> = slots
                    .iter()
                    .map(|slot| JobInstance {
                        address: slot.address.clone(),
                        az: slot.az.clone(),
                        id: format!("{}-{}-{}", instance_group.name, slot.index, job.name),
                        index: slot.index,
                        instance: slot.ordinal,
                        name: format!("{}-{}", instance_group.name, job.name),
                        bootstrap: slot.index == 0,
                    })
                    .collect();
                job.properties.bosh_containerization.instances = instances;

                for provided in &spec.provides {
                    let link_name = job
                        .provides
                        .get(&provided.name)
                        .and_then(|provides| provides.alias.clone())
                        .unwrap_or_else(|| provided.name.clone());

                    let mut properties = Properties::new();
                    for property in &provided.properties {
                        let value = spec.resolve_property(job, property).context(
                            ProvidedPropertyMissingSnafu {
                                job: &job.name,
                                link: &link_name,
                                property,
                            },
                        )?;
                        insert_dotted(&mut properties, property, value.clone());
                    }

                    debug!(link = %link_name, job = %job.name, "registered provided link");
                    provider_links.entry(link_name).or_default().insert(
                        job.name.clone(),
                        JobLink {
                            instances: job.containerization().instances.clone(),
                            properties,
                        },
                    );
                }
            }
        }

        Ok(InstancedManifest {
            manifest,
            release_specs,
            provider_links,
        })
    }

    /// Attaches consumed links and renders BPM information, for a single
    /// instance group or for all of them.
    pub fn process_consumers_and_render_bpm(
        &self,
        base_dir: &Path,
        instanced: &InstancedManifest,
        instance_group: Option<&str>,
    ) -> Result<RenderedManifest> {
        let linked = self.resolve_links(instanced, instance_group)?;
        self.render_bpm(base_dir, linked, instance_group)
    }

    #[instrument(skip(self, instanced), fields(deployment = %instanced.manifest.name))]
    pub fn resolve_links(
        &self,
        instanced: &InstancedManifest,
        instance_group: Option<&str>,
    ) -> Result<LinkedManifest> {
        if let Some(name) = instance_group {
            ensure!(
                instanced.manifest.instance_group(name).is_some(),
                InstanceGroupNotFoundSnafu {
                    instance_group: name
                }
            );
        }

        let mut manifest = instanced.manifest.clone();
        for group in selected_groups(&mut manifest, instance_group) {
            for job in &mut group.jobs {
                let spec = instanced
                    .release_spec(&job.release, &job.name)
                    .context(ReleaseSpecMissingSnafu {
                        job: &job.name,
                        release: &job.release,
                    })?;

                let mut consumes = IndexMap::new();
                for consumed in &spec.consumes {
                    let provider_name = match job.consumes.get(&consumed.name) {
                        Some(None) => {
                            debug!(link = %consumed.name, job = %job.name, "consumed link is blocked by the manifest");
                            continue;
                        }
                        Some(Some(ConsumesOverride {
                            from: Some(from), ..
                        })) => from.as_str(),
                        _ => consumed.name.as_str(),
                    };

                    match first_provider(&instanced.provider_links, provider_name) {
                        Some(link) => {
                            consumes.insert(consumed.name.clone(), link.clone());
                        }
                        None if consumed.optional => {
                            debug!(link = %provider_name, job = %job.name, "skipping optional link without provider");
                        }
                        None => {
                            return LinkNotFoundSnafu {
                                job: &job.name,
                                instance_group: &group.name,
                                link: provider_name,
                            }
                            .fail();
                        }
                    }
                }

                job.properties.bosh_containerization.consumes = consumes;
            }
        }

        Ok(LinkedManifest {
            manifest,
            release_specs: instanced.release_specs.clone(),
        })
    }

    #[instrument(skip(self, base_dir, linked), fields(deployment = %linked.manifest.name))]
    pub fn render_bpm(
        &self,
        base_dir: &Path,
        linked: LinkedManifest,
        instance_group: Option<&str>,
    ) -> Result<RenderedManifest> {
        let LinkedManifest {
            mut manifest,
            release_specs,
        } = linked;
        let deployment = manifest.name.clone();

        for group in selected_groups(&mut manifest, instance_group) {
            for job in &mut group.jobs {
                let spec = release_specs
                    .get(&job.release)
                    .and_then(|jobs| jobs.get(&job.name))
                    .context(ReleaseSpecMissingSnafu {
                        job: &job.name,
                        release: &job.release,
                    })?;

                let rendered = JobRenderer::new(base_dir, &deployment, &group.name, job, spec)
                    .render(0)
                    .context(RenderTemplatesSnafu {
                        job: &job.name,
                        instance_group: &group.name,
                    })?;

                let bpm = rendered
                    .iter()
                    .find(|template| template.destination == BPM_TEMPLATE_DESTINATION)
                    .map(|template| BpmConfig::from_yaml(&template.contents))
                    .transpose()
                    .context(ParseBpmSnafu { job: &job.name })?;

                if let Some(bpm) = bpm {
                    debug!(job = %job.name, processes = bpm.processes.len(), "rendered BPM information");
                    job.properties.bosh_containerization.bpm = bpm;
                }
            }
        }

        Ok(RenderedManifest { manifest })
    }

    fn instance_slots(&self, instance_group: &InstanceGroup) -> Vec<InstanceSlot> {
        let zones: Vec<&str> = if instance_group.azs.is_empty() {
            vec![""]
        } else {
            instance_group.azs.iter().map(String::as_str).collect()
        };

        let mut slots = Vec::with_capacity(instance_group.instances as usize * zones.len());
        for ordinal in 0..instance_group.instances as usize {
            for az in &zones {
                let index = slots.len();
                let service =
                    names::service_name(&self.manifest.name, &instance_group.name, Some(index));
                slots.push(InstanceSlot {
                    index,
                    ordinal,
                    az: (*az).to_owned(),
                    address: format!("{service}.{}.svc.{}", self.namespace, self.cluster_domain),
                });
            }
        }

        slots
    }
}

fn selected_groups<'a>(
    manifest: &'a mut Manifest,
    instance_group: Option<&'a str>,
) -> impl Iterator<Item = &'a mut InstanceGroup> {
    manifest
        .instance_groups
        .iter_mut()
        .filter(move |group| instance_group.is_none_or(|name| group.name == name))
}

/// Picks the provider of a link. Links are matched by name only, several
/// providers under one name resolve to the first one registered.
fn first_provider<'a>(provider_links: &'a ProviderLinks, name: &str) -> Option<&'a JobLink> {
    let providers = provider_links.get(name)?;
    if providers.len() > 1 {
        warn!(
            link = name,
            providers = ?providers.keys().collect::<Vec<_>>(),
            "link has several providers, using the first one"
        );
    }

    providers.first().map(|(_, link)| link)
}

#[cfg(test)]
mod tests {
    use std::fs;

    use indoc::indoc;
    use rstest::{fixture, rstest};

    use super::*;
    use crate::manifest::PropertyValue;

    struct Release {
        dir: tempfile::TempDir,
    }

    impl Release {
        fn job(&self, release: &str, job: &str, spec: &str, templates: &[(&str, &str)]) {
            let job_dir = ReleaseSpec::job_dir(self.dir.path(), release, job);
            fs::create_dir_all(job_dir.join("templates")).unwrap();
            fs::write(job_dir.join("job.MF"), spec).unwrap();
            for (name, contents) in templates {
                fs::write(job_dir.join("templates").join(name), contents).unwrap();
            }
        }

        fn path(&self) -> &Path {
            self.dir.path()
        }
    }

    #[fixture]
    fn release() -> Release {
        let release = Release {
            dir: tempfile::tempdir().unwrap(),
        };
        release.job(
            "app",
            "server",
            indoc! {"
                name: server
                templates:
                  bpm.yml.erb: config/bpm.yml
                provides:
                - name: api
                  type: api
                  properties: [port, tls.enabled]
                properties:
                  port:
                    default: 8080
                  tls.enabled:
                    default: false
                  secret: {}
            "},
            &[(
                "bpm.yml.erb",
                "processes:\n- name: server\n  executable: /bin/server\n  args: [--port, <%= p('port') %>]\n",
            )],
        );
        release.job(
            "app",
            "client",
            indoc! {"
                name: client
                templates:
                  bpm.yml.erb: config/bpm.yml
                consumes:
                - name: api
                  type: api
                - name: metrics
                  type: metrics
                  optional: true
            "},
            &[(
                "bpm.yml.erb",
                indoc! {"
                    processes:
                    - name: client
                      executable: /bin/client
                      env:
                        API_PORT: <%= link('api').p('port') %>
                        API_ADDRESS: <%= link('api').instances[0].address %>
                "},
            )],
        );
        release
    }

    fn manifest(extra: &str) -> Manifest {
        let yaml = format!(
            "{}{extra}",
            indoc! {"
                name: app
                releases:
                - name: app
                  version: 1
                instance_groups:
                - name: api
                  instances: 2
                  azs: [z1, z2]
                  jobs:
                  - name: server
                    release: app
                    properties:
                      port: 9000
                - name: frontend
                  instances: 1
                  jobs:
                  - name: client
                    release: app
            "}
        );
        Manifest::from_yaml(yaml.as_bytes()).unwrap()
    }

    #[rstest]
    fn synthesizes_instances_per_ordinal_and_zone(release: Release) {
        let gatherer = DataGatherer::new("default", manifest(""));
        let instanced = gatherer
            .collect_release_specs_and_provider_links(release.path())
            .unwrap();

        let instances = &instanced.manifest.instance_groups[0].jobs[0]
            .containerization()
            .instances;
        assert_eq!(instances.len(), 4);
        assert_eq!(
            instances.iter().map(|i| i.az.as_str()).collect::<Vec<_>>(),
            ["z1", "z2", "z1", "z2"]
        );
        assert_eq!(
            instances.iter().map(|i| i.instance).collect::<Vec<_>>(),
            [0, 0, 1, 1]
        );
        assert_eq!(instances[3].id, "api-3-server");
        assert_eq!(instances[3].name, "api-server");
        assert_eq!(instances[3].address, "app-api-3.default.svc.cluster.local");
        assert!(instances[0].bootstrap);
        assert!(!instances[1].bootstrap);

        let frontend = &instanced.manifest.instance_groups[1].jobs[0]
            .containerization()
            .instances;
        assert_eq!(frontend.len(), 1);
        assert_eq!(frontend[0].az, "");
    }

    #[rstest]
    fn provider_links_expose_only_listed_properties(release: Release) {
        let gatherer = DataGatherer::new("default", manifest(""));
        let instanced = gatherer
            .collect_release_specs_and_provider_links(release.path())
            .unwrap();

        let link = &instanced.provider_links["api"]["server"];
        assert_eq!(link.instances.len(), 4);
        assert_eq!(
            manifest::property::lookup(&link.properties, "port"),
            Some(&PropertyValue::Int(9000))
        );
        assert_eq!(
            manifest::property::lookup(&link.properties, "tls.enabled"),
            Some(&PropertyValue::Bool(false))
        );
        assert!(!link.properties.contains_key("secret"));
    }

    #[rstest]
    fn collection_is_idempotent(release: Release) {
        let gatherer = DataGatherer::new("default", manifest(""));
        let first = gatherer
            .collect_release_specs_and_provider_links(release.path())
            .unwrap();
        let second = gatherer
            .collect_release_specs_and_provider_links(release.path())
            .unwrap();

        assert_eq!(first, second);
    }

    #[rstest]
    fn resolves_links_and_renders_bpm(release: Release) {
        let gatherer = DataGatherer::new("default", manifest("")).with_cluster_domain("example.org");
        let instanced = gatherer
            .collect_release_specs_and_provider_links(release.path())
            .unwrap();
        let rendered = gatherer
            .process_consumers_and_render_bpm(release.path(), &instanced, Some("frontend"))
            .unwrap();

        let client = &rendered.manifest.instance_groups[1].jobs[0];
        assert!(client.containerization().consumes.contains_key("api"));
        assert!(!client.containerization().consumes.contains_key("metrics"));

        let process = &client.containerization().bpm.processes[0];
        assert_eq!(process.env["API_PORT"], "9000");
        assert_eq!(
            process.env["API_ADDRESS"],
            "app-api-0.default.svc.example.org"
        );

        // Only the selected instance group is processed
        let server = &rendered.manifest.instance_groups[0].jobs[0];
        assert!(server.containerization().bpm.processes.is_empty());
    }

    #[rstest]
    fn provides_alias_and_consumes_from(release: Release) {
        let mut manifest = manifest("");
        manifest.instance_groups[0].jobs[0].provides.insert(
            "api".to_owned(),
            manifest::ProvidesOverride {
                alias: Some("internal-api".to_owned()),
            },
        );

        let gatherer = DataGatherer::new("default", manifest.clone());
        let instanced = gatherer
            .collect_release_specs_and_provider_links(release.path())
            .unwrap();
        assert!(instanced.provider_links.contains_key("internal-api"));
        assert!(matches!(
            gatherer.resolve_links(&instanced, Some("frontend")),
            Err(Error::LinkNotFound { link, .. }) if link == "api"
        ));

        manifest.instance_groups[1].jobs[0].consumes.insert(
            "api".to_owned(),
            Some(ConsumesOverride {
                from: Some("internal-api".to_owned()),
            }),
        );
        let gatherer = DataGatherer::new("default", manifest);
        let instanced = gatherer
            .collect_release_specs_and_provider_links(release.path())
            .unwrap();
        let linked = gatherer.resolve_links(&instanced, Some("frontend")).unwrap();
        assert!(
            linked.manifest.instance_groups[1].jobs[0]
                .containerization()
                .consumes
                .contains_key("api")
        );
    }

    #[rstest]
    fn blocked_links_are_not_resolved(release: Release) {
        let mut manifest = manifest("");
        manifest.instance_groups[1].jobs[0]
            .consumes
            .insert("api".to_owned(), None);

        let gatherer = DataGatherer::new("default", manifest);
        let instanced = gatherer
            .collect_release_specs_and_provider_links(release.path())
            .unwrap();
        let linked = gatherer.resolve_links(&instanced, None).unwrap();

        assert!(
            linked.manifest.instance_groups[1].jobs[0]
                .containerization()
                .consumes
                .is_empty()
        );
    }

    #[rstest]
    fn unknown_instance_group_is_rejected(release: Release) {
        let gatherer = DataGatherer::new("default", manifest(""));

        assert!(matches!(
            gatherer.generate_manifest(release.path(), "nope"),
            Err(Error::InstanceGroupNotFound { .. })
        ));
        assert!(matches!(
            gatherer.generate_manifest(release.path(), ""),
            Err(Error::EmptyInstanceGroupName)
        ));
    }

    #[rstest]
    fn missing_provided_property_fails(release: Release) {
        release.job(
            "app",
            "server",
            indoc! {"
                name: server
                provides:
                - name: api
                  type: api
                  properties: [token]
            "},
            &[],
        );
        let gatherer = DataGatherer::new("default", manifest(""));

        assert!(matches!(
            gatherer.collect_release_specs_and_provider_links(release.path()),
            Err(Error::ProvidedPropertyMissing { property, .. }) if property == "token"
        ));
    }
}
