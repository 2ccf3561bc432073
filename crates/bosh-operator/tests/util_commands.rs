use std::{collections::BTreeMap, fs, path::Path};

use bosh_operator::{
    cli::{Command, Opts, UtilCommand},
    manifest::Manifest,
};
use clap::Parser;
use rstest::{fixture, rstest};
use tempfile::TempDir;

mod common;

struct Workspace {
    dir: TempDir,
}

impl Workspace {
    fn path(&self) -> &Path {
        self.dir.path()
    }

    fn write(&self, name: &str, contents: &[u8]) -> String {
        let path = self.dir.path().join(name);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).unwrap();
        }
        fs::write(&path, contents).unwrap();
        path.display().to_string()
    }
}

#[fixture]
fn workspace() -> Workspace {
    Workspace {
        dir: tempfile::tempdir().unwrap(),
    }
}

fn run(args: &[&str]) -> Vec<u8> {
    let opts = Opts::try_parse_from(["bosh-operator", "util"].iter().chain(args).copied()).unwrap();
    let mut out = Vec::new();
    opts.command.run(&mut out).unwrap();
    out
}

/// Runs `util data-gather` and returns the resolved manifest it printed.
fn data_gather(manifest_path: &str, instance_group: &str) -> String {
    let assets = common::assets_dir().display().to_string();
    let out = run(&[
        "data-gather",
        "--bosh-manifest-path",
        manifest_path,
        "--base-dir",
        &assets,
        "--cf-operator-namespace",
        "default",
        "--instance-group-name",
        instance_group,
    ]);

    let mut output: BTreeMap<String, String> = serde_json::from_slice(&out).unwrap();
    assert_eq!(output.len(), 1);
    output.remove("properties.yaml").unwrap()
}

#[rstest]
fn data_gather_prints_resolved_manifest(workspace: Workspace) {
    let manifest_path = workspace.write(
        "manifest.yaml",
        common::PROVIDER_CONSUMER_MANIFEST.as_bytes(),
    );

    let resolved = data_gather(&manifest_path, "log-api");
    let manifest = Manifest::from_yaml(resolved.as_bytes()).unwrap();
    let process = &manifest.instance_groups[1].jobs[0]
        .containerization()
        .bpm
        .processes[0];
    assert_eq!(process.env["FOOBARWITHLINKVALUES"], "10001");
}

#[rstest]
fn data_gather_rejects_unknown_instance_group(workspace: Workspace) {
    let manifest_path = workspace.write(
        "manifest.yaml",
        common::PROVIDER_CONSUMER_MANIFEST.as_bytes(),
    );
    let assets = common::assets_dir().display().to_string();
    let opts = Opts::try_parse_from([
        "bosh-operator",
        "util",
        "data-gather",
        "--bosh-manifest-path",
        manifest_path.as_str(),
        "--base-dir",
        assets.as_str(),
        "--cf-operator-namespace",
        "default",
        "--instance-group-name",
        "router",
    ])
    .unwrap();

    let error = opts.command.run(&mut Vec::new()).unwrap_err();
    assert_eq!(
        error.to_string(),
        "failed to gather data for instance group \"router\""
    );
}

#[rstest]
#[case::first_zone("0", "0", "cf-log-api-0.default.svc.cluster.local")]
#[case::second_zone("1", "0", "cf-log-api-1.default.svc.cluster.local")]
#[case::second_ordinal("1", "1", "cf-log-api-3.default.svc.cluster.local")]
fn template_render_writes_instance_templates(
    workspace: Workspace,
    #[case] az_index: &str,
    #[case] pod_ordinal: &str,
    #[case] address: &str,
) {
    let manifest_path = workspace.write(
        "manifest.yaml",
        common::PROVIDER_CONSUMER_MANIFEST.as_bytes(),
    );
    let resolved = data_gather(&manifest_path, "log-api");
    let resolved_path = workspace.write("resolved/properties.yaml", resolved.as_bytes());
    let output_dir = workspace.path().join("jobs");
    fs::create_dir_all(&output_dir).unwrap();

    let jobs_dir = common::assets_dir().display().to_string();
    let output = output_dir.display().to_string();
    run(&[
        "template-render",
        "--bosh-manifest-path",
        &resolved_path,
        "--jobs-dir",
        &jobs_dir,
        "--output-dir",
        &output,
        "--instance-group-name",
        "log-api",
        "--az-index",
        az_index,
        "--pod-ordinal",
        pod_ordinal,
    ]);

    let bpm = fs::read_to_string(output_dir.join("loggregator_trafficcontroller/config/bpm.yml"))
        .unwrap();
    assert!(bpm.contains(&format!("FOOBARWITHSPECADDRESS: \"{address}\"")));
    assert!(bpm.contains("FOOBARWITHLINKINSTANCESADDRESS: \"cf-doppler-0.default.svc.cluster.local\""));
}

#[rstest]
fn template_render_honors_spec_index(workspace: Workspace) {
    let manifest_path =
        workspace.write("manifest.yaml", common::ELABORATED_MANIFEST.as_bytes());
    let resolved = data_gather(&manifest_path, "redis-slave");
    let resolved_path = workspace.write("resolved/properties.yaml", resolved.as_bytes());
    let output_dir = workspace.path().join("jobs");
    fs::create_dir_all(&output_dir).unwrap();

    let jobs_dir = common::assets_dir().display().to_string();
    let output = output_dir.display().to_string();
    run(&[
        "template-render",
        "--bosh-manifest-path",
        &resolved_path,
        "--jobs-dir",
        &jobs_dir,
        "--output-dir",
        &output,
        "--instance-group-name",
        "redis-slave",
        "--spec-index",
        "3",
    ]);

    let redis_dir = output_dir.join("redis-server");
    for destination in [
        "config/bpm.yml",
        "config/redis.conf",
        "bin/pre-start",
        "bin/health_check",
    ] {
        assert!(redis_dir.join(destination).is_file(), "{destination} missing");
    }

    let health_check = fs::read_to_string(redis_dir.join("bin/health_check")).unwrap();
    assert!(health_check.contains("# instance 3 in z2"));
    assert!(health_check.contains("-h foo-deployment-redis-slave-3.default.svc.cluster.local"));

    let config = fs::read_to_string(redis_dir.join("config/redis.conf")).unwrap();
    assert!(config.contains("requirepass foobar"));
    assert!(config.contains("appendonly yes"));
}

#[rstest]
fn convert_applies_resolved_bpm_information(workspace: Workspace) {
    let manifest_path = workspace.write(
        "manifest.yaml",
        common::PROVIDER_CONSUMER_MANIFEST.as_bytes(),
    );
    for instance_group in ["doppler", "log-api"] {
        let resolved = data_gather(&manifest_path, instance_group);
        workspace.write(
            &format!("resolved/{instance_group}/properties.yaml"),
            resolved.as_bytes(),
        );
    }

    let resolved_dir = workspace.path().join("resolved").display().to_string();
    let out = run(&[
        "convert",
        "--bosh-manifest-path",
        &manifest_path,
        "--cf-operator-namespace",
        "default",
        "--resolved-properties-dir",
        &resolved_dir,
    ]);
    let stream = String::from_utf8(out).unwrap();

    assert!(stream.contains("kind: ExtendedStatefulSet"));
    assert!(stream.contains("name: cf-log-api"));
    assert!(stream.contains("/var/vcap/packages/loggregator_trafficcontroller/trafficcontroller"));
    assert!(stream.contains("FOOBARWITHSPECDEPLOYMENT"));
}

#[test]
fn convert_requires_namespace() {
    let opts = Opts::try_parse_from([
        "bosh-operator",
        "util",
        "convert",
        "--bosh-manifest-path",
        "manifest.yaml",
    ])
    .unwrap();
    let Command::Util(UtilCommand::Convert(arguments)) = &opts.command else {
        unreachable!("convert arguments expected");
    };

    let error = arguments.run(&mut Vec::new()).unwrap_err();
    assert_eq!(error.to_string(), "namespace cannot be empty");
}

#[rstest]
fn variable_interpolation_substitutes_secrets(workspace: Workspace) {
    let manifest_path = workspace.write(
        "manifest.yaml",
        b"name: cf\nproperties:\n  admin_password: ((adminpass))\n",
    );
    workspace.write("variables/adminpass/password", b"s3cr3t");
    let variables_dir = workspace.path().join("variables").display().to_string();

    let out = run(&[
        "variable-interpolation",
        "--bosh-manifest-path",
        &manifest_path,
        "--variables-dir",
        &variables_dir,
    ]);

    let mut output: BTreeMap<String, String> = serde_json::from_slice(&out).unwrap();
    let interpolated = output.remove("manifest.yaml").unwrap();
    let document: serde_yaml::Value = serde_yaml::from_str(&interpolated).unwrap();
    assert_eq!(document["properties"]["admin_password"], "s3cr3t");
}

#[rstest]
fn variable_interpolation_rejects_unknown_variables(workspace: Workspace) {
    let manifest_path = workspace.write("manifest.yaml", b"password: ((missing))\n");
    workspace.write("variables/adminpass/password", b"s3cr3t");
    let variables_dir = workspace.path().join("variables").display().to_string();

    let opts = Opts::try_parse_from([
        "bosh-operator",
        "util",
        "variable-interpolation",
        "--bosh-manifest-path",
        manifest_path.as_str(),
        "--variables-dir",
        variables_dir.as_str(),
    ])
    .unwrap();

    let error = opts.command.run(&mut Vec::new()).unwrap_err();
    assert!(error.to_string().starts_with("failed to interpolate the variables into"));
}
