use bosh_operator::{
    data_gatherer::DataGatherer,
    manifest::{Manifest, PropertyValue, property},
};
use rstest::rstest;

mod common;

#[rstest]
#[case::redis_slave(0, "redis-server")]
#[case::diego_cell(1, "cflinuxfs3-rootfs-setup")]
fn instances_follow_zones_and_ordinals(#[case] group: usize, #[case] job: &str) {
    let gatherer = DataGatherer::new("default", common::elaborated_manifest());
    let instanced = gatherer
        .collect_release_specs_and_provider_links(&common::assets_dir())
        .unwrap();

    let instance_group = &instanced.manifest.instance_groups[group];
    let instances = &instance_group.jobs[0].containerization().instances;
    assert_eq!(instances.len(), 4);

    for (i, instance) in instances.iter().enumerate() {
        assert_eq!(
            instance.address,
            format!(
                "foo-deployment-{}-{i}.default.svc.cluster.local",
                instance_group.name
            )
        );
        assert_eq!(instance.az, ["z1", "z2"][i % 2]);
        assert_eq!(instance.id, format!("{}-{i}-{job}", instance_group.name));
        assert_eq!(instance.index, i);
        assert_eq!(instance.instance, i / 2);
        assert_eq!(instance.name, format!("{}-{job}", instance_group.name));
        assert_eq!(instance.bootstrap, i == 0);
    }
}

#[test]
fn provider_links_are_collected() {
    let gatherer = DataGatherer::new("default", common::elaborated_manifest());
    let instanced = gatherer
        .collect_release_specs_and_provider_links(&common::assets_dir())
        .unwrap();

    assert_eq!(instanced.provider_links.len(), 1);
    let link = &instanced.provider_links["redis"]["redis-server"];
    assert_eq!(link.instances.len(), 4);
    assert_eq!(
        property::lookup(&link.properties, "password"),
        Some(&PropertyValue::String("foobar".to_owned()))
    );
    assert_eq!(
        property::lookup(&link.properties, "port"),
        Some(&PropertyValue::Int(6379))
    );
    assert_eq!(link.properties.len(), 3);

    assert_eq!(instanced.release_specs.len(), 2);
    assert_eq!(
        instanced.release_spec("redis", "redis-server").unwrap().templates.len(),
        4
    );
    assert_eq!(
        instanced
            .release_spec("redis", "redis-server")
            .unwrap()
            .properties
            .len(),
        12
    );
}

#[test]
fn optional_self_provided_link_is_consumed() {
    let gatherer = DataGatherer::new("default", common::elaborated_manifest());
    let instanced = gatherer
        .collect_release_specs_and_provider_links(&common::assets_dir())
        .unwrap();
    let rendered = gatherer
        .process_consumers_and_render_bpm(&common::assets_dir(), &instanced, Some("redis-slave"))
        .unwrap();

    let redis = &rendered.manifest.instance_groups[0].jobs[0];
    let consumed = &redis.containerization().consumes["redis"];
    assert_eq!(consumed.instances.len(), 4);

    let process = &redis.containerization().bpm.processes[0];
    assert_eq!(process.name, "redis");
    assert_eq!(process.env["REDIS_PORT"], "6379");
    assert_eq!(process.workdir, "/var/vcap/store/redis");
}

#[test]
fn generated_manifest_contains_resolved_links() {
    let gatherer = DataGatherer::new("default", common::provider_consumer_manifest());
    let yaml = gatherer
        .generate_manifest(&common::assets_dir(), "log-api")
        .unwrap();
    assert!(String::from_utf8_lossy(&yaml).contains("- name: doppler"));

    let manifest = Manifest::from_yaml(&yaml).unwrap();
    let doppler = &manifest.instance_groups[0].jobs[0];
    assert!(doppler.containerization().consumes.is_empty());

    let trafficcontroller = &manifest.instance_groups[1].jobs[0];
    let link = &trafficcontroller.containerization().consumes["doppler"];
    assert_eq!(link.instances.len(), 4);
    for (i, instance) in link.instances.iter().enumerate() {
        assert_eq!(
            instance.address,
            format!("cf-doppler-{i}.default.svc.cluster.local")
        );
        assert_eq!(instance.id, format!("doppler-{i}-doppler"));
    }
    assert_eq!(
        property::lookup(&link.properties, "doppler.grpc_port"),
        Some(&PropertyValue::Int(7765))
    );
    assert_eq!(
        property::lookup(&link.properties, "fooprop"),
        Some(&PropertyValue::Int(10001))
    );
}

#[test]
fn bpm_information_is_rendered_with_link_values() {
    let gatherer = DataGatherer::new("default", common::provider_consumer_manifest());
    let instanced = gatherer
        .collect_release_specs_and_provider_links(&common::assets_dir())
        .unwrap();
    assert_eq!(instanced.release_specs.len(), 1);

    let rendered = gatherer
        .process_consumers_and_render_bpm(&common::assets_dir(), &instanced, Some("log-api"))
        .unwrap();
    let process = &rendered.manifest.instance_groups[1].jobs[0]
        .containerization()
        .bpm
        .processes[0];

    assert_eq!(process.env["FOOBARWITHLINKVALUES"], "10001");
    assert_eq!(process.env["FOOBARWITHLINKNESTEDVALUES"], "7765");
    assert_eq!(process.env["FOOBARWITHLINKINSTANCESAZ"], "z1");
    assert_eq!(
        process.env["FOOBARWITHLINKINSTANCESADDRESS"],
        "cf-doppler-0.default.svc.cluster.local"
    );
    assert_eq!(
        process.env["FOOBARWITHSPECADDRESS"],
        "cf-log-api-0.default.svc.cluster.local"
    );
    assert_eq!(process.env["FOOBARWITHSPECDEPLOYMENT"], "cf");
}

#[test]
fn long_non_ascii_deployment_names_are_shortened() {
    let mut manifest = common::elaborated_manifest();
    manifest.name = format!("{}é{}", "a".repeat(53), "b".repeat(10));

    let instanced = DataGatherer::new("default", manifest)
        .collect_release_specs_and_provider_links(&common::assets_dir())
        .unwrap();
    let instances = &instanced.manifest.instance_groups[0].jobs[0]
        .containerization()
        .instances;

    let service = instances[0].address.split('.').next().unwrap();
    assert!(service.len() <= 63);
    assert_ne!(
        instances[0].address, instances[1].address,
        "every instance keeps its own address"
    );
}
