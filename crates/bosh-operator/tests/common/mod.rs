#![allow(dead_code)]

use std::path::{Path, PathBuf};

use bosh_operator::manifest::Manifest;
use indoc::indoc;

/// Directory holding `jobs-src/{release}/{job}` for every release used by
/// the manifests below.
pub fn assets_dir() -> PathBuf {
    Path::new(env!("CARGO_MANIFEST_DIR")).join("tests/assets")
}

/// Two instance groups of two zones each, the redis job provides a link.
pub const ELABORATED_MANIFEST: &str = indoc! {"
    name: foo-deployment
    releases:
    - name: redis
      url: docker.io/cfcontainerization
      version: 36.15.0
    - name: cflinuxfs3
      url: docker.io/cfcontainerization
      version: 0.62.0
    stemcells:
    - alias: default
      os: opensuse-42.3
      version: 28.g837c5b3-30.263-7.0.0_234.gcd7d1132
    instance_groups:
    - name: redis-slave
      instances: 2
      lifecycle: service
      azs: [z1, z2]
      stemcell: default
      jobs:
      - name: redis-server
        release: redis
        properties:
          port: 6379
          password: foobar
          base_dir: /var/vcap/store/redis
          bosh_containerization:
            ports:
            - name: redis
              protocol: TCP
              internal: 6379
    - name: diego-cell
      instances: 2
      lifecycle: service
      azs: [z1, z2]
      stemcell: default
      jobs:
      - name: cflinuxfs3-rootfs-setup
        release: cflinuxfs3
"};

/// The log-api instance group consumes the link provided by doppler.
pub const PROVIDER_CONSUMER_MANIFEST: &str = indoc! {"
    name: cf
    releases:
    - name: loggregator
      url: docker.io/cfcontainerization
      version: 105.0.1
    stemcells:
    - alias: default
      os: opensuse-42.3
      version: 28.g837c5b3-30.263-7.0.0_234.gcd7d1132
    instance_groups:
    - name: doppler
      instances: 2
      lifecycle: service
      azs: [z1, z2]
      stemcell: default
      jobs:
      - name: doppler
        release: loggregator
        properties:
          doppler:
            grpc_port: 7765
    - name: log-api
      instances: 2
      lifecycle: service
      azs: [z1, z2]
      stemcell: default
      jobs:
      - name: loggregator_trafficcontroller
        release: loggregator
"};

pub fn elaborated_manifest() -> Manifest {
    Manifest::from_yaml(ELABORATED_MANIFEST.as_bytes()).expect("elaborated manifest must parse")
}

pub fn provider_consumer_manifest() -> Manifest {
    Manifest::from_yaml(PROVIDER_CONSUMER_MANIFEST.as_bytes())
        .expect("provider consumer manifest must parse")
}
