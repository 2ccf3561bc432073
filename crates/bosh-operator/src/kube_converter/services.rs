use std::collections::BTreeMap;

use k8s_openapi::api::core::v1::{Service, ServicePort, ServiceSpec};

use crate::{builder::meta::ObjectMetaBuilder, labels, manifest::InstanceGroup, names};

/// The services of one instance group.
#[derive(Debug, Default)]
pub(super) struct InstanceGroupServices {
    /// One service per (ordinal, zone) pair, in the order the instances of
    /// the group are enumerated in.
    pub instances: Vec<Service>,

    /// Governs the stateful set of the group.
    pub headless: Option<Service>,
}

/// Builds the services exposing the ports of `instance_group`. Groups whose
/// jobs declare no ports get none.
pub(super) fn instance_group_services(
    deployment: &str,
    namespace: &str,
    instance_group: &InstanceGroup,
) -> InstanceGroupServices {
    let ports: Vec<ServicePort> = instance_group
        .jobs
        .iter()
        .flat_map(|job| &job.containerization().ports)
        .map(|port| ServicePort {
            name: Some(port.name.clone()),
            protocol: Some(port.protocol.clone()),
            port: port.internal,
            ..ServicePort::default()
        })
        .collect();

    if ports.is_empty() {
        return InstanceGroupServices::default();
    }

    let zones = instance_group.azs.len().max(1);
    let mut instances = Vec::with_capacity(instance_group.instances as usize * zones);
    for ordinal in 0..instance_group.instances as usize {
        for az_index in 0..zones {
            let selector = BTreeMap::from([
                (
                    labels::INSTANCE_GROUP_NAME_KEY.to_owned(),
                    instance_group.name.clone(),
                ),
                (labels::AZ_INDEX_KEY.to_owned(), az_index.to_string()),
                (labels::POD_ORDINAL_KEY.to_owned(), ordinal.to_string()),
            ]);
            let name = names::service_name(deployment, &instance_group.name, Some(instances.len()));

            instances.push(service(namespace, name, selector, ports.clone(), None));
        }
    }

    let selector = BTreeMap::from([(
        labels::INSTANCE_GROUP_NAME_KEY.to_owned(),
        instance_group.name.clone(),
    )]);
    let headless = service(
        namespace,
        names::service_name(deployment, &instance_group.name, None),
        selector,
        ports,
        Some("None".to_owned()),
    );

    InstanceGroupServices {
        instances,
        headless: Some(headless),
    }
}

fn service(
    namespace: &str,
    name: String,
    selector: BTreeMap<String, String>,
    ports: Vec<ServicePort>,
    cluster_ip: Option<String>,
) -> Service {
    Service {
        metadata: ObjectMetaBuilder::new()
            .name(name)
            .namespace(namespace)
            .with_labels(selector.clone())
            .build(),
        spec: Some(ServiceSpec {
            selector: Some(selector),
            ports: Some(ports),
            cluster_ip,
            ..ServiceSpec::default()
        }),
        ..Service::default()
    }
}
