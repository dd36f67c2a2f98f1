use std::collections::BTreeMap;

use hbase_k8s_crd::{TierSpec, APP_LABEL, APP_LABEL_VALUE, CLUSTER_SELECTOR_LABEL, POD_NAME_LABEL};
use stackable_operator::{
    builder::ObjectMetaBuilder,
    k8s_openapi::{
        api::core::v1::{Service, ServicePort, ServiceSpec},
        apimachinery::pkg::util::intstr::IntOrString,
    },
};

use crate::resource::ReconcileScope;

/// The headless cluster [`Service`], named after the resource, exposing the ports of all tiers.
///
/// This gives every StatefulSet pod a stable DNS name for peer-to-peer addressing.
pub fn build_cluster_service(scope: &ReconcileScope) -> Service {
    let mut selector = scope.selector_labels.clone();
    selector.extend(cluster_selector(&scope.name));

    build_service(
        scope,
        &scope.name,
        service_ports(scope.tiers.iter()),
        selector,
        Some("None".to_string()),
    )
}

/// A [`Service`] pinned to the pod `pod_name` of `tier`, named like the pod.
pub fn build_replica_service(scope: &ReconcileScope, tier: &TierSpec, pod_name: &str) -> Service {
    let mut selector = cluster_selector(&scope.name);
    selector.insert(POD_NAME_LABEL.to_string(), pod_name.to_string());

    build_service(scope, pod_name, service_ports([tier]), selector, None)
}

/// `{app, cluster-selector}`: matches every pod of the resource.
pub fn cluster_selector(cluster_name: &str) -> BTreeMap<String, String> {
    BTreeMap::from([
        (APP_LABEL.to_string(), APP_LABEL_VALUE.to_string()),
        (CLUSTER_SELECTOR_LABEL.to_string(), cluster_name.to_string()),
    ])
}

fn build_service(
    scope: &ReconcileScope,
    name: &str,
    ports: Vec<ServicePort>,
    selector: BTreeMap<String, String>,
    cluster_ip: Option<String>,
) -> Service {
    Service {
        metadata: ObjectMetaBuilder::new()
            .name(name)
            .namespace(&scope.namespace)
            .ownerreference(scope.owner.clone())
            .with_labels(scope.service_labels.clone())
            .build(),
        spec: Some(ServiceSpec {
            type_: Some("ClusterIP".to_string()),
            cluster_ip,
            ports: Some(ports),
            selector: Some(selector),
            publish_not_ready_addresses: Some(true),
            ..ServiceSpec::default()
        }),
        status: None,
    }
}

/// Union of the container ports of `tiers`, first occurrence wins, targeting the same port.
fn service_ports<'a>(tiers: impl IntoIterator<Item = &'a TierSpec>) -> Vec<ServicePort> {
    let mut ports = Vec::<ServicePort>::new();
    let declared = tiers
        .into_iter()
        .flat_map(|tier| &tier.containers)
        .flat_map(|container| &container.ports);
    for port in declared {
        let duplicate = ports.iter().any(|existing| {
            existing.name.as_deref() == Some(&port.name) && existing.port == port.port
        });
        if !duplicate {
            ports.push(ServicePort {
                name: Some(port.name.clone()),
                port: port.port,
                target_port: Some(IntOrString::Int(port.port)),
                protocol: Some("TCP".to_string()),
                ..ServicePort::default()
            });
        }
    }
    ports
}

#[cfg(test)]
mod tests {
    use crate::resource::fixtures::cluster_scope;

    use super::*;

    fn port_names(service: &Service) -> Vec<String> {
        service
            .spec
            .as_ref()
            .and_then(|spec| spec.ports.as_ref())
            .unwrap()
            .iter()
            .map(|port| port.name.clone().unwrap())
            .collect()
    }

    #[test]
    fn cluster_service_is_headless_and_exposes_every_tier() {
        let scope = cluster_scope();
        let service = build_cluster_service(&scope);
        let spec = service.spec.as_ref().unwrap();

        assert_eq!(Some("hbase".to_string()), service.metadata.name);
        assert_eq!(Some("default".to_string()), service.metadata.namespace);
        assert_eq!(Some("None"), spec.cluster_ip.as_deref());
        assert_eq!(Some("ClusterIP"), spec.type_.as_deref());
        assert_eq!(Some(true), spec.publish_not_ready_addresses);
        assert_eq!(
            vec!["zk-client", "zk-peer", "jn-rpc", "nn-rpc", "dn-data", "hm-rpc"],
            port_names(&service)
        );
        let selector = spec.selector.as_ref().unwrap();
        assert_eq!(Some("hbasecluster"), selector.get(APP_LABEL).map(String::as_str));
        assert_eq!(
            Some("hbase"),
            selector.get(CLUSTER_SELECTOR_LABEL).map(String::as_str)
        );
        assert_eq!(Some("hbase"), selector.get("cluster").map(String::as_str));
        assert_eq!(
            Some("storage"),
            service.metadata.labels.as_ref().unwrap().get("team").map(String::as_str)
        );
        assert_eq!(1, service.metadata.owner_references.unwrap().len());
    }

    #[test]
    fn replica_service_selects_one_pod() {
        let scope = cluster_scope();
        let zookeeper = &scope.tiers[0];
        let service = build_replica_service(&scope, zookeeper, &zookeeper.replica_name(2));
        let spec = service.spec.as_ref().unwrap();

        assert_eq!(Some("zookeeper-2".to_string()), service.metadata.name);
        assert_eq!(None, spec.cluster_ip);
        assert_eq!(vec!["zk-client", "zk-peer"], port_names(&service));
        assert_eq!(
            &BTreeMap::from([
                (APP_LABEL.to_string(), APP_LABEL_VALUE.to_string()),
                (CLUSTER_SELECTOR_LABEL.to_string(), "hbase".to_string()),
                (POD_NAME_LABEL.to_string(), "zookeeper-2".to_string()),
            ]),
            spec.selector.as_ref().unwrap()
        );
    }

    #[test]
    fn ports_are_deduplicated_and_target_themselves() {
        let mut scope = cluster_scope();
        let duplicate = scope.tiers[0].containers[0].clone();
        scope.tiers[1].containers.push(duplicate);

        let service = build_cluster_service(&scope);
        let ports = service.spec.unwrap().ports.unwrap();
        assert_eq!(6, ports.len());
        for port in ports {
            assert_eq!(Some(IntOrString::Int(port.port)), port.target_port);
            assert_eq!(Some("TCP".to_string()), port.protocol);
        }
    }

    #[test]
    fn builder_is_pure() {
        let scope = cluster_scope();
        assert_eq!(build_cluster_service(&scope), build_cluster_service(&scope));
    }
}
