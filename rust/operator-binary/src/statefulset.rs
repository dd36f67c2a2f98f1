//! Renders a tier into the [`StatefulSet`] that runs it.

use std::collections::BTreeMap;

use hbase_k8s_crd::{
    tier::{
        ContainerPortSpec, ContainerResources, LifecycleSpec, ProbeSpec, SecuritySpec,
        VolumeClaimSpec, VolumeMountSpec, VolumeSourceKind, VolumeSpec,
    },
    HbaseClusterConfiguration, TierSpec, CONFIG_VERSION_ANNOTATION, TIER_LABEL,
};
use stackable_operator::{
    builder::ObjectMetaBuilder,
    k8s_openapi::{
        api::{
            apps::v1::{StatefulSet, StatefulSetSpec},
            core::v1::{
                Capabilities, ConfigMapVolumeSource, Container, ContainerPort,
                EmptyDirVolumeSource, ExecAction, HostPathVolumeSource, Lifecycle,
                LifecycleHandler, PersistentVolumeClaim, PersistentVolumeClaimSpec, PodDNSConfig,
                PodSecurityContext, PodSpec, PodTemplateSpec, Probe, ResourceRequirements,
                SecurityContext, TCPSocketAction, Volume, VolumeMount,
            },
        },
        apimachinery::pkg::{
            api::resource::Quantity,
            apis::meta::v1::{LabelSelector, ObjectMeta},
            util::intstr::IntOrString,
        },
    },
};

use crate::{resource::ReconcileScope, service::cluster_selector};

/// Selector of a tier's pods: the cluster selector narrowed to one tier.
pub fn tier_selector(scope: &ReconcileScope, tier: &TierSpec) -> BTreeMap<String, String> {
    let mut selector = cluster_selector(&scope.name);
    selector.insert(TIER_LABEL.to_string(), tier.name.clone());
    selector
}

/// The StatefulSet for `tier`, with `config_version` stamped on its pod template so that a
/// changed token rolls the pods.
pub fn build_statefulset(
    scope: &ReconcileScope,
    tier: &TierSpec,
    config_version: &str,
) -> StatefulSet {
    let selector = tier_selector(scope, tier);

    let mut pod_labels = tier.labels.clone();
    pod_labels.extend(selector.clone());
    let mut pod_annotations = tier.annotations.clone();
    pod_annotations.insert(
        CONFIG_VERSION_ANNOTATION.to_string(),
        config_version.to_string(),
    );

    StatefulSet {
        metadata: ObjectMetaBuilder::new()
            .name(&tier.name)
            .namespace(&scope.namespace)
            .ownerreference(scope.owner.clone())
            .with_labels(selector.clone())
            .build(),
        spec: Some(StatefulSetSpec {
            replicas: Some(tier.size),
            service_name: scope.name.clone(),
            pod_management_policy: Some(tier.pod_management_policy.to_string()),
            selector: LabelSelector {
                match_labels: Some(selector),
                ..LabelSelector::default()
            },
            volume_claim_templates: Some(
                tier.volume_claims
                    .iter()
                    .map(|claim| build_volume_claim(&scope.namespace, claim))
                    .collect(),
            ),
            template: PodTemplateSpec {
                metadata: Some(ObjectMeta {
                    labels: Some(pod_labels),
                    annotations: Some(pod_annotations),
                    ..ObjectMeta::default()
                }),
                spec: Some(build_pod_spec(scope, tier)),
            },
            ..StatefulSetSpec::default()
        }),
        status: None,
    }
}

fn build_pod_spec(scope: &ReconcileScope, tier: &TierSpec) -> PodSpec {
    let configuration = &scope.configuration;

    let sidecars = tier.sidecar_containers.iter().map(|sidecar| Container {
        name: sidecar.name.clone(),
        image: Some(sidecar.image.clone()),
        command: Some(sidecar.command.clone()),
        args: Some(sidecar.args.clone()),
        resources: build_resources(&sidecar.resources),
        volume_mounts: Some(build_volume_mounts(&sidecar.volume_mounts, configuration)),
        security_context: build_security_context(&sidecar.security_context),
        ..Container::default()
    });
    let containers = tier.containers.iter().map(|container| Container {
        name: container.name.clone(),
        image: Some(scope.base_image.clone()),
        command: Some(container.command.clone()),
        args: Some(container.args.clone()),
        resources: build_resources(&container.resources),
        ports: Some(container.ports.iter().map(build_container_port).collect()),
        volume_mounts: Some(build_volume_mounts(&container.volume_mounts, configuration)),
        security_context: build_security_context(&container.security_context),
        liveness_probe: build_probe(&container.liveness_probe),
        readiness_probe: build_probe(&container.readiness_probe),
        startup_probe: build_probe(&container.startup_probe),
        lifecycle: build_lifecycle(&container.lifecycle),
        ..Container::default()
    });
    let init_containers = tier
        .init_containers
        .iter()
        .filter(|init| !init.is_bootstrap || scope.bootstrap)
        .map(|init| Container {
            name: init.name.clone(),
            image: Some(scope.base_image.clone()),
            command: Some(init.command.clone()),
            args: Some(init.args.clone()),
            resources: build_resources(&init.resources),
            volume_mounts: Some(build_volume_mounts(&init.volume_mounts, configuration)),
            security_context: build_security_context(&init.security_context),
            ..Container::default()
        });

    PodSpec {
        containers: sidecars.chain(containers).collect(),
        init_containers: Some(init_containers.collect()),
        volumes: Some(build_volumes(configuration, &tier.volumes)),
        security_context: Some(PodSecurityContext {
            fs_group: Some(scope.fs_group),
            ..PodSecurityContext::default()
        }),
        share_process_namespace: Some(tier.share_process_namespace),
        termination_grace_period_seconds: Some(tier.termination_grace_period_seconds),
        hostname: tier.hostname.clone().filter(|hostname| !hostname.is_empty()),
        subdomain: tier.subdomain.clone().filter(|subdomain| !subdomain.is_empty()),
        dns_policy: tier.dns_policy.clone().filter(|policy| !policy.is_empty()),
        dns_config: tier
            .dns_config
            .clone()
            .filter(|config| config != &PodDNSConfig::default()),
        host_aliases: Some(tier.host_aliases.clone()).filter(|aliases| !aliases.is_empty()),
        ..PodSpec::default()
    }
}

fn build_resources(resources: &ContainerResources) -> Option<ResourceRequirements> {
    let quantities = |cpu: &str, memory: &str| {
        let quantities = [("cpu", cpu), ("memory", memory)]
            .into_iter()
            .filter(|(_, quantity)| !quantity.is_empty())
            .map(|(resource, quantity)| (resource.to_string(), Quantity(quantity.to_string())))
            .collect::<BTreeMap<_, _>>();
        Some(quantities).filter(|quantities| !quantities.is_empty())
    };
    Some(ResourceRequirements {
        limits: quantities(&resources.cpu_limit, &resources.memory_limit),
        requests: quantities(&resources.cpu_request, &resources.memory_request),
        ..ResourceRequirements::default()
    })
}

fn build_container_port(port: &ContainerPortSpec) -> ContainerPort {
    ContainerPort {
        name: Some(port.name.clone()),
        container_port: port.port,
        ..ContainerPort::default()
    }
}

/// Declared mounts followed by the read-only HBase and Hadoop configuration mounts.
fn build_volume_mounts(
    mounts: &[VolumeMountSpec],
    configuration: &HbaseClusterConfiguration,
) -> Vec<VolumeMount> {
    let config_mounts = [
        (
            &configuration.hbase_config_name,
            &configuration.hbase_config_mount_path,
        ),
        (
            &configuration.hadoop_config_name,
            &configuration.hadoop_config_mount_path,
        ),
    ]
    .map(|(name, mount_path)| VolumeMount {
        name: name.clone(),
        mount_path: mount_path.clone(),
        read_only: Some(true),
        ..VolumeMount::default()
    });

    mounts
        .iter()
        .map(|mount| VolumeMount {
            name: mount.name.clone(),
            mount_path: mount.mount_path.clone(),
            read_only: Some(mount.read_only),
            ..VolumeMount::default()
        })
        .chain(config_mounts)
        .collect()
}

fn build_security_context(security: &SecuritySpec) -> Option<SecurityContext> {
    if security.run_as_user <= 0 {
        return None;
    }
    Some(SecurityContext {
        run_as_user: Some(security.run_as_user),
        run_as_group: Some(security.run_as_group),
        capabilities: security.add_sys_ptrace.then(|| Capabilities {
            add: Some(vec!["SYS_PTRACE".to_string()]),
            ..Capabilities::default()
        }),
        ..SecurityContext::default()
    })
}

/// An exec probe when a command is given, otherwise a TCP probe when a port is given.
fn build_probe(probe: &ProbeSpec) -> Option<Probe> {
    if !probe.is_declared() {
        return None;
    }
    let (exec, tcp_socket) = if probe.command.is_empty() {
        let tcp = TCPSocketAction {
            port: IntOrString::Int(probe.tcp_port),
            ..TCPSocketAction::default()
        };
        (None, Some(tcp))
    } else {
        let exec = ExecAction {
            command: Some(probe.command.clone()),
        };
        (Some(exec), None)
    };
    Some(Probe {
        exec,
        tcp_socket,
        initial_delay_seconds: Some(probe.initial_delay_seconds),
        timeout_seconds: Some(probe.timeout_seconds),
        period_seconds: Some(probe.period_seconds),
        success_threshold: Some(probe.success_threshold),
        failure_threshold: Some(probe.failure_threshold),
        ..Probe::default()
    })
}

fn build_lifecycle(lifecycle: &LifecycleSpec) -> Option<Lifecycle> {
    let exec_handler = |command: &Option<Vec<String>>| {
        command.as_ref().map(|command| LifecycleHandler {
            exec: Some(ExecAction {
                command: Some(command.clone()),
            }),
            ..LifecycleHandler::default()
        })
    };
    let post_start = exec_handler(&lifecycle.post_start);
    let pre_stop = exec_handler(&lifecycle.pre_stop);
    (post_start.is_some() || pre_stop.is_some()).then_some(Lifecycle {
        post_start,
        pre_stop,
    })
}

/// The HBase and Hadoop ConfigMap volumes (named after their ConfigMaps), then the declared ones.
fn build_volumes(configuration: &HbaseClusterConfiguration, volumes: &[VolumeSpec]) -> Vec<Volume> {
    let config_volumes = [
        &configuration.hbase_config_name,
        &configuration.hadoop_config_name,
    ]
    .map(|name| config_map_volume(name, name));

    config_volumes
        .into_iter()
        .chain(volumes.iter().map(|volume| match volume.volume_source {
            VolumeSourceKind::ConfigMap => config_map_volume(
                &volume.name,
                volume.config_name.as_deref().unwrap_or(&volume.name),
            ),
            VolumeSourceKind::EmptyDir => Volume {
                name: volume.name.clone(),
                empty_dir: Some(EmptyDirVolumeSource::default()),
                ..Volume::default()
            },
            VolumeSourceKind::HostPath => Volume {
                name: volume.name.clone(),
                host_path: Some(HostPathVolumeSource {
                    path: volume.path.clone().unwrap_or_default(),
                    ..HostPathVolumeSource::default()
                }),
                ..Volume::default()
            },
        }))
        .collect()
}

fn config_map_volume(name: &str, config_map: &str) -> Volume {
    Volume {
        name: name.to_string(),
        config_map: Some(ConfigMapVolumeSource {
            name: Some(config_map.to_string()),
            ..ConfigMapVolumeSource::default()
        }),
        ..Volume::default()
    }
}

fn build_volume_claim(namespace: &str, claim: &VolumeClaimSpec) -> PersistentVolumeClaim {
    PersistentVolumeClaim {
        metadata: ObjectMeta {
            name: Some(claim.name.clone()),
            namespace: Some(namespace.to_string()),
            ..ObjectMeta::default()
        },
        spec: Some(PersistentVolumeClaimSpec {
            access_modes: Some(vec!["ReadWriteOnce".to_string()]),
            storage_class_name: claim.storage_class_name.clone(),
            resources: Some(ResourceRequirements {
                requests: Some(BTreeMap::from([(
                    "storage".to_string(),
                    Quantity(claim.storage_size.clone()),
                )])),
                ..ResourceRequirements::default()
            }),
            ..PersistentVolumeClaimSpec::default()
        }),
        status: None,
    }
}

#[cfg(test)]
mod tests {
    use hbase_k8s_crd::tier::InitContainerSpec;
    use rstest::rstest;
    use serde_json::json;

    use crate::resource::fixtures::cluster_scope;

    use super::*;

    fn pod_spec(statefulset: &StatefulSet) -> &PodSpec {
        statefulset
            .spec
            .as_ref()
            .and_then(|spec| spec.template.spec.as_ref())
            .unwrap()
    }

    #[test]
    fn statefulset_carries_tier_shape() {
        let scope = cluster_scope();
        let zookeeper = &scope.tiers[0];
        let statefulset = build_statefulset(&scope, zookeeper, "42");
        let spec = statefulset.spec.as_ref().unwrap();

        assert_eq!(Some("zookeeper".to_string()), statefulset.metadata.name);
        assert_eq!(Some(3), spec.replicas);
        assert_eq!("hbase", spec.service_name);
        assert_eq!(Some("Parallel"), spec.pod_management_policy.as_deref());
        assert_eq!(
            Some(&"zookeeper".to_string()),
            spec.selector.match_labels.as_ref().unwrap().get(TIER_LABEL)
        );

        let template_meta = spec.template.metadata.as_ref().unwrap();
        assert_eq!(
            Some(&"42".to_string()),
            template_meta
                .annotations
                .as_ref()
                .unwrap()
                .get(CONFIG_VERSION_ANNOTATION)
        );
        let labels = template_meta.labels.as_ref().unwrap();
        for (key, value) in spec.selector.match_labels.as_ref().unwrap() {
            assert_eq!(Some(value), labels.get(key));
        }

        let claims = spec.volume_claim_templates.as_ref().unwrap();
        assert_eq!(1, claims.len());
        let claim_spec = claims[0].spec.as_ref().unwrap();
        assert_eq!(
            Some(vec!["ReadWriteOnce".to_string()]),
            claim_spec.access_modes
        );
        assert_eq!(None, claim_spec.storage_class_name);
    }

    #[test]
    fn pod_spec_defaults() {
        let scope = cluster_scope();
        let statefulset = build_statefulset(&scope, &scope.tiers[0], "");
        let pod = pod_spec(&statefulset);

        assert_eq!(Some(1011), pod.security_context.as_ref().unwrap().fs_group);
        assert_eq!(Some(false), pod.share_process_namespace);
        assert_eq!(Some(60), pod.termination_grace_period_seconds);
        assert_eq!(None, pod.hostname);
        assert_eq!(None, pod.dns_policy);
        assert_eq!(None, pod.host_aliases);

        let volumes = pod
            .volumes
            .as_ref()
            .unwrap()
            .iter()
            .map(|volume| volume.name.as_str())
            .collect::<Vec<_>>();
        assert_eq!(vec!["hbase-config", "hadoop-config"], volumes);
    }

    #[test]
    fn declared_dns_fields_reach_the_pod() {
        let mut scope = cluster_scope();
        let tier = &mut scope.tiers[0];
        tier.hostname = Some("zk".to_string());
        tier.subdomain = Some("hbase".to_string());
        tier.dns_policy = Some("ClusterFirstWithHostNet".to_string());
        tier.dns_config = Some(
            serde_json::from_value(json!({
                "nameservers": ["10.0.0.53"],
                "searches": ["hbase.svc.cluster.local"],
            }))
            .unwrap(),
        );
        tier.host_aliases = vec![serde_json::from_value(json!({
            "ip": "10.0.0.1",
            "hostnames": ["namenode.local"],
        }))
        .unwrap()];
        tier.volume_claims[0].storage_class_name = Some("fast-ssd".to_string());

        let statefulset = build_statefulset(&scope, &scope.tiers[0], "");
        let pod = pod_spec(&statefulset);

        assert_eq!(Some("zk"), pod.hostname.as_deref());
        assert_eq!(Some("hbase"), pod.subdomain.as_deref());
        assert_eq!(Some("ClusterFirstWithHostNet"), pod.dns_policy.as_deref());
        assert_eq!(
            Some(vec!["10.0.0.53".to_string()]),
            pod.dns_config.as_ref().and_then(|config| config.nameservers.clone())
        );
        assert_eq!(
            Some(vec!["namenode.local".to_string()]),
            pod.host_aliases.as_ref().unwrap()[0].hostnames
        );
        let claims = statefulset
            .spec
            .as_ref()
            .and_then(|spec| spec.volume_claim_templates.as_ref())
            .unwrap();
        assert_eq!(
            Some("fast-ssd"),
            claims[0]
                .spec
                .as_ref()
                .and_then(|spec| spec.storage_class_name.as_deref())
        );
    }

    #[rstest]
    #[case(Some(""), None)]
    #[case(None, None)]
    #[case(Some("zk"), Some("zk"))]
    fn hostname_is_set_only_when_non_empty(
        #[case] hostname: Option<&str>,
        #[case] expected: Option<&str>,
    ) {
        let mut scope = cluster_scope();
        scope.tiers[0].hostname = hostname.map(str::to_string);
        scope.tiers[0].subdomain = hostname.map(str::to_string);
        scope.tiers[0].dns_config = Some(PodDNSConfig::default());

        let statefulset = build_statefulset(&scope, &scope.tiers[0], "");
        let pod = pod_spec(&statefulset);

        assert_eq!(expected, pod.hostname.as_deref());
        assert_eq!(expected, pod.subdomain.as_deref());
        assert_eq!(None, pod.dns_config);
    }

    #[test]
    fn containers_get_base_image_and_config_mounts() {
        let scope = cluster_scope();
        let statefulset = build_statefulset(&scope, &scope.tiers[0], "");
        let container = &pod_spec(&statefulset).containers[0];

        assert_eq!(Some("hbase:2.4.8"), container.image.as_deref());
        let mounts = container.volume_mounts.as_ref().unwrap();
        assert_eq!(
            vec![("hbase-config", "/etc/hbase"), ("hadoop-config", "/etc/hadoop")],
            mounts
                .iter()
                .map(|mount| (mount.name.as_str(), mount.mount_path.as_str()))
                .collect::<Vec<_>>()
        );
        assert!(mounts.iter().all(|mount| mount.read_only == Some(true)));

        let resources = container.resources.as_ref().unwrap();
        assert_eq!(
            Some(&Quantity("1".to_string())),
            resources.limits.as_ref().unwrap().get("cpu")
        );
        assert!(!resources.limits.as_ref().unwrap().contains_key("memory"));
        assert_eq!(
            Some(&Quantity("1Gi".to_string())),
            resources.requests.as_ref().unwrap().get("memory")
        );

        let liveness = container.liveness_probe.as_ref().unwrap();
        assert_eq!(
            Some(IntOrString::Int(2181)),
            liveness.tcp_socket.as_ref().map(|tcp| tcp.port.clone())
        );
        assert_eq!(Some(30), liveness.initial_delay_seconds);
        assert_eq!(None, container.readiness_probe);
        assert_eq!(None, container.security_context);
        assert_eq!(None, container.lifecycle);
    }

    #[test]
    fn sidecars_come_first_with_their_own_image() {
        let mut scope = cluster_scope();
        scope.tiers[0]
            .sidecar_containers
            .push(hbase_k8s_crd::tier::SidecarContainerSpec {
                name: "exporter".to_string(),
                image: "exporter:1.0".to_string(),
                ..Default::default()
            });
        let statefulset = build_statefulset(&scope, &scope.tiers[0], "");
        let containers = &pod_spec(&statefulset).containers;

        assert_eq!("exporter", containers[0].name);
        assert_eq!(Some("exporter:1.0"), containers[0].image.as_deref());
        assert_eq!("zookeeper", containers[1].name);
        assert_eq!(2, containers[0].volume_mounts.as_ref().unwrap().len());
    }

    #[rstest]
    #[case(false, vec!["always"])]
    #[case(true, vec!["always", "format"])]
    fn bootstrap_init_containers(#[case] bootstrap: bool, #[case] expected: Vec<&str>) {
        let mut scope = cluster_scope();
        scope.bootstrap = bootstrap;
        scope.tiers[2].init_containers = vec![
            InitContainerSpec {
                name: "always".to_string(),
                ..Default::default()
            },
            InitContainerSpec {
                name: "format".to_string(),
                is_bootstrap: true,
                ..Default::default()
            },
        ];
        let statefulset = build_statefulset(&scope, &scope.tiers[2], "");
        let names = pod_spec(&statefulset)
            .init_containers
            .as_ref()
            .unwrap()
            .iter()
            .map(|container| container.name.as_str())
            .collect::<Vec<_>>();
        assert_eq!(expected, names);
    }

    #[rstest]
    #[case(0, false, None, None)]
    #[case(1000, false, Some(1000), None)]
    #[case(1000, true, Some(1000), Some(vec!["SYS_PTRACE".to_string()]))]
    #[case(0, true, None, None)]
    fn security_context(
        #[case] run_as_user: i64,
        #[case] add_sys_ptrace: bool,
        #[case] expected_user: Option<i64>,
        #[case] expected_caps: Option<Vec<String>>,
    ) {
        let context = build_security_context(&SecuritySpec {
            run_as_user,
            run_as_group: 1000,
            add_sys_ptrace,
        });
        assert_eq!(
            expected_user,
            context.as_ref().and_then(|context| context.run_as_user)
        );
        assert_eq!(
            expected_caps,
            context
                .and_then(|context| context.capabilities)
                .and_then(|capabilities| capabilities.add)
        );
    }

    #[test]
    fn exec_probe_wins_over_tcp() {
        let probe = build_probe(&ProbeSpec {
            command: vec!["/bin/check".to_string()],
            tcp_port: 8080,
            ..ProbeSpec::default()
        })
        .unwrap();
        assert!(probe.tcp_socket.is_none());
        assert_eq!(
            Some(vec!["/bin/check".to_string()]),
            probe.exec.and_then(|exec| exec.command)
        );
        assert_eq!(None, build_probe(&ProbeSpec::default()));
    }

    #[test]
    fn declared_volumes_follow_config_volumes() {
        let volumes = build_volumes(
            &cluster_scope().configuration,
            &[
                VolumeSpec {
                    name: "logs".to_string(),
                    volume_source: VolumeSourceKind::EmptyDir,
                    config_name: None,
                    path: None,
                },
                VolumeSpec {
                    name: "scripts".to_string(),
                    volume_source: VolumeSourceKind::ConfigMap,
                    config_name: Some("hbase-scripts".to_string()),
                    path: None,
                },
                VolumeSpec {
                    name: "host".to_string(),
                    volume_source: VolumeSourceKind::HostPath,
                    config_name: None,
                    path: Some("/var/lib/hbase".to_string()),
                },
            ],
        );
        assert_eq!(5, volumes.len());
        assert!(volumes[2].empty_dir.is_some());
        assert_eq!(
            Some("hbase-scripts"),
            volumes[3]
                .config_map
                .as_ref()
                .and_then(|config_map| config_map.name.as_deref())
        );
        assert_eq!(
            "/var/lib/hbase",
            volumes[4].host_path.as_ref().unwrap().path
        );
    }

    #[test]
    fn lifecycle_hooks_are_exec_handlers() {
        let lifecycle = build_lifecycle(&LifecycleSpec {
            post_start: None,
            pre_stop: Some(vec!["/bin/drain".to_string()]),
        })
        .unwrap();
        assert!(lifecycle.post_start.is_none());
        assert_eq!(
            Some(vec!["/bin/drain".to_string()]),
            lifecycle
                .pre_stop
                .and_then(|handler| handler.exec)
                .and_then(|exec| exec.command)
        );
    }

    #[test]
    fn builder_is_pure() {
        let scope = cluster_scope();
        assert_eq!(
            build_statefulset(&scope, &scope.tiers[1], "7"),
            build_statefulset(&scope, &scope.tiers[1], "7")
        );
    }
}
