//! The tier model: one homogeneous group of replicated pods (ZooKeeper, NameNode, ...) with its own
//! containers, volumes and replica count.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use stackable_operator::{
    k8s_openapi::{
        api::core::v1::{HostAlias, PodDNSConfig},
        apimachinery::pkg::util::intstr::IntOrString,
    },
    schemars::{self, JsonSchema},
};
use strum::{Display, EnumString};

#[derive(Clone, Debug, Default, Deserialize, JsonSchema, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TierSpec {
    /// Name of the tier. Used as the StatefulSet name and as prefix of per-replica Services.
    pub name: String,
    /// Desired number of replicas.
    #[serde(default)]
    pub size: i32,
    #[serde(default)]
    pub labels: BTreeMap<String, String>,
    #[serde(default)]
    pub annotations: BTreeMap<String, String>,
    #[serde(default)]
    pub containers: Vec<ContainerSpec>,
    #[serde(default)]
    pub sidecar_containers: Vec<SidecarContainerSpec>,
    #[serde(default)]
    pub init_containers: Vec<InitContainerSpec>,
    #[serde(default)]
    pub volume_claims: Vec<VolumeClaimSpec>,
    #[serde(default)]
    pub volumes: Vec<VolumeSpec>,
    #[serde(default, rename = "terminateGracePeriod")]
    pub termination_grace_period_seconds: i64,
    #[serde(default)]
    pub share_process_namespace: bool,
    /// Whether every replica gets its own Service selecting exactly that pod.
    #[serde(default, rename = "isPodServiceRequired")]
    pub requires_per_replica_service: bool,
    #[serde(default)]
    pub pod_management_policy: PodManagementPolicy,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hostname: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub subdomain: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dns_policy: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dns_config: Option<PodDNSConfig>,
    #[serde(default)]
    pub host_aliases: Vec<HostAlias>,
    /// Disruption policy for the tier. No PodDisruptionBudget is managed when absent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pod_disruption_budget: Option<DisruptionBudgetSpec>,
}

impl TierSpec {
    /// Name of the pod (and its per-replica Service) with the given ordinal.
    pub fn replica_name(&self, ordinal: i32) -> String {
        format!("{}-{ordinal}", self.name)
    }

    /// Names of all replicas in ordinal order, empty for a non-positive size.
    pub fn replica_names(&self) -> impl Iterator<Item = String> + '_ {
        (0..self.size.max(0)).map(|ordinal| self.replica_name(ordinal))
    }
}

#[derive(
    Clone,
    Copy,
    Debug,
    Default,
    Deserialize,
    Display,
    EnumString,
    Eq,
    JsonSchema,
    PartialEq,
    Serialize,
)]
pub enum PodManagementPolicy {
    #[default]
    Parallel,
    OrderedReady,
}

#[derive(Clone, Debug, Default, Deserialize, JsonSchema, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DisruptionBudgetSpec {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_unavailable: Option<IntOrString>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub min_available: Option<IntOrString>,
}

impl DisruptionBudgetSpec {
    pub fn is_declared(&self) -> bool {
        self.max_unavailable.is_some() || self.min_available.is_some()
    }
}

/// CPU and memory quantities, e.g. `500m` or `2Gi`. Empty values are left unset.
#[derive(Clone, Debug, Default, Deserialize, Eq, JsonSchema, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ContainerResources {
    #[serde(default)]
    pub cpu_limit: String,
    #[serde(default)]
    pub cpu_request: String,
    #[serde(default)]
    pub memory_limit: String,
    #[serde(default)]
    pub memory_request: String,
}

#[derive(Clone, Debug, Default, Deserialize, Eq, JsonSchema, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ContainerSpec {
    pub name: String,
    #[serde(default)]
    pub command: Vec<String>,
    #[serde(default)]
    pub args: Vec<String>,
    #[serde(flatten)]
    pub resources: ContainerResources,
    #[serde(default)]
    pub ports: Vec<ContainerPortSpec>,
    #[serde(default)]
    pub volume_mounts: Vec<VolumeMountSpec>,
    #[serde(default)]
    pub security_context: SecuritySpec,
    #[serde(default)]
    pub liveness_probe: ProbeSpec,
    #[serde(default)]
    pub readiness_probe: ProbeSpec,
    #[serde(default)]
    pub startup_probe: ProbeSpec,
    #[serde(default)]
    pub lifecycle: LifecycleSpec,
}

#[derive(Clone, Debug, Default, Deserialize, Eq, JsonSchema, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SidecarContainerSpec {
    pub name: String,
    pub image: String,
    #[serde(default)]
    pub command: Vec<String>,
    #[serde(default)]
    pub args: Vec<String>,
    #[serde(flatten)]
    pub resources: ContainerResources,
    #[serde(default)]
    pub security_context: SecuritySpec,
    #[serde(default)]
    pub volume_mounts: Vec<VolumeMountSpec>,
}

#[derive(Clone, Debug, Default, Deserialize, Eq, JsonSchema, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct InitContainerSpec {
    pub name: String,
    #[serde(default)]
    pub command: Vec<String>,
    #[serde(default)]
    pub args: Vec<String>,
    #[serde(flatten)]
    pub resources: ContainerResources,
    #[serde(default)]
    pub volume_mounts: Vec<VolumeMountSpec>,
    #[serde(default)]
    pub security_context: SecuritySpec,
    /// Only run while the cluster is being bootstrapped.
    #[serde(default)]
    pub is_bootstrap: bool,
}

#[derive(Clone, Debug, Default, Deserialize, Eq, Hash, JsonSchema, PartialEq, Serialize)]
pub struct ContainerPortSpec {
    pub name: String,
    pub port: i32,
}

#[derive(Clone, Debug, Default, Deserialize, Eq, JsonSchema, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct VolumeMountSpec {
    pub name: String,
    pub mount_path: String,
    #[serde(default)]
    pub read_only: bool,
}

#[derive(Clone, Debug, Default, Deserialize, Eq, JsonSchema, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SecuritySpec {
    #[serde(default)]
    pub run_as_user: i64,
    #[serde(default)]
    pub run_as_group: i64,
    #[serde(default)]
    pub add_sys_ptrace: bool,
}

/// A probe is either a TCP socket check (`tcpPort`) or an exec check (`command`).
#[derive(Clone, Debug, Default, Deserialize, Eq, JsonSchema, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ProbeSpec {
    #[serde(default)]
    pub command: Vec<String>,
    #[serde(default)]
    pub tcp_port: i32,
    #[serde(default, rename = "initialDelay")]
    pub initial_delay_seconds: i32,
    #[serde(default)]
    pub success_threshold: i32,
    #[serde(default, rename = "timeout")]
    pub timeout_seconds: i32,
    #[serde(default, rename = "period")]
    pub period_seconds: i32,
    #[serde(default)]
    pub failure_threshold: i32,
}

impl ProbeSpec {
    pub fn is_declared(&self) -> bool {
        self.tcp_port > 0 || !self.command.is_empty()
    }
}

#[derive(Clone, Debug, Default, Deserialize, Eq, JsonSchema, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LifecycleSpec {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub post_start: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pre_stop: Option<Vec<String>>,
}

#[derive(Clone, Debug, Default, Deserialize, Eq, JsonSchema, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct VolumeClaimSpec {
    pub name: String,
    pub storage_size: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub storage_class_name: Option<String>,
}

#[derive(Clone, Debug, Deserialize, Eq, JsonSchema, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct VolumeSpec {
    pub name: String,
    pub volume_source: VolumeSourceKind,
    /// Name of the ConfigMap for `ConfigMap` volumes.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub config_name: Option<String>,
    /// Host path for `HostPath` volumes.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,
}

#[derive(Clone, Copy, Debug, Deserialize, Display, Eq, JsonSchema, PartialEq, Serialize)]
pub enum VolumeSourceKind {
    ConfigMap,
    EmptyDir,
    HostPath,
}
