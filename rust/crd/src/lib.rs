use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};
use snafu::{ensure, Snafu};
use stackable_operator::{
    kube::CustomResource,
    schemars::{self, JsonSchema},
};

pub mod configuration;
pub mod tier;

pub use crate::{
    configuration::{HbaseClusterConfiguration, TenantOverlay},
    tier::TierSpec,
};

pub const APP_NAME: &str = "hbase";

pub const APP_LABEL: &str = "app";
pub const APP_LABEL_VALUE: &str = "hbasecluster";
/// Selects every pod belonging to one custom resource.
pub const CLUSTER_SELECTOR_LABEL: &str = "hbasecluster_cr";
/// Set by the StatefulSet controller on every pod; used to pin per-replica Services to one pod.
pub const POD_NAME_LABEL: &str = "statefulset.kubernetes.io/pod-name";
pub const TIER_LABEL: &str = "hbase-operator/tier";

pub const CONFIG_VERSION_ANNOTATION: &str = "hbase-operator/config-version";

pub const CLUSTER_CONFIG_RECONCILE_LABEL: &str = "hbase-operator/cluster-config-reconcile";
pub const TENANT_CONFIG_RECONCILE_LABEL: &str = "hbase-operator/tenant-config-reconcile";

#[derive(Snafu, Debug)]
pub enum Error {
    #[snafu(display("tier name [{name}] is declared more than once"))]
    DuplicateTierName { name: String },
}

type Result<T, E = Error> = std::result::Result<T, E>;

#[derive(Clone, CustomResource, Debug, Deserialize, JsonSchema, PartialEq, Serialize)]
#[kube(
    group = "kvstore.flipkart.com",
    version = "v1",
    kind = "HbaseCluster",
    plural = "hbaseclusters",
    namespaced,
    crates(
        kube_core = "stackable_operator::kube::core",
        k8s_openapi = "stackable_operator::k8s_openapi",
        schemars = "stackable_operator::schemars"
    )
)]
#[serde(rename_all = "camelCase")]
pub struct HbaseClusterSpec {
    pub deployments: HbaseClusterDeployments,
    pub configuration: HbaseClusterConfiguration,
    #[serde(default)]
    pub fsgroup: i64,
    /// Enables init containers flagged as bootstrap-only.
    #[serde(default)]
    pub is_bootstrap: bool,
    pub base_image: String,
    /// Namespaces that receive a copy of the configuration, with their tenant overlays applied.
    #[serde(default)]
    pub tenant_namespaces: Vec<String>,
    #[serde(default)]
    pub service_labels: BTreeMap<String, String>,
    #[serde(default)]
    pub service_selector_labels: BTreeMap<String, String>,
}

#[derive(Clone, Debug, Default, Deserialize, JsonSchema, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HbaseClusterDeployments {
    /// Optional; a tier of size zero is treated as absent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub zookeeper: Option<TierSpec>,
    pub journalnode: TierSpec,
    pub namenode: TierSpec,
    pub datanode: TierSpec,
    pub hmaster: TierSpec,
}

impl HbaseCluster {
    /// The tiers in rollout order: ZooKeeper (if it has replicas), JournalNode, NameNode, DataNode,
    /// HMaster.
    pub fn tiers(&self) -> Result<Vec<&TierSpec>> {
        let deployments = &self.spec.deployments;
        let tiers = deployments
            .zookeeper
            .iter()
            .filter(|zookeeper| zookeeper.size != 0)
            .chain([
                &deployments.journalnode,
                &deployments.namenode,
                &deployments.datanode,
                &deployments.hmaster,
            ])
            .collect::<Vec<_>>();
        ensure_unique_tier_names(&tiers)?;
        Ok(tiers)
    }

    pub fn config_reconcile_enabled(&self) -> bool {
        flag_enabled(&self.spec.service_labels, CLUSTER_CONFIG_RECONCILE_LABEL)
    }
}

#[derive(Clone, CustomResource, Debug, Deserialize, JsonSchema, PartialEq, Serialize)]
#[kube(
    group = "kvstore.flipkart.com",
    version = "v1",
    kind = "HbaseTenant",
    plural = "hbasetenants",
    namespaced,
    crates(
        kube_core = "stackable_operator::kube::core",
        k8s_openapi = "stackable_operator::k8s_openapi",
        schemars = "stackable_operator::schemars"
    )
)]
#[serde(rename_all = "camelCase")]
pub struct HbaseTenantSpec {
    pub datanode: TierSpec,
    pub configuration: HbaseClusterConfiguration,
    #[serde(default)]
    pub fsgroup: i64,
    pub base_image: String,
    #[serde(default)]
    pub service_labels: BTreeMap<String, String>,
    #[serde(default)]
    pub service_selector_labels: BTreeMap<String, String>,
}

impl HbaseTenant {
    pub fn config_reconcile_enabled(&self) -> bool {
        flag_enabled(&self.spec.service_labels, TENANT_CONFIG_RECONCILE_LABEL)
    }
}

#[derive(Clone, CustomResource, Debug, Deserialize, JsonSchema, PartialEq, Serialize)]
#[kube(
    group = "kvstore.flipkart.com",
    version = "v1",
    kind = "HbaseStandalone",
    plural = "hbasestandalones",
    namespaced,
    crates(
        kube_core = "stackable_operator::kube::core",
        k8s_openapi = "stackable_operator::k8s_openapi",
        schemars = "stackable_operator::schemars"
    )
)]
#[serde(rename_all = "camelCase")]
pub struct HbaseStandaloneSpec {
    pub standalone: TierSpec,
    pub configuration: HbaseClusterConfiguration,
    #[serde(default)]
    pub fsgroup: i64,
    pub base_image: String,
    #[serde(default)]
    pub service_labels: BTreeMap<String, String>,
    #[serde(default)]
    pub service_selector_labels: BTreeMap<String, String>,
}

impl HbaseStandalone {
    pub fn config_reconcile_enabled(&self) -> bool {
        flag_enabled(&self.spec.service_labels, CLUSTER_CONFIG_RECONCILE_LABEL)
    }
}

/// Feature flags are carried as labels; `true` and `yes` switch them on.
pub fn flag_enabled(labels: &BTreeMap<String, String>, flag: &str) -> bool {
    matches!(labels.get(flag).map(String::as_str), Some("true" | "yes"))
}

fn ensure_unique_tier_names(tiers: &[&TierSpec]) -> Result<()> {
    let mut seen = BTreeSet::new();
    for tier in tiers {
        ensure!(
            seen.insert(tier.name.as_str()),
            DuplicateTierNameSnafu {
                name: tier.name.clone()
            }
        );
    }
    Ok(())
}
