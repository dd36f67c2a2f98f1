use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use stackable_operator::schemars::{self, JsonSchema};

/// Configuration files shared by every tier, keyed by file name (e.g. `hbase-site.xml`).
#[derive(Clone, Debug, Default, Deserialize, Eq, JsonSchema, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HbaseClusterConfiguration {
    /// Name of the ConfigMap holding the HBase configuration files.
    pub hbase_config_name: String,
    pub hbase_config_mount_path: String,
    #[serde(default)]
    pub hbase_config: BTreeMap<String, String>,
    /// Name of the ConfigMap holding the Hadoop configuration files.
    pub hadoop_config_name: String,
    pub hadoop_config_mount_path: String,
    #[serde(default)]
    pub hadoop_config: BTreeMap<String, String>,
    /// Per-namespace overrides layered on top of `hbaseConfig`.
    #[serde(default)]
    pub hbase_tenant_config: Vec<TenantOverlay>,
    /// Per-namespace overrides layered on top of `hadoopConfig`.
    #[serde(default)]
    pub hadoop_tenant_config: Vec<TenantOverlay>,
}

impl HbaseClusterConfiguration {
    /// All base configuration files (HBase first, then Hadoop), as validated before any apply.
    pub fn base_files(&self) -> impl Iterator<Item = (&String, &String)> {
        self.hbase_config.iter().chain(self.hadoop_config.iter())
    }
}

/// A set of configuration files that replace the base files for one target namespace.
#[derive(Clone, Debug, Default, Deserialize, Eq, JsonSchema, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TenantOverlay {
    pub namespace: String,
    #[serde(default)]
    pub overrides: BTreeMap<String, String>,
}
