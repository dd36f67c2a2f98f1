use std::collections::BTreeMap;

use hbase_k8s_crd::TenantOverlay;

pub mod validation;

pub const HBASE_SITE_XML: &str = "hbase-site.xml";
pub const HBASE_POLICY_XML: &str = "hbase-policy.xml";
pub const HBASE_ENV_SH: &str = "hbase-env.sh";
pub const CORE_SITE_XML: &str = "core-site.xml";
pub const HDFS_SITE_XML: &str = "hdfs-site.xml";
pub const HADOOP_ENV_SH: &str = "hadoop-env.sh";

/// The configuration files for one target namespace: `base` with every overlay declared for
/// `namespace` layered on top, in declaration order.
///
/// Overlays for other namespaces never contribute.
pub fn merged_config(
    base: &BTreeMap<String, String>,
    overlays: &[TenantOverlay],
    namespace: &str,
) -> BTreeMap<String, String> {
    let mut merged = base.clone();
    for overlay in overlays.iter().filter(|overlay| overlay.namespace == namespace) {
        merged.extend(
            overlay
                .overrides
                .iter()
                .map(|(file, content)| (file.clone(), content.clone())),
        );
    }
    merged
}
