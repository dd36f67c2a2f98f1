use std::collections::BTreeMap;

use hbase_k8s_crd::TenantOverlay;
use snafu::{ResultExt, Snafu};
use stackable_operator::{
    builder::{ConfigMapBuilder, ObjectMetaBuilder},
    k8s_openapi::api::core::v1::ConfigMap,
};

use crate::{config::merged_config, resource::ReconcileScope};

#[derive(Snafu, Debug)]
pub enum Error {
    #[snafu(display("failed to build ConfigMap [{name}] in namespace [{namespace}]"))]
    BuildConfigMap {
        source: stackable_operator::error::Error,
        name: String,
        namespace: String,
    },
}

/// Which of the two configuration sets a ConfigMap carries.
#[derive(Clone, Copy, Debug, Eq, PartialEq, strum::Display)]
#[strum(serialize_all = "lowercase")]
pub enum ConfigSet {
    Hbase,
    Hadoop,
}

impl ConfigSet {
    pub const ALL: [ConfigSet; 2] = [ConfigSet::Hbase, ConfigSet::Hadoop];

    pub fn config_map_name(self, scope: &ReconcileScope) -> &str {
        match self {
            ConfigSet::Hbase => &scope.configuration.hbase_config_name,
            ConfigSet::Hadoop => &scope.configuration.hadoop_config_name,
        }
    }

    fn files(self, scope: &ReconcileScope) -> (&BTreeMap<String, String>, &[TenantOverlay]) {
        let configuration = &scope.configuration;
        match self {
            ConfigSet::Hbase => (
                &configuration.hbase_config,
                &configuration.hbase_tenant_config,
            ),
            ConfigSet::Hadoop => (
                &configuration.hadoop_config,
                &configuration.hadoop_tenant_config,
            ),
        }
    }
}

/// The ConfigMap for `set` in `namespace`, with that namespace's overlays applied.
///
/// Only copies in the resource's own namespace carry an owner reference; Kubernetes does not
/// allow owners in another namespace.
pub fn build_config_map(
    scope: &ReconcileScope,
    set: ConfigSet,
    namespace: &str,
) -> Result<ConfigMap, Error> {
    let name = set.config_map_name(scope);
    let (base, overlays) = set.files(scope);

    let mut metadata = ObjectMetaBuilder::new();
    metadata
        .name(name)
        .namespace(namespace)
        .with_labels(scope.service_labels.clone());
    if namespace == scope.namespace {
        metadata.ownerreference(scope.owner.clone());
    }

    let mut builder = ConfigMapBuilder::new();
    builder.metadata(metadata.build());
    for (file, content) in merged_config(base, overlays, namespace) {
        builder.add_data(file, content);
    }
    builder.build().with_context(|_| BuildConfigMapSnafu {
        name,
        namespace,
    })
}
