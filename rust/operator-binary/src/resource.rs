//! Reduces each custom resource kind to the shape the reconcile engine works on: a list of tiers,
//! a set of target namespaces and a few kind-specific switches.

use std::collections::BTreeMap;

use hbase_k8s_crd::{
    HbaseCluster, HbaseClusterConfiguration, HbaseStandalone, HbaseTenant, TierSpec,
};
use snafu::{OptionExt, ResultExt, Snafu};
use stackable_operator::{
    k8s_openapi::{
        api::core::v1::ObjectReference, apimachinery::pkg::apis::meta::v1::OwnerReference,
    },
    kube::{Resource, ResourceExt},
};

use crate::kube_api::NamespacedObject;

#[derive(Snafu, Debug)]
pub enum Error {
    #[snafu(display("object has no namespace"))]
    ObjectHasNoNamespace,

    #[snafu(display("object is missing metadata to build owner reference"))]
    ObjectMissingMetadataForOwnerRef,

    #[snafu(display("invalid tier layout"))]
    InvalidTiers { source: hbase_k8s_crd::Error },
}

/// Everything one reconcile pass needs to know about the resource, snapshotted once at the start.
#[derive(Clone, Debug)]
pub struct ReconcileScope {
    pub name: String,
    pub namespace: String,
    pub owner: OwnerReference,
    pub object_ref: ObjectReference,
    pub base_image: String,
    pub fs_group: i64,
    /// Include init containers marked as bootstrap-only.
    pub bootstrap: bool,
    pub configuration: HbaseClusterConfiguration,
    /// In rollout order.
    pub tiers: Vec<TierSpec>,
    pub tenant_namespaces: Vec<String>,
    pub service_labels: BTreeMap<String, String>,
    pub selector_labels: BTreeMap<String, String>,
    /// Whether this resource writes its ConfigMaps.
    pub reconcile_config_maps: bool,
    /// Whether pod templates follow the live ConfigMap resource version.
    pub track_config_version: bool,
}

impl ReconcileScope {
    /// The resource's own namespace first, then every tenant namespace, without duplicates.
    pub fn target_namespaces(&self) -> Vec<&str> {
        let mut namespaces = vec![self.namespace.as_str()];
        for namespace in &self.tenant_namespaces {
            if !namespaces.contains(&namespace.as_str()) {
                namespaces.push(namespace);
            }
        }
        namespaces
    }
}

/// A custom resource kind the reconcile engine can converge.
pub trait HbaseResource: NamespacedObject {
    fn scope(&self) -> Result<ReconcileScope, Error>;
}

/// The kind-independent part of a scope. Kind-specific fields start out empty.
fn base_scope<K: NamespacedObject>(
    resource: &K,
    configuration: &HbaseClusterConfiguration,
    base_image: &str,
    fs_group: i64,
    service_labels: &BTreeMap<String, String>,
    selector_labels: &BTreeMap<String, String>,
) -> Result<ReconcileScope, Error> {
    Ok(ReconcileScope {
        name: resource.name_any(),
        namespace: resource.namespace().context(ObjectHasNoNamespaceSnafu)?,
        owner: resource
            .controller_owner_ref(&())
            .context(ObjectMissingMetadataForOwnerRefSnafu)?,
        object_ref: resource.object_ref(&()),
        base_image: base_image.to_string(),
        fs_group,
        bootstrap: false,
        configuration: configuration.clone(),
        tiers: Vec::new(),
        tenant_namespaces: Vec::new(),
        service_labels: service_labels.clone(),
        selector_labels: selector_labels.clone(),
        reconcile_config_maps: true,
        track_config_version: false,
    })
}

impl HbaseResource for HbaseCluster {
    fn scope(&self) -> Result<ReconcileScope, Error> {
        let spec = &self.spec;
        Ok(ReconcileScope {
            bootstrap: spec.is_bootstrap,
            tiers: self
                .tiers()
                .context(InvalidTiersSnafu)?
                .into_iter()
                .cloned()
                .collect(),
            tenant_namespaces: spec.tenant_namespaces.clone(),
            track_config_version: self.config_reconcile_enabled(),
            ..base_scope(
                self,
                &spec.configuration,
                &spec.base_image,
                spec.fsgroup,
                &spec.service_labels,
                &spec.service_selector_labels,
            )?
        })
    }
}

impl HbaseResource for HbaseTenant {
    fn scope(&self) -> Result<ReconcileScope, Error> {
        let spec = &self.spec;
        let enabled = self.config_reconcile_enabled();
        Ok(ReconcileScope {
            tiers: vec![spec.datanode.clone()],
            reconcile_config_maps: enabled,
            track_config_version: enabled,
            ..base_scope(
                self,
                &spec.configuration,
                &spec.base_image,
                spec.fsgroup,
                &spec.service_labels,
                &spec.service_selector_labels,
            )?
        })
    }
}

impl HbaseResource for HbaseStandalone {
    fn scope(&self) -> Result<ReconcileScope, Error> {
        let spec = &self.spec;
        Ok(ReconcileScope {
            tiers: vec![spec.standalone.clone()],
            track_config_version: self.config_reconcile_enabled(),
            ..base_scope(
                self,
                &spec.configuration,
                &spec.base_image,
                spec.fsgroup,
                &spec.service_labels,
                &spec.service_selector_labels,
            )?
        })
    }
}
