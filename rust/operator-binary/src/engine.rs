//! Converges one custom resource, whatever its kind, into Services, ConfigMaps, StatefulSets and
//! PodDisruptionBudgets.
//!
//! A pass walks a fixed order: the cluster Service, configuration validation, the ConfigMaps of
//! every target namespace, then each tier in rollout order. The first object that asks for a retry
//! ends the pass, so a tier is only touched once every tier before it is fully rolled out.

use std::time::Duration;

use hbase_k8s_crd::{TierSpec, CONFIG_VERSION_ANNOTATION};
use snafu::{ResultExt, Snafu};
use stackable_operator::{
    k8s_openapi::api::{apps::v1::StatefulSet, core::v1::ConfigMap},
    kube,
    logging::controller::ReconcilerError,
};
use strum::{EnumDiscriminants, IntoStaticStr};

use crate::{
    apply::{self, apply_with_live, fetch, reconcile_object, ReconcileOutcome, TRANSIENT_REQUEUE},
    config::validation::{self, validate_configuration},
    config_map::{self, build_config_map, ConfigSet},
    events::{publish_warning, EventReason},
    hash_store::HashStore,
    kube_api::ObjectApi,
    operations::pdb::build_pdb,
    resource::{self, HbaseResource, ReconcileScope},
    service::{build_cluster_service, build_replica_service},
    statefulset::build_statefulset,
};

#[derive(Snafu, Debug, EnumDiscriminants)]
#[strum_discriminants(derive(IntoStaticStr))]
pub enum Error {
    #[snafu(display("failed to get {kind} {namespace}/{name}"))]
    GetResource {
        source: kube::Error,
        kind: String,
        namespace: String,
        name: String,
    },

    #[snafu(display("invalid resource"))]
    InvalidResource { source: resource::Error },

    #[snafu(display("invalid configuration"))]
    ValidateConfiguration { source: validation::Error },

    #[snafu(display("failed to build ConfigMap"))]
    BuildConfigMap { source: config_map::Error },

    #[snafu(display("failed to apply {}", source.identity()))]
    ApplyObject { source: apply::Error },
}

impl Error {
    /// The fixed retry for transient API failures. `None` leaves the delay to the default backoff.
    pub fn requeue_after(&self) -> Option<Duration> {
        match self {
            Error::GetResource { .. } | Error::ApplyObject { .. } => Some(TRANSIENT_REQUEUE),
            Error::InvalidResource { .. }
            | Error::ValidateConfiguration { .. }
            | Error::BuildConfigMap { .. } => None,
        }
    }
}

impl ReconcilerError for Error {
    fn category(&self) -> &'static str {
        ErrorDiscriminants::from(self).into()
    }
}

type Result<T, E = Error> = std::result::Result<T, E>;

/// Fetches the resource `namespace/name` of kind `K` and converges it.
///
/// A resource that no longer exists needs nothing; its objects are garbage collected through
/// their owner references.
pub async fn reconcile_resource<K, A>(
    api: &A,
    hashes: &HashStore,
    namespace: &str,
    name: &str,
) -> Result<ReconcileOutcome>
where
    K: HbaseResource,
    A: ObjectApi,
{
    let resource = api
        .get::<K>(namespace, name)
        .await
        .with_context(|_| GetResourceSnafu {
            kind: K::kind(&()),
            namespace,
            name,
        })?;
    let Some(resource) = resource else {
        tracing::debug!("resource no longer exists");
        return Ok(ReconcileOutcome::Done);
    };
    let scope = resource.scope().context(InvalidResourceSnafu)?;
    converge(api, hashes, &scope).await
}

pub async fn converge<A: ObjectApi>(
    api: &A,
    hashes: &HashStore,
    scope: &ReconcileScope,
) -> Result<ReconcileOutcome> {
    let outcome = reconcile_service(api, hashes, scope, build_cluster_service(scope)).await?;
    if outcome != ReconcileOutcome::Done {
        return Ok(outcome);
    }

    if let Err(err) = validate_configuration(&scope.configuration) {
        publish_warning(
            api,
            scope,
            EventReason::ConfigValidateFailed,
            &error_chain(&err),
        )
        .await;
        return Err(err).context(ValidateConfigurationSnafu);
    }

    if scope.reconcile_config_maps {
        for namespace in scope.target_namespaces() {
            for set in ConfigSet::ALL {
                let config_map =
                    build_config_map(scope, set, namespace).context(BuildConfigMapSnafu)?;
                let outcome = reconcile_object(api, hashes, config_map)
                    .await
                    .context(ApplyObjectSnafu)?;
                if outcome != ReconcileOutcome::Done {
                    return Ok(outcome);
                }
            }
        }
    }

    let tracked_version = if scope.track_config_version {
        let name = ConfigSet::Hbase.config_map_name(scope);
        let config_map = fetch::<A, ConfigMap>(api, &scope.namespace, name)
            .await
            .context(ApplyObjectSnafu)?;
        let Some(config_map) = config_map else {
            tracing::info!(config_map = name, "governing ConfigMap does not exist yet");
            return Ok(ReconcileOutcome::RequeueAfter(TRANSIENT_REQUEUE));
        };
        Some(config_map.metadata.resource_version.unwrap_or_default())
    } else {
        None
    };

    for tier in &scope.tiers {
        let outcome = reconcile_tier(api, hashes, scope, tier, tracked_version.as_deref()).await?;
        if let ReconcileOutcome::RequeueAfter(delay) = outcome {
            tracing::info!(
                tier = tier.name,
                delay_secs = delay.as_secs(),
                "tier has not converged, holding back later tiers"
            );
            return Ok(outcome);
        }
    }

    Ok(ReconcileOutcome::Done)
}

async fn reconcile_tier<A: ObjectApi>(
    api: &A,
    hashes: &HashStore,
    scope: &ReconcileScope,
    tier: &TierSpec,
    tracked_version: Option<&str>,
) -> Result<ReconcileOutcome> {
    if tier.requires_per_replica_service {
        for pod_name in tier.replica_names() {
            let service = build_replica_service(scope, tier, &pod_name);
            let outcome = reconcile_service(api, hashes, scope, service).await?;
            if outcome != ReconcileOutcome::Done {
                return Ok(outcome);
            }
        }
    }

    let live = fetch::<A, StatefulSet>(api, &scope.namespace, &tier.name)
        .await
        .context(ApplyObjectSnafu)?;
    let config_version = match tracked_version {
        Some(version) => version.to_string(),
        None => carried_config_version(live.as_ref()),
    };
    let statefulset = build_statefulset(scope, tier, &config_version);
    let outcome = apply_with_live(api, hashes, statefulset, live)
        .await
        .context(ApplyObjectSnafu)?;
    if outcome != ReconcileOutcome::Done {
        return Ok(outcome);
    }

    match build_pdb(scope, tier) {
        Some(pdb) => reconcile_object(api, hashes, pdb)
            .await
            .context(ApplyObjectSnafu),
        None => Ok(ReconcileOutcome::Done),
    }
}

/// The config version already stamped on a live StatefulSet, empty for a new one.
fn carried_config_version(live: Option<&StatefulSet>) -> String {
    live.and_then(|statefulset| statefulset.spec.as_ref())
        .and_then(|spec| spec.template.metadata.as_ref())
        .and_then(|metadata| metadata.annotations.as_ref())
        .and_then(|annotations| annotations.get(CONFIG_VERSION_ANNOTATION))
        .cloned()
        .unwrap_or_default()
}

/// Like [`reconcile_object`], but a failed create is also reported as an event on the resource.
async fn reconcile_service<A: ObjectApi>(
    api: &A,
    hashes: &HashStore,
    scope: &ReconcileScope,
    service: stackable_operator::k8s_openapi::api::core::v1::Service,
) -> Result<ReconcileOutcome> {
    match reconcile_object(api, hashes, service).await {
        Err(err @ apply::Error::CreateObject { .. }) => {
            publish_warning(
                api,
                scope,
                EventReason::CreateServiceFailed,
                &error_chain(&err),
            )
            .await;
            Err(err).context(ApplyObjectSnafu)
        }
        result => result.context(ApplyObjectSnafu),
    }
}

fn error_chain(err: &dyn std::error::Error) -> String {
    let mut message = err.to_string();
    let mut source = err.source();
    while let Some(cause) = source {
        message.push_str(": ");
        message.push_str(&cause.to_string());
        source = cause.source();
    }
    message
}
