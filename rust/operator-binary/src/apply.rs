//! The per-object convergence step shared by every managed kind: create when missing, replace when
//! the desired state changed since it was last applied, and otherwise wait for the live object to
//! settle.

use std::time::Duration;

use snafu::{ResultExt, Snafu};
use stackable_operator::{
    k8s_openapi::api::{
        apps::v1::StatefulSet,
        core::v1::{ConfigMap, Service},
        policy::v1::PodDisruptionBudget,
    },
    kube,
};

use crate::{
    hash_store::{digest, HashStore, ObjectIdentity},
    kube_api::{NamespacedObject, ObjectApi},
};

/// Retry delay after a transient API failure, and after creating a StatefulSet.
pub const TRANSIENT_REQUEUE: Duration = Duration::from_secs(5);
/// Retry delay while a StatefulSet rolls out.
pub const ROLLOUT_REQUEUE: Duration = Duration::from_secs(20);
/// Retry delay after updating a Service or ConfigMap, giving dependants time to pick it up.
pub const SETTLE_REQUEUE: Duration = Duration::from_secs(10);

#[derive(Snafu, Debug)]
pub enum Error {
    #[snafu(display("failed to get {identity}"))]
    GetObject {
        source: kube::Error,
        identity: ObjectIdentity,
    },

    #[snafu(display("failed to create {identity}"))]
    CreateObject {
        source: kube::Error,
        identity: ObjectIdentity,
    },

    #[snafu(display("failed to update {identity}"))]
    UpdateObject {
        source: kube::Error,
        identity: ObjectIdentity,
    },

    #[snafu(display("failed to serialize {identity} for hashing"))]
    HashObject {
        source: serde_json::Error,
        identity: ObjectIdentity,
    },
}

impl Error {
    pub fn identity(&self) -> &ObjectIdentity {
        match self {
            Error::GetObject { identity, .. }
            | Error::CreateObject { identity, .. }
            | Error::UpdateObject { identity, .. }
            | Error::HashObject { identity, .. } => identity,
        }
    }
}

/// What the caller should do after converging one object (or a whole resource).
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum ReconcileOutcome {
    Done,
    RequeueAfter(Duration),
}

impl ReconcileOutcome {
    fn after(delay: Option<Duration>) -> Self {
        delay.map_or(Self::Done, Self::RequeueAfter)
    }

    pub fn requeue_after(self) -> Option<Duration> {
        match self {
            Self::Done => None,
            Self::RequeueAfter(delay) => Some(delay),
        }
    }
}

/// Kind-specific behaviour of the convergence step.
pub trait ManagedObject: NamespacedObject {
    const CREATED_REQUEUE: Option<Duration> = None;
    const UPDATED_REQUEUE: Option<Duration> = None;

    /// Carries server-owned state of the live object into the desired one before a replace.
    fn prepare_update(&mut self, live: &Self) {
        self.meta_mut().resource_version = live.meta().resource_version.clone();
    }

    /// Whether the live object has caught up with `desired`.
    fn is_settled(&self, _desired: &Self) -> bool {
        true
    }
}

impl ManagedObject for ConfigMap {
    const UPDATED_REQUEUE: Option<Duration> = Some(SETTLE_REQUEUE);
}

impl ManagedObject for Service {
    const UPDATED_REQUEUE: Option<Duration> = Some(SETTLE_REQUEUE);

    fn prepare_update(&mut self, live: &Self) {
        self.metadata.resource_version = live.metadata.resource_version.clone();
        let live_cluster_ip = live.spec.as_ref().and_then(|spec| spec.cluster_ip.clone());
        if let Some(spec) = self.spec.as_mut() {
            if spec.cluster_ip.is_none() {
                spec.cluster_ip = live_cluster_ip;
            }
        }
    }
}

impl ManagedObject for StatefulSet {
    const CREATED_REQUEUE: Option<Duration> = Some(TRANSIENT_REQUEUE);
    const UPDATED_REQUEUE: Option<Duration> = Some(ROLLOUT_REQUEUE);

    /// All desired replicas are ready and no rolling update is in progress.
    fn is_settled(&self, desired: &Self) -> bool {
        let desired_replicas = desired
            .spec
            .as_ref()
            .and_then(|spec| spec.replicas)
            .unwrap_or(1);
        let status = self.status.clone().unwrap_or_default();
        status.ready_replicas.unwrap_or(0) == desired_replicas
            && status.current_revision == status.update_revision
    }
}

impl ManagedObject for PodDisruptionBudget {}

/// Fetches the live state of an object, `None` if it does not exist.
pub async fn fetch<A, K>(api: &A, namespace: &str, name: &str) -> Result<Option<K>, Error>
where
    A: ObjectApi,
    K: NamespacedObject,
{
    api.get::<K>(namespace, name)
        .await
        .with_context(|_| GetObjectSnafu {
            identity: ObjectIdentity::named::<K>(namespace, name),
        })
}

/// Converges one object, fetching its live state first.
pub async fn reconcile_object<A, K>(
    api: &A,
    hashes: &HashStore,
    desired: K,
) -> Result<ReconcileOutcome, Error>
where
    A: ObjectApi,
    K: ManagedObject,
{
    let identity = ObjectIdentity::of(&desired);
    let live = fetch::<A, K>(api, &identity.namespace, &identity.name).await?;
    apply_with_live(api, hashes, desired, live).await
}

/// Converges one object against an already fetched live state.
pub async fn apply_with_live<A, K>(
    api: &A,
    hashes: &HashStore,
    mut desired: K,
    live: Option<K>,
) -> Result<ReconcileOutcome, Error>
where
    A: ObjectApi,
    K: ManagedObject,
{
    let identity = ObjectIdentity::of(&desired);
    let desired_digest = digest(&desired).with_context(|_| HashObjectSnafu {
        identity: identity.clone(),
    })?;

    let Some(live) = live else {
        tracing::info!(%identity, digest = %desired_digest, "creating object");
        api.create(&identity.namespace, &desired)
            .await
            .with_context(|_| CreateObjectSnafu {
                identity: identity.clone(),
            })?;
        hashes.record(identity, desired_digest);
        return Ok(ReconcileOutcome::after(K::CREATED_REQUEUE));
    };

    // A forced write of an unchanged digest still has to wait for the object to settle.
    let changed = hashes.has_changed(&identity, &desired_digest);
    if hashes.should_apply(&identity, &desired_digest) {
        tracing::info!(%identity, digest = %desired_digest, changed, "updating object");
        desired.prepare_update(&live);
        api.replace(&identity.namespace, &identity.name, &desired)
            .await
            .with_context(|_| UpdateObjectSnafu {
                identity: identity.clone(),
            })?;
        hashes.record(identity.clone(), desired_digest);
        if changed {
            return Ok(ReconcileOutcome::after(K::UPDATED_REQUEUE));
        }
    }

    if !live.is_settled(&desired) {
        tracing::info!(%identity, "waiting for object to settle");
        return Ok(ReconcileOutcome::RequeueAfter(ROLLOUT_REQUEUE));
    }

    tracing::debug!(%identity, "object is up to date");
    Ok(ReconcileOutcome::Done)
}
