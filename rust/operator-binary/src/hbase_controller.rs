//! Glue between the kube-runtime controllers and the reconcile engine.
//!
//! One [`Ctx`] is shared by the controllers of all three resource kinds, so the applied-digest
//! cache and the failure backoff are process wide.

use std::{
    sync::Arc,
    time::{Duration, Instant},
};

use dashmap::DashMap;
use stackable_operator::kube::runtime::controller::Action;

use crate::{
    engine::{self, reconcile_resource},
    hash_store::{HashStore, ObjectIdentity},
    kube_api::KubeApi,
    resource::HbaseResource,
};

pub const HBASE_CLUSTER_CONTROLLER_NAME: &str = "hbasecluster";
pub const HBASE_TENANT_CONTROLLER_NAME: &str = "hbasetenant";
pub const HBASE_STANDALONE_CONTROLLER_NAME: &str = "hbasestandalone";

pub struct Ctx {
    pub api: KubeApi,
    pub hashes: HashStore,
    pub backoff: ErrorBackoff,
}

/// Exponential delay for failures that carry no fixed retry, tracked per resource.
///
/// A deleted resource is never reconciled again, so its streak is never reset. Streaks that have
/// not failed for twice the maximum delay are dropped instead.
#[derive(Debug)]
pub struct ErrorBackoff {
    base: Duration,
    max: Duration,
    failures: DashMap<ObjectIdentity, Streak>,
}

#[derive(Clone, Copy, Debug)]
struct Streak {
    count: u32,
    last_failure: Instant,
}

impl ErrorBackoff {
    pub fn new(base: Duration, max: Duration) -> Self {
        Self {
            base,
            max,
            failures: DashMap::new(),
        }
    }

    /// Counts one more failure of `identity` and returns the delay before the next attempt.
    pub fn next_delay(&self, identity: &ObjectIdentity) -> Duration {
        let now = Instant::now();
        self.prune(now);
        let mut streak = self.failures.entry(identity.clone()).or_insert(Streak {
            count: 0,
            last_failure: now,
        });
        streak.count = streak.count.saturating_add(1);
        streak.last_failure = now;
        let factor = 1u32 << (streak.count - 1).min(16);
        self.base.saturating_mul(factor).min(self.max)
    }

    pub fn reset(&self, identity: &ObjectIdentity) {
        self.failures.remove(identity);
    }

    /// Drops the streaks of resources that have not failed within twice the maximum delay.
    fn prune(&self, now: Instant) {
        let stale_after = self.max.saturating_mul(2);
        self.failures
            .retain(|_, streak| now.saturating_duration_since(streak.last_failure) <= stale_after);
    }

    #[cfg(test)]
    fn tracked(&self) -> usize {
        self.failures.len()
    }
}

pub async fn reconcile<K: HbaseResource>(
    resource: Arc<K>,
    ctx: Arc<Ctx>,
) -> Result<Action, engine::Error> {
    tracing::info!("Starting reconcile");
    let identity = ObjectIdentity::of(resource.as_ref());

    let outcome =
        reconcile_resource::<K, _>(&ctx.api, &ctx.hashes, &identity.namespace, &identity.name)
            .await?;
    ctx.backoff.reset(&identity);

    Ok(match outcome.requeue_after() {
        Some(delay) => Action::requeue(delay),
        None => Action::await_change(),
    })
}

pub fn error_policy<K: HbaseResource>(
    resource: Arc<K>,
    error: &engine::Error,
    ctx: Arc<Ctx>,
) -> Action {
    let identity = ObjectIdentity::of(resource.as_ref());
    let delay = error
        .requeue_after()
        .unwrap_or_else(|| ctx.backoff.next_delay(&identity));
    Action::requeue(delay)
}
