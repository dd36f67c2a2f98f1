use hbase_k8s_crd::TierSpec;
use stackable_operator::{
    builder::ObjectMetaBuilder,
    k8s_openapi::{
        api::policy::v1::{PodDisruptionBudget, PodDisruptionBudgetSpec},
        apimachinery::pkg::apis::meta::v1::LabelSelector,
    },
};

use crate::{resource::ReconcileScope, statefulset::tier_selector};

/// The PodDisruptionBudget guarding the pods of `tier`, or `None` when the tier declares no
/// disruption policy. No budget is managed at all in that case.
pub fn build_pdb(scope: &ReconcileScope, tier: &TierSpec) -> Option<PodDisruptionBudget> {
    let policy = tier
        .pod_disruption_budget
        .as_ref()
        .filter(|policy| policy.is_declared())?;
    let selector = tier_selector(scope, tier);

    Some(PodDisruptionBudget {
        metadata: ObjectMetaBuilder::new()
            .name(&tier.name)
            .namespace(&scope.namespace)
            .ownerreference(scope.owner.clone())
            .with_labels(selector.clone())
            .build(),
        spec: Some(PodDisruptionBudgetSpec {
            max_unavailable: policy.max_unavailable.clone(),
            min_available: policy.min_available.clone(),
            selector: Some(LabelSelector {
                match_labels: Some(selector),
                ..LabelSelector::default()
            }),
            ..PodDisruptionBudgetSpec::default()
        }),
        status: None,
    })
}
