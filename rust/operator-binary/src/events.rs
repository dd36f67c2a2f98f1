//! Warning events attached to the custom resource.
//!
//! Each reason maps to one Event object per resource. Repeated occurrences bump its `count`
//! instead of piling up new objects.

use stackable_operator::{
    builder::ObjectMetaBuilder,
    k8s_openapi::{
        api::core::v1::{Event, EventSource},
        apimachinery::pkg::apis::meta::v1::Time,
        chrono::Utc,
    },
};
use strum::Display;

use crate::{kube_api::ObjectApi, resource::ReconcileScope, OPERATOR_NAME};

#[derive(Clone, Copy, Debug, Display, Eq, PartialEq)]
pub enum EventReason {
    ConfigValidateFailed,
    CreateServiceFailed,
}

pub fn event_name(scope: &ReconcileScope, reason: EventReason) -> String {
    format!("{}.{}", scope.name, reason.to_string().to_lowercase())
}

/// Creates or bumps the warning event for `reason`.
///
/// Publishing is best effort: failures are logged and never fail the reconcile pass.
pub async fn publish_warning<A: ObjectApi>(
    api: &A,
    scope: &ReconcileScope,
    reason: EventReason,
    message: &str,
) {
    let name = event_name(scope, reason);
    let now = Time(Utc::now());
    let mut event = Event {
        metadata: ObjectMetaBuilder::new()
            .name(&name)
            .namespace(&scope.namespace)
            .build(),
        involved_object: scope.object_ref.clone(),
        reason: Some(reason.to_string()),
        message: Some(message.to_string()),
        type_: Some("Warning".to_string()),
        count: Some(1),
        first_timestamp: Some(now.clone()),
        last_timestamp: Some(now),
        source: Some(EventSource {
            component: Some(OPERATOR_NAME.to_string()),
            ..EventSource::default()
        }),
        ..Event::default()
    };

    let result = match api.get::<Event>(&scope.namespace, &name).await {
        Ok(None) => api.create(&scope.namespace, &event).await,
        Ok(Some(existing)) => {
            event.metadata.resource_version = existing.metadata.resource_version;
            event.first_timestamp = existing.first_timestamp.or(event.first_timestamp);
            event.count = Some(existing.count.unwrap_or(0) + 1);
            api.replace(&scope.namespace, &name, &event).await
        }
        Err(err) => Err(err),
    };
    if let Err(err) = result {
        tracing::warn!(
            event = %name,
            reason = %reason,
            error = &err as &dyn std::error::Error,
            "failed to publish event"
        );
    }
}
