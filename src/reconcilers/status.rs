//! Status values written onto managed resources

use chrono::{DateTime, Utc};
use serde_json::{json, Value};

use crate::crd::{Condition, ManagedStatus, Phase};
use crate::error::{Error, ErrorClass};

/// Condition type maintained on every resource
pub const READY: &str = "Ready";

/// Reason recorded once a resource has been deferred too many times
pub const RETRIES_EXHAUSTED: &str = "RetriesExhausted";

/// Ready condition, keeping the previous transition time when nothing changed
fn ready_condition(
    previous: Option<&ManagedStatus>,
    status: &str,
    reason: &str,
    message: &str,
    now: DateTime<Utc>,
) -> Condition {
    let last_transition_time = previous
        .and_then(|s| s.conditions.iter().find(|c| c.type_ == READY))
        .filter(|c| c.status == status && c.reason.as_deref() == Some(reason))
        .map_or(now, |c| c.last_transition_time);

    Condition {
        type_: READY.to_string(),
        status: status.to_string(),
        last_transition_time,
        reason: Some(reason.to_string()),
        message: Some(message.to_string()),
    }
}

/// Carry over conditions other than Ready
fn other_conditions(previous: Option<&ManagedStatus>) -> Vec<Condition> {
    previous
        .map(|s| s.conditions.iter().filter(|c| c.type_ != READY).cloned().collect())
        .unwrap_or_default()
}

fn with_ready(previous: Option<&ManagedStatus>, ready: Condition) -> Vec<Condition> {
    let mut conditions = other_conditions(previous);
    conditions.push(ready);
    conditions
}

/// Backend entity matches the spec at `generation`
pub fn ready(
    previous: Option<&ManagedStatus>,
    external_id: &str,
    generation: Option<i64>,
    now: DateTime<Utc>,
) -> ManagedStatus {
    let message = format!("Backend entity {external_id} is in sync");
    ManagedStatus {
        phase: Some(Phase::Ready),
        message: Some(message.clone()),
        external_id: Some(external_id.to_string()),
        last_error: None,
        observed_generation: generation,
        conditions: with_ready(previous, ready_condition(previous, "True", "Reconciled", &message, now)),
    }
}

/// Backend operation accepted, waiting for it to finish
pub fn provisioning(
    previous: Option<&ManagedStatus>,
    external_id: Option<&str>,
    now: DateTime<Utc>,
) -> ManagedStatus {
    let message = "Waiting for the backend operation to finish".to_string();
    ManagedStatus {
        phase: Some(Phase::Provisioning),
        message: Some(message.clone()),
        external_id: external_id
            .map(str::to_string)
            .or_else(|| previous.and_then(|s| s.external_id.clone())),
        last_error: None,
        observed_generation: previous.and_then(|s| s.observed_generation),
        conditions: with_ready(
            previous,
            ready_condition(previous, "False", "Provisioning", &message, now),
        ),
    }
}

/// Classified failure
///
/// Permanent failures and exhausted retries put the resource in `Failed`;
/// everything else is `Pending` and will be retried. The observed generation
/// is left alone so the next event still triggers a reconcile.
pub fn failed(
    previous: Option<&ManagedStatus>,
    error: &Error,
    exhausted: bool,
    now: DateTime<Utc>,
) -> ManagedStatus {
    let class = error.class();
    let (phase, reason) = if exhausted {
        (Phase::Failed, RETRIES_EXHAUSTED)
    } else if class == ErrorClass::Permanent {
        (Phase::Failed, class.as_str())
    } else {
        (Phase::Pending, class.as_str())
    };
    let message = error.to_string();

    ManagedStatus {
        phase: Some(phase),
        message: Some(message.clone()),
        external_id: previous.and_then(|s| s.external_id.clone()),
        last_error: Some(message.clone()),
        observed_generation: previous.and_then(|s| s.observed_generation),
        conditions: with_ready(previous, ready_condition(previous, "False", reason, &message, now)),
    }
}

/// Merge patch body for the status subresource
///
/// Unset fields are sent as explicit nulls so a merge patch clears them.
pub fn to_patch(status: &ManagedStatus) -> Value {
    json!({
        "status": {
            "phase": status.phase,
            "message": status.message,
            "externalId": status.external_id,
            "lastError": status.last_error,
            "observedGeneration": status.observed_generation,
            "conditions": status.conditions,
        }
    })
}
