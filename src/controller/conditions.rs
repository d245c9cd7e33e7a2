//! Condition management helpers following Kubernetes API conventions

use chrono::Utc;

use crate::crd::Condition;

/// Condition types written by the reconciler
pub const CONDITION_TYPE_READY: &str = "Ready";
pub const CONDITION_TYPE_VALIDATED: &str = "Validated";

/// Reserved condition types, part of the status schema but not written yet
pub const CONDITION_TYPE_DATABASE_CONNECTED: &str = "DatabaseConnected";
pub const CONDITION_TYPE_CACHE_CONNECTED: &str = "CacheConnected";
pub const CONDITION_TYPE_STORAGE_CONNECTED: &str = "StorageConnected";
pub const CONDITION_TYPE_TELEMETRY_READY: &str = "TelemetryReady";
pub const CONDITION_TYPE_SERVICES_READY: &str = "ServicesReady";
pub const CONDITION_TYPE_WEB_READY: &str = "WebReady";

/// Standard condition statuses
pub const CONDITION_STATUS_TRUE: &str = "True";
pub const CONDITION_STATUS_FALSE: &str = "False";
pub const CONDITION_STATUS_UNKNOWN: &str = "Unknown";

pub const REASON_VALIDATION_SUCCEEDED: &str = "ValidationSucceeded";
pub const REASON_VALIDATION_FAILED: &str = "ValidationFailed";
pub const REASON_ALL_COMPONENTS_READY: &str = "AllComponentsReady";
pub const REASON_COMPONENTS_NOT_READY: &str = "ComponentsNotReady";

/// Update or add a condition to the conditions list
///
/// The transition time only moves when the status changes; reason, message
/// and observed generation are always refreshed.
pub fn set_condition(
    conditions: &mut Vec<Condition>,
    type_: &str,
    status: &str,
    reason: &str,
    message: &str,
    observed_generation: Option<i64>,
) {
    let now = Utc::now().to_rfc3339();

    if let Some(existing) = conditions.iter_mut().find(|c| c.type_ == type_) {
        let should_update_time = existing.status != status;

        existing.status = status.to_string();
        existing.reason = reason.to_string();
        existing.message = message.to_string();
        existing.observed_generation = observed_generation;

        if should_update_time {
            existing.last_transition_time = now;
        }
    } else {
        conditions.push(Condition {
            type_: type_.to_string(),
            status: status.to_string(),
            last_transition_time: now,
            reason: reason.to_string(),
            message: message.to_string(),
            observed_generation,
        });
    }
}

/// Find a condition by type
pub fn find_condition<'a>(conditions: &'a [Condition], type_: &str) -> Option<&'a Condition> {
    conditions.iter().find(|c| c.type_ == type_)
}

/// Check if a condition is true
pub fn is_condition_true(conditions: &[Condition], type_: &str) -> bool {
    find_condition(conditions, type_)
        .map(|c| c.status == CONDITION_STATUS_TRUE)
        .unwrap_or(false)
}

/// Status string for a boolean outcome
pub fn status_for(value: bool) -> &'static str {
    if value {
        CONDITION_STATUS_TRUE
    } else {
        CONDITION_STATUS_FALSE
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_set_condition_adds_new() {
        let mut conditions = Vec::new();
        set_condition(
            &mut conditions,
            CONDITION_TYPE_VALIDATED,
            CONDITION_STATUS_TRUE,
            REASON_VALIDATION_SUCCEEDED,
            "configuration is valid",
            Some(4),
        );

        assert_eq!(conditions.len(), 1);
        assert_eq!(conditions[0].type_, CONDITION_TYPE_VALIDATED);
        assert_eq!(conditions[0].status, CONDITION_STATUS_TRUE);
        assert_eq!(conditions[0].observed_generation, Some(4));
    }

    #[test]
    fn test_set_condition_updates_existing() {
        let mut conditions = vec![Condition {
            type_: CONDITION_TYPE_READY.to_string(),
            status: CONDITION_STATUS_FALSE.to_string(),
            last_transition_time: "2024-01-01T00:00:00Z".to_string(),
            reason: REASON_COMPONENTS_NOT_READY.to_string(),
            message: "some components are not ready".to_string(),
            observed_generation: Some(1),
        }];

        let old_time = conditions[0].last_transition_time.clone();
        set_condition(
            &mut conditions,
            CONDITION_TYPE_READY,
            CONDITION_STATUS_TRUE,
            REASON_ALL_COMPONENTS_READY,
            "all components are running",
            Some(2),
        );

        assert_eq!(conditions.len(), 1);
        assert_eq!(conditions[0].status, CONDITION_STATUS_TRUE);
        assert_eq!(conditions[0].observed_generation, Some(2));
        assert_ne!(conditions[0].last_transition_time, old_time); // Time should change when status changes
    }

    #[test]
    fn test_same_status_keeps_transition_time() {
        let mut conditions = vec![Condition {
            type_: CONDITION_TYPE_READY.to_string(),
            status: CONDITION_STATUS_FALSE.to_string(),
            last_transition_time: "2024-01-01T00:00:00Z".to_string(),
            reason: REASON_COMPONENTS_NOT_READY.to_string(),
            message: "1/2".to_string(),
            observed_generation: None,
        }];

        set_condition(
            &mut conditions,
            CONDITION_TYPE_READY,
            CONDITION_STATUS_FALSE,
            REASON_COMPONENTS_NOT_READY,
            "2/3",
            None,
        );

        assert_eq!(conditions[0].last_transition_time, "2024-01-01T00:00:00Z");
        assert_eq!(conditions[0].message, "2/3");
    }

    #[test]
    fn test_is_condition_true() {
        let mut conditions = Vec::new();
        set_condition(
            &mut conditions,
            CONDITION_TYPE_READY,
            status_for(true),
            REASON_ALL_COMPONENTS_READY,
            "ok",
            None,
        );

        assert!(is_condition_true(&conditions, CONDITION_TYPE_READY));
        assert!(!is_condition_true(&conditions, CONDITION_TYPE_VALIDATED));
        assert!(find_condition(&conditions, CONDITION_TYPE_WEB_READY).is_none());
    }
}
