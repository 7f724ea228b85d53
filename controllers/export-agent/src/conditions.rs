//! Status condition bookkeeping for ServiceExports.
//!
//! The condition set is a small fixed map keyed by condition type. Writes
//! are compare-and-swap style: re-asserting an unchanged condition is a
//! no-op that keeps the existing transition timestamp, so identical status
//! updates never reach the API server and never wake downstream watchers.

use chrono::Utc;
use crds::{ConditionStatus, ExportCondition, ExportConditionType};

/// The target Service does not exist yet.
pub const REASON_SERVICE_UNAVAILABLE: &str = "ServiceUnavailable";

/// This cluster's contribution has been withdrawn from the aggregate.
pub const REASON_NO_SERVICE_IMPORT: &str = "NoServiceImport";

/// The broker could not be updated within the retry budget.
pub const REASON_EXPORT_FAILED: &str = "ExportFailed";

/// Builds a Valid condition stamped with the current time.
pub fn valid(status: ConditionStatus, reason: Option<&str>, message: Option<&str>) -> ExportCondition {
    new_condition(ExportConditionType::Valid, status, reason, message)
}

/// Builds a Synced condition stamped with the current time.
pub fn synced(status: ConditionStatus, reason: Option<&str>, message: Option<&str>) -> ExportCondition {
    new_condition(ExportConditionType::Synced, status, reason, message)
}

fn new_condition(
    condition_type: ExportConditionType,
    status: ConditionStatus,
    reason: Option<&str>,
    message: Option<&str>,
) -> ExportCondition {
    ExportCondition {
        condition_type,
        status,
        last_transition_time: Some(Utc::now()),
        reason: reason.map(str::to_string),
        message: message.map(str::to_string),
    }
}

/// Merges a condition into the set, keyed by condition type.
///
/// Returns true when the set changed. A re-assertion with identical status,
/// reason and message leaves the stored entry untouched, including its
/// transition timestamp.
pub fn upsert(conditions: &mut Vec<ExportCondition>, condition: ExportCondition) -> bool {
    match conditions
        .iter_mut()
        .find(|c| c.condition_type == condition.condition_type)
    {
        Some(existing) => {
            if existing.status == condition.status
                && existing.reason == condition.reason
                && existing.message == condition.message
            {
                return false;
            }
            *existing = condition;
            true
        }
        None => {
            conditions.push(condition);
            true
        }
    }
}

/// Finds the condition for the given type, if present.
pub fn find(
    conditions: &[ExportCondition],
    condition_type: ExportConditionType,
) -> Option<&ExportCondition> {
    conditions.iter().find(|c| c.condition_type == condition_type)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_upsert_adds_new_condition() {
        let mut conditions = Vec::new();

        let changed = upsert(
            &mut conditions,
            synced(ConditionStatus::False, Some(REASON_SERVICE_UNAVAILABLE), None),
        );

        assert!(changed);
        assert_eq!(conditions.len(), 1);
        let stored = find(&conditions, ExportConditionType::Synced).unwrap();
        assert_eq!(stored.status, ConditionStatus::False);
        assert_eq!(stored.reason.as_deref(), Some(REASON_SERVICE_UNAVAILABLE));
    }

    #[test]
    fn test_identical_reassertion_is_a_noop() {
        let mut conditions = Vec::new();
        upsert(
            &mut conditions,
            valid(ConditionStatus::True, None, Some("Service is eligible for export")),
        );
        let original_time = conditions[0].last_transition_time;

        let changed = upsert(
            &mut conditions,
            valid(ConditionStatus::True, None, Some("Service is eligible for export")),
        );

        assert!(!changed);
        // The transition timestamp must not be bumped by a re-assertion
        assert_eq!(conditions[0].last_transition_time, original_time);
    }

    #[test]
    fn test_transition_replaces_condition() {
        let mut conditions = Vec::new();
        upsert(
            &mut conditions,
            synced(ConditionStatus::False, Some(REASON_SERVICE_UNAVAILABLE), None),
        );

        let changed = upsert(
            &mut conditions,
            synced(ConditionStatus::True, None, Some("Service was successfully exported")),
        );

        assert!(changed);
        assert_eq!(conditions.len(), 1);
        let stored = find(&conditions, ExportConditionType::Synced).unwrap();
        assert_eq!(stored.status, ConditionStatus::True);
        assert_eq!(stored.reason, None);
    }

    #[test]
    fn test_axes_are_independent() {
        let mut conditions = Vec::new();
        upsert(&mut conditions, valid(ConditionStatus::True, None, None));
        upsert(
            &mut conditions,
            synced(ConditionStatus::False, Some(REASON_NO_SERVICE_IMPORT), None),
        );

        assert_eq!(conditions.len(), 2);
        assert_eq!(
            find(&conditions, ExportConditionType::Valid).unwrap().status,
            ConditionStatus::True
        );
        assert_eq!(
            find(&conditions, ExportConditionType::Synced).unwrap().status,
            ConditionStatus::False
        );
    }

    #[test]
    fn test_export_lifecycle_condition_sequence() {
        // ServiceExport created before the Service exists
        let mut conditions = Vec::new();
        upsert(
            &mut conditions,
            synced(
                ConditionStatus::False,
                Some(REASON_SERVICE_UNAVAILABLE),
                Some("Service default/svc does not exist yet"),
            ),
        );

        // The Service appears and the export succeeds
        upsert(&mut conditions, valid(ConditionStatus::True, None, None));
        upsert(
            &mut conditions,
            synced(ConditionStatus::True, None, Some("Service was successfully exported")),
        );

        let synced_now = find(&conditions, ExportConditionType::Synced).unwrap();
        assert_eq!(synced_now.status, ConditionStatus::True);

        // The Service goes away again: the contribution is withdrawn
        upsert(
            &mut conditions,
            synced(ConditionStatus::False, Some(REASON_NO_SERVICE_IMPORT), None),
        );
        let synced_now = find(&conditions, ExportConditionType::Synced).unwrap();
        assert_eq!(synced_now.reason.as_deref(), Some(REASON_NO_SERVICE_IMPORT));
    }
}
