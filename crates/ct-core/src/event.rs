//! Raw and normalized trace records.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::types::{GroupKey, UnitId};

/// One row from a traceability export, with semantic roles already resolved.
///
/// Which raw column maps to which role is entirely the ingestion layer's
/// responsibility; the engine never sees column names. The timestamp is still
/// raw text here because real exports carry a zoo of date formats, and
/// repairing them is the normalizer's job.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RawRecord {
    /// Raw timestamp text, parsed permissively by the normalizer.
    pub timestamp: String,
    /// Unit identifier, when the export has one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub unit_id: Option<String>,
    /// Grouping key (station, operation, product), when the export has one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub group_key: Option<String>,
    /// Operator/user key. Reporting only; never affects rate estimation.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub actor_key: Option<String>,
}

impl RawRecord {
    /// Creates a record carrying only a timestamp.
    #[must_use]
    pub const fn from_timestamp(timestamp: String) -> Self {
        Self {
            timestamp,
            unit_id: None,
            group_key: None,
            actor_key: None,
        }
    }
}

/// A normalized scan event.
///
/// Produced by the normalizer: timestamp parsed, duplicates removed, sorted.
/// After normalization the sequence is non-decreasing in `timestamp`, and
/// within a group no two events share a `unit_id`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Event {
    /// When the unit was scanned.
    pub timestamp: DateTime<Utc>,
    /// Unit identifier, if the source column resolved.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub unit_id: Option<UnitId>,
    /// Grouping key, if the source column resolved.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub group_key: Option<GroupKey>,
    /// Operator/user key, if the source column resolved.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub actor_key: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn raw_record_optional_fields_default() {
        let json = r#"{"timestamp": "2025-03-01 08:00:00"}"#;
        let record: RawRecord = serde_json::from_str(json).unwrap();
        assert_eq!(record.timestamp, "2025-03-01 08:00:00");
        assert!(record.unit_id.is_none());
        assert!(record.group_key.is_none());
        assert!(record.actor_key.is_none());
    }

    #[test]
    fn event_serialization_roundtrip() {
        let event = Event {
            timestamp: Utc::now(),
            unit_id: Some(UnitId::new("SN-1").unwrap()),
            group_key: Some(GroupKey::new("ICT").unwrap()),
            actor_key: Some("op-7".to_string()),
        };

        let json = serde_json::to_string(&event).unwrap();
        let parsed: Event = serde_json::from_str(&json).unwrap();

        assert_eq!(parsed, event);
    }

    #[test]
    fn event_rejects_empty_unit_id() {
        let json = r#"{
            "timestamp": "2025-03-01T08:00:00Z",
            "unit_id": ""
        }"#;
        let result: Result<Event, _> = serde_json::from_str(json);
        assert!(result.is_err());
    }
}
