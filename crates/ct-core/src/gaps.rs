//! Gap extraction: inter-batch deltas and burst de-batching.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::event::Event;
use crate::types::GroupKey;

/// The wait interval preceding one batch of events.
///
/// Many traceability systems log at second resolution, so a run of units
/// produced over an interval can land on one coarse timestamp. De-batching
/// attributes the preceding wait equally to every unit in the burst:
/// `imputed_unit_seconds = delta_seconds / batch_size`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Gap {
    /// Timestamp of the later batch (the one the wait precedes).
    pub timestamp: DateTime<Utc>,
    /// Group this gap was computed within.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub group_key: Option<GroupKey>,
    /// Seconds between this batch and the previous batch in the same group.
    pub delta_seconds: f64,
    /// Number of events sharing this batch's exact timestamp.
    pub batch_size: usize,
    /// Per-unit share of the preceding wait.
    pub imputed_unit_seconds: f64,
}

/// Extracts gaps from a normalized, sorted event sequence.
///
/// Events are partitioned by `group_key` (absent keys form one shared
/// partition). Within each partition, events sharing an identical timestamp
/// form one batch; the delta is computed between consecutive batches, not
/// consecutive raw events. The first batch of a partition has no preceding
/// gap and yields nothing.
///
/// No capping happens here: an oversized idle gap in front of a small batch
/// produces an honestly absurd imputed value, and classification downstream
/// is responsible for excluding it.
#[must_use]
pub fn extract_gaps(events: &[Event]) -> Vec<Gap> {
    // Partition preserving chronological order within each group.
    let mut groups: HashMap<Option<&GroupKey>, Vec<&Event>> = HashMap::new();
    for event in events {
        groups.entry(event.group_key.as_ref()).or_default().push(event);
    }

    let mut gaps: Vec<Gap> = Vec::new();
    for members in groups.values() {
        gaps.extend(gaps_for_group(members));
    }

    // Merge groups back into one chronological series for diagnostics.
    gaps.sort_by(|a, b| {
        a.timestamp.cmp(&b.timestamp).then_with(|| {
            let ka = a.group_key.as_ref().map_or("", GroupKey::as_str);
            let kb = b.group_key.as_ref().map_or("", GroupKey::as_str);
            ka.cmp(kb)
        })
    });
    gaps
}

/// Computes gaps for one group's chronologically ordered events.
#[expect(
    clippy::cast_precision_loss,
    reason = "deltas and batch sizes are far below f64 integer precision"
)]
fn gaps_for_group(members: &[&Event]) -> Vec<Gap> {
    let mut gaps = Vec::new();
    let mut previous_batch_end: Option<DateTime<Utc>> = None;

    let mut index = 0;
    while index < members.len() {
        let batch_start = members[index].timestamp;
        let mut batch_size = 0usize;
        while index < members.len() && members[index].timestamp == batch_start {
            batch_size += 1;
            index += 1;
        }

        if let Some(previous) = previous_batch_end {
            let delta_ms = (batch_start - previous).num_milliseconds();
            // Input is sorted, so the delta is never negative; the max is a
            // guard against a caller violating the ordering contract.
            let delta_seconds = (delta_ms.max(0) as f64) / 1000.0;
            let imputed_unit_seconds = delta_seconds / batch_size as f64;

            gaps.push(Gap {
                timestamp: batch_start,
                group_key: members[index - 1].group_key.clone(),
                delta_seconds,
                batch_size,
                imputed_unit_seconds,
            });
        }

        previous_batch_end = Some(batch_start);
    }

    gaps
}

#[cfg(test)]
mod tests {
    use chrono::TimeZone;

    use super::*;
    use crate::types::UnitId;

    fn ts(seconds: i64) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 3, 1, 8, 0, 0)
            .single()
            .expect("valid test timestamp")
            + chrono::Duration::seconds(seconds)
    }

    fn event(seconds: i64, group: Option<&str>) -> Event {
        Event {
            timestamp: ts(seconds),
            unit_id: None,
            group_key: group.map(|g| GroupKey::new(g).unwrap()),
            actor_key: None,
        }
    }

    #[test]
    fn one_gap_per_consecutive_batch_pair() {
        let events = vec![event(0, None), event(60, None), event(120, None)];

        let gaps = extract_gaps(&events);

        assert_eq!(gaps.len(), 2);
        assert!((gaps[0].delta_seconds - 60.0).abs() < f64::EPSILON);
        assert!((gaps[1].delta_seconds - 60.0).abs() < f64::EPSILON);
    }

    #[test]
    fn first_batch_yields_no_gap() {
        let events = vec![event(0, None)];
        assert!(extract_gaps(&events).is_empty());

        let events = vec![event(0, None), event(0, None)];
        // One batch of two events, still no preceding gap.
        assert!(extract_gaps(&events).is_empty());
    }

    #[test]
    fn burst_imputation_splits_delta_across_batch() {
        // A burst of 5 events at the same timestamp, 500s after the prior
        // event: each unit in the burst is attributed 100s.
        let mut events = vec![event(0, None)];
        for _ in 0..5 {
            events.push(event(500, None));
        }

        let gaps = extract_gaps(&events);

        assert_eq!(gaps.len(), 1);
        assert_eq!(gaps[0].batch_size, 5);
        assert!((gaps[0].delta_seconds - 500.0).abs() < f64::EPSILON);
        assert!((gaps[0].imputed_unit_seconds - 100.0).abs() < f64::EPSILON);
    }

    #[test]
    fn groups_are_independent() {
        // Interleaved stations: deltas are computed within a station, so the
        // cross-station 30s spacing must not appear.
        let events = vec![
            event(0, Some("A")),
            event(30, Some("B")),
            event(60, Some("A")),
            event(90, Some("B")),
        ];

        let gaps = extract_gaps(&events);

        assert_eq!(gaps.len(), 2);
        for gap in &gaps {
            assert!((gap.delta_seconds - 60.0).abs() < f64::EPSILON);
        }
    }

    #[test]
    fn gaps_never_negative() {
        let events = vec![
            event(0, None),
            event(0, None),
            event(10, None),
            event(10, None),
            event(700, None),
        ];

        let gaps = extract_gaps(&events);

        for gap in &gaps {
            assert!(gap.delta_seconds >= 0.0);
            assert!(gap.imputed_unit_seconds >= 0.0);
        }
    }

    #[test]
    fn no_capping_of_oversized_gaps() {
        // A multi-hour break before a batch of 2: the imputed value is large
        // and stays large. Excluding it is the filter's job.
        let events = vec![event(0, None), event(7200, None), event(7200, None)];

        let gaps = extract_gaps(&events);

        assert_eq!(gaps.len(), 1);
        assert!((gaps[0].imputed_unit_seconds - 3600.0).abs() < f64::EPSILON);
    }

    #[test]
    fn output_is_chronological_across_groups() {
        let events = vec![
            event(0, Some("B")),
            event(0, Some("A")),
            event(60, Some("B")),
            event(90, Some("A")),
        ];

        let gaps = extract_gaps(&events);

        for pair in gaps.windows(2) {
            assert!(pair[0].timestamp <= pair[1].timestamp);
        }
    }

    #[test]
    fn unit_ids_do_not_affect_gap_computation() {
        let with_units = vec![
            Event {
                timestamp: ts(0),
                unit_id: Some(UnitId::new("SN-1").unwrap()),
                group_key: None,
                actor_key: None,
            },
            Event {
                timestamp: ts(45),
                unit_id: Some(UnitId::new("SN-2").unwrap()),
                group_key: None,
                actor_key: None,
            },
        ];

        let gaps = extract_gaps(&with_units);

        assert_eq!(gaps.len(), 1);
        assert!((gaps[0].delta_seconds - 45.0).abs() < f64::EPSILON);
    }
}
