//! Record normalization: timestamp repair, deduplication, chronological sort.

use std::collections::HashSet;

use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};

use crate::event::{Event, RawRecord};
use crate::types::{GroupKey, UnitId};

/// Timestamp layouts observed in shop-floor exports, tried after RFC 3339.
/// Naive timestamps are taken as UTC; the engine only needs relative order
/// and deltas, never wall-clock correctness.
const NAIVE_DATETIME_FORMATS: &[&str] = &[
    "%Y-%m-%d %H:%M:%S%.f",
    "%Y-%m-%dT%H:%M:%S%.f",
    "%d/%m/%Y %H:%M:%S",
    "%m/%d/%Y %H:%M:%S",
    "%d/%m/%Y %H:%M",
    "%m/%d/%Y %H:%M",
    "%d-%m-%Y %H:%M:%S",
    "%Y/%m/%d %H:%M:%S",
];

/// Date-only layouts, resolved to midnight.
const NAIVE_DATE_FORMATS: &[&str] = &["%Y-%m-%d", "%d/%m/%Y"];

/// Output of the normalizer, with per-row drop accounting.
///
/// Drop counts are carried all the way to the final report so a degraded
/// estimate can explain itself.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Normalized {
    /// Events sorted ascending by timestamp, deduplicated by unit ID.
    pub events: Vec<Event>,
    /// Rows received from the caller.
    pub rows_in: usize,
    /// Rows dropped because the timestamp failed every known layout.
    pub parse_failures: usize,
    /// Rows dropped because their unit ID was already seen in the same group.
    pub duplicates_dropped: usize,
}

/// Parses a timestamp permissively.
///
/// RFC 3339 first, then the known naive layouts, then date-only. Returns
/// `None` when nothing matches; the caller drops and counts the row.
#[must_use]
pub fn parse_timestamp(raw: &str) -> Option<DateTime<Utc>> {
    let raw = raw.trim();
    if raw.is_empty() {
        return None;
    }

    if let Ok(dt) = DateTime::parse_from_rfc3339(raw) {
        return Some(dt.with_timezone(&Utc));
    }

    for format in NAIVE_DATETIME_FORMATS {
        if let Ok(naive) = NaiveDateTime::parse_from_str(raw, format) {
            return Some(naive.and_utc());
        }
    }

    for format in NAIVE_DATE_FORMATS {
        if let Ok(date) = NaiveDate::parse_from_str(raw, format) {
            return Some(date.and_hms_opt(0, 0, 0)?.and_utc());
        }
    }

    None
}

/// Normalizes raw records into a clean, sorted event sequence.
///
/// - Rows whose timestamp fails to parse are dropped and counted, never fatal.
/// - When a unit ID is present, the first chronological occurrence within a
///   group wins; later scans of the same unit are dropped. Rows without a
///   unit ID are each a distinct unit.
/// - The output is stable-sorted ascending by timestamp; every downstream
///   stage requires this ordering.
///
/// The caller's input is not mutated.
#[must_use]
pub fn normalize(records: &[RawRecord]) -> Normalized {
    let rows_in = records.len();
    let mut parse_failures = 0usize;

    let mut events: Vec<Event> = Vec::with_capacity(records.len());
    for record in records {
        let Some(timestamp) = parse_timestamp(&record.timestamp) else {
            parse_failures += 1;
            tracing::trace!(raw = %record.timestamp, "dropping row with unparseable timestamp");
            continue;
        };

        // Empty strings in optional columns are treated as absent, not errors.
        let unit_id = record
            .unit_id
            .as_deref()
            .and_then(|s| UnitId::new(s.trim()).ok());
        let group_key = record
            .group_key
            .as_deref()
            .and_then(|s| GroupKey::new(s.trim()).ok());
        let actor_key = record
            .actor_key
            .as_deref()
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(String::from);

        events.push(Event {
            timestamp,
            unit_id,
            group_key,
            actor_key,
        });
    }

    // Sort before dedup so "first occurrence" means first in time, not first
    // in file order. Stable sort keeps equal-timestamp rows in input order.
    events.sort_by_key(|e| e.timestamp);

    let mut seen: HashSet<(Option<String>, String)> = HashSet::new();
    let mut duplicates_dropped = 0usize;
    events.retain(|event| {
        let Some(unit_id) = &event.unit_id else {
            return true;
        };
        let key = (
            event.group_key.as_ref().map(|g| g.as_str().to_string()),
            unit_id.as_str().to_string(),
        );
        if seen.insert(key) {
            true
        } else {
            duplicates_dropped += 1;
            false
        }
    });

    if parse_failures > 0 || duplicates_dropped > 0 {
        tracing::warn!(
            rows_in,
            parse_failures,
            duplicates_dropped,
            "normalizer dropped rows"
        );
    }

    Normalized {
        events,
        rows_in,
        parse_failures,
        duplicates_dropped,
    }
}
