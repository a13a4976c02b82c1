//! Pipeline orchestration: normalize, extract gaps, classify, estimate.
//!
//! Data flows strictly forward through the four stages; the pipeline owns
//! every derived value and shares no mutable state across runs. Per-row data
//! quality problems are counted and attached to the report, never raised; the
//! only hard error is a dataset with nothing usable in it.

use std::collections::{HashMap, HashSet};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use thiserror::Error;

use crate::estimate::{
    self, EstimatorConfig, EstimatorInput, RateEstimate, Strategy, build_estimator,
};
use crate::event::{Event, RawRecord};
use crate::filter::{self, FilterConfig, GapClass, ResolvedThresholds};
use crate::gaps::extract_gaps;
use crate::normalize::{Normalized, normalize};

/// Unrecoverable analysis errors.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum EngineError {
    /// Fewer than 2 usable rows survived normalization. Callers should show
    /// an actionable message ("no valid timestamps found"), not a crash.
    #[error(
        "no usable data: {usable_rows} of {rows_in} rows had parseable timestamps \
         (need at least 2)"
    )]
    EmptyDataset {
        /// Rows received.
        rows_in: usize,
        /// Rows that survived normalization.
        usable_rows: usize,
        /// Rows dropped for unparseable timestamps.
        parse_failures: usize,
    },
}

/// Full pipeline configuration. One value per analysis run; nothing here
/// affects the normalizer stage, which is why caching it alone is safe.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct PipelineConfig {
    /// Noise/idle filter settings.
    pub filter: FilterConfig,
    /// Which estimator strategy to run.
    pub strategy: Strategy,
    /// Estimator tuning.
    pub estimator: EstimatorConfig,
}

/// Per-stage accounting, attached to every report so degradations can
/// explain themselves.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct StageCounts {
    /// Rows received from the caller.
    pub rows_in: usize,
    /// Rows dropped for unparseable timestamps.
    pub parse_failures: usize,
    /// Rows dropped as duplicate unit scans.
    pub duplicates_dropped: usize,
    /// Events after normalization.
    pub events: usize,
    /// Gaps extracted.
    pub gaps: usize,
    /// Gaps classified as burst noise.
    pub burst_noise: usize,
    /// Gaps classified as plausible work.
    pub work: usize,
    /// Gaps classified as idle.
    pub idle: usize,
}

/// One point of the diagnostic time series handed to plotting callers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DiagnosticPoint {
    /// Timestamp of the batch the gap precedes.
    pub timestamp: DateTime<Utc>,
    /// Imputed per-unit seconds.
    pub value_seconds: f64,
    /// Band membership under the run's thresholds.
    pub class: GapClass,
}

/// Everything one analysis run produces.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnalysisReport {
    /// The two point estimates.
    pub estimate: RateEstimate,
    /// The classification bounds that were applied.
    pub thresholds: ResolvedThresholds,
    /// Per-stage drop and population counts.
    pub counts: StageCounts,
    /// Flat ordered gap series with class labels, for histogram/scatter
    /// rendering.
    pub diagnostics: Vec<DiagnosticPoint>,
    /// Events whose gap fell in the work band — the "clean report" subset.
    pub clean_events: Vec<Event>,
}

/// The four-stage analysis pipeline.
///
/// Deterministic: the same records and the same configuration produce a
/// bit-identical report.
#[derive(Debug, Clone, Default)]
pub struct Pipeline {
    config: PipelineConfig,
}

impl Pipeline {
    /// Creates a pipeline with the given configuration.
    #[must_use]
    pub const fn new(config: PipelineConfig) -> Self {
        Self { config }
    }

    /// Runs all four stages on raw records.
    pub fn analyze(&self, records: &[RawRecord]) -> Result<AnalysisReport, EngineError> {
        let normalized = normalize(records);
        self.analyze_normalized(&normalized)
    }

    /// Runs the parameter-sensitive stages on already-normalized events.
    ///
    /// This is the entry point for callers holding a [`NormalizerCache`]:
    /// re-running with different thresholds or strategy reuses the cached
    /// normalization.
    pub fn analyze_normalized(
        &self,
        normalized: &Normalized,
    ) -> Result<AnalysisReport, EngineError> {
        let events = &normalized.events;
        if events.len() < 2 {
            return Err(EngineError::EmptyDataset {
                rows_in: normalized.rows_in,
                usable_rows: events.len(),
                parse_failures: normalized.parse_failures,
            });
        }

        let gaps = extract_gaps(events);
        let classification = filter::classify(&gaps, &self.config.filter);

        let work_seconds = classification.work_seconds();
        let input = EstimatorInput {
            work_seconds: &work_seconds,
            events,
        };

        let estimate = if classification.has_sufficient_signal(self.config.filter.min_work_samples)
        {
            let estimator = build_estimator(self.config.strategy, &self.config.estimator);
            estimator.estimate(&input).map_or_else(
                || {
                    tracing::warn!(
                        strategy = %self.config.strategy,
                        "strategy declined, using global average fallback"
                    );
                    fallback(events)
                },
                |e| e,
            )
        } else {
            tracing::warn!(
                work = work_seconds.len(),
                min = self.config.filter.min_work_samples,
                "insufficient work-classified gaps, using global average fallback"
            );
            fallback(events)
        };

        let diagnostics: Vec<DiagnosticPoint> = classification
            .gaps
            .iter()
            .map(|c| DiagnosticPoint {
                timestamp: c.gap.timestamp,
                value_seconds: c.gap.imputed_unit_seconds,
                class: c.class,
            })
            .collect();

        let clean_events = clean_subset(events, &classification);

        let counts = StageCounts {
            rows_in: normalized.rows_in,
            parse_failures: normalized.parse_failures,
            duplicates_dropped: normalized.duplicates_dropped,
            events: events.len(),
            gaps: gaps.len(),
            burst_noise: classification.count(GapClass::BurstNoise),
            work: classification.count(GapClass::Work),
            idle: classification.count(GapClass::Idle),
        };

        tracing::debug!(
            method = %estimate.method,
            theoretical = estimate.theoretical_seconds,
            real = estimate.real_seconds,
            "analysis complete"
        );

        Ok(AnalysisReport {
            estimate,
            thresholds: classification.thresholds,
            counts,
            diagnostics,
            clean_events,
        })
    }
}

/// The guaranteed estimator of last resort.
///
/// `analyze_normalized` only reaches this with >= 2 events, so the fallback
/// cannot decline; the unreachable arm keeps the signature honest without a
/// panic path.
fn fallback(events: &[Event]) -> RateEstimate {
    estimate::global_average_fallback(events).unwrap_or(RateEstimate {
        theoretical_seconds: estimate::RATE_EPSILON_SECONDS,
        real_seconds: estimate::RATE_EPSILON_SECONDS,
        method: estimate::EstimatorMethod::GlobalAverageFallback,
        sample_count: events.len(),
    })
}

/// Events belonging to batches whose gap was work-classified.
fn clean_subset(events: &[Event], classification: &filter::Classification) -> Vec<Event> {
    let work_batches: HashSet<(Option<&str>, DateTime<Utc>)> = classification
        .gaps
        .iter()
        .filter(|c| c.class == GapClass::Work)
        .map(|c| {
            (
                c.gap.group_key.as_ref().map(crate::types::GroupKey::as_str),
                c.gap.timestamp,
            )
        })
        .collect();

    events
        .iter()
        .filter(|e| {
            work_batches.contains(&(
                e.group_key.as_ref().map(crate::types::GroupKey::as_str),
                e.timestamp,
            ))
        })
        .cloned()
        .collect()
}

/// Explicit, invalidatable memoization of the normalizer stage.
///
/// Keyed by a content hash of the raw rows. Only the normalizer is cached:
/// no analysis parameter affects it, so repeated interactive parameter tweaks
/// on the same upload skip re-normalization safely. The cache is an owned
/// object passed around by the caller, not ambient global state.
#[derive(Debug, Default)]
pub struct NormalizerCache {
    entries: HashMap<[u8; 32], Normalized>,
}

impl NormalizerCache {
    /// Creates an empty cache.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the normalized form of `records`, computing it on a miss.
    pub fn get_or_normalize(&mut self, records: &[RawRecord]) -> &Normalized {
        let key = content_key(records);
        self.entries.entry(key).or_insert_with(|| {
            tracing::debug!("normalizer cache miss");
            normalize(records)
        })
    }

    /// Number of cached datasets.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the cache is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Drops all cached datasets.
    pub fn clear(&mut self) {
        self.entries.clear();
    }
}

/// SHA-256 over the raw row content, with field separators so adjacent
/// fields cannot collide.
fn content_key(records: &[RawRecord]) -> [u8; 32] {
    let mut hasher = Sha256::new();
    for record in records {
        hasher.update(record.timestamp.as_bytes());
        hasher.update([0x1f]);
        for field in [&record.unit_id, &record.group_key, &record.actor_key] {
            if let Some(value) = field {
                hasher.update(value.as_bytes());
            }
            hasher.update([0x1f]);
        }
        hasher.update([0x1e]);
    }
    hasher.finalize().into()
}

#[cfg(test)]
mod tests {
    use chrono::TimeZone;

    use super::*;
    use crate::filter::ThresholdPolicy;

    fn ts(seconds: i64) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 3, 1, 8, 0, 0)
            .single()
            .expect("valid test timestamp")
            + chrono::Duration::seconds(seconds)
    }

    fn record_at(seconds: i64) -> RawRecord {
        RawRecord::from_timestamp(ts(seconds).to_rfc3339())
    }

    fn record_with_unit(seconds: i64, unit: &str) -> RawRecord {
        RawRecord {
            timestamp: ts(seconds).to_rfc3339(),
            unit_id: Some(unit.to_string()),
            group_key: None,
            actor_key: None,
        }
    }

    fn pipeline_with_bounds(lower: f64, upper: f64) -> Pipeline {
        Pipeline::new(PipelineConfig {
            filter: FilterConfig {
                policy: ThresholdPolicy::Fixed {
                    lower_seconds: lower,
                    upper_seconds: upper,
                },
                min_work_samples: 5,
            },
            ..PipelineConfig::default()
        })
    }

    #[test]
    fn steady_line_estimates_sixty_seconds() {
        // 10 events one per minute: all 9 gaps in the work band, both
        // estimates at 60s.
        let records: Vec<RawRecord> = (0..10).map(|i| record_at(i * 60)).collect();
        let pipeline = pipeline_with_bounds(5.0, 600.0);

        let report = pipeline.analyze(&records).unwrap();

        assert_eq!(report.counts.work, 9);
        assert_eq!(report.counts.burst_noise, 0);
        assert_eq!(report.counts.idle, 0);
        assert!((report.estimate.theoretical_seconds - 60.0).abs() < 1e-9);
        assert!((report.estimate.real_seconds - 60.0).abs() < 1e-9);
        assert_eq!(report.estimate.method, estimate::EstimatorMethod::Percentile);
    }

    #[test]
    fn lunch_break_excluded_from_estimate() {
        // 100 events 60s apart with one 3600s hole: the hole is idle and the
        // real estimate stays at 60s.
        let mut records = Vec::new();
        for i in 0..50 {
            records.push(record_at(i * 60));
        }
        let resume = 49 * 60 + 3600;
        for i in 0..50 {
            records.push(record_at(resume + i * 60));
        }
        let pipeline = pipeline_with_bounds(5.0, 600.0);

        let report = pipeline.analyze(&records).unwrap();

        assert_eq!(report.counts.idle, 1);
        assert_eq!(report.counts.work, 98);
        assert!((report.estimate.real_seconds - 60.0).abs() < 1e-9);
        assert!((report.estimate.theoretical_seconds - 60.0).abs() < 1e-9);
    }

    #[test]
    fn single_batch_triggers_fallback() {
        // First event alone, then everything in one batch: one work-band
        // candidate at most, under the minimum -> global average.
        let mut records = vec![record_at(0)];
        for _ in 0..5 {
            records.push(record_at(500));
        }
        let pipeline = pipeline_with_bounds(5.0, 600.0);

        let report = pipeline.analyze(&records).unwrap();

        assert_eq!(
            report.estimate.method,
            estimate::EstimatorMethod::GlobalAverageFallback
        );
        let expected = 500.0 / 6.0;
        assert!((report.estimate.real_seconds - expected).abs() < 1e-9);
        assert!((report.estimate.theoretical_seconds - expected).abs() < 1e-9);
    }

    #[test]
    fn all_zero_gaps_fall_back_without_error() {
        // Every event in one batch: zero elapsed, zero gaps in the work
        // band. The pipeline degrades to the clamped fallback, no panic.
        let records: Vec<RawRecord> = (0..6).map(|_| record_at(0)).collect();
        let pipeline = pipeline_with_bounds(5.0, 600.0);

        let report = pipeline.analyze(&records).unwrap();

        assert_eq!(
            report.estimate.method,
            estimate::EstimatorMethod::GlobalAverageFallback
        );
        assert!(report.estimate.real_seconds >= estimate::RATE_EPSILON_SECONDS);
    }

    #[test]
    fn empty_dataset_is_an_error() {
        let pipeline = Pipeline::default();

        let err = pipeline.analyze(&[]).unwrap_err();
        assert!(matches!(err, EngineError::EmptyDataset { .. }));

        let err = pipeline
            .analyze(&[RawRecord::from_timestamp("garbage".to_string())])
            .unwrap_err();
        let EngineError::EmptyDataset {
            rows_in,
            usable_rows,
            parse_failures,
        } = err;
        assert_eq!(rows_in, 1);
        assert_eq!(usable_rows, 0);
        assert_eq!(parse_failures, 1);
    }

    #[test]
    fn duplicate_unit_contributes_no_gap() {
        // A unit scanned twice 2s apart: the duplicate is dropped, so no
        // 2-second gap exists anywhere in the series.
        let records = vec![
            record_with_unit(0, "SN-1"),
            record_with_unit(60, "SN-2"),
            record_with_unit(62, "SN-2"),
            record_with_unit(120, "SN-3"),
        ];
        let pipeline = pipeline_with_bounds(5.0, 600.0);

        let report = pipeline.analyze(&records).unwrap();

        assert_eq!(report.counts.duplicates_dropped, 1);
        assert_eq!(report.counts.gaps, 2);
        assert!(
            report
                .diagnostics
                .iter()
                .all(|d| (d.value_seconds - 60.0).abs() < 1e-9)
        );
    }

    #[test]
    fn diagnostics_cover_every_gap() {
        let records: Vec<RawRecord> = (0..10).map(|i| record_at(i * 60)).collect();
        let pipeline = pipeline_with_bounds(5.0, 600.0);

        let report = pipeline.analyze(&records).unwrap();

        assert_eq!(report.diagnostics.len(), report.counts.gaps);
        assert_eq!(
            report.counts.burst_noise + report.counts.work + report.counts.idle,
            report.counts.gaps
        );
    }

    #[test]
    fn clean_events_are_the_work_batches() {
        // 60s cadence with one burst-noise event 1s after its predecessor.
        let records = vec![
            record_at(0),
            record_at(60),
            record_at(61),
            record_at(120),
            record_at(180),
            record_at(240),
            record_at(300),
        ];
        let pipeline = pipeline_with_bounds(5.0, 600.0);

        let report = pipeline.analyze(&records).unwrap();

        // The 61s event's gap (1s) is burst noise; it must not be in the
        // clean subset. The first event has no gap, also excluded.
        assert!(report.clean_events.iter().all(|e| e.timestamp != ts(61)));
        assert!(report.clean_events.iter().all(|e| e.timestamp != ts(0)));
        assert_eq!(report.clean_events.len(), report.counts.work);
    }

    #[test]
    fn analysis_is_idempotent() {
        let records: Vec<RawRecord> = (0..20)
            .map(|i| record_at(i * 47 + (i % 3) * 5))
            .collect();
        let pipeline = pipeline_with_bounds(5.0, 600.0);

        let first = pipeline.analyze(&records).unwrap();
        let second = pipeline.analyze(&records).unwrap();

        assert_eq!(first, second);
        // Bit-identical through serialization too.
        assert_eq!(
            serde_json::to_string(&first).unwrap(),
            serde_json::to_string(&second).unwrap()
        );
    }

    #[test]
    fn cache_hit_returns_same_normalization() {
        let records: Vec<RawRecord> = (0..10).map(|i| record_at(i * 60)).collect();
        let mut cache = NormalizerCache::new();

        let first = cache.get_or_normalize(&records).clone();
        let second = cache.get_or_normalize(&records).clone();

        assert_eq!(first, second);
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn cache_distinguishes_different_content() {
        let mut cache = NormalizerCache::new();
        let a: Vec<RawRecord> = (0..5).map(|i| record_at(i * 60)).collect();
        let b: Vec<RawRecord> = (0..5).map(|i| record_at(i * 90)).collect();

        let _ = cache.get_or_normalize(&a);
        let _ = cache.get_or_normalize(&b);

        assert_eq!(cache.len(), 2);
        cache.clear();
        assert!(cache.is_empty());
    }

    #[test]
    fn cached_normalization_feeds_parameter_sweeps() {
        // Re-analyzing the same upload with different thresholds reuses the
        // cached normalizer output.
        let records: Vec<RawRecord> = (0..10).map(|i| record_at(i * 60)).collect();
        let mut cache = NormalizerCache::new();
        let normalized = cache.get_or_normalize(&records).clone();

        let strict = pipeline_with_bounds(5.0, 30.0)
            .analyze_normalized(&normalized)
            .unwrap();
        let loose = pipeline_with_bounds(5.0, 600.0)
            .analyze_normalized(&normalized)
            .unwrap();

        // Strict bounds classify the 60s gaps as idle -> fallback; loose
        // bounds keep them as work.
        assert_eq!(
            strict.estimate.method,
            estimate::EstimatorMethod::GlobalAverageFallback
        );
        assert_eq!(loose.estimate.method, estimate::EstimatorMethod::Percentile);
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn grouped_analysis_keeps_stations_independent() {
        // Two stations interleaved 30s apart globally, 60s apart within a
        // station: estimates reflect the per-station cadence.
        let mut records = Vec::new();
        for i in 0..10 {
            records.push(RawRecord {
                timestamp: ts(i * 60).to_rfc3339(),
                unit_id: None,
                group_key: Some("ICT".to_string()),
                actor_key: None,
            });
            records.push(RawRecord {
                timestamp: ts(i * 60 + 30).to_rfc3339(),
                unit_id: None,
                group_key: Some("FCT".to_string()),
                actor_key: None,
            });
        }
        let pipeline = pipeline_with_bounds(5.0, 600.0);

        let report = pipeline.analyze(&records).unwrap();

        assert!((report.estimate.real_seconds - 60.0).abs() < 1e-9);
    }
}
