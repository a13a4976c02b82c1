//! Cycle-time estimation engine for shop-floor traceability logs.
//!
//! Takes a raw, noisy, irregularly-sampled sequence of scan records and
//! produces a defensible "seconds per unit" number, robust to batched
//! timestamps, logging bursts, and long idle gaps. Four stages, strictly
//! forward:
//!
//! 1. Normalizer: timestamp repair, unit deduplication, chronological sort
//! 2. Gap extractor: inter-batch deltas, burst de-batching
//! 3. Noise/idle filter: burst-noise / work / idle classification
//! 4. Rate estimator: theoretical and real cycle time via a pluggable
//!    strategy, with a global-average fallback that never fails

pub mod estimate;
pub mod event;
pub mod filter;
pub mod gaps;
pub mod normalize;
pub mod pipeline;
mod stats;
pub mod types;

pub use estimate::{
    EstimatorConfig, EstimatorMethod, RATE_EPSILON_SECONDS, RateEstimate, RateEstimator, Strategy,
    capacity_units, clamp_rate,
};
pub use event::{Event, RawRecord};
pub use filter::{FilterConfig, GapClass, ResolvedThresholds, ThresholdPolicy};
pub use gaps::Gap;
pub use normalize::{Normalized, normalize, parse_timestamp};
pub use pipeline::{
    AnalysisReport, DiagnosticPoint, EngineError, NormalizerCache, Pipeline, PipelineConfig,
    StageCounts,
};
pub use types::{GroupKey, UnitId, ValidationError};
