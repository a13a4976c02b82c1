//! Rate estimation: reducing the work-classified gap population to a
//! theoretical and a real cycle time.
//!
//! No single heuristic is reliable across every input distribution, so the
//! estimator is a strategy seam: four interchangeable implementations plus a
//! global-average fallback that never fails. "Theoretical" is the best-case
//! sustained rate (lower seconds = faster); "real" is the typical sustained
//! rate under normal variability.

use serde::{Deserialize, Serialize};

use crate::event::Event;
use crate::stats;

/// Floor applied to any computed rate before capacity math, so a degenerate
/// estimate can never propagate NaN/Inf into `shift_minutes / cycle_minutes`.
pub const RATE_EPSILON_SECONDS: f64 = 0.01;

/// Default percentile for the "best sustained rate" point estimate.
pub const DEFAULT_THEORETICAL_PERCENTILE: f64 = 20.0;

/// Default window for the windowed-throughput strategy.
pub const DEFAULT_WINDOW_SECONDS: f64 = 600.0;

/// Cluster count for the clustering strategy.
const CLUSTER_COUNT: usize = 3;

/// Iteration cap for the 1-D k-means loop.
const KMEANS_MAX_ITERATIONS: usize = 50;

/// Which estimator produced a rate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EstimatorMethod {
    Percentile,
    DensityMode,
    Clustering,
    WindowedThroughput,
    GlobalAverageFallback,
}

impl EstimatorMethod {
    /// String representation for export and display.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Percentile => "percentile",
            Self::DensityMode => "density_mode",
            Self::Clustering => "clustering",
            Self::WindowedThroughput => "windowed_throughput",
            Self::GlobalAverageFallback => "global_average_fallback",
        }
    }
}

impl std::fmt::Display for EstimatorMethod {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The pipeline's point estimates.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RateEstimate {
    /// Best-case sustained seconds per unit.
    pub theoretical_seconds: f64,
    /// Typical sustained seconds per unit.
    pub real_seconds: f64,
    /// Which strategy produced the estimate.
    pub method: EstimatorMethod,
    /// Size of the work-classified population used (0 for the fallback).
    pub sample_count: usize,
}

impl RateEstimate {
    /// Clamps both rates to the epsilon floor.
    #[must_use]
    fn clamped(mut self) -> Self {
        self.theoretical_seconds = clamp_rate(self.theoretical_seconds);
        self.real_seconds = clamp_rate(self.real_seconds);
        self
    }
}

/// Replaces a non-finite or non-positive rate with the epsilon floor.
#[must_use]
pub fn clamp_rate(seconds: f64) -> f64 {
    if seconds.is_finite() && seconds > RATE_EPSILON_SECONDS {
        seconds
    } else {
        RATE_EPSILON_SECONDS
    }
}

/// Units producible in a shift at the given cycle time.
///
/// `shift_minutes` and `efficiency` are caller-supplied configuration; the
/// engine never computes them. The cycle time is clamped first, so the result
/// is always finite.
#[must_use]
pub fn capacity_units(shift_minutes: f64, efficiency: f64, cycle_seconds: f64) -> f64 {
    let cycle_minutes = clamp_rate(cycle_seconds) / 60.0;
    shift_minutes / cycle_minutes * efficiency
}

/// Strategy selection, as configuration rather than code duplication.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Strategy {
    #[default]
    Percentile,
    DensityMode,
    Clustering,
    WindowedThroughput,
}

impl Strategy {
    /// String representation for configuration round-trips.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Percentile => "percentile",
            Self::DensityMode => "density_mode",
            Self::Clustering => "clustering",
            Self::WindowedThroughput => "windowed_throughput",
        }
    }
}

impl std::fmt::Display for Strategy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for Strategy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "percentile" => Ok(Self::Percentile),
            "density_mode" => Ok(Self::DensityMode),
            "clustering" => Ok(Self::Clustering),
            "windowed_throughput" => Ok(Self::WindowedThroughput),
            _ => Err(format!("invalid estimator strategy: {s}")),
        }
    }
}

/// Tuning knobs shared across strategies.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct EstimatorConfig {
    /// Percentile used for the theoretical (best-case) rate.
    pub theoretical_percentile: f64,
    /// Window length for the windowed-throughput strategy.
    pub window_seconds: f64,
}

impl Default for EstimatorConfig {
    fn default() -> Self {
        Self {
            theoretical_percentile: DEFAULT_THEORETICAL_PERCENTILE,
            window_seconds: DEFAULT_WINDOW_SECONDS,
        }
    }
}

/// Everything a strategy may consume.
///
/// Distribution strategies read `work_seconds`; the windowed strategy reads
/// the raw normalized events instead.
#[derive(Debug, Clone, Copy)]
pub struct EstimatorInput<'a> {
    /// Imputed per-unit seconds of the work-classified gaps.
    pub work_seconds: &'a [f64],
    /// The full normalized event sequence, sorted ascending.
    pub events: &'a [Event],
}

/// A cycle-time estimator strategy.
///
/// Returning `None` means this strategy's preconditions are unmet for the
/// input; the pipeline then uses [`global_average_fallback`].
pub trait RateEstimator {
    /// The method tag attached to produced estimates.
    fn method(&self) -> EstimatorMethod;

    /// Produces the two point estimates, or declines.
    fn estimate(&self, input: &EstimatorInput<'_>) -> Option<RateEstimate>;
}

/// Builds the configured strategy.
#[must_use]
pub fn build_estimator(strategy: Strategy, config: &EstimatorConfig) -> Box<dyn RateEstimator> {
    match strategy {
        Strategy::Percentile => Box::new(PercentileEstimator {
            theoretical_percentile: config.theoretical_percentile,
        }),
        Strategy::DensityMode => Box::new(DensityModeEstimator),
        Strategy::Clustering => Box::new(ClusteringEstimator {
            theoretical_percentile: config.theoretical_percentile,
        }),
        Strategy::WindowedThroughput => Box::new(WindowedThroughputEstimator {
            window_seconds: config.window_seconds,
            theoretical_percentile: config.theoretical_percentile,
        }),
    }
}

/// Theoretical = low percentile of the work gaps, real = median.
///
/// The simplest defensible reduction and the primary strategy.
#[derive(Debug, Clone, Copy)]
pub struct PercentileEstimator {
    /// Percentile for the theoretical rate (10-25 is sensible).
    pub theoretical_percentile: f64,
}

impl Default for PercentileEstimator {
    fn default() -> Self {
        Self {
            theoretical_percentile: DEFAULT_THEORETICAL_PERCENTILE,
        }
    }
}

impl RateEstimator for PercentileEstimator {
    fn method(&self) -> EstimatorMethod {
        EstimatorMethod::Percentile
    }

    fn estimate(&self, input: &EstimatorInput<'_>) -> Option<RateEstimate> {
        let work = input.work_seconds;
        let theoretical = stats::percentile(work, self.theoretical_percentile)?;
        let real = stats::median(work)?;
        Some(
            RateEstimate {
                theoretical_seconds: theoretical,
                real_seconds: real,
                method: self.method(),
                sample_count: work.len(),
            }
            .clamped(),
        )
    }
}

/// Theoretical = mode of a Gaussian KDE over `ln(work)`, real = median.
///
/// The log transform tames the heavy right tail cycle-time distributions
/// always have. A constant sample has no defined density mode; it is returned
/// directly.
#[derive(Debug, Clone, Copy, Default)]
pub struct DensityModeEstimator;

/// Grid resolution for the KDE scan.
const KDE_GRID_POINTS: usize = 256;

impl RateEstimator for DensityModeEstimator {
    fn method(&self) -> EstimatorMethod {
        EstimatorMethod::DensityMode
    }

    #[expect(
        clippy::cast_precision_loss,
        reason = "sample sizes are far below f64 integer precision"
    )]
    fn estimate(&self, input: &EstimatorInput<'_>) -> Option<RateEstimate> {
        let work = input.work_seconds;
        if work.is_empty() {
            return None;
        }

        let real = stats::median(work)?;

        let logs: Vec<f64> = work.iter().filter(|v| **v > 0.0).map(|v| v.ln()).collect();
        if logs.is_empty() {
            return None;
        }

        let sigma = stats::std_dev(&logs);
        if sigma == 0.0 {
            // Degenerate sample: every work gap is the same value.
            let constant = (logs[0]).exp();
            return Some(
                RateEstimate {
                    theoretical_seconds: constant,
                    real_seconds: real,
                    method: self.method(),
                    sample_count: work.len(),
                }
                .clamped(),
            );
        }

        // Silverman's rule of thumb.
        let bandwidth = 1.06 * sigma * (logs.len() as f64).powf(-0.2);

        let min = logs.iter().copied().fold(f64::INFINITY, f64::min) - bandwidth;
        let max = logs.iter().copied().fold(f64::NEG_INFINITY, f64::max) + bandwidth;
        let step = (max - min) / (KDE_GRID_POINTS - 1) as f64;

        let mut best_x = min;
        let mut best_density = f64::NEG_INFINITY;
        for i in 0..KDE_GRID_POINTS {
            let x = (i as f64).mul_add(step, min);
            let density: f64 = logs
                .iter()
                .map(|v| {
                    let z = (x - v) / bandwidth;
                    (-0.5 * z * z).exp()
                })
                .sum();
            if density > best_density {
                best_density = density;
                best_x = x;
            }
        }

        Some(
            RateEstimate {
                theoretical_seconds: best_x.exp(),
                real_seconds: real,
                method: self.method(),
                sample_count: work.len(),
            }
            .clamped(),
        )
    }
}

/// Partitions `log1p(work)` into three clusters and reads the rate off the
/// middle one.
///
/// The extreme clusters soak up residual fast noise and slow stragglers that
/// survived the band filter; the middle cluster is the production rate.
#[derive(Debug, Clone, Copy)]
pub struct ClusteringEstimator {
    /// Percentile of the middle cluster used for the theoretical rate.
    pub theoretical_percentile: f64,
}

impl Default for ClusteringEstimator {
    fn default() -> Self {
        Self {
            theoretical_percentile: DEFAULT_THEORETICAL_PERCENTILE,
        }
    }
}

impl RateEstimator for ClusteringEstimator {
    fn method(&self) -> EstimatorMethod {
        EstimatorMethod::Clustering
    }

    fn estimate(&self, input: &EstimatorInput<'_>) -> Option<RateEstimate> {
        let work = input.work_seconds;
        let logs: Vec<f64> = work.iter().map(|v| v.ln_1p()).collect();

        let clusters = kmeans_1d(&logs, CLUSTER_COUNT)?;

        // Order clusters by their medians and take the middle one.
        let mut medians: Vec<(usize, f64)> = clusters
            .iter()
            .enumerate()
            .filter_map(|(i, members)| stats::median(members).map(|m| (i, m)))
            .collect();
        if medians.len() < CLUSTER_COUNT {
            return None;
        }
        medians.sort_by(|a, b| a.1.total_cmp(&b.1));
        let middle = &clusters[medians[CLUSTER_COUNT / 2].0];

        let real = stats::median(middle)?.exp_m1();
        let theoretical = stats::percentile(middle, self.theoretical_percentile)?.exp_m1();

        Some(
            RateEstimate {
                theoretical_seconds: theoretical,
                real_seconds: real,
                method: self.method(),
                sample_count: work.len(),
            }
            .clamped(),
        )
    }
}

/// 1-D k-means. Returns the member values per cluster, or `None` when there
/// are not enough distinct values to support `k` clusters.
fn kmeans_1d(values: &[f64], k: usize) -> Option<Vec<Vec<f64>>> {
    let mut distinct: Vec<f64> = values.to_vec();
    distinct.sort_by(f64::total_cmp);
    distinct.dedup();
    if distinct.len() < k {
        return None;
    }

    let mut sorted = values.to_vec();
    sorted.sort_by(f64::total_cmp);

    // Seed centroids from spread-out percentiles of the sorted sample.
    let mut centroids: Vec<f64> = (0..k)
        .map(|i| {
            #[expect(clippy::cast_precision_loss, reason = "k is 3")]
            let p = (i as f64 + 0.5) / k as f64 * 100.0;
            stats::percentile_sorted(&sorted, p)
        })
        .collect();

    let mut assignments = vec![0usize; values.len()];
    for _ in 0..KMEANS_MAX_ITERATIONS {
        let mut changed = false;
        for (value, slot) in values.iter().zip(assignments.iter_mut()) {
            let nearest = centroids
                .iter()
                .enumerate()
                .min_by(|(_, a), (_, b)| (*value - **a).abs().total_cmp(&(*value - **b).abs()))
                .map(|(i, _)| i)
                .unwrap_or(0);
            if nearest != *slot {
                *slot = nearest;
                changed = true;
            }
        }

        for (i, centroid) in centroids.iter_mut().enumerate() {
            let members: Vec<f64> = values
                .iter()
                .zip(assignments.iter())
                .filter(|(_, a)| **a == i)
                .map(|(v, _)| *v)
                .collect();
            // An empty cluster keeps its centroid.
            if let Some(m) = stats::mean(&members) {
                *centroid = m;
            }
        }

        if !changed {
            break;
        }
    }

    let mut clusters = vec![Vec::new(); k];
    for (value, assignment) in values.iter().zip(assignments.iter()) {
        clusters[*assignment].push(*value);
    }
    Some(clusters)
}

/// Buckets raw events into fixed time windows and estimates from per-window
/// throughput instead of individual gaps.
///
/// Immune to de-batching artifacts: a burst logged under one timestamp still
/// counts as that many units in its window.
#[derive(Debug, Clone, Copy)]
pub struct WindowedThroughputEstimator {
    /// Window length in seconds.
    pub window_seconds: f64,
    /// Percentile of window rates used for the theoretical rate.
    pub theoretical_percentile: f64,
}

impl Default for WindowedThroughputEstimator {
    fn default() -> Self {
        Self {
            window_seconds: DEFAULT_WINDOW_SECONDS,
            theoretical_percentile: DEFAULT_THEORETICAL_PERCENTILE,
        }
    }
}

impl RateEstimator for WindowedThroughputEstimator {
    fn method(&self) -> EstimatorMethod {
        EstimatorMethod::WindowedThroughput
    }

    #[expect(
        clippy::cast_precision_loss,
        clippy::cast_possible_truncation,
        clippy::cast_sign_loss,
        reason = "window indexes and counts are far below f64 integer precision"
    )]
    fn estimate(&self, input: &EstimatorInput<'_>) -> Option<RateEstimate> {
        let events = input.events;
        if events.len() < 2 || self.window_seconds <= 0.0 {
            return None;
        }

        let first = events.first()?.timestamp;
        let mut counts: std::collections::HashMap<u64, usize> = std::collections::HashMap::new();
        for event in events {
            let offset_seconds = (event.timestamp - first).num_milliseconds() as f64 / 1000.0;
            let window = (offset_seconds / self.window_seconds).floor() as u64;
            *counts.entry(window).or_insert(0) += 1;
        }

        // Only windows with activity participate; empty windows are idle
        // time, already excluded by construction.
        let rates: Vec<f64> = counts
            .values()
            .map(|count| self.window_seconds / *count as f64)
            .collect();

        let theoretical = stats::percentile(&rates, self.theoretical_percentile)?;
        let real = stats::median(&rates)?;

        Some(
            RateEstimate {
                theoretical_seconds: theoretical,
                real_seconds: real,
                method: self.method(),
                sample_count: rates.len(),
            }
            .clamped(),
        )
    }
}

/// The estimator of last resort: total elapsed time over total unit count.
///
/// Used when the filter reports insufficient signal or the selected strategy
/// declines. Never fails given at least 2 events; both rates are the single
/// global average.
#[must_use]
#[expect(
    clippy::cast_precision_loss,
    reason = "event counts are far below f64 integer precision"
)]
pub fn global_average_fallback(events: &[Event]) -> Option<RateEstimate> {
    let first = events.first()?;
    let last = events.last()?;
    if events.len() < 2 {
        return None;
    }

    let elapsed_seconds = (last.timestamp - first.timestamp).num_milliseconds() as f64 / 1000.0;
    let average = elapsed_seconds / events.len() as f64;

    Some(
        RateEstimate {
            theoretical_seconds: average,
            real_seconds: average,
            method: EstimatorMethod::GlobalAverageFallback,
            sample_count: events.len(),
        }
        .clamped(),
    )
}
