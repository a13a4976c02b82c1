//! Gap classification: burst noise, plausible work, idle time.

use serde::{Deserialize, Serialize};

use crate::gaps::Gap;
use crate::stats;

/// Minimum work-classified sample size before estimation is attempted.
pub const DEFAULT_MIN_WORK_SAMPLES: usize = 5;

/// Default lower bound: below this a gap is a system-clock artifact, not a
/// human/process step. Deployments tune this per line (observed 1-40s).
pub const DEFAULT_LOWER_SECONDS: f64 = 5.0;

/// Default upper bound: above this a gap is a break or stoppage, not cycle
/// time. Deployments tune this per line (observed 600-1800s).
pub const DEFAULT_UPPER_SECONDS: f64 = 900.0;

/// Floor for the statistically derived upper bound, so a very tight
/// distribution does not classify everything as idle.
pub const DEFAULT_UPPER_FLOOR_SECONDS: f64 = 20.0;

/// Which band a gap's imputed per-unit seconds falls in.
///
/// Transient: recomputed per analysis run, never stored on the gap.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GapClass {
    /// Too fast to be a real process step; a burst artifact.
    BurstNoise,
    /// A plausible per-unit cycle time.
    Work,
    /// A break, stoppage, or shift change.
    Idle,
}

impl GapClass {
    /// String representation for export and display.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::BurstNoise => "burst_noise",
            Self::Work => "work",
            Self::Idle => "idle",
        }
    }
}

impl std::fmt::Display for GapClass {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for GapClass {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "burst_noise" => Ok(Self::BurstNoise),
            "work" => Ok(Self::Work),
            "idle" => Ok(Self::Idle),
            _ => Err(format!("invalid gap class: {s}")),
        }
    }
}

/// How the work band's bounds are chosen.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "policy", rename_all = "snake_case")]
pub enum ThresholdPolicy {
    /// Caller-supplied bounds.
    Fixed {
        /// Below this: `burst_noise`.
        lower_seconds: f64,
        /// Above this: `idle`.
        upper_seconds: f64,
    },
    /// Upper bound derived from the gap distribution: `Q3 + k * IQR` over
    /// positive gaps, floored so a tight distribution is not over-filtered.
    Statistical {
        /// Below this: `burst_noise` (the lower bound stays fixed).
        lower_seconds: f64,
        /// `k` in `Q3 + k * IQR`. Typically 1.5-3.
        iqr_multiplier: f64,
        /// Never derive an upper bound below this.
        upper_floor_seconds: f64,
    },
}

impl Default for ThresholdPolicy {
    fn default() -> Self {
        Self::Fixed {
            lower_seconds: DEFAULT_LOWER_SECONDS,
            upper_seconds: DEFAULT_UPPER_SECONDS,
        }
    }
}

/// Filter configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FilterConfig {
    /// Threshold selection policy.
    pub policy: ThresholdPolicy,
    /// Minimum work-band size; below it the filter reports insufficient
    /// signal and the caller must fall back.
    pub min_work_samples: usize,
}

impl Default for FilterConfig {
    fn default() -> Self {
        Self {
            policy: ThresholdPolicy::default(),
            min_work_samples: DEFAULT_MIN_WORK_SAMPLES,
        }
    }
}

/// The bounds actually applied, after any statistical derivation.
///
/// Always reported to the caller: an estimate is impossible to sanity-check
/// without knowing which thresholds produced it.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ResolvedThresholds {
    /// Applied lower bound.
    pub lower_seconds: f64,
    /// Applied upper bound.
    pub upper_seconds: f64,
}

/// A gap with its class for this analysis run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClassifiedGap {
    /// The underlying gap, untouched.
    pub gap: Gap,
    /// Band membership under the resolved thresholds.
    pub class: GapClass,
}

/// Result of classifying a gap population.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Classification {
    /// Every input gap, each tagged exactly one class.
    pub gaps: Vec<ClassifiedGap>,
    /// The bounds that were applied.
    pub thresholds: ResolvedThresholds,
}

impl Classification {
    /// Imputed per-unit seconds of the work-classified gaps, in series order.
    #[must_use]
    pub fn work_seconds(&self) -> Vec<f64> {
        self.gaps
            .iter()
            .filter(|c| c.class == GapClass::Work)
            .map(|c| c.gap.imputed_unit_seconds)
            .collect()
    }

    /// Count of gaps in the given class.
    #[must_use]
    pub fn count(&self, class: GapClass) -> usize {
        self.gaps.iter().filter(|c| c.class == class).count()
    }

    /// Whether the work band is large enough for a distribution-based
    /// estimator. Below the minimum the caller must use the fallback.
    #[must_use]
    pub fn has_sufficient_signal(&self, min_work_samples: usize) -> bool {
        self.count(GapClass::Work) >= min_work_samples
    }
}

/// Classifies every gap into exactly one of the three bands.
///
/// The work band is `lower <= imputed <= upper`; below is `burst_noise`,
/// above is `idle`. The three sets partition the population.
#[must_use]
pub fn classify(gaps: &[Gap], config: &FilterConfig) -> Classification {
    let thresholds = resolve_thresholds(gaps, &config.policy);
    tracing::debug!(
        lower = thresholds.lower_seconds,
        upper = thresholds.upper_seconds,
        gaps = gaps.len(),
        "classifying gaps"
    );

    let classified = gaps
        .iter()
        .map(|gap| {
            let value = gap.imputed_unit_seconds;
            let class = if value < thresholds.lower_seconds {
                GapClass::BurstNoise
            } else if value > thresholds.upper_seconds {
                GapClass::Idle
            } else {
                GapClass::Work
            };
            ClassifiedGap {
                gap: gap.clone(),
                class,
            }
        })
        .collect();

    Classification {
        gaps: classified,
        thresholds,
    }
}

/// Resolves the applied bounds for this gap population.
fn resolve_thresholds(gaps: &[Gap], policy: &ThresholdPolicy) -> ResolvedThresholds {
    match *policy {
        ThresholdPolicy::Fixed {
            lower_seconds,
            upper_seconds,
        } => ResolvedThresholds {
            lower_seconds,
            upper_seconds,
        },
        ThresholdPolicy::Statistical {
            lower_seconds,
            iqr_multiplier,
            upper_floor_seconds,
        } => {
            let positive: Vec<f64> = gaps
                .iter()
                .map(|g| g.imputed_unit_seconds)
                .filter(|v| *v > 0.0)
                .collect();

            let derived = stats::percentile(&positive, 75.0).map_or(
                upper_floor_seconds,
                |q3| {
                    let q1 = stats::percentile(&positive, 25.0).unwrap_or(q3);
                    let iqr = q3 - q1;
                    iqr_multiplier.mul_add(iqr, q3)
                },
            );

            ResolvedThresholds {
                lower_seconds,
                upper_seconds: derived.max(upper_floor_seconds),
            }
        }
    }
}
