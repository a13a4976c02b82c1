//! Configuration loading and management.

use std::path::{Path, PathBuf};

use ct_core::{
    EstimatorConfig, FilterConfig, PipelineConfig, Strategy, ThresholdPolicy,
    filter::{
        DEFAULT_LOWER_SECONDS, DEFAULT_MIN_WORK_SAMPLES, DEFAULT_UPPER_FLOOR_SECONDS,
        DEFAULT_UPPER_SECONDS,
    },
};
use figment::Figment;
use figment::providers::{Env, Format, Serialized, Toml};
use serde::{Deserialize, Serialize};

use crate::cli::EngineArgs;

/// Default shift length for the capacity projection.
const DEFAULT_SHIFT_MINUTES: f64 = 480.0;

/// Default efficiency fraction for the capacity projection.
const DEFAULT_TARGET_EFFICIENCY: f64 = 0.85;

/// Application configuration.
///
/// Loaded from the platform config directory, an explicit `--config` file,
/// and `CT_`-prefixed environment variables; per-invocation flags override
/// individual values on top of that.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Lower work-band bound in seconds.
    pub lower_seconds: f64,
    /// Upper work-band bound in seconds (fixed policy).
    pub upper_seconds: f64,
    /// When set, derive the upper bound as Q3 + k * IQR instead.
    pub iqr_multiplier: Option<f64>,
    /// Floor for the statistically derived upper bound.
    pub upper_floor_seconds: f64,
    /// Minimum work-classified gaps before estimation is attempted.
    pub min_work_samples: usize,
    /// Estimator strategy.
    pub strategy: Strategy,
    /// Percentile for the theoretical rate.
    pub theoretical_percentile: f64,
    /// Window length for the windowed-throughput strategy.
    pub window_seconds: f64,
    /// Available shift minutes for the capacity projection.
    pub shift_minutes: f64,
    /// Target efficiency fraction for the capacity projection.
    pub target_efficiency: f64,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            lower_seconds: DEFAULT_LOWER_SECONDS,
            upper_seconds: DEFAULT_UPPER_SECONDS,
            iqr_multiplier: None,
            upper_floor_seconds: DEFAULT_UPPER_FLOOR_SECONDS,
            min_work_samples: DEFAULT_MIN_WORK_SAMPLES,
            strategy: Strategy::default(),
            theoretical_percentile: ct_core::estimate::DEFAULT_THEORETICAL_PERCENTILE,
            window_seconds: ct_core::estimate::DEFAULT_WINDOW_SECONDS,
            shift_minutes: DEFAULT_SHIFT_MINUTES,
            target_efficiency: DEFAULT_TARGET_EFFICIENCY,
        }
    }
}

impl Config {
    /// Loads configuration, optionally from a specific file.
    #[expect(
        clippy::result_large_err,
        reason = "figment::Error is large but only returned at startup"
    )]
    pub fn load_from(config_path: Option<&Path>) -> Result<Self, figment::Error> {
        let mut figment = Figment::from(Serialized::defaults(Self::default()));

        // Load from default config location
        if let Some(config_dir) = dirs_config_path() {
            figment = figment.merge(Toml::file(config_dir.join("config.toml")));
        }

        // Load from specified config file
        if let Some(path) = config_path {
            figment = figment.merge(Toml::file(path));
        }

        // Load from environment variables (CT_*)
        figment = figment.merge(Env::prefixed("CT_"));

        figment.extract()
    }

    /// Applies per-invocation flag overrides.
    #[must_use]
    pub fn merged(mut self, args: &EngineArgs) -> Self {
        if let Some(lower) = args.lower {
            self.lower_seconds = lower;
        }
        if let Some(upper) = args.upper {
            self.upper_seconds = upper;
        }
        if args.iqr.is_some() {
            self.iqr_multiplier = args.iqr;
        }
        if let Some(min) = args.min_work_samples {
            self.min_work_samples = min;
        }
        if let Some(strategy) = args.strategy {
            self.strategy = strategy;
        }
        if let Some(percentile) = args.percentile {
            self.theoretical_percentile = percentile;
        }
        if let Some(window) = args.window {
            self.window_seconds = window;
        }
        if let Some(shift) = args.shift_minutes {
            self.shift_minutes = shift;
        }
        if let Some(efficiency) = args.efficiency {
            self.target_efficiency = efficiency;
        }
        self
    }

    /// The engine-side configuration this resolves to.
    #[must_use]
    pub fn pipeline_config(&self) -> PipelineConfig {
        let policy = self.iqr_multiplier.map_or(
            ThresholdPolicy::Fixed {
                lower_seconds: self.lower_seconds,
                upper_seconds: self.upper_seconds,
            },
            |iqr_multiplier| ThresholdPolicy::Statistical {
                lower_seconds: self.lower_seconds,
                iqr_multiplier,
                upper_floor_seconds: self.upper_floor_seconds,
            },
        );

        PipelineConfig {
            filter: FilterConfig {
                policy,
                min_work_samples: self.min_work_samples,
            },
            strategy: self.strategy,
            estimator: EstimatorConfig {
                theoretical_percentile: self.theoretical_percentile,
                window_seconds: self.window_seconds,
            },
        }
    }
}

/// Returns the platform-specific config directory for ct.
fn dirs_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|p| p.join("ct"))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn no_overrides() -> EngineArgs {
        EngineArgs {
            lower: None,
            upper: None,
            iqr: None,
            min_work_samples: None,
            strategy: None,
            percentile: None,
            window: None,
            shift_minutes: None,
            efficiency: None,
        }
    }

    #[test]
    fn default_config_uses_fixed_policy() {
        let config = Config::default();
        let pipeline = config.pipeline_config();

        assert!(matches!(
            pipeline.filter.policy,
            ThresholdPolicy::Fixed { .. }
        ));
        assert_eq!(pipeline.strategy, Strategy::Percentile);
    }

    #[test]
    fn iqr_flag_switches_to_statistical_policy() {
        let args = EngineArgs {
            iqr: Some(2.0),
            ..no_overrides()
        };
        let config = Config::default().merged(&args);
        let pipeline = config.pipeline_config();

        match pipeline.filter.policy {
            ThresholdPolicy::Statistical { iqr_multiplier, .. } => {
                assert!((iqr_multiplier - 2.0).abs() < f64::EPSILON);
            }
            ThresholdPolicy::Fixed { .. } => panic!("expected statistical policy"),
        }
    }

    #[test]
    fn flag_overrides_take_precedence() {
        let args = EngineArgs {
            lower: Some(10.0),
            upper: Some(1200.0),
            strategy: Some(Strategy::DensityMode),
            shift_minutes: Some(450.0),
            ..no_overrides()
        };

        let config = Config::default().merged(&args);

        assert!((config.lower_seconds - 10.0).abs() < f64::EPSILON);
        assert!((config.upper_seconds - 1200.0).abs() < f64::EPSILON);
        assert_eq!(config.strategy, Strategy::DensityMode);
        assert!((config.shift_minutes - 450.0).abs() < f64::EPSILON);
    }

    #[test]
    fn dirs_config_path_ends_with_ct() {
        if let Some(path) = dirs_config_path() {
            assert_eq!(path.file_name().unwrap(), "ct");
        }
    }
}
