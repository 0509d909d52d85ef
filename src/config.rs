// ⚙️ Pipeline Configuration
// Every tunable constant of the pipeline, loadable from TOML.
//
// Defaults reproduce the production values. The curve-fit bounds and the
// projection target have drifted between revisions, so they live here
// instead of being hard-coded at the call sites.

use crate::error::{PipelineError, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

// ============================================================================
// TOP-LEVEL CONFIG
// ============================================================================

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    pub validation: ValidationConfig,
    pub cleaning: CleaningConfig,
    pub curve: CurveConfig,
    pub features: FeatureConfig,
    pub projection: ProjectionConfig,
}

impl PipelineConfig {
    /// Load configuration from a TOML file; missing sections keep defaults
    pub fn load_from_file(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path)?;
        Self::from_toml_str(&content)
    }

    pub fn from_toml_str(content: &str) -> Result<Self> {
        let config: PipelineConfig =
            toml::from_str(content).map_err(|e| PipelineError::Config(e.to_string()))?;
        config.check()?;
        Ok(config)
    }

    /// Reject settings that would make a stage meaningless
    pub fn check(&self) -> Result<()> {
        if !(self.cleaning.lowess_frac > 0.0 && self.cleaning.lowess_frac <= 1.0) {
            return Err(PipelineError::Config(format!(
                "cleaning.lowess_frac must be in (0, 1], got {}",
                self.cleaning.lowess_frac
            )));
        }
        if self.features.bin_width == 0 || self.features.bin_count == 0 {
            return Err(PipelineError::Config(
                "features.bin_width and features.bin_count must be positive".to_string(),
            ));
        }
        for (name, spec) in [
            ("previous", &self.curve.previous),
            ("current", &self.curve.current),
            ("primiparous", &self.curve.primiparous),
        ] {
            spec.check()
                .map_err(|msg| PipelineError::Config(format!("curve.{}: {}", name, msg)))?;
        }
        Ok(())
    }
}

// ============================================================================
// VALIDATION
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ValidationConfig {
    /// Inclusive DIM window counted for early-lactation density
    pub early_window: (i64, i64),

    /// Minimum records inside `early_window` (inclusive boundary)
    pub min_early_records: usize,

    /// Minimum total records of the (animal, parity - 1) lactation
    pub min_previous_records: usize,
}

impl Default for ValidationConfig {
    fn default() -> Self {
        ValidationConfig {
            early_window: (0, 60),
            min_early_records: 50,
            min_previous_records: 100,
        }
    }
}

// ============================================================================
// CLEANING
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CleaningConfig {
    /// A gap of at least this many days between records marks a calving
    pub calving_gap_days: i64,

    /// Exclusive DIM window whose recorded parity is trusted
    pub reliable_dim: (i64, i64),

    /// More negative DIMs than this rejects the anchor recomputation
    pub max_negative_dim: usize,

    /// LOWESS span as a fraction of the group's points
    pub lowess_frac: f64,

    /// Robustness iterations after the initial LOWESS pass
    pub lowess_iterations: usize,

    /// |residual| >= multiplier * residual sd flags an outlier
    pub outlier_sd_multiplier: f64,

    /// Decimals kept on the smoothed curve
    pub smoothed_decimals: i32,
}

impl Default for CleaningConfig {
    fn default() -> Self {
        CleaningConfig {
            calving_gap_days: 15,
            reliable_dim: (10, 300),
            max_negative_dim: 3,
            lowess_frac: 0.10,
            lowess_iterations: 3,
            outlier_sd_multiplier: 3.0,
            smoothed_decimals: 1,
        }
    }
}

// ============================================================================
// CURVE FITTING
// ============================================================================

/// Initial guess and box bounds for the four curve parameters
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ParamBounds {
    pub initial: f64,
    pub lower: f64,
    pub upper: f64,
}

impl ParamBounds {
    pub const fn new(initial: f64, lower: f64, upper: f64) -> Self {
        ParamBounds {
            initial,
            lower,
            upper,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CurveFitSpec {
    pub a: ParamBounds,
    pub b: ParamBounds,
    pub b0: ParamBounds,
    pub c: ParamBounds,
}

impl CurveFitSpec {
    pub fn as_array(&self) -> [ParamBounds; 4] {
        [self.a, self.b, self.b0, self.c]
    }

    pub fn check(&self) -> std::result::Result<(), String> {
        for (name, p) in ["a", "b", "b0", "c"].iter().zip(self.as_array()) {
            if !(p.lower.is_finite() && p.upper.is_finite() && p.lower < p.upper) {
                return Err(format!("{} bounds [{}, {}] are invalid", name, p.lower, p.upper));
            }
            if p.initial < p.lower || p.initial > p.upper {
                return Err(format!(
                    "{} initial value {} lies outside [{}, {}]",
                    name, p.initial, p.lower, p.upper
                ));
            }
        }
        Ok(())
    }
}

impl Default for CurveFitSpec {
    fn default() -> Self {
        CurveFitSpec {
            a: ParamBounds::new(30.0, 0.0, 100.0),
            b: ParamBounds::new(0.01, 0.0001, 0.09),
            b0: ParamBounds::new(0.01, 0.0, 0.09),
            c: ParamBounds::new(0.001, 0.0, 0.005),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CurveConfig {
    /// Full previous-lactation series
    pub previous: CurveFitSpec,

    /// Current lactation's early window plus the 305-day anchor
    pub current: CurveFitSpec,

    /// First lactation's early window, no anchor
    pub primiparous: CurveFitSpec,

    pub max_iterations: usize,

    /// Relative reduction of the sum of squares that counts as converged
    pub ftol: f64,

    /// Relative step size that counts as converged
    pub xtol: f64,

    /// Gradient magnitude that counts as converged
    pub gtol: f64,
}

impl Default for CurveConfig {
    fn default() -> Self {
        CurveConfig {
            previous: CurveFitSpec::default(),
            current: CurveFitSpec::default(),
            primiparous: CurveFitSpec::default(),
            max_iterations: 400,
            ftol: 1e-12,
            xtol: 1e-12,
            gtol: 1e-14,
        }
    }
}

// ============================================================================
// FEATURES
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FeatureConfig {
    /// Upper DIM (inclusive) of the early-lactation window
    pub early_dim: i64,

    pub bin_width: i64,
    pub bin_count: usize,

    /// Minimum current-lactation records with DIM <= early_dim
    pub min_current_records: usize,

    /// Previous lactation needs at least this many records to be fitted
    pub min_previous_fit_records: usize,

    /// Canonical lactation length
    pub horizon: i64,

    /// Fixed horizon of the exponential parameter transforms
    pub exp_horizon: f64,

    /// Inclusive DIM window averaged for the previous 305-day yield
    pub previous_305_window: (i64, i64),

    /// Width of the fallback window below the last DIM under the horizon
    pub fallback_window_days: i64,
}

impl Default for FeatureConfig {
    fn default() -> Self {
        FeatureConfig {
            early_dim: 60,
            bin_width: 10,
            bin_count: 6,
            min_current_records: 50,
            min_previous_fit_records: 61,
            horizon: 305,
            exp_horizon: 150.0,
            previous_305_window: (303, 307),
            fallback_window_days: 5,
        }
    }
}

// ============================================================================
// PROJECTION
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProjectionConfig {
    /// Daily yield (kg) below which extending the lactation stops paying off
    pub target_yield: f64,

    /// Length of one extension cycle in days
    pub cycle_length_days: i64,

    pub max_extension_cycles: usize,
}

impl Default for ProjectionConfig {
    fn default() -> Self {
        ProjectionConfig {
            target_yield: 25.0,
            cycle_length_days: 21,
            max_extension_cycles: 3,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        let config = PipelineConfig::default();
        assert!(config.check().is_ok());
        assert_eq!(config.validation.min_early_records, 50);
        assert_eq!(config.cleaning.calving_gap_days, 15);
        assert_eq!(config.curve.current.a.upper, 100.0);
    }

    #[test]
    fn test_partial_toml_keeps_defaults() {
        let toml = r#"
            [curve.current.a]
            initial = 60.0
            lower = 0.0
            upper = 250.0

            [projection]
            target_yield = 20.0
        "#;

        let config = PipelineConfig::from_toml_str(toml).unwrap();
        assert_eq!(config.curve.current.a.upper, 250.0);
        assert_eq!(config.curve.previous.a.upper, 100.0);
        assert_eq!(config.projection.target_yield, 20.0);
        assert_eq!(config.projection.cycle_length_days, 21);
        assert_eq!(config.features.horizon, 305);
    }

    #[test]
    fn test_invalid_bounds_rejected() {
        let toml = r#"
            [curve.primiparous.c]
            initial = 0.01
            lower = 0.0
            upper = 0.005
        "#;

        let err = PipelineConfig::from_toml_str(toml).unwrap_err();
        assert!(err.to_string().contains("curve.primiparous"));
    }

    #[test]
    fn test_invalid_lowess_frac_rejected() {
        let toml = "[cleaning]\nlowess_frac = 0.0\n";
        assert!(PipelineConfig::from_toml_str(toml).is_err());
    }

    #[test]
    fn test_load_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("pipeline.toml");
        fs::write(&path, "[validation]\nmin_early_records = 40\n").unwrap();

        let config = PipelineConfig::load_from_file(&path).unwrap();
        assert_eq!(config.validation.min_early_records, 40);
        assert_eq!(config.validation.min_previous_records, 100);
    }
}
