// 📐 Scaler & Predictor Artifacts
// Pretrained min-max scalers and regression models, one per parity type,
// stored as JSON next to each other:
//
//   <dir>/primiparous_scaler.json   <dir>/primiparous_model.json
//   <dir>/multiparous_scaler.json   <dir>/multiparous_model.json
//
// Scalers are only applied here, never fit.

use crate::error::PipelineError;
use crate::records::ParityType;
use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

// ============================================================================
// MIN-MAX SCALER
// ============================================================================

fn default_feature_range() -> (f64, f64) {
    (0.0, 1.0)
}

/// Fitted min-max scaler: maps each column's training range onto `feature_range`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MinMaxScaler {
    pub feature_names: Vec<String>,
    pub data_min: Vec<f64>,
    pub data_max: Vec<f64>,
    #[serde(default = "default_feature_range")]
    pub feature_range: (f64, f64),
}

impl MinMaxScaler {
    pub fn new(
        feature_names: Vec<String>,
        data_min: Vec<f64>,
        data_max: Vec<f64>,
        feature_range: (f64, f64),
    ) -> Result<Self> {
        let scaler = MinMaxScaler {
            feature_names,
            data_min,
            data_max,
            feature_range,
        };
        scaler.check_shape()?;
        Ok(scaler)
    }

    pub fn from_json_str(content: &str) -> Result<Self> {
        let scaler: MinMaxScaler = serde_json::from_str(content).context("Failed to parse scaler JSON")?;
        scaler.check_shape()?;
        Ok(scaler)
    }

    pub fn load(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read scaler {}", path.display()))?;
        Self::from_json_str(&content).with_context(|| format!("Invalid scaler {}", path.display()))
    }

    fn check_shape(&self) -> Result<()> {
        let n = self.feature_names.len();
        if self.data_min.len() != n || self.data_max.len() != n {
            bail!(
                "scaler has {} names, {} minima and {} maxima",
                n,
                self.data_min.len(),
                self.data_max.len()
            );
        }
        Ok(())
    }

    /// Feature names must equal the schema, in order
    pub fn check_schema(&self, parity_type: ParityType, columns: &[String]) -> crate::error::Result<()> {
        if self.feature_names != columns {
            return Err(PipelineError::ScalerMismatch {
                parity_type,
                expected: self.feature_names.clone(),
                actual: columns.to_vec(),
            });
        }
        Ok(())
    }

    /// Per-column (scale, offset) so that x' = x·scale + offset
    fn coefficients(&self) -> impl Iterator<Item = (f64, f64)> + '_ {
        let (lo, hi) = self.feature_range;
        self.data_min.iter().zip(&self.data_max).map(move |(&min, &max)| {
            let mut range = max - min;
            if range.abs() < 10.0 * f64::EPSILON {
                range = 1.0;
            }
            let scale = (hi - lo) / range;
            (scale, lo - min * scale)
        })
    }

    pub fn transform(&self, values: &[f64]) -> Vec<f64> {
        values
            .iter()
            .zip(self.coefficients())
            .map(|(x, (scale, offset))| x * scale + offset)
            .collect()
    }

    pub fn transform_rows(&self, rows: &[Vec<f64>]) -> Vec<Vec<f64>> {
        rows.iter().map(|row| self.transform(row)).collect()
    }
}

// ============================================================================
// SCALER SET
// ============================================================================

pub fn scaler_filename(parity_type: ParityType) -> String {
    format!("{}_scaler.json", parity_type.as_str())
}

pub fn model_filename(parity_type: ParityType) -> String {
    format!("{}_model.json", parity_type.as_str())
}

#[derive(Debug, Clone, PartialEq)]
pub struct ScalerSet {
    pub primiparous: MinMaxScaler,
    pub multiparous: MinMaxScaler,
}

impl ScalerSet {
    pub fn load_dir(dir: &Path) -> Result<Self> {
        Ok(ScalerSet {
            primiparous: MinMaxScaler::load(&dir.join(scaler_filename(ParityType::Primiparous)))?,
            multiparous: MinMaxScaler::load(&dir.join(scaler_filename(ParityType::Multiparous)))?,
        })
    }

    pub fn get(&self, parity_type: ParityType) -> &MinMaxScaler {
        match parity_type {
            ParityType::Primiparous => &self.primiparous,
            ParityType::Multiparous => &self.multiparous,
        }
    }
}

// ============================================================================
// PREDICTOR
// ============================================================================

/// A pretrained regression model taking one scaled feature row
pub trait Predictor: Send + Sync {
    fn predict(&self, features: &[f64]) -> Result<f64>;
}

/// Linear model artifact: intercept + Σ coefficient·feature
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LinearModel {
    pub intercept: f64,
    pub coefficients: Vec<f64>,
}

impl LinearModel {
    pub fn load(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read model {}", path.display()))?;
        serde_json::from_str(&content).with_context(|| format!("Invalid model {}", path.display()))
    }
}

impl Predictor for LinearModel {
    fn predict(&self, features: &[f64]) -> Result<f64> {
        if features.len() != self.coefficients.len() {
            bail!(
                "model expects {} features, got {}",
                self.coefficients.len(),
                features.len()
            );
        }
        Ok(self.intercept + features.iter().zip(&self.coefficients).map(|(x, w)| x * w).sum::<f64>())
    }
}

/// Models found in an artifact directory; a missing file means no predictions
pub struct ModelSet {
    pub primiparous: Option<Box<dyn Predictor>>,
    pub multiparous: Option<Box<dyn Predictor>>,
}

impl ModelSet {
    pub fn empty() -> Self {
        ModelSet {
            primiparous: None,
            multiparous: None,
        }
    }

    pub fn load_dir(dir: &Path) -> Result<Self> {
        let load = |parity_type: ParityType| -> Result<Option<Box<dyn Predictor>>> {
            let path = dir.join(model_filename(parity_type));
            if !path.exists() {
                return Ok(None);
            }
            Ok(Some(Box::new(LinearModel::load(&path)?)))
        };
        Ok(ModelSet {
            primiparous: load(ParityType::Primiparous)?,
            multiparous: load(ParityType::Multiparous)?,
        })
    }

    pub fn get(&self, parity_type: ParityType) -> Option<&dyn Predictor> {
        match parity_type {
            ParityType::Primiparous => self.primiparous.as_deref(),
            ParityType::Multiparous => self.multiparous.as_deref(),
        }
    }
}
