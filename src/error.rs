// ⚠️ Error Taxonomy
// Fatal batch errors abort the pipeline; per-lactation failures are values.

use crate::records::ParityType;
use serde::{Deserialize, Serialize};
use thiserror::Error;

// ============================================================================
// FATAL ERRORS (abort the whole batch)
// ============================================================================

#[derive(Error, Debug)]
pub enum PipelineError {
    /// Required columns are absent from the uploaded table
    #[error("Missing required columns: {}", .missing.join(", "))]
    Schema { missing: Vec<String> },

    /// Dates that could not be parsed as YYYY-MM-DD (0-based data rows)
    #[error("Date column contains invalid dates at rows: {}", join_rows(.rows))]
    DateParse { rows: Vec<usize> },

    /// Numeric columns holding non-numeric text
    #[error("Column '{column}' contains invalid values at rows: {}", join_rows(.rows))]
    ValueParse { column: String, rows: Vec<usize> },

    #[error("Uploaded table contains no records")]
    EmptyInput,

    #[error("Scaler for {parity_type} expects {expected:?} but feature schema is {actual:?}")]
    ScalerMismatch {
        parity_type: ParityType,
        expected: Vec<String>,
        actual: Vec<String>,
    },

    #[error("All {0} lactations were dropped during feature construction")]
    EmptyFeatureSet(ParityType),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Configuration error: {0}")]
    Config(String),
}

pub type Result<T> = std::result::Result<T, PipelineError>;

fn join_rows(rows: &[usize]) -> String {
    rows.iter()
        .map(|r| r.to_string())
        .collect::<Vec<_>>()
        .join(", ")
}

// ============================================================================
// PER-LACTATION FAILURES (isolated, never abort the batch)
// ============================================================================

/// Why a lactation-curve fit produced no parameters
#[derive(Error, Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum FitFailure {
    #[error("insufficient data for curve fit: {points} points, {required} required")]
    InsufficientData { points: usize, required: usize },

    #[error("curve fit did not converge within {iterations} iterations")]
    NonConvergence { iterations: usize },

    #[error("curve fit produced non-finite values")]
    NonFinite,

    #[error("invalid fit specification: {0}")]
    InvalidSpec(String),
}

/// Which series a fit was attempted against
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FitTarget {
    PreviousLactation,
    CurrentLactation,
}

impl std::fmt::Display for FitTarget {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            FitTarget::PreviousLactation => write!(f, "previous lactation"),
            FitTarget::CurrentLactation => write!(f, "current lactation"),
        }
    }
}

/// Why a lactation produced no feature row
#[derive(Error, Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum FeatureFailure {
    #[error("ten-day bin {label} has no records")]
    EmptyBin { label: String },

    #[error("no records to derive calving month")]
    MissingMonth,

    #[error("previous lactation (parity {parity}) not found")]
    MissingPreviousLactation { parity: u32 },

    #[error("{window} has {found} records, {required} required")]
    InsufficientRecords {
        window: String,
        found: usize,
        required: usize,
    },

    #[error("previous lactation has no yield near DIM 305")]
    MissingPrevious305Yield,

    #[error("{target} fit failed: {source}")]
    Fit { target: FitTarget, source: FitFailure },

    #[error("feature '{feature}' is not finite")]
    NonFinite { feature: String },
}
