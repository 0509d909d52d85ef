// Lactation Forecast - Core Library
// Cleans herd milk-recording uploads and builds 305-day yield model inputs.
// Exposes all modules for use in the CLI and tests

pub mod error;
pub mod config;
pub mod records;
pub mod report;
pub mod validate;   // Upload schema + lactation eligibility
pub mod parity;     // Parity relabelling from calving gaps
pub mod dim;        // DIM anchoring and synthesis
pub mod stats;
pub mod lowess;
pub mod outliers;   // LOWESS residual outliers + imputation
pub mod cleaning;
pub mod curve;      // Dijkstra lactation curve + bounded fit
pub mod features;
pub mod scaler;
pub mod projection; // Extended-lactation projection
pub mod pipeline;
pub mod logging;

// Re-export commonly used types
pub use config::{
    CleaningConfig, CurveConfig, CurveFitSpec, FeatureConfig, ParamBounds,
    PipelineConfig, ProjectionConfig, ValidationConfig,
};
pub use error::{FeatureFailure, FitFailure, FitTarget, PipelineError};
pub use records::{
    LactationKey, MilkRecord, ParityType, RawTable,
    group_by_lactation, load_csv, read_csv,
};
pub use report::{BatchSummary, Diagnostic, Diagnostics, Severity, Stage};
pub use validate::{EligibilityDecision, ValidatedBatch, Validator};
pub use cleaning::{CleanedBatch, Cleaner};
pub use curve::{fit_curve, CurveParams};
pub use features::{
    schema, FeatureConstructor, FeatureRow, LactationIndex,
    MultiparousConstructor, PrimiparousConstructor,
};
pub use scaler::{LinearModel, MinMaxScaler, ModelSet, Predictor, ScalerSet};
pub use projection::{ExtensionProjection, TreatmentGroup};
pub use pipeline::{BatchReport, FeatureBatch, Pipeline, Prediction};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
