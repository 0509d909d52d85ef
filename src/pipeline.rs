// 🚜 Pipeline - one upload batch from raw table to model-ready rows
//
// validate → clean → index by lactation → construct features → scale
//          → predict (optional) → project extensions
//
// Fatal problems (schema, dates, scaler mismatch) abort before any output.
// Everything else is isolated per lactation and reported as a diagnostic.

use crate::cleaning::Cleaner;
use crate::config::PipelineConfig;
use crate::error::{PipelineError, Result};
use crate::features::{
    construct_all, FeatureConstructor, FeatureRow, LactationIndex, MultiparousConstructor,
    PrimiparousConstructor,
};
use crate::projection::{project, ExtensionProjection};
use crate::records::{group_by_lactation, load_csv, LactationKey, MilkRecord, ParityType, RawTable};
use crate::report::{BatchSummary, Diagnostic, Diagnostics, Severity, Stage};
use crate::scaler::{ModelSet, ScalerSet};
use crate::validate::{EligibilityDecision, Validator};
use anyhow::Context;
use serde::{Deserialize, Serialize};
use std::path::Path;
use tracing::{info, warn};
use uuid::Uuid;

// ============================================================================
// OUTPUT TYPES
// ============================================================================

/// Feature rows of one parity type, unscaled and (when a scaler is set) scaled
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeatureBatch {
    pub parity_type: ParityType,
    pub columns: Vec<String>,
    pub rows: Vec<FeatureRow>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub scaled: Option<Vec<Vec<f64>>>,
}

impl FeatureBatch {
    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// For callers that treat an empty batch as an error
    pub fn require_non_empty(&self) -> Result<&Self> {
        if self.is_empty() {
            return Err(PipelineError::EmptyFeatureSet(self.parity_type));
        }
        Ok(self)
    }

    /// Rows handed to the model: scaled when available
    pub fn model_inputs(&self) -> Vec<&[f64]> {
        match &self.scaled {
            Some(scaled) => scaled.iter().map(|r| r.as_slice()).collect(),
            None => self.rows.iter().map(|r| r.values.as_slice()).collect(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Prediction {
    pub key: LactationKey,
    pub parity_type: ParityType,
    pub predicted_305_yield: f64,
}

/// Everything one upload produced
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BatchReport {
    pub batch_id: Uuid,
    pub summary: BatchSummary,
    pub decisions: Vec<EligibilityDecision>,
    pub cleaned_records: Vec<MilkRecord>,
    pub primiparous: FeatureBatch,
    pub multiparous: FeatureBatch,
    pub predictions: Vec<Prediction>,
    pub projections: Vec<ExtensionProjection>,
    pub diagnostics: Diagnostics,
}

impl BatchReport {
    pub fn summary(&self) -> String {
        format!("Batch {}: {}", self.batch_id, self.summary.summary())
    }

    pub fn features(&self, parity_type: ParityType) -> &FeatureBatch {
        match parity_type {
            ParityType::Primiparous => &self.primiparous,
            ParityType::Multiparous => &self.multiparous,
        }
    }
}

// ============================================================================
// PIPELINE
// ============================================================================

pub struct Pipeline {
    config: PipelineConfig,
    scalers: Option<ScalerSet>,
    models: ModelSet,
}

impl Pipeline {
    pub fn new(config: PipelineConfig) -> Self {
        Pipeline {
            config,
            scalers: None,
            models: ModelSet::empty(),
        }
    }

    pub fn with_scalers(mut self, scalers: ScalerSet) -> Self {
        self.scalers = Some(scalers);
        self
    }

    pub fn with_models(mut self, models: ModelSet) -> Self {
        self.models = models;
        self
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    /// Load a CSV upload and run it
    pub fn run_csv(&self, path: &Path) -> anyhow::Result<BatchReport> {
        let table = load_csv(path)?;
        self.run(&table)
            .with_context(|| format!("Failed to process {}", path.display()))
    }

    pub fn run(&self, table: &RawTable) -> Result<BatchReport> {
        let batch_id = Uuid::new_v4();
        let first_lactation = PrimiparousConstructor::new(self.config.features.clone(), self.config.curve.clone());
        let later_lactation = MultiparousConstructor::new(self.config.features.clone(), self.config.curve.clone());

        // Scaler schemas are checked before any work is done
        if let Some(scalers) = &self.scalers {
            scalers
                .get(ParityType::Primiparous)
                .check_schema(ParityType::Primiparous, &first_lactation.columns())?;
            scalers
                .get(ParityType::Multiparous)
                .check_schema(ParityType::Multiparous, &later_lactation.columns())?;
        }

        let validated = Validator::with_config(self.config.validation.clone()).validate(table)?;
        let mut diagnostics = Diagnostics::new();
        for decision in validated.decisions.iter().filter(|d| !d.eligible) {
            diagnostics.push(Diagnostic::lactation(
                Severity::Warning,
                Stage::Validation,
                &decision.key(),
                decision.reason.clone().unwrap_or_default(),
            ));
        }

        let cleaned = Cleaner::new(self.config.cleaning.clone()).clean(validated.records.clone());
        diagnostics.extend(cleaned.diagnostics.entries.iter().cloned());
        let index: LactationIndex = group_by_lactation(&cleaned.records);

        let mut primiparous_keys = Vec::new();
        let mut multiparous_keys = Vec::new();
        for key in validated.eligible_keys() {
            if !index.contains_key(&key) {
                diagnostics.push(Diagnostic::lactation(
                    Severity::Warning,
                    Stage::Features,
                    &key,
                    "eligible lactation has no records after parity correction",
                ));
                continue;
            }
            match key.parity_type() {
                ParityType::Primiparous => primiparous_keys.push(key),
                ParityType::Multiparous => multiparous_keys.push(key),
            }
        }

        let primiparous = self.build_batch(&first_lactation, &primiparous_keys, &index, &mut diagnostics);
        let multiparous = self.build_batch(&later_lactation, &multiparous_keys, &index, &mut diagnostics);

        if primiparous.is_empty() && multiparous.is_empty() {
            diagnostics.push(Diagnostic::batch(
                Severity::Critical,
                Stage::Features,
                "no lactation in the batch produced features",
            ));
        }

        let mut predictions = Vec::new();
        for batch in [&primiparous, &multiparous] {
            predictions.extend(self.predict(batch, &mut diagnostics));
        }

        let horizon = self.config.features.horizon;
        let projections: Vec<ExtensionProjection> = primiparous
            .rows
            .iter()
            .chain(&multiparous.rows)
            .map(|row| project(row.key.clone(), &row.curve, horizon, &self.config.projection))
            .collect();

        let summary = BatchSummary {
            total_records: table.len(),
            cleaned_records: cleaned.records.len(),
            lactations: index.len(),
            eligible_lactations: validated.decisions.iter().filter(|d| d.eligible).count(),
            parity_corrections: cleaned.parity_corrections,
            outliers_replaced: cleaned.outliers_replaced,
            yields_imputed: cleaned.yields_imputed,
            primiparous_rows: primiparous.len(),
            multiparous_rows: multiparous.len(),
            warnings: diagnostics.count(Severity::Warning),
        };
        info!(batch = %batch_id, "{}", summary.summary());

        Ok(BatchReport {
            batch_id,
            summary,
            decisions: validated.decisions,
            cleaned_records: cleaned.records,
            primiparous,
            multiparous,
            predictions,
            projections,
            diagnostics,
        })
    }

    fn build_batch<C: FeatureConstructor>(
        &self,
        constructor: &C,
        keys: &[LactationKey],
        index: &LactationIndex,
        diagnostics: &mut Diagnostics,
    ) -> FeatureBatch {
        let parity_type = constructor.parity_type();
        let result = construct_all(constructor, keys, index);

        for (key, failure) in &result.failures {
            warn!(lactation = %key, %failure, "lactation dropped");
            diagnostics.push(Diagnostic::lactation(
                Severity::Warning,
                Stage::Features,
                key,
                format!("dropped: {}", failure),
            ));
        }

        if result.rows.is_empty() {
            diagnostics.push(Diagnostic::batch(
                Severity::Warning,
                Stage::Features,
                format!("no {} lactations produced features", parity_type),
            ));
        }

        let scaled = self.scalers.as_ref().map(|scalers| {
            let values: Vec<Vec<f64>> = result.rows.iter().map(|r| r.values.clone()).collect();
            let scaled = scalers.get(parity_type).transform_rows(&values);
            diagnostics.push(Diagnostic::batch(
                Severity::Info,
                Stage::Scaling,
                format!("scaled {} {} rows", scaled.len(), parity_type),
            ));
            scaled
        });

        info!(
            parity_type = %parity_type,
            rows = result.rows.len(),
            dropped = result.failures.len(),
            "features built"
        );

        FeatureBatch {
            parity_type,
            columns: constructor.columns(),
            rows: result.rows,
            scaled,
        }
    }

    fn predict(&self, batch: &FeatureBatch, diagnostics: &mut Diagnostics) -> Vec<Prediction> {
        let Some(model) = self.models.get(batch.parity_type) else {
            return Vec::new();
        };

        let mut predictions = Vec::with_capacity(batch.len());
        for (row, input) in batch.rows.iter().zip(batch.model_inputs()) {
            match model.predict(input) {
                Ok(value) => predictions.push(Prediction {
                    key: row.key.clone(),
                    parity_type: batch.parity_type,
                    predicted_305_yield: value,
                }),
                Err(e) => diagnostics.push(Diagnostic::lactation(
                    Severity::Warning,
                    Stage::Prediction,
                    &row.key,
                    format!("prediction failed: {}", e),
                )),
            }
        }
        predictions
    }
}

impl Default for Pipeline {
    fn default() -> Self {
        Self::new(PipelineConfig::default())
    }
}
