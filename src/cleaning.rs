// 🧽 Cleaner - parity correction, DIM correction, outlier smoothing
// Runs the three repairs in order. Animals and lactation groups are
// independent, so each step fans out with rayon; results are re-assembled in
// key order so the output never depends on scheduling.

use crate::config::CleaningConfig;
use crate::dim::{self, DimMethod};
use crate::outliers::{self, SmoothingOutcome};
use crate::parity::{self, CorrectionMethod};
use crate::records::{group_by_animal, group_by_lactation, LactationKey, MilkRecord};
use crate::report::{Diagnostic, Diagnostics, Severity, Stage};
use rayon::prelude::*;
use std::collections::HashMap;
use tracing::{debug, info};

/// Cleaned records plus everything that was changed on the way
#[derive(Debug, Clone, Default)]
pub struct CleanedBatch {
    /// Records ordered by lactation key, then date
    pub records: Vec<MilkRecord>,
    pub diagnostics: Diagnostics,
    /// Records whose parity label changed
    pub parity_corrections: usize,
    pub outliers_replaced: usize,
    pub yields_imputed: usize,
    /// Records dropped because DIM could not be resolved
    pub dropped_records: usize,
}

impl CleanedBatch {
    pub fn lactation_count(&self) -> usize {
        let mut keys: Vec<LactationKey> = self.records.iter().map(|r| r.key()).collect();
        keys.dedup();
        keys.len()
    }
}

struct GroupResult {
    key: LactationKey,
    records: Vec<MilkRecord>,
    method: DimMethod,
    dropped: usize,
    smoothing: SmoothingOutcome,
}

pub struct Cleaner {
    config: CleaningConfig,
}

impl Cleaner {
    pub fn new(config: CleaningConfig) -> Self {
        Cleaner { config }
    }

    pub fn clean(&self, records: Vec<MilkRecord>) -> CleanedBatch {
        let mut batch = CleanedBatch::default();

        let corrected = self.correct_parity(&records, &mut batch);
        self.correct_groups(corrected, &mut batch);

        info!(
            records = batch.records.len(),
            parity_corrections = batch.parity_corrections,
            outliers = batch.outliers_replaced,
            imputed = batch.yields_imputed,
            dropped = batch.dropped_records,
            "cleaning complete"
        );
        batch
    }

    fn correct_parity(&self, records: &[MilkRecord], batch: &mut CleanedBatch) -> Vec<MilkRecord> {
        let recorded: HashMap<usize, u32> = records.iter().map(|r| (r.row, r.parity)).collect();
        let animals: Vec<(String, Vec<MilkRecord>)> = group_by_animal(records).into_iter().collect();

        let corrected: Vec<_> = animals
            .into_par_iter()
            .map(|(animal, group)| {
                let (fixed, segments) = parity::correct_animal(group, &self.config);
                (animal, fixed, segments)
            })
            .collect();

        let mut out = Vec::with_capacity(records.len());
        for (animal, fixed, segments) in corrected {
            let changed = fixed
                .iter()
                .filter(|r| recorded.get(&r.row).is_some_and(|&p| p != r.parity))
                .count();
            if changed > 0 {
                batch.parity_corrections += changed;
                batch.diagnostics.push(Diagnostic::animal(
                    Severity::Info,
                    Stage::ParityCorrection,
                    &animal,
                    format!("parity relabelled on {} records across {} segments", changed, segments.len()),
                ));
            }
            for segment in segments.iter().filter(|s| s.method == CorrectionMethod::Unchanged) {
                batch.diagnostics.push(Diagnostic::animal(
                    Severity::Info,
                    Stage::ParityCorrection,
                    &animal,
                    format!(
                        "segment starting {} has no records in the reliable DIM window, recorded parity kept",
                        segment.start_date
                    ),
                ));
            }
            out.extend(fixed);
        }
        out
    }

    fn correct_groups(&self, records: Vec<MilkRecord>, batch: &mut CleanedBatch) {
        let groups: Vec<(LactationKey, Vec<MilkRecord>)> =
            group_by_lactation(&records).into_iter().collect();

        let results: Vec<GroupResult> = groups
            .into_par_iter()
            .map(|(key, group)| self.clean_group(key, group))
            .collect();

        for result in results {
            let key = &result.key;
            match result.method {
                DimMethod::Synthesized => batch.diagnostics.push(Diagnostic::lactation(
                    Severity::Info,
                    Stage::DimCorrection,
                    key,
                    "DIM missing throughout, synthesized from dates",
                )),
                DimMethod::Recorded { negatives } => batch.diagnostics.push(Diagnostic::lactation(
                    Severity::Warning,
                    Stage::DimCorrection,
                    key,
                    format!("anchored DIM gave {} negative values, recorded DIM kept", negatives),
                )),
                DimMethod::Anchored { .. } => {}
            }
            if result.dropped > 0 {
                batch.dropped_records += result.dropped;
                batch.diagnostics.push(Diagnostic::lactation(
                    Severity::Warning,
                    Stage::DimCorrection,
                    key,
                    format!("dropped {} records with unresolved DIM", result.dropped),
                ));
            }

            let smoothing = &result.smoothing;
            if smoothing.skipped {
                batch.diagnostics.push(Diagnostic::lactation(
                    Severity::Info,
                    Stage::Smoothing,
                    key,
                    "fewer than two yields, smoothing skipped",
                ));
            }
            if smoothing.outliers() > 0 {
                batch.diagnostics.push(Diagnostic::lactation(
                    Severity::Info,
                    Stage::Smoothing,
                    key,
                    format!("replaced {} outlier yields", smoothing.outliers()),
                ));
            }
            batch.outliers_replaced += smoothing.outliers();
            batch.yields_imputed += smoothing.imputed;
            batch.records.extend(result.records);
        }
    }

    fn clean_group(&self, key: LactationKey, group: Vec<MilkRecord>) -> GroupResult {
        let (corrected, method) = dim::correct_group(group, self.config.max_negative_dim);

        let before = corrected.len();
        let resolved: Vec<MilkRecord> = corrected.into_iter().filter(|r| r.dim.is_some()).collect();
        let dropped = before - resolved.len();

        let (records, smoothing) = outliers::smooth_group(resolved, &self.config);
        debug!(lactation = %key, ?method, outliers = smoothing.outliers(), "group cleaned");

        GroupResult {
            key,
            records,
            method,
            dropped,
            smoothing,
        }
    }
}

impl Default for Cleaner {
    fn default() -> Self {
        Self::new(CleaningConfig::default())
    }
}
