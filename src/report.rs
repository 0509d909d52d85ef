// 📋 Diagnostics - every skip/drop event, reported instead of swallowed
// Collected per batch and surfaced to the user next to the results.

use crate::records::LactationKey;
use serde::{Deserialize, Serialize};

// ============================================================================
// SEVERITY & STAGE
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Severity {
    Critical, // Batch-level problem, nothing downstream is usable
    Warning,  // A lactation or record was dropped
    Info,     // A correction was applied
}

/// Pipeline stage that produced a diagnostic
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Stage {
    Validation,
    ParityCorrection,
    DimCorrection,
    Smoothing,
    Features,
    Scaling,
    Prediction,
}

impl Stage {
    pub fn name(&self) -> &str {
        match self {
            Stage::Validation => "validation",
            Stage::ParityCorrection => "parity_correction",
            Stage::DimCorrection => "dim_correction",
            Stage::Smoothing => "smoothing",
            Stage::Features => "features",
            Stage::Scaling => "scaling",
            Stage::Prediction => "prediction",
        }
    }
}

// ============================================================================
// DIAGNOSTIC
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Diagnostic {
    pub severity: Severity,
    pub stage: Stage,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub animal_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub parity: Option<u32>,
    pub message: String,
}

impl Diagnostic {
    pub fn batch(severity: Severity, stage: Stage, message: impl Into<String>) -> Self {
        Diagnostic {
            severity,
            stage,
            animal_id: None,
            parity: None,
            message: message.into(),
        }
    }

    pub fn lactation(
        severity: Severity,
        stage: Stage,
        key: &LactationKey,
        message: impl Into<String>,
    ) -> Self {
        Diagnostic {
            severity,
            stage,
            animal_id: Some(key.animal_id.clone()),
            parity: Some(key.parity),
            message: message.into(),
        }
    }

    pub fn animal(
        severity: Severity,
        stage: Stage,
        animal_id: &str,
        message: impl Into<String>,
    ) -> Self {
        Diagnostic {
            severity,
            stage,
            animal_id: Some(animal_id.to_string()),
            parity: None,
            message: message.into(),
        }
    }
}

impl std::fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "[{:?}] {}", self.severity, self.stage.name())?;
        match (&self.animal_id, self.parity) {
            (Some(animal), Some(parity)) => write!(f, " {}/{}", animal, parity)?,
            (Some(animal), None) => write!(f, " {}", animal)?,
            _ => {}
        }
        write!(f, ": {}", self.message)
    }
}

// ============================================================================
// DIAGNOSTICS COLLECTOR
// ============================================================================

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Diagnostics {
    pub entries: Vec<Diagnostic>,
}

impl Diagnostics {
    pub fn new() -> Self {
        Diagnostics::default()
    }

    pub fn push(&mut self, diagnostic: Diagnostic) {
        self.entries.push(diagnostic);
    }

    pub fn extend(&mut self, other: impl IntoIterator<Item = Diagnostic>) {
        self.entries.extend(other);
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn count(&self, severity: Severity) -> usize {
        self.entries.iter().filter(|d| d.severity == severity).count()
    }

    pub fn by_stage(&self, stage: Stage) -> Vec<&Diagnostic> {
        self.entries.iter().filter(|d| d.stage == stage).collect()
    }

    pub fn has_critical(&self) -> bool {
        self.entries.iter().any(|d| d.severity == Severity::Critical)
    }

    /// User-facing message list
    pub fn messages(&self) -> Vec<String> {
        self.entries.iter().map(|d| d.to_string()).collect()
    }
}

// ============================================================================
// BATCH SUMMARY
// ============================================================================

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BatchSummary {
    pub total_records: usize,
    pub cleaned_records: usize,
    pub lactations: usize,
    pub eligible_lactations: usize,
    pub parity_corrections: usize,
    pub outliers_replaced: usize,
    pub yields_imputed: usize,
    pub primiparous_rows: usize,
    pub multiparous_rows: usize,
    pub warnings: usize,
}

impl BatchSummary {
    pub fn summary(&self) -> String {
        format!(
            "{} records ({} cleaned), {} lactations ({} eligible) | {} parity fixes, {} outliers, {} imputed | {} primiparous + {} multiparous rows, {} warnings",
            self.total_records,
            self.cleaned_records,
            self.lactations,
            self.eligible_lactations,
            self.parity_corrections,
            self.outliers_replaced,
            self.yields_imputed,
            self.primiparous_rows,
            self.multiparous_rows,
            self.warnings
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_diagnostic_display() {
        let key = LactationKey::new("A1", 2);
        let d = Diagnostic::lactation(Severity::Warning, Stage::Features, &key, "dropped");
        assert_eq!(d.to_string(), "[Warning] features A1/2: dropped");

        let d = Diagnostic::batch(Severity::Info, Stage::Validation, "ok");
        assert_eq!(d.to_string(), "[Info] validation: ok");
    }

    #[test]
    fn test_diagnostics_counts() {
        let mut diagnostics = Diagnostics::new();
        diagnostics.push(Diagnostic::batch(Severity::Warning, Stage::Features, "a"));
        diagnostics.push(Diagnostic::animal(Severity::Info, Stage::ParityCorrection, "A1", "b"));
        diagnostics.push(Diagnostic::batch(Severity::Warning, Stage::Scaling, "c"));

        assert_eq!(diagnostics.len(), 3);
        assert_eq!(diagnostics.count(Severity::Warning), 2);
        assert_eq!(diagnostics.by_stage(Stage::ParityCorrection).len(), 1);
        assert!(!diagnostics.has_critical());
        assert_eq!(diagnostics.messages()[1], "[Info] parity_correction A1: b");
    }

    #[test]
    fn test_batch_summary_text() {
        let summary = BatchSummary {
            total_records: 10,
            cleaned_records: 9,
            lactations: 2,
            eligible_lactations: 1,
            primiparous_rows: 1,
            ..Default::default()
        };
        assert!(summary.summary().starts_with("10 records (9 cleaned), 2 lactations (1 eligible)"));
    }
}
