// Feature Construction
// Turns one cleaned lactation into a fixed-order model input row.
//
// Each constructor:
// - Reads from a lactation index built once per batch (no rescans)
// - Stops at the first failed gate and says which one
// - Emits values in the exact column order the scaler was fit with

pub mod multiparous;
pub mod primiparous;

pub use multiparous::MultiparousConstructor;
pub use primiparous::PrimiparousConstructor;

use crate::config::FeatureConfig;
use crate::curve::CurveParams;
use crate::error::FeatureFailure;
use crate::records::{LactationKey, MilkRecord, ParityType};
use crate::stats;
use chrono::Datelike;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::f64::consts::PI;

/// Cleaned records grouped by lactation, each group in date order
pub type LactationIndex = BTreeMap<LactationKey, Vec<MilkRecord>>;

// ============================================================================
// SCHEMAS
// ============================================================================

const MULTIPAROUS_TAIL: [&str; 22] = [
    "month_sin",
    "month_cos",
    "prev_a",
    "prev_305_my",
    "prev_lact_length",
    "prev_my_end",
    "prev_days_to_peak",
    "prev_peak_my",
    "prev_persistency",
    "current_a",
    "predicted_305_my",
    "current_days_to_peak",
    "current_peak_my",
    "predicted_persistency",
    "my_variance",
    "rate_of_my_change",
    "prev_dijkstra_b_eqn",
    "prev_dijkstra_b0_eqn",
    "prev_dijkstra_c_eqn",
    "current_dijkstra_b_eqn",
    "current_dijkstra_b0_eqn",
    "current_dijkstra_c_eqn",
];

const PRIMIPAROUS_TAIL: [&str; 10] = [
    "month_sin",
    "month_cos",
    "a",
    "my_variance",
    "rate_of_my_change",
    "predicted_305_my",
    "current_dijkstra_b_eqn",
    "current_dijkstra_b_b0_eqn",
    "current_dijkstra_b0_eqn",
    "current_dijkstra_c_eqn",
];

/// Bin labels "1-10", "11-20", ... for the configured bins
pub fn bin_labels(config: &FeatureConfig) -> Vec<String> {
    (0..config.bin_count as i64)
        .map(|i| format!("{}-{}", i * config.bin_width + 1, (i + 1) * config.bin_width))
        .collect()
}

/// Ordered column names the scaler and model expect
pub fn schema(parity_type: ParityType, config: &FeatureConfig) -> Vec<String> {
    let bins = bin_labels(config)
        .into_iter()
        .map(|label| format!("MilkTotal_{}", label));

    match parity_type {
        ParityType::Multiparous => std::iter::once("Parity".to_string())
            .chain(bins)
            .chain(MULTIPAROUS_TAIL.iter().map(|s| s.to_string()))
            .collect(),
        ParityType::Primiparous => bins
            .chain(PRIMIPAROUS_TAIL.iter().map(|s| s.to_string()))
            .collect(),
    }
}

// ============================================================================
// FEATURE ROW
// ============================================================================

/// Unscaled feature values for one lactation, in schema order
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeatureRow {
    pub key: LactationKey,
    pub values: Vec<f64>,
    /// Current-lactation curve the row was derived from
    pub curve: CurveParams,
}

impl FeatureRow {
    /// Build a row, rejecting any non-finite value
    pub fn new(
        key: LactationKey,
        columns: &[String],
        values: Vec<f64>,
        curve: CurveParams,
    ) -> Result<Self, FeatureFailure> {
        debug_assert_eq!(columns.len(), values.len());
        if let Some((name, _)) = columns.iter().zip(&values).find(|(_, v)| !v.is_finite()) {
            return Err(FeatureFailure::NonFinite {
                feature: name.clone(),
            });
        }
        Ok(FeatureRow { key, values, curve })
    }

    pub fn get(&self, columns: &[String], name: &str) -> Option<f64> {
        columns
            .iter()
            .position(|c| c == name)
            .and_then(|i| self.values.get(i).copied())
    }
}

/// A feature row builder for one parity type
pub trait FeatureConstructor: Sync {
    fn parity_type(&self) -> ParityType;

    fn columns(&self) -> Vec<String>;

    fn construct(&self, key: &LactationKey, index: &LactationIndex) -> Result<FeatureRow, FeatureFailure>;
}

/// Rows and failures for a set of lactations, both in key order
pub struct ConstructionResult {
    pub rows: Vec<FeatureRow>,
    pub failures: Vec<(LactationKey, FeatureFailure)>,
}

/// Run a constructor over `keys` in parallel
pub fn construct_all<C: FeatureConstructor>(
    constructor: &C,
    keys: &[LactationKey],
    index: &LactationIndex,
) -> ConstructionResult {
    let outcomes: Vec<(LactationKey, Result<FeatureRow, FeatureFailure>)> = keys
        .par_iter()
        .map(|key| (key.clone(), constructor.construct(key, index)))
        .collect();

    let mut rows = Vec::new();
    let mut failures = Vec::new();
    for (key, outcome) in outcomes {
        match outcome {
            Ok(row) => rows.push(row),
            Err(failure) => failures.push((key, failure)),
        }
    }
    ConstructionResult { rows, failures }
}

// ============================================================================
// SHARED FEATURE HELPERS
// ============================================================================

pub(crate) fn lactation<'a>(
    key: &LactationKey,
    index: &'a LactationIndex,
) -> Result<&'a [MilkRecord], FeatureFailure> {
    index
        .get(key)
        .map(|records| records.as_slice())
        .ok_or_else(|| FeatureFailure::InsufficientRecords {
            window: "current lactation".to_string(),
            found: 0,
            required: 1,
        })
}

/// Mean yield of each half-open DIM bin [w·i, w·i + w)
pub fn ten_day_means(records: &[MilkRecord], config: &FeatureConfig) -> Result<Vec<f64>, FeatureFailure> {
    let labels = bin_labels(config);
    let mut sums = vec![0.0; config.bin_count];
    let mut counts = vec![0usize; config.bin_count];

    for record in records {
        let (Some(dim), Some(value)) = (record.dim, record.milk_yield) else {
            continue;
        };
        if dim < 0 || dim > config.early_dim {
            continue;
        }
        let bin = (dim / config.bin_width) as usize;
        if bin < config.bin_count {
            sums[bin] += value;
            counts[bin] += 1;
        }
    }

    sums.iter()
        .zip(&counts)
        .zip(labels)
        .map(|((sum, &count), label)| {
            if count == 0 {
                Err(FeatureFailure::EmptyBin {
                    label: format!("MilkTotal_{}", label),
                })
            } else {
                Ok(sum / count as f64)
            }
        })
        .collect()
}

/// (sin, cos) of the calendar month of the record with the smallest DIM
pub fn month_encoding(records: &[MilkRecord]) -> Result<(f64, f64), FeatureFailure> {
    let first = records
        .iter()
        .filter(|r| r.dim.is_some())
        .min_by_key(|r| r.dim)
        .ok_or(FeatureFailure::MissingMonth)?;
    let angle = 2.0 * PI * first.date.month() as f64 / 12.0;
    Ok((angle.sin(), angle.cos()))
}

/// DIM and yield pairs with DIM at or below the early-lactation limit
#[derive(Debug, Clone, Default, PartialEq)]
pub struct EarlyWindow {
    pub dim: Vec<f64>,
    pub yields: Vec<f64>,
    pub limit: i64,
}

impl EarlyWindow {
    pub fn collect(records: &[MilkRecord], early_dim: i64) -> Self {
        let (dim, yields) = records
            .iter()
            .filter_map(|r| match (r.dim, r.milk_yield) {
                (Some(d), Some(y)) if d <= early_dim => Some((d as f64, y)),
                _ => None,
            })
            .unzip();
        EarlyWindow {
            dim,
            yields,
            limit: early_dim,
        }
    }

    pub fn len(&self) -> usize {
        self.dim.len()
    }

    pub fn is_empty(&self) -> bool {
        self.dim.is_empty()
    }

    /// Gate on the minimum number of early records
    pub fn require(&self, required: usize) -> Result<(), FeatureFailure> {
        if self.len() < required {
            return Err(FeatureFailure::InsufficientRecords {
                window: format!("current lactation DIM <= {}", self.limit),
                found: self.len(),
                required,
            });
        }
        Ok(())
    }

    pub fn variance(&self) -> f64 {
        stats::sample_variance(&self.yields)
    }

    pub fn slope(&self) -> f64 {
        stats::ols_slope(&self.dim, &self.yields)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, NaiveDate};

    fn create_test_lactation(animal: &str, parity: u32, days: usize, first_dim: i64) -> Vec<MilkRecord> {
        let start = NaiveDate::from_ymd_opt(2024, 4, 10).unwrap();
        (0..days)
            .map(|i| MilkRecord {
                row: i,
                animal_id: animal.to_string(),
                parity,
                date: start + Duration::days(i as i64),
                dim: Some(first_dim + i as i64),
                milk_yield: Some(20.0 + i as f64 * 0.1),
            })
            .collect()
    }

    #[test]
    fn test_schema_lengths() {
        let config = FeatureConfig::default();
        let multi = schema(ParityType::Multiparous, &config);
        let primi = schema(ParityType::Primiparous, &config);

        assert_eq!(multi.len(), 29);
        assert_eq!(primi.len(), 16);
        assert_eq!(multi[0], "Parity");
        assert_eq!(multi[1], "MilkTotal_1-10");
        assert_eq!(multi[6], "MilkTotal_51-60");
        assert_eq!(multi[28], "current_dijkstra_c_eqn");
        assert_eq!(primi[0], "MilkTotal_1-10");
        assert_eq!(primi[13], "current_dijkstra_b_b0_eqn");
    }

    #[test]
    fn test_ten_day_bins_half_open() {
        // DIM 0..=60: bin one holds DIM 0-9, DIM 60 lands in no bin
        let records = create_test_lactation("A1", 1, 61, 0);

        let means = ten_day_means(&records, &FeatureConfig::default()).unwrap();

        assert_eq!(means.len(), 6);
        // Yields 20.0 .. 20.9 in the first bin
        assert!((means[0] - 20.45).abs() < 1e-9);
        assert!((means[5] - 25.45).abs() < 1e-9);
    }

    #[test]
    fn test_empty_bin_reported() {
        let records: Vec<MilkRecord> = create_test_lactation("A1", 1, 61, 0)
            .into_iter()
            .filter(|r| !matches!(r.dim, Some(d) if (20..30).contains(&d)))
            .collect();

        let err = ten_day_means(&records, &FeatureConfig::default()).unwrap_err();

        assert_eq!(
            err,
            FeatureFailure::EmptyBin {
                label: "MilkTotal_21-30".to_string()
            }
        );
    }

    #[test]
    fn test_month_from_minimum_dim() {
        let mut records = create_test_lactation("A1", 1, 30, 5);
        // A later-dated record with the smallest DIM decides the month
        records[29].dim = Some(1);
        records[29].date = NaiveDate::from_ymd_opt(2024, 9, 1).unwrap();

        let (sin, cos) = month_encoding(&records).unwrap();

        assert!((sin - (2.0 * PI * 9.0 / 12.0).sin()).abs() < 1e-12);
        assert!((cos - (2.0 * PI * 9.0 / 12.0).cos()).abs() < 1e-12);
        assert_eq!(month_encoding(&[]), Err(FeatureFailure::MissingMonth));
    }

    #[test]
    fn test_early_window_statistics() {
        let records = create_test_lactation("A1", 1, 100, 1);

        let early = EarlyWindow::collect(&records, 60);

        assert_eq!(early.len(), 60);
        assert!((early.slope() - 0.1).abs() < 1e-9);
        assert!(early.variance() > 0.0);
        assert!(early.require(50).is_ok());
        assert!(early.require(61).is_err());
    }

    #[test]
    fn test_non_finite_row_rejected() {
        let columns = vec!["x".to_string(), "y".to_string()];
        let curve = CurveParams::new(30.0, 0.01, 0.01, 0.001);

        let err = FeatureRow::new(LactationKey::new("A1", 2), &columns, vec![1.0, f64::NAN], curve).unwrap_err();

        assert_eq!(err, FeatureFailure::NonFinite { feature: "y".to_string() });
    }
}
