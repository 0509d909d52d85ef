// Multiparous features - current lactation plus the one before it
//
// The current curve is fit on the first 60 days and one synthetic point
// (horizon, previous 305-day yield) so the model can reach day 305.

use super::{lactation, month_encoding, schema, ten_day_means, EarlyWindow, FeatureConstructor, FeatureRow, LactationIndex};
use crate::config::{CurveConfig, FeatureConfig};
use crate::curve::{fit_curve, CurveParams};
use crate::error::{FeatureFailure, FitTarget};
use crate::records::{LactationKey, MilkRecord, ParityType};
use crate::stats;
use tracing::debug;

/// Traits of the previous lactation's fitted curve
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PreviousLactation {
    pub curve: CurveParams,
    pub yield_305: f64,
    pub length: f64,
    pub yield_end: f64,
    pub days_to_peak: f64,
    pub peak_yield: f64,
    pub persistency: f64,
}

pub struct MultiparousConstructor {
    features: FeatureConfig,
    curve: CurveConfig,
}

impl MultiparousConstructor {
    pub fn new(features: FeatureConfig, curve: CurveConfig) -> Self {
        MultiparousConstructor { features, curve }
    }

    /// Fit and summarise the previous lactation
    pub fn previous_lactation(&self, records: &[MilkRecord]) -> Result<PreviousLactation, FeatureFailure> {
        if records.len() < self.features.min_previous_fit_records {
            return Err(FeatureFailure::InsufficientRecords {
                window: "previous lactation".to_string(),
                found: records.len(),
                required: self.features.min_previous_fit_records,
            });
        }

        let (t, y): (Vec<f64>, Vec<f64>) = records
            .iter()
            .filter_map(|r| Some((r.dim? as f64, r.milk_yield?)))
            .unzip();
        let curve = fit_curve(&t, &y, &self.curve.previous, &self.curve).map_err(|source| FeatureFailure::Fit {
            target: FitTarget::PreviousLactation,
            source,
        })?;

        let length = records
            .iter()
            .filter_map(|r| r.dim)
            .max()
            .ok_or(FeatureFailure::MissingPrevious305Yield)? as f64;
        let yield_305 = previous_305_yield(records, &self.features).ok_or(FeatureFailure::MissingPrevious305Yield)?;

        Ok(PreviousLactation {
            curve,
            yield_305,
            length,
            yield_end: curve.evaluate(length),
            days_to_peak: curve.days_to_peak(),
            peak_yield: curve.peak_yield(),
            persistency: curve.persistency(length),
        })
    }
}

impl FeatureConstructor for MultiparousConstructor {
    fn parity_type(&self) -> ParityType {
        ParityType::Multiparous
    }

    fn columns(&self) -> Vec<String> {
        schema(ParityType::Multiparous, &self.features)
    }

    fn construct(&self, key: &LactationKey, index: &LactationIndex) -> Result<FeatureRow, FeatureFailure> {
        let current = lactation(key, index)?;
        let bins = ten_day_means(current, &self.features)?;
        let (month_sin, month_cos) = month_encoding(current)?;

        let previous_key = key
            .previous()
            .ok_or(FeatureFailure::MissingPreviousLactation { parity: 0 })?;
        let previous_records = index
            .get(&previous_key)
            .ok_or(FeatureFailure::MissingPreviousLactation {
                parity: previous_key.parity,
            })?;
        let previous = self.previous_lactation(previous_records)?;

        let early = EarlyWindow::collect(current, self.features.early_dim);
        early.require(self.features.min_current_records)?;

        let horizon = self.features.horizon as f64;
        let mut t = early.dim.clone();
        let mut y = early.yields.clone();
        t.push(horizon);
        y.push(previous.yield_305);
        let fit = fit_curve(&t, &y, &self.curve.current, &self.curve).map_err(|source| FeatureFailure::Fit {
            target: FitTarget::CurrentLactation,
            source,
        })?;

        let h = self.features.exp_horizon;
        let mut values = Vec::with_capacity(29);
        values.push(key.parity as f64);
        values.extend(bins);
        values.extend([
            month_sin,
            month_cos,
            previous.curve.a,
            previous.yield_305,
            previous.length,
            previous.yield_end,
            previous.days_to_peak,
            previous.peak_yield,
            previous.persistency,
            fit.a,
            fit.evaluate(horizon),
            fit.days_to_peak(),
            fit.peak_yield(),
            fit.persistency(horizon),
            early.variance(),
            early.slope(),
            previous.curve.exp_b(),
            previous.curve.exp_b0(h),
            previous.curve.exp_c(h),
            fit.exp_b(),
            fit.exp_b0(h),
            fit.exp_c(h),
        ]);

        let row = FeatureRow::new(key.clone(), &self.columns(), values, fit)?;
        debug!(lactation = %key, "multiparous features built");
        Ok(row)
    }
}

/// Mean yield around DIM 305 of a finished lactation
///
/// Falls back to the `fallback_window_days` before the last DIM under the
/// horizon when nothing was recorded in the window itself.
pub fn previous_305_yield(records: &[MilkRecord], config: &FeatureConfig) -> Option<f64> {
    let window_mean = |lo: i64, hi: i64| {
        let values: Vec<f64> = records
            .iter()
            .filter(|r| matches!(r.dim, Some(d) if d >= lo && d <= hi))
            .filter_map(|r| r.milk_yield)
            .collect();
        stats::mean(&values)
    };

    let (lo, hi) = config.previous_305_window;
    if let Some(mean) = window_mean(lo, hi) {
        return Some(mean);
    }

    let closest = records
        .iter()
        .filter_map(|r| r.dim)
        .filter(|&d| d < config.horizon)
        .max()?;
    window_mean(closest - config.fallback_window_days, closest)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::records::group_by_lactation;
    use chrono::{Duration, NaiveDate};

    fn create_test_lactation(animal: &str, parity: u32, start: NaiveDate, days: i64, curve: &CurveParams) -> Vec<MilkRecord> {
        (0..days)
            .map(|d| MilkRecord {
                row: (parity as usize) * 1000 + d as usize,
                animal_id: animal.to_string(),
                parity,
                date: start + Duration::days(d),
                dim: Some(d + 1),
                milk_yield: Some(curve.evaluate((d + 1) as f64)),
            })
            .collect()
    }

    fn create_test_index(previous_days: i64) -> LactationIndex {
        let curve = CurveParams::new(30.0, 0.03, 0.02, 0.002);
        let first_start = NaiveDate::from_ymd_opt(2022, 3, 1).unwrap();
        let second_start = NaiveDate::from_ymd_opt(2023, 5, 15).unwrap();
        let mut records = create_test_lactation("A1", 1, first_start, previous_days, &curve);
        records.extend(create_test_lactation("A1", 2, second_start, 60, &curve));
        group_by_lactation(&records)
    }

    fn create_test_constructor() -> MultiparousConstructor {
        MultiparousConstructor::new(FeatureConfig::default(), CurveConfig::default())
    }

    #[test]
    fn test_row_has_full_schema() {
        let index = create_test_index(320);
        let constructor = create_test_constructor();
        let columns = constructor.columns();

        let row = constructor.construct(&LactationKey::new("A1", 2), &index).unwrap();

        assert_eq!(columns.len(), 29);
        assert_eq!(row.values.len(), 29);
        assert_eq!(row.get(&columns, "Parity"), Some(2.0));
        assert_eq!(row.get(&columns, "prev_lact_length"), Some(320.0));
        assert!(row.values.iter().all(|v| v.is_finite()));
    }

    #[test]
    fn test_previous_305_window_mean() {
        let curve = CurveParams::new(30.0, 0.03, 0.02, 0.002);
        let records = create_test_lactation("A1", 1, NaiveDate::from_ymd_opt(2022, 3, 1).unwrap(), 320, &curve);

        let value = previous_305_yield(&records, &FeatureConfig::default()).unwrap();

        let expected = (303..=307).map(|d| curve.evaluate(d as f64)).sum::<f64>() / 5.0;
        assert!((value - expected).abs() < 1e-9);
    }

    #[test]
    fn test_previous_305_falls_back_below_horizon() {
        // Last record at DIM 250: mean over DIM 245..=250
        let curve = CurveParams::new(30.0, 0.03, 0.02, 0.002);
        let records = create_test_lactation("A1", 1, NaiveDate::from_ymd_opt(2022, 3, 1).unwrap(), 250, &curve);

        let value = previous_305_yield(&records, &FeatureConfig::default()).unwrap();

        let expected = (245..=250).map(|d| curve.evaluate(d as f64)).sum::<f64>() / 6.0;
        assert!((value - expected).abs() < 1e-9);
    }

    #[test]
    fn test_short_previous_lactation_skipped() {
        // 60 records is not enough to fit the previous lactation
        let index = create_test_index(60);

        let err = create_test_constructor()
            .construct(&LactationKey::new("A1", 2), &index)
            .unwrap_err();

        assert_eq!(
            err,
            FeatureFailure::InsufficientRecords {
                window: "previous lactation".to_string(),
                found: 60,
                required: 61,
            }
        );
    }

    #[test]
    fn test_missing_previous_lactation() {
        let mut index = create_test_index(320);
        index.remove(&LactationKey::new("A1", 1));

        let err = create_test_constructor()
            .construct(&LactationKey::new("A1", 2), &index)
            .unwrap_err();

        assert_eq!(err, FeatureFailure::MissingPreviousLactation { parity: 1 });
    }

    #[test]
    fn test_sparse_current_lactation_skipped() {
        let mut index = create_test_index(320);
        if let Some(current) = index.get_mut(&LactationKey::new("A1", 2)) {
            // Every bin keeps records, but only 43 of DIM 1..=60 remain
            current.retain(|r| !matches!(r.dim, Some(d) if d % 3 == 0 && d > 10));
        }

        let err = create_test_constructor()
            .construct(&LactationKey::new("A1", 2), &index)
            .unwrap_err();

        assert_eq!(
            err,
            FeatureFailure::InsufficientRecords {
                window: "current lactation DIM <= 60".to_string(),
                found: 43,
                required: 50,
            }
        );
    }
}
