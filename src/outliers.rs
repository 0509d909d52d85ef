// 🧹 Outlier Smoothing - LOWESS per lactation, impute gaps, replace spikes
// The smoothed curve is fit on present yields only, then read back at every
// record's DIM. A residual counts as an outlier when it is at least
// `outlier_sd_multiplier` sample standard deviations away and non-zero.
// Imputed yields enter the standard deviation as zero residuals.

use crate::config::CleaningConfig;
use crate::lowess::lowess;
use crate::records::MilkRecord;
use crate::stats;
use serde::{Deserialize, Serialize};

/// What smoothing did to one lactation group
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SmoothingOutcome {
    /// Fewer than two present yields: nothing was fit
    pub skipped: bool,
    /// Missing yields filled from the smoothed curve
    pub imputed: usize,
    /// Upload rows whose yield was replaced
    pub outlier_rows: Vec<usize>,
    pub residual_sd: Option<f64>,
}

impl SmoothingOutcome {
    pub fn outliers(&self) -> usize {
        self.outlier_rows.len()
    }
}

/// Smooth one lactation group in place order
pub fn smooth_group(
    mut group: Vec<MilkRecord>,
    config: &CleaningConfig,
) -> (Vec<MilkRecord>, SmoothingOutcome) {
    let (x, y): (Vec<f64>, Vec<f64>) = group
        .iter()
        .filter_map(|r| match (r.dim, r.milk_yield) {
            (Some(dim), Some(value)) => Some((dim as f64, value)),
            _ => None,
        })
        .unzip();

    if x.len() < 2 {
        let outcome = SmoothingOutcome {
            skipped: true,
            ..SmoothingOutcome::default()
        };
        return (group, outcome);
    }

    let curve = lowess(&x, &y, config.lowess_frac, config.lowess_iterations)
        .rounded(config.smoothed_decimals);

    let smoothed: Vec<Option<f64>> = group
        .iter()
        .map(|r| r.dim.map(|d| curve.predict(d as f64)))
        .collect();

    // Imputed records sit on the curve and count as zero residuals
    let residuals: Vec<Option<f64>> = group
        .iter()
        .zip(&smoothed)
        .map(|(r, s)| match (r.milk_yield, s) {
            (Some(value), Some(s)) => Some(s - value),
            (None, Some(_)) => Some(0.0),
            (_, None) => None,
        })
        .collect();
    let (sd, flagged) = flag_outliers(&residuals, config.outlier_sd_multiplier);

    let mut outcome = SmoothingOutcome {
        residual_sd: sd.is_finite().then_some(sd),
        ..SmoothingOutcome::default()
    };

    for (i, (record, estimate)) in group.iter_mut().zip(smoothed).enumerate() {
        let Some(estimate) = estimate else {
            continue;
        };
        if record.milk_yield.is_none() {
            record.milk_yield = Some(estimate);
            outcome.imputed += 1;
        } else if flagged.contains(&i) {
            record.milk_yield = Some(estimate);
            outcome.outlier_rows.push(record.row);
        }
    }

    (group, outcome)
}

/// Sample sd of the residuals and the positions with `|r| >= multiplier * sd`
///
/// `None` entries have no smoothed estimate and are ignored. Zero residuals
/// count towards the sd but are never flagged.
pub fn flag_outliers(residuals: &[Option<f64>], multiplier: f64) -> (f64, Vec<usize>) {
    let present: Vec<f64> = residuals.iter().flatten().copied().collect();
    let sd = stats::sample_sd(&present);
    let threshold = multiplier * sd;

    let flagged = residuals
        .iter()
        .enumerate()
        .filter_map(|(i, r)| match r {
            Some(r) if *r != 0.0 && r.abs() >= threshold => Some(i),
            _ => None,
        })
        .collect();
    (sd, flagged)
}
