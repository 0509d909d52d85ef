// Primiparous features - first lactation, early window only
// There is no earlier lactation to anchor day 305, so the predicted 305-day
// yield is read straight off the early-window curve.

use super::{lactation, month_encoding, schema, ten_day_means, EarlyWindow, FeatureConstructor, FeatureRow, LactationIndex};
use crate::config::{CurveConfig, FeatureConfig};
use crate::curve::fit_curve;
use crate::error::{FeatureFailure, FitTarget};
use crate::records::{LactationKey, ParityType};
use tracing::debug;

pub struct PrimiparousConstructor {
    features: FeatureConfig,
    curve: CurveConfig,
}

impl PrimiparousConstructor {
    pub fn new(features: FeatureConfig, curve: CurveConfig) -> Self {
        PrimiparousConstructor { features, curve }
    }
}

impl FeatureConstructor for PrimiparousConstructor {
    fn parity_type(&self) -> ParityType {
        ParityType::Primiparous
    }

    fn columns(&self) -> Vec<String> {
        schema(ParityType::Primiparous, &self.features)
    }

    fn construct(&self, key: &LactationKey, index: &LactationIndex) -> Result<FeatureRow, FeatureFailure> {
        let current = lactation(key, index)?;
        let bins = ten_day_means(current, &self.features)?;
        let (month_sin, month_cos) = month_encoding(current)?;

        let early = EarlyWindow::collect(current, self.features.early_dim);
        early.require(self.features.min_current_records)?;

        let fit = fit_curve(&early.dim, &early.yields, &self.curve.primiparous, &self.curve).map_err(|source| {
            FeatureFailure::Fit {
                target: FitTarget::CurrentLactation,
                source,
            }
        })?;

        let h = self.features.exp_horizon;
        let mut values = bins;
        values.extend([
            month_sin,
            month_cos,
            fit.a,
            early.variance(),
            early.slope(),
            fit.evaluate(self.features.horizon as f64),
            fit.exp_b(),
            fit.exp_b_b0(h),
            fit.exp_b0(h),
            fit.exp_c(h),
        ]);

        let row = FeatureRow::new(key.clone(), &self.columns(), values, fit)?;
        debug!(lactation = %key, "primiparous features built");
        Ok(row)
    }
}
