// 🔭 Extension Projection - how long a lactation stays above target yield
// Reads the fitted current-lactation curve past the canonical horizon in
// whole breeding cycles and suggests a treatment group from it.

use crate::config::ProjectionConfig;
use crate::curve::CurveParams;
use crate::records::LactationKey;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum TreatmentGroup {
    #[default]
    #[serde(rename = "No group")]
    NoGroup,
    #[serde(rename = "Extend 1 cycle")]
    ExtendOne,
    #[serde(rename = "Extend 2 cycles")]
    ExtendTwo,
    #[serde(rename = "Extend 3 cycles")]
    ExtendThree,
    #[serde(rename = "Do not extend")]
    DoNotExtend,
}

impl TreatmentGroup {
    pub fn label(&self) -> &'static str {
        match self {
            TreatmentGroup::NoGroup => "No group",
            TreatmentGroup::ExtendOne => "Extend 1 cycle",
            TreatmentGroup::ExtendTwo => "Extend 2 cycles",
            TreatmentGroup::ExtendThree => "Extend 3 cycles",
            TreatmentGroup::DoNotExtend => "Do not extend",
        }
    }

    /// Group for extending by `cycles` breeding cycles
    pub fn for_cycles(cycles: usize) -> Self {
        match cycles {
            0 => TreatmentGroup::DoNotExtend,
            1 => TreatmentGroup::ExtendOne,
            2 => TreatmentGroup::ExtendTwo,
            _ => TreatmentGroup::ExtendThree,
        }
    }
}

impl std::fmt::Display for TreatmentGroup {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.label())
    }
}

/// Model yield at the end of `cycles` extension cycles
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CycleYield {
    pub cycles: usize,
    pub dim: i64,
    pub projected_yield: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExtensionProjection {
    pub key: LactationKey,
    /// First DIM after peak with model yield below target
    pub days_to_target: Option<i64>,
    pub cycle_yields: Vec<CycleYield>,
    pub suggested_group: TreatmentGroup,
}

/// Project one lactation's curve past `horizon`
pub fn project(
    key: LactationKey,
    curve: &CurveParams,
    horizon: i64,
    config: &ProjectionConfig,
) -> ExtensionProjection {
    let cycles = config.max_extension_cycles.min(3);
    let cycle_yields: Vec<CycleYield> = (0..=cycles)
        .map(|k| {
            let dim = horizon + k as i64 * config.cycle_length_days;
            CycleYield {
                cycles: k,
                dim,
                projected_yield: curve.evaluate(dim as f64),
            }
        })
        .collect();

    let last_day = cycle_yields.last().map(|c| c.dim).unwrap_or(horizon);
    let days_to_target = days_to_target(curve, config.target_yield, last_day);

    let best = cycle_yields
        .iter()
        .filter(|c| c.cycles >= 1 && c.projected_yield >= config.target_yield)
        .map(|c| c.cycles)
        .max()
        .unwrap_or(0);

    ExtensionProjection {
        key,
        days_to_target,
        cycle_yields,
        suggested_group: TreatmentGroup::for_cycles(best),
    }
}

/// First whole DIM after peak (up to `last_day`) where the curve is below `target`
pub fn days_to_target(curve: &CurveParams, target: f64, last_day: i64) -> Option<i64> {
    let peak = curve.days_to_peak();
    if !peak.is_finite() {
        return None;
    }
    let peak = (peak.max(0.0) as i64).min(last_day);
    if curve.evaluate(peak as f64) < target {
        return None;
    }
    (peak + 1..=last_day).find(|&d| curve.evaluate(d as f64) < target)
}
