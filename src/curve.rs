// 📈 Lactation Curve - Dijkstra model, bounded least-squares fit, derived traits
//
//   y(t) = a · exp( b·(1 − e^(−b0·t))/b0 − c·t )
//
// Bounds are enforced by fitting in an unconstrained internal space,
// v = lo + (sin θ + 1)(hi − lo)/2, and running Levenberg-Marquardt on θ.

use crate::config::{CurveConfig, CurveFitSpec};
use crate::error::FitFailure;
use serde::{Deserialize, Serialize};
use tracing::trace;

const PARAMS: usize = 4;
const MIN_POINTS: usize = PARAMS;
const MAX_DAMPING: f64 = 1e16;

// ============================================================================
// MODEL
// ============================================================================

/// Fitted parameters of one lactation curve
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CurveParams {
    pub a: f64,
    pub b: f64,
    pub b0: f64,
    pub c: f64,
}

impl CurveParams {
    pub fn new(a: f64, b: f64, b0: f64, c: f64) -> Self {
        CurveParams { a, b, b0, c }
    }

    fn from_array(v: [f64; PARAMS]) -> Self {
        CurveParams::new(v[0], v[1], v[2], v[3])
    }

    pub fn is_finite(&self) -> bool {
        self.a.is_finite() && self.b.is_finite() && self.b0.is_finite() && self.c.is_finite()
    }

    /// Model yield at DIM `t`
    pub fn evaluate(&self, t: f64) -> f64 {
        self.a * (self.b * rise(self.b0, t) - self.c * t).exp()
    }

    /// DIM of peak yield, rounded half to even
    pub fn days_to_peak(&self) -> f64 {
        ((self.b / self.c).ln() / self.b0).round_ties_even()
    }

    pub fn peak_yield(&self) -> f64 {
        self.evaluate(self.days_to_peak())
    }

    /// Average daily change of the model from peak to `days_end`
    pub fn persistency(&self, days_end: f64) -> f64 {
        let peak_day = self.days_to_peak();
        (self.evaluate(days_end) - self.evaluate(peak_day)) / (days_end - peak_day)
    }

    pub fn exp_b(&self) -> f64 {
        self.b.exp()
    }

    pub fn exp_b0(&self, horizon: f64) -> f64 {
        (-self.b0 * horizon).exp()
    }

    pub fn exp_c(&self, horizon: f64) -> f64 {
        (-self.c * horizon).exp()
    }

    /// exp(b·(1 − e^(−b0·h))/b0), the combined rise term at `horizon`
    pub fn exp_b_b0(&self, horizon: f64) -> f64 {
        (self.b * rise(self.b0, horizon)).exp()
    }
}

/// (1 − e^(−b0·t))/b0, continuous at b0 = 0
fn rise(b0: f64, t: f64) -> f64 {
    if b0 == 0.0 {
        t
    } else {
        -(-b0 * t).exp_m1() / b0
    }
}

/// d/db0 of `rise`
fn rise_slope(b0: f64, t: f64) -> f64 {
    if (b0 * t).abs() < 1e-8 {
        -t * t / 2.0 + b0 * t * t * t / 3.0
    } else {
        (t * (-b0 * t).exp() - rise(b0, t)) / b0
    }
}

/// Partial derivatives of the model w.r.t. (a, b, b0, c) at `t`
fn gradient(p: &CurveParams, t: f64) -> [f64; PARAMS] {
    let g = rise(p.b0, t);
    let e = (p.b * g - p.c * t).exp();
    let y = p.a * e;
    [e, y * g, y * p.b * rise_slope(p.b0, t), -y * t]
}

// ============================================================================
// BOUND TRANSFORM
// ============================================================================

fn to_internal(value: f64, lo: f64, hi: f64) -> f64 {
    let s = (2.0 * (value - lo) / (hi - lo) - 1.0).clamp(-0.999_999, 0.999_999);
    s.asin()
}

fn to_external(theta: f64, lo: f64, hi: f64) -> f64 {
    lo + (theta.sin() + 1.0) * (hi - lo) / 2.0
}

fn external_slope(theta: f64, lo: f64, hi: f64) -> f64 {
    (hi - lo) / 2.0 * theta.cos()
}

// ============================================================================
// FIT
// ============================================================================

struct Problem<'a> {
    t: &'a [f64],
    y: &'a [f64],
    lo: [f64; PARAMS],
    hi: [f64; PARAMS],
}

impl Problem<'_> {
    fn params(&self, theta: &[f64; PARAMS]) -> CurveParams {
        let mut v = [0.0; PARAMS];
        for k in 0..PARAMS {
            v[k] = to_external(theta[k], self.lo[k], self.hi[k]);
        }
        CurveParams::from_array(v)
    }

    fn sse(&self, theta: &[f64; PARAMS]) -> f64 {
        let p = self.params(theta);
        self.t
            .iter()
            .zip(self.y)
            .map(|(&t, &y)| (y - p.evaluate(t)).powi(2))
            .sum()
    }

    /// Normal equations JᵀJ and Jᵀr in internal coordinates
    fn normal_equations(&self, theta: &[f64; PARAMS]) -> ([[f64; PARAMS]; PARAMS], [f64; PARAMS]) {
        let p = self.params(theta);
        let mut chain = [0.0; PARAMS];
        for k in 0..PARAMS {
            chain[k] = external_slope(theta[k], self.lo[k], self.hi[k]);
        }

        let mut jtj = [[0.0; PARAMS]; PARAMS];
        let mut jtr = [0.0; PARAMS];
        for (&t, &y) in self.t.iter().zip(self.y) {
            let grad = gradient(&p, t);
            let mut row = [0.0; PARAMS];
            for k in 0..PARAMS {
                row[k] = grad[k] * chain[k];
            }
            let r = y - p.evaluate(t);
            for i in 0..PARAMS {
                jtr[i] += row[i] * r;
                for j in 0..PARAMS {
                    jtj[i][j] += row[i] * row[j];
                }
            }
        }
        (jtj, jtr)
    }
}

/// Fit the curve to (DIM, yield) pairs within the bounds of `spec`
pub fn fit_curve(
    t: &[f64],
    y: &[f64],
    spec: &CurveFitSpec,
    config: &CurveConfig,
) -> Result<CurveParams, FitFailure> {
    if t.len() != y.len() {
        return Err(FitFailure::InvalidSpec(format!(
            "{} DIM values but {} yields",
            t.len(),
            y.len()
        )));
    }
    if t.len() < MIN_POINTS {
        return Err(FitFailure::InsufficientData {
            points: t.len(),
            required: MIN_POINTS,
        });
    }
    if t.iter().chain(y).any(|v| !v.is_finite()) {
        return Err(FitFailure::NonFinite);
    }
    spec.check().map_err(FitFailure::InvalidSpec)?;

    let bounds = spec.as_array();
    let problem = Problem {
        t,
        y,
        lo: bounds.map(|p| p.lower),
        hi: bounds.map(|p| p.upper),
    };
    let mut theta = [0.0; PARAMS];
    for k in 0..PARAMS {
        theta[k] = to_internal(bounds[k].initial, problem.lo[k], problem.hi[k]);
    }

    let mut sse = problem.sse(&theta);
    if !sse.is_finite() {
        return Err(FitFailure::NonFinite);
    }
    let mut damping = 1e-3;

    for iteration in 0..config.max_iterations {
        if sse == 0.0 {
            return finish(problem.params(&theta), iteration);
        }

        let (jtj, jtr) = problem.normal_equations(&theta);
        if jtr.iter().all(|g| g.abs() <= config.gtol) {
            return finish(problem.params(&theta), iteration);
        }

        // Marquardt scaling by the diagonal of JᵀJ
        let mut scale = [0.0; PARAMS];
        for k in 0..PARAMS {
            scale[k] = jtj[k][k].sqrt().max(1e-12);
        }

        loop {
            let mut system = [[0.0; PARAMS]; PARAMS];
            let mut rhs = [0.0; PARAMS];
            for i in 0..PARAMS {
                for j in 0..PARAMS {
                    system[i][j] = jtj[i][j] / (scale[i] * scale[j]);
                }
                system[i][i] += damping;
                rhs[i] = jtr[i] / scale[i];
            }

            if let Some(scaled_step) = solve(system, rhs) {
                let mut candidate = theta;
                let mut step_norm = 0.0;
                let mut theta_norm = 0.0;
                for k in 0..PARAMS {
                    let step = scaled_step[k] / scale[k];
                    candidate[k] += step;
                    step_norm += step * step;
                    theta_norm += theta[k] * theta[k];
                }

                let candidate_sse = problem.sse(&candidate);
                if candidate_sse.is_finite() && candidate_sse < sse {
                    let reduction = sse - candidate_sse;
                    theta = candidate;
                    sse = candidate_sse;
                    damping = (damping / 10.0).max(1e-12);

                    if reduction <= config.ftol * (sse + reduction)
                        || step_norm.sqrt() <= config.xtol * (theta_norm.sqrt() + config.xtol)
                    {
                        return finish(problem.params(&theta), iteration + 1);
                    }
                    break;
                }
            }

            damping *= 10.0;
            if damping > MAX_DAMPING {
                // No downhill step exists: stationary point
                return finish(problem.params(&theta), iteration + 1);
            }
        }
    }

    Err(FitFailure::NonConvergence {
        iterations: config.max_iterations,
    })
}

fn finish(params: CurveParams, iterations: usize) -> Result<CurveParams, FitFailure> {
    if !params.is_finite() {
        return Err(FitFailure::NonFinite);
    }
    trace!(iterations, a = params.a, b = params.b, b0 = params.b0, c = params.c, "curve fit converged");
    Ok(params)
}

/// Gaussian elimination with partial pivoting; None when singular
fn solve(mut m: [[f64; PARAMS]; PARAMS], mut v: [f64; PARAMS]) -> Option<[f64; PARAMS]> {
    for col in 0..PARAMS {
        let pivot = (col..PARAMS).max_by(|&i, &j| m[i][col].abs().total_cmp(&m[j][col].abs()))?;
        if m[pivot][col].abs() < 1e-300 || !m[pivot][col].is_finite() {
            return None;
        }
        m.swap(col, pivot);
        v.swap(col, pivot);
        for row in col + 1..PARAMS {
            let factor = m[row][col] / m[col][col];
            for k in col..PARAMS {
                m[row][k] -= factor * m[col][k];
            }
            v[row] -= factor * v[col];
        }
    }

    let mut x = [0.0; PARAMS];
    for row in (0..PARAMS).rev() {
        let tail: f64 = (row + 1..PARAMS).map(|k| m[row][k] * x[k]).sum();
        x[row] = (v[row] - tail) / m[row][row];
    }
    x.iter().all(|value| value.is_finite()).then_some(x)
}
