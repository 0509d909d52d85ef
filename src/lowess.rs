// 〰️ LOWESS - locally weighted scatterplot smoothing
// Cleveland's robust local-linear smoother: tricube neighbourhood weights,
// bisquare robustness weights recomputed after each pass.

use crate::stats;

/// Smoothed curve evaluated at the (sorted) input abscissae
#[derive(Debug, Clone, PartialEq)]
pub struct LowessFit {
    pub x: Vec<f64>,
    pub fitted: Vec<f64>,
}

impl LowessFit {
    /// Copy of the fit with every fitted value rounded
    pub fn rounded(&self, decimals: i32) -> LowessFit {
        LowessFit {
            x: self.x.clone(),
            fitted: self.fitted.iter().map(|v| stats::round_to(*v, decimals)).collect(),
        }
    }

    /// Linear interpolation of the curve, clamped outside the fitted range
    pub fn predict(&self, x: f64) -> f64 {
        stats::interp(x, &self.x, &self.fitted)
    }
}

/// Number of neighbours used for each local fit
pub fn span_points(n: usize, frac: f64) -> usize {
    let k = (frac * n as f64 + 1e-10) as usize;
    k.max(2).min(n)
}

/// Fit LOWESS of `y` against `x`
///
/// `iterations` robustness passes follow the initial fit. Pairs are sorted
/// by x (stable) before fitting.
pub fn lowess(x: &[f64], y: &[f64], frac: f64, iterations: usize) -> LowessFit {
    let n = x.len().min(y.len());
    let mut order: Vec<usize> = (0..n).collect();
    order.sort_by(|&a, &b| x[a].total_cmp(&x[b]));
    let xs: Vec<f64> = order.iter().map(|&i| x[i]).collect();
    let ys: Vec<f64> = order.iter().map(|&i| y[i]).collect();

    if n < 2 {
        return LowessFit { x: xs, fitted: ys };
    }

    let k = span_points(n, frac);
    let mut robustness = vec![1.0; n];
    let mut fitted = vec![0.0; n];
    let range = xs[n - 1] - xs[0];
    let mean_abs_y = ys.iter().map(|v| v.abs()).sum::<f64>() / n as f64;

    for pass in 0..=iterations {
        let mut left = 0;
        for i in 0..n {
            while left + k < n && xs[i] - xs[left] > xs[left + k] - xs[i] {
                left += 1;
            }
            let right = left + k - 1;
            // A neighbourhood with no robust weight keeps the previous pass's value
            if let Some(value) = local_fit(&xs, &ys, &robustness, i, left, right, range) {
                fitted[i] = value;
            }
        }

        if pass == iterations {
            break;
        }

        let residuals: Vec<f64> = ys.iter().zip(&fitted).map(|(y, f)| y - f).collect();
        let cmad = 6.0 * median_abs(&residuals);
        if cmad < 1e-7 * mean_abs_y {
            break;
        }
        for (w, r) in robustness.iter_mut().zip(&residuals) {
            let u = r.abs() / cmad;
            *w = if u < 1.0 { (1.0 - u * u).powi(2) } else { 0.0 };
        }
    }

    LowessFit { x: xs, fitted }
}

/// Weighted linear fit around `xs[i]` using neighbours `left..=right`
fn local_fit(
    xs: &[f64],
    ys: &[f64],
    robustness: &[f64],
    i: usize,
    left: usize,
    right: usize,
    range: f64,
) -> Option<f64> {
    let xi = xs[i];
    let h = (xi - xs[left]).max(xs[right] - xi);
    let near = 0.001 * h;
    let far = 0.999 * h;

    let mut weights = Vec::with_capacity(right - left + 1);
    let mut total = 0.0;
    for j in left..=right {
        let r = (xs[j] - xi).abs();
        let w = if r <= near {
            1.0
        } else if r <= far {
            let d = r / h;
            (1.0 - d * d * d).powi(3)
        } else {
            0.0
        };
        let w = w * robustness[j];
        total += w;
        weights.push(w);
    }

    if total <= 0.0 {
        return None;
    }

    let mut x_mean = 0.0;
    let mut y_mean = 0.0;
    for (offset, w) in weights.iter().enumerate() {
        x_mean += w * xs[left + offset];
        y_mean += w * ys[left + offset];
    }
    x_mean /= total;
    y_mean /= total;

    let mut sxx = 0.0;
    let mut sxy = 0.0;
    for (offset, w) in weights.iter().enumerate() {
        let dx = xs[left + offset] - x_mean;
        sxx += w * dx * dx;
        sxy += w * dx * (ys[left + offset] - y_mean);
    }

    if (sxx / total).sqrt() > 0.001 * range {
        Some(y_mean + sxy / sxx * (xi - x_mean))
    } else {
        Some(y_mean)
    }
}

fn median_abs(values: &[f64]) -> f64 {
    let mut abs: Vec<f64> = values.iter().map(|v| v.abs()).collect();
    abs.sort_by(|a, b| a.total_cmp(b));
    let n = abs.len();
    if n == 0 {
        return 0.0;
    }
    if n % 2 == 1 {
        abs[n / 2]
    } else {
        (abs[n / 2 - 1] + abs[n / 2]) / 2.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_span_points() {
        assert_eq!(span_points(300, 0.1), 30);
        assert_eq!(span_points(10, 0.1), 2);
        assert_eq!(span_points(3, 1.0), 3);
    }

    #[test]
    fn test_linear_data_reproduced() {
        let x: Vec<f64> = (0..50).map(|i| i as f64).collect();
        let y: Vec<f64> = x.iter().map(|v| 2.0 * v + 5.0).collect();

        let fit = lowess(&x, &y, 0.2, 3);

        for (f, expected) in fit.fitted.iter().zip(&y) {
            assert!((f - expected).abs() < 1e-8, "{} vs {}", f, expected);
        }
    }

    #[test]
    fn test_unsorted_input_sorted_output() {
        let x = vec![3.0, 1.0, 2.0, 0.0];
        let y = vec![6.0, 2.0, 4.0, 0.0];

        let fit = lowess(&x, &y, 1.0, 0);

        assert_eq!(fit.x, vec![0.0, 1.0, 2.0, 3.0]);
        for (f, expected) in fit.fitted.iter().zip([0.0, 2.0, 4.0, 6.0]) {
            assert!((f - expected).abs() < 1e-9);
        }
    }

    fn jitter(i: usize) -> f64 {
        (((i * 37) % 11) as f64 - 5.0) * 0.2
    }

    #[test]
    fn test_robustness_ignores_spike() {
        let x: Vec<f64> = (0..200).map(|i| i as f64).collect();
        let mut y: Vec<f64> = (0..200).map(|i| 30.0 + (i as f64 / 20.0).sin() + jitter(i)).collect();
        y[80] = 300.0;

        let fit = lowess(&x, &y, 0.1, 3);

        let truth = 30.0 + (80.0f64 / 20.0).sin();
        assert!((fit.fitted[80] - truth).abs() < 2.0, "fitted {}", fit.fitted[80]);
    }

    #[test]
    fn test_predict_and_round() {
        let fit = LowessFit {
            x: vec![0.0, 10.0],
            fitted: vec![10.04, 20.06],
        };
        let rounded = fit.rounded(1);
        assert_eq!(rounded.fitted, vec![10.0, 20.1]);
        assert!((rounded.predict(5.0) - 15.05).abs() < 1e-9);
        assert_eq!(rounded.predict(-3.0), 10.0);
        assert_eq!(rounded.predict(42.0), 20.1);
    }

    #[test]
    fn test_single_point_passthrough() {
        let fit = lowess(&[4.0], &[12.5], 0.1, 3);
        assert_eq!(fit.fitted, vec![12.5]);
    }
}
