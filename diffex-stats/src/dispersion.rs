use ndarray::ArrayView1;
use statrs::function::gamma::ln_gamma;

use crate::normalization::median;
use crate::params::FitParams;

// ---------------------------------------------------------------------------
// Negative binomial likelihood
// ---------------------------------------------------------------------------

/// Log-likelihood of one gene's counts under a negative binomial with the
/// given fitted means and dispersion `alpha` (variance `mu + alpha * mu^2`).
pub(crate) fn nb_log_likelihood(y: ArrayView1<f64>, mu: ArrayView1<f64>, alpha: f64) -> f64 {
    let r = 1.0 / alpha;
    let mut ll = 0.0;
    for (&y_j, &mu_j) in y.iter().zip(mu.iter()) {
        ll += ln_gamma(y_j + r) - ln_gamma(r) - ln_gamma(y_j + 1.0)
            - r * (mu_j / r).ln_1p()
            + y_j * (mu_j.ln() - (r + mu_j).ln());
    }
    ll
}

/// Cox-Reid adjusted log-likelihood.  The adjustment subtracts
/// `0.5 * ln det(X'WX)` to correct for the coefficients estimated from the
/// same data; for the two-group design the determinant factors into the
/// per-group sums of the working weights `w = mu / (1 + alpha * mu)`.
pub(crate) fn cr_log_likelihood(
    y: ArrayView1<f64>,
    mu: ArrayView1<f64>,
    cond_mask: &[bool],
    alpha: f64,
) -> f64 {
    let mut w_ref = 0.0;
    let mut w_alt = 0.0;
    for (&mu_j, &alt) in mu.iter().zip(cond_mask) {
        let w = mu_j / (1.0 + alpha * mu_j);
        if alt {
            w_alt += w;
        } else {
            w_ref += w;
        }
    }
    nb_log_likelihood(y, mu, alpha) - 0.5 * (w_ref.ln() + w_alt.ln())
}

// ---------------------------------------------------------------------------
// Golden-section search
// ---------------------------------------------------------------------------

/// Maximise `f` on `[lo, hi]` with a fixed-iteration golden-section search
/// and return the argmax.  The dispersion likelihoods are smooth and
/// unimodal in ln alpha, which is all this relies on.
pub(crate) fn golden_section_max(f: impl Fn(f64) -> f64, lo: f64, hi: f64, iters: usize) -> f64 {
    const INVPHI: f64 = 0.618_033_988_749_894_8;
    let (mut a, mut b) = (lo, hi);
    let mut c = b - INVPHI * (b - a);
    let mut d = a + INVPHI * (b - a);
    let mut fc = f(c);
    let mut fd = f(d);
    for _ in 0..iters {
        if fc >= fd {
            b = d;
            d = c;
            fd = fc;
            c = b - INVPHI * (b - a);
            fc = f(c);
        } else {
            a = c;
            c = d;
            fc = fd;
            d = a + INVPHI * (b - a);
            fd = f(d);
        }
    }
    0.5 * (a + b)
}

// ---------------------------------------------------------------------------
// Genewise and MAP dispersion estimates
// ---------------------------------------------------------------------------

/// Maximum-likelihood dispersion for one gene, maximising the Cox-Reid
/// adjusted likelihood over ln alpha.
pub(crate) fn genewise_dispersion(
    y: ArrayView1<f64>,
    mu: ArrayView1<f64>,
    cond_mask: &[bool],
    params: &FitParams,
) -> f64 {
    let lo = params.min_disp.ln();
    let hi = params.max_disp_for(cond_mask.len()).ln();
    let ln_alpha = golden_section_max(
        |la| cr_log_likelihood(y, mu, cond_mask, la.exp()),
        lo,
        hi,
        params.disp_iters,
    );
    ln_alpha.exp()
}

/// Maximum a posteriori dispersion: the Cox-Reid likelihood plus a
/// log-normal prior of variance `prior_var` centred on the trend value.
pub(crate) fn map_dispersion(
    y: ArrayView1<f64>,
    mu: ArrayView1<f64>,
    cond_mask: &[bool],
    trend_disp: f64,
    prior_var: f64,
    params: &FitParams,
) -> f64 {
    let ln_trend = trend_disp.ln();
    let lo = params.min_disp.ln();
    let hi = params.max_disp_for(cond_mask.len()).ln();
    let ln_alpha = golden_section_max(
        |la| {
            let delta = la - ln_trend;
            cr_log_likelihood(y, mu, cond_mask, la.exp()) - delta * delta / (2.0 * prior_var)
        },
        lo,
        hi,
        params.disp_iters,
    );
    ln_alpha.exp()
}

// ---------------------------------------------------------------------------
// Dispersion trend – parametric curve with mean fallback
// ---------------------------------------------------------------------------

/// Mean-dispersion trend evaluated per gene at its base mean.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum DispersionTrend {
    /// `alpha(mu) = a0 + a1 / mu`: an asymptotic dispersion plus an extra
    /// Poisson-like term for weakly expressed genes.
    Parametric { a0: f64, a1: f64 },
    /// Flat trend used when the parametric fit is not viable.
    Mean(f64),
}

impl DispersionTrend {
    pub fn evaluate(&self, base_mean: f64) -> f64 {
        match *self {
            DispersionTrend::Parametric { a0, a1 } => a0 + a1 / base_mean,
            DispersionTrend::Mean(m) => m,
        }
    }
}

/// Log-normal prior on dispersions, centred on the trend curve.
///
/// `squared_logres` is the squared MAD of the log residuals around the trend
/// and also classifies dispersion outliers; `prior_var` is the residual
/// variance with the sampling noise of the MLE subtracted, floored at 0.25.
#[derive(Debug, Clone, Copy)]
pub struct DispersionPrior {
    pub squared_logres: f64,
    pub prior_var: f64,
}

/// Fit `disp ~ a0 + a1 / base_mean` by iterated weighted least squares with
/// gamma-family weights `1 / fitted^2`, excluding ratio outliers between
/// rounds.  Returns `None` when the fit degenerates or a coefficient comes
/// out non-positive, in which case the caller falls back to the mean trend.
pub(crate) fn fit_parametric_trend(
    base_means: &[f64],
    dispersions: &[f64],
    usable: &[bool],
) -> Option<(f64, f64)> {
    let points: Vec<(f64, f64)> = base_means
        .iter()
        .zip(dispersions)
        .zip(usable)
        .filter(|&(_, &u)| u)
        .map(|((&m, &d), _)| (1.0 / m, d))
        .collect();
    if points.len() < 3 {
        return None;
    }

    let mut include = vec![true; points.len()];
    let mut fitted: Vec<f64> = vec![0.0; points.len()];
    let mut a0 = 0.0;
    let mut a1 = 0.0;

    for iter in 0..10 {
        // Weighted normal equations over the included genes.  The first
        // round uses uniform weights (flat initial fit).
        let (mut sw, mut swx, mut swxx, mut swz, mut swxz) = (0.0, 0.0, 0.0, 0.0, 0.0);
        for (k, &(x, z)) in points.iter().enumerate() {
            if !include[k] {
                continue;
            }
            let w = if iter == 0 {
                1.0
            } else {
                1.0 / fitted[k].max(1e-8).powi(2)
            };
            sw += w;
            swx += w * x;
            swxx += w * x * x;
            swz += w * z;
            swxz += w * x * z;
        }
        let det = sw * swxx - swx * swx;
        if det.abs() < 1e-14 || !det.is_finite() {
            return None;
        }
        let new_a0 = (swxx * swz - swx * swxz) / det;
        let new_a1 = (sw * swxz - swx * swz) / det;

        for (k, &(x, _)) in points.iter().enumerate() {
            fitted[k] = new_a0 + new_a1 * x;
        }
        for (k, &(_, z)) in points.iter().enumerate() {
            let ratio = z / fitted[k].max(1e-8);
            include[k] = (1e-4..=15.0).contains(&ratio);
        }

        let change = (new_a0 - a0).abs() / a0.abs().max(1e-12)
            + (new_a1 - a1).abs() / a1.abs().max(1e-12);
        a0 = new_a0;
        a1 = new_a1;
        if iter > 0 && change < 1e-6 {
            break;
        }
    }

    if !(a0.is_finite() && a1.is_finite()) || a0 <= 0.0 || a1 <= 0.0 {
        return None;
    }
    Some((a0, a1))
}

// ---------------------------------------------------------------------------
// Prior variance helpers
// ---------------------------------------------------------------------------

/// Median absolute deviation scaled to estimate a normal sigma.
pub(crate) fn mad(values: &[f64]) -> f64 {
    let mut v = values.to_vec();
    let center = median(&mut v);
    let mut deviations: Vec<f64> = values.iter().map(|&x| (x - center).abs()).collect();
    1.4826 * median(&mut deviations)
}

/// Trigamma function (second derivative of ln gamma), via the recurrence
/// `psi'(x) = psi'(x + 1) + 1/x^2` and the asymptotic series above 6.
pub(crate) fn trigamma(x: f64) -> f64 {
    let mut x = x;
    let mut acc = 0.0;
    while x < 6.0 {
        acc += 1.0 / (x * x);
        x += 1.0;
    }
    let inv = 1.0 / x;
    let inv2 = inv * inv;
    acc + inv
        * (1.0
            + inv * (0.5
                + inv * (1.0 / 6.0
                    - inv2 * (1.0 / 30.0 - inv2 * (1.0 / 42.0 - inv2 / 30.0)))))
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
