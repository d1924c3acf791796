use ndarray::{Array1, ArrayView1};
use statrs::distribution::{ContinuousCDF, FisherSnedecor};

use crate::error::StatsError;

// ---------------------------------------------------------------------------
// Trimmed moments
// ---------------------------------------------------------------------------

/// Mean after dropping `floor(trim * len)` values from each end.
pub(crate) fn trimmed_mean(values: &[f64], trim: f64) -> f64 {
    let mut v = values.to_vec();
    v.sort_by(f64::total_cmp);
    let cut = (trim * v.len() as f64).floor() as usize;
    let kept = &v[cut..v.len() - cut];
    kept.iter().sum::<f64>() / kept.len() as f64
}

/// Robust method-of-moments dispersion used for Cook's distances: trimmed
/// variance per condition group (the most extreme group wins) against the
/// plain mean, floored at 0.04 so small distances never explode.
pub(crate) fn robust_mom_dispersion(normed: ArrayView1<f64>, cond_mask: &[bool]) -> f64 {
    let mut v_max = 0.0_f64;
    for alt in [false, true] {
        let group: Vec<f64> = normed
            .iter()
            .zip(cond_mask)
            .filter(|&(_, &m)| m == alt)
            .map(|(&x, _)| x)
            .collect();
        // Trim harder for small groups, with the matching variance
        // correction for the dropped tails.
        let (trim, scale) = match group.len() {
            0..=3 => (1.0 / 3.0, 2.04),
            4..=23 => (0.25, 1.86),
            _ => (0.125, 1.51),
        };
        let center = trimmed_mean(&group, trim);
        let sq: Vec<f64> = group.iter().map(|&x| (x - center) * (x - center)).collect();
        v_max = v_max.max(scale * trimmed_mean(&sq, trim));
    }
    let m = normed.sum() / normed.len() as f64;
    if m <= 0.0 {
        return 0.04;
    }
    ((v_max - m) / (m * m)).max(0.04)
}

// ---------------------------------------------------------------------------
// Cook's distances
// ---------------------------------------------------------------------------

/// Cook's distance of every sample for one gene: squared Pearson residual
/// under the robust dispersion, scaled by leverage.
pub(crate) fn cooks_row(
    y: ArrayView1<f64>,
    mu: ArrayView1<f64>,
    hat: ArrayView1<f64>,
    normed: ArrayView1<f64>,
    cond_mask: &[bool],
) -> Array1<f64> {
    const N_COEFFS: f64 = 2.0;
    let alpha = robust_mom_dispersion(normed, cond_mask);
    let mut cooks = Array1::zeros(y.len());
    for j in 0..y.len() {
        let var = mu[j] + alpha * mu[j] * mu[j];
        let pearson_sq = (y[j] - mu[j]) * (y[j] - mu[j]) / var;
        let h = hat[j].min(1.0 - 1e-8);
        cooks[j] = pearson_sq / N_COEFFS * h / ((1.0 - h) * (1.0 - h));
    }
    cooks
}

/// Flagging threshold: the `quantile` quantile of F(p, n - p).
pub(crate) fn cooks_cutoff(quantile: f64, n_samples: usize) -> Result<f64, StatsError> {
    let d2 = n_samples as f64 - 2.0;
    let f = FisherSnedecor::new(2.0, d2).map_err(|e| StatsError::Numeric(e.to_string()))?;
    Ok(f.inverse_cdf(quantile))
}

/// Samples whose condition group has at least `min_replicates` members are
/// eligible for outlier replacement.
pub(crate) fn replaceable_samples(cond_mask: &[bool], min_replicates: usize) -> Vec<bool> {
    let n_alt = cond_mask.iter().filter(|&&m| m).count();
    let n_ref = cond_mask.len() - n_alt;
    cond_mask
        .iter()
        .map(|&m| {
            if m {
                n_alt >= min_replicates
            } else {
                n_ref >= min_replicates
            }
        })
        .collect()
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;
    use ndarray::array;

    #[test]
    fn trimmed_mean_drops_both_tails() {
        let values: Vec<f64> = (1..=10).map(|v| v as f64).collect();
        // floor(0.2 * 10) = 2 from each end leaves 3..=8.
        assert_abs_diff_eq!(trimmed_mean(&values, 0.2), 5.5);
        // No trimming for short inputs.
        assert_abs_diff_eq!(trimmed_mean(&[7.0, 9.0], 0.25), 8.0);
    }

    #[test]
    fn robust_dispersion_is_floored() {
        // Near-Poisson data sits below the floor.
        let normed = array![100.0, 101.0, 99.0, 100.0, 102.0, 98.0, 100.0, 100.0];
        let mask = [false, false, false, false, true, true, true, true];
        assert_abs_diff_eq!(robust_mom_dispersion(normed.view(), &mask), 0.04);
    }

    #[test]
    fn robust_dispersion_resists_single_outlier() {
        // One wild value must not inflate the estimate; trimming removes it.
        let clean = array![100.0, 110.0, 90.0, 105.0, 95.0, 108.0, 92.0, 100.0];
        let dirty = array![100.0, 110.0, 90.0, 105.0, 95.0, 108.0, 92.0, 4000.0];
        let mask = [false, false, false, false, true, true, true, true];
        let d_clean = robust_mom_dispersion(clean.view(), &mask);
        let d_dirty = robust_mom_dispersion(dirty.view(), &mask);
        assert!(d_dirty < 10.0 * d_clean.max(0.04), "estimate blew up: {d_dirty}");
    }

    #[test]
    fn outlier_sample_gets_large_cooks_distance() {
        let y = array![200.0, 195.0, 205.0, 4000.0, 200.0, 198.0, 202.0, 204.0];
        let mu_val = (200.0 * 3.0 + 4000.0) / 4.0;
        let mu = array![mu_val, mu_val, mu_val, mu_val, 201.0, 201.0, 201.0, 201.0];
        let hat = Array1::from_elem(8, 0.25);
        let mask = [false, false, false, false, true, true, true, true];
        let cooks = cooks_row(y.view(), mu.view(), hat.view(), y.view(), &mask);
        assert!(cooks[3] > 10.0, "outlier Cook's distance too small: {}", cooks[3]);
        assert!(cooks[4] < 1.0, "clean Cook's distance too large: {}", cooks[4]);
    }

    #[test]
    fn cutoff_matches_f_quantile() {
        // qf(0.99, 2, 6) from R.
        let cutoff = cooks_cutoff(0.99, 8).unwrap();
        assert_abs_diff_eq!(cutoff, 10.924_77, epsilon = 1e-2);
    }

    #[test]
    fn replaceable_needs_enough_replicates() {
        let mask = [false, false, false, true, true, true, true, true, true, true];
        let eligible = replaceable_samples(&mask, 7);
        assert!(!eligible[0] && !eligible[1] && !eligible[2]);
        assert!(eligible[3..].iter().all(|&e| e));
    }
}
