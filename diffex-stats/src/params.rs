// ---------------------------------------------------------------------------
// FitParams – tuning knobs for the fitting procedure
// ---------------------------------------------------------------------------

/// Numerical parameters of the fitting procedure.  The defaults mirror the
/// reference implementation and should rarely need changing.
#[derive(Debug, Clone)]
pub struct FitParams {
    /// Lower bound for all dispersion estimates.
    pub min_disp: f64,
    /// Upper bound for dispersion estimates; the effective bound is
    /// `max_disp.max(n_samples)`.
    pub max_disp: f64,
    /// Smallest fitted mean used in likelihoods and weights.
    pub min_mu: f64,
    /// Largest fitted mean, guards against overflow in the IRLS exponent.
    pub max_mu: f64,
    /// Iteration cap for the per-gene IRLS coefficient fit.
    pub glm_max_iters: usize,
    /// Relative deviance tolerance ending the IRLS loop.
    pub glm_tol: f64,
    /// Golden-section iterations for dispersion optimization.  60 rounds
    /// narrow the ln-dispersion bracket below 1e-11.
    pub disp_iters: usize,
    /// Ridge term stabilizing the IRLS normal equations.
    pub ridge: f64,
    /// Quantile of F(p, n - p) used as the Cook's distance cutoff.
    pub cooks_quantile: f64,
    /// Minimum replicates a condition group needs before its samples are
    /// eligible for outlier replacement.
    pub min_replicates: usize,
    /// Trim fraction for the replacement trimmed mean.
    pub outlier_trim: f64,
}

impl Default for FitParams {
    fn default() -> Self {
        FitParams {
            min_disp: 1e-8,
            max_disp: 10.0,
            min_mu: 0.5,
            max_mu: 1e15,
            glm_max_iters: 100,
            glm_tol: 1e-8,
            disp_iters: 60,
            ridge: 1e-6,
            cooks_quantile: 0.99,
            min_replicates: 7,
            outlier_trim: 0.2,
        }
    }
}

impl FitParams {
    /// Effective dispersion upper bound for `n_samples` samples.
    pub(crate) fn max_disp_for(&self, n_samples: usize) -> f64 {
        self.max_disp.max(n_samples as f64)
    }
}
