use ndarray::{Array1, Array2, ArrayView1};

use crate::dispersion::nb_log_likelihood;
use crate::params::FitParams;

// ---------------------------------------------------------------------------
// GlmFit – fitted coefficients and diagnostics for all genes
// ---------------------------------------------------------------------------

/// Per-gene negative binomial GLM fit (log link, size-factor offsets,
/// design `[intercept, condition]`).  All-zero genes keep NaN rows.
#[derive(Debug, Clone)]
pub struct GlmFit {
    /// Coefficients on the natural-log scale, genes x [intercept, condition].
    pub beta: Array2<f64>,
    /// Standard errors of the coefficients.
    pub se: Array2<f64>,
    /// Fitted means, genes x samples.
    pub mu: Array2<f64>,
    /// Hat-matrix diagonal, genes x samples.
    pub hat: Array2<f64>,
    /// Whether the IRLS loop converged for each gene.
    pub converged: Vec<bool>,
}

impl GlmFit {
    pub(crate) fn empty(n_genes: usize, n_samples: usize) -> Self {
        GlmFit {
            beta: Array2::from_elem((n_genes, 2), f64::NAN),
            se: Array2::from_elem((n_genes, 2), f64::NAN),
            mu: Array2::from_elem((n_genes, n_samples), f64::NAN),
            hat: Array2::from_elem((n_genes, n_samples), f64::NAN),
            converged: vec![true; n_genes],
        }
    }

    pub(crate) fn store(&mut self, gene: usize, fit: &GeneFit) {
        self.beta[[gene, 0]] = fit.beta[0];
        self.beta[[gene, 1]] = fit.beta[1];
        self.se[[gene, 0]] = fit.se[0];
        self.se[[gene, 1]] = fit.se[1];
        self.mu.row_mut(gene).assign(&fit.mu);
        self.hat.row_mut(gene).assign(&fit.hat);
        self.converged[gene] = fit.converged;
    }
}

/// IRLS result for a single gene.
pub(crate) struct GeneFit {
    pub beta: [f64; 2],
    pub se: [f64; 2],
    pub mu: Array1<f64>,
    pub hat: Array1<f64>,
    pub converged: bool,
}

// ---------------------------------------------------------------------------
// Per-gene IRLS
// ---------------------------------------------------------------------------

/// Fit one gene by iteratively reweighted least squares with a fixed
/// dispersion.  Convergence is judged on the relative deviance change, the
/// same criterion the reference implementation uses; hitting the iteration
/// cap is reported rather than treated as an error.
pub(crate) fn fit_gene(
    y: ArrayView1<f64>,
    normed: ArrayView1<f64>,
    offsets: &[f64],
    cond_mask: &[bool],
    alpha: f64,
    params: &FitParams,
) -> GeneFit {
    let n = y.len();

    // OLS of ln(normalized + 0.1) on the design gives a stable start; for
    // the two-group design that is just the per-group means of the logs.
    let (mut sum_ref, mut sum_alt, mut n_ref, mut n_alt) = (0.0, 0.0, 0.0, 0.0);
    for (&v, &alt) in normed.iter().zip(cond_mask) {
        let lv = (v + 0.1).ln();
        if alt {
            sum_alt += lv;
            n_alt += 1.0;
        } else {
            sum_ref += lv;
            n_ref += 1.0;
        }
    }
    let mean_ref = sum_ref / n_ref;
    let mut beta = [mean_ref, sum_alt / n_alt - mean_ref];

    let mut mu = Array1::zeros(n);
    let mut prev_dev = f64::INFINITY;
    let mut converged = false;

    for _ in 0..params.glm_max_iters {
        // Working weights and response at the current coefficients.
        let (mut sw, mut swt, mut sz, mut szt) = (0.0, 0.0, 0.0, 0.0);
        for j in 0..n {
            let eta = offsets[j] + beta[0] + if cond_mask[j] { beta[1] } else { 0.0 };
            let mu_j = eta.exp().clamp(params.min_mu, params.max_mu);
            let w = mu_j / (1.0 + alpha * mu_j);
            let z = (eta - offsets[j]) + (y[j] - mu_j) / mu_j;
            sw += w;
            sz += w * z;
            if cond_mask[j] {
                swt += w;
                szt += w * z;
            }
        }

        // Solve (X'WX + ridge I) beta = X'Wz; closed form for the 2x2 system.
        let a00 = sw + params.ridge;
        let a11 = swt + params.ridge;
        let det = a00 * a11 - swt * swt;
        beta = [
            (a11 * sz - swt * szt) / det,
            (a00 * szt - swt * sz) / det,
        ];

        for j in 0..n {
            let eta = offsets[j] + beta[0] + if cond_mask[j] { beta[1] } else { 0.0 };
            mu[j] = eta.exp().clamp(params.min_mu, params.max_mu);
        }
        let dev = -2.0 * nb_log_likelihood(y, mu.view(), alpha);
        if (prev_dev - dev).abs() < params.glm_tol * (dev.abs() + 0.1) {
            converged = true;
            break;
        }
        prev_dev = dev;
    }

    // Final weights give the standard errors and leverage.  For the
    // indicator design X'WX factors into per-group weight sums, so the
    // inverse and the hat diagonal have closed forms.
    let mut weights = Array1::zeros(n);
    let (mut w_ref, mut w_alt) = (0.0, 0.0);
    for j in 0..n {
        let w = mu[j] / (1.0 + alpha * mu[j]);
        weights[j] = w;
        if cond_mask[j] {
            w_alt += w;
        } else {
            w_ref += w;
        }
    }
    let se = [
        (1.0 / w_ref).sqrt(),
        (1.0 / w_ref + 1.0 / w_alt).sqrt(),
    ];
    let mut hat = Array1::zeros(n);
    for j in 0..n {
        let group_sum = if cond_mask[j] { w_alt } else { w_ref };
        hat[j] = weights[j] / group_sum;
    }

    GeneFit {
        beta,
        se,
        mu,
        hat,
        converged,
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
