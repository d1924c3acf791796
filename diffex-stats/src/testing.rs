//! Wald tests and multiple-testing correction on a fitted dataset.

use std::f64::consts::{LN_2, SQRT_2};

use statrs::function::erf::erfc;

use crate::dataset::CountDataSet;
use crate::error::{Result, StatsError};
use crate::outliers;

// ---------------------------------------------------------------------------
// Contrast and options
// ---------------------------------------------------------------------------

/// Which ratio the test reports: `log2(numerator / denominator)` of the two
/// condition levels.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Contrast {
    pub numerator: String,
    pub denominator: String,
}

impl Contrast {
    pub fn new(numerator: impl Into<String>, denominator: impl Into<String>) -> Self {
        Contrast {
            numerator: numerator.into(),
            denominator: denominator.into(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct TestOptions {
    /// Censor the p-values of genes with a Cook's outlier sample.  Ignores
    /// genes already refitted through outlier replacement.
    pub cooks_filter: bool,
}

impl Default for TestOptions {
    fn default() -> Self {
        TestOptions { cooks_filter: true }
    }
}

/// Per-gene differential expression results, in input gene order.  All-zero
/// genes carry a base mean of 0 and NaN everywhere else.
#[derive(Debug, Clone)]
pub struct DeaResults {
    pub gene_ids: Vec<String>,
    pub base_mean: Vec<f64>,
    pub log2_fold_change: Vec<f64>,
    pub lfc_se: Vec<f64>,
    pub stat: Vec<f64>,
    pub pvalue: Vec<f64>,
    pub padj: Vec<f64>,
}

// ---------------------------------------------------------------------------
// Wald test
// ---------------------------------------------------------------------------

/// Two-sided Wald test of the condition coefficient for the given contrast.
///
/// The fitted coefficient is "alternative versus reference"; a contrast in
/// the opposite direction flips its sign.  Any other pair of labels is
/// rejected.  P-values come from the standard normal tail and are adjusted
/// with Benjamini-Hochberg.
pub fn wald_test(
    ds: &CountDataSet,
    contrast: &Contrast,
    options: &TestOptions,
) -> Result<DeaResults> {
    let (reference, alternative) = ds.levels();
    let sign = if contrast.numerator == alternative && contrast.denominator == reference {
        1.0
    } else if contrast.numerator == reference && contrast.denominator == alternative {
        -1.0
    } else {
        return Err(StatsError::InvalidContrast {
            numerator: contrast.numerator.clone(),
            denominator: contrast.denominator.clone(),
            reference: reference.to_string(),
            alternative: alternative.to_string(),
        });
    };

    let base = ds.base_means().ok_or(StatsError::StepOrder {
        step: "wald_test",
        requires: "fit_size_factors",
    })?;
    let fit = ds.glm_fit().ok_or(StatsError::StepOrder {
        step: "wald_test",
        requires: "fit_lfc",
    })?;

    let n_genes = ds.n_genes();
    let mut base_mean = vec![f64::NAN; n_genes];
    let mut log2_fold_change = vec![f64::NAN; n_genes];
    let mut lfc_se = vec![f64::NAN; n_genes];
    let mut stat = vec![f64::NAN; n_genes];
    let mut pvalue = vec![f64::NAN; n_genes];

    for i in 0..n_genes {
        base_mean[i] = base[i];
        if ds.zero_genes()[i] {
            continue;
        }
        let b = fit.beta[[i, 1]];
        let se = fit.se[[i, 1]];
        stat[i] = sign * b / se;
        pvalue[i] = erfc(stat[i].abs() / SQRT_2);
        log2_fold_change[i] = sign * b / LN_2;
        lfc_se[i] = se / LN_2;
    }

    if options.cooks_filter {
        censor_cooks_outliers(ds, &mut pvalue)?;
    }
    let padj = benjamini_hochberg(&pvalue);

    Ok(DeaResults {
        gene_ids: ds.gene_ids().to_vec(),
        base_mean,
        log2_fold_change,
        lfc_se,
        stat,
        pvalue,
        padj,
    })
}

/// Set the p-value of every gene with a Cook's distance over the
/// `F(cooks_quantile; 2, n - 2)` cutoff to NaN.  Only samples whose
/// condition group has at least three replicates count, and genes whose
/// counts were already replaced by a refit are left alone.
fn censor_cooks_outliers(ds: &CountDataSet, pvalue: &mut [f64]) -> Result<()> {
    let cooks = ds.cooks_distances().ok_or(StatsError::StepOrder {
        step: "wald_test",
        requires: "calculate_cooks",
    })?;
    let cutoff = outliers::cooks_cutoff(ds.fit_params().cooks_quantile, ds.n_samples())?;

    let mask = ds.cond_mask();
    let n_alt = mask.iter().filter(|&&m| m).count();
    let n_ref = mask.len() - n_alt;
    let group_ok: Vec<bool> = mask
        .iter()
        .map(|&m| if m { n_alt >= 3 } else { n_ref >= 3 })
        .collect();

    for i in 0..ds.n_genes() {
        if ds.zero_genes()[i] {
            continue;
        }
        if let Some(replaced) = ds.replaced_genes() {
            if replaced[i] {
                continue;
            }
        }
        if cooks
            .row(i)
            .iter()
            .zip(&group_ok)
            .any(|(&c, &ok)| ok && c > cutoff)
        {
            pvalue[i] = f64::NAN;
        }
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Benjamini-Hochberg
// ---------------------------------------------------------------------------

/// Benjamini-Hochberg adjusted p-values.  NaN entries stay NaN and do not
/// count towards the number of tests.
pub fn benjamini_hochberg(pvalues: &[f64]) -> Vec<f64> {
    let mut order: Vec<usize> = (0..pvalues.len())
        .filter(|&i| pvalues[i].is_finite())
        .collect();
    order.sort_by(|&a, &b| pvalues[a].total_cmp(&pvalues[b]));
    let m = order.len() as f64;

    let mut padj = vec![f64::NAN; pvalues.len()];
    let mut running = f64::INFINITY;
    for (rank, &idx) in order.iter().enumerate().rev() {
        let scaled = pvalues[idx] * m / (rank + 1) as f64;
        running = running.min(scaled);
        padj[idx] = running.min(1.0);
    }
    padj
}
