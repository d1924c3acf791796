//! Count dataset and the fitting ladder that turns raw counts into
//! dispersion and log fold change estimates.

use ndarray::{Array1, Array2, ArrayView1, Axis};

use crate::dispersion::{self, DispersionPrior, DispersionTrend};
use crate::error::{Result, StatsError};
use crate::glm::{self, GlmFit};
use crate::normalization;
use crate::outliers;
use crate::params::FitParams;

// ---------------------------------------------------------------------------
// CountDataSet – two-condition counts plus fitted state
// ---------------------------------------------------------------------------

/// An integer count matrix (genes x samples) with a two-level condition
/// factor, and every intermediate the fitting procedure produces.
///
/// Fitting is a fixed ladder; each step stores what the next one reads:
///
/// ```text
/// fit_size_factors
///   -> fit_genewise_dispersions
///   -> fit_dispersion_trend
///   -> fit_dispersion_prior
///   -> fit_map_dispersions
///   -> fit_lfc
///   -> calculate_cooks
///   -> refit            (optional outlier replacement)
/// ```
///
/// Calling a step before its prerequisites yields [`StatsError::StepOrder`].
/// The condition levels are sorted alphabetically; the first level is the
/// reference and the second the alternative, so the condition coefficient
/// reads "alternative versus reference".
#[derive(Debug, Clone)]
pub struct CountDataSet {
    counts: Array2<f64>,
    gene_ids: Vec<String>,
    sample_ids: Vec<String>,
    levels: [String; 2],
    /// True where the sample carries the alternative level.
    cond_mask: Vec<bool>,
    /// True where the gene has zero counts in every sample.
    zero_gene: Vec<bool>,
    params: FitParams,

    size_factors: Option<Array1<f64>>,
    normed_counts: Option<Array2<f64>>,
    base_means: Option<Array1<f64>>,
    mu_hat: Option<Array2<f64>>,
    genewise_dispersions: Option<Array1<f64>>,
    trend: Option<DispersionTrend>,
    trend_genes: Option<Vec<bool>>,
    fitted_dispersions: Option<Array1<f64>>,
    prior: Option<DispersionPrior>,
    map_dispersions: Option<Array1<f64>>,
    fit: Option<GlmFit>,
    cooks: Option<Array2<f64>>,
    replaced: Option<Vec<bool>>,
}

impl CountDataSet {
    /// Validate and wrap a count matrix with default fitting parameters.
    pub fn new(
        counts: Array2<f64>,
        gene_ids: Vec<String>,
        sample_ids: Vec<String>,
        conditions: Vec<String>,
    ) -> Result<Self> {
        Self::with_params(counts, gene_ids, sample_ids, conditions, FitParams::default())
    }

    /// Same as [`CountDataSet::new`] but with explicit parameters.
    ///
    /// `counts` must hold non-negative integers stored as `f64`, one row per
    /// gene and one column per sample, and `conditions` must carry exactly
    /// two distinct labels across at least three samples.
    pub fn with_params(
        counts: Array2<f64>,
        gene_ids: Vec<String>,
        sample_ids: Vec<String>,
        conditions: Vec<String>,
        params: FitParams,
    ) -> Result<Self> {
        let (n_genes, n_samples) = counts.dim();
        if n_genes == 0 {
            return Err(StatsError::DimensionMismatch(
                "count matrix has no genes".into(),
            ));
        }
        if gene_ids.len() != n_genes || sample_ids.len() != n_samples {
            return Err(StatsError::DimensionMismatch(format!(
                "count matrix is {n_genes}x{n_samples} but there are {} gene ids and {} sample ids",
                gene_ids.len(),
                sample_ids.len()
            )));
        }
        if conditions.len() != n_samples {
            return Err(StatsError::DimensionMismatch(format!(
                "{} condition labels for {n_samples} samples",
                conditions.len()
            )));
        }
        for &v in counts.iter() {
            if !v.is_finite() || v < 0.0 || v.fract() != 0.0 {
                return Err(StatsError::InvalidCounts(format!(
                    "counts must be non-negative integers, found {v}"
                )));
            }
        }

        let mut distinct: Vec<String> = conditions.to_vec();
        distinct.sort();
        distinct.dedup();
        if distinct.len() != 2 {
            return Err(StatsError::InvalidDesign(format!(
                "expected exactly two condition levels, found {}",
                distinct.len()
            )));
        }
        if n_samples <= 2 {
            return Err(StatsError::InvalidDesign(format!(
                "no residual degrees of freedom: {n_samples} samples for 2 coefficients"
            )));
        }
        let levels = [distinct[0].clone(), distinct[1].clone()];
        let cond_mask: Vec<bool> = conditions.iter().map(|c| *c == levels[1]).collect();
        let zero_gene: Vec<bool> = counts
            .axis_iter(Axis(0))
            .map(|row| row.iter().all(|&v| v == 0.0))
            .collect();

        Ok(CountDataSet {
            counts,
            gene_ids,
            sample_ids,
            levels,
            cond_mask,
            zero_gene,
            params,
            size_factors: None,
            normed_counts: None,
            base_means: None,
            mu_hat: None,
            genewise_dispersions: None,
            trend: None,
            trend_genes: None,
            fitted_dispersions: None,
            prior: None,
            map_dispersions: None,
            fit: None,
            cooks: None,
            replaced: None,
        })
    }

    // -- Fitting steps --

    /// Median-of-ratios size factors, normalized counts and base means.
    pub fn fit_size_factors(&mut self) -> Result<()> {
        log::info!("Fitting size factors");
        let sf = normalization::median_of_ratios(&self.counts.view())?;
        let mut normed = self.counts.clone();
        for (j, mut col) in normed.axis_iter_mut(Axis(1)).enumerate() {
            let s = sf[j];
            col.mapv_inplace(|v| v / s);
        }
        let base_means = normed.sum_axis(Axis(1)) / self.cond_mask.len() as f64;
        self.size_factors = Some(sf);
        self.normed_counts = Some(normed);
        self.base_means = Some(base_means);
        Ok(())
    }

    /// Per-gene maximum-likelihood dispersions against group-mean fitted
    /// values.  All-zero genes keep NaN.
    pub fn fit_genewise_dispersions(&mut self) -> Result<()> {
        log::info!("Fitting genewise dispersions");
        let (mu_hat, disps) = {
            let normed = require(
                &self.normed_counts,
                "fit_genewise_dispersions",
                "fit_size_factors",
            )?;
            let sf = require(
                &self.size_factors,
                "fit_genewise_dispersions",
                "fit_size_factors",
            )?;
            let mut mu_hat = Array2::from_elem(self.counts.dim(), f64::NAN);
            let mut disps = Array1::from_elem(self.n_genes(), f64::NAN);
            for i in 0..self.n_genes() {
                if self.zero_gene[i] {
                    continue;
                }
                let mu_row =
                    fitted_group_means(normed.row(i), &self.cond_mask, sf, self.params.min_mu);
                disps[i] = dispersion::genewise_dispersion(
                    self.counts.row(i),
                    mu_row.view(),
                    &self.cond_mask,
                    &self.params,
                );
                mu_hat.row_mut(i).assign(&mu_row);
            }
            (mu_hat, disps)
        };
        self.mu_hat = Some(mu_hat);
        self.genewise_dispersions = Some(disps);
        Ok(())
    }

    /// Fit the mean-dispersion trend, falling back to a flat mean when the
    /// parametric curve does not hold, and evaluate it per gene.
    pub fn fit_dispersion_trend(&mut self) -> Result<()> {
        log::info!("Fitting dispersion trend curve");
        let (trend, usable, fitted) = {
            let disps = require(
                &self.genewise_dispersions,
                "fit_dispersion_trend",
                "fit_genewise_dispersions",
            )?;
            let base = require(&self.base_means, "fit_dispersion_trend", "fit_size_factors")?;

            // Genes with a dispersion pinned at the lower bound carry no
            // information about the trend.
            let usable: Vec<bool> = (0..self.n_genes())
                .map(|i| {
                    !self.zero_gene[i]
                        && base[i] > 0.0
                        && disps[i] >= 100.0 * self.params.min_disp
                })
                .collect();

            let base_vec = base.to_vec();
            let disp_vec = disps.to_vec();
            let trend = match dispersion::fit_parametric_trend(&base_vec, &disp_vec, &usable) {
                Some((a0, a1)) => DispersionTrend::Parametric { a0, a1 },
                None => {
                    let pool: Vec<f64> = disp_vec
                        .iter()
                        .zip(&usable)
                        .filter(|&(_, &u)| u)
                        .map(|(&d, _)| d)
                        .collect();
                    let pool = if pool.is_empty() {
                        disp_vec.iter().copied().filter(|d| d.is_finite()).collect()
                    } else {
                        pool
                    };
                    let mean = outliers::trimmed_mean(&pool, 0.001);
                    log::warn!("Parametric dispersion trend failed, falling back to the mean trend");
                    DispersionTrend::Mean(mean.max(self.params.min_disp))
                }
            };

            let max_disp = self.params.max_disp_for(self.n_samples());
            let fitted: Array1<f64> = (0..self.n_genes())
                .map(|i| {
                    if self.zero_gene[i] {
                        f64::NAN
                    } else {
                        trend
                            .evaluate(base[i])
                            .clamp(self.params.min_disp, max_disp)
                    }
                })
                .collect();
            (trend, usable, fitted)
        };
        self.trend = Some(trend);
        self.trend_genes = Some(usable);
        self.fitted_dispersions = Some(fitted);
        Ok(())
    }

    /// Variance of the log-normal dispersion prior, from the spread of the
    /// genewise estimates around the trend.
    pub fn fit_dispersion_prior(&mut self) -> Result<()> {
        let prior = {
            let disps = require(
                &self.genewise_dispersions,
                "fit_dispersion_prior",
                "fit_genewise_dispersions",
            )?;
            let fitted = require(
                &self.fitted_dispersions,
                "fit_dispersion_prior",
                "fit_dispersion_trend",
            )?;
            let usable = require(
                &self.trend_genes,
                "fit_dispersion_prior",
                "fit_dispersion_trend",
            )?;
            let residuals: Vec<f64> = (0..self.n_genes())
                .filter(|&i| usable[i])
                .map(|i| disps[i].ln() - fitted[i].ln())
                .collect();
            let squared_logres = dispersion::mad(&residuals).powi(2);
            // Subtract the sampling variance of a log dispersion estimate;
            // what remains is the spread of the true dispersions.
            let dof = (self.n_samples() as f64 - 2.0) / 2.0;
            let prior_var = (squared_logres - dispersion::trigamma(dof)).max(0.25);
            DispersionPrior {
                squared_logres,
                prior_var,
            }
        };
        self.prior = Some(prior);
        Ok(())
    }

    /// Shrink each genewise dispersion towards the trend.  Genes far above
    /// the trend are dispersion outliers and keep their genewise estimate.
    pub fn fit_map_dispersions(&mut self) -> Result<()> {
        log::info!("Fitting MAP dispersions");
        let maps = {
            let disps = require(
                &self.genewise_dispersions,
                "fit_map_dispersions",
                "fit_genewise_dispersions",
            )?;
            let fitted = require(
                &self.fitted_dispersions,
                "fit_map_dispersions",
                "fit_dispersion_trend",
            )?;
            let prior = *require(&self.prior, "fit_map_dispersions", "fit_dispersion_prior")?;
            let mu_hat = require(&self.mu_hat, "fit_map_dispersions", "fit_genewise_dispersions")?;

            let max_disp = self.params.max_disp_for(self.n_samples());
            let two_sd = 2.0 * prior.squared_logres.sqrt();
            let mut maps = Array1::from_elem(self.n_genes(), f64::NAN);
            for i in 0..self.n_genes() {
                if self.zero_gene[i] {
                    continue;
                }
                maps[i] = if disps[i].ln() > fitted[i].ln() + two_sd {
                    disps[i].clamp(self.params.min_disp, max_disp)
                } else {
                    dispersion::map_dispersion(
                        self.counts.row(i),
                        mu_hat.row(i),
                        &self.cond_mask,
                        fitted[i],
                        prior.prior_var,
                        &self.params,
                    )
                };
            }
            maps
        };
        self.map_dispersions = Some(maps);
        Ok(())
    }

    /// Fit the per-gene negative binomial GLM at the MAP dispersions.
    pub fn fit_lfc(&mut self) -> Result<()> {
        log::info!("Fitting LFCs");
        let fit = {
            let normed = require(&self.normed_counts, "fit_lfc", "fit_size_factors")?;
            let sf = require(&self.size_factors, "fit_lfc", "fit_size_factors")?;
            let maps = require(&self.map_dispersions, "fit_lfc", "fit_map_dispersions")?;
            let offsets: Vec<f64> = sf.iter().map(|&s| s.ln()).collect();
            let mut fit = GlmFit::empty(self.n_genes(), self.n_samples());
            for i in 0..self.n_genes() {
                if self.zero_gene[i] {
                    continue;
                }
                let gene_fit = glm::fit_gene(
                    self.counts.row(i),
                    normed.row(i),
                    &offsets,
                    &self.cond_mask,
                    maps[i],
                    &self.params,
                );
                fit.store(i, &gene_fit);
            }
            fit
        };
        let stuck = fit.converged.iter().filter(|&&c| !c).count();
        if stuck > 0 {
            log::warn!("IRLS did not converge for {stuck} genes");
        }
        self.fit = Some(fit);
        Ok(())
    }

    /// Cook's distance of every count under the fitted model.
    pub fn calculate_cooks(&mut self) -> Result<()> {
        log::info!("Calculating Cook's distances");
        let cooks = {
            let normed = require(&self.normed_counts, "calculate_cooks", "fit_size_factors")?;
            let fit = require(&self.fit, "calculate_cooks", "fit_lfc")?;
            let mut cooks = Array2::from_elem(self.counts.dim(), f64::NAN);
            for i in 0..self.n_genes() {
                if self.zero_gene[i] {
                    continue;
                }
                let row = outliers::cooks_row(
                    self.counts.row(i),
                    fit.mu.row(i),
                    fit.hat.row(i),
                    normed.row(i),
                    &self.cond_mask,
                );
                cooks.row_mut(i).assign(&row);
            }
            cooks
        };
        self.cooks = Some(cooks);
        Ok(())
    }

    /// Replace count outliers and refit the affected genes.
    ///
    /// A count is replaceable when its condition group has at least
    /// `min_replicates` samples and its Cook's distance exceeds the
    /// `F(cooks_quantile; 2, n - 2)` cutoff.  Flagged counts are replaced by
    /// the gene's trimmed mean of normalized counts scaled back by the size
    /// factor, then dispersion and LFC fitting reruns for those genes with
    /// the trend and prior held fixed.  Returns the number of refitted genes.
    pub fn refit(&mut self) -> Result<usize> {
        let n = self.n_samples();
        let cutoff = outliers::cooks_cutoff(self.params.cooks_quantile, n)?;
        let replaceable = outliers::replaceable_samples(&self.cond_mask, self.params.min_replicates);

        let sf = require(&self.size_factors, "refit", "fit_size_factors")?.clone();
        let trend = *require(&self.trend, "refit", "fit_dispersion_trend")?;
        let prior = *require(&self.prior, "refit", "fit_dispersion_prior")?;

        let genes: Vec<usize> = {
            let cooks = require(&self.cooks, "refit", "calculate_cooks")?;
            (0..self.n_genes())
                .filter(|&i| !self.zero_gene[i])
                .filter(|&i| {
                    cooks
                        .row(i)
                        .iter()
                        .zip(&replaceable)
                        .any(|(&c, &r)| r && c > cutoff)
                })
                .collect()
        };
        let mut replaced = vec![false; self.n_genes()];
        for &i in &genes {
            replaced[i] = true;
        }

        log::info!("Replacing {} outlier genes", genes.len());
        if genes.is_empty() {
            self.replaced = Some(replaced);
            return Ok(0);
        }

        let mut normed = take_state(&mut self.normed_counts, "refit", "fit_size_factors")?;
        let mut base_means = take_state(&mut self.base_means, "refit", "fit_size_factors")?;
        let mut mu_hat = take_state(&mut self.mu_hat, "refit", "fit_genewise_dispersions")?;
        let mut genewise = take_state(
            &mut self.genewise_dispersions,
            "refit",
            "fit_genewise_dispersions",
        )?;
        let mut fitted = take_state(
            &mut self.fitted_dispersions,
            "refit",
            "fit_dispersion_trend",
        )?;
        let mut maps = take_state(&mut self.map_dispersions, "refit", "fit_map_dispersions")?;
        let mut fit = take_state(&mut self.fit, "refit", "fit_lfc")?;
        let mut cooks = take_state(&mut self.cooks, "refit", "calculate_cooks")?;

        let offsets: Vec<f64> = sf.iter().map(|&s| s.ln()).collect();
        let max_disp = self.params.max_disp_for(n);
        let two_sd = 2.0 * prior.squared_logres.sqrt();

        for &i in &genes {
            let row_trim = outliers::trimmed_mean(&normed.row(i).to_vec(), self.params.outlier_trim);
            for j in 0..n {
                if replaceable[j] && cooks[[i, j]] > cutoff {
                    self.counts[[i, j]] = (row_trim * sf[j]).trunc();
                }
            }

            let mut all_zero = true;
            for j in 0..n {
                normed[[i, j]] = self.counts[[i, j]] / sf[j];
                if self.counts[[i, j]] > 0.0 {
                    all_zero = false;
                }
            }
            base_means[i] = normed.row(i).sum() / n as f64;

            if all_zero {
                // Replacement emptied the gene; from here on it behaves like
                // an input all-zero gene.
                self.zero_gene[i] = true;
                mu_hat.row_mut(i).fill(f64::NAN);
                genewise[i] = f64::NAN;
                fitted[i] = f64::NAN;
                maps[i] = f64::NAN;
                for k in 0..2 {
                    fit.beta[[i, k]] = f64::NAN;
                    fit.se[[i, k]] = f64::NAN;
                }
                fit.mu.row_mut(i).fill(f64::NAN);
                fit.hat.row_mut(i).fill(f64::NAN);
                fit.converged[i] = true;
                cooks.row_mut(i).fill(f64::NAN);
                continue;
            }

            let y = self.counts.row(i);
            let mu_row = fitted_group_means(normed.row(i), &self.cond_mask, &sf, self.params.min_mu);
            let disp =
                dispersion::genewise_dispersion(y, mu_row.view(), &self.cond_mask, &self.params);
            mu_hat.row_mut(i).assign(&mu_row);
            genewise[i] = disp;
            fitted[i] = trend
                .evaluate(base_means[i])
                .clamp(self.params.min_disp, max_disp);
            maps[i] = if disp.ln() > fitted[i].ln() + two_sd {
                disp.clamp(self.params.min_disp, max_disp)
            } else {
                dispersion::map_dispersion(
                    y,
                    mu_row.view(),
                    &self.cond_mask,
                    fitted[i],
                    prior.prior_var,
                    &self.params,
                )
            };

            let gene_fit = glm::fit_gene(
                y,
                normed.row(i),
                &offsets,
                &self.cond_mask,
                maps[i],
                &self.params,
            );
            fit.store(i, &gene_fit);
            let new_cooks = outliers::cooks_row(
                y,
                fit.mu.row(i),
                fit.hat.row(i),
                normed.row(i),
                &self.cond_mask,
            );
            cooks.row_mut(i).assign(&new_cooks);
        }

        self.normed_counts = Some(normed);
        self.base_means = Some(base_means);
        self.mu_hat = Some(mu_hat);
        self.genewise_dispersions = Some(genewise);
        self.fitted_dispersions = Some(fitted);
        self.map_dispersions = Some(maps);
        self.fit = Some(fit);
        self.cooks = Some(cooks);
        self.replaced = Some(replaced);
        Ok(genes.len())
    }

    // -- Accessors --

    pub fn n_genes(&self) -> usize {
        self.counts.nrows()
    }

    pub fn n_samples(&self) -> usize {
        self.counts.ncols()
    }

    pub fn gene_ids(&self) -> &[String] {
        &self.gene_ids
    }

    pub fn sample_ids(&self) -> &[String] {
        &self.sample_ids
    }

    /// `(reference, alternative)` condition levels, alphabetical.
    pub fn levels(&self) -> (&str, &str) {
        (&self.levels[0], &self.levels[1])
    }

    pub fn size_factors(&self) -> Option<&Array1<f64>> {
        self.size_factors.as_ref()
    }

    pub fn normalized_counts(&self) -> Option<&Array2<f64>> {
        self.normed_counts.as_ref()
    }

    pub fn base_means(&self) -> Option<&Array1<f64>> {
        self.base_means.as_ref()
    }

    pub fn genewise_dispersions(&self) -> Option<&Array1<f64>> {
        self.genewise_dispersions.as_ref()
    }

    pub fn dispersion_trend(&self) -> Option<DispersionTrend> {
        self.trend
    }

    pub fn dispersion_prior(&self) -> Option<DispersionPrior> {
        self.prior
    }

    /// Final (MAP or kept-genewise) dispersions.
    pub fn dispersions(&self) -> Option<&Array1<f64>> {
        self.map_dispersions.as_ref()
    }

    pub fn glm_fit(&self) -> Option<&GlmFit> {
        self.fit.as_ref()
    }

    pub fn cooks_distances(&self) -> Option<&Array2<f64>> {
        self.cooks.as_ref()
    }

    /// Number of genes whose counts were replaced by [`CountDataSet::refit`].
    pub fn n_refitted(&self) -> Option<usize> {
        self.replaced
            .as_ref()
            .map(|r| r.iter().filter(|&&x| x).count())
    }

    pub(crate) fn zero_genes(&self) -> &[bool] {
        &self.zero_gene
    }

    pub(crate) fn cond_mask(&self) -> &[bool] {
        &self.cond_mask
    }

    pub(crate) fn fit_params(&self) -> &FitParams {
        &self.params
    }

    pub(crate) fn replaced_genes(&self) -> Option<&[bool]> {
        self.replaced.as_deref()
    }
}

fn require<'a, T>(opt: &'a Option<T>, step: &'static str, requires: &'static str) -> Result<&'a T> {
    opt.as_ref().ok_or(StatsError::StepOrder { step, requires })
}

fn take_state<T>(opt: &mut Option<T>, step: &'static str, requires: &'static str) -> Result<T> {
    opt.take().ok_or(StatsError::StepOrder { step, requires })
}

/// Fitted means under the group model: each sample gets its group's mean of
/// normalized counts scaled back by its size factor, floored at `min_mu`.
fn fitted_group_means(
    normed: ArrayView1<f64>,
    cond_mask: &[bool],
    size_factors: &Array1<f64>,
    min_mu: f64,
) -> Array1<f64> {
    let (mut sum_ref, mut n_ref, mut sum_alt, mut n_alt) = (0.0, 0.0, 0.0, 0.0);
    for (&v, &alt) in normed.iter().zip(cond_mask) {
        if alt {
            sum_alt += v;
            n_alt += 1.0;
        } else {
            sum_ref += v;
            n_ref += 1.0;
        }
    }
    let q_ref = sum_ref / n_ref;
    let q_alt = sum_alt / n_alt;
    (0..cond_mask.len())
        .map(|j| {
            let q = if cond_mask[j] { q_alt } else { q_ref };
            (q * size_factors[j]).max(min_mu)
        })
        .collect()
}
