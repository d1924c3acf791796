//! Negative binomial differential expression for two-condition count data,
//! following the DESeq2 procedure: median-of-ratios size factors, Cox-Reid
//! dispersion estimation shrunk towards a mean-dispersion trend, a per-gene
//! GLM fit and a Wald test on the condition coefficient.
//!
//! ```
//! use diffex_stats::{fit_all, wald_test, Contrast, CountDataSet, TestOptions};
//! use ndarray::array;
//!
//! # fn main() -> Result<(), diffex_stats::StatsError> {
//! let counts = array![
//!     [100.0, 110.0, 90.0, 400.0, 420.0, 380.0],
//!     [50.0, 55.0, 45.0, 52.0, 48.0, 50.0],
//! ];
//! let mut ds = CountDataSet::new(
//!     counts,
//!     vec!["g0".into(), "g1".into()],
//!     (0..6).map(|k| format!("s{k}")).collect(),
//!     ["a", "a", "a", "b", "b", "b"].iter().map(|s| s.to_string()).collect(),
//! )?;
//! fit_all(&mut ds, true)?;
//!
//! let contrast = Contrast::new("b", "a");
//! let res = wald_test(&ds, &contrast, &TestOptions { cooks_filter: false })?;
//! assert!(res.log2_fold_change[0] > 1.0);
//! # Ok(())
//! # }
//! ```

pub mod dataset;
pub mod dispersion;
pub mod error;
pub mod glm;
pub mod normalization;
mod outliers;
pub mod params;
pub mod testing;

pub use dataset::CountDataSet;
pub use dispersion::{DispersionPrior, DispersionTrend};
pub use error::StatsError;
pub use glm::GlmFit;
pub use params::FitParams;
pub use testing::{benjamini_hochberg, wald_test, Contrast, DeaResults, TestOptions};

/// Run the whole fitting ladder in order, optionally replacing count
/// outliers and refitting the genes they touched.
pub fn fit_all(ds: &mut CountDataSet, refit_outliers: bool) -> error::Result<()> {
    ds.fit_size_factors()?;
    ds.fit_genewise_dispersions()?;
    ds.fit_dispersion_trend()?;
    ds.fit_dispersion_prior()?;
    ds.fit_map_dispersions()?;
    ds.fit_lfc()?;
    ds.calculate_cooks()?;
    if refit_outliers {
        ds.refit()?;
    }
    Ok(())
}
