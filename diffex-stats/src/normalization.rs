use ndarray::{Array1, ArrayView2, Axis};

use crate::error::StatsError;

// ---------------------------------------------------------------------------
// Median-of-ratios size factors
// ---------------------------------------------------------------------------

/// Estimate size factors with the median-of-ratios method.
///
/// For every gene with a positive count in all samples, take the log ratio
/// of each sample's count to the gene's log-geometric mean; a sample's size
/// factor is the exponential of the median of those ratios.  Genes
/// containing a zero carry no information and are left out; if no gene
/// survives the analysis cannot be normalized at all.
pub fn median_of_ratios(counts: &ArrayView2<f64>) -> Result<Array1<f64>, StatsError> {
    let (_, n_samples) = counts.dim();

    // Log-geometric mean per gene, None when any count is zero.
    let log_means: Vec<Option<f64>> = counts
        .axis_iter(Axis(0))
        .map(|gene| {
            let mut sum = 0.0;
            for &c in gene {
                if c <= 0.0 {
                    return None;
                }
                sum += c.ln();
            }
            Some(sum / n_samples as f64)
        })
        .collect();

    if log_means.iter().all(Option::is_none) {
        return Err(StatsError::AllGenesContainZero);
    }

    let mut size_factors = Array1::zeros(n_samples);
    for (j, col) in counts.axis_iter(Axis(1)).enumerate() {
        let mut log_ratios: Vec<f64> = log_means
            .iter()
            .zip(col)
            .filter_map(|(lm, &c)| lm.map(|lm| c.ln() - lm))
            .collect();
        size_factors[j] = median(&mut log_ratios).exp();
    }
    Ok(size_factors)
}

/// Median of a slice; the slice is sorted in place.
pub(crate) fn median(values: &mut [f64]) -> f64 {
    if values.is_empty() {
        return f64::NAN;
    }
    values.sort_by(f64::total_cmp);
    let mid = values.len() / 2;
    if values.len() % 2 == 1 {
        values[mid]
    } else {
        0.5 * (values[mid - 1] + values[mid])
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
