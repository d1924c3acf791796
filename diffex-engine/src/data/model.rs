use ndarray::Array2;

/// Condition label for cohort A samples.
pub const LABEL_A: &str = "A";
/// Condition label for cohort B samples.
pub const LABEL_B: &str = "B";

/// One cohort's sample metadata, tagged with its condition label.
#[derive(Debug, Clone)]
pub struct CohortTable {
    pub label: &'static str,
    /// Host-facing display name, only used in logs.
    pub display_name: String,
    pub sample_ids: Vec<String>,
    /// Parallel to `sample_ids`; carried along but not used by the analysis.
    pub participant_ids: Vec<String>,
}

impl CohortTable {
    pub fn len(&self) -> usize {
        self.sample_ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sample_ids.is_empty()
    }
}

/// Raw expression matrix: one row per gene, one column per sample, in the
/// order the source encoded them.
#[derive(Debug, Clone)]
pub struct ExpressionTable {
    pub gene_ids: Vec<String>,
    pub sample_ids: Vec<String>,
    pub counts: Array2<f64>,
}

impl ExpressionTable {
    pub fn n_genes(&self) -> usize {
        self.counts.nrows()
    }

    pub fn n_samples(&self) -> usize {
        self.counts.ncols()
    }
}

/// Expression matrix cut down to the merged cohorts: columns in merged
/// cohort order (all of A, then all of B), one condition label per column.
#[derive(Debug, Clone)]
pub struct AlignedDataset {
    pub gene_ids: Vec<String>,
    pub sample_ids: Vec<String>,
    pub conditions: Vec<String>,
    pub counts: Array2<f64>,
}
