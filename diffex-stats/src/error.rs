use thiserror::Error;

pub type Result<T> = std::result::Result<T, StatsError>;

/// Errors produced while building, fitting or testing a count dataset.
#[derive(Debug, Error)]
pub enum StatsError {
    #[error("dimension mismatch: {0}")]
    DimensionMismatch(String),

    #[error("invalid counts: {0}")]
    InvalidCounts(String),

    #[error("invalid design: {0}")]
    InvalidDesign(String),

    /// Median-of-ratios normalization needs at least one gene with a
    /// positive count in every sample.
    #[error("every gene contains at least one zero, cannot compute log geometric means")]
    AllGenesContainZero,

    /// A fitting step was called before its prerequisites.
    #[error("{step} called before {requires}")]
    StepOrder {
        step: &'static str,
        requires: &'static str,
    },

    #[error(
        "contrast ({numerator} vs {denominator}) does not match the condition levels ({reference}, {alternative})"
    )]
    InvalidContrast {
        numerator: String,
        denominator: String,
        reference: String,
        alternative: String,
    },

    #[error("numerical failure: {0}")]
    Numeric(String),
}
