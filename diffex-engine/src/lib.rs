//! Browser-embeddable differential expression pipeline.
//!
//! The crate glues the statistics library to a message-passing host such as
//! a web worker: it decodes a cohort payload, aligns it with the expression
//! counts, fits the model, and serializes the results.
//!
//! ```text
//! payload ──▶ load ──▶ align ──▶ fit + Wald test ──▶ JSON envelope
//! ```
//!
//! Every failure surfaces as an error envelope rather than a panic, so the
//! host side only ever has to handle one response shape.  Compiled with the
//! `wasm` feature the [`wasm`] module exports the pipeline to JavaScript.

pub mod analysis;
pub mod data;
pub mod payload;
pub mod result;

#[cfg(feature = "wasm")]
mod hostlog;
#[cfg(feature = "wasm")]
pub mod wasm;

use anyhow::Result;

pub use crate::analysis::AnalysisOptions;
pub use crate::payload::DeaPayload;
pub use crate::result::Envelope;

use crate::data::loader::{ExpressionSource, load_cohort, load_expression};
use crate::data::model::{LABEL_A, LABEL_B};

/// Run the full pipeline on a decoded payload.
pub fn run_pipeline(payload: &DeaPayload, options: &AnalysisOptions) -> Envelope {
    match try_run(payload, options) {
        Ok(data) => Envelope::success(data),
        Err(e) => {
            log::error!("Analysis failed: {e:#}");
            Envelope::error(format!("{e:#}"))
        }
    }
}

/// Run the pipeline on a raw JSON payload and return the envelope as JSON.
pub fn run_pipeline_json(raw: &str, options: &AnalysisOptions) -> String {
    let envelope = match serde_json::from_str::<DeaPayload>(raw) {
        Ok(payload) => run_pipeline(&payload, options),
        Err(e) => {
            log::error!("Payload did not parse: {e}");
            Envelope::error(format!("invalid payload: {e}"))
        }
    };
    envelope.to_json()
}

fn try_run(payload: &DeaPayload, options: &AnalysisOptions) -> Result<String> {
    let cohort_a = load_cohort(&payload.cohort_a, LABEL_A)?;
    let cohort_b = load_cohort(&payload.cohort_b, LABEL_B)?;
    log::info!(
        "Comparing cohort {} ({} samples) against cohort {} ({} samples)",
        cohort_a.display_name,
        cohort_a.len(),
        cohort_b.display_name,
        cohort_b.len()
    );

    let expression = load_expression(
        ExpressionSource::Records(payload.data.clone()),
        payload.map.as_deref(),
    )?;
    log::info!(
        "Loaded {} genes for {} samples",
        expression.n_genes(),
        expression.n_samples()
    );

    let (aligned, _report) = data::align::align(&cohort_a, &cohort_b, &expression)?;
    let results = analysis::run_analysis(&aligned, options)?;
    let data = result::results_to_json(&results)?;
    Ok(data)
}
