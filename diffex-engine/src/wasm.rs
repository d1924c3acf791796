//! JavaScript bindings.  Both entry points accept an optional log callback
//! invoked as `callback(message, level)` with levels `log`, `info`, `warn`
//! and `error`, and always return an envelope, serialized to a JSON string.

use wasm_bindgen::prelude::*;

use crate::analysis::AnalysisOptions;
use crate::payload::DeaPayload;
use crate::result::Envelope;
use crate::{hostlog, run_pipeline, run_pipeline_json};

#[wasm_bindgen(start)]
pub fn start() {
    console_error_panic_hook::set_once();
    hostlog::init();
}

/// Run the pipeline on a payload passed as a JavaScript object.
#[wasm_bindgen]
pub fn run_differential_expression(
    payload: JsValue,
    log_callback: Option<js_sys::Function>,
) -> String {
    hostlog::set_callback(log_callback);
    let envelope = match serde_wasm_bindgen::from_value::<DeaPayload>(payload) {
        Ok(payload) => run_pipeline(&payload, &AnalysisOptions::default()),
        Err(e) => Envelope::error(format!("invalid payload: {e}")),
    };
    envelope.to_json()
}

/// Run the pipeline on a payload passed as a JSON string.
#[wasm_bindgen]
pub fn run_differential_expression_json(
    payload: &str,
    log_callback: Option<js_sys::Function>,
) -> String {
    hostlog::set_callback(log_callback);
    run_pipeline_json(payload, &AnalysisOptions::default())
}
