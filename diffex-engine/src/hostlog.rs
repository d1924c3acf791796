//! Log bridge for the browser build: forwards `log` records to a JavaScript
//! callback so the host page can surface pipeline progress.

use std::cell::RefCell;
use std::sync::Once;

use log::{Level, LevelFilter, Log, Metadata, Record};
use wasm_bindgen::JsValue;

thread_local! {
    static CALLBACK: RefCell<Option<js_sys::Function>> = const { RefCell::new(None) };
}

static LOGGER: HostLogger = HostLogger;
static INIT: Once = Once::new();

/// Install the logger once.  Safe to call on every entry point.
pub(crate) fn init() {
    INIT.call_once(|| {
        if log::set_logger(&LOGGER).is_ok() {
            log::set_max_level(LevelFilter::Info);
        }
    });
}

/// Route subsequent records to `callback`, or back to the console on `None`.
pub(crate) fn set_callback(callback: Option<js_sys::Function>) {
    CALLBACK.with(|slot| *slot.borrow_mut() = callback);
}

struct HostLogger;

impl Log for HostLogger {
    fn enabled(&self, metadata: &Metadata) -> bool {
        metadata.level() <= Level::Info
    }

    fn log(&self, record: &Record) {
        if !self.enabled(record.metadata()) {
            return;
        }
        let message = record.args().to_string();
        if message.trim().is_empty() {
            return;
        }
        let level = match record.level() {
            Level::Error => "error",
            Level::Warn => "warn",
            Level::Info => "info",
            Level::Debug | Level::Trace => "log",
        };
        let delivered = CALLBACK.with(|slot| match slot.borrow().as_ref() {
            Some(callback) => callback
                .call2(
                    &JsValue::NULL,
                    &JsValue::from_str(&message),
                    &JsValue::from_str(level),
                )
                .is_ok(),
            None => false,
        });
        if !delivered {
            web_sys::console::log_2(
                &JsValue::from_str(level),
                &JsValue::from_str(&message),
            );
        }
    }

    fn flush(&self) {}
}
