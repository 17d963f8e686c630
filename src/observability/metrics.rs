//! Metrics collection.
//!
//! # Metrics
//! - `options_store_saves_total` (counter): saves by result
//! - `options_store_loads_total` (counter): loads by outcome
//! - `options_store_lock_degraded_total` (counter): operations that ran unlocked
//! - `options_store_validation_failures_total` (counter): loaded values replaced by defaults
//! - `options_store_callback_failures_total` (counter): rolled-back changes
//! - `options_store_saves_coalesced_total` (counter): save requests merged into a pending one
//!
//! # Design Decisions
//! - Low-overhead metric updates (atomic operations)
//! - No exporter here; the host decides how to expose them

use metrics::counter;

pub fn record_save(ok: bool) {
    let result = if ok { "ok" } else { "error" };
    counter!("options_store_saves_total", "result" => result).increment(1);
}

pub fn record_load(outcome: &'static str) {
    counter!("options_store_loads_total", "outcome" => outcome).increment(1);
}

pub fn record_lock_degraded(mode: &'static str) {
    counter!("options_store_lock_degraded_total", "mode" => mode).increment(1);
}

pub fn record_validation_failure() {
    counter!("options_store_validation_failures_total").increment(1);
}

pub fn record_callback_failure() {
    counter!("options_store_callback_failures_total").increment(1);
}

pub fn record_save_coalesced() {
    counter!("options_store_saves_coalesced_total").increment(1);
}
