//! Trust-core metrics for observability
//!
//! Enable with the `metrics` feature flag. Requires a `metrics` recorder to
//! be installed (e.g. via `metrics-exporter-prometheus`). Adapted from the
//! teacher's `auth_metrics.rs`: same describe-once-then-record shape, new
//! metric names for the sign/verify/guard/device/audit paths this crate
//! actually has.
//!
//! ## Metrics provided
//!
//! - `trust_core_jwt_sign_total` — counter, labels: `status`
//! - `trust_core_jwt_verify_total` — counter, labels: `status` (`ok`, `replay`, `invalid`)
//! - `trust_core_permission_checks_total` — counter, labels: `result` (`allow`, `deny`)
//! - `trust_core_device_exchanges_total` — counter, labels: `status` (`registered`, `rotated`, `denied`)
//! - `trust_core_audit_dropped_total` — counter, no labels
//! - `trust_core_jwt_verify_duration_seconds` — histogram

#[cfg(feature = "metrics")]
use metrics::{counter, describe_counter, describe_histogram, histogram};

#[cfg(feature = "metrics")]
use std::sync::Once;

#[cfg(feature = "metrics")]
static INIT: Once = Once::new();

/// Initialize metric descriptions. Call once at startup; idempotent.
#[cfg(feature = "metrics")]
pub fn init_metrics() {
    INIT.call_once(|| {
        describe_counter!("trust_core_jwt_sign_total", "Total JWT sign attempts");
        describe_counter!("trust_core_jwt_verify_total", "Total JWT verify attempts");
        describe_counter!("trust_core_permission_checks_total", "Total permission guard checks");
        describe_counter!("trust_core_device_exchanges_total", "Total device key exchanges");
        describe_counter!("trust_core_audit_dropped_total", "Audit events dropped by the dispatcher");
        describe_histogram!(
            "trust_core_jwt_verify_duration_seconds",
            "JWT verify duration in seconds"
        );
    });
}

#[cfg(feature = "metrics")]
pub(crate) fn record_jwt_sign(success: bool) {
    let status = if success { "success" } else { "failure" };
    counter!("trust_core_jwt_sign_total", "status" => status).increment(1);
}

#[cfg(feature = "metrics")]
pub(crate) fn record_jwt_verify(status: &'static str) {
    counter!("trust_core_jwt_verify_total", "status" => status).increment(1);
}

#[cfg(feature = "metrics")]
pub(crate) fn record_jwt_verify_duration(duration_seconds: f64) {
    histogram!("trust_core_jwt_verify_duration_seconds").record(duration_seconds);
}

#[cfg(feature = "metrics")]
pub(crate) fn record_permission_check(allowed: bool) {
    let result = if allowed { "allow" } else { "deny" };
    counter!("trust_core_permission_checks_total", "result" => result).increment(1);
}

#[cfg(feature = "metrics")]
pub(crate) fn record_device_exchange(status: &'static str) {
    counter!("trust_core_device_exchanges_total", "status" => status).increment(1);
}

#[cfg(feature = "metrics")]
pub(crate) fn record_audit_dropped() {
    counter!("trust_core_audit_dropped_total").increment(1);
}

#[cfg(not(feature = "metrics"))]
#[allow(missing_docs)]
pub fn init_metrics() {}

#[cfg(not(feature = "metrics"))]
pub(crate) fn record_jwt_sign(_success: bool) {}

#[cfg(not(feature = "metrics"))]
pub(crate) fn record_jwt_verify(_status: &'static str) {}

#[cfg(not(feature = "metrics"))]
pub(crate) fn record_jwt_verify_duration(_duration_seconds: f64) {}

#[cfg(not(feature = "metrics"))]
pub(crate) fn record_permission_check(_allowed: bool) {}

#[cfg(not(feature = "metrics"))]
pub(crate) fn record_device_exchange(_status: &'static str) {}

#[cfg(not(feature = "metrics"))]
pub(crate) fn record_audit_dropped() {}
