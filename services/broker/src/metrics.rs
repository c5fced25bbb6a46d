//! Prometheus metrics exposition
//!
//! - `broker_messages_total` (counter): label `action`
//! - `broker_messages_dropped_total` (counter): label `reason`
//! - `broker_logins_total` (counter): label `outcome`

use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};

/// Install the Prometheus recorder and return a handle for rendering.
///
/// The handle's `render()` output is the Prometheus text exposition format
/// served on `/metrics`.
pub fn install_recorder() -> anyhow::Result<PrometheusHandle> {
    Ok(PrometheusBuilder::new().install_recorder()?)
}

/// Record a dispatched cross-frame message by action name.
pub fn record_message(action: &str) {
    metrics::counter!("broker_messages_total", "action" => action.to_string()).increment(1);
}

/// Record a message dropped before dispatch (invalid or unknown).
pub fn record_dropped(reason: &str) {
    metrics::counter!("broker_messages_dropped_total", "reason" => reason.to_string()).increment(1);
}

/// Record a broker login attempt outcome.
pub fn record_login(outcome: &str) {
    metrics::counter!("broker_logins_total", "outcome" => outcome.to_string()).increment(1);
}
