use std::time::Duration;

use metrics_exporter_prometheus::{BuildError, PrometheusBuilder, PrometheusHandle};

pub const METRIC_MESSAGES_SENT: &str = "apc_generator_messages_sent_total";
pub const METRIC_SEND_DURATION: &str = "apc_generator_send_duration_seconds";
pub const METRIC_SHUTDOWN_INITIATED: &str = "apc_generator_shutdown_initiated_total";
pub const METRIC_SHUTDOWN_STEP: &str = "apc_generator_shutdown_step_total";

pub fn setup_metrics_recorder() -> Result<PrometheusHandle, BuildError> {
    const EXPONENTIAL_SECONDS: &[f64] = &[
        0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0,
    ];

    PrometheusBuilder::new()
        .set_buckets(EXPONENTIAL_SECONDS)?
        .install_recorder()
}

pub(crate) fn emit_message_sent(duration: Duration) {
    metrics::counter!(METRIC_MESSAGES_SENT).increment(1);
    metrics::histogram!(METRIC_SEND_DURATION).record(duration.as_secs_f64());
}

pub(crate) fn emit_shutdown_initiated(trigger: &'static str) {
    metrics::counter!(METRIC_SHUTDOWN_INITIATED, "trigger" => trigger).increment(1);
}

pub(crate) fn emit_shutdown_step(step: &'static str, outcome: &'static str) {
    metrics::counter!(
        METRIC_SHUTDOWN_STEP,
        "step" => step,
        "outcome" => outcome
    )
    .increment(1);
}
