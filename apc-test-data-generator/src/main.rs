use std::process::ExitCode;

use tracing::level_filters::LevelFilter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Layer};

use apc_test_data_generator::lifecycle::signals::wait_for_shutdown_signal;
use apc_test_data_generator::lifecycle::Lifecycle;
use apc_test_data_generator::resources::KafkaBootstrap;

#[tokio::main]
async fn main() -> ExitCode {
    // stdout with a level configured by the RUST_LOG envvar (default=INFO)
    let log_layer = tracing_subscriber::fmt::layer().with_filter(
        EnvFilter::builder()
            .with_default_directive(LevelFilter::INFO.into())
            .from_env_lossy(),
    );
    tracing_subscriber::registry().with(log_layer).init();

    let report = Lifecycle::new(KafkaBootstrap::new())
        .run(wait_for_shutdown_signal())
        .await;

    tracing::info!(exit_code = report.exit_code, "Exit process");
    ExitCode::from(report.exit_code)
}
