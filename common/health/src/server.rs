use std::future::Future;
use std::net::SocketAddr;

use axum::extract::State;
use axum::{routing, Router};
use metrics_exporter_prometheus::PrometheusHandle;
use tokio::net::TcpListener;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::{HealthRegistry, HealthServerError, HealthStatus};

/// Liveness and readiness routes served by the health check server.
///
/// `/_health`, `/_readiness` and `/healthz` share the readiness registry,
/// `/_liveness` only tells that the process answers HTTP.
pub fn router(
    service_name: &'static str,
    readiness: HealthRegistry,
    metrics: Option<PrometheusHandle>,
) -> Router {
    Router::new()
        .route("/", routing::get(move || std::future::ready(service_name)))
        .route("/_health", routing::get(readiness_check))
        .route("/_readiness", routing::get(readiness_check))
        .route("/healthz", routing::get(readiness_check))
        .route("/_liveness", routing::get(|| std::future::ready("ok")))
        .route(
            "/metrics",
            routing::get(move || match metrics {
                Some(ref recorder_handle) => std::future::ready(recorder_handle.render()),
                None => std::future::ready("no metrics recorder installed".to_owned()),
            }),
        )
        .with_state(readiness)
}

async fn readiness_check(State(registry): State<HealthRegistry>) -> HealthStatus {
    registry.get_status()
}

/// A running health check HTTP server.
pub struct HealthServer {
    local_addr: SocketAddr,
    shutdown: CancellationToken,
    failed: CancellationToken,
    task: JoinHandle<Result<(), HealthServerError>>,
}

impl HealthServer {
    /// Bind on `bind` and serve `app` on a background task. Returns once the
    /// listener accepts connections.
    pub async fn start(bind: &str, app: Router) -> Result<Self, HealthServerError> {
        let listener = TcpListener::bind(bind)
            .await
            .map_err(HealthServerError::Bind)?;
        let local_addr = listener.local_addr().map_err(HealthServerError::Bind)?;
        info!("health check server listening on {}", local_addr);

        let shutdown = CancellationToken::new();
        let failed = CancellationToken::new();

        let graceful = shutdown.clone();
        let on_failure = failed.clone();
        let task = tokio::spawn(async move {
            let result = axum::serve(listener, app)
                .with_graceful_shutdown(async move { graceful.cancelled().await })
                .await;
            if let Err(err) = result {
                warn!("health check server stopped: {}", err);
                on_failure.cancel();
                return Err(HealthServerError::Serve(err));
            }
            Ok(())
        });

        Ok(Self {
            local_addr,
            shutdown,
            failed,
            task,
        })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Resolves if the server task stops on an error before `close` was called.
    /// Never resolves after a clean close.
    pub fn failed(&self) -> impl Future<Output = ()> + Send + 'static {
        let token = self.failed.clone();
        async move { token.cancelled().await }
    }

    /// Stop accepting connections, let in-flight requests finish, and wait for the
    /// server task to exit.
    pub async fn close(self) -> Result<(), HealthServerError> {
        self.shutdown.cancel();
        self.task.await?
    }
}
