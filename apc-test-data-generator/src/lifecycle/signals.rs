use std::future::pending;

use tokio::signal::unix::{signal, Signal, SignalKind};
use tracing::{error, info};

use super::ShutdownSignal;

fn install(kind: SignalKind, name: &str) -> Option<Signal> {
    match signal(kind) {
        Ok(stream) => Some(stream),
        Err(err) => {
            error!("failed to install {} handler: {}", name, err);
            None
        }
    }
}

async fn recv(stream: &mut Option<Signal>) {
    match stream {
        Some(stream) => {
            if stream.recv().await.is_none() {
                pending::<()>().await;
            }
        }
        None => pending::<()>().await,
    }
}

/// Resolves with the first of SIGINT, SIGQUIT or SIGTERM. A signal whose
/// handler cannot be installed never fires.
pub async fn wait_for_shutdown_signal() -> ShutdownSignal {
    let mut interrupt = install(SignalKind::interrupt(), "SIGINT");
    let mut quit = install(SignalKind::quit(), "SIGQUIT");
    let mut terminate = install(SignalKind::terminate(), "SIGTERM");

    let received = tokio::select! {
        _ = recv(&mut interrupt) => ShutdownSignal::Interrupt,
        _ = recv(&mut quit) => ShutdownSignal::Quit,
        _ = recv(&mut terminate) => ShutdownSignal::Terminate,
    };
    info!("received {}", received.name());
    received
}
