//! Process lifecycle: start the resources, publish the fixture, and release
//! everything exactly once when the work completes, faults, or a signal arrives.

use std::any::Any;
use std::fmt;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicBool, Ordering};

use futures::FutureExt;
use tokio::sync::mpsc;
use tracing::{error, info, warn};

use crate::error::Fault;
use crate::metrics;
use crate::publish::publish_fixture;
use crate::resources::{Bootstrap, Connection, HealthCheck, Producer};

pub mod cleanup;
pub mod signals;

pub use self::cleanup::{run_best_effort, CleanupReport, CleanupStep, StepOutcome};

pub const STEP_HEALTH_FAIL: &str = "set health check to fail";
pub const STEP_FLUSH_PRODUCER: &str = "flush producer";
pub const STEP_CLOSE_PRODUCER: &str = "close producer";
pub const STEP_CLOSE_CONNECTION: &str = "close connection";
pub const STEP_CLOSE_HEALTH: &str = "close health check server";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LifecycleState {
    Initializing,
    HealthDegraded,
    Healthy,
    ShuttingDown,
    Exited,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShutdownSignal {
    Interrupt,
    Quit,
    Terminate,
}

impl ShutdownSignal {
    pub fn name(&self) -> &'static str {
        match self {
            ShutdownSignal::Interrupt => "SIGINT",
            ShutdownSignal::Quit => "SIGQUIT",
            ShutdownSignal::Terminate => "SIGTERM",
        }
    }

    /// 128 plus the signal number.
    pub fn exit_code(&self) -> u8 {
        match self {
            ShutdownSignal::Interrupt => 130,
            ShutdownSignal::Quit => 131,
            ShutdownSignal::Terminate => 143,
        }
    }
}

#[derive(Debug)]
pub enum ShutdownTrigger {
    Completed,
    Fault(Fault),
    Signal(ShutdownSignal),
}

impl ShutdownTrigger {
    pub fn exit_code(&self) -> u8 {
        match self {
            ShutdownTrigger::Completed => 0,
            ShutdownTrigger::Fault(_) => 1,
            ShutdownTrigger::Signal(signal) => signal.exit_code(),
        }
    }

    fn label(&self) -> &'static str {
        match self {
            ShutdownTrigger::Completed => "completed",
            ShutdownTrigger::Fault(_) => "fault",
            ShutdownTrigger::Signal(_) => "signal",
        }
    }
}

impl fmt::Display for ShutdownTrigger {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ShutdownTrigger::Completed => write!(f, "work completed"),
            ShutdownTrigger::Fault(fault) => write!(f, "{}", fault),
            ShutdownTrigger::Signal(signal) => write!(f, "received {}", signal.name()),
        }
    }
}

/// Lets tasks running outside the controller escalate a fault.
#[derive(Clone)]
pub struct FaultReporter {
    sender: mpsc::UnboundedSender<String>,
}

impl FaultReporter {
    pub fn report(&self, reason: impl Into<String>) {
        // The receiver lives as long as the controller.
        drop(self.sender.send(reason.into()));
    }
}

pub(crate) fn fault_channel() -> (FaultReporter, mpsc::UnboundedReceiver<String>) {
    let (sender, faults) = mpsc::unbounded_channel();
    (FaultReporter { sender }, faults)
}

/// One-shot gate: only the first caller of `try_begin` gets `true`.
#[derive(Debug, Default)]
pub struct ShutdownGate {
    started: AtomicBool,
}

impl ShutdownGate {
    pub fn try_begin(&self) -> bool {
        !self.started.swap(true, Ordering::SeqCst)
    }

    pub fn is_started(&self) -> bool {
        self.started.load(Ordering::SeqCst)
    }
}

#[derive(Debug)]
pub struct ShutdownReport {
    pub exit_code: u8,
    pub cleanup: CleanupReport,
}

/// The resource handles opened so far, the current state, and the shutdown gate.
pub struct LifecycleContext {
    health_check: Option<Box<dyn HealthCheck>>,
    connection: Option<Box<dyn Connection>>,
    producer: Option<Box<dyn Producer>>,
    state: LifecycleState,
    gate: ShutdownGate,
}

impl Default for LifecycleContext {
    fn default() -> Self {
        Self::new()
    }
}

impl LifecycleContext {
    pub fn new() -> Self {
        Self {
            health_check: None,
            connection: None,
            producer: None,
            state: LifecycleState::Initializing,
            gate: ShutdownGate::default(),
        }
    }

    pub fn state(&self) -> LifecycleState {
        self.state
    }

    pub fn attach_health_check(
        &mut self,
        health_check: Box<dyn HealthCheck>,
    ) -> &dyn HealthCheck {
        &**self.health_check.insert(health_check)
    }

    pub fn attach_connection(&mut self, connection: Box<dyn Connection>) -> &dyn Connection {
        &**self.connection.insert(connection)
    }

    pub fn attach_producer(&mut self, producer: Box<dyn Producer>) -> &dyn Producer {
        &**self.producer.insert(producer)
    }

    /// Run the cleanup sequence for `trigger`. Returns `None` when shutdown
    /// already started; the first trigger's exit code stands.
    pub async fn shutdown(&mut self, trigger: ShutdownTrigger) -> Option<ShutdownReport> {
        if !self.gate.try_begin() {
            warn!(trigger = %trigger, "shutdown already in progress, ignoring trigger");
            return None;
        }

        match &trigger {
            ShutdownTrigger::Fault(fault) => error!("fatal fault, shutting down: {}", fault),
            other => info!(trigger = %other, "shutting down"),
        }
        metrics::emit_shutdown_initiated(trigger.label());
        self.state = LifecycleState::ShuttingDown;

        let health_check = self.health_check.take();
        let producer = self.producer.take();
        let connection = self.connection.take();

        let health_ref = health_check.as_deref();
        let producer_ref = producer.as_deref();
        let connection_ref = connection.as_deref();

        let steps = vec![
            CleanupStep::new(
                STEP_HEALTH_FAIL,
                health_ref.map(|health| async move { health.set_ok(false) }.boxed()),
            ),
            CleanupStep::new(STEP_FLUSH_PRODUCER, producer_ref.map(|p| p.flush())),
            CleanupStep::new(STEP_CLOSE_PRODUCER, producer_ref.map(|p| p.close())),
            CleanupStep::new(STEP_CLOSE_CONNECTION, connection_ref.map(|c| c.close())),
            CleanupStep::new(STEP_CLOSE_HEALTH, health_ref.map(|health| health.close())),
        ];
        let cleanup = run_best_effort(steps).await;

        drop(producer);
        drop(connection);
        drop(health_check);

        let exit_code = trigger.exit_code();
        info!(
            exit_code,
            failed_steps = cleanup.failures(),
            "shutdown finished"
        );
        self.state = LifecycleState::Exited;

        Some(ShutdownReport { exit_code, cleanup })
    }
}

/// Drives a [`Bootstrap`] from startup to exit.
pub struct Lifecycle<B> {
    bootstrap: B,
    context: LifecycleContext,
    faults: mpsc::UnboundedReceiver<String>,
    reporter: FaultReporter,
}

impl<B: Bootstrap> Lifecycle<B> {
    pub fn new(bootstrap: B) -> Self {
        let (reporter, faults) = fault_channel();
        Self {
            bootstrap,
            context: LifecycleContext::new(),
            faults,
            reporter,
        }
    }

    pub fn fault_reporter(&self) -> FaultReporter {
        self.reporter.clone()
    }

    /// Start up and publish, racing the work against `signal` and background
    /// faults, then shut down with whichever finished first.
    pub async fn run<S>(mut self, signal: S) -> ShutdownReport
    where
        S: Future<Output = ShutdownSignal>,
    {
        let trigger = {
            let work = AssertUnwindSafe(start_and_publish(
                &mut self.bootstrap,
                &mut self.context,
                self.reporter.clone(),
            ))
            .catch_unwind();

            tokio::select! {
                biased;
                received = signal => ShutdownTrigger::Signal(received),
                Some(reason) = self.faults.recv() => {
                    ShutdownTrigger::Fault(Fault::Background(reason))
                }
                outcome = work => match outcome {
                    Ok(Ok(_)) => ShutdownTrigger::Completed,
                    Ok(Err(fault)) => ShutdownTrigger::Fault(fault),
                    Err(panic) => {
                        ShutdownTrigger::Fault(Fault::Panic(panic_message(panic.as_ref())))
                    }
                },
            }
        };

        let exit_code = trigger.exit_code();
        match self.context.shutdown(trigger).await {
            Some(report) => report,
            None => ShutdownReport {
                exit_code,
                cleanup: CleanupReport::default(),
            },
        }
    }
}

async fn start_and_publish<B: Bootstrap>(
    bootstrap: &mut B,
    context: &mut LifecycleContext,
    faults: FaultReporter,
) -> Result<usize, Fault> {
    bootstrap.load_config()?;

    let health_check = bootstrap.start_health_check(faults).await?;
    context.attach_health_check(health_check).set_ok(false)?;
    context.state = LifecycleState::HealthDegraded;
    info!("health check started");

    let connection = bootstrap.open_connection().await?;
    let producer = context
        .attach_connection(connection)
        .create_producer()
        .await?;
    context.attach_producer(producer);
    info!("connected to message channel");

    if let Some(health_check) = &context.health_check {
        health_check.set_ok(true)?;
    }
    context.state = LifecycleState::Healthy;

    match &context.producer {
        Some(producer) => publish_fixture(&**producer).await,
        None => Ok(0),
    }
}

pub(crate) fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(message) = panic.downcast_ref::<&str>() {
        message.to_string()
    } else if let Some(message) = panic.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic payload".to_string()
    }
}
