use std::collections::HashMap;
use std::future::pending;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use common_kafka::ChannelError;
use envconfig::Envconfig;
use rdkafka::consumer::{BaseConsumer, Consumer};
use rdkafka::{ClientConfig, Message, Offset, TopicPartitionList};
use time::OffsetDateTime;
use tracing::{Event, Level, Subscriber};
use tracing_subscriber::layer::{Context, SubscriberExt};
use tracing_subscriber::Layer;

use apc_test_data_generator::config::Config;
use apc_test_data_generator::error::Fault;
use apc_test_data_generator::lifecycle::{
    FaultReporter, Lifecycle, LifecycleContext, LifecycleState, ShutdownReport, ShutdownSignal,
    ShutdownTrigger, StepOutcome, STEP_CLOSE_CONNECTION, STEP_CLOSE_HEALTH, STEP_CLOSE_PRODUCER,
    STEP_FLUSH_PRODUCER, STEP_HEALTH_FAIL,
};
use apc_test_data_generator::message::OutboundMessage;
use apc_test_data_generator::resources::{
    Bootstrap, Connection, HealthCheck, KafkaBootstrap, Producer,
};
use tokio::sync::Notify;

// ---------------------------------------------------------------------------
// Fakes
//
// Every fake resource writes to one shared journal. A script picks the
// occurrence of a journal entry at which a call fails, panics or stalls.
// ---------------------------------------------------------------------------

type Occurrence = (&'static str, usize);

#[derive(Default)]
struct Script {
    fail_on: Vec<Occurrence>,
    panic_on: Option<Occurrence>,
    stall_on: Option<Occurrence>,
    background_fault: bool,
}

#[derive(Default)]
struct Fakes {
    journal: Mutex<Vec<String>>,
    script: Script,
    reporter: Mutex<Option<FaultReporter>>,
    stalled: Notify,
}

impl Fakes {
    fn with_script(script: Script) -> Arc<Self> {
        Arc::new(Self {
            script,
            ..Default::default()
        })
    }

    fn journal(&self) -> Vec<String> {
        self.journal.lock().unwrap().clone()
    }

    fn count(&self, event: &str) -> usize {
        self.journal().iter().filter(|entry| *entry == event).count()
    }

    fn record(&self, event: &str) -> usize {
        let mut journal = self.journal.lock().unwrap();
        journal.push(event.to_string());
        journal.iter().filter(|entry| *entry == event).count()
    }

    fn call(&self, event: &str) -> Result<(), Fault> {
        let occurrence = self.record(event);
        if let Some((name, n)) = self.script.panic_on {
            if name == event && n == occurrence {
                panic!("injected panic at {event}");
            }
        }
        if self
            .script
            .fail_on
            .iter()
            .any(|(name, n)| *name == event && *n == occurrence)
        {
            return Err(Fault::Connection(ChannelError::DeliveryCanceled));
        }
        Ok(())
    }

    async fn call_async(&self, event: &str) -> Result<(), Fault> {
        let occurrence = self.count(event) + 1;
        if let Some((name, n)) = self.script.stall_on {
            if name == event && n == occurrence {
                self.record(event);
                if self.script.background_fault {
                    if let Some(reporter) = self.reporter.lock().unwrap().as_ref() {
                        reporter.report("health check server stopped unexpectedly");
                    }
                }
                self.stalled.notify_one();
                pending::<()>().await;
            }
        }
        self.call(event)
    }
}

struct FakeBootstrap(Arc<Fakes>);

struct FakeHealthCheck(Arc<Fakes>);

struct FakeConnection(Arc<Fakes>);

struct FakeProducer(Arc<Fakes>);

#[async_trait]
impl Bootstrap for FakeBootstrap {
    fn load_config(&mut self) -> Result<(), Fault> {
        self.0.call("load config")
    }

    async fn start_health_check(
        &mut self,
        faults: FaultReporter,
    ) -> Result<Box<dyn HealthCheck>, Fault> {
        *self.0.reporter.lock().unwrap() = Some(faults);
        self.0.call_async("start health check").await?;
        Ok(Box::new(FakeHealthCheck(self.0.clone())))
    }

    async fn open_connection(&mut self) -> Result<Box<dyn Connection>, Fault> {
        self.0.call_async("open connection").await?;
        Ok(Box::new(FakeConnection(self.0.clone())))
    }
}

#[async_trait]
impl HealthCheck for FakeHealthCheck {
    fn set_ok(&self, ok: bool) -> Result<(), Fault> {
        self.0.call(&format!("health ok={ok}"))
    }

    async fn close(&self) -> Result<(), Fault> {
        self.0.call_async("health close").await
    }
}

#[async_trait]
impl Connection for FakeConnection {
    async fn create_producer(&self) -> Result<Box<dyn Producer>, Fault> {
        self.0.call_async("create producer").await?;
        Ok(Box::new(FakeProducer(self.0.clone())))
    }

    async fn close(&self) -> Result<(), Fault> {
        self.0.call_async("connection close").await
    }
}

#[async_trait]
impl Producer for FakeProducer {
    async fn send(&self, message: OutboundMessage) -> Result<(), Fault> {
        self.0
            .call_async(&format!("send {}", message.stop_sequence))
            .await
    }

    async fn flush(&self) -> Result<(), Fault> {
        self.0.call_async("flush").await
    }

    async fn close(&self) -> Result<(), Fault> {
        self.0.call_async("producer close").await
    }
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

const ALL_STEPS: [&str; 5] = [
    STEP_HEALTH_FAIL,
    STEP_FLUSH_PRODUCER,
    STEP_CLOSE_PRODUCER,
    STEP_CLOSE_CONNECTION,
    STEP_CLOSE_HEALTH,
];

fn startup_events() -> Vec<String> {
    [
        "load config",
        "start health check",
        "health ok=false",
        "open connection",
        "create producer",
        "health ok=true",
    ]
    .iter()
    .map(|event| event.to_string())
    .collect()
}

fn shutdown_events() -> Vec<String> {
    [
        "health ok=false",
        "flush",
        "producer close",
        "connection close",
        "health close",
    ]
    .iter()
    .map(|event| event.to_string())
    .collect()
}

fn sends(range: std::ops::RangeInclusive<u32>) -> Vec<String> {
    range.map(|seq| format!("send {seq}")).collect()
}

/// Health server on an ephemeral local port, no Prometheus recorder, plus `vars`.
fn local_config(vars: &[(&str, &str)]) -> Config {
    let defaults = [
        ("BIND_HOST", "127.0.0.1"),
        ("BIND_PORT", "0"),
        ("EXPORT_PROMETHEUS", "false"),
    ];
    let mut env: HashMap<String, String> = defaults
        .iter()
        .map(|(key, value)| (key.to_string(), value.to_string()))
        .collect();
    env.extend(
        vars.iter()
            .map(|(key, value)| (key.to_string(), value.to_string())),
    );
    Config::init_from_hashmap(&env).unwrap()
}

/// Counts error events emitted by the workspace crates.
#[derive(Clone, Default)]
struct ErrorEvents(Arc<AtomicUsize>);

impl ErrorEvents {
    fn count(&self) -> usize {
        self.0.load(Ordering::SeqCst)
    }
}

impl<S: Subscriber> Layer<S> for ErrorEvents {
    fn on_event(&self, event: &Event<'_>, _ctx: Context<'_, S>) {
        let metadata = event.metadata();
        let ours = ["apc_test_data_generator", "common_kafka", "health"]
            .iter()
            .any(|prefix| metadata.target().starts_with(prefix));
        if ours && *metadata.level() == Level::ERROR {
            self.0.fetch_add(1, Ordering::SeqCst);
        }
    }
}

async fn run_without_signal(fakes: &Arc<Fakes>) -> ShutdownReport {
    Lifecycle::new(FakeBootstrap(fakes.clone()))
        .run(pending::<ShutdownSignal>())
        .await
}

async fn run_with_signal_on_stall(
    fakes: &Arc<Fakes>,
    signal: ShutdownSignal,
) -> ShutdownReport {
    let waiter = fakes.clone();
    Lifecycle::new(FakeBootstrap(fakes.clone()))
        .run(async move {
            waiter.stalled.notified().await;
            signal
        })
        .await
}

// ---------------------------------------------------------------------------
// Completion and ordering
// ---------------------------------------------------------------------------

#[tokio::test]
async fn completes_and_releases_everything_in_order() {
    let fakes = Fakes::with_script(Script::default());
    let report = run_without_signal(&fakes).await;

    assert_eq!(report.exit_code, 0);
    assert!(report.cleanup.is_clean());
    for step in ALL_STEPS {
        assert_eq!(report.cleanup.outcome(step), Some(StepOutcome::Completed));
    }

    let mut expected = startup_events();
    expected.extend(sends(1..=8));
    expected.push("flush".to_string());
    expected.extend(shutdown_events());
    assert_eq!(fakes.journal(), expected);
}

// ---------------------------------------------------------------------------
// Shutdown totality: one failing step never prevents the others
// ---------------------------------------------------------------------------

#[tokio::test]
async fn a_single_failing_cleanup_step_leaves_the_others_running_once() {
    let cases = [
        (STEP_HEALTH_FAIL, ("health ok=false", 2)),
        (STEP_FLUSH_PRODUCER, ("flush", 2)),
        (STEP_CLOSE_PRODUCER, ("producer close", 1)),
        (STEP_CLOSE_CONNECTION, ("connection close", 1)),
        (STEP_CLOSE_HEALTH, ("health close", 1)),
    ];

    for (failing_step, occurrence) in cases {
        let fakes = Fakes::with_script(Script {
            fail_on: vec![occurrence],
            ..Default::default()
        });
        let report = run_without_signal(&fakes).await;

        assert_eq!(report.exit_code, 0, "cleanup faults must not change the exit code");
        assert_eq!(report.cleanup.failures(), 1);
        for step in ALL_STEPS {
            let expected = if step == failing_step {
                StepOutcome::Failed
            } else {
                StepOutcome::Completed
            };
            assert_eq!(report.cleanup.outcome(step), Some(expected), "step {step}");
        }

        let journal = fakes.journal();
        let shutdown = &journal[journal.len() - 5..];
        assert_eq!(shutdown, shutdown_events().as_slice());
        assert_eq!(fakes.count("producer close"), 1);
        assert_eq!(fakes.count("connection close"), 1);
        assert_eq!(fakes.count("health close"), 1);
    }
}

// ---------------------------------------------------------------------------
// Exit codes
// ---------------------------------------------------------------------------

#[tokio::test]
async fn signals_during_publish_exit_with_their_code() {
    let cases = [
        (ShutdownSignal::Interrupt, 130),
        (ShutdownSignal::Quit, 131),
        (ShutdownSignal::Terminate, 143),
    ];

    for (signal, code) in cases {
        let fakes = Fakes::with_script(Script {
            stall_on: Some(("send 3", 1)),
            ..Default::default()
        });
        let report = run_with_signal_on_stall(&fakes, signal).await;

        assert_eq!(report.exit_code, code);
        assert!(report.cleanup.is_clean());

        let mut expected = startup_events();
        expected.extend(sends(1..=3));
        expected.extend(shutdown_events());
        assert_eq!(fakes.journal(), expected);
    }
}

#[tokio::test]
async fn send_fault_exits_with_one_after_cleanup() {
    let fakes = Fakes::with_script(Script {
        fail_on: vec![("send 4", 1)],
        ..Default::default()
    });
    let report = run_without_signal(&fakes).await;

    assert_eq!(report.exit_code, 1);
    assert!(report.cleanup.is_clean());
    assert_eq!(fakes.count("send 5"), 0);
    // Only the shutdown flush ran.
    assert_eq!(fakes.count("flush"), 1);
}

#[tokio::test]
async fn panic_in_publish_is_a_fault() {
    let fakes = Fakes::with_script(Script {
        panic_on: Some(("send 2", 1)),
        ..Default::default()
    });
    let report = run_without_signal(&fakes).await;

    assert_eq!(report.exit_code, 1);
    assert!(report.cleanup.is_clean());
    assert_eq!(fakes.count("send 3"), 0);
    assert_eq!(fakes.count("producer close"), 1);
}

#[tokio::test]
async fn background_fault_interrupts_publish() {
    let fakes = Fakes::with_script(Script {
        stall_on: Some(("send 5", 1)),
        background_fault: true,
        ..Default::default()
    });
    let report = run_without_signal(&fakes).await;

    assert_eq!(report.exit_code, 1);
    assert!(report.cleanup.is_clean());
    assert_eq!(fakes.count("send 6"), 0);
    assert_eq!(fakes.count("health close"), 1);
}

// ---------------------------------------------------------------------------
// Startup failures release what was opened, and nothing else
// ---------------------------------------------------------------------------

#[tokio::test]
async fn startup_failure_releases_only_opened_resources() {
    use StepOutcome::{Completed, Skipped};

    let cases: [(Occurrence, [StepOutcome; 5]); 6] = [
        (("load config", 1), [Skipped, Skipped, Skipped, Skipped, Skipped]),
        (
            ("start health check", 1),
            [Skipped, Skipped, Skipped, Skipped, Skipped],
        ),
        (
            ("health ok=false", 1),
            [Completed, Skipped, Skipped, Skipped, Completed],
        ),
        (
            ("open connection", 1),
            [Completed, Skipped, Skipped, Skipped, Completed],
        ),
        (
            ("create producer", 1),
            [Completed, Skipped, Skipped, Completed, Completed],
        ),
        (
            ("health ok=true", 1),
            [Completed, Completed, Completed, Completed, Completed],
        ),
    ];

    for (occurrence, outcomes) in cases {
        let fakes = Fakes::with_script(Script {
            fail_on: vec![occurrence],
            ..Default::default()
        });
        let report = run_without_signal(&fakes).await;

        assert_eq!(report.exit_code, 1, "failure at {}", occurrence.0);
        assert_eq!(fakes.count("send 1"), 0);
        for (step, expected) in ALL_STEPS.iter().zip(outcomes) {
            assert_eq!(
                report.cleanup.outcome(step),
                Some(expected),
                "failure at {}, step {step}",
                occurrence.0
            );
        }
    }
}

#[tokio::test]
async fn invalid_configuration_exits_with_one() {
    let config = local_config(&[("KAFKA_COMPRESSION_CODEC", "brotli")]);

    let report = Lifecycle::new(KafkaBootstrap::with_config(config))
        .run(pending::<ShutdownSignal>())
        .await;

    assert_eq!(report.exit_code, 1);
    assert!(report
        .cleanup
        .steps
        .iter()
        .all(|(_, outcome)| *outcome == StepOutcome::Skipped));
}

#[tokio::test]
async fn signal_while_brokers_time_out_keeps_its_exit_code() {
    let config = local_config(&[
        ("KAFKA_HOSTS", "127.0.0.1:1"),
        ("KAFKA_METADATA_TIMEOUT_MS", "3000"),
    ]);

    let started = Instant::now();
    let report = Lifecycle::new(KafkaBootstrap::with_config(config))
        .run(async {
            tokio::time::sleep(Duration::from_millis(100)).await;
            ShutdownSignal::Terminate
        })
        .await;

    assert_eq!(report.exit_code, 143);
    assert!(started.elapsed() < Duration::from_secs(2));
    assert_eq!(
        report.cleanup.outcome(STEP_CLOSE_CONNECTION),
        Some(StepOutcome::Skipped)
    );
    assert_eq!(
        report.cleanup.outcome(STEP_CLOSE_HEALTH),
        Some(StepOutcome::Completed)
    );
}

// ---------------------------------------------------------------------------
// Fatal faults are logged once
// ---------------------------------------------------------------------------

#[tokio::test]
async fn publish_fault_is_logged_once() {
    let errors = ErrorEvents::default();
    let subscriber = tracing_subscriber::registry().with(errors.clone());
    let _guard = tracing::subscriber::set_default(subscriber);

    let fakes = Fakes::with_script(Script {
        fail_on: vec![("send 4", 1)],
        ..Default::default()
    });
    let report = run_without_signal(&fakes).await;

    assert_eq!(report.exit_code, 1);
    assert_eq!(errors.count(), 1);
}

#[tokio::test]
async fn unreachable_brokers_are_logged_once() {
    let errors = ErrorEvents::default();
    let subscriber = tracing_subscriber::registry().with(errors.clone());
    let _guard = tracing::subscriber::set_default(subscriber);

    let config = local_config(&[
        ("KAFKA_HOSTS", "127.0.0.1:1"),
        ("KAFKA_METADATA_TIMEOUT_MS", "500"),
    ]);
    let report = Lifecycle::new(KafkaBootstrap::with_config(config))
        .run(pending::<ShutdownSignal>())
        .await;

    assert_eq!(report.exit_code, 1);
    assert!(report.cleanup.is_clean());
    assert_eq!(errors.count(), 1);
}

// ---------------------------------------------------------------------------
// Shutdown gate
// ---------------------------------------------------------------------------

#[tokio::test]
async fn second_shutdown_is_ignored() {
    let fakes = Fakes::with_script(Script::default());
    let mut context = LifecycleContext::new();
    context.attach_health_check(Box::new(FakeHealthCheck(fakes.clone())));
    context.attach_connection(Box::new(FakeConnection(fakes.clone())));
    context.attach_producer(Box::new(FakeProducer(fakes.clone())));

    let first = context
        .shutdown(ShutdownTrigger::Signal(ShutdownSignal::Terminate))
        .await
        .unwrap();
    assert_eq!(first.exit_code, 143);
    assert_eq!(context.state(), LifecycleState::Exited);

    let second = context.shutdown(ShutdownTrigger::Completed).await;
    assert!(second.is_none());
    assert_eq!(context.state(), LifecycleState::Exited);
    assert_eq!(fakes.journal(), shutdown_events());
}

// ---------------------------------------------------------------------------
// End to end against a mock Kafka cluster
// ---------------------------------------------------------------------------

fn now_ms() -> i64 {
    i64::try_from(OffsetDateTime::now_utc().unix_timestamp_nanos() / 1_000_000).unwrap()
}

/// Every record on partition 0 of `topic`: key, JSON payload and record timestamp.
fn read_back(config: &Config, expected: usize) -> Vec<(String, serde_json::Value, i64)> {
    let consumer: BaseConsumer = ClientConfig::new()
        .set("bootstrap.servers", &config.kafka.kafka_hosts)
        .set("group.id", "lifecycle_tests")
        .create()
        .expect("failed to create consumer");
    let mut assignment = TopicPartitionList::new();
    assignment
        .add_partition_offset(&config.kafka.kafka_topic, 0, Offset::Beginning)
        .unwrap();
    consumer.assign(&assignment).unwrap();

    let deadline = Instant::now() + Duration::from_secs(10);
    let mut received = Vec::new();
    while received.len() < expected && Instant::now() < deadline {
        if let Some(Ok(message)) = consumer.poll(Duration::from_millis(200)) {
            received.push((
                String::from_utf8(message.key().unwrap().to_vec()).unwrap(),
                serde_json::from_slice(message.payload().unwrap()).unwrap(),
                message.timestamp().to_millis().unwrap(),
            ));
        }
    }
    received
}

#[tokio::test]
async fn publishes_fixture_to_mock_kafka() {
    let (_cluster, kafka) = common_kafka::test::create_mock_kafka("apc_test_data");
    let config = Config {
        host: "127.0.0.1".to_string(),
        port: 0,
        export_prometheus: false,
        kafka,
    };

    let before = now_ms();
    let report = Lifecycle::new(KafkaBootstrap::with_config(config.clone()))
        .run(pending::<ShutdownSignal>())
        .await;
    let after = now_ms();

    assert_eq!(report.exit_code, 0);
    assert!(report.cleanup.is_clean());
    for step in ALL_STEPS {
        assert_eq!(report.cleanup.outcome(step), Some(StepOutcome::Completed));
    }

    let records = read_back(&config, 8);
    assert_eq!(records.len(), 8);

    let sequences: Vec<u64> = records
        .iter()
        .map(|(_, payload, _)| payload["stopSequence"].as_u64().unwrap())
        .collect();
    assert_eq!(sequences, vec![1, 2, 3, 4, 5, 6, 7, 8]);

    for (key, payload, timestamp) in &records {
        assert_eq!(key, "Talvikausi_Ma-Pe_3_0_074500_075400_0");
        assert_eq!(payload["tripId"], *key);
        assert!(*timestamp >= before && *timestamp <= after, "{timestamp}");
    }

    let (_, empty_stop, _) = &records[5];
    assert_eq!(empty_stop["stopId"], "201285");
    assert_eq!(empty_stop["doorClassCounts"], serde_json::json!([]));
    assert_eq!(empty_stop["feedPublisherId"], "fi:kuopio");
    assert_eq!(empty_stop["directionId"], 0);
}
