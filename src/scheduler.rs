//! The forwarding loop.
//!
//! One [`Scheduler`] owns all mutable forwarder state. Each iteration runs a
//! remote cycle, then a local cycle when its interval has elapsed, then sleeps.
//! Source and delivery errors are logged and counted here; anything else that
//! escapes a cycle (a panic) is caught at the iteration boundary and followed
//! by a fixed backoff. Shutdown is only observed while sleeping.

use crate::config::Config;
use crate::error::CycleError;
use crate::format::EventFormatter;
use crate::sink::Sink;
use crate::source::Source;
use futures::FutureExt;
use serde::Serialize;
use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::time::Duration;
use tokio::sync::watch;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Pause after a cycle aborted unexpectedly
pub const BACKOFF: Duration = Duration::from_secs(1);

/// What the loop is doing right now
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    #[default]
    Idle,
    CollectingRemote,
    Delivering,
    CollectingLocal,
    Sleeping,
    Backoff,
}

/// Monotonic forwarder counters
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct Counters {
    /// Samples returned by any source
    pub metrics_collected: u64,
    /// Events accepted by the sink
    pub metrics_sent: u64,
    /// Events the sink did not accept
    pub errors: u64,
    /// Iterations completed, including aborted ones
    pub cycles: u64,
    /// Iterations aborted by a panic
    pub cycle_failures: u64,
}

/// Result of draining one source through the formatter and sink
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct CycleReport {
    pub collected: u64,
    pub sent: u64,
    pub failed: u64,
    pub source_failures: u64,
}

impl CycleReport {
    pub fn is_clean(&self) -> bool {
        self.failed == 0 && self.source_failures == 0
    }
}

/// Result of one loop iteration
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct IterationReport {
    pub remote: CycleReport,
    /// Present only when the local cycle was due and ran
    pub local: Option<CycleReport>,
}

impl IterationReport {
    pub fn is_clean(&self) -> bool {
        self.remote.is_clean() && self.local.as_ref().map_or(true, CycleReport::is_clean)
    }
}

/// Published after every iteration for the status endpoint
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct StatsSnapshot {
    pub counters: Counters,
    pub phase: Phase,
    pub last_iteration: Option<IterationReport>,
    /// Wall-clock time of the last published iteration, RFC 3339
    pub updated_at: Option<String>,
}

/// Forwarder state, mutated only by the scheduler
#[derive(Debug)]
pub struct ForwarderState {
    pub counters: Counters,
    /// Start of the most recent local cycle
    pub last_system_collection: Option<Instant>,
    pub phase: Phase,
    config: Config,
}

impl ForwarderState {
    pub fn new(config: Config) -> Self {
        Self { counters: Counters::default(), last_system_collection: None, phase: Phase::Idle, config }
    }

    pub fn config(&self) -> &Config {
        &self.config
    }
}

pub struct Scheduler {
    state: ForwarderState,
    remote: Box<dyn Source>,
    local: Option<Box<dyn Source>>,
    formatter: EventFormatter,
    sink: Box<dyn Sink>,
    stats: watch::Sender<StatsSnapshot>,
    last_iteration: Option<IterationReport>,
}

impl Scheduler {
    /// `local` is only polled when given; `config` must already be validated.
    pub fn new(
        config: Config,
        remote: Box<dyn Source>,
        local: Option<Box<dyn Source>>,
        formatter: EventFormatter,
        sink: Box<dyn Sink>,
    ) -> Self {
        let (stats, _) = watch::channel(StatsSnapshot::default());
        Self {
            state: ForwarderState::new(config),
            remote,
            local,
            formatter,
            sink,
            stats,
            last_iteration: None,
        }
    }

    pub fn counters(&self) -> &Counters {
        &self.state.counters
    }

    /// Receive a snapshot after every iteration
    pub fn subscribe(&self) -> watch::Receiver<StatsSnapshot> {
        self.stats.subscribe()
    }

    /// Loop until `shutdown` is cancelled, then return the final counters
    pub async fn run(mut self, shutdown: CancellationToken) -> Counters {
        let config = self.state.config();
        info!(
            interval_secs = config.interval.as_secs(),
            local_stats = self.local.is_some(),
            local_stats_interval_secs = config.local_stats_interval.as_secs(),
            targets = config.targets.len(),
            "Starting forwarder"
        );

        loop {
            let pause = match self.run_iteration().await {
                Ok(report) => {
                    debug!(?report, "Iteration complete");
                    self.last_iteration = Some(report);
                    self.state.phase = Phase::Sleeping;
                    self.state.config().interval
                }
                Err(e) => {
                    error!(error = %e, backoff_secs = BACKOFF.as_secs(), "Error in forwarding loop");
                    self.state.phase = Phase::Backoff;
                    BACKOFF
                }
            };
            self.publish();

            tokio::select! {
                biased;
                _ = shutdown.cancelled() => break,
                _ = tokio::time::sleep(pause) => {}
            }
        }

        self.state.phase = Phase::Idle;
        self.publish();
        let counters = self.state.counters.clone();
        info!(
            collected = counters.metrics_collected,
            sent = counters.metrics_sent,
            errors = counters.errors,
            cycles = counters.cycles,
            "Forwarder stopped"
        );
        counters
    }

    /// One remote cycle plus the local cycle if due. Panics are contained here.
    pub async fn run_iteration(&mut self) -> Result<IterationReport, CycleError> {
        let outcome = AssertUnwindSafe(self.iterate(Instant::now())).catch_unwind().await;
        self.state.counters.cycles += 1;
        outcome.map_err(|payload| {
            self.state.counters.cycle_failures += 1;
            CycleError::Panicked(panic_message(payload.as_ref()))
        })
    }

    /// Whether the local cycle should run at `now`
    pub fn local_due(&self, now: Instant) -> bool {
        if self.local.is_none() {
            return false;
        }
        match self.state.last_system_collection {
            None => true,
            Some(last) => now.saturating_duration_since(last) >= self.state.config().local_stats_interval,
        }
    }

    async fn iterate(&mut self, now: Instant) -> IterationReport {
        self.state.phase = Phase::CollectingRemote;
        let remote =
            drain_source(self.remote.as_mut(), &self.formatter, self.sink.as_ref(), &mut self.state)
                .await;

        let mut local_report = None;
        if self.local_due(now) {
            if let Some(local) = self.local.as_deref_mut() {
                self.state.phase = Phase::CollectingLocal;
                let report =
                    drain_source(local, &self.formatter, self.sink.as_ref(), &mut self.state).await;
                self.state.last_system_collection = Some(now);
                local_report = Some(report);
            }
        }

        IterationReport { remote, local: local_report }
    }

    fn publish(&self) {
        let snapshot = StatsSnapshot {
            counters: self.state.counters.clone(),
            phase: self.state.phase,
            last_iteration: self.last_iteration.clone(),
            updated_at: Some(chrono::Utc::now().to_rfc3339_opts(chrono::SecondsFormat::Millis, true)),
        };
        // No receivers is fine
        self.stats.send_replace(snapshot);
    }
}

/// Collect from one source and push every sample through formatter and sink
async fn drain_source(
    source: &mut dyn Source,
    formatter: &EventFormatter,
    sink: &dyn Sink,
    state: &mut ForwarderState,
) -> CycleReport {
    let collection = source.collect().await;
    let mut report = CycleReport {
        collected: collection.samples.len() as u64,
        source_failures: collection.failures.len() as u64,
        ..Default::default()
    };

    for failure in &collection.failures {
        error!(source = source.name(), error = %failure, "Failed to collect metrics");
    }

    state.counters.metrics_collected += report.collected;
    if collection.samples.is_empty() {
        return report;
    }

    state.phase = Phase::Delivering;
    let kind = source.kind();
    for sample in &collection.samples {
        let event = formatter.format(sample, kind);
        match sink.deliver(&event).await {
            Ok(()) => {
                state.counters.metrics_sent += 1;
                report.sent += 1;
            }
            Err(e) => {
                state.counters.errors += 1;
                report.failed += 1;
                warn!(metric = %event.metric_name, error = %e, "Failed to deliver event");
            }
        }
    }

    report
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::LogLevel;
    use crate::error::{DeliveryError, SourceError};
    use crate::format::FormattedEvent;
    use crate::host::HostInfo;
    use crate::sample::{RawSample, SourceKind};
    use crate::source::Collection;
    use async_trait::async_trait;
    use reqwest::Url;
    use std::sync::atomic::{AtomicU64, Ordering};
    use std::sync::Arc;

    fn config(local_stats_interval: u64) -> Config {
        Config {
            remote_url: Url::parse("http://remote/metrics").unwrap(),
            sink_url: Url::parse("http://sink/").unwrap(),
            interval: Duration::from_secs(1),
            timeout: Duration::from_secs(5),
            enable_local_stats: true,
            local_stats_interval: Duration::from_secs(local_stats_interval),
            targets: Vec::new(),
            log_level: LogLevel::Info,
            status_addr: None,
        }
    }

    fn formatter() -> EventFormatter {
        EventFormatter::new(HostInfo {
            hostname: "test".into(),
            architecture: "x86_64".into(),
            platform: "Linux".into(),
            release: "6.0".into(),
        })
    }

    struct FixedSource {
        kind: SourceKind,
        count: usize,
        calls: Arc<AtomicU64>,
    }

    #[async_trait]
    impl Source for FixedSource {
        fn kind(&self) -> SourceKind {
            self.kind
        }
        fn name(&self) -> &str {
            "fixed"
        }
        async fn collect(&mut self) -> Collection {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Collection::ok((0..self.count).map(|i| RawSample::new(format!("m{i}"), 1.0, 0)).collect())
        }
    }

    struct FailingSource;

    #[async_trait]
    impl Source for FailingSource {
        fn kind(&self) -> SourceKind {
            SourceKind::Prometheus
        }
        fn name(&self) -> &str {
            "failing"
        }
        async fn collect(&mut self) -> Collection {
            Collection::failed(SourceError::Status { url: "http://remote".into(), status: 503 })
        }
    }

    struct PanickingSource;

    #[async_trait]
    impl Source for PanickingSource {
        fn kind(&self) -> SourceKind {
            SourceKind::Prometheus
        }
        fn name(&self) -> &str {
            "panicking"
        }
        async fn collect(&mut self) -> Collection {
            panic!("exporter returned nonsense")
        }
    }

    /// Accepts every `accept_every`th event, rejects the rest with a 500
    struct CountingSink {
        accept_every: u64,
        seen: AtomicU64,
        kinds: std::sync::Mutex<Vec<SourceKind>>,
    }

    impl CountingSink {
        fn accepting() -> Self {
            Self::every(1)
        }
        fn every(n: u64) -> Self {
            Self { accept_every: n, seen: AtomicU64::new(0), kinds: Default::default() }
        }
    }

    #[async_trait]
    impl Sink for CountingSink {
        async fn deliver(&self, event: &FormattedEvent) -> Result<(), DeliveryError> {
            self.kinds.lock().unwrap().push(event.kind);
            let n = self.seen.fetch_add(1, Ordering::SeqCst) + 1;
            if n % self.accept_every == 0 {
                Ok(())
            } else {
                Err(DeliveryError::UnexpectedStatus(500))
            }
        }
    }

    fn fixed(count: usize, kind: SourceKind) -> (Box<dyn Source>, Arc<AtomicU64>) {
        let calls = Arc::new(AtomicU64::new(0));
        (Box::new(FixedSource { kind, count, calls: calls.clone() }), calls)
    }

    #[tokio::test]
    async fn counts_collected_sent_and_errors() {
        let (remote, _) = fixed(4, SourceKind::Prometheus);
        let mut scheduler = Scheduler::new(
            config(300),
            remote,
            None,
            formatter(),
            Box::new(CountingSink::every(2)),
        );

        let report = scheduler.run_iteration().await.unwrap();
        assert_eq!(report.remote, CycleReport { collected: 4, sent: 2, failed: 2, source_failures: 0 });
        assert!(report.local.is_none());
        assert!(!report.is_clean());

        let c = scheduler.counters();
        assert_eq!((c.metrics_collected, c.metrics_sent, c.errors, c.cycles), (4, 2, 2, 1));
    }

    #[tokio::test]
    async fn source_failure_counts_nothing_delivered() {
        let mut scheduler = Scheduler::new(
            config(300),
            Box::new(FailingSource),
            None,
            formatter(),
            Box::new(CountingSink::accepting()),
        );
        let report = scheduler.run_iteration().await.unwrap();
        assert_eq!(report.remote.source_failures, 1);
        assert_eq!(scheduler.counters().metrics_collected, 0);
        assert_eq!(scheduler.counters().errors, 0);
    }

    #[tokio::test]
    async fn panics_become_cycle_errors() {
        let mut scheduler = Scheduler::new(
            config(300),
            Box::new(PanickingSource),
            None,
            formatter(),
            Box::new(CountingSink::accepting()),
        );
        let err = scheduler.run_iteration().await.unwrap_err();
        assert_eq!(err, CycleError::Panicked("exporter returned nonsense".into()));
        assert_eq!(scheduler.counters().cycle_failures, 1);

        // Still usable afterwards
        assert!(scheduler.run_iteration().await.is_err());
        assert_eq!(scheduler.counters().cycles, 2);
    }

    /// Panics on every second call, otherwise returns one sample
    struct FlakySource {
        calls: u64,
    }

    #[async_trait]
    impl Source for FlakySource {
        fn kind(&self) -> SourceKind {
            SourceKind::Prometheus
        }
        fn name(&self) -> &str {
            "flaky"
        }
        async fn collect(&mut self) -> Collection {
            self.calls += 1;
            if self.calls % 2 == 0 {
                panic!("second call");
            }
            Collection::ok(vec![RawSample::new("up", 1.0, 0)])
        }
    }

    #[tokio::test]
    async fn cycles_count_finished_iterations() {
        let mut scheduler = Scheduler::new(
            config(300),
            Box::new(FlakySource { calls: 0 }),
            None,
            formatter(),
            Box::new(CountingSink::accepting()),
        );

        assert_eq!(scheduler.counters().cycles, 0);
        scheduler.run_iteration().await.unwrap();
        assert_eq!(scheduler.counters().cycles, 1);
        scheduler.run_iteration().await.unwrap_err();
        scheduler.run_iteration().await.unwrap();

        let c = scheduler.counters();
        assert_eq!((c.cycles, c.cycle_failures, c.metrics_collected), (3, 1, 2));
    }

    #[tokio::test(start_paused = true)]
    async fn local_cycle_is_gated_by_interval() {
        let (remote, _) = fixed(1, SourceKind::Prometheus);
        let (local, local_calls) = fixed(2, SourceKind::System);
        let sink = Box::new(CountingSink::accepting());
        let mut scheduler = Scheduler::new(config(10), remote, Some(local), formatter(), sink);

        // First iteration always runs the local cycle
        let report = scheduler.run_iteration().await.unwrap();
        assert_eq!(report.local.map(|r| r.collected), Some(2));

        // Sub-interval spacing never triggers another
        for _ in 0..9 {
            tokio::time::advance(Duration::from_secs(1)).await;
            assert!(scheduler.run_iteration().await.unwrap().local.is_none());
        }
        assert_eq!(local_calls.load(Ordering::SeqCst), 1);

        tokio::time::advance(Duration::from_secs(1)).await;
        assert!(scheduler.run_iteration().await.unwrap().local.is_some());
        assert_eq!(local_calls.load(Ordering::SeqCst), 2);
        assert_eq!(scheduler.counters().metrics_collected, 11 + 4);
    }

    #[tokio::test]
    async fn local_events_are_typed_system() {
        let (remote, _) = fixed(1, SourceKind::Prometheus);
        let (local, _) = fixed(1, SourceKind::System);
        let sink = Arc::new(CountingSink::accepting());

        struct Shared(Arc<CountingSink>);
        #[async_trait]
        impl Sink for Shared {
            async fn deliver(&self, event: &FormattedEvent) -> Result<(), DeliveryError> {
                self.0.deliver(event).await
            }
        }

        let mut scheduler =
            Scheduler::new(config(300), remote, Some(local), formatter(), Box::new(Shared(sink.clone())));
        scheduler.run_iteration().await.unwrap();

        assert_eq!(*sink.kinds.lock().unwrap(), vec![SourceKind::Prometheus, SourceKind::System]);
    }

    #[test]
    fn local_never_due_without_local_source() {
        let (remote, _) = fixed(1, SourceKind::Prometheus);
        let scheduler =
            Scheduler::new(config(1), remote, None, formatter(), Box::new(CountingSink::accepting()));
        assert!(!scheduler.local_due(Instant::now()));
    }

    #[tokio::test(start_paused = true)]
    async fn run_publishes_snapshots_and_stops_on_cancel() {
        let (remote, calls) = fixed(3, SourceKind::Prometheus);
        let scheduler =
            Scheduler::new(config(300), remote, None, formatter(), Box::new(CountingSink::accepting()));
        let mut stats = scheduler.subscribe();
        let token = CancellationToken::new();

        let handle = tokio::spawn(scheduler.run(token.clone()));
        stats.changed().await.unwrap();
        let first = stats.borrow_and_update().clone();
        assert_eq!(first.counters.metrics_sent, 3);
        assert_eq!(first.phase, Phase::Sleeping);
        assert!(first.updated_at.is_some());

        token.cancel();
        let counters = handle.await.unwrap();
        assert_eq!(counters.metrics_collected, 3 * calls.load(Ordering::SeqCst));
        assert_eq!(stats.borrow().phase, Phase::Idle);
    }

    #[tokio::test(start_paused = true)]
    async fn backoff_after_panic_is_one_second() {
        let scheduler = Scheduler::new(
            config(300),
            Box::new(PanickingSource),
            None,
            formatter(),
            Box::new(CountingSink::accepting()),
        );
        let mut stats = scheduler.subscribe();
        let token = CancellationToken::new();
        let handle = tokio::spawn(scheduler.run(token.clone()));

        // Interval is 1s too, so check the phase rather than timing alone
        stats.changed().await.unwrap();
        assert_eq!(stats.borrow_and_update().phase, Phase::Backoff);

        tokio::time::sleep(Duration::from_millis(3500)).await;
        token.cancel();
        let counters = handle.await.unwrap();
        assert_eq!(counters.cycles, 4);
        assert_eq!(counters.cycle_failures, 4);
    }
}
