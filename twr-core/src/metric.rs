//! Event collection behind a single aggregator task.
//!
//! Producers push `SystemTime`-stamped events into bounded queues, one
//! per event kind. One task per [`Metric`] owns the [`SlidingWindow`]
//! and is its only writer. A full queue makes the producer yield until
//! a slot frees up rather than drop the event, so everything a single
//! producer emits is applied in the order it was emitted.
//!
//! Summaries are request/reply: the request carries a oneshot sender
//! and the aggregator drains all pending event queues before answering,
//! so a summary observes every event its caller enqueued beforehand.

use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, SystemTime};

use tokio::sync::broadcast;
use tokio::sync::oneshot;
use tracing::{debug, trace};

use crate::window::{MetricSummary, SlidingWindow};
use crate::{DEFAULT_TIME_WINDOW, MAX_TIME_WINDOW, MIN_TIME_WINDOW, Result, TripwireError};

/// Depth of each event queue. Small on purpose: the aggregator drains
/// continuously and the bound is what gives producers backpressure.
const EVENT_QUEUE_DEPTH: usize = 10;

/// Configuration for a [`Metric`].
#[derive(Debug, Clone)]
pub struct MetricConfig {
    /// Sliding-window size; whole seconds in `[1s, 60s]`.
    pub time_window: Duration,
    /// Optional external shutdown signal. A message on it stops the
    /// aggregator exactly like [`Metric::close`].
    pub shutdown: Option<broadcast::Sender<()>>,
}

impl Default for MetricConfig {
    fn default() -> Self {
        Self {
            time_window: DEFAULT_TIME_WINDOW,
            shutdown: None,
        }
    }
}

/// Sliding-window event collector.
///
/// Cheap to share behind an `Arc`; every operation takes `&self`.
/// Dropping the metric (or calling [`Metric::close`]) stops the
/// aggregator task.
pub struct Metric {
    time_window: Duration,

    success_tx: flume::Sender<SystemTime>,
    timeout_tx: flume::Sender<SystemTime>,
    failure_tx: flume::Sender<SystemTime>,
    fallback_success_tx: flume::Sender<SystemTime>,
    fallback_failure_tx: flume::Sender<SystemTime>,
    reset_tx: flume::Sender<SystemTime>,
    summary_tx: flume::Sender<oneshot::Sender<MetricSummary>>,

    shutdown_tx: broadcast::Sender<()>,
    closed: AtomicBool,
    /// Most recent snapshot, served when the aggregator is gone.
    last_summary: Mutex<MetricSummary>,
}

impl Metric {
    /// Start a metric and its aggregator task.
    ///
    /// Fails on a window outside `[1s, 60s]` or with a sub-second
    /// fraction. Must be called inside a Tokio runtime.
    pub fn new(config: MetricConfig) -> Result<Self> {
        let time_window = config.time_window;
        if time_window < MIN_TIME_WINDOW
            || time_window > MAX_TIME_WINDOW
            || time_window.subsec_nanos() != 0
        {
            return Err(TripwireError::Config(format!(
                "time window must be whole seconds within [{}s, {}s], got {time_window:?}",
                MIN_TIME_WINDOW.as_secs(),
                MAX_TIME_WINDOW.as_secs(),
            )));
        }
        let runtime = tokio::runtime::Handle::try_current()
            .map_err(|e| TripwireError::Runtime(e.to_string()))?;

        let (success_tx, success_rx) = flume::bounded(EVENT_QUEUE_DEPTH);
        let (timeout_tx, timeout_rx) = flume::bounded(EVENT_QUEUE_DEPTH);
        let (failure_tx, failure_rx) = flume::bounded(EVENT_QUEUE_DEPTH);
        let (fallback_success_tx, fallback_success_rx) = flume::bounded(EVENT_QUEUE_DEPTH);
        let (fallback_failure_tx, fallback_failure_rx) = flume::bounded(EVENT_QUEUE_DEPTH);
        let (reset_tx, reset_rx) = flume::bounded(EVENT_QUEUE_DEPTH);
        let (summary_tx, summary_rx) = flume::bounded(EVENT_QUEUE_DEPTH);

        let (shutdown_tx, shutdown_rx) = broadcast::channel(1);
        let external_rx = config.shutdown.as_ref().map(broadcast::Sender::subscribe);

        let queues = EventQueues {
            success_rx,
            timeout_rx,
            failure_rx,
            fallback_success_rx,
            fallback_failure_rx,
        };
        runtime.spawn(aggregate(
            SlidingWindow::new(time_window),
            queues,
            reset_rx,
            summary_rx,
            shutdown_rx,
            external_rx,
        ));
        debug!(
            target: "tripwire::metric",
            window_secs = time_window.as_secs(),
            "metric aggregator started"
        );

        Ok(Self {
            time_window,
            success_tx,
            timeout_tx,
            failure_tx,
            fallback_success_tx,
            fallback_failure_tx,
            reset_tx,
            summary_tx,
            shutdown_tx,
            closed: AtomicBool::new(false),
            last_summary: Mutex::new(MetricSummary::default()),
        })
    }

    #[must_use]
    pub fn time_window(&self) -> Duration {
        self.time_window
    }

    /// Record a successful call.
    pub async fn success(&self) {
        self.record(&self.success_tx, "success").await;
    }

    /// Record a timed-out call. Counts into both `timeout` and `failure`.
    pub async fn timeout(&self) {
        self.record(&self.timeout_tx, "timeout").await;
    }

    /// Record a failed call.
    pub async fn failure(&self) {
        self.record(&self.failure_tx, "failure").await;
    }

    /// Record a fallback that produced a value.
    pub async fn fallback_success(&self) {
        self.record(&self.fallback_success_tx, "fallback_success").await;
    }

    /// Record a fallback that failed in turn.
    pub async fn fallback_failure(&self) {
        self.record(&self.fallback_failure_tx, "fallback_failure").await;
    }

    /// Zero every unit in the window. Events this caller enqueued
    /// before the reset are applied first, never after it.
    pub async fn reset(&self) {
        self.record(&self.reset_tx, "reset").await;
    }

    async fn record(&self, queue: &flume::Sender<SystemTime>, kind: &'static str) {
        if self.closed.load(Ordering::Acquire) {
            return;
        }
        if queue.send_async(SystemTime::now()).await.is_err() {
            trace!(target: "tripwire::metric", kind, "event discarded after aggregator exit");
        }
    }

    /// Snapshot of the window, computed after every event this caller
    /// enqueued beforehand has been applied. After [`Metric::close`]
    /// the last snapshot the aggregator produced is returned.
    pub async fn summary(&self) -> MetricSummary {
        let (reply_tx, reply_rx) = oneshot::channel();
        if self.summary_tx.send_async(reply_tx).await.is_ok() {
            if let Ok(summary) = reply_rx.await {
                *self.cache() = summary.clone();
                return summary;
            }
        }
        self.cache().clone()
    }

    fn cache(&self) -> std::sync::MutexGuard<'_, MetricSummary> {
        match self.last_summary.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    /// Stop the aggregator task. Idempotent; events recorded afterwards
    /// are silently discarded.
    pub fn close(&self) {
        if self.closed.swap(true, Ordering::AcqRel) {
            return;
        }
        let _ = self.shutdown_tx.send(());
        debug!(target: "tripwire::metric", "metric closed");
    }

    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }
}

impl Drop for Metric {
    fn drop(&mut self) {
        self.close();
    }
}

/// The five event-ingest queues, bundled so the select loop can drain
/// them apart from the window it mutates.
struct EventQueues {
    success_rx: flume::Receiver<SystemTime>,
    timeout_rx: flume::Receiver<SystemTime>,
    failure_rx: flume::Receiver<SystemTime>,
    fallback_success_rx: flume::Receiver<SystemTime>,
    fallback_failure_rx: flume::Receiver<SystemTime>,
}

impl EventQueues {
    /// Apply everything already sitting in the event queues. Runs
    /// before a reset or a summary so that no event enqueued earlier
    /// is observed later.
    fn drain_into(&self, window: &mut SlidingWindow) {
        while let Ok(t) = self.success_rx.try_recv() {
            window.record_success(t);
        }
        while let Ok(t) = self.timeout_rx.try_recv() {
            window.record_timeout(t);
        }
        while let Ok(t) = self.failure_rx.try_recv() {
            window.record_failure(t);
        }
        while let Ok(t) = self.fallback_success_rx.try_recv() {
            window.record_fallback_success(t);
        }
        while let Ok(t) = self.fallback_failure_rx.try_recv() {
            window.record_fallback_failure(t);
        }
    }
}

/// The aggregator loop. Exits on shutdown, on the external signal, or
/// once every producer handle is gone.
async fn aggregate(
    mut window: SlidingWindow,
    queues: EventQueues,
    reset_rx: flume::Receiver<SystemTime>,
    summary_rx: flume::Receiver<oneshot::Sender<MetricSummary>>,
    mut shutdown_rx: broadcast::Receiver<()>,
    mut external_rx: Option<broadcast::Receiver<()>>,
) {
    loop {
        tokio::select! {
            _ = shutdown_rx.recv() => break,
            () = wait_for_signal(&mut external_rx) => break,
            Ok(t) = queues.success_rx.recv_async() => window.record_success(t),
            Ok(t) = queues.timeout_rx.recv_async() => window.record_timeout(t),
            Ok(t) = queues.failure_rx.recv_async() => window.record_failure(t),
            Ok(t) = queues.fallback_success_rx.recv_async() => window.record_fallback_success(t),
            Ok(t) = queues.fallback_failure_rx.recv_async() => window.record_fallback_failure(t),
            Ok(t) = reset_rx.recv_async() => {
                queues.drain_into(&mut window);
                window.reset(t);
            }
            Ok(reply) = summary_rx.recv_async() => {
                queues.drain_into(&mut window);
                let _ = reply.send(window.snapshot(SystemTime::now()));
            }
            else => break,
        }
    }
    debug!(target: "tripwire::metric", "metric aggregator stopped");
}

/// Resolve when the external shutdown signal fires. A missing or
/// silently-dropped sender never resolves.
async fn wait_for_signal(rx: &mut Option<broadcast::Receiver<()>>) {
    use broadcast::error::RecvError;

    match rx {
        None => std::future::pending().await,
        Some(rx) => match rx.recv().await {
            Ok(()) | Err(RecvError::Lagged(_)) => (),
            Err(RecvError::Closed) => std::future::pending().await,
        },
    }
}
