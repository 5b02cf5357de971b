//! # Event Loop
//!
//! The single task that owns the connection lifecycle and the state
//! aggregator. Sessions, reconnect timers and the tick all talk to it through
//! one unbounded `LiveMessage` channel; it publishes a fresh
//! [`DashboardSnapshot`] on a `watch` channel after every reduction.
//!
//! Only one session task exists at a time: the previous one is cancelled and
//! awaited before the next is spawned, and on shutdown the current one is
//! awaited so its socket is closed before [`LiveHandle::join`] returns.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::sync::{mpsc, watch};
use tokio::task::{JoinError, JoinHandle};
use tokio::time::{interval, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

use super::aggregator::StateAggregator;
use super::lifecycle::{
    ConnectionLifecycle, DEFAULT_MAX_RECONNECT_ATTEMPTS, DEFAULT_RECONNECT_DELAY,
};
use super::snapshot::DashboardSnapshot;
use crate::ingestors::tempest_wss::{
    run_session, Dialer, SessionContext, DEFAULT_HANDSHAKE_TIMEOUT, DEFAULT_STALENESS,
};
use crate::models::{LiveMessage, StationMeta};

/// Default refresh cadence for relative timestamps.
pub const DEFAULT_TICK_INTERVAL: Duration = Duration::from_secs(1);
/// Shortest tick [`spawn_live`] will run with; smaller values are raised to it.
pub const MIN_TICK_INTERVAL: Duration = Duration::from_millis(1);

/// Timing knobs for one live pipeline.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LiveSettings {
    pub reconnect_delay: Duration,
    pub max_attempts: u32,
    pub staleness: Duration,
    /// Deadline for dialing, the websocket upgrade and both subscription requests.
    pub handshake_timeout: Duration,
    /// Clamped to at least [`MIN_TICK_INTERVAL`].
    pub tick_interval: Duration,
}

impl Default for LiveSettings {
    fn default() -> Self {
        Self {
            reconnect_delay: DEFAULT_RECONNECT_DELAY,
            max_attempts: DEFAULT_MAX_RECONNECT_ATTEMPTS,
            staleness: DEFAULT_STALENESS,
            handshake_timeout: DEFAULT_HANDSHAKE_TIMEOUT,
            tick_interval: DEFAULT_TICK_INTERVAL,
        }
    }
}

/// Caller's side of a running pipeline.
pub struct LiveHandle {
    snapshots: watch::Receiver<DashboardSnapshot>,
    shutdown: CancellationToken,
    task: JoinHandle<()>,
}

impl LiveHandle {
    /// A receiver that is notified whenever the snapshot changes.
    pub fn subscribe(&self) -> watch::Receiver<DashboardSnapshot> {
        self.snapshots.clone()
    }

    /// The latest published snapshot.
    pub fn snapshot(&self) -> DashboardSnapshot {
        self.snapshots.borrow().clone()
    }

    /// Requests a deliberate quit. Safe to call any number of times.
    pub fn shutdown(&self) {
        self.shutdown.cancel();
    }

    /// Token that stops the pipeline when cancelled, for wiring signal handlers.
    pub fn shutdown_token(&self) -> CancellationToken {
        self.shutdown.clone()
    }

    /// Waits for the event loop (and its last session) to finish.
    pub async fn join(self) -> Result<(), JoinError> {
        self.task.await
    }
}

/// Starts the pipeline on the current tokio runtime.
pub fn spawn_live<D: Dialer>(
    dialer: Arc<D>,
    station: StationMeta,
    mut settings: LiveSettings,
) -> LiveHandle {
    settings.tick_interval = settings.tick_interval.max(MIN_TICK_INTERVAL);
    let aggregator = StateAggregator::new(station);
    let (snapshot_tx, snapshots) = watch::channel(aggregator.snapshot().clone());
    let (tx, rx) = mpsc::unbounded_channel();
    let shutdown = CancellationToken::new();

    let event_loop = EventLoop {
        dialer,
        device_id: aggregator.snapshot().station.device_id,
        settings,
        lifecycle: ConnectionLifecycle::new(settings.max_attempts, settings.reconnect_delay),
        aggregator,
        tx,
        rx,
        snapshot_tx,
        shutdown: shutdown.clone(),
        session: None,
        retry_timer: None,
        last_session_id: 0,
    };
    let task = tokio::spawn(event_loop.run());

    LiveHandle {
        snapshots,
        shutdown,
        task,
    }
}

struct ActiveSession {
    id: u64,
    cancel: CancellationToken,
    task: JoinHandle<()>,
}

struct EventLoop<D: Dialer> {
    dialer: Arc<D>,
    device_id: u64,
    settings: LiveSettings,
    lifecycle: ConnectionLifecycle,
    aggregator: StateAggregator,
    tx: mpsc::UnboundedSender<LiveMessage>,
    rx: mpsc::UnboundedReceiver<LiveMessage>,
    snapshot_tx: watch::Sender<DashboardSnapshot>,
    shutdown: CancellationToken,
    session: Option<ActiveSession>,
    retry_timer: Option<CancellationToken>,
    last_session_id: u64,
}

impl<D: Dialer> EventLoop<D> {
    async fn run(mut self) {
        log::info!(
            "Starting live pipeline for device {} (station '{}').",
            self.device_id,
            self.aggregator.snapshot().station.station_name
        );

        if self.lifecycle.begin_connect() {
            self.spawn_session().await;
        }
        self.reduce(&LiveMessage::Tick);

        let mut ticker = interval(self.settings.tick_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                biased;
                _ = self.shutdown.cancelled() => break,
                Some(msg) = self.rx.recv() => self.handle(msg).await,
                _ = ticker.tick() => self.handle(LiveMessage::Tick).await,
            }
        }

        self.teardown().await;
    }

    async fn handle(&mut self, msg: LiveMessage) {
        match &msg {
            LiveMessage::Connected { session } => {
                if !self.is_current(*session) {
                    log::debug!("Ignoring Connected from retired session {}.", session);
                    return;
                }
                self.lifecycle.on_connected(Utc::now());
            }
            LiveMessage::ConnectionError {
                session, message, ..
            } => {
                if !self.is_current(*session) {
                    log::debug!("Ignoring error from retired session {}: {}", session, message);
                    return;
                }
                if let Some(delay) = self.lifecycle.on_failure(message.clone()) {
                    self.arm_retry(delay);
                }
            }
            LiveMessage::ReconnectDue => {
                self.retry_timer = None;
                if self.lifecycle.on_reconnect_due() {
                    self.spawn_session().await;
                }
            }
            LiveMessage::Telemetry(_) | LiveMessage::Tick => {}
        }

        self.reduce(&msg);
    }

    /// Folds one message into the snapshot and publishes the result.
    fn reduce(&mut self, msg: &LiveMessage) {
        self.aggregator.apply(msg, self.lifecycle.state(), Utc::now());
        self.publish();
    }

    fn is_current(&self, session: u64) -> bool {
        self.session.as_ref().is_some_and(|s| s.id == session)
    }

    fn publish(&self) {
        let next = self.aggregator.snapshot();
        self.snapshot_tx.send_if_modified(|current| {
            if *current == *next {
                false
            } else {
                *current = next.clone();
                true
            }
        });
    }

    async fn spawn_session(&mut self) {
        self.reap_session().await;

        self.last_session_id += 1;
        let id = self.last_session_id;
        let cancel = self.shutdown.child_token();
        let ctx = SessionContext {
            session: id,
            device_id: self.device_id,
            staleness: self.settings.staleness,
            handshake_timeout: self.settings.handshake_timeout,
            tx: self.tx.clone(),
            cancel: cancel.clone(),
        };
        log::debug!("Spawning session {}.", id);
        let task = tokio::spawn(run_session(Arc::clone(&self.dialer), ctx));
        self.session = Some(ActiveSession { id, cancel, task });
    }

    /// Cancels and awaits the current session, if any.
    async fn reap_session(&mut self) {
        if let Some(session) = self.session.take() {
            session.cancel.cancel();
            if let Err(e) = session.task.await {
                log::error!("Session {} task failed: {}", session.id, e);
            }
        }
    }

    fn arm_retry(&mut self, delay: Duration) {
        if let Some(previous) = self.retry_timer.take() {
            previous.cancel();
        }

        let token = self.shutdown.child_token();
        let timer_token = token.clone();
        let tx = self.tx.clone();
        tokio::spawn(async move {
            tokio::select! {
                _ = timer_token.cancelled() => {}
                _ = tokio::time::sleep(delay) => {
                    let _ = tx.send(LiveMessage::ReconnectDue);
                }
            }
        });
        self.retry_timer = Some(token);
    }

    async fn teardown(mut self) {
        self.lifecycle.terminate();
        if let Some(timer) = self.retry_timer.take() {
            timer.cancel();
        }
        self.reap_session().await;

        self.reduce(&LiveMessage::Tick);
        log::info!("Live pipeline stopped.");
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use futures_util::future::BoxFuture;
    use tokio::io::DuplexStream;
    use tokio::time::timeout;
    use tokio_tungstenite::tungstenite;
    use tokio_tungstenite::WebSocketStream;

    use super::*;
    use crate::core::lifecycle::ConnectionPhase;
    use crate::ingestors::tempest_wss::LiveError;

    /// Refuses every dial.
    #[derive(Default)]
    struct RefusingDialer {
        dials: AtomicUsize,
    }

    impl Dialer for RefusingDialer {
        type Io = DuplexStream;

        fn dial(&self) -> BoxFuture<'_, Result<WebSocketStream<Self::Io>, LiveError>> {
            self.dials.fetch_add(1, Ordering::SeqCst);
            Box::pin(async { Err(LiveError::Dial(tungstenite::Error::ConnectionClosed)) })
        }
    }

    fn fast_settings(max_attempts: u32) -> LiveSettings {
        LiveSettings {
            reconnect_delay: Duration::from_millis(10),
            max_attempts,
            staleness: Duration::from_secs(5),
            handshake_timeout: Duration::from_secs(5),
            tick_interval: Duration::from_millis(50),
        }
    }

    #[test]
    fn test_default_settings() {
        let settings = LiveSettings::default();
        assert_eq!(settings.reconnect_delay, Duration::from_secs(5));
        assert_eq!(settings.max_attempts, 5);
        assert_eq!(settings.staleness, Duration::from_secs(660));
        assert_eq!(settings.handshake_timeout, Duration::from_secs(45));
        assert_eq!(settings.tick_interval, Duration::from_secs(1));
    }

    #[tokio::test]
    async fn test_zero_tick_interval_is_clamped() {
        let dialer = Arc::new(RefusingDialer::default());
        let settings = LiveSettings {
            tick_interval: Duration::ZERO,
            ..fast_settings(1)
        };
        let handle = spawn_live(dialer, StationMeta::default(), settings);

        let mut rx = handle.subscribe();
        timeout(
            Duration::from_secs(5),
            rx.wait_for(|s| s.connection.is_exhausted()),
        )
        .await
        .expect("exhausted in time")
        .expect("loop alive");

        handle.shutdown();
        // A panicking loop would surface here as a JoinError.
        handle.join().await.unwrap();
    }

    #[tokio::test]
    async fn test_refused_dials_exhaust_budget() {
        let dialer = Arc::new(RefusingDialer::default());
        let handle = spawn_live(Arc::clone(&dialer), StationMeta::default(), fast_settings(2));

        let mut rx = handle.subscribe();
        let snap = timeout(
            Duration::from_secs(5),
            rx.wait_for(|s| s.connection.is_exhausted()),
        )
        .await
        .expect("exhausted in time")
        .expect("loop alive")
        .clone();

        assert_eq!(snap.connection.attempts, 2);
        assert!(snap.error.as_deref().unwrap().starts_with("ws dial:"));
        assert!(snap.status_line(Utc::now()).contains("restart to retry"));

        // Initial dial plus two reconnects, and nothing after.
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(dialer.dials.load(Ordering::SeqCst), 3);

        handle.shutdown();
        handle.shutdown();
        let last = handle.subscribe();
        handle.join().await.unwrap();
        assert_eq!(last.borrow().connection.phase, ConnectionPhase::Terminated);
    }
}
