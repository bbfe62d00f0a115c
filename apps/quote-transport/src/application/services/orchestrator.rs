//! Transport Orchestrator
//!
//! The single entry point collaborators talk to. Chooses which channels run
//! for the configured strategy, drives the prioritized backfill, fails over
//! to periodic polling while the stream is down, and normalizes every quote
//! into one `TransportEvent::Quote` shape.
//!
//! # Failover
//!
//! ```text
//! stream drops ──► grace timer ──► still down? ──► fallback poll loop
//!                      │                                   │
//!                      └──── stream reconnects ◄───────────┘ (both cancelled)
//! ```
//!
//! At most one grace timer and one fallback loop exist at a time.

use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use chrono::Utc;
use parking_lot::{Mutex, RwLock};
use rust_decimal::Decimal;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::application::events::{ErrorCode, TransportEvent};
use crate::application::ports::{QuoteStore, StreamConnector, StreamError};
use crate::domain::backfill::FetchPriorityQueue;
use crate::domain::market::{DotState, DotStateInputs, MarketStatus, exchange_for_ticker, infer_dot_state};
use crate::domain::quote::{Quote, QuoteSource};
use crate::infrastructure::broadcast::EventBus;
use crate::infrastructure::config::{OrchestratorSettings, Strategy, TransportConfig};
use crate::infrastructure::metrics;
use crate::infrastructure::provider::{
    ConnectionState, ExchangeStatusPoller, PollingClient, PollingClientConfig, PollingError,
    StreamClientConfig, StreamEvent, StreamingConnection, SymbolMatch,
};

// =============================================================================
// Errors
// =============================================================================

/// Errors returned by orchestrator operations.
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    /// `start` called while running.
    #[error("transport already running")]
    AlreadyRunning,

    /// No credential and no proxy endpoint.
    #[error("no credential configured and no proxy endpoint")]
    NoCredential,

    /// Polling failure.
    #[error(transparent)]
    Polling(#[from] PollingError),

    /// Streaming failure.
    #[error(transparent)]
    Stream(#[from] StreamError),
}

impl TransportError {
    /// Consumer-facing error class, if this error has one.
    #[must_use]
    pub fn error_code(&self) -> Option<ErrorCode> {
        match self {
            Self::NoCredential => Some(ErrorCode::NoCredential),
            Self::Polling(e) => e.error_code(),
            Self::Stream(StreamError::AuthRejected(_)) => Some(ErrorCode::AuthFailed),
            Self::Stream(_) => Some(ErrorCode::WsError),
            Self::AlreadyRunning => None,
        }
    }
}

// =============================================================================
// Shared State
// =============================================================================

#[derive(Default)]
struct Failover {
    grace: Option<(CancellationToken, JoinHandle<()>)>,
    fallback: Option<(CancellationToken, JoinHandle<()>)>,
}

/// State reachable from background tasks.
struct Shared {
    bus: EventBus,
    store: Arc<dyn QuoteStore>,
    polling: Arc<PollingClient>,
    settings: OrchestratorSettings,
    tickers: RwLock<BTreeSet<String>>,
    previous_close: RwLock<HashMap<String, Decimal>>,
    failover: Mutex<Failover>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
    running: AtomicBool,
    failover_enabled: AtomicBool,
    stream_connected: AtomicBool,
    auth_reported: AtomicBool,
}

/// Handles owned by one `start`..`stop` cycle.
struct Run {
    cancel: CancellationToken,
    strategy: Strategy,
    stream: Option<Arc<StreamingConnection>>,
    pump: Option<JoinHandle<()>>,
}

// =============================================================================
// Orchestrator
// =============================================================================

/// Coordinates streaming, polling and status for a set of tickers.
pub struct TransportOrchestrator {
    config: TransportConfig,
    connector: Arc<dyn StreamConnector>,
    shared: Arc<Shared>,
    status: ExchangeStatusPoller,
    strategy: RwLock<Strategy>,
    simulation: AtomicBool,
    run: tokio::sync::Mutex<Option<Run>>,
}

impl std::fmt::Debug for TransportOrchestrator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TransportOrchestrator")
            .field("strategy", &*self.strategy.read())
            .field("running", &self.is_running())
            .field("tickers", &*self.shared.tickers.read())
            .finish_non_exhaustive()
    }
}

impl TransportOrchestrator {
    /// Create an idle orchestrator.
    ///
    /// # Errors
    ///
    /// Returns an error if the HTTP client cannot be built.
    pub fn new(
        config: TransportConfig,
        connector: Arc<dyn StreamConnector>,
        store: Arc<dyn QuoteStore>,
        bus: EventBus,
    ) -> Result<Self, TransportError> {
        let polling = Arc::new(PollingClient::new(PollingClientConfig::from_transport_config(
            &config,
        ))?);

        let status = ExchangeStatusPoller::new(
            Arc::clone(&polling),
            bus.clone(),
            config.orchestrator.status_interval,
        );

        let shared = Arc::new(Shared {
            bus,
            store,
            polling,
            settings: config.orchestrator.clone(),
            tickers: RwLock::new(BTreeSet::new()),
            previous_close: RwLock::new(HashMap::new()),
            failover: Mutex::new(Failover::default()),
            tasks: Mutex::new(Vec::new()),
            running: AtomicBool::new(false),
            failover_enabled: AtomicBool::new(false),
            stream_connected: AtomicBool::new(false),
            auth_reported: AtomicBool::new(false),
        });

        Ok(Self {
            strategy: RwLock::new(config.strategy),
            simulation: AtomicBool::new(config.simulation),
            config,
            connector,
            shared,
            status,
            run: tokio::sync::Mutex::new(None),
        })
    }

    /// Start the transport for `tickers`.
    ///
    /// `tickers` is merged into the tracked set, so tickers added with
    /// [`Self::subscribe`] while idle start alongside them.
    ///
    /// # Errors
    ///
    /// `AlreadyRunning` if started twice, `NoCredential` when neither a
    /// credential nor a proxy endpoint is configured (an error event is
    /// emitted as well).
    pub async fn start(&self, tickers: Vec<String>) -> Result<(), TransportError> {
        let mut run_slot = self.run.lock().await;
        if run_slot.is_some() {
            return Err(TransportError::AlreadyRunning);
        }

        if !self.config.has_access() {
            tracing::error!("No credential configured and no proxy endpoint");
            self.shared.bus.emit(TransportEvent::error(
                ErrorCode::NoCredential,
                "no credential configured and no proxy endpoint",
            ));
            return Err(TransportError::NoCredential);
        }

        if !self.config.network_allowed {
            tracing::warn!("Network access forbidden, polling disabled");
            self.shared.bus.emit(TransportEvent::error(
                ErrorCode::ForbiddenOrigin,
                "network access is not allowed from this origin",
            ));
        }

        let strategy = *self.strategy.read();
        let ticker_list: Vec<String> = {
            let mut tracked = self.shared.tickers.write();
            tracked.extend(tickers.into_iter().filter(|t| !t.is_empty()));
            tracked.iter().cloned().collect()
        };

        self.shared.running.store(true, Ordering::Release);
        self.shared.stream_connected.store(false, Ordering::Release);
        self.shared.auth_reported.store(false, Ordering::Release);
        self.shared
            .failover_enabled
            .store(strategy == Strategy::StreamPreferred, Ordering::Release);

        let cancel = CancellationToken::new();

        tracing::info!(
            strategy = strategy.as_str(),
            tickers = ticker_list.len(),
            "Starting quote transport"
        );
        self.shared.bus.emit(TransportEvent::Started {
            tickers: ticker_list.clone(),
        });

        let backfilling = strategy.uses_backfill()
            && self
                .shared
                .spawn_backfill(ticker_list.clone(), QuoteSource::Backfill, &cancel);

        let (stream, pump) = if strategy.uses_stream() {
            let (stream, pump) = self.open_stream(&ticker_list, &cancel);
            (Some(stream), Some(pump))
        } else {
            (None, None)
        };

        if strategy == Strategy::PollOnly {
            // The backfill already covers the first round.
            Arc::clone(&self.shared).start_fallback(&cancel, backfilling);
        }

        self.status.start(&ticker_list, &cancel).await;

        *run_slot = Some(Run {
            cancel,
            strategy,
            stream,
            pump,
        });
        Ok(())
    }

    fn open_stream(
        &self,
        tickers: &[String],
        cancel: &CancellationToken,
    ) -> (Arc<StreamingConnection>, JoinHandle<()>) {
        let (event_tx, event_rx) = mpsc::unbounded_channel();
        let stream = Arc::new(StreamingConnection::new(
            StreamClientConfig::from_stream_settings(
                self.config.endpoints.stream_url.clone(),
                self.config.credential.clone(),
                &self.config.stream,
            ),
            Arc::clone(&self.connector),
            event_tx,
        ));
        stream.subscribe(tickers.iter().cloned());

        let pump = tokio::spawn(Arc::clone(&self.shared).pump(event_rx, cancel.clone()));

        if let Err(e) = stream.connect() {
            tracing::error!(error = %e, "Quote stream could not start");
            self.shared
                .bus
                .emit(TransportEvent::error(ErrorCode::WsError, e.to_string()));
            Arc::clone(&self.shared).arm_failover(cancel);
        }

        (stream, pump)
    }

    /// Stop everything and wait for every background task to exit.
    pub async fn stop(&self) {
        let mut slot = self.run.lock().await;
        let Some(run) = slot.take() else {
            return;
        };
        self.shutdown(run).await;
    }

    async fn shutdown(&self, run: Run) {
        tracing::info!("Stopping quote transport");
        self.shared.running.store(false, Ordering::Release);
        run.cancel.cancel();

        if let Some(stream) = run.stream {
            stream.stop().await;
        }
        if let Some(pump) = run.pump {
            let _ = pump.await;
        }

        self.shared.stop_failover().await;

        let tasks: Vec<_> = self.shared.tasks.lock().drain(..).collect();
        for task in tasks {
            let _ = task.await;
        }

        self.status.stop().await;
        self.shared.stream_connected.store(false, Ordering::Release);

        self.shared.bus.emit(TransportEvent::Stopped);
    }

    /// Stop, then start again with the current tickers and strategy.
    ///
    /// # Errors
    ///
    /// See [`Self::start`].
    pub async fn restart(&self) -> Result<(), TransportError> {
        self.stop().await;
        let tickers = self.tickers();
        self.start(tickers).await
    }

    /// Track more tickers.
    ///
    /// While running, new tickers are streamed, get a one-shot backfill and
    /// extend the exchange status set.
    pub async fn subscribe(&self, tickers: Vec<String>) {
        let run = self.run.lock().await;

        let added: Vec<String> = {
            let mut tracked = self.shared.tickers.write();
            tickers
                .into_iter()
                .filter(|t| !t.is_empty() && tracked.insert(t.clone()))
                .collect()
        };
        if added.is_empty() {
            return;
        }

        let Some(run) = run.as_ref() else {
            return;
        };

        tracing::info!(added = ?added, "Tracking additional tickers");
        if let Some(stream) = &run.stream {
            stream.subscribe(added.iter().cloned());
        }
        if run.strategy.uses_backfill() {
            self.shared
                .spawn_backfill(added, QuoteSource::Backfill, &run.cancel);
        }
        self.status.set_tickers(&self.tickers());
    }

    /// Stop tracking tickers.
    pub async fn unsubscribe(&self, tickers: Vec<String>) {
        let run = self.run.lock().await;

        let removed: Vec<String> = {
            let mut tracked = self.shared.tickers.write();
            tickers.into_iter().filter(|t| tracked.remove(t)).collect()
        };
        if removed.is_empty() {
            return;
        }

        if let Some(run) = run.as_ref() {
            if let Some(stream) = &run.stream {
                stream.unsubscribe(removed.iter());
            }
            self.status.set_tickers(&self.tickers());
        }
    }

    /// Open/closed/standby indicator for `ticker`.
    #[must_use]
    pub fn compute_dot_state(&self, ticker: &str) -> DotState {
        let inputs = DotStateInputs {
            simulation: self.simulation.load(Ordering::Acquire),
            last_quote_at: self.shared.store.last_updated(ticker),
            exchange_open: exchange_for_ticker(ticker)
                .and_then(|exchange| self.status.status(&exchange))
                .map(|status| status.is_open),
            staleness_threshold: self.shared.settings.staleness_threshold,
        };
        infer_dot_state(&inputs, Utc::now())
    }

    /// Strategy used by the next `start`/`restart`.
    pub fn set_strategy(&self, strategy: Strategy) {
        *self.strategy.write() = strategy;
    }

    /// Current configured strategy.
    #[must_use]
    pub fn strategy(&self) -> Strategy {
        *self.strategy.read()
    }

    /// Toggle simulation mode; takes effect immediately.
    pub fn set_simulation_mode(&self, enabled: bool) {
        self.simulation.store(enabled, Ordering::Release);
    }

    /// The observer bus.
    #[must_use]
    pub fn events(&self) -> &EventBus {
        &self.shared.bus
    }

    /// Search provider symbols.
    ///
    /// # Errors
    ///
    /// Any polling failure.
    pub async fn search_symbols(&self, query: &str) -> Result<Vec<SymbolMatch>, TransportError> {
        Ok(self
            .shared
            .polling
            .search_symbols(query, &CancellationToken::new())
            .await?)
    }

    /// Last known status for `exchange`.
    #[must_use]
    pub fn market_status(&self, exchange: &str) -> Option<MarketStatus> {
        self.status.status(exchange)
    }

    /// Tracked tickers, sorted.
    #[must_use]
    pub fn tickers(&self) -> Vec<String> {
        self.shared.tickers.read().iter().cloned().collect()
    }

    /// Whether `start` has been called without a matching `stop`.
    #[must_use]
    pub fn is_running(&self) -> bool {
        self.shared.running.load(Ordering::Acquire)
    }

    /// Whether the stream is currently open.
    #[must_use]
    pub fn is_stream_connected(&self) -> bool {
        self.shared.stream_connected.load(Ordering::Acquire)
    }

    /// Whether the fallback poll loop is running.
    #[must_use]
    pub fn is_fallback_active(&self) -> bool {
        self.shared.failover.lock().fallback.is_some()
    }

    /// Whether a failover grace timer is pending.
    #[must_use]
    pub fn is_grace_pending(&self) -> bool {
        self.shared
            .failover
            .lock()
            .grace
            .as_ref()
            .is_some_and(|(_, handle)| !handle.is_finished())
    }

    /// State of the streaming connection, if this run has one.
    pub async fn stream_state(&self) -> Option<ConnectionState> {
        self.run
            .lock()
            .await
            .as_ref()
            .and_then(|run| run.stream.as_ref().map(|s| s.state()))
    }

    /// Background tasks (backfills, fallback, grace, status, pump) still alive.
    pub async fn active_task_count(&self) -> usize {
        let pump = self
            .run
            .lock()
            .await
            .as_ref()
            .and_then(|run| run.pump.as_ref())
            .is_some_and(|p| !p.is_finished());
        let tasks = self
            .shared
            .tasks
            .lock()
            .iter()
            .filter(|t| !t.is_finished())
            .count();
        let failover = {
            let failover = self.shared.failover.lock();
            usize::from(failover.grace.as_ref().is_some_and(|(_, h)| !h.is_finished()))
                + usize::from(failover.fallback.as_ref().is_some_and(|(_, h)| !h.is_finished()))
        };
        usize::from(pump) + tasks + failover + usize::from(self.status.is_running())
    }
}

// =============================================================================
// Background Work
// =============================================================================

impl Shared {
    /// Forward streaming events until cancelled.
    async fn pump(
        self: Arc<Self>,
        mut events: mpsc::UnboundedReceiver<StreamEvent>,
        cancel: CancellationToken,
    ) {
        loop {
            let event = tokio::select! {
                () = cancel.cancelled() => break,
                event = events.recv() => match event {
                    Some(event) => event,
                    None => break,
                },
            };

            match event {
                StreamEvent::Tick(tick) => {
                    let mut quote = Quote::from(tick);
                    let reference = self.previous_close.read().get(&quote.ticker).copied();
                    if let Some(pc) = reference {
                        quote = quote.with_reference_close(pc);
                    }
                    self.publish(quote, QuoteSource::Stream);
                }
                StreamEvent::Connected => {
                    self.stream_connected.store(true, Ordering::Release);
                    self.bus.emit(TransportEvent::StreamConnected);
                    self.stop_failover().await;
                }
                StreamEvent::Disconnected { reason } => {
                    self.stream_connected.store(false, Ordering::Release);
                    self.bus.emit(TransportEvent::StreamDisconnected { reason });
                    Arc::clone(&self).arm_failover(&cancel);
                }
                StreamEvent::ConnectFailed { error } => {
                    self.bus
                        .emit(TransportEvent::error(ErrorCode::WsError, error.to_string()));
                    Arc::clone(&self).arm_failover(&cancel);
                }
                StreamEvent::Reconnecting { attempt, delay } => {
                    tracing::debug!(attempt, ?delay, "Stream reconnect scheduled");
                }
                StreamEvent::AuthRejected { message } => {
                    self.report_auth_failure(message);
                    Arc::clone(&self).arm_failover(&cancel);
                }
                StreamEvent::GaveUp { attempts } => {
                    self.bus.emit(TransportEvent::error(
                        ErrorCode::MaxRetriesExceeded,
                        format!("stream gave up after {attempts} reconnect attempts"),
                    ));
                    Arc::clone(&self).arm_failover(&cancel);
                }
                StreamEvent::ProviderError(message) => {
                    self.bus.emit(TransportEvent::error(ErrorCode::WsError, message));
                }
            }
        }
    }

    fn publish(&self, quote: Quote, source: QuoteSource) {
        metrics::record_quote(source);
        self.bus.emit(TransportEvent::Quote { quote, source });
    }

    fn report_auth_failure(&self, message: String) {
        if !self.auth_reported.swap(true, Ordering::AcqRel) {
            self.bus
                .emit(TransportEvent::error(ErrorCode::AuthFailed, message));
        }
    }

    fn handle_poll_result(&self, ticker: &str, result: Result<Quote, PollingError>, source: QuoteSource) {
        match result {
            Ok(quote) => {
                if let Some(pc) = quote.previous_close {
                    self.previous_close.write().insert(quote.ticker.clone(), pc);
                }
                if self.tickers.read().contains(ticker) {
                    self.publish(quote, source);
                }
            }
            Err(PollingError::RateLimited {
                backoff_until,
                backoff_delay,
            }) => {
                self.bus.emit(TransportEvent::RateLimited {
                    backoff_until,
                    backoff_delay,
                });
            }
            Err(PollingError::AuthenticationFailed(message)) => self.report_auth_failure(message),
            Err(PollingError::Cancelled) => {}
            Err(e) => {
                tracing::debug!(ticker, source = source.as_str(), error = %e, "Poll result dropped");
            }
        }
    }

    /// One-shot prioritized fetch of `tickers`. Returns `false` when polling
    /// is unavailable and nothing was spawned.
    fn spawn_backfill(self: &Arc<Self>, tickers: Vec<String>, source: QuoteSource, cancel: &CancellationToken) -> bool {
        if let Err(e) = self.polling.check_available() {
            tracing::info!(error = %e, "Polling unavailable, skipping backfill");
            return false;
        }

        let shared = Arc::clone(self);
        let cancel = cancel.child_token();
        let handle = tokio::spawn(async move {
            let started_at = Utc::now();
            let order: Vec<String> =
                FetchPriorityQueue::build(tickers, |t| shared.store.has_quote(t))
                    .into_iter()
                    .collect();

            tracing::info!(tickers = order.len(), "Starting backfill");
            let summary = shared
                .polling
                .fetch_quote_batch_where(
                    &order,
                    &cancel,
                    |t| {
                        shared
                            .store
                            .last_updated(t)
                            .is_some_and(|at| at > started_at)
                    },
                    |ticker, result| shared.handle_poll_result(ticker, result, source),
                )
                .await;
            tracing::info!(
                fetched = summary.fetched,
                failed = summary.failed,
                skipped = summary.skipped,
                aborted = summary.aborted,
                "Backfill finished"
            );
        });

        let mut tasks = self.tasks.lock();
        tasks.retain(|t| !t.is_finished());
        tasks.push(handle);
        true
    }

    /// Schedule a fallback after the grace period, unless one is pending or running.
    fn arm_failover(self: Arc<Self>, cancel: &CancellationToken) {
        if !self.failover_enabled.load(Ordering::Acquire) || cancel.is_cancelled() {
            return;
        }

        let mut failover = self.failover.lock();
        let grace_pending = failover
            .grace
            .as_ref()
            .is_some_and(|(_, handle)| !handle.is_finished());
        if grace_pending || failover.fallback.is_some() {
            return;
        }

        let grace = self.settings.failover_grace;
        tracing::info!(?grace, "Stream down, arming failover");

        let grace_cancel = cancel.child_token();
        let token = grace_cancel.clone();
        let shared = Arc::clone(&self);
        let handle = tokio::spawn(async move {
            tokio::select! {
                () = token.cancelled() => {}
                () = tokio::time::sleep(grace) => {
                    let still_down = !shared.stream_connected.load(Ordering::Acquire);
                    if still_down && shared.running.load(Ordering::Acquire) {
                        shared.start_fallback(&token, false);
                    }
                }
            }
        });
        failover.grace = Some((grace_cancel, handle));
    }

    /// Start the periodic full-batch poll unless it is already running.
    ///
    /// The loop is tied to `cancel`; nothing starts once it is cancelled.
    /// With `skip_first_round` the first round waits one full interval.
    fn start_fallback(self: Arc<Self>, cancel: &CancellationToken, skip_first_round: bool) {
        let mut failover = self.failover.lock();
        if cancel.is_cancelled() || failover.fallback.is_some() {
            return;
        }

        tracing::warn!(
            interval_ms = self.settings.fallback_interval.as_millis(),
            "Starting fallback polling"
        );

        let token = cancel.child_token();
        let handle = tokio::spawn(Arc::clone(&self).fallback_loop(token.clone(), skip_first_round));
        failover.fallback = Some((token, handle));
    }

    async fn fallback_loop(self: Arc<Self>, cancel: CancellationToken, skip_first_round: bool) {
        let period = self.settings.fallback_interval;
        let first = if skip_first_round {
            tokio::time::Instant::now() + period
        } else {
            tokio::time::Instant::now()
        };
        let mut interval = tokio::time::interval_at(first, period);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                () = cancel.cancelled() => break,
                _ = interval.tick() => {}
            }

            let tickers: Vec<String> = self.tickers.read().iter().cloned().collect();
            let summary = self
                .polling
                .fetch_quote_batch_where(
                    &tickers,
                    &cancel,
                    |_| false,
                    |ticker, result| self.handle_poll_result(ticker, result, QuoteSource::FallbackPoll),
                )
                .await;
            tracing::debug!(fetched = summary.fetched, failed = summary.failed, "Fallback poll round");
        }

        tracing::info!("Fallback polling stopped");
    }

    /// Cancel the grace timer and the fallback loop, waiting for both.
    async fn stop_failover(&self) {
        let handles: Vec<JoinHandle<()>> = {
            let mut failover = self.failover.lock();
            [failover.grace.take(), failover.fallback.take()]
                .into_iter()
                .flatten()
                .map(|(token, handle)| {
                    // Cancelled under the lock so a firing grace timer cannot
                    // slip a fallback in after this point.
                    token.cancel();
                    handle
                })
                .collect()
        };

        if !handles.is_empty() {
            tracing::info!("Stopping failover");
        }
        for handle in handles {
            let _ = handle.await;
        }
    }
}
