//! Exchange Status Poller
//!
//! Periodically refreshes open/closed status for every exchange implied by
//! the tracked tickers. Polls for different exchanges are independent: one
//! failing exchange keeps its last known status and never blocks the others.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use futures_util::future::join_all;
use parking_lot::{Mutex, RwLock};
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use super::polling::{PollingClient, PollingError, RequestOptions};
use crate::application::events::TransportEvent;
use crate::domain::market::{MarketStatus, exchanges_for_tickers};
use crate::infrastructure::broadcast::EventBus;

struct Shared {
    client: Arc<PollingClient>,
    bus: EventBus,
    interval: Duration,
    exchanges: RwLock<Vec<String>>,
    cache: RwLock<HashMap<String, MarketStatus>>,
    refresh: Notify,
}

/// Background poller for exchange status.
pub struct ExchangeStatusPoller {
    shared: Arc<Shared>,
    task: Mutex<Option<(CancellationToken, JoinHandle<()>)>>,
}

impl std::fmt::Debug for ExchangeStatusPoller {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ExchangeStatusPoller")
            .field("interval", &self.shared.interval)
            .field("exchanges", &*self.shared.exchanges.read())
            .finish_non_exhaustive()
    }
}

impl ExchangeStatusPoller {
    /// Create an idle poller publishing `MarketStatus` events on `bus`.
    #[must_use]
    pub fn new(client: Arc<PollingClient>, bus: EventBus, interval: Duration) -> Self {
        Self {
            shared: Arc::new(Shared {
                client,
                bus,
                interval,
                exchanges: RwLock::new(Vec::new()),
                cache: RwLock::new(HashMap::new()),
                refresh: Notify::new(),
            }),
            task: Mutex::new(None),
        }
    }

    /// Start polling the exchanges implied by `tickers`.
    ///
    /// The first poll runs immediately. A running poller is restarted.
    pub async fn start(&self, tickers: &[String], parent: &CancellationToken) {
        self.stop().await;
        *self.shared.exchanges.write() = exchanges_for_tickers(tickers);

        let cancel = parent.child_token();
        let handle = tokio::spawn(Arc::clone(&self.shared).run(cancel.clone()));
        *self.task.lock() = Some((cancel, handle));
    }

    /// Replace the exchange set from a new ticker list.
    ///
    /// Newly added exchanges are polled right away.
    pub fn set_tickers(&self, tickers: &[String]) {
        let exchanges = exchanges_for_tickers(tickers);
        let added = {
            let mut current = self.shared.exchanges.write();
            let added = exchanges.iter().any(|e| !current.contains(e));
            *current = exchanges;
            added
        };
        if added {
            self.shared.refresh.notify_one();
        }
    }

    /// Cancel polling and wait for the task to exit.
    pub async fn stop(&self) {
        let task = self.task.lock().take();
        if let Some((cancel, handle)) = task {
            cancel.cancel();
            if let Err(e) = handle.await {
                tracing::warn!(error = %e, "Status poller ended abnormally");
            }
        }
    }

    /// Last known status for `exchange`.
    #[must_use]
    pub fn status(&self, exchange: &str) -> Option<MarketStatus> {
        self.shared.cache.read().get(exchange).cloned()
    }

    /// Exchanges currently polled.
    #[must_use]
    pub fn exchanges(&self) -> Vec<String> {
        self.shared.exchanges.read().clone()
    }

    /// Whether the polling task is alive.
    #[must_use]
    pub fn is_running(&self) -> bool {
        self.task
            .lock()
            .as_ref()
            .is_some_and(|(_, handle)| !handle.is_finished())
    }
}

impl Shared {
    async fn run(self: Arc<Self>, cancel: CancellationToken) {
        let mut interval = tokio::time::interval(self.interval);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                () = cancel.cancelled() => break,
                _ = interval.tick() => {}
                () = self.refresh.notified() => {}
            }

            let exchanges = self.exchanges.read().clone();
            let polls = exchanges.iter().map(|exchange| self.poll_one(exchange, &cancel));

            tokio::select! {
                () = cancel.cancelled() => break,
                _ = join_all(polls) => {}
            }
        }

        tracing::debug!("Status poller stopped");
    }

    async fn poll_one(&self, exchange: &str, cancel: &CancellationToken) {
        match self
            .client
            .fetch_market_status(exchange, cancel, RequestOptions::warmup())
            .await
        {
            Ok(status) => {
                tracing::debug!(exchange, is_open = status.is_open, "Exchange status refreshed");
                self.cache
                    .write()
                    .insert(exchange.to_string(), status.clone());
                self.bus.emit(TransportEvent::MarketStatus(status));
            }
            Err(PollingError::Cancelled) => {}
            Err(e) => {
                tracing::warn!(exchange, error = %e, "Exchange status poll failed");
            }
        }
    }
}
