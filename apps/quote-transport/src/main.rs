//! Quote Transport Binary
//!
//! Runs the transport for the configured tickers and logs every event.
//!
//! # Usage
//!
//! ```bash
//! QUOTE_TICKERS=AAPL,MSFT cargo run --bin quote-transport
//! ```
//!
//! # Environment Variables
//!
//! - `QUOTE_API_KEY`: Provider credential (optional behind a proxy endpoint)
//! - `QUOTE_TICKERS`: Comma-separated tickers
//! - `QUOTE_STRATEGY`: `stream_preferred` | `stream_only` | `poll_only`
//! - `QUOTE_REST_BASE_URL` / `QUOTE_STREAM_URL`: Endpoint overrides
//! - `QUOTE_SIMULATION`: Force the standby dot state
//! - `OTEL_ENABLED`: Enable OpenTelemetry export (default: false)
//! - `RUST_LOG`: Log level (default: `quote_transport=info`)

use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use quote_transport::infrastructure::telemetry;
use quote_transport::{
    EventBus, EventKind, MemoryQuoteStore, QuoteStore, TransportConfig, TransportEvent,
    TransportOrchestrator, TungsteniteConnector, init_metrics,
};
use tokio::signal;

/// Upper bound on graceful shutdown.
const SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(30);

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    rustls::crypto::ring::default_provider()
        .install_default()
        .map_err(|_| anyhow::anyhow!("failed to install rustls crypto provider"))?;

    load_dotenv();

    let _telemetry_guard = telemetry::init().context("failed to initialize telemetry")?;

    tracing::info!("Starting quote transport");

    let metrics_handle = init_metrics().context("failed to install metrics recorder")?;

    let config = TransportConfig::from_env().context("invalid configuration")?;
    log_config(&config);

    let tickers = config.tickers.clone();
    let store = Arc::new(MemoryQuoteStore::new());
    let orchestrator = TransportOrchestrator::new(
        config,
        Arc::new(TungsteniteConnector::new()),
        Arc::clone(&store) as Arc<dyn QuoteStore>,
        EventBus::new(),
    )?;

    let _store_feed = MemoryQuoteStore::attach(&store, orchestrator.events());
    let _event_log = orchestrator.events().subscribe(EventKind::All, log_event);

    orchestrator.start(tickers).await?;
    tracing::info!("Quote transport ready");

    await_shutdown().await;

    if tokio::time::timeout(SHUTDOWN_TIMEOUT, orchestrator.stop())
        .await
        .is_err()
    {
        tracing::warn!(
            timeout_secs = SHUTDOWN_TIMEOUT.as_secs(),
            "Graceful shutdown timed out"
        );
    }

    tracing::debug!(metrics = %metrics_handle.render(), "Final metrics");
    tracing::info!(tickers_with_data = store.len(), "Quote transport stopped");
    Ok(())
}

fn log_event(event: &TransportEvent) {
    match event {
        TransportEvent::Quote { quote, source } => tracing::debug!(
            ticker = %quote.ticker,
            price = %quote.price,
            source = source.as_str(),
            "Quote"
        ),
        TransportEvent::Error { code, message } if code.is_fatal() => {
            tracing::error!(code = code.as_str(), message = %message, "Transport error");
        }
        TransportEvent::Error { code, message } => {
            tracing::warn!(code = code.as_str(), message = %message, "Transport error");
        }
        TransportEvent::RateLimited { backoff_delay, .. } => {
            tracing::warn!(?backoff_delay, "Provider rate limit hit");
        }
        TransportEvent::MarketStatus(status) => tracing::info!(
            exchange = %status.exchange,
            is_open = status.is_open,
            "Market status"
        ),
        TransportEvent::StreamDisconnected { reason } => {
            tracing::warn!(reason = %reason, "Stream disconnected");
        }
        other => tracing::info!(event = ?other.kind(), "Transport event"),
    }
}

/// Log the parsed configuration.
fn log_config(config: &TransportConfig) {
    tracing::info!(
        strategy = config.strategy.as_str(),
        tickers = config.tickers.len(),
        proxied = config.endpoints.is_proxied(),
        has_credential = !config.credential.is_empty(),
        "Configuration loaded"
    );
    tracing::debug!(
        rest_base_url = %config.endpoints.rest_base_url,
        stream_url = %config.endpoints.stream_url,
        "Provider endpoints"
    );
}

/// Load .env from the current directory or the nearest ancestor.
fn load_dotenv() {
    if dotenvy::dotenv().is_ok() {
        return;
    }

    if let Ok(cwd) = std::env::current_dir() {
        for dir in cwd.ancestors().skip(1) {
            let env_path = dir.join(".env");
            if env_path.exists() {
                let _ = dotenvy::from_path(&env_path);
                return;
            }
        }
    }
}

/// Wait for SIGTERM or SIGINT.
async fn await_shutdown() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::error!(error = %e, "Ctrl+C handler failed");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "SIGTERM handler failed");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => tracing::info!("Received Ctrl+C, shutting down"),
        () = terminate => tracing::info!("Received SIGTERM, shutting down"),
    }
}
