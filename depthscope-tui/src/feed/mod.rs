//! Collaborator tasks feeding the [`ChartManager`](crate::manager::ChartManager).
//!
//! Every task runs on the tokio runtime and talks to the event loop only through
//! [`FeedEvent`]s. A [`watch`] channel carries the active [`Generation`], tasks started for an
//! older generation stop on their own.

use self::{
    backfill::TradeBackfill,
    rest::BinanceRestClient,
    websocket::{WebSocketConfig, run_stream},
};
use crate::config::ChartConfig;
use chrono::Utc;
use depthscope_data::{DataError, Generation, trade::Trade};
use derive_more::Display;
use smol_str::SmolStr;
use std::{future::Future, time::Duration};
use thiserror::Error;
use tokio::{
    sync::{mpsc, watch},
    time::MissedTickBehavior,
};
use tracing::{debug, error, info};

/// Historical trade backfill.
pub mod backfill;

/// Binance REST endpoints.
pub mod rest;

/// Binance combined market stream.
pub mod websocket;

/// Connection status updates
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display)]
pub enum ConnectionStatus {
    Connected,
    Disconnected,
    Reconnecting,
}

/// All errors raised by collaborator tasks.
#[derive(Debug, Error)]
pub enum FeedError {
    #[error("http: {0}")]
    Http(#[from] reqwest::Error),

    #[error("url: {0}")]
    Url(#[from] url::ParseError),

    #[error("rate limited after {attempts} attempts")]
    RateLimited { attempts: u32 },

    #[error("unexpected status {status}: {body}")]
    Status { status: u16, body: String },

    #[error("{0}")]
    Data(#[from] DataError),
}

/// Results delivered to the event loop, each tagged with the generation it was requested under.
///
/// Payload bodies are forwarded raw and parsed by the `ChartManager`.
#[derive(Debug, Clone, PartialEq)]
pub enum FeedEvent {
    Status {
        generation: Generation,
        status: ConnectionStatus,
    },
    Stream {
        generation: Generation,
        text: String,
    },
    DepthSnapshot {
        generation: Generation,
        body: String,
    },
    Klines {
        generation: Generation,
        body: String,
    },
    HistOpenInterest {
        generation: Generation,
        body: String,
    },
    OpenInterest {
        generation: Generation,
        body: String,
    },
    SymbolInfo {
        generation: Generation,
        body: String,
    },
    BackfillStarted {
        generation: Generation,
        window_start: u64,
    },
    HistTrades {
        generation: Generation,
        window_start: u64,
        trades: Vec<Trade>,
    },
    BackfillFailed {
        generation: Generation,
        window_start: u64,
        reason: String,
    },
    BackfillFinished {
        generation: Generation,
    },
}

impl FeedEvent {
    pub fn generation(&self) -> Generation {
        match self {
            FeedEvent::Status { generation, .. }
            | FeedEvent::Stream { generation, .. }
            | FeedEvent::DepthSnapshot { generation, .. }
            | FeedEvent::Klines { generation, .. }
            | FeedEvent::HistOpenInterest { generation, .. }
            | FeedEvent::OpenInterest { generation, .. }
            | FeedEvent::SymbolInfo { generation, .. }
            | FeedEvent::BackfillStarted { generation, .. }
            | FeedEvent::HistTrades { generation, .. }
            | FeedEvent::BackfillFailed { generation, .. }
            | FeedEvent::BackfillFinished { generation } => *generation,
        }
    }
}

/// Work the `ChartManager` asks collaborators to perform.
#[derive(Debug, Clone, PartialEq)]
pub enum FeedRequest {
    /// Open the market stream and start the depth and open interest pollers.
    Subscribe {
        symbol: SmolStr,
        generation: Generation,
    },
    DepthSnapshot {
        symbol: SmolStr,
        generation: Generation,
        attempt: u32,
        delay: Duration,
    },
    SymbolInfo {
        symbol: SmolStr,
        generation: Generation,
    },
    Klines {
        symbol: SmolStr,
        generation: Generation,
    },
    HistOpenInterest {
        symbol: SmolStr,
        generation: Generation,
    },
    /// Backfill trades of the candles opening at `windows`, in order.
    BackfillTrades {
        symbol: SmolStr,
        generation: Generation,
        windows: Vec<u64>,
        interval_ms: u64,
    },
}

impl FeedRequest {
    pub fn generation(&self) -> Generation {
        match self {
            FeedRequest::Subscribe { generation, .. }
            | FeedRequest::DepthSnapshot { generation, .. }
            | FeedRequest::SymbolInfo { generation, .. }
            | FeedRequest::Klines { generation, .. }
            | FeedRequest::HistOpenInterest { generation, .. }
            | FeedRequest::BackfillTrades { generation, .. } => *generation,
        }
    }
}

/// Spawns collaborator tasks for [`FeedRequest`]s.
#[derive(Debug)]
pub struct FeedController {
    config: ChartConfig,
    rest: BinanceRestClient,
    events: mpsc::Sender<FeedEvent>,
    generation: watch::Sender<Generation>,
}

impl FeedController {
    pub fn new(config: ChartConfig, events: mpsc::Sender<FeedEvent>) -> Result<Self, FeedError> {
        let rest = BinanceRestClient::new(
            config.rest_url.clone(),
            config.request_timeout,
            config.rate_limit_retries,
        )?;
        let (generation, _) = watch::channel(Generation::default());

        Ok(Self {
            config,
            rest,
            events,
            generation,
        })
    }

    /// Spawn the task serving `request`. Requests for a superseded generation are dropped, a
    /// newer generation is published first so tasks of the previous one stop.
    pub fn dispatch(&self, request: FeedRequest) {
        let generation = request.generation();
        self.generation.send_if_modified(|current| {
            if generation > *current {
                *current = generation;
                true
            } else {
                false
            }
        });

        if generation < *self.generation.borrow() {
            debug!(%generation, ?request, "dropping request for superseded generation");
            return;
        }

        match request {
            FeedRequest::Subscribe { symbol, generation } => self.subscribe(symbol, generation),
            FeedRequest::DepthSnapshot {
                symbol,
                generation,
                attempt,
                delay,
            } => {
                debug!(%symbol, %generation, attempt, ?delay, "requesting depth snapshot");
                let rest = self.rest.clone();
                let limit = self.config.depth_limit;
                self.spawn_fetch(
                    generation,
                    "depth snapshot",
                    delay,
                    async move { rest.depth_snapshot(&symbol, limit).await },
                    |generation, body| FeedEvent::DepthSnapshot { generation, body },
                );
            }
            FeedRequest::SymbolInfo { generation, .. } => {
                let rest = self.rest.clone();
                self.spawn_fetch(
                    generation,
                    "exchange info",
                    Duration::ZERO,
                    async move { rest.exchange_info().await },
                    |generation, body| FeedEvent::SymbolInfo { generation, body },
                );
            }
            FeedRequest::Klines { symbol, generation } => {
                let rest = self.rest.clone();
                let limit = self.config.kline_limit;
                self.spawn_fetch(
                    generation,
                    "klines",
                    Duration::ZERO,
                    async move { rest.klines(&symbol, limit).await },
                    |generation, body| FeedEvent::Klines { generation, body },
                );
            }
            FeedRequest::HistOpenInterest { symbol, generation } => {
                let rest = self.rest.clone();
                self.spawn_fetch(
                    generation,
                    "open interest history",
                    Duration::ZERO,
                    async move { rest.open_interest_hist(&symbol).await },
                    |generation, body| FeedEvent::HistOpenInterest { generation, body },
                );
            }
            FeedRequest::BackfillTrades {
                symbol,
                generation,
                windows,
                interval_ms,
            } => {
                let backfill = TradeBackfill::new(
                    self.rest.clone(),
                    self.config.backfill,
                    symbol,
                    generation,
                    interval_ms,
                    self.generation.subscribe(),
                    self.events.clone(),
                );
                tokio::spawn(async move {
                    let outcome = backfill.run(windows).await;
                    debug!(?outcome, "backfill task exited");
                });
            }
        }
    }

    fn subscribe(&self, symbol: SmolStr, generation: Generation) {
        info!(%symbol, %generation, "subscribing");

        let ws_config = WebSocketConfig::new(self.config.ws_url.clone())
            .with_ping_interval(self.config.ping_interval)
            .with_reconnect_delay(self.config.reconnect_delay);
        tokio::spawn(run_stream(
            ws_config,
            symbol.clone(),
            generation,
            self.events.clone(),
            self.generation.subscribe(),
        ));

        // Depth snapshot refresh, the first snapshot is requested separately
        let rest = self.rest.clone();
        let limit = self.config.depth_limit;
        let depth_symbol = symbol.clone();
        self.spawn_poller(
            generation,
            "depth snapshot",
            self.config.depth_poll_interval,
            self.config.depth_poll_interval,
            move || {
                let rest = rest.clone();
                let symbol = depth_symbol.clone();
                async move { rest.depth_snapshot(&symbol, limit).await }
            },
            |generation, body| FeedEvent::DepthSnapshot { generation, body },
        );

        // Current open interest, aligned to the minute
        let rest = self.rest.clone();
        let period = self.config.open_interest_poll_interval;
        self.spawn_poller(
            generation,
            "open interest",
            delay_to_next_period(Utc::now().timestamp_millis(), period),
            period,
            move || {
                let rest = rest.clone();
                let symbol = symbol.clone();
                async move { rest.open_interest(&symbol).await }
            },
            |generation, body| FeedEvent::OpenInterest { generation, body },
        );
    }

    fn spawn_fetch<Fut>(
        &self,
        generation: Generation,
        what: &'static str,
        delay: Duration,
        fetch: Fut,
        into_event: fn(Generation, String) -> FeedEvent,
    ) where
        Fut: Future<Output = Result<String, FeedError>> + Send + 'static,
    {
        let events = self.events.clone();
        let current = self.generation.subscribe();

        tokio::spawn(async move {
            if !delay.is_zero() {
                tokio::time::sleep(delay).await;
            }
            if *current.borrow() != generation {
                debug!(%generation, what, "skipping request for superseded generation");
                return;
            }

            match fetch.await {
                Ok(body) => {
                    let _ = events.send(into_event(generation, body)).await;
                }
                Err(error) => error!(%generation, what, %error, "rest request failed"),
            }
        });
    }

    fn spawn_poller<Fetch, Fut>(
        &self,
        generation: Generation,
        what: &'static str,
        first_delay: Duration,
        period: Duration,
        fetch: Fetch,
        into_event: fn(Generation, String) -> FeedEvent,
    ) where
        Fetch: Fn() -> Fut + Send + 'static,
        Fut: Future<Output = Result<String, FeedError>> + Send + 'static,
    {
        let events = self.events.clone();
        let mut current = self.generation.subscribe();

        tokio::spawn(async move {
            let start = tokio::time::Instant::now() + first_delay;
            let mut interval = tokio::time::interval_at(start, period.max(Duration::from_millis(1)));
            interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

            loop {
                tokio::select! {
                    _ = interval.tick() => {}
                    changed = current.changed() => {
                        if changed.is_err() || *current.borrow() != generation {
                            break;
                        }
                        continue;
                    }
                }

                match fetch().await {
                    Ok(body) => {
                        if events.send(into_event(generation, body)).await.is_err() {
                            break;
                        }
                    }
                    Err(error) => error!(%generation, what, %error, "poll request failed"),
                }
            }

            debug!(%generation, what, "poller stopped");
        });
    }
}

/// Delay from `now_ms` until the next multiple of `period`.
pub fn delay_to_next_period(now_ms: i64, period: Duration) -> Duration {
    let period_ms = period.as_millis() as i64;
    if period_ms <= 0 {
        return Duration::ZERO;
    }
    let elapsed = now_ms.rem_euclid(period_ms);
    Duration::from_millis((period_ms - elapsed) as u64)
}
