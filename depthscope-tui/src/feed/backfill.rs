use super::{FeedError, FeedEvent, rest::BinanceRestClient};
use async_trait::async_trait;
use depthscope_data::{Generation, exchange::binance::trade::BinanceAggTrade, trade::Trade};
use smol_str::SmolStr;
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tracing::{debug, error, info, warn};

/// Source of `aggTrades` pages.
#[async_trait]
pub trait TradePageSource: Send + Sync {
    /// Fetch up to `limit` trades. With `from_id` the page continues from that trade id and the
    /// time range is ignored.
    async fn page(
        &self,
        symbol: &SmolStr,
        start: u64,
        end: u64,
        from_id: Option<u64>,
        limit: usize,
    ) -> Result<Vec<BinanceAggTrade>, FeedError>;
}

#[async_trait]
impl TradePageSource for BinanceRestClient {
    async fn page(
        &self,
        symbol: &SmolStr,
        start: u64,
        end: u64,
        from_id: Option<u64>,
        limit: usize,
    ) -> Result<Vec<BinanceAggTrade>, FeedError> {
        self.agg_trades(symbol, start, end, from_id, limit).await
    }
}

/// Paging policy for historical trade backfill.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub struct BackfillConfig {
    /// Trades requested per page
    pub page_size: usize,
    /// Delay between consecutive page requests
    pub page_delay: Duration,
    /// Retries of a single failed page before the backfill gives up
    pub max_page_retries: u32,
    /// Delay before retrying a failed page
    pub retry_backoff: Duration,
}

impl Default for BackfillConfig {
    fn default() -> Self {
        Self {
            page_size: 1000,
            page_delay: Duration::from_millis(400),
            max_page_retries: 3,
            retry_backoff: Duration::from_secs(1),
        }
    }
}

#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum BackfillOutcome {
    Completed { windows: usize },
    /// The generation changed or the event receiver went away.
    Cancelled { window_start: Option<u64> },
    Failed { window_start: u64 },
}

/// Fetches every trade of a list of candle windows, one window at a time, and reports each
/// complete window as [`FeedEvent::HistTrades`].
///
/// The generation is checked at every page boundary, a symbol change stops the backfill before
/// its next request.
#[derive(Debug)]
pub struct TradeBackfill<Source> {
    source: Source,
    config: BackfillConfig,
    symbol: SmolStr,
    generation: Generation,
    interval_ms: u64,
    current: watch::Receiver<Generation>,
    events: mpsc::Sender<FeedEvent>,
    pages_requested: usize,
}

impl<Source> TradeBackfill<Source>
where
    Source: TradePageSource,
{
    pub fn new(
        source: Source,
        config: BackfillConfig,
        symbol: SmolStr,
        generation: Generation,
        interval_ms: u64,
        current: watch::Receiver<Generation>,
        events: mpsc::Sender<FeedEvent>,
    ) -> Self {
        Self {
            source,
            config,
            symbol,
            generation,
            interval_ms,
            current,
            events,
            pages_requested: 0,
        }
    }

    /// Backfill `windows` in the given order.
    pub async fn run(mut self, windows: Vec<u64>) -> BackfillOutcome {
        info!(
            symbol = %self.symbol,
            generation = %self.generation,
            windows = windows.len(),
            "historical trade backfill started"
        );

        let total = windows.len();
        for window_start in windows {
            if self.is_cancelled() {
                return self.cancelled(Some(window_start));
            }

            let started = FeedEvent::BackfillStarted {
                generation: self.generation,
                window_start,
            };
            if self.events.send(started).await.is_err() {
                return self.cancelled(Some(window_start));
            }

            match self.fetch_window(window_start).await {
                Ok(Some(trades)) => {
                    debug!(
                        symbol = %self.symbol,
                        window_start,
                        trades = trades.len(),
                        "historical trade window fetched"
                    );
                    let fetched = FeedEvent::HistTrades {
                        generation: self.generation,
                        window_start,
                        trades,
                    };
                    if self.events.send(fetched).await.is_err() {
                        return self.cancelled(Some(window_start));
                    }
                }
                Ok(None) => return self.cancelled(Some(window_start)),
                Err(error) => {
                    error!(
                        symbol = %self.symbol,
                        window_start,
                        %error,
                        "historical trade backfill failed"
                    );
                    let _ = self
                        .events
                        .send(FeedEvent::BackfillFailed {
                            generation: self.generation,
                            window_start,
                            reason: error.to_string(),
                        })
                        .await;
                    return BackfillOutcome::Failed { window_start };
                }
            }
        }

        let _ = self
            .events
            .send(FeedEvent::BackfillFinished {
                generation: self.generation,
            })
            .await;

        info!(symbol = %self.symbol, windows = total, "historical trade backfill finished");
        BackfillOutcome::Completed { windows: total }
    }

    /// Every trade inside `[window_start, window_start + interval)`, or `None` if cancelled.
    async fn fetch_window(&mut self, window_start: u64) -> Result<Option<Vec<Trade>>, FeedError> {
        let window_end = window_start + self.interval_ms;
        let mut trades = Vec::new();
        let mut from_id = None;

        loop {
            if self.pages_requested > 0 && !self.config.page_delay.is_zero() {
                tokio::time::sleep(self.config.page_delay).await;
            }
            if self.is_cancelled() {
                return Ok(None);
            }

            let page = self.fetch_page(window_start, window_end, from_id).await?;
            self.pages_requested += 1;

            let full = page.len() >= self.config.page_size;
            let last = page.last().map(|trade| (trade.id, trade.time));
            trades.extend(
                page.into_iter()
                    .filter(|trade| (window_start..window_end).contains(&trade.time))
                    .map(Trade::from),
            );

            match last {
                Some((id, time)) if full && time < window_end => from_id = Some(id + 1),
                _ => break,
            }
        }

        Ok(Some(trades))
    }

    async fn fetch_page(
        &self,
        window_start: u64,
        window_end: u64,
        from_id: Option<u64>,
    ) -> Result<Vec<BinanceAggTrade>, FeedError> {
        let mut attempt = 0;
        loop {
            match self
                .source
                .page(
                    &self.symbol,
                    window_start,
                    window_end,
                    from_id,
                    self.config.page_size,
                )
                .await
            {
                Ok(page) => return Ok(page),
                Err(error) if attempt < self.config.max_page_retries => {
                    attempt += 1;
                    warn!(
                        symbol = %self.symbol,
                        window_start,
                        ?from_id,
                        attempt,
                        %error,
                        "trade page failed, retrying"
                    );
                    tokio::time::sleep(self.config.retry_backoff).await;
                }
                Err(error) => return Err(error),
            }
        }
    }

    fn is_cancelled(&self) -> bool {
        *self.current.borrow() != self.generation
    }

    fn cancelled(&self, window_start: Option<u64>) -> BackfillOutcome {
        info!(
            symbol = %self.symbol,
            generation = %self.generation,
            ?window_start,
            "historical trade backfill cancelled"
        );
        BackfillOutcome::Cancelled { window_start }
    }
}
