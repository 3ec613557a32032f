use crate::{
    config::ChartConfig,
    feed::{ConnectionStatus, FeedEvent, FeedRequest},
    viewport::{Viewport, ViewportError},
};
use depthscope_data::{
    DataError, Generation, Session, SymbolMetadata,
    books::{
        DepthDiff, DepthSnapshot,
        sync::{SnapshotRequest, SyncConfig},
    },
    candle::Candle,
    exchange::binance::{
        BinanceStreamMessage,
        book::{BinanceDepthDiff, BinanceDepthSnapshot},
        info::BinanceExchangeInfo,
        kline::BinanceKline,
        open_interest::{BinanceOpenInterest, BinanceOpenInterestHist},
        trade::BinanceAggTrade,
    },
    open_interest::OpenInterestPoint,
    trade::{EvictionWindow, Trade},
};
use itertools::{Itertools, MinMaxResult};
use rust_decimal::{Decimal, prelude::ToPrimitive};
use smol_str::SmolStr;
use std::{ops::Range, time::Duration};
use tracing::{debug, info, trace, warn};

/// Fraction of the price range used as autoscale padding when candle bodies are all flat.
const FALLBACK_PADDING_RATIO: f64 = 0.05;

/// Owns the active [`Session`] and the [`Viewport`], and serialises every data update, gesture
/// and render read onto the event loop.
///
/// All I/O is delegated: work for collaborators accumulates as [`FeedRequest`]s collected with
/// [`ChartManager::drain_requests`], results come back through the `gather_*` methods or
/// [`ChartManager::apply_event`].
#[derive(Debug)]
pub struct ChartManager {
    sync_config: SyncConfig,
    generation: Generation,
    session: Option<Session>,
    viewport: Viewport,
    requests: Vec<FeedRequest>,
    rendering: bool,
    render_interval: Duration,
    connection: ConnectionStatus,
    initial_tick_multiple: u32,
    /// Candle that was live when the backfill was requested.
    backfill_live_window: Option<u64>,
    /// Window the backfill is currently fetching, protected from eviction.
    backfill_focus: Option<u64>,
}

impl ChartManager {
    pub fn new(sync_config: SyncConfig, render_interval: Duration) -> Self {
        Self {
            sync_config,
            generation: Generation::default(),
            session: None,
            viewport: Viewport::new(),
            requests: Vec::new(),
            rendering: false,
            render_interval,
            connection: ConnectionStatus::Disconnected,
            initial_tick_multiple: 1,
            backfill_live_window: None,
            backfill_focus: None,
        }
    }

    pub fn from_config(config: &ChartConfig) -> Self {
        let mut manager = Self::new(config.sync, config.render_interval);
        manager.initial_tick_multiple = config.initial_tick_multiple.max(1);
        manager
    }

    pub fn generation(&self) -> Generation {
        self.generation
    }

    pub fn session(&self) -> Option<&Session> {
        self.session.as_ref()
    }

    pub fn viewport(&self) -> &Viewport {
        &self.viewport
    }

    /// Replace the session with a fresh one for `symbol` and queue its initial requests.
    ///
    /// Results still in flight for the previous symbol are rejected from here on.
    pub fn change_symbol(&mut self, symbol: impl Into<SmolStr>) -> Generation {
        let symbol = SmolStr::new(symbol.into().to_uppercase());
        self.generation = self.generation.next();
        let generation = self.generation;

        let (session, snapshot) = Session::open(symbol.clone(), generation, self.sync_config);
        self.session = Some(session);
        self.viewport.on_symbol_change();
        self.connection = ConnectionStatus::Disconnected;
        self.backfill_live_window = None;
        self.backfill_focus = None;

        let stale = self.requests.len();
        self.requests.clear();
        if stale > 0 {
            debug!(stale, "dropped queued requests for the previous symbol");
        }

        self.requests.push(FeedRequest::Subscribe {
            symbol: symbol.clone(),
            generation,
        });
        self.requests.push(snapshot_request(snapshot, generation));
        self.requests.push(FeedRequest::SymbolInfo {
            symbol: symbol.clone(),
            generation,
        });
        self.requests.push(FeedRequest::Klines {
            symbol: symbol.clone(),
            generation,
        });
        self.requests.push(FeedRequest::HistOpenInterest { symbol, generation });

        generation
    }

    /// Feed a REST depth snapshot into the synchronizer.
    pub fn gather_depth(&mut self, generation: Generation, json: &str) -> Result<(), DataError> {
        let session = active_session(&mut self.session, generation)?;
        let snapshot = DepthSnapshot::from(serde_json::from_str::<BinanceDepthSnapshot>(json)?);

        if let Some(request) = session.sync.on_snapshot(snapshot) {
            self.requests.push(snapshot_request(request, generation));
        }
        Ok(())
    }

    /// Feed a single depth diff frame into the synchronizer.
    pub fn gather_depth_diff(&mut self, generation: Generation, json: &str) -> Result<(), DataError> {
        let session = active_session(&mut self.session, generation)?;
        let diff = DepthDiff::from(serde_json::from_str::<BinanceDepthDiff>(json)?);

        if let Some(request) = session.sync.on_diff(diff) {
            self.requests.push(snapshot_request(request, generation));
        }
        Ok(())
    }

    /// Feed a single live aggregated trade.
    pub fn gather_trade(&mut self, generation: Generation, json: &str) -> Result<(), DataError> {
        let session = active_session(&mut self.session, generation)?;
        let trade = Trade::from(serde_json::from_str::<BinanceAggTrade>(json)?);
        ingest_live_trade(session, trade);
        Ok(())
    }

    /// Feed a market stream frame, raw or wrapped in the combined stream envelope.
    pub fn gather_stream(&mut self, generation: Generation, json: &str) -> Result<(), DataError> {
        let session = active_session(&mut self.session, generation)?;

        match serde_json::from_str::<BinanceStreamMessage>(json)? {
            BinanceStreamMessage::Depth(diff) => {
                if let Some(request) = session.sync.on_diff(DepthDiff::from(diff)) {
                    self.requests.push(snapshot_request(request, generation));
                }
            }
            BinanceStreamMessage::AggTrade(trade) => ingest_live_trade(session, Trade::from(trade)),
            BinanceStreamMessage::Ignore => trace!(%generation, "ignoring stream frame"),
        }
        Ok(())
    }

    /// Seed candles from klines and queue the historical trade backfill of every seeded window,
    /// live candle first, then newest to oldest.
    pub fn gather_klines(&mut self, generation: Generation, json: &str) -> Result<(), DataError> {
        let session = active_session(&mut self.session, generation)?;
        let klines = serde_json::from_str::<Vec<BinanceKline>>(json)?;

        session.candles.seed(klines.into_iter().map(Candle::from));

        let windows = session.candles.open_times().into_iter().rev().collect::<Vec<_>>();
        if windows.is_empty() {
            debug!(symbol = %session.symbol, "kline seed empty, nothing to backfill");
            return Ok(());
        }

        self.backfill_live_window = windows.first().copied();
        self.requests.push(FeedRequest::BackfillTrades {
            symbol: session.symbol.clone(),
            generation,
            windows,
            interval_ms: session.candles.interval_ms(),
        });
        Ok(())
    }

    /// Merge historical open interest readings.
    pub fn gather_hist_oi(&mut self, generation: Generation, json: &str) -> Result<(), DataError> {
        let session = active_session(&mut self.session, generation)?;
        let history = serde_json::from_str::<Vec<BinanceOpenInterestHist>>(json)?;
        session
            .open_interest
            .extend(history.into_iter().map(OpenInterestPoint::from));
        Ok(())
    }

    /// Merge the current open interest reading.
    pub fn gather_oi(&mut self, generation: Generation, json: &str) -> Result<(), DataError> {
        let session = active_session(&mut self.session, generation)?;
        let current = serde_json::from_str::<BinanceOpenInterest>(json)?;
        session.open_interest.upsert(OpenInterestPoint::from(current));
        Ok(())
    }

    /// Extract the active symbol's metadata from `exchangeInfo` and apply it.
    pub fn gather_symbol_info(&mut self, generation: Generation, json: &str) -> Result<(), DataError> {
        let session = active_session(&mut self.session, generation)?;
        let info = serde_json::from_str::<BinanceExchangeInfo>(json)?;
        let metadata = SymbolMetadata::from_exchange_info(&info, &session.symbol)?;

        let initial = metadata.tick_size * Decimal::from(self.initial_tick_multiple);
        self.set_symbol_info(metadata.tick_size, metadata.min_qty, initial)
            .map_err(|error| DataError::MalformedPayload(error.to_string()))
    }

    /// Replace the trades of the window opening at `window_start` with a historical page set
    /// and recompute its candle.
    pub fn gather_hist_trades(
        &mut self,
        generation: Generation,
        json: &str,
        window_start: u64,
    ) -> Result<(), DataError> {
        active_session(&mut self.session, generation)?;
        let trades = serde_json::from_str::<Vec<BinanceAggTrade>>(json)?
            .into_iter()
            .map(Trade::from)
            .collect::<Vec<_>>();
        self.apply_hist_trades(generation, &trades, window_start)
    }

    /// Typed counterpart of [`ChartManager::gather_hist_trades`].
    ///
    /// The window that was live when the backfill started only refreshes the ledger up to the
    /// latest fetched trade, its candle keeps aggregating live prints.
    pub fn apply_hist_trades(
        &mut self,
        generation: Generation,
        trades: &[Trade],
        window_start: u64,
    ) -> Result<(), DataError> {
        let session = active_session(&mut self.session, generation)?;
        let window_end = window_start + session.candles.interval_ms();
        let live_open = session.candles.live().map(|candle| candle.open_time);

        let was_live = self.backfill_live_window == Some(window_start) || live_open == Some(window_start);
        if was_live {
            let fetched_until = trades
                .iter()
                .map(|trade| trade.time + 1)
                .max()
                .unwrap_or(window_start)
                .min(window_end);
            session.ledger.replace_window(window_start, fetched_until, trades);
            debug!(window_start, fetched_until, "live window ledger refreshed from backfill");
            return Ok(());
        }

        session.ledger.replace_window(window_start, window_end, trades);
        session.candles.ingest_historical_trades(trades, window_start)
    }

    /// Store symbol metadata and select the initial tick size.
    pub fn set_symbol_info(
        &mut self,
        tick_size: Decimal,
        min_qty: Decimal,
        initial_tick_size: Decimal,
    ) -> Result<(), ViewportError> {
        if tick_size <= Decimal::ZERO {
            return Err(ViewportError::InvalidTickSize(tick_size));
        }

        let metadata = SymbolMetadata::new(tick_size, min_qty);
        if let Some(session) = self.session.as_mut() {
            session.metadata = metadata;
        }
        self.viewport.set_symbol_info(metadata, initial_tick_size);
        Ok(())
    }

    pub fn set_tick_size(&mut self, tick_size: Decimal) -> Result<Decimal, ViewportError> {
        self.viewport.set_tick_size(tick_size)
    }

    /// Pan by `dx`/`dy` dots. The vertical part is rejected while autoscale is on.
    pub fn pan_xy(&mut self, dx: f64, dy: f64) -> Result<(), ViewportError> {
        self.ensure_price_window();
        self.viewport.pan(dx, dy)
    }

    pub fn zoom_x(&mut self, delta: f64) {
        self.viewport.zoom_x(delta);
    }

    pub fn zoom_y(&mut self, delta: f64) -> Result<(), ViewportError> {
        self.ensure_price_window();
        self.viewport.zoom_y(delta)
    }

    /// Flip autoscale. Turning it off seeds the manual price window from the current autoscaled
    /// range so the chart does not jump.
    pub fn toggle_autoscale(&mut self) -> bool {
        let autoscale = !self.viewport.autoscale();
        if !autoscale {
            let view = self.view();
            let window = view.time_window();
            if let Some((low, high)) = view.autoscale_range(&window) {
                self.viewport.seed_price_window(low, high);
            }
        }

        self.viewport.set_autoscale(autoscale);
        info!(autoscale, "autoscale toggled");
        autoscale
    }

    pub fn get_autoscale(&self) -> bool {
        self.viewport.autoscale()
    }

    /// Record surface sizes in dots, ordered main, depth, volume, open interest.
    pub fn resize(&mut self, widths: &[f64], heights: &[f64]) -> Result<(), ViewportError> {
        self.viewport.resize(widths, heights)
    }

    /// Ascending open times of every candle.
    pub fn get_kline_ohlcv_keys(&self) -> Vec<u64> {
        self.session
            .as_ref()
            .map(|session| session.candles.open_times())
            .unwrap_or_default()
    }

    /// Start the render tick. Returns `false` if it was already running.
    pub fn render_start(&mut self) -> bool {
        if self.rendering {
            return false;
        }
        self.rendering = true;
        info!(interval = ?self.render_interval, "render tick started");
        true
    }

    pub fn is_rendering(&self) -> bool {
        self.rendering
    }

    pub fn render_interval(&self) -> Duration {
        self.render_interval
    }

    /// Take every queued collaborator request.
    pub fn drain_requests(&mut self) -> Vec<FeedRequest> {
        std::mem::take(&mut self.requests)
    }

    /// Route a collaborator result to its `gather_*` method, logging rejected payloads.
    pub fn apply_event(&mut self, event: FeedEvent) {
        let generation = event.generation();
        let result = match event {
            FeedEvent::Status { status, .. } => {
                active_session(&mut self.session, generation).map(|_| self.connection = status)
            }
            FeedEvent::Stream { text, .. } => self.gather_stream(generation, &text),
            FeedEvent::DepthSnapshot { body, .. } => self.gather_depth(generation, &body),
            FeedEvent::Klines { body, .. } => self.gather_klines(generation, &body),
            FeedEvent::HistOpenInterest { body, .. } => self.gather_hist_oi(generation, &body),
            FeedEvent::OpenInterest { body, .. } => self.gather_oi(generation, &body),
            FeedEvent::SymbolInfo { body, .. } => self.gather_symbol_info(generation, &body),
            FeedEvent::BackfillStarted { window_start, .. } => {
                active_session(&mut self.session, generation)
                    .map(|_| self.backfill_focus = Some(window_start))
            }
            FeedEvent::HistTrades {
                window_start,
                trades,
                ..
            } => {
                self.backfill_focus = None;
                self.apply_hist_trades(generation, &trades, window_start)
            }
            FeedEvent::BackfillFailed {
                window_start,
                reason,
                ..
            } => active_session(&mut self.session, generation).map(|_| {
                warn!(window_start, %reason, "historical trade backfill gave up");
                self.backfill_focus = None;
            }),
            FeedEvent::BackfillFinished { .. } => {
                active_session(&mut self.session, generation).map(|_| {
                    info!(%generation, "historical trade backfill complete");
                    self.backfill_focus = None;
                })
            }
        };

        if let Err(error) = result {
            log_rejected(&error);
        }
    }

    /// Evict ledger trades and open interest readings far outside the visible window. Returns
    /// the number of trades evicted.
    pub fn maintain(&mut self) -> usize {
        let (visible, live_open, interval_ms) = {
            let view = self.view();
            let Some(session) = view.session else {
                return 0;
            };
            (
                view.time_window(),
                session.candles.live().map(|candle| candle.open_time),
                session.candles.interval_ms(),
            )
        };

        let Some(session) = self.session.as_mut() else {
            return 0;
        };

        let span = visible.end.saturating_sub(visible.start);
        let window = EvictionWindow {
            visible: visible.clone(),
            live_open,
            protected: self
                .backfill_focus
                .map(|window_start| window_start..window_start + interval_ms),
        };

        let evicted = session.ledger.evict(&window);
        session
            .open_interest
            .prune_before(visible.start.saturating_sub(span));
        evicted
    }

    /// Immutable snapshot of everything the renderer reads this tick.
    pub fn view(&self) -> ChartView<'_> {
        ChartView {
            session: self.session.as_ref(),
            viewport: &self.viewport,
            connection: self.connection,
            rendering: self.rendering,
            render_interval: self.render_interval,
            backfill_focus: self.backfill_focus,
        }
    }

    fn ensure_price_window(&mut self) {
        if self.viewport.autoscale() || self.viewport.price_window().is_some() {
            return;
        }

        let view = self.view();
        let window = view.time_window();
        if let Some((low, high)) = view.autoscale_range(&window) {
            self.viewport.seed_price_window(low, high);
        }
    }
}

/// Read only view of the chart for one render tick.
#[derive(Debug, Clone, Copy)]
pub struct ChartView<'a> {
    pub session: Option<&'a Session>,
    pub viewport: &'a Viewport,
    pub connection: ConnectionStatus,
    pub rendering: bool,
    pub render_interval: Duration,
    pub backfill_focus: Option<u64>,
}

impl ChartView<'_> {
    /// Open time of the newest candle, or of the interval holding the newest trade.
    pub fn latest_open(&self) -> u64 {
        let Some(session) = self.session else {
            return 0;
        };

        session
            .candles
            .live()
            .map(|candle| candle.open_time)
            .or_else(|| session.ledger.last_time().map(|time| session.candles.align(time)))
            .unwrap_or_default()
    }

    pub fn time_window(&self) -> Range<u64> {
        self.viewport.time_window(self.latest_open())
    }

    /// Lowest low and highest high of the candles in `window` together with the best bid and
    /// ask, padded by the mean candle body.
    pub fn autoscale_range(&self, window: &Range<u64>) -> Option<(f64, f64)> {
        let session = self.session?;
        let book = session.sync.book();

        let candles = session.candles.candles_in(window.clone()).collect::<Vec<_>>();
        let prices = candles
            .iter()
            .flat_map(|candle| [candle.high, candle.low])
            .chain(book.best_bid().map(|level| level.price))
            .chain(book.best_ask().map(|level| level.price));

        let (low, high) = match prices.minmax() {
            MinMaxResult::NoElements => return None,
            MinMaxResult::OneElement(price) => (price, price),
            MinMaxResult::MinMax(low, high) => (low, high),
        };

        let mean_body = if candles.is_empty() {
            Decimal::ZERO
        } else {
            candles
                .iter()
                .map(|candle| (candle.close - candle.open).abs())
                .sum::<Decimal>()
                / Decimal::from(candles.len())
        };

        let low = low.to_f64()?;
        let high = high.to_f64()?;
        let mean_body = mean_body.to_f64().unwrap_or_default();

        let padding = if mean_body > 0.0 {
            mean_body
        } else if high > low {
            (high - low) * FALLBACK_PADDING_RATIO
        } else {
            self.viewport.tick_size().to_f64().unwrap_or(1.0)
        };

        Some((low - padding, high + padding))
    }

    /// Price range painted this tick: the manual window, or the autoscaled range.
    pub fn price_range(&self, window: &Range<u64>) -> Option<(f64, f64)> {
        self.viewport.price_range(self.autoscale_range(window))
    }
}

fn active_session(
    session: &mut Option<Session>,
    generation: Generation,
) -> Result<&mut Session, DataError> {
    let session = session.as_mut().ok_or(DataError::NoActiveSymbol)?;
    session.check(generation)?;
    Ok(session)
}

fn ingest_live_trade(session: &mut Session, trade: Trade) {
    match session.candles.ingest_trade(&trade) {
        Ok(Some(sealed)) => debug!(symbol = %session.symbol, sealed, "candle sealed"),
        Ok(None) => {}
        Err(error) => debug!(symbol = %session.symbol, %error, "late trade kept in ledger only"),
    }
    session.ledger.append(trade);
}

fn snapshot_request(request: SnapshotRequest, generation: Generation) -> FeedRequest {
    FeedRequest::DepthSnapshot {
        symbol: request.symbol,
        generation,
        attempt: request.attempt,
        delay: request.delay,
    }
}

fn log_rejected(error: &DataError) {
    if error.is_stale_generation() {
        trace!(%error, "discarding result for replaced symbol");
    } else if let DataError::MalformedPayload(_) = error {
        warn!(%error, "dropping malformed payload");
    } else {
        debug!(%error, "payload rejected");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn manager() -> (ChartManager, Generation) {
        let mut manager = ChartManager::new(SyncConfig::default(), Duration::from_millis(33));
        manager
            .resize(&[200.0, 80.0, 200.0, 200.0], &[100.0, 100.0, 40.0, 40.0])
            .unwrap();
        let generation = manager.change_symbol("btcusdt");
        manager.drain_requests();
        (manager, generation)
    }

    #[test]
    fn test_change_symbol_queues_initial_requests() {
        let mut manager = ChartManager::new(SyncConfig::default(), Duration::from_millis(33));
        let generation = manager.change_symbol("ethusdt");

        let requests = manager.drain_requests();
        assert_eq!(generation, Generation(1));
        assert_eq!(
            requests,
            vec![
                FeedRequest::Subscribe {
                    symbol: SmolStr::new("ETHUSDT"),
                    generation,
                },
                FeedRequest::DepthSnapshot {
                    symbol: SmolStr::new("ETHUSDT"),
                    generation,
                    attempt: 1,
                    delay: Duration::ZERO,
                },
                FeedRequest::SymbolInfo {
                    symbol: SmolStr::new("ETHUSDT"),
                    generation,
                },
                FeedRequest::Klines {
                    symbol: SmolStr::new("ETHUSDT"),
                    generation,
                },
                FeedRequest::HistOpenInterest {
                    symbol: SmolStr::new("ETHUSDT"),
                    generation,
                },
            ]
        );
        assert!(manager.drain_requests().is_empty());
    }

    #[test]
    fn test_gather_without_symbol() {
        let mut manager = ChartManager::new(SyncConfig::default(), Duration::from_millis(33));
        assert_eq!(
            manager.gather_oi(Generation(0), r#"{"openInterest": "1", "time": 1}"#),
            Err(DataError::NoActiveSymbol)
        );
    }

    #[test]
    fn test_malformed_payload_keeps_state() {
        let (mut manager, generation) = manager();
        manager
            .gather_depth(
                generation,
                r#"{"lastUpdateId": 100, "bids": [["100", "5"]], "asks": [["101", "3"]]}"#,
            )
            .unwrap();

        let result = manager.gather_depth(generation, r#"{"lastUpdateId": "x"}"#);
        assert!(matches!(result, Err(DataError::MalformedPayload(_))));

        let book = manager.session().unwrap().sync.book();
        assert_eq!(book.last_update_id(), 100);
        assert_eq!(book.best_bid().map(|level| level.price), Some(dec!(100)));
    }

    #[test]
    fn test_gather_klines_queues_backfill_live_first() {
        let (mut manager, generation) = manager();
        manager
            .gather_klines(
                generation,
                r#"[
                    [0, "10", "12", "9", "11", "100", 59999],
                    [60000, "11", "13", "10", "12", "50", 119999],
                    [120000, "12", "12", "12", "12", "1", 179999]
                ]"#,
            )
            .unwrap();

        assert_eq!(manager.get_kline_ohlcv_keys(), vec![0, 60_000, 120_000]);
        assert_eq!(
            manager.drain_requests(),
            vec![FeedRequest::BackfillTrades {
                symbol: SmolStr::new("BTCUSDT"),
                generation,
                windows: vec![120_000, 60_000, 0],
                interval_ms: 60_000,
            }]
        );
    }

    #[test]
    fn test_hist_trades_recompute_sealed_candle_and_refresh_live_ledger() {
        let (mut manager, generation) = manager();
        manager
            .gather_klines(
                generation,
                r#"[
                    [0, "10", "12", "9", "11", "100", 59999],
                    [60000, "11", "13", "10", "12", "50", 119999]
                ]"#,
            )
            .unwrap();

        // Sealed window is recomputed from its trades
        let sealed = vec![
            Trade::new(dec!(10), dec!(1), 0, false),
            Trade::new(dec!(14), dec!(2), 30_000, true),
            Trade::new(dec!(11), dec!(1), 59_999, false),
        ];
        manager.apply_hist_trades(generation, &sealed, 0).unwrap();

        let candle = *manager.session().unwrap().candles.get(0).unwrap();
        assert_eq!(candle.high, dec!(14));
        assert_eq!(candle.volume, dec!(4));
        assert_eq!(candle.buy_volume, dec!(2));

        // Live window only refreshes the ledger, newer live prints survive
        manager
            .gather_trade(generation, r#"{"a": 9, "p": "12.5", "q": "1", "T": 90000, "m": false}"#)
            .unwrap();
        let live = vec![Trade::new(dec!(12), dec!(3), 61_000, true)];
        manager.apply_hist_trades(generation, &live, 60_000).unwrap();

        let session = manager.session().unwrap();
        assert_eq!(
            session
                .ledger
                .trades_in_window(60_000, 120_000)
                .map(|trade| trade.time)
                .collect::<Vec<_>>(),
            vec![61_000, 90_000]
        );
        assert_eq!(session.candles.live().map(|candle| candle.close), Some(dec!(12.5)));
    }

    #[test]
    fn test_toggle_autoscale_seeds_price_window() {
        let (mut manager, generation) = manager();
        manager
            .gather_klines(generation, r#"[[0, "100", "110", "90", "100", "1", 59999]]"#)
            .unwrap();

        assert_eq!(manager.zoom_y(10.0), Err(ViewportError::AutoscaleActive));
        assert!(!manager.toggle_autoscale());
        assert!(!manager.get_autoscale());

        // Flat body falls back to 5% of the range
        assert_eq!(manager.viewport().price_range(None), Some((89.0, 111.0)));
        assert_eq!(manager.zoom_y(0.0), Ok(()));
        assert!(manager.toggle_autoscale());
    }

    #[test]
    fn test_set_symbol_info_selects_initial_tick() {
        let (mut manager, _) = manager();
        manager
            .set_symbol_info(dec!(0.1), dec!(0.001), dec!(1))
            .unwrap();

        assert_eq!(manager.viewport().tick_size(), dec!(1));
        assert_eq!(manager.session().unwrap().metadata.tick_size, dec!(0.1));
        assert_eq!(
            manager.set_symbol_info(dec!(0), dec!(0.001), dec!(1)),
            Err(ViewportError::InvalidTickSize(dec!(0)))
        );
    }

    #[test]
    fn test_maintain_evicts_distant_trades() {
        let (mut manager, generation) = manager();
        for time in [0u64, 600_000, 36_000_000] {
            let json = format!(r#"{{"a": 1, "p": "10", "q": "1", "T": {time}, "m": false}}"#);
            manager.gather_trade(generation, &json).unwrap();
        }

        // Visible window spans 30 minutes ending two intervals past the live candle
        let evicted = manager.maintain();
        assert_eq!(evicted, 2);
        assert_eq!(manager.session().unwrap().ledger.len(), 1);
    }
}
