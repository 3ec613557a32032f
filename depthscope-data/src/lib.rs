#![forbid(unsafe_code)]
#![warn(
    unused,
    clippy::cognitive_complexity,
    unused_extern_crates,
    clippy::unused_self,
    clippy::useless_let_if_seq,
    missing_debug_implementations,
    rust_2018_idioms
)]
#![allow(clippy::type_complexity)]

//! # Depthscope-Data
//! Normalised market state behind the depthscope chart for Binance USD-M futures.
//!
//! * **OrderBook**: sorted bid/ask ladder kept in sync from a REST snapshot plus the WebSocket
//!   diff stream, see [`books::sync::OrderBookSynchronizer`].
//! * **Candles**: gapless one-minute OHLCV sequence built from kline seeds, live trades and
//!   historical trade backfill, see [`candle::CandleAggregator`].
//! * **Trades**: chronological [`trade::TradeLedger`] backing the bubble overlay.
//! * **Open interest**: [`open_interest::OpenInterestSeries`] for the indicator pane.
//!
//! Raw exchange payloads are parsed at the boundary by the [`exchange::binance`] wire types and
//! everything for the active symbol lives in one [`session::Session`], replaced wholesale on
//! symbol change.

/// All [`Error`](std::error::Error)s generated in Depthscope-Data.
pub mod error;

/// [`OrderBook`](books::OrderBook) and its diff-depth synchronizer.
pub mod books;

/// One-minute [`Candle`](candle::Candle) aggregation.
pub mod candle;

/// [`Trade`](trade::Trade) prints and the [`TradeLedger`](trade::TradeLedger).
pub mod trade;

/// Open interest time series.
pub mod open_interest;

/// Exchange wire payloads and their conversion into normalised types.
pub mod exchange;

/// Per-symbol [`Session`](session::Session) and its [`Generation`](session::Generation).
pub mod session;

pub use error::{DataError, SyncError};
pub use session::{Generation, Session, SymbolMetadata};
