use crate::{
    books::sync::{OrderBookSynchronizer, SnapshotRequest, SyncConfig},
    candle::CandleAggregator,
    error::DataError,
    exchange::binance::info::BinanceExchangeInfo,
    open_interest::OpenInterestSeries,
    trade::TradeLedger,
};
use derive_more::{Constructor, Display};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use smol_str::SmolStr;
use tracing::info;

/// Monotonically increasing identifier of the active [`Session`].
///
/// Every asynchronous result carries the generation it was requested under, so late results for
/// a replaced symbol can be recognised and dropped.
#[derive(
    Debug, Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Hash, Default, Deserialize, Serialize, Display, Constructor,
)]
#[display("gen-{_0}")]
pub struct Generation(pub u64);

impl Generation {
    pub fn next(self) -> Self {
        Self(self.0 + 1)
    }
}

/// Quantisation constants for a symbol.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash, Deserialize, Serialize, Constructor)]
pub struct SymbolMetadata {
    pub tick_size: Decimal,
    pub min_qty: Decimal,
}

impl Default for SymbolMetadata {
    fn default() -> Self {
        Self {
            tick_size: Decimal::new(1, 2),
            min_qty: Decimal::new(1, 3),
        }
    }
}

impl SymbolMetadata {
    /// Extract `PRICE_FILTER.tickSize` and `LOT_SIZE.minQty` for `symbol` from `exchangeInfo`.
    pub fn from_exchange_info(info: &BinanceExchangeInfo, symbol: &str) -> Result<Self, DataError> {
        let entry = info
            .symbols
            .iter()
            .find(|entry| entry.symbol.eq_ignore_ascii_case(symbol))
            .ok_or_else(|| {
                DataError::MalformedPayload(format!("exchangeInfo has no entry for {symbol}"))
            })?;

        let tick_size = entry.tick_size().ok_or_else(|| {
            DataError::MalformedPayload(format!("{symbol} is missing PRICE_FILTER.tickSize"))
        })?;
        let min_qty = entry.min_qty().ok_or_else(|| {
            DataError::MalformedPayload(format!("{symbol} is missing LOT_SIZE.minQty"))
        })?;

        if tick_size <= Decimal::ZERO {
            return Err(DataError::MalformedPayload(format!(
                "{symbol} has non-positive tickSize {tick_size}"
            )));
        }

        Ok(Self::new(tick_size, min_qty))
    }
}

/// Everything owned on behalf of the active symbol. Replaced wholesale on symbol change.
#[derive(Debug, Clone)]
pub struct Session {
    pub symbol: SmolStr,
    pub generation: Generation,
    pub metadata: SymbolMetadata,
    pub sync: OrderBookSynchronizer,
    pub candles: CandleAggregator,
    pub ledger: TradeLedger,
    pub open_interest: OpenInterestSeries,
}

impl Session {
    /// Open a session for `symbol`, returning the initial depth snapshot request.
    pub fn open(
        symbol: impl Into<SmolStr>,
        generation: Generation,
        config: SyncConfig,
    ) -> (Self, SnapshotRequest) {
        let symbol = symbol.into();
        let mut sync = OrderBookSynchronizer::new(config);
        let request = sync.change_symbol(symbol.clone());

        info!(%symbol, %generation, "session opened");

        let session = Self {
            symbol,
            generation,
            metadata: SymbolMetadata::default(),
            sync,
            candles: CandleAggregator::new(),
            ledger: TradeLedger::new(),
            open_interest: OpenInterestSeries::new(),
        };

        (session, request)
    }

    /// Ensure a result requested under `generation` belongs to this session.
    pub fn check(&self, generation: Generation) -> Result<(), DataError> {
        if generation == self.generation {
            Ok(())
        } else {
            Err(DataError::SymbolMismatch {
                active: self.generation,
                received: generation,
            })
        }
    }
}
