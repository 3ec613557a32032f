use crate::books::{DepthDiff, DepthSnapshot, Level};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// [`Binance`](super) OrderBook level.
///
/// #### Raw Payload Examples
/// See docs: <https://developers.binance.com/docs/derivatives/usds-margined-futures/market-data/rest-api/Order-Book>
///
/// ```json
/// ["4.00000000", "431.00000000"]
/// ```
#[derive(Clone, Copy, PartialEq, PartialOrd, Debug, Deserialize, Serialize)]
pub struct BinanceLevel {
    #[serde(with = "rust_decimal::serde::str")]
    pub price: Decimal,
    #[serde(with = "rust_decimal::serde::str")]
    pub quantity: Decimal,
}

impl From<BinanceLevel> for Level {
    fn from(level: BinanceLevel) -> Self {
        Self {
            price: level.price,
            quantity: level.quantity,
        }
    }
}

/// [`Binance`](super) REST depth snapshot.
///
/// ```json
/// {"lastUpdateId": 1027024, "E": 1589436922972, "T": 1589436922959,
///  "bids": [["4.00000000", "431.00000000"]], "asks": [["4.00000200", "12.00000000"]]}
/// ```
#[derive(Clone, PartialEq, Debug, Deserialize, Serialize)]
pub struct BinanceDepthSnapshot {
    #[serde(rename = "lastUpdateId")]
    pub last_update_id: u64,
    pub bids: Vec<BinanceLevel>,
    pub asks: Vec<BinanceLevel>,
}

impl From<BinanceDepthSnapshot> for DepthSnapshot {
    fn from(snapshot: BinanceDepthSnapshot) -> Self {
        Self {
            last_update_id: snapshot.last_update_id,
            bids: snapshot.bids.into_iter().map(Level::from).collect(),
            asks: snapshot.asks.into_iter().map(Level::from).collect(),
        }
    }
}

/// [`Binance`](super) diff depth WebSocket frame.
///
/// See docs: <https://developers.binance.com/docs/derivatives/usds-margined-futures/websocket-market-streams/Diff-Book-Depth-Streams>
///
/// ```json
/// {"e": "depthUpdate", "E": 123456789, "T": 123456788, "s": "BTCUSDT",
///  "U": 157, "u": 160, "pu": 149, "b": [["0.0024", "10"]], "a": [["0.0026", "100"]]}
/// ```
#[derive(Clone, PartialEq, Debug, Deserialize, Serialize)]
pub struct BinanceDepthDiff {
    #[serde(rename = "U")]
    pub first_update_id: u64,
    #[serde(rename = "u")]
    pub final_update_id: u64,
    #[serde(rename = "pu", default)]
    pub prev_final_update_id: Option<u64>,
    #[serde(rename = "b")]
    pub bids: Vec<BinanceLevel>,
    #[serde(rename = "a")]
    pub asks: Vec<BinanceLevel>,
}

impl From<BinanceDepthDiff> for DepthDiff {
    fn from(diff: BinanceDepthDiff) -> Self {
        Self {
            first_update_id: diff.first_update_id,
            final_update_id: diff.final_update_id,
            prev_final_update_id: diff.prev_final_update_id,
            bids: diff.bids.into_iter().map(Level::from).collect(),
            asks: diff.asks.into_iter().map(Level::from).collect(),
        }
    }
}
