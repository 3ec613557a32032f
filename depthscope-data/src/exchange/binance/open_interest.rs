use crate::open_interest::OpenInterestPoint;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// [`Binance`](super) current open interest.
///
/// #### Raw Payload Examples
/// See docs: <https://developers.binance.com/docs/derivatives/usds-margined-futures/market-data/rest-api/Open-Interest>
///
/// ```json
/// {"openInterest": "10659.509", "symbol": "BTCUSDT", "time": 1589437530011}
/// ```
#[derive(Clone, PartialEq, Debug, Deserialize, Serialize)]
pub struct BinanceOpenInterest {
    #[serde(rename = "openInterest", with = "rust_decimal::serde::str")]
    pub open_interest: Decimal,
    pub time: u64,
}

impl From<BinanceOpenInterest> for OpenInterestPoint {
    fn from(value: BinanceOpenInterest) -> Self {
        Self {
            time: value.time,
            open_interest: value.open_interest,
        }
    }
}

/// [`Binance`](super) open interest history row.
///
/// See docs: <https://developers.binance.com/docs/derivatives/usds-margined-futures/market-data/rest-api/Open-Interest-Statistics>
///
/// ```json
/// {"symbol": "BTCUSDT", "sumOpenInterest": "20403.63700000",
///  "sumOpenInterestValue": "150570784.07809979", "timestamp": 1583127900000}
/// ```
#[derive(Clone, PartialEq, Debug, Deserialize, Serialize)]
pub struct BinanceOpenInterestHist {
    #[serde(rename = "sumOpenInterest", with = "rust_decimal::serde::str")]
    pub sum_open_interest: Decimal,
    pub timestamp: u64,
}

impl From<BinanceOpenInterestHist> for OpenInterestPoint {
    fn from(value: BinanceOpenInterestHist) -> Self {
        Self {
            time: value.timestamp,
            open_interest: value.sum_open_interest,
        }
    }
}
