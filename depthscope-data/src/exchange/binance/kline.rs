use crate::candle::{Candle, KLINE_INTERVAL_MS};
use rust_decimal::Decimal;
use serde::{Deserialize, Deserializer, de::Error};
use serde_json::Value;
use std::str::FromStr;

/// [`Binance`](super) kline row from the `klines` REST endpoint.
///
/// Only the leading seven columns are required. Column 9 (taker buy base volume) feeds
/// [`Candle::buy_volume`] when present.
///
/// #### Raw Payload Examples
/// See docs: <https://developers.binance.com/docs/derivatives/usds-margined-futures/market-data/rest-api/Kline-Candlestick-Data>
///
/// ```json
/// [1499040000000, "0.01634790", "0.80000000", "0.01575800", "0.01577100", "148976.11427815",
///  1499644799999, "2434.19055334", 308, "1756.87402397", "28.46694368", "0"]
/// ```
#[derive(Clone, Copy, PartialEq, Debug)]
pub struct BinanceKline {
    pub open_time: u64,
    pub open: Decimal,
    pub high: Decimal,
    pub low: Decimal,
    pub close: Decimal,
    pub volume: Decimal,
    pub close_time: u64,
    pub taker_buy_volume: Option<Decimal>,
}

impl<'de> Deserialize<'de> for BinanceKline {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let row = Vec::<Value>::deserialize(deserializer)?;

        if row.len() < 7 {
            return Err(D::Error::custom(format!(
                "kline row has {} columns, expected at least 7",
                row.len()
            )));
        }

        Ok(Self {
            open_time: de_u64(&row[0]).map_err(D::Error::custom)?,
            open: de_decimal(&row[1]).map_err(D::Error::custom)?,
            high: de_decimal(&row[2]).map_err(D::Error::custom)?,
            low: de_decimal(&row[3]).map_err(D::Error::custom)?,
            close: de_decimal(&row[4]).map_err(D::Error::custom)?,
            volume: de_decimal(&row[5]).map_err(D::Error::custom)?,
            close_time: de_u64(&row[6]).map_err(D::Error::custom)?,
            taker_buy_volume: row
                .get(9)
                .map(de_decimal)
                .transpose()
                .map_err(D::Error::custom)?,
        })
    }
}

impl From<BinanceKline> for Candle {
    fn from(kline: BinanceKline) -> Self {
        Self {
            open_time: kline.open_time,
            close_time: kline.open_time + KLINE_INTERVAL_MS,
            open: kline.open,
            high: kline.high,
            low: kline.low,
            close: kline.close,
            volume: kline.volume,
            buy_volume: kline.taker_buy_volume.unwrap_or(Decimal::ZERO),
        }
    }
}

fn de_u64(value: &Value) -> Result<u64, String> {
    value
        .as_u64()
        .ok_or_else(|| format!("expected unsigned integer timestamp, found {value}"))
}

fn de_decimal(value: &Value) -> Result<Decimal, String> {
    match value {
        Value::String(raw) => Decimal::from_str(raw).map_err(|error| format!("{raw}: {error}")),
        Value::Number(number) => {
            Decimal::from_str(&number.to_string()).map_err(|error| format!("{number}: {error}"))
        }
        other => Err(format!("expected decimal, found {other}")),
    }
}
