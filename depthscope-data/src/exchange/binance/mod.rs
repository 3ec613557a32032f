use self::{book::BinanceDepthDiff, trade::BinanceAggTrade};
use serde::{Deserialize, Deserializer};
use serde_json::Value;

/// Depth snapshot and diff payloads.
pub mod book;

/// `exchangeInfo` symbol filters.
pub mod info;

/// Kline rows used to seed candles.
pub mod kline;

/// Current and historical open interest.
pub mod open_interest;

/// Aggregated trades.
pub mod trade;

/// Binance USD-M futures REST base url.
pub const BASE_URL_BINANCE_USDT_REST: &str = "https://fapi.binance.com";

/// Binance USD-M futures combined stream base url.
pub const BASE_URL_BINANCE_USDT_WS: &str = "wss://fstream.binance.com/stream";

/// Stream names subscribed for `symbol` on the combined stream endpoint.
pub fn stream_names(symbol: &str) -> [String; 2] {
    let symbol = symbol.to_lowercase();
    [
        format!("{symbol}@aggTrade"),
        format!("{symbol}@depth@100ms"),
    ]
}

/// Messages received on the Binance market WebSocket.
///
/// Frames may arrive raw or wrapped in the combined stream envelope `{"stream": .., "data": ..}`.
/// Anything that is neither a depth diff nor an aggregated trade is ignored.
#[derive(Clone, Debug, PartialEq)]
pub enum BinanceStreamMessage {
    Ignore,
    Depth(BinanceDepthDiff),
    AggTrade(BinanceAggTrade),
}

impl<'de> Deserialize<'de> for BinanceStreamMessage {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let mut value = Value::deserialize(deserializer)?;

        // Unwrap combined stream envelope
        if let Some(data) = value.get_mut("data").map(Value::take) {
            value = data;
        }

        let event = value.get("e").and_then(Value::as_str).map(str::to_owned);
        match event.as_deref() {
            Some("depthUpdate") => serde_json::from_value(value)
                .map(BinanceStreamMessage::Depth)
                .map_err(serde::de::Error::custom),
            Some("aggTrade") => serde_json::from_value(value)
                .map(BinanceStreamMessage::AggTrade)
                .map_err(serde::de::Error::custom),
            None if value.get("U").is_some() && value.get("u").is_some() => {
                serde_json::from_value(value)
                    .map(BinanceStreamMessage::Depth)
                    .map_err(serde::de::Error::custom)
            }
            _ => Ok(BinanceStreamMessage::Ignore),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    mod de {
        use super::*;
        use crate::exchange::binance::book::BinanceLevel;
        use rust_decimal_macros::dec;

        #[test]
        fn test_binance_stream_message() {
            struct TestCase {
                input: &'static str,
                expected: BinanceStreamMessage,
            }

            let diff = BinanceDepthDiff {
                first_update_id: 99,
                final_update_id: 102,
                prev_final_update_id: Some(98),
                bids: vec![BinanceLevel {
                    price: dec!(100),
                    quantity: dec!(0),
                }],
                asks: vec![],
            };

            let tests = vec![
                TestCase {
                    // TC0: combined stream depth diff
                    input: r#"{"stream": "btcusdt@depth@100ms", "data": {"e": "depthUpdate", "E": 1, "T": 1, "s": "BTCUSDT", "U": 99, "u": 102, "pu": 98, "b": [["100", "0"]], "a": []}}"#,
                    expected: BinanceStreamMessage::Depth(diff.clone()),
                },
                TestCase {
                    // TC1: raw depth diff without event type
                    input: r#"{"U": 99, "u": 102, "b": [["100", "0"]], "a": []}"#,
                    expected: BinanceStreamMessage::Depth(BinanceDepthDiff {
                        prev_final_update_id: None,
                        ..diff
                    }),
                },
                TestCase {
                    // TC2: combined stream aggregated trade
                    input: r#"{"stream": "btcusdt@aggTrade", "data": {"e": "aggTrade", "E": 2, "s": "BTCUSDT", "a": 5, "p": "101.5", "q": "0.2", "f": 7, "l": 7, "T": 60001, "m": false}}"#,
                    expected: BinanceStreamMessage::AggTrade(BinanceAggTrade {
                        id: 5,
                        price: dec!(101.5),
                        quantity: dec!(0.2),
                        time: 60001,
                        is_buyer_maker: false,
                    }),
                },
                TestCase {
                    // TC3: subscription response
                    input: r#"{"result": null, "id": 1}"#,
                    expected: BinanceStreamMessage::Ignore,
                },
            ];

            for (index, test) in tests.into_iter().enumerate() {
                let actual = serde_json::from_str::<BinanceStreamMessage>(test.input).unwrap();
                assert_eq!(actual, test.expected, "TC{} failed", index);
            }
        }

        #[test]
        fn test_binance_stream_message_malformed_depth() {
            let input = r#"{"stream": "btcusdt@depth@100ms", "data": {"e": "depthUpdate", "U": "x"}}"#;
            assert!(serde_json::from_str::<BinanceStreamMessage>(input).is_err());
        }

        #[test]
        fn test_stream_names() {
            assert_eq!(
                stream_names("BTCUSDT"),
                ["btcusdt@aggTrade".to_string(), "btcusdt@depth@100ms".to_string()]
            );
        }
    }
}
