use crate::trade::Trade;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// [`Binance`](super) aggregated trade, shared by the `aggTrades` REST page and the
/// `<symbol>@aggTrade` WebSocket stream.
///
/// #### Raw Payload Examples
/// See docs: <https://developers.binance.com/docs/derivatives/usds-margined-futures/market-data/rest-api/Compressed-Aggregate-Trades-List>
///
/// ```json
/// {"a": 26129, "p": "0.01633102", "q": "4.70443515", "f": 27781, "l": 27781, "T": 1498793709153, "m": true}
/// ```
#[derive(Clone, Copy, PartialEq, Debug, Deserialize, Serialize)]
pub struct BinanceAggTrade {
    #[serde(rename = "a", default)]
    pub id: u64,
    #[serde(rename = "p", with = "rust_decimal::serde::str")]
    pub price: Decimal,
    #[serde(rename = "q", with = "rust_decimal::serde::str")]
    pub quantity: Decimal,
    #[serde(rename = "T")]
    pub time: u64,
    #[serde(rename = "m")]
    pub is_buyer_maker: bool,
}

impl From<BinanceAggTrade> for Trade {
    fn from(trade: BinanceAggTrade) -> Self {
        Self {
            price: trade.price,
            quantity: trade.quantity,
            time: trade.time,
            is_buyer_maker: trade.is_buyer_maker,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    mod de {
        use super::*;
        use rust_decimal_macros::dec;

        #[test]
        fn test_binance_agg_trade_page() {
            let input = r#"
            [
                {"a": 26129, "p": "0.01633102", "q": "4.70443515", "f": 27781, "l": 27781, "T": 1498793709153, "m": true},
                {"a": 26130, "p": "0.01633103", "q": "1.00000000", "f": 27782, "l": 27783, "T": 1498793709160, "m": false}
            ]"#;

            let actual = serde_json::from_str::<Vec<BinanceAggTrade>>(input)
                .unwrap()
                .into_iter()
                .map(Trade::from)
                .collect::<Vec<_>>();

            assert_eq!(
                actual,
                vec![
                    Trade::new(dec!(0.01633102), dec!(4.70443515), 1498793709153, true),
                    Trade::new(dec!(0.01633103), dec!(1.00000000), 1498793709160, false),
                ]
            );
        }
    }
}
