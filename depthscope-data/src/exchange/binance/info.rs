use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use smol_str::SmolStr;

/// [`Binance`](super) `exchangeInfo` response, reduced to the per-symbol filters.
///
/// See docs: <https://developers.binance.com/docs/derivatives/usds-margined-futures/market-data/rest-api/Exchange-Information>
#[derive(Clone, PartialEq, Debug, Deserialize, Serialize)]
pub struct BinanceExchangeInfo {
    pub symbols: Vec<BinanceSymbolInfo>,
}

#[derive(Clone, PartialEq, Debug, Deserialize, Serialize)]
pub struct BinanceSymbolInfo {
    pub symbol: SmolStr,
    #[serde(default)]
    pub filters: Vec<BinanceSymbolFilter>,
}

impl BinanceSymbolInfo {
    pub fn tick_size(&self) -> Option<Decimal> {
        self.filters.iter().find_map(|filter| match filter {
            BinanceSymbolFilter::Price { tick_size } => Some(*tick_size),
            _ => None,
        })
    }

    pub fn min_qty(&self) -> Option<Decimal> {
        self.filters.iter().find_map(|filter| match filter {
            BinanceSymbolFilter::LotSize { min_qty } => Some(*min_qty),
            _ => None,
        })
    }
}

/// Symbol filter, tagged by `filterType`.
///
/// ```json
/// {"filterType": "PRICE_FILTER", "minPrice": "556.80", "maxPrice": "4529764", "tickSize": "0.10"}
/// ```
#[derive(Clone, PartialEq, Debug, Deserialize, Serialize)]
#[serde(tag = "filterType")]
pub enum BinanceSymbolFilter {
    #[serde(rename = "PRICE_FILTER")]
    Price {
        #[serde(rename = "tickSize", with = "rust_decimal::serde::str")]
        tick_size: Decimal,
    },
    #[serde(rename = "LOT_SIZE")]
    LotSize {
        #[serde(rename = "minQty", with = "rust_decimal::serde::str")]
        min_qty: Decimal,
    },
    #[serde(other)]
    Other,
}
