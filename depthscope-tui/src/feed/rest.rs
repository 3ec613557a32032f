use super::FeedError;
use depthscope_data::exchange::binance::trade::BinanceAggTrade;
use reqwest::StatusCode;
use smol_str::SmolStr;
use std::time::Duration;
use tracing::{debug, warn};
use url::Url;

/// Longest backoff applied between rate limited retries (2^6 seconds).
const MAX_RATE_LIMIT_EXPONENT: u32 = 6;

/// Binance USD-M futures REST client.
///
/// Endpoints return the raw response body so payloads are parsed (and rejected) by the
/// `ChartManager` at the boundary. Only `aggTrades` pages are decoded here because paging needs
/// the trade ids.
#[derive(Debug, Clone)]
pub struct BinanceRestClient {
    http: reqwest::Client,
    base_url: Url,
    rate_limit_retries: u32,
}

impl BinanceRestClient {
    pub fn new(base_url: Url, timeout: Duration, rate_limit_retries: u32) -> Result<Self, FeedError> {
        let http = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            http,
            base_url,
            rate_limit_retries,
        })
    }

    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    /// `GET /fapi/v1/depth`
    pub async fn depth_snapshot(&self, symbol: &str, limit: usize) -> Result<String, FeedError> {
        let url = self.endpoint(
            "/fapi/v1/depth",
            &[("symbol", symbol.to_uppercase()), ("limit", limit.to_string())],
        )?;
        self.get_text(url).await
    }

    /// `GET /fapi/v1/klines` with one minute candles.
    pub async fn klines(&self, symbol: &str, limit: usize) -> Result<String, FeedError> {
        let url = self.endpoint(
            "/fapi/v1/klines",
            &[
                ("symbol", symbol.to_uppercase()),
                ("interval", "1m".to_string()),
                ("limit", limit.to_string()),
            ],
        )?;
        self.get_text(url).await
    }

    /// `GET /fapi/v1/openInterest`
    pub async fn open_interest(&self, symbol: &str) -> Result<String, FeedError> {
        let url = self.endpoint("/fapi/v1/openInterest", &[("symbol", symbol.to_uppercase())])?;
        self.get_text(url).await
    }

    /// `GET /futures/data/openInterestHist`, the last hour in five minute steps.
    pub async fn open_interest_hist(&self, symbol: &str) -> Result<String, FeedError> {
        let url = self.endpoint(
            "/futures/data/openInterestHist",
            &[
                ("symbol", symbol.to_uppercase()),
                ("period", "5m".to_string()),
                ("limit", "12".to_string()),
            ],
        )?;
        self.get_text(url).await
    }

    /// `GET /fapi/v1/exchangeInfo`
    pub async fn exchange_info(&self) -> Result<String, FeedError> {
        let url = self.endpoint("/fapi/v1/exchangeInfo", &[])?;
        self.get_text(url).await
    }

    /// `GET /fapi/v1/aggTrades`
    ///
    /// Binance rejects `fromId` combined with a time range, so the first page of a window is
    /// requested by `[start, end)` and later pages continue from the last id received.
    pub async fn agg_trades(
        &self,
        symbol: &SmolStr,
        start: u64,
        end: u64,
        from_id: Option<u64>,
        limit: usize,
    ) -> Result<Vec<BinanceAggTrade>, FeedError> {
        let mut query = vec![("symbol", symbol.to_uppercase()), ("limit", limit.to_string())];
        match from_id {
            Some(from_id) => query.push(("fromId", from_id.to_string())),
            None => {
                query.push(("startTime", start.to_string()));
                query.push(("endTime", end.saturating_sub(1).to_string()));
            }
        }

        let url = self.endpoint("/fapi/v1/aggTrades", &query)?;
        let body = self.get_text(url).await?;
        let trades = serde_json::from_str::<Vec<BinanceAggTrade>>(&body)
            .map_err(depthscope_data::DataError::from)?;
        Ok(trades)
    }

    fn endpoint(&self, path: &str, query: &[(&str, String)]) -> Result<Url, FeedError> {
        let mut url = self.base_url.join(path)?;
        if !query.is_empty() {
            url.query_pairs_mut().extend_pairs(query);
        }
        Ok(url)
    }

    async fn get_text(&self, url: Url) -> Result<String, FeedError> {
        let mut attempt = 0;
        loop {
            debug!(%url, attempt, "sending rest request");
            let response = self.http.get(url.clone()).send().await?;
            let status = response.status();

            if status == StatusCode::TOO_MANY_REQUESTS {
                if attempt >= self.rate_limit_retries {
                    return Err(FeedError::RateLimited {
                        attempts: attempt + 1,
                    });
                }

                let delay = Duration::from_secs(1 << attempt.min(MAX_RATE_LIMIT_EXPONENT));
                warn!(path = url.path(), ?delay, attempt, "rate limit exceeded, pausing");
                tokio::time::sleep(delay).await;
                attempt += 1;
                continue;
            }

            let body = response.text().await?;
            if !status.is_success() {
                return Err(FeedError::Status {
                    status: status.as_u16(),
                    body,
                });
            }
            return Ok(body);
        }
    }
}
