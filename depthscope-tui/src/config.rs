/// Chart configuration
///
/// Defaults mirror the Binance USD-M futures endpoints and the collaborator policy the chart was
/// tuned against. Every field can be overridden from `DEPTHSCOPE_*` environment variables.
use crate::feed::backfill::BackfillConfig;
use depthscope_data::{
    books::sync::SyncConfig,
    exchange::binance::{BASE_URL_BINANCE_USDT_REST, BASE_URL_BINANCE_USDT_WS},
};
use smol_str::SmolStr;
use std::{path::PathBuf, str::FromStr, time::Duration};
use thiserror::Error;
use url::Url;

/// Render tick period (~30 frames per second).
pub const DEFAULT_RENDER_INTERVAL: Duration = Duration::from_millis(33);

/// Interval between depth snapshot refreshes while synchronised.
pub const DEFAULT_DEPTH_POLL_INTERVAL: Duration = Duration::from_secs(12);

/// Interval between current open interest polls, aligned to the minute.
pub const DEFAULT_OPEN_INTEREST_POLL_INTERVAL: Duration = Duration::from_secs(60);

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("{var} is not a valid url: {source}")]
    InvalidUrl {
        var: &'static str,
        source: url::ParseError,
    },

    #[error("{var} has invalid value {value:?}")]
    InvalidValue { var: &'static str, value: String },

    #[error("{var} must list at least one symbol")]
    NoSymbols { var: &'static str },
}

/// Chart configuration
#[derive(Debug, Clone)]
pub struct ChartConfig {
    /// Symbols cycled with Tab, the first is opened on start
    pub symbols: Vec<SmolStr>,
    /// REST base url
    pub rest_url: Url,
    /// Combined stream WebSocket url
    pub ws_url: Url,
    /// Fixed render tick period
    pub render_interval: Duration,
    /// Timeout applied to every REST request
    pub request_timeout: Duration,
    /// Number of 1m klines seeded on symbol change
    pub kline_limit: usize,
    /// Depth snapshot level limit
    pub depth_limit: usize,
    pub depth_poll_interval: Duration,
    pub open_interest_poll_interval: Duration,
    /// Retries after HTTP 429 before a request fails
    pub rate_limit_retries: u32,
    /// Ping interval to keep the WebSocket alive
    pub ping_interval: Duration,
    /// Reconnection delay after disconnect
    pub reconnect_delay: Duration,
    /// Feed event channel buffer size
    pub channel_buffer_size: usize,
    /// Initial tick size selection as a multiple of the symbol tick
    pub initial_tick_multiple: u32,
    /// Interval between trade ledger evictions
    pub eviction_interval: Duration,
    pub backfill: BackfillConfig,
    pub sync: SyncConfig,
    /// File receiving log output, the terminal is owned by the chart
    pub log_path: PathBuf,
}

impl Default for ChartConfig {
    fn default() -> Self {
        Self {
            symbols: vec![
                SmolStr::new_static("BTCUSDT"),
                SmolStr::new_static("ETHUSDT"),
                SmolStr::new_static("SOLUSDT"),
            ],
            rest_url: default_url(BASE_URL_BINANCE_USDT_REST),
            ws_url: default_url(BASE_URL_BINANCE_USDT_WS),
            render_interval: DEFAULT_RENDER_INTERVAL,
            request_timeout: Duration::from_secs(10),
            kline_limit: 60,
            depth_limit: 1000,
            depth_poll_interval: DEFAULT_DEPTH_POLL_INTERVAL,
            open_interest_poll_interval: DEFAULT_OPEN_INTEREST_POLL_INTERVAL,
            rate_limit_retries: 5,
            ping_interval: Duration::from_secs(30),
            reconnect_delay: Duration::from_secs(2),
            channel_buffer_size: 10_000,
            initial_tick_multiple: 10,
            eviction_interval: Duration::from_secs(5),
            backfill: BackfillConfig::default(),
            sync: SyncConfig::default(),
            log_path: PathBuf::from("depthscope.log"),
        }
    }
}

impl ChartConfig {
    /// Build configuration from `DEPTHSCOPE_*` environment variables, falling back to defaults.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|var| std::env::var(var).ok())
    }

    /// Build configuration from an arbitrary variable lookup.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let mut config = Self::default();

        if let Some(raw) = lookup("DEPTHSCOPE_SYMBOLS") {
            let symbols = raw
                .split(',')
                .map(str::trim)
                .filter(|symbol| !symbol.is_empty())
                .map(|symbol| SmolStr::new(symbol.to_uppercase()))
                .collect::<Vec<_>>();
            if symbols.is_empty() {
                return Err(ConfigError::NoSymbols {
                    var: "DEPTHSCOPE_SYMBOLS",
                });
            }
            config.symbols = symbols;
        }

        if let Some(url) = parse_url(&lookup, "DEPTHSCOPE_REST_URL")? {
            config.rest_url = url;
        }
        if let Some(url) = parse_url(&lookup, "DEPTHSCOPE_WS_URL")? {
            config.ws_url = url;
        }
        if let Some(millis) = parse_var::<u64>(&lookup, "DEPTHSCOPE_RENDER_INTERVAL_MS")? {
            config.render_interval = Duration::from_millis(millis.max(1));
        }
        if let Some(limit) = parse_var(&lookup, "DEPTHSCOPE_KLINE_LIMIT")? {
            config.kline_limit = limit;
        }
        if let Some(secs) = parse_var::<u64>(&lookup, "DEPTHSCOPE_DEPTH_POLL_SECS")? {
            config.depth_poll_interval = Duration::from_secs(secs);
        }
        if let Some(size) = parse_var(&lookup, "DEPTHSCOPE_BACKFILL_PAGE_SIZE")? {
            config.backfill.page_size = size;
        }
        if let Some(millis) = parse_var::<u64>(&lookup, "DEPTHSCOPE_BACKFILL_PAGE_DELAY_MS")? {
            config.backfill.page_delay = Duration::from_millis(millis);
        }
        if let Some(retries) = parse_var(&lookup, "DEPTHSCOPE_BACKFILL_PAGE_RETRIES")? {
            config.backfill.max_page_retries = retries;
        }
        if let Some(attempts) = parse_var(&lookup, "DEPTHSCOPE_MAX_RESYNC_ATTEMPTS")? {
            config.sync.max_resync_attempts = attempts;
        }
        if let Some(millis) = parse_var::<u64>(&lookup, "DEPTHSCOPE_RESYNC_BACKOFF_MS")? {
            config.sync.base_backoff = Duration::from_millis(millis);
        }
        if let Some(multiple) = parse_var(&lookup, "DEPTHSCOPE_TICK_MULTIPLE")? {
            config.initial_tick_multiple = multiple;
        }
        if let Some(path) = lookup("DEPTHSCOPE_LOG_PATH") {
            config.log_path = PathBuf::from(path);
        }

        Ok(config)
    }

    /// Set the symbols cycled by the chart
    pub fn with_symbols(mut self, symbols: impl IntoIterator<Item = impl Into<SmolStr>>) -> Self {
        self.symbols = symbols.into_iter().map(Into::into).collect();
        self
    }

    /// Set render tick period
    pub fn with_render_interval(mut self, interval: Duration) -> Self {
        self.render_interval = interval;
        self
    }

    /// Set REST and WebSocket base urls
    pub fn with_urls(mut self, rest_url: Url, ws_url: Url) -> Self {
        self.rest_url = rest_url;
        self.ws_url = ws_url;
        self
    }

    /// Set historical trade backfill policy
    pub fn with_backfill(mut self, backfill: BackfillConfig) -> Self {
        self.backfill = backfill;
        self
    }

    /// Set order book synchronizer bounds
    pub fn with_sync(mut self, sync: SyncConfig) -> Self {
        self.sync = sync;
        self
    }

    /// Set initial tick size selection multiple
    pub fn with_initial_tick_multiple(mut self, multiple: u32) -> Self {
        self.initial_tick_multiple = multiple;
        self
    }
}

fn default_url(raw: &str) -> Url {
    // Built-in constants
    Url::parse(raw).unwrap_or_else(|_| unreachable!("invalid built-in url {raw}"))
}

fn parse_url(
    lookup: &impl Fn(&str) -> Option<String>,
    var: &'static str,
) -> Result<Option<Url>, ConfigError> {
    lookup(var)
        .map(|raw| Url::parse(&raw).map_err(|source| ConfigError::InvalidUrl { var, source }))
        .transpose()
}

fn parse_var<T: FromStr>(
    lookup: &impl Fn(&str) -> Option<String>,
    var: &'static str,
) -> Result<Option<T>, ConfigError> {
    lookup(var)
        .map(|value| {
            value
                .trim()
                .parse()
                .map_err(|_| ConfigError::InvalidValue { var, value })
        })
        .transpose()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let vars = vars
            .iter()
            .map(|(key, value)| (key.to_string(), value.to_string()))
            .collect::<HashMap<_, _>>();
        move |var| vars.get(var).cloned()
    }

    #[test]
    fn test_default_config() {
        let config = ChartConfig::default();
        assert_eq!(config.symbols[0], "BTCUSDT");
        assert_eq!(config.rest_url.as_str(), "https://fapi.binance.com/");
        assert_eq!(config.ws_url.as_str(), "wss://fstream.binance.com/stream");
        assert_eq!(config.render_interval, Duration::from_millis(33));
        assert_eq!(config.kline_limit, 60);
        assert_eq!(config.backfill.page_size, 1000);
        assert_eq!(config.backfill.page_delay, Duration::from_millis(400));
        assert_eq!(config.depth_poll_interval, Duration::from_secs(12));
    }

    #[test]
    fn test_config_builder() {
        let config = ChartConfig::default()
            .with_symbols(["ethusdt"])
            .with_render_interval(Duration::from_millis(50))
            .with_initial_tick_multiple(1);

        assert_eq!(config.symbols, vec![SmolStr::new("ethusdt")]);
        assert_eq!(config.render_interval, Duration::from_millis(50));
        assert_eq!(config.initial_tick_multiple, 1);
    }

    #[test]
    fn test_config_from_lookup() {
        let config = ChartConfig::from_lookup(lookup(&[
            ("DEPTHSCOPE_SYMBOLS", "btcusdt, dogeusdt ,"),
            ("DEPTHSCOPE_RENDER_INTERVAL_MS", "40"),
            ("DEPTHSCOPE_BACKFILL_PAGE_SIZE", "500"),
            ("DEPTHSCOPE_REST_URL", "http://127.0.0.1:8080"),
        ]))
        .unwrap();

        assert_eq!(
            config.symbols,
            vec![SmolStr::new("BTCUSDT"), SmolStr::new("DOGEUSDT")]
        );
        assert_eq!(config.render_interval, Duration::from_millis(40));
        assert_eq!(config.backfill.page_size, 500);
        assert_eq!(config.rest_url.as_str(), "http://127.0.0.1:8080/");
    }

    #[test]
    fn test_config_from_lookup_errors() {
        assert!(matches!(
            ChartConfig::from_lookup(lookup(&[("DEPTHSCOPE_KLINE_LIMIT", "many")])),
            Err(ConfigError::InvalidValue { var: "DEPTHSCOPE_KLINE_LIMIT", .. })
        ));
        assert!(matches!(
            ChartConfig::from_lookup(lookup(&[("DEPTHSCOPE_WS_URL", "not a url")])),
            Err(ConfigError::InvalidUrl { .. })
        ));
        assert!(matches!(
            ChartConfig::from_lookup(lookup(&[("DEPTHSCOPE_SYMBOLS", " , ")])),
            Err(ConfigError::NoSymbols { .. })
        ));
    }
}
