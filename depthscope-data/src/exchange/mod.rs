/// `Binance` USD-M futures REST and WebSocket payloads.
pub mod binance;
