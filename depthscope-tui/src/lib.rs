/// Depthscope TUI - Shared Library
///
/// Terminal order-flow chart for Binance USD-M futures:
/// - candlesticks with trade bubbles
/// - cumulative depth, volume and open interest panes
/// - zoom, pan and autoscale over braille canvases
///
/// The library includes:
/// - `ChartManager` owning the active session and viewport
/// - REST, WebSocket and backfill collaborators talking to it over channels
/// - Ratatui rendering of a per tick `ChartView`
pub mod config;
pub mod feed;
pub mod manager;
pub mod render;
pub mod viewport;

// Re-export commonly used types for convenience
pub use config::{ChartConfig, ConfigError};
pub use feed::{ConnectionStatus, FeedController, FeedError, FeedEvent, FeedRequest};
pub use manager::{ChartManager, ChartView};
pub use render::{ChartLayout, render_chart};
pub use viewport::{Projection, Surface, Viewport, ViewportError};
