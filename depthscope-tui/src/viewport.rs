//! Zoom, pan and autoscale state plus the coordinate transforms derived from it.
//!
//! Surfaces are measured in canvas dots (braille sub-cells). The y origin is at the bottom of a
//! surface, matching ratatui's `Canvas`.

use depthscope_data::{SymbolMetadata, candle::KLINE_INTERVAL_MS};
use rust_decimal::{Decimal, RoundingStrategy, prelude::ToPrimitive};
use std::ops::Range;
use thiserror::Error;
use tracing::debug;

/// Candle intervals visible on the time axis by default (30 minutes).
pub const DEFAULT_X_ZOOM: f64 = 30.0;
pub const MIN_X_ZOOM: f64 = 5.0;
pub const MAX_X_ZOOM: f64 = 720.0;

/// Smallest and largest scale factor a single zoom gesture may apply.
const MIN_ZOOM_FACTOR: f64 = 0.1;
const MAX_ZOOM_FACTOR: f64 = 10.0;

#[derive(Debug, Copy, Clone, Eq, PartialEq, Error)]
pub enum ViewportError {
    #[error("manual price zoom and pan are disabled while autoscale is on")]
    AutoscaleActive,

    #[error("expected {expected} surface sizes, received {received}")]
    SurfaceMismatch { expected: usize, received: usize },

    #[error("tick size must be positive, received {0}")]
    InvalidTickSize(Decimal),
}

/// Canvas surfaces the chart paints on, in `resize` order.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash)]
pub enum Surface {
    Main,
    Depth,
    Volume,
    OpenInterest,
}

impl Surface {
    pub const ALL: [Surface; 4] = [
        Surface::Main,
        Surface::Depth,
        Surface::Volume,
        Surface::OpenInterest,
    ];

    fn index(self) -> usize {
        match self {
            Surface::Main => 0,
            Surface::Depth => 1,
            Surface::Volume => 2,
            Surface::OpenInterest => 3,
        }
    }
}

/// Surface dimensions in dots.
#[derive(Debug, Copy, Clone, PartialEq, Default)]
pub struct SurfaceSize {
    pub width: f64,
    pub height: f64,
}

/// Manually chosen price range, as a centre price (`yOffset`) and visible span (`yZoom`).
#[derive(Debug, Copy, Clone, PartialEq)]
pub struct PriceWindow {
    pub center: f64,
    pub span: f64,
}

impl PriceWindow {
    pub fn from_range(low: f64, high: f64) -> Self {
        Self {
            center: (low + high) / 2.0,
            span: (high - low).abs().max(f64::EPSILON),
        }
    }

    pub fn low(&self) -> f64 {
        self.center - self.span / 2.0
    }

    pub fn high(&self) -> f64 {
        self.center + self.span / 2.0
    }
}

/// Zoom/pan/autoscale state. Mutated incrementally by gesture handlers.
#[derive(Debug, Clone, PartialEq)]
pub struct Viewport {
    x_zoom: f64,
    x_offset: f64,
    price_window: Option<PriceWindow>,
    autoscale: bool,
    tick_size: Decimal,
    metadata: SymbolMetadata,
    surfaces: [SurfaceSize; 4],
    interval_ms: u64,
}

impl Default for Viewport {
    fn default() -> Self {
        Self::new()
    }
}

impl Viewport {
    pub fn new() -> Self {
        let metadata = SymbolMetadata::default();
        Self {
            x_zoom: DEFAULT_X_ZOOM,
            x_offset: 0.0,
            price_window: None,
            autoscale: true,
            tick_size: metadata.tick_size,
            metadata,
            surfaces: [SurfaceSize::default(); 4],
            interval_ms: KLINE_INTERVAL_MS,
        }
    }

    pub fn x_zoom(&self) -> f64 {
        self.x_zoom
    }

    pub fn x_offset(&self) -> f64 {
        self.x_offset
    }

    pub fn price_window(&self) -> Option<PriceWindow> {
        self.price_window
    }

    pub fn autoscale(&self) -> bool {
        self.autoscale
    }

    pub fn tick_size(&self) -> Decimal {
        self.tick_size
    }

    pub fn metadata(&self) -> SymbolMetadata {
        self.metadata
    }

    pub fn surface(&self, surface: Surface) -> SurfaceSize {
        self.surfaces[surface.index()]
    }

    /// Scale the number of visible intervals by `1 - delta / 1000`. Positive deltas zoom in.
    pub fn zoom_x(&mut self, delta: f64) {
        let factor = (1.0 - delta / 1000.0).clamp(MIN_ZOOM_FACTOR, MAX_ZOOM_FACTOR);
        self.x_zoom = (self.x_zoom * factor).clamp(MIN_X_ZOOM, MAX_X_ZOOM);
    }

    /// Scale the manual price span by `1 + delta / 1000`.
    pub fn zoom_y(&mut self, delta: f64) -> Result<(), ViewportError> {
        if self.autoscale {
            return Err(ViewportError::AutoscaleActive);
        }

        let factor = (1.0 + delta / 1000.0).clamp(MIN_ZOOM_FACTOR, MAX_ZOOM_FACTOR);
        if let Some(window) = self.price_window.as_mut() {
            window.span = (window.span * factor).max(f64::EPSILON);
        }
        Ok(())
    }

    /// Pan by `dx`/`dy` dots. Positive `dx` looks back in time, positive `dy` moves towards
    /// higher prices.
    ///
    /// The horizontal part always applies. A vertical part is rejected while autoscale is on.
    pub fn pan(&mut self, dx: f64, dy: f64) -> Result<(), ViewportError> {
        self.x_offset = (self.x_offset + dx).max(0.0);

        if dy == 0.0 {
            return Ok(());
        }
        if self.autoscale {
            return Err(ViewportError::AutoscaleActive);
        }

        let height = self.surface(Surface::Main).height;
        if let Some(window) = self.price_window.as_mut() {
            if height > 0.0 {
                window.center += dy * window.span / height;
            }
        }
        Ok(())
    }

    pub fn set_autoscale(&mut self, autoscale: bool) {
        self.autoscale = autoscale;
    }

    /// Set the manual price window from a price range.
    pub fn seed_price_window(&mut self, low: f64, high: f64) {
        self.price_window = Some(PriceWindow::from_range(low, high));
    }

    /// Resolve the price range for this frame. Autoscale or a missing manual window falls back
    /// to `autoscaled`.
    pub fn price_range(&self, autoscaled: Option<(f64, f64)>) -> Option<(f64, f64)> {
        match (self.autoscale, self.price_window) {
            (false, Some(window)) => Some((window.low(), window.high())),
            _ => autoscaled,
        }
    }

    /// Round `price` to the nearest multiple of the selected tick size, ties away from zero.
    pub fn quantize_price(&self, price: Decimal) -> Decimal {
        quantize(price, self.tick_size)
    }

    /// Store symbol metadata and select the initial tick size.
    pub fn set_symbol_info(&mut self, metadata: SymbolMetadata, initial_tick_size: Decimal) {
        self.metadata = metadata;
        self.tick_size = self.align_tick_size(initial_tick_size);
        debug!(
            tick_size = %self.tick_size,
            symbol_tick = %metadata.tick_size,
            min_qty = %metadata.min_qty,
            "viewport symbol info updated"
        );
    }

    /// Select a tick size, rounded up to a multiple of the symbol tick.
    pub fn set_tick_size(&mut self, tick_size: Decimal) -> Result<Decimal, ViewportError> {
        if tick_size <= Decimal::ZERO {
            return Err(ViewportError::InvalidTickSize(tick_size));
        }
        self.tick_size = self.align_tick_size(tick_size);
        Ok(self.tick_size)
    }

    /// Record surface sizes in `Surface::ALL` order.
    pub fn resize(&mut self, widths: &[f64], heights: &[f64]) -> Result<(), ViewportError> {
        let expected = self.surfaces.len();
        if widths.len() != expected || heights.len() != expected {
            return Err(ViewportError::SurfaceMismatch {
                expected,
                received: widths.len().min(heights.len()),
            });
        }

        for (surface, (width, height)) in self.surfaces.iter_mut().zip(widths.iter().zip(heights)) {
            *surface = SurfaceSize {
                width: width.max(0.0),
                height: height.max(0.0),
            };
        }
        Ok(())
    }

    /// Reset symbol specific state. Zoom, pan and autoscale persist, the manual price window
    /// does not because it is expressed in the previous symbol's prices.
    pub fn on_symbol_change(&mut self) {
        self.price_window = None;
        self.metadata = SymbolMetadata::default();
        self.tick_size = self.metadata.tick_size;
    }

    /// Visible time window for a chart whose latest candle opens at `latest_open`.
    ///
    /// The right edge sits one interval past the latest candle, shifted back by `x_offset`.
    pub fn time_window(&self, latest_open: u64) -> Range<u64> {
        let span = self.x_zoom * self.interval_ms as f64;
        let width = self.surface(Surface::Main).width;
        let offset = if width > 0.0 {
            self.x_offset * span / width
        } else {
            0.0
        };

        let right = (latest_open + 2 * self.interval_ms) as f64 - offset;
        let left = (right - span).max(0.0);
        (left as u64)..(right.max(0.0) as u64)
    }

    /// Resolve the transforms for `surface` over a time window and value range.
    pub fn projection(&self, surface: Surface, window: &Range<u64>, range: (f64, f64)) -> Projection {
        let size = self.surface(surface);
        Projection {
            time_start: window.start as f64,
            time_end: window.end as f64,
            low: range.0,
            high: range.1,
            width: size.width,
            height: size.height,
        }
    }

    fn align_tick_size(&self, tick_size: Decimal) -> Decimal {
        let base = self.metadata.tick_size;
        if base <= Decimal::ZERO {
            return tick_size;
        }
        let multiple = (tick_size / base).ceil().max(Decimal::ONE);
        multiple * base
    }
}

/// Round `price` to the nearest multiple of `tick_size`, ties away from zero.
pub fn quantize(price: Decimal, tick_size: Decimal) -> Decimal {
    if tick_size <= Decimal::ZERO {
        return price;
    }
    (price / tick_size).round_dp_with_strategy(0, RoundingStrategy::MidpointAwayFromZero) * tick_size
}

/// Viewport resolved for one frame and one surface. Computed transiently, never stored.
#[derive(Debug, Copy, Clone, PartialEq)]
pub struct Projection {
    pub time_start: f64,
    pub time_end: f64,
    pub low: f64,
    pub high: f64,
    pub width: f64,
    pub height: f64,
}

impl Projection {
    pub fn to_x(&self, time: u64) -> f64 {
        let span = self.time_end - self.time_start;
        if span <= 0.0 || self.width <= 0.0 {
            return 0.0;
        }
        (time as f64 - self.time_start) / span * self.width
    }

    pub fn to_time(&self, x: f64) -> u64 {
        let span = self.time_end - self.time_start;
        if self.width <= 0.0 {
            return self.time_start as u64;
        }
        (self.time_start + x / self.width * span).max(0.0) as u64
    }

    pub fn to_y(&self, value: f64) -> f64 {
        let range = (self.high - self.low).max(1e-9);
        (value - self.low) / range * self.height
    }

    pub fn to_price(&self, y: f64) -> f64 {
        if self.height <= 0.0 {
            return self.low;
        }
        self.low + y / self.height * (self.high - self.low)
    }

    /// Convenience for [`Decimal`] prices.
    pub fn to_y_decimal(&self, price: Decimal) -> f64 {
        self.to_y(price.to_f64().unwrap_or_default())
    }

    /// Dots covered by one interval of `interval_ms`.
    pub fn interval_width(&self, interval_ms: u64) -> f64 {
        let span = self.time_end - self.time_start;
        if span <= 0.0 {
            return 0.0;
        }
        interval_ms as f64 / span * self.width
    }
}
