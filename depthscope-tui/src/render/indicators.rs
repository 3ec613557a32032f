use super::{C_ACCENT, C_BUY, C_DIM, C_SELL, render_placeholder, surface_block};
use crate::{manager::ChartView, viewport::Surface};
use itertools::{Itertools, MinMaxResult};
use ratatui::{
    Frame,
    layout::Rect,
    style::Style,
    symbols::Marker,
    text::Span,
    widgets::canvas::{Canvas, Line as CanvasLine},
};
use rust_decimal::{Decimal, prelude::ToPrimitive};
use std::ops::Range;

/// Stacked taker buy and sell volume per candle.
pub fn render_volume(f: &mut Frame, area: Rect, view: &ChartView<'_>, window: &Range<u64>) {
    let title = " volume ".to_string();
    let Some(session) = view.session else {
        render_placeholder(f, area, surface_block(title, false), "");
        return;
    };

    let candles = session
        .candles
        .candles_in(window.clone())
        .copied()
        .collect::<Vec<_>>();
    let max_volume = candles
        .iter()
        .map(|candle| candle.volume)
        .max()
        .unwrap_or_default();
    if max_volume.is_zero() {
        render_placeholder(f, area, surface_block(title, false), "");
        return;
    }

    let projection = view.viewport.projection(
        Surface::Volume,
        window,
        (0.0, max_volume.to_f64().unwrap_or(1.0)),
    );
    let interval_ms = session.candles.interval_ms();
    let half_width = (projection.interval_width(interval_ms) * 0.35).max(0.5);

    let canvas = Canvas::default()
        .block(surface_block(title, true))
        .marker(Marker::Braille)
        .x_bounds([0.0, projection.width])
        .y_bounds([0.0, projection.height])
        .paint(move |ctx| {
            for candle in &candles {
                let center = projection.to_x(candle.open_time + interval_ms / 2);
                let buy = projection.to_y_decimal(candle.buy_volume);
                let total = projection.to_y_decimal(candle.volume);

                let mut x = center - half_width;
                while x <= center + half_width {
                    ctx.draw(&CanvasLine {
                        x1: x,
                        y1: 0.0,
                        x2: x,
                        y2: buy,
                        color: C_BUY,
                    });
                    ctx.draw(&CanvasLine {
                        x1: x,
                        y1: buy,
                        x2: x,
                        y2: total,
                        color: C_SELL,
                    });
                    x += 1.0;
                }
            }

            ctx.print(
                0.0,
                projection.height,
                Span::styled(
                    format!("{}", max_volume.round_dp(3).normalize()),
                    Style::default().fg(C_DIM),
                ),
            );
        });

    f.render_widget(canvas, area);
}

/// Open interest line over the visible time window.
pub fn render_open_interest(f: &mut Frame, area: Rect, view: &ChartView<'_>, window: &Range<u64>) {
    let title = " open interest ".to_string();
    let Some(session) = view.session else {
        render_placeholder(f, area, surface_block(title, false), "");
        return;
    };

    let points = session
        .open_interest
        .points_in(window.clone())
        .into_iter()
        .filter_map(|point| Some((point.time, point.open_interest.to_f64()?)))
        .collect::<Vec<_>>();

    let (low, high) = match points.iter().map(|(_, value)| *value).minmax_by(f64::total_cmp) {
        MinMaxResult::NoElements => {
            render_placeholder(f, area, surface_block(title, false), "waiting for open interest...");
            return;
        }
        MinMaxResult::OneElement(value) => (value - 1.0, value + 1.0),
        MinMaxResult::MinMax(low, high) => {
            let padding = ((high - low) * 0.1).max(f64::EPSILON);
            (low - padding, high + padding)
        }
    };

    let latest = session.open_interest.latest().map(|point| point.open_interest);
    let projection = view.viewport.projection(Surface::OpenInterest, window, (low, high));

    let canvas = Canvas::default()
        .block(surface_block(title, true))
        .marker(Marker::Braille)
        .x_bounds([0.0, projection.width])
        .y_bounds([0.0, projection.height])
        .paint(move |ctx| {
            // The anchor reading before the window is clamped to the left edge
            let coords = points
                .iter()
                .map(|(time, value)| (projection.to_x(*time).max(0.0), projection.to_y(*value)));

            for ((x1, y1), (x2, y2)) in coords.clone().tuple_windows() {
                ctx.draw(&CanvasLine {
                    x1,
                    y1,
                    x2,
                    y2,
                    color: C_ACCENT,
                });
            }

            // Hold the latest reading to the right edge
            if let Some((x, y)) = coords.last() {
                ctx.draw(&CanvasLine {
                    x1: x,
                    y1: y,
                    x2: projection.width,
                    y2: y,
                    color: C_ACCENT,
                });
            }

            if let Some(latest) = latest {
                ctx.print(
                    0.0,
                    projection.height,
                    Span::styled(
                        format_open_interest(latest),
                        Style::default().fg(C_DIM),
                    ),
                );
            }
        });

    f.render_widget(canvas, area);
}

/// Compact open interest label, e.g. `81.23K`.
pub fn format_open_interest(value: Decimal) -> String {
    let value = value.to_f64().unwrap_or_default();
    match value.abs() {
        abs if abs >= 1e9 => format!("{:.2}B", value / 1e9),
        abs if abs >= 1e6 => format!("{:.2}M", value / 1e6),
        abs if abs >= 1e3 => format!("{:.2}K", value / 1e3),
        _ => format!("{value:.2}"),
    }
}
