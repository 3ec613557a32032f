use super::{C_BRIGHT, C_BUY, C_DIM, C_SELL, bubbles, render_placeholder, surface_block};
use crate::{
    manager::ChartView,
    viewport::{Projection, Surface},
};
use chrono::DateTime;
use depthscope_data::candle::Candle;
use ratatui::{
    Frame,
    layout::Rect,
    style::Style,
    symbols::Marker,
    text::Span,
    widgets::canvas::{Canvas, Circle, Context, Line as CanvasLine},
};
use std::ops::Range;

/// Time labels drawn along the bottom of the main surface.
const TIME_LABELS: usize = 6;

/// Share of an interval covered by a candle body.
const BODY_RATIO: f64 = 0.7;

/// Candlesticks with trade bubbles and time labels.
pub fn render_main(
    f: &mut Frame,
    area: Rect,
    view: &ChartView<'_>,
    window: &Range<u64>,
    range: Option<(f64, f64)>,
) {
    let title = match view.session {
        Some(session) => format!(" {} 1m ", session.symbol),
        None => " chart ".to_string(),
    };

    let (Some(session), Some(range)) = (view.session, range) else {
        render_placeholder(f, area, surface_block(title, false), "waiting for candles...");
        return;
    };

    let projection = view.viewport.projection(Surface::Main, window, range);
    if projection.width <= 0.0 || projection.height <= 0.0 {
        render_placeholder(f, area, surface_block(title, false), "");
        return;
    }

    let interval_ms = session.candles.interval_ms();
    let candles = session
        .candles
        .candles_in(window.clone())
        .copied()
        .collect::<Vec<_>>();
    let bubbles = bubbles::group_trades(
        session.ledger.trades_in_window(window.start, window.end),
        interval_ms,
        view.viewport.tick_size(),
    );
    let max_radius = (projection.interval_width(interval_ms) * 0.5).max(1.0);
    let label_step = label_step(window, interval_ms);

    let canvas = Canvas::default()
        .block(surface_block(title, true))
        .marker(Marker::Braille)
        .x_bounds([0.0, projection.width])
        .y_bounds([0.0, projection.height])
        .paint(move |ctx| {
            for candle in &candles {
                draw_candle(ctx, &projection, candle);
            }

            ctx.layer();
            let max_quantity = bubbles::max_quantity(&bubbles);
            for bubble in &bubbles {
                let color = if bubble.is_taker_buy() { C_BUY } else { C_SELL };
                ctx.draw(&Circle {
                    x: projection.to_x(bubble.open_time + interval_ms / 2),
                    y: projection.to_y_decimal(bubble.price),
                    radius: bubbles::radius(bubble.quantity, max_quantity, max_radius),
                    color,
                });
            }

            ctx.layer();
            let first_label = window.start.div_ceil(label_step) * label_step;
            for time in (first_label..window.end).step_by(label_step as usize) {
                ctx.print(
                    projection.to_x(time),
                    0.0,
                    Span::styled(time_label(time), Style::default().fg(C_DIM)),
                );
            }
        });

    f.render_widget(canvas, area);
}

fn draw_candle(ctx: &mut Context<'_>, projection: &Projection, candle: &Candle) {
    let color = if candle.is_bullish() { C_BUY } else { C_SELL };
    let interval_ms = candle.close_time - candle.open_time;
    let center = projection.to_x(candle.open_time + interval_ms / 2);

    // Wick
    ctx.draw(&CanvasLine {
        x1: center,
        y1: projection.to_y_decimal(candle.low),
        x2: center,
        y2: projection.to_y_decimal(candle.high),
        color,
    });

    // Filled body, one vertical stroke per dot column
    let half_width = (projection.interval_width(interval_ms) * BODY_RATIO / 2.0).max(0.5);
    let top = projection.to_y_decimal(candle.open.max(candle.close));
    let bottom = projection.to_y_decimal(candle.open.min(candle.close));
    let mut x = center - half_width;
    while x <= center + half_width {
        ctx.draw(&CanvasLine {
            x1: x,
            y1: bottom,
            x2: x,
            y2: top,
            color,
        });
        x += 1.0;
    }

    if candle.volume.is_zero() {
        ctx.draw(&CanvasLine {
            x1: center - half_width,
            y1: top,
            x2: center + half_width,
            y2: top,
            color: C_BRIGHT,
        });
    }
}

/// Label spacing in millis, a whole number of intervals giving roughly [`TIME_LABELS`] labels.
fn label_step(window: &Range<u64>, interval_ms: u64) -> u64 {
    let intervals = window.end.saturating_sub(window.start) / interval_ms.max(1);
    let step = intervals.div_ceil(TIME_LABELS as u64).max(1);
    step * interval_ms.max(1)
}

/// `HH:MM` in UTC.
pub fn time_label(time: u64) -> String {
    DateTime::from_timestamp_millis(time as i64)
        .map(|time| time.format("%H:%M").to_string())
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{manager::ChartManager, render::tests::draw};
    use depthscope_data::books::sync::SyncConfig;
    use std::time::Duration;

    #[test]
    fn test_time_label() {
        assert_eq!(time_label(0), "00:00");
        assert_eq!(time_label(3_600_000 + 5 * 60_000), "01:05");
    }

    #[test]
    fn test_label_step() {
        assert_eq!(label_step(&(0..1_800_000), 60_000), 300_000);
        assert_eq!(label_step(&(0..60_000), 60_000), 60_000);
    }

    #[test]
    fn test_render_main_with_candles() {
        let mut manager = ChartManager::new(SyncConfig::default(), Duration::from_millis(33));
        let generation = manager.change_symbol("btcusdt");
        manager
            .gather_klines(
                generation,
                r#"[
                    [0, "100", "110", "90", "105", "10", 59999],
                    [60000, "105", "108", "95", "96", "12", 119999]
                ]"#,
            )
            .unwrap();
        manager
            .gather_trade(generation, r#"{"a": 1, "p": "97", "q": "3", "T": 61000, "m": true}"#)
            .unwrap();

        let text = draw(&mut manager, 100, 40);
        assert!(text.contains("BTCUSDT 1m"));
        assert!(text.contains("00:00"));
        assert!(!text.contains("waiting for candles"));
    }
}
