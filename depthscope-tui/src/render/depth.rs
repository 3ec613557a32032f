use super::{C_BUY, C_DIM, C_NEUTRAL, C_SELL, render_placeholder, surface_block};
use crate::{
    manager::ChartView,
    viewport::{Surface, quantize},
};
use depthscope_data::books::{OrderBook, Side};
use itertools::Itertools;
use ratatui::{
    Frame,
    layout::Rect,
    style::{Color, Style},
    symbols::Marker,
    text::Span,
    widgets::canvas::{Canvas, Context, Line as CanvasLine},
};
use rust_decimal::{
    Decimal,
    prelude::{FromPrimitive, ToPrimitive},
};
use std::ops::Range;

/// Price labels along the depth surface.
const PRICE_LABELS: usize = 12;

/// One step of the cumulative depth curve.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub struct DepthStep {
    pub price: Decimal,
    pub cumulative_quantity: Decimal,
}

/// Cumulative depth of `side` inside `[low, high]`, bucketed by quantized price. Each bucket
/// carries the cumulative quantity reached at its far edge.
pub fn depth_steps(book: &OrderBook, side: Side, low: Decimal, high: Decimal, tick_size: Decimal) -> Vec<DepthStep> {
    let buckets = book
        .cumulative_depth(side, low..=high)
        .chunk_by(|point| quantize(point.price, tick_size));

    buckets
        .into_iter()
        .filter_map(|(price, points)| {
            points.last().map(|point| DepthStep {
                price,
                cumulative_quantity: point.cumulative_quantity,
            })
        })
        .collect()
}

/// Cumulative bid/ask depth sharing the main surface's price range.
pub fn render_depth(
    f: &mut Frame,
    area: Rect,
    view: &ChartView<'_>,
    window: &Range<u64>,
    range: Option<(f64, f64)>,
) {
    let title = " depth ".to_string();
    let (Some(session), Some((low, high))) = (view.session, range) else {
        render_placeholder(f, area, surface_block(title, false), "");
        return;
    };

    let book = session.sync.book();
    let (Some(low_price), Some(high_price)) = (Decimal::from_f64(low), Decimal::from_f64(high)) else {
        render_placeholder(f, area, surface_block(title, false), "");
        return;
    };

    let projection = view
        .viewport
        .projection(Surface::Depth, window, (low, high));
    if projection.width <= 0.0 || projection.height <= 0.0 || book.is_empty() {
        render_placeholder(f, area, surface_block(title, false), "no book");
        return;
    }

    let tick_size = view.viewport.tick_size();
    let bids = depth_steps(book, Side::Bid, low_price, high_price, tick_size);
    let asks = depth_steps(book, Side::Ask, low_price, high_price, tick_size);
    let max_quantity = bids
        .iter()
        .chain(&asks)
        .map(|step| step.cumulative_quantity)
        .max()
        .unwrap_or_default();
    let max = max_quantity.to_f64().unwrap_or_default().max(f64::EPSILON);
    let last_price = session.candles.live().map(|candle| candle.close);

    let to_x = move |quantity: Decimal| quantity.to_f64().unwrap_or_default() / max * projection.width;

    let canvas = Canvas::default()
        .block(surface_block(title, true))
        .marker(Marker::Braille)
        .x_bounds([0.0, projection.width])
        .y_bounds([0.0, projection.height])
        .paint(move |ctx| {
            draw_steps(ctx, &bids, C_BUY, |step| (to_x(step.cumulative_quantity), projection.to_y_decimal(step.price)));
            draw_steps(ctx, &asks, C_SELL, |step| (to_x(step.cumulative_quantity), projection.to_y_decimal(step.price)));

            if let Some(last_price) = last_price {
                let y = projection.to_y_decimal(last_price);
                ctx.draw(&CanvasLine {
                    x1: 0.0,
                    y1: y,
                    x2: projection.width,
                    y2: y,
                    color: C_NEUTRAL,
                });
            }

            ctx.layer();
            for index in 0..PRICE_LABELS {
                let y = projection.height * index as f64 / (PRICE_LABELS - 1) as f64;
                let Some(price) = Decimal::from_f64(projection.to_price(y)) else {
                    continue;
                };
                ctx.print(
                    0.0,
                    y,
                    Span::styled(quantize(price, tick_size).normalize().to_string(), Style::default().fg(C_DIM)),
                );
            }

            if let Some(last_price) = last_price {
                ctx.print(
                    0.0,
                    projection.to_y_decimal(last_price),
                    Span::styled(
                        quantize(last_price, tick_size).normalize().to_string(),
                        Style::default().fg(C_NEUTRAL),
                    ),
                );
            }

            ctx.print(
                projection.width / 2.0,
                projection.height,
                Span::styled(
                    format!("max {}", max_quantity.round_dp(3).normalize()),
                    Style::default().fg(C_DIM),
                ),
            );
        });

    f.render_widget(canvas, area);
}

/// Step plot: a vertical run at each step's quantity up to the next price, then across to the
/// next quantity.
fn draw_steps(
    ctx: &mut Context<'_>,
    steps: &[DepthStep],
    color: Color,
    point: impl Fn(&DepthStep) -> (f64, f64),
) {
    for (from, to) in steps.iter().map(&point).tuple_windows() {
        ctx.draw(&CanvasLine {
            x1: from.0,
            y1: from.1,
            x2: from.0,
            y2: to.1,
            color,
        });
        ctx.draw(&CanvasLine {
            x1: from.0,
            y1: to.1,
            x2: to.0,
            y2: to.1,
            color,
        });
    }

    if let [single] = steps {
        let (x, y) = point(single);
        ctx.draw(&CanvasLine {
            x1: 0.0,
            y1: y,
            x2: x,
            y2: y,
            color,
        });
    }
}
