//! Ratatui rendering of a [`ChartView`].
//!
//! Every surface is a braille [`Canvas`](ratatui::widgets::canvas::Canvas) whose bounds are its
//! size in dots, so a [`Projection`](crate::viewport::Projection) maps data straight onto it.

use crate::{feed::ConnectionStatus, manager::ChartView};
use depthscope_data::books::sync::SyncState;
use ratatui::{
    Frame,
    layout::{Constraint, Direction, Layout, Rect},
    style::{Color, Modifier, Style},
    text::{Line, Span},
    widgets::{Block, Borders, Paragraph},
};

/// Candlesticks, trade bubbles and time labels.
pub mod candles;

/// Trade bubble grouping.
pub mod bubbles;

/// Cumulative depth step plot.
pub mod depth;

/// Volume and open interest panes.
pub mod indicators;

// Palette
pub const C_BUY: Color = Color::Rgb(100, 220, 100); // Green
pub const C_SELL: Color = Color::Rgb(220, 100, 100); // Red
pub const C_NEUTRAL: Color = Color::Rgb(180, 180, 100); // Yellow
pub const C_DIM: Color = Color::Rgb(120, 120, 120); // Gray
pub const C_BRIGHT: Color = Color::Rgb(220, 220, 220); // White
pub const C_ACCENT: Color = Color::Rgb(100, 180, 220); // Cyan
pub const C_HEADER: Color = Color::Rgb(180, 130, 220); // Purple

/// Screen areas of every surface, in `Surface::ALL` order after the status bar.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub struct ChartLayout {
    pub status: Rect,
    pub main: Rect,
    pub depth: Rect,
    pub volume: Rect,
    pub open_interest: Rect,
}

impl ChartLayout {
    pub fn new(area: Rect) -> Self {
        let rows = Layout::default()
            .direction(Direction::Vertical)
            .constraints([
                Constraint::Length(1), // Status bar
                Constraint::Min(8),    // Candles + depth
                Constraint::Length(6), // Volume
                Constraint::Length(6), // Open interest
            ])
            .split(area);

        let top = Layout::default()
            .direction(Direction::Horizontal)
            .constraints([Constraint::Percentage(80), Constraint::Percentage(20)])
            .split(rows[1]);

        Self {
            status: rows[0],
            main: top[0],
            depth: top[1],
            volume: rows[2],
            open_interest: rows[3],
        }
    }

    /// Canvas areas inside the surface borders.
    pub fn canvases(&self) -> [Rect; 4] {
        [self.main, self.depth, self.volume, self.open_interest]
            .map(|area| Block::default().borders(Borders::ALL).inner(area))
    }

    /// Surface widths and heights in dots. Braille packs 2x4 dots per cell.
    pub fn surface_sizes(&self) -> (Vec<f64>, Vec<f64>) {
        self.canvases()
            .iter()
            .map(|area| (f64::from(area.width) * 2.0, f64::from(area.height) * 4.0))
            .unzip()
    }
}

/// Paint every surface of `view` into the frame.
pub fn render_chart(f: &mut Frame, view: &ChartView<'_>) {
    let layout = ChartLayout::new(f.area());
    let window = view.time_window();
    let range = view.price_range(&window);

    render_status(f, layout.status, view);
    candles::render_main(f, layout.main, view, &window, range);
    depth::render_depth(f, layout.depth, view, &window, range);
    indicators::render_volume(f, layout.volume, view, &window);
    indicators::render_open_interest(f, layout.open_interest, view, &window);
}

/// Surface frame with a title, dimmed when there is nothing to show.
pub(crate) fn surface_block(title: String, active: bool) -> Block<'static> {
    let color = if active { C_ACCENT } else { C_DIM };
    Block::default()
        .title(Span::styled(title, Style::default().fg(C_HEADER)))
        .borders(Borders::ALL)
        .border_style(Style::default().fg(color))
}

/// Placeholder shown inside a surface until data arrives.
pub(crate) fn render_placeholder(f: &mut Frame, area: Rect, block: Block<'_>, text: &str) {
    let placeholder = Paragraph::new(Line::from(Span::styled(
        text.to_string(),
        Style::default().fg(C_DIM),
    )))
    .block(block);
    f.render_widget(placeholder, area);
}

fn render_status(f: &mut Frame, area: Rect, view: &ChartView<'_>) {
    let mut spans = Vec::new();

    let Some(session) = view.session else {
        spans.push(Span::styled(
            " no symbol selected ",
            Style::default().fg(C_DIM),
        ));
        f.render_widget(Paragraph::new(Line::from(spans)), area);
        return;
    };

    spans.push(Span::styled(
        format!(" {} ", session.symbol),
        Style::default().fg(C_BRIGHT).add_modifier(Modifier::BOLD),
    ));

    let (connection, connection_color) = match view.connection {
        ConnectionStatus::Connected => ("LIVE", C_BUY),
        ConnectionStatus::Reconnecting => ("CONNECTING", C_NEUTRAL),
        ConnectionStatus::Disconnected => ("OFFLINE", C_SELL),
    };
    spans.push(Span::styled(
        format!(" {connection} "),
        Style::default().fg(connection_color),
    ));

    let sync_color = match session.sync.state() {
        SyncState::Synchronized => C_BUY,
        SyncState::Idle => C_DIM,
        SyncState::Buffering | SyncState::Resyncing => C_NEUTRAL,
    };
    spans.push(Span::styled(
        format!(" book:{} ", session.sync.state()),
        Style::default().fg(sync_color),
    ));

    if session.sync.is_persistently_desynced() {
        spans.push(Span::styled(
            " DESYNC ",
            Style::default().fg(C_SELL).add_modifier(Modifier::BOLD),
        ));
    }

    let scale = if view.viewport.autoscale() {
        "AUTO"
    } else {
        "MANUAL"
    };
    spans.push(Span::styled(
        format!(" y:{scale} "),
        Style::default().fg(C_ACCENT),
    ));
    spans.push(Span::styled(
        format!(" tick:{} ", view.viewport.tick_size().normalize()),
        Style::default().fg(C_DIM),
    ));

    if let Some(window_start) = view.backfill_focus {
        spans.push(Span::styled(
            format!(" backfill:{} ", candles::time_label(window_start)),
            Style::default().fg(C_NEUTRAL),
        ));
    }

    let millis = view.render_interval.as_millis().max(1);
    spans.push(Span::styled(
        format!(" {}fps ", 1000 / millis),
        Style::default().fg(C_DIM),
    ));
    if !view.rendering {
        spans.push(Span::styled(" paused ", Style::default().fg(C_SELL)));
    }

    f.render_widget(Paragraph::new(Line::from(spans)), area);
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::manager::ChartManager;
    use depthscope_data::books::sync::SyncConfig;
    use ratatui::{Terminal, backend::TestBackend, buffer::Buffer};
    use std::time::Duration;

    pub(crate) fn buffer_text(buffer: &Buffer) -> String {
        buffer.content().iter().map(|cell| cell.symbol()).collect()
    }

    pub(crate) fn draw(manager: &mut ChartManager, width: u16, height: u16) -> String {
        let layout = ChartLayout::new(Rect::new(0, 0, width, height));
        let (widths, heights) = layout.surface_sizes();
        manager.resize(&widths, &heights).unwrap();

        let mut terminal = Terminal::new(TestBackend::new(width, height)).unwrap();
        terminal.draw(|f| render_chart(f, &manager.view())).unwrap();
        buffer_text(terminal.backend().buffer())
    }

    #[test]
    fn test_layout_surface_sizes() {
        let layout = ChartLayout::new(Rect::new(0, 0, 100, 40));
        let (widths, heights) = layout.surface_sizes();

        assert_eq!(layout.status.height, 1);
        assert_eq!(layout.main.width, 80);
        assert_eq!(widths, vec![156.0, 36.0, 196.0, 196.0]);
        assert_eq!(heights, vec![100.0, 100.0, 16.0, 16.0]);
    }

    #[test]
    fn test_render_without_symbol() {
        let mut manager = ChartManager::new(SyncConfig::default(), Duration::from_millis(33));
        let text = draw(&mut manager, 100, 40);
        assert!(text.contains("no symbol selected"));
    }

    #[test]
    fn test_render_status_bar() {
        let mut manager = ChartManager::new(SyncConfig::default(), Duration::from_millis(33));
        manager.change_symbol("btcusdt");
        manager.render_start();

        let text = draw(&mut manager, 100, 40);
        assert!(text.contains("BTCUSDT"));
        assert!(text.contains("book:Buffering"));
        assert!(text.contains("y:AUTO"));
        assert!(text.contains("30fps"));
    }
}
