/// Depthscope
///
/// Order-flow chart for a single Binance USD-M futures symbol:
/// - Candles with taker buy/sell bubbles
/// - Cumulative depth from a synchronised order book
/// - Volume and open interest panes
///
/// Keys: a autoscale | arrows pan | +/- zoom time | [ ] tick size | Tab next symbol | q quit
/// Mouse: drag to pan, scroll to zoom (over the depth pane scroll zooms price)
use crossterm::{
    event::{
        self, DisableMouseCapture, EnableMouseCapture, Event, KeyCode, KeyEvent, MouseButton,
        MouseEvent, MouseEventKind,
    },
    execute,
    terminal::{EnterAlternateScreen, LeaveAlternateScreen, disable_raw_mode, enable_raw_mode},
};
use depthscope_tui::{
    ChartConfig, ChartLayout, ChartManager, FeedController, FeedEvent, ViewportError, render_chart,
};
use ratatui::{
    Terminal,
    backend::CrosstermBackend,
    layout::{Position, Rect},
};
use rust_decimal::Decimal;
use rustls::crypto::ring::default_provider;
use std::{
    error::Error,
    fs::File,
    io,
    sync::Mutex,
    time::Instant,
};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};
use tracing_subscriber::EnvFilter;

/// Horizontal zoom step per scroll notch or key press.
const ZOOM_STEP: f64 = 100.0;

/// Pan step in dots per arrow key press.
const PAN_STEP: f64 = 8.0;

/// Braille dots per terminal cell.
const DOTS_PER_COLUMN: f64 = 2.0;
const DOTS_PER_ROW: f64 = 4.0;

/// Input state carried between terminal events.
#[derive(Debug, Default)]
struct InputState {
    symbol_index: usize,
    drag_origin: Option<(u16, u16)>,
    surface_sizes: Option<(Vec<f64>, Vec<f64>)>,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn Error>> {
    // Install rustls crypto provider for REST and WSS
    let _ = default_provider().install_default();

    let config = ChartConfig::from_env()?;

    // The terminal belongs to the chart, logs go to a file
    let log_file = File::create(&config.log_path)?;
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_ansi(false)
        .with_writer(Mutex::new(log_file))
        .init();

    info!(symbols = ?config.symbols, "starting depthscope");

    // Setup panic hook to restore terminal
    let original_hook = std::panic::take_hook();
    std::panic::set_hook(Box::new(move |panic_info| {
        let _ = disable_raw_mode();
        let _ = execute!(io::stdout(), LeaveAlternateScreen, DisableMouseCapture);
        original_hook(panic_info);
    }));

    // Setup terminal
    enable_raw_mode()?;
    let mut stdout = io::stdout();
    execute!(stdout, EnterAlternateScreen, EnableMouseCapture)?;
    let backend = CrosstermBackend::new(stdout);
    let mut terminal = Terminal::new(backend)?;

    // Feed collaborators report back over a single channel
    let (tx, mut rx) = mpsc::channel::<FeedEvent>(config.channel_buffer_size);
    let controller = FeedController::new(config.clone(), tx)?;

    let mut manager = ChartManager::from_config(&config);
    let mut input = InputState::default();
    if let Some(symbol) = config.symbols.first() {
        manager.change_symbol(symbol.clone());
    }
    manager.render_start();

    let render_interval = manager.render_interval();
    let mut last_eviction = Instant::now();

    // Main loop
    let result = loop {
        let tick_start = Instant::now();

        // Drain feed events
        while let Ok(event) = rx.try_recv() {
            manager.apply_event(event);
        }

        for request in manager.drain_requests() {
            controller.dispatch(request);
        }

        if last_eviction.elapsed() >= config.eviction_interval {
            let evicted = manager.maintain();
            if evicted > 0 {
                debug!(evicted, "trade ledger evicted");
            }
            last_eviction = Instant::now();
        }

        // Keep the viewport in sync with the terminal size
        let size = terminal.size()?;
        let layout = ChartLayout::new(Rect::new(0, 0, size.width, size.height));
        let sizes = layout.surface_sizes();
        if input.surface_sizes.as_ref() != Some(&sizes) {
            if let Err(error) = manager.resize(&sizes.0, &sizes.1) {
                warn!(%error, "failed to resize chart surfaces");
            }
            input.surface_sizes = Some(sizes);
        }

        terminal.draw(|f| render_chart(f, &manager.view()))?;

        // Wait for input until the next tick
        let remaining = render_interval.saturating_sub(tick_start.elapsed());
        if event::poll(remaining)? {
            match event::read()? {
                Event::Key(key) => {
                    if handle_key(key, &mut manager, &mut input, &config) {
                        break Ok(());
                    }
                }
                Event::Mouse(mouse) => handle_mouse(mouse, &mut manager, &mut input, &layout),
                _ => {}
            }
        }
    };

    // Restore terminal
    disable_raw_mode()?;
    execute!(
        terminal.backend_mut(),
        LeaveAlternateScreen,
        DisableMouseCapture
    )?;
    terminal.show_cursor()?;

    info!("depthscope stopped");
    result
}

/// Returns `true` when the chart should quit.
fn handle_key(
    key: KeyEvent,
    manager: &mut ChartManager,
    input: &mut InputState,
    config: &ChartConfig,
) -> bool {
    match key.code {
        KeyCode::Char('q') | KeyCode::Esc => return true,
        KeyCode::Char('a') => {
            manager.toggle_autoscale();
        }
        KeyCode::Char('+') | KeyCode::Char('=') => manager.zoom_x(ZOOM_STEP),
        KeyCode::Char('-') => manager.zoom_x(-ZOOM_STEP),
        KeyCode::Left => pan(manager, PAN_STEP, 0.0),
        KeyCode::Right => pan(manager, -PAN_STEP, 0.0),
        KeyCode::Up => pan(manager, 0.0, PAN_STEP),
        KeyCode::Down => pan(manager, 0.0, -PAN_STEP),
        KeyCode::Char('[') => step_tick_size(manager, -1),
        KeyCode::Char(']') => step_tick_size(manager, 1),
        KeyCode::Tab if !config.symbols.is_empty() => {
            input.symbol_index = (input.symbol_index + 1) % config.symbols.len();
            let symbol = config.symbols[input.symbol_index].clone();
            let generation = manager.change_symbol(symbol.clone());
            info!(%symbol, %generation, "symbol changed");
        }
        _ => {}
    }
    false
}

fn handle_mouse(
    mouse: MouseEvent,
    manager: &mut ChartManager,
    input: &mut InputState,
    layout: &ChartLayout,
) {
    match mouse.kind {
        MouseEventKind::Down(MouseButton::Left) => {
            input.drag_origin = Some((mouse.column, mouse.row));
        }
        MouseEventKind::Drag(MouseButton::Left) => {
            if let Some((column, row)) = input.drag_origin {
                let dx = (f64::from(mouse.column) - f64::from(column)) * DOTS_PER_COLUMN;
                let dy = (f64::from(mouse.row) - f64::from(row)) * DOTS_PER_ROW;
                pan(manager, dx, dy);
            }
            input.drag_origin = Some((mouse.column, mouse.row));
        }
        MouseEventKind::Up(MouseButton::Left) => input.drag_origin = None,
        MouseEventKind::ScrollUp | MouseEventKind::ScrollDown => {
            let direction = if mouse.kind == MouseEventKind::ScrollUp {
                1.0
            } else {
                -1.0
            };

            if layout.depth.contains(Position::new(mouse.column, mouse.row)) {
                zoom_price(manager, -direction * ZOOM_STEP);
            } else {
                manager.zoom_x(direction * ZOOM_STEP);
            }
        }
        _ => {}
    }
}

fn pan(manager: &mut ChartManager, dx: f64, dy: f64) {
    match manager.pan_xy(dx, dy) {
        Ok(()) => {}
        Err(ViewportError::AutoscaleActive) => {
            debug!("vertical pan ignored while autoscale is on")
        }
        Err(error) => warn!(%error, "pan rejected"),
    }
}

/// Price zoom switches to a manual scale first.
fn zoom_price(manager: &mut ChartManager, delta: f64) {
    if manager.get_autoscale() {
        manager.toggle_autoscale();
    }
    if let Err(error) = manager.zoom_y(delta) {
        warn!(%error, "price zoom rejected");
    }
}

/// Move the selected tick size one symbol tick up or down.
fn step_tick_size(manager: &mut ChartManager, steps: i64) {
    let base = manager.viewport().metadata().tick_size;
    let target = (manager.viewport().tick_size() + base * Decimal::from(steps)).max(base);
    match manager.set_tick_size(target) {
        Ok(tick_size) => info!(%tick_size, "tick size changed"),
        Err(error) => warn!(%error, "tick size rejected"),
    }
}
