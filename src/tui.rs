use anyhow::Result;
use chrono::{Datelike, NaiveDate};
use crossterm::{
    event::{self, DisableMouseCapture, EnableMouseCapture, Event, KeyCode, KeyEvent, KeyEventKind},
    execute,
    terminal::{EnterAlternateScreen, LeaveAlternateScreen, disable_raw_mode, enable_raw_mode},
};
use ratatui::{
    prelude::*,
    symbols::Marker,
    text::Line,
    widgets::{Axis, Block, Borders, Chart, Clear, Dataset, GraphType, List, ListItem, Paragraph},
};
use std::io;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{info, warn};

use crate::analysis::{self, Analysis, MacdReport};
use crate::filter_utils::filter_tickers;
use crate::price_cache::PriceSeries;
use crate::provider::{PriceProvider, normalize_symbol};
use crate::storage_utils::{AsyncStorageManager, MacdConfig};
use crate::tickers::TickerName;

const PERIOD_RANGE: std::ops::RangeInclusive<usize> = 1..=100;
const SERIES_COLORS: [Color; 6] = [
    Color::Cyan,
    Color::Yellow,
    Color::Magenta,
    Color::Green,
    Color::LightRed,
    Color::LightBlue,
];

/// What the dashboard needs to reach the cache and the provider.
#[derive(Clone)]
pub struct Services {
    pub storage: Arc<AsyncStorageManager>,
    pub provider: Arc<dyn PriceProvider>,
    pub start: NaiveDate,
}

struct Loaded {
    history: Vec<PriceSeries>,
    failures: Option<String>,
    report: Option<MacdReport>,
}

#[derive(Debug, PartialEq, Eq)]
enum Action {
    None,
    Load,
    Quit,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Period {
    Fast,
    Slow,
    Signal,
}

// --- App State ---

struct App {
    tickers: Vec<TickerName>,
    query: String,
    searching: bool,
    cursor: usize,
    selected: Vec<String>,
    analysis: Analysis,
    params: MacdConfig,
    focused: Period,
    history: Vec<PriceSeries>,
    report: Option<MacdReport>,
    status: String,
    is_loading: bool,
}

impl App {
    fn new(tickers: Vec<TickerName>, params: MacdConfig) -> Self {
        Self {
            tickers,
            query: String::new(),
            searching: false,
            cursor: 0,
            selected: Vec::new(),
            analysis: Analysis::Macd,
            params,
            focused: Period::Fast,
            history: Vec::new(),
            report: None,
            status: "Select tickers with Space, Enter loads them".to_string(),
            is_loading: false,
        }
    }

    fn visible(&self) -> Vec<&TickerName> {
        filter_tickers(&self.tickers, &self.query)
    }

    fn name_of(&self, symbol: &str) -> String {
        self.tickers
            .iter()
            .find(|t| t.symbol == symbol || normalize_symbol(&t.symbol) == symbol)
            .map_or_else(|| symbol.to_string(), |t| t.name.clone())
    }

    fn toggle_under_cursor(&mut self) {
        let Some(symbol) = self.visible().get(self.cursor).map(|t| t.symbol.clone()) else {
            return;
        };
        if let Some(pos) = self.selected.iter().position(|s| *s == symbol) {
            self.selected.remove(pos);
        } else {
            self.selected.push(symbol);
        }
    }

    fn period_mut(&mut self) -> &mut usize {
        match self.focused {
            Period::Fast => &mut self.params.fast,
            Period::Slow => &mut self.params.slow,
            Period::Signal => &mut self.params.signal,
        }
    }

    fn adjust_period(&mut self, delta: isize) {
        let period = self.period_mut();
        let next = period.saturating_add_signed(delta);
        *period = next.clamp(*PERIOD_RANGE.start(), *PERIOD_RANGE.end());
        self.recompute();
    }

    /// Re-runs the analysis on the already loaded series after a parameter change.
    fn recompute(&mut self) {
        let Some(report) = self.report.take() else {
            return;
        };
        let name = self.name_of(&report.series.symbol);
        match analysis::macd_report(report.series.clone(), &name, self.params) {
            Ok(updated) => self.report = Some(updated),
            Err(e) => {
                self.status = e.to_string();
                self.report = Some(report);
            }
        }
    }

    fn set_loaded(&mut self, loaded: Loaded) {
        self.status = match loaded.failures {
            Some(failures) => format!("Loaded {} series. {}", loaded.history.len(), failures),
            None => format!("Loaded {} series", loaded.history.len()),
        };
        self.history = loaded.history;
        self.report = loaded.report;
        self.is_loading = false;
        // Periods may have changed while the load was running.
        self.recompute();
    }
}

// --- TUI ---

pub async fn run_tui(services: Services, tickers: Vec<TickerName>, params: MacdConfig) -> Result<()> {
    enable_raw_mode()?;
    let mut stdout = io::stdout();
    execute!(stdout, EnterAlternateScreen, EnableMouseCapture)?;
    let backend = CrosstermBackend::new(stdout);
    let mut terminal = Terminal::new(backend)?;

    let res = run_app(&mut terminal, services, App::new(tickers, params)).await;

    disable_raw_mode()?;
    execute!(
        terminal.backend_mut(),
        LeaveAlternateScreen,
        DisableMouseCapture
    )?;
    terminal.show_cursor()?;
    res
}

async fn run_app<B: Backend>(terminal: &mut Terminal<B>, services: Services, mut app: App) -> Result<()> {
    let (data_tx, mut data_rx) = mpsc::channel::<std::result::Result<Loaded, String>>(1);

    loop {
        terminal.draw(|f| ui(f, &app))?;

        if let Ok(result) = data_rx.try_recv() {
            match result {
                Ok(loaded) => app.set_loaded(loaded),
                Err(e) => {
                    warn!("Loading failed: {}", e);
                    app.status = e;
                    app.is_loading = false;
                }
            }
        }

        if event::poll(Duration::from_millis(50))? {
            if let Event::Key(key) = event::read()? {
                match handle_key_event(key, &mut app) {
                    Action::Quit => return Ok(()),
                    Action::Load => spawn_load(&services, &mut app, &data_tx),
                    Action::None => {}
                }
            }
            // Resize events need no handling, the next draw picks up the new size.
        }
    }
}

fn spawn_load(services: &Services, app: &mut App, tx: &mpsc::Sender<std::result::Result<Loaded, String>>) {
    if app.is_loading {
        return;
    }
    app.is_loading = true;
    app.status = format!("Loading {}...", app.selected.join(", "));
    info!("Loading {:?}", app.selected);

    let services = services.clone();
    let symbols = app.selected.clone();
    // Analysis only runs on exactly one ticker.
    let analysed = match symbols.as_slice() {
        [single] => Some(app.name_of(single)),
        _ => None,
    };
    let params = app.params;
    let tx = tx.clone();

    tokio::spawn(async move {
        let result = async {
            let history = analysis::price_history(
                &symbols,
                &services.storage,
                services.provider.as_ref(),
                services.start,
            )
            .await;
            let report = match (analysed, history.series.first()) {
                (Some(name), Some(series)) => {
                    Some(analysis::macd_report(series.clone(), &name, params)?)
                }
                _ => None,
            };
            Ok::<_, crate::error::ExplorerError>(Loaded {
                failures: history.failure_summary(),
                history: history.series,
                report,
            })
        }
        .await
        .map_err(|e| e.to_string());
        let _ = tx.send(result).await;
    });
}

fn handle_key_event(key: KeyEvent, app: &mut App) -> Action {
    if key.kind != KeyEventKind::Press {
        return Action::None;
    }

    if app.searching {
        match key.code {
            KeyCode::Esc | KeyCode::Enter => app.searching = false,
            KeyCode::Backspace => {
                app.query.pop();
                app.cursor = 0;
            }
            KeyCode::Char(c) => {
                app.query.push(c);
                app.cursor = 0;
            }
            _ => {}
        }
        return Action::None;
    }

    match key.code {
        KeyCode::Char('q') | KeyCode::Esc => return Action::Quit,
        KeyCode::Char('/') => app.searching = true,
        KeyCode::Up => app.cursor = app.cursor.saturating_sub(1),
        KeyCode::Down => {
            let len = app.visible().len();
            if len > 0 {
                app.cursor = (app.cursor + 1).min(len - 1);
            }
        }
        KeyCode::Char(' ') => app.toggle_under_cursor(),
        KeyCode::Char('c') => {
            app.selected.clear();
            app.history.clear();
            app.report = None;
        }
        KeyCode::Enter if !app.selected.is_empty() => return Action::Load,
        KeyCode::Char('a') => {
            let i = Analysis::ALL.iter().position(|a| *a == app.analysis).unwrap_or(0);
            app.analysis = Analysis::ALL[(i + 1) % Analysis::ALL.len()];
        }
        KeyCode::Tab => {
            app.focused = match app.focused {
                Period::Fast => Period::Slow,
                Period::Slow => Period::Signal,
                Period::Signal => Period::Fast,
            }
        }
        KeyCode::Char('+') | KeyCode::Right => app.adjust_period(1),
        KeyCode::Char('-') | KeyCode::Left => app.adjust_period(-1),
        _ => {}
    }
    Action::None
}

// --- Rendering ---

fn ui(f: &mut Frame, app: &App) {
    let main_layout = Layout::horizontal([Constraint::Percentage(30), Constraint::Percentage(70)])
        .split(f.size());

    render_sidebar(f, app, main_layout[0]);

    let right = Layout::vertical([
        Constraint::Percentage(35),
        Constraint::Length(3),
        Constraint::Min(0),
    ])
    .split(main_layout[1]);

    render_history(f, app, right[0]);
    render_parameters(f, app, right[1]);
    render_analysis(f, app, right[2]);

    if app.is_loading {
        let area = centered_rect(50, 20, main_layout[1]);
        f.render_widget(Clear, area);
        f.render_widget(
            Paragraph::new("Fetching price history...\nPlease wait.")
                .block(Block::default().title("Loading").borders(Borders::ALL))
                .alignment(Alignment::Center),
            area,
        );
    }
}

fn render_sidebar(f: &mut Frame, app: &App, area: Rect) {
    let block = Block::default().borders(Borders::ALL).title("Tickers");
    let inner = block.inner(area);
    f.render_widget(block, area);

    let chunks = Layout::vertical([
        Constraint::Length(1),
        Constraint::Min(1),
        Constraint::Length(2),
    ])
    .split(inner);

    let search_style = if app.searching {
        Style::default().fg(Color::Yellow)
    } else {
        Style::default().fg(Color::DarkGray)
    };
    f.render_widget(
        Paragraph::new(format!("/ {}", app.query)).style(search_style),
        chunks[0],
    );

    let visible = app.visible();
    // Keep the cursor on screen.
    let height = chunks[1].height as usize;
    let offset = app.cursor.saturating_sub(height.saturating_sub(1));
    let items: Vec<ListItem> = visible
        .iter()
        .enumerate()
        .skip(offset)
        .take(height)
        .map(|(i, ticker)| {
            let mark = if app.selected.contains(&ticker.symbol) { "[x]" } else { "[ ]" };
            let mut item = ListItem::new(format!("{} {}", mark, ticker.label()));
            if i == app.cursor {
                item = item.style(Style::default().fg(Color::Yellow).bg(Color::DarkGray));
            }
            item
        })
        .collect();
    f.render_widget(List::new(items), chunks[1]);

    f.render_widget(
        Paragraph::new(vec![
            Line::from("Space select  Enter load  / search"),
            Line::from(app.status.clone()).style(Style::default().fg(Color::DarkGray)),
        ]),
        chunks[2],
    );
}

fn day_number(date: NaiveDate) -> f64 {
    date.num_days_from_ce() as f64
}

fn bounds(points: &[Vec<(f64, f64)>]) -> Option<([f64; 2], [f64; 2])> {
    let mut all = points.iter().flatten();
    let first = all.next()?;
    let init = ([first.0, first.0], [first.1, first.1]);
    Some(all.fold(init, |([x0, x1], [y0, y1]), &(x, y)| {
        ([x0.min(x), x1.max(x)], [y0.min(y), y1.max(y)])
    }))
}

fn axis_labels(range: [f64; 2], fmt: impl Fn(f64) -> String) -> Vec<Span<'static>> {
    vec![Span::raw(fmt(range[0])), Span::raw(fmt(range[1]))]
}

fn date_label(x: f64) -> String {
    NaiveDate::from_num_days_from_ce_opt(x as i32)
        .map(|d| d.format("%Y-%m-%d").to_string())
        .unwrap_or_default()
}

fn line_chart<'a>(
    title: String,
    series: &'a [(String, Color, Vec<(f64, f64)>)],
    points: &[Vec<(f64, f64)>],
) -> Chart<'a> {
    let datasets = series
        .iter()
        .map(|(name, color, data)| {
            Dataset::default()
                .name(name.clone())
                .marker(Marker::Braille)
                .graph_type(GraphType::Line)
                .style(Style::default().fg(*color))
                .data(data)
        })
        .collect();

    let (x_range, y_range) = bounds(points).unwrap_or(([0.0, 1.0], [0.0, 1.0]));
    Chart::new(datasets)
        .block(Block::default().borders(Borders::ALL).title(title))
        .x_axis(
            Axis::default()
                .bounds(x_range)
                .labels(axis_labels(x_range, date_label)),
        )
        .y_axis(
            Axis::default()
                .bounds(y_range)
                .labels(axis_labels(y_range, |y| format!("{:.2}", y))),
        )
}

fn render_history(f: &mut Frame, app: &App, area: Rect) {
    let series: Vec<(String, Color, Vec<(f64, f64)>)> = app
        .history
        .iter()
        .enumerate()
        .map(|(i, s)| {
            let data = s
                .bars
                .iter()
                .map(|b| (day_number(b.timestamp), b.close))
                .collect();
            (s.symbol.clone(), SERIES_COLORS[i % SERIES_COLORS.len()], data)
        })
        .collect();
    let points: Vec<Vec<(f64, f64)>> = series.iter().map(|(_, _, d)| d.clone()).collect();

    f.render_widget(
        line_chart("Explore the market: close prices".to_string(), &series, &points),
        area,
    );
}

fn render_parameters(f: &mut Frame, app: &App, area: Rect) {
    let field = |label: &str, value: usize, period: Period| {
        let style = if app.focused == period {
            Style::default().fg(Color::Yellow).add_modifier(Modifier::BOLD)
        } else {
            Style::default()
        };
        Span::styled(format!(" {}: {:>3} ", label, value), style)
    };
    let line = Line::from(vec![
        Span::raw(format!("{}  ", app.analysis)),
        field("Fast period", app.params.fast, Period::Fast),
        field("Slow period", app.params.slow, Period::Slow),
        field("Signal period", app.params.signal, Period::Signal),
        Span::styled("  a analysis  Tab/+/- adjust", Style::default().fg(Color::DarkGray)),
    ]);
    f.render_widget(
        Paragraph::new(line).block(Block::default().borders(Borders::ALL).title("Analyse one stock in detail")),
        area,
    );
}

fn render_analysis(f: &mut Frame, app: &App, area: Rect) {
    let Some(report) = &app.report else {
        let hint = if app.selected.len() > 1 {
            "Analysis needs exactly one selected ticker"
        } else {
            "Load a single ticker to see its analysis"
        };
        f.render_widget(
            Paragraph::new(hint)
                .alignment(Alignment::Center)
                .block(Block::default().borders(Borders::ALL)),
            area,
        );
        return;
    };

    let chunks = Layout::vertical([Constraint::Percentage(50), Constraint::Percentage(50)]).split(area);
    let xs: Vec<f64> = report.indicator.timestamps.iter().map(|d| day_number(*d)).collect();
    let zip = |values: &[f64]| -> Vec<(f64, f64)> { xs.iter().copied().zip(values.iter().copied()).collect() };

    let closes: Vec<f64> = report.candles.candles.iter().map(|b| b.close).collect();
    let price_series = vec![
        ("Close".to_string(), Color::White, zip(&closes)),
        ("Fast signal".to_string(), Color::Cyan, zip(&report.candles.fast_ema)),
        ("Slow signal".to_string(), Color::Magenta, zip(&report.candles.slow_ema)),
    ];
    // Candle wicks set the vertical range even though only closes are drawn.
    let wicks: Vec<(f64, f64)> = report
        .candles
        .candles
        .iter()
        .flat_map(|b| [(day_number(b.timestamp), b.low), (day_number(b.timestamp), b.high)])
        .collect();
    let price_points = vec![wicks];
    f.render_widget(
        line_chart(report.candles.title.clone(), &price_series, &price_points),
        chunks[0],
    );

    let indicator_series = vec![
        ("MACD".to_string(), Color::Cyan, zip(&report.indicator.macd)),
        ("Signal".to_string(), Color::Yellow, zip(&report.indicator.signal)),
        ("Divergence".to_string(), Color::Green, zip(&report.indicator.divergence)),
    ];
    let indicator_points: Vec<Vec<(f64, f64)>> =
        indicator_series.iter().map(|(_, _, d)| d.clone()).collect();
    f.render_widget(
        line_chart(report.indicator.title.clone(), &indicator_series, &indicator_points),
        chunks[1],
    );
}

fn centered_rect(percent_x: u16, percent_y: u16, r: Rect) -> Rect {
    let popup_layout = Layout::vertical([
        Constraint::Percentage((100 - percent_y) / 2),
        Constraint::Percentage(percent_y),
        Constraint::Percentage((100 - percent_y) / 2),
    ])
    .split(r);
    Layout::horizontal([
        Constraint::Percentage((100 - percent_x) / 2),
        Constraint::Percentage(percent_x),
        Constraint::Percentage((100 - percent_x) / 2),
    ])
    .split(popup_layout[1])[1]
}
