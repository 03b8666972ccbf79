use anyhow::Result;
use chrono::NaiveDate;
use crossterm::{
    event::{
        self, DisableMouseCapture, EnableMouseCapture, Event, KeyCode, KeyEvent, KeyEventKind,
        KeyModifiers,
    },
    execute,
    terminal::{EnterAlternateScreen, LeaveAlternateScreen, disable_raw_mode, enable_raw_mode},
};
use ratatui::{
    prelude::*,
    symbols::Marker,
    text::Line,
    widgets::{
        Axis, BarChart, Block, Borders, Cell, Chart, Clear, Dataset, GraphType, Paragraph, Row,
        Table, Wrap,
    },
};
use std::io;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::info;

use crate::market_data::MarketDataSource;
use crate::pipeline::{self, PipelineError, PipelineOutput, RequestParams, Severity};
use crate::presentation::{self, Palette, Theme, Trace, TraceKind};
use crate::storage_utils::AsyncStorageManager;

const DATE_INPUT_FORMAT: &str = "%Y-%m-%d";

// --- Form & App State ---

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Field {
    Ticker,
    Start,
    End,
    ShowMa,
    Ma1,
    Ma2,
    ShowBollinger,
    ShowVolume,
    Theme,
}

const FIELDS: [Field; 9] = [
    Field::Ticker,
    Field::Start,
    Field::End,
    Field::ShowMa,
    Field::Ma1,
    Field::Ma2,
    Field::ShowBollinger,
    Field::ShowVolume,
    Field::Theme,
];

impl Field {
    fn label(self) -> &'static str {
        match self {
            Field::Ticker => "Stock Symbol",
            Field::Start => "Start Date",
            Field::End => "End Date",
            Field::ShowMa => "Show Moving Averages",
            Field::Ma1 => "MA Window 1",
            Field::Ma2 => "MA Window 2",
            Field::ShowBollinger => "Show Bollinger Bands",
            Field::ShowVolume => "Show Volume Chart",
            Field::Theme => "Chart Theme",
        }
    }
}

/// Raw sidebar input. Text fields are kept as typed and parsed on submit.
#[derive(Debug, Clone, PartialEq)]
struct Form {
    ticker: String,
    start: String,
    end: String,
    show_ma: bool,
    ma1: String,
    ma2: String,
    show_bollinger: bool,
    show_volume: bool,
    theme: Theme,
}

fn parse_date(label: &str, text: &str) -> Result<NaiveDate, String> {
    NaiveDate::parse_from_str(text.trim(), DATE_INPUT_FORMAT)
        .map_err(|_| format!("{} must look like 2023-01-31.", label))
}

fn parse_window(label: &str, text: &str) -> Result<usize, String> {
    text.trim()
        .parse::<usize>()
        .map_err(|_| format!("{} must be a whole number.", label))
}

impl Form {
    fn from_params(params: &RequestParams) -> Self {
        Self {
            ticker: params.ticker.clone(),
            start: params.start.format(DATE_INPUT_FORMAT).to_string(),
            end: params.end.format(DATE_INPUT_FORMAT).to_string(),
            show_ma: params.show_moving_averages,
            ma1: params.ma_windows[0].to_string(),
            ma2: params.ma_windows[1].to_string(),
            show_bollinger: params.show_bollinger,
            show_volume: params.show_volume,
            theme: params.theme,
        }
    }

    fn to_params(&self) -> Result<RequestParams, String> {
        Ok(RequestParams {
            ticker: self.ticker.clone(),
            start: parse_date(Field::Start.label(), &self.start)?,
            end: parse_date(Field::End.label(), &self.end)?,
            show_moving_averages: self.show_ma,
            ma_windows: [
                parse_window(Field::Ma1.label(), &self.ma1)?,
                parse_window(Field::Ma2.label(), &self.ma2)?,
            ],
            show_bollinger: self.show_bollinger,
            show_volume: self.show_volume,
            theme: self.theme,
        })
    }

    fn text_mut(&mut self, field: Field) -> Option<&mut String> {
        match field {
            Field::Ticker => Some(&mut self.ticker),
            Field::Start => Some(&mut self.start),
            Field::End => Some(&mut self.end),
            Field::Ma1 => Some(&mut self.ma1),
            Field::Ma2 => Some(&mut self.ma2),
            _ => None,
        }
    }

    /// Flips a checkbox or the theme; returns false for text fields.
    fn toggle(&mut self, field: Field) -> bool {
        match field {
            Field::ShowMa => self.show_ma = !self.show_ma,
            Field::ShowBollinger => self.show_bollinger = !self.show_bollinger,
            Field::ShowVolume => self.show_volume = !self.show_volume,
            Field::Theme => self.theme = self.theme.toggled(),
            _ => return false,
        }
        true
    }

    fn display(&self, field: Field) -> String {
        let check = |on: bool| (if on { "[x]" } else { "[ ]" }).to_string();
        match field {
            Field::Ticker => self.ticker.clone(),
            Field::Start => self.start.clone(),
            Field::End => self.end.clone(),
            Field::ShowMa => check(self.show_ma),
            Field::Ma1 => self.ma1.clone(),
            Field::Ma2 => self.ma2.clone(),
            Field::ShowBollinger => check(self.show_bollinger),
            Field::ShowVolume => check(self.show_volume),
            Field::Theme => self.theme.label().to_string(),
        }
    }
}

enum Status {
    Info(String),
    Success(String),
    Warning(String),
    Error(String),
}

enum AppEvent {
    Fetched(Result<PipelineOutput, PipelineError>),
    Exported(Result<PathBuf, String>),
}

struct App {
    form: Form,
    selected: usize,
    is_fetching: bool,
    output: Option<PipelineOutput>,
    status: Status,
    source: Arc<dyn MarketDataSource>,
    exports: Arc<AsyncStorageManager>,
}

impl App {
    fn new(defaults: &RequestParams, source: Arc<dyn MarketDataSource>, exports: AsyncStorageManager) -> Self {
        Self {
            form: Form::from_params(defaults),
            selected: 0,
            is_fetching: false,
            output: None,
            status: Status::Info("Enter stock details and press Enter.".to_string()),
            source,
            exports: Arc::new(exports),
        }
    }

    fn field(&self) -> Field {
        FIELDS[self.selected]
    }

    fn start_fetch(&mut self, tx: &mpsc::Sender<AppEvent>) {
        let params = match self.form.to_params() {
            Ok(params) => params,
            Err(message) => {
                self.status = Status::Warning(message);
                return;
            }
        };

        self.is_fetching = true;
        let source = Arc::clone(&self.source);
        let tx_clone = tx.clone();
        tokio::spawn(async move {
            let result = pipeline::run(source.as_ref(), &params).await;
            let _ = tx_clone.send(AppEvent::Fetched(result)).await;
        });
    }

    fn start_export(&mut self, tx: &mpsc::Sender<AppEvent>) {
        let Some(output) = &self.output else {
            self.status = Status::Warning("Fetch data before exporting.".to_string());
            return;
        };
        let csv = match output.to_csv() {
            Ok(csv) => csv,
            Err(e) => {
                self.status = Status::Error(format!("Export failed: {}", e));
                return;
            }
        };

        let file_name = output.export_file_name();
        let exports = Arc::clone(&self.exports);
        let tx_clone = tx.clone();
        tokio::spawn(async move {
            let result = exports
                .save_text(&file_name, &csv)
                .await
                .map_err(|e| e.to_string());
            let _ = tx_clone.send(AppEvent::Exported(result)).await;
        });
    }

    fn apply_event(&mut self, event: AppEvent) {
        match event {
            AppEvent::Fetched(Ok(output)) => {
                self.status = Status::Success(output.success_message());
                self.output = Some(output);
                self.is_fetching = false;
            }
            AppEvent::Fetched(Err(e)) => {
                self.status = match e.severity() {
                    Severity::Warning => Status::Warning(e.user_message()),
                    Severity::Error => Status::Error(e.user_message()),
                };
                self.output = None;
                self.is_fetching = false;
            }
            AppEvent::Exported(Ok(path)) => {
                info!("Exported {:?}", path);
                self.status = Status::Success(format!("Saved {}", path.display()));
            }
            AppEvent::Exported(Err(e)) => {
                self.status = Status::Error(format!("Export failed: {}", e));
            }
        }
    }
}

// --- TUI ---

pub async fn run_tui(
    defaults: RequestParams,
    source: Arc<dyn MarketDataSource>,
    exports: AsyncStorageManager,
) -> Result<()> {
    enable_raw_mode()?;
    let mut stdout = io::stdout();
    execute!(stdout, EnterAlternateScreen, EnableMouseCapture)?;
    let backend = CrosstermBackend::new(stdout);
    let mut terminal = Terminal::new(backend)?;

    let mut app = App::new(&defaults, source, exports);
    let res = run_app(&mut terminal, &mut app).await;

    disable_raw_mode()?;
    execute!(
        terminal.backend_mut(),
        LeaveAlternateScreen,
        DisableMouseCapture
    )?;
    terminal.show_cursor()?;
    res
}

async fn run_app<B: Backend>(terminal: &mut Terminal<B>, app: &mut App) -> Result<()> {
    let (event_tx, mut event_rx) = mpsc::channel::<AppEvent>(4);

    loop {
        terminal.draw(|f| ui(f, app))?;

        while let Ok(event) = event_rx.try_recv() {
            app.apply_event(event);
        }

        if event::poll(Duration::from_millis(50))? {
            match event::read()? {
                Event::Key(key) if key.kind == KeyEventKind::Press => {
                    if !handle_key_event(key, app, &event_tx) {
                        return Ok(());
                    }
                }
                // draw() picks up the new size on the next iteration.
                Event::Resize(_, _) => {}
                _ => {}
            }
        }
    }
}

fn handle_key_event(key: KeyEvent, app: &mut App, tx: &mpsc::Sender<AppEvent>) -> bool {
    let field = app.field();
    match key.code {
        KeyCode::Esc => return false,
        KeyCode::Char('c') if key.modifiers.contains(KeyModifiers::CONTROL) => return false,
        KeyCode::Enter | KeyCode::F(5) if !app.is_fetching => app.start_fetch(tx),
        KeyCode::F(2) => app.start_export(tx),
        KeyCode::Up | KeyCode::BackTab => {
            app.selected = app.selected.checked_sub(1).unwrap_or(FIELDS.len() - 1);
        }
        KeyCode::Down | KeyCode::Tab => {
            app.selected = (app.selected + 1) % FIELDS.len();
        }
        KeyCode::Left | KeyCode::Right if field == Field::Theme => {
            app.form.toggle(field);
        }
        KeyCode::Char(' ') if app.form.toggle(field) => {}
        KeyCode::Char(c) => {
            if let Some(text) = app.form.text_mut(field) {
                text.push(c);
            }
        }
        KeyCode::Backspace => {
            if let Some(text) = app.form.text_mut(field) {
                text.pop();
            }
        }
        _ => {}
    }
    true
}

fn ui(f: &mut Frame, app: &App) {
    let palette = app.form.theme.palette();
    let base = Style::default().bg(palette.background).fg(palette.foreground);
    f.render_widget(Block::default().style(base), f.size());

    let main_layout = Layout::horizontal([Constraint::Percentage(24), Constraint::Percentage(76)])
        .split(f.size());

    render_sidebar(f, app, main_layout[0], base);

    let show_volume = app.output.as_ref().is_some_and(|o| o.params.show_volume);
    let mut constraints = vec![Constraint::Length(3), Constraint::Min(10)];
    if show_volume {
        constraints.push(Constraint::Percentage(25));
    }
    constraints.push(Constraint::Percentage(30));
    let right_chunks = Layout::vertical(constraints).split(main_layout[1]);

    render_status(f, &app.status, right_chunks[0], base);

    match &app.output {
        Some(output) => {
            render_price_chart(f, output, right_chunks[1], base, palette);
            if show_volume {
                render_volume_chart(f, output, right_chunks[2], base);
            }
            render_raw_table(f, output, right_chunks[right_chunks.len() - 1], base);
        }
        None => {
            let hint = Paragraph::new("No data loaded.")
                .style(base)
                .alignment(Alignment::Center)
                .block(Block::default().borders(Borders::ALL).title("Price Chart"));
            f.render_widget(hint, right_chunks[1]);
        }
    }

    if app.is_fetching {
        let area = centered_rect(60, 20, main_layout[1]);
        f.render_widget(Clear, area);
        f.render_widget(
            Paragraph::new("Fetching stock data...\nPlease wait.")
                .style(base)
                .block(Block::default().title("Loading").borders(Borders::ALL))
                .alignment(Alignment::Center),
            area,
        );
    }
}

fn render_sidebar(f: &mut Frame, app: &App, area: Rect, base: Style) {
    let sidebar_block = Block::default()
        .borders(Borders::ALL)
        .title("Enter Stock Details")
        .title_alignment(Alignment::Center)
        .style(base);
    let inner = sidebar_block.inner(area);
    f.render_widget(sidebar_block, area);

    let chunks = Layout::vertical([Constraint::Min(1), Constraint::Length(5)]).split(inner);

    let lines: Vec<Line> = FIELDS
        .iter()
        .enumerate()
        .map(|(i, field)| {
            let mut line = Line::from(format!("{}: {}", field.label(), app.form.display(*field)));
            if i == app.selected {
                line = line.style(Style::default().fg(Color::Yellow).bg(Color::DarkGray));
            }
            line
        })
        .collect();
    f.render_widget(Paragraph::new(lines).style(base), chunks[0]);

    let help = "Up/Down select, Space toggles\nEnter/F5 shows stock data\nF2 downloads CSV\nEsc quits";
    f.render_widget(
        Paragraph::new(help).style(base).wrap(Wrap { trim: true }),
        chunks[1],
    );
}

fn render_status(f: &mut Frame, status: &Status, area: Rect, base: Style) {
    let (text, color) = match status {
        Status::Info(text) => (text, None),
        Status::Success(text) => (text, Some(Color::Green)),
        Status::Warning(text) => (text, Some(Color::Yellow)),
        Status::Error(text) => (text, Some(Color::Red)),
    };
    let style = color.map_or(base, |c| base.fg(c));
    f.render_widget(
        Paragraph::new(text.as_str())
            .style(style)
            .block(Block::default().borders(Borders::ALL).style(base)),
        area,
    );
}

/// [min, max] of every point, padded so flat series still get a visible range.
fn value_bounds(traces: &[Trace]) -> [f64; 2] {
    let (lo, hi) = traces
        .iter()
        .flat_map(|t| t.points.iter().map(|(_, y)| *y))
        .fold((f64::INFINITY, f64::NEG_INFINITY), |(lo, hi), y| (lo.min(y), hi.max(y)));
    if !lo.is_finite() || !hi.is_finite() {
        return [0.0, 1.0];
    }
    let pad = ((hi - lo) * 0.05).max(hi.abs() * 0.01).max(1e-6);
    [lo - pad, hi + pad]
}

fn date_labels(output: &PipelineOutput, palette: Palette) -> Vec<Span<'static>> {
    let dates = output.store.dates();
    let style = Style::default().fg(palette.foreground);
    match (dates.first(), dates.get(dates.len() / 2), dates.last()) {
        (Some(first), Some(mid), Some(last)) => vec![
            Span::styled(first.to_string(), style),
            Span::styled(mid.to_string(), style),
            Span::styled(last.to_string(), style),
        ],
        _ => Vec::new(),
    }
}

fn x_bounds(output: &PipelineOutput) -> [f64; 2] {
    [0.0, output.store.len().saturating_sub(1).max(1) as f64]
}

fn render_price_chart(f: &mut Frame, output: &PipelineOutput, area: Rect, base: Style, palette: Palette) {
    let traces = match presentation::price_traces(output) {
        Ok(traces) => traces,
        Err(e) => {
            f.render_widget(Paragraph::new(format!("Unexpected error: {}", e)).style(base), area);
            return;
        }
    };
    let datasets: Vec<Dataset> = traces
        .iter()
        .filter(|trace| trace.kind == TraceKind::Line)
        .map(|trace| {
            // Terminal charts have no dash style; bands are drawn as dotted scatter.
            let (marker, graph_type) = if trace.dashed {
                (Marker::Dot, GraphType::Scatter)
            } else {
                (Marker::Braille, GraphType::Line)
            };
            Dataset::default()
                .name(trace.name.clone())
                .marker(marker)
                .graph_type(graph_type)
                .style(Style::default().fg(trace.color))
                .data(&trace.points)
        })
        .collect();

    let [y_min, y_max] = value_bounds(&traces);
    let y_labels = [y_min, (y_min + y_max) / 2.0, y_max]
        .iter()
        .map(|v| Span::raw(format!("{:.2}", v)))
        .collect::<Vec<_>>();

    let chart = Chart::new(datasets)
        .style(base)
        .block(
            Block::default()
                .borders(Borders::ALL)
                .title(presentation::price_title(&output.ticker)),
        )
        .x_axis(
            Axis::default()
                .title(presentation::DATE_AXIS_TITLE)
                .style(base)
                .bounds(x_bounds(output))
                .labels(date_labels(output, palette)),
        )
        .y_axis(
            Axis::default()
                .title(presentation::PRICE_AXIS_TITLE)
                .style(base)
                .bounds([y_min, y_max])
                .labels(y_labels),
        );
    f.render_widget(chart, area);
}

fn render_volume_chart(f: &mut Frame, output: &PipelineOutput, area: Rect, base: Style) {
    let trace = match presentation::volume_trace(output) {
        Ok(Some(trace)) => trace,
        Ok(None) => return,
        Err(e) => {
            f.render_widget(Paragraph::new(format!("Unexpected error: {}", e)).style(base), area);
            return;
        }
    };

    // One column per bar, so only the most recent bars that fit are drawn.
    let heights = bar_heights(&trace, output.store.len());
    let capacity = area.width.saturating_sub(2) as usize;
    let skip = heights.len().saturating_sub(capacity);
    let bars: Vec<(&str, u64)> = heights[skip..].iter().map(|h| ("", *h)).collect();

    let chart = BarChart::default()
        .block(
            Block::default()
                .borders(Borders::ALL)
                .title(presentation::volume_title(&output.ticker)),
        )
        .style(base)
        .bar_width(1)
        .bar_gap(0)
        .bar_style(Style::default().fg(trace.color))
        .value_style(Style::default().fg(trace.color).bg(trace.color))
        .data(bars.as_slice());
    f.render_widget(chart, area);
}

/// One bar per row of the store; rows without a volume get a zero-height bar.
fn bar_heights(trace: &Trace, rows: usize) -> Vec<u64> {
    let mut heights = vec![0; rows];
    for (x, y) in &trace.points {
        if let Some(height) = heights.get_mut(*x as usize) {
            *height = *y as u64;
        }
    }
    heights
}

fn render_raw_table(f: &mut Frame, output: &PipelineOutput, area: Rect, base: Style) {
    let (header, rows) = match presentation::raw_rows(&output.store) {
        Ok(table) => table,
        Err(e) => {
            f.render_widget(Paragraph::new(format!("Unexpected error: {}", e)).style(base), area);
            return;
        }
    };

    let visible = area.height.saturating_sub(3) as usize;
    let skip = rows.len().saturating_sub(visible);
    let widths: Vec<Constraint> = header
        .iter()
        .enumerate()
        .map(|(i, _)| if i == 0 { Constraint::Length(10) } else { Constraint::Min(8) })
        .collect();

    let header_row = Row::new(header.into_iter().map(Cell::from))
        .style(Style::default().bg(Color::DarkGray).fg(Color::White));
    let body = rows.into_iter().skip(skip).map(|row| Row::new(row.into_iter().map(Cell::from)));

    f.render_widget(
        Table::new(body, widths)
            .header(header_row)
            .style(base)
            .block(Block::default().borders(Borders::ALL).title("Raw Data")),
        area,
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
