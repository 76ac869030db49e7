mod app;
mod feed;

use std::io;
use std::time::{Duration, Instant};

use crossterm::{
    event::{self, Event, KeyCode, KeyEventKind},
    execute,
    terminal::{disable_raw_mode, enable_raw_mode, EnterAlternateScreen, LeaveAlternateScreen},
};
use ratatui::{
    backend::CrosstermBackend,
    layout::{Constraint, Direction, Layout, Rect},
    style::{Color, Modifier, Style},
    text::{Line, Span},
    widgets::{Block, Borders, Cell, Paragraph, Row, Table},
    Frame, Terminal,
};
use tokio::sync::mpsc;

use app::{
    format_ms, format_pct, format_time_secs, format_us, truncate, ws_url, AppState, ConnectionStatus,
};

const REFRESH_INTERVAL: Duration = Duration::from_secs(2);
const INPUT_POLL: Duration = Duration::from_millis(100);
const ABOVE_WARN_PCT: f64 = 10.0;

// ---------------------------------------------------------------------------
// Entry point
// ---------------------------------------------------------------------------

#[tokio::main]
async fn main() -> io::Result<()> {
    let base_url = std::env::var("VIEWER_URL").unwrap_or_else(|_| "http://localhost:9998".to_string());

    let client = reqwest::Client::builder()
        .timeout(Duration::from_secs(5))
        .build()
        .map_err(io::Error::other)?;

    let (feed_tx, mut feed_rx) = mpsc::channel(1024);
    tokio::spawn(feed::run_feed(ws_url(&base_url), feed_tx));

    let mut app = AppState::new(base_url);

    // Initial fetch before rendering
    app.refresh(&client).await;

    // Terminal setup
    enable_raw_mode()?;
    let mut stdout = io::stdout();
    execute!(stdout, EnterAlternateScreen)?;
    let backend = CrosstermBackend::new(stdout);
    let mut terminal = Terminal::new(backend)?;

    let result = run_loop(&mut terminal, &mut app, &client, &mut feed_rx).await;

    // Restore terminal regardless of result
    disable_raw_mode()?;
    execute!(terminal.backend_mut(), LeaveAlternateScreen)?;
    terminal.show_cursor()?;

    result
}

// ---------------------------------------------------------------------------
// Main event loop
// ---------------------------------------------------------------------------

async fn run_loop(
    terminal: &mut Terminal<CrosstermBackend<io::Stdout>>,
    app: &mut AppState,
    client: &reqwest::Client,
    feed_rx: &mut mpsc::Receiver<app::FeedEvent>,
) -> io::Result<()> {
    let mut last_tick = Instant::now();

    loop {
        while let Ok(ev) = feed_rx.try_recv() {
            app.apply(ev);
        }

        terminal.draw(|f| render(f, app))?;

        if event::poll(INPUT_POLL)? {
            if let Event::Key(key) = event::read()? {
                if key.kind == KeyEventKind::Press {
                    match key.code {
                        KeyCode::Char('q') | KeyCode::Char('Q') | KeyCode::Esc => return Ok(()),
                        KeyCode::Char('r') | KeyCode::Char('R') => {
                            app.refresh(client).await;
                            last_tick = Instant::now();
                        }
                        _ => {}
                    }
                }
            }
        }

        if last_tick.elapsed() >= REFRESH_INTERVAL {
            app.refresh(client).await;
            last_tick = Instant::now();
        }
    }
}

// ---------------------------------------------------------------------------
// Rendering
// ---------------------------------------------------------------------------

fn render(f: &mut Frame, app: &AppState) {
    let area = f.area();

    // Outer vertical split: header | body | footer
    let chunks = Layout::default()
        .direction(Direction::Vertical)
        .constraints([
            Constraint::Length(3), // header
            Constraint::Min(0),    // body
            Constraint::Length(1), // footer
        ])
        .split(area);

    render_header(f, app, chunks[0]);
    render_body(f, app, chunks[1]);
    render_footer(f, chunks[2]);
}

fn render_header(f: &mut Frame, app: &AppState, area: Rect) {
    let (status_text, status_color) = match &app.status {
        ConnectionStatus::Connected => ("● live".to_string(), Color::Green),
        ConnectionStatus::Connecting => ("◌ connecting".to_string(), Color::Yellow),
        ConnectionStatus::Error(e) => (format!("✗ {}", truncate(e, 40)), Color::Red),
    };

    let last_avg = app
        .latest()
        .map_or("—".to_string(), |r| format!("{} avg", format_ms(r.average)));

    let title_spans = vec![
        Span::styled(
            " pinggrapher  ",
            Style::default().fg(Color::Cyan).add_modifier(Modifier::BOLD),
        ),
        Span::styled(status_text, Style::default().fg(status_color)),
        Span::raw("  │  "),
        Span::styled(
            format!("{} viewers", app.health.viewers),
            Style::default().fg(Color::White),
        ),
        Span::raw("  │  "),
        Span::styled(
            format!("{} records", app.health.records_written),
            Style::default().fg(Color::White),
        ),
        Span::raw("  │  "),
        Span::styled(last_avg, Style::default().fg(Color::White)),
    ];

    let paragraph = Paragraph::new(Line::from(title_spans)).block(
        Block::default()
            .borders(Borders::ALL)
            .border_style(Style::default().fg(Color::DarkGray)),
    );

    f.render_widget(paragraph, area);
}

fn render_body(f: &mut Frame, app: &AppState, area: Rect) {
    // Horizontal split: windows (65%) | summary (35%)
    let halves = Layout::default()
        .direction(Direction::Horizontal)
        .constraints([Constraint::Percentage(65), Constraint::Percentage(35)])
        .split(area);

    render_windows_table(f, app, halves[0]);
    render_summary(f, app, halves[1]);
}

fn render_windows_table(f: &mut Frame, app: &AppState, area: Rect) {
    let header_cells = ["Time", "Avg", "Min", "Max", "Above"]
        .iter()
        .map(|h| Cell::from(*h).style(Style::default().fg(Color::Yellow).add_modifier(Modifier::BOLD)));
    let header = Row::new(header_cells).height(1);

    // Newest first, only as many as fit.
    let visible = area.height.saturating_sub(3) as usize;
    let rows: Vec<Row> = app
        .records
        .iter()
        .rev()
        .take(visible)
        .map(|r| {
            let above_color = if r.above_pct >= ABOVE_WARN_PCT {
                Color::Red
            } else if r.above_pct > 0.0 {
                Color::Yellow
            } else {
                Color::Green
            };

            Row::new(vec![
                Cell::from(format_time_secs(r.timestamp)).style(Style::default().fg(Color::DarkGray)),
                Cell::from(format_ms(r.average)),
                Cell::from(format_ms(r.min)).style(Style::default().fg(Color::Cyan)),
                Cell::from(format_ms(r.max)).style(Style::default().fg(Color::Cyan)),
                Cell::from(format_pct(r.above_pct)).style(Style::default().fg(above_color)),
            ])
        })
        .collect();

    let table = Table::new(
        rows,
        [
            Constraint::Length(9),
            Constraint::Length(10),
            Constraint::Length(10),
            Constraint::Length(10),
            Constraint::Min(7),
        ],
    )
    .header(header)
    .block(
        Block::default()
            .borders(Borders::ALL)
            .border_style(Style::default().fg(Color::DarkGray))
            .title(Span::styled(
                " RECENT WINDOWS ",
                Style::default().fg(Color::Cyan).add_modifier(Modifier::BOLD),
            )),
    );

    f.render_widget(table, area);
}

fn render_summary(f: &mut Frame, app: &AppState, area: Rect) {
    let label = Style::default().fg(Color::DarkGray);
    let value = Style::default().fg(Color::White);
    let kv = |k: &'static str, v: String| Line::from(vec![Span::styled(format!("{k:<14}"), label), Span::styled(v, value)]);

    let mut lines = Vec::new();
    match app.summary() {
        Some(s) => {
            let ms = |v: Option<f64>| v.map_or("—".to_string(), format_ms);
            lines.push(kv("windows", s.windows.to_string()));
            lines.push(kv("idle", s.idle.to_string()));
            lines.push(kv("mean avg", ms(s.mean_average)));
            lines.push(kv("lowest", ms(s.lowest)));
            lines.push(kv("highest", ms(s.highest)));
            lines.push(kv("mean above", s.mean_above_pct.map_or("—".to_string(), format_pct)));
        }
        None => lines.push(Line::from(Span::styled("waiting for records", label))),
    }

    lines.push(Line::raw(""));
    lines.push(kv("window", format_ms(app.health.window_ms as f64)));
    lines.push(kv(
        "last closed",
        app.health.last_window_at.map_or("—".to_string(), format_time_secs),
    ));
    lines.push(kv("samples", app.health.samples_ingested.to_string()));
    lines.push(kv("dropped", app.health.samples_dropped.to_string()));
    lines.push(kv("backlog", app.health.viewer_backlog.to_string()));
    lines.push(kv("reconnects", app.reconnects.to_string()));

    lines.push(Line::raw(""));
    lines.push(kv("publishes", app.latency.sample_count.to_string()));
    lines.push(kv("fan-out p50", format_us(app.latency.p50_us)));
    lines.push(kv("fan-out p95", format_us(app.latency.p95_us)));
    lines.push(kv("fan-out p99", format_us(app.latency.p99_us)));
    lines.push(kv("widest", app.latency.widest_fanout.to_string()));
    lines.push(kv("deliveries", app.latency.deliveries.to_string()));
    lines.push(kv("evictions", app.latency.evictions.to_string()));

    if let Some(e) = &app.api_error {
        lines.push(Line::raw(""));
        lines.push(Line::from(Span::styled(truncate(e, 60), Style::default().fg(Color::Red))));
    }

    let paragraph = Paragraph::new(lines).block(
        Block::default()
            .borders(Borders::ALL)
            .border_style(Style::default().fg(Color::DarkGray))
            .title(Span::styled(
                " SUMMARY ",
                Style::default().fg(Color::Cyan).add_modifier(Modifier::BOLD),
            )),
    );

    f.render_widget(paragraph, area);
}

fn render_footer(f: &mut Frame, area: Rect) {
    let line = Line::from(vec![
        Span::styled(" [q] ", Style::default().fg(Color::Yellow)),
        Span::raw("quit  "),
        Span::styled("[r] ", Style::default().fg(Color::Yellow)),
        Span::raw("refresh  "),
        Span::styled("auto-refresh: 2s", Style::default().fg(Color::DarkGray)),
    ]);
    let paragraph = Paragraph::new(line).style(Style::default().fg(Color::White));
    f.render_widget(paragraph, area);
}
