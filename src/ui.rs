use anyhow::Result;
use crossterm::{
    event::{self, Event, KeyCode, KeyEvent, KeyModifiers},
    execute,
    terminal::{disable_raw_mode, enable_raw_mode, EnterAlternateScreen, LeaveAlternateScreen},
};
use pipeline_dashboard::{
    shaping::{format_currency, format_percent},
    DashboardViews, Deal, DealCache, EntityMetrics, NotificationKind, NotificationLog, PipelineView,
    ShapeReport, SqliteDealStore, TransitionCoordinator, TransitionError, TransitionOutcome, ViewOptions,
    ViewState,
};
use ratatui::{
    backend::CrosstermBackend,
    layout::{Constraint, Direction, Layout, Rect},
    style::{Color, Modifier, Style},
    text::{Line, Span},
    widgets::{BarChart, Block, Borders, Cell, Paragraph, Row, Table, TableState, Wrap},
    Frame, Terminal,
};
use std::io;
use std::sync::Arc;
use tokio::runtime::Handle;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Page {
    Overview,
    Pipeline,
    Companies,
    Performance,
    Forecasting,
    Velocity,
}

impl Page {
    pub const ALL: [Page; 6] = [
        Page::Overview,
        Page::Pipeline,
        Page::Companies,
        Page::Performance,
        Page::Forecasting,
        Page::Velocity,
    ];

    fn index(&self) -> usize {
        Self::ALL.iter().position(|page| page == self).unwrap_or(0)
    }

    pub fn next(&self) -> Self {
        Self::ALL[(self.index() + 1) % Self::ALL.len()]
    }

    pub fn previous(&self) -> Self {
        Self::ALL[(self.index() + Self::ALL.len() - 1) % Self::ALL.len()]
    }

    pub fn title(&self) -> &str {
        match self {
            Page::Overview => "Overview",
            Page::Pipeline => "Pipeline",
            Page::Companies => "Companies",
            Page::Performance => "Performance",
            Page::Forecasting => "Forecasting",
            Page::Velocity => "Velocity",
        }
    }
}

type Coordinator = TransitionCoordinator<SqliteDealStore, NotificationLog>;

pub struct App {
    runtime: Handle,
    store: Arc<SqliteDealStore>,
    cache: Arc<DealCache>,
    notifications: Arc<NotificationLog>,
    coordinator: Coordinator,
    options: ViewOptions,
    pub views: ViewState<DashboardViews>,
    pub current_page: Page,
    pub selected_column: usize,
    pub selected_card: usize,
    pub table_state: TableState,
    pub show_detail: bool,
    /// Message not backed by a notification (e.g. move rejected)
    pub message: Option<String>,
}

impl App {
    pub fn new(runtime: Handle, store: Arc<SqliteDealStore>, options: ViewOptions) -> Self {
        let cache = Arc::new(DealCache::new());
        let notifications = Arc::new(NotificationLog::new());
        let coordinator =
            TransitionCoordinator::new(Arc::clone(&store), Arc::clone(&notifications), Arc::clone(&cache));

        let mut table_state = TableState::default();
        table_state.select(Some(0));

        let mut app = Self {
            runtime,
            store,
            cache,
            notifications,
            coordinator,
            options,
            views: ViewState::Failed {
                error: "not loaded".to_string(),
                last_known_good_generation: None,
            },
            current_page: Page::Overview,
            selected_column: 0,
            selected_card: 0,
            table_state,
            show_detail: false,
            message: None,
        };
        app.reload();
        app
    }

    /// Rebuild every view from the cache, fetching if it was invalidated.
    pub fn reload(&mut self) {
        let loaded = self.runtime.block_on(self.cache.load(self.store.as_ref()));

        self.views = match loaded {
            Ok(snapshot) => {
                let statuses = self.store.statuses().unwrap_or_else(|err| {
                    tracing::warn!("Failed to list statuses: {}", err);
                    Vec::new()
                });
                let companies = self.store.companies().unwrap_or_else(|err| {
                    tracing::warn!("Failed to list companies: {}", err);
                    Vec::new()
                });
                let views = DashboardViews::new(snapshot, self.options).with_directory(statuses, companies);
                views.ready(views.clone())
            }
            Err(err) => ViewState::failed(&err, &self.cache),
        };

        self.clamp_selection();
    }

    /// Drop the cached snapshot and fetch again
    pub fn force_reload(&mut self) {
        self.cache.invalidate();
        self.reload();
    }

    pub fn dashboard(&self) -> Option<&DashboardViews> {
        self.views.view()
    }

    pub fn pipeline(&self) -> Option<PipelineView> {
        self.dashboard().map(|views| views.pipeline())
    }

    pub fn next_page(&mut self) {
        self.current_page = self.current_page.next();
        self.table_state.select(Some(0));
    }

    pub fn previous_page(&mut self) {
        self.current_page = self.current_page.previous();
        self.table_state.select(Some(0));
    }

    pub fn go_to(&mut self, page: Page) {
        self.current_page = page;
        self.table_state.select(Some(0));
    }

    fn table_len(&self) -> usize {
        let Some(views) = self.dashboard() else { return 0 };
        match self.current_page {
            Page::Companies => views.companies().metrics.len(),
            Page::Performance => views.performance().people.len(),
            Page::Forecasting => views.forecasting().trend.len(),
            Page::Velocity => views.velocity().by_status.len(),
            Page::Overview | Page::Pipeline => 0,
        }
    }

    pub fn next(&mut self) {
        if self.current_page == Page::Pipeline {
            self.selected_card += 1;
            self.clamp_selection();
            return;
        }
        let len = self.table_len();
        if len == 0 {
            return;
        }
        let i = match self.table_state.selected() {
            Some(i) if i + 1 < len => i + 1,
            _ => 0,
        };
        self.table_state.select(Some(i));
    }

    pub fn previous(&mut self) {
        if self.current_page == Page::Pipeline {
            self.selected_card = self.selected_card.saturating_sub(1);
            return;
        }
        let len = self.table_len();
        if len == 0 {
            return;
        }
        let i = match self.table_state.selected() {
            Some(0) | None => len - 1,
            Some(i) => i - 1,
        };
        self.table_state.select(Some(i));
    }

    pub fn select_column(&mut self, offset: isize) {
        let columns = self.pipeline().map(|p| p.columns.len()).unwrap_or(0);
        if columns == 0 {
            return;
        }
        let target = self.selected_column as isize + offset;
        self.selected_column = target.clamp(0, columns as isize - 1) as usize;
        self.selected_card = 0;
    }

    fn clamp_selection(&mut self) {
        let Some(pipeline) = self.pipeline() else {
            self.selected_column = 0;
            self.selected_card = 0;
            return;
        };
        if pipeline.columns.is_empty() {
            self.selected_column = 0;
            self.selected_card = 0;
            return;
        }
        self.selected_column = self.selected_column.min(pipeline.columns.len() - 1);
        let cards = pipeline.columns[self.selected_column].deals.len();
        self.selected_card = self.selected_card.min(cards.saturating_sub(1));
    }

    pub fn selected_deal(&self) -> Option<Deal> {
        let pipeline = self.pipeline()?;
        pipeline
            .columns
            .get(self.selected_column)?
            .deals
            .get(self.selected_card)
            .cloned()
    }

    /// Move the selected card one column left (-1) or right (+1).
    ///
    /// The board is only redrawn from a refetch; the card follows the move
    /// only if storage confirmed it.
    pub fn move_selected(&mut self, offset: isize) {
        let Some(pipeline) = self.pipeline() else { return };
        let Some(column) = pipeline.columns.get(self.selected_column) else { return };
        let Some(deal) = column.deals.get(self.selected_card) else { return };
        let Some(target) = pipeline.neighbour_column(&column.name, offset) else { return };

        let deal_id = deal.id.clone();
        let from = column.name.clone();
        let to = target.name.clone();

        let result = self
            .runtime
            .block_on(self.coordinator.on_transition(&deal_id, &from, &to));

        self.message = match &result {
            Err(err @ TransitionError::AlreadyInProgress { .. }) => Some(err.to_string()),
            _ => None,
        };

        self.reload();

        if let Ok(TransitionOutcome::Applied { .. }) = result {
            if let Some(pipeline) = self.pipeline() {
                if let Some(index) = pipeline.column_index(&to) {
                    self.selected_column = index;
                    self.selected_card = pipeline.columns[index]
                        .deals
                        .iter()
                        .position(|deal| deal.id == deal_id)
                        .unwrap_or(0);
                }
            }
        }
    }

    pub fn toggle_detail(&mut self) {
        self.show_detail = !self.show_detail;
    }

    /// Returns false when the app should quit
    pub fn handle_key(&mut self, key: KeyEvent) -> bool {
        let shift = key.modifiers.contains(KeyModifiers::SHIFT);
        match key.code {
            KeyCode::Char('q') | KeyCode::Esc => return false,
            KeyCode::Tab => self.next_page(),
            KeyCode::BackTab => self.previous_page(),
            KeyCode::Char(c @ '1'..='6') => {
                let index = c as usize - '1' as usize;
                self.go_to(Page::ALL[index]);
            }
            KeyCode::Char('r') => self.force_reload(),
            KeyCode::Enter => self.toggle_detail(),
            KeyCode::Down | KeyCode::Char('j') => self.next(),
            KeyCode::Up | KeyCode::Char('k') => self.previous(),
            KeyCode::Char('H') if self.current_page == Page::Pipeline => self.move_selected(-1),
            KeyCode::Char('L') if self.current_page == Page::Pipeline => self.move_selected(1),
            KeyCode::Left if shift && self.current_page == Page::Pipeline => self.move_selected(-1),
            KeyCode::Right if shift && self.current_page == Page::Pipeline => self.move_selected(1),
            KeyCode::Left | KeyCode::Char('h') if self.current_page == Page::Pipeline => self.select_column(-1),
            KeyCode::Right | KeyCode::Char('l') if self.current_page == Page::Pipeline => self.select_column(1),
            _ => {}
        }
        true
    }
}

pub fn run_ui(app: &mut App) -> Result<()> {
    // Setup terminal
    enable_raw_mode()?;
    let mut stdout = io::stdout();
    execute!(stdout, EnterAlternateScreen)?;
    let backend = CrosstermBackend::new(stdout);
    let mut terminal = Terminal::new(backend)?;

    let res = run_app(&mut terminal, app);

    // Restore terminal
    disable_raw_mode()?;
    execute!(terminal.backend_mut(), LeaveAlternateScreen)?;
    terminal.show_cursor()?;

    if let Err(err) = res {
        println!("Error: {:?}", err);
    }

    Ok(())
}

fn run_app<B: ratatui::backend::Backend>(terminal: &mut Terminal<B>, app: &mut App) -> io::Result<()> {
    loop {
        terminal.draw(|f| ui(f, app))?;

        if let Event::Key(key) = event::read()? {
            if !app.handle_key(key) {
                return Ok(());
            }
        }
    }
}

fn ui(f: &mut Frame, app: &mut App) {
    let chunks = Layout::default()
        .direction(Direction::Vertical)
        .constraints([
            Constraint::Length(3), // Header with navigation
            Constraint::Min(0),    // Content area
            Constraint::Length(3), // Status bar
        ])
        .split(f.size());

    render_header(f, chunks[0], app);

    if let ViewState::Failed {
        error,
        last_known_good_generation,
    } = &app.views
    {
        render_error(f, chunks[1], error, *last_known_good_generation);
    } else {
        match app.current_page {
            Page::Overview => render_overview(f, chunks[1], app),
            Page::Pipeline => render_pipeline(f, chunks[1], app),
            Page::Companies => render_companies(f, chunks[1], app),
            Page::Performance => render_performance(f, chunks[1], app),
            Page::Forecasting => render_forecasting(f, chunks[1], app),
            Page::Velocity => render_velocity(f, chunks[1], app),
        }
    }

    render_status_bar(f, chunks[2], app);
}

fn header_style() -> Style {
    Style::default().fg(Color::Yellow).add_modifier(Modifier::BOLD)
}

fn render_header(f: &mut Frame, area: Rect, app: &App) {
    let mut tab_spans = vec![];
    for (i, page) in Page::ALL.iter().enumerate() {
        if i > 0 {
            tab_spans.push(Span::raw(" │ "));
        }

        let style = if *page == app.current_page {
            Style::default()
                .fg(Color::Yellow)
                .add_modifier(Modifier::BOLD | Modifier::UNDERLINED)
        } else {
            Style::default().fg(Color::DarkGray)
        };

        tab_spans.push(Span::styled(format!("{} {}", i + 1, page.title()), style));
    }

    if let ViewState::Ready {
        generation, view, ..
    } = &app.views
    {
        tab_spans.push(Span::raw("  |  "));
        tab_spans.push(Span::styled(
            format!("Deals: {}", view.deals().len()),
            Style::default().fg(Color::White),
        ));
        tab_spans.push(Span::raw("  "));
        tab_spans.push(Span::styled(
            format!("gen {}", generation),
            Style::default().fg(Color::DarkGray),
        ));
    }

    let header = Paragraph::new(vec![Line::from(tab_spans)])
        .block(Block::default().borders(Borders::ALL).border_style(Style::default().fg(Color::Cyan)));

    f.render_widget(header, area);
}

fn render_error(f: &mut Frame, area: Rect, error: &str, last_known_good: Option<u64>) {
    let mut content = vec![
        Line::from(""),
        Line::from(Span::styled(
            "  Failed to load deals",
            Style::default().fg(Color::Red).add_modifier(Modifier::BOLD),
        )),
        Line::from(""),
        Line::from(format!("  {}", error)),
        Line::from(""),
    ];
    if let Some(generation) = last_known_good {
        content.push(Line::from(Span::styled(
            format!("  Last good snapshot: generation {}", generation),
            Style::default().fg(Color::DarkGray),
        )));
    }
    content.push(Line::from(Span::styled(
        "  Press r to retry",
        Style::default().fg(Color::DarkGray).add_modifier(Modifier::ITALIC),
    )));

    let paragraph = Paragraph::new(content).block(
        Block::default()
            .borders(Borders::ALL)
            .border_style(Style::default().fg(Color::Red))
            .title(" Error "),
    );
    f.render_widget(paragraph, area);
}

fn stat_card<'a>(title: &'a str, value: String, hint: &'a str) -> Paragraph<'a> {
    Paragraph::new(vec![
        Line::from(Span::styled(
            value,
            Style::default().fg(Color::Green).add_modifier(Modifier::BOLD),
        )),
        Line::from(Span::styled(hint, Style::default().fg(Color::DarkGray))),
    ])
    .block(
        Block::default()
            .borders(Borders::ALL)
            .border_style(Style::default().fg(Color::White))
            .title(format!(" {} ", title)),
    )
}

fn render_overview(f: &mut Frame, area: Rect, app: &App) {
    let Some(views) = app.dashboard() else { return };
    let overview = views.overview();
    let report = ShapeReport::inspect(views.deals());

    let rows = Layout::default()
        .direction(Direction::Vertical)
        .constraints([Constraint::Length(4), Constraint::Min(0), Constraint::Length(3)])
        .split(area);
    let cards = Layout::default()
        .direction(Direction::Horizontal)
        .constraints([Constraint::Ratio(1, 3), Constraint::Ratio(1, 3), Constraint::Ratio(1, 3)])
        .split(rows[0]);

    f.render_widget(
        stat_card("Total Pipeline Value", format_currency(overview.total_value), "All deals"),
        cards[0],
    );
    f.render_widget(
        stat_card("Active Deals", overview.deal_count.to_string(), "Deals in pipeline"),
        cards[1],
    );
    f.render_widget(
        stat_card("Average Deal Value", format_currency(overview.average_value), "Mean value per deal"),
        cards[2],
    );

    let bars: Vec<(&str, u64)> = overview
        .deals_by_status
        .iter()
        .map(|point| (point.name.as_str(), point.value as u64))
        .collect();
    let chart = BarChart::default()
        .block(
            Block::default()
                .borders(Borders::ALL)
                .border_style(Style::default().fg(Color::White))
                .title(" Deals by Status "),
        )
        .data(bars.as_slice())
        .bar_width(10)
        .bar_gap(2)
        .bar_style(Style::default().fg(Color::Cyan))
        .value_style(Style::default().fg(Color::Black).bg(Color::Cyan));
    f.render_widget(chart, rows[1]);

    let quality_color = if report.is_clean() { Color::Green } else { Color::Yellow };
    let quality = Paragraph::new(Line::from(Span::styled(
        format!(" {}", report.summary()),
        Style::default().fg(quality_color),
    )))
    .block(Block::default().borders(Borders::ALL).title(" Data Quality "));
    f.render_widget(quality, rows[2]);
}

fn render_pipeline(f: &mut Frame, area: Rect, app: &App) {
    let Some(pipeline) = app.pipeline() else { return };
    if pipeline.columns.is_empty() {
        f.render_widget(
            Paragraph::new("  No deals yet. Import a CSV first.")
                .block(Block::default().borders(Borders::ALL).title(" Deal Pipeline ")),
            area,
        );
        return;
    }

    let (board_area, detail_area) = if app.show_detail {
        let split = Layout::default()
            .direction(Direction::Horizontal)
            .constraints([Constraint::Percentage(70), Constraint::Percentage(30)])
            .split(area);
        (split[0], Some(split[1]))
    } else {
        (area, None)
    };

    let n = pipeline.columns.len() as u32;
    let constraints: Vec<Constraint> = (0..n).map(|_| Constraint::Ratio(1, n)).collect();
    let column_areas = Layout::default()
        .direction(Direction::Horizontal)
        .constraints(constraints)
        .split(board_area);

    for (index, column) in pipeline.columns.iter().enumerate() {
        let is_selected_column = index == app.selected_column;
        let mut lines = vec![
            Line::from(Span::styled(
                format!("{} deals - {}", column.count, format_currency(column.total_value)),
                Style::default().fg(Color::DarkGray),
            )),
            Line::from(""),
        ];

        for (card, deal) in column.deals.iter().enumerate() {
            let selected = is_selected_column && card == app.selected_card;
            let marker = if selected { "→ " } else { "  " };
            let title_style = if selected {
                Style::default().fg(Color::Yellow).add_modifier(Modifier::BOLD)
            } else {
                Style::default().add_modifier(Modifier::BOLD)
            };

            let mut title = vec![Span::raw(marker), Span::styled(truncate(deal.title(), 24), title_style)];
            if let Some(state) = app.coordinator.state_of(&deal.id) {
                title.push(Span::styled(
                    format!(" [{}]", state.label()),
                    Style::default().fg(Color::Magenta),
                ));
            }
            lines.push(Line::from(title));
            if let Some(company) = deal.company.as_ref() {
                lines.push(Line::from(format!("  {}", truncate(&company.name, 24))));
            }
            lines.push(Line::from(Span::styled(
                format!("  {}", format_currency(deal.value.unwrap_or(0.0))),
                Style::default().fg(Color::Green),
            )));
            if let Some(person) = deal.person.as_ref() {
                lines.push(Line::from(Span::styled(
                    format!("  Owner: {}", truncate(&person.name, 20)),
                    Style::default().fg(Color::DarkGray),
                )));
            }
            lines.push(Line::from(""));
        }

        let border = if is_selected_column { Color::Yellow } else { Color::White };
        let block = Block::default()
            .borders(Borders::ALL)
            .border_style(Style::default().fg(border))
            .title(format!(" {} ", column.name));
        f.render_widget(Paragraph::new(lines).block(block), column_areas[index]);
    }

    if let Some(detail_area) = detail_area {
        render_deal_detail(f, detail_area, app);
    }
}

fn render_deal_detail(f: &mut Frame, area: Rect, app: &App) {
    let block = Block::default()
        .borders(Borders::ALL)
        .border_style(Style::default().fg(Color::Yellow))
        .title(" Deal Details ");

    let Some(deal) = app.selected_deal() else {
        f.render_widget(Paragraph::new("No deal selected").block(block), area);
        return;
    };

    let label = |text: &'static str| Span::styled(text, Style::default().fg(Color::Cyan).add_modifier(Modifier::BOLD));
    let or_dash = |value: Option<String>| value.unwrap_or_else(|| "-".to_string());

    let mut content = vec![
        Line::from(""),
        Line::from(vec![label("  Code: "), Span::raw(deal.title().to_string())]),
        Line::from(vec![label("  Id: "), Span::raw(deal.id.clone())]),
        Line::from(vec![
            label("  Value: "),
            Span::raw(or_dash(deal.value.map(format_currency))),
        ]),
        Line::from(vec![
            label("  Company: "),
            Span::raw(or_dash(deal.company.as_ref().map(|c| c.name.clone()))),
        ]),
        Line::from(vec![
            label("  Owner: "),
            Span::raw(or_dash(deal.person.as_ref().map(|p| p.name.clone()))),
        ]),
        Line::from(vec![
            label("  Created: "),
            Span::raw(or_dash(deal.created_at.map(|t| t.format("%Y-%m-%d").to_string()))),
        ]),
        Line::from(vec![
            label("  Closed: "),
            Span::raw(or_dash(deal.closed_at.map(|t| t.format("%Y-%m-%d").to_string()))),
        ]),
        Line::from(""),
        Line::from("  ─────────────────────────"),
        Line::from(Span::styled(
            "  HISTORY",
            Style::default().fg(Color::Yellow).add_modifier(Modifier::BOLD | Modifier::UNDERLINED),
        )),
    ];

    match app.store.events_for_deal(&deal.id) {
        Ok(events) => {
            for event in events.iter().take(8) {
                content.push(Line::from(Span::styled(
                    format!("  {} {}", event.timestamp.format("%Y-%m-%d %H:%M"), event.event_type),
                    Style::default().fg(Color::DarkGray),
                )));
            }
        }
        Err(err) => content.push(Line::from(format!("  {}", err))),
    }

    f.render_widget(Paragraph::new(content).wrap(Wrap { trim: false }).block(block), area);
}

fn metrics_table<'a>(metrics: &'a [EntityMetrics], first_column: &'a str, title: &'a str) -> Table<'a> {
    let header = Row::new(
        [first_column, "Total Value", "Deals", "Closed", "Success Rate"]
            .iter()
            .map(|h| Cell::from(*h).style(header_style())),
    )
    .style(Style::default().bg(Color::DarkGray))
    .height(1);

    let rows = metrics.iter().map(|row| {
        let rate_color = if row.success_rate >= 50.0 { Color::Green } else { Color::White };
        Row::new(vec![
            Cell::from(truncate(&row.name, 30)),
            Cell::from(format_currency(row.total_value)).style(Style::default().fg(Color::Green)),
            Cell::from(row.deal_count.to_string()),
            Cell::from(row.closed_deals.to_string()),
            Cell::from(format_percent(row.success_rate)).style(Style::default().fg(rate_color)),
        ])
        .height(1)
    });

    Table::new(
        rows,
        [
            Constraint::Length(32),
            Constraint::Length(18),
            Constraint::Length(8),
            Constraint::Length(8),
            Constraint::Length(14),
        ],
    )
    .header(header)
    .block(
        Block::default()
            .borders(Borders::ALL)
            .border_style(Style::default().fg(Color::White))
            .title(title),
    )
    .highlight_style(Style::default().bg(Color::DarkGray).add_modifier(Modifier::BOLD))
    .highlight_symbol("→ ")
}

fn render_companies(f: &mut Frame, area: Rect, app: &mut App) {
    let Some(views) = app.dashboard() else { return };
    let companies = views.companies();

    let chunks = Layout::default()
        .direction(Direction::Vertical)
        .constraints([Constraint::Length(12), Constraint::Min(0)])
        .split(area);

    let bars: Vec<(&str, u64)> = companies
        .distribution
        .iter()
        .map(|point| (point.name.as_str(), point.value.max(0.0) as u64))
        .collect();
    let chart = BarChart::default()
        .block(
            Block::default()
                .borders(Borders::ALL)
                .border_style(Style::default().fg(Color::White))
                .title(format!(" Top {} Companies by Deal Value ", companies.distribution.len())),
        )
        .data(bars.as_slice())
        .bar_width(12)
        .bar_gap(2)
        .bar_style(Style::default().fg(Color::Green))
        .value_style(Style::default().fg(Color::Black).bg(Color::Green));
    f.render_widget(chart, chunks[0]);

    let table = metrics_table(&companies.metrics, "Company", " Company Performance Details ");
    f.render_stateful_widget(table, chunks[1], &mut app.table_state);
}

fn render_performance(f: &mut Frame, area: Rect, app: &mut App) {
    let Some(views) = app.dashboard() else { return };
    let performance = views.performance();
    let table = metrics_table(&performance.people, "Owner", " Sales Performance by Owner ");
    f.render_stateful_widget(table, area, &mut app.table_state);
}

fn render_forecasting(f: &mut Frame, area: Rect, app: &mut App) {
    let Some(views) = app.dashboard() else { return };
    let forecasting = views.forecasting();

    let chunks = Layout::default()
        .direction(Direction::Vertical)
        .constraints([Constraint::Length(4), Constraint::Min(0)])
        .split(area);
    let cards = Layout::default()
        .direction(Direction::Horizontal)
        .constraints([Constraint::Ratio(1, 3), Constraint::Ratio(1, 3), Constraint::Ratio(1, 3)])
        .split(chunks[0]);

    let summary = &forecasting.summary;
    f.render_widget(
        stat_card(
            "Current Quarter Forecast",
            summary.current_quarter_forecast.map(format_currency).unwrap_or_else(|| "-".to_string()),
            "Latest month × 3",
        ),
        cards[0],
    );
    f.render_widget(
        stat_card(
            "Average Monthly Revenue",
            format_currency(summary.average_monthly_revenue),
            "All months",
        ),
        cards[1],
    );
    f.render_widget(
        stat_card(
            "Growth Rate",
            summary.growth_rate_percent.map(format_percent).unwrap_or_else(|| "-".to_string()),
            "Latest vs previous month",
        ),
        cards[2],
    );

    let header = Row::new(["Month", "Revenue", "Trend"].iter().map(|h| Cell::from(*h).style(header_style())))
        .style(Style::default().bg(Color::DarkGray))
        .height(1);
    let rows = forecasting.trend.iter().map(|point| {
        Row::new(vec![
            Cell::from(point.date.clone()),
            Cell::from(format_currency(point.value)).style(Style::default().fg(Color::Green)),
            Cell::from(point.trend.map(format_currency).unwrap_or_else(|| "-".to_string()))
                .style(Style::default().fg(Color::Cyan)),
        ])
    });
    let table = Table::new(rows, [Constraint::Length(10), Constraint::Length(18), Constraint::Length(18)])
        .header(header)
        .block(
            Block::default()
                .borders(Borders::ALL)
                .border_style(Style::default().fg(Color::White))
                .title(format!(" Revenue Trend ({}-month moving average) ", app.options.trend_window)),
        )
        .highlight_style(Style::default().bg(Color::DarkGray).add_modifier(Modifier::BOLD))
        .highlight_symbol("→ ");
    f.render_stateful_widget(table, chunks[1], &mut app.table_state);
}

fn render_velocity(f: &mut Frame, area: Rect, app: &mut App) {
    let Some(views) = app.dashboard() else { return };
    let velocity = views.velocity();

    let header = Row::new(["Status", "Avg Days to Close"].iter().map(|h| Cell::from(*h).style(header_style())))
        .style(Style::default().bg(Color::DarkGray))
        .height(1);
    let rows = velocity.by_status.iter().map(|point| {
        Row::new(vec![
            Cell::from(point.name.clone()),
            Cell::from(format!("{:.1}", point.value)),
        ])
    });
    let table = Table::new(rows, [Constraint::Length(24), Constraint::Length(20)])
        .header(header)
        .block(
            Block::default()
                .borders(Borders::ALL)
                .border_style(Style::default().fg(Color::White))
                .title(" Deal Velocity by Status "),
        )
        .highlight_style(Style::default().bg(Color::DarkGray).add_modifier(Modifier::BOLD))
        .highlight_symbol("→ ");
    f.render_stateful_widget(table, area, &mut app.table_state);
}

fn render_status_bar(f: &mut Frame, area: Rect, app: &App) {
    let mut status_spans = vec![];

    if let Some(message) = &app.message {
        status_spans.push(Span::styled(format!(" {} ", message), Style::default().fg(Color::Yellow)));
        status_spans.push(Span::raw(" | "));
    } else if let Some(toast) = app.notifications.latest() {
        let color = match toast.kind {
            NotificationKind::Success => Color::Green,
            NotificationKind::Failure => Color::Red,
        };
        status_spans.push(Span::styled(format!(" {} ", toast.message), Style::default().fg(color)));
        status_spans.push(Span::raw(" | "));
    }

    if app.current_page == Page::Pipeline {
        status_spans.push(Span::styled("h/l", Style::default().fg(Color::Yellow)));
        status_spans.push(Span::raw(" Column | "));
        status_spans.push(Span::styled("H/L", Style::default().fg(Color::Yellow)));
        status_spans.push(Span::raw(" Move card | "));
        status_spans.push(Span::styled("Enter", Style::default().fg(Color::Yellow)));
        status_spans.push(Span::raw(" Details | "));
    }
    status_spans.push(Span::styled("Tab", Style::default().fg(Color::Yellow)));
    status_spans.push(Span::raw(" Page | "));
    status_spans.push(Span::styled("↑/↓", Style::default().fg(Color::Yellow)));
    status_spans.push(Span::raw(" Nav | "));
    status_spans.push(Span::styled("r", Style::default().fg(Color::Yellow)));
    status_spans.push(Span::raw(" Reload | "));
    status_spans.push(Span::styled("q", Style::default().fg(Color::Red)));
    status_spans.push(Span::raw(" Quit"));

    let status_bar = Paragraph::new(vec![Line::from(status_spans)]).block(
        Block::default()
            .borders(Borders::ALL)
            .border_style(Style::default().fg(Color::White)),
    );

    f.render_widget(status_bar, area);
}

fn truncate(s: &str, max_len: usize) -> String {
    if s.chars().count() <= max_len {
        s.to_string()
    } else {
        let kept: String = s.chars().take(max_len.saturating_sub(3)).collect();
        format!("{}...", kept)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pipeline_dashboard::DealImportRow;

    fn create_test_row(id: &str, status: &str, value: &str) -> DealImportRow {
        DealImportRow {
            id: id.to_string(),
            deal_code: format!("CODE-{}", id),
            value: value.to_string(),
            status: status.to_string(),
            company: "Acme".to_string(),
            person: "Ana".to_string(),
            ..Default::default()
        }
    }

    fn create_test_app(runtime: &tokio::runtime::Runtime) -> App {
        let store = SqliteDealStore::in_memory().unwrap();
        store
            .import(&[
                create_test_row("D1", "Open", "100"),
                create_test_row("D2", "Open", "200"),
                create_test_row("D3", "Won", "50"),
            ])
            .unwrap();
        App::new(runtime.handle().clone(), Arc::new(store), ViewOptions::default())
    }

    #[test]
    fn test_page_cycle() {
        assert_eq!(Page::Overview.next(), Page::Pipeline);
        assert_eq!(Page::Overview.previous(), Page::Velocity);
        assert_eq!(Page::Velocity.next(), Page::Overview);
    }

    #[test]
    fn test_move_card_right_follows_deal() {
        let runtime = tokio::runtime::Runtime::new().unwrap();
        let mut app = create_test_app(&runtime);
        app.go_to(Page::Pipeline);

        assert_eq!(app.selected_deal().unwrap().id, "D1");
        app.move_selected(1);

        let pipeline = app.pipeline().unwrap();
        assert_eq!(pipeline.column("Open").unwrap().count, 1);
        assert_eq!(pipeline.column("Won").unwrap().count, 2);
        assert_eq!(app.selected_deal().unwrap().id, "D1");
        assert_eq!(app.notifications.latest().unwrap().message, "Deal moved to Won");
    }

    #[test]
    fn test_move_past_last_column_does_nothing() {
        let runtime = tokio::runtime::Runtime::new().unwrap();
        let mut app = create_test_app(&runtime);
        app.go_to(Page::Pipeline);
        app.select_column(5);

        app.move_selected(1);
        assert!(app.notifications.is_empty());
        assert_eq!(app.pipeline().unwrap().column("Won").unwrap().count, 1);
    }

    #[test]
    fn test_truncate_is_char_safe() {
        assert_eq!(truncate("Café Olé Ltd", 8), "Café ...");
        assert_eq!(truncate("Acme", 8), "Acme");
    }
}
