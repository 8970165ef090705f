//! Frame rendering. Reads `App`, never changes it; every scroll window comes
//! from the same `PanelHeights` the state machine uses.

use tuirealm::ratatui::{
    Frame,
    layout::{Alignment, Constraint, Direction, Layout, Rect},
    style::{Color, Modifier, Style},
    text::{Line, Span},
    widgets::{Block, BorderType, Borders, Clear, Paragraph},
};

use crate::app::dialogs::task_text;
use crate::app::{
    ActiveDialog, App, ContentState, CreateField, CreateSessionState, FetchResult, FocusMode,
    PanelHeights, ProjectPickerState, SessionDetailState, TaskRow, Viewport,
};
use crate::types::{PrCheckState, Session, SessionStatus, TaskStatus};

pub fn render(frame: &mut Frame<'_>, app: &App) {
    let area = frame.area();
    let chunks = Layout::default()
        .direction(Direction::Vertical)
        .constraints([Constraint::Min(0), Constraint::Length(1)])
        .split(area);

    if let FocusMode::Briefing(state) = &app.focus {
        render_briefing(frame, chunks[0], app, &state.viewport);
    } else {
        let columns = Layout::default()
            .direction(Direction::Horizontal)
            .constraints([Constraint::Percentage(45), Constraint::Percentage(55)])
            .split(chunks[0]);
        let left = Layout::default()
            .direction(Direction::Vertical)
            .constraints([
                Constraint::Length(PanelHeights::list_outer(area.height)),
                Constraint::Min(0),
            ])
            .split(columns[0]);

        render_sessions(frame, left[0], app);
        render_tasks(frame, left[1], app);
        render_preview(frame, columns[1], app);
    }
    render_footer(frame, chunks[1], app);

    if let Some(dialog) = app.focus.dialog() {
        render_dialog(frame, app, dialog);
    }
}

fn panel_block(title: String, focused: bool) -> Block<'static> {
    Block::default()
        .borders(Borders::ALL)
        .border_type(if focused {
            BorderType::Thick
        } else {
            BorderType::Plain
        })
        .border_style(if focused {
            Style::default().fg(Color::Cyan)
        } else {
            Style::default().fg(Color::DarkGray)
        })
        .title(title)
}

fn status_color(status: SessionStatus) -> Color {
    match status {
        SessionStatus::Working => Color::Green,
        SessionStatus::Waiting => Color::Yellow,
        SessionStatus::NeedsPermission => Color::Magenta,
        SessionStatus::Done => Color::Blue,
        SessionStatus::Error => Color::Red,
        SessionStatus::Unknown => Color::DarkGray,
    }
}

fn task_color(status: TaskStatus) -> Color {
    match status {
        TaskStatus::InProgress => Color::Green,
        TaskStatus::Blocked => Color::Red,
        TaskStatus::Done => Color::DarkGray,
        TaskStatus::Todo | TaskStatus::Unknown => Color::Reset,
    }
}

/// Visible slice of `lines` with the "more" markers the viewport reserves.
fn windowed<'a>(lines: Vec<Line<'a>>, viewport: &Viewport, height: usize) -> Vec<Line<'a>> {
    let total = lines.len();
    let window = viewport.window(total, height);
    let marker = Style::default().fg(Color::DarkGray);
    let mut visible = Vec::with_capacity(height);
    if window.more_above {
        visible.push(Line::styled(format!("  ↑ {} more", window.start), marker));
    }
    visible.extend(
        lines
            .into_iter()
            .skip(window.start)
            .take(window.len()),
    );
    if window.more_below {
        visible.push(Line::styled(
            format!("  ↓ {} more", total - window.end),
            marker,
        ));
    }
    visible
}

fn session_line(app: &App, position: usize, session: &Session) -> Line<'static> {
    let selected = position == app.list.cursor;
    let matched = app.matches.contains(&position);
    let mut name_style = Style::default().add_modifier(Modifier::BOLD);
    if matched {
        name_style = name_style.fg(Color::Yellow).add_modifier(Modifier::UNDERLINED);
    }

    let mut spans = vec![
        Span::raw(if selected { "> " } else { "  " }),
        Span::styled(
            format!("{:<11}", session.status.as_str()),
            Style::default().fg(status_color(session.status)),
        ),
        Span::styled(session.name.clone(), name_style),
    ];
    if let Some(host) = session.origin.host() {
        spans.push(Span::styled(
            format!(" @{host}"),
            Style::default().fg(Color::Cyan),
        ));
    }
    if let Some(branch) = session.vcs.as_ref().and_then(|vcs| vcs.branch.as_ref()) {
        spans.push(Span::styled(
            format!("  {branch}"),
            Style::default().fg(Color::DarkGray),
        ));
    }
    if let Some(message) = &session.message {
        spans.push(Span::raw(format!("  {message}")));
    }

    let line = Line::from(spans);
    if selected {
        line.style(Style::default().add_modifier(Modifier::REVERSED))
    } else {
        line
    }
}

fn render_sessions(frame: &mut Frame<'_>, area: Rect, app: &App) {
    let heights = app.heights();
    let filter = &app.filter;
    let mut title = format!(
        " Sessions {}/{} | {} | sort {} ",
        app.displayed.len(),
        app.sessions.len(),
        filter.origin.label(),
        app.sort.label()
    );
    if let Some(status) = filter.status {
        title.push_str(&format!("| {status} "));
    }
    if filter.hide_completed {
        title.push_str("| hiding done ");
    }
    if let Some(scope) = &filter.scope {
        title.push_str(&format!("| {} ", scope.display()));
    }

    let block = panel_block(title, app.focus == FocusMode::List);
    if app.displayed.is_empty() {
        let text = if app.sessions.is_empty() {
            "No sessions yet. Press c to create one."
        } else {
            "No sessions match the current filters."
        };
        frame.render_widget(
            Paragraph::new(text)
                .style(Style::default().fg(Color::DarkGray))
                .block(block),
            area,
        );
        return;
    }

    let lines: Vec<Line> = app
        .displayed_sessions()
        .enumerate()
        .map(|(position, session)| session_line(app, position, session))
        .collect();
    frame.render_widget(
        Paragraph::new(windowed(lines, &app.list.viewport, heights.list)).block(block),
        area,
    );
}

fn render_tasks(frame: &mut Frame<'_>, area: Rect, app: &App) {
    let heights = app.heights();
    let title = match &app.task_project {
        Some(project) => format!(
            " Tasks {} | sort {} ",
            project.display(),
            app.task_sort.label()
        ),
        None => " Tasks ".to_string(),
    };
    let block = panel_block(title, app.focus == FocusMode::Tasks);

    let Some(project) = &app.task_project else {
        frame.render_widget(
            Paragraph::new("Select a local session or pick a project (p).")
                .style(Style::default().fg(Color::DarkGray))
                .block(block),
            area,
        );
        return;
    };

    if app.task_rows.is_empty() {
        let lookup = app.task_cache.lookup(project);
        let text = match (lookup.value, lookup.error) {
            (Some(outcome), _) if !outcome.is_configured() => {
                "No task provider. Add .session-deck/tasks.toml with a command.".to_string()
            }
            (Some(_), _) => "No tasks.".to_string(),
            (None, Some(error)) => format!("Task provider failed: {error}"),
            (None, None) => "Loading tasks...".to_string(),
        };
        frame.render_widget(Paragraph::new(text).block(block), area);
        return;
    }

    let lines: Vec<Line> = app
        .task_rows
        .iter()
        .enumerate()
        .map(|(position, row)| task_line(app, position, *row))
        .collect();
    frame.render_widget(
        Paragraph::new(windowed(lines, &app.task_list.viewport, heights.tasks)).block(block),
        area,
    );
}

fn task_line(app: &App, position: usize, row: TaskRow) -> Line<'static> {
    let selected = position == app.task_list.cursor;
    let matched = app.task_matches.contains(&position);
    let title_style = if matched {
        Style::default()
            .fg(Color::Yellow)
            .add_modifier(Modifier::UNDERLINED)
    } else {
        Style::default()
    };
    let line = match row {
        TaskRow::Group { group } => {
            let Some(group) = app.task_groups.get(group) else {
                return Line::default();
            };
            let arrow = if app.expanded_groups.contains(&group.id) {
                "▾"
            } else {
                "▸"
            };
            Line::from(vec![
                Span::raw(format!("{arrow} ")),
                Span::styled(group.title.clone(), title_style.add_modifier(Modifier::BOLD)),
                Span::styled(
                    format!(" ({}) {}", group.tasks.len(), group.status.as_str()),
                    Style::default().fg(task_color(group.status)),
                ),
            ])
        }
        TaskRow::Task { group, task } => {
            let Some(task) = app.task_groups.get(group).and_then(|g| g.tasks.get(task)) else {
                return Line::default();
            };
            Line::from(vec![
                Span::raw("    "),
                Span::styled(
                    format!("{:<12}", task.status.as_str()),
                    Style::default().fg(task_color(task.status)),
                ),
                Span::styled(task.title.clone(), title_style),
            ])
        }
    };
    if selected {
        line.style(Style::default().add_modifier(Modifier::REVERSED))
    } else {
        line
    }
}

fn text_lines(body: Option<&FetchResult<String>>, loading: &str) -> Vec<Line<'static>> {
    match body {
        Some(Ok(text)) => text.lines().map(|line| Line::raw(line.to_string())).collect(),
        Some(Err(error)) => vec![Line::styled(
            error.clone(),
            Style::default().fg(Color::Red),
        )],
        None => vec![Line::styled(
            loading.to_string(),
            Style::default().fg(Color::DarkGray),
        )],
    }
}

fn render_preview(frame: &mut Frame<'_>, area: Rect, app: &App) {
    let heights = app.heights();
    let title = match &app.preview.target {
        Some(key) if app.preview.follow_tail => format!(" {key} "),
        Some(key) => format!(" {key} (scrolled) "),
        None => " Preview ".to_string(),
    };
    let block = panel_block(title, app.focus == FocusMode::Preview);
    if app.preview.target.is_none() {
        frame.render_widget(Paragraph::new("").block(block), area);
        return;
    }
    let lines = text_lines(app.preview.text.as_ref(), "Capturing...");
    frame.render_widget(
        Paragraph::new(windowed(lines, &app.preview.viewport, heights.preview)).block(block),
        area,
    );
}

fn render_footer(frame: &mut Frame<'_>, area: Rect, app: &App) {
    let line = if app.search.editing {
        Line::from(vec![
            Span::styled("/", Style::default().fg(Color::Yellow)),
            Span::raw(app.search.query.clone()),
            Span::styled("█", Style::default().fg(Color::DarkGray)),
        ])
    } else if let Some(notice) = &app.notice {
        let color = if notice.is_error {
            Color::Red
        } else {
            Color::Green
        };
        Line::styled(format!(" {}", notice.text), Style::default().fg(color))
    } else if app.search.is_active() {
        let count = match app.search.target {
            crate::app::SearchTarget::Sessions => app.matches.len(),
            crate::app::SearchTarget::Tasks => app.task_matches.len(),
        };
        Line::raw(format!(
            " /{}  {count} matches  n/N: next/prev  Esc: clear",
            app.search.query
        ))
    } else {
        Line::styled(
            " Enter attach  c new  r rename  x kill  d dismiss  i detail  v scrollback  / search  f/s/h filter  o sort  p project  b briefing  R refresh  q quit",
            Style::default().fg(Color::DarkGray),
        )
    };
    frame.render_widget(Paragraph::new(line), area);
}

fn render_briefing(frame: &mut Frame<'_>, area: Rect, app: &App, viewport: &Viewport) {
    let height = app.heights().overlay;
    let lines = app.briefing_lines().into_iter().map(Line::raw).collect();
    let block = Block::default()
        .borders(Borders::ALL)
        .border_type(BorderType::Double)
        .title(" Briefing ")
        .title_alignment(Alignment::Center);
    frame.render_widget(
        Paragraph::new(windowed(lines, viewport, height)).block(block),
        overlay_area(area),
    );
}

/// Full-screen overlay area: one cell of margin on every side.
fn overlay_area(area: Rect) -> Rect {
    Rect {
        x: area.x.saturating_add(1),
        y: area.y.saturating_add(1),
        width: area.width.saturating_sub(2),
        height: area.height.saturating_sub(2),
    }
}

fn render_dialog(frame: &mut Frame<'_>, app: &App, dialog: &ActiveDialog) {
    let (percent_x, percent_y, title) = match dialog {
        ActiveDialog::CreateSession(_) => (60, 60, " New Session ".to_string()),
        ActiveDialog::Rename(state) => (50, 30, format!(" Rename {} ", state.key)),
        ActiveDialog::ConfirmKill(_) => (50, 30, " Kill Session ".to_string()),
        ActiveDialog::SessionDetail(state) => (80, 80, format!(" {} ", state.key)),
        ActiveDialog::TaskDetail(state) => (60, 50, format!(" {} ", state.task.title)),
        ActiveDialog::ProjectPicker(_) => (60, 70, " Project ".to_string()),
        ActiveDialog::Content(state) => {
            render_content(frame, app, state);
            return;
        }
    };

    let area = centered_rect(percent_x, percent_y, frame.area());
    frame.render_widget(Clear, area);
    let block = Block::default()
        .borders(Borders::ALL)
        .border_type(BorderType::Double)
        .title(title)
        .title_alignment(Alignment::Center);
    let inner = block.inner(area);
    frame.render_widget(block, area);

    match dialog {
        ActiveDialog::CreateSession(state) => render_create(frame, inner, app, state),
        ActiveDialog::Rename(state) => {
            let rows = split_rows(inner, &[3, 2, 1]);
            render_input_field(frame, rows[0], " New name ", &state.input, true);
            render_status_line(frame, rows[1], state.error.as_deref(), state.pending);
            frame.render_widget(hint("Enter: rename  Esc: cancel"), rows[2]);
        }
        ActiveDialog::ConfirmKill(state) => {
            let rows = split_rows(inner, &[2, 2, 1]);
            frame.render_widget(
                Paragraph::new(format!("Kill {}? Its processes will stop.", state.key)),
                rows[0],
            );
            render_status_line(frame, rows[1], state.error.as_deref(), state.pending);
            frame.render_widget(hint("y/Enter: kill  n/Esc: cancel"), rows[2]);
        }
        ActiveDialog::SessionDetail(state) => render_session_detail(frame, inner, app, state),
        ActiveDialog::TaskDetail(state) => {
            let rows = split_rows(inner, &[inner.height.saturating_sub(1), 1]);
            frame.render_widget(Paragraph::new(task_text(state)), rows[0]);
            frame.render_widget(hint("o: open link  v: full view  Esc: close"), rows[1]);
        }
        ActiveDialog::ProjectPicker(state) => render_picker(frame, inner, state),
        ActiveDialog::Content(_) => {}
    }
}

fn split_rows(area: Rect, heights: &[u16]) -> Vec<Rect> {
    let constraints: Vec<Constraint> = heights.iter().map(|h| Constraint::Length(*h)).collect();
    Layout::default()
        .direction(Direction::Vertical)
        .constraints(constraints)
        .split(area)
        .to_vec()
}

fn hint(text: &str) -> Paragraph<'_> {
    Paragraph::new(text).style(Style::default().fg(Color::DarkGray))
}

fn render_status_line(frame: &mut Frame<'_>, area: Rect, error: Option<&str>, pending: bool) {
    let line = match (error, pending) {
        (Some(error), _) => Line::styled(
            format!("{error} (Esc to dismiss)"),
            Style::default().fg(Color::Red),
        ),
        (None, true) => Line::styled("Working...", Style::default().fg(Color::Yellow)),
        (None, false) => Line::default(),
    };
    frame.render_widget(Paragraph::new(line), area);
}

fn render_input_field(frame: &mut Frame<'_>, area: Rect, label: &str, value: &str, focused: bool) {
    let block = Block::default()
        .borders(Borders::ALL)
        .title(label.to_string())
        .style(if focused {
            Style::default().fg(Color::Yellow)
        } else {
            Style::default()
        });
    frame.render_widget(Paragraph::new(value.to_string()).block(block), area);
}

fn render_create(frame: &mut Frame<'_>, area: Rect, app: &App, state: &CreateSessionState) {
    let rows = split_rows(area, &[3, 3, 3, 3, 2, 1]);
    render_input_field(
        frame,
        rows[0],
        " Name ",
        &state.name,
        state.field == CreateField::Name,
    );
    render_input_field(
        frame,
        rows[1],
        " Directory ",
        &state.directory,
        state.field == CreateField::Directory,
    );
    render_input_field(
        frame,
        rows[2],
        " Command (optional) ",
        &state.command,
        state.field == CreateField::Command,
    );
    let origin = match state.origin_index {
        0 => "local".to_string(),
        index => app
            .hosts()
            .get(index - 1)
            .cloned()
            .unwrap_or_else(|| "?".to_string()),
    };
    render_input_field(
        frame,
        rows[3],
        " Origin (←/→) ",
        &origin,
        state.field == CreateField::Origin,
    );
    render_status_line(frame, rows[4], state.error.as_deref(), state.pending);
    frame.render_widget(hint("Tab: next field  Enter: create  Esc: cancel"), rows[5]);
}

fn render_session_detail(
    frame: &mut Frame<'_>,
    area: Rect,
    app: &App,
    state: &SessionDetailState,
) {
    let mut lines: Vec<Line> = Vec::new();
    match app.session(&state.key) {
        Some(session) => {
            lines.push(Line::from(vec![
                Span::raw("Status:    "),
                Span::styled(
                    session.status.as_str(),
                    Style::default().fg(status_color(session.status)),
                ),
            ]));
            lines.push(Line::raw(format!(
                "Directory: {}",
                session.working_dir.display()
            )));
            lines.push(Line::raw(format!(
                "Activity:  {}",
                session.last_activity.format("%Y-%m-%d %H:%M:%S")
            )));
            if let Some(message) = &session.message {
                lines.push(Line::raw(format!("Message:   {message}")));
            }
            match &session.vcs {
                Some(vcs) => {
                    lines.push(Line::raw(format!(
                        "Branch:    {} (+{} -{}) {} changed",
                        vcs.branch.as_deref().unwrap_or("detached"),
                        vcs.ahead,
                        vcs.behind,
                        vcs.changed_files
                    )));
                    if let Some(commit) = &vcs.last_commit {
                        lines.push(Line::raw(format!("Commit:    {commit}")));
                    }
                }
                None => lines.push(Line::raw("Branch:    -")),
            }
            if let Some(usage) = &session.resources {
                lines.push(Line::raw(format!(
                    "Process:   {:.1}% cpu, {} MiB",
                    usage.cpu_percent,
                    usage.rss_kb / 1024
                )));
            }
            if let Some(metrics) = &session.metrics {
                lines.push(Line::raw(format!(
                    "Tokens:    {} (${:.2})",
                    metrics.tokens, metrics.cost_usd
                )));
            }
        }
        None => lines.push(Line::styled(
            "Session is gone.",
            Style::default().fg(Color::Red),
        )),
    }
    lines.push(Line::default());

    let header_height = lines.len() as u16 + 1;
    let rows = split_rows(
        area,
        &[
            header_height,
            area.height.saturating_sub(header_height + 1),
            1,
        ],
    );
    lines.push(Line::styled(
        "PR checks",
        Style::default().add_modifier(Modifier::BOLD),
    ));
    frame.render_widget(Paragraph::new(lines), rows[0]);

    let check_lines: Vec<Line> = match &state.checks {
        None => vec![Line::styled("Loading...", Style::default().fg(Color::DarkGray))],
        Some(Err(error)) => vec![Line::styled(error.clone(), Style::default().fg(Color::Red))],
        Some(Ok(checks)) if checks.is_empty() => vec![Line::raw("No pull request checks.")],
        Some(Ok(checks)) => checks
            .iter()
            .map(|check| {
                let (mark, color) = match check.state {
                    PrCheckState::Passed => ("✓", Color::Green),
                    PrCheckState::Failed => ("✗", Color::Red),
                    PrCheckState::Pending => ("…", Color::Yellow),
                    PrCheckState::Skipped => ("-", Color::DarkGray),
                };
                Line::from(vec![
                    Span::styled(format!("{mark} "), Style::default().fg(color)),
                    Span::raw(check.name.clone()),
                ])
            })
            .collect(),
    };
    frame.render_widget(
        Paragraph::new(windowed(
            check_lines,
            &state.viewport,
            usize::from(rows[1].height),
        )),
        rows[1],
    );
    frame.render_widget(hint("r: refresh checks  v: scrollback  Esc: close"), rows[2]);
}

fn render_content(frame: &mut Frame<'_>, app: &App, state: &ContentState) {
    let area = overlay_area(frame.area());
    frame.render_widget(Clear, area);
    let block = Block::default()
        .borders(Borders::ALL)
        .border_type(BorderType::Double)
        .title(format!(" {} ", state.title))
        .title_bottom(" j/k scroll  g/G top/bottom  Esc close ");
    let lines = text_lines(state.body.as_ref(), "Loading...");
    frame.render_widget(
        Paragraph::new(windowed(lines, &state.viewport, app.heights().overlay)).block(block),
        area,
    );
}

fn render_picker(frame: &mut Frame<'_>, area: Rect, state: &ProjectPickerState) {
    let rows = split_rows(area, &[3, area.height.saturating_sub(4), 1]);
    render_input_field(frame, rows[0], " Filter ", &state.query, true);

    let lines: Vec<Line> = state
        .ranked
        .iter()
        .enumerate()
        .filter_map(|(position, ranked)| {
            let path = state.candidates.get(ranked.index)?;
            let label = path.display().to_string();
            let spans: Vec<Span> = label
                .chars()
                .enumerate()
                .map(|(index, ch)| {
                    if ranked.matched_indices.contains(&index) {
                        Span::styled(ch.to_string(), Style::default().fg(Color::Yellow))
                    } else {
                        Span::raw(ch.to_string())
                    }
                })
                .collect();
            let line = Line::from(spans);
            Some(if position == state.list.cursor {
                line.style(Style::default().add_modifier(Modifier::REVERSED))
            } else {
                line
            })
        })
        .collect();
    frame.render_widget(
        Paragraph::new(windowed(
            lines,
            &state.list.viewport,
            usize::from(rows[1].height),
        )),
        rows[1],
    );
    frame.render_widget(hint("Enter: set scope  Del: all projects  Esc: cancel"), rows[2]);
}

fn centered_rect(percent_x: u16, percent_y: u16, r: Rect) -> Rect {
    let popup_layout = Layout::default()
        .direction(Direction::Vertical)
        .constraints([
            Constraint::Percentage((100 - percent_y) / 2),
            Constraint::Percentage(percent_y),
            Constraint::Percentage((100 - percent_y) / 2),
        ])
        .split(r);

    Layout::default()
        .direction(Direction::Horizontal)
        .constraints([
            Constraint::Percentage((100 - percent_x) / 2),
            Constraint::Percentage(percent_x),
            Constraint::Percentage((100 - percent_x) / 2),
        ])
        .split(popup_layout[1])[1]
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::app::Message;
    use crate::settings::Settings;
    use crate::types::Origin;
    use tuirealm::ratatui::{Terminal, backend::TestBackend};

    #[test]
    fn test_windowed_adds_markers() {
        let lines: Vec<Line> = (0..10).map(|i| Line::raw(i.to_string())).collect();
        let viewport = Viewport { offset: 3 };
        let visible = windowed(lines, &viewport, 5);
        assert_eq!(visible.len(), 5);
        assert_eq!(visible[0].to_string(), "  ↑ 3 more");
        assert_eq!(visible[1].to_string(), "3");
        assert_eq!(visible[4].to_string(), "  ↓ 4 more");
    }

    #[test]
    fn test_render_smoke() {
        let mut app = App::new(Settings::default());
        app.update(Message::Resize(100, 30));
        app.update(Message::LocalSessions {
            epoch: 0,
            result: Ok(vec![Session::new(Origin::Local, "api", "/w/api")]),
        });
        let mut terminal = Terminal::new(TestBackend::new(100, 30)).unwrap();
        terminal.draw(|frame| render(frame, &app)).unwrap();
        let buffer = terminal.backend().buffer().clone();
        let text: String = buffer.content.iter().map(|cell| cell.symbol()).collect();
        assert!(text.contains("api"));
        assert!(text.contains("Sessions 1/1"));
    }
}
