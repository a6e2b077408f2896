use crate::filter::highlight_line;
use crate::state::{AppState, BuildView, ViewStatus};
use crossterm::event::{self, Event, KeyCode, KeyEvent, KeyEventKind, KeyModifiers};
use ratatui::backend::CrosstermBackend;
use ratatui::layout::{Constraint, Direction, Layout, Rect};
use ratatui::style::{Color, Modifier, Style};
use ratatui::text::{Line, Span};
use ratatui::widgets::{Block, Borders, Paragraph, Tabs, Wrap};
use ratatui::Terminal;
use std::io;

const HELP: &str = "Tab:build  Space:auto  r:retry  c:cancel  s:save  q:quit";

pub struct Ui {
    terminal: Terminal<CrosstermBackend<io::Stdout>>,
}

impl Ui {
    pub fn new() -> anyhow::Result<Self> {
        crossterm::terminal::enable_raw_mode()?;
        let mut stdout = io::stdout();
        crossterm::execute!(stdout, crossterm::terminal::EnterAlternateScreen)?;
        let backend = CrosstermBackend::new(stdout);
        let terminal = Terminal::new(backend)?;
        Ok(Self { terminal })
    }

    pub fn restore(&mut self) -> anyhow::Result<()> {
        crossterm::terminal::disable_raw_mode()?;
        crossterm::execute!(
            self.terminal.backend_mut(),
            crossterm::terminal::LeaveAlternateScreen,
            crossterm::cursor::Show
        )?;
        self.terminal.show_cursor()?;
        Ok(())
    }

    pub fn draw(&mut self, state: &AppState) -> anyhow::Result<()> {
        self.terminal.draw(|frame| {
            let chunks = Layout::default()
                .direction(Direction::Vertical)
                .constraints([Constraint::Length(3), Constraint::Min(3), Constraint::Length(1)])
                .split(frame.area());

            draw_tabs(frame, chunks[0], state);

            if let Some(view) = state.current() {
                draw_console(frame, chunks[1], state, view);
                draw_status(frame, chunks[2], state, view);
            }
        })?;
        Ok(())
    }
}

fn status_span(status: &ViewStatus) -> Span<'static> {
    match status {
        ViewStatus::Streaming => Span::styled("streaming", Style::default().fg(Color::Cyan)),
        ViewStatus::Finished => Span::styled("finished", Style::default().fg(Color::Green)),
        ViewStatus::Failed(_) => Span::styled("failed", Style::default().fg(Color::Red).add_modifier(Modifier::BOLD)),
        ViewStatus::Cancelled => Span::styled("cancelled", Style::default().fg(Color::DarkGray)),
    }
}

fn draw_tabs(frame: &mut ratatui::Frame<'_>, area: Rect, state: &AppState) {
    let titles: Vec<Line> = state
        .views
        .iter()
        .map(|v| Line::from(vec![Span::raw(format!("{} ", v.label)), status_span(&v.status)]))
        .collect();
    let tabs = Tabs::new(titles)
        .block(Block::default().borders(Borders::ALL).title("Builds"))
        .select(state.selected)
        .highlight_style(Style::default().add_modifier(Modifier::REVERSED));
    frame.render_widget(tabs, area);
}

fn draw_console(frame: &mut ratatui::Frame<'_>, area: Rect, state: &AppState, view: &BuildView) {
    let mut lines: Vec<Line> = Vec::new();

    if let ViewStatus::Failed(message) = &view.status {
        lines.push(Line::from(Span::styled(
            format!("Failed to load logs: {message}  (press r to retry)"),
            Style::default().fg(Color::Yellow).add_modifier(Modifier::BOLD),
        )));
    }

    // Determine visible slice based on scroll_offset
    let height = (area.height as usize).saturating_sub(2 + lines.len()); // account for borders
    let total = view.line_count();
    let start = if total > height {
        total.saturating_sub(height + view.scroll_offset)
    } else { 0 };
    let end = total.saturating_sub(view.scroll_offset);
    for i in start..end {
        lines.push(highlight_line(view.line(i), &state.filter));
    }

    if total == 0 && view.status == ViewStatus::Streaming {
        lines.push(Line::from(Span::styled("Loading logs...", Style::default().fg(Color::DarkGray))));
    }

    let title = Line::from(vec![Span::raw(format!("{} Console ", view.label)), status_span(&view.status)]);
    let para = Paragraph::new(lines)
        .block(Block::default().borders(Borders::ALL).title(title))
        .wrap(Wrap { trim: false });
    frame.render_widget(para, area);
}

fn draw_status(frame: &mut ratatui::Frame<'_>, area: Rect, state: &AppState, view: &BuildView) {
    let status = format!(
        "Lines: {}  Scroll: {}  Mode: {}  {}",
        view.line_count(),
        view.scroll_offset,
        if view.auto_scroll { "Auto" } else { "Paused" },
        state.notice.as_deref().unwrap_or(HELP),
    );
    frame.render_widget(Paragraph::new(status), area);
}

#[derive(Debug, PartialEq, Eq)]
pub enum UiEvent {
    Quit,
    None,
    ScrollUp(usize),
    ScrollDown(usize),
    Top,
    Bottom,
    ToggleAuto,
    NextBuild,
    PrevBuild,
    Retry,
    Cancel,
    Save,
}

pub fn poll_input() -> anyhow::Result<UiEvent> {
    if event::poll(std::time::Duration::from_millis(10))? {
        if let Event::Key(key) = event::read()? {
            if key.kind == KeyEventKind::Press {
                return Ok(map_key(key));
            }
        }
    }
    Ok(UiEvent::None)
}

fn map_key(key: KeyEvent) -> UiEvent {
    // Raw mode swallows SIGINT, so Ctrl-C arrives here as a key
    if key.modifiers.contains(KeyModifiers::CONTROL) {
        return match key.code {
            KeyCode::Char('c') => UiEvent::Quit,
            _ => UiEvent::None,
        };
    }
    match key.code {
        KeyCode::Char('q') | KeyCode::Esc => UiEvent::Quit,
        KeyCode::Up | KeyCode::Char('k') => UiEvent::ScrollUp(1),
        KeyCode::Down | KeyCode::Char('j') => UiEvent::ScrollDown(1),
        KeyCode::PageUp => UiEvent::ScrollUp(10),
        KeyCode::PageDown => UiEvent::ScrollDown(10),
        KeyCode::Home | KeyCode::Char('g') => UiEvent::Top,
        KeyCode::End | KeyCode::Char('G') => UiEvent::Bottom,
        KeyCode::Char(' ') => UiEvent::ToggleAuto,
        KeyCode::Tab | KeyCode::Right => UiEvent::NextBuild,
        KeyCode::BackTab | KeyCode::Left => UiEvent::PrevBuild,
        KeyCode::Char('r') => UiEvent::Retry,
        KeyCode::Char('c') => UiEvent::Cancel,
        KeyCode::Char('s') => UiEvent::Save,
        _ => UiEvent::None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ctrl_c_quits_instead_of_cancelling() {
        let ctrl_c = KeyEvent::new(KeyCode::Char('c'), KeyModifiers::CONTROL);
        assert_eq!(map_key(ctrl_c), UiEvent::Quit);

        let c = KeyEvent::new(KeyCode::Char('c'), KeyModifiers::NONE);
        assert_eq!(map_key(c), UiEvent::Cancel);

        let ctrl_r = KeyEvent::new(KeyCode::Char('r'), KeyModifiers::CONTROL);
        assert_eq!(map_key(ctrl_r), UiEvent::None);
    }

    #[test]
    fn shifted_keys_keep_their_meaning() {
        let end = KeyEvent::new(KeyCode::Char('G'), KeyModifiers::SHIFT);
        assert_eq!(map_key(end), UiEvent::Bottom);
        let back = KeyEvent::new(KeyCode::BackTab, KeyModifiers::SHIFT);
        assert_eq!(map_key(back), UiEvent::PrevBuild);
    }
}
