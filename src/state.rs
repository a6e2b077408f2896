use regex::Regex;

use crate::sink::StreamEvent;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ViewStatus {
    Streaming,
    Finished,
    Failed(String),
    Cancelled,
}

/// Everything the UI shows for one followed build.
pub struct BuildView {
    pub label: String,
    // Complete lines received so far
    pub lines: Vec<String>,
    // Text after the last newline; chunks do not respect line boundaries
    partial: String,
    // Current scroll offset from the bottom; 0 means bottom (latest)
    pub scroll_offset: usize,
    // Whether auto-scroll is enabled; when user scrolls, this becomes false
    pub auto_scroll: bool,
    pub status: ViewStatus,
}

impl BuildView {
    pub fn new(label: String) -> Self {
        Self {
            label,
            lines: Vec::new(),
            partial: String::new(),
            scroll_offset: 0,
            auto_scroll: true,
            status: ViewStatus::Streaming,
        }
    }

    pub fn apply(&mut self, event: StreamEvent) {
        match event {
            StreamEvent::Append(text) => self.push_text(&text),
            StreamEvent::Finished => self.status = ViewStatus::Finished,
            StreamEvent::Failed(message) => self.status = ViewStatus::Failed(message),
        }
    }

    pub fn push_text(&mut self, text: &str) {
        self.partial.push_str(text);
        while let Some(pos) = self.partial.find('\n') {
            let mut line: String = self.partial.drain(..=pos).collect();
            line.pop();
            if line.ends_with('\r') {
                line.pop();
            }
            self.lines.push(line);
        }
        if self.auto_scroll {
            self.scroll_offset = 0;
        }
    }

    /// Moves an unterminated trailing line into `lines`.
    pub fn flush_partial(&mut self) {
        if !self.partial.is_empty() {
            self.lines.push(std::mem::take(&mut self.partial));
        }
    }

    /// Number of displayable lines, counting an unterminated trailing line.
    pub fn line_count(&self) -> usize {
        self.lines.len() + usize::from(!self.partial.is_empty())
    }

    pub fn line(&self, index: usize) -> &str {
        self.lines.get(index).map(String::as_str).unwrap_or(self.partial.as_str())
    }

    pub fn scroll_up(&mut self, n: usize) {
        self.auto_scroll = false;
        let max_offset = self.line_count().saturating_sub(1);
        self.scroll_offset = (self.scroll_offset + n).min(max_offset);
    }

    pub fn scroll_down(&mut self, n: usize) {
        if self.scroll_offset == 0 { return; }
        self.scroll_offset = self.scroll_offset.saturating_sub(n);
        if self.scroll_offset == 0 {
            self.auto_scroll = true;
        }
    }

    pub fn scroll_top(&mut self) {
        self.auto_scroll = false;
        self.scroll_offset = self.line_count().saturating_sub(1);
    }

    pub fn scroll_bottom(&mut self) {
        self.scroll_offset = 0;
        self.auto_scroll = true;
    }

    pub fn toggle_auto_scroll(&mut self) {
        if self.auto_scroll {
            self.auto_scroll = false;
        } else {
            self.scroll_bottom();
        }
    }
}

pub struct AppState {
    pub views: Vec<BuildView>,
    pub selected: usize,
    // Optional compiled filter regex for highlight
    pub filter: Option<Regex>,
    // One-off message for the status bar (save results, refused actions)
    pub notice: Option<String>,
}

impl AppState {
    pub fn new(labels: Vec<String>, filter: Option<Regex>) -> Self {
        Self {
            views: labels.into_iter().map(BuildView::new).collect(),
            selected: 0,
            filter,
            notice: None,
        }
    }

    pub fn apply(&mut self, view: usize, event: StreamEvent) {
        if let Some(v) = self.views.get_mut(view) {
            v.apply(event);
        }
    }

    pub fn current(&self) -> Option<&BuildView> {
        self.views.get(self.selected)
    }

    pub fn current_mut(&mut self) -> Option<&mut BuildView> {
        self.views.get_mut(self.selected)
    }

    pub fn select_next(&mut self) {
        if !self.views.is_empty() {
            self.selected = (self.selected + 1) % self.views.len();
        }
    }

    pub fn select_prev(&mut self) {
        if !self.views.is_empty() {
            self.selected = (self.selected + self.views.len() - 1) % self.views.len();
        }
    }
}
