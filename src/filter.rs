use regex::{Regex, RegexBuilder};
use ratatui::style::{Color, Modifier, Style};
use ratatui::text::{Line, Span};

pub fn build_filter(pattern: Option<&str>) -> anyhow::Result<Option<Regex>> {
    if let Some(p) = pattern {
        if p.is_empty() { return Ok(None); }
        let re = RegexBuilder::new(p)
            .case_insensitive(true)
            .build()?;
        Ok(Some(re))
    } else {
        Ok(None)
    }
}

/// Base style for a console line, picked from the markers Jenkins writes.
pub fn line_style(text: &str) -> Style {
    if let Some(result) = text.strip_prefix("Finished: ") {
        let color = if result.trim() == "SUCCESS" { Color::Green } else { Color::Red };
        return Style::default().fg(color).add_modifier(Modifier::BOLD);
    }
    if text.contains("ERROR") || text.contains("FAILURE") || text.contains("FATAL") {
        return Style::default().fg(Color::Red);
    }
    if text.starts_with("[Pipeline]") {
        return Style::default().fg(Color::DarkGray);
    }
    Style::default()
}

pub fn highlight_line<'a>(text: &'a str, re: &Option<Regex>) -> Line<'a> {
    let base = line_style(text);
    match re {
        None => Line::from(Span::styled(text, base)),
        Some(regex) => {
            let matched = base.patch(Style::default().fg(Color::Yellow).add_modifier(Modifier::BOLD));
            let mut spans: Vec<Span> = Vec::new();
            let mut last = 0;
            for m in regex.find_iter(text) {
                if m.start() > last {
                    spans.push(Span::styled(&text[last..m.start()], base));
                }
                spans.push(Span::styled(&text[m.start()..m.end()], matched));
                last = m.end();
            }
            if last < text.len() {
                spans.push(Span::styled(&text[last..], base));
            }
            Line::from(spans)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_pattern_means_no_filter() {
        assert!(build_filter(None).unwrap().is_none());
        assert!(build_filter(Some("")).unwrap().is_none());
        assert!(build_filter(Some("(")).is_err());
    }

    #[test]
    fn result_lines_are_colored() {
        assert_eq!(line_style("Finished: SUCCESS").fg, Some(Color::Green));
        assert_eq!(line_style("Finished: FAILURE").fg, Some(Color::Red));
        assert_eq!(line_style("Finished: ABORTED").fg, Some(Color::Red));
        assert_eq!(line_style("[ERROR] compilation failed").fg, Some(Color::Red));
        assert_eq!(line_style("[Pipeline] stage").fg, Some(Color::DarkGray));
        assert_eq!(line_style("Building in workspace").fg, None);
    }

    #[test]
    fn matches_are_split_into_spans() {
        let re = build_filter(Some("mvn")).unwrap();
        let line = highlight_line("+ MVN clean mvn install", &re);
        let parts: Vec<&str> = line.spans.iter().map(|s| s.content.as_ref()).collect();
        assert_eq!(parts, vec!["+ ", "MVN", " clean ", "mvn", " install"]);
        assert_eq!(line.spans[1].style.fg, Some(Color::Yellow));
        assert_eq!(line.spans[0].style.fg, None);
    }
}
