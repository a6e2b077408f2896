use std::future::Future;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{bail, Result};
use regex::Regex;
use tokio::io::{AsyncWrite, AsyncWriteExt};
use tokio::sync::mpsc::{self, UnboundedReceiver};
use tracing::{info, warn};
use url::Url;

use crate::cli::Config;
use crate::filter::build_filter;
use crate::server::build_label;
use crate::sink::{ChannelSink, StreamEvent};
use crate::source::ProgressiveText;
use crate::state::{AppState, BuildView, ViewStatus};
use crate::streamer::{LogStreamer, StreamConfig, StreamState};
use crate::ui::{poll_input, Ui, UiEvent};

type Streamer = LogStreamer<Arc<ProgressiveText>, ChannelSink>;
type Events = UnboundedReceiver<(usize, StreamEvent)>;

/// Application runtime: one streamer per build, feeding either the viewer or stdout.
pub async fn run(config: Config) -> Result<()> {
    // Build filter from config
    let filter: Option<Regex> = build_filter(config.regex.as_deref())?;

    let source = Arc::new(ProgressiveText::new(&config.server)?);
    let (streamers, rx) = follow(&config.builds, source, config.stream);

    let labels: Vec<String> = config.builds.iter().map(build_label).collect();
    info!(builds = ?labels, interval = ?config.stream.poll_interval, "following build consoles");
    for streamer in &streamers {
        streamer.start();
    }

    let res = if config.plain {
        let mut stdout = tokio::io::stdout();
        run_plain(&streamers, labels, rx, &mut stdout, tokio::signal::ctrl_c()).await
    } else {
        run_viewer(&streamers, labels, filter, rx).await
    };

    // A live streamer keeps polling until told otherwise
    for streamer in &streamers {
        streamer.cancel();
    }
    res
}

/// One idle streamer per build, all reporting into the returned channel tagged with
/// their index in `builds`.
fn follow(builds: &[Url], source: Arc<ProgressiveText>, config: StreamConfig) -> (Vec<Streamer>, Events) {
    let (tx, rx) = mpsc::unbounded_channel::<(usize, StreamEvent)>();
    let streamers: Vec<Streamer> = builds
        .iter()
        .enumerate()
        .map(|(view, url)| {
            let sink = ChannelSink { view, tx: tx.clone() };
            LogStreamer::new(url.as_str(), Arc::clone(&source), sink, config)
        })
        .collect();
    (streamers, rx)
}

/// Writes console text to `out` until every stream has finished or failed, or until
/// `interrupt` resolves. With several builds each line is prefixed with its build label.
async fn run_plain<W, F>(
    streamers: &[Streamer],
    labels: Vec<String>,
    mut rx: Events,
    out: &mut W,
    interrupt: F,
) -> Result<()>
where
    W: AsyncWrite + Unpin,
    F: Future,
{
    let mut views: Vec<BuildView> = labels.into_iter().map(BuildView::new).collect();
    let prefixed = views.len() > 1;
    let mut pending = streamers.len();
    let mut failures = 0;
    tokio::pin!(interrupt);

    while pending > 0 {
        let (index, event) = tokio::select! {
            event = rx.recv() => match event {
                Some(event) => event,
                None => break,
            },
            _ = &mut interrupt => {
                info!("interrupted");
                break;
            }
        };

        let text = match event {
            StreamEvent::Append(text) if !prefixed => text,
            StreamEvent::Append(text) => {
                let view = &mut views[index];
                view.push_text(&text);
                drain_prefixed(view)
            }
            StreamEvent::Finished => {
                pending -= 1;
                let view = &mut views[index];
                view.flush_partial();
                if prefixed { drain_prefixed(view) } else { String::new() }
            }
            StreamEvent::Failed(message) => {
                pending -= 1;
                failures += 1;
                let stream = streamers[index].snapshot();
                let reason = stream.last_error().map(ToString::to_string).unwrap_or(message);
                warn!(build = %views[index].label, offset = stream.offset(), %reason, "build console failed");
                String::new()
            }
        };
        if !text.is_empty() {
            out.write_all(text.as_bytes()).await?;
            out.flush().await?;
        }
    }

    if failures > 0 {
        bail!("{failures} of {} build console(s) could not be read", streamers.len());
    }
    Ok(())
}

fn drain_prefixed(view: &mut BuildView) -> String {
    view.lines
        .drain(..)
        .map(|line| format!("[{}] {line}\n", view.label))
        .collect()
}

async fn run_viewer(
    streamers: &[Streamer],
    labels: Vec<String>,
    filter: Option<Regex>,
    mut rx: Events,
) -> Result<()> {
    let mut state = AppState::new(labels, filter);
    let mut ui = Ui::new()?;

    // Main loop
    let mut last_draw = std::time::Instant::now();
    let draw_interval = std::time::Duration::from_millis(33); // ~30fps max

    let res = loop {
        // Drain any available events without blocking
        while let Ok((view, event)) = rx.try_recv() {
            state.apply(view, event);
        }

        // Handle user input
        let event = match poll_input() {
            Ok(event) => event,
            Err(e) => break Err(e),
        };
        let selected = state.selected;
        match event {
            UiEvent::Quit => break Ok(()),
            UiEvent::None => {}
            UiEvent::ScrollUp(n) => { if let Some(v) = state.current_mut() { v.scroll_up(n) } }
            UiEvent::ScrollDown(n) => { if let Some(v) = state.current_mut() { v.scroll_down(n) } }
            UiEvent::Top => { if let Some(v) = state.current_mut() { v.scroll_top() } }
            UiEvent::Bottom => { if let Some(v) = state.current_mut() { v.scroll_bottom() } }
            UiEvent::ToggleAuto => { if let Some(v) = state.current_mut() { v.toggle_auto_scroll() } }
            UiEvent::NextBuild => { state.select_next(); state.notice = None; }
            UiEvent::PrevBuild => { state.select_prev(); state.notice = None; }
            UiEvent::Retry => retry(&mut state, &streamers[selected]),
            UiEvent::Cancel => cancel(&mut state, &streamers[selected]),
            UiEvent::Save => save(&mut state, &streamers[selected]).await,
        }

        // Draw at most 30fps
        let should_draw = last_draw.elapsed() >= draw_interval;
        if should_draw {
            if let Err(e) = ui.draw(&state) {
                break Err(e);
            }
            last_draw = std::time::Instant::now();
        } else {
            // small sleep to reduce CPU
            tokio::time::sleep(std::time::Duration::from_millis(10)).await;
        }
    };

    // Ensure UI is restored even if error
    let _ = ui.restore();
    res
}

fn retry(state: &mut AppState, streamer: &Streamer) {
    if streamer.retry() {
        if let Some(v) = state.current_mut() {
            v.status = ViewStatus::Streaming;
        }
        state.notice = None;
    } else {
        state.notice = Some("Only a failed stream can be retried".into());
    }
}

fn cancel(state: &mut AppState, streamer: &Streamer) {
    streamer.cancel();
    if streamer.state() == StreamState::Cancelled {
        if let Some(v) = state.current_mut() {
            v.status = ViewStatus::Cancelled;
        }
        state.notice = Some("Stream cancelled".into());
    }
}

async fn save(state: &mut AppState, streamer: &Streamer) {
    let Some(view) = state.current() else { return };
    let path = log_file_name(&view.label);
    let stream = streamer.snapshot();
    state.notice = Some(match tokio::fs::write(&path, stream.buffer()).await {
        Ok(()) => {
            info!(path = %path.display(), bytes = stream.buffer().len(), "saved console");
            format!("Saved {} bytes to {}", stream.buffer().len(), path.display())
        }
        Err(e) => format!("Could not save {}: {e}", path.display()),
    });
}

/// `team/app #42` -> `team_app_42.log`
fn log_file_name(label: &str) -> PathBuf {
    let mut name = String::new();
    for c in label.chars() {
        if c.is_ascii_alphanumeric() || c == '-' || c == '.' {
            name.push(c);
        } else if !name.ends_with('_') {
            name.push('_');
        }
    }
    let name = name.trim_matches('_');
    PathBuf::from(format!("{}.log", if name.is_empty() { "console" } else { name }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::server::ServerContext;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[test]
    fn file_names_from_labels() {
        assert_eq!(log_file_name("team/app #42"), PathBuf::from("team_app_42.log"));
        assert_eq!(log_file_name("my app"), PathBuf::from("my_app.log"));
        assert_eq!(log_file_name("///"), PathBuf::from("console.log"));
    }

    #[test]
    fn prefixed_lines_keep_partial_line() {
        let mut view = BuildView::new("app #1".into());
        view.push_text("one\ntw");
        assert_eq!(drain_prefixed(&mut view), "[app #1] one\n");
        view.push_text("o\n");
        assert_eq!(drain_prefixed(&mut view), "[app #1] two\n");
        assert_eq!(drain_prefixed(&mut view), "");
    }

    #[tokio::test]
    async fn plain_output_prefixes_lines_and_reports_failures() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/job/ok/1/logText/progressiveText"))
            .respond_with(
                ResponseTemplate::new(200)
                    .insert_header("x-text-size", "11")
                    .set_body_string("hello\nworld"),
            )
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/job/bad/2/logText/progressiveText"))
            .respond_with(ResponseTemplate::new(500))
            .mount(&server)
            .await;

        let builds: Vec<Url> = ["job/ok/1/", "job/bad/2/"]
            .iter()
            .map(|p| Url::parse(&format!("{}/{p}", server.uri())).unwrap())
            .collect();
        let labels: Vec<String> = builds.iter().map(build_label).collect();
        assert_eq!(labels, vec!["ok #1", "bad #2"]);

        let source = Arc::new(ProgressiveText::new(&ServerContext::default()).unwrap());
        let (streamers, rx) = follow(&builds, source, StreamConfig::default());
        for streamer in &streamers {
            assert!(streamer.start());
        }

        let mut out = Vec::new();
        let err = run_plain(&streamers, labels, rx, &mut out, std::future::pending::<()>())
            .await
            .unwrap_err();

        assert_eq!(err.to_string(), "1 of 2 build console(s) could not be read");
        assert_eq!(String::from_utf8(out).unwrap(), "[ok #1] hello\n[ok #1] world\n");
        assert_eq!(streamers[0].state(), StreamState::Finished);
        assert_eq!(streamers[1].state(), StreamState::Failed);
    }

    #[tokio::test]
    async fn plain_output_stops_on_interrupt() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(
                ResponseTemplate::new(200)
                    .insert_header("x-text-size", "4")
                    .insert_header("x-more-data", "true")
                    .set_body_string("run\n"),
            )
            .mount(&server)
            .await;

        let builds = vec![Url::parse(&format!("{}/job/app/3/", server.uri())).unwrap()];
        let source = Arc::new(ProgressiveText::new(&ServerContext::default()).unwrap());
        let (streamers, rx) = follow(&builds, source, StreamConfig::default());
        streamers[0].start();

        let mut out = Vec::new();
        let interrupt = tokio::time::sleep(std::time::Duration::from_millis(500));
        run_plain(&streamers, vec!["app #3".into()], rx, &mut out, interrupt)
            .await
            .unwrap();

        // a single build is written through without a prefix
        assert_eq!(String::from_utf8(out).unwrap(), "run\n");
        assert_eq!(streamers[0].state(), StreamState::Scheduled);
        streamers[0].cancel();
    }
}
