use tokio::sync::mpsc::UnboundedSender;

use crate::error::FetchError;
use crate::streamer::LogSink;

/// What a stream reports to the UI loop.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StreamEvent {
    Append(String),
    Finished,
    Failed(String),
}

/// Forwards sink callbacks onto a channel, tagged with the index of the build view
/// they belong to. Sends never block, so it is safe to call with the stream locked.
pub struct ChannelSink {
    pub view: usize,
    pub tx: UnboundedSender<(usize, StreamEvent)>,
}

impl ChannelSink {
    fn send(&self, event: StreamEvent) {
        // receiver gone means the app is shutting down
        let _ = self.tx.send((self.view, event));
    }
}

impl LogSink for ChannelSink {
    fn append(&self, text: &str) {
        self.send(StreamEvent::Append(text.to_string()));
    }

    fn finished(&self) {
        self.send(StreamEvent::Finished);
    }

    fn failed(&self, error: &FetchError) {
        self.send(StreamEvent::Failed(error.to_string()));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::sync::mpsc;

    #[test]
    fn events_are_tagged_with_view() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let sink = ChannelSink { view: 2, tx };
        sink.append("hello");
        sink.append("");
        sink.failed(&FetchError::Auth { status: 401 });
        sink.finished();

        assert_eq!(rx.try_recv().unwrap(), (2, StreamEvent::Append("hello".into())));
        assert_eq!(rx.try_recv().unwrap(), (2, StreamEvent::Append(String::new())));
        assert_eq!(
            rx.try_recv().unwrap(),
            (2, StreamEvent::Failed("authentication rejected (HTTP 401)".into()))
        );
        assert_eq!(rx.try_recv().unwrap(), (2, StreamEvent::Finished));
    }

    #[test]
    fn closed_channel_is_ignored() {
        let (tx, rx) = mpsc::unbounded_channel();
        drop(rx);
        ChannelSink { view: 0, tx }.append("nobody listening");
    }
}
