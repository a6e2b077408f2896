//! Incremental console streaming.
//!
//! A `LogStreamer` owns one `LogStream` and drives it with repeated fetches against a
//! `TextSource`, advancing a byte offset until the source reports that no more output
//! will arrive. At most one fetch is outstanding per stream: a poll task only exists
//! while the stream is `Polling` or `Scheduled`, and `start`/`retry` refuse to spawn a
//! second one. Cancellation is cooperative. The token is checked before every fetch and
//! raced against every inter-poll delay; a fetch already in flight is allowed to finish,
//! but its result is dropped because the stream is no longer `Polling`.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::error::FetchError;
use crate::source::{LogChunk, TextSource};

/// Delay between a chunk that says "more to come" and the next fetch.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(3);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamState {
    Idle,
    /// A fetch is in flight.
    Polling,
    /// Waiting out the poll interval before the next fetch.
    Scheduled,
    Finished,
    Failed,
    Cancelled,
}

impl StreamState {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Finished | Self::Cancelled)
    }
}

/// One build console being followed. Only its streamer mutates it; everyone else
/// gets clones through [`LogStreamer::snapshot`].
#[derive(Debug, Clone)]
pub struct LogStream {
    source: String,
    offset: u64,
    buffer: String,
    // Trailing bytes of an incomplete UTF-8 sequence, completed by the next chunk
    carry: Vec<u8>,
    state: StreamState,
    last_error: Option<Arc<FetchError>>,
}

impl LogStream {
    fn new(source: String) -> Self {
        Self {
            source,
            offset: 0,
            buffer: String::new(),
            carry: Vec::new(),
            state: StreamState::Idle,
            last_error: None,
        }
    }

    pub fn source(&self) -> &str {
        &self.source
    }

    pub fn offset(&self) -> u64 {
        self.offset
    }

    pub fn buffer(&self) -> &str {
        &self.buffer
    }

    pub fn state(&self) -> StreamState {
        self.state
    }

    pub fn last_error(&self) -> Option<&FetchError> {
        self.last_error.as_deref()
    }
}

/// Receives what a stream produces, in order.
///
/// Every callback runs while the stream's lock is held, so a sink must not call back
/// into the `LogStreamer` it is attached to (`snapshot`, `state`, `cancel`, ...): that
/// deadlocks. Hand the event off instead, the way `ChannelSink` does.
pub trait LogSink: Send + Sync + 'static {
    /// Called once per received chunk, empty ones included.
    fn append(&self, text: &str);
    /// Called exactly once, when the source first reports completion.
    fn finished(&self);
    fn failed(&self, error: &FetchError);
}

impl<T: LogSink + ?Sized> LogSink for Arc<T> {
    fn append(&self, text: &str) {
        (**self).append(text)
    }

    fn finished(&self) {
        (**self).finished()
    }

    fn failed(&self, error: &FetchError) {
        (**self).failed(error)
    }
}

#[derive(Debug, Clone, Copy)]
pub struct StreamConfig {
    pub poll_interval: Duration,
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self {
            poll_interval: DEFAULT_POLL_INTERVAL,
        }
    }
}

/// Handle to a streaming session. Clones share the same stream.
pub struct LogStreamer<S, K> {
    inner: Arc<Inner<S, K>>,
}

impl<S, K> Clone for LogStreamer<S, K> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

struct Inner<S, K> {
    source: S,
    sink: K,
    poll_interval: Duration,
    stream: Mutex<LogStream>,
    cancel: CancellationToken,
}

impl<S: TextSource, K: LogSink> LogStreamer<S, K> {
    pub fn new(source_id: impl Into<String>, source: S, sink: K, config: StreamConfig) -> Self {
        Self {
            inner: Arc::new(Inner {
                source,
                sink,
                poll_interval: config.poll_interval,
                stream: Mutex::new(LogStream::new(source_id.into())),
                cancel: CancellationToken::new(),
            }),
        }
    }

    /// Issues the first fetch. Returns `false` without doing anything unless the
    /// stream is `Idle`.
    pub fn start(&self) -> bool {
        {
            let mut stream = self.inner.lock();
            if stream.state != StreamState::Idle {
                debug!(source = %stream.source, state = ?stream.state, "start ignored");
                return false;
            }
            stream.state = StreamState::Polling;
        }
        self.spawn_poll();
        true
    }

    /// Resumes a `Failed` stream from its current offset. Returns `false` in any
    /// other state.
    pub fn retry(&self) -> bool {
        {
            let mut stream = self.inner.lock();
            if stream.state != StreamState::Failed {
                debug!(source = %stream.source, state = ?stream.state, "retry ignored");
                return false;
            }
            stream.last_error = None;
            stream.state = StreamState::Polling;
            info!(source = %stream.source, offset = stream.offset, "retrying console stream");
        }
        self.spawn_poll();
        true
    }

    /// Stops the stream for good. Pending delays are abandoned and a fetch still in
    /// flight has its result discarded. Finished and cancelled streams are left as is.
    pub fn cancel(&self) {
        let mut stream = self.inner.lock();
        if stream.state.is_terminal() {
            return;
        }
        debug!(source = %stream.source, state = ?stream.state, "cancelling console stream");
        stream.state = StreamState::Cancelled;
        self.inner.cancel.cancel();
    }

    pub fn snapshot(&self) -> LogStream {
        self.inner.lock().clone()
    }

    pub fn state(&self) -> StreamState {
        self.inner.lock().state
    }

    fn spawn_poll(&self) {
        let inner = Arc::clone(&self.inner);
        tokio::spawn(async move { inner.poll_loop().await });
    }
}

impl<S: TextSource, K: LogSink> Inner<S, K> {
    fn lock(&self) -> MutexGuard<'_, LogStream> {
        self.stream.lock().unwrap_or_else(PoisonError::into_inner)
    }

    async fn poll_loop(&self) {
        loop {
            let (source, offset) = {
                let stream = self.lock();
                if stream.state != StreamState::Polling || self.cancel.is_cancelled() {
                    return;
                }
                (stream.source.clone(), stream.offset)
            };

            debug!(%source, offset, "fetching console chunk");
            let result = self.source.fetch(&source, offset).await;

            {
                let mut stream = self.lock();
                if stream.state != StreamState::Polling {
                    debug!(%source, state = ?stream.state, "dropping result of stale fetch");
                    return;
                }
                let keep_going = match result {
                    Ok(chunk) => self.on_chunk_received(&mut stream, chunk),
                    Err(error) => {
                        self.on_fetch_failed(&mut stream, error);
                        false
                    }
                };
                if !keep_going {
                    return;
                }
            }

            tokio::select! {
                _ = self.cancel.cancelled() => return,
                _ = tokio::time::sleep(self.poll_interval) => {}
            }

            let mut stream = self.lock();
            if stream.state != StreamState::Scheduled {
                return;
            }
            stream.state = StreamState::Polling;
        }
    }

    /// Applies a chunk; returns whether another fetch has been scheduled.
    fn on_chunk_received(&self, stream: &mut LogStream, chunk: LogChunk) -> bool {
        let text = decode_utf8(&mut stream.carry, &chunk.bytes, !chunk.has_more);
        stream.buffer.push_str(&text);
        if chunk.next_offset < stream.offset {
            warn!(
                source = %stream.source,
                offset = stream.offset,
                reported = chunk.next_offset,
                "source reported a smaller offset; keeping current position"
            );
        } else {
            stream.offset = chunk.next_offset;
        }
        self.sink.append(&text);

        if chunk.has_more {
            stream.state = StreamState::Scheduled;
            true
        } else {
            stream.state = StreamState::Finished;
            info!(source = %stream.source, bytes = stream.offset, "console stream finished");
            self.sink.finished();
            false
        }
    }

    fn on_fetch_failed(&self, stream: &mut LogStream, error: FetchError) {
        if error.is_protocol() {
            warn!(source = %stream.source, offset = stream.offset, %error, "source broke the progressive text contract");
        } else {
            info!(source = %stream.source, offset = stream.offset, %error, "console fetch failed");
        }
        stream.state = StreamState::Failed;
        self.sink.failed(&error);
        stream.last_error = Some(Arc::new(error));
    }
}

/// Decodes `carry` followed by `bytes`. An incomplete sequence at the end is left in
/// `carry` for the next call unless `last` is set; invalid bytes become U+FFFD.
fn decode_utf8(carry: &mut Vec<u8>, bytes: &[u8], last: bool) -> String {
    carry.extend_from_slice(bytes);
    let mut text = String::with_capacity(carry.len());
    let mut rest: &[u8] = carry.as_slice();
    while !rest.is_empty() {
        match std::str::from_utf8(rest) {
            Ok(valid) => {
                text.push_str(valid);
                rest = &[];
            }
            Err(e) => {
                let (valid, after) = rest.split_at(e.valid_up_to());
                text.push_str(&String::from_utf8_lossy(valid));
                match e.error_len() {
                    Some(len) => {
                        text.push(char::REPLACEMENT_CHARACTER);
                        rest = &after[len..];
                    }
                    None if last => {
                        text.push(char::REPLACEMENT_CHARACTER);
                        rest = &[];
                    }
                    None => {
                        rest = after;
                        break;
                    }
                }
            }
        }
    }
    let pending = rest.to_vec();
    *carry = pending;
    text
}
