//! Log ingestion layer: the seam between the streamer and wherever console text comes from.
//!
//! The streamer depends on the `TextSource` abstraction rather than on HTTP directly, so the
//! poll loop can be driven by the Jenkins client in production and by scripted sources in tests.

use std::sync::Arc;

use async_trait::async_trait;
use reqwest::header::HeaderMap;
use tracing::trace;
use url::Url;

use crate::error::FetchError;
use crate::server::{Credentials, ServerContext};

/// Total bytes the server has produced so far; the offset for the next request.
const TEXT_SIZE_HEADER: &str = "X-Text-Size";
/// Present (and `true`) while the build may still write output.
const MORE_DATA_HEADER: &str = "X-More-Data";

/// One poll result. `bytes` is raw console output: a multi-byte character may be
/// split across two chunks, so decoding is left to whoever keeps the stream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogChunk {
    pub bytes: Vec<u8>,
    pub next_offset: u64,
    pub has_more: bool,
}

/// Anything that can hand out the console text of a build from a byte offset.
#[async_trait]
pub trait TextSource: Send + Sync + 'static {
    async fn fetch(&self, source: &str, offset: u64) -> Result<LogChunk, FetchError>;
}

#[async_trait]
impl<T: TextSource + ?Sized> TextSource for Arc<T> {
    async fn fetch(&self, source: &str, offset: u64) -> Result<LogChunk, FetchError> {
        (**self).fetch(source, offset).await
    }
}

/// Jenkins `logText/progressiveText` client.
pub struct ProgressiveText {
    client: reqwest::Client,
    credentials: Option<Credentials>,
}

impl ProgressiveText {
    pub fn new(server: &ServerContext) -> Result<Self, FetchError> {
        let client = reqwest::Client::builder()
            .timeout(server.request_timeout)
            .build()?;
        Ok(Self {
            client,
            credentials: server.credentials.clone(),
        })
    }

    /// `<build>/logText/progressiveText?start=<offset>`
    pub fn endpoint(build: &str, offset: u64) -> Result<Url, FetchError> {
        let mut build = Url::parse(build)
            .map_err(|e| FetchError::Protocol(format!("invalid build URL `{build}`: {e}")))?;
        if !build.path().ends_with('/') {
            let path = format!("{}/", build.path());
            build.set_path(&path);
        }
        let mut url = build
            .join("logText/progressiveText")
            .map_err(|e| FetchError::Protocol(format!("invalid build URL: {e}")))?;
        url.query_pairs_mut().append_pair("start", &offset.to_string());
        Ok(url)
    }
}

#[async_trait]
impl TextSource for ProgressiveText {
    async fn fetch(&self, source: &str, offset: u64) -> Result<LogChunk, FetchError> {
        let url = Self::endpoint(source, offset)?;
        let mut request = self.client.get(url);
        if let Some(credentials) = &self.credentials {
            request = request.basic_auth(&credentials.username, Some(&credentials.token));
        }

        let response = request.send().await?;
        let status = response.status();
        if !status.is_success() {
            return Err(FetchError::from_status(status.as_u16()));
        }

        let (next_offset, has_more) = parse_progress(response.headers())?;
        let bytes = response.bytes().await?.to_vec();
        trace!(offset, next_offset, has_more, bytes = bytes.len(), "fetched console chunk");
        Ok(LogChunk { bytes, next_offset, has_more })
    }
}

/// Reads the offset/completion pair the progressive text endpoint reports in its headers.
fn parse_progress(headers: &HeaderMap) -> Result<(u64, bool), FetchError> {
    let size = headers
        .get(TEXT_SIZE_HEADER)
        .ok_or_else(|| FetchError::Protocol(format!("missing {TEXT_SIZE_HEADER} header")))?;
    let next_offset = size
        .to_str()
        .ok()
        .and_then(|v| v.trim().parse::<u64>().ok())
        .ok_or_else(|| FetchError::Protocol(format!("invalid {TEXT_SIZE_HEADER} value {size:?}")))?;

    let has_more = match headers.get(MORE_DATA_HEADER) {
        None => false,
        Some(value) => match value.to_str().map(|v| v.trim().to_ascii_lowercase()) {
            Ok(v) if v == "true" => true,
            Ok(v) if v == "false" => false,
            _ => {
                return Err(FetchError::Protocol(format!(
                    "invalid {MORE_DATA_HEADER} value {value:?}"
                )));
            }
        },
    };
    Ok((next_offset, has_more))
}
