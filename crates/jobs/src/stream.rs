//! Per-job progress streams.
//!
//! A [`ProgressSource`] opens the one-way event stream for a job and
//! yields raw event payloads (still JSON text) in arrival order. The
//! production implementation, [`SseProgressSource`], reads Server-Sent
//! Events over HTTP with [`reqwest`]. Dropping the returned stream
//! releases the underlying connection.

use std::collections::VecDeque;
use std::pin::Pin;

use async_trait::async_trait;
use futures::stream::{self, BoxStream};
use futures::{Stream, StreamExt};
use reqwest::header::ACCEPT;

use crate::sse::SseDecoder;

/// Raw event payloads of one job's progress stream.
pub type EventStream = BoxStream<'static, Result<String, StreamError>>;

/// Opens progress streams by job id.
#[async_trait]
pub trait ProgressSource: Send + Sync {
    async fn open(&self, job_id: &str) -> Result<EventStream, StreamError>;
}

/// Errors from opening or reading a progress stream.
#[derive(Debug, thiserror::Error)]
pub enum StreamError {
    /// The HTTP request itself failed (network, DNS, TLS, etc.).
    #[error("Progress stream request failed: {0}")]
    Request(#[from] reqwest::Error),

    /// The server refused the stream.
    #[error("Progress stream rejected ({status}): {body}")]
    Rejected { status: u16, body: String },

    /// The stream broke after it was opened.
    #[error("Progress stream interrupted: {0}")]
    Interrupted(String),
}

/// SSE progress streams served at `{base_url}/jobs/{job_id}/progress`.
pub struct SseProgressSource {
    client: reqwest::Client,
    base_url: String,
}

impl SseProgressSource {
    /// * `base_url` - API base, e.g. `http://host:8000/api`.
    pub fn new(base_url: impl Into<String>) -> Self {
        Self::with_client(reqwest::Client::new(), base_url)
    }

    /// Reuse an existing [`reqwest::Client`] (shares its connection pool).
    pub fn with_client(client: reqwest::Client, base_url: impl Into<String>) -> Self {
        Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
        }
    }

    pub fn stream_url(&self, job_id: &str) -> String {
        format!("{}/jobs/{}/progress", self.base_url, job_id)
    }
}

#[async_trait]
impl ProgressSource for SseProgressSource {
    async fn open(&self, job_id: &str) -> Result<EventStream, StreamError> {
        let response = self
            .client
            .get(self.stream_url(job_id))
            .header(ACCEPT, "text/event-stream")
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response
                .text()
                .await
                .unwrap_or_else(|_| "<unreadable body>".to_string());
            return Err(StreamError::Rejected {
                status: status.as_u16(),
                body,
            });
        }

        tracing::debug!(job_id, "Progress stream opened");

        let body = response
            .bytes_stream()
            .map(|chunk| chunk.map(|bytes| bytes.to_vec()).map_err(|e| e.to_string()));
        Ok(decode_sse(body))
    }
}

/// State threaded through [`decode_sse`].
struct DecodeState<S> {
    body: Pin<Box<S>>,
    decoder: SseDecoder,
    pending: VecDeque<String>,
    done: bool,
}

/// Turn a raw SSE byte stream into a stream of event data payloads.
///
/// A body error is yielded once as [`StreamError::Interrupted`] and ends
/// the stream.
pub fn decode_sse<S>(body: S) -> EventStream
where
    S: Stream<Item = Result<Vec<u8>, String>> + Send + 'static,
{
    let state = DecodeState {
        body: Box::pin(body),
        decoder: SseDecoder::new(),
        pending: VecDeque::new(),
        done: false,
    };

    stream::unfold(state, |mut st| async move {
        loop {
            if let Some(data) = st.pending.pop_front() {
                return Some((Ok(data), st));
            }
            if st.done {
                return None;
            }
            match st.body.next().await {
                Some(Ok(chunk)) => {
                    st.pending
                        .extend(st.decoder.push(&chunk).into_iter().map(|ev| ev.data));
                }
                Some(Err(e)) => {
                    st.done = true;
                    return Some((Err(StreamError::Interrupted(e)), st));
                }
                None => {
                    st.done = true;
                    st.pending.extend(st.decoder.finish().map(|ev| ev.data));
                }
            }
        }
    })
    .boxed()
}
