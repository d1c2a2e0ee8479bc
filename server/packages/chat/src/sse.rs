//! Server-sent-event transport for chat-completion streams.
//!
//! A response body of `data: <json>` lines is turned into a lazy stream of
//! text increments. The stream ends at `data: [DONE]` or when the body
//! closes. Fragments that are not valid JSON are skipped.

use std::collections::VecDeque;
use std::fmt::Display;
use std::pin::Pin;

use bytes::Bytes;
use futures::{stream, Stream, StreamExt};
use playground_error::PlaygroundError;

use crate::types::ChatCompletionChunk;

pub const DONE_MARKER: &str = "[DONE]";

pub type TextStream = Pin<Box<dyn Stream<Item = Result<String, PlaygroundError>> + Send>>;

/// Splits a byte stream into complete lines. Bytes are buffered until a
/// newline arrives so multi-byte characters and lines may straddle chunks.
#[derive(Debug, Default)]
pub(crate) struct LineBuffer {
    buffer: Vec<u8>,
}

impl LineBuffer {
    pub(crate) fn push(&mut self, chunk: &[u8]) -> Vec<String> {
        self.buffer.extend_from_slice(chunk);
        let mut lines = Vec::new();
        while let Some(pos) = self.buffer.iter().position(|byte| *byte == b'\n') {
            let raw: Vec<u8> = self.buffer.drain(..=pos).collect();
            lines.push(decode_line(&raw[..raw.len() - 1]));
        }
        lines
    }

    /// Returns the trailing unterminated line, if any.
    pub(crate) fn finish(&mut self) -> Option<String> {
        if self.buffer.is_empty() {
            return None;
        }
        let raw = std::mem::take(&mut self.buffer);
        Some(decode_line(&raw))
    }
}

fn decode_line(raw: &[u8]) -> String {
    let mut line = String::from_utf8_lossy(raw).into_owned();
    if line.ends_with('\r') {
        line.pop();
    }
    line
}

/// Yields the payload of every `data:` line. Each line is one payload;
/// blank separators, comments and other fields are ignored.
#[derive(Debug, Default)]
pub struct DataLines {
    lines: LineBuffer,
}

impl DataLines {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, chunk: &[u8]) -> Vec<String> {
        self.lines.push(chunk).into_iter().filter_map(data_payload).collect()
    }

    /// Flushes the trailing unterminated line once the body has closed.
    pub fn finish(&mut self) -> Vec<String> {
        self.lines.finish().into_iter().filter_map(data_payload).collect()
    }
}

fn data_payload(line: String) -> Option<String> {
    line.strip_prefix("data:")
        .map(|data| data.trim_start().to_string())
}

/// Fails with [`PlaygroundError::Api`] on a non-2xx response.
pub async fn ensure_success(response: reqwest::Response) -> Result<reqwest::Response, PlaygroundError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let body = response.text().await.unwrap_or_default();
    Err(PlaygroundError::Api {
        status: Some(status.as_u16()),
        message: format!("API request failed: {status} - {body}"),
    })
}

/// Turns a chat-completion streaming response into text increments.
pub async fn text_deltas(response: reqwest::Response) -> Result<TextStream, PlaygroundError> {
    let response = ensure_success(response).await?;
    Ok(delta_stream(response.bytes_stream()))
}

struct DeltaState {
    bytes: Pin<Box<dyn Stream<Item = Result<Bytes, String>> + Send>>,
    data: DataLines,
    pending: VecDeque<String>,
    finished: bool,
}

impl DeltaState {
    /// Queues the deltas of `payloads`; returns true once the end marker is seen.
    fn absorb(&mut self, payloads: Vec<String>) -> bool {
        for payload in payloads {
            if payload.trim() == DONE_MARKER {
                return true;
            }
            match serde_json::from_str::<ChatCompletionChunk>(&payload) {
                Ok(chunk) => {
                    if let Some(delta) = chunk.content_delta() {
                        self.pending.push_back(delta.to_string());
                    }
                }
                Err(err) => {
                    tracing::debug!(error = %err, "skipping malformed stream fragment");
                }
            }
        }
        false
    }
}

/// Builds the text stream over any body byte stream.
pub fn delta_stream<S, E>(bytes: S) -> TextStream
where
    S: Stream<Item = Result<Bytes, E>> + Send + 'static,
    E: Display,
{
    let state = DeltaState {
        bytes: Box::pin(bytes.map(|chunk| chunk.map_err(|err| err.to_string()))),
        data: DataLines::new(),
        pending: VecDeque::new(),
        finished: false,
    };

    Box::pin(stream::unfold(state, |mut state| async move {
        loop {
            if let Some(delta) = state.pending.pop_front() {
                return Some((Ok(delta), state));
            }
            if state.finished {
                return None;
            }
            match state.bytes.next().await {
                Some(Ok(chunk)) => {
                    let payloads = state.data.push(&chunk);
                    state.finished = state.absorb(payloads);
                }
                Some(Err(message)) => {
                    state.finished = true;
                    state.pending.clear();
                    return Some((Err(PlaygroundError::Stream { message }), state));
                }
                None => {
                    let payloads = state.data.finish();
                    state.absorb(payloads);
                    state.finished = true;
                }
            }
        }
    }))
}
