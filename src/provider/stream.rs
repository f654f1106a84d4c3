//! Line framing shared by the streaming backends.
//!
//! Response bodies arrive as arbitrary byte chunks. [`LineBuffer`] reassembles
//! them into lines, a backend-specific [`LineDecoder`] turns each line into
//! [`Frame`]s, and [`pump`] drives both until the decoder reports completion.

use super::{Context, ProviderError, StreamError};
use crate::bus::EventSink;
use futures_core::Stream;
use memchr::memchr;
use std::str::Utf8Error;
use tokio_stream::StreamExt;

/// What a decoded line means for the turn.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Frame {
    Content(String),
    /// The backend finished the turn, possibly returning fresh context.
    Done(Option<Context>),
}

pub trait LineDecoder {
    /// Decode one line (without its terminator).
    fn decode(&mut self, line: &str) -> Result<Vec<Frame>, ProviderError>;

    /// Called for a line that is not valid UTF-8.
    fn invalid_utf8(&mut self, err: Utf8Error) -> Result<(), ProviderError> {
        Err(ProviderError::Utf8(err))
    }
}

/// Splits a byte stream on `\n`, dropping a trailing `\r`.
#[derive(Debug, Default)]
pub struct LineBuffer {
    buf: Vec<u8>,
}

impl LineBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append `chunk` and return every line it completed.
    pub fn push(&mut self, chunk: &[u8]) -> Vec<Result<String, Utf8Error>> {
        self.buf.extend_from_slice(chunk);
        let mut out = Vec::new();

        while let Some(pos) = memchr(b'\n', &self.buf) {
            let mut line = self.buf.drain(..=pos).collect::<Vec<u8>>();
            line.pop();
            if line.ends_with(b"\r") {
                line.pop();
            }
            out.push(decode_utf8(line));
        }

        out
    }

    /// Whatever is left once the body is exhausted, if anything.
    pub fn finish(&mut self) -> Option<Result<String, Utf8Error>> {
        if self.buf.is_empty() {
            return None;
        }
        let mut line = std::mem::take(&mut self.buf);
        if line.ends_with(b"\r") {
            line.pop();
        }
        Some(decode_utf8(line))
    }
}

fn decode_utf8(line: Vec<u8>) -> Result<String, Utf8Error> {
    String::from_utf8(line).map_err(|e| e.utf8_error())
}

/// Feed `body` through `decoder`, forwarding content to `sink`.
///
/// Returns the context carried by the terminal frame. Lines after the
/// terminal frame are never read. A body that ends without one is an
/// [`StreamError::Incomplete`] error.
pub async fn pump<S, B, D>(
    body: S,
    decoder: &mut D,
    sink: &EventSink,
) -> Result<Option<Context>, ProviderError>
where
    S: Stream<Item = Result<B, reqwest::Error>>,
    B: AsRef<[u8]>,
    D: LineDecoder,
{
    let mut body = std::pin::pin!(body);
    let mut lines = LineBuffer::new();

    while let Some(chunk) = body.next().await {
        let chunk = chunk?;
        for line in lines.push(chunk.as_ref()) {
            if let Some(done) = feed(decoder, line, sink).await? {
                return Ok(done);
            }
        }
    }

    if let Some(line) = lines.finish() {
        if let Some(done) = feed(decoder, line, sink).await? {
            return Ok(done);
        }
    }

    Err(StreamError::Incomplete.into())
}

async fn feed<D: LineDecoder>(
    decoder: &mut D,
    line: Result<String, Utf8Error>,
    sink: &EventSink,
) -> Result<Option<Option<Context>>, ProviderError> {
    let line = match line {
        Ok(line) => line,
        Err(e) => {
            decoder.invalid_utf8(e)?;
            return Ok(None);
        }
    };

    for frame in decoder.decode(&line)? {
        match frame {
            Frame::Content(text) => sink.content(text).await,
            Frame::Done(context) => return Ok(Some(context)),
        }
    }
    Ok(None)
}

/// Turn a non-2xx response into [`ProviderError::Status`].
pub async fn check_status(resp: reqwest::Response) -> Result<reqwest::Response, ProviderError> {
    let status = resp.status();
    if status.is_success() {
        return Ok(resp);
    }
    let body = resp.text().await.unwrap_or_default();
    Err(ProviderError::Status { status, body })
}
