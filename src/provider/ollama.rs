//! Local generate-style backend (Ollama `/api/generate`).
//!
//! The response body is newline-delimited JSON, one object per line:
//! ```text
//! {"response":"Hel","done":false}
//! {"response":"lo","done":false}
//! {"response":"","context":[7,8],"done":true}
//! ```
//! Lines that do not parse are skipped; keep-alive blank lines are common.

use super::stream::{self, Frame, LineDecoder};
use super::{
    endpoint, read_model, write_model, ChatRequest, Context, Model, ModelCache, Provider,
    ProviderError, ProviderFuture, StreamError,
};
use crate::bus::{BusConnector, EventSink};
use reqwest::header::{HeaderValue, CONTENT_TYPE};
use serde::{Deserialize, Serialize};
use std::str::Utf8Error;
use std::sync::{Mutex, PoisonError, RwLock};
use std::time::Duration;

pub const DEFAULT_BASE_URL: &str = "http://localhost:11434";
pub const DEFAULT_MODEL: &str = "llama3.2";

/// Base URL for an `OLLAMA_HOST`-style value, which may omit the scheme
/// (`0.0.0.0:11434`).
pub fn base_url_from_host(host: &str) -> String {
    let host = host.trim().trim_end_matches('/');
    if host.contains("://") {
        host.to_string()
    } else {
        format!("http://{host}")
    }
}

#[derive(Debug)]
pub struct OllamaProvider {
    http: reqwest::Client,
    base_url: String,
    model: RwLock<String>,
    /// Token context returned by the last completed turn.
    context: Mutex<Vec<i64>>,
    models: ModelCache,
}

impl OllamaProvider {
    pub fn new(http: reqwest::Client, model: impl Into<String>, cache_ttl: Duration) -> Self {
        Self {
            http,
            base_url: DEFAULT_BASE_URL.to_string(),
            model: RwLock::new(model.into()),
            context: Mutex::new(Vec::new()),
            models: ModelCache::new(cache_ttl),
        }
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    /// Token context that the next turn will send.
    pub fn context(&self) -> Vec<i64> {
        self.context
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    fn outbound_context(&self, request: &ChatRequest) -> Option<Vec<i64>> {
        let stored = self.context();
        if !stored.is_empty() {
            return Some(stored);
        }
        match &request.context {
            Some(Context::Tokens(tokens)) if !tokens.is_empty() => Some(tokens.clone()),
            Some(Context::Messages(_)) => {
                tracing::warn!("ignoring message context on a generate-style provider");
                None
            }
            _ => None,
        }
    }

    async fn stream_turn(
        &self,
        request: &ChatRequest,
        sink: &EventSink,
    ) -> Result<Option<Context>, ProviderError> {
        let context = self.outbound_context(request);
        let body = GenerateRequest {
            model: &request.model,
            prompt: &request.prompt,
            stream: request.stream,
            context: context.as_deref(),
        };
        let payload = serde_json::to_vec(&body).map_err(ProviderError::Serialize)?;
        tracing::debug!(
            model = %request.model,
            context_len = context.as_ref().map_or(0, Vec::len),
            "sending generate request"
        );

        let resp = self
            .http
            .post(endpoint(&self.base_url, "api/generate"))
            .header(CONTENT_TYPE, HeaderValue::from_static("application/json"))
            .body(payload)
            .send()
            .await?;
        let resp = stream::check_status(resp).await?;

        let mut decoder = GenerateDecoder;
        let done = stream::pump(resp.bytes_stream(), &mut decoder, sink).await?;

        let tokens = match done {
            Some(Context::Tokens(tokens)) => tokens,
            _ => Vec::new(),
        };
        *self.context.lock().unwrap_or_else(PoisonError::into_inner) = tokens.clone();
        Ok(Some(Context::Tokens(tokens)))
    }
}

impl Provider for OllamaProvider {
    fn generate_request(&self, prompt: &str) -> ChatRequest {
        ChatRequest {
            model: read_model(&self.model),
            prompt: prompt.to_string(),
            stream: true,
            context: None,
        }
    }

    fn chat(&self, conn: BusConnector) -> ProviderFuture<'_, ()> {
        Box::pin(async move {
            let BusConnector {
                cancel,
                request,
                events,
            } = conn;

            let outcome = tokio::select! {
                _ = cancel.cancelled() => Err(StreamError::Cancelled.into()),
                res = self.stream_turn(&request, &events) => res,
            };
            events.finish(outcome).await;
        })
    }

    fn retrieve_models(&self) -> ProviderFuture<'_, Result<Vec<Model>, ProviderError>> {
        Box::pin(async move {
            if !self.models.is_stale() {
                return Ok(self.models.retrieve());
            }

            let resp = self
                .http
                .get(endpoint(&self.base_url, "api/tags"))
                .send()
                .await?;
            let tags: TagsResponse = stream::check_status(resp).await?.json().await?;
            let models: Vec<Model> = tags.models.into_iter().map(|m| Model::named(m.name)).collect();

            if let Err(e) = self.models.stash(models.clone()) {
                tracing::warn!(error = %e, "failed to cache models");
            }
            Ok(models)
        })
    }

    fn set_model(&self, name: &str) {
        write_model(&self.model, name);
    }
}

#[derive(Debug, Serialize)]
struct GenerateRequest<'a> {
    model: &'a str,
    prompt: &'a str,
    stream: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    context: Option<&'a [i64]>,
}

#[derive(Debug, Deserialize)]
struct GenerateChunk {
    #[serde(default)]
    response: String,
    #[serde(default)]
    context: Option<Vec<i64>>,
    #[serde(default)]
    done: bool,
}

#[derive(Debug, Deserialize)]
struct TagsResponse {
    #[serde(default)]
    models: Vec<TagModel>,
}

#[derive(Debug, Deserialize)]
struct TagModel {
    name: String,
}

/// Decoder for generate-style NDJSON.
#[derive(Debug, Default)]
pub struct GenerateDecoder;

impl LineDecoder for GenerateDecoder {
    fn decode(&mut self, line: &str) -> Result<Vec<Frame>, ProviderError> {
        let chunk: GenerateChunk = match serde_json::from_str(line) {
            Ok(chunk) => chunk,
            Err(e) => {
                if !line.trim().is_empty() {
                    tracing::trace!(error = %e, "skipping unparseable line");
                }
                return Ok(Vec::new());
            }
        };

        let mut frames = Vec::new();
        if !chunk.response.is_empty() {
            frames.push(Frame::Content(chunk.response));
        }
        if chunk.done {
            frames.push(Frame::Done(chunk.context.map(Context::Tokens)));
        }
        Ok(frames)
    }

    fn invalid_utf8(&mut self, err: Utf8Error) -> Result<(), ProviderError> {
        tracing::trace!(error = %err, "skipping non-UTF-8 line");
        Ok(())
    }
}
