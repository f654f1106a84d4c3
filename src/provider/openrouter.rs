//! Hosted chat-completions backend (OpenRouter).
//!
//! Streams server-sent events. Only `data:` lines matter; `data: [DONE]`
//! ends the turn. Each payload carries an incremental delta in
//! `choices[0].delta.content`.

use super::stream::{self, Frame, LineDecoder};
use super::{
    endpoint, read_model, write_model, ChatRequest, Context, Message, Model, ModelCache,
    Provider, ProviderError, ProviderFuture, StreamError,
};
use crate::bus::{BusConnector, EventSink};
use reqwest::header::{HeaderValue, AUTHORIZATION, CONTENT_TYPE};
use serde::{Deserialize, Serialize};
use std::sync::{Mutex, PoisonError, RwLock};
use std::time::Duration;

pub const DEFAULT_BASE_URL: &str = "https://openrouter.ai/api/v1";
pub const DEFAULT_MODEL: &str = "x-ai/grok-4-fast:free";
pub const API_KEY_ENV: &str = "OPENROUTER_API_KEY";

/// Upper bound for a whole streaming call, body included.
const REQUEST_TIMEOUT: Duration = Duration::from_secs(60);

#[derive(Debug)]
pub struct OpenRouterProvider {
    http: reqwest::Client,
    base_url: String,
    auth: HeaderValue,
    model: RwLock<String>,
    /// Completed user/assistant turns, oldest first.
    history: Mutex<Vec<Message>>,
    models: ModelCache,
}

impl OpenRouterProvider {
    /// Fails when no API key is available; this is not deferred to the
    /// first call.
    pub fn new(
        http: reqwest::Client,
        api_key: Option<String>,
        model: impl Into<String>,
        cache_ttl: Duration,
    ) -> Result<Self, ProviderError> {
        let key = api_key
            .filter(|k| !k.trim().is_empty())
            .ok_or(ProviderError::MissingApiKey(API_KEY_ENV))?;
        let mut auth = HeaderValue::from_str(&format!("Bearer {}", key.trim()))
            .map_err(|_| ProviderError::InvalidApiKey)?;
        auth.set_sensitive(true);

        Ok(Self {
            http,
            base_url: DEFAULT_BASE_URL.to_string(),
            auth,
            model: RwLock::new(model.into()),
            history: Mutex::new(Vec::new()),
            models: ModelCache::new(cache_ttl),
        })
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    /// Messages that will be replayed ahead of the next prompt.
    pub fn history(&self) -> Vec<Message> {
        self.history
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    fn prior_messages(&self, request: &ChatRequest) -> Vec<Message> {
        let stored = self.history();
        if !stored.is_empty() {
            return stored;
        }
        match &request.context {
            Some(Context::Messages(messages)) => messages.clone(),
            Some(Context::Tokens(_)) => {
                tracing::warn!("ignoring token context on a chat-completions provider");
                Vec::new()
            }
            None => Vec::new(),
        }
    }

    async fn stream_turn(
        &self,
        request: &ChatRequest,
        sink: &EventSink,
    ) -> Result<Option<Context>, ProviderError> {
        let prompt = Message::user(request.prompt.clone());
        let prior = self.prior_messages(request);
        let mut messages = prior.clone();
        messages.push(prompt.clone());

        let body = CompletionRequest {
            model: &request.model,
            messages: &messages,
            stream: request.stream,
        };
        let payload = serde_json::to_vec(&body).map_err(ProviderError::Serialize)?;
        tracing::debug!(model = %request.model, messages = messages.len(), "sending chat completion request");

        let resp = self
            .http
            .post(endpoint(&self.base_url, "chat/completions"))
            .header(CONTENT_TYPE, HeaderValue::from_static("application/json"))
            .header(AUTHORIZATION, self.auth.clone())
            .timeout(REQUEST_TIMEOUT)
            .body(payload)
            .send()
            .await?;
        let resp = stream::check_status(resp).await?;

        let mut decoder = SseDecoder::default();
        stream::pump(resp.bytes_stream(), &mut decoder, sink).await?;

        let mut history = self.history.lock().unwrap_or_else(PoisonError::into_inner);
        if history.is_empty() {
            // Seed from caller-supplied context so the next turn stays coherent.
            history.extend(prior);
        }
        history.push(prompt);
        history.push(Message::assistant(decoder.into_reply()));
        tracing::debug!(messages = history.len(), "finished chat stream");
        Ok(Some(Context::Messages(history.clone())))
    }
}

impl Provider for OpenRouterProvider {
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
                .get(endpoint(&self.base_url, "models"))
                .header(AUTHORIZATION, self.auth.clone())
                .timeout(REQUEST_TIMEOUT)
                .send()
                .await?;
            let listing: ModelsResponse = stream::check_status(resp).await?.json().await?;
            let models: Vec<Model> = listing
                .data
                .into_iter()
                .map(|m| Model {
                    name: m.id,
                    modalities: m.architecture.map(|a| a.input_modalities).unwrap_or_default(),
                })
                .collect();

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
struct CompletionRequest<'a> {
    model: &'a str,
    messages: &'a [Message],
    stream: bool,
}

#[derive(Debug, Deserialize)]
struct StreamChunk {
    #[serde(default)]
    choices: Vec<Choice>,
    #[serde(default)]
    error: Option<UpstreamError>,
}

#[derive(Debug, Deserialize)]
struct Choice {
    #[serde(default)]
    delta: Delta,
}

#[derive(Debug, Default, Deserialize)]
struct Delta {
    #[serde(default)]
    content: Option<String>,
}

#[derive(Debug, Deserialize)]
struct UpstreamError {
    #[serde(default)]
    message: String,
}

#[derive(Debug, Deserialize)]
struct ModelsResponse {
    #[serde(default)]
    data: Vec<ListedModel>,
}

#[derive(Debug, Deserialize)]
struct ListedModel {
    id: String,
    #[serde(default)]
    architecture: Option<Architecture>,
}

#[derive(Debug, Deserialize)]
struct Architecture {
    #[serde(default)]
    input_modalities: Vec<String>,
}

/// Decoder for chat-completions SSE. Accumulates the assistant reply.
#[derive(Debug, Default)]
pub struct SseDecoder {
    reply: String,
}

impl SseDecoder {
    pub fn into_reply(self) -> String {
        self.reply
    }
}

impl LineDecoder for SseDecoder {
    fn decode(&mut self, line: &str) -> Result<Vec<Frame>, ProviderError> {
        // Comments (": OPENROUTER PROCESSING"), event:/id: fields and blank
        // separators carry nothing for us.
        let Some(data) = line.strip_prefix("data:") else {
            return Ok(Vec::new());
        };
        let data = data.strip_prefix(' ').unwrap_or(data);

        if data == "[DONE]" {
            return Ok(vec![Frame::Done(None)]);
        }
        if data.trim().is_empty() {
            return Ok(Vec::new());
        }

        let chunk: StreamChunk = serde_json::from_str(data).map_err(ProviderError::Decode)?;
        if let Some(err) = chunk.error {
            return Err(ProviderError::Upstream(err.message));
        }

        let Some(choice) = chunk.choices.into_iter().next() else {
            return Ok(vec![Frame::Done(None)]);
        };
        match choice.delta.content {
            Some(text) if !text.is_empty() => {
                self.reply.push_str(&text);
                Ok(vec![Frame::Content(text)])
            }
            _ => Ok(Vec::new()),
        }
    }
}
