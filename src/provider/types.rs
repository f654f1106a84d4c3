use super::ProviderError;
use crate::bus::BusConnector;
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::pin::Pin;

/// Boxed future returned by [`Provider`] methods.
pub type ProviderFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChatRequest {
    pub model: String,
    pub prompt: String,
    pub stream: bool,

    /// Context returned by an earlier turn of the same provider instance.
    pub context: Option<Context>,
}

/// Backend-specific conversational state carried between turns.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Context {
    /// Token ids returned by a generate-style backend.
    Tokens(Vec<i64>),
    /// Prior turns for a chat-completions backend.
    Messages(Vec<Message>),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    pub role: Role,
    pub content: String,
}

impl Message {
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            content: content.into(),
        }
    }
}

/// One unit delivered to the consumer while a turn streams.
///
/// Exactly one chunk per turn has `done` set, and it is the last one. The
/// final chunk carries the updated context, or `error` when the turn failed.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ChatResponseChunk {
    pub text: String,
    pub context: Option<Context>,
    pub done: bool,
    pub error: Option<String>,
}

impl ChatResponseChunk {
    pub fn content(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            ..Self::default()
        }
    }

    pub fn completed(context: Option<Context>) -> Self {
        Self {
            context,
            done: true,
            ..Self::default()
        }
    }

    pub fn failed(error: impl Into<String>) -> Self {
        Self {
            done: true,
            error: Some(error.into()),
            ..Self::default()
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Model {
    pub name: String,
    #[serde(default)]
    pub modalities: Vec<String>,
}

impl Model {
    pub fn named(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            modalities: Vec::new(),
        }
    }
}

/// A streaming LLM backend.
///
/// Each implementation owns its conversational context and its model cache.
/// A `chat` call emits zero or more content events followed by exactly one
/// terminal event on the connector's sink.
pub trait Provider: Send + Sync {
    /// Build a request for `prompt` against the currently selected model.
    fn generate_request(&self, prompt: &str) -> ChatRequest;

    /// Run one turn.
    fn chat(&self, conn: BusConnector) -> ProviderFuture<'_, ()>;

    /// List selectable models, served from the cache while it is fresh.
    fn retrieve_models(&self) -> ProviderFuture<'_, Result<Vec<Model>, ProviderError>>;

    /// Select the model used by later `generate_request` calls.
    fn set_model(&self, name: &str);
}
