use thiserror::Error;

/// Errors raised by providers, either at construction or during a turn.
#[derive(Debug, Error)]
pub enum ProviderError {
    #[error("{0} is required")]
    MissingApiKey(&'static str),

    #[error("invalid API key header value")]
    InvalidApiKey,

    #[error("http request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("API returned HTTP {status}: {body}")]
    Status {
        status: reqwest::StatusCode,
        body: String,
    },

    #[error("failed to serialize request: {0}")]
    Serialize(#[source] serde_json::Error),

    #[error("failed to decode stream payload: {0}")]
    Decode(#[source] serde_json::Error),

    #[error("stream line is not valid UTF-8: {0}")]
    Utf8(#[from] std::str::Utf8Error),

    #[error("upstream error: {0}")]
    Upstream(String),

    #[error(transparent)]
    Stream(#[from] StreamError),
}

/// Ways a turn can end without a completion marker.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum StreamError {
    #[error("stream ended before the backend signalled completion")]
    Incomplete,

    #[error("turn was cancelled")]
    Cancelled,
}

/// Model cache failures; logged by callers, never fatal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum CacheError {
    #[error("model cache lock is poisoned")]
    Poisoned,
}
