mod cache;
mod error;
mod service;
pub mod stream;
mod types;

#[cfg(feature = "ollama")]
pub mod ollama;
#[cfg(feature = "openrouter")]
pub mod openrouter;
pub mod stub;

pub use cache::ModelCache;
pub use error::{CacheError, ProviderError, StreamError};
pub use service::ProviderService;
pub use types::{
    ChatRequest, ChatResponseChunk, Context, Message, Model, Provider, ProviderFuture, Role,
};

use std::sync::{PoisonError, RwLock};

/// Default lifetime of a cached model listing.
pub const DEFAULT_MODEL_CACHE_TTL: std::time::Duration = std::time::Duration::from_secs(3600);

fn read_model(model: &RwLock<String>) -> String {
    model.read().unwrap_or_else(PoisonError::into_inner).clone()
}

fn write_model(model: &RwLock<String>, name: &str) {
    *model.write().unwrap_or_else(PoisonError::into_inner) = name.to_string();
}

#[cfg(any(feature = "ollama", feature = "openrouter"))]
fn endpoint(base_url: &str, path: &str) -> String {
    format!("{}/{}", base_url.trim_end_matches('/'), path.trim_start_matches('/'))
}
