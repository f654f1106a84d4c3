use super::{
    read_model, write_model, ChatRequest, Context, Model, Provider, ProviderError,
    ProviderFuture, StreamError,
};
use crate::bus::{BusConnector, EventSink};
use std::sync::{Mutex, PoisonError, RwLock};
use std::time::Duration;

pub const DEFAULT_MODEL: &str = "stub";

/// Offline provider that echoes the prompt back in a few chunks.
///
/// Its context is a single token counting completed turns.
#[derive(Debug)]
pub struct StubProvider {
    model: RwLock<String>,
    turns: Mutex<i64>,
    delay: Duration,
}

impl Default for StubProvider {
    fn default() -> Self {
        Self::new(Duration::from_millis(120))
    }
}

impl StubProvider {
    pub fn new(delay: Duration) -> Self {
        Self {
            model: RwLock::new(DEFAULT_MODEL.to_string()),
            turns: Mutex::new(0),
            delay,
        }
    }

    async fn echo(
        &self,
        request: &ChatRequest,
        events: &EventSink,
    ) -> Result<Option<Context>, ProviderError> {
        let parts = [
            format!("[{}] ", request.model),
            "You said: ".to_string(),
            request.prompt.clone(),
        ];
        for part in parts {
            tokio::time::sleep(self.delay).await;
            events.content(part).await;
        }

        let mut turns = self.turns.lock().unwrap_or_else(PoisonError::into_inner);
        *turns += 1;
        Ok(Some(Context::Tokens(vec![*turns])))
    }
}

impl Provider for StubProvider {
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
                res = self.echo(&request, &events) => res,
            };
            events.finish(outcome).await;
        })
    }

    fn retrieve_models(&self) -> ProviderFuture<'_, Result<Vec<Model>, ProviderError>> {
        Box::pin(async move { Ok(vec![Model::named(DEFAULT_MODEL)]) })
    }

    fn set_model(&self, name: &str) {
        write_model(&self.model, name);
    }
}
