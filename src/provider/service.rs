use super::{ChatRequest, Model, Provider, ProviderError};
use crate::bus::BusConnector;
use std::sync::{Arc, PoisonError};
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;

/// Holds the active provider so callers depend on the capability set, not a
/// concrete backend.
///
/// Turns are serialized: a second `chat` waits until the first one finishes,
/// so a provider's context is never read and appended by two turns at once.
pub struct ProviderService {
    provider: Arc<dyn Provider>,
    turn_gate: Mutex<()>,
    /// Token of the turn currently holding the gate.
    running: std::sync::Mutex<Option<CancellationToken>>,
}

impl ProviderService {
    pub fn new(provider: Arc<dyn Provider>) -> Self {
        Self {
            provider,
            turn_gate: Mutex::new(()),
            running: std::sync::Mutex::new(None),
        }
    }

    pub async fn chat(&self, conn: BusConnector) {
        let _turn = self.turn_gate.lock().await;
        self.set_running(Some(conn.cancel.clone()));
        self.provider.chat(conn).await;
        self.set_running(None);
    }

    /// Cancel the turn that is streaming right now. Turns still waiting for
    /// the gate are not affected.
    pub fn cancel_running(&self) {
        let running = self.running.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(token) = running.as_ref() {
            token.cancel();
        }
    }

    fn set_running(&self, token: Option<CancellationToken>) {
        *self.running.lock().unwrap_or_else(PoisonError::into_inner) = token;
    }

    pub fn generate_request(&self, prompt: &str) -> ChatRequest {
        self.provider.generate_request(prompt)
    }

    pub async fn retrieve_models(&self) -> Result<Vec<Model>, ProviderError> {
        self.provider.retrieve_models().await
    }

    pub fn set_model(&self, name: &str) {
        self.provider.set_model(name);
    }
}
