//! Chat orchestration.
//!
//! The [`Bus`] sits between a provider and a consumer. `run_chat` drives one
//! turn through the [`ProviderService`]; `start` is the long-running dispatch
//! loop that turns provider events into [`ChatResponseChunk`]s on the
//! consumer's channel. Each turn ends with exactly one `done` chunk, whether
//! it completed or failed, and the loop stays live for the next turn.

mod events;

pub use events::{BusConnector, EventSink, TurnEvent, EVENT_BUFFER};

use crate::provider::{ChatRequest, ChatResponseChunk, ProviderService};
use std::sync::{Arc, Mutex, PoisonError};
use thiserror::Error;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

#[derive(Debug, Error)]
pub enum BusError {
    #[error("dispatch loop is already running")]
    AlreadyStarted,
}

pub struct Bus {
    service: Arc<ProviderService>,
    events_tx: mpsc::Sender<TurnEvent>,
    events_rx: Mutex<Option<mpsc::Receiver<TurnEvent>>>,
}

impl Bus {
    pub fn new(service: Arc<ProviderService>) -> Self {
        let (events_tx, events_rx) = mpsc::channel(EVENT_BUFFER);
        Self {
            service,
            events_tx,
            events_rx: Mutex::new(Some(events_rx)),
        }
    }

    pub fn service(&self) -> &Arc<ProviderService> {
        &self.service
    }

    /// Run one turn to completion. Failures are reported through the event
    /// channel, never returned here.
    ///
    /// Suspends while the consumer is behind, and while another turn holds
    /// the provider.
    pub async fn run_chat(&self, request: ChatRequest) {
        tracing::debug!(model = %request.model, "starting turn");
        let events = EventSink::new(self.events_tx.clone());
        let conn = BusConnector::new(CancellationToken::new(), request, events);
        self.service.chat(conn).await;
    }

    /// Cancel the turn that is currently streaming.
    pub fn cancel_turn(&self) {
        self.service.cancel_running();
    }

    /// Forward turn events to `outbound` until the consumer hangs up.
    pub async fn start(&self, outbound: mpsc::Sender<ChatResponseChunk>) -> Result<(), BusError> {
        let mut events = self
            .events_rx
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
            .ok_or(BusError::AlreadyStarted)?;

        loop {
            let event = tokio::select! {
                event = events.recv() => event,
                _ = outbound.closed() => None,
            };
            let Some(event) = event else {
                tracing::debug!("consumer closed; dispatch loop exiting");
                return Ok(());
            };

            let chunk = match event {
                TurnEvent::Content(text) => ChatResponseChunk::content(text),
                TurnEvent::Completed(context) => ChatResponseChunk::completed(context),
                TurnEvent::Failed(err) => {
                    tracing::error!(error = %err, "turn failed");
                    ChatResponseChunk::failed(err.to_string())
                }
            };

            if outbound.send(chunk).await.is_err() {
                tracing::debug!("consumer closed; dispatch loop exiting");
                return Ok(());
            }
        }
    }
}
