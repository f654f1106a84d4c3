use crate::provider::{ChatRequest, Context, ProviderError, StreamError};
use tokio::sync::mpsc::{self, error::TrySendError};
use tokio_util::sync::CancellationToken;

/// Capacity of the provider-to-bus event channel. A full channel suspends
/// the provider's decode loop until the dispatch loop catches up.
pub const EVENT_BUFFER: usize = 16;

/// Signals a provider emits while running a turn.
#[derive(Debug)]
pub enum TurnEvent {
    Content(String),
    Completed(Option<Context>),
    Failed(ProviderError),
}

/// Sending half of the turn event channel.
///
/// Terminal methods consume the sink, so a turn reports at most one of
/// completion or failure. A sink dropped without either reports
/// [`StreamError::Incomplete`].
#[derive(Debug)]
pub struct EventSink {
    tx: mpsc::Sender<TurnEvent>,
    finished: bool,
}

impl EventSink {
    pub fn new(tx: mpsc::Sender<TurnEvent>) -> Self {
        Self { tx, finished: false }
    }

    /// A sink with its own receiver, for driving a provider outside a bus.
    pub fn channel() -> (Self, mpsc::Receiver<TurnEvent>) {
        let (tx, rx) = mpsc::channel(EVENT_BUFFER);
        (Self::new(tx), rx)
    }

    /// Waits while the channel is full.
    pub async fn content(&self, text: impl Into<String>) {
        let _ = self.tx.send(TurnEvent::Content(text.into())).await;
    }

    pub async fn complete(mut self, context: Option<Context>) {
        let _ = self.tx.send(TurnEvent::Completed(context)).await;
        self.finished = true;
    }

    pub async fn fail(mut self, err: impl Into<ProviderError>) {
        let _ = self.tx.send(TurnEvent::Failed(err.into())).await;
        self.finished = true;
    }

    /// Complete or fail depending on `outcome`.
    pub async fn finish(self, outcome: Result<Option<Context>, ProviderError>) {
        match outcome {
            Ok(context) => self.complete(context).await,
            Err(err) => self.fail(err).await,
        }
    }
}

impl Drop for EventSink {
    fn drop(&mut self) {
        if self.finished {
            return;
        }
        let event = TurnEvent::Failed(StreamError::Incomplete.into());
        match self.tx.try_send(event) {
            Err(TrySendError::Full(event)) => {
                // Queue behind the pending content on the runtime instead.
                if let Ok(handle) = tokio::runtime::Handle::try_current() {
                    let tx = self.tx.clone();
                    handle.spawn(async move {
                        let _ = tx.send(event).await;
                    });
                } else {
                    tracing::warn!("turn ended without a terminal event and no runtime to report it");
                }
            }
            Ok(()) | Err(TrySendError::Closed(_)) => {}
        }
    }
}

/// Everything a provider needs for one turn. Lives only as long as the turn.
#[derive(Debug)]
pub struct BusConnector {
    pub cancel: CancellationToken,
    pub request: ChatRequest,
    pub events: EventSink,
}

impl BusConnector {
    pub fn new(cancel: CancellationToken, request: ChatRequest, events: EventSink) -> Self {
        Self {
            cancel,
            request,
            events,
        }
    }

    /// A connector wired to a private channel, with a fresh token.
    pub fn standalone(request: ChatRequest) -> (Self, mpsc::Receiver<TurnEvent>) {
        let (events, rx) = EventSink::channel();
        (Self::new(CancellationToken::new(), request, events), rx)
    }
}
