//! Dispatch loop behaviour, driven by scripted providers.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use termchat::bus::{Bus, BusConnector, BusError};
use termchat::provider::stub::StubProvider;
use termchat::provider::{
    ChatRequest, ChatResponseChunk, Context, Model, Provider, ProviderError, ProviderFuture,
    ProviderService,
};
use tokio::sync::mpsc;

/// What one scripted turn does after emitting its fragments.
enum Ending {
    Complete(Option<Context>),
    Fail(ProviderError),
    /// Return without reporting anything.
    Vanish,
}

struct Scripted {
    turns: Mutex<VecDeque<(Vec<&'static str>, Ending)>>,
}

impl Scripted {
    fn new(turns: Vec<(Vec<&'static str>, Ending)>) -> Arc<Self> {
        Arc::new(Self {
            turns: Mutex::new(turns.into()),
        })
    }
}

impl Provider for Scripted {
    fn generate_request(&self, prompt: &str) -> ChatRequest {
        ChatRequest {
            model: "scripted".into(),
            prompt: prompt.into(),
            stream: true,
            context: None,
        }
    }

    fn chat(&self, conn: BusConnector) -> ProviderFuture<'_, ()> {
        Box::pin(async move {
            let (parts, ending) = self
                .turns
                .lock()
                .unwrap()
                .pop_front()
                .expect("no scripted turn left");
            for part in parts {
                conn.events.content(part).await;
            }
            match ending {
                Ending::Complete(context) => conn.events.complete(context).await,
                Ending::Fail(err) => conn.events.fail(err).await,
                Ending::Vanish => {}
            }
        })
    }

    fn retrieve_models(&self) -> ProviderFuture<'_, Result<Vec<Model>, ProviderError>> {
        Box::pin(async { Ok(Vec::new()) })
    }

    fn set_model(&self, _name: &str) {}
}

fn spawn_bus(provider: Arc<dyn Provider>) -> (Arc<Bus>, mpsc::Receiver<ChatResponseChunk>) {
    let bus = Arc::new(Bus::new(Arc::new(ProviderService::new(provider))));
    let (tx, rx) = mpsc::channel(16);
    let dispatch = Arc::clone(&bus);
    tokio::spawn(async move { dispatch.start(tx).await });
    (bus, rx)
}

async fn next_turn(rx: &mut mpsc::Receiver<ChatResponseChunk>) -> (Vec<String>, ChatResponseChunk) {
    let mut text = Vec::new();
    loop {
        let chunk = rx.recv().await.expect("dispatch loop ended");
        if chunk.done {
            return (text, chunk);
        }
        text.push(chunk.text);
    }
}

#[tokio::test]
async fn fragments_arrive_in_order_then_one_done() {
    let provider = Scripted::new(vec![(
        vec!["a", "b", "c"],
        Ending::Complete(Some(Context::Tokens(vec![42]))),
    )]);
    let (bus, mut rx) = spawn_bus(provider.clone());

    bus.run_chat(provider.generate_request("go")).await;
    let (text, last) = next_turn(&mut rx).await;

    assert_eq!(text, vec!["a", "b", "c"]);
    assert_eq!(last, ChatResponseChunk::completed(Some(Context::Tokens(vec![42]))));
    assert!(rx.try_recv().is_err(), "nothing follows the done chunk");
}

#[tokio::test]
async fn loop_survives_a_failed_turn() {
    let provider = Scripted::new(vec![
        (vec!["par"], Ending::Fail(ProviderError::Upstream("rate limited".into()))),
        (vec!["ok"], Ending::Complete(None)),
    ]);
    let (bus, mut rx) = spawn_bus(provider.clone());

    bus.run_chat(provider.generate_request("one")).await;
    let (text, last) = next_turn(&mut rx).await;
    assert_eq!(text, vec!["par"]);
    assert_eq!(last.error.as_deref(), Some("upstream error: rate limited"));
    assert_eq!(last.context, None);

    bus.run_chat(provider.generate_request("two")).await;
    let (text, last) = next_turn(&mut rx).await;
    assert_eq!(text, vec!["ok"]);
    assert_eq!(last.error, None);
}

#[tokio::test]
async fn provider_that_never_finishes_still_ends_the_turn() {
    let provider = Scripted::new(vec![(vec!["x"], Ending::Vanish)]);
    let (bus, mut rx) = spawn_bus(provider.clone());

    bus.run_chat(provider.generate_request("go")).await;
    let (text, last) = next_turn(&mut rx).await;

    assert_eq!(text, vec!["x"]);
    assert!(last
        .error
        .as_deref()
        .is_some_and(|e| e.contains("stream ended before")));
}

#[tokio::test]
async fn cancel_turn_stops_the_active_turn() {
    let provider = Arc::new(StubProvider::new(Duration::from_millis(50)));
    let (bus, mut rx) = spawn_bus(provider.clone());

    let turn = {
        let bus = Arc::clone(&bus);
        let request = provider.generate_request("long");
        tokio::spawn(async move { bus.run_chat(request).await })
    };

    let first = rx.recv().await.expect("first fragment");
    assert_eq!(first.text, "[stub] ");
    bus.cancel_turn();

    let (_, last) = next_turn(&mut rx).await;
    assert_eq!(last.error.as_deref(), Some("turn was cancelled"));
    turn.await.unwrap();
}

#[tokio::test]
async fn cancel_reaches_the_running_turn_not_the_queued_one() {
    let provider = Arc::new(StubProvider::new(Duration::from_millis(50)));
    let (bus, mut rx) = spawn_bus(provider.clone());

    let spawn_turn = |prompt: &str| {
        let bus = Arc::clone(&bus);
        let request = provider.generate_request(prompt);
        tokio::spawn(async move { bus.run_chat(request).await })
    };

    let running = spawn_turn("A");
    let first = rx.recv().await.expect("first fragment of A");
    assert_eq!(first.text, "[stub] ");

    let queued = spawn_turn("B");
    tokio::time::sleep(Duration::from_millis(10)).await;
    bus.cancel_turn();

    let (_, a_end) = next_turn(&mut rx).await;
    assert_eq!(a_end.error.as_deref(), Some("turn was cancelled"));

    let (b_text, b_end) = next_turn(&mut rx).await;
    assert_eq!(b_text.concat(), "[stub] You said: B");
    assert_eq!(b_end.error, None);

    running.await.unwrap();
    queued.await.unwrap();
}

#[tokio::test]
async fn stalled_consumer_holds_back_the_provider() {
    let fragments: Vec<&'static str> = vec!["x"; 200];
    let provider = Scripted::new(vec![(fragments, Ending::Complete(None))]);
    let bus = Arc::new(Bus::new(Arc::new(ProviderService::new(provider.clone()))));
    let (tx, mut rx) = mpsc::channel(1);
    let dispatch = Arc::clone(&bus);
    tokio::spawn(async move { dispatch.start(tx).await });

    let mut turn = {
        let bus = Arc::clone(&bus);
        let request = provider.generate_request("flood");
        tokio::spawn(async move { bus.run_chat(request).await })
    };

    let stalled = tokio::time::timeout(Duration::from_millis(100), &mut turn).await;
    assert!(stalled.is_err(), "turn must wait while nobody reads");

    let (text, last) = next_turn(&mut rx).await;
    assert_eq!(text.len(), 200);
    assert_eq!(last.error, None);
    turn.await.unwrap();
}

#[tokio::test]
async fn second_start_is_rejected() {
    let provider = Scripted::new(Vec::new());
    let bus = Bus::new(Arc::new(ProviderService::new(provider)));

    let (tx, rx) = mpsc::channel(1);
    drop(rx);
    bus.start(tx).await.expect("first start runs until the consumer hangs up");

    let (tx, _rx) = mpsc::channel(1);
    assert!(matches!(bus.start(tx).await, Err(BusError::AlreadyStarted)));
}

/// Provider that records how many turns run at the same time.
#[derive(Default)]
struct Overlap {
    active: AtomicUsize,
    peak: AtomicUsize,
}

impl Provider for Overlap {
    fn generate_request(&self, prompt: &str) -> ChatRequest {
        ChatRequest {
            model: "overlap".into(),
            prompt: prompt.into(),
            stream: true,
            context: None,
        }
    }

    fn chat(&self, conn: BusConnector) -> ProviderFuture<'_, ()> {
        Box::pin(async move {
            let now = self.active.fetch_add(1, Ordering::SeqCst) + 1;
            self.peak.fetch_max(now, Ordering::SeqCst);
            tokio::time::sleep(Duration::from_millis(20)).await;
            self.active.fetch_sub(1, Ordering::SeqCst);
            conn.events.complete(None).await;
        })
    }

    fn retrieve_models(&self) -> ProviderFuture<'_, Result<Vec<Model>, ProviderError>> {
        Box::pin(async { Ok(Vec::new()) })
    }

    fn set_model(&self, _name: &str) {}
}

#[tokio::test]
async fn turns_do_not_overlap() {
    let provider = Arc::new(Overlap::default());
    let (bus, mut rx) = spawn_bus(provider.clone());

    let handles: Vec<_> = (0..3)
        .map(|i| {
            let bus = Arc::clone(&bus);
            let request = provider.generate_request(&format!("turn {i}"));
            tokio::spawn(async move { bus.run_chat(request).await })
        })
        .collect();
    for h in handles {
        h.await.unwrap();
    }

    for _ in 0..3 {
        let (_, last) = next_turn(&mut rx).await;
        assert_eq!(last.error, None);
    }
    assert_eq!(provider.peak.load(Ordering::SeqCst), 1);
}
