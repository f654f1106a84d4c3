use crate::bus::Bus;
use crate::provider::{self, ChatResponseChunk, Provider, ProviderService};
use crate::{cli, config};
use anyhow::Context;
use std::io::Write;
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::mpsc;

/// Capacity of the consumer-facing response channel.
const RESPONSE_BUFFER: usize = 100;

/// Effective settings after layering CLI flags over env and config.
#[derive(Debug, Clone)]
pub struct Settings {
    pub provider: String,
    pub model: Option<String>,
}

impl Settings {
    pub fn resolve(args: &cli::Args, cfg: Option<&config::Config>) -> Self {
        let provider = args
            .provider
            .clone()
            .or_else(|| cfg.and_then(|c| c.provider.clone()))
            .unwrap_or_else(|| "ollama".to_string());

        let model = args
            .model
            .clone()
            .or_else(|| cfg.and_then(|c| c.model.clone()));

        Self { provider, model }
    }
}

pub fn build_provider(
    http: &reqwest::Client,
    cfg: Option<&config::Config>,
    settings: &Settings,
) -> anyhow::Result<Arc<dyn Provider>> {
    let ttl = cfg
        .map(config::Config::model_cache_ttl)
        .unwrap_or(provider::DEFAULT_MODEL_CACHE_TTL);

    match settings.provider.as_str() {
        "ollama" => {
            #[cfg(feature = "ollama")]
            {
                use provider::ollama;

                let model = settings
                    .model
                    .clone()
                    .unwrap_or_else(|| ollama::DEFAULT_MODEL.to_string());
                let base_url = std::env::var("OLLAMA_HOST")
                    .ok()
                    .filter(|h| !h.trim().is_empty())
                    .map(|h| ollama::base_url_from_host(&h))
                    .or_else(|| cfg.and_then(|c| c.ollama.base_url.clone()))
                    .unwrap_or_else(|| ollama::DEFAULT_BASE_URL.to_string());

                let p = ollama::OllamaProvider::new(http.clone(), model, ttl).with_base_url(base_url);
                Ok(Arc::new(p))
            }
            #[cfg(not(feature = "ollama"))]
            {
                let _ = (http, ttl);
                anyhow::bail!("ollama provider is not enabled in this build")
            }
        }
        "openrouter" => {
            #[cfg(feature = "openrouter")]
            {
                use provider::openrouter;

                let api_key = std::env::var(openrouter::API_KEY_ENV)
                    .ok()
                    .or_else(|| cfg.and_then(|c| c.openrouter.api_key.clone()));
                let model = settings
                    .model
                    .clone()
                    .unwrap_or_else(|| openrouter::DEFAULT_MODEL.to_string());
                let base_url = cfg
                    .and_then(|c| c.openrouter.base_url.clone())
                    .unwrap_or_else(|| openrouter::DEFAULT_BASE_URL.to_string());

                let p = openrouter::OpenRouterProvider::new(http.clone(), api_key, model, ttl)
                    .context("failed to initialize openrouter provider")?
                    .with_base_url(base_url);
                Ok(Arc::new(p))
            }
            #[cfg(not(feature = "openrouter"))]
            {
                let _ = (http, ttl);
                anyhow::bail!("openrouter provider is not enabled in this build")
            }
        }
        "stub" => {
            let p = provider::stub::StubProvider::default();
            if let Some(model) = &settings.model {
                p.set_model(model);
            }
            Ok(Arc::new(p))
        }
        other => anyhow::bail!("unknown provider: {other}"),
    }
}

/// A running bus plus the consumer end of its response channel.
pub struct Session {
    bus: Arc<Bus>,
    responses: mpsc::Receiver<ChatResponseChunk>,
}

impl Session {
    /// Wrap `provider` in a service and bus, and spawn the dispatch loop.
    pub fn start(provider: Arc<dyn Provider>) -> Self {
        let bus = Arc::new(Bus::new(Arc::new(ProviderService::new(provider))));
        let (tx, responses) = mpsc::channel(RESPONSE_BUFFER);

        let dispatch = Arc::clone(&bus);
        tokio::spawn(async move {
            if let Err(e) = dispatch.start(tx).await {
                tracing::error!(error = %e, "dispatch loop failed to start");
            }
        });

        Self { bus, responses }
    }

    pub fn bus(&self) -> &Arc<Bus> {
        &self.bus
    }

    pub fn responses(&mut self) -> &mut mpsc::Receiver<ChatResponseChunk> {
        &mut self.responses
    }

    /// Send `prompt` on its own task without waiting for the reply.
    pub fn submit(&self, prompt: &str) {
        let request = self.bus.service().generate_request(prompt);
        let bus = Arc::clone(&self.bus);
        tokio::spawn(async move { bus.run_chat(request).await });
    }

    /// Run one turn, handing each text fragment to `on_text`, and return the
    /// terminal chunk.
    pub async fn ask(
        &mut self,
        prompt: &str,
        mut on_text: impl FnMut(&str),
    ) -> anyhow::Result<ChatResponseChunk> {
        self.submit(prompt);
        while let Some(chunk) = self.responses.recv().await {
            if chunk.done {
                return Ok(chunk);
            }
            on_text(&chunk.text);
        }
        anyhow::bail!("chat stream closed")
    }
}

fn print_fragment(text: &str) {
    print!("{text}");
    std::io::stdout().flush().ok();
}

pub async fn cmd_prompt(provider: Arc<dyn Provider>, prompt: &str) -> anyhow::Result<()> {
    let mut session = Session::start(provider);
    let last = session.ask(prompt, print_fragment).await?;
    println!();

    if let Some(err) = last.error {
        anyhow::bail!("stream failed: {err}");
    }
    Ok(())
}

pub async fn cmd_models(provider: Arc<dyn Provider>) -> anyhow::Result<()> {
    let models = provider
        .retrieve_models()
        .await
        .context("failed to list models")?;
    if models.is_empty() {
        println!("(no models available)");
    }
    for m in &models {
        if m.modalities.is_empty() {
            println!("{}", m.name);
        } else {
            println!("{}\t{}", m.name, m.modalities.join(","));
        }
    }
    Ok(())
}

/// Line-mode multi-turn chat. Commands: /quit, /model <name>, /models.
pub async fn cmd_chat(provider: Arc<dyn Provider>) -> anyhow::Result<()> {
    let mut session = Session::start(provider);
    let mut lines = BufReader::new(tokio::io::stdin()).lines();

    print_fragment("> ");
    while let Some(line) = lines.next_line().await.context("failed to read stdin")? {
        let msg = line.trim();
        if msg.is_empty() {
            print_fragment("> ");
            continue;
        }
        if msg == "/quit" {
            break;
        }

        if let Some(rest) = msg.strip_prefix("/model ") {
            session.bus().service().set_model(rest.trim());
            println!("model set to: {}", rest.trim());
        } else if msg == "/models" {
            match session.bus().service().retrieve_models().await {
                Ok(models) => {
                    for m in models {
                        println!("{}", m.name);
                    }
                }
                Err(e) => println!("error: {e}"),
            }
        } else {
            let last = session.ask(msg, print_fragment).await?;
            println!();
            if let Some(err) = last.error {
                println!("error: {err}");
            }
        }
        print_fragment("> ");
    }

    Ok(())
}
