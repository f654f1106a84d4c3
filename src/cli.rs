use clap::{Parser, Subcommand};

/// Streaming terminal chat for local and hosted LLMs
#[derive(Debug, Parser)]
#[command(name = "termchat")]
#[command(version)]
#[command(about = "Streaming terminal chat for local and hosted LLMs", long_about = None)]
pub struct Args {
    /// Model name
    #[arg(short = 'm', long = "model")]
    pub model: Option<String>,

    /// Provider: ollama, openrouter or stub (default: config/provider or "ollama")
    #[arg(long = "provider")]
    pub provider: Option<String>,

    #[command(subcommand)]
    pub cmd: Option<Command>,

    /// Prompt text (positional) (used when no subcommand is given)
    #[arg(value_name = "PROMPT")]
    pub prompt: Vec<String>,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// List the models the provider offers
    Models,

    /// Multi-turn chat on stdin; one line per prompt
    Chat,

    /// Run an interactive terminal chat UI
    #[cfg(feature = "tui")]
    Tui,
}
