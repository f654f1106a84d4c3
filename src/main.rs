use anyhow::Context;
use clap::Parser;
use termchat::{app, cli, config, logging, paths};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = cli::Args::parse();

    let config_path = paths::config_path()?;
    let cfg = config::Config::load_optional(&config_path)?;

    let log_file = paths::log_file_override().or_else(|| cfg.as_ref().and_then(|c| c.log_file.clone()));
    logging::init(log_file.as_deref())?;
    tracing::debug!(?config_path, ?cfg, "resolved config");

    let http = reqwest::Client::builder()
        .user_agent(concat!(env!("CARGO_PKG_NAME"), "/", env!("CARGO_PKG_VERSION")))
        .build()
        .context("failed to build HTTP client")?;

    let settings = app::Settings::resolve(&args, cfg.as_ref());
    let provider = app::build_provider(&http, cfg.as_ref(), &settings)?;

    match args.cmd {
        Some(cli::Command::Models) => return app::cmd_models(provider).await,
        Some(cli::Command::Chat) => return app::cmd_chat(provider).await,
        #[cfg(feature = "tui")]
        Some(cli::Command::Tui) => return termchat::tui::run_tui(provider).await,
        None => {}
    }

    let prompt = args.prompt.join(" ");
    if prompt.trim().is_empty() {
        anyhow::bail!("No prompt provided. Try: termchat \"Hello\" or `termchat chat`");
    }

    app::cmd_prompt(provider, &prompt).await
}
