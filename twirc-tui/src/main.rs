use std::sync::{Arc, Mutex};

use anyhow::Context;
use clap::Parser;
use tracing_subscriber::EnvFilter;
use twirc_tui::app::App;
use twirc_tui::config::{self, Cli, Config, Resolved};
use twirc_tui::plugin::HostContext;
use twirc_tui::plugins;
use twirc_tui::session;
use twirc_tui::terminal::Terminal;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let path = cli.config.clone().unwrap_or_else(config::default_path);
    let file = Config::load(&path)?;
    let resolved = Resolved::merge(&cli, &file);

    // stdout belongs to the terminal; logs go to a file
    let log = std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(&resolved.log_file)
        .with_context(|| format!("opening log file {}", resolved.log_file.display()))?;
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "twirc=info,twirc_sdk=debug".into()),
        )
        .with_writer(Mutex::new(log))
        .with_ansi(false)
        .init();

    tracing::info!(
        server = %resolved.server,
        port = resolved.port,
        channels = ?resolved.channels,
        logged_in = resolved.logged_in,
        "Starting twirc"
    );

    let terminal = Terminal::stdio();
    let startup_plugins = resolved.plugins.clone();
    let host = HostContext::new(Arc::new(resolved), terminal.output().clone());
    let app = Arc::new(App::new(host, plugins::builtin()));
    app.load_plugins(&startup_plugins).await;

    session::run(app, terminal.clone()).await;
    terminal.output().flush_partial();
    tracing::info!("Bye");
    Ok(())
}
