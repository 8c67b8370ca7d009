//! gruclient: terminal client for timed quizzes.
//! Connects to the quiz server, walks the candidate through instructions,
//! demo and test, and exits after the final page.

use std::fs::OpenOptions;
use std::sync::{Arc, Mutex};

use anyhow::Context;
use clap::Parser;
use gru_client::cli::Cli;
use gru_client::config::resolve_config;
use gru_client::orchestrator::Orchestrator;
use gru_client::transport::TcpQuizServer;
use gru_client::tui;
use tokio_util::sync::CancellationToken;

fn init_logging(args: &Cli) -> anyhow::Result<()> {
    let file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(&args.log_file)
        .with_context(|| format!("opening log file {}", args.log_file.display()))?;
    let filter = std::env::var("GRU_LOG")
        .or_else(|_| std::env::var("RUST_LOG"))
        .unwrap_or_else(|_| args.default_log_filter().to_string());
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::new(filter))
        .with_ansi(false)
        .with_writer(Mutex::new(file))
        .init();
    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Cli::parse();
    init_logging(&args)?;
    let config = resolve_config(&args)?;
    tracing::info!(server = %args.server, ?config, "gruclient starting");

    let server = Arc::new(TcpQuizServer::new(args.server.clone(), args.token.clone()));
    let cancel = CancellationToken::new();
    let orchestrator = Orchestrator::with_cancel(server, config, cancel.clone());
    let snapshots = orchestrator.snapshots();
    let keys = orchestrator.events();
    let session = tokio::spawn(orchestrator.run());

    // Raw mode turns Ctrl-c into a key; this covers signals from outside.
    let on_signal = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::info!("interrupt received");
            on_signal.cancel();
        }
    });

    let ui = tui::run_tui(snapshots, keys).await;
    if let Err(e) = &ui {
        tracing::error!(error = %e, "terminal UI failed");
        cancel.cancel();
    }
    let outcome = session.await.context("session task failed")?;
    ui?;

    tracing::info!(
        reason = ?outcome.reason,
        time_spent = ?outcome.time_spent,
        score = outcome.score,
        "gruclient exiting"
    );
    Ok(())
}
