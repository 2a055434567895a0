//! Probe harness: connect to a running language server, open one document,
//! ask for completions at one position and log what comes back.
//!
//! ```text
//! main() -> ProbeConfig::load() -> Client::with_config() -> open_doc()
//!        -> get_completions() -> log -> close()
//! ```
//!
//! Logs go to stderr; `RUST_LOG` overrides the default `info` filter.

mod config;

use std::{env, io, process::ExitCode};

use anyhow::{Context, Result};
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

use config::ProbeConfig;
use probe_lsp::{Client, CompletionList};

fn init_tracing() {
    let env_filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new("info"))
        .unwrap_or_else(|_| EnvFilter::new("warn"));

    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(io::stderr))
        .with(env_filter)
        .init();
}

fn log_completions(completions: &CompletionList) {
    tracing::info!(
        count = completions.len(),
        incomplete = completions.is_incomplete,
        "Completions received"
    );
    for item in &completions.items {
        tracing::info!(
            label = %item.label,
            kind = item.kind.map_or("-", |k| k.label()),
            detail = item.detail.as_deref().unwrap_or(""),
            insert = item.text_to_insert(),
            "  completion"
        );
    }
}

async fn run() -> Result<()> {
    let config = match ProbeConfig::load().context("invalid probe config")? {
        Some(config) => {
            if let Some(path) = ProbeConfig::path() {
                tracing::info!(path = %path.display(), "Loaded config");
            }
            config
        }
        None => ProbeConfig::default(),
    };

    let cwd = env::current_dir().context("failed to resolve current directory")?;
    let client_config = config.client_config(&cwd);
    let target = config.target();

    let client = Client::with_config(client_config)
        .await
        .context("failed to start LSP session")?;
    if let Some(info) = client.server_info() {
        tracing::info!(
            name = %info.name,
            version = info.version.as_deref().unwrap_or("unknown"),
            "Server initialized"
        );
    }

    let outcome = probe(&client, &target).await;
    client.close().await;
    outcome
}

async fn probe(client: &Client, target: &config::TargetConfig) -> Result<()> {
    let doc = client
        .open_doc(&target.document, &target.language_id)
        .await
        .with_context(|| format!("failed to open {}", target.document.display()))?;
    tracing::info!(uri = %doc.uri(), version = doc.version(), "Document opened");

    let position = target.position();
    tracing::info!(
        line = position.line,
        character = position.character,
        "Requesting completions at {position}"
    );
    let completions = client
        .get_completions(&doc, position)
        .await
        .context("completion request failed")?;
    log_completions(&completions);
    Ok(())
}

#[tokio::main]
async fn main() -> ExitCode {
    init_tracing();

    match run().await {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            tracing::error!("{err:#}");
            ExitCode::FAILURE
        }
    }
}
