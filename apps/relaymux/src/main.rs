use std::sync::Arc;

use anyhow::{Context, Result};
use axum::Router;
use axum::routing::post;
use clap::Parser;
use relaymux_provider_core::{EventHub, TerminalEventSink};
use relaymux_provider_impl::StaticProviderFactory;

mod cli;
mod config;
mod handlers;

use cli::Cli;
use handlers::AppState;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();

    let resolved = config::load(&cli.config)
        .with_context(|| format!("loading {}", cli.config))?;

    let events = EventHub::new(1024);
    events.add_sink(Arc::new(TerminalEventSink::new())).await;

    let factory = StaticProviderFactory::new(cli.proxy.clone(), format!("relaymux/{}", env!("CARGO_PKG_VERSION")));
    let manager = relaymux_provider_core::config::build(resolved, events, &factory)
        .context("building pipeline manager: a pipeline named an unknown provider_kind")?;

    let state = AppState {
        manager: Arc::new(manager),
    };

    let app = Router::new()
        .route("/v1/chat/completions", post(handlers::chat_completions))
        .route("/v1/responses", post(handlers::responses))
        .route("/v1/messages", post(handlers::messages))
        .with_state(state);

    let bind = format!("{}:{}", cli.host, cli.port);
    let listener = tokio::net::TcpListener::bind(&bind)
        .await
        .with_context(|| format!("binding {bind}"))?;
    tracing::info!(%bind, "listening");
    axum::serve(listener, app).await?;
    Ok(())
}
