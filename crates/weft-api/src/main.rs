//! Weft binary: workflow thread coordinator.
//!
//! Serves the REST API and WebSocket event streams, and exposes thread
//! lifecycle commands on the command line.

mod cli;
mod http;
mod state;

use clap::Parser;

use cli::{Cli, Commands};
use state::AppState;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Cli::parse();

    weft_observe::tracing_setup::init_tracing(args.otel)
        .map_err(|e| anyhow::anyhow!("failed to initialize tracing: {e}"))?;

    let state = AppState::init().await?;

    match args.command {
        Commands::Serve { host, port } => serve(state.clone(), host, port).await?,
        Commands::Run {
            file,
            project,
            thread_id,
            timeout_ms,
            detach,
        } => {
            cli::thread::run(
                &state, &file, project, thread_id, timeout_ms, detach, args.json,
            )
            .await?
        }
        Commands::State { thread_id } => {
            cli::thread::show_state(&state, &thread_id, args.json).await?
        }
        Commands::History { thread_id } => {
            cli::thread::show_history(&state, &thread_id, args.json).await?
        }
        Commands::Resume {
            thread_id,
            file,
            checkpoint,
            project,
        } => {
            cli::thread::resume(&state, &thread_id, &file, checkpoint, project, args.json).await?
        }
        Commands::Pause { thread_id, reason } => {
            cli::thread::pause(&state, &thread_id, reason, args.json).await?
        }
        Commands::Abort { thread_id } => cli::thread::abort(&state, &thread_id, args.json).await?,
    }

    weft_observe::tracing_setup::shutdown_tracing();
    Ok(())
}

async fn serve(state: AppState, host: Option<String>, port: Option<u16>) -> anyhow::Result<()> {
    let host = host.unwrap_or_else(|| state.config.server.host.clone());
    let port = port.unwrap_or(state.config.server.port);

    let router = http::router::build_router(state);
    let listener = tokio::net::TcpListener::bind(format!("{host}:{port}")).await?;
    tracing::info!(%host, port, "weft listening");

    axum::serve(listener, router)
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
            tracing::info!("shutdown signal received");
        })
        .await?;

    Ok(())
}
