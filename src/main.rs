//! Server bootstrap
//!
//! # Architecture Overview
//!
//! ```text
//!   environment ──▶ config ──▶ ┌──────────────── orchestrator ────────────────┐
//!                              │                                              │
//!                              │  ephemeral:  db (provision + connect) ─▶ bind │
//!                              │  persistent: bind ─▶ db (retry loop, bg task) │
//!                              │                                              │
//!                              │  bind: plain TCP | TLS (key + cert)          │
//!                              │  attach: realtime WebSocket hub (once)       │
//!                              │  run: serve until SIGINT/SIGTERM             │
//!                              └──────────────────────────────────────────────┘
//! ```
//!
//! Exit status is 0 after a graceful shutdown and 1 on any fatal error.

use std::process::ExitCode;

use server_bootstrap::http::build_router;
use server_bootstrap::lifecycle::signals::wait_for_signal;
use server_bootstrap::observability::logging::init_tracing;
use server_bootstrap::Orchestrator;

#[tokio::main]
async fn main() -> ExitCode {
    init_tracing();

    tracing::info!("server-bootstrap v{} starting", env!("CARGO_PKG_VERSION"));

    let orchestrator = Orchestrator::new();
    let shutdown = orchestrator.shutdown_handle();
    tokio::spawn(async move {
        wait_for_signal().await;
        shutdown.trigger();
    });

    // Fatal errors are logged by the orchestrator
    match orchestrator.run(|key| std::env::var(key).ok(), build_router).await {
        Ok(()) => {
            tracing::info!("Shutdown complete");
            ExitCode::SUCCESS
        }
        Err(_) => ExitCode::FAILURE,
    }
}
