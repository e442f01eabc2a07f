//! vintage-booth-daemon: Capture session daemon for the vintage camera flows
//!
//! This daemon provides:
//! - One countdown/capture/flash capture session per camera flow
//!   (photobooth, film camera, digital camera, polaroid)
//! - A session-scoped frame store the finished runs are handed off to
//! - IPC server for starting runs, reading frames and streaming events
//!
//! Out of scope: image encoding, face tracking, page navigation and any
//! rendering. The webcam is replaced by a synthetic test pattern source.

mod capture;
mod config;
mod events;
mod ipc;
mod lifecycle;
mod state;

use std::sync::Arc;

use anyhow::{Context, Result};
use tokio::sync::broadcast;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use crate::capture::TestPatternSource;
use crate::config::Config;
use crate::events::{FlowEvent, SessionEvent};
use crate::ipc::Server;
use crate::lifecycle::ShutdownSignal;
use crate::state::Booth;

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("info"))
        )
        .init();

    info!(
        version = env!("CARGO_PKG_VERSION"),
        "vintage-booth-daemon starting"
    );

    // Load configuration
    let config = Config::load()?;
    config.ensure_dirs()?;
    info!(?config.socket_path, flows = config.flows.len(), "configuration loaded");

    // Create shutdown signal handler
    let shutdown = ShutdownSignal::new();

    // Sessions -> IPC subscribers and the event log below
    let (event_tx, _event_rx) = broadcast::channel::<FlowEvent>(256);

    let source = Arc::new(TestPatternSource::new(config.source.width, config.source.height));
    let store = Arc::new(config.session_store());
    let booth = Arc::new(
        Booth::new(&config.flows, source.clone(), store, event_tx.clone())
            .context("failed to create capture sessions")?,
    );

    let server = Server::new(
        &config.socket_path,
        Arc::clone(&booth),
        source,
        config.filter,
        event_tx.clone(),
    )?;

    let mut log_event_rx = event_tx.subscribe();

    info!("daemon initialized, entering main loop");

    // Main event loop
    tokio::select! {
        // Run the IPC server (accepts client connections)
        result = server.run() => {
            if let Err(e) = result {
                error!(?e, "IPC server error");
            }
        }

        // Log session events
        _ = async {
            loop {
                match log_event_rx.recv().await {
                    Ok(event) => match &event.event {
                        SessionEvent::Error { .. } => warn!(%event, "session event"),
                        _ => info!(%event, "session event"),
                    },
                    Err(broadcast::error::RecvError::Lagged(n)) => {
                        warn!(skipped = n, "session event receiver lagged");
                    }
                    Err(broadcast::error::RecvError::Closed) => {
                        break;
                    }
                }
            }
        } => {
            info!("session event logger exited");
        }

        // Wait for shutdown signal
        result = shutdown.wait() => {
            match result {
                Ok(()) => info!("shutdown signal received"),
                Err(e) => error!(?e, "failed to install signal handlers"),
            }
        }
    }

    // Cleanup
    info!("shutting down...");

    booth.reset_all().await;
    server.shutdown().await;

    info!("vintage-booth-daemon stopped");

    Ok(())
}
