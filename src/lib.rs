//! # ena-transfer
//!
//! Checksum-verified streaming transfer of sequencing files from WebDAV
//! storage (Nextcloud/ownCloud) to the European Nucleotide Archive's FTPS
//! upload area, plus the metadata and submission helpers around it.
//!
//! ## Design Philosophy
//!
//! - **Streaming** - Objects are never staged on local disk; bytes flow from
//!   the source response through a bounded read-ahead buffer to the data channel
//! - **Verified** - Every upload is hashed as it is sent and compared with
//!   the checksum sidecar published next to the object
//! - **Idempotent batches** - Objects already at the destination are skipped,
//!   so an interrupted batch is resumed by running it again
//! - **Event-driven** - Progress and outcomes are published on a broadcast channel
//!
//! ## Quick Start
//!
//! ```no_run
//! use ena_transfer::{Config, FtpsDestination, TransferOrchestrator, WebDavSource};
//! use std::sync::Arc;
//! use tokio_util::sync::CancellationToken;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = Config::from_file("ena-transfer.toml".as_ref())?;
//!     let source = Arc::new(WebDavSource::new(&config.source)?);
//!     let destination = FtpsDestination::new(config.destination.clone())?;
//!
//!     let mut orchestrator = TransferOrchestrator::new(source, destination, config.transfer);
//!     let mut events = orchestrator.subscribe();
//!     tokio::spawn(async move {
//!         while let Ok(event) = events.recv().await {
//!             println!("Event: {:?}", event);
//!         }
//!     });
//!
//!     let cancel = CancellationToken::new();
//!     tokio::spawn(ena_transfer::cancel_on_signal(cancel.clone()));
//!     let report = orchestrator.run(&config.source.directory, &cancel).await?;
//!     println!("{:?}", report.summary());
//!     Ok(())
//! }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::unwrap_used)]
#![warn(clippy::expect_used)]

/// Configuration types
pub mod config;
/// Upload destinations (FTPS)
pub mod destination;
/// Error types
pub mod error;
/// Sample tables, run tables and assembly manifests
pub mod metadata;
/// Retry logic with exponential backoff
pub mod retry;
/// Download sources (WebDAV)
pub mod source;
/// Chunk stream to buffered reader adapter
pub mod stream_adapter;
/// Drop-box XML documents and submission
pub mod submission;
/// Batch transfer with checksum verification
pub mod transfer;
/// Core types and events
pub mod types;
/// webin-cli invocation
pub mod webin;

// Re-export commonly used types
pub use config::{Config, DestinationConfig, SourceConfig, SubmissionConfig, TransferConfig};
pub use destination::{DestinationWriter, FtpsDestination, OnBlock, SessionState};
pub use error::{Error, FtpError, Result, TransferError};
pub use source::{SourceReader, WebDavSource};
pub use transfer::TransferOrchestrator;
pub use types::{BatchReport, BatchSummary, Event, OutcomeKind, RemoteObjectRef, TransferOutcome};

/// Cancel `token` when the process receives a termination signal
///
/// Meant to be spawned next to a batch: the orchestrator observes the token,
/// removes the partial upload in flight and stops.
pub async fn cancel_on_signal(token: tokio_util::sync::CancellationToken) {
    wait_for_signal().await;
    tracing::warn!("Interrupt received, stopping after cleanup of the current object");
    token.cancel();
}

/// Wait for a termination signal
///
/// - **Unix:** listens for SIGTERM and SIGINT, with fallbacks if signal registration fails.
/// - **Windows/other:** listens for Ctrl+C via `tokio::signal::ctrl_c()`.
#[cfg(unix)]
pub async fn wait_for_signal() {
    use tokio::signal::unix::{SignalKind, signal};

    // Registration may fail in restricted environments (containers, tests)
    let sigterm_result = signal(SignalKind::terminate());
    let sigint_result = signal(SignalKind::interrupt());

    match (sigterm_result, sigint_result) {
        (Ok(mut sigterm), Ok(mut sigint)) => {
            tokio::select! {
                _ = sigterm.recv() => tracing::info!("Received SIGTERM signal"),
                _ = sigint.recv() => tracing::info!("Received SIGINT signal (Ctrl+C)"),
            }
        }
        (Err(e), Ok(mut sigint)) => {
            tracing::warn!(error = %e, "Could not register SIGTERM handler, waiting for SIGINT only");
            sigint.recv().await;
            tracing::info!("Received SIGINT signal (Ctrl+C)");
        }
        (Ok(mut sigterm), Err(e)) => {
            tracing::warn!(error = %e, "Could not register SIGINT handler, waiting for SIGTERM only");
            sigterm.recv().await;
            tracing::info!("Received SIGTERM signal");
        }
        (Err(e), Err(_)) => {
            tracing::error!(error = %e, "Could not register any signal handlers, using ctrl_c fallback");
            tokio::signal::ctrl_c().await.ok();
        }
    }
}

/// Wait for a termination signal (Ctrl+C)
#[cfg(not(unix))]
pub async fn wait_for_signal() {
    match tokio::signal::ctrl_c().await {
        Ok(()) => tracing::info!("Received Ctrl+C signal"),
        Err(e) => tracing::error!(error = %e, "Failed to listen for Ctrl+C signal"),
    }
}
