//! Retry logic with exponential backoff
//!
//! The source storage is flaky under load, so every source listing and sidecar
//! read goes through [`with_retry`]. Object streams and uploads are never
//! retried here: a failed upload is cleaned up by the orchestrator instead.
//!
//! ```no_run
//! use ena_transfer::config::RetryConfig;
//! use ena_transfer::retry::with_retry;
//! use ena_transfer::{SourceReader, WebDavSource};
//!
//! # async fn example(source: WebDavSource) -> ena_transfer::Result<()> {
//! let policy = RetryConfig::default();
//! let sidecar = with_retry(&policy, || source.read_to_bytes("/run/", "a.fq.gz.md5")).await?;
//! # let _ = sidecar;
//! # Ok(())
//! # }
//! ```

use crate::config::RetryConfig;
use crate::error::{Error, FtpError};
use rand::Rng;
use std::future::Future;
use std::time::Duration;

/// Trait for errors that can be classified as retryable or not
///
/// Transient failures (network timeouts, server busy, connection reset) should return `true`.
/// Permanent failures (authentication failed, missing object, corrupt data) should return `false`.
pub trait IsRetryable {
    /// Returns true if the error is transient and the operation should be retried
    fn is_retryable(&self) -> bool;
}

impl IsRetryable for Error {
    fn is_retryable(&self) -> bool {
        match self {
            // Timeouts and refused/reset connections; a body decode error is not transient
            Error::Network(e) => e.is_timeout() || e.is_connect() || e.is_request(),
            Error::Io(e) => matches!(
                e.kind(),
                std::io::ErrorKind::TimedOut
                    | std::io::ErrorKind::ConnectionRefused
                    | std::io::ErrorKind::ConnectionReset
                    | std::io::ErrorKind::ConnectionAborted
                    | std::io::ErrorKind::NotConnected
                    | std::io::ErrorKind::BrokenPipe
                    | std::io::ErrorKind::Interrupted
                    | std::io::ErrorKind::UnexpectedEof
            ),
            // Throttling and server-side failures
            Error::HttpStatus { status, .. } => *status == 429 || (500..600).contains(status),
            // 4xx FTP replies are transient by definition, 5xx are permanent
            Error::Ftp(FtpError::UnexpectedReply { code, .. }) => (400..500).contains(code),
            Error::Ftp(FtpError::ConnectionClosed) | Error::Ftp(FtpError::ConnectTimeout(_)) => {
                true
            }
            Error::Ftp(FtpError::MalformedReply(_)) | Error::Ftp(FtpError::Tls(_)) => false,
            // Malformed listings are a server bug, not a hiccup
            Error::Source(_) => false,
            Error::Transfer(_) => false,
            Error::Config { .. } => false,
            Error::Metadata(_) => false,
            Error::Submission(_) => false,
            Error::ExternalTool(_) => false,
            Error::Serialization(_) => false,
            // Never retry past an operator interrupt
            Error::Cancelled => false,
            Error::Other(_) => false,
        }
    }
}

/// Execute an async operation with exponential backoff retry logic
///
/// # Arguments
///
/// * `config` - Retry configuration (max attempts, delays, backoff multiplier, jitter)
/// * `operation` - Async closure that returns `Result<T, E>` where E implements IsRetryable
///
/// # Returns
///
/// Returns the successful result or the last error after all retry attempts are exhausted.
pub async fn with_retry<F, Fut, T, E>(config: &RetryConfig, mut operation: F) -> Result<T, E>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: IsRetryable + std::fmt::Display,
{
    let mut attempt = 0;
    let mut delay = config.initial_delay;

    loop {
        match operation().await {
            Ok(result) => {
                if attempt > 0 {
                    tracing::info!(attempts = attempt + 1, "Operation succeeded after retry");
                }
                return Ok(result);
            }
            Err(e) if e.is_retryable() && attempt + 1 < config.max_attempts => {
                attempt += 1;

                tracing::warn!(
                    error = %e,
                    attempt = attempt,
                    max_attempts = config.max_attempts,
                    delay_ms = delay.as_millis(),
                    "Operation failed, retrying"
                );

                let jittered_delay = if config.jitter {
                    add_jitter(delay)
                } else {
                    delay
                };

                tokio::time::sleep(jittered_delay).await;

                let next_delay =
                    Duration::from_secs_f64(delay.as_secs_f64() * config.backoff_multiplier);
                delay = next_delay.min(config.max_delay);
            }
            Err(e) => {
                if e.is_retryable() {
                    tracing::error!(
                        error = %e,
                        attempts = attempt + 1,
                        "Operation failed after all retry attempts exhausted"
                    );
                } else {
                    tracing::debug!(error = %e, "Operation failed with non-retryable error");
                }
                return Err(e);
            }
        }
    }
}

/// Add random jitter to a delay to prevent thundering herd
///
/// Jitter is uniformly distributed between 0% and 100% of the delay,
/// so the actual delay will be between `delay` and `2 * delay`.
fn add_jitter(delay: Duration) -> Duration {
    let mut rng = rand::thread_rng();
    let jitter_factor: f64 = rng.gen_range(0.0..=1.0);
    let jittered_secs = delay.as_secs_f64() * (1.0 + jitter_factor);
    Duration::from_secs_f64(jittered_secs)
}
