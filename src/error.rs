//! Error types for ena-transfer
//!
//! This module provides the error taxonomy used across the transfer pipeline:
//! - Transport errors (HTTP source, FTP destination, TLS)
//! - Per-object transfer errors (missing or invalid checksum, upload failure)
//! - Cancellation, which the orchestrator treats differently from every other error
//! - Configuration and collaborator (submission, external tool) errors

use thiserror::Error;

/// Result type alias for ena-transfer operations
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for ena-transfer
///
/// Each variant carries enough context to be logged on its own, since per-object
/// errors are converted to outcome records and never re-raised out of a batch.
#[derive(Debug, Error)]
pub enum Error {
    /// Configuration error with context about which setting is invalid
    #[error("configuration error: {message}")]
    Config {
        /// Human-readable error message describing the configuration issue
        message: String,
        /// The configuration key that caused the error (e.g., "transfer.chunk_size")
        key: Option<String>,
    },

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Network error from the HTTP client
    #[error("network error: {0}")]
    Network(#[from] reqwest::Error),

    /// HTTP request completed with a non-success status
    #[error("HTTP {status} from {url}")]
    HttpStatus {
        /// Response status code
        status: u16,
        /// Requested URL
        url: String,
    },

    /// The source returned a response that could not be interpreted
    #[error("source error: {0}")]
    Source(String),

    /// FTP protocol or connection error
    #[error("FTP error: {0}")]
    Ftp(#[from] FtpError),

    /// Per-object transfer error
    #[error("transfer error: {0}")]
    Transfer(#[from] TransferError),

    /// A metadata table could not be read or was missing a required column
    #[error("metadata error: {0}")]
    Metadata(String),

    /// Submission endpoint rejected or failed a request
    #[error("submission error: {0}")]
    Submission(String),

    /// External tool execution failed (java, webin-cli)
    #[error("external tool error: {0}")]
    ExternalTool(String),

    /// Serialization error
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Operator interrupt observed while work was in flight
    #[error("cancelled by operator")]
    Cancelled,

    /// Other error
    #[error("{0}")]
    Other(String),
}

impl Error {
    /// Shorthand for a configuration error tied to a specific key
    pub fn config(key: &str, message: impl Into<String>) -> Self {
        Error::Config {
            message: message.into(),
            key: Some(key.to_string()),
        }
    }

    /// Whether this error represents an operator interrupt
    pub fn is_cancelled(&self) -> bool {
        matches!(
            self,
            Error::Cancelled | Error::Transfer(TransferError::Cancelled { .. })
        )
    }
}

/// Errors raised while moving a single object from source to destination
#[derive(Debug, Error)]
pub enum TransferError {
    /// No sidecar checksum object was listed next to the data object
    #[error("missing checksum for {name}: expected sidecar {sidecar}")]
    MissingChecksum {
        /// Data object name
        name: String,
        /// Sidecar object name that was looked up
        sidecar: String,
    },

    /// The sidecar exists but does not start with a 32-character hex digest
    #[error("invalid checksum for {name}: {reason}")]
    InvalidChecksum {
        /// Data object name
        name: String,
        /// Why the content was rejected
        reason: String,
    },

    /// The upload call itself failed
    #[error("upload of {name} failed after {bytes} bytes: {reason}")]
    Upload {
        /// Destination object name
        name: String,
        /// Bytes handed to the destination before the failure
        bytes: u64,
        /// Underlying failure
        reason: String,
    },

    /// The transfer was interrupted by the operator
    #[error("transfer of {name} cancelled")]
    Cancelled {
        /// Object that was in flight
        name: String,
    },
}

/// FTP control and data channel errors
#[derive(Debug, Error)]
pub enum FtpError {
    /// The server answered a command with an unexpected reply code
    #[error("{command} rejected with {code}: {message}")]
    UnexpectedReply {
        /// Command verb that was sent (arguments omitted)
        command: String,
        /// Three-digit reply code
        code: u16,
        /// Reply text
        message: String,
    },

    /// A reply line did not follow the `ddd text` format
    #[error("malformed reply: {0}")]
    MalformedReply(String),

    /// The server closed the control connection
    #[error("control connection closed by server")]
    ConnectionClosed,

    /// Establishing the session took longer than the configured timeout
    #[error("timed out connecting to {0}")]
    ConnectTimeout(String),

    /// TLS negotiation failed
    #[error("TLS error: {0}")]
    Tls(String),
}

impl FtpError {
    /// Reply code carried by this error, if the server produced one
    pub fn code(&self) -> Option<u16> {
        match self {
            FtpError::UnexpectedReply { code, .. } => Some(*code),
            _ => None,
        }
    }

    /// Whether the control channel is still in a known state after this error
    ///
    /// A rejected command leaves the command/reply sequence intact; every other
    /// failure means the connection must be discarded.
    pub fn leaves_session_usable(&self) -> bool {
        matches!(self, FtpError::UnexpectedReply { .. })
    }
}
