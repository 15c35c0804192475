//! Core types and events for ena-transfer

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// An object seen in a source or destination listing
///
/// Listings are recomputed on every call and never cached.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RemoteObjectRef {
    /// Object name relative to the listed directory
    pub name: String,
    /// Size in bytes as reported by the listing
    pub size: u64,
}

impl RemoteObjectRef {
    /// Create a new object reference
    pub fn new(name: impl Into<String>, size: u64) -> Self {
        Self {
            name: name.into(),
            size,
        }
    }
}

/// Expected and computed checksums for one transfer attempt
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ChecksumPair {
    /// Digest declared by the source sidecar
    pub expected: String,
    /// Digest of the bytes actually sent to the destination
    pub computed: String,
}

impl ChecksumPair {
    /// Case-insensitive exact comparison
    pub fn matches(&self) -> bool {
        self.expected.eq_ignore_ascii_case(&self.computed)
    }
}

/// Terminal record of the per-object state machine
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum TransferOutcome {
    /// Already present at the destination when the batch started
    Skipped {
        /// Object name
        name: String,
    },

    /// Uploaded and the checksums match
    Succeeded {
        /// Object name
        name: String,
        /// Verified checksum (lowercase hex)
        checksum: String,
        /// Bytes transmitted
        bytes: u64,
    },

    /// Uploaded, but the destination received different content than declared
    ///
    /// Either the checksums differ or the byte count differs from the size in
    /// the source listing.
    Mismatched {
        /// Object name
        name: String,
        /// Checksum from the source sidecar
        expected: String,
        /// Checksum of the transmitted bytes
        computed: String,
        /// Bytes transmitted
        bytes: u64,
        /// Size declared by the source listing
        listed_bytes: u64,
    },

    /// An error occurred and any partial destination object was removed
    FailedAndCleaned {
        /// Object name
        name: String,
        /// The error that ended the attempt
        error: String,
    },

    /// An error occurred and the partial destination object could not be removed
    FailedCleanupIncomplete {
        /// Object name
        name: String,
        /// The error that ended the attempt
        error: String,
        /// Why cleanup failed
        cleanup_error: String,
    },

    /// Interrupted by the operator; any partial destination object was removed
    Cancelled {
        /// Object name
        name: String,
    },
}

impl TransferOutcome {
    /// Object name this outcome belongs to
    pub fn name(&self) -> &str {
        match self {
            TransferOutcome::Skipped { name }
            | TransferOutcome::Succeeded { name, .. }
            | TransferOutcome::Mismatched { name, .. }
            | TransferOutcome::FailedAndCleaned { name, .. }
            | TransferOutcome::FailedCleanupIncomplete { name, .. }
            | TransferOutcome::Cancelled { name } => name,
        }
    }

    /// Outcome kind without the payload
    pub fn kind(&self) -> OutcomeKind {
        match self {
            TransferOutcome::Skipped { .. } => OutcomeKind::Skipped,
            TransferOutcome::Succeeded { .. } => OutcomeKind::Succeeded,
            TransferOutcome::Mismatched { .. } => OutcomeKind::Mismatched,
            TransferOutcome::FailedAndCleaned { .. } => OutcomeKind::FailedAndCleaned,
            TransferOutcome::FailedCleanupIncomplete { .. } => {
                OutcomeKind::FailedCleanupIncomplete
            }
            TransferOutcome::Cancelled { .. } => OutcomeKind::Cancelled,
        }
    }

    /// True when the object is known to be correctly present at the destination
    pub fn is_ok(&self) -> bool {
        matches!(
            self,
            TransferOutcome::Skipped { .. } | TransferOutcome::Succeeded { .. }
        )
    }
}

impl std::fmt::Display for TransferOutcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TransferOutcome::Skipped { name } => write!(f, "Skipping {name}"),
            TransferOutcome::Succeeded { name, checksum, .. } => {
                write!(f, "Successfully uploaded {name}: {checksum}")
            }
            TransferOutcome::Mismatched {
                name,
                expected,
                computed,
                bytes,
                listed_bytes,
            } => {
                if expected != computed {
                    write!(
                        f,
                        "! Uploaded {name} with invalid hash: {expected} (given) != {computed} (ftp)"
                    )
                } else {
                    write!(
                        f,
                        "! Uploaded {name} with wrong size: {listed_bytes} (listed) != {bytes} (ftp)"
                    )
                }
            }
            TransferOutcome::FailedAndCleaned { name, error } => {
                write!(f, "Failed: {name}: {error}")
            }
            TransferOutcome::FailedCleanupIncomplete {
                name,
                error,
                cleanup_error,
            } => write!(
                f,
                "Failed: {name}: {error} (partial upload NOT removed: {cleanup_error})"
            ),
            TransferOutcome::Cancelled { name } => write!(f, "Cancelled: {name}"),
        }
    }
}

/// Outcome kind, used for summaries
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OutcomeKind {
    /// See [`TransferOutcome::Skipped`]
    Skipped,
    /// See [`TransferOutcome::Succeeded`]
    Succeeded,
    /// See [`TransferOutcome::Mismatched`]
    Mismatched,
    /// See [`TransferOutcome::FailedAndCleaned`]
    FailedAndCleaned,
    /// See [`TransferOutcome::FailedCleanupIncomplete`]
    FailedCleanupIncomplete,
    /// See [`TransferOutcome::Cancelled`]
    Cancelled,
}

/// Result of one batch run
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct BatchReport {
    /// Source directory that was transferred
    pub directory: String,
    /// When the batch started
    pub started_at: DateTime<Utc>,
    /// When the batch finished (or was cancelled)
    pub finished_at: DateTime<Utc>,
    /// One outcome per processed object, in processing order
    pub outcomes: Vec<TransferOutcome>,
    /// Whether the batch was halted by the operator
    pub cancelled: bool,
}

impl BatchReport {
    /// Count outcomes per kind
    pub fn summary(&self) -> BatchSummary {
        let mut summary = BatchSummary::default();
        for outcome in &self.outcomes {
            match outcome.kind() {
                OutcomeKind::Skipped => summary.skipped += 1,
                OutcomeKind::Succeeded => summary.succeeded += 1,
                OutcomeKind::Mismatched => summary.mismatched += 1,
                OutcomeKind::FailedAndCleaned => summary.failed += 1,
                OutcomeKind::FailedCleanupIncomplete => {
                    summary.failed += 1;
                    summary.cleanup_incomplete += 1;
                }
                OutcomeKind::Cancelled => summary.cancelled += 1,
            }
        }
        summary
    }

    /// True when every object is correctly present and nothing was interrupted
    pub fn is_clean(&self) -> bool {
        !self.cancelled && self.outcomes.iter().all(TransferOutcome::is_ok)
    }

    /// Look up the outcome recorded for an object
    pub fn outcome(&self, name: &str) -> Option<&TransferOutcome> {
        self.outcomes.iter().find(|o| o.name() == name)
    }
}

/// Outcome counts for a batch
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatchSummary {
    /// Objects already present
    pub skipped: usize,
    /// Objects transferred and verified
    pub succeeded: usize,
    /// Objects transferred with a checksum mismatch
    pub mismatched: usize,
    /// Objects that failed (cleaned up or not)
    pub failed: usize,
    /// Failed objects whose partial upload is still at the destination
    pub cleanup_incomplete: usize,
    /// Objects interrupted by the operator
    pub cancelled: usize,
}

/// Event emitted during a batch
///
/// Progress is published per transmitted block; presentation (console, logs)
/// is left to subscribers.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Event {
    /// Listings were taken and candidates selected
    BatchStarted {
        /// Source directory
        directory: String,
        /// Number of data objects found in the source listing
        candidates: usize,
        /// Number already present at the destination
        already_present: usize,
    },

    /// Expected checksum read from the sidecar
    ChecksumFetched {
        /// Object name
        name: String,
        /// Expected checksum
        checksum: String,
    },

    /// Upload of an object started
    UploadStarted {
        /// Object name
        name: String,
        /// Size declared by the source listing
        total_bytes: u64,
    },

    /// A block was handed to the destination
    Progress {
        /// Object name
        name: String,
        /// Bytes transmitted so far
        bytes_transferred: u64,
        /// Size declared by the source listing
        total_bytes: u64,
    },

    /// Removing a partial destination object after a failure or interrupt
    CleaningUp {
        /// Object name
        name: String,
    },

    /// An object reached its terminal state
    ObjectFinished {
        /// The outcome
        outcome: TransferOutcome,
    },

    /// The batch ended
    BatchFinished {
        /// Outcome counts
        summary: BatchSummary,
        /// Whether the batch was halted by the operator
        cancelled: bool,
    },
}
