//! Per-object transfer state machine and the batch loop

use super::candidates::{Candidate, select_candidates};
use super::checksum::{parse_sidecar, sidecar_name};
use crate::config::TransferConfig;
use crate::destination::DestinationWriter;
use crate::error::{Error, Result, TransferError};
use crate::source::SourceReader;
use crate::types::{BatchReport, ChecksumPair, Event, TransferOutcome};
use chrono::Utc;
use std::collections::HashSet;
use std::sync::Arc;
use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;

/// Checksums and byte count of an upload that ran to completion
struct Transferred {
    checksum: ChecksumPair,
    bytes: u64,
}

/// How the body of one object ended
enum Attempt {
    Completed(Transferred),
    Failed(Error),
    Cancelled,
}

/// Moves every eligible object of a source directory to the destination
///
/// Objects are processed one at a time over a single destination session:
///
/// 1. Read the checksum sidecar (the expected digest)
/// 2. Open the object as a buffered stream
/// 3. Upload it, computing the digest of the bytes sent
/// 4. Compare the two digests
///
/// Objects the destination already had at batch start are skipped. A failure
/// in steps 1-3 removes whatever partial object reached the destination and
/// the batch moves on; an operator interrupt does the same cleanup and then
/// stops the batch. Neither a mismatch nor a failure is retried.
pub struct TransferOrchestrator<D> {
    source: Arc<dyn SourceReader>,
    destination: D,
    settings: TransferConfig,
    event_tx: broadcast::Sender<Event>,
}

impl<D: DestinationWriter> TransferOrchestrator<D> {
    /// Create an orchestrator over a source and a destination
    pub fn new(source: Arc<dyn SourceReader>, destination: D, settings: TransferConfig) -> Self {
        let (event_tx, _rx) = broadcast::channel(1000);
        Self {
            source,
            destination,
            settings,
            event_tx,
        }
    }

    /// Subscribe to batch events
    ///
    /// Slow subscribers may miss progress events (the channel is bounded);
    /// the returned [`BatchReport`] is authoritative.
    pub fn subscribe(&self) -> broadcast::Receiver<Event> {
        self.event_tx.subscribe()
    }

    /// The destination, e.g. to close its session after a batch
    pub fn destination_mut(&mut self) -> &mut D {
        &mut self.destination
    }

    /// Transfer the objects of `dir`
    ///
    /// Returns an error only when the batch could not start (a listing
    /// failed); per-object errors are recorded as outcomes in the report.
    pub async fn run(&mut self, dir: &str, cancel: &CancellationToken) -> Result<BatchReport> {
        let started_at = Utc::now();
        let mut report = BatchReport {
            directory: dir.to_string(),
            started_at,
            finished_at: started_at,
            outcomes: Vec::new(),
            cancelled: false,
        };

        let candidates = tokio::select! {
            biased;
            _ = cancel.cancelled() => None,
            listed = self.take_listings(dir) => Some(listed?),
        };
        let Some(candidates) = candidates else {
            tracing::warn!(directory = dir, "Batch cancelled while listing");
            report.cancelled = true;
            return Ok(self.finish(report));
        };

        for candidate in candidates {
            if cancel.is_cancelled() {
                report.cancelled = true;
                break;
            }

            let name = candidate.object.name.clone();
            if candidate.present {
                tracing::info!(object = %name, "Already at destination, skipping");
                self.record(&mut report, TransferOutcome::Skipped { name });
                continue;
            }

            let attempt = tokio::select! {
                biased;
                _ = cancel.cancelled() => Attempt::Cancelled,
                result = self.transfer_one(dir, &candidate) => match result {
                    Ok(done) => Attempt::Completed(done),
                    Err(e) if e.is_cancelled() => Attempt::Cancelled,
                    Err(e) => Attempt::Failed(e),
                },
            };

            let outcome = match attempt {
                Attempt::Completed(done) => verify(&candidate, done),
                Attempt::Failed(error) => {
                    tracing::error!(object = %name, error = %error, "Transfer failed");
                    match self.remove_partial(&name).await {
                        Ok(()) => TransferOutcome::FailedAndCleaned {
                            name,
                            error: error.to_string(),
                        },
                        Err(cleanup) => {
                            tracing::error!(
                                object = %name,
                                error = %cleanup,
                                "Partial upload could not be removed"
                            );
                            TransferOutcome::FailedCleanupIncomplete {
                                name,
                                error: error.to_string(),
                                cleanup_error: cleanup.to_string(),
                            }
                        }
                    }
                }
                Attempt::Cancelled => {
                    tracing::warn!(object = %name, "Transfer cancelled, removing partial upload");
                    report.cancelled = true;
                    match self.remove_partial(&name).await {
                        Ok(()) => TransferOutcome::Cancelled { name },
                        Err(cleanup) => {
                            tracing::error!(
                                object = %name,
                                error = %cleanup,
                                "Partial upload could not be removed after cancellation"
                            );
                            let error = TransferError::Cancelled { name: name.clone() };
                            TransferOutcome::FailedCleanupIncomplete {
                                name,
                                error: error.to_string(),
                                cleanup_error: cleanup.to_string(),
                            }
                        }
                    }
                }
            };

            self.record(&mut report, outcome);
            if report.cancelled {
                break;
            }
        }

        Ok(self.finish(report))
    }

    /// List both sides once and select the candidates
    async fn take_listings(&mut self, dir: &str) -> Result<Vec<Candidate>> {
        let source_objects = self.source.list(dir).await?;
        let present: HashSet<String> = self
            .destination
            .list()
            .await?
            .into_iter()
            .map(|o| o.name)
            .collect();

        let candidates = select_candidates(
            &source_objects,
            &present,
            &self.settings.data_suffixes,
            &self.settings.checksum_suffix,
        );
        let already_present = candidates.iter().filter(|c| c.present).count();

        tracing::info!(
            directory = dir,
            source = self.source.name(),
            destination = self.destination.name(),
            listed = source_objects.len(),
            candidates = candidates.len(),
            already_present,
            "Starting batch"
        );
        self.emit(Event::BatchStarted {
            directory: dir.to_string(),
            candidates: candidates.len(),
            already_present,
        });
        Ok(candidates)
    }

    /// Steps 1-3 for one object
    async fn transfer_one(&mut self, dir: &str, candidate: &Candidate) -> Result<Transferred> {
        let name = candidate.object.name.as_str();
        let total = candidate.object.size;

        let sidecar = candidate
            .sidecar
            .as_deref()
            .ok_or_else(|| TransferError::MissingChecksum {
                name: name.to_string(),
                sidecar: sidecar_name(name, &self.settings.checksum_suffix),
            })?;
        let sidecar_content = self.source.read_to_bytes(dir, sidecar).await?;
        let expected = parse_sidecar(name, &sidecar_content)?;
        tracing::debug!(object = %name, checksum = %expected, "Read expected checksum");
        self.emit(Event::ChecksumFetched {
            name: name.to_string(),
            checksum: expected.clone(),
        });

        let mut stream = self
            .source
            .open(
                dir,
                name,
                self.settings.chunk_size,
                self.settings.buffer_factor,
            )
            .await?;
        self.emit(Event::UploadStarted {
            name: name.to_string(),
            total_bytes: total,
        });

        let mut sent = 0u64;
        let uploaded = {
            let event_tx = self.event_tx.clone();
            let object = name.to_string();
            let mut on_block = |block: &[u8]| {
                sent += block.len() as u64;
                event_tx
                    .send(Event::Progress {
                        name: object.clone(),
                        bytes_transferred: sent,
                        total_bytes: total,
                    })
                    .ok();
            };
            self.destination
                .upload(name, &mut *stream, &mut on_block, self.settings.block_size)
                .await
        };
        let computed = uploaded.map_err(|e| TransferError::Upload {
            name: name.to_string(),
            bytes: sent,
            reason: e.to_string(),
        })?;

        if self.settings.upload_checksum_sidecar {
            let target = sidecar_name(name, &self.settings.checksum_suffix);
            let mut content: &[u8] = &sidecar_content;
            self.destination
                .upload(&target, &mut content, &mut |_: &[u8]| {}, self.settings.block_size)
                .await
                .map_err(|e| TransferError::Upload {
                    name: target.clone(),
                    bytes: 0,
                    reason: e.to_string(),
                })?;
        }

        Ok(Transferred {
            checksum: ChecksumPair { expected, computed },
            bytes: sent,
        })
    }

    /// Remove whatever reached the destination under `name`
    async fn remove_partial(&mut self, name: &str) -> Result<()> {
        self.emit(Event::CleaningUp {
            name: name.to_string(),
        });

        let mut targets = vec![name.to_string()];
        if self.settings.upload_checksum_sidecar {
            targets.push(sidecar_name(name, &self.settings.checksum_suffix));
        }

        for target in targets {
            match self.destination.size(&target).await {
                Ok(None) => continue,
                Ok(Some(size)) => {
                    tracing::info!(object = %target, size, "Deleting partial upload");
                }
                Err(e) => {
                    tracing::warn!(object = %target, error = %e, "Size query failed, deleting anyway");
                }
            }
            self.destination.delete(&target).await?;
        }
        Ok(())
    }

    fn record(&self, report: &mut BatchReport, outcome: TransferOutcome) {
        report.outcomes.push(outcome.clone());
        self.emit(Event::ObjectFinished { outcome });
    }

    fn finish(&self, mut report: BatchReport) -> BatchReport {
        report.finished_at = Utc::now();
        let summary = report.summary();
        tracing::info!(
            directory = %report.directory,
            skipped = summary.skipped,
            succeeded = summary.succeeded,
            mismatched = summary.mismatched,
            failed = summary.failed,
            cancelled = report.cancelled,
            "Batch finished"
        );
        self.emit(Event::BatchFinished {
            summary,
            cancelled: report.cancelled,
        });
        report
    }

    fn emit(&self, event: Event) {
        self.event_tx.send(event).ok();
    }
}

/// Step 4: compare the digests and the byte count
///
/// A listed size of 0 is also what the source reports when it gives no size,
/// so it is not compared.
fn verify(candidate: &Candidate, done: Transferred) -> TransferOutcome {
    let name = candidate.object.name.clone();
    let listed = candidate.object.size;
    let size_matches = listed == 0 || done.bytes == listed;

    if done.checksum.matches() && size_matches {
        tracing::info!(object = %name, checksum = %done.checksum.computed, bytes = done.bytes, "Uploaded and verified");
        return TransferOutcome::Succeeded {
            name,
            checksum: done.checksum.computed,
            bytes: done.bytes,
        };
    }

    if size_matches {
        tracing::warn!(
            object = %name,
            expected = %done.checksum.expected,
            computed = %done.checksum.computed,
            "Checksum mismatch"
        );
    } else {
        tracing::warn!(
            object = %name,
            sent = done.bytes,
            listed,
            "Bytes sent differ from the size in the source listing"
        );
    }
    TransferOutcome::Mismatched {
        name,
        expected: done.checksum.expected,
        computed: done.checksum.computed,
        bytes: done.bytes,
        listed_bytes: listed,
    }
}
