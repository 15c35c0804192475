//! Batch transfer from source to destination with checksum verification
//!
//! Split into focused submodules:
//! - [`candidates`] - Picking data objects and their sidecars from the listings
//! - [`checksum`] - Sidecar parsing
//! - [`orchestrator`] - Per-object state machine and the batch loop

pub mod candidates;
pub mod checksum;
mod orchestrator;

#[cfg(test)]
pub(crate) mod test_helpers;


pub use candidates::{Candidate, select_candidates};
pub use checksum::{parse_sidecar, sidecar_name};
pub use orchestrator::TransferOrchestrator;
