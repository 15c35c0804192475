//! Candidate selection from the batch-start listings

use crate::types::RemoteObjectRef;
use std::collections::{HashMap, HashSet};

/// A data object found in the source listing
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Candidate {
    /// The data object
    pub object: RemoteObjectRef,
    /// Its checksum sidecar, when the source listing has one
    pub sidecar: Option<String>,
    /// Whether the destination already has an object with this name
    pub present: bool,
}

/// Pick the data objects out of a source listing
///
/// Data objects are the names ending in one of `data_suffixes`; each is
/// paired with `<name><checksum_suffix>` when that name is also listed.
/// Source listing order is preserved.
pub fn select_candidates(
    source: &[RemoteObjectRef],
    present: &HashSet<String>,
    data_suffixes: &[String],
    checksum_suffix: &str,
) -> Vec<Candidate> {
    let sidecars: HashMap<&str, &str> = source
        .iter()
        .filter_map(|o| {
            o.name
                .strip_suffix(checksum_suffix)
                .map(|stem| (stem, o.name.as_str()))
        })
        .collect();

    source
        .iter()
        .filter(|o| !o.name.ends_with(checksum_suffix))
        .filter(|o| data_suffixes.iter().any(|s| o.name.ends_with(s.as_str())))
        .map(|o| Candidate {
            object: o.clone(),
            sidecar: sidecars.get(o.name.as_str()).map(|s| s.to_string()),
            present: present.contains(&o.name),
        })
        .collect()
}
