use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::Error;
use crate::signature::{self, Signature};
use crate::store::FingerprintStore;

pub const DUPLICATES_FILE: &str = ".duplicates.json";

/// Per-path duplicate lists, persisted with the threshold they were computed
/// under. Lists from different thresholds are never mixed; on mismatch the
/// whole record is discarded and recomputed.
#[derive(Debug, Serialize, Deserialize)]
pub struct DuplicateRecord {
    pub threshold: f64,
    pub duplicates: BTreeMap<PathBuf, Vec<(u32, PathBuf)>>,
}

impl DuplicateRecord {
    pub fn new(threshold: f64) -> Self {
        Self {
            threshold,
            duplicates: BTreeMap::new(),
        }
    }

    /// Loads the persisted record, falling back to an empty one when the
    /// file is missing, unparsable, or carries a different threshold.
    pub fn load(path: &Path, threshold: f64) -> Self {
        let Ok(bytes) = fs::read(path) else {
            return Self::new(threshold);
        };
        match serde_json::from_slice::<DuplicateRecord>(&bytes) {
            Ok(record) if record.threshold == threshold => record,
            Ok(_) => {
                log::info!("duplicates file was computed under a different threshold, recomputing");
                Self::new(threshold)
            }
            Err(err) => {
                log::warn!("discarding unparsable duplicates file: {err}");
                Self::new(threshold)
            }
        }
    }

    pub fn save(&self, path: &Path) -> Result<(), Error> {
        let bytes = serde_json::to_vec(self)?;
        let tmp = path.with_extension("json.tmp");
        fs::write(&tmp, bytes)?;
        fs::rename(&tmp, path)?;
        Ok(())
    }
}

/// All stored images within the similarity threshold of `query`, excluding
/// the query's own path and ignored paths.
///
/// An empty list means the query simply has no matches; the absent-signature
/// case is the caller's to handle before asking.
pub fn find_duplicates(store: &FingerprintStore, query: &Signature) -> Vec<(u32, PathBuf)> {
    let mut matches = Vec::new();
    for candidate in store.signatures() {
        if candidate.path() == query.path() || store.is_ignored(candidate.path()) {
            continue;
        }
        let distance = signature::distance(query, candidate);
        if distance <= store.max_distance() {
            matches.push((distance, candidate.path().to_path_buf()));
        }
    }
    matches
}
