use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::Error;
use crate::signature::Signature;

pub const CACHE_FILE: &str = ".fingerprints.bin";
const BACKUP_DIR: &str = ".backup";

/// Persisted shape of the store. Older caches held only the bare signature
/// map; `load_cache` falls back to that shape.
#[derive(Deserialize)]
struct Snapshot {
    #[allow(dead_code)]
    output_dir: PathBuf,
    #[allow(dead_code)]
    ignore: Vec<PathBuf>,
    threshold: f64,
    data: BTreeMap<PathBuf, Signature>,
}

#[derive(Serialize)]
struct SnapshotRef<'a> {
    output_dir: &'a Path,
    ignore: &'a [PathBuf],
    threshold: f64,
    data: &'a BTreeMap<PathBuf, Signature>,
}

/// Persistent mapping from image path to its signature, plus the ignore and
/// threshold policy for duplicate matching.
///
/// Only the coordinating process mutates the store; workers receive it as a
/// read-only snapshot.
pub struct FingerprintStore {
    output_dir: PathBuf,
    backup_dir: PathBuf,
    cache_file: PathBuf,
    ignore: Vec<PathBuf>,
    threshold: f64,
    max_distance: u32,
    data: BTreeMap<PathBuf, Signature>,
}

impl FingerprintStore {
    /// Sets policy and ensures the backup directory exists (idempotent).
    pub fn new(output_dir: &Path, threshold: f64, ignore: Vec<PathBuf>) -> Result<Self, Error> {
        let backup_dir = output_dir.join(BACKUP_DIR);
        fs::create_dir_all(&backup_dir)?;
        Ok(Self {
            output_dir: output_dir.to_path_buf(),
            cache_file: output_dir.join(CACHE_FILE),
            backup_dir,
            ignore,
            threshold,
            max_distance: max_distance_for(threshold),
            data: BTreeMap::new(),
        })
    }

    pub fn backup_dir(&self) -> &Path {
        &self.backup_dir
    }

    pub fn cache_file(&self) -> &Path {
        &self.cache_file
    }

    pub fn threshold(&self) -> f64 {
        self.threshold
    }

    pub fn max_distance(&self) -> u32 {
        self.max_distance
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// `max_distance` is derived from the threshold and never drifts from it.
    pub fn set_threshold(&mut self, threshold: f64) {
        self.threshold = threshold;
        self.max_distance = max_distance_for(threshold);
    }

    /// Restores cached signatures from `cache_file` if present.
    ///
    /// The configuration always comes from the current run; only the
    /// signature data is taken from disk. A cache without the wrapping
    /// metadata is read as a bare signature map (compatibility fallback).
    pub fn load_cache(&mut self) -> Result<(), Error> {
        if !self.cache_file.exists() {
            return Ok(());
        }
        let bytes = fs::read(&self.cache_file)?;
        match bincode::deserialize::<Snapshot>(&bytes) {
            Ok(snapshot) => {
                // Signatures are threshold-independent, so the cache stays
                // valid; the duplicates file carries its own guard.
                if snapshot.threshold != self.threshold {
                    log::warn!(
                        "cache was written at threshold {}, this run uses {}",
                        snapshot.threshold,
                        self.threshold
                    );
                }
                self.data = snapshot.data;
            }
            Err(_) => {
                log::warn!("fingerprint cache has a legacy shape, loading bare signature map");
                self.data =
                    bincode::deserialize(&bytes).map_err(|source| Error::CacheCorrupt {
                        path: self.cache_file.clone(),
                        source,
                    })?;
            }
        }
        log::info!("loaded {} cached fingerprints", self.data.len());
        Ok(())
    }

    /// Writes the cache to a temp file first so a crash mid-write cannot
    /// clobber the previous good snapshot.
    pub fn save(&self) -> Result<(), Error> {
        let snapshot = SnapshotRef {
            output_dir: &self.output_dir,
            ignore: &self.ignore,
            threshold: self.threshold,
            data: &self.data,
        };
        let bytes = bincode::serialize(&snapshot).map_err(Error::CacheEncode)?;
        let tmp = self.cache_file.with_extension("bin.tmp");
        fs::write(&tmp, bytes)?;
        fs::rename(&tmp, &self.cache_file)?;
        Ok(())
    }

    /// Inserting an already-known path is a no-op; first write wins.
    pub fn add(&mut self, signature: Signature) {
        self.data
            .entry(signature.path().to_path_buf())
            .or_insert(signature);
    }

    pub fn find(&self, path: &Path) -> Option<&Signature> {
        self.data.get(path)
    }

    pub fn signatures(&self) -> impl Iterator<Item = &Signature> {
        self.data.values()
    }

    /// Whether `path` is excluded from serving as a candidate duplicate.
    ///
    /// Anything under the backup directory is excluded unconditionally, even
    /// when no ignore prefix covers it. Matching is path-component aware, so
    /// `/foo/ba` does not swallow `/foo/bar`.
    pub fn is_ignored(&self, path: &Path) -> bool {
        path.starts_with(&self.backup_dir)
            || self.ignore.iter().any(|prefix| path.starts_with(prefix))
    }
}

/// Highest unified distance still considered a duplicate at `threshold`.
pub fn max_distance_for(threshold: f64) -> u32 {
    ((1.0 - threshold) * 64.0).ceil() as u32
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::perceptual::compress;
    use crate::signature;
    use tempfile::TempDir;

    fn sig(path: &str, local: Vec<u8>) -> Signature {
        Signature::new(Path::new(path), local, compress(&[50; 81]))
    }

    #[test]
    fn max_distance_follows_the_threshold() {
        assert_eq!(max_distance_for(0.9), 7);
        assert_eq!(max_distance_for(1.0), 0);
        assert_eq!(max_distance_for(0.5), 32);

        let mut previous = u32::MAX;
        for step in 1..=100 {
            let threshold = step as f64 / 100.0;
            let distance = max_distance_for(threshold);
            assert!(distance <= previous, "not monotonic at {threshold}");
            assert!(distance <= 64);
            previous = distance;
        }
    }

    #[test]
    fn creates_the_backup_directory_eagerly() {
        let dir = TempDir::new().unwrap();
        let store = FingerprintStore::new(dir.path(), 0.9, Vec::new()).unwrap();
        assert!(store.backup_dir().is_dir());
        // Idempotent on a second configure.
        FingerprintStore::new(dir.path(), 0.9, Vec::new()).unwrap();
    }

    #[test]
    fn add_keeps_the_first_signature_for_a_path() {
        let dir = TempDir::new().unwrap();
        let mut store = FingerprintStore::new(dir.path(), 0.9, Vec::new()).unwrap();
        let first = sig("/pics/a.jpg", vec![0x00; 8]);
        let second = sig("/pics/a.jpg", vec![0xFF; 8]);
        store.add(first.clone());
        store.add(second);
        assert_eq!(store.len(), 1);
        let stored = store.find(Path::new("/pics/a.jpg")).unwrap();
        assert_eq!(signature::local_distance(stored, &first), 0);
    }

    #[test]
    fn ignores_prefixes_and_the_backup_directory() {
        let dir = TempDir::new().unwrap();
        let store =
            FingerprintStore::new(dir.path(), 0.9, vec![PathBuf::from("/pics/old")]).unwrap();

        assert!(store.is_ignored(Path::new("/pics/old/x.jpg")));
        assert!(!store.is_ignored(Path::new("/pics/new/x.jpg")));
        // Component-aware: a sibling sharing the prefix string is not hit.
        assert!(!store.is_ignored(Path::new("/pics/oldies/x.jpg")));
        // The backup directory is ignored without any explicit entry.
        assert!(store.is_ignored(&store.backup_dir().join("x.jpg")));
    }

    #[test]
    fn set_threshold_recomputes_max_distance() {
        let dir = TempDir::new().unwrap();
        let mut store = FingerprintStore::new(dir.path(), 0.9, Vec::new()).unwrap();
        assert_eq!(store.max_distance(), 7);
        store.set_threshold(0.75);
        assert_eq!(store.threshold(), 0.75);
        assert_eq!(store.max_distance(), 16);
    }

    #[test]
    fn save_then_load_round_trips_the_signature_map() {
        let dir = TempDir::new().unwrap();
        let mut store = FingerprintStore::new(dir.path(), 0.9, Vec::new()).unwrap();
        let a = sig("/pics/a.jpg", vec![0x11; 8]);
        let b = sig("/pics/b.jpg", vec![0x22; 8]);
        store.add(a.clone());
        store.add(b.clone());
        store.save().unwrap();
        assert!(store.cache_file().exists());

        let mut fresh = FingerprintStore::new(dir.path(), 0.9, Vec::new()).unwrap();
        fresh.load_cache().unwrap();
        assert_eq!(fresh.len(), 2);
        let loaded = fresh.find(Path::new("/pics/a.jpg")).unwrap();
        assert_eq!(signature::distance(loaded, &a), 0);
        assert_eq!(signature::local_distance(loaded, &a), 0);
    }

    #[test]
    fn legacy_bare_map_cache_still_loads() {
        let dir = TempDir::new().unwrap();
        let mut legacy = BTreeMap::new();
        legacy.insert(PathBuf::from("/pics/a.jpg"), sig("/pics/a.jpg", vec![0x33; 8]));
        legacy.insert(PathBuf::from("/pics/b.jpg"), sig("/pics/b.jpg", vec![0x44; 8]));
        let bytes = bincode::serialize(&legacy).unwrap();
        std::fs::write(dir.path().join(CACHE_FILE), bytes).unwrap();

        let mut store = FingerprintStore::new(dir.path(), 0.8, Vec::new()).unwrap();
        store.load_cache().unwrap();
        assert_eq!(store.len(), 2);
        // The current run's configuration is kept.
        assert_eq!(store.threshold(), 0.8);
        assert_eq!(store.max_distance(), 13);
    }

    #[test]
    fn cache_from_a_different_threshold_loads_with_current_configuration() {
        let dir = TempDir::new().unwrap();
        let mut store = FingerprintStore::new(dir.path(), 0.9, Vec::new()).unwrap();
        store.add(sig("/pics/a.jpg", vec![0x55; 8]));
        store.save().unwrap();

        let mut fresh = FingerprintStore::new(dir.path(), 0.8, Vec::new()).unwrap();
        fresh.load_cache().unwrap();
        assert_eq!(fresh.len(), 1);
        assert_eq!(fresh.threshold(), 0.8);
        assert_eq!(fresh.max_distance(), 13);
    }

    #[test]
    fn missing_cache_is_not_an_error() {
        let dir = TempDir::new().unwrap();
        let mut store = FingerprintStore::new(dir.path(), 0.9, Vec::new()).unwrap();
        store.load_cache().unwrap();
        assert!(store.is_empty());
    }
}
