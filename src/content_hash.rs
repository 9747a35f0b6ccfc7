use log::{debug, info, warn};
use serde::Serialize;
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use std::fs::{self, File};
use std::io::{ErrorKind, Read};
use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use crate::db::{Catalog, HashState, Photo};
use crate::db_types::observed_mtime;
use crate::error::{VaultError, VaultResult};
use crate::sync_state::CancelToken;

/// Streams a file through SHA-256 in `chunk_size` pieces, checking `cancel`
/// between chunks. Returns the lowercase hex digest.
pub fn hash_file(path: &Path, chunk_size: usize, cancel: Option<&CancelToken>) -> VaultResult<String> {
    let mut file = File::open(path)?;
    let mut hasher = Sha256::new();
    let mut buffer = vec![0u8; chunk_size.max(1)];

    loop {
        if let Some(cancel) = cancel {
            cancel.check()?;
        }
        let read = match file.read(&mut buffer) {
            Ok(0) => break,
            Ok(n) => n,
            Err(e) if e.kind() == ErrorKind::Interrupted => continue,
            Err(e) => return Err(e.into()),
        };
        hasher.update(&buffer[..read]);
    }

    Ok(format!("{:x}", hasher.finalize()))
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DuplicateGroup {
    pub hash: String,
    pub photos: Vec<Photo>,
    /// File size of one member; all members share content.
    pub size: u64,
    pub reclaimable_bytes: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HashOutcome {
    Hashed,
    /// Unreadable; marked Unknown.
    Unknown,
    /// Already hashed, or the file changed under us and must be rescanned first.
    Skipped,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct HashReport {
    pub hashed: u64,
    pub unknown: u64,
    pub skipped: u64,
    pub cancelled: bool,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Content hashes of cataloged photos and the duplicate groups derived from them.
#[derive(Clone)]
pub struct ContentHashIndex {
    catalog: Catalog,
    chunk_size: usize,
    duplicates: Arc<Mutex<Option<(u64, Vec<DuplicateGroup>)>>>,
}

impl ContentHashIndex {
    pub fn new(catalog: Catalog, chunk_size: usize) -> Self {
        Self {
            catalog,
            chunk_size,
            duplicates: Arc::new(Mutex::new(None)),
        }
    }

    fn observation_matches(path: &Path, size: i64, mtime: &chrono::DateTime<chrono::Utc>) -> bool {
        match fs::metadata(path) {
            Ok(metadata) => {
                i64::try_from(metadata.len()).ok() == Some(size)
                    && metadata.modified().map(observed_mtime).ok().as_ref() == Some(mtime)
            }
            Err(_) => false,
        }
    }

    pub fn compute_hash(&self, photo_id: i64, root: &Path, cancel: &CancelToken) -> VaultResult<HashOutcome> {
        let photo = self
            .catalog
            .find_by_id(photo_id)?
            .ok_or_else(|| VaultError::NotFound(format!("photo {}", photo_id)))?;
        if photo.hash_state != HashState::Stale {
            return Ok(HashOutcome::Skipped);
        }
        self.hash_photo(&photo, root, cancel)
    }

    fn hash_photo(&self, photo: &Photo, root: &Path, cancel: &CancelToken) -> VaultResult<HashOutcome> {
        let (Some(size), Some(mtime)) = (photo.file_size, photo.file_modified) else {
            self.catalog.mark_hash_unknown(photo.id)?;
            return Ok(HashOutcome::Unknown);
        };

        let path = root.join(&photo.path);
        if !Self::observation_matches(&path, size, &mtime) {
            if cancel.is_cancelled() {
                return Err(VaultError::Cancelled);
            }
            if !path.exists() {
                warn!("Cannot hash {}: file is gone", photo.path);
                self.catalog.mark_hash_unknown(photo.id)?;
                return Ok(HashOutcome::Unknown);
            }
            debug!("{} changed since it was scanned, leaving hash stale", photo.path);
            return Ok(HashOutcome::Skipped);
        }

        let hash = match hash_file(&path, self.chunk_size, Some(cancel)) {
            Ok(hash) => hash,
            Err(VaultError::Cancelled) => return Err(VaultError::Cancelled),
            // A drive vanishing mid-read surfaces as an I/O error.
            Err(_) if cancel.is_cancelled() => return Err(VaultError::Cancelled),
            Err(e) => {
                warn!("Hashing {} failed: {}", photo.path, VaultError::Hash(e.to_string()));
                self.catalog.mark_hash_unknown(photo.id)?;
                return Ok(HashOutcome::Unknown);
            }
        };

        if !Self::observation_matches(&path, size, &mtime) {
            debug!("{} changed while hashing, discarding", photo.path);
            return Ok(HashOutcome::Skipped);
        }

        if self.catalog.set_content_hash(photo.id, &hash, size, &mtime)? {
            Ok(HashOutcome::Hashed)
        } else {
            Ok(HashOutcome::Skipped)
        }
    }

    /// Hashes every Stale photo. Stops early, leaving the rest Stale, once `cancel` trips.
    pub fn hash_pending(&self, root: &Path, cancel: &CancelToken) -> VaultResult<HashReport> {
        let pending = self.catalog.photos_needing_hash()?;
        let mut report = HashReport::default();
        if pending.is_empty() {
            return Ok(report);
        }

        info!("Hashing {} photos", pending.len());
        for photo in &pending {
            match self.hash_photo(photo, root, cancel) {
                Ok(HashOutcome::Hashed) => report.hashed += 1,
                Ok(HashOutcome::Unknown) => report.unknown += 1,
                Ok(HashOutcome::Skipped) => report.skipped += 1,
                Err(VaultError::Cancelled) => {
                    report.cancelled = true;
                    break;
                }
                Err(e) => return Err(e),
            }
        }

        info!(
            "Hashing finished: {} hashed, {} unreadable, {} skipped{}",
            report.hashed,
            report.unknown,
            report.skipped,
            if report.cancelled { ", cancelled" } else { "" }
        );
        Ok(report)
    }

    /// Groups of two or more photos sharing a hash, largest reclaimable first.
    /// Cached until the catalog generation moves.
    pub fn find_duplicates(&self) -> VaultResult<Vec<DuplicateGroup>> {
        let generation = self.catalog.generation();
        if let Some((cached_generation, groups)) = lock(&self.duplicates).as_ref() {
            if *cached_generation == generation {
                return Ok(groups.clone());
            }
        }

        let mut by_hash: BTreeMap<String, Vec<Photo>> = BTreeMap::new();
        for photo in self.catalog.list_hashed_photos()? {
            if let Some(hash) = photo.content_hash.clone() {
                by_hash.entry(hash).or_default().push(photo);
            }
        }

        let mut groups: Vec<DuplicateGroup> = by_hash
            .into_iter()
            .filter(|(_, photos)| photos.len() >= 2)
            .map(|(hash, photos)| {
                let size = photos[0].file_size.unwrap_or(0).max(0) as u64;
                let reclaimable_bytes = (photos.len() as u64 - 1) * size;
                DuplicateGroup {
                    hash,
                    photos,
                    size,
                    reclaimable_bytes,
                }
            })
            .collect();
        groups.sort_by(|a, b| {
            b.reclaimable_bytes
                .cmp(&a.reclaimable_bytes)
                .then_with(|| a.hash.cmp(&b.hash))
        });

        *lock(&self.duplicates) = Some((generation, groups.clone()));
        Ok(groups)
    }

    /// Deletes duplicate copies from the catalog and from disk; returns bytes freed.
    /// Every id must belong to a duplicate group and every group must keep at
    /// least one member, otherwise nothing is deleted. Files are removed after
    /// the catalog commit.
    pub fn delete_duplicates(&self, photo_ids: &[i64], root: &Path) -> VaultResult<u64> {
        if photo_ids.is_empty() {
            return Ok(0);
        }

        let outcome = self.catalog.delete_duplicate_photos(photo_ids)?;
        for path in &outcome.removed_paths {
            match fs::remove_file(root.join(path)) {
                Ok(()) => debug!("Removed duplicate {}", path),
                Err(e) if e.kind() == ErrorKind::NotFound => {}
                Err(e) => warn!("Catalog entry removed but file {} remains: {}", path, e),
            }
        }

        info!(
            "Deleted {} duplicates, {} bytes freed",
            outcome.removed_ids.len(),
            outcome.bytes_freed
        );
        Ok(outcome.bytes_freed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::tests::test_catalog;
    use crate::indexer::LibraryScanner;
    use crate::sync_state::SyncState;
    use tempfile::TempDir;

    fn token() -> CancelToken {
        CancelToken::new(SyncState::new())
    }

    fn indexed_library(files: &[(&str, Vec<u8>)]) -> (TempDir, Catalog, ContentHashIndex) {
        let dir = TempDir::new().unwrap();
        for (name, content) in files {
            fs::write(dir.path().join(name), content).unwrap();
        }
        let catalog = test_catalog();
        LibraryScanner::new(catalog.clone())
            .scan(dir.path(), &token())
            .unwrap();
        let index = ContentHashIndex::new(catalog.clone(), 7);
        index.hash_pending(dir.path(), &token()).unwrap();
        (dir, catalog, index)
    }

    #[test]
    fn test_hash_file_is_chunk_size_independent() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("data.bin");
        fs::write(&path, vec![42u8; 10_000]).unwrap();

        let small = hash_file(&path, 3, None).unwrap();
        let large = hash_file(&path, 65536, None).unwrap();
        assert_eq!(small, large);
        assert_eq!(small.len(), 64);
    }

    #[test]
    fn test_one_byte_difference_is_not_a_duplicate() {
        let mut other = vec![1u8; 100];
        other[99] = 2;
        let (_dir, _catalog, index) = indexed_library(&[
            ("a.jpg", vec![1u8; 100]),
            ("b.jpg", vec![1u8; 100]),
            ("c.jpg", other),
        ]);

        let groups = index.find_duplicates().unwrap();
        assert_eq!(groups.len(), 1);
        let names: Vec<&str> = groups[0].photos.iter().map(|p| p.filename.as_str()).collect();
        assert_eq!(names, vec!["a.jpg", "b.jpg"]);
        assert_eq!(groups[0].size, 100);
        assert_eq!(groups[0].reclaimable_bytes, 100);
    }

    #[test]
    fn test_delete_duplicates_guards() {
        let (dir, catalog, index) = indexed_library(&[
            ("a.jpg", vec![1u8; 50]),
            ("b.jpg", vec![1u8; 50]),
            ("c.jpg", vec![9u8; 30]),
        ]);
        let a = catalog.find_by_path("a.jpg").unwrap().unwrap().id;
        let b = catalog.find_by_path("b.jpg").unwrap().unwrap().id;
        let c = catalog.find_by_path("c.jpg").unwrap().unwrap().id;

        assert!(matches!(
            index.delete_duplicates(&[c], dir.path()),
            Err(VaultError::InvalidInput(_))
        ));
        assert!(matches!(
            index.delete_duplicates(&[a, b], dir.path()),
            Err(VaultError::InvalidInput(_))
        ));
        assert_eq!(catalog.count_photos().unwrap(), 3);

        assert_eq!(index.delete_duplicates(&[b], dir.path()).unwrap(), 50);
        assert!(!dir.path().join("b.jpg").exists());
        assert!(index.find_duplicates().unwrap().is_empty());
    }

    #[test]
    fn test_concurrent_deletes_keep_one_copy() {
        for _ in 0..10 {
            let dir = TempDir::new().unwrap();
            let db_dir = TempDir::new().unwrap();
            fs::write(dir.path().join("a.jpg"), vec![5u8; 64]).unwrap();
            fs::write(dir.path().join("b.jpg"), vec![5u8; 64]).unwrap();
            let db_path = db_dir.path().join("catalog.db");
            let catalog = Catalog::open(db_path.to_str().unwrap()).unwrap();
            LibraryScanner::new(catalog.clone())
                .scan(dir.path(), &token())
                .unwrap();
            let index = ContentHashIndex::new(catalog.clone(), 16);
            index.hash_pending(dir.path(), &token()).unwrap();
            let a = catalog.find_by_path("a.jpg").unwrap().unwrap().id;
            let b = catalog.find_by_path("b.jpg").unwrap().unwrap().id;

            let results: Vec<VaultResult<u64>> = std::thread::scope(|scope| {
                let first = scope.spawn(|| index.delete_duplicates(&[a], dir.path()));
                let second = scope.spawn(|| index.delete_duplicates(&[b], dir.path()));
                vec![first.join().unwrap(), second.join().unwrap()]
            });

            assert_eq!(results.iter().filter(|r| r.is_ok()).count(), 1);
            assert!(results
                .iter()
                .any(|r| matches!(r, Err(VaultError::InvalidInput(_)))));
            assert_eq!(catalog.count_photos().unwrap(), 1);
            assert_eq!(fs::read_dir(dir.path()).unwrap().count(), 1);
        }
    }

    #[test]
    fn test_delete_duplicates_unknown_id_is_not_found() {
        let (dir, catalog, index) = indexed_library(&[
            ("a.jpg", vec![1u8; 50]),
            ("b.jpg", vec![1u8; 50]),
        ]);
        let b = catalog.find_by_path("b.jpg").unwrap().unwrap().id;

        assert!(matches!(
            index.delete_duplicates(&[b, 9999], dir.path()),
            Err(VaultError::NotFound(_))
        ));
        assert_eq!(catalog.count_photos().unwrap(), 2);
        assert!(dir.path().join("b.jpg").exists());
    }

    #[test]
    fn test_unreadable_file_becomes_unknown() {
        let (dir, catalog, index) = indexed_library(&[("a.jpg", vec![1u8; 10])]);
        let photo = catalog.find_by_path("a.jpg").unwrap().unwrap();
        assert_eq!(photo.hash_state, HashState::Known);

        // Simulate a changed file the catalog has not caught up with yet.
        fs::write(dir.path().join("a.jpg"), vec![2u8; 20]).unwrap();
        LibraryScanner::new(catalog.clone())
            .scan(dir.path(), &token())
            .unwrap();
        fs::remove_file(dir.path().join("a.jpg")).unwrap();

        let outcome = index.compute_hash(photo.id, dir.path(), &token()).unwrap();
        assert_eq!(outcome, HashOutcome::Unknown);
        assert_eq!(
            catalog.find_by_id(photo.id).unwrap().unwrap().hash_state,
            HashState::Unknown
        );
    }

    #[test]
    fn test_cancelled_hash_leaves_photo_stale() {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join("a.jpg"), vec![1u8; 10]).unwrap();
        let catalog = test_catalog();
        LibraryScanner::new(catalog.clone())
            .scan(dir.path(), &token())
            .unwrap();

        let cancelled = token();
        cancelled.cancel();
        let report = ContentHashIndex::new(catalog.clone(), 4)
            .hash_pending(dir.path(), &cancelled)
            .unwrap();
        assert!(report.cancelled);
        assert_eq!(catalog.photos_needing_hash().unwrap().len(), 1);
    }
}
