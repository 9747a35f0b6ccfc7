use chrono::{DateTime, Utc};
use log::{debug, info, warn};
use std::path::{Path, PathBuf};
use walkdir::WalkDir;

use crate::db_types::observed_mtime;
use crate::mimetype_detector;

#[derive(Debug, Clone)]
pub struct PhotoFile {
    pub path: PathBuf,
    /// Relative to the scan root, `/`-separated.
    pub relative_path: String,
    pub size: u64,
    pub modified: DateTime<Utc>,
}

#[derive(Debug)]
pub enum ScanItem {
    Photo(PhotoFile),
    Unreadable { path: String, reason: String },
}

/// Walks a photo root lazily in a deterministic order (entries sorted by name
/// within each directory, depth first), so that an interrupted walk can resume
/// from the last relative path it reported.
pub struct FileScanner {
    root: PathBuf,
    resume_after: Option<String>,
}

pub fn relative_path(root: &Path, path: &Path) -> Option<String> {
    let relative = path.strip_prefix(root).ok()?;
    let parts: Vec<String> = relative
        .components()
        .map(|c| c.as_os_str().to_string_lossy().to_string())
        .collect();
    if parts.is_empty() {
        None
    } else {
        Some(parts.join("/"))
    }
}

impl FileScanner {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            resume_after: None,
        }
    }

    /// Skips every entry ordered at or before `checkpoint`.
    pub fn resume_after(mut self, checkpoint: Option<String>) -> Self {
        self.resume_after = checkpoint;
        self
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn scan(&self) -> impl Iterator<Item = ScanItem> + '_ {
        if !self.root.exists() {
            warn!("Photo directory does not exist: {}", self.root.display());
        } else {
            info!("Scanning directory: {}", self.root.display());
        }
        if let Some(checkpoint) = &self.resume_after {
            info!("Resuming scan after {}", checkpoint);
        }

        WalkDir::new(&self.root)
            .sort_by_file_name()
            .into_iter()
            .filter_map(move |entry| self.visit(entry))
    }

    fn visit(&self, entry: walkdir::Result<walkdir::DirEntry>) -> Option<ScanItem> {
        let entry = match entry {
            Ok(entry) => entry,
            Err(e) => {
                let path = e
                    .path()
                    .and_then(|p| relative_path(&self.root, p))
                    .unwrap_or_else(|| self.root.display().to_string());
                if self.is_before_checkpoint(&path) {
                    return None;
                }
                return Some(ScanItem::Unreadable {
                    path,
                    reason: e.to_string(),
                });
            }
        };

        if !entry.file_type().is_file() || !mimetype_detector::is_supported_image(entry.path()) {
            return None;
        }

        let relative = relative_path(&self.root, entry.path())?;
        if self.is_before_checkpoint(&relative) {
            return None;
        }

        match entry.metadata() {
            Ok(metadata) => match metadata.modified() {
                Ok(modified) => Some(ScanItem::Photo(PhotoFile {
                    path: entry.path().to_path_buf(),
                    relative_path: relative,
                    size: metadata.len(),
                    modified: observed_mtime(modified),
                })),
                Err(e) => Some(ScanItem::Unreadable {
                    path: relative,
                    reason: e.to_string(),
                }),
            },
            Err(e) => {
                debug!("Cannot stat {}: {}", entry.path().display(), e);
                Some(ScanItem::Unreadable {
                    path: relative,
                    reason: e.to_string(),
                })
            }
        }
    }

    // Component-wise path ordering matches the sorted depth-first walk order.
    fn is_before_checkpoint(&self, relative: &str) -> bool {
        match &self.resume_after {
            Some(checkpoint) => Path::new(relative) <= Path::new(checkpoint.as_str()),
            None => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    fn photo_paths(scanner: &FileScanner) -> Vec<String> {
        scanner
            .scan()
            .filter_map(|item| match item {
                ScanItem::Photo(photo) => Some(photo.relative_path),
                ScanItem::Unreadable { .. } => None,
            })
            .collect()
    }

    fn build_tree() -> TempDir {
        let temp_dir = TempDir::new().unwrap();
        let root = temp_dir.path();
        fs::create_dir_all(root.join("a")).unwrap();
        fs::create_dir_all(root.join("b/nested")).unwrap();
        fs::write(root.join("a.jpg"), b"x").unwrap();
        fs::write(root.join("a/2.png"), b"x").unwrap();
        fs::write(root.join("a/1.jpg"), b"x").unwrap();
        fs::write(root.join("b/nested/3.webp"), b"x").unwrap();
        fs::write(root.join("b/notes.txt"), b"x").unwrap();
        temp_dir
    }

    #[test]
    fn test_walk_order_is_deterministic() {
        let temp_dir = build_tree();
        let scanner = FileScanner::new(temp_dir.path());
        assert_eq!(
            photo_paths(&scanner),
            vec!["a/1.jpg", "a/2.png", "a.jpg", "b/nested/3.webp"]
        );
    }

    #[test]
    fn test_resume_skips_up_to_checkpoint() {
        let temp_dir = build_tree();
        let scanner =
            FileScanner::new(temp_dir.path()).resume_after(Some("a/2.png".to_string()));
        assert_eq!(photo_paths(&scanner), vec!["a.jpg", "b/nested/3.webp"]);
    }

    #[test]
    fn test_relative_path_uses_forward_slashes() {
        let root = Path::new("/photos");
        assert_eq!(
            relative_path(root, Path::new("/photos/2024/trip/img.jpg")),
            Some("2024/trip/img.jpg".to_string())
        );
        assert_eq!(relative_path(root, root), None);
    }
}
