//! Moves and renames photos on the primary drive. Files are renamed first and
//! the catalog follows in one transaction; if either step fails the renames
//! already done are undone.

use log::{info, warn};
use std::collections::HashSet;
use std::fs;
use std::path::{Component, Path};

use crate::db::{Catalog, PathChange, Photo};
use crate::drive_monitor::{create_dirs_beneath, is_internal_file};
use crate::error::{VaultError, VaultResult};
use crate::mimetype_detector;

/// A bare file name for a photo: no separators, not internal, and of a format
/// the library catalogs.
pub fn validate_file_name(name: &str) -> VaultResult<String> {
    let name = name.trim();
    if name.is_empty() || name == "." || name == ".." {
        return Err(VaultError::InvalidInput("file name must not be empty".to_string()));
    }
    if name.contains('/') || name.contains('\\') {
        return Err(VaultError::InvalidInput(format!(
            "file name must not contain a path separator: {}",
            name
        )));
    }
    if is_internal_file(name) {
        return Err(VaultError::InvalidInput(format!("{} is a reserved name", name)));
    }
    if !mimetype_detector::is_supported_image(Path::new(name)) {
        return Err(VaultError::InvalidInput(format!(
            "{} does not have a supported image extension",
            name
        )));
    }
    Ok(name.to_string())
}

/// Normalizes a target directory to a `/`-separated path relative to `root`.
/// Absolute paths must lie inside the root; the empty string is the root itself.
pub fn validate_target_dir(root: &Path, dir: &str) -> VaultResult<String> {
    let dir = dir.trim();
    let path = Path::new(dir);
    let relative = if path.is_absolute() {
        path.strip_prefix(root).map_err(|_| {
            VaultError::InvalidInput(format!("{} is outside the primary drive", dir))
        })?
    } else {
        path
    };

    let mut parts = Vec::new();
    for component in relative.components() {
        match component {
            Component::Normal(part) => {
                let part = part.to_string_lossy();
                if is_internal_file(&part) {
                    return Err(VaultError::InvalidInput(format!("{} is a reserved name", part)));
                }
                parts.push(part.to_string());
            }
            Component::CurDir => {}
            _ => {
                return Err(VaultError::InvalidInput(format!(
                    "target directory must stay inside the primary drive: {}",
                    dir
                )))
            }
        }
    }
    Ok(parts.join("/"))
}

pub fn join_relative(dir: &str, name: &str) -> String {
    if dir.is_empty() {
        name.to_string()
    } else {
        format!("{}/{}", dir, name)
    }
}

/// Photo file names are unique per directory, so the target path of a move
/// keeps the file name.
pub fn move_target(photo: &Photo, target_dir: &str) -> String {
    join_relative(target_dir, &photo.filename)
}

pub fn rename_target(photo: &Photo, new_name: &str) -> String {
    match photo.path.rsplit_once('/') {
        Some((dir, _)) => join_relative(dir, new_name),
        None => new_name.to_string(),
    }
}

struct Done {
    from: String,
    to: String,
}

fn undo(root: &Path, done: &[Done]) {
    for step in done.iter().rev() {
        if let Err(e) = fs::rename(root.join(&step.to), root.join(&step.from)) {
            warn!("Could not move {} back to {}: {}", step.to, step.from, e);
        }
    }
}

/// Applies `(photo, new relative path)` pairs. Pairs whose path does not change
/// are returned as they are.
pub fn relocate(catalog: &Catalog, root: &Path, moves: Vec<(Photo, String)>) -> VaultResult<Vec<Photo>> {
    let mut unchanged = Vec::new();
    let mut pending = Vec::new();
    for (photo, to) in moves {
        if photo.path == to {
            unchanged.push(photo);
        } else {
            pending.push((photo, to));
        }
    }

    let mut targets = HashSet::new();
    for (photo, to) in &pending {
        if !targets.insert(to.as_str()) {
            return Err(VaultError::Conflict(format!("two photos cannot both move to {}", to)));
        }
        if photo.is_missing || !root.join(&photo.path).is_file() {
            return Err(VaultError::NotFound(format!(
                "{} is not on the primary drive",
                photo.path
            )));
        }
        if fs::symlink_metadata(root.join(to)).is_ok() {
            return Err(VaultError::Conflict(format!("{} already exists", to)));
        }
    }

    let mut done = Vec::with_capacity(pending.len());
    for (photo, to) in &pending {
        let parent = Path::new(to).parent().unwrap_or_else(|| Path::new(""));
        let renamed = create_dirs_beneath(root, parent)
            .and_then(|_| fs::rename(root.join(&photo.path), root.join(to)));
        if let Err(e) = renamed {
            undo(root, &done);
            return Err(e.into());
        }
        done.push(Done {
            from: photo.path.clone(),
            to: to.clone(),
        });
    }

    let changes: Vec<PathChange> = pending
        .iter()
        .map(|(photo, to)| PathChange {
            photo_id: photo.id,
            to: to.clone(),
        })
        .collect();
    let mut moved = match catalog.relocate_photos(&changes) {
        Ok(moved) => moved,
        Err(e) => {
            undo(root, &done);
            return Err(e);
        }
    };

    for step in &done {
        info!("Moved {} to {}", step.from, step.to);
    }
    moved.extend(unchanged);
    Ok(moved)
}
