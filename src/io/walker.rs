use log::debug;
use std::fs;
use std::path::{Path, PathBuf};
use walkdir::WalkDir;

use crate::diagnostics::{Diagnostics, Finding};
use crate::error::{DatasetError, Result};

/// Returns every directory exactly `level` steps below `root`.
///
/// `level = 1` gives the immediate subdirectories. Files are never
/// returned and directories that cannot be read are skipped. No ordering
/// is guaranteed; callers needing numeric order sort by extracted id.
pub fn list_child_folders<P: AsRef<Path>>(root: P, level: usize) -> Vec<PathBuf> {
    let root = root.as_ref();
    if level == 0 {
        return Vec::new();
    }
    let folders: Vec<PathBuf> = WalkDir::new(root)
        .follow_links(true)
        .min_depth(level)
        .max_depth(level)
        .into_iter()
        .filter_map(|entry| match entry {
            Ok(entry) => Some(entry),
            Err(e) => {
                debug!("skipping unreadable entry below {}: {}", root.display(), e);
                None
            }
        })
        .filter(|e| e.file_type().is_dir())
        .map(walkdir::DirEntry::into_path)
        .collect();
    debug!(
        "{} folders at level {} below {}",
        folders.len(),
        level,
        root.display()
    );
    folders
}

/// First immediate subfolder (in name order) whose name contains `token`.
pub fn find_child_folder<P: AsRef<Path>>(root: P, token: &str) -> Option<PathBuf> {
    let mut children = list_child_folders(root, 1);
    children.sort();
    children.into_iter().find(|p| file_name(p).contains(token))
}

/// Files directly inside `dir` with the given extension (case-insensitive), in name order.
pub fn list_files<P: AsRef<Path>>(dir: P, extension: &str) -> Result<Vec<PathBuf>> {
    let dir = dir.as_ref();
    let entries = fs::read_dir(dir).map_err(|e| DatasetError::io(dir, e))?;

    let mut files: Vec<PathBuf> = entries
        .filter_map(|e| e.ok())
        .map(|e| e.path())
        .filter(|p| p.is_file() && has_extension(p, extension))
        .collect();
    files.sort();
    Ok(files)
}

/// `root` and every directory below it, parents before children,
/// siblings in name order. Unreadable directories are recorded in `diag`
/// and their subtree is skipped.
pub fn walk_folders<P: AsRef<Path>>(root: P, diag: &mut Diagnostics) -> Vec<PathBuf> {
    let root = root.as_ref();
    let walker = WalkDir::new(root)
        .follow_links(true)
        .sort_by_file_name()
        .into_iter()
        .filter_entry(|e| e.file_type().is_dir());

    let mut folders = Vec::new();
    for entry in walker {
        match entry {
            Ok(entry) => folders.push(entry.into_path()),
            Err(e) => diag.record(Finding::UnreadableFolder {
                path: e.path().unwrap_or(root).to_path_buf(),
                reason: e.to_string(),
            }),
        }
    }
    folders
}

pub fn has_extension(path: &Path, extension: &str) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .map(|e| e.eq_ignore_ascii_case(extension.trim_start_matches('.')))
        .unwrap_or(false)
}

/// Final path component as UTF-8, empty if absent.
pub fn file_name(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default()
}
