use regex::Regex;
use std::collections::{BTreeMap, BTreeSet};
use std::ops::RangeInclusive;
use std::path::{Path, PathBuf};
use std::sync::OnceLock;

use crate::error::{DatasetError, Result};

fn digits() -> &'static Regex {
    static REGEX: OnceLock<Regex> = OnceLock::new();
    REGEX.get_or_init(|| Regex::new(r"[0-9]+").expect("Failed to compile regex"))
}

/// Numeric ID of a file name: the first maximal run of decimal digits.
///
/// `"IMG_depth_original_12.png"` and `"12_anything.json"` both give `12`.
pub fn extract_id(name: &str) -> Result<u32> {
    let run = digits()
        .find(name)
        .ok_or_else(|| DatasetError::NoIdentifierFound(name.to_string()))?;
    run.as_str()
        .parse()
        .map_err(|_| DatasetError::NoIdentifierFound(name.to_string()))
}

/// Numeric ID from the last digit run, e.g. the point number in `"290_14"`.
pub fn extract_last_id(name: &str) -> Result<u32> {
    let run = digits()
        .find_iter(name)
        .last()
        .ok_or_else(|| DatasetError::NoIdentifierFound(name.to_string()))?;
    run.as_str()
        .parse()
        .map_err(|_| DatasetError::NoIdentifierFound(name.to_string()))
}

/// `extract_id` applied to the file name only, never to parent folders.
pub fn extract_path_id(path: &Path) -> Result<u32> {
    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    extract_id(&name)
}

/// Files of one collection keyed by numeric ID.
#[derive(Debug, Default, Clone)]
pub struct IndexedFiles {
    pub by_id: BTreeMap<u32, PathBuf>,
    /// (id, kept, dropped)
    pub duplicates: Vec<(u32, PathBuf, PathBuf)>,
    pub unidentified: Vec<PathBuf>,
}

impl IndexedFiles {
    /// Indexes `files` by `extractor`. On duplicate IDs the file first in name order wins.
    pub fn build<F>(files: &[PathBuf], extractor: F) -> Self
    where
        F: Fn(&Path) -> Result<u32>,
    {
        let mut sorted = files.to_vec();
        sorted.sort();

        let mut indexed = IndexedFiles::default();
        for path in sorted {
            match extractor(&path) {
                Ok(id) => {
                    if let Some(kept) = indexed.by_id.get(&id) {
                        indexed.duplicates.push((id, kept.clone(), path));
                    } else {
                        indexed.by_id.insert(id, path);
                    }
                }
                Err(_) => indexed.unidentified.push(path),
            }
        }
        indexed
    }

    pub fn len(&self) -> usize {
        self.by_id.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_id.is_empty()
    }

    /// Runs of IDs absent from 1..=max.
    pub fn gaps(&self) -> Vec<RangeInclusive<u32>> {
        gaps(self.by_id.keys().copied())
    }
}

/// Missing runs of 1..=max(ids), ascending. One range per run, so the
/// result never holds more than `ids.len()` entries.
pub fn gaps<I: IntoIterator<Item = u32>>(ids: I) -> Vec<RangeInclusive<u32>> {
    let sorted: BTreeSet<u32> = ids.into_iter().collect();
    let mut missing = Vec::new();
    let mut next = 1u32;
    for id in sorted {
        if id > next {
            missing.push(next..=id - 1);
        }
        next = next.max(id.saturating_add(1));
    }
    missing
}

/// An ID that some slots have and others lack.
#[derive(Debug, Clone, PartialEq)]
pub struct PartialMatch<K> {
    pub id: u32,
    pub present: Vec<K>,
    pub missing: Vec<K>,
}

/// Cross-modality pairing table: numeric ID -> file per slot.
///
/// Files are associated by equality of extracted IDs, never by file name,
/// so `img_07.png` and `scan_7_depth.png` land in the same row.
#[derive(Debug, Clone)]
pub struct IdPairing<K: Ord + Copy> {
    slots: Vec<K>,
    rows: BTreeMap<u32, BTreeMap<K, PathBuf>>,
}

impl<K: Ord + Copy> IdPairing<K> {
    pub fn new<I: IntoIterator<Item = K>>(slots: I) -> Self {
        Self {
            slots: slots.into_iter().collect(),
            rows: BTreeMap::new(),
        }
    }

    /// Adds every indexed file of `slot`.
    pub fn add_slot(&mut self, slot: K, files: &IndexedFiles) {
        for (&id, path) in &files.by_id {
            self.insert(id, slot, path.clone());
        }
    }

    pub fn insert(&mut self, id: u32, slot: K, path: PathBuf) {
        self.rows.entry(id).or_default().insert(slot, path);
    }

    pub fn ids(&self) -> impl Iterator<Item = u32> + '_ {
        self.rows.keys().copied()
    }

    pub fn get(&self, id: u32, slot: K) -> Option<&Path> {
        self.rows
            .get(&id)
            .and_then(|row| row.get(&slot))
            .map(|p| p.as_path())
    }

    /// IDs present in every slot, ascending.
    pub fn complete_ids(&self) -> Vec<u32> {
        self.rows
            .iter()
            .filter(|(_, row)| self.slots.iter().all(|s| row.contains_key(s)))
            .map(|(&id, _)| id)
            .collect()
    }

    pub fn partial(&self) -> Vec<PartialMatch<K>> {
        self.rows
            .iter()
            .filter_map(|(&id, row)| {
                let (present, missing): (Vec<K>, Vec<K>) =
                    self.slots.iter().copied().partition(|s| row.contains_key(s));
                if missing.is_empty() {
                    None
                } else {
                    Some(PartialMatch {
                        id,
                        present,
                        missing,
                    })
                }
            })
            .collect()
    }

    pub fn gaps(&self) -> Vec<RangeInclusive<u32>> {
        gaps(self.ids())
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }
}
