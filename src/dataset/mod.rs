pub mod integrity_check;
pub mod scanner;
pub mod ultrasound;

use image::DynamicImage;
use log::{debug, info};
use std::path::{Path, PathBuf};

use crate::config::DatasetConfig;
use crate::diagnostics::{Diagnostics, Finding};
use crate::error::{DatasetError, Result};
use crate::io::naming::IndexedFiles;
use crate::io::walker::{file_name, list_files};

pub use scanner::{
    load_transformation_matrix, Hemisphere, HemisphereScan, ImageState, Modality,
    ModalityImages, PoseRecord, ScanSlot, ScannerDataset,
};
pub use ultrasound::{PointMetadata, SignalRecord, UltrasoundDataset, UltrasoundPoint};

/// Acquisition platform of a sample.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Platform {
    Ultrasound,
    Scanner,
}

impl Platform {
    /// Accepts `ultrasound`/`us`/`UltrasoundPlatform` and
    /// `scanner`/`ScannerPlatform`, case-insensitive.
    pub fn parse(token: &str) -> Option<Self> {
        match token.trim().to_ascii_lowercase().as_str() {
            "ultrasound" | "us" | "ultrasoundplatform" => Some(Platform::Ultrasound),
            "scanner" | "scannerplatform" => Some(Platform::Scanner),
            _ => None,
        }
    }

    /// Comma-separated platform list. Unknown tokens are ignored and
    /// duplicates collapse, first occurrence order kept.
    pub fn parse_list(list: &str) -> Vec<Self> {
        let mut platforms = Vec::new();
        for token in list.split(',').filter(|t| !t.trim().is_empty()) {
            match Platform::parse(token) {
                Some(p) if !platforms.contains(&p) => platforms.push(p),
                Some(_) => {}
                None => debug!("ignoring unknown platform '{}'", token.trim()),
            }
        }
        platforms
    }
}

/// One image file, identified by its numeric index. Pixels are read on demand.
#[derive(Debug, Clone, PartialEq)]
pub struct ImageRecord {
    pub id: u32,
    pub path: PathBuf,
}

impl ImageRecord {
    pub fn new(id: u32, path: impl Into<PathBuf>) -> Self {
        Self {
            id,
            path: path.into(),
        }
    }

    pub fn file_name(&self) -> String {
        file_name(&self.path)
    }

    pub fn open(&self) -> Result<DynamicImage> {
        Ok(image::open(&self.path)?)
    }
}

/// In-memory projection of one sample, rebuilt from disk on every load.
#[derive(Debug, Clone)]
pub struct Dataset {
    pub sample_id: String,
    pub path: PathBuf,
    pub ultrasound: Option<UltrasoundDataset>,
    pub scanner: Option<ScannerDataset>,
}

/// Assembles a [`Dataset`] from the sample folder tree.
pub struct DatasetLoader<'a> {
    config: &'a DatasetConfig,
}

impl<'a> DatasetLoader<'a> {
    pub fn new(config: &'a DatasetConfig) -> Self {
        Self { config }
    }

    /// Loads the requested platforms of `<data_path>/<sample_id>`.
    ///
    /// Only a missing sample folder is an error. Absent subfolders yield
    /// empty collections; naming irregularities and partial scans are
    /// recorded in `diag`.
    pub fn load<P: AsRef<Path>>(
        &self,
        data_path: P,
        sample_id: &str,
        platforms: &[Platform],
        diag: &mut Diagnostics,
    ) -> Result<Dataset> {
        let sample_path = data_path.as_ref().join(sample_id);
        if !sample_path.is_dir() {
            return Err(DatasetError::NotFound(sample_path));
        }
        debug!("loading {} platforms for sample {}", platforms.len(), sample_id);

        let mut dataset = Dataset {
            sample_id: sample_id.to_string(),
            path: sample_path.clone(),
            ultrasound: None,
            scanner: None,
        };

        for platform in platforms {
            match platform {
                Platform::Ultrasound => {
                    let us = ultrasound::load_ultrasound(&sample_path, self.config, diag);
                    debug!(
                        "ultrasound: {} signals, {} images, {} labels",
                        us.signals.len(),
                        us.images.len(),
                        us.metadata.len()
                    );
                    dataset.ultrasound = Some(us);
                }
                Platform::Scanner => {
                    let scanner = scanner::load_scanner(&sample_path, self.config, diag);
                    debug!(
                        "scanner: top {} scans, bottom {} scans",
                        scanner.top.color.original.len(),
                        scanner.bottom.color.original.len()
                    );
                    dataset.scanner = Some(scanner);
                }
            }
        }

        info!("Data loaded for sample {}", sample_id);
        Ok(dataset)
    }
}

/// Lists and indexes one collection folder, reporting every irregularity.
///
/// A missing or unreadable folder gives an empty index.
pub(crate) fn index_folder<F>(
    folder: Option<&Path>,
    context: &str,
    extension: &str,
    accept: impl Fn(&str) -> bool,
    extractor: F,
    diag: &mut Diagnostics,
) -> IndexedFiles
where
    F: Fn(&Path) -> Result<u32>,
{
    let Some(folder) = folder else {
        return IndexedFiles::default();
    };
    let files = match list_files(folder, extension) {
        Ok(files) => files,
        Err(DatasetError::NotFound(path)) => {
            diag.record(Finding::MissingFolder {
                context: context.to_string(),
                path,
            });
            return IndexedFiles::default();
        }
        Err(e) => {
            diag.record(Finding::SkippedFile {
                path: folder.to_path_buf(),
                reason: e.to_string(),
            });
            return IndexedFiles::default();
        }
    };
    let files: Vec<PathBuf> = files
        .into_iter()
        .filter(|p| accept(&file_name(p)))
        .collect();

    let indexed = IndexedFiles::build(&files, extractor);
    for (id, kept, dropped) in &indexed.duplicates {
        diag.record(Finding::DuplicateId {
            context: context.to_string(),
            id: *id,
            kept: kept.clone(),
            dropped: dropped.clone(),
        });
    }
    for path in &indexed.unidentified {
        diag.record(Finding::UnidentifiedFile(path.clone()));
    }
    let gaps = indexed.gaps();
    if !gaps.is_empty() {
        diag.record(Finding::NonContiguousIds {
            context: context.to_string(),
            missing: gaps,
        });
    }
    indexed
}

/// `Some(folder)` if it exists, otherwise records it as missing.
pub(crate) fn require_folder(
    folder: Option<PathBuf>,
    expected: &Path,
    context: &str,
    diag: &mut Diagnostics,
) -> Option<PathBuf> {
    match folder {
        Some(f) if f.is_dir() => Some(f),
        _ => {
            diag.record(Finding::MissingFolder {
                context: context.to_string(),
                path: expected.to_path_buf(),
            });
            None
        }
    }
}
