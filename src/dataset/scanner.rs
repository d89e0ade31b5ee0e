use log::debug;
use nalgebra::Matrix4;
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};

use super::{index_folder, require_folder, ImageRecord};
use crate::config::DatasetConfig;
use crate::diagnostics::{Diagnostics, Finding};
use crate::error::{DatasetError, Result};
use crate::io::naming::{extract_path_id, IdPairing};
use crate::io::walker::find_child_folder;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Hemisphere {
    Top,
    Bottom,
}

impl Hemisphere {
    pub const ALL: [Hemisphere; 2] = [Hemisphere::Top, Hemisphere::Bottom];

    pub fn token(&self) -> &'static str {
        match self {
            Hemisphere::Top => "top",
            Hemisphere::Bottom => "bottom",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Modality {
    Color,
    Depth,
}

impl Modality {
    pub const ALL: [Modality; 2] = [Modality::Color, Modality::Depth];

    pub fn token(&self) -> &'static str {
        match self {
            Modality::Color => "color",
            Modality::Depth => "depth",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ImageState {
    Original,
    Segmented,
}

impl ImageState {
    pub const ALL: [ImageState; 2] = [ImageState::Original, ImageState::Segmented];

    pub fn token(&self) -> &'static str {
        match self {
            ImageState::Original => "original",
            ImageState::Segmented => "segmented",
        }
    }
}

/// `IMG_<modality>_<state>`, the folder and file prefix of one image sequence.
pub fn image_folder_name(modality: Modality, state: ImageState) -> String {
    format!("IMG_{}_{}", modality.token(), state.token())
}

/// Column of the per-hemisphere pairing table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ScanSlot {
    ColorOriginal,
    ColorSegmented,
    DepthOriginal,
    DepthSegmented,
    Pose,
}

impl ScanSlot {
    pub const ALL: [ScanSlot; 5] = [
        ScanSlot::ColorOriginal,
        ScanSlot::ColorSegmented,
        ScanSlot::DepthOriginal,
        ScanSlot::DepthSegmented,
        ScanSlot::Pose,
    ];

    pub fn image(modality: Modality, state: ImageState) -> Self {
        match (modality, state) {
            (Modality::Color, ImageState::Original) => ScanSlot::ColorOriginal,
            (Modality::Color, ImageState::Segmented) => ScanSlot::ColorSegmented,
            (Modality::Depth, ImageState::Original) => ScanSlot::DepthOriginal,
            (Modality::Depth, ImageState::Segmented) => ScanSlot::DepthSegmented,
        }
    }
}

impl fmt::Display for ScanSlot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ScanSlot::ColorOriginal => "color/original",
            ScanSlot::ColorSegmented => "color/segmented",
            ScanSlot::DepthOriginal => "depth/original",
            ScanSlot::DepthSegmented => "depth/segmented",
            ScanSlot::Pose => "pose",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct ModalityImages {
    pub original: Vec<ImageRecord>,
    pub segmented: Vec<ImageRecord>,
}

impl ModalityImages {
    pub fn get(&self, state: ImageState) -> &[ImageRecord] {
        match state {
            ImageState::Original => &self.original,
            ImageState::Segmented => &self.segmented,
        }
    }

    fn get_mut(&mut self, state: ImageState) -> &mut Vec<ImageRecord> {
        match state {
            ImageState::Original => &mut self.original,
            ImageState::Segmented => &mut self.segmented,
        }
    }
}

/// Camera pose of one scan index.
#[derive(Debug, Clone, PartialEq)]
pub struct PoseRecord {
    pub id: u32,
    pub path: PathBuf,
    pub matrix: Matrix4<f64>,
}

/// All sequences of one hemisphere, each ordered by scan index.
#[derive(Debug, Clone, PartialEq)]
pub struct HemisphereScan {
    pub hemisphere: Hemisphere,
    pub folder: Option<PathBuf>,
    pub color: ModalityImages,
    pub depth: ModalityImages,
    pub poses: Vec<PoseRecord>,
}

impl HemisphereScan {
    pub fn new(hemisphere: Hemisphere) -> Self {
        Self {
            hemisphere,
            folder: None,
            color: ModalityImages::default(),
            depth: ModalityImages::default(),
            poses: Vec::new(),
        }
    }

    pub fn images(&self, modality: Modality) -> &ModalityImages {
        match modality {
            Modality::Color => &self.color,
            Modality::Depth => &self.depth,
        }
    }

    fn images_mut(&mut self, modality: Modality) -> &mut ModalityImages {
        match modality {
            Modality::Color => &mut self.color,
            Modality::Depth => &mut self.depth,
        }
    }

    /// Scan index -> file per slot.
    pub fn pairing(&self) -> IdPairing<ScanSlot> {
        let mut pairing = IdPairing::new(ScanSlot::ALL);
        for modality in Modality::ALL {
            for state in ImageState::ALL {
                let slot = ScanSlot::image(modality, state);
                for record in self.images(modality).get(state) {
                    pairing.insert(record.id, slot, record.path.clone());
                }
            }
        }
        for pose in &self.poses {
            pairing.insert(pose.id, ScanSlot::Pose, pose.path.clone());
        }
        pairing
    }

    /// Scan indices present in all four image sequences and the poses.
    pub fn complete_scans(&self) -> Vec<u32> {
        self.pairing().complete_ids()
    }

    pub fn pose(&self, id: u32) -> Option<&PoseRecord> {
        self.poses.iter().find(|p| p.id == id)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ScannerDataset {
    pub folder: Option<PathBuf>,
    pub top: HemisphereScan,
    pub bottom: HemisphereScan,
}

impl ScannerDataset {
    pub fn empty() -> Self {
        Self {
            folder: None,
            top: HemisphereScan::new(Hemisphere::Top),
            bottom: HemisphereScan::new(Hemisphere::Bottom),
        }
    }

    pub fn get(&self, hemisphere: Hemisphere) -> &HemisphereScan {
        match hemisphere {
            Hemisphere::Top => &self.top,
            Hemisphere::Bottom => &self.bottom,
        }
    }

    fn get_mut(&mut self, hemisphere: Hemisphere) -> &mut HemisphereScan {
        match hemisphere {
            Hemisphere::Top => &mut self.top,
            Hemisphere::Bottom => &mut self.bottom,
        }
    }
}

/// Reads a 4x4 transform stored as a JSON array of rows.
pub fn load_transformation_matrix<P: AsRef<Path>>(path: P) -> Result<Matrix4<f64>> {
    let path = path.as_ref();
    let text = fs::read_to_string(path).map_err(|e| DatasetError::io(path, e))?;
    let rows: Vec<Vec<f64>> =
        serde_json::from_str(&text).map_err(|e| DatasetError::MalformedMetadata {
            path: path.to_path_buf(),
            source: e,
        })?;

    if rows.len() != 4 || rows.iter().any(|r| r.len() != 4) {
        return Err(DatasetError::InvalidMatrix {
            path: path.to_path_buf(),
            reason: format!(
                "expected 4x4, found {} rows of lengths {:?}",
                rows.len(),
                rows.iter().map(|r| r.len()).collect::<Vec<_>>()
            ),
        });
    }
    Ok(Matrix4::from_fn(|r, c| rows[r][c]))
}

/// Pose folder of a hemisphere: its own `CAMERA_poses` if present,
/// otherwise the one shared at scanner level.
pub(crate) fn pose_folder(
    hemisphere_folder: Option<&Path>,
    scanner_folder: &Path,
    poses_folder: &str,
) -> Option<PathBuf> {
    hemisphere_folder
        .map(|h| h.join(poses_folder))
        .filter(|p| p.is_dir())
        .or_else(|| Some(scanner_folder.join(poses_folder)).filter(|p| p.is_dir()))
}

pub(crate) fn load_scanner(
    sample_path: &Path,
    config: &DatasetConfig,
    diag: &mut Diagnostics,
) -> ScannerDataset {
    let layout = &config.layout;
    let mut dataset = ScannerDataset::empty();

    let expected = sample_path.join(&layout.scanner_folder);
    let Some(scanner_folder) = require_folder(
        find_child_folder(sample_path, &layout.scanner_folder),
        &expected,
        "scanner",
        diag,
    ) else {
        return dataset;
    };

    for hemisphere in Hemisphere::ALL {
        let scan = dataset.get_mut(hemisphere);
        load_hemisphere(scan, &scanner_folder, config, diag);
        report_partial_scans(scan, diag);
    }
    dataset.folder = Some(scanner_folder);
    dataset
}

fn load_hemisphere(
    scan: &mut HemisphereScan,
    scanner_folder: &Path,
    config: &DatasetConfig,
    diag: &mut Diagnostics,
) {
    let hemisphere = scan.hemisphere.token();
    let hemisphere_folder = require_folder(
        find_child_folder(scanner_folder, hemisphere),
        &scanner_folder.join(hemisphere),
        hemisphere,
        diag,
    );

    if let Some(hemisphere_folder) = &hemisphere_folder {
        for modality in Modality::ALL {
            let context = format!("{}/{}", hemisphere, modality.token());
            let type_folder = require_folder(
                find_child_folder(hemisphere_folder, modality.token()),
                &hemisphere_folder.join(format!("IMG_{}", modality.token())),
                &context,
                diag,
            );
            let Some(type_folder) = type_folder else {
                continue;
            };

            for state in ImageState::ALL {
                let name = image_folder_name(modality, state);
                let context = format!("{}/{}/{}", hemisphere, modality.token(), state.token());
                debug!("loading images: {}", context);
                let folder = require_folder(
                    find_child_folder(&type_folder, &name),
                    &type_folder.join(&name),
                    &context,
                    diag,
                );
                let indexed = index_folder(
                    folder.as_deref(),
                    &context,
                    &config.extensions.scanner_image,
                    |_| true,
                    extract_path_id,
                    diag,
                );
                *scan.images_mut(modality).get_mut(state) = indexed
                    .by_id
                    .into_iter()
                    .map(|(id, path)| ImageRecord::new(id, path))
                    .collect();
            }
        }
    }

    let poses = require_folder(
        pose_folder(
            hemisphere_folder.as_deref(),
            scanner_folder,
            &config.layout.poses_folder,
        ),
        &scanner_folder.join(&config.layout.poses_folder),
        &format!("{}/poses", hemisphere),
        diag,
    );
    debug!("loading transformation matrices");
    let token = config.layout.pose_file_token.as_str();
    let indexed = index_folder(
        poses.as_deref(),
        &format!("{}/poses", hemisphere),
        &config.extensions.pose,
        |name| name.contains(token),
        extract_path_id,
        diag,
    );
    for (id, path) in indexed.by_id {
        match load_transformation_matrix(&path) {
            Ok(matrix) => scan.poses.push(PoseRecord { id, path, matrix }),
            Err(e) => diag.record(Finding::MalformedDocument {
                path,
                message: e.to_string(),
            }),
        }
    }

    scan.folder = hemisphere_folder;
}

fn report_partial_scans(scan: &HemisphereScan, diag: &mut Diagnostics) {
    for partial in scan.pairing().partial() {
        diag.record(Finding::PartialScan {
            context: scan.hemisphere.token().to_string(),
            id: partial.id,
            missing: partial.missing.iter().map(|s| s.to_string()).collect(),
        });
    }
}
