use log::{debug, info};
use nalgebra::Matrix4;
use std::path::{Path, PathBuf};

use crate::config::DatasetConfig;
use crate::dataset::load_transformation_matrix;
use crate::diagnostics::{Diagnostics, Finding};
use crate::error::{DatasetError, Result};
use crate::io::naming::extract_path_id;
use crate::io::pointcloud::PointCloud;
use crate::io::walker::{file_name, list_files, walk_folders};

/// Relative residual of `M * M^-1 - I` above which an inverse is rejected.
const INVERSE_TOLERANCE: f64 = 1e-9;

/// Matrix to apply, inverted when `invert` is set.
///
/// The inverse must be finite and reproduce the identity within a tolerance
/// scaled to both matrices; no absolute determinant threshold applies.
pub fn effective_matrix(matrix: &Matrix4<f64>, invert: bool, source: &Path) -> Result<Matrix4<f64>> {
    if !invert {
        return Ok(*matrix);
    }
    let singular = || DatasetError::SingularMatrix(source.to_path_buf());
    let inverse = matrix.try_inverse().ok_or_else(singular)?;
    if inverse.iter().any(|v| !v.is_finite()) {
        return Err(singular());
    }
    let residual = (matrix * inverse - Matrix4::identity()).amax();
    if residual > INVERSE_TOLERANCE * matrix.amax().max(1.0) * inverse.amax().max(1.0) {
        return Err(singular());
    }
    Ok(inverse)
}

/// Applies `matrix` (or its inverse) to the point cloud at `path` and
/// rewrites the file in place.
pub fn apply_transform<P: AsRef<Path>>(path: P, matrix: &Matrix4<f64>, invert: bool) -> Result<()> {
    let path = path.as_ref();
    let matrix = effective_matrix(matrix, invert, path)?;
    let mut cloud = PointCloud::read(path)?;
    cloud.transform(&matrix);
    cloud.write(path)?;
    debug!("transformed {} ({} points)", path.display(), cloud.len());
    Ok(())
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct TransformReport {
    pub transformed: Vec<PathBuf>,
    /// Point clouds without a pose of the same id
    pub unmatched: Vec<PathBuf>,
    pub failed: Vec<(PathBuf, String)>,
}

/// Pose folder for point clouds in `cloud_folder`: the path with the
/// point-cloud folder token replaced by the pose folder token, else the
/// nearest ancestor (up to `root`) holding a pose folder.
fn pose_folder_for(cloud_folder: &Path, root: &Path, config: &DatasetConfig) -> Option<PathBuf> {
    let layout = &config.layout;
    let sibling = PathBuf::from(
        cloud_folder
            .to_string_lossy()
            .replace(&layout.point_cloud_folder, &layout.poses_folder),
    );
    if sibling != cloud_folder && sibling.is_dir() {
        return Some(sibling);
    }
    cloud_folder
        .ancestors()
        .skip(1)
        .take_while(|a| a.starts_with(root))
        .map(|a| a.join(&layout.poses_folder))
        .find(|p| p.is_dir())
}

fn find_pose(pose_folder: &Path, id: u32, config: &DatasetConfig) -> Option<PathBuf> {
    let token = config.layout.pose_file_token.as_str();
    list_files(pose_folder, &config.extensions.pose)
        .ok()?
        .into_iter()
        .filter(|p| file_name(p).contains(token))
        .find(|p| extract_path_id(p).map_or(false, |pid| pid == id))
}

/// Transforms every point cloud below `acquisition` with the pose sharing
/// its numeric id. A failure on one file is recorded and the batch goes on.
pub fn transform_acquisition<P: AsRef<Path>>(
    acquisition: P,
    invert: bool,
    config: &DatasetConfig,
    diag: &mut Diagnostics,
) -> Result<TransformReport> {
    let root = acquisition.as_ref();
    if !root.is_dir() {
        return Err(DatasetError::NotFound(root.to_path_buf()));
    }

    let mut report = TransformReport::default();
    for folder in walk_folders(root, diag) {
        let Ok(clouds) = list_files(&folder, &config.extensions.point_cloud) else {
            continue;
        };
        if clouds.is_empty() {
            continue;
        }
        let poses = pose_folder_for(&folder, root, config);

        for cloud in clouds {
            let id = match extract_path_id(&cloud) {
                Ok(id) => id,
                Err(_) => {
                    diag.record(Finding::UnidentifiedFile(cloud.clone()));
                    report.unmatched.push(cloud);
                    continue;
                }
            };
            let Some(pose) = poses.as_deref().and_then(|f| find_pose(f, id, config)) else {
                diag.record(Finding::SkippedFile {
                    path: cloud.clone(),
                    reason: format!("no transformation matrix with id {}", id),
                });
                report.unmatched.push(cloud);
                continue;
            };

            debug!("{} <- {}", file_name(&cloud), file_name(&pose));
            let result = load_transformation_matrix(&pose)
                .and_then(|m| apply_transform(&cloud, &m, invert));
            match result {
                Ok(()) => report.transformed.push(cloud),
                Err(e) => {
                    diag.record(Finding::SkippedFile {
                        path: cloud.clone(),
                        reason: e.to_string(),
                    });
                    report.failed.push((cloud, e.to_string()));
                }
            }
        }
    }

    info!(
        "Point clouds transformed: {} ({} unmatched, {} failed)",
        report.transformed.len(),
        report.unmatched.len(),
        report.failed.len()
    );
    Ok(report)
}
