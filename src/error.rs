use std::path::{Path, PathBuf};

use thiserror::Error;

/// Result type for dataset operations
pub type Result<T> = std::result::Result<T, DatasetError>;

/// Error types for dataset discovery, loading and preparation
#[derive(Error, Debug)]
pub enum DatasetError {
    /// Folder or file absent
    #[error("not found: {}", .0.display())]
    NotFound(PathBuf),

    /// Several candidates where exactly one was expected
    #[error("ambiguous match in {}: {} candidates ({})", folder.display(), candidates.len(), join_paths(candidates))]
    AmbiguousMatch {
        folder: PathBuf,
        candidates: Vec<PathBuf>,
    },

    /// JSON document could not be parsed
    #[error("malformed metadata in {}: {source}", path.display())]
    MalformedMetadata {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    /// Filename carries no decimal digit run
    #[error("no numeric identifier in file name '{0}'")]
    NoIdentifierFound(String),

    /// Inversion requested on a non-invertible transform
    #[error("transformation matrix is singular: {}", .0.display())]
    SingularMatrix(PathBuf),

    /// Directory could not be read
    #[error("permission denied: {}", .0.display())]
    PermissionDenied(PathBuf),

    /// Pose document is not a 4x4 numeric matrix
    #[error("invalid transformation matrix in {}: {reason}", path.display())]
    InvalidMatrix { path: PathBuf, reason: String },

    /// Point cloud file cannot be parsed or written
    #[error("invalid point cloud {}: {reason}", path.display())]
    InvalidPointCloud { path: PathBuf, reason: String },

    #[error("CSV error in {}: {source}", path.display())]
    Csv {
        path: PathBuf,
        #[source]
        source: csv::Error,
    },

    #[error("image error: {0}")]
    Image(#[from] image::ImageError),

    #[error("IO error on {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The background-removal service rejected or failed an image
    #[error("background removal failed: {0}")]
    Segmentation(String),

    #[error("configuration error: {0}")]
    Config(String),
}

impl DatasetError {
    /// Wraps an IO error, promoting `NotFound` and `PermissionDenied` to their own variants.
    pub fn io(path: impl AsRef<Path>, source: std::io::Error) -> Self {
        let path = path.as_ref().to_path_buf();
        match source.kind() {
            std::io::ErrorKind::NotFound => DatasetError::NotFound(path),
            std::io::ErrorKind::PermissionDenied => DatasetError::PermissionDenied(path),
            _ => DatasetError::Io { path, source },
        }
    }

    pub fn point_cloud(path: impl AsRef<Path>, reason: impl Into<String>) -> Self {
        DatasetError::InvalidPointCloud {
            path: path.as_ref().to_path_buf(),
            reason: reason.into(),
        }
    }
}

impl From<toml::de::Error> for DatasetError {
    fn from(e: toml::de::Error) -> Self {
        DatasetError::Config(e.to_string())
    }
}

fn join_paths(paths: &[PathBuf]) -> String {
    paths
        .iter()
        .map(|p| p.display().to_string())
        .collect::<Vec<_>>()
        .join(", ")
}
