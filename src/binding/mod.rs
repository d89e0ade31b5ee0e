pub mod classes;

use nalgebra::Matrix4;
use pyo3::exceptions::{PyRuntimeError, PyValueError};
use pyo3::prelude::*;
use pyo3::types::PyBytes;
use std::path::Path;

use crate::config::DatasetConfig;
use crate::dataset::Platform;
use crate::entry::{run_load_and_check, run_preparation, PreparationStep};
use crate::error::{DatasetError, Result};
use crate::io::naming::extract_id;
use crate::processing::calibration::provision_calibration;
use crate::processing::segmentation::{BackgroundRemover, SegmentationParams};
use crate::processing::transform::apply_transform;
use classes::{PyPreparationSummary, PySampleSummary};

fn runtime_err(e: impl std::fmt::Display) -> PyErr {
    PyRuntimeError::new_err(e.to_string())
}

fn load_config(config_path: Option<&str>) -> PyResult<DatasetConfig> {
    match config_path {
        Some(path) => DatasetConfig::from_toml_file(path).map_err(runtime_err),
        None => Ok(DatasetConfig::default()),
    }
}

/// Python callable taking the encoded image as ``bytes`` and returning an
/// encoded RGBA image, e.g. ``rembg.remove``.
struct PyRemover {
    callable: Py<PyAny>,
}

impl BackgroundRemover for PyRemover {
    fn remove(&self, image: &[u8], _params: &SegmentationParams) -> Result<image::RgbaImage> {
        let encoded: Vec<u8> = Python::with_gil(|py| {
            self.callable
                .call1(py, (PyBytes::new(py, image),))
                .and_then(|out| out.extract::<Vec<u8>>(py))
        })
        .map_err(|e| DatasetError::Segmentation(e.to_string()))?;
        Ok(image::load_from_memory(&encoded)?.to_rgba8())
    }
}

/// Numeric identifier of a file name: the first run of decimal digits.
///
/// Example:
///
/// .. code-block:: python
///
///    import histodatars as hd
///    hd.extract_id("IMG_color_original_12.png")  # 12
#[pyfunction]
#[pyo3(name = "extract_id")]
pub fn extract_id_py(name: &str) -> PyResult<u32> {
    extract_id(name).map_err(|e| PyValueError::new_err(e.to_string()))
}

/// Loads a sample and runs the integrity checks of every loaded platform.
///
/// Arguments:
///
/// - ``data_path`` – Folder containing the sample folders
/// - ``sample_id`` – Sample folder name
/// - ``platforms`` (default: "ultrasound,scanner") – Comma-separated platforms
/// - ``config_path`` (default: None) – Optional TOML configuration
///
/// Returns:
///
/// A ``PySampleSummary``. Failed checks do not raise.
#[pyfunction]
#[pyo3(signature = (data_path, sample_id, platforms = "ultrasound,scanner", config_path = None))]
pub fn load_and_check(
    data_path: &str,
    sample_id: &str,
    platforms: &str,
    config_path: Option<&str>,
) -> PyResult<PySampleSummary> {
    let config = load_config(config_path)?;
    let platforms = Platform::parse_list(platforms);
    let outcome =
        run_load_and_check(data_path, sample_id, &platforms, &config).map_err(runtime_err)?;
    Ok(outcome.into())
}

/// Runs the preparation steps on one sample.
///
/// Arguments:
///
/// - ``data_path`` – Folder containing the sample folders and ``CalibrationFiles``
/// - ``sample_id`` – Sample folder name
/// - ``steps`` (default: "remove,transform") – Any of ``remove``, ``transform``, ``inverse``
/// - ``remover`` (default: None) – Callable ``bytes -> bytes``, required by ``remove``
/// - ``config_path`` (default: None)
///
/// Example:
///
/// .. code-block:: python
///
///    from rembg import remove
///    hd.prepare_sample("data", "290", "remove,transform", remover=remove)
#[pyfunction]
#[pyo3(signature = (data_path, sample_id, steps = "remove,transform", remover = None, config_path = None))]
pub fn prepare_sample(
    data_path: &str,
    sample_id: &str,
    steps: &str,
    remover: Option<Py<PyAny>>,
    config_path: Option<&str>,
) -> PyResult<PyPreparationSummary> {
    let config = load_config(config_path)?;
    let steps = PreparationStep::parse_list(steps);
    let remover = remover.map(|callable| PyRemover { callable });
    let outcome = run_preparation(
        data_path,
        sample_id,
        &steps,
        remover.as_ref().map(|r| r as &dyn BackgroundRemover),
        &config,
    )
    .map_err(runtime_err)?;
    Ok(outcome.into())
}

/// Applies a 4x4 homogeneous matrix (or its inverse) to a PLY point cloud
/// and rewrites the file in place.
#[pyfunction]
#[pyo3(signature = (path, matrix, invert = false))]
pub fn transform_point_cloud(path: &str, matrix: Vec<Vec<f64>>, invert: bool) -> PyResult<()> {
    if matrix.len() != 4 || matrix.iter().any(|row| row.len() != 4) {
        return Err(PyValueError::new_err("matrix must be 4x4"));
    }
    let m = Matrix4::from_fn(|r, c| matrix[r][c]);
    apply_transform(Path::new(path), &m, invert).map_err(runtime_err)
}

/// Copies the calibration bundle matching each acquisition's camera setup.
///
/// Returns the pose folders that were provisioned.
#[pyfunction]
#[pyo3(name = "provision_calibration", signature = (acquisition_folder, calibration_root, config_path = None))]
pub fn provision_calibration_py(
    acquisition_folder: &str,
    calibration_root: &str,
    config_path: Option<&str>,
) -> PyResult<Vec<String>> {
    let config = load_config(config_path)?;
    let mut diag = crate::diagnostics::Diagnostics::new();
    let report = provision_calibration(acquisition_folder, calibration_root, &config, &mut diag)
        .map_err(runtime_err)?;
    Ok(report
        .provisioned
        .iter()
        .map(|p| p.display().to_string())
        .collect())
}
