//! Loading, integrity checking and preparation of multimodal tissue
//! sample datasets (ultrasound A-scans and 3D scanner acquisitions).
//!
//! .. code-block:: text
//!
//!    <data_path>/
//!      CalibrationFiles/CAMERA_poses_<distance>mm_<count>/
//!      <sample>/
//!        <sample>_UltrasoundPlatform/
//!        <sample>_ScannerPlatform/

pub mod config;
pub mod dataset;
pub mod diagnostics;
pub mod entry;
pub mod error;
pub mod io;
pub mod processing;
mod utils;

#[cfg(feature = "python")]
mod binding;

pub use config::DatasetConfig;
pub use dataset::integrity_check::{check_dataset, DatasetIntegrity, IntegrityReport};
pub use dataset::{Dataset, DatasetLoader, Platform};
pub use diagnostics::{init_logging, Diagnostics, Finding};
pub use entry::{run_load_and_check, run_preparation, PreparationStep};
pub use error::{DatasetError, Result};

#[cfg(feature = "python")]
use pyo3::prelude::*;

#[cfg(feature = "python")]
#[pymodule]
fn histodatars(_py: Python, m: Bound<'_, PyModule>) -> PyResult<()> {
    use binding::classes::{PyIntegrityReport, PyPreparationSummary, PySampleSummary};

    m.add("__version__", env!("CARGO_PKG_VERSION"))?;
    m.add_function(wrap_pyfunction!(binding::extract_id_py, m.clone())?)?;
    m.add_function(wrap_pyfunction!(binding::load_and_check, m.clone())?)?;
    m.add_function(wrap_pyfunction!(binding::prepare_sample, m.clone())?)?;
    m.add_function(wrap_pyfunction!(binding::transform_point_cloud, m.clone())?)?;
    m.add_function(wrap_pyfunction!(binding::provision_calibration_py, m.clone())?)?;

    m.add_class::<PyIntegrityReport>()?;
    m.add_class::<PySampleSummary>()?;
    m.add_class::<PyPreparationSummary>()?;
    Ok(())
}
