use pyo3::prelude::*;

use crate::dataset::integrity_check::{DatasetIntegrity, IntegrityReport};
use crate::diagnostics::Finding;
use crate::entry::{LoadOutcome, PreparationOutcome};

/// Python representation of a platform validation result
///
/// Attributes:
///     counts_ok (bool): All per-id file counts agree
///     identity_ok (bool): Every id resolves in every modality
///     valid_count (int): Number of usable data points, 0 when counts disagree
#[pyclass]
#[derive(Debug, Clone)]
pub struct PyIntegrityReport {
    #[pyo3(get, set)]
    pub counts_ok: bool,
    #[pyo3(get, set)]
    pub identity_ok: bool,
    #[pyo3(get, set)]
    pub valid_count: usize,
}

#[pymethods]
impl PyIntegrityReport {
    #[new]
    fn new(counts_ok: bool, identity_ok: bool, valid_count: usize) -> Self {
        Self {
            counts_ok,
            identity_ok,
            valid_count,
        }
    }

    fn is_valid(&self) -> bool {
        self.counts_ok && self.identity_ok
    }

    fn __repr__(&self) -> String {
        format!(
            "IntegrityReport(counts_ok={}, identity_ok={}, valid_count={})",
            self.counts_ok, self.identity_ok, self.valid_count
        )
    }

    fn __str__(&self) -> String {
        self.__repr__()
    }
}

impl From<IntegrityReport> for PyIntegrityReport {
    fn from(report: IntegrityReport) -> Self {
        Self {
            counts_ok: report.counts_ok,
            identity_ok: report.identity_ok,
            valid_count: report.valid_count,
        }
    }
}

/// Loaded sample summary returned by ``load_and_check``
///
/// Attributes:
///     sample_id (str): Sample folder name
///     ultrasound (Optional[PyIntegrityReport]): None when the platform was not loaded
///     top (Optional[PyIntegrityReport])
///     bottom (Optional[PyIntegrityReport])
///     signal_lengths_consistent (Optional[bool])
///     point_ids (List[str]): Ultrasound point file ids
///     complete_scans (List[int]): Scan ids present in every top-hemisphere modality
///     findings (List[str]): Dataset defects noticed while loading
#[pyclass]
#[derive(Debug, Clone)]
pub struct PySampleSummary {
    #[pyo3(get, set)]
    pub sample_id: String,
    #[pyo3(get, set)]
    pub ultrasound: Option<PyIntegrityReport>,
    #[pyo3(get, set)]
    pub top: Option<PyIntegrityReport>,
    #[pyo3(get, set)]
    pub bottom: Option<PyIntegrityReport>,
    #[pyo3(get, set)]
    pub signal_lengths_consistent: Option<bool>,
    #[pyo3(get, set)]
    pub point_ids: Vec<String>,
    #[pyo3(get, set)]
    pub complete_scans: Vec<u32>,
    #[pyo3(get, set)]
    pub findings: Vec<String>,
}

#[pymethods]
impl PySampleSummary {
    fn is_valid(&self) -> bool {
        [&self.ultrasound, &self.top, &self.bottom]
            .into_iter()
            .flatten()
            .all(|r| r.is_valid())
            && self.signal_lengths_consistent != Some(false)
    }

    fn __repr__(&self) -> String {
        format!(
            "SampleSummary(sample_id={}, valid={}, points={}, scans={}, findings={})",
            self.sample_id,
            self.is_valid(),
            self.point_ids.len(),
            self.complete_scans.len(),
            self.findings.len()
        )
    }

    fn __str__(&self) -> String {
        self.__repr__()
    }
}

fn messages(findings: &[Finding]) -> Vec<String> {
    findings.iter().map(|f| f.to_string()).collect()
}

impl From<LoadOutcome> for PySampleSummary {
    fn from(outcome: LoadOutcome) -> Self {
        let DatasetIntegrity {
            ultrasound,
            signal_lengths_consistent,
            top,
            bottom,
        } = outcome.integrity;
        let dataset = outcome.dataset;

        Self {
            sample_id: dataset.sample_id.clone(),
            ultrasound: ultrasound.map(Into::into),
            top: top.map(Into::into),
            bottom: bottom.map(Into::into),
            signal_lengths_consistent,
            point_ids: dataset
                .ultrasound
                .as_ref()
                .map(|us| us.file_ids().into_iter().map(str::to_string).collect())
                .unwrap_or_default(),
            complete_scans: dataset
                .scanner
                .as_ref()
                .map(|s| s.top.complete_scans())
                .unwrap_or_default(),
            findings: messages(&outcome.findings),
        }
    }
}

/// Result of ``prepare_sample``
///
/// Attributes:
///     segmented (List[str]): Segmented color images written
///     calibrated (List[str]): Pose folders that received a calibration bundle
///     transformed (List[str]): Point clouds rewritten in place
///     failed (List[str]): Files that could not be processed, with the reason
///     findings (List[str])
#[pyclass]
#[derive(Debug, Clone, Default)]
pub struct PyPreparationSummary {
    #[pyo3(get, set)]
    pub segmented: Vec<String>,
    #[pyo3(get, set)]
    pub calibrated: Vec<String>,
    #[pyo3(get, set)]
    pub transformed: Vec<String>,
    #[pyo3(get, set)]
    pub failed: Vec<String>,
    #[pyo3(get, set)]
    pub findings: Vec<String>,
}

#[pymethods]
impl PyPreparationSummary {
    fn __repr__(&self) -> String {
        format!(
            "PreparationSummary(segmented={}, calibrated={}, transformed={}, failed={})",
            self.segmented.len(),
            self.calibrated.len(),
            self.transformed.len(),
            self.failed.len()
        )
    }

    fn __str__(&self) -> String {
        self.__repr__()
    }
}

impl From<PreparationOutcome> for PyPreparationSummary {
    fn from(outcome: PreparationOutcome) -> Self {
        let display = |p: &std::path::PathBuf| p.display().to_string();
        let failure = |(p, reason): &(std::path::PathBuf, String)| {
            format!("{}: {}", p.display(), reason)
        };

        let mut summary = PyPreparationSummary {
            findings: messages(&outcome.findings),
            ..Default::default()
        };
        if let Some(seg) = &outcome.segmentation {
            summary.segmented = seg.color.iter().map(display).collect();
            summary.failed.extend(seg.failed.iter().map(failure));
        }
        if let Some(calib) = &outcome.calibration {
            summary.calibrated = calib.provisioned.iter().map(display).collect();
        }
        if let Some(tr) = &outcome.transform {
            summary.transformed = tr.transformed.iter().map(display).collect();
            summary.failed.extend(tr.failed.iter().map(failure));
        }
        summary
    }
}
