use log::{debug, warn, LevelFilter};
use std::fmt;
use std::ops::RangeInclusive;
use std::path::PathBuf;
use std::sync::Once;

static LOGGER: Once = Once::new();

/// Configures `env_logger` once per process. `RUST_LOG` overrides the level.
pub fn init_logging(verbose: bool) {
    LOGGER.call_once(|| {
        let level = if verbose {
            LevelFilter::Debug
        } else {
            LevelFilter::Info
        };
        let _ = env_logger::Builder::new()
            .filter_level(level)
            .parse_default_env()
            .format_timestamp_secs()
            .try_init();
    });
}

/// A dataset defect noticed while assembling or preparing a sample.
///
/// Findings never abort an operation; they are collected so the caller can
/// decide whether the sample is usable.
#[derive(Debug, Clone, PartialEq)]
pub enum Finding {
    /// An ID is present in some modalities but missing in others
    PartialScan {
        context: String,
        id: u32,
        missing: Vec<String>,
    },
    /// Two files in one collection resolve to the same ID
    DuplicateId {
        context: String,
        id: u32,
        kept: PathBuf,
        dropped: PathBuf,
    },
    /// IDs do not cover 1..=max without gaps; one range per missing run
    NonContiguousIds {
        context: String,
        missing: Vec<RangeInclusive<u32>>,
    },
    /// File name without a numeric identifier
    UnidentifiedFile(PathBuf),
    /// Expected folder absent, collection left empty
    MissingFolder { context: String, path: PathBuf },
    /// JSON document unreadable, skipped
    MalformedDocument { path: PathBuf, message: String },
    /// File skipped for another reason
    SkippedFile { path: PathBuf, reason: String },
    /// A named integrity check did not pass
    IntegrityCheckFailed { context: String, check: String },
    /// Directory that could not be listed, subtree skipped
    UnreadableFolder { path: PathBuf, reason: String },
}

/// `2-6, 9` style summary of missing id runs.
fn format_ranges(ranges: &[RangeInclusive<u32>]) -> String {
    ranges
        .iter()
        .map(|r| {
            if r.start() == r.end() {
                r.start().to_string()
            } else {
                format!("{}-{}", r.start(), r.end())
            }
        })
        .collect::<Vec<_>>()
        .join(", ")
}

impl fmt::Display for Finding {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Finding::PartialScan {
                context,
                id,
                missing,
            } => write!(f, "{}: partial scan {} (missing {})", context, id, missing.join(", ")),
            Finding::DuplicateId {
                context,
                id,
                kept,
                dropped,
            } => write!(
                f,
                "{}: duplicate id {} ({} kept, {} dropped)",
                context,
                id,
                kept.display(),
                dropped.display()
            ),
            Finding::NonContiguousIds { context, missing } => {
                let count: u64 = missing.iter().map(|r| u64::from(r.end() - r.start()) + 1).sum();
                write!(
                    f,
                    "{}: ids not contiguous, {} missing ({})",
                    context,
                    count,
                    format_ranges(missing)
                )
            }
            Finding::UnidentifiedFile(path) => {
                write!(f, "no numeric id in {}", path.display())
            }
            Finding::MissingFolder { context, path } => {
                write!(f, "{}: folder {} absent", context, path.display())
            }
            Finding::MalformedDocument { path, message } => {
                write!(f, "malformed document {}: {}", path.display(), message)
            }
            Finding::SkippedFile { path, reason } => {
                write!(f, "skipped {}: {}", path.display(), reason)
            }
            Finding::IntegrityCheckFailed { context, check } => {
                write!(f, "{}: integrity check '{}' failed", context, check)
            }
            Finding::UnreadableFolder { path, reason } => {
                write!(f, "cannot read {}: {}", path.display(), reason)
            }
        }
    }
}

/// Collects findings for one operation and mirrors them to the log.
#[derive(Debug, Default)]
pub struct Diagnostics {
    findings: Vec<Finding>,
}

impl Diagnostics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&mut self, finding: Finding) {
        match &finding {
            // missing folders are the normal state of partially acquired samples
            Finding::MissingFolder { .. } => debug!("{}", finding),
            _ => warn!("{}", finding),
        }
        self.findings.push(finding);
    }

    pub fn findings(&self) -> &[Finding] {
        &self.findings
    }

    pub fn is_clean(&self) -> bool {
        self.findings.is_empty()
    }

    pub fn partial_scans(&self) -> impl Iterator<Item = &Finding> {
        self.findings
            .iter()
            .filter(|f| matches!(f, Finding::PartialScan { .. }))
    }

    pub fn into_findings(self) -> Vec<Finding> {
        self.findings
    }
}

#[cfg(test)]
mod diagnostics_tests {
    use super::*;

    #[test]
    fn test_record_and_filter() {
        let mut diag = Diagnostics::new();
        assert!(diag.is_clean());

        diag.record(Finding::UnidentifiedFile(PathBuf::from("notes.png")));
        diag.record(Finding::PartialScan {
            context: "top".into(),
            id: 4,
            missing: vec!["depth/segmented".into()],
        });

        assert!(!diag.is_clean());
        assert_eq!(diag.findings().len(), 2);
        assert_eq!(diag.partial_scans().count(), 1);
    }

    #[test]
    fn test_display_mentions_missing_slots() {
        let finding = Finding::PartialScan {
            context: "bottom".into(),
            id: 7,
            missing: vec!["pose".into(), "color/original".into()],
        };
        let text = finding.to_string();
        assert!(text.contains("partial scan 7"));
        assert!(text.contains("pose, color/original"));
    }

    #[test]
    fn test_gap_summary_stays_short() {
        let finding = Finding::NonContiguousIds {
            context: "scanner/top/color/original".into(),
            missing: vec![2..=6, 9..=9, 11..=39_999_999],
        };
        assert_eq!(
            finding.to_string(),
            "scanner/top/color/original: ids not contiguous, 39999995 missing (2-6, 9, 11-39999999)"
        );
    }

    #[test]
    fn test_init_logging_is_idempotent() {
        init_logging(true);
        init_logging(false);
    }
}
