use csv::ReaderBuilder;
use log::warn;
use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::Path;

use super::walker::file_name;
use crate::error::{DatasetError, Result};

/// Utility: detect whether the file uses comma or tab as delimiter.
fn detect_delimiter(path: &Path) -> Result<u8> {
    let file = File::open(path).map_err(|e| DatasetError::io(path, e))?;
    let mut reader = BufReader::new(file);
    let mut first_line = String::new();
    reader
        .read_line(&mut first_line)
        .map_err(|e| DatasetError::io(path, e))?;

    let tabs = first_line.matches('\t').count();
    let commas = first_line.matches(',').count();

    if tabs > commas {
        Ok(b'\t')
    } else {
        // comma on ties
        Ok(b',')
    }
}

/// Reads one A-scan: a header row followed by one sample per row in the
/// first column. Rows whose first cell is not numeric are skipped.
pub fn read_signal<P: AsRef<Path>>(path: P) -> Result<Vec<f64>> {
    let path = path.as_ref();
    let delim = detect_delimiter(path)?;
    let file = File::open(path).map_err(|e| DatasetError::io(path, e))?;
    let mut rdr = ReaderBuilder::new()
        .has_headers(true)
        .flexible(true)
        .delimiter(delim)
        .from_reader(file);

    let mut samples = Vec::new();
    let mut skipped = 0usize;
    for result in rdr.records() {
        let record = result.map_err(|e| DatasetError::Csv {
            path: path.to_path_buf(),
            source: e,
        })?;
        match record.get(0).map(|v| v.trim().parse::<f64>()) {
            Some(Ok(v)) => samples.push(v),
            _ => skipped += 1,
        }
    }

    if skipped > 0 {
        warn!("skipped {} non-numeric rows in {}", skipped, path.display());
    }
    Ok(samples)
}

/// Point identifier of a signal file: the file name up to `token`
/// (`"290_3_Ascan_hf.csv"` -> `"290_3"`). `None` when the token is absent.
pub fn signal_file_id(path: &Path, token: &str) -> Option<String> {
    let name = file_name(path);
    name.find(token).map(|i| name[..i].to_string())
}
