use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::Path;

use crate::error::{DetectorError, DetectorResult};
use crate::logic::dataset::record::DatasetRecord;
use crate::logic::features::{FeatureVector, Label};

/// Read every record of a JSONL dataset. Blank lines are skipped; any
/// other malformed line fails the whole read with its 1-based number.
pub fn read_records(path: &Path) -> DetectorResult<Vec<DatasetRecord>> {
    let file = File::open(path)
        .map_err(|e| DetectorError::Dataset(format!("Cannot open {}: {}", path.display(), e)))?;

    let mut records = Vec::new();
    for (i, line) in BufReader::new(file).lines().enumerate() {
        let line_no = i + 1;
        let line = line.map_err(|e| DetectorError::Dataset(format!("{}:{}: {}", path.display(), line_no, e)))?;
        if line.trim().is_empty() {
            continue;
        }
        let record: DatasetRecord = serde_json::from_str(&line)
            .map_err(|e| DetectorError::Dataset(format!("{}:{}: {}", path.display(), line_no, e)))?;
        records.push(record);
    }

    log::debug!("Read {} records from {}", records.len(), path.display());
    Ok(records)
}

/// Read a dataset as feature vectors plus (optional) labels
pub fn read_vectors(path: &Path) -> DetectorResult<(Vec<FeatureVector>, Vec<Option<Label>>)> {
    let records = read_records(path)?;
    let mut vectors = Vec::with_capacity(records.len());
    let mut labels = Vec::with_capacity(records.len());
    for (i, record) in records.iter().enumerate() {
        let vector = record.to_vector().map_err(|e| {
            DetectorError::Dataset(format!("{} record {}: {}", path.display(), i + 1, e))
        })?;
        vectors.push(vector);
        labels.push(record.label);
    }
    Ok((vectors, labels))
}
