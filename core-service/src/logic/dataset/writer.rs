use std::fs::{self, File};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

use parking_lot::Mutex;
use serde::Serialize;

use crate::error::{DetectorError, DetectorResult};
use crate::logic::model::InferenceReport;

/// Writes one JSON line per scored record
pub struct PredictionWriter {
    file: Mutex<BufWriter<File>>,
    path: PathBuf,
}

impl PredictionWriter {
    /// Create (truncate) the output file
    pub fn create(path: &Path) -> DetectorResult<Self> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        let file = File::create(path)?;
        Ok(Self { file: Mutex::new(BufWriter::new(file)), path: path.to_path_buf() })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Write every record of a report and flush
    pub fn write_report(&self, report: &InferenceReport) -> DetectorResult<usize> {
        let mut file = self.file.lock();
        for record in &report.records {
            write_line(&mut *file, record)?;
        }
        file.flush()?;
        log::info!("Wrote {} predictions to {}", report.records.len(), self.path.display());
        Ok(report.records.len())
    }
}

impl Drop for PredictionWriter {
    fn drop(&mut self) {
        if let Err(e) = self.file.get_mut().flush() {
            log::error!("Failed to flush predictions to {}: {}", self.path.display(), e);
        }
    }
}

fn write_line<W: Write, T: Serialize>(out: &mut W, value: &T) -> DetectorResult<()> {
    let json = serde_json::to_string(value)?;
    writeln!(out, "{}", json).map_err(DetectorError::from)
}
