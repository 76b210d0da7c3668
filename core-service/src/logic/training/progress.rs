//! Training progress feed
//!
//! An ordered, append-only stream of human-readable lines. Delivery is
//! best effort: a sink that fails to write logs the failure and moves on,
//! training is never interrupted by it.
//!
//! Line formats:
//! ```text
//! [epoch 1/5][batch 3/12] err_d: 0.6931 err_g: 25.1 adv: 0.0012 con: 0.4981 enc: 0.0003
//! Avg Run Time (ms/batch): 3.412 roc: 0.8123 max roc: 0.8123
//! Reloading net d (epoch 2, batch 7, err_d: 0.000004)
//! ```

use std::fs::{File, OpenOptions};
use std::io::{BufWriter, Write};
use std::path::Path;
use std::sync::mpsc::{self, Receiver, Sender};
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use once_cell::sync::Lazy;
use parking_lot::Mutex;
use regex::Regex;

use super::loss::{DiscriminatorLoss, GeneratorLoss};
use super::metrics::MetricsExport;
use crate::error::DetectorResult;

pub trait ProgressSink: Send {
    fn emit(&mut self, line: &str);
}

// ============================================================================
// SINKS
// ============================================================================

/// Forwards lines to the `log` facade
#[derive(Debug, Default, Clone, Copy)]
pub struct LogSink;

impl ProgressSink for LogSink {
    fn emit(&mut self, line: &str) {
        if line.starts_with("[epoch") {
            log::debug!("{}", line);
        } else {
            log::info!("{}", line);
        }
    }
}

/// Collects lines in memory; clones share the same buffer
#[derive(Debug, Default, Clone)]
pub struct MemorySink {
    lines: Arc<Mutex<Vec<String>>>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn lines(&self) -> Vec<String> {
        self.lines.lock().clone()
    }

    pub fn text(&self) -> String {
        self.lines.lock().join("\n")
    }
}

impl ProgressSink for MemorySink {
    fn emit(&mut self, line: &str) {
        self.lines.lock().push(line.to_string());
    }
}

/// Streams lines to another thread; a dropped receiver is ignored
impl ProgressSink for Sender<String> {
    fn emit(&mut self, line: &str) {
        let _ = self.send(line.to_string());
    }
}

/// Appends lines to a log file from a background writer thread. `emit`
/// only queues the line; dropping the sink drains the queue and flushes.
pub struct FileSink {
    tx: Option<Sender<String>>,
    writer: Option<JoinHandle<()>>,
}

impl FileSink {
    pub fn append(path: &Path) -> DetectorResult<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let file = OpenOptions::new().create(true).append(true).open(path)?;
        let (tx, rx) = mpsc::channel();
        let writer = thread::Builder::new()
            .name("progress-log".into())
            .spawn(move || write_lines(BufWriter::new(file), rx))?;
        Ok(Self { tx: Some(tx), writer: Some(writer) })
    }
}

/// Writer loop; flushes whenever the queue runs dry
fn write_lines(mut out: BufWriter<File>, rx: Receiver<String>) {
    while let Ok(line) = rx.recv() {
        let mut result = writeln!(out, "{}", line);
        while let Ok(next) = rx.try_recv() {
            result = result.and_then(|_| writeln!(out, "{}", next));
        }
        if let Err(e) = result.and_then(|_| out.flush()) {
            log::warn!("Progress log write failed: {}", e);
        }
    }
}

impl ProgressSink for FileSink {
    fn emit(&mut self, line: &str) {
        if let Some(tx) = &self.tx {
            let _ = tx.send(line.to_string());
        }
    }
}

impl Drop for FileSink {
    fn drop(&mut self) {
        drop(self.tx.take());
        if let Some(writer) = self.writer.take() {
            if writer.join().is_err() {
                log::warn!("Progress log writer panicked");
            }
        }
    }
}

/// Fan-out to several sinks
#[derive(Default)]
pub struct Tee {
    sinks: Vec<Box<dyn ProgressSink>>,
}

impl Tee {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, sink: impl ProgressSink + 'static) -> Self {
        self.sinks.push(Box::new(sink));
        self
    }
}

impl ProgressSink for Tee {
    fn emit(&mut self, line: &str) {
        for sink in &mut self.sinks {
            sink.emit(line);
        }
    }
}

// ============================================================================
// LINE FORMATS
// ============================================================================

pub fn batch_line(
    epoch: usize,
    epochs: usize,
    batch: usize,
    batches: usize,
    d: &DiscriminatorLoss,
    g: Option<&GeneratorLoss>,
) -> String {
    match g {
        Some(g) => format!(
            "[epoch {}/{}][batch {}/{}] err_d: {:.6} err_g: {:.6} adv: {:.6} con: {:.6} enc: {:.6}",
            epoch, epochs, batch, batches, d.total, g.total, g.adversarial, g.reconstruction, g.encoding
        ),
        None => format!(
            "[epoch {}/{}][batch {}/{}] err_d: {:.6} err_g: skipped",
            epoch, epochs, batch, batches, d.total
        ),
    }
}

pub fn epoch_line(runtime_ms: f32, roc_auc: f32, max_roc: f32) -> String {
    format!("Avg Run Time (ms/batch): {:.3} roc: {:.4} max roc: {:.4}", runtime_ms, roc_auc, max_roc)
}

pub fn collapse_line(epoch: usize, batch: usize, d_loss: f32) -> String {
    format!("Reloading net d (epoch {}, batch {}, err_d: {:.6})", epoch, batch, d_loss)
}

// ============================================================================
// PARSING
// ============================================================================

static EPOCH_LINE: Lazy<Option<Regex>> = Lazy::new(|| {
    Regex::new(r"Avg Run Time \(ms/batch\): ([0-9.eE+-]+) roc: ([0-9.eE+-]+) max roc: ([0-9.eE+-]+)").ok()
});

/// Rebuild the metrics export from a progress feed. `None` when the feed
/// holds no epoch line yet.
pub fn parse_progress(text: &str) -> Option<MetricsExport> {
    let re = EPOCH_LINE.as_ref()?;

    let mut runtimes = Vec::new();
    let mut rocs = Vec::new();
    let mut max_roc_seen = f32::NEG_INFINITY;
    for caps in re.captures_iter(text) {
        let (Ok(runtime), Ok(roc), Ok(max_roc)) =
            (caps[1].parse::<f32>(), caps[2].parse::<f32>(), caps[3].parse::<f32>())
        else {
            continue;
        };
        runtimes.push(runtime);
        rocs.push(roc);
        max_roc_seen = max_roc_seen.max(max_roc).max(roc);
    }

    if rocs.is_empty() {
        return None;
    }
    Some(MetricsExport {
        roc_auc: rocs.iter().copied().fold(f32::NEG_INFINITY, f32::max),
        avg_runtime_ms: runtimes.iter().sum::<f32>() / runtimes.len() as f32,
        max_roc_seen,
        roc_history: rocs,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_progress_feed() {
        let mut sink = MemorySink::new();
        sink.emit("[epoch 1/3][batch 1/2] err_d: 0.693000 err_g: 24.000000 adv: 0.1 con: 0.4 enc: 0.01");
        sink.emit(&epoch_line(2.0, 0.61, 0.61));
        sink.emit(&collapse_line(2, 1, 0.000001));
        sink.emit(&epoch_line(4.0, 0.83, 0.83));
        sink.emit(&epoch_line(3.0, 0.79, 0.83));

        let export = parse_progress(&sink.text()).unwrap();
        assert_eq!(export.roc_history, vec![0.61, 0.83, 0.79]);
        assert_eq!(export.roc_auc, 0.83);
        assert_eq!(export.max_roc_seen, 0.83);
        assert!((export.avg_runtime_ms - 3.0).abs() < 1e-6);
    }

    #[test]
    fn test_parse_without_epoch_lines() {
        assert!(parse_progress("").is_none());
        assert!(parse_progress("Reloading net d").is_none());
    }

    #[test]
    fn test_channel_sink_preserves_order() {
        let (tx, rx) = mpsc::channel();
        let mut sink: Box<dyn ProgressSink> = Box::new(tx);
        for i in 0..5 {
            sink.emit(&format!("line {}", i));
        }
        drop(sink);
        let received: Vec<String> = rx.iter().collect();
        assert_eq!(received, (0..5).map(|i| format!("line {}", i)).collect::<Vec<_>>());
    }

    #[test]
    fn test_file_sink_appends() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("progress.log");
        FileSink::append(&path).unwrap().emit("first");
        FileSink::append(&path).unwrap().emit(&epoch_line(1.0, 0.5, 0.5));

        let text = std::fs::read_to_string(&path).unwrap();
        assert_eq!(text.lines().count(), 2);
        assert_eq!(parse_progress(&text).unwrap().roc_history, vec![0.5]);
    }

    #[test]
    fn test_file_sink_keeps_order_across_queue() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("progress.log");
        let mut sink = FileSink::append(&path).unwrap();
        for i in 0..200 {
            sink.emit(&format!("[epoch 1/1][batch {}/200] err_d: 0.5", i + 1));
        }
        sink.emit(&epoch_line(2.5, 0.7, 0.7));
        drop(sink);

        let text = std::fs::read_to_string(&path).unwrap();
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines.len(), 201);
        assert!(lines[0].contains("[batch 1/200]"));
        assert!(lines[199].contains("[batch 200/200]"));
        assert_eq!(parse_progress(&text).unwrap().roc_history, vec![0.7]);
    }

    #[test]
    fn test_tee_fans_out() {
        let a = MemorySink::new();
        let b = MemorySink::new();
        let mut tee = Tee::new().with(a.clone()).with(b.clone());
        tee.emit("hello");
        assert_eq!(a.lines(), vec!["hello".to_string()]);
        assert_eq!(b.lines(), vec!["hello".to_string()]);
    }
}
