//! Dataset Module - JSONL flow records in, predictions out
//!
//! Records arrive already encoded and normalized by the ingestion side;
//! this module only validates width/finiteness and groups them into
//! training batches or labeled evaluation sets.

pub mod reader;
pub mod record;
pub mod set;
pub mod writer;


pub use reader::{read_records, read_vectors};
pub use record::DatasetRecord;
pub use set::{LabeledSet, TrainingSet};
pub use writer::PredictionWriter;
