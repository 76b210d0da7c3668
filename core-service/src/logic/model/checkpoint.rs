//! Checkpoint - co-versioned Generator + Discriminator snapshot
//!
//! On disk a checkpoint is one file: a header line carrying the SHA-256 of
//! the JSON payload, then the payload. Both networks live in the same
//! payload, so they can never be committed separately.
//!
//! ```text
//! flowgan-checkpoint v1 sha256:<hex>
//! {"version": "...", "generator": {...}, "discriminator": {...}, ...}
//! ```

use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use uuid::Uuid;

use super::discriminator::Discriminator;
use super::generator::Generator;
use super::threshold::ScoreRange;
use crate::constants::{BEST_CHECKPOINT, CURRENT_CHECKPOINT};
use crate::error::{DetectorError, DetectorResult};
use crate::logic::features::{layout_hash, validate_layout, FEATURE_VERSION};
use crate::logic::storage;

const HEADER_MAGIC: &str = "flowgan-checkpoint v1 sha256:";

// ============================================================================
// CHECKPOINT
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Checkpoint {
    /// Identifier shared by the Generator/Discriminator pair
    pub version: Uuid,
    pub created_at: DateTime<Utc>,
    /// 1-based epoch that produced these weights (0 = untrained)
    pub epoch: usize,
    /// Validation ROC-AUC at that epoch
    pub roc_auc: Option<f32>,
    pub feature_version: u8,
    pub layout_hash: u32,
    /// Raw-score range on the validation set, for reference normalization
    #[serde(default)]
    pub score_range: Option<ScoreRange>,
    pub generator: Generator,
    pub discriminator: Discriminator,
}

impl Checkpoint {
    pub fn new(generator: Generator, discriminator: Discriminator, epoch: usize, roc_auc: Option<f32>) -> Self {
        Self {
            version: Uuid::new_v4(),
            created_at: Utc::now(),
            epoch,
            roc_auc,
            feature_version: FEATURE_VERSION,
            layout_hash: layout_hash(),
            score_range: None,
            generator,
            discriminator,
        }
    }

    pub fn with_score_range(mut self, range: Option<ScoreRange>) -> Self {
        self.score_range = range;
        self
    }

    /// Layout, architecture and layer-shape checks run on every load
    pub fn validate(&self) -> DetectorResult<()> {
        validate_layout(self.feature_version, self.layout_hash)?;
        let arch = self.generator.architecture();
        if arch != self.discriminator.architecture() {
            return Err(DetectorError::CheckpointCorrupt(
                "Generator and Discriminator architectures differ".into(),
            ));
        }
        arch.validate()?;
        self.generator.check_shapes()?;
        self.discriminator.check_shapes()
    }

    /// Serialize to the on-disk format
    pub fn to_bytes(&self) -> DetectorResult<Vec<u8>> {
        let payload = serde_json::to_vec(self)?;
        let digest = hex::encode(Sha256::digest(&payload));
        let mut bytes = Vec::with_capacity(HEADER_MAGIC.len() + digest.len() + 1 + payload.len());
        bytes.extend_from_slice(HEADER_MAGIC.as_bytes());
        bytes.extend_from_slice(digest.as_bytes());
        bytes.push(b'\n');
        bytes.extend_from_slice(&payload);
        Ok(bytes)
    }

    /// Parse and verify the on-disk format
    pub fn from_bytes(bytes: &[u8]) -> DetectorResult<Self> {
        let newline = bytes
            .iter()
            .position(|&b| b == b'\n')
            .ok_or_else(|| DetectorError::CheckpointCorrupt("missing header line".into()))?;
        let header = std::str::from_utf8(&bytes[..newline])
            .map_err(|_| DetectorError::CheckpointCorrupt("header is not UTF-8".into()))?;
        let expected = header
            .strip_prefix(HEADER_MAGIC)
            .ok_or_else(|| DetectorError::CheckpointCorrupt(format!("unknown header '{}'", header)))?;

        let payload = &bytes[newline + 1..];
        let actual = hex::encode(Sha256::digest(payload));
        if actual != expected {
            return Err(DetectorError::CheckpointCorrupt(format!(
                "checksum mismatch (expected {}, got {})",
                expected, actual
            )));
        }

        let checkpoint: Checkpoint = serde_json::from_slice(payload)
            .map_err(|e| DetectorError::CheckpointCorrupt(format!("payload: {}", e)))?;
        checkpoint.validate()?;
        Ok(checkpoint)
    }
}

// ============================================================================
// SLOTS
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CheckpointSlot {
    /// Last completed epoch
    Current,
    /// Highest validation ROC-AUC so far
    Best,
}

impl CheckpointSlot {
    pub fn file_name(self) -> &'static str {
        match self {
            CheckpointSlot::Current => CURRENT_CHECKPOINT,
            CheckpointSlot::Best => BEST_CHECKPOINT,
        }
    }
}

impl fmt::Display for CheckpointSlot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CheckpointSlot::Current => write!(f, "current"),
            CheckpointSlot::Best => write!(f, "best"),
        }
    }
}

impl FromStr for CheckpointSlot {
    type Err = DetectorError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "current" | "last" => Ok(CheckpointSlot::Current),
            "best" => Ok(CheckpointSlot::Best),
            other => Err(DetectorError::Config(format!("Unknown checkpoint slot '{}'", other))),
        }
    }
}

// ============================================================================
// STORE
// ============================================================================

/// A checkpoint written to a temporary file but not yet visible under its
/// slot name. Dropping it without `CheckpointStore::commit` removes the
/// temporary file and leaves the committed checkpoint untouched.
#[derive(Debug)]
pub struct StagedCheckpoint {
    slot: CheckpointSlot,
    path: PathBuf,
    committed: bool,
}

impl StagedCheckpoint {
    pub fn slot(&self) -> CheckpointSlot {
        self.slot
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for StagedCheckpoint {
    fn drop(&mut self) {
        if self.committed {
            return;
        }
        if let Err(e) = fs::remove_file(&self.path) {
            if e.kind() != std::io::ErrorKind::NotFound {
                log::warn!("Failed to remove staged checkpoint {}: {}", self.path.display(), e);
            }
        }
    }
}

/// Run `op`, and once more if the first attempt fails with `CheckpointIo`
fn retry_once<T>(mut op: impl FnMut() -> DetectorResult<T>) -> DetectorResult<T> {
    match op() {
        Err(DetectorError::CheckpointIo { path, source }) => {
            log::warn!("Checkpoint write to {} failed ({}), retrying once", path.display(), source);
            op().map_err(|e| {
                log::error!("Checkpoint write failed twice: {}", e);
                e
            })
        }
        result => result,
    }
}

/// Directory holding the `current` and `best` checkpoints of a run
#[derive(Debug, Clone)]
pub struct CheckpointStore {
    dir: PathBuf,
}

impl CheckpointStore {
    pub fn open(dir: impl Into<PathBuf>) -> DetectorResult<Self> {
        let dir = dir.into();
        fs::create_dir_all(&dir).map_err(|source| DetectorError::CheckpointIo {
            path: dir.clone(),
            source,
        })?;
        Ok(Self { dir })
    }

    /// Open an existing run directory without creating it
    pub fn open_existing(dir: impl Into<PathBuf>) -> DetectorResult<Self> {
        let dir = dir.into();
        if !dir.is_dir() {
            return Err(DetectorError::CheckpointIo {
                path: dir,
                source: std::io::Error::new(std::io::ErrorKind::NotFound, "checkpoint directory not found"),
            });
        }
        Ok(Self { dir })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn path(&self, slot: CheckpointSlot) -> PathBuf {
        self.dir.join(slot.file_name())
    }

    pub fn exists(&self, slot: CheckpointSlot) -> bool {
        self.path(slot).is_file()
    }

    /// Write and fsync a temporary file for `slot`
    pub fn stage(&self, slot: CheckpointSlot, checkpoint: &Checkpoint) -> DetectorResult<StagedCheckpoint> {
        let bytes = checkpoint.to_bytes()?;
        let target = self.path(slot);
        let path = storage::write_staged(&target, &bytes)
            .map_err(|source| DetectorError::CheckpointIo { path: target, source })?;
        Ok(StagedCheckpoint { slot, path, committed: false })
    }

    /// Atomically rename a staged checkpoint into its slot
    pub fn commit(&self, mut staged: StagedCheckpoint) -> DetectorResult<()> {
        let target = self.path(staged.slot);
        storage::promote(&staged.path, &target)
            .map_err(|source| DetectorError::CheckpointIo { path: target, source })?;
        staged.committed = true;
        Ok(())
    }

    /// Stage + commit, retrying once on an I/O failure
    pub fn save(&self, slot: CheckpointSlot, checkpoint: &Checkpoint) -> DetectorResult<()> {
        retry_once(|| self.stage(slot, checkpoint).and_then(|staged| self.commit(staged)))?;

        log::info!(
            "Saved {} checkpoint {} (epoch {}, roc {})",
            slot,
            checkpoint.version,
            checkpoint.epoch,
            checkpoint.roc_auc.map(|r| format!("{:.4}", r)).unwrap_or_else(|| "-".into())
        );
        Ok(())
    }

    pub fn load(&self, slot: CheckpointSlot) -> DetectorResult<Checkpoint> {
        let path = self.path(slot);
        let bytes = fs::read(&path).map_err(|source| DetectorError::CheckpointIo {
            path: path.clone(),
            source,
        })?;
        let checkpoint = Checkpoint::from_bytes(&bytes)?;
        log::info!("Loaded {} checkpoint {} from {}", slot, checkpoint.version, path.display());
        Ok(checkpoint)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::logic::model::Architecture;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    fn checkpoint(seed: u64, epoch: usize) -> Checkpoint {
        let arch = Architecture::new(4, 2);
        let mut rng = StdRng::seed_from_u64(seed);
        let g = Generator::new(arch, &mut rng);
        let d = Discriminator::new(arch, &mut rng);
        Checkpoint::new(g, d, epoch, Some(0.75))
    }

    #[test]
    fn test_save_and_load_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let store = CheckpointStore::open(dir.path()).unwrap();
        let ckpt = checkpoint(1, 3).with_score_range(Some(ScoreRange { min: 0.1, max: 2.0 }));

        store.save(CheckpointSlot::Best, &ckpt).unwrap();
        assert!(store.exists(CheckpointSlot::Best));
        assert!(!store.exists(CheckpointSlot::Current));

        let loaded = store.load(CheckpointSlot::Best).unwrap();
        assert_eq!(loaded, ckpt);
    }

    #[test]
    fn test_crash_between_stage_and_commit_keeps_previous() {
        let dir = tempfile::tempdir().unwrap();
        let store = CheckpointStore::open(dir.path()).unwrap();
        let committed = checkpoint(1, 1);
        store.save(CheckpointSlot::Current, &committed).unwrap();

        // Crash: the new pair is on disk as a temp file, the rename never happens
        let staged = store.stage(CheckpointSlot::Current, &checkpoint(2, 2)).unwrap();
        assert!(staged.path().exists());
        let tmp = staged.path().to_path_buf();
        drop(staged);
        assert!(!tmp.exists());

        let loaded = store.load(CheckpointSlot::Current).unwrap();
        assert_eq!(loaded.version, committed.version);
        assert_eq!(loaded.generator, committed.generator);
        assert_eq!(loaded.discriminator, committed.discriminator);
    }

    #[test]
    fn test_commit_replaces_pair() {
        let dir = tempfile::tempdir().unwrap();
        let store = CheckpointStore::open(dir.path()).unwrap();
        store.save(CheckpointSlot::Current, &checkpoint(1, 1)).unwrap();

        let next = checkpoint(2, 2);
        let staged = store.stage(CheckpointSlot::Current, &next).unwrap();
        store.commit(staged).unwrap();
        assert_eq!(store.load(CheckpointSlot::Current).unwrap().version, next.version);
    }

    #[test]
    fn test_tampered_payload_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let store = CheckpointStore::open(dir.path()).unwrap();
        store.save(CheckpointSlot::Best, &checkpoint(1, 1)).unwrap();

        let path = store.path(CheckpointSlot::Best);
        let mut bytes = fs::read(&path).unwrap();
        let last = bytes.len() - 2;
        bytes[last] = if bytes[last] == b'0' { b'1' } else { b'0' };
        fs::write(&path, bytes).unwrap();

        assert!(matches!(
            store.load(CheckpointSlot::Best),
            Err(DetectorError::CheckpointCorrupt(_))
        ));
    }

    #[test]
    fn test_foreign_layer_shape_is_rejected() {
        let mut payload = serde_json::to_value(checkpoint(1, 1)).unwrap();
        // Valid checksum, but the first encoder layer has three output channels
        payload["generator"]["encoder"]["layers"][0]["weight"] =
            serde_json::to_value(ndarray::Array3::<f32>::zeros((3, 1, 4))).unwrap();
        payload["generator"]["encoder"]["layers"][0]["bias"] =
            serde_json::to_value(ndarray::Array1::<f32>::zeros(3)).unwrap();
        let body = serde_json::to_vec(&payload).unwrap();
        let mut bytes = format!("{}{}\n", HEADER_MAGIC, hex::encode(Sha256::digest(&body))).into_bytes();
        bytes.extend_from_slice(&body);

        match Checkpoint::from_bytes(&bytes) {
            Err(DetectorError::CheckpointCorrupt(reason)) => {
                assert!(reason.contains("generator encoder"), "{}", reason)
            }
            other => panic!("expected CheckpointCorrupt, got {:?}", other.map(|c| c.version)),
        }

        let mut payload = serde_json::to_value(checkpoint(2, 1)).unwrap();
        payload["discriminator"]["classifier"]["bias"] =
            serde_json::to_value(ndarray::Array1::<f32>::zeros(2)).unwrap();
        let body = serde_json::to_vec(&payload).unwrap();
        let mut bytes = format!("{}{}\n", HEADER_MAGIC, hex::encode(Sha256::digest(&body))).into_bytes();
        bytes.extend_from_slice(&body);
        assert!(matches!(Checkpoint::from_bytes(&bytes), Err(DetectorError::CheckpointCorrupt(_))));
    }

    #[test]
    fn test_foreign_layout_is_rejected() {
        let mut ckpt = checkpoint(1, 1);
        ckpt.layout_hash ^= 0xdead_beef;
        let bytes = ckpt.to_bytes().unwrap();
        assert!(matches!(
            Checkpoint::from_bytes(&bytes),
            Err(DetectorError::LayoutMismatch { .. })
        ));
    }

    #[test]
    fn test_missing_checkpoint_is_io_error() {
        let dir = tempfile::tempdir().unwrap();
        let store = CheckpointStore::open(dir.path()).unwrap();
        let err = store.load(CheckpointSlot::Current).unwrap_err();
        assert!(err.is_fatal());
    }

    #[test]
    fn test_unwritable_store_fails_after_retry() {
        let dir = tempfile::tempdir().unwrap();
        let store = CheckpointStore::open(dir.path().join("run")).unwrap();
        // Replace the directory with a plain file
        fs::remove_dir(store.dir()).unwrap();
        fs::write(store.dir(), b"not a directory").unwrap();

        let err = store.save(CheckpointSlot::Current, &checkpoint(1, 1)).unwrap_err();
        assert!(matches!(err, DetectorError::CheckpointIo { .. }));
    }

    #[test]
    fn test_retry_succeeds_on_second_attempt() {
        let mut attempts = 0;
        let result = retry_once(|| {
            attempts += 1;
            if attempts == 1 {
                Err(DetectorError::CheckpointIo {
                    path: PathBuf::from("current.ckpt.json"),
                    source: std::io::Error::new(std::io::ErrorKind::Other, "disk hiccup"),
                })
            } else {
                Ok(attempts)
            }
        });
        assert_eq!(result.unwrap(), 2);
    }

    #[test]
    fn test_non_io_errors_are_not_retried() {
        let mut attempts = 0;
        let result: DetectorResult<()> = retry_once(|| {
            attempts += 1;
            Err(DetectorError::CheckpointCorrupt("bad payload".into()))
        });
        assert!(result.is_err());
        assert_eq!(attempts, 1);
    }

    #[test]
    fn test_open_existing_does_not_create() {
        let dir = tempfile::tempdir().unwrap();
        let missing = dir.path().join("typo");
        assert!(matches!(
            CheckpointStore::open_existing(&missing),
            Err(DetectorError::CheckpointIo { .. })
        ));
        assert!(!missing.exists());
        assert!(CheckpointStore::open_existing(dir.path()).is_ok());
    }

    #[test]
    fn test_slot_parsing() {
        assert_eq!("best".parse::<CheckpointSlot>().unwrap(), CheckpointSlot::Best);
        assert_eq!("Current".parse::<CheckpointSlot>().unwrap(), CheckpointSlot::Current);
        assert!("latest-ish".parse::<CheckpointSlot>().is_err());
    }
}
