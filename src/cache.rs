use serde_json::{Map, Value};
use sha2::{Digest, Sha256};
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

use crate::error::EvalError;
use crate::runner::RunResult;

/// Durable store of completed runs, one JSON file per fingerprint under
/// `<base>/<cache_name>`. Entries are immutable once written; concurrent
/// writers for the same fingerprint race benignly (last writer wins). Read
/// and write failures degrade to a cache miss / no-op so a broken cache
/// never fails a run.
pub struct RunCache {
    dir: PathBuf,
}

impl RunCache {
    pub fn open(base: &Path, name: &str) -> Result<Self, EvalError> {
        let dir = base.join(name);
        std::fs::create_dir_all(&dir).map_err(EvalError::CacheIo)?;
        Ok(Self { dir })
    }

    pub fn get(&self, fingerprint: &str) -> Option<RunResult> {
        let path = self.entry_path(fingerprint);
        let raw = match std::fs::read_to_string(&path) {
            Ok(raw) => raw,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return None,
            Err(e) => {
                warn!("Cache read failed for {}: {}", path.display(), e);
                return None;
            }
        };
        match serde_json::from_str(&raw) {
            Ok(result) => {
                debug!("Cache hit: {}", fingerprint);
                Some(result)
            }
            Err(e) => {
                warn!("Corrupt cache entry {}: {}", path.display(), e);
                None
            }
        }
    }

    pub fn put(&self, fingerprint: &str, result: &RunResult) {
        let path = self.entry_path(fingerprint);
        let raw = match serde_json::to_string_pretty(result) {
            Ok(raw) => raw,
            Err(e) => {
                warn!("Failed to serialize cache entry {}: {}", fingerprint, e);
                return;
            }
        };
        // Write-then-rename keeps readers from ever seeing a partial entry.
        let tmp = path.with_extension("json.tmp");
        let write = std::fs::write(&tmp, &raw).and_then(|_| std::fs::rename(&tmp, &path));
        if let Err(e) = write {
            warn!("Cache write failed for {}: {}", path.display(), e);
        }
    }

    fn entry_path(&self, fingerprint: &str) -> PathBuf {
        self.dir.join(format!("{}.json", fingerprint))
    }
}

/// Derived key identifying a cacheable run: any change to the eval id, the
/// grader config, or the agent identity yields a new fingerprint, so stale
/// entries are orphaned rather than ever being reused or mutated.
///
/// Note the key does not cover grader *logic*: a corrected comparator can
/// replay stale verdicts until the caller switches to a fresh cache name.
pub fn fingerprint(eval_id: &str, grader_config: &Map<String, Value>, agent_identity: &str) -> String {
    // serde_json maps serialize with sorted keys, so this is canonical.
    let config = serde_json::to_string(grader_config).unwrap_or_default();
    let mut hasher = Sha256::new();
    hasher.update(eval_id.as_bytes());
    hasher.update([0u8]);
    hasher.update(config.as_bytes());
    hasher.update([0u8]);
    hasher.update(agent_identity.as_bytes());
    hex::encode(&hasher.finalize()[..16])
}
