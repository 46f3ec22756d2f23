use anyhow::{Context, Result};
use std::path::{Path, PathBuf};
use tracing::{info, warn};

/// Scratch directory scoped to one agent invocation.
///
/// The name combines the eval id with a random suffix so concurrent runs of
/// the same eval never collide. The directory is removed when the guard is
/// dropped, on every exit path including panics during the run.
pub struct WorkDir {
    path: PathBuf,
    keep: bool,
}

impl WorkDir {
    pub fn create(base: &Path, eval_id: &str) -> Result<Self> {
        let suffix = uuid::Uuid::new_v4().simple().to_string();
        let name = format!("{}-{}", sanitize(eval_id), &suffix[..8]);
        let path = base.join(name);
        std::fs::create_dir_all(&path)
            .with_context(|| format!("Failed to create work dir {}", path.display()))?;
        Ok(Self { path, keep: false })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Leave the directory behind on drop, for debugging failed runs.
    pub fn keep(&mut self) {
        self.keep = true;
    }
}

impl Drop for WorkDir {
    fn drop(&mut self) {
        if self.keep {
            info!("Work dir preserved at {}", self.path.display());
            return;
        }
        if let Err(e) = std::fs::remove_dir_all(&self.path) {
            if self.path.exists() {
                warn!("Failed to cleanup {}: {}", self.path.display(), e);
            }
        }
    }
}

/// Eval ids come from user-authored documents; keep directory names tame.
fn sanitize(id: &str) -> String {
    id.chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '-' || c == '_' { c } else { '_' })
        .collect()
}

/// Scan the workspace base for leftover directories older than max_age_secs
/// (e.g. after a hard kill) and remove them.
pub async fn reap_stale_workdirs(base: &Path, max_age_secs: u64) {
    let mut entries = match tokio::fs::read_dir(base).await {
        Ok(e) => e,
        Err(_) => return,
    };

    let now = std::time::SystemTime::now();
    let mut reaped = 0u32;

    while let Ok(Some(entry)) = entries.next_entry().await {
        let path = entry.path();
        if !path.is_dir() {
            continue;
        }
        let Ok(metadata) = tokio::fs::metadata(&path).await else {
            continue;
        };
        let Ok(modified) = metadata.modified() else {
            continue;
        };
        let age = now.duration_since(modified).unwrap_or_default();
        if age.as_secs() > max_age_secs {
            if let Err(e) = tokio::fs::remove_dir_all(&path).await {
                warn!("Failed to reap {}: {}", path.display(), e);
            } else {
                reaped += 1;
            }
        }
    }

    if reaped > 0 {
        info!("Reaped {} stale work directories", reaped);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_create_and_drop_removes_dir() {
        let tmp = tempfile::tempdir().unwrap();
        let path;
        {
            let work = WorkDir::create(tmp.path(), "qc-mito-frac").unwrap();
            path = work.path().to_path_buf();
            assert!(path.exists());
            std::fs::write(path.join("eval_answer.json"), "{}").unwrap();
        }
        assert!(!path.exists());
    }

    #[test]
    fn test_unique_names_for_same_eval() {
        let tmp = tempfile::tempdir().unwrap();
        let a = WorkDir::create(tmp.path(), "t1").unwrap();
        let b = WorkDir::create(tmp.path(), "t1").unwrap();
        assert_ne!(a.path(), b.path());
    }

    #[test]
    fn test_keep_preserves_dir() {
        let tmp = tempfile::tempdir().unwrap();
        let path;
        {
            let mut work = WorkDir::create(tmp.path(), "t1").unwrap();
            work.keep();
            path = work.path().to_path_buf();
        }
        assert!(path.exists());
    }

    #[test]
    fn test_sanitize_path_hostile_id() {
        let tmp = tempfile::tempdir().unwrap();
        let work = WorkDir::create(tmp.path(), "../weird/id").unwrap();
        assert!(work.path().starts_with(tmp.path()));
    }

    #[tokio::test]
    async fn test_reap_ignores_fresh_dirs() {
        let tmp = tempfile::tempdir().unwrap();
        let fresh = tmp.path().join("fresh-run");
        tokio::fs::create_dir_all(&fresh).await.unwrap();
        reap_stale_workdirs(tmp.path(), 3600).await;
        assert!(fresh.exists());
    }

    #[tokio::test]
    async fn test_reap_missing_base_is_noop() {
        reap_stale_workdirs(Path::new("/tmp/nonexistent_bioeval_base_xyz"), 0).await;
    }
}
