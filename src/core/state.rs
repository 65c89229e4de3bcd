//! SC-011: Outputs lock management: load, save (atomic), path derivation.

use super::types::{CompositionLock, StackLock, StackStatus};
use std::path::{Path, PathBuf};

/// Derive the lock file path for an environment within the state directory.
pub fn lock_file_path(state_dir: &Path, environment: &str) -> PathBuf {
    state_dir.join(environment).join("outputs.lock.yaml")
}

/// Load the lock for an environment. Returns None if the file doesn't exist.
pub fn load_lock(state_dir: &Path, environment: &str) -> Result<Option<CompositionLock>, String> {
    let path = lock_file_path(state_dir, environment);
    if !path.exists() {
        return Ok(None);
    }
    let content = std::fs::read_to_string(&path)
        .map_err(|e| format!("cannot read {}: {}", path.display(), e))?;
    let lock: CompositionLock = serde_yaml_ng::from_str(&content)
        .map_err(|e| format!("invalid lock file {}: {}", path.display(), e))?;
    Ok(Some(lock))
}

/// Save a lock file atomically (write to temp, then rename).
pub fn save_lock(state_dir: &Path, lock: &CompositionLock) -> Result<(), String> {
    let path = lock_file_path(state_dir, &lock.environment);
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)
            .map_err(|e| format!("cannot create dir {}: {}", parent.display(), e))?;
    }

    let yaml = serde_yaml_ng::to_string(lock).map_err(|e| format!("serialize error: {}", e))?;

    let tmp_path = path.with_extension("yaml.tmp");
    std::fs::write(&tmp_path, &yaml)
        .map_err(|e| format!("cannot write {}: {}", tmp_path.display(), e))?;
    std::fs::rename(&tmp_path, &path).map_err(|e| {
        format!(
            "cannot rename {} → {}: {}",
            tmp_path.display(),
            path.display(),
            e
        )
    })?;

    tracing::debug!(path = %path.display(), stacks = lock.stacks.len(), "saved lock");
    Ok(())
}

/// Create a new empty lock for an environment.
pub fn new_lock(environment: &str) -> CompositionLock {
    use crate::tripwire::eventlog::now_iso8601;
    CompositionLock {
        schema: "1.0".to_string(),
        environment: environment.to_string(),
        generated_at: now_iso8601(),
        generator: format!("ccm-infra {}", env!("CARGO_PKG_VERSION")),
        blake3_version: "1.8".to_string(),
        stacks: indexmap::IndexMap::new(),
    }
}

/// Count of (built, failed) stacks in a lock.
pub fn status_counts(lock: &CompositionLock) -> (u32, u32) {
    lock.stacks.values().fold((0, 0), |(built, failed), s: &StackLock| match s.status {
        StackStatus::Built => (built + 1, failed),
        StackStatus::Failed => (built, failed + 1),
    })
}
