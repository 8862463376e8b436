//! Per-cycle working directory.
//!
//! Every cycle gets `<work_root>/<app>/<path>`, cleared on entry and guarded by
//! a lock file so two cycles for the same application never share artifacts.

use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Component, Path, PathBuf};
use std::time::{Duration, SystemTime};

use crate::error::WorkspaceError;

pub const MANIFEST_FILE_NAME: &str = "manifest.yaml";
pub const SIGNED_MANIFEST_FILE_NAME: &str = "manifest.signed";
pub const PROVENANCE_FILE_NAME: &str = "provenance.json";
pub const ATTESTATION_FILE_NAME: &str = "attestation.json";
pub const CONFIG_FILE_NAME: &str = "configmap.yaml";
pub const SOURCE_CHECKOUT_DIR: &str = "source";

const LOCK_FILE_NAME: &str = ".cycle.lock";
const STALE_LOCK_AGE: Duration = Duration::from_secs(60 * 60);

type Result<T> = std::result::Result<T, WorkspaceError>;

/// Resolves the working directory for an application, dropping any path
/// components that would escape the work root.
pub fn work_dir_for(work_root: &Path, app_name: &str, app_path: &str) -> PathBuf {
    let mut dir = work_root.to_path_buf();
    for part in [app_name, app_path] {
        for component in Path::new(part).components() {
            if let Component::Normal(name) = component {
                dir.push(name);
            }
        }
    }
    dir
}

/// Exclusive hold on a working directory, released on drop.
#[derive(Debug)]
pub struct WorkDirLock {
    path: Option<PathBuf>,
}

impl Drop for WorkDirLock {
    fn drop(&mut self) {
        if let Some(path) = self.path.take() {
            if let Err(e) = fs::remove_file(&path) {
                tracing::warn!("Failed to release work dir lock {}: {}", path.display(), e);
            }
        }
    }
}

/// Clears and locks `dir` for a new cycle.
pub fn prepare(dir: &Path) -> Result<WorkDirLock> {
    fs::create_dir_all(dir).map_err(|e| WorkspaceError::CreateDirectory {
        path: dir.to_path_buf(),
        source: e,
    })?;

    let lock_path = dir.join(LOCK_FILE_NAME);
    let lock = acquire_lock(&lock_path, dir)?;

    let entries = fs::read_dir(dir).map_err(|e| WorkspaceError::ReadFile {
        path: dir.to_path_buf(),
        source: e,
    })?;
    for entry in entries.flatten() {
        let path = entry.path();
        if path == lock_path {
            continue;
        }
        let removed = if path.is_dir() {
            fs::remove_dir_all(&path)
        } else {
            fs::remove_file(&path)
        };
        removed.map_err(|e| WorkspaceError::WriteFile {
            path: path.clone(),
            source: e,
        })?;
    }

    Ok(lock)
}

fn acquire_lock(lock_path: &Path, dir: &Path) -> Result<WorkDirLock> {
    for _ in 0..2 {
        match OpenOptions::new().write(true).create_new(true).open(lock_path) {
            Ok(mut file) => {
                let _ = writeln!(file, "{}", std::process::id());
                return Ok(WorkDirLock {
                    path: Some(lock_path.to_path_buf()),
                });
            }
            Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => {
                if !is_stale(lock_path) {
                    return Err(WorkspaceError::Locked(dir.to_path_buf()));
                }
                tracing::warn!("Replacing stale work dir lock {}", lock_path.display());
                let _ = fs::remove_file(lock_path);
            }
            Err(e) => {
                return Err(WorkspaceError::WriteFile {
                    path: lock_path.to_path_buf(),
                    source: e,
                })
            }
        }
    }
    Err(WorkspaceError::Locked(dir.to_path_buf()))
}

fn is_stale(lock_path: &Path) -> bool {
    fs::metadata(lock_path)
        .and_then(|m| m.modified())
        .ok()
        .and_then(|modified| SystemTime::now().duration_since(modified).ok())
        .is_some_and(|age| age > STALE_LOCK_AGE)
}

/// Writes `content` to `path` as a whole: a sibling temp file is renamed into place.
pub fn write_atomic(path: &Path, content: &[u8]) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).map_err(|e| WorkspaceError::CreateDirectory {
            path: parent.to_path_buf(),
            source: e,
        })?;
    }

    let file_name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    let tmp_path = path.with_file_name(format!(".{}.{}.tmp", file_name, uuid::Uuid::new_v4()));

    let write = || -> std::io::Result<()> {
        let mut file = OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&tmp_path)?;
        file.write_all(content)?;
        file.sync_all()?;
        fs::rename(&tmp_path, path)
    };

    write().map_err(|e| {
        let _ = fs::remove_file(&tmp_path);
        WorkspaceError::WriteFile {
            path: path.to_path_buf(),
            source: e,
        }
    })
}

pub fn read(path: &Path) -> Result<Vec<u8>> {
    fs::read(path).map_err(|e| WorkspaceError::ReadFile {
        path: path.to_path_buf(),
        source: e,
    })
}
