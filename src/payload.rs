// src/payload.rs

//! Payload install and remove
//!
//! The machine hands PROCESS off to a [`PayloadDriver`]. Errors name the
//! failing file when one is known; install additionally reports how much
//! wall time went into decompression and digesting so the transaction's
//! op counters stay accurate. [`TarPayload`] is the stock driver: the
//! element's payload handle is a tar stream extracted under the install
//! root.

use crate::callback::CallbackKind;
use crate::engine::Machine;
use crate::files::{FileAction, Files};
use crate::transaction::{Transaction, TransactionElement};
use log::debug;
use std::collections::HashSet;
use std::fmt;
use std::fs::{self, File};
use std::path::{Component, Path, PathBuf};
use std::time::{Duration, Instant};

/// A payload failure, naming the failing file when known
#[derive(Debug)]
pub struct PayloadError {
    pub file: Option<String>,
    pub detail: String,
}

impl PayloadError {
    pub fn new(file: Option<String>, detail: impl fmt::Display) -> Self {
        Self {
            file,
            detail: detail.to_string(),
        }
    }
}

impl fmt::Display for PayloadError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.detail)
    }
}

impl std::error::Error for PayloadError {}

/// Wall time spent in the expensive parts of an install
#[derive(Debug, Default, Clone, Copy)]
pub struct PayloadStats {
    pub decompress: Duration,
    pub digest: Duration,
}

/// Installs and removes an element's files
pub trait PayloadDriver {
    /// Unpack `payload` under the machine's install root
    fn install(
        &self,
        ts: &Transaction,
        te: &TransactionElement,
        files: &Files,
        payload: &mut File,
        machine: &Machine<'_>,
    ) -> std::result::Result<PayloadStats, PayloadError>;

    /// Remove the element's files from the install root
    fn remove(
        &self,
        ts: &Transaction,
        te: &TransactionElement,
        files: &Files,
        machine: &Machine<'_>,
    ) -> std::result::Result<(), PayloadError>;
}

/// Stock driver: the payload is a tar stream
pub struct TarPayload;

impl PayloadDriver for TarPayload {
    fn install(
        &self,
        _ts: &Transaction,
        te: &TransactionElement,
        files: &Files,
        payload: &mut File,
        machine: &Machine<'_>,
    ) -> std::result::Result<PayloadStats, PayloadError> {
        let root = machine.install_root().to_path_buf();
        let actions = te.file_actions();
        let skipped: HashSet<&str> = files
            .iter()
            .enumerate()
            .filter(|(i, _)| matches!(actions.get(*i), Some(FileAction::Skip)))
            .map(|(_, entry)| entry.path.as_str())
            .collect();

        let start = Instant::now();
        let mut archive = tar::Archive::new(payload);
        let mut done: u64 = 0;

        let entries = archive
            .entries()
            .map_err(|e| PayloadError::new(None, format!("reading payload: {}", e)))?;
        for entry in entries {
            let mut entry =
                entry.map_err(|e| PayloadError::new(None, format!("reading payload: {}", e)))?;
            let rel = entry
                .path()
                .map_err(|e| PayloadError::new(None, format!("bad entry path: {}", e)))?
                .into_owned();
            let abs = format!("/{}", rel.display());
            if skipped.contains(abs.as_str()) {
                debug!("skipping {}", abs);
                continue;
            }

            let target = safe_join(&root, &rel)
                .map_err(|detail| PayloadError::new(Some(abs.clone()), detail))?;
            if let Some(parent) = target.parent() {
                fs::create_dir_all(parent)
                    .map_err(|e| PayloadError::new(Some(abs.clone()), e))?;
            }
            let size = entry.header().entry_size().unwrap_or(0);
            entry
                .unpack(&target)
                .map_err(|e| PayloadError::new(Some(abs.clone()), e))?;

            done += size;
            machine.notify(CallbackKind::InstallProgress, done);
        }

        Ok(PayloadStats {
            decompress: start.elapsed(),
            digest: Duration::ZERO,
        })
    }

    fn remove(
        &self,
        _ts: &Transaction,
        _te: &TransactionElement,
        files: &Files,
        machine: &Machine<'_>,
    ) -> std::result::Result<(), PayloadError> {
        let root = machine.install_root().to_path_buf();
        let mut removed: u64 = 0;

        // Reverse order so directory entries come after their contents
        for entry in files.iter().collect::<Vec<_>>().into_iter().rev() {
            let rel = Path::new(entry.path.trim_start_matches('/'));
            let target = safe_join(&root, rel)
                .map_err(|detail| PayloadError::new(Some(entry.path.clone()), detail))?;

            match fs::symlink_metadata(&target) {
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                    debug!("{} already absent", entry.path);
                }
                Err(e) => return Err(PayloadError::new(Some(entry.path.clone()), e)),
                Ok(meta) if meta.is_dir() => {
                    // Shared directories stay behind
                    if let Err(e) = fs::remove_dir(&target) {
                        debug!("leaving directory {}: {}", entry.path, e);
                    }
                }
                Ok(_) => {
                    fs::remove_file(&target)
                        .map_err(|e| PayloadError::new(Some(entry.path.clone()), e))?;
                }
            }

            removed += 1;
            machine.notify(CallbackKind::UninstallProgress, removed);
        }
        Ok(())
    }
}

/// Join a payload-relative path onto the root, refusing traversal
fn safe_join(root: &Path, rel: &Path) -> std::result::Result<PathBuf, String> {
    let mut out = root.to_path_buf();
    for component in rel.components() {
        match component {
            Component::Normal(part) => out.push(part),
            Component::CurDir => {}
            other => {
                return Err(format!(
                    "refusing path component {:?} in payload entry",
                    other
                ));
            }
        }
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_safe_join_normal() {
        let joined = safe_join(Path::new("/tmp/root"), Path::new("usr/bin/app")).unwrap();
        assert_eq!(joined, PathBuf::from("/tmp/root/usr/bin/app"));
    }

    #[test]
    fn test_safe_join_rejects_traversal() {
        assert!(safe_join(Path::new("/tmp/root"), Path::new("../escape")).is_err());
        assert!(safe_join(Path::new("/tmp/root"), Path::new("a/../../b")).is_err());
    }

    #[test]
    fn test_safe_join_ignores_curdir() {
        let joined = safe_join(Path::new("/r"), Path::new("./etc/./app.conf")).unwrap();
        assert_eq!(joined, PathBuf::from("/r/etc/app.conf"));
    }
}
