// src/chroot.rs

//! Scoped chroot acquisition around a state machine run
//!
//! Entering returns a guard; dropping it restores the original root and
//! working directory through a directory handle saved before the switch.
//! A root of "/" is a no-op, and an unprivileged process also gets a
//! no-op guard: path resolution then happens under the root prefix
//! instead of inside a real chroot.

use crate::error::{Error, Result};
use nix::unistd::{chroot, fchdir, geteuid};
use std::fs::File;
use std::os::fd::AsRawFd;
use std::path::{Path, PathBuf};
use tracing::{debug, error};

/// Active chroot (or recorded decision not to enter one)
pub struct ChrootGuard {
    restore: Option<(File, PathBuf)>,
}

impl ChrootGuard {
    /// A guard that never entered and restores nothing
    pub fn noop() -> Self {
        Self { restore: None }
    }

    /// Whether a real chroot was entered
    pub fn entered(&self) -> bool {
        self.restore.is_some()
    }
}

/// Enter `root`, returning the guard that leaves it again
pub fn enter(root: &Path) -> Result<ChrootGuard> {
    if root == Path::new("/") {
        return Ok(ChrootGuard { restore: None });
    }
    if !geteuid().is_root() {
        debug!(
            "not entering chroot {} (unprivileged); resolving paths under the prefix",
            root.display()
        );
        return Ok(ChrootGuard { restore: None });
    }

    let old_root = File::open("/")?;
    let old_cwd = std::env::current_dir()?;
    chroot(root).map_err(|e| Error::Chroot(format!("entering {}: {}", root.display(), e)))?;
    std::env::set_current_dir("/")?;
    Ok(ChrootGuard {
        restore: Some((old_root, old_cwd)),
    })
}

impl Drop for ChrootGuard {
    fn drop(&mut self) {
        if let Some((old_root, old_cwd)) = self.restore.take() {
            if let Err(e) = fchdir(old_root.as_raw_fd()).and_then(|()| chroot(".")) {
                error!("failed to leave chroot: {}", e);
                return;
            }
            if let Err(e) = std::env::set_current_dir(&old_cwd) {
                error!("failed to restore working directory: {}", e);
            }
        }
    }
}
