// src/engine/replaced.rs

//! Replaced-instance and replaced-files bookkeeping
//!
//! Reinstalling the same package records the existing database row on the
//! element so POST removes it before adding the new header. After a
//! successful install, files taken over from other installed packages get
//! their state bytes rewritten in those packages' stored headers.

use super::Machine;
use crate::error::Result;
use crate::header::Tag;
use crate::transaction::{Transaction, TransactionElement};
use log::warn;

/// Record which existing database row a reinstall is replacing
///
/// Matches on name plus exact epoch, version, and release; on a colored
/// transaction the arch and os must match too. The first hit becomes the
/// element's database instance.
pub(crate) fn mark_replaced_instance(ts: &Transaction, te: &TransactionElement) -> Result<()> {
    let header = te.header();
    for (offset, other) in ts.db().find_by_name(header.name())? {
        if other.epoch() != header.epoch()
            || other.version() != header.version()
            || other.release() != header.release()
        {
            continue;
        }
        if ts.color() != 0 && (other.arch() != header.arch() || other.os() != header.os()) {
            continue;
        }
        te.set_db_instance(offset);
        break;
    }
    Ok(())
}

impl Machine<'_> {
    /// Rewrite other packages' file states for files this element took over
    ///
    /// Walks the element's replaced-file list (grouped by owning package),
    /// loads each distinct package's header once, flips the state bytes
    /// that differ, and rewrites only headers that actually changed.
    /// Problems here are logged, never fatal.
    pub(crate) fn mark_replaced_files(&self) -> Result<()> {
        let replaced = self.te.replaced();
        if replaced.is_empty() {
            return Ok(());
        }

        // Distinct owning packages, in encounter order; the list is
        // grouped so an adjacent check suffices.
        let mut offsets: Vec<u32> = Vec::new();
        let mut prev = 0;
        for shared in &replaced {
            if prev != 0 && prev == shared.other_pkg {
                continue;
            }
            prev = shared.other_pkg;
            offsets.push(shared.other_pkg);
        }

        let pairs = match self.ts.db().headers_by_offsets(&offsets) {
            Ok(pairs) => pairs,
            Err(e) => {
                warn!("cannot load headers for replaced files: {}", e);
                return Ok(());
            }
        };

        let mut cursor = replaced.iter().peekable();
        for (offset, mut header) in pairs {
            let mut states = match header.get_bin(Tag::FileStates) {
                Some(bytes) => bytes.to_vec(),
                None => {
                    // No state array to rewrite; drop this package's entries
                    while cursor.next_if(|s| s.other_pkg == offset).is_some() {}
                    continue;
                }
            };

            let mut modified = false;
            while let Some(shared) = cursor.next_if(|s| s.other_pkg == offset) {
                if let Some(slot) = states.get_mut(shared.other_file_num as usize) {
                    let new_state = shared.new_state.as_byte();
                    if *slot != new_state {
                        *slot = new_state;
                        modified = true;
                    }
                } else {
                    warn!(
                        "replaced file index {} out of range for package at offset {}",
                        shared.other_file_num, offset
                    );
                }
            }

            if modified {
                header.put_bin(Tag::FileStates, states);
                if let Err(e) = self.ts.db().replace_header(offset, &header) {
                    warn!("cannot rewrite header at offset {}: {}", offset, e);
                }
            }
        }
        Ok(())
    }
}
