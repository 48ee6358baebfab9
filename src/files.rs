// src/files.rs

//! File snapshots and per-file install bookkeeping
//!
//! A [`Files`] snapshot is taken from a header when a state machine is
//! built and owned by it for the duration of the run. Per-file states are
//! what the installed database records; per-file actions tell the payload
//! driver what to do with each entry.

use crate::header::{Header, Tag};
use serde::{Deserialize, Serialize};

/// Recorded state of an installed file
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[repr(u8)]
pub enum FileState {
    Normal = 0,
    Replaced = 1,
    NotInstalled = 2,
    NetShared = 3,
    WrongColor = 4,
}

impl FileState {
    pub fn as_byte(self) -> u8 {
        self as u8
    }

    pub fn from_byte(b: u8) -> Option<Self> {
        match b {
            0 => Some(Self::Normal),
            1 => Some(Self::Replaced),
            2 => Some(Self::NotInstalled),
            3 => Some(Self::NetShared),
            4 => Some(Self::WrongColor),
            _ => None,
        }
    }
}

/// What the payload driver should do with one file
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FileAction {
    #[default]
    Unknown,
    Create,
    Erase,
    Skip,
}

/// One file in a package payload
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileEntry {
    pub path: String,
}

/// Immutable snapshot of an element's file list
#[derive(Debug, Clone, Default)]
pub struct Files {
    entries: Vec<FileEntry>,
}

impl Files {
    /// Snapshot the file list out of a header
    pub fn from_header(header: &Header) -> Self {
        let entries = header
            .get_str_vec(Tag::FilePaths)
            .unwrap_or(&[])
            .iter()
            .map(|p| FileEntry { path: p.clone() })
            .collect();
        Self { entries }
    }

    pub fn count(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn path(&self, index: usize) -> Option<&str> {
        self.entries.get(index).map(|e| e.path.as_str())
    }

    pub fn iter(&self) -> impl Iterator<Item = &FileEntry> {
        self.entries.iter()
    }
}

/// A file the incoming package takes over from another installed package
///
/// The file at index `other_file_num` of the database package at offset
/// `other_pkg` transitions to `new_state` once the install succeeds.
/// Replaced-file lists are grouped by `other_pkg`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SharedFile {
    pub other_pkg: u32,
    pub other_file_num: u32,
    pub new_state: FileState,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_state_byte_roundtrip() {
        for state in [
            FileState::Normal,
            FileState::Replaced,
            FileState::NotInstalled,
            FileState::NetShared,
            FileState::WrongColor,
        ] {
            assert_eq!(FileState::from_byte(state.as_byte()), Some(state));
        }
        assert_eq!(FileState::from_byte(99), None);
    }

    #[test]
    fn test_snapshot_from_header() {
        let mut h = Header::new();
        h.put_str_vec(
            Tag::FilePaths,
            vec!["/etc/app.conf".into(), "/usr/bin/app".into()],
        );
        let files = Files::from_header(&h);
        assert_eq!(files.count(), 2);
        assert_eq!(files.path(1), Some("/usr/bin/app"));
        assert_eq!(files.path(2), None);
    }

    #[test]
    fn test_snapshot_of_fileless_header() {
        let files = Files::from_header(&Header::new());
        assert!(files.is_empty());
    }
}
