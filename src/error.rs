// src/error.rs

//! Crate-wide error type and result alias

use thiserror::Error;

/// Errors surfaced by the state machine and its collaborators
#[derive(Debug, Error)]
pub enum Error {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("database error: {0}")]
    Db(#[from] rusqlite::Error),

    #[error("header error: {0}")]
    Header(String),

    #[error("invalid version: {0}")]
    Version(String),

    #[error("bad package: {0}")]
    Package(String),

    #[error("{tag} scriptlet failed: {detail}")]
    Script { tag: String, detail: String },

    #[error("trigger execution failed: {0}")]
    Trigger(String),

    #[error("unpacking of archive failed: {0}")]
    Unpack(String),

    #[error("file removal failed: {0}")]
    Remove(String),

    #[error("chroot error: {0}")]
    Chroot(String),

    #[error("plugin rejected element: {0}")]
    Plugin(String),

    /// Distinct from a hard failure: the operation had nothing to act on.
    #[error("not found: {0}")]
    NotFound(String),
}

/// Result type used throughout the crate
pub type Result<T> = std::result::Result<T, Error>;
