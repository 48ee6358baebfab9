// src/header/mod.rs

//! Typed tag store for package metadata
//!
//! A [`Header`] maps a closed set of [`Tag`]s to typed [`Value`]s. Typed
//! getters return `None` when the entry is absent or holds a different
//! type, so callers never see a panic from a mis-typed header. Headers
//! serialize with serde: JSON blobs in the installed database, CBOR in the
//! package container.

use crate::version::Evr;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Header tags
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
pub enum Tag {
    // Identity
    Name,
    Epoch,
    Version,
    Release,
    Arch,
    Os,
    Summary,
    SourcePackage,
    Cookie,

    // Payload
    LongArchiveSize,
    PayloadDigest,
    Signature,
    FilePaths,
    FileStates,

    // Install bookkeeping
    InstallTime,
    InstallColor,
    InstallTid,
    InstallPrefixes,

    // Primary scriptlets (body + interpreter argv)
    PreInstall,
    PreInstallProg,
    PostInstall,
    PostInstallProg,
    PreRemove,
    PreRemoveProg,
    PostRemove,
    PostRemoveProg,
    PreTransaction,
    PreTransactionProg,
    PostTransaction,
    PostTransactionProg,
    VerifyScript,
    VerifyScriptProg,

    // Trigger arrays (parallel over dependency entries) and scripts
    // (indexed by TriggerIndexes values)
    TriggerNames,
    TriggerFlags,
    TriggerVersions,
    TriggerIndexes,
    TriggerScripts,
    TriggerScriptProgs,

    // Dependency triples
    RequireNames,
    RequireFlags,
    RequireVersions,
    ProvideNames,
    ProvideFlags,
    ProvideVersions,
}

/// Typed tag values
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Value {
    Str(String),
    StrVec(Vec<String>),
    U32(u32),
    U64(u64),
    U32Vec(Vec<u32>),
    Bin(Vec<u8>),
    Bool(bool),
}

/// A package header: typed tag store plus its database instance number
///
/// `instance` is 0 for a header that is not (yet) in the installed
/// database; the database assigns it on add.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Header {
    instance: u32,
    entries: BTreeMap<Tag, Value>,
}

impl Header {
    pub fn new() -> Self {
        Self::default()
    }

    /// Database instance number (0 = not installed)
    pub fn instance(&self) -> u32 {
        self.instance
    }

    pub fn set_instance(&mut self, instance: u32) {
        self.instance = instance;
    }

    pub fn has(&self, tag: Tag) -> bool {
        self.entries.contains_key(&tag)
    }

    pub fn put(&mut self, tag: Tag, value: Value) {
        self.entries.insert(tag, value);
    }

    pub fn put_str(&mut self, tag: Tag, s: impl Into<String>) {
        self.entries.insert(tag, Value::Str(s.into()));
    }

    pub fn put_str_vec(&mut self, tag: Tag, v: Vec<String>) {
        self.entries.insert(tag, Value::StrVec(v));
    }

    pub fn put_u32(&mut self, tag: Tag, n: u32) {
        self.entries.insert(tag, Value::U32(n));
    }

    pub fn put_u64(&mut self, tag: Tag, n: u64) {
        self.entries.insert(tag, Value::U64(n));
    }

    pub fn put_u32_vec(&mut self, tag: Tag, v: Vec<u32>) {
        self.entries.insert(tag, Value::U32Vec(v));
    }

    pub fn put_bin(&mut self, tag: Tag, v: Vec<u8>) {
        self.entries.insert(tag, Value::Bin(v));
    }

    pub fn put_bool(&mut self, tag: Tag, b: bool) {
        self.entries.insert(tag, Value::Bool(b));
    }

    pub fn get_str(&self, tag: Tag) -> Option<&str> {
        match self.entries.get(&tag) {
            Some(Value::Str(s)) => Some(s),
            _ => None,
        }
    }

    pub fn get_str_vec(&self, tag: Tag) -> Option<&[String]> {
        match self.entries.get(&tag) {
            Some(Value::StrVec(v)) => Some(v),
            _ => None,
        }
    }

    pub fn get_u32(&self, tag: Tag) -> Option<u32> {
        match self.entries.get(&tag) {
            Some(Value::U32(n)) => Some(*n),
            _ => None,
        }
    }

    pub fn get_u64(&self, tag: Tag) -> Option<u64> {
        match self.entries.get(&tag) {
            Some(Value::U64(n)) => Some(*n),
            Some(Value::U32(n)) => Some(u64::from(*n)),
            _ => None,
        }
    }

    pub fn get_u32_vec(&self, tag: Tag) -> Option<&[u32]> {
        match self.entries.get(&tag) {
            Some(Value::U32Vec(v)) => Some(v),
            _ => None,
        }
    }

    pub fn get_bin(&self, tag: Tag) -> Option<&[u8]> {
        match self.entries.get(&tag) {
            Some(Value::Bin(v)) => Some(v),
            _ => None,
        }
    }

    pub fn get_bool(&self, tag: Tag) -> Option<bool> {
        match self.entries.get(&tag) {
            Some(Value::Bool(b)) => Some(*b),
            _ => None,
        }
    }

    // Identity accessors

    pub fn name(&self) -> &str {
        self.get_str(Tag::Name).unwrap_or("")
    }

    pub fn epoch(&self) -> Option<&str> {
        self.get_str(Tag::Epoch)
    }

    pub fn version(&self) -> &str {
        self.get_str(Tag::Version).unwrap_or("")
    }

    pub fn release(&self) -> &str {
        self.get_str(Tag::Release).unwrap_or("")
    }

    pub fn arch(&self) -> Option<&str> {
        self.get_str(Tag::Arch)
    }

    pub fn os(&self) -> Option<&str> {
        self.get_str(Tag::Os)
    }

    /// True for a source package header
    pub fn is_source(&self) -> bool {
        self.get_bool(Tag::SourcePackage).unwrap_or(false)
    }

    /// Epoch:version-release of this header
    pub fn evr(&self) -> Evr {
        Evr {
            epoch: self
                .epoch()
                .and_then(|e| e.parse().ok())
                .unwrap_or(0),
            version: self.version().to_string(),
            release: match self.release() {
                "" => None,
                r => Some(r.to_string()),
            },
        }
    }

    /// `name-[epoch:]version-release` label used in log lines
    pub fn nevr(&self) -> String {
        format!("{}-{}", self.name(), self.evr())
    }

    /// Number of payload files
    pub fn file_count(&self) -> usize {
        self.get_str_vec(Tag::FilePaths).map_or(0, <[String]>::len)
    }
}
