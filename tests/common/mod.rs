// tests/common/mod.rs

//! Shared fixtures for the integration suite

#![allow(dead_code)]

use stagehand::{
    CallbackEvent, CallbackKind, Header, PackageDb, ScriptStatus, Tag, Transaction,
    TransactionCallback, TransactionElement,
};
use std::fs::File;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use tempfile::TempDir;

/// One recorded callback emission
#[derive(Debug, Clone, PartialEq)]
pub enum Seen {
    Progress {
        kind: CallbackKind,
        amount: u64,
        total: u64,
    },
    Script {
        kind: CallbackKind,
        tag: String,
        status: ScriptStatus,
    },
    Error {
        kind: CallbackKind,
    },
}

/// Callback that records every event for later assertions
#[derive(Default)]
pub struct Recorder {
    seen: Mutex<Vec<Seen>>,
}

impl Recorder {
    pub fn events(&self) -> Vec<Seen> {
        self.seen.lock().unwrap().clone()
    }

    pub fn kinds(&self) -> Vec<CallbackKind> {
        self.events()
            .iter()
            .map(|e| match e {
                Seen::Progress { kind, .. } => *kind,
                Seen::Script { kind, .. } => *kind,
                Seen::Error { kind } => *kind,
            })
            .collect()
    }

    pub fn has(&self, kind: CallbackKind) -> bool {
        self.kinds().contains(&kind)
    }

    /// (amount, total) pairs for one progress kind, in emission order
    pub fn progress(&self, kind: CallbackKind) -> Vec<(u64, u64)> {
        self.events()
            .into_iter()
            .filter_map(|e| match e {
                Seen::Progress {
                    kind: k,
                    amount,
                    total,
                } if k == kind => Some((amount, total)),
                _ => None,
            })
            .collect()
    }

    /// (tag, status) pairs for one script kind, in emission order
    pub fn scripts(&self, kind: CallbackKind) -> Vec<(String, ScriptStatus)> {
        self.events()
            .into_iter()
            .filter_map(|e| match e {
                Seen::Script {
                    kind: k,
                    tag,
                    status,
                } if k == kind => Some((tag, status)),
                _ => None,
            })
            .collect()
    }

    /// Position of the first event matching `pred`
    pub fn position(&self, pred: impl Fn(&Seen) -> bool) -> Option<usize> {
        self.events().iter().position(pred)
    }
}

impl TransactionCallback for Recorder {
    fn event(&self, _element: &TransactionElement, event: &CallbackEvent) -> Option<File> {
        let seen = match event {
            CallbackEvent::Progress {
                kind,
                amount,
                total,
            } => Seen::Progress {
                kind: *kind,
                amount: *amount,
                total: *total,
            },
            CallbackEvent::Script { kind, tag, status } => Seen::Script {
                kind: *kind,
                tag: tag.to_string(),
                status: *status,
            },
            CallbackEvent::Error { kind } => Seen::Error { kind: *kind },
        };
        self.seen.lock().unwrap().push(seen);
        None
    }
}

/// A transaction over a temp root and an in-memory database, with a
/// recording callback attached
pub struct Fixture {
    pub tmp: TempDir,
    pub root: PathBuf,
    pub ts: Transaction,
    pub recorder: Arc<Recorder>,
}

pub fn fixture() -> Fixture {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn")),
        )
        .with_test_writer()
        .try_init();

    let tmp = TempDir::new().unwrap();
    let root = tmp.path().join("root");
    std::fs::create_dir_all(&root).unwrap();

    let recorder = Arc::new(Recorder::default());
    let mut ts = Transaction::new(&root, PackageDb::open_in_memory().unwrap());
    // the temp root is not a bootable tree; resolve under the prefix
    ts.set_chroot_enabled(false);
    ts.set_callback(recorder.clone());

    Fixture {
        tmp,
        root,
        ts,
        recorder,
    }
}

/// A minimal binary-package header
pub fn header(name: &str, version: &str) -> Header {
    let mut h = Header::new();
    h.put_str(Tag::Name, name);
    h.put_str(Tag::Version, version);
    h.put_str(Tag::Release, "1");
    h.put_str(Tag::Arch, "x86_64");
    h.put_str(Tag::Os, "linux");
    h
}

/// Write a container for `header` and reopen it for reading
pub fn package_file(dir: &Path, header: &Header, files: &[(&str, &[u8])]) -> File {
    let path = dir.join(format!("{}-{}.stgh", header.name(), header.version()));
    stagehand::package::write(&path, header, files).unwrap();
    File::open(&path).unwrap()
}

/// Build a container, read it back, and register the install element
pub fn add_install(
    ts: &mut Transaction,
    dir: &Path,
    header: &Header,
    files: &[(&str, &[u8])],
) -> usize {
    let mut file = package_file(dir, header, files);
    let (stamped, _status) = stagehand::package::read(&mut file).unwrap();
    ts.add_install_element(stamped, Some(file))
}
