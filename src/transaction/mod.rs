// src/transaction/mod.rs

//! Transaction set and transaction elements
//!
//! A [`Transaction`] is the container one state machine run borrows from:
//! global flags, the installed database, plugin registry, payload driver,
//! notification callback, and the per-operation wall-clock counters. A
//! [`TransactionElement`] is one package's presence in it. Elements are
//! borrowed by the machine and must outlive it; their mutable state
//! (header, file states, payload handle, database instance) sits behind
//! cells because only one machine runs at a time per transaction.

use crate::callback::{NullCallback, TransactionCallback};
use crate::db::PackageDb;
use crate::files::{FileAction, FileState, Files, SharedFile};
use crate::header::{Header, Tag};
use crate::payload::{PayloadDriver, TarPayload};
use crate::plugins::PluginRegistry;
use bitflags::bitflags;
use std::cell::{Cell, Ref, RefCell, RefMut};
use std::fs::File;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};

bitflags! {
    /// Global switches for a transaction
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct TransactionFlags: u32 {
        /// Dry run: state machine runs become no-ops
        const TEST            = 1 << 0;
        /// Touch only the database, never the filesystem
        const JUSTDB          = 1 << 1;
        const NOPRE           = 1 << 2;
        const NOPOST          = 1 << 3;
        const NOPREUN         = 1 << 4;
        const NOPOSTUN        = 1 << 5;
        const NOTRIGGERPREIN  = 1 << 6;
        const NOTRIGGERIN     = 1 << 7;
        const NOTRIGGERUN     = 1 << 8;
        const NOTRIGGERPOSTUN = 1 << 9;
    }
}

impl TransactionFlags {
    /// All primary-scriptlet suppressions
    pub const NOSCRIPTS: TransactionFlags = TransactionFlags::NOPRE
        .union(TransactionFlags::NOPOST)
        .union(TransactionFlags::NOPREUN)
        .union(TransactionFlags::NOPOSTUN);

    /// All trigger suppressions
    pub const NOTRIGGERS: TransactionFlags = TransactionFlags::NOTRIGGERPREIN
        .union(TransactionFlags::NOTRIGGERIN)
        .union(TransactionFlags::NOTRIGGERUN)
        .union(TransactionFlags::NOTRIGGERPOSTUN);
}

bitflags! {
    /// Problem filters: conditions the caller elected to ignore
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct ProblemFilter: u32 {
        /// Allow reinstalling the same package over itself
        const REPLACEPKG = 1 << 0;
    }
}

/// Operations whose wall time the transaction accumulates
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Op {
    Install,
    Erase,
    Scriptlets,
    DbAdd,
    DbRemove,
    Decompress,
    Digest,
}

impl Op {
    const COUNT: usize = 7;

    fn index(self) -> usize {
        match self {
            Op::Install => 0,
            Op::Erase => 1,
            Op::Scriptlets => 2,
            Op::DbAdd => 3,
            Op::DbRemove => 4,
            Op::Decompress => 5,
            Op::Digest => 6,
        }
    }
}

/// Accumulated wall time per operation
#[derive(Debug, Default)]
pub struct OpTimes {
    spent: [Cell<Duration>; Op::COUNT],
}

impl OpTimes {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&self, op: Op, delta: Duration) {
        let cell = &self.spent[op.index()];
        cell.set(cell.get() + delta);
    }

    pub fn total(&self, op: Op) -> Duration {
        self.spent[op.index()].get()
    }

    /// Time a scope; the elapsed time lands when the guard drops
    pub fn timer(&self, op: Op) -> OpTimer<'_> {
        OpTimer {
            times: self,
            op,
            start: Instant::now(),
        }
    }
}

/// Drop guard returned by [`OpTimes::timer`]
pub struct OpTimer<'a> {
    times: &'a OpTimes,
    op: Op,
    start: Instant,
}

impl Drop for OpTimer<'_> {
    fn drop(&mut self) {
        self.times.add(self.op, self.start.elapsed());
    }
}

/// The container a state machine run executes against
pub struct Transaction {
    root: PathBuf,
    chroot_enabled: bool,
    flags: TransactionFlags,
    filter: ProblemFilter,
    color: u32,
    tid: u32,
    db: PackageDb,
    plugins: PluginRegistry,
    payload: Box<dyn PayloadDriver>,
    callback: Arc<dyn TransactionCallback>,
    script_file: Option<File>,
    ops: OpTimes,
    elements: Vec<TransactionElement>,
}

impl Transaction {
    /// Create a transaction over `root` and an installed database
    ///
    /// The transaction id defaults to the current epoch second.
    pub fn new(root: impl Into<PathBuf>, db: PackageDb) -> Self {
        Self {
            root: root.into(),
            chroot_enabled: true,
            flags: TransactionFlags::empty(),
            filter: ProblemFilter::empty(),
            color: 0,
            tid: chrono::Utc::now().timestamp() as u32,
            db,
            plugins: PluginRegistry::new(),
            payload: Box::new(TarPayload),
            callback: Arc::new(NullCallback),
            script_file: None,
            ops: OpTimes::new(),
            elements: Vec::new(),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Whether a run acquires a chroot around itself (default: yes)
    ///
    /// Prefix installs driven by an unprivileged process, and tests,
    /// turn this off; paths then resolve under the root prefix.
    pub fn chroot_enabled(&self) -> bool {
        self.chroot_enabled
    }

    pub fn set_chroot_enabled(&mut self, enabled: bool) {
        self.chroot_enabled = enabled;
    }

    pub fn flags(&self) -> TransactionFlags {
        self.flags
    }

    pub fn set_flags(&mut self, flags: TransactionFlags) {
        self.flags = flags;
    }

    pub fn filter(&self) -> ProblemFilter {
        self.filter
    }

    pub fn set_filter(&mut self, filter: ProblemFilter) {
        self.filter = filter;
    }

    pub fn color(&self) -> u32 {
        self.color
    }

    pub fn set_color(&mut self, color: u32) {
        self.color = color;
    }

    pub fn tid(&self) -> u32 {
        self.tid
    }

    pub fn set_tid(&mut self, tid: u32) {
        self.tid = tid;
    }

    pub fn db(&self) -> &PackageDb {
        &self.db
    }

    pub fn plugins(&self) -> &PluginRegistry {
        &self.plugins
    }

    pub fn plugins_mut(&mut self) -> &mut PluginRegistry {
        &mut self.plugins
    }

    pub fn payload_driver(&self) -> &dyn PayloadDriver {
        self.payload.as_ref()
    }

    pub fn set_payload_driver(&mut self, driver: Box<dyn PayloadDriver>) {
        self.payload = driver;
    }

    pub fn callback(&self) -> &dyn TransactionCallback {
        self.callback.as_ref()
    }

    pub fn set_callback(&mut self, callback: Arc<dyn TransactionCallback>) {
        self.callback = callback;
    }

    /// Fallback file for script output capture
    pub fn script_fd(&self) -> Option<File> {
        self.script_file.as_ref().and_then(|f| f.try_clone().ok())
    }

    pub fn set_script_file(&mut self, file: Option<File>) {
        self.script_file = file;
    }

    pub fn ops(&self) -> &OpTimes {
        &self.ops
    }

    /// Add an element to be installed; returns its index
    pub fn add_install_element(&mut self, header: Header, payload: Option<File>) -> usize {
        self.elements.push(TransactionElement::for_install(header, payload));
        self.elements.len() - 1
    }

    /// Add an element to be erased; returns its index
    ///
    /// The header's instance number records which database row it is.
    pub fn add_erase_element(&mut self, header: Header) -> usize {
        self.elements.push(TransactionElement::for_erase(header));
        self.elements.len() - 1
    }

    pub fn element(&self, index: usize) -> Option<&TransactionElement> {
        self.elements.get(index)
    }

    pub fn element_count(&self) -> usize {
        self.elements.len()
    }

    /// Drop all elements
    pub fn empty(&mut self) {
        self.elements.clear();
    }
}

/// One package's presence in a transaction
pub struct TransactionElement {
    header: RefCell<Header>,
    files: Files,
    file_states: RefCell<Vec<u8>>,
    file_actions: RefCell<Vec<FileAction>>,
    replaced: RefCell<Vec<SharedFile>>,
    payload: RefCell<Option<File>>,
    db_instance: Cell<u32>,
}

impl TransactionElement {
    fn for_install(header: Header, payload: Option<File>) -> Self {
        let files = Files::from_header(&header);
        let fc = files.count();
        Self {
            header: RefCell::new(header),
            files,
            file_states: RefCell::new(vec![FileState::Normal.as_byte(); fc]),
            file_actions: RefCell::new(vec![FileAction::Create; fc]),
            replaced: RefCell::new(Vec::new()),
            payload: RefCell::new(payload),
            db_instance: Cell::new(0),
        }
    }

    fn for_erase(header: Header) -> Self {
        let files = Files::from_header(&header);
        let fc = files.count();
        let states = header
            .get_bin(Tag::FileStates)
            .map(<[u8]>::to_vec)
            .unwrap_or_else(|| vec![FileState::Normal.as_byte(); fc]);
        let instance = header.instance();
        Self {
            header: RefCell::new(header),
            files,
            file_states: RefCell::new(states),
            file_actions: RefCell::new(vec![FileAction::Erase; fc]),
            replaced: RefCell::new(Vec::new()),
            payload: RefCell::new(None),
            db_instance: Cell::new(instance),
        }
    }

    pub fn header(&self) -> Ref<'_, Header> {
        self.header.borrow()
    }

    pub fn header_mut(&self) -> RefMut<'_, Header> {
        self.header.borrow_mut()
    }

    pub fn name(&self) -> String {
        self.header.borrow().name().to_string()
    }

    pub fn nevr(&self) -> String {
        self.header.borrow().nevr()
    }

    /// The element's file list, snapshotted at creation
    pub fn files(&self) -> &Files {
        &self.files
    }

    pub fn file_states(&self) -> Vec<u8> {
        self.file_states.borrow().clone()
    }

    pub fn set_file_state(&self, index: usize, state: FileState) {
        if let Some(slot) = self.file_states.borrow_mut().get_mut(index) {
            *slot = state.as_byte();
        }
    }

    pub fn file_actions(&self) -> Vec<FileAction> {
        self.file_actions.borrow().clone()
    }

    pub fn set_action(&self, index: usize, action: FileAction) {
        if let Some(slot) = self.file_actions.borrow_mut().get_mut(index) {
            *slot = action;
        }
    }

    pub fn set_all_actions(&self, action: FileAction) {
        self.file_actions.borrow_mut().fill(action);
    }

    /// Files this element takes over from other installed packages
    pub fn replaced(&self) -> Vec<SharedFile> {
        self.replaced.borrow().clone()
    }

    pub fn set_replaced(&self, replaced: Vec<SharedFile>) {
        *self.replaced.borrow_mut() = replaced;
    }

    /// Take the payload handle (install elements only)
    pub fn take_payload(&self) -> Option<File> {
        self.payload.borrow_mut().take()
    }

    pub fn set_payload(&self, payload: Option<File>) {
        *self.payload.borrow_mut() = payload;
    }

    /// Database row this element occupies (0 = none)
    pub fn db_instance(&self) -> u32 {
        self.db_instance.get()
    }

    pub fn set_db_instance(&self, instance: u32) {
        self.db_instance.set(instance);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_flag_unions() {
        assert!(TransactionFlags::NOSCRIPTS.contains(TransactionFlags::NOPRE));
        assert!(TransactionFlags::NOSCRIPTS.contains(TransactionFlags::NOPOSTUN));
        assert!(!TransactionFlags::NOSCRIPTS.contains(TransactionFlags::NOTRIGGERIN));
        assert!(TransactionFlags::NOTRIGGERS.contains(TransactionFlags::NOTRIGGERPOSTUN));
    }

    #[test]
    fn test_op_times_accumulate() {
        let ops = OpTimes::new();
        ops.add(Op::DbAdd, Duration::from_millis(5));
        ops.add(Op::DbAdd, Duration::from_millis(7));
        assert_eq!(ops.total(Op::DbAdd), Duration::from_millis(12));
        assert_eq!(ops.total(Op::DbRemove), Duration::ZERO);
    }

    #[test]
    fn test_op_timer_guard() {
        let ops = OpTimes::new();
        {
            let _t = ops.timer(Op::Scriptlets);
            std::thread::sleep(Duration::from_millis(5));
        }
        assert!(ops.total(Op::Scriptlets) >= Duration::from_millis(5));
    }

    #[test]
    fn test_install_element_defaults() {
        let mut h = Header::new();
        h.put_str(Tag::Name, "a");
        h.put_str(Tag::Version, "1.0");
        h.put_str_vec(Tag::FilePaths, vec!["/x".into(), "/y".into()]);

        let te = TransactionElement::for_install(h, None);
        assert_eq!(te.files().count(), 2);
        assert_eq!(te.file_states(), vec![0, 0]);
        assert_eq!(te.file_actions(), vec![FileAction::Create; 2]);
        assert_eq!(te.db_instance(), 0);
    }

    #[test]
    fn test_erase_element_takes_states_and_instance() {
        let mut h = Header::new();
        h.put_str(Tag::Name, "a");
        h.put_str(Tag::Version, "1.0");
        h.put_str_vec(Tag::FilePaths, vec!["/x".into()]);
        h.put_bin(Tag::FileStates, vec![FileState::Replaced.as_byte()]);
        h.set_instance(7);

        let te = TransactionElement::for_erase(h);
        assert_eq!(te.file_states(), vec![1]);
        assert_eq!(te.db_instance(), 7);
    }

    #[test]
    fn test_transaction_elements() {
        let db = PackageDb::open_in_memory().unwrap();
        let mut ts = Transaction::new("/", db);
        let mut h = Header::new();
        h.put_str(Tag::Name, "a");
        h.put_str(Tag::Version, "1.0");

        let ix = ts.add_install_element(h, None);
        assert_eq!(ix, 0);
        assert_eq!(ts.element_count(), 1);
        assert!(ts.element(0).is_some());

        ts.empty();
        assert_eq!(ts.element_count(), 0);
    }
}
