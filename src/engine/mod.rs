// src/engine/mod.rs

//! The package state machine
//!
//! One [`Machine`] is created per (transaction, element, goal) and driven
//! through a fixed stage sequence: INIT → PRE → PROCESS → POST, with FINI
//! always running last. PRE and POST fan out into triggers, scriptlets,
//! and database mutation; PROCESS hands the payload to the transaction's
//! payload driver. The ordering here is the whole contract: pre-triggers
//! see the old world, post-triggers see the new, and a database add is
//! not undone by a later failure in the same run.
//!
//! # Stage sequence
//!
//! ```text
//! run ─ plugins pre ─ INIT ─ PRE ─ PROCESS ─ POST ─ FINI ─ plugins post
//!                      │      │        │        │
//!                      │      │        │        ├─ DB remove (replaced instance)
//!                      │      │        │        ├─ DB add
//!                      │      │        │        └─ post script + triggers
//!                      │      │        └─ payload install / remove
//!                      │      └─ pre triggers + pre script
//!                      └─ installed-count arithmetic
//! ```

mod replaced;
mod script;
mod source;
mod trigger;

pub use source::{SourceInstall, install_source_package};

use crate::callback::{CallbackEvent, CallbackKind};
use crate::chroot;
use crate::deps::SenseFlags;
use crate::error::{Error, Result};
use crate::files::Files;
use crate::header::Tag;
use crate::payload::PayloadError;
use crate::script::ScriptTag;
use crate::transaction::{Op, ProblemFilter, Transaction, TransactionElement, TransactionFlags};
use log::{debug, error};
use std::cell::Cell;
use std::path::{Path, PathBuf};
use strum_macros::Display;

/// Stages a machine can be driven through
///
/// `Unknown`, `Undo`, `Create`, and `Destroy` are reserved no-ops.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display)]
pub enum Stage {
    Unknown,
    Init,
    Pre,
    Process,
    Post,
    Undo,
    Fini,
    Create,
    Destroy,
    Triggers,
    ImmedTriggers,
    DbAdd,
    DbRemove,
}

/// What a run is trying to do with its element
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Goal {
    Install,
    Erase,
    Verify,
    PreTransaction,
    PostTransaction,
}

impl Goal {
    /// Fixed-width label used in log prefixes
    fn label(self) -> &'static str {
        match self {
            Goal::Install => "  install",
            Goal::Erase => "    erase",
            Goal::Verify => "   verify",
            Goal::PreTransaction => " pretrans",
            Goal::PostTransaction => "posttrans",
        }
    }
}

/// Per-run state machine context
///
/// Borrows the transaction and element (both must outlive it) and owns a
/// snapshot of the element's file list. Never reused across elements or
/// goals.
pub struct Machine<'a> {
    ts: &'a Transaction,
    te: &'a TransactionElement,
    files: Files,
    goal: Goal,
    goal_name: &'static str,
    /// Installed instances of this name, captured at INIT
    installed_count: i64,
    /// arg1 for the primary scriptlets, fixed at INIT
    script_arg: i64,
    /// Which trigger clauses currently apply
    sense: SenseFlags,
    /// Added to installed counts in trigger arg arithmetic
    count_correction: i64,
    what: Cell<Option<CallbackKind>>,
    amount: Cell<u64>,
    total: Cell<u64>,
    failed_file: Option<String>,
    stage: Stage,
    #[allow(dead_code)]
    next_stage: Stage,
    install_root: PathBuf,
}

/// Run one element through its goal
///
/// This is the sole lifecycle entry for an in-transaction element. For
/// install and erase the full stage pipeline executes under the plugin
/// hooks; the single-scriptlet goals (verify, pre/post-transaction) run
/// just that scriptlet. A TEST-flagged transaction no-ops.
pub fn run(ts: &Transaction, te: &TransactionElement, goal: Goal) -> Result<()> {
    // Nothing can fail in test mode because nothing runs
    if ts.flags().contains(TransactionFlags::TEST) {
        return Ok(());
    }

    let guard = if ts.chroot_enabled() {
        chroot::enter(ts.root())?
    } else {
        chroot::ChrootGuard::noop()
    };
    let mut machine = Machine::new(ts, te, goal);
    if guard.entered() {
        machine.install_root = PathBuf::from("/");
    }

    let rc = match goal {
        Goal::Install | Goal::Erase => {
            let rc = match ts.plugins().psm_pre(te) {
                Ok(()) => {
                    let op = if goal == Goal::Install {
                        Op::Install
                    } else {
                        Op::Erase
                    };
                    let _timer = ts.ops().timer(op);

                    let mut rc = Ok(());
                    for stage in [Stage::Init, Stage::Pre, Stage::Process, Stage::Post] {
                        rc = machine.next(stage);
                        if rc.is_err() {
                            break;
                        }
                    }
                    machine.fini(rc)
                }
                Err(e) => Err(e),
            };
            ts.plugins().psm_post(te, rc.is_ok());
            rc
        }
        Goal::Verify => machine.run_inst_script(ScriptTag::Verify),
        Goal::PreTransaction => machine.run_inst_script(ScriptTag::PreTransaction),
        Goal::PostTransaction => machine.run_inst_script(ScriptTag::PostTransaction),
    };

    drop(guard);
    rc
}

impl<'a> Machine<'a> {
    pub(crate) fn new(ts: &'a Transaction, te: &'a TransactionElement, goal: Goal) -> Self {
        Self {
            ts,
            te,
            files: te.files().clone(),
            goal,
            goal_name: goal.label(),
            installed_count: 0,
            script_arg: 0,
            sense: SenseFlags::empty(),
            count_correction: 0,
            what: Cell::new(None),
            amount: Cell::new(0),
            total: Cell::new(0),
            failed_file: None,
            stage: Stage::Unknown,
            next_stage: Stage::Unknown,
            install_root: ts.root().to_path_buf(),
        }
    }

    /// Root all filesystem work resolves under
    pub fn install_root(&self) -> &Path {
        &self.install_root
    }

    pub fn current_stage(&self) -> Stage {
        self.stage
    }

    pub fn total(&self) -> u64 {
        self.total.get()
    }

    /// Coalescing progress emission
    ///
    /// Emits `(what, amount, total)` to the transaction callback only
    /// when `amount` grew or `what` changed; `amount` never decreases.
    pub fn notify(&self, what: CallbackKind, amount: u64) {
        let mut changed = false;
        if amount > self.amount.get() {
            self.amount.set(amount);
            changed = true;
        }
        if self.what.get() != Some(what) {
            self.what.set(Some(what));
            changed = true;
        }
        if changed {
            self.ts.callback().event(
                self.te,
                &CallbackEvent::Progress {
                    kind: what,
                    amount: self.amount.get(),
                    total: self.total.get(),
                },
            );
        }
    }

    /// Request `stage` as the next recursion target and drive it
    fn next(&mut self, stage: Stage) -> Result<()> {
        self.next_stage = stage;
        self.drive(stage)
    }

    /// Perform one stage
    pub(crate) fn drive(&mut self, stage: Stage) -> Result<()> {
        self.stage = stage;
        match stage {
            Stage::Unknown | Stage::Undo | Stage::Create | Stage::Destroy => Ok(()),
            Stage::Init => self.init(),
            Stage::Pre => self.pre(),
            Stage::Process => self.process(),
            Stage::Post => self.post(),
            Stage::Fini => self.fini(Ok(())),
            Stage::Triggers => self.run_triggers(),
            Stage::ImmedTriggers => self.run_immed_triggers(),
            Stage::DbAdd => self.db_add(),
            Stage::DbRemove => self.db_remove(),
        }
    }

    fn init(&mut self) -> Result<()> {
        let fc = self.files.count();
        debug!("{}: {} has {} files", self.goal_name, self.te.nevr(), fc);

        // Scripts get an argument encoding how many instances of this
        // name will be installed once the element completes.
        self.installed_count = self.ts.db().count_packages(&self.te.name())?;

        match self.goal {
            Goal::Install => {
                self.script_arg = self.installed_count + 1;

                self.amount.set(0);
                let archive_size = self
                    .te
                    .header()
                    .get_u64(Tag::LongArchiveSize)
                    .unwrap_or(0);
                // fake up something for packages with no payload
                self.total
                    .set(if archive_size == 0 { 100 } else { archive_size });

                // Reinstall records the old instance so POST can remove it
                if self.ts.filter().contains(ProblemFilter::REPLACEPKG) {
                    replaced::mark_replaced_instance(self.ts, self.te)?;
                }
            }
            Goal::Erase => {
                self.script_arg = self.installed_count - 1;

                self.amount.set(0);
                self.total.set(if fc == 0 { 100 } else { fc as u64 });
            }
            _ => {}
        }
        Ok(())
    }

    fn pre(&mut self) -> Result<()> {
        let flags = self.ts.flags();
        match self.goal {
            Goal::Install => {
                self.sense = SenseFlags::TRIGGER_PREIN;
                self.count_correction = 0;

                if !flags.contains(TransactionFlags::NOTRIGGERPREIN) {
                    // Triggers in other packages this element sets off
                    self.next(Stage::Triggers)?;
                    // This element's own triggers, set off by installed packages
                    self.next(Stage::ImmedTriggers)?;
                }
                if !flags.contains(TransactionFlags::NOPRE) {
                    self.run_inst_script(ScriptTag::PreInstall)?;
                }
                Ok(())
            }
            Goal::Erase => {
                self.sense = SenseFlags::TRIGGER_UN;
                self.count_correction = -1;

                if !flags.contains(TransactionFlags::NOTRIGGERUN) {
                    self.next(Stage::ImmedTriggers)?;
                    self.next(Stage::Triggers)?;
                }
                if !flags.contains(TransactionFlags::NOPREUN) {
                    self.run_inst_script(ScriptTag::PreRemove)?;
                }
                Ok(())
            }
            _ => Ok(()),
        }
    }

    fn process(&mut self) -> Result<()> {
        let fc = self.files.count();
        let flags = self.ts.flags();
        match self.goal {
            Goal::Install => {
                self.notify(CallbackKind::InstallStart, 0);
                // make sure the first progress call gets made
                self.notify(CallbackKind::InstallProgress, 0);

                let mut unpack: Option<PayloadError> = None;
                if fc > 0 && !flags.contains(TransactionFlags::JUSTDB) {
                    let Some(mut payload) = self.te.take_payload() else {
                        return Err(Error::Package(format!(
                            "{} has no payload handle",
                            self.te.nevr()
                        )));
                    };
                    match self.ts.payload_driver().install(
                        self.ts,
                        self.te,
                        &self.files,
                        &mut payload,
                        self,
                    ) {
                        Ok(stats) => {
                            self.ts.ops().add(Op::Decompress, stats.decompress);
                            self.ts.ops().add(Op::Digest, stats.digest);
                        }
                        Err(e) => unpack = Some(e),
                    }
                }

                // progress reaches the total even when unpacking failed
                self.notify(CallbackKind::InstallProgress, self.total.get());
                self.notify(CallbackKind::InstallStop, self.total.get());

                if let Some(e) = unpack {
                    match &e.file {
                        Some(file) => {
                            error!("unpacking of archive failed on file {}: {}", file, e.detail);
                        }
                        None => error!("unpacking of archive failed: {}", e.detail),
                    }
                    self.failed_file = e.file;
                    self.ts.callback().event(
                        self.te,
                        &CallbackEvent::Error {
                            kind: CallbackKind::UnpackError,
                        },
                    );
                    return Err(Error::Unpack(e.detail));
                }
                Ok(())
            }
            Goal::Erase => {
                if flags.contains(TransactionFlags::JUSTDB) {
                    return Ok(());
                }

                self.notify(CallbackKind::UninstallStart, 0);
                self.notify(CallbackKind::UninstallProgress, 0);

                let mut rc = Ok(());
                if fc > 0 {
                    if let Err(e) =
                        self.ts
                            .payload_driver()
                            .remove(self.ts, self.te, &self.files, self)
                    {
                        self.failed_file = e.file.clone();
                        rc = Err(Error::Remove(e.detail));
                    }
                }

                self.notify(CallbackKind::UninstallProgress, self.total.get());
                self.notify(CallbackKind::UninstallStop, self.total.get());
                rc
            }
            _ => Ok(()),
        }
    }

    fn post(&mut self) -> Result<()> {
        let flags = self.ts.flags();
        match self.goal {
            Goal::Install => {
                let install_time = chrono::Utc::now().timestamp() as u32;
                let states = self.te.file_states();
                {
                    let mut header = self.te.header_mut();
                    if !states.is_empty() {
                        header.put_bin(Tag::FileStates, states);
                    }
                    header.put_u32(Tag::InstallTime, install_time);
                    header.put_u32(Tag::InstallColor, self.ts.color());
                }

                // A recorded prior instance (reinstall) leaves first
                if self.te.db_instance() != 0 {
                    self.next(Stage::DbRemove)?;
                }
                self.next(Stage::DbAdd)?;

                self.sense = SenseFlags::TRIGGER_IN;
                self.count_correction = 0;

                if !flags.contains(TransactionFlags::NOPOST) {
                    self.run_inst_script(ScriptTag::PostInstall)?;
                }
                if !flags.contains(TransactionFlags::NOTRIGGERIN) {
                    self.next(Stage::Triggers)?;
                    self.next(Stage::ImmedTriggers)?;
                }

                self.mark_replaced_files()
            }
            Goal::Erase => {
                self.sense = SenseFlags::TRIGGER_POSTUN;
                self.count_correction = -1;

                if !flags.contains(TransactionFlags::NOPOSTUN) {
                    self.run_inst_script(ScriptTag::PostRemove)?;
                }
                if !flags.contains(TransactionFlags::NOTRIGGERPOSTUN) {
                    // Only outbound: a package on its way out has no
                    // inbound triggers left to fire
                    self.next(Stage::Triggers)?;
                }

                self.next(Stage::DbRemove)
            }
            _ => Ok(()),
        }
    }

    /// Always runs, reports the run's error if any, clears `failed_file`
    pub(crate) fn fini(&mut self, rc: Result<()>) -> Result<()> {
        if let Err(ref e) = rc {
            match self.failed_file.as_deref() {
                Some(file) => error!("{} failed on file {}: {}", self.goal_name, file, e),
                None => error!("{} failed: {}", self.goal_name, e),
            }
            self.ts.callback().event(
                self.te,
                &CallbackEvent::Error {
                    kind: CallbackKind::CpioError,
                },
            );
        }
        self.failed_file = None;
        rc
    }

    fn db_add(&mut self) -> Result<()> {
        {
            let mut header = self.te.header_mut();
            if !header.has(Tag::InstallTid) {
                let tid = self.ts.tid();
                if tid != 0 && tid != u32::MAX {
                    header.put_u32(Tag::InstallTid, tid);
                }
            }
        }

        let offset = {
            let _timer = self.ts.ops().timer(Op::DbAdd);
            let mut header = self.te.header_mut();
            self.ts.db().add(&mut header)?
        };
        self.te.set_db_instance(offset);
        Ok(())
    }

    fn db_remove(&mut self) -> Result<()> {
        {
            let _timer = self.ts.ops().timer(Op::DbRemove);
            self.ts.db().remove(self.te.db_instance())?;
        }
        self.te.set_db_instance(0);
        Ok(())
    }
}
