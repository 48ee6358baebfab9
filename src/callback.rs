// src/callback.rs

//! Notification callbacks emitted during a state machine run
//!
//! The transaction owns one callback; the machine funnels every
//! observable boundary through it: stage progress, script start/stop,
//! script errors, unpack failures, and the single end-of-run error
//! report. The callback may hand back a file for script output capture
//! (honored for `ScriptStart` only).

use crate::script::ScriptTag;
use crate::transaction::TransactionElement;
use std::fs::File;
use strum_macros::Display;

/// The kinds of callback the machine emits
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display)]
pub enum CallbackKind {
    ScriptStart,
    ScriptStop,
    ScriptError,
    InstallStart,
    InstallProgress,
    InstallStop,
    UnpackError,
    UninstallStart,
    UninstallProgress,
    UninstallStop,
    /// The one-per-run error report emitted when a run finishes non-OK
    CpioError,
}

/// Status carried on script stop/error events
///
/// `NotFound` on a stop event means the script failed but was advisory;
/// downstream consumers rely on the distinction between that and a hard
/// `Fail`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScriptStatus {
    Ok,
    NotFound,
    Fail,
}

/// One callback emission
#[derive(Debug)]
pub enum CallbackEvent {
    Progress {
        kind: CallbackKind,
        amount: u64,
        total: u64,
    },
    Script {
        kind: CallbackKind,
        tag: ScriptTag,
        status: ScriptStatus,
    },
    Error {
        kind: CallbackKind,
    },
}

/// Receiver for callback events
pub trait TransactionCallback {
    /// Handle one event. The return value is only meaningful for
    /// `ScriptStart`: a file to capture the script's output.
    fn event(&self, element: &TransactionElement, event: &CallbackEvent) -> Option<File>;
}

/// Callback that ignores everything
#[derive(Debug, Default)]
pub struct NullCallback;

impl TransactionCallback for NullCallback {
    fn event(&self, _element: &TransactionElement, _event: &CallbackEvent) -> Option<File> {
        None
    }
}
