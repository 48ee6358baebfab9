// src/engine/script.rs

//! Scriptlet runner: the advisory/blocking contract
//!
//! Adapts header scriptlets for the interpreter and maps its result. A
//! blocking tag's failure aborts the stage; an advisory tag's failure is
//! reported through the SCRIPT_ERROR callback and then swallowed. The
//! SCRIPT_STOP status carries `NotFound` for an advisory failure so
//! consumers can tell it from a hard one.

use super::Machine;
use crate::callback::{CallbackEvent, CallbackKind, ScriptStatus};
use crate::error::Result;
use crate::header::Tag;
use crate::script::{Interpreter, Script, ScriptTag};
use crate::transaction::Op;

impl Machine<'_> {
    /// Run a compiled scriptlet with install-count arguments
    ///
    /// `arg1` is the instance count of the package the script belongs to
    /// after this element completes; `arg2` the same for the trigger
    /// target (-1 when there is none).
    pub(crate) fn run_script(
        &self,
        prefixes: &[String],
        script: &Script,
        arg1: i64,
        arg2: i64,
    ) -> Result<()> {
        let tag = script.tag;
        let warn_only = !tag.is_blocking();

        // The start callback may hand back a capture file; otherwise
        // fall back to the transaction's script output file.
        let capture = self
            .ts
            .callback()
            .event(
                self.te,
                &CallbackEvent::Script {
                    kind: CallbackKind::ScriptStart,
                    tag,
                    status: ScriptStatus::Ok,
                },
            )
            .or_else(|| self.ts.script_fd());

        let rc = {
            let _timer = self.ts.ops().timer(Op::Scriptlets);
            let (name, version) = {
                let header = self.te.header();
                (header.name().to_string(), header.version().to_string())
            };
            Interpreter::new(self.install_root()).run(
                script, &name, &version, arg1, arg2, prefixes, capture, warn_only,
            )
        };

        let stop_status = match &rc {
            Ok(()) => ScriptStatus::Ok,
            Err(_) if warn_only => ScriptStatus::NotFound,
            Err(_) => ScriptStatus::Fail,
        };
        self.ts.callback().event(
            self.te,
            &CallbackEvent::Script {
                kind: CallbackKind::ScriptStop,
                tag,
                status: stop_status,
            },
        );

        match rc {
            Ok(()) => Ok(()),
            Err(e) => {
                // Error callback fires for every failure; the status only
                // reflects whether the failure blocks the stage.
                let status = if warn_only {
                    ScriptStatus::Ok
                } else {
                    ScriptStatus::Fail
                };
                self.ts.callback().event(
                    self.te,
                    &CallbackEvent::Script {
                        kind: CallbackKind::ScriptError,
                        tag,
                        status,
                    },
                );
                if warn_only { Ok(()) } else { Err(e) }
            }
        }
    }

    /// Run the primary scriptlet in `tag`, if the element carries one
    ///
    /// Arguments are `(script_arg, -1)` with the element's install
    /// prefixes.
    pub(crate) fn run_inst_script(&mut self, tag: ScriptTag) -> Result<()> {
        let (script, prefixes) = {
            let header = self.te.header();
            (
                Script::from_tag(&header, tag),
                header
                    .get_str_vec(Tag::InstallPrefixes)
                    .map(<[String]>::to_vec)
                    .unwrap_or_default(),
            )
        };
        match script {
            Some(script) => self.run_script(&prefixes, &script, self.script_arg, -1),
            None => Ok(()),
        }
    }
}
