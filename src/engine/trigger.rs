// src/engine/trigger.rs

//! Trigger engine: two dual operations
//!
//! Outbound: other installed packages' triggers that this element sets
//! off. Inbound: this element's own triggers, set off by packages already
//! installed. Both are deterministic in the transaction, the element, the
//! current sense, and the count correction. A dedup bitmap (inbound) and
//! an explicit break (both directions) guarantee that each source/target
//! header pair fires at most one script per run.

use super::Machine;
use crate::deps::{self, SenseFlags};
use crate::error::{Error, Result};
use crate::header::{Header, Tag};
use crate::script::{Script, ScriptTag};
use tracing::debug;

/// Which script slot a trigger sense selects
fn trigger_tag(sense: SenseFlags) -> Option<ScriptTag> {
    if sense.contains(SenseFlags::TRIGGER_IN) {
        Some(ScriptTag::TriggerInstall)
    } else if sense.contains(SenseFlags::TRIGGER_UN) {
        Some(ScriptTag::TriggerRemove)
    } else if sense.contains(SenseFlags::TRIGGER_POSTUN) {
        Some(ScriptTag::TriggerPostRemove)
    } else if sense.contains(SenseFlags::TRIGGER_PREIN) {
        Some(ScriptTag::TriggerPreInstall)
    } else {
        None
    }
}

impl Machine<'_> {
    /// Run triggers in other packages that this element sets off
    pub(crate) fn run_triggers(&mut self) -> Result<()> {
        let name = self.te.name();
        if name.is_empty() {
            return Err(Error::NotFound("element has no name".into()));
        }
        let arg2 = self.ts.db().count_packages(&name)? + self.count_correction;
        if arg2 < 0 {
            return Err(Error::NotFound(format!(
                "negative installed count for {}",
                name
            )));
        }

        let source = self.te.header().clone();
        let watchers = self.ts.db().find_by_trigger_name(&name)?;
        debug!("{} package(s) watch {}", watchers.len(), name);

        // Nested count arithmetic must see true installed counts while
        // other packages' scripts run; restored on the way out.
        let saved_correction = self.count_correction;
        self.count_correction = 0;
        let mut nerrors = 0;
        for (_offset, target) in &watchers {
            if self
                .handle_one_trigger(&source, target, arg2, None)
                .is_err()
            {
                nerrors += 1;
            }
        }
        self.count_correction = saved_correction;

        if nerrors == 0 {
            Ok(())
        } else {
            Err(Error::Trigger(format!(
                "{} trigger script(s) set off by {} failed",
                nerrors, name
            )))
        }
    }

    /// Run this element's own triggers, set off by installed packages
    pub(crate) fn run_immed_triggers(&mut self) -> Result<()> {
        let header = self.te.header().clone();
        let (Some(names), Some(indexes)) = (
            header.get_str_vec(Tag::TriggerNames).map(<[String]>::to_vec),
            header.get_u32_vec(Tag::TriggerIndexes).map(<[u32]>::to_vec),
        ) else {
            return Ok(());
        };

        // One slot per trigger index; a set slot means that script ran
        let mut fired = vec![0u8; indexes.len()];
        let mut nerrors = 0;

        for (i, watched) in names.iter().enumerate() {
            let Some(&tix) = indexes.get(i) else {
                continue;
            };
            if fired.get(tix as usize).is_some_and(|&b| b != 0) {
                continue;
            }

            let sources = self.ts.db().find_by_name(watched)?;
            let arg2 = sources.len() as i64;
            for (_offset, source) in &sources {
                if self
                    .handle_one_trigger(source, &header, arg2, Some(&mut fired))
                    .is_err()
                {
                    nerrors += 1;
                }
            }
        }

        if nerrors == 0 {
            Ok(())
        } else {
            Err(Error::Trigger(format!(
                "{} trigger script(s) in {} failed",
                nerrors,
                header.name()
            )))
        }
    }

    /// Fire at most one of `target`'s trigger scripts for `source`
    ///
    /// Walks the target's trigger entries; the first one whose sense
    /// matches, whose name is the source's, and that the source actually
    /// provides, decides the outcome: either its script runs, or the
    /// dedup bitmap says it already did.
    fn handle_one_trigger(
        &self,
        source: &Header,
        target: &Header,
        arg2: i64,
        mut fired: Option<&mut Vec<u8>>,
    ) -> Result<()> {
        let entries = deps::trigger_entries(target);
        if entries.is_empty() {
            return Ok(());
        }
        let source_name = source.name().to_string();
        let target_name = target.name().to_string();
        let prefixes = target
            .get_str_vec(Tag::InstallPrefixes)
            .map(<[String]>::to_vec)
            .unwrap_or_default();
        let indexes = target
            .get_u32_vec(Tag::TriggerIndexes)
            .map(<[u32]>::to_vec)
            .unwrap_or_default();

        let mut rc = Ok(());
        for (i, entry) in entries.iter().enumerate() {
            if !entry.flags.intersects(self.sense) {
                continue;
            }
            if entry.name != source_name {
                continue;
            }
            if !deps::any_provides(source, entry, true) {
                continue;
            }
            let Some(&tix) = indexes.get(i) else {
                continue;
            };

            let already = match fired.as_deref() {
                Some(map) => match map.get(tix as usize) {
                    Some(&b) => b != 0,
                    // index outside the dedup map: nothing to fire
                    None => continue,
                },
                None => false,
            };

            if !already {
                let arg1 = self.ts.db().count_packages(&target_name)? + self.count_correction;
                if arg1 < 0 {
                    rc = Err(Error::Trigger(format!(
                        "negative installed count for {}",
                        target_name
                    )));
                } else {
                    if let Some(tag) = trigger_tag(self.sense)
                        && let Some(script) = Script::from_trigger(target, tag, tix)
                    {
                        rc = self.run_script(&prefixes, &script, arg1, arg2);
                    }
                    if let Some(map) = fired.as_deref_mut() {
                        map[tix as usize] = 1;
                    }
                }
            }

            // Each source/target pair fires at most once
            break;
        }
        rc
    }
}
