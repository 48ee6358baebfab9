// src/engine/source.rs

//! Source-package install driver
//!
//! A specialized top-level entry: validate the container, check the
//! engine features it requires, find its spec file, synthesize a single
//! install element, and run only the payload stage. The transaction is
//! emptied again on the way out whatever happens.

use super::{Goal, Machine, Stage};
use crate::deps::{self, SenseFlags};
use crate::error::{Error, Result};
use crate::files::{FileAction, Files};
use crate::header::{Header, Tag};
use crate::package::{self, ReadStatus};
use crate::transaction::Transaction;
use log::error;
use std::fs::File;

/// What a successful source install hands back
#[derive(Debug, Clone)]
pub struct SourceInstall {
    /// Path of the spec file inside the payload
    pub spec_file: String,
    /// The package's build cookie, when it carries one
    pub cookie: Option<String>,
}

/// Install a source package from an open container file
///
/// Untrusted or keyless signature dispositions are accepted; any other
/// read problem fails. The file list is installed wholesale (every file
/// action is Create) under the transaction root.
pub fn install_source_package(ts: &mut Transaction, mut file: File) -> Result<SourceInstall> {
    let result = match package::read(&mut file) {
        Ok((header, ReadStatus::Ok | ReadStatus::NotTrusted | ReadStatus::NoKey)) => {
            run_payload_stage(ts, header, file)
        }
        Ok((header, ReadStatus::Fail)) => Err(Error::Package(format!(
            "unreadable package {}",
            header.nevr()
        ))),
        Err(e) => Err(e),
    };
    // The synthesized element never outlives this call
    ts.empty();
    result
}

fn run_payload_stage(ts: &mut Transaction, header: Header, file: File) -> Result<SourceInstall> {
    if !header.is_source() {
        error!("source package expected, binary found");
        return Err(Error::Package("source package expected, binary found".into()));
    }

    check_engine_features(&header)?;

    let files = Files::from_header(&header);
    let Some(spec_index) = files.iter().position(|f| f.path.ends_with(".spec")) else {
        error!("source package contains no .spec file");
        return Err(Error::Package("source package contains no .spec file".into()));
    };

    let cookie = header.get_str(Tag::Cookie).map(str::to_string);
    let index = ts.add_install_element(header, Some(file));
    let te = ts
        .element(index)
        .ok_or_else(|| Error::Package("transaction lost its element".into()))?;

    // install all files
    te.set_all_actions(FileAction::Create);

    let mut machine = Machine::new(&*ts, te, Goal::Install);
    let rc = machine.drive(Stage::Process);
    machine.fini(rc)?;

    let spec_file = files.path(spec_index).unwrap_or_default().to_string();
    Ok(SourceInstall { spec_file, cookie })
}

/// Fail (logging each one) if the package requires engine features we
/// do not have
fn check_engine_features(header: &Header) -> Result<()> {
    let features = deps::engine_features();
    let mut missing = Vec::new();
    for req in deps::requires(header) {
        if !req.flags.contains(SenseFlags::LIB) {
            continue;
        }
        if !deps::satisfies(&features, &req) {
            if missing.is_empty() {
                error!("missing engine features for {}:", header.nevr());
            }
            error!("\t{}", req.name);
            missing.push(req.name);
        }
    }
    if missing.is_empty() {
        Ok(())
    } else {
        Err(Error::Package(format!(
            "missing engine features for {}: {}",
            header.nevr(),
            missing.join(", ")
        )))
    }
}
