// src/script/mod.rs

//! Scriptlet compilation and execution
//!
//! Scriptlets ship inside package headers: seven primary lifecycle slots
//! plus trigger scripts addressed by index. [`Script`] pairs a body with
//! its interpreter argv; the [`Interpreter`] writes the body to a 0700
//! temp file and runs it with the install-count arguments, a nulled
//! stdin, and a timeout. Output goes to the capture file when one is
//! provided, otherwise it is re-logged line by line.

use crate::error::{Error, Result};
use crate::header::{Header, Tag};
use std::fs::{self, File};
use std::io::Write;
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use std::time::Duration;
use strum_macros::Display;
use tempfile::TempDir;
use tracing::{debug, info, warn};
use wait_timeout::ChildExt;

/// Default timeout for scriptlet execution (60 seconds)
const DEFAULT_TIMEOUT: Duration = Duration::from_secs(60);

/// Which lifecycle slot a script belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display)]
pub enum ScriptTag {
    #[strum(serialize = "pre-install")]
    PreInstall,
    #[strum(serialize = "post-install")]
    PostInstall,
    #[strum(serialize = "pre-remove")]
    PreRemove,
    #[strum(serialize = "post-remove")]
    PostRemove,
    #[strum(serialize = "pre-transaction")]
    PreTransaction,
    #[strum(serialize = "post-transaction")]
    PostTransaction,
    #[strum(serialize = "verify")]
    Verify,
    #[strum(serialize = "trigger-pre-install")]
    TriggerPreInstall,
    #[strum(serialize = "trigger-install")]
    TriggerInstall,
    #[strum(serialize = "trigger-remove")]
    TriggerRemove,
    #[strum(serialize = "trigger-post-remove")]
    TriggerPostRemove,
}

impl ScriptTag {
    /// A blocking script's failure aborts its stage; everything else is
    /// advisory and only logged.
    pub fn is_blocking(self) -> bool {
        matches!(
            self,
            Self::PreInstall | Self::PreRemove | Self::PreTransaction | Self::Verify
        )
    }

    /// The (body, interpreter) header tag pair for a primary slot
    fn header_tags(self) -> Option<(Tag, Tag)> {
        match self {
            Self::PreInstall => Some((Tag::PreInstall, Tag::PreInstallProg)),
            Self::PostInstall => Some((Tag::PostInstall, Tag::PostInstallProg)),
            Self::PreRemove => Some((Tag::PreRemove, Tag::PreRemoveProg)),
            Self::PostRemove => Some((Tag::PostRemove, Tag::PostRemoveProg)),
            Self::PreTransaction => Some((Tag::PreTransaction, Tag::PreTransactionProg)),
            Self::PostTransaction => Some((Tag::PostTransaction, Tag::PostTransactionProg)),
            Self::Verify => Some((Tag::VerifyScript, Tag::VerifyScriptProg)),
            _ => None,
        }
    }
}

/// A compiled scriptlet: tag, interpreter argv, body
#[derive(Debug, Clone)]
pub struct Script {
    pub tag: ScriptTag,
    pub interpreter: Vec<String>,
    pub body: String,
}

impl Script {
    /// Compile the script in a primary lifecycle slot, if present
    pub fn from_tag(header: &Header, tag: ScriptTag) -> Option<Script> {
        let (body_tag, prog_tag) = tag.header_tags()?;
        let body = header.get_str(body_tag)?.to_string();
        let interpreter = header
            .get_str_vec(prog_tag)
            .map(<[String]>::to_vec)
            .unwrap_or_else(|| vec!["/bin/sh".to_string()]);
        Some(Script {
            tag,
            interpreter,
            body,
        })
    }

    /// Compile the trigger script at `index`, if present
    ///
    /// Trigger bodies live in a single array indexed by the values of the
    /// header's trigger-index array; an empty body means no script.
    pub fn from_trigger(header: &Header, tag: ScriptTag, index: u32) -> Option<Script> {
        let bodies = header.get_str_vec(Tag::TriggerScripts)?;
        let body = bodies.get(index as usize)?;
        if body.is_empty() {
            return None;
        }
        let interpreter = header
            .get_str_vec(Tag::TriggerScriptProgs)
            .and_then(|progs| progs.get(index as usize))
            .filter(|p| !p.is_empty())
            .map(|p| p.split_whitespace().map(str::to_string).collect())
            .unwrap_or_else(|| vec!["/bin/sh".to_string()]);
        Some(Script {
            tag,
            interpreter,
            body: body.clone(),
        })
    }
}

/// Scriptlet interpreter
pub struct Interpreter {
    root: PathBuf,
    timeout: Duration,
}

impl Interpreter {
    pub fn new(root: &Path) -> Self {
        Self {
            root: root.to_path_buf(),
            timeout: DEFAULT_TIMEOUT,
        }
    }

    /// Set custom timeout
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Run a compiled script
    ///
    /// `arg1`/`arg2` encode install counts; a negative value is omitted
    /// from the argv. `prefixes` are exported to the environment. When
    /// `capture` is given the child's output goes there; otherwise it is
    /// logged. `warn_only` only affects the log level of a failure; the
    /// error is returned either way and the caller decides whether it is
    /// advisory.
    #[allow(clippy::too_many_arguments)]
    pub fn run(
        &self,
        script: &Script,
        package_name: &str,
        package_version: &str,
        arg1: i64,
        arg2: i64,
        prefixes: &[String],
        capture: Option<File>,
        warn_only: bool,
    ) -> Result<()> {
        let phase = script.tag.to_string();
        let program = script.interpreter.first().map(String::as_str).unwrap_or("/bin/sh");

        // Validate interpreter exists - no fallback
        if program.starts_with('/') && !Path::new(program).exists() {
            return Err(Error::Script {
                tag: phase,
                detail: format!("interpreter not found: {}", program),
            });
        }

        info!(
            "executing {} scriptlet for {} v{}",
            phase, package_name, package_version
        );

        let temp_dir = TempDir::new()?;
        let script_path = prepare_script(temp_dir.path(), &script.body)?;

        let mut args: Vec<String> = Vec::new();
        if arg1 >= 0 {
            args.push(arg1.to_string());
        }
        if arg2 >= 0 {
            args.push(arg2.to_string());
        }

        debug!("executing script: {} {} {:?}", program, script_path.display(), args);

        let mut command = Command::new(program);
        command
            .args(script.interpreter.get(1..).unwrap_or(&[]))
            .arg(&script_path)
            .args(&args)
            .current_dir(&self.root)
            .env("STAGEHAND_PACKAGE_NAME", package_name)
            .env("STAGEHAND_PACKAGE_VERSION", package_version)
            .env("STAGEHAND_ROOT", self.root.as_os_str())
            .env("STAGEHAND_PHASE", &phase)
            .stdin(Stdio::null()); // CRITICAL: prevent stdin hangs
        for (i, prefix) in prefixes.iter().enumerate() {
            command.env(format!("STAGEHAND_INSTALL_PREFIX{}", i), prefix);
        }

        match capture {
            Some(file) => {
                let out = file.try_clone()?;
                command.stdout(Stdio::from(out)).stderr(Stdio::from(file));
            }
            None => {
                command.stdout(Stdio::piped()).stderr(Stdio::piped());
            }
        }

        let mut child = command.spawn().map_err(|e| Error::Script {
            tag: phase.clone(),
            detail: format!("failed to spawn scriptlet: {}", e),
        })?;

        match child.wait_timeout(self.timeout)? {
            Some(status) => {
                let output = child.wait_with_output()?;
                let stdout = String::from_utf8_lossy(&output.stdout);
                let stderr = String::from_utf8_lossy(&output.stderr);
                for line in stdout.lines() {
                    info!("[{}] {}", phase, line);
                }
                for line in stderr.lines() {
                    warn!("[{}] {}", phase, line);
                }

                if status.success() {
                    debug!("{} scriptlet completed successfully", phase);
                    Ok(())
                } else {
                    let code = status.code().unwrap_or(-1);
                    if warn_only {
                        warn!("{} scriptlet failed with exit code {}", phase, code);
                    }
                    Err(Error::Script {
                        tag: phase,
                        detail: format!("exit code {}", code),
                    })
                }
            }
            None => {
                // Timeout - kill the process
                let _ = child.kill();
                Err(Error::Script {
                    tag: phase,
                    detail: format!("timed out after {} seconds", self.timeout.as_secs()),
                })
            }
        }
    }
}

/// Write the script body to an executable (0700) temp file
fn prepare_script(temp_dir: &Path, body: &str) -> Result<PathBuf> {
    let script_path = temp_dir.join("scriptlet.sh");

    let mut file = File::create(&script_path)?;
    file.write_all(body.as_bytes())?;
    drop(file);

    let mut perms = fs::metadata(&script_path)?.permissions();
    perms.set_mode(0o700);
    fs::set_permissions(&script_path, perms)?;

    Ok(script_path)
}
