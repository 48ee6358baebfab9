// src/plugins.rs

//! Plugin dispatch around a state machine run
//!
//! Plugins observe element lifecycle boundaries. The pre hook runs before
//! any stage; a failing plugin vetoes the run (remaining pre hooks are
//! not called). The post hook always runs, for every plugin, with the
//! run's outcome.

use crate::error::Result;
use crate::transaction::TransactionElement;

/// One registered plugin
pub trait Plugin {
    fn name(&self) -> &str;

    /// Called before the element's stage pipeline; an error vetoes it.
    fn psm_pre(&self, _element: &TransactionElement) -> Result<()> {
        Ok(())
    }

    /// Called after the pipeline with its outcome.
    fn psm_post(&self, _element: &TransactionElement, _ok: bool) {}
}

/// All plugins registered on a transaction
#[derive(Default)]
pub struct PluginRegistry {
    plugins: Vec<Box<dyn Plugin>>,
}

impl PluginRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, plugin: Box<dyn Plugin>) {
        self.plugins.push(plugin);
    }

    pub fn is_empty(&self) -> bool {
        self.plugins.is_empty()
    }

    /// Run every pre hook; stops at (and returns) the first error
    pub fn psm_pre(&self, element: &TransactionElement) -> Result<()> {
        for plugin in &self.plugins {
            plugin.psm_pre(element).map_err(|e| {
                crate::Error::Plugin(format!("{}: {}", plugin.name(), e))
            })?;
        }
        Ok(())
    }

    /// Run every post hook with the run's outcome
    pub fn psm_post(&self, element: &TransactionElement, ok: bool) {
        for plugin in &self.plugins {
            plugin.psm_post(element, ok);
        }
    }
}
