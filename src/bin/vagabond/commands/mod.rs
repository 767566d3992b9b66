//! Command implementations

pub mod box_cmd;
pub mod global_status;
pub mod host;

use std::sync::Arc;

use anyhow::Result;

use vagabond::action::{Environment, Runner};
use vagabond::boxes::BoxCollection;
use vagabond::index::MachineIndex;
use vagabond::plugin::PluginManager;
use vagabond::plugins::BuiltinPlugin;
use vagabond::util::{GlobalContext, Interrupt, Shell};

/// State shared by every command of one invocation.
pub struct Session {
    pub ctx: GlobalContext,
    pub shell: Arc<Shell>,
    pub interrupt: Interrupt,
    pub runner: Runner,
}

impl Session {
    /// Resolve the home directory and load the plugins.
    pub fn new(shell: Arc<Shell>, interrupt: Interrupt) -> Result<Self> {
        let ctx = GlobalContext::new()?;
        tracing::debug!("Using home {}", ctx.home().display());

        let mut plugins = PluginManager::new();
        plugins.add(BuiltinPlugin);
        let runner = Runner::new(Arc::new(plugins.load()?));

        Ok(Session {
            ctx,
            shell,
            interrupt,
            runner,
        })
    }

    /// A fresh environment wired to this session's UI, config and interrupt.
    pub fn environment(&self) -> Environment {
        Environment::new(Arc::clone(&self.shell), Arc::new(self.ctx.config().clone()))
            .with_interrupt(self.interrupt.clone())
    }

    pub fn boxes(&self) -> BoxCollection {
        BoxCollection::new(self.ctx.boxes_dir(), self.ctx.config().lock_timeout())
    }

    pub fn index(&self) -> MachineIndex {
        MachineIndex::new(self.ctx.index_dir(), self.ctx.config().lock_timeout())
    }

    /// Providers named on the command line, else the configured default.
    pub fn providers(&self, given: Vec<String>) -> Vec<String> {
        if given.is_empty() {
            self.ctx.config().default_providers().to_vec()
        } else {
            given
        }
    }
}
