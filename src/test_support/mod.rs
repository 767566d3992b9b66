//! Test utilities for vagabond unit tests.
//!
//! Provides a capturing [`Environment`], a scripted detection [`Probe`] and a
//! [`Recorder`] stage that logs when it is entered and left.
//!
//! # Example
//!
//! ```rust,ignore
//! use vagabond::test_support::{test_env, Recorder};
//!
//! #[test]
//! fn test_example() {
//!     let log = Arc::new(Mutex::new(Vec::new()));
//!     let runnable = Builder::new().stage(Recorder::new("boot", &log)).build(...)?;
//!     runnable.call(&mut test_env())?;
//!     assert_eq!(*log.lock().unwrap(), vec!["enter boot", "exit boot"]);
//! }
//! ```

pub mod fixtures;

use std::collections::HashSet;
use std::sync::{Arc, Mutex};

use anyhow::{anyhow, Result};

use crate::action::{Environment, Next, Stage};
use crate::capability::Probe;
use crate::util::config::Config;
use crate::util::shell::Shell;

/// An environment with default config whose UI records every line.
pub fn test_env() -> Environment {
    Environment::new(Arc::new(Shell::capture()), Arc::new(Config::default()))
}

/// Probe that succeeds for a fixed set of commands.
///
/// Every command tested is recorded, matched or not.
#[derive(Debug, Default)]
pub struct ScriptedProbe {
    succeeds: HashSet<String>,
    calls: Mutex<Vec<String>>,
}

impl ScriptedProbe {
    pub fn new(succeeds: &[&str]) -> Self {
        ScriptedProbe {
            succeeds: succeeds.iter().map(|s| s.to_string()).collect(),
            calls: Mutex::new(Vec::new()),
        }
    }

    /// Commands tested so far, in order.
    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().map(|c| c.clone()).unwrap_or_default()
    }
}

impl Probe for ScriptedProbe {
    fn test(&self, command: &str) -> bool {
        if let Ok(mut calls) = self.calls.lock() {
            calls.push(command.to_string());
        }
        self.succeeds.contains(command)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Behavior {
    Continue,
    Halt,
    Fail,
}

/// Stage that appends `enter <name>` and `exit <name>` to a shared log.
#[derive(Debug, Clone)]
pub struct Recorder {
    name: String,
    log: Arc<Mutex<Vec<String>>>,
    behavior: Behavior,
}

impl Recorder {
    pub fn new(name: impl Into<String>, log: &Arc<Mutex<Vec<String>>>) -> Self {
        Recorder {
            name: name.into(),
            log: Arc::clone(log),
            behavior: Behavior::Continue,
        }
    }

    /// Return without calling the rest of the chain.
    pub fn halting(mut self) -> Self {
        self.behavior = Behavior::Halt;
        self
    }

    /// Fail with `<name> failed` instead of calling the rest of the chain.
    pub fn failing(mut self) -> Self {
        self.behavior = Behavior::Fail;
        self
    }

    fn record(&self, event: &str) {
        self.log
            .lock()
            .unwrap()
            .push(format!("{} {}", event, self.name));
    }
}

impl Stage for Recorder {
    fn name(&self) -> &str {
        &self.name
    }

    fn call(&self, env: &mut Environment, next: Next<'_>) -> Result<()> {
        self.record("enter");
        let result = match self.behavior {
            Behavior::Continue => next.run(env),
            Behavior::Halt => Ok(()),
            Behavior::Fail => Err(anyhow!("{} failed", self.name)),
        };
        self.record("exit");
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_scripted_probe_records_calls() {
        let probe = ScriptedProbe::new(&["uname"]);
        assert!(probe.test("uname"));
        assert!(!probe.test("sw_vers"));
        assert_eq!(probe.calls(), vec!["uname", "sw_vers"]);
    }
}
