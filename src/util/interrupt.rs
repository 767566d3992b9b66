//! User-initiated cancellation.
//!
//! An [`Interrupt`] is a cheap, clonable flag shared by every pipeline of an
//! invocation. The binary wires it to SIGINT/SIGTERM with `signal-hook`;
//! long-blocking stages poll it and fail with
//! [`ActionError::Interrupted`](crate::action::ActionError::Interrupted).

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use anyhow::{Context, Result};

/// Shared cancellation flag.
#[derive(Debug, Clone, Default)]
pub struct Interrupt {
    flag: Arc<AtomicBool>,
}

impl Interrupt {
    /// A fresh, unset flag.
    pub fn new() -> Self {
        Interrupt::default()
    }

    /// Set the flag from SIGINT and SIGTERM.
    pub fn install_signal_handlers(&self) -> Result<()> {
        for signal in [signal_hook::consts::SIGINT, signal_hook::consts::SIGTERM] {
            signal_hook::flag::register(signal, Arc::clone(&self.flag))
                .with_context(|| format!("failed to install handler for signal {}", signal))?;
        }
        Ok(())
    }

    /// Request cancellation.
    pub fn trigger(&self) {
        self.flag.store(true, Ordering::SeqCst);
    }

    /// Whether cancellation was requested.
    pub fn is_set(&self) -> bool {
        self.flag.load(Ordering::SeqCst)
    }
}
