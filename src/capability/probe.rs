//! Live handles used by detectors.

use crate::util::interrupt::Interrupt;
use crate::util::process::ProcessBuilder;

/// Something a detector can ask questions of.
pub trait Probe {
    /// Run `command` on the subject and report whether it succeeded.
    fn test(&self, command: &str) -> bool;
}

/// Probes the machine this process runs on through `sh -c`.
#[derive(Debug, Clone, Default)]
pub struct LocalProbe {
    interrupt: Interrupt,
}

impl LocalProbe {
    pub fn new(interrupt: Interrupt) -> Self {
        LocalProbe { interrupt }
    }
}

impl Probe for LocalProbe {
    fn test(&self, command: &str) -> bool {
        match ProcessBuilder::shell(command).exec_interruptible(&self.interrupt) {
            Ok(output) => {
                tracing::debug!("probe `{}` -> {}", command, output.status);
                output.status.success()
            }
            Err(e) => {
                tracing::debug!("probe `{}` failed: {:#}", command, e);
                false
            }
        }
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;

    #[test]
    fn test_local_probe() {
        let probe = LocalProbe::default();
        assert!(probe.test("true"));
        assert!(!probe.test("false"));
        assert!(!probe.test("exit 7"));
    }
}
