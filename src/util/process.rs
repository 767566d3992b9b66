//! Subprocess execution utilities.
//!
//! Stages and capability implementations that shell out use
//! [`ProcessBuilder::exec_interruptible`], which polls the invocation's
//! [`Interrupt`] while the child runs and kills the child when it is set.

use std::ffi::OsStr;
use std::io::Read;
use std::path::{Path, PathBuf};
use std::process::{Child, Command, Output, Stdio};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use anyhow::{Context, Result};

use crate::action::ActionError;
use crate::util::interrupt::Interrupt;

/// How often a running child is checked for exit or interruption.
const POLL_INTERVAL: Duration = Duration::from_millis(25);

/// Builder for subprocess execution.
#[derive(Debug, Clone)]
pub struct ProcessBuilder {
    program: PathBuf,
    args: Vec<String>,
}

impl ProcessBuilder {
    /// Create a new process builder for the given program.
    pub fn new(program: impl AsRef<Path>) -> Self {
        ProcessBuilder {
            program: program.as_ref().to_path_buf(),
            args: Vec::new(),
        }
    }

    /// A builder that runs `script` through `sh -c`.
    pub fn shell(script: impl AsRef<str>) -> Self {
        ProcessBuilder::new("sh").arg("-c").arg(script.as_ref())
    }

    /// Add a single argument.
    pub fn arg(mut self, arg: impl AsRef<OsStr>) -> Self {
        self.args.push(arg.as_ref().to_string_lossy().into_owned());
        self
    }

    /// Add multiple arguments.
    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<OsStr>,
    {
        self.args.extend(
            args.into_iter()
                .map(|s| s.as_ref().to_string_lossy().into_owned()),
        );
        self
    }

    fn build_command(&self) -> Command {
        let mut cmd = Command::new(&self.program);
        cmd.args(&self.args).stdin(Stdio::null());
        cmd
    }

    /// Execute, killing the child if `interrupt` is set before it exits.
    ///
    /// Fails with [`ActionError::Interrupted`] after the child has been
    /// reaped, so cleanup stages further up the chain still run.
    pub fn exec_interruptible(&self, interrupt: &Interrupt) -> Result<Output> {
        if interrupt.is_set() {
            return Err(ActionError::Interrupted.into());
        }

        let mut child = self
            .build_command()
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .with_context(|| format!("failed to spawn `{}`", self.display_command()))?;

        let stdout = drain(child.stdout.take());
        let stderr = drain(child.stderr.take());

        let status = loop {
            if let Some(status) = child
                .try_wait()
                .with_context(|| format!("failed to wait for `{}`", self.display_command()))?
            {
                break status;
            }

            if interrupt.is_set() {
                tracing::warn!("Interrupted, terminating `{}`", self.display_command());
                kill(&mut child);
                return Err(ActionError::Interrupted.into());
            }

            thread::sleep(POLL_INTERVAL);
        };

        Ok(Output {
            status,
            stdout: join(stdout),
            stderr: join(stderr),
        })
    }

    /// Display the command for error messages.
    pub fn display_command(&self) -> String {
        let mut parts = vec![self.program.display().to_string()];
        parts.extend(self.args.iter().cloned());
        parts.join(" ")
    }
}

fn drain<R: Read + Send + 'static>(pipe: Option<R>) -> Option<JoinHandle<Vec<u8>>> {
    pipe.map(|mut pipe| {
        thread::spawn(move || {
            let mut buf = Vec::new();
            let _ = pipe.read_to_end(&mut buf);
            buf
        })
    })
}

fn join(handle: Option<JoinHandle<Vec<u8>>>) -> Vec<u8> {
    handle.and_then(|h| h.join().ok()).unwrap_or_default()
}

fn kill(child: &mut Child) {
    if let Err(e) = child.kill() {
        tracing::debug!("kill failed: {}", e);
    }
    let _ = child.wait();
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Instant;

    #[cfg(unix)]
    #[test]
    fn test_process_builder() {
        let output = ProcessBuilder::new("echo")
            .arg("hello")
            .exec_interruptible(&Interrupt::new())
            .unwrap();

        assert!(output.status.success());
        assert!(String::from_utf8_lossy(&output.stdout).contains("hello"));
    }

    #[test]
    fn test_display_command() {
        let pb = ProcessBuilder::new("uname").args(["-s", "-r"]);
        assert_eq!(pb.display_command(), "uname -s -r");
    }

    #[cfg(unix)]
    #[test]
    fn test_exit_status_is_reported() {
        let output = ProcessBuilder::shell("exit 3")
            .exec_interruptible(&Interrupt::new())
            .unwrap();
        assert_eq!(output.status.code(), Some(3));
    }

    #[cfg(unix)]
    #[test]
    fn test_exec_interruptible_captures_output() {
        let output = ProcessBuilder::shell("echo out; echo err >&2")
            .exec_interruptible(&Interrupt::new())
            .unwrap();

        assert!(output.status.success());
        assert_eq!(String::from_utf8_lossy(&output.stdout).trim(), "out");
        assert_eq!(String::from_utf8_lossy(&output.stderr).trim(), "err");
    }

    #[cfg(unix)]
    #[test]
    fn test_exec_interruptible_kills_child() {
        let interrupt = Interrupt::new();
        let trigger = interrupt.clone();
        let waker = thread::spawn(move || {
            thread::sleep(Duration::from_millis(100));
            trigger.trigger();
        });

        let started = Instant::now();
        let err = ProcessBuilder::new("sleep")
            .arg("10")
            .exec_interruptible(&interrupt)
            .unwrap_err();
        waker.join().unwrap();

        assert!(started.elapsed() < Duration::from_secs(5));
        assert!(matches!(
            err.downcast_ref::<ActionError>(),
            Some(ActionError::Interrupted)
        ));
    }
}
