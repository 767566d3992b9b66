//! `vagabond host` command
//!
//! Detect the host platform and show the capability fallback chain.

use std::sync::Arc;

use anyhow::Result;

use crate::cli::HostArgs;
use crate::commands::Session;
use vagabond::capability::{CapabilityHost, LocalProbe, SubjectKind};
use vagabond::plugins::builtin::{OS_FAMILY, SHELL};
use vagabond::util::shell::Status;

pub fn execute(args: HostArgs, session: &Session) -> Result<()> {
    let registry = Arc::clone(&session.runner.components().capabilities);
    let probe = LocalProbe::new(session.interrupt.clone());
    let host = CapabilityHost::detect(registry, SubjectKind::Host, args.platform.as_deref(), &probe)?;

    session
        .shell
        .status(Status::Detected, format!("host `{}`", host.tag()));
    println!("chain: {}", host.chain().join(" -> "));

    let mut env = session.environment();
    for name in [OS_FAMILY, SHELL] {
        if host.has(name) {
            let value = host.call(name, &mut env, &[])?;
            println!("{}: {}", name, value.as_str().unwrap_or_default());
        }
    }

    Ok(())
}
