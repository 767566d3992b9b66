//! `vagabond global-status` command
//!
//! Show every machine recorded in the machine index.

use anyhow::Result;

use crate::cli::GlobalStatusArgs;
use crate::commands::Session;
use vagabond::util::shell::Status;

pub fn execute(args: GlobalStatusArgs, session: &Session) -> Result<()> {
    let index = session.index();

    if args.prune {
        let pruned = index.garbage_collect()?;
        session.shell.status(
            Status::Pruned,
            format!(
                "{} stale machine {}",
                pruned,
                if pruned == 1 { "entry" } else { "entries" }
            ),
        );
    }

    let mut entries = index.all()?;
    if entries.is_empty() {
        println!("There are no machines in the index.");
        return Ok(());
    }
    entries.sort_by(|a, b| a.name.cmp(&b.name).then_with(|| a.id.cmp(&b.id)));

    println!(
        "{:<8} {:<16} {:<12} {:<12} directory",
        "id", "name", "provider", "state"
    );
    println!("{}", "-".repeat(64));
    for entry in &entries {
        let state = if entry.is_stale() {
            "stale"
        } else {
            entry.state.as_deref().unwrap_or("unknown")
        };
        let directory = entry
            .vagrantfile_path
            .as_ref()
            .map(|p| p.display().to_string())
            .unwrap_or_default();
        println!(
            "{:<8} {:<16} {:<12} {:<12} {}",
            entry.short_id(),
            entry.name,
            entry.provider,
            state,
            directory
        );
    }

    if entries.iter().any(|e| e.is_stale()) {
        session
            .shell
            .note("Run `vagabond global-status --prune` to drop stale entries");
    }

    Ok(())
}
