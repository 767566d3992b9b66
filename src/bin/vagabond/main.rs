//! Vagabond CLI - lifecycle orchestration for development machines

use std::sync::Arc;

use anyhow::Result;
use clap::Parser;
use tracing_subscriber::EnvFilter;

use vagabond::action::ActionError;
use vagabond::boxes::BoxError;
use vagabond::index::IndexError;
use vagabond::util::{Diagnostic, Interrupt, Shell};

mod cli;
mod commands;

use cli::{Cli, Commands};
use commands::Session;

fn main() {
    let cli = Cli::parse();

    // Set up logging
    let filter = if cli.verbose {
        EnvFilter::new("vagabond=debug")
    } else {
        EnvFilter::new("vagabond=info")
    };

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .without_time()
        .with_writer(std::io::stderr)
        .init();

    let shell = Arc::new(Shell::from_flags(cli.quiet, cli.verbose, cli.color_choice()));

    if let Err(e) = run(cli, Arc::clone(&shell)) {
        match diagnostic(&e) {
            Some(diag) => eprint!("{}", diag.format(shell.use_color())),
            None => eprintln!("error: {:#}", e),
        }
        let code = if ActionError::is_interrupt(&e) { 130 } else { 1 };
        std::process::exit(code);
    }
}

fn run(cli: Cli, shell: Arc<Shell>) -> Result<()> {
    let interrupt = Interrupt::new();
    interrupt.install_signal_handlers()?;

    let session = Session::new(shell, interrupt)?;

    // Execute command
    match cli.command {
        Commands::Box(args) => commands::box_cmd::execute(args, &session),
        Commands::GlobalStatus(args) => commands::global_status::execute(args, &session),
        Commands::Host(args) => commands::host::execute(args, &session),
    }
}

/// A typed diagnostic for the first known error in the chain, carrying the
/// outer context when the typed error is not the top of the chain.
fn diagnostic(err: &anyhow::Error) -> Option<Diagnostic> {
    for (depth, cause) in err.chain().enumerate() {
        let diag = if let Some(e) = cause.downcast_ref::<BoxError>() {
            e.to_diagnostic()
        } else if let Some(e) = cause.downcast_ref::<IndexError>() {
            e.to_diagnostic()
        } else {
            continue;
        };
        return Some(if depth > 0 {
            diag.with_context(err.to_string())
        } else {
            diag
        });
    }
    None
}
