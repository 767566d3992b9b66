//! `vagabond box` command
//!
//! Install, list, remove and resolve boxes.

use anyhow::Result;

use crate::cli::{BoxAddArgs, BoxArgs, BoxCommands, BoxFindArgs, BoxListArgs, BoxRemoveArgs};
use crate::commands::Session;
use vagabond::action::builtin::{keys, BOX_ADD_ACTION, BOX_REMOVE_ACTION};
use vagabond::action::BuildParams;
use vagabond::boxes::{BoxError, Constraint};
use vagabond::util::hash::Checksum;

pub fn execute(args: BoxArgs, session: &Session) -> Result<()> {
    match args.command {
        BoxCommands::Add(args) => add(args, session),
        BoxCommands::List(args) => list(args, session),
        BoxCommands::Remove(args) => remove(args, session),
        BoxCommands::Find(args) => find(args, session),
    }
}

fn add(args: BoxAddArgs, session: &Session) -> Result<()> {
    let mut env = session.environment();
    env.insert(keys::BOX_COLLECTION, session.boxes());
    env.insert(keys::BOX_URL, args.location);
    env.insert(keys::BOX_PROVIDERS, args.provider);
    env.insert(keys::BOX_FORCE, args.force);
    if let Some(name) = args.name {
        env.insert(keys::BOX_NAME, name);
    }
    if let Some(version) = args.box_version {
        env.insert(keys::BOX_VERSION, version);
    }
    if let Some(value) = args.checksum {
        env.insert(keys::BOX_CHECKSUM, Checksum::new(&args.checksum_type, &value)?);
    }

    session.runner.run(BOX_ADD_ACTION, BuildParams::new(), &mut env)
}

fn list(args: BoxListArgs, session: &Session) -> Result<()> {
    let boxes = session.boxes().all()?;
    if boxes.is_empty() {
        session
            .shell
            .note("There are no installed boxes. Use `vagabond box add` to add some.");
        return Ok(());
    }

    let width = boxes.iter().map(|b| b.name.len()).max().unwrap_or(0);
    for installed in &boxes {
        println!(
            "{:width$} ({}, {})",
            installed.name,
            installed.provider,
            installed.version,
            width = width
        );
        if args.info {
            println!("  - path: {}", installed.directory.display());
            if let Some(url) = &installed.metadata_url {
                println!("  - url: {}", url);
            }
        }
    }

    Ok(())
}

fn remove(args: BoxRemoveArgs, session: &Session) -> Result<()> {
    let mut env = session.environment();
    env.insert(keys::BOX_COLLECTION, session.boxes());
    env.insert(keys::MACHINE_INDEX, session.index());
    env.insert(keys::BOX_NAME, args.name);
    env.insert(keys::BOX_PROVIDERS, args.provider);
    env.insert(keys::BOX_FORCE, args.force);
    if let Some(constraint) = args.box_version {
        env.insert(keys::BOX_VERSION, constraint);
    }

    session.runner.run(BOX_REMOVE_ACTION, BuildParams::new(), &mut env)
}

fn find(args: BoxFindArgs, session: &Session) -> Result<()> {
    let constraint = Constraint::parse(args.box_version.as_deref().unwrap_or(""))?;
    let providers = session.providers(args.provider);

    match session.boxes().find(&args.name, &providers, &constraint)? {
        Some(found) => {
            session.shell.detail(format!(
                "{} {} ({})",
                found.name, found.version, found.provider
            ));
            println!("{}", found.directory.display());
            Ok(())
        }
        None => Err(BoxError::NotFound {
            name: args.name,
            constraint: constraint.to_string(),
            providers,
        }
        .into()),
    }
}
