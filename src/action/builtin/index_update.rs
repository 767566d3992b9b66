use anyhow::Result;

use super::boxes::box_record;
use super::keys;
use crate::action::{Environment, Next, Stage};
use crate::boxes::InstalledBox;
use crate::index::{Entry, MachineIndex};

/// Records `machine` in the index once the rest of the chain succeeded.
///
/// The resolved `box`, if any, is stored in the entry's `extra_data`. The
/// written entry (now carrying its id) replaces `machine` in the
/// environment.
pub struct IndexUpdate;

impl Stage for IndexUpdate {
    fn name(&self) -> &str {
        "index_update"
    }

    fn call(&self, env: &mut Environment, next: Next<'_>) -> Result<()> {
        next.run(env)?;
        if env.has_error() {
            return Ok(());
        }

        let Some(mut entry) = env.get::<Entry>(keys::MACHINE).cloned() else {
            tracing::debug!("No machine in environment, index left unchanged");
            return Ok(());
        };
        let index = env.require::<MachineIndex>(keys::MACHINE_INDEX)?.clone();

        if let Some(installed) = env.get::<InstalledBox>(keys::BOX) {
            entry.extra_data.insert("box".into(), box_record(installed));
        }

        let id = index.set(&mut entry)?;
        env.ui()
            .detail(format!("Recorded machine {} as {}", entry.name, &id[..id.len().min(8)]));
        env.insert(keys::MACHINE, entry);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::action::{fn_stage, ActionRegistry, BuildParams, Builder};
    use crate::test_support::{fixtures, test_env};
    use std::time::Duration;
    use tempfile::TempDir;

    fn pipeline(fail: bool) -> Builder {
        Builder::new().stage(IndexUpdate).stage(fn_stage(
            "boot",
            move |env: &mut Environment| {
                if fail {
                    anyhow::bail!("boot failed");
                }
                if let Some(entry) = env.get_mut::<Entry>(keys::MACHINE) {
                    entry.state = Some("running".into());
                }
                Ok(())
            },
        ))
    }

    #[test]
    fn test_records_machine_after_success() {
        let tmp = TempDir::new().unwrap();
        let index = MachineIndex::new(tmp.path().join("index"), Duration::from_secs(5));

        let mut env = test_env();
        env.insert(keys::MACHINE_INDEX, index.clone());
        env.insert(keys::MACHINE, fixtures::machine("web", "libvirt", tmp.path()));

        pipeline(false)
            .build(&BuildParams::new(), &ActionRegistry::new())
            .unwrap()
            .call(&mut env)
            .unwrap();

        let recorded = env.get::<Entry>(keys::MACHINE).unwrap();
        let id = recorded.id.clone().unwrap();
        let stored = index.get(&id).unwrap().unwrap();
        assert_eq!(stored.state.as_deref(), Some("running"));
        assert!(stored.updated_at.is_some());
    }

    #[test]
    fn test_failure_leaves_index_untouched() {
        let tmp = TempDir::new().unwrap();
        let index = MachineIndex::new(tmp.path().join("index"), Duration::from_secs(5));

        let mut env = test_env();
        env.insert(keys::MACHINE_INDEX, index.clone());
        env.insert(keys::MACHINE, fixtures::machine("web", "libvirt", tmp.path()));

        let err = pipeline(true)
            .build(&BuildParams::new(), &ActionRegistry::new())
            .unwrap()
            .call(&mut env)
            .unwrap_err();

        assert_eq!(err.to_string(), "boot failed");
        assert!(index.all().unwrap().is_empty());
    }
}
