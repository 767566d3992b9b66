//! Stages that install, remove and resolve boxes.

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{bail, Context, Result};
use tempfile::TempDir;

use super::{keys, BOX_ADD_ACTION};
use crate::action::{Builder, Environment, Next, Stage};
use crate::boxes::archive::{self, BoxSource};
use crate::boxes::{AddOptions, BoxCollection, BoxError, BoxMetadata, BoxVersion, Constraint, InstalledBox};
use crate::index::MachineIndex;
use crate::util::fs::ensure_dir;
use crate::util::hash::Checksum;
use crate::util::shell::Status;

/// Version recorded for boxes added straight from a file or URL.
const UNVERSIONED: &str = "0";

/// Providers to accept: the environment's list, else the configured default.
fn providers(env: &Environment) -> Vec<String> {
    match explicit_providers(env) {
        list if !list.is_empty() => list,
        _ => env.config().default_providers().to_vec(),
    }
}

/// Providers named by the caller, ignoring the configured default.
fn explicit_providers(env: &Environment) -> Vec<String> {
    env.get::<Vec<String>>(keys::BOX_PROVIDERS)
        .cloned()
        .unwrap_or_default()
}

fn constraint(env: &Environment) -> Result<Constraint> {
    match env.get::<String>(keys::BOX_VERSION) {
        Some(raw) => Ok(Constraint::parse(raw)?),
        None => Ok(Constraint::any()),
    }
}

/// Box record stored in a machine entry's `extra_data`.
pub(crate) fn box_record(installed: &InstalledBox) -> serde_json::Value {
    serde_json::json!({
        "name": installed.name,
        "version": installed.version.to_string(),
        "provider": installed.provider,
    })
}

// ============================================================================
// BoxAdd
// ============================================================================

/// Installs a box from `box_url` into the collection.
///
/// A location ending in `.json` is a catalog: the highest version matching
/// `box_version` with a build for one of the providers is downloaded. Any
/// other location is the box itself, installed under `box_name` at the
/// exact version `box_version` (or `0`).
pub struct BoxAdd;

impl BoxAdd {
    fn fetch(env: &Environment, source: &BoxSource, staging: &Path) -> Result<PathBuf> {
        match source {
            BoxSource::Local(path) => Ok(path.clone()),
            BoxSource::Remote(url) => {
                if env.config().is_offline() {
                    bail!("refusing to download {} in offline mode", url);
                }
                let file_name = url
                    .path_segments()
                    .and_then(|mut segments| segments.next_back())
                    .filter(|s| !s.is_empty())
                    .unwrap_or("download");
                let dest = staging.join(file_name);
                let timeout = env.config().net.timeout_secs.map(Duration::from_secs);
                archive::download(url, &dest, env.ui(), env.interrupt(), timeout)?;
                Ok(dest)
            }
        }
    }

    fn add_direct(
        env: &Environment,
        boxes: &BoxCollection,
        source: &BoxSource,
        staging: &Path,
        options: AddOptions,
    ) -> Result<InstalledBox> {
        let Some(name) = env.get::<String>(keys::BOX_NAME) else {
            bail!("a box name is required when adding {} directly", source);
        };
        let version = env
            .get::<String>(keys::BOX_VERSION)
            .map(String::as_str)
            .unwrap_or(UNVERSIONED);
        BoxVersion::parse(version)
            .with_context(|| format!("`{}` is not an exact box version", version))?;

        let options = AddOptions {
            checksum: env.get::<Checksum>(keys::BOX_CHECKSUM).cloned(),
            ..options
        };
        let path = Self::fetch(env, source, staging)?;
        boxes.add(&path, name, version, &providers(env), &options)
    }

    fn add_from_catalog(
        env: &Environment,
        boxes: &BoxCollection,
        source: &BoxSource,
        staging: &Path,
        options: AddOptions,
    ) -> Result<InstalledBox> {
        let catalog_path = Self::fetch(env, source, staging)?;
        let catalog = BoxMetadata::load(&catalog_path)?;
        let constraint = constraint(env)?;
        let providers = providers(env);

        let Some(version) = catalog.version(&constraint, &providers) else {
            return Err(BoxError::NotFound {
                name: catalog.name.clone(),
                constraint: constraint.to_string(),
                providers,
            }
            .into());
        };

        let build = match providers.iter().find_map(|p| version.provider(p)) {
            Some(build) => build,
            None => match version.providers.first() {
                Some(build) => build,
                None => bail!("{} {} offers no providers", catalog.name, version.version),
            },
        };
        tracing::info!(
            "Catalog {} resolved {} to {} ({})",
            source,
            constraint,
            version.version,
            build.name
        );

        let name = env
            .get::<String>(keys::BOX_NAME)
            .cloned()
            .unwrap_or_else(|| catalog.name.clone());
        let options = AddOptions {
            metadata_url: Some(source.to_string()),
            checksum: build.checksum()?,
            ..options
        };
        let box_source = BoxSource::parse(&build.url)?;
        let path = Self::fetch(env, &box_source, staging)?;
        boxes.add(
            &path,
            &name,
            &version.version,
            std::slice::from_ref(&build.name),
            &options,
        )
    }
}

impl Stage for BoxAdd {
    fn name(&self) -> &str {
        "box_add"
    }

    fn call(&self, env: &mut Environment, next: Next<'_>) -> Result<()> {
        let location = env.require::<String>(keys::BOX_URL)?.clone();
        let boxes = env.require::<BoxCollection>(keys::BOX_COLLECTION)?.clone();
        let source = BoxSource::parse(&location)?;

        let staging_root = boxes.root().join(".tmp");
        ensure_dir(&staging_root)?;
        let staging = TempDir::new_in(&staging_root)
            .with_context(|| format!("failed to create download dir in {}", staging_root.display()))?;

        let options = AddOptions {
            force: env.get::<bool>(keys::BOX_FORCE).copied().unwrap_or(false),
            interrupt: env.interrupt().clone(),
            ..AddOptions::default()
        };

        let added = if source.is_catalog() {
            Self::add_from_catalog(env, &boxes, &source, staging.path(), options)?
        } else {
            Self::add_direct(env, &boxes, &source, staging.path(), options)?
        };
        drop(staging);

        env.ui().status(Status::Added, &added);
        env.insert(keys::BOX_ADDED, added);
        next.run(env)
    }
}

// ============================================================================
// BoxRemove
// ============================================================================

/// Removes installed boxes named `box_name`, narrowed by `box_version` and
/// `box_providers` when given.
///
/// Boxes recorded against live machines in the index are kept unless
/// `box_force` is set.
pub struct BoxRemove;

impl BoxRemove {
    fn users(index: &MachineIndex, installed: &InstalledBox) -> Result<Vec<String>> {
        let mut users = Vec::new();
        for entry in index.each()? {
            if entry.is_stale() {
                continue;
            }
            let Some(record) = entry.extra_data.get("box") else {
                continue;
            };
            let same_version = record["version"]
                .as_str()
                .and_then(|v| BoxVersion::parse(v).ok())
                .is_some_and(|v| v == installed.version);
            if record["name"] == installed.name.as_str()
                && record["provider"] == installed.provider.as_str()
                && same_version
            {
                users.push(entry.name.clone());
            }
        }
        Ok(users)
    }
}

impl Stage for BoxRemove {
    fn name(&self) -> &str {
        "box_remove"
    }

    fn call(&self, env: &mut Environment, next: Next<'_>) -> Result<()> {
        let name = env.require::<String>(keys::BOX_NAME)?.clone();
        let boxes = env.require::<BoxCollection>(keys::BOX_COLLECTION)?.clone();
        let constraint = constraint(env)?;
        // Removal narrows only by what the caller asked for.
        let providers = explicit_providers(env);
        let force = env.get::<bool>(keys::BOX_FORCE).copied().unwrap_or(false);

        let targets: Vec<InstalledBox> = boxes
            .all()?
            .into_iter()
            .filter(|b| b.name == name)
            .filter(|b| providers.is_empty() || providers.contains(&b.provider))
            .filter(|b| constraint.matches(&b.version))
            .collect();

        if targets.is_empty() {
            return Err(BoxError::NotFound {
                name,
                constraint: constraint.to_string(),
                providers,
            }
            .into());
        }

        if !force {
            if let Some(index) = env.get::<MachineIndex>(keys::MACHINE_INDEX) {
                for target in &targets {
                    let machines = Self::users(index, target)?;
                    if !machines.is_empty() {
                        return Err(BoxError::InUse {
                            name: target.name.clone(),
                            version: target.version.to_string(),
                            machines,
                        }
                        .into());
                    }
                }
            }
        }

        if constraint.is_any() && providers.is_empty() {
            boxes.clean(&name)?;
        } else {
            for target in &targets {
                boxes.remove(&target.name, target.version.as_str(), &target.provider)?;
            }
        }
        for target in &targets {
            env.ui().status(Status::Removed, target);
        }

        env.insert(keys::BOX_REMOVED, targets);
        next.run(env)
    }
}

// ============================================================================
// HandleBox
// ============================================================================

/// Resolves the machine's box into `box`.
///
/// A missing box is installed through the `box_add` sequence when `box_url`
/// is set; otherwise the stage fails with [`BoxError::NotFound`]. A `box`
/// already in the environment is left alone.
pub struct HandleBox;

impl Stage for HandleBox {
    fn name(&self) -> &str {
        "handle_box"
    }

    fn call(&self, env: &mut Environment, next: Next<'_>) -> Result<()> {
        if env.contains(keys::BOX) {
            return next.run(env);
        }

        let name = env.require::<String>(keys::BOX_NAME)?.clone();
        let boxes = env.require::<BoxCollection>(keys::BOX_COLLECTION)?.clone();
        let constraint = constraint(env)?;
        let providers = providers(env);

        let mut found = boxes.find(&name, &providers, &constraint)?;
        if found.is_none() && env.contains(keys::BOX_URL) {
            env.ui()
                .note(format!("Box `{}` is not installed, adding it", name));
            Builder::new()
                .sequence(BOX_ADD_ACTION)
                .build(env.params(), env.sequences())?
                .call(env)?;
            found = boxes.find(&name, &providers, &constraint)?;
        }

        let Some(found) = found else {
            return Err(BoxError::NotFound {
                name,
                constraint: constraint.to_string(),
                providers,
            }
            .into());
        };

        tracing::debug!("Using box {} at {}", found, found.directory.display());
        env.insert(keys::BOX, found);
        next.run(env)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::action::{ActionRegistry, BuildParams};
    use crate::test_support::{fixtures, test_env};
    use std::sync::Arc;

    const TIMEOUT: Duration = Duration::from_secs(5);

    fn env_with(boxes: &BoxCollection) -> Environment {
        let mut env = test_env();
        env.insert(keys::BOX_COLLECTION, boxes.clone());
        env
    }

    fn run(stage: impl Stage + 'static, env: &mut Environment) -> Result<()> {
        Builder::new()
            .stage(stage)
            .build(&BuildParams::new(), &ActionRegistry::new())?
            .call(env)
    }

    fn catalog(dir: &Path, tarball: &Path) -> PathBuf {
        let path = dir.join("catalog.json");
        let url = tarball.display().to_string();
        let json = serde_json::json!({
            "name": "org/base",
            "versions": [
                {"version": "1.0.0", "providers": [{"name": "libvirt", "url": url}]},
                {"version": "1.2.0", "providers": [{"name": "libvirt", "url": url}]},
                {"version": "2.0.0", "providers": [{"name": "docker", "url": url}]}
            ]
        });
        std::fs::write(&path, json.to_string()).unwrap();
        path
    }

    #[test]
    fn test_direct_add_defaults_to_version_zero() {
        let tmp = TempDir::new().unwrap();
        let source = fixtures::box_dir(tmp.path(), "src", "libvirt");
        let boxes = BoxCollection::new(tmp.path().join("boxes"), TIMEOUT);

        let mut env = env_with(&boxes);
        env.insert(keys::BOX_URL, source.display().to_string());
        env.insert(keys::BOX_NAME, "org/base".to_string());
        run(BoxAdd, &mut env).unwrap();

        let added = env.get::<InstalledBox>(keys::BOX_ADDED).unwrap();
        assert_eq!(added.version.to_string(), "0");
        assert!(tmp.path().join("boxes/org-SLASH-base/0/libvirt").is_dir());
        assert!(env.ui().captured()[0].contains("Added org/base (libvirt, 0)"));
    }

    #[test]
    fn test_direct_add_requires_name() {
        let tmp = TempDir::new().unwrap();
        let source = fixtures::box_dir(tmp.path(), "src", "libvirt");
        let boxes = BoxCollection::new(tmp.path().join("boxes"), TIMEOUT);

        let mut env = env_with(&boxes);
        env.insert(keys::BOX_URL, source.display().to_string());
        let err = run(BoxAdd, &mut env).unwrap_err();
        assert!(err.to_string().contains("box name is required"));
    }

    #[test]
    fn test_catalog_add_picks_highest_matching_version() {
        let tmp = TempDir::new().unwrap();
        let tarball = tmp.path().join("base.box");
        fixtures::write_box_tarball(
            &tarball,
            &[("metadata.json", r#"{"provider":"libvirt"}"#), ("box.img", "disk")],
            true,
        );
        let catalog = catalog(tmp.path(), &tarball);
        let boxes = BoxCollection::new(tmp.path().join("boxes"), TIMEOUT);

        let mut env = env_with(&boxes);
        env.insert(keys::BOX_URL, catalog.display().to_string());
        env.insert(keys::BOX_VERSION, "~> 1.0".to_string());
        env.insert(keys::BOX_PROVIDERS, vec!["libvirt".to_string()]);
        run(BoxAdd, &mut env).unwrap();

        let added = env.get::<InstalledBox>(keys::BOX_ADDED).unwrap();
        assert_eq!(added.name, "org/base");
        assert_eq!(added.version.to_string(), "1.2.0");
        assert_eq!(
            added.metadata_url.as_deref(),
            Some(catalog.display().to_string().as_str())
        );
    }

    #[test]
    fn test_catalog_add_without_match_fails() {
        let tmp = TempDir::new().unwrap();
        let tarball = tmp.path().join("base.box");
        fixtures::write_box_tarball(&tarball, &[("metadata.json", "{}")], false);
        let catalog = catalog(tmp.path(), &tarball);
        let boxes = BoxCollection::new(tmp.path().join("boxes"), TIMEOUT);

        let mut env = env_with(&boxes);
        env.insert(keys::BOX_URL, catalog.display().to_string());
        env.insert(keys::BOX_VERSION, ">= 2.1".to_string());
        let err = run(BoxAdd, &mut env).unwrap_err();
        assert!(matches!(
            err.downcast_ref::<BoxError>(),
            Some(BoxError::NotFound { .. })
        ));
        assert!(boxes.all().unwrap().is_empty());
    }

    #[test]
    fn test_offline_refuses_remote_source() {
        let tmp = TempDir::new().unwrap();
        let boxes = BoxCollection::new(tmp.path().join("boxes"), TIMEOUT);

        let mut config = crate::util::config::Config::default();
        config.net.offline = Some(true);
        let mut env = Environment::new(
            Arc::new(crate::util::shell::Shell::capture()),
            Arc::new(config),
        );
        env.insert(keys::BOX_COLLECTION, boxes.clone());
        env.insert(keys::BOX_URL, "https://boxes.invalid/base.box".to_string());
        env.insert(keys::BOX_NAME, "base".to_string());

        let err = run(BoxAdd, &mut env).unwrap_err();
        assert!(err.to_string().contains("offline mode"));
    }

    #[test]
    fn test_remove_narrows_by_version() {
        let tmp = TempDir::new().unwrap();
        let source = fixtures::box_dir(tmp.path(), "src", "libvirt");
        let boxes = BoxCollection::new(tmp.path().join("boxes"), TIMEOUT);
        for version in ["1.0.0", "2.0.0"] {
            boxes
                .add(&source, "base", version, &[], &AddOptions::default())
                .unwrap();
        }

        let mut env = env_with(&boxes);
        env.insert(keys::BOX_NAME, "base".to_string());
        env.insert(keys::BOX_VERSION, "1.0".to_string());
        run(BoxRemove, &mut env).unwrap();

        let left: Vec<String> = boxes
            .all()
            .unwrap()
            .iter()
            .map(|b| b.version.to_string())
            .collect();
        assert_eq!(left, vec!["2.0.0"]);
        assert_eq!(env.get::<Vec<InstalledBox>>(keys::BOX_REMOVED).unwrap().len(), 1);
    }

    #[test]
    fn test_remove_without_filters_ignores_default_providers() {
        let tmp = TempDir::new().unwrap();
        let boxes = BoxCollection::new(tmp.path().join("boxes"), TIMEOUT);
        for provider in ["libvirt", "docker"] {
            let source = fixtures::box_dir(tmp.path(), provider, provider);
            boxes
                .add(&source, "base", "1.0", &[], &AddOptions::default())
                .unwrap();
        }

        let mut config = crate::util::config::Config::default();
        config.boxes.default_providers = Some(vec!["libvirt".to_string()]);
        let mut env = Environment::new(
            Arc::new(crate::util::shell::Shell::capture()),
            Arc::new(config),
        );
        env.insert(keys::BOX_COLLECTION, boxes.clone());
        env.insert(keys::BOX_NAME, "base".to_string());
        run(BoxRemove, &mut env).unwrap();

        assert!(boxes.all().unwrap().is_empty());
        assert!(!boxes.root().join("base").exists());
        assert_eq!(env.get::<Vec<InstalledBox>>(keys::BOX_REMOVED).unwrap().len(), 2);
    }

    #[test]
    fn test_remove_missing_box_fails() {
        let tmp = TempDir::new().unwrap();
        let boxes = BoxCollection::new(tmp.path().join("boxes"), TIMEOUT);

        let mut env = env_with(&boxes);
        env.insert(keys::BOX_NAME, "ghost".to_string());
        let err = run(BoxRemove, &mut env).unwrap_err();
        assert!(matches!(
            err.downcast_ref::<BoxError>(),
            Some(BoxError::NotFound { .. })
        ));
    }

    #[test]
    fn test_remove_refuses_box_in_use() {
        let tmp = TempDir::new().unwrap();
        let source = fixtures::box_dir(tmp.path(), "src", "libvirt");
        let boxes = BoxCollection::new(tmp.path().join("boxes"), TIMEOUT);
        let installed = boxes
            .add(&source, "base", "1.0.0", &[], &AddOptions::default())
            .unwrap();

        let data = tmp.path().join("data");
        std::fs::create_dir_all(&data).unwrap();
        let index = MachineIndex::new(tmp.path().join("index"), TIMEOUT);
        let mut entry = fixtures::machine("web", "libvirt", &data);
        entry.extra_data.insert("box".into(), box_record(&installed));
        index.set(&mut entry).unwrap();

        let mut env = env_with(&boxes);
        env.insert(keys::MACHINE_INDEX, index.clone());
        env.insert(keys::BOX_NAME, "base".to_string());
        let err = run(BoxRemove, &mut env).unwrap_err();
        assert!(err.to_string().contains("in use by: web"));
        assert_eq!(boxes.all().unwrap().len(), 1);

        env.insert(keys::BOX_FORCE, true);
        run(BoxRemove, &mut env).unwrap();
        assert!(boxes.all().unwrap().is_empty());
    }

    #[test]
    fn test_handle_box_resolves_installed() {
        let tmp = TempDir::new().unwrap();
        let source = fixtures::box_dir(tmp.path(), "src", "libvirt");
        let boxes = BoxCollection::new(tmp.path().join("boxes"), TIMEOUT);
        for version in ["1.0.0", "1.5.0", "2.0.0"] {
            boxes
                .add(&source, "base", version, &[], &AddOptions::default())
                .unwrap();
        }

        let mut env = env_with(&boxes);
        env.insert(keys::BOX_NAME, "base".to_string());
        env.insert(keys::BOX_VERSION, "< 2.0".to_string());
        run(HandleBox, &mut env).unwrap();

        let resolved = env.get::<InstalledBox>(keys::BOX).unwrap();
        assert_eq!(resolved.version.to_string(), "1.5.0");
    }

    #[test]
    fn test_handle_box_missing_without_url_fails() {
        let tmp = TempDir::new().unwrap();
        let boxes = BoxCollection::new(tmp.path().join("boxes"), TIMEOUT);

        let mut env = env_with(&boxes);
        env.insert(keys::BOX_NAME, "base".to_string());
        let err = run(HandleBox, &mut env).unwrap_err();
        assert!(matches!(
            err.downcast_ref::<BoxError>(),
            Some(BoxError::NotFound { .. })
        ));
    }

    #[test]
    fn test_handle_box_adds_missing_box() {
        let tmp = TempDir::new().unwrap();
        let source = fixtures::box_dir(tmp.path(), "src", "libvirt");
        let boxes = BoxCollection::new(tmp.path().join("boxes"), TIMEOUT);

        let mut sequences = ActionRegistry::new();
        sequences.register(BOX_ADD_ACTION, Builder::new().stage(BoxAdd));

        let mut env = env_with(&boxes);
        env.bind(Arc::new(sequences), BuildParams::new());
        env.insert(keys::BOX_NAME, "base".to_string());
        env.insert(keys::BOX_URL, source.display().to_string());
        run(HandleBox, &mut env).unwrap();

        let resolved = env.get::<InstalledBox>(keys::BOX).unwrap();
        assert_eq!(resolved.name, "base");
        assert_eq!(resolved.provider, "libvirt");
    }
}
