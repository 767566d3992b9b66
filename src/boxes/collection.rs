//! The on-disk box tree.
//!
//! Layout: `<root>/<escaped-name>/<version>/<provider>/`, where `/` in a box
//! name becomes `-SLASH-`. Every published provider directory contains the
//! box's `metadata.json` and, when known, a `metadata_url` file.
//!
//! Mutations are serialized by `<root>/.lock`. Installs unpack into a
//! staging directory under `<root>/.tmp` and become visible with a single
//! rename, so readers never observe a half-written box and need no lock.

use std::cmp::{Ordering, Reverse};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use serde::Deserialize;
use tempfile::TempDir;
use walkdir::WalkDir;

use super::archive;
use super::version::{BoxVersion, Constraint};
use super::BoxError;
use crate::util::fs::{ensure_dir, is_hidden, read_to_string, remove_dir_if_empty, write_string};
use crate::util::hash::Checksum;
use crate::util::interrupt::Interrupt;
use crate::util::lock::{FileLock, LockError};

const SLASH_ESCAPE: &str = "-SLASH-";
const LOCK_FILE: &str = ".lock";
const STAGING_DIR: &str = ".tmp";
const METADATA_FILE: &str = "metadata.json";
const METADATA_URL_FILE: &str = "metadata_url";

/// An installed box.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InstalledBox {
    pub name: String,
    pub version: BoxVersion,
    pub provider: String,
    pub directory: PathBuf,
    pub metadata_url: Option<String>,
}

impl std::fmt::Display for InstalledBox {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} ({}, {})", self.name, self.provider, self.version)
    }
}

/// Options for [`BoxCollection::add`].
#[derive(Debug, Clone, Default)]
pub struct AddOptions {
    /// Replace an installed box with the same name, version and provider.
    pub force: bool,
    /// Catalog URL the box came from, recorded beside it.
    pub metadata_url: Option<String>,
    /// Expected checksum of the source file.
    pub checksum: Option<Checksum>,
    pub interrupt: Interrupt,
}

#[derive(Deserialize)]
struct BoxInfo {
    provider: Option<String>,
}

/// Manages the installed boxes under one root directory.
#[derive(Debug, Clone)]
pub struct BoxCollection {
    root: PathBuf,
    lock_timeout: Duration,
}

impl BoxCollection {
    pub fn new(root: impl Into<PathBuf>, lock_timeout: Duration) -> Self {
        BoxCollection {
            root: root.into(),
            lock_timeout,
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Install a box from a local directory or archive.
    ///
    /// `providers` lists the acceptable providers; an empty list accepts
    /// whatever provider the box's metadata declares.
    pub fn add(
        &self,
        source: &Path,
        name: &str,
        version: &str,
        providers: &[String],
        options: &AddOptions,
    ) -> Result<InstalledBox> {
        validate_name(name)?;
        let version = BoxVersion::parse(version)?;

        if let Some(checksum) = &options.checksum {
            if let Err(actual) = checksum.verify(source)? {
                return Err(BoxError::ChecksumMismatch {
                    path: source.to_path_buf(),
                    kind: checksum.kind.to_string(),
                    expected: checksum.value.clone(),
                    actual,
                }
                .into());
            }
            tracing::debug!("Checksum verified for {}", source.display());
        }

        let _lock = self.lock()?;

        let staging_root = self.root.join(STAGING_DIR);
        ensure_dir(&staging_root)?;
        let staging = TempDir::new_in(&staging_root)
            .with_context(|| format!("failed to create staging dir in {}", staging_root.display()))?;
        let unpacked = staging.path().join("box");

        archive::unpack(source, &unpacked, &options.interrupt)?;

        let provider = read_provider(&unpacked)?;
        if !providers.is_empty() && !providers.iter().any(|p| p == &provider) {
            return Err(BoxError::ProviderMismatch {
                name: name.to_string(),
                found: provider,
                expected: providers.to_vec(),
            }
            .into());
        }

        if let Some(url) = &options.metadata_url {
            write_string(&unpacked.join(METADATA_URL_FILE), url)?;
        }

        let existing = self.locate(name, &version, &provider)?;
        if let Some(existing) = &existing {
            if !options.force {
                return Err(BoxError::AlreadyExists {
                    name: name.to_string(),
                    version: version.to_string(),
                    provider,
                }
                .into());
            }
            // The replaced box is parked in staging and deleted with it.
            tracing::info!("Replacing installed box at {}", existing.display());
            fs::rename(existing, staging.path().join("replaced"))
                .with_context(|| format!("failed to move aside {}", existing.display()))?;
        }

        let target = self.box_dir(name, version.as_str(), &provider);
        if let Some(parent) = target.parent() {
            ensure_dir(parent)?;
        }

        if let Err(e) = fs::rename(&unpacked, &target) {
            if let Some(existing) = &existing {
                let _ = fs::rename(staging.path().join("replaced"), existing);
            }
            return Err(e).with_context(|| format!("failed to publish box to {}", target.display()));
        }

        if let Some(existing) = &existing {
            if existing != &target {
                self.prune_parents(existing)?;
            }
        }

        tracing::info!("Added box {} {} ({})", name, version, provider);
        Ok(InstalledBox {
            name: name.to_string(),
            version,
            provider,
            directory: target,
            metadata_url: options.metadata_url.clone(),
        })
    }

    /// Every installed box, sorted by name, version and provider.
    pub fn all(&self) -> Result<Vec<InstalledBox>> {
        if !self.root.is_dir() {
            return Ok(Vec::new());
        }

        let mut boxes = Vec::new();
        let walker = WalkDir::new(&self.root)
            .min_depth(3)
            .max_depth(3)
            .into_iter()
            .filter_entry(|e| !is_hidden(e.file_name()));

        for entry in walker {
            let entry = entry.with_context(|| format!("failed to scan {}", self.root.display()))?;
            if !entry.file_type().is_dir() {
                continue;
            }
            if let Some(installed) = self.read_box(entry.path()) {
                boxes.push(installed);
            }
        }

        boxes.sort_by(|a, b| {
            a.name
                .cmp(&b.name)
                .then_with(|| a.version.cmp(&b.version))
                .then_with(|| a.provider.cmp(&b.provider))
        });
        Ok(boxes)
    }

    /// The highest installed version of `name` satisfying `constraint`.
    ///
    /// Among equal versions, the provider listed first in `providers` wins.
    /// An empty `providers` list accepts any provider.
    pub fn find(
        &self,
        name: &str,
        providers: &[String],
        constraint: &Constraint,
    ) -> Result<Option<InstalledBox>> {
        let rank = |provider: &str| -> usize {
            providers
                .iter()
                .position(|p| p == provider)
                .unwrap_or(usize::MAX)
        };

        let found = self
            .all()?
            .into_iter()
            .filter(|b| b.name == name)
            .filter(|b| providers.is_empty() || providers.iter().any(|p| p == &b.provider))
            .filter(|b| constraint.matches(&b.version))
            .max_by(|a, b| match a.version.cmp(&b.version) {
                Ordering::Equal => Reverse(rank(&a.provider)).cmp(&Reverse(rank(&b.provider))),
                other => other,
            });

        match &found {
            Some(b) => tracing::debug!("Resolved {} {} to {}", name, constraint, b),
            None => tracing::debug!("No box matches {} {}", name, constraint),
        }
        Ok(found)
    }

    /// Remove every version and provider of `name`. Returns whether
    /// anything was installed.
    pub fn clean(&self, name: &str) -> Result<bool> {
        validate_name(name)?;
        let _lock = self.lock()?;
        let dir = self.root.join(escape_name(name));
        if !dir.exists() {
            return Ok(false);
        }
        fs::remove_dir_all(&dir).with_context(|| format!("failed to remove {}", dir.display()))?;
        tracing::info!("Removed all versions of box {}", name);
        Ok(true)
    }

    /// Remove one `(name, version, provider)` combination.
    pub fn remove(&self, name: &str, version: &str, provider: &str) -> Result<bool> {
        validate_name(name)?;
        let version = BoxVersion::parse(version)?;
        let _lock = self.lock()?;

        let Some(dir) = self.locate(name, &version, provider)? else {
            return Ok(false);
        };
        fs::remove_dir_all(&dir).with_context(|| format!("failed to remove {}", dir.display()))?;
        self.prune_parents(&dir)?;

        tracing::info!("Removed box {} {} ({})", name, version, provider);
        Ok(true)
    }

    fn box_dir(&self, name: &str, version: &str, provider: &str) -> PathBuf {
        self.root.join(escape_name(name)).join(version).join(provider)
    }

    /// Directory of an installed box whose version compares equal to
    /// `version`, whatever its spelling on disk.
    fn locate(&self, name: &str, version: &BoxVersion, provider: &str) -> Result<Option<PathBuf>> {
        if path_segment_error(provider).is_some() {
            return Ok(None);
        }
        let name_dir = self.root.join(escape_name(name));
        if !name_dir.is_dir() {
            return Ok(None);
        }

        for entry in fs::read_dir(&name_dir)
            .with_context(|| format!("failed to read {}", name_dir.display()))?
        {
            let entry = entry?;
            let dir_name = entry.file_name();
            if is_hidden(&dir_name) {
                continue;
            }
            let matches = BoxVersion::parse(&dir_name.to_string_lossy())
                .map(|v| &v == version)
                .unwrap_or(false);
            let candidate = entry.path().join(provider);
            if matches && candidate.is_dir() {
                return Ok(Some(candidate));
            }
        }
        Ok(None)
    }

    fn read_box(&self, dir: &Path) -> Option<InstalledBox> {
        let provider = dir.file_name()?.to_string_lossy().into_owned();
        let version_dir = dir.parent()?;
        let name_dir = version_dir.parent()?;

        let raw_version = version_dir.file_name()?.to_string_lossy().into_owned();
        let version = match BoxVersion::parse(&raw_version) {
            Ok(v) => v,
            Err(e) => {
                tracing::debug!("Skipping {}: {}", dir.display(), e);
                return None;
            }
        };

        let metadata_url = read_to_string(&dir.join(METADATA_URL_FILE))
            .ok()
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty());

        Some(InstalledBox {
            name: unescape_name(&name_dir.file_name()?.to_string_lossy()),
            version,
            provider,
            directory: dir.to_path_buf(),
            metadata_url,
        })
    }

    /// Remove the version and name directories above `provider_dir` once
    /// they are empty.
    fn prune_parents(&self, provider_dir: &Path) -> Result<()> {
        for dir in provider_dir.ancestors().skip(1).take(2) {
            if dir == self.root || !remove_dir_if_empty(dir)? {
                break;
            }
        }
        Ok(())
    }

    fn lock(&self) -> Result<FileLock> {
        let path = self.root.join(LOCK_FILE);
        FileLock::acquire(&path, self.lock_timeout).map_err(|e| match e {
            LockError::Timeout { path, waited, .. } => BoxError::LockTimeout { path, waited }.into(),
            other => anyhow::Error::new(other),
        })
    }
}

fn read_provider(dir: &Path) -> Result<String> {
    let path = dir.join(METADATA_FILE);
    if !path.is_file() {
        return Err(BoxError::MissingMetadata { path }.into());
    }

    let contents = read_to_string(&path)?;
    let info: BoxInfo =
        serde_json::from_str(&contents).map_err(|e| BoxError::MetadataMalformed {
            path: path.display().to_string(),
            reason: e.to_string(),
        })?;

    let provider = match info.provider {
        Some(provider) if !provider.trim().is_empty() => provider.trim().to_string(),
        _ => {
            return Err(BoxError::MetadataMalformed {
                path: path.display().to_string(),
                reason: "missing `provider`".to_string(),
            }
            .into())
        }
    };

    if let Some(reason) = path_segment_error(&provider) {
        return Err(BoxError::MetadataMalformed {
            path: path.display().to_string(),
            reason: format!("invalid provider `{}`: {}", provider, reason),
        }
        .into());
    }
    Ok(provider)
}

/// Box names are `/`-separated segments, each usable as a directory name.
fn validate_name(name: &str) -> Result<(), BoxError> {
    let reason = if name.is_empty() {
        Some("name is empty")
    } else {
        name.split('/').find_map(path_segment_error)
    };

    match reason {
        Some(reason) => Err(BoxError::InvalidName {
            name: name.to_string(),
            reason: reason.to_string(),
        }),
        None => Ok(()),
    }
}

/// Why `segment` cannot be a single directory under the box root, if it
/// cannot.
fn path_segment_error(segment: &str) -> Option<&'static str> {
    if segment.is_empty() {
        Some("empty path segment")
    } else if segment.starts_with('.') {
        Some("segments must not start with `.`")
    } else if segment.contains(['/', '\\', '\0']) {
        Some("segments must not contain path separators")
    } else {
        None
    }
}

fn escape_name(name: &str) -> String {
    name.replace('/', SLASH_ESCAPE)
}

fn unescape_name(dir_name: &str) -> String {
    dir_name.replace(SLASH_ESCAPE, "/")
}
