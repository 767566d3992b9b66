//! Box sources: download and unpack.
//!
//! A box source is a local directory, a local tar archive (plain or gzip),
//! or an http(s) URL that is downloaded to a temporary file first.

use std::fs::File;
use std::io::{BufReader, Read, Seek, SeekFrom, Write};
use std::path::{Component, Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use flate2::read::GzDecoder;
use tar::Archive;
use url::Url;

use crate::action::ActionError;
use crate::util::fs::{copy_dir_all, ensure_dir};
use crate::util::interrupt::Interrupt;
use crate::util::shell::{Shell, Status};

const GZIP_MAGIC: [u8; 2] = [0x1f, 0x8b];

/// Where a box comes from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BoxSource {
    Local(PathBuf),
    Remote(Url),
}

impl BoxSource {
    /// Interpret a user-supplied location.
    ///
    /// `http`/`https` URLs are remote, `file://` URLs and everything else
    /// are local paths.
    pub fn parse(location: &str) -> Result<Self> {
        match Url::parse(location) {
            Ok(url) if url.scheme() == "http" || url.scheme() == "https" => {
                Ok(BoxSource::Remote(url))
            }
            Ok(url) if url.scheme() == "file" => url
                .to_file_path()
                .map(BoxSource::Local)
                .map_err(|_| anyhow::anyhow!("invalid file URL: {}", location)),
            _ => Ok(BoxSource::Local(PathBuf::from(location))),
        }
    }

    /// Whether the location names a JSON metadata catalog rather than a box.
    pub fn is_catalog(&self) -> bool {
        let path = match self {
            BoxSource::Local(path) => path.to_string_lossy().into_owned(),
            BoxSource::Remote(url) => url.path().to_string(),
        };
        path.ends_with(".json")
    }
}

impl std::fmt::Display for BoxSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            BoxSource::Local(path) => write!(f, "{}", path.display()),
            BoxSource::Remote(url) => write!(f, "{}", url),
        }
    }
}

/// Download `url` into `dest`, reporting byte progress on `shell`.
///
/// The interrupt is checked between chunks; an interrupted download leaves
/// a partial file for the caller's staging directory to clean up.
pub fn download(
    url: &Url,
    dest: &Path,
    shell: &Arc<Shell>,
    interrupt: &Interrupt,
    timeout: Option<Duration>,
) -> Result<u64> {
    tracing::info!("Downloading {}", url);
    shell.status(Status::Downloading, url);

    let mut builder = reqwest::blocking::Client::builder();
    if let Some(timeout) = timeout {
        builder = builder.timeout(timeout);
    }
    let client = builder.build().context("failed to build HTTP client")?;

    let mut response = client
        .get(url.clone())
        .send()
        .with_context(|| format!("failed to download {}", url))?;

    if !response.status().is_success() {
        bail!("failed to download {}: HTTP {}", url, response.status());
    }

    let total = response.content_length().unwrap_or(0);
    let progress = shell.bytes_progress(url, total);

    let mut file =
        File::create(dest).with_context(|| format!("failed to create {}", dest.display()))?;
    let mut buffer = [0u8; 64 * 1024];

    loop {
        if interrupt.is_set() {
            progress.finish();
            return Err(ActionError::Interrupted.into());
        }

        let n = response
            .read(&mut buffer)
            .with_context(|| format!("failed to read response body from {}", url))?;
        if n == 0 {
            break;
        }
        file.write_all(&buffer[..n])
            .with_context(|| format!("failed to write {}", dest.display()))?;
        progress.inc(n as u64);
    }

    progress.finish();
    file.sync_all()
        .with_context(|| format!("failed to sync {}", dest.display()))?;

    tracing::debug!("Downloaded {} bytes to {}", progress.position(), dest.display());
    Ok(progress.position())
}

/// Unpack a box source into `dest`.
///
/// Directories are copied; files are read as a tar archive, gunzipped
/// first when they start with the gzip magic bytes.
pub fn unpack(source: &Path, dest: &Path, interrupt: &Interrupt) -> Result<()> {
    if source.is_dir() {
        tracing::debug!("Copying box directory {}", source.display());
        return copy_dir_all(source, dest);
    }

    let mut file = File::open(source)
        .with_context(|| format!("failed to open box file {}", source.display()))?;

    let mut magic = [0u8; 2];
    let is_gzip = file.read(&mut magic).map(|n| n == 2 && magic == GZIP_MAGIC)?;
    file.seek(SeekFrom::Start(0))?;

    let reader = BufReader::new(file);
    if is_gzip {
        extract_tarball(GzDecoder::new(reader), dest, interrupt)
    } else {
        extract_tarball(reader, dest, interrupt)
    }
    .with_context(|| format!("failed to unpack box {}", source.display()))
}

/// Extract a tar stream into `dest`.
///
/// Entries with absolute paths or `..` components are rejected before
/// anything is written for them, as are links pointing outside the archive.
/// Writes go through `Entry::unpack_in`, which refuses to follow a symlink
/// created by an earlier entry out of `dest`.
pub fn extract_tarball<R: Read>(reader: R, dest: &Path, interrupt: &Interrupt) -> Result<()> {
    let mut archive = Archive::new(reader);
    ensure_dir(dest)?;

    for entry in archive.entries().context("failed to read tarball entries")? {
        if interrupt.is_set() {
            return Err(ActionError::Interrupted.into());
        }

        let mut entry = entry.context("failed to read tarball entry")?;
        let entry_path = entry.path().context("failed to get entry path")?.into_owned();

        if !is_contained(&entry_path) {
            bail!(
                "tarball entry escapes destination directory: {}",
                entry_path.display()
            );
        }

        let entry_type = entry.header().entry_type();
        match entry_type {
            tar::EntryType::Link | tar::EntryType::Symlink => {
                let target = entry
                    .link_name()
                    .context("failed to get link target")?
                    .map(|t| t.into_owned())
                    .unwrap_or_default();
                if !is_contained(&target) {
                    bail!(
                        "tarball link {} points outside the box: {}",
                        entry_path.display(),
                        target.display()
                    );
                }
                unpack_in(&mut entry, dest, &entry_path)?;
            }
            tar::EntryType::Directory
            | tar::EntryType::Regular
            | tar::EntryType::Continuous => unpack_in(&mut entry, dest, &entry_path)?,
            _ => {
                tracing::debug!(
                    "Skipping unsupported entry type {:?}: {}",
                    entry_type,
                    entry_path.display()
                );
            }
        }
    }

    Ok(())
}

fn unpack_in<R: Read>(entry: &mut tar::Entry<'_, R>, dest: &Path, entry_path: &Path) -> Result<()> {
    let unpacked = entry
        .unpack_in(dest)
        .with_context(|| format!("failed to extract file: {}", entry_path.display()))?;
    if !unpacked {
        bail!(
            "tarball entry escapes destination directory: {}",
            entry_path.display()
        );
    }
    Ok(())
}

fn is_contained(path: &Path) -> bool {
    path.components()
        .all(|c| matches!(c, Component::Normal(_) | Component::CurDir))
}
