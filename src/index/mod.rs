//! The global machine index.
//!
//! Every machine created on this host is recorded in one JSON file so that
//! commands run from any directory can enumerate them. Independent
//! processes share the file; each read-modify-write runs inside
//! [`MachineIndex::with_lock`], which holds an exclusive `fs2` lock on
//! `index.lock` for the whole cycle and replaces the file atomically.
//!
//! File format:
//!
//! ```json
//! { "version": 1, "machines": { "<uuid>": { "name": "web", "provider": "libvirt", ... } } }
//! ```

mod entry;

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

use crate::util::diagnostic::{suggestions, Diagnostic};
use crate::util::fs::{ensure_dir, write_atomic};
use crate::util::lock::{FileLock, LockError};

pub use entry::Entry;

const INDEX_FILE: &str = "index";
const LOCK_FILE: &str = "index.lock";
const FORMAT_VERSION: u32 = 1;

/// Errors raised by the machine index.
#[derive(Debug, Error, miette::Diagnostic)]
pub enum IndexError {
    #[error("timed out after {waited:?} waiting for the machine index lock {path}")]
    #[diagnostic(code(vagabond::index::lock_timeout))]
    LockTimeout {
        path: PathBuf,
        waited: Duration,
        holder: Option<u32>,
    },

    #[error("machine index {path} is corrupt: {reason}")]
    #[diagnostic(code(vagabond::index::corrupt))]
    Corrupt { path: PathBuf, reason: String },
}

impl IndexError {
    /// Whether retrying the same operation later may succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(self, IndexError::LockTimeout { .. })
    }

    /// Convert to a user-friendly diagnostic.
    pub fn to_diagnostic(&self) -> Diagnostic {
        match self {
            IndexError::LockTimeout { holder, .. } => {
                let mut diag = Diagnostic::error(self.to_string());
                if let Some(pid) = holder {
                    diag = diag.with_context(format!("the lock is held by process {}", pid));
                }
                diag.with_suggestion(suggestions::LOCK_BUSY)
            }
            IndexError::Corrupt { .. } => {
                Diagnostic::error(self.to_string()).with_suggestion(suggestions::CORRUPT_INDEX)
            }
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
struct IndexFile {
    version: u32,
    #[serde(default)]
    machines: BTreeMap<String, Entry>,
}

/// Handle to the index stored in one directory.
#[derive(Debug, Clone)]
pub struct MachineIndex {
    dir: PathBuf,
    lock_timeout: Duration,
}

impl MachineIndex {
    pub fn new(dir: impl Into<PathBuf>, lock_timeout: Duration) -> Self {
        MachineIndex {
            dir: dir.into(),
            lock_timeout,
        }
    }

    /// Path of the index file.
    pub fn path(&self) -> PathBuf {
        self.dir.join(INDEX_FILE)
    }

    /// Run `body` with exclusive access to the index.
    ///
    /// The table is read after the lock is taken and written back only if
    /// `body` succeeded and changed it. The lock is released on every exit
    /// path, including panics.
    pub fn with_lock<T>(&self, body: impl FnOnce(&mut IndexSession) -> Result<T>) -> Result<T> {
        ensure_dir(&self.dir)?;
        let lock_path = self.dir.join(LOCK_FILE);
        let _lock = FileLock::acquire(&lock_path, self.lock_timeout).map_err(|e| match e {
            LockError::Timeout {
                path,
                waited,
                holder,
            } => IndexError::LockTimeout {
                path,
                waited,
                holder,
            }
            .into(),
            other => anyhow::Error::new(other),
        })?;

        let path = self.path();
        let mut session = IndexSession {
            machines: read_table(&path)?,
            dirty: false,
        };

        let value = body(&mut session)?;

        if session.dirty {
            write_table(&path, &session.machines)?;
            tracing::debug!(
                "Wrote machine index with {} entries",
                session.machines.len()
            );
        }
        Ok(value)
    }

    /// Look up an entry by id or unique id prefix.
    pub fn get(&self, id: &str) -> Result<Option<Entry>> {
        self.with_lock(|s| Ok(s.get(id).cloned()))
    }

    /// Insert or update `entry`, returning its id.
    ///
    /// The caller's entry gets the assigned id and `updated_at` stamp.
    pub fn set(&self, entry: &mut Entry) -> Result<String> {
        self.with_lock(|s| Ok(s.set(entry)))
    }

    /// Delete an entry. Returns whether it existed.
    pub fn delete(&self, id: &str) -> Result<bool> {
        self.with_lock(|s| Ok(s.delete(id)))
    }

    /// Whether an entry with this id (or unique prefix) exists.
    pub fn include(&self, id: &str) -> Result<bool> {
        self.with_lock(|s| Ok(s.include(id)))
    }

    /// Live entries, re-read from disk.
    pub fn each(&self) -> Result<impl Iterator<Item = Entry>> {
        let entries = self.with_lock(|s| Ok(s.each().cloned().collect::<Vec<_>>()))?;
        Ok(entries.into_iter())
    }

    /// Every entry, stale ones included.
    pub fn all(&self) -> Result<Vec<Entry>> {
        self.with_lock(|s| Ok(s.all().cloned().collect()))
    }

    /// Remove stale entries. Returns how many were removed.
    pub fn garbage_collect(&self) -> Result<usize> {
        self.with_lock(|s| Ok(s.garbage_collect().len()))
    }
}

/// The index table while the lock is held.
#[derive(Debug)]
pub struct IndexSession {
    machines: BTreeMap<String, Entry>,
    dirty: bool,
}

impl IndexSession {
    /// Exact id match, else the single entry whose id starts with `id`.
    pub fn get(&self, id: &str) -> Option<&Entry> {
        self.resolve(id).and_then(|key| self.machines.get(&key))
    }

    pub fn include(&self, id: &str) -> bool {
        self.resolve(id).is_some()
    }

    pub fn set(&mut self, entry: &mut Entry) -> String {
        let id = match &entry.id {
            Some(id) => id.clone(),
            None => self
                .machines
                .iter()
                .find(|(_, existing)| existing.same_machine(entry))
                .map(|(id, _)| id.clone())
                .unwrap_or_else(|| Uuid::new_v4().to_string()),
        };

        entry.id = Some(id.clone());
        entry.updated_at = Some(Utc::now());
        tracing::debug!("Recording machine {} ({}) as {}", entry.name, entry.provider, id);

        self.machines.insert(id.clone(), entry.clone());
        self.dirty = true;
        id
    }

    pub fn delete(&mut self, id: &str) -> bool {
        let Some(key) = self.resolve(id) else {
            return false;
        };
        self.machines.remove(&key);
        self.dirty = true;
        tracing::debug!("Deleted machine {}", key);
        true
    }

    /// Entries whose local data still exists.
    pub fn each(&self) -> impl Iterator<Item = &Entry> {
        self.machines.values().filter(|e| !e.is_stale())
    }

    pub fn all(&self) -> impl Iterator<Item = &Entry> {
        self.machines.values()
    }

    /// Remove stale entries and return them.
    pub fn garbage_collect(&mut self) -> Vec<Entry> {
        let stale: Vec<String> = self
            .machines
            .iter()
            .filter(|(_, e)| e.is_stale())
            .map(|(id, _)| id.clone())
            .collect();

        let removed: Vec<Entry> = stale
            .iter()
            .filter_map(|id| self.machines.remove(id))
            .collect();

        if !removed.is_empty() {
            self.dirty = true;
            tracing::info!("Pruned {} stale machine index entries", removed.len());
        }
        removed
    }

    fn resolve(&self, id: &str) -> Option<String> {
        if id.is_empty() {
            return None;
        }
        if self.machines.contains_key(id) {
            return Some(id.to_string());
        }

        let mut matches = self.machines.keys().filter(|key| key.starts_with(id));
        match (matches.next(), matches.next()) {
            (Some(key), None) => Some(key.clone()),
            (Some(_), Some(_)) => {
                tracing::debug!("Machine id prefix {} is ambiguous", id);
                None
            }
            _ => None,
        }
    }
}

fn read_table(path: &Path) -> Result<BTreeMap<String, Entry>> {
    let contents = match std::fs::read_to_string(path) {
        Ok(contents) => contents,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(BTreeMap::new()),
        Err(e) => {
            return Err(e).with_context(|| format!("failed to read {}", path.display()));
        }
    };

    if contents.trim().is_empty() {
        return Ok(BTreeMap::new());
    }

    let corrupt = |reason: String| IndexError::Corrupt {
        path: path.to_path_buf(),
        reason,
    };

    let file: IndexFile = serde_json::from_str(&contents).map_err(|e| corrupt(e.to_string()))?;
    if file.version != FORMAT_VERSION {
        return Err(corrupt(format!("unsupported format version {}", file.version)).into());
    }

    Ok(file
        .machines
        .into_iter()
        .map(|(id, mut entry)| {
            entry.id = Some(id.clone());
            (id, entry)
        })
        .collect())
}

fn write_table(path: &Path, machines: &BTreeMap<String, Entry>) -> Result<()> {
    let file = IndexFile {
        version: FORMAT_VERSION,
        machines: machines.clone(),
    };
    let json = serde_json::to_vec_pretty(&file).context("failed to serialize machine index")?;
    write_atomic(path, &json)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::fixtures;
    use std::sync::{Arc, Mutex};
    use std::thread;
    use tempfile::TempDir;

    fn index(tmp: &TempDir) -> MachineIndex {
        MachineIndex::new(tmp.path().join("machine-index"), Duration::from_secs(5))
    }

    #[test]
    fn test_round_trip() {
        let tmp = TempDir::new().unwrap();
        let index = index(&tmp);
        let data = tmp.path().join("web");
        std::fs::create_dir_all(&data).unwrap();

        let mut entry = fixtures::machine("web", "libvirt", &data);
        entry.state = Some("running".into());
        entry
            .extra_data
            .insert("box".into(), serde_json::json!("org/base"));

        let id = index.set(&mut entry).unwrap();
        assert_eq!(entry.id.as_deref(), Some(id.as_str()));
        assert!(entry.updated_at.is_some());

        let loaded = index.get(&id).unwrap().unwrap();
        assert_eq!(loaded, entry);
        assert!(index.include(&id).unwrap());
    }

    #[test]
    fn test_file_format() {
        let tmp = TempDir::new().unwrap();
        let index = index(&tmp);
        let mut entry = Entry::new("web", "libvirt");
        let id = index.set(&mut entry).unwrap();

        let raw: serde_json::Value =
            serde_json::from_str(&std::fs::read_to_string(index.path()).unwrap()).unwrap();
        assert_eq!(raw["version"], 1);
        assert_eq!(raw["machines"][&id]["name"], "web");
    }

    #[test]
    fn test_set_reuses_id_for_same_machine() {
        let tmp = TempDir::new().unwrap();
        let index = index(&tmp);
        let data = tmp.path().join("web");

        let mut first = fixtures::machine("web", "libvirt", &data);
        let id = index.set(&mut first).unwrap();

        let mut again = fixtures::machine("web", "libvirt", &data);
        again.state = Some("poweroff".into());
        assert_eq!(index.set(&mut again).unwrap(), id);

        let mut other = fixtures::machine("db", "libvirt", &data);
        assert_ne!(index.set(&mut other).unwrap(), id);
        assert_eq!(index.all().unwrap().len(), 2);
    }

    #[test]
    fn test_prefix_lookup() {
        let tmp = TempDir::new().unwrap();
        let index = index(&tmp);

        index
            .with_lock(|s| {
                s.set(&mut Entry {
                    id: Some("abc123".into()),
                    ..Entry::new("web", "libvirt")
                });
                s.set(&mut Entry {
                    id: Some("abd456".into()),
                    ..Entry::new("db", "libvirt")
                });
                Ok(())
            })
            .unwrap();

        assert_eq!(index.get("abc").unwrap().unwrap().name, "web");
        assert!(index.get("ab").unwrap().is_none());
        assert!(index.get("").unwrap().is_none());
        assert!(index.get("zzz").unwrap().is_none());
    }

    #[test]
    fn test_delete() {
        let tmp = TempDir::new().unwrap();
        let index = index(&tmp);
        let mut entry = Entry::new("web", "libvirt");
        let id = index.set(&mut entry).unwrap();

        assert!(index.delete(&id).unwrap());
        assert!(!index.delete(&id).unwrap());
        assert!(index.get(&id).unwrap().is_none());
    }

    #[test]
    fn test_garbage_collect_stale_entry() {
        let tmp = TempDir::new().unwrap();
        let index = index(&tmp);

        let live = tmp.path().join("live");
        std::fs::create_dir_all(&live).unwrap();
        let doomed = tmp.path().join("doomed");
        std::fs::create_dir_all(&doomed).unwrap();

        index.set(&mut fixtures::machine("live", "libvirt", &live)).unwrap();
        index.set(&mut fixtures::machine("doomed", "libvirt", &doomed)).unwrap();
        std::fs::remove_dir_all(&doomed).unwrap();

        let names: Vec<String> = index.each().unwrap().map(|e| e.name).collect();
        assert_eq!(names, vec!["live"]);
        assert_eq!(index.all().unwrap().len(), 2);

        assert_eq!(index.garbage_collect().unwrap(), 1);
        assert_eq!(index.garbage_collect().unwrap(), 0);
        assert_eq!(index.all().unwrap().len(), 1);
    }

    #[test]
    fn test_corrupt_index_detected() {
        let tmp = TempDir::new().unwrap();
        let index = index(&tmp);
        std::fs::create_dir_all(tmp.path().join("machine-index")).unwrap();

        std::fs::write(index.path(), "{ not json").unwrap();
        let err = index.all().unwrap_err();
        assert!(matches!(
            err.downcast_ref::<IndexError>(),
            Some(IndexError::Corrupt { .. })
        ));

        std::fs::write(index.path(), r#"{"version": 2, "machines": {}}"#).unwrap();
        let err = index.all().unwrap_err();
        assert!(err.to_string().contains("unsupported format version 2"));
    }

    #[test]
    fn test_failed_body_does_not_write() {
        let tmp = TempDir::new().unwrap();
        let index = index(&tmp);

        let result: Result<()> = index.with_lock(|s| {
            s.set(&mut Entry::new("web", "libvirt"));
            anyhow::bail!("stage failed")
        });
        assert!(result.is_err());
        assert!(index.all().unwrap().is_empty());
    }

    #[test]
    fn test_lock_timeout() {
        let tmp = TempDir::new().unwrap();
        let dir = tmp.path().join("machine-index");
        let index = MachineIndex::new(&dir, Duration::from_millis(100));
        let _held = FileLock::acquire(&dir.join("index.lock"), Duration::from_secs(1)).unwrap();

        let err = index.all().unwrap_err();
        let index_err = err.downcast_ref::<IndexError>().unwrap();
        assert!(index_err.is_retryable());
        assert!(index_err.to_diagnostic().format(false).contains("held by process"));
    }

    #[test]
    fn test_concurrent_sessions_do_not_interleave() {
        let tmp = TempDir::new().unwrap();
        let index = index(&tmp);
        let log = Arc::new(Mutex::new(Vec::new()));

        let handles: Vec<_> = (0..2)
            .map(|worker| {
                let index = index.clone();
                let log = Arc::clone(&log);
                thread::spawn(move || {
                    for round in 0..5 {
                        index
                            .with_lock(|s| {
                                log.lock().unwrap().push(format!("enter {worker}"));
                                s.set(&mut Entry::new(format!("m{worker}-{round}"), "libvirt"));
                                thread::sleep(Duration::from_millis(5));
                                log.lock().unwrap().push(format!("exit {worker}"));
                                Ok(())
                            })
                            .unwrap();
                    }
                })
            })
            .collect();

        for handle in handles {
            handle.join().unwrap();
        }

        let log = log.lock().unwrap();
        for pair in log.chunks(2) {
            assert_eq!(pair[0].replace("enter", "exit"), pair[1]);
        }
        assert_eq!(index.all().unwrap().len(), 10);
    }
}
