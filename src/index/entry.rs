//! Machine index entries.

use std::collections::BTreeMap;
use std::path::PathBuf;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// One machine known to the index.
///
/// The id is the key in the index file, not part of the stored value; it is
/// `None` until the entry is first written.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Entry {
    #[serde(skip)]
    pub id: Option<String>,

    /// Machine name within its project.
    pub name: String,

    /// Provider the machine runs on.
    pub provider: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub vagrantfile_path: Option<PathBuf>,

    /// Directory holding the machine's local state. When it disappears the
    /// entry is stale.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub local_data_path: Option<PathBuf>,

    /// The provider's own id for the machine.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub provider_id: Option<String>,

    /// Last known state, e.g. `running`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub state: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<DateTime<Utc>>,

    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub extra_data: BTreeMap<String, serde_json::Value>,
}

impl Entry {
    pub fn new(name: impl Into<String>, provider: impl Into<String>) -> Self {
        Entry {
            id: None,
            name: name.into(),
            provider: provider.into(),
            vagrantfile_path: None,
            local_data_path: None,
            provider_id: None,
            state: None,
            updated_at: None,
            extra_data: BTreeMap::new(),
        }
    }

    /// Whether the local data directory is recorded but gone.
    ///
    /// Entries without a recorded directory are never stale.
    pub fn is_stale(&self) -> bool {
        self.local_data_path
            .as_ref()
            .is_some_and(|path| !path.is_dir())
    }

    /// Whether `other` describes the same machine: same name, provider and
    /// project file.
    pub fn same_machine(&self, other: &Entry) -> bool {
        self.name == other.name
            && self.provider == other.provider
            && self.vagrantfile_path == other.vagrantfile_path
    }

    /// First eight characters of the id, for display.
    pub fn short_id(&self) -> &str {
        match &self.id {
            Some(id) => &id[..id.len().min(8)],
            None => "",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_stale_detection() {
        let tmp = TempDir::new().unwrap();
        let mut entry = Entry::new("web", "libvirt");
        assert!(!entry.is_stale());

        entry.local_data_path = Some(tmp.path().to_path_buf());
        assert!(!entry.is_stale());

        entry.local_data_path = Some(tmp.path().join("gone"));
        assert!(entry.is_stale());
    }

    #[test]
    fn test_serialized_form_omits_id() {
        let mut entry = Entry::new("web", "libvirt");
        entry.id = Some("abc".into());
        entry
            .extra_data
            .insert("box".into(), serde_json::json!({"name": "org/base"}));

        let json = serde_json::to_value(&entry).unwrap();
        assert!(json.get("id").is_none());
        assert_eq!(json["extra_data"]["box"]["name"], "org/base");
        assert!(json.get("state").is_none());

        let back: Entry = serde_json::from_value(json).unwrap();
        assert_eq!(back.id, None);
        assert_eq!(back.extra_data, entry.extra_data);
    }

    #[test]
    fn test_short_id() {
        let mut entry = Entry::new("web", "libvirt");
        assert_eq!(entry.short_id(), "");
        entry.id = Some("0123456789abcdef".into());
        assert_eq!(entry.short_id(), "01234567");
    }
}
