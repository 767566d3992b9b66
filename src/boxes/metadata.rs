//! Remote box catalogs.
//!
//! A catalog is a JSON document listing every published version of one box
//! and, per version, the providers it is built for:
//!
//! ```json
//! {
//!   "name": "org/base",
//!   "versions": [
//!     { "version": "1.2.0",
//!       "providers": [{ "name": "libvirt", "url": "https://...", "checksum": "...",
//!                       "checksum_type": "sha256" }] }
//!   ]
//! }
//! ```

use std::path::Path;

use anyhow::Result;
use serde::{Deserialize, Serialize};

use super::version::{BoxVersion, Constraint};
use super::BoxError;
use crate::util::fs::read_to_string;
use crate::util::hash::Checksum;

/// A parsed box catalog.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BoxMetadata {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default)]
    pub versions: Vec<MetadataVersion>,
}

/// One published version.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetadataVersion {
    pub version: String,
    #[serde(default)]
    pub providers: Vec<MetadataProvider>,
}

/// A downloadable build of a version for one provider.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetadataProvider {
    pub name: String,
    pub url: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub checksum: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub checksum_type: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub architecture: Option<String>,
}

impl MetadataProvider {
    /// The expected checksum, when the catalog publishes one.
    pub fn checksum(&self) -> Result<Option<Checksum>> {
        match (&self.checksum, &self.checksum_type) {
            (Some(value), Some(kind)) => Ok(Some(Checksum::new(kind, value)?)),
            (Some(value), None) => Ok(Some(Checksum::new("sha256", value)?)),
            _ => Ok(None),
        }
    }
}

impl MetadataVersion {
    /// The build for `provider`, if this version has one.
    pub fn provider(&self, provider: &str) -> Option<&MetadataProvider> {
        self.providers.iter().find(|p| p.name == provider)
    }

    fn parsed(&self) -> Option<BoxVersion> {
        BoxVersion::parse(&self.version).ok()
    }
}

impl BoxMetadata {
    /// Parse a catalog. `origin` names the document in errors.
    pub fn from_json(json: &str, origin: &str) -> Result<Self, BoxError> {
        let metadata: BoxMetadata =
            serde_json::from_str(json).map_err(|e| BoxError::MetadataMalformed {
                path: origin.to_string(),
                reason: e.to_string(),
            })?;

        for v in &metadata.versions {
            if let Err(e) = BoxVersion::parse(&v.version) {
                return Err(BoxError::MetadataMalformed {
                    path: origin.to_string(),
                    reason: e.to_string(),
                });
            }
        }

        Ok(metadata)
    }

    /// Load a catalog from a file.
    pub fn load(path: &Path) -> Result<Self> {
        let json = read_to_string(path)?;
        Ok(Self::from_json(&json, &path.display().to_string())?)
    }

    /// The highest version satisfying `constraint` that offers one of
    /// `providers` (any provider when the list is empty).
    pub fn version(&self, constraint: &Constraint, providers: &[String]) -> Option<&MetadataVersion> {
        self.versions
            .iter()
            .filter_map(|v| v.parsed().map(|parsed| (parsed, v)))
            .filter(|(parsed, _)| constraint.matches(parsed))
            .filter(|(_, v)| {
                providers.is_empty() || providers.iter().any(|p| v.provider(p).is_some())
            })
            .max_by(|(a, _), (b, _)| a.cmp(b))
            .map(|(_, v)| v)
    }

    /// Published versions in ascending order, optionally only those with a
    /// build for `provider`.
    pub fn versions(&self, provider: Option<&str>) -> Vec<String> {
        let mut versions: Vec<(BoxVersion, &MetadataVersion)> = self
            .versions
            .iter()
            .filter(|v| provider.map_or(true, |p| v.provider(p).is_some()))
            .filter_map(|v| v.parsed().map(|parsed| (parsed, v)))
            .collect();
        versions.sort_by(|(a, _), (b, _)| a.cmp(b));
        versions.into_iter().map(|(_, v)| v.version.clone()).collect()
    }
}
