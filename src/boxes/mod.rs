//! Installed boxes and version resolution.
//!
//! A box is an immutable VM image identified by `(name, version, provider)`.
//! The [`BoxCollection`] owns the on-disk tree, [`BoxMetadata`] describes
//! the versions a remote catalog offers, and [`version`] holds the ordering
//! and constraint rules both of them share.

pub mod archive;
pub mod collection;
pub mod metadata;
pub mod version;

use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

use crate::util::diagnostic::{suggestions, Diagnostic};

pub use archive::BoxSource;
pub use collection::{AddOptions, BoxCollection, InstalledBox};
pub use metadata::BoxMetadata;
pub use version::{BoxVersion, Constraint, VersionError};

/// Errors raised by box management.
#[derive(Debug, Error, miette::Diagnostic)]
pub enum BoxError {
    #[error("box `{name}` ({version}, {provider}) is already installed")]
    #[diagnostic(code(vagabond::boxes::exists))]
    AlreadyExists {
        name: String,
        version: String,
        provider: String,
    },

    #[error("no installed box `{name}` matches `{constraint}`{}", providers_suffix(.providers))]
    #[diagnostic(code(vagabond::boxes::not_found))]
    NotFound {
        name: String,
        constraint: String,
        providers: Vec<String>,
    },

    #[error("box `{name}` is for provider `{found}`, expected one of: {}", .expected.join(", "))]
    #[diagnostic(code(vagabond::boxes::provider_mismatch))]
    ProviderMismatch {
        name: String,
        found: String,
        expected: Vec<String>,
    },

    #[error("box `{name}` ({version}) is in use by: {}", .machines.join(", "))]
    #[diagnostic(code(vagabond::boxes::in_use))]
    InUse {
        name: String,
        version: String,
        machines: Vec<String>,
    },

    #[error("invalid box name `{name}`: {reason}")]
    #[diagnostic(code(vagabond::boxes::invalid_name))]
    InvalidName { name: String, reason: String },

    #[error("checksum mismatch for {path}: expected {kind} {expected}, got {actual}")]
    #[diagnostic(code(vagabond::boxes::checksum))]
    ChecksumMismatch {
        path: PathBuf,
        kind: String,
        expected: String,
        actual: String,
    },

    #[error("box has no metadata.json: {path}")]
    #[diagnostic(code(vagabond::boxes::missing_metadata))]
    MissingMetadata { path: PathBuf },

    #[error("malformed box metadata in {path}: {reason}")]
    #[diagnostic(code(vagabond::boxes::malformed_metadata))]
    MetadataMalformed { path: String, reason: String },

    #[error("timed out after {waited:?} waiting for the box lock {path}")]
    #[diagnostic(code(vagabond::boxes::lock_timeout))]
    LockTimeout { path: PathBuf, waited: Duration },
}

fn providers_suffix(providers: &[String]) -> String {
    if providers.is_empty() {
        String::new()
    } else {
        format!(" for provider {}", providers.join(" or "))
    }
}

impl BoxError {
    /// Whether retrying the same operation later may succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(self, BoxError::LockTimeout { .. })
    }

    /// Convert to a user-friendly diagnostic.
    pub fn to_diagnostic(&self) -> Diagnostic {
        let diag = Diagnostic::error(self.to_string());
        match self {
            BoxError::AlreadyExists { .. } => diag.with_suggestion(suggestions::BOX_EXISTS),
            BoxError::NotFound { .. } => diag.with_suggestion(suggestions::BOX_NOT_FOUND),
            BoxError::ProviderMismatch { .. } => {
                diag.with_suggestion("Pass `--provider` matching the box's metadata.json")
            }
            BoxError::InUse { .. } => diag
                .with_context("removing it would break those machines")
                .with_suggestion("Destroy the machines first, or pass `--force`"),
            BoxError::InvalidName { .. } => diag.with_suggestion(
                "Use `/`-separated segments that do not start with `.`",
            ),
            BoxError::ChecksumMismatch { .. } => diag
                .with_context("the file may be corrupt or was tampered with")
                .with_suggestion("Download the box again or check the expected checksum"),
            BoxError::MissingMetadata { .. } | BoxError::MetadataMalformed { .. } => {
                diag.with_suggestion("Rebuild the box with a valid metadata.json")
            }
            BoxError::LockTimeout { .. } => diag.with_suggestion(suggestions::LOCK_BUSY),
        }
    }
}
