//! Capability dispatch.
//!
//! Platform-specific behavior ("change the hostname on this guest", "open
//! the firewall on this host") is registered by plugins as named
//! capabilities on a platform tag. Tags form a forest: a tag without its
//! own implementation of a capability falls back to its parent, then its
//! grandparent, until the root. The platform tag itself is found at runtime
//! by detectors, tried from highest precedence down.
//!
//! Registration happens once through a [`CapabilityRegistryBuilder`]; the
//! built [`CapabilityRegistry`] is read-only.

mod host;
mod probe;
mod registry;

use std::fmt;

use anyhow::Result;
use serde_json::Value;
use thiserror::Error;

use crate::action::Environment;

pub use host::CapabilityHost;
pub use probe::{LocalProbe, Probe};
pub use registry::{CapabilityRegistry, CapabilityRegistryBuilder};

/// What a tag describes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum SubjectKind {
    Guest,
    Host,
    Provider,
}

impl SubjectKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            SubjectKind::Guest => "guest",
            SubjectKind::Host => "host",
            SubjectKind::Provider => "provider",
        }
    }
}

impl fmt::Display for SubjectKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A capability implementation.
///
/// Closures of the matching shape implement this trait.
pub trait Capability: Send + Sync {
    fn call(&self, env: &mut Environment, args: &[Value]) -> Result<Value>;
}

impl<F> Capability for F
where
    F: Fn(&mut Environment, &[Value]) -> Result<Value> + Send + Sync,
{
    fn call(&self, env: &mut Environment, args: &[Value]) -> Result<Value> {
        self(env, args)
    }
}

/// Errors raised by capability registration and dispatch.
#[derive(Debug, Error, miette::Diagnostic)]
pub enum CapabilityError {
    #[error("no {kind} detector matched")]
    #[diagnostic(
        code(vagabond::capability::no_matching_tag),
        help("set the platform explicitly if detection cannot identify it")
    )]
    NoMatchingTag { kind: SubjectKind },

    #[error("unknown {kind} `{tag}`")]
    #[diagnostic(code(vagabond::capability::unknown_tag))]
    UnknownTag { kind: SubjectKind, tag: String },

    #[error("{kind} `{tag}` does not support capability `{capability}`")]
    #[diagnostic(code(vagabond::capability::not_found))]
    CapabilityNotFound {
        kind: SubjectKind,
        tag: String,
        capability: String,
    },

    #[error("cyclic {kind} parents: {}", .chain.join(" -> "))]
    #[diagnostic(code(vagabond::capability::cyclic_parent))]
    CyclicParent { kind: SubjectKind, chain: Vec<String> },

    #[error("{kind} `{tag}` already has parent `{existing}`, cannot set `{requested}`")]
    #[diagnostic(code(vagabond::capability::conflicting_parent))]
    ConflictingParent {
        kind: SubjectKind,
        tag: String,
        existing: String,
        requested: String,
    },
}
