//! A registry bound to one detected subject.

use std::sync::Arc;

use anyhow::{Context, Result};
use serde_json::Value;

use super::{CapabilityRegistry, Probe, SubjectKind};
use crate::action::Environment;

/// Invokes capabilities for one `(kind, tag)` pair.
#[derive(Debug, Clone)]
pub struct CapabilityHost {
    registry: Arc<CapabilityRegistry>,
    kind: SubjectKind,
    tag: String,
}

impl CapabilityHost {
    pub fn new(registry: Arc<CapabilityRegistry>, kind: SubjectKind, tag: impl Into<String>) -> Self {
        CapabilityHost {
            registry,
            kind,
            tag: tag.into(),
        }
    }

    /// Detect the tag (or validate `explicit`) and bind to it.
    pub fn detect(
        registry: Arc<CapabilityRegistry>,
        kind: SubjectKind,
        explicit: Option<&str>,
        probe: &dyn Probe,
    ) -> Result<Self> {
        let tag = registry.detect_or(kind, explicit, probe)?;
        tracing::info!("Using {} `{}`", kind, tag);
        Ok(CapabilityHost::new(registry, kind, tag))
    }

    pub fn kind(&self) -> SubjectKind {
        self.kind
    }

    pub fn tag(&self) -> &str {
        &self.tag
    }

    /// The tag and its ancestors.
    pub fn chain(&self) -> Vec<String> {
        self.registry.chain(self.kind, &self.tag)
    }

    pub fn has(&self, name: &str) -> bool {
        self.registry.has_capability(self.kind, &self.tag, name)
    }

    /// Invoke capability `name`.
    pub fn call(&self, name: &str, env: &mut Environment, args: &[Value]) -> Result<Value> {
        let capability = self.registry.capability(self.kind, &self.tag, name)?;
        tracing::debug!("Calling {} `{}` capability `{}`", self.kind, self.tag, name);
        capability.call(env, args).with_context(|| {
            format!(
                "{} `{}` capability `{}` failed",
                self.kind, self.tag, name
            )
        })
    }
}
