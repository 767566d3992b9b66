//! Named stage sequences.

use std::collections::BTreeMap;

use super::Builder;

/// Sequences registered by plugins, by name.
///
/// A sequence is both a runnable action and a reusable sub-chain that other
/// builders reference with [`Builder::sequence`].
#[derive(Debug, Clone, Default)]
pub struct ActionRegistry {
    sequences: BTreeMap<String, Builder>,
}

impl ActionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `builder` as `name`, replacing an earlier registration.
    pub fn register(&mut self, name: impl Into<String>, builder: Builder) {
        let name = name.into();
        if self.sequences.insert(name.clone(), builder).is_some() {
            tracing::debug!("Sequence `{}` replaced", name);
        }
    }

    pub fn get(&self, name: &str) -> Option<&Builder> {
        self.sequences.get(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.sequences.contains_key(name)
    }

    /// Registered names, sorted.
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.sequences.keys().map(String::as_str)
    }
}
