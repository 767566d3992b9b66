//! Hooks: stage specs plugins attach to other plugins' actions.

use std::collections::BTreeMap;

use super::{Builder, StageSpec};

/// Key under which a hook applies to every action.
pub const ALL_ACTIONS: &str = "*";

/// Insertions to make into one action's builder.
#[derive(Debug, Clone, Default)]
pub struct Hook {
    before: Vec<(String, StageSpec)>,
    after: Vec<(String, StageSpec)>,
    prepend: Vec<StageSpec>,
    append: Vec<StageSpec>,
}

impl Hook {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert `spec` immediately before the stage called `target`.
    pub fn before(&mut self, target: impl Into<String>, spec: StageSpec) -> &mut Self {
        self.before.push((target.into(), spec));
        self
    }

    /// Insert `spec` immediately after the stage called `target`.
    pub fn after(&mut self, target: impl Into<String>, spec: StageSpec) -> &mut Self {
        self.after.push((target.into(), spec));
        self
    }

    /// Insert `spec` at the start of the action.
    pub fn prepend(&mut self, spec: StageSpec) -> &mut Self {
        self.prepend.push(spec);
        self
    }

    /// Insert `spec` at the end of the action.
    pub fn append(&mut self, spec: StageSpec) -> &mut Self {
        self.append.push(spec);
        self
    }

    pub fn is_empty(&self) -> bool {
        self.before.is_empty()
            && self.after.is_empty()
            && self.prepend.is_empty()
            && self.append.is_empty()
    }

    /// Apply to `builder`.
    ///
    /// Prepends and appends go in first, then `before`/`after` insertions
    /// relative to their targets. Multiple insertions around one target keep
    /// their registration order. Absent targets are skipped.
    pub fn apply(&self, builder: &mut Builder) {
        let mut edited = std::mem::take(builder);
        for (i, spec) in self.prepend.iter().enumerate() {
            // Index is always within bounds here.
            let _ = edited.insert(i, spec.clone());
        }
        for spec in &self.append {
            edited = edited.push(spec.clone());
        }

        for (target, spec) in &self.before {
            if edited.insert_before(target, spec.clone()).is_err() {
                tracing::debug!("Hook target `{}` not in action, skipped", target);
            }
        }

        let mut inserted_after: BTreeMap<&str, usize> = BTreeMap::new();
        for (target, spec) in &self.after {
            let Some(index) = edited.index_of(target) else {
                tracing::debug!("Hook target `{}` not in action, skipped", target);
                continue;
            };
            let offset = inserted_after.entry(target.as_str()).or_insert(0);
            let _ = edited.insert(index + 1 + *offset, spec.clone());
            *offset += 1;
        }

        *builder = edited;
    }
}

/// Hooks registered by plugins, keyed by action name or [`ALL_ACTIONS`].
#[derive(Debug, Clone, Default)]
pub struct HookRegistry {
    hooks: BTreeMap<String, Hook>,
}

impl HookRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// The hook for `action`, created on first use.
    pub fn hook(&mut self, action: impl Into<String>) -> &mut Hook {
        self.hooks.entry(action.into()).or_default()
    }

    /// Apply the hooks for every action, then those for `action`.
    pub fn apply(&self, action: &str, builder: &mut Builder) {
        for key in [ALL_ACTIONS, action] {
            if let Some(hook) = self.hooks.get(key) {
                tracing::debug!("Applying `{}` hooks to `{}`", key, action);
                hook.apply(builder);
            }
        }
    }
}
