//! Registration and lookup of capabilities, parents and detectors.

use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;

use super::{Capability, CapabilityError, Probe, SubjectKind};

/// Detection predicate over a live probe.
pub type DetectFn = Arc<dyn Fn(&dyn Probe) -> bool + Send + Sync>;

struct Detector {
    tag: String,
    precedence: i32,
    test: DetectFn,
}

#[derive(Default)]
struct KindTable {
    capabilities: HashMap<String, HashMap<String, Arc<dyn Capability>>>,
    parents: HashMap<String, String>,
    detectors: Vec<Detector>,
    tags: BTreeSet<String>,
}

impl KindTable {
    fn parent(&self, tag: &str) -> Option<&str> {
        self.parents.get(tag).map(String::as_str)
    }
}

/// Collects registrations from every plugin.
#[derive(Default)]
pub struct CapabilityRegistryBuilder {
    kinds: HashMap<SubjectKind, KindTable>,
}

impl std::fmt::Debug for CapabilityRegistryBuilder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        debug_tags(&self.kinds, f)
    }
}

impl CapabilityRegistryBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    fn table(&mut self, kind: SubjectKind) -> &mut KindTable {
        self.kinds.entry(kind).or_default()
    }

    /// Register `implementation` as capability `name` on `tag`.
    ///
    /// A later registration of the same name on the same tag replaces the
    /// earlier one.
    pub fn register(
        &mut self,
        kind: SubjectKind,
        tag: &str,
        name: &str,
        implementation: impl Capability + 'static,
    ) -> &mut Self {
        let table = self.table(kind);
        table.tags.insert(tag.to_string());
        let previous = table
            .capabilities
            .entry(tag.to_string())
            .or_default()
            .insert(name.to_string(), Arc::new(implementation));
        if previous.is_some() {
            tracing::debug!("{} `{}` capability `{}` replaced", kind, tag, name);
        }
        self
    }

    /// Declare `parent` as the fallback for `tag`.
    ///
    /// Repeating an identical declaration is a no-op; a different parent for
    /// the same tag, or a declaration that closes a cycle, is an error.
    pub fn register_parent(
        &mut self,
        kind: SubjectKind,
        tag: &str,
        parent: &str,
    ) -> Result<&mut Self, CapabilityError> {
        let table = self.table(kind);

        if let Some(existing) = table.parent(tag) {
            if existing == parent {
                return Ok(self);
            }
            return Err(CapabilityError::ConflictingParent {
                kind,
                tag: tag.to_string(),
                existing: existing.to_string(),
                requested: parent.to_string(),
            });
        }

        let mut chain = vec![tag.to_string(), parent.to_string()];
        let mut current = parent;
        while current != tag {
            match table.parent(current) {
                Some(next) => {
                    chain.push(next.to_string());
                    current = next;
                }
                None => break,
            }
        }
        if current == tag {
            return Err(CapabilityError::CyclicParent { kind, chain });
        }

        table.tags.insert(tag.to_string());
        table.tags.insert(parent.to_string());
        table.parents.insert(tag.to_string(), parent.to_string());
        Ok(self)
    }

    /// Register a detector for `tag`. Higher `precedence` is tried first;
    /// equal precedence keeps declaration order.
    pub fn register_detector<F>(
        &mut self,
        kind: SubjectKind,
        tag: &str,
        precedence: i32,
        test: F,
    ) -> &mut Self
    where
        F: Fn(&dyn Probe) -> bool + Send + Sync + 'static,
    {
        let table = self.table(kind);
        table.tags.insert(tag.to_string());
        table.detectors.push(Detector {
            tag: tag.to_string(),
            precedence,
            test: Arc::new(test),
        });
        self
    }

    /// Freeze the registrations.
    pub fn build(mut self) -> CapabilityRegistry {
        for table in self.kinds.values_mut() {
            // Stable sort keeps declaration order among equal precedence.
            table
                .detectors
                .sort_by(|a, b| b.precedence.cmp(&a.precedence));
        }
        CapabilityRegistry { kinds: self.kinds }
    }
}

/// Read-only capability lookup.
pub struct CapabilityRegistry {
    kinds: HashMap<SubjectKind, KindTable>,
}

impl std::fmt::Debug for CapabilityRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        debug_tags(&self.kinds, f)
    }
}

fn debug_tags(
    kinds: &HashMap<SubjectKind, KindTable>,
    f: &mut std::fmt::Formatter<'_>,
) -> std::fmt::Result {
    let mut map = f.debug_map();
    for (kind, table) in kinds {
        map.entry(kind, &table.tags);
    }
    map.finish()
}

impl CapabilityRegistry {
    /// An empty registry.
    pub fn empty() -> Self {
        CapabilityRegistryBuilder::new().build()
    }

    fn table(&self, kind: SubjectKind) -> Option<&KindTable> {
        self.kinds.get(&kind)
    }

    /// Run `kind` detectors against `probe`; the first that matches wins.
    pub fn detect(&self, kind: SubjectKind, probe: &dyn Probe) -> Result<String, CapabilityError> {
        let detectors = self.table(kind).map(|t| t.detectors.as_slice()).unwrap_or(&[]);
        for detector in detectors {
            tracing::debug!(
                "Trying {} detector `{}` (precedence {})",
                kind,
                detector.tag,
                detector.precedence
            );
            if (detector.test)(probe) {
                tracing::debug!("Detected {} `{}`", kind, detector.tag);
                return Ok(detector.tag.clone());
            }
        }
        Err(CapabilityError::NoMatchingTag { kind })
    }

    /// Use `explicit` when given (it must be a known tag), else detect.
    pub fn detect_or(
        &self,
        kind: SubjectKind,
        explicit: Option<&str>,
        probe: &dyn Probe,
    ) -> Result<String, CapabilityError> {
        match explicit {
            Some(tag) if self.is_known(kind, tag) => Ok(tag.to_string()),
            Some(tag) => Err(CapabilityError::UnknownTag {
                kind,
                tag: tag.to_string(),
            }),
            None => self.detect(kind, probe),
        }
    }

    /// Whether `tag` was mentioned by any registration.
    pub fn is_known(&self, kind: SubjectKind, tag: &str) -> bool {
        self.table(kind).is_some_and(|t| t.tags.contains(tag))
    }

    /// Find capability `name` on `tag` or its nearest ancestor.
    pub fn capability(
        &self,
        kind: SubjectKind,
        tag: &str,
        name: &str,
    ) -> Result<Arc<dyn Capability>, CapabilityError> {
        let not_found = || CapabilityError::CapabilityNotFound {
            kind,
            tag: tag.to_string(),
            capability: name.to_string(),
        };

        let table = self.table(kind).ok_or_else(not_found)?;
        for candidate in self.chain(kind, tag) {
            if let Some(cap) = table
                .capabilities
                .get(&candidate)
                .and_then(|caps| caps.get(name))
            {
                if candidate != tag {
                    tracing::debug!(
                        "{} `{}` capability `{}` provided by ancestor `{}`",
                        kind,
                        tag,
                        name,
                        candidate
                    );
                }
                return Ok(Arc::clone(cap));
            }
        }
        Err(not_found())
    }

    pub fn has_capability(&self, kind: SubjectKind, tag: &str, name: &str) -> bool {
        self.capability(kind, tag, name).is_ok()
    }

    /// `tag` followed by its ancestors, nearest first.
    pub fn chain(&self, kind: SubjectKind, tag: &str) -> Vec<String> {
        let mut chain = vec![tag.to_string()];
        let Some(table) = self.table(kind) else {
            return chain;
        };

        let mut current = tag;
        while let Some(parent) = table.parent(current) {
            // Registration rejects cycles; the length bound only guards
            // against a bug there.
            if chain.len() > table.parents.len() {
                break;
            }
            chain.push(parent.to_string());
            current = parent;
        }
        chain
    }

    /// Every known tag for `kind`, sorted.
    pub fn tags(&self, kind: SubjectKind) -> Vec<String> {
        self.table(kind)
            .map(|t| t.tags.iter().cloned().collect())
            .unwrap_or_default()
    }
}
