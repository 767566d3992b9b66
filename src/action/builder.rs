//! Declarative pipeline construction.
//!
//! A [`Builder`] is an ordered list of [`StageSpec`]s: stage factories,
//! references to named sequences, each optionally guarded by a predicate
//! over the [`BuildParams`]. [`Builder::build`] expands references,
//! evaluates guards and instantiates stages into a [`Runnable`], which is
//! immutable from then on.

use std::fmt;
use std::sync::Arc;

use anyhow::Result;

use super::stage::{Next, Stage};
use super::{ActionError, ActionRegistry, BuildParams, Environment};

/// Creates a stage from build-time parameters.
pub type StageFactory = Arc<dyn Fn(&BuildParams) -> Result<Arc<dyn Stage>> + Send + Sync>;

/// Decides at build time whether a spec is included.
pub type Guard = Arc<dyn Fn(&BuildParams) -> bool + Send + Sync>;

/// One entry of a [`Builder`].
#[derive(Clone)]
pub enum StageSpec {
    Stage {
        name: String,
        factory: StageFactory,
        guard: Option<Guard>,
    },
    Sequence {
        name: String,
        guard: Option<Guard>,
    },
}

impl StageSpec {
    /// A ready-made stage, shared by every pipeline built from this spec.
    pub fn stage(stage: impl Stage + 'static) -> Self {
        let stage: Arc<dyn Stage> = Arc::new(stage);
        StageSpec::Stage {
            name: stage.name().to_string(),
            factory: Arc::new(move |_: &BuildParams| -> Result<Arc<dyn Stage>> {
                Ok(Arc::clone(&stage))
            }),
            guard: None,
        }
    }

    /// A stage created per build from the parameters.
    pub fn factory<F>(name: impl Into<String>, factory: F) -> Self
    where
        F: Fn(&BuildParams) -> Result<Arc<dyn Stage>> + Send + Sync + 'static,
    {
        StageSpec::Stage {
            name: name.into(),
            factory: Arc::new(factory),
            guard: None,
        }
    }

    /// A reference to the named sequence, expanded at build time.
    pub fn sequence(name: impl Into<String>) -> Self {
        StageSpec::Sequence {
            name: name.into(),
            guard: None,
        }
    }

    /// Include this spec only when `guard` holds.
    pub fn when<G>(self, guard: G) -> Self
    where
        G: Fn(&BuildParams) -> bool + Send + Sync + 'static,
    {
        let guard: Option<Guard> = Some(Arc::new(guard));
        match self {
            StageSpec::Stage { name, factory, .. } => StageSpec::Stage {
                name,
                factory,
                guard,
            },
            StageSpec::Sequence { name, .. } => StageSpec::Sequence { name, guard },
        }
    }

    pub fn name(&self) -> &str {
        match self {
            StageSpec::Stage { name, .. } | StageSpec::Sequence { name, .. } => name,
        }
    }

    fn included(&self, params: &BuildParams) -> bool {
        let guard = match self {
            StageSpec::Stage { guard, .. } | StageSpec::Sequence { guard, .. } => guard,
        };
        guard.as_ref().map_or(true, |g| g(params))
    }
}

impl fmt::Debug for StageSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StageSpec::Stage { name, guard, .. } => f
                .debug_struct("Stage")
                .field("name", name)
                .field("guarded", &guard.is_some())
                .finish(),
            StageSpec::Sequence { name, guard } => f
                .debug_struct("Sequence")
                .field("name", name)
                .field("guarded", &guard.is_some())
                .finish(),
        }
    }
}

/// An editable list of stage specs.
#[derive(Debug, Clone, Default)]
pub struct Builder {
    specs: Vec<StageSpec>,
}

impl Builder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a spec.
    pub fn push(mut self, spec: StageSpec) -> Self {
        self.specs.push(spec);
        self
    }

    /// Append a ready-made stage.
    pub fn stage(self, stage: impl Stage + 'static) -> Self {
        self.push(StageSpec::stage(stage))
    }

    /// Append a stage created per build.
    pub fn stage_with<F>(self, name: impl Into<String>, factory: F) -> Self
    where
        F: Fn(&BuildParams) -> Result<Arc<dyn Stage>> + Send + Sync + 'static,
    {
        self.push(StageSpec::factory(name, factory))
    }

    /// Append a reference to a named sequence.
    pub fn sequence(self, name: impl Into<String>) -> Self {
        self.push(StageSpec::sequence(name))
    }

    /// Append a stage included only when `guard` holds.
    pub fn stage_if<G>(self, stage: impl Stage + 'static, guard: G) -> Self
    where
        G: Fn(&BuildParams) -> bool + Send + Sync + 'static,
    {
        self.push(StageSpec::stage(stage).when(guard))
    }

    /// Append a sequence reference included only when `guard` holds.
    pub fn sequence_if<G>(self, name: impl Into<String>, guard: G) -> Self
    where
        G: Fn(&BuildParams) -> bool + Send + Sync + 'static,
    {
        self.push(StageSpec::sequence(name).when(guard))
    }

    // ========================================================================
    // Editing
    // ========================================================================

    /// Position of the first spec called `name`.
    pub fn index_of(&self, name: &str) -> Option<usize> {
        self.specs.iter().position(|s| s.name() == name)
    }

    /// Insert `spec` at `index` (`len()` appends).
    pub fn insert(&mut self, index: usize, spec: StageSpec) -> Result<(), ActionError> {
        if index > self.specs.len() {
            return Err(ActionError::InvalidPosition {
                index,
                len: self.specs.len(),
            });
        }
        self.specs.insert(index, spec);
        Ok(())
    }

    /// Insert `spec` immediately before the first spec called `name`.
    pub fn insert_before(&mut self, name: &str, spec: StageSpec) -> Result<(), ActionError> {
        let index = self.require(name)?;
        self.specs.insert(index, spec);
        Ok(())
    }

    /// Insert `spec` immediately after the first spec called `name`.
    pub fn insert_after(&mut self, name: &str, spec: StageSpec) -> Result<(), ActionError> {
        let index = self.require(name)?;
        self.specs.insert(index + 1, spec);
        Ok(())
    }

    /// Replace the first spec called `name`.
    pub fn replace(&mut self, name: &str, spec: StageSpec) -> Result<(), ActionError> {
        let index = self.require(name)?;
        self.specs[index] = spec;
        Ok(())
    }

    /// Remove every spec called `name`.
    pub fn delete(&mut self, name: &str) -> Result<(), ActionError> {
        self.require(name)?;
        self.specs.retain(|s| s.name() != name);
        Ok(())
    }

    fn require(&self, name: &str) -> Result<usize, ActionError> {
        self.index_of(name).ok_or_else(|| ActionError::StageNotFound {
            name: name.to_string(),
        })
    }

    pub fn len(&self) -> usize {
        self.specs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.specs.is_empty()
    }

    pub fn specs(&self) -> &[StageSpec] {
        &self.specs
    }

    // ========================================================================
    // Building
    // ========================================================================

    /// Expand sequence references, drop guarded-off specs and instantiate
    /// every stage.
    pub fn build(&self, params: &BuildParams, sequences: &ActionRegistry) -> Result<Runnable> {
        let mut stages = Vec::new();
        let mut expanding = Vec::new();
        expand(&self.specs, params, sequences, &mut expanding, &mut stages)?;
        Ok(Runnable { stages })
    }
}

fn expand(
    specs: &[StageSpec],
    params: &BuildParams,
    sequences: &ActionRegistry,
    expanding: &mut Vec<String>,
    out: &mut Vec<Arc<dyn Stage>>,
) -> Result<()> {
    for spec in specs {
        if !spec.included(params) {
            tracing::debug!("Guard excluded `{}`", spec.name());
            continue;
        }

        match spec {
            StageSpec::Stage { factory, .. } => out.push(factory(params)?),
            StageSpec::Sequence { name, .. } => {
                if expanding.iter().any(|n| n == name) {
                    let mut chain = expanding.clone();
                    chain.push(name.clone());
                    return Err(ActionError::SequenceCycle { chain }.into());
                }
                let builder = sequences
                    .get(name)
                    .ok_or_else(|| ActionError::UnknownSequence { name: name.clone() })?;

                expanding.push(name.clone());
                expand(&builder.specs, params, sequences, expanding, out)?;
                expanding.pop();
            }
        }
    }
    Ok(())
}

/// A built, immutable pipeline.
#[derive(Clone, Default)]
pub struct Runnable {
    stages: Vec<Arc<dyn Stage>>,
}

impl Runnable {
    /// Run every stage.
    pub fn call(&self, env: &mut Environment) -> Result<()> {
        Next::new(&self.stages, None).run(env)
    }

    /// Run every stage, then continue with `next`.
    pub fn call_with_next(&self, env: &mut Environment, next: Next<'_>) -> Result<()> {
        Next::new(&self.stages, Some(next)).run(env)
    }

    /// Stage names in run order.
    pub fn names(&self) -> Vec<&str> {
        self.stages.iter().map(|s| s.name()).collect()
    }

    pub fn len(&self) -> usize {
        self.stages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.stages.is_empty()
    }
}

impl fmt::Debug for Runnable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list().entries(self.names()).finish()
    }
}
