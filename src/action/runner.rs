//! Running named actions.

use std::sync::Arc;
use std::time::Instant;

use anyhow::Result;

use super::{ActionError, BuildParams, Builder, Environment};
use crate::plugin::Components;

/// Builds and runs actions from the frozen plugin components.
#[derive(Debug, Clone)]
pub struct Runner {
    components: Arc<Components>,
}

impl Runner {
    pub fn new(components: Arc<Components>) -> Self {
        Runner { components }
    }

    pub fn components(&self) -> &Arc<Components> {
        &self.components
    }

    /// The builder for `action` with every applicable hook applied.
    pub fn builder(&self, action: &str) -> Result<Builder> {
        let mut builder = self
            .components
            .actions
            .get(action)
            .cloned()
            .ok_or_else(|| ActionError::UnknownSequence {
                name: action.to_string(),
            })?;
        self.components.hooks.apply(action, &mut builder);
        Ok(builder)
    }

    /// Build `action` with `params` and run it in `env`.
    pub fn run(&self, action: &str, params: BuildParams, env: &mut Environment) -> Result<()> {
        let runnable = self
            .builder(action)?
            .build(&params, &self.components.actions)?;

        let span = tracing::info_span!("action", name = action);
        let _enter = span.enter();
        tracing::debug!("Running {} stages: {:?}", runnable.len(), runnable.names());

        env.bind(Arc::clone(&self.components.actions), params);
        let started = Instant::now();
        let result = runnable.call(env);

        match &result {
            Ok(()) => tracing::info!("Action `{}` finished in {:.2?}", action, started.elapsed()),
            Err(e) => tracing::warn!("Action `{}` failed: {:#}", action, e),
        }
        result
    }
}
