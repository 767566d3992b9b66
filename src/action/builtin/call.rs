use std::sync::Arc;

use anyhow::Result;

use crate::action::{Builder, Environment, Next, Stage};

type Select = Arc<dyn Fn(&Environment) -> Option<Builder> + Send + Sync>;

/// Splices a sub-chain chosen at run time.
///
/// The selector looks at the environment and returns a builder (or
/// nothing). The builder is built with the running pipeline's parameters
/// and sequences, and run with the rest of the outer chain as its tail, so
/// the outer stages still run afterwards and unwind in order.
pub struct Call {
    name: String,
    select: Select,
}

impl Call {
    pub fn new<F>(name: impl Into<String>, select: F) -> Self
    where
        F: Fn(&Environment) -> Option<Builder> + Send + Sync + 'static,
    {
        Call {
            name: name.into(),
            select: Arc::new(select),
        }
    }

    /// Splice `builder` only when `predicate` holds.
    pub fn when<P>(name: impl Into<String>, predicate: P, builder: Builder) -> Self
    where
        P: Fn(&Environment) -> bool + Send + Sync + 'static,
    {
        Call::new(name, move |env| predicate(env).then(|| builder.clone()))
    }
}

impl Stage for Call {
    fn name(&self) -> &str {
        &self.name
    }

    fn call(&self, env: &mut Environment, next: Next<'_>) -> Result<()> {
        let Some(builder) = (self.select)(env) else {
            return next.run(env);
        };

        let runnable = builder.build(env.params(), env.sequences())?;
        tracing::debug!("{} splicing {:?}", self.name, runnable.names());
        runnable.call_with_next(env, next)
    }
}
