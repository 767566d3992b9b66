//! Stages and the cursor that drives them.

use std::sync::Arc;

use anyhow::Result;

use super::Environment;

/// One link in a pipeline.
///
/// A stage may run code before calling `next`, skip `next` to halt the
/// chain, and run code after `next` returns. Post code runs in reverse
/// order of entry because each stage's frame encloses the rest of the
/// chain.
pub trait Stage: Send + Sync {
    fn name(&self) -> &str;

    fn call(&self, env: &mut Environment, next: Next<'_>) -> Result<()>;
}

/// The remainder of a chain.
///
/// A spliced sub-chain keeps the outer remainder as its tail, so the outer
/// stages run after the spliced ones and still unwind in order.
pub struct Next<'a> {
    stages: &'a [Arc<dyn Stage>],
    tail: Option<Box<Next<'a>>>,
}

impl<'a> Next<'a> {
    pub(crate) fn new(stages: &'a [Arc<dyn Stage>], tail: Option<Next<'a>>) -> Self {
        Next {
            stages,
            tail: tail.map(Box::new),
        }
    }

    /// A remainder with nothing in it.
    pub fn empty() -> Next<'static> {
        Next {
            stages: &[],
            tail: None,
        }
    }

    /// Run the rest of the chain.
    ///
    /// Fails with [`ActionError::Interrupted`](super::ActionError::Interrupted)
    /// before entering a stage if cancellation was requested.
    pub fn run(self, env: &mut Environment) -> Result<()> {
        match self.stages.split_first() {
            Some((stage, rest)) => {
                env.check_interrupt()?;

                let span = tracing::debug_span!("stage", name = stage.name());
                let _enter = span.enter();
                tracing::debug!("enter");

                let result = stage.call(
                    env,
                    Next {
                        stages: rest,
                        tail: self.tail,
                    },
                );

                match &result {
                    Ok(()) => tracing::debug!("exit"),
                    Err(e) => tracing::debug!("exit with error: {:#}", e),
                }
                result
            }
            None => match self.tail {
                Some(tail) => tail.run(env),
                None => Ok(()),
            },
        }
    }

    /// Whether nothing remains.
    pub fn is_empty(&self) -> bool {
        self.stages.is_empty() && self.tail.as_ref().map_or(true, |t| t.is_empty())
    }
}

/// A stage built from a closure.
///
/// The closure runs first; the rest of the chain only runs if the
/// environment's error indicator is still unset afterwards.
pub struct FnStage<F> {
    name: String,
    f: F,
}

impl<F> Stage for FnStage<F>
where
    F: Fn(&mut Environment) -> Result<()> + Send + Sync,
{
    fn name(&self) -> &str {
        &self.name
    }

    fn call(&self, env: &mut Environment, next: Next<'_>) -> Result<()> {
        (self.f)(env)?;
        if env.has_error() {
            tracing::debug!("{} halted the chain", self.name);
            return Ok(());
        }
        next.run(env)
    }
}

/// Wrap a closure as a stage. See [`FnStage`].
pub fn fn_stage<F>(name: impl Into<String>, f: F) -> FnStage<F>
where
    F: Fn(&mut Environment) -> Result<()> + Send + Sync,
{
    FnStage {
        name: name.into(),
        f,
    }
}
