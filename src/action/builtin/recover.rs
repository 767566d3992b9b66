use std::sync::Arc;

use anyhow::Result;

use crate::action::{ActionError, Environment, Next, Stage};

type Matcher = Arc<dyn Fn(&anyhow::Error) -> bool + Send + Sync>;

/// Turns matching failures from the rest of the chain into warnings.
///
/// Interruptions are never recovered.
pub struct Recover {
    name: String,
    matches: Matcher,
}

impl Recover {
    pub fn new<F>(name: impl Into<String>, matches: F) -> Self
    where
        F: Fn(&anyhow::Error) -> bool + Send + Sync + 'static,
    {
        Recover {
            name: name.into(),
            matches: Arc::new(matches),
        }
    }

    /// Recover failures whose chain contains an error of type `E`.
    pub fn on<E>(name: impl Into<String>) -> Self
    where
        E: std::error::Error + Send + Sync + 'static,
    {
        Recover::new(name, |err| err.chain().any(|e| e.is::<E>()))
    }
}

impl Stage for Recover {
    fn name(&self) -> &str {
        &self.name
    }

    fn call(&self, env: &mut Environment, next: Next<'_>) -> Result<()> {
        match next.run(env) {
            Err(e) if !ActionError::is_interrupt(&e) && (self.matches)(&e) => {
                tracing::warn!("{} recovered: {:#}", self.name, e);
                env.ui().warn(format!("{:#}", e));
                Ok(())
            }
            other => other,
        }
    }
}
