//! Per-invocation state shared by every stage of a pipeline.

use std::any::Any;
use std::collections::BTreeMap;
use std::sync::Arc;

use anyhow::Result;
use serde_json::Value;

use super::{ActionError, ActionRegistry};
use crate::util::config::Config;
use crate::util::interrupt::Interrupt;
use crate::util::shell::Shell;

/// Values available to factories and guards when a pipeline is built.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct BuildParams {
    values: BTreeMap<String, Value>,
}

impl BuildParams {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.set(key, value);
        self
    }

    pub fn set(&mut self, key: impl Into<String>, value: impl Into<Value>) {
        self.values.insert(key.into(), value.into());
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.values.get(key)
    }

    /// `true` only when `key` holds the boolean `true`.
    pub fn flag(&self, key: &str) -> bool {
        matches!(self.values.get(key), Some(Value::Bool(true)))
    }

    pub fn str(&self, key: &str) -> Option<&str> {
        self.values.get(key).and_then(Value::as_str)
    }
}

/// The mutable bag threaded through one pipeline run.
///
/// Keys map to values of any `'static` type. Once a stage records an error
/// with [`Environment::set_error`], later stages are expected to leave
/// domain state alone and let the chain unwind.
pub struct Environment {
    values: BTreeMap<String, Box<dyn Any + Send + Sync>>,
    error: Option<anyhow::Error>,
    ui: Arc<Shell>,
    config: Arc<Config>,
    interrupt: Interrupt,
    sequences: Arc<ActionRegistry>,
    params: BuildParams,
}

impl std::fmt::Debug for Environment {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Environment")
            .field("keys", &self.values.keys().collect::<Vec<_>>())
            .field("error", &self.error)
            .field("params", &self.params)
            .finish()
    }
}

impl Environment {
    pub fn new(ui: Arc<Shell>, config: Arc<Config>) -> Self {
        Environment {
            values: BTreeMap::new(),
            error: None,
            ui,
            config,
            interrupt: Interrupt::new(),
            sequences: Arc::new(ActionRegistry::new()),
            params: BuildParams::new(),
        }
    }

    pub fn with_interrupt(mut self, interrupt: Interrupt) -> Self {
        self.interrupt = interrupt;
        self
    }

    /// Attach the sequences and parameters the running pipeline was built
    /// from, so stages can build nested pipelines.
    pub fn bind(&mut self, sequences: Arc<ActionRegistry>, params: BuildParams) {
        self.sequences = sequences;
        self.params = params;
    }

    // ========================================================================
    // Keyed values
    // ========================================================================

    pub fn insert<T: Any + Send + Sync>(&mut self, key: impl Into<String>, value: T) {
        self.values.insert(key.into(), Box::new(value));
    }

    /// The value at `key`, if present and of type `T`.
    pub fn get<T: Any>(&self, key: &str) -> Option<&T> {
        self.values.get(key).and_then(|v| v.downcast_ref::<T>())
    }

    pub fn get_mut<T: Any>(&mut self, key: &str) -> Option<&mut T> {
        self.values.get_mut(key).and_then(|v| v.downcast_mut::<T>())
    }

    /// Like [`get`](Self::get), but a missing value is an error.
    pub fn require<T: Any>(&self, key: &str) -> Result<&T> {
        self.get::<T>(key).ok_or_else(|| {
            ActionError::MissingValue {
                key: key.to_string(),
                type_name: std::any::type_name::<T>(),
            }
            .into()
        })
    }

    /// Remove and return the value at `key`. A value of another type is
    /// left in place.
    pub fn remove<T: Any>(&mut self, key: &str) -> Option<T> {
        if self.get::<T>(key).is_none() {
            return None;
        }
        self.values
            .remove(key)
            .and_then(|v| v.downcast::<T>().ok())
            .map(|v| *v)
    }

    pub fn contains(&self, key: &str) -> bool {
        self.values.contains_key(key)
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.values.keys().map(String::as_str)
    }

    // ========================================================================
    // Error indicator
    // ========================================================================

    pub fn set_error(&mut self, error: anyhow::Error) {
        tracing::debug!("Error indicator set: {:#}", error);
        self.error = Some(error);
    }

    pub fn has_error(&self) -> bool {
        self.error.is_some()
    }

    pub fn error(&self) -> Option<&anyhow::Error> {
        self.error.as_ref()
    }

    pub fn take_error(&mut self) -> Option<anyhow::Error> {
        self.error.take()
    }

    // ========================================================================
    // Shared collaborators
    // ========================================================================

    pub fn ui(&self) -> &Arc<Shell> {
        &self.ui
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn interrupt(&self) -> &Interrupt {
        &self.interrupt
    }

    /// Fail with [`ActionError::Interrupted`] if cancellation was requested.
    pub fn check_interrupt(&self) -> Result<()> {
        if self.interrupt.is_set() {
            return Err(ActionError::Interrupted.into());
        }
        Ok(())
    }

    pub fn sequences(&self) -> &ActionRegistry {
        &self.sequences
    }

    pub fn params(&self) -> &BuildParams {
        &self.params
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::test_env;

    #[test]
    fn test_typed_values() {
        let mut env = test_env();
        env.insert("count", 3u32);
        env.insert("name", String::from("web"));

        assert_eq!(env.get::<u32>("count"), Some(&3));
        assert_eq!(env.get::<String>("count"), None);
        assert!(env.contains("name"));

        *env.get_mut::<u32>("count").unwrap() += 1;
        assert_eq!(env.remove::<String>("count"), None);
        assert_eq!(env.remove::<u32>("count"), Some(4));
        assert!(!env.contains("count"));
        assert_eq!(env.keys().collect::<Vec<_>>(), vec!["name"]);
    }

    #[test]
    fn test_require_reports_key() {
        let env = test_env();
        let err = env.require::<u32>("box_name").unwrap_err();
        assert!(err.to_string().contains("box_name"));
    }

    #[test]
    fn test_error_indicator() {
        let mut env = test_env();
        assert!(!env.has_error());

        env.set_error(anyhow::anyhow!("provider refused"));
        assert!(env.has_error());
        assert_eq!(env.error().unwrap().to_string(), "provider refused");

        assert!(env.take_error().is_some());
        assert!(!env.has_error());
    }

    #[test]
    fn test_interrupt_check() {
        let interrupt = Interrupt::new();
        let env = test_env().with_interrupt(interrupt.clone());
        assert!(env.check_interrupt().is_ok());

        interrupt.trigger();
        let err = env.check_interrupt().unwrap_err();
        assert!(matches!(
            err.downcast_ref::<ActionError>(),
            Some(ActionError::Interrupted)
        ));
    }

    #[test]
    fn test_build_params() {
        let params = BuildParams::new().with("force", true).with("name", "base");
        assert!(params.flag("force"));
        assert!(!params.flag("name"));
        assert_eq!(params.str("name"), Some("base"));
        assert!(params.get("missing").is_none());
    }
}
