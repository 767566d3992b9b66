//! Plugin registration.
//!
//! Plugins are the only way to extend the kernel. Each one receives a
//! [`Registrar`] once and declares capabilities, tag parents, detectors,
//! action sequences and hooks on it. [`PluginManager::load`] then freezes
//! everything into [`Components`], which is read-only from there on.

use std::sync::Arc;

use anyhow::{Context, Result};

use crate::action::{ActionRegistry, Builder, HookRegistry};
use crate::capability::{CapabilityRegistry, CapabilityRegistryBuilder};

/// A unit of extension.
pub trait Plugin: Send + Sync {
    /// Plugin name, used in logs and errors.
    fn name(&self) -> &str;

    /// Declare this plugin's contributions.
    fn register(&self, registrar: &mut Registrar) -> Result<()>;
}

/// Collects registrations during the load phase.
#[derive(Default)]
pub struct Registrar {
    capabilities: CapabilityRegistryBuilder,
    actions: ActionRegistry,
    hooks: HookRegistry,
}

impl Registrar {
    pub fn new() -> Self {
        Self::default()
    }

    /// Capability, parent and detector declarations.
    pub fn capabilities(&mut self) -> &mut CapabilityRegistryBuilder {
        &mut self.capabilities
    }

    /// Register the named action sequence `name`.
    pub fn action(&mut self, name: impl Into<String>, builder: Builder) -> &mut Self {
        self.actions.register(name, builder);
        self
    }

    /// Hooks applied to other plugins' actions.
    pub fn hooks(&mut self) -> &mut HookRegistry {
        &mut self.hooks
    }

    fn freeze(self) -> Components {
        Components {
            capabilities: Arc::new(self.capabilities.build()),
            actions: Arc::new(self.actions),
            hooks: self.hooks,
        }
    }
}

/// Everything the plugins registered, frozen.
pub struct Components {
    pub capabilities: Arc<CapabilityRegistry>,
    pub actions: Arc<ActionRegistry>,
    pub hooks: HookRegistry,
}

impl std::fmt::Debug for Components {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Components")
            .field("capabilities", &self.capabilities)
            .field("actions", &self.actions.names().collect::<Vec<_>>())
            .finish_non_exhaustive()
    }
}

impl Default for Components {
    fn default() -> Self {
        Components {
            capabilities: Arc::new(CapabilityRegistry::empty()),
            actions: Arc::new(ActionRegistry::new()),
            hooks: HookRegistry::new(),
        }
    }
}

/// Holds plugins until they are loaded.
#[derive(Default)]
pub struct PluginManager {
    plugins: Vec<Box<dyn Plugin>>,
}

impl PluginManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue `plugin`. Plugins register in the order they were added.
    pub fn add(&mut self, plugin: impl Plugin + 'static) -> &mut Self {
        self.plugins.push(Box::new(plugin));
        self
    }

    /// Names of the queued plugins.
    pub fn names(&self) -> Vec<&str> {
        self.plugins.iter().map(|p| p.name()).collect()
    }

    /// Run every plugin's registration and freeze the result.
    pub fn load(self) -> Result<Components> {
        let mut registrar = Registrar::new();
        for plugin in &self.plugins {
            tracing::debug!("Loading plugin {}", plugin.name());
            plugin
                .register(&mut registrar)
                .with_context(|| format!("plugin `{}` failed to register", plugin.name()))?;
        }
        Ok(registrar.freeze())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::action::{BuildParams, Runner, StageSpec};
    use crate::capability::{CapabilityError, SubjectKind};
    use crate::test_support::{test_env, Recorder};
    use std::sync::Mutex;

    struct Core {
        log: Arc<Mutex<Vec<String>>>,
    }

    impl Plugin for Core {
        fn name(&self) -> &str {
            "core"
        }

        fn register(&self, registrar: &mut Registrar) -> Result<()> {
            registrar.action("up", Builder::new().stage(Recorder::new("boot", &self.log)));
            registrar
                .capabilities()
                .register_parent(SubjectKind::Guest, "ubuntu", "debian")?;
            Ok(())
        }
    }

    struct Audit {
        log: Arc<Mutex<Vec<String>>>,
    }

    impl Plugin for Audit {
        fn name(&self) -> &str {
            "audit"
        }

        fn register(&self, registrar: &mut Registrar) -> Result<()> {
            registrar
                .hooks()
                .hook("up")
                .prepend(StageSpec::stage(Recorder::new("audit", &self.log)));
            Ok(())
        }
    }

    struct Conflicting;

    impl Plugin for Conflicting {
        fn name(&self) -> &str {
            "conflicting"
        }

        fn register(&self, registrar: &mut Registrar) -> Result<()> {
            registrar
                .capabilities()
                .register_parent(SubjectKind::Guest, "ubuntu", "linux")?;
            Ok(())
        }
    }

    #[test]
    fn test_load_merges_plugins() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let mut manager = PluginManager::new();
        manager
            .add(Core { log: Arc::clone(&log) })
            .add(Audit { log: Arc::clone(&log) });
        assert_eq!(manager.names(), vec!["core", "audit"]);

        let components = Arc::new(manager.load().unwrap());
        assert_eq!(
            components.capabilities.chain(SubjectKind::Guest, "ubuntu"),
            vec!["ubuntu", "debian"]
        );

        Runner::new(components)
            .run("up", BuildParams::new(), &mut test_env())
            .unwrap();
        assert_eq!(
            *log.lock().unwrap(),
            vec!["enter audit", "enter boot", "exit boot", "exit audit"]
        );
    }

    #[test]
    fn test_registration_error_names_plugin() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let mut manager = PluginManager::new();
        manager.add(Core { log }).add(Conflicting);

        let err = manager.load().unwrap_err();
        assert_eq!(err.to_string(), "plugin `conflicting` failed to register");
        assert!(matches!(
            err.root_cause().downcast_ref::<CapabilityError>(),
            Some(CapabilityError::ConflictingParent { .. })
        ));
    }
}
