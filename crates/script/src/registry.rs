//! Interpreter registry.
//!
//! Interpreters register by name. The name `default` is an alias for a
//! configurable interpreter. A process-wide instance is available through
//! [`global`], with [`init`] and [`teardown`] bracketing its lifetime.

use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::{Arc, OnceLock};
use tracing::{debug, info};

use crate::builtin::{ShellInterpreter, SimpleInterpreter};
use crate::r#trait::{Interpreter, Result, Script, ScriptError};

/// Alias resolving to the configured default interpreter.
pub const DEFAULT_ALIAS: &str = "default";

struct RegistryInner {
    interpreters: HashMap<String, Arc<dyn Interpreter>>,
    default: String,
}

/// Registry of script interpreters.
pub struct InterpreterRegistry {
    inner: RwLock<RegistryInner>,
}

impl InterpreterRegistry {
    /// Create an empty registry whose default is `simple`.
    pub fn new() -> Self {
        Self {
            inner: RwLock::new(RegistryInner {
                interpreters: HashMap::new(),
                default: SimpleInterpreter::NAME.to_string(),
            }),
        }
    }

    /// Create a registry with the built-in interpreters registered.
    pub fn with_builtins() -> Self {
        let registry = Self::new();
        registry.register_builtins();
        registry
    }

    /// Register the built-in interpreters that are not registered yet.
    pub fn register_builtins(&self) {
        let builtins: [Arc<dyn Interpreter>; 2] =
            [Arc::new(SimpleInterpreter::new()), Arc::new(ShellInterpreter)];
        let mut inner = self.inner.write();
        for interp in builtins {
            inner
                .interpreters
                .entry(interp.name().to_string())
                .or_insert(interp);
        }
    }

    /// Register an interpreter.
    pub fn register(&self, interpreter: Arc<dyn Interpreter>) -> Result<()> {
        let name = interpreter.name().to_string();
        if name == DEFAULT_ALIAS {
            return Err(ScriptError::InterpreterExists(name));
        }

        let mut inner = self.inner.write();
        if inner.interpreters.contains_key(&name) {
            return Err(ScriptError::InterpreterExists(name));
        }
        info!("registered script interpreter '{}'", name);
        inner.interpreters.insert(name, interpreter);
        Ok(())
    }

    /// Unregister an interpreter by name.
    ///
    /// Scripts already created keep their interpreter alive.
    pub fn unregister(&self, name: &str) -> Option<Arc<dyn Interpreter>> {
        let removed = self.inner.write().interpreters.remove(name);
        if removed.is_some() {
            info!("unregistered script interpreter '{}'", name);
        }
        removed
    }

    /// Look up an interpreter, resolving the `default` alias.
    pub fn lookup(&self, name: &str) -> Option<Arc<dyn Interpreter>> {
        let inner = self.inner.read();
        let name = if name == DEFAULT_ALIAS {
            inner.default.as_str()
        } else {
            name
        };
        inner.interpreters.get(name).cloned()
    }

    /// Set the interpreter the `default` alias resolves to.
    pub fn set_default(&self, name: &str) {
        debug!("default script interpreter set to '{}'", name);
        self.inner.write().default = name.to_string();
    }

    /// Name the `default` alias currently resolves to.
    pub fn default_name(&self) -> String {
        self.inner.read().default.clone()
    }

    /// Names of all registered interpreters, sorted.
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<_> = self.inner.read().interpreters.keys().cloned().collect();
        names.sort();
        names
    }

    /// Create a script of the given type.
    pub fn create_script(&self, script_type: &str, source: &str) -> Result<Script> {
        let interpreter = self
            .lookup(script_type)
            .ok_or_else(|| ScriptError::UnknownInterpreter(script_type.to_string()))?;
        Ok(Script::new(interpreter, source))
    }

    /// Remove every interpreter.
    pub fn clear(&self) {
        self.inner.write().interpreters.clear();
    }
}

impl Default for InterpreterRegistry {
    fn default() -> Self {
        Self::new()
    }
}

static GLOBAL: OnceLock<Arc<InterpreterRegistry>> = OnceLock::new();

/// The process-wide registry.
pub fn global() -> Arc<InterpreterRegistry> {
    GLOBAL.get_or_init(|| Arc::new(InterpreterRegistry::new())).clone()
}

/// Initialize the process-wide registry with the built-in interpreters.
pub fn init() -> Arc<InterpreterRegistry> {
    let registry = global();
    registry.register_builtins();
    registry
}

/// Tear down the process-wide registry.
pub fn teardown() {
    if let Some(registry) = GLOBAL.get() {
        registry.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::r#trait::{CompiledScript, ScriptEnv, ScriptStatus};
    use polres_core::{Classify, ErrorClass};

    struct Named(&'static str);

    impl Interpreter for Named {
        fn name(&self) -> &str {
            self.0
        }

        fn compile(&self, _source: &str) -> Result<CompiledScript> {
            Ok(CompiledScript::new(()))
        }

        fn execute(&self, _script: &CompiledScript, _env: &mut ScriptEnv<'_>) -> ScriptStatus {
            ScriptStatus::Success
        }
    }

    #[test]
    fn test_register_and_lookup() {
        let registry = InterpreterRegistry::new();
        registry.register(Arc::new(Named("lua"))).unwrap();

        assert_eq!(registry.lookup("lua").unwrap().name(), "lua");
        assert!(registry.lookup("python").is_none());
        assert_eq!(registry.names(), vec!["lua".to_string()]);
    }

    #[test]
    fn test_duplicate_registration() {
        let registry = InterpreterRegistry::new();
        registry.register(Arc::new(Named("lua"))).unwrap();
        let err = registry.register(Arc::new(Named("lua"))).unwrap_err();
        assert_eq!(err.class(), ErrorClass::Exists);
        assert!(registry.register(Arc::new(Named("default"))).is_err());
    }

    #[test]
    fn test_default_alias() {
        let registry = InterpreterRegistry::with_builtins();
        assert_eq!(registry.lookup(DEFAULT_ALIAS).unwrap().name(), "simple");

        registry.set_default("shell");
        assert_eq!(registry.lookup(DEFAULT_ALIAS).unwrap().name(), "shell");

        registry.set_default("missing");
        assert!(registry.lookup(DEFAULT_ALIAS).is_none());
    }

    #[test]
    fn test_unregister() {
        let registry = InterpreterRegistry::new();
        registry.register(Arc::new(Named("lua"))).unwrap();
        assert!(registry.unregister("lua").is_some());
        assert!(registry.unregister("lua").is_none());
        assert!(registry.lookup("lua").is_none());
    }

    #[test]
    fn test_create_script_unknown_type() {
        let registry = InterpreterRegistry::with_builtins();
        let err = registry.create_script("cobol", "x").unwrap_err();
        assert_eq!(err.class(), ErrorClass::NotFound);

        let script = registry.create_script("default", "noop()").unwrap();
        assert_eq!(script.interpreter_name(), "simple");
    }

    #[test]
    fn test_global_init() {
        let registry = init();
        assert!(registry.lookup("simple").is_some());
        assert!(registry.lookup("shell").is_some());
        assert!(Arc::ptr_eq(&registry, &global()));
    }
}
