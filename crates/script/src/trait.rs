//! Interpreter abstraction.

use polres_core::{Classify, ErrorClass, ScriptValue};
use polres_storage::FactStore;
use std::any::Any;
use std::sync::Arc;

/// Error type for script operations.
pub type Result<T> = std::result::Result<T, ScriptError>;

/// Errors from the script subsystem.
#[derive(Debug, thiserror::Error)]
pub enum ScriptError {
    /// No interpreter registered under that name
    #[error("unknown script type '{0}'")]
    UnknownInterpreter(String),

    /// An interpreter with that name is already registered
    #[error("interpreter '{0}' already registered")]
    InterpreterExists(String),

    /// The source did not compile
    #[error("{interpreter}: compilation failed: {message}")]
    Compile {
        /// Interpreter name
        interpreter: String,
        /// What went wrong
        message: String,
    },

    /// The script has neither source nor compiled form
    #[error("script has nothing to compile")]
    NoSource,
}

impl Classify for ScriptError {
    fn class(&self) -> ErrorClass {
        match self {
            ScriptError::UnknownInterpreter(_) => ErrorClass::NotFound,
            ScriptError::InterpreterExists(_) => ErrorClass::Exists,
            ScriptError::Compile { .. } | ScriptError::NoSource => ErrorClass::Invalid,
        }
    }
}

/// Outcome of executing a script.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScriptStatus {
    /// The script ran and did its work
    Success,
    /// The script ran but had nothing to do
    NoOp,
    /// The script failed with a negative status code
    Failure(i32),
}

impl ScriptStatus {
    /// Map a raw status code: >0 success, 0 no-op, <0 failure.
    pub fn from_code(code: i32) -> Self {
        match code {
            c if c > 0 => ScriptStatus::Success,
            0 => ScriptStatus::NoOp,
            c => ScriptStatus::Failure(c),
        }
    }

    /// Raw status code.
    pub fn code(&self) -> i32 {
        match self {
            ScriptStatus::Success => 1,
            ScriptStatus::NoOp => 0,
            ScriptStatus::Failure(c) => *c,
        }
    }

    /// Whether the script failed.
    pub fn is_failure(&self) -> bool {
        matches!(self, ScriptStatus::Failure(_))
    }
}

/// Read access to the variables bound for the running resolution.
pub trait VariableScope {
    /// Look up the innermost binding of a variable by name.
    fn lookup(&self, name: &str) -> Option<ScriptValue>;

    /// All visible bindings, inner frames shadowing outer ones.
    fn bindings(&self) -> Vec<(String, ScriptValue)>;
}

/// Scope with no variables.
pub struct EmptyScope;

impl VariableScope for EmptyScope {
    fn lookup(&self, _name: &str) -> Option<ScriptValue> {
        None
    }

    fn bindings(&self) -> Vec<(String, ScriptValue)> {
        Vec::new()
    }
}

/// Everything a script can see while it runs.
pub struct ScriptEnv<'a> {
    /// Target being updated
    pub target: &'a str,

    /// Context variables
    pub scope: &'a dyn VariableScope,

    /// Fact store, inside the resolver's transaction
    pub store: &'a dyn FactStore,

    /// Lines of output produced by the script
    pub output: &'a mut Vec<String>,
}

/// Interpreter-specific compiled form of a script.
pub struct CompiledScript(Box<dyn Any>);

impl CompiledScript {
    /// Wrap an interpreter-specific value.
    pub fn new<T: Any>(value: T) -> Self {
        Self(Box::new(value))
    }

    /// Borrow the wrapped value as `T`.
    pub fn downcast_ref<T: Any>(&self) -> Option<&T> {
        self.0.downcast_ref()
    }
}

impl std::fmt::Debug for CompiledScript {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("CompiledScript(..)")
    }
}

/// A script interpreter.
pub trait Interpreter: Send + Sync {
    /// Interpreter name, used as the script type.
    fn name(&self) -> &str;

    /// Compile source into an executable form.
    fn compile(&self, source: &str) -> Result<CompiledScript>;

    /// Execute a compiled script.
    fn execute(&self, script: &CompiledScript, env: &mut ScriptEnv<'_>) -> ScriptStatus;

    /// Release a compiled script.
    fn cleanup(&self, script: CompiledScript) {
        drop(script);
    }
}

/// A script handle bound to its interpreter.
pub struct Script {
    interpreter: Arc<dyn Interpreter>,
    source: Option<String>,
    compiled: Option<CompiledScript>,
    precompiled: bool,
}

impl Script {
    /// Create an uncompiled script.
    pub fn new(interpreter: Arc<dyn Interpreter>, source: impl Into<String>) -> Self {
        Self {
            interpreter,
            source: Some(source.into()),
            compiled: None,
            precompiled: false,
        }
    }

    /// Wrap an externally compiled script.
    pub fn precompiled(interpreter: Arc<dyn Interpreter>, compiled: CompiledScript) -> Self {
        Self {
            interpreter,
            source: None,
            compiled: Some(compiled),
            precompiled: true,
        }
    }

    /// Name of the interpreter.
    pub fn interpreter_name(&self) -> &str {
        self.interpreter.name()
    }

    /// Source text, if the script was not supplied precompiled.
    pub fn source(&self) -> Option<&str> {
        self.source.as_deref()
    }

    /// Whether the script was supplied already compiled.
    pub fn is_precompiled(&self) -> bool {
        self.precompiled
    }

    /// Whether the script is ready to execute.
    pub fn is_compiled(&self) -> bool {
        self.compiled.is_some()
    }

    /// Compile the script. A compiled script is left alone.
    pub fn compile(&mut self) -> Result<()> {
        if self.compiled.is_some() {
            return Ok(());
        }
        let source = self.source.as_deref().ok_or(ScriptError::NoSource)?;
        self.compiled = Some(self.interpreter.compile(source)?);
        Ok(())
    }

    /// Execute the script, compiling it first if needed.
    pub fn execute(&mut self, env: &mut ScriptEnv<'_>) -> Result<ScriptStatus> {
        self.compile()?;
        match &self.compiled {
            Some(compiled) => Ok(self.interpreter.execute(compiled, env)),
            None => Err(ScriptError::NoSource),
        }
    }
}

impl Drop for Script {
    fn drop(&mut self) {
        if let Some(compiled) = self.compiled.take() {
            self.interpreter.cleanup(compiled);
        }
    }
}

impl std::fmt::Debug for Script {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Script")
            .field("interpreter", &self.interpreter.name())
            .field("source", &self.source)
            .field("compiled", &self.compiled.is_some())
            .field("precompiled", &self.precompiled)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use polres_storage::MemoryStore;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct Counting {
        compiles: AtomicUsize,
        cleanups: AtomicUsize,
    }

    impl Interpreter for Counting {
        fn name(&self) -> &str {
            "counting"
        }

        fn compile(&self, source: &str) -> Result<CompiledScript> {
            self.compiles.fetch_add(1, Ordering::SeqCst);
            let code: i32 = source.trim().parse().map_err(|_| ScriptError::Compile {
                interpreter: "counting".into(),
                message: format!("not a number: {}", source),
            })?;
            Ok(CompiledScript::new(code))
        }

        fn execute(&self, script: &CompiledScript, _env: &mut ScriptEnv<'_>) -> ScriptStatus {
            ScriptStatus::from_code(*script.downcast_ref::<i32>().unwrap_or(&-1))
        }

        fn cleanup(&self, script: CompiledScript) {
            self.cleanups.fetch_add(1, Ordering::SeqCst);
            drop(script);
        }
    }

    fn counting() -> Arc<Counting> {
        Arc::new(Counting {
            compiles: AtomicUsize::new(0),
            cleanups: AtomicUsize::new(0),
        })
    }

    #[test]
    fn test_status_codes() {
        assert_eq!(ScriptStatus::from_code(5), ScriptStatus::Success);
        assert_eq!(ScriptStatus::from_code(0), ScriptStatus::NoOp);
        assert_eq!(ScriptStatus::from_code(-2), ScriptStatus::Failure(-2));
        assert_eq!(ScriptStatus::Failure(-2).code(), -2);
        assert!(!ScriptStatus::NoOp.is_failure());
    }

    #[test]
    fn test_compile_once_and_cleanup_on_drop() {
        let interp = counting();
        let store = MemoryStore::new();
        let mut output = Vec::new();

        {
            let mut script = Script::new(interp.clone(), "3");
            script.compile().unwrap();
            script.compile().unwrap();
            let mut env = ScriptEnv {
                target: "t",
                scope: &EmptyScope,
                store: &store,
                output: &mut output,
            };
            assert_eq!(script.execute(&mut env).unwrap(), ScriptStatus::Success);
        }

        assert_eq!(interp.compiles.load(Ordering::SeqCst), 1);
        assert_eq!(interp.cleanups.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_precompiled_script() {
        let interp = counting();
        let store = MemoryStore::new();
        let mut output = Vec::new();
        let mut script = Script::precompiled(interp.clone(), CompiledScript::new(-4i32));
        assert!(script.is_precompiled());
        assert!(script.source().is_none());

        let mut env = ScriptEnv {
            target: "t",
            scope: &EmptyScope,
            store: &store,
            output: &mut output,
        };
        assert_eq!(script.execute(&mut env).unwrap(), ScriptStatus::Failure(-4));
        assert_eq!(interp.compiles.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_compile_error() {
        let mut script = Script::new(counting(), "nope");
        let err = script.compile().unwrap_err();
        assert_eq!(err.class(), ErrorClass::Invalid);
    }
}
