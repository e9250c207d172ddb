//! Script interpreters for polres targets.
//!
//! Targets carry a script that runs when the target is updated. Scripts
//! are compiled by an [`Interpreter`] looked up by name in an
//! [`InterpreterRegistry`].

#![warn(missing_docs)]

pub mod r#trait;
pub mod registry;
pub mod builtin;

pub use r#trait::{
    CompiledScript, EmptyScope, Interpreter, Result, Script, ScriptEnv, ScriptError, ScriptStatus,
    VariableScope,
};
pub use registry::{global, init, teardown, InterpreterRegistry, DEFAULT_ALIAS};
pub use builtin::{ShellInterpreter, SimpleInterpreter};
