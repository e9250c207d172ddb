//! Error types for the resolver.

use polres_core::{Classify, DefinitionError, ErrorClass, ScriptType, TargetId, VarId};
use polres_script::ScriptError;
use polres_storage::StoreError;

/// Result type for resolver operations.
pub type Result<T> = std::result::Result<T, ResolverError>;

/// Errors from the context variable table.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ContextError {
    /// The variable is already declared with another concrete type
    #[error("variable '{name}' already declared as {existing}, not {requested}")]
    TypeConflict {
        /// Variable name
        name: String,
        /// Declared type
        existing: ScriptType,
        /// Type asked for
        requested: ScriptType,
    },

    /// No variable with that name
    #[error("unknown variable '{0}'")]
    UnknownName(String),

    /// No variable with that id
    #[error("unknown variable id {0}")]
    UnknownId(VarId),

    /// Value does not match the declared type
    #[error("variable '{name}' is {expected}, got {got}")]
    TypeMismatch {
        /// Variable name
        name: String,
        /// Declared type
        expected: ScriptType,
        /// Type of the supplied value
        got: ScriptType,
    },

    /// Variable is declared but not bound in any open frame
    #[error("variable '{0}' is not set")]
    Unset(String),

    /// Setting a value needs an open frame
    #[error("no open context frame")]
    NoFrame,

    /// Pop without a matching push
    #[error("no context frame to pop")]
    NothingToPop,
}

impl Classify for ContextError {
    fn class(&self) -> ErrorClass {
        match self {
            ContextError::TypeConflict { .. } => ErrorClass::Exists,
            ContextError::UnknownName(_)
            | ContextError::UnknownId(_)
            | ContextError::Unset(_)
            | ContextError::NothingToPop => ErrorClass::NotFound,
            ContextError::TypeMismatch { .. } => ErrorClass::Invalid,
            ContextError::NoFrame => ErrorClass::NoSpace,
        }
    }
}

/// Errors that can occur while registering or resolving targets.
#[derive(Debug, thiserror::Error)]
pub enum ResolverError {
    /// A target with that name is already registered
    #[error("target '{0}' already exists")]
    TargetExists(String),

    /// No target with that name
    #[error("unknown target '{0}'")]
    UnknownTarget(String),

    /// No target with that id
    #[error("unknown target {0}")]
    UnknownTargetId(TargetId),

    /// A dependency names a target that is not registered
    #[error("target '{target}' depends on unknown target '{dependency}'")]
    UnresolvedDependency {
        /// Depending target
        target: String,
        /// Unresolvable name
        dependency: String,
    },

    /// The target's dependency graph has a cycle
    #[error("cyclic dependency in '{target}': {from} -> {to}")]
    Cycle {
        /// Target being sorted
        target: String,
        /// Source of an edge left on the cycle
        from: String,
        /// Destination of that edge
        to: String,
    },

    /// The target has no valid update plan
    #[error("target '{0}' has no update plan")]
    NotPrepared(String),

    /// An update script returned a failure status
    #[error("script of '{target}' failed with status {code}")]
    ScriptFailed {
        /// Target whose script failed
        target: String,
        /// Negative status code
        code: i32,
    },

    /// Bad argument
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// Script subsystem error
    #[error(transparent)]
    Script(#[from] ScriptError),

    /// Fact store error
    #[error(transparent)]
    Store(#[from] StoreError),

    /// Context table error
    #[error(transparent)]
    Context(#[from] ContextError),

    /// Definition document error
    #[error(transparent)]
    Definition(#[from] DefinitionError),

    /// I/O error while dumping
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl Classify for ResolverError {
    fn class(&self) -> ErrorClass {
        match self {
            ResolverError::TargetExists(_) => ErrorClass::Exists,
            ResolverError::UnknownTarget(_)
            | ResolverError::UnknownTargetId(_)
            | ResolverError::UnresolvedDependency { .. } => ErrorClass::NotFound,
            ResolverError::Cycle { .. } => ErrorClass::Loop,
            ResolverError::NotPrepared(_)
            | ResolverError::InvalidArgument(_)
            | ResolverError::Definition(_) => ErrorClass::Invalid,
            ResolverError::ScriptFailed { .. } | ResolverError::Io(_) => ErrorClass::Failed,
            ResolverError::Script(e) => e.class(),
            ResolverError::Store(e) => e.class(),
            ResolverError::Context(e) => e.class(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_classes() {
        assert_eq!(ResolverError::TargetExists("a".into()).class(), ErrorClass::Exists);
        assert_eq!(
            ResolverError::Cycle {
                target: "a".into(),
                from: "b".into(),
                to: "a".into()
            }
            .class(),
            ErrorClass::Loop
        );
        assert_eq!(ResolverError::from(ContextError::NoFrame).class(), ErrorClass::NoSpace);
        assert_eq!(
            ResolverError::from(StoreError::NoSuchTable("t".into())).class(),
            ErrorClass::NotFound
        );
        assert_eq!(ContextError::NothingToPop.class().errno_name(), "ENOENT");
    }
}
