//! polres core data models.
//!
//! Identifiers, typed script values, target definitions and lifecycle
//! events shared by the fact store, the script subsystem and the resolver.

#![warn(missing_docs)]

mod id;
mod value;
mod definition;
mod event;
mod error;

pub use id::{FactId, TargetId, VarId, NodeRef, Stamp};
pub use value::{ScriptType, ScriptValue};
pub use definition::{
    DependencyRef, ScriptSpec, TargetDef, Definitions, DefinitionError, ResolverConfig, FACT_SIGIL,
};
pub use event::{ResolverEvent, ResolverEventKind};
pub use error::{ErrorClass, Classify};

/// Timestamp type
pub type Time = chrono::DateTime<chrono::Utc>;
