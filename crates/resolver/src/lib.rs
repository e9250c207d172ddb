//! The polres resolution engine.
//!
//! Targets are computed outputs that depend on facts (tables in a fact
//! store) and on other targets. The resolver sorts each target's
//! dependencies once, then brings a target up to date by running the
//! update scripts of whatever is stale, in order, inside one store
//! transaction.

#![warn(missing_docs)]

pub mod context;
pub mod error;
pub mod events;
pub mod fact;
pub mod graph;
pub mod mainloop;
pub mod resolver;
pub mod scheduler;
pub mod target;

mod autoupdate;

pub use context::{ContextTable, Declaration};
pub use error::{ContextError, ResolverError, Result};
pub use events::{EventBus, EventListener, ListenerId};
pub use fact::{Fact, FactInfo, FactTracker, TransactionHook};
pub use graph::{CycleEdge, DependencyGraph, Plan};
pub use mainloop::{DeferredCallback, DeferredId, EventLoop, MainLoop};
pub use resolver::{Resolver, SharedResolver};
pub use scheduler::UpdateReport;
pub use target::{StampSnapshot, Target, TargetRegistry};
