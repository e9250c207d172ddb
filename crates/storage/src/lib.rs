//! Fact store abstraction and implementations for polres.
//!
//! This crate provides the trait-based interface the resolver uses to talk
//! to its fact store, with an in-memory reference implementation.

#![warn(missing_docs)]

pub mod trait_;
pub mod memory_storage;

pub use trait_::{
    FactStore, StoreError, StoreEvent, StoreListener, Result, TableId, TxId, SubscriptionId,
};
pub use memory_storage::{MemoryStore, StoreSnapshot, TableSnapshot};
