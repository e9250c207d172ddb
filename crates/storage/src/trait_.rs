//! Fact store trait abstraction.

use polres_core::{Classify, ErrorClass, Stamp};
use std::rc::Rc;

/// Error type for fact store operations.
pub type Result<T> = std::result::Result<T, StoreError>;

/// Errors that can occur during fact store operations.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization/deserialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// No table with that name
    #[error("no such table: {0}")]
    NoSuchTable(String),

    /// Table already exists
    #[error("table already exists: {0}")]
    TableExists(String),

    /// No transaction is open
    #[error("no active transaction")]
    NoTransaction,

    /// Transactions must end innermost first
    #[error("transaction {got} is not the innermost one ({expected})")]
    NotInnermost {
        /// Innermost open transaction
        expected: TxId,
        /// Transaction that was asked to end
        got: TxId,
    },

    /// Other error
    #[error("{0}")]
    Other(String),
}

impl Classify for StoreError {
    fn class(&self) -> ErrorClass {
        match self {
            StoreError::NoSuchTable(_) => ErrorClass::NotFound,
            StoreError::TableExists(_) => ErrorClass::Exists,
            StoreError::NoTransaction | StoreError::NotInnermost { .. } => ErrorClass::Invalid,
            _ => ErrorClass::Failed,
        }
    }
}

/// Handle of a fact table.
///
/// A dropped and recreated table gets a fresh handle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TableId(pub u32);

impl std::fmt::Display for TableId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "table#{}", self.0)
    }
}

/// Handle of an open transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TxId(pub u32);

impl std::fmt::Display for TxId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "tx#{}", self.0)
    }
}

/// Handle of a notification subscription.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(pub u64);

/// Store-level change notification.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoreEvent {
    /// A table was created (or reappeared on rollback)
    TableCreated {
        /// Table name
        name: String,
        /// New handle
        table: TableId,
    },
    /// A table was dropped (or vanished on rollback)
    TableDropped {
        /// Table name
        name: String,
        /// Handle that is no longer valid
        table: TableId,
    },
    /// A transaction ended
    TransactionEnd {
        /// Nesting depth of the ended transaction, 1 for the outermost
        depth: u32,
        /// Whether it was committed rather than rolled back
        committed: bool,
    },
}

/// Notification callback.
pub type StoreListener = Rc<dyn Fn(&StoreEvent)>;

/// Fact store abstraction.
///
/// Methods take `&self`: stores are shared between the resolver, its
/// notification callbacks and running scripts, all on one thread.
pub trait FactStore {
    // === Transactions ===

    /// Begin a (possibly nested) transaction.
    fn begin_transaction(&self) -> Result<TxId>;

    /// Commit the innermost transaction.
    fn commit(&self, tx: TxId) -> Result<()>;

    /// Roll back the innermost transaction.
    fn rollback(&self, tx: TxId) -> Result<()>;

    /// Number of currently open transactions.
    fn transaction_depth(&self) -> u32;

    // === Tables ===

    /// Look up a table handle by name.
    fn lookup_table(&self, name: &str) -> Option<TableId>;

    /// Change stamp of a table; 0 for an unknown handle.
    fn table_stamp(&self, table: TableId) -> Stamp;

    /// Create an empty table.
    fn create_table(&self, name: &str) -> Result<TableId>;

    /// Drop a table.
    fn drop_table(&self, name: &str) -> Result<()>;

    // === Rows ===

    /// Insert or replace a row, creating the table if needed.
    fn upsert(&self, table: &str, key: &str, value: serde_json::Value) -> Result<()>;

    /// Fetch a row.
    fn get(&self, table: &str, key: &str) -> Option<serde_json::Value>;

    // === Notifications ===

    /// Subscribe to store notifications.
    fn subscribe(&self, listener: StoreListener) -> SubscriptionId;

    /// Remove a subscription. Returns false if it was not registered.
    fn unsubscribe(&self, id: SubscriptionId) -> bool;
}
