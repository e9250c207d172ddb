//! In-memory fact store implementation.
//!
//! Tables hold keyed JSON rows. Every modification draws a fresh value from
//! a store-wide change counter and stamps it onto the table, so table stamps
//! only ever grow. Transactions nest; each level keeps a snapshot of the
//! table set that a rollback restores. Snapshots of the whole store can be
//! saved to and loaded from a JSON file.

use std::cell::{Cell, RefCell};
use std::collections::{BTreeMap, HashMap};
use std::path::Path;

use polres_core::Stamp;
use serde::{Deserialize, Serialize};
use tracing::debug;

use super::{
    FactStore, Result, StoreError, StoreEvent, StoreListener, SubscriptionId, TableId, TxId,
};

#[derive(Debug, Clone)]
struct Table {
    name: String,
    rows: BTreeMap<String, serde_json::Value>,
    stamp: Stamp,
}

#[derive(Debug, Clone, Default)]
struct TableSet {
    tables: HashMap<TableId, Table>,
    by_name: HashMap<String, TableId>,
}

#[derive(Debug)]
struct Transaction {
    id: TxId,
    snapshot: TableSet,
}

#[derive(Debug, Default)]
struct Inner {
    set: TableSet,
    counter: Stamp,
    next_table: u32,
    next_tx: u32,
    transactions: Vec<Transaction>,
}

impl Inner {
    fn bump(&mut self) -> Stamp {
        self.counter += 1;
        self.counter
    }

    fn create(&mut self, name: &str) -> TableId {
        self.next_table += 1;
        let id = TableId(self.next_table);
        let stamp = self.bump();
        self.set.tables.insert(
            id,
            Table {
                name: name.to_string(),
                rows: BTreeMap::new(),
                stamp,
            },
        );
        self.set.by_name.insert(name.to_string(), id);
        id
    }

    fn end_transaction(&mut self, tx: TxId) -> Result<Transaction> {
        let innermost = self.transactions.last().ok_or(StoreError::NoTransaction)?;
        if innermost.id != tx {
            return Err(StoreError::NotInnermost {
                expected: innermost.id,
                got: tx,
            });
        }
        self.transactions.pop().ok_or(StoreError::NoTransaction)
    }
}

/// Serialized form of a store.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StoreSnapshot {
    /// Change counter at the time of the snapshot
    #[serde(default)]
    pub counter: Stamp,

    /// Tables by name
    #[serde(default)]
    pub tables: BTreeMap<String, TableSnapshot>,
}

/// Serialized form of a single table.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TableSnapshot {
    /// Last change stamp
    #[serde(default)]
    pub stamp: Stamp,

    /// Rows by key
    #[serde(default)]
    pub rows: BTreeMap<String, serde_json::Value>,
}

/// In-memory fact store.
#[derive(Default)]
pub struct MemoryStore {
    inner: RefCell<Inner>,
    listeners: RefCell<Vec<(SubscriptionId, StoreListener)>>,
    next_subscription: Cell<u64>,
}

impl MemoryStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a store from a snapshot.
    pub fn from_snapshot(snapshot: StoreSnapshot) -> Self {
        let store = Self::new();
        {
            let mut inner = store.inner.borrow_mut();
            for (name, dump) in snapshot.tables {
                let id = inner.create(&name);
                if let Some(table) = inner.set.tables.get_mut(&id) {
                    table.rows = dump.rows;
                    table.stamp = table.stamp.max(dump.stamp);
                }
            }
            inner.counter = inner.counter.max(snapshot.counter);
        }
        store
    }

    /// Load a store from a JSON snapshot file.
    pub fn load_json(path: impl AsRef<Path>) -> Result<Self> {
        let text = std::fs::read_to_string(path)?;
        let snapshot: StoreSnapshot = serde_json::from_str(&text)?;
        Ok(Self::from_snapshot(snapshot))
    }

    /// Take a snapshot of the committed and uncommitted state.
    pub fn snapshot(&self) -> StoreSnapshot {
        let inner = self.inner.borrow();
        StoreSnapshot {
            counter: inner.counter,
            tables: inner
                .set
                .tables
                .values()
                .map(|t| {
                    (
                        t.name.clone(),
                        TableSnapshot {
                            stamp: t.stamp,
                            rows: t.rows.clone(),
                        },
                    )
                })
                .collect(),
        }
    }

    /// Save a JSON snapshot of the store.
    pub fn save_json(&self, path: impl AsRef<Path>) -> Result<()> {
        let json = serde_json::to_string_pretty(&self.snapshot())?;
        std::fs::write(path, json.as_bytes())?;
        Ok(())
    }

    /// Names of all tables, sorted.
    pub fn table_names(&self) -> Vec<String> {
        let mut names: Vec<_> = self.inner.borrow().set.by_name.keys().cloned().collect();
        names.sort();
        names
    }

    /// All rows of a table, sorted by key.
    pub fn rows(&self, table: &str) -> Result<Vec<(String, serde_json::Value)>> {
        let inner = self.inner.borrow();
        let t = inner
            .set
            .by_name
            .get(table)
            .and_then(|id| inner.set.tables.get(id))
            .ok_or_else(|| StoreError::NoSuchTable(table.to_string()))?;
        Ok(t.rows.iter().map(|(k, v)| (k.clone(), v.clone())).collect())
    }

    /// Remove a row. Returns whether it existed.
    pub fn remove(&self, table: &str, key: &str) -> Result<bool> {
        let mut inner = self.inner.borrow_mut();
        let id = *inner
            .set
            .by_name
            .get(table)
            .ok_or_else(|| StoreError::NoSuchTable(table.to_string()))?;
        let stamp = inner.counter + 1;
        let removed = match inner.set.tables.get_mut(&id) {
            Some(t) => t.rows.remove(key).is_some(),
            None => false,
        };
        if removed {
            inner.counter = stamp;
            if let Some(t) = inner.set.tables.get_mut(&id) {
                t.stamp = stamp;
            }
        }
        Ok(removed)
    }

    /// Deliver events to all subscribers, with no internal borrow held.
    fn notify(&self, events: Vec<StoreEvent>) {
        if events.is_empty() {
            return;
        }
        let listeners: Vec<StoreListener> = self
            .listeners
            .borrow()
            .iter()
            .map(|(_, l)| l.clone())
            .collect();
        for event in &events {
            debug!("store event: {:?}", event);
            for listener in &listeners {
                listener(event);
            }
        }
    }
}

impl FactStore for MemoryStore {
    fn begin_transaction(&self) -> Result<TxId> {
        let mut inner = self.inner.borrow_mut();
        inner.next_tx += 1;
        let id = TxId(inner.next_tx);
        let snapshot = inner.set.clone();
        inner.transactions.push(Transaction { id, snapshot });
        debug!("began {} (depth {})", id, inner.transactions.len());
        Ok(id)
    }

    fn commit(&self, tx: TxId) -> Result<()> {
        let depth = {
            let mut inner = self.inner.borrow_mut();
            let depth = inner.transactions.len() as u32;
            inner.end_transaction(tx)?;
            depth
        };
        debug!("committed {}", tx);
        self.notify(vec![StoreEvent::TransactionEnd { depth, committed: true }]);
        Ok(())
    }

    fn rollback(&self, tx: TxId) -> Result<()> {
        let (depth, mut events) = {
            let mut inner = self.inner.borrow_mut();
            let depth = inner.transactions.len() as u32;
            let Transaction { snapshot, .. } = inner.end_transaction(tx)?;

            let mut events = Vec::new();
            for (name, id) in &inner.set.by_name {
                if snapshot.by_name.get(name) != Some(id) {
                    events.push(StoreEvent::TableDropped {
                        name: name.clone(),
                        table: *id,
                    });
                }
            }
            for (name, id) in &snapshot.by_name {
                if inner.set.by_name.get(name) != Some(id) {
                    events.push(StoreEvent::TableCreated {
                        name: name.clone(),
                        table: *id,
                    });
                }
            }
            inner.set = snapshot;
            (depth, events)
        };
        debug!("rolled back {}", tx);
        events.push(StoreEvent::TransactionEnd { depth, committed: false });
        self.notify(events);
        Ok(())
    }

    fn transaction_depth(&self) -> u32 {
        self.inner.borrow().transactions.len() as u32
    }

    fn lookup_table(&self, name: &str) -> Option<TableId> {
        self.inner.borrow().set.by_name.get(name).copied()
    }

    fn table_stamp(&self, table: TableId) -> Stamp {
        self.inner
            .borrow()
            .set
            .tables
            .get(&table)
            .map(|t| t.stamp)
            .unwrap_or(0)
    }

    fn create_table(&self, name: &str) -> Result<TableId> {
        let id = {
            let mut inner = self.inner.borrow_mut();
            if inner.set.by_name.contains_key(name) {
                return Err(StoreError::TableExists(name.to_string()));
            }
            inner.create(name)
        };
        self.notify(vec![StoreEvent::TableCreated {
            name: name.to_string(),
            table: id,
        }]);
        Ok(id)
    }

    fn drop_table(&self, name: &str) -> Result<()> {
        let id = {
            let mut inner = self.inner.borrow_mut();
            let id = inner
                .set
                .by_name
                .remove(name)
                .ok_or_else(|| StoreError::NoSuchTable(name.to_string()))?;
            inner.set.tables.remove(&id);
            id
        };
        self.notify(vec![StoreEvent::TableDropped {
            name: name.to_string(),
            table: id,
        }]);
        Ok(())
    }

    fn upsert(&self, table: &str, key: &str, value: serde_json::Value) -> Result<()> {
        let created = {
            let mut inner = self.inner.borrow_mut();
            let (id, created) = match inner.set.by_name.get(table) {
                Some(id) => (*id, false),
                None => (inner.create(table), true),
            };
            let stamp = inner.bump();
            if let Some(t) = inner.set.tables.get_mut(&id) {
                t.rows.insert(key.to_string(), value);
                t.stamp = stamp;
            }
            created.then_some(id)
        };
        if let Some(id) = created {
            self.notify(vec![StoreEvent::TableCreated {
                name: table.to_string(),
                table: id,
            }]);
        }
        Ok(())
    }

    fn get(&self, table: &str, key: &str) -> Option<serde_json::Value> {
        let inner = self.inner.borrow();
        let id = inner.set.by_name.get(table)?;
        inner.set.tables.get(id)?.rows.get(key).cloned()
    }

    fn subscribe(&self, listener: StoreListener) -> SubscriptionId {
        let id = SubscriptionId(self.next_subscription.get() + 1);
        self.next_subscription.set(id.0);
        self.listeners.borrow_mut().push((id, listener));
        id
    }

    fn unsubscribe(&self, id: SubscriptionId) -> bool {
        let mut listeners = self.listeners.borrow_mut();
        let before = listeners.len();
        listeners.retain(|(sid, _)| *sid != id);
        listeners.len() != before
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::rc::Rc;

    fn recorder(store: &MemoryStore) -> Rc<RefCell<Vec<StoreEvent>>> {
        let seen = Rc::new(RefCell::new(Vec::new()));
        let sink = seen.clone();
        store.subscribe(Rc::new(move |e: &StoreEvent| sink.borrow_mut().push(e.clone())));
        seen
    }

    #[test]
    fn test_stamps_grow_on_change() {
        let store = MemoryStore::new();
        let id = store.create_table("audio").unwrap();
        let s0 = store.table_stamp(id);
        assert!(s0 > 0);

        store.upsert("audio", "volume", serde_json::json!(3)).unwrap();
        let s1 = store.table_stamp(id);
        assert!(s1 > s0);
        assert_eq!(store.get("audio", "volume"), Some(serde_json::json!(3)));
    }

    #[test]
    fn test_unknown_table_stamp_is_zero() {
        let store = MemoryStore::new();
        assert_eq!(store.table_stamp(TableId(42)), 0);
        assert!(store.lookup_table("nope").is_none());
    }

    #[test]
    fn test_upsert_creates_table_and_notifies() {
        let store = MemoryStore::new();
        let seen = recorder(&store);

        store.upsert("video", "on", serde_json::json!(true)).unwrap();
        let id = store.lookup_table("video").unwrap();
        assert_eq!(
            seen.borrow().as_slice(),
            &[StoreEvent::TableCreated { name: "video".into(), table: id }]
        );
    }

    #[test]
    fn test_rollback_restores_rows_and_tables() {
        let store = MemoryStore::new();
        store.upsert("audio", "volume", serde_json::json!(1)).unwrap();
        let id = store.lookup_table("audio").unwrap();
        let stamp = store.table_stamp(id);
        let seen = recorder(&store);

        let tx = store.begin_transaction().unwrap();
        store.upsert("audio", "volume", serde_json::json!(9)).unwrap();
        store.upsert("extra", "k", serde_json::json!("v")).unwrap();
        store.rollback(tx).unwrap();

        assert_eq!(store.get("audio", "volume"), Some(serde_json::json!(1)));
        assert_eq!(store.table_stamp(id), stamp);
        assert!(store.lookup_table("extra").is_none());

        let seen = seen.borrow();
        assert!(seen
            .iter()
            .any(|e| matches!(e, StoreEvent::TableDropped { name, .. } if name == "extra")));
        assert_eq!(
            seen.last(),
            Some(&StoreEvent::TransactionEnd { depth: 1, committed: false })
        );
    }

    #[test]
    fn test_nested_transactions_report_depth() {
        let store = MemoryStore::new();
        let seen = recorder(&store);

        let outer = store.begin_transaction().unwrap();
        let inner = store.begin_transaction().unwrap();
        assert_eq!(store.transaction_depth(), 2);

        assert!(matches!(store.commit(outer), Err(StoreError::NotInnermost { .. })));
        store.commit(inner).unwrap();
        store.commit(outer).unwrap();
        assert_eq!(store.transaction_depth(), 0);

        assert_eq!(
            seen.borrow().as_slice(),
            &[
                StoreEvent::TransactionEnd { depth: 2, committed: true },
                StoreEvent::TransactionEnd { depth: 1, committed: true },
            ]
        );
        assert!(matches!(store.commit(outer), Err(StoreError::NoTransaction)));
    }

    #[test]
    fn test_drop_and_recreate_gets_new_handle() {
        let store = MemoryStore::new();
        let first = store.create_table("t").unwrap();
        assert!(matches!(store.create_table("t"), Err(StoreError::TableExists(_))));
        store.drop_table("t").unwrap();
        assert_eq!(store.table_stamp(first), 0);
        let second = store.create_table("t").unwrap();
        assert_ne!(first, second);
    }

    #[test]
    fn test_unsubscribe() {
        let store = MemoryStore::new();
        let count = Rc::new(Cell::new(0));
        let c = count.clone();
        let sub = store.subscribe(Rc::new(move |_: &StoreEvent| c.set(c.get() + 1)));
        store.create_table("a").unwrap();
        assert!(store.unsubscribe(sub));
        assert!(!store.unsubscribe(sub));
        store.create_table("b").unwrap();
        assert_eq!(count.get(), 1);
    }

    #[test]
    fn test_json_round_trip_keeps_stamps() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("facts.json");

        let store = MemoryStore::new();
        store.upsert("audio", "volume", serde_json::json!(5)).unwrap();
        let stamp = store.table_stamp(store.lookup_table("audio").unwrap());
        store.save_json(&path).unwrap();

        let loaded = MemoryStore::load_json(&path).unwrap();
        let id = loaded.lookup_table("audio").unwrap();
        assert!(loaded.table_stamp(id) >= stamp);
        assert_eq!(
            loaded.rows("audio").unwrap(),
            vec![("volume".to_string(), serde_json::json!(5))]
        );
    }

    #[test]
    fn test_remove_row_bumps_stamp() {
        let store = MemoryStore::new();
        store.upsert("t", "k", serde_json::json!(1)).unwrap();
        let id = store.lookup_table("t").unwrap();
        let before = store.table_stamp(id);
        assert!(store.remove("t", "k").unwrap());
        assert!(store.table_stamp(id) > before);
        assert!(!store.remove("t", "k").unwrap());
    }
}
