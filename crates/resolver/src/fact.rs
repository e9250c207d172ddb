//! Fact tracking.
//!
//! A fact `$name` is backed by the fact store table `name`. The tracker
//! keeps the table handle of every fact current by listening to store
//! notifications, and reports the end of every outermost transaction to a
//! hook so the resolver can schedule an auto-update.

use polres_core::{FactId, Stamp, FACT_SIGIL};
use polres_storage::{FactStore, StoreEvent, SubscriptionId, TableId};
use serde::Serialize;
use std::cell::RefCell;
use std::collections::HashMap;
use std::rc::{Rc, Weak};
use tracing::debug;

/// Callback run when an outermost store transaction ends.
pub type TransactionHook = Rc<dyn Fn()>;

/// A tracked fact.
#[derive(Debug, Clone)]
pub struct Fact {
    name: String,
    table: Option<TableId>,
}

impl Fact {
    /// Fact name, including the sigil.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Name of the backing table.
    pub fn table_name(&self) -> &str {
        table_name(&self.name)
    }

    /// Current table handle, if the table exists.
    pub fn table(&self) -> Option<TableId> {
        self.table
    }
}

fn table_name(fact: &str) -> &str {
    fact.strip_prefix(FACT_SIGIL).unwrap_or(fact)
}

/// Point-in-time view of a fact, for dumps.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FactInfo {
    /// Fact id
    pub id: FactId,
    /// Fact name
    pub name: String,
    /// Backing table handle
    pub table: Option<u32>,
    /// Current stamp
    pub stamp: Stamp,
}

#[derive(Debug, Default)]
struct FactSet {
    facts: Vec<Fact>,
    by_name: HashMap<String, FactId>,
}

impl FactSet {
    fn on_event(&mut self, event: &StoreEvent) {
        match event {
            StoreEvent::TableCreated { name, table } => {
                for fact in self.facts.iter_mut().filter(|f| f.table_name() == name) {
                    debug!("fact {} bound to {}", fact.name, table);
                    fact.table = Some(*table);
                }
            }
            StoreEvent::TableDropped { table, .. } => {
                for fact in self.facts.iter_mut().filter(|f| f.table == Some(*table)) {
                    debug!("fact {} lost {}", fact.name, table);
                    fact.table = None;
                }
            }
            StoreEvent::TransactionEnd { .. } => {}
        }
    }
}

/// Owns the tracked facts and their store bindings.
pub struct FactTracker {
    store: Rc<dyn FactStore>,
    set: Rc<RefCell<FactSet>>,
    subscription: Option<SubscriptionId>,
}

impl FactTracker {
    /// Create a tracker over a store. Call [`FactTracker::subscribe`] to
    /// start following store notifications.
    pub fn new(store: Rc<dyn FactStore>) -> Self {
        Self {
            store,
            set: Rc::new(RefCell::new(FactSet::default())),
            subscription: None,
        }
    }

    /// Subscribe to store notifications.
    ///
    /// `on_transaction_end` runs whenever a transaction at depth 1 ends.
    pub fn subscribe(&mut self, on_transaction_end: TransactionHook) {
        self.unsubscribe();

        let set: Weak<RefCell<FactSet>> = Rc::downgrade(&self.set);
        let id = self.store.subscribe(Rc::new(move |event: &StoreEvent| {
            if let StoreEvent::TransactionEnd { depth, .. } = event {
                if *depth == 1 {
                    on_transaction_end();
                }
                return;
            }
            if let Some(set) = set.upgrade() {
                set.borrow_mut().on_event(event);
            }
        }));
        self.subscription = Some(id);
    }

    /// Stop following store notifications.
    pub fn unsubscribe(&mut self) {
        if let Some(id) = self.subscription.take() {
            self.store.unsubscribe(id);
        }
    }

    /// Look up a fact, creating and binding it on first use.
    pub fn get_or_create(&self, name: &str) -> FactId {
        if let Some(id) = self.find(name) {
            return id;
        }

        let mut set = self.set.borrow_mut();
        let id = FactId::new(set.facts.len());
        let table = self.store.lookup_table(table_name(name));
        debug!("tracking fact {} as {} ({:?})", name, id, table);
        set.facts.push(Fact {
            name: name.to_string(),
            table,
        });
        set.by_name.insert(name.to_string(), id);
        id
    }

    /// Forget facts created after the first `len`.
    pub(crate) fn truncate(&self, len: usize) {
        let mut set = self.set.borrow_mut();
        let keep = len.min(set.facts.len());
        for fact in set.facts.split_off(keep) {
            debug!("untracking fact {}", fact.name);
            set.by_name.remove(&fact.name);
        }
    }

    /// Look up a fact by name.
    pub fn find(&self, name: &str) -> Option<FactId> {
        self.set.borrow().by_name.get(name).copied()
    }

    /// Number of tracked facts.
    pub fn len(&self) -> usize {
        self.set.borrow().facts.len()
    }

    /// Whether no fact is tracked.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// A copy of a fact record.
    pub fn get(&self, id: FactId) -> Option<Fact> {
        self.set.borrow().facts.get(id.index()).cloned()
    }

    /// Name of a fact.
    pub fn name(&self, id: FactId) -> Option<String> {
        self.get(id).map(|f| f.name)
    }

    /// Current stamp of a fact; 0 if its table does not exist.
    pub fn stamp(&self, id: FactId) -> Stamp {
        let table = self
            .set
            .borrow()
            .facts
            .get(id.index())
            .and_then(|f| f.table);
        match table {
            Some(table) => self.store.table_stamp(table),
            None => 0,
        }
    }

    /// Snapshot of every fact.
    pub fn infos(&self) -> Vec<FactInfo> {
        let facts = self.set.borrow().facts.clone();
        facts
            .into_iter()
            .enumerate()
            .map(|(i, f)| {
                let id = FactId::new(i);
                FactInfo {
                    id,
                    stamp: self.stamp(id),
                    table: f.table.map(|t| t.0),
                    name: f.name,
                }
            })
            .collect()
    }
}

impl Drop for FactTracker {
    fn drop(&mut self) {
        self.unsubscribe();
    }
}
