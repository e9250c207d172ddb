//! Host event loop interface and a minimal single-threaded implementation.

use std::cell::{Cell, RefCell};
use std::collections::BTreeMap;
use std::rc::Rc;
use tracing::debug;

/// Deferred callback.
pub type DeferredCallback = Rc<dyn Fn()>;

/// Handle of a deferred callback.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct DeferredId(u64);

/// Deferred-callback scheduling offered by the host loop.
///
/// An enabled deferred runs on every loop turn until it is disabled.
pub trait EventLoop {
    /// Register a callback, initially disabled.
    fn add_deferred(&self, callback: DeferredCallback) -> DeferredId;

    /// Have the callback run on the next turn.
    fn enable_deferred(&self, id: DeferredId);

    /// Stop the callback from running.
    fn disable_deferred(&self, id: DeferredId);

    /// Remove the callback.
    fn delete_deferred(&self, id: DeferredId);
}

struct Deferred {
    callback: DeferredCallback,
    enabled: bool,
}

/// A main loop that only knows deferred callbacks.
#[derive(Default)]
pub struct MainLoop {
    deferred: RefCell<BTreeMap<DeferredId, Deferred>>,
    next_id: Cell<u64>,
}

impl MainLoop {
    /// Create an empty loop.
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether a deferred is registered and enabled.
    pub fn is_enabled(&self, id: DeferredId) -> bool {
        self.deferred.borrow().get(&id).is_some_and(|d| d.enabled)
    }

    /// Number of enabled deferreds.
    pub fn pending(&self) -> usize {
        self.deferred.borrow().values().filter(|d| d.enabled).count()
    }

    /// Run one turn: every deferred enabled at the start of the turn runs
    /// once, unless it was disabled or deleted by an earlier callback.
    /// Returns the number of callbacks run.
    pub fn dispatch(&self) -> usize {
        let due: Vec<DeferredId> = self
            .deferred
            .borrow()
            .iter()
            .filter(|(_, d)| d.enabled)
            .map(|(id, _)| *id)
            .collect();

        let mut ran = 0;
        for id in due {
            let callback = match self.deferred.borrow().get(&id) {
                Some(d) if d.enabled => d.callback.clone(),
                _ => continue,
            };
            callback();
            ran += 1;
        }
        if ran > 0 {
            debug!("main loop turn ran {} deferred callback(s)", ran);
        }
        ran
    }
}

impl EventLoop for MainLoop {
    fn add_deferred(&self, callback: DeferredCallback) -> DeferredId {
        let id = DeferredId(self.next_id.get() + 1);
        self.next_id.set(id.0);
        self.deferred.borrow_mut().insert(
            id,
            Deferred {
                callback,
                enabled: false,
            },
        );
        id
    }

    fn enable_deferred(&self, id: DeferredId) {
        if let Some(d) = self.deferred.borrow_mut().get_mut(&id) {
            d.enabled = true;
        }
    }

    fn disable_deferred(&self, id: DeferredId) {
        if let Some(d) = self.deferred.borrow_mut().get_mut(&id) {
            d.enabled = false;
        }
    }

    fn delete_deferred(&self, id: DeferredId) {
        self.deferred.borrow_mut().remove(&id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn counter() -> (Rc<Cell<u32>>, DeferredCallback) {
        let count = Rc::new(Cell::new(0));
        let c = count.clone();
        (count, Rc::new(move || c.set(c.get() + 1)))
    }

    #[test]
    fn test_deferred_is_level_triggered() {
        let main = MainLoop::new();
        let (count, cb) = counter();
        let id = main.add_deferred(cb);

        assert_eq!(main.dispatch(), 0);
        main.enable_deferred(id);
        main.enable_deferred(id);
        assert_eq!(main.pending(), 1);

        main.dispatch();
        main.dispatch();
        assert_eq!(count.get(), 2);

        main.disable_deferred(id);
        main.dispatch();
        assert_eq!(count.get(), 2);
    }

    #[test]
    fn test_self_disabling_callback_runs_once() {
        let main = Rc::new(MainLoop::new());
        let count = Rc::new(Cell::new(0));
        let id_cell = Rc::new(Cell::new(None));

        let (m, c, ids) = (main.clone(), count.clone(), id_cell.clone());
        let id = main.add_deferred(Rc::new(move || {
            if let Some(id) = ids.get() {
                m.disable_deferred(id);
            }
            c.set(c.get() + 1);
        }));
        id_cell.set(Some(id));

        main.enable_deferred(id);
        main.dispatch();
        main.dispatch();
        assert_eq!(count.get(), 1);
        assert!(!main.is_enabled(id));
    }

    #[test]
    fn test_delete() {
        let main = MainLoop::new();
        let (count, cb) = counter();
        let id = main.add_deferred(cb);
        main.enable_deferred(id);
        main.delete_deferred(id);
        assert_eq!(main.dispatch(), 0);
        assert_eq!(count.get(), 0);
    }
}
