//! Synchronous lifecycle event bus.

use polres_core::{ResolverEvent, ResolverEventKind};
use std::cell::{Cell, RefCell};
use std::rc::Rc;
use tracing::{error, info};

/// Event listener callback.
pub type EventListener = Rc<dyn Fn(&ResolverEvent)>;

/// Handle of a bus subscription.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListenerId(u64);

/// Delivers resolver events to subscribers, in subscription order.
#[derive(Default)]
pub struct EventBus {
    listeners: RefCell<Vec<(ListenerId, EventListener)>>,
    next_id: Cell<u64>,
}

impl EventBus {
    /// Create a bus with no listeners.
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a listener.
    pub fn subscribe(&self, listener: EventListener) -> ListenerId {
        let id = ListenerId(self.next_id.get() + 1);
        self.next_id.set(id.0);
        self.listeners.borrow_mut().push((id, listener));
        id
    }

    /// Remove a listener. Returns false if it was not subscribed.
    pub fn unsubscribe(&self, id: ListenerId) -> bool {
        let mut listeners = self.listeners.borrow_mut();
        let before = listeners.len();
        listeners.retain(|(lid, _)| *lid != id);
        listeners.len() != before
    }

    /// Number of listeners.
    pub fn listener_count(&self) -> usize {
        self.listeners.borrow().len()
    }

    /// Publish an event to every listener.
    pub fn emit(&self, event: &ResolverEvent) {
        match event.kind {
            ResolverEventKind::Failed => {
                error!("{} target={} level={}", event.kind, event.target, event.level)
            }
            _ => info!("{} target={} level={}", event.kind, event.target, event.level),
        }

        let listeners: Vec<EventListener> =
            self.listeners.borrow().iter().map(|(_, l)| l.clone()).collect();
        for listener in listeners {
            listener(event);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_emit_reaches_subscribers() {
        let bus = EventBus::new();
        let seen = Rc::new(RefCell::new(Vec::new()));

        let sink = seen.clone();
        let id = bus.subscribe(Rc::new(move |e: &ResolverEvent| {
            sink.borrow_mut().push((e.kind, e.target.clone(), e.level))
        }));

        bus.emit(&ResolverEvent::new(ResolverEventKind::Started, "audio", 1));
        assert!(bus.unsubscribe(id));
        assert!(!bus.unsubscribe(id));
        bus.emit(&ResolverEvent::new(ResolverEventKind::Done, "audio", 1));

        assert_eq!(
            *seen.borrow(),
            vec![(ResolverEventKind::Started, "audio".to_string(), 1)]
        );
    }

    #[test]
    fn test_listener_may_subscribe_during_emit() {
        let bus = Rc::new(EventBus::new());
        let inner = bus.clone();
        bus.subscribe(Rc::new(move |_e: &ResolverEvent| {
            inner.subscribe(Rc::new(|_e: &ResolverEvent| {}));
        }));

        bus.emit(&ResolverEvent::new(ResolverEventKind::Done, "x", 1));
        assert_eq!(bus.listener_count(), 2);
    }
}
