//! Coalesced auto-update scheduling.
//!
//! Every request enables one deferred callback on the host loop. However
//! many requests arrive before the loop's next turn, the callback runs
//! once: it disables itself before resolving the auto-update target.

use polres_core::TargetId;
use std::cell::RefCell;
use std::rc::{Rc, Weak};
use tracing::debug;

use crate::mainloop::{DeferredId, EventLoop};
use crate::resolver::Resolver;

/// Auto-update state shared between the resolver and its store hook.
#[derive(Default)]
pub(crate) struct AutoUpdate {
    target: Option<TargetId>,
    event_loop: Option<Rc<dyn EventLoop>>,
    deferred: Option<DeferredId>,
    resolver: Weak<RefCell<Resolver>>,
    requests: u64,
}

impl AutoUpdate {
    pub fn new() -> Self {
        Self::default()
    }

    /// Point auto-update at a target, replacing any earlier configuration.
    pub fn configure(
        &mut self,
        target: TargetId,
        event_loop: Rc<dyn EventLoop>,
        resolver: Weak<RefCell<Resolver>>,
    ) {
        self.teardown();
        self.target = Some(target);
        self.event_loop = Some(event_loop);
        self.resolver = resolver;
    }

    pub fn target(&self) -> Option<TargetId> {
        self.target
    }

    /// Number of schedule requests received so far.
    pub fn requests(&self) -> u64 {
        self.requests
    }

    /// Ask for an auto-update on the next loop turn.
    pub fn schedule(&mut self) {
        let (Some(_), Some(event_loop)) = (self.target, self.event_loop.clone()) else {
            return;
        };
        self.requests += 1;

        let id = match self.deferred {
            Some(id) => id,
            None => {
                let resolver = self.resolver.clone();
                let id = event_loop.add_deferred(Rc::new(move || fire(&resolver)));
                self.deferred = Some(id);
                id
            }
        };
        debug!("auto-update requested ({} so far)", self.requests);
        event_loop.enable_deferred(id);
    }

    /// Disable the pending callback, if any.
    pub fn cancel(&mut self) {
        if let (Some(event_loop), Some(id)) = (&self.event_loop, self.deferred) {
            event_loop.disable_deferred(id);
        }
    }

    /// Delete the callback from the loop.
    pub fn teardown(&mut self) {
        if let (Some(event_loop), Some(id)) = (&self.event_loop, self.deferred.take()) {
            event_loop.delete_deferred(id);
        }
    }
}

fn fire(resolver: &Weak<RefCell<Resolver>>) {
    let Some(resolver) = resolver.upgrade() else {
        return;
    };
    if let Ok(mut resolver) = resolver.try_borrow_mut() {
        resolver.run_auto_update();
    } else {
        debug!("resolver busy, auto-update stays pending");
    };
}
