//! Transactional update of one target.

use polres_core::{ResolverEvent, ResolverEventKind, TargetId};
use polres_script::{ScriptEnv, ScriptStatus};
use polres_storage::FactStore;
use serde::Serialize;
use std::cell::Cell;
use tracing::{debug, error};

use crate::context::ContextTable;
use crate::error::{ResolverError, Result};
use crate::events::EventBus;
use crate::fact::FactTracker;
use crate::target::TargetRegistry;

/// What an update did.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct UpdateReport {
    /// Target that was asked for
    pub target: String,

    /// Targets that were stale and got updated, in order
    pub updated: Vec<String>,

    /// Output lines produced by scripts
    pub output: Vec<String>,
}

impl UpdateReport {
    fn new(target: &str) -> Self {
        Self {
            target: target.to_string(),
            ..Default::default()
        }
    }
}

/// Everything an update borrows from the resolver.
pub(crate) struct Scheduler<'a> {
    pub targets: &'a mut TargetRegistry,
    pub facts: &'a FactTracker,
    pub context: &'a ContextTable,
    pub store: &'a dyn FactStore,
    pub events: &'a EventBus,
    pub level: &'a Cell<u32>,
}

impl Scheduler<'_> {
    /// Bring `id` up to date inside one store transaction.
    ///
    /// On failure the transaction is rolled back and every stamp of the
    /// plan is restored.
    pub fn run(mut self, id: TargetId) -> Result<UpdateReport> {
        self.targets.check_prepared(id, self.facts)?;
        let (name, plan) = match self.targets.get(id) {
            Some(t) => (t.name().to_string(), t.update_targets().to_vec()),
            None => return Err(ResolverError::UnknownTargetId(id)),
        };

        let tx = self.store.begin_transaction()?;
        let level = self.level.get() + 1;
        self.level.set(level);
        self.events
            .emit(&ResolverEvent::new(ResolverEventKind::Started, &name, level));

        let saved = self.targets.snapshot(&plan);
        let mut report = UpdateReport::new(&name);
        let mut updated = Vec::new();

        let result = match self.walk(id, &plan, &mut updated, &mut report) {
            Ok(()) => self.store.commit(tx).map_err(ResolverError::from),
            Err(e) => {
                if let Err(rb) = self.store.rollback(tx) {
                    error!("{}: rollback failed: {}", name, rb);
                }
                Err(e)
            }
        };

        match &result {
            Ok(()) => {
                for t in &updated {
                    self.targets.observe_facts(*t, self.facts);
                }
                self.events
                    .emit(&ResolverEvent::new(ResolverEventKind::Done, &name, level));
            }
            Err(e) => {
                error!("{}: update failed: {}", name, e);
                self.targets.restore(saved);
                self.events
                    .emit(&ResolverEvent::new(ResolverEventKind::Failed, &name, level));
            }
        }

        self.level.set(level - 1);
        result.map(|()| report)
    }

    fn walk(
        &mut self,
        id: TargetId,
        plan: &[TargetId],
        updated: &mut Vec<TargetId>,
        report: &mut UpdateReport,
    ) -> Result<()> {
        for &dep in plan.iter().filter(|t| **t != id) {
            if self.targets.needs_update(dep, self.facts) {
                self.execute(dep, report)?;
                updated.push(dep);
            }
        }

        if self.targets.needs_update(id, self.facts) {
            self.execute(id, report)?;
            updated.push(id);
        } else {
            debug!("{} is up to date", report.target);
        }
        Ok(())
    }

    fn execute(&mut self, id: TargetId, report: &mut UpdateReport) -> Result<()> {
        let stamp = self.targets.next_stamp();
        let target = self
            .targets
            .get_mut(id)
            .ok_or(ResolverError::UnknownTargetId(id))?;
        let name = target.name().to_string();

        if let Some(script) = target.script.as_mut() {
            let mut env = ScriptEnv {
                target: &name,
                scope: self.context,
                store: self.store,
                output: &mut report.output,
            };
            let status = script.execute(&mut env)?;
            debug!("{}: script returned {:?}", name, status);
            if let ScriptStatus::Failure(code) = status {
                return Err(ResolverError::ScriptFailed { target: name, code });
            }
        }

        target.stamp = stamp;
        report.updated.push(name);
        Ok(())
    }
}
