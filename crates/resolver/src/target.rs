//! Target registry.
//!
//! Targets are kept in registration order and addressed by [`TargetId`].
//! Every change to the registry re-resolves dependency names and re-sorts
//! all targets, so each target always carries an up to date update plan.

use polres_core::{DependencyRef, FactId, NodeRef, Stamp, TargetId};
use polres_script::Script;
use std::collections::HashMap;
use tracing::{debug, warn};

use crate::error::{ResolverError, Result};
use crate::fact::FactTracker;
use crate::graph::{CycleEdge, DependencyGraph, Plan};

/// A registered target.
#[derive(Debug)]
pub struct Target {
    name: String,
    dependencies: Vec<DependencyRef>,
    pub(crate) stamp: Stamp,
    pub(crate) script: Option<Script>,
    update_facts: Vec<FactId>,
    /// Last observed stamp of each `update_facts` entry; `None` until the
    /// target has been updated with that fact in its plan.
    pub(crate) fact_stamps: Vec<Option<Stamp>>,
    update_targets: Vec<TargetId>,
    directs: Vec<NodeRef>,
    prepared: bool,
    precompiled: bool,
    cycle: Option<CycleEdge>,
}

impl Target {
    fn new(name: String, dependencies: Vec<DependencyRef>, script: Option<Script>) -> Self {
        let precompiled = script.as_ref().is_some_and(Script::is_precompiled);
        Self {
            name,
            dependencies,
            stamp: 0,
            script,
            update_facts: Vec::new(),
            fact_stamps: Vec::new(),
            update_targets: Vec::new(),
            directs: Vec::new(),
            prepared: false,
            precompiled,
            cycle: None,
        }
    }

    /// Target name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Declared dependencies, in declaration order.
    pub fn dependencies(&self) -> &[DependencyRef] {
        &self.dependencies
    }

    /// Stamp of the last update.
    pub fn stamp(&self) -> Stamp {
        self.stamp
    }

    /// Update script, if the target has one.
    pub fn script(&self) -> Option<&Script> {
        self.script.as_ref()
    }

    /// Facts the target transitively depends on.
    pub fn update_facts(&self) -> &[FactId] {
        &self.update_facts
    }

    /// Cached fact stamps, parallel to [`Target::update_facts`].
    pub fn fact_stamps(&self) -> &[Option<Stamp>] {
        &self.fact_stamps
    }

    /// Targets to update, in order, this target last.
    pub fn update_targets(&self) -> &[TargetId] {
        &self.update_targets
    }

    /// Resolved direct dependencies, in declaration order.
    pub fn directs(&self) -> &[NodeRef] {
        &self.directs
    }

    /// Whether the target has a valid update plan.
    pub fn is_prepared(&self) -> bool {
        self.prepared
    }

    /// Whether the script was supplied precompiled.
    pub fn is_precompiled(&self) -> bool {
        self.precompiled
    }

    fn set_plan(&mut self, plan: Plan) {
        let cached: HashMap<FactId, Option<Stamp>> = self
            .update_facts
            .iter()
            .copied()
            .zip(self.fact_stamps.iter().copied())
            .collect();
        self.fact_stamps = plan
            .facts
            .iter()
            .map(|f| cached.get(f).copied().flatten())
            .collect();
        self.update_facts = plan.facts;
        self.update_targets = plan.targets;
        self.prepared = true;
        self.cycle = None;
    }

    fn clear_plan(&mut self, cycle: Option<CycleEdge>) {
        self.update_facts.clear();
        self.fact_stamps.clear();
        self.update_targets.clear();
        self.prepared = false;
        self.cycle = cycle;
    }
}

/// Saved stamp state of a set of targets.
#[derive(Debug, Clone)]
pub struct StampSnapshot {
    entries: Vec<(TargetId, Stamp, Vec<Option<Stamp>>)>,
}

/// Owns all targets and their update plans.
#[derive(Debug, Default)]
pub struct TargetRegistry {
    targets: Vec<Target>,
    by_name: HashMap<String, TargetId>,
    counter: Stamp,
}

impl TargetRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a target without resolving or sorting.
    pub fn insert(
        &mut self,
        name: &str,
        dependencies: Vec<DependencyRef>,
        script: Option<Script>,
    ) -> Result<TargetId> {
        if self.by_name.contains_key(name) {
            return Err(ResolverError::TargetExists(name.to_string()));
        }
        let id = TargetId::new(self.targets.len());
        self.targets
            .push(Target::new(name.to_string(), dependencies, script));
        self.by_name.insert(name.to_string(), id);
        debug!("registered target '{}' as {}", name, id);
        Ok(id)
    }

    /// Remove the most recently inserted targets, keeping the first `len`.
    pub(crate) fn truncate(&mut self, len: usize) {
        for target in self.targets.drain(len..) {
            self.by_name.remove(&target.name);
        }
    }

    /// Look up a target by name.
    pub fn lookup(&self, name: &str) -> Option<TargetId> {
        self.by_name.get(name).copied()
    }

    /// Borrow a target.
    pub fn get(&self, id: TargetId) -> Option<&Target> {
        self.targets.get(id.index())
    }

    pub(crate) fn get_mut(&mut self, id: TargetId) -> Option<&mut Target> {
        self.targets.get_mut(id.index())
    }

    /// Number of targets.
    pub fn len(&self) -> usize {
        self.targets.len()
    }

    /// Whether the registry is empty.
    pub fn is_empty(&self) -> bool {
        self.targets.is_empty()
    }

    /// All targets in registration order.
    pub fn iter(&self) -> impl Iterator<Item = (TargetId, &Target)> {
        self.targets
            .iter()
            .enumerate()
            .map(|(i, t)| (TargetId::new(i), t))
    }

    /// Name of a node, for messages.
    pub fn node_name(&self, node: &NodeRef, facts: &FactTracker) -> String {
        match node {
            NodeRef::Fact(f) => facts.name(*f).unwrap_or_else(|| f.to_string()),
            NodeRef::Target(t) => self
                .get(*t)
                .map(|t| t.name.clone())
                .unwrap_or_else(|| t.to_string()),
        }
    }

    /// Resolve every target's dependency names to nodes.
    ///
    /// Fact dependencies are tracked on first sight; an unknown target name
    /// fails with the first offender.
    pub fn resolve(&mut self, facts: &FactTracker) -> Result<()> {
        let mut resolved = Vec::with_capacity(self.targets.len());
        for target in &self.targets {
            let mut directs = Vec::with_capacity(target.dependencies.len());
            for dep in &target.dependencies {
                let node = match dep {
                    DependencyRef::Fact(name) => NodeRef::Fact(facts.get_or_create(name)),
                    DependencyRef::Target(name) => match self.lookup(name) {
                        Some(id) => NodeRef::Target(id),
                        None => {
                            return Err(ResolverError::UnresolvedDependency {
                                target: target.name.clone(),
                                dependency: name.clone(),
                            })
                        }
                    },
                };
                directs.push(node);
            }
            resolved.push(directs);
        }

        for (target, directs) in self.targets.iter_mut().zip(resolved) {
            target.directs = directs;
        }
        Ok(())
    }

    /// Re-sort every target.
    ///
    /// Targets whose subgraph has a cycle lose their plan; the remaining
    /// ones are still sorted. Returns the cycle error of the first failing
    /// target, if any.
    pub fn sort_all(&mut self, facts: &FactTracker) -> Result<()> {
        let directs: Vec<Vec<NodeRef>> = self.targets.iter().map(|t| t.directs.clone()).collect();
        let graph = DependencyGraph::build(facts.len(), &directs);

        let mut first_error = None;
        for index in 0..self.targets.len() {
            let id = TargetId::new(index);
            match graph.sort(id) {
                Ok(plan) => self.targets[index].set_plan(plan),
                Err(edge) => {
                    let err = self.cycle_error(id, edge, facts);
                    warn!("{}", err);
                    self.targets[index].clear_plan(Some(edge));
                    first_error.get_or_insert(err);
                }
            }
        }

        match first_error {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }

    fn cycle_error(&self, id: TargetId, edge: CycleEdge, facts: &FactTracker) -> ResolverError {
        ResolverError::Cycle {
            target: self.node_name(&NodeRef::Target(id), facts),
            from: self.node_name(&edge.from, facts),
            to: self.node_name(&NodeRef::Target(edge.to), facts),
        }
    }

    /// Error explaining why a target cannot be updated, if it cannot.
    pub fn check_prepared(&self, id: TargetId, facts: &FactTracker) -> Result<()> {
        let target = self.get(id).ok_or(ResolverError::UnknownTargetId(id))?;
        if target.prepared {
            return Ok(());
        }
        Err(match target.cycle {
            Some(edge) => self.cycle_error(id, edge, facts),
            None => ResolverError::NotPrepared(target.name.clone()),
        })
    }

    /// Whether any tracked fact changed since the target was last updated.
    ///
    /// A target that tracks no facts is always older.
    pub fn older_than_facts(&self, id: TargetId, facts: &FactTracker) -> bool {
        let Some(target) = self.get(id) else {
            return false;
        };
        if target.update_facts.is_empty() {
            return true;
        }
        target
            .update_facts
            .iter()
            .zip(&target.fact_stamps)
            .any(|(fact, cached)| match cached {
                Some(seen) => facts.stamp(*fact) > *seen,
                None => true,
            })
    }

    /// Whether any dependency target was updated after this one.
    pub fn older_than_targets(&self, id: TargetId) -> bool {
        let Some(target) = self.get(id) else {
            return false;
        };
        target
            .update_targets
            .iter()
            .filter(|dep| **dep != id)
            .filter_map(|dep| self.get(*dep))
            .any(|dep| dep.stamp > target.stamp)
    }

    /// Whether the target is stale.
    pub fn needs_update(&self, id: TargetId, facts: &FactTracker) -> bool {
        self.older_than_facts(id, facts) || self.older_than_targets(id)
    }

    /// Hand out a fresh stamp.
    pub(crate) fn next_stamp(&mut self) -> Stamp {
        self.counter += 1;
        self.counter
    }

    /// Save the stamps of the given targets.
    pub(crate) fn snapshot(&self, ids: &[TargetId]) -> StampSnapshot {
        StampSnapshot {
            entries: ids
                .iter()
                .filter_map(|id| self.get(*id).map(|t| (*id, t.stamp, t.fact_stamps.clone())))
                .collect(),
        }
    }

    /// Restore saved stamps.
    pub(crate) fn restore(&mut self, snapshot: StampSnapshot) {
        for (id, stamp, fact_stamps) in snapshot.entries {
            if let Some(target) = self.get_mut(id) {
                target.stamp = stamp;
                target.fact_stamps = fact_stamps;
            }
        }
    }

    /// Record the current fact stamps as seen by a target.
    pub(crate) fn observe_facts(&mut self, id: TargetId, facts: &FactTracker) {
        if let Some(target) = self.get_mut(id) {
            target.fact_stamps = target
                .update_facts
                .iter()
                .map(|f| Some(facts.stamp(*f)))
                .collect();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use polres_core::{Classify, ErrorClass};
    use polres_storage::{FactStore, MemoryStore};
    use std::rc::Rc;

    fn deps(names: &[&str]) -> Vec<DependencyRef> {
        names.iter().map(|n| DependencyRef::parse(n)).collect()
    }

    fn setup() -> (Rc<MemoryStore>, FactTracker, TargetRegistry) {
        let store = Rc::new(MemoryStore::new());
        let mut facts = FactTracker::new(store.clone());
        facts.subscribe(Rc::new(|| {}));
        (store, facts, TargetRegistry::new())
    }

    #[test]
    fn test_duplicate_name() {
        let (_store, _facts, mut reg) = setup();
        reg.insert("a", vec![], None).unwrap();
        let err = reg.insert("a", vec![], None).unwrap_err();
        assert_eq!(err.class(), ErrorClass::Exists);
        assert_eq!(reg.len(), 1);
    }

    #[test]
    fn test_resolve_and_sort() {
        let (_store, facts, mut reg) = setup();
        let a = reg.insert("a", deps(&["$f"]), None).unwrap();
        let b = reg.insert("b", deps(&["a", "$g"]), None).unwrap();
        reg.resolve(&facts).unwrap();
        reg.sort_all(&facts).unwrap();

        let f = facts.find("$f").unwrap();
        let g = facts.find("$g").unwrap();
        let target = reg.get(b).unwrap();
        assert_eq!(target.directs(), &[NodeRef::Target(a), NodeRef::Fact(g)]);
        assert_eq!(target.update_targets(), &[a, b]);
        assert_eq!(target.update_facts(), &[f, g]);
        assert_eq!(target.fact_stamps(), &[None, None]);
        assert!(target.is_prepared());
    }

    #[test]
    fn test_unresolved_target() {
        let (_store, facts, mut reg) = setup();
        reg.insert("b", deps(&["missing"]), None).unwrap();
        let err = reg.resolve(&facts).unwrap_err();
        assert_eq!(err.class(), ErrorClass::NotFound);
    }

    #[test]
    fn test_cycle_marks_only_affected_targets() {
        let (_store, facts, mut reg) = setup();
        let a = reg.insert("a", deps(&["b"]), None).unwrap();
        let b = reg.insert("b", deps(&["a"]), None).unwrap();
        let u = reg.insert("u", deps(&["$f"]), None).unwrap();
        reg.resolve(&facts).unwrap();

        let err = reg.sort_all(&facts).unwrap_err();
        assert_eq!(err.class(), ErrorClass::Loop);
        assert!(!reg.get(a).unwrap().is_prepared());
        assert!(!reg.get(b).unwrap().is_prepared());
        assert!(reg.get(u).unwrap().is_prepared());
        assert_eq!(reg.check_prepared(a, &facts).unwrap_err().class(), ErrorClass::Loop);
        assert!(reg.check_prepared(u, &facts).is_ok());
    }

    #[test]
    fn test_staleness() {
        let (store, facts, mut reg) = setup();
        let a = reg.insert("a", deps(&["$f"]), None).unwrap();
        let b = reg.insert("b", deps(&["a"]), None).unwrap();
        let alias = reg.insert("alias", vec![], None).unwrap();
        reg.resolve(&facts).unwrap();
        reg.sort_all(&facts).unwrap();

        // never observed
        assert!(reg.needs_update(a, &facts));
        assert!(reg.older_than_facts(alias, &facts));

        reg.observe_facts(a, &facts);
        reg.observe_facts(b, &facts);
        assert!(!reg.older_than_facts(a, &facts));

        store.upsert("f", "k", 1.into()).unwrap();
        assert!(reg.older_than_facts(a, &facts));
        assert!(reg.older_than_facts(b, &facts));

        reg.observe_facts(b, &facts);
        let stamp = reg.next_stamp();
        reg.get_mut(a).unwrap().stamp = stamp;
        assert!(reg.older_than_targets(b));
        assert!(!reg.older_than_targets(a));
    }

    #[test]
    fn test_snapshot_restore() {
        let (_store, facts, mut reg) = setup();
        let a = reg.insert("a", deps(&["$f"]), None).unwrap();
        reg.resolve(&facts).unwrap();
        reg.sort_all(&facts).unwrap();

        let saved = reg.snapshot(&[a]);
        let stamp = reg.next_stamp();
        reg.get_mut(a).unwrap().stamp = stamp;
        reg.observe_facts(a, &facts);
        reg.restore(saved);

        let target = reg.get(a).unwrap();
        assert_eq!(target.stamp(), 0);
        assert_eq!(target.fact_stamps(), &[None]);
    }

    #[test]
    fn test_resort_keeps_observed_stamps() {
        let (_store, facts, mut reg) = setup();
        let a = reg.insert("a", deps(&["$f"]), None).unwrap();
        reg.resolve(&facts).unwrap();
        reg.sort_all(&facts).unwrap();
        reg.observe_facts(a, &facts);

        reg.insert("b", deps(&["$g", "a"]), None).unwrap();
        reg.resolve(&facts).unwrap();
        reg.sort_all(&facts).unwrap();
        assert_eq!(reg.get(a).unwrap().fact_stamps(), &[Some(0)]);
    }

    #[test]
    fn test_truncate() {
        let (_store, _facts, mut reg) = setup();
        reg.insert("a", vec![], None).unwrap();
        reg.insert("b", vec![], None).unwrap();
        reg.truncate(1);
        assert_eq!(reg.len(), 1);
        assert!(reg.lookup("b").is_none());
        assert!(reg.lookup("a").is_some());
    }
}
