//! The resolver facade.

use polres_core::{
    DependencyRef, Definitions, NodeRef, ResolverConfig, ScriptType, ScriptValue, TargetDef,
    TargetId, VarId,
};
use polres_script::{CompiledScript, InterpreterRegistry, Script, ScriptError, DEFAULT_ALIAS};
use polres_storage::FactStore;
use std::cell::{Cell, RefCell};
use std::io::Write;
use std::rc::Rc;
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::autoupdate::AutoUpdate;
use crate::context::ContextTable;
use crate::error::{ResolverError, Result};
use crate::events::EventBus;
use crate::fact::{FactInfo, FactTracker};
use crate::mainloop::EventLoop;
use crate::scheduler::{Scheduler, UpdateReport};
use crate::target::{Target, TargetRegistry};

/// A resolver shared with its auto-update callback.
pub type SharedResolver = Rc<RefCell<Resolver>>;

/// Resolves targets against a fact store.
///
/// ```text
/// definitions -> registry -> graph -> sorted plans
/// request -> context frame -> plan walk -> scripts -> stamps -> events
/// ```
pub struct Resolver {
    config: ResolverConfig,
    store: Rc<dyn FactStore>,
    interpreters: Arc<InterpreterRegistry>,
    facts: FactTracker,
    targets: TargetRegistry,
    context: ContextTable,
    events: EventBus,
    level: Rc<Cell<u32>>,
    autoupdate: Rc<RefCell<AutoUpdate>>,
}

impl Resolver {
    /// Create a resolver using the process-wide interpreter registry.
    pub fn new(store: Rc<dyn FactStore>, config: ResolverConfig) -> Self {
        Self::with_interpreters(store, config, polres_script::init())
    }

    /// Create a resolver with its own interpreter registry.
    pub fn with_interpreters(
        store: Rc<dyn FactStore>,
        config: ResolverConfig,
        interpreters: Arc<InterpreterRegistry>,
    ) -> Self {
        let level = Rc::new(Cell::new(0));
        let autoupdate = Rc::new(RefCell::new(AutoUpdate::new()));

        let mut facts = FactTracker::new(store.clone());
        let hook_level = level.clone();
        let hook_auto = Rc::downgrade(&autoupdate);
        facts.subscribe(Rc::new(move || {
            if hook_level.get() != 0 {
                return;
            }
            if let Some(auto) = hook_auto.upgrade() {
                if let Ok(mut auto) = auto.try_borrow_mut() {
                    auto.schedule();
                }
            }
        }));

        Self {
            config,
            store,
            interpreters,
            facts,
            targets: TargetRegistry::new(),
            context: ContextTable::new(),
            events: EventBus::new(),
            level,
            autoupdate,
        }
    }

    /// Create a resolver from a definitions document.
    ///
    /// Either every target is registered or the load fails. Targets caught
    /// in a dependency cycle are kept but cannot be updated.
    pub fn from_definitions(
        defs: &Definitions,
        store: Rc<dyn FactStore>,
        config: ResolverConfig,
    ) -> Result<Self> {
        Self::from_definitions_with(defs, store, config, polres_script::init())
    }

    /// [`Resolver::from_definitions`] with an explicit interpreter registry.
    pub fn from_definitions_with(
        defs: &Definitions,
        store: Rc<dyn FactStore>,
        config: ResolverConfig,
        interpreters: Arc<InterpreterRegistry>,
    ) -> Result<Self> {
        defs.validate()?;
        let config = defs.apply_to(config);
        let mut resolver = Self::with_interpreters(store, config, interpreters);

        for def in &defs.targets {
            let script = resolver.script_for(def)?;
            resolver
                .targets
                .insert(&def.name, def.dependency_refs(), script)?;
        }
        resolver.targets.resolve(&resolver.facts)?;
        if let Err(e) = resolver.targets.sort_all(&resolver.facts) {
            warn!("definitions contain unsortable targets: {}", e);
        }

        info!(
            "loaded {} targets over {} facts",
            resolver.targets.len(),
            resolver.facts.len()
        );
        Ok(resolver)
    }

    /// Active configuration.
    pub fn config(&self) -> &ResolverConfig {
        &self.config
    }

    /// The fact store.
    pub fn store(&self) -> Rc<dyn FactStore> {
        self.store.clone()
    }

    /// The lifecycle event bus.
    pub fn events(&self) -> &EventBus {
        &self.events
    }

    /// Current resolution nesting level.
    pub fn level(&self) -> u32 {
        self.level.get()
    }

    // === Registration ===

    /// Register a target.
    pub fn add_target(&mut self, def: &TargetDef) -> Result<TargetId> {
        let script = self.script_for(def)?;
        self.register(&def.name, def.dependency_refs(), script)
    }

    /// Register a script-less target that only aggregates its dependencies.
    pub fn add_alias(&mut self, name: &str, depends: &[&str]) -> Result<TargetId> {
        let deps = depends.iter().map(|d| DependencyRef::parse(d)).collect();
        self.register(name, deps, None)
    }

    /// Register a target whose script was compiled elsewhere.
    pub fn add_precompiled_target(
        &mut self,
        name: &str,
        depends: &[&str],
        script_type: &str,
        compiled: CompiledScript,
    ) -> Result<TargetId> {
        let ty = self.interpreter_name(script_type);
        let interpreter = self
            .interpreters
            .lookup(ty)
            .ok_or_else(|| ScriptError::UnknownInterpreter(ty.to_string()))?;
        let deps = depends.iter().map(|d| DependencyRef::parse(d)).collect();
        self.register(name, deps, Some(Script::precompiled(interpreter, compiled)))
    }

    fn interpreter_name<'a>(&'a self, script_type: &'a str) -> &'a str {
        if script_type == DEFAULT_ALIAS {
            &self.config.default_interpreter
        } else {
            script_type
        }
    }

    fn script_for(&self, def: &TargetDef) -> Result<Option<Script>> {
        let Some(spec) = &def.script else {
            return Ok(None);
        };
        let ty = self.interpreter_name(&spec.script_type);
        let mut script = self.interpreters.create_script(ty, &spec.source)?;
        script.compile()?;
        Ok(Some(script))
    }

    fn register(
        &mut self,
        name: &str,
        deps: Vec<DependencyRef>,
        script: Option<Script>,
    ) -> Result<TargetId> {
        for dep in &deps {
            if let DependencyRef::Target(dep_name) = dep {
                if dep_name != name && self.targets.lookup(dep_name).is_none() {
                    return Err(ResolverError::UnresolvedDependency {
                        target: name.to_string(),
                        dependency: dep_name.clone(),
                    });
                }
            }
        }

        let len = self.targets.len();
        let nfact = self.facts.len();
        let id = self.targets.insert(name, deps, script)?;
        let result = self
            .targets
            .resolve(&self.facts)
            .and_then(|()| {
                if let Err(e) = self.targets.sort_all(&self.facts) {
                    debug!("registry has unsortable targets: {}", e);
                }
                self.targets.check_prepared(id, &self.facts)
            });

        if let Err(e) = result {
            warn!("rejected target '{}': {}", name, e);
            self.targets.truncate(len);
            self.facts.truncate(nfact);
            self.resort();
            return Err(e);
        }
        Ok(id)
    }

    fn resort(&mut self) {
        let result = self
            .targets
            .resolve(&self.facts)
            .and_then(|()| self.targets.sort_all(&self.facts));
        if let Err(e) = result {
            debug!("registry has unsortable targets: {}", e);
        }
    }

    // === Introspection ===

    /// Look up a target id by name.
    pub fn target_id(&self, name: &str) -> Option<TargetId> {
        self.targets.lookup(name)
    }

    /// Borrow a target by name.
    pub fn target(&self, name: &str) -> Option<&Target> {
        self.targets.get(self.targets.lookup(name)?)
    }

    /// All targets in registration order.
    pub fn targets(&self) -> impl Iterator<Item = (TargetId, &Target)> {
        self.targets.iter()
    }

    /// Snapshot of every tracked fact.
    pub fn facts(&self) -> Vec<FactInfo> {
        self.facts.infos()
    }

    /// Whether a target is stale right now.
    pub fn needs_update(&self, name: &str) -> Result<bool> {
        let id = self
            .targets
            .lookup(name)
            .ok_or_else(|| ResolverError::UnknownTarget(name.to_string()))?;
        Ok(self.targets.needs_update(id, &self.facts))
    }

    // === Context variables ===

    /// Declare a context variable.
    pub fn declare_variable(&mut self, name: &str, ty: ScriptType) -> Result<VarId> {
        Ok(self.context.declare(name, ty)?)
    }

    /// Id of a declared variable.
    pub fn variable_id(&self, name: &str) -> Option<VarId> {
        self.context.id_of(name)
    }

    /// Current value of a variable.
    pub fn get_variable(&self, id: VarId) -> Result<ScriptValue> {
        Ok(self.context.get(id)?.clone())
    }

    /// Current value of a variable, by name.
    pub fn get_variable_by_name(&self, name: &str) -> Result<ScriptValue> {
        Ok(self.context.get_by_name(name)?.clone())
    }

    /// Bind a variable in the innermost frame.
    pub fn set_variable(&mut self, id: VarId, value: &ScriptValue) -> Result<()> {
        Ok(self.context.set(id, value)?)
    }

    /// Bind a variable in the innermost frame, by name.
    pub fn set_variable_by_name(&mut self, name: &str, value: &ScriptValue) -> Result<()> {
        Ok(self.context.set_by_name(name, value)?)
    }

    /// Open a context frame.
    pub fn push_frame(&mut self) {
        self.context.push_frame();
    }

    /// Close the innermost context frame.
    pub fn pop_frame(&mut self) -> Result<()> {
        Ok(self.context.pop_frame()?)
    }

    /// The context table.
    pub fn context(&self) -> &ContextTable {
        &self.context
    }

    // === Resolution ===

    /// Update a target, binding `vars` in a fresh frame for the duration.
    ///
    /// Variables that are not declared yet are declared untyped.
    pub fn update(&mut self, name: &str, vars: &[(&str, ScriptValue)]) -> Result<UpdateReport> {
        let id = self
            .targets
            .lookup(name)
            .ok_or_else(|| ResolverError::UnknownTarget(name.to_string()))?;

        self.context.push_frame();
        let result = self.bind_named(vars).and_then(|()| self.update_by_id(id));
        self.close_request_frame();
        result
    }

    /// Update a target, binding parallel id and value arrays in a fresh
    /// frame for the duration.
    pub fn update_with_ids(
        &mut self,
        name: &str,
        ids: &[VarId],
        values: &[ScriptValue],
    ) -> Result<UpdateReport> {
        if ids.len() != values.len() {
            return Err(ResolverError::InvalidArgument(format!(
                "{} variable ids but {} values",
                ids.len(),
                values.len()
            )));
        }
        let id = self
            .targets
            .lookup(name)
            .ok_or_else(|| ResolverError::UnknownTarget(name.to_string()))?;

        self.context.push_frame();
        let result = ids
            .iter()
            .zip(values)
            .try_for_each(|(var, value)| self.context.set(*var, value))
            .map_err(ResolverError::from)
            .and_then(|()| self.update_by_id(id));
        self.close_request_frame();
        result
    }

    /// Update a target with the currently bound variables.
    pub fn update_by_id(&mut self, id: TargetId) -> Result<UpdateReport> {
        Scheduler {
            targets: &mut self.targets,
            facts: &self.facts,
            context: &self.context,
            store: &*self.store,
            events: &self.events,
            level: &self.level,
        }
        .run(id)
    }

    fn bind_named(&mut self, vars: &[(&str, ScriptValue)]) -> Result<()> {
        for (name, value) in vars {
            let id = self.context.declare(name, ScriptType::Unspecified)?;
            self.context.set(id, value)?;
        }
        Ok(())
    }

    fn close_request_frame(&mut self) {
        if let Err(e) = self.context.pop_frame() {
            warn!("unbalanced context frames: {}", e);
        }
    }

    // === Auto-update ===

    /// Synthesize the auto-update target `name` over every target that
    /// tracks facts, and resolve it on `event_loop` whenever a fact store
    /// transaction ends.
    pub fn enable_auto_update(
        shared: &SharedResolver,
        name: &str,
        event_loop: Rc<dyn EventLoop>,
    ) -> Result<TargetId> {
        let mut resolver = shared.borrow_mut();
        let deps: Vec<DependencyRef> = resolver
            .targets
            .iter()
            .filter(|(_, t)| !t.update_facts().is_empty())
            .map(|(_, t)| DependencyRef::Target(t.name().to_string()))
            .collect();
        let count = deps.len();

        let id = resolver.register(name, deps, None)?;
        resolver
            .autoupdate
            .borrow_mut()
            .configure(id, event_loop, Rc::downgrade(shared));
        info!("auto-update target '{}' covers {} targets", name, count);
        Ok(id)
    }

    /// Drop a pending auto-update request.
    pub fn cancel_auto_update(&self) {
        self.autoupdate.borrow_mut().cancel();
    }

    /// The auto-update target, if enabled.
    pub fn auto_update_target(&self) -> Option<TargetId> {
        self.autoupdate.borrow().target()
    }

    /// Number of auto-update requests received.
    pub fn auto_update_requests(&self) -> u64 {
        self.autoupdate.borrow().requests()
    }

    /// Resolve the auto-update target now. Returns `None` if auto-update
    /// is not enabled.
    pub fn run_auto_update(&mut self) -> Option<Result<UpdateReport>> {
        let mut auto = self.autoupdate.borrow_mut();
        auto.cancel();
        let target = auto.target();
        drop(auto);
        let target = target?;

        debug!("running auto-update");
        let result = self.update_by_id(target);
        if let Err(e) = &result {
            warn!("auto-update failed: {}", e);
        }
        Some(result)
    }

    // === Dumps ===

    /// Write a listing of the tracked facts.
    pub fn dump_facts(&self, out: &mut dyn Write) -> Result<()> {
        let facts = self.facts.infos();
        writeln!(out, "facts ({}):", facts.len())?;
        for fact in facts {
            let table = fact
                .table
                .map(|t| t.to_string())
                .unwrap_or_else(|| "-".to_string());
            writeln!(
                out,
                "  {:<6} {:<24} table={:<4} stamp={}",
                fact.id.to_string(),
                fact.name,
                table,
                fact.stamp
            )?;
        }
        Ok(())
    }

    /// Write a listing of the targets and their plans.
    pub fn dump_targets(&self, out: &mut dyn Write) -> Result<()> {
        writeln!(out, "targets ({}):", self.targets.len())?;
        for (id, target) in self.targets.iter() {
            let state = if target.is_prepared() { "" } else { " UNPREPARED" };
            writeln!(
                out,
                "  {} '{}' stamp={}{}",
                id,
                target.name(),
                target.stamp(),
                state
            )?;

            if let Some(script) = target.script() {
                let kind = if target.is_precompiled() { "precompiled " } else { "" };
                writeln!(out, "    script: {}{}", kind, script.interpreter_name())?;
            }

            let directs: Vec<String> = target
                .directs()
                .iter()
                .map(|n| self.targets.node_name(n, &self.facts))
                .collect();
            writeln!(out, "    depends: {}", directs.join(", "))?;

            let facts: Vec<String> = target
                .update_facts()
                .iter()
                .zip(target.fact_stamps())
                .map(|(f, seen)| {
                    let name = self.targets.node_name(&NodeRef::Fact(*f), &self.facts);
                    match seen {
                        Some(s) => format!("{}@{}", name, s),
                        None => format!("{}@-", name),
                    }
                })
                .collect();
            writeln!(out, "    facts: {}", facts.join(", "))?;

            let plan: Vec<String> = target
                .update_targets()
                .iter()
                .map(|t| self.targets.node_name(&NodeRef::Target(*t), &self.facts))
                .collect();
            writeln!(out, "    plan: {}", plan.join(" -> "))?;
        }
        Ok(())
    }
}

impl Drop for Resolver {
    fn drop(&mut self) {
        if let Ok(mut auto) = self.autoupdate.try_borrow_mut() {
            auto.teardown();
        }
        self.facts.unsubscribe();
    }
}
