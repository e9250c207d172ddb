//! Scoped context variables.
//!
//! Variables are declared once with a name and a type and identified by a
//! [`VarId`] afterwards. Values are bound in frames; a resolution request
//! pushes a frame, binds its parameters, and pops the frame when done.
//! Lookups walk the frames from the innermost outwards.

use polres_core::{ScriptType, ScriptValue, VarId};
use polres_script::VariableScope;
use std::collections::{HashMap, HashSet};
use tracing::debug;

use crate::error::ContextError;

type Result<T> = std::result::Result<T, ContextError>;

/// A declared variable.
#[derive(Debug, Clone, PartialEq)]
pub struct Declaration {
    /// Variable name
    pub name: String,

    /// Declared type
    pub ty: ScriptType,
}

#[derive(Debug, Default)]
struct Frame {
    bindings: Vec<(VarId, ScriptValue)>,
}

/// Table of declared variables and the stack of binding frames.
#[derive(Debug, Default)]
pub struct ContextTable {
    names: HashMap<String, VarId>,
    declarations: Vec<Declaration>,
    frames: Vec<Frame>,
}

impl ContextTable {
    /// Create an empty table.
    pub fn new() -> Self {
        Self::default()
    }

    /// Declare a variable, or return the id of an existing declaration.
    ///
    /// An unspecified declaration adopts the first concrete type asked for.
    pub fn declare(&mut self, name: &str, ty: ScriptType) -> Result<VarId> {
        if let Some(&id) = self.names.get(name) {
            let decl = self.slot_mut(id)?;
            if ty.is_concrete() && decl.ty != ty {
                if decl.ty.is_concrete() {
                    return Err(ContextError::TypeConflict {
                        name: name.to_string(),
                        existing: decl.ty,
                        requested: ty,
                    });
                }
                debug!("variable '{}' is now {}", name, ty);
                decl.ty = ty;
            }
            return Ok(id);
        }

        self.declarations.push(Declaration {
            name: name.to_string(),
            ty,
        });
        let id = VarId::new(self.declarations.len() as u32);
        self.names.insert(name.to_string(), id);
        debug!("declared variable '{}' {} as {}", name, id, ty);
        Ok(id)
    }

    /// Id of a declared variable.
    pub fn id_of(&self, name: &str) -> Option<VarId> {
        self.names.get(name).copied()
    }

    /// Declaration of a variable.
    pub fn declaration(&self, id: VarId) -> Option<&Declaration> {
        self.declarations.get(id.slot()?)
    }

    /// All declarations, in declaration order.
    pub fn declarations(&self) -> &[Declaration] {
        &self.declarations
    }

    /// Number of open frames.
    pub fn depth(&self) -> usize {
        self.frames.len()
    }

    /// Open a new innermost frame.
    pub fn push_frame(&mut self) {
        self.frames.push(Frame::default());
    }

    /// Close the innermost frame, releasing its bindings.
    pub fn pop_frame(&mut self) -> Result<()> {
        self.frames.pop().map(|_| ()).ok_or(ContextError::NothingToPop)
    }

    /// Bind a value in the innermost frame.
    pub fn set(&mut self, id: VarId, value: &ScriptValue) -> Result<()> {
        let decl = self.declaration(id).ok_or(ContextError::UnknownId(id))?;
        if decl.ty.is_concrete() && decl.ty != value.script_type() {
            return Err(ContextError::TypeMismatch {
                name: decl.name.clone(),
                expected: decl.ty,
                got: value.script_type(),
            });
        }

        let frame = self.frames.last_mut().ok_or(ContextError::NoFrame)?;
        match frame.bindings.iter_mut().find(|(v, _)| *v == id) {
            Some((_, slot)) => *slot = value.clone(),
            None => frame.bindings.push((id, value.clone())),
        }
        Ok(())
    }

    /// Innermost binding of a variable.
    pub fn get(&self, id: VarId) -> Result<&ScriptValue> {
        let decl = self.declaration(id).ok_or(ContextError::UnknownId(id))?;
        self.frames
            .iter()
            .rev()
            .find_map(|f| f.bindings.iter().find(|(v, _)| *v == id).map(|(_, value)| value))
            .ok_or_else(|| ContextError::Unset(decl.name.clone()))
    }

    /// Bind a value by variable name.
    pub fn set_by_name(&mut self, name: &str, value: &ScriptValue) -> Result<()> {
        let id = self
            .id_of(name)
            .ok_or_else(|| ContextError::UnknownName(name.to_string()))?;
        self.set(id, value)
    }

    /// Innermost binding of a variable, by name.
    pub fn get_by_name(&self, name: &str) -> Result<&ScriptValue> {
        let id = self
            .id_of(name)
            .ok_or_else(|| ContextError::UnknownName(name.to_string()))?;
        self.get(id)
    }

    fn slot_mut(&mut self, id: VarId) -> Result<&mut Declaration> {
        id.slot()
            .and_then(|slot| self.declarations.get_mut(slot))
            .ok_or(ContextError::UnknownId(id))
    }
}

impl VariableScope for ContextTable {
    fn lookup(&self, name: &str) -> Option<ScriptValue> {
        self.get_by_name(name).ok().cloned()
    }

    fn bindings(&self) -> Vec<(String, ScriptValue)> {
        let mut seen = HashSet::new();
        let mut out = Vec::new();
        for frame in self.frames.iter().rev() {
            for (id, value) in &frame.bindings {
                if !seen.insert(*id) {
                    continue;
                }
                if let Some(decl) = self.declaration(*id) {
                    out.push((decl.name.clone(), value.clone()));
                }
            }
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use polres_core::{Classify, ErrorClass};

    #[test]
    fn test_declare_is_idempotent() {
        let mut ctx = ContextTable::new();
        let a = ctx.declare("volume", ScriptType::Uint32).unwrap();
        assert_eq!(ctx.declare("volume", ScriptType::Uint32).unwrap(), a);
        assert_eq!(ctx.declare("volume", ScriptType::Unspecified).unwrap(), a);
        assert_eq!(a.get(), 1);

        let err = ctx.declare("volume", ScriptType::String).unwrap_err();
        assert_eq!(err.class(), ErrorClass::Exists);
    }

    #[test]
    fn test_unspecified_adopts_type() {
        let mut ctx = ContextTable::new();
        let id = ctx.declare("zone", ScriptType::Unspecified).unwrap();
        assert_eq!(ctx.declare("zone", ScriptType::String).unwrap(), id);
        assert_eq!(ctx.declaration(id).unwrap().ty, ScriptType::String);
    }

    #[test]
    fn test_pop_releases_bindings() {
        let mut ctx = ContextTable::new();
        let x = ctx.declare("x", ScriptType::Int32).unwrap();

        ctx.push_frame();
        ctx.set(x, &ScriptValue::Int32(1)).unwrap();
        assert_eq!(ctx.get(x).unwrap(), &ScriptValue::Int32(1));
        ctx.pop_frame().unwrap();

        assert_eq!(ctx.get(x).unwrap_err().class(), ErrorClass::NotFound);
    }

    #[test]
    fn test_inner_frame_shadows_outer() {
        let mut ctx = ContextTable::new();
        let x = ctx.declare("x", ScriptType::String).unwrap();

        ctx.push_frame();
        ctx.set(x, &"outer".into()).unwrap();
        ctx.push_frame();
        ctx.set(x, &"inner".into()).unwrap();
        assert_eq!(ctx.get_by_name("x").unwrap().as_str(), Some("inner"));
        assert_eq!(ctx.bindings(), vec![("x".to_string(), ScriptValue::from("inner"))]);

        ctx.pop_frame().unwrap();
        assert_eq!(ctx.get_by_name("x").unwrap().as_str(), Some("outer"));
    }

    #[test]
    fn test_set_errors() {
        let mut ctx = ContextTable::new();
        let x = ctx.declare("x", ScriptType::Int32).unwrap();

        assert_eq!(ctx.set(x, &ScriptValue::Int32(1)).unwrap_err(), ContextError::NoFrame);

        ctx.push_frame();
        let err = ctx.set(x, &ScriptValue::Bool(true)).unwrap_err();
        assert_eq!(err.class(), ErrorClass::Invalid);

        let err = ctx.set(VarId::new(9), &ScriptValue::Int32(1)).unwrap_err();
        assert_eq!(err.class(), ErrorClass::NotFound);

        let err = ctx.set(VarId::new(0), &ScriptValue::Int32(1)).unwrap_err();
        assert_eq!(err.class(), ErrorClass::NotFound);
    }

    #[test]
    fn test_pop_without_frame() {
        let mut ctx = ContextTable::new();
        assert_eq!(ctx.pop_frame().unwrap_err().class(), ErrorClass::NotFound);
    }

    #[test]
    fn test_rebinding_in_same_frame_replaces() {
        let mut ctx = ContextTable::new();
        let x = ctx.declare("x", ScriptType::Int32).unwrap();
        ctx.push_frame();
        ctx.set(x, &ScriptValue::Int32(1)).unwrap();
        ctx.set(x, &ScriptValue::Int32(2)).unwrap();
        assert_eq!(ctx.bindings().len(), 1);
        assert_eq!(ctx.lookup("x"), Some(ScriptValue::Int32(2)));
    }
}
