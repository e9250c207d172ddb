//! Index-based identifiers for resolver entities.
//!
//! Facts, targets and context variables live in append-only vectors, so an
//! identifier is just a stable index into the owning collection.

use serde::{Deserialize, Serialize};

/// Identifier of a tracked fact.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct FactId(usize);

impl FactId {
    /// Create from a raw index.
    pub fn new(index: usize) -> Self {
        Self(index)
    }

    /// Raw index into the fact list.
    pub fn index(self) -> usize {
        self.0
    }
}

impl std::fmt::Display for FactId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "fact#{}", self.0)
    }
}

/// Identifier of a registered target.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct TargetId(usize);

impl TargetId {
    /// Create from a raw index.
    pub fn new(index: usize) -> Self {
        Self(index)
    }

    /// Raw index into the target list.
    pub fn index(self) -> usize {
        self.0
    }
}

impl std::fmt::Display for TargetId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "target#{}", self.0)
    }
}

/// Identifier of a declared context variable.
///
/// Variable ids are 1-based; zero is never handed out.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct VarId(u32);

impl VarId {
    /// Create from a raw 1-based id.
    pub fn new(id: u32) -> Self {
        Self(id)
    }

    /// Raw 1-based id.
    pub fn get(self) -> u32 {
        self.0
    }

    /// Zero-based slot in the declaration table, if the id is valid.
    pub fn slot(self) -> Option<usize> {
        (self.0 as usize).checked_sub(1)
    }
}

impl std::fmt::Display for VarId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "<{}>", self.0)
    }
}

/// A resolved dependency: either a fact or a target.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum NodeRef {
    /// A tracked fact
    Fact(FactId),
    /// A registered target
    Target(TargetId),
}

/// Change stamp used for staleness checks.
pub type Stamp = u32;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_var_id_slot() {
        assert_eq!(VarId::new(1).slot(), Some(0));
        assert_eq!(VarId::new(7).slot(), Some(6));
        assert_eq!(VarId::new(0).slot(), None);
    }

    #[test]
    fn test_display() {
        assert_eq!(FactId::new(3).to_string(), "fact#3");
        assert_eq!(TargetId::new(0).to_string(), "target#0");
        assert_eq!(VarId::new(2).to_string(), "<2>");
    }
}
