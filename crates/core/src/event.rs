//! Resolver lifecycle events.

use crate::Time;
use serde::{Deserialize, Serialize};

/// Kind of lifecycle notification emitted around a target update.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ResolverEventKind {
    /// An update has begun
    Started,
    /// An update failed and was rolled back
    Failed,
    /// An update completed and was committed
    Done,
}

impl ResolverEventKind {
    /// Event name as published on the host event bus.
    pub fn name(&self) -> &'static str {
        match self {
            ResolverEventKind::Started => "resolver-update-start",
            ResolverEventKind::Failed => "resolver-update-failed",
            ResolverEventKind::Done => "resolver-update-done",
        }
    }
}

impl std::fmt::Display for ResolverEventKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

/// A lifecycle notification.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResolverEvent {
    /// What happened
    pub kind: ResolverEventKind,

    /// Target being updated
    pub target: String,

    /// Resolution nesting level at the time of emission
    pub level: u32,

    /// When it happened
    pub timestamp: Time,
}

impl ResolverEvent {
    /// Create a new event.
    pub fn new(kind: ResolverEventKind, target: impl Into<String>, level: u32) -> Self {
        Self {
            kind,
            target: target.into(),
            level,
            timestamp: chrono::Utc::now(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_event_names() {
        assert_eq!(ResolverEventKind::Started.name(), "resolver-update-start");
        assert_eq!(ResolverEventKind::Failed.name(), "resolver-update-failed");
        assert_eq!(ResolverEventKind::Done.name(), "resolver-update-done");
    }

    #[test]
    fn test_event_serializes() {
        let event = ResolverEvent::new(ResolverEventKind::Done, "audio", 1);
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["kind"], "Done");
        assert_eq!(json["target"], "audio");
        assert_eq!(json["level"], 1);
    }
}
