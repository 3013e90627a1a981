//! Event types for streaming workflow changes
//!
//! Events are emitted by the canonical graph on every mutation and by
//! the session for highlight, validation and propagation updates.
//! Consumers (renderers, autosave, UI panels) subscribe through
//! [`EventSink`].

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::types::{Breakpoint, LinkId, OperatorId, OperatorLink, OperatorPredicate, Point};

/// Trait for receiving workflow events
///
/// This abstracts over the transport mechanism (UI bridge, mpsc, etc.)
/// so the core can be hosted in different contexts.
pub trait EventSink: Send + Sync {
    /// Send an event
    ///
    /// Returns an error if the event could not be delivered (e.g., channel closed)
    fn send(&self, event: WorkflowEvent) -> Result<(), EventError>;
}

/// Error when sending events fails
#[derive(Debug, Clone)]
pub struct EventError {
    pub message: String,
}

impl std::fmt::Display for EventError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Event error: {}", self.message)
    }
}

impl std::error::Error for EventError {}

impl EventError {
    pub fn channel_closed() -> Self {
        Self {
            message: "Channel closed".to_string(),
        }
    }
}

/// The stream an event belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventStream {
    OperatorAdded,
    OperatorDeleted,
    LinkAdded,
    LinkDeleted,
    PropertyChanged,
    /// Disabled flags, breakpoints and positions
    Auxiliary,
    Highlight,
    Validation,
    Modification,
    Propagation,
}

/// Events emitted while a workflow is being edited
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum WorkflowEvent {
    /// An operator entered the graph
    #[serde(rename_all = "camelCase")]
    OperatorAdded {
        operator: OperatorPredicate,
        position: Point,
    },

    /// An operator left the graph
    #[serde(rename_all = "camelCase")]
    OperatorDeleted { operator: OperatorPredicate },

    /// A link entered the graph
    #[serde(rename_all = "camelCase")]
    LinkAdded { link: OperatorLink },

    /// A link left the graph
    #[serde(rename_all = "camelCase")]
    LinkDeleted { link: OperatorLink },

    /// An operator's property document was replaced
    #[serde(rename_all = "camelCase")]
    PropertyChanged {
        #[serde(rename = "operatorID")]
        operator_id: OperatorId,
        old_properties: serde_json::Value,
        new_properties: serde_json::Value,
    },

    /// An operator was disabled or re-enabled
    #[serde(rename_all = "camelCase")]
    OperatorDisabledChanged {
        #[serde(rename = "operatorID")]
        operator_id: OperatorId,
        disabled: bool,
    },

    /// A link breakpoint was set or removed
    #[serde(rename_all = "camelCase")]
    BreakpointChanged {
        #[serde(rename = "linkID")]
        link_id: LinkId,
        breakpoint: Option<Breakpoint>,
    },

    /// An operator moved on the canvas
    #[serde(rename_all = "camelCase")]
    OperatorMoved {
        #[serde(rename = "operatorID")]
        operator_id: OperatorId,
        position: Point,
    },

    /// Operators were highlighted on the canvas
    #[serde(rename_all = "camelCase")]
    OperatorsHighlighted {
        #[serde(rename = "operatorIDs")]
        operator_ids: Vec<OperatorId>,
    },

    /// Operators were unhighlighted on the canvas
    #[serde(rename_all = "camelCase")]
    OperatorsUnhighlighted {
        #[serde(rename = "operatorIDs")]
        operator_ids: Vec<OperatorId>,
    },

    /// An operator's validity changed (or it was validated for the first time)
    #[serde(rename_all = "camelCase")]
    OperatorValidityChanged {
        #[serde(rename = "operatorID")]
        operator_id: OperatorId,
        is_valid: bool,
        errors: BTreeMap<String, String>,
    },

    /// An operator's validation entry was dropped because the operator was deleted
    #[serde(rename_all = "camelCase")]
    OperatorValidationCleared {
        #[serde(rename = "operatorID")]
        operator_id: OperatorId,
    },

    /// Graph modification was enabled or disabled (e.g., during execution)
    #[serde(rename_all = "camelCase")]
    ModificationEnabledChanged { enabled: bool },

    /// An operator's dynamic schema changed after propagation
    #[serde(rename_all = "camelCase")]
    SchemaOverlayChanged {
        #[serde(rename = "operatorID")]
        operator_id: OperatorId,
        schema: serde_json::Value,
    },

    /// A propagation request failed; previous schemas are kept
    #[serde(rename_all = "camelCase")]
    PropagationFailed { sequence: u64, error: String },
}

impl WorkflowEvent {
    /// Classify this event into its stream
    pub fn stream(&self) -> EventStream {
        match self {
            Self::OperatorAdded { .. } => EventStream::OperatorAdded,
            Self::OperatorDeleted { .. } => EventStream::OperatorDeleted,
            Self::LinkAdded { .. } => EventStream::LinkAdded,
            Self::LinkDeleted { .. } => EventStream::LinkDeleted,
            Self::PropertyChanged { .. } => EventStream::PropertyChanged,
            Self::OperatorDisabledChanged { .. }
            | Self::BreakpointChanged { .. }
            | Self::OperatorMoved { .. } => EventStream::Auxiliary,
            Self::OperatorsHighlighted { .. } | Self::OperatorsUnhighlighted { .. } => {
                EventStream::Highlight
            }
            Self::OperatorValidityChanged { .. } | Self::OperatorValidationCleared { .. } => {
                EventStream::Validation
            }
            Self::ModificationEnabledChanged { .. } => EventStream::Modification,
            Self::SchemaOverlayChanged { .. } | Self::PropagationFailed { .. } => {
                EventStream::Propagation
            }
        }
    }

    /// Whether this event changes graph shape or operator configuration,
    /// i.e. whether it invalidates upstream schema information
    pub fn affects_schema(&self) -> bool {
        matches!(
            self,
            Self::OperatorAdded { .. }
                | Self::OperatorDeleted { .. }
                | Self::LinkAdded { .. }
                | Self::LinkDeleted { .. }
                | Self::PropertyChanged { .. }
                | Self::OperatorDisabledChanged { .. }
        )
    }

    /// Whether this event can change validation results
    pub fn affects_validation(&self) -> bool {
        self.affects_schema()
    }
}

/// A no-op event sink that discards all events
///
/// Useful for testing or when events aren't needed.
pub struct NullEventSink;

impl EventSink for NullEventSink {
    fn send(&self, _event: WorkflowEvent) -> Result<(), EventError> {
        Ok(())
    }
}

/// A vector-based event sink that collects events
///
/// Useful for testing to verify events were emitted correctly.
pub struct VecEventSink {
    events: parking_lot::Mutex<Vec<WorkflowEvent>>,
}

impl VecEventSink {
    pub fn new() -> Self {
        Self {
            events: parking_lot::Mutex::new(Vec::new()),
        }
    }

    /// Get all collected events
    pub fn events(&self) -> Vec<WorkflowEvent> {
        self.events.lock().clone()
    }

    /// Get the collected events of one stream
    pub fn events_in(&self, stream: EventStream) -> Vec<WorkflowEvent> {
        self.events
            .lock()
            .iter()
            .filter(|e| e.stream() == stream)
            .cloned()
            .collect()
    }

    /// Clear all collected events
    pub fn clear(&self) {
        self.events.lock().clear();
    }
}

impl Default for VecEventSink {
    fn default() -> Self {
        Self::new()
    }
}

impl EventSink for VecEventSink {
    fn send(&self, event: WorkflowEvent) -> Result<(), EventError> {
        self.events.lock().push(event);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_vec_event_sink() {
        let sink = VecEventSink::new();

        sink.send(WorkflowEvent::OperatorMoved {
            operator_id: "op1".to_string(),
            position: Point::new(1.0, 2.0),
        })
        .unwrap();
        sink.send(WorkflowEvent::ModificationEnabledChanged { enabled: false })
            .unwrap();

        assert_eq!(sink.events().len(), 2);
        assert_eq!(sink.events_in(EventStream::Modification).len(), 1);

        sink.clear();
        assert!(sink.events().is_empty());
    }

    #[test]
    fn test_null_event_sink() {
        let sink = NullEventSink;
        // Should not panic
        sink.send(WorkflowEvent::ModificationEnabledChanged { enabled: true })
            .unwrap();
    }

    #[test]
    fn test_event_serialization_is_tagged() {
        let event = WorkflowEvent::OperatorDisabledChanged {
            operator_id: "op1".to_string(),
            disabled: true,
        };
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["type"], "operatorDisabledChanged");
        assert_eq!(json["operatorID"], "op1");
        assert!(json.get("operatorId").is_none());

        let event = WorkflowEvent::BreakpointChanged {
            link_id: "l1".to_string(),
            breakpoint: None,
        };
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["linkID"], "l1");

        let event = WorkflowEvent::OperatorsHighlighted {
            operator_ids: vec!["op1".to_string()],
        };
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["operatorIDs"], serde_json::json!(["op1"]));
    }

    #[test]
    fn test_moves_do_not_affect_schema() {
        let moved = WorkflowEvent::OperatorMoved {
            operator_id: "op1".to_string(),
            position: Point::default(),
        };
        assert!(!moved.affects_schema());
        assert_eq!(moved.stream(), EventStream::Auxiliary);
    }
}
