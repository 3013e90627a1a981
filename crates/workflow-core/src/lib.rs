//! Workflow Core - canonical graph model for a visual pipeline editor
//!
//! This crate keeps a canonical logical workflow graph consistent with
//! the things that observe and drive it:
//!
//! - A rendering graph the user manipulates directly (view sync)
//! - An undo/redo history of commands
//! - A validation engine recomputed on every settled mutation
//! - An asynchronous schema propagation service that pushes upstream
//!   attribute changes into downstream operator configurations
//!
//! # Architecture
//!
//! ```text
//! gesture -> ViewSyncBridge -> WorkflowActions -> WorkflowGraph
//!                                   |                 |
//!                             UndoRedoStack      WorkflowEvent fan-out
//!                                                     |
//!                     +---------------+---------------+---------------+
//!                     |               |               |               |
//!               ViewSyncBridge  ValidationEngine  SchemaPropagation  EventSink
//! ```
//!
//! `WorkflowSession` owns all of these for one open workflow.
//!
//! # Example
//!
//! ```ignore
//! use workflow_core::{NullSurface, OperatorMetadataRegistry, Point, WorkflowSession};
//!
//! let registry = Arc::new(OperatorMetadataRegistry::from_json(metadata_json)?);
//! let mut session = WorkflowSession::new(registry.clone(), NullSurface, EditorConfig::default());
//!
//! let scan = registry.new_operator("CSVFileScan")?;
//! session.add_operator(scan, Point::new(0.0, 0.0))?;
//! session.undo()?;
//! ```

pub mod actions;
pub mod builder;
pub mod command;
pub mod config;
pub mod constants;
pub mod error;
pub mod events;
pub mod graph;
pub mod persistence;
pub mod registry;
pub mod schema;
pub mod session;
pub mod types;
pub mod undo;
pub mod validation;
pub mod view_sync;

// Re-export key types
pub use actions::WorkflowActions;
pub use builder::WorkflowBuilder;
pub use command::{Command, GraphChange};
pub use config::{ConfigError, EditorConfig};
pub use error::{EntityKind, Result, WorkflowError};
pub use events::{EventSink, EventStream, NullEventSink, VecEventSink, WorkflowEvent};
pub use graph::WorkflowGraph;
pub use persistence::WorkflowContent;
pub use registry::{
    AutofillField, AutofillKind, GroupInfo, OperatorAdditionalMetadata, OperatorMetadata,
    OperatorMetadataRegistry, OperatorSchema, OperatorTypeDescriptor,
};
pub use schema::{
    DynamicSchemaOverlay, HttpSchemaInferenceClient, PropagationApplied, PropagationDriver,
    PropagationOutcome, PropagationRequest, SchemaAttribute, SchemaInferenceClient,
    SchemaPropagation, SchemaPropagationRequest, SchemaPropagationResponse,
};
pub use session::WorkflowSession;
pub use types::{
    Breakpoint, LinkId, LinkSnapshot, LogicalPort, OperatorId, OperatorLink, OperatorPredicate,
    Point, PortDescription, PortId,
};
pub use undo::{ReplayState, UndoRedoStack};
pub use validation::{OperatorValidation, ValidationEngine, WorkflowValidation};
pub use view_sync::{
    LinkEnd, LogicalRequest, NullSurface, RecordingSurface, RenderSurface, ViewSyncBridge,
    VisualEnd, VisualGesture,
};
