//! Per-workflow editing session
//!
//! A [`WorkflowSession`] is created when a workflow is opened and dropped
//! when it is closed. It owns the command layer (graph and history), the
//! view-sync bridge and its rendering surface, the validation engine and
//! the propagation state.
//!
//! After each public call has settled, the events it produced are fanned
//! out in a fixed order: the surface projection, then validation, then
//! propagation scheduling, and finally the external sinks. Validation
//! therefore always sees the graph after the whole call, never an
//! intermediate state inside a bundle.

use std::sync::Arc;

use crate::actions::WorkflowActions;
use crate::config::EditorConfig;
use crate::error::Result;
use crate::events::{EventSink, WorkflowEvent};
use crate::graph::WorkflowGraph;
use crate::persistence::WorkflowContent;
use crate::registry::OperatorMetadataRegistry;
use crate::schema::{
    HttpSchemaInferenceClient, PropagationApplied, PropagationDriver, PropagationOutcome,
    PropagationRequest, SchemaInferenceClient, SchemaPropagation,
};
use crate::types::{Breakpoint, LogicalPort, OperatorLink, OperatorPredicate, Point};
use crate::undo::UndoRedoStack;
use crate::validation::{OperatorValidation, ValidationEngine, WorkflowValidation};
use crate::view_sync::{RenderSurface, ViewSyncBridge, VisualGesture};

/// Context object for one open workflow
pub struct WorkflowSession<R: RenderSurface> {
    config: EditorConfig,
    actions: WorkflowActions,
    bridge: ViewSyncBridge,
    surface: R,
    validation: ValidationEngine,
    propagation: SchemaPropagation,
    driver: Option<PropagationDriver>,
    sinks: Vec<Arc<dyn EventSink>>,
    /// Bumped whenever the graph changes in a way that affects schemas
    revision: u64,
}

impl<R: RenderSurface> WorkflowSession<R> {
    /// Open an empty workflow
    pub fn new(registry: Arc<OperatorMetadataRegistry>, surface: R, config: EditorConfig) -> Self {
        Self {
            actions: WorkflowActions::new(registry.clone(), &config),
            bridge: ViewSyncBridge::new(),
            surface,
            validation: ValidationEngine::new(registry.clone()),
            propagation: SchemaPropagation::new(registry),
            driver: None,
            sinks: Vec::new(),
            revision: 0,
            config,
        }
    }

    /// Subscribe an external sink to every event
    pub fn add_event_sink(&mut self, sink: Arc<dyn EventSink>) {
        self.sinks.push(sink);
    }

    /// Start automatic propagation through the given client
    ///
    /// Must be called from within a tokio runtime.
    pub fn attach_propagation_client(&mut self, client: Arc<dyn SchemaInferenceClient>) {
        self.driver = Some(PropagationDriver::spawn(
            client,
            self.config.propagation_debounce(),
        ));
        self.schedule_propagation();
    }

    /// Start automatic propagation against the configured endpoint
    ///
    /// Returns `false` if no endpoint is configured.
    pub fn connect_propagation_endpoint(&mut self) -> Result<bool> {
        match HttpSchemaInferenceClient::from_config(&self.config)? {
            Some(client) => {
                log::info!("Schema propagation enabled via {}", client.endpoint());
                self.attach_propagation_client(Arc::new(client));
                Ok(true)
            }
            None => Ok(false),
        }
    }

    // --- read access ---

    pub fn graph(&self) -> &WorkflowGraph {
        self.actions.graph()
    }

    pub fn actions(&self) -> &WorkflowActions {
        &self.actions
    }

    pub fn history(&self) -> &UndoRedoStack {
        self.actions.history()
    }

    pub fn config(&self) -> &EditorConfig {
        &self.config
    }

    pub fn surface(&self) -> &R {
        &self.surface
    }

    pub fn surface_mut(&mut self) -> &mut R {
        &mut self.surface
    }

    pub fn bridge(&self) -> &ViewSyncBridge {
        &self.bridge
    }

    pub fn propagation(&self) -> &SchemaPropagation {
        &self.propagation
    }

    pub fn revision(&self) -> u64 {
        self.revision
    }

    pub fn is_modification_enabled(&self) -> bool {
        self.actions.is_modification_enabled()
    }

    // --- mutations ---

    pub fn add_operator(&mut self, operator: OperatorPredicate, position: Point) -> Result<()> {
        self.run(|a| a.add_operator(operator, position))
    }

    pub fn add_operators_and_links(
        &mut self,
        operators: Vec<(OperatorPredicate, Point)>,
        links: Vec<OperatorLink>,
    ) -> Result<()> {
        self.run(|a| a.add_operators_and_links(operators, links))
    }

    pub fn delete_operator(&mut self, operator_id: &str) -> Result<()> {
        self.run(|a| a.delete_operator(operator_id))
    }

    pub fn delete_operators_and_links(
        &mut self,
        operator_ids: &[String],
        link_ids: &[String],
    ) -> Result<()> {
        self.run(|a| a.delete_operators_and_links(operator_ids, link_ids))
    }

    pub fn add_link(&mut self, link: OperatorLink) -> Result<()> {
        self.run(|a| a.add_link(link))
    }

    pub fn delete_link_with_id(&mut self, link_id: &str) -> Result<()> {
        self.run(|a| a.delete_link_with_id(link_id))
    }

    pub fn delete_link(&mut self, source: &LogicalPort, target: &LogicalPort) -> Result<()> {
        self.run(|a| a.delete_link(source, target))
    }

    pub fn set_operator_property(
        &mut self,
        operator_id: &str,
        properties: serde_json::Value,
    ) -> Result<()> {
        self.run(|a| a.set_operator_property(operator_id, properties))
    }

    pub fn set_operators_disabled(&mut self, operator_ids: &[String], disabled: bool) -> Result<()> {
        self.run(|a| a.set_operators_disabled(operator_ids, disabled))
    }

    pub fn set_link_breakpoint(&mut self, link_id: &str, breakpoint: Breakpoint) -> Result<()> {
        self.run(|a| a.set_link_breakpoint(link_id, breakpoint))
    }

    pub fn remove_link_breakpoint(&mut self, link_id: &str) -> Result<()> {
        self.run(|a| a.remove_link_breakpoint(link_id))
    }

    pub fn move_operator(&mut self, operator_id: &str, position: Point) -> Result<()> {
        self.run(|a| a.move_operator(operator_id, position))
    }

    /// Run several actions as one undoable step
    pub fn bundle_actions<T>(
        &mut self,
        f: impl FnOnce(&mut WorkflowActions) -> Result<T>,
    ) -> Result<T> {
        self.run(|a| a.bundle_actions(f))
    }

    /// Freeze or unfreeze the graph (e.g., while the workflow executes)
    ///
    /// Unfreezing runs any auto-corrections that were held back while
    /// the graph was frozen.
    pub fn set_modification_enabled(&mut self, enabled: bool) {
        self.actions.set_modification_enabled(enabled);
        if enabled {
            match self.propagation.apply_deferred_corrections(&mut self.actions) {
                Ok(corrected) if !corrected.is_empty() => {
                    log::info!("Applied {} deferred auto-correction(s)", corrected.len());
                }
                Ok(_) => {}
                Err(e) => log::warn!("Deferred auto-correction failed: {}", e),
            }
        }
        self.settle();
    }

    /// Undo the latest command
    pub fn undo(&mut self) -> Result<bool> {
        self.replay(|a| a.undo_action())
    }

    /// Redo the latest undone command
    pub fn redo(&mut self) -> Result<bool> {
        self.replay(|a| a.redo_action())
    }

    // --- view sync ---

    /// Lift a user gesture from the surface into the command layer
    ///
    /// Returns the number of graph mutations it produced.
    pub fn handle_gesture(&mut self, gesture: VisualGesture) -> Result<usize> {
        let result = self.bridge.forward(gesture, &mut self.actions);
        self.settle();
        result
    }

    /// Process every gesture the surface has queued
    pub fn process_surface_gestures(&mut self) -> Result<usize> {
        let mut applied = 0;
        for gesture in self.surface.take_gestures() {
            applied += self.handle_gesture(gesture)?;
        }
        Ok(applied)
    }

    /// Redraw the surface from the canonical graph
    pub fn rebuild_surface(&mut self) {
        self.bridge.rebuild(self.actions.graph(), &mut self.surface);
        for (operator_id, result) in self.validation.operator_validations() {
            self.surface.set_validity(operator_id, result.is_valid);
        }
    }

    /// Highlight operators on the surface; the graph is not touched
    pub fn highlight_operators(&mut self, operator_ids: &[String]) {
        let fresh = self
            .bridge
            .newly_highlighted(self.actions.graph(), operator_ids);
        if !fresh.is_empty() {
            self.dispatch(vec![WorkflowEvent::OperatorsHighlighted {
                operator_ids: fresh,
            }]);
        }
    }

    pub fn unhighlight_operators(&mut self, operator_ids: &[String]) {
        let current = self.bridge.currently_highlighted(operator_ids);
        if !current.is_empty() {
            self.dispatch(vec![WorkflowEvent::OperatorsUnhighlighted {
                operator_ids: current,
            }]);
        }
    }

    // --- validation ---

    pub fn validate_operator(&self, operator_id: &str) -> Option<&OperatorValidation> {
        self.validation.operator_validation(operator_id)
    }

    pub fn workflow_validation(&self) -> &WorkflowValidation {
        self.validation.workflow_validation()
    }

    /// Whether the workflow may be executed
    pub fn is_workflow_valid(&self) -> bool {
        self.validation.is_workflow_valid()
    }

    // --- propagation ---

    /// The schema an operator's property form should use
    pub fn operator_schema(&self, operator_id: &str) -> Option<serde_json::Value> {
        let operator = self.actions.graph().get_operator(operator_id).ok()?;
        self.propagation
            .overlay()
            .schema_of(operator_id, &operator.operator_type)
    }

    /// Build a request for the current graph, superseding earlier ones
    ///
    /// Used by hosts that issue requests themselves instead of attaching
    /// a client.
    pub fn build_propagation_request(&mut self) -> PropagationRequest {
        self.propagation
            .prepare_request(self.actions.graph(), self.revision)
    }

    /// Apply what came back for a propagation request
    pub fn apply_propagation_outcome(
        &mut self,
        outcome: PropagationOutcome,
    ) -> Result<PropagationApplied> {
        let applied = self
            .propagation
            .apply_outcome(outcome, &mut self.actions, self.revision);
        if let Ok(applied) = &applied {
            self.dispatch(applied.events.clone());
        }
        self.settle();
        applied
    }

    /// Apply every outcome the driver has ready
    pub fn pump_propagation(&mut self) -> Result<usize> {
        let mut count = 0;
        while let Some(outcome) = self.driver.as_mut().and_then(|d| d.try_next_outcome()) {
            self.apply_propagation_outcome(outcome)?;
            count += 1;
        }
        Ok(count)
    }

    /// Wait for the driver's next outcome and apply it
    ///
    /// Returns `None` if no client is attached.
    pub async fn next_propagation_outcome(&mut self) -> Result<Option<PropagationApplied>> {
        let Some(driver) = self.driver.as_mut() else {
            return Ok(None);
        };
        let Some(outcome) = driver.next_outcome().await else {
            return Ok(None);
        };
        self.apply_propagation_outcome(outcome).map(Some)
    }

    // --- persistence ---

    /// Snapshot the workflow for saving
    pub fn export(&self) -> WorkflowContent {
        WorkflowContent::from_graph(self.actions.graph())
    }

    /// Replace the workflow with saved content
    ///
    /// Everything is replayed through the command layer so every check
    /// and subscriber runs as for interactive edits. The load itself is
    /// not undoable: history is cleared after a successful load. A failed
    /// load rolls back and keeps the existing history.
    pub fn load(&mut self, content: WorkflowContent) -> Result<()> {
        for operator in &content.operators {
            let current = self
                .actions
                .registry()
                .descriptor(&operator.operator_type)
                .map(|d| d.schema.operator_version.as_str());
            if current.is_some_and(|v| v != operator.operator_version) {
                log::warn!(
                    "Operator '{}' was saved with version '{}', current is '{}'",
                    operator.operator_id,
                    operator.operator_version,
                    current.unwrap_or_default()
                );
            }
        }

        let WorkflowContent {
            operators,
            operator_positions,
            links,
            breakpoints,
        } = content;

        let result = self.actions.bundle_actions(|a| {
            let existing: Vec<String> = a
                .graph()
                .get_operators()
                .into_iter()
                .map(|op| op.operator_id.clone())
                .collect();
            a.delete_operators_and_links(&existing, &[])?;

            let operators = operators
                .into_iter()
                .map(|op| {
                    let position = operator_positions
                        .get(&op.operator_id)
                        .copied()
                        .unwrap_or_default();
                    (op, position)
                })
                .collect();
            a.add_operators_and_links(operators, links)?;

            for (link_id, breakpoint) in breakpoints {
                a.set_link_breakpoint(&link_id, breakpoint)?;
            }
            Ok(())
        });

        if result.is_ok() {
            self.actions.clear_history();
            log::info!(
                "Loaded workflow with {} operator(s) and {} link(s)",
                self.actions.graph().operator_count(),
                self.actions.graph().link_count()
            );
        }
        self.settle();
        result
    }

    // --- event fan-out ---

    fn run<T>(&mut self, f: impl FnOnce(&mut WorkflowActions) -> Result<T>) -> Result<T> {
        let result = f(&mut self.actions);
        self.settle();
        result
    }

    /// Replay history with visual to logical forwarding suppressed
    fn replay(&mut self, f: impl FnOnce(&mut WorkflowActions) -> Result<bool>) -> Result<bool> {
        self.bridge.set_replaying(true);
        let result = f(&mut self.actions);
        self.settle();

        // Echoes of the replay are dropped by the guard
        for gesture in self.surface.take_gestures() {
            if let Err(e) = self.bridge.forward(gesture, &mut self.actions) {
                log::warn!("Gesture raised during replay failed: {}", e);
            }
        }
        self.bridge.set_replaying(false);
        result
    }

    /// Fan out the events of a settled call
    fn settle(&mut self) {
        let events = self.actions.take_events();
        if events.is_empty() {
            return;
        }

        for event in &events {
            self.bridge.project(event, &mut self.surface);
        }

        let mut follow_up = Vec::new();
        if events.iter().any(WorkflowEvent::affects_validation) {
            follow_up = self.validation.refresh(self.actions.graph());
            for event in &follow_up {
                self.bridge.project(event, &mut self.surface);
            }
        }

        if events.iter().any(WorkflowEvent::affects_schema) {
            self.revision += 1;
            self.propagation
                .overlay_mut()
                .forget_missing(self.actions.graph());
            self.schedule_propagation();
        }

        self.send_to_sinks(events.iter().chain(follow_up.iter()));
    }

    /// Project and publish events that did not come from the graph
    fn dispatch(&mut self, events: Vec<WorkflowEvent>) {
        for event in &events {
            self.bridge.project(event, &mut self.surface);
        }
        self.send_to_sinks(events.iter());
    }

    fn send_to_sinks<'e>(&self, events: impl Iterator<Item = &'e WorkflowEvent>) {
        if self.sinks.is_empty() {
            return;
        }
        for event in events {
            for sink in &self.sinks {
                if let Err(e) = sink.send(event.clone()) {
                    log::warn!("Failed to deliver workflow event: {}", e);
                }
            }
        }
    }

    fn schedule_propagation(&mut self) {
        if self.driver.is_none() {
            return;
        }
        let request = self
            .propagation
            .prepare_request(self.actions.graph(), self.revision);
        if let Some(driver) = &self.driver {
            driver.submit(request);
        }
    }
}
