//! Command layer: the only public mutation surface of the workflow graph
//!
//! Every action checks its preconditions before touching the graph,
//! applies one or more [`GraphChange`]s, and records them as a
//! [`Command`] on the undo history. Several actions can be grouped with
//! [`WorkflowActions::bundle_actions`] so that one user gesture becomes
//! one undo step.
//!
//! While modification is disabled (e.g., the workflow is executing) all
//! mutating actions, including undo and redo, fail with
//! [`WorkflowError::GraphLocked`].

use std::sync::Arc;

use crate::command::{Command, GraphChange};
use crate::config::EditorConfig;
use crate::constants::naming;
use crate::error::{Result, WorkflowError};
use crate::events::WorkflowEvent;
use crate::graph::WorkflowGraph;
use crate::registry::OperatorMetadataRegistry;
use crate::types::{
    Breakpoint, LinkSnapshot, LogicalPort, OperatorLink, OperatorPredicate, Point,
    PortDescription,
};
use crate::undo::UndoRedoStack;

/// Owns the canonical graph and its undo history
pub struct WorkflowActions {
    graph: WorkflowGraph,
    registry: Arc<OperatorMetadataRegistry>,
    history: UndoRedoStack,
    modification_enabled: bool,
    /// Changes collected by the bundle currently in progress
    bundle: Option<Vec<GraphChange>>,
    events: Vec<WorkflowEvent>,
}

impl WorkflowActions {
    pub fn new(registry: Arc<OperatorMetadataRegistry>, config: &EditorConfig) -> Self {
        Self {
            graph: WorkflowGraph::new(),
            registry,
            history: UndoRedoStack::new(config.undo_history_limit, config.drag_coalesce_window()),
            modification_enabled: true,
            bundle: None,
            events: Vec::new(),
        }
    }

    /// Read-only view of the canonical graph
    pub fn graph(&self) -> &WorkflowGraph {
        &self.graph
    }

    pub fn registry(&self) -> &Arc<OperatorMetadataRegistry> {
        &self.registry
    }

    pub fn history(&self) -> &UndoRedoStack {
        &self.history
    }

    /// Drop all undo/redo history
    pub fn clear_history(&mut self) {
        self.history.clear();
    }

    /// Drain the events produced since the last call
    pub(crate) fn take_events(&mut self) -> Vec<WorkflowEvent> {
        let mut events = std::mem::take(&mut self.events);
        events.extend(self.graph.take_events());
        events
    }

    pub fn is_modification_enabled(&self) -> bool {
        self.modification_enabled
    }

    /// Enable or disable graph modification
    pub fn set_modification_enabled(&mut self, enabled: bool) {
        if self.modification_enabled != enabled {
            self.modification_enabled = enabled;
            // Keep ordering relative to graph events already queued
            self.events.extend(self.graph.take_events());
            self.events
                .push(WorkflowEvent::ModificationEnabledChanged { enabled });
        }
    }

    fn check_modification_enabled(&self) -> Result<()> {
        if self.modification_enabled {
            Ok(())
        } else {
            Err(WorkflowError::GraphLocked)
        }
    }

    /// Apply a change to the graph and record it
    fn apply(&mut self, change: GraphChange) -> Result<()> {
        change.apply(&mut self.graph)?;
        match &mut self.bundle {
            Some(changes) => changes.push(change),
            None => self.history.add_command(Command::single(change)),
        }
        Ok(())
    }

    /// Run several actions as one undoable step
    ///
    /// All changes made inside `f` collapse into a single command. If `f`
    /// fails, the changes it already made are rolled back and nothing is
    /// recorded. Nested bundles fold into the outermost one.
    pub fn bundle_actions<T>(&mut self, f: impl FnOnce(&mut Self) -> Result<T>) -> Result<T> {
        if self.bundle.is_some() {
            return f(self);
        }

        self.bundle = Some(Vec::new());
        let result = f(self);
        let command = Command::new(self.bundle.take().unwrap_or_default());

        match result {
            Ok(value) => {
                self.history.add_command(command);
                Ok(value)
            }
            Err(e) => {
                log::warn!(
                    "Rolling back bundle of {} change(s) after error: {}",
                    command.changes().len(),
                    e
                );
                if let Err(rollback) = command.undo(&mut self.graph) {
                    log::error!("Bundle rollback failed: {}", rollback);
                }
                Err(e)
            }
        }
    }

    /// Add an operator at a canvas position
    pub fn add_operator(&mut self, operator: OperatorPredicate, position: Point) -> Result<()> {
        self.check_modification_enabled()?;
        self.check_operator_type(&operator)?;
        self.graph.check_operator_addable(&operator)?;

        self.apply(GraphChange::AddOperator {
            operator,
            position,
            links: Vec::new(),
        })
    }

    /// Add several operators and the links between them as one step
    pub fn add_operators_and_links(
        &mut self,
        operators: Vec<(OperatorPredicate, Point)>,
        links: Vec<OperatorLink>,
    ) -> Result<()> {
        self.check_modification_enabled()?;
        self.bundle_actions(|actions| {
            for (operator, position) in operators {
                actions.add_operator(operator, position)?;
            }
            for link in links {
                actions.add_link(link)?;
            }
            Ok(())
        })
    }

    /// Delete an operator and every link attached to it as one step
    pub fn delete_operator(&mut self, operator_id: &str) -> Result<()> {
        self.check_modification_enabled()?;
        if !self.graph.has_operator(operator_id) {
            return Err(WorkflowError::operator_not_found(operator_id));
        }

        let (operator, position, links) = self.graph.delete_operator(operator_id)?;
        let change = GraphChange::DeleteOperator {
            operator,
            position,
            links,
        };
        match &mut self.bundle {
            Some(changes) => changes.push(change),
            None => self.history.add_command(Command::single(change)),
        }
        Ok(())
    }

    /// Delete several operators and links as one step
    pub fn delete_operators_and_links(
        &mut self,
        operator_ids: &[String],
        link_ids: &[String],
    ) -> Result<()> {
        self.check_modification_enabled()?;
        self.bundle_actions(|actions| {
            for link_id in link_ids {
                // The link may already be gone with one of its operators
                if actions.graph.has_link_with_id(link_id) {
                    actions.delete_link_with_id(link_id)?;
                }
            }
            for operator_id in operator_ids {
                actions.delete_operator(operator_id)?;
            }
            Ok(())
        })
    }

    /// Add a link between two existing ports
    pub fn add_link(&mut self, link: OperatorLink) -> Result<()> {
        self.check_modification_enabled()?;
        self.graph.check_link_addable(&link)?;

        self.apply(GraphChange::AddLink(LinkSnapshot::bare(link)))
    }

    /// Delete a link by ID
    pub fn delete_link_with_id(&mut self, link_id: &str) -> Result<()> {
        self.check_modification_enabled()?;
        let link = self.graph.get_link_with_id(link_id)?.clone();
        let breakpoint = self.graph.get_link_breakpoint(link_id).cloned();

        self.apply(GraphChange::DeleteLink(LinkSnapshot { link, breakpoint }))
    }

    /// Delete the link connecting two ports
    pub fn delete_link(&mut self, source: &LogicalPort, target: &LogicalPort) -> Result<()> {
        self.check_modification_enabled()?;
        let link_id = self.graph.get_link(source, target)?.link_id.clone();
        self.delete_link_with_id(&link_id)
    }

    /// Replace an operator's property document wholesale
    ///
    /// Setting a document equal to the current one records nothing.
    pub fn set_operator_property(
        &mut self,
        operator_id: &str,
        properties: serde_json::Value,
    ) -> Result<()> {
        self.check_modification_enabled()?;
        let old = self.graph.get_operator(operator_id)?.operator_properties.clone();
        if old == properties {
            return Ok(());
        }

        self.apply(GraphChange::SetProperty {
            operator_id: operator_id.to_string(),
            old,
            new: properties,
        })
    }

    /// Disable or enable several operators as one step
    pub fn set_operators_disabled(&mut self, operator_ids: &[String], disabled: bool) -> Result<()> {
        self.check_modification_enabled()?;
        for operator_id in operator_ids {
            self.graph.get_operator(operator_id)?;
        }

        self.bundle_actions(|actions| {
            for operator_id in operator_ids {
                let old = actions.graph.get_operator(operator_id)?.is_disabled;
                if old != disabled {
                    actions.apply(GraphChange::SetDisabled {
                        operator_id: operator_id.clone(),
                        old,
                        new: disabled,
                    })?;
                }
            }
            Ok(())
        })
    }

    pub fn set_operator_disabled(&mut self, operator_id: &str, disabled: bool) -> Result<()> {
        self.set_operators_disabled(&[operator_id.to_string()], disabled)
    }

    /// Attach a breakpoint to a link, replacing any existing one
    pub fn set_link_breakpoint(&mut self, link_id: &str, breakpoint: Breakpoint) -> Result<()> {
        self.change_link_breakpoint(link_id, Some(breakpoint))
    }

    pub fn remove_link_breakpoint(&mut self, link_id: &str) -> Result<()> {
        self.change_link_breakpoint(link_id, None)
    }

    fn change_link_breakpoint(&mut self, link_id: &str, new: Option<Breakpoint>) -> Result<()> {
        self.check_modification_enabled()?;
        self.graph.get_link_with_id(link_id)?;
        let old = self.graph.get_link_breakpoint(link_id).cloned();
        if old == new {
            return Ok(());
        }

        self.apply(GraphChange::SetBreakpoint {
            link_id: link_id.to_string(),
            old,
            new,
        })
    }

    /// Move an operator on the canvas
    ///
    /// Successive moves of one operator coalesce into a single undo step.
    pub fn move_operator(&mut self, operator_id: &str, position: Point) -> Result<()> {
        self.check_modification_enabled()?;
        let from = self.graph.get_operator_position(operator_id)?;
        if from == position {
            return Ok(());
        }

        self.apply(GraphChange::Move {
            operator_id: operator_id.to_string(),
            from,
            to: position,
        })
    }

    /// Reverse the latest command
    pub fn undo_action(&mut self) -> Result<bool> {
        self.check_modification_enabled()?;
        self.history.undo_action(&mut self.graph)
    }

    /// Re-apply the latest undone command
    pub fn redo_action(&mut self) -> Result<bool> {
        self.check_modification_enabled()?;
        self.history.redo_action(&mut self.graph)
    }

    pub fn is_replaying(&self) -> bool {
        self.history.is_replaying()
    }

    /// The type must be registered and the ports must be the ones it defines
    fn check_operator_type(&self, operator: &OperatorPredicate) -> Result<()> {
        let descriptor = self
            .registry
            .descriptor(&operator.operator_type)
            .ok_or_else(|| WorkflowError::UnknownOperatorType(operator.operator_type.clone()))?;

        let matches = |ports: &[PortDescription], count: usize, prefix: &str| {
            ports.len() == count
                && ports
                    .iter()
                    .enumerate()
                    .all(|(i, p)| p.port_id == format!("{}{}", prefix, i))
        };
        if matches(
            &operator.input_ports,
            descriptor.num_input_ports(),
            naming::INPUT_PORT_PREFIX,
        ) && matches(
            &operator.output_ports,
            descriptor.num_output_ports(),
            naming::OUTPUT_PORT_PREFIX,
        ) {
            Ok(())
        } else {
            Err(WorkflowError::PortMismatch {
                operator_id: operator.operator_id.clone(),
                operator_type: operator.operator_type.clone(),
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::tests::test_registry;

    fn actions() -> WorkflowActions {
        WorkflowActions::new(Arc::new(test_registry()), &EditorConfig::default())
    }

    fn source_and_filter(actions: &mut WorkflowActions) -> (OperatorPredicate, OperatorPredicate) {
        let registry = actions.registry().clone();
        let source = registry.new_operator("Source").unwrap();
        let filter = registry.new_operator("Filter").unwrap();
        actions.add_operator(source.clone(), Point::new(0.0, 0.0)).unwrap();
        actions.add_operator(filter.clone(), Point::new(200.0, 0.0)).unwrap();
        (source, filter)
    }

    fn link_between(a: &OperatorPredicate, b: &OperatorPredicate) -> OperatorLink {
        OperatorLink::new(
            crate::registry::new_link_id(),
            LogicalPort::new(&a.operator_id, &a.output_ports[0].port_id),
            LogicalPort::new(&b.operator_id, &b.input_ports[0].port_id),
        )
    }

    #[test]
    fn test_add_then_delete_round_trip() {
        let mut actions = actions();
        let before_ops: Vec<OperatorPredicate> =
            actions.graph().get_operators().into_iter().cloned().collect();

        let op = actions.registry().new_operator("Filter").unwrap();
        actions.add_operator(op.clone(), Point::default()).unwrap();
        actions.delete_operator(&op.operator_id).unwrap();

        let after_ops: Vec<OperatorPredicate> =
            actions.graph().get_operators().into_iter().cloned().collect();
        assert_eq!(before_ops, after_ops);
        assert_eq!(actions.graph().link_count(), 0);
    }

    #[test]
    fn test_unknown_operator_type_rejected() {
        let mut actions = actions();
        let mut op = actions.registry().new_operator("Filter").unwrap();
        op.operator_type = "Mystery".to_string();

        let err = actions.add_operator(op, Point::default()).unwrap_err();
        assert!(matches!(err, WorkflowError::UnknownOperatorType(_)));
        assert_eq!(actions.graph().operator_count(), 0);
    }

    #[test]
    fn test_delete_operator_is_one_undo_step() {
        let mut actions = actions();
        let (source, filter) = source_and_filter(&mut actions);
        let sink = actions.registry().new_operator("Sink").unwrap();
        actions.add_operator(sink.clone(), Point::default()).unwrap();
        actions.add_link(link_between(&source, &filter)).unwrap();
        actions.add_link(link_between(&filter, &sink)).unwrap();

        let before = actions.history().undo_len();
        actions.delete_operator(&filter.operator_id).unwrap();
        assert_eq!(actions.history().undo_len(), before + 1);
        assert_eq!(actions.graph().link_count(), 0);

        actions.undo_action().unwrap();
        assert!(actions.graph().has_operator(&filter.operator_id));
        assert_eq!(actions.graph().link_count(), 2);
    }

    #[test]
    fn test_dangling_link_never_mutates() {
        let mut actions = actions();
        let (source, _) = source_and_filter(&mut actions);
        let link = OperatorLink::new(
            "l1",
            LogicalPort::new(&source.operator_id, "output-0"),
            LogicalPort::new("ghost", "input-0"),
        );

        let undo_len = actions.history().undo_len();
        let err = actions.add_link(link).unwrap_err();
        assert!(matches!(err, WorkflowError::DanglingReference { .. }));
        assert_eq!(actions.graph().link_count(), 0);
        assert_eq!(actions.history().undo_len(), undo_len);
    }

    #[test]
    fn test_add_then_delete_link_is_noop() {
        let mut actions = actions();
        let (source, filter) = source_and_filter(&mut actions);
        let link = link_between(&source, &filter);

        actions.add_link(link.clone()).unwrap();
        actions.delete_link_with_id(&link.link_id).unwrap();
        assert_eq!(actions.graph().link_count(), 0);
        assert_eq!(actions.graph().operator_count(), 2);
    }

    #[test]
    fn test_bundle_collapses_and_rolls_back() {
        let mut actions = actions();
        let (source, filter) = source_and_filter(&mut actions);
        let before = actions.history().undo_len();

        actions
            .bundle_actions(|a| {
                a.set_operator_property(&filter.operator_id, serde_json::json!({"attribute": "x"}))?;
                a.set_operator_property(&source.operator_id, serde_json::json!({"attributeName": "x"}))?;
                Ok(())
            })
            .unwrap();
        assert_eq!(actions.history().undo_len(), before + 1);

        // A failing bundle leaves no trace
        let err = actions
            .bundle_actions(|a| {
                a.set_operator_property(&filter.operator_id, serde_json::json!({"attribute": "y"}))?;
                a.delete_operator("ghost")
            })
            .unwrap_err();
        assert!(matches!(err, WorkflowError::NotFound { .. }));
        assert_eq!(actions.history().undo_len(), before + 1);
        assert_eq!(
            actions.graph().get_operator(&filter.operator_id).unwrap().operator_properties,
            serde_json::json!({"attribute": "x"})
        );

        actions.undo_action().unwrap();
        assert_eq!(
            actions.graph().get_operator(&source.operator_id).unwrap().operator_properties,
            serde_json::json!({"attributeName": "a"})
        );
    }

    #[test]
    fn test_locked_graph_rejects_mutation() {
        let mut actions = actions();
        let (source, _) = source_and_filter(&mut actions);
        actions.set_modification_enabled(false);

        assert!(matches!(
            actions.delete_operator(&source.operator_id),
            Err(WorkflowError::GraphLocked)
        ));
        assert!(matches!(actions.undo_action(), Err(WorkflowError::GraphLocked)));
        assert!(actions.graph().has_operator(&source.operator_id));

        actions.set_modification_enabled(true);
        actions.delete_operator(&source.operator_id).unwrap();
    }

    #[test]
    fn test_disable_and_breakpoint_are_undoable() {
        let mut actions = actions();
        let (source, filter) = source_and_filter(&mut actions);
        let link = link_between(&source, &filter);
        actions.add_link(link.clone()).unwrap();

        actions
            .set_operators_disabled(&[source.operator_id.clone(), filter.operator_id.clone()], true)
            .unwrap();
        actions
            .set_link_breakpoint(&link.link_id, Breakpoint::Count { count: 5 })
            .unwrap();

        actions.undo_action().unwrap();
        assert!(actions.graph().get_link_breakpoint(&link.link_id).is_none());

        actions.undo_action().unwrap();
        assert!(!actions.graph().get_operator(&source.operator_id).unwrap().is_disabled);
        assert!(!actions.graph().get_operator(&filter.operator_id).unwrap().is_disabled);
    }

    #[test]
    fn test_deleted_link_restores_breakpoint() {
        let mut actions = actions();
        let (source, filter) = source_and_filter(&mut actions);
        let link = link_between(&source, &filter);
        actions.add_link(link.clone()).unwrap();
        actions
            .set_link_breakpoint(&link.link_id, Breakpoint::Count { count: 2 })
            .unwrap();

        actions.delete_link_with_id(&link.link_id).unwrap();
        actions.undo_action().unwrap();
        assert_eq!(
            actions.graph().get_link_breakpoint(&link.link_id),
            Some(&Breakpoint::Count { count: 2 })
        );
    }

    #[test]
    fn test_modification_event_queued() {
        let mut actions = actions();
        actions.take_events();
        actions.set_modification_enabled(false);
        actions.set_modification_enabled(false);
        let events = actions.take_events();
        assert_eq!(
            events,
            vec![WorkflowEvent::ModificationEnabledChanged { enabled: false }]
        );
    }

    #[test]
    fn test_ports_must_match_type() {
        let mut actions = actions();
        let mut filter = actions.registry().new_operator("Filter").unwrap();
        filter.input_ports.clear();
        let err = actions.add_operator(filter, Point::default()).unwrap_err();
        assert!(matches!(err, WorkflowError::PortMismatch { .. }));

        let mut renamed = actions.registry().new_operator("Filter").unwrap();
        renamed.output_ports[0].port_id = "out".to_string();
        let err = actions.add_operator(renamed, Point::default()).unwrap_err();
        assert!(matches!(err, WorkflowError::PortMismatch { .. }));

        assert_eq!(actions.graph().operator_count(), 0);
        assert!(!actions.history().can_undo());
    }

    #[test]
    fn test_delete_link_by_ports_checks_lock_first() {
        let mut actions = actions();
        let (source, filter) = source_and_filter(&mut actions);
        actions.set_modification_enabled(false);

        let err = actions
            .delete_link(
                &LogicalPort::new(&source.operator_id, "output-0"),
                &LogicalPort::new(&filter.operator_id, "input-0"),
            )
            .unwrap_err();
        assert!(matches!(err, WorkflowError::GraphLocked));
    }

    #[test]
    fn test_failed_rollback_keeps_original_error() {
        let mut actions = actions();
        let (_, filter) = source_and_filter(&mut actions);

        let err = actions
            .bundle_actions(|a| {
                a.set_operator_property(&filter.operator_id, serde_json::json!({"attribute": "x"}))?;
                // Removed behind the command layer, so the rollback cannot succeed
                a.graph.delete_operator(&filter.operator_id)?;
                Err::<(), _>(WorkflowError::propagation("original failure"))
            })
            .unwrap_err();
        assert!(matches!(err, WorkflowError::PropagationRequestFailed(m) if m == "original failure"));
    }
}
