//! Propagation state: request sequencing and auto-correction
//!
//! Each request carries a monotonically increasing sequence number and
//! the graph revision it was built from. A response is applied only if
//! it answers the latest request issued and the graph has not changed
//! since; anything else is stale and dropped, so a late answer can never
//! resurrect an attribute the user already removed.
//!
//! Applying a response refreshes the [`DynamicSchemaOverlay`] and then
//! rewrites properties that refer to attributes no longer available,
//! one undoable command per operator. Those rewrites change the graph,
//! which schedules the next request and carries the correction further
//! downstream.

use std::collections::BTreeMap;
use std::sync::Arc;

use crate::actions::WorkflowActions;
use crate::error::{Result, WorkflowError};
use crate::events::WorkflowEvent;
use crate::graph::WorkflowGraph;
use crate::registry::{AutofillKind, OperatorMetadataRegistry};
use crate::types::OperatorId;

use super::overlay::DynamicSchemaOverlay;
use super::{
    PlanLink, PlanOperator, PortSchemas, SchemaPropagationRequest, SchemaPropagationResponse,
};

/// A request tagged with the state it was built from
#[derive(Debug, Clone, PartialEq)]
pub struct PropagationRequest {
    pub sequence: u64,
    /// Graph revision at the time the request was built
    pub revision: u64,
    pub body: SchemaPropagationRequest,
}

/// What came back for a request
#[derive(Debug, Clone)]
pub enum PropagationOutcome {
    Response {
        sequence: u64,
        revision: u64,
        response: SchemaPropagationResponse,
    },
    Failed {
        sequence: u64,
        revision: u64,
        error: String,
    },
}

impl PropagationOutcome {
    pub fn sequence(&self) -> u64 {
        match self {
            Self::Response { sequence, .. } | Self::Failed { sequence, .. } => *sequence,
        }
    }

    pub fn revision(&self) -> u64 {
        match self {
            Self::Response { revision, .. } | Self::Failed { revision, .. } => *revision,
        }
    }

    /// Pair a request with the client's result
    pub fn from_result(
        request: &PropagationRequest,
        result: Result<SchemaPropagationResponse>,
    ) -> Self {
        match result {
            Ok(response) => Self::Response {
                sequence: request.sequence,
                revision: request.revision,
                response,
            },
            Err(e) => Self::Failed {
                sequence: request.sequence,
                revision: request.revision,
                error: e.to_string(),
            },
        }
    }
}

/// Result of applying an outcome
#[derive(Debug, Default, PartialEq)]
pub struct PropagationApplied {
    /// The outcome was superseded and ignored
    pub stale: bool,
    /// Overlay changes and failure notices
    pub events: Vec<WorkflowEvent>,
    /// Operators whose properties were rewritten
    pub corrected: Vec<OperatorId>,
}

/// Propagation bookkeeping for one session
pub struct SchemaPropagation {
    registry: Arc<OperatorMetadataRegistry>,
    overlay: DynamicSchemaOverlay,
    next_sequence: u64,
    latest_issued: Option<u64>,
    /// Corrections were found while the workflow was locked
    corrections_deferred: bool,
}

impl SchemaPropagation {
    pub fn new(registry: Arc<OperatorMetadataRegistry>) -> Self {
        Self {
            overlay: DynamicSchemaOverlay::new(registry.clone()),
            registry,
            next_sequence: 1,
            latest_issued: None,
            corrections_deferred: false,
        }
    }

    pub fn overlay(&self) -> &DynamicSchemaOverlay {
        &self.overlay
    }

    pub fn overlay_mut(&mut self) -> &mut DynamicSchemaOverlay {
        &mut self.overlay
    }

    /// Whether corrections are waiting for the workflow to be unlocked
    pub fn has_deferred_corrections(&self) -> bool {
        self.corrections_deferred
    }

    /// Sequence number of the latest request issued
    pub fn latest_issued(&self) -> Option<u64> {
        self.latest_issued
    }

    /// Build the next request from the current graph
    ///
    /// Issuing a request supersedes every earlier one.
    pub fn prepare_request(&mut self, graph: &WorkflowGraph, revision: u64) -> PropagationRequest {
        let sequence = self.next_sequence;
        self.next_sequence += 1;
        self.latest_issued = Some(sequence);

        PropagationRequest {
            sequence,
            revision,
            body: build_plan(graph),
        }
    }

    /// Whether an outcome still answers the current state
    pub fn is_current(&self, sequence: u64, revision: u64, current_revision: u64) -> bool {
        self.latest_issued == Some(sequence) && revision == current_revision
    }

    /// Apply an outcome to the overlay and the graph
    ///
    /// Failures and stale outcomes never touch the overlay or properties.
    pub fn apply_outcome(
        &mut self,
        outcome: PropagationOutcome,
        actions: &mut WorkflowActions,
        current_revision: u64,
    ) -> Result<PropagationApplied> {
        let (sequence, revision) = (outcome.sequence(), outcome.revision());
        if !self.is_current(sequence, revision, current_revision) {
            log::debug!(
                "Discarding stale propagation outcome #{} (revision {}, latest #{:?}, revision {})",
                sequence,
                revision,
                self.latest_issued,
                current_revision
            );
            return Ok(PropagationApplied {
                stale: true,
                ..Default::default()
            });
        }

        let result = match outcome {
            PropagationOutcome::Response { response, .. } => response.into_result(),
            PropagationOutcome::Failed { error, .. } => Err(WorkflowError::propagation(error)),
        };

        let result = match result {
            Ok(result) => result,
            Err(e) => {
                log::warn!("Schema propagation #{} failed: {}", sequence, e);
                return Ok(PropagationApplied {
                    stale: false,
                    events: vec![WorkflowEvent::PropagationFailed {
                        sequence,
                        error: e.to_string(),
                    }],
                    corrected: Vec::new(),
                });
            }
        };

        let events = self.overlay.apply(actions.graph(), &result);
        let corrected = self.auto_correct(actions, &result)?;

        Ok(PropagationApplied {
            stale: false,
            events,
            corrected,
        })
    }

    /// Run corrections skipped while the workflow was locked
    ///
    /// Uses the attributes last merged into the overlay; the graph cannot
    /// have changed while it was locked.
    pub fn apply_deferred_corrections(
        &mut self,
        actions: &mut WorkflowActions,
    ) -> Result<Vec<OperatorId>> {
        if !self.corrections_deferred || !actions.is_modification_enabled() {
            return Ok(Vec::new());
        }
        self.corrections_deferred = false;
        let result = self.overlay.all_input_schemas();
        self.auto_correct(actions, &result)
    }

    /// Rewrite properties that refer to attributes no longer available
    fn auto_correct(
        &mut self,
        actions: &mut WorkflowActions,
        result: &BTreeMap<OperatorId, PortSchemas>,
    ) -> Result<Vec<OperatorId>> {
        let corrections = find_corrections(actions.graph(), &self.registry, result);
        if corrections.is_empty() {
            self.corrections_deferred = false;
            return Ok(Vec::new());
        }
        if !actions.is_modification_enabled() {
            log::warn!(
                "Deferring {} auto-correction(s) until the workflow is unlocked",
                corrections.len()
            );
            self.corrections_deferred = true;
            return Ok(Vec::new());
        }
        self.corrections_deferred = false;

        let mut corrected = Vec::with_capacity(corrections.len());
        for (operator_id, properties) in corrections {
            log::info!("Auto-correcting properties of operator '{}'", operator_id);
            actions.bundle_actions(|a| a.set_operator_property(&operator_id, properties))?;
            corrected.push(operator_id);
        }
        Ok(corrected)
    }

    pub fn reset(&mut self) {
        self.overlay.clear();
        self.latest_issued = None;
        self.corrections_deferred = false;
    }
}

/// Serialize the enabled part of the graph as a logical plan
pub fn build_plan(graph: &WorkflowGraph) -> SchemaPropagationRequest {
    let operators = graph
        .get_operators()
        .into_iter()
        .filter(|op| !op.is_disabled)
        .map(|op| PlanOperator {
            operator_id: op.operator_id.clone(),
            operator_type: op.operator_type.clone(),
            properties: op
                .operator_properties
                .as_object()
                .cloned()
                .unwrap_or_default(),
        })
        .collect();

    let enabled = |id: &str| graph.get_operator(id).is_ok_and(|op| !op.is_disabled);
    let links = graph
        .get_links()
        .into_iter()
        .filter(|l| enabled(&l.source.operator_id) && enabled(&l.target.operator_id))
        .map(|l| PlanLink {
            from_op_id: l.source.operator_id.clone(),
            from_port_id: l.source.port_id.clone(),
            to_op_id: l.target.operator_id.clone(),
            to_port_id: l.target.port_id.clone(),
        })
        .collect();

    SchemaPropagationRequest { operators, links }
}

/// Property documents that need rewriting, keyed by operator
///
/// Only operators with upstream information on the relevant port are
/// considered. A stale single attribute is reset to the schema default
/// when that default is still available, otherwise removed; stale names
/// are filtered out of attribute lists.
pub fn find_corrections(
    graph: &WorkflowGraph,
    registry: &OperatorMetadataRegistry,
    result: &BTreeMap<OperatorId, PortSchemas>,
) -> Vec<(OperatorId, serde_json::Value)> {
    let mut corrections = Vec::new();

    for (operator_id, ports) in result {
        let Ok(operator) = graph.get_operator(operator_id) else {
            continue;
        };
        let Some(descriptor) = registry.descriptor(&operator.operator_type) else {
            continue;
        };
        let Some(properties) = operator.operator_properties.as_object() else {
            continue;
        };

        let mut updated = properties.clone();
        let mut changed = false;

        for field in &descriptor.autofill_fields {
            let Some(Some(attributes)) = ports.get(field.input_port) else {
                continue;
            };
            let available =
                |name: &str| attributes.iter().any(|a| a.attribute_name == name);

            match field.kind {
                AutofillKind::AttributeName => {
                    let Some(current) = properties.get(&field.property).and_then(|v| v.as_str())
                    else {
                        continue;
                    };
                    if current.is_empty() || available(current) {
                        continue;
                    }
                    let default = descriptor
                        .property_defaults
                        .get(&field.property)
                        .filter(|d| d.as_str().is_some_and(available));
                    match default {
                        Some(default) => {
                            updated.insert(field.property.clone(), default.clone());
                        }
                        None => {
                            updated.remove(&field.property);
                        }
                    }
                    changed = true;
                }
                AutofillKind::AttributeNameList => {
                    let Some(current) = properties.get(&field.property).and_then(|v| v.as_array())
                    else {
                        continue;
                    };
                    let kept: Vec<serde_json::Value> = current
                        .iter()
                        .filter(|v| v.as_str().is_some_and(available))
                        .cloned()
                        .collect();
                    if kept.len() != current.len() {
                        updated.insert(field.property.clone(), serde_json::Value::Array(kept));
                        changed = true;
                    }
                }
            }
        }

        if changed {
            corrections.push((operator_id.clone(), serde_json::Value::Object(updated)));
        }
    }

    corrections
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::EditorConfig;
    use crate::registry::tests::test_registry;
    use crate::schema::SchemaAttribute;
    use crate::types::{LogicalPort, OperatorLink, Point};

    fn attrs(names: &[&str]) -> Option<Vec<SchemaAttribute>> {
        Some(names.iter().map(|n| SchemaAttribute::new(*n, "string")).collect())
    }

    struct Fixture {
        actions: WorkflowActions,
        propagation: SchemaPropagation,
        source: OperatorId,
        filter: OperatorId,
    }

    fn fixture() -> Fixture {
        let registry = Arc::new(test_registry());
        let mut actions = WorkflowActions::new(registry.clone(), &EditorConfig::default());
        let source = registry.new_operator("Source").unwrap();
        let mut filter = registry.new_operator("Filter").unwrap();
        filter.operator_properties = serde_json::json!({"attribute": "foo", "value": "1"});
        let link = OperatorLink::new(
            "l1",
            LogicalPort::new(&source.operator_id, "output-0"),
            LogicalPort::new(&filter.operator_id, "input-0"),
        );
        let ids = (source.operator_id.clone(), filter.operator_id.clone());
        actions
            .add_operators_and_links(
                vec![(source, Point::default()), (filter, Point::default())],
                vec![link],
            )
            .unwrap();

        Fixture {
            actions,
            propagation: SchemaPropagation::new(registry),
            source: ids.0,
            filter: ids.1,
        }
    }

    fn response_for(id: &str, names: &[&str]) -> SchemaPropagationResponse {
        let mut result = BTreeMap::new();
        result.insert(id.to_string(), vec![attrs(names)]);
        SchemaPropagationResponse::ok(result)
    }

    #[test]
    fn test_plan_skips_disabled() {
        let mut f = fixture();
        let plan = build_plan(f.actions.graph());
        assert_eq!(plan.operators.len(), 2);
        assert_eq!(plan.links.len(), 1);
        assert_eq!(plan.links[0].from_op_id, f.source);

        f.actions.set_operator_disabled(&f.source, true).unwrap();
        let plan = build_plan(f.actions.graph());
        assert_eq!(plan.operators.len(), 1);
        assert!(plan.links.is_empty());
    }

    #[test]
    fn test_missing_attribute_is_cleared_as_one_command() {
        let mut f = fixture();
        let request = f.propagation.prepare_request(f.actions.graph(), 0);
        let before = f.actions.history().undo_len();

        let outcome = PropagationOutcome::from_result(&request, Ok(response_for(&f.filter, &["bar"])));
        let applied = f.propagation.apply_outcome(outcome, &mut f.actions, 0).unwrap();

        assert!(!applied.stale);
        assert_eq!(applied.corrected, vec![f.filter.clone()]);
        assert_eq!(applied.events.len(), 1);
        assert_eq!(f.actions.history().undo_len(), before + 1);
        assert_eq!(
            f.actions.graph().get_operator(&f.filter).unwrap().operator_properties,
            serde_json::json!({"value": "1"})
        );

        f.actions.undo_action().unwrap();
        assert_eq!(
            f.actions.graph().get_operator(&f.filter).unwrap().operator_properties["attribute"],
            "foo"
        );
    }

    #[test]
    fn test_available_attribute_untouched() {
        let mut f = fixture();
        let request = f.propagation.prepare_request(f.actions.graph(), 0);
        let outcome = PropagationOutcome::from_result(&request, Ok(response_for(&f.filter, &["foo"])));
        let applied = f.propagation.apply_outcome(outcome, &mut f.actions, 0).unwrap();
        assert!(applied.corrected.is_empty());
    }

    #[test]
    fn test_superseded_request_is_stale() {
        let mut f = fixture();
        let r1 = f.propagation.prepare_request(f.actions.graph(), 0);
        let r2 = f.propagation.prepare_request(f.actions.graph(), 1);

        let late = PropagationOutcome::from_result(&r1, Ok(response_for(&f.filter, &["x"])));
        let applied = f.propagation.apply_outcome(late, &mut f.actions, 1).unwrap();
        assert!(applied.stale);
        assert!(!f.propagation.overlay().has_overlay(&f.filter));

        let current = PropagationOutcome::from_result(&r2, Ok(response_for(&f.filter, &["foo"])));
        let applied = f.propagation.apply_outcome(current, &mut f.actions, 1).unwrap();
        assert!(!applied.stale);
        assert!(f.propagation.overlay().has_overlay(&f.filter));
    }

    #[test]
    fn test_changed_revision_is_stale() {
        let mut f = fixture();
        let request = f.propagation.prepare_request(f.actions.graph(), 3);
        let outcome = PropagationOutcome::from_result(&request, Ok(response_for(&f.filter, &["x"])));
        let applied = f.propagation.apply_outcome(outcome, &mut f.actions, 4).unwrap();
        assert!(applied.stale);
    }

    #[test]
    fn test_failure_keeps_previous_state() {
        let mut f = fixture();
        let request = f.propagation.prepare_request(f.actions.graph(), 0);
        let outcome = PropagationOutcome::from_result(&request, Ok(response_for(&f.filter, &["foo"])));
        f.propagation.apply_outcome(outcome, &mut f.actions, 0).unwrap();

        let request = f.propagation.prepare_request(f.actions.graph(), 0);
        let outcome = PropagationOutcome::from_result(
            &request,
            Err(WorkflowError::propagation("connection refused")),
        );
        let applied = f.propagation.apply_outcome(outcome, &mut f.actions, 0).unwrap();

        assert!(matches!(applied.events[0], WorkflowEvent::PropagationFailed { .. }));
        assert!(f.propagation.overlay().has_overlay(&f.filter));
        assert_eq!(
            f.actions.graph().get_operator(&f.filter).unwrap().operator_properties["attribute"],
            "foo"
        );
    }

    #[test]
    fn test_list_corrections_filter_names() {
        let registry = test_registry();
        let mut graph = WorkflowGraph::new();
        let mut projection = registry.new_operator("Projection").unwrap();
        projection.operator_properties = serde_json::json!({"attributes": ["a", "b", "c"]});
        let id = projection.operator_id.clone();
        graph.add_operator(projection, Point::default()).unwrap();

        let mut result = BTreeMap::new();
        result.insert(id.clone(), vec![attrs(&["a", "c"])]);
        let corrections = find_corrections(&graph, &registry, &result);
        assert_eq!(
            corrections,
            vec![(id, serde_json::json!({"attributes": ["a", "c"]}))]
        );
    }

    #[test]
    fn test_operators_without_autofill_are_ignored() {
        let registry = test_registry();
        let mut graph = WorkflowGraph::new();
        let mut source = registry.new_operator("Source").unwrap();
        source.operator_properties = serde_json::json!({"attributeName": "zzz"});
        let id = source.operator_id.clone();
        graph.add_operator(source, Point::default()).unwrap();

        let mut result = BTreeMap::new();
        result.insert(id, vec![attrs(&["a"])]);
        assert!(find_corrections(&graph, &registry, &result).is_empty());
    }

    #[test]
    fn test_single_attribute_resets_to_available_default() {
        let metadata = serde_json::json!({
            "operators": [{
                "operatorType": "Sort",
                "jsonSchema": {
                    "type": "object",
                    "properties": {
                        "sortBy": {"type": "string", "autofill": "attributeName", "default": "id"}
                    }
                },
                "additionalMetadata": {
                    "userFriendlyName": "Sort",
                    "operatorGroupName": "Utilities",
                    "numInputPorts": 1,
                    "numOutputPorts": 1
                }
            }]
        });
        let registry = OperatorMetadataRegistry::from_json(&metadata.to_string()).unwrap();
        let mut graph = WorkflowGraph::new();
        let mut sort = registry.new_operator("Sort").unwrap();
        sort.operator_properties = serde_json::json!({"sortBy": "gone"});
        let id = sort.operator_id.clone();
        graph.add_operator(sort, Point::default()).unwrap();

        let mut result = BTreeMap::new();
        result.insert(id.clone(), vec![attrs(&["id", "name"])]);
        assert_eq!(
            find_corrections(&graph, &registry, &result),
            vec![(id.clone(), serde_json::json!({"sortBy": "id"}))]
        );

        // Default no longer available either: the key is removed
        result.insert(id.clone(), vec![attrs(&["name"])]);
        assert_eq!(
            find_corrections(&graph, &registry, &result),
            vec![(id, serde_json::json!({}))]
        );
    }

    #[test]
    fn test_corrections_deferred_while_locked() {
        let mut f = fixture();
        let request = f.propagation.prepare_request(f.actions.graph(), 0);
        f.actions.set_modification_enabled(false);

        let outcome = PropagationOutcome::from_result(&request, Ok(response_for(&f.filter, &["bar"])));
        let applied = f.propagation.apply_outcome(outcome, &mut f.actions, 0).unwrap();
        assert!(applied.corrected.is_empty());
        assert!(f.propagation.has_deferred_corrections());
        assert!(f.propagation.overlay().has_overlay(&f.filter));

        // Still locked: nothing runs yet
        assert!(f.propagation.apply_deferred_corrections(&mut f.actions).unwrap().is_empty());
        assert!(f.propagation.has_deferred_corrections());

        f.actions.set_modification_enabled(true);
        let corrected = f.propagation.apply_deferred_corrections(&mut f.actions).unwrap();
        assert_eq!(corrected, vec![f.filter.clone()]);
        assert!(!f.propagation.has_deferred_corrections());
        assert!(f
            .actions
            .graph()
            .get_operator(&f.filter)
            .unwrap()
            .property("attribute")
            .is_none());
    }
}
