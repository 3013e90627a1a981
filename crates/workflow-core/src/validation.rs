//! Operator and workflow validation
//!
//! Validation results are data, not errors: a workflow with missing
//! properties or unconnected ports is a normal editing state, and
//! execution is simply blocked until it is fixed.
//!
//! The checks are pure functions over a graph snapshot.
//! [`ValidationEngine`] keeps the latest results and reports only what
//! changed, so a UI can highlight failing operators without re-reading
//! the whole graph.

use std::collections::{BTreeMap, HashMap, HashSet, VecDeque};
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::events::WorkflowEvent;
use crate::graph::WorkflowGraph;
use crate::registry::OperatorMetadataRegistry;
use crate::types::{OperatorId, OperatorPredicate};

/// Validation result for one operator
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OperatorValidation {
    #[serde(rename = "operatorID")]
    pub operator_id: OperatorId,
    pub is_valid: bool,
    /// Offending field (property name, port ID, ...) to reason
    pub errors: BTreeMap<String, String>,
}

impl OperatorValidation {
    fn from_errors(operator_id: &str, errors: BTreeMap<String, String>) -> Self {
        Self {
            operator_id: operator_id.to_string(),
            is_valid: errors.is_empty(),
            errors,
        }
    }
}

/// Validation result for the whole workflow
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkflowValidation {
    /// Operator or link ID to reason
    pub errors: BTreeMap<String, String>,
}

impl WorkflowValidation {
    pub fn is_valid(&self) -> bool {
        self.errors.is_empty()
    }
}

/// Validate one operator against its type and its connections
///
/// Disabled operators are always valid. Links to or from disabled
/// operators do not count as connections.
pub fn validate_operator(
    graph: &WorkflowGraph,
    registry: &OperatorMetadataRegistry,
    operator: &OperatorPredicate,
) -> OperatorValidation {
    let mut errors = BTreeMap::new();
    if operator.is_disabled {
        return OperatorValidation::from_errors(&operator.operator_id, errors);
    }

    let Some(descriptor) = registry.descriptor(&operator.operator_type) else {
        errors.insert(
            "operatorType".to_string(),
            format!("Unknown operator type '{}'", operator.operator_type),
        );
        return OperatorValidation::from_errors(&operator.operator_id, errors);
    };

    if operator.operator_version != descriptor.schema.operator_version {
        errors.insert(
            "operatorVersion".to_string(),
            format!(
                "Operator version '{}' is outdated, current version is '{}'",
                operator.operator_version, descriptor.schema.operator_version
            ),
        );
    }

    for property in &descriptor.required_properties {
        if is_blank(operator.property(property)) {
            errors.insert(property.clone(), "Required property is not set".to_string());
        }
    }

    for port in &operator.input_ports {
        let connected = graph
            .get_input_links_of(&operator.operator_id)
            .into_iter()
            .filter(|l| l.target.port_id == port.port_id)
            .any(|l| is_enabled(graph, &l.source.operator_id));
        if !connected {
            errors.insert(port.port_id.clone(), "Input port is not connected".to_string());
        }
    }

    OperatorValidation::from_errors(&operator.operator_id, errors)
}

/// Validate every operator and the graph as a whole
pub fn validate_workflow(
    graph: &WorkflowGraph,
    registry: &OperatorMetadataRegistry,
) -> (BTreeMap<OperatorId, OperatorValidation>, WorkflowValidation) {
    let mut per_operator = BTreeMap::new();
    let mut workflow = WorkflowValidation::default();

    for operator in graph.get_operators() {
        let result = validate_operator(graph, registry, operator);
        if !result.is_valid {
            let summary = result
                .errors
                .iter()
                .map(|(field, reason)| format!("{}: {}", field, reason))
                .collect::<Vec<_>>()
                .join("; ");
            workflow.errors.insert(operator.operator_id.clone(), summary);
        }
        per_operator.insert(operator.operator_id.clone(), result);
    }

    if let Some(link_id) = find_cycle(graph) {
        workflow
            .errors
            .insert(link_id, "Link is part of a cycle".to_string());
    }

    (per_operator, workflow)
}

fn is_enabled(graph: &WorkflowGraph, operator_id: &str) -> bool {
    graph
        .get_operator(operator_id)
        .is_ok_and(|op| !op.is_disabled)
}

fn is_blank(value: Option<&serde_json::Value>) -> bool {
    match value {
        None | Some(serde_json::Value::Null) => true,
        Some(serde_json::Value::String(s)) => s.trim().is_empty(),
        Some(serde_json::Value::Array(items)) => items.is_empty(),
        Some(_) => false,
    }
}

/// Detect cycles using Kahn's algorithm (topological sort)
///
/// Returns the lowest link ID among links left on a cycle.
fn find_cycle(graph: &WorkflowGraph) -> Option<String> {
    let mut in_degree: HashMap<&str, usize> = graph
        .get_operators()
        .into_iter()
        .map(|op| (op.operator_id.as_str(), 0))
        .collect();
    let links = graph.get_links();
    for link in &links {
        if let Some(deg) = in_degree.get_mut(link.target.operator_id.as_str()) {
            *deg += 1;
        }
    }

    let mut queue: VecDeque<&str> = in_degree
        .iter()
        .filter(|(_, &deg)| deg == 0)
        .map(|(&id, _)| id)
        .collect();

    let mut visited: HashSet<&str> = HashSet::new();
    while let Some(operator_id) = queue.pop_front() {
        visited.insert(operator_id);
        for link in &links {
            if link.source.operator_id == operator_id {
                if let Some(deg) = in_degree.get_mut(link.target.operator_id.as_str()) {
                    *deg -= 1;
                    if *deg == 0 {
                        queue.push_back(&link.target.operator_id);
                    }
                }
            }
        }
    }

    if visited.len() == in_degree.len() {
        return None;
    }

    // Links are ordered by ID
    links
        .into_iter()
        .find(|l| {
            !visited.contains(l.source.operator_id.as_str())
                && !visited.contains(l.target.operator_id.as_str())
        })
        .map(|l| l.link_id.clone())
}

/// Keeps the latest validation results and reports changes
pub struct ValidationEngine {
    registry: Arc<OperatorMetadataRegistry>,
    results: BTreeMap<OperatorId, OperatorValidation>,
    workflow: WorkflowValidation,
}

impl ValidationEngine {
    pub fn new(registry: Arc<OperatorMetadataRegistry>) -> Self {
        Self {
            registry,
            results: BTreeMap::new(),
            workflow: WorkflowValidation::default(),
        }
    }

    /// Re-validate a settled graph snapshot
    ///
    /// Returns one event per operator whose result is new or changed, and
    /// one per operator that disappeared.
    pub fn refresh(&mut self, graph: &WorkflowGraph) -> Vec<WorkflowEvent> {
        let (results, workflow) = validate_workflow(graph, &self.registry);
        let mut events = Vec::new();

        for (operator_id, result) in &results {
            if self.results.get(operator_id) != Some(result) {
                events.push(WorkflowEvent::OperatorValidityChanged {
                    operator_id: operator_id.clone(),
                    is_valid: result.is_valid,
                    errors: result.errors.clone(),
                });
            }
        }
        for operator_id in self.results.keys() {
            if !results.contains_key(operator_id) {
                events.push(WorkflowEvent::OperatorValidationCleared {
                    operator_id: operator_id.clone(),
                });
            }
        }

        if workflow != self.workflow {
            log::debug!(
                "Workflow validation changed: {} error(s)",
                workflow.errors.len()
            );
        }

        self.results = results;
        self.workflow = workflow;
        events
    }

    /// Latest result for one operator
    pub fn operator_validation(&self, operator_id: &str) -> Option<&OperatorValidation> {
        self.results.get(operator_id)
    }

    pub fn operator_validations(&self) -> &BTreeMap<OperatorId, OperatorValidation> {
        &self.results
    }

    pub fn workflow_validation(&self) -> &WorkflowValidation {
        &self.workflow
    }

    /// Whether the workflow may be executed
    pub fn is_workflow_valid(&self) -> bool {
        self.workflow.is_valid()
    }

    /// Forget all results
    pub fn reset(&mut self) {
        self.results.clear();
        self.workflow = WorkflowValidation::default();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::tests::make_link;
    use crate::registry::tests::test_registry;
    use crate::types::{LogicalPort, OperatorLink, Point};

    fn graph_with(registry: &OperatorMetadataRegistry, types: &[&str]) -> (WorkflowGraph, Vec<OperatorId>) {
        let mut graph = WorkflowGraph::new();
        let mut ids = Vec::new();
        for t in types {
            let op = registry.new_operator(t).unwrap();
            ids.push(op.operator_id.clone());
            graph.add_operator(op, Point::default()).unwrap();
        }
        (graph, ids)
    }

    #[test]
    fn test_required_property_and_port() {
        let registry = test_registry();
        let (mut graph, ids) = graph_with(&registry, &["Source", "Filter"]);

        let filter = graph.get_operator(&ids[1]).unwrap().clone();
        let result = validate_operator(&graph, &registry, &filter);
        assert!(!result.is_valid);
        assert!(result.errors.contains_key("attribute"));
        assert!(result.errors.contains_key("input-0"));

        graph.add_link(make_link("l1", &ids[0], &ids[1])).unwrap();
        graph
            .set_operator_property(&ids[1], serde_json::json!({"attribute": "a"}))
            .unwrap();
        let filter = graph.get_operator(&ids[1]).unwrap().clone();
        assert!(validate_operator(&graph, &registry, &filter).is_valid);
    }

    #[test]
    fn test_blank_values_count_as_missing() {
        assert!(is_blank(None));
        assert!(is_blank(Some(&serde_json::json!(null))));
        assert!(is_blank(Some(&serde_json::json!("  "))));
        assert!(is_blank(Some(&serde_json::json!([]))));
        assert!(!is_blank(Some(&serde_json::json!(0))));
        assert!(!is_blank(Some(&serde_json::json!("x"))));
    }

    #[test]
    fn test_disabled_operators_excluded() {
        let registry = test_registry();
        let (mut graph, ids) = graph_with(&registry, &["Source", "Filter"]);
        graph.add_link(make_link("l1", &ids[0], &ids[1])).unwrap();
        graph
            .set_operator_property(&ids[1], serde_json::json!({"attribute": "a"}))
            .unwrap();

        // Disabled filter is valid even without input
        graph.set_operator_disabled(&ids[0], true).unwrap();
        graph.set_operator_disabled(&ids[1], true).unwrap();
        let filter = graph.get_operator(&ids[1]).unwrap().clone();
        assert!(validate_operator(&graph, &registry, &filter).is_valid);

        // A disabled upstream does not satisfy the input port
        graph.set_operator_disabled(&ids[1], false).unwrap();
        let filter = graph.get_operator(&ids[1]).unwrap().clone();
        let result = validate_operator(&graph, &registry, &filter);
        assert!(result.errors.contains_key("input-0"));
    }

    #[test]
    fn test_unknown_type_and_stale_version() {
        let registry = test_registry();
        let (mut graph, _) = graph_with(&registry, &[]);

        let mut stale = registry.new_operator("Source").unwrap();
        stale.operator_version = "v0".to_string();
        let mut unknown = registry.new_operator("Source").unwrap();
        unknown.operator_type = "Gone".to_string();
        graph.add_operator(stale.clone(), Point::default()).unwrap();
        graph.add_operator(unknown.clone(), Point::default()).unwrap();

        let result = validate_operator(&graph, &registry, &stale);
        assert!(result.errors.contains_key("operatorVersion"));
        let result = validate_operator(&graph, &registry, &unknown);
        assert!(result.errors.contains_key("operatorType"));
    }

    #[test]
    fn test_cycle_reported_by_link() {
        let registry = test_registry();
        let (mut graph, ids) = graph_with(&registry, &["Filter", "Filter"]);
        graph.add_link(make_link("l1", &ids[0], &ids[1])).unwrap();
        graph
            .add_link(OperatorLink::new(
                "l2",
                LogicalPort::new(&ids[1], "output-0"),
                LogicalPort::new(&ids[0], "input-0"),
            ))
            .unwrap();

        let (_, workflow) = validate_workflow(&graph, &registry);
        assert!(workflow.errors.contains_key("l1"));
        assert!(!workflow.is_valid());
    }

    #[test]
    fn test_engine_reports_only_changes() {
        let registry = Arc::new(test_registry());
        let mut engine = ValidationEngine::new(registry.clone());
        let (mut graph, ids) = graph_with(&registry, &["Source", "Filter"]);

        let events = engine.refresh(&graph);
        assert_eq!(events.len(), 2);
        assert!(!engine.is_workflow_valid());

        // Nothing changed
        assert!(engine.refresh(&graph).is_empty());

        graph.add_link(make_link("l1", &ids[0], &ids[1])).unwrap();
        let events = engine.refresh(&graph);
        assert_eq!(events.len(), 1);
        assert!(matches!(
            &events[0],
            WorkflowEvent::OperatorValidityChanged { operator_id, is_valid: false, .. } if *operator_id == ids[1]
        ));

        graph.delete_operator(&ids[1]).unwrap();
        let events = engine.refresh(&graph);
        assert_eq!(
            events,
            vec![WorkflowEvent::OperatorValidationCleared {
                operator_id: ids[1].clone()
            }]
        );
        assert!(engine.is_workflow_valid());
    }
}
