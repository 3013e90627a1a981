//! Dynamic schema overlay
//!
//! Each operator's form is driven by its type's static JSON schema. Once
//! upstream attributes are known, autofill properties get an `enum` of
//! the available attribute names; without upstream information the
//! operator falls back to the static schema.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use crate::events::WorkflowEvent;
use crate::graph::WorkflowGraph;
use crate::registry::{AutofillKind, OperatorMetadataRegistry, OperatorTypeDescriptor};
use crate::types::OperatorId;

use super::PortSchemas;

/// Per-operator schemas with upstream attribute names merged in
#[derive(Debug)]
pub struct DynamicSchemaOverlay {
    registry: Arc<OperatorMetadataRegistry>,
    /// Only operators whose schema differs from the static one
    schemas: HashMap<OperatorId, serde_json::Value>,
    input_schemas: HashMap<OperatorId, PortSchemas>,
}

impl DynamicSchemaOverlay {
    pub fn new(registry: Arc<OperatorMetadataRegistry>) -> Self {
        Self {
            registry,
            schemas: HashMap::new(),
            input_schemas: HashMap::new(),
        }
    }

    /// The schema an operator's form should use right now
    pub fn schema_of(&self, operator_id: &str, operator_type: &str) -> Option<serde_json::Value> {
        if let Some(schema) = self.schemas.get(operator_id) {
            return Some(schema.clone());
        }
        self.registry
            .descriptor(operator_type)
            .map(|d| d.json_schema().clone())
    }

    /// Whether the operator currently has an overlaid schema
    pub fn has_overlay(&self, operator_id: &str) -> bool {
        self.schemas.contains_key(operator_id)
    }

    /// Attributes last reported at an operator's input ports
    pub fn input_schemas(&self, operator_id: &str) -> Option<&PortSchemas> {
        self.input_schemas.get(operator_id)
    }

    /// Every operator's last reported input attributes
    pub fn all_input_schemas(&self) -> BTreeMap<OperatorId, PortSchemas> {
        self.input_schemas
            .iter()
            .map(|(id, ports)| (id.clone(), ports.clone()))
            .collect()
    }

    /// Attribute names last reported at one input port
    pub fn attribute_names(&self, operator_id: &str, port: usize) -> Option<Vec<String>> {
        let attributes = self.input_schemas.get(operator_id)?.get(port)?.as_ref()?;
        Some(attributes.iter().map(|a| a.attribute_name.clone()).collect())
    }

    /// Merge an inference result into the overlay
    ///
    /// Operators missing from `result` revert to their static schema.
    /// Returns one event per operator whose effective schema changed.
    pub fn apply(
        &mut self,
        graph: &WorkflowGraph,
        result: &BTreeMap<OperatorId, PortSchemas>,
    ) -> Vec<WorkflowEvent> {
        let mut events = Vec::new();
        self.forget_missing(graph);

        for operator in graph.get_operators() {
            let Some(descriptor) = self.registry.descriptor(&operator.operator_type) else {
                continue;
            };
            let id = &operator.operator_id;

            let ports = result.get(id).filter(|ports| !ports.is_empty());
            let overlaid = ports.and_then(|ports| overlay_schema(descriptor, ports));

            match ports {
                Some(ports) => {
                    self.input_schemas.insert(id.clone(), ports.clone());
                }
                None => {
                    self.input_schemas.remove(id);
                }
            }

            let changed = match &overlaid {
                Some(schema) => self.schemas.get(id) != Some(schema),
                None => self.schemas.contains_key(id),
            };
            if !changed {
                continue;
            }

            let schema = match overlaid {
                Some(schema) => {
                    self.schemas.insert(id.clone(), schema.clone());
                    schema
                }
                None => {
                    self.schemas.remove(id);
                    descriptor.json_schema().clone()
                }
            };
            events.push(WorkflowEvent::SchemaOverlayChanged {
                operator_id: id.clone(),
                schema,
            });
        }

        events
    }

    /// Drop entries for operators no longer in the graph
    pub fn forget_missing(&mut self, graph: &WorkflowGraph) {
        self.schemas.retain(|id, _| graph.has_operator(id));
        self.input_schemas.retain(|id, _| graph.has_operator(id));
    }

    pub fn clear(&mut self) {
        self.schemas.clear();
        self.input_schemas.clear();
    }
}

/// The static schema with attribute enums injected, or `None` if no
/// autofill field has upstream information
fn overlay_schema(
    descriptor: &OperatorTypeDescriptor,
    ports: &PortSchemas,
) -> Option<serde_json::Value> {
    let mut schema = descriptor.json_schema().clone();
    let mut touched = false;

    for field in &descriptor.autofill_fields {
        let Some(Some(attributes)) = ports.get(field.input_port) else {
            continue;
        };
        let names: Vec<serde_json::Value> = attributes
            .iter()
            .map(|a| serde_json::Value::String(a.attribute_name.clone()))
            .collect();

        let Some(property) = schema
            .get_mut("properties")
            .and_then(|p| p.get_mut(&field.property))
            .and_then(|p| p.as_object_mut())
        else {
            continue;
        };

        match field.kind {
            AutofillKind::AttributeName => {
                property.insert("enum".to_string(), serde_json::Value::Array(names));
            }
            AutofillKind::AttributeNameList => {
                let items = property
                    .entry("items")
                    .or_insert_with(|| serde_json::json!({"type": "string"}));
                if let Some(items) = items.as_object_mut() {
                    items.insert("enum".to_string(), serde_json::Value::Array(names));
                }
                property.insert("uniqueItems".to_string(), serde_json::Value::Bool(true));
            }
        }
        touched = true;
    }

    touched.then_some(schema)
}
