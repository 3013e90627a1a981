//! Shared fixtures for integration tests

#![allow(dead_code)]

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;

use workflow_core::schema::PortSchemas;
use workflow_core::{
    EditorConfig, LogicalPort, OperatorLink, OperatorMetadataRegistry, OperatorPredicate,
    RecordingSurface, Result, SchemaAttribute, SchemaInferenceClient, SchemaPropagationRequest,
    SchemaPropagationResponse, WorkflowSession,
};

pub fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

/// Three operator types:
/// - `Scan`: 0 in / 1 out, emits one attribute named by `attributeName`
/// - `Filter`: 1 in / 1 out, passes attributes through, requires `attribute`
/// - `View`: 1 in / 0 out
pub fn registry() -> Arc<OperatorMetadataRegistry> {
    let metadata = serde_json::json!({
        "operators": [
            {
                "operatorType": "Scan",
                "operatorVersion": "1",
                "jsonSchema": {
                    "type": "object",
                    "properties": {"attributeName": {"type": "string", "default": "foo"}},
                    "required": ["attributeName"]
                },
                "additionalMetadata": {
                    "userFriendlyName": "Scan",
                    "operatorGroupName": "Source",
                    "numInputPorts": 0,
                    "numOutputPorts": 1
                }
            },
            {
                "operatorType": "Filter",
                "operatorVersion": "1",
                "jsonSchema": {
                    "type": "object",
                    "properties": {
                        "attribute": {"type": "string", "autofill": "attributeName"}
                    },
                    "required": ["attribute"]
                },
                "additionalMetadata": {
                    "userFriendlyName": "Filter",
                    "operatorGroupName": "Search",
                    "numInputPorts": 1,
                    "numOutputPorts": 1
                }
            },
            {
                "operatorType": "View",
                "operatorVersion": "1",
                "jsonSchema": {"type": "object", "properties": {}},
                "additionalMetadata": {
                    "userFriendlyName": "View Results",
                    "operatorGroupName": "Sink",
                    "numInputPorts": 1,
                    "numOutputPorts": 0
                }
            }
        ],
        "groups": [
            {"groupName": "Source", "groupOrder": 0},
            {"groupName": "Search", "groupOrder": 1},
            {"groupName": "Sink", "groupOrder": 2}
        ]
    });
    Arc::new(OperatorMetadataRegistry::from_json(&metadata.to_string()).unwrap())
}

pub fn session() -> WorkflowSession<RecordingSurface> {
    init_logging();
    WorkflowSession::new(registry(), RecordingSurface::new(), EditorConfig::default())
}

pub fn operator(
    session: &WorkflowSession<RecordingSurface>,
    operator_type: &str,
    properties: serde_json::Value,
) -> OperatorPredicate {
    let mut op = session
        .actions()
        .registry()
        .new_operator(operator_type)
        .unwrap();
    op.operator_properties = properties;
    op
}

pub fn link(id: &str, from: &OperatorPredicate, to: &OperatorPredicate) -> OperatorLink {
    OperatorLink::new(
        id,
        LogicalPort::new(&from.operator_id, "output-0"),
        LogicalPort::new(&to.operator_id, "input-0"),
    )
}

pub fn attributes(names: &[&str]) -> Option<Vec<SchemaAttribute>> {
    Some(names.iter().map(|n| SchemaAttribute::new(*n, "string")).collect())
}

/// Infers schemas the way the fixture types behave: a scan emits its
/// `attributeName`, everything else passes its input through
pub fn infer(request: &SchemaPropagationRequest) -> SchemaPropagationResponse {
    let mut outputs: HashMap<String, Vec<SchemaAttribute>> = HashMap::new();
    let mut result: BTreeMap<String, PortSchemas> = BTreeMap::new();

    // The fixture graphs are small; iterate to a fixed point
    for _ in 0..request.operators.len() + 1 {
        for op in &request.operators {
            let output = if op.operator_type == "Scan" {
                op.properties
                    .get("attributeName")
                    .and_then(|v| v.as_str())
                    .map(|name| vec![SchemaAttribute::new(name, "string")])
            } else {
                let input = request
                    .links
                    .iter()
                    .find(|l| l.to_op_id == op.operator_id)
                    .and_then(|l| outputs.get(&l.from_op_id).cloned());
                if let Some(input) = &input {
                    result.insert(op.operator_id.clone(), vec![Some(input.clone())]);
                }
                input
            };
            if let Some(output) = output {
                outputs.insert(op.operator_id.clone(), output);
            }
        }
    }

    SchemaPropagationResponse::ok(result)
}

/// In-process inference client backed by [`infer`]
#[derive(Default)]
pub struct FakeInferenceClient {
    pub requests: Mutex<Vec<SchemaPropagationRequest>>,
}

#[async_trait]
impl SchemaInferenceClient for FakeInferenceClient {
    async fn infer(&self, request: &SchemaPropagationRequest) -> Result<SchemaPropagationResponse> {
        self.requests.lock().push(request.clone());
        Ok(infer(request))
    }
}
