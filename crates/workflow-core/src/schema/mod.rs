//! Schema propagation and auto-correction
//!
//! Whenever the graph's shape or an operator's properties change, the
//! whole logical plan is sent to a type-inference endpoint. The answer
//! lists the attributes reaching each operator's input ports; those
//! names become `enum`s in each operator's dynamic schema, and property
//! values that refer to attributes which no longer exist are rewritten.
//!
//! - [`client`]: the endpoint abstraction and its HTTP implementation
//! - [`overlay`]: per-operator dynamic schemas
//! - [`propagation`]: request sequencing, stale-response detection and
//!   auto-correction
//! - [`driver`]: the tokio task that debounces and issues requests

pub mod client;
pub mod driver;
pub mod overlay;
pub mod propagation;

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::error::{Result, WorkflowError};
use crate::types::OperatorId;

pub use client::{HttpSchemaInferenceClient, SchemaInferenceClient};
pub use driver::PropagationDriver;
pub use overlay::DynamicSchemaOverlay;
pub use propagation::{
    PropagationApplied, PropagationOutcome, PropagationRequest, SchemaPropagation,
};

/// One attribute available at an input port
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SchemaAttribute {
    pub attribute_name: String,
    pub attribute_type: String,
}

impl SchemaAttribute {
    pub fn new(name: impl Into<String>, attribute_type: impl Into<String>) -> Self {
        Self {
            attribute_name: name.into(),
            attribute_type: attribute_type.into(),
        }
    }
}

/// Attributes per input port; `None` where the port has no upstream information
pub type PortSchemas = Vec<Option<Vec<SchemaAttribute>>>;

/// An operator in the logical plan sent for inference
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlanOperator {
    #[serde(rename = "operatorID")]
    pub operator_id: OperatorId,
    #[serde(rename = "operatorType")]
    pub operator_type: String,
    /// Properties are flattened next to the ID and type
    #[serde(flatten)]
    pub properties: serde_json::Map<String, serde_json::Value>,
}

/// A link in the logical plan sent for inference
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PlanLink {
    pub from_op_id: OperatorId,
    pub from_port_id: String,
    pub to_op_id: OperatorId,
    pub to_port_id: String,
}

/// Request body for the type-inference endpoint
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SchemaPropagationRequest {
    pub operators: Vec<PlanOperator>,
    pub links: Vec<PlanLink>,
}

/// Response of the type-inference endpoint
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SchemaPropagationResponse {
    /// Zero on success
    pub code: i32,
    #[serde(default)]
    pub result: BTreeMap<OperatorId, PortSchemas>,
    #[serde(default)]
    pub message: Option<String>,
}

impl SchemaPropagationResponse {
    /// Successful response with the given result
    pub fn ok(result: BTreeMap<OperatorId, PortSchemas>) -> Self {
        Self {
            code: 0,
            result,
            message: None,
        }
    }

    /// The inferred schemas, or an error if the service reported one
    pub fn into_result(self) -> Result<BTreeMap<OperatorId, PortSchemas>> {
        if self.code == 0 {
            Ok(self.result)
        } else {
            Err(WorkflowError::propagation(format!(
                "inference service returned code {}: {}",
                self.code,
                self.message.as_deref().unwrap_or("no message")
            )))
        }
    }
}
