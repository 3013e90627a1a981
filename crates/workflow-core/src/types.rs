//! Core types for workflow graphs
//!
//! These types define the canonical entities of a workflow: operators,
//! links between their ports, canvas positions and link breakpoints.

use serde::{Deserialize, Serialize};

/// Unique identifier for an operator
pub type OperatorId = String;

/// Unique identifier for a link
pub type LinkId = String;

/// Identifier of a port, unique within one operator
pub type PortId = String;

/// Description of a single input or output port
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PortDescription {
    #[serde(rename = "portID")]
    pub port_id: PortId,
    pub display_name: String,
}

impl PortDescription {
    pub fn new(port_id: impl Into<String>, display_name: impl Into<String>) -> Self {
        Self {
            port_id: port_id.into(),
            display_name: display_name.into(),
        }
    }
}

/// An operator instance in the workflow
///
/// Port lists are fixed at creation time from the operator type's schema.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OperatorPredicate {
    /// Globally unique, immutable identifier
    #[serde(rename = "operatorID")]
    pub operator_id: OperatorId,
    /// Key into the operator metadata registry
    pub operator_type: String,
    /// Version tag of the property shape this operator was created with
    #[serde(default)]
    pub operator_version: String,
    /// Property document whose shape is defined by the type's JSON schema
    #[serde(default = "empty_properties")]
    pub operator_properties: serde_json::Value,
    pub input_ports: Vec<PortDescription>,
    pub output_ports: Vec<PortDescription>,
    #[serde(default)]
    pub is_disabled: bool,
}

fn empty_properties() -> serde_json::Value {
    serde_json::Value::Object(serde_json::Map::new())
}

impl OperatorPredicate {
    /// Check whether this operator has an input port with the given ID
    pub fn has_input_port(&self, port_id: &str) -> bool {
        self.input_ports.iter().any(|p| p.port_id == port_id)
    }

    /// Check whether this operator has an output port with the given ID
    pub fn has_output_port(&self, port_id: &str) -> bool {
        self.output_ports.iter().any(|p| p.port_id == port_id)
    }

    /// Position of an input port in the port list
    pub fn input_port_index(&self, port_id: &str) -> Option<usize> {
        self.input_ports.iter().position(|p| p.port_id == port_id)
    }

    /// Get a top-level property value
    pub fn property(&self, key: &str) -> Option<&serde_json::Value> {
        self.operator_properties.get(key)
    }
}

/// One end of a link: a port on an operator
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LogicalPort {
    #[serde(rename = "operatorID")]
    pub operator_id: OperatorId,
    #[serde(rename = "portID")]
    pub port_id: PortId,
}

impl LogicalPort {
    pub fn new(operator_id: impl Into<String>, port_id: impl Into<String>) -> Self {
        Self {
            operator_id: operator_id.into(),
            port_id: port_id.into(),
        }
    }
}

/// A link from an output port to an input port
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OperatorLink {
    #[serde(rename = "linkID")]
    pub link_id: LinkId,
    pub source: LogicalPort,
    pub target: LogicalPort,
}

impl OperatorLink {
    pub fn new(link_id: impl Into<String>, source: LogicalPort, target: LogicalPort) -> Self {
        Self {
            link_id: link_id.into(),
            source,
            target,
        }
    }

    /// Whether this link touches the given operator on either end
    pub fn touches(&self, operator_id: &str) -> bool {
        self.source.operator_id == operator_id || self.target.operator_id == operator_id
    }

    /// Whether two links connect the same pair of ports
    pub fn same_endpoints(&self, other: &OperatorLink) -> bool {
        self.source == other.source && self.target == other.target
    }
}

/// A position on the canvas
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Point {
    pub x: f64,
    pub y: f64,
}

impl Point {
    pub fn new(x: f64, y: f64) -> Self {
        Self { x, y }
    }
}

/// Comparison used by a condition breakpoint
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Comparison {
    Equal,
    NotEqual,
    GreaterThan,
    GreaterThanOrEqual,
    LessThan,
    LessThanOrEqual,
    Contains,
    DoesNotContain,
}

/// A breakpoint attached to a link
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum Breakpoint {
    /// Pause when a tuple's attribute satisfies the condition
    Condition {
        column: String,
        condition: Comparison,
        value: String,
    },
    /// Pause after the given number of tuples
    Count { count: u64 },
}

/// A link together with the breakpoint it carried, used to restore deleted links
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LinkSnapshot {
    pub link: OperatorLink,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub breakpoint: Option<Breakpoint>,
}

impl LinkSnapshot {
    pub fn bare(link: OperatorLink) -> Self {
        Self {
            link,
            breakpoint: None,
        }
    }
}
