//! Operator metadata registry
//!
//! The metadata endpoint supplies every known operator type with its JSON
//! schema and port cardinalities. The registry resolves each type once
//! into an [`OperatorTypeDescriptor`] so lookup sites work with typed
//! data (required properties, defaults, autofill fields) instead of
//! re-reading the raw schema.
//!
//! The registry also acts as the operator factory: it assigns operator
//! and link IDs and derives port lists from the type's cardinalities.

use std::collections::HashMap;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::constants::{naming, schema_keys};
use crate::error::{Result, WorkflowError};
use crate::types::{OperatorPredicate, PortDescription};

/// Metadata document returned by the metadata endpoint
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OperatorMetadata {
    pub operators: Vec<OperatorSchema>,
    #[serde(default)]
    pub groups: Vec<GroupInfo>,
}

/// Schema of one operator type
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OperatorSchema {
    pub operator_type: String,
    pub json_schema: serde_json::Value,
    pub additional_metadata: OperatorAdditionalMetadata,
    #[serde(default)]
    pub operator_version: String,
}

/// Display and port information for an operator type
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OperatorAdditionalMetadata {
    pub user_friendly_name: String,
    #[serde(default)]
    pub operator_description: Option<String>,
    pub operator_group_name: String,
    pub num_input_ports: usize,
    pub num_output_ports: usize,
}

/// A palette group
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GroupInfo {
    pub group_name: String,
    pub group_order: u32,
}

/// How an autofill property refers to upstream attributes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AutofillKind {
    /// A single attribute name
    AttributeName,
    /// A list of attribute names
    AttributeNameList,
}

/// A schema property filled from upstream attribute names
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AutofillField {
    /// Top-level property name
    pub property: String,
    pub kind: AutofillKind,
    /// Input port whose attributes populate this property
    pub input_port: usize,
}

/// Resolved, typed view of an operator type
#[derive(Debug, Clone)]
pub struct OperatorTypeDescriptor {
    pub schema: OperatorSchema,
    /// Property names listed in the schema's `required` array
    pub required_properties: Vec<String>,
    /// Properties carrying a `default` value
    pub property_defaults: serde_json::Map<String, serde_json::Value>,
    pub autofill_fields: Vec<AutofillField>,
}

impl OperatorTypeDescriptor {
    /// Resolve a descriptor from a raw operator schema
    pub fn resolve(schema: OperatorSchema) -> Self {
        let required_properties = schema
            .json_schema
            .get("required")
            .and_then(|r| r.as_array())
            .map(|items| {
                items
                    .iter()
                    .filter_map(|i| i.as_str().map(str::to_string))
                    .collect()
            })
            .unwrap_or_default();

        let mut property_defaults = serde_json::Map::new();
        let mut autofill_fields = Vec::new();

        if let Some(properties) = schema
            .json_schema
            .get("properties")
            .and_then(|p| p.as_object())
        {
            for (name, definition) in properties {
                if let Some(default) = definition.get("default") {
                    property_defaults.insert(name.clone(), default.clone());
                }

                let kind = match definition.get(schema_keys::AUTOFILL).and_then(|a| a.as_str()) {
                    Some(schema_keys::ATTRIBUTE_NAME) => Some(AutofillKind::AttributeName),
                    Some(schema_keys::ATTRIBUTE_NAME_LIST) => Some(AutofillKind::AttributeNameList),
                    Some(other) => {
                        log::warn!(
                            "Operator type '{}' property '{}' has unknown autofill kind '{}'",
                            schema.operator_type,
                            name,
                            other
                        );
                        None
                    }
                    None => None,
                };

                if let Some(kind) = kind {
                    let input_port = definition
                        .get(schema_keys::AUTOFILL_PORT)
                        .and_then(|p| p.as_u64())
                        .unwrap_or(0) as usize;
                    autofill_fields.push(AutofillField {
                        property: name.clone(),
                        kind,
                        input_port,
                    });
                }
            }
        }

        Self {
            schema,
            required_properties,
            property_defaults,
            autofill_fields,
        }
    }

    pub fn operator_type(&self) -> &str {
        &self.schema.operator_type
    }

    pub fn num_input_ports(&self) -> usize {
        self.schema.additional_metadata.num_input_ports
    }

    pub fn num_output_ports(&self) -> usize {
        self.schema.additional_metadata.num_output_ports
    }

    /// The type's static JSON schema
    pub fn json_schema(&self) -> &serde_json::Value {
        &self.schema.json_schema
    }
}

/// Registry of operator types keyed by operator type string
///
/// Fetched once per session and treated as a lookup table; the core
/// never mutates it.
#[derive(Debug, Clone, Default)]
pub struct OperatorMetadataRegistry {
    descriptors: HashMap<String, OperatorTypeDescriptor>,
    groups: Vec<GroupInfo>,
}

impl OperatorMetadataRegistry {
    /// Build a registry from a metadata document
    pub fn from_metadata(metadata: OperatorMetadata) -> Self {
        let descriptors = metadata
            .operators
            .into_iter()
            .map(|schema| {
                (
                    schema.operator_type.clone(),
                    OperatorTypeDescriptor::resolve(schema),
                )
            })
            .collect();

        let mut groups = metadata.groups;
        groups.sort_by_key(|g| g.group_order);

        Self {
            descriptors,
            groups,
        }
    }

    /// Parse a metadata document and build a registry from it
    pub fn from_json(json: &str) -> Result<Self> {
        let metadata: OperatorMetadata = serde_json::from_str(json)?;
        Ok(Self::from_metadata(metadata))
    }

    /// Get the descriptor for an operator type
    pub fn descriptor(&self, operator_type: &str) -> Option<&OperatorTypeDescriptor> {
        self.descriptors.get(operator_type)
    }

    /// Check if an operator type is registered
    pub fn has_operator_type(&self, operator_type: &str) -> bool {
        self.descriptors.contains_key(operator_type)
    }

    /// List all registered operator types
    pub fn operator_types(&self) -> Vec<&str> {
        self.descriptors.keys().map(|s| s.as_str()).collect()
    }

    /// Palette groups, ordered by `groupOrder`
    pub fn groups(&self) -> &[GroupInfo] {
        &self.groups
    }

    /// Operator types belonging to a palette group
    pub fn operators_in_group(&self, group_name: &str) -> Vec<&OperatorTypeDescriptor> {
        let mut found: Vec<&OperatorTypeDescriptor> = self
            .descriptors
            .values()
            .filter(|d| d.schema.additional_metadata.operator_group_name == group_name)
            .collect();
        found.sort_by(|a, b| a.operator_type().cmp(b.operator_type()));
        found
    }

    /// Create a new operator of the given type with a fresh ID
    ///
    /// Ports are derived from the type's cardinalities and properties
    /// start from the schema defaults.
    pub fn new_operator(&self, operator_type: &str) -> Result<OperatorPredicate> {
        let descriptor = self
            .descriptor(operator_type)
            .ok_or_else(|| WorkflowError::UnknownOperatorType(operator_type.to_string()))?;

        let operator_id = format!(
            "{}{}{}",
            operator_type,
            naming::OPERATOR_ID_INFIX,
            uuid::Uuid::new_v4()
        );

        let input_ports = (0..descriptor.num_input_ports())
            .map(|i| PortDescription::new(format!("{}{}", naming::INPUT_PORT_PREFIX, i), ""))
            .collect();
        let output_ports = (0..descriptor.num_output_ports())
            .map(|i| PortDescription::new(format!("{}{}", naming::OUTPUT_PORT_PREFIX, i), ""))
            .collect();

        Ok(OperatorPredicate {
            operator_id,
            operator_type: operator_type.to_string(),
            operator_version: descriptor.schema.operator_version.clone(),
            operator_properties: serde_json::Value::Object(descriptor.property_defaults.clone()),
            input_ports,
            output_ports,
            is_disabled: false,
        })
    }
}

/// Generate a fresh link ID
pub fn new_link_id() -> String {
    format!("{}{}", naming::LINK_ID_PREFIX, uuid::Uuid::new_v4())
}

/// Fetch the operator metadata document from the metadata endpoint
pub async fn fetch_operator_metadata(
    url: &str,
    timeout: Duration,
) -> Result<OperatorMetadataRegistry> {
    let client = reqwest::Client::builder().timeout(timeout).build()?;
    let response = client.get(url).send().await?.error_for_status()?;
    let metadata: OperatorMetadata = response.json().await?;
    log::info!(
        "Fetched metadata for {} operator types from {}",
        metadata.operators.len(),
        url
    );
    Ok(OperatorMetadataRegistry::from_metadata(metadata))
}
