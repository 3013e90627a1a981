//! Saved workflow content
//!
//! The persisted shape of a workflow: operators, their canvas positions,
//! links and link breakpoints. Loading goes through the command layer
//! (see [`WorkflowSession::load`](crate::session::WorkflowSession::load))
//! rather than assigning the graph directly.

use std::collections::HashMap;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::graph::WorkflowGraph;
use crate::types::{Breakpoint, LinkId, OperatorId, OperatorLink, OperatorPredicate, Point};

/// A workflow as saved by the external save service
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkflowContent {
    pub operators: Vec<OperatorPredicate>,
    pub operator_positions: HashMap<OperatorId, Point>,
    pub links: Vec<OperatorLink>,
    #[serde(default)]
    pub breakpoints: HashMap<LinkId, Breakpoint>,
}

impl WorkflowContent {
    /// Snapshot the canonical graph
    pub fn from_graph(graph: &WorkflowGraph) -> Self {
        let operators: Vec<OperatorPredicate> =
            graph.get_operators().into_iter().cloned().collect();
        let operator_positions = operators
            .iter()
            .map(|op| {
                let position = graph
                    .get_operator_position(&op.operator_id)
                    .unwrap_or_default();
                (op.operator_id.clone(), position)
            })
            .collect();

        Self {
            operators,
            operator_positions,
            links: graph.get_links().into_iter().cloned().collect(),
            breakpoints: graph.get_breakpoints().clone(),
        }
    }

    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    pub fn from_json(json: &str) -> Result<Self> {
        Ok(serde_json::from_str(json)?)
    }

    /// Position of an operator, defaulting to the origin
    pub fn position_of(&self, operator_id: &str) -> Point {
        self.operator_positions
            .get(operator_id)
            .copied()
            .unwrap_or_default()
    }

    /// Write the workflow to a JSON file
    pub async fn save_to_file(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::write(path, self.to_json()?).await?;
        log::info!("Workflow saved to {:?}", path);
        Ok(())
    }

    /// Read a workflow from a JSON file
    pub async fn load_from_file(path: &Path) -> Result<Self> {
        let contents = tokio::fs::read_to_string(path).await?;
        Self::from_json(&contents)
    }
}
