//! Fluent builder for workflow content
//!
//! Provides a fluent API for constructing workflows programmatically,
//! using the registry to create operators with their real ports and
//! default properties.

use crate::error::Result;
use crate::persistence::WorkflowContent;
use crate::registry::OperatorMetadataRegistry;
use crate::types::{Breakpoint, LogicalPort, OperatorLink, Point};

/// Fluent builder for constructing [`WorkflowContent`]
///
/// Operators are referred to by a local alias; the real operator IDs are
/// generated by the registry.
///
/// # Example
///
/// ```ignore
/// let content = WorkflowBuilder::new(&registry)
///     .add_operator("scan", "CSVFileScan", (0.0, 0.0))?
///     .with_properties(serde_json::json!({"fileName": "a.csv"}))
///     .add_operator("filter", "Filter", (200.0, 0.0))?
///     .connect("scan", 0, "filter", 0)
///     .build()?;
/// ```
pub struct WorkflowBuilder<'a> {
    registry: &'a OperatorMetadataRegistry,
    content: WorkflowContent,
    aliases: Vec<(String, String)>,
    pending_links: Vec<(String, usize, String, usize)>,
    link_counter: usize,
}

impl<'a> WorkflowBuilder<'a> {
    /// Create a new workflow builder
    pub fn new(registry: &'a OperatorMetadataRegistry) -> Self {
        Self {
            registry,
            content: WorkflowContent::default(),
            aliases: Vec::new(),
            pending_links: Vec::new(),
            link_counter: 0,
        }
    }

    /// Add an operator of a registered type under a local alias
    pub fn add_operator(
        mut self,
        alias: impl Into<String>,
        operator_type: &str,
        position: (f64, f64),
    ) -> Result<Self> {
        let operator = self.registry.new_operator(operator_type)?;
        self.content.operator_positions.insert(
            operator.operator_id.clone(),
            Point::new(position.0, position.1),
        );
        self.aliases.push((alias.into(), operator.operator_id.clone()));
        self.content.operators.push(operator);
        Ok(self)
    }

    /// Replace the properties of the most recently added operator
    ///
    /// Must be called immediately after `add_operator`.
    pub fn with_properties(mut self, properties: serde_json::Value) -> Self {
        if let Some(operator) = self.content.operators.last_mut() {
            operator.operator_properties = properties;
        }
        self
    }

    /// Disable the most recently added operator
    pub fn disabled(mut self) -> Self {
        if let Some(operator) = self.content.operators.last_mut() {
            operator.is_disabled = true;
        }
        self
    }

    /// Connect an output port to an input port, by port index
    pub fn connect(
        mut self,
        source: impl Into<String>,
        source_port: usize,
        target: impl Into<String>,
        target_port: usize,
    ) -> Self {
        self.pending_links
            .push((source.into(), source_port, target.into(), target_port));
        self
    }

    /// Put a breakpoint on the most recently connected link
    pub fn with_breakpoint(mut self, breakpoint: Breakpoint) -> Self {
        let link_id = format!("link-{}", self.pending_links.len());
        if !self.pending_links.is_empty() {
            self.content.breakpoints.insert(link_id, breakpoint);
        }
        self
    }

    /// The operator ID generated for an alias
    pub fn operator_id(&self, alias: &str) -> Option<&str> {
        self.aliases
            .iter()
            .find(|(a, _)| a == alias)
            .map(|(_, id)| id.as_str())
    }

    /// Build the workflow content
    ///
    /// Links to unknown aliases are skipped; structural checks happen when
    /// the content is loaded into a session.
    pub fn build(mut self) -> WorkflowContent {
        let pending = std::mem::take(&mut self.pending_links);
        for (source, source_port, target, target_port) in pending {
            self.link_counter += 1;
            let link_id = format!("link-{}", self.link_counter);
            let source_id = self.operator_id(&source).map(str::to_string);
            let target_id = self.operator_id(&target).map(str::to_string);
            let (Some(source_id), Some(target_id)) = (source_id, target_id) else {
                log::warn!("Skipping link {} -> {}: unknown alias", source, target);
                self.content.breakpoints.remove(&link_id);
                continue;
            };
            let link = OperatorLink::new(
                link_id,
                LogicalPort::new(source_id, format!("output-{}", source_port)),
                LogicalPort::new(target_id, format!("input-{}", target_port)),
            );
            self.content.links.push(link);
        }
        self.content
    }
}
