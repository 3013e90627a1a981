//! Canonical workflow graph
//!
//! The graph is the single source of truth for operators, links, canvas
//! positions and link breakpoints. Its read API is public; every mutating
//! method is crate-private so that all changes go through
//! [`WorkflowActions`](crate::actions::WorkflowActions), which checks
//! preconditions and records undoable commands.
//!
//! Each mutation queues a [`WorkflowEvent`]. The owner drains the queue
//! once a user action has settled and fans the events out to the view,
//! validation and propagation subscribers.

use std::collections::{BTreeMap, HashMap};

use crate::error::{Result, WorkflowError};
use crate::events::WorkflowEvent;
use crate::types::{
    Breakpoint, LinkId, LinkSnapshot, LogicalPort, OperatorId, OperatorLink, OperatorPredicate,
    Point,
};

/// In-memory index of operators and links
#[derive(Debug, Clone, Default)]
pub struct WorkflowGraph {
    operators: BTreeMap<OperatorId, OperatorPredicate>,
    positions: HashMap<OperatorId, Point>,
    links: BTreeMap<LinkId, OperatorLink>,
    breakpoints: HashMap<LinkId, Breakpoint>,
    pending_events: Vec<WorkflowEvent>,
}

impl WorkflowGraph {
    /// Create a new empty graph
    pub fn new() -> Self {
        Self::default()
    }

    pub fn has_operator(&self, operator_id: &str) -> bool {
        self.operators.contains_key(operator_id)
    }

    /// Get an operator by ID
    pub fn get_operator(&self, operator_id: &str) -> Result<&OperatorPredicate> {
        self.operators
            .get(operator_id)
            .ok_or_else(|| WorkflowError::operator_not_found(operator_id))
    }

    /// All operators, ordered by ID
    pub fn get_operators(&self) -> Vec<&OperatorPredicate> {
        self.operators.values().collect()
    }

    pub fn operator_count(&self) -> usize {
        self.operators.len()
    }

    pub fn get_operator_position(&self, operator_id: &str) -> Result<Point> {
        self.positions
            .get(operator_id)
            .copied()
            .ok_or_else(|| WorkflowError::operator_not_found(operator_id))
    }

    pub fn has_link_with_id(&self, link_id: &str) -> bool {
        self.links.contains_key(link_id)
    }

    /// Check whether a link connects exactly these two ports
    pub fn has_link(&self, source: &LogicalPort, target: &LogicalPort) -> bool {
        self.links
            .values()
            .any(|l| &l.source == source && &l.target == target)
    }

    /// Get a link by ID
    pub fn get_link_with_id(&self, link_id: &str) -> Result<&OperatorLink> {
        self.links
            .get(link_id)
            .ok_or_else(|| WorkflowError::link_not_found(link_id))
    }

    /// Get the link connecting two ports
    pub fn get_link(&self, source: &LogicalPort, target: &LogicalPort) -> Result<&OperatorLink> {
        self.links
            .values()
            .find(|l| &l.source == source && &l.target == target)
            .ok_or_else(|| {
                WorkflowError::link_not_found(format!(
                    "{}:{} -> {}:{}",
                    source.operator_id, source.port_id, target.operator_id, target.port_id
                ))
            })
    }

    /// All links, ordered by ID
    pub fn get_links(&self) -> Vec<&OperatorLink> {
        self.links.values().collect()
    }

    pub fn link_count(&self) -> usize {
        self.links.len()
    }

    /// Links whose target is the given operator
    pub fn get_input_links_of(&self, operator_id: &str) -> Vec<&OperatorLink> {
        self.links
            .values()
            .filter(|l| l.target.operator_id == operator_id)
            .collect()
    }

    /// Links whose source is the given operator
    pub fn get_output_links_of(&self, operator_id: &str) -> Vec<&OperatorLink> {
        self.links
            .values()
            .filter(|l| l.source.operator_id == operator_id)
            .collect()
    }

    pub fn get_link_breakpoint(&self, link_id: &str) -> Option<&Breakpoint> {
        self.breakpoints.get(link_id)
    }

    /// All breakpoints keyed by link ID
    pub fn get_breakpoints(&self) -> &HashMap<LinkId, Breakpoint> {
        &self.breakpoints
    }

    /// Check that an operator can be added
    pub fn check_operator_addable(&self, operator: &OperatorPredicate) -> Result<()> {
        if self.has_operator(&operator.operator_id) {
            return Err(WorkflowError::DuplicateOperator(operator.operator_id.clone()));
        }
        Ok(())
    }

    /// Check that a link can be added: unique ID and endpoints, both ends
    /// referencing an existing port of an existing operator
    pub fn check_link_addable(&self, link: &OperatorLink) -> Result<()> {
        if self.has_link_with_id(&link.link_id) || self.has_link(&link.source, &link.target) {
            return Err(WorkflowError::DuplicateLink {
                link_id: link.link_id.clone(),
                source_port: link.source.clone(),
                target_port: link.target.clone(),
            });
        }

        let source_ok = self
            .operators
            .get(&link.source.operator_id)
            .is_some_and(|op| op.has_output_port(&link.source.port_id));
        if !source_ok {
            return Err(WorkflowError::DanglingReference {
                link_id: link.link_id.clone(),
                port: link.source.clone(),
            });
        }

        let target_ok = self
            .operators
            .get(&link.target.operator_id)
            .is_some_and(|op| op.has_input_port(&link.target.port_id));
        if !target_ok {
            return Err(WorkflowError::DanglingReference {
                link_id: link.link_id.clone(),
                port: link.target.clone(),
            });
        }

        Ok(())
    }

    /// Drain the events queued by mutations since the last call
    pub(crate) fn take_events(&mut self) -> Vec<WorkflowEvent> {
        std::mem::take(&mut self.pending_events)
    }

    pub(crate) fn add_operator(&mut self, operator: OperatorPredicate, position: Point) -> Result<()> {
        self.check_operator_addable(&operator)?;

        self.positions.insert(operator.operator_id.clone(), position);
        self.operators
            .insert(operator.operator_id.clone(), operator.clone());
        self.pending_events
            .push(WorkflowEvent::OperatorAdded { operator, position });
        Ok(())
    }

    /// Remove an operator and every link touching it
    ///
    /// Links are removed first and returned so the caller can fold them
    /// into the same undo step.
    pub(crate) fn delete_operator(
        &mut self,
        operator_id: &str,
    ) -> Result<(OperatorPredicate, Point, Vec<LinkSnapshot>)> {
        if !self.has_operator(operator_id) {
            return Err(WorkflowError::operator_not_found(operator_id));
        }

        let attached: Vec<LinkId> = self
            .links
            .values()
            .filter(|l| l.touches(operator_id))
            .map(|l| l.link_id.clone())
            .collect();

        let mut cascaded = Vec::with_capacity(attached.len());
        for link_id in attached {
            cascaded.push(self.delete_link(&link_id)?);
        }

        let operator = self
            .operators
            .remove(operator_id)
            .ok_or_else(|| WorkflowError::operator_not_found(operator_id))?;
        let position = self.positions.remove(operator_id).unwrap_or_default();

        self.pending_events.push(WorkflowEvent::OperatorDeleted {
            operator: operator.clone(),
        });
        Ok((operator, position, cascaded))
    }

    pub(crate) fn add_link(&mut self, link: OperatorLink) -> Result<()> {
        self.check_link_addable(&link)?;

        self.links.insert(link.link_id.clone(), link.clone());
        self.pending_events.push(WorkflowEvent::LinkAdded { link });
        Ok(())
    }

    /// Remove a link, returning it with the breakpoint it carried
    pub(crate) fn delete_link(&mut self, link_id: &str) -> Result<LinkSnapshot> {
        let link = self
            .links
            .remove(link_id)
            .ok_or_else(|| WorkflowError::link_not_found(link_id))?;
        let breakpoint = self.breakpoints.remove(link_id);

        self.pending_events.push(WorkflowEvent::LinkDeleted { link: link.clone() });
        Ok(LinkSnapshot { link, breakpoint })
    }

    /// Replace an operator's property document wholesale, returning the old one
    pub(crate) fn set_operator_property(
        &mut self,
        operator_id: &str,
        properties: serde_json::Value,
    ) -> Result<serde_json::Value> {
        let operator = self
            .operators
            .get_mut(operator_id)
            .ok_or_else(|| WorkflowError::operator_not_found(operator_id))?;

        let old = std::mem::replace(&mut operator.operator_properties, properties.clone());
        self.pending_events.push(WorkflowEvent::PropertyChanged {
            operator_id: operator_id.to_string(),
            old_properties: old.clone(),
            new_properties: properties,
        });
        Ok(old)
    }

    /// Set an operator's disabled flag, returning the previous value
    pub(crate) fn set_operator_disabled(&mut self, operator_id: &str, disabled: bool) -> Result<bool> {
        let operator = self
            .operators
            .get_mut(operator_id)
            .ok_or_else(|| WorkflowError::operator_not_found(operator_id))?;

        let old = std::mem::replace(&mut operator.is_disabled, disabled);
        if old != disabled {
            self.pending_events.push(WorkflowEvent::OperatorDisabledChanged {
                operator_id: operator_id.to_string(),
                disabled,
            });
        }
        Ok(old)
    }

    /// Set or remove a link breakpoint, returning the previous one
    pub(crate) fn set_link_breakpoint(
        &mut self,
        link_id: &str,
        breakpoint: Option<Breakpoint>,
    ) -> Result<Option<Breakpoint>> {
        if !self.has_link_with_id(link_id) {
            return Err(WorkflowError::link_not_found(link_id));
        }

        let old = match &breakpoint {
            Some(bp) => self.breakpoints.insert(link_id.to_string(), bp.clone()),
            None => self.breakpoints.remove(link_id),
        };
        if old != breakpoint {
            self.pending_events.push(WorkflowEvent::BreakpointChanged {
                link_id: link_id.to_string(),
                breakpoint,
            });
        }
        Ok(old)
    }

    /// Move an operator on the canvas, returning its previous position
    pub(crate) fn set_operator_position(&mut self, operator_id: &str, position: Point) -> Result<Point> {
        if !self.has_operator(operator_id) {
            return Err(WorkflowError::operator_not_found(operator_id));
        }

        let old = self
            .positions
            .insert(operator_id.to_string(), position)
            .unwrap_or_default();
        if old != position {
            self.pending_events.push(WorkflowEvent::OperatorMoved {
                operator_id: operator_id.to_string(),
                position,
            });
        }
        Ok(old)
    }
}
