//! Undoable commands
//!
//! A [`Command`] is an ordered list of primitive [`GraphChange`]s. Every
//! change knows its own inverse, so a command replays forward with
//! `redo` and backward with `undo`, with no separate "execute" path.
//! A bundle of user actions is simply a command with several changes.

use crate::error::Result;
use crate::graph::WorkflowGraph;
use crate::types::{Breakpoint, LinkId, LinkSnapshot, OperatorId, OperatorPredicate, Point};

/// A primitive, invertible graph mutation
#[derive(Debug, Clone, PartialEq)]
pub enum GraphChange {
    /// Insert an operator, then re-attach the given links
    AddOperator {
        operator: OperatorPredicate,
        position: Point,
        links: Vec<LinkSnapshot>,
    },
    /// Remove an operator together with its attached links
    DeleteOperator {
        operator: OperatorPredicate,
        position: Point,
        links: Vec<LinkSnapshot>,
    },
    AddLink(LinkSnapshot),
    DeleteLink(LinkSnapshot),
    SetProperty {
        operator_id: OperatorId,
        old: serde_json::Value,
        new: serde_json::Value,
    },
    SetDisabled {
        operator_id: OperatorId,
        old: bool,
        new: bool,
    },
    SetBreakpoint {
        link_id: LinkId,
        old: Option<Breakpoint>,
        new: Option<Breakpoint>,
    },
    Move {
        operator_id: OperatorId,
        from: Point,
        to: Point,
    },
}

impl GraphChange {
    /// Apply this change to the graph
    pub(crate) fn apply(&self, graph: &mut WorkflowGraph) -> Result<()> {
        match self {
            Self::AddOperator {
                operator,
                position,
                links,
            } => {
                graph.add_operator(operator.clone(), *position)?;
                for snapshot in links {
                    restore_link(graph, snapshot)?;
                }
            }
            Self::DeleteOperator { operator, .. } => {
                graph.delete_operator(&operator.operator_id)?;
            }
            Self::AddLink(snapshot) => restore_link(graph, snapshot)?,
            Self::DeleteLink(snapshot) => {
                graph.delete_link(&snapshot.link.link_id)?;
            }
            Self::SetProperty {
                operator_id, new, ..
            } => {
                graph.set_operator_property(operator_id, new.clone())?;
            }
            Self::SetDisabled {
                operator_id, new, ..
            } => {
                graph.set_operator_disabled(operator_id, *new)?;
            }
            Self::SetBreakpoint { link_id, new, .. } => {
                graph.set_link_breakpoint(link_id, new.clone())?;
            }
            Self::Move {
                operator_id, to, ..
            } => {
                graph.set_operator_position(operator_id, *to)?;
            }
        }
        Ok(())
    }

    /// The change that reverses this one
    pub fn inverse(&self) -> GraphChange {
        match self {
            Self::AddOperator {
                operator,
                position,
                links,
            } => Self::DeleteOperator {
                operator: operator.clone(),
                position: *position,
                links: links.clone(),
            },
            Self::DeleteOperator {
                operator,
                position,
                links,
            } => Self::AddOperator {
                operator: operator.clone(),
                position: *position,
                links: links.clone(),
            },
            Self::AddLink(snapshot) => Self::DeleteLink(snapshot.clone()),
            Self::DeleteLink(snapshot) => Self::AddLink(snapshot.clone()),
            Self::SetProperty {
                operator_id,
                old,
                new,
            } => Self::SetProperty {
                operator_id: operator_id.clone(),
                old: new.clone(),
                new: old.clone(),
            },
            Self::SetDisabled {
                operator_id,
                old,
                new,
            } => Self::SetDisabled {
                operator_id: operator_id.clone(),
                old: *new,
                new: *old,
            },
            Self::SetBreakpoint { link_id, old, new } => Self::SetBreakpoint {
                link_id: link_id.clone(),
                old: new.clone(),
                new: old.clone(),
            },
            Self::Move {
                operator_id,
                from,
                to,
            } => Self::Move {
                operator_id: operator_id.clone(),
                from: *to,
                to: *from,
            },
        }
    }
}

fn restore_link(graph: &mut WorkflowGraph, snapshot: &LinkSnapshot) -> Result<()> {
    graph.add_link(snapshot.link.clone())?;
    if let Some(bp) = &snapshot.breakpoint {
        graph.set_link_breakpoint(&snapshot.link.link_id, Some(bp.clone()))?;
    }
    Ok(())
}

/// An undoable unit of graph mutation
#[derive(Debug, Clone, PartialEq)]
pub struct Command {
    changes: Vec<GraphChange>,
}

impl Command {
    pub fn new(changes: Vec<GraphChange>) -> Self {
        Self { changes }
    }

    pub fn single(change: GraphChange) -> Self {
        Self {
            changes: vec![change],
        }
    }

    pub fn changes(&self) -> &[GraphChange] {
        &self.changes
    }

    pub fn is_empty(&self) -> bool {
        self.changes.is_empty()
    }

    /// Reverse every change, last first
    pub fn undo(&self, graph: &mut WorkflowGraph) -> Result<()> {
        for change in self.changes.iter().rev() {
            change.inverse().apply(graph)?;
        }
        Ok(())
    }

    /// Re-apply every change in order
    pub fn redo(&self, graph: &mut WorkflowGraph) -> Result<()> {
        for change in &self.changes {
            change.apply(graph)?;
        }
        Ok(())
    }

    /// If this command is a single move, the moved operator
    pub(crate) fn single_move_target(&self) -> Option<&str> {
        match self.changes.as_slice() {
            [GraphChange::Move { operator_id, .. }] => Some(operator_id.as_str()),
            _ => None,
        }
    }

    /// Merge a later move of the same operator into this one, keeping the
    /// original starting point
    pub(crate) fn absorb_move(&mut self, later: &Command) -> bool {
        match (self.changes.as_mut_slice(), later.changes.as_slice()) {
            (
                [GraphChange::Move {
                    operator_id, to, ..
                }],
                [GraphChange::Move {
                    operator_id: later_id,
                    to: later_to,
                    ..
                }],
            ) if *operator_id == *later_id => {
                *to = *later_to;
                true
            }
            _ => false,
        }
    }
}
