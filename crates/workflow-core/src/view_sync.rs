//! Bridge between the canonical graph and the rendering surface
//!
//! Logical to visual: every [`WorkflowEvent`] is projected onto a
//! [`RenderSurface`]. The surface is never a source of truth and can be
//! rebuilt from the graph at any time with [`ViewSyncBridge::rebuild`].
//!
//! Visual to logical: user gestures on the surface are lifted into
//! [`LogicalRequest`]s. A link reaches the graph only once both of its
//! ends sit on real ports; a link change is always expressed as delete
//! then (maybe) re-add, never as an in-place edit. While an undo or redo
//! is being replayed, gestures are dropped so that echoes of the replay
//! cannot re-enter the command layer.

use std::collections::{BTreeSet, HashMap};

use crate::actions::WorkflowActions;
use crate::error::Result;
use crate::events::WorkflowEvent;
use crate::graph::WorkflowGraph;
use crate::types::{
    Breakpoint, LinkId, LogicalPort, OperatorId, OperatorLink, OperatorPredicate, Point,
};

/// A rendering graph that mirrors the canonical one
///
/// Implementations draw shapes; they must not hold structural facts the
/// canonical graph does not have. Optional visual states have no-op
/// defaults.
pub trait RenderSurface {
    /// Draw (or replace) an operator shape
    fn add_operator(&mut self, operator: &OperatorPredicate, position: Point);

    fn remove_operator(&mut self, operator_id: &str);

    /// Draw (or replace) a link between two ports
    fn add_link(&mut self, link: &OperatorLink);

    fn remove_link(&mut self, link_id: &str);

    fn move_operator(&mut self, operator_id: &str, position: Point);

    fn set_highlighted(&mut self, _operator_id: &str, _highlighted: bool) {}

    fn set_disabled(&mut self, _operator_id: &str, _disabled: bool) {}

    fn set_breakpoint(&mut self, _link_id: &str, _breakpoint: Option<&Breakpoint>) {}

    fn set_validity(&mut self, _operator_id: &str, _is_valid: bool) {}

    /// Remove every shape
    fn clear(&mut self);

    /// Gestures the surface raised since the last call, including echoes
    /// of programmatic changes
    fn take_gestures(&mut self) -> Vec<VisualGesture> {
        Vec::new()
    }
}

/// A surface that draws nothing
#[derive(Debug, Default, Clone, Copy)]
pub struct NullSurface;

impl RenderSurface for NullSurface {
    fn add_operator(&mut self, _operator: &OperatorPredicate, _position: Point) {}
    fn remove_operator(&mut self, _operator_id: &str) {}
    fn add_link(&mut self, _link: &OperatorLink) {}
    fn remove_link(&mut self, _link_id: &str) {}
    fn move_operator(&mut self, _operator_id: &str, _position: Point) {}
    fn clear(&mut self) {}
}

/// In-memory surface that keeps the shapes it was asked to draw
///
/// With echo enabled it also queues the gestures a real canvas would
/// raise for programmatic changes (link shapes removed, shapes moved).
#[derive(Debug, Default, Clone)]
pub struct RecordingSurface {
    pub operators: HashMap<OperatorId, Point>,
    pub links: HashMap<LinkId, OperatorLink>,
    pub highlighted: BTreeSet<OperatorId>,
    pub disabled: BTreeSet<OperatorId>,
    pub invalid: BTreeSet<OperatorId>,
    echo: bool,
    pending: Vec<VisualGesture>,
}

impl RecordingSurface {
    pub fn new() -> Self {
        Self::default()
    }

    /// A surface that echoes programmatic changes back as gestures
    pub fn with_echo() -> Self {
        Self {
            echo: true,
            ..Self::default()
        }
    }

    /// Queue a user gesture, as if raised by the canvas
    pub fn push_gesture(&mut self, gesture: VisualGesture) {
        self.pending.push(gesture);
    }
}

impl RenderSurface for RecordingSurface {
    fn add_operator(&mut self, operator: &OperatorPredicate, position: Point) {
        self.operators.insert(operator.operator_id.clone(), position);
    }

    fn remove_operator(&mut self, operator_id: &str) {
        self.operators.remove(operator_id);
        self.highlighted.remove(operator_id);
        self.disabled.remove(operator_id);
        self.invalid.remove(operator_id);
    }

    fn add_link(&mut self, link: &OperatorLink) {
        self.links.insert(link.link_id.clone(), link.clone());
    }

    fn remove_link(&mut self, link_id: &str) {
        if self.links.remove(link_id).is_some() && self.echo {
            self.pending.push(VisualGesture::LinkShapeDeleted {
                link_id: link_id.to_string(),
            });
        }
    }

    fn move_operator(&mut self, operator_id: &str, position: Point) {
        self.operators.insert(operator_id.to_string(), position);
        if self.echo {
            self.pending.push(VisualGesture::ShapeMoved {
                operator_id: operator_id.to_string(),
                position,
            });
        }
    }

    fn set_highlighted(&mut self, operator_id: &str, highlighted: bool) {
        if highlighted {
            self.highlighted.insert(operator_id.to_string());
        } else {
            self.highlighted.remove(operator_id);
        }
    }

    fn set_disabled(&mut self, operator_id: &str, disabled: bool) {
        if disabled {
            self.disabled.insert(operator_id.to_string());
        } else {
            self.disabled.remove(operator_id);
        }
    }

    fn set_validity(&mut self, operator_id: &str, is_valid: bool) {
        if is_valid {
            self.invalid.remove(operator_id);
        } else {
            self.invalid.insert(operator_id.to_string());
        }
    }

    fn clear(&mut self) {
        self.operators.clear();
        self.links.clear();
        self.highlighted.clear();
        self.disabled.clear();
        self.invalid.clear();
    }

    fn take_gestures(&mut self) -> Vec<VisualGesture> {
        std::mem::take(&mut self.pending)
    }
}

/// Where one end of a visual link sits
#[derive(Debug, Clone, PartialEq)]
pub enum VisualEnd {
    /// Attached to a port
    Port(LogicalPort),
    /// Dangling at a canvas point
    Floating(Point),
}

impl VisualEnd {
    fn port(&self) -> Option<&LogicalPort> {
        match self {
            Self::Port(port) => Some(port),
            Self::Floating(_) => None,
        }
    }
}

/// Which end of a link a gesture moved
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkEnd {
    Source,
    Target,
}

/// A user gesture raised by the rendering surface
#[derive(Debug, Clone, PartialEq)]
pub enum VisualGesture {
    /// A new link shape was drawn
    LinkDrawn {
        link_id: LinkId,
        source: VisualEnd,
        target: VisualEnd,
    },
    /// One end of an existing link shape was dragged
    LinkEndMoved {
        link_id: LinkId,
        end: LinkEnd,
        to: VisualEnd,
    },
    ShapeDeleted { operator_id: OperatorId },
    LinkShapeDeleted { link_id: LinkId },
    /// Several shapes deleted at once (e.g., a selection)
    ShapesDeleted {
        operator_ids: Vec<OperatorId>,
        link_ids: Vec<LinkId>,
    },
    ShapeMoved {
        operator_id: OperatorId,
        position: Point,
    },
}

/// A mutation lifted from a gesture, to be run through the command layer
#[derive(Debug, Clone, PartialEq)]
pub enum LogicalRequest {
    AddLink(OperatorLink),
    DeleteLink(LinkId),
    DeleteOperator(OperatorId),
    MoveOperator {
        operator_id: OperatorId,
        position: Point,
    },
}

impl LogicalRequest {
    pub fn apply(self, actions: &mut WorkflowActions) -> Result<()> {
        match self {
            Self::AddLink(link) => actions.add_link(link),
            Self::DeleteLink(link_id) => actions.delete_link_with_id(&link_id),
            Self::DeleteOperator(operator_id) => actions.delete_operator(&operator_id),
            Self::MoveOperator {
                operator_id,
                position,
            } => actions.move_operator(&operator_id, position),
        }
    }
}

/// Keeps the rendering surface and the canonical graph in step
#[derive(Debug, Default)]
pub struct ViewSyncBridge {
    /// Link shapes on the surface, including ones with a floating end
    visual_links: HashMap<LinkId, (VisualEnd, VisualEnd)>,
    highlighted: BTreeSet<OperatorId>,
    replaying: bool,
}

impl ViewSyncBridge {
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether gestures are currently being suppressed
    pub fn is_replaying(&self) -> bool {
        self.replaying
    }

    /// Suppress or resume visual to logical forwarding
    pub fn set_replaying(&mut self, replaying: bool) {
        self.replaying = replaying;
    }

    pub fn highlighted(&self) -> &BTreeSet<OperatorId> {
        &self.highlighted
    }

    /// Current visual state of a link shape
    pub fn visual_link(&self, link_id: &str) -> Option<&(VisualEnd, VisualEnd)> {
        self.visual_links.get(link_id)
    }

    /// Project one canonical event onto the surface
    pub fn project<R: RenderSurface + ?Sized>(&mut self, event: &WorkflowEvent, surface: &mut R) {
        match event {
            WorkflowEvent::OperatorAdded { operator, position } => {
                surface.add_operator(operator, *position);
                if operator.is_disabled {
                    surface.set_disabled(&operator.operator_id, true);
                }
            }
            WorkflowEvent::OperatorDeleted { operator } => {
                self.highlighted.remove(&operator.operator_id);
                surface.remove_operator(&operator.operator_id);
            }
            WorkflowEvent::LinkAdded { link } => {
                self.visual_links.insert(
                    link.link_id.clone(),
                    (
                        VisualEnd::Port(link.source.clone()),
                        VisualEnd::Port(link.target.clone()),
                    ),
                );
                surface.add_link(link);
            }
            WorkflowEvent::LinkDeleted { link } => {
                // A link the user dragged loose stays on the canvas as a
                // floating shape; only attached shapes are removed
                let attached = match self.visual_links.get(&link.link_id) {
                    Some((source, target)) => {
                        source.port() == Some(&link.source) && target.port() == Some(&link.target)
                    }
                    None => true,
                };
                if attached {
                    self.visual_links.remove(&link.link_id);
                    surface.remove_link(&link.link_id);
                }
            }
            WorkflowEvent::OperatorMoved {
                operator_id,
                position,
            } => surface.move_operator(operator_id, *position),
            WorkflowEvent::OperatorDisabledChanged {
                operator_id,
                disabled,
            } => surface.set_disabled(operator_id, *disabled),
            WorkflowEvent::BreakpointChanged {
                link_id,
                breakpoint,
            } => surface.set_breakpoint(link_id, breakpoint.as_ref()),
            WorkflowEvent::OperatorsHighlighted { operator_ids } => {
                for id in operator_ids {
                    self.highlighted.insert(id.clone());
                    surface.set_highlighted(id, true);
                }
            }
            WorkflowEvent::OperatorsUnhighlighted { operator_ids } => {
                for id in operator_ids {
                    self.highlighted.remove(id);
                    surface.set_highlighted(id, false);
                }
            }
            WorkflowEvent::OperatorValidityChanged {
                operator_id,
                is_valid,
                ..
            } => surface.set_validity(operator_id, *is_valid),
            WorkflowEvent::PropertyChanged { .. }
            | WorkflowEvent::OperatorValidationCleared { .. }
            | WorkflowEvent::ModificationEnabledChanged { .. }
            | WorkflowEvent::SchemaOverlayChanged { .. }
            | WorkflowEvent::PropagationFailed { .. } => {}
        }
    }

    /// Redraw the whole surface from the canonical graph
    pub fn rebuild<R: RenderSurface + ?Sized>(&mut self, graph: &WorkflowGraph, surface: &mut R) {
        surface.clear();
        self.visual_links.clear();
        self.highlighted.retain(|id| graph.has_operator(id));

        for operator in graph.get_operators() {
            let position = graph
                .get_operator_position(&operator.operator_id)
                .unwrap_or_default();
            surface.add_operator(operator, position);
            if operator.is_disabled {
                surface.set_disabled(&operator.operator_id, true);
            }
        }
        for link in graph.get_links() {
            self.visual_links.insert(
                link.link_id.clone(),
                (
                    VisualEnd::Port(link.source.clone()),
                    VisualEnd::Port(link.target.clone()),
                ),
            );
            surface.add_link(link);
            if let Some(bp) = graph.get_link_breakpoint(&link.link_id) {
                surface.set_breakpoint(&link.link_id, Some(bp));
            }
        }
        for id in &self.highlighted {
            surface.set_highlighted(id, true);
        }
    }

    /// Operators not yet highlighted among `operator_ids`
    pub fn newly_highlighted(&self, graph: &WorkflowGraph, operator_ids: &[String]) -> Vec<OperatorId> {
        operator_ids
            .iter()
            .filter(|id| graph.has_operator(id) && !self.highlighted.contains(*id))
            .cloned()
            .collect()
    }

    /// Operators currently highlighted among `operator_ids`
    pub fn currently_highlighted(&self, operator_ids: &[String]) -> Vec<OperatorId> {
        operator_ids
            .iter()
            .filter(|id| self.highlighted.contains(*id))
            .cloned()
            .collect()
    }

    /// Lift a gesture into the mutations it implies
    ///
    /// Returns nothing while a replay is in progress, for gestures that
    /// leave a link incomplete, and for gestures that already match the
    /// canonical graph.
    pub fn lift(&mut self, gesture: VisualGesture, graph: &WorkflowGraph) -> Vec<LogicalRequest> {
        if self.replaying {
            log::debug!("Suppressing gesture during replay: {:?}", gesture);
            return Vec::new();
        }

        match gesture {
            VisualGesture::LinkDrawn {
                link_id,
                source,
                target,
            } => {
                self.visual_links.insert(link_id.clone(), (source, target));
                self.reconcile_link(&link_id, graph)
            }
            VisualGesture::LinkEndMoved { link_id, end, to } => {
                let current = match self.visual_links.get(&link_id) {
                    Some(ends) => ends.clone(),
                    None => match graph.get_link_with_id(&link_id) {
                        Ok(link) => (
                            VisualEnd::Port(link.source.clone()),
                            VisualEnd::Port(link.target.clone()),
                        ),
                        Err(_) => {
                            log::debug!("Ignoring end move of unknown link '{}'", link_id);
                            return Vec::new();
                        }
                    },
                };
                let updated = match end {
                    LinkEnd::Source => (to, current.1),
                    LinkEnd::Target => (current.0, to),
                };
                self.visual_links.insert(link_id.clone(), updated);
                self.reconcile_link(&link_id, graph)
            }
            VisualGesture::ShapeDeleted { operator_id } => {
                if graph.has_operator(&operator_id) {
                    vec![LogicalRequest::DeleteOperator(operator_id)]
                } else {
                    Vec::new()
                }
            }
            VisualGesture::LinkShapeDeleted { link_id } => {
                self.visual_links.remove(&link_id);
                if graph.has_link_with_id(&link_id) {
                    vec![LogicalRequest::DeleteLink(link_id)]
                } else {
                    Vec::new()
                }
            }
            VisualGesture::ShapesDeleted {
                operator_ids,
                link_ids,
            } => {
                let mut requests = Vec::new();
                for link_id in link_ids {
                    self.visual_links.remove(&link_id);
                    // Links attached to a deleted operator cascade with it
                    let cascades = graph
                        .get_link_with_id(&link_id)
                        .map(|l| operator_ids.iter().any(|op| l.touches(op)))
                        .unwrap_or(true);
                    if !cascades {
                        requests.push(LogicalRequest::DeleteLink(link_id));
                    }
                }
                for operator_id in operator_ids {
                    if graph.has_operator(&operator_id) {
                        requests.push(LogicalRequest::DeleteOperator(operator_id));
                    }
                }
                requests
            }
            VisualGesture::ShapeMoved {
                operator_id,
                position,
            } => match graph.get_operator_position(&operator_id) {
                Ok(current) if current != position => vec![LogicalRequest::MoveOperator {
                    operator_id,
                    position,
                }],
                _ => Vec::new(),
            },
        }
    }

    /// Lift a gesture and run the result through the command layer as
    /// one undoable step
    ///
    /// Returns the number of requests applied.
    pub fn forward(&mut self, gesture: VisualGesture, actions: &mut WorkflowActions) -> Result<usize> {
        if actions.is_replaying() {
            log::debug!("Suppressing gesture during history replay");
            return Ok(0);
        }

        let requests = self.lift(gesture, actions.graph());
        let count = requests.len();
        let touched: Vec<LinkId> = requests
            .iter()
            .filter_map(|request| match request {
                LogicalRequest::AddLink(link) => Some(link.link_id.clone()),
                LogicalRequest::DeleteLink(link_id) => Some(link_id.clone()),
                _ => None,
            })
            .collect();

        let result = match count {
            0 => Ok(()),
            1 => requests
                .into_iter()
                .try_for_each(|request| request.apply(actions)),
            _ => actions.bundle_actions(|a| {
                for request in requests {
                    request.apply(a)?;
                }
                Ok(())
            }),
        };

        if let Err(e) = result {
            for link_id in &touched {
                self.restore_link_shape(link_id, actions.graph());
            }
            return Err(e);
        }
        Ok(count)
    }

    /// Point the record of a link shape back at the canonical link
    fn restore_link_shape(&mut self, link_id: &str, graph: &WorkflowGraph) {
        match graph.get_link_with_id(link_id) {
            Ok(link) => {
                self.visual_links.insert(
                    link_id.to_string(),
                    (
                        VisualEnd::Port(link.source.clone()),
                        VisualEnd::Port(link.target.clone()),
                    ),
                );
            }
            Err(_) => {
                self.visual_links.remove(link_id);
            }
        }
    }

    /// Compare a link shape against the canonical graph: delete the
    /// canonical link if it no longer matches, then add the new one if
    /// the shape is complete
    fn reconcile_link(&self, link_id: &str, graph: &WorkflowGraph) -> Vec<LogicalRequest> {
        let desired = self
            .visual_links
            .get(link_id)
            .and_then(|(source, target)| complete_link(link_id, source, target, graph));
        let existing = graph.get_link_with_id(link_id).ok();

        match (existing, desired) {
            (Some(existing), Some(desired)) if existing.same_endpoints(&desired) => Vec::new(),
            (Some(_), desired) => {
                let mut requests = vec![LogicalRequest::DeleteLink(link_id.to_string())];
                requests.extend(desired.map(LogicalRequest::AddLink));
                requests
            }
            (None, Some(desired)) => vec![LogicalRequest::AddLink(desired)],
            (None, None) => Vec::new(),
        }
    }
}

/// The canonical link for a visual shape, if both ends sit on real ports
/// of the right direction
fn complete_link(
    link_id: &str,
    source: &VisualEnd,
    target: &VisualEnd,
    graph: &WorkflowGraph,
) -> Option<OperatorLink> {
    let (source, target) = (source.port()?, target.port()?);

    let source_ok = graph
        .get_operator(&source.operator_id)
        .is_ok_and(|op| op.has_output_port(&source.port_id));
    let target_ok = graph
        .get_operator(&target.operator_id)
        .is_ok_and(|op| op.has_input_port(&target.port_id));
    if !source_ok || !target_ok {
        log::debug!("Link '{}' is not attached to real ports, keeping it visual", link_id);
        return None;
    }

    if let Ok(other) = graph.get_link(source, target) {
        if other.link_id != link_id {
            log::debug!(
                "Link '{}' duplicates link '{}', keeping it visual",
                link_id,
                other.link_id
            );
            return None;
        }
    }

    Some(OperatorLink::new(link_id, source.clone(), target.clone()))
}
