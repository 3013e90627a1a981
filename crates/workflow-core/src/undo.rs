//! Undo/redo history of commands
//!
//! Two LIFO stacks of [`Command`]s. Recording a new command clears the
//! redo stack, except while a replay is in progress: a command created
//! during an undo lands on the redo stack, and one created during a redo
//! lands on the undo stack, leaving forward history intact.
//!
//! Successive moves of the same operator recorded within the coalesce
//! window merge into one entry, so a drag is a single undo step rather
//! than one per mouse event.

use std::collections::VecDeque;
use std::time::{Duration, Instant};

use crate::command::Command;
use crate::constants::defaults;
use crate::error::Result;
use crate::graph::WorkflowGraph;

/// What the history is currently doing
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReplayState {
    Idle,
    Undoing,
    Redoing,
}

#[derive(Debug)]
struct Entry {
    command: Command,
    recorded_at: Instant,
    /// Replayed commands never absorb later moves
    coalescable: bool,
}

/// Undo/redo stacks of commands
#[derive(Debug)]
pub struct UndoRedoStack {
    undo: VecDeque<Entry>,
    redo: Vec<Command>,
    state: ReplayState,
    /// Maximum number of commands on the undo stack
    limit: usize,
    coalesce_window: Duration,
}

impl UndoRedoStack {
    /// Create a new history with the given size limit and drag coalesce window
    pub fn new(limit: usize, coalesce_window: Duration) -> Self {
        Self {
            undo: VecDeque::new(),
            redo: Vec::new(),
            state: ReplayState::Idle,
            limit: limit.max(1),
            coalesce_window,
        }
    }

    pub fn state(&self) -> ReplayState {
        self.state
    }

    /// Whether an undo or redo is being replayed right now
    pub fn is_replaying(&self) -> bool {
        self.state != ReplayState::Idle
    }

    /// Record a command
    pub fn add_command(&mut self, command: Command) {
        if command.is_empty() {
            return;
        }

        match self.state {
            ReplayState::Undoing => {
                self.redo.push(command);
            }
            ReplayState::Redoing => {
                self.push_entry(command, false);
            }
            ReplayState::Idle => {
                self.redo.clear();
                if self.try_coalesce(&command) {
                    return;
                }
                self.push_undo(command);
            }
        }
    }

    fn push_undo(&mut self, command: Command) {
        self.push_entry(command, true);
    }

    fn push_entry(&mut self, command: Command, coalescable: bool) {
        self.undo.push_back(Entry {
            command,
            recorded_at: Instant::now(),
            coalescable,
        });
        while self.undo.len() > self.limit {
            self.undo.pop_front();
        }
    }

    fn try_coalesce(&mut self, command: &Command) -> bool {
        if command.single_move_target().is_none() {
            return false;
        }
        let window = self.coalesce_window;
        match self.undo.back_mut() {
            Some(last) if last.coalescable && last.recorded_at.elapsed() <= window => {
                if last.command.absorb_move(command) {
                    last.recorded_at = Instant::now();
                    true
                } else {
                    false
                }
            }
            _ => false,
        }
    }

    /// Pop the latest command and reverse it on the graph
    ///
    /// Returns `Ok(false)` if there was nothing to undo. A command that
    /// fails to replay is dropped rather than moved to the redo stack.
    pub fn undo_action(&mut self, graph: &mut WorkflowGraph) -> Result<bool> {
        let Some(entry) = self.undo.pop_back() else {
            return Ok(false);
        };

        self.state = ReplayState::Undoing;
        let result = entry.command.undo(graph);
        self.state = ReplayState::Idle;

        match result {
            Ok(()) => {
                self.redo.push(entry.command);
                if let Some(last) = self.undo.back_mut() {
                    last.coalescable = false;
                }
                Ok(true)
            }
            Err(e) => {
                log::error!("Undo failed, dropping command from history: {}", e);
                Err(e)
            }
        }
    }

    /// Pop the latest undone command and re-apply it on the graph
    pub fn redo_action(&mut self, graph: &mut WorkflowGraph) -> Result<bool> {
        let Some(command) = self.redo.pop() else {
            return Ok(false);
        };

        self.state = ReplayState::Redoing;
        let result = command.redo(graph);
        self.state = ReplayState::Idle;

        match result {
            Ok(()) => {
                self.push_entry(command, false);
                Ok(true)
            }
            Err(e) => {
                log::error!("Redo failed, dropping command from history: {}", e);
                Err(e)
            }
        }
    }

    /// Check if undo is available
    pub fn can_undo(&self) -> bool {
        !self.undo.is_empty()
    }

    /// Check if redo is available
    pub fn can_redo(&self) -> bool {
        !self.redo.is_empty()
    }

    pub fn undo_len(&self) -> usize {
        self.undo.len()
    }

    pub fn redo_len(&self) -> usize {
        self.redo.len()
    }

    /// The most recent command on the undo stack
    pub fn last_command(&self) -> Option<&Command> {
        self.undo.back().map(|e| &e.command)
    }

    /// Clear all history
    pub fn clear(&mut self) {
        self.undo.clear();
        self.redo.clear();
        self.state = ReplayState::Idle;
    }

    #[cfg(test)]
    pub(crate) fn set_state(&mut self, state: ReplayState) {
        self.state = state;
    }
}

impl Default for UndoRedoStack {
    fn default() -> Self {
        Self::new(
            defaults::UNDO_HISTORY_LIMIT,
            Duration::from_millis(defaults::DRAG_COALESCE_MS),
        )
    }
}
