//! Scalar unknowns of the linear system.

use super::types::{ComponentId, SubSystemId};

/// One scalar unknown: a node voltage, or an internal branch current.
///
/// A state belongs to at most one subsystem at a time. While it is absorbed
/// into a line aggregate (`abstracted_by` set) it is excluded from the matrix
/// and its value is reconstructed by the line after the outer solve.
#[derive(Debug, Clone)]
pub struct State {
    /// Last solved (or reconstructed) value.
    pub(crate) value: f64,
    /// Owning subsystem, `None` while staged or abstracted.
    pub(crate) subsystem: Option<SubSystemId>,
    /// The line aggregate that absorbed this state, if any.
    pub(crate) abstracted_by: Option<ComponentId>,
    /// Whether the partitioner may fold this state into a resistor line.
    pub(crate) line_eligible: bool,
    /// Components connected to this state, in connection order.
    pub(crate) components: Vec<ComponentId>,
    /// Whether the state currently sits in the root staging queue.
    pub(crate) queued: bool,
    /// Matrix row/column while bound to a subsystem. Only meaningful
    /// between a rebuild and the next topology change.
    pub(crate) index: usize,
}

impl State {
    pub(crate) fn new() -> Self {
        Self {
            value: 0.0,
            subsystem: None,
            abstracted_by: None,
            line_eligible: false,
            components: Vec::new(),
            queued: false,
            index: 0,
        }
    }

    /// Last solved value of this unknown.
    pub fn value(&self) -> f64 {
        self.value
    }

    /// Whether this state is neither bound nor abstracted, i.e. not
    /// simulated at all.
    pub fn is_orphaned(&self) -> bool {
        self.subsystem.is_none() && self.abstracted_by.is_none()
    }
}
