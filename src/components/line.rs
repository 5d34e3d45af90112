//! Line aggregate: a chain of series resistors lumped into one element.

use crate::circuit::{ComponentId, StateId};
use crate::solver::StampSet;

/// A maximal chain of series resistors collapsed into a single two-pin
/// element, removing the chain's interior states from the matrix.
///
/// Built only by the partitioner, never by the host. `members[k]` connects
/// `interior[k-1]` to `interior[k]`, with `members[0]` and `members[last]`
/// reaching the boundary pins, so there is always exactly one more member
/// than interior states. After the outer solve the shared chain current
/// reconstructs every interior voltage by successive drops.
#[derive(Debug, Clone)]
pub struct Line {
    /// Absorbed resistors, ordered from pin a to pin b.
    pub(crate) members: Vec<ComponentId>,
    /// Absorbed interior states, same orientation.
    pub(crate) interior: Vec<StateId>,
    /// Lumped resistance: the sum of all member resistances. Recomputed
    /// whenever a member's resistance changes.
    pub(crate) resistance: f64,
}

impl Line {
    pub(crate) fn new(members: Vec<ComponentId>, interior: Vec<StateId>, resistance: f64) -> Self {
        Self {
            members,
            interior,
            resistance,
        }
    }

    pub(crate) fn stamp(&self, a: Option<usize>, b: Option<usize>, stamps: &mut StampSet) {
        stamps.conductance(a, b, 1.0 / self.resistance);
    }
}
