//! Opaque handles for engine-owned objects.
//!
//! All cross-references inside the engine (component to state, state back to
//! its aggregating line, subsystem membership) are expressed as indices into
//! the [`CircuitArena`](super::CircuitArena) rather than as shared pointers,
//! so the object graph stays cycle free and cheap to copy around.

use std::fmt;

/// A unique identifier for a scalar unknown of the linear system.
///
/// Most states are node voltages; sources, inductors and transformers also
/// allocate internal current states that the host never sees.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct StateId(pub(crate) usize);

impl fmt::Display for StateId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "S{}", self.0)
    }
}

/// A unique identifier for a component.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ComponentId(pub(crate) usize);

impl fmt::Display for ComponentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "C{}", self.0)
    }
}

/// A unique identifier for a subsystem (one connected island).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubSystemId(pub(crate) usize);

impl fmt::Display for SubSystemId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Y{}", self.0)
    }
}

/// A unique identifier for a thermal load.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ThermalLoadId(pub(crate) usize);

impl fmt::Display for ThermalLoadId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "T{}", self.0)
    }
}

/// A unique identifier for a watchdog.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct WatchdogId(pub(crate) usize);

impl fmt::Display for WatchdogId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "W{}", self.0)
    }
}

/// A component pin: either a circuit state or the ground reference.
///
/// Ground is not an unknown; terms against it are simply dropped from the
/// matrix, which is what keeps a source "to ground" well posed.
pub type Pin = Option<StateId>;
