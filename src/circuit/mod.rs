//! Circuit state storage: ids, scalar unknowns, and the arena that owns them.

mod arena;
mod state;
mod types;

pub use state::State;
pub use types::{ComponentId, Pin, StateId, SubSystemId, ThermalLoadId, WatchdogId};

pub(crate) use arena::CircuitArena;
