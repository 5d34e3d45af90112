//! Slab storage for states and components.
//!
//! The arena is owned by the root system and addressed exclusively through
//! opaque ids, so the component/state graph carries no reference cycles.
//! Internal accessors panic on a stale id (an engine bug, never host input);
//! host-supplied ids are validated through the `try_*` accessors instead.

use crate::components::Component;
use crate::error::{Result, VoltgridError};

use super::state::State;
use super::types::{ComponentId, Pin, StateId};

#[derive(Default)]
pub struct CircuitArena {
    states: Vec<Option<State>>,
    free_states: Vec<usize>,
    components: Vec<Option<Component>>,
    free_components: Vec<usize>,
}

impl CircuitArena {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn alloc_state(&mut self) -> StateId {
        match self.free_states.pop() {
            Some(slot) => {
                self.states[slot] = Some(State::new());
                StateId(slot)
            }
            None => {
                self.states.push(Some(State::new()));
                StateId(self.states.len() - 1)
            }
        }
    }

    pub(crate) fn free_state(&mut self, id: StateId) {
        if self.states[id.0].take().is_some() {
            self.free_states.push(id.0);
        }
    }

    pub(crate) fn alloc_component(&mut self, component: Component) -> ComponentId {
        match self.free_components.pop() {
            Some(slot) => {
                self.components[slot] = Some(component);
                ComponentId(slot)
            }
            None => {
                self.components.push(Some(component));
                ComponentId(self.components.len() - 1)
            }
        }
    }

    pub(crate) fn free_component(&mut self, id: ComponentId) {
        if self.components[id.0].take().is_some() {
            self.free_components.push(id.0);
        }
    }

    pub(crate) fn state(&self, id: StateId) -> &State {
        self.states[id.0].as_ref().expect("stale StateId")
    }

    pub(crate) fn state_mut(&mut self, id: StateId) -> &mut State {
        self.states[id.0].as_mut().expect("stale StateId")
    }

    pub(crate) fn component(&self, id: ComponentId) -> &Component {
        self.components[id.0].as_ref().expect("stale ComponentId")
    }

    pub(crate) fn component_mut(&mut self, id: ComponentId) -> &mut Component {
        self.components[id.0].as_mut().expect("stale ComponentId")
    }

    pub(crate) fn contains_state(&self, id: StateId) -> bool {
        self.states.get(id.0).map_or(false, |s| s.is_some())
    }

    pub(crate) fn contains_component(&self, id: ComponentId) -> bool {
        self.components.get(id.0).map_or(false, |c| c.is_some())
    }

    pub(crate) fn try_state(&self, id: StateId) -> Result<&State> {
        self.states
            .get(id.0)
            .and_then(|s| s.as_ref())
            .ok_or(VoltgridError::UnknownState(id))
    }

    pub(crate) fn try_state_mut(&mut self, id: StateId) -> Result<&mut State> {
        self.states
            .get_mut(id.0)
            .and_then(|s| s.as_mut())
            .ok_or(VoltgridError::UnknownState(id))
    }

    pub(crate) fn try_component(&self, id: ComponentId) -> Result<&Component> {
        self.components
            .get(id.0)
            .and_then(|c| c.as_ref())
            .ok_or(VoltgridError::UnknownComponent(id))
    }

    pub(crate) fn try_component_mut(&mut self, id: ComponentId) -> Result<&mut Component> {
        self.components
            .get_mut(id.0)
            .and_then(|c| c.as_mut())
            .ok_or(VoltgridError::UnknownComponent(id))
    }

    /// Solved value behind a pin; ground reads as zero.
    pub(crate) fn pin_value(&self, pin: Pin) -> f64 {
        match pin {
            Some(id) => self.state(id).value,
            None => 0.0,
        }
    }

    /// Matrix index behind a pin; ground has none.
    ///
    /// Only meaningful while the pin's state is bound and its subsystem has
    /// been rebuilt.
    pub(crate) fn pin_index(&self, pin: Pin) -> Option<usize> {
        pin.map(|id| self.state(id).index)
    }

    /// Components attached to a state that are not currently absorbed into
    /// a line aggregate.
    pub(crate) fn live_components(&self, id: StateId) -> Vec<ComponentId> {
        self.state(id)
            .components
            .iter()
            .copied()
            .filter(|c| self.component(*c).abstracted_by.is_none())
            .collect()
    }
}
