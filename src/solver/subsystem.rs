//! One connected island of the circuit and its private linear system.

use log::warn;

use crate::circuit::{CircuitArena, ComponentId, Pin, StateId, SubSystemId};
use crate::components::ComponentKind;

use super::mna::{MnaMatrix, StampSet};

/// A connected island: the states and components that share one matrix.
///
/// The matrix is rebuilt (restamped and refactored) only when the island is
/// dirty; between rebuilds each tick only re-injects the right-hand side and
/// runs the cached-LU substitution. A singular island is not fatal: it is
/// logged once per rebuild and its states solve to zero until the topology
/// changes.
pub(crate) struct SubSystem {
    pub(crate) id: SubSystemId,
    dt: f64,
    /// Bound states, in bind order. A state's matrix index is its position
    /// in this list after a rebuild.
    pub(crate) states: Vec<StateId>,
    /// Bound components, in bind order. Injection order follows bind order.
    pub(crate) components: Vec<ComponentId>,
    matrix: MnaMatrix,
    stamps: StampSet,
    pub(crate) dirty: bool,
    singular: bool,
}

impl SubSystem {
    pub(crate) fn new(id: SubSystemId, dt: f64) -> Self {
        Self {
            id,
            dt,
            states: Vec::new(),
            components: Vec::new(),
            matrix: MnaMatrix::new(0),
            stamps: StampSet::new(),
            dirty: true,
            singular: false,
        }
    }

    pub(crate) fn bind_state(&mut self, arena: &mut CircuitArena, id: StateId) {
        let state = arena.state_mut(id);
        state.subsystem = Some(self.id);
        state.queued = false;
        self.states.push(id);
        self.dirty = true;
    }

    pub(crate) fn bind_component(&mut self, arena: &mut CircuitArena, id: ComponentId) {
        let component = arena.component_mut(id);
        component.subsystem = Some(self.id);
        component.queued = false;
        self.components.push(id);
        self.dirty = true;
    }

    /// Restamp and refactor the island's matrix.
    pub(crate) fn rebuild(&mut self, arena: &mut CircuitArena) {
        for (index, &state) in self.states.iter().enumerate() {
            arena.state_mut(state).index = index;
        }

        if self.matrix.size() != self.states.len() {
            self.matrix = MnaMatrix::new(self.states.len());
        } else {
            self.matrix.clear();
        }

        self.stamps.clear();
        for &component in &self.components {
            arena.component(component).stamp(arena, self.dt, &mut self.stamps);
        }
        self.matrix.apply(&self.stamps);

        self.singular = false;
        if let Err(e) = self.matrix.factor() {
            warn!("subsystem {}: {}", self.id, e);
            self.singular = true;
        }
        self.dirty = false;
    }

    /// Inject this tick's right-hand side, solve, and write the solution
    /// back into the bound states.
    pub(crate) fn solve(&mut self, arena: &mut CircuitArena) {
        if self.singular {
            for &state in &self.states {
                arena.state_mut(state).value = 0.0;
            }
            return;
        }

        self.matrix.clear_rhs();
        let dt = self.dt;

        for i in 0..self.components.len() {
            let id = self.components[i];

            // Read everything the injection needs before borrowing the
            // component mutably.
            let (pin_a, pin_b, aux): (Pin, Pin, [(Option<usize>, f64); 2]) = {
                let component = arena.component(id);
                let mut aux = [(None, 0.0); 2];
                for (k, &state) in component.aux_states().iter().enumerate() {
                    aux[k] = (Some(arena.state(state).index), arena.state(state).value);
                }
                (component.pins[0], component.pins[1], aux)
            };
            let va = arena.pin_value(pin_a);
            let vb = arena.pin_value(pin_b);
            let a = arena.pin_index(pin_a);
            let b = arena.pin_index(pin_b);

            match &mut arena.component_mut(id).kind {
                ComponentKind::Capacitor(c) => {
                    let v = va - vb;
                    let injection = c.conductance(dt) * v;
                    c.v_prev = v;
                    self.matrix.add_rhs(a, injection);
                    self.matrix.add_rhs(b, -injection);
                }
                ComponentKind::Inductor(l) => {
                    self.matrix.add_rhs(aux[0].0, l.ldt(dt) * aux[0].1);
                }
                ComponentKind::VoltageSource(source) => {
                    self.matrix.add_rhs(aux[0].0, source.voltage);
                }
                ComponentKind::Delay(d) => {
                    let g = d.conductance();
                    let injection_a = 2.0 * g * vb + d.old_ib;
                    let injection_b = 2.0 * g * va + d.old_ia;
                    self.matrix.add_rhs(a, injection_a);
                    self.matrix.add_rhs(b, injection_b);
                    d.old_ia = -injection_a;
                    d.old_ib = -injection_b;
                }
                _ => {}
            }
        }

        self.matrix.solve();

        for (index, &state) in self.states.iter().enumerate() {
            arena.state_mut(state).value = self.matrix.solution(index);
        }
    }

    /// Post-solve pass: reconstruct line interiors and re-evaluate diodes.
    pub(crate) fn flush(&mut self, arena: &mut CircuitArena) {
        for i in 0..self.components.len() {
            let id = self.components[i];
            let (pin_a, pin_b) = {
                let component = arena.component(id);
                (component.pins[0], component.pins[1])
            };
            let va = arena.pin_value(pin_a);
            let vb = arena.pin_value(pin_b);

            let line = match &arena.component(id).kind {
                ComponentKind::Line(l) => {
                    Some((l.members.clone(), l.interior.clone(), l.resistance))
                }
                _ => None,
            };
            if let Some((members, interior, total)) = line {
                // The chain current is shared; each member drops r * i.
                let current = (va - vb) / total;
                let mut u = va;
                for (k, &state) in interior.iter().enumerate() {
                    if let ComponentKind::Resistor(r) = &arena.component(members[k]).kind {
                        u -= r.resistance * current;
                    }
                    arena.state_mut(state).value = u;
                }
                continue;
            }

            if let ComponentKind::SwitchedResistor(sw) = &mut arena.component_mut(id).kind {
                if sw.diode {
                    let forward = va - vb > 0.0;
                    if forward != sw.closed {
                        sw.closed = forward;
                        self.dirty = true;
                    }
                }
            }
        }
    }
}
