//! The root system: topology staging, island partitioning, and the tick loop.

use log::{debug, warn};

use crate::circuit::{
    CircuitArena, ComponentId, Pin, StateId, SubSystemId, ThermalLoadId, WatchdogId,
};
use crate::components::{
    clamp_closed_resistance, clamp_ratio, clamp_reactive, clamp_resistance, Component,
    ComponentKind, ComponentSpec, Line,
};
use crate::error::{Result, VoltgridError};
use crate::solver::SubSystem;
use crate::thermal::ThermalLoad;
use crate::watchdog::{Probe, Watchdog};

const DEFAULT_DT: f64 = 0.05;

/// A staged topology change, applied in call order at the next tick.
enum TopologyEdit {
    Connect(ComponentId),
    Disconnect(ComponentId),
}

/// Feeds a component's dissipated power into a thermal load each tick.
#[derive(Debug, Clone, Copy)]
struct ThermalCoupling {
    component: ComponentId,
    load: ThermalLoadId,
}

/// Owner of the whole simulation: the arena, the subsystem slab, staging
/// queues, and the root-level processes (thermal loads, watchdogs).
///
/// Hosts only ever talk to the root system. Topology edits stage until the
/// next [`step`](RootSystem::step); everything else (parameter setters, value
/// getters) applies immediately. The time step is fixed at construction so
/// every companion model and cached factorization agrees on `dt`.
pub struct RootSystem {
    dt: f64,
    arena: CircuitArena,
    subsystems: Vec<Option<SubSystem>>,
    free_subsystems: Vec<usize>,
    queued_states: Vec<StateId>,
    queued_components: Vec<ComponentId>,
    edits: Vec<TopologyEdit>,
    thermal_loads: Vec<ThermalLoad>,
    couplings: Vec<ThermalCoupling>,
    watchdogs: Vec<Watchdog>,
}

impl RootSystem {
    pub fn new(dt: f64) -> Self {
        let dt = if !dt.is_finite() || dt <= 0.0 {
            warn!("time step {} out of range, using {}", dt, DEFAULT_DT);
            DEFAULT_DT
        } else {
            dt
        };
        Self {
            dt,
            arena: CircuitArena::new(),
            subsystems: Vec::new(),
            free_subsystems: Vec::new(),
            queued_states: Vec::new(),
            queued_components: Vec::new(),
            edits: Vec::new(),
            thermal_loads: Vec::new(),
            couplings: Vec::new(),
            watchdogs: Vec::new(),
        }
    }

    pub fn dt(&self) -> f64 {
        self.dt
    }

    /// Allocate a fresh circuit node.
    pub fn add_state(&mut self) -> StateId {
        let id = self.arena.alloc_state();
        self.arena.state_mut(id).queued = true;
        self.queued_states.push(id);
        id
    }

    /// Allow (or forbid) the partitioner to fold this state into a resistor
    /// line. Turning eligibility off while the state is absorbed dissolves
    /// the line.
    pub fn set_line_eligible(&mut self, state: StateId, eligible: bool) -> Result<()> {
        let absorbed = {
            let st = self.arena.try_state_mut(state)?;
            st.line_eligible = eligible;
            st.abstracted_by
        };
        if !eligible {
            if let Some(line) = absorbed {
                self.dissolve_line(line);
            }
        }
        Ok(())
    }

    /// Stage a new component. The component and its auxiliary current states
    /// exist immediately (so parameters can be set before the next tick), but
    /// it joins the matrix only at the next [`step`](RootSystem::step).
    pub fn connect(&mut self, spec: ComponentSpec, pins: &[Pin]) -> Result<ComponentId> {
        if pins.len() != spec.pin_count() {
            return Err(VoltgridError::PinCount {
                kind: spec.kind_name(),
                expected: spec.pin_count(),
                found: pins.len(),
            });
        }
        for &pin in pins {
            if let Some(state) = pin {
                self.arena.try_state(state)?;
            }
        }
        if let (Some(a), Some(b)) = (pins[0], pins[1]) {
            if a == b {
                warn!("{} connected to itself on {}", spec.kind_name(), a);
            }
        }

        let aux: Vec<StateId> = (0..spec.aux_count())
            .map(|_| self.arena.alloc_state())
            .collect();
        let id = self
            .arena
            .alloc_component(Component::from_spec(spec, pins.to_vec(), &aux));
        for &pin in pins {
            if let Some(state) = pin {
                self.arena.state_mut(state).components.push(id);
            }
        }
        for &state in &aux {
            self.arena.state_mut(state).components.push(id);
        }
        self.edits.push(TopologyEdit::Connect(id));
        Ok(id)
    }

    /// Stage a component removal. Node states left with no remaining
    /// component are destroyed with it.
    pub fn disconnect(&mut self, id: ComponentId) -> Result<()> {
        let component = self.arena.try_component(id)?;
        if matches!(component.kind, ComponentKind::Line(_)) {
            return Err(VoltgridError::EngineManaged(id));
        }
        self.edits.push(TopologyEdit::Disconnect(id));
        Ok(())
    }

    // ---- parameter setters ----------------------------------------------

    pub fn set_resistance(&mut self, id: ComponentId, resistance: f64) -> Result<()> {
        let component = self.arena.try_component_mut(id)?;
        let name = component.kind_name();
        match &mut component.kind {
            ComponentKind::Resistor(r) => r.resistance = clamp_resistance(resistance),
            ComponentKind::SwitchedResistor(sw) => {
                sw.resistance = clamp_closed_resistance(resistance)
            }
            ComponentKind::Line(_) => return Err(VoltgridError::EngineManaged(id)),
            _ => {
                return Err(VoltgridError::WrongKind {
                    kind: name,
                    param: "resistance",
                })
            }
        }
        match self.arena.component(id).abstracted_by {
            Some(line) => self.refresh_line(line),
            None => self.mark_component_dirty(id),
        }
        Ok(())
    }

    pub fn set_capacitance(&mut self, id: ComponentId, capacitance: f64) -> Result<()> {
        let component = self.arena.try_component_mut(id)?;
        let name = component.kind_name();
        match &mut component.kind {
            ComponentKind::Capacitor(c) => c.capacitance = clamp_reactive(capacitance),
            _ => {
                return Err(VoltgridError::WrongKind {
                    kind: name,
                    param: "capacitance",
                })
            }
        }
        self.mark_component_dirty(id);
        Ok(())
    }

    pub fn set_inductance(&mut self, id: ComponentId, inductance: f64) -> Result<()> {
        let component = self.arena.try_component_mut(id)?;
        let name = component.kind_name();
        match &mut component.kind {
            ComponentKind::Inductor(l) => l.inductance = clamp_reactive(inductance),
            _ => {
                return Err(VoltgridError::WrongKind {
                    kind: name,
                    param: "inductance",
                })
            }
        }
        self.mark_component_dirty(id);
        Ok(())
    }

    /// Change a source voltage. Only the right-hand side depends on it, so
    /// this never forces a refactorization.
    pub fn set_voltage(&mut self, id: ComponentId, voltage: f64) -> Result<()> {
        let component = self.arena.try_component_mut(id)?;
        let name = component.kind_name();
        match &mut component.kind {
            ComponentKind::VoltageSource(source) => source.voltage = voltage,
            _ => {
                return Err(VoltgridError::WrongKind {
                    kind: name,
                    param: "voltage",
                })
            }
        }
        Ok(())
    }

    pub fn set_ratio(&mut self, id: ComponentId, ratio: f64) -> Result<()> {
        let component = self.arena.try_component_mut(id)?;
        let name = component.kind_name();
        match &mut component.kind {
            ComponentKind::Transformer(t) => t.ratio = clamp_ratio(ratio),
            _ => {
                return Err(VoltgridError::WrongKind {
                    kind: name,
                    param: "ratio",
                })
            }
        }
        self.mark_component_dirty(id);
        Ok(())
    }

    pub fn set_impedance(&mut self, id: ComponentId, impedance: f64) -> Result<()> {
        let component = self.arena.try_component_mut(id)?;
        let name = component.kind_name();
        match &mut component.kind {
            ComponentKind::Delay(d) => d.impedance = clamp_resistance(impedance),
            _ => {
                return Err(VoltgridError::WrongKind {
                    kind: name,
                    param: "impedance",
                })
            }
        }
        self.mark_component_dirty(id);
        Ok(())
    }

    pub fn set_switch_closed(&mut self, id: ComponentId, closed: bool) -> Result<()> {
        let component = self.arena.try_component_mut(id)?;
        let name = component.kind_name();
        match &mut component.kind {
            ComponentKind::SwitchedResistor(sw) => {
                if sw.closed == closed {
                    return Ok(());
                }
                sw.closed = closed;
            }
            _ => {
                return Err(VoltgridError::WrongKind {
                    kind: name,
                    param: "closed",
                })
            }
        }
        self.mark_component_dirty(id);
        Ok(())
    }

    // ---- read access -----------------------------------------------------

    /// Last solved voltage of a node.
    pub fn state_voltage(&self, id: StateId) -> Result<f64> {
        Ok(self.arena.try_state(id)?.value())
    }

    /// Voltage across a component, pin a minus pin b.
    pub fn voltage(&self, id: ComponentId) -> Result<f64> {
        let component = self.arena.try_component(id)?;
        Ok(self.component_voltage(component))
    }

    /// Current through a component, flowing from pin a to pin b.
    pub fn current(&self, id: ComponentId) -> Result<f64> {
        let component = self.arena.try_component(id)?;
        Ok(self.component_current(component))
    }

    /// Power delivered through a component (`v * i`).
    pub fn power(&self, id: ComponentId) -> Result<f64> {
        let component = self.arena.try_component(id)?;
        Ok(self.component_voltage(component) * self.component_current(component))
    }

    /// Effective resistance of a resistive component.
    pub fn resistance(&self, id: ComponentId) -> Result<f64> {
        let component = self.arena.try_component(id)?;
        match &component.kind {
            ComponentKind::Resistor(r) => Ok(r.resistance),
            ComponentKind::SwitchedResistor(sw) => Ok(sw.effective_resistance()),
            ComponentKind::Line(l) => Ok(l.resistance),
            _ => Err(VoltgridError::WrongKind {
                kind: component.kind_name(),
                param: "resistance",
            }),
        }
    }

    /// The line aggregate currently absorbing a component, if any.
    pub fn abstraction_of(&self, id: ComponentId) -> Result<Option<ComponentId>> {
        Ok(self.arena.try_component(id)?.abstracted_by)
    }

    /// Number of live islands.
    pub fn subsystem_count(&self) -> usize {
        self.subsystems.iter().filter(|s| s.is_some()).count()
    }

    // ---- thermal ---------------------------------------------------------

    pub fn add_thermal_load(&mut self, capacity: f64, leak_resistance: f64) -> ThermalLoadId {
        self.thermal_loads
            .push(ThermalLoad::new(capacity, leak_resistance));
        ThermalLoadId(self.thermal_loads.len() - 1)
    }

    pub fn thermal_temperature(&self, id: ThermalLoadId) -> Result<f64> {
        self.thermal_loads
            .get(id.0)
            .map(|load| load.temperature())
            .ok_or(VoltgridError::UnknownThermalLoad(id))
    }

    /// Manually buffer power into a load for the next tick.
    pub fn move_power_to(&mut self, id: ThermalLoadId, power: f64) -> Result<()> {
        self.thermal_loads
            .get_mut(id.0)
            .map(|load| load.move_power_to(power))
            .ok_or(VoltgridError::UnknownThermalLoad(id))
    }

    /// Feed a component's dissipated power (`|v * i|`) into a thermal load
    /// every tick.
    pub fn couple_thermal(&mut self, component: ComponentId, load: ThermalLoadId) -> Result<()> {
        self.arena.try_component(component)?;
        if load.0 >= self.thermal_loads.len() {
            return Err(VoltgridError::UnknownThermalLoad(load));
        }
        self.couplings.push(ThermalCoupling { component, load });
        Ok(())
    }

    // ---- watchdogs -------------------------------------------------------

    pub fn add_watchdog(&mut self, watchdog: Watchdog) -> WatchdogId {
        self.watchdogs.push(watchdog);
        WatchdogId(self.watchdogs.len() - 1)
    }

    /// Attach the one-shot trip callback of a registered watchdog.
    pub fn attach<F: FnMut() + 'static>(&mut self, id: WatchdogId, callback: F) -> Result<()> {
        self.watchdogs
            .get_mut(id.0)
            .map(|w| w.attach(callback))
            .ok_or(VoltgridError::UnknownWatchdog(id))
    }

    pub fn watchdog_tripped(&self, id: WatchdogId) -> Result<bool> {
        self.watchdogs
            .get(id.0)
            .map(|w| w.is_tripped())
            .ok_or(VoltgridError::UnknownWatchdog(id))
    }

    // ---- the tick --------------------------------------------------------

    /// Advance one tick: apply staged edits, regenerate islands, rebuild
    /// dirty matrices, solve, flush, then run root-level processes (thermal
    /// couplings, thermal integration, watchdogs) in registration order.
    pub fn step(&mut self) {
        self.flush_edits();
        self.generate();

        for slot in &mut self.subsystems {
            if let Some(sub) = slot {
                if sub.dirty {
                    sub.rebuild(&mut self.arena);
                }
            }
        }
        for slot in &mut self.subsystems {
            if let Some(sub) = slot {
                sub.solve(&mut self.arena);
            }
        }
        for slot in &mut self.subsystems {
            if let Some(sub) = slot {
                sub.flush(&mut self.arena);
            }
        }

        for i in 0..self.couplings.len() {
            let ThermalCoupling { component, load } = self.couplings[i];
            if !self.arena.contains_component(component) {
                continue;
            }
            let c = self.arena.component(component);
            let power = self.component_voltage(c) * self.component_current(c);
            if let Some(l) = self.thermal_loads.get_mut(load.0) {
                l.move_power_to(power.abs());
            }
        }
        for load in &mut self.thermal_loads {
            load.tick(self.dt);
        }

        self.run_watchdogs();
    }

    // ---- edit flush ------------------------------------------------------

    fn flush_edits(&mut self) {
        let edits = std::mem::take(&mut self.edits);
        for edit in edits {
            match edit {
                TopologyEdit::Connect(id) => self.apply_connect(id),
                TopologyEdit::Disconnect(id) => self.apply_disconnect(id),
            }
        }
    }

    fn apply_connect(&mut self, id: ComponentId) {
        if !self.arena.contains_component(id) {
            return;
        }
        let pins = self.arena.component(id).pins.clone();

        // Any line sitting on a pin state has to come apart first.
        for &pin in &pins {
            if let Some(state) = pin {
                if let Some(line) = self.arena.state(state).abstracted_by {
                    self.dissolve_line(line);
                }
            }
        }

        let mut owners: Vec<SubSystemId> = Vec::new();
        let mut all_bound = true;
        let mut any_state = false;
        for &pin in &pins {
            if let Some(state) = pin {
                any_state = true;
                match self.arena.state(state).subsystem {
                    Some(owner) => {
                        if !owners.contains(&owner) {
                            owners.push(owner);
                        }
                    }
                    None => all_bound = false,
                }
            }
        }

        // Everything already lives in one island: bind directly, no
        // regeneration needed.
        if any_state && all_bound && owners.len() == 1 {
            let aux: Vec<StateId> = self.arena.component(id).aux_states().to_vec();
            if let Some(sub) = self.subsystems[owners[0].0].as_mut() {
                sub.bind_component(&mut self.arena, id);
                for state in aux {
                    sub.bind_state(&mut self.arena, state);
                }
                return;
            }
        }

        // Pins span islands (or touch staged states): break the islands and
        // let regeneration merge by reachability.
        for owner in owners {
            self.break_subsystem(owner);
        }
        let aux: Vec<StateId> = self.arena.component(id).aux_states().to_vec();
        self.arena.component_mut(id).queued = true;
        self.queued_components.push(id);
        for state in aux {
            let st = self.arena.state_mut(state);
            st.queued = true;
            self.queued_states.push(state);
        }
        for &pin in &pins {
            if let Some(state) = pin {
                let st = self.arena.state_mut(state);
                if st.subsystem.is_none() && st.abstracted_by.is_none() && !st.queued {
                    st.queued = true;
                    self.queued_states.push(state);
                }
            }
        }
    }

    fn apply_disconnect(&mut self, id: ComponentId) {
        if !self.arena.contains_component(id) {
            warn!("disconnect of unknown component {}", id);
            return;
        }
        if let Some(line) = self.arena.component(id).abstracted_by {
            self.dissolve_line(line);
        }
        if let Some(owner) = self.arena.component(id).subsystem {
            self.break_subsystem(owner);
        }

        let pins = self.arena.component(id).pins.clone();
        let aux: Vec<StateId> = self.arena.component(id).aux_states().to_vec();
        for &pin in &pins {
            if let Some(state) = pin {
                if !self.arena.contains_state(state) {
                    continue;
                }
                self.arena
                    .state_mut(state)
                    .components
                    .retain(|&c| c != id);
                if self.arena.state(state).components.is_empty() {
                    self.arena.free_state(state);
                }
            }
        }
        for state in aux {
            self.arena.free_state(state);
        }
        self.arena.free_component(id);
        self.couplings.retain(|c| c.component != id);
    }

    // ---- islands ---------------------------------------------------------

    fn alloc_subsystem(&mut self) -> SubSystemId {
        match self.free_subsystems.pop() {
            Some(slot) => SubSystemId(slot),
            None => {
                self.subsystems.push(None);
                SubSystemId(self.subsystems.len() - 1)
            }
        }
    }

    /// Return every member of a subsystem to the staging queues, dissolving
    /// its lines back to raw resistors on the way.
    fn break_subsystem(&mut self, id: SubSystemId) {
        let Some(sub) = self.subsystems[id.0].take() else {
            return;
        };
        self.free_subsystems.push(id.0);
        for cid in sub.components {
            if !self.arena.contains_component(cid) {
                continue;
            }
            if matches!(self.arena.component(cid).kind, ComponentKind::Line(_)) {
                self.dissolve_line_unbound(cid);
                continue;
            }
            let component = self.arena.component_mut(cid);
            component.subsystem = None;
            component.queued = true;
            self.queued_components.push(cid);
        }
        for sid in sub.states {
            if !self.arena.contains_state(sid) {
                continue;
            }
            let state = self.arena.state_mut(sid);
            state.subsystem = None;
            state.queued = true;
            self.queued_states.push(sid);
        }
    }

    fn dissolve_line(&mut self, line: ComponentId) {
        if !self.arena.contains_component(line) {
            return;
        }
        match self.arena.component(line).subsystem {
            // Breaking the owner dissolves every line it holds, this one
            // included.
            Some(owner) => self.break_subsystem(owner),
            None => self.dissolve_line_unbound(line),
        }
    }

    /// Free a line component and restage its members and interior states.
    /// The line must already be out of any subsystem.
    fn dissolve_line_unbound(&mut self, line: ComponentId) {
        let (members, interior, pins) = {
            let component = self.arena.component(line);
            match &component.kind {
                ComponentKind::Line(l) => {
                    (l.members.clone(), l.interior.clone(), component.pins.clone())
                }
                _ => return,
            }
        };
        for member in members {
            let component = self.arena.component_mut(member);
            component.abstracted_by = None;
            component.subsystem = None;
            component.queued = true;
            self.queued_components.push(member);
        }
        for state in interior {
            let st = self.arena.state_mut(state);
            st.abstracted_by = None;
            st.subsystem = None;
            st.queued = true;
            self.queued_states.push(state);
        }
        for pin in pins {
            if let Some(state) = pin {
                if self.arena.contains_state(state) {
                    self.arena
                        .state_mut(state)
                        .components
                        .retain(|&c| c != line);
                }
            }
        }
        self.arena.free_component(line);
    }

    // ---- regeneration ----------------------------------------------------

    fn generate(&mut self) {
        if self.queued_states.is_empty() && self.queued_components.is_empty() {
            return;
        }
        self.generate_lines();

        while let Some(seed) = self.queued_components.pop() {
            if !self.arena.contains_component(seed) {
                continue;
            }
            let component = self.arena.component(seed);
            if !component.queued || component.subsystem.is_some() || component.abstracted_by.is_some()
            {
                continue;
            }
            self.build_island(seed);
        }

        while let Some(sid) = self.queued_states.pop() {
            if !self.arena.contains_state(sid) {
                continue;
            }
            let state = self.arena.state(sid);
            if !state.queued || state.subsystem.is_some() || state.abstracted_by.is_some() {
                continue;
            }
            // A leftover queued state: adopt it into the island of any live
            // neighbor, otherwise it just stays unbound until something
            // connects to it.
            let neighbor = self
                .arena
                .live_components(sid)
                .first()
                .and_then(|&c| self.arena.component(c).subsystem);
            match neighbor {
                Some(owner) => {
                    if let Some(sub) = self.subsystems[owner.0].as_mut() {
                        sub.bind_state(&mut self.arena, sid);
                    }
                }
                None => self.arena.state_mut(sid).queued = false,
            }
        }
    }

    /// Grow one island by BFS over the state-component graph, starting from
    /// a staged component.
    fn build_island(&mut self, seed: ComponentId) {
        let id = self.alloc_subsystem();
        let mut sub = SubSystem::new(id, self.dt);
        let mut stack = vec![seed];

        while let Some(cid) = stack.pop() {
            {
                let component = self.arena.component(cid);
                if component.subsystem.is_some() || component.abstracted_by.is_some() {
                    continue;
                }
            }
            let mut adjacent: Vec<StateId> = Vec::new();
            {
                let component = self.arena.component(cid);
                for &pin in &component.pins {
                    if let Some(state) = pin {
                        adjacent.push(state);
                    }
                }
                adjacent.extend_from_slice(component.aux_states());
            }
            sub.bind_component(&mut self.arena, cid);

            for sid in adjacent {
                let (bound_to, abstracted) = {
                    let state = self.arena.state(sid);
                    (state.subsystem, state.abstracted_by.is_some())
                };
                if abstracted {
                    continue;
                }
                match bound_to {
                    Some(owner) if owner == id => {}
                    Some(owner) => {
                        // A staged component reached into a live island:
                        // pull the island apart and absorb it.
                        self.break_subsystem(owner);
                        sub.bind_state(&mut self.arena, sid);
                        stack.extend(self.arena.live_components(sid));
                    }
                    None => {
                        sub.bind_state(&mut self.arena, sid);
                        stack.extend(self.arena.live_components(sid));
                    }
                }
            }
        }

        debug!(
            "subsystem {} built: {} states, {} components",
            id,
            sub.states.len(),
            sub.components.len()
        );
        self.subsystems[id.0] = Some(sub);
    }

    // ---- line extraction -------------------------------------------------

    /// Whether a state can be absorbed as a line interior: staged,
    /// eligible, and carrying exactly two distinct staged plain resistors.
    fn line_candidate(&self, sid: StateId) -> Option<(ComponentId, ComponentId)> {
        let state = self.arena.state(sid);
        if !state.queued || !state.line_eligible || state.abstracted_by.is_some() {
            return None;
        }
        let live = self.arena.live_components(sid);
        if live.len() != 2 || live[0] == live[1] {
            return None;
        }
        for &cid in &live {
            let component = self.arena.component(cid);
            if !component.queued || component.subsystem.is_some() {
                return None;
            }
            if !matches!(component.kind, ComponentKind::Resistor(_)) {
                return None;
            }
            if component.pins[0] == component.pins[1] {
                return None;
            }
        }
        Some((live[0], live[1]))
    }

    /// Walk a resistor chain away from `seed` through `via`, collecting the
    /// interior states found. Returns the states in walk order, the last
    /// resistor crossed, and whether the walk closed a ring back to `seed`.
    fn extract_chain(&self, seed: StateId, mut via: ComponentId) -> (Vec<StateId>, ComponentId, bool) {
        let mut states = Vec::new();
        let mut current = seed;
        loop {
            let component = self.arena.component(via);
            let next = if component.pins[0] == Some(current) {
                component.pins[1]
            } else {
                component.pins[0]
            };
            let next = match next {
                Some(next) => next,
                None => return (states, via, false),
            };
            if next == seed {
                return (states, via, true);
            }
            if self.line_candidate(next).is_none() {
                return (states, via, false);
            }
            states.push(next);
            let live = self.arena.live_components(next);
            via = if live[0] == via { live[1] } else { live[0] };
            current = next;
        }
    }

    /// Collapse maximal chains of staged series resistors into Line
    /// aggregates before island partitioning.
    fn generate_lines(&mut self) {
        let snapshot = self.queued_states.clone();
        for seed in snapshot {
            if !self.arena.contains_state(seed) {
                continue;
            }
            let Some((c0, c1)) = self.line_candidate(seed) else {
                continue;
            };

            let (left_states, left_term, ring) = self.extract_chain(seed, c0);
            let (interior, first) = if ring {
                // The ring keeps `seed` as both boundaries; every other
                // candidate on the loop goes interior.
                (left_states, c0)
            } else {
                let (right_states, _, _) = self.extract_chain(seed, c1);
                let mut interior: Vec<StateId> = left_states.iter().rev().copied().collect();
                interior.push(seed);
                interior.extend(right_states);
                (interior, left_term)
            };

            // Rebuild the ordered member list by hopping state to state.
            let mut members = vec![first];
            let mut via = first;
            for &state in &interior {
                let live = self.arena.live_components(state);
                via = if live[0] == via { live[1] } else { live[0] };
                members.push(via);
            }
            let (pin_a, pin_b) = if ring {
                (Some(seed), Some(seed))
            } else {
                (
                    self.other_end(members[0], interior[0]),
                    self.other_end(members[members.len() - 1], interior[interior.len() - 1]),
                )
            };

            let mut total = 0.0;
            for &member in &members {
                if let ComponentKind::Resistor(r) = &self.arena.component(member).kind {
                    total += r.resistance;
                }
            }

            let line = self.arena.alloc_component(Component {
                kind: ComponentKind::Line(Line::new(members.clone(), interior.clone(), total)),
                pins: vec![pin_a, pin_b],
                subsystem: None,
                abstracted_by: None,
                queued: true,
            });
            debug!(
                "line {} absorbs {} resistors ({} interior states), R = {}",
                line,
                members.len(),
                interior.len(),
                total
            );

            for &member in &members {
                let component = self.arena.component_mut(member);
                component.abstracted_by = Some(line);
                component.queued = false;
            }
            for &state in &interior {
                let st = self.arena.state_mut(state);
                st.abstracted_by = Some(line);
                st.subsystem = None;
                st.queued = false;
            }
            for pin in [pin_a, pin_b] {
                if let Some(state) = pin {
                    self.arena.state_mut(state).components.push(line);
                }
            }
            self.queued_components.push(line);
        }
    }

    /// The pin of `member` that is not `state`.
    fn other_end(&self, member: ComponentId, state: StateId) -> Pin {
        let component = self.arena.component(member);
        if component.pins[0] == Some(state) {
            component.pins[1]
        } else {
            component.pins[0]
        }
    }

    // ---- helpers ---------------------------------------------------------

    fn mark_component_dirty(&mut self, id: ComponentId) {
        if let Some(owner) = self.arena.component(id).subsystem {
            if let Some(sub) = self.subsystems[owner.0].as_mut() {
                sub.dirty = true;
            }
        }
    }

    /// Re-sum a line's lumped resistance after a member changed, and dirty
    /// its island.
    fn refresh_line(&mut self, line: ComponentId) {
        let members = match &self.arena.component(line).kind {
            ComponentKind::Line(l) => l.members.clone(),
            _ => return,
        };
        let mut total = 0.0;
        for &member in &members {
            if let ComponentKind::Resistor(r) = &self.arena.component(member).kind {
                total += r.resistance;
            }
        }
        if let ComponentKind::Line(l) = &mut self.arena.component_mut(line).kind {
            l.resistance = total;
        }
        self.mark_component_dirty(line);
    }

    fn component_voltage(&self, component: &Component) -> f64 {
        self.arena.pin_value(component.pins[0]) - self.arena.pin_value(component.pins[1])
    }

    fn component_current(&self, component: &Component) -> f64 {
        let v = self.component_voltage(component);
        match &component.kind {
            ComponentKind::Resistor(r) => v / r.resistance,
            ComponentKind::SwitchedResistor(sw) => v / sw.effective_resistance(),
            ComponentKind::Line(l) => v / l.resistance,
            ComponentKind::Capacitor(c) => c.current(v, self.dt),
            ComponentKind::Inductor(l) => self.arena.state(l.current).value,
            ComponentKind::VoltageSource(source) => -self.arena.state(source.current).value,
            ComponentKind::Transformer(t) => self.arena.state(t.currents[0]).value,
            ComponentKind::Delay(d) => d.current(),
        }
    }

    fn probe_value(&self, probe: &Probe) -> Option<f64> {
        match *probe {
            Probe::StateVoltage(state) => {
                if self.arena.contains_state(state) {
                    Some(self.arena.state(state).value)
                } else {
                    None
                }
            }
            Probe::ComponentVoltage(component) => {
                if self.arena.contains_component(component) {
                    Some(self.component_voltage(self.arena.component(component)))
                } else {
                    None
                }
            }
            Probe::ComponentCurrent(component) => {
                if self.arena.contains_component(component) {
                    Some(self.component_current(self.arena.component(component)))
                } else {
                    None
                }
            }
            Probe::ThermalTemperature(load) => {
                self.thermal_loads.get(load.0).map(|l| l.temperature())
            }
        }
    }

    fn run_watchdogs(&mut self) {
        let mut readings: Vec<Option<f64>> = Vec::with_capacity(self.watchdogs.len());
        for watchdog in &self.watchdogs {
            readings.push(self.probe_value(&watchdog.probe));
        }
        let dt = self.dt;
        for (watchdog, reading) in self.watchdogs.iter_mut().zip(readings) {
            if let Some(value) = reading {
                watchdog.observe(value, dt);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use std::cell::Cell;
    use std::rc::Rc;

    fn resistor(r: f64) -> ComponentSpec {
        ComponentSpec::Resistor { resistance: r }
    }

    fn source(u: f64) -> ComponentSpec {
        ComponentSpec::VoltageSource { voltage: u }
    }

    #[test]
    fn ohms_law_converges_in_one_step() {
        let mut rs = RootSystem::new(0.05);
        let n1 = rs.add_state();
        let vs = rs.connect(source(10.0), &[Some(n1), None]).unwrap();
        let r = rs.connect(resistor(5.0), &[Some(n1), None]).unwrap();
        rs.step();
        assert_relative_eq!(rs.state_voltage(n1).unwrap(), 10.0, epsilon = 1e-9);
        assert_relative_eq!(rs.current(r).unwrap(), 2.0, epsilon = 1e-9);
        assert_relative_eq!(rs.current(vs).unwrap(), 2.0, epsilon = 1e-9);
        assert_relative_eq!(rs.power(r).unwrap(), 20.0, epsilon = 1e-9);
    }

    /// Builds 10V -- 1R -- 2R -- 3R -- 4R -- gnd, interior nodes eligible
    /// for line extraction when `compress` is set.
    fn ladder(compress: bool) -> (RootSystem, [StateId; 4], [ComponentId; 4]) {
        let mut rs = RootSystem::new(0.1);
        let n0 = rs.add_state();
        let n1 = rs.add_state();
        let n2 = rs.add_state();
        let n3 = rs.add_state();
        if compress {
            for s in [n1, n2, n3] {
                rs.set_line_eligible(s, true).unwrap();
            }
        }
        rs.connect(source(10.0), &[Some(n0), None]).unwrap();
        let r1 = rs.connect(resistor(1.0), &[Some(n0), Some(n1)]).unwrap();
        let r2 = rs.connect(resistor(2.0), &[Some(n1), Some(n2)]).unwrap();
        let r3 = rs.connect(resistor(3.0), &[Some(n2), Some(n3)]).unwrap();
        let r4 = rs.connect(resistor(4.0), &[Some(n3), None]).unwrap();
        (rs, [n0, n1, n2, n3], [r1, r2, r3, r4])
    }

    #[test]
    fn line_compression_matches_uncompressed_chain() {
        let (mut plain, pn, _) = ladder(false);
        let (mut packed, cn, cr) = ladder(true);
        plain.step();
        packed.step();

        // the chain collapsed into one lumped resistor
        let line = packed.abstraction_of(cr[1]).unwrap().expect("absorbed");
        assert_relative_eq!(packed.resistance(line).unwrap(), 10.0, epsilon = 1e-12);
        assert_eq!(packed.subsystem_count(), 1);

        for (p, c) in pn.iter().zip(cn.iter()) {
            assert_relative_eq!(
                plain.state_voltage(*p).unwrap(),
                packed.state_voltage(*c).unwrap(),
                epsilon = 1e-9
            );
        }
        assert_relative_eq!(packed.state_voltage(cn[1]).unwrap(), 9.0, epsilon = 1e-9);
        assert_relative_eq!(packed.state_voltage(cn[2]).unwrap(), 7.0, epsilon = 1e-9);
        assert_relative_eq!(packed.state_voltage(cn[3]).unwrap(), 4.0, epsilon = 1e-9);
        assert_relative_eq!(packed.current(cr[1]).unwrap(), 1.0, epsilon = 1e-9);
    }

    #[test]
    fn absorbed_member_resistance_change_propagates() {
        let (mut rs, n, r) = ladder(true);
        rs.step();
        let line = rs.abstraction_of(r[1]).unwrap().expect("absorbed");
        rs.set_resistance(r[1], 7.0).unwrap();
        assert_relative_eq!(rs.resistance(line).unwrap(), 15.0, epsilon = 1e-12);
        rs.step();
        // i = 10/15, drop over the first ohm
        assert_relative_eq!(
            rs.state_voltage(n[1]).unwrap(),
            10.0 - 10.0 / 15.0,
            epsilon = 1e-9
        );
    }

    #[test]
    fn rc_charge_is_monotone_and_settles() {
        let mut rs = RootSystem::new(0.1);
        let n1 = rs.add_state();
        let n2 = rs.add_state();
        rs.connect(source(10.0), &[Some(n1), None]).unwrap();
        rs.connect(resistor(10.0), &[Some(n1), Some(n2)]).unwrap();
        rs.connect(ComponentSpec::Capacitor { capacitance: 1.0 }, &[Some(n2), None])
            .unwrap();

        let mut previous = 0.0;
        for _ in 0..2000 {
            rs.step();
            let vc = rs.state_voltage(n2).unwrap();
            assert!(vc >= previous, "charge must be monotone");
            assert!(vc <= 10.0 + 1e-9);
            previous = vc;
        }
        assert_relative_eq!(previous, 10.0, epsilon = 1e-6);
        // at equilibrium another tick changes nothing measurable
        rs.step();
        assert_relative_eq!(rs.state_voltage(n2).unwrap(), previous, epsilon = 1e-8);
    }

    #[test]
    fn inductor_current_ramps_linearly() {
        let mut rs = RootSystem::new(0.1);
        let n1 = rs.add_state();
        rs.connect(source(1.0), &[Some(n1), None]).unwrap();
        let l = rs
            .connect(ComponentSpec::Inductor { inductance: 1.0 }, &[Some(n1), None])
            .unwrap();
        for k in 1..=5 {
            rs.step();
            // i grows by U * dt/L per tick
            assert_relative_eq!(rs.current(l).unwrap(), 0.1 * k as f64, epsilon = 1e-9);
        }
    }

    #[test]
    fn transformer_scales_voltage_and_balances_power() {
        let mut rs = RootSystem::new(0.05);
        let n1 = rs.add_state();
        let n2 = rs.add_state();
        let vs = rs.connect(source(10.0), &[Some(n1), None]).unwrap();
        rs.connect(ComponentSpec::Transformer { ratio: 2.0 }, &[Some(n1), Some(n2)])
            .unwrap();
        let r = rs.connect(resistor(100.0), &[Some(n2), None]).unwrap();
        rs.step();
        assert_relative_eq!(rs.state_voltage(n2).unwrap(), 20.0, epsilon = 1e-9);
        assert_relative_eq!(rs.current(r).unwrap(), 0.2, epsilon = 1e-9);
        assert_relative_eq!(rs.current(vs).unwrap(), 0.4, epsilon = 1e-9);
        // lossless: the source feeds exactly what the load burns
        assert_relative_eq!(rs.power(vs).unwrap(), rs.power(r).unwrap(), epsilon = 1e-9);
    }

    #[test]
    fn delay_is_transparent_at_dc() {
        let mut rs = RootSystem::new(0.05);
        let n1 = rs.add_state();
        let n2 = rs.add_state();
        rs.connect(source(5.0), &[Some(n1), None]).unwrap();
        let d = rs
            .connect(ComponentSpec::Delay { impedance: 10.0 }, &[Some(n1), Some(n2)])
            .unwrap();
        rs.connect(resistor(10.0), &[Some(n2), None]).unwrap();
        // matched termination: settled one tick after the signal arrives
        for _ in 0..3 {
            rs.step();
        }
        assert_relative_eq!(rs.state_voltage(n2).unwrap(), 5.0, epsilon = 1e-9);
        assert_relative_eq!(rs.current(d).unwrap(), 0.5, epsilon = 1e-9);
    }

    #[test]
    fn diode_settles_after_polarity_flip() {
        let mut rs = RootSystem::new(0.05);
        let n1 = rs.add_state();
        let n2 = rs.add_state();
        let vs = rs.connect(source(10.0), &[Some(n1), None]).unwrap();
        let diode = rs
            .connect(
                ComponentSpec::SwitchedResistor {
                    resistance: 0.01,
                    closed: false,
                    diode: true,
                },
                &[Some(n1), Some(n2)],
            )
            .unwrap();
        let r = rs.connect(resistor(100.0), &[Some(n2), None]).unwrap();

        rs.step(); // open, forward voltage seen, closes for the next tick
        rs.step();
        assert_relative_eq!(rs.current(r).unwrap(), 0.1, epsilon = 1e-3);

        rs.set_voltage(vs, -10.0).unwrap();
        rs.step(); // conducting backwards for one tick, then opens
        rs.step();
        assert!(rs.current(diode).unwrap().abs() < 1e-6);
    }

    #[test]
    fn partition_merge_and_split_round_trip() {
        let mut rs = RootSystem::new(0.05);
        let na1 = rs.add_state();
        let na2 = rs.add_state();
        rs.connect(source(1.0), &[Some(na1), None]).unwrap();
        rs.connect(resistor(1.0), &[Some(na1), Some(na2)]).unwrap();
        rs.connect(resistor(2.0), &[Some(na2), None]).unwrap();

        let nb1 = rs.add_state();
        let nb2 = rs.add_state();
        rs.connect(source(1.5), &[Some(nb1), None]).unwrap();
        rs.connect(resistor(1.0), &[Some(nb1), Some(nb2)]).unwrap();
        rs.connect(resistor(1.0), &[Some(nb2), None]).unwrap();

        rs.step();
        assert_eq!(rs.subsystem_count(), 2);
        assert_relative_eq!(rs.state_voltage(na2).unwrap(), 2.0 / 3.0, epsilon = 1e-9);
        assert_relative_eq!(rs.state_voltage(nb2).unwrap(), 0.75, epsilon = 1e-9);

        let bridge = rs.connect(resistor(1.0), &[Some(na2), Some(nb2)]).unwrap();
        rs.step();
        assert_eq!(rs.subsystem_count(), 1);
        assert!(rs.current(bridge).unwrap().abs() > 1e-6);

        rs.disconnect(bridge).unwrap();
        rs.step();
        assert_eq!(rs.subsystem_count(), 2);
        assert_relative_eq!(rs.state_voltage(na2).unwrap(), 2.0 / 3.0, epsilon = 1e-9);
        assert_relative_eq!(rs.state_voltage(nb2).unwrap(), 0.75, epsilon = 1e-9);
    }

    #[test]
    fn connect_into_live_island_binds_directly() {
        let mut rs = RootSystem::new(0.05);
        let n1 = rs.add_state();
        let vs = rs.connect(source(10.0), &[Some(n1), None]).unwrap();
        rs.connect(resistor(5.0), &[Some(n1), None]).unwrap();
        rs.step();
        rs.connect(resistor(5.0), &[Some(n1), None]).unwrap();
        rs.step();
        assert_eq!(rs.subsystem_count(), 1);
        assert_relative_eq!(rs.current(vs).unwrap(), 4.0, epsilon = 1e-9);
    }

    #[test]
    fn watchdog_trips_exactly_once() {
        let mut rs = RootSystem::new(0.05);
        let n1 = rs.add_state();
        rs.connect(source(10.0), &[Some(n1), None]).unwrap();
        rs.connect(resistor(5.0), &[Some(n1), None]).unwrap();

        let trips = Rc::new(Cell::new(0u32));
        let seen = Rc::clone(&trips);
        let w = rs.add_watchdog(
            Watchdog::new(Probe::StateVoltage(n1), -5.0, 5.0, 0.2).with_jitter(1.0),
        );
        rs.attach(w, move || seen.set(seen.get() + 1)).unwrap();

        for _ in 0..50 {
            rs.step();
        }
        assert_eq!(trips.get(), 1);
        assert!(rs.watchdog_tripped(w).unwrap());
    }

    #[test]
    fn thermal_coupling_accumulates_dissipated_power() {
        let mut rs = RootSystem::new(0.05);
        let n1 = rs.add_state();
        rs.connect(source(10.0), &[Some(n1), None]).unwrap();
        let r = rs.connect(resistor(10.0), &[Some(n1), None]).unwrap();
        let load = rs.add_thermal_load(100.0, 1e12);
        rs.couple_thermal(r, load).unwrap();

        for _ in 0..3 {
            rs.step();
        }
        // 10 W into 100 J/K at 0.05 s/tick
        assert_relative_eq!(rs.thermal_temperature(load).unwrap(), 0.015, epsilon = 1e-6);
    }

    #[test]
    fn self_connection_is_tolerated() {
        let mut rs = RootSystem::new(0.05);
        let n1 = rs.add_state();
        rs.connect(source(10.0), &[Some(n1), None]).unwrap();
        let loopback = rs.connect(resistor(5.0), &[Some(n1), Some(n1)]).unwrap();
        rs.step();
        assert_relative_eq!(rs.state_voltage(n1).unwrap(), 10.0, epsilon = 1e-9);
        assert_relative_eq!(rs.current(loopback).unwrap(), 0.0, epsilon = 1e-12);
    }

    #[test]
    fn sourceless_island_solves_to_zero() {
        let mut rs = RootSystem::new(0.05);
        let n1 = rs.add_state();
        let n2 = rs.add_state();
        rs.connect(resistor(50.0), &[Some(n1), Some(n2)]).unwrap();
        rs.step();
        assert_eq!(rs.subsystem_count(), 1);
        assert_eq!(rs.state_voltage(n1).unwrap(), 0.0);
        assert_eq!(rs.state_voltage(n2).unwrap(), 0.0);
    }

    #[test]
    fn disconnect_destroys_orphaned_states() {
        let mut rs = RootSystem::new(0.05);
        let n1 = rs.add_state();
        let n2 = rs.add_state();
        let r = rs.connect(resistor(50.0), &[Some(n1), Some(n2)]).unwrap();
        rs.step();
        rs.disconnect(r).unwrap();
        rs.step();
        assert!(rs.state_voltage(n1).is_err());
        assert!(rs.state_voltage(n2).is_err());
        assert!(rs.current(r).is_err());
    }

    #[test]
    fn api_misuse_is_reported() {
        let mut rs = RootSystem::new(0.05);
        let n1 = rs.add_state();
        assert!(matches!(
            rs.connect(resistor(5.0), &[Some(n1)]),
            Err(VoltgridError::PinCount { .. })
        ));
        let r = rs.connect(resistor(5.0), &[Some(n1), None]).unwrap();
        assert!(matches!(
            rs.set_capacitance(r, 1.0),
            Err(VoltgridError::WrongKind { .. })
        ));
        assert!(rs.state_voltage(StateId(999)).is_err());
    }

    #[test]
    fn unconnected_state_reads_zero() {
        let mut rs = RootSystem::new(0.05);
        let lonely = rs.add_state();
        rs.step();
        assert_eq!(rs.state_voltage(lonely).unwrap(), 0.0);
    }

    #[test]
    fn voltage_change_needs_no_refactor_to_apply() {
        let mut rs = RootSystem::new(0.05);
        let n1 = rs.add_state();
        let vs = rs.connect(source(10.0), &[Some(n1), None]).unwrap();
        rs.connect(resistor(5.0), &[Some(n1), None]).unwrap();
        rs.step();
        rs.set_voltage(vs, 4.0).unwrap();
        rs.step();
        assert_relative_eq!(rs.state_voltage(n1).unwrap(), 4.0, epsilon = 1e-9);
    }
}
