//! Circuit components and their MNA stamps.
//!
//! The component set is a closed enum: each kind is a plain struct holding
//! its parameters plus any auxiliary branch-current states, and stamping is
//! dispatched through [`Component::stamp`]. Components only ever *emit*
//! matrix entries; the owning subsystem aggregates them, so nothing here
//! writes to shared solver storage.

use log::warn;

use crate::circuit::{CircuitArena, ComponentId, Pin, StateId, SubSystemId};
use crate::solver::StampSet;
use crate::{HIGH_IMPEDANCE, LOW_IMPEDANCE};

mod line;
mod linear;
mod sources;
mod switch;

pub use line::Line;
pub use linear::{Capacitor, Inductor, Resistor};
pub use sources::{Delay, Transformer, VoltageSource};
pub use switch::SwitchedResistor;

/// Smallest reactive parameter the engine will simulate. Backward-Euler
/// companion conductances blow up as C or L approach zero, so both are
/// floored here.
const REACTIVE_FLOOR: f64 = 1e-12;

/// Host-facing description of a component to connect.
///
/// Line aggregates are deliberately absent: they are engine-managed and only
/// ever created by the partitioner.
#[derive(Debug, Clone, Copy)]
pub enum ComponentSpec {
    Resistor { resistance: f64 },
    Capacitor { capacitance: f64 },
    Inductor { inductance: f64 },
    VoltageSource { voltage: f64 },
    Transformer { ratio: f64 },
    SwitchedResistor { resistance: f64, closed: bool, diode: bool },
    Delay { impedance: f64 },
}

impl ComponentSpec {
    pub(crate) fn kind_name(&self) -> &'static str {
        match self {
            ComponentSpec::Resistor { .. } => "Resistor",
            ComponentSpec::Capacitor { .. } => "Capacitor",
            ComponentSpec::Inductor { .. } => "Inductor",
            ComponentSpec::VoltageSource { .. } => "VoltageSource",
            ComponentSpec::Transformer { .. } => "Transformer",
            ComponentSpec::SwitchedResistor { .. } => "SwitchedResistor",
            ComponentSpec::Delay { .. } => "Delay",
        }
    }

    /// Every host-constructible component is a two-pin element.
    pub(crate) fn pin_count(&self) -> usize {
        2
    }

    /// Auxiliary branch-current unknowns this kind needs.
    pub(crate) fn aux_count(&self) -> usize {
        match self {
            ComponentSpec::Inductor { .. } | ComponentSpec::VoltageSource { .. } => 1,
            ComponentSpec::Transformer { .. } => 2,
            _ => 0,
        }
    }
}

/// Closed set of simulated element kinds.
#[derive(Debug, Clone)]
pub enum ComponentKind {
    Resistor(Resistor),
    Capacitor(Capacitor),
    Inductor(Inductor),
    VoltageSource(VoltageSource),
    Transformer(Transformer),
    SwitchedResistor(SwitchedResistor),
    Delay(Delay),
    Line(Line),
}

/// A connected component: its kind plus the bookkeeping shared by all kinds.
#[derive(Debug, Clone)]
pub struct Component {
    pub(crate) kind: ComponentKind,
    /// Connection pins, in the order the host gave them. `None` is ground.
    pub(crate) pins: Vec<Pin>,
    /// Owning subsystem, `None` while staged or abstracted.
    pub(crate) subsystem: Option<SubSystemId>,
    /// The line aggregate that absorbed this component, if any.
    pub(crate) abstracted_by: Option<ComponentId>,
    /// Whether the component currently sits in the root staging queue.
    pub(crate) queued: bool,
}

impl Component {
    pub(crate) fn from_spec(spec: ComponentSpec, pins: Vec<Pin>, aux: &[StateId]) -> Self {
        let kind = match spec {
            ComponentSpec::Resistor { resistance } => {
                ComponentKind::Resistor(Resistor::new(resistance))
            }
            ComponentSpec::Capacitor { capacitance } => {
                ComponentKind::Capacitor(Capacitor::new(capacitance))
            }
            ComponentSpec::Inductor { inductance } => {
                ComponentKind::Inductor(Inductor::new(inductance, aux[0]))
            }
            ComponentSpec::VoltageSource { voltage } => {
                ComponentKind::VoltageSource(VoltageSource::new(voltage, aux[0]))
            }
            ComponentSpec::Transformer { ratio } => {
                ComponentKind::Transformer(Transformer::new(ratio, [aux[0], aux[1]]))
            }
            ComponentSpec::SwitchedResistor {
                resistance,
                closed,
                diode,
            } => ComponentKind::SwitchedResistor(SwitchedResistor::new(resistance, closed, diode)),
            ComponentSpec::Delay { impedance } => ComponentKind::Delay(Delay::new(impedance)),
        };
        Self {
            kind,
            pins,
            subsystem: None,
            abstracted_by: None,
            queued: false,
        }
    }

    pub(crate) fn kind_name(&self) -> &'static str {
        match self.kind {
            ComponentKind::Resistor(_) => "Resistor",
            ComponentKind::Capacitor(_) => "Capacitor",
            ComponentKind::Inductor(_) => "Inductor",
            ComponentKind::VoltageSource(_) => "VoltageSource",
            ComponentKind::Transformer(_) => "Transformer",
            ComponentKind::SwitchedResistor(_) => "SwitchedResistor",
            ComponentKind::Delay(_) => "Delay",
            ComponentKind::Line(_) => "Line",
        }
    }

    /// Auxiliary branch-current states owned by this component.
    pub(crate) fn aux_states(&self) -> &[StateId] {
        match &self.kind {
            ComponentKind::Inductor(l) => std::slice::from_ref(&l.current),
            ComponentKind::VoltageSource(v) => std::slice::from_ref(&v.current),
            ComponentKind::Transformer(t) => &t.currents,
            _ => &[],
        }
    }

    /// Emit this component's matrix contributions.
    pub(crate) fn stamp(&self, arena: &CircuitArena, dt: f64, stamps: &mut StampSet) {
        let a = arena.pin_index(self.pins[0]);
        let b = arena.pin_index(self.pins[1]);
        match &self.kind {
            ComponentKind::Resistor(r) => r.stamp(a, b, stamps),
            ComponentKind::Capacitor(c) => c.stamp(a, b, dt, stamps),
            ComponentKind::Inductor(l) => {
                let br = arena.pin_index(Some(l.current));
                l.stamp(a, b, br, dt, stamps);
            }
            ComponentKind::VoltageSource(v) => {
                let br = arena.pin_index(Some(v.current));
                v.stamp(a, b, br, stamps);
            }
            ComponentKind::Transformer(t) => {
                let ia = arena.pin_index(Some(t.currents[0]));
                let ib = arena.pin_index(Some(t.currents[1]));
                t.stamp(a, b, ia, ib, stamps);
            }
            ComponentKind::SwitchedResistor(s) => s.stamp(a, b, stamps),
            ComponentKind::Delay(d) => d.stamp(a, b, stamps),
            ComponentKind::Line(line) => line.stamp(a, b, stamps),
        }
    }
}

/// Clamp a plain resistance. Zero, negative, and non-finite values all read
/// as "not really conducting" and become the open-branch sentinel.
pub(crate) fn clamp_resistance(resistance: f64) -> f64 {
    if !resistance.is_finite() || resistance <= 0.0 {
        warn!(
            "resistance {} out of range, clamping to {:e}",
            resistance, HIGH_IMPEDANCE
        );
        HIGH_IMPEDANCE
    } else {
        resistance
    }
}

/// Clamp a closed-switch resistance. Unlike a plain resistor a closed switch
/// legitimately wants to be "almost zero", so it floors at the low sentinel
/// instead of snapping open.
pub(crate) fn clamp_closed_resistance(resistance: f64) -> f64 {
    if !resistance.is_finite() || resistance < LOW_IMPEDANCE {
        warn!(
            "closed resistance {} out of range, clamping to {:e}",
            resistance, LOW_IMPEDANCE
        );
        LOW_IMPEDANCE
    } else {
        resistance
    }
}

/// Clamp a capacitance or inductance away from zero.
pub(crate) fn clamp_reactive(value: f64) -> f64 {
    if !value.is_finite() || value < REACTIVE_FLOOR {
        warn!(
            "reactive parameter {} out of range, clamping to {:e}",
            value, REACTIVE_FLOOR
        );
        REACTIVE_FLOOR
    } else {
        value
    }
}

/// Clamp a transformer ratio. A zero or non-finite ratio degenerates the
/// cross-stamps, so it falls back to 1:1.
pub(crate) fn clamp_ratio(ratio: f64) -> f64 {
    if !ratio.is_finite() || ratio == 0.0 {
        warn!("transformer ratio {} out of range, clamping to 1", ratio);
        1.0
    } else {
        ratio
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn clamps_cover_degenerate_inputs() {
        assert_eq!(clamp_resistance(-5.0), HIGH_IMPEDANCE);
        assert_eq!(clamp_resistance(f64::INFINITY), HIGH_IMPEDANCE);
        assert_eq!(clamp_closed_resistance(0.0), LOW_IMPEDANCE);
        assert_eq!(clamp_reactive(0.0), REACTIVE_FLOOR);
        assert_eq!(clamp_ratio(0.0), 1.0);
        assert_eq!(clamp_ratio(2.5), 2.5);
    }

    #[test]
    fn spec_aux_counts() {
        assert_eq!(ComponentSpec::Resistor { resistance: 1.0 }.aux_count(), 0);
        assert_eq!(ComponentSpec::Inductor { inductance: 1.0 }.aux_count(), 1);
        assert_eq!(ComponentSpec::Transformer { ratio: 2.0 }.aux_count(), 2);
    }
}
