//! Linear passive components: Resistor, Capacitor, Inductor.

use crate::circuit::StateId;
use crate::solver::StampSet;

/// A resistor.
#[derive(Debug, Clone)]
pub struct Resistor {
    /// Resistance in ohms, clamped to a finite positive value.
    pub(crate) resistance: f64,
}

impl Resistor {
    pub(crate) fn new(resistance: f64) -> Self {
        Self {
            resistance: super::clamp_resistance(resistance),
        }
    }

    pub(crate) fn conductance(&self) -> f64 {
        1.0 / self.resistance
    }

    pub(crate) fn stamp(&self, a: Option<usize>, b: Option<usize>, stamps: &mut StampSet) {
        stamps.conductance(a, b, self.conductance());
    }
}

/// A capacitor.
///
/// Discretized with the backward-Euler companion model: the capacitor stamps
/// a conductance `cdt = C/dt` like a resistor, and every tick a history
/// current `(v_a - v_b) * cdt` (using the previous tick's solved voltages) is
/// injected into the rhs, realizing `i = C * dv/dt` to first order.
#[derive(Debug, Clone)]
pub struct Capacitor {
    pub(crate) capacitance: f64,
    /// Voltage across the capacitor at the last injection, used to report
    /// the post-solve current.
    pub(crate) v_prev: f64,
}

impl Capacitor {
    pub(crate) fn new(capacitance: f64) -> Self {
        Self {
            capacitance: super::clamp_reactive(capacitance),
            v_prev: 0.0,
        }
    }

    pub(crate) fn conductance(&self, dt: f64) -> f64 {
        self.capacitance / dt
    }

    /// Current through the capacitor given the freshly solved voltage.
    pub(crate) fn current(&self, v_now: f64, dt: f64) -> f64 {
        (v_now - self.v_prev) * self.conductance(dt)
    }

    pub(crate) fn stamp(
        &self,
        a: Option<usize>,
        b: Option<usize>,
        dt: f64,
        stamps: &mut StampSet,
    ) {
        stamps.conductance(a, b, self.conductance(dt));
    }
}

/// An inductor.
///
/// Adds an auxiliary current state so that `v = L * di/dt` becomes a linear
/// row without voltage-current products: +/-1 couplings between the voltage
/// pins and the current unknown, and `-L/dt` on the current diagonal. The
/// per-tick injection carries the previous current forward (backward Euler).
#[derive(Debug, Clone)]
pub struct Inductor {
    pub(crate) inductance: f64,
    /// Auxiliary branch-current unknown.
    pub(crate) current: StateId,
}

impl Inductor {
    pub(crate) fn new(inductance: f64, current: StateId) -> Self {
        Self {
            inductance: super::clamp_reactive(inductance),
            current,
        }
    }

    pub(crate) fn ldt(&self, dt: f64) -> f64 {
        -self.inductance / dt
    }

    pub(crate) fn stamp(
        &self,
        a: Option<usize>,
        b: Option<usize>,
        br: Option<usize>,
        dt: f64,
        stamps: &mut StampSet,
    ) {
        stamps.source_coupling(a, b, br);
        stamps.add(br, br, self.ldt(dt));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::HIGH_IMPEDANCE;
    use approx::assert_relative_eq;

    #[test]
    fn resistor_conductance() {
        let r = Resistor::new(1000.0);
        assert_relative_eq!(r.conductance(), 0.001, epsilon = 1e-12);
    }

    #[test]
    fn zero_resistance_clamps_to_sentinel() {
        let r = Resistor::new(0.0);
        assert_relative_eq!(r.resistance, HIGH_IMPEDANCE);
        let r = Resistor::new(f64::NAN);
        assert_relative_eq!(r.resistance, HIGH_IMPEDANCE);
    }

    #[test]
    fn capacitor_companion_conductance() {
        let c = Capacitor::new(1e-6);
        let dt = 0.05;
        assert_relative_eq!(c.conductance(dt), 2e-5, epsilon = 1e-15);
    }
}
