//! Switched resistor, the building block for breakers and diodes.

use crate::solver::StampSet;
use crate::HIGH_IMPEDANCE;

/// A resistor that toggles between a user-set closed value and the
/// high-impedance sentinel when open. The matrix never sees a zero or an
/// infinite resistance either way.
///
/// With `diode` set, a post-solve pass re-evaluates the switch from the
/// sign of the voltage across it and applies the new position on the
/// *next* tick - a one-step-delayed relaxation rather than an intra-tick
/// iteration. Toggling dirties the owning subsystem.
#[derive(Debug, Clone)]
pub struct SwitchedResistor {
    /// Resistance while closed, clamped away from zero.
    pub(crate) resistance: f64,
    pub(crate) closed: bool,
    /// Whether the post-solve diode pass drives the switch position.
    pub(crate) diode: bool,
}

impl SwitchedResistor {
    pub(crate) fn new(resistance: f64, closed: bool, diode: bool) -> Self {
        Self {
            resistance: super::clamp_closed_resistance(resistance),
            closed,
            diode,
        }
    }

    pub(crate) fn effective_resistance(&self) -> f64 {
        if self.closed {
            self.resistance
        } else {
            HIGH_IMPEDANCE
        }
    }

    pub(crate) fn stamp(&self, a: Option<usize>, b: Option<usize>, stamps: &mut StampSet) {
        stamps.conductance(a, b, 1.0 / self.effective_resistance());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::LOW_IMPEDANCE;
    use approx::assert_relative_eq;

    #[test]
    fn open_switch_reads_sentinel() {
        let sw = SwitchedResistor::new(10.0, false, false);
        assert_relative_eq!(sw.effective_resistance(), HIGH_IMPEDANCE);
    }

    #[test]
    fn closed_resistance_never_zero() {
        let sw = SwitchedResistor::new(0.0, true, false);
        assert_relative_eq!(sw.effective_resistance(), LOW_IMPEDANCE);
    }
}
