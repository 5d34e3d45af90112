//! Excitation and coupling components: VoltageSource, Transformer, Delay.

use crate::circuit::StateId;
use crate::solver::StampSet;

/// An ideal voltage source.
///
/// Standard MNA augmentation: an auxiliary current unknown with +/-1
/// couplings to the voltage pins; the source voltage is injected on the
/// current row every tick, so changing it never dirties the matrix.
#[derive(Debug, Clone)]
pub struct VoltageSource {
    pub(crate) voltage: f64,
    /// Auxiliary branch-current unknown.
    pub(crate) current: StateId,
}

impl VoltageSource {
    pub(crate) fn new(voltage: f64, current: StateId) -> Self {
        Self { voltage, current }
    }

    pub(crate) fn stamp(
        &self,
        a: Option<usize>,
        b: Option<usize>,
        br: Option<usize>,
        stamps: &mut StampSet,
    ) {
        stamps.source_coupling(a, b, br);
    }
}

/// An ideal transformer between two ground-referenced ports.
///
/// Two auxiliary current unknowns; the cross-stamp pattern enforces
/// `v_b = ratio * v_a` and `i_a = -ratio * i_b`, so the two ports exchange
/// power losslessly.
#[derive(Debug, Clone)]
pub struct Transformer {
    pub(crate) ratio: f64,
    /// Auxiliary branch currents: primary, secondary.
    pub(crate) currents: [StateId; 2],
}

impl Transformer {
    pub(crate) fn new(ratio: f64, currents: [StateId; 2]) -> Self {
        Self {
            ratio: super::clamp_ratio(ratio),
            currents,
        }
    }

    pub(crate) fn stamp(
        &self,
        a: Option<usize>,
        b: Option<usize>,
        ia: Option<usize>,
        ib: Option<usize>,
        stamps: &mut StampSet,
    ) {
        let ratio = self.ratio;

        stamps.add(b, ib, 1.0);
        stamps.add(ib, b, 1.0);
        stamps.add(ib, a, -ratio);

        stamps.add(a, ia, 1.0);
        stamps.add(ia, a, 1.0);
        stamps.add(ia, b, -1.0 / ratio);

        stamps.add(ia, ia, 1.0);
        stamps.add(ia, ib, ratio);
        stamps.add(ib, ia, 1.0);
        stamps.add(ib, ib, ratio);
    }
}

/// A one-tick transmission line of characteristic impedance `Z`.
///
/// Each end sees the line as a conductance `1/Z` to ground plus a history
/// current carrying the far end's state from the previous tick, so a signal
/// crosses the line in exactly one tick and a matched termination absorbs
/// it without reflection. At DC the line is transparent.
#[derive(Debug, Clone)]
pub struct Delay {
    pub(crate) impedance: f64,
    pub(crate) old_ia: f64,
    pub(crate) old_ib: f64,
}

impl Delay {
    pub(crate) fn new(impedance: f64) -> Self {
        Self {
            impedance: super::clamp_resistance(impedance),
            old_ia: 0.0,
            old_ib: 0.0,
        }
    }

    pub(crate) fn conductance(&self) -> f64 {
        1.0 / self.impedance
    }

    /// Net current flowing from pin a to pin b.
    pub(crate) fn current(&self) -> f64 {
        (self.old_ia - self.old_ib) / 2.0
    }

    pub(crate) fn stamp(&self, a: Option<usize>, b: Option<usize>, stamps: &mut StampSet) {
        let g = self.conductance();
        stamps.add(a, a, g);
        stamps.add(b, b, g);
    }
}
