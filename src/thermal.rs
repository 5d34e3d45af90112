//! Lumped thermal masses heated by dissipated electrical power.

use log::warn;

use crate::HIGH_IMPEDANCE;

/// A lumped heat store.
///
/// Temperature is tracked relative to ambient. Power arrives through
/// [`move_power_to`](ThermalLoad::move_power_to) into a per-tick buffer;
/// integration applies the buffered power minus the ambient leak
/// `T/Rp` over one tick and clears the buffer, so multiple couplings
/// feeding one load accumulate before a single update.
#[derive(Debug, Clone)]
pub struct ThermalLoad {
    pub(crate) temperature: f64,
    /// Heat capacity in J/K.
    pub(crate) capacity: f64,
    /// Thermal resistance to ambient in K/W.
    pub(crate) leak_resistance: f64,
    pub(crate) power_buffer: f64,
}

impl ThermalLoad {
    pub(crate) fn new(capacity: f64, leak_resistance: f64) -> Self {
        let capacity = if !capacity.is_finite() || capacity <= 0.0 {
            warn!("thermal capacity {} out of range, clamping to 1", capacity);
            1.0
        } else {
            capacity
        };
        let leak_resistance = if !leak_resistance.is_finite() || leak_resistance <= 0.0 {
            warn!(
                "thermal leak resistance {} out of range, clamping to {:e}",
                leak_resistance, HIGH_IMPEDANCE
            );
            HIGH_IMPEDANCE
        } else {
            leak_resistance
        };
        Self {
            temperature: 0.0,
            capacity,
            leak_resistance,
            power_buffer: 0.0,
        }
    }

    /// Temperature above ambient, in kelvin.
    pub fn temperature(&self) -> f64 {
        self.temperature
    }

    /// Buffer power for the next integration tick. Non-finite input is
    /// dropped so one bad coupling cannot poison the store.
    pub(crate) fn move_power_to(&mut self, power: f64) {
        if power.is_finite() {
            self.power_buffer += power;
        }
    }

    pub(crate) fn tick(&mut self, dt: f64) {
        let net = self.power_buffer - self.temperature / self.leak_resistance;
        self.temperature += net * dt / self.capacity;
        self.power_buffer = 0.0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn buffered_power_heats_per_tick() {
        let mut load = ThermalLoad::new(100.0, 1e12);
        load.move_power_to(10.0);
        load.tick(0.05);
        assert_relative_eq!(load.temperature(), 0.005, epsilon = 1e-9);
        // buffer cleared, no further heating without new power
        load.tick(0.05);
        assert_relative_eq!(load.temperature(), 0.005, epsilon = 1e-6);
    }

    #[test]
    fn leak_pulls_back_toward_ambient() {
        let mut load = ThermalLoad::new(10.0, 2.0);
        load.temperature = 100.0;
        load.tick(0.1);
        // dT = -(100/2)*0.1/10 = -0.5
        assert_relative_eq!(load.temperature(), 99.5, epsilon = 1e-9);
    }

    #[test]
    fn non_finite_power_is_dropped() {
        let mut load = ThermalLoad::new(100.0, 1e12);
        load.move_power_to(f64::NAN);
        load.move_power_to(f64::INFINITY);
        load.tick(0.05);
        assert_eq!(load.temperature(), 0.0);
    }

    #[test]
    fn degenerate_parameters_are_clamped() {
        let load = ThermalLoad::new(0.0, -1.0);
        assert_eq!(load.capacity, 1.0);
        assert_eq!(load.leak_resistance, HIGH_IMPEDANCE);
    }
}
