//! Out-of-range monitors with a leaky time budget.

use log::warn;
use rand::Rng;

use crate::circuit::{ComponentId, StateId, ThermalLoadId};

/// What a watchdog reads each tick.
#[derive(Debug, Clone, Copy)]
pub enum Probe {
    /// A raw state voltage.
    StateVoltage(StateId),
    /// Voltage across a component (pin a minus pin b).
    ComponentVoltage(ComponentId),
    /// Current through a component.
    ComponentCurrent(ComponentId),
    /// Temperature of a thermal load, relative to ambient.
    ThermalTemperature(ThermalLoadId),
}

/// A leaky-integrator limit monitor.
///
/// While the probed value sits inside `[min, max]` the time budget refills
/// at one second per second, capped at `timeout_reset`. A violation first
/// spends the joker (one free violation per cool-down cycle, restored only
/// when the budget is full again), then drains the budget proportionally to
/// how far out of range the value is. The violation that drives the budget
/// below zero trips the one-shot callback on that same tick and monitoring
/// stops, so a brief overshoot is forgiven but a sustained one is not.
///
/// The drain rate carries a per-instance jitter factor sampled once from
/// `[0.9, 1.1)` so a bank of identical monitors does not trip in the same
/// tick.
pub struct Watchdog {
    pub(crate) probe: Probe,
    min: f64,
    max: f64,
    timeout: f64,
    timeout_reset: f64,
    joker: bool,
    jitter: f64,
    callback: Option<Box<dyn FnMut()>>,
    tripped: bool,
}

impl Watchdog {
    pub fn new(probe: Probe, min: f64, max: f64, timeout_reset: f64) -> Self {
        let timeout_reset = if !timeout_reset.is_finite() || timeout_reset <= 0.0 {
            warn!(
                "watchdog timeout {} out of range, clamping to 1",
                timeout_reset
            );
            1.0
        } else {
            timeout_reset
        };
        Self {
            probe,
            min,
            max,
            timeout: timeout_reset,
            timeout_reset,
            joker: true,
            jitter: rand::thread_rng().gen_range(0.9..1.1),
            callback: None,
            tripped: false,
        }
    }

    /// Replace the sampled jitter with a fixed factor, for deterministic
    /// trip timing in tests.
    pub fn with_jitter(mut self, jitter: f64) -> Self {
        self.jitter = jitter;
        self
    }

    /// Attach the one-shot trip callback.
    pub fn attach<F: FnMut() + 'static>(&mut self, callback: F) {
        self.callback = Some(Box::new(callback));
    }

    pub fn is_tripped(&self) -> bool {
        self.tripped
    }

    /// Feed one probed value. Returns true on the tick the watchdog trips.
    pub(crate) fn observe(&mut self, value: f64, dt: f64) -> bool {
        if self.tripped {
            return false;
        }
        let overflow = (value - self.max).max(self.min - value);
        if overflow > 0.0 {
            if self.joker {
                self.joker = false;
            } else {
                self.timeout -= overflow * dt * self.jitter;
                if self.timeout < 0.0 {
                    self.tripped = true;
                    if let Some(mut callback) = self.callback.take() {
                        callback();
                    }
                    return true;
                }
            }
        } else {
            self.timeout += dt;
            if self.timeout >= self.timeout_reset {
                self.timeout = self.timeout_reset;
                self.joker = true;
            }
        }
        false
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn dog() -> Watchdog {
        Watchdog::new(Probe::StateVoltage(StateId(0)), -5.0, 5.0, 1.0).with_jitter(1.0)
    }

    #[test]
    fn in_range_never_trips() {
        let mut w = dog();
        for _ in 0..1000 {
            assert!(!w.observe(4.9, 0.1));
        }
        assert!(!w.is_tripped());
    }

    #[test]
    fn sustained_overflow_trips_after_budget() {
        let mut w = dog();
        // overflow = 5, drain = 0.5/step after the joker; budget goes
        // 1.0, 0.5, 0.0 and the fourth observation underflows to -0.5.
        for step in 1..=3 {
            assert!(!w.observe(10.0, 0.1), "tripped early at step {}", step);
        }
        assert!(w.observe(10.0, 0.1));
        assert!(w.is_tripped());
        // monitoring stops once tripped
        assert!(!w.observe(10.0, 0.1));
    }

    #[test]
    fn joker_forgives_a_single_spike() {
        let mut w = dog();
        assert!(!w.observe(10.0, 0.1));
        // budget untouched by the joker'd violation
        for _ in 0..100 {
            assert!(!w.observe(0.0, 0.1));
        }
        assert!(!w.is_tripped());
    }

    #[test]
    fn joker_restored_only_at_full_budget() {
        let mut w = dog();
        w.observe(10.0, 0.1); // joker spent
        w.observe(10.0, 0.1); // drains 0.5
        // two in-range ticks: budget at 0.7, joker still spent
        w.observe(0.0, 0.1);
        w.observe(0.0, 0.1);
        w.observe(10.0, 0.1); // drains again, no joker
        // refill to full restores the joker
        for _ in 0..20 {
            w.observe(0.0, 0.1);
        }
        w.observe(10.0, 0.1); // joker'd again
        assert!(!w.is_tripped());
    }

    #[test]
    fn callback_fires_once() {
        use std::cell::Cell;
        use std::rc::Rc;

        let count = Rc::new(Cell::new(0));
        let seen = Rc::clone(&count);
        let mut w = Watchdog::new(Probe::StateVoltage(StateId(0)), 0.0, 1.0, 0.1).with_jitter(1.0);
        w.attach(move || seen.set(seen.get() + 1));
        for _ in 0..100 {
            w.observe(100.0, 0.1);
        }
        assert_eq!(count.get(), 1);
    }

    #[test]
    fn undervoltage_counts_as_overflow() {
        let mut w = dog();
        w.observe(-10.0, 0.1); // joker
        for _ in 0..2 {
            assert!(!w.observe(-10.0, 0.1));
        }
        assert!(w.observe(-10.0, 0.1));
    }

    #[test]
    fn trip_survives_a_return_to_range() {
        let mut w = dog();
        w.observe(10.0, 0.1); // joker
        w.observe(10.0, 0.1); // 0.5
        w.observe(10.0, 0.1); // 0.0
        assert!(w.observe(10.0, 0.1)); // underflows, trips now
        // the value settling back in range must not refill a spent budget
        for _ in 0..50 {
            assert!(!w.observe(0.0, 0.1));
        }
        assert!(w.is_tripped());
    }
}
