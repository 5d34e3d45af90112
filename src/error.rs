//! Error types for the voltgrid circuit engine.
//!
//! This module provides a unified error type [`VoltgridError`] for everything
//! the host can get wrong at the API boundary: stale handles, bad pin counts,
//! and parameter setters applied to the wrong component kind.
//!
//! Numerical trouble is deliberately *not* a fatal error. A singular system
//! matrix is logged and the affected island solves to zero until the topology
//! changes; sentinel impedances keep open branches finite so the direct solve
//! stays well posed in normal operation.

use thiserror::Error;

use crate::circuit::{ComponentId, StateId, ThermalLoadId, WatchdogId};

/// Result type alias using [`VoltgridError`].
pub type Result<T> = std::result::Result<T, VoltgridError>;

/// Unified error type for all voltgrid operations.
#[derive(Error, Debug)]
pub enum VoltgridError {
    /// A component handle that was never allocated or has been disconnected.
    #[error("unknown component {0}")]
    UnknownComponent(ComponentId),

    /// A state handle that was never allocated or has been destroyed.
    #[error("unknown state {0}")]
    UnknownState(StateId),

    /// A thermal load handle that was never allocated.
    #[error("unknown thermal load {0}")]
    UnknownThermalLoad(ThermalLoadId),

    /// A watchdog handle that was never allocated.
    #[error("unknown watchdog {0}")]
    UnknownWatchdog(WatchdogId),

    /// A component was connected with the wrong number of pins.
    #[error("{kind} takes {expected} pins, got {found}")]
    PinCount {
        kind: &'static str,
        expected: usize,
        found: usize,
    },

    /// A parameter setter was applied to a component kind it does not fit.
    #[error("parameter '{param}' does not apply to a {kind}")]
    WrongKind {
        kind: &'static str,
        param: &'static str,
    },

    /// The component is owned and managed by the engine (a line aggregate)
    /// and cannot be edited or disconnected directly by the host.
    #[error("component {0} is managed by the engine and cannot be edited directly")]
    EngineManaged(ComponentId),

    /// The system matrix of an island could not be factored.
    ///
    /// Surfaced internally between the solver and the subsystem; the engine
    /// catches it, logs a warning, and zeroes the island's solution instead
    /// of propagating it to the host.
    #[error("singular matrix - island has no reference to drive its unknowns")]
    SingularMatrix,
}
