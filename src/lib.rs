//! # Voltgrid Core
//!
//! A real-time electrical simulation engine for tick-driven host worlds.
//!
//! This library provides:
//! - Modified Nodal Analysis (MNA) based circuit solving with cached LU
//!   factorization per connected island
//! - Linear components (R, C, L), ideal sources, transformers, one-tick
//!   delay lines, and switched resistors with diode behavior
//! - Automatic partitioning of the circuit graph into independent
//!   subsystems, with series-resistor chains collapsed into lumped lines
//! - Thermal loads fed by dissipated power, and watchdog limit monitors
//!   with a leaky time budget
//!
//! ## Architecture
//!
//! The library is organized into several modules:
//!
//! - [`circuit`] - State and component storage behind opaque ids
//! - [`components`] - Component models and their matrix stamps
//! - [`solver`] - MNA matrix assembly and numerical solving
//! - [`system`] - The root system: staging, partitioning, and the tick loop
//! - [`thermal`] - Lumped thermal masses coupled to dissipated power
//! - [`watchdog`] - Out-of-range monitors with destruction callbacks
//!
//! ## Simulation Method
//!
//! Hosts build a circuit by allocating states (nodes) and connecting
//! components between them; `None` pins reference ground. Topology edits
//! stage until the next [`RootSystem::step`], which runs a fixed order:
//! apply edits, regenerate islands, rebuild dirty matrices, solve, flush,
//! then thermal and watchdog processes.
//!
//! Reactive elements (C, L) are discretized with backward-Euler companion
//! models, so each tick is a single linear solve per island; nonlinearity
//! is limited to the one-step-delayed diode switch.

pub mod circuit;
pub mod components;
pub mod error;
pub mod solver;
pub mod system;
pub mod thermal;
pub mod watchdog;

// Re-export main types for convenience
pub use circuit::{ComponentId, Pin, StateId, SubSystemId, ThermalLoadId, WatchdogId};
pub use components::ComponentSpec;
pub use error::{Result, VoltgridError};
pub use system::RootSystem;
pub use thermal::ThermalLoad;
pub use watchdog::{Probe, Watchdog};

/// Sentinel resistance for open branches. Large enough to read as an open
/// circuit, small enough to keep the matrix well conditioned.
pub const HIGH_IMPEDANCE: f64 = 1e9;

/// Floor for closed-switch resistance; a true zero would make the matrix
/// singular.
pub const LOW_IMPEDANCE: f64 = 1e-9;
