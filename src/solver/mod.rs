//! Per-island solving: stamp collection, the dense LU core, and the
//! subsystem driver that ties components to the matrix.

mod mna;
mod subsystem;

pub use mna::{MatrixEntry, MnaMatrix, StampSet};

pub(crate) use subsystem::SubSystem;
