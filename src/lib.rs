//! Steady 2D wind-field solver for pedestrian comfort studies.
//!
//! Incompressible RANS on a uniform collocated grid, solved with SIMPLE.
//! Buildings are impermeable blocks, trees porous discs with a quadratic
//! drag sink.

pub mod config;
pub mod error;
pub mod solver;
pub mod state;

pub use config::SimulationConfig;
pub use error::{ConfigError, DivergedError, GeometryError, SolverError};
pub use solver::{RunStatus, SimpleSolver, SolveResult, solve};
