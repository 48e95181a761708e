//! Error types for configuration, geometry and the SIMPLE iteration.

use thiserror::Error;

use crate::solver::{ResidualRecord, Snapshot};

/// Invalid grid or obstacle geometry.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum GeometryError {
    #[error("domain {axis} must be positive and finite, got {value}")]
    NonPositiveExtent { axis: &'static str, value: f64 },

    #[error("grid needs at least 3 cells along {axis} (boundary ring plus interior), got {cells}")]
    TooFewCells { axis: &'static str, cells: usize },

    #[error("obstacle #{index} ({kind}) lies entirely outside the domain")]
    ObstacleOutsideDomain { index: usize, kind: &'static str },

    #[error("obstacle #{index} ({kind}) is invalid: {reason}")]
    InvalidObstacle {
        index: usize,
        kind: &'static str,
        reason: &'static str,
    },
}

/// Rejected configuration. Raised before any iteration starts.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read configuration: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to parse configuration: {0}")]
    Parse(#[from] serde_yaml::Error),

    #[error("invalid value for '{key}': {value} ({reason})")]
    InvalidValue {
        key: &'static str,
        value: String,
        reason: &'static str,
    },

    #[error("unknown turbulence model '{0}' (expected constant, k-epsilon or sst)")]
    UnknownTurbulenceModel(String),

    #[error(transparent)]
    Geometry(#[from] GeometryError),
}

impl ConfigError {
    pub fn invalid(key: &'static str, value: impl ToString, reason: &'static str) -> Self {
        Self::InvalidValue {
            key,
            value: value.to_string(),
            reason,
        }
    }
}

/// The iteration produced a non-finite value.
///
/// Carries the last state in which every field was finite, and the residual
/// history up to the failing iteration.
#[derive(Debug, Error)]
#[error("solution diverged at iteration {iteration}: non-finite value in '{field}'")]
pub struct DivergedError {
    pub iteration: usize,
    pub field: &'static str,
    pub snapshot: Snapshot,
    pub residuals: Vec<ResidualRecord>,
}

#[derive(Debug, Error)]
pub enum SolverError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Diverged(Box<DivergedError>),
}

impl From<GeometryError> for SolverError {
    fn from(err: GeometryError) -> Self {
        Self::Config(ConfigError::Geometry(err))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_messages() {
        let err = GeometryError::ObstacleOutsideDomain { index: 2, kind: "building" };
        assert_eq!(err.to_string(), "obstacle #2 (building) lies entirely outside the domain");

        let err = ConfigError::invalid("solver.max_iterations", 0, "must be positive");
        assert!(err.to_string().contains("solver.max_iterations"), "got: {}", err);

        let err: SolverError = GeometryError::TooFewCells { axis: "nx", cells: 1 }.into();
        assert!(matches!(err, SolverError::Config(ConfigError::Geometry(_))));
    }
}
