use std::path::Path;

use serde::Deserialize;

use crate::error::ConfigError;
use crate::solver::boundary::{EdgeProfiles, EdgeRoles};
use crate::solver::obstacles::Obstacle;
use crate::solver::params::{SolverConfig, non_negative, positive};

/// Default configuration file picked up by the binary.
pub const DEFAULT_CONFIG_FILE: &str = "windfield.yaml";

/// Complete description of one simulation run.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct SimulationConfig {
    pub domain: DomainConfig,
    pub fluid: FluidConfig,
    pub boundary_conditions: BoundaryConfig,
    pub solver: SolverConfig,
    pub obstacles: Vec<Obstacle>,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct DomainConfig {
    /// Extent along x [m]
    pub width: f64,
    /// Extent along y [m]
    pub height: f64,
    pub nx: usize,
    pub ny: usize,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct FluidConfig {
    /// [kg/m^3]
    pub density: f64,
    /// Kinematic viscosity [m^2/s]
    pub viscosity: f64,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct BoundaryConfig {
    /// Inlet speed [m/s]
    pub inlet_velocity: f64,
    /// Degrees, 0 = flow towards +x, counter-clockwise.
    pub inlet_direction: f64,
    /// Fraction of the inlet speed, in [0, 1].
    pub turbulence_intensity: f64,
    /// Inlet turbulence length scale [m]; 7 % of the domain height if unset.
    pub turbulence_length_scale: Option<f64>,
    /// Prescribed inflow velocities, e.g. sampled from a coarser run.
    pub profiles: EdgeProfiles,
}

impl Default for SimulationConfig {
    fn default() -> Self {
        Self {
            domain: DomainConfig::default(),
            fluid: FluidConfig::default(),
            boundary_conditions: BoundaryConfig::default(),
            solver: SolverConfig::default(),
            obstacles: Vec::new(),
        }
    }
}

impl Default for DomainConfig {
    fn default() -> Self {
        Self {
            width: 100.0,
            height: 60.0,
            nx: 50,
            ny: 50,
        }
    }
}

impl Default for FluidConfig {
    fn default() -> Self {
        Self {
            density: 1.225,
            viscosity: 1.5e-5,
        }
    }
}

impl Default for BoundaryConfig {
    fn default() -> Self {
        Self {
            inlet_velocity: 5.0,
            inlet_direction: 0.0,
            turbulence_intensity: 0.05,
            turbulence_length_scale: None,
            profiles: EdgeProfiles::default(),
        }
    }
}

impl SimulationConfig {
    /// Check every scalar setting. Geometry is checked when the grid and
    /// obstacles are built.
    pub fn validate(&self) -> Result<(), ConfigError> {
        positive("fluid.density", self.fluid.density)?;
        positive("fluid.viscosity", self.fluid.viscosity)?;
        let bc = &self.boundary_conditions;
        non_negative("boundary_conditions.inlet_velocity", bc.inlet_velocity)?;
        if !bc.inlet_direction.is_finite() {
            return Err(ConfigError::invalid(
                "boundary_conditions.inlet_direction",
                bc.inlet_direction,
                "must be finite",
            ));
        }
        if !(0.0..=1.0).contains(&bc.turbulence_intensity) {
            return Err(ConfigError::invalid(
                "boundary_conditions.turbulence_intensity",
                bc.turbulence_intensity,
                "must lie in [0, 1]",
            ));
        }
        if let Some(length) = bc.turbulence_length_scale {
            positive("boundary_conditions.turbulence_length_scale", length)?;
        }
        bc.profiles.validate(EdgeRoles::from_direction(bc.inlet_direction))?;
        self.solver.validate()
    }
}

/// Parse a YAML document. Missing keys take their defaults.
pub fn from_yaml_str(yaml: &str) -> Result<SimulationConfig, ConfigError> {
    Ok(serde_yaml::from_str(yaml)?)
}

/// Read and parse a YAML configuration file.
pub fn load(path: impl AsRef<Path>) -> Result<SimulationConfig, ConfigError> {
    let contents = std::fs::read_to_string(path)?;
    from_yaml_str(&contents)
}

/// Load `path` if it exists, falling back to the default scenario.
pub fn load_or_default(path: impl AsRef<Path>) -> SimulationConfig {
    let path = path.as_ref();
    if !path.exists() {
        log::info!("{} not found; using the default scenario", path.display());
        return SimulationConfig::default();
    }
    match load(path) {
        Ok(cfg) => cfg,
        Err(e) => {
            log::warn!("failed to load {}: {e}; using defaults", path.display());
            SimulationConfig::default()
        }
    }
}
