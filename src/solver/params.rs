use std::fmt;
use std::str::FromStr;

use serde::Deserialize;

use crate::error::ConfigError;

/// Turbulence closure selector.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Deserialize)]
#[serde(try_from = "String")]
pub enum TurbulenceModelKind {
    /// Fixed eddy viscosity.
    #[default]
    Constant,
    /// Standard k-epsilon with wall functions.
    KEpsilon,
    /// Menter k-omega SST.
    KOmegaSst,
}

impl FromStr for TurbulenceModelKind {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "constant" => Ok(Self::Constant),
            "k-epsilon" | "k_epsilon" | "kepsilon" => Ok(Self::KEpsilon),
            "sst" | "k-omega-sst" | "komega-sst" => Ok(Self::KOmegaSst),
            _ => Err(ConfigError::UnknownTurbulenceModel(s.to_string())),
        }
    }
}

impl TryFrom<String> for TurbulenceModelKind {
    type Error = ConfigError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl fmt::Display for TurbulenceModelKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Constant => "constant",
            Self::KEpsilon => "k-epsilon",
            Self::KOmegaSst => "sst",
        })
    }
}

/// Standard k-epsilon coefficients (Launder & Spalding).
#[derive(Clone, Debug, PartialEq, Deserialize)]
#[serde(default)]
pub struct KEpsilonParams {
    pub c_mu: f64,
    pub c_1: f64,
    pub c_2: f64,
    pub sigma_k: f64,
    pub sigma_eps: f64,
    /// von Karman constant
    pub kappa: f64,
    /// Log-law roughness parameter E
    pub e_wall: f64,
    /// Upper bound on eddy viscosity [m^2/s]
    pub nu_t_max: f64,
}

impl Default for KEpsilonParams {
    fn default() -> Self {
        Self {
            c_mu: 0.09,
            c_1: 1.44,
            c_2: 1.92,
            sigma_k: 1.0,
            sigma_eps: 1.3,
            kappa: 0.41,
            e_wall: 9.8,
            nu_t_max: 1.0e3,
        }
    }
}

/// Menter (2003) k-omega SST coefficients. Set 1 is the inner (k-omega)
/// set, set 2 the outer (k-epsilon) set.
#[derive(Clone, Debug, PartialEq, Deserialize)]
#[serde(default)]
pub struct SstParams {
    pub beta_star: f64,
    pub a1: f64,
    pub sigma_k1: f64,
    pub sigma_k2: f64,
    pub sigma_w1: f64,
    pub sigma_w2: f64,
    pub beta1: f64,
    pub beta2: f64,
    pub gamma1: f64,
    pub gamma2: f64,
    pub kappa: f64,
    pub e_wall: f64,
    pub nu_t_max: f64,
}

impl Default for SstParams {
    fn default() -> Self {
        Self {
            beta_star: 0.09,
            a1: 0.31,
            sigma_k1: 0.85,
            sigma_k2: 1.0,
            sigma_w1: 0.5,
            sigma_w2: 0.856,
            beta1: 0.075,
            beta2: 0.0828,
            gamma1: 5.0 / 9.0,
            gamma2: 0.44,
            kappa: 0.41,
            e_wall: 9.8,
            nu_t_max: 1.0e3,
        }
    }
}

/// Numerical controls of the SIMPLE iteration.
#[derive(Clone, Debug, PartialEq, Deserialize)]
#[serde(default)]
pub struct SolverConfig {
    pub max_iterations: usize,
    /// Target for the maximum continuity imbalance [1/s].
    pub convergence_tolerance: f64,
    pub turbulence_model: TurbulenceModelKind,
    pub velocity_relaxation: f64,
    pub pressure_relaxation: f64,
    pub turbulence_relaxation: f64,
    /// Sweep cap for momentum and turbulence transport systems.
    pub momentum_iterations: usize,
    pub momentum_tolerance: f64,
    /// Sweep cap for the pressure-correction system.
    pub pressure_iterations: usize,
    pub pressure_tolerance: f64,
    /// Over-relaxation factor of the pressure-correction sweep.
    pub pressure_sor: f64,
    /// Eddy viscosity of the constant model [m^2/s].
    pub constant_eddy_viscosity: f64,
    /// Resistance of porous cells [1/m].
    pub porous_drag_coefficient: f64,
    pub use_wall_functions: bool,
    /// Progress is logged every this many iterations (0 disables).
    pub print_interval: usize,
    /// Positivity floor for k, epsilon and omega.
    pub turbulence_floor: f64,
    pub k_epsilon: KEpsilonParams,
    pub sst: SstParams,
}

impl Default for SolverConfig {
    fn default() -> Self {
        Self {
            max_iterations: 500,
            convergence_tolerance: 1e-5,
            turbulence_model: TurbulenceModelKind::Constant,
            velocity_relaxation: 0.7,
            pressure_relaxation: 0.3,
            turbulence_relaxation: 0.7,
            momentum_iterations: 20,
            momentum_tolerance: 1e-3,
            pressure_iterations: 200,
            pressure_tolerance: 1e-4,
            pressure_sor: 1.7,
            constant_eddy_viscosity: 1e-3,
            porous_drag_coefficient: 0.5,
            use_wall_functions: true,
            print_interval: 50,
            turbulence_floor: 1e-10,
            k_epsilon: KEpsilonParams::default(),
            sst: SstParams::default(),
        }
    }
}

impl SolverConfig {
    /// Defaults tuned for the k-epsilon closure.
    pub fn default_k_epsilon() -> Self {
        Self {
            turbulence_model: TurbulenceModelKind::KEpsilon,
            turbulence_relaxation: 0.6,
            ..Self::default()
        }
    }

    /// Defaults tuned for the k-omega SST closure.
    pub fn default_sst() -> Self {
        Self {
            turbulence_model: TurbulenceModelKind::KOmegaSst,
            turbulence_relaxation: 0.6,
            ..Self::default()
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_iterations == 0 {
            return Err(ConfigError::invalid("solver.max_iterations", 0, "must be positive"));
        }
        positive("solver.convergence_tolerance", self.convergence_tolerance)?;
        relaxation("solver.velocity_relaxation", self.velocity_relaxation)?;
        relaxation("solver.pressure_relaxation", self.pressure_relaxation)?;
        relaxation("solver.turbulence_relaxation", self.turbulence_relaxation)?;
        if self.momentum_iterations == 0 {
            return Err(ConfigError::invalid("solver.momentum_iterations", 0, "must be positive"));
        }
        if self.pressure_iterations == 0 {
            return Err(ConfigError::invalid("solver.pressure_iterations", 0, "must be positive"));
        }
        positive("solver.momentum_tolerance", self.momentum_tolerance)?;
        positive("solver.pressure_tolerance", self.pressure_tolerance)?;
        if !(self.pressure_sor > 0.0 && self.pressure_sor < 2.0) {
            return Err(ConfigError::invalid("solver.pressure_sor", self.pressure_sor, "must lie in (0, 2)"));
        }
        non_negative("solver.constant_eddy_viscosity", self.constant_eddy_viscosity)?;
        non_negative("solver.porous_drag_coefficient", self.porous_drag_coefficient)?;
        positive("solver.turbulence_floor", self.turbulence_floor)?;
        positive("solver.k_epsilon.c_mu", self.k_epsilon.c_mu)?;
        positive("solver.k_epsilon.kappa", self.k_epsilon.kappa)?;
        positive("solver.k_epsilon.nu_t_max", self.k_epsilon.nu_t_max)?;
        positive("solver.sst.beta_star", self.sst.beta_star)?;
        positive("solver.sst.a1", self.sst.a1)?;
        positive("solver.sst.nu_t_max", self.sst.nu_t_max)?;
        Ok(())
    }

    /// Settings for the momentum and transport sweeps.
    pub fn momentum_sweep(&self) -> super::core::SweepSettings {
        super::core::SweepSettings {
            max_iterations: self.momentum_iterations,
            tolerance: self.momentum_tolerance,
            relaxation: 1.0,
        }
    }

    /// Settings for the pressure-correction sweep.
    pub fn pressure_sweep(&self) -> super::core::SweepSettings {
        super::core::SweepSettings {
            max_iterations: self.pressure_iterations,
            tolerance: self.pressure_tolerance,
            relaxation: self.pressure_sor,
        }
    }
}

pub(crate) fn positive(key: &'static str, value: f64) -> Result<(), ConfigError> {
    if value.is_finite() && value > 0.0 {
        Ok(())
    } else {
        Err(ConfigError::invalid(key, value, "must be positive and finite"))
    }
}

pub(crate) fn non_negative(key: &'static str, value: f64) -> Result<(), ConfigError> {
    if value.is_finite() && value >= 0.0 {
        Ok(())
    } else {
        Err(ConfigError::invalid(key, value, "must be non-negative and finite"))
    }
}

fn relaxation(key: &'static str, value: f64) -> Result<(), ConfigError> {
    if value > 0.0 && value <= 1.0 {
        Ok(())
    } else {
        Err(ConfigError::invalid(key, value, "must lie in (0, 1]"))
    }
}
