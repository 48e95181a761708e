//! Steady SIMPLE solver for incompressible flow around buildings and trees.

pub mod boundary;
pub mod core;
pub mod diagnostics;
pub mod geometry;
pub mod momentum;
pub mod obstacles;
pub mod params;
pub mod pressure;
pub mod turbulence;

pub use boundary::{BoundaryConditions, EdgeKind, EdgeProfile, EdgeProfiles, EdgeRoles, FieldType, InletConditions};
pub use geometry::Geometry;
pub use obstacles::{CellFlag, Obstacle, ObstacleField};
pub use params::{KEpsilonParams, SolverConfig, SstParams, TurbulenceModelKind};
pub use turbulence::{SecondQuantity, TurbulenceFields, TurbulenceModel};

use crate::config::{FluidConfig, SimulationConfig};
use crate::error::{ConfigError, DivergedError, SolverError};
use crate::state::{FieldSet, Grid};
use momentum::MomentumSolver;
use pressure::{PressureSolver, initialize_face_fluxes};

/// Read-only data shared by every stage of one iteration.
#[derive(Clone, Copy)]
pub struct FlowContext<'a> {
    pub geometry: &'a Geometry,
    pub fluid: &'a FluidConfig,
    pub settings: &'a SolverConfig,
    pub boundary: &'a BoundaryConditions,
}

/// Lifecycle of a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunStatus {
    Initialized,
    Iterating,
    Converged,
    MaxIterationsReached,
    Diverged,
}

impl RunStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, RunStatus::Converged | RunStatus::MaxIterationsReached | RunStatus::Diverged)
    }
}

/// Residuals of one outer iteration.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ResidualRecord {
    pub iteration: usize,
    /// Largest mass imbalance per unit volume over fluid cells [1/s]
    pub continuity: f64,
    pub momentum_x: f64,
    pub momentum_y: f64,
}

/// Iteration count, residual history and status of a run.
#[derive(Debug, Clone, PartialEq)]
pub struct SolverState {
    pub iteration: usize,
    pub residuals: Vec<ResidualRecord>,
    pub status: RunStatus,
}

/// Complete flow state at the end of an iteration.
#[derive(Debug, Clone)]
pub struct Snapshot {
    pub iteration: usize,
    pub fields: FieldSet,
    pub turbulence: Option<TurbulenceFields>,
}

/// Cause of a divergence, kept so later calls can report it again.
#[derive(Debug, Clone, Copy)]
struct Divergence {
    iteration: usize,
    field: &'static str,
}

/// SIMPLE loop controller.
///
/// Owns the geometry, the fields and every stage solver of one run. Each
/// [`step`](Self::step) performs one outer iteration:
///
/// 1. eddy viscosity from the turbulence model
/// 2. momentum predictor
/// 3. pressure correction of pressure, velocities and fluxes
/// 4. boundary values re-imposed
/// 5. turbulence transport
/// 6. convergence and divergence checks
pub struct SimpleSolver {
    config: SimulationConfig,
    geometry: Geometry,
    boundary: BoundaryConditions,
    fields: FieldSet,
    turbulence: TurbulenceModel,
    momentum: MomentumSolver,
    pressure: PressureSolver,
    state: SolverState,
    snapshot: Snapshot,
    divergence: Option<Divergence>,
}

impl SimpleSolver {
    /// Validate the configuration, rasterise the obstacles and seed the fields.
    pub fn new(config: &SimulationConfig) -> Result<Self, ConfigError> {
        config.validate()?;
        let domain = &config.domain;
        let grid = Grid::new(domain.width, domain.height, domain.nx, domain.ny)?;
        let obstacles = ObstacleField::rasterize(&grid, &config.obstacles)?;
        let edges = EdgeRoles::from_direction(config.boundary_conditions.inlet_direction);

        let settings = &config.solver;
        let c_mu = match settings.turbulence_model {
            TurbulenceModelKind::KOmegaSst => settings.sst.beta_star,
            _ => settings.k_epsilon.c_mu,
        };
        let inlet = InletConditions::new(&config.boundary_conditions, &grid, c_mu, settings.turbulence_floor);
        let boundary = BoundaryConditions::new(edges, inlet).with_profiles(&config.boundary_conditions.profiles, &grid);
        let geometry = Geometry::new(grid, obstacles, edges);

        let mut fields = FieldSet::new(&geometry.grid);
        boundary.seed(&geometry, &mut fields);
        let ctx = FlowContext {
            geometry: &geometry,
            fluid: &config.fluid,
            settings,
            boundary: &boundary,
        };
        initialize_face_fluxes(&ctx, &mut fields);
        let turbulence = TurbulenceModel::new(settings.turbulence_model, &ctx);

        let g = &geometry.grid;
        log::info!(
            "windfield: {}x{} cells over {} m x {} m, {} solid / {} porous, inlet {} m/s at {} deg, model {}",
            g.nx,
            g.ny,
            g.width,
            g.height,
            geometry.obstacles.count(CellFlag::Solid),
            geometry.obstacles.count(CellFlag::Porous),
            boundary.inlet.speed,
            config.boundary_conditions.inlet_direction,
            settings.turbulence_model
        );

        let snapshot = Snapshot {
            iteration: 0,
            fields: fields.clone(),
            turbulence: turbulence.transport_fields().cloned(),
        };
        Ok(Self {
            momentum: MomentumSolver::new(g.nx, g.ny),
            pressure: PressureSolver::new(g.nx, g.ny),
            config: config.clone(),
            geometry,
            boundary,
            fields,
            turbulence,
            state: SolverState {
                iteration: 0,
                residuals: Vec::new(),
                status: RunStatus::Initialized,
            },
            snapshot,
            divergence: None,
        })
    }

    pub fn config(&self) -> &SimulationConfig {
        &self.config
    }

    pub fn geometry(&self) -> &Geometry {
        &self.geometry
    }

    pub fn fields(&self) -> &FieldSet {
        &self.fields
    }

    pub fn turbulence(&self) -> &TurbulenceModel {
        &self.turbulence
    }

    pub fn state(&self) -> &SolverState {
        &self.state
    }

    pub fn status(&self) -> RunStatus {
        self.state.status
    }

    /// One outer SIMPLE iteration. A no-op once the run has terminated;
    /// a divergence is reported as an error every time.
    pub fn step(&mut self) -> Result<RunStatus, SolverError> {
        if let Some(divergence) = self.divergence {
            return Err(self.diverged(divergence));
        }
        if self.state.status.is_terminal() {
            return Ok(self.state.status);
        }
        self.state.status = RunStatus::Iterating;
        self.state.iteration += 1;
        let iteration = self.state.iteration;

        // Last finite state
        self.snapshot.iteration = iteration - 1;
        self.snapshot.fields.clone_from(&self.fields);
        if let (Some(saved), Some(current)) = (self.snapshot.turbulence.as_mut(), self.turbulence.transport_fields()) {
            saved.clone_from(current);
        }

        let ctx = FlowContext {
            geometry: &self.geometry,
            fluid: &self.config.fluid,
            settings: &self.config.solver,
            boundary: &self.boundary,
        };
        self.turbulence.compute_eddy_viscosity(&ctx, &mut self.fields);
        let momentum = self.momentum.predict(&ctx, &mut self.fields);
        let pressure = self.pressure.correct(&ctx, &self.momentum.d, &mut self.fields);
        self.boundary.apply(&self.geometry, &mut self.fields);
        let transport = self.turbulence.advance_transport(&ctx, &self.fields);

        let record = ResidualRecord {
            iteration,
            continuity: pressure.continuity,
            momentum_x: momentum.residual_x,
            momentum_y: momentum.residual_y,
        };
        self.state.residuals.push(record);
        log::trace!(
            "iteration {}: pressure {} sweeps, k {} sweeps, second {} sweeps",
            iteration,
            pressure.sweep.iterations,
            transport.k.iterations,
            transport.second.iterations
        );

        let non_finite = self
            .fields
            .first_non_finite()
            .or_else(|| self.turbulence.transport_fields().and_then(|t| t.first_non_finite()))
            .or_else(|| (!record.continuity.is_finite()).then_some("continuity residual"));
        if let Some(field) = non_finite {
            let divergence = Divergence { iteration, field };
            self.fields.clone_from(&self.snapshot.fields);
            if let Some(saved) = &self.snapshot.turbulence {
                self.turbulence.restore(saved);
            }
            self.state.status = RunStatus::Diverged;
            self.divergence = Some(divergence);
            log::error!(
                "diverged at iteration {}: non-finite value in '{}', keeping iteration {}",
                iteration,
                field,
                iteration - 1
            );
            return Err(self.diverged(divergence));
        }

        let settings = &self.config.solver;
        if settings.print_interval > 0 && iteration % settings.print_interval == 0 {
            self.log_progress(&record);
        }

        if record.continuity < settings.convergence_tolerance {
            self.state.status = RunStatus::Converged;
            log::info!("converged after {} iterations, continuity {:.3e}", iteration, record.continuity);
        } else if iteration >= settings.max_iterations {
            self.state.status = RunStatus::MaxIterationsReached;
            log::warn!(
                "stopped at the iteration cap ({}), continuity {:.3e} above tolerance {:.1e}",
                iteration,
                record.continuity,
                settings.convergence_tolerance
            );
        }
        Ok(self.state.status)
    }

    /// Iterate until converged, diverged or out of iterations.
    pub fn run(&mut self) -> Result<SolveResult, SolverError> {
        while !self.step()?.is_terminal() {}
        Ok(self.result())
    }

    /// The current state packaged as a result.
    pub fn result(&self) -> SolveResult {
        let transport = self.turbulence.transport_fields();
        let second = |quantity: SecondQuantity| {
            transport.filter(|t| t.quantity == quantity).map(|t| t.second.clone())
        };
        SolveResult {
            grid: self.geometry.grid.clone(),
            flags: self.geometry.obstacles.flags.clone(),
            u: self.fields.u.clone(),
            v: self.fields.v.clone(),
            p: self.fields.p.clone(),
            nu_t: self.fields.nu_t.clone(),
            k: transport.map(|t| t.k.clone()),
            epsilon: second(SecondQuantity::Epsilon),
            omega: second(SecondQuantity::Omega),
            u_tau: self.turbulence.friction_velocity().map(<[f64]>::to_vec),
            status: self.state.status,
            final_residual: self.state.residuals.last().map_or(f64::NAN, |r| r.continuity),
            iterations: self.state.iteration,
            residuals: self.state.residuals.clone(),
            density: self.config.fluid.density,
            reference_speed: self.boundary.inlet.speed,
        }
    }

    fn log_progress(&self, record: &ResidualRecord) {
        let max_nu_t = self
            .geometry
            .active_cells()
            .map(|c| self.fields.nu_t[c])
            .fold(0.0, f64::max);
        let mean_k = self
            .turbulence
            .transport_fields()
            .map(|t| diagnostics::active_mean(&self.geometry, &t.k));
        let energy = diagnostics::compute_kinetic_energy(&self.geometry, &self.fields.u, &self.fields.v);
        log::debug!(
            "iter {:>5}  continuity {:.3e}  mom-x {:.3e}  mom-y {:.3e}  ke {:.4}  max nu_t {:.3e}  mean k {}",
            record.iteration,
            record.continuity,
            record.momentum_x,
            record.momentum_y,
            energy,
            max_nu_t,
            mean_k.map_or_else(|| "-".to_string(), |k| format!("{:.3e}", k))
        );
    }

    fn diverged(&self, divergence: Divergence) -> SolverError {
        SolverError::Diverged(Box::new(DivergedError {
            iteration: divergence.iteration,
            field: divergence.field,
            snapshot: self.snapshot.clone(),
            residuals: self.state.residuals.clone(),
        }))
    }
}

/// Final fields and run statistics.
#[derive(Debug, Clone, PartialEq)]
pub struct SolveResult {
    pub grid: Grid,
    pub flags: Vec<CellFlag>,
    pub u: Vec<f64>,
    pub v: Vec<f64>,
    pub p: Vec<f64>,
    pub nu_t: Vec<f64>,
    pub k: Option<Vec<f64>>,
    pub epsilon: Option<Vec<f64>>,
    pub omega: Option<Vec<f64>>,
    pub u_tau: Option<Vec<f64>>,
    pub status: RunStatus,
    pub final_residual: f64,
    pub iterations: usize,
    pub residuals: Vec<ResidualRecord>,
    density: f64,
    reference_speed: f64,
}

impl SolveResult {
    pub fn velocity_magnitude(&self) -> Vec<f64> {
        diagnostics::compute_velocity_magnitude(&self.u, &self.v)
    }

    /// Speed in the cell containing `(x, y)`; `None` outside the domain.
    pub fn speed_at(&self, x: f64, y: f64) -> Option<f64> {
        let (i, j) = self.grid.cell_at(x, y)?;
        let c = self.grid.idx(i, j);
        Some(self.u[c].hypot(self.v[c]))
    }

    /// `p / (0.5 rho U_inlet^2)`; zero everywhere for a calm inlet.
    pub fn pressure_coefficient(&self) -> Vec<f64> {
        let dynamic = 0.5 * self.density * self.reference_speed * self.reference_speed;
        if dynamic <= 0.0 {
            return vec![0.0; self.p.len()];
        }
        self.p.iter().map(|p| p / dynamic).collect()
    }

    /// Mean kinetic energy per unit mass over interior non-solid cells.
    pub fn kinetic_energy(&self) -> f64 {
        let (sum, count) = self
            .grid
            .interior()
            .filter(|&c| self.flags[c] != CellFlag::Solid)
            .fold((0.0, 0usize), |(s, n), c| (s + self.u[c] * self.u[c] + self.v[c] * self.v[c], n + 1));
        if count > 0 { 0.5 * sum / count as f64 } else { 0.0 }
    }
}

/// Build a solver for `config` and run it to completion.
pub fn solve(config: &SimulationConfig) -> Result<SolveResult, SolverError> {
    SimpleSolver::new(config)?.run()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::DomainConfig;

    fn small(model: TurbulenceModelKind) -> SimulationConfig {
        let mut config = SimulationConfig {
            domain: DomainConfig { width: 40.0, height: 20.0, nx: 20, ny: 10 },
            ..SimulationConfig::default()
        };
        config.solver = match model {
            TurbulenceModelKind::Constant => SolverConfig::default(),
            TurbulenceModelKind::KEpsilon => SolverConfig::default_k_epsilon(),
            TurbulenceModelKind::KOmegaSst => SolverConfig::default_sst(),
        };
        config.solver.max_iterations = 30;
        config
    }

    #[test]
    fn test_initial_state() {
        let solver = SimpleSolver::new(&small(TurbulenceModelKind::Constant)).unwrap();
        assert_eq!(solver.status(), RunStatus::Initialized);
        assert_eq!(solver.state().iteration, 0);
        assert!(solver.turbulence().transport_fields().is_none());
        let c = solver.geometry().grid.idx(5, 5);
        assert_eq!(solver.fields().u[c], 5.0);
    }

    #[test]
    fn test_step_records_residuals() {
        let mut config = small(TurbulenceModelKind::Constant);
        config.solver.convergence_tolerance = 1e-300;
        let mut solver = SimpleSolver::new(&config).unwrap();
        let status = solver.step().unwrap();
        assert_eq!(status, RunStatus::Iterating);
        solver.step().unwrap();
        let state = solver.state();
        assert_eq!(state.iteration, 2);
        assert_eq!(state.residuals.len(), 2);
        assert_eq!(state.residuals[1].iteration, 2);
        assert!(state.residuals.iter().all(|r| r.continuity.is_finite()));
    }

    #[test]
    fn test_iteration_cap_is_a_status() {
        let mut config = small(TurbulenceModelKind::Constant);
        config.solver.convergence_tolerance = 1e-300;
        config.solver.max_iterations = 3;
        let mut solver = SimpleSolver::new(&config).unwrap();
        let result = solver.run().unwrap();
        assert_eq!(result.status, RunStatus::MaxIterationsReached);
        assert_eq!(result.iterations, 3);
        assert_eq!(result.residuals.len(), 3);
        // Terminal: further steps change nothing
        assert_eq!(solver.step().unwrap(), RunStatus::MaxIterationsReached);
        assert_eq!(solver.state().iteration, 3);
    }

    #[test]
    fn test_divergence_keeps_last_finite_snapshot() {
        let mut config = small(TurbulenceModelKind::Constant);
        config.solver.convergence_tolerance = 1e-300;
        let mut solver = SimpleSolver::new(&config).unwrap();
        solver.step().unwrap();
        let before = solver.fields().clone();
        solver.config.fluid.density = f64::NAN;
        let err = solver.step().unwrap_err();
        let SolverError::Diverged(diverged) = err else {
            panic!("expected divergence, got {:?}", err);
        };
        assert_eq!(diverged.iteration, 2);
        assert_eq!(diverged.snapshot.iteration, 1);
        assert_eq!(diverged.residuals.len(), 2);
        assert_eq!(solver.status(), RunStatus::Diverged);
        // The snapshot is the state entering the failed iteration
        assert!(diverged.snapshot.fields.first_non_finite().is_none());
        assert_eq!(diverged.snapshot.fields, before);
        assert_eq!(solver.fields(), &before);
        assert!(matches!(solver.step(), Err(SolverError::Diverged(_))));
    }

    #[test]
    fn test_result_for_each_model() {
        for model in [TurbulenceModelKind::Constant, TurbulenceModelKind::KEpsilon, TurbulenceModelKind::KOmegaSst] {
            let result = solve(&small(model)).unwrap();
            assert!(result.iterations > 0);
            assert_eq!(result.k.is_some(), model != TurbulenceModelKind::Constant);
            assert_eq!(result.epsilon.is_some(), model == TurbulenceModelKind::KEpsilon);
            assert_eq!(result.omega.is_some(), model == TurbulenceModelKind::KOmegaSst);
            assert_eq!(result.velocity_magnitude().len(), result.grid.len());
        }
    }

    #[test]
    fn test_result_helpers() {
        let result = solve(&small(TurbulenceModelKind::Constant)).unwrap();
        assert!(result.speed_at(-1.0, 5.0).is_none());
        let speed = result.speed_at(20.0, 10.0).unwrap();
        assert!((speed - 5.0).abs() < 0.05, "speed = {}", speed);
        let cp = result.pressure_coefficient();
        assert_eq!(cp.len(), result.p.len());
        assert!(result.kinetic_energy() > 12.0 && result.kinetic_energy() < 12.6);
    }

    #[test]
    fn test_invalid_config_is_rejected_before_iterating() {
        let mut config = small(TurbulenceModelKind::Constant);
        config.domain.nx = 2;
        assert!(matches!(
            SimpleSolver::new(&config),
            Err(ConfigError::Geometry(crate::error::GeometryError::TooFewCells { .. }))
        ));
    }
}
