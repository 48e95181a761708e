use super::FlowContext;
use super::boundary::EdgeKind;
use super::core::{StencilSystem, SweepReport, lin_solve};
use super::geometry::{Dir, Geometry, Link};
use crate::state::{Edge, FieldSet};

/// Outcome of one pressure correction.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct PressureReport {
    /// Largest continuity imbalance of the predicted fluxes [1/s].
    pub continuity: f64,
    pub sweep: SweepReport,
}

/// What a face between two neighbouring cells carries.
#[derive(Clone, Copy, Debug, PartialEq)]
enum Face {
    /// Both sides solved: Rhie-Chow interpolation and full correction.
    Interior,
    /// Prescribed inlet flux from the given ring cell.
    Inlet(usize),
    /// Zero-gradient outflow; the active cell on the given side supplies
    /// the velocity and receives the correction.
    Outlet { active: usize, active_is_low: bool },
    /// No flux.
    Closed,
}

/// Classify the face between `low` (west/south) and `high` (east/north).
fn classify(geo: &Geometry, low: usize, high: usize, low_edge: Option<Edge>, high_edge: Option<Edge>) -> Face {
    if geo.obstacles.is_solid(low) || geo.obstacles.is_solid(high) {
        return Face::Closed;
    }
    let ring = |edge: Option<Edge>, cell: usize, other: usize, other_is_low: bool| {
        edge.map(|e| match geo.edges.kind(e) {
            EdgeKind::Inlet => Face::Inlet(cell),
            EdgeKind::Outlet => Face::Outlet { active: other, active_is_low: other_is_low },
            EdgeKind::Wall => Face::Closed,
        })
    };
    if let Some(face) = ring(low_edge, low, high, false) {
        return face;
    }
    if let Some(face) = ring(high_edge, high, low, true) {
        return face;
    }
    Face::Interior
}

/// Pressure-correction stage of SIMPLE.
#[derive(Debug, Clone)]
pub struct PressureSolver {
    system: StencilSystem,
    scratch: Vec<f64>,
    /// Pressure correction p' of the latest iteration.
    pub correction: Vec<f64>,
}

impl PressureSolver {
    pub fn new(nx: usize, ny: usize) -> Self {
        Self {
            system: StencilSystem::new(nx, ny),
            scratch: Vec::with_capacity(nx * ny),
            correction: vec![0.0; nx * ny],
        }
    }

    /// Predict face fluxes from `u*, v*`, solve for p' and correct pressure,
    /// velocities and fluxes. `d` is `V / a_P` from the momentum stage.
    pub fn correct(&mut self, ctx: &FlowContext, d: &[f64], fields: &mut FieldSet) -> PressureReport {
        compute_face_fluxes(ctx, d, fields);
        let continuity = self.assemble(ctx, d, fields);

        self.correction.fill(0.0);
        let sweep = lin_solve(&self.system, &mut self.correction, &mut self.scratch, ctx.settings.pressure_sweep());

        self.apply_correction(ctx, d, fields);
        PressureReport { continuity, sweep }
    }

    /// Build the p' system; returns the largest imbalance per unit volume.
    fn assemble(&mut self, ctx: &FlowContext, d: &[f64], fields: &FieldSet) -> f64 {
        let geo = ctx.geometry;
        let g = &geo.grid;
        let rho = ctx.fluid.density;
        let volume = g.cell_volume();
        let mut worst = 0.0_f64;

        self.system.reset();
        for c in g.interior() {
            if geo.obstacles.is_solid(c) {
                continue;
            }
            let mut a_p = 0.0;
            let mut imbalance = 0.0;
            for dir in Dir::ALL {
                let area = dir.face_area(g);
                let delta = dir.spacing(g);
                imbalance -= geo.outward_flux(&fields.flux_x, &fields.flux_y, c, dir);
                match geo.link(c, dir) {
                    Link::Interior(n) => {
                        let a = rho * area * 0.5 * (d[c] + d[n]) / delta;
                        match dir {
                            Dir::East => self.system.a_e[c] = a,
                            Dir::West => self.system.a_w[c] = a,
                            Dir::North => self.system.a_n[c] = a,
                            Dir::South => self.system.a_s[c] = a,
                        }
                        a_p += a;
                    }
                    // p' = 0 on the outlet ring
                    Link::Outlet(_) => a_p += rho * area * d[c] / delta,
                    Link::Inlet(_) | Link::Wall(_) => {}
                }
            }
            worst = worst.max((imbalance / (rho * volume)).abs());
            if a_p > 0.0 {
                self.system.a_p[c] = a_p;
                self.system.b[c] = imbalance;
            }
        }
        worst
    }

    fn apply_correction(&self, ctx: &FlowContext, d: &[f64], fields: &mut FieldSet) {
        let geo = ctx.geometry;
        let g = &geo.grid;
        let rho = ctx.fluid.density;
        let alpha_p = ctx.settings.pressure_relaxation;
        let pc = &self.correction;

        // Face fluxes
        for j in 1..g.ny - 1 {
            for i in 0..g.nx - 1 {
                let (low, high) = (g.idx(i, j), g.idx(i + 1, j));
                let face = classify(geo, low, high, g.edge_of(low), g.edge_of(high));
                fields.flux_x[low] -= flux_correction(face, rho, g.dy, g.dx, d, pc, low, high);
            }
        }
        for j in 0..g.ny - 1 {
            for i in 1..g.nx - 1 {
                let (low, high) = (g.idx(i, j), g.idx(i, j + 1));
                let face = classify(geo, low, high, g.edge_of(low), g.edge_of(high));
                fields.flux_y[low] -= flux_correction(face, rho, g.dx, g.dy, d, pc, low, high);
            }
        }

        // Cell velocities and pressure
        for c in geo.active_cells() {
            let value = |dir| match geo.link(c, dir) {
                Link::Interior(n) => pc[n],
                Link::Outlet(_) => 0.0,
                Link::Inlet(_) | Link::Wall(_) => pc[c],
            };
            let dpdx = (value(Dir::East) - value(Dir::West)) / (2.0 * g.dx);
            let dpdy = (value(Dir::North) - value(Dir::South)) / (2.0 * g.dy);
            fields.u[c] -= d[c] * dpdx;
            fields.v[c] -= d[c] * dpdy;
            fields.p[c] += alpha_p * pc[c];
        }
    }
}

/// `rho * A * d_f * (p'_high - p'_low) / delta` for the face kinds that
/// respond to the pressure correction.
fn flux_correction(
    face: Face,
    rho: f64,
    area: f64,
    delta: f64,
    d: &[f64],
    pc: &[f64],
    low: usize,
    high: usize,
) -> f64 {
    match face {
        Face::Interior => rho * area * 0.5 * (d[low] + d[high]) * (pc[high] - pc[low]) / delta,
        Face::Outlet { active, active_is_low } => {
            let (p_low, p_high) = if active_is_low { (pc[active], 0.0) } else { (0.0, pc[active]) };
            rho * area * d[active] * (p_high - p_low) / delta
        }
        Face::Inlet(_) | Face::Closed => 0.0,
    }
}

/// Cell pressure gradient along x and y with solid neighbours mirrored.
fn pressure_gradient(geo: &Geometry, p: &[f64], c: usize) -> (f64, f64) {
    let g = &geo.grid;
    let dpdx = (geo.neighbor_value(p, c, Dir::East) - geo.neighbor_value(p, c, Dir::West)) / (2.0 * g.dx);
    let dpdy = (geo.neighbor_value(p, c, Dir::North) - geo.neighbor_value(p, c, Dir::South)) / (2.0 * g.dy);
    (dpdx, dpdy)
}

/// Rhie-Chow face fluxes from the cell velocities, pressure and `d`.
///
/// The interpolated velocity is corrected by the difference between the
/// compact face pressure gradient and the mean of the cell gradients, which
/// suppresses checkerboard pressure on the collocated grid.
pub fn compute_face_fluxes(ctx: &FlowContext, d: &[f64], fields: &mut FieldSet) {
    let geo = ctx.geometry;
    let g = &geo.grid;
    let rho = ctx.fluid.density;

    for j in 1..g.ny - 1 {
        for i in 0..g.nx - 1 {
            let (low, high) = (g.idx(i, j), g.idx(i + 1, j));
            let face = classify(geo, low, high, g.edge_of(low), g.edge_of(high));
            fields.flux_x[low] = match face {
                Face::Closed => 0.0,
                Face::Inlet(ring) => rho * fields.u[ring] * g.dy,
                Face::Outlet { active, .. } => rho * fields.u[active] * g.dy,
                Face::Interior => {
                    let d_f = 0.5 * (d[low] + d[high]);
                    let mean_grad = 0.5 * (pressure_gradient(geo, &fields.p, low).0 + pressure_gradient(geo, &fields.p, high).0);
                    let face_grad = (fields.p[high] - fields.p[low]) / g.dx;
                    let u_f = 0.5 * (fields.u[low] + fields.u[high]) - d_f * (face_grad - mean_grad);
                    rho * u_f * g.dy
                }
            };
        }
    }
    for j in 0..g.ny - 1 {
        for i in 1..g.nx - 1 {
            let (low, high) = (g.idx(i, j), g.idx(i, j + 1));
            let face = classify(geo, low, high, g.edge_of(low), g.edge_of(high));
            fields.flux_y[low] = match face {
                Face::Closed => 0.0,
                Face::Inlet(ring) => rho * fields.v[ring] * g.dx,
                Face::Outlet { active, .. } => rho * fields.v[active] * g.dx,
                Face::Interior => {
                    let d_f = 0.5 * (d[low] + d[high]);
                    let mean_grad = 0.5 * (pressure_gradient(geo, &fields.p, low).1 + pressure_gradient(geo, &fields.p, high).1);
                    let face_grad = (fields.p[high] - fields.p[low]) / g.dy;
                    let v_f = 0.5 * (fields.v[low] + fields.v[high]) - d_f * (face_grad - mean_grad);
                    rho * v_f * g.dx
                }
            };
        }
    }
}

/// Face fluxes of the seeded fields: plain linear interpolation.
pub fn initialize_face_fluxes(ctx: &FlowContext, fields: &mut FieldSet) {
    let d = vec![0.0; ctx.geometry.grid.len()];
    compute_face_fluxes(ctx, &d, fields);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{BoundaryConfig, FluidConfig};
    use crate::solver::boundary::{BoundaryConditions, EdgeRoles, InletConditions};
    use crate::solver::diagnostics::compute_mass_imbalance;
    use crate::solver::momentum::MomentumSolver;
    use crate::solver::obstacles::{Obstacle, ObstacleField};
    use crate::solver::params::SolverConfig;
    use crate::state::Grid;

    struct Case {
        geo: Geometry,
        fluid: FluidConfig,
        settings: SolverConfig,
        bc: BoundaryConditions,
    }

    impl Case {
        fn new(obstacles: &[Obstacle]) -> Self {
            let grid = Grid::new(40.0, 20.0, 20, 10).unwrap();
            let field = ObstacleField::rasterize(&grid, obstacles).unwrap();
            let edges = EdgeRoles::from_direction(0.0);
            let inlet = InletConditions::new(&BoundaryConfig::default(), &grid, 0.09, 1e-10);
            let settings = SolverConfig { pressure_iterations: 2000, pressure_tolerance: 1e-10, ..SolverConfig::default() };
            Self {
                geo: Geometry::new(grid, field, edges),
                fluid: FluidConfig::default(),
                settings,
                bc: BoundaryConditions::new(edges, inlet),
            }
        }

        fn ctx(&self) -> FlowContext<'_> {
            FlowContext {
                geometry: &self.geo,
                fluid: &self.fluid,
                settings: &self.settings,
                boundary: &self.bc,
            }
        }
    }

    #[test]
    fn test_seeded_channel_fluxes_balance() {
        let case = Case::new(&[]);
        let mut fields = FieldSet::new(&case.geo.grid);
        case.bc.seed(&case.geo, &mut fields);
        initialize_face_fluxes(&case.ctx(), &mut fields);
        let g = &case.geo.grid;
        assert!((fields.flux_x[g.idx(0, 5)] - 1.225 * 5.0 * 2.0).abs() < 1e-12, "inlet flux");
        assert_eq!(fields.flux_y[g.idx(5, 0)], 0.0, "wall flux");
        assert!(compute_mass_imbalance(&case.geo, &fields, 1.225) < 1e-12);
    }

    #[test]
    fn test_correction_removes_imbalance_around_block() {
        let case = Case::new(&[Obstacle::Building { x_min: 16.0, x_max: 20.0, y_min: 8.0, y_max: 12.0 }]);
        let ctx = case.ctx();
        let g = &case.geo.grid;
        let mut fields = FieldSet::new(g);
        case.bc.seed(&case.geo, &mut fields);
        initialize_face_fluxes(&ctx, &mut fields);

        let mut momentum = MomentumSolver::new(g.nx, g.ny);
        let mut pressure = PressureSolver::new(g.nx, g.ny);
        momentum.predict(&ctx, &mut fields);
        let report = pressure.correct(&ctx, &momentum.d, &mut fields);

        assert!(report.continuity > 0.1, "the block must disturb continuity: {}", report.continuity);
        let after = compute_mass_imbalance(&case.geo, &fields, case.fluid.density);
        assert!(
            after < 1e-4 * report.continuity,
            "corrected fluxes should balance: before {:e}, after {:e}",
            report.continuity,
            after
        );
        // Flow is pushed up in front of the block
        let p_front = fields.p[g.idx(7, 5)];
        let p_back = fields.p[g.idx(10, 5)];
        assert!(p_front > p_back, "stagnation pressure {} should exceed wake {}", p_front, p_back);
    }

    #[test]
    fn test_uniform_flow_needs_no_correction() {
        let case = Case::new(&[]);
        let ctx = case.ctx();
        let g = &case.geo.grid;
        let mut fields = FieldSet::new(g);
        case.bc.seed(&case.geo, &mut fields);
        initialize_face_fluxes(&ctx, &mut fields);
        let d = vec![1.0; g.len()];
        let mut pressure = PressureSolver::new(g.nx, g.ny);
        let report = pressure.correct(&ctx, &d, &mut fields);
        assert!(report.continuity < 1e-12);
        assert!(pressure.correction.iter().all(|&x| x.abs() < 1e-12));
    }
}
