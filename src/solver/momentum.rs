use super::FlowContext;
use super::core::{StencilSystem, SweepReport, lin_solve};
use super::geometry::{Dir, Link};
use crate::state::FieldSet;

/// Scaled residuals of the momentum systems before solving.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct MomentumReport {
    pub residual_x: f64,
    pub residual_y: f64,
}

/// Assembles and solves the under-relaxed momentum equations.
///
/// Both components share one coefficient matrix and differ only in the
/// right-hand side.
#[derive(Debug, Clone)]
pub struct MomentumSolver {
    system: StencilSystem,
    b_x: Vec<f64>,
    b_y: Vec<f64>,
    scratch: Vec<f64>,
    /// `V / a_P` of the relaxed diagonal; zero outside active cells.
    pub d: Vec<f64>,
}

impl MomentumSolver {
    pub fn new(nx: usize, ny: usize) -> Self {
        let n = nx * ny;
        Self {
            system: StencilSystem::new(nx, ny),
            b_x: vec![0.0; n],
            b_y: vec![0.0; n],
            scratch: Vec::with_capacity(n),
            d: vec![0.0; n],
        }
    }

    /// Solve for the predicted velocities `u*, v*` in place.
    pub fn predict(&mut self, ctx: &FlowContext, fields: &mut FieldSet) -> MomentumReport {
        self.assemble(ctx, fields);
        let sweep = ctx.settings.momentum_sweep();

        self.system.b.copy_from_slice(&self.b_x);
        let rx = lin_solve(&self.system, &mut fields.u, &mut self.scratch, sweep);
        self.system.b.copy_from_slice(&self.b_y);
        let ry = lin_solve(&self.system, &mut fields.v, &mut self.scratch, sweep);

        MomentumReport {
            residual_x: scaled(rx, &self.system.a_p, &fields.u),
            residual_y: scaled(ry, &self.system.a_p, &fields.v),
        }
    }

    fn assemble(&mut self, ctx: &FlowContext, fields: &FieldSet) {
        let geo = ctx.geometry;
        let g = &geo.grid;
        let rho = ctx.fluid.density;
        let nu = ctx.fluid.viscosity;
        let alpha = ctx.settings.velocity_relaxation;
        let drag_coefficient = ctx.settings.porous_drag_coefficient;
        let volume = g.cell_volume();

        self.system.reset();
        self.b_x.fill(0.0);
        self.b_y.fill(0.0);
        self.d.fill(0.0);

        for c in g.interior() {
            // Solid cells: u = v = 0
            if geo.obstacles.is_solid(c) {
                self.system.set_fixed(c, 0.0);
                continue;
            }

            let nu_c = nu + fields.nu_t[c];
            let mut a_p = 0.0;
            let mut net_outflow = 0.0;
            let mut b_x = -0.5 * (geo.neighbor_value(&fields.p, c, Dir::East) - geo.neighbor_value(&fields.p, c, Dir::West)) * g.dy;
            let mut b_y = -0.5 * (geo.neighbor_value(&fields.p, c, Dir::North) - geo.neighbor_value(&fields.p, c, Dir::South)) * g.dx;

            for dir in Dir::ALL {
                let area = dir.face_area(g);
                let delta = dir.spacing(g);
                let f_out = geo.outward_flux(&fields.flux_x, &fields.flux_y, c, dir);
                let convection = (-f_out).max(0.0);
                net_outflow += f_out;
                match geo.link(c, dir) {
                    Link::Interior(n) => {
                        let nu_f = 0.5 * (nu_c + nu + fields.nu_t[n]);
                        let a = rho * nu_f * area / delta + convection;
                        self.set_neighbor(c, dir, a);
                        a_p += a;
                    }
                    // Dirichlet neighbour folded into the source
                    Link::Inlet(n) | Link::Wall(n) => {
                        let a = rho * nu_c * area / delta + convection;
                        a_p += a;
                        b_x += a * fields.u[n];
                        b_y += a * fields.v[n];
                    }
                    // Zero gradient: the neighbour equals the cell itself
                    Link::Outlet(_) => {}
                }
            }

            // a_P = sum(a_nb) + max(net outflow, 0): a cell with no upwind
            // inflow is still bounded by the momentum it convects away
            a_p += net_outflow.max(0.0);

            // Porous drag, linearised on the current speed
            let drag = geo.obstacles.drag_factor(c);
            if drag > 0.0 {
                a_p += rho * drag_coefficient * drag * fields.u[c].hypot(fields.v[c]) * volume;
            }

            // Under-relaxation
            let a_p_relaxed = a_p / alpha;
            b_x += (a_p_relaxed - a_p) * fields.u[c];
            b_y += (a_p_relaxed - a_p) * fields.v[c];

            self.system.a_p[c] = a_p_relaxed;
            self.b_x[c] = b_x;
            self.b_y[c] = b_y;
            self.d[c] = volume / a_p_relaxed;
        }
    }

    fn set_neighbor(&mut self, c: usize, dir: Dir, a: f64) {
        match dir {
            Dir::East => self.system.a_e[c] = a,
            Dir::West => self.system.a_w[c] = a,
            Dir::North => self.system.a_n[c] = a,
            Dir::South => self.system.a_s[c] = a,
        }
    }
}

/// Initial residual normalised by the largest diagonal momentum `a_P |u_P|`.
fn scaled(report: SweepReport, a_p: &[f64], x: &[f64]) -> f64 {
    let reference = a_p
        .iter()
        .zip(x)
        .map(|(a, v)| (a * v).abs())
        .fold(0.0, f64::max);
    if reference > 0.0 { report.initial_residual / reference } else { report.initial_residual }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{BoundaryConfig, FluidConfig};
    use crate::solver::boundary::{BoundaryConditions, EdgeRoles, InletConditions};
    use crate::solver::geometry::Geometry;
    use crate::solver::obstacles::{Obstacle, ObstacleField};
    use crate::solver::params::SolverConfig;
    use crate::solver::pressure::initialize_face_fluxes;
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
            Self {
                geo: Geometry::new(grid, field, edges),
                fluid: FluidConfig::default(),
                settings: SolverConfig::default(),
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

        fn seeded(&self) -> FieldSet {
            let mut fields = FieldSet::new(&self.geo.grid);
            self.bc.seed(&self.geo, &mut fields);
            initialize_face_fluxes(&self.ctx(), &mut fields);
            fields
        }
    }

    #[test]
    fn test_uniform_flow_is_preserved_away_from_walls() {
        let case = Case::new(&[]);
        let mut fields = case.seeded();
        let mut solver = MomentumSolver::new(case.geo.grid.nx, case.geo.grid.ny);
        solver.predict(&case.ctx(), &mut fields);
        let g = &case.geo.grid;
        let c = g.idx(10, 5);
        assert!((fields.u[c] - 5.0).abs() < 1e-9, "u = {}", fields.u[c]);
        assert!(fields.v[c].abs() < 1e-9, "v = {}", fields.v[c]);
        // Wall rows are only slightly retarded
        let w = g.idx(10, 1);
        assert!(fields.u[w] < 5.0 && fields.u[w] > 4.99, "wall row u = {}", fields.u[w]);
    }

    #[test]
    fn test_solid_cells_stay_zero() {
        let case = Case::new(&[Obstacle::Building { x_min: 20.0, x_max: 24.0, y_min: 8.0, y_max: 12.0 }]);
        let mut fields = case.seeded();
        let mut solver = MomentumSolver::new(case.geo.grid.nx, case.geo.grid.ny);
        solver.predict(&case.ctx(), &mut fields);
        let c = case.geo.grid.idx(10, 4);
        assert_eq!(fields.u[c], 0.0);
        assert_eq!(fields.v[c], 0.0);
        assert_eq!(solver.d[c], 0.0);
    }

    #[test]
    fn test_cell_behind_block_keeps_convective_diagonal() {
        // Its west face is closed, so the only convection is outflow
        let case = Case::new(&[Obstacle::Building { x_min: 16.0, x_max: 20.0, y_min: 8.0, y_max: 12.0 }]);
        let mut fields = case.seeded();
        let mut solver = MomentumSolver::new(case.geo.grid.nx, case.geo.grid.ny);
        solver.predict(&case.ctx(), &mut fields);
        let g = &case.geo.grid;
        let behind = solver.d[g.idx(10, 4)];
        let open = solver.d[g.idx(5, 5)];
        assert!(behind > 0.0 && behind < 2.0 * open, "d behind block {} vs open {}", behind, open);
        assert!(fields.u[g.idx(10, 4)].is_finite());
    }

    #[test]
    fn test_porous_drag_slows_flow() {
        let tree = Obstacle::Tree { x_center: 21.0, y_center: 11.0, radius: 0.5, porosity: 0.1 };
        let case = Case::new(&[tree]);
        let mut fields = case.seeded();
        let mut solver = MomentumSolver::new(case.geo.grid.nx, case.geo.grid.ny);
        solver.predict(&case.ctx(), &mut fields);
        let g = &case.geo.grid;
        let c = g.idx(10, 5);
        assert!(fields.u[c] < 4.0, "porous cell u = {}", fields.u[c]);
        assert!(solver.d[c] < solver.d[g.idx(5, 5)], "drag raises the diagonal");
    }

    #[test]
    fn test_open_canopy_matches_empty_domain() {
        let tree = Obstacle::Tree { x_center: 21.0, y_center: 11.0, radius: 3.0, porosity: 1.0 };
        let open = Case::new(&[tree]);
        let empty = Case::new(&[]);
        let mut a = open.seeded();
        let mut b = empty.seeded();
        MomentumSolver::new(20, 10).predict(&open.ctx(), &mut a);
        MomentumSolver::new(20, 10).predict(&empty.ctx(), &mut b);
        assert_eq!(a.u, b.u);
        assert_eq!(a.v, b.v);
    }
}
