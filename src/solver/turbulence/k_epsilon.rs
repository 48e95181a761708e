use super::{
    CellTerm, SecondQuantity, TransportReport, TurbulenceFields, apply_wall_functions, assemble_transport,
    solve_transport,
};
use crate::solver::FlowContext;
use crate::solver::boundary::{FieldType, set_bnd};
use crate::solver::core::{StencilSystem, fill_cells};
use crate::solver::diagnostics::compute_strain_rate_squared;
use crate::solver::params::KEpsilonParams;
use crate::state::FieldSet;

/// Production is capped at this multiple of the dissipation.
const PRODUCTION_LIMIT: f64 = 10.0;

/// Standard high-Reynolds k-epsilon model with log-law wall functions.
#[derive(Clone, Debug)]
pub struct KEpsilonModel {
    pub params: KEpsilonParams,
    pub fields: TurbulenceFields,
    /// Friction velocity at near-wall cells.
    pub u_tau: Vec<f64>,
    strain2: Vec<f64>,
    production: Vec<f64>,
    /// `epsilon / k` of the previous state
    decay: Vec<f64>,
    diffusivity: Vec<f64>,
    system: StencilSystem,
    scratch: Vec<f64>,
}

impl KEpsilonModel {
    pub fn new(ctx: &FlowContext) -> Self {
        let g = &ctx.geometry.grid;
        let n = g.len();
        let inlet = &ctx.boundary.inlet;
        Self {
            params: ctx.settings.k_epsilon.clone(),
            fields: TurbulenceFields::seeded(ctx, inlet.k, inlet.epsilon, SecondQuantity::Epsilon),
            u_tau: vec![0.0; n],
            strain2: vec![0.0; n],
            production: vec![0.0; n],
            decay: vec![0.0; n],
            diffusivity: vec![0.0; n],
            system: StencilSystem::new(g.nx, g.ny),
            scratch: Vec::with_capacity(n),
        }
    }

    /// `nu_t = C_mu k^2 / epsilon`, replaced by the log-law value next to walls.
    pub fn compute_eddy_viscosity(&mut self, ctx: &FlowContext, fields: &mut FieldSet) {
        let geo = ctx.geometry;
        let floor = ctx.settings.turbulence_floor;
        let p = &self.params;
        let k = &self.fields.k;
        let eps = &self.fields.second;
        fill_cells(&mut fields.nu_t, |c| {
            if geo.obstacles.is_solid(c) {
                return 0.0;
            }
            (p.c_mu * k[c] * k[c] / eps[c].max(floor)).clamp(0.0, p.nu_t_max)
        });
        apply_wall_functions(ctx, k, p.c_mu, p.kappa, p.e_wall, &mut fields.nu_t, &mut self.u_tau);
        set_bnd(FieldType::EddyViscosity, &mut fields.nu_t, geo, ctx.boundary);
    }

    /// One implicit update of `k`, then of `epsilon` with the new `k`.
    pub fn advance(&mut self, ctx: &FlowContext, fields: &FieldSet) -> TransportReport {
        let geo = ctx.geometry;
        let nu = ctx.fluid.viscosity;
        let floor = ctx.settings.turbulence_floor;
        let inlet = &ctx.boundary.inlet;
        let p = self.params.clone();

        compute_strain_rate_squared(geo, &fields.u, &fields.v, &mut self.strain2);
        for c in 0..self.production.len() {
            let k = self.fields.k[c].max(floor);
            let eps = self.fields.second[c].max(floor);
            self.decay[c] = eps / k;
            self.production[c] = (fields.nu_t[c] * self.strain2[c]).min(PRODUCTION_LIMIT * eps);
        }

        // k: P - epsilon, with the sink linearised as (epsilon / k) k
        for (gamma, nu_t) in self.diffusivity.iter_mut().zip(&fields.nu_t) {
            *gamma = nu + nu_t / p.sigma_k;
        }
        assemble_transport(
            &mut self.system,
            ctx,
            fields,
            &self.fields.k,
            &self.diffusivity,
            inlet.k,
            |c| CellTerm::Source { su: self.production[c], sp: self.decay[c] },
        );
        let k_report = solve_transport(&self.system, &mut self.fields.k, &mut self.scratch, ctx, inlet.k);

        // epsilon: (C1 P - C2 epsilon) epsilon / k, equilibrium value at walls
        for (gamma, nu_t) in self.diffusivity.iter_mut().zip(&fields.nu_t) {
            *gamma = nu + nu_t / p.sigma_eps;
        }
        let k_new = &self.fields.k;
        let c_mu_75 = p.c_mu.powf(0.75);
        assemble_transport(
            &mut self.system,
            ctx,
            fields,
            &self.fields.second,
            &self.diffusivity,
            inlet.epsilon,
            |c| {
                if geo.near_wall[c] {
                    let y = geo.wall_distance[c];
                    CellTerm::Fixed((c_mu_75 * k_new[c].powf(1.5) / (p.kappa * y)).max(floor))
                } else {
                    CellTerm::Source {
                        su: p.c_1 * self.decay[c] * self.production[c],
                        sp: p.c_2 * self.decay[c],
                    }
                }
            },
        );
        let eps_report = solve_transport(&self.system, &mut self.fields.second, &mut self.scratch, ctx, inlet.epsilon);

        TransportReport { k: k_report, second: eps_report }
    }
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
            let settings = SolverConfig::default_k_epsilon();
            let inlet = InletConditions::new(
                &BoundaryConfig::default(),
                &grid,
                settings.k_epsilon.c_mu,
                settings.turbulence_floor,
            );
            Self {
                geo: Geometry::new(grid, field, edges),
                fluid: FluidConfig::default(),
                settings,
                bc: BoundaryConditions::new(edges, inlet),
            }
        }

        fn ctx(&self) -> FlowContext<'_> {
            FlowContext { geometry: &self.geo, fluid: &self.fluid, settings: &self.settings, boundary: &self.bc }
        }
    }

    #[test]
    fn test_eddy_viscosity_from_inlet_state() {
        let case = Case::new(&[]);
        let ctx = case.ctx();
        let mut model = KEpsilonModel::new(&ctx);
        let mut fields = FieldSet::new(&case.geo.grid);
        case.bc.seed(&case.geo, &mut fields);
        model.compute_eddy_viscosity(&ctx, &mut fields);

        let inlet = &case.bc.inlet;
        let expected = 0.09 * inlet.k * inlet.k / inlet.epsilon;
        let c = case.geo.grid.idx(10, 5);
        assert!((fields.nu_t[c] - expected).abs() < 1e-12 * expected.max(1.0), "nu_t = {}", fields.nu_t[c]);
        // Wall-adjacent cells carry a friction velocity
        let w = case.geo.grid.idx(10, 1);
        assert!(model.u_tau[w] > 0.0);
        assert_eq!(model.u_tau[c], 0.0);
    }

    #[test]
    fn test_transport_stays_positive_around_building() {
        let case = Case::new(&[Obstacle::Building { x_min: 16.0, x_max: 24.0, y_min: 6.0, y_max: 14.0 }]);
        let ctx = case.ctx();
        let mut model = KEpsilonModel::new(&ctx);
        let mut fields = FieldSet::new(&case.geo.grid);
        case.bc.seed(&case.geo, &mut fields);
        initialize_face_fluxes(&ctx, &mut fields);
        // Strong shear to drive production
        for (c, u) in fields.u.iter_mut().enumerate() {
            let (_, j) = case.geo.grid.coords(c);
            *u *= j as f64 / 5.0;
        }
        for _ in 0..20 {
            model.compute_eddy_viscosity(&ctx, &mut fields);
            model.advance(&ctx, &fields);
            assert!(model.fields.k.iter().all(|&k| k >= 0.0), "negative k");
            assert!(model.fields.second.iter().all(|&e| e > 0.0), "non-positive epsilon");
            assert!(model.fields.first_non_finite().is_none());
        }
        // Solids hold the floor
        let solid = case.geo.grid.idx(10, 5);
        assert_eq!(model.fields.k[solid], case.settings.turbulence_floor);
    }

    #[test]
    fn test_near_wall_epsilon_is_equilibrium_value() {
        let case = Case::new(&[]);
        let ctx = case.ctx();
        let mut model = KEpsilonModel::new(&ctx);
        let mut fields = FieldSet::new(&case.geo.grid);
        case.bc.seed(&case.geo, &mut fields);
        initialize_face_fluxes(&ctx, &mut fields);
        model.compute_eddy_viscosity(&ctx, &mut fields);
        model.advance(&ctx, &fields);

        let c = case.geo.grid.idx(10, 1);
        let y = case.geo.wall_distance[c];
        let k = model.fields.k[c];
        let expected = 0.09_f64.powf(0.75) * k.powf(1.5) / (0.41 * y);
        assert!((model.fields.second[c] - expected).abs() <= 1e-9 * expected, "epsilon {}", model.fields.second[c]);
    }
}
