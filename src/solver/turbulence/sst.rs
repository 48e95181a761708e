use super::{
    CellTerm, SecondQuantity, TransportReport, TurbulenceFields, apply_wall_functions, assemble_transport,
    solve_transport, transport_neighbor,
};
use crate::solver::FlowContext;
use crate::solver::boundary::{FieldType, set_bnd};
use crate::solver::core::{StencilSystem, fill_cells};
use crate::solver::diagnostics::compute_strain_rate_squared;
use crate::solver::geometry::{Dir, Geometry};
use crate::solver::params::SstParams;
use crate::state::FieldSet;

/// Lower bound of the cross-diffusion term inside `arg1`.
const CD_MIN: f64 = 1e-10;
/// Production limiter relative to `beta* k omega`.
const PRODUCTION_LIMIT: f64 = 10.0;

/// Menter's k-omega SST model.
#[derive(Clone, Debug)]
pub struct SstModel {
    pub params: SstParams,
    pub fields: TurbulenceFields,
    /// Friction velocity at near-wall cells.
    pub u_tau: Vec<f64>,
    /// Inner/outer blending function, 1 near walls.
    pub f1: Vec<f64>,
    /// Shear-stress limiter blending function.
    pub f2: Vec<f64>,
    strain2: Vec<f64>,
    /// `2 sigma_w2 / omega grad k . grad omega`
    cross: Vec<f64>,
    diffusivity: Vec<f64>,
    system: StencilSystem,
    scratch: Vec<f64>,
}

impl SstModel {
    pub fn new(ctx: &FlowContext) -> Self {
        let g = &ctx.geometry.grid;
        let n = g.len();
        let inlet = &ctx.boundary.inlet;
        Self {
            params: ctx.settings.sst.clone(),
            fields: TurbulenceFields::seeded(ctx, inlet.k, inlet.omega, SecondQuantity::Omega),
            u_tau: vec![0.0; n],
            f1: vec![1.0; n],
            f2: vec![1.0; n],
            strain2: vec![0.0; n],
            cross: vec![0.0; n],
            diffusivity: vec![0.0; n],
            system: StencilSystem::new(g.nx, g.ny),
            scratch: Vec::with_capacity(n),
        }
    }

    /// `nu_t = a1 k / max(a1 omega, S F2)`, replaced by the log-law value
    /// next to walls.
    pub fn compute_eddy_viscosity(&mut self, ctx: &FlowContext, fields: &mut FieldSet) {
        let geo = ctx.geometry;
        let floor = ctx.settings.turbulence_floor;
        compute_strain_rate_squared(geo, &fields.u, &fields.v, &mut self.strain2);
        self.update_blending(ctx);

        let p = &self.params;
        let k = &self.fields.k;
        let omega = &self.fields.second;
        let strain2 = &self.strain2;
        let f2 = &self.f2;
        fill_cells(&mut fields.nu_t, |c| {
            if geo.obstacles.is_solid(c) {
                return 0.0;
            }
            let denom = (p.a1 * omega[c].max(floor)).max(strain2[c].sqrt() * f2[c]);
            (p.a1 * k[c] / denom).clamp(0.0, p.nu_t_max)
        });
        apply_wall_functions(ctx, k, p.beta_star, p.kappa, p.e_wall, &mut fields.nu_t, &mut self.u_tau);
        set_bnd(FieldType::EddyViscosity, &mut fields.nu_t, geo, ctx.boundary);
    }

    /// Blending functions and cross-diffusion from the current `k, omega`.
    fn update_blending(&mut self, ctx: &FlowContext) {
        let geo = ctx.geometry;
        let nu = ctx.fluid.viscosity;
        let floor = ctx.settings.turbulence_floor;
        let p = &self.params;
        let k = &self.fields.k;
        let omega = &self.fields.second;

        self.f1.fill(1.0);
        self.f2.fill(1.0);
        self.cross.fill(0.0);
        for c in geo.active_cells() {
            let kc = k[c].max(0.0);
            let wc = omega[c].max(floor);
            let y = geo.wall_distance[c];
            let (dkdx, dkdy) = gradient(geo, k, c);
            let (dwdx, dwdy) = gradient(geo, omega, c);
            let cross = 2.0 * p.sigma_w2 / wc * (dkdx * dwdx + dkdy * dwdy);

            let sqrt_k = kc.sqrt();
            let viscous = 500.0 * nu / (y * y * wc);
            let turbulent = sqrt_k / (p.beta_star * wc * y);
            let arg1 = turbulent.max(viscous).min(4.0 * p.sigma_w2 * kc / (cross.max(CD_MIN) * y * y));
            let arg2 = (2.0 * turbulent).max(viscous);

            self.f1[c] = arg1.powi(4).tanh();
            self.f2[c] = (arg2 * arg2).tanh();
            self.cross[c] = cross;
        }
    }

    /// One implicit update of `k`, then of `omega` with the new `k`.
    pub fn advance(&mut self, ctx: &FlowContext, fields: &FieldSet) -> TransportReport {
        let geo = ctx.geometry;
        let nu = ctx.fluid.viscosity;
        let floor = ctx.settings.turbulence_floor;
        let inlet = &ctx.boundary.inlet;
        let use_wall_functions = ctx.settings.use_wall_functions;
        let p = self.params.clone();

        compute_strain_rate_squared(geo, &fields.u, &fields.v, &mut self.strain2);
        self.update_blending(ctx);

        // k: limited production, sink beta* omega k
        for c in 0..self.diffusivity.len() {
            let sigma_k = blend(self.f1[c], p.sigma_k1, p.sigma_k2);
            self.diffusivity[c] = nu + sigma_k * fields.nu_t[c];
        }
        let omega_old = &self.fields.second;
        let k_old = &self.fields.k;
        let strain2 = &self.strain2;
        assemble_transport(
            &mut self.system,
            ctx,
            fields,
            k_old,
            &self.diffusivity,
            inlet.k,
            |c| {
                let w = omega_old[c].max(floor);
                let production = (fields.nu_t[c] * strain2[c]).min(PRODUCTION_LIMIT * p.beta_star * k_old[c] * w);
                CellTerm::Source { su: production, sp: p.beta_star * w }
            },
        );
        let k_report = solve_transport(&self.system, &mut self.fields.k, &mut self.scratch, ctx, inlet.k);

        // omega: gamma S^2 - beta omega^2 + (1 - F1) cross-diffusion
        for c in 0..self.diffusivity.len() {
            let sigma_w = blend(self.f1[c], p.sigma_w1, p.sigma_w2);
            self.diffusivity[c] = nu + sigma_w * fields.nu_t[c];
        }
        let k_new = &self.fields.k;
        let omega_old = &self.fields.second;
        let f1 = &self.f1;
        let cross = &self.cross;
        let strain2 = &self.strain2;
        assemble_transport(
            &mut self.system,
            ctx,
            fields,
            omega_old,
            &self.diffusivity,
            inlet.omega,
            |c| {
                if geo.near_wall[c] {
                    return CellTerm::Fixed(wall_omega(geo, &p, nu, k_new[c], c, use_wall_functions).max(floor));
                }
                let w = omega_old[c].max(floor);
                let gamma = blend(f1[c], p.gamma1, p.gamma2);
                let beta = blend(f1[c], p.beta1, p.beta2);
                let cd = (1.0 - f1[c]) * cross[c];
                CellTerm::Source {
                    su: gamma * strain2[c] + cd.max(0.0),
                    sp: beta * w + (-cd).max(0.0) / w,
                }
            },
        );
        let w_report = solve_transport(&self.system, &mut self.fields.second, &mut self.scratch, ctx, inlet.omega);

        TransportReport { k: k_report, second: w_report }
    }
}

/// `F1 a + (1 - F1) b`
fn blend(f1: f64, inner: f64, outer: f64) -> f64 {
    f1 * inner + (1.0 - f1) * outer
}

/// Near-wall `omega`: the viscous-sublayer value, blended with the
/// log-layer value when wall functions are on.
fn wall_omega(geo: &Geometry, p: &SstParams, nu: f64, k: f64, c: usize, use_wall_functions: bool) -> f64 {
    let y = geo.wall_distance[c];
    let viscous = 6.0 * nu / (p.beta1 * y * y);
    if !use_wall_functions {
        return viscous;
    }
    let log = k.max(0.0).sqrt() / (p.beta_star.powf(0.25) * p.kappa * y);
    viscous.hypot(log)
}

/// Central-difference gradient with zero-gradient walls and solids.
fn gradient(geo: &Geometry, phi: &[f64], c: usize) -> (f64, f64) {
    let g = &geo.grid;
    let dx = (transport_neighbor(geo, phi, c, Dir::East) - transport_neighbor(geo, phi, c, Dir::West)) / (2.0 * g.dx);
    let dy = (transport_neighbor(geo, phi, c, Dir::North) - transport_neighbor(geo, phi, c, Dir::South)) / (2.0 * g.dy);
    (dx, dy)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{BoundaryConfig, FluidConfig};
    use crate::solver::boundary::{BoundaryConditions, EdgeRoles, InletConditions};
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
            let settings = SolverConfig::default_sst();
            let inlet = InletConditions::new(
                &BoundaryConfig::default(),
                &grid,
                settings.sst.beta_star,
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
    fn test_blend_limits() {
        assert_eq!(blend(1.0, 0.85, 1.0), 0.85);
        assert_eq!(blend(0.0, 0.85, 1.0), 1.0);
        assert!((blend(0.5, 0.5, 1.0) - 0.75).abs() < 1e-15);
    }

    #[test]
    fn test_blending_functions_are_bounded() {
        let case = Case::new(&[Obstacle::Building { x_min: 16.0, x_max: 24.0, y_min: 6.0, y_max: 14.0 }]);
        let ctx = case.ctx();
        let mut model = SstModel::new(&ctx);
        let mut fields = FieldSet::new(&case.geo.grid);
        case.bc.seed(&case.geo, &mut fields);
        model.compute_eddy_viscosity(&ctx, &mut fields);
        for c in case.geo.active_cells() {
            assert!((0.0..=1.0).contains(&model.f1[c]), "F1 = {}", model.f1[c]);
            assert!((0.0..=1.0).contains(&model.f2[c]), "F2 = {}", model.f2[c]);
        }
    }

    #[test]
    fn test_uniform_inlet_state_gives_k_over_omega() {
        let case = Case::new(&[]);
        let ctx = case.ctx();
        let mut model = SstModel::new(&ctx);
        let mut fields = FieldSet::new(&case.geo.grid);
        case.bc.seed(&case.geo, &mut fields);
        model.compute_eddy_viscosity(&ctx, &mut fields);
        // No strain in the core of a uniform stream
        let c = case.geo.grid.idx(10, 5);
        let inlet = &case.bc.inlet;
        let expected = inlet.k / inlet.omega;
        assert!((fields.nu_t[c] - expected).abs() < 1e-12 * expected.max(1.0), "nu_t = {}", fields.nu_t[c]);
    }

    #[test]
    fn test_transport_stays_positive_around_building() {
        let case = Case::new(&[Obstacle::Building { x_min: 16.0, x_max: 24.0, y_min: 6.0, y_max: 14.0 }]);
        let ctx = case.ctx();
        let mut model = SstModel::new(&ctx);
        let mut fields = FieldSet::new(&case.geo.grid);
        case.bc.seed(&case.geo, &mut fields);
        initialize_face_fluxes(&ctx, &mut fields);
        for (c, v) in fields.v.iter_mut().enumerate() {
            let (i, _) = case.geo.grid.coords(c);
            *v = 0.3 * (i as f64 - 10.0);
        }
        for _ in 0..20 {
            model.compute_eddy_viscosity(&ctx, &mut fields);
            model.advance(&ctx, &fields);
            assert!(model.fields.k.iter().all(|&k| k >= 0.0), "negative k");
            assert!(model.fields.second.iter().all(|&w| w > 0.0), "non-positive omega");
            assert!(model.fields.first_non_finite().is_none());
        }
    }

    #[test]
    fn test_wall_omega_without_wall_functions_is_viscous_value() {
        let case = Case::new(&[]);
        let p = SstParams::default();
        let c = case.geo.grid.idx(10, 1);
        let y = case.geo.wall_distance[c];
        let w = wall_omega(&case.geo, &p, 1.5e-5, 0.1, c, false);
        assert!((w - 6.0 * 1.5e-5 / (0.075 * y * y)).abs() < 1e-15);
        assert!(wall_omega(&case.geo, &p, 1.5e-5, 0.1, c, true) > w);
    }
}
