//! Turbulence closures.
//!
//! A closed set of models behind one interface: each computes the eddy
//! viscosity from its own state, and the transport models additionally
//! advance `k` and a second quantity (`epsilon` or `omega`) once per SIMPLE
//! iteration. All transported quantities are clipped to the configured floor
//! after every update.

mod k_epsilon;
mod sst;

pub use k_epsilon::KEpsilonModel;
pub use sst::SstModel;

use super::FlowContext;
use super::boundary::{FieldType, set_bnd};
use super::core::{StencilSystem, SweepReport, lin_solve};
use super::geometry::{Dir, Geometry, Link};
use super::params::TurbulenceModelKind;
use crate::state::FieldSet;

/// Upper edge of the viscous sublayer in wall units.
pub(crate) const Y_PLUS_LAMINAR: f64 = 11.225;

/// Which dissipation-like quantity accompanies `k`.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SecondQuantity {
    Epsilon,
    Omega,
}

/// Transported turbulence state.
#[derive(Clone, Debug, PartialEq)]
pub struct TurbulenceFields {
    /// Turbulent kinetic energy [m^2/s^2]
    pub k: Vec<f64>,
    /// `epsilon` [m^2/s^3] or `omega` [1/s]
    pub second: Vec<f64>,
    pub quantity: SecondQuantity,
}

impl TurbulenceFields {
    /// Inlet state in every open cell, the floor inside solids.
    fn seeded(ctx: &FlowContext, k_inlet: f64, second_inlet: f64, quantity: SecondQuantity) -> Self {
        let geo = ctx.geometry;
        let floor = ctx.settings.turbulence_floor;
        let n = geo.grid.len();
        let mut fields = Self {
            k: vec![k_inlet; n],
            second: vec![second_inlet; n],
            quantity,
        };
        set_bnd(FieldType::Turbulence { inlet: k_inlet, floor }, &mut fields.k, geo, ctx.boundary);
        set_bnd(FieldType::Turbulence { inlet: second_inlet, floor }, &mut fields.second, geo, ctx.boundary);
        fields
    }

    pub fn first_non_finite(&self) -> Option<&'static str> {
        if self.k.iter().any(|x| !x.is_finite()) {
            return Some("k");
        }
        if self.second.iter().any(|x| !x.is_finite()) {
            return Some(match self.quantity {
                SecondQuantity::Epsilon => "epsilon",
                SecondQuantity::Omega => "omega",
            });
        }
        None
    }
}

/// Sweep statistics of one transport update.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct TransportReport {
    pub k: SweepReport,
    pub second: SweepReport,
}

/// Fixed eddy viscosity.
#[derive(Clone, Debug, PartialEq)]
pub struct ConstantViscosity {
    pub nu_t: f64,
}

/// Turbulence closure of one run.
#[derive(Clone, Debug)]
pub enum TurbulenceModel {
    Constant(ConstantViscosity),
    KEpsilon(KEpsilonModel),
    KOmegaSst(SstModel),
}

impl TurbulenceModel {
    pub fn new(kind: TurbulenceModelKind, ctx: &FlowContext) -> Self {
        match kind {
            TurbulenceModelKind::Constant => TurbulenceModel::Constant(ConstantViscosity {
                nu_t: ctx.settings.constant_eddy_viscosity,
            }),
            TurbulenceModelKind::KEpsilon => TurbulenceModel::KEpsilon(KEpsilonModel::new(ctx)),
            TurbulenceModelKind::KOmegaSst => TurbulenceModel::KOmegaSst(SstModel::new(ctx)),
        }
    }

    pub fn kind(&self) -> TurbulenceModelKind {
        match self {
            TurbulenceModel::Constant(_) => TurbulenceModelKind::Constant,
            TurbulenceModel::KEpsilon(_) => TurbulenceModelKind::KEpsilon,
            TurbulenceModel::KOmegaSst(_) => TurbulenceModelKind::KOmegaSst,
        }
    }

    /// Write the eddy viscosity of the current state into `fields.nu_t`.
    pub fn compute_eddy_viscosity(&mut self, ctx: &FlowContext, fields: &mut FieldSet) {
        match self {
            TurbulenceModel::Constant(model) => {
                let geo = ctx.geometry;
                let value = model.nu_t;
                for (c, nu_t) in fields.nu_t.iter_mut().enumerate() {
                    *nu_t = if geo.obstacles.is_solid(c) { 0.0 } else { value };
                }
            }
            TurbulenceModel::KEpsilon(model) => model.compute_eddy_viscosity(ctx, fields),
            TurbulenceModel::KOmegaSst(model) => model.compute_eddy_viscosity(ctx, fields),
        }
    }

    /// Advance the transport equations one step using the corrected flow.
    pub fn advance_transport(&mut self, ctx: &FlowContext, fields: &FieldSet) -> TransportReport {
        match self {
            TurbulenceModel::Constant(_) => TransportReport::default(),
            TurbulenceModel::KEpsilon(model) => model.advance(ctx, fields),
            TurbulenceModel::KOmegaSst(model) => model.advance(ctx, fields),
        }
    }

    pub fn transport_fields(&self) -> Option<&TurbulenceFields> {
        match self {
            TurbulenceModel::Constant(_) => None,
            TurbulenceModel::KEpsilon(model) => Some(&model.fields),
            TurbulenceModel::KOmegaSst(model) => Some(&model.fields),
        }
    }

    /// Reset the transported state, e.g. to a saved snapshot.
    pub fn restore(&mut self, saved: &TurbulenceFields) {
        match self {
            TurbulenceModel::Constant(_) => {}
            TurbulenceModel::KEpsilon(model) => model.fields.clone_from(saved),
            TurbulenceModel::KOmegaSst(model) => model.fields.clone_from(saved),
        }
    }

    /// Friction velocity at near-wall cells (zero elsewhere).
    pub fn friction_velocity(&self) -> Option<&[f64]> {
        match self {
            TurbulenceModel::Constant(_) => None,
            TurbulenceModel::KEpsilon(model) => Some(&model.u_tau),
            TurbulenceModel::KOmegaSst(model) => Some(&model.u_tau),
        }
    }
}

/// Per-cell treatment of a transport equation.
pub(crate) enum CellTerm {
    /// Source `su - sp * phi` per unit volume, `sp >= 0`.
    Source { su: f64, sp: f64 },
    /// Prescribed value.
    Fixed(f64),
}

/// Assemble the under-relaxed upwind transport system for `phi`.
///
/// `diffusivity` is the kinematic `nu + nu_t / sigma` per cell. The inlet is
/// Dirichlet; outlet, walls and solids are zero-gradient.
pub(crate) fn assemble_transport(
    system: &mut StencilSystem,
    ctx: &FlowContext,
    fields: &FieldSet,
    phi: &[f64],
    diffusivity: &[f64],
    inlet_value: f64,
    mut term: impl FnMut(usize) -> CellTerm,
) {
    let geo = ctx.geometry;
    let g = &geo.grid;
    let rho = ctx.fluid.density;
    let alpha = ctx.settings.turbulence_relaxation;
    let mass = rho * g.cell_volume();

    system.reset();
    for c in g.interior() {
        if geo.obstacles.is_solid(c) {
            system.set_fixed(c, ctx.settings.turbulence_floor);
            continue;
        }
        let (su, sp) = match term(c) {
            CellTerm::Fixed(value) => {
                system.set_fixed(c, value);
                continue;
            }
            CellTerm::Source { su, sp } => (su, sp),
        };

        let mut a_p = 0.0;
        let mut b = su * mass;
        for dir in Dir::ALL {
            let area = dir.face_area(g);
            let delta = dir.spacing(g);
            let convection = (-geo.outward_flux(&fields.flux_x, &fields.flux_y, c, dir)).max(0.0);
            match geo.link(c, dir) {
                Link::Interior(n) => {
                    let a = rho * 0.5 * (diffusivity[c] + diffusivity[n]) * area / delta + convection;
                    match dir {
                        Dir::East => system.a_e[c] = a,
                        Dir::West => system.a_w[c] = a,
                        Dir::North => system.a_n[c] = a,
                        Dir::South => system.a_s[c] = a,
                    }
                    a_p += a;
                }
                Link::Inlet(_) => {
                    let a = rho * diffusivity[c] * area / delta + convection;
                    a_p += a;
                    b += a * inlet_value;
                }
                Link::Outlet(_) | Link::Wall(_) => {}
            }
        }
        a_p += sp * mass;

        let a_p_relaxed = a_p / alpha;
        system.a_p[c] = a_p_relaxed;
        system.b[c] = b + (a_p_relaxed - a_p) * phi[c];
    }
}

/// Solve an assembled transport system in place, clip to the floor and
/// re-impose boundary values.
pub(crate) fn solve_transport(
    system: &StencilSystem,
    phi: &mut [f64],
    scratch: &mut Vec<f64>,
    ctx: &FlowContext,
    inlet_value: f64,
) -> SweepReport {
    let floor = ctx.settings.turbulence_floor;
    let report = lin_solve(system, phi, scratch, ctx.settings.momentum_sweep());
    for x in phi.iter_mut() {
        // NaN passes through so divergence stays detectable.
        if *x < floor {
            *x = floor;
        }
    }
    set_bnd(FieldType::Turbulence { inlet: inlet_value, floor }, phi, ctx.geometry, ctx.boundary);
    report
}

/// Neighbour value for gradients of transported quantities; walls and
/// solids mirror the cell.
pub(crate) fn transport_neighbor(geo: &Geometry, phi: &[f64], c: usize, dir: Dir) -> f64 {
    match geo.link(c, dir) {
        Link::Interior(n) | Link::Inlet(n) | Link::Outlet(n) => phi[n],
        Link::Wall(_) => phi[c],
    }
}

/// Log-law eddy viscosity reproducing the wall shear at `y_plus`; zero
/// inside the viscous sublayer.
pub(crate) fn wall_viscosity(nu: f64, y_plus: f64, kappa: f64, e_wall: f64) -> f64 {
    if y_plus <= Y_PLUS_LAMINAR {
        return 0.0;
    }
    (nu * (y_plus * kappa / (e_wall * y_plus).ln() - 1.0)).max(0.0)
}

/// Friction velocity `C_mu^0.25 k^0.5` at near-wall cells and, when wall
/// functions are enabled, the log-law viscosity in place of `nu_t` there.
pub(crate) fn apply_wall_functions(
    ctx: &FlowContext,
    k: &[f64],
    c_mu: f64,
    kappa: f64,
    e_wall: f64,
    nu_t: &mut [f64],
    u_tau: &mut [f64],
) {
    let geo = ctx.geometry;
    let nu = ctx.fluid.viscosity;
    let c_mu_quarter = c_mu.powf(0.25);
    u_tau.fill(0.0);
    for c in geo.active_cells() {
        if !geo.near_wall[c] {
            continue;
        }
        u_tau[c] = c_mu_quarter * k[c].max(0.0).sqrt();
        if ctx.settings.use_wall_functions {
            let y_plus = u_tau[c] * geo.wall_distance[c] / nu;
            nu_t[c] = wall_viscosity(nu, y_plus, kappa, e_wall);
        }
    }
}
