use serde::Deserialize;

use super::geometry::Geometry;
use super::obstacles::CellFlag;
use crate::config::BoundaryConfig;
use crate::error::ConfigError;
use crate::state::{Edge, FieldSet, Grid};

/// Fraction of the domain height used as turbulence length scale when none
/// is configured.
const DEFAULT_LENGTH_SCALE_FRACTION: f64 = 0.07;

/// Field type for boundary condition dispatch.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum FieldType {
    Vx,
    Vy,
    Pressure,
    EddyViscosity,
    /// Transported turbulence quantity with its inlet value and the value
    /// held inside solids.
    Turbulence { inlet: f64, floor: f64 },
}

/// Role of a domain edge.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EdgeKind {
    Inlet,
    Outlet,
    Wall,
}

/// Edge roles derived from the inlet direction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EdgeRoles {
    pub west: EdgeKind,
    pub east: EdgeKind,
    pub south: EdgeKind,
    pub north: EdgeKind,
}

impl EdgeRoles {
    /// Direction in degrees, 0 = flow towards +x, counter-clockwise.
    /// The dominant axis picks the inlet edge, the opposite edge is the
    /// outlet and the remaining two are walls.
    pub fn from_direction(degrees: f64) -> Self {
        let (s, c) = degrees.to_radians().sin_cos();
        use EdgeKind::*;
        if c.abs() >= s.abs() {
            let (west, east) = if c >= 0.0 { (Inlet, Outlet) } else { (Outlet, Inlet) };
            Self { west, east, south: Wall, north: Wall }
        } else {
            let (south, north) = if s > 0.0 { (Inlet, Outlet) } else { (Outlet, Inlet) };
            Self { west: Wall, east: Wall, south, north }
        }
    }

    pub fn kind(&self, edge: Edge) -> EdgeKind {
        match edge {
            Edge::West => self.west,
            Edge::East => self.east,
            Edge::South => self.south,
            Edge::North => self.north,
        }
    }
}

/// Inlet state shared by every boundary application.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct InletConditions {
    pub speed: f64,
    pub u: f64,
    pub v: f64,
    pub k: f64,
    pub epsilon: f64,
    pub omega: f64,
}

impl InletConditions {
    /// `k = 1.5 (I U)^2`, `epsilon = C_mu^0.75 k^1.5 / l`, `omega = k^0.5 / (C_mu^0.25 l)`.
    pub fn new(config: &BoundaryConfig, grid: &Grid, c_mu: f64, floor: f64) -> Self {
        let speed = config.inlet_velocity;
        let (s, c) = config.inlet_direction.to_radians().sin_cos();
        let length = config
            .turbulence_length_scale
            .unwrap_or(DEFAULT_LENGTH_SCALE_FRACTION * grid.height);
        let k = (1.5 * (config.turbulence_intensity * speed).powi(2)).max(floor);
        let epsilon = (c_mu.powf(0.75) * k.powf(1.5) / length).max(floor);
        let omega = (k.sqrt() / (c_mu.powf(0.25) * length)).max(floor);
        Self {
            speed,
            u: speed * c,
            v: speed * s,
            k,
            epsilon,
            omega,
        }
    }
}

/// Velocity samples along one edge, evenly spaced from its first ring cell
/// to its last (south to north, or west to east). Typically taken from a
/// coarser run around the same site.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct EdgeProfile {
    pub u: Vec<f64>,
    pub v: Vec<f64>,
}

impl EdgeProfile {
    /// Linear resampling onto `n` ring cells.
    pub fn resample(&self, n: usize) -> EdgeProfile {
        EdgeProfile {
            u: resample(&self.u, n),
            v: resample(&self.v, n),
        }
    }
}

fn resample(samples: &[f64], n: usize) -> Vec<f64> {
    if samples.len() == n {
        return samples.to_vec();
    }
    match samples {
        [] => return vec![0.0; n],
        [only] => return vec![*only; n],
        _ if n == 1 => return vec![samples[0]; n],
        _ => {}
    }
    let last = (samples.len() - 1) as f64;
    (0..n)
        .map(|k| {
            let t = k as f64 / (n - 1) as f64 * last;
            let lo = (t.floor() as usize).min(samples.len() - 2);
            let w = t - lo as f64;
            samples[lo] * (1.0 - w) + samples[lo + 1] * w
        })
        .collect()
}

/// Optional prescribed inflow per edge. A profile replaces the uniform
/// inlet velocity and may only be given for the inlet edge.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default)]
pub struct EdgeProfiles {
    pub west: Option<EdgeProfile>,
    pub east: Option<EdgeProfile>,
    pub south: Option<EdgeProfile>,
    pub north: Option<EdgeProfile>,
}

impl EdgeProfiles {
    pub fn get(&self, edge: Edge) -> Option<&EdgeProfile> {
        match edge {
            Edge::West => self.west.as_ref(),
            Edge::East => self.east.as_ref(),
            Edge::South => self.south.as_ref(),
            Edge::North => self.north.as_ref(),
        }
    }

    pub fn is_empty(&self) -> bool {
        Edge::ALL.iter().all(|&e| self.get(e).is_none())
    }

    pub fn validate(&self, edges: EdgeRoles) -> Result<(), ConfigError> {
        for edge in Edge::ALL {
            let Some(profile) = self.get(edge) else { continue };
            let key = match edge {
                Edge::West => "boundary_conditions.profiles.west",
                Edge::East => "boundary_conditions.profiles.east",
                Edge::South => "boundary_conditions.profiles.south",
                Edge::North => "boundary_conditions.profiles.north",
            };
            if edges.kind(edge) != EdgeKind::Inlet {
                return Err(ConfigError::invalid(
                    key,
                    format!("{:?} edge", edges.kind(edge)),
                    "profiles are only allowed on the inlet edge",
                ));
            }
            if profile.u.is_empty() || profile.u.len() != profile.v.len() {
                return Err(ConfigError::invalid(
                    key,
                    format!("{} u / {} v samples", profile.u.len(), profile.v.len()),
                    "needs the same non-zero number of u and v samples",
                ));
            }
            if let Some(x) = profile.u.iter().chain(&profile.v).find(|x| !x.is_finite()) {
                return Err(ConfigError::invalid(key, x, "samples must be finite"));
            }
        }
        Ok(())
    }
}

/// Boundary values of one run.
#[derive(Debug, Clone)]
pub struct BoundaryConditions {
    pub edges: EdgeRoles,
    pub inlet: InletConditions,
    /// Prescribed inflow resampled onto the ring, indexed like [`Edge::ALL`].
    prescribed: [Option<EdgeProfile>; 4],
}

impl BoundaryConditions {
    pub fn new(edges: EdgeRoles, inlet: InletConditions) -> Self {
        Self {
            edges,
            inlet,
            prescribed: Default::default(),
        }
    }

    /// Replace the uniform inlet velocity by the given edge profiles.
    /// Profiles must have passed [`EdgeProfiles::validate`].
    pub fn with_profiles(mut self, profiles: &EdgeProfiles, grid: &Grid) -> Self {
        for (slot, edge) in Edge::ALL.into_iter().enumerate() {
            let n = match edge {
                Edge::West | Edge::East => grid.ny,
                Edge::South | Edge::North => grid.nx,
            };
            self.prescribed[slot] = profiles.get(edge).map(|p| p.resample(n));
        }
        self
    }

    /// Inlet velocity at position `along` of `edge`.
    pub fn inlet_velocity(&self, edge: Edge, along: usize) -> (f64, f64) {
        match &self.prescribed[edge as usize] {
            Some(profile) => (profile.u[along], profile.v[along]),
            None => (self.inlet.u, self.inlet.v),
        }
    }

    /// Initial state: inlet velocity in every fluid cell, zero pressure.
    pub fn seed(&self, geo: &Geometry, fields: &mut FieldSet) {
        for c in 0..geo.grid.len() {
            let open = !geo.obstacles.is_solid(c);
            fields.u[c] = if open { self.inlet.u } else { 0.0 };
            fields.v[c] = if open { self.inlet.v } else { 0.0 };
            fields.p[c] = 0.0;
        }
        self.apply(geo, fields);
    }

    /// Re-impose velocity, pressure and eddy-viscosity boundary values.
    pub fn apply(&self, geo: &Geometry, fields: &mut FieldSet) {
        set_bnd(FieldType::Vx, &mut fields.u, geo, self);
        set_bnd(FieldType::Vy, &mut fields.v, geo, self);
        set_bnd(FieldType::Pressure, &mut fields.p, geo, self);
        set_bnd(FieldType::EddyViscosity, &mut fields.nu_t, geo, self);
    }
}

/// Boundary condition handler.
///   - Inlet ring: velocity and turbulence from the inlet state, pressure copied.
///   - Outlet ring: zero gradient for everything.
///   - Wall ring: velocity zero, everything else copied.
///   - Solid cells: velocity and eddy viscosity zero, turbulence at the floor.
///
/// West/East edges take priority over South/North at corners.
pub fn set_bnd(field_type: FieldType, x: &mut [f64], geo: &Geometry, bc: &BoundaryConditions) {
    let (nx, ny) = (geo.grid.nx, geo.grid.ny);
    let g = &geo.grid;

    // Pass 1: South/North edges
    for i in 0..nx {
        x[g.idx(i, 0)] = edge_value(field_type, Edge::South, i, x[g.idx(i, 1)], bc);
        x[g.idx(i, ny - 1)] = edge_value(field_type, Edge::North, i, x[g.idx(i, ny - 2)], bc);
    }

    // Pass 2: West/East edges, overwriting corners
    for j in 0..ny {
        x[g.idx(0, j)] = edge_value(field_type, Edge::West, j, x[g.idx(1, j)], bc);
        x[g.idx(nx - 1, j)] = edge_value(field_type, Edge::East, j, x[g.idx(nx - 2, j)], bc);
    }

    // Pass 3: obstacles
    let solid_value = match field_type {
        FieldType::Vx | FieldType::Vy | FieldType::EddyViscosity => Some(0.0),
        FieldType::Turbulence { floor, .. } => Some(floor),
        FieldType::Pressure => None,
    };
    if let Some(value) = solid_value {
        for (c, flag) in geo.obstacles.flags.iter().enumerate() {
            if *flag == CellFlag::Solid {
                x[c] = value;
            }
        }
    }
}

fn edge_value(field_type: FieldType, edge: Edge, along: usize, interior: f64, bc: &BoundaryConditions) -> f64 {
    match (bc.edges.kind(edge), field_type) {
        (EdgeKind::Inlet, FieldType::Vx) => bc.inlet_velocity(edge, along).0,
        (EdgeKind::Inlet, FieldType::Vy) => bc.inlet_velocity(edge, along).1,
        (EdgeKind::Inlet, FieldType::Turbulence { inlet, .. }) => inlet,
        (EdgeKind::Wall, FieldType::Vx | FieldType::Vy) => 0.0,
        // Zero normal gradient
        _ => interior,
    }
}
