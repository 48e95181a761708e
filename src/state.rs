//! Grid geometry and the flow fields stored on it.

use crate::error::GeometryError;

/// Fast index for cells where x,y are guaranteed in-bounds.
#[inline]
pub fn idx(x: usize, y: usize, nx: usize) -> usize {
    y * nx + x
}

/// One of the four domain edges.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Edge {
    West,
    East,
    South,
    North,
}

impl Edge {
    pub const ALL: [Edge; 4] = [Edge::West, Edge::East, Edge::South, Edge::North];
}

/// Uniform structured grid over a rectangular domain.
///
/// Cell `(i, j)` covers `[i*dx, (i+1)*dx] x [j*dy, (j+1)*dy]`. The outermost
/// ring of cells holds boundary values; everything inside it is solved for.
#[derive(Clone, Debug, PartialEq)]
pub struct Grid {
    pub nx: usize,
    pub ny: usize,
    pub width: f64,
    pub height: f64,
    pub dx: f64,
    pub dy: f64,
}

impl Grid {
    pub fn new(width: f64, height: f64, nx: usize, ny: usize) -> Result<Self, GeometryError> {
        if !(width.is_finite() && width > 0.0) {
            return Err(GeometryError::NonPositiveExtent { axis: "width", value: width });
        }
        if !(height.is_finite() && height > 0.0) {
            return Err(GeometryError::NonPositiveExtent { axis: "height", value: height });
        }
        if nx < 3 {
            return Err(GeometryError::TooFewCells { axis: "nx", cells: nx });
        }
        if ny < 3 {
            return Err(GeometryError::TooFewCells { axis: "ny", cells: ny });
        }
        Ok(Self {
            nx,
            ny,
            width,
            height,
            dx: width / nx as f64,
            dy: height / ny as f64,
        })
    }

    /// Total number of cells.
    pub fn len(&self) -> usize {
        self.nx * self.ny
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    #[inline]
    pub fn idx(&self, i: usize, j: usize) -> usize {
        idx(i, j, self.nx)
    }

    /// Inverse of [`Grid::idx`].
    #[inline]
    pub fn coords(&self, c: usize) -> (usize, usize) {
        (c % self.nx, c / self.nx)
    }

    pub fn cell_volume(&self) -> f64 {
        self.dx * self.dy
    }

    pub fn cell_center(&self, i: usize, j: usize) -> (f64, f64) {
        ((i as f64 + 0.5) * self.dx, (j as f64 + 0.5) * self.dy)
    }

    /// Cell containing the physical point, or `None` outside the domain.
    pub fn cell_at(&self, x: f64, y: f64) -> Option<(usize, usize)> {
        if !(0.0..=self.width).contains(&x) || !(0.0..=self.height).contains(&y) {
            return None;
        }
        let i = ((x / self.dx) as usize).min(self.nx - 1);
        let j = ((y / self.dy) as usize).min(self.ny - 1);
        Some((i, j))
    }

    /// Whether the cell belongs to the boundary ring.
    #[inline]
    pub fn is_ring(&self, c: usize) -> bool {
        let (i, j) = self.coords(c);
        i == 0 || j == 0 || i == self.nx - 1 || j == self.ny - 1
    }

    /// Edge owning a ring cell. West/East win at corners.
    pub fn edge_of(&self, c: usize) -> Option<Edge> {
        let (i, j) = self.coords(c);
        if i == 0 {
            Some(Edge::West)
        } else if i == self.nx - 1 {
            Some(Edge::East)
        } else if j == 0 {
            Some(Edge::South)
        } else if j == self.ny - 1 {
            Some(Edge::North)
        } else {
            None
        }
    }

    /// Interior (non-ring) cell indices in row-major order.
    pub fn interior(&self) -> impl Iterator<Item = usize> + '_ {
        (1..self.ny - 1).flat_map(move |j| (1..self.nx - 1).map(move |i| self.idx(i, j)))
    }
}

/// Primary flow variables of one run.
///
/// `flux_x[c]` is the mass flux [kg/s per metre depth] through the east face
/// of cell `c`, `flux_y[c]` through its north face; positive along +x / +y.
#[derive(Clone, Debug, PartialEq)]
pub struct FieldSet {
    pub u: Vec<f64>,
    pub v: Vec<f64>,
    pub p: Vec<f64>,
    pub nu_t: Vec<f64>,
    pub flux_x: Vec<f64>,
    pub flux_y: Vec<f64>,
}

impl FieldSet {
    pub fn new(grid: &Grid) -> Self {
        let n = grid.len();
        Self {
            u: vec![0.0; n],
            v: vec![0.0; n],
            p: vec![0.0; n],
            nu_t: vec![0.0; n],
            flux_x: vec![0.0; n],
            flux_y: vec![0.0; n],
        }
    }

    /// Name of the first field holding a NaN or infinity.
    pub fn first_non_finite(&self) -> Option<&'static str> {
        let named: [(&'static str, &[f64]); 6] = [
            ("u", &self.u),
            ("v", &self.v),
            ("p", &self.p),
            ("nu_t", &self.nu_t),
            ("flux_x", &self.flux_x),
            ("flux_y", &self.flux_y),
        ];
        named
            .into_iter()
            .find(|(_, values)| values.iter().any(|x| !x.is_finite()))
            .map(|(name, _)| name)
    }
}
