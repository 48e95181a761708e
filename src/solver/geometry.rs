use super::boundary::{EdgeKind, EdgeRoles};
use super::obstacles::ObstacleField;
use crate::state::Grid;

/// Face direction of a cell.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Dir {
    East,
    West,
    North,
    South,
}

impl Dir {
    pub const ALL: [Dir; 4] = [Dir::East, Dir::West, Dir::North, Dir::South];

    /// Face length per metre depth.
    #[inline]
    pub fn face_area(self, grid: &Grid) -> f64 {
        match self {
            Dir::East | Dir::West => grid.dy,
            Dir::North | Dir::South => grid.dx,
        }
    }

    /// Distance between the cell centre and the neighbour centre.
    #[inline]
    pub fn spacing(self, grid: &Grid) -> f64 {
        match self {
            Dir::East | Dir::West => grid.dx,
            Dir::North | Dir::South => grid.dy,
        }
    }
}

/// What lies across a face of an interior cell.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Link {
    /// Another solved cell.
    Interior(usize),
    /// Inlet ring cell (Dirichlet).
    Inlet(usize),
    /// Outlet ring cell (zero gradient).
    Outlet(usize),
    /// Wall ring cell or solid obstacle cell (no-slip).
    Wall(usize),
}

/// Grid, obstacles and edge roles of one run, plus derived wall data.
#[derive(Clone, Debug)]
pub struct Geometry {
    pub grid: Grid,
    pub obstacles: ObstacleField,
    pub edges: EdgeRoles,
    /// Distance from each cell centre to the nearest wall cell centre [m].
    pub wall_distance: Vec<f64>,
    /// Solved cells sharing a face with a wall or solid cell.
    pub near_wall: Vec<bool>,
}

impl Geometry {
    pub fn new(grid: Grid, obstacles: ObstacleField, edges: EdgeRoles) -> Self {
        let mut geometry = Self {
            wall_distance: Vec::new(),
            near_wall: vec![false; grid.len()],
            grid,
            obstacles,
            edges,
        };
        let walls: Vec<bool> = (0..geometry.grid.len()).map(|c| geometry.is_wall_cell(c)).collect();
        geometry.wall_distance = wall_distance(&geometry.grid, &walls);
        for c in geometry.grid.interior() {
            if geometry.is_active(c) {
                geometry.near_wall[c] = Dir::ALL
                    .iter()
                    .any(|&d| matches!(geometry.link(c, d), Link::Wall(_)));
            }
        }
        geometry
    }

    /// Interior, non-solid cell: carries its own equations.
    #[inline]
    pub fn is_active(&self, c: usize) -> bool {
        !self.grid.is_ring(c) && !self.obstacles.is_solid(c)
    }

    /// Solid cell or wall-edge ring cell.
    pub fn is_wall_cell(&self, c: usize) -> bool {
        if self.obstacles.is_solid(c) {
            return true;
        }
        self.grid
            .edge_of(c)
            .is_some_and(|edge| self.edges.kind(edge) == EdgeKind::Wall)
    }

    /// Neighbour index of an interior cell.
    #[inline]
    pub fn neighbor(&self, c: usize, dir: Dir) -> usize {
        match dir {
            Dir::East => c + 1,
            Dir::West => c - 1,
            Dir::North => c + self.grid.nx,
            Dir::South => c - self.grid.nx,
        }
    }

    /// Classify the face of interior cell `c` in direction `dir`.
    pub fn link(&self, c: usize, dir: Dir) -> Link {
        let n = self.neighbor(c, dir);
        if self.obstacles.is_solid(n) {
            return Link::Wall(n);
        }
        match self.grid.edge_of(n) {
            None => Link::Interior(n),
            Some(edge) => match self.edges.kind(edge) {
                EdgeKind::Inlet => Link::Inlet(n),
                EdgeKind::Outlet => Link::Outlet(n),
                EdgeKind::Wall => Link::Wall(n),
            },
        }
    }

    /// Neighbour value for gradient stencils; solid neighbours mirror the cell.
    #[inline]
    pub fn neighbor_value(&self, field: &[f64], c: usize, dir: Dir) -> f64 {
        let n = self.neighbor(c, dir);
        if self.obstacles.is_solid(n) { field[c] } else { field[n] }
    }

    /// Mass flux leaving cell `c` through its `dir` face.
    #[inline]
    pub fn outward_flux(&self, flux_x: &[f64], flux_y: &[f64], c: usize, dir: Dir) -> f64 {
        match dir {
            Dir::East => flux_x[c],
            Dir::West => -flux_x[c - 1],
            Dir::North => flux_y[c],
            Dir::South => -flux_y[c - self.grid.nx],
        }
    }

    /// Active cell indices.
    pub fn active_cells(&self) -> impl Iterator<Item = usize> + '_ {
        self.grid.interior().filter(move |&c| !self.obstacles.is_solid(c))
    }
}

/// Euclidean distance to the nearest wall cell centre.
///
/// Two raster passes propagate the nearest wall seed between neighbours
/// (dead-reckoning distance transform). Without any wall the domain
/// diagonal is used everywhere.
pub fn wall_distance(grid: &Grid, walls: &[bool]) -> Vec<f64> {
    let (nx, ny) = (grid.nx, grid.ny);
    let mut seed: Vec<Option<(usize, usize)>> = vec![None; grid.len()];
    let mut dist = vec![f64::INFINITY; grid.len()];
    for (c, &wall) in walls.iter().enumerate() {
        if wall {
            seed[c] = Some(grid.coords(c));
            dist[c] = 0.0;
        }
    }
    if seed.iter().all(Option::is_none) {
        return vec![grid.width.hypot(grid.height); grid.len()];
    }

    let measure = |i: usize, j: usize, s: (usize, usize)| {
        let di = (i as f64 - s.0 as f64) * grid.dx;
        let dj = (j as f64 - s.1 as f64) * grid.dy;
        di.hypot(dj)
    };
    let mut relax = |i: usize, j: usize, di: isize, dj: isize| {
        let (ni, nj) = (i as isize + di, j as isize + dj);
        if ni < 0 || nj < 0 || ni >= nx as isize || nj >= ny as isize {
            return;
        }
        let n = grid.idx(ni as usize, nj as usize);
        if let Some(s) = seed[n] {
            let d = measure(i, j, s);
            let c = grid.idx(i, j);
            if d < dist[c] {
                dist[c] = d;
                seed[c] = Some(s);
            }
        }
    };

    // Forward pass
    for j in 0..ny {
        for i in 0..nx {
            for (di, dj) in [(-1, 0), (0, -1), (-1, -1), (1, -1)] {
                relax(i, j, di, dj);
            }
        }
        for i in (0..nx).rev() {
            relax(i, j, 1, 0);
        }
    }
    // Backward pass
    for j in (0..ny).rev() {
        for i in (0..nx).rev() {
            for (di, dj) in [(1, 0), (0, 1), (1, 1), (-1, 1)] {
                relax(i, j, di, dj);
            }
        }
        for i in 0..nx {
            relax(i, j, -1, 0);
        }
    }
    dist
}
