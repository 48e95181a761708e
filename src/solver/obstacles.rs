use serde::Deserialize;

use crate::error::GeometryError;
use crate::state::Grid;

/// Lower bound applied to porosity inside the drag factor.
const POROSITY_FLOOR: f64 = 1e-6;

/// Classification of a grid cell.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum CellFlag {
    #[default]
    Fluid,
    Solid,
    Porous,
}

impl CellFlag {
    /// Rank used to resolve overlaps: the more restrictive flag wins.
    fn rank(self) -> u8 {
        match self {
            CellFlag::Fluid => 0,
            CellFlag::Porous => 1,
            CellFlag::Solid => 2,
        }
    }
}

/// Obstacle description in domain coordinates [m].
#[derive(Clone, Debug, PartialEq, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum Obstacle {
    /// Impermeable axis-aligned footprint.
    Building {
        x_min: f64,
        x_max: f64,
        y_min: f64,
        y_max: f64,
    },
    /// Circular porous canopy.
    Tree {
        x_center: f64,
        y_center: f64,
        radius: f64,
        porosity: f64,
    },
}

impl Obstacle {
    pub fn kind(&self) -> &'static str {
        match self {
            Obstacle::Building { .. } => "building",
            Obstacle::Tree { .. } => "tree",
        }
    }

    fn validate(&self, index: usize, grid: &Grid) -> Result<(), GeometryError> {
        let kind = self.kind();
        let invalid = |reason| GeometryError::InvalidObstacle { index, kind, reason };
        let outside = GeometryError::ObstacleOutsideDomain { index, kind };
        match *self {
            Obstacle::Building { x_min, x_max, y_min, y_max } => {
                if ![x_min, x_max, y_min, y_max].iter().all(|v| v.is_finite()) {
                    return Err(invalid("coordinates must be finite"));
                }
                if x_max <= x_min || y_max <= y_min {
                    return Err(invalid("footprint has no area"));
                }
                if x_max <= 0.0 || x_min >= grid.width || y_max <= 0.0 || y_min >= grid.height {
                    return Err(outside);
                }
            }
            Obstacle::Tree { x_center, y_center, radius, porosity } => {
                if !(x_center.is_finite() && y_center.is_finite()) {
                    return Err(invalid("centre must be finite"));
                }
                if !(radius.is_finite() && radius > 0.0) {
                    return Err(invalid("radius must be positive"));
                }
                if !(0.0..=1.0).contains(&porosity) {
                    return Err(invalid("porosity must lie in [0, 1]"));
                }
                let nearest_x = x_center.clamp(0.0, grid.width);
                let nearest_y = y_center.clamp(0.0, grid.height);
                if (x_center - nearest_x).hypot(y_center - nearest_y) >= radius {
                    return Err(outside);
                }
            }
        }
        Ok(())
    }
}

/// Per-cell obstacle classification produced by rasterising the obstacles.
#[derive(Clone, Debug, PartialEq)]
pub struct ObstacleField {
    pub flags: Vec<CellFlag>,
    /// 1.0 in fluid, 0.0 in solid, the canopy value in porous cells.
    pub porosity: Vec<f64>,
}

impl ObstacleField {
    /// An obstacle-free field.
    pub fn empty(grid: &Grid) -> Self {
        Self {
            flags: vec![CellFlag::Fluid; grid.len()],
            porosity: vec![1.0; grid.len()],
        }
    }

    /// Rasterise obstacles onto the grid.
    ///
    /// Cells overlapping a building become Solid; cells whose centre lies in a
    /// tree canopy become Porous. Overlaps keep the more restrictive flag and
    /// the lower porosity.
    pub fn rasterize(grid: &Grid, obstacles: &[Obstacle]) -> Result<Self, GeometryError> {
        let mut field = Self::empty(grid);
        for (index, obstacle) in obstacles.iter().enumerate() {
            obstacle.validate(index, grid)?;
            match *obstacle {
                Obstacle::Building { x_min, x_max, y_min, y_max } => {
                    for j in 0..grid.ny {
                        let (y0, y1) = (j as f64 * grid.dy, (j + 1) as f64 * grid.dy);
                        if y1 <= y_min || y0 >= y_max {
                            continue;
                        }
                        for i in 0..grid.nx {
                            let (x0, x1) = (i as f64 * grid.dx, (i + 1) as f64 * grid.dx);
                            if x1 > x_min && x0 < x_max {
                                field.mark(grid.idx(i, j), CellFlag::Solid, 0.0);
                            }
                        }
                    }
                }
                Obstacle::Tree { x_center, y_center, radius, porosity } => {
                    let mut covered = false;
                    for j in 0..grid.ny {
                        for i in 0..grid.nx {
                            let (cx, cy) = grid.cell_center(i, j);
                            if (cx - x_center).hypot(cy - y_center) <= radius {
                                field.mark(grid.idx(i, j), CellFlag::Porous, porosity);
                                covered = true;
                            }
                        }
                    }
                    // Canopy smaller than a cell: mark the cell holding its
                    // centre, or the nearest edge cell when the centre lies
                    // just outside the domain.
                    if !covered {
                        let x = x_center.clamp(0.0, grid.width);
                        let y = y_center.clamp(0.0, grid.height);
                        if let Some((i, j)) = grid.cell_at(x, y) {
                            field.mark(grid.idx(i, j), CellFlag::Porous, porosity);
                        }
                    }
                }
            }
        }
        Ok(field)
    }

    fn mark(&mut self, c: usize, flag: CellFlag, porosity: f64) {
        if flag.rank() > self.flags[c].rank() {
            self.flags[c] = flag;
            self.porosity[c] = porosity;
        } else if flag == self.flags[c] {
            self.porosity[c] = self.porosity[c].min(porosity);
        }
    }

    #[inline]
    pub fn is_solid(&self, c: usize) -> bool {
        self.flags[c] == CellFlag::Solid
    }

    /// Drag factor `(1 - phi) / phi`; zero in fluid and fully open cells.
    #[inline]
    pub fn drag_factor(&self, c: usize) -> f64 {
        if self.flags[c] != CellFlag::Porous {
            return 0.0;
        }
        let phi = self.porosity[c].max(POROSITY_FLOOR);
        (1.0 - phi) / phi
    }

    pub fn count(&self, flag: CellFlag) -> usize {
        self.flags.iter().filter(|&&f| f == flag).count()
    }
}
