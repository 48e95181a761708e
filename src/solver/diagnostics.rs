use super::geometry::{Dir, Geometry};
use crate::state::FieldSet;

/// Squared strain-rate magnitude `S^2 = 2 S_ij S_ij` at active cells.
///
/// Central differences; wall and solid neighbours contribute their zero
/// velocity, which carries the wall shear into the adjacent cells.
pub fn compute_strain_rate_squared(geo: &Geometry, u: &[f64], v: &[f64], out: &mut [f64]) {
    let g = &geo.grid;
    out.fill(0.0);
    for c in geo.active_cells() {
        let (e, w, n, s) = (c + 1, c - 1, c + g.nx, c - g.nx);
        let dudx = (u[e] - u[w]) / (2.0 * g.dx);
        let dudy = (u[n] - u[s]) / (2.0 * g.dy);
        let dvdx = (v[e] - v[w]) / (2.0 * g.dx);
        let dvdy = (v[n] - v[s]) / (2.0 * g.dy);
        out[c] = 2.0 * (dudx * dudx + dvdy * dvdy) + (dudy + dvdx).powi(2);
    }
}

/// Velocity magnitude per cell.
pub fn compute_velocity_magnitude(u: &[f64], v: &[f64]) -> Vec<f64> {
    u.iter().zip(v).map(|(a, b)| a.hypot(*b)).collect()
}

/// Mean kinetic energy per unit mass over active cells: `0.5 * <u^2 + v^2>`.
pub fn compute_kinetic_energy(geo: &Geometry, u: &[f64], v: &[f64]) -> f64 {
    let mut sum = 0.0;
    let mut count = 0usize;
    for c in geo.active_cells() {
        sum += u[c] * u[c] + v[c] * v[c];
        count += 1;
    }
    if count > 0 { 0.5 * sum / count as f64 } else { 0.0 }
}

/// Largest net volumetric outflow per unit volume [1/s] of the stored face
/// fluxes, over active cells.
pub fn compute_mass_imbalance(geo: &Geometry, fields: &FieldSet, density: f64) -> f64 {
    let volume = geo.grid.cell_volume();
    geo.active_cells()
        .map(|c| {
            let net: f64 = Dir::ALL
                .iter()
                .map(|&d| geo.outward_flux(&fields.flux_x, &fields.flux_y, c, d))
                .sum();
            (net / (density * volume)).abs()
        })
        .fold(0.0, f64::max)
}

/// Arithmetic mean over active cells.
pub fn active_mean(geo: &Geometry, field: &[f64]) -> f64 {
    let (sum, count) = geo
        .active_cells()
        .fold((0.0, 0usize), |(s, n), c| (s + field[c], n + 1));
    if count > 0 { sum / count as f64 } else { 0.0 }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::solver::boundary::EdgeRoles;
    use crate::solver::obstacles::ObstacleField;
    use crate::state::Grid;

    fn geometry() -> Geometry {
        let grid = Grid::new(20.0, 10.0, 10, 5).unwrap();
        let obstacles = ObstacleField::empty(&grid);
        Geometry::new(grid, obstacles, EdgeRoles::from_direction(0.0))
    }

    #[test]
    fn test_strain_of_uniform_flow_is_zero() {
        let geo = geometry();
        let u = vec![3.0; geo.grid.len()];
        let v = vec![-1.0; geo.grid.len()];
        let mut s2 = vec![1.0; geo.grid.len()];
        compute_strain_rate_squared(&geo, &u, &v, &mut s2);
        assert!(s2.iter().all(|&x| x == 0.0));
    }

    #[test]
    fn test_strain_of_simple_shear() {
        // u = y gives S^2 = (du/dy)^2 = 1
        let geo = geometry();
        let g = &geo.grid;
        let u: Vec<f64> = (0..g.len()).map(|c| g.cell_center(g.coords(c).0, g.coords(c).1).1).collect();
        let v = vec![0.0; g.len()];
        let mut s2 = vec![0.0; g.len()];
        compute_strain_rate_squared(&geo, &u, &v, &mut s2);
        let c = g.idx(4, 2);
        assert!((s2[c] - 1.0).abs() < 1e-12, "S^2 = {}", s2[c]);
    }

    #[test]
    fn test_velocity_magnitude() {
        let mag = compute_velocity_magnitude(&[3.0, 0.0], &[4.0, -2.0]);
        assert_eq!(mag, vec![5.0, 2.0]);
    }

    #[test]
    fn test_kinetic_energy() {
        let geo = geometry();
        let u = vec![2.0; geo.grid.len()];
        let v = vec![0.0; geo.grid.len()];
        assert!((compute_kinetic_energy(&geo, &u, &v) - 2.0).abs() < 1e-12);
    }

    #[test]
    fn test_uniform_fluxes_are_balanced() {
        let geo = geometry();
        let mut fields = FieldSet::new(&geo.grid);
        fields.flux_x.fill(4.0);
        assert_eq!(compute_mass_imbalance(&geo, &fields, 1.0), 0.0);
        let c = geo.grid.idx(3, 2);
        fields.flux_x[c] = 6.0;
        // net outflow 2 kg/s over a 4 m^2 cell
        assert!((compute_mass_imbalance(&geo, &fields, 1.0) - 0.5).abs() < 1e-12);
    }
}
