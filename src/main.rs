use std::process::ExitCode;

use windfield::config::{self, DEFAULT_CONFIG_FILE};
use windfield::{RunStatus, SimpleSolver, SolverError};

fn main() -> ExitCode {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    // Optional first argument: configuration file
    let path = std::env::args().nth(1).unwrap_or_else(|| DEFAULT_CONFIG_FILE.to_string());
    let config = config::load_or_default(&path);

    let mut solver = match SimpleSolver::new(&config) {
        Ok(solver) => solver,
        Err(e) => {
            log::error!("{e}");
            return ExitCode::FAILURE;
        }
    };

    match solver.run() {
        Ok(result) => {
            let speed = result.velocity_magnitude();
            let max_speed = speed.iter().copied().fold(0.0, f64::max);
            log::info!(
                "{:?} after {} iterations: continuity {:.3e}, max speed {:.2} m/s, mean kinetic energy {:.3} m^2/s^2",
                result.status,
                result.iterations,
                result.final_residual,
                max_speed,
                result.kinetic_energy()
            );
            if result.status == RunStatus::Converged { ExitCode::SUCCESS } else { ExitCode::from(2) }
        }
        Err(SolverError::Diverged(diverged)) => {
            log::error!("{diverged}; last finite state from iteration {}", diverged.snapshot.iteration);
            ExitCode::FAILURE
        }
        Err(e) => {
            log::error!("{e}");
            ExitCode::FAILURE
        }
    }
}
