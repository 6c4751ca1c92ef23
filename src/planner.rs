//! Complete pipeline: SCP followed by the optional shooting refinement.

use std::time::{Duration, Instant};

use tracing::info;

use crate::convex::ConvexSolver;
use crate::scp_problem::ScpProblem;
use crate::shooting::{ShootingProblem, ShootingSolution};
use crate::solution::ScpSolution;
use crate::trajectory::Trajectory;

/// Result of the pipeline.
#[derive(Debug, Clone)]
pub struct TrajectoryOptimizationSolution {
    /// Shooting trajectory if shooting converged without violating path constraints,
    /// the SCP trajectory otherwise.
    pub trajectory: Trajectory,
    pub scp: ScpSolution,
    pub shooting: Option<ShootingSolution>,
    /// The returned trajectory comes from the shooting refinement
    pub refined: bool,
    pub total_time: Duration,
}

impl TrajectoryOptimizationSolution {
    pub fn successful(&self) -> bool {
        self.scp.successful()
    }
}

/// Runs SCP and, if enabled and SCP succeeded, shooting on an [`ScpProblem`].
pub struct TrajectoryOptimizer<S: ConvexSolver> {
    solver: S,
}

impl<S: ConvexSolver> TrajectoryOptimizer<S> {
    pub fn new(solver: S) -> Self {
        TrajectoryOptimizer { solver }
    }

    pub fn solver(&self) -> &S {
        &self.solver
    }

    /// Plans from the initial guess of the problem.
    pub fn solve(&self, problem: &ScpProblem) -> TrajectoryOptimizationSolution {
        self.solve_from(problem, problem.initial_guess())
    }

    /// Plans from a given initial trajectory.
    pub fn solve_from(&self, problem: &ScpProblem, initial: Trajectory) -> TrajectoryOptimizationSolution {
        let start = Instant::now();
        let scp = crate::iteration::ScpIteration::new(problem, &self.solver).run(initial);

        let shooting = (problem.param().shooting.enabled && scp.successful())
            .then(|| ShootingProblem::from_scp(problem, &scp).solve());

        let refined = shooting.as_ref().filter(|s| {
            s.converged
                && problem.path_violation(scp.constraints(), &s.trajectory)
                    <= problem.param().violation_tolerance
        });
        let is_refined = refined.is_some();
        let trajectory = match refined {
            Some(s) => s.trajectory.clone(),
            None => scp.trajectory().clone(),
        };
        if let Some(s) = &shooting {
            info!(
                "Shooting {} after {} iterations, {} trajectory returned",
                s.status,
                s.iterations,
                if refined.is_some() { "shooting" } else { "SCP" }
            );
        }

        TrajectoryOptimizationSolution {
            trajectory,
            scp,
            shooting,
            refined: is_refined,
            total_time: start.elapsed(),
        }
    }
}
