//! SCP iteration: convexify, solve, test the step, adapt the trust region.
//!
//! Each iteration regenerates the dynamics and convexified families about the stored
//! trajectory, solves the convex subproblem and compares the true merit reduction of
//! the candidate with the reduction predicted by the convex model. The stored trajectory
//! changes only when the candidate is accepted.
//!
//! Merits are only comparable at equal penalty. Whenever the penalty grows, the stored
//! trajectory is re-priced and recorded as a separate entry, so an accepted record always
//! has a lower merit than the record before it.

use std::time::Instant;

use tracing::{debug, info, warn};

use crate::convex::ConvexSolver;
use crate::params::ScpAlgorithm;
use crate::scp_problem::{Merit, ScpProblem};
use crate::solution::{
    IterationRecord, IterationStatus, ScpHistory, ScpOutcome, ScpSolution, ScpStatus,
};
use crate::trajectory::Trajectory;

/// One SCP run of a problem with a given convex solver.
pub struct ScpIteration<'a> {
    problem: &'a ScpProblem,
    solver: &'a dyn ConvexSolver,
}

impl<'a> ScpIteration<'a> {
    pub fn new(problem: &'a ScpProblem, solver: &'a dyn ConvexSolver) -> Self {
        ScpIteration { problem, solver }
    }

    /// Iterates from the given trajectory until a terminal status is reached.
    pub fn run(&self, initial: Trajectory) -> ScpSolution {
        let start = Instant::now();
        let param = self.problem.param();
        let tr = &param.trust_region;
        let tolerance = param.violation_tolerance;
        let (mut penalty, growth, max_penalty) = param.algorithm.penalty();

        let mut status = ScpStatus::Initialized;
        let mut registry = self.problem.setup_constraints();
        let mut incumbent = self.problem.admit(initial);
        let mut current: Merit = self.problem.evaluate(&registry, &incumbent, penalty);
        let mut radius = tr.initial_radius;
        let mut history = ScpHistory::new();
        let mut dynamics_duals = None;
        let mut iteration = 0;
        let mut failures = 0;
        let mut small_steps = 0;

        info!(
            "SCP ({}, solver {}): {} steps, initial merit {:.6e}, violation {:.3e}",
            param.algorithm.name(),
            self.solver.name(),
            incumbent.steps(),
            current.merit,
            current.violation
        );

        while !status.is_terminal() {
            status = ScpStatus::Iterating;
            if iteration >= param.max_iterations {
                status = ScpStatus::MaxIterExceeded;
                break;
            }
            if let Some(limit) = param.time_limit() {
                if start.elapsed() >= limit {
                    status = ScpStatus::TimeLimitExceeded;
                    break;
                }
            }

            let iteration_radius = radius;
            self.problem.convexify(&mut registry, &incumbent, radius);
            let model = self.problem.build_model(&mut registry, &incumbent, penalty);
            let solution = self.solver.solve(&model);

            if !solution.status.is_success() {
                failures += 1;
                small_steps = 0;
                radius = (radius * tr.shrink_factor).max(tr.min_radius);
                warn!(
                    "Iteration {}: convex solver returned {} ({} of {} retries)",
                    iteration, solution.status, failures, param.max_solver_retries
                );
                history.push(IterationRecord {
                    iteration,
                    j_true: current.merit,
                    j_candidate: f64::NAN,
                    j_model: f64::NAN,
                    solver_status: solution.status,
                    status: IterationStatus::SolverFailed,
                    accepted: false,
                    convergence_measure: f64::INFINITY,
                    trust_radius: iteration_radius,
                    penalty,
                    violation: current.violation,
                    elapsed: start.elapsed(),
                    trajectory: incumbent.clone(),
                });
                iteration += 1;
                if failures >= param.max_solver_retries {
                    status = ScpStatus::Infeasible;
                }
                continue;
            }
            failures = 0;
            dynamics_duals = Some(self.problem.dynamics_duals(&registry, &solution));

            let candidate = self.problem.variables().unpack(&solution.primal);
            let j_model = self.problem.model_merit(&registry, &incumbent, &candidate, penalty);
            let trial = self.problem.evaluate(&registry, &candidate, penalty);
            let predicted = current.merit - j_model;
            let actual = current.merit - trial.merit;
            let scale = current.merit.abs().max(1.0);

            let (iteration_status, measure) = if predicted <= param.convergence_threshold * scale {
                let measure = actual.abs() / scale;
                if measure >= param.convergence_threshold {
                    radius = (radius * tr.shrink_factor).max(tr.min_radius);
                }
                (IterationStatus::Stationary, measure)
            } else {
                let rho = actual / predicted;
                let violation_ok = trial.violation <= tolerance || trial.violation <= current.violation;
                if actual > 0.0 && rho >= tr.rho0 && violation_ok {
                    if rho < tr.rho1 {
                        radius *= tr.shrink_factor;
                    } else if rho > tr.rho2 {
                        radius *= tr.grow_factor;
                    }
                    radius = radius.clamp(tr.min_radius, tr.max_radius);
                    (IterationStatus::Accepted, actual / scale)
                } else {
                    radius = (radius * tr.shrink_factor).max(tr.min_radius);
                    (IterationStatus::Rejected, f64::INFINITY)
                }
            };

            let accepted = iteration_status == IterationStatus::Accepted;
            if accepted {
                incumbent = candidate;
                current = trial;
            }
            if measure < param.convergence_threshold {
                small_steps += 1;
            } else {
                small_steps = 0;
            }

            debug!(
                "Iteration {}: {:?}, merit {:.6e} (candidate {:.6e}, model {:.6e}), violation {:.3e}, radius {:.3e}, penalty {:.1e}",
                iteration,
                iteration_status,
                current.merit,
                trial.merit,
                j_model,
                current.violation,
                iteration_radius,
                penalty
            );
            history.push(IterationRecord {
                iteration,
                j_true: current.merit,
                j_candidate: trial.merit,
                j_model,
                solver_status: solution.status,
                status: iteration_status,
                accepted,
                convergence_measure: measure,
                trust_radius: iteration_radius,
                penalty,
                violation: current.violation,
                elapsed: start.elapsed(),
                trajectory: incumbent.clone(),
            });
            iteration += 1;

            let mut next_penalty = None;
            if small_steps >= param.convergence_count {
                if current.violation <= tolerance {
                    status = ScpStatus::Converged;
                    continue;
                }
                // Converged to a point that still violates: retry with a larger penalty
                let next = penalty * growth;
                if next > max_penalty {
                    status = ScpStatus::Infeasible;
                    continue;
                }
                small_steps = 0;
                next_penalty = Some(next);
            } else if accepted
                && current.violation > tolerance
                && matches!(param.algorithm, ScpAlgorithm::Gusto { .. })
            {
                next_penalty = Some((penalty * growth).min(max_penalty)).filter(|&next| next > penalty);
            }

            if let Some(next) = next_penalty {
                penalty = next;
                current = self.problem.evaluate(&registry, &incumbent, penalty);
                debug!("Penalty increased to {:.1e}, merit {:.6e}", penalty, current.merit);
                history.push(IterationRecord {
                    iteration: iteration - 1,
                    j_true: current.merit,
                    j_candidate: f64::NAN,
                    j_model: f64::NAN,
                    solver_status: solution.status,
                    status: IterationStatus::PenaltyIncreased,
                    accepted: false,
                    convergence_measure: f64::INFINITY,
                    trust_radius: radius,
                    penalty,
                    violation: current.violation,
                    elapsed: start.elapsed(),
                    trajectory: incumbent.clone(),
                });
            }
        }

        let successful = match status {
            ScpStatus::Converged => true,
            ScpStatus::MaxIterExceeded | ScpStatus::TimeLimitExceeded => current.violation <= tolerance,
            _ => false,
        };
        let total_time = start.elapsed();
        info!(
            "SCP finished: {} after {} iterations in {:.3} s, merit {:.6e}, violation {:.3e}",
            status,
            iteration,
            total_time.as_secs_f64(),
            current.merit,
            current.violation
        );

        history.finish(ScpOutcome {
            trajectory: incumbent,
            dynamics_duals,
            constraints: registry,
            status,
            successful,
            penalty,
            violation: current.violation,
            merit: current.merit,
            total_time,
        })
    }
}
