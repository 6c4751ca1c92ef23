use std::sync::Arc;

use approx::assert_relative_eq;
use nalgebra::DVector;

use crate::constraints::ConstraintSlot;
use crate::dynamics::{DoubleIntegrator, Unicycle3d};
use crate::environment::{Environment, ZoneData};
use crate::goals::GoalSet;
use crate::params::{ScpAlgorithm, ScpParam};
use crate::planner::TrajectoryOptimizer;
use crate::robot::FreeFlyer;
use crate::scp_problem::ScpProblem;
use crate::solution::{IterationStatus, ScpSolution, ScpStatus};
use crate::tests::test_utils::*;

#[test]
fn test_linear_problem_converges() {
    let problem = linear_problem(Environment::default(), 11, scp_only());
    let solution = problem.solve(&solver());

    assert_eq!(solution.status(), ScpStatus::Converged);
    assert!(solution.successful());
    assert!(solution.violation() <= problem.param().violation_tolerance);
    assert!(solution.iterations() >= problem.param().convergence_count);
    assert_eq!(solution.records()[0].status, IterationStatus::Accepted);

    let trajectory = solution.trajectory();
    let last = trajectory.state(trajectory.steps() - 1);
    assert_relative_eq!(last, vector(&[10.0, 0.0, 0.0, 0.0, 0.0, 0.0]), epsilon = 1e-5);
    assert_relative_eq!(trajectory.state(0), DVector::zeros(6), epsilon = 1e-6);
    assert!(euler_defect(trajectory, &DoubleIntegrator::default()) <= problem.param().violation_tolerance);

    // Accelerate first, brake later
    assert!(trajectory.u[(0, 0)] > 0.0);
    assert!(trajectory.u[(0, trajectory.steps() - 2)] < 0.0);
    assert!(solution.dynamics_duals().is_some());
}

/// Every accepted record lowers the merit of the record before it and changes the stored
/// trajectory. Any other record keeps the trajectory.
fn assert_monotonic_acceptance(problem: &ScpProblem, solution: &ScpSolution) {
    let records = solution.records();
    assert!(!records.is_empty());
    for pair in records.windows(2) {
        let (previous, record) = (&pair[0], &pair[1]);
        if record.accepted {
            assert!(
                record.j_true < previous.j_true,
                "accepted iteration {} has merit {} (penalty {}), previous {} (penalty {})",
                record.iteration,
                record.j_true,
                record.penalty,
                previous.j_true,
                previous.penalty
            );
            assert_eq!(record.penalty, previous.penalty);
            assert_ne!(record.trajectory, previous.trajectory);
        } else {
            assert_ne!(record.status, IterationStatus::Accepted);
            assert_eq!(record.trajectory, previous.trajectory);
        }
    }
    let tr = &problem.param().trust_region;
    for record in records {
        assert!(record.trust_radius >= tr.min_radius && record.trust_radius <= tr.max_radius);
    }
}

fn penalty_increases(solution: &ScpSolution) -> usize {
    solution
        .records()
        .iter()
        .filter(|r| r.status == IterationStatus::PenaltyIncreased)
        .count()
}

#[test]
fn test_accepted_merit_decreases() {
    let problem = linear_problem(Environment::default(), 15, scp_only());
    let solution = problem.solve(&solver());
    assert!(solution.successful());
    assert_monotonic_acceptance(&problem, &solution);
}

#[test]
fn test_accepted_merit_decreases_across_gusto_penalties() {
    let param = ScpParam {
        algorithm: ScpAlgorithm::Gusto {
            initial_penalty: 1.0,
            penalty_growth: 2.0,
            max_penalty: 1e4,
        },
        ..scp_only()
    };
    let problem = linear_problem(Environment::default(), 11, param);
    let solution = problem.solve(&solver());
    assert!(solution.successful(), "status {}", solution.status());
    // The initial guess violates the dynamics, the first accepted step grows the penalty
    assert!(penalty_increases(&solution) > 0);
    assert_monotonic_acceptance(&problem, &solution);
}

#[test]
fn test_accepted_merit_decreases_across_trajopt_penalties() {
    let environment = Environment::default()
        .add_obstacles(&[ZoneData::Sphere { center: [5.0, 0.3, 0.0], radius: 1.0 }])
        .expect("obstacle");
    let param = ScpParam {
        algorithm: ScpAlgorithm::TrajOpt {
            initial_penalty: 0.01,
            penalty_growth: 10.0,
            max_penalty: 1e6,
        },
        max_iterations: 100,
        ..scp_only()
    };
    let problem = linear_problem(environment, 21, param);
    let solution = problem.solve(&solver());
    // Too small a penalty first settles inside the obstacle
    assert!(penalty_increases(&solution) > 0);
    assert_monotonic_acceptance(&problem, &solution);

    // Each penalty increase re-prices the trajectory of the record before it
    let records = solution.records();
    for pair in records.windows(2) {
        if pair[1].status == IterationStatus::PenaltyIncreased {
            assert!(pair[1].penalty > pair[0].penalty);
            assert_eq!(pair[1].iteration, pair[0].iteration);
        }
    }
    assert_eq!(
        solution.iterations(),
        records.len() - penalty_increases(&solution)
    );
}

#[test]
fn test_registry_complete_after_run() {
    let problem = linear_problem(Environment::default(), 11, scp_only());
    let solution = problem.solve(&solver());
    let registry = solution.constraints();
    let count = |slot| registry.get(slot).len();

    assert_eq!(count(ConstraintSlot::Dynamics), 1);
    // Initial state and the goal at the final step
    assert_eq!(count(ConstraintSlot::ConvexBoundaryConditionEq), 2);
    assert_eq!(count(ConstraintSlot::StateTrustRegionIneq), 1);
    assert_eq!(count(ConstraintSlot::ControlTrustRegionIneq), 1);
    // Pinned final time has no trust region and no bounds
    assert_eq!(count(ConstraintSlot::FinalTimeTrustRegionIneq), 0);
    assert_eq!(count(ConstraintSlot::ConvexControlIneq), 0);
    // No zones, nothing nonconvex
    assert_eq!(count(ConstraintSlot::NonconvexStateIneq), 0);
    assert_eq!(count(ConstraintSlot::NonconvexStateConvexifiedIneq), 0);

    let dynamics = &registry.get(ConstraintSlot::Dynamics)[0];
    assert_eq!(dynamics.rows.len(), 10 * 6);
    assert_eq!(dynamics.slack_vars.len(), 2 * dynamics.rows.len());
}

#[test]
fn test_pinned_final_time() {
    let problem = linear_problem(Environment::default(), 11, scp_only());
    assert!(problem.variables().tf().is_none());
    let solution = problem.solve(&solver());
    assert_eq!(solution.trajectory().tf, 10.0);
    for record in solution.records() {
        assert_eq!(record.trajectory.tf, 10.0);
    }
}

#[test]
fn test_free_final_time_within_bounds() {
    let param = ScpParam {
        fixed_final_time: false,
        final_time_bounds: (8.5, 12.0),
        max_iterations: 80,
        ..scp_only()
    };
    let problem = linear_problem(Environment::default(), 11, param);
    assert!(problem.variables().tf().is_some());
    let solution = problem.solve(&solver());

    let registry = solution.constraints();
    assert_eq!(registry.get(ConstraintSlot::FinalTimeTrustRegionIneq).len(), 1);
    let names: Vec<&str> = registry
        .get(ConstraintSlot::ConvexControlIneq)
        .iter()
        .map(|c| c.name.as_str())
        .collect();
    assert_eq!(names, vec!["final_time_bounds"]);

    let tf = solution.trajectory().tf;
    assert!(tf >= 8.5 - 1e-6 && tf <= 12.0 + 1e-6, "final time {} out of bounds", tf);
    // Time is charged, so it never grows beyond the guess
    assert!(tf <= 10.0 + 1e-6);
}

#[test]
fn test_gusto_converges() {
    let param = ScpParam {
        algorithm: ScpAlgorithm::Gusto {
            initial_penalty: 1.0,
            penalty_growth: 2.0,
            max_penalty: 1e4,
        },
        ..scp_only()
    };
    let problem = linear_problem(Environment::default(), 11, param);
    let solution = problem.solve(&solver());
    assert!(solution.successful());
    assert!(solution.violation() <= problem.param().violation_tolerance);
    let penalties: Vec<f64> = solution.records().iter().map(|r| r.penalty).collect();
    assert!(penalties.windows(2).all(|p| p[1] >= p[0]));
    assert!(solution.penalty() <= 1e4);
}

#[test]
fn test_max_iterations() {
    let param = ScpParam {
        max_iterations: 1,
        ..scp_only()
    };
    let problem = linear_problem(Environment::default(), 11, param);
    let solution = problem.solve(&solver());
    assert_eq!(solution.status(), ScpStatus::MaxIterExceeded);
    assert_eq!(solution.iterations(), 1);
}

#[test]
fn test_wrong_initial_trajectory_replaced() {
    let problem = linear_problem(Environment::default(), 11, scp_only());
    let admitted = problem.admit(crate::trajectory::Trajectory::zeros(6, 3, 5, 10.0));
    assert_eq!(admitted, problem.initial_guess());
}

#[test]
fn test_unicycle_reaches_goal() {
    let goal = point_goal(vec![0, 1, 2], &[4.0, 0.0, 1.0]);
    let problem = build_problem(
        Arc::new(FreeFlyer::unlimited(ROBOT_RADIUS)),
        Arc::new(Unicycle3d),
        Environment::default(),
        DVector::zeros(4),
        GoalSet::new().with(8.0, goal),
        17,
        8.0,
        ScpParam {
            max_iterations: 100,
            ..scp_only()
        },
    );
    let solution = problem.solve(&solver());
    assert!(solution.successful(), "status {}", solution.status());

    let trajectory = solution.trajectory();
    let last = trajectory.state(trajectory.steps() - 1);
    assert_relative_eq!(last[0], 4.0, epsilon = 1e-5);
    assert_relative_eq!(last[1], 0.0, epsilon = 1e-5);
    assert_relative_eq!(last[2], 1.0, epsilon = 1e-5);
    // Euler defect is part of the L1 violation
    assert!(euler_defect(trajectory, &Unicycle3d) <= problem.param().violation_tolerance);
}

#[test]
fn test_converges_from_perturbed_guesses() {
    use rand::rngs::StdRng;
    use rand::{Rng, SeedableRng};

    let problem = linear_problem(Environment::default(), 11, scp_only());
    let optimizer = TrajectoryOptimizer::new(solver());
    let mut rng = StdRng::seed_from_u64(7);
    for _ in 0..5 {
        let mut guess = problem.initial_guess();
        let steps = guess.steps();
        for k in 1..steps - 1 {
            for i in 0..guess.x_dim() {
                guess.x[(i, k)] += rng.gen_range(-3.0..3.0);
            }
        }
        for k in 0..steps {
            for i in 0..guess.u_dim() {
                guess.u[(i, k)] = rng.gen_range(-1.0..1.0);
            }
        }
        let solution = optimizer.solve_from(&problem, guess);
        assert!(solution.scp.converged(), "status {}", solution.scp.status());
        assert!(solution.scp.iterations() <= 15, "{} iterations", solution.scp.iterations());
        let last = solution.trajectory.state(solution.trajectory.steps() - 1);
        assert_relative_eq!(last, vector(&[10.0, 0.0, 0.0, 0.0, 0.0, 0.0]), epsilon = 1e-5);
    }
}

#[test]
fn test_guess_moved_onto_boundary_conditions() {
    let problem = linear_problem(Environment::default(), 11, scp_only());
    let mut guess = problem.initial_guess();
    let last = guess.steps() - 1;
    guess.x.set_column(0, &vector(&[2.0, -1.0, 0.5, 1.0, 0.0, 0.0]));
    guess.x.set_column(last, &vector(&[30.0, 8.0, -4.0, 2.0, 2.0, 2.0]));
    guess.tf = 25.0;

    let admitted = problem.admit(guess.clone());
    assert_eq!(admitted.state(0), DVector::zeros(6));
    assert_eq!(admitted.state(last), vector(&[10.0, 0.0, 0.0, 0.0, 0.0, 0.0]));
    assert_eq!(admitted.tf, 10.0);
    // Interior steps are left alone
    assert_eq!(admitted.state(5), guess.state(5));

    let solution = TrajectoryOptimizer::new(solver()).solve_from(&problem, guess);
    assert!(solution.scp.converged(), "status {}", solution.scp.status());
}
