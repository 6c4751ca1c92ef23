use std::sync::Arc;

use nalgebra::DVector;
use parry3d::shape::SharedShape;

use crate::constraints::{ConstraintCategory, ConstraintSlot, Dimensionality};
use crate::dynamics::DoubleIntegrator;
use crate::environment::Environment;
use crate::error::TrajoptError;
use crate::generators::{BoxGenerator, KeepOutGenerator, Target};
use crate::goals::GoalSet;
use crate::problem::{ProblemDefinition, TrajectoryOptimizationProblem};
use crate::robot::Robot;
use crate::scp_problem::ScpProblem;
use crate::tests::test_utils::*;

/// Robot that must pass at least 0.5 m to the side half way, and never accelerate
/// faster than 2 m/s² along x.
struct SideStepper;

impl Robot for SideStepper {
    fn name(&self) -> &str {
        "side_stepper"
    }

    fn collision_shape(&self) -> SharedShape {
        SharedShape::ball(ROBOT_RADIUS as f32)
    }

    fn additional_constraints(&self) -> Vec<(ConstraintSlot, ConstraintCategory)> {
        vec![
            (
                ConstraintSlot::ConvexStateIneq,
                ConstraintCategory::new("side_step", Arc::new(BoxGenerator { target: Target::State }), Dimensionality::PerState)
                    .with_time_indices(vec![5])
                    .with_aux_indices(vec![1])
                    .with_params(vec![0.5, f64::INFINITY]),
            ),
            (
                ConstraintSlot::ConvexControlIneq,
                ConstraintCategory::new("x_acceleration", Arc::new(BoxGenerator { target: Target::Control }), Dimensionality::PerControl)
                    .with_time_indices((0..11).collect())
                    .with_aux_indices(vec![0])
                    .with_params(vec![-2.0, 2.0]),
            ),
        ]
    }
}

#[test]
fn test_robot_constraints_registered_and_honored() {
    let problem = build_problem(
        Arc::new(SideStepper),
        Arc::new(DoubleIntegrator::default()),
        Environment::default(),
        DVector::zeros(6),
        GoalSet::new().with(10.0, rest_goal(10.0)),
        11,
        10.0,
        scp_only(),
    );
    let registry = problem.setup_constraints();
    let side_step = &registry.get(ConstraintSlot::ConvexStateIneq)[0];
    assert_eq!(side_step.name, "side_step");
    // Infinite upper bound produces no row
    assert_eq!(side_step.rows.len(), 1);
    let acceleration = &registry.get(ConstraintSlot::ConvexControlIneq)[0];
    assert_eq!(acceleration.rows.len(), 22);

    let solution = problem.solve(&solver());
    assert!(solution.successful(), "status {}", solution.status());
    let trajectory = solution.trajectory();
    assert!(trajectory.x[(1, 5)] >= 0.5 - 1e-6);
    assert!(trajectory.u.row(0).iter().all(|u| u.abs() <= 2.0 + 1e-6));
    // The side step is not where the robot has to end
    assert!(trajectory.x[(1, 10)].abs() < 1e-5);
}

/// Robot that hands out the families it was built with.
struct Families(Vec<(ConstraintSlot, ConstraintCategory)>);

impl Robot for Families {
    fn name(&self) -> &str {
        "families"
    }

    fn collision_shape(&self) -> SharedShape {
        SharedShape::ball(ROBOT_RADIUS as f32)
    }

    fn additional_constraints(&self) -> Vec<(ConstraintSlot, ConstraintCategory)> {
        self.0.clone()
    }
}

fn setup_with(family: ConstraintCategory) -> crate::error::Result<ScpProblem> {
    let definition = ProblemDefinition::new(
        Arc::new(Families(vec![(ConstraintSlot::ConvexStateIneq, family)])),
        Arc::new(DoubleIntegrator::default()),
        Environment::default(),
        DVector::zeros(6),
        GoalSet::new().with(10.0, rest_goal(10.0)),
    )?;
    let problem = TrajectoryOptimizationProblem::discretize(definition, 11, 10.0, true)?;
    ScpProblem::new(problem, scp_only())
}

fn state_box(aux: Vec<usize>, params: Vec<f64>) -> ConstraintCategory {
    ConstraintCategory::new("broken", Arc::new(BoxGenerator { target: Target::State }), Dimensionality::PerState)
        .with_time_indices(vec![5])
        .with_aux_indices(aux)
        .with_params(params)
}

#[test]
fn test_malformed_robot_constraints_rejected() {
    let rejected = [
        // Lower bound only
        state_box(vec![1], vec![0.5]),
        // Coordinate beyond the state
        state_box(vec![6], vec![0.0, 1.0]),
        // Step beyond the horizon
        state_box(vec![1], vec![0.0, 1.0]).with_time_indices(vec![11]),
        // Keep-out family without a zone
        ConstraintCategory::new("no_zone", Arc::new(KeepOutGenerator), Dimensionality::PerTime)
            .with_time_indices(vec![3])
            .with_params(vec![0.1]),
    ];
    for family in rejected {
        let name = format!("{:?}", family);
        match setup_with(family) {
            Err(TrajoptError::InvalidParameter(_)) => {}
            other => panic!("{} accepted: {:?}", name, other.map(|_| ())),
        }
    }

    let problem = setup_with(state_box(vec![1], vec![0.5, f64::INFINITY])).expect("well formed family");
    assert_eq!(problem.setup_constraints().get(ConstraintSlot::ConvexStateIneq).len(), 1);
}
