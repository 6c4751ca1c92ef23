//! Trajectory optimization by sequential convex programming (SCP)
//!
//! The robot is planned as a discretized trajectory of states and controls, optionally with a
//! free final time. Collision avoidance and other nonconvex constraints are linearized about the
//! current trajectory, the resulting convex subproblem is solved with
//! [Clarabel](https://github.com/oxfordcontrol/Clarabel.rs), and the step is accepted or rejected
//! by comparing the true merit reduction with the one predicted by the convex model. A trust
//! region keeps the linearizations valid and adapts to their accuracy.
//!
//! # Features
//!
//! - Scene made of axis aligned boxes and spheres: keep-in zones the robot must stay inside
//!   (their union), keep-out zones and obstacles it must avoid.
//! - Goals on any subset of state coordinates at any time, either exact points or regions.
//! - Fixed or free final time.
//! - Two penalty strategies: TrajOpt (penalty raised between convexification loops) and
//!   GuSTO (penalty raised after accepted steps that still violate constraints).
//! - Every constraint family lives in one of eighteen registry slots that tell whether it is
//!   convex, nonconvex, a boundary condition, a trust region, equality or inequality.
//!   Robots may contribute their own families.
//! - Optional indirect shooting refinement seeded with the dual variables of the dynamics.
//! - Scene and parameters can be read from YAML (feature `allow_filesystem`, default).
//!
//! ## Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use nalgebra::DVector;
//! use rs_scp_trajopt::clarabel_solver::ClarabelSolver;
//! use rs_scp_trajopt::dynamics::DoubleIntegrator;
//! use rs_scp_trajopt::environment::{Environment, SceneData, ZoneData};
//! use rs_scp_trajopt::goals::{Goal, GoalRegion, GoalSet};
//! use rs_scp_trajopt::params::ScpParam;
//! use rs_scp_trajopt::planner::TrajectoryOptimizer;
//! use rs_scp_trajopt::problem::{ProblemDefinition, TrajectoryOptimizationProblem};
//! use rs_scp_trajopt::robot::FreeFlyer;
//! use rs_scp_trajopt::scp_problem::ScpProblem;
//!
//! let scene = SceneData {
//!     keep_in: vec![ZoneData::Box { min: [-1.0, -5.0, -5.0], max: [11.0, 5.0, 5.0] }],
//!     keep_out: vec![ZoneData::Sphere { center: [5.0, 0.0, 0.0], radius: 1.0 }],
//!     obstacles: vec![],
//! };
//! let goal = GoalRegion::point(DVector::from_vec(vec![10.0, 0.0, 0.0, 0.0, 0.0, 0.0])).unwrap();
//! let definition = ProblemDefinition::new(
//!     Arc::new(FreeFlyer::unlimited(0.2)),
//!     Arc::new(DoubleIntegrator::default()),
//!     Environment::build(&scene).unwrap(),
//!     DVector::zeros(6),
//!     GoalSet::new().with(10.0, Goal::new((0..6).collect(), goal).unwrap()),
//! ).unwrap();
//! let problem = TrajectoryOptimizationProblem::discretize(definition, 21, 10.0, true).unwrap();
//! let problem = ScpProblem::new(problem, ScpParam::default()).unwrap();
//! let solution = TrajectoryOptimizer::new(ClarabelSolver::default()).solve(&problem);
//! println!("{} after {} iterations", solution.scp.status(), solution.scp.iterations());
//! ```

pub mod error;

#[path = "utils/utils.rs"]
pub mod utils;

pub mod dynamics;
pub mod robot;
pub mod goals;
pub mod trajectory;
pub mod params;
pub mod problem;
pub mod constraints;
pub mod planner;

#[path = "scene/environment.rs"]
pub mod environment;

#[path = "scene/distance_traits.rs"]
pub mod distance_traits;

#[path = "scene/workspace.rs"]
pub mod workspace;

#[cfg(feature = "allow_filesystem")]
#[path = "scene/scene_from_file.rs"]
pub mod scene_from_file;

#[path = "scp/convex.rs"]
pub mod convex;

#[path = "scp/clarabel_solver.rs"]
pub mod clarabel_solver;

#[path = "scp/generators.rs"]
pub mod generators;

#[path = "scp/scp_problem.rs"]
pub mod scp_problem;

#[path = "scp/iteration.rs"]
pub mod iteration;

#[path = "scp/solution.rs"]
pub mod solution;

#[path = "scp/shooting.rs"]
pub mod shooting;

#[cfg(test)]
#[cfg(feature = "allow_filesystem")]
mod tests;
