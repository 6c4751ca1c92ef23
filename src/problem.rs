//! Problem definition and its time discretization

use std::sync::Arc;

use nalgebra::{DMatrix, DVector};

use crate::dynamics::DynamicsModel;
use crate::environment::Environment;
use crate::error::{Result, TrajoptError};
use crate::goals::{Goal, GoalSet};
use crate::robot::Robot;
use crate::trajectory::Trajectory;
use crate::workspace::Workspace;

/// What has to be planned: robot, its dynamics, the scene, the initial state and the goals.
/// Read only after construction.
pub struct ProblemDefinition {
    robot: Arc<dyn Robot>,
    model: Arc<dyn DynamicsModel>,
    environment: Environment,
    x_init: DVector<f64>,
    goals: GoalSet,
}

impl ProblemDefinition {
    pub fn new(
        robot: Arc<dyn Robot>,
        model: Arc<dyn DynamicsModel>,
        environment: Environment,
        x_init: DVector<f64>,
        goals: GoalSet,
    ) -> Result<Self> {
        let x_dim = model.x_dim();
        if x_init.len() != x_dim {
            return Err(TrajoptError::dimension("x_init", x_dim, x_init.len()));
        }
        if let Some((lower, upper)) = robot.control_bounds() {
            if lower.len() != model.u_dim() || upper.len() != model.u_dim() {
                return Err(TrajoptError::dimension(
                    "control bounds",
                    model.u_dim(),
                    lower.len().max(upper.len()),
                ));
            }
        }
        if let Some((lower, upper)) = model.state_bounds() {
            if lower.len() != x_dim || upper.len() != x_dim {
                return Err(TrajoptError::dimension("state bounds", x_dim, lower.len().max(upper.len())));
            }
        }
        if model.control_weights().len() != model.u_dim() {
            return Err(TrajoptError::dimension(
                "control weights",
                model.u_dim(),
                model.control_weights().len(),
            ));
        }
        for (time, goal) in goals.iter() {
            if let Some(index) = goal.indices.iter().find(|&&i| i >= x_dim) {
                return Err(TrajoptError::InvalidParameter(format!(
                    "goal at t = {} targets state coordinate {} but the state has {} coordinates",
                    time, index, x_dim
                )));
            }
            if goal.indices.len() != goal.region.dim() {
                return Err(TrajoptError::dimension("goal region", goal.indices.len(), goal.region.dim()));
            }
        }
        Ok(ProblemDefinition {
            robot,
            model,
            environment,
            x_init,
            goals,
        })
    }

    pub fn robot(&self) -> &dyn Robot {
        self.robot.as_ref()
    }

    pub fn model(&self) -> &dyn DynamicsModel {
        self.model.as_ref()
    }

    pub fn environment(&self) -> &Environment {
        &self.environment
    }

    pub fn x_init(&self) -> &DVector<f64> {
        &self.x_init
    }

    pub fn goals(&self) -> &GoalSet {
        &self.goals
    }
}

/// Problem discretized into N steps with the collision workspace built for it.
pub struct TrajectoryOptimizationProblem {
    definition: ProblemDefinition,
    steps: usize,
    tf_guess: f64,
    fixed_final_time: bool,
    workspace: Workspace,
    /// Goals with the step they are assigned to, ordered by step then insertion.
    goal_steps: Vec<(usize, Goal)>,
}

impl TrajectoryOptimizationProblem {
    /// Discretizes the problem into `steps` time steps spanning `tf_guess`.
    /// Every goal is assigned to the nearest step; half way times go to the later step
    /// and goals at or after the time guess go to the last step.
    pub fn discretize(
        definition: ProblemDefinition,
        steps: usize,
        tf_guess: f64,
        fixed_final_time: bool,
    ) -> Result<Self> {
        if steps < 2 {
            return Err(TrajoptError::InvalidDiscretization(format!(
                "at least 2 time steps required, got {}",
                steps
            )));
        }
        if !(tf_guess > 0.0 && tf_guess.is_finite()) {
            return Err(TrajoptError::InvalidDiscretization(format!(
                "final time guess must be positive and finite, got {}",
                tf_guess
            )));
        }

        let dt = tf_guess / (steps - 1) as f64;
        let last = steps - 1;
        let goal_steps = definition
            .goals()
            .iter()
            .map(|(time, goal)| {
                let step = if *time >= tf_guess {
                    last
                } else {
                    ((time / dt).round().max(0.0) as usize).min(last)
                };
                (step, goal.clone())
            })
            .collect();

        let workspace = Workspace::new(definition.robot().collision_shape(), definition.environment());
        Ok(TrajectoryOptimizationProblem {
            definition,
            steps,
            tf_guess,
            fixed_final_time,
            workspace,
            goal_steps,
        })
    }

    pub fn definition(&self) -> &ProblemDefinition {
        &self.definition
    }

    pub fn model(&self) -> &dyn DynamicsModel {
        self.definition.model()
    }

    pub fn robot(&self) -> &dyn Robot {
        self.definition.robot()
    }

    pub fn workspace(&self) -> &Workspace {
        &self.workspace
    }

    /// Number of time steps N.
    pub fn steps(&self) -> usize {
        self.steps
    }

    pub fn tf_guess(&self) -> f64 {
        self.tf_guess
    }

    /// Time step of the time guess.
    pub fn dt_guess(&self) -> f64 {
        self.tf_guess / (self.steps - 1) as f64
    }

    pub fn fixed_final_time(&self) -> bool {
        self.fixed_final_time
    }

    pub fn goal_steps(&self) -> &[(usize, Goal)] {
        &self.goal_steps
    }

    /// Piecewise linear states from the initial state through the centers of the
    /// assigned goals, zero controls, final time at the guess. Coordinates not targeted
    /// by a goal keep their previous knot value.
    pub fn initial_guess(&self) -> Trajectory {
        let model = self.model();
        let mut knots: Vec<(usize, DVector<f64>)> = vec![(0, self.definition.x_init().clone())];
        for (step, goal) in &self.goal_steps {
            if *step == 0 {
                continue;
            }
            let (last_step, last_state) = knots[knots.len() - 1].clone();
            let mut state = last_state;
            let center = goal.region.center();
            for (k, &index) in goal.indices.iter().enumerate() {
                state[index] = center[k];
            }
            if last_step == *step {
                knots.pop();
            }
            knots.push((*step, state));
        }

        let mut x = DMatrix::zeros(model.x_dim(), self.steps);
        for k in 0..self.steps {
            let next = knots.iter().position(|(step, _)| *step >= k);
            let state = match next {
                Some(0) | None => knots[next.unwrap_or(knots.len() - 1)].1.clone(),
                Some(j) => {
                    let (k0, x0) = &knots[j - 1];
                    let (k1, x1) = &knots[j];
                    let s = (k - k0) as f64 / (k1 - k0) as f64;
                    x0 + (x1 - x0) * s
                }
            };
            x.set_column(k, &state);
        }
        Trajectory {
            x,
            u: DMatrix::zeros(model.u_dim(), self.steps),
            tf: self.tf_guess,
        }
    }
}
