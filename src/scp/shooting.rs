//! Indirect shooting refinement of an SCP solution.
//!
//! The dual variables of the dynamics rows approximate the costate of the continuous
//! problem. Starting from them, the initial costate is corrected by Newton iterations
//! until the state / costate trajectory integrated from the initial state meets the goal
//! at the final time. Controls follow from the stationarity of the Hamiltonian
//! `H = u'Ru + p'f(x, u)` for control affine dynamics: `u = -R^-1 B' p / 2`.

use std::fmt;
use std::time::{Duration, Instant};

use nalgebra::{DMatrix, DVector};
use tracing::{debug, warn};

use crate::dynamics::DynamicsModel;
use crate::params::ShootingParam;
use crate::scp_problem::ScpProblem;
use crate::solution::ScpSolution;
use crate::trajectory::Trajectory;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShootingStatus {
    Converged,
    MaxIterations,
    /// The Newton system could not be solved
    SingularJacobian,
    /// Integration produced non-finite values or no step reduced the residual
    Diverged,
    /// The SCP run never solved a subproblem, so there is no costate to start from
    MissingDuals,
}

impl fmt::Display for ShootingStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

/// Result of the shooting refinement. Failure is reported here, never as an error.
#[derive(Debug, Clone)]
pub struct ShootingSolution {
    pub trajectory: Trajectory,
    pub converged: bool,
    pub status: ShootingStatus,
    pub iterations: usize,
    /// Final initial costate
    pub costate: DVector<f64>,
    /// Infinity norm of the residual, one entry per Newton iteration plus the initial one
    pub residual_history: Vec<f64>,
    /// Cost `dt * sum(u' R u)` of the integrated trajectory, aligned with the residual history
    pub cost_history: Vec<f64>,
    pub elapsed: Duration,
}

/// Boundary value problem derived from an SCP solution.
pub struct ShootingProblem<'a> {
    problem: &'a ScpProblem,
    param: ShootingParam,
    costate: Option<DVector<f64>>,
    x_init: DVector<f64>,
    x_goal: DVector<f64>,
    /// Coordinates fixed by a goal at the final time. The costate of the others must vanish there.
    goal_mask: Vec<bool>,
    tf: f64,
    steps: usize,
    trajectory: Trajectory,
}

struct Integration {
    trajectory: Trajectory,
    final_state: DVector<f64>,
    final_costate: DVector<f64>,
}

impl<'a> ShootingProblem<'a> {
    /// Seeds the initial costate with `p0 = -y0`, the negated duals of the first dynamics
    /// transition. Goal targets at the time guess are written in insertion order, so a later
    /// goal wins on shared coordinates. Goal regions are targeted at their center.
    pub fn from_scp(problem: &'a ScpProblem, solution: &ScpSolution) -> Self {
        let definition = problem.problem().definition();
        let trajectory = solution.trajectory().clone();
        let x_dim = problem.variables().x_dim();

        let mut x_goal = trajectory.state(trajectory.steps() - 1);
        let mut goal_mask = vec![false; x_dim];
        for index in definition
            .goals()
            .write_targets(problem.problem().tf_guess(), &mut x_goal)
        {
            goal_mask[index] = true;
        }

        let costate = solution
            .dynamics_duals()
            .map(|duals| -duals.column(0).into_owned());

        ShootingProblem {
            problem,
            param: problem.param().shooting.clone(),
            costate,
            x_init: definition.x_init().clone(),
            x_goal,
            goal_mask,
            tf: trajectory.tf,
            steps: trajectory.steps(),
            trajectory,
        }
    }

    pub fn initial_costate(&self) -> Option<&DVector<f64>> {
        self.costate.as_ref()
    }

    pub fn goal(&self) -> &DVector<f64> {
        &self.x_goal
    }

    pub fn goal_mask(&self) -> &[bool] {
        &self.goal_mask
    }

    fn model(&self) -> &dyn DynamicsModel {
        self.problem.problem().model()
    }

    /// Optimal control for the state and costate.
    fn control(&self, x: &DVector<f64>, p: &DVector<f64>) -> DVector<f64> {
        let model = self.model();
        let zero = DVector::zeros(model.u_dim());
        let (_, b) = model.jacobians(x, &zero);
        let weights = self.problem.control_weights();
        let bt_p = b.transpose() * p;
        DVector::from_iterator(
            model.u_dim(),
            bt_p.iter().zip(weights.iter()).map(|(v, r)| -0.5 * v / r),
        )
    }

    /// Time derivative of the stacked state and costate.
    fn derivative(&self, x: &DVector<f64>, p: &DVector<f64>) -> (DVector<f64>, DVector<f64>) {
        let model = self.model();
        let u = self.control(x, p);
        let (a, _) = model.jacobians(x, &u);
        (model.dynamics(x, &u), -(a.transpose() * p))
    }

    fn rk4(&self, x: &DVector<f64>, p: &DVector<f64>, h: f64) -> (DVector<f64>, DVector<f64>) {
        let (k1x, k1p) = self.derivative(x, p);
        let (k2x, k2p) = self.derivative(&(x + &k1x * (h / 2.0)), &(p + &k1p * (h / 2.0)));
        let (k3x, k3p) = self.derivative(&(x + &k2x * (h / 2.0)), &(p + &k2p * (h / 2.0)));
        let (k4x, k4p) = self.derivative(&(x + &k3x * h), &(p + &k3p * h));
        (
            x + (k1x + k2x * 2.0 + k3x * 2.0 + k4x) * (h / 6.0),
            p + (k1p + k2p * 2.0 + k3p * 2.0 + k4p) * (h / 6.0),
        )
    }

    fn integrate(&self, p0: &DVector<f64>) -> Option<Integration> {
        let model = self.model();
        let dt = self.tf / (self.steps - 1) as f64;
        let substeps = self.param.substeps.max(1);
        let h = dt / substeps as f64;

        let mut trajectory = Trajectory::zeros(model.x_dim(), model.u_dim(), self.steps, self.tf);
        let mut x = self.x_init.clone();
        let mut p = p0.clone();
        for k in 0..self.steps {
            let u = self.control(&x, &p);
            trajectory.x.set_column(k, &x);
            trajectory.u.set_column(k, &u);
            if k + 1 == self.steps {
                break;
            }
            for _ in 0..substeps {
                let (next_x, next_p) = self.rk4(&x, &p, h);
                x = next_x;
                p = next_p;
            }
            if !x.iter().chain(p.iter()).all(|v| v.is_finite()) {
                return None;
            }
        }
        Some(Integration {
            trajectory,
            final_state: x,
            final_costate: p,
        })
    }

    fn residual(&self, integration: &Integration) -> DVector<f64> {
        DVector::from_iterator(
            self.goal_mask.len(),
            self.goal_mask.iter().enumerate().map(|(i, fixed)| {
                if *fixed {
                    integration.final_state[i] - self.x_goal[i]
                } else {
                    integration.final_costate[i]
                }
            }),
        )
    }

    fn evaluate(&self, p0: &DVector<f64>) -> Option<(DVector<f64>, Integration)> {
        let integration = self.integrate(p0)?;
        let residual = self.residual(&integration);
        residual
            .iter()
            .all(|v| v.is_finite())
            .then_some((residual, integration))
    }

    fn cost(&self, trajectory: &Trajectory) -> f64 {
        self.problem.cost(trajectory)
    }

    /// Newton iteration on the initial costate with a finite difference Jacobian and step halving.
    pub fn solve(&self) -> ShootingSolution {
        let start = Instant::now();
        let Some(seed) = self.costate.clone() else {
            warn!("Shooting skipped: no dynamics duals available");
            return self.failed(ShootingStatus::MissingDuals, DVector::zeros(self.x_init.len()), start);
        };
        let Some((mut residual, mut integration)) = self.evaluate(&seed) else {
            warn!("Shooting diverged when integrating from the seeded costate");
            return self.failed(ShootingStatus::Diverged, seed, start);
        };

        let n = seed.len();
        let mut p0 = seed;
        let mut residual_history = vec![residual.amax()];
        let mut cost_history = vec![self.cost(&integration.trajectory)];
        let mut iterations = 0;

        let status = loop {
            if residual.amax() <= self.param.tolerance {
                break ShootingStatus::Converged;
            }
            if iterations >= self.param.max_iterations {
                break ShootingStatus::MaxIterations;
            }
            iterations += 1;

            let mut jacobian = DMatrix::zeros(n, n);
            let mut failed = false;
            for j in 0..n {
                let mut perturbed = p0.clone();
                perturbed[j] += self.param.fd_step;
                match self.evaluate(&perturbed) {
                    Some((r, _)) => jacobian.set_column(j, &((r - &residual) / self.param.fd_step)),
                    None => {
                        failed = true;
                        break;
                    }
                }
            }
            if failed {
                break ShootingStatus::Diverged;
            }
            let Some(step) = jacobian.lu().solve(&(-&residual)) else {
                break ShootingStatus::SingularJacobian;
            };

            let norm = residual.amax();
            let mut alpha = 1.0;
            let mut improved = None;
            for _ in 0..=self.param.max_step_halvings {
                let trial = &p0 + &step * alpha;
                if let Some((r, i)) = self.evaluate(&trial) {
                    if r.amax() < norm {
                        improved = Some((trial, r, i));
                        break;
                    }
                }
                alpha *= 0.5;
            }
            let Some((trial, r, i)) = improved else {
                break ShootingStatus::Diverged;
            };
            p0 = trial;
            residual = r;
            integration = i;
            residual_history.push(residual.amax());
            cost_history.push(self.cost(&integration.trajectory));
            debug!(
                "Shooting iteration {}: residual {:.3e}, step {}",
                iterations,
                residual.amax(),
                alpha
            );
        };

        let converged = status == ShootingStatus::Converged;
        if !converged {
            warn!(
                "Shooting did not converge ({}), residual {:.3e}",
                status,
                residual.amax()
            );
        }
        ShootingSolution {
            trajectory: integration.trajectory,
            converged,
            status,
            iterations,
            costate: p0,
            residual_history,
            cost_history,
            elapsed: start.elapsed(),
        }
    }

    fn failed(&self, status: ShootingStatus, costate: DVector<f64>, start: Instant) -> ShootingSolution {
        ShootingSolution {
            trajectory: self.trajectory.clone(),
            converged: false,
            status,
            iterations: 0,
            costate,
            residual_history: Vec::new(),
            cost_history: Vec::new(),
            elapsed: start.elapsed(),
        }
    }
}
