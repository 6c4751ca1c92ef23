//! SCP view of a discretized problem: constraint setup, convexification about an
//! estimate, subproblem assembly and merit evaluation.

use nalgebra::{DMatrix, DVector};
use tracing::{debug, warn};

use crate::constraints::{
    ConstraintCategory, ConstraintSlot, Dimensionality, GenerationContext, ScpConstraints,
};
use crate::convex::{ConvexModel, ConvexSolution, ConvexSolver, ScpVariables};
use crate::distance_traits::DistanceQuery;
use crate::error::{Result, TrajoptError};
use crate::generators::{
    BoxGenerator, DynamicsGenerator, FinalTimeBoundsGenerator, KeepInGenerator, KeepOutGenerator,
    Target, TrustRegionGenerator, TrustRegionTarget, ValueGenerator,
};
use crate::params::ScpParam;
use crate::problem::TrajectoryOptimizationProblem;
use crate::solution::ScpSolution;
use crate::trajectory::Trajectory;
use std::sync::Arc;

/// Goal region extents at or below this are pinned with equalities.
const POINT_GOAL: f64 = 1e-12;

/// Cost, true constraint violation and merit `cost + penalty * violation` of a trajectory.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Merit {
    pub cost: f64,
    pub violation: f64,
    pub merit: f64,
}

/// Discretized problem together with the SCP parameters and the variable layout.
pub struct ScpProblem {
    problem: TrajectoryOptimizationProblem,
    param: ScpParam,
    vars: ScpVariables,
    control_weights: DVector<f64>,
}

impl ScpProblem {
    pub fn new(problem: TrajectoryOptimizationProblem, param: ScpParam) -> Result<Self> {
        param.validate()?;
        if param.fixed_final_time != problem.fixed_final_time() {
            return Err(TrajoptError::InvalidParameter(format!(
                "fixed_final_time is {} in the parameters but {} in the discretization",
                param.fixed_final_time,
                problem.fixed_final_time()
            )));
        }
        let (tf_min, tf_max) = param.final_time_bounds;
        if !param.fixed_final_time && !(tf_min..=tf_max).contains(&problem.tf_guess()) {
            return Err(TrajoptError::InvalidParameter(format!(
                "final time guess {} outside of the final time bounds [{}, {}]",
                problem.tf_guess(),
                tf_min,
                tf_max
            )));
        }
        let model = problem.model();
        let control_weights = model.control_weights();
        if control_weights.iter().any(|w| !(*w > 0.0)) {
            return Err(TrajoptError::InvalidParameter(
                "control weights must be positive".to_string(),
            ));
        }
        for (_, category) in problem.robot().additional_constraints() {
            category.check(&problem)?;
        }
        let vars = ScpVariables::new(
            model.x_dim(),
            model.u_dim(),
            problem.steps(),
            param.fixed_final_time.then_some(problem.tf_guess()),
        );
        Ok(ScpProblem {
            problem,
            param,
            vars,
            control_weights,
        })
    }

    pub fn problem(&self) -> &TrajectoryOptimizationProblem {
        &self.problem
    }

    pub fn param(&self) -> &ScpParam {
        &self.param
    }

    pub fn variables(&self) -> &ScpVariables {
        &self.vars
    }

    /// Diagonal of R in the stage cost `u' R u`.
    pub fn control_weights(&self) -> &DVector<f64> {
        &self.control_weights
    }

    pub fn initial_guess(&self) -> Trajectory {
        self.problem.initial_guess()
    }

    /// Runs the SCP iteration from the initial guess.
    pub fn solve(&self, solver: &dyn ConvexSolver) -> ScpSolution {
        crate::iteration::ScpIteration::new(self, solver).run(self.initial_guess())
    }

    pub(crate) fn context<'a>(&'a self, estimate: &'a Trajectory, trust_radius: f64) -> GenerationContext<'a> {
        GenerationContext {
            problem: &self.problem,
            param: &self.param,
            vars: &self.vars,
            estimate,
            trust_radius,
        }
    }

    /// Makes a trajectory usable as an estimate: the pinned final time is enforced, a trajectory
    /// of the wrong shape is replaced by the initial guess. The initial state and the goals at the
    /// first and last step are hard rows of every subproblem, so the first and last states are
    /// moved onto them. Otherwise the trust region around the estimate could exclude them.
    pub fn admit(&self, trajectory: Trajectory) -> Trajectory {
        let model = self.problem.model();
        if trajectory.x_dim() != model.x_dim()
            || trajectory.u_dim() != model.u_dim()
            || trajectory.steps() != self.problem.steps()
        {
            warn!(
                "Initial trajectory has shape {}x{} / {}x{}, using the initial guess instead",
                trajectory.x_dim(),
                trajectory.steps(),
                trajectory.u_dim(),
                trajectory.u.ncols()
            );
            return self.initial_guess();
        }
        let mut trajectory = trajectory;
        if let Some(tf) = self.vars.fixed_final_time() {
            trajectory.tf = tf;
        }
        let last = self.problem.steps() - 1;
        trajectory.x.set_column(0, self.problem.definition().x_init());
        for (step, goal) in self.problem.goal_steps() {
            if *step == 0 || *step == last {
                for (j, &i) in goal.indices.iter().enumerate() {
                    let value = trajectory.x[(i, *step)];
                    trajectory.x[(i, *step)] = value.clamp(goal.region.lower[j], goal.region.upper[j]);
                }
            }
        }
        trajectory
    }

    fn dynamics_category(&self) -> ConstraintCategory {
        ConstraintCategory::new("dynamics", Arc::new(DynamicsGenerator), Dimensionality::PerTime)
            .with_time_indices((0..self.problem.steps() - 1).collect())
    }

    /// Registers every constraint family of the problem and generates the rows of the convex ones.
    pub fn setup_constraints(&self) -> ScpConstraints {
        let steps = self.problem.steps();
        let last = steps - 1;
        let model = self.problem.model();
        let definition = self.problem.definition();
        let mut registry = ScpConstraints::new();

        registry.add(ConstraintSlot::Dynamics, self.dynamics_category());

        registry.add(
            ConstraintSlot::ConvexBoundaryConditionEq,
            ConstraintCategory::new(
                "initial_state",
                Arc::new(ValueGenerator { target: Target::State }),
                Dimensionality::PerState,
            )
            .with_time_indices(vec![0])
            .with_aux_indices((0..model.x_dim()).collect())
            .with_params(definition.x_init().iter().copied().collect()),
        );

        for (n, (step, goal)) in self.problem.goal_steps().iter().enumerate() {
            let boundary = *step == 0 || *step == last;
            let (eq_slot, ineq_slot) = if boundary {
                (ConstraintSlot::ConvexBoundaryConditionEq, ConstraintSlot::ConvexBoundaryConditionIneq)
            } else {
                (ConstraintSlot::ConvexStateEq, ConstraintSlot::ConvexStateIneq)
            };
            let region = &goal.region;
            let (points, boxes): (Vec<usize>, Vec<usize>) =
                (0..goal.indices.len()).partition(|&j| region.upper[j] - region.lower[j] <= POINT_GOAL);

            if !points.is_empty() {
                let center = region.center();
                registry.add(
                    eq_slot,
                    ConstraintCategory::new(
                        format!("goal[{}]", n),
                        Arc::new(ValueGenerator { target: Target::State }),
                        Dimensionality::PerState,
                    )
                    .with_time_indices(vec![*step])
                    .with_aux_indices(points.iter().map(|&j| goal.indices[j]).collect())
                    .with_params(points.iter().map(|&j| center[j]).collect()),
                );
            }
            if !boxes.is_empty() {
                let params = boxes
                    .iter()
                    .map(|&j| region.lower[j])
                    .chain(boxes.iter().map(|&j| region.upper[j]))
                    .collect();
                registry.add(
                    ineq_slot,
                    ConstraintCategory::new(
                        format!("goal_region[{}]", n),
                        Arc::new(BoxGenerator { target: Target::State }),
                        Dimensionality::PerState,
                    )
                    .with_time_indices(vec![*step])
                    .with_aux_indices(boxes.iter().map(|&j| goal.indices[j]).collect())
                    .with_params(params),
                );
            }
        }

        if let Some((lower, upper)) = model.state_bounds() {
            let bounded: Vec<usize> = (0..model.x_dim())
                .filter(|&i| lower[i].is_finite() || upper[i].is_finite())
                .collect();
            if !bounded.is_empty() {
                let params = bounded
                    .iter()
                    .map(|&i| lower[i])
                    .chain(bounded.iter().map(|&i| upper[i]))
                    .collect();
                registry.add(
                    ConstraintSlot::ConvexStateIneq,
                    ConstraintCategory::new(
                        "state_bounds",
                        Arc::new(BoxGenerator { target: Target::State }),
                        Dimensionality::PerState,
                    )
                    .with_time_indices((1..steps).collect())
                    .with_aux_indices(bounded)
                    .with_params(params),
                );
            }
        }

        let robot = self.problem.robot();
        if let Some((lower, upper)) = robot.control_bounds() {
            registry.add(
                ConstraintSlot::ConvexControlIneq,
                ConstraintCategory::new(
                    "control_bounds",
                    Arc::new(BoxGenerator { target: Target::Control }),
                    Dimensionality::PerControl,
                )
                .with_time_indices((0..steps).collect())
                .with_aux_indices((0..model.u_dim()).collect())
                .with_params(lower.iter().chain(upper.iter()).copied().collect()),
            );
        }

        if !self.param.fixed_final_time {
            let (tf_min, tf_max) = self.param.final_time_bounds;
            registry.add(
                ConstraintSlot::ConvexControlIneq,
                ConstraintCategory::new("final_time_bounds", Arc::new(FinalTimeBoundsGenerator), Dimensionality::Scalar)
                    .with_params(vec![tf_min, tf_max]),
            );
        }

        let keep_out = self.problem.workspace().keep_out();
        for zone in 0..keep_out.zone_count() {
            let name = if keep_out.is_obstacle(zone) {
                format!("obstacle[{}]", zone)
            } else {
                format!("keep_out[{}]", zone)
            };
            registry.add(
                ConstraintSlot::NonconvexStateIneq,
                ConstraintCategory::new(name, Arc::new(KeepOutGenerator), Dimensionality::PerTime)
                    .with_time_indices((1..steps).collect())
                    .with_aux_indices(vec![zone])
                    .with_params(vec![self.param.safety_margin]),
            );
        }

        if self.problem.workspace().keep_in().zone_count() > 0 {
            registry.add(
                ConstraintSlot::NonconvexStateIneq,
                ConstraintCategory::new("keep_in", Arc::new(KeepInGenerator), Dimensionality::PerTime)
                    .with_time_indices((1..steps).collect()),
            );
        }

        for (slot, category) in robot.additional_constraints() {
            registry.add(slot, category);
        }

        let estimate = self.initial_guess();
        let ctx = self.context(&estimate, self.param.trust_region.initial_radius);
        for slot in ConstraintSlot::ALL {
            if slot.is_sent_to_solver() {
                for category in registry.get_mut(slot).iter_mut() {
                    category.generate(&ctx);
                }
            }
        }
        debug!(
            "Registered {} constraint families, {} solver rows",
            registry.len(),
            registry.solver_row_count()
        );
        registry
    }

    /// Regenerates dynamics, convexified families and trust regions about the estimate.
    pub fn convexify(&self, registry: &mut ScpConstraints, estimate: &Trajectory, trust_radius: f64) {
        let steps = self.problem.steps();
        let ctx = self.context(estimate, trust_radius);
        registry.clear_per_iteration();

        let mut dynamics = self.dynamics_category();
        dynamics.generate(&ctx);
        registry.add(ConstraintSlot::Dynamics, dynamics);

        let omitted = registry.convexify(&ctx);
        if omitted > 0 {
            debug!("{} distant constraint families left out", omitted);
        }

        let trust_regions = [
            (ConstraintSlot::StateTrustRegionIneq, TrustRegionTarget::State, Dimensionality::PerState, self.vars.x_dim()),
            (ConstraintSlot::ControlTrustRegionIneq, TrustRegionTarget::Control, Dimensionality::PerControl, self.vars.u_dim()),
        ];
        for (slot, target, dimensionality, dim) in trust_regions {
            let mut category = ConstraintCategory::new(
                "trust_region",
                Arc::new(TrustRegionGenerator { target }),
                dimensionality,
            )
            .with_time_indices((0..steps).collect())
            .with_aux_indices((0..dim).collect())
            .with_params(vec![trust_radius]);
            category.generate(&ctx);
            registry.add(slot, category);
        }
        if self.vars.tf().is_some() {
            let mut category = ConstraintCategory::new(
                "final_time_trust_region",
                Arc::new(TrustRegionGenerator { target: TrustRegionTarget::FinalTime }),
                Dimensionality::Scalar,
            )
            .with_params(vec![trust_radius]);
            category.generate(&ctx);
            registry.add(ConstraintSlot::FinalTimeTrustRegionIneq, category);
        }
    }

    fn control_effort(&self, trajectory: &Trajectory) -> f64 {
        (0..trajectory.steps())
            .map(|k| {
                trajectory
                    .u
                    .column(k)
                    .iter()
                    .zip(self.control_weights.iter())
                    .map(|(u, r)| r * u * u)
                    .sum::<f64>()
            })
            .sum()
    }

    /// True cost `dt * sum(u' R u)`, plus the weighted final time when it is free.
    pub fn cost(&self, trajectory: &Trajectory) -> f64 {
        let time = if self.vars.tf().is_some() {
            self.param.time_weight * trajectory.tf
        } else {
            0.0
        };
        trajectory.dt() * self.control_effort(trajectory) + time
    }

    pub fn evaluate(&self, registry: &ScpConstraints, trajectory: &Trajectory, penalty: f64) -> Merit {
        let ctx = self.context(trajectory, 0.0);
        let cost = self.cost(trajectory);
        let violation = registry.violation(&ctx);
        Merit {
            cost,
            violation,
            merit: cost + penalty * violation,
        }
    }

    /// True violation of the keep-out, keep-in and other nonconvex families only, for
    /// trajectories that satisfy the dynamics by construction.
    pub fn path_violation(&self, registry: &ScpConstraints, trajectory: &Trajectory) -> f64 {
        let ctx = self.context(trajectory, 0.0);
        registry
            .iter()
            .filter(|(slot, _)| slot.is_nonconvex())
            .map(|(_, category)| category.violation(&ctx))
            .sum()
    }

    /// Assembles the convex subproblem about the estimate from the registry. The cost is the
    /// control effort at the estimated time step, the final time terms linearized about the
    /// estimate and the penalty on slack variables.
    pub fn build_model(&self, registry: &mut ScpConstraints, estimate: &Trajectory, penalty: f64) -> ConvexModel {
        let mut model = ConvexModel::new(self.vars.len());
        let dt = estimate.dt();
        for k in 0..self.vars.steps() {
            for i in 0..self.vars.u_dim() {
                let var = self.vars.u(i, k);
                model.add_quadratic(var, var, 2.0 * dt * self.control_weights[i]);
            }
        }
        if let Some(tf) = self.vars.tf() {
            let intervals = (self.vars.steps() - 1) as f64;
            model.q[tf] = self.control_effort(estimate) / intervals + self.param.time_weight;
        }
        registry.assemble_into(&mut model, penalty);
        model
    }

    /// Merit of the candidate as predicted by the convex model built about the estimate.
    pub fn model_merit(
        &self,
        registry: &ScpConstraints,
        estimate: &Trajectory,
        candidate: &Trajectory,
        penalty: f64,
    ) -> f64 {
        let dt = estimate.dt();
        let mut cost = dt * self.control_effort(candidate);
        if self.vars.tf().is_some() {
            let intervals = (self.vars.steps() - 1) as f64;
            cost += self.control_effort(estimate) / intervals * (candidate.tf - estimate.tf)
                + self.param.time_weight * candidate.tf;
        }
        let z = self.vars.pack(candidate);
        let linearized_violation: f64 = registry
            .iter()
            .filter(|(slot, _)| slot.is_sent_to_solver() && slot.is_soft())
            .flat_map(|(_, category)| category.rows.iter())
            .map(|row| row.violation(&z))
            .sum();
        cost + penalty * linearized_violation
    }

    /// Duals of the dynamics rows of the last assembled model, one column per
    /// transition (x_dim × (N - 1)).
    pub fn dynamics_duals(&self, registry: &ScpConstraints, solution: &ConvexSolution) -> DMatrix<f64> {
        let x_dim = self.vars.x_dim();
        let transitions = self.vars.steps() - 1;
        let mut duals = DMatrix::zeros(x_dim, transitions);
        if let Some(dynamics) = registry.get(ConstraintSlot::Dynamics).first() {
            let values = solution.duals(dynamics.model_rows.clone());
            for k in 0..transitions {
                for i in 0..x_dim {
                    if let Some(value) = values.get(k * x_dim + i) {
                        duals[(i, k)] = *value;
                    }
                }
            }
        }
        duals
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::environment::{Environment, Zone};
    use crate::goals::{Goal, GoalRegion, GoalSet};
    use crate::dynamics::DoubleIntegrator;
    use crate::problem::ProblemDefinition;
    use crate::robot::FreeFlyer;
    use approx::assert_relative_eq;
    use nalgebra::Vector3;

    fn scp_problem(fixed: bool) -> ScpProblem {
        let environment = Environment::new(
            vec![Zone::new_box(Vector3::new(-1.0, -5.0, -5.0), Vector3::new(11.0, 5.0, 5.0)).expect("zone")],
            vec![Zone::new_sphere(Vector3::new(5.0, 3.0, 0.0), 1.0).expect("zone")],
        )
        .add_obstacles(&[crate::environment::ZoneData::Sphere { center: [5.0, -3.0, 0.0], radius: 0.5 }])
        .expect("obstacles");
        let goal = Goal::new(
            vec![0, 1, 2, 3, 4, 5],
            GoalRegion::point(DVector::from_vec(vec![10.0, 0.0, 0.0, 0.0, 0.0, 0.0])).expect("region"),
        )
        .expect("goal");
        let waypoint = Goal::new(
            vec![0, 1],
            GoalRegion::new(DVector::from_vec(vec![4.0, -1.0]), DVector::from_vec(vec![6.0, 1.0])).expect("region"),
        )
        .expect("goal");
        let definition = ProblemDefinition::new(
            Arc::new(FreeFlyer::new(0.2, vec![5.0, 5.0, 5.0])),
            Arc::new(DoubleIntegrator { max_velocity: Some(4.0) }),
            environment,
            DVector::zeros(6),
            GoalSet::new().with(5.0, waypoint).with(10.0, goal),
        )
        .expect("definition");
        let problem = TrajectoryOptimizationProblem::discretize(definition, 11, 10.0, fixed).expect("discretize");
        let param = ScpParam {
            fixed_final_time: fixed,
            ..ScpParam::default()
        };
        ScpProblem::new(problem, param).expect("scp problem")
    }

    #[test]
    fn test_setup_registers_every_family() {
        let problem = scp_problem(false);
        let registry = problem.setup_constraints();
        let count = |slot| registry.get(slot).len();
        assert_eq!(count(ConstraintSlot::Dynamics), 1);
        // Initial state and the point goal at the final step
        assert_eq!(count(ConstraintSlot::ConvexBoundaryConditionEq), 2);
        // Waypoint region and velocity bounds
        assert_eq!(count(ConstraintSlot::ConvexStateIneq), 2);
        // Control bounds and final time bounds
        assert_eq!(count(ConstraintSlot::ConvexControlIneq), 2);
        // Keep-out zone, obstacle and keep-in
        assert_eq!(count(ConstraintSlot::NonconvexStateIneq), 3);
        assert_eq!(registry.len(), 10);

        let names: Vec<&str> = registry
            .get(ConstraintSlot::NonconvexStateIneq)
            .iter()
            .map(|c| c.name.as_str())
            .collect();
        assert_eq!(names, vec!["keep_out[0]", "obstacle[1]", "keep_in"]);

        // Convex rows are generated once at setup
        let bounds = &registry.get(ConstraintSlot::ConvexControlIneq)[0];
        assert_eq!(bounds.rows.len(), 11 * 3 * 2);
    }

    #[test]
    fn test_convexify_per_iteration() {
        let problem = scp_problem(false);
        let mut registry = problem.setup_constraints();
        let guess = problem.initial_guess();
        problem.convexify(&mut registry, &guess, 1.0);

        assert_eq!(registry.get(ConstraintSlot::Dynamics).len(), 1);
        assert_eq!(registry.get(ConstraintSlot::Dynamics)[0].rows.len(), 10 * 6);
        assert_eq!(registry.get(ConstraintSlot::StateTrustRegionIneq).len(), 1);
        assert_eq!(registry.get(ConstraintSlot::ControlTrustRegionIneq).len(), 1);
        assert_eq!(registry.get(ConstraintSlot::FinalTimeTrustRegionIneq).len(), 1);
        // The guess runs along the x axis, at least 1.8 m clear of both spheres. With the
        // default toggle distance of 1 m only keep-in is linearized
        let convexified = registry.get(ConstraintSlot::NonconvexStateConvexifiedIneq);
        assert_eq!(convexified.len(), 1);
        assert_eq!(convexified[0].name, "keep_in (convexified)");

        // Regenerating does not accumulate families
        problem.convexify(&mut registry, &guess, 0.5);
        assert_eq!(registry.get(ConstraintSlot::Dynamics).len(), 1);
        assert_eq!(registry.get(ConstraintSlot::StateTrustRegionIneq).len(), 1);
        assert_eq!(registry.get(ConstraintSlot::StateTrustRegionIneq)[0].params, vec![0.5]);
    }

    #[test]
    fn test_model_merit_matches_at_estimate() {
        let problem = scp_problem(true);
        let mut registry = problem.setup_constraints();
        let mut guess = problem.initial_guess();
        guess.u[(0, 3)] = 0.7;
        problem.convexify(&mut registry, &guess, 1.0);
        let merit = problem.evaluate(&registry, &guess, 10.0);
        let model_merit = problem.model_merit(&registry, &guess, &guess, 10.0);
        assert!(merit.violation > 0.0);
        assert_relative_eq!(merit.merit, model_merit, epsilon = 1e-9);

        let model = problem.build_model(&mut registry, &guess, 10.0);
        let z = problem.variables().pack(&guess);
        // Quadratic part of the model equals the control effort cost
        let mut padded = z.clone();
        padded.resize(model.n_vars, 0.0);
        assert_relative_eq!(model.objective(&padded), merit.cost, epsilon = 1e-9);
    }

    #[test]
    fn test_fixed_final_time_mismatch() {
        let problem = scp_problem(true);
        let param = ScpParam {
            fixed_final_time: false,
            ..ScpParam::default()
        };
        let definition = ProblemDefinition::new(
            Arc::new(FreeFlyer::unlimited(0.2)),
            Arc::new(DoubleIntegrator::default()),
            Environment::default(),
            DVector::zeros(6),
            GoalSet::new(),
        )
        .expect("definition");
        let discretized = TrajectoryOptimizationProblem::discretize(definition, 5, 4.0, true).expect("discretize");
        assert!(ScpProblem::new(discretized, param).is_err());
        assert!(problem.variables().tf().is_none());
    }
}
