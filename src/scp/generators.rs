//! Generators of the constraint families registered by the SCP problem.

use nalgebra::Vector3;
use rayon::prelude::{IntoParallelRefIterator, ParallelIterator};

use crate::constraints::{ConstraintCategory, ConstraintGenerator, GenerationContext};
use crate::convex::LinearRow;
use crate::distance_traits::DistanceQuery;
use crate::problem::TrajectoryOptimizationProblem;

/// Which block of trajectory variables a generator constrains.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Target {
    State,
    Control,
}

fn variable(ctx: &GenerationContext, target: Target, i: usize, k: usize) -> usize {
    match target {
        Target::State => ctx.vars.x(i, k),
        Target::Control => ctx.vars.u(i, k),
    }
}

fn check_indices(category: &ConstraintCategory, problem: &TrajectoryOptimizationProblem, target: Target) -> Result<(), String> {
    let dim = match target {
        Target::State => problem.model().x_dim(),
        Target::Control => problem.model().u_dim(),
    };
    match category.aux_indices.iter().find(|&&i| i >= dim) {
        Some(i) => Err(format!("coordinate {} out of {:?} dimension {}", i, target, dim)),
        None => Ok(()),
    }
}

/// Coordinates in range and `params_per_index` parameters for each of them.
fn check_coordinates(
    category: &ConstraintCategory,
    problem: &TrajectoryOptimizationProblem,
    target: Target,
    params_per_index: usize,
) -> Result<(), String> {
    check_indices(category, problem, target)?;
    let expected = params_per_index * category.aux_indices.len();
    if category.params.len() != expected {
        return Err(format!(
            "{} parameters for {} coordinates, expected {}",
            category.params.len(),
            category.aux_indices.len(),
            expected
        ));
    }
    Ok(())
}

fn estimate_value(ctx: &GenerationContext, target: Target, i: usize, k: usize) -> f64 {
    match target {
        Target::State => ctx.estimate.x[(i, k)],
        Target::Control => ctx.estimate.u[(i, k)],
    }
}

/// Pins coordinates to values: `z[aux[j], k] = params[j]` for every time index k.
#[derive(Debug, Clone, Copy)]
pub struct ValueGenerator {
    pub target: Target,
}

impl ConstraintGenerator for ValueGenerator {
    fn name(&self) -> &str {
        "value"
    }

    fn check(&self, category: &ConstraintCategory, problem: &TrajectoryOptimizationProblem) -> Result<(), String> {
        check_coordinates(category, problem, self.target, 1)
    }

    fn generate(&self, category: &ConstraintCategory, ctx: &GenerationContext) -> Vec<LinearRow> {
        let mut rows = Vec::with_capacity(category.time_indices.len() * category.aux_indices.len());
        for &k in &category.time_indices {
            for (j, &i) in category.aux_indices.iter().enumerate() {
                let var = variable(ctx, self.target, i, k);
                rows.push(LinearRow::eq(vec![(var, 1.0)], category.params[j]));
            }
        }
        rows
    }
}

/// Box bounds `lower[j] <= z[aux[j], k] <= upper[j]` for every time index k. The
/// parameters hold all lower bounds followed by all upper bounds. Infinite bounds
/// produce no row.
#[derive(Debug, Clone, Copy)]
pub struct BoxGenerator {
    pub target: Target,
}

impl ConstraintGenerator for BoxGenerator {
    fn name(&self) -> &str {
        "box"
    }

    fn check(&self, category: &ConstraintCategory, problem: &TrajectoryOptimizationProblem) -> Result<(), String> {
        check_coordinates(category, problem, self.target, 2)
    }

    fn generate(&self, category: &ConstraintCategory, ctx: &GenerationContext) -> Vec<LinearRow> {
        let m = category.aux_indices.len();
        let (lower, upper) = category.params.split_at(m);
        let mut rows = Vec::new();
        for &k in &category.time_indices {
            for (j, &i) in category.aux_indices.iter().enumerate() {
                let var = variable(ctx, self.target, i, k);
                if upper[j].is_finite() {
                    rows.push(LinearRow::le(vec![(var, 1.0)], upper[j]));
                }
                if lower[j].is_finite() {
                    rows.push(LinearRow::le(vec![(var, -1.0)], -lower[j]));
                }
            }
        }
        rows
    }
}

/// Bounds of a free final time, `params = [lower, upper]`. Nothing when the final time is pinned.
#[derive(Debug, Clone, Copy)]
pub struct FinalTimeBoundsGenerator;

impl ConstraintGenerator for FinalTimeBoundsGenerator {
    fn name(&self) -> &str {
        "final_time_bounds"
    }

    fn check(&self, category: &ConstraintCategory, _problem: &TrajectoryOptimizationProblem) -> Result<(), String> {
        match category.params.as_slice() {
            [lower, upper] if lower <= upper => Ok(()),
            params => Err(format!("expected [lower, upper], got {:?}", params)),
        }
    }

    fn generate(&self, category: &ConstraintCategory, ctx: &GenerationContext) -> Vec<LinearRow> {
        match ctx.vars.tf() {
            Some(tf) => vec![
                LinearRow::le(vec![(tf, 1.0)], category.params[1]),
                LinearRow::le(vec![(tf, -1.0)], -category.params[0]),
            ],
            None => Vec::new(),
        }
    }
}

/// Forward Euler dynamics `x[k+1] = x[k] + dt f(x[k], u[k])` with `dt = Tf / (N - 1)`,
/// linearized in states, controls and the final time about the estimate.
/// One row per state coordinate for every time index k (the step from k to k + 1).
#[derive(Debug, Clone, Copy)]
pub struct DynamicsGenerator;

impl ConstraintGenerator for DynamicsGenerator {
    fn name(&self) -> &str {
        "euler_dynamics"
    }

    fn check(&self, category: &ConstraintCategory, problem: &TrajectoryOptimizationProblem) -> Result<(), String> {
        match category.time_indices.iter().find(|&&k| k + 1 >= problem.steps()) {
            Some(k) => Err(format!("no transition from the last step {}", k)),
            None => Ok(()),
        }
    }

    fn generate(&self, category: &ConstraintCategory, ctx: &GenerationContext) -> Vec<LinearRow> {
        let model = ctx.problem.model();
        let vars = ctx.vars;
        let (x_dim, u_dim) = (vars.x_dim(), vars.u_dim());
        let intervals = (vars.steps() - 1) as f64;
        let dt = ctx.estimate.dt();

        let mut rows = Vec::with_capacity(category.time_indices.len() * x_dim);
        for &k in &category.time_indices {
            let x = ctx.estimate.state(k);
            let u = ctx.estimate.control(k);
            let f = model.dynamics(&x, &u);
            let (a, b) = model.jacobians(&x, &u);
            let affine = &a * &x + &b * &u;

            for i in 0..x_dim {
                let mut coeffs = Vec::with_capacity(2 + x_dim + u_dim + 1);
                coeffs.push((vars.x(i, k + 1), 1.0));
                coeffs.push((vars.x(i, k), -1.0));
                for j in 0..x_dim {
                    if a[(i, j)] != 0.0 {
                        coeffs.push((vars.x(j, k), -dt * a[(i, j)]));
                    }
                }
                for j in 0..u_dim {
                    if b[(i, j)] != 0.0 {
                        coeffs.push((vars.u(j, k), -dt * b[(i, j)]));
                    }
                }
                let mut rhs = -dt * affine[i];
                vars.add_tf_term(&mut coeffs, &mut rhs, -f[i] / intervals);
                rows.push(LinearRow::eq(coeffs, rhs));
            }
        }
        rows
    }
}

/// Linear clearance row `d + g'(p - p_est) >= bound` over the position coordinates of step k.
fn clearance_row(
    ctx: &GenerationContext,
    k: usize,
    distance: f64,
    gradient: &Vector3<f64>,
    bound: f64,
) -> LinearRow {
    let indices = ctx.problem.model().position_indices();
    let mut coeffs = Vec::with_capacity(3);
    let mut rhs = distance - bound;
    for (axis, &i) in indices.iter().enumerate() {
        if gradient[axis] != 0.0 {
            coeffs.push((ctx.vars.x(i, k), -gradient[axis]));
            rhs -= gradient[axis] * ctx.estimate.x[(i, k)];
        }
    }
    LinearRow::le(coeffs, rhs)
}

/// Avoidance of one keep-out zone or obstacle, `aux = [zone]`, `params = [margin]`.
/// The robot must keep a clearance of at least the margin at every time index.
/// Inactive while the whole estimate stays at least the toggle distance away.
/// A zero toggle distance keeps it inactive even when the estimate penetrates.
#[derive(Debug, Clone, Copy)]
pub struct KeepOutGenerator;

impl ConstraintGenerator for KeepOutGenerator {
    fn name(&self) -> &str {
        "keep_out"
    }

    fn check(&self, category: &ConstraintCategory, problem: &TrajectoryOptimizationProblem) -> Result<(), String> {
        let zones = problem.workspace().keep_out().zone_count();
        match category.aux_indices.as_slice() {
            [zone] if *zone < zones => Ok(()),
            aux => Err(format!("expected one zone index below {}, got {:?}", zones, aux)),
        }
    }

    fn generate(&self, category: &ConstraintCategory, ctx: &GenerationContext) -> Vec<LinearRow> {
        let zone = category.aux_indices[0];
        let margin = category.params.first().copied().unwrap_or(0.0);
        let positions = positions_at(ctx, &category.time_indices);
        let distances = ctx.problem.workspace().keep_out().distances_along(zone, &positions);
        category
            .time_indices
            .iter()
            .zip(distances.iter())
            .map(|(&k, d)| clearance_row(ctx, k, d.distance, &d.gradient, margin))
            .collect()
    }

    fn is_active(&self, category: &ConstraintCategory, ctx: &GenerationContext) -> bool {
        let zone = category.aux_indices[0];
        let positions = positions_at(ctx, &category.time_indices);
        let closest = ctx.problem.workspace().keep_out().min_distance_along(zone, &positions);
        // Penetration counts as zero distance, so a zero toggle distance disables the family
        closest.max(0.0) < ctx.param.obstacle_toggle_distance
    }
}

/// Containment in the union of keep-in zones. At every time index the zone that holds
/// the estimate most deeply is linearized; the robot bounding sphere must stay inside it.
#[derive(Debug, Clone, Copy)]
pub struct KeepInGenerator;

impl ConstraintGenerator for KeepInGenerator {
    fn name(&self) -> &str {
        "keep_in"
    }

    fn generate(&self, category: &ConstraintCategory, ctx: &GenerationContext) -> Vec<LinearRow> {
        let keep_in = ctx.problem.workspace().keep_in();
        let positions = positions_at(ctx, &category.time_indices);
        let deepest: Vec<_> = positions
            .par_iter()
            .map(|point| keep_in.deepest_zone(point))
            .collect();
        category
            .time_indices
            .iter()
            .zip(deepest.iter())
            .filter_map(|(&k, zone)| {
                zone.map(|(_, d)| clearance_row(ctx, k, d.distance, &d.gradient, 0.0))
            })
            .collect()
    }
}

fn positions_at(ctx: &GenerationContext, steps: &[usize]) -> Vec<Vector3<f64>> {
    let model = ctx.problem.model();
    steps
        .iter()
        .map(|&k| model.position(&ctx.estimate.state(k)))
        .collect()
}

/// Which variables a trust region bounds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrustRegionTarget {
    State,
    Control,
    FinalTime,
}

/// Box trust region `|z - z_est| <= radius` around the estimate.
#[derive(Debug, Clone, Copy)]
pub struct TrustRegionGenerator {
    pub target: TrustRegionTarget,
}

impl TrustRegionGenerator {
    fn bounded(var: usize, center: f64, radius: f64, rows: &mut Vec<LinearRow>) {
        rows.push(LinearRow::le(vec![(var, 1.0)], center + radius));
        rows.push(LinearRow::le(vec![(var, -1.0)], radius - center));
    }
}

impl ConstraintGenerator for TrustRegionGenerator {
    fn name(&self) -> &str {
        "trust_region"
    }

    fn check(&self, category: &ConstraintCategory, problem: &TrajectoryOptimizationProblem) -> Result<(), String> {
        match self.target {
            TrustRegionTarget::State => check_indices(category, problem, Target::State),
            TrustRegionTarget::Control => check_indices(category, problem, Target::Control),
            TrustRegionTarget::FinalTime => Ok(()),
        }
    }

    fn generate(&self, category: &ConstraintCategory, ctx: &GenerationContext) -> Vec<LinearRow> {
        let radius = ctx.trust_radius;
        let mut rows = Vec::new();
        let target = match self.target {
            TrustRegionTarget::State => Target::State,
            TrustRegionTarget::Control => Target::Control,
            TrustRegionTarget::FinalTime => {
                if let Some(tf) = ctx.vars.tf() {
                    Self::bounded(tf, ctx.estimate.tf, radius, &mut rows);
                }
                return rows;
            }
        };
        for &k in &category.time_indices {
            for &i in &category.aux_indices {
                let var = variable(ctx, target, i, k);
                Self::bounded(var, estimate_value(ctx, target, i, k), radius, &mut rows);
            }
        }
        rows
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::constraints::Dimensionality;
    use crate::convex::{Relation, ScpVariables};
    use crate::dynamics::{DoubleIntegrator, DynamicsModel, Unicycle3d};
    use crate::environment::{Environment, Zone};
    use crate::goals::GoalSet;
    use crate::params::ScpParam;
    use crate::problem::{ProblemDefinition, TrajectoryOptimizationProblem};
    use crate::robot::FreeFlyer;
    use crate::trajectory::Trajectory;
    use approx::assert_relative_eq;
    use nalgebra::DVector;
    use std::sync::Arc;

    fn problem(environment: Environment, unicycle: bool) -> TrajectoryOptimizationProblem {
        let model: Arc<dyn DynamicsModel> = if unicycle {
            Arc::new(Unicycle3d)
        } else {
            Arc::new(DoubleIntegrator::default())
        };
        let x_dim = model.x_dim();
        let definition = ProblemDefinition::new(
            Arc::new(FreeFlyer::unlimited(0.5)),
            model,
            environment,
            DVector::zeros(x_dim),
            GoalSet::new(),
        )
        .expect("definition");
        TrajectoryOptimizationProblem::discretize(definition, 5, 4.0, false).expect("discretize")
    }

    #[test]
    fn test_dynamics_rows_exact_at_estimate() {
        let problem = problem(Environment::default(), true);
        let param = ScpParam::default();
        let vars = ScpVariables::new(4, 3, 5, None);
        let mut estimate = Trajectory::zeros(4, 3, 5, 4.0);
        for k in 0..5 {
            estimate.x[(0, k)] = 0.3 * k as f64;
            estimate.x[(3, k)] = 0.2 * k as f64;
            estimate.u[(0, k)] = 1.0;
            estimate.u[(2, k)] = -0.5;
        }
        let ctx = GenerationContext {
            problem: &problem,
            param: &param,
            vars: &vars,
            estimate: &estimate,
            trust_radius: 1.0,
        };
        let category = ConstraintCategory::new("dynamics", Arc::new(DynamicsGenerator), Dimensionality::PerTime)
            .with_time_indices((0..4).collect());
        let rows = DynamicsGenerator.generate(&category, &ctx);
        assert_eq!(rows.len(), 16);
        assert!(rows.iter().all(|row| row.relation == Relation::Eq));

        // Rows evaluated at the estimate give the Euler defect
        let z = vars.pack(&estimate);
        let model = Unicycle3d;
        let mut expected = 0.0;
        for k in 0..4 {
            let f = model.dynamics(&estimate.state(k), &estimate.control(k));
            let defect = estimate.state(k + 1) - estimate.state(k) - f * estimate.dt();
            expected += defect.abs().sum();
        }
        let from_rows: f64 = rows.iter().map(|row| row.violation(&z)).sum();
        assert_relative_eq!(from_rows, expected, epsilon = 1e-12);
        assert_relative_eq!(category.violation(&ctx), expected, epsilon = 1e-12);
    }

    #[test]
    fn test_keep_out_toggle_and_rows() {
        let zone = Zone::new_sphere(nalgebra::Vector3::new(2.0, 2.0, 0.0), 1.0).expect("zone");
        let problem = problem(Environment::new(Vec::new(), vec![zone]), false);
        let vars = ScpVariables::new(6, 3, 5, None);
        let estimate = Trajectory::zeros(6, 3, 5, 4.0);
        let category = ConstraintCategory::new("keep_out", Arc::new(KeepOutGenerator), Dimensionality::PerTime)
            .with_time_indices((0..5).collect())
            .with_aux_indices(vec![0])
            .with_params(vec![0.1]);

        // Clearance from the origin: sqrt(8) - 1 - 0.5
        let clearance = 8f64.sqrt() - 1.5;
        let mut param = ScpParam::default();
        for (toggle, active) in [(clearance + 0.01, true), (clearance - 0.01, false)] {
            param.obstacle_toggle_distance = toggle;
            let ctx = GenerationContext {
                problem: &problem,
                param: &param,
                vars: &vars,
                estimate: &estimate,
                trust_radius: 1.0,
            };
            assert_eq!(KeepOutGenerator.is_active(&category, &ctx), active, "toggle {}", toggle);
        }

        let ctx = GenerationContext {
            problem: &problem,
            param: &param,
            vars: &vars,
            estimate: &estimate,
            trust_radius: 1.0,
        };
        let rows = KeepOutGenerator.generate(&category, &ctx);
        assert_eq!(rows.len(), 5);
        // -g'p <= d - margin with g pointing away from the zone
        let g = -nalgebra::Vector3::new(1.0, 1.0, 0.0).normalize();
        assert_eq!(rows[0].coeffs.len(), 2);
        assert_relative_eq!(rows[0].coeffs[0].1, -g.x, epsilon = 1e-4);
        assert_relative_eq!(rows[0].rhs, clearance - 0.1, epsilon = 1e-4);
        assert_relative_eq!(category.violation(&ctx), 0.0);
    }

    #[test]
    fn test_trust_region_and_bounds() {
        let problem = problem(Environment::default(), false);
        let param = ScpParam::default();
        let vars = ScpVariables::new(6, 3, 5, None);
        let estimate = Trajectory::zeros(6, 3, 5, 4.0);
        let ctx = GenerationContext {
            problem: &problem,
            param: &param,
            vars: &vars,
            estimate: &estimate,
            trust_radius: 0.5,
        };

        let tf_region = ConstraintCategory::new(
            "tf",
            Arc::new(TrustRegionGenerator { target: TrustRegionTarget::FinalTime }),
            Dimensionality::Scalar,
        );
        let rows = tf_region.generator.generate(&tf_region, &ctx);
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].rhs, 4.5);
        assert_eq!(rows[1].rhs, -3.5);

        let bounds = ConstraintCategory::new("u", Arc::new(BoxGenerator { target: Target::Control }), Dimensionality::PerControl)
            .with_time_indices(vec![0, 1])
            .with_aux_indices(vec![0, 2])
            .with_params(vec![-1.0, f64::NEG_INFINITY, 1.0, 2.0]);
        let rows = bounds.generator.generate(&bounds, &ctx);
        // u0 in [-1, 1], u2 <= 2, for two steps
        assert_eq!(rows.len(), 6);
        assert_eq!(rows[0].coeffs, vec![(vars.u(0, 0), 1.0)]);
        assert_eq!(rows[2].coeffs, vec![(vars.u(2, 0), 1.0)]);
    }
}
