//! Constraint taxonomy of the SCP iteration.
//!
//! Every constraint family is a [`ConstraintCategory`] stored in exactly one of the
//! eighteen [`ConstraintSlot`]s of the [`ScpConstraints`] registry. The slot tells how
//! the family is treated:
//!
//! - convex families are generated once at setup and sent to the solver as they are,
//! - nonconvex families are never sent to the solver. They measure the true violation
//!   and produce their convexified counterpart about the current estimate,
//! - convexified, dynamics and trust region families are regenerated every iteration.
//!
//! Rows of convexified and dynamics families are soft: the assembler pairs them with
//! non-negative slack variables that carry the exact penalty.

use std::fmt;
use std::ops::Range;
use std::sync::Arc;

use bitflags::bitflags;

use crate::convex::{ConvexModel, LinearRow, Relation, ScpVariables};
use crate::error::{Result, TrajoptError};
use crate::params::ScpParam;
use crate::problem::TrajectoryOptimizationProblem;
use crate::trajectory::Trajectory;

bitflags! {
    /// How the families of one slot are treated by the iteration.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct SlotTraits: u8 {
        /// Rows are equalities (inequalities otherwise)
        const EQUALITY =      0b0000_0001;

        /// True nonlinear family. Never sent to the solver directly.
        const NONCONVEX =     0b0000_0010;

        /// Linearization of a nonconvex family about the current estimate
        const CONVEXIFIED =   0b0000_0100;

        /// Constrains the initial or the final step only
        const BOUNDARY =      0b0000_1000;

        /// Rebuilt at every iteration
        const PER_ITERATION = 0b0001_0000;

        /// Trust region around the current estimate
        const TRUST_REGION =  0b0010_0000;
    }
}

/// Slots of the constraint registry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ConstraintSlot {
    Dynamics,
    ConvexStateEq,
    ConvexStateIneq,
    NonconvexStateEq,
    NonconvexStateIneq,
    NonconvexStateConvexifiedEq,
    NonconvexStateConvexifiedIneq,
    ConvexBoundaryConditionEq,
    ConvexBoundaryConditionIneq,
    NonconvexBoundaryConditionEq,
    NonconvexBoundaryConditionIneq,
    NonconvexBoundaryConditionConvexifiedEq,
    NonconvexBoundaryConditionConvexifiedIneq,
    ConvexControlEq,
    ConvexControlIneq,
    StateTrustRegionIneq,
    ControlTrustRegionIneq,
    FinalTimeTrustRegionIneq,
}

pub const SLOT_COUNT: usize = 18;

impl ConstraintSlot {
    pub const ALL: [ConstraintSlot; SLOT_COUNT] = [
        ConstraintSlot::Dynamics,
        ConstraintSlot::ConvexStateEq,
        ConstraintSlot::ConvexStateIneq,
        ConstraintSlot::NonconvexStateEq,
        ConstraintSlot::NonconvexStateIneq,
        ConstraintSlot::NonconvexStateConvexifiedEq,
        ConstraintSlot::NonconvexStateConvexifiedIneq,
        ConstraintSlot::ConvexBoundaryConditionEq,
        ConstraintSlot::ConvexBoundaryConditionIneq,
        ConstraintSlot::NonconvexBoundaryConditionEq,
        ConstraintSlot::NonconvexBoundaryConditionIneq,
        ConstraintSlot::NonconvexBoundaryConditionConvexifiedEq,
        ConstraintSlot::NonconvexBoundaryConditionConvexifiedIneq,
        ConstraintSlot::ConvexControlEq,
        ConstraintSlot::ConvexControlIneq,
        ConstraintSlot::StateTrustRegionIneq,
        ConstraintSlot::ControlTrustRegionIneq,
        ConstraintSlot::FinalTimeTrustRegionIneq,
    ];

    pub fn index(self) -> usize {
        self as usize
    }

    pub fn traits(self) -> SlotTraits {
        use ConstraintSlot::*;
        let eq = SlotTraits::EQUALITY;
        let nonconvex = SlotTraits::NONCONVEX;
        let convexified = SlotTraits::CONVEXIFIED | SlotTraits::PER_ITERATION;
        let boundary = SlotTraits::BOUNDARY;
        let trust = SlotTraits::TRUST_REGION | SlotTraits::PER_ITERATION;
        match self {
            Dynamics => eq | convexified,
            ConvexStateEq => eq,
            ConvexStateIneq => SlotTraits::empty(),
            NonconvexStateEq => eq | nonconvex,
            NonconvexStateIneq => nonconvex,
            NonconvexStateConvexifiedEq => eq | convexified,
            NonconvexStateConvexifiedIneq => convexified,
            ConvexBoundaryConditionEq => eq | boundary,
            ConvexBoundaryConditionIneq => boundary,
            NonconvexBoundaryConditionEq => eq | boundary | nonconvex,
            NonconvexBoundaryConditionIneq => boundary | nonconvex,
            NonconvexBoundaryConditionConvexifiedEq => eq | boundary | convexified,
            NonconvexBoundaryConditionConvexifiedIneq => boundary | convexified,
            ConvexControlEq => eq,
            ConvexControlIneq => SlotTraits::empty(),
            StateTrustRegionIneq | ControlTrustRegionIneq | FinalTimeTrustRegionIneq => trust,
        }
    }

    pub fn is_equality(self) -> bool {
        self.traits().contains(SlotTraits::EQUALITY)
    }

    pub fn is_nonconvex(self) -> bool {
        self.traits().contains(SlotTraits::NONCONVEX)
    }

    pub fn is_boundary(self) -> bool {
        self.traits().contains(SlotTraits::BOUNDARY)
    }

    pub fn is_per_iteration(self) -> bool {
        self.traits().contains(SlotTraits::PER_ITERATION)
    }

    /// Rows of this slot are soft (paired with penalized slack variables).
    pub fn is_soft(self) -> bool {
        self.traits().contains(SlotTraits::CONVEXIFIED)
    }

    /// Families in this slot go to the convex solver.
    pub fn is_sent_to_solver(self) -> bool {
        !self.is_nonconvex()
    }

    /// Families in this slot count towards the true constraint violation.
    pub fn counts_in_violation(self) -> bool {
        self == ConstraintSlot::Dynamics || self.is_nonconvex()
    }

    /// Slot receiving the linearization of a nonconvex family of this slot.
    pub fn convexified(self) -> Option<ConstraintSlot> {
        use ConstraintSlot::*;
        match self {
            NonconvexStateEq => Some(NonconvexStateConvexifiedEq),
            NonconvexStateIneq => Some(NonconvexStateConvexifiedIneq),
            NonconvexBoundaryConditionEq => Some(NonconvexBoundaryConditionConvexifiedEq),
            NonconvexBoundaryConditionIneq => Some(NonconvexBoundaryConditionConvexifiedIneq),
            _ => None,
        }
    }

    /// Relation of the rows generated for this slot.
    pub fn relation(self) -> Relation {
        if self.is_equality() { Relation::Eq } else { Relation::Le }
    }
}

impl fmt::Display for ConstraintSlot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

/// What the time and auxiliary indices of a category run over.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Dimensionality {
    /// One row per constrained state coordinate and time step
    PerState,
    /// One row per constrained control coordinate and time step
    PerControl,
    /// Vector valued per time step (dynamics, collision)
    PerTime,
    /// Single rows independent of time (final time)
    Scalar,
}

/// Everything a generator may look at to produce rows.
pub struct GenerationContext<'a> {
    pub problem: &'a TrajectoryOptimizationProblem,
    pub param: &'a ScpParam,
    pub vars: &'a ScpVariables,
    /// Trajectory about that nonconvex families are linearized.
    pub estimate: &'a Trajectory,
    pub trust_radius: f64,
}

/// Produces the linear rows of one constraint family.
///
/// Linearizations must be exact at the estimate: the rows generated about a trajectory
/// and evaluated at the same trajectory measure its true violation. The default
/// [`ConstraintGenerator::violation`] relies on this.
pub trait ConstraintGenerator: Send + Sync {
    fn name(&self) -> &str;

    /// Rows of the (convexified) family about `ctx.estimate`.
    fn generate(&self, category: &ConstraintCategory, ctx: &GenerationContext) -> Vec<LinearRow>;

    /// Checks that the indices and parameters of the family fit this generator and the
    /// problem. Generators index into both without further checks.
    fn check(&self, _category: &ConstraintCategory, _problem: &TrajectoryOptimizationProblem) -> std::result::Result<(), String> {
        Ok(())
    }

    /// Whether the family takes part in the iteration with this estimate.
    fn is_active(&self, _category: &ConstraintCategory, _ctx: &GenerationContext) -> bool {
        true
    }

    /// True L1 violation of `ctx.estimate`.
    fn violation(&self, category: &ConstraintCategory, ctx: &GenerationContext) -> f64 {
        let z = ctx.vars.pack(ctx.estimate);
        self.generate(category, ctx)
            .iter()
            .map(|row| row.violation(&z))
            .sum()
    }
}

/// One family of constraints.
#[derive(Clone)]
pub struct ConstraintCategory {
    pub name: String,
    pub generator: Arc<dyn ConstraintGenerator>,
    pub dimensionality: Dimensionality,
    /// Time steps the family constrains
    pub time_indices: Vec<usize>,
    /// Coordinates or zones the family refers to, depending on the generator
    pub aux_indices: Vec<usize>,
    /// Numeric parameters interpreted by the generator
    pub params: Vec<f64>,
    /// Rows of the last generation
    pub rows: Vec<LinearRow>,
    /// Rows of the last assembled model that came from this family
    pub model_rows: Range<usize>,
    /// Slack variables of the last assembled model that belong to this family
    pub slack_vars: Range<usize>,
}

impl ConstraintCategory {
    pub fn new(
        name: impl Into<String>,
        generator: Arc<dyn ConstraintGenerator>,
        dimensionality: Dimensionality,
    ) -> Self {
        ConstraintCategory {
            name: name.into(),
            generator,
            dimensionality,
            time_indices: Vec::new(),
            aux_indices: Vec::new(),
            params: Vec::new(),
            rows: Vec::new(),
            model_rows: 0..0,
            slack_vars: 0..0,
        }
    }

    pub fn with_time_indices(mut self, time_indices: Vec<usize>) -> Self {
        self.time_indices = time_indices;
        self
    }

    pub fn with_aux_indices(mut self, aux_indices: Vec<usize>) -> Self {
        self.aux_indices = aux_indices;
        self
    }

    pub fn with_params(mut self, params: Vec<f64>) -> Self {
        self.params = params;
        self
    }

    /// Rejects a family whose time steps, indices or parameters do not fit the problem.
    pub fn check(&self, problem: &TrajectoryOptimizationProblem) -> Result<()> {
        let invalid = |reason: String| {
            TrajoptError::InvalidParameter(format!("constraint family '{}': {}", self.name, reason))
        };
        if let Some(k) = self.time_indices.iter().find(|&&k| k >= problem.steps()) {
            return Err(invalid(format!("time index {} beyond {} steps", k, problem.steps())));
        }
        self.generator.check(self, problem).map_err(invalid)
    }

    /// Regenerates the rows about the estimate of the context.
    pub fn generate(&mut self, ctx: &GenerationContext) {
        self.rows = self.generator.generate(self, ctx);
    }

    pub fn violation(&self, ctx: &GenerationContext) -> f64 {
        self.generator.violation(self, ctx)
    }

    /// Copy of this family meant for a convexified slot, with rows generated about the estimate.
    pub fn convexified(&self, ctx: &GenerationContext) -> ConstraintCategory {
        let mut category = self.clone();
        category.name = format!("{} (convexified)", self.name);
        category.model_rows = 0..0;
        category.slack_vars = 0..0;
        category.generate(ctx);
        category
    }
}

impl fmt::Debug for ConstraintCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConstraintCategory")
            .field("name", &self.name)
            .field("generator", &self.generator.name())
            .field("dimensionality", &self.dimensionality)
            .field("time_indices", &self.time_indices.len())
            .field("aux_indices", &self.aux_indices)
            .field("params", &self.params)
            .field("rows", &self.rows.len())
            .field("model_rows", &self.model_rows)
            .field("slack_vars", &self.slack_vars)
            .finish()
    }
}

/// Registry of all constraint families, one list per slot.
#[derive(Debug, Clone, Default)]
pub struct ScpConstraints {
    slots: [Vec<ConstraintCategory>; SLOT_COUNT],
}

impl ScpConstraints {
    pub fn new() -> Self {
        ScpConstraints::default()
    }

    pub fn add(&mut self, slot: ConstraintSlot, category: ConstraintCategory) {
        self.slots[slot.index()].push(category);
    }

    pub fn get(&self, slot: ConstraintSlot) -> &[ConstraintCategory] {
        &self.slots[slot.index()]
    }

    pub fn get_mut(&mut self, slot: ConstraintSlot) -> &mut Vec<ConstraintCategory> {
        &mut self.slots[slot.index()]
    }

    /// All families with their slot, in slot order.
    pub fn iter(&self) -> impl Iterator<Item = (ConstraintSlot, &ConstraintCategory)> {
        ConstraintSlot::ALL
            .iter()
            .flat_map(move |slot| self.get(*slot).iter().map(move |category| (*slot, category)))
    }

    /// Total number of families.
    pub fn len(&self) -> usize {
        self.slots.iter().map(Vec::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Number of rows generated for families that go to the solver.
    pub fn solver_row_count(&self) -> usize {
        self.iter()
            .filter(|(slot, _)| slot.is_sent_to_solver())
            .map(|(_, category)| category.rows.len())
            .sum()
    }

    /// Removes all families regenerated at every iteration.
    pub fn clear_per_iteration(&mut self) {
        for slot in ConstraintSlot::ALL {
            if slot.is_per_iteration() {
                self.slots[slot.index()].clear();
            }
        }
    }

    /// Rebuilds the convexified counterparts of all nonconvex families about the estimate.
    /// Inactive families (for instance distant keep-out zones) are left out for this
    /// iteration. Returns the number of families left out.
    pub fn convexify(&mut self, ctx: &GenerationContext) -> usize {
        let mut omitted = 0;
        for slot in ConstraintSlot::ALL {
            let Some(target) = slot.convexified() else {
                continue;
            };
            let mut produced = Vec::new();
            for category in self.get(slot) {
                if category.generator.is_active(category, ctx) {
                    produced.push(category.convexified(ctx));
                } else {
                    omitted += 1;
                }
            }
            self.slots[target.index()] = produced;
        }
        omitted
    }

    /// True L1 violation of the estimate over dynamics and nonconvex families.
    pub fn violation(&self, ctx: &GenerationContext) -> f64 {
        self.iter()
            .filter(|(slot, _)| slot.counts_in_violation())
            .map(|(_, category)| category.violation(ctx))
            .sum()
    }

    /// Appends the rows of every solver family to the model, with slack variables for soft
    /// rows, and records the model rows and slacks of each family. Slack variables cost
    /// `penalty` each.
    pub fn assemble_into(&mut self, model: &mut ConvexModel, penalty: f64) {
        for slot in ConstraintSlot::ALL {
            if !slot.is_sent_to_solver() {
                continue;
            }
            let soft = slot.is_soft();
            for category in self.slots[slot.index()].iter_mut() {
                let first_row = model.rows.len();
                let first_slack = model.n_vars;
                for row in &category.rows {
                    let mut row = row.clone();
                    if soft || row.soft {
                        row.soft = true;
                        match row.relation {
                            Relation::Eq => {
                                let minus = model.add_variable();
                                let plus = model.add_variable();
                                row.coeffs.push((minus, 1.0));
                                row.coeffs.push((plus, -1.0));
                            }
                            Relation::Le => {
                                row.coeffs.push((model.add_variable(), -1.0));
                            }
                        }
                    }
                    model.rows.push(row);
                }
                for slack in first_slack..model.n_vars {
                    model.q[slack] = penalty;
                    model.rows.push(LinearRow::le(vec![(slack, -1.0)], 0.0));
                }
                category.model_rows = first_row..first_row + category.rows.len();
                category.slack_vars = first_slack..model.n_vars;
            }
        }
    }
}
