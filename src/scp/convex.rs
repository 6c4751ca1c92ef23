//! Convex subproblem representation exchanged with the convex solver.
//!
//! The SCP iteration assembles every active constraint category into one
//! [`ConvexModel`]: a quadratic cost over a flat variable vector and a list of
//! linear equality / inequality rows. Soft rows get non-negative slack variables
//! that the assembler appends after the trajectory variables and penalizes with
//! the exact penalty weight.

use std::fmt;

use nalgebra::DVector;

use crate::trajectory::Trajectory;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Relation {
    /// `a · z = b`
    Eq,
    /// `a · z <= b`
    Le,
}

/// One linear constraint over the variable vector.
#[derive(Debug, Clone, PartialEq)]
pub struct LinearRow {
    /// Sparse coefficients (variable index, value). Repeated indices add up.
    pub coeffs: Vec<(usize, f64)>,
    pub rhs: f64,
    pub relation: Relation,
    /// Soft rows may be violated at the cost of the penalty.
    pub soft: bool,
}

impl LinearRow {
    pub fn eq(coeffs: Vec<(usize, f64)>, rhs: f64) -> Self {
        LinearRow {
            coeffs,
            rhs,
            relation: Relation::Eq,
            soft: false,
        }
    }

    pub fn le(coeffs: Vec<(usize, f64)>, rhs: f64) -> Self {
        LinearRow {
            coeffs,
            rhs,
            relation: Relation::Le,
            soft: false,
        }
    }

    pub fn softened(mut self) -> Self {
        self.soft = true;
        self
    }

    pub fn evaluate(&self, z: &[f64]) -> f64 {
        self.coeffs.iter().map(|(i, a)| a * z[*i]).sum()
    }

    /// Amount by which `z` violates this row (zero if satisfied).
    pub fn violation(&self, z: &[f64]) -> f64 {
        let residual = self.evaluate(z) - self.rhs;
        match self.relation {
            Relation::Eq => residual.abs(),
            Relation::Le => residual.max(0.0),
        }
    }
}

/// Index handles of the trajectory variables inside the solver variable vector.
/// States come first (step major), then controls, then the final time if it is free.
/// A fixed final time is a constant, not a variable.
#[derive(Debug, Clone, PartialEq)]
pub struct ScpVariables {
    x_dim: usize,
    u_dim: usize,
    steps: usize,
    tf: Option<usize>,
    fixed_tf: f64,
}

impl ScpVariables {
    pub fn new(x_dim: usize, u_dim: usize, steps: usize, fixed_final_time: Option<f64>) -> Self {
        let free_tf = fixed_final_time.is_none();
        ScpVariables {
            x_dim,
            u_dim,
            steps,
            tf: free_tf.then_some((x_dim + u_dim) * steps),
            fixed_tf: fixed_final_time.unwrap_or(f64::NAN),
        }
    }

    pub fn x(&self, i: usize, k: usize) -> usize {
        k * self.x_dim + i
    }

    pub fn u(&self, i: usize, k: usize) -> usize {
        self.x_dim * self.steps + k * self.u_dim + i
    }

    /// Final time variable, None if the final time is pinned.
    pub fn tf(&self) -> Option<usize> {
        self.tf
    }

    pub fn fixed_final_time(&self) -> Option<f64> {
        self.tf.is_none().then_some(self.fixed_tf)
    }

    pub fn x_dim(&self) -> usize {
        self.x_dim
    }

    pub fn u_dim(&self) -> usize {
        self.u_dim
    }

    pub fn steps(&self) -> usize {
        self.steps
    }

    /// Number of trajectory variables (slack variables excluded).
    pub fn len(&self) -> usize {
        (self.x_dim + self.u_dim) * self.steps + usize::from(self.tf.is_some())
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Adds `coefficient * Tf` to the row: as a variable term if the final time
    /// is free, moved into the right hand side otherwise.
    pub fn add_tf_term(&self, coeffs: &mut Vec<(usize, f64)>, rhs: &mut f64, coefficient: f64) {
        match self.tf {
            Some(index) => coeffs.push((index, coefficient)),
            None => *rhs -= coefficient * self.fixed_tf,
        }
    }

    /// Flat variable vector of a trajectory.
    pub fn pack(&self, trajectory: &Trajectory) -> Vec<f64> {
        let mut z = vec![0.0; self.len()];
        for k in 0..self.steps {
            for i in 0..self.x_dim {
                z[self.x(i, k)] = trajectory.x[(i, k)];
            }
            for i in 0..self.u_dim {
                z[self.u(i, k)] = trajectory.u[(i, k)];
            }
        }
        if let Some(index) = self.tf {
            z[index] = trajectory.tf;
        }
        z
    }

    /// Trajectory read back from the solver primal. Slack variables are ignored.
    pub fn unpack(&self, z: &[f64]) -> Trajectory {
        let mut trajectory = Trajectory::zeros(self.x_dim, self.u_dim, self.steps, self.fixed_tf);
        for k in 0..self.steps {
            for i in 0..self.x_dim {
                trajectory.x[(i, k)] = z[self.x(i, k)];
            }
            for i in 0..self.u_dim {
                trajectory.u[(i, k)] = z[self.u(i, k)];
            }
        }
        if let Some(index) = self.tf {
            trajectory.tf = z[index];
        }
        trajectory
    }
}

/// Convex quadratic program `min 1/2 z'Pz + q'z` subject to linear rows.
#[derive(Debug, Clone, Default)]
pub struct ConvexModel {
    pub n_vars: usize,
    /// Upper triangular entries (row, col, value) of P. Duplicates add up.
    pub p_upper: Vec<(usize, usize, f64)>,
    pub q: Vec<f64>,
    pub rows: Vec<LinearRow>,
}

impl ConvexModel {
    pub fn new(n_vars: usize) -> Self {
        ConvexModel {
            n_vars,
            p_upper: Vec::new(),
            q: vec![0.0; n_vars],
            rows: Vec::new(),
        }
    }

    /// Appends a fresh variable and returns its index.
    pub fn add_variable(&mut self) -> usize {
        self.q.push(0.0);
        self.n_vars += 1;
        self.n_vars - 1
    }

    pub fn add_quadratic(&mut self, i: usize, j: usize, value: f64) {
        let (row, col) = if i <= j { (i, j) } else { (j, i) };
        self.p_upper.push((row, col, value));
    }

    pub fn objective(&self, z: &[f64]) -> f64 {
        let quadratic: f64 = self
            .p_upper
            .iter()
            .map(|&(i, j, v)| if i == j { 0.5 * v * z[i] * z[i] } else { v * z[i] * z[j] })
            .sum();
        let linear: f64 = self.q.iter().zip(z).map(|(q, z)| q * z).sum();
        quadratic + linear
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SolverStatus {
    Solved,
    AlmostSolved,
    Infeasible,
    Unbounded,
    NumericalError,
    TimeLimit,
    MaxIterations,
}

impl SolverStatus {
    /// True if the primal and dual solution can be used.
    pub fn is_success(&self) -> bool {
        matches!(self, SolverStatus::Solved | SolverStatus::AlmostSolved)
    }
}

impl fmt::Display for SolverStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

/// Result of a convex solve. Duals follow `grad(cost) + sum(y_i grad(row_i)) = 0`,
/// so inequality duals are non-negative.
#[derive(Debug, Clone)]
pub struct ConvexSolution {
    pub status: SolverStatus,
    pub primal: Vec<f64>,
    /// One dual per model row, in model row order.
    pub dual: Vec<f64>,
    pub objective: f64,
}

impl ConvexSolution {
    /// Solution without usable values.
    pub fn failed(status: SolverStatus) -> Self {
        ConvexSolution {
            status,
            primal: Vec::new(),
            dual: Vec::new(),
            objective: f64::NAN,
        }
    }

    pub fn duals(&self, rows: std::ops::Range<usize>) -> DVector<f64> {
        DVector::from_iterator(rows.len(), rows.map(|r| self.dual.get(r).copied().unwrap_or(0.0)))
    }
}

/// Convex QP solver consumed by the SCP iteration.
pub trait ConvexSolver: Send + Sync {
    fn name(&self) -> &str;

    /// Solves the model. Failures are reported through the status, never by panic.
    fn solve(&self, model: &ConvexModel) -> ConvexSolution;
}
