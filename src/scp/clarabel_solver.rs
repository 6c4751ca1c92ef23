//! Convex solver adapter over Clarabel (pure Rust interior point solver).

use std::collections::BTreeMap;

use clarabel::algebra::CscMatrix;
use clarabel::solver::{
    DefaultSettingsBuilder, DefaultSolver, IPSolver, SolverStatus as ClarabelStatus,
    SupportedConeT::{NonnegativeConeT, ZeroConeT},
};
use tracing::warn;

use crate::convex::{ConvexModel, ConvexSolution, ConvexSolver, Relation, SolverStatus};

/// Clarabel settings used for every subproblem.
#[derive(Debug, Clone)]
pub struct ClarabelSolver {
    pub max_iterations: u32,
    pub tolerance: f64,
    /// Time limit of one solve in seconds.
    pub time_limit: f64,
    pub verbose: bool,
}

impl Default for ClarabelSolver {
    fn default() -> Self {
        ClarabelSolver {
            max_iterations: 200,
            tolerance: 1e-8,
            time_limit: f64::INFINITY,
            verbose: false,
        }
    }
}

/// Builds a CSC matrix from (row, col, value) triplets, summing duplicates.
fn triplets_to_csc(nrows: usize, ncols: usize, triplets: &[(usize, usize, f64)]) -> CscMatrix<f64> {
    let mut entries: BTreeMap<(usize, usize), f64> = BTreeMap::new();
    for &(row, col, value) in triplets {
        *entries.entry((col, row)).or_insert(0.0) += value;
    }

    let mut colptr = vec![0usize; ncols + 1];
    let mut rowval = Vec::with_capacity(entries.len());
    let mut nzval = Vec::with_capacity(entries.len());
    for ((col, row), value) in entries {
        if value != 0.0 {
            rowval.push(row);
            nzval.push(value);
            colptr[col + 1] += 1;
        }
    }
    for col in 0..ncols {
        colptr[col + 1] += colptr[col];
    }
    CscMatrix::new(nrows, ncols, colptr, rowval, nzval)
}

fn convert_status(status: ClarabelStatus) -> SolverStatus {
    match status {
        ClarabelStatus::Solved => SolverStatus::Solved,
        ClarabelStatus::AlmostSolved => SolverStatus::AlmostSolved,
        ClarabelStatus::PrimalInfeasible | ClarabelStatus::AlmostPrimalInfeasible => {
            SolverStatus::Infeasible
        }
        ClarabelStatus::DualInfeasible | ClarabelStatus::AlmostDualInfeasible => {
            SolverStatus::Unbounded
        }
        ClarabelStatus::MaxIterations => SolverStatus::MaxIterations,
        ClarabelStatus::MaxTime => SolverStatus::TimeLimit,
        _ => SolverStatus::NumericalError,
    }
}

impl ConvexSolver for ClarabelSolver {
    fn name(&self) -> &str {
        "clarabel"
    }

    fn solve(&self, model: &ConvexModel) -> ConvexSolution {
        // Clarabel wants equalities (zero cone) first, then inequalities (non-negative cone).
        let mut order: Vec<usize> = Vec::with_capacity(model.rows.len());
        order.extend((0..model.rows.len()).filter(|&r| model.rows[r].relation == Relation::Eq));
        let n_eq = order.len();
        order.extend((0..model.rows.len()).filter(|&r| model.rows[r].relation == Relation::Le));
        let n_ineq = order.len() - n_eq;

        let mut a_triplets = Vec::new();
        let mut b = Vec::with_capacity(order.len());
        for (clarabel_row, &model_row) in order.iter().enumerate() {
            let row = &model.rows[model_row];
            a_triplets.extend(row.coeffs.iter().map(|&(var, a)| (clarabel_row, var, a)));
            b.push(row.rhs);
        }

        let p = triplets_to_csc(model.n_vars, model.n_vars, &model.p_upper);
        let a = triplets_to_csc(order.len(), model.n_vars, &a_triplets);
        let mut cones = Vec::with_capacity(2);
        if n_eq > 0 {
            cones.push(ZeroConeT(n_eq));
        }
        if n_ineq > 0 {
            cones.push(NonnegativeConeT(n_ineq));
        }

        let settings = match DefaultSettingsBuilder::default()
            .max_iter(self.max_iterations)
            .verbose(self.verbose)
            .time_limit(self.time_limit)
            .tol_gap_abs(self.tolerance)
            .tol_gap_rel(self.tolerance)
            .tol_feas(self.tolerance)
            .build()
        {
            Ok(settings) => settings,
            Err(e) => {
                warn!("Invalid Clarabel settings: {:?}", e);
                return ConvexSolution::failed(SolverStatus::NumericalError);
            }
        };

        let mut solver = match DefaultSolver::new(&p, &model.q, &a, &b, &cones, settings) {
            Ok(solver) => solver,
            Err(e) => {
                warn!("Clarabel rejected the problem: {:?}", e);
                return ConvexSolution::failed(SolverStatus::NumericalError);
            }
        };
        solver.solve();

        let solution = &solver.solution;
        let status = convert_status(solution.status);
        if !status.is_success() {
            return ConvexSolution::failed(status);
        }

        let mut dual = vec![0.0; model.rows.len()];
        for (clarabel_row, &model_row) in order.iter().enumerate() {
            dual[model_row] = solution.z[clarabel_row];
        }
        ConvexSolution {
            status,
            primal: solution.x.clone(),
            dual,
            objective: model.objective(&solution.x),
        }
    }
}
