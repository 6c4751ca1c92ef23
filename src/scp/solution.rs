//! Records of an SCP run.

use std::fmt;
use std::time::Duration;

use nalgebra::DMatrix;

use crate::constraints::ScpConstraints;
use crate::convex::SolverStatus;
use crate::trajectory::Trajectory;

/// Outcome of one SCP iteration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IterationStatus {
    /// Candidate taken as the new trajectory
    Accepted,
    /// Candidate discarded, trust region shrunk
    Rejected,
    /// The model predicts no meaningful improvement
    Stationary,
    /// The convex solver did not produce a usable solution
    SolverFailed,
    /// No subproblem solved: the penalty grew and the stored trajectory was re-priced
    PenaltyIncreased,
}

/// State of the SCP iteration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScpStatus {
    Initialized,
    Iterating,
    Converged,
    MaxIterExceeded,
    Infeasible,
    TimeLimitExceeded,
}

impl ScpStatus {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, ScpStatus::Initialized | ScpStatus::Iterating)
    }
}

impl fmt::Display for ScpStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

/// What happened in one iteration.
#[derive(Debug, Clone)]
pub struct IterationRecord {
    pub iteration: usize,
    /// Merit of the stored trajectory after this iteration
    pub j_true: f64,
    /// True merit of the candidate (NaN if the solver failed)
    pub j_candidate: f64,
    /// Merit of the candidate as predicted by the convex model (NaN if the solver failed)
    pub j_model: f64,
    pub solver_status: SolverStatus,
    pub status: IterationStatus,
    pub accepted: bool,
    /// Relative merit change, infinite for rejected iterations and solver failures
    pub convergence_measure: f64,
    /// Trust region radius used to build the subproblem
    pub trust_radius: f64,
    /// Penalty weight used in this iteration
    pub penalty: f64,
    /// True constraint violation of the stored trajectory after this iteration
    pub violation: f64,
    /// Time since the start of the run
    pub elapsed: Duration,
    /// Stored trajectory after this iteration
    pub trajectory: Trajectory,
}

/// Append-only history collected while the iteration runs.
#[derive(Debug, Default)]
pub struct ScpHistory {
    records: Vec<IterationRecord>,
}

impl ScpHistory {
    pub fn new() -> Self {
        ScpHistory::default()
    }

    pub fn push(&mut self, record: IterationRecord) {
        self.records.push(record);
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn last(&self) -> Option<&IterationRecord> {
        self.records.last()
    }

    /// Freezes the history into the solution of the run.
    pub fn finish(self, outcome: ScpOutcome) -> ScpSolution {
        ScpSolution {
            records: self.records,
            trajectory: outcome.trajectory,
            dynamics_duals: outcome.dynamics_duals,
            constraints: outcome.constraints,
            status: outcome.status,
            successful: outcome.successful,
            penalty: outcome.penalty,
            violation: outcome.violation,
            merit: outcome.merit,
            total_time: outcome.total_time,
        }
    }
}

/// Final state of a run, passed to [`ScpHistory::finish`].
pub struct ScpOutcome {
    pub trajectory: Trajectory,
    pub dynamics_duals: Option<DMatrix<f64>>,
    pub constraints: ScpConstraints,
    pub status: ScpStatus,
    pub successful: bool,
    pub penalty: f64,
    pub violation: f64,
    pub merit: f64,
    pub total_time: Duration,
}

/// Frozen result of an SCP run.
#[derive(Debug, Clone)]
pub struct ScpSolution {
    records: Vec<IterationRecord>,
    trajectory: Trajectory,
    dynamics_duals: Option<DMatrix<f64>>,
    constraints: ScpConstraints,
    status: ScpStatus,
    successful: bool,
    penalty: f64,
    violation: f64,
    merit: f64,
    total_time: Duration,
}

impl ScpSolution {
    pub fn records(&self) -> &[IterationRecord] {
        &self.records
    }

    /// Final (stored) trajectory.
    pub fn trajectory(&self) -> &Trajectory {
        &self.trajectory
    }

    /// Duals of the dynamics rows of the last solved subproblem, one column per
    /// transition. None if no subproblem was ever solved.
    pub fn dynamics_duals(&self) -> Option<&DMatrix<f64>> {
        self.dynamics_duals.as_ref()
    }

    /// Constraint registry as it was at termination.
    pub fn constraints(&self) -> &ScpConstraints {
        &self.constraints
    }

    pub fn status(&self) -> ScpStatus {
        self.status
    }

    pub fn converged(&self) -> bool {
        self.status == ScpStatus::Converged
    }

    /// Converged, or stopped by a limit with a trajectory that satisfies the constraints.
    pub fn successful(&self) -> bool {
        self.successful
    }

    /// Number of subproblems attempted. Penalty increases are recorded but not counted.
    pub fn iterations(&self) -> usize {
        self.records
            .iter()
            .filter(|r| r.status != IterationStatus::PenaltyIncreased)
            .count()
    }

    /// Penalty weight at termination.
    pub fn penalty(&self) -> f64 {
        self.penalty
    }

    /// True constraint violation of the final trajectory.
    pub fn violation(&self) -> f64 {
        self.violation
    }

    pub fn merit(&self) -> f64 {
        self.merit
    }

    pub fn total_time(&self) -> Duration {
        self.total_time
    }

    pub fn accepted_count(&self) -> usize {
        self.records.iter().filter(|r| r.accepted).count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(iteration: usize, status: IterationStatus) -> IterationRecord {
        IterationRecord {
            iteration,
            j_true: 1.0,
            j_candidate: 0.5,
            j_model: 0.4,
            solver_status: SolverStatus::Solved,
            status,
            accepted: status == IterationStatus::Accepted,
            convergence_measure: 0.5,
            trust_radius: 1.0,
            penalty: 10.0,
            violation: 0.0,
            elapsed: Duration::from_millis(iteration as u64),
            trajectory: Trajectory::zeros(2, 1, 3, 1.0),
        }
    }

    #[test]
    fn test_history_frozen_into_solution() {
        let mut history = ScpHistory::new();
        assert!(history.is_empty());
        history.push(record(0, IterationStatus::Accepted));
        history.push(record(1, IterationStatus::Rejected));
        history.push(record(1, IterationStatus::PenaltyIncreased));
        history.push(record(2, IterationStatus::Stationary));
        assert_eq!(history.last().map(|r| r.iteration), Some(2));
        assert_eq!(history.len(), 4);

        let solution = history.finish(ScpOutcome {
            trajectory: Trajectory::zeros(2, 1, 3, 1.0),
            dynamics_duals: None,
            constraints: ScpConstraints::new(),
            status: ScpStatus::Converged,
            successful: true,
            penalty: 10.0,
            violation: 0.0,
            merit: 1.0,
            total_time: Duration::from_millis(3),
        });
        assert_eq!(solution.iterations(), 3);
        assert_eq!(solution.accepted_count(), 1);
        assert!(solution.converged() && solution.successful());
        assert!(solution.status().is_terminal());
        assert!(!ScpStatus::Iterating.is_terminal());
    }
}
