//! Parameters of the SCP iteration and of the shooting refinement.
//!
//! All structs implement `Default` with values that work for the bundled models.
//! With the `allow_filesystem` feature they can be read from YAML where every
//! omitted field keeps its default.

use std::time::Duration;

use crate::error::{Result, TrajoptError};

/// Trust region radius adaptation. The radius bounds the infinity norm of the
/// step of every state, control and final time variable.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "allow_filesystem", derive(serde::Deserialize))]
#[cfg_attr(feature = "allow_filesystem", serde(default))]
pub struct TrustRegionParam {
    pub initial_radius: f64,
    pub min_radius: f64,
    pub max_radius: f64,
    /// Steps with the ratio below this are rejected.
    pub rho0: f64,
    /// Accepted steps with the ratio below this shrink the radius.
    pub rho1: f64,
    /// Accepted steps with the ratio above this grow the radius.
    pub rho2: f64,
    pub shrink_factor: f64,
    pub grow_factor: f64,
}

impl Default for TrustRegionParam {
    fn default() -> Self {
        TrustRegionParam {
            initial_radius: 2.0,
            min_radius: 1e-4,
            max_radius: 20.0,
            rho0: 0.0,
            rho1: 0.25,
            rho2: 0.9,
            shrink_factor: 0.5,
            grow_factor: 2.0,
        }
    }
}

/// Penalty handling variant of the SCP iteration.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "allow_filesystem", derive(serde::Deserialize))]
#[cfg_attr(feature = "allow_filesystem", serde(rename_all = "snake_case"))]
pub enum ScpAlgorithm {
    /// Penalty fixed during a convexification loop, increased between loops
    /// that converge to a trajectory still violating constraints.
    TrajOpt {
        initial_penalty: f64,
        penalty_growth: f64,
        max_penalty: f64,
    },
    /// Penalty increased after every accepted iteration that still violates constraints.
    Gusto {
        initial_penalty: f64,
        penalty_growth: f64,
        max_penalty: f64,
    },
}

impl Default for ScpAlgorithm {
    fn default() -> Self {
        ScpAlgorithm::TrajOpt {
            initial_penalty: 10.0,
            penalty_growth: 10.0,
            max_penalty: 1e6,
        }
    }
}

impl ScpAlgorithm {
    pub fn name(&self) -> &'static str {
        match self {
            ScpAlgorithm::TrajOpt { .. } => "trajopt",
            ScpAlgorithm::Gusto { .. } => "gusto",
        }
    }

    /// (initial penalty, growth factor, maximal penalty)
    pub fn penalty(&self) -> (f64, f64, f64) {
        match *self {
            ScpAlgorithm::TrajOpt {
                initial_penalty,
                penalty_growth,
                max_penalty,
            }
            | ScpAlgorithm::Gusto {
                initial_penalty,
                penalty_growth,
                max_penalty,
            } => (initial_penalty, penalty_growth, max_penalty),
        }
    }
}

/// Indirect shooting refinement.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "allow_filesystem", derive(serde::Deserialize))]
#[cfg_attr(feature = "allow_filesystem", serde(default))]
pub struct ShootingParam {
    pub enabled: bool,
    pub max_iterations: usize,
    /// Residual infinity norm at which the Newton iteration stops.
    pub tolerance: f64,
    /// RK4 substeps per trajectory step.
    pub substeps: usize,
    /// Perturbation of the finite difference Jacobian.
    pub fd_step: f64,
    /// How many times the Newton step may be halved before giving up.
    pub max_step_halvings: usize,
}

impl Default for ShootingParam {
    fn default() -> Self {
        ShootingParam {
            enabled: true,
            max_iterations: 30,
            tolerance: 1e-6,
            substeps: 4,
            fd_step: 1e-6,
            max_step_halvings: 12,
        }
    }
}

/// Parameters of the SCP iteration.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "allow_filesystem", derive(serde::Deserialize))]
#[cfg_attr(feature = "allow_filesystem", serde(default))]
pub struct ScpParam {
    /// Pin the final time to the time guess instead of optimizing it.
    pub fixed_final_time: bool,
    /// Relative merit change under that an iteration counts as converged.
    pub convergence_threshold: f64,
    /// Consecutive converged iterations required to stop.
    pub convergence_count: usize,
    /// Keep-out zones farther than this from the whole trajectory are not linearized.
    pub obstacle_toggle_distance: f64,
    /// Clearance required from keep-out zones on top of touching.
    pub safety_margin: f64,
    /// True violation (L1) still accepted as feasible.
    pub violation_tolerance: f64,
    pub max_iterations: usize,
    /// Consecutive convex solver failures before the problem is declared infeasible.
    pub max_solver_retries: usize,
    /// Weight of the final time in the cost.
    pub time_weight: f64,
    /// Lower and upper bound of the final time when it is free.
    pub final_time_bounds: (f64, f64),
    /// Wall clock limit in seconds.
    pub time_limit: Option<f64>,
    pub trust_region: TrustRegionParam,
    pub algorithm: ScpAlgorithm,
    pub shooting: ShootingParam,
}

impl Default for ScpParam {
    fn default() -> Self {
        ScpParam {
            fixed_final_time: true,
            convergence_threshold: 1e-4,
            convergence_count: 2,
            obstacle_toggle_distance: 1.0,
            safety_margin: 0.05,
            violation_tolerance: 1e-3,
            max_iterations: 50,
            max_solver_retries: 3,
            time_weight: 1.0,
            final_time_bounds: (0.1, 1e3),
            time_limit: None,
            trust_region: TrustRegionParam::default(),
            algorithm: ScpAlgorithm::default(),
            shooting: ShootingParam::default(),
        }
    }
}

impl ScpParam {
    pub fn time_limit(&self) -> Option<Duration> {
        self.time_limit.map(Duration::from_secs_f64)
    }

    /// Checks ranges and internal consistency.
    pub fn validate(&self) -> Result<()> {
        let tr = &self.trust_region;
        let (penalty, growth, max_penalty) = self.algorithm.penalty();
        let checks: [(bool, &str); 11] = [
            (self.convergence_threshold > 0.0, "convergence_threshold must be positive"),
            (self.convergence_count >= 1, "convergence_count must be at least 1"),
            (self.max_iterations >= 1, "max_iterations must be at least 1"),
            (self.violation_tolerance >= 0.0, "violation_tolerance must not be negative"),
            (
                tr.min_radius > 0.0 && tr.min_radius <= tr.initial_radius && tr.initial_radius <= tr.max_radius,
                "trust region radii must satisfy 0 < min <= initial <= max",
            ),
            (
                tr.rho0 <= tr.rho1 && tr.rho1 <= tr.rho2,
                "trust region thresholds must satisfy rho0 <= rho1 <= rho2",
            ),
            (
                tr.shrink_factor > 0.0 && tr.shrink_factor < 1.0 && tr.grow_factor >= 1.0,
                "trust region factors must satisfy 0 < shrink < 1 <= grow",
            ),
            (penalty > 0.0 && penalty <= max_penalty, "penalty must satisfy 0 < initial <= max"),
            (growth > 1.0, "penalty_growth must exceed 1"),
            (
                self.final_time_bounds.0 > 0.0 && self.final_time_bounds.0 <= self.final_time_bounds.1,
                "final_time_bounds must satisfy 0 < lower <= upper",
            ),
            (
                self.time_limit.is_none_or(|limit| limit > 0.0 && limit.is_finite()),
                "time_limit must be positive",
            ),
        ];
        for (ok, message) in checks {
            if !ok {
                return Err(TrajoptError::InvalidParameter(message.to_string()));
            }
        }
        Ok(())
    }
}
