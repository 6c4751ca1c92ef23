//! Discretized state / control trajectory

use nalgebra::{DMatrix, DVector, Vector3};

use crate::dynamics::DynamicsModel;
use crate::error::{Result, TrajoptError};

/// States and controls at N time steps together with the final time. The time step is
/// always derived as `tf / (N - 1)` and cannot be set on its own. Cloning produces an
/// independent deep copy.
#[derive(Debug, Clone, PartialEq)]
pub struct Trajectory {
    /// States, one column per time step (x_dim × N)
    pub x: DMatrix<f64>,
    /// Controls, one column per time step (u_dim × N)
    pub u: DMatrix<f64>,
    /// Final time
    pub tf: f64,
}

impl Trajectory {
    pub fn new(x: DMatrix<f64>, u: DMatrix<f64>, tf: f64) -> Result<Self> {
        if x.ncols() != u.ncols() {
            return Err(TrajoptError::dimension("trajectory steps", x.ncols(), u.ncols()));
        }
        if x.ncols() < 2 {
            return Err(TrajoptError::InvalidDiscretization(format!(
                "trajectory needs at least 2 steps, got {}",
                x.ncols()
            )));
        }
        Ok(Trajectory { x, u, tf })
    }

    /// All zero states and controls.
    pub fn zeros(x_dim: usize, u_dim: usize, n: usize, tf: f64) -> Self {
        Trajectory {
            x: DMatrix::zeros(x_dim, n),
            u: DMatrix::zeros(u_dim, n),
            tf,
        }
    }

    /// Number of time steps N.
    pub fn steps(&self) -> usize {
        self.x.ncols()
    }

    pub fn x_dim(&self) -> usize {
        self.x.nrows()
    }

    pub fn u_dim(&self) -> usize {
        self.u.nrows()
    }

    pub fn dt(&self) -> f64 {
        self.tf / (self.steps() - 1) as f64
    }

    pub fn time_at(&self, k: usize) -> f64 {
        k as f64 * self.dt()
    }

    pub fn state(&self, k: usize) -> DVector<f64> {
        self.x.column(k).into_owned()
    }

    pub fn control(&self, k: usize) -> DVector<f64> {
        self.u.column(k).into_owned()
    }

    /// Robot positions along the trajectory as extracted by the model.
    pub fn positions(&self, model: &dyn DynamicsModel) -> Vec<Vector3<f64>> {
        (0..self.steps())
            .map(|k| model.position(&self.state(k)))
            .collect()
    }

    /// Largest absolute difference between two trajectories of equal shape.
    pub fn max_difference(&self, other: &Trajectory) -> f64 {
        let dx = (&self.x - &other.x).amax();
        let du = (&self.u - &other.u).amax();
        dx.max(du).max((self.tf - other.tf).abs())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_dt_derived() {
        let mut trajectory = Trajectory::zeros(6, 3, 10, 9.0);
        assert_eq!(trajectory.dt(), 1.0);
        trajectory.tf = 18.0;
        assert_eq!(trajectory.dt(), 2.0);
        assert_eq!(trajectory.time_at(9), 18.0);
    }

    #[test]
    fn test_clone_is_deep() {
        let original = Trajectory::zeros(2, 1, 3, 1.0);
        let mut copy = original.clone();
        copy.x[(0, 1)] = 5.0;
        copy.u[(0, 2)] = -1.0;
        copy.tf = 4.0;
        assert_eq!(original.x[(0, 1)], 0.0);
        assert_eq!(original.u[(0, 2)], 0.0);
        assert_eq!(original.tf, 1.0);
        assert_eq!(copy.max_difference(&original), 5.0);
    }

    #[test]
    fn test_shape_checks() {
        assert!(Trajectory::new(DMatrix::zeros(2, 3), DMatrix::zeros(1, 4), 1.0).is_err());
        assert!(Trajectory::new(DMatrix::zeros(2, 1), DMatrix::zeros(1, 1), 1.0).is_err());
        assert!(Trajectory::new(DMatrix::zeros(2, 2), DMatrix::zeros(1, 2), 1.0).is_ok());
    }
}
