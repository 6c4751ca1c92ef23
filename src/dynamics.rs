//! Dynamics models: state / control dimensions, continuous dynamics and their linearization.

use nalgebra::{DMatrix, DVector, Vector3};

/// Continuous time dynamics `x' = f(x, u)` of the robot, with the hooks the SCP iteration
/// needs to linearize them. Implementations must be control affine for the shooting
/// refinement to be exact (B may depend on the state but not on the control).
pub trait DynamicsModel: Send + Sync {
    fn name(&self) -> &str;

    /// State dimension
    fn x_dim(&self) -> usize;

    /// Control dimension
    fn u_dim(&self) -> usize;

    /// Evaluates `f(x, u)`
    fn dynamics(&self, x: &DVector<f64>, u: &DVector<f64>) -> DVector<f64>;

    /// Jacobians `(A, B) = (df/dx, df/du)` at `(x, u)`.
    fn jacobians(&self, x: &DVector<f64>, u: &DVector<f64>) -> (DMatrix<f64>, DMatrix<f64>);

    /// State coordinates holding the robot position used for collision queries.
    fn position_indices(&self) -> [usize; 3] {
        [0, 1, 2]
    }

    fn position(&self, x: &DVector<f64>) -> Vector3<f64> {
        let [i, j, k] = self.position_indices();
        Vector3::new(x[i], x[j], x[k])
    }

    /// Lower and upper state bounds. Infinite entries are unbounded.
    fn state_bounds(&self) -> Option<(DVector<f64>, DVector<f64>)> {
        None
    }

    /// Diagonal of the control cost matrix R in the stage cost `u' R u`.
    fn control_weights(&self) -> DVector<f64> {
        DVector::from_element(self.u_dim(), 1.0)
    }
}

/// Point mass in 3D driven by acceleration. State `[position, velocity]`, control
/// is the acceleration. Linear, so a single convexification is exact.
#[derive(Debug, Clone)]
pub struct DoubleIntegrator {
    /// Maximal absolute velocity along every axis, if limited.
    pub max_velocity: Option<f64>,
}

impl Default for DoubleIntegrator {
    fn default() -> Self {
        DoubleIntegrator { max_velocity: None }
    }
}

impl DynamicsModel for DoubleIntegrator {
    fn name(&self) -> &str {
        "double_integrator"
    }

    fn x_dim(&self) -> usize {
        6
    }

    fn u_dim(&self) -> usize {
        3
    }

    fn dynamics(&self, x: &DVector<f64>, u: &DVector<f64>) -> DVector<f64> {
        DVector::from_iterator(6, x.rows(3, 3).iter().chain(u.iter()).copied())
    }

    fn jacobians(&self, _x: &DVector<f64>, _u: &DVector<f64>) -> (DMatrix<f64>, DMatrix<f64>) {
        let mut a = DMatrix::zeros(6, 6);
        let mut b = DMatrix::zeros(6, 3);
        for i in 0..3 {
            a[(i, i + 3)] = 1.0;
            b[(i + 3, i)] = 1.0;
        }
        (a, b)
    }

    fn state_bounds(&self) -> Option<(DVector<f64>, DVector<f64>)> {
        self.max_velocity.map(|v_max| {
            let mut lower = DVector::from_element(6, f64::NEG_INFINITY);
            let mut upper = DVector::from_element(6, f64::INFINITY);
            for i in 3..6 {
                lower[i] = -v_max;
                upper[i] = v_max;
            }
            (lower, upper)
        })
    }
}

/// Unicycle moving in the horizontal plane with an independent vertical rate.
/// State `[x, y, z, heading]`, control `[forward speed, vertical speed, turn rate]`.
#[derive(Debug, Clone, Default)]
pub struct Unicycle3d;

impl DynamicsModel for Unicycle3d {
    fn name(&self) -> &str {
        "unicycle_3d"
    }

    fn x_dim(&self) -> usize {
        4
    }

    fn u_dim(&self) -> usize {
        3
    }

    fn dynamics(&self, x: &DVector<f64>, u: &DVector<f64>) -> DVector<f64> {
        let heading = x[3];
        DVector::from_vec(vec![
            u[0] * heading.cos(),
            u[0] * heading.sin(),
            u[1],
            u[2],
        ])
    }

    fn jacobians(&self, x: &DVector<f64>, u: &DVector<f64>) -> (DMatrix<f64>, DMatrix<f64>) {
        let (sin, cos) = x[3].sin_cos();
        let mut a = DMatrix::zeros(4, 4);
        a[(0, 3)] = -u[0] * sin;
        a[(1, 3)] = u[0] * cos;

        let mut b = DMatrix::zeros(4, 3);
        b[(0, 0)] = cos;
        b[(1, 0)] = sin;
        b[(2, 1)] = 1.0;
        b[(3, 2)] = 1.0;
        (a, b)
    }
}
