//! Robot capability set: collision shape, control limits and robot specific constraints.

use nalgebra::DVector;
use parry3d::shape::SharedShape;

use crate::constraints::{ConstraintCategory, ConstraintSlot};

/// Robot morphology as seen by the optimizer.
pub trait Robot: Send + Sync {
    fn name(&self) -> &str;

    /// Shape checked against keep-out zones and obstacles. Its bounding sphere
    /// is kept inside keep-in zones.
    fn collision_shape(&self) -> SharedShape;

    /// Lower and upper bounds of every control coordinate, if limited.
    fn control_bounds(&self) -> Option<(DVector<f64>, DVector<f64>)> {
        None
    }

    /// Robot specific constraint families, each with the registry slot it belongs to.
    fn additional_constraints(&self) -> Vec<(ConstraintSlot, ConstraintCategory)> {
        Vec::new()
    }
}

/// Free flying spherical robot with symmetric control limits.
#[derive(Debug, Clone)]
pub struct FreeFlyer {
    /// Radius of the collision sphere
    pub radius: f64,

    /// Maximal absolute value of every control coordinate. Empty if not limited.
    pub control_limits: Vec<f64>,
}

impl FreeFlyer {
    pub fn new(radius: f64, control_limits: Vec<f64>) -> Self {
        FreeFlyer {
            radius,
            control_limits,
        }
    }

    /// Free flyer without control limits.
    pub fn unlimited(radius: f64) -> Self {
        FreeFlyer::new(radius, Vec::new())
    }
}

impl Robot for FreeFlyer {
    fn name(&self) -> &str {
        "free_flyer"
    }

    fn collision_shape(&self) -> SharedShape {
        SharedShape::ball(self.radius as f32)
    }

    fn control_bounds(&self) -> Option<(DVector<f64>, DVector<f64>)> {
        if self.control_limits.is_empty() {
            return None;
        }
        let upper = DVector::from_iterator(
            self.control_limits.len(),
            self.control_limits.iter().map(|limit| limit.abs()),
        );
        Some((-upper.clone(), upper))
    }
}
