use nalgebra::Vector3;
use rayon::prelude::{IntoParallelRefIterator, ParallelIterator};

/// Signed clearance of the robot with respect to one zone, together with its gradient
/// with respect to the robot position. Positive clearance is safe, negative means
/// the robot penetrates a keep-out zone or sticks out of a keep-in zone.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SignedDistance {
    pub distance: f64,
    pub gradient: Vector3<f64>,
}

/// A trait for querying clearance between the robot and the zones of the scene.
///
/// # Requirements
/// - Implementations of this trait must be `Send` and `Sync` as the queries along the
///   trajectory are evaluated concurrently.
pub trait DistanceQuery: Send + Sync {
    /// Number of zones this context can be queried against.
    fn zone_count(&self) -> usize;

    /// Signed clearance of the robot placed at `point` against the zone with the given index.
    ///
    /// # Arguments
    /// * `zone` - Index of the zone inside this context.
    /// * `point` - Robot position in world coordinates.
    fn signed_distance(&self, zone: usize, point: &Vector3<f64>) -> SignedDistance;

    /// Clearance of every point against the given zone. Points are processed in parallel,
    /// the returned vector has the same order as `points`.
    fn distances_along(&self, zone: usize, points: &[Vector3<f64>]) -> Vec<SignedDistance> {
        points
            .par_iter()
            .map(|point| self.signed_distance(zone, point))
            .collect()
    }

    /// Smallest clearance over all points against the given zone, infinity for no points.
    fn min_distance_along(&self, zone: usize, points: &[Vector3<f64>]) -> f64 {
        self.distances_along(zone, points)
            .iter()
            .map(|d| d.distance)
            .fold(f64::INFINITY, f64::min)
    }
}
