//! Static scene: keep-in zones, keep-out zones and obstacles.

use nalgebra::{Isometry3, Vector3};
use parry3d::shape::SharedShape;

use crate::error::{Result, TrajoptError};

/// Raw description of a zone as it comes from the scene data. Boxes are given by
/// the minimal and the maximal corner, spheres by the center and radius.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "allow_filesystem", derive(serde::Deserialize))]
#[cfg_attr(feature = "allow_filesystem", serde(rename_all = "snake_case"))]
pub enum ZoneData {
    Box { min: [f64; 3], max: [f64; 3] },
    Sphere { center: [f64; 3], radius: f64 },
}

/// Complete scene description. Obstacles are kept apart from keep-out zones
/// as they do not contribute to the world bounding box.
#[derive(Debug, Clone, Default, PartialEq)]
#[cfg_attr(feature = "allow_filesystem", derive(serde::Deserialize))]
#[cfg_attr(feature = "allow_filesystem", serde(default))]
pub struct SceneData {
    pub keep_in: Vec<ZoneData>,
    pub keep_out: Vec<ZoneData>,
    pub obstacles: Vec<ZoneData>,
}

/// Validated geometric primitive. Immutable once constructed.
#[derive(Debug, Clone, PartialEq)]
pub enum Zone {
    Box { min: Vector3<f64>, max: Vector3<f64> },
    Sphere { center: Vector3<f64>, radius: f64 },
}

impl Zone {
    /// Axis aligned box from its minimal and maximal corner. Every extent (max - min)
    /// must be positive.
    pub fn new_box(min: Vector3<f64>, max: Vector3<f64>) -> Result<Self> {
        if !min.iter().chain(max.iter()).all(|v| v.is_finite()) {
            return Err(TrajoptError::MalformedZoneData(format!(
                "box corners must be finite: {:?} {:?}",
                min.as_slice(),
                max.as_slice()
            )));
        }
        for axis in 0..3 {
            let extent = max[axis] - min[axis];
            if extent <= 0.0 {
                return Err(TrajoptError::MalformedZoneData(format!(
                    "box extent along axis {} is {} (must be > 0)",
                    axis, extent
                )));
            }
        }
        Ok(Zone::Box { min, max })
    }

    pub fn new_sphere(center: Vector3<f64>, radius: f64) -> Result<Self> {
        if !center.iter().all(|v| v.is_finite()) || !radius.is_finite() {
            return Err(TrajoptError::MalformedZoneData(format!(
                "sphere must be finite: center {:?}, radius {}",
                center.as_slice(),
                radius
            )));
        }
        if radius <= 0.0 {
            return Err(TrajoptError::MalformedZoneData(format!(
                "sphere radius is {} (must be > 0)",
                radius
            )));
        }
        Ok(Zone::Sphere { center, radius })
    }

    pub fn from_data(data: &ZoneData) -> Result<Self> {
        match data {
            ZoneData::Box { min, max } => {
                Zone::new_box(Vector3::from_column_slice(min), Vector3::from_column_slice(max))
            }
            ZoneData::Sphere { center, radius } => {
                Zone::new_sphere(Vector3::from_column_slice(center), *radius)
            }
        }
    }

    /// Minimal and maximal corner of the axis aligned box around this zone.
    pub fn aabb(&self) -> (Vector3<f64>, Vector3<f64>) {
        match self {
            Zone::Box { min, max } => (*min, *max),
            Zone::Sphere { center, radius } => (
                center - Vector3::repeat(*radius),
                center + Vector3::repeat(*radius),
            ),
        }
    }

    pub fn center(&self) -> Vector3<f64> {
        match self {
            Zone::Box { min, max } => (min + max) * 0.5,
            Zone::Sphere { center, .. } => *center,
        }
    }

    /// Parry shape of this zone together with its global pose.
    pub(crate) fn to_shape(&self) -> (Isometry3<f32>, SharedShape) {
        let center = self.center().cast::<f32>();
        let pose = Isometry3::translation(center.x, center.y, center.z);
        let shape = match self {
            Zone::Box { min, max } => {
                let half = ((max - min) * 0.5).cast::<f32>();
                SharedShape::cuboid(half.x, half.y, half.z)
            }
            Zone::Sphere { radius, .. } => SharedShape::ball(*radius as f32),
        };
        (pose, shape)
    }
}

/// Keep-in zones, keep-out zones and obstacles of the scene, with the
/// world bounding box derived from keep-in and keep-out zones only.
#[derive(Debug, Clone, PartialEq)]
pub struct Environment {
    keep_in: Vec<Zone>,
    keep_out: Vec<Zone>,
    obstacles: Vec<Zone>,
    world_aabb_min: Vector3<f64>,
    world_aabb_max: Vector3<f64>,
}

impl Default for Environment {
    fn default() -> Self {
        Environment::new(Vec::new(), Vec::new())
    }
}

impl Environment {
    /// Environment from already validated zones, without obstacles.
    pub fn new(keep_in: Vec<Zone>, keep_out: Vec<Zone>) -> Self {
        let mut environment = Environment {
            keep_in,
            keep_out,
            obstacles: Vec::new(),
            world_aabb_min: Vector3::repeat(f64::INFINITY),
            world_aabb_max: Vector3::repeat(f64::NEG_INFINITY),
        };
        environment.recompute_aabb();
        environment
    }

    /// Parses keep-in and keep-out zones and computes the world bounding box, then
    /// appends obstacles (which do not extend the box).
    pub fn build(scene: &SceneData) -> Result<Self> {
        let keep_in = parse_zones(&scene.keep_in)?;
        let keep_out = parse_zones(&scene.keep_out)?;
        Environment::new(keep_in, keep_out).add_obstacles(&scene.obstacles)
    }

    /// Appends obstacles. The world bounding box is not recomputed.
    pub fn add_obstacles(mut self, obstacles: &[ZoneData]) -> Result<Self> {
        let parsed = parse_zones(obstacles)?;
        self.obstacles.extend(parsed);
        Ok(self)
    }

    pub fn add_keep_in(mut self, zone: Zone) -> Self {
        self.keep_in.push(zone);
        self.recompute_aabb();
        self
    }

    pub fn add_keep_out(mut self, zone: Zone) -> Self {
        self.keep_out.push(zone);
        self.recompute_aabb();
        self
    }

    pub fn keep_in(&self) -> &[Zone] {
        &self.keep_in
    }

    pub fn keep_out(&self) -> &[Zone] {
        &self.keep_out
    }

    pub fn obstacles(&self) -> &[Zone] {
        &self.obstacles
    }

    pub fn world_aabb_min(&self) -> &Vector3<f64> {
        &self.world_aabb_min
    }

    pub fn world_aabb_max(&self) -> &Vector3<f64> {
        &self.world_aabb_max
    }

    /// False if there are no keep-in nor keep-out zones, so the world box is empty.
    pub fn has_world_aabb(&self) -> bool {
        (0..3).all(|axis| self.world_aabb_min[axis] <= self.world_aabb_max[axis])
    }

    fn recompute_aabb(&mut self) {
        let mut min = Vector3::repeat(f64::INFINITY);
        let mut max = Vector3::repeat(f64::NEG_INFINITY);
        for zone in self.keep_in.iter().chain(self.keep_out.iter()) {
            let (zone_min, zone_max) = zone.aabb();
            min = min.inf(&zone_min);
            max = max.sup(&zone_max);
        }
        self.world_aabb_min = min;
        self.world_aabb_max = max;
    }
}

fn parse_zones(data: &[ZoneData]) -> Result<Vec<Zone>> {
    data.iter().map(Zone::from_data).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn scene() -> SceneData {
        SceneData {
            keep_in: vec![
                ZoneData::Box { min: [-1.0, -1.0, 0.0], max: [4.0, 2.0, 3.0] },
                ZoneData::Box { min: [3.0, 0.0, -2.0], max: [6.0, 1.0, 1.0] },
            ],
            keep_out: vec![ZoneData::Sphere { center: [0.0, 5.0, 1.0], radius: 0.5 }],
            obstacles: vec![],
        }
    }

    #[test]
    fn test_aabb_covers_keep_in_and_keep_out() {
        let env = Environment::build(&scene()).expect("valid scene");
        assert_eq!(env.world_aabb_min(), &Vector3::new(-1.0, -1.0, -2.0));
        assert_eq!(env.world_aabb_max(), &Vector3::new(6.0, 5.5, 3.0));
        assert!(env.has_world_aabb());
    }

    #[test]
    fn test_obstacles_do_not_extend_aabb() {
        let env = Environment::build(&scene()).expect("valid scene");
        let before = (*env.world_aabb_min(), *env.world_aabb_max());
        let env = env
            .add_obstacles(&[ZoneData::Sphere { center: [100.0, -50.0, 7.0], radius: 3.0 }])
            .expect("valid obstacle");
        assert_eq!(env.obstacles().len(), 1);
        assert_eq!((*env.world_aabb_min(), *env.world_aabb_max()), before);
    }

    #[test]
    fn test_added_keep_out_recomputes_aabb() {
        let env = Environment::build(&scene()).expect("valid scene");
        let zone = Zone::new_box(Vector3::new(-10.0, 0.0, 0.0), Vector3::new(-9.0, 1.0, 1.0))
            .expect("valid box");
        let env = env.add_keep_out(zone);
        assert_eq!(env.world_aabb_min().x, -10.0);
        assert_eq!(env.world_aabb_max(), &Vector3::new(6.0, 5.5, 3.0));
    }

    #[test]
    fn test_empty_environment_has_invalid_aabb() {
        let env = Environment::default();
        assert!(!env.has_world_aabb());
        assert!(env.world_aabb_min().x.is_infinite());
    }

    #[test]
    fn test_degenerate_box_rejected() {
        let mut data = scene();
        data.keep_out.push(ZoneData::Box { min: [0.0, 0.0, 0.0], max: [1.0, 0.0, 1.0] });
        let result = Environment::build(&data);
        assert!(matches!(result, Err(TrajoptError::MalformedZoneData(_))));

        let inverted = Zone::new_box(Vector3::new(1.0, 0.0, 0.0), Vector3::new(0.0, 1.0, 1.0));
        assert!(matches!(inverted, Err(TrajoptError::MalformedZoneData(_))));
    }

    #[test]
    fn test_bad_sphere_rejected() {
        assert!(Zone::new_sphere(Vector3::zeros(), 0.0).is_err());
        assert!(Zone::new_sphere(Vector3::new(f64::NAN, 0.0, 0.0), 1.0).is_err());
        let env = Environment::default()
            .add_obstacles(&[ZoneData::Sphere { center: [0.0; 3], radius: -1.0 }]);
        assert!(matches!(env, Err(TrajoptError::MalformedZoneData(_))));
    }
}
