//! Implements clearance queries of the robot against the scene

use nalgebra::{Isometry3, Point3, Vector3};
use parry3d::query;
use parry3d::shape::SharedShape;

use crate::distance_traits::{DistanceQuery, SignedDistance};
use crate::environment::{Environment, Zone};

/// Contacts further than this are not resolved exactly by parry and fall back
/// to the plain distance query.
const PREDICTION: f32 = 1.0e3;

/// Gradients are not defined exactly on the zone boundary or at the zone center.
const DEGENERATE: f64 = 1.0e-9;

/// Static zone against that we check the robot. Unlike the robot, it has the
/// global transform placing it where desired.
struct ZoneBody {
    /// Shape representing this zone
    shape: SharedShape,
    /// Global transform of this zone.
    pose: Isometry3<f32>,
    /// Center of the zone, used as a fallback direction.
    center: Vector3<f64>,
}

impl ZoneBody {
    fn new(zone: &Zone) -> Self {
        let (pose, shape) = zone.to_shape();
        ZoneBody {
            shape,
            pose,
            center: zone.center(),
        }
    }
}

fn robot_pose(point: &Vector3<f64>) -> Isometry3<f32> {
    let p = point.cast::<f32>();
    Isometry3::translation(p.x, p.y, p.z)
}

fn direction_or(from: Vector3<f64>, fallback: Vector3<f64>) -> Vector3<f64> {
    from.try_normalize(DEGENERATE)
        .or_else(|| fallback.try_normalize(DEGENERATE))
        .unwrap_or_else(Vector3::x)
}

/// Keep-out context: the robot must stay away from every zone. Holds keep-out zones
/// first, followed by obstacles.
pub struct KeepOutContext {
    robot_shape: SharedShape,
    zones: Vec<ZoneBody>,
    keep_out_count: usize,
}

impl KeepOutContext {
    pub fn new(robot_shape: SharedShape, environment: &Environment) -> Self {
        let zones: Vec<ZoneBody> = environment
            .keep_out()
            .iter()
            .chain(environment.obstacles().iter())
            .map(ZoneBody::new)
            .collect();
        KeepOutContext {
            robot_shape,
            zones,
            keep_out_count: environment.keep_out().len(),
        }
    }

    /// True if the zone with this index was added as an obstacle rather than keep-out zone.
    pub fn is_obstacle(&self, zone: usize) -> bool {
        zone >= self.keep_out_count
    }
}

impl DistanceQuery for KeepOutContext {
    fn zone_count(&self) -> usize {
        self.zones.len()
    }

    fn signed_distance(&self, zone: usize, point: &Vector3<f64>) -> SignedDistance {
        let body = &self.zones[zone];
        let pose = robot_pose(point);
        let away = point - body.center;

        // Contact normal1 points from the robot towards the zone, so the clearance grows
        // when the robot moves along the opposite direction.
        match query::contact(&pose, &*self.robot_shape, &body.pose, &*body.shape, PREDICTION) {
            Ok(Some(contact)) => SignedDistance {
                distance: contact.dist as f64,
                gradient: direction_or(-contact.normal1.into_inner().cast::<f64>(), away),
            },
            _ => {
                let distance = query::distance(&pose, &*self.robot_shape, &body.pose, &*body.shape)
                    .unwrap_or(f32::MAX);
                SignedDistance {
                    distance: distance as f64,
                    gradient: direction_or(away, Vector3::x()),
                }
            }
        }
    }
}

/// Keep-in context: the robot must stay inside at least one zone, keeping
/// the distance from its boundary no smaller than the robot bounding radius.
pub struct KeepInContext {
    robot_radius: f64,
    zones: Vec<ZoneBody>,
    aabb_min: Vector3<f64>,
    aabb_max: Vector3<f64>,
}

impl KeepInContext {
    pub fn new(robot_shape: &SharedShape, environment: &Environment) -> Self {
        let robot_radius = robot_shape.compute_local_bounding_sphere().radius() as f64;
        KeepInContext {
            robot_radius,
            zones: environment.keep_in().iter().map(ZoneBody::new).collect(),
            aabb_min: *environment.world_aabb_min(),
            aabb_max: *environment.world_aabb_max(),
        }
    }

    pub fn robot_radius(&self) -> f64 {
        self.robot_radius
    }

    /// Depth of the point inside the zone: positive inside, negative outside.
    fn containment_depth(&self, zone: usize, point: &Vector3<f64>) -> SignedDistance {
        let body = &self.zones[zone];
        let projection = body
            .shape
            .project_point(&body.pose, &Point3::from(point.cast::<f32>()), false);
        let boundary = projection.point.coords.cast::<f64>();
        let offset = point - boundary;
        let depth = offset.norm();
        let inward = body.center - point;
        if projection.is_inside {
            SignedDistance {
                distance: depth,
                gradient: direction_or(offset, inward),
            }
        } else {
            SignedDistance {
                distance: -depth,
                gradient: direction_or(-offset, inward),
            }
        }
    }

    /// Zone that contains the point most deeply (or is closest to containing it),
    /// with the clearance against that zone. None if there are no keep-in zones.
    pub fn deepest_zone(&self, point: &Vector3<f64>) -> Option<(usize, SignedDistance)> {
        (0..self.zones.len())
            .map(|zone| (zone, self.signed_distance(zone, point)))
            .max_by(|a, b| a.1.distance.total_cmp(&b.1.distance))
    }

    /// True if the point is within the world bounding box.
    pub fn inside_world(&self, point: &Vector3<f64>) -> bool {
        (0..3).all(|axis| point[axis] >= self.aabb_min[axis] && point[axis] <= self.aabb_max[axis])
    }
}

impl DistanceQuery for KeepInContext {
    fn zone_count(&self) -> usize {
        self.zones.len()
    }

    fn signed_distance(&self, zone: usize, point: &Vector3<f64>) -> SignedDistance {
        let depth = self.containment_depth(zone, point);
        SignedDistance {
            distance: depth.distance - self.robot_radius,
            gradient: depth.gradient,
        }
    }
}

/// Collision query contexts of one problem, built once from the robot collision shape
/// and the environment. Never mutated after construction; a changed environment requires
/// a new workspace.
pub struct Workspace {
    keep_in: KeepInContext,
    keep_out: KeepOutContext,
}

impl Workspace {
    pub fn new(robot_shape: SharedShape, environment: &Environment) -> Self {
        Workspace {
            keep_in: KeepInContext::new(&robot_shape, environment),
            keep_out: KeepOutContext::new(robot_shape, environment),
        }
    }

    pub fn keep_in(&self) -> &KeepInContext {
        &self.keep_in
    }

    pub fn keep_out(&self) -> &KeepOutContext {
        &self.keep_out
    }
}
