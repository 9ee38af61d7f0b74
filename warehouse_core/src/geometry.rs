use std::ops::{Add, AddAssign, Mul, Neg, Sub};

use serde::{Deserialize, Serialize};

/// World-space vector. `y` is up; agents move on the x/z plane.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Vec3 {
    pub x: f32,
    pub y: f32,
    pub z: f32,
}

impl Vec3 {
    pub const ZERO: Vec3 = Vec3::new(0.0, 0.0, 0.0);

    pub const fn new(x: f32, y: f32, z: f32) -> Self {
        Vec3 { x, y, z }
    }

    #[inline]
    pub fn sqr_magnitude(self) -> f32 {
        self.x * self.x + self.y * self.y + self.z * self.z
    }

    #[inline]
    pub fn magnitude(self) -> f32 {
        self.sqr_magnitude().sqrt()
    }

    /// Unit vector in the same direction, or zero for (near) zero input.
    pub fn normalized(self) -> Vec3 {
        let len = self.magnitude();
        if len > 1e-5 { self * (1.0 / len) } else { Vec3::ZERO }
    }

    #[inline]
    pub fn dot(self, other: Vec3) -> f32 {
        self.x * other.x + self.y * other.y + self.z * other.z
    }

    pub fn with_y(self, y: f32) -> Vec3 {
        Vec3 { y, ..self }
    }

    pub fn distance(self, other: Vec3) -> f32 {
        (self - other).magnitude()
    }
}

impl Add for Vec3 {
    type Output = Vec3;
    fn add(self, rhs: Vec3) -> Vec3 {
        Vec3::new(self.x + rhs.x, self.y + rhs.y, self.z + rhs.z)
    }
}

impl AddAssign for Vec3 {
    fn add_assign(&mut self, rhs: Vec3) {
        *self = *self + rhs;
    }
}

impl Sub for Vec3 {
    type Output = Vec3;
    fn sub(self, rhs: Vec3) -> Vec3 {
        Vec3::new(self.x - rhs.x, self.y - rhs.y, self.z - rhs.z)
    }
}

impl Mul<f32> for Vec3 {
    type Output = Vec3;
    fn mul(self, rhs: f32) -> Vec3 {
        Vec3::new(self.x * rhs, self.y * rhs, self.z * rhs)
    }
}

impl Neg for Vec3 {
    type Output = Vec3;
    fn neg(self) -> Vec3 {
        Vec3::new(-self.x, -self.y, -self.z)
    }
}

/// Axis-aligned bounding box.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Aabb {
    pub min: Vec3,
    pub max: Vec3,
}

impl Aabb {
    pub fn new(min: Vec3, max: Vec3) -> Self {
        Aabb { min, max }
    }

    pub fn from_center(center: Vec3, half_extent: Vec3) -> Self {
        Aabb {
            min: center - half_extent,
            max: center + half_extent,
        }
    }

    pub fn center(&self) -> Vec3 {
        (self.min + self.max) * 0.5
    }

    pub fn half_extent(&self) -> Vec3 {
        (self.max - self.min) * 0.5
    }

    /// Inclusive point containment.
    pub fn contains(&self, p: Vec3) -> bool {
        p.x >= self.min.x
            && p.x <= self.max.x
            && p.y >= self.min.y
            && p.y <= self.max.y
            && p.z >= self.min.z
            && p.z <= self.max.z
    }

    /// Closed-interval overlap test; touching faces count as intersecting.
    pub fn intersects(&self, other: &Aabb) -> bool {
        self.min.x <= other.max.x
            && self.max.x >= other.min.x
            && self.min.y <= other.max.y
            && self.max.y >= other.min.y
            && self.min.z <= other.max.z
            && self.max.z >= other.min.z
    }

    /// Strict overlap; boxes that only share a face do not overlap.
    pub fn overlaps(&self, other: &Aabb) -> bool {
        self.min.x < other.max.x
            && self.max.x > other.min.x
            && self.min.y < other.max.y
            && self.max.y > other.min.y
            && self.min.z < other.max.z
            && self.max.z > other.min.z
    }

    pub fn union(&self, other: &Aabb) -> Aabb {
        Aabb {
            min: Vec3::new(
                self.min.x.min(other.min.x),
                self.min.y.min(other.min.y),
                self.min.z.min(other.min.z),
            ),
            max: Vec3::new(
                self.max.x.max(other.max.x),
                self.max.y.max(other.max.y),
                self.max.z.max(other.max.z),
            ),
        }
    }

    /// Sweeps `self` along unit `direction` and returns the travel distance at
    /// which it first touches `obstacle`, if that happens within `max_distance`.
    ///
    /// Boxes that already overlap report a hit at distance zero when the
    /// movement heads toward the obstacle's centre.
    pub fn sweep(&self, direction: Vec3, max_distance: f32, obstacle: &Aabb) -> Option<f32> {
        // Minkowski sum: cast the centre as a ray against the grown obstacle.
        let grown = Aabb::from_center(obstacle.center(), obstacle.half_extent() + self.half_extent());
        let origin = self.center();

        let mut t_min = f32::NEG_INFINITY;
        let mut t_max = f32::INFINITY;
        for (o, d, lo, hi) in [
            (origin.x, direction.x, grown.min.x, grown.max.x),
            (origin.y, direction.y, grown.min.y, grown.max.y),
            (origin.z, direction.z, grown.min.z, grown.max.z),
        ] {
            if d.abs() < 1e-8 {
                // Parallel to this slab; touching the face is not a hit.
                if o <= lo || o >= hi {
                    return None;
                }
                continue;
            }
            let inv = 1.0 / d;
            let (t0, t1) = if inv >= 0.0 {
                ((lo - o) * inv, (hi - o) * inv)
            } else {
                ((hi - o) * inv, (lo - o) * inv)
            };
            t_min = t_min.max(t0);
            t_max = t_max.min(t1);
            if t_min > t_max {
                return None;
            }
        }

        if t_max <= 0.0 {
            // Obstacle is entirely behind the sweep.
            return None;
        }
        if t_min < 0.0 {
            // Already touching or interpenetrating: only block movement that
            // pushes further in.
            let inward = (obstacle.center() - origin).dot(direction) > 0.0;
            return inward.then_some(0.0);
        }
        (t_min <= max_distance).then_some(t_min)
    }
}

/// Shortest signed difference `target - current`, in degrees, in (-180, 180].
pub fn delta_angle(current: f32, target: f32) -> f32 {
    let mut delta = (target - current).rem_euclid(360.0);
    if delta > 180.0 {
        delta -= 360.0;
    }
    delta
}

/// Rotates `current` toward `target` by at most `max_delta` degrees along the
/// shortest arc. Lands exactly on `target` once within reach.
pub fn move_towards_angle(current: f32, target: f32, max_delta: f32) -> f32 {
    let delta = delta_angle(current, target);
    if -max_delta < delta && delta < max_delta {
        return target;
    }
    wrap_degrees(current + delta.signum() * max_delta.max(0.0))
}

/// Maps any angle into (-180, 180].
pub fn wrap_degrees(angle: f32) -> f32 {
    let wrapped = angle.rem_euclid(360.0);
    if wrapped > 180.0 { wrapped - 360.0 } else { wrapped }
}

/// Heading for a planar move direction: moving along +Z yields 0 and turning
/// toward +X is negative.
pub fn heading_for(direction: Vec3) -> f32 {
    -direction.x.atan2(direction.z).to_degrees()
}
