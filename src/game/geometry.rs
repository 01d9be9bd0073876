//! Vector helpers: view direction, ray vs box, nearest-in-radius scan

use glam::Vec3;
use serde::{Deserialize, Serialize};

/// Pitch is kept just short of vertical so the view basis never degenerates
pub const MAX_PITCH: f32 = 89.0 * std::f32::consts::PI / 180.0;

/// Axis-aligned box used for character hit boxes and static cover
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Aabb {
    pub min: Vec3,
    pub max: Vec3,
}

impl Aabb {
    pub fn new(min: Vec3, max: Vec3) -> Self {
        Self {
            min: min.min(max),
            max: min.max(max),
        }
    }

    pub fn from_center(center: Vec3, half_extents: Vec3) -> Self {
        let half = half_extents.abs();
        Self {
            min: center - half,
            max: center + half,
        }
    }

    pub fn contains(&self, point: Vec3) -> bool {
        point.cmpge(self.min).all() && point.cmple(self.max).all()
    }

    /// Distance along `dir` at which the ray enters the box, if within `max_t`.
    ///
    /// `dir` must be normalized. A ray starting inside the box hits at 0.
    pub fn ray_entry(&self, origin: Vec3, dir: Vec3, max_t: f32) -> Option<f32> {
        let mut t_min = 0.0_f32;
        let mut t_max = max_t;

        for axis in 0..3 {
            let o = origin[axis];
            let d = dir[axis];
            let (lo, hi) = (self.min[axis], self.max[axis]);

            if d.abs() < f32::EPSILON {
                // Parallel to this slab
                if o < lo || o > hi {
                    return None;
                }
                continue;
            }

            let inv = 1.0 / d;
            let mut t1 = (lo - o) * inv;
            let mut t2 = (hi - o) * inv;
            if t1 > t2 {
                std::mem::swap(&mut t1, &mut t2);
            }

            t_min = t_min.max(t1);
            t_max = t_max.min(t2);
            if t_min > t_max {
                return None;
            }
        }

        Some(t_min)
    }
}

/// Forward vector for a yaw/pitch pair (radians, Y up)
pub fn view_direction(yaw: f32, pitch: f32) -> Vec3 {
    let pitch = pitch.clamp(-MAX_PITCH, MAX_PITCH);
    let (sin_yaw, cos_yaw) = yaw.sin_cos();
    let (sin_pitch, cos_pitch) = pitch.sin_cos();
    Vec3::new(cos_yaw * cos_pitch, sin_pitch, sin_yaw * cos_pitch).normalize_or_zero()
}

/// Pick the candidate nearest to `origin` within `radius`.
///
/// Equal distances keep the earlier candidate, so scan order is the tie-break.
pub fn nearest_within<T>(
    candidates: impl IntoIterator<Item = (T, Vec3)>,
    origin: Vec3,
    radius: f32,
) -> Option<T> {
    let radius_sq = radius * radius;
    let mut best: Option<(T, f32)> = None;

    for (item, position) in candidates {
        let dist_sq = position.distance_squared(origin);
        if dist_sq > radius_sq {
            continue;
        }
        let closer = best.as_ref().map_or(true, |(_, best_sq)| dist_sq < *best_sq);
        if closer {
            best = Some((item, dist_sq));
        }
    }

    best.map(|(item, _)| item)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ray_hits_box_in_front() {
        let target = Aabb::from_center(Vec3::new(500.0, 0.0, 0.0), Vec3::splat(50.0));
        let t = target.ray_entry(Vec3::ZERO, Vec3::X, 10_000.0);
        assert_eq!(t, Some(450.0));
    }

    #[test]
    fn ray_misses_box_behind_or_beyond_range() {
        let target = Aabb::from_center(Vec3::new(500.0, 0.0, 0.0), Vec3::splat(50.0));
        assert_eq!(target.ray_entry(Vec3::ZERO, -Vec3::X, 10_000.0), None);
        assert_eq!(target.ray_entry(Vec3::ZERO, Vec3::X, 100.0), None);
        assert_eq!(target.ray_entry(Vec3::new(0.0, 200.0, 0.0), Vec3::X, 10_000.0), None);
    }

    #[test]
    fn ray_from_inside_hits_immediately() {
        let target = Aabb::from_center(Vec3::ZERO, Vec3::splat(10.0));
        assert_eq!(target.ray_entry(Vec3::ZERO, Vec3::Y, 100.0), Some(0.0));
    }

    #[test]
    fn view_direction_is_unit_and_clamped() {
        let forward = view_direction(0.0, 0.0);
        assert!((forward - Vec3::X).length() < 1e-5);

        let up = view_direction(0.0, std::f32::consts::PI);
        assert!((up.length() - 1.0).abs() < 1e-5);
        assert!(up.y < 1.0);
    }

    #[test]
    fn nearest_prefers_distance_then_scan_order() {
        let origin = Vec3::ZERO;
        let candidates = vec![
            ("far", Vec3::new(100.0, 0.0, 0.0)),
            ("near_a", Vec3::new(0.0, 0.0, 50.0)),
            ("near_b", Vec3::new(50.0, 0.0, 0.0)),
            ("outside", Vec3::new(500.0, 0.0, 0.0)),
        ];
        assert_eq!(nearest_within(candidates, origin, 150.0), Some("near_a"));
        assert_eq!(
            nearest_within(vec![("x", Vec3::new(200.0, 0.0, 0.0))], origin, 150.0),
            None
        );
    }
}
