use glam::{Mat4, Vec3};
use serde::{Deserialize, Serialize};
use std::f32::consts::{PI, TAU};

/// Orbit camera pose in spherical coordinates around a look-at target.
///
/// `polar` is measured from +Y, `azimuth` around +Y starting at +Z.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SphericalPose {
    pub radius: f32,
    pub polar: f32,
    pub azimuth: f32,
    pub target: Vec3,
}

impl SphericalPose {
    pub fn new(radius: f32, polar: f32, azimuth: f32, target: Vec3) -> Self {
        Self {
            radius,
            polar,
            azimuth,
            target,
        }
    }

    /// Camera position in world space.
    pub fn eye(&self) -> Vec3 {
        let (sp, cp) = self.polar.sin_cos();
        let (sa, ca) = self.azimuth.sin_cos();
        self.target + self.radius * Vec3::new(sp * sa, cp, sp * ca)
    }

    pub fn view_matrix(&self) -> Mat4 {
        Mat4::look_at_rh(self.eye(), self.target, Vec3::Y)
    }

    /// Interpolate towards `to`. Azimuth takes the shortest way round.
    pub fn lerp(&self, to: &Self, t: f32) -> Self {
        Self {
            radius: self.radius + (to.radius - self.radius) * t,
            polar: self.polar + (to.polar - self.polar) * t,
            azimuth: self.azimuth + shortest_arc(self.azimuth, to.azimuth) * t,
            target: self.target.lerp(to.target, t),
        }
    }

    /// Whether two poses frame the scene the same way, within `eps`.
    pub fn approx_eq(&self, other: &Self, eps: f32) -> bool {
        (self.radius - other.radius).abs() <= eps
            && (self.polar - other.polar).abs() <= eps
            && shortest_arc(self.azimuth, other.azimuth).abs() <= eps
            && self.target.abs_diff_eq(other.target, eps)
    }
}

/// Signed angle from `from` to `to` in `[-PI, PI)`.
fn shortest_arc(from: f32, to: f32) -> f32 {
    (to - from + PI).rem_euclid(TAU) - PI
}

/// Cubic ease-in-out on `[0, 1]`.
pub fn ease_in_out_cubic(t: f32) -> f32 {
    let t = t.clamp(0.0, 1.0);
    if t < 0.5 {
        4.0 * t * t * t
    } else {
        1.0 - (-2.0 * t + 2.0).powi(3) / 2.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn eye_is_radius_away_from_target() {
        let p = SphericalPose::new(10.0, 1.0, 0.4, Vec3::new(0.0, 3.0, 0.0));
        assert!((p.eye().distance(p.target) - 10.0).abs() < 1e-4);
        assert!(!p.view_matrix().col(0).x.is_nan());
    }

    #[test]
    fn polar_zero_is_straight_above() {
        let p = SphericalPose::new(5.0, 0.0, 1.0, Vec3::ZERO);
        assert!(p.eye().abs_diff_eq(Vec3::new(0.0, 5.0, 0.0), 1e-5));
    }

    #[test]
    fn lerp_endpoints() {
        let a = SphericalPose::new(10.0, 1.0, 0.0, Vec3::ZERO);
        let b = SphericalPose::new(4.0, 0.5, 1.0, Vec3::new(1.0, 2.0, 3.0));
        assert!(a.lerp(&b, 0.0).approx_eq(&a, 1e-6));
        assert!(a.lerp(&b, 1.0).approx_eq(&b, 1e-5));
    }

    #[test]
    fn azimuth_takes_shortest_way() {
        let a = SphericalPose::new(1.0, 1.0, 3.0, Vec3::ZERO);
        let b = SphericalPose::new(1.0, 1.0, -3.0, Vec3::ZERO);
        // 3.0 -> -3.0 is ~0.28 rad forward across PI, not 6 rad back.
        let mid = a.lerp(&b, 0.5);
        assert!(mid.azimuth > 3.0);
    }

    #[test]
    fn easing_is_monotonic_and_pinned() {
        assert_eq!(ease_in_out_cubic(0.0), 0.0);
        assert_eq!(ease_in_out_cubic(1.0), 1.0);
        assert!((ease_in_out_cubic(0.5) - 0.5).abs() < 1e-6);
        let mut prev = 0.0;
        for i in 1..=100 {
            let v = ease_in_out_cubic(i as f32 / 100.0);
            assert!(v >= prev);
            prev = v;
        }
    }
}
