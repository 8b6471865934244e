// Fittable helix tracks and their linearization around a point
//
// A track is a helix in the solenoid field, fixed by a reference point, the
// momentum direction there, the signed curvature and cot(theta). Near a
// vertex candidate it is replaced by its tangent line at the point of the
// circle closest to the candidate; the measurement is the pair (transverse,
// longitudinal) impact parameter of the vertex with respect to that line.

use nalgebra::{Matrix2, Matrix2x3, Vector2, Vector3};

use crate::constants::GYRO_CM_PER_GEV;
use crate::event::Track;
use crate::kinematics::wrap_phi;

/// Below this curvature (1/cm) the track is treated as a straight line
const STRAIGHT_CURVATURE: f64 = 1e-9;

/// Helix track with impact-parameter uncertainties
///
/// Only the transverse and longitudinal impact-parameter errors enter the
/// fit, as an uncorrelated diagonal measurement covariance. Correlations with
/// the direction and curvature errors of the full track covariance are
/// ignored, so fit weights and chi2 are approximate for low-pt tracks.
#[derive(Debug, Clone, PartialEq)]
pub struct FittableTrack {
    reference: Vector3<f64>,
    phi: f64,
    cot_theta: f64,
    /// Signed curvature in 1/cm; negative charges curve counter-clockwise
    curvature: f64,
    sigma_transverse: f64,
    sigma_longitudinal: f64,
}

impl FittableTrack {
    /// Builds a helix from its state at `reference`. Returns `None` without
    /// positive impact-parameter errors or momentum.
    pub fn new(
        reference: [f64; 3],
        pt: f64,
        eta: f64,
        phi: f64,
        charge: i32,
        sigma_transverse: f64,
        sigma_longitudinal: f64,
        b_field: f64,
    ) -> Option<Self> {
        if pt <= 0.0 || sigma_transverse <= 0.0 || sigma_longitudinal <= 0.0 || b_field <= 0.0 {
            return None;
        }
        let radius = pt * GYRO_CM_PER_GEV / b_field;
        Some(Self {
            reference: Vector3::from(reference),
            phi,
            cot_theta: eta.sinh(),
            curvature: -f64::from(charge.signum()) / radius,
            sigma_transverse,
            sigma_longitudinal,
        })
    }

    pub fn from_track(track: &Track, b_field: f64) -> Option<Self> {
        Self::new(
            track.reference_point(),
            track.pt,
            track.eta,
            track.phi,
            track.charge,
            track.dxy_error,
            track.dz_error,
            b_field,
        )
    }

    fn is_straight(&self) -> bool {
        self.curvature.abs() < STRAIGHT_CURVATURE
    }

    /// Position and azimuth after a transverse path length `s` from the reference
    pub fn point_at(&self, s: f64) -> (Vector3<f64>, f64) {
        let phi_s = self.phi + self.curvature * s;
        let (dx, dy) = if self.is_straight() {
            (s * self.phi.cos(), s * self.phi.sin())
        } else {
            (
                (phi_s.sin() - self.phi.sin()) / self.curvature,
                -(phi_s.cos() - self.phi.cos()) / self.curvature,
            )
        };
        let pos = self.reference + Vector3::new(dx, dy, s * self.cot_theta);
        (pos, wrap_phi(phi_s))
    }

    /// Transverse path length to the point of the track circle closest to `point`
    fn path_to(&self, point: &Vector3<f64>) -> f64 {
        if self.is_straight() {
            return (point.x - self.reference.x) * self.phi.cos()
                + (point.y - self.reference.y) * self.phi.sin();
        }
        let inv = 1.0 / self.curvature;
        let cx = self.reference.x - inv * self.phi.sin();
        let cy = self.reference.y + inv * self.phi.cos();
        let (ux, uy) = (point.x - cx, point.y - cy);
        let norm = ux.hypot(uy);
        if norm == 0.0 {
            return 0.0;
        }
        // On the circle, (sin phi, -cos phi) points from the centre along sign(curvature)
        let s = self.curvature.signum();
        let phi_closest = (s * ux / norm).atan2(-s * uy / norm);
        wrap_phi(phi_closest - self.phi) * inv
    }

    /// Tangent line at the point of the track closest (transversally) to `point`
    pub fn linearize(&self, point: &Vector3<f64>) -> LinearizedTrack {
        let s = self.path_to(point);
        let (origin, phi) = self.point_at(s);
        let (sin, cos) = phi.sin_cos();
        let jacobian = Matrix2x3::new(
            -sin, cos, 0.0,
            -cos * self.cot_theta, -sin * self.cot_theta, 1.0,
        );
        let weight = Matrix2::new(
            1.0 / (self.sigma_transverse * self.sigma_transverse), 0.0,
            0.0, 1.0 / (self.sigma_longitudinal * self.sigma_longitudinal),
        );
        LinearizedTrack {
            origin,
            direction: Vector3::new(cos, sin, self.cot_theta),
            jacobian,
            weight,
        }
    }
}

/// Straight-line approximation of a track near a linearization point
#[derive(Debug, Clone, PartialEq)]
pub struct LinearizedTrack {
    /// Point on the helix where the tangent is taken
    pub origin: Vector3<f64>,
    /// Tangent direction, with unit transverse component
    pub direction: Vector3<f64>,
    /// Maps a vertex offset from `origin` to (transverse, longitudinal) impact parameters
    pub jacobian: Matrix2x3<f64>,
    /// Inverse measurement covariance
    pub weight: Matrix2<f64>,
}

impl LinearizedTrack {
    /// Impact parameters of `vertex` with respect to the tangent line
    pub fn residual(&self, vertex: &Vector3<f64>) -> Vector2<f64> {
        self.jacobian * (vertex - self.origin)
    }

    /// Compatibility of the track with `vertex`, chi2 with two degrees of freedom
    pub fn chi2(&self, vertex: &Vector3<f64>) -> f64 {
        let r = self.residual(vertex);
        (r.transpose() * self.weight * r)[(0, 0)]
    }
}

/// Points of closest approach of two lines, or `None` if they are parallel
pub fn closest_approach(
    p1: &Vector3<f64>,
    d1: &Vector3<f64>,
    p2: &Vector3<f64>,
    d2: &Vector3<f64>,
) -> Option<(Vector3<f64>, Vector3<f64>)> {
    let w = p1 - p2;
    let a = d1.dot(d1);
    let b = d1.dot(d2);
    let c = d2.dot(d2);
    let d = d1.dot(&w);
    let e = d2.dot(&w);
    let denom = a * c - b * b;
    if denom <= 1e-12 * a * c {
        return None;
    }
    let s = (b * e - c * d) / denom;
    let t = (a * e - b * d) / denom;
    Some((p1 + d1 * s, p2 + d2 * t))
}
