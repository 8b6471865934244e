// Adaptive vertex fitter
//
// Iterative weighted fit with annealed track weights:
//   1. seed the vertex at a linearization point found from track crossings
//   2. weight every track by its compatibility with the current vertex
//   3. refit from the seed with Kalman updates of the weighted tracks
//   4. re-linearize when the vertex moved too far, cool the temperature
//   5. stop when the vertex is stable and the schedule has finished
//
// The fitter holds only its parameters; every call starts from scratch.

use nalgebra::{Matrix3, Vector3};
use serde::Serialize;
use thiserror::Error;
use tracing::debug;

use super::annealing::GeometricAnnealing;
use super::track::{closest_approach, FittableTrack, LinearizedTrack};
use crate::constants::{
    AVF_ACCEPTED_WEIGHT, AVF_MAX_LP_SHIFT, AVF_MAX_SHIFT, AVF_MAX_STEP, AVF_RATIO, AVF_SIGMA_CUT,
    AVF_T_INI, AVF_WEIGHT_THRESHOLD, TRACKER_HALF_LENGTH, TRACKER_RADIUS, VTX_SENTINEL_CHI2,
    VTX_SENTINEL_POS,
};

/// Variance (cm^2) of the seed position used as prior of every refit
const SEED_VARIANCE: f64 = 1.0e4;

/// Why a fit produced no vertex
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum FitFailure {
    #[error("fewer than two tracks")]
    TooFewTracks,
    #[error("no convergence within the step budget")]
    NotConverged,
    #[error("fitted position outside the tracker volume")]
    OutsideTracker,
    #[error("fewer than two tracks above the weight threshold")]
    TooFewSignificantTracks,
    #[error("singular vertex covariance")]
    Singular,
}

impl FitFailure {
    /// Value of the vertex status column
    pub fn status(self) -> i32 {
        match self {
            FitFailure::TooFewTracks => 1,
            FitFailure::NotConverged => 2,
            FitFailure::OutsideTracker => 3,
            FitFailure::TooFewSignificantTracks => 4,
            FitFailure::Singular => 5,
        }
    }
}

/// A successfully fitted vertex
#[derive(Debug, Clone, Serialize)]
pub struct FittedVertex {
    pub position: [f64; 3],
    /// Square roots of the covariance diagonal
    pub position_error: [f64; 3],
    pub chi2: f64,
    /// 2 * sum(weights) - 3
    pub ndof: f64,
    /// Final weight of every input track, in input order
    pub weights: Vec<f64>,
    pub steps: usize,
}

impl FittedVertex {
    /// chi2 / ndof, or the raw chi2 when ndof is not positive
    pub fn normalized_chi2(&self) -> f64 {
        if self.ndof > 0.0 {
            self.chi2 / self.ndof
        } else {
            self.chi2
        }
    }

    /// Tracks with weight above one half
    pub fn n_accepted(&self) -> usize {
        self.weights.iter().filter(|&&w| w > AVF_ACCEPTED_WEIGHT).count()
    }
}

#[derive(Debug, Clone)]
struct VertexState {
    position: Vector3<f64>,
    covariance: Matrix3<f64>,
    information: Matrix3<f64>,
}

impl VertexState {
    fn seed(position: Vector3<f64>) -> Self {
        Self {
            position,
            covariance: Matrix3::identity() * SEED_VARIANCE,
            information: Matrix3::identity() / SEED_VARIANCE,
        }
    }

    /// Kalman update with one weighted track, in information form
    fn update(&self, track: &LinearizedTrack, weight: f64) -> Option<Self> {
        let a = &track.jacobian;
        let gain = a.transpose() * track.weight * a * weight;
        let information = self.information + gain;
        let covariance = information.try_inverse()?;
        let position = covariance * (self.information * self.position + gain * track.origin);
        Some(Self {
            position,
            covariance,
            information,
        })
    }
}

/// Parameters of the adaptive fit
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AdaptiveVertexFitter {
    pub sigma_cut: f64,
    pub t_ini: f64,
    pub ratio: f64,
    /// Vertex shift (cm) between iterations below which the fit is stable
    pub max_shift: f64,
    /// Distance (cm) from the linearization point that triggers re-linearization
    pub max_lp_shift: f64,
    pub max_step: usize,
    /// Tracks below this weight are left out of a refit
    pub weight_threshold: f64,
}

impl Default for AdaptiveVertexFitter {
    fn default() -> Self {
        Self {
            sigma_cut: AVF_SIGMA_CUT,
            t_ini: AVF_T_INI,
            ratio: AVF_RATIO,
            max_shift: AVF_MAX_SHIFT,
            max_lp_shift: AVF_MAX_LP_SHIFT,
            max_step: AVF_MAX_STEP,
            weight_threshold: AVF_WEIGHT_THRESHOLD,
        }
    }
}

/// Component-wise median of the pairwise closest-approach midpoints of the
/// tracks' tangents, refined once after re-linearizing around the first guess
pub fn linearization_point(tracks: &[FittableTrack]) -> Option<Vector3<f64>> {
    let first = crossing_median(&tracks.iter().map(|t| t.linearize(&reference_of(t))).collect::<Vec<_>>())?;
    let refined = crossing_median(&tracks.iter().map(|t| t.linearize(&first)).collect::<Vec<_>>());
    Some(refined.unwrap_or(first))
}

fn reference_of(track: &FittableTrack) -> Vector3<f64> {
    track.point_at(0.0).0
}

fn crossing_median(lines: &[LinearizedTrack]) -> Option<Vector3<f64>> {
    let mut points: Vec<Vector3<f64>> = Vec::new();
    for (i, a) in lines.iter().enumerate() {
        for b in &lines[i + 1..] {
            if let Some((pa, pb)) = closest_approach(&a.origin, &a.direction, &b.origin, &b.direction) {
                points.push((pa + pb) * 0.5);
            }
        }
    }
    if points.is_empty() {
        return None;
    }
    let median = |k: usize| {
        let mut v: Vec<f64> = points.iter().map(|p| p[k]).collect();
        v.sort_by(|x, y| x.total_cmp(y));
        let n = v.len();
        if n % 2 == 1 {
            v[n / 2]
        } else {
            0.5 * (v[n / 2 - 1] + v[n / 2])
        }
    };
    Some(Vector3::new(median(0), median(1), median(2)))
}

fn inside_tracker(p: &Vector3<f64>) -> bool {
    p.x.hypot(p.y) < TRACKER_RADIUS && p.z.abs() < TRACKER_HALF_LENGTH
}

impl AdaptiveVertexFitter {
    fn refit(
        &self,
        seed: &Vector3<f64>,
        lines: &[LinearizedTrack],
        weights: &[f64],
    ) -> Result<VertexState, FitFailure> {
        let mut state = VertexState::seed(*seed);
        for (line, &w) in lines.iter().zip(weights) {
            if w > self.weight_threshold {
                state = state.update(line, w).ok_or(FitFailure::Singular)?;
            }
        }
        Ok(state)
    }

    /// Fits a common vertex to `tracks`
    pub fn fit(&self, tracks: &[FittableTrack]) -> Result<FittedVertex, FitFailure> {
        if tracks.len() < 2 {
            return Err(FitFailure::TooFewTracks);
        }

        let mut annealing = GeometricAnnealing::new(self.sigma_cut, self.t_ini, self.ratio);
        let mut lp = linearization_point(tracks).ok_or(FitFailure::Singular)?;
        let mut lines: Vec<LinearizedTrack> = tracks.iter().map(|t| t.linearize(&lp)).collect();
        let mut vertex = lp;
        let mut weights;
        let mut state;
        let mut step = 0;

        loop {
            weights = lines
                .iter()
                .map(|l| annealing.weight(l.chi2(&vertex)))
                .collect::<Vec<f64>>();
            let significant = weights.iter().filter(|&&w| w > self.weight_threshold).count();
            if significant < 2 {
                return Err(FitFailure::TooFewSignificantTracks);
            }

            state = self.refit(&lp, &lines, &weights)?;
            let shift = (state.position - vertex).norm();
            vertex = state.position;

            if (vertex - lp).norm() > self.max_lp_shift {
                lp = vertex;
                lines = tracks.iter().map(|t| t.linearize(&lp)).collect();
            }

            annealing.anneal();
            step += 1;

            if shift < self.max_shift && annealing.is_annealed() {
                break;
            }
            if step >= self.max_step {
                debug!(step, "Vertex fit did not converge");
                return Err(FitFailure::NotConverged);
            }
        }

        if !inside_tracker(&vertex) {
            return Err(FitFailure::OutsideTracker);
        }

        let chi2: f64 = lines
            .iter()
            .zip(&weights)
            .filter(|&(_, &w)| w > self.weight_threshold)
            .map(|(l, &w)| w * l.chi2(&vertex))
            .sum();
        let ndof = 2.0 * weights.iter().sum::<f64>() - 3.0;
        let cov = state.covariance;

        debug!(
            n_tracks = tracks.len(),
            steps = step,
            x = vertex.x,
            y = vertex.y,
            z = vertex.z,
            chi2,
            ndof,
            "Vertex fitted"
        );

        Ok(FittedVertex {
            position: [vertex.x, vertex.y, vertex.z],
            position_error: [
                cov[(0, 0)].max(0.0).sqrt(),
                cov[(1, 1)].max(0.0).sqrt(),
                cov[(2, 2)].max(0.0).sqrt(),
            ],
            chi2,
            ndof,
            weights,
            steps: step,
        })
    }
}

/// Output-side view of a fit: failures collapse to the sentinel vertex
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct VertexSummary {
    /// Number of tracks given to the fit
    pub n_input: usize,
    pub position: [f64; 3],
    pub normalized_chi2: f64,
    /// Tracks with weight above one half
    pub n_accepted: usize,
    /// Per-track weights, empty unless the fit succeeded
    pub weights: Vec<f64>,
    /// 0 for a valid fit, else the failure code
    pub status: i32,
}

impl VertexSummary {
    pub fn sentinel(n_input: usize, failure: FitFailure) -> Self {
        Self {
            n_input,
            position: [VTX_SENTINEL_POS; 3],
            normalized_chi2: VTX_SENTINEL_CHI2,
            n_accepted: 0,
            weights: Vec::new(),
            status: failure.status(),
        }
    }

    pub fn from_fit(n_input: usize, fit: Result<FittedVertex, FitFailure>) -> Self {
        match fit {
            Ok(v) => Self {
                n_input,
                position: v.position,
                normalized_chi2: v.normalized_chi2(),
                n_accepted: v.n_accepted(),
                status: 0,
                weights: v.weights,
            },
            Err(failure) => Self::sentinel(n_input, failure),
        }
    }

    pub fn is_valid(&self) -> bool {
        self.status == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::{Rng, SeedableRng};

    const B: f64 = 3.8;

    fn through(vertex: [f64; 3], pt: f64, eta: f64, phi: f64, charge: i32) -> FittableTrack {
        FittableTrack::new(vertex, pt, eta, phi, charge, 0.01, 0.01, B).unwrap()
    }

    /// Same helix as `through`, but with its reference point moved by `s` along the track
    fn moved(vertex: [f64; 3], pt: f64, eta: f64, phi: f64, charge: i32, s: f64, offset: [f64; 3]) -> FittableTrack {
        let (p, phi_s) = through(vertex, pt, eta, phi, charge).point_at(s);
        FittableTrack::new(
            [p.x + offset[0], p.y + offset[1], p.z + offset[2]],
            pt,
            eta,
            phi_s,
            charge,
            0.01,
            0.01,
            B,
        )
        .unwrap()
    }

    #[test]
    fn test_too_few_tracks() {
        let fitter = AdaptiveVertexFitter::default();
        assert_eq!(fitter.fit(&[]).unwrap_err(), FitFailure::TooFewTracks);
        let one = through([1.0, 1.0, 1.0], 5.0, 0.0, 0.0, 1);
        assert_eq!(fitter.fit(&[one]).unwrap_err(), FitFailure::TooFewTracks);
    }

    #[test]
    fn test_two_intersecting_tracks() {
        let v = [2.0, 1.0, 3.0];
        let tracks = vec![through(v, 5.0, 0.3, 0.4, 1), through(v, 3.0, -0.2, 1.6, -1)];
        let fit = AdaptiveVertexFitter::default().fit(&tracks).unwrap();
        for k in 0..3 {
            assert!((fit.position[k] - v[k]).abs() < 1e-4);
        }
        assert!(fit.chi2.is_finite() && fit.chi2 >= 0.0);
        assert!(fit.normalized_chi2() >= 0.0);
        assert_eq!(fit.weights.len(), 2);
        assert!(fit.weights.iter().all(|w| (0.0..=1.0).contains(w)));
        assert_eq!(fit.n_accepted(), 2);
        assert!(fit.steps <= AVF_MAX_STEP);
    }

    #[test]
    fn test_displaced_vertex_with_curved_tracks() {
        let v = [3.0, -2.0, 5.0];
        let mut rng = StdRng::seed_from_u64(7);
        let tracks: Vec<FittableTrack> = (0..6)
            .map(|i| {
                let phi = rng.gen_range(-0.6..0.6) - 0.5;
                let eta = rng.gen_range(-1.0..1.0);
                let pt = rng.gen_range(1.0..8.0);
                let charge = if i % 2 == 0 { 1 } else { -1 };
                let s = rng.gen_range(2.0..10.0);
                let offset = [
                    rng.gen_range(-0.005..0.005),
                    rng.gen_range(-0.005..0.005),
                    rng.gen_range(-0.005..0.005),
                ];
                moved(v, pt, eta, phi, charge, s, offset)
            })
            .collect();

        let fit = AdaptiveVertexFitter::default().fit(&tracks).unwrap();
        for k in 0..3 {
            assert!((fit.position[k] - v[k]).abs() < 0.05, "{:?}", fit.position);
        }
        assert_eq!(fit.weights.len(), 6);
        assert!(fit.n_accepted() >= 4);
    }

    #[test]
    fn test_outlier_is_downweighted() {
        let v = [1.0, 1.0, 0.0];
        let mut tracks: Vec<FittableTrack> = [0.0, 0.7, 1.4, 2.1]
            .iter()
            .map(|&phi| through(v, 4.0, 0.2, phi, 1))
            .collect();
        // Misses the vertex by half a centimetre along z
        tracks.push(moved(v, 4.0, -0.3, 3.0, -1, 1.0, [0.0, 0.0, 0.5]));

        let fit = AdaptiveVertexFitter::default().fit(&tracks).unwrap();
        assert!(fit.weights[..4].iter().all(|&w| w > 0.5));
        assert!(fit.weights[4] < 0.5);
        assert_eq!(fit.n_accepted(), 4);
    }

    #[test]
    fn test_vertex_outside_tracker() {
        let v = [150.0, 0.0, 0.0];
        let tracks = vec![through(v, 5.0, 0.3, 0.4, 1), through(v, 3.0, -0.2, 1.6, -1)];
        assert_eq!(
            AdaptiveVertexFitter::default().fit(&tracks).unwrap_err(),
            FitFailure::OutsideTracker
        );
    }

    #[test]
    fn test_incompatible_tracks() {
        // Two tracks 5 cm apart: neither is compatible with their midpoint
        let a = through([0.0, 0.0, 0.0], 5.0, 0.0, 0.0, 1);
        let b = through([0.0, 0.0, 5.0], 5.0, 0.0, 1.0, 1);
        assert_eq!(
            AdaptiveVertexFitter::default().fit(&[a, b]).unwrap_err(),
            FitFailure::TooFewSignificantTracks
        );
    }

    #[test]
    fn test_sentinel_summary() {
        for failure in [
            FitFailure::TooFewTracks,
            FitFailure::NotConverged,
            FitFailure::OutsideTracker,
            FitFailure::TooFewSignificantTracks,
            FitFailure::Singular,
        ] {
            let s = VertexSummary::from_fit(3, Err(failure));
            assert_eq!(s.position, [-100.0; 3]);
            assert_eq!(s.normalized_chi2, -10.0);
            assert_eq!(s.n_accepted, 0);
            assert!(s.weights.is_empty());
            assert_eq!(s.status, failure.status());
            assert!(!s.is_valid());
        }
    }

    #[test]
    fn test_normalized_chi2_without_dof() {
        let v = FittedVertex {
            position: [0.0; 3],
            position_error: [0.0; 3],
            chi2: 2.0,
            ndof: -0.5,
            weights: vec![0.6, 0.4],
            steps: 8,
        };
        assert_eq!(v.normalized_chi2(), 2.0);
        assert_eq!(v.n_accepted(), 1);
        let v = FittedVertex { ndof: 4.0, ..v };
        assert_eq!(v.normalized_chi2(), 0.5);
    }
}
