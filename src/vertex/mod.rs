// Displaced-vertex fitting
//
// - `track`: helix tracks and their tangent-line linearization
// - `annealing`: temperature schedule of the track weights
// - `fitter`: the adaptive fit and its sentinel summary

pub mod annealing;
pub mod fitter;
pub mod track;

pub use annealing::GeometricAnnealing;
pub use fitter::{AdaptiveVertexFitter, FitFailure, FittedVertex, VertexSummary};
pub use track::{FittableTrack, LinearizedTrack};
