// Track classifier - the scoring seam between track selection and the model
//
// The selection pipeline only needs `score(features) -> real`. Models are
// loaded once at start-up and shared read-only across event workers, hence
// the Send + Sync bound.

pub mod forest;

use serde::Serialize;

pub use forest::BoostedForest;

/// Input variable names, in the order the model expects them
pub const FEATURE_NAMES: [&str; 7] = [
    "mva_track_pt",
    "mva_track_eta",
    "mva_track_nchi2",
    "mva_track_nhits",
    "mva_ntrk10",
    "mva_drSig",
    "mva_track_isinjet",
];

/// Per-track classifier inputs
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct TrackFeatures {
    pub pt: f64,
    pub eta: f64,
    pub nchi2: f64,
    pub nhits: f64,
    pub ntrk10: f64,
    pub dr_sig: f64,
    pub is_in_jet: f64,
}

impl TrackFeatures {
    pub fn to_array(&self) -> [f64; 7] {
        [
            self.pt,
            self.eta,
            self.nchi2,
            self.nhits,
            self.ntrk10,
            self.dr_sig,
            self.is_in_jet,
        ]
    }
}

/// Secondary-vertex likelihood of a track
pub trait TrackScorer: Send + Sync {
    fn score(&self, features: &TrackFeatures) -> f64;
}

impl<F> TrackScorer for F
where
    F: Fn(&TrackFeatures) -> f64 + Send + Sync,
{
    fn score(&self, features: &TrackFeatures) -> f64 {
        self(features)
    }
}
