// Event data model
//
// Plain value records for one collision event, decoded once at the ingestion
// boundary. Nothing here refers back to the detector framework: genealogy
// links are indices into the pruned generator collection.

use serde::{Deserialize, Serialize};

use crate::kinematics::FourMomentum;

/// Reconstructed primary vertex
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RecoVertex {
    pub x: f64,
    pub y: f64,
    pub z: f64,
    #[serde(default)]
    pub z_error: f64,
    #[serde(default)]
    pub normalized_chi2: f64,
    #[serde(default)]
    pub ndof: f64,
}

impl RecoVertex {
    pub fn position(&self) -> [f64; 3] {
        [self.x, self.y, self.z]
    }
}

/// Missing transverse energy
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Met {
    pub et: f64,
    pub phi: f64,
    #[serde(default)]
    pub significance: f64,
}

/// Reconstructed jet
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Jet {
    pub pt: f64,
    pub eta: f64,
    pub phi: f64,
    #[serde(default)]
    pub energy: f64,
}

/// Reconstructed electron
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Electron {
    pub pt: f64,
    pub eta: f64,
    pub phi: f64,
    #[serde(default)]
    pub energy: f64,
    pub charge: i32,
    #[serde(default)]
    pub vx: f64,
    #[serde(default)]
    pub vy: f64,
    #[serde(default)]
    pub vz: f64,
}

/// Reconstructed muon. Impact parameters are those of its best track with
/// respect to the primary vertex, as computed by the event provider.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Muon {
    pub pt: f64,
    pub eta: f64,
    pub phi: f64,
    #[serde(default)]
    pub energy: f64,
    pub charge: i32,
    #[serde(default)]
    pub vx: f64,
    #[serde(default)]
    pub vy: f64,
    #[serde(default)]
    pub vz: f64,
    #[serde(default)]
    pub dxy: f64,
    #[serde(default)]
    pub dxy_error: f64,
    #[serde(default)]
    pub dz: f64,
    #[serde(default)]
    pub dz_error: f64,
    #[serde(default)]
    pub is_loose: bool,
    #[serde(default)]
    pub is_tight: bool,
    #[serde(default)]
    pub is_global: bool,
}

/// Hit-pattern summary of a track
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct HitPattern {
    pub valid_hits: i32,
    pub pixel_hits: i32,
    pub tib_hits: i32,
    pub tid_hits: i32,
    pub tob_hits: i32,
    pub tec_hits: i32,
    pub pxb_hits: i32,
    pub pxf_hits: i32,
    /// Decimal-coded pixel layers with a valid hit (barrel 1,10,100,1000; endcap 2,20,200)
    pub pixel_layer_code: i32,
    pub layers: i32,
    pub pixel_layers: i32,
    pub strip_tec_layers: i32,
    pub strip_tib_layers: i32,
    pub strip_tid_layers: i32,
    pub strip_tob_layers: i32,
    /// Packed code of the innermost hit
    pub first_hit_code: i32,
}

/// Track quality flags
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct TrackQuality {
    pub loose: bool,
    pub tight: bool,
    pub high_purity: bool,
}

/// Position of the innermost hit of a track, obtained by propagating the
/// track state through the magnetic field to the first measured layer
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct FirstHit {
    pub x: f64,
    pub y: f64,
    pub z: f64,
    /// Detector region code of the first hit (-1 when unknown)
    #[serde(default)]
    pub region: i32,
}

impl FirstHit {
    pub fn position(&self) -> [f64; 3] {
        [self.x, self.y, self.z]
    }
}

/// Reconstructed track
///
/// The reference point (vx, vy, vz) is the point of closest approach to the
/// beam line; dxy/dz uncertainties are those of the transverse and
/// longitudinal impact parameters and make the track fittable.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Track {
    pub pt: f64,
    pub eta: f64,
    pub phi: f64,
    pub charge: i32,
    pub normalized_chi2: f64,
    pub vx: f64,
    pub vy: f64,
    pub vz: f64,
    pub dxy_error: f64,
    pub dz_error: f64,
    #[serde(default)]
    pub hits: HitPattern,
    #[serde(default)]
    pub quality: TrackQuality,
    #[serde(default)]
    pub lost_hits: i32,
    #[serde(default)]
    pub algo: u32,
    #[serde(default)]
    pub original_algo: u32,
    #[serde(default)]
    pub stop_reason: u16,
    /// Propagated first-hit position, when the provider computed it
    #[serde(default)]
    pub first_hit: Option<FirstHit>,
}

impl Track {
    pub fn px(&self) -> f64 {
        self.pt * self.phi.cos()
    }

    pub fn py(&self) -> f64 {
        self.pt * self.phi.sin()
    }

    pub fn pz(&self) -> f64 {
        self.pt * self.eta.sinh()
    }

    pub fn reference_point(&self) -> [f64; 3] {
        [self.vx, self.vy, self.vz]
    }

    /// Transverse impact parameter with respect to `point`
    pub fn dxy(&self, point: [f64; 3]) -> f64 {
        if self.pt <= 0.0 {
            return 0.0;
        }
        (-(self.vx - point[0]) * self.py() + (self.vy - point[1]) * self.px()) / self.pt
    }

    /// Longitudinal impact parameter with respect to `point`
    pub fn dz(&self, point: [f64; 3]) -> f64 {
        if self.pt <= 0.0 {
            return self.vz - point[2];
        }
        let transverse = ((self.vx - point[0]) * self.px() + (self.vy - point[1]) * self.py()) / self.pt;
        (self.vz - point[2]) - transverse * self.pz() / self.pt
    }

    /// |dxy| / sigma(dxy) with respect to `point`, or -1 without a valid error
    pub fn displacement_significance(&self, point: [f64; 3]) -> f64 {
        if self.dxy_error > 0.0 {
            self.dxy(point).abs() / self.dxy_error
        } else {
            -1.0
        }
    }
}

/// Generator particle of the pruned collection (keeps the decay tree)
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct GenParticle {
    pub pdg_id: i32,
    #[serde(default)]
    pub status: i32,
    #[serde(default)]
    pub charge: i32,
    pub pt: f64,
    pub eta: f64,
    pub phi: f64,
    #[serde(default)]
    pub mass: f64,
    pub vx: f64,
    pub vy: f64,
    pub vz: f64,
    /// Indices of the mothers in the pruned collection
    #[serde(default)]
    pub mothers: Vec<usize>,
    /// Indices of the daughters in the pruned collection
    #[serde(default)]
    pub daughters: Vec<usize>,
}

impl GenParticle {
    pub fn vertex(&self) -> [f64; 3] {
        [self.vx, self.vy, self.vz]
    }

    pub fn momentum(&self) -> FourMomentum {
        FourMomentum::from_pt_eta_phi_m(self.pt, self.eta, self.phi, self.mass)
    }
}

/// Final-state generator particle of the packed collection
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PackedGenParticle {
    pub pdg_id: i32,
    pub charge: i32,
    pub pt: f64,
    pub eta: f64,
    pub phi: f64,
    #[serde(default)]
    pub mass: f64,
    /// First surviving ancestor in the pruned collection
    #[serde(default)]
    pub mother: Option<usize>,
}

/// Generator-level jet
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct GenJet {
    pub pt: f64,
    pub eta: f64,
    pub phi: f64,
    #[serde(default)]
    pub mass: f64,
    #[serde(default)]
    pub energy: f64,
}

/// All collections of one event
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Event {
    pub run: u32,
    pub lumi: u32,
    pub event: u64,
    /// Reconstructed vertices; the first one is the primary vertex
    pub vertices: Vec<RecoVertex>,
    pub met: Option<Met>,
    pub jets: Vec<Jet>,
    pub electrons: Vec<Electron>,
    pub muons: Vec<Muon>,
    pub tracks: Vec<Track>,
    pub pruned: Vec<GenParticle>,
    pub packed: Vec<PackedGenParticle>,
    pub gen_jets: Vec<GenJet>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn track(vx: f64, vy: f64, phi: f64) -> Track {
        Track {
            pt: 5.0,
            eta: 0.5,
            phi,
            charge: 1,
            vx,
            vy,
            vz: 1.0,
            dxy_error: 0.01,
            dz_error: 0.02,
            ..Default::default()
        }
    }

    #[test]
    fn test_dxy_sign_and_magnitude() {
        // Track along +x displaced by +1 cm in y: dxy = +1
        let t = track(0.0, 1.0, 0.0);
        assert!((t.dxy([0.0, 0.0, 0.0]) - 1.0).abs() < 1e-12);
        // Displaced by -1 cm in y: dxy = -1
        let t = track(0.0, -1.0, 0.0);
        assert!((t.dxy([0.0, 0.0, 0.0]) + 1.0).abs() < 1e-12);
        // Relative to a vertex on the track line: dxy = 0
        assert!(t.dxy([5.0, -1.0, 0.0]).abs() < 1e-12);
    }

    #[test]
    fn test_dz_moves_along_track() {
        let t = track(2.0, 0.0, 0.0);
        // The PCA to the origin is 2 cm back along the track; z drops by 2*sinh(eta)
        let expected = 1.0 - 2.0 * 0.5_f64.sinh();
        assert!((t.dz([0.0, 0.0, 0.0]) - expected).abs() < 1e-12);
    }

    #[test]
    fn test_displacement_significance() {
        let t = track(0.0, 0.1, 0.0);
        assert!((t.displacement_significance([0.0, 0.0, 0.0]) - 10.0).abs() < 1e-9);
        let mut bad = t.clone();
        bad.dxy_error = 0.0;
        assert_eq!(bad.displacement_significance([0.0, 0.0, 0.0]), -1.0);
    }

    #[test]
    fn test_event_deserializes_with_defaults() {
        let json = r#"{"run": 1, "event": 42, "vertices": [{"x": 0.0, "y": 0.0, "z": 0.5}]}"#;
        let event: Event = serde_json::from_str(json).unwrap();
        assert_eq!(event.event, 42);
        assert_eq!(event.vertices.len(), 1);
        assert!(event.tracks.is_empty());
        assert!(event.met.is_none());
    }
}
