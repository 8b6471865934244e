// Truth association - simulated LLPs, particle origins and track matching
//
// Everything here is derived from the generator record of one event and
// returned as immutable results; counts are the lengths of the lists.

use std::f64::consts::FRAC_PI_2;
use std::f64::consts::PI;

use serde::Serialize;
use tracing::debug;

use crate::constants::{
    DEFAULT_GEN_PV, GYRO_CM_PER_GEV, PDG_NEUTRALINO, PDG_SMUON, SAME_PARTICLE_TOL,
    VERTEX_MATCH_DIST2,
};
use crate::event::{GenParticle, PackedGenParticle, Track};
use crate::genealogy::{self, HadronFinalState, HeavyFlavour};
use crate::kinematics::{delta_phi, delta_r, distance2};

/// A long-lived neutralino from a smuon decay
#[derive(Debug, Clone, Serialize)]
pub struct SimulatedLlp {
    /// 1 or 2, in generator-record order
    pub id: u8,
    /// Index in the pruned collection
    #[serde(skip)]
    pub pruned_index: usize,
    pub pt: f64,
    pub eta: f64,
    pub phi: f64,
    pub mass: f64,
    /// Production point of its first quark daughter
    pub decay_vertex: Option<[f64; 3]>,
    /// 3D flight distance from the generator primary vertex (0 without decay vertex)
    pub dist: f64,
}

/// Which vertex a generator particle was produced at
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum LlpOrigin {
    None,
    Primary,
    Llp1,
    Llp2,
}

impl LlpOrigin {
    /// Column encoding: -1 none, 0 primary vertex, 1 or 2 for the LLPs
    pub fn code(self) -> i32 {
        match self {
            LlpOrigin::None => -1,
            LlpOrigin::Primary => 0,
            LlpOrigin::Llp1 => 1,
            LlpOrigin::Llp2 => 2,
        }
    }
}

/// Charged final-state particle produced in an LLP decay chain
#[derive(Debug, Clone, Serialize)]
pub struct GenFromLlp {
    pub llp: u8,
    pub pt: f64,
    pub eta: f64,
    pub phi: f64,
    pub charge: i32,
    pub pdg_id: i32,
    pub mass: f64,
    /// Production point (first daughter vertex of its pruned mother)
    pub vertex: [f64; 3],
    pub mother_pdg_id: i32,
    pub is_from_b: bool,
    pub is_from_c: bool,
}

/// Generator information of one event
#[derive(Debug, Clone, Serialize)]
pub struct TruthSummary {
    pub gen_pv: [f64; 3],
    pub llps: Vec<SimulatedLlp>,
    /// Origin label of every pruned particle, index-aligned with the pruned collection
    pub origins: Vec<LlpOrigin>,
    pub from_b: Vec<HadronFinalState>,
    pub from_c: Vec<HadronFinalState>,
    pub from_llp: Vec<GenFromLlp>,
    /// Delta R between the two LLPs (0 with fewer than two)
    pub dr_llp12: f64,
}

impl TruthSummary {
    pub fn llp(&self, id: u8) -> Option<&SimulatedLlp> {
        self.llps.iter().find(|l| l.id == id)
    }

    /// Number of LLPs with a reconstructed decay vertex
    pub fn n_decayed(&self) -> usize {
        self.llps.iter().filter(|l| l.decay_vertex.is_some()).count()
    }
}

fn is_quark(pdg_id: i32) -> bool {
    (1..=6).contains(&pdg_id.abs())
}

fn is_llp(pruned: &[GenParticle], p: &GenParticle) -> bool {
    p.pdg_id.abs() == PDG_NEUTRALINO
        && p
            .mothers
            .first()
            .and_then(|&m| pruned.get(m))
            .map_or(false, |m| m.pdg_id.abs() == PDG_SMUON)
}

/// First pass: generator primary vertex and the (at most two) LLPs
pub fn extract_llps(pruned: &[GenParticle]) -> ([f64; 3], Vec<SimulatedLlp>) {
    let mut gen_pv = DEFAULT_GEN_PV;
    let mut found: Vec<(usize, &GenParticle)> = Vec::new();

    for (idx, p) in pruned.iter().enumerate() {
        if p.pdg_id == PDG_SMUON {
            gen_pv = p.vertex();
        }
        if found.len() < 2 && is_llp(pruned, p) {
            found.push((idx, p));
        }
    }

    let llps = found
        .into_iter()
        .enumerate()
        .map(|(k, (idx, p))| {
            let daughters: Vec<&GenParticle> =
                p.daughters.iter().filter_map(|&d| pruned.get(d)).collect();
            let decay_vertex = daughters
                .iter()
                .find(|d| is_quark(d.pdg_id))
                .or_else(|| daughters.first())
                .map(|d| d.vertex());
            let dist = decay_vertex.map_or(0.0, |v| distance2(v, gen_pv).sqrt());
            SimulatedLlp {
                id: k as u8 + 1,
                pruned_index: idx,
                pt: p.pt,
                eta: p.eta,
                phi: p.phi,
                mass: p.mass,
                decay_vertex,
                dist,
            }
        })
        .collect();

    (gen_pv, llps)
}

/// Attaches a production point to the closest of the LLP decay vertices or
/// the primary vertex, if closer than 0.1 cm
pub fn classify_origin(vertex: [f64; 3], gen_pv: [f64; 3], llps: &[SimulatedLlp]) -> LlpOrigin {
    let dist_to = |id: u8| {
        llps.iter()
            .find(|l| l.id == id)
            .and_then(|l| l.decay_vertex)
            .map_or(f64::INFINITY, |v| distance2(vertex, v))
    };
    let d0 = distance2(vertex, gen_pv);
    let d1 = dist_to(1);
    let d2 = dist_to(2);

    if d1 < d2 && d1 < VERTEX_MATCH_DIST2 {
        LlpOrigin::Llp1
    } else if d2 < d1 && d2 < VERTEX_MATCH_DIST2 {
        LlpOrigin::Llp2
    } else if d0 < VERTEX_MATCH_DIST2 {
        LlpOrigin::Primary
    } else {
        LlpOrigin::None
    }
}

fn same_particle(pdg_id: i32, pt: f64, eta: f64, phi: f64, other: &HadronFinalState) -> bool {
    pdg_id == other.pdg_id
        && (pt / other.pt - 1.0).abs() < SAME_PARTICLE_TOL
        && (eta - other.eta).abs() < SAME_PARTICLE_TOL
        && delta_phi(phi, other.phi).abs() < SAME_PARTICLE_TOL
}

/// Second pass: charged final states descending from each LLP
pub fn collect_from_llp(
    pruned: &[GenParticle],
    packed: &[PackedGenParticle],
    llps: &[SimulatedLlp],
    from_b: &[HadronFinalState],
    from_c: &[HadronFinalState],
) -> Vec<GenFromLlp> {
    let mut out = Vec::new();
    for llp in llps {
        for p in packed.iter().filter(|p| genealogy::is_selected_final_state(p)) {
            if !genealogy::descends_from(pruned, llp.pruned_index, p) {
                continue;
            }
            let Some(mother_idx) = p.mother else { continue };
            let Some(mother) = pruned.get(mother_idx) else { continue };
            let vertex = genealogy::decay_point(pruned, mother_idx).unwrap_or_else(|| mother.vertex());

            out.push(GenFromLlp {
                llp: llp.id,
                pt: p.pt,
                eta: p.eta,
                phi: p.phi,
                charge: p.charge,
                pdg_id: p.pdg_id,
                mass: p.mass,
                vertex,
                mother_pdg_id: mother.pdg_id,
                is_from_b: from_b.iter().any(|h| same_particle(p.pdg_id, p.pt, p.eta, p.phi, h)),
                is_from_c: from_c.iter().any(|h| same_particle(p.pdg_id, p.pt, p.eta, p.phi, h)),
            });
        }
    }
    out
}

/// Runs the full truth association for one event
pub fn summarize(pruned: &[GenParticle], packed: &[PackedGenParticle]) -> TruthSummary {
    let (gen_pv, llps) = extract_llps(pruned);
    let origins = pruned
        .iter()
        .map(|p| classify_origin(p.vertex(), gen_pv, &llps))
        .collect();
    let from_b = genealogy::match_heavy_flavour(pruned, packed, HeavyFlavour::Bottom);
    let from_c = genealogy::match_heavy_flavour(pruned, packed, HeavyFlavour::Charm);
    let from_llp = collect_from_llp(pruned, packed, &llps, &from_b, &from_c);

    let dr_llp12 = match (llps.first(), llps.get(1)) {
        (Some(a), Some(b)) => delta_r(a.eta, a.phi, b.eta, b.phi),
        _ => 0.0,
    };

    debug!(
        n_llp = llps.len(),
        n_from_llp = from_llp.len(),
        n_from_b = from_b.len(),
        n_from_c = from_c.len(),
        "Truth summary"
    );

    TruthSummary {
        gen_pv,
        llps,
        origins,
        from_b,
        from_c,
        from_llp,
        dr_llp12,
    }
}

/// Azimuth at the primary vertex of a charged particle produced at a
/// displaced point, following its helix back in the solenoid field.
/// The result may be off by pi; callers fold the difference.
pub fn phi_at_origin(charge: i32, pt: f64, phi: f64, dx: f64, dy: f64, b_field: f64) -> f64 {
    let q_r = charge as f64 * pt * GYRO_CM_PER_GEV / b_field;
    let sin0 = q_r * phi.sin() + dx;
    let cos0 = q_r * phi.cos() - dy;
    sin0.atan2(cos0)
}

/// Matching windows on |dpt/pt|, |deta| and |dphi| versus the number of valid hits
pub fn resolution_window(n_hits: i32) -> (f64, f64, f64) {
    match n_hits {
        n if n <= 10 => (0.70, 0.30, 0.08),
        n if n <= 13 => (0.20, 0.12, 0.05),
        n if n <= 17 => (0.08, 0.04, 0.03),
        _ => (0.07, 0.02, 0.02),
    }
}

/// Folds an azimuth difference into [-pi/2, pi/2] to absorb the pi ambiguity
fn fold_half_pi(dphi: f64) -> f64 {
    let d = delta_phi(dphi, 0.0);
    if d < -FRAC_PI_2 {
        d + PI
    } else if d > FRAC_PI_2 {
        d - PI
    } else {
        d
    }
}

/// Truth fields attached to a reconstructed track
#[derive(Debug, Clone, Serialize)]
pub struct TrackTruthMatch {
    /// LLP the matched particle comes from, -1 without match
    pub llp: i32,
    pub is_from_b: bool,
    pub is_from_c: bool,
    pub pt: f64,
    pub eta: f64,
    pub phi: f64,
    pub charge: i32,
    pub pdg_id: i32,
    pub mass: f64,
    pub x: f64,
    pub y: f64,
    pub z: f64,
    /// Signed distance between the track first hit and the particle production point
    pub d_first_gen: f64,
}

impl Default for TrackTruthMatch {
    fn default() -> Self {
        Self {
            llp: -1,
            is_from_b: false,
            is_from_c: false,
            pt: 0.0,
            eta: 0.0,
            phi: 0.0,
            charge: 0,
            pdg_id: 0,
            mass: 0.0,
            x: 0.0,
            y: 0.0,
            z: 0.0,
            d_first_gen: 0.0,
        }
    }
}

/// Matches a track to a final state from an LLP decay. Candidates must have
/// the same charge and fall inside the hit-dependent resolution window; the
/// one whose production point is closest to the track's first hit wins.
pub fn match_track(
    track: &Track,
    first_hit: [f64; 3],
    from_llp: &[GenFromLlp],
    gen_pv: [f64; 3],
    b_field: f64,
) -> TrackTruthMatch {
    let (max_dpt, max_deta, max_dphi) = resolution_window(track.hits.valid_hits);

    let best = from_llp
        .iter()
        .filter(|g| g.charge == track.charge)
        .filter(|g| {
            let phi0 = phi_at_origin(
                g.charge,
                g.pt,
                g.phi,
                g.vertex[0] - gen_pv[0],
                g.vertex[1] - gen_pv[1],
                b_field,
            );
            let dpt = (track.pt - g.pt) / track.pt;
            let deta = track.eta - g.eta;
            let dphi = fold_half_pi(track.phi - phi0);
            dpt.abs() < max_dpt && deta.abs() < max_deta && dphi.abs() < max_dphi
        })
        .map(|g| (g, distance2(first_hit, g.vertex)))
        .fold(None::<(&GenFromLlp, f64)>, |best, (g, d2)| match best {
            Some((_, best_d2)) if best_d2 <= d2 => best,
            _ => Some((g, d2)),
        });

    let Some((g, d2)) = best else {
        return TrackTruthMatch::default();
    };

    let dot = first_hit[0] * g.vertex[0] + first_hit[1] * g.vertex[1] + first_hit[2] * g.vertex[2];
    let sign = if dot < 0.0 { -1.0 } else { 1.0 };

    TrackTruthMatch {
        llp: g.llp as i32,
        is_from_b: g.is_from_b,
        is_from_c: g.is_from_c,
        pt: g.pt,
        eta: g.eta,
        phi: g.phi,
        charge: g.charge,
        pdg_id: g.pdg_id,
        mass: g.mass,
        x: g.vertex[0],
        y: g.vertex[1],
        z: g.vertex[2],
        d_first_gen: d2.sqrt() * sign,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn gen(pdg_id: i32, mothers: Vec<usize>, daughters: Vec<usize>, vertex: [f64; 3]) -> GenParticle {
        GenParticle {
            pdg_id,
            pt: 50.0,
            eta: 0.0,
            phi: 0.0,
            mass: 1.0,
            vx: vertex[0],
            vy: vertex[1],
            vz: vertex[2],
            mothers,
            daughters,
            ..Default::default()
        }
    }

    /// smuon -> neutralino(1) -> d d~ at (1,1,1)
    ///       -> neutralino(2) -> u u~ at (-2,0,3)
    fn two_llp_event() -> Vec<GenParticle> {
        let mut pruned = vec![
            gen(PDG_SMUON, vec![], vec![1, 2], [0.0, 0.0, 0.5]),
            gen(PDG_NEUTRALINO, vec![0], vec![3, 4], [0.0, 0.0, 0.5]),
            gen(PDG_NEUTRALINO, vec![0], vec![5, 6], [0.0, 0.0, 0.5]),
            gen(1, vec![1], vec![], [1.0, 1.0, 1.0]),
            gen(-1, vec![1], vec![], [1.0, 1.0, 1.0]),
            gen(2, vec![2], vec![], [-2.0, 0.0, 3.0]),
            gen(-2, vec![2], vec![], [-2.0, 0.0, 3.0]),
        ];
        pruned[1].eta = 0.4;
        pruned[1].phi = 0.5;
        pruned[2].eta = -0.6;
        pruned[2].phi = -2.5;
        pruned
    }

    #[test]
    fn test_extract_llps() {
        let pruned = two_llp_event();
        let (pv, llps) = extract_llps(&pruned);
        assert_eq!(pv, [0.0, 0.0, 0.5]);
        assert_eq!(llps.len(), 2);
        assert_eq!(llps[0].id, 1);
        assert_eq!(llps[0].decay_vertex, Some([1.0, 1.0, 1.0]));
        assert_eq!(llps[1].decay_vertex, Some([-2.0, 0.0, 3.0]));
        let expected = (1.0_f64 + 1.0 + 0.25).sqrt();
        assert!((llps[0].dist - expected).abs() < 1e-12);
    }

    #[test]
    fn test_extract_without_smuon() {
        let pruned = vec![gen(PDG_NEUTRALINO, vec![], vec![], [0.0; 3])];
        let (pv, llps) = extract_llps(&pruned);
        assert_eq!(pv, DEFAULT_GEN_PV);
        // A neutralino without a smuon mother is not an LLP
        assert!(llps.is_empty());
    }

    #[test]
    fn test_classify_origin() {
        let pruned = two_llp_event();
        let (pv, llps) = extract_llps(&pruned);
        assert_eq!(classify_origin([1.0, 1.0, 1.05], pv, &llps), LlpOrigin::Llp1);
        assert_eq!(classify_origin([-2.0, 0.05, 3.0], pv, &llps), LlpOrigin::Llp2);
        assert_eq!(classify_origin([0.0, 0.0, 0.5], pv, &llps), LlpOrigin::Primary);
        assert_eq!(classify_origin([10.0, 0.0, 0.0], pv, &llps), LlpOrigin::None);
        // Just outside the 0.1 cm sphere
        assert_eq!(classify_origin([1.0, 1.0, 1.11], pv, &llps), LlpOrigin::None);
        assert_eq!(LlpOrigin::None.code(), -1);
        assert_eq!(LlpOrigin::Llp2.code(), 2);
    }

    fn decayed(id: u8, decay_vertex: Option<[f64; 3]>) -> SimulatedLlp {
        SimulatedLlp {
            id,
            pruned_index: 0,
            pt: 100.0,
            eta: 0.0,
            phi: 0.0,
            mass: 200.0,
            decay_vertex,
            dist: 0.0,
        }
    }

    #[test]
    fn test_classify_origin_ties_and_missing_llp() {
        let llps = vec![
            decayed(1, Some([0.0, 0.0, 0.02])),
            decayed(2, Some([0.0, 0.0, -0.02])),
        ];
        let origin = [0.0; 3];
        // Equally close to both decay points: neither LLP wins
        assert_eq!(classify_origin(origin, origin, &llps), LlpOrigin::Primary);
        assert_eq!(classify_origin(origin, [5.0, 5.0, 5.0], &llps), LlpOrigin::None);

        // A missing LLP, or one without decay point, is infinitely far away
        let only_first = vec![decayed(1, Some([0.0, 0.0, 0.02]))];
        assert_eq!(classify_origin(origin, [5.0; 3], &only_first), LlpOrigin::Llp1);
        let undecayed = vec![decayed(1, None), decayed(2, Some([0.0, 0.0, -0.02]))];
        assert_eq!(classify_origin(origin, [5.0; 3], &undecayed), LlpOrigin::Llp2);
        assert_eq!(classify_origin(origin, [5.0; 3], &[]), LlpOrigin::None);
    }

    #[test]
    fn test_summary_labels_and_from_llp() {
        let pruned = two_llp_event();
        let packed = vec![
            PackedGenParticle { pdg_id: 211, charge: 1, pt: 3.0, eta: 0.4, phi: 0.5, mass: 0.14, mother: Some(3) },
            PackedGenParticle { pdg_id: -211, charge: -1, pt: 2.0, eta: -0.6, phi: -2.4, mass: 0.14, mother: Some(6) },
            PackedGenParticle { pdg_id: 22, charge: 0, pt: 2.0, eta: 0.0, phi: 0.0, mass: 0.0, mother: Some(6) },
        ];
        let truth = summarize(&pruned, &packed);
        assert_eq!(truth.origins[3], LlpOrigin::Llp1);
        assert_eq!(truth.origins[5], LlpOrigin::Llp2);
        assert_eq!(truth.origins[0], LlpOrigin::Primary);
        assert_eq!(truth.from_llp.len(), 2);
        assert_eq!(truth.from_llp[0].llp, 1);
        assert_eq!(truth.from_llp[1].llp, 2);
        // Quarks have no daughters: production point is the mother's own vertex
        assert_eq!(truth.from_llp[1].vertex, [-2.0, 0.0, 3.0]);
        assert!(truth.dr_llp12 > 0.0);
        assert_eq!(truth.n_decayed(), 2);
    }

    #[test]
    fn test_phi_at_origin_prompt_particle() {
        // Produced at the origin, the azimuth is unchanged (up to pi for negative charge)
        let phi = phi_at_origin(1, 5.0, 0.7, 0.0, 0.0, 3.8);
        assert!((phi - 0.7).abs() < 1e-12);
        let phi = phi_at_origin(-1, 5.0, 0.7, 0.0, 0.0, 3.8);
        assert!((delta_phi(phi, 0.7 + PI)).abs() < 1e-12);
    }

    #[test]
    fn test_phi_at_origin_stiff_track_is_straight() {
        // A very stiff particle produced on its own line of flight keeps its azimuth
        let phi = phi_at_origin(1, 1e6, 0.3, 10.0 * 0.3_f64.cos(), 10.0 * 0.3_f64.sin(), 3.8);
        assert!((phi - 0.3).abs() < 1e-4);
    }

    #[test]
    fn test_resolution_windows() {
        assert_eq!(resolution_window(8), (0.70, 0.30, 0.08));
        assert_eq!(resolution_window(10), (0.70, 0.30, 0.08));
        assert_eq!(resolution_window(13), (0.20, 0.12, 0.05));
        assert_eq!(resolution_window(17), (0.08, 0.04, 0.03));
        assert_eq!(resolution_window(25), (0.07, 0.02, 0.02));
    }

    fn from_llp(llp: u8, charge: i32, pt: f64, eta: f64, phi: f64, vertex: [f64; 3]) -> GenFromLlp {
        GenFromLlp {
            llp,
            pt,
            eta,
            phi,
            charge,
            pdg_id: 211 * charge,
            mass: 0.14,
            vertex,
            mother_pdg_id: 1,
            is_from_b: false,
            is_from_c: false,
        }
    }

    #[test]
    fn test_match_track_picks_closest_production_point() {
        let mut track = Track {
            pt: 10.0,
            eta: 0.5,
            charge: 1,
            ..Default::default()
        };
        track.hits.valid_hits = 20;
        let gen_pv = [0.0; 3];
        let far = from_llp(1, 1, 10.0, 0.5, 0.0, [1.0, 0.0, 0.0]);
        let near = from_llp(2, 1, 10.0, 0.5, 0.0, [5.0, 0.0, 0.0]);

        let m = match_track(&track, [4.0, 0.0, 0.0], &[far.clone(), near.clone()], gen_pv, 3.8);
        assert_eq!(m.llp, 2);
        assert_eq!(m.x, 5.0);

        // Equal distances: the first candidate is kept
        let m = match_track(&track, [3.0, 0.0, 0.0], &[far, near], gen_pv, 3.8);
        assert_eq!(m.llp, 1);

        let wrong_charge = from_llp(1, -1, 10.0, 0.5, 0.0, [0.0; 3]);
        let m = match_track(&track, [0.0; 3], &[wrong_charge], gen_pv, 3.8);
        assert_eq!(m.llp, -1);
        assert_eq!(m.d_first_gen, 0.0);
    }

    #[test]
    fn test_match_track_window_depends_on_hits() {
        let mut track = Track {
            pt: 10.0,
            eta: 0.5,
            phi: 0.0,
            charge: 1,
            ..Default::default()
        };
        let cand = from_llp(1, 1, 8.5, 0.5, 0.0, [0.0; 3]);
        // dpt/pt = 0.15: accepted with few hits, rejected with many
        track.hits.valid_hits = 12;
        assert_eq!(match_track(&track, [0.0; 3], &[cand.clone()], [0.0; 3], 3.8).llp, 1);
        track.hits.valid_hits = 18;
        assert_eq!(match_track(&track, [0.0; 3], &[cand], [0.0; 3], 3.8).llp, -1);
    }

    #[test]
    fn test_match_track_signed_distance() {
        let mut track = Track {
            pt: 10.0,
            eta: 0.5,
            phi: 0.0,
            charge: 1,
            ..Default::default()
        };
        track.hits.valid_hits = 20;
        // Produced at (1,0,0) with phi 0: back-extrapolated phi stays within the window
        let cand = from_llp(1, 1, 10.0, 0.5, 0.0, [1.0, 0.0, 0.0]);
        let m = match_track(&track, [3.0, 0.0, 0.0], &[cand.clone()], [0.0; 3], 3.8);
        assert!((m.d_first_gen - 2.0).abs() < 1e-12);
        let m = match_track(&track, [-1.0, 0.0, 0.0], &[cand], [0.0; 3], 3.8);
        assert!((m.d_first_gen + 2.0).abs() < 1e-12);
    }
}
