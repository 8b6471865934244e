// Generator genealogy - ancestry queries and heavy-flavour hadron matching
//
// The pruned generator collection is a DAG: a particle may have several
// mothers. Links are indices into the collection.

use std::collections::HashSet;

use serde::Serialize;

use crate::constants::{GEN_FINAL_MAX_ETA, GEN_FINAL_MIN_PT, GEN_PRUNED_MAX_ETA};
use crate::event::{GenParticle, PackedGenParticle};

/// Position recorded when a hadron has no daughter to take its decay point from
const NO_DECAY_POINT: [f64; 3] = [-10.0, -10.0, -10.0];

/// True if `ancestor` is `particle` or is reached from `particle` by following
/// mother links. Every node is visited at most once, so a malformed
/// genealogy with cycles still terminates.
pub fn is_ancestor(pruned: &[GenParticle], ancestor: usize, particle: usize) -> bool {
    let mut visited = HashSet::new();
    let mut stack = vec![particle];
    while let Some(idx) = stack.pop() {
        if idx == ancestor {
            return true;
        }
        if !visited.insert(idx) {
            continue;
        }
        if let Some(p) = pruned.get(idx) {
            stack.extend(p.mothers.iter().copied().filter(|m| !visited.contains(m)));
        }
    }
    false
}

/// True if the packed particle's first pruned ancestor descends from `ancestor`
pub fn descends_from(pruned: &[GenParticle], ancestor: usize, packed: &PackedGenParticle) -> bool {
    match packed.mother {
        Some(mother) => is_ancestor(pruned, ancestor, mother),
        None => false,
    }
}

/// Charged final-state particle inside the tracker acceptance
pub fn is_selected_final_state(p: &PackedGenParticle) -> bool {
    p.pt > GEN_FINAL_MIN_PT && p.eta.abs() < GEN_FINAL_MAX_ETA && p.charge != 0
}

/// Heavy quark flavour carried by a hadron
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum HeavyFlavour {
    Charm,
    Bottom,
}

impl HeavyFlavour {
    fn digit(self) -> i32 {
        match self {
            HeavyFlavour::Charm => 4,
            HeavyFlavour::Bottom => 5,
        }
    }

    /// True if the hundreds (meson) or thousands (baryon) digit of the PDG id
    /// is this flavour
    pub fn is_carried_by(self, pdg_id: i32) -> bool {
        let id = pdg_id.abs();
        (id / 100) % 10 == self.digit() || (id / 1000) % 10 == self.digit()
    }
}

/// True if `idx` is a hadron of `flavour` none of whose direct daughters
/// still carries that flavour, i.e. the last one in the decay chain
pub fn is_final_hadron(pruned: &[GenParticle], idx: usize, flavour: HeavyFlavour) -> bool {
    let Some(p) = pruned.get(idx) else {
        return false;
    };
    if !flavour.is_carried_by(p.pdg_id) {
        return false;
    }
    !p.daughters
        .iter()
        .filter_map(|&d| pruned.get(d))
        .any(|d| flavour.is_carried_by(d.pdg_id))
}

/// A charged final-state particle traced back to a final heavy hadron
#[derive(Debug, Clone, Serialize)]
pub struct HadronFinalState {
    pub pt: f64,
    pub eta: f64,
    pub phi: f64,
    pub charge: i32,
    pub pdg_id: i32,
    /// PDG id of the hadron it comes from
    pub hadron_pdg_id: i32,
    /// Hadron decay point, taken as its first daughter's production vertex
    pub decay_point: [f64; 3],
}

/// Decay point of a pruned particle: production vertex of its first daughter
pub fn decay_point(pruned: &[GenParticle], idx: usize) -> Option<[f64; 3]> {
    pruned
        .get(idx)?
        .daughters
        .first()
        .and_then(|&d| pruned.get(d))
        .map(|d| d.vertex())
}

/// Collects the charged final states of every final hadron of `flavour`
/// (hadron |eta| < 4), in pruned-collection then packed-collection order
pub fn match_heavy_flavour(
    pruned: &[GenParticle],
    packed: &[PackedGenParticle],
    flavour: HeavyFlavour,
) -> Vec<HadronFinalState> {
    let mut matches = Vec::new();
    for (idx, hadron) in pruned.iter().enumerate() {
        if hadron.eta.abs() >= GEN_PRUNED_MAX_ETA || !is_final_hadron(pruned, idx, flavour) {
            continue;
        }
        let point = decay_point(pruned, idx).unwrap_or(NO_DECAY_POINT);
        for p in packed.iter().filter(|p| is_selected_final_state(p)) {
            if !descends_from(pruned, idx, p) {
                continue;
            }
            matches.push(HadronFinalState {
                pt: p.pt,
                eta: p.eta,
                phi: p.phi,
                charge: p.charge,
                pdg_id: p.pdg_id,
                hadron_pdg_id: hadron.pdg_id,
                decay_point: point,
            });
        }
    }
    matches
}
