// Prompt dimuon selection and the event-level Z / HT flags

use serde::Serialize;

use crate::constants::{
    DIMUON_LEAD_MIN_PT, DIMUON_LEG_MIN_PT, HT_FILTER_MIN, HT_MAX_ETA, JET_MIN_PT, MUON_MASS,
    Z_CANDIDATE_MIN_MASS,
};
use crate::event::{Jet, Muon};
use crate::kinematics::FourMomentum;

/// The selected opposite-charge muon pair. Indices refer to the muon list
/// the selection ran on; `leading` has the higher pt.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct DimuonPair {
    pub leading: usize,
    pub subleading: usize,
    pub mass: f64,
}

fn muon_momentum(mu: &Muon) -> FourMomentum {
    FourMomentum::from_pt_eta_phi_m(mu.pt, mu.eta, mu.phi, MUON_MASS)
}

/// Highest-mass pair of global, opposite-charge muons with pt > 10 GeV and
/// at least one leg above 28 GeV. Pairs are scanned in input order and only
/// a strictly larger mass replaces the current best.
pub fn select_dimuon(muons: &[Muon]) -> Option<DimuonPair> {
    let mut best: Option<DimuonPair> = None;

    for (i, mu1) in muons.iter().enumerate() {
        if !mu1.is_global || mu1.pt <= DIMUON_LEG_MIN_PT {
            continue;
        }
        let v1 = muon_momentum(mu1);
        for (j, mu2) in muons.iter().enumerate().skip(i + 1) {
            if !mu2.is_global || mu1.charge == mu2.charge || mu2.pt <= DIMUON_LEG_MIN_PT {
                continue;
            }
            if mu1.pt <= DIMUON_LEAD_MIN_PT && mu2.pt <= DIMUON_LEAD_MIN_PT {
                continue;
            }
            let mass = (v1 + muon_momentum(mu2)).mass();
            if best.map_or(true, |b| mass > b.mass) {
                best = Some(DimuonPair {
                    leading: i,
                    subleading: j,
                    mass,
                });
            }
        }
    }

    best.map(|mut pair| {
        if muons[pair.subleading].pt > muons[pair.leading].pt {
            std::mem::swap(&mut pair.leading, &mut pair.subleading);
        }
        pair
    })
}

/// Scalar sum of central jet pt
pub fn ht(jets: &[Jet]) -> f64 {
    jets.iter()
        .filter(|j| j.pt > JET_MIN_PT && j.eta.abs() < HT_MAX_ETA)
        .map(|j| j.pt)
        .sum()
}

/// Event-level flags derived from the dimuon selection
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct DileptonSummary {
    pub pair: Option<DimuonPair>,
    /// Dimuon mass, 0 without a pair
    pub mmumu: f64,
    pub n_z_candidates: i32,
    pub passes_ht_filter: bool,
    pub ht: f64,
}

pub fn summarize(muons: &[Muon], jets: &[Jet]) -> DileptonSummary {
    let pair = select_dimuon(muons);
    let mmumu = pair.map_or(0.0, |p| p.mass);
    let ht = ht(jets);
    let is_z = mmumu > Z_CANDIDATE_MIN_MASS;

    DileptonSummary {
        pair,
        mmumu,
        n_z_candidates: i32::from(is_z),
        passes_ht_filter: is_z && ht > HT_FILTER_MIN,
        ht,
    }
}
