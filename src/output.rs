// Per-event output records and their writers
//
// `EventRecord` is one flat row per event: scalars plus ragged per-entity
// columns, named exactly as the downstream ntuple readers expect. Every
// column is always filled; absent quantities carry their sentinel.

use std::fs::{File, OpenOptions};
use std::io::{BufWriter, Write};
use std::path::Path;

use serde::Serialize;

use crate::constants::{
    ELECTRON_MIN_PT, GEN_FINAL_MIN_PT, GEN_JET_MIN_PT, GEN_PRUNED_MAX_ETA, JET_MIN_PT,
    KINE_SENTINEL, MUON_MIN_PT,
};
use crate::error::Result;
use crate::event::{Electron, Event, FirstHit, GenParticle, Jet, Met, Muon, RecoVertex, Track};
use crate::genealogy::{self, HadronFinalState};
use crate::hemisphere::Hemispheres;
use crate::kinematics::distance2;
use crate::leptons::DileptonSummary;
use crate::selection::{HemisphereCounts, TrackClassification};
use crate::truth::{SimulatedLlp, TrackTruthMatch, TruthSummary};
use crate::vertex::VertexSummary;

/// Mother pdg id when a particle has none
const NO_MOTHER_PDG_ID: i32 = -10;

/// One output row. Field names are the column names.
#[allow(non_snake_case)]
#[derive(Debug, Clone, Default, Serialize)]
pub struct EventRecord {
    pub runNumber: u32,
    pub eventNumber: u64,
    pub lumiBlock: u32,

    // Primary vertices
    pub tree_nPV: i32,
    pub tree_PV_x: Vec<f64>,
    pub tree_PV_y: Vec<f64>,
    pub tree_PV_z: Vec<f64>,
    pub tree_PV_ez: Vec<f64>,
    pub tree_PV_NChi2: Vec<f64>,
    pub tree_PV_ndf: Vec<f64>,

    pub tree_NbrOfZCand: i32,
    pub tree_passesHTFilter: bool,

    pub tree_PFMet_et: f64,
    pub tree_PFMet_phi: f64,
    pub tree_PFMet_sig: f64,

    // Jets
    pub tree_njet: i32,
    pub tree_jet_E: Vec<f64>,
    pub tree_jet_pt: Vec<f64>,
    pub tree_jet_eta: Vec<f64>,
    pub tree_jet_phi: Vec<f64>,

    // Electrons
    pub tree_electron_pt: Vec<f64>,
    pub tree_electron_eta: Vec<f64>,
    pub tree_electron_phi: Vec<f64>,
    pub tree_electron_x: Vec<f64>,
    pub tree_electron_y: Vec<f64>,
    pub tree_electron_z: Vec<f64>,
    pub tree_electron_energy: Vec<f64>,
    pub tree_electron_charge: Vec<i32>,

    // Muons
    pub tree_Mmumu: f64,
    pub tree_muon_pt: Vec<f64>,
    pub tree_muon_eta: Vec<f64>,
    pub tree_muon_phi: Vec<f64>,
    pub tree_muon_x: Vec<f64>,
    pub tree_muon_y: Vec<f64>,
    pub tree_muon_z: Vec<f64>,
    pub tree_muon_energy: Vec<f64>,
    pub tree_muon_dxy: Vec<f64>,
    pub tree_muon_dxyError: Vec<f64>,
    pub tree_muon_dz: Vec<f64>,
    pub tree_muon_dzError: Vec<f64>,
    pub tree_muon_charge: Vec<i32>,
    pub tree_muon_isLoose: Vec<bool>,
    pub tree_muon_isTight: Vec<bool>,
    pub tree_muon_isGlobal: Vec<bool>,

    // Tracks
    pub tree_nTracks: i32,
    pub tree_track_pt: Vec<f64>,
    pub tree_track_eta: Vec<f64>,
    pub tree_track_phi: Vec<f64>,
    pub tree_track_charge: Vec<i32>,
    pub tree_track_NChi2: Vec<f64>,
    pub tree_track_isLoose: Vec<bool>,
    pub tree_track_isTight: Vec<bool>,
    pub tree_track_isHighPurity: Vec<bool>,
    pub tree_track_dxy: Vec<f64>,
    pub tree_track_dxyError: Vec<f64>,
    pub tree_track_drSig: Vec<f64>,
    pub tree_track_dz: Vec<f64>,
    pub tree_track_dzError: Vec<f64>,
    pub tree_track_numberOfLostHits: Vec<i32>,
    pub tree_track_originalAlgo: Vec<u32>,
    pub tree_track_algo: Vec<u32>,
    pub tree_track_stopReason: Vec<u16>,
    pub tree_track_nHit: Vec<i32>,
    pub tree_track_nHitPixel: Vec<i32>,
    pub tree_track_nHitTIB: Vec<i32>,
    pub tree_track_nHitTID: Vec<i32>,
    pub tree_track_nHitTOB: Vec<i32>,
    pub tree_track_nHitTEC: Vec<i32>,
    pub tree_track_nHitPXB: Vec<i32>,
    pub tree_track_nHitPXF: Vec<i32>,
    pub tree_track_isHitPixel: Vec<i32>,
    pub tree_track_nLayers: Vec<i32>,
    pub tree_track_nLayersPixel: Vec<i32>,
    pub tree_track_stripTECLayersWithMeasurement: Vec<i32>,
    pub tree_track_stripTIBLayersWithMeasurement: Vec<i32>,
    pub tree_track_stripTIDLayersWithMeasurement: Vec<i32>,
    pub tree_track_stripTOBLayersWithMeasurement: Vec<i32>,
    pub tree_track_x: Vec<f64>,
    pub tree_track_y: Vec<f64>,
    pub tree_track_z: Vec<f64>,
    pub tree_track_firstHit: Vec<i32>,
    pub tree_track_region: Vec<i32>,
    pub tree_track_firstHit_x: Vec<f64>,
    pub tree_track_firstHit_y: Vec<f64>,
    pub tree_track_firstHit_z: Vec<f64>,
    pub tree_track_iJet: Vec<i32>,
    pub tree_track_ntrk10: Vec<u32>,
    pub tree_track_ntrk20: Vec<u32>,
    pub tree_track_ntrk30: Vec<u32>,
    pub tree_track_MVAval: Vec<f64>,
    pub tree_track_Hemi: Vec<u8>,
    pub tree_track_Hemi_dR: Vec<f64>,
    pub tree_track_Hemi_mva_NChi2: Vec<f64>,
    pub tree_track_Hemi_LLP: Vec<u8>,
    pub tree_track_sim_LLP: Vec<i32>,
    pub tree_track_sim_isFromB: Vec<bool>,
    pub tree_track_sim_isFromC: Vec<bool>,
    pub tree_track_sim_pt: Vec<f64>,
    pub tree_track_sim_eta: Vec<f64>,
    pub tree_track_sim_phi: Vec<f64>,
    pub tree_track_sim_charge: Vec<i32>,
    pub tree_track_sim_pdgId: Vec<i32>,
    pub tree_track_sim_mass: Vec<f64>,
    pub tree_track_sim_x: Vec<f64>,
    pub tree_track_sim_y: Vec<f64>,
    pub tree_track_sim_z: Vec<f64>,
    pub tree_track_sim_dFirstGen: Vec<f64>,

    // Generator truth
    pub tree_GenPVx: f64,
    pub tree_GenPVy: f64,
    pub tree_GenPVz: f64,
    pub tree_genParticle_pt: Vec<f64>,
    pub tree_genParticle_eta: Vec<f64>,
    pub tree_genParticle_phi: Vec<f64>,
    pub tree_genParticle_charge: Vec<i32>,
    pub tree_genParticle_pdgId: Vec<i32>,
    pub tree_genParticle_mass: Vec<f64>,
    pub tree_genParticle_x: Vec<f64>,
    pub tree_genParticle_y: Vec<f64>,
    pub tree_genParticle_z: Vec<f64>,
    pub tree_genParticle_statusCode: Vec<i32>,
    pub tree_genParticle_mother_pdgId: Vec<i32>,
    pub tree_genParticle_LLP: Vec<i32>,
    pub tree_genPackPart_pt: Vec<f64>,
    pub tree_genPackPart_eta: Vec<f64>,
    pub tree_genPackPart_phi: Vec<f64>,
    pub tree_genPackPart_charge: Vec<i32>,
    pub tree_genPackPart_pdgId: Vec<i32>,
    pub tree_genPackPart_mass: Vec<f64>,
    pub tree_genPackPart_mother_pdgId: Vec<i32>,
    pub tree_ngenFromLLP: i32,
    pub tree_genFromLLP_LLP: Vec<u8>,
    pub tree_genFromLLP_pt: Vec<f64>,
    pub tree_genFromLLP_eta: Vec<f64>,
    pub tree_genFromLLP_phi: Vec<f64>,
    pub tree_genFromLLP_charge: Vec<i32>,
    pub tree_genFromLLP_pdgId: Vec<i32>,
    pub tree_genFromLLP_mass: Vec<f64>,
    pub tree_genFromLLP_x: Vec<f64>,
    pub tree_genFromLLP_y: Vec<f64>,
    pub tree_genFromLLP_z: Vec<f64>,
    pub tree_genFromLLP_mother_pdgId: Vec<i32>,
    pub tree_genFromLLP_isFromB: Vec<bool>,
    pub tree_genFromLLP_isFromC: Vec<bool>,
    pub tree_genAxis_dRneuneu: Vec<f64>,
    pub tree_nFromC: i32,
    pub tree_genFromC_pt: Vec<f64>,
    pub tree_genFromC_eta: Vec<f64>,
    pub tree_genFromC_phi: Vec<f64>,
    pub tree_genFromC_charge: Vec<i32>,
    pub tree_genFromC_pdgId: Vec<i32>,
    pub tree_genFromC_x: Vec<f64>,
    pub tree_genFromC_y: Vec<f64>,
    pub tree_genFromC_z: Vec<f64>,
    pub tree_genFromC_mother_pdgId: Vec<i32>,
    pub tree_nFromB: i32,
    pub tree_genFromB_pt: Vec<f64>,
    pub tree_genFromB_eta: Vec<f64>,
    pub tree_genFromB_phi: Vec<f64>,
    pub tree_genFromB_charge: Vec<i32>,
    pub tree_genFromB_pdgId: Vec<i32>,
    pub tree_genFromB_x: Vec<f64>,
    pub tree_genFromB_y: Vec<f64>,
    pub tree_genFromB_z: Vec<f64>,
    pub tree_genFromB_mother_pdgId: Vec<i32>,
    pub tree_genJet_pt: Vec<f64>,
    pub tree_genJet_eta: Vec<f64>,
    pub tree_genJet_phi: Vec<f64>,
    pub tree_genJet_mass: Vec<f64>,
    pub tree_genJet_energy: Vec<f64>,

    // Simulated LLPs and their truth-control vertices
    pub tree_nLLP: i32,
    pub tree_LLP: Vec<u8>,
    pub tree_LLP_pt: Vec<f64>,
    pub tree_LLP_eta: Vec<f64>,
    pub tree_LLP_phi: Vec<f64>,
    pub tree_LLP_x: Vec<f64>,
    pub tree_LLP_y: Vec<f64>,
    pub tree_LLP_z: Vec<f64>,
    pub tree_LLP_dist: Vec<f64>,
    pub tree_LLP_nTrks: Vec<u32>,
    pub tree_LLP_Vtx_nTrks: Vec<u32>,
    pub tree_LLP_Vtx_NChi2: Vec<f64>,
    pub tree_LLP_Vtx_dx: Vec<f64>,
    pub tree_LLP_Vtx_dy: Vec<f64>,
    pub tree_LLP_Vtx_dz: Vec<f64>,
    pub tree_LLP_Vtx_dist: Vec<f64>,
    pub tree_LLP_Vtx_dd: Vec<f64>,
    pub tree_LLP_Vtx_trackWeight: Vec<f64>,
    pub tree_LLP_Vtx_status: Vec<i32>,

    // Hemispheres and their vertices
    pub tree_Hemi: Vec<u8>,
    pub tree_Hemi_njet: Vec<u32>,
    pub tree_Hemi_eta: Vec<f64>,
    pub tree_Hemi_phi: Vec<f64>,
    pub tree_Hemi_dR: Vec<f64>,
    pub tree_Hemi_nTrks: Vec<u32>,
    pub tree_Hemi_nTrks_sig: Vec<u32>,
    pub tree_Hemi_nTrks_bad: Vec<u32>,
    pub tree_Hemi_nTrks_mva: Vec<u32>,
    pub tree_Hemi_nTrks_mva_sig: Vec<u32>,
    pub tree_Hemi_nTrks_mva_bad: Vec<u32>,
    pub tree_Hemi_LLP: Vec<u8>,
    pub tree_Hemi_LLP_pt: Vec<f64>,
    pub tree_Hemi_LLP_eta: Vec<f64>,
    pub tree_Hemi_LLP_phi: Vec<f64>,
    pub tree_Hemi_LLP_dist: Vec<f64>,
    pub tree_Hemi_LLP_x: Vec<f64>,
    pub tree_Hemi_LLP_y: Vec<f64>,
    pub tree_Hemi_LLP_z: Vec<f64>,
    pub tree_Hemi_Vtx_NChi2: Vec<f64>,
    pub tree_Hemi_Vtx_nTrks: Vec<u32>,
    pub tree_Hemi_Vtx_x: Vec<f64>,
    pub tree_Hemi_Vtx_y: Vec<f64>,
    pub tree_Hemi_Vtx_z: Vec<f64>,
    pub tree_Hemi_Vtx_dx: Vec<f64>,
    pub tree_Hemi_Vtx_dy: Vec<f64>,
    pub tree_Hemi_Vtx_dz: Vec<f64>,
    pub tree_Hemi_Vtx_dist: Vec<f64>,
    pub tree_Hemi_Vtx_dd: Vec<f64>,
    pub tree_Hemi_Vtx_trackWeight: Vec<f64>,
    pub tree_Hemi_Vtx_status: Vec<i32>,
    pub tree_Hemi_dR12: Vec<f64>,
    pub tree_Hemi_LLP_dR12: Vec<f64>,
}

/// Everything written for one stored track
#[derive(Debug, Clone, Copy)]
pub struct TrackRow<'a> {
    pub track: &'a Track,
    pub dxy: f64,
    pub dz: f64,
    pub dr_sig: f64,
    pub first_hit: FirstHit,
    /// Index of the containing jet among stored jets, -1 if none
    pub i_jet: i32,
    pub class: &'a TrackClassification,
    /// Normalized chi2 of the hemisphere vertex the track entered, else -10
    pub hemi_nchi2: f64,
    pub sim: &'a TrackTruthMatch,
}

/// Truth point a fitted vertex is compared to
#[derive(Debug, Clone, Copy, PartialEq)]
struct LlpTruth {
    pt: f64,
    eta: f64,
    phi: f64,
    position: [f64; 3],
    dist: f64,
}

impl LlpTruth {
    fn of(llp: Option<&SimulatedLlp>) -> Self {
        match llp {
            Some(l) => Self {
                pt: l.pt,
                eta: l.eta,
                phi: l.phi,
                position: l.decay_vertex.unwrap_or([0.0; 3]),
                dist: l.dist,
            },
            None => Self {
                pt: KINE_SENTINEL,
                eta: KINE_SENTINEL,
                phi: KINE_SENTINEL,
                position: [0.0; 3],
                dist: 0.0,
            },
        }
    }
}

/// Fitted-vertex comparison with the truth decay point and the primary vertex
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct VertexOffsets {
    pub dx: f64,
    pub dy: f64,
    pub dz: f64,
    /// Distance of the fitted vertex from the primary vertex
    pub dist: f64,
    /// Miss distance relative to the true flight distance, -1 when that is not positive
    pub dd: f64,
}

impl VertexOffsets {
    pub fn new(fit: [f64; 3], truth: [f64; 3], truth_dist: f64, pv: [f64; 3]) -> Self {
        let dd = if truth_dist > 0.0 {
            distance2(fit, truth).sqrt() / truth_dist
        } else {
            -1.0
        };
        Self {
            dx: fit[0] - truth[0],
            dy: fit[1] - truth[1],
            dz: fit[2] - truth[2],
            dist: distance2(fit, pv).sqrt(),
            dd,
        }
    }
}

fn mother_pdg_id(pruned: &[GenParticle], idx: Option<usize>) -> i32 {
    idx.and_then(|m| pruned.get(m)).map_or(NO_MOTHER_PDG_ID, |m| m.pdg_id)
}

impl EventRecord {
    pub fn new(event: &Event) -> Self {
        Self {
            runNumber: event.run,
            eventNumber: event.event,
            lumiBlock: event.lumi,
            ..Default::default()
        }
    }

    pub fn fill_primary_vertices(&mut self, vertices: &[RecoVertex]) {
        self.tree_nPV = vertices.len() as i32;
        for v in vertices {
            self.tree_PV_x.push(v.x);
            self.tree_PV_y.push(v.y);
            self.tree_PV_z.push(v.z);
            self.tree_PV_ez.push(v.z_error);
            self.tree_PV_NChi2.push(v.normalized_chi2);
            self.tree_PV_ndf.push(v.ndof);
        }
    }

    pub fn fill_met(&mut self, met: Option<&Met>) {
        match met {
            Some(m) => {
                self.tree_PFMet_et = m.et;
                self.tree_PFMet_phi = m.phi;
                self.tree_PFMet_sig = m.significance;
            }
            None => {
                self.tree_PFMet_et = KINE_SENTINEL;
                self.tree_PFMet_phi = KINE_SENTINEL;
                self.tree_PFMet_sig = KINE_SENTINEL;
            }
        }
    }

    pub fn fill_jets(&mut self, jets: &[Jet]) {
        for j in jets.iter().filter(|j| j.pt > JET_MIN_PT) {
            self.tree_jet_E.push(j.energy);
            self.tree_jet_pt.push(j.pt);
            self.tree_jet_eta.push(j.eta);
            self.tree_jet_phi.push(j.phi);
        }
        self.tree_njet = self.tree_jet_pt.len() as i32;
    }

    pub fn fill_electrons(&mut self, electrons: &[Electron]) {
        for e in electrons.iter().filter(|e| e.pt > ELECTRON_MIN_PT) {
            self.tree_electron_pt.push(e.pt);
            self.tree_electron_eta.push(e.eta);
            self.tree_electron_phi.push(e.phi);
            self.tree_electron_x.push(e.vx);
            self.tree_electron_y.push(e.vy);
            self.tree_electron_z.push(e.vz);
            self.tree_electron_energy.push(e.energy);
            self.tree_electron_charge.push(e.charge);
        }
    }

    pub fn fill_muons(&mut self, muons: &[Muon], dilepton: &DileptonSummary) {
        for m in muons.iter().filter(|m| m.pt > MUON_MIN_PT) {
            self.tree_muon_pt.push(m.pt);
            self.tree_muon_eta.push(m.eta);
            self.tree_muon_phi.push(m.phi);
            self.tree_muon_x.push(m.vx);
            self.tree_muon_y.push(m.vy);
            self.tree_muon_z.push(m.vz);
            self.tree_muon_energy.push(m.energy);
            self.tree_muon_dxy.push(m.dxy);
            self.tree_muon_dxyError.push(m.dxy_error);
            self.tree_muon_dz.push(m.dz);
            self.tree_muon_dzError.push(m.dz_error);
            self.tree_muon_charge.push(m.charge);
            self.tree_muon_isLoose.push(m.is_loose);
            self.tree_muon_isTight.push(m.is_tight);
            self.tree_muon_isGlobal.push(m.is_global);
        }
        self.tree_Mmumu = dilepton.mmumu;
        self.tree_NbrOfZCand = dilepton.n_z_candidates;
        self.tree_passesHTFilter = dilepton.passes_ht_filter;
    }

    fn push_hadron_final_states(
        states: &[HadronFinalState],
        pt: &mut Vec<f64>,
        eta: &mut Vec<f64>,
        phi: &mut Vec<f64>,
        charge: &mut Vec<i32>,
        pdg_id: &mut Vec<i32>,
        xyz: [&mut Vec<f64>; 3],
        mother: &mut Vec<i32>,
    ) {
        let [x, y, z] = xyz;
        for s in states {
            pt.push(s.pt);
            eta.push(s.eta);
            phi.push(s.phi);
            charge.push(s.charge);
            pdg_id.push(s.pdg_id);
            x.push(s.decay_point[0]);
            y.push(s.decay_point[1]);
            z.push(s.decay_point[2]);
            mother.push(s.hadron_pdg_id);
        }
    }

    /// Generator-level columns
    pub fn fill_truth(&mut self, truth: &TruthSummary, event: &Event) {
        let pruned = &event.pruned;
        [self.tree_GenPVx, self.tree_GenPVy, self.tree_GenPVz] = truth.gen_pv;

        for (p, origin) in pruned.iter().zip(&truth.origins) {
            if p.pt <= GEN_FINAL_MIN_PT || p.eta.abs() >= GEN_PRUNED_MAX_ETA {
                continue;
            }
            self.tree_genParticle_pt.push(p.pt);
            self.tree_genParticle_eta.push(p.eta);
            self.tree_genParticle_phi.push(p.phi);
            self.tree_genParticle_charge.push(p.charge);
            self.tree_genParticle_pdgId.push(p.pdg_id);
            self.tree_genParticle_mass.push(p.mass);
            self.tree_genParticle_x.push(p.vx);
            self.tree_genParticle_y.push(p.vy);
            self.tree_genParticle_z.push(p.vz);
            self.tree_genParticle_statusCode.push(p.status);
            self.tree_genParticle_mother_pdgId.push(mother_pdg_id(pruned, p.mothers.first().copied()));
            self.tree_genParticle_LLP.push(origin.code());
        }

        for p in event.packed.iter().filter(|p| genealogy::is_selected_final_state(p)) {
            self.tree_genPackPart_pt.push(p.pt);
            self.tree_genPackPart_eta.push(p.eta);
            self.tree_genPackPart_phi.push(p.phi);
            self.tree_genPackPart_charge.push(p.charge);
            self.tree_genPackPart_pdgId.push(p.pdg_id);
            self.tree_genPackPart_mass.push(p.mass);
            self.tree_genPackPart_mother_pdgId.push(mother_pdg_id(pruned, p.mother));
        }

        self.tree_ngenFromLLP = truth.from_llp.len() as i32;
        for g in &truth.from_llp {
            self.tree_genFromLLP_LLP.push(g.llp);
            self.tree_genFromLLP_pt.push(g.pt);
            self.tree_genFromLLP_eta.push(g.eta);
            self.tree_genFromLLP_phi.push(g.phi);
            self.tree_genFromLLP_charge.push(g.charge);
            self.tree_genFromLLP_pdgId.push(g.pdg_id);
            self.tree_genFromLLP_mass.push(g.mass);
            self.tree_genFromLLP_x.push(g.vertex[0]);
            self.tree_genFromLLP_y.push(g.vertex[1]);
            self.tree_genFromLLP_z.push(g.vertex[2]);
            self.tree_genFromLLP_mother_pdgId.push(g.mother_pdg_id);
            self.tree_genFromLLP_isFromB.push(g.is_from_b);
            self.tree_genFromLLP_isFromC.push(g.is_from_c);
        }

        if truth.llps.len() == 2 {
            self.tree_genAxis_dRneuneu.push(truth.dr_llp12);
        }

        self.tree_nFromC = truth.from_c.len() as i32;
        Self::push_hadron_final_states(
            &truth.from_c,
            &mut self.tree_genFromC_pt,
            &mut self.tree_genFromC_eta,
            &mut self.tree_genFromC_phi,
            &mut self.tree_genFromC_charge,
            &mut self.tree_genFromC_pdgId,
            [
                &mut self.tree_genFromC_x,
                &mut self.tree_genFromC_y,
                &mut self.tree_genFromC_z,
            ],
            &mut self.tree_genFromC_mother_pdgId,
        );
        self.tree_nFromB = truth.from_b.len() as i32;
        Self::push_hadron_final_states(
            &truth.from_b,
            &mut self.tree_genFromB_pt,
            &mut self.tree_genFromB_eta,
            &mut self.tree_genFromB_phi,
            &mut self.tree_genFromB_charge,
            &mut self.tree_genFromB_pdgId,
            [
                &mut self.tree_genFromB_x,
                &mut self.tree_genFromB_y,
                &mut self.tree_genFromB_z,
            ],
            &mut self.tree_genFromB_mother_pdgId,
        );

        for j in event.gen_jets.iter().filter(|j| j.pt > GEN_JET_MIN_PT) {
            self.tree_genJet_pt.push(j.pt);
            self.tree_genJet_eta.push(j.eta);
            self.tree_genJet_phi.push(j.phi);
            self.tree_genJet_mass.push(j.mass);
            self.tree_genJet_energy.push(j.energy);
        }

        self.tree_nLLP = truth.n_decayed() as i32;
    }

    pub fn push_track(&mut self, row: &TrackRow<'_>) {
        let t = row.track;
        let h = &t.hits;
        self.tree_nTracks += 1;
        self.tree_track_pt.push(t.pt);
        self.tree_track_eta.push(t.eta);
        self.tree_track_phi.push(t.phi);
        self.tree_track_charge.push(t.charge);
        self.tree_track_NChi2.push(t.normalized_chi2);
        self.tree_track_isLoose.push(t.quality.loose);
        self.tree_track_isTight.push(t.quality.tight);
        self.tree_track_isHighPurity.push(t.quality.high_purity);
        self.tree_track_dxy.push(row.dxy);
        self.tree_track_dxyError.push(t.dxy_error);
        self.tree_track_drSig.push(row.dr_sig);
        self.tree_track_dz.push(row.dz);
        self.tree_track_dzError.push(t.dz_error);
        self.tree_track_numberOfLostHits.push(t.lost_hits);
        self.tree_track_originalAlgo.push(t.original_algo);
        self.tree_track_algo.push(t.algo);
        self.tree_track_stopReason.push(t.stop_reason);
        self.tree_track_nHit.push(h.valid_hits);
        self.tree_track_nHitPixel.push(h.pixel_hits);
        self.tree_track_nHitTIB.push(h.tib_hits);
        self.tree_track_nHitTID.push(h.tid_hits);
        self.tree_track_nHitTOB.push(h.tob_hits);
        self.tree_track_nHitTEC.push(h.tec_hits);
        self.tree_track_nHitPXB.push(h.pxb_hits);
        self.tree_track_nHitPXF.push(h.pxf_hits);
        self.tree_track_isHitPixel.push(h.pixel_layer_code);
        self.tree_track_nLayers.push(h.layers);
        self.tree_track_nLayersPixel.push(h.pixel_layers);
        self.tree_track_stripTECLayersWithMeasurement.push(h.strip_tec_layers);
        self.tree_track_stripTIBLayersWithMeasurement.push(h.strip_tib_layers);
        self.tree_track_stripTIDLayersWithMeasurement.push(h.strip_tid_layers);
        self.tree_track_stripTOBLayersWithMeasurement.push(h.strip_tob_layers);
        self.tree_track_x.push(t.vx);
        self.tree_track_y.push(t.vy);
        self.tree_track_z.push(t.vz);
        self.tree_track_firstHit.push(h.first_hit_code);
        self.tree_track_region.push(row.first_hit.region);
        self.tree_track_firstHit_x.push(row.first_hit.x);
        self.tree_track_firstHit_y.push(row.first_hit.y);
        self.tree_track_firstHit_z.push(row.first_hit.z);
        self.tree_track_iJet.push(row.i_jet);
        self.tree_track_ntrk10.push(row.class.ntrk10);
        self.tree_track_ntrk20.push(row.class.ntrk20);
        self.tree_track_ntrk30.push(row.class.ntrk30);
        self.tree_track_MVAval.push(row.class.score);
        self.tree_track_Hemi.push(row.class.hemi);
        self.tree_track_Hemi_dR.push(row.class.hemi_dr);
        self.tree_track_Hemi_mva_NChi2.push(row.hemi_nchi2);
        self.tree_track_Hemi_LLP.push(row.class.hemi_llp);

        let s = row.sim;
        self.tree_track_sim_LLP.push(s.llp);
        self.tree_track_sim_isFromB.push(s.is_from_b);
        self.tree_track_sim_isFromC.push(s.is_from_c);
        self.tree_track_sim_pt.push(s.pt);
        self.tree_track_sim_eta.push(s.eta);
        self.tree_track_sim_phi.push(s.phi);
        self.tree_track_sim_charge.push(s.charge);
        self.tree_track_sim_pdgId.push(s.pdg_id);
        self.tree_track_sim_mass.push(s.mass);
        self.tree_track_sim_x.push(s.x);
        self.tree_track_sim_y.push(s.y);
        self.tree_track_sim_z.push(s.z);
        self.tree_track_sim_dFirstGen.push(s.d_first_gen);
    }

    /// Simulated LLP `id` and its truth-control vertex
    pub fn push_llp(
        &mut self,
        id: u8,
        llp: Option<&SimulatedLlp>,
        n_trks: u32,
        vertex: &VertexSummary,
        pv: [f64; 3],
    ) {
        let truth = LlpTruth::of(llp);
        let off = VertexOffsets::new(vertex.position, truth.position, truth.dist, pv);

        self.tree_LLP.push(id);
        self.tree_LLP_pt.push(truth.pt);
        self.tree_LLP_eta.push(truth.eta);
        self.tree_LLP_phi.push(truth.phi);
        self.tree_LLP_x.push(truth.position[0]);
        self.tree_LLP_y.push(truth.position[1]);
        self.tree_LLP_z.push(truth.position[2]);
        self.tree_LLP_dist.push(truth.dist);
        self.tree_LLP_nTrks.push(n_trks);
        self.tree_LLP_Vtx_nTrks.push(vertex.n_accepted as u32);
        self.tree_LLP_Vtx_NChi2.push(vertex.normalized_chi2);
        self.tree_LLP_Vtx_dx.push(off.dx);
        self.tree_LLP_Vtx_dy.push(off.dy);
        self.tree_LLP_Vtx_dz.push(off.dz);
        self.tree_LLP_Vtx_dist.push(off.dist);
        self.tree_LLP_Vtx_dd.push(off.dd);
        self.tree_LLP_Vtx_trackWeight.extend_from_slice(&vertex.weights);
        self.tree_LLP_Vtx_status.push(vertex.status);
    }

    /// Hemisphere `hemi` (1 or 2), compared with the LLP it is labelled with
    pub fn push_hemisphere(
        &mut self,
        hemi: u8,
        hemispheres: &Hemispheres,
        counts: &HemisphereCounts,
        llp: Option<&SimulatedLlp>,
        vertex: &VertexSummary,
        pv: [f64; 3],
        dr_llp12: f64,
    ) {
        let h = usize::from(hemi.saturating_sub(1)).min(1);
        let axis = hemispheres.axis(hemi);
        let truth = LlpTruth::of(llp);
        let off = VertexOffsets::new(vertex.position, truth.position, truth.dist, pv);

        self.tree_Hemi.push(hemi);
        self.tree_Hemi_njet.push(axis.n_jets as u32);
        self.tree_Hemi_eta.push(axis.eta);
        self.tree_Hemi_phi.push(axis.phi);
        self.tree_Hemi_dR.push(hemispheres.llp_dr[h]);
        self.tree_Hemi_nTrks.push(counts.n_trks);
        self.tree_Hemi_nTrks_sig.push(counts.n_trks_sig);
        self.tree_Hemi_nTrks_bad.push(counts.n_trks_bad);
        self.tree_Hemi_nTrks_mva.push(counts.n_trks_mva);
        self.tree_Hemi_nTrks_mva_sig.push(counts.n_trks_mva_sig);
        self.tree_Hemi_nTrks_mva_bad.push(counts.n_trks_mva_bad);
        self.tree_Hemi_LLP.push(hemispheres.llp_label(hemi));
        self.tree_Hemi_LLP_pt.push(truth.pt);
        self.tree_Hemi_LLP_eta.push(truth.eta);
        self.tree_Hemi_LLP_phi.push(truth.phi);
        self.tree_Hemi_LLP_dist.push(truth.dist);
        self.tree_Hemi_LLP_x.push(truth.position[0]);
        self.tree_Hemi_LLP_y.push(truth.position[1]);
        self.tree_Hemi_LLP_z.push(truth.position[2]);
        self.tree_Hemi_Vtx_NChi2.push(vertex.normalized_chi2);
        self.tree_Hemi_Vtx_nTrks.push(vertex.n_accepted as u32);
        self.tree_Hemi_Vtx_x.push(vertex.position[0]);
        self.tree_Hemi_Vtx_y.push(vertex.position[1]);
        self.tree_Hemi_Vtx_z.push(vertex.position[2]);
        self.tree_Hemi_Vtx_dx.push(off.dx);
        self.tree_Hemi_Vtx_dy.push(off.dy);
        self.tree_Hemi_Vtx_dz.push(off.dz);
        self.tree_Hemi_Vtx_dist.push(off.dist);
        self.tree_Hemi_Vtx_dd.push(off.dd);
        self.tree_Hemi_Vtx_trackWeight.extend_from_slice(&vertex.weights);
        self.tree_Hemi_Vtx_status.push(vertex.status);
        self.tree_Hemi_dR12.push(hemispheres.dr12);
        self.tree_Hemi_LLP_dR12.push(dr_llp12);
    }
}

/// Trait for output handlers
pub trait OutputHandler: Send + Sync {
    /// Write the record of one analyzed event
    fn handle_record(&mut self, record: &EventRecord) -> Result<()>;

    /// Flush buffered output at the end of the run
    fn finish(&mut self) -> Result<()> {
        Ok(())
    }
}

fn open_append(path: &Path) -> Result<(BufWriter<File>, bool)> {
    let file = OpenOptions::new().create(true).append(true).open(path)?;
    let is_new = file.metadata()?.len() == 0;
    Ok((BufWriter::new(file), is_new))
}

/// One JSON object per line and per event
pub struct JsonLinesOutput<W: Write> {
    writer: W,
}

impl JsonLinesOutput<BufWriter<File>> {
    pub fn create(path: &Path) -> Result<Self> {
        let (writer, _) = open_append(path)?;
        Ok(Self { writer })
    }
}

impl<W: Write> JsonLinesOutput<W> {
    pub fn new(writer: W) -> Self {
        Self { writer }
    }

    pub fn into_inner(self) -> W {
        self.writer
    }
}

impl<W: Write + Send + Sync> OutputHandler for JsonLinesOutput<W> {
    fn handle_record(&mut self, record: &EventRecord) -> Result<()> {
        let line = serde_json::to_string(record)
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))?;
        writeln!(self.writer, "{}", line)?;
        Ok(())
    }

    fn finish(&mut self) -> Result<()> {
        self.writer.flush()?;
        Ok(())
    }
}

/// CSV summary with one row per hemisphere vertex
pub struct CsvOutput<W: Write> {
    writer: W,
}

const CSV_HEADER: &str = "run,lumi,event,hemi,llp,status,n_trks,x,y,z,nchi2,dist";

impl CsvOutput<BufWriter<File>> {
    /// Appends to `path`, writing the header only into a new file
    pub fn create(path: &Path) -> Result<Self> {
        let (writer, is_new) = open_append(path)?;
        Self::new(writer, is_new)
    }
}

impl<W: Write> CsvOutput<W> {
    pub fn new(mut writer: W, write_header: bool) -> Result<Self> {
        if write_header {
            writeln!(writer, "{}", CSV_HEADER)?;
        }
        Ok(Self { writer })
    }

    pub fn into_inner(self) -> W {
        self.writer
    }
}

impl<W: Write + Send + Sync> OutputHandler for CsvOutput<W> {
    fn handle_record(&mut self, r: &EventRecord) -> Result<()> {
        for i in 0..r.tree_Hemi.len() {
            writeln!(
                self.writer,
                "{},{},{},{},{},{},{},{:.4},{:.4},{:.4},{:.4},{:.4}",
                r.runNumber,
                r.lumiBlock,
                r.eventNumber,
                r.tree_Hemi[i],
                r.tree_Hemi_LLP[i],
                r.tree_Hemi_Vtx_status[i],
                r.tree_Hemi_Vtx_nTrks[i],
                r.tree_Hemi_Vtx_x[i],
                r.tree_Hemi_Vtx_y[i],
                r.tree_Hemi_Vtx_z[i],
                r.tree_Hemi_Vtx_NChi2[i],
                r.tree_Hemi_Vtx_dist[i],
            )?;
        }
        Ok(())
    }

    fn finish(&mut self) -> Result<()> {
        self.writer.flush()?;
        Ok(())
    }
}
