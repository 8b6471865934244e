// Per-event orchestration
//
// One event flows through: dilepton selection, truth association, hemisphere
// axes, per-track preparation (impact parameters, first hit, jet and truth
// matching), track selection, the four vertex fits and record assembly.
// The analyzer holds no per-event state and can be shared between workers.

use std::sync::Arc;

use tracing::{debug, warn};

use crate::classifier::TrackScorer;
use crate::constants::{
    DEFAULT_B_FIELD, DEFAULT_BDT_CUT, JET_CONE_DR, JET_MIN_PT, TRACK_MAX_ETA, TRACK_MIN_PT,
    VTX_SENTINEL_CHI2,
};
use crate::error::{AnalyzerError, Result};
use crate::event::{Event, FirstHit, Jet, Track};
use crate::hemisphere;
use crate::kinematics::delta_r;
use crate::leptons;
use crate::output::{EventRecord, TrackRow};
use crate::selection::{self, SelectionInput};
use crate::truth;
use crate::vertex::{AdaptiveVertexFitter, FittableTrack, VertexSummary};

/// Position of the innermost hit of a track
pub trait FirstHitLocator: Send + Sync {
    fn first_hit(&self, track: &Track) -> FirstHit;
}

/// Uses the propagated first hit carried by the track, or its reference
/// point with an unknown region when none was recorded
#[derive(Debug, Clone, Copy, Default)]
pub struct RecordedFirstHit;

impl FirstHitLocator for RecordedFirstHit {
    fn first_hit(&self, track: &Track) -> FirstHit {
        track.first_hit.unwrap_or(FirstHit {
            x: track.vx,
            y: track.vy,
            z: track.vz,
            region: -1,
        })
    }
}

impl<F> FirstHitLocator for F
where
    F: Fn(&Track) -> FirstHit + Send + Sync,
{
    fn first_hit(&self, track: &Track) -> FirstHit {
        self(track)
    }
}

/// Index of the first jet above threshold within the jet cone of a
/// direction, counting only jets above threshold; -1 when none
pub fn jet_index(jets: &[Jet], eta: f64, phi: f64) -> i32 {
    jets.iter()
        .filter(|j| j.pt > JET_MIN_PT)
        .position(|j| delta_r(j.eta, j.phi, eta, phi) < JET_CONE_DR)
        .map_or(-1, |i| i as i32)
}

fn is_stored(track: &Track) -> bool {
    track.pt >= TRACK_MIN_PT && track.eta.abs() <= TRACK_MAX_ETA
}

pub struct EventAnalyzer {
    scorer: Arc<dyn TrackScorer>,
    locator: Box<dyn FirstHitLocator>,
    fitter: AdaptiveVertexFitter,
    bdt_cut: f64,
    b_field: f64,
}

impl EventAnalyzer {
    pub fn new(scorer: Arc<dyn TrackScorer>) -> Self {
        Self {
            scorer,
            locator: Box::new(RecordedFirstHit),
            fitter: AdaptiveVertexFitter::default(),
            bdt_cut: DEFAULT_BDT_CUT,
            b_field: DEFAULT_B_FIELD,
        }
    }

    pub fn with_bdt_cut(mut self, bdt_cut: f64) -> Self {
        self.bdt_cut = bdt_cut;
        self
    }

    pub fn with_b_field(mut self, b_field: f64) -> Self {
        self.b_field = b_field;
        self
    }

    pub fn with_locator(mut self, locator: impl FirstHitLocator + 'static) -> Self {
        self.locator = Box::new(locator);
        self
    }

    pub fn with_fitter(mut self, fitter: AdaptiveVertexFitter) -> Self {
        self.fitter = fitter;
        self
    }

    /// Fits the tracks at `indices`. Tracks without usable errors are left
    /// out of the fit and get weight 0, so the weights stay aligned with
    /// `indices`.
    fn fit(&self, tracks: &[&Track], indices: &[usize]) -> VertexSummary {
        let mut slots = Vec::with_capacity(indices.len());
        let mut fittable = Vec::with_capacity(indices.len());
        for (slot, &i) in indices.iter().enumerate() {
            match FittableTrack::from_track(tracks[i], self.b_field) {
                Some(t) => {
                    slots.push(slot);
                    fittable.push(t);
                }
                None => warn!(
                    track = i,
                    dxy_error = tracks[i].dxy_error,
                    dz_error = tracks[i].dz_error,
                    "Track without impact-parameter errors left out of fit"
                ),
            }
        }

        let fit = self.fitter.fit(&fittable).map(|mut vertex| {
            if slots.len() < indices.len() {
                let mut weights = vec![0.0; indices.len()];
                for (&slot, &w) in slots.iter().zip(&vertex.weights) {
                    weights[slot] = w;
                }
                vertex.weights = weights;
            }
            vertex
        });
        VertexSummary::from_fit(indices.len(), fit)
    }

    /// Analyzes one event. Fails only when the event has no primary vertex.
    pub fn analyze(&self, event: &Event) -> Result<EventRecord> {
        let pv = event
            .vertices
            .first()
            .ok_or(AnalyzerError::NoPrimaryVertex {
                run: event.run,
                event: event.event,
            })?
            .position();

        let mut record = EventRecord::new(event);
        record.fill_primary_vertices(&event.vertices);
        record.fill_met(event.met.as_ref());
        record.fill_jets(&event.jets);
        record.fill_electrons(&event.electrons);

        let dilepton = leptons::summarize(&event.muons, &event.jets);
        record.fill_muons(&event.muons, &dilepton);

        let mc = truth::summarize(&event.pruned, &event.packed);
        record.fill_truth(&mc, event);

        let hemis = hemisphere::build(&event.jets, &event.muons, dilepton.pair, &mc.llps);

        // Per-track preparation
        let tracks: Vec<&Track> = event.tracks.iter().filter(|t| is_stored(t)).collect();
        let mut first_hits = Vec::with_capacity(tracks.len());
        let mut sims = Vec::with_capacity(tracks.len());
        let mut inputs = Vec::with_capacity(tracks.len());
        let mut jet_indices = Vec::with_capacity(tracks.len());
        for t in &tracks {
            let first_hit = self.locator.first_hit(t);
            let sim = truth::match_track(t, first_hit.position(), &mc.from_llp, mc.gen_pv, self.b_field);
            let i_jet = jet_index(&event.jets, t.eta, t.phi);
            inputs.push(SelectionInput {
                pt: t.pt,
                eta: t.eta,
                phi: t.phi,
                nchi2: t.normalized_chi2,
                n_hits: t.hits.valid_hits,
                dr_sig: t.displacement_significance(pv),
                first_hit: first_hit.position(),
                in_jet: i_jet >= 0,
                truth_llp: sim.llp,
            });
            first_hits.push(first_hit);
            sims.push(sim);
            jet_indices.push(i_jet);
        }

        let sel = selection::select(&inputs, &hemis, self.scorer.as_ref(), self.bdt_cut);

        let llp_fits = [
            self.fit(&tracks, &sel.fit_inputs.llp[0]),
            self.fit(&tracks, &sel.fit_inputs.llp[1]),
        ];
        let hemi_fits = [
            self.fit(&tracks, &sel.fit_inputs.hemi[0]),
            self.fit(&tracks, &sel.fit_inputs.hemi[1]),
        ];

        // Hemisphere fit each track entered, if any
        let mut fitted_in: Vec<Option<usize>> = vec![None; tracks.len()];
        for (h, indices) in sel.fit_inputs.hemi.iter().enumerate() {
            for &i in indices {
                fitted_in[i] = Some(h);
            }
        }

        for (i, t) in tracks.iter().enumerate() {
            let class = &sel.tracks[i];
            let hemi_nchi2 = fitted_in[i].map_or(VTX_SENTINEL_CHI2, |h| hemi_fits[h].normalized_chi2);
            record.push_track(&TrackRow {
                track: t,
                dxy: t.dxy(pv),
                dz: t.dz(pv),
                dr_sig: inputs[i].dr_sig,
                first_hit: first_hits[i],
                i_jet: jet_indices[i],
                class,
                hemi_nchi2,
                sim: &sims[i],
            });
        }

        for (k, id) in [1u8, 2].into_iter().enumerate() {
            record.push_llp(id, mc.llp(id), sel.llp_n_trks[k], &llp_fits[k], pv);
        }
        for (k, hemi) in [1u8, 2].into_iter().enumerate() {
            let llp = mc.llp(hemis.llp_label(hemi));
            record.push_hemisphere(
                hemi,
                &hemis,
                &sel.hemi_counts[k],
                llp,
                &hemi_fits[k],
                pv,
                mc.dr_llp12,
            );
        }

        debug!(
            run = event.run,
            event = event.event,
            n_tracks = tracks.len(),
            llp1_status = llp_fits[0].status,
            llp2_status = llp_fits[1].status,
            hemi1_status = hemi_fits[0].status,
            hemi2_status = hemi_fits[1].status,
            "Event analyzed"
        );

        Ok(record)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::classifier::TrackFeatures;
    use crate::event::RecoVertex;

    fn analyzer() -> EventAnalyzer {
        EventAnalyzer::new(Arc::new(|_: &TrackFeatures| 1.0_f64))
    }

    fn event_with_pv() -> Event {
        Event {
            run: 1,
            event: 10,
            vertices: vec![RecoVertex::default()],
            ..Default::default()
        }
    }

    fn track(pt: f64, eta: f64, phi: f64) -> Track {
        Track {
            pt,
            eta,
            phi,
            charge: 1,
            dxy_error: 0.01,
            dz_error: 0.01,
            ..Default::default()
        }
    }

    #[test]
    fn test_no_primary_vertex_is_an_error() {
        let event = Event { run: 3, event: 99, ..Default::default() };
        let err = analyzer().analyze(&event).unwrap_err();
        assert!(matches!(err, AnalyzerError::NoPrimaryVertex { run: 3, event: 99 }));
    }

    #[test]
    fn test_jet_index_counts_jets_above_threshold() {
        let jets = vec![
            Jet { pt: 50.0, eta: 1.0, phi: 1.0, energy: 80.0 },
            Jet { pt: 10.0, eta: 0.0, phi: 0.0, energy: 10.0 },
            Jet { pt: 30.0, eta: 0.0, phi: 0.05, energy: 30.0 },
        ];
        assert_eq!(jet_index(&jets, 0.0, 0.0), 1);
        assert_eq!(jet_index(&jets, 1.0, 1.1), 0);
        assert_eq!(jet_index(&jets, -2.0, -2.0), -1);
    }

    #[test]
    fn test_recorded_first_hit_falls_back_to_reference() {
        let mut t = track(2.0, 0.0, 0.0);
        t.vx = 1.0;
        t.vy = 2.0;
        t.vz = 3.0;
        assert_eq!(
            RecordedFirstHit.first_hit(&t),
            FirstHit { x: 1.0, y: 2.0, z: 3.0, region: -1 }
        );
        let hit = FirstHit { x: 4.0, y: 0.0, z: 0.0, region: 7 };
        t.first_hit = Some(hit);
        assert_eq!(RecordedFirstHit.first_hit(&t), hit);
    }

    #[test]
    fn test_minimum_track_selection() {
        let mut event = event_with_pv();
        event.tracks = vec![
            track(0.5, 0.0, 0.0),
            track(2.0, 3.0, 0.0),
            track(0.9, 2.5, 0.0),
            track(5.0, -1.0, 2.0),
        ];
        let record = analyzer().analyze(&event).unwrap();
        assert_eq!(record.tree_nTracks, 2);
        assert_eq!(record.tree_track_pt, vec![0.9, 5.0]);
        // Prompt tracks are never scored
        assert_eq!(record.tree_track_MVAval, vec![-10.0, -10.0]);
        assert_eq!(record.tree_track_Hemi, vec![0, 0]);
        assert_eq!(record.tree_track_Hemi_mva_NChi2, vec![-10.0, -10.0]);
    }

    #[test]
    fn test_every_event_has_two_llp_and_hemisphere_rows() {
        let record = analyzer().analyze(&event_with_pv()).unwrap();
        assert_eq!(record.tree_LLP, vec![1, 2]);
        assert_eq!(record.tree_Hemi, vec![1, 2]);
        assert_eq!(record.tree_Hemi_Vtx_NChi2, vec![-10.0, -10.0]);
        assert_eq!(record.tree_Hemi_Vtx_status, vec![1, 1]);
        assert_eq!(record.tree_LLP_Vtx_NChi2, vec![-10.0, -10.0]);
    }

    fn through_decay(phi: f64, dz_error: f64) -> Track {
        Track {
            pt: 10.0,
            eta: 0.5,
            phi,
            charge: 1,
            normalized_chi2: 1.0,
            vx: 1.0,
            vy: 1.0,
            vz: 1.0,
            dxy_error: 0.01,
            dz_error,
            ..Default::default()
        }
    }

    #[test]
    fn test_track_without_errors_keeps_weights_aligned() {
        let mut event = event_with_pv();
        event.tracks = vec![
            through_decay(-0.3, 0.01),
            through_decay(0.1, 0.0),
            through_decay(0.0, 0.01),
            through_decay(0.3, 0.01),
        ];
        let record = analyzer().analyze(&event).unwrap();

        assert_eq!(record.tree_track_Hemi, vec![1, 1, 1, 1]);
        assert_eq!(record.tree_Hemi_nTrks_mva, vec![4, 0]);
        assert_eq!(record.tree_Hemi_Vtx_status[0], 0);
        assert_eq!(record.tree_Hemi_Vtx_nTrks[0], 3);

        let weights = &record.tree_Hemi_Vtx_trackWeight;
        assert_eq!(weights.len(), 4);
        assert_eq!(weights[1], 0.0);
        for k in [0, 2, 3] {
            assert!(weights[k] > 0.5, "{:?}", weights);
        }
        // The unfitted track was still selected for that hemisphere
        let nchi2 = record.tree_Hemi_Vtx_NChi2[0];
        assert_eq!(record.tree_track_Hemi_mva_NChi2, vec![nchi2; 4]);
    }

    #[test]
    fn test_custom_locator() {
        let mut event = event_with_pv();
        event.tracks = vec![track(2.0, 0.0, 0.0)];
        let a = analyzer().with_locator(|_: &Track| FirstHit { x: 9.0, y: 8.0, z: 7.0, region: 3 });
        let record = a.analyze(&event).unwrap();
        assert_eq!(record.tree_track_firstHit_x, vec![9.0]);
        assert_eq!(record.tree_track_region, vec![3]);
    }
}
