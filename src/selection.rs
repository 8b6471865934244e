// Displaced track selection - density features, axis assignment, scoring
//
// Preselected tracks (pt > 1 GeV, chi2/ndf < 5, |dxy|/sigma > 5) are counted
// around each other at their first hits, attached to the nearest hemisphere
// axis and scored. Tracks above the score cut feed the hemisphere fits and,
// by their truth label, the truth-control fits.

use serde::Serialize;
use tracing::debug;

use crate::classifier::{TrackFeatures, TrackScorer};
use crate::constants::{
    DENSITY_RADII, SCORE_SENTINEL, SEL_DRSIG_CUT, SEL_NCHI2_CUT, SEL_PT_CUT, TRACK_AXIS_DR_CUT,
};
use crate::hemisphere::Hemispheres;
use crate::kinematics::distance2;

/// Per-track quantities the selection needs, one per stored track
#[derive(Debug, Clone, Copy, Default)]
pub struct SelectionInput {
    pub pt: f64,
    pub eta: f64,
    pub phi: f64,
    pub nchi2: f64,
    pub n_hits: i32,
    pub dr_sig: f64,
    pub first_hit: [f64; 3],
    pub in_jet: bool,
    /// Truth LLP the track was matched to, -1 without match
    pub truth_llp: i32,
}

impl SelectionInput {
    pub fn is_preselected(&self) -> bool {
        self.pt > SEL_PT_CUT && self.nchi2 < SEL_NCHI2_CUT && self.dr_sig > SEL_DRSIG_CUT
    }
}

/// Selection outcome of one track
#[derive(Debug, Clone, Serialize)]
pub struct TrackClassification {
    /// Assigned axis: 0 when not preselected, else 1 or 2
    pub hemi: u8,
    /// Distance to the assigned axis, -1 when not preselected
    pub hemi_dr: f64,
    /// LLP label of the assigned axis, 0 when unassigned
    pub hemi_llp: u8,
    /// Classifier response, -10 when not evaluated
    pub score: f64,
    pub ntrk10: u32,
    pub ntrk20: u32,
    pub ntrk30: u32,
}

impl Default for TrackClassification {
    fn default() -> Self {
        Self {
            hemi: 0,
            hemi_dr: -1.0,
            hemi_llp: 0,
            score: SCORE_SENTINEL,
            ntrk10: 0,
            ntrk20: 0,
            ntrk30: 0,
        }
    }
}

/// Track counts of one hemisphere before and after the score cut. A track is
/// signal when its truth LLP is the one the axis is labelled with, and bad
/// when it comes from the other LLP.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct HemisphereCounts {
    pub n_trks: u32,
    pub n_trks_sig: u32,
    pub n_trks_bad: u32,
    pub n_trks_mva: u32,
    pub n_trks_mva_sig: u32,
    pub n_trks_mva_bad: u32,
}

impl HemisphereCounts {
    fn tally(&mut self, truth_llp: i32, label: u8, passed: bool) {
        let sig = truth_llp == i32::from(label);
        let bad = !sig && truth_llp >= 1;
        self.n_trks += 1;
        self.n_trks_sig += u32::from(sig);
        self.n_trks_bad += u32::from(bad);
        if passed {
            self.n_trks_mva += 1;
            self.n_trks_mva_sig += u32::from(sig);
            self.n_trks_mva_bad += u32::from(bad);
        }
    }
}

/// Indices of the tracks entering each of the four vertex fits
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct FitInputs {
    pub llp: [Vec<usize>; 2],
    pub hemi: [Vec<usize>; 2],
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct SelectionResult {
    pub tracks: Vec<TrackClassification>,
    pub fit_inputs: FitInputs,
    pub hemi_counts: [HemisphereCounts; 2],
    /// Preselected tracks near an axis matched to LLP 1 and LLP 2, before the score cut
    pub llp_n_trks: [u32; 2],
}

/// Cumulative counts of other preselected tracks whose first hit lies within
/// each density radius of this track's first hit
pub fn density_counts(inputs: &[SelectionInput], preselected: &[bool], idx: usize) -> [u32; 3] {
    let mut counts = [0u32; 3];
    let here = inputs[idx].first_hit;
    for (j, other) in inputs.iter().enumerate() {
        if j == idx || !preselected[j] {
            continue;
        }
        let d = distance2(here, other.first_hit).sqrt();
        for (count, radius) in counts.iter_mut().zip(DENSITY_RADII) {
            if d < radius {
                *count += 1;
            }
        }
    }
    counts
}

/// Runs the selection over all stored tracks
pub fn select(
    inputs: &[SelectionInput],
    hemispheres: &Hemispheres,
    scorer: &dyn TrackScorer,
    bdt_cut: f64,
) -> SelectionResult {
    let preselected: Vec<bool> = inputs.iter().map(SelectionInput::is_preselected).collect();
    let mut result = SelectionResult {
        tracks: Vec::with_capacity(inputs.len()),
        ..Default::default()
    };

    for (i, input) in inputs.iter().enumerate() {
        let mut class = TrackClassification::default();
        if !preselected[i] {
            result.tracks.push(class);
            continue;
        }

        let (hemi, dr) = hemispheres.nearest(input.eta, input.phi);
        let label = hemispheres.llp_label(hemi);
        let [n10, n20, n30] = density_counts(inputs, &preselected, i);
        class.hemi = hemi;
        class.hemi_dr = dr;
        class.hemi_llp = label;
        class.ntrk10 = n10;
        class.ntrk20 = n20;
        class.ntrk30 = n30;

        if dr < TRACK_AXIS_DR_CUT {
            match input.truth_llp {
                1 => result.llp_n_trks[0] += 1,
                2 => result.llp_n_trks[1] += 1,
                _ => {}
            }

            let features = TrackFeatures {
                pt: input.pt,
                eta: input.eta,
                nchi2: input.nchi2,
                nhits: f64::from(input.n_hits),
                ntrk10: f64::from(n10),
                dr_sig: input.dr_sig,
                is_in_jet: if input.in_jet { 1.0 } else { 0.0 },
            };
            class.score = scorer.score(&features);
            let passed = class.score > bdt_cut;

            let h = usize::from(hemi - 1);
            result.hemi_counts[h].tally(input.truth_llp, label, passed);

            if passed {
                match input.truth_llp {
                    1 => result.fit_inputs.llp[0].push(i),
                    2 => result.fit_inputs.llp[1].push(i),
                    _ => {}
                }
                result.fit_inputs.hemi[h].push(i);
            }
        }

        result.tracks.push(class);
    }

    debug!(
        n_tracks = inputs.len(),
        n_preselected = preselected.iter().filter(|&&p| p).count(),
        hemi1 = result.fit_inputs.hemi[0].len(),
        hemi2 = result.fit_inputs.hemi[1].len(),
        llp1 = result.fit_inputs.llp[0].len(),
        llp2 = result.fit_inputs.llp[1].len(),
        "Track selection"
    );

    result
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hemisphere::Axis;

    fn hemispheres(labels: [u8; 2]) -> Hemispheres {
        let axis = |eta: f64, phi: f64| Axis {
            eta,
            phi,
            ..Default::default()
        };
        Hemispheres {
            axes: [axis(0.0, 0.0), axis(0.0, 3.0)],
            synthetic_axis2: false,
            llp_labels: labels,
            llp_dr: [0.1, 0.1],
            dr12: 3.0,
        }
    }

    fn input(phi: f64, first_hit: [f64; 3], truth_llp: i32) -> SelectionInput {
        SelectionInput {
            pt: 5.0,
            eta: 0.0,
            phi,
            nchi2: 1.0,
            n_hits: 15,
            dr_sig: 20.0,
            first_hit,
            in_jet: false,
            truth_llp,
        }
    }

    fn constant(value: f64) -> impl TrackScorer {
        move |_: &TrackFeatures| value
    }

    #[test]
    fn test_preselection_cuts() {
        let good = input(0.0, [0.0; 3], -1);
        assert!(good.is_preselected());
        assert!(!SelectionInput { pt: 1.0, ..good }.is_preselected());
        assert!(!SelectionInput { nchi2: 5.0, ..good }.is_preselected());
        assert!(!SelectionInput { dr_sig: 5.0, ..good }.is_preselected());
        assert!(!SelectionInput { dr_sig: -1.0, ..good }.is_preselected());
    }

    #[test]
    fn test_density_counts_are_symmetric_and_cumulative() {
        let inputs = vec![
            input(0.0, [0.0, 0.0, 0.0], -1),
            input(0.0, [5.0, 0.0, 0.0], -1),
            input(0.0, [0.0, 15.0, 0.0], -1),
            input(0.0, [0.0, 0.0, 25.0], -1),
            // Not preselected: never counted
            SelectionInput { pt: 0.5, ..input(0.0, [1.0, 0.0, 0.0], -1) },
        ];
        let pre: Vec<bool> = inputs.iter().map(SelectionInput::is_preselected).collect();
        assert_eq!(density_counts(&inputs, &pre, 0), [1, 2, 3]);
        assert_eq!(density_counts(&inputs, &pre, 1), [1, 2, 3]);
        assert_eq!(density_counts(&inputs, &pre, 3), [0, 0, 3]);
    }

    #[test]
    fn test_unselected_tracks_keep_defaults() {
        let inputs = vec![SelectionInput { dr_sig: 1.0, ..input(0.0, [0.0; 3], 1) }];
        let r = select(&inputs, &hemispheres([1, 2]), &constant(1.0), -0.1456);
        let t = &r.tracks[0];
        assert_eq!(t.hemi, 0);
        assert_eq!(t.hemi_dr, -1.0);
        assert_eq!(t.score, SCORE_SENTINEL);
        assert_eq!(r.llp_n_trks, [0, 0]);
        assert!(r.fit_inputs.hemi.iter().all(Vec::is_empty));
    }

    #[test]
    fn test_fit_inputs_and_counts() {
        let inputs = vec![
            input(0.1, [1.0, 0.0, 0.0], 1),
            input(-0.1, [1.0, 0.5, 0.0], 2),
            input(2.9, [-1.0, 0.0, 0.0], 2),
            input(3.1, [-1.0, 0.1, 0.0], -1),
        ];
        let r = select(&inputs, &hemispheres([1, 2]), &constant(0.5), -0.1456);
        assert_eq!(r.fit_inputs.hemi[0], vec![0, 1]);
        assert_eq!(r.fit_inputs.hemi[1], vec![2, 3]);
        assert_eq!(r.fit_inputs.llp[0], vec![0]);
        assert_eq!(r.fit_inputs.llp[1], vec![1, 2]);
        assert_eq!(r.llp_n_trks, [1, 2]);

        let h1 = r.hemi_counts[0];
        assert_eq!((h1.n_trks, h1.n_trks_sig, h1.n_trks_bad), (2, 1, 1));
        assert_eq!((h1.n_trks_mva, h1.n_trks_mva_sig, h1.n_trks_mva_bad), (2, 1, 1));
        let h2 = r.hemi_counts[1];
        assert_eq!((h2.n_trks, h2.n_trks_sig, h2.n_trks_bad), (2, 1, 0));

        assert_eq!(r.tracks[2].hemi, 2);
        assert_eq!(r.tracks[2].hemi_llp, 2);
    }

    #[test]
    fn test_score_cut_and_swapped_labels() {
        let inputs = vec![input(0.1, [1.0, 0.0, 0.0], 2), input(2.9, [-1.0, 0.0, 0.0], 1)];
        // Everything fails the cut: counted before the cut only, no fit inputs
        let r = select(&inputs, &hemispheres([2, 1]), &constant(-0.5), -0.1456);
        assert!(r.fit_inputs.hemi.iter().all(Vec::is_empty));
        assert!(r.fit_inputs.llp.iter().all(Vec::is_empty));
        assert_eq!(r.hemi_counts[0].n_trks_sig, 1);
        assert_eq!(r.hemi_counts[1].n_trks_sig, 1);
        assert_eq!(r.hemi_counts[0].n_trks_mva, 0);
        assert_eq!(r.tracks[0].score, -0.5);
        assert_eq!(r.tracks[0].hemi_llp, 2);
    }
}
