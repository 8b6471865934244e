// Hemisphere axes - greedy jet clustering into two directions
//
// Jets are first cleaned of the selected prompt muons, then clustered in
// input order: the first hard jet seeds axis 1, every other jet joins axis 1
// if it is close to the running axis-1 sum, otherwise the first leftover jet
// seeds axis 2 and later leftovers join it under the same rule. The result is
// order dependent and that is intended.

use std::f64::consts::PI;

use serde::Serialize;
use tracing::debug;

use crate::constants::{AXIS_JET_MAX_ETA, HEMI_DR_CUT, JET_CONE_DR, JET_MIN_PT};
use crate::event::{Jet, Muon};
use crate::kinematics::{delta_r, wrap_phi, FourMomentum};
use crate::leptons::DimuonPair;
use crate::truth::SimulatedLlp;

/// Hemisphere direction
#[derive(Debug, Clone, Copy, Default, Serialize)]
pub struct Axis {
    pub eta: f64,
    pub phi: f64,
    /// Sum of the cleaned jets in this hemisphere
    pub momentum: FourMomentum,
    pub n_jets: usize,
}

impl Axis {
    fn seed(jet: FourMomentum) -> Self {
        Self {
            eta: jet.eta(),
            phi: jet.phi(),
            momentum: jet,
            n_jets: 1,
        }
    }

    fn absorb(&mut self, jet: FourMomentum) {
        self.momentum += jet;
        self.eta = self.momentum.eta();
        self.phi = self.momentum.phi();
        self.n_jets += 1;
    }

    fn distance(&self, jet: &FourMomentum) -> f64 {
        delta_r(jet.eta(), jet.phi(), self.eta, self.phi)
    }
}

/// Jets above threshold as massless four-vectors with any selected prompt
/// muon inside the jet cone subtracted
pub fn clean_jets(jets: &[Jet], muons: &[Muon], pair: Option<DimuonPair>) -> Vec<FourMomentum> {
    let legs: Vec<&Muon> = pair
        .into_iter()
        .flat_map(|p| [p.leading, p.subleading])
        .filter_map(|i| muons.get(i))
        .collect();

    jets.iter()
        .filter(|j| j.pt > JET_MIN_PT && j.eta.abs() < AXIS_JET_MAX_ETA)
        .map(|j| {
            let mut v = FourMomentum::from_pt_eta_phi_m(j.pt, j.eta, j.phi, 0.0);
            for mu in &legs {
                if delta_r(j.eta, j.phi, mu.eta, mu.phi) < JET_CONE_DR {
                    v -= FourMomentum::from_pt_eta_phi_m(mu.pt, mu.eta, mu.phi, 0.0);
                }
            }
            v
        })
        .collect()
}

/// Clusters cleaned jets into axis 1 and, when some jet is left over, axis 2
pub fn cluster(jets: &[FourMomentum]) -> (Axis, Option<Axis>) {
    let seed = jets
        .iter()
        .position(|v| v.pt() > JET_MIN_PT && v.eta().abs() < AXIS_JET_MAX_ETA);

    let mut axis1 = seed.map(|i| Axis::seed(jets[i]));
    let mut axis2: Option<Axis> = None;

    for (i, jet) in jets.iter().enumerate() {
        if Some(i) == seed {
            continue;
        }
        if let Some(a1) = axis1.as_mut() {
            if a1.distance(jet) < HEMI_DR_CUT {
                a1.absorb(*jet);
                continue;
            }
        }
        match axis2.as_mut() {
            None => axis2 = Some(Axis::seed(*jet)),
            Some(a2) => {
                if a2.distance(jet) < HEMI_DR_CUT {
                    a2.absorb(*jet);
                }
            }
        }
    }

    (axis1.unwrap_or_default(), axis2)
}

/// Axis opposite in phi to `axis`, at the same eta
pub fn opposite_axis(axis: &Axis) -> Axis {
    Axis {
        eta: axis.eta,
        phi: wrap_phi(axis.phi + PI),
        momentum: FourMomentum::default(),
        n_jets: 0,
    }
}

/// The two hemispheres of an event and their truth labels
#[derive(Debug, Clone, Serialize)]
pub struct Hemispheres {
    pub axes: [Axis; 2],
    /// Axis 2 was derived from axis 1 rather than from jets
    pub synthetic_axis2: bool,
    /// LLP identity attached to each axis, a permutation of {1, 2}
    pub llp_labels: [u8; 2],
    /// Delta R between each axis and its labelled LLP, -1 if that LLP is absent
    pub llp_dr: [f64; 2],
    /// Delta R between the two axes
    pub dr12: f64,
}

impl Hemispheres {
    pub fn axis(&self, hemi: u8) -> &Axis {
        &self.axes[usize::from(hemi.saturating_sub(1)).min(1)]
    }

    /// LLP label of hemisphere 1 or 2, 0 for anything else
    pub fn llp_label(&self, hemi: u8) -> u8 {
        match hemi {
            1 => self.llp_labels[0],
            2 => self.llp_labels[1],
            _ => 0,
        }
    }

    /// Closest axis to a direction and the distance to it. Ties go to axis 1.
    pub fn nearest(&self, eta: f64, phi: f64) -> (u8, f64) {
        let dr1 = delta_r(eta, phi, self.axes[0].eta, self.axes[0].phi);
        let dr2 = delta_r(eta, phi, self.axes[1].eta, self.axes[1].phi);
        if dr2 < dr1 {
            (2, dr2)
        } else {
            (1, dr1)
        }
    }
}

fn dr_to(axis: &Axis, llp: Option<&SimulatedLlp>) -> f64 {
    llp.map_or(f64::INFINITY, |l| delta_r(axis.eta, axis.phi, l.eta, l.phi))
}

fn finite_or_missing(dr: f64) -> f64 {
    if dr.is_finite() {
        dr
    } else {
        -1.0
    }
}

/// Builds both axes and labels them against the simulated LLPs. Axis 1 is
/// labelled LLP 2 only when it is strictly closer to LLP 2 than to LLP 1;
/// an absent LLP is infinitely far away.
pub fn build(
    jets: &[Jet],
    muons: &[Muon],
    pair: Option<DimuonPair>,
    llps: &[SimulatedLlp],
) -> Hemispheres {
    let cleaned = clean_jets(jets, muons, pair);
    let (axis1, axis2) = cluster(&cleaned);
    let synthetic_axis2 = axis2.is_none();
    let axis2 = axis2.unwrap_or_else(|| opposite_axis(&axis1));

    let llp1 = llps.iter().find(|l| l.id == 1);
    let llp2 = llps.iter().find(|l| l.id == 2);

    let dr1 = dr_to(&axis1, llp1);
    let dr2 = dr_to(&axis1, llp2);
    let (llp_labels, axis1_dr, other) = if dr2 < dr1 {
        ([2, 1], dr2, llp1)
    } else {
        ([1, 2], dr1, llp2)
    };
    let axis2_dr = dr_to(&axis2, other);

    let dr12 = delta_r(axis1.eta, axis1.phi, axis2.eta, axis2.phi);

    debug!(
        n_jets = cleaned.len(),
        njet1 = axis1.n_jets,
        njet2 = axis2.n_jets,
        synthetic_axis2,
        ?llp_labels,
        "Hemisphere axes"
    );

    Hemispheres {
        axes: [axis1, axis2],
        synthetic_axis2,
        llp_labels,
        llp_dr: [finite_or_missing(axis1_dr), finite_or_missing(axis2_dr)],
        dr12,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn jet(pt: f64, eta: f64, phi: f64) -> Jet {
        Jet {
            pt,
            eta,
            phi,
            energy: pt * eta.cosh(),
        }
    }

    fn llp(id: u8, eta: f64, phi: f64) -> SimulatedLlp {
        SimulatedLlp {
            id,
            pruned_index: 0,
            pt: 100.0,
            eta,
            phi,
            mass: 200.0,
            decay_vertex: Some([1.0, 1.0, 1.0]),
            dist: 3.0_f64.sqrt(),
        }
    }

    #[test]
    fn test_no_jets_gives_default_and_opposite_axis() {
        let h = build(&[], &[], None, &[]);
        assert_eq!(h.axes[0].eta, 0.0);
        assert_eq!(h.axes[0].phi, 0.0);
        assert_eq!(h.axes[0].n_jets, 0);
        assert_eq!(h.axes[1].n_jets, 0);
        assert!(h.synthetic_axis2);
        assert!((h.axes[1].phi.abs() - PI).abs() < 1e-12);
        assert_eq!(h.llp_labels, [1, 2]);
        assert_eq!(h.llp_dr, [-1.0, -1.0]);
    }

    #[test]
    fn test_single_jet_synthetic_axis2() {
        let h = build(&[jet(50.0, 0.8, -2.0)], &[], None, &[]);
        assert!(h.synthetic_axis2);
        assert_eq!(h.axes[0].n_jets, 1);
        assert!((h.axes[1].eta - 0.8).abs() < 1e-9);
        assert!((h.axes[1].phi - (-2.0 + PI)).abs() < 1e-9);
        assert!(h.axes.iter().all(|a| a.eta.is_finite() && a.phi.is_finite()));
        assert!((h.dr12 - PI).abs() < 1e-9);
    }

    #[test]
    fn test_greedy_clustering() {
        let jets = vec![
            jet(100.0, 0.0, 0.0),
            jet(60.0, 2.0, 3.0),
            jet(40.0, 0.5, 0.5),
            jet(30.0, 1.8, 2.8),
            // soft jet is ignored
            jet(10.0, 0.0, 0.1),
            // far from both axes: unassigned
            jet(25.0, -3.0, -1.5),
        ];
        let h = build(&jets, &[], None, &[]);
        assert!(!h.synthetic_axis2);
        assert_eq!(h.axes[0].n_jets, 2);
        assert_eq!(h.axes[1].n_jets, 2);
        assert!(h.axes[0].phi > 0.0 && h.axes[0].phi < 0.5);
        assert!(h.axes[1].phi > 2.8 && h.axes[1].phi < 3.0);
    }

    #[test]
    fn test_order_dependence_through_running_axis() {
        // The third jet is only in reach once the second one has pulled the axis
        let jets = vec![jet(50.0, 0.0, 0.0), jet(50.0, 0.0, 1.2), jet(50.0, 0.0, 2.0)];
        let (a1, a2) = cluster(&clean_jets(&jets, &[], None));
        assert_eq!(a1.n_jets, 3);
        assert!(a2.is_none());

        let reordered = vec![jet(50.0, 0.0, 0.0), jet(50.0, 0.0, 2.0), jet(50.0, 0.0, 1.2)];
        let (a1, a2) = cluster(&clean_jets(&reordered, &[], None));
        assert_eq!(a1.n_jets, 2);
        assert_eq!(a2.map(|a| a.n_jets), Some(1));
    }

    #[test]
    fn test_muon_cleaning() {
        let muons = vec![
            Muon { pt: 30.0, eta: 0.0, phi: 0.0, charge: 1, is_global: true, ..Default::default() },
            Muon { pt: 30.0, eta: 0.0, phi: PI, charge: -1, is_global: true, ..Default::default() },
        ];
        let pair = Some(DimuonPair { leading: 0, subleading: 1, mass: 60.0 });
        let jets = vec![jet(45.0, 0.0, 0.05), jet(80.0, 1.0, 1.5)];
        let cleaned = clean_jets(&jets, &muons, pair);
        assert_eq!(cleaned.len(), 2);
        assert!(cleaned[0].pt() < JET_MIN_PT);
        assert!((cleaned[1].pt() - 80.0).abs() < 1e-9);

        // The cleaned first jet is too soft to seed: the second one does
        let (a1, _) = cluster(&cleaned);
        assert!((a1.eta - 1.0).abs() < 1e-9);
    }

    #[test]
    fn test_truth_relabeling() {
        let jets = vec![jet(100.0, 0.0, 0.0), jet(80.0, 0.0, 3.0)];
        // LLP 2 points along axis 1
        let llps = vec![llp(1, 0.1, 3.0), llp(2, 0.1, 0.1)];
        let h = build(&jets, &[], None, &llps);
        assert_eq!(h.llp_labels, [2, 1]);
        assert!(h.llp_dr[0] < 0.2);
        assert!(h.llp_dr[1] < 0.2);

        let llps = vec![llp(1, 0.1, 0.1), llp(2, 0.1, 3.0)];
        let h = build(&jets, &[], None, &llps);
        assert_eq!(h.llp_labels, [1, 2]);

        // Exact tie keeps the natural labelling
        let llps = vec![llp(1, 0.5, 0.0), llp(2, -0.5, 0.0)];
        let h = build(&jets, &[], None, &llps);
        assert_eq!(h.llp_labels, [1, 2]);
    }

    #[test]
    fn test_nearest_axis_ties_to_axis1() {
        let axis = |eta: f64, phi: f64| Axis { eta, phi, ..Default::default() };
        let h = Hemispheres {
            axes: [axis(0.0, 0.0), axis(2.0, 0.0)],
            synthetic_axis2: false,
            llp_labels: [1, 2],
            llp_dr: [-1.0, -1.0],
            dr12: 2.0,
        };
        assert_eq!(h.nearest(0.3, 0.0).0, 1);
        assert_eq!(h.nearest(1.7, 0.0).0, 2);
        let (axis, dr) = h.nearest(1.0, 0.0);
        assert_eq!(axis, 1);
        assert_eq!(dr, 1.0);
    }
}
