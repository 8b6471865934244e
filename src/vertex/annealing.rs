// Geometric annealing schedule for the adaptive fit
//
// Track weights follow a Fermi-like function of the track-to-vertex chi2:
//   w = exp(-chi2 / 2T) / (exp(-chi2 / 2T) + exp(-cut^2 / 2T))
// and the temperature cools geometrically towards 1: T <- 1 + (T - 1) * ratio.

/// Temperature below which the schedule counts as finished
const ANNEALED_TEMPERATURE: f64 = 1.02;

#[derive(Debug, Clone, PartialEq)]
pub struct GeometricAnnealing {
    chi2_cut: f64,
    ratio: f64,
    temperature: f64,
}

impl GeometricAnnealing {
    pub fn new(sigma_cut: f64, t_ini: f64, ratio: f64) -> Self {
        Self {
            chi2_cut: sigma_cut * sigma_cut,
            ratio,
            temperature: t_ini,
        }
    }

    pub fn temperature(&self) -> f64 {
        self.temperature
    }

    fn phi(&self, chi2: f64) -> f64 {
        (-0.5 * chi2 / self.temperature).exp()
    }

    /// Weight in [0, 1] of a track with compatibility `chi2`
    pub fn weight(&self, chi2: f64) -> f64 {
        let num = self.phi(chi2);
        let w = num / (num + self.phi(self.chi2_cut));
        if w.is_finite() {
            w
        } else if chi2 < self.chi2_cut {
            1.0
        } else {
            0.0
        }
    }

    pub fn anneal(&mut self) {
        self.temperature = 1.0 + (self.temperature - 1.0) * self.ratio;
    }

    pub fn is_annealed(&self) -> bool {
        self.temperature < ANNEALED_TEMPERATURE
    }
}
