// Kinematics helpers - angular distances and Lorentz vectors
//
// Conventions:
// - phi in radians, wrapped into (-pi, pi]
// - eta is the pseudorapidity
// - four-momenta are (E, px, py, pz) in GeV

use std::f64::consts::PI;
use std::ops::{Add, AddAssign, Sub, SubAssign};

use serde::{Deserialize, Serialize};

/// Eta reported for a vector along the beam line (matches the usual
/// physics-library convention of a huge but finite value)
const BEAM_LINE_ETA: f64 = 1e10;

/// Difference `phi1 - phi2` wrapped into (-pi, pi]
#[inline]
pub fn delta_phi(phi1: f64, phi2: f64) -> f64 {
    let d = PI - (PI - (phi1 - phi2)).rem_euclid(2.0 * PI);
    // rem_euclid may round a tiny negative remainder up to 2pi
    if d <= -PI {
        d + 2.0 * PI
    } else {
        d
    }
}

/// Wraps an angle into (-pi, pi]
#[inline]
pub fn wrap_phi(phi: f64) -> f64 {
    delta_phi(phi, 0.0)
}

/// Distance in the (eta, phi) plane
#[inline]
pub fn delta_r(eta1: f64, phi1: f64, eta2: f64, phi2: f64) -> f64 {
    let deta = eta1 - eta2;
    let dphi = delta_phi(phi1, phi2);
    (deta * deta + dphi * dphi).sqrt()
}

/// Squared 3D distance between two points
#[inline]
pub fn distance2(a: [f64; 3], b: [f64; 3]) -> f64 {
    let dx = a[0] - b[0];
    let dy = a[1] - b[1];
    let dz = a[2] - b[2];
    dx * dx + dy * dy + dz * dz
}

/// Four-momentum p = (E, px, py, pz)
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct FourMomentum {
    pub e: f64,
    pub px: f64,
    pub py: f64,
    pub pz: f64,
}

impl FourMomentum {
    pub fn new(e: f64, px: f64, py: f64, pz: f64) -> Self {
        Self { e, px, py, pz }
    }

    /// Build from collider coordinates (pt, eta, phi) and a mass
    pub fn from_pt_eta_phi_m(pt: f64, eta: f64, phi: f64, mass: f64) -> Self {
        let px = pt * phi.cos();
        let py = pt * phi.sin();
        let pz = pt * eta.sinh();
        let p2 = px * px + py * py + pz * pz;
        let e = if mass >= 0.0 {
            (p2 + mass * mass).sqrt()
        } else {
            (p2 - mass * mass).max(0.0).sqrt()
        };
        Self { e, px, py, pz }
    }

    /// Transverse momentum
    pub fn pt(&self) -> f64 {
        self.px.hypot(self.py)
    }

    /// Magnitude of the 3-momentum
    pub fn p(&self) -> f64 {
        (self.px * self.px + self.py * self.py + self.pz * self.pz).sqrt()
    }

    /// Pseudorapidity. A null vector has eta = 0.
    pub fn eta(&self) -> f64 {
        let pt = self.pt();
        if pt > 0.0 {
            (self.pz / pt).asinh()
        } else if self.pz == 0.0 {
            0.0
        } else if self.pz > 0.0 {
            BEAM_LINE_ETA
        } else {
            -BEAM_LINE_ETA
        }
    }

    /// Azimuthal angle in (-pi, pi]. A null vector has phi = 0.
    pub fn phi(&self) -> f64 {
        if self.px == 0.0 && self.py == 0.0 {
            0.0
        } else {
            self.py.atan2(self.px)
        }
    }

    /// Invariant mass squared m^2 = E^2 - |p|^2
    pub fn mass_squared(&self) -> f64 {
        self.e * self.e - self.px * self.px - self.py * self.py - self.pz * self.pz
    }

    /// Invariant mass; spacelike vectors return -sqrt(-m^2)
    pub fn mass(&self) -> f64 {
        let m2 = self.mass_squared();
        if m2 >= 0.0 {
            m2.sqrt()
        } else {
            -(-m2).sqrt()
        }
    }
}

impl Add for FourMomentum {
    type Output = Self;
    fn add(self, other: Self) -> Self {
        Self {
            e: self.e + other.e,
            px: self.px + other.px,
            py: self.py + other.py,
            pz: self.pz + other.pz,
        }
    }
}

impl Sub for FourMomentum {
    type Output = Self;
    fn sub(self, other: Self) -> Self {
        Self {
            e: self.e - other.e,
            px: self.px - other.px,
            py: self.py - other.py,
            pz: self.pz - other.pz,
        }
    }
}

impl AddAssign for FourMomentum {
    fn add_assign(&mut self, other: Self) {
        *self = *self + other;
    }
}

impl SubAssign for FourMomentum {
    fn sub_assign(&mut self, other: Self) {
        *self = *self - other;
    }
}
