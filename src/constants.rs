// Shared constants for the displaced-vertex analysis
// Lengths are in cm, momenta and masses in GeV, fields in tesla.

// --- Track preselection ---

/// Minimum track pt kept in the per-track columns (GeV)
pub const TRACK_MIN_PT: f64 = 0.9;

/// Maximum track |eta| kept in the per-track columns
pub const TRACK_MAX_ETA: f64 = 2.5;

/// Classifier input quality: minimum pt (GeV)
pub const SEL_PT_CUT: f64 = 1.0;

/// Classifier input quality: maximum normalized chi2
pub const SEL_NCHI2_CUT: f64 = 5.0;

/// Classifier input quality: minimum transverse displacement significance
pub const SEL_DRSIG_CUT: f64 = 5.0;

/// Classifier operating point for the high-purity training
pub const DEFAULT_BDT_CUT: f64 = -0.1456;

/// Track-to-axis angular cut. Large on purpose: any cut biases low-pt tracks.
pub const TRACK_AXIS_DR_CUT: f64 = 10.0;

/// Radii of the local track-density features (cm)
pub const DENSITY_RADII: [f64; 3] = [10.0, 20.0, 30.0];

// --- Jets and hemispheres ---

/// Minimum jet pt (GeV) for the jet columns and the axis builder
pub const JET_MIN_PT: f64 = 20.0;

/// Axis builder |eta| cut (no restriction in practice)
pub const AXIS_JET_MAX_ETA: f64 = 10.0;

/// Agglomeration radius of a jet into a running axis
pub const HEMI_DR_CUT: f64 = 1.5;

/// Lepton-in-jet and track-in-jet cone
pub const JET_CONE_DR: f64 = 0.4;

/// HT is summed over jets within this |eta|
pub const HT_MAX_ETA: f64 = 2.4;

/// HT filter threshold (GeV)
pub const HT_FILTER_MIN: f64 = 180.0;

// --- Leptons ---

/// Muon mass used in the dimuon invariant mass (GeV)
pub const MUON_MASS: f64 = 0.1057;

/// Muons stored in the muon columns
pub const MUON_MIN_PT: f64 = 3.0;

/// Electrons stored in the electron columns
pub const ELECTRON_MIN_PT: f64 = 5.0;

/// Each dimuon leg must be a global muon above this pt
pub const DIMUON_LEG_MIN_PT: f64 = 10.0;

/// At least one dimuon leg must be above this pt
pub const DIMUON_LEAD_MIN_PT: f64 = 28.0;

/// Dimuon mass above which the event holds a Z candidate
pub const Z_CANDIDATE_MIN_MASS: f64 = 60.0;

// --- Generator truth ---

/// PDG id of the smuon (production vertex = generator primary vertex)
pub const PDG_SMUON: i32 = 1000013;

/// PDG id of the long-lived neutralino
pub const PDG_NEUTRALINO: i32 = 1000023;

/// Final-state truth particles: minimum pt (GeV)
pub const GEN_FINAL_MIN_PT: f64 = 0.9;

/// Final-state truth particles: maximum |eta|
pub const GEN_FINAL_MAX_ETA: f64 = 3.0;

/// Pruned truth particles stored and heavy hadrons considered: maximum |eta|
pub const GEN_PRUNED_MAX_ETA: f64 = 4.0;

/// Generator jets stored above this pt (GeV)
pub const GEN_JET_MIN_PT: f64 = 20.0;

/// Squared 3D distance (cm^2) under which a particle is attached to a vertex
pub const VERTEX_MATCH_DIST2: f64 = 0.01;

/// Relative pt, eta and phi agreement for two records of the same particle
pub const SAME_PARTICLE_TOL: f64 = 0.01;

/// Generator primary vertex when no smuon is found
pub const DEFAULT_GEN_PV: [f64; 3] = [-1.0, -1.0, -20.0];

/// Solenoid field (T)
pub const DEFAULT_B_FIELD: f64 = 3.8;

/// Gyroradius in cm of a unit-charge track: R = pt * GYRO_CM_PER_GEV / B
pub const GYRO_CM_PER_GEV: f64 = 100.0 / 0.3;

// --- Adaptive vertex fit ---

/// Maximum vertex shift between iterations for convergence (cm)
pub const AVF_MAX_SHIFT: f64 = 0.0001;

/// Shift of the vertex from the linearization point forcing relinearization (cm)
pub const AVF_MAX_LP_SHIFT: f64 = 0.1;

/// Maximum number of fit iterations
pub const AVF_MAX_STEP: usize = 30;

/// Tracks below this weight do not enter the Kalman update
pub const AVF_WEIGHT_THRESHOLD: f64 = 0.001;

/// Annealing cutoff in standard deviations
pub const AVF_SIGMA_CUT: f64 = 3.0;

/// Initial annealing temperature
pub const AVF_T_INI: f64 = 256.0;

/// Annealing cooling ratio
pub const AVF_RATIO: f64 = 0.25;

/// Fitted-track weight above which a track counts as accepted
pub const AVF_ACCEPTED_WEIGHT: f64 = 0.5;

/// Tracker volume: maximum transverse radius of a valid vertex (cm)
pub const TRACKER_RADIUS: f64 = 112.0;

/// Tracker volume: maximum |z| of a valid vertex (cm)
pub const TRACKER_HALF_LENGTH: f64 = 273.5;

// --- Output sentinels ---

/// Fitted position when no valid vertex exists
pub const VTX_SENTINEL_POS: f64 = -100.0;

/// Normalized chi2 when no valid vertex exists
pub const VTX_SENTINEL_CHI2: f64 = -10.0;

/// Classifier score of tracks that were not evaluated
pub const SCORE_SENTINEL: f64 = -10.0;

/// Default for absent kinematic quantities (MET, LLP kinematics)
pub const KINE_SENTINEL: f64 = -10.0;
