pub mod constants;
pub mod error;
pub mod kinematics;
pub mod event;
pub mod genealogy;
pub mod truth;
pub mod leptons;
pub mod hemisphere;
pub mod classifier;
pub mod selection;
pub mod vertex;
pub mod analyzer;
pub mod input;
pub mod output;
pub mod config;
