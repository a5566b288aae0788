#![no_std]

extern crate alloc;

use alloc::string::String;
use alloc::vec::Vec;
use serde::{Deserialize, Serialize};

/// A packed atomic rate database for one element, as stored in the
/// compressed blob produced by `xrayspec pack`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RateDatabase {
    pub atomic_number: u16,
    pub symbol: String,
    pub records: Vec<RateRecord>,
    pub shake_probabilities: Vec<ShakeProbabilityRecord>,
}

/// Which rate table a row was read from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum RecordCategory {
    Diagram,
    ShakeOff,
    ShakeUp,
    Auger,
}

/// One row of a transition-rate table.
///
/// Shell labels are kept as text here; the library parses them into its
/// closed shell enum when a selection is built.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RateRecord {
    pub category: RecordCategory,
    pub initial_shell: String,
    pub final_shell: String,
    pub auger_shell: Option<String>,
    /// Spectator vacancy (shake-off) or excited electron (shake-up) shell.
    pub spectator_shell: Option<String>,
    pub jj_initial: f64,
    pub jj_final: f64,
    pub energy: f64,
    pub intensity: f64,
    pub width: f64,
    pub charge_state: Option<String>,
}

/// Shake-off and shake-up branching fractions for one spectator shell.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ShakeProbabilityRecord {
    pub shell: String,
    pub shake_off: f64,
    pub shake_up: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SpectrumRecord {
    pub energy: Vec<f64>,
    pub intensity: Vec<f64>,
    pub sigma: Option<Vec<f64>>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EfficiencyRecord {
    pub energy: Vec<f64>,
    pub efficiency_percent: Vec<f64>,
}
