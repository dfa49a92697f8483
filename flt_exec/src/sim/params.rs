//! Simulation parameters

// ------------------------------------------------------------------------------------------------
// IMPORTS
// ------------------------------------------------------------------------------------------------

use serde::{Deserialize, Serialize};

use crate::geo::LocalPosition;

// ------------------------------------------------------------------------------------------------
// STRUCTS
// ------------------------------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SimParams {
    /// Fixed step of the physics tick.
    ///
    /// Units: seconds
    pub physics_step_s: f64,

    /// Step of the logic tick.
    ///
    /// Units: seconds
    pub logic_step_s: f64,

    /// Simulated time after which a mission is abandoned.
    ///
    /// Units: seconds
    pub max_duration_s: f64,

    pub start_position: LocalPosition,

    /// Height of the flat ground.
    ///
    /// Units: meters
    pub ground_level_m: f64,

    /// Arm the vehicle before the mission starts.
    pub auto_arm: bool,

    /// Write per-tick telemetry to the session archive.
    pub archive_telemetry: bool,
}

// ------------------------------------------------------------------------------------------------
// IMPLS
// ------------------------------------------------------------------------------------------------

impl Default for SimParams {
    fn default() -> Self {
        Self {
            physics_step_s: 0.01,
            logic_step_s: 0.02,
            max_duration_s: 300.0,
            start_position: LocalPosition::default(),
            ground_level_m: 0.0,
            auto_arm: true,
            archive_telemetry: true,
        }
    }
}
