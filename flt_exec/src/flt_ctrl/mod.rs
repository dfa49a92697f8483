//! # Flight control module
//!
//! Flight control turns a target position (or manual operator inputs) into a
//! vertical thrust and a lateral acceleration, and integrates those forces to
//! move the vehicle.
//!
//! Processing is split over two ticks:
//!
//! - The logic tick ([`util::module::State::proc`]) runs the altitude and
//!   speed controllers and produces a [`ControlCommand`].
//! - The physics tick ([`VehicleController::tick_physics`]) applies the latest
//!   command at a fixed step, integrates velocity and position, and runs the
//!   tilt stabiliser.
//!
//! If no [`FlightProfile`] has been configured the controller still flies,
//! using proportional-only laws with default physical parameters.

// ---------------------------------------------------------------------------
// MODULES
// ---------------------------------------------------------------------------

pub mod controllers;
pub mod params;
pub mod state;

// ---------------------------------------------------------------------------
// IMPORTS
// ---------------------------------------------------------------------------

use serde::{Deserialize, Serialize};

use crate::geo::LocalPosition;

pub use controllers::*;
pub use params::*;
pub use state::*;

// ---------------------------------------------------------------------------
// CONSTANTS
// ---------------------------------------------------------------------------

/// Gravitational acceleration.
///
/// Units: meters/second^2
pub const GRAVITY_MSS: f64 = 9.81;

// ---------------------------------------------------------------------------
// ENUMERATIONS
// ---------------------------------------------------------------------------

/// Control mode used while armed and in flight.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ControlMode {
    /// Operator inputs map directly onto thrust and lateral acceleration.
    Manual,

    /// The controller flies towards the current target position.
    AutoNav,
}

/// Possible errors that can occur during flight control.
#[derive(Debug, thiserror::Error)]
pub enum FltCtrlError {
    #[error("Could not load parameters: {0}")]
    ParamLoadError(util::params::LoadError),

    #[error("Could not initialise the archives: {0}")]
    ArchiveError(util::archive::ArchiveError),

    #[error("The vehicle must be armed to take off")]
    NotArmed,

    #[error("Target position {0} is not finite")]
    InvalidTarget(LocalPosition),

    #[error("Invalid logic tick time: {0}")]
    InvalidTime(f64),
}
