//! # Navigation module
//!
//! The [`Navigator`] takes targets (as geographic coordinates, local positions or a queue of
//! waypoints) and feeds them one at a time to the [`crate::flt_ctrl::VehicleController`], checking
//! each logic tick whether the current target has been reached.
//!
//! State machine:
//!
//! - `Idle` - No target is being tracked. The vehicle holds the last target it was given.
//! - `Navigating` - A [`NavigationSession`] is active. When the target is reached the next
//!   waypoint is dequeued, or if none remain the navigator returns to `Idle` and emits
//!   [`crate::events::NavEvent::NavigationCompleted`].

// ------------------------------------------------------------------------------------------------
// MODULES
// ------------------------------------------------------------------------------------------------

pub mod params;
pub mod state;
pub mod waypoint_queue;

// ------------------------------------------------------------------------------------------------
// IMPORTS
// ------------------------------------------------------------------------------------------------

use serde::{Deserialize, Serialize};

use crate::{
    flt_ctrl::FltCtrlError,
    geo::{GeoCoordinate, LocalPosition},
};

pub use params::NavParams;
pub use state::{NavState, NavigationSession, Navigator};
pub use waypoint_queue::{Waypoint, WaypointList, WaypointQueue, WaypointRecord};

// ------------------------------------------------------------------------------------------------
// TRAITS
// ------------------------------------------------------------------------------------------------

/// Something which accepts waypoints to be visited in the order they are added.
pub trait WaypointSink {
    fn add_waypoint(&mut self, waypoint: Waypoint) -> Result<(), NavError>;

    /// Add each waypoint in turn, stopping at the first rejected one.
    fn add_waypoints(&mut self, waypoints: Vec<Waypoint>) -> Result<(), NavError> {
        for wp in waypoints {
            self.add_waypoint(wp)?;
        }
        Ok(())
    }
}

// ------------------------------------------------------------------------------------------------
// STRUCTS
// ------------------------------------------------------------------------------------------------

/// A mission handed to the navigator by an external planner.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MissionRecord {
    /// Human readable description, must not be blank.
    pub description: String,

    pub latitude: f64,
    pub longitude: f64,
}

// ------------------------------------------------------------------------------------------------
// ENUMS
// ------------------------------------------------------------------------------------------------

#[derive(Debug, thiserror::Error)]
pub enum NavError {
    #[error("Geographic coordinate {0} is out of bounds")]
    InvalidCoordinate(GeoCoordinate),

    #[error("Local position {0} is not finite")]
    InvalidPosition(LocalPosition),

    #[error("The mission description is empty")]
    EmptyMissionDescription,

    #[error("Flight control rejected the target: {0}")]
    FltCtrlError(FltCtrlError),

    #[error("Could not load parameters: {0}")]
    ParamLoadError(util::params::LoadError),
}

// ------------------------------------------------------------------------------------------------
// IMPLS
// ------------------------------------------------------------------------------------------------

impl MissionRecord {
    /// The geographic coordinate the mission is centred on.
    pub fn coordinate(&self) -> GeoCoordinate {
        GeoCoordinate::new(self.latitude, self.longitude)
    }
}

// ------------------------------------------------------------------------------------------------
// FUNCTIONS
// ------------------------------------------------------------------------------------------------

/// True if every component of the position is finite.
pub(crate) fn is_finite(pos: &LocalPosition) -> bool {
    pos.east_m.is_finite() && pos.up_m.is_finite() && pos.north_m.is_finite()
}
