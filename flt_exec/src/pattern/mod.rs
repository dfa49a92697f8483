//! # Pattern module
//!
//! Generates area coverage patterns which are fed into navigation as waypoints. The only
//! pattern provided is the [`LawnmowerPattern`], a back and forth sweep over a square area.

// ------------------------------------------------------------------------------------------------
// MODULES
// ------------------------------------------------------------------------------------------------

pub mod lawnmower;
pub mod params;

// ------------------------------------------------------------------------------------------------
// IMPORTS
// ------------------------------------------------------------------------------------------------

use crate::nav::NavError;

pub use lawnmower::{GeneratedPattern, LawnmowerPattern};
pub use params::SearchAreaConfig;

// ------------------------------------------------------------------------------------------------
// ENUMS
// ------------------------------------------------------------------------------------------------

#[derive(Debug, thiserror::Error)]
pub enum PatternError {
    #[error("Could not load parameters: {0}")]
    ParamLoadError(util::params::LoadError),

    #[error("The waypoint sink rejected a waypoint: {0}")]
    SinkError(NavError),
}
