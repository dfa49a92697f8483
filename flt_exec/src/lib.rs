//! # Flight library.
//!
//! Flight control and area-coverage navigation for a simulated multirotor.
//! Data flows from the [`pattern`] generator, through the waypoint queue and
//! [`nav::Navigator`], into the [`flt_ctrl::VehicleController`] whose PID loops
//! produce the forces integrated by the physics tick in [`sim`].

// ------------------------------------------------------------------------------------------------
// MODULES
// ------------------------------------------------------------------------------------------------

/// Geographic coordinates, the local frame and conversion between them
pub mod geo;

/// Synchronous event notification to external observers
pub mod events;

/// Flight control - PID loops, vehicle state and rigid body integration
pub mod flt_ctrl;

/// Navigation - waypoint queue and target tracking
pub mod nav;

/// Area coverage pattern generation
pub mod pattern;

/// Simulation driver - owns the logic and physics ticks
pub mod sim;
