//! # Simulation module
//!
//! Drives the flight stack with an explicit clock. The [`Simulation`] owns the [`Navigator`]
//! (which in turn owns the vehicle and its waypoint queue) and advances it in two phases:
//!
//! - [`Simulation::tick_physics`] - a fixed step applying the latest commands to the vehicle.
//! - [`Simulation::tick_logic`] - navigation reach checks followed by the flight controllers.
//!
//! [`Simulation::step`] advances the logic clock and runs as many fixed physics steps as the
//! accumulated time allows before running the logic tick, so the logic always sees state settled
//! by the physics.

// ------------------------------------------------------------------------------------------------
// MODULES
// ------------------------------------------------------------------------------------------------

pub mod params;

// ------------------------------------------------------------------------------------------------
// IMPORTS
// ------------------------------------------------------------------------------------------------

use log::{trace, warn};
use serde::Serialize;

use crate::{
    flt_ctrl::{DistanceSource, FltCtrlError, InputData, ManualInput},
    geo::LocalPosition,
    nav::{NavError, Navigator},
};
use util::{
    archive::{ArchiveError, Archived, Archiver},
    module::State,
    session::Session,
};

pub use params::SimParams;

// ------------------------------------------------------------------------------------------------
// CONSTANTS
// ------------------------------------------------------------------------------------------------

/// Tolerance on the physics accumulator, so that logic steps which are an exact multiple of the
/// physics step do not lose a physics tick to rounding.
const ACCUMULATOR_EPSILON_S: f64 = 1e-9;

/// Most physics steps run by a single call to [`Simulation::step`]. Time beyond this is dropped.
pub const MAX_PHYSICS_STEPS_PER_CALL: usize = 1000;

// ------------------------------------------------------------------------------------------------
// STRUCTS
// ------------------------------------------------------------------------------------------------

/// Flat ground at a fixed height, measured straight down from the vehicle.
#[derive(Debug, Clone, Copy)]
pub struct FlatTerrain {
    /// Units: meters
    pub ground_level_m: f64,
}

/// Snapshot of the simulation after a logic tick.
#[derive(Debug, Clone, Copy, Default, Serialize)]
pub struct TelemetryRecord {
    pub time_s: f64,

    pub east_m: f64,
    pub up_m: f64,
    pub north_m: f64,

    pub vel_east_ms: f64,
    pub vel_up_ms: f64,
    pub vel_north_ms: f64,

    pub thrust_n: f64,
    pub lateral_accel_east_mss: f64,
    pub lateral_accel_north_mss: f64,

    pub altitude_error_m: f64,
    pub velocity_error_ms: f64,

    /// Navigator's distance to its target, negative if not navigating.
    pub distance_to_target_m: f64,

    pub tilt_limited: bool,
    pub navigating: bool,
}

pub struct Simulation {
    params: SimParams,
    navigator: Navigator,

    /// Logic clock.
    ///
    /// Units: seconds
    time_s: f64,

    /// Units: seconds
    physics_time_s: f64,

    /// Time not yet consumed by physics steps.
    ///
    /// Units: seconds
    accumulator_s: f64,

    manual: Option<ManualInput>,

    last_record: TelemetryRecord,
    arch_telemetry: Archiver,
}

// ------------------------------------------------------------------------------------------------
// ENUMS
// ------------------------------------------------------------------------------------------------

#[derive(Debug, thiserror::Error)]
pub enum SimError {
    #[error("Could not load parameters: {0}")]
    ParamLoadError(util::params::LoadError),

    #[error("Flight control error: {0}")]
    FltCtrlError(FltCtrlError),

    #[error("Navigation error: {0}")]
    NavError(NavError),

    #[error("Archive error: {0}")]
    ArchiveError(ArchiveError),

    #[error("Invalid physics step: {0} s")]
    InvalidPhysicsStep(f64),

    #[error("Invalid logic step: {0} s")]
    InvalidLogicStep(f64),
}

// ------------------------------------------------------------------------------------------------
// IMPLS
// ------------------------------------------------------------------------------------------------

impl DistanceSource for FlatTerrain {
    fn distance_to_ground(&self, position: &LocalPosition) -> Option<f64> {
        Some((position.up_m - self.ground_level_m).max(0.0))
    }
}

impl Simulation {
    /// Place the navigator's vehicle at the start position on flat terrain.
    pub fn new(params: SimParams, mut navigator: Navigator) -> Result<Self, SimError> {
        if !(params.physics_step_s > 0.0 && params.physics_step_s.is_finite()) {
            return Err(SimError::InvalidPhysicsStep(params.physics_step_s));
        }
        if !(params.logic_step_s > 0.0 && params.logic_step_s.is_finite()) {
            return Err(SimError::InvalidLogicStep(params.logic_step_s));
        }

        let vehicle = navigator.vehicle_mut();
        vehicle.set_ground_level(params.ground_level_m);
        vehicle.set_position(params.start_position);
        vehicle.set_distance_source(Box::new(FlatTerrain {
            ground_level_m: params.ground_level_m,
        }));

        if params.auto_arm {
            vehicle.arm();
        }

        Ok(Self {
            params,
            navigator,
            time_s: 0.0,
            physics_time_s: 0.0,
            accumulator_s: 0.0,
            manual: None,
            last_record: TelemetryRecord::default(),
            arch_telemetry: Archiver::default(),
        })
    }

    /// Start archiving telemetry into the session.
    pub fn init_archive(&mut self, session: &Session) -> Result<(), SimError> {
        if self.params.archive_telemetry {
            self.arch_telemetry = Archiver::from_path(session, "sim/telemetry.csv")
                .map_err(SimError::ArchiveError)?;
        }
        Ok(())
    }

    /// Advance the logic clock by `dt_s` and run navigation and flight control.
    ///
    /// A non-positive or non-finite step does not advance the clock. The controllers hold their
    /// previous output in that case.
    pub fn tick_logic(&mut self, dt_s: f64) -> Result<TelemetryRecord, SimError> {
        if dt_s > 0.0 && dt_s.is_finite() {
            self.time_s += dt_s;
        } else {
            trace!("Logic tick with invalid dt {}", dt_s);
        }

        self.navigator.tick();

        let input = InputData {
            now_s: self.time_s,
            manual: self.manual,
        };
        let (cmd, report) = self
            .navigator
            .vehicle_mut()
            .proc(&input)
            .map_err(SimError::FltCtrlError)?;

        let vehicle = self.navigator.vehicle();
        let position = vehicle.position();
        let velocity = vehicle.get_velocity();

        self.last_record = TelemetryRecord {
            time_s: self.time_s,
            east_m: position.east_m,
            up_m: position.up_m,
            north_m: position.north_m,
            vel_east_ms: velocity[0],
            vel_up_ms: velocity[1],
            vel_north_ms: velocity[2],
            thrust_n: cmd.thrust_n,
            lateral_accel_east_mss: cmd.lateral_accel_east_mss,
            lateral_accel_north_mss: cmd.lateral_accel_north_mss,
            altitude_error_m: report.altitude_error_m,
            velocity_error_ms: report.velocity_error_ms,
            distance_to_target_m: self.navigator.distance_to_target().unwrap_or(-1.0),
            tilt_limited: report.tilt_limited,
            navigating: self.navigator.is_navigating(),
        };

        Ok(self.last_record)
    }

    /// Run one fixed physics step.
    pub fn tick_physics(&mut self, fixed_dt_s: f64) {
        self.navigator.vehicle_mut().tick_physics(fixed_dt_s);
        if fixed_dt_s > 0.0 {
            self.physics_time_s += fixed_dt_s;
        }
    }

    /// Advance the simulation by one logic step, running the physics steps that fit into the
    /// elapsed time first.
    ///
    /// At most [`MAX_PHYSICS_STEPS_PER_CALL`] physics steps are run, any remaining time is
    /// discarded so the physics clock falls behind the logic clock.
    pub fn step(&mut self, logic_dt_s: f64) -> Result<TelemetryRecord, SimError> {
        if logic_dt_s > 0.0 && logic_dt_s.is_finite() {
            self.accumulator_s += logic_dt_s;
        }

        let physics_step_s = self.params.physics_step_s;
        let mut num_steps = 0;
        while self.accumulator_s + ACCUMULATOR_EPSILON_S >= physics_step_s {
            if num_steps >= MAX_PHYSICS_STEPS_PER_CALL {
                warn!(
                    "Physics fell behind by {:.3} s, dropping the remaining time",
                    self.accumulator_s
                );
                self.accumulator_s = 0.0;
                break;
            }

            self.tick_physics(physics_step_s);
            self.accumulator_s -= physics_step_s;
            num_steps += 1;
        }

        self.tick_logic(logic_dt_s)
    }

    /// True once navigation has finished and no waypoints remain.
    pub fn is_mission_complete(&self) -> bool {
        !self.navigator.is_navigating() && !self.navigator.queue().has_waypoints()
    }

    /// Step until the mission is complete or the maximum duration passes, calling `on_step` with
    /// the telemetry from each step.
    ///
    /// Returns true if the mission completed.
    pub fn run<F>(&mut self, mut on_step: F) -> Result<bool, SimError>
    where
        F: FnMut(&TelemetryRecord),
    {
        let logic_step_s = self.params.logic_step_s;

        while self.time_s < self.params.max_duration_s {
            let record = self.step(logic_step_s)?;
            self.write().map_err(SimError::ArchiveError)?;
            on_step(&record);

            if self.is_mission_complete() {
                return Ok(true);
            }
        }

        Ok(false)
    }

    pub fn set_manual_input(&mut self, manual: Option<ManualInput>) {
        self.manual = manual;
    }

    pub fn time_s(&self) -> f64 {
        self.time_s
    }

    pub fn physics_time_s(&self) -> f64 {
        self.physics_time_s
    }

    pub fn last_record(&self) -> &TelemetryRecord {
        &self.last_record
    }

    pub fn navigator(&self) -> &Navigator {
        &self.navigator
    }

    pub fn navigator_mut(&mut self) -> &mut Navigator {
        &mut self.navigator
    }

    pub fn params(&self) -> &SimParams {
        &self.params
    }
}

impl Archived for Simulation {
    fn write(&mut self) -> Result<(), ArchiveError> {
        self.arch_telemetry.serialise(self.last_record)?;
        self.navigator.vehicle_mut().write()
    }
}

// ------------------------------------------------------------------------------------------------
// TESTS
// ------------------------------------------------------------------------------------------------
