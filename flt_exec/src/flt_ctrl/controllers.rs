//! # Flight controllers module
//!
//! This module provides the PID controllers used by flight control: a generic
//! [`PidController`] and the altitude and speed loops built on top of it.

// ---------------------------------------------------------------------------
// IMPORTS
// ---------------------------------------------------------------------------

// External
use log::{debug, trace};
use serde::{Deserialize, Serialize};

// Internal
use super::FlightProfile;
use crate::geo::LocalPosition;

// ---------------------------------------------------------------------------
// CONSTANTS
// ---------------------------------------------------------------------------

/// Added to the integral gain when computing the integral limit, so that a
/// zero integral gain does not produce an infinite limit.
pub const INTEGRAL_LIMIT_EPSILON: f64 = 0.001;

// ---------------------------------------------------------------------------
// TRAITS
// ---------------------------------------------------------------------------

/// A source of distance-to-ground measurements, such as a downward facing
/// rangefinder.
pub trait DistanceSource {
    /// Distance from the given position to the ground directly below, or
    /// `None` if there is no valid measurement.
    ///
    /// Units: meters
    fn distance_to_ground(&self, position: &LocalPosition) -> Option<f64>;
}

// ---------------------------------------------------------------------------
// DATA STRUCTURES
// ---------------------------------------------------------------------------

/// Proportional, integral and derivative gains.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PidGains {
    pub k_p: f64,
    pub k_i: f64,
    pub k_d: f64,
}

/// Mutable state of a PID controller.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct PidState {
    /// Error passed in on the previous call
    pub prev_error: f64,

    /// The integral accumulation, bounded by the controller's integral limit
    pub integral: f64,

    /// Time of the previous call
    ///
    /// Units: seconds
    pub last_time_s: f64,

    /// False until the first call after construction or reset
    pub initialised: bool,

    /// Output of the previous call, held when time does not advance
    pub last_output: f64,
}

/// A PID controller with integral anti-windup and output clamping.
///
/// The output is `baseline + P + I + D` clamped to `[lower_limit,
/// upper_limit]`. The baseline is a constant feed-forward term.
#[derive(Debug, Clone, Serialize)]
pub struct PidController {
    gains: PidGains,

    /// Constant feed-forward added to the output
    baseline: f64,

    lower_limit: f64,
    upper_limit: f64,

    state: PidState,
}

/// Vertical thrust controller.
///
/// The baseline is the hover thrust so the PID only has to provide the
/// correction, and the output is limited to `[0, max_vertical_thrust_n]`.
pub struct AltitudeController {
    pid: PidController,

    terrain_relative: bool,
    max_sensing_range_m: f64,

    /// Optional terrain distance source used in terrain-relative mode.
    distance_source: Option<Box<dyn DistanceSource>>,
}

/// Forward thrust controller, output limited to `±max_forward_thrust_n`.
#[derive(Debug, Clone, Serialize)]
pub struct SpeedController {
    pid: PidController,
}

/// The pair of flight controllers built from a flight profile.
pub struct FlightControllers {
    pub altitude: AltitudeController,
    pub speed: SpeedController,
}

// ---------------------------------------------------------------------------
// IMPLEMENTATIONS
// ---------------------------------------------------------------------------

impl PidController {
    /// Create a new controller with the given gains, feed-forward baseline
    /// and output limits.
    pub fn new(gains: PidGains, baseline: f64, lower_limit: f64, upper_limit: f64) -> Self {
        let mut ctrl = Self {
            gains,
            baseline,
            lower_limit,
            upper_limit,
            state: PidState::default(),
        };
        ctrl.reset();
        ctrl
    }

    /// The output produced on the first call after construction or reset.
    pub fn neutral_output(&self) -> f64 {
        self.baseline.max(self.lower_limit).min(self.upper_limit)
    }

    /// Bound on the magnitude of the integral accumulation.
    pub fn integral_limit(&self) -> f64 {
        let output_limit = self.upper_limit.abs().max(self.lower_limit.abs());
        output_limit / (self.gains.k_i + INTEGRAL_LIMIT_EPSILON)
    }

    /// Get the output of the controller for the given setpoint and
    /// measurement at time `now_s`.
    ///
    /// The first call after construction or reset only records the time and
    /// error and returns the neutral output. Calls where time has not advanced
    /// return the previous output unchanged.
    pub fn compute(&mut self, setpoint: f64, measurement: f64, now_s: f64) -> f64 {
        let error = setpoint - measurement;

        if !self.state.initialised {
            self.state.initialised = true;
            self.state.prev_error = error;
            self.state.last_time_s = now_s;
            self.state.last_output = self.neutral_output();
            return self.state.last_output;
        }

        let dt = now_s - self.state.last_time_s;
        if dt <= 0.0 || !dt.is_finite() {
            trace!("Non-positive dt ({}), holding output", dt);
            return self.state.last_output;
        }

        let int_limit = self.integral_limit();
        self.state.integral = (self.state.integral + error * dt).max(-int_limit).min(int_limit);

        let p = self.gains.k_p * error;
        let i = self.gains.k_i * self.state.integral;
        let d = self.gains.k_d * (error - self.state.prev_error) / dt;

        let output = (self.baseline + p + i + d)
            .max(self.lower_limit)
            .min(self.upper_limit);

        self.state.prev_error = error;
        self.state.last_time_s = now_s;
        self.state.last_output = output;

        output
    }

    /// Clear the error history and integral.
    pub fn reset(&mut self) {
        self.state = PidState {
            last_output: self.neutral_output(),
            ..PidState::default()
        };
    }

    /// Error between the setpoint and measurement, without updating state.
    pub fn get_current_error(&self, setpoint: f64, measurement: f64) -> f64 {
        setpoint - measurement
    }

    pub fn state(&self) -> &PidState {
        &self.state
    }

    pub fn gains(&self) -> PidGains {
        self.gains
    }
}

impl AltitudeController {
    pub fn new(profile: &FlightProfile) -> Self {
        Self {
            pid: PidController::new(
                PidGains {
                    k_p: profile.alt_k_p,
                    k_i: profile.alt_k_i,
                    k_d: profile.alt_k_d,
                },
                profile.hover_thrust_n(),
                0.0,
                profile.max_vertical_thrust_n,
            ),
            terrain_relative: profile.terrain_relative,
            max_sensing_range_m: profile.max_sensing_range_m,
            distance_source: None,
        }
    }

    /// Set the terrain distance source, replacing any previous one.
    pub fn set_distance_source(&mut self, source: Box<dyn DistanceSource>) {
        self.distance_source = Some(source);
    }

    /// Remove and return the terrain distance source.
    pub fn take_distance_source(&mut self) -> Option<Box<dyn DistanceSource>> {
        self.distance_source.take()
    }

    /// Altitude used by the controller at the given position.
    ///
    /// In terrain-relative mode a valid, in-range ground distance replaces the
    /// absolute altitude, otherwise the absolute altitude is used.
    pub fn measured_altitude(&self, position: &LocalPosition) -> f64 {
        self.terrain_distance(position).unwrap_or(position.up_m)
    }

    /// True if the last measurement would come from the terrain source.
    pub fn is_terrain_relative_active(&self, position: &LocalPosition) -> bool {
        self.terrain_distance(position).is_some()
    }

    /// Compute the total vertical thrust for the altitude setpoint.
    ///
    /// Units: newtons
    pub fn compute(&mut self, setpoint_m: f64, position: &LocalPosition, now_s: f64) -> f64 {
        let measured_m = self.measured_altitude(position);
        self.pid.compute(setpoint_m, measured_m, now_s)
    }

    pub fn reset(&mut self) {
        self.pid.reset();
    }

    pub fn get_current_error(&self, setpoint_m: f64, position: &LocalPosition) -> f64 {
        self.pid
            .get_current_error(setpoint_m, self.measured_altitude(position))
    }

    pub fn pid(&self) -> &PidController {
        &self.pid
    }

    fn terrain_distance(&self, position: &LocalPosition) -> Option<f64> {
        if !self.terrain_relative {
            return None;
        }

        self.distance_source
            .as_ref()
            .and_then(|s| s.distance_to_ground(position))
            .filter(|d| d.is_finite() && *d >= 0.0 && *d <= self.max_sensing_range_m)
    }
}

impl SpeedController {
    pub fn new(profile: &FlightProfile) -> Self {
        Self {
            pid: PidController::new(
                PidGains {
                    k_p: profile.speed_k_p,
                    k_i: profile.speed_k_i,
                    k_d: profile.speed_k_d,
                },
                0.0,
                -profile.max_forward_thrust_n,
                profile.max_forward_thrust_n,
            ),
        }
    }

    /// Compute the forward thrust to reach the desired speed.
    ///
    /// Units: newtons
    pub fn compute(&mut self, desired_speed_ms: f64, speed_ms: f64, now_s: f64) -> f64 {
        self.pid.compute(desired_speed_ms, speed_ms, now_s)
    }

    pub fn reset(&mut self) {
        self.pid.reset();
    }

    pub fn get_current_error(&self, desired_speed_ms: f64, speed_ms: f64) -> f64 {
        self.pid.get_current_error(desired_speed_ms, speed_ms)
    }

    pub fn pid(&self) -> &PidController {
        &self.pid
    }
}

impl FlightControllers {
    /// Create a new instance of the controllers from the profile.
    pub fn new(profile: &FlightProfile) -> Self {
        Self {
            altitude: AltitudeController::new(profile),
            speed: SpeedController::new(profile),
        }
    }

    /// Reset both controllers, clearing any integral carried over from a
    /// previous flight segment.
    pub fn reset(&mut self) {
        debug!("Resetting flight controllers");
        self.altitude.reset();
        self.speed.reset();
    }
}

// ---------------------------------------------------------------------------
// TESTS
// ---------------------------------------------------------------------------

#[cfg(test)]
mod test {
    use super::*;
    use crate::flt_ctrl::GRAVITY_MSS;

    const DT: f64 = 0.02;

    struct FixedRange(Option<f64>);

    impl DistanceSource for FixedRange {
        fn distance_to_ground(&self, _position: &LocalPosition) -> Option<f64> {
            self.0
        }
    }

    fn hover_n(profile: &FlightProfile) -> f64 {
        profile.mass_kg * GRAVITY_MSS
    }

    #[test]
    fn test_first_call_is_neutral() {
        let profile = FlightProfile::default();
        let mut alt = AltitudeController::new(&profile);
        let mut speed = SpeedController::new(&profile);

        let out = alt.compute(50.0, &LocalPosition::default(), 3.0);
        assert_eq!(out, hover_n(&profile));
        assert_eq!(alt.pid().state().integral, 0.0);
        assert!(alt.pid().state().initialised);

        assert_eq!(speed.compute(10.0, 0.0, 3.0), 0.0);
    }

    #[test]
    fn test_non_positive_dt_holds_output() {
        let mut pid = PidController::new(
            PidGains {
                k_p: 2.0,
                k_i: 0.5,
                k_d: 0.0,
            },
            0.0,
            -100.0,
            100.0,
        );

        pid.compute(1.0, 0.0, 0.0);
        let out = pid.compute(1.0, 0.0, 1.0);
        let state = *pid.state();

        // Duplicate and backwards ticks
        assert_eq!(pid.compute(5.0, 0.0, 1.0), out);
        assert_eq!(pid.compute(5.0, 0.0, 0.5), out);
        assert_eq!(*pid.state(), state);
    }

    #[test]
    fn test_pid_terms() {
        let mut pid = PidController::new(
            PidGains {
                k_p: 1.0,
                k_i: 0.5,
                k_d: 0.25,
            },
            2.0,
            -100.0,
            100.0,
        );

        pid.compute(1.0, 0.0, 0.0);
        // error 3, dt 0.5: P = 3, integral = 1.5 so I = 0.75, D = 0.25 * 2 / 0.5 = 1.0
        let out = pid.compute(3.0, 0.0, 0.5);
        assert!((out - (2.0 + 3.0 + 0.75 + 1.0)).abs() < 1e-12);
    }

    #[test]
    fn test_output_limits() {
        let profile = FlightProfile::default();
        let mut alt = AltitudeController::new(&profile);
        let mut speed = SpeedController::new(&profile);

        let high = LocalPosition::new(0.0, 1000.0, 0.0);
        alt.compute(0.0, &high, 0.0);
        assert_eq!(alt.compute(0.0, &high, DT), 0.0);

        alt.reset();
        alt.compute(1000.0, &LocalPosition::default(), 0.0);
        assert_eq!(
            alt.compute(1000.0, &LocalPosition::default(), DT),
            profile.max_vertical_thrust_n
        );

        speed.compute(-500.0, 0.0, 0.0);
        assert_eq!(
            speed.compute(-500.0, 0.0, DT),
            -profile.max_forward_thrust_n
        );
    }

    #[test]
    fn test_reset_reproduces_first_output() {
        let profile = FlightProfile::default();
        let mut alt = AltitudeController::new(&profile);
        let pos = LocalPosition::default();

        let first = alt.compute(20.0, &pos, 0.0);
        for i in 1..500 {
            alt.compute(20.0, &pos, i as f64 * DT);
        }
        assert!(alt.pid().state().integral > 0.0);

        alt.reset();
        assert_eq!(alt.compute(20.0, &pos, 100.0), first);
        assert_eq!(alt.pid().state().integral, 0.0);
        assert_eq!(alt.pid().state().prev_error, 20.0);
    }

    #[test]
    fn test_anti_windup() {
        let profile = FlightProfile::default();
        let mut alt = AltitudeController::new(&profile);
        let limit = profile.max_vertical_thrust_n / (profile.alt_k_i + INTEGRAL_LIMIT_EPSILON);
        let ground = LocalPosition::default();

        for i in 0..100_000 {
            alt.compute(1000.0, &ground, i as f64 * DT);
            assert!(alt.pid().state().integral.abs() <= limit + 1e-9);
        }
        assert!((alt.pid().state().integral - limit).abs() < 1e-9);

        // Same bound in the other direction
        let high = LocalPosition::new(0.0, 2000.0, 0.0);
        for i in 100_000..200_000 {
            alt.compute(0.0, &high, i as f64 * DT);
            assert!(alt.pid().state().integral.abs() <= limit + 1e-9);
        }
    }

    #[test]
    fn test_zero_integral_gain_limit_is_finite() {
        let pid = PidController::new(
            PidGains {
                k_p: 1.0,
                k_i: 0.0,
                k_d: 0.0,
            },
            0.0,
            -10.0,
            10.0,
        );
        assert!((pid.integral_limit() - 10_000.0).abs() < 1e-6);
    }

    /// Altitude loop against a first order plant, where climb rate is
    /// proportional to the thrust surplus over hover.
    #[test]
    fn test_altitude_convergence() {
        const SETPOINT_M: f64 = 20.0;
        const PLANT_DAMPING_NSM: f64 = 2.0;
        const SETTLE_TIME_S: f64 = 60.0;

        let profile = FlightProfile::default();
        let hover = hover_n(&profile);
        let mut alt = AltitudeController::new(&profile);

        let mut pos = LocalPosition::default();
        let mut sum_sq = 0.0;
        let mut num = 0;

        for i in 1..=(120.0 / DT) as usize {
            let t = i as f64 * DT;
            let thrust = alt.compute(SETPOINT_M, &pos, t);
            pos.up_m = (pos.up_m + (thrust - hover) / PLANT_DAMPING_NSM * DT).max(0.0);

            if t >= SETTLE_TIME_S {
                sum_sq += (SETPOINT_M - pos.up_m).powi(2);
                num += 1;
            }
        }

        let rms = (sum_sq / num as f64).sqrt();
        assert!(rms < 0.5, "RMS altitude error {} too large", rms);
    }

    #[test]
    fn test_terrain_relative_substitution() {
        let profile = FlightProfile {
            terrain_relative: true,
            max_sensing_range_m: 40.0,
            ..Default::default()
        };
        let pos = LocalPosition::new(0.0, 100.0, 0.0);

        let mut alt = AltitudeController::new(&profile);
        // No source, absolute altitude
        assert_eq!(alt.measured_altitude(&pos), 100.0);

        alt.set_distance_source(Box::new(FixedRange(Some(12.0))));
        assert_eq!(alt.measured_altitude(&pos), 12.0);
        assert!(alt.is_terrain_relative_active(&pos));
        assert_eq!(alt.get_current_error(20.0, &pos), 8.0);

        // Out of range and invalid readings fall back
        alt.set_distance_source(Box::new(FixedRange(Some(55.0))));
        assert_eq!(alt.measured_altitude(&pos), 100.0);
        alt.set_distance_source(Box::new(FixedRange(None)));
        assert_eq!(alt.measured_altitude(&pos), 100.0);

        // Disabled mode ignores the source
        let mut abs = AltitudeController::new(&FlightProfile::default());
        abs.set_distance_source(Box::new(FixedRange(Some(12.0))));
        assert_eq!(abs.measured_altitude(&pos), 100.0);
    }

    #[test]
    fn test_current_error_is_pure() {
        let profile = FlightProfile::default();
        let mut speed = SpeedController::new(&profile);
        speed.compute(5.0, 0.0, 0.0);
        let state = *speed.pid().state();

        assert_eq!(speed.get_current_error(5.0, 2.0), 3.0);
        assert_eq!(*speed.pid().state(), state);
    }
}
