//! Flight control parameters

// ---------------------------------------------------------------------------
// IMPORTS
// ---------------------------------------------------------------------------

// External
use log::warn;
use serde::{Deserialize, Serialize};

// Internal
use super::ControlMode;

// ---------------------------------------------------------------------------
// DATA STRUCTURES
// ---------------------------------------------------------------------------

/// Tuning parameters for flight control.
///
/// These are loaded once and are not modified by the controller. Runtime
/// commands such as the current altitude target live in [`Setpoints`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FlightProfile {
    /// Whether the controller flies to targets or follows manual inputs.
    pub control_mode: ControlMode,

    // ---- PHYSICAL ----
    /// Mass of the vehicle.
    ///
    /// Units: kilograms
    pub mass_kg: f64,

    /// Linear drag coefficient applied to all velocity components.
    ///
    /// Units: 1/seconds
    pub drag_coeff: f64,

    // ---- LIMITS ----
    /// Maximum pitch or roll before the stabiliser levels the vehicle.
    ///
    /// Units: degrees
    pub max_tilt_deg: f64,

    /// Maximum total vertical thrust.
    ///
    /// Units: newtons
    pub max_vertical_thrust_n: f64,

    /// Maximum forward thrust the speed controller may demand.
    ///
    /// Units: newtons
    pub max_forward_thrust_n: f64,

    /// Maximum magnitude of the commanded lateral acceleration.
    ///
    /// Units: meters/second^2
    pub lateral_accel_limit_mss: f64,

    // ---- DEFAULT SETPOINTS ----
    /// Altitude to hold when no other target has been given.
    ///
    /// Units: meters
    pub target_altitude_m: f64,

    /// Cruise speed towards a target.
    ///
    /// Units: meters/second
    pub target_speed_ms: f64,

    // ---- ALTITUDE CONTROLLER ----
    /// Altitude controller proportional gain
    pub alt_k_p: f64,

    /// Altitude controller integral gain
    pub alt_k_i: f64,

    /// Altitude controller derivative gain
    pub alt_k_d: f64,

    /// Measure altitude as height above the terrain when a distance source is
    /// available and in range.
    pub terrain_relative: bool,

    /// Maximum range of the terrain distance source.
    ///
    /// Units: meters
    pub max_sensing_range_m: f64,

    /// Additional thrust applied on the tick the altitude target changes, in
    /// the direction of the change.
    ///
    /// Units: newtons
    pub climb_bias_n: f64,

    // ---- SPEED CONTROLLER ----
    /// Speed controller proportional gain
    pub speed_k_p: f64,

    /// Speed controller integral gain
    pub speed_k_i: f64,

    /// Speed controller derivative gain
    pub speed_k_d: f64,

    /// Gain on the cross-track velocity, which is damped out so the vehicle
    /// doesn't orbit its target.
    ///
    /// Units: 1/seconds
    pub cross_track_damping: f64,

    /// Desired approach speed per meter of remaining distance, used to slow
    /// down near the target.
    ///
    /// Units: 1/seconds
    pub approach_gain: f64,

    /// Horizontal distance inside which no lateral command is issued.
    ///
    /// Units: meters
    pub dead_zone_m: f64,

    // ---- ATTITUDE ----
    /// Rate at which the attitude follows the tilt implied by the lateral
    /// acceleration.
    ///
    /// Units: 1/seconds
    pub attitude_rate: f64,

    /// Rate at which the stabiliser levels the vehicle once the tilt limit is
    /// exceeded.
    ///
    /// Units: 1/seconds
    pub tilt_recovery_rate: f64,
}

/// Runtime commands for the controller, owned by the controller itself.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Setpoints {
    /// Altitude to hold.
    ///
    /// Units: meters
    pub target_altitude_m: f64,

    /// Cruise speed towards the current target.
    ///
    /// Units: meters/second
    pub target_speed_ms: f64,
}

// ---------------------------------------------------------------------------
// IMPLEMENTATIONS
// ---------------------------------------------------------------------------

impl Default for FlightProfile {
    fn default() -> Self {
        Self {
            control_mode: ControlMode::AutoNav,
            mass_kg: 1.5,
            drag_coeff: 0.5,
            max_tilt_deg: 30.0,
            max_vertical_thrust_n: 30.0,
            max_forward_thrust_n: 20.0,
            lateral_accel_limit_mss: 10.0,
            target_altitude_m: 50.0,
            target_speed_ms: 10.0,
            alt_k_p: 1.0,
            alt_k_i: 0.1,
            alt_k_d: 0.5,
            terrain_relative: false,
            max_sensing_range_m: 100.0,
            climb_bias_n: 1.0,
            speed_k_p: 1.0,
            speed_k_i: 0.1,
            speed_k_d: 0.5,
            cross_track_damping: 2.0,
            approach_gain: 1.0,
            dead_zone_m: 0.5,
            attitude_rate: 5.0,
            tilt_recovery_rate: 2.0,
        }
    }
}

impl FlightProfile {
    /// Clamp any out of range values into range, warning about each one.
    ///
    /// Non-finite values are replaced by the default value of that field.
    pub fn sanitise(mut self) -> Self {
        let defaults = FlightProfile::default();

        let fix = |name: &str, value: &mut f64, default: f64, min: f64, max: f64| {
            if !value.is_finite() || *value < min || *value > max {
                let fixed = if value.is_finite() {
                    (*value).clamp(min, max)
                } else {
                    default
                };
                warn!(
                    "Flight profile {} = {} out of range [{}, {}], using {}",
                    name, value, min, max, fixed
                );
                *value = fixed;
            }
        };

        fix("mass_kg", &mut self.mass_kg, defaults.mass_kg, 0.01, std::f64::MAX);
        fix("drag_coeff", &mut self.drag_coeff, defaults.drag_coeff, 0.0, std::f64::MAX);
        fix("max_tilt_deg", &mut self.max_tilt_deg, defaults.max_tilt_deg, 1.0, 90.0);
        fix("max_vertical_thrust_n", &mut self.max_vertical_thrust_n, defaults.max_vertical_thrust_n, 0.0, std::f64::MAX);
        fix("max_forward_thrust_n", &mut self.max_forward_thrust_n, defaults.max_forward_thrust_n, 0.0, std::f64::MAX);
        fix("lateral_accel_limit_mss", &mut self.lateral_accel_limit_mss, defaults.lateral_accel_limit_mss, 0.0, std::f64::MAX);
        fix("target_speed_ms", &mut self.target_speed_ms, defaults.target_speed_ms, 0.0, std::f64::MAX);
        fix("target_altitude_m", &mut self.target_altitude_m, defaults.target_altitude_m, std::f64::MIN, std::f64::MAX);
        fix("alt_k_p", &mut self.alt_k_p, defaults.alt_k_p, 0.0, std::f64::MAX);
        fix("alt_k_i", &mut self.alt_k_i, defaults.alt_k_i, 0.0, std::f64::MAX);
        fix("alt_k_d", &mut self.alt_k_d, defaults.alt_k_d, 0.0, std::f64::MAX);
        fix("max_sensing_range_m", &mut self.max_sensing_range_m, defaults.max_sensing_range_m, 0.0, std::f64::MAX);
        fix("climb_bias_n", &mut self.climb_bias_n, defaults.climb_bias_n, 0.0, std::f64::MAX);
        fix("speed_k_p", &mut self.speed_k_p, defaults.speed_k_p, 0.0, std::f64::MAX);
        fix("speed_k_i", &mut self.speed_k_i, defaults.speed_k_i, 0.0, std::f64::MAX);
        fix("speed_k_d", &mut self.speed_k_d, defaults.speed_k_d, 0.0, std::f64::MAX);
        fix("cross_track_damping", &mut self.cross_track_damping, defaults.cross_track_damping, 0.0, std::f64::MAX);
        fix("approach_gain", &mut self.approach_gain, defaults.approach_gain, 0.0, std::f64::MAX);
        fix("dead_zone_m", &mut self.dead_zone_m, defaults.dead_zone_m, 0.0, std::f64::MAX);
        fix("attitude_rate", &mut self.attitude_rate, defaults.attitude_rate, 0.0, std::f64::MAX);
        fix("tilt_recovery_rate", &mut self.tilt_recovery_rate, defaults.tilt_recovery_rate, 0.0, std::f64::MAX);

        self
    }

    /// Thrust needed to exactly counteract gravity.
    ///
    /// Units: newtons
    pub fn hover_thrust_n(&self) -> f64 {
        self.mass_kg * super::GRAVITY_MSS
    }
}

impl Setpoints {
    /// Initial setpoints taken from the profile's defaults.
    pub fn from_profile(profile: &FlightProfile) -> Self {
        Self {
            target_altitude_m: profile.target_altitude_m,
            target_speed_ms: profile.target_speed_ms,
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_partial_profile_loads_with_defaults() -> Result<(), util::params::LoadError> {
        let profile: FlightProfile = util::params::from_str(
            "mass_kg = 2.0\ncontrol_mode = \"Manual\"\nalt_k_p = 2.5\n",
        )?;

        assert_eq!(profile.mass_kg, 2.0);
        assert_eq!(profile.control_mode, ControlMode::Manual);
        assert_eq!(profile.alt_k_p, 2.5);
        assert_eq!(profile.alt_k_i, 0.1);
        assert_eq!(profile.speed_k_d, 0.5);

        Ok(())
    }

    #[test]
    fn test_sanitise() {
        let profile = FlightProfile {
            mass_kg: -1.0,
            max_tilt_deg: 120.0,
            alt_k_i: std::f64::NAN,
            ..Default::default()
        }
        .sanitise();

        assert_eq!(profile.mass_kg, 0.01);
        assert_eq!(profile.max_tilt_deg, 90.0);
        assert_eq!(profile.alt_k_i, 0.1);
        assert_eq!(profile.alt_k_p, 1.0);

        // Non-finite values fall back to the field's default rather than the range minimum
        let profile = FlightProfile {
            target_altitude_m: std::f64::NAN,
            mass_kg: std::f64::INFINITY,
            max_tilt_deg: std::f64::NEG_INFINITY,
            target_speed_ms: -5.0,
            ..Default::default()
        }
        .sanitise();

        assert_eq!(profile.target_altitude_m, 50.0);
        assert_eq!(profile.mass_kg, 1.5);
        assert_eq!(profile.max_tilt_deg, 30.0);
        assert_eq!(profile.target_speed_ms, 0.0);
    }
}
