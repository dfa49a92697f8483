//! Implementations for the VehicleController state structure

// ---------------------------------------------------------------------------
// IMPORTS
// ---------------------------------------------------------------------------

// External
use log::{debug, error, info, trace, warn};
use nalgebra::{Unit, UnitQuaternion, Vector2, Vector3};
use serde::Serialize;
use std::sync::mpsc::Receiver;

// Internal
use super::{
    ControlMode, DistanceSource, FlightControllers, FlightProfile, FltCtrlError, Setpoints,
    GRAVITY_MSS,
};
use crate::events::{EventBus, VehicleEvent};
use crate::geo::LocalPosition;
use util::{
    archive::{ArchiveError, Archived, Archiver},
    maths::{clamp_magnitude, lin_map},
    module::State,
    params,
    session::Session,
};

// ---------------------------------------------------------------------------
// CONSTANTS
// ---------------------------------------------------------------------------

/// Proportional altitude gain used when no profile is configured.
///
/// Units: newtons/meter
const FALLBACK_ALT_K_P: f64 = 2.0;

/// Lateral acceleration per meter of distance used when no profile is
/// configured.
///
/// Units: 1/seconds^2
const FALLBACK_LATERAL_GAIN: f64 = 2.0;

/// Smallest vector norm treated as a valid rotation axis.
const MIN_AXIS_NORM: f64 = 1e-9;

// ---------------------------------------------------------------------------
// DATA STRUCTURES
// ---------------------------------------------------------------------------

/// Physical and command state of the vehicle.
///
/// Vectors are expressed in the local frame with components (east, up,
/// north).
#[derive(Debug, Clone, Copy, Serialize)]
pub struct VehicleState {
    pub armed: bool,
    pub in_flight: bool,

    /// Units: meters
    pub position_m: Vector3<f64>,

    /// Units: meters/second
    pub velocity_ms: Vector3<f64>,

    /// Rotation from the body frame into the local frame.
    pub attitude_q: UnitQuaternion<f64>,

    /// Position the controller is flying towards in AutoNav mode.
    pub target_position: Option<LocalPosition>,

    /// Latest total vertical thrust command.
    ///
    /// Units: newtons
    pub thrust_cmd_n: f64,

    /// Latest lateral acceleration command with components (east, north).
    ///
    /// Units: meters/second^2
    pub lateral_accel_cmd_mss: Vector2<f64>,

    /// True if the tilt stabiliser was active on the last physics tick.
    pub tilt_limited: bool,
}

/// Operator inputs used in manual mode, each in [-1, 1].
#[derive(Debug, Clone, Copy, Default, Serialize)]
pub struct ManualInput {
    pub east: f64,
    pub north: f64,

    /// Zero holds hover thrust, +1 is full thrust and -1 is no thrust.
    pub vertical: f64,
}

/// Input data to a VehicleController logic tick.
#[derive(Debug, Clone, Copy, Default)]
pub struct InputData {
    /// Logic clock time.
    ///
    /// Units: seconds
    pub now_s: f64,

    /// Operator inputs, only used in manual mode.
    pub manual: Option<ManualInput>,
}

/// Command produced by a logic tick and applied by the physics tick.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct ControlCommand {
    /// Units: newtons
    pub thrust_n: f64,

    /// Units: meters/second^2
    pub lateral_accel_east_mss: f64,

    /// Units: meters/second^2
    pub lateral_accel_north_mss: f64,
}

/// Status report for VehicleController processing.
#[derive(Debug, Clone, Copy, Default, Serialize)]
pub struct StatusReport {
    pub time_s: f64,
    pub altitude_error_m: f64,
    pub velocity_error_ms: f64,

    /// Horizontal distance to the target, zero if there is no target.
    pub horizontal_distance_m: f64,

    pub in_dead_zone: bool,
    pub tilt_limited: bool,

    /// True if no profile is configured and the proportional laws are used.
    pub proportional_fallback: bool,

    /// True if the altitude came from the terrain distance source.
    pub terrain_relative: bool,
}

/// Flight control module state.
pub struct VehicleController {
    /// Tuning and physical parameters. If `controllers` is `None` these are
    /// the defaults and only the physical values are used.
    profile: FlightProfile,

    controllers: Option<FlightControllers>,

    /// Distance source held until a profile is configured.
    pending_distance_source: Option<Box<dyn DistanceSource>>,

    setpoints: Setpoints,

    /// Direction of a climb bias to apply on the next logic tick, or zero.
    climb_bias_sign: f64,

    /// Along-track speed demanded on the last logic tick.
    ///
    /// Units: meters/second
    speed_setpoint_ms: f64,

    state: VehicleState,

    /// Units: meters
    ground_level_m: f64,

    report: StatusReport,
    arch_report: Archiver,

    events: EventBus<VehicleEvent>,

    /// Set once the missing profile has been reported.
    fallback_reported: bool,
}

// ---------------------------------------------------------------------------
// IMPLEMENTATIONS
// ---------------------------------------------------------------------------

impl Default for VehicleState {
    fn default() -> Self {
        Self {
            armed: false,
            in_flight: false,
            position_m: Vector3::zeros(),
            velocity_ms: Vector3::zeros(),
            attitude_q: UnitQuaternion::identity(),
            target_position: None,
            thrust_cmd_n: 0.0,
            lateral_accel_cmd_mss: Vector2::zeros(),
            tilt_limited: false,
        }
    }
}

impl Default for VehicleController {
    /// An unconfigured controller, flying with the proportional fallback laws.
    fn default() -> Self {
        let profile = FlightProfile::default();
        let setpoints = Setpoints::from_profile(&profile);

        Self {
            profile,
            controllers: None,
            pending_distance_source: None,
            setpoints,
            climb_bias_sign: 0.0,
            speed_setpoint_ms: 0.0,
            state: VehicleState::default(),
            ground_level_m: 0.0,
            report: StatusReport::default(),
            arch_report: Archiver::default(),
            events: EventBus::new(),
            fallback_reported: false,
        }
    }
}

impl State for VehicleController {
    type InitData = &'static str;
    type InitError = FltCtrlError;

    type InputData = InputData;
    type OutputData = ControlCommand;
    type StatusReport = StatusReport;
    type ProcError = FltCtrlError;

    /// Initialise the VehicleController module.
    ///
    /// Expected init data is the path to the flight profile parameter file.
    fn init(&mut self, init_data: Self::InitData, session: &Session) -> Result<(), Self::InitError> {
        let profile: FlightProfile =
            params::load(init_data).map_err(FltCtrlError::ParamLoadError)?;
        self.set_profile(profile);

        self.arch_report = Archiver::from_path(session, "flt_ctrl/status_report.csv")
            .map_err(FltCtrlError::ArchiveError)?;

        Ok(())
    }

    /// Run one logic tick, computing the thrust and lateral acceleration
    /// commands for the next physics ticks.
    fn proc(
        &mut self,
        input_data: &Self::InputData,
    ) -> Result<(Self::OutputData, Self::StatusReport), Self::ProcError> {
        let now_s = input_data.now_s;
        if !now_s.is_finite() {
            return Err(FltCtrlError::InvalidTime(now_s));
        }

        self.report = StatusReport {
            time_s: now_s,
            proportional_fallback: self.controllers.is_none(),
            ..Default::default()
        };

        if self.controllers.is_none() && self.state.in_flight && !self.fallback_reported {
            error!("No flight profile configured, flying with proportional control only");
            self.fallback_reported = true;
        }

        let cmd = if !self.state.armed || !self.state.in_flight {
            self.speed_setpoint_ms = 0.0;
            ControlCommand::default()
        } else {
            match self.profile.control_mode {
                ControlMode::Manual => self.manual_cmd(input_data.manual),
                ControlMode::AutoNav => self.auto_nav_cmd(now_s),
            }
        };

        self.state.thrust_cmd_n = cmd.thrust_n;
        self.state.lateral_accel_cmd_mss =
            Vector2::new(cmd.lateral_accel_east_mss, cmd.lateral_accel_north_mss);

        let position = self.position();
        self.report.altitude_error_m = self.get_altitude_error();
        self.report.velocity_error_ms = self.get_velocity_error();
        self.report.tilt_limited = self.state.tilt_limited;
        self.report.terrain_relative = match self.controllers {
            Some(ref c) => c.altitude.is_terrain_relative_active(&position),
            None => false,
        };

        trace!(
            "FltCtrl cmd: thrust {:.3} N, lateral [{:.3}, {:.3}] m/s^2",
            cmd.thrust_n,
            cmd.lateral_accel_east_mss,
            cmd.lateral_accel_north_mss
        );

        Ok((cmd, self.report))
    }
}

impl Archived for VehicleController {
    fn write(&mut self) -> Result<(), ArchiveError> {
        self.arch_report.serialise(self.report)
    }
}

impl VehicleController {
    /// Create a controller configured with the given profile.
    pub fn with_profile(profile: FlightProfile) -> Self {
        let mut ctrl = Self::default();
        ctrl.set_profile(profile);
        ctrl
    }

    /// Replace the flight profile, rebuilding the controllers.
    ///
    /// The cruise speed is taken from the new profile. The altitude setpoint is
    /// only reset to the profile's default while on the ground, so that a
    /// retune in flight does not change the commanded altitude.
    pub fn set_profile(&mut self, profile: FlightProfile) {
        let profile = profile.sanitise();
        let mut controllers = FlightControllers::new(&profile);

        let source = match self.controllers.take() {
            Some(mut old) => old.altitude.take_distance_source(),
            None => self.pending_distance_source.take(),
        };
        if let Some(s) = source {
            controllers.altitude.set_distance_source(s);
        }

        self.setpoints.target_speed_ms = profile.target_speed_ms;
        if !self.state.in_flight {
            self.setpoints.target_altitude_m = profile.target_altitude_m;
        }

        info!(
            "Flight profile set: mass {} kg, altitude gains ({}, {}, {}), speed gains ({}, {}, {})",
            profile.mass_kg,
            profile.alt_k_p,
            profile.alt_k_i,
            profile.alt_k_d,
            profile.speed_k_p,
            profile.speed_k_i,
            profile.speed_k_d
        );

        self.profile = profile;
        self.controllers = Some(controllers);
    }

    /// Set the terrain distance source used in terrain-relative mode.
    pub fn set_distance_source(&mut self, source: Box<dyn DistanceSource>) {
        match self.controllers {
            Some(ref mut c) => c.altitude.set_distance_source(source),
            None => self.pending_distance_source = Some(source),
        }
    }

    /// Place the vehicle at the given position, at rest and level.
    pub fn set_position(&mut self, position: LocalPosition) {
        self.state.position_m = position.to_vector();
        self.state.velocity_ms = Vector3::zeros();
        self.state.attitude_q = UnitQuaternion::identity();
    }

    /// Set the height of the (flat) ground.
    pub fn set_ground_level(&mut self, ground_level_m: f64) {
        self.ground_level_m = ground_level_m;
    }

    /// Register an observer of arm and disarm events.
    pub fn subscribe(&mut self) -> Receiver<VehicleEvent> {
        self.events.subscribe()
    }

    // ---- COMMANDS ----

    pub fn arm(&mut self) {
        if !self.state.armed {
            self.state.armed = true;
            info!("Vehicle armed");
            self.events.emit(VehicleEvent::Armed);
        }
    }

    /// Disarm the vehicle, zeroing all commands and ending the flight.
    pub fn disarm(&mut self) {
        self.state.thrust_cmd_n = 0.0;
        self.state.lateral_accel_cmd_mss = Vector2::zeros();
        self.state.in_flight = false;
        self.speed_setpoint_ms = 0.0;

        if self.state.armed {
            self.state.armed = false;
            info!("Vehicle disarmed");
            self.events.emit(VehicleEvent::Disarmed);
        }
    }

    /// Begin a flight, climbing to the given altitude.
    ///
    /// Both controllers are reset so no integral is carried over from a
    /// previous flight segment.
    pub fn take_off(&mut self, target_altitude_m: f64) -> Result<(), FltCtrlError> {
        if !self.state.armed {
            warn!("Take off to {} m rejected, vehicle not armed", target_altitude_m);
            return Err(FltCtrlError::NotArmed);
        }
        if !target_altitude_m.is_finite() {
            return Err(FltCtrlError::InvalidTarget(
                self.position().with_up(target_altitude_m),
            ));
        }

        self.update_altitude_setpoint(target_altitude_m);
        self.state.in_flight = true;

        if let Some(ref mut c) = self.controllers {
            c.reset();
        }

        info!("Taking off to {:.1} m", target_altitude_m);

        Ok(())
    }

    /// Fly to the given position, holding its vertical component as the
    /// altitude setpoint.
    pub fn go_to(&mut self, target: LocalPosition) -> Result<(), FltCtrlError> {
        if !(target.east_m.is_finite() && target.up_m.is_finite() && target.north_m.is_finite()) {
            return Err(FltCtrlError::InvalidTarget(target));
        }

        self.state.target_position = Some(target);
        self.update_altitude_setpoint(target.up_m);

        debug!("GoTo {}", target);

        Ok(())
    }

    pub fn clear_target(&mut self) {
        if self.state.target_position.take().is_some() {
            debug!("Target cleared");
        }
    }

    // ---- TELEMETRY ----

    /// Difference between the altitude setpoint and the measured altitude.
    pub fn get_altitude_error(&self) -> f64 {
        let position = self.position();
        match self.controllers {
            Some(ref c) => c
                .altitude
                .get_current_error(self.setpoints.target_altitude_m, &position),
            None => self.setpoints.target_altitude_m - position.up_m,
        }
    }

    /// Difference between the demanded and current horizontal speed.
    pub fn get_velocity_error(&self) -> f64 {
        let speed_ms = self.horizontal_speed_ms();
        match self.controllers {
            Some(ref c) => c.speed.get_current_error(self.speed_setpoint_ms, speed_ms),
            None => self.speed_setpoint_ms - speed_ms,
        }
    }

    pub fn get_velocity(&self) -> Vector3<f64> {
        self.state.velocity_ms
    }

    pub fn is_armed(&self) -> bool {
        self.state.armed
    }

    pub fn in_flight(&self) -> bool {
        self.state.in_flight
    }

    pub fn has_target_position(&self) -> bool {
        self.state.target_position.is_some()
    }

    pub fn target_position(&self) -> Option<LocalPosition> {
        self.state.target_position
    }

    pub fn position(&self) -> LocalPosition {
        LocalPosition::from_vector(&self.state.position_m)
    }

    pub fn state(&self) -> &VehicleState {
        &self.state
    }

    pub fn setpoints(&self) -> Setpoints {
        self.setpoints
    }

    pub fn profile(&self) -> &FlightProfile {
        &self.profile
    }

    /// True if a flight profile has been configured.
    pub fn is_configured(&self) -> bool {
        self.controllers.is_some()
    }

    pub fn report(&self) -> StatusReport {
        self.report
    }

    pub fn horizontal_speed_ms(&self) -> f64 {
        Vector2::new(self.state.velocity_ms[0], self.state.velocity_ms[2]).norm()
    }

    /// Pitch and roll angles, from the forward and right body axes measured
    /// against the horizontal plane.
    ///
    /// Units: degrees
    pub fn tilt_deg(&self) -> (f64, f64) {
        let forward = self.state.attitude_q * Vector3::z();
        let right = self.state.attitude_q * Vector3::x();

        (elevation_deg(&forward), elevation_deg(&right))
    }

    // ---- PHYSICS ----

    /// Apply the latest commands over one fixed physics step.
    ///
    /// Integrates the vertical thrust, lateral acceleration, gravity and drag,
    /// resolves ground contact and runs the tilt stabiliser.
    pub fn tick_physics(&mut self, dt_s: f64) {
        if dt_s <= 0.0 || !dt_s.is_finite() {
            trace!("Skipping physics tick with dt {}", dt_s);
            return;
        }

        let (thrust_n, lateral_mss) = if self.state.armed {
            (self.state.thrust_cmd_n, self.state.lateral_accel_cmd_mss)
        } else {
            (0.0, Vector2::zeros())
        };

        let accel_mss = Vector3::new(
            lateral_mss[0],
            thrust_n / self.profile.mass_kg - GRAVITY_MSS,
            lateral_mss[1],
        ) - self.state.velocity_ms * self.profile.drag_coeff;

        self.state.velocity_ms += accel_mss * dt_s;
        self.state.position_m += self.state.velocity_ms * dt_s;

        // Ground contact
        if self.state.position_m[1] <= self.ground_level_m {
            self.state.position_m[1] = self.ground_level_m;
            if self.state.velocity_ms[1] < 0.0 {
                self.state.velocity_ms[1] = 0.0;
            }
            if !self.state.in_flight {
                self.state.velocity_ms[0] = 0.0;
                self.state.velocity_ms[2] = 0.0;
            }
        }

        self.update_attitude(dt_s, &lateral_mss);
    }

    // ---- PRIVATE ----

    fn update_altitude_setpoint(&mut self, altitude_m: f64) {
        let delta_m = altitude_m - self.setpoints.target_altitude_m;

        if delta_m.abs() > std::f64::EPSILON {
            debug!(
                "Altitude setpoint {:.2} -> {:.2} m",
                self.setpoints.target_altitude_m, altitude_m
            );
            self.setpoints.target_altitude_m = altitude_m;
            self.climb_bias_sign = delta_m.signum();
        }
    }

    /// Map operator inputs onto commands.
    fn manual_cmd(&mut self, input: Option<ManualInput>) -> ControlCommand {
        let input = input.unwrap_or_default();
        let hover_n = self.profile.hover_thrust_n();
        let max_n = self.profile.max_vertical_thrust_n;
        let limit = self.profile.lateral_accel_limit_mss;

        let vertical = input.vertical.max(-1.0).min(1.0);
        let thrust_n = if vertical >= 0.0 {
            lin_map((0.0, 1.0), (hover_n, max_n), vertical)
        } else {
            lin_map((-1.0, 0.0), (0.0, hover_n), vertical)
        };

        let lateral = clamp_magnitude(
            [
                input.east.max(-1.0).min(1.0) * limit,
                input.north.max(-1.0).min(1.0) * limit,
            ],
            limit,
        );

        ControlCommand {
            thrust_n: thrust_n.max(0.0).min(max_n),
            lateral_accel_east_mss: lateral[0],
            lateral_accel_north_mss: lateral[1],
        }
    }

    /// Compute commands towards the current target.
    fn auto_nav_cmd(&mut self, now_s: f64) -> ControlCommand {
        let position = self.position();

        if let Some(target) = self.state.target_position {
            self.update_altitude_setpoint(target.up_m);
        }

        let lateral = self.lateral_cmd(now_s, &position);
        let thrust_n = self.vertical_cmd(now_s, &position);

        ControlCommand {
            thrust_n,
            lateral_accel_east_mss: lateral[0],
            lateral_accel_north_mss: lateral[1],
        }
    }

    /// Lateral acceleration towards the target.
    ///
    /// The speed controller acts on the speed along the line to the target,
    /// slowing on approach, while the cross-track velocity is damped out.
    fn lateral_cmd(&mut self, now_s: f64, position: &LocalPosition) -> Vector2<f64> {
        let target = match self.state.target_position {
            Some(t) => t,
            None => {
                self.idle_lateral();
                return Vector2::zeros();
            }
        };

        let dist_m = position.horizontal_distance_to(&target);
        self.report.horizontal_distance_m = dist_m;

        if dist_m <= self.profile.dead_zone_m {
            self.report.in_dead_zone = true;
            self.idle_lateral();
            return Vector2::zeros();
        }

        let dir = Vector2::new(
            target.east_m - position.east_m,
            target.north_m - position.north_m,
        ) / dist_m;
        let vel_h = Vector2::new(self.state.velocity_ms[0], self.state.velocity_ms[2]);
        let limit = self.profile.lateral_accel_limit_mss;

        let accel = match self.controllers {
            Some(ref mut c) => {
                let desired_ms = self
                    .setpoints
                    .target_speed_ms
                    .min(self.profile.approach_gain * dist_m);
                let along_ms = vel_h.dot(&dir);
                self.speed_setpoint_ms = desired_ms;

                let force_n = c.speed.compute(desired_ms, along_ms, now_s);
                let cross_ms = vel_h - dir * along_ms;

                dir * (force_n / self.profile.mass_kg) - cross_ms * self.profile.cross_track_damping
            }
            None => {
                self.speed_setpoint_ms = self.setpoints.target_speed_ms;
                dir * limit.min(dist_m * FALLBACK_LATERAL_GAIN)
            }
        };

        let clamped = clamp_magnitude([accel[0], accel[1]], limit);
        Vector2::new(clamped[0], clamped[1])
    }

    /// Total vertical thrust for the altitude setpoint.
    fn vertical_cmd(&mut self, now_s: f64, position: &LocalPosition) -> f64 {
        let bias_n = self.climb_bias_sign * self.profile.climb_bias_n;
        self.climb_bias_sign = 0.0;

        let setpoint_m = self.setpoints.target_altitude_m;
        let thrust_n = match self.controllers {
            Some(ref mut c) => c.altitude.compute(setpoint_m, position, now_s),
            None => {
                self.profile.hover_thrust_n() + FALLBACK_ALT_K_P * (setpoint_m - position.up_m)
            }
        };

        (thrust_n + bias_n)
            .max(0.0)
            .min(self.profile.max_vertical_thrust_n)
    }

    /// No lateral control this tick, so the speed loop starts fresh when it is
    /// next engaged.
    fn idle_lateral(&mut self) {
        self.speed_setpoint_ms = 0.0;
        if let Some(ref mut c) = self.controllers {
            c.speed.reset();
        }
    }

    /// Move the attitude towards the tilt implied by the lateral acceleration,
    /// then level the vehicle if the tilt limit is exceeded.
    fn update_attitude(&mut self, dt_s: f64, lateral_mss: &Vector2<f64>) {
        let yaw_q = UnitQuaternion::from_axis_angle(&Vector3::y_axis(), self.yaw_rad());
        let lateral = Vector3::new(lateral_mss[0], 0.0, lateral_mss[1]);

        // Rotating about up x accel leans the up axis into the acceleration
        let demanded_q = match Unit::try_new(Vector3::y().cross(&lateral), MIN_AXIS_NORM) {
            Some(axis) => {
                UnitQuaternion::from_axis_angle(&axis, (lateral.norm() / GRAVITY_MSS).atan())
                    * yaw_q
            }
            None => yaw_q,
        };

        self.state.attitude_q = slerp_towards(
            &self.state.attitude_q,
            &demanded_q,
            self.profile.attitude_rate * dt_s,
        );

        let (pitch_deg, roll_deg) = self.tilt_deg();
        let max_deg = self.profile.max_tilt_deg;
        self.state.tilt_limited = pitch_deg.abs() > max_deg || roll_deg.abs() > max_deg;

        if self.state.tilt_limited {
            let level_q = UnitQuaternion::from_axis_angle(&Vector3::y_axis(), self.yaw_rad());
            self.state.attitude_q = slerp_towards(
                &self.state.attitude_q,
                &level_q,
                self.profile.tilt_recovery_rate * dt_s,
            );
        }
    }

    /// Heading of the forward axis projected onto the horizontal plane,
    /// measured from north towards east.
    fn yaw_rad(&self) -> f64 {
        let forward = self.state.attitude_q * Vector3::z();
        forward[0].atan2(forward[2])
    }
}

// ---------------------------------------------------------------------------
// FUNCTIONS
// ---------------------------------------------------------------------------

/// Angle between a vector and the horizontal plane.
fn elevation_deg(vec: &Vector3<f64>) -> f64 {
    vec[1]
        .atan2(Vector2::new(vec[0], vec[2]).norm())
        .to_degrees()
}

/// Interpolate a fraction `t` of the way from `from` to `to`, with `t` clamped
/// to [0, 1].
fn slerp_towards(
    from: &UnitQuaternion<f64>,
    to: &UnitQuaternion<f64>,
    t: f64,
) -> UnitQuaternion<f64> {
    let t = t.max(0.0).min(1.0);
    from.try_slerp(to, t, 1e-9).unwrap_or(*to)
}

// ---------------------------------------------------------------------------
// TESTS
// ---------------------------------------------------------------------------

#[cfg(test)]
mod test {
    use super::*;

    const DT: f64 = 0.02;

    /// Run logic and physics together for the given duration.
    fn run(
        ctrl: &mut VehicleController,
        start_s: f64,
        duration_s: f64,
        manual: Option<ManualInput>,
    ) -> f64 {
        let steps = (duration_s / DT).round() as usize;
        let mut t = start_s;
        for _ in 0..steps {
            t += DT;
            ctrl.proc(&InputData { now_s: t, manual }).unwrap();
            ctrl.tick_physics(DT);
        }
        t
    }

    fn armed_in_flight(profile: Option<FlightProfile>, altitude_m: f64) -> VehicleController {
        let mut ctrl = match profile {
            Some(p) => VehicleController::with_profile(p),
            None => VehicleController::default(),
        };
        ctrl.arm();
        ctrl.take_off(altitude_m).unwrap();
        ctrl
    }

    #[test]
    fn test_arm_disarm() {
        let mut ctrl = VehicleController::with_profile(FlightProfile::default());
        let rx = ctrl.subscribe();

        assert!(!ctrl.is_armed());
        ctrl.arm();
        ctrl.arm();
        ctrl.take_off(10.0).unwrap();
        run(&mut ctrl, 0.0, 1.0, None);
        assert!(ctrl.state().thrust_cmd_n > 0.0);

        ctrl.disarm();
        assert!(!ctrl.is_armed());
        assert!(!ctrl.in_flight());
        assert_eq!(ctrl.state().thrust_cmd_n, 0.0);
        assert_eq!(ctrl.state().lateral_accel_cmd_mss, Vector2::zeros());

        let events: Vec<_> = rx.try_iter().collect();
        assert_eq!(events, vec![VehicleEvent::Armed, VehicleEvent::Disarmed]);
    }

    #[test]
    fn test_take_off_requires_arming() {
        let mut ctrl = VehicleController::with_profile(FlightProfile::default());
        assert!(matches!(ctrl.take_off(10.0), Err(FltCtrlError::NotArmed)));
        assert!(!ctrl.in_flight());
    }

    #[test]
    fn test_go_to_and_clear() {
        let mut ctrl = VehicleController::with_profile(FlightProfile::default());
        let target = LocalPosition::new(10.0, 35.0, -5.0);

        ctrl.go_to(target).unwrap();
        assert!(ctrl.has_target_position());
        assert_eq!(ctrl.target_position(), Some(target));
        assert_eq!(ctrl.setpoints().target_altitude_m, 35.0);

        ctrl.clear_target();
        assert!(!ctrl.has_target_position());

        let bad = LocalPosition::new(std::f64::NAN, 0.0, 0.0);
        assert!(matches!(ctrl.go_to(bad), Err(FltCtrlError::InvalidTarget(_))));
        assert!(!ctrl.has_target_position());
    }

    #[test]
    fn test_idle_on_ground_until_take_off() {
        let mut ctrl = VehicleController::with_profile(FlightProfile::default());
        ctrl.arm();
        ctrl.go_to(LocalPosition::new(20.0, 10.0, 0.0)).unwrap();
        run(&mut ctrl, 0.0, 2.0, None);

        assert_eq!(ctrl.state().thrust_cmd_n, 0.0);
        assert_eq!(ctrl.position(), LocalPosition::default());
    }

    #[test]
    fn test_take_off_resets_controllers() {
        let mut ctrl = armed_in_flight(Some(FlightProfile::default()), 20.0);
        run(&mut ctrl, 0.0, 5.0, None);

        ctrl.take_off(30.0).unwrap();
        let (cmd, _) = ctrl.proc(&InputData { now_s: 6.0, manual: None }).unwrap();

        // First call after reset gives hover thrust plus the climb bias
        let profile = FlightProfile::default();
        assert!((cmd.thrust_n - (profile.hover_thrust_n() + profile.climb_bias_n)).abs() < 1e-9);
    }

    #[test]
    fn test_climb_and_hold() {
        let mut ctrl = armed_in_flight(Some(FlightProfile::default()), 20.0);
        run(&mut ctrl, 0.0, 60.0, None);

        assert!(ctrl.get_altitude_error().abs() < 0.5);
        assert!(ctrl.get_velocity().norm() < 0.1);
        assert!(!ctrl.report().proportional_fallback);
    }

    #[test]
    fn test_fly_to_target() {
        let mut ctrl = armed_in_flight(Some(FlightProfile::default()), 20.0);
        let target = LocalPosition::new(40.0, 20.0, 30.0);
        ctrl.go_to(target).unwrap();

        run(&mut ctrl, 0.0, 60.0, None);

        assert!(ctrl.position().horizontal_distance_to(&target) < 1.0);
        assert!((ctrl.position().up_m - target.up_m).abs() < 0.5);
        assert!(ctrl.report().in_dead_zone);
    }

    #[test]
    fn test_proportional_fallback() {
        let mut ctrl = armed_in_flight(None, 20.0);
        assert!(!ctrl.is_configured());

        let target = LocalPosition::new(-30.0, 25.0, 10.0);
        ctrl.go_to(target).unwrap();
        run(&mut ctrl, 0.0, 60.0, None);

        assert!(ctrl.report().proportional_fallback);
        assert!(ctrl.position().horizontal_distance_to(&target) < 1.0);
        assert!((ctrl.position().up_m - target.up_m).abs() < 0.5);
    }

    #[test]
    fn test_dead_zone() {
        let mut ctrl = armed_in_flight(Some(FlightProfile::default()), 20.0);
        ctrl.set_position(LocalPosition::new(0.0, 20.0, 0.0));
        ctrl.go_to(LocalPosition::new(0.3, 20.0, 0.2)).unwrap();

        let (cmd, report) = ctrl.proc(&InputData { now_s: 1.0, manual: None }).unwrap();
        assert_eq!(cmd.lateral_accel_east_mss, 0.0);
        assert_eq!(cmd.lateral_accel_north_mss, 0.0);
        assert!(report.in_dead_zone);
    }

    #[test]
    fn test_manual_mapping() {
        let profile = FlightProfile {
            control_mode: ControlMode::Manual,
            ..Default::default()
        };
        let mut ctrl = armed_in_flight(Some(profile.clone()), 10.0);

        let mut cmd_for = |vertical: f64, east: f64, t: f64| {
            ctrl.proc(&InputData {
                now_s: t,
                manual: Some(ManualInput {
                    east,
                    north: 0.0,
                    vertical,
                }),
            })
            .unwrap()
            .0
        };

        assert!((cmd_for(0.0, 0.0, 1.0).thrust_n - profile.hover_thrust_n()).abs() < 1e-9);
        assert!((cmd_for(1.0, 0.0, 2.0).thrust_n - profile.max_vertical_thrust_n).abs() < 1e-9);
        assert!(cmd_for(-1.0, 0.0, 3.0).thrust_n.abs() < 1e-9);

        let cmd = cmd_for(0.0, 5.0, 4.0);
        assert_eq!(cmd.lateral_accel_east_mss, profile.lateral_accel_limit_mss);
    }

    #[test]
    fn test_tilt_limit() {
        let profile = FlightProfile {
            control_mode: ControlMode::Manual,
            ..Default::default()
        };
        let max_tilt_deg = profile.max_tilt_deg;
        let mut ctrl = armed_in_flight(Some(profile), 10.0);

        // Full lateral input demands atan(10 / 9.81), around 45 degrees
        let input = ManualInput {
            east: 1.0,
            north: 0.0,
            vertical: 0.0,
        };
        run(&mut ctrl, 0.0, 5.0, Some(input));

        let (pitch_deg, roll_deg) = ctrl.tilt_deg();
        let tilt_deg = pitch_deg.abs().max(roll_deg.abs());
        assert!(ctrl.state().tilt_limited);
        assert!(tilt_deg > max_tilt_deg);
        assert!(tilt_deg < 40.0);

        // With no lateral input the vehicle returns to level
        run(&mut ctrl, 5.0, 5.0, None);
        let (pitch_deg, roll_deg) = ctrl.tilt_deg();
        assert!(pitch_deg.abs() < 1.0 && roll_deg.abs() < 1.0);
        assert!(!ctrl.state().tilt_limited);
    }

    #[test]
    fn test_disarmed_falls_to_ground() {
        let mut ctrl = armed_in_flight(Some(FlightProfile::default()), 20.0);
        run(&mut ctrl, 0.0, 20.0, None);
        assert!(ctrl.position().up_m > 10.0);

        ctrl.disarm();
        run(&mut ctrl, 20.0, 20.0, None);

        assert_eq!(ctrl.position().up_m, 0.0);
        assert_eq!(ctrl.get_velocity(), Vector3::zeros());
    }

    #[test]
    fn test_non_positive_physics_step() {
        let mut ctrl = armed_in_flight(Some(FlightProfile::default()), 20.0);
        ctrl.set_position(LocalPosition::new(1.0, 5.0, 2.0));
        ctrl.tick_physics(0.0);
        ctrl.tick_physics(-0.1);
        assert_eq!(ctrl.position(), LocalPosition::new(1.0, 5.0, 2.0));
    }

    #[test]
    fn test_set_profile_keeps_distance_source() {
        struct Range(f64);
        impl DistanceSource for Range {
            fn distance_to_ground(&self, _position: &LocalPosition) -> Option<f64> {
                Some(self.0)
            }
        }

        let profile = FlightProfile {
            terrain_relative: true,
            ..Default::default()
        };

        // Source given before any profile is configured
        let mut ctrl = VehicleController::default();
        ctrl.set_distance_source(Box::new(Range(7.0)));
        ctrl.set_profile(profile.clone());
        ctrl.set_position(LocalPosition::new(0.0, 30.0, 0.0));
        assert_eq!(ctrl.get_altitude_error(), profile.target_altitude_m - 7.0);

        // Retuning keeps it
        ctrl.set_profile(FlightProfile {
            alt_k_p: 3.0,
            ..profile.clone()
        });
        assert_eq!(ctrl.get_altitude_error(), profile.target_altitude_m - 7.0);
    }

    #[test]
    fn test_invalid_time() {
        let mut ctrl = VehicleController::default();
        let res = ctrl.proc(&InputData {
            now_s: std::f64::NAN,
            manual: None,
        });
        assert!(matches!(res, Err(FltCtrlError::InvalidTime(_))));
    }
}
