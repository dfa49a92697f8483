//! Implementations for the Navigator state structure

// ------------------------------------------------------------------------------------------------
// IMPORTS
// ------------------------------------------------------------------------------------------------

use std::sync::mpsc::Receiver;

use log::{debug, error, info, warn};
use serde::Serialize;

use super::{
    is_finite, MissionRecord, NavError, NavParams, Waypoint, WaypointQueue, WaypointSink,
};
use crate::{
    events::{EventBus, NavEvent},
    flt_ctrl::VehicleController,
    geo::{GeoCoordinate, GeoMapper, LocalPosition},
};

// ------------------------------------------------------------------------------------------------
// STRUCTS
// ------------------------------------------------------------------------------------------------

/// Data describing the target currently being navigated to.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct NavigationSession {
    pub current_target: LocalPosition,

    /// Geographic coordinate of the target, with the vertical component discarded.
    pub current_target_geo: GeoCoordinate,

    /// Straight line distance from the vehicle to the target as of the last tick.
    ///
    /// Units: meters
    pub distance_to_target_m: f64,

    /// Label of the waypoint this target came from, if any.
    pub label: Option<String>,

    /// True if the target is the queue's current waypoint, false for a direct command.
    pub from_queue: bool,
}

/// Navigation module state.
pub struct Navigator {
    params: NavParams,

    mapper: GeoMapper,

    vehicle: VehicleController,

    queue: WaypointQueue,

    /// The active navigation, `None` while idle.
    session: Option<NavigationSession>,

    events: EventBus<NavEvent>,
}

// ------------------------------------------------------------------------------------------------
// ENUMS
// ------------------------------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum NavState {
    Idle,
    Navigating,
}

// ------------------------------------------------------------------------------------------------
// IMPLS
// ------------------------------------------------------------------------------------------------

impl Navigator {
    /// Create a new navigator controlling the given vehicle.
    pub fn new(params: NavParams, vehicle: VehicleController) -> Self {
        Self {
            mapper: GeoMapper::new(params.origin),
            queue: WaypointQueue::new(params.queue_reach_threshold_m, params.auto_advance),
            params,
            vehicle,
            session: None,
            events: EventBus::new(),
        }
    }

    /// Navigate to a geographic coordinate at the cruise altitude.
    ///
    /// Out of bounds coordinates are rejected, reported to observers as invalid input, and leave
    /// the navigator unchanged.
    pub fn go_to_geo_coordinates(&mut self, geo: GeoCoordinate) -> Result<(), NavError> {
        if !geo.is_valid() {
            return Err(self.reject(NavError::InvalidCoordinate(geo)));
        }

        let target = self.mapper.to_local(&geo, self.params.cruise_altitude_m);
        self.navigate_to(Waypoint::new(target), false)
    }

    /// Navigate to a position in the local frame.
    ///
    /// Targets closer than the minimum mission distance produce a warning but are still flown
    /// to.
    pub fn go_to_local_position(&mut self, position: LocalPosition) -> Result<(), NavError> {
        if !is_finite(&position) {
            return Err(self.reject(NavError::InvalidPosition(position)));
        }

        self.navigate_to(Waypoint::new(position), false)
    }

    /// Validate a mission and start navigating to its coordinate.
    pub fn start_mission(&mut self, mission: &MissionRecord) -> Result<(), NavError> {
        if mission.description.trim().is_empty() {
            return Err(self.reject(NavError::EmptyMissionDescription));
        }

        info!("Starting mission \"{}\"", mission.description.trim());

        self.go_to_geo_coordinates(mission.coordinate())
    }

    /// Queue a position to visit. If the navigator is idle navigation starts immediately.
    pub fn add_local_waypoint(&mut self, position: LocalPosition) -> Result<(), NavError> {
        self.add_waypoint(Waypoint::new(position))
    }

    /// Queue a geographic coordinate to visit at the cruise altitude.
    pub fn add_gps_waypoint(&mut self, geo: GeoCoordinate) -> Result<(), NavError> {
        if !geo.is_valid() {
            return Err(self.reject(NavError::InvalidCoordinate(geo)));
        }

        let position = self.mapper.to_local(&geo, self.params.cruise_altitude_m);
        self.add_waypoint(Waypoint::new(position))
    }

    /// If idle, start navigating to the queue's current waypoint, or the next queued one if there
    /// is no current waypoint.
    ///
    /// Returns true if navigation is active afterwards.
    pub fn process_queue(&mut self) -> Result<bool, NavError> {
        if self.session.is_none() {
            let next = match self.queue.current().cloned() {
                Some(wp) => Some(wp),
                None => self.queue.dequeue(),
            };

            if let Some(wp) = next {
                self.navigate_to(wp, true)?;
            }
        }

        Ok(self.is_navigating())
    }

    /// Check whether the current target has been reached, moving on to the next waypoint or
    /// completing navigation if it has.
    ///
    /// Reads the vehicle position settled by the previous physics tick.
    pub fn tick(&mut self) {
        let position = self.vehicle.position();

        let session = match self.session {
            Some(ref mut s) => s,
            None => return,
        };

        session.distance_to_target_m = position.distance_to(&session.current_target);

        if session.distance_to_target_m > self.params.reach_threshold_m {
            return;
        }

        let target = session.current_target;
        let from_queue = session.from_queue;
        info!(
            "Target {} reached ({:.2} m)",
            target, session.distance_to_target_m
        );
        self.events.emit(NavEvent::TargetReached(target));
        self.session = None;

        let next = self.next_waypoint(from_queue, &position);

        match next {
            Some(wp) => {
                if let Err(e) = self.navigate_to(wp, true) {
                    error!("Could not navigate to the next waypoint: {}", e);
                    self.complete();
                }
            }
            None => self.complete(),
        }
    }

    /// Stop navigating and clear the vehicle's target. Queued waypoints are kept.
    pub fn stop_navigation(&mut self) {
        if self.session.take().is_some() {
            info!("Navigation stopped");
        }
        self.vehicle.clear_target();
    }

    /// Stop navigating and discard all queued waypoints.
    pub fn clear_navigation(&mut self) {
        self.stop_navigation();
        self.queue.clear();
        info!("Navigation cleared");
    }

    // ---- ACCESSORS ----

    pub fn subscribe(&mut self) -> Receiver<NavEvent> {
        self.events.subscribe()
    }

    pub fn state(&self) -> NavState {
        match self.session {
            Some(_) => NavState::Navigating,
            None => NavState::Idle,
        }
    }

    pub fn is_navigating(&self) -> bool {
        self.session.is_some()
    }

    pub fn session(&self) -> Option<&NavigationSession> {
        self.session.as_ref()
    }

    /// Distance to the current target as of the last tick, if navigating.
    pub fn distance_to_target(&self) -> Option<f64> {
        self.session.as_ref().map(|s| s.distance_to_target_m)
    }

    pub fn vehicle(&self) -> &VehicleController {
        &self.vehicle
    }

    pub fn vehicle_mut(&mut self) -> &mut VehicleController {
        &mut self.vehicle
    }

    pub fn queue(&self) -> &WaypointQueue {
        &self.queue
    }

    pub fn queue_mut(&mut self) -> &mut WaypointQueue {
        &mut self.queue
    }

    pub fn mapper(&self) -> &GeoMapper {
        &self.mapper
    }

    pub fn params(&self) -> &NavParams {
        &self.params
    }

    // ---- PRIVATE ----

    /// Begin navigating to a validated waypoint. `from_queue` records whether it is the queue's
    /// current waypoint.
    fn navigate_to(&mut self, waypoint: Waypoint, from_queue: bool) -> Result<(), NavError> {
        let target = waypoint.position;
        let distance_m = self.vehicle.position().distance_to(&target);

        if distance_m < self.params.min_mission_distance_m {
            warn!(
                "Target {} is only {:.1} m away, less than the minimum mission distance of {:.1} m",
                target, distance_m, self.params.min_mission_distance_m
            );
        }

        if self.vehicle.is_armed() && !self.vehicle.in_flight() {
            self.vehicle
                .take_off(self.params.cruise_altitude_m)
                .map_err(NavError::FltCtrlError)?;
        }

        self.vehicle.go_to(target).map_err(NavError::FltCtrlError)?;

        self.session = Some(NavigationSession {
            current_target: target,
            current_target_geo: self.mapper.to_geo(&target),
            distance_to_target_m: distance_m,
            label: waypoint.label,
            from_queue,
        });

        match self.session.as_ref().and_then(|s| s.label.as_ref()) {
            Some(l) => info!("Navigating to {} ({})", target, l),
            None => info!("Navigating to {}", target),
        }
        self.events.emit(NavEvent::NavigationStarted(target));

        Ok(())
    }

    /// Pick the waypoint to fly to after reaching the current target.
    ///
    /// If the reached target came from the queue its waypoint is marked reached and the queue
    /// advanced. Otherwise the target was a direct command which interrupted the queue, so the
    /// queue's current waypoint is resumed.
    fn next_waypoint(&mut self, from_queue: bool, position: &LocalPosition) -> Option<Waypoint> {
        if from_queue {
            match self.queue.mark_reached(position) {
                Some(wp) => Some(wp),
                None => self.queue.dequeue(),
            }
        } else {
            match self.queue.current().cloned() {
                Some(wp) => {
                    debug!("Resuming queued waypoint {}", wp.position);
                    Some(wp)
                }
                None => self.queue.dequeue(),
            }
        }
    }

    fn complete(&mut self) {
        self.session = None;
        info!("Navigation completed");
        self.events.emit(NavEvent::NavigationCompleted);
    }

    /// Report a rejected request to observers and hand the error back.
    fn reject(&mut self, err: NavError) -> NavError {
        warn!("Navigation request rejected: {}", err);
        self.events.emit(NavEvent::InvalidInput(err.to_string()));
        err
    }
}

impl WaypointSink for Navigator {
    /// Queue a waypoint, starting navigation if idle.
    fn add_waypoint(&mut self, waypoint: Waypoint) -> Result<(), NavError> {
        if !is_finite(&waypoint.position) {
            return Err(self.reject(NavError::InvalidPosition(waypoint.position)));
        }

        self.queue.enqueue(waypoint);
        self.process_queue()?;

        Ok(())
    }
}

// ------------------------------------------------------------------------------------------------
// TESTS
// ------------------------------------------------------------------------------------------------
