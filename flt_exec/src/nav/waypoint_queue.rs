//! # Waypoint queue
//!
//! A FIFO of waypoints with a "current target" slot. Dequeuing moves the oldest waypoint into the
//! current slot, where it is checked for arrival until it is marked reached.

// ------------------------------------------------------------------------------------------------
// IMPORTS
// ------------------------------------------------------------------------------------------------

use std::collections::VecDeque;

use log::{debug, info, warn};
use serde::{Deserialize, Serialize};

use super::{is_finite, NavError, WaypointSink};
use crate::geo::LocalPosition;

// ------------------------------------------------------------------------------------------------
// STRUCTS
// ------------------------------------------------------------------------------------------------

/// A position to visit, optionally labelled.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Waypoint {
    pub position: LocalPosition,
    pub label: Option<String>,
}

/// A waypoint as stored in a waypoint file, components in the local frame
/// (x east, y up, z north).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WaypointRecord {
    pub x: f64,
    pub y: f64,
    pub z: f64,

    #[serde(default)]
    pub label: Option<String>,
}

/// An ordered list of waypoints, loaded from a waypoint file.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct WaypointList {
    #[serde(default)]
    pub waypoints: Vec<WaypointRecord>,
}

#[derive(Debug, Clone)]
pub struct WaypointQueue {
    pending: VecDeque<Waypoint>,

    /// The waypoint most recently dequeued and not yet marked reached.
    current: Option<Waypoint>,

    /// Units: meters
    reach_threshold_m: f64,

    auto_advance: bool,
}

// ------------------------------------------------------------------------------------------------
// IMPLS
// ------------------------------------------------------------------------------------------------

impl Waypoint {
    pub fn new(position: LocalPosition) -> Self {
        Self {
            position,
            label: None,
        }
    }

    pub fn labelled<S: Into<String>>(position: LocalPosition, label: S) -> Self {
        Self {
            position,
            label: Some(label.into()),
        }
    }
}

impl From<LocalPosition> for Waypoint {
    fn from(position: LocalPosition) -> Self {
        Self::new(position)
    }
}

impl From<WaypointRecord> for Waypoint {
    fn from(record: WaypointRecord) -> Self {
        Self {
            position: LocalPosition::new(record.x, record.y, record.z),
            label: record.label,
        }
    }
}

impl Default for WaypointQueue {
    fn default() -> Self {
        Self::new(2.0, true)
    }
}

impl WaypointQueue {
    pub fn new(reach_threshold_m: f64, auto_advance: bool) -> Self {
        Self {
            pending: VecDeque::new(),
            current: None,
            reach_threshold_m,
            auto_advance,
        }
    }

    /// Append a waypoint to the back of the queue. Duplicates are allowed.
    pub fn enqueue(&mut self, waypoint: Waypoint) {
        debug!("Enqueued waypoint {}", waypoint.position);
        self.pending.push_back(waypoint);
    }

    /// Pop the oldest waypoint and make it the current target.
    ///
    /// If the queue is empty the current target is cleared and `None` is returned.
    pub fn dequeue(&mut self) -> Option<Waypoint> {
        self.current = self.pending.pop_front();
        self.current.clone()
    }

    /// The oldest pending waypoint, without removing it.
    pub fn peek(&self) -> Option<&Waypoint> {
        self.pending.front()
    }

    pub fn current(&self) -> Option<&Waypoint> {
        self.current.as_ref()
    }

    /// True if there is a current target and `position` is within the reach threshold of it.
    pub fn is_reached(&self, position: &LocalPosition) -> bool {
        match self.current {
            Some(ref wp) => wp.position.distance_to(position) <= self.reach_threshold_m,
            None => false,
        }
    }

    /// Clear the current target. If auto advance is enabled the next waypoint is dequeued and
    /// returned.
    pub fn mark_reached(&mut self, position: &LocalPosition) -> Option<Waypoint> {
        if let Some(wp) = self.current.take() {
            debug!(
                "Waypoint {} reached at {} ({:.2} m)",
                wp.position,
                position,
                wp.position.distance_to(position)
            );
        }

        if self.auto_advance {
            self.dequeue()
        } else {
            None
        }
    }

    /// Remove all pending waypoints and the current target.
    pub fn clear(&mut self) {
        self.pending.clear();
        self.current = None;
    }

    /// True until the queue is empty and the current target has been cleared.
    pub fn has_waypoints(&self) -> bool {
        !self.pending.is_empty() || self.current.is_some()
    }

    /// Number of pending waypoints, not including the current target.
    pub fn len(&self) -> usize {
        self.pending.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }

    pub fn reach_threshold_m(&self) -> f64 {
        self.reach_threshold_m
    }

    /// Enqueue every waypoint of a list in order.
    ///
    /// Records with non-finite components are skipped with a warning. Returns the number of
    /// waypoints enqueued.
    pub fn load(&mut self, list: WaypointList) -> usize {
        let mut num_loaded = 0;

        for record in list.waypoints {
            let wp = Waypoint::from(record);
            if is_finite(&wp.position) {
                self.enqueue(wp);
                num_loaded += 1;
            } else {
                warn!("Skipping non-finite waypoint {}", wp.position);
            }
        }

        info!("Loaded {} waypoints", num_loaded);

        num_loaded
    }
}

impl WaypointSink for WaypointQueue {
    fn add_waypoint(&mut self, waypoint: Waypoint) -> Result<(), NavError> {
        if !is_finite(&waypoint.position) {
            return Err(NavError::InvalidPosition(waypoint.position));
        }

        self.enqueue(waypoint);
        Ok(())
    }
}

// ------------------------------------------------------------------------------------------------
// TESTS
// ------------------------------------------------------------------------------------------------

#[cfg(test)]
mod test {
    use super::*;

    fn abc() -> [Waypoint; 3] {
        [
            Waypoint::labelled(LocalPosition::new(0.0, 10.0, 0.0), "A"),
            Waypoint::labelled(LocalPosition::new(10.0, 10.0, 0.0), "B"),
            Waypoint::labelled(LocalPosition::new(10.0, 10.0, 10.0), "C"),
        ]
    }

    #[test]
    fn test_fifo_order() {
        let mut queue = WaypointQueue::default();
        for wp in abc().iter().cloned() {
            queue.enqueue(wp);
        }

        assert_eq!(queue.peek(), Some(&abc()[0]));
        assert_eq!(queue.len(), 3);

        for expected in abc().iter() {
            assert!(queue.has_waypoints());
            assert_eq!(queue.dequeue().as_ref(), Some(expected));
            assert_eq!(queue.current(), Some(expected));
        }

        // The last waypoint is still being flown to
        assert!(queue.is_empty());
        assert!(queue.has_waypoints());

        let pos = abc()[2].position;
        assert_eq!(queue.mark_reached(&pos), None);
        assert!(!queue.has_waypoints());
        assert_eq!(queue.dequeue(), None);
    }

    #[test]
    fn test_reach_detection() {
        let mut queue = WaypointQueue::new(2.0, true);
        assert!(!queue.is_reached(&LocalPosition::default()));

        queue.enqueue(LocalPosition::new(0.0, 10.0, 0.0).into());
        queue.dequeue();

        assert!(!queue.is_reached(&LocalPosition::new(0.0, 7.0, 0.0)));
        assert!(queue.is_reached(&LocalPosition::new(1.0, 9.0, 1.0)));
        assert!(queue.is_reached(&LocalPosition::new(0.0, 8.0, 0.0)));
    }

    #[test]
    fn test_mark_reached_auto_advance() {
        let mut queue = WaypointQueue::new(2.0, true);
        for wp in abc().iter().cloned() {
            queue.enqueue(wp);
        }
        queue.dequeue();

        let next = queue.mark_reached(&abc()[0].position);
        assert_eq!(next.as_ref(), Some(&abc()[1]));
        assert_eq!(queue.current(), Some(&abc()[1]));
        assert_eq!(queue.len(), 1);
    }

    #[test]
    fn test_mark_reached_manual_advance() {
        let mut queue = WaypointQueue::new(2.0, false);
        for wp in abc().iter().cloned() {
            queue.enqueue(wp);
        }
        queue.dequeue();

        assert_eq!(queue.mark_reached(&abc()[0].position), None);
        assert_eq!(queue.current(), None);
        assert_eq!(queue.len(), 2);
        assert!(queue.has_waypoints());
    }

    #[test]
    fn test_duplicates_and_clear() {
        let mut queue = WaypointQueue::default();
        let wp = Waypoint::new(LocalPosition::new(5.0, 5.0, 5.0));
        queue.enqueue(wp.clone());
        queue.enqueue(wp.clone());
        queue.dequeue();
        assert_eq!(queue.len(), 1);

        queue.clear();
        assert!(!queue.has_waypoints());
        assert_eq!(queue.current(), None);
    }

    #[test]
    fn test_load_list() {
        let list: WaypointList = util::params::from_str(
            r#"
            [[waypoints]]
            x = 1.0
            y = 20.0
            z = 2.0
            label = "first"

            [[waypoints]]
            x = -4.0
            y = 20.0
            z = 8.0
            "#,
        )
        .unwrap();

        let mut queue = WaypointQueue::default();
        assert_eq!(queue.load(list), 2);

        let first = queue.dequeue().unwrap();
        assert_eq!(first.position, LocalPosition::new(1.0, 20.0, 2.0));
        assert_eq!(first.label.as_deref(), Some("first"));
        assert_eq!(queue.peek().and_then(|w| w.label.clone()), None);
    }

    #[test]
    fn test_sink_rejects_non_finite() {
        let mut queue = WaypointQueue::default();
        let bad = Waypoint::new(LocalPosition::new(std::f64::INFINITY, 0.0, 0.0));
        assert!(matches!(
            queue.add_waypoint(bad),
            Err(NavError::InvalidPosition(_))
        ));
        assert!(!queue.has_waypoints());
    }
}
