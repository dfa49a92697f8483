//! # Events
//!
//! Lifecycle notifications emitted by the flight modules to external
//! observers.
//!
//! Each emitting module holds an [`EventBus`]. Observers call
//! [`EventBus::subscribe`] to obtain a receiver, and events are delivered
//! synchronously to every live subscriber in registration order when the
//! module emits them. Dropping the receiver cancels the subscription.

// ------------------------------------------------------------------------------------------------
// IMPORTS
// ------------------------------------------------------------------------------------------------

use std::sync::mpsc::{channel, Receiver, Sender};

use log::trace;
use serde::Serialize;

use crate::geo::LocalPosition;

// ------------------------------------------------------------------------------------------------
// ENUMS
// ------------------------------------------------------------------------------------------------

/// Events emitted by the [`crate::flt_ctrl::VehicleController`].
#[derive(Debug, Clone, PartialEq, Serialize)]
pub enum VehicleEvent {
    Armed,
    Disarmed,
}

/// Events emitted by the [`crate::nav::Navigator`].
#[derive(Debug, Clone, PartialEq, Serialize)]
pub enum NavEvent {
    /// Navigation towards the contained target has begun.
    NavigationStarted(LocalPosition),

    /// The contained target has been reached.
    TargetReached(LocalPosition),

    /// The last target has been reached and the waypoint queue is empty.
    NavigationCompleted,

    /// A navigation request was rejected at the boundary.
    InvalidInput(String),
}

/// Events emitted by the [`crate::pattern::LawnmowerPattern`].
#[derive(Debug, Clone, PartialEq, Serialize)]
pub enum PatternEvent {
    WaypointsGenerated(Vec<LocalPosition>),
    CoverageCalculated(f64),
}

// ------------------------------------------------------------------------------------------------
// STRUCTS
// ------------------------------------------------------------------------------------------------

/// A list of subscribers to a single event type.
pub struct EventBus<E> {
    subscribers: Vec<Sender<E>>,
}

// ------------------------------------------------------------------------------------------------
// IMPLS
// ------------------------------------------------------------------------------------------------

impl<E: Clone> EventBus<E> {
    pub fn new() -> Self {
        Self {
            subscribers: Vec::new(),
        }
    }

    /// Register a new subscriber, returning the receiving end of its channel.
    pub fn subscribe(&mut self) -> Receiver<E> {
        let (tx, rx) = channel();
        self.subscribers.push(tx);
        rx
    }

    /// Number of currently registered subscribers.
    ///
    /// Subscribers which have dropped their receiver are only removed on the
    /// next call to [`EventBus::emit`].
    pub fn num_subscribers(&self) -> usize {
        self.subscribers.len()
    }

    /// Send the event to all subscribers, in registration order.
    pub fn emit(&mut self, event: E) {
        let num_before = self.subscribers.len();

        self.subscribers.retain(|tx| tx.send(event.clone()).is_ok());

        if self.subscribers.len() != num_before {
            trace!(
                "Removed {} cancelled subscriber(s)",
                num_before - self.subscribers.len()
            );
        }
    }
}

impl<E: Clone> Default for EventBus<E> {
    fn default() -> Self {
        Self::new()
    }
}

// ------------------------------------------------------------------------------------------------
// TESTS
// ------------------------------------------------------------------------------------------------
