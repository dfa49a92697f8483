//! # Lawnmower pattern
//!
//! Passes run east-west across the area and are stepped north or south. Consecutive passes are
//! flown in opposite directions, so each pass starts on the side the previous one ended.
//!
//! The number of passes generated is one more than the area size divided by the effective step,
//! rounded up, so the far edge is always swept. Passes are spread evenly across the area, which
//! means the real spacing is never more than the effective step.

// ------------------------------------------------------------------------------------------------
// IMPORTS
// ------------------------------------------------------------------------------------------------

use std::sync::mpsc::Receiver;

use log::{debug, error, info, warn};
use serde::Serialize;

use super::{PatternError, SearchAreaConfig};
use crate::{
    events::{EventBus, PatternEvent},
    geo::LocalPosition,
    nav::{Waypoint, WaypointSink},
};
use util::maths::lerp_clamped;

// ------------------------------------------------------------------------------------------------
// CONSTANTS
// ------------------------------------------------------------------------------------------------

/// Coverage below this raises a warning.
///
/// Units: percent
pub const MIN_ACCEPTABLE_COVERAGE_PERCENT: f64 = 90.0;

/// Fraction of the area size the optimised step may not exceed.
const MAX_OPTIMISED_STEP_FRACTION: f64 = 0.9;

/// Largest number of passes a pattern may contain.
pub const MAX_PASSES: usize = 10_000;

// ------------------------------------------------------------------------------------------------
// STRUCTS
// ------------------------------------------------------------------------------------------------

/// The result of executing a pattern.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct GeneratedPattern {
    pub waypoints: Vec<LocalPosition>,
    pub num_passes: usize,

    /// Units: percent
    pub coverage_percent: f64,
}

pub struct LawnmowerPattern {
    config: SearchAreaConfig,
    events: EventBus<PatternEvent>,
}

// ------------------------------------------------------------------------------------------------
// IMPLS
// ------------------------------------------------------------------------------------------------

impl LawnmowerPattern {
    pub fn new(config: SearchAreaConfig) -> Self {
        Self {
            config,
            events: EventBus::new(),
        }
    }

    pub fn config(&self) -> &SearchAreaConfig {
        &self.config
    }

    pub fn config_mut(&mut self) -> &mut SearchAreaConfig {
        &mut self.config
    }

    pub fn subscribe(&mut self) -> Receiver<PatternEvent> {
        self.events.subscribe()
    }

    /// Spacing between passes after overlap, or `None` if the configuration is degenerate.
    pub fn effective_step_m(&self) -> Option<f64> {
        let c = &self.config;

        if !(c.area_size_m > 0.0) || !(c.step_distance_m > 0.0) {
            return None;
        }

        let overlap_factor = 1.0 - c.overlap_percent / 100.0;
        let step_m = if c.optimize_for_coverage {
            (c.sensor_width_m * overlap_factor).min(c.area_size_m * MAX_OPTIMISED_STEP_FRACTION)
        } else {
            c.step_distance_m * overlap_factor
        };

        if step_m > 0.0 && step_m.is_finite() {
            Some(step_m)
        } else {
            None
        }
    }

    /// Number of passes the generated pattern contains, zero if the configuration is degenerate
    /// or would need more than [`MAX_PASSES`].
    pub fn num_passes(&self) -> usize {
        self.sweep().unwrap_or(0)
    }

    /// Compute the sweep waypoints without side effects.
    ///
    /// Returns an empty list if the area size or step distance is not positive, or if the pattern
    /// would need more than [`MAX_PASSES`].
    pub fn generate_waypoints(&self) -> Vec<LocalPosition> {
        self.generate().into_iter().map(|wp| wp.position).collect()
    }

    /// Estimate the percentage of the area seen by the sensor.
    ///
    /// Returns zero if no pattern can be generated for the configuration. Coverage below 90 % is
    /// warned about but not corrected.
    pub fn calculate_coverage(&self) -> f64 {
        let num_passes = match self.sweep() {
            Some(n) => (n - 1) as f64,
            None => return 0.0,
        };

        let c = &self.config;
        let total_width_m = num_passes * c.sensor_width_m;
        let overlap_width_m = (num_passes - 1.0) * c.sensor_width_m * c.overlap_percent / 100.0;

        let coverage = ((total_width_m - overlap_width_m) / c.area_size_m * 100.0)
            .max(0.0)
            .min(100.0);

        if coverage < MIN_ACCEPTABLE_COVERAGE_PERCENT {
            warn!(
                "Pattern coverage is only {:.1} %, adjust the sensor width, overlap or step distance",
                coverage
            );
        }

        coverage
    }

    /// Generate the pattern, hand its waypoints to the sink and notify observers.
    pub fn execute(
        &mut self,
        sink: &mut dyn WaypointSink,
    ) -> Result<GeneratedPattern, PatternError> {
        let waypoints = self.generate();
        let coverage_percent = self.calculate_coverage();

        let pattern = GeneratedPattern {
            waypoints: waypoints.iter().map(|wp| wp.position).collect(),
            num_passes: self.num_passes(),
            coverage_percent,
        };

        info!(
            "Lawnmower pattern: {} passes, {} waypoints, {:.1} % coverage",
            pattern.num_passes,
            pattern.waypoints.len(),
            pattern.coverage_percent
        );

        sink.add_waypoints(waypoints)
            .map_err(PatternError::SinkError)?;

        self.events
            .emit(PatternEvent::WaypointsGenerated(pattern.waypoints.clone()));
        self.events
            .emit(PatternEvent::CoverageCalculated(pattern.coverage_percent));

        Ok(pattern)
    }

    /// Pass count, or `None` if no pattern can be generated.
    fn sweep(&self) -> Option<usize> {
        let step_m = self.effective_step_m()?;

        let num_passes_f = (self.config.area_size_m / step_m).ceil() + 1.0;
        if num_passes_f.is_finite() && num_passes_f <= MAX_PASSES as f64 {
            Some(num_passes_f as usize)
        } else {
            None
        }
    }

    fn generate(&self) -> Vec<Waypoint> {
        let c = &self.config;

        let num_passes = match self.sweep() {
            Some(n) => n,
            None => {
                error!(
                    "Cannot generate a pattern for area size {} m and step distance {} m \
                    (at most {} passes)",
                    c.area_size_m, c.step_distance_m, MAX_PASSES
                );
                return Vec::new();
            }
        };

        let half_m = c.area_size_m / 2.0;
        let (west_m, east_m) = (c.center.east_m - half_m, c.center.east_m + half_m);
        let (first_m, last_m) = if c.start_from_bottom {
            (c.center.north_m - half_m, c.center.north_m + half_m)
        } else {
            (c.center.north_m + half_m, c.center.north_m - half_m)
        };

        let point = |east: f64, north: f64| LocalPosition::new(east, c.altitude_m, north);
        let mut waypoints = Vec::with_capacity(num_passes.checked_mul(3).unwrap_or(0));

        for i in 0..num_passes {
            let t = i as f64 / (num_passes - 1) as f64;
            let north_m = lerp_clamped(first_m, last_m, t);

            let west_to_east = (i % 2 == 0) == c.left_to_right_first;
            let (start_m, end_m) = if west_to_east {
                (west_m, east_m)
            } else {
                (east_m, west_m)
            };

            waypoints.push(Waypoint::labelled(
                point(start_m, north_m),
                format!("pass {} start", i),
            ));
            waypoints.push(Waypoint::labelled(
                point(end_m, north_m),
                format!("pass {} end", i),
            ));

            if i + 1 < num_passes && c.turn_radius_m > 0.0 {
                let next_north_m =
                    lerp_clamped(first_m, last_m, (i + 1) as f64 / (num_passes - 1) as f64);
                let turn = point(end_m, north_m).midpoint(&point(end_m, next_north_m));
                waypoints.push(Waypoint::labelled(turn, format!("turn {}", i)));
            }
        }

        debug!("Generated {} waypoints", waypoints.len());

        waypoints
    }
}

// ------------------------------------------------------------------------------------------------
// TESTS
// ------------------------------------------------------------------------------------------------

#[cfg(test)]
mod test {
    use super::*;
    use crate::{
        flt_ctrl::VehicleController,
        nav::{NavParams, Navigator, WaypointQueue},
    };

    const EPS: f64 = 1e-9;

    fn mission_config() -> SearchAreaConfig {
        SearchAreaConfig {
            area_size_m: 100.0,
            altitude_m: 50.0,
            sensor_width_m: 20.0,
            overlap_percent: 10.0,
            optimize_for_coverage: true,
            ..Default::default()
        }
    }

    #[test]
    fn test_coverage_formula() {
        let pattern = LawnmowerPattern::new(mission_config());

        assert!((pattern.effective_step_m().unwrap() - 18.0).abs() < EPS);
        assert_eq!(pattern.num_passes(), 7);
        assert!((pattern.calculate_coverage() - 100.0).abs() < EPS);
    }

    #[test]
    fn test_low_coverage() {
        let pattern = LawnmowerPattern::new(SearchAreaConfig {
            step_distance_m: 20.0,
            sensor_width_m: 5.0,
            overlap_percent: 0.0,
            optimize_for_coverage: false,
            ..Default::default()
        });

        // 5 passes of 5 m over 100 m
        assert!((pattern.calculate_coverage() - 25.0).abs() < EPS);
        assert_eq!(pattern.generate_waypoints().len(), 12);
    }

    #[test]
    fn test_optimised_step_clamped() {
        let pattern = LawnmowerPattern::new(SearchAreaConfig {
            area_size_m: 10.0,
            sensor_width_m: 40.0,
            overlap_percent: 0.0,
            optimize_for_coverage: true,
            ..Default::default()
        });

        assert!((pattern.effective_step_m().unwrap() - 9.0).abs() < EPS);
        assert_eq!(pattern.num_passes(), 3);
    }

    #[test]
    fn test_degenerate_inputs() {
        for config in [
            SearchAreaConfig {
                area_size_m: 0.0,
                ..mission_config()
            },
            SearchAreaConfig {
                step_distance_m: 0.0,
                ..mission_config()
            },
            SearchAreaConfig {
                area_size_m: -10.0,
                step_distance_m: std::f64::NAN,
                ..mission_config()
            },
        ]
        .iter()
        {
            let pattern = LawnmowerPattern::new(config.clone());
            assert!(pattern.generate_waypoints().is_empty());
            assert_eq!(pattern.calculate_coverage(), 0.0);
            assert_eq!(pattern.num_passes(), 0);
        }
    }

    #[test]
    fn test_excessive_pass_count() {
        for config in [
            SearchAreaConfig {
                area_size_m: 1e300,
                step_distance_m: 1.0,
                optimize_for_coverage: false,
                ..mission_config()
            },
            SearchAreaConfig {
                area_size_m: 1000.0,
                step_distance_m: 1e-6,
                optimize_for_coverage: false,
                ..mission_config()
            },
        ]
        .iter()
        {
            let mut pattern = LawnmowerPattern::new(config.clone());
            assert!(pattern.effective_step_m().is_some());
            assert_eq!(pattern.num_passes(), 0);
            assert!(pattern.generate_waypoints().is_empty());
            assert_eq!(pattern.calculate_coverage(), 0.0);

            let mut queue = WaypointQueue::default();
            let generated = pattern.execute(&mut queue).unwrap();
            assert!(generated.waypoints.is_empty());
            assert_eq!(generated.coverage_percent, 0.0);
            assert!(queue.is_empty());
        }

        // Exactly at the limit is still generated
        let pattern = LawnmowerPattern::new(SearchAreaConfig {
            area_size_m: (MAX_PASSES - 1) as f64,
            step_distance_m: 1.0,
            overlap_percent: 0.0,
            optimize_for_coverage: false,
            turn_radius_m: 0.0,
            ..mission_config()
        });
        assert_eq!(pattern.num_passes(), MAX_PASSES);
        assert_eq!(pattern.generate_waypoints().len(), 2 * MAX_PASSES);
    }

    #[test]
    fn test_geometry() {
        let pattern = LawnmowerPattern::new(SearchAreaConfig {
            center: LocalPosition::new(10.0, 0.0, -20.0),
            ..mission_config()
        });
        let wps = pattern.generate_waypoints();

        assert_eq!(wps.len(), 14);
        assert_eq!(wps[0], LocalPosition::new(-40.0, 50.0, -70.0));
        assert_eq!(wps[1], LocalPosition::new(60.0, 50.0, -70.0));

        // Second pass flown back from the east edge
        assert_eq!(wps[2].east_m, 60.0);
        assert_eq!(wps[3].east_m, -40.0);
        assert!((wps[2].north_m - (-70.0 + 100.0 / 6.0)).abs() < EPS);

        // Last pass on the far edge
        assert!((wps[13].north_m - 30.0).abs() < EPS);

        for wp in wps.iter() {
            assert_eq!(wp.up_m, 50.0);
            assert!(wp.east_m >= -40.0 - EPS && wp.east_m <= 60.0 + EPS);
            assert!(wp.north_m >= -70.0 - EPS && wp.north_m <= 30.0 + EPS);
        }
    }

    #[test]
    fn test_direction_flags() {
        let pattern = LawnmowerPattern::new(SearchAreaConfig {
            start_from_bottom: false,
            left_to_right_first: false,
            ..mission_config()
        });
        let wps = pattern.generate_waypoints();

        assert_eq!(wps[0], LocalPosition::new(50.0, 50.0, 50.0));
        assert_eq!(wps[1], LocalPosition::new(-50.0, 50.0, 50.0));
        assert!((wps[wps.len() - 1].north_m + 50.0).abs() < EPS);
    }

    #[test]
    fn test_turn_waypoints() {
        let pattern = LawnmowerPattern::new(SearchAreaConfig {
            turn_radius_m: 5.0,
            ..mission_config()
        });
        let wps = pattern.generate_waypoints();

        // 7 passes and 6 turns
        assert_eq!(wps.len(), 20);

        let turn = wps[2];
        let expected = wps[1].midpoint(&wps[3]);
        assert!(turn.distance_to(&expected) < EPS);
        assert_eq!(turn.east_m, 50.0);
    }

    #[test]
    fn test_execute_into_queue() {
        let mut pattern = LawnmowerPattern::new(mission_config());
        let rx = pattern.subscribe();
        let mut queue = WaypointQueue::default();

        let generated = pattern.execute(&mut queue).unwrap();

        assert_eq!(queue.len(), generated.waypoints.len());
        assert_eq!(queue.peek().map(|wp| wp.position), Some(generated.waypoints[0]));
        assert_eq!(queue.peek().and_then(|wp| wp.label.clone()).as_deref(), Some("pass 0 start"));

        let events: Vec<_> = rx.try_iter().collect();
        assert_eq!(
            events,
            vec![
                PatternEvent::WaypointsGenerated(generated.waypoints.clone()),
                PatternEvent::CoverageCalculated(generated.coverage_percent),
            ]
        );
    }

    #[test]
    fn test_execute_into_navigator() {
        let mut pattern = LawnmowerPattern::new(mission_config());
        let mut nav = Navigator::new(NavParams::default(), VehicleController::default());

        let generated = pattern.execute(&mut nav).unwrap();

        assert!(nav.is_navigating());
        assert_eq!(
            nav.session().map(|s| s.current_target),
            Some(generated.waypoints[0])
        );
        assert_eq!(nav.queue().len(), generated.waypoints.len() - 1);
    }
}
