//! Search area configuration for the lawnmower pattern

// ------------------------------------------------------------------------------------------------
// IMPORTS
// ------------------------------------------------------------------------------------------------

use log::warn;
use serde::{Deserialize, Serialize};

use crate::geo::LocalPosition;

// ------------------------------------------------------------------------------------------------
// CONSTANTS
// ------------------------------------------------------------------------------------------------

pub const MIN_AREA_SIZE_M: f64 = 1.0;
pub const MIN_STEP_DISTANCE_M: f64 = 0.1;
pub const MIN_SENSOR_WIDTH_M: f64 = 0.1;
pub const MAX_OVERLAP_PERCENT: f64 = 50.0;

// ------------------------------------------------------------------------------------------------
// STRUCTS
// ------------------------------------------------------------------------------------------------

/// Description of the square area to sweep.
///
/// Fields loaded from a file are used as is. The setters clamp their inputs into the valid range.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SearchAreaConfig {
    /// Centre of the area. The vertical component is ignored.
    pub center: LocalPosition,

    /// Length of the side of the square.
    ///
    /// Units: meters
    pub area_size_m: f64,

    /// Units: meters
    pub altitude_m: f64,

    /// Spacing between passes before overlap is applied.
    ///
    /// Units: meters
    pub step_distance_m: f64,

    /// Units: percent
    pub overlap_percent: f64,

    /// Width of ground seen by the sensor on a single pass.
    ///
    /// Units: meters
    pub sensor_width_m: f64,

    /// If true passes are laid from the south edge northwards.
    pub start_from_bottom: bool,

    /// If true the first pass is flown west to east.
    pub left_to_right_first: bool,

    /// If greater than zero a turn waypoint is placed between passes.
    ///
    /// Units: meters
    pub turn_radius_m: f64,

    /// If true the pass spacing is derived from the sensor width rather than the step distance.
    pub optimize_for_coverage: bool,
}

// ------------------------------------------------------------------------------------------------
// IMPLS
// ------------------------------------------------------------------------------------------------

impl Default for SearchAreaConfig {
    fn default() -> Self {
        Self {
            center: LocalPosition::default(),
            area_size_m: 100.0,
            altitude_m: 50.0,
            step_distance_m: 20.0,
            overlap_percent: 10.0,
            sensor_width_m: 20.0,
            start_from_bottom: true,
            left_to_right_first: true,
            turn_radius_m: 0.0,
            optimize_for_coverage: false,
        }
    }
}

impl SearchAreaConfig {
    pub fn set_center(&mut self, center: LocalPosition) {
        self.center = center;
    }

    pub fn set_area_size(&mut self, area_size_m: f64) {
        self.area_size_m = at_least("area size", area_size_m, MIN_AREA_SIZE_M);
    }

    pub fn set_altitude(&mut self, altitude_m: f64) {
        self.altitude_m = altitude_m;
    }

    pub fn set_step_distance(&mut self, step_distance_m: f64) {
        self.step_distance_m = at_least("step distance", step_distance_m, MIN_STEP_DISTANCE_M);
    }

    pub fn set_overlap_percent(&mut self, overlap_percent: f64) {
        let clamped = if overlap_percent.is_nan() {
            0.0
        } else {
            overlap_percent.max(0.0).min(MAX_OVERLAP_PERCENT)
        };

        if clamped != overlap_percent {
            warn!("Overlap {} % clamped to {} %", overlap_percent, clamped);
        }
        self.overlap_percent = clamped;
    }

    pub fn set_sensor_width(&mut self, sensor_width_m: f64) {
        self.sensor_width_m = at_least("sensor width", sensor_width_m, MIN_SENSOR_WIDTH_M);
    }

    pub fn set_turn_radius(&mut self, turn_radius_m: f64) {
        self.turn_radius_m = at_least("turn radius", turn_radius_m, 0.0);
    }

    pub fn set_start_from_bottom(&mut self, start_from_bottom: bool) {
        self.start_from_bottom = start_from_bottom;
    }

    pub fn set_left_to_right_first(&mut self, left_to_right_first: bool) {
        self.left_to_right_first = left_to_right_first;
    }

    pub fn set_optimize_for_coverage(&mut self, optimize_for_coverage: bool) {
        self.optimize_for_coverage = optimize_for_coverage;
    }
}

/// Clamp a value to a lower bound, warning if it changed. NaN becomes the bound.
fn at_least(name: &str, value: f64, min: f64) -> f64 {
    if value >= min {
        value
    } else {
        warn!("Search area {} {} clamped to {}", name, value, min);
        min
    }
}

// ------------------------------------------------------------------------------------------------
// TESTS
// ------------------------------------------------------------------------------------------------

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_setters_clamp() {
        let mut config = SearchAreaConfig::default();

        config.set_area_size(0.0);
        assert_eq!(config.area_size_m, MIN_AREA_SIZE_M);
        config.set_area_size(250.0);
        assert_eq!(config.area_size_m, 250.0);

        config.set_step_distance(-3.0);
        assert_eq!(config.step_distance_m, MIN_STEP_DISTANCE_M);

        config.set_overlap_percent(75.0);
        assert_eq!(config.overlap_percent, 50.0);
        config.set_overlap_percent(-5.0);
        assert_eq!(config.overlap_percent, 0.0);
        config.set_overlap_percent(std::f64::NAN);
        assert_eq!(config.overlap_percent, 0.0);

        config.set_sensor_width(std::f64::NAN);
        assert_eq!(config.sensor_width_m, MIN_SENSOR_WIDTH_M);

        config.set_turn_radius(-1.0);
        assert_eq!(config.turn_radius_m, 0.0);
    }

    #[test]
    fn test_load_partial() {
        let config: SearchAreaConfig = util::params::from_str(
            r#"
            area_size_m = 200.0
            optimize_for_coverage = true

            [center]
            east_m = 10.0
            up_m = 0.0
            north_m = -5.0
            "#,
        )
        .unwrap();

        assert_eq!(config.area_size_m, 200.0);
        assert!(config.optimize_for_coverage);
        assert_eq!(config.center, LocalPosition::new(10.0, 0.0, -5.0));
        assert_eq!(config.sensor_width_m, 20.0);
    }
}
