//! Parameters for the navigation module

// ------------------------------------------------------------------------------------------------
// IMPORTS
// ------------------------------------------------------------------------------------------------

use serde::{Deserialize, Serialize};

use crate::geo::GeoCoordinate;

// ------------------------------------------------------------------------------------------------
// STRUCTS
// ------------------------------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct NavParams {
    /// Geographic origin of the local frame.
    pub origin: GeoCoordinate,

    /// Altitude given to targets converted from geographic coordinates.
    ///
    /// Units: meters
    pub cruise_altitude_m: f64,

    /// Targets closer than this raise a warning, but are still flown to.
    ///
    /// Units: meters
    pub min_mission_distance_m: f64,

    /// Distance at which the navigator considers a target reached.
    ///
    /// Units: meters
    pub reach_threshold_m: f64,

    /// Distance at which the waypoint queue considers its current target reached.
    ///
    /// Units: meters
    pub queue_reach_threshold_m: f64,

    /// If true marking a queue target as reached immediately dequeues the next one.
    pub auto_advance: bool,
}

// ------------------------------------------------------------------------------------------------
// IMPLS
// ------------------------------------------------------------------------------------------------

impl Default for NavParams {
    fn default() -> Self {
        Self {
            origin: GeoCoordinate::default(),
            cruise_altitude_m: 50.0,
            min_mission_distance_m: 150.0,
            reach_threshold_m: 5.0,
            queue_reach_threshold_m: 2.0,
            auto_advance: true,
        }
    }
}

// ------------------------------------------------------------------------------------------------
// TESTS
// ------------------------------------------------------------------------------------------------

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_load_partial() {
        let params: NavParams = util::params::from_str(
            r#"
            reach_threshold_m = 3.0

            [origin]
            latitude_deg = 51.5
            longitude_deg = -0.12
            "#,
        )
        .unwrap();

        assert_eq!(params.reach_threshold_m, 3.0);
        assert_eq!(params.origin, GeoCoordinate::new(51.5, -0.12));
        assert_eq!(params.min_mission_distance_m, 150.0);
        assert!(params.auto_advance);
    }
}
