//! # Geographic mapping
//!
//! Conversion between geographic coordinates (latitude/longitude) and the
//! local Cartesian frame used by the flight modules.
//!
//! The local frame is anchored at a geographic origin, with axes `east`,
//! `up` and `north` in meters. Conversion uses an equirectangular projection
//! about the origin latitude, which is accurate to well under a meter over the
//! few-kilometer extents flown in a single mission and is exactly invertible.

// ---------------------------------------------------------------------------
// IMPORTS
// ---------------------------------------------------------------------------

use nalgebra::Vector3;
use serde::{Deserialize, Serialize};
use std::fmt;
use util::maths::norm;

// ---------------------------------------------------------------------------
// CONSTANTS
// ---------------------------------------------------------------------------

/// Length of one degree of latitude.
///
/// Units: meters/degree
pub const METERS_PER_DEG_LAT: f64 = 111_320.0;

/// Smallest allowed cosine of the origin latitude, prevents a singular
/// longitude scale for origins at the poles.
const MIN_LON_SCALE: f64 = 1e-9;

// ---------------------------------------------------------------------------
// DATA STRUCTURES
// ---------------------------------------------------------------------------

/// A geographic coordinate in degrees.
#[derive(Debug, Copy, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct GeoCoordinate {
    /// Latitude, valid in [-90, 90].
    ///
    /// Units: degrees
    pub latitude_deg: f64,

    /// Longitude, valid in [-180, 180].
    ///
    /// Units: degrees
    pub longitude_deg: f64,
}

/// A point in the local frame, relative to the geographic origin.
///
/// Units: meters
#[derive(Debug, Copy, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct LocalPosition {
    pub east_m: f64,
    pub up_m: f64,
    pub north_m: f64,
}

/// Converts between geographic coordinates and the local frame of a single
/// mission origin.
#[derive(Debug, Copy, Clone, Serialize, Deserialize)]
pub struct GeoMapper {
    origin: GeoCoordinate,
}

// ---------------------------------------------------------------------------
// IMPLEMENTATIONS
// ---------------------------------------------------------------------------

impl GeoCoordinate {
    pub fn new(latitude_deg: f64, longitude_deg: f64) -> Self {
        Self {
            latitude_deg,
            longitude_deg,
        }
    }

    /// True if the coordinate lies within [-90, 90] x [-180, 180] and is
    /// finite.
    pub fn is_valid(&self) -> bool {
        self.latitude_deg.is_finite()
            && self.longitude_deg.is_finite()
            && (-90.0..=90.0).contains(&self.latitude_deg)
            && (-180.0..=180.0).contains(&self.longitude_deg)
    }
}

impl fmt::Display for GeoCoordinate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({:.6}, {:.6})", self.latitude_deg, self.longitude_deg)
    }
}

impl LocalPosition {
    pub fn new(east_m: f64, up_m: f64, north_m: f64) -> Self {
        Self {
            east_m,
            up_m,
            north_m,
        }
    }

    /// Straight line distance to another position.
    pub fn distance_to(&self, other: &LocalPosition) -> f64 {
        (self.to_vector() - other.to_vector()).norm()
    }

    /// Distance to another position ignoring the vertical axis.
    pub fn horizontal_distance_to(&self, other: &LocalPosition) -> f64 {
        norm(&[self.east_m, self.north_m], &[other.east_m, other.north_m]).unwrap_or(0.0)
    }

    /// Return the same horizontal position at the given height.
    pub fn with_up(&self, up_m: f64) -> Self {
        Self { up_m, ..*self }
    }

    /// Midpoint between two positions.
    pub fn midpoint(&self, other: &LocalPosition) -> Self {
        Self::from_vector(&((self.to_vector() + other.to_vector()) * 0.5))
    }

    /// Convert into a vector with components (east, up, north).
    pub fn to_vector(&self) -> Vector3<f64> {
        Vector3::new(self.east_m, self.up_m, self.north_m)
    }

    /// Build from a vector with components (east, up, north).
    pub fn from_vector(vec: &Vector3<f64>) -> Self {
        Self::new(vec[0], vec[1], vec[2])
    }
}

impl From<Vector3<f64>> for LocalPosition {
    fn from(vec: Vector3<f64>) -> Self {
        Self::from_vector(&vec)
    }
}

impl fmt::Display for LocalPosition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "[E {:.2}, U {:.2}, N {:.2}]",
            self.east_m, self.up_m, self.north_m
        )
    }
}

impl GeoMapper {
    pub fn new(origin: GeoCoordinate) -> Self {
        Self { origin }
    }

    pub fn origin(&self) -> GeoCoordinate {
        self.origin
    }

    /// Convert a geographic coordinate into the local frame, placing it at the
    /// given height.
    pub fn to_local(&self, geo: &GeoCoordinate, up_m: f64) -> LocalPosition {
        gps_to_local(geo, &self.origin, up_m)
    }

    /// Convert a local position back into a geographic coordinate. The
    /// vertical component is discarded.
    pub fn to_geo(&self, pos: &LocalPosition) -> GeoCoordinate {
        local_to_gps(pos, &self.origin)
    }
}

// ---------------------------------------------------------------------------
// FUNCTIONS
// ---------------------------------------------------------------------------

/// Convert a geographic coordinate into the local frame of `origin`.
pub fn gps_to_local(geo: &GeoCoordinate, origin: &GeoCoordinate, up_m: f64) -> LocalPosition {
    LocalPosition {
        east_m: (geo.longitude_deg - origin.longitude_deg) * meters_per_deg_lon(origin),
        up_m,
        north_m: (geo.latitude_deg - origin.latitude_deg) * METERS_PER_DEG_LAT,
    }
}

/// Convert a local position in the frame of `origin` into a geographic
/// coordinate.
pub fn local_to_gps(pos: &LocalPosition, origin: &GeoCoordinate) -> GeoCoordinate {
    GeoCoordinate {
        latitude_deg: origin.latitude_deg + pos.north_m / METERS_PER_DEG_LAT,
        longitude_deg: origin.longitude_deg + pos.east_m / meters_per_deg_lon(origin),
    }
}

/// Length of one degree of longitude at the origin latitude.
fn meters_per_deg_lon(origin: &GeoCoordinate) -> f64 {
    METERS_PER_DEG_LAT * origin.latitude_deg.to_radians().cos().max(MIN_LON_SCALE)
}

// ---------------------------------------------------------------------------
// TESTS
// ---------------------------------------------------------------------------

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_validity() {
        assert!(GeoCoordinate::new(90.0, -180.0).is_valid());
        assert!(GeoCoordinate::new(-45.0, 170.0).is_valid());
        assert!(!GeoCoordinate::new(90.1, 0.0).is_valid());
        assert!(!GeoCoordinate::new(0.0, 180.5).is_valid());
        assert!(!GeoCoordinate::new(std::f64::NAN, 0.0).is_valid());
    }

    #[test]
    fn test_origin_maps_to_zero() {
        let origin = GeoCoordinate::new(50.9, -1.4);
        let pos = gps_to_local(&origin, &origin, 12.0);
        assert_eq!(pos, LocalPosition::new(0.0, 12.0, 0.0));
    }

    #[test]
    fn test_axes() {
        let origin = GeoCoordinate::new(0.0, 0.0);
        let north = gps_to_local(&GeoCoordinate::new(0.001, 0.0), &origin, 0.0);
        assert!((north.north_m - 111.32).abs() < 1e-9);
        assert!(north.east_m.abs() < 1e-12);

        let east = gps_to_local(&GeoCoordinate::new(0.0, 0.001), &origin, 0.0);
        assert!((east.east_m - 111.32).abs() < 1e-9);
        assert!(east.north_m.abs() < 1e-12);
    }

    #[test]
    fn test_round_trip() {
        let origins = [
            GeoCoordinate::new(0.0, 0.0),
            GeoCoordinate::new(50.93, -1.40),
            GeoCoordinate::new(-33.86, 151.21),
            GeoCoordinate::new(78.2, 15.6),
        ];
        let points = [
            GeoCoordinate::new(0.01, -0.02),
            GeoCoordinate::new(50.94, -1.39),
            GeoCoordinate::new(-33.80, 151.0),
            GeoCoordinate::new(89.0, 179.0),
            GeoCoordinate::new(-89.0, -179.0),
        ];

        for origin in origins.iter() {
            let mapper = GeoMapper::new(*origin);
            for g in points.iter() {
                let back = mapper.to_geo(&mapper.to_local(g, 30.0));
                assert!((back.latitude_deg - g.latitude_deg).abs() < 1e-6);
                assert!((back.longitude_deg - g.longitude_deg).abs() < 1e-6);
            }
        }
    }

    #[test]
    fn test_distances() {
        let a = LocalPosition::new(0.0, 0.0, 0.0);
        let b = LocalPosition::new(3.0, 12.0, 4.0);
        assert_eq!(a.horizontal_distance_to(&b), 5.0);
        assert_eq!(a.distance_to(&b), 13.0);
        assert_eq!(a.midpoint(&b), LocalPosition::new(1.5, 6.0, 2.0));
    }
}
