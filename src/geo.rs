//! Geodesic primitives.
//!
//! Coordinates are WGS84 decimal degrees. Distances use the haversine formula
//! on a spherical earth with the IUGG mean radius, which is accurate to well
//! under a meter at geofence scales.

use serde::{Deserialize, Serialize};

/// Mean earth radius in meters (IUGG).
pub const EARTH_RADIUS_M: f64 = 6_371_008.8;

/// A point on the earth's surface.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Coordinate {
    /// Latitude in decimal degrees, [-90, 90].
    pub latitude: f64,
    /// Longitude in decimal degrees, [-180, 180].
    pub longitude: f64,
}

impl Coordinate {
    /// Creates a coordinate without validation.
    #[must_use]
    pub const fn new(latitude: f64, longitude: f64) -> Self {
        Self { latitude, longitude }
    }

    /// Returns true if both components are finite.
    #[must_use]
    pub fn is_finite(&self) -> bool {
        self.latitude.is_finite() && self.longitude.is_finite()
    }

    /// Returns true if the coordinate is finite and within WGS84 bounds.
    #[must_use]
    pub fn is_valid(&self) -> bool {
        self.is_finite()
            && (-90.0..=90.0).contains(&self.latitude)
            && (-180.0..=180.0).contains(&self.longitude)
    }

    /// Great-circle distance to `other` in meters.
    #[must_use]
    pub fn distance_to(&self, other: &Self) -> f64 {
        haversine_m(self, other)
    }

    /// The point reached by travelling `distance_m` meters from `self` on
    /// the initial `bearing_deg` (clockwise from north).
    #[must_use]
    pub fn offset(&self, distance_m: f64, bearing_deg: f64) -> Self {
        let delta = distance_m / EARTH_RADIUS_M;
        let theta = bearing_deg.to_radians();
        let phi1 = self.latitude.to_radians();
        let lambda1 = self.longitude.to_radians();

        let phi2 = (phi1.sin() * delta.cos() + phi1.cos() * delta.sin() * theta.cos()).asin();
        let lambda2 = lambda1
            + (theta.sin() * delta.sin() * phi1.cos()).atan2(delta.cos() - phi1.sin() * phi2.sin());

        // Normalize to [-180, 180).
        let lon = (lambda2.to_degrees() + 540.0).rem_euclid(360.0) - 180.0;
        Self::new(phi2.to_degrees(), lon)
    }
}

/// Haversine distance between two coordinates in meters.
#[must_use]
pub fn haversine_m(a: &Coordinate, b: &Coordinate) -> f64 {
    let phi1 = a.latitude.to_radians();
    let phi2 = b.latitude.to_radians();
    let d_phi = (b.latitude - a.latitude).to_radians();
    let d_lambda = (b.longitude - a.longitude).to_radians();

    let h = (d_phi / 2.0).sin().powi(2) + phi1.cos() * phi2.cos() * (d_lambda / 2.0).sin().powi(2);
    // Clamp guards against h drifting past 1.0 for antipodal points.
    let c = 2.0 * h.sqrt().min(1.0).asin();
    EARTH_RADIUS_M * c
}
