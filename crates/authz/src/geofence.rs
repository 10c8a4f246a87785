//! Great-circle distance and geofence membership.
//!
//! Everything here is pure: no I/O, no clock, no shared state.

use serde::{Deserialize, Serialize};

use crate::error::{AuthzError, Result};

/// Earth's mean radius in kilometres.
pub const EARTH_RADIUS_KM: f64 = 6371.0;

/// A validated point on Earth.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Coordinate {
    lat: f64,
    lng: f64,
}

impl Coordinate {
    /// Creates a coordinate from degrees.
    ///
    /// # Errors
    ///
    /// Returns [`AuthzError::InvalidCoordinates`] unless both values are finite,
    /// `lat` is within `-90..=90` and `lng` is within `-180..=180`.
    pub fn new(lat: f64, lng: f64) -> Result<Self> {
        let valid = lat.is_finite()
            && lng.is_finite()
            && (-90.0..=90.0).contains(&lat)
            && (-180.0..=180.0).contains(&lng);
        if !valid {
            return Err(AuthzError::InvalidCoordinates { lat, lng });
        }
        Ok(Self { lat, lng })
    }

    /// Latitude in degrees.
    #[must_use]
    pub fn lat(&self) -> f64 {
        self.lat
    }

    /// Longitude in degrees.
    #[must_use]
    pub fn lng(&self) -> f64 {
        self.lng
    }
}

/// Haversine distance between two points, in kilometres.
#[must_use]
pub fn distance_km(a: Coordinate, b: Coordinate) -> f64 {
    let (lat1, lat2) = (a.lat.to_radians(), b.lat.to_radians());
    let dlat = lat2 - lat1;
    let dlng = (b.lng - a.lng).to_radians();

    let h = (dlat / 2.0).sin().powi(2) + lat1.cos() * lat2.cos() * (dlng / 2.0).sin().powi(2);
    // Rounding can push h a hair past 1 for antipodal points.
    2.0 * EARTH_RADIUS_KM * h.sqrt().min(1.0).asin()
}

/// Inclusive range test: a point exactly on the boundary is inside.
#[must_use]
pub fn within(distance_km: f64, max_distance_km: f64) -> bool {
    distance_km <= max_distance_km
}

/// Outcome of checking a reported location against a [`Geofence`].
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum GeofenceVerdict {
    /// Close enough and precise enough.
    Inside {
        /// Distance from the center.
        distance_km: f64,
    },
    /// Too far from the center.
    OutOfRange {
        /// Distance from the center.
        distance_km: f64,
    },
    /// The reported accuracy radius is too large to trust the point.
    Inaccurate {
        /// Reported accuracy radius in meters.
        accuracy_m: f64,
    },
}

impl GeofenceVerdict {
    /// Returns `true` for [`GeofenceVerdict::Inside`].
    #[must_use]
    pub fn is_inside(&self) -> bool {
        matches!(self, Self::Inside { .. })
    }

    /// Converts a rejection into the matching [`AuthzError`].
    ///
    /// # Errors
    ///
    /// Returns [`AuthzError::OutOfRange`] or [`AuthzError::InaccurateLocation`]
    /// for the corresponding verdicts.
    pub fn into_result(self) -> Result<f64> {
        match self {
            Self::Inside { distance_km } => Ok(distance_km),
            Self::OutOfRange { distance_km } => Err(AuthzError::OutOfRange { distance_km }),
            Self::Inaccurate { accuracy_m } => Err(AuthzError::InaccurateLocation { accuracy_m }),
        }
    }
}

/// A circular region with a precision requirement.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Geofence {
    center: Coordinate,
    max_distance_km: f64,
    max_accuracy_m: f64,
}

impl Geofence {
    /// Creates a geofence around `center`.
    #[must_use]
    pub fn new(center: Coordinate, max_distance_km: f64, max_accuracy_m: f64) -> Self {
        Self { center, max_distance_km, max_accuracy_m }
    }

    /// The center point.
    #[must_use]
    pub fn center(&self) -> Coordinate {
        self.center
    }

    /// The radius in kilometres.
    #[must_use]
    pub fn max_distance_km(&self) -> f64 {
        self.max_distance_km
    }

    /// The largest accepted accuracy radius in meters.
    #[must_use]
    pub fn max_accuracy_m(&self) -> f64 {
        self.max_accuracy_m
    }

    /// Checks `point`, reported with an accuracy radius of `accuracy_m`.
    ///
    /// Accuracy is checked first: an imprecise fix is rejected even if it
    /// happens to land inside. A negative or non-finite accuracy counts as
    /// imprecise.
    #[must_use]
    pub fn evaluate(&self, point: Coordinate, accuracy_m: f64) -> GeofenceVerdict {
        if !accuracy_m.is_finite() || accuracy_m < 0.0 || accuracy_m > self.max_accuracy_m {
            return GeofenceVerdict::Inaccurate { accuracy_m };
        }

        let distance_km = distance_km(self.center, point);
        if within(distance_km, self.max_distance_km) {
            GeofenceVerdict::Inside { distance_km }
        } else {
            GeofenceVerdict::OutOfRange { distance_km }
        }
    }
}
