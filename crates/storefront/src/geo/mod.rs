//! Postal code geolocation.
//!
//! A [`Geocoder`] turns a postal code into [`Coordinates`]. Lookups are best
//! effort: callers get `None` when the code is too short, unknown, or the
//! collaborator fails, and shipping treats that as a pending distance.

mod nominatim;

pub use nominatim::NominatimGeocoder;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Mean Earth radius used by the haversine formula.
pub const EARTH_RADIUS_KM: f64 = 6371.0;

/// Postal codes shorter than this are not looked up.
pub const MIN_POSTAL_CODE_LEN: usize = 4;

/// A point in decimal degrees.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Coordinates {
    pub latitude: f64,
    pub longitude: f64,
}

impl Coordinates {
    #[must_use]
    pub const fn new(latitude: f64, longitude: f64) -> Self {
        Self {
            latitude,
            longitude,
        }
    }

    /// Whether both components are finite and within range.
    #[must_use]
    pub fn is_valid(&self) -> bool {
        self.latitude.is_finite()
            && self.longitude.is_finite()
            && (-90.0..=90.0).contains(&self.latitude)
            && (-180.0..=180.0).contains(&self.longitude)
    }
}

/// Great-circle distance between two points, in kilometres.
#[must_use]
pub fn haversine_km(a: Coordinates, b: Coordinates) -> f64 {
    let d_lat = (b.latitude - a.latitude).to_radians();
    let d_lon = (b.longitude - a.longitude).to_radians();

    let h = (d_lat / 2.0).sin().powi(2)
        + a.latitude.to_radians().cos() * b.latitude.to_radians().cos() * (d_lon / 2.0).sin().powi(2);
    let c = 2.0 * h.sqrt().atan2((1.0 - h).sqrt());

    EARTH_RADIUS_KM * c
}

/// Errors from a geocoding lookup. Never surfaced to callers of
/// [`Geocoder::locate`]; logged and turned into `None`.
#[derive(Debug, Error)]
pub enum GeocodeError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Geocoder returned status {0}")]
    Status(u16),

    #[error("Invalid coordinates in response: {0}")]
    InvalidCoordinates(String),
}

/// Resolves postal codes to coordinates.
pub trait Geocoder: Send + Sync {
    /// Locate a postal code. Returns `None` when it cannot be resolved.
    async fn locate(&self, postal_code: &str) -> Option<Coordinates>;
}

/// Normalise a postal code for lookup, or `None` if it is too short.
#[must_use]
pub fn normalize_postal_code(postal_code: &str) -> Option<String> {
    let code: String = postal_code.chars().filter(|c| !c.is_whitespace()).collect();
    (code.chars().count() >= MIN_POSTAL_CODE_LEN).then_some(code)
}
