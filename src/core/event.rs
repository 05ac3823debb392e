//! Scalar earthquake descriptor.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Mean Earth radius (km)
const EARTH_RADIUS_KM: f64 = 6371.0;

/// Flattened event: one origin, one magnitude.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScalarEvent {
    pub id: String,
    /// Origin time
    pub time: DateTime<Utc>,
    pub latitude: f64,
    pub longitude: f64,
    /// Hypocentral depth (km)
    pub depth_km: f64,
    pub magnitude: f64,
    #[serde(default)]
    pub magnitude_type: Option<String>,
}

impl ScalarEvent {
    pub fn new(
        id: &str,
        time: DateTime<Utc>,
        latitude: f64,
        longitude: f64,
        depth_km: f64,
        magnitude: f64,
        magnitude_type: Option<&str>,
    ) -> Self {
        Self {
            id: id.to_string(),
            time,
            latitude,
            longitude,
            depth_km,
            magnitude,
            magnitude_type: magnitude_type.map(|s| s.to_string()),
        }
    }

    /// Great-circle epicentral distance to a point (km), haversine formula.
    pub fn epicentral_distance_km(&self, latitude: f64, longitude: f64) -> f64 {
        let (lat1, lon1) = (self.latitude.to_radians(), self.longitude.to_radians());
        let (lat2, lon2) = (latitude.to_radians(), longitude.to_radians());
        let dlat = lat2 - lat1;
        let dlon = lon2 - lon1;
        let a = (dlat / 2.0).sin().powi(2)
            + lat1.cos() * lat2.cos() * (dlon / 2.0).sin().powi(2);
        2.0 * EARTH_RADIUS_KM * a.sqrt().asin()
    }

    /// Straight-line hypocentral distance to a surface point (km).
    pub fn hypocentral_distance_km(&self, latitude: f64, longitude: f64) -> f64 {
        let epi = self.epicentral_distance_km(latitude, longitude);
        (epi * epi + self.depth_km * self.depth_km).sqrt()
    }
}
