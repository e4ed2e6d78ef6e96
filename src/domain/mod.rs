//! Core travel result types shared by the streaming and caching layers.
//!
//! A generation run produces one [`ResultSet`]: optional [`CityMetadata`] plus
//! a unified list of [`Poi`]s. Domain-specific views never store their own
//! copy of the truth; they are projections of the unified set computed through
//! a [`CategoryTable`].

mod projection;

pub use projection::{CategoryTable, project};

use std::collections::{BTreeMap, HashSet};
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// One of the four result categories a request can be routed to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Domain {
    /// Full trip plan; projects to the whole unified set.
    Itinerary,
    /// Hotels, hostels and other places to stay.
    #[serde(alias = "accommodation", alias = "hotels")]
    Lodging,
    /// Restaurants, cafes and bars.
    #[serde(alias = "restaurants")]
    Dining,
    /// Sights, museums, parks and tours.
    Activities,
}

impl Domain {
    /// All domains in a stable order.
    pub const ALL: [Domain; 4] = [
        Domain::Itinerary,
        Domain::Lodging,
        Domain::Dining,
        Domain::Activities,
    ];

    /// Stable lowercase name used in URLs and logs.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Domain::Itinerary => "itinerary",
            Domain::Lodging => "lodging",
            Domain::Dining => "dining",
            Domain::Activities => "activities",
        }
    }

    /// Page a client should open once results for this domain are ready.
    #[must_use]
    pub fn results_path(self) -> &'static str {
        match self {
            Domain::Itinerary => "/itinerary",
            Domain::Lodging => "/hotels",
            Domain::Dining => "/restaurants",
            Domain::Activities => "/activities",
        }
    }

    /// Navigation URL for the results page of `session_id`.
    #[must_use]
    pub fn navigation_url(self, session_id: &str) -> String {
        format!("{}?sessionId={session_id}", self.results_path())
    }
}

impl fmt::Display for Domain {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Error returned when a string does not name a [`Domain`].
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown domain: {0}")]
pub struct UnknownDomain(pub String);

impl FromStr for Domain {
    type Err = UnknownDomain;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "itinerary" => Ok(Domain::Itinerary),
            "lodging" | "accommodation" | "hotels" => Ok(Domain::Lodging),
            "dining" | "restaurants" => Ok(Domain::Dining),
            "activities" => Ok(Domain::Activities),
            other => Err(UnknownDomain(other.to_string())),
        }
    }
}

/// Latitude/longitude pair in decimal degrees.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GeoPoint {
    pub lat: f64,
    pub lon: f64,
}

impl GeoPoint {
    const EARTH_RADIUS_KM: f64 = 6371.0;

    /// Great-circle distance to `other` in kilometres.
    #[must_use]
    pub fn distance_km(&self, other: &GeoPoint) -> f64 {
        let (lat1, lat2) = (self.lat.to_radians(), other.lat.to_radians());
        let dlat = (other.lat - self.lat).to_radians();
        let dlon = (other.lon - self.lon).to_radians();

        let a = (dlat / 2.0).sin().powi(2) + lat1.cos() * lat2.cos() * (dlon / 2.0).sin().powi(2);
        2.0 * Self::EARTH_RADIUS_KM * a.sqrt().asin()
    }
}

/// A single point of interest produced by the generation engine.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Poi {
    pub id: String,
    pub name: String,
    /// Free text; compared case-insensitively against the category table.
    pub category: String,
    pub geo: GeoPoint,
    #[serde(default)]
    pub rating: f32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub address: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub website: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cuisine_type: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub price_level: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub price_range: Option<String>,
    /// Day name to opening-hours text.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub opening_hours: BTreeMap<String, String>,
}

/// General information about the destination city.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CityMetadata {
    pub city: String,
    #[serde(default)]
    pub country: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub center: Option<GeoPoint>,
}

/// Unified result of one generation run.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResultSet {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub city: Option<CityMetadata>,
    #[serde(default)]
    pub points_of_interest: Vec<Poi>,
}

impl ResultSet {
    /// Add a POI unless one with the same id is already present.
    ///
    /// Returns `true` when the POI was inserted.
    pub fn push_unique(&mut self, poi: Poi) -> bool {
        if self.points_of_interest.iter().any(|p| p.id == poi.id) {
            return false;
        }
        self.points_of_interest.push(poi);
        true
    }

    /// Reconstruct a result set from a raw stored generation result.
    ///
    /// Returns `None` when `raw` is not a recognizable result; callers treat
    /// that exactly like a missing record.
    #[must_use]
    pub fn from_raw(raw: &str) -> Option<Self> {
        let parsed: RawGenerationResult = serde_json::from_str(raw).ok()?;
        Some(parsed.into_result_set())
    }

    /// Serialize into the raw stored form understood by [`ResultSet::from_raw`].
    pub fn to_raw(&self) -> serde_json::Result<String> {
        serde_json::to_string(&RawGenerationResult {
            city: self.city.clone(),
            points_of_interest: self.points_of_interest.clone(),
            ..RawGenerationResult::default()
        })
    }

    pub fn len(&self) -> usize {
        self.points_of_interest.len()
    }

    pub fn is_empty(&self) -> bool {
        self.points_of_interest.is_empty()
    }
}

/// Stored generation output. Older records split POIs per domain.
#[derive(Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawGenerationResult {
    #[serde(default, alias = "generalCityData", skip_serializing_if = "Option::is_none")]
    city: Option<CityMetadata>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    points_of_interest: Vec<Poi>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    hotels: Vec<Poi>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    restaurants: Vec<Poi>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    activities: Vec<Poi>,
}

impl RawGenerationResult {
    fn into_result_set(self) -> ResultSet {
        let mut seen = HashSet::new();
        let points_of_interest = self
            .points_of_interest
            .into_iter()
            .chain(self.hotels)
            .chain(self.restaurants)
            .chain(self.activities)
            .filter(|poi| seen.insert(poi.id.clone()))
            .collect();

        ResultSet {
            city: self.city,
            points_of_interest,
        }
    }
}


#[cfg(test)]
mod tests {
    use super::fixtures::poi;
    use super::*;

    #[test]
    fn test_domain_parsing_accepts_aliases() {
        assert_eq!("accommodation".parse::<Domain>(), Ok(Domain::Lodging));
        assert_eq!("Restaurants".parse::<Domain>(), Ok(Domain::Dining));
        assert!("nightlife".parse::<Domain>().is_err());
    }

    #[test]
    fn test_navigation_url() {
        assert_eq!(
            Domain::Dining.navigation_url("abc"),
            "/restaurants?sessionId=abc"
        );
    }

    #[test]
    fn test_from_raw_merges_legacy_arrays() {
        let raw = serde_json::json!({
            "generalCityData": { "city": "Lisbon", "country": "Portugal" },
            "pointsOfInterest": [poi("a", "museum")],
            "hotels": [poi("b", "hotel")],
            "restaurants": [poi("c", "restaurant"), poi("a", "museum")],
        })
        .to_string();

        let set = ResultSet::from_raw(&raw).unwrap();
        assert_eq!(set.city.unwrap().city, "Lisbon");
        let ids: Vec<_> = set.points_of_interest.iter().map(|p| p.id.as_str()).collect();
        assert_eq!(ids, vec!["a", "b", "c"]);
    }

    #[test]
    fn test_from_raw_rejects_garbage() {
        assert!(ResultSet::from_raw("not json").is_none());
        assert!(ResultSet::from_raw("[1, 2, 3]").is_none());
    }

    #[test]
    fn test_distance() {
        let barcelona = GeoPoint { lat: 41.3851, lon: 2.1734 };
        let madrid = GeoPoint { lat: 40.4168, lon: -3.7038 };
        let d = barcelona.distance_km(&madrid);
        assert!((d - 505.0).abs() < 10.0, "got {d}");
    }
}
