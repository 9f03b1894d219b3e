//! Coarse country classification
//!
//! Six-country bounding-box lookup with an `Other` catch-all. The boxes are
//! deliberately crude; country-bucket factors depend on these exact edges.
//! For production, use a proper geocoding service.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Country {
    #[serde(rename = "US")]
    UnitedStates,
    #[serde(rename = "GB")]
    UnitedKingdom,
    #[serde(rename = "DE")]
    Germany,
    #[serde(rename = "JP")]
    Japan,
    #[serde(rename = "AU")]
    Australia,
    #[serde(rename = "BR")]
    Brazil,
    #[serde(rename = "OTHER")]
    Other,
}

impl Country {
    pub const ALL: [Country; 7] = [
        Country::UnitedStates,
        Country::UnitedKingdom,
        Country::Germany,
        Country::Japan,
        Country::Australia,
        Country::Brazil,
        Country::Other,
    ];

    /// ISO 3166-1 alpha-2 code, or "OTHER"
    pub fn code(&self) -> &'static str {
        match self {
            Country::UnitedStates => "US",
            Country::UnitedKingdom => "GB",
            Country::Germany => "DE",
            Country::Japan => "JP",
            Country::Australia => "AU",
            Country::Brazil => "BR",
            Country::Other => "OTHER",
        }
    }

    /// Parse a code case-insensitively; unrecognized codes map to `Other`
    pub fn from_code(code: &str) -> Self {
        let code = code.trim().to_uppercase();
        Country::ALL
            .iter()
            .copied()
            .find(|c| c.code() == code)
            .unwrap_or(Country::Other)
    }
}

/// Maps a coordinate to a country bucket
pub trait LocationClassifier {
    fn classify(&self, lat: f64, lon: f64) -> Country;
}

/// (lat_min, lat_max, lon_min, lon_max, country)
const COUNTRY_BOUNDS: [(f64, f64, f64, f64, Country); 6] = [
    (24.5, 49.5, -125.0, -66.0, Country::UnitedStates),
    (49.0, 61.0, -8.0, 2.0, Country::UnitedKingdom),
    (47.3, 55.1, 5.9, 15.0, Country::Germany),
    (30.0, 45.5, 129.4, 145.8, Country::Japan),
    (-44.0, -10.0, 113.0, 154.0, Country::Australia),
    (-33.8, 5.3, -73.9, -34.8, Country::Brazil),
];

/// First matching bounding box wins; edges are inclusive
#[derive(Debug, Clone, Copy, Default)]
pub struct BoundingBoxClassifier;

impl LocationClassifier for BoundingBoxClassifier {
    fn classify(&self, lat: f64, lon: f64) -> Country {
        for &(lat_min, lat_max, lon_min, lon_max, country) in COUNTRY_BOUNDS.iter() {
            if lat >= lat_min && lat <= lat_max && lon >= lon_min && lon <= lon_max {
                return country;
            }
        }
        Country::Other
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_classify_major_cities() {
        let c = BoundingBoxClassifier;
        // New York
        assert_eq!(c.classify(40.7128, -74.0060), Country::UnitedStates);
        // London
        assert_eq!(c.classify(51.5074, -0.1278), Country::UnitedKingdom);
        // Frankfurt
        assert_eq!(c.classify(50.1109, 8.6821), Country::Germany);
        // Tokyo
        assert_eq!(c.classify(35.6762, 139.6503), Country::Japan);
        // Sydney
        assert_eq!(c.classify(-33.8688, 151.2093), Country::Australia);
        // São Paulo
        assert_eq!(c.classify(-23.5505, -46.6333), Country::Brazil);
        // Singapore
        assert_eq!(c.classify(1.3521, 103.8198), Country::Other);
    }

    #[test]
    fn test_box_edges_inclusive() {
        let c = BoundingBoxClassifier;
        assert_eq!(c.classify(24.5, -125.0), Country::UnitedStates);
        assert_eq!(c.classify(24.49, -100.0), Country::Other);
    }

    #[test]
    fn test_non_finite_is_other() {
        assert_eq!(BoundingBoxClassifier.classify(f64::NAN, 0.0), Country::Other);
    }

    #[test]
    fn test_codes_round_trip() {
        for country in Country::ALL {
            assert_eq!(Country::from_code(country.code()), country);
        }
        assert_eq!(Country::from_code("us"), Country::UnitedStates);
        assert_eq!(Country::from_code("SG"), Country::Other);
    }
}
