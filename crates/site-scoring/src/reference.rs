//! Typed reference tables
//!
//! Every table is optional: `None` means the source was not loaded.
//! Value columns are `Option<f64>` so null cells survive loading and are
//! handled by the calculator's fallbacks.

use crate::classifier::Country;
use crate::{degree_distance, haversine_km, is_valid_coordinate};
use ground_stations::{KnownStation, StationRegistry};
use serde::{Deserialize, Serialize};

/// A row with a position
pub trait Located {
    fn latitude(&self) -> f64;
    fn longitude(&self) -> f64;

    fn has_valid_location(&self) -> bool {
        is_valid_coordinate(self.latitude(), self.longitude())
    }
}

/// A row keyed by country code
pub trait CountryKeyed {
    fn country_code(&self) -> &str;
}

macro_rules! impl_located {
    ($($ty:ty),* $(,)?) => {
        $(
            impl Located for $ty {
                fn latitude(&self) -> f64 {
                    self.latitude
                }
                fn longitude(&self) -> f64 {
                    self.longitude
                }
            }
        )*
    };
}

macro_rules! impl_country_keyed {
    ($($ty:ty),* $(,)?) => {
        $(
            impl CountryKeyed for $ty {
                fn country_code(&self) -> &str {
                    &self.country_code
                }
            }
        )*
    };
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PopulationCell {
    pub latitude: f64,
    pub longitude: f64,
    /// People per km²
    pub density: Option<f64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PrecipitationCell {
    pub latitude: f64,
    pub longitude: f64,
    pub annual_mm: Option<f64>,
    #[serde(default)]
    pub cloud_cover_pct: Option<f64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FiberNode {
    pub latitude: f64,
    pub longitude: f64,
    /// 0-1
    pub connectivity: Option<f64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SeismicZone {
    pub latitude: f64,
    pub longitude: f64,
    /// 0-1
    pub risk_index: Option<f64>,
}

/// Datacenter, cable landing or internet exchange
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InfrastructureSite {
    pub id: String,
    #[serde(default)]
    pub name: String,
    pub latitude: f64,
    pub longitude: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EconomicIndicator {
    pub country_code: String,
    #[serde(default)]
    pub gdp_per_capita: Option<f64>,
    /// 0-100
    #[serde(default)]
    pub ease_of_business: Option<f64>,
    /// 0-1
    #[serde(default)]
    pub labor_index: Option<f64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PowerReliability {
    pub country_code: String,
    /// 0-1
    pub reliability: Option<f64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PoliticalIndicator {
    pub country_code: String,
    /// WGI -2.5 to +2.5
    pub stability: Option<f64>,
    /// 0-1
    #[serde(default)]
    pub licensing_complexity: Option<f64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BandwidthPrice {
    pub country_code: String,
    pub usd_per_mbps: Option<f64>,
}

impl_located!(PopulationCell, PrecipitationCell, FiberNode, SeismicZone, InfrastructureSite);
impl_country_keyed!(EconomicIndicator, PowerReliability, PoliticalIndicator, BandwidthPrice);

impl Located for KnownStation {
    fn latitude(&self) -> f64 {
        self.location.latitude
    }
    fn longitude(&self) -> f64 {
        self.location.longitude
    }
}

/// All reference sources; any may be absent
#[derive(Debug, Clone, Default)]
pub struct ReferenceData {
    pub ground_stations: Option<StationRegistry>,
    pub population: Option<Vec<PopulationCell>>,
    pub economic: Option<Vec<EconomicIndicator>>,
    pub power: Option<Vec<PowerReliability>>,
    pub fiber: Option<Vec<FiberNode>>,
    pub cable_landings: Option<Vec<InfrastructureSite>>,
    pub ixps: Option<Vec<InfrastructureSite>>,
    pub datacenters: Option<Vec<InfrastructureSite>>,
    pub seismic: Option<Vec<SeismicZone>>,
    pub precipitation: Option<Vec<PrecipitationCell>>,
    pub political: Option<Vec<PoliticalIndicator>>,
    pub bandwidth: Option<Vec<BandwidthPrice>>,
}

impl ReferenceData {
    /// No sources loaded
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn stations(&self) -> Option<&[KnownStation]> {
        self.ground_stations.as_ref().map(|r| r.stations())
    }

    /// Names of the loaded sources
    pub fn available_sources(&self) -> Vec<&'static str> {
        let mut sources = Vec::new();
        let mut mark = |present: bool, name: &'static str| {
            if present {
                sources.push(name);
            }
        };
        mark(self.ground_stations.is_some(), "ground_stations");
        mark(self.population.is_some(), "population");
        mark(self.economic.is_some(), "economic");
        mark(self.power.is_some(), "power");
        mark(self.fiber.is_some(), "fiber");
        mark(self.cable_landings.is_some(), "cable_landings");
        mark(self.ixps.is_some(), "ixps");
        mark(self.datacenters.is_some(), "datacenters");
        mark(self.seismic.is_some(), "seismic");
        mark(self.precipitation.is_some(), "precipitation");
        mark(self.political.is_some(), "political");
        mark(self.bandwidth.is_some(), "bandwidth");
        sources
    }
}

fn nearest_by<'a, T, F>(rows: &'a [T], lat: f64, lon: f64, distance: F) -> Option<(&'a T, f64)>
where
    T: Located,
    F: Fn(f64, f64, f64, f64) -> f64,
{
    rows.iter()
        .filter(|r| r.has_valid_location())
        .map(|r| (r, distance(lat, lon, r.latitude(), r.longitude())))
        .filter(|(_, d)| d.is_finite())
        .min_by(|a, b| a.1.total_cmp(&b.1))
}

/// Nearest row by flat Euclidean distance in degrees
pub fn nearest_by_degrees<T: Located>(rows: &[T], lat: f64, lon: f64) -> Option<(&T, f64)> {
    nearest_by(rows, lat, lon, degree_distance)
}

/// Nearest row by great-circle distance in km
pub fn nearest_by_haversine<T: Located>(rows: &[T], lat: f64, lon: f64) -> Option<(&T, f64)> {
    nearest_by(rows, lat, lon, haversine_km)
}

/// Rows within `radius_km` great-circle distance
pub fn count_within_km<T: Located>(rows: &[T], lat: f64, lon: f64, radius_km: f64) -> usize {
    rows.iter()
        .filter(|r| r.has_valid_location())
        .filter(|r| haversine_km(lat, lon, r.latitude(), r.longitude()) <= radius_km)
        .count()
}

/// Row for `country`, falling back to the "OTHER" row
pub fn country_row<T: CountryKeyed>(rows: &[T], country: Country) -> Option<&T> {
    let matches = |row: &&T, code: &str| row.country_code().trim().eq_ignore_ascii_case(code);
    rows.iter()
        .find(|r| matches(r, country.code()))
        .or_else(|| rows.iter().find(|r| matches(r, Country::Other.code())))
}
