//! Ground Stations Library
//!
//! Typed records for existing ("known-successful") ground stations and the
//! success score used as ground truth when validating site predictions.
//!
//! # Success Score
//!
//! ```text
//! S = 0.30·O + 0.20·D + 0.25·I + 0.15·M + 0.10·L
//! ```
//!
//! | Component | Weight | Raw input |
//! |-----------|--------|-----------|
//! | O | 0.30 | Operational status (mapped directly to 0-1) |
//! | D | 0.20 | Distinct services offered |
//! | I | 0.25 | Antennas + throughput/10 Gbps |
//! | M | 0.15 | Customer count |
//! | L | 0.10 | Years in operation |
//!
//! D, I, M and L are min-max normalized across the registry before weighting.
//! A component with zero spread across the registry scores 0.5 for every station.

use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use thiserror::Error;

/// Success score component weights (9 decimal precision)
/// Sum = 1.000000000
pub const W_OPERATIONAL: f64 = 0.300000000;
pub const W_SERVICE_DIVERSITY: f64 = 0.200000000;
pub const W_INFRASTRUCTURE: f64 = 0.250000000;
pub const W_MARKET_PRESENCE: f64 = 0.150000000;
pub const W_LONGEVITY: f64 = 0.100000000;

/// Score assigned to every station when a component has no spread
pub const FLAT_COMPONENT_SCORE: f64 = 0.500000000;

#[derive(Error, Debug)]
pub enum StationError {
    #[error("Station not found: {0}")]
    NotFound(String),
    #[error("Duplicate station id: {0}")]
    Duplicate(String),
}

pub type Result<T> = std::result::Result<T, StationError>;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct GeoLocation {
    pub latitude: f64,
    pub longitude: f64,
    #[serde(default)]
    pub altitude_m: f64,
}

impl GeoLocation {
    pub fn new(latitude: f64, longitude: f64) -> Self {
        Self {
            latitude,
            longitude,
            altitude_m: 0.0,
        }
    }

    pub fn is_valid(&self) -> bool {
        self.latitude.is_finite()
            && self.longitude.is_finite()
            && (-90.0..=90.0).contains(&self.latitude)
            && (-180.0..=180.0).contains(&self.longitude)
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum StationStatus {
    Operational,
    Degraded,
    Maintenance,
    Planned,
    Decommissioned,
    /// Status not reported by the source
    #[default]
    Unknown,
}

impl StationStatus {
    /// Operational component of the success score (0-1)
    pub fn operational_score(&self) -> f64 {
        match self {
            StationStatus::Operational => 1.0,
            StationStatus::Degraded => 0.6,
            StationStatus::Unknown => 0.5,
            StationStatus::Maintenance => 0.4,
            StationStatus::Planned => 0.2,
            StationStatus::Decommissioned => 0.0,
        }
    }
}

fn default_antenna_count() -> u32 {
    1
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StationCapabilities {
    /// Defaults to a single antenna when unreported
    #[serde(default = "default_antenna_count")]
    pub antenna_count: u32,
    #[serde(default)]
    pub max_throughput_gbps: f64,
}

impl Default for StationCapabilities {
    fn default() -> Self {
        Self {
            antenna_count: default_antenna_count(),
            max_throughput_gbps: 0.0,
        }
    }
}

/// An existing ground station.
///
/// Optional fields carry explicit defaults: no services, one antenna,
/// zero customers and zero years in operation when the source omits them.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KnownStation {
    pub id: String,
    pub name: String,
    pub location: GeoLocation,
    #[serde(default)]
    pub status: StationStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub operator: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub country_code: Option<String>,
    #[serde(default)]
    pub services: Vec<String>,
    #[serde(default)]
    pub capabilities: StationCapabilities,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub customer_count: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub commissioned_year: Option<i32>,
}

impl KnownStation {
    pub fn new(id: impl Into<String>, name: impl Into<String>, latitude: f64, longitude: f64) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            location: GeoLocation::new(latitude, longitude),
            status: StationStatus::default(),
            operator: None,
            country_code: None,
            services: Vec::new(),
            capabilities: StationCapabilities::default(),
            customer_count: None,
            commissioned_year: None,
        }
    }

    /// Number of distinct (case-insensitive) services
    pub fn service_diversity(&self) -> usize {
        self.services
            .iter()
            .map(|s| s.trim().to_lowercase())
            .filter(|s| !s.is_empty())
            .collect::<HashSet<_>>()
            .len()
    }

    fn infrastructure_raw(&self) -> f64 {
        self.capabilities.antenna_count as f64 + self.capabilities.max_throughput_gbps.max(0.0) / 10.0
    }

    fn years_in_operation(&self, reference_year: i32) -> f64 {
        self.commissioned_year
            .map(|year| (reference_year - year).max(0) as f64)
            .unwrap_or(0.0)
    }
}

/// Normalized (0-1) success score components
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct SuccessComponents {
    pub operational: f64,
    pub service_diversity: f64,
    pub infrastructure: f64,
    pub market_presence: f64,
    pub longevity: f64,
}

impl SuccessComponents {
    pub fn weighted(&self) -> f64 {
        W_OPERATIONAL * self.operational
            + W_SERVICE_DIVERSITY * self.service_diversity
            + W_INFRASTRUCTURE * self.infrastructure
            + W_MARKET_PRESENCE * self.market_presence
            + W_LONGEVITY * self.longevity
    }
}

/// Ground-truth entry for validation
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GroundTruth {
    pub station_id: String,
    pub latitude: f64,
    pub longitude: f64,
    pub success_score: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub components: Option<SuccessComponents>,
}

impl GroundTruth {
    /// Ground truth with a known score and no component breakdown
    pub fn new(station_id: impl Into<String>, latitude: f64, longitude: f64, success_score: f64) -> Self {
        Self {
            station_id: station_id.into(),
            latitude,
            longitude,
            success_score,
            components: None,
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct StationRegistry {
    stations: Vec<KnownStation>,
}

impl StationRegistry {
    pub fn new() -> Self {
        Self {
            stations: Vec::new(),
        }
    }

    /// Build a registry, rejecting duplicate ids
    pub fn from_stations(stations: Vec<KnownStation>) -> Result<Self> {
        let mut registry = Self::new();
        for station in stations {
            registry.insert(station)?;
        }
        Ok(registry)
    }

    pub fn insert(&mut self, station: KnownStation) -> Result<()> {
        if self.stations.iter().any(|s| s.id == station.id) {
            return Err(StationError::Duplicate(station.id));
        }
        self.stations.push(station);
        Ok(())
    }

    pub fn get(&self, id: &str) -> Result<&KnownStation> {
        self.stations
            .iter()
            .find(|s| s.id == id)
            .ok_or_else(|| StationError::NotFound(id.to_string()))
    }

    pub fn stations(&self) -> &[KnownStation] {
        &self.stations
    }

    pub fn len(&self) -> usize {
        self.stations.len()
    }

    pub fn is_empty(&self) -> bool {
        self.stations.is_empty()
    }

    pub fn operational(&self) -> impl Iterator<Item = &KnownStation> {
        self.stations
            .iter()
            .filter(|s| s.status == StationStatus::Operational)
    }

    /// Locations of operational stations with valid coordinates
    pub fn known_good_locations(&self) -> Vec<GeoLocation> {
        self.operational()
            .map(|s| s.location)
            .filter(GeoLocation::is_valid)
            .collect()
    }

    /// Registry of the stations `keep` accepts, in the same order
    pub fn subset(&self, keep: impl Fn(&KnownStation) -> bool) -> Self {
        Self {
            stations: self.stations.iter().filter(|s| keep(s)).cloned().collect(),
        }
    }

    /// Success score components for every station with valid coordinates
    pub fn success_components(&self, reference_year: i32) -> Vec<(&KnownStation, SuccessComponents)> {
        let valid: Vec<&KnownStation> = self
            .stations
            .iter()
            .filter(|s| s.location.is_valid())
            .collect();

        let diversity = min_max(valid.iter().map(|s| s.service_diversity() as f64).collect());
        let infrastructure = min_max(valid.iter().map(|s| s.infrastructure_raw()).collect());
        let market = min_max(
            valid
                .iter()
                .map(|s| s.customer_count.unwrap_or(0) as f64)
                .collect(),
        );
        let longevity = min_max(
            valid
                .iter()
                .map(|s| s.years_in_operation(reference_year))
                .collect(),
        );

        valid
            .into_iter()
            .enumerate()
            .map(|(i, station)| {
                let components = SuccessComponents {
                    operational: station.status.operational_score(),
                    service_diversity: diversity[i],
                    infrastructure: infrastructure[i],
                    market_presence: market[i],
                    longevity: longevity[i],
                };
                (station, components)
            })
            .collect()
    }

    /// Ground truth for validation, one entry per station with valid coordinates
    pub fn ground_truth(&self, reference_year: i32) -> Vec<GroundTruth> {
        self.success_components(reference_year)
            .into_iter()
            .map(|(station, components)| GroundTruth {
                station_id: station.id.clone(),
                latitude: station.location.latitude,
                longitude: station.location.longitude,
                success_score: components.weighted(),
                components: Some(components),
            })
            .collect()
    }
}

fn min_max(raw: Vec<f64>) -> Vec<f64> {
    let min = raw.iter().copied().fold(f64::INFINITY, f64::min);
    let max = raw.iter().copied().fold(f64::NEG_INFINITY, f64::max);
    let range = max - min;
    raw.into_iter()
        .map(|v| {
            if range > 0.0 {
                (v - min) / range
            } else {
                FLAT_COMPONENT_SCORE
            }
        })
        .collect()
}
