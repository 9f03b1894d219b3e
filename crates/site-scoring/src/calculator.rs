//! Factor calculation against reference tables
//!
//! Every factor is computed as `Result<f64, FallbackReason>`; an error is
//! replaced by the factor's catalog fallback so the table never holds nulls.
//! The reason is kept on [`FactorOutcome`] and counted per factor.
//!
//! | Lookup | Distance | Factors |
//! |--------|----------|---------|
//! | Nearest grid row | Euclidean degrees | precipitation, cloud cover, fiber, population, seismic |
//! | Nearest site | haversine km | cable landing, IXP, datacenter, ground station |
//! | Sites within 500 km | haversine km | market competition |
//! | Country bucket | bounding box | power, GDP, bandwidth, political, regulatory, licensing, labor |
//! | Derived | any | latitude coverage = 1 - \|lat\|/90, fallback with no sources |
//!
//! Degree and km lookups are mixed on purpose to keep each factor's metric;
//! degree distance overweights longitude near the poles.

use crate::classifier::{BoundingBoxClassifier, Country, LocationClassifier};
use crate::factors::{self, FactorCatalog};
use crate::reference::{
    count_within_km, country_row, nearest_by_degrees, nearest_by_haversine, CountryKeyed, Located, ReferenceData,
};
use crate::table::FactorTable;
use crate::{Candidate, Result};
use serde::Serialize;
use std::collections::BTreeMap;
use thiserror::Error;
use tracing::{debug, info, warn};

/// Radius for counting competing ground stations
pub const MARKET_RADIUS_KM: f64 = 500.0;

/// Why a factor fell back to its default
#[derive(Error, Debug, Clone, PartialEq, Serialize)]
pub enum FallbackReason {
    #[error("reference table {0} not loaded")]
    SourceMissing(&'static str),
    #[error("reference table {0} has no usable rows")]
    NoUsableRows(&'static str),
    #[error("no {table} row for country {country}")]
    NoCountryRow { table: &'static str, country: &'static str },
    #[error("{0} value is null")]
    NullValue(&'static str),
    #[error("computed value is not finite")]
    NonFinite,
    #[error("candidate location is invalid")]
    InvalidLocation,
    #[error("factor {0} has no calculation")]
    UnknownFactor(String),
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FactorOutcome {
    pub factor: &'static str,
    pub value: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub fallback: Option<FallbackReason>,
}

impl FactorOutcome {
    pub fn is_fallback(&self) -> bool {
        self.fallback.is_some()
    }
}

/// Fallback uses per factor across a batch
pub type FallbackCounts = BTreeMap<String, usize>;

fn table<'r, T>(rows: &'r Option<Vec<T>>, name: &'static str) -> std::result::Result<&'r [T], FallbackReason> {
    rows.as_deref().ok_or(FallbackReason::SourceMissing(name))
}

fn present(value: Option<f64>, name: &'static str) -> std::result::Result<f64, FallbackReason> {
    let v = value.ok_or(FallbackReason::NullValue(name))?;
    if v.is_finite() {
        Ok(v)
    } else {
        Err(FallbackReason::NonFinite)
    }
}

fn nearest_deg<'r, T: Located>(
    rows: &'r Option<Vec<T>>,
    name: &'static str,
    c: &Candidate,
) -> std::result::Result<&'r T, FallbackReason> {
    nearest_by_degrees(table(rows, name)?, c.latitude, c.longitude)
        .map(|(row, _)| row)
        .ok_or(FallbackReason::NoUsableRows(name))
}

fn nearest_km<T: Located>(rows: &Option<Vec<T>>, name: &'static str, c: &Candidate) -> std::result::Result<f64, FallbackReason> {
    nearest_by_haversine(table(rows, name)?, c.latitude, c.longitude)
        .map(|(_, km)| km)
        .ok_or(FallbackReason::NoUsableRows(name))
}

fn by_country<'r, T: CountryKeyed>(
    rows: &'r Option<Vec<T>>,
    name: &'static str,
    country: Country,
) -> std::result::Result<&'r T, FallbackReason> {
    country_row(table(rows, name)?, country).ok_or(FallbackReason::NoCountryRow {
        table: name,
        country: country.code(),
    })
}

pub struct FactorCalculator<'a, C: LocationClassifier = BoundingBoxClassifier> {
    reference: &'a ReferenceData,
    catalog: FactorCatalog,
    classifier: C,
}

impl<'a> FactorCalculator<'a> {
    pub fn new(reference: &'a ReferenceData) -> Self {
        Self {
            reference,
            catalog: FactorCatalog::standard(),
            classifier: BoundingBoxClassifier,
        }
    }
}

impl<'a, C: LocationClassifier> FactorCalculator<'a, C> {
    pub fn with_classifier<D: LocationClassifier>(self, classifier: D) -> FactorCalculator<'a, D> {
        FactorCalculator {
            reference: self.reference,
            catalog: self.catalog,
            classifier,
        }
    }

    pub fn with_catalog(mut self, catalog: FactorCatalog) -> Self {
        self.catalog = catalog;
        self
    }

    pub fn catalog(&self) -> &FactorCatalog {
        &self.catalog
    }

    pub fn country_of(&self, candidate: &Candidate) -> Country {
        self.classifier.classify(candidate.latitude, candidate.longitude)
    }

    /// Raw value of one factor; `Err` means the fallback applies
    pub fn compute(&self, factor: &str, candidate: &Candidate) -> std::result::Result<f64, FallbackReason> {
        if !candidate.has_valid_location() {
            return Err(FallbackReason::InvalidLocation);
        }
        let r = self.reference;
        let c = candidate;
        let country = || self.country_of(c);

        let value = match factor {
            factors::PRECIPITATION_MM => present(nearest_deg(&r.precipitation, "precipitation", c)?.annual_mm, "annual_mm")?,
            factors::CLOUD_COVER_PCT => {
                present(nearest_deg(&r.precipitation, "precipitation", c)?.cloud_cover_pct, "cloud_cover_pct")?
            }
            factors::FIBER_CONNECTIVITY => present(nearest_deg(&r.fiber, "fiber", c)?.connectivity, "connectivity")?,
            factors::POPULATION_DENSITY => present(nearest_deg(&r.population, "population", c)?.density, "density")?,
            factors::SEISMIC_RISK => present(nearest_deg(&r.seismic, "seismic", c)?.risk_index, "risk_index")?,

            factors::SUBMARINE_CABLE_DISTANCE_KM => nearest_km(&r.cable_landings, "cable_landings", c)?,
            factors::IXP_DISTANCE_KM => nearest_km(&r.ixps, "ixps", c)?,
            factors::DATACENTER_DISTANCE_KM => nearest_km(&r.datacenters, "datacenters", c)?,
            factors::GROUND_STATION_PROXIMITY_KM => {
                let stations = r.stations().ok_or(FallbackReason::SourceMissing("ground_stations"))?;
                nearest_by_haversine(stations, c.latitude, c.longitude)
                    .map(|(_, km)| km)
                    .ok_or(FallbackReason::NoUsableRows("ground_stations"))?
            }
            factors::MARKET_COMPETITION => {
                let stations = r.stations().ok_or(FallbackReason::SourceMissing("ground_stations"))?;
                count_within_km(stations, c.latitude, c.longitude, MARKET_RADIUS_KM) as f64
            }

            factors::POWER_RELIABILITY => present(by_country(&r.power, "power", country())?.reliability, "reliability")?,
            factors::GDP_PER_CAPITA => present(by_country(&r.economic, "economic", country())?.gdp_per_capita, "gdp_per_capita")?,
            factors::REGULATORY_EASE => {
                present(by_country(&r.economic, "economic", country())?.ease_of_business, "ease_of_business")?
            }
            factors::SKILLED_LABOR_INDEX => present(by_country(&r.economic, "economic", country())?.labor_index, "labor_index")?,
            factors::BANDWIDTH_COST => present(by_country(&r.bandwidth, "bandwidth", country())?.usd_per_mbps, "usd_per_mbps")?,
            factors::POLITICAL_STABILITY => present(by_country(&r.political, "political", country())?.stability, "stability")?,
            factors::LICENSING_COMPLEXITY => present(
                by_country(&r.political, "political", country())?.licensing_complexity,
                "licensing_complexity",
            )?,

            // Only meaningful alongside some loaded reference data
            factors::LATITUDE_COVERAGE => {
                if r.available_sources().is_empty() {
                    return Err(FallbackReason::SourceMissing("reference"));
                }
                1.0 - c.latitude.abs() / 90.0
            }

            other => return Err(FallbackReason::UnknownFactor(other.to_string())),
        };

        if value.is_finite() {
            Ok(value)
        } else {
            Err(FallbackReason::NonFinite)
        }
    }

    /// Every catalog factor with its fallback outcome
    pub fn calculate_detailed(&self, candidate: &Candidate) -> Vec<FactorOutcome> {
        self.catalog
            .iter()
            .map(|factor| match self.compute(factor.name, candidate) {
                Ok(value) => FactorOutcome {
                    factor: factor.name,
                    value,
                    fallback: None,
                },
                Err(reason) => FactorOutcome {
                    factor: factor.name,
                    value: factor.fallback,
                    fallback: Some(reason),
                },
            })
            .collect()
    }

    /// Factor name to value; never missing a catalog factor
    pub fn calculate(&self, candidate: &Candidate) -> BTreeMap<String, f64> {
        self.calculate_detailed(candidate)
            .into_iter()
            .map(|o| (o.factor.to_string(), o.value))
            .collect()
    }

    /// Factor table for a batch, candidates tagged with their country
    pub fn build_table(&self, candidates: &[Candidate]) -> Result<(FactorTable, FallbackCounts)> {
        let available = self.reference.available_sources();
        info!(
            "Calculating {} factors for {} candidates ({} reference tables loaded)",
            self.catalog.len(),
            candidates.len(),
            available.len()
        );

        let mut table = FactorTable::from_catalog(&self.catalog);
        let mut counts: FallbackCounts = self.catalog.names().into_iter().map(|n| (n.to_string(), 0)).collect();

        for candidate in candidates {
            let outcomes = self.calculate_detailed(candidate);
            for o in outcomes.iter().filter(|o| o.is_fallback()) {
                *counts.entry(o.factor.to_string()).or_default() += 1;
                if let Some(reason) = &o.fallback {
                    debug!("{} {}: fallback ({})", candidate.id, o.factor, reason);
                }
            }

            let mut tagged = candidate.clone();
            tagged.country = Some(self.country_of(candidate));
            table.push(tagged, outcomes.into_iter().map(|o| Some(o.value)).collect())?;
        }

        for (factor, n) in counts.iter().filter(|(_, n)| **n > 0) {
            warn!("{}: fallback used for {} of {} candidates", factor, n, candidates.len());
        }

        Ok((table, counts))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::factors::FACTORS;
    use crate::reference::*;
    use crate::GenerationStrategy;
    use ground_stations::{KnownStation, StationRegistry};

    fn candidate(lat: f64, lon: f64) -> Candidate {
        Candidate::new("c", lat, lon, GenerationStrategy::GridSystematic)
    }

    fn site(id: &str, lat: f64, lon: f64) -> InfrastructureSite {
        InfrastructureSite {
            id: id.to_string(),
            name: String::new(),
            latitude: lat,
            longitude: lon,
        }
    }

    #[test]
    fn test_all_sources_absent_uses_every_fallback() {
        let reference = ReferenceData::empty();
        let calc = FactorCalculator::new(&reference);
        let outcomes = calc.calculate_detailed(&candidate(40.0, -100.0));

        assert_eq!(outcomes.len(), 18);
        for (outcome, factor) in outcomes.iter().zip(FACTORS.iter()) {
            assert_eq!(outcome.factor, factor.name);
            assert_eq!(outcome.value, factor.fallback, "{}", factor.name);
            assert!(
                matches!(outcome.fallback, Some(FallbackReason::SourceMissing(_))),
                "{}: {:?}",
                factor.name,
                outcome.fallback
            );
        }
    }

    #[test]
    fn test_invalid_location_falls_back_everywhere() {
        let reference = ReferenceData::empty();
        let values = FactorCalculator::new(&reference).calculate(&candidate(f64::NAN, 0.0));
        assert_eq!(values.len(), 18);
        for factor in FACTORS.iter() {
            assert_eq!(values[factor.name], factor.fallback);
        }
    }

    #[test]
    fn test_corrupted_rows_degrade_to_fallback() {
        let reference = ReferenceData {
            population: Some(vec![PopulationCell {
                latitude: 40.0,
                longitude: -100.0,
                density: None,
            }]),
            precipitation: Some(vec![PrecipitationCell {
                latitude: f64::NAN,
                longitude: 0.0,
                annual_mm: Some(800.0),
                cloud_cover_pct: Some(30.0),
            }]),
            fiber: Some(vec![FiberNode {
                latitude: 40.0,
                longitude: -100.0,
                connectivity: Some(f64::INFINITY),
            }]),
            ixps: Some(vec![]),
            ..ReferenceData::default()
        };
        let calc = FactorCalculator::new(&reference);
        let c = candidate(40.0, -100.0);

        assert_eq!(
            calc.compute(factors::POPULATION_DENSITY, &c),
            Err(FallbackReason::NullValue("density"))
        );
        assert_eq!(
            calc.compute(factors::PRECIPITATION_MM, &c),
            Err(FallbackReason::NoUsableRows("precipitation"))
        );
        assert_eq!(calc.compute(factors::FIBER_CONNECTIVITY, &c), Err(FallbackReason::NonFinite));
        assert_eq!(calc.compute(factors::IXP_DISTANCE_KM, &c), Err(FallbackReason::NoUsableRows("ixps")));

        let values = calc.calculate(&c);
        assert_eq!(values[factors::POPULATION_DENSITY], 100.0);
        assert_eq!(values[factors::PRECIPITATION_MM], 1000.0);
        assert_eq!(values[factors::FIBER_CONNECTIVITY], 0.5);
    }

    #[test]
    fn test_lookups_with_data() {
        let reference = ReferenceData {
            precipitation: Some(vec![
                PrecipitationCell {
                    latitude: 40.0,
                    longitude: -100.0,
                    annual_mm: Some(600.0),
                    cloud_cover_pct: Some(35.0),
                },
                PrecipitationCell {
                    latitude: 0.0,
                    longitude: 0.0,
                    annual_mm: Some(2500.0),
                    cloud_cover_pct: None,
                },
            ]),
            power: Some(vec![
                PowerReliability {
                    country_code: "US".into(),
                    reliability: Some(0.99),
                },
                PowerReliability {
                    country_code: "OTHER".into(),
                    reliability: Some(0.7),
                },
            ]),
            datacenters: Some(vec![site("dc", 40.0, -101.0)]),
            ground_stations: Some(
                StationRegistry::from_stations(vec![
                    KnownStation::new("a", "A", 41.0, -100.0),
                    KnownStation::new("b", "B", 39.0, -100.0),
                    KnownStation::new("far", "Far", -40.0, 100.0),
                ])
                .unwrap(),
            ),
            ..ReferenceData::default()
        };
        let calc = FactorCalculator::new(&reference);
        let c = candidate(40.1, -100.1);

        assert_eq!(calc.compute(factors::PRECIPITATION_MM, &c), Ok(600.0));
        assert_eq!(calc.compute(factors::CLOUD_COVER_PCT, &c), Ok(35.0));
        assert_eq!(calc.compute(factors::POWER_RELIABILITY, &c), Ok(0.99));
        // Singapore falls into the OTHER bucket
        assert_eq!(calc.compute(factors::POWER_RELIABILITY, &candidate(1.35, 103.8)), Ok(0.7));

        let dc = calc.compute(factors::DATACENTER_DISTANCE_KM, &c).unwrap();
        assert!(dc > 70.0 && dc < 90.0, "{}", dc);
        assert_eq!(calc.compute(factors::MARKET_COMPETITION, &c), Ok(2.0));
        let gs = calc.compute(factors::GROUND_STATION_PROXIMITY_KM, &c).unwrap();
        assert!(gs < 120.0);

        let lat = calc.compute(factors::LATITUDE_COVERAGE, &c).unwrap();
        assert!((lat - (1.0 - 40.1 / 90.0)).abs() < 1e-12);
    }

    #[test]
    fn test_build_table_counts_fallbacks() {
        let reference = ReferenceData::empty();
        let candidates = vec![candidate(10.0, 10.0), candidate(20.0, 20.0)];
        let (table, counts) = FactorCalculator::new(&reference).build_table(&candidates).unwrap();

        assert_eq!(table.len(), 2);
        assert_eq!(table.n_factors(), 18);
        assert!(table.rows().iter().all(|r| r.values.iter().all(|v| v.is_some())));
        assert!(table.rows().iter().all(|r| r.candidate.country == Some(Country::Other)));
        assert_eq!(counts[factors::SEISMIC_RISK], 2);
        assert_eq!(counts[factors::LATITUDE_COVERAGE], 2);
    }

    #[test]
    fn test_latitude_coverage_fallback_without_sources() {
        let empty = ReferenceData::empty();
        let c = candidate(40.0, -100.0);
        assert_eq!(FactorCalculator::new(&empty).calculate(&c)[factors::LATITUDE_COVERAGE], 0.5);

        // Any loaded source enables the derived value
        let some = ReferenceData {
            ixps: Some(vec![site("ix", 0.0, 0.0)]),
            ..ReferenceData::default()
        };
        let lat = FactorCalculator::new(&some).compute(factors::LATITUDE_COVERAGE, &c).unwrap();
        assert!((lat - (1.0 - 40.0 / 90.0)).abs() < 1e-12);
    }

    #[test]
    fn test_custom_classifier() {
        struct AlwaysJapan;
        impl LocationClassifier for AlwaysJapan {
            fn classify(&self, _: f64, _: f64) -> Country {
                Country::Japan
            }
        }
        let reference = ReferenceData {
            bandwidth: Some(vec![BandwidthPrice {
                country_code: "JP".into(),
                usd_per_mbps: Some(2.5),
            }]),
            ..ReferenceData::default()
        };
        let calc = FactorCalculator::new(&reference).with_classifier(AlwaysJapan);
        assert_eq!(calc.compute(factors::BANDWIDTH_COST, &candidate(0.0, 0.0)), Ok(2.5));
        assert!(matches!(
            calc.compute("unknown", &candidate(0.0, 0.0)),
            Err(FallbackReason::UnknownFactor(_))
        ));
    }
}
