//! Static factor catalog
//!
//! 18 factors in six categories. Nominal ("expert") weights sum to 1.0.
//!
//! | Category | Factors | Weight |
//! |----------|---------|--------|
//! | Environmental | precipitation, cloud cover | 0.12 |
//! | Infrastructure | fiber, power, cable/IXP/datacenter distance | 0.33 |
//! | Economic | population, GDP, bandwidth cost, competition | 0.25 |
//! | Regulatory | political stability, regulatory ease, licensing | 0.13 |
//! | Operational | labor, latitude coverage, station proximity | 0.12 |
//! | Risk | seismic risk | 0.05 |
//!
//! `fallback` is the value the calculator substitutes when a factor cannot be
//! computed from reference data.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

pub const PRECIPITATION_MM: &str = "precipitation_mm";
pub const CLOUD_COVER_PCT: &str = "cloud_cover_pct";
pub const FIBER_CONNECTIVITY: &str = "fiber_connectivity";
pub const POWER_RELIABILITY: &str = "power_reliability";
pub const SUBMARINE_CABLE_DISTANCE_KM: &str = "submarine_cable_distance_km";
pub const IXP_DISTANCE_KM: &str = "ixp_distance_km";
pub const DATACENTER_DISTANCE_KM: &str = "datacenter_distance_km";
pub const POPULATION_DENSITY: &str = "population_density";
pub const GDP_PER_CAPITA: &str = "gdp_per_capita";
pub const BANDWIDTH_COST: &str = "bandwidth_cost_usd_mbps";
pub const MARKET_COMPETITION: &str = "market_competition";
pub const POLITICAL_STABILITY: &str = "political_stability";
pub const REGULATORY_EASE: &str = "regulatory_ease";
pub const LICENSING_COMPLEXITY: &str = "licensing_complexity";
pub const SKILLED_LABOR_INDEX: &str = "skilled_labor_index";
pub const LATITUDE_COVERAGE: &str = "latitude_coverage";
pub const GROUND_STATION_PROXIMITY_KM: &str = "ground_station_proximity_km";
pub const SEISMIC_RISK: &str = "seismic_risk";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FactorCategory {
    Environmental,
    Infrastructure,
    Economic,
    Regulatory,
    Operational,
    Risk,
}

/// Static factor definition
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Factor {
    pub name: &'static str,
    pub category: FactorCategory,
    pub description: &'static str,
    /// Label of the reference table the value comes from
    pub data_source: &'static str,
    pub nominal_weight: f64,
    pub min_value: f64,
    pub max_value: f64,
    pub higher_is_better: bool,
    /// Metadata only
    pub confidence_level: f64,
    /// Substituted when the value cannot be computed
    pub fallback: f64,
}

impl Factor {
    pub fn in_declared_range(&self, value: f64) -> bool {
        value >= self.min_value && value <= self.max_value
    }
}

/// All 18 factors (9 decimal precision weights)
pub const FACTORS: [Factor; 18] = [
    Factor {
        name: PRECIPITATION_MM,
        category: FactorCategory::Environmental,
        description: "Annual precipitation at the nearest precipitation grid cell",
        data_source: "precipitation",
        nominal_weight: 0.060000000,
        min_value: 0.0,
        max_value: 5000.0,
        higher_is_better: false,
        confidence_level: 0.80,
        fallback: 1000.0,
    },
    Factor {
        name: CLOUD_COVER_PCT,
        category: FactorCategory::Environmental,
        description: "Mean cloud cover at the nearest precipitation grid cell",
        data_source: "precipitation",
        nominal_weight: 0.060000000,
        min_value: 0.0,
        max_value: 100.0,
        higher_is_better: false,
        confidence_level: 0.70,
        fallback: 50.0,
    },
    Factor {
        name: FIBER_CONNECTIVITY,
        category: FactorCategory::Infrastructure,
        description: "Fiber connectivity score of the nearest fiber node",
        data_source: "fiber_connectivity",
        nominal_weight: 0.080000000,
        min_value: 0.0,
        max_value: 1.0,
        higher_is_better: true,
        confidence_level: 0.75,
        fallback: 0.5,
    },
    Factor {
        name: POWER_RELIABILITY,
        category: FactorCategory::Infrastructure,
        description: "Grid reliability of the candidate's country",
        data_source: "power_reliability",
        nominal_weight: 0.070000000,
        min_value: 0.0,
        max_value: 1.0,
        higher_is_better: true,
        confidence_level: 0.80,
        fallback: 0.8,
    },
    Factor {
        name: SUBMARINE_CABLE_DISTANCE_KM,
        category: FactorCategory::Infrastructure,
        description: "Great-circle distance to the nearest submarine cable landing",
        data_source: "submarine_cables",
        nominal_weight: 0.070000000,
        min_value: 0.0,
        max_value: 20000.0,
        higher_is_better: false,
        confidence_level: 0.90,
        fallback: 1000.0,
    },
    Factor {
        name: IXP_DISTANCE_KM,
        category: FactorCategory::Infrastructure,
        description: "Great-circle distance to the nearest internet exchange point",
        data_source: "internet_exchanges",
        nominal_weight: 0.060000000,
        min_value: 0.0,
        max_value: 20000.0,
        higher_is_better: false,
        confidence_level: 0.85,
        fallback: 500.0,
    },
    Factor {
        name: DATACENTER_DISTANCE_KM,
        category: FactorCategory::Infrastructure,
        description: "Great-circle distance to the nearest datacenter",
        data_source: "datacenters",
        nominal_weight: 0.050000000,
        min_value: 0.0,
        max_value: 20000.0,
        higher_is_better: false,
        confidence_level: 0.85,
        fallback: 500.0,
    },
    Factor {
        name: POPULATION_DENSITY,
        category: FactorCategory::Economic,
        description: "Population density (people/km²) of the nearest grid cell",
        data_source: "population_grid",
        nominal_weight: 0.080000000,
        min_value: 0.0,
        max_value: 50000.0,
        higher_is_better: true,
        confidence_level: 0.80,
        fallback: 100.0,
    },
    Factor {
        name: GDP_PER_CAPITA,
        category: FactorCategory::Economic,
        description: "GDP per capita (USD) of the candidate's country",
        data_source: "economic_indicators",
        nominal_weight: 0.070000000,
        min_value: 0.0,
        max_value: 200000.0,
        higher_is_better: true,
        confidence_level: 0.90,
        fallback: 10000.0,
    },
    Factor {
        name: BANDWIDTH_COST,
        category: FactorCategory::Economic,
        description: "Wholesale bandwidth price (USD per Mbps) in the candidate's country",
        data_source: "bandwidth_pricing",
        nominal_weight: 0.060000000,
        min_value: 0.0,
        max_value: 500.0,
        higher_is_better: false,
        confidence_level: 0.60,
        fallback: 10.0,
    },
    Factor {
        name: MARKET_COMPETITION,
        category: FactorCategory::Economic,
        description: "Known ground stations within 500 km",
        data_source: "ground_stations",
        nominal_weight: 0.040000000,
        min_value: 0.0,
        max_value: 100.0,
        higher_is_better: false,
        confidence_level: 0.70,
        fallback: 0.0,
    },
    Factor {
        name: POLITICAL_STABILITY,
        category: FactorCategory::Regulatory,
        description: "WGI political stability index (-2.5 to +2.5) of the candidate's country",
        data_source: "political_stability",
        nominal_weight: 0.060000000,
        min_value: -2.5,
        max_value: 2.5,
        higher_is_better: true,
        confidence_level: 0.85,
        fallback: 0.0,
    },
    Factor {
        name: REGULATORY_EASE,
        category: FactorCategory::Regulatory,
        description: "Ease-of-business score (0-100) of the candidate's country",
        data_source: "economic_indicators",
        nominal_weight: 0.040000000,
        min_value: 0.0,
        max_value: 100.0,
        higher_is_better: true,
        confidence_level: 0.70,
        fallback: 50.0,
    },
    Factor {
        name: LICENSING_COMPLEXITY,
        category: FactorCategory::Regulatory,
        description: "Spectrum and landing-rights licensing complexity (0-1)",
        data_source: "political_stability",
        nominal_weight: 0.030000000,
        min_value: 0.0,
        max_value: 1.0,
        higher_is_better: false,
        confidence_level: 0.50,
        fallback: 0.5,
    },
    Factor {
        name: SKILLED_LABOR_INDEX,
        category: FactorCategory::Operational,
        description: "Availability of skilled technical labor (0-1)",
        data_source: "economic_indicators",
        nominal_weight: 0.040000000,
        min_value: 0.0,
        max_value: 1.0,
        higher_is_better: true,
        confidence_level: 0.60,
        fallback: 0.5,
    },
    Factor {
        name: LATITUDE_COVERAGE,
        category: FactorCategory::Operational,
        description: "Orbital coverage proxy from latitude, 1 - |lat|/90",
        data_source: "derived",
        nominal_weight: 0.050000000,
        min_value: 0.0,
        max_value: 1.0,
        higher_is_better: true,
        confidence_level: 0.95,
        fallback: 0.5,
    },
    Factor {
        name: GROUND_STATION_PROXIMITY_KM,
        category: FactorCategory::Operational,
        description: "Great-circle distance to the nearest existing ground station",
        data_source: "ground_stations",
        nominal_weight: 0.030000000,
        min_value: 0.0,
        max_value: 20000.0,
        higher_is_better: false,
        confidence_level: 0.80,
        fallback: 1000.0,
    },
    Factor {
        name: SEISMIC_RISK,
        category: FactorCategory::Risk,
        description: "Seismic hazard index (0-1) of the nearest seismic zone",
        data_source: "seismic_risk",
        nominal_weight: 0.050000000,
        min_value: 0.0,
        max_value: 1.0,
        higher_is_better: false,
        confidence_level: 0.75,
        fallback: 0.3,
    },
];

/// Ordered lookup over factor definitions
#[derive(Debug, Clone, Serialize)]
pub struct FactorCatalog {
    factors: Vec<Factor>,
}

impl Default for FactorCatalog {
    fn default() -> Self {
        Self::standard()
    }
}

impl FactorCatalog {
    /// The 18-factor catalog
    pub fn standard() -> Self {
        Self {
            factors: FACTORS.to_vec(),
        }
    }

    pub fn from_factors(factors: Vec<Factor>) -> Self {
        Self { factors }
    }

    pub fn get(&self, name: &str) -> Option<&Factor> {
        self.factors.iter().find(|f| f.name == name)
    }

    pub fn index_of(&self, name: &str) -> Option<usize> {
        self.factors.iter().position(|f| f.name == name)
    }

    pub fn names(&self) -> Vec<&'static str> {
        self.factors.iter().map(|f| f.name).collect()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Factor> {
        self.factors.iter()
    }

    pub fn len(&self) -> usize {
        self.factors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.factors.is_empty()
    }

    pub fn by_category(&self, category: FactorCategory) -> impl Iterator<Item = &Factor> {
        self.factors.iter().filter(move |f| f.category == category)
    }

    pub fn nominal_weights(&self) -> BTreeMap<String, f64> {
        self.factors
            .iter()
            .map(|f| (f.name.to_string(), f.nominal_weight))
            .collect()
    }

    /// Polarity of `name`; factors outside the catalog read higher-is-better
    pub fn higher_is_better(&self, name: &str) -> bool {
        self.get(name).map(|f| f.higher_is_better).unwrap_or(true)
    }
}
