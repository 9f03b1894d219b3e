//! Ground Station Investment Site Scoring
//!
//! Generates candidate sites, computes 18 location factors against reference
//! tables, and turns them into a ranked investment score with uncertainty,
//! then checks the ranking against existing ground stations.
//!
//! # Pipeline
//!
//! ```text
//! CandidateGenerator → FactorCalculator → QualityAssessor (gate) → Normalizer
//!     → WeightEstimator → ScoreAggregator → SensitivityAnalyzer (diagnostic)
//!     → ValidationFramework (held-out ground truth)
//! ```
//!
//! | Stage | Module | Output |
//! |-------|--------|--------|
//! | Generation | [`generator`] | `Vec<Candidate>` |
//! | Factors | [`calculator`] | [`FactorTable`] (never null) |
//! | Quality | [`quality`] | [`QualityReport`], score + grade |
//! | Normalization | [`normalize`] | [`FactorTable`] rescaled per column |
//! | Weights | [`weights`] | ensemble [`FactorWeight`]s summing to 1 |
//! | Aggregation | [`aggregate`] | [`ScoredTable`] with CI and dense rank |
//! | Sensitivity | [`sensitivity`] | per-factor ±20% weight response |
//! | Validation | [`validation`] | [`ValidationResult`], score + grade |
//!
//! Every stage takes the previous stage's table by reference and returns a
//! new value. Stochastic stages take an explicit `rand::Rng`.

use serde::{Deserialize, Serialize};
use std::f64::consts::PI;
use thiserror::Error;

pub mod aggregate;
pub mod calculator;
pub mod classifier;
pub mod config;
pub mod export;
pub mod factors;
pub mod generator;
pub mod loader;
pub mod models;
pub mod normalize;
pub mod pipeline;
pub mod quality;
pub mod reference;
pub mod sensitivity;
pub mod stats;
pub mod table;
pub mod validation;
pub mod weights;

pub use aggregate::{AggregationMethod, ScoreAggregator, ScoredCandidate, ScoredTable};
pub use calculator::{FactorCalculator, FallbackReason};
pub use classifier::{BoundingBoxClassifier, Country, LocationClassifier};
pub use config::PipelineConfig;
pub use factors::{Factor, FactorCatalog, FactorCategory};
pub use generator::CandidateGenerator;
pub use normalize::{NormalizationMethod, Normalizer};
pub use pipeline::{Pipeline, PipelineReport, StationSplit};
pub use quality::{QualityAssessor, QualityReport};
pub use reference::ReferenceData;
pub use sensitivity::{SensitivityAnalyzer, SensitivityReport};
pub use table::FactorTable;
pub use validation::{ValidationFramework, ValidationResult};
pub use weights::{FactorWeight, WeightEstimator, WeightReport};

/// Two-sided 95% normal quantile
pub const Z_95: f64 = 1.96;

/// Kilometres per degree of latitude (flat approximation)
pub const KM_PER_DEGREE: f64 = 111.000000000;

#[derive(Error, Debug)]
pub enum ScoringError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("JSON parse error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("Malformed reference table {table}: {source}")]
    MalformedTable {
        table: String,
        #[source]
        source: serde_json::Error,
    },
    #[error("Row {row} has {found} factor values, table declares {expected}")]
    RowShape {
        row: usize,
        expected: usize,
        found: usize,
    },
    #[error("Unknown factor: {0}")]
    UnknownFactor(String),
    #[error("No weight supplied for factor {0}")]
    MissingWeight(String),
    #[error("Invalid configuration: {0}")]
    Config(String),
    #[error("Quality gate failed: score {score:.1} below minimum {minimum:.1}")]
    QualityGate { score: f64, minimum: f64 },
    #[error("Station registry error: {0}")]
    Stations(#[from] ground_stations::StationError),
}

pub type Result<T> = std::result::Result<T, ScoringError>;

/// How a candidate location was produced
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GenerationStrategy {
    GridSystematic,
    InfrastructureProximate,
    MarketOpportunity,
}

impl GenerationStrategy {
    pub fn id_prefix(&self) -> &'static str {
        match self {
            GenerationStrategy::GridSystematic => "grid",
            GenerationStrategy::InfrastructureProximate => "infra",
            GenerationStrategy::MarketOpportunity => "market",
        }
    }
}

/// A candidate site
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Candidate {
    pub id: String,
    pub latitude: f64,
    pub longitude: f64,
    pub strategy: GenerationStrategy,
    /// Reference row the candidate was placed around, if any
    #[serde(skip_serializing_if = "Option::is_none")]
    pub source_ref: Option<String>,
    /// Filled in by the factor calculator
    #[serde(skip_serializing_if = "Option::is_none")]
    pub country: Option<Country>,
}

impl Candidate {
    pub fn new(id: impl Into<String>, latitude: f64, longitude: f64, strategy: GenerationStrategy) -> Self {
        Self {
            id: id.into(),
            latitude,
            longitude,
            strategy,
            source_ref: None,
            country: None,
        }
    }

    pub fn has_valid_location(&self) -> bool {
        is_valid_coordinate(self.latitude, self.longitude)
    }
}

/// Letter grade shared by quality and validation reports
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Grade {
    A,
    B,
    C,
    D,
    F,
}

impl Grade {
    /// ≥85 A, ≥75 B, ≥65 C, ≥55 D, else F (NaN grades F)
    pub fn from_score(score: f64) -> Self {
        if score >= 85.0 {
            Grade::A
        } else if score >= 75.0 {
            Grade::B
        } else if score >= 65.0 {
            Grade::C
        } else if score >= 55.0 {
            Grade::D
        } else {
            Grade::F
        }
    }
}

impl std::fmt::Display for Grade {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let letter = match self {
            Grade::A => "A",
            Grade::B => "B",
            Grade::C => "C",
            Grade::D => "D",
            Grade::F => "F",
        };
        f.write_str(letter)
    }
}

pub fn is_valid_coordinate(lat: f64, lon: f64) -> bool {
    lat.is_finite() && lon.is_finite() && (-90.0..=90.0).contains(&lat) && (-180.0..=180.0).contains(&lon)
}

/// Wrap a longitude into [-180, 180)
pub fn wrap_longitude(lon: f64) -> f64 {
    (lon + 180.0).rem_euclid(360.0) - 180.0
}

/// Haversine distance between two points in km (9 decimal precision)
pub fn haversine_km(lat1: f64, lon1: f64, lat2: f64, lon2: f64) -> f64 {
    const R: f64 = 6371.000000000; // Earth radius in km

    let lat1_rad = lat1 * PI / 180.000000000;
    let lat2_rad = lat2 * PI / 180.000000000;
    let dlat = (lat2 - lat1) * PI / 180.000000000;
    let dlon = (lon2 - lon1) * PI / 180.000000000;

    let a = (dlat / 2.000000000).sin().powi(2)
        + lat1_rad.cos() * lat2_rad.cos() * (dlon / 2.000000000).sin().powi(2);
    let c = 2.000000000 * a.sqrt().atan2((1.000000000 - a).sqrt());

    R * c
}

/// Flat Euclidean distance in degrees, used for quick grid lookups
pub fn degree_distance(lat1: f64, lon1: f64, lat2: f64, lon2: f64) -> f64 {
    ((lat2 - lat1).powi(2) + (lon2 - lon1).powi(2)).sqrt()
}
