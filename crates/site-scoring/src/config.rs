//! Pipeline configuration
//!
//! Every section has a `Default` carrying the documented constants, and every
//! field is `#[serde(default)]`, so a JSON file only needs the keys it
//! overrides:
//!
//! ```json
//! { "seed": 7, "normalization": { "method": "robust" }, "quality": { "minimum_score": 60 } }
//! ```

use crate::aggregate::AggregationMethod;
use crate::normalize::NormalizationMethod;
use crate::{Result, ScoringError};
use serde::{Deserialize, Serialize};
use std::fs::File;
use std::io::BufReader;
use std::path::Path;
use tracing::info;

/// Default RNG seed
pub const DEFAULT_SEED: u64 = 42;

/// Default number of candidates requested from the generator
pub const DEFAULT_CANDIDATES: usize = 500;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GeneratorConfig {
    /// Share of candidates from the grid strategy
    pub grid_share: f64,
    /// Share from the infrastructure-proximate strategy; market gets the rest
    pub infrastructure_share: f64,
    pub lat_range: (f64, f64),
    pub lon_range: (f64, f64),
    /// Jitter as a fraction of cell width
    pub jitter_fraction: f64,
    pub datacenter_radius_km: f64,
    pub cable_landing_radius_km: f64,
    pub ground_station_radius_km: f64,
    /// Market cells at or above this population-density percentile (0-100)
    pub market_percentile: f64,
    /// Maximum market offset in degrees
    pub market_offset_deg: f64,
}

impl Default for GeneratorConfig {
    fn default() -> Self {
        Self {
            grid_share: 0.400000000,
            infrastructure_share: 0.350000000,
            lat_range: (-60.0, 70.0),
            lon_range: (-180.0, 180.0),
            jitter_fraction: 0.250000000,
            datacenter_radius_km: 50.0,
            cable_landing_radius_km: 100.0,
            ground_station_radius_km: 200.0,
            market_percentile: 70.0,
            market_offset_deg: 0.500000000,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct NormalizationConfig {
    pub method: NormalizationMethod,
    /// Flip lower-is-better factors so every column reads higher-is-better
    pub orient_polarity: bool,
}

impl Default for NormalizationConfig {
    fn default() -> Self {
        Self {
            method: NormalizationMethod::MinMax,
            orient_polarity: true,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct WeightConfig {
    pub bootstrap_draws: usize,
    /// Bootstrap std as a fraction of the weight
    pub ci_spread: f64,
    pub forest_trees: usize,
    pub forest_max_depth: usize,
    pub forest_min_samples_split: usize,
    /// Synthetic target reaches 0 at this distance from a known-good site
    pub supervised_scale_km: f64,
}

impl Default for WeightConfig {
    fn default() -> Self {
        Self {
            bootstrap_draws: 1000,
            ci_spread: 0.100000000,
            forest_trees: 100,
            forest_max_depth: 8,
            forest_min_samples_split: 2,
            supervised_scale_km: 2000.0,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ValidationConfig {
    pub match_radius_km: f64,
    pub top_k: Vec<usize>,
    pub max_folds: usize,
    /// Fewest ground-truth matches cross-validation runs on
    pub min_cv_samples: usize,
    /// Outlier share above which the outlier points start dropping
    pub outlier_threshold: f64,
    /// Share of ground-truth stations kept out of factor inputs and weight
    /// training and used only for validation; 0 validates in-sample
    pub holdout_fraction: f64,
    pub cv_forest_trees: usize,
    pub cv_forest_max_depth: usize,
}

impl Default for ValidationConfig {
    fn default() -> Self {
        Self {
            match_radius_km: 100.0,
            top_k: vec![3, 5, 10],
            max_folds: 5,
            min_cv_samples: 5,
            outlier_threshold: 0.200000000,
            holdout_fraction: 0.300000000,
            cv_forest_trees: 50,
            cv_forest_max_depth: 6,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct QualityConfig {
    /// Pipeline stops below this score; 0 leaves the gate open
    pub minimum_score: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    pub seed: u64,
    pub candidates: usize,
    /// Year station longevity is measured against; current UTC year if unset
    pub reference_year: Option<i32>,
    pub aggregation: AggregationMethod,
    pub generator: GeneratorConfig,
    pub normalization: NormalizationConfig,
    pub weights: WeightConfig,
    pub validation: ValidationConfig,
    pub quality: QualityConfig,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            seed: DEFAULT_SEED,
            candidates: DEFAULT_CANDIDATES,
            reference_year: None,
            aggregation: AggregationMethod::WeightedAverage,
            generator: GeneratorConfig::default(),
            normalization: NormalizationConfig::default(),
            weights: WeightConfig::default(),
            validation: ValidationConfig::default(),
            quality: QualityConfig::default(),
        }
    }
}

impl PipelineConfig {
    /// Load from a JSON file and validate
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        info!("Loading pipeline config from {:?}", path);
        let reader = BufReader::new(File::open(path)?);
        let config: Self = serde_json::from_reader(reader)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        let fail = |msg: String| -> Result<()> { Err(ScoringError::Config(msg)) };
        let g = &self.generator;

        for (name, share) in [("grid_share", g.grid_share), ("infrastructure_share", g.infrastructure_share)] {
            if !(0.0..=1.0).contains(&share) {
                return fail(format!("generator.{} must be within [0, 1], got {}", name, share));
            }
        }
        if g.grid_share + g.infrastructure_share > 1.0 + 1e-9 {
            return fail("generator shares sum past 1".to_string());
        }
        if g.lat_range.0 >= g.lat_range.1 || g.lon_range.0 >= g.lon_range.1 {
            return fail("generator ranges must be increasing".to_string());
        }
        if !(0.0..=100.0).contains(&g.market_percentile) {
            return fail(format!("generator.market_percentile must be within [0, 100], got {}", g.market_percentile));
        }
        for (name, radius) in [
            ("datacenter_radius_km", g.datacenter_radius_km),
            ("cable_landing_radius_km", g.cable_landing_radius_km),
            ("ground_station_radius_km", g.ground_station_radius_km),
            ("validation.match_radius_km", self.validation.match_radius_km),
            ("weights.supervised_scale_km", self.weights.supervised_scale_km),
        ] {
            if !(radius.is_finite() && radius > 0.0) {
                return fail(format!("{} must be positive, got {}", name, radius));
            }
        }
        if self.weights.bootstrap_draws == 0 || self.weights.forest_trees == 0 {
            return fail("weights.bootstrap_draws and weights.forest_trees must be non-zero".to_string());
        }
        if self.weights.ci_spread < 0.0 {
            return fail(format!("weights.ci_spread must be non-negative, got {}", self.weights.ci_spread));
        }
        if self.validation.max_folds < 2 {
            return fail("validation.max_folds must be at least 2".to_string());
        }
        if !(0.0..1.0).contains(&self.validation.outlier_threshold) {
            return fail(format!(
                "validation.outlier_threshold must be within [0, 1), got {}",
                self.validation.outlier_threshold
            ));
        }
        if !(0.0..1.0).contains(&self.validation.holdout_fraction) {
            return fail(format!(
                "validation.holdout_fraction must be within [0, 1), got {}",
                self.validation.holdout_fraction
            ));
        }
        if self.validation.cv_forest_trees == 0 || self.validation.cv_forest_max_depth == 0 {
            return fail("validation.cv_forest_trees and validation.cv_forest_max_depth must be non-zero".to_string());
        }
        if !(0.0..=100.0).contains(&self.quality.minimum_score) {
            return fail(format!("quality.minimum_score must be within [0, 100], got {}", self.quality.minimum_score));
        }
        Ok(())
    }
}
