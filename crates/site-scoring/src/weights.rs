//! Ensemble factor weights
//!
//! Four constituent methods each produce one weight per factor, normalized to
//! sum to 1:
//!
//! | Method | Raw weight |
//! |--------|------------|
//! | Declared | nominal catalog weight |
//! | PCA | \|loading\| on the first principal component |
//! | Variance | column sample variance |
//! | Supervised | random-forest importance against proximity to known-good sites |
//!
//! The ensemble is the element-wise mean of the methods that succeeded,
//! renormalized. A method that cannot run (no rows, degenerate covariance,
//! no known-good sites) is recorded as a failure and left out.
//!
//! Confidence intervals are the 2.5/97.5 percentiles of draws from
//! `Normal(w, spread·w)`. This is a parametric approximation, not a resample
//! over the data.

use crate::config::WeightConfig;
use crate::factors::FactorCatalog;
use crate::models::{ModelError, RandomForestRegressor, Regressor};
use crate::table::FactorTable;
use crate::{haversine_km, stats, Z_95};
use ground_stations::GeoLocation;
use nalgebra::{DMatrix, SymmetricEigen};
use rand::Rng;
use serde::{Deserialize, Serialize};
use statrs::distribution::Normal;
use std::collections::BTreeMap;
use std::fmt;
use thiserror::Error;
use tracing::{debug, info, warn};

pub const ENSEMBLE_METHOD: &str = "ensemble";

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WeightMethod {
    Declared,
    Pca,
    Variance,
    Supervised,
}

impl WeightMethod {
    pub const ALL: [WeightMethod; 4] = [
        WeightMethod::Declared,
        WeightMethod::Pca,
        WeightMethod::Variance,
        WeightMethod::Supervised,
    ];
}

impl fmt::Display for WeightMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            WeightMethod::Declared => "declared",
            WeightMethod::Pca => "pca",
            WeightMethod::Variance => "variance",
            WeightMethod::Supervised => "supervised",
        };
        f.write_str(name)
    }
}

/// Why a constituent method produced no weights
#[derive(Error, Debug, Clone, PartialEq)]
pub enum WeightError {
    #[error("No factor has a declared weight")]
    NoDeclaredWeights,
    #[error("Need at least {needed} rows, have {found}")]
    TooFewRows { needed: usize, found: usize },
    #[error("First principal component is degenerate")]
    DegeneratePca,
    #[error("Every factor column has zero variance")]
    ZeroVariance,
    #[error("No known-good locations to build a target from")]
    NoKnownGoodLocations,
    #[error("Model assigned no importance to any factor")]
    NoImportance,
    #[error("Model error: {0}")]
    Model(#[from] ModelError),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FactorWeight {
    pub factor_name: String,
    pub weight: f64,
    pub confidence_interval: (f64, f64),
    pub method: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub effect_size: Option<f64>,
}

impl FactorWeight {
    /// Weight with a zero-width interval
    pub fn fixed(factor_name: impl Into<String>, weight: f64) -> Self {
        Self {
            factor_name: factor_name.into(),
            weight,
            confidence_interval: (weight, weight),
            method: "fixed".to_string(),
            effect_size: None,
        }
    }

    /// CI width as a standard error: width / (2·1.96)
    pub fn uncertainty(&self) -> f64 {
        let (lo, hi) = self.confidence_interval;
        ((hi - lo) / (2.0 * Z_95)).max(0.0)
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ConstituentWeights {
    pub method: WeightMethod,
    pub weights: BTreeMap<String, f64>,
}

#[derive(Debug, Clone, Serialize)]
pub struct MethodFailure {
    pub method: WeightMethod,
    pub reason: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct WeightReport {
    /// One entry per table factor, in table order
    pub weights: Vec<FactorWeight>,
    pub constituents: Vec<ConstituentWeights>,
    pub failures: Vec<MethodFailure>,
}

impl WeightReport {
    pub fn get(&self, factor: &str) -> Option<&FactorWeight> {
        self.weights.iter().find(|w| w.factor_name == factor)
    }

    pub fn total(&self) -> f64 {
        self.weights.iter().map(|w| w.weight).sum()
    }
}

/// Scale to sum 1; `None` if the sum is not positive
fn normalize_weights(raw: &[f64]) -> Option<Vec<f64>> {
    let total: f64 = raw.iter().filter(|v| v.is_finite()).sum();
    if !(total > 0.0) {
        return None;
    }
    Some(
        raw.iter()
            .map(|v| if v.is_finite() { v.max(0.0) / total } else { 0.0 })
            .collect(),
    )
}

#[derive(Debug, Clone, Default)]
pub struct WeightEstimator {
    catalog: FactorCatalog,
    config: WeightConfig,
    known_good: Vec<GeoLocation>,
}

impl WeightEstimator {
    pub fn new(catalog: FactorCatalog, config: WeightConfig) -> Self {
        Self {
            catalog,
            config,
            known_good: Vec::new(),
        }
    }

    /// Sites the supervised proxy measures proximity to
    pub fn with_known_good(mut self, locations: Vec<GeoLocation>) -> Self {
        self.known_good = locations.into_iter().filter(|l| l.is_valid()).collect();
        self
    }

    pub fn declared(&self, table: &FactorTable) -> Result<Vec<f64>, WeightError> {
        let raw: Vec<f64> = table
            .factors()
            .iter()
            .map(|name| self.catalog.get(name).map(|f| f.nominal_weight).unwrap_or(0.0))
            .collect();
        normalize_weights(&raw).ok_or(WeightError::NoDeclaredWeights)
    }

    /// Absolute first-component loadings of the mean-imputed, centered matrix
    pub fn pca(&self, table: &FactorTable) -> Result<Vec<f64>, WeightError> {
        let n = table.len();
        if n < 2 {
            return Err(WeightError::TooFewRows { needed: 2, found: n });
        }
        let x = table.mean_imputed_matrix();
        let means = x.row_mean();
        let centered = DMatrix::from_fn(n, x.ncols(), |i, j| x[(i, j)] - means[j]);
        let covariance = (centered.transpose() * &centered) / (n as f64 - 1.0);

        let eigen = SymmetricEigen::new(covariance);
        let (top, value) = eigen
            .eigenvalues
            .iter()
            .enumerate()
            .max_by(|a, b| a.1.total_cmp(b.1))
            .map(|(i, v)| (i, *v))
            .ok_or(WeightError::DegeneratePca)?;
        if !(value > 0.0) {
            return Err(WeightError::DegeneratePca);
        }

        let loadings: Vec<f64> = eigen.eigenvectors.column(top).iter().map(|v| v.abs()).collect();
        normalize_weights(&loadings).ok_or(WeightError::DegeneratePca)
    }

    pub fn variance(&self, table: &FactorTable) -> Result<Vec<f64>, WeightError> {
        let raw: Vec<f64> = (0..table.n_factors())
            .map(|j| stats::sample_variance(&table.column_values(j)).unwrap_or(0.0))
            .collect();
        normalize_weights(&raw).ok_or(WeightError::ZeroVariance)
    }

    /// max(0, 1 - d/scale) to the nearest known-good site
    pub fn proximity_target(&self, table: &FactorTable) -> Result<Vec<f64>, WeightError> {
        if self.known_good.is_empty() {
            return Err(WeightError::NoKnownGoodLocations);
        }
        Ok(table
            .rows()
            .iter()
            .map(|row| {
                let c = &row.candidate;
                let nearest = self
                    .known_good
                    .iter()
                    .map(|g| haversine_km(c.latitude, c.longitude, g.latitude, g.longitude))
                    .filter(|d| d.is_finite())
                    .fold(f64::INFINITY, f64::min);
                (1.0 - nearest / self.config.supervised_scale_km).max(0.0)
            })
            .collect())
    }

    pub fn supervised(&self, table: &FactorTable, seed: u64) -> Result<Vec<f64>, WeightError> {
        let n = table.len();
        if n < 2 {
            return Err(WeightError::TooFewRows { needed: 2, found: n });
        }
        let target = self.proximity_target(table)?;
        let mut forest = RandomForestRegressor::new(
            self.config.forest_trees,
            self.config.forest_max_depth,
            self.config.forest_min_samples_split,
            seed,
        );
        forest.fit(&table.mean_imputed_matrix(), &target)?;
        normalize_weights(forest.feature_importances()).ok_or(WeightError::NoImportance)
    }

    /// Pearson correlation of each column with the proximity target
    fn effect_sizes(&self, table: &FactorTable) -> Vec<Option<f64>> {
        let Ok(target) = self.proximity_target(table) else {
            return vec![None; table.n_factors()];
        };
        (0..table.n_factors())
            .map(|j| {
                let (x, y): (Vec<f64>, Vec<f64>) = table
                    .column(j)
                    .iter()
                    .zip(&target)
                    .filter_map(|(v, t)| v.filter(|x| x.is_finite()).map(|x| (x, *t)))
                    .unzip();
                stats::pearson(&x, &y)
            })
            .collect()
    }

    /// 2.5/97.5 percentiles of Normal(w, spread·w)
    pub fn confidence_interval<R: Rng + ?Sized>(&self, weight: f64, rng: &mut R) -> (f64, f64) {
        let sd = self.config.ci_spread * weight;
        let Ok(normal) = Normal::new(weight, sd) else {
            return (weight, weight);
        };
        if !(sd > 0.0) {
            return (weight, weight);
        }
        let draws: Vec<f64> = (0..self.config.bootstrap_draws).map(|_| rng.sample(normal)).collect();
        match (stats::percentile(&draws, 2.5), stats::percentile(&draws, 97.5)) {
            (Some(lo), Some(hi)) => (lo, hi),
            _ => (weight, weight),
        }
    }

    pub fn estimate<R: Rng + ?Sized>(&self, table: &FactorTable, rng: &mut R) -> WeightReport {
        let k = table.n_factors();
        let forest_seed: u64 = rng.gen();

        let mut constituents = Vec::new();
        let mut failures = Vec::new();
        for method in WeightMethod::ALL {
            let result = match method {
                WeightMethod::Declared => self.declared(table),
                WeightMethod::Pca => self.pca(table),
                WeightMethod::Variance => self.variance(table),
                WeightMethod::Supervised => self.supervised(table, forest_seed),
            };
            match result {
                Ok(weights) => {
                    debug!("{} weights: {:?}", method, weights);
                    constituents.push(ConstituentWeights {
                        method,
                        weights: table.factors().iter().cloned().zip(weights).collect(),
                    });
                }
                Err(e) => {
                    warn!("{} weighting unavailable: {}", method, e);
                    failures.push(MethodFailure {
                        method,
                        reason: e.to_string(),
                    });
                }
            }
        }

        let mean: Vec<f64> = table
            .factors()
            .iter()
            .map(|name| {
                let sum: f64 = constituents.iter().map(|c| c.weights[name]).sum();
                sum / constituents.len().max(1) as f64
            })
            .collect();
        let ensemble = normalize_weights(&mean).unwrap_or_else(|| {
            if k > 0 {
                warn!("No weighting method succeeded, using uniform weights");
            }
            vec![1.0 / k.max(1) as f64; k]
        });

        let effects = self.effect_sizes(table);
        let weights: Vec<FactorWeight> = table
            .factors()
            .iter()
            .zip(ensemble)
            .zip(effects)
            .map(|((name, weight), effect_size)| FactorWeight {
                factor_name: name.clone(),
                weight,
                confidence_interval: self.confidence_interval(weight, rng),
                method: ENSEMBLE_METHOD.to_string(),
                effect_size,
            })
            .collect();

        info!(
            "Estimated {} ensemble weights from {} of {} methods",
            weights.len(),
            constituents.len(),
            WeightMethod::ALL.len()
        );

        WeightReport {
            weights,
            constituents,
            failures,
        }
    }
}
