//! Validation of predicted scores against ground-truth stations
//!
//! Five independent blocks, each stored as a [`Section`] so one failing
//! analysis degrades to `{"error": ...}` without touching the others:
//!
//! | Block | Matches by | Metrics |
//! |-------|------------|---------|
//! | spatial | nearest scored candidate within the match radius | Pearson, Spearman, MSE/MAE/RMSE, R² |
//! | ranking | nearest scored candidate, any distance | Spearman, Kendall τ-b, rank error, top-k overlap |
//! | cross_validation | as ranking; needs ≥ 5 matches | k-fold RMSE/R², OLS and random forest |
//! | coverage | nearest candidate per station | share covered, distances |
//! | outlier | prediction scores | IQR outlier share |
//!
//! # Overall Score
//!
//! ```text
//! 30·clamp(spatial r) + 25·clamp(ranking ρ) + 25·clamp(best CV R²) + outlier points
//! ```
//!
//! Outlier points are 20 while the outlier share is at most the threshold
//! (0.2), then fall linearly to 0 at a share of 1.

use crate::aggregate::{ScoredCandidate, ScoredTable};
use crate::config::ValidationConfig;
use crate::models::{self, LinearRegression, ModelError, RandomForestRegressor, Regressor};
use crate::quality::iqr_outliers;
use crate::{haversine_km, stats, Grade};
use ground_stations::GroundTruth;
use nalgebra::DMatrix;
use serde::Serialize;
use thiserror::Error;
use tracing::{info, warn};

pub const SPATIAL_POINTS: f64 = 30.0;
pub const RANKING_POINTS: f64 = 25.0;
pub const CV_POINTS: f64 = 25.0;
pub const OUTLIER_POINTS: f64 = 20.0;

/// Ranking needs at least two stations to order
const MIN_RANKING_SAMPLES: usize = 2;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum ValidationError {
    #[error("No ground-truth stations with a valid location")]
    NoGroundTruth,
    #[error("No scored predictions")]
    NoPredictions,
    #[error("Insufficient samples: need {needed}, have {found}")]
    InsufficientSamples { needed: usize, found: usize },
    #[error("Model failed: {0}")]
    Model(#[from] ModelError),
}

/// A validation block or the reason it could not be computed
#[derive(Debug, Clone, Serialize)]
#[serde(untagged)]
pub enum Section<T> {
    Complete(T),
    Failed { error: String },
}

impl<T> Section<T> {
    pub fn as_complete(&self) -> Option<&T> {
        match self {
            Section::Complete(value) => Some(value),
            Section::Failed { .. } => None,
        }
    }

    pub fn error(&self) -> Option<&str> {
        match self {
            Section::Complete(_) => None,
            Section::Failed { error } => Some(error),
        }
    }

    pub fn is_complete(&self) -> bool {
        matches!(self, Section::Complete(_))
    }
}

impl<T> From<Result<T, ValidationError>> for Section<T> {
    fn from(result: Result<T, ValidationError>) -> Self {
        match result {
            Ok(value) => Section::Complete(value),
            Err(e) => Section::Failed { error: e.to_string() },
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct MatchedPair {
    pub station_id: String,
    pub candidate_id: String,
    pub distance_km: f64,
    pub predicted_score: f64,
    pub true_score: f64,
}

#[derive(Debug, Clone, Serialize)]
pub struct SpatialMetrics {
    pub n_ground_truth: usize,
    pub n_matches: usize,
    pub match_radius_km: f64,
    pub pearson: Option<f64>,
    pub spearman: Option<f64>,
    pub mse: Option<f64>,
    pub mae: Option<f64>,
    pub rmse: Option<f64>,
    pub r2: Option<f64>,
    pub matches: Vec<MatchedPair>,
}

#[derive(Debug, Clone, Serialize)]
pub struct TopKAgreement {
    pub k: usize,
    pub overlap: usize,
    pub agreement: f64,
}

#[derive(Debug, Clone, Serialize)]
pub struct RankingMetrics {
    pub n: usize,
    pub spearman: Option<f64>,
    pub kendall_tau: Option<f64>,
    pub mean_rank_error: f64,
    pub max_rank_error: f64,
    pub top_k: Vec<TopKAgreement>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ModelCvMetrics {
    pub model: String,
    pub folds: usize,
    pub rmse_mean: f64,
    pub rmse_std: f64,
    pub r2_mean: Option<f64>,
    pub r2_std: Option<f64>,
}

#[derive(Debug, Clone, Serialize)]
pub struct CrossValidationMetrics {
    pub n_samples: usize,
    pub k_folds: usize,
    pub models: Vec<ModelCvMetrics>,
}

impl CrossValidationMetrics {
    pub fn best_r2(&self) -> Option<f64> {
        self.models
            .iter()
            .filter_map(|m| m.r2_mean)
            .fold(None, |best: Option<f64>, r| Some(best.map_or(r, |b| b.max(r))))
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct CoverageMetrics {
    pub n_ground_truth: usize,
    pub n_covered: usize,
    pub coverage_ratio: f64,
    pub mean_nearest_km: f64,
    pub max_nearest_km: f64,
}

#[derive(Debug, Clone, Serialize)]
pub struct OutlierMetrics {
    pub n_scores: usize,
    pub n_outliers: usize,
    pub outlier_fraction: f64,
}

#[derive(Debug, Clone, Copy, Default, Serialize)]
pub struct ScoreBreakdown {
    pub spatial: f64,
    pub ranking: f64,
    pub cross_validation: f64,
    pub outlier: f64,
}

impl ScoreBreakdown {
    pub fn total(&self) -> f64 {
        self.spatial + self.ranking + self.cross_validation + self.outlier
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ValidationResult {
    pub spatial: Section<SpatialMetrics>,
    pub ranking: Section<RankingMetrics>,
    pub cross_validation: Section<CrossValidationMetrics>,
    pub coverage: Section<CoverageMetrics>,
    pub outlier: Section<OutlierMetrics>,
    pub score_breakdown: ScoreBreakdown,
    pub overall_validation_score: f64,
    pub validation_grade: Grade,
}

/// A ground-truth station paired with its nearest scored candidate
struct Substitute<'a> {
    truth: &'a GroundTruth,
    candidate: &'a ScoredCandidate,
    score: f64,
    distance_km: f64,
}

fn nearest_scored<'a>(predictions: &'a ScoredTable, lat: f64, lon: f64) -> Option<(&'a ScoredCandidate, f64, f64)> {
    predictions
        .rows
        .iter()
        .filter(|r| r.candidate.has_valid_location())
        .filter_map(|r| {
            let score = r.investment_score.filter(|s| s.is_finite())?;
            let d = haversine_km(lat, lon, r.candidate.latitude, r.candidate.longitude);
            d.is_finite().then_some((r, score, d))
        })
        .min_by(|a, b| a.2.total_cmp(&b.2))
}

fn valid_truth(ground_truth: &[GroundTruth]) -> Vec<&GroundTruth> {
    ground_truth
        .iter()
        .filter(|g| crate::is_valid_coordinate(g.latitude, g.longitude) && g.success_score.is_finite())
        .collect()
}

/// Points for an outlier share `fraction` above `threshold`
pub fn outlier_points(fraction: f64, threshold: f64) -> f64 {
    if fraction <= threshold {
        OUTLIER_POINTS
    } else {
        OUTLIER_POINTS * (1.0 - (fraction - threshold) / (1.0 - threshold)).max(0.0)
    }
}

/// Contiguous fold bounds; the first `n % k` folds take one extra sample
fn fold_bounds(n: usize, k: usize) -> Vec<(usize, usize)> {
    let base = n / k;
    let extra = n % k;
    let mut start = 0;
    (0..k)
        .map(|i| {
            let size = base + usize::from(i < extra);
            let bounds = (start, start + size);
            start += size;
            bounds
        })
        .collect()
}

fn std_dev(values: &[f64]) -> f64 {
    stats::population_std(values).unwrap_or(0.0)
}

#[derive(Debug, Clone)]
pub struct ValidationFramework {
    config: ValidationConfig,
    seed: u64,
}

impl Default for ValidationFramework {
    fn default() -> Self {
        Self::new(ValidationConfig::default())
    }
}

impl ValidationFramework {
    pub fn new(config: ValidationConfig) -> Self {
        Self { config, seed: 42 }
    }

    /// Seed for the cross-validation forest
    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = seed;
        self
    }

    fn substitutes<'a>(&self, predictions: &'a ScoredTable, truth: &[&'a GroundTruth]) -> Vec<Substitute<'a>> {
        truth
            .iter()
            .filter_map(|&g| {
                nearest_scored(predictions, g.latitude, g.longitude).map(|(candidate, score, distance_km)| Substitute {
                    truth: g,
                    candidate,
                    score,
                    distance_km,
                })
            })
            .collect()
    }

    pub fn spatial(&self, predictions: &ScoredTable, ground_truth: &[GroundTruth]) -> Result<SpatialMetrics, ValidationError> {
        let truth = valid_truth(ground_truth);
        let matches: Vec<MatchedPair> = self
            .substitutes(predictions, &truth)
            .into_iter()
            .filter(|s| s.distance_km <= self.config.match_radius_km)
            .map(|s| MatchedPair {
                station_id: s.truth.station_id.clone(),
                candidate_id: s.candidate.candidate.id.clone(),
                distance_km: s.distance_km,
                predicted_score: s.score,
                true_score: s.truth.success_score,
            })
            .collect();

        if matches.is_empty() {
            warn!("Spatial validation: no station within {} km of a candidate", self.config.match_radius_km);
        }

        let predicted: Vec<f64> = matches.iter().map(|m| m.predicted_score).collect();
        let actual: Vec<f64> = matches.iter().map(|m| m.true_score).collect();
        let mse = models::mean_squared_error(&actual, &predicted);

        Ok(SpatialMetrics {
            n_ground_truth: truth.len(),
            n_matches: matches.len(),
            match_radius_km: self.config.match_radius_km,
            pearson: stats::pearson(&predicted, &actual),
            spearman: stats::spearman(&predicted, &actual),
            mse,
            mae: models::mean_absolute_error(&actual, &predicted),
            rmse: mse.map(f64::sqrt),
            r2: models::r2_score(&actual, &predicted),
            matches,
        })
    }

    pub fn ranking(&self, predictions: &ScoredTable, ground_truth: &[GroundTruth]) -> Result<RankingMetrics, ValidationError> {
        let truth = valid_truth(ground_truth);
        if truth.is_empty() {
            return Err(ValidationError::NoGroundTruth);
        }
        let subs = self.substitutes(predictions, &truth);
        if subs.is_empty() {
            return Err(ValidationError::NoPredictions);
        }
        if subs.len() < MIN_RANKING_SAMPLES {
            return Err(ValidationError::InsufficientSamples {
                needed: MIN_RANKING_SAMPLES,
                found: subs.len(),
            });
        }

        let predicted: Vec<f64> = subs.iter().map(|s| s.score).collect();
        let actual: Vec<f64> = subs.iter().map(|s| s.truth.success_score).collect();
        let n = subs.len();

        // Descending ranks: rank 1 is the highest score
        let negate = |v: &[f64]| v.iter().map(|x| -x).collect::<Vec<_>>();
        let predicted_rank = stats::average_ranks(&negate(&predicted[..]));
        let actual_rank = stats::average_ranks(&negate(&actual[..]));
        let errors: Vec<f64> = predicted_rank
            .iter()
            .zip(&actual_rank)
            .map(|(p, a)| (p - a).abs())
            .collect();

        let top_order = |ranks: Vec<usize>| {
            let mut order: Vec<usize> = (0..ranks.len()).collect();
            order.sort_by_key(|&i| ranks[i]);
            order
        };
        let predicted_order = top_order(stats::ordinal_ranks(&negate(&predicted[..])));
        let actual_order = top_order(stats::ordinal_ranks(&negate(&actual[..])));

        let top_k = self
            .config
            .top_k
            .iter()
            .copied()
            .filter(|&k| k > 0 && k <= n)
            .map(|k| {
                let overlap = predicted_order[..k]
                    .iter()
                    .filter(|i| actual_order[..k].contains(i))
                    .count();
                TopKAgreement {
                    k,
                    overlap,
                    agreement: overlap as f64 / k as f64,
                }
            })
            .collect();

        Ok(RankingMetrics {
            n,
            spearman: stats::spearman(&predicted, &actual),
            kendall_tau: stats::kendall_tau(&predicted, &actual),
            mean_rank_error: errors.iter().sum::<f64>() / n as f64,
            max_rank_error: errors.iter().copied().fold(0.0, f64::max),
            top_k,
        })
    }

    pub fn cross_validation(
        &self,
        predictions: &ScoredTable,
        ground_truth: &[GroundTruth],
    ) -> Result<CrossValidationMetrics, ValidationError> {
        let truth = valid_truth(ground_truth);
        let subs = self.substitutes(predictions, &truth);
        if subs.len() < self.config.min_cv_samples {
            return Err(ValidationError::InsufficientSamples {
                needed: self.config.min_cv_samples,
                found: subs.len(),
            });
        }

        let n = subs.len();
        let p = predictions.factors.len();
        let means: Vec<f64> = (0..p)
            .map(|j| {
                let col = stats::finite(&subs.iter().map(|s| s.candidate.values[j]).collect::<Vec<_>>());
                stats::mean(&col).unwrap_or(0.0)
            })
            .collect();
        let x = DMatrix::from_fn(n, p, |i, j| {
            subs[i].candidate.values[j].filter(|v| v.is_finite()).unwrap_or(means[j])
        });
        let y: Vec<f64> = subs.iter().map(|s| s.truth.success_score).collect();

        let k = self.config.max_folds.min(n);
        let folds = fold_bounds(n, k);

        let mut linear = LinearRegression::new();
        let mut forest = RandomForestRegressor::new(
            self.config.cv_forest_trees,
            self.config.cv_forest_max_depth,
            2,
            self.seed,
        );
        let models = vec![
            self.cv_model("linear_regression", &mut linear, &x, &y, &folds)?,
            self.cv_model("random_forest", &mut forest, &x, &y, &folds)?,
        ];

        Ok(CrossValidationMetrics {
            n_samples: n,
            k_folds: k,
            models,
        })
    }

    fn cv_model(
        &self,
        name: &str,
        model: &mut dyn Regressor,
        x: &DMatrix<f64>,
        y: &[f64],
        folds: &[(usize, usize)],
    ) -> Result<ModelCvMetrics, ValidationError> {
        let n = y.len();
        let mut rmses = Vec::with_capacity(folds.len());
        let mut r2s = Vec::new();

        for &(start, end) in folds {
            let train: Vec<usize> = (0..n).filter(|i| *i < start || *i >= end).collect();
            let rows = |idx: &[usize]| DMatrix::from_fn(idx.len(), x.ncols(), |i, j| x[(idx[i], j)]);
            let test: Vec<usize> = (start..end).collect();

            let train_y: Vec<f64> = train.iter().map(|&i| y[i]).collect();
            let test_y: Vec<f64> = test.iter().map(|&i| y[i]).collect();

            model.fit(&rows(&train[..]), &train_y)?;
            let predicted = model.predict(&rows(&test[..]))?;

            if let Some(mse) = models::mean_squared_error(&test_y, &predicted) {
                rmses.push(mse.sqrt());
            }
            if let Some(r2) = models::r2_score(&test_y, &predicted) {
                r2s.push(r2);
            }
        }

        Ok(ModelCvMetrics {
            model: name.to_string(),
            folds: folds.len(),
            rmse_mean: stats::mean(&rmses).unwrap_or(0.0),
            rmse_std: std_dev(&rmses),
            r2_mean: stats::mean(&r2s),
            r2_std: (!r2s.is_empty()).then(|| std_dev(&r2s)),
        })
    }

    pub fn coverage(&self, predictions: &ScoredTable, ground_truth: &[GroundTruth]) -> Result<CoverageMetrics, ValidationError> {
        let truth = valid_truth(ground_truth);
        if truth.is_empty() {
            return Err(ValidationError::NoGroundTruth);
        }
        let distances: Vec<f64> = self.substitutes(predictions, &truth).iter().map(|s| s.distance_km).collect();
        if distances.is_empty() {
            return Err(ValidationError::NoPredictions);
        }
        let n_covered = distances.iter().filter(|&&d| d <= self.config.match_radius_km).count();

        Ok(CoverageMetrics {
            n_ground_truth: truth.len(),
            n_covered,
            coverage_ratio: n_covered as f64 / truth.len() as f64,
            mean_nearest_km: distances.iter().sum::<f64>() / distances.len() as f64,
            max_nearest_km: distances.iter().copied().fold(0.0, f64::max),
        })
    }

    pub fn outliers(&self, predictions: &ScoredTable) -> Result<OutlierMetrics, ValidationError> {
        let scores = stats::finite(&predictions.scores());
        if scores.is_empty() {
            return Err(ValidationError::NoPredictions);
        }
        let n_outliers = iqr_outliers(&scores);
        Ok(OutlierMetrics {
            n_scores: scores.len(),
            n_outliers,
            outlier_fraction: n_outliers as f64 / scores.len() as f64,
        })
    }

    pub fn validate(&self, predictions: &ScoredTable, ground_truth: &[GroundTruth]) -> ValidationResult {
        let spatial: Section<_> = self.spatial(predictions, ground_truth).into();
        let ranking: Section<_> = self.ranking(predictions, ground_truth).into();
        let cross_validation: Section<_> = self.cross_validation(predictions, ground_truth).into();
        let coverage: Section<_> = self.coverage(predictions, ground_truth).into();
        let outlier: Section<_> = self.outliers(predictions).into();

        for (name, error) in [
            ("spatial", spatial.error()),
            ("ranking", ranking.error()),
            ("cross_validation", cross_validation.error()),
            ("coverage", coverage.error()),
            ("outlier", outlier.error()),
        ] {
            if let Some(error) = error {
                warn!("Validation block {} unavailable: {}", name, error);
            }
        }

        let unit = |v: Option<f64>| v.map(|x| x.clamp(0.0, 1.0)).unwrap_or(0.0);
        let score_breakdown = ScoreBreakdown {
            spatial: SPATIAL_POINTS * unit(spatial.as_complete().and_then(|s| s.pearson)),
            ranking: RANKING_POINTS * unit(ranking.as_complete().and_then(|r| r.spearman)),
            cross_validation: CV_POINTS * unit(cross_validation.as_complete().and_then(|c| c.best_r2())),
            outlier: outlier
                .as_complete()
                .map(|o| outlier_points(o.outlier_fraction, self.config.outlier_threshold))
                .unwrap_or(0.0),
        };

        let overall_validation_score = score_breakdown.total().clamp(0.0, 100.0);
        let validation_grade = Grade::from_score(overall_validation_score);
        info!("Validation: {:.1} ({})", overall_validation_score, validation_grade);

        ValidationResult {
            spatial,
            ranking,
            cross_validation,
            coverage,
            outlier,
            score_breakdown,
            overall_validation_score,
            validation_grade,
        }
    }
}
