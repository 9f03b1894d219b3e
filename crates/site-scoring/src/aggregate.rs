//! Score aggregation with uncertainty propagation
//!
//! Per candidate, the non-null (value, weight, u) triples are combined by the
//! selected law, where `u` is the weight's CI width as a standard error:
//!
//! | Law | Score | Uncertainty |
//! |-----|-------|-------------|
//! | `weighted_average` | Σ(w·x) / Σw | sqrt(Σ(w·u)²) |
//! | `geometric_mean` | (Π x')^(1/n) | 1.2 · mean(u) |
//! | `harmonic_mean` | n / Σ(1/x') | 1.2 · mean(u) |
//! | `weighted_geometric` | Π x'^(w/Σw) | 1.2 · mean(u) |
//!
//! `x' = max(x, 0) + 1e-6`. The CI is score ± 1.96·uncertainty, and ranks are
//! dense and descending.

use crate::stats;
use crate::table::FactorTable;
use crate::weights::FactorWeight;
use crate::{Candidate, Result, ScoringError, Z_95};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use tracing::{debug, info};

/// Positive shift for the multiplicative laws
pub const POSITIVE_SHIFT: f64 = 0.000001000;

/// Uncertainty inflation for laws without exact propagation
pub const COARSE_UNCERTAINTY_FACTOR: f64 = 1.200000000;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AggregationMethod {
    #[default]
    WeightedAverage,
    GeometricMean,
    HarmonicMean,
    WeightedGeometric,
}

impl AggregationMethod {
    pub const ALL: [AggregationMethod; 4] = [
        AggregationMethod::WeightedAverage,
        AggregationMethod::GeometricMean,
        AggregationMethod::HarmonicMean,
        AggregationMethod::WeightedGeometric,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            AggregationMethod::WeightedAverage => "weighted_average",
            AggregationMethod::GeometricMean => "geometric_mean",
            AggregationMethod::HarmonicMean => "harmonic_mean",
            AggregationMethod::WeightedGeometric => "weighted_geometric",
        }
    }
}

impl fmt::Display for AggregationMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for AggregationMethod {
    type Err = ScoringError;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        let wanted = s.trim().to_lowercase().replace('-', "_");
        AggregationMethod::ALL
            .into_iter()
            .find(|m| m.as_str() == wanted)
            .ok_or_else(|| ScoringError::Config(format!("unknown aggregation method '{}'", s)))
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ScoredCandidate {
    #[serde(flatten)]
    pub candidate: Candidate,
    /// Normalized factor values, aligned with [`ScoredTable::factors`]
    pub values: Vec<Option<f64>>,
    pub investment_score: Option<f64>,
    pub score_uncertainty: Option<f64>,
    pub score_ci_lower: Option<f64>,
    pub score_ci_upper: Option<f64>,
    pub investment_rank: Option<usize>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ScoredTable {
    pub factors: Vec<String>,
    pub method: AggregationMethod,
    pub rows: Vec<ScoredCandidate>,
}

impl ScoredTable {
    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn scores(&self) -> Vec<Option<f64>> {
        self.rows.iter().map(|r| r.investment_score).collect()
    }

    /// Rows ordered by rank, unscored rows last
    pub fn ranked(&self) -> Vec<&ScoredCandidate> {
        let mut rows: Vec<&ScoredCandidate> = self.rows.iter().collect();
        rows.sort_by_key(|r| r.investment_rank.unwrap_or(usize::MAX));
        rows
    }

    pub fn top(&self, n: usize) -> Vec<&ScoredCandidate> {
        self.ranked().into_iter().take(n).collect()
    }
}

/// One combined score
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Combined {
    pub score: f64,
    pub uncertainty: f64,
}

/// Combine (value, weight, u) triples; `None` when nothing is weighted
pub fn combine(method: AggregationMethod, terms: &[(f64, f64, f64)]) -> Option<Combined> {
    if terms.is_empty() {
        return None;
    }
    let weight_sum: f64 = terms.iter().map(|t| t.1).sum();
    let shifted = |x: f64| x.max(0.0) + POSITIVE_SHIFT;
    let n = terms.len() as f64;

    let score = match method {
        AggregationMethod::WeightedAverage => {
            if !(weight_sum > 0.0) {
                return None;
            }
            terms.iter().map(|(x, w, _)| w * x).sum::<f64>() / weight_sum
        }
        AggregationMethod::GeometricMean => (terms.iter().map(|(x, _, _)| shifted(*x).ln()).sum::<f64>() / n).exp(),
        AggregationMethod::HarmonicMean => n / terms.iter().map(|(x, _, _)| 1.0 / shifted(*x)).sum::<f64>(),
        AggregationMethod::WeightedGeometric => {
            if !(weight_sum > 0.0) {
                return None;
            }
            terms
                .iter()
                .map(|(x, w, _)| (w / weight_sum) * shifted(*x).ln())
                .sum::<f64>()
                .exp()
        }
    };

    let uncertainty = match method {
        AggregationMethod::WeightedAverage => terms.iter().map(|(_, w, u)| (w * u).powi(2)).sum::<f64>().sqrt(),
        _ => COARSE_UNCERTAINTY_FACTOR * terms.iter().map(|t| t.2).sum::<f64>() / n,
    };

    score.is_finite().then_some(Combined { score, uncertainty })
}

#[derive(Debug, Clone, Copy, Default)]
pub struct ScoreAggregator {
    method: AggregationMethod,
}

impl ScoreAggregator {
    pub fn new(method: AggregationMethod) -> Self {
        Self { method }
    }

    pub fn method(&self) -> AggregationMethod {
        self.method
    }

    /// Per-column (weight, u); fails if a table factor has no weight
    fn weight_columns(&self, table: &FactorTable, weights: &[FactorWeight]) -> Result<Vec<(f64, f64)>> {
        table
            .factors()
            .iter()
            .map(|name| {
                weights
                    .iter()
                    .find(|w| &w.factor_name == name)
                    .map(|w| (w.weight, w.uncertainty()))
                    .ok_or_else(|| ScoringError::MissingWeight(name.clone()))
            })
            .collect()
    }

    /// Scores only, no ranking
    pub fn scores(&self, table: &FactorTable, weights: &[FactorWeight]) -> Result<Vec<Option<Combined>>> {
        let columns = self.weight_columns(table, weights)?;
        Ok(table
            .rows()
            .iter()
            .map(|row| {
                let terms: Vec<(f64, f64, f64)> = row
                    .values
                    .iter()
                    .zip(&columns)
                    .filter_map(|(v, (w, u))| v.filter(|x| x.is_finite()).map(|x| (x, *w, *u)))
                    .collect();
                combine(self.method, &terms)
            })
            .collect())
    }

    pub fn aggregate(&self, table: &FactorTable, weights: &[FactorWeight]) -> Result<ScoredTable> {
        let combined = self.scores(table, weights)?;
        let ranks = stats::dense_rank_desc(&combined.iter().map(|c| c.map(|c| c.score)).collect::<Vec<_>>());

        let rows: Vec<ScoredCandidate> = table
            .rows()
            .iter()
            .zip(combined)
            .zip(ranks)
            .map(|((row, c), rank)| ScoredCandidate {
                candidate: row.candidate.clone(),
                values: row.values.clone(),
                investment_score: c.map(|c| c.score),
                score_uncertainty: c.map(|c| c.uncertainty),
                score_ci_lower: c.map(|c| c.score - Z_95 * c.uncertainty),
                score_ci_upper: c.map(|c| c.score + Z_95 * c.uncertainty),
                investment_rank: rank,
            })
            .collect();

        let unscored = rows.iter().filter(|r| r.investment_score.is_none()).count();
        if unscored > 0 {
            debug!("{} candidates have no score", unscored);
        }
        info!("Aggregated {} candidates with {}", rows.len(), self.method);

        Ok(ScoredTable {
            factors: table.factors().to_vec(),
            method: self.method,
            rows,
        })
    }
}
