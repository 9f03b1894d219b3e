//! Data quality assessment over a factor table
//!
//! # Quality Score
//!
//! ```text
//! Q = clamp(100 - 5·M - 3·O - 2·C - 4·R, 0, 100)
//! ```
//!
//! | Term | Counts |
//! |------|--------|
//! | M | factors with more than 5% missing cells |
//! | O | factors with more than 10% outliers (fewest flagged of the three detectors) |
//! | C | factor pairs with \|r\| > 0.8 |
//! | R | factors with a row not verified in the declared range (missing or outside it) |
//!
//! Outlier detectors: z-score (population std) |z| > 3, Tukey fences at
//! 1.5·IQR, and modified z-score 0.6745·(x - median)/MAD > 3.5. A detector
//! whose scale is zero flags nothing. Correlations use pairwise-complete rows
//! and need at least 3 of them.
//!
//! Counting missing rows under R keeps the score from rising when an
//! out-of-range value is dropped to null.

use crate::factors::FactorCatalog;
use crate::stats;
use crate::table::FactorTable;
use crate::Grade;
use serde::Serialize;
use tracing::{debug, info};

pub const MISSING_THRESHOLD: f64 = 0.05;
pub const OUTLIER_THRESHOLD: f64 = 0.10;
pub const CORRELATION_THRESHOLD: f64 = 0.8;

pub const MISSING_PENALTY: f64 = 5.0;
pub const OUTLIER_PENALTY: f64 = 3.0;
pub const CORRELATION_PENALTY: f64 = 2.0;
pub const RANGE_PENALTY: f64 = 4.0;

pub const Z_SCORE_LIMIT: f64 = 3.0;
pub const IQR_MULTIPLIER: f64 = 1.5;
pub const MODIFIED_Z_LIMIT: f64 = 3.5;
const MODIFIED_Z_SCALE: f64 = 0.6745;

const MIN_CORRELATION_PAIRS: usize = 3;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct OutlierCounts {
    pub z_score: usize,
    pub iqr: usize,
    pub modified_z: usize,
}

impl OutlierCounts {
    /// Fewest outliers flagged by any detector
    pub fn conservative(&self) -> usize {
        self.z_score.min(self.iqr).min(self.modified_z)
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct FactorQuality {
    pub factor: String,
    pub n_total: usize,
    pub n_missing: usize,
    pub completeness: f64,
    pub outliers: OutlierCounts,
    /// Conservative outlier count over non-null values
    pub outlier_ratio: f64,
    pub mean: Option<f64>,
    pub std_dev: Option<f64>,
    pub min: Option<f64>,
    pub max: Option<f64>,
    pub median: Option<f64>,
    pub skewness: Option<f64>,
    pub kurtosis: Option<f64>,
    pub normality_p_value: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub declared_range: Option<(f64, f64)>,
    pub range_violations: usize,
}

impl FactorQuality {
    pub fn missing_ratio(&self) -> f64 {
        1.0 - self.completeness
    }

    /// Rows whose value cannot be confirmed inside the declared range
    pub fn range_unverified(&self) -> usize {
        if self.declared_range.is_some() {
            self.range_violations + self.n_missing
        } else {
            0
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct CorrelationPair {
    pub factor_a: String,
    pub factor_b: String,
    pub correlation: f64,
}

#[derive(Debug, Clone, Copy, Default, Serialize)]
pub struct QualityPenalties {
    pub missing: f64,
    pub outliers: f64,
    pub correlation: f64,
    pub range: f64,
}

impl QualityPenalties {
    pub fn total(&self) -> f64 {
        self.missing + self.outliers + self.correlation + self.range
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct QualityReport {
    pub n_rows: usize,
    pub factors: Vec<FactorQuality>,
    pub correlation_matrix: Vec<Vec<Option<f64>>>,
    pub high_correlation_pairs: Vec<CorrelationPair>,
    pub penalties: QualityPenalties,
    pub overall_quality_score: f64,
    pub grade: Grade,
}

impl QualityReport {
    pub fn factor(&self, name: &str) -> Option<&FactorQuality> {
        self.factors.iter().find(|f| f.factor == name)
    }
}

pub fn zscore_outliers(values: &[f64]) -> usize {
    let (Some(mu), Some(sd)) = (stats::mean(values), stats::population_std(values)) else {
        return 0;
    };
    if sd <= 0.0 {
        return 0;
    }
    values
        .iter()
        .filter(|v| ((*v - mu) / sd).abs() > Z_SCORE_LIMIT)
        .count()
}

pub fn iqr_outliers(values: &[f64]) -> usize {
    let Some((q1, q3)) = stats::quartiles(values) else {
        return 0;
    };
    let iqr = q3 - q1;
    let lower = q1 - IQR_MULTIPLIER * iqr;
    let upper = q3 + IQR_MULTIPLIER * iqr;
    values.iter().filter(|&&v| v < lower || v > upper).count()
}

pub fn modified_z_outliers(values: &[f64]) -> usize {
    let Some((med, mad)) = stats::median_absolute_deviation(values) else {
        return 0;
    };
    if mad <= 0.0 {
        return 0;
    }
    values
        .iter()
        .filter(|&&v| (MODIFIED_Z_SCALE * (v - med) / mad).abs() > MODIFIED_Z_LIMIT)
        .count()
}

/// Pure function of the table; holds only the catalog for declared ranges
#[derive(Debug, Clone, Default)]
pub struct QualityAssessor {
    catalog: FactorCatalog,
}

impl QualityAssessor {
    pub fn new(catalog: FactorCatalog) -> Self {
        Self { catalog }
    }

    pub fn assess(&self, table: &FactorTable) -> QualityReport {
        let factors: Vec<FactorQuality> = table
            .factors()
            .iter()
            .enumerate()
            .map(|(j, name)| self.assess_factor(name, &table.column(j)))
            .collect();

        let (correlation_matrix, high_correlation_pairs) = correlation_analysis(table);

        let penalties = QualityPenalties {
            missing: MISSING_PENALTY * count_where(&factors, |f| f.missing_ratio() > MISSING_THRESHOLD),
            outliers: OUTLIER_PENALTY * count_where(&factors, |f| f.outlier_ratio > OUTLIER_THRESHOLD),
            correlation: CORRELATION_PENALTY * high_correlation_pairs.len() as f64,
            range: RANGE_PENALTY * count_where(&factors, |f| f.range_unverified() > 0),
        };

        let overall_quality_score = (100.0 - penalties.total()).clamp(0.0, 100.0);
        let grade = Grade::from_score(overall_quality_score);

        info!(
            "Quality: {:.1} ({}) over {} rows, {} correlated pairs",
            overall_quality_score,
            grade,
            table.len(),
            high_correlation_pairs.len()
        );

        QualityReport {
            n_rows: table.len(),
            factors,
            correlation_matrix,
            high_correlation_pairs,
            penalties,
            overall_quality_score,
            grade,
        }
    }

    fn assess_factor(&self, name: &str, column: &[Option<f64>]) -> FactorQuality {
        let values = stats::finite(column);
        let n_total = column.len();
        let n_missing = n_total - values.len();
        // An empty column has nothing missing
        let completeness = if n_total == 0 {
            1.0
        } else {
            values.len() as f64 / n_total as f64
        };

        let outliers = OutlierCounts {
            z_score: zscore_outliers(&values),
            iqr: iqr_outliers(&values),
            modified_z: modified_z_outliers(&values),
        };
        let outlier_ratio = if values.is_empty() {
            0.0
        } else {
            outliers.conservative() as f64 / values.len() as f64
        };

        let declared = self.catalog.get(name);
        let range_violations = declared
            .map(|f| values.iter().filter(|&&v| !f.in_declared_range(v)).count())
            .unwrap_or(0);

        let sorted = stats::sorted(&values);
        debug!(
            "{}: completeness={:.3} outliers={:?} range_violations={}",
            name, completeness, outliers, range_violations
        );

        FactorQuality {
            factor: name.to_string(),
            n_total,
            n_missing,
            completeness,
            outliers,
            outlier_ratio,
            mean: stats::mean(&values),
            std_dev: stats::sample_variance(&values).map(f64::sqrt),
            min: sorted.first().copied(),
            max: sorted.last().copied(),
            median: stats::quantile_sorted(&sorted, 0.5),
            skewness: stats::skewness(&values),
            kurtosis: stats::excess_kurtosis(&values),
            normality_p_value: stats::normality_p_value(&values),
            declared_range: declared.map(|f| (f.min_value, f.max_value)),
            range_violations,
        }
    }
}

fn count_where(factors: &[FactorQuality], pred: impl Fn(&FactorQuality) -> bool) -> f64 {
    factors.iter().filter(|f| pred(f)).count() as f64
}

fn correlation_analysis(table: &FactorTable) -> (Vec<Vec<Option<f64>>>, Vec<CorrelationPair>) {
    let k = table.n_factors();
    let columns: Vec<Vec<Option<f64>>> = (0..k).map(|j| table.column(j)).collect();
    let mut matrix = vec![vec![None; k]; k];
    let mut pairs = Vec::new();

    for a in 0..k {
        for b in a..k {
            let (x, y): (Vec<f64>, Vec<f64>) = columns[a]
                .iter()
                .zip(&columns[b])
                .filter_map(|(u, v)| match (u, v) {
                    (Some(u), Some(v)) if u.is_finite() && v.is_finite() => Some((*u, *v)),
                    _ => None,
                })
                .unzip();
            if x.len() < MIN_CORRELATION_PAIRS {
                continue;
            }
            let r = stats::pearson(&x, &y);
            matrix[a][b] = r;
            matrix[b][a] = r;
            if let Some(r) = r {
                if a != b && r.abs() > CORRELATION_THRESHOLD {
                    pairs.push(CorrelationPair {
                        factor_a: table.factors()[a].clone(),
                        factor_b: table.factors()[b].clone(),
                        correlation: r,
                    });
                }
            }
        }
    }
    (matrix, pairs)
}
