//! Per-column factor normalization
//!
//! | Method | Transform | Range |
//! |--------|-----------|-------|
//! | `min_max` | (x - min) / (max - min) | [0, 1] |
//! | `z_score` | (x - mean) / std | unbounded |
//! | `robust` | (x - median) / IQR | unbounded |
//! | `quantile` | (rank - 1) / (n - 1) | [0, 1] |
//!
//! Each column is fitted on its own finite values. Null and non-finite cells
//! stay null. Degenerate columns map to documented constants:
//!
//! - `min_max` with zero range → [`FLAT_COLUMN_VALUE`]
//! - `z_score` with zero std → 0.0
//! - `robust` with zero IQR → centered only (scale 1.0)
//! - `quantile` with one value → [`FLAT_COLUMN_VALUE`]
//!
//! With polarity orientation enabled, lower-is-better factors are flipped
//! after fitting (`1 - v` for bounded methods, `-v` otherwise) so every column
//! reads higher-is-better.

use crate::factors::FactorCatalog;
use crate::stats;
use crate::table::FactorTable;
use crate::ScoringError;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use tracing::{debug, warn};

/// Output for every cell of a zero-range column
pub const FLAT_COLUMN_VALUE: f64 = 0.500000000;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NormalizationMethod {
    #[default]
    MinMax,
    ZScore,
    Robust,
    Quantile,
}

impl NormalizationMethod {
    pub const ALL: [NormalizationMethod; 4] = [
        NormalizationMethod::MinMax,
        NormalizationMethod::ZScore,
        NormalizationMethod::Robust,
        NormalizationMethod::Quantile,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            NormalizationMethod::MinMax => "min_max",
            NormalizationMethod::ZScore => "z_score",
            NormalizationMethod::Robust => "robust",
            NormalizationMethod::Quantile => "quantile",
        }
    }

    /// Output confined to [0, 1]
    pub fn is_bounded(&self) -> bool {
        matches!(self, NormalizationMethod::MinMax | NormalizationMethod::Quantile)
    }
}

impl fmt::Display for NormalizationMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for NormalizationMethod {
    type Err = ScoringError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let wanted = s.trim().to_lowercase().replace('-', "_");
        NormalizationMethod::ALL
            .into_iter()
            .find(|m| m.as_str() == wanted)
            .ok_or_else(|| ScoringError::Config(format!("unknown normalization method '{}'", s)))
    }
}

/// Fit and apply `method` to one column
pub fn normalize_column(column: &[Option<f64>], method: NormalizationMethod) -> Vec<Option<f64>> {
    let values = stats::finite(column);
    if values.is_empty() {
        return column.iter().map(|_| None).collect();
    }

    let finite = |v: &Option<f64>| v.filter(|x| x.is_finite());

    match method {
        NormalizationMethod::MinMax => {
            let sorted = stats::sorted(&values);
            let (min, max) = (sorted[0], sorted[sorted.len() - 1]);
            let range = max - min;
            column
                .iter()
                .map(|v| {
                    finite(v).map(|x| {
                        if range > 0.0 {
                            ((x - min) / range).clamp(0.0, 1.0)
                        } else {
                            FLAT_COLUMN_VALUE
                        }
                    })
                })
                .collect()
        }
        NormalizationMethod::ZScore => {
            let mu = stats::mean(&values).unwrap_or(0.0);
            let sd = stats::population_std(&values).unwrap_or(0.0);
            column
                .iter()
                .map(|v| finite(v).map(|x| if sd > 0.0 { (x - mu) / sd } else { 0.0 }))
                .collect()
        }
        NormalizationMethod::Robust => {
            let med = stats::median(&values).unwrap_or(0.0);
            let iqr = stats::quartiles(&values).map(|(q1, q3)| q3 - q1).unwrap_or(0.0);
            let scale = if iqr > 0.0 { iqr } else { 1.0 };
            column.iter().map(|v| finite(v).map(|x| (x - med) / scale)).collect()
        }
        NormalizationMethod::Quantile => {
            let ranks = stats::ordinal_ranks(&values);
            let n = values.len();
            let mut next = ranks.into_iter();
            column
                .iter()
                .map(|v| {
                    finite(v).and_then(|_| next.next()).map(|rank| {
                        if n > 1 {
                            (rank - 1) as f64 / (n - 1) as f64
                        } else {
                            FLAT_COLUMN_VALUE
                        }
                    })
                })
                .collect()
        }
    }
}

/// Flip a normalized value so lower raw values read higher
fn orient(value: f64, method: NormalizationMethod) -> f64 {
    if method.is_bounded() {
        1.0 - value
    } else {
        -value
    }
}

#[derive(Debug, Clone, Default)]
pub struct Normalizer {
    method: NormalizationMethod,
    polarity: Option<FactorCatalog>,
}

impl Normalizer {
    pub fn new(method: NormalizationMethod) -> Self {
        Self { method, polarity: None }
    }

    /// Orient lower-is-better factors of `catalog` after fitting
    pub fn with_polarity(mut self, catalog: FactorCatalog) -> Self {
        self.polarity = Some(catalog);
        self
    }

    pub fn method(&self) -> NormalizationMethod {
        self.method
    }

    pub fn normalize(&self, table: &FactorTable) -> FactorTable {
        debug!("Normalizing {} columns with {}", table.n_factors(), self.method);
        table.map_columns(|name, column| {
            let distinct = {
                let mut v = stats::sorted(&stats::finite(column));
                v.dedup();
                v.len()
            };
            if distinct == 1 {
                warn!("{}: zero-range column, using constant", name);
            }

            let normalized = normalize_column(column, self.method);
            let flip = self
                .polarity
                .as_ref()
                .map(|catalog| !catalog.higher_is_better(name))
                .unwrap_or(false);
            if flip {
                normalized
                    .into_iter()
                    .map(|v| v.map(|x| orient(x, self.method)))
                    .collect()
            } else {
                normalized
            }
        })
    }
}
