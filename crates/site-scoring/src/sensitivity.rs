//! One-at-a-time weight sensitivity
//!
//! Each factor's weight is scaled by 0.8, 0.9, 1.0, 1.1 and 1.2 with the
//! others held fixed (not renormalized). At each scale the displacement is
//! mean |score - baseline| over candidates scored in both runs, and the
//! coefficient is (max - min displacement) / 0.4. Every run works on a fresh
//! copy of the baseline weights.

use crate::aggregate::ScoreAggregator;
use crate::table::FactorTable;
use crate::weights::FactorWeight;
use crate::Result;
use serde::Serialize;
use tracing::{debug, info};

pub const WEIGHT_SCALES: [f64; 5] = [0.8, 0.9, 1.0, 1.1, 1.2];

/// Width of the scale sweep
pub const SCALE_SPAN: f64 = 0.4;

#[derive(Debug, Clone, Serialize)]
pub struct FactorSensitivity {
    pub factor: String,
    /// Mean absolute displacement at each of [`WEIGHT_SCALES`]
    pub displacements: Vec<f64>,
    pub coefficient: f64,
    /// 1 = most sensitive
    pub rank: usize,
}

#[derive(Debug, Clone, Serialize)]
pub struct SensitivityReport {
    /// Descending by coefficient
    pub factors: Vec<FactorSensitivity>,
}

impl SensitivityReport {
    pub fn get(&self, factor: &str) -> Option<&FactorSensitivity> {
        self.factors.iter().find(|f| f.factor == factor)
    }

    pub fn most_sensitive(&self) -> Option<&FactorSensitivity> {
        self.factors.first()
    }
}

fn mean_displacement(baseline: &[Option<f64>], modified: &[Option<f64>]) -> f64 {
    let diffs: Vec<f64> = baseline
        .iter()
        .zip(modified)
        .filter_map(|(b, m)| Some((m.as_ref()? - b.as_ref()?).abs()))
        .collect();
    if diffs.is_empty() {
        0.0
    } else {
        diffs.iter().sum::<f64>() / diffs.len() as f64
    }
}

#[derive(Debug, Clone, Copy)]
pub struct SensitivityAnalyzer {
    aggregator: ScoreAggregator,
}

impl SensitivityAnalyzer {
    pub fn new(aggregator: ScoreAggregator) -> Self {
        Self { aggregator }
    }

    pub fn analyze(&self, table: &FactorTable, baseline_weights: &[FactorWeight]) -> Result<SensitivityReport> {
        let score_of = |weights: &[FactorWeight]| -> Result<Vec<Option<f64>>> {
            Ok(self
                .aggregator
                .scores(table, weights)?
                .into_iter()
                .map(|c| c.map(|c| c.score))
                .collect())
        };
        let baseline = score_of(baseline_weights)?;

        let mut factors = Vec::with_capacity(baseline_weights.len());
        for (index, weight) in baseline_weights.iter().enumerate() {
            let mut displacements = Vec::with_capacity(WEIGHT_SCALES.len());
            for scale in WEIGHT_SCALES {
                let mut perturbed = baseline_weights.to_vec();
                perturbed[index].weight = weight.weight * scale;
                displacements.push(mean_displacement(&baseline, &score_of(&perturbed)?));
            }

            let max = displacements.iter().copied().fold(f64::NEG_INFINITY, f64::max);
            let min = displacements.iter().copied().fold(f64::INFINITY, f64::min);
            let coefficient = (max - min) / SCALE_SPAN;
            debug!("{}: sensitivity {:.6}", weight.factor_name, coefficient);

            factors.push(FactorSensitivity {
                factor: weight.factor_name.clone(),
                displacements,
                coefficient,
                rank: 0,
            });
        }

        factors.sort_by(|a, b| b.coefficient.total_cmp(&a.coefficient));
        for (i, f) in factors.iter_mut().enumerate() {
            f.rank = i + 1;
        }

        if let Some(top) = factors.first() {
            info!("Most sensitive factor: {} ({:.4})", top.factor, top.coefficient);
        }
        Ok(SensitivityReport { factors })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::aggregate::AggregationMethod;
    use crate::{Candidate, GenerationStrategy};
    use approx::assert_relative_eq;

    fn table() -> FactorTable {
        let mut t = FactorTable::new(vec!["a".into(), "b".into()]);
        for (i, (a, b)) in [(0.9, 0.5), (0.1, 0.5), (0.5, 0.5)].into_iter().enumerate() {
            let c = Candidate::new(format!("c{}", i), 0.0, 0.0, GenerationStrategy::GridSystematic);
            t.push(c, vec![Some(a), Some(b)]).unwrap();
        }
        t
    }

    fn weights() -> Vec<FactorWeight> {
        vec![FactorWeight::fixed("a", 0.5), FactorWeight::fixed("b", 0.5)]
    }

    #[test]
    fn test_baseline_scale_has_zero_displacement() {
        let report = SensitivityAnalyzer::new(ScoreAggregator::default())
            .analyze(&table(), &weights())
            .unwrap();
        for f in &report.factors {
            assert_eq!(f.displacements[2], 0.0);
            assert!(f.coefficient >= 0.0);
        }
    }

    #[test]
    fn test_ranks_are_sequential() {
        let report = SensitivityAnalyzer::new(ScoreAggregator::new(AggregationMethod::WeightedAverage))
            .analyze(&table(), &weights())
            .unwrap();
        assert_eq!(report.factors.len(), 2);
        assert_eq!(report.factors[0].rank, 1);
        assert_eq!(report.factors[1].rank, 2);
        assert!(report.factors[0].coefficient >= report.factors[1].coefficient);
    }

    #[test]
    fn test_coefficient_formula() {
        let report = SensitivityAnalyzer::new(ScoreAggregator::default())
            .analyze(&table(), &weights())
            .unwrap();
        let a = report.get("a").unwrap();
        let max = a.displacements.iter().copied().fold(f64::MIN, f64::max);
        let min = a.displacements.iter().copied().fold(f64::MAX, f64::min);
        assert_relative_eq!(a.coefficient, (max - min) / 0.4);
    }

    #[test]
    fn test_baseline_weights_untouched() {
        let w = weights();
        let before = w.clone();
        SensitivityAnalyzer::new(ScoreAggregator::default())
            .analyze(&table(), &w)
            .unwrap();
        assert_eq!(w, before);
    }

    #[test]
    fn test_sweep_does_not_drift() {
        // Same result when factor order changes: each run starts from baseline
        let report = SensitivityAnalyzer::new(ScoreAggregator::default())
            .analyze(&table(), &weights())
            .unwrap();
        let mut reversed = weights();
        reversed.reverse();
        let again = SensitivityAnalyzer::new(ScoreAggregator::default())
            .analyze(&table(), &reversed)
            .unwrap();
        for f in &report.factors {
            assert_relative_eq!(f.coefficient, again.get(&f.factor).unwrap().coefficient, epsilon = 1e-12);
        }
    }
}
