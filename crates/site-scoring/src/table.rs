//! Candidate × factor table passed between stages

use crate::factors::FactorCatalog;
use crate::{Candidate, Result, ScoringError};
use nalgebra::DMatrix;
use serde::Serialize;

#[derive(Debug, Clone, Serialize)]
pub struct FactorRow {
    pub candidate: Candidate,
    /// Aligned with [`FactorTable::factors`]
    pub values: Vec<Option<f64>>,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct FactorTable {
    factors: Vec<String>,
    rows: Vec<FactorRow>,
}

impl FactorTable {
    pub fn new(factors: Vec<String>) -> Self {
        Self {
            factors,
            rows: Vec::new(),
        }
    }

    pub fn from_catalog(catalog: &FactorCatalog) -> Self {
        Self::new(catalog.names().into_iter().map(String::from).collect())
    }

    /// Append a row; the value count must match the factor count
    pub fn push(&mut self, candidate: Candidate, values: Vec<Option<f64>>) -> Result<()> {
        if values.len() != self.factors.len() {
            return Err(ScoringError::RowShape {
                row: self.rows.len(),
                expected: self.factors.len(),
                found: values.len(),
            });
        }
        self.rows.push(FactorRow { candidate, values });
        Ok(())
    }

    pub fn factors(&self) -> &[String] {
        &self.factors
    }

    pub fn rows(&self) -> &[FactorRow] {
        &self.rows
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn n_factors(&self) -> usize {
        self.factors.len()
    }

    pub fn factor_index(&self, name: &str) -> Option<usize> {
        self.factors.iter().position(|f| f == name)
    }

    pub fn column(&self, index: usize) -> Vec<Option<f64>> {
        self.rows.iter().map(|r| r.values[index]).collect()
    }

    /// Non-null, finite values of a column
    pub fn column_values(&self, index: usize) -> Vec<f64> {
        self.rows
            .iter()
            .filter_map(|r| r.values[index])
            .filter(|v| v.is_finite())
            .collect()
    }

    pub fn value(&self, row: usize, column: usize) -> Option<f64> {
        self.rows.get(row).and_then(|r| r.values.get(column).copied().flatten())
    }

    pub fn set_value(&mut self, row: usize, column: usize, value: Option<f64>) {
        if let Some(cell) = self.rows.get_mut(row).and_then(|r| r.values.get_mut(column)) {
            *cell = value;
        }
    }

    /// Same rows with every column replaced by `transform(name, column)`
    pub fn map_columns<F>(&self, mut transform: F) -> Self
    where
        F: FnMut(&str, &[Option<f64>]) -> Vec<Option<f64>>,
    {
        let columns: Vec<Vec<Option<f64>>> = (0..self.n_factors())
            .map(|j| transform(&self.factors[j], &self.column(j)))
            .collect();

        let rows = self
            .rows
            .iter()
            .enumerate()
            .map(|(i, row)| FactorRow {
                candidate: row.candidate.clone(),
                values: columns.iter().map(|col| col[i]).collect(),
            })
            .collect();

        Self {
            factors: self.factors.clone(),
            rows,
        }
    }

    /// Row-major matrix with null cells replaced by the column mean
    /// (0.0 for an all-null column)
    pub fn mean_imputed_matrix(&self) -> DMatrix<f64> {
        let means: Vec<f64> = (0..self.n_factors())
            .map(|j| {
                let values = self.column_values(j);
                if values.is_empty() {
                    0.0
                } else {
                    values.iter().sum::<f64>() / values.len() as f64
                }
            })
            .collect();

        DMatrix::from_fn(self.len(), self.n_factors(), |i, j| {
            self.rows[i].values[j]
                .filter(|v| v.is_finite())
                .unwrap_or(means[j])
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::GenerationStrategy;

    fn table() -> FactorTable {
        let mut t = FactorTable::new(vec!["a".into(), "b".into()]);
        t.push(Candidate::new("c1", 0.0, 0.0, GenerationStrategy::GridSystematic), vec![Some(1.0), None])
            .unwrap();
        t.push(Candidate::new("c2", 1.0, 1.0, GenerationStrategy::GridSystematic), vec![Some(3.0), Some(4.0)])
            .unwrap();
        t
    }

    #[test]
    fn test_push_rejects_wrong_width() {
        let mut t = table();
        let err = t
            .push(Candidate::new("c3", 0.0, 0.0, GenerationStrategy::GridSystematic), vec![Some(1.0)])
            .unwrap_err();
        assert!(matches!(err, ScoringError::RowShape { expected: 2, found: 1, .. }));
    }

    #[test]
    fn test_mean_imputation() {
        let m = table().mean_imputed_matrix();
        assert_eq!(m.nrows(), 2);
        assert_eq!(m[(0, 1)], 4.0);
        assert_eq!(m[(1, 0)], 3.0);
    }

    #[test]
    fn test_map_columns_keeps_rows() {
        let doubled = table().map_columns(|_, col| col.iter().map(|v| v.map(|x| x * 2.0)).collect());
        assert_eq!(doubled.value(1, 1), Some(8.0));
        assert_eq!(doubled.value(0, 1), None);
        assert_eq!(doubled.rows()[0].candidate.id, "c1");
    }

    #[test]
    fn test_set_value() {
        let mut t = table();
        t.set_value(1, 0, None);
        assert_eq!(t.column_values(0), vec![1.0]);
        // Out of bounds is ignored
        t.set_value(9, 9, Some(1.0));
    }
}
