//! Regression models for the supervised weight proxy and cross-validation
//!
//! Both models take a row-major `DMatrix` (one row per sample) and a target
//! slice of the same length.
//!
//! - [`LinearRegression`]: ordinary least squares with intercept, solved by SVD
//! - [`RandomForestRegressor`]: smartcore's bagged regression forest, with
//!   permutation feature importances over the training rows

use nalgebra::{DMatrix, DVector};
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;
use smartcore::ensemble::random_forest_regressor::{
    RandomForestRegressor as Forest, RandomForestRegressorParameters,
};
use smartcore::linalg::basic::arrays::Array2;
use smartcore::linalg::basic::matrix::DenseMatrix;
use std::fmt;
use thiserror::Error;

/// Singular values below this are treated as zero
const SVD_EPS: f64 = 1e-10;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum ModelError {
    #[error("No training samples")]
    Empty,
    #[error("Feature matrix has {rows} rows but {targets} targets")]
    ShapeMismatch { rows: usize, targets: usize },
    #[error("Expected {expected} features, got {found}")]
    FeatureCount { expected: usize, found: usize },
    #[error("Least-squares solve failed: {0}")]
    Solve(String),
    #[error("Forest fit failed: {0}")]
    Fit(String),
    #[error("Model used before fit")]
    NotFitted,
}

pub trait Regressor {
    fn fit(&mut self, x: &DMatrix<f64>, y: &[f64]) -> Result<(), ModelError>;
    fn predict(&self, x: &DMatrix<f64>) -> Result<Vec<f64>, ModelError>;
}

fn check_shape(x: &DMatrix<f64>, y: &[f64]) -> Result<(), ModelError> {
    if x.nrows() == 0 {
        return Err(ModelError::Empty);
    }
    if x.nrows() != y.len() {
        return Err(ModelError::ShapeMismatch {
            rows: x.nrows(),
            targets: y.len(),
        });
    }
    Ok(())
}

#[derive(Debug, Clone, Default)]
pub struct LinearRegression {
    /// Intercept first, then one coefficient per feature
    coefficients: Option<DVector<f64>>,
}

impl LinearRegression {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn intercept(&self) -> Option<f64> {
        self.coefficients.as_ref().map(|c| c[0])
    }

    pub fn coefficients(&self) -> Option<Vec<f64>> {
        self.coefficients.as_ref().map(|c| c.iter().skip(1).copied().collect())
    }

    fn design(x: &DMatrix<f64>) -> DMatrix<f64> {
        DMatrix::from_fn(x.nrows(), x.ncols() + 1, |i, j| if j == 0 { 1.0 } else { x[(i, j - 1)] })
    }
}

impl Regressor for LinearRegression {
    fn fit(&mut self, x: &DMatrix<f64>, y: &[f64]) -> Result<(), ModelError> {
        check_shape(x, y)?;
        let svd = Self::design(x).svd(true, true);
        let target = DVector::from_column_slice(y);
        let solution = svd
            .solve(&target, SVD_EPS)
            .map_err(|e| ModelError::Solve(e.to_string()))?;
        self.coefficients = Some(solution);
        Ok(())
    }

    fn predict(&self, x: &DMatrix<f64>) -> Result<Vec<f64>, ModelError> {
        let coefficients = self.coefficients.as_ref().ok_or(ModelError::NotFitted)?;
        if x.ncols() + 1 != coefficients.len() {
            return Err(ModelError::FeatureCount {
                expected: coefficients.len() - 1,
                found: x.ncols(),
            });
        }
        Ok((Self::design(x) * coefficients).iter().copied().collect())
    }
}

/// nalgebra storage is column-major
fn dense(x: &DMatrix<f64>) -> DenseMatrix<f64> {
    DenseMatrix::from_iterator(x.iter().copied(), x.nrows(), x.ncols(), 1)
}

pub struct RandomForestRegressor {
    pub n_trees: usize,
    pub max_depth: usize,
    pub min_samples_split: usize,
    pub seed: u64,
    forest: Option<Forest<f64, f64, DenseMatrix<f64>, Vec<f64>>>,
    n_features: usize,
    importances: Vec<f64>,
}

impl fmt::Debug for RandomForestRegressor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RandomForestRegressor")
            .field("n_trees", &self.n_trees)
            .field("max_depth", &self.max_depth)
            .field("min_samples_split", &self.min_samples_split)
            .field("seed", &self.seed)
            .field("fitted", &self.forest.is_some())
            .field("importances", &self.importances)
            .finish()
    }
}

impl Default for RandomForestRegressor {
    fn default() -> Self {
        Self::new(100, 8, 2, 42)
    }
}

impl RandomForestRegressor {
    pub fn new(n_trees: usize, max_depth: usize, min_samples_split: usize, seed: u64) -> Self {
        Self {
            n_trees: n_trees.max(1),
            max_depth,
            min_samples_split: min_samples_split.max(2),
            seed,
            forest: None,
            n_features: 0,
            importances: Vec::new(),
        }
    }

    /// Training-set MSE increase when each column is shuffled, clipped at
    /// zero and scaled to sum to 1; all zero when no column matters
    pub fn feature_importances(&self) -> &[f64] {
        &self.importances
    }

    fn parameters(&self, n_features: usize) -> RandomForestRegressorParameters {
        RandomForestRegressorParameters::default()
            .with_n_trees(self.n_trees)
            .with_max_depth(self.max_depth.min(u16::MAX as usize) as u16)
            .with_min_samples_split(self.min_samples_split)
            .with_m(n_features)
            .with_seed(self.seed)
    }

    fn permutation_importances(&self, x: &DMatrix<f64>, y: &[f64]) -> Result<Vec<f64>, ModelError> {
        let baseline = self.predict(x)?;
        let base_mse = mean_squared_error(y, &baseline).unwrap_or(0.0);
        let mut rng = StdRng::seed_from_u64(self.seed);
        let mut order: Vec<usize> = (0..x.nrows()).collect();

        let mut importances = Vec::with_capacity(x.ncols());
        for j in 0..x.ncols() {
            order.shuffle(&mut rng);
            let mut shuffled = x.clone();
            for (row, &from) in order.iter().enumerate() {
                shuffled[(row, j)] = x[(from, j)];
            }
            let mse = mean_squared_error(y, &self.predict(&shuffled)?).unwrap_or(base_mse);
            importances.push((mse - base_mse).max(0.0));
        }

        let total: f64 = importances.iter().sum();
        if total > 0.0 {
            importances.iter_mut().for_each(|v| *v /= total);
        }
        Ok(importances)
    }
}

impl Regressor for RandomForestRegressor {
    fn fit(&mut self, x: &DMatrix<f64>, y: &[f64]) -> Result<(), ModelError> {
        check_shape(x, y)?;
        if x.ncols() == 0 {
            return Err(ModelError::FeatureCount { expected: 1, found: 0 });
        }
        let forest = Forest::fit(&dense(x), &y.to_vec(), self.parameters(x.ncols()))
            .map_err(|e| ModelError::Fit(e.to_string()))?;
        self.forest = Some(forest);
        self.n_features = x.ncols();
        self.importances = self.permutation_importances(x, y)?;
        Ok(())
    }

    fn predict(&self, x: &DMatrix<f64>) -> Result<Vec<f64>, ModelError> {
        let forest = self.forest.as_ref().ok_or(ModelError::NotFitted)?;
        if x.ncols() != self.n_features {
            return Err(ModelError::FeatureCount {
                expected: self.n_features,
                found: x.ncols(),
            });
        }
        if x.nrows() == 0 {
            return Ok(Vec::new());
        }
        forest.predict(&dense(x)).map_err(|e| ModelError::Fit(e.to_string()))
    }
}

pub fn mean_squared_error(actual: &[f64], predicted: &[f64]) -> Option<f64> {
    if actual.is_empty() || actual.len() != predicted.len() {
        return None;
    }
    Some(actual.iter().zip(predicted).map(|(a, p)| (a - p).powi(2)).sum::<f64>() / actual.len() as f64)
}

pub fn mean_absolute_error(actual: &[f64], predicted: &[f64]) -> Option<f64> {
    if actual.is_empty() || actual.len() != predicted.len() {
        return None;
    }
    Some(actual.iter().zip(predicted).map(|(a, p)| (a - p).abs()).sum::<f64>() / actual.len() as f64)
}

/// Coefficient of determination; `None` when the actual values are constant
pub fn r2_score(actual: &[f64], predicted: &[f64]) -> Option<f64> {
    if actual.len() < 2 || actual.len() != predicted.len() {
        return None;
    }
    let mean = actual.iter().sum::<f64>() / actual.len() as f64;
    let ss_tot: f64 = actual.iter().map(|a| (a - mean).powi(2)).sum();
    if ss_tot <= 0.0 {
        return None;
    }
    let ss_res: f64 = actual.iter().zip(predicted).map(|(a, p)| (a - p).powi(2)).sum();
    Some(1.0 - ss_res / ss_tot)
}
