//! End-to-end orchestration
//!
//! generate → calculate → quality gate → normalize → weights → aggregate →
//! sensitivity → validate. One `StdRng` seeded from the config is threaded
//! through every stochastic stage, so a run is reproducible from
//! (config, reference data).
//!
//! Before any of that the ground-truth stations are split. Generation, factor
//! inputs and supervised weights see only the training stations; validation
//! scores against the held-out ones.

use crate::aggregate::{ScoreAggregator, ScoredTable};
use crate::calculator::{FactorCalculator, FallbackCounts};
use crate::config::PipelineConfig;
use crate::factors::FactorCatalog;
use crate::generator::CandidateGenerator;
use crate::normalize::Normalizer;
use crate::quality::{QualityAssessor, QualityReport};
use crate::reference::ReferenceData;
use crate::sensitivity::{SensitivityAnalyzer, SensitivityReport};
use crate::validation::{ValidationFramework, ValidationResult};
use crate::weights::{WeightEstimator, WeightReport};
use crate::{Candidate, Result, ScoringError};
use chrono::{Datelike, SecondsFormat, Utc};
use ground_stations::GroundTruth;
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::{Rng, SeedableRng};
use serde::Serialize;
use tracing::{info, warn};

/// Everything a run produces
#[derive(Debug, Clone, Serialize)]
pub struct PipelineReport {
    /// RFC 3339, UTC
    pub generated_at: String,
    pub config: PipelineConfig,
    pub reference_year: i32,
    pub sources: Vec<String>,
    pub candidates_generated: usize,
    pub station_split: StationSplit,
    /// Candidates that fell back, per factor
    pub fallbacks: FallbackCounts,
    pub quality: QualityReport,
    pub weights: WeightReport,
    pub scored: ScoredTable,
    pub sensitivity: SensitivityReport,
    pub validation: ValidationResult,
}

/// Station ids behind the model inputs and the disjoint ids validated against
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct StationSplit {
    pub training: Vec<String>,
    pub holdout: Vec<String>,
}

impl StationSplit {
    /// Shuffle `ids` and hold out `fraction` of them, at least one, leaving at
    /// least one for training when there are two or more. A zero fraction
    /// holds nothing out.
    pub fn new<R: Rng + ?Sized>(mut ids: Vec<String>, fraction: f64, rng: &mut R) -> Self {
        if fraction <= 0.0 || ids.is_empty() {
            return Self {
                training: ids,
                holdout: Vec::new(),
            };
        }
        ids.shuffle(rng);
        let n = ids.len();
        let n_holdout = ((n as f64 * fraction).round() as usize).clamp(1, (n - 1).max(1));
        let mut holdout = ids.split_off(n - n_holdout);
        ids.sort();
        holdout.sort();
        Self {
            training: ids,
            holdout,
        }
    }

    pub fn is_holdout(&self, id: &str) -> bool {
        self.holdout.iter().any(|h| h == id)
    }
}

/// Reference data narrowed to the training stations, plus the truth to validate on
struct Holdout {
    reference_year: i32,
    split: StationSplit,
    training: ReferenceData,
    ground_truth: Vec<GroundTruth>,
}

pub struct Pipeline {
    config: PipelineConfig,
    catalog: FactorCatalog,
}

impl Pipeline {
    pub fn new(config: PipelineConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            config,
            catalog: FactorCatalog::standard(),
        })
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    pub fn run(&self, reference: &ReferenceData) -> Result<PipelineReport> {
        let mut rng = StdRng::seed_from_u64(self.config.seed);
        let holdout = self.hold_out(reference, &mut rng);
        let candidates = CandidateGenerator::new(&holdout.training, self.config.generator.clone())
            .generate(self.config.candidates, &mut rng);
        self.execute(holdout, candidates, &mut rng)
    }

    /// Score a caller-supplied candidate set instead of generating one
    pub fn run_with_candidates(&self, reference: &ReferenceData, candidates: Vec<Candidate>) -> Result<PipelineReport> {
        let mut rng = StdRng::seed_from_u64(self.config.seed);
        let holdout = self.hold_out(reference, &mut rng);
        self.execute(holdout, candidates, &mut rng)
    }

    fn hold_out<R: Rng + ?Sized>(&self, reference: &ReferenceData, rng: &mut R) -> Holdout {
        let reference_year = self.config.reference_year.unwrap_or_else(|| Utc::now().year());
        let Some(registry) = &reference.ground_stations else {
            return Holdout {
                reference_year,
                split: StationSplit::default(),
                training: reference.clone(),
                ground_truth: Vec::new(),
            };
        };

        // Success scores are normalized across the whole registry
        let all_truth = registry.ground_truth(reference_year);
        let ids = all_truth.iter().map(|t| t.station_id.clone()).collect();
        let split = StationSplit::new(ids, self.config.validation.holdout_fraction, rng);

        if split.holdout.is_empty() {
            warn!("No stations held out; validating in-sample");
            return Holdout {
                reference_year,
                split,
                training: reference.clone(),
                ground_truth: all_truth,
            };
        }
        info!(
            "Stations: {} training, {} held out for validation",
            split.training.len(),
            split.holdout.len()
        );

        let mut training = reference.clone();
        training.ground_stations = Some(registry.subset(|s| !split.is_holdout(&s.id)));
        let ground_truth = all_truth.into_iter().filter(|t| split.is_holdout(&t.station_id)).collect();
        Holdout {
            reference_year,
            split,
            training,
            ground_truth,
        }
    }

    fn execute<R: Rng + ?Sized>(
        &self,
        holdout: Holdout,
        candidates: Vec<Candidate>,
        rng: &mut R,
    ) -> Result<PipelineReport> {
        let config = &self.config;
        let Holdout {
            reference_year,
            split,
            training,
            ground_truth,
        } = holdout;
        let reference = &training;
        let sources: Vec<String> = reference.available_sources().into_iter().map(String::from).collect();
        info!("Pipeline start: {} candidates, sources {:?}", candidates.len(), sources);

        // Factors
        let calculator = FactorCalculator::new(reference).with_catalog(self.catalog.clone());
        let (table, fallbacks) = calculator.build_table(&candidates)?;

        // Quality gate
        let quality = QualityAssessor::new(self.catalog.clone()).assess(&table);
        info!(
            "Data quality {:.1} ({:?})",
            quality.overall_quality_score, quality.grade
        );
        if quality.overall_quality_score < config.quality.minimum_score {
            warn!(
                "Quality gate closed: {:.1} < {:.1}",
                quality.overall_quality_score, config.quality.minimum_score
            );
            return Err(ScoringError::QualityGate {
                score: quality.overall_quality_score,
                minimum: config.quality.minimum_score,
            });
        }

        // Normalize
        let mut normalizer = Normalizer::new(config.normalization.method);
        if config.normalization.orient_polarity {
            normalizer = normalizer.with_polarity(self.catalog.clone());
        }
        let normalized = normalizer.normalize(&table);

        // Weights
        let mut estimator = WeightEstimator::new(self.catalog.clone(), config.weights.clone());
        if let Some(registry) = &reference.ground_stations {
            estimator = estimator.with_known_good(registry.known_good_locations());
        }
        let weights = estimator.estimate(&normalized, rng);

        // Scores
        let aggregator = ScoreAggregator::new(config.aggregation);
        let scored = aggregator.aggregate(&normalized, &weights.weights)?;
        let sensitivity = SensitivityAnalyzer::new(aggregator).analyze(&normalized, &weights.weights)?;

        // Validation
        if ground_truth.is_empty() {
            warn!("No ground-truth stations; validation sections will report errors");
        }
        let validation = ValidationFramework::new(config.validation.clone())
            .with_seed(config.seed)
            .validate(&scored, &ground_truth);

        info!(
            "Pipeline done: {} scored, validation {:.1} ({:?})",
            scored.rows.iter().filter(|r| r.investment_score.is_some()).count(),
            validation.overall_validation_score,
            validation.validation_grade
        );

        Ok(PipelineReport {
            generated_at: Utc::now().to_rfc3339_opts(SecondsFormat::Secs, true),
            config: config.clone(),
            reference_year,
            sources,
            candidates_generated: candidates.len(),
            station_split: split,
            fallbacks,
            quality,
            weights,
            scored,
            sensitivity,
            validation,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reference::SeismicZone;
    use crate::GenerationStrategy;

    fn config() -> PipelineConfig {
        PipelineConfig {
            candidates: 40,
            reference_year: Some(2024),
            ..PipelineConfig::default()
        }
    }

    #[test]
    fn test_invalid_config_rejected() {
        let mut bad = config();
        bad.generator.grid_share = 1.5;
        assert!(matches!(Pipeline::new(bad), Err(ScoringError::Config(_))));
    }

    /// Seismic risk of 3 sits outside the declared [0, 1] range for every
    /// candidate, costing the range penalty
    fn out_of_range_reference() -> ReferenceData {
        ReferenceData {
            seismic: Some(vec![SeismicZone {
                latitude: 0.0,
                longitude: 0.0,
                risk_index: Some(3.0),
            }]),
            ..ReferenceData::empty()
        }
    }

    #[test]
    fn test_quality_gate_closes() {
        let mut strict = config();
        strict.quality.minimum_score = 100.0;
        let err = Pipeline::new(strict).unwrap().run(&out_of_range_reference()).unwrap_err();
        match err {
            ScoringError::QualityGate { score, minimum } => {
                assert_eq!(minimum, 100.0);
                assert_eq!(score, 100.0 - crate::quality::RANGE_PENALTY);
            }
            other => panic!("unexpected error {:?}", other),
        }
    }

    #[test]
    fn test_quality_gate_open_at_threshold() {
        let mut config = config();
        config.quality.minimum_score = 100.0 - crate::quality::RANGE_PENALTY;
        let report = Pipeline::new(config).unwrap().run(&out_of_range_reference()).unwrap();
        assert_eq!(report.quality.overall_quality_score, 96.0);
    }

    fn ids(n: usize) -> Vec<String> {
        (0..n).map(|i| format!("gs-{:02}", i)).collect()
    }

    #[test]
    fn test_station_split_is_disjoint() {
        let mut rng = StdRng::seed_from_u64(9);
        let split = StationSplit::new(ids(10), 0.3, &mut rng);
        assert_eq!(split.holdout.len(), 3);
        assert_eq!(split.training.len(), 7);
        assert!(split.training.iter().all(|id| !split.is_holdout(id)));

        let mut all: Vec<String> = split.training.iter().chain(&split.holdout).cloned().collect();
        all.sort();
        assert_eq!(all, ids(10));
    }

    #[test]
    fn test_station_split_edges() {
        let mut rng = StdRng::seed_from_u64(9);
        let none = StationSplit::new(ids(4), 0.0, &mut rng);
        assert_eq!(none.training.len(), 4);
        assert!(none.holdout.is_empty());

        // A tiny fraction still holds one out; a large one leaves one to train
        assert_eq!(StationSplit::new(ids(4), 0.01, &mut rng).holdout.len(), 1);
        assert_eq!(StationSplit::new(ids(4), 0.99, &mut rng).training.len(), 1);
        assert_eq!(StationSplit::new(ids(1), 0.5, &mut rng).holdout.len(), 1);
        assert_eq!(StationSplit::new(Vec::new(), 0.5, &mut rng), StationSplit::default());
    }

    #[test]
    fn test_station_split_follows_seed() {
        let a = StationSplit::new(ids(12), 0.5, &mut StdRng::seed_from_u64(1));
        let b = StationSplit::new(ids(12), 0.5, &mut StdRng::seed_from_u64(1));
        assert_eq!(a, b);
    }

    #[test]
    fn test_supplied_candidates_keep_ids() {
        let pipeline = Pipeline::new(config()).unwrap();
        let candidates = vec![
            Candidate::new("site-a", 40.0, -100.0, GenerationStrategy::MarketOpportunity),
            Candidate::new("site-b", 48.0, 2.0, GenerationStrategy::MarketOpportunity),
        ];
        let report = pipeline.run_with_candidates(&ReferenceData::empty(), candidates).unwrap();
        assert_eq!(report.candidates_generated, 2);
        let ids: Vec<&str> = report.scored.rows.iter().map(|r| r.candidate.id.as_str()).collect();
        assert_eq!(ids, vec!["site-a", "site-b"]);
        assert_eq!(report.reference_year, 2024);
    }

    #[test]
    fn test_generated_at_is_rfc3339() {
        let pipeline = Pipeline::new(config()).unwrap();
        let report = pipeline.run(&ReferenceData::empty()).unwrap();
        assert!(chrono::DateTime::parse_from_rfc3339(&report.generated_at).is_ok());
    }
}
