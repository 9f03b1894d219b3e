//! Whole-pipeline runs on in-memory reference tables

use approx::assert_relative_eq;
use ground_stations::{KnownStation, StationRegistry, StationStatus};
use site_scoring::config::PipelineConfig;
use site_scoring::factors::{self, FactorCatalog};
use site_scoring::reference::*;
use site_scoring::{
    export, AggregationMethod, Candidate, GenerationStrategy, NormalizationMethod, Pipeline, PipelineReport,
    ReferenceData,
};
use tempfile::TempDir;

const COUNTRIES: [&str; 6] = ["US", "GB", "DE", "JP", "AU", "BR"];

fn station(id: &str, lat: f64, lon: f64, year: i32, services: &[&str]) -> KnownStation {
    let mut s = KnownStation::new(id, id, lat, lon);
    s.status = StationStatus::Operational;
    s.commissioned_year = Some(year);
    s.services = services.iter().map(|s| s.to_string()).collect();
    s.customer_count = Some((2024 - year) as u32 * 3);
    s
}

fn site(id: &str, lat: f64, lon: f64) -> InfrastructureSite {
    InfrastructureSite {
        id: id.to_string(),
        name: id.to_string(),
        latitude: lat,
        longitude: lon,
    }
}

/// A small world: six stations, one per classified country, with grids
/// of cell data around them
fn reference() -> ReferenceData {
    let stations = vec![
        station("gs-virginia", 38.9, -77.4, 1998, &["ttc", "eo", "data"]),
        station("gs-goonhilly", 50.05, -5.18, 1985, &["ttc", "data"]),
        station("gs-weilheim", 47.88, 11.08, 2005, &["ttc"]),
        station("gs-tokyo", 35.7, 139.7, 2012, &["eo", "data"]),
        station("gs-perth", -31.95, 115.86, 2001, &["ttc", "eo"]),
        station("gs-saopaulo", -23.55, -46.63, 2018, &["data"]),
    ];
    let anchors: Vec<(f64, f64)> = stations.iter().map(|s| (s.location.latitude, s.location.longitude)).collect();

    let mut population = Vec::new();
    let mut precipitation = Vec::new();
    let mut fiber = Vec::new();
    let mut seismic = Vec::new();
    for (i, &(lat, lon)) in anchors.iter().enumerate() {
        for d in 0..5 {
            let (clat, clon) = (lat + d as f64 * 0.5, lon + d as f64 * 0.5);
            population.push(PopulationCell {
                latitude: clat,
                longitude: clon,
                density: Some(50.0 + 150.0 * i as f64 + 20.0 * d as f64),
            });
            precipitation.push(PrecipitationCell {
                latitude: clat,
                longitude: clon,
                annual_mm: Some(400.0 + 120.0 * d as f64),
                cloud_cover_pct: Some(30.0 + 5.0 * i as f64),
            });
            fiber.push(FiberNode {
                latitude: clat,
                longitude: clon,
                connectivity: Some(0.4 + 0.1 * d as f64),
            });
            seismic.push(SeismicZone {
                latitude: clat,
                longitude: clon,
                risk_index: Some(0.1 * (i % 4) as f64 + 0.05 * d as f64),
            });
        }
    }

    let offset = |prefix: &str, dlat: f64| -> Vec<InfrastructureSite> {
        anchors
            .iter()
            .enumerate()
            .map(|(i, &(lat, lon))| site(&format!("{}-{}", prefix, i), lat + dlat, lon))
            .collect()
    };

    ReferenceData {
        ground_stations: Some(StationRegistry::from_stations(stations).unwrap()),
        population: Some(population),
        precipitation: Some(precipitation),
        fiber: Some(fiber),
        seismic: Some(seismic),
        datacenters: Some(offset("dc", 0.3)),
        cable_landings: Some(offset("cl", -0.8)),
        ixps: Some(offset("ixp", 0.5)),
        economic: Some(
            COUNTRIES
                .iter()
                .enumerate()
                .map(|(i, c)| EconomicIndicator {
                    country_code: c.to_string(),
                    gdp_per_capita: Some(20000.0 + 8000.0 * i as f64),
                    ease_of_business: Some(60.0 + 5.0 * i as f64),
                    labor_index: Some(0.5 + 0.05 * i as f64),
                })
                .collect(),
        ),
        power: Some(
            COUNTRIES
                .iter()
                .enumerate()
                .map(|(i, c)| PowerReliability {
                    country_code: c.to_string(),
                    reliability: Some(0.9 + 0.015 * i as f64),
                })
                .collect(),
        ),
        political: Some(
            COUNTRIES
                .iter()
                .enumerate()
                .map(|(i, c)| PoliticalIndicator {
                    country_code: c.to_string(),
                    stability: Some(-0.5 + 0.3 * i as f64),
                    licensing_complexity: Some(0.2 + 0.1 * i as f64),
                })
                .collect(),
        ),
        bandwidth: Some(
            COUNTRIES
                .iter()
                .enumerate()
                .map(|(i, c)| BandwidthPrice {
                    country_code: c.to_string(),
                    usd_per_mbps: Some(1.0 + 0.5 * i as f64),
                })
                .collect(),
        ),
    }
}

fn config(candidates: usize) -> PipelineConfig {
    let mut config = PipelineConfig {
        candidates,
        reference_year: Some(2024),
        ..PipelineConfig::default()
    };
    config.weights.bootstrap_draws = 200;
    config.weights.forest_trees = 20;
    config
}

fn run(config: PipelineConfig, reference: &ReferenceData) -> PipelineReport {
    Pipeline::new(config).unwrap().run(reference).unwrap()
}

#[test]
fn test_full_pipeline_contracts() {
    let data = reference();
    let report = run(config(150), &data);

    assert_eq!(report.sources.len(), 12);
    assert_eq!(report.scored.len(), report.candidates_generated);
    assert!(report.candidates_generated > 0);

    // Weights: one per factor, non-negative, summing to one
    assert_eq!(report.weights.weights.len(), FactorCatalog::standard().len());
    assert!(report.weights.weights.iter().all(|w| w.weight >= 0.0));
    assert_relative_eq!(report.weights.total(), 1.0, epsilon = 1e-9);

    // Scores: bracketed by the CI, ranks dense from 1
    let mut ranks: Vec<usize> = Vec::new();
    for row in &report.scored.rows {
        let score = row.investment_score.unwrap();
        assert!(score.is_finite());
        assert!(row.score_ci_lower.unwrap() <= score + 1e-12);
        assert!(row.score_ci_upper.unwrap() >= score - 1e-12);
        ranks.push(row.investment_rank.unwrap());
    }
    ranks.sort_unstable();
    ranks.dedup();
    assert_eq!(ranks.first(), Some(&1));
    assert_eq!(ranks.last(), Some(&ranks.len()));

    // Stations are loaded, so competition never falls back
    assert_eq!(report.fallbacks[factors::MARKET_COMPETITION], 0);

    // Quality and validation scores are bounded and consistent
    assert!((0.0..=100.0).contains(&report.quality.overall_quality_score));
    let v = &report.validation;
    assert!((0.0..=100.0).contains(&v.overall_validation_score));
    assert_relative_eq!(v.score_breakdown.total().clamp(0.0, 100.0), v.overall_validation_score);
    // Validation only sees the held-out stations
    let spatial = v.spatial.as_complete().unwrap();
    assert_eq!(report.station_split.holdout.len(), 2);
    assert_eq!(spatial.n_ground_truth, report.station_split.holdout.len());

    assert_eq!(report.sensitivity.factors.len(), FactorCatalog::standard().len());
}

#[test]
fn test_seeded_runs_are_reproducible() {
    let data = reference();
    let a = run(config(80), &data);
    let b = run(config(80), &data);
    assert_eq!(a.scored.scores(), b.scored.scores());
    let wa: Vec<f64> = a.weights.weights.iter().map(|w| w.weight).collect();
    let wb: Vec<f64> = b.weights.weights.iter().map(|w| w.weight).collect();
    assert_eq!(wa, wb);
    assert_eq!(
        a.validation.overall_validation_score,
        b.validation.overall_validation_score
    );
}

#[test]
fn test_alternative_methods() {
    let data = reference();
    for normalization in NormalizationMethod::ALL {
        for aggregation in AggregationMethod::ALL {
            let mut c = config(60);
            c.normalization.method = normalization;
            c.aggregation = aggregation;
            let report = run(c, &data);
            assert_eq!(report.scored.method, aggregation);
            assert!(report
                .scored
                .rows
                .iter()
                .filter_map(|r| r.investment_score)
                .all(f64::is_finite));
        }
    }
}

#[test]
fn test_all_reference_tables_absent() {
    let report = run(config(60), &ReferenceData::empty());

    assert!(report.sources.is_empty());
    let n = report.candidates_generated;
    assert!(n > 0);
    for factor in FactorCatalog::standard().iter() {
        assert_eq!(report.fallbacks[factor.name], n, "{}", factor.name);
    }

    // No ground truth: station-dependent blocks report errors and score zero
    let v = &report.validation;
    assert!(v.ranking.error().is_some());
    assert!(v.cross_validation.error().is_some());
    assert_eq!(v.score_breakdown.spatial, 0.0);
    assert_eq!(v.score_breakdown.ranking, 0.0);
    assert_relative_eq!(report.weights.total(), 1.0, epsilon = 1e-9);
}

#[test]
fn test_station_split_disjoint_and_complete() {
    let report = run(config(40), &reference());
    let split = &report.station_split;
    assert!(split.training.iter().all(|id| !split.holdout.contains(id)));

    let mut all: Vec<&str> = split.training.iter().chain(&split.holdout).map(String::as_str).collect();
    all.sort_unstable();
    let mut expected = vec!["gs-goonhilly", "gs-perth", "gs-saopaulo", "gs-tokyo", "gs-virginia", "gs-weilheim"];
    expected.sort_unstable();
    assert_eq!(all, expected);
}

#[test]
fn test_holdout_stations_hidden_from_factor_inputs() {
    let data = reference();
    let registry = data.ground_stations.as_ref().unwrap();
    let candidates: Vec<Candidate> = registry
        .stations()
        .iter()
        .map(|s| {
            Candidate::new(
                s.id.clone(),
                s.location.latitude,
                s.location.longitude,
                GenerationStrategy::InfrastructureProximate,
            )
        })
        .collect();

    let report = Pipeline::new(config(40)).unwrap().run_with_candidates(&data, candidates).unwrap();
    let split = &report.station_split;
    let j = report
        .scored
        .factors
        .iter()
        .position(|f| f == factors::GROUND_STATION_PROXIMITY_KM)
        .unwrap();
    let proximity = |id: &String| {
        report
            .scored
            .rows
            .iter()
            .find(|r| &r.candidate.id == id)
            .and_then(|r| r.values[j])
            .unwrap()
    };

    // Training sites sit on a known station; held-out sites do not
    let on_station = proximity(&split.training[0]);
    for id in &split.training {
        assert_eq!(proximity(id), on_station, "{}", id);
    }
    for id in &split.holdout {
        assert_ne!(proximity(id), on_station, "{}", id);
    }
}

#[test]
fn test_zero_holdout_validates_in_sample() {
    let mut c = config(40);
    c.validation.holdout_fraction = 0.0;
    let report = run(c, &reference());
    assert!(report.station_split.holdout.is_empty());
    assert_eq!(report.station_split.training.len(), 6);
    assert_eq!(report.validation.spatial.as_complete().unwrap().n_ground_truth, 6);
}

#[test]
fn test_report_serializes() {
    let dir = TempDir::new().unwrap();
    let report = run(config(40), &reference());
    let path = dir.path().join("report.json");
    export::write_json(&path, &report).unwrap();
    export::write_geojson(dir.path().join("report.geojson"), &report.scored).unwrap();

    let parsed: serde_json::Value = serde_json::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
    assert!(parsed["generated_at"].is_string());
    assert!(parsed["validation"]["overall_validation_score"].is_number());
    assert!(parsed["quality"]["overall_quality_score"].is_number());
    assert_eq!(parsed["config"]["seed"], 42);
}
