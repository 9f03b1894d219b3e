//! Output files: GeoJSON of scored candidates and pretty JSON reports

use crate::aggregate::{ScoredCandidate, ScoredTable};
use crate::Result;
use geojson::{Feature, FeatureCollection, Geometry, JsonObject, Value};
use serde::Serialize;
use serde_json::json;
use std::fs::File;
use std::io::BufWriter;
use std::path::Path;
use tracing::info;

fn feature(row: &ScoredCandidate, factors: &[String]) -> Feature {
    let c = &row.candidate;
    let mut properties = JsonObject::new();
    properties.insert("id".into(), json!(c.id));
    properties.insert("strategy".into(), json!(c.strategy));
    properties.insert("country".into(), json!(c.country));
    properties.insert("source_ref".into(), json!(c.source_ref));
    properties.insert("investment_score".into(), json!(row.investment_score));
    properties.insert("score_uncertainty".into(), json!(row.score_uncertainty));
    properties.insert("score_ci_lower".into(), json!(row.score_ci_lower));
    properties.insert("score_ci_upper".into(), json!(row.score_ci_upper));
    properties.insert("investment_rank".into(), json!(row.investment_rank));
    for (name, value) in factors.iter().zip(&row.values) {
        properties.insert(name.clone(), json!(value));
    }

    Feature {
        bbox: None,
        geometry: Some(Geometry::new(Value::Point(vec![c.longitude, c.latitude]))),
        id: Some(geojson::feature::Id::String(c.id.clone())),
        properties: Some(properties),
        foreign_members: None,
    }
}

/// Scored candidates as a FeatureCollection, in rank order
pub fn to_geojson(table: &ScoredTable) -> FeatureCollection {
    let features = table
        .ranked()
        .into_iter()
        .filter(|r| r.candidate.has_valid_location())
        .map(|r| feature(r, &table.factors))
        .collect();

    let mut metadata = JsonObject::new();
    metadata.insert("aggregation".into(), json!(table.method));
    metadata.insert("factors".into(), json!(table.factors));
    metadata.insert("total_candidates".into(), json!(table.len()));

    FeatureCollection {
        bbox: None,
        features,
        foreign_members: Some(metadata),
    }
}

pub fn write_json<T: Serialize>(path: impl AsRef<Path>, value: &T) -> Result<()> {
    let path = path.as_ref();
    info!("Writing {:?}", path);
    let writer = BufWriter::new(File::create(path)?);
    serde_json::to_writer_pretty(writer, value)?;
    Ok(())
}

pub fn write_geojson(path: impl AsRef<Path>, table: &ScoredTable) -> Result<()> {
    write_json(path, &to_geojson(table))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::aggregate::AggregationMethod;
    use crate::{Candidate, GenerationStrategy};
    use tempfile::TempDir;

    fn row(id: &str, lat: f64, score: Option<f64>, rank: Option<usize>) -> ScoredCandidate {
        ScoredCandidate {
            candidate: Candidate::new(id, lat, 10.0, GenerationStrategy::MarketOpportunity),
            values: vec![Some(0.5), None],
            investment_score: score,
            score_uncertainty: score.map(|_| 0.05),
            score_ci_lower: score.map(|s| s - 0.1),
            score_ci_upper: score.map(|s| s + 0.1),
            investment_rank: rank,
        }
    }

    fn table() -> ScoredTable {
        ScoredTable {
            factors: vec!["a".into(), "b".into()],
            method: AggregationMethod::WeightedAverage,
            rows: vec![
                row("low", 1.0, Some(0.2), Some(2)),
                row("none", 2.0, None, None),
                row("high", 3.0, Some(0.9), Some(1)),
                row("bad", 95.0, Some(0.5), Some(1)),
            ],
        }
    }

    #[test]
    fn test_features_in_rank_order() {
        let fc = to_geojson(&table());
        let ids: Vec<String> = fc
            .features
            .iter()
            .map(|f| f.property("id").and_then(|v| v.as_str()).unwrap().to_string())
            .collect();
        assert_eq!(ids, vec!["high", "low", "none"]);
    }

    #[test]
    fn test_feature_properties() {
        let fc = to_geojson(&table());
        let high = &fc.features[0];
        assert_eq!(high.property("investment_score").unwrap(), &json!(0.9));
        assert_eq!(high.property("a").unwrap(), &json!(0.5));
        assert!(high.property("b").unwrap().is_null());
        assert_eq!(high.property("strategy").unwrap(), &json!("market_opportunity"));

        match &high.geometry.as_ref().unwrap().value {
            Value::Point(p) => assert_eq!(p, &vec![10.0, 3.0]),
            other => panic!("unexpected geometry {:?}", other),
        }
        let meta = fc.foreign_members.unwrap();
        assert_eq!(meta["total_candidates"], json!(4));
    }

    #[test]
    fn test_write_geojson() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("sites.geojson");
        write_geojson(&path, &table()).unwrap();

        let parsed: serde_json::Value = serde_json::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(parsed["type"], "FeatureCollection");
        assert_eq!(parsed["features"].as_array().unwrap().len(), 3);
    }
}
