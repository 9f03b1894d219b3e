//! Reference table loading from a directory of JSON files
//!
//! Each table is `<name>.json` holding either a bare array of rows or an
//! object wrapping the array under `records` or the table name. A missing
//! file leaves the source absent; a file that does not parse into its typed
//! rows is an error.

use crate::reference::{InfrastructureSite, ReferenceData};
use crate::{Result, ScoringError};
use ground_stations::{KnownStation, StationRegistry};
use serde::de::DeserializeOwned;
use std::fs::File;
use std::io::BufReader;
use std::path::Path;
use tracing::{info, warn};

pub const GROUND_STATIONS: &str = "ground_stations";
pub const POPULATION: &str = "population";
pub const ECONOMIC: &str = "economic";
pub const POWER: &str = "power";
pub const FIBER: &str = "fiber";
pub const CABLE_LANDINGS: &str = "cable_landings";
pub const IXPS: &str = "ixps";
pub const DATACENTERS: &str = "datacenters";
pub const SEISMIC: &str = "seismic";
pub const PRECIPITATION: &str = "precipitation";
pub const POLITICAL: &str = "political";
pub const BANDWIDTH: &str = "bandwidth";

/// Sanitize ID to prevent injection (alphanumeric, dash, underscore only)
fn sanitize_id(id: &str) -> String {
    id.chars()
        .filter(|c| c.is_alphanumeric() || *c == '-' || *c == '_')
        .take(128)
        .collect()
}

/// Sanitize name (allow more chars but still limit)
fn sanitize_name(name: &str) -> String {
    name.chars()
        .filter(|c| c.is_alphanumeric() || " -_.,()&'".contains(*c))
        .take(256)
        .collect()
}

/// Parse one table's rows; `Ok(None)` when the file does not exist
pub fn load_table<T: DeserializeOwned>(dir: &Path, table: &str) -> Result<Option<Vec<T>>> {
    let path = dir.join(format!("{}.json", table));
    if !path.is_file() {
        info!("Reference table {} not found at {:?}, treating as absent", table, path);
        return Ok(None);
    }

    let reader = BufReader::new(File::open(&path)?);
    let malformed = |source| ScoringError::MalformedTable {
        table: table.to_string(),
        source,
    };
    let raw: serde_json::Value = serde_json::from_reader(reader).map_err(malformed)?;

    // Bare array, or an object wrapping one
    let rows = match raw {
        serde_json::Value::Object(mut map) => match map.remove("records").or_else(|| map.remove(table)) {
            Some(rows) => rows,
            None => serde_json::Value::Object(map),
        },
        other => other,
    };
    let rows: Vec<T> = serde_json::from_value(rows).map_err(malformed)?;

    info!("Loaded {} rows from {}", rows.len(), table);
    Ok(Some(rows))
}

fn sanitize_sites(sites: Option<Vec<InfrastructureSite>>) -> Option<Vec<InfrastructureSite>> {
    sites.map(|rows| {
        rows.into_iter()
            .map(|site| InfrastructureSite {
                id: sanitize_id(&site.id),
                name: sanitize_name(&site.name),
                ..site
            })
            .collect()
    })
}

fn load_stations(dir: &Path) -> Result<Option<StationRegistry>> {
    let Some(stations) = load_table::<KnownStation>(dir, GROUND_STATIONS)? else {
        return Ok(None);
    };
    let stations: Vec<KnownStation> = stations
        .into_iter()
        .map(|s| KnownStation {
            id: sanitize_id(&s.id),
            name: sanitize_name(&s.name),
            ..s
        })
        .collect();

    let invalid = stations.iter().filter(|s| !s.location.is_valid()).count();
    if invalid > 0 {
        warn!("{} ground stations have invalid coordinates and will be skipped by lookups", invalid);
    }
    Ok(Some(StationRegistry::from_stations(stations)?))
}

/// Load every reference table found in `dir`
pub fn load_reference_dir(dir: impl AsRef<Path>) -> Result<ReferenceData> {
    let dir = dir.as_ref();
    info!("Loading reference tables from {:?}", dir);
    if !dir.is_dir() {
        warn!("Reference directory {:?} does not exist; every source is absent", dir);
    }

    let data = ReferenceData {
        ground_stations: load_stations(dir)?,
        population: load_table(dir, POPULATION)?,
        economic: load_table(dir, ECONOMIC)?,
        power: load_table(dir, POWER)?,
        fiber: load_table(dir, FIBER)?,
        cable_landings: sanitize_sites(load_table(dir, CABLE_LANDINGS)?),
        ixps: sanitize_sites(load_table(dir, IXPS)?),
        datacenters: sanitize_sites(load_table(dir, DATACENTERS)?),
        seismic: load_table(dir, SEISMIC)?,
        precipitation: load_table(dir, PRECIPITATION)?,
        political: load_table(dir, POLITICAL)?,
        bandwidth: load_table(dir, BANDWIDTH)?,
    };

    info!("Reference sources available: {:?}", data.available_sources());
    Ok(data)
}
