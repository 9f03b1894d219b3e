//! Candidate site generation
//!
//! Three strategies, split by the configured shares (default 40% grid, 35%
//! infrastructure, remainder market):
//!
//! - **Grid**: ⌈√n⌉ × ⌈√n⌉ points over lat [-60, 70] × lon [-180, 180],
//!   jittered by up to ¼ cell, ocean and polar points dropped by a coarse
//!   land-box test.
//! - **Infrastructure**: uniform in a disc around a random datacenter (50 km),
//!   cable landing (100 km) or ground station (200 km). Flat polar offset,
//!   not geodesic.
//! - **Market**: random population cells at or above the 70th density
//!   percentile, offset by up to ±0.5°.
//!
//! A missing reference table contributes no candidates, so the result may be
//! shorter than requested.

use crate::config::GeneratorConfig;
use crate::reference::{InfrastructureSite, Located, ReferenceData};
use crate::{stats, wrap_longitude, Candidate, GenerationStrategy, KM_PER_DEGREE};
use rand::Rng;
use std::f64::consts::PI;
use tracing::{debug, info};

/// Floor on cos(lat) for longitude offsets near the poles
const MIN_COS_LAT: f64 = 0.01;

/// Coarse land boxes (lat_min, lat_max, lon_min, lon_max)
const LAND_BOXES: [(f64, f64, f64, f64); 12] = [
    (15.0, 70.0, -168.0, -52.0),  // North America
    (7.0, 23.0, -118.0, -77.0),   // Central America
    (-56.0, 13.0, -82.0, -34.0),  // South America
    (50.0, 61.0, -11.0, 2.0),     // British Isles
    (36.0, 71.0, -10.0, 40.0),    // Europe
    (-35.0, 37.0, -18.0, 52.0),   // Africa
    (12.0, 42.0, 34.0, 63.0),     // Middle East
    (5.0, 75.0, 60.0, 180.0),     // Asia
    (-11.0, 20.0, 95.0, 141.0),   // Southeast Asia
    (30.0, 46.0, 129.0, 146.0),   // Japan
    (-44.0, -10.0, 113.0, 154.0), // Australia
    (-47.5, -34.0, 166.0, 179.0), // New Zealand
];

/// Rough land test; not a coastline
pub fn is_probably_land(lat: f64, lon: f64) -> bool {
    LAND_BOXES
        .iter()
        .any(|&(lat_min, lat_max, lon_min, lon_max)| lat >= lat_min && lat <= lat_max && lon >= lon_min && lon <= lon_max)
}

fn linspace(start: f64, end: f64, n: usize) -> Vec<f64> {
    match n {
        0 => Vec::new(),
        1 => vec![(start + end) / 2.0],
        _ => {
            let step = (end - start) / (n - 1) as f64;
            (0..n).map(|i| start + step * i as f64).collect()
        }
    }
}

/// Uniform in [-half, half]
fn symmetric<R: Rng + ?Sized>(rng: &mut R, half: f64) -> f64 {
    (rng.gen::<f64>() * 2.0 - 1.0) * half
}

/// Point uniform in a disc of `radius_km` around (lat, lon)
pub fn offset_within<R: Rng + ?Sized>(rng: &mut R, lat: f64, lon: f64, radius_km: f64) -> (f64, f64) {
    let r = radius_km * rng.gen::<f64>().sqrt();
    let theta = 2.0 * PI * rng.gen::<f64>();
    let dlat = r * theta.cos() / KM_PER_DEGREE;
    let dlon = r * theta.sin() / (KM_PER_DEGREE * lat.to_radians().cos().max(MIN_COS_LAT));
    ((lat + dlat).clamp(-90.0, 90.0), wrap_longitude(lon + dlon))
}

/// Split `n` into `parts` near-equal shares, remainder to the first
fn split_evenly(n: usize, parts: usize) -> Vec<usize> {
    (0..parts).map(|i| n / parts + usize::from(i < n % parts)).collect()
}

pub struct CandidateGenerator<'a> {
    reference: &'a ReferenceData,
    config: GeneratorConfig,
}

impl<'a> CandidateGenerator<'a> {
    pub fn new(reference: &'a ReferenceData, config: GeneratorConfig) -> Self {
        Self { reference, config }
    }

    /// Up to `n` candidates across all strategies
    pub fn generate<R: Rng + ?Sized>(&self, n: usize, rng: &mut R) -> Vec<Candidate> {
        let grid_n = (n as f64 * self.config.grid_share).round() as usize;
        let grid_n = grid_n.min(n);
        let infra_n = ((n as f64 * self.config.infrastructure_share).round() as usize).min(n - grid_n);
        let market_n = n - grid_n - infra_n;

        let mut candidates = self.grid(grid_n, rng);
        candidates.extend(self.infrastructure(infra_n, rng));
        candidates.extend(self.market(market_n, rng));

        info!(
            "Generated {} of {} requested candidates ({} grid, {} infrastructure, {} market)",
            candidates.len(),
            n,
            candidates
                .iter()
                .filter(|c| c.strategy == GenerationStrategy::GridSystematic)
                .count(),
            candidates
                .iter()
                .filter(|c| c.strategy == GenerationStrategy::InfrastructureProximate)
                .count(),
            candidates
                .iter()
                .filter(|c| c.strategy == GenerationStrategy::MarketOpportunity)
                .count(),
        );
        candidates
    }

    fn id(strategy: GenerationStrategy, index: usize) -> String {
        format!("{}_{:05}", strategy.id_prefix(), index)
    }

    pub fn grid<R: Rng + ?Sized>(&self, n: usize, rng: &mut R) -> Vec<Candidate> {
        if n == 0 {
            return Vec::new();
        }
        let side = (n as f64).sqrt().ceil() as usize;
        let (lat_min, lat_max) = self.config.lat_range;
        let (lon_min, lon_max) = self.config.lon_range;
        let lat_cell = (lat_max - lat_min) / side as f64;
        let lon_cell = (lon_max - lon_min) / side as f64;

        let mut out = Vec::new();
        let mut dropped = 0;
        for lat in linspace(lat_min, lat_max, side) {
            for lon in linspace(lon_min, lon_max, side) {
                let jlat = lat + symmetric(rng, self.config.jitter_fraction * lat_cell);
                let jlon = lon + symmetric(rng, self.config.jitter_fraction * lon_cell);
                let jlat = jlat.clamp(lat_min, lat_max);
                let jlon = wrap_longitude(jlon);

                if !is_probably_land(jlat, jlon) {
                    dropped += 1;
                    continue;
                }
                if out.len() < n {
                    let id = Self::id(GenerationStrategy::GridSystematic, out.len());
                    out.push(Candidate::new(id, jlat, jlon, GenerationStrategy::GridSystematic));
                }
            }
        }
        debug!("Grid: {} points kept, {} dropped as ocean", out.len(), dropped);
        out
    }

    pub fn infrastructure<R: Rng + ?Sized>(&self, n: usize, rng: &mut R) -> Vec<Candidate> {
        let r = self.reference;
        let station_sites: Option<Vec<InfrastructureSite>> = r.stations().map(|stations| {
            stations
                .iter()
                .map(|s| InfrastructureSite {
                    id: s.id.clone(),
                    name: s.name.clone(),
                    latitude: s.latitude(),
                    longitude: s.longitude(),
                })
                .collect()
        });

        let sources: [(Option<&[InfrastructureSite]>, f64); 3] = [
            (r.datacenters.as_deref(), self.config.datacenter_radius_km),
            (r.cable_landings.as_deref(), self.config.cable_landing_radius_km),
            (station_sites.as_deref(), self.config.ground_station_radius_km),
        ];

        let mut out = Vec::new();
        for ((rows, radius), quota) in sources.into_iter().zip(split_evenly(n, 3)) {
            let valid: Vec<&InfrastructureSite> = rows
                .unwrap_or_default()
                .iter()
                .filter(|s| s.has_valid_location())
                .collect();
            if valid.is_empty() {
                continue;
            }
            for _ in 0..quota {
                let site = valid[rng.gen_range(0..valid.len())];
                let (lat, lon) = offset_within(rng, site.latitude, site.longitude, radius);
                let id = Self::id(GenerationStrategy::InfrastructureProximate, out.len());
                let mut c = Candidate::new(id, lat, lon, GenerationStrategy::InfrastructureProximate);
                c.source_ref = Some(site.id.clone());
                out.push(c);
            }
        }
        debug!("Infrastructure: {} of {} placed", out.len(), n);
        out
    }

    pub fn market<R: Rng + ?Sized>(&self, n: usize, rng: &mut R) -> Vec<Candidate> {
        let Some(cells) = self.reference.population.as_deref() else {
            return Vec::new();
        };
        let usable: Vec<(f64, f64, f64)> = cells
            .iter()
            .filter(|c| c.has_valid_location())
            .filter_map(|c| c.density.filter(|d| d.is_finite()).map(|d| (c.latitude, c.longitude, d)))
            .collect();
        let densities: Vec<f64> = usable.iter().map(|c| c.2).collect();
        let Some(threshold) = stats::percentile(&densities, self.config.market_percentile) else {
            return Vec::new();
        };
        let eligible: Vec<&(f64, f64, f64)> = usable.iter().filter(|c| c.2 >= threshold).collect();
        if eligible.is_empty() {
            return Vec::new();
        }

        let offset = self.config.market_offset_deg;
        (0..n)
            .map(|i| {
                let &(lat, lon, _) = eligible[rng.gen_range(0..eligible.len())];
                let lat = (lat + symmetric(rng, offset)).clamp(-90.0, 90.0);
                let lon = wrap_longitude(lon + symmetric(rng, offset));
                Candidate::new(
                    Self::id(GenerationStrategy::MarketOpportunity, i),
                    lat,
                    lon,
                    GenerationStrategy::MarketOpportunity,
                )
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::haversine_km;
    use crate::reference::PopulationCell;
    use ground_stations::{KnownStation, StationRegistry};
    use rand::rngs::StdRng;
    use rand::SeedableRng;
    use std::collections::HashSet;

    fn site(id: &str, lat: f64, lon: f64) -> InfrastructureSite {
        InfrastructureSite {
            id: id.to_string(),
            name: id.to_string(),
            latitude: lat,
            longitude: lon,
        }
    }

    fn reference() -> ReferenceData {
        ReferenceData {
            datacenters: Some(vec![site("dc-ash", 39.04, -77.49), site("dc-fra", 50.11, 8.68)]),
            cable_landings: Some(vec![site("cl-mia", 25.76, -80.19)]),
            ground_stations: Some(
                StationRegistry::from_stations(vec![KnownStation::new("gs-sva", "Svalbard", 78.23, 15.39)]).unwrap(),
            ),
            population: Some(
                (0..10)
                    .map(|i| PopulationCell {
                        latitude: i as f64,
                        longitude: i as f64,
                        density: Some(i as f64 * 100.0),
                    })
                    .collect(),
            ),
            ..ReferenceData::default()
        }
    }

    #[test]
    fn test_land_heuristic() {
        assert!(is_probably_land(40.0, -100.0));
        assert!(is_probably_land(-25.0, 135.0));
        // Mid Pacific and South Atlantic
        assert!(!is_probably_land(0.0, -140.0));
        assert!(!is_probably_land(-40.0, -20.0));
    }

    #[test]
    fn test_generate_with_full_reference() {
        let data = reference();
        let gen = CandidateGenerator::new(&data, GeneratorConfig::default());
        let mut rng = StdRng::seed_from_u64(42);
        let candidates = gen.generate(100, &mut rng);

        assert!(candidates.len() <= 100);
        let infra = candidates
            .iter()
            .filter(|c| c.strategy == GenerationStrategy::InfrastructureProximate)
            .count();
        let market = candidates
            .iter()
            .filter(|c| c.strategy == GenerationStrategy::MarketOpportunity)
            .count();
        assert_eq!(infra, 35);
        assert_eq!(market, 25);

        let ids: HashSet<&str> = candidates.iter().map(|c| c.id.as_str()).collect();
        assert_eq!(ids.len(), candidates.len());
        assert!(candidates.iter().all(|c| c.has_valid_location()));
    }

    #[test]
    fn test_missing_tables_contribute_nothing() {
        let data = ReferenceData::empty();
        let gen = CandidateGenerator::new(&data, GeneratorConfig::default());
        let mut rng = StdRng::seed_from_u64(1);
        let candidates = gen.generate(50, &mut rng);
        assert!(candidates.iter().all(|c| c.strategy == GenerationStrategy::GridSystematic));
        assert!(candidates.len() <= 20);
    }

    #[test]
    fn test_seeded_generation_is_reproducible() {
        let data = reference();
        let gen = CandidateGenerator::new(&data, GeneratorConfig::default());
        let a = gen.generate(60, &mut StdRng::seed_from_u64(7));
        let b = gen.generate(60, &mut StdRng::seed_from_u64(7));
        let coords = |v: &[Candidate]| v.iter().map(|c| (c.latitude, c.longitude)).collect::<Vec<_>>();
        assert_eq!(coords(&a), coords(&b));
    }

    #[test]
    fn test_grid_points_on_land_within_range() {
        let data = ReferenceData::empty();
        let gen = CandidateGenerator::new(&data, GeneratorConfig::default());
        let grid = gen.grid(400, &mut StdRng::seed_from_u64(3));
        assert!(!grid.is_empty());
        for c in &grid {
            assert!(is_probably_land(c.latitude, c.longitude));
            assert!((-60.0..=70.0).contains(&c.latitude));
        }
    }

    #[test]
    fn test_infrastructure_within_radius() {
        let data = reference();
        let config = GeneratorConfig::default();
        let gen = CandidateGenerator::new(&data, config.clone());
        let placed = gen.infrastructure(300, &mut StdRng::seed_from_u64(11));
        assert_eq!(placed.len(), 300);

        let all_sites = [site("dc-ash", 39.04, -77.49), site("dc-fra", 50.11, 8.68), site("cl-mia", 25.76, -80.19)];
        for c in &placed {
            let source = c.source_ref.as_deref().unwrap();
            let (lat, lon, radius) = match source {
                "gs-sva" => (78.23, 15.39, config.ground_station_radius_km),
                "cl-mia" => (25.76, -80.19, config.cable_landing_radius_km),
                id => {
                    let s = all_sites.iter().find(|s| s.id == id).unwrap();
                    (s.latitude, s.longitude, config.datacenter_radius_km)
                }
            };
            // Flat offset stretches at high latitude
            let d = haversine_km(lat, lon, c.latitude, c.longitude);
            assert!(d <= radius * 1.15, "{} is {:.1} km from {}", c.id, d, source);
        }
    }

    #[test]
    fn test_market_uses_dense_cells() {
        let data = reference();
        let gen = CandidateGenerator::new(&data, GeneratorConfig::default());
        let market = gen.market(50, &mut StdRng::seed_from_u64(5));
        assert_eq!(market.len(), 50);
        // 70th percentile of 0..900 is 630: cells 7, 8 and 9
        for c in &market {
            assert!(c.latitude >= 6.5 && c.latitude <= 9.5, "{}", c.latitude);
        }
    }

    #[test]
    fn test_split_evenly() {
        assert_eq!(split_evenly(10, 3), vec![4, 3, 3]);
        assert_eq!(split_evenly(0, 3), vec![0, 0, 0]);
    }
}
