//! Ground Station Investment Site Scoring CLI
//!
//! Generates candidate sites, scores them against a directory of reference
//! tables and validates the ranking against known ground stations.
//!
//! Usage:
//!   score-sites --reference-dir data/reference \
//!               --candidates 500 --seed 42 \
//!               --output data/site_scores.json --geojson

use anyhow::{Context, Result};
use clap::Parser;
use site_scoring::config::PipelineConfig;
use site_scoring::{export, loader, AggregationMethod, NormalizationMethod, Pipeline};
use std::path::PathBuf;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

#[derive(Parser, Debug)]
#[command(
    name = "score-sites",
    about = "Score candidate ground station investment sites"
)]
struct Args {
    /// Directory of reference JSON tables
    #[arg(short = 'r', long, default_value = "data/reference")]
    reference_dir: PathBuf,

    /// Number of candidates to generate
    #[arg(short = 'n', long)]
    candidates: Option<usize>,

    /// RNG seed
    #[arg(long)]
    seed: Option<u64>,

    /// Normalization method (min_max, z_score, robust, quantile)
    #[arg(long)]
    normalization: Option<NormalizationMethod>,

    /// Aggregation method (weighted_average, geometric_mean, harmonic_mean, weighted_geometric)
    #[arg(long)]
    aggregation: Option<AggregationMethod>,

    /// Pipeline configuration JSON; flags override its fields
    #[arg(short = 'c', long)]
    config: Option<PathBuf>,

    /// Output report JSON file
    #[arg(short, long, default_value = "data/site_scores.json")]
    output: PathBuf,

    /// Also output GeoJSON
    #[arg(long)]
    geojson: bool,

    /// Verbose output
    #[arg(short, long)]
    verbose: bool,
}

fn init_tracing(verbose: bool) {
    let default = if verbose { "site_scoring=debug" } else { "site_scoring=info" };
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default)))
        .with(tracing_subscriber::fmt::layer())
        .init();
}

fn build_config(args: &Args) -> Result<PipelineConfig> {
    let mut config = match &args.config {
        Some(path) => PipelineConfig::from_file(path).with_context(|| format!("loading config {:?}", path))?,
        None => PipelineConfig::default(),
    };
    if let Some(n) = args.candidates {
        config.candidates = n;
    }
    if let Some(seed) = args.seed {
        config.seed = seed;
    }
    if let Some(method) = args.normalization {
        config.normalization.method = method;
    }
    if let Some(method) = args.aggregation {
        config.aggregation = method;
    }
    Ok(config)
}

fn main() -> Result<()> {
    let args = Args::parse();
    init_tracing(args.verbose);

    info!("{}", "=".repeat(60));
    info!("Ground Station Investment Site Scoring");
    info!("{}", "=".repeat(60));

    let config = build_config(&args)?;
    let reference = loader::load_reference_dir(&args.reference_dir)
        .with_context(|| format!("loading reference tables from {:?}", args.reference_dir))?;

    let pipeline = Pipeline::new(config)?;
    let report = pipeline.run(&reference)?;

    info!("Top 10 candidates by investment score:");
    for row in report.scored.top(10) {
        if let (Some(rank), Some(score)) = (row.investment_rank, row.investment_score) {
            info!(
                "  #{:<3} {:.3} ± {:.3} | {:14} | {:?}",
                rank,
                score,
                row.score_uncertainty.unwrap_or(0.0),
                row.candidate.id,
                row.candidate.strategy
            );
        }
    }

    export::write_json(&args.output, &report)?;
    if args.geojson {
        export::write_geojson(args.output.with_extension("geojson"), &report.scored)?;
    }

    // Summary
    info!("{}", "=".repeat(60));
    info!("SUMMARY");
    info!("{}", "=".repeat(60));
    info!("Candidates: {}", report.candidates_generated);
    info!(
        "Stations: {} training, {} held out",
        report.station_split.training.len(),
        report.station_split.holdout.len()
    );
    info!(
        "Data quality: {:.1} ({:?})",
        report.quality.overall_quality_score, report.quality.grade
    );
    info!(
        "Validation: {:.1} ({:?})",
        report.validation.overall_validation_score, report.validation.validation_grade
    );
    for weight in &report.weights.weights {
        info!("  {:28} {:.4}", weight.factor_name, weight.weight);
    }

    Ok(())
}
