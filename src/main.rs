pub mod cache;
pub mod config;
pub mod data;
pub mod error;
pub mod export;
pub mod filter;
pub mod geometry;
pub mod join;
pub mod pipeline;
pub mod processing;
pub mod render;
pub mod server;
pub mod session;
pub mod source;
pub mod types;

#[cfg(test)]
mod fixtures;

use anyhow::Context;
use clap::{Parser, Subcommand};
use serde_json::json;
use std::fs::File;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use crate::export::{write_csv, CoordinatePair};
use crate::filter::SelectionRequest;
use crate::source::SourceFetcher;
use crate::types::PointCollection;

#[derive(Parser)]
#[command(author, version, about, long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Serve the dashboard API and the map client
    Serve {
        #[arg(short, long, value_name = "FILE", default_value = "config.toml")]
        config: PathBuf,
    },
    /// Print the statistics for one selection
    Report {
        #[arg(short, long, value_name = "FILE", default_value = "config.toml")]
        config: PathBuf,
        #[arg(long)]
        region: Option<String>,
        #[arg(long)]
        cercle: Option<String>,
        #[arg(long)]
        commune: Option<String>,
        /// Unit id, or "No filter" for the whole commune
        #[arg(long)]
        unit: Option<String>,
        /// Write the joined points' coordinates to this CSV file
        #[arg(long, value_name = "FILE")]
        csv: Option<PathBuf>,
    },
}

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Serve { config } => {
            info!("Serving with config: {:?}", config);
            let app_config = config::AppConfig::load_from_file(&config)?;

            // The blocking HTTP client has to be built outside the async runtime.
            let fetcher = Arc::new(SourceFetcher::new()?);
            let state = Arc::new(server::AppState::new(app_config, fetcher));

            let runtime = tokio::runtime::Runtime::new().context("Failed to start tokio runtime")?;
            runtime.block_on(server::start_server(state))?;
        }
        Commands::Report {
            config,
            region,
            cercle,
            commune,
            unit,
            csv,
        } => {
            let app_config = config::AppConfig::load_from_file(&config)?;
            let datasets = data::Datasets::new(
                Arc::new(SourceFetcher::new()?),
                app_config.schema.clone(),
            );

            let boundaries = datasets.load_boundaries(&app_config.input.boundaries)?;
            let points = match datasets.load_points(&app_config.input.points) {
                Ok(load) => load.to_collection(),
                Err(e) => {
                    warn!("Continuing without concession points: {}", e);
                    PointCollection::empty()
                }
            };

            let request = SelectionRequest {
                region,
                cercle,
                commune,
                unit,
            };
            let report = pipeline::run(
                &boundaries.records,
                &points,
                &request,
                app_config.join.options(),
                &app_config.chart.labels,
            );

            if report.is_empty() {
                println!("No data for this selection.");
            }
            let summary = json!({
                "selection": report.cascade.selection,
                "polygons": report.cascade.records.len(),
                "joined_points": report.joined.len(),
                "totals": report.totals,
                "population": report.population,
                "chart": report.chart,
                "view": report.view,
            });
            println!("{}", serde_json::to_string_pretty(&summary)?);

            if let Some(path) = csv {
                let pairs: Vec<CoordinatePair> = report
                    .joined
                    .records
                    .iter()
                    .map(|r| CoordinatePair::from(&r.point))
                    .collect();
                let file = File::create(&path)
                    .with_context(|| format!("Failed to create {:?}", path))?;
                write_csv(&pairs, file)?;
                info!("Wrote {} coordinates to {:?}", pairs.len(), path);
            }
        }
    }

    Ok(())
}
