//! Michinoeki CLI - roadside station registry updater.

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use michinoeki::config::Config;
use michinoeki::console::Console;
use michinoeki::export::export_geojson;
use michinoeki::geocoder::create_geocoder;
use michinoeki::pipeline::{Pipeline, PipelineConfig, RunReport};
use michinoeki::resolver::Resolver;
use michinoeki::scrapers::{HttpPageSource, create_http_client};
use std::path::PathBuf;
use std::time::Duration;

/// Builds and maintains the michi-no-eki station registry.
#[derive(Parser, Debug)]
#[command(name = "michinoeki")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Use this config file instead of the default location.
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Scrape, geocode and replace the registry.
    Update {
        /// Registry file to read and replace.
        #[arg(long)]
        registry: Option<PathBuf>,

        /// Seconds to wait between page requests.
        #[arg(long)]
        delay: Option<f64>,
    },

    /// Write the registry as GeoJSON.
    Export {
        /// Registry file to read.
        #[arg(long)]
        registry: Option<PathBuf>,

        /// GeoJSON output file.
        #[arg(long)]
        output: Option<PathBuf>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    let console = Console::new();

    console.section("Michinoeki - Roadside Station Registry");

    console.step("Loading configuration...");
    let mut config = match &args.config {
        Some(path) => Config::load_from(path),
        None => Config::load(),
    }
    .context("Failed to load configuration")?;

    match args.command {
        Command::Update { registry, delay } => {
            if let Some(path) = registry {
                config.paths.registry_file = path;
            }
            if let Some(delay) = delay {
                config.source.delay_between_requests_sec = delay;
            }
            config.validate().context("Invalid configuration")?;
            console.success("Configuration loaded");

            run_update(&config, &console).await
        }
        Command::Export { registry, output } => {
            if let Some(path) = registry {
                config.paths.registry_file = path;
            }
            if let Some(path) = output {
                config.paths.geojson_file = path;
            }
            console.success("Configuration loaded");

            console.step("Exporting GeoJSON...");
            let count = export_geojson(&config.paths.registry_file, &config.paths.geojson_file)
                .context("Failed to export GeoJSON")?;
            console.success(&format!(
                "Wrote {} features to {}",
                console.count(count),
                config.paths.geojson_file.display()
            ));

            console.section("Done!");
            Ok(())
        }
    }
}

async fn run_update(config: &Config, console: &Console) -> Result<()> {
    let client = create_http_client().context("Failed to create HTTP client")?;
    let geocoder = create_geocoder(&config.geocoding, client.clone())
        .context("Failed to set up geocoder")?;
    console.info(&format!("Geocoding with {}", geocoder.name()));

    let resolver = Resolver::from_config(geocoder, &config.geocoding);
    let source = HttpPageSource::new(client);
    let mut pipeline = Pipeline::new(
        Box::new(source),
        resolver,
        PipelineConfig::from_config(config),
    )
    .with_console(console.clone());

    let started = std::time::Instant::now();
    let report = match pipeline.run().await {
        Ok(report) => report,
        Err(e) => {
            console.error("Run aborted; the previous registry was left untouched");
            return Err(e).context("Update failed");
        }
    };

    print_summary(&report, started.elapsed(), console);
    console.success(&format!(
        "Registry written to {}",
        config.paths.registry_file.display()
    ));

    console.section("Done!");
    Ok(())
}

fn print_summary(report: &RunReport, elapsed: Duration, console: &Console) {
    console.section("Summary");
    console.info(&format!(
        "Prefectures: {}, stations: {}",
        console.count(report.prefectures),
        console.count(report.stations)
    ));
    console.info(&format!(
        "Geocoder queries: {}",
        console.count(report.geocoder_queries)
    ));

    if report.unresolved > 0 {
        console.warning(&format!("{} stations without coordinates", report.unresolved));
    }
    if report.skipped > 0 {
        console.warning(&format!("{} stations skipped", report.skipped));
    }

    let drifts = report.drifts().count();
    if drifts > 0 {
        console.warning(&format!("{} stations changed geometry; review before publishing", drifts));
    }

    console.info(&console.muted(&format!(
        "{} warnings in {:.1}s",
        report.warnings.len(),
        elapsed.as_secs_f64()
    )));
}
