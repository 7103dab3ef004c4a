//! Datacube Mosaic CLI
//!
//! Build cloud-free composites from a scene catalog manifest.

use anyhow::Result;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use datacube_mosaic::io::{MemoryCatalog, SceneCatalog};
use datacube_mosaic::{build_runtime, init_rayon, plan, run_query, Config, QueryDescriptor, QueryOutcome};

#[derive(Parser)]
#[command(name = "datacube-mosaic")]
#[command(about = "Composite satellite scenes into cloud-free mosaics", long_about = None)]
struct Cli {
    /// Path to configuration file
    #[arg(short, long, default_value = "config.yaml", global = true)]
    config: PathBuf,

    /// Path to the query descriptor
    #[arg(short, long, default_value = "query.yaml", global = true)]
    query: PathBuf,

    /// Override chunk concurrency
    #[arg(long, global = true)]
    concurrency: Option<usize>,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the query (default if no command specified)
    Run,

    /// Print the chunk plan without processing
    Plan,

    /// Validate configuration and query
    Validate,

    /// Generate a sample configuration file
    GenerateConfig {
        /// Output path for configuration file
        #[arg(short, long, default_value = "config.yaml")]
        output: PathBuf,
    },
}

fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(EnvFilter::from_default_env().add_directive(tracing::Level::INFO.into()))
        .init();

    let cli = Cli::parse();

    match cli.command {
        None | Some(Commands::Run) => run_command(cli.config, cli.query, cli.concurrency)?,
        Some(Commands::Plan) => plan_command(cli.config, cli.query)?,
        Some(Commands::Validate) => validate_command(cli.config, cli.query)?,
        Some(Commands::GenerateConfig { output }) => generate_config_command(output)?,
    }

    Ok(())
}

fn load(config_path: &PathBuf, query_path: &PathBuf) -> Result<(Config, QueryDescriptor)> {
    let config = Config::from_file(config_path)?;
    config.validate()?;
    let query = QueryDescriptor::from_file(query_path)?;
    query.validate()?;
    Ok((config, query))
}

fn run_command(config_path: PathBuf, query_path: PathBuf, concurrency: Option<usize>) -> Result<()> {
    let (mut config, query) = load(&config_path, &query_path)?;

    if let Some(c) = concurrency {
        config.processing.chunk_concurrency = c;
        config.validate()?;
    }

    init_rayon(config.processing.rayon_threads)?;

    let runtime = build_runtime(config.processing.worker_threads)?;
    let outcome = runtime.block_on(run_query(config, query))?;

    match outcome {
        QueryOutcome::Completed(result) => {
            println!("\n=== Query {} ===", result.query_id);
            println!("Algorithm: {}", result.algorithm);
            println!("Bounds: {}", result.bounds);
            println!("Grid: {}x{} pixels", result.rows, result.cols);
            println!("Acquisitions: {}", result.total_scenes);
            println!(
                "Clean pixels: {} ({:.2}%)",
                result.clean_pixels, result.clean_percent
            );
            for acq in &result.acquisitions {
                println!(
                    "  {}  {:>10} clean ({:.2}%)",
                    acq.date.format("%Y-%m-%d"),
                    acq.clean_pixels,
                    acq.clean_percent
                );
            }
            for path in &result.outputs {
                println!("Wrote {}", path.display());
            }
        }
        QueryOutcome::NoData { message } => println!("No data: {}", message),
        QueryOutcome::Cancelled => println!("Query was cancelled"),
    }

    Ok(())
}

fn plan_command(config_path: PathBuf, query_path: PathBuf) -> Result<()> {
    let (config, query) = load(&config_path, &query_path)?;
    let algorithm = query.algorithm.config_with(config.tuning(query.algorithm));
    let catalog = MemoryCatalog::from_manifest_file(&config.catalog.manifest_path)?;

    let runtime = build_runtime(None)?;
    let chunk_plan = runtime.block_on(async {
        let dates = catalog
            .list_acquisition_dates(&query.platform, &query.product, &query.bbox, &query.time_range)
            .await?;
        let resolution = catalog.product_resolution(&query.product).await?;
        plan::plan(&query.bbox, &query.time_range, &dates, resolution, &algorithm)
    })?;

    println!("\n=== Chunk Plan: {} ===", query.query_id());
    println!(
        "Algorithm: {} (geo_chunk_size {}, time_chunk_count {:?}, slices/iteration {:?})",
        query.algorithm,
        algorithm.geo_chunk_size,
        algorithm.time_chunk_count,
        algorithm.time_slices_per_iteration
    );
    print!("{}", chunk_plan);
    println!("Work units: {}", chunk_plan.total_work_units());
    Ok(())
}

fn validate_command(config_path: PathBuf, query_path: PathBuf) -> Result<()> {
    let config = Config::from_file(&config_path)?;
    config.validate()?;
    println!("Configuration is valid");

    if query_path.exists() {
        let query = QueryDescriptor::from_file(&query_path)?;
        query.validate()?;
        println!("Query {} is valid", query.query_id());
    }
    Ok(())
}

fn generate_config_command(output: PathBuf) -> Result<()> {
    let yaml = r#"# Datacube Mosaic Configuration

# === CATALOG: Scenes available to queries ===
catalog:
  # YAML or JSON manifest listing products and scenes
  manifest_path: "catalog.yaml"

# === SCRATCH: Per-chunk intermediate mosaics ===
scratch:
  # Each query gets its own subdirectory, removed when the query ends
  root: "./scratch"

# === OUTPUT: Result files ===
output:
  root: "./results"

  # Any of: png, geotiff, netcdf
  # The bundled writer encodes png only; other formats are skipped with a warning
  formats: [png]

  png:
    # Bands mapped to red, green, blue
    rgb_bands: [red, green, blue]
    # Colour of nodata pixels in the _filled image
    fill_color: [0, 0, 0]
    # Reflectance rendered at full intensity
    scale_max: 4096.0

# === PROCESSING: Performance tuning ===
processing:
  # Geo chunks processed concurrently within a time group
  chunk_concurrency: 8

  # Tokio async worker threads (null = num CPUs)
  # worker_threads: 8

  # Rayon thread pool size for pixel kernels (null = num CPUs)
  # rayon_threads: 8

  # Band holding CFmask classes (0 clear, 1 water, 2 shadow, 3 snow, 4 cloud)
  quality_band: cf_mask

  # Log progress metrics during a query
  enable_metrics: true
  metrics_interval_secs: 10

  # Save metrics JSON after a query completes
  # metrics_output_path: "metrics.json"

# === ALGORITHMS: Optional chunking overrides (optional) ===
# algorithms:
#   most_recent:
#     geo_chunk_size: 0.5          # degrees per geo chunk side
#     time_chunk_count: 5          # time groups
#     time_slices_per_iteration: 5 # acquisitions per fetch
#   median:
#     geo_chunk_size: 0.01
"#;

    std::fs::write(&output, yaml)?;
    println!("Generated sample configuration at: {}", output.display());

    Ok(())
}
