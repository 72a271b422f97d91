/// Time the full pipeline with linear and binary lookup
/// Usage: cargo run --release --bin tsgrid-bench -- --folder-name data --output-file out --sort-key cgm
use std::path::PathBuf;
use std::time::Instant;

use clap::Parser;
use serde::Serialize;
use tracing::info;

use tsgrid::{
    config::load_config,
    pipeline::{Pipeline, PipelineOptions, RunReport},
    utils::init_logging,
    Config, SearchStrategy,
};

#[derive(Parser, Debug)]
#[command(name = "tsgrid-bench")]
#[command(about = "Compare linear and binary lookup over the whole pipeline", long_about = None)]
struct Args {
    #[arg(long)]
    folder_name: PathBuf,

    #[arg(long)]
    output_file: String,

    #[arg(long)]
    sort_key: String,

    #[arg(short, long)]
    config: Option<PathBuf>,
}

#[derive(Debug, Serialize)]
struct BenchReport {
    load_secs: f64,
    runs: Vec<RunReport>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    // Plain file, no TSGRID_* overrides
    let config = match &args.config {
        Some(path) => load_config(path)?,
        None => Config::default(),
    };
    init_logging(&config.log_level, config.log_format);

    let options = PipelineOptions {
        input_dir: args.folder_name,
        output_base: args.output_file,
        key: args.sort_key,
    };
    let pipeline = Pipeline::new(config);

    let started = Instant::now();
    let stores = pipeline.load_sources(&options.input_dir).await?;
    let load_secs = started.elapsed().as_secs_f64();

    let mut runs = Vec::new();
    for strategy in [SearchStrategy::Linear, SearchStrategy::Binary] {
        let report = pipeline.run_loaded(&stores, &options, strategy).await?;
        for table in &report.resolutions {
            info!(
                "time for {} at {}m {} search: {:.4}s",
                table.output.display(),
                table.resolution,
                strategy,
                table.elapsed_secs
            );
        }
        runs.push(report);
    }

    let report = BenchReport { load_secs, runs };
    println!("{}", serde_json::to_string_pretty(&report)?);

    Ok(())
}
