/// Main entry point: resample every source in a folder and write aligned tables
use std::path::PathBuf;

use anyhow::Context;
use clap::Parser;
use tracing::{error, info};

use tsgrid::{
    config::{load_layered_config, validate_config},
    pipeline::{Pipeline, PipelineOptions},
    utils::init_logging,
    Config, SearchStrategy,
};

#[derive(Parser, Debug)]
#[command(name = "tsgrid")]
#[command(version)]
#[command(about = "Import, resample and combine timestamped readings from a folder", long_about = None)]
struct Cli {
    /// Folder containing one CSV file per source
    folder_name: PathBuf,

    /// Output base name; `_<resolution>.csv` is appended
    output_file: String,

    /// Substring selecting the source whose buckets anchor the output rows
    sort_key: String,

    /// TOML configuration file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Lookup strategy: linear or binary
    #[arg(long)]
    strategy: Option<String>,

    /// Resolution in minutes; repeat for several tables
    #[arg(long = "resolution")]
    resolutions: Vec<u32>,

    /// Report skipped rows and missed lookups
    #[arg(short, long, default_value_t = false)]
    verbose: bool,
}

impl Cli {
    fn apply_overrides(&self, config: &mut Config) -> anyhow::Result<()> {
        if let Some(strategy) = &self.strategy {
            config.strategy = strategy.parse::<SearchStrategy>()?;
        }
        if !self.resolutions.is_empty() {
            config.resolutions = self.resolutions.clone();
        }
        if self.verbose {
            config.verbose = true;
        }
        validate_config(config)?;
        Ok(())
    }
}

async fn run(cli: Cli) -> anyhow::Result<()> {
    let mut config = load_layered_config(cli.config.as_deref())
        .context("loading configuration")?;
    cli.apply_overrides(&mut config)?;

    init_logging(&config.log_level, config.log_format);

    info!(
        "Processing {} at {:?} minute resolution ({} search)",
        cli.folder_name.display(),
        config.resolutions,
        config.strategy
    );

    let options = PipelineOptions {
        input_dir: cli.folder_name,
        output_base: cli.output_file,
        key: cli.sort_key,
    };

    let pipeline = Pipeline::new(config);
    let report = match pipeline.run(&options).await {
        Ok(report) => report,
        Err(e) => {
            error!("Run failed: {} ({})", e, e.error_code());
            return Err(e.into());
        }
    };

    for table in &report.resolutions {
        info!(
            "{}m: {} rows -> {} in {:.3}s",
            table.resolution,
            table.rows,
            table.output.display(),
            table.elapsed_secs
        );
    }

    Ok(())
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    if let Err(e) = run(cli).await {
        eprintln!("tsgrid: {:#}", e);
        std::process::exit(1);
    }
}
