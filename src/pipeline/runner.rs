/// End-to-end run: discover sources, load them, resample per resolution, align
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;

use serde::Serialize;
use tokio::task::JoinSet;
use tracing::{error, info};

use crate::data::{find_reference, Aligner, ReadingStore, ResampledSeries, Resampler};
use crate::error::{GridError, Result};
use crate::pipeline::discovery::{discover_sources, output_path};
use crate::types::{Config, SearchStrategy};

/// What to read, where to write, and which source anchors the join
#[derive(Debug, Clone)]
pub struct PipelineOptions {
    pub input_dir: PathBuf,
    pub output_base: String,
    pub key: String,
}

/// Outcome of writing one resolution's table
#[derive(Debug, Clone, Serialize)]
pub struct ResolutionReport {
    pub resolution: u32,
    pub output: PathBuf,
    pub rows: usize,
    pub elapsed_secs: f64,
}

#[derive(Debug, Clone, Serialize)]
pub struct RunReport {
    pub strategy: SearchStrategy,
    pub sources: usize,
    pub resolutions: Vec<ResolutionReport>,
}

pub struct Pipeline {
    config: Arc<Config>,
}

impl Pipeline {
    pub fn new(config: Config) -> Self {
        Pipeline {
            config: Arc::new(config),
        }
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Discover, load and process every source with the configured strategy
    pub async fn run(&self, options: &PipelineOptions) -> Result<RunReport> {
        let stores = self.load_sources(&options.input_dir).await?;
        self.run_loaded(&stores, options, self.config.strategy).await
    }

    /// Load one store per discovered file, in discovery order
    pub async fn load_sources(&self, input_dir: &std::path::Path) -> Result<Vec<Arc<ReadingStore>>> {
        let paths = discover_sources(input_dir)?;

        let mut tasks = JoinSet::new();
        for (idx, path) in paths.iter().cloned().enumerate() {
            let source = path.to_string_lossy().into_owned();
            let highlow = self.config.uses_highlow(&source);
            let verbose = self.config.verbose;
            tasks.spawn_blocking(move || (idx, ReadingStore::from_csv(path, highlow, verbose)));
        }

        let mut slots: Vec<Option<Arc<ReadingStore>>> = (0..paths.len()).map(|_| None).collect();
        while let Some(joined) = tasks.join_next().await {
            let (idx, store) = joined?;
            slots[idx] = Some(Arc::new(store?));
        }

        let stores = collect_slots(slots, "source loading")?;
        info!(
            "Loaded {} sources ({} readings) from {}",
            stores.len(),
            stores.iter().map(|s| s.len()).sum::<usize>(),
            input_dir.display()
        );
        Ok(stores)
    }

    /// Resample every store at one resolution; each task works on its own copy
    pub async fn resample_all(
        &self,
        stores: &[Arc<ReadingStore>],
        resolution: u32,
        strategy: SearchStrategy,
    ) -> Result<Vec<ResampledSeries>> {
        let mut tasks = JoinSet::new();
        for (idx, store) in stores.iter().enumerate() {
            let resampler = Resampler::new(
                resolution,
                self.config.aggregation_for(store.source()),
                strategy,
            )?;
            let store = Arc::clone(store);
            tasks.spawn_blocking(move || (idx, resampler.resample(&store)));
        }

        let mut slots: Vec<Option<ResampledSeries>> = (0..stores.len()).map(|_| None).collect();
        while let Some(joined) = tasks.join_next().await {
            let (idx, series) = joined?;
            slots[idx] = Some(series?);
        }

        collect_slots(slots, "resampling")
    }

    /// Write one aligned table per configured resolution from already-loaded stores
    pub async fn run_loaded(
        &self,
        stores: &[Arc<ReadingStore>],
        options: &PipelineOptions,
        strategy: SearchStrategy,
    ) -> Result<RunReport> {
        let labels: Vec<String> = stores.iter().map(|s| s.source().to_string()).collect();

        // Fail before any work or output if the key selects nothing
        if let Err(e) = find_reference(&labels, &options.key) {
            error!(
                "Key '{}' did not apply to the sources in {} ({})",
                options.key,
                options.input_dir.display(),
                e.error_code()
            );
            return Err(e);
        }

        let aligner = Aligner::new(self.config.trailing_separator);
        let mut resolutions = Vec::with_capacity(self.config.resolutions.len());

        for &resolution in &self.config.resolutions {
            let started = Instant::now();

            let series = self.resample_all(stores, resolution, strategy).await?;
            let output = output_path(&options.output_base, resolution);
            let table = aligner.align_to_file(&series, &labels, &output, &options.key)?;

            resolutions.push(ResolutionReport {
                resolution,
                output,
                rows: table.rows().len(),
                elapsed_secs: started.elapsed().as_secs_f64(),
            });
        }

        Ok(RunReport {
            strategy,
            sources: stores.len(),
            resolutions,
        })
    }
}

fn collect_slots<T>(slots: Vec<Option<T>>, stage: &str) -> Result<Vec<T>> {
    slots
        .into_iter()
        .collect::<Option<Vec<T>>>()
        .ok_or_else(|| GridError::TaskFailed(format!("{} task did not report a result", stage)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Aggregation;
    use tempfile::TempDir;

    fn fixture_dir() -> TempDir {
        let dir = TempDir::new().unwrap();
        std::fs::write(
            dir.path().join("cgm_small.csv"),
            "id,time,value\n\
             1,3/16/18 0:20,140\n\
             2,3/16/18 0:25,high\n\
             3,3/16/18 0:30,150\n\
             4,3/16/18 1:10,low\n",
        )
        .unwrap();
        std::fs::write(
            dir.path().join("bolus_small.csv"),
            "id,time,value\n\
             1,3/16/18 0:21,0.5\n\
             2,3/16/18 0:22,0.2\n\
             3,3/16/18 5:00,1.0\n",
        )
        .unwrap();
        dir
    }

    fn options(dir: &TempDir, out: &TempDir, key: &str) -> PipelineOptions {
        PipelineOptions {
            input_dir: dir.path().to_path_buf(),
            output_base: out.path().join("combined.csv").to_string_lossy().into_owned(),
            key: key.to_string(),
        }
    }

    #[tokio::test]
    async fn test_run_writes_one_table_per_resolution() {
        let dir = fixture_dir();
        let out = TempDir::new().unwrap();
        let pipeline = Pipeline::new(Config::default());

        let report = pipeline.run(&options(&dir, &out, "cgm")).await.unwrap();

        assert_eq!(report.sources, 2);
        assert_eq!(report.resolutions.len(), 2);

        let five = std::fs::read_to_string(out.path().join("combined_5.csv")).unwrap();
        let lines: Vec<&str> = five.lines().collect();
        assert_eq!(lines[0], "time,cgm,bolus,");
        // 0:20 holds 140; the bolus readings at 0:21 and 0:22 sum into the same bucket
        assert_eq!(lines[1], "2018-03-16 00:20:00,140.0,0.7,");
        assert_eq!(lines[2], "2018-03-16 00:25:00,300.0,0,");
        assert_eq!(lines[3], "2018-03-16 00:30:00,150.0,0,");
        assert_eq!(lines[4], "2018-03-16 01:10:00,40.0,0,");
        assert_eq!(lines.len(), 5);

        assert!(out.path().join("combined_15.csv").exists());
    }

    #[tokio::test]
    async fn test_run_unmatched_key_produces_no_output() {
        let dir = fixture_dir();
        let out = TempDir::new().unwrap();
        let pipeline = Pipeline::new(Config::default());

        let result = pipeline.run(&options(&dir, &out, "basal")).await;

        assert!(matches!(result, Err(GridError::ResourceNotFound(_))));
        assert!(!out.path().join("combined_5.csv").exists());
        assert!(!out.path().join("combined_15.csv").exists());
    }

    #[tokio::test]
    async fn test_run_missing_directory() {
        let out = TempDir::new().unwrap();
        let pipeline = Pipeline::new(Config::default());
        let options = PipelineOptions {
            input_dir: out.path().join("missing"),
            output_base: "unused".to_string(),
            key: "cgm".to_string(),
        };

        assert!(matches!(
            pipeline.run(&options).await,
            Err(GridError::ResourceNotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_resample_all_keeps_input_order_and_aggregation() {
        let dir = fixture_dir();
        let pipeline = Pipeline::new(Config::default());
        let stores = pipeline.load_sources(dir.path()).await.unwrap();

        let series = pipeline
            .resample_all(&stores, 60, SearchStrategy::Binary)
            .await
            .unwrap();

        // discovery sorts by name: bolus first
        assert!(series[0].source().ends_with("bolus_small.csv"));
        assert_eq!(series[0].aggregation(), Aggregation::Sum);
        assert!(series[1].source().ends_with("cgm_small.csv"));
        assert_eq!(series[1].aggregation(), Aggregation::Average);

        // the shared stores are untouched by resampling
        assert_eq!(stores[1].len(), 4);
    }

    #[tokio::test]
    async fn test_strategies_produce_identical_tables() {
        let dir = fixture_dir();
        let linear_out = TempDir::new().unwrap();
        let binary_out = TempDir::new().unwrap();
        let pipeline = Pipeline::new(Config::default());
        let stores = pipeline.load_sources(dir.path()).await.unwrap();

        pipeline
            .run_loaded(&stores, &options(&dir, &linear_out, "cgm"), SearchStrategy::Linear)
            .await
            .unwrap();
        pipeline
            .run_loaded(&stores, &options(&dir, &binary_out, "cgm"), SearchStrategy::Binary)
            .await
            .unwrap();

        for name in ["combined_5.csv", "combined_15.csv"] {
            let linear = std::fs::read_to_string(linear_out.path().join(name)).unwrap();
            let binary = std::fs::read_to_string(binary_out.path().join(name)).unwrap();
            assert_eq!(linear, binary);
        }
    }
}
