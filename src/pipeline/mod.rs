pub mod discovery;
pub mod runner;

pub use discovery::{discover_sources, output_path};
pub use runner::{Pipeline, PipelineOptions, ResolutionReport, RunReport};
