/// Core type definitions for the resampling pipeline
use std::fmt;
use std::str::FromStr;

use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};

use crate::error::GridError;

/// One timestamped observation from a source
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Reading {
    pub timestamp: NaiveDateTime,
    pub value: f64,
}

impl Reading {
    pub fn new(timestamp: NaiveDateTime, value: f64) -> Self {
        Reading { timestamp, value }
    }
}

/// Reduction applied to all readings that share a bucket
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Aggregation {
    #[serde(alias = "add")]
    Sum,
    #[serde(alias = "mean", alias = "avg")]
    Average,
}

impl Aggregation {
    pub fn as_str(&self) -> &str {
        match self {
            Aggregation::Sum => "sum",
            Aggregation::Average => "average",
        }
    }

    /// Reduce a non-empty group of values
    pub fn apply(&self, values: &[f64]) -> f64 {
        let total: f64 = values.iter().sum();
        match self {
            Aggregation::Sum => total,
            Aggregation::Average => total / values.len() as f64,
        }
    }
}

impl FromStr for Aggregation {
    type Err = GridError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "sum" | "add" => Ok(Aggregation::Sum),
            "average" | "mean" | "avg" => Ok(Aggregation::Average),
            "min" | "max" | "median" | "first" | "last" => Err(GridError::UnsupportedOperation(
                format!("aggregation '{}' is not implemented", s),
            )),
            _ => Err(GridError::InvalidArgument(format!(
                "unrecognized aggregation '{}'",
                s
            ))),
        }
    }
}

impl fmt::Display for Aggregation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Strategy used to collect the values stored at a timestamp
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SearchStrategy {
    Linear,
    Binary,
}

impl SearchStrategy {
    pub fn as_str(&self) -> &str {
        match self {
            SearchStrategy::Linear => "linear",
            SearchStrategy::Binary => "binary",
        }
    }
}

impl FromStr for SearchStrategy {
    type Err = GridError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "linear" => Ok(SearchStrategy::Linear),
            "binary" => Ok(SearchStrategy::Binary),
            _ => Err(GridError::InvalidArgument(format!(
                "unrecognized search strategy '{}'",
                s
            ))),
        }
    }
}

impl fmt::Display for SearchStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Log output format for the binaries
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    Text,
    Json,
}

/// Configuration for a pipeline run
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    // Resampling
    pub resolutions: Vec<u32>,
    pub strategy: SearchStrategy,
    pub default_aggregation: Aggregation,

    // Source classification (substring match on the source path)
    pub highlow_markers: Vec<String>,
    pub sum_markers: Vec<String>,

    // Output
    pub trailing_separator: bool,

    // Diagnostics
    pub verbose: bool,
    pub log_level: String,
    pub log_format: LogFormat,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            resolutions: vec![5, 15],
            strategy: SearchStrategy::Linear,
            default_aggregation: Aggregation::Average,
            highlow_markers: vec!["cgm".to_string()],
            sum_markers: vec![
                "activity".to_string(),
                "bolus".to_string(),
                "meal".to_string(),
            ],
            trailing_separator: true,
            verbose: false,
            log_level: "info".to_string(),
            log_format: LogFormat::Text,
        }
    }
}

impl Config {
    /// Whether high/low textual readings should be mapped for this source
    pub fn uses_highlow(&self, source: &str) -> bool {
        self.highlow_markers.iter().any(|m| source.contains(m.as_str()))
    }

    /// Aggregation to apply to a source
    pub fn aggregation_for(&self, source: &str) -> Aggregation {
        if self.sum_markers.iter().any(|m| source.contains(m.as_str())) {
            Aggregation::Sum
        } else {
            self.default_aggregation
        }
    }
}
