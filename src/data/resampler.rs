/// Bucketing of irregular readings onto a fixed-resolution grid
use std::collections::HashSet;

use chrono::{Duration, NaiveDateTime, Timelike};
use tracing::{debug, warn};

use crate::data::ReadingStore;
use crate::error::{GridError, Result};
use crate::types::{Aggregation, SearchStrategy};
use crate::utils::time::truncate_to_minute;

/// Round a timestamp to the nearest `resolution`-minute boundary within its hour.
///
/// Seconds are dropped first. Ties round down; rounding up may roll into the
/// next hour or day.
pub fn round_to_bucket(timestamp: NaiveDateTime, resolution: u32) -> NaiveDateTime {
    let timestamp = truncate_to_minute(timestamp);
    let m = timestamp.minute() % resolution;

    if 2 * m <= resolution {
        timestamp - Duration::minutes(m as i64)
    } else {
        timestamp + Duration::minutes((resolution - m) as i64)
    }
}

/// Whether every bucket produced at `resolution` is a multiple of it.
///
/// Only rounding up out of the hour's last partial block can leave the grid: it
/// lands on minute `(59 / r + 1) * r - 60` of the next hour, which is on the grid
/// exactly when `r` divides 60. That block rounds up when its largest remainder
/// `59 - r * (59 / r)` is more than half of `r`.
pub fn keeps_grid(resolution: u32) -> bool {
    if resolution == 0 {
        return false;
    }
    if 60 % resolution == 0 {
        return true;
    }
    let last_remainder = 59 - resolution * (59 / resolution);
    2 * last_remainder <= resolution
}

fn validate_resolution(resolution: u32) -> Result<()> {
    if resolution == 0 {
        return Err(GridError::InvalidArgument(
            "resolution must be at least one minute".to_string(),
        ));
    }
    if !keeps_grid(resolution) {
        return Err(GridError::InvalidArgument(format!(
            "resolution {} rounds past the hour onto an off-grid minute",
            resolution
        )));
    }
    Ok(())
}

/// Deduplicated `(bucket, aggregate)` pairs in first-occurrence order
#[derive(Debug, Clone, PartialEq)]
pub struct ResampledSeries {
    source: String,
    resolution: u32,
    aggregation: Aggregation,
    points: Vec<(NaiveDateTime, f64)>,
}

impl ResampledSeries {
    pub fn new(
        source: impl Into<String>,
        resolution: u32,
        aggregation: Aggregation,
        points: Vec<(NaiveDateTime, f64)>,
    ) -> Self {
        ResampledSeries {
            source: source.into(),
            resolution,
            aggregation,
            points,
        }
    }

    pub fn source(&self) -> &str {
        &self.source
    }

    pub fn resolution(&self) -> u32 {
        self.resolution
    }

    pub fn aggregation(&self) -> Aggregation {
        self.aggregation
    }

    pub fn points(&self) -> &[(NaiveDateTime, f64)] {
        &self.points
    }

    pub fn len(&self) -> usize {
        self.points.len()
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, (NaiveDateTime, f64)> {
        self.points.iter()
    }

    pub fn is_chronological(&self) -> bool {
        self.points.windows(2).all(|w| w[0].0 <= w[1].0)
    }
}

impl<'a> IntoIterator for &'a ResampledSeries {
    type Item = &'a (NaiveDateTime, f64);
    type IntoIter = std::slice::Iter<'a, (NaiveDateTime, f64)>;

    fn into_iter(self) -> Self::IntoIter {
        self.points.iter()
    }
}

/// Resampler for one resolution, aggregation and lookup strategy
#[derive(Debug, Clone, Copy)]
pub struct Resampler {
    resolution: u32,
    aggregation: Aggregation,
    strategy: SearchStrategy,
}

impl Resampler {
    pub fn new(resolution: u32, aggregation: Aggregation, strategy: SearchStrategy) -> Result<Self> {
        validate_resolution(resolution)?;
        Ok(Resampler {
            resolution,
            aggregation,
            strategy,
        })
    }

    /// Build from textual aggregation and strategy names (`sum`/`average`, `linear`/`binary`)
    pub fn from_names(resolution: u32, aggregation: &str, strategy: &str) -> Result<Self> {
        Resampler::new(resolution, aggregation.parse()?, strategy.parse()?)
    }

    pub fn resolution(&self) -> u32 {
        self.resolution
    }

    pub fn aggregation(&self) -> Aggregation {
        self.aggregation
    }

    pub fn strategy(&self) -> SearchStrategy {
        self.strategy
    }

    /// Resample a private copy of `store`, leaving it untouched for later passes
    pub fn resample(&self, store: &ReadingStore) -> Result<ResampledSeries> {
        let mut target = store.clone();
        self.bucket_and_aggregate(&mut target)
    }

    /// Resample `store` itself; afterwards its sequences hold the deduplicated buckets
    pub fn resample_in_place(&self, store: &mut ReadingStore) -> Result<ResampledSeries> {
        let series = self.bucket_and_aggregate(store)?;
        let (timestamps, values) = series.points().iter().copied().unzip();
        store.replace_data(timestamps, values);
        Ok(series)
    }

    fn bucket_and_aggregate(&self, target: &mut ReadingStore) -> Result<ResampledSeries> {
        if self.strategy == SearchStrategy::Binary {
            target.sort_data();
        }

        // Rounding is monotonic, so a sorted target stays sorted
        let bucketed: Vec<NaiveDateTime> = target
            .timestamps()
            .iter()
            .map(|ts| round_to_bucket(*ts, self.resolution))
            .collect();
        target.replace_timestamps(bucketed);

        let mut seen = HashSet::new();
        let mut points = Vec::new();

        for bucket in target.timestamps() {
            if !seen.insert(*bucket) {
                continue;
            }

            let Some(values) = target.search_value(bucket, self.strategy)? else {
                warn!("{}: bucket {} vanished during lookup", target.source(), bucket);
                continue;
            };

            points.push((*bucket, self.aggregation.apply(&values)));
        }

        debug!(
            "Resampled {} at {}m ({}, {}): {} readings -> {} buckets",
            target.source(),
            self.resolution,
            self.aggregation,
            self.strategy,
            target.len(),
            points.len()
        );

        Ok(ResampledSeries::new(
            target.source(),
            self.resolution,
            self.aggregation,
            points,
        ))
    }
}
