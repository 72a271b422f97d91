/// In-memory store of one source's readings with linear and binary lookup
use std::fs::File;
use std::path::Path;

use chrono::NaiveDateTime;
use tracing::{debug, warn};

use crate::error::{GridError, Result};
use crate::types::{Reading, SearchStrategy};
use crate::utils::time::parse_timestamp;

/// Value substituted for a textual "high" reading
pub const HIGH_VALUE: f64 = 300.0;
/// Value substituted for a textual "low" reading
pub const LOW_VALUE: f64 = 40.0;

const TIME_FIELD: &str = "time";
const VALUE_FIELD: &str = "value";

/// Parallel timestamp/value sequences for a single source.
///
/// `timestamps.len() == values.len()` always holds. The `sorted` flag records
/// whether the timestamps are known to be in ascending order, which binary
/// lookup requires.
#[derive(Debug, Clone)]
pub struct ReadingStore {
    source: String,
    timestamps: Vec<NaiveDateTime>,
    values: Vec<f64>,
    sorted: bool,
    verbose: bool,
}

impl ReadingStore {
    fn empty(source: String, verbose: bool) -> Self {
        ReadingStore {
            source,
            timestamps: Vec::new(),
            values: Vec::new(),
            sorted: false,
            verbose,
        }
    }

    /// Build a store from readings already in memory, kept in the given order
    pub fn from_readings<S, I>(source: S, readings: I) -> Self
    where
        S: Into<String>,
        I: IntoIterator<Item = Reading>,
    {
        let mut store = ReadingStore::empty(source.into(), false);
        for reading in readings {
            store.push(reading.timestamp, reading.value);
        }
        store
    }

    /// Parse a CSV source with `time` and `value` columns.
    ///
    /// Rows with an empty time or value are skipped silently; rows whose time
    /// or value does not parse are skipped and reported when `verbose` is set.
    /// With `highlow`, the literal values `high` and `low` map to
    /// [`HIGH_VALUE`] and [`LOW_VALUE`].
    pub fn from_csv<P: AsRef<Path>>(path: P, highlow: bool, verbose: bool) -> Result<Self> {
        let path = path.as_ref();
        let source = path.to_string_lossy().into_owned();

        if source.trim().is_empty() {
            return Err(GridError::InvalidArgument(
                "source path is empty".to_string(),
            ));
        }
        if !path.is_file() {
            return Err(GridError::ResourceNotFound(format!(
                "{} is not a valid file",
                source
            )));
        }

        let file = File::open(path)?;
        let mut reader = csv::ReaderBuilder::new()
            .flexible(true)
            .trim(csv::Trim::All)
            .from_reader(file);

        let headers = reader.headers()?.clone();
        let time_idx = headers.iter().position(|h| h == TIME_FIELD);
        let value_idx = headers.iter().position(|h| h == VALUE_FIELD);

        let (time_idx, value_idx) = match (time_idx, value_idx) {
            (Some(t), Some(v)) => (t, v),
            _ => {
                return Err(GridError::MalformedInput(format!(
                    "{} lacks required '{}' and '{}' columns",
                    source, TIME_FIELD, VALUE_FIELD
                )))
            }
        };

        let mut store = ReadingStore::empty(source, verbose);
        let mut skipped = 0usize;

        for record in reader.byte_records() {
            let record = record?;
            let line = record.position().map(|p| p.line()).unwrap_or(0);

            let raw_time = record.get(time_idx).unwrap_or_default();
            let raw_value = record.get(value_idx).unwrap_or_default();

            if raw_time.is_empty() || raw_value.is_empty() {
                skipped += 1;
                continue;
            }

            let (Ok(raw_time), Ok(raw_value)) =
                (std::str::from_utf8(raw_time), std::str::from_utf8(raw_value))
            else {
                if verbose {
                    warn!("{}:{} row is not valid UTF-8", store.source, line);
                }
                skipped += 1;
                continue;
            };

            let Some(timestamp) = parse_timestamp(raw_time) else {
                if verbose {
                    warn!(
                        "{}:{} bad input format for time: {:?}",
                        store.source, line, raw_time
                    );
                }
                skipped += 1;
                continue;
            };

            let value = match store.parse_value(raw_value, highlow) {
                Some(value) => value,
                None => {
                    if verbose {
                        warn!(
                            "{}:{} bad input format for value: {:?}",
                            store.source, line, raw_value
                        );
                    }
                    skipped += 1;
                    continue;
                }
            };

            store.push(timestamp, value);
        }

        debug!(
            "Loaded {} readings from {} ({} rows skipped)",
            store.len(),
            store.source,
            skipped
        );

        Ok(store)
    }

    fn parse_value(&self, raw: &str, highlow: bool) -> Option<f64> {
        if highlow {
            if raw == "high" {
                debug!("{}: mapping 'high' to {}", self.source, HIGH_VALUE);
                return Some(HIGH_VALUE);
            }
            if raw == "low" {
                debug!("{}: mapping 'low' to {}", self.source, LOW_VALUE);
                return Some(LOW_VALUE);
            }
        }
        raw.parse::<f64>().ok()
    }

    fn push(&mut self, timestamp: NaiveDateTime, value: f64) {
        self.timestamps.push(timestamp);
        self.values.push(value);
        self.sorted = false;
    }

    pub fn source(&self) -> &str {
        &self.source
    }

    pub fn len(&self) -> usize {
        self.timestamps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.timestamps.is_empty()
    }

    pub fn is_sorted(&self) -> bool {
        self.sorted
    }

    pub fn timestamps(&self) -> &[NaiveDateTime] {
        &self.timestamps
    }

    pub fn values(&self) -> &[f64] {
        &self.values
    }

    pub fn readings(&self) -> impl Iterator<Item = Reading> + '_ {
        self.timestamps
            .iter()
            .zip(&self.values)
            .map(|(ts, v)| Reading::new(*ts, *v))
    }

    /// Stable sort of both sequences by timestamp
    pub fn sort_data(&mut self) {
        if !self.sorted {
            let mut pairs: Vec<(NaiveDateTime, f64)> = std::mem::take(&mut self.timestamps)
                .into_iter()
                .zip(std::mem::take(&mut self.values))
                .collect();
            pairs.sort_by_key(|(ts, _)| *ts);
            (self.timestamps, self.values) = pairs.into_iter().unzip();
        }
        self.sorted = true;
    }

    /// Replace every timestamp, keeping values in place. `timestamps` must be
    /// as long as the store; order is assumed to follow the old timestamps'.
    pub(crate) fn replace_timestamps(&mut self, timestamps: Vec<NaiveDateTime>) {
        debug_assert_eq!(timestamps.len(), self.values.len());
        self.timestamps = timestamps;
    }

    /// Swap in a new pair of sequences
    pub(crate) fn replace_data(&mut self, timestamps: Vec<NaiveDateTime>, values: Vec<f64>) {
        debug_assert_eq!(timestamps.len(), values.len());
        self.sorted = timestamps.windows(2).all(|w| w[0] <= w[1]);
        self.timestamps = timestamps;
        self.values = values;
    }

    /// Every value recorded at exactly `key`, scanning the whole store
    pub fn linear_search_value(&self, key: &NaiveDateTime) -> Option<Vec<f64>> {
        let found: Vec<f64> = self
            .timestamps
            .iter()
            .zip(&self.values)
            .filter(|(ts, _)| *ts == key)
            .map(|(_, v)| *v)
            .collect();

        self.non_empty(key, found)
    }

    /// Every value recorded at exactly `key`, found by bisection.
    ///
    /// Fails with `InvalidArgument` unless the store has been sorted.
    pub fn binary_search_value(&self, key: &NaiveDateTime) -> Result<Option<Vec<f64>>> {
        if !self.sorted {
            return Err(GridError::InvalidArgument(format!(
                "binary search on unsorted store {}",
                self.source
            )));
        }

        let Some(hit) = self.bisect(key) else {
            return Ok(self.non_empty(key, Vec::new()));
        };

        // Equal timestamps form one contiguous run around the hit
        let len = self.timestamps.len();
        let (mut first, mut last) = (hit, hit);
        let (mut left_exhausted, mut right_exhausted) = (false, false);

        while !(left_exhausted && right_exhausted) {
            if !left_exhausted {
                if first > 0 && self.timestamps[first - 1] == *key {
                    first -= 1;
                } else {
                    left_exhausted = true;
                }
            }
            if !right_exhausted {
                if last + 1 < len && self.timestamps[last + 1] == *key {
                    last += 1;
                } else {
                    right_exhausted = true;
                }
            }
        }

        Ok(Some(self.values[first..=last].to_vec()))
    }

    /// Index of any timestamp equal to `key`, searching the open window (lo, hi)
    fn bisect(&self, key: &NaiveDateTime) -> Option<usize> {
        let mut lo: isize = -1;
        let mut hi: isize = self.timestamps.len() as isize;

        while hi - lo > 1 {
            let mid = (lo + hi) / 2;
            match self.timestamps[mid as usize].cmp(key) {
                std::cmp::Ordering::Equal => return Some(mid as usize),
                std::cmp::Ordering::Less => lo = mid,
                std::cmp::Ordering::Greater => hi = mid,
            }
        }

        None
    }

    pub fn search_value(
        &self,
        key: &NaiveDateTime,
        strategy: SearchStrategy,
    ) -> Result<Option<Vec<f64>>> {
        match strategy {
            SearchStrategy::Linear => Ok(self.linear_search_value(key)),
            SearchStrategy::Binary => self.binary_search_value(key),
        }
    }

    fn non_empty(&self, key: &NaiveDateTime, found: Vec<f64>) -> Option<Vec<f64>> {
        if found.is_empty() {
            if self.verbose {
                warn!("{}: no readings at {}", self.source, key);
            } else {
                debug!("{}: no readings at {}", self.source, key);
            }
            None
        } else {
            Some(found)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;
    use tempfile::TempDir;

    fn dt(y: i32, mo: u32, d: u32, h: u32, mi: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(y, mo, d)
            .unwrap()
            .and_hms_opt(h, mi, 0)
            .unwrap()
    }

    fn write_csv(dir: &TempDir, name: &str, content: &str) -> std::path::PathBuf {
        let path = dir.path().join(name);
        std::fs::write(&path, content).unwrap();
        path
    }

    /// Deterministic pseudo-random readings with plenty of duplicate timestamps
    fn scrambled_store() -> ReadingStore {
        let mut seed: u64 = 0x2545_f491_4f6c_dd1d;
        let readings = (0..400).map(|i| {
            seed = seed.wrapping_mul(6364136223846793005).wrapping_add(1442695040888963407);
            let minute = (seed >> 33) % 90;
            let ts = dt(2018, 3, 16, 0, 0) + chrono::Duration::minutes(minute as i64);
            Reading::new(ts, i as f64)
        });
        ReadingStore::from_readings("scrambled", readings)
    }

    #[test]
    fn test_from_csv_empty_path() {
        assert!(matches!(
            ReadingStore::from_csv("", false, false),
            Err(GridError::InvalidArgument(_))
        ));
    }

    #[test]
    fn test_from_csv_missing_file() {
        assert!(matches!(
            ReadingStore::from_csv("not_a_file.txt", false, false),
            Err(GridError::ResourceNotFound(_))
        ));
    }

    #[test]
    fn test_from_csv_missing_columns() {
        let dir = TempDir::new().unwrap();
        let path = write_csv(&dir, "bad.csv", "id,stamp,reading\n1,3/16/18 0:20,10\n");

        assert!(matches!(
            ReadingStore::from_csv(&path, false, false),
            Err(GridError::MalformedInput(_))
        ));
    }

    #[test]
    fn test_from_csv_skips_empty_and_bad_rows() {
        let dir = TempDir::new().unwrap();
        let path = write_csv(
            &dir,
            "smbg_small.csv",
            "id,time,value\n\
             1,3/16/18 0:20,120\n\
             2,,130\n\
             3,3/16/18 0:30,\n\
             4,yesterday,140\n\
             5,3/16/18 0:40,abc\n\
             6,3/16/18 0:50,150\n",
        );

        let store = ReadingStore::from_csv(&path, false, true).unwrap();
        assert_eq!(store.len(), 2);
        assert_eq!(store.timestamps().len(), store.values().len());
        assert_eq!(store.values(), &[120.0, 150.0]);
        assert!(!store.is_sorted());
    }

    #[test]
    fn test_from_csv_skips_non_utf8_row() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("cgm_small.csv");
        let mut content = b"id,time,value\n1,3/16/18 0:20,120\n2,3/16/18 0:25,".to_vec();
        content.extend_from_slice(&[0xff, 0xfe]);
        content.extend_from_slice(b"\n3,3/16/18 0:30,150\n");
        std::fs::write(&path, content).unwrap();

        let store = ReadingStore::from_csv(&path, false, true).unwrap();
        assert_eq!(store.values(), &[120.0, 150.0]);
        assert_eq!(
            store.timestamps(),
            &[dt(2018, 3, 16, 0, 20), dt(2018, 3, 16, 0, 30)]
        );
    }

    #[test]
    fn test_from_csv_skips_bare_day_numbers() {
        let dir = TempDir::new().unwrap();
        let path = write_csv(&dir, "hr.csv", "time,value\n10,72\n3/16/18 0:20,75\n");

        let store = ReadingStore::from_csv(&path, false, false).unwrap();
        assert_eq!(store.values(), &[75.0]);
    }

    #[test]
    fn test_from_csv_highlow_mapping() {
        let dir = TempDir::new().unwrap();
        let content = "id,time,value\n\
                       1476,3/16/18 0:20,high,\n\
                       1477,3/16/18 0:21,low,\n\
                       1478,3/16/18 0:22,150,\n";
        let path = write_csv(&dir, "test_highlow.csv", content);

        let store = ReadingStore::from_csv(&path, true, false).unwrap();
        assert_eq!(store.linear_search_value(&dt(2018, 3, 16, 0, 20)), Some(vec![300.0]));
        assert_eq!(store.linear_search_value(&dt(2018, 3, 16, 0, 21)), Some(vec![40.0]));
        assert_eq!(store.linear_search_value(&dt(2018, 3, 16, 0, 22)), Some(vec![150.0]));

        // without the mapping the textual rows are dropped
        let plain = ReadingStore::from_csv(&path, false, false).unwrap();
        assert_eq!(plain.len(), 1);
    }

    #[test]
    fn test_linear_search_collects_duplicates() {
        let store = ReadingStore::from_readings(
            "bolus",
            vec![
                Reading::new(dt(2018, 3, 19, 18, 26), 0.7),
                Reading::new(dt(2018, 3, 19, 18, 30), 1.0),
                Reading::new(dt(2018, 3, 19, 18, 26), 0.3),
            ],
        );

        assert_eq!(
            store.linear_search_value(&dt(2018, 3, 19, 18, 26)),
            Some(vec![0.7, 0.3])
        );
        assert_eq!(store.linear_search_value(&dt(2018, 3, 19, 18, 27)), None);
    }

    #[test]
    fn test_binary_search_requires_sorted() {
        let mut store = scrambled_store();
        let key = store.timestamps()[0];

        assert!(matches!(
            store.binary_search_value(&key),
            Err(GridError::InvalidArgument(_))
        ));

        store.sort_data();
        assert!(store.binary_search_value(&key).unwrap().is_some());
    }

    #[test]
    fn test_sort_data_is_stable_and_keeps_pairs() {
        let mut store = ReadingStore::from_readings(
            "s",
            vec![
                Reading::new(dt(2018, 3, 16, 1, 0), 3.0),
                Reading::new(dt(2018, 3, 16, 0, 0), 1.0),
                Reading::new(dt(2018, 3, 16, 1, 0), 4.0),
                Reading::new(dt(2018, 3, 16, 0, 0), 2.0),
            ],
        );
        store.sort_data();

        assert!(store.is_sorted());
        assert_eq!(store.values(), &[1.0, 2.0, 3.0, 4.0]);
        assert_eq!(store.timestamps()[0], dt(2018, 3, 16, 0, 0));
        assert_eq!(store.timestamps()[3], dt(2018, 3, 16, 1, 0));
        assert_eq!(
            store.readings().next(),
            Some(Reading::new(dt(2018, 3, 16, 0, 0), 1.0))
        );
    }

    #[test]
    fn test_binary_matches_linear_for_every_key() {
        let unsorted = scrambled_store();
        let mut sorted = unsorted.clone();
        sorted.sort_data();

        // every present minute plus some absent keys around the edges
        for minute in -5..100i64 {
            let key = dt(2018, 3, 16, 0, 0) + chrono::Duration::minutes(minute);

            let mut linear = unsorted.linear_search_value(&key).unwrap_or_default();
            let mut binary = sorted.binary_search_value(&key).unwrap().unwrap_or_default();
            linear.sort_by(|a, b| a.partial_cmp(b).unwrap());
            binary.sort_by(|a, b| a.partial_cmp(b).unwrap());

            assert_eq!(linear, binary, "mismatch at {}", key);
        }
    }

    #[test]
    fn test_binary_search_run_at_boundaries() {
        let mut store = ReadingStore::from_readings(
            "edges",
            vec![
                Reading::new(dt(2018, 3, 16, 0, 0), 1.0),
                Reading::new(dt(2018, 3, 16, 0, 0), 2.0),
                Reading::new(dt(2018, 3, 16, 0, 5), 3.0),
                Reading::new(dt(2018, 3, 16, 0, 10), 4.0),
                Reading::new(dt(2018, 3, 16, 0, 10), 5.0),
                Reading::new(dt(2018, 3, 16, 0, 10), 6.0),
            ],
        );
        store.sort_data();

        assert_eq!(
            store.binary_search_value(&dt(2018, 3, 16, 0, 0)).unwrap(),
            Some(vec![1.0, 2.0])
        );
        assert_eq!(
            store.binary_search_value(&dt(2018, 3, 16, 0, 10)).unwrap(),
            Some(vec![4.0, 5.0, 6.0])
        );
        assert_eq!(store.binary_search_value(&dt(2018, 3, 16, 0, 7)).unwrap(), None);
    }

    #[test]
    fn test_binary_search_empty_store() {
        let mut store = ReadingStore::from_readings("empty", Vec::<Reading>::new());
        store.sort_data();

        assert!(store.is_empty());
        assert_eq!(store.binary_search_value(&dt(2018, 3, 16, 0, 0)).unwrap(), None);
    }
}
