/// Left join of resampled series on a reference series' buckets
use std::collections::HashMap;
use std::io::Write;
use std::path::Path;

use chrono::NaiveDateTime;
use tracing::{debug, info};

use crate::data::ResampledSeries;
use crate::error::{GridError, Result};
use crate::utils::time::{format_timestamp, format_value};

const TIME_COLUMN: &str = "time";
const MISSING_CELL: &str = "0";

/// Column name for a source label: final path component, up to the first underscore
pub fn derive_name(label: &str) -> &str {
    let file_name = label.rsplit(|c: char| c == '/' || c == '\\').next().unwrap_or(label);
    file_name.split('_').next().unwrap_or(file_name)
}

/// Index of the first label containing `key`
pub fn find_reference<S: AsRef<str>>(labels: &[S], key: &str) -> Result<usize> {
    if key.is_empty() {
        return Err(GridError::InvalidArgument("alignment key is empty".to_string()));
    }

    labels
        .iter()
        .position(|label| label.as_ref().contains(key))
        .ok_or_else(|| {
            GridError::ResourceNotFound(format!("no source label matches key '{}'", key))
        })
}

/// One output row: a reference bucket and one cell per series (reference first)
#[derive(Debug, Clone, PartialEq)]
pub struct AlignedRow {
    pub time: NaiveDateTime,
    pub cells: Vec<Option<f64>>,
}

/// Row-per-bucket table keyed on the reference series
#[derive(Debug, Clone, PartialEq)]
pub struct AlignedTable {
    columns: Vec<String>,
    rows: Vec<AlignedRow>,
    trailing_separator: bool,
}

impl AlignedTable {
    /// Series names in output order, reference first (excludes the time column)
    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    pub fn rows(&self) -> &[AlignedRow] {
        &self.rows
    }

    pub fn header(&self) -> Vec<&str> {
        std::iter::once(TIME_COLUMN)
            .chain(self.columns.iter().map(String::as_str))
            .collect()
    }

    pub fn write_to<W: Write>(&self, writer: W) -> Result<()> {
        let mut csv_writer = csv::WriterBuilder::new().from_writer(writer);

        let mut header: Vec<String> = self.header().into_iter().map(str::to_string).collect();
        if self.trailing_separator {
            header.push(String::new());
        }
        csv_writer.write_record(&header)?;

        for row in &self.rows {
            let mut record = Vec::with_capacity(row.cells.len() + 2);
            record.push(format_timestamp(&row.time));
            for cell in &row.cells {
                record.push(match cell {
                    Some(value) => format_value(*value),
                    None => MISSING_CELL.to_string(),
                });
            }
            if self.trailing_separator {
                record.push(String::new());
            }
            csv_writer.write_record(&record)?;
        }

        csv_writer.flush()?;
        Ok(())
    }

    pub fn write_csv<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let file = std::fs::File::create(path.as_ref())?;
        self.write_to(file)?;

        debug!(
            "Wrote {} rows x {} series to {}",
            self.rows.len(),
            self.columns.len(),
            path.as_ref().display()
        );
        Ok(())
    }
}

/// Joins resampled series on the buckets of the series whose label matches a key
#[derive(Debug, Clone, Copy)]
pub struct Aligner {
    trailing_separator: bool,
}

impl Aligner {
    pub fn new(trailing_separator: bool) -> Self {
        Aligner { trailing_separator }
    }

    pub fn align<S: AsRef<str>>(
        &self,
        series: &[ResampledSeries],
        labels: &[S],
        key: &str,
    ) -> Result<AlignedTable> {
        if series.is_empty() {
            return Err(GridError::InvalidArgument("no series to align".to_string()));
        }
        if series.len() != labels.len() {
            return Err(GridError::InvalidArgument(format!(
                "{} series but {} labels",
                series.len(),
                labels.len()
            )));
        }

        let reference = find_reference(labels, key)?;

        let others: Vec<usize> = (0..series.len()).filter(|&i| i != reference).collect();

        let mut columns = Vec::with_capacity(series.len());
        columns.push(derive_name(labels[reference].as_ref()).to_string());
        columns.extend(others.iter().map(|&i| derive_name(labels[i].as_ref()).to_string()));

        // Buckets are unique within a series, so a map gives the same match as a scan
        let lookups: Vec<HashMap<NaiveDateTime, f64>> = others
            .iter()
            .map(|&i| series[i].iter().copied().collect())
            .collect();

        let rows: Vec<AlignedRow> = series[reference]
            .iter()
            .map(|(time, value)| {
                let mut cells = Vec::with_capacity(series.len());
                cells.push(Some(*value));
                cells.extend(lookups.iter().map(|lookup| lookup.get(time).copied()));
                AlignedRow { time: *time, cells }
            })
            .collect();

        debug!(
            "Aligned {} series on {} ({} rows)",
            series.len(),
            labels[reference].as_ref(),
            rows.len()
        );

        Ok(AlignedTable {
            columns,
            rows,
            trailing_separator: self.trailing_separator,
        })
    }

    /// Align and write the table; nothing is written if alignment fails
    pub fn align_to_file<S: AsRef<str>, P: AsRef<Path>>(
        &self,
        series: &[ResampledSeries],
        labels: &[S],
        output: P,
        key: &str,
    ) -> Result<AlignedTable> {
        let table = self.align(series, labels, key)?;
        table.write_csv(output.as_ref())?;

        info!(
            "Wrote aligned table {} ({} rows)",
            output.as_ref().display(),
            table.rows().len()
        );
        Ok(table)
    }
}
