//! Simulation result extraction
//!
//! The simulator writes one CSV result file per model. The first column is
//! `time`; every other column holds one variable. A column that only has
//! values in the first and the last row is a parameter and yields a
//! two-point series.

use crate::error::{Error, Result};
use crate::interpolate::{resample, time_grid};
use crate::reporter::Reporter;
use std::collections::HashMap;
use std::path::{Path, PathBuf};

/// Default number of grid points per series
pub const DEFAULT_POINTS: usize = 101;

/// A source of `(time, values)` pairs keyed by variable name
pub trait ResultReader {
    /// Time stamps and values of `variable`
    ///
    /// # Errors
    ///
    /// Returns [`Error::MissingVariable`] if the variable is not stored.
    fn values(&self, variable: &str) -> Result<(Vec<f64>, Vec<f64>)>;
}

/// Result file in CSV format
#[derive(Debug, Clone)]
pub struct CsvResults {
    path: PathBuf,
    offsets: HashMap<String, usize>,
    time_column: usize,
    rows: Vec<Vec<Option<f64>>>,
}

impl CsvResults {
    /// Load a CSV result file
    ///
    /// # Errors
    ///
    /// Returns [`Error::Csv`] if the file cannot be read and [`Error::Parse`]
    /// if it has no `time` column or a non-numeric cell.
    pub fn load(path: &Path) -> Result<Self> {
        let mut rdr = csv::ReaderBuilder::new().flexible(true).from_path(path)?;

        let offsets: HashMap<String, usize> = rdr
            .headers()?
            .iter()
            .enumerate()
            .map(|(i, name)| (normalize_name(name), i))
            .collect();
        let time_column = *offsets
            .get("time")
            .or_else(|| offsets.get("Time"))
            .ok_or_else(|| Error::parse(path, "no time column"))?;

        let mut rows = Vec::new();
        for (line, record) in rdr.records().enumerate() {
            let record = record?;
            let mut row = Vec::with_capacity(record.len());
            for field in &record {
                let field = field.trim();
                if field.is_empty() {
                    row.push(None);
                } else {
                    let n: f64 = field.parse().map_err(|_| {
                        Error::parse(path, format!("row {}: '{field}' is not a number", line + 2))
                    })?;
                    row.push(Some(n));
                }
            }
            rows.push(row);
        }

        Ok(Self {
            path: path.to_path_buf(),
            offsets,
            time_column,
            rows,
        })
    }

    /// Number of data rows
    #[must_use]
    pub fn len(&self) -> usize {
        self.rows.len()
    }

    /// True if the file has no data rows
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }
}

impl ResultReader for CsvResults {
    fn values(&self, variable: &str) -> Result<(Vec<f64>, Vec<f64>)> {
        let column = *self
            .offsets
            .get(&normalize_name(variable))
            .ok_or_else(|| Error::MissingVariable {
                path: self.path.clone(),
                variable: variable.to_string(),
            })?;

        let mut time = Vec::new();
        let mut values = Vec::new();
        for row in &self.rows {
            let t = row.get(self.time_column).copied().flatten();
            let v = row.get(column).copied().flatten();
            if let (Some(t), Some(v)) = (t, v) {
                time.push(t);
                values.push(v);
            }
        }
        Ok((time, values))
    }
}

/// Collapse whitespace after commas so `a[1,1]` and `a[1,  1]` both match `a[1, 1]`
fn normalize_name(name: &str) -> String {
    let mut out = String::with_capacity(name.len() + 2);
    let mut chars = name.trim().chars().peekable();
    while let Some(c) = chars.next() {
        out.push(c);
        if c == ',' {
            while chars.peek().is_some_and(|c| c.is_whitespace()) {
                chars.next();
            }
            out.push(' ');
        }
    }
    out
}

/// Results of one plot group, resampled for storage
///
/// `time` holds `[t_min, t_max]` of the group; every series has either two
/// points (a parameter) or one point per grid step.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct SeriesBundle {
    /// First and last time stamp of the group
    pub time: Vec<f64>,
    /// Variable name and values, in plot order
    pub series: Vec<(String, Vec<f64>)>,
}

impl SeriesBundle {
    /// Values of `variable` in this group
    #[must_use]
    pub fn get(&self, variable: &str) -> Option<&[f64]> {
        self.series
            .iter()
            .find_map(|(name, values)| (name == variable).then_some(values.as_slice()))
    }

    /// True if the group holds no variables
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.series.is_empty()
    }
}

/// True if `values` is the two-point series of a parameter
#[must_use]
pub fn is_parameter(values: &[f64]) -> bool {
    values.len() == 2
}

/// Extract every plot group from `reader`, resampled onto at most `n_points`
///
/// Missing variables are reported as warnings and skipped. Groups without any
/// readable variable are omitted.
///
/// # Errors
///
/// Returns [`Error::Interpolation`] if a series cannot be resampled.
pub fn extract_bundles(
    reader: &dyn ResultReader,
    groups: &[Vec<String>],
    n_points: usize,
    script: &str,
    reporter: &Reporter,
) -> Result<Vec<SeriesBundle>> {
    let mut bundles = Vec::with_capacity(groups.len());
    for group in groups {
        let mut bundle = SeriesBundle::default();
        for variable in group {
            let (time, values) = match reader.values(variable) {
                Ok(pair) => pair,
                Err(Error::MissingVariable { path, .. }) => {
                    reporter.warning(format!(
                        "{script} uses {variable} which does not exist in {}.",
                        path.display()
                    ));
                    continue;
                }
                Err(e) => return Err(e),
            };
            if values.len() < 2 {
                reporter.warning(format!(
                    "{script}: {variable} has {} data points, at least two are required.",
                    values.len()
                ));
                break;
            }
            let t_min = time.iter().copied().fold(f64::INFINITY, f64::min);
            let t_max = time.iter().copied().fold(f64::NEG_INFINITY, f64::max);
            if bundle.time.is_empty() {
                bundle.time = vec![t_min, t_max];
            }

            let stored = if is_parameter(&values) {
                values
            } else {
                let grid = time_grid(t_min, t_max, n_points.min(values.len()));
                resample(&grid, &time, &values).map_err(|e| {
                    Error::Interpolation(format!("{variable} generated by {script}: {e}"))
                })?
            };
            bundle.series.push((variable.clone(), stored));
        }
        if !bundle.is_empty() {
            bundles.push(bundle);
        }
    }
    Ok(bundles)
}
