//! Sparse, irregularly sampled observation table.
//!
//! The on-disk format is a CSV file with a time column and one column per
//! observed variable. Cells may be empty (or `NaN`) when a variable was not
//! measured at that time. Every time must lie on the run's [`TimeGrid`].

use std::collections::BTreeSet;
use std::io::Read;
use std::path::Path;

use tracing::debug;

use crate::error::{Result, SbmError};
use crate::grid::TimeGrid;

/// Default name of the time column.
pub const DEFAULT_TIME_COLUMN: &str = "hour";

/// Observed values keyed by grid index; immutable once loaded.
///
/// # Example
///
/// ```
/// use sbm_core::{ObservationSet, TimeGrid};
///
/// let grid = TimeGrid::new(10.0, 1.0).unwrap();
/// let csv = "hour,SOC,DOC\n0,50.0,0.1\n5,51.0,\n10,52.5,0.12\n";
/// let obs = ObservationSet::from_reader(csv.as_bytes(), &grid, "hour").unwrap();
/// assert_eq!(obs.len(), 3);
/// assert_eq!(obs.observed_count("DOC"), 2);
/// ```
#[derive(Debug, Clone, PartialEq)]
pub struct ObservationSet {
    columns: Vec<String>,
    indices: Vec<usize>,
    values: Vec<Vec<Option<f64>>>,
}

impl ObservationSet {
    /// Loads observations from a CSV file.
    ///
    /// # Errors
    ///
    /// Returns [`SbmError::Io`] if the file cannot be opened and
    /// [`SbmError::Data`] if its contents are malformed.
    pub fn from_csv_path<P: AsRef<Path>>(path: P, grid: &TimeGrid, time_column: &str) -> Result<Self> {
        let file = std::fs::File::open(path.as_ref())?;
        Self::from_reader(file, grid, time_column).map_err(|e| match e {
            SbmError::Data { message } => SbmError::data(format!(
                "{}: {message}",
                path.as_ref().display()
            )),
            other => other,
        })
    }

    /// Parses observations from any CSV reader.
    ///
    /// # Errors
    ///
    /// Returns [`SbmError::Data`] if the time column is missing, a cell is not
    /// a number, a time is off the grid, or a time appears twice.
    pub fn from_reader<R: Read>(reader: R, grid: &TimeGrid, time_column: &str) -> Result<Self> {
        let mut rdr = csv::ReaderBuilder::new()
            .has_headers(true)
            .trim(csv::Trim::All)
            .from_reader(reader);

        let headers = rdr
            .headers()
            .map_err(|e| SbmError::data(format!("cannot read CSV header: {e}")))?
            .clone();
        let time_pos = headers
            .iter()
            .position(|h| h == time_column)
            .ok_or_else(|| {
                SbmError::data(format!(
                    "missing time column '{time_column}' (header: {})",
                    headers.iter().collect::<Vec<_>>().join(",")
                ))
            })?;
        let columns: Vec<String> = headers
            .iter()
            .enumerate()
            .filter(|(i, _)| *i != time_pos)
            .map(|(_, h)| h.to_string())
            .collect();
        if columns.is_empty() {
            return Err(SbmError::data("observation file has no variable columns"));
        }

        let mut rows = Vec::new();
        for (line, record) in rdr.records().enumerate() {
            let record =
                record.map_err(|e| SbmError::data(format!("row {}: {e}", line + 1)))?;
            let time = parse_cell(record.get(time_pos).unwrap_or(""))
                .map_err(|e| SbmError::data(format!("row {}: time {e}", line + 1)))?
                .ok_or_else(|| SbmError::data(format!("row {}: empty time cell", line + 1)))?;
            let mut row = Vec::with_capacity(columns.len());
            for (i, cell) in record.iter().enumerate() {
                if i == time_pos {
                    continue;
                }
                let value = parse_cell(cell).map_err(|e| {
                    SbmError::data(format!("row {}: column '{}' {e}", line + 1, &headers[i]))
                })?;
                row.push(value);
            }
            rows.push((time, row));
        }

        Self::from_rows(grid, columns, rows)
    }

    /// Builds an observation set from in-memory rows of `(time, values)`.
    ///
    /// # Errors
    ///
    /// Returns [`SbmError::Data`] on off-grid or duplicate times, or rows
    /// whose width differs from `columns`.
    pub fn from_rows(
        grid: &TimeGrid,
        columns: Vec<String>,
        rows: Vec<(f64, Vec<Option<f64>>)>,
    ) -> Result<Self> {
        let mut seen = BTreeSet::new();
        let mut keyed = Vec::with_capacity(rows.len());
        for (time, row) in rows {
            if row.len() != columns.len() {
                return Err(SbmError::data(format!(
                    "row at time {time} has {} values, expected {}",
                    row.len(),
                    columns.len()
                )));
            }
            let index = grid.index_of(time).ok_or_else(|| {
                SbmError::data(format!(
                    "observation time {time} is not on the grid [0, {}] with step {}",
                    grid.t_end(),
                    grid.dt()
                ))
            })?;
            if !seen.insert(index) {
                return Err(SbmError::data(format!("duplicate observation time {time}")));
            }
            keyed.push((index, row));
        }
        keyed.sort_by_key(|(index, _)| *index);
        debug!(rows = keyed.len(), columns = ?columns, "loaded observations");
        let (indices, values) = keyed.into_iter().unzip();
        Ok(Self {
            columns,
            indices,
            values,
        })
    }

    /// Number of observation rows.
    pub fn len(&self) -> usize {
        self.indices.len()
    }

    pub fn is_empty(&self) -> bool {
        self.indices.is_empty()
    }

    /// Variable column names (the time column excluded).
    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    /// Grid index of every row, ascending.
    pub fn indices(&self) -> &[usize] {
        &self.indices
    }

    pub fn has_column(&self, name: &str) -> bool {
        self.columns.iter().any(|c| c == name)
    }

    /// Value at `row` for column `name`, if observed.
    pub fn value(&self, row: usize, name: &str) -> Option<f64> {
        let col = self.columns.iter().position(|c| c == name)?;
        self.values.get(row)?.get(col).copied().flatten()
    }

    /// Observed `(grid index, value)` pairs of one column.
    pub fn column_values(&self, name: &str) -> Vec<(usize, f64)> {
        let Some(col) = self.columns.iter().position(|c| c == name) else {
            return Vec::new();
        };
        self.indices
            .iter()
            .zip(&self.values)
            .filter_map(|(&idx, row)| row[col].map(|v| (idx, v)))
            .collect()
    }

    /// Number of observed cells in column `name`.
    pub fn observed_count(&self, name: &str) -> usize {
        self.column_values(name).len()
    }

    /// Mean absolute observed value of a column, if it has any observations.
    pub fn mean_abs(&self, name: &str) -> Option<f64> {
        let vals = self.column_values(name);
        if vals.is_empty() {
            return None;
        }
        Some(vals.iter().map(|(_, v)| v.abs()).sum::<f64>() / vals.len() as f64)
    }

    /// Linearly interpolates one column onto `n` grid points.
    ///
    /// Values before the first and after the last observation are held
    /// constant. Returns `None` if the column has no observations.
    ///
    /// # Example
    ///
    /// ```
    /// use sbm_core::{ObservationSet, TimeGrid};
    ///
    /// let grid = TimeGrid::new(4.0, 1.0).unwrap();
    /// let obs = ObservationSet::from_rows(
    ///     &grid,
    ///     vec!["SOC".into()],
    ///     vec![(1.0, vec![Some(2.0)]), (3.0, vec![Some(4.0)])],
    /// ).unwrap();
    /// assert_eq!(obs.interpolate("SOC", grid.len()).unwrap(), vec![2.0, 2.0, 3.0, 4.0, 4.0]);
    /// ```
    pub fn interpolate(&self, name: &str, n: usize) -> Option<Vec<f64>> {
        let points = self.column_values(name);
        let (&(first_idx, first_val), &(last_idx, last_val)) = (points.first()?, points.last()?);
        let mut out = Vec::with_capacity(n);
        let mut seg = 0usize;
        for i in 0..n {
            if i <= first_idx {
                out.push(first_val);
            } else if i >= last_idx {
                out.push(last_val);
            } else {
                while points[seg + 1].0 < i {
                    seg += 1;
                }
                let (i0, v0) = points[seg];
                let (i1, v1) = points[seg + 1];
                let w = (i - i0) as f64 / (i1 - i0) as f64;
                out.push(v0 + w * (v1 - v0));
            }
        }
        Some(out)
    }
}

fn parse_cell(cell: &str) -> std::result::Result<Option<f64>, String> {
    if cell.is_empty() || cell.eq_ignore_ascii_case("nan") || cell.eq_ignore_ascii_case("na") {
        return Ok(None);
    }
    let value: f64 = cell
        .parse()
        .map_err(|_| format!("'{cell}' is not a number"))?;
    if value.is_nan() {
        return Ok(None);
    }
    if !value.is_finite() {
        return Err(format!("'{cell}' is not finite"));
    }
    Ok(Some(value))
}
