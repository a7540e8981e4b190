//! Exogenous forcing series aligned with the time grid.
//!
//! Generating these series is the caller's job; this module only validates
//! and holds them read-only for the length of a run.

use crate::error::{Result, SbmError};
use crate::grid::TimeGrid;

/// Temperature and litter-input series, one value per grid point.
///
/// # Example
///
/// ```
/// use sbm_core::{ForcingSeries, TimeGrid};
///
/// let grid = TimeGrid::new(2.0, 1.0).unwrap();
/// let forcing = ForcingSeries::new(
///     &grid,
///     vec![283.0, 284.0, 285.0],
///     vec![1e-3; 3],
///     vec![1e-4; 3],
/// ).unwrap();
/// assert_eq!(forcing.len(), 3);
/// ```
#[derive(Debug, Clone, PartialEq)]
pub struct ForcingSeries {
    temperature: Vec<f64>,
    litter_soc: Vec<f64>,
    litter_doc: Vec<f64>,
}

impl ForcingSeries {
    /// Validates the three series against `grid`.
    ///
    /// # Errors
    ///
    /// Returns [`SbmError::Data`] if a series has the wrong length or holds a
    /// non-finite value, or if any temperature is not strictly positive
    /// (temperatures are in Kelvin).
    pub fn new(
        grid: &TimeGrid,
        temperature: Vec<f64>,
        litter_soc: Vec<f64>,
        litter_doc: Vec<f64>,
    ) -> Result<Self> {
        for (name, series) in [
            ("temperature", &temperature),
            ("litter_soc", &litter_soc),
            ("litter_doc", &litter_doc),
        ] {
            if series.len() != grid.len() {
                return Err(SbmError::data(format!(
                    "forcing series '{name}' has {} values, time grid has {} points",
                    series.len(),
                    grid.len()
                )));
            }
            if let Some(pos) = series.iter().position(|v| !v.is_finite()) {
                return Err(SbmError::data(format!(
                    "forcing series '{name}' has a non-finite value at index {pos}"
                )));
            }
        }
        if let Some(pos) = temperature.iter().position(|&t| t <= 0.0) {
            return Err(SbmError::data(format!(
                "temperature must be in Kelvin and positive, got {} at index {pos}",
                temperature[pos]
            )));
        }
        Ok(Self {
            temperature,
            litter_soc,
            litter_doc,
        })
    }

    pub fn len(&self) -> usize {
        self.temperature.len()
    }

    pub fn is_empty(&self) -> bool {
        self.temperature.is_empty()
    }

    /// Temperature series in Kelvin.
    pub fn temperature(&self) -> &[f64] {
        &self.temperature
    }

    /// Litter input into the soil organic carbon pool.
    pub fn litter_soc(&self) -> &[f64] {
        &self.litter_soc
    }

    /// Litter input into the dissolved organic carbon pool.
    pub fn litter_doc(&self) -> &[f64] {
        &self.litter_doc
    }

    /// The three series in a fixed order, for feature building.
    pub fn series(&self) -> [&[f64]; 3] {
        [&self.temperature, &self.litter_soc, &self.litter_doc]
    }
}
