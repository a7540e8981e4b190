//! Fixed-step time grid shared by every component of a run.

use serde::{Deserialize, Serialize};

use crate::error::{Result, SbmError};

/// Tolerance used when checking that `t_end / dt` is a whole number and
/// when snapping observation times onto the grid.
pub const GRID_TOLERANCE: f64 = 1e-6;

/// An ordered, fixed-step sequence of `n` time points spanning `[0, t_end]`.
///
/// # Example
///
/// ```
/// use sbm_core::TimeGrid;
///
/// let grid = TimeGrid::new(1000.0, 1.0).unwrap();
/// assert_eq!(grid.len(), 1001);
/// assert_eq!(grid.time_at(10), 10.0);
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TimeGrid {
    t_end: f64,
    dt: f64,
    n: usize,
}

impl TimeGrid {
    /// Creates a grid over `[0, t_end]` with step `dt`.
    ///
    /// # Errors
    ///
    /// Returns [`SbmError::Config`] if either value is non-positive or
    /// non-finite, or if `t_end` is not a whole multiple of `dt`.
    pub fn new(t_end: f64, dt: f64) -> Result<Self> {
        if !t_end.is_finite() || t_end <= 0.0 {
            return Err(SbmError::config(format!(
                "time horizon must be positive and finite, got {t_end}"
            )));
        }
        if !dt.is_finite() || dt <= 0.0 {
            return Err(SbmError::config(format!(
                "step size must be positive and finite, got {dt}"
            )));
        }
        let steps = t_end / dt;
        let rounded = steps.round();
        if (steps - rounded).abs() > GRID_TOLERANCE * steps.max(1.0) {
            return Err(SbmError::config(format!(
                "time horizon {t_end} is not a multiple of step size {dt}"
            )));
        }
        Ok(Self {
            t_end,
            dt,
            n: rounded as usize + 1,
        })
    }

    /// Number of grid points.
    pub fn len(&self) -> usize {
        self.n
    }

    /// A grid always holds at least two points.
    pub fn is_empty(&self) -> bool {
        false
    }

    pub fn dt(&self) -> f64 {
        self.dt
    }

    pub fn t_end(&self) -> f64 {
        self.t_end
    }

    /// Time of grid point `index`.
    pub fn time_at(&self, index: usize) -> f64 {
        index as f64 * self.dt
    }

    /// All grid times in order.
    pub fn times(&self) -> Vec<f64> {
        (0..self.n).map(|i| self.time_at(i)).collect()
    }

    /// Maps a time onto its grid index, if it lies on the grid.
    ///
    /// # Example
    ///
    /// ```
    /// use sbm_core::TimeGrid;
    ///
    /// let grid = TimeGrid::new(10.0, 0.5).unwrap();
    /// assert_eq!(grid.index_of(2.5), Some(5));
    /// assert_eq!(grid.index_of(2.7), None);
    /// assert_eq!(grid.index_of(11.0), None);
    /// ```
    pub fn index_of(&self, time: f64) -> Option<usize> {
        if !time.is_finite() || time < -GRID_TOLERANCE {
            return None;
        }
        let pos = time / self.dt;
        let idx = pos.round();
        if (pos - idx).abs() > 1e-3 || idx as usize >= self.n {
            return None;
        }
        Some(idx as usize)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn point_count_includes_both_ends() {
        let grid = TimeGrid::new(5.0, 0.1).unwrap();
        assert_eq!(grid.len(), 51);
        assert!((grid.times()[50] - 5.0).abs() < 1e-9);
    }

    #[test]
    fn rejects_non_multiple_horizon() {
        assert!(matches!(
            TimeGrid::new(10.0, 3.0),
            Err(SbmError::Config { .. })
        ));
    }

    #[test]
    fn rejects_non_positive_values() {
        assert!(TimeGrid::new(0.0, 1.0).is_err());
        assert!(TimeGrid::new(10.0, -1.0).is_err());
        assert!(TimeGrid::new(f64::NAN, 1.0).is_err());
    }

    #[test]
    fn index_of_snaps_to_grid() {
        let grid = TimeGrid::new(100.0, 1.0).unwrap();
        assert_eq!(grid.index_of(0.0), Some(0));
        assert_eq!(grid.index_of(100.0), Some(100));
        assert_eq!(grid.index_of(50.0000001), Some(50));
        assert_eq!(grid.index_of(-1.0), None);
    }
}
