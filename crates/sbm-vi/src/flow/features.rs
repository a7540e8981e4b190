//! Per-step conditioning features for the flow layers.

use candle_core::{Device, Tensor};
use sbm_core::{ForcingSeries, ObservationSet, Result, SbmError, TimeGrid};

/// Builds the `[n, C]` feature matrix, `C = 1 + 3 + D`:
///
/// - normalized time `t / T`
/// - temperature and both litter inputs, standardized
/// - observed value of each state interpolated onto the grid, divided by the
///   initial-state mean, minus one (zero for states never observed)
///
/// # Errors
///
/// Returns [`SbmError::Data`] if `x0_mean` and `state_names` differ in length.
pub fn conditioning_features(
    grid: &TimeGrid,
    forcing: &ForcingSeries,
    obs: &ObservationSet,
    state_names: &[&str],
    x0_mean: &[f64],
    device: &Device,
) -> Result<Tensor> {
    if state_names.len() != x0_mean.len() {
        return Err(SbmError::data(format!(
            "conditioning features: {} states but initial mean has {} entries",
            state_names.len(),
            x0_mean.len()
        )));
    }
    let n = grid.len();
    let mut columns: Vec<Vec<f64>> = Vec::with_capacity(4 + state_names.len());
    columns.push(grid.times().iter().map(|t| t / grid.t_end()).collect());
    for series in forcing.series() {
        columns.push(standardize(series));
    }
    for (name, mean) in state_names.iter().zip(x0_mean) {
        let column = match obs.interpolate(name, n) {
            Some(values) => values.iter().map(|v| v / mean - 1.0).collect(),
            None => vec![0.0; n],
        };
        columns.push(column);
    }

    let c = columns.len();
    let data: Vec<f64> = (0..n)
        .flat_map(|t| columns.iter().map(move |col| col[t]))
        .collect();
    Tensor::from_vec(data, (n, c), device).map_err(|e| SbmError::Backend {
        message: format!("conditioning_features: {e}"),
    })
}

fn standardize(values: &[f64]) -> Vec<f64> {
    let n = values.len().max(1) as f64;
    let mean = values.iter().sum::<f64>() / n;
    let var = values.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / n;
    let std = if var > 0.0 { var.sqrt() } else { 1.0 };
    values.iter().map(|v| (v - mean) / std).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn feature_layout() {
        let grid = TimeGrid::new(4.0, 1.0).unwrap();
        let forcing = ForcingSeries::new(
            &grid,
            vec![280.0, 282.0, 284.0, 286.0, 288.0],
            vec![0.001; 5],
            vec![0.0001; 5],
        )
        .unwrap();
        let obs = ObservationSet::from_rows(
            &grid,
            vec!["SOC".to_string()],
            vec![(0.0, vec![Some(40.0)]), (4.0, vec![Some(60.0)])],
        )
        .unwrap();
        let f = conditioning_features(&grid, &forcing, &obs, &["SOC", "DOC"], &[50.0, 0.1], &Device::Cpu)
            .unwrap();
        assert_eq!(f.dims(), &[5, 6]);
        let rows = f.to_vec2::<f64>().unwrap();
        assert_relative_eq!(rows[4][0], 1.0);
        assert_relative_eq!(rows[2][1], 0.0, epsilon = 1e-12);
        assert_eq!(rows[0][2], 0.0);
        assert_relative_eq!(rows[0][4], -0.2, epsilon = 1e-12);
        assert_relative_eq!(rows[2][4], 0.0, epsilon = 1e-12);
        assert_eq!(rows[3][5], 0.0);
    }
}
