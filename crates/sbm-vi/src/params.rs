//! Split of the parameter vector into inferred and pinned entries.

use std::collections::BTreeMap;

use candle_core::Tensor;
use sbm_core::{Result, SbmError};

/// Where column `i` of the assembled theta comes from.
#[derive(Debug, Clone, Copy, PartialEq)]
enum Column {
    Free(usize),
    Fixed(f64),
}

/// Maps free samples `[B, P_free]` to full parameter vectors `[B, P]`.
///
/// Pinned parameters appear as constant columns, so they carry no gradient
/// and never touch the prior or posterior.
///
/// # Example
///
/// ```
/// use std::collections::BTreeMap;
/// use sbm_vi::params::ParameterSpace;
///
/// let names: Vec<String> = ["u_M", "a_SD", "a_DS"].iter().map(|s| s.to_string()).collect();
/// let fixed = BTreeMap::from([("a_SD".to_string(), 0.33)]);
/// let space = ParameterSpace::new(&names, &fixed).unwrap();
/// assert_eq!(space.free_names(), &["u_M".to_string(), "a_DS".to_string()]);
/// ```
#[derive(Debug, Clone)]
pub struct ParameterSpace {
    names: Vec<String>,
    free_names: Vec<String>,
    columns: Vec<Column>,
}

impl ParameterSpace {
    /// # Errors
    ///
    /// Returns [`SbmError::Config`] if a fixed name is not a model parameter
    /// or every parameter is fixed.
    pub fn new(names: &[String], fixed: &BTreeMap<String, f64>) -> Result<Self> {
        if let Some(unknown) = fixed.keys().find(|k| !names.contains(k)) {
            return Err(SbmError::config(format!(
                "fixed parameter '{unknown}' is not a model parameter (known: {})",
                names.join(", ")
            )));
        }
        let mut free_names = Vec::new();
        let columns = names
            .iter()
            .map(|name| match fixed.get(name) {
                Some(value) => Column::Fixed(*value),
                None => {
                    free_names.push(name.clone());
                    Column::Free(free_names.len() - 1)
                }
            })
            .collect();
        if free_names.is_empty() {
            return Err(SbmError::config("every model parameter is fixed"));
        }
        Ok(Self {
            names: names.to_vec(),
            free_names,
            columns,
        })
    }

    /// All parameter names in model order.
    pub fn names(&self) -> &[String] {
        &self.names
    }

    /// Inferred parameter names, in model order.
    pub fn free_names(&self) -> &[String] {
        &self.free_names
    }

    pub fn num_free(&self) -> usize {
        self.free_names.len()
    }

    pub fn fixed_value(&self, name: &str) -> Option<f64> {
        let i = self.names.iter().position(|n| n == name)?;
        match self.columns[i] {
            Column::Fixed(v) => Some(v),
            Column::Free(_) => None,
        }
    }

    /// Builds `[B, P]` from free samples `[B, P_free]`.
    pub fn assemble(&self, free: &Tensor) -> candle_core::Result<Tensor> {
        if self.free_names.len() == self.names.len() {
            return Ok(free.clone());
        }
        let batch = free.dim(0)?;
        let cols = self
            .columns
            .iter()
            .map(|c| match c {
                Column::Free(j) => free.narrow(1, *j, 1),
                Column::Fixed(v) => Tensor::full(*v, (batch, 1), free.device()),
            })
            .collect::<candle_core::Result<Vec<_>>>()?;
        Tensor::cat(&cols, 1)
    }
}
