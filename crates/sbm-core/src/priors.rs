//! Prior-parameter bundle and initial-condition prior specification.
//!
//! The bundle maps each SDE parameter name to the four numbers needed to build
//! its prior: a location and scale, and the finite support `(lower, upper)`.
//! Validation happens at load time so that training never starts with a
//! missing or degenerate prior.

use std::collections::BTreeMap;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{Result, SbmError};

/// Location, scale and support of one parameter's prior.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PriorSpec {
    pub loc: f64,
    pub scale: f64,
    pub lower: f64,
    pub upper: f64,
}

impl PriorSpec {
    /// Builds a spec from the `[loc, scale, lower, upper]` layout used by
    /// tensor-serialized prior files.
    ///
    /// # Errors
    ///
    /// Returns [`SbmError::Config`] if `values` does not hold exactly four
    /// numbers or the resulting spec is invalid.
    ///
    /// # Example
    ///
    /// ```
    /// use sbm_core::PriorSpec;
    ///
    /// let spec = PriorSpec::from_slice("u_M", &[0.0, 1.0, 1e-3, 1e-2]).unwrap();
    /// assert_eq!(spec.upper, 1e-2);
    /// assert!(PriorSpec::from_slice("u_M", &[0.0, 1.0]).is_err());
    /// ```
    pub fn from_slice(name: &str, values: &[f64]) -> Result<Self> {
        let [loc, scale, lower, upper] = values else {
            return Err(SbmError::config(format!(
                "prior '{name}' needs 4 values [loc, scale, lower, upper], got {}",
                values.len()
            )));
        };
        let spec = Self {
            loc: *loc,
            scale: *scale,
            lower: *lower,
            upper: *upper,
        };
        spec.validate(name)?;
        Ok(spec)
    }

    /// Checks that all numbers are finite, `scale > 0` and `lower < upper`.
    ///
    /// # Errors
    ///
    /// Returns [`SbmError::Config`] naming the parameter.
    pub fn validate(&self, name: &str) -> Result<()> {
        let all = [self.loc, self.scale, self.lower, self.upper];
        if all.iter().any(|v| !v.is_finite()) {
            return Err(SbmError::config(format!(
                "prior '{name}' has non-finite values {all:?}"
            )));
        }
        if self.scale <= 0.0 {
            return Err(SbmError::config(format!(
                "prior '{name}' scale must be positive, got {}",
                self.scale
            )));
        }
        if self.lower >= self.upper {
            return Err(SbmError::config(format!(
                "prior '{name}' support is empty: lower {} >= upper {}",
                self.lower, self.upper
            )));
        }
        Ok(())
    }

    /// Width of the support.
    pub fn width(&self) -> f64 {
        self.upper - self.lower
    }
}

/// Validated mapping from parameter name to [`PriorSpec`].
///
/// # Example
///
/// ```
/// use sbm_core::PriorBundle;
///
/// let json = r#"{"k_S_ref": {"loc": 0.0, "scale": 1.0, "lower": 1e-5, "upper": 1e-4}}"#;
/// let bundle = PriorBundle::from_json_str(json).unwrap();
/// assert!(bundle.require(&["k_S_ref"]).is_ok());
/// assert!(bundle.require(&["k_S_ref", "Ea_S"]).is_err());
/// ```
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PriorBundle {
    specs: BTreeMap<String, PriorSpec>,
}

impl PriorBundle {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds or replaces one entry after validating it.
    ///
    /// # Errors
    ///
    /// Returns [`SbmError::Config`] if the spec is invalid.
    pub fn insert(&mut self, name: impl Into<String>, spec: PriorSpec) -> Result<()> {
        let name = name.into();
        spec.validate(&name)?;
        self.specs.insert(name, spec);
        Ok(())
    }

    /// Parses and validates a JSON object of `name -> {loc, scale, lower, upper}`.
    ///
    /// # Errors
    ///
    /// Returns [`SbmError::Config`] on malformed JSON or an invalid entry.
    pub fn from_json_str(json: &str) -> Result<Self> {
        let bundle: Self = serde_json::from_str(json)
            .map_err(|e| SbmError::config(format!("cannot parse prior bundle: {e}")))?;
        for (name, spec) in &bundle.specs {
            spec.validate(name)?;
        }
        Ok(bundle)
    }

    /// Reads [`PriorBundle::from_json_str`] input from a file.
    ///
    /// # Errors
    ///
    /// Returns [`SbmError::Config`] if the file cannot be read or parsed;
    /// prior files are configuration, so load failures are reported as such.
    pub fn from_json_path<P: AsRef<Path>>(path: P) -> Result<Self> {
        let text = std::fs::read_to_string(path.as_ref()).map_err(|e| {
            SbmError::config(format!(
                "cannot read prior bundle {}: {e}",
                path.as_ref().display()
            ))
        })?;
        Self::from_json_str(&text)
    }

    pub fn get(&self, name: &str) -> Option<&PriorSpec> {
        self.specs.get(name)
    }

    pub fn len(&self) -> usize {
        self.specs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.specs.is_empty()
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.specs.keys().map(String::as_str)
    }

    /// Returns the specs for `names`, in that order.
    ///
    /// # Errors
    ///
    /// Returns [`SbmError::Config`] listing every missing name.
    pub fn require<S: AsRef<str>>(&self, names: &[S]) -> Result<Vec<PriorSpec>> {
        let missing: Vec<&str> = names
            .iter()
            .map(AsRef::as_ref)
            .filter(|n| !self.specs.contains_key(*n))
            .collect();
        if !missing.is_empty() {
            return Err(SbmError::config(format!(
                "prior bundle is missing parameters: {}",
                missing.join(", ")
            )));
        }
        Ok(names
            .iter()
            .map(|n| self.specs[n.as_ref()])
            .collect())
    }
}

/// Diagonal Gaussian prior over the initial state.
///
/// The standard deviation of each state is `error_scale * mean`.
///
/// # Example
///
/// ```
/// use sbm_core::InitialStatePrior;
///
/// let x0 = InitialStatePrior::new(vec![50.0, 0.1, 1.0], 0.1).unwrap();
/// assert_eq!(x0.std_devs()[0], 5.0);
/// assert!(x0.check_dim(4).is_err());
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InitialStatePrior {
    mean: Vec<f64>,
    error_scale: f64,
}

impl InitialStatePrior {
    /// # Errors
    ///
    /// Returns [`SbmError::Data`] if the mean is empty or not strictly
    /// positive, or the error scale is not positive.
    pub fn new(mean: Vec<f64>, error_scale: f64) -> Result<Self> {
        if mean.is_empty() {
            return Err(SbmError::data("initial-state mean is empty"));
        }
        if let Some(pos) = mean.iter().position(|m| !m.is_finite() || *m <= 0.0) {
            return Err(SbmError::data(format!(
                "initial-state mean must be positive, got {} at state {pos}",
                mean[pos]
            )));
        }
        if !error_scale.is_finite() || error_scale <= 0.0 {
            return Err(SbmError::data(format!(
                "initial-state error scale must be positive, got {error_scale}"
            )));
        }
        Ok(Self { mean, error_scale })
    }

    pub fn mean(&self) -> &[f64] {
        &self.mean
    }

    pub fn error_scale(&self) -> f64 {
        self.error_scale
    }

    pub fn dim(&self) -> usize {
        self.mean.len()
    }

    pub fn std_devs(&self) -> Vec<f64> {
        self.mean.iter().map(|m| m * self.error_scale).collect()
    }

    /// # Errors
    ///
    /// Returns [`SbmError::Data`] if the prior dimension is not `state_dim`.
    pub fn check_dim(&self, state_dim: usize) -> Result<()> {
        if self.mean.len() != state_dim {
            return Err(SbmError::data(format!(
                "initial-state prior has {} entries, model has {state_dim} states",
                self.mean.len()
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn spec() -> PriorSpec {
        PriorSpec {
            loc: 0.0,
            scale: 1.0,
            lower: 0.1,
            upper: 0.9,
        }
    }

    #[test]
    fn rejects_degenerate_support() {
        let bad = PriorSpec {
            lower: 1.0,
            upper: 1.0,
            ..spec()
        };
        let err = bad.validate("a_SD").unwrap_err();
        assert!(err.to_string().contains("a_SD"));
    }

    #[test]
    fn rejects_infinite_bounds() {
        let bad = PriorSpec {
            upper: f64::INFINITY,
            ..spec()
        };
        assert!(bad.validate("Ea_S").is_err());
    }

    #[test]
    fn require_lists_all_missing() {
        let mut bundle = PriorBundle::new();
        bundle.insert("a", spec()).unwrap();
        let err = bundle.require(&["a", "b", "c"]).unwrap_err();
        let text = err.to_string();
        assert!(text.contains("b, c"), "{text}");
    }

    #[test]
    fn require_keeps_requested_order() {
        let mut bundle = PriorBundle::new();
        bundle.insert("z", PriorSpec { loc: 1.0, ..spec() }).unwrap();
        bundle.insert("a", PriorSpec { loc: 2.0, ..spec() }).unwrap();
        let specs = bundle.require(&["z", "a"]).unwrap();
        assert_eq!(specs[0].loc, 1.0);
        assert_eq!(specs[1].loc, 2.0);
    }

    #[test]
    fn json_with_invalid_entry_is_config_error() {
        let json = r#"{"a": {"loc": 0.0, "scale": -1.0, "lower": 0.0, "upper": 1.0}}"#;
        assert!(matches!(
            PriorBundle::from_json_str(json),
            Err(SbmError::Config { .. })
        ));
    }

    #[test]
    fn json_roundtrip_through_file() {
        let mut bundle = PriorBundle::new();
        bundle.insert("k_D_ref", spec()).unwrap();
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("p_theta.json");
        std::fs::write(&path, serde_json::to_string(&bundle).unwrap()).unwrap();
        let loaded = PriorBundle::from_json_path(&path).unwrap();
        assert_eq!(loaded, bundle);
    }

    #[test]
    fn initial_state_rejects_non_positive_mean() {
        assert!(InitialStatePrior::new(vec![1.0, 0.0], 0.1).is_err());
        assert!(InitialStatePrior::new(vec![1.0], 0.0).is_err());
    }
}
