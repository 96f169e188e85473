//! Named scalar metrics.

use std::collections::BTreeMap;

use burn::tensor::backend::Backend;
use burn::tensor::{ElementConversion, Tensor};

/// Ordered collection of named scalar metrics.
///
/// Keys are sorted so that log lines and CSV columns come out in a stable
/// order from call to call.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Metrics(BTreeMap<String, f64>);

impl Metrics {
    /// Empty metric set.
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or overwrite a value.
    pub fn insert(&mut self, key: impl Into<String>, value: f64) {
        self.0.insert(key.into(), value);
    }

    /// Record the mean of a tensor under `key`.
    pub fn insert_mean<B: Backend, const D: usize>(&mut self, key: impl Into<String>, value: Tensor<B, D>) {
        self.insert(key, tensor_scalar(value.mean()));
    }

    /// Merge another set; later values win.
    pub fn extend(&mut self, other: Metrics) {
        self.0.extend(other.0);
    }

    /// Copy of the set with every key prefixed by `prefix_`.
    pub fn with_prefix(self, prefix: &str) -> Self {
        Self(
            self.0
                .into_iter()
                .map(|(k, v)| (format!("{}_{}", prefix, k), v))
                .collect(),
        )
    }

    /// Value stored under `key`.
    pub fn get(&self, key: &str) -> Option<f64> {
        self.0.get(key).copied()
    }

    /// Whether `key` is present.
    pub fn contains(&self, key: &str) -> bool {
        self.0.contains_key(key)
    }

    /// Iterate in key order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, f64)> {
        self.0.iter().map(|(k, v)| (k.as_str(), *v))
    }

    /// Number of entries.
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Whether no metric was recorded.
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl FromIterator<(String, f64)> for Metrics {
    fn from_iter<I: IntoIterator<Item = (String, f64)>>(iter: I) -> Self {
        Self(iter.into_iter().collect())
    }
}

/// Read a single-element tensor back to the host.
pub fn tensor_scalar<B: Backend>(value: Tensor<B, 1>) -> f64 {
    value.into_scalar().elem::<f64>()
}
