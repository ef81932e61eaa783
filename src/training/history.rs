//! Per-epoch metric history of a training run.

use std::collections::BTreeMap;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::utils::error::Result;

pub const LOSS: &str = "loss";
pub const ACCURACY: &str = "accuracy";
pub const OVERLAP_COEFFICIENT: &str = "overlap_coefficient";

/// Prefix of metrics measured on the validation set
pub const VALIDATION_PREFIX: &str = "val_";

/// `loss` -> `val_loss`
pub fn validation_key(metric: &str) -> String {
    format!("{}{}", VALIDATION_PREFIX, metric)
}

/// Metric name to one value per completed epoch
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TrainingHistory {
    metrics: BTreeMap<String, Vec<f64>>,
}

impl TrainingHistory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append the value of `metric` for the next epoch
    pub fn push(&mut self, metric: &str, value: f64) {
        self.metrics.entry(metric.to_string()).or_default().push(value);
    }

    /// Record a whole epoch of `(metric, value)` pairs
    pub fn record_epoch(&mut self, values: &[(&str, f64)]) {
        for (metric, value) in values {
            self.push(metric, *value);
        }
    }

    pub fn get(&self, metric: &str) -> Option<&[f64]> {
        self.metrics.get(metric).map(Vec::as_slice)
    }

    pub fn contains(&self, metric: &str) -> bool {
        self.metrics.contains_key(metric)
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.metrics.keys().map(String::as_str)
    }

    /// Number of epochs recorded for the training loss
    pub fn epochs(&self) -> usize {
        self.get(LOSS).map(<[f64]>::len).unwrap_or(0)
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        let json = serde_json::to_string_pretty(self)?;
        std::fs::write(path, json)?;
        Ok(())
    }

    pub fn load(path: &Path) -> Result<Self> {
        let json = std::fs::read_to_string(path)?;
        Ok(serde_json::from_str(&json)?)
    }
}
