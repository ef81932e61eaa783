//! Save-on-improve checkpointing.
//!
//! A [`CheckpointMonitor`] follows one validation metric across epochs and
//! reports when it strictly improves; the caller then overwrites the
//! checkpoint file in place. Writes are not atomic.

use std::path::{Path, PathBuf};

use burn::{module::Module, record::CompactRecorder, tensor::backend::Backend};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::training::history::{validation_key, ACCURACY, LOSS};
use crate::utils::error::{PanelTrainError, Result};

/// Extension `CompactRecorder` gives checkpoint files
pub const CHECKPOINT_EXTENSION: &str = "mpk";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum MonitoredMetric {
    ValLoss,
    ValAccuracy,
}

impl MonitoredMetric {
    /// History key of the metric
    pub fn key(&self) -> String {
        match self {
            MonitoredMetric::ValLoss => validation_key(LOSS),
            MonitoredMetric::ValAccuracy => validation_key(ACCURACY),
        }
    }

    fn lower_is_better(&self) -> bool {
        matches!(self, MonitoredMetric::ValLoss)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum MonitorMode {
    /// Higher values are improvements
    Max,
    /// Lower values are improvements
    Min,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CheckpointPolicy {
    pub monitor: MonitoredMetric,
    pub mode: MonitorMode,
}

impl CheckpointPolicy {
    /// Segmentation monitors validation loss with "higher is better".
    /// This pairing is suspect but intentionally unchanged; a warning is
    /// logged whenever it is used.
    pub const SEGMENTATION: Self = Self {
        monitor: MonitoredMetric::ValLoss,
        mode: MonitorMode::Max,
    };

    pub const CLASSIFICATION: Self = Self {
        monitor: MonitoredMetric::ValAccuracy,
        mode: MonitorMode::Max,
    };

    /// Whether the comparison direction suits the monitored metric
    pub fn is_consistent(&self) -> bool {
        match self.mode {
            MonitorMode::Min => self.monitor.lower_is_better(),
            MonitorMode::Max => !self.monitor.lower_is_better(),
        }
    }
}

/// Tracks the best monitored value seen so far
#[derive(Debug, Clone)]
pub struct CheckpointMonitor {
    policy: CheckpointPolicy,
    best: f64,
}

impl CheckpointMonitor {
    pub fn new(policy: CheckpointPolicy) -> Self {
        if !policy.is_consistent() {
            warn!(
                "Checkpoint policy monitors '{}' in {:?} mode; checkpoints are kept when it increases",
                policy.monitor.key(),
                policy.mode
            );
        }

        let best = match policy.mode {
            MonitorMode::Max => f64::NEG_INFINITY,
            MonitorMode::Min => f64::INFINITY,
        };

        Self { policy, best }
    }

    pub fn policy(&self) -> CheckpointPolicy {
        self.policy
    }

    /// Best value so far, if any epoch has been observed
    pub fn best(&self) -> Option<f64> {
        self.best.is_finite().then_some(self.best)
    }

    /// Record an epoch's value; true when it strictly improves on every
    /// earlier epoch. NaN never improves.
    pub fn observe(&mut self, value: f64) -> bool {
        let improved = match self.policy.mode {
            MonitorMode::Max => value > self.best,
            MonitorMode::Min => value < self.best,
        };

        if improved {
            self.best = value;
        }
        improved
    }
}

/// Path `CompactRecorder` writes for `path`
pub fn checkpoint_file(path: &Path) -> PathBuf {
    path.with_extension(CHECKPOINT_EXTENSION)
}

/// Persist `model` to `path`, overwriting any previous checkpoint
pub fn save_checkpoint<B: Backend, M: Module<B>>(model: &M, path: &Path) -> Result<PathBuf> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)?;
        }
    }

    let recorder = CompactRecorder::new();
    model
        .clone()
        .save_file(path.to_path_buf(), &recorder)
        .map_err(|e| PanelTrainError::Checkpoint(format!("Failed to save model: {:?}", e)))?;

    let written = checkpoint_file(path);
    info!("Checkpoint saved to {:?}", written);
    Ok(written)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_saves_only_on_strict_improvement() {
        let mut monitor = CheckpointMonitor::new(CheckpointPolicy::CLASSIFICATION);
        let saves: Vec<bool> = [0.5, 0.7, 0.7, 0.6, 0.8]
            .iter()
            .map(|v| monitor.observe(*v))
            .collect();

        assert_eq!(saves, vec![true, true, false, false, true]);
        assert_eq!(monitor.best(), Some(0.8));
    }

    #[test]
    fn test_min_mode() {
        let mut monitor = CheckpointMonitor::new(CheckpointPolicy {
            monitor: MonitoredMetric::ValLoss,
            mode: MonitorMode::Min,
        });
        assert!(monitor.best().is_none());
        assert!(monitor.observe(1.0));
        assert!(!monitor.observe(1.0));
        assert!(monitor.observe(0.5));
        assert!(!monitor.observe(0.9));
    }

    #[test]
    fn test_nan_never_improves() {
        let mut monitor = CheckpointMonitor::new(CheckpointPolicy::CLASSIFICATION);
        assert!(!monitor.observe(f64::NAN));
        assert!(monitor.observe(0.1));
    }

    #[test]
    fn test_segmentation_policy_is_flagged() {
        let policy = CheckpointPolicy::SEGMENTATION;
        assert_eq!(policy.monitor.key(), "val_loss");
        assert_eq!(policy.mode, MonitorMode::Max);
        assert!(!policy.is_consistent());
        assert!(CheckpointPolicy::CLASSIFICATION.is_consistent());
    }

    #[test]
    fn test_segmentation_policy_keeps_rising_loss() {
        let mut monitor = CheckpointMonitor::new(CheckpointPolicy::SEGMENTATION);
        assert!(monitor.observe(0.3));
        assert!(!monitor.observe(0.2));
        assert!(monitor.observe(0.4));
    }

    #[test]
    fn test_checkpoint_file_extension() {
        assert_eq!(
            checkpoint_file(Path::new("out/model")),
            PathBuf::from("out/model.mpk")
        );
    }
}
