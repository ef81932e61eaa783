//! Training module for the panel pipelines
//!
//! This module provides:
//! - Segmentation, classification and detection training loops
//! - Losses and metrics, including the overlap coefficient
//! - Per-epoch history and save-on-improve checkpointing
//! - The statistics reporter that charts a finished run

pub mod checkpoint;
pub mod classification;
pub mod detection;
pub mod history;
pub mod metrics;
pub mod scheduler;
pub mod segmentation;
pub mod statistics;
pub mod trainer;

// Re-export main types for convenience
pub use checkpoint::{CheckpointMonitor, CheckpointPolicy, MonitorMode, MonitoredMetric};
pub use history::TrainingHistory;
pub use metrics::{overlap_coefficient, overlap_loss, steps_per_epoch};
pub use scheduler::LrSchedule;
pub use statistics::{training_statistics, StatisticsMode};
pub use trainer::PanelTrainer;
