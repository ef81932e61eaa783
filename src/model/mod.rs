//! Model module for the network architectures, built with the Burn framework
//!
//! This module provides:
//! - A VGG16-shaped backbone with explicit stage outputs
//! - The segmentation encoder-decoder, the panel classifier and the mounting detector
//! - Architecture and trainer configuration

pub mod backbone;
pub mod classifier;
pub mod config;
pub mod detector;
pub mod segmentation;

// Re-export main types for convenience
pub use backbone::{Backbone, StageFeatures};
pub use classifier::PanelClassifier;
pub use config::{ArchitectureConfig, BackboneConfig, DetectorConfig, TrainerConfig};
pub use detector::{DetectorOutput, MountingDetector};
pub use segmentation::SegmentationModel;
