//! Model Configuration Module
//!
//! Defines configuration structures for the network architectures and the
//! trainer hyperparameters shared by all three pipelines.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::utils::error::{PanelTrainError, Result};

/// Input resolution of the segmentation and classification networks
pub const IMAGE_SIZE: usize = 640;

/// Long edge of training images fed to the mounting detector
pub const DETECTION_LONG_EDGE: usize = 800;

/// Configuration for the VGG16-shaped feature extractor
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BackboneConfig {
    /// Width of the first stage; later stages use 2x, 4x, 8x, 8x
    pub base_filters: usize,

    /// Optional `CompactRecorder` file holding pretrained backbone weights
    pub pretrained_weights: Option<PathBuf>,
}

impl Default for BackboneConfig {
    fn default() -> Self {
        Self {
            base_filters: 64,
            pretrained_weights: None,
        }
    }
}

impl BackboneConfig {
    /// Channel widths of the five stages
    pub fn stage_widths(&self) -> [usize; 5] {
        let b = self.base_filters;
        [b, b * 2, b * 4, b * 8, b * 8]
    }

    /// Width of the globally pooled feature vector
    pub fn pooled_width(&self) -> usize {
        self.base_filters * 8
    }
}

/// Configuration for the multibox mounting detector
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DetectorConfig {
    /// Number of box slots predicted per image
    pub max_boxes: usize,

    /// Width of the dense trunk
    pub hidden: usize,

    /// Long edge training images are resized to
    pub long_edge: usize,
}

impl Default for DetectorConfig {
    fn default() -> Self {
        Self {
            max_boxes: 16,
            hidden: 256,
            long_edge: DETECTION_LONG_EDGE,
        }
    }
}

/// Configuration for all network architectures
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ArchitectureConfig {
    pub backbone: BackboneConfig,

    /// Units in each of the two dense layers of the panel classifier
    pub classifier_hidden: usize,

    /// Dropout used inside the classifier head
    pub classifier_dropout: f64,

    /// Dropout between the two convolutions of each decoder stage
    pub segmentation_dropout: f64,

    /// Dropout of the last (full resolution) decoder stage
    pub segmentation_final_dropout: f64,

    /// Square input size for segmentation and classification
    pub image_size: usize,

    pub detector: DetectorConfig,
}

impl Default for ArchitectureConfig {
    fn default() -> Self {
        Self {
            backbone: BackboneConfig::default(),
            classifier_hidden: 512,
            classifier_dropout: 0.2,
            segmentation_dropout: 0.2,
            segmentation_final_dropout: 0.1,
            image_size: IMAGE_SIZE,
            detector: DetectorConfig::default(),
        }
    }
}

impl ArchitectureConfig {
    /// A narrow network with the same topology, for quick runs on the CPU
    pub fn compact(base_filters: usize) -> Self {
        Self {
            backbone: BackboneConfig {
                base_filters,
                pretrained_weights: None,
            },
            classifier_hidden: base_filters * 8,
            detector: DetectorConfig {
                hidden: base_filters * 4,
                ..DetectorConfig::default()
            },
            ..Self::default()
        }
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<()> {
        if self.backbone.base_filters < 2 {
            return Err(PanelTrainError::Config(
                "base_filters must be at least 2".to_string(),
            ));
        }

        if self.image_size == 0 || self.image_size % 32 != 0 {
            return Err(PanelTrainError::Config(
                "image_size must be a positive multiple of 32".to_string(),
            ));
        }

        for (name, rate) in [
            ("classifier_dropout", self.classifier_dropout),
            ("segmentation_dropout", self.segmentation_dropout),
            ("segmentation_final_dropout", self.segmentation_final_dropout),
        ] {
            if !(0.0..1.0).contains(&rate) {
                return Err(PanelTrainError::Config(format!(
                    "{} must be in range [0.0, 1.0)",
                    name
                )));
            }
        }

        if self.detector.max_boxes == 0 || self.detector.hidden == 0 {
            return Err(PanelTrainError::Config(
                "detector max_boxes and hidden must be greater than 0".to_string(),
            ));
        }

        if self.detector.long_edge < 32 {
            return Err(PanelTrainError::Config(
                "detector long_edge must be at least 32".to_string(),
            ));
        }

        Ok(())
    }
}

/// Hyperparameters fixed when a trainer is constructed
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrainerConfig {
    /// Samples per gradient step
    pub batch_size: usize,

    /// Number of passes over the training data
    pub epoch_count: usize,

    /// Optimizer learning rate
    pub learning_rate: f64,

    /// Seed for shuffling and oversampling
    #[serde(default = "default_seed")]
    pub seed: u64,
}

fn default_seed() -> u64 {
    42
}

impl Default for TrainerConfig {
    fn default() -> Self {
        Self {
            batch_size: 8,
            epoch_count: 10,
            learning_rate: 1e-4,
            seed: default_seed(),
        }
    }
}

impl TrainerConfig {
    pub fn new(batch_size: usize, epoch_count: usize, learning_rate: f64) -> Self {
        Self {
            batch_size,
            epoch_count,
            learning_rate,
            seed: default_seed(),
        }
    }

    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = seed;
        self
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<()> {
        if self.batch_size == 0 {
            return Err(PanelTrainError::Config(
                "batch_size must be greater than 0".to_string(),
            ));
        }

        if self.epoch_count == 0 {
            return Err(PanelTrainError::Config(
                "epoch_count must be greater than 0".to_string(),
            ));
        }

        if !self.learning_rate.is_finite() || self.learning_rate <= 0.0 {
            return Err(PanelTrainError::Config(
                "learning_rate must be a finite positive number".to_string(),
            ));
        }

        Ok(())
    }

    /// Save configuration to a JSON file
    pub fn save(&self, path: &Path) -> Result<()> {
        let json = serde_json::to_string_pretty(self)?;
        std::fs::write(path, json)?;
        Ok(())
    }

    /// Load configuration from a JSON file
    pub fn load(path: &Path) -> Result<Self> {
        let json = std::fs::read_to_string(path)?;
        let config: Self = serde_json::from_str(&json)?;
        config.validate()?;
        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_default_architecture_is_vgg16() {
        let config = ArchitectureConfig::default();
        assert_eq!(config.backbone.stage_widths(), [64, 128, 256, 512, 512]);
        assert_eq!(config.classifier_hidden, 512);
        assert_eq!(config.image_size, 640);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_compact_architecture_keeps_topology() {
        let config = ArchitectureConfig::compact(4);
        assert_eq!(config.backbone.stage_widths(), [4, 8, 16, 32, 32]);
        assert_eq!(config.backbone.pooled_width(), 32);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_invalid_image_size() {
        let mut config = ArchitectureConfig::default();
        config.image_size = 100;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_trainer_config_validation() {
        assert!(TrainerConfig::new(2, 1, 1e-4).validate().is_ok());
        assert!(TrainerConfig::new(0, 1, 1e-4).validate().is_err());
        assert!(TrainerConfig::new(2, 0, 1e-4).validate().is_err());
        assert!(TrainerConfig::new(2, 1, 0.0).validate().is_err());
        assert!(TrainerConfig::new(2, 1, f64::NAN).validate().is_err());
    }

    #[test]
    fn test_trainer_config_roundtrip_file() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("trainer.json");
        let config = TrainerConfig::new(4, 3, 1e-3).with_seed(7);

        config.save(&path).unwrap();
        let loaded = TrainerConfig::load(&path).unwrap();
        assert_eq!(loaded, config);
    }

    #[test]
    fn test_missing_seed_defaults() {
        let json = r#"{"batch_size": 2, "epoch_count": 1, "learning_rate": 0.0001}"#;
        let config: TrainerConfig = serde_json::from_str(json).unwrap();
        assert_eq!(config.seed, 42);
    }
}
