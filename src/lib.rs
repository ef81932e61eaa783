//! # Panel Train
//!
//! Training pipelines for solar panel analysis of satellite imagery, built on
//! the Burn framework.
//!
//! ## Pipelines
//!
//! - **Segmentation**: a VGG16 encoder with a skip-connected decoder producing
//!   a per-pixel panel mask, checkpointed on validation loss
//! - **Classification**: a fine-tuned VGG16 with a dense head deciding whether
//!   an image contains panels, checkpointed on validation accuracy
//! - **Detection**: a multibox detector for the four mounting configurations,
//!   trained on Pascal-VOC annotations with class oversampling
//!
//! ## Modules
//!
//! - `dataset`: image arrays, class directories, annotation conversion and balancing
//! - `model`: backbone, segmentation, classifier and detector networks
//! - `training`: training loops, metrics, checkpointing and the statistics reporter
//! - `utils`: logging, charts and error types
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use panel_train::backend::{default_device, TrainingBackend};
//! use panel_train::{ImageArray, MaskArray, PanelTrainer, StatisticsMode, TrainerConfig};
//!
//! let trainer = PanelTrainer::<TrainingBackend>::new(TrainerConfig::new(8, 10, 1e-4), default_device())?;
//! let (images, masks) = (ImageArray::load_dir("train/images")?, MaskArray::load_dir("train/masks")?);
//! let (val_images, val_masks) = (ImageArray::load_dir("val/images")?, MaskArray::load_dir("val/masks")?);
//! let (_model, history) =
//!     trainer.train_segmentation(&images, &masks, &val_images, &val_masks, "seg".as_ref())?;
//! trainer.training_statistics(&history, StatisticsMode::Segmentation)?;
//! ```

pub mod backend;
pub mod dataset;
pub mod model;
pub mod training;
pub mod utils;

// Re-export commonly used items for convenience
pub use dataset::{
    AnnotationRecord, AnnotationTable, ClassBalanceTable, ClassDirectoryDataset, ImageArray,
    MaskArray, MOUNTING_CLASSES,
};
pub use model::{
    ArchitectureConfig, Backbone, MountingDetector, PanelClassifier, SegmentationModel,
    TrainerConfig,
};
pub use training::{
    overlap_coefficient, overlap_loss, CheckpointPolicy, PanelTrainer, StatisticsMode,
    TrainingHistory,
};
pub use utils::error::{PanelTrainError, Result};

/// Version of the library
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
