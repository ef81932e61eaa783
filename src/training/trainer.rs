//! Trainer facade over the three pipelines.
//!
//! A [`PanelTrainer`] fixes the hyperparameters, architecture and device once;
//! each entry point then runs one pipeline to completion.

use std::path::{Path, PathBuf};

use burn::tensor::backend::AutodiffBackend;
use tracing::info;

use crate::backend::{select_device, ComputeDevice, TrainingBackend};
use crate::dataset::{ImageArray, MaskArray};
use crate::model::{
    ArchitectureConfig, MountingDetector, PanelClassifier, SegmentationModel, TrainerConfig,
};
use crate::training::history::TrainingHistory;
use crate::training::statistics::{self, StatisticsMode};
use crate::training::{classification, detection, segmentation};
use crate::utils::charts::Canvas;
use crate::utils::error::Result;

/// Checkpoint file stem of the segmentation network
pub const SEGMENTATION_CHECKPOINT: &str = "semantic_segmentation";

/// Checkpoint file stem of the panel classifier
pub const CLASSIFIER_CHECKPOINT: &str = "panel_classifier";

/// Checkpoint file stem of the mounting detector
pub const DETECTOR_CHECKPOINT: &str = "mounting_detector";

#[derive(Debug, Clone)]
pub struct PanelTrainer<B: AutodiffBackend> {
    config: TrainerConfig,
    architecture: ArchitectureConfig,
    device: B::Device,
    report_dir: PathBuf,
}

impl<B: AutodiffBackend> PanelTrainer<B> {
    /// Validate `config` and bind the trainer to `device`
    pub fn new(config: TrainerConfig, device: B::Device) -> Result<Self> {
        config.validate()?;
        info!(
            "Trainer: batch size {}, {} epochs, learning rate {:e}, seed {}",
            config.batch_size, config.epoch_count, config.learning_rate, config.seed
        );

        Ok(Self {
            config,
            architecture: ArchitectureConfig::default(),
            device,
            report_dir: PathBuf::from("."),
        })
    }

    pub fn with_architecture(mut self, architecture: ArchitectureConfig) -> Result<Self> {
        architecture.validate()?;
        self.architecture = architecture;
        Ok(self)
    }

    /// Directory chart files are written to
    pub fn with_report_dir<P: AsRef<Path>>(mut self, dir: P) -> Self {
        self.report_dir = dir.as_ref().to_path_buf();
        self
    }

    pub fn config(&self) -> &TrainerConfig {
        &self.config
    }

    pub fn architecture(&self) -> &ArchitectureConfig {
        &self.architecture
    }

    pub fn report_dir(&self) -> &Path {
        &self.report_dir
    }

    pub fn train_segmentation(
        &self,
        train_images: &ImageArray,
        train_masks: &MaskArray,
        val_images: &ImageArray,
        val_masks: &MaskArray,
        checkpoint_path: &Path,
    ) -> Result<(SegmentationModel<B>, TrainingHistory)> {
        segmentation::train_segmentation(
            &self.config,
            &self.architecture,
            &self.device,
            train_images,
            train_masks,
            val_images,
            val_masks,
            checkpoint_path,
        )
    }

    pub fn train_panel_classifier(
        &self,
        train_dir: &Path,
        val_dir: &Path,
        checkpoint_path: &Path,
    ) -> Result<(PanelClassifier<B>, TrainingHistory)> {
        classification::train_panel_classifier(
            &self.config,
            &self.architecture,
            &self.device,
            train_dir,
            val_dir,
            checkpoint_path,
        )
    }

    /// Run the detection pipeline on `device` and chart its loss curve
    pub fn train_mounting_detector(
        &self,
        train_dir: &Path,
        val_dir: &Path,
        device: &B::Device,
    ) -> Result<MountingDetector<B>> {
        let (model, losses) = detection::train_mounting_detector(
            &self.config,
            &self.architecture,
            device,
            train_dir,
            val_dir,
        )?;

        let chart = statistics::plot_losses(&losses, &self.canvas())?;
        info!("Detection loss curve written to {:?}", chart);
        Ok(model)
    }

    /// Chart a finished run into the report directory
    pub fn training_statistics(
        &self,
        history: &TrainingHistory,
        mode: StatisticsMode,
    ) -> Result<Vec<PathBuf>> {
        statistics::training_statistics(history, mode, &self.canvas())
    }

    fn canvas(&self) -> Canvas {
        Canvas::new(&self.report_dir)
    }
}

impl PanelTrainer<TrainingBackend> {
    /// Detection entry point with an explicit device request
    pub fn train_mounting_config_classifier(
        &self,
        train_dir: &Path,
        val_dir: &Path,
        compute_device: ComputeDevice,
    ) -> Result<MountingDetector<TrainingBackend>> {
        let device = select_device(compute_device);
        self.train_mounting_detector(train_dir, val_dir, &device)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::utils::error::PanelTrainError;
    use burn::backend::Autodiff;
    use burn_ndarray::NdArray;
    use tempfile::TempDir;

    type TestBackend = Autodiff<NdArray>;

    #[test]
    fn test_invalid_config_rejected() {
        let result = PanelTrainer::<TestBackend>::new(TrainerConfig::new(0, 1, 1e-4), Default::default());
        assert!(matches!(result, Err(PanelTrainError::Config(_))));
    }

    #[test]
    fn test_invalid_architecture_rejected() {
        let trainer =
            PanelTrainer::<TestBackend>::new(TrainerConfig::default(), Default::default()).unwrap();
        let architecture = ArchitectureConfig {
            image_size: 100,
            ..ArchitectureConfig::default()
        };
        assert!(trainer.with_architecture(architecture).is_err());
    }

    #[test]
    fn test_statistics_go_to_report_dir() {
        let dir = TempDir::new().unwrap();
        let trainer = PanelTrainer::<TestBackend>::new(TrainerConfig::default(), Default::default())
            .unwrap()
            .with_report_dir(dir.path());

        let mut history = TrainingHistory::new();
        history.record_epoch(&[("loss", 0.4), ("accuracy", 0.8)]);

        let written = trainer
            .training_statistics(&history, StatisticsMode::Classification)
            .unwrap();
        assert!(written.iter().all(|p| p.starts_with(dir.path())));
        assert!(dir.path().join("Training statistics.svg").exists());
    }
}
