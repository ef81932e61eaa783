//! Segmentation training loop.

use std::path::Path;

use burn::{
    data::{dataloader::batcher::Batcher, dataset::Dataset},
    module::AutodiffModule,
    optim::{AdamConfig, GradientsParams, Optimizer},
    tensor::backend::{AutodiffBackend, Backend},
};
use rand::seq::SliceRandom;
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;
use tracing::info;

use crate::dataset::{
    ImageArray, MaskArray, SegmentationBatch, SegmentationBatcher, SegmentationDataset,
};
use crate::model::{ArchitectureConfig, Backbone, SegmentationModel, TrainerConfig};
use crate::training::checkpoint::{save_checkpoint, CheckpointMonitor, CheckpointPolicy};
use crate::training::history::{validation_key, TrainingHistory, ACCURACY, LOSS, OVERLAP_COEFFICIENT};
use crate::training::metrics::{
    binary_accuracy, binary_cross_entropy, overlap_coefficient, scalar, steps_per_epoch,
    RunningMean, OVERLAP_SMOOTHING,
};
use crate::training::scheduler::LrSchedule;
use crate::utils::error::{PanelTrainError, Result};
use crate::utils::logging::TrainingLogger;

/// Epoch averages of the segmentation metrics
#[derive(Debug, Clone, Copy, Default)]
struct SegmentationMetrics {
    loss: RunningMean,
    accuracy: RunningMean,
    overlap: RunningMean,
}

/// Train the segmentation network.
///
/// Masks are scaled by their array-wide maximum. The checkpoint at
/// `checkpoint_path` is overwritten whenever the monitored validation metric
/// improves; the returned model is the one from the final epoch.
#[allow(clippy::too_many_arguments)]
pub fn train_segmentation<B: AutodiffBackend>(
    config: &TrainerConfig,
    architecture: &ArchitectureConfig,
    device: &B::Device,
    train_images: &ImageArray,
    train_masks: &MaskArray,
    val_images: &ImageArray,
    val_masks: &MaskArray,
    checkpoint_path: &Path,
) -> Result<(SegmentationModel<B>, TrainingHistory)> {
    config.validate()?;
    architecture.validate()?;

    let train = SegmentationDataset::new(train_images.clone(), train_masks)?;
    let val = SegmentationDataset::new(val_images.clone(), val_masks)?;

    let batch_size = config.batch_size;
    let train_steps = steps_per_epoch(train.len(), batch_size);
    let val_steps = steps_per_epoch(val.len(), batch_size);
    if train_steps == 0 || val_steps == 0 {
        return Err(PanelTrainError::Dataset(format!(
            "batch size {} leaves no full batch ({} training, {} validation samples)",
            batch_size,
            train.len(),
            val.len()
        )));
    }

    let (height, width) = train.spatial_size();
    if val.spatial_size() != (height, width) {
        return Err(PanelTrainError::ShapeMismatch(format!(
            "training images are {}x{} but validation images are {}x{}",
            height,
            width,
            val.spatial_size().0,
            val.spatial_size().1
        )));
    }
    let batcher = SegmentationBatcher::new(height, width);

    info!(
        "Segmentation: {} training / {} validation samples, {} + {} steps per epoch",
        train.len(),
        val.len(),
        train_steps,
        val_steps
    );

    let backbone = Backbone::init(&architecture.backbone, device)?;
    let mut model = SegmentationModel::<B>::new(backbone, architecture, device);
    let mut optimizer = AdamConfig::new().with_epsilon(1e-8).init();

    let mut monitor = CheckpointMonitor::new(CheckpointPolicy::SEGMENTATION);
    let monitored_key = monitor.policy().monitor.key();
    let mut history = TrainingHistory::new();
    let mut logger = TrainingLogger::new("segmentation", config.epoch_count);
    let mut rng = ChaCha8Rng::seed_from_u64(config.seed);
    let schedule = LrSchedule::constant(config.learning_rate);

    for epoch in 0..config.epoch_count {
        let lr = schedule.lr_at(epoch);
        logger.start_epoch(epoch);

        let mut indices: Vec<usize> = (0..train.len()).collect();
        indices.shuffle(&mut rng);

        let mut metrics = SegmentationMetrics::default();
        for step in 0..train_steps {
            let items: Vec<_> = indices[step * batch_size..(step + 1) * batch_size]
                .iter()
                .filter_map(|&i| train.get(i))
                .collect();
            let batch: SegmentationBatch<B> = batcher.batch(items, device);

            let output = model.forward(batch.images);
            let loss = binary_cross_entropy(output.clone(), batch.masks.clone());

            let detached = output.detach();
            metrics.loss.add(scalar(loss.clone()));
            metrics
                .accuracy
                .add(scalar(binary_accuracy(detached.clone(), batch.masks.clone())));
            metrics.overlap.add(scalar(overlap_coefficient(
                batch.masks,
                detached,
                OVERLAP_SMOOTHING,
            )));

            let grads = GradientsParams::from_grads(loss.backward(), &model);
            model = optimizer.step(lr, model, grads);
        }

        let val_metrics = evaluate(&model.valid(), &val, &batcher, val_steps, batch_size, device);

        let epoch_values = [
            (LOSS, metrics.loss.mean()),
            (ACCURACY, metrics.accuracy.mean()),
            (OVERLAP_COEFFICIENT, metrics.overlap.mean()),
        ];
        let val_values = [
            (validation_key(LOSS), val_metrics.loss.mean()),
            (validation_key(ACCURACY), val_metrics.accuracy.mean()),
            (validation_key(OVERLAP_COEFFICIENT), val_metrics.overlap.mean()),
        ];

        history.record_epoch(&epoch_values);
        for (key, value) in &val_values {
            history.push(key, *value);
        }

        let mut summary: Vec<(&str, f64)> = epoch_values.to_vec();
        summary.extend(val_values.iter().map(|(k, v)| (k.as_str(), *v)));
        logger.end_epoch(&summary);

        let monitored = val_values
            .iter()
            .find(|(key, _)| *key == monitored_key)
            .map(|(_, value)| *value)
            .unwrap_or(f64::NAN);
        if monitor.observe(monitored) {
            info!("{} improved to {:.4}", monitored_key, monitored);
            save_checkpoint(&model, checkpoint_path)?;
        }
    }

    logger.log_complete();
    Ok((model, history))
}

/// Validation pass over the first `steps` full batches, in order
fn evaluate<B: Backend>(
    model: &SegmentationModel<B>,
    dataset: &SegmentationDataset,
    batcher: &SegmentationBatcher,
    steps: usize,
    batch_size: usize,
    device: &B::Device,
) -> SegmentationMetrics {
    let mut metrics = SegmentationMetrics::default();

    for step in 0..steps {
        let items: Vec<_> = (step * batch_size..(step + 1) * batch_size)
            .filter_map(|i| dataset.get(i))
            .collect();
        let batch: SegmentationBatch<B> = batcher.batch(items, device);
        let output = model.forward(batch.images);

        metrics
            .loss
            .add(scalar(binary_cross_entropy(output.clone(), batch.masks.clone())));
        metrics
            .accuracy
            .add(scalar(binary_accuracy(output.clone(), batch.masks.clone())));
        metrics.overlap.add(scalar(overlap_coefficient(
            batch.masks,
            output,
            OVERLAP_SMOOTHING,
        )));
    }

    metrics
}

#[cfg(test)]
mod tests {
    use super::*;
    use burn::backend::Autodiff;
    use burn_ndarray::NdArray;
    use tempfile::TempDir;

    type TestBackend = Autodiff<NdArray>;

    fn arrays(count: usize, size: usize) -> (ImageArray, MaskArray) {
        let images = ImageArray::new(
            (0..count * size * size * 3).map(|i| (i % 255) as f32).collect(),
            count,
            size,
            size,
        )
        .unwrap();
        let masks = MaskArray::new(
            (0..count * size * size).map(|i| (i % 2) as f32).collect(),
            count,
            size,
            size,
        )
        .unwrap();
        (images, masks)
    }

    #[test]
    fn test_small_run_records_every_metric() {
        let dir = TempDir::new().unwrap();
        let (images, masks) = arrays(2, 32);
        let config = TrainerConfig::new(1, 2, 1e-3);
        let architecture = ArchitectureConfig::compact(2);

        let (_, history) = train_segmentation::<TestBackend>(
            &config,
            &architecture,
            &Default::default(),
            &images,
            &masks,
            &images,
            &masks,
            &dir.path().join("seg"),
        )
        .unwrap();

        for key in ["loss", "accuracy", "overlap_coefficient"] {
            assert_eq!(history.get(key).map(<[f64]>::len), Some(2));
            assert_eq!(history.get(&validation_key(key)).map(<[f64]>::len), Some(2));
        }
        // the first epoch always improves on -inf
        assert!(dir.path().join("seg.mpk").exists());
    }

    #[test]
    fn test_batch_larger_than_dataset_is_rejected() {
        let dir = TempDir::new().unwrap();
        let (images, masks) = arrays(2, 32);
        let result = train_segmentation::<TestBackend>(
            &TrainerConfig::new(4, 1, 1e-3),
            &ArchitectureConfig::compact(2),
            &Default::default(),
            &images,
            &masks,
            &images,
            &masks,
            &dir.path().join("seg"),
        );
        assert!(matches!(result, Err(PanelTrainError::Dataset(_))));
    }

    #[test]
    fn test_all_zero_masks_rejected() {
        let dir = TempDir::new().unwrap();
        let (images, _) = arrays(2, 32);
        let masks = MaskArray::new(vec![0.0; 2 * 32 * 32], 2, 32, 32).unwrap();
        let result = train_segmentation::<TestBackend>(
            &TrainerConfig::new(1, 1, 1e-3),
            &ArchitectureConfig::compact(2),
            &Default::default(),
            &images,
            &masks,
            &images,
            &masks,
            &dir.path().join("seg"),
        );
        assert!(matches!(result, Err(PanelTrainError::DegenerateMask(_))));
    }
}
