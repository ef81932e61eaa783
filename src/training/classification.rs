//! Panel presence classifier training loop.

use std::path::Path;

use burn::{
    data::dataloader::batcher::Batcher,
    module::AutodiffModule,
    nn::loss::CrossEntropyLossConfig,
    optim::{AdamConfig, GradientsParams, Optimizer},
    tensor::backend::{AutodiffBackend, Backend},
};
use rand::seq::SliceRandom;
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;
use tracing::info;

use crate::dataset::{
    ClassDirectoryDataset, ClassificationBatch, ClassificationBatcher, ClassificationItem,
};
use crate::model::classifier::PANEL_CLASSES;
use crate::model::{ArchitectureConfig, Backbone, PanelClassifier, TrainerConfig};
use crate::training::checkpoint::{save_checkpoint, CheckpointMonitor, CheckpointPolicy};
use crate::training::history::{validation_key, TrainingHistory, ACCURACY, LOSS};
use crate::training::metrics::{correct_predictions, scalar, steps_per_epoch, RunningMean};
use crate::training::scheduler::LrSchedule;
use crate::utils::error::{PanelTrainError, Result};
use crate::utils::logging::TrainingLogger;

/// Decode the samples at `indices` into a batch
fn load_batch<B: Backend>(
    dataset: &ClassDirectoryDataset,
    indices: &[usize],
    batcher: &ClassificationBatcher,
    device: &B::Device,
) -> Result<ClassificationBatch<B>> {
    let items = indices
        .iter()
        .map(|&i| {
            dataset
                .load(i)
                .map(|(image, label)| ClassificationItem { image, label })
        })
        .collect::<Result<Vec<_>>>()?;

    Ok(batcher.batch(items, device))
}

/// Both directories must hold exactly the two panel classes, with the same
/// names in the same order.
fn check_classes(train: &ClassDirectoryDataset, val: &ClassDirectoryDataset) -> Result<()> {
    if train.num_classes() != PANEL_CLASSES {
        return Err(PanelTrainError::Dataset(format!(
            "expected {} class directories in {:?}, found {:?}",
            PANEL_CLASSES, train.root_dir, train.class_names
        )));
    }

    if val.class_names != train.class_names {
        return Err(PanelTrainError::Dataset(format!(
            "validation classes {:?} differ from training classes {:?}",
            val.class_names, train.class_names
        )));
    }

    Ok(())
}

/// Train the panel classifier on `root/<class>/<image>` directories.
///
/// The whole backbone is fine-tuned. Steps per epoch are `samples /
/// batch_size`; the remainder of each shuffled epoch is skipped.
pub fn train_panel_classifier<B: AutodiffBackend>(
    config: &TrainerConfig,
    architecture: &ArchitectureConfig,
    device: &B::Device,
    train_dir: &Path,
    val_dir: &Path,
    checkpoint_path: &Path,
) -> Result<(PanelClassifier<B>, TrainingHistory)> {
    config.validate()?;
    architecture.validate()?;

    let train = ClassDirectoryDataset::new(train_dir, architecture.image_size)?;
    let val = ClassDirectoryDataset::new(val_dir, architecture.image_size)?;
    check_classes(&train, &val)?;

    let batch_size = config.batch_size;
    let train_steps = steps_per_epoch(train.len(), batch_size);
    let val_steps = steps_per_epoch(val.len(), batch_size);
    if train_steps == 0 || val_steps == 0 {
        return Err(PanelTrainError::Dataset(format!(
            "batch size {} leaves no full batch ({} training, {} validation images)",
            batch_size,
            train.len(),
            val.len()
        )));
    }

    info!(
        "Classes: {:?}; {} + {} steps per epoch",
        train.class_names, train_steps, val_steps
    );

    let batcher = ClassificationBatcher::new(architecture.image_size);
    let backbone = Backbone::init(&architecture.backbone, device)?;
    let mut model = PanelClassifier::<B>::new(backbone, architecture, device);
    let mut optimizer = AdamConfig::new().with_epsilon(1e-8).init();
    let loss_fn = CrossEntropyLossConfig::new().init(device);

    let mut monitor = CheckpointMonitor::new(CheckpointPolicy::CLASSIFICATION);
    let monitored_key = monitor.policy().monitor.key();
    let mut history = TrainingHistory::new();
    let mut logger = TrainingLogger::new("classification", config.epoch_count);
    let mut rng = ChaCha8Rng::seed_from_u64(config.seed);
    let schedule = LrSchedule::constant(config.learning_rate);

    for epoch in 0..config.epoch_count {
        let lr = schedule.lr_at(epoch);
        logger.start_epoch(epoch);

        let mut indices: Vec<usize> = (0..train.len()).collect();
        indices.shuffle(&mut rng);

        let mut epoch_loss = RunningMean::default();
        let mut correct = 0usize;
        for step in 0..train_steps {
            let batch = load_batch::<B>(
                &train,
                &indices[step * batch_size..(step + 1) * batch_size],
                &batcher,
                device,
            )?;

            let logits = model.forward(batch.images);
            let loss = loss_fn.forward(logits.clone(), batch.targets.clone());

            epoch_loss.add(scalar(loss.clone()));
            correct += correct_predictions(logits.detach(), batch.targets);

            let grads = GradientsParams::from_grads(loss.backward(), &model);
            model = optimizer.step(lr, model, grads);
        }

        let val_indices = validation_indices(val.len(), val_steps, batch_size, &mut rng);
        let (val_loss, val_accuracy) =
            evaluate(&model.valid(), &val, &batcher, &val_indices, batch_size, device)?;

        let accuracy = correct as f64 / (train_steps * batch_size) as f64;
        let values = [
            (LOSS.to_string(), epoch_loss.mean()),
            (ACCURACY.to_string(), accuracy),
            (validation_key(LOSS), val_loss),
            (validation_key(ACCURACY), val_accuracy),
        ];
        for (key, value) in &values {
            history.push(key, *value);
        }
        let summary: Vec<(&str, f64)> = values.iter().map(|(k, v)| (k.as_str(), *v)).collect();
        logger.end_epoch(&summary);

        if monitor.observe(val_accuracy) {
            info!("{} improved to {:.4}", monitored_key, val_accuracy);
            save_checkpoint(&model, checkpoint_path)?;
        }
    }

    logger.log_complete();
    Ok((model, history))
}

/// Reshuffled validation order for one epoch, cut to `steps` full batches.
///
/// Samples are stored grouped by class, so a fixed order would always drop
/// the remainder from the last class.
fn validation_indices(
    len: usize,
    steps: usize,
    batch_size: usize,
    rng: &mut ChaCha8Rng,
) -> Vec<usize> {
    let mut indices: Vec<usize> = (0..len).collect();
    indices.shuffle(rng);
    indices.truncate(steps * batch_size);
    indices
}

/// Mean loss and accuracy over full validation batches of `indices`
fn evaluate<B: Backend>(
    model: &PanelClassifier<B>,
    dataset: &ClassDirectoryDataset,
    batcher: &ClassificationBatcher,
    indices: &[usize],
    batch_size: usize,
    device: &B::Device,
) -> Result<(f64, f64)> {
    let loss_fn = CrossEntropyLossConfig::new().init(device);

    let mut loss = RunningMean::default();
    let mut correct = 0usize;
    for chunk in indices.chunks(batch_size) {
        let batch = load_batch::<B>(dataset, chunk, batcher, device)?;
        let logits = model.forward(batch.images);

        loss.add(scalar(loss_fn.forward(logits.clone(), batch.targets.clone())));
        correct += correct_predictions(logits, batch.targets);
    }

    Ok((loss.mean(), correct as f64 / indices.len() as f64))
}
