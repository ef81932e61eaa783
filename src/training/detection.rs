//! Mounting-configuration detector training.
//!
//! Data preparation converts the XML annotations of both splits, validates
//! their labels and oversamples the training split before any weights are
//! touched. The fit loop then runs SGD with a step-decayed learning rate and
//! reports one validation loss per epoch.

use std::path::{Path, PathBuf};

use burn::{
    data::dataloader::batcher::Batcher,
    module::AutodiffModule,
    optim::{
        decay::WeightDecayConfig, momentum::MomentumConfig, GradientsParams, Optimizer, SgdConfig,
    },
    tensor::{
        activation::log_softmax,
        backend::{AutodiffBackend, Backend},
        Int, Tensor, TensorData,
    },
};
use rand::seq::SliceRandom;
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;
use tracing::{debug, info};

use crate::dataset::{
    balance_classes, xml_to_csv, AnnotationTable, ClassBalanceTable, DetectionBatch,
    DetectionBatcher, DetectionDataset, DetectionTransform, ANNOTATION_CSV, MOUNTING_CLASSES,
};
use crate::model::{ArchitectureConfig, Backbone, DetectorOutput, MountingDetector, TrainerConfig};
use crate::training::metrics::{binary_cross_entropy, scalar, RunningMean};
use crate::training::scheduler::LrSchedule;
use crate::utils::error::{PanelTrainError, Result};
use crate::utils::logging::TrainingLogger;

pub const IMAGES_DIR: &str = "images";
pub const ANNOTATIONS_DIR: &str = "annotations";

const MOMENTUM: f64 = 0.9;
const WEIGHT_DECAY: f32 = 5e-4;
const LR_DECAY_FACTOR: f64 = 0.1;
const LR_STEP_EPOCHS: usize = 3;

/// Both splits, ready for training
#[derive(Debug, Clone)]
pub struct DetectionData {
    pub train: DetectionDataset,
    pub val: DetectionDataset,
    /// Per-class box counts of the training split after oversampling
    pub train_balance: ClassBalanceTable,
}

/// Convert, validate and balance `<dir>/annotations` for both splits.
///
/// The balanced training table replaces `<train_dir>/annotations.csv`. The
/// validation table is converted and checked but never resampled.
pub fn prepare_detection_data(
    train_dir: &Path,
    val_dir: &Path,
    long_edge: usize,
    seed: u64,
) -> Result<DetectionData> {
    let train_csv = train_dir.join(ANNOTATION_CSV);
    let train_table = xml_to_csv(&train_dir.join(ANNOTATIONS_DIR), &train_csv)?;
    let val_table = xml_to_csv(&val_dir.join(ANNOTATIONS_DIR), &val_dir.join(ANNOTATION_CSV))?;

    train_table.validate_labels()?;
    val_table.validate_labels()?;

    let mut rng = ChaCha8Rng::seed_from_u64(seed);
    let balanced = balance_classes(&train_table, &mut rng);
    balanced.write_csv(&train_csv)?;

    let train_balance = ClassBalanceTable::from_table(&balanced);
    info!(
        "Training boxes per class after oversampling: {:?} ({} -> {} rows)",
        train_balance.counts,
        train_table.len(),
        balanced.len()
    );

    let train = DetectionDataset::from_table(
        &balanced,
        &train_dir.join(IMAGES_DIR),
        DetectionTransform::Train { long_edge },
    )?;
    let val = DetectionDataset::from_table(
        &val_table,
        &val_dir.join(IMAGES_DIR),
        DetectionTransform::Validation,
    )?;

    Ok(DetectionData {
        train,
        val,
        train_balance,
    })
}

/// Intersection over union of two xyxy boxes
pub fn iou_xyxy(a: [f32; 4], b: [f32; 4]) -> f32 {
    let inter_w = (a[2].min(b[2]) - a[0].max(b[0])).max(0.0);
    let inter_h = (a[3].min(b[3]) - a[1].max(b[1])).max(0.0);
    let inter_area = inter_w * inter_h;

    let area_a = (a[2] - a[0]).max(0.0) * (a[3] - a[1]).max(0.0);
    let area_b = (b[2] - b[0]).max(0.0) * (b[3] - b[1]).max(0.0);
    let denom = area_a + area_b - inter_area;
    if denom <= 0.0 {
        0.0
    } else {
        inter_area / denom
    }
}

/// Per-slot training targets
#[derive(Debug, Clone)]
pub struct DetectionTargets<B: Backend> {
    /// `[batch, slots]`, 1.0 for slots matched to a ground-truth box
    pub objectness: Tensor<B, 2>,
    /// `[batch, slots, 4]`
    pub boxes: Tensor<B, 3>,
    /// `[batch, slots, 4]`, 1.0 on matched slots
    pub box_weights: Tensor<B, 3>,
    /// `[batch, slots, classes]`, one-hot on matched slots
    pub classes: Tensor<B, 3>,
    /// Number of matched slots in the batch
    pub matched: usize,
}

/// Assign every ground-truth box to the predicted slot it overlaps most.
///
/// Boxes are visited in order; a later box matched to an already-taken slot
/// overwrites it.
pub fn build_greedy_targets<B: Backend>(
    pred_boxes: Tensor<B, 3>,
    gt_boxes: Tensor<B, 3>,
    gt_mask: Tensor<B, 2>,
    gt_labels: Tensor<B, 2, Int>,
    num_classes: usize,
) -> DetectionTargets<B> {
    let device = pred_boxes.device();
    let [batch, slots, _] = pred_boxes.dims();
    let max_gt = gt_boxes.dims()[1];

    let pred = pred_boxes.into_data().to_vec::<f32>().unwrap_or_default();
    let gt = gt_boxes.into_data().to_vec::<f32>().unwrap_or_default();
    let mask = gt_mask.into_data().to_vec::<f32>().unwrap_or_default();
    let labels = gt_labels
        .into_data()
        .convert::<i64>()
        .to_vec::<i64>()
        .unwrap_or_default();

    let mut objectness = vec![0.0f32; batch * slots];
    let mut boxes = vec![0.0f32; batch * slots * 4];
    let mut box_weights = vec![0.0f32; batch * slots * 4];
    let mut classes = vec![0.0f32; batch * slots * num_classes];

    let four = |v: &[f32], i: usize| [v[i * 4], v[i * 4 + 1], v[i * 4 + 2], v[i * 4 + 3]];

    for b in 0..batch {
        for g in 0..max_gt {
            let g_idx = b * max_gt + g;
            if mask.get(g_idx).copied().unwrap_or(0.0) < 0.5 {
                continue;
            }
            let gt_box = four(&gt, g_idx);

            let mut best_iou = -1.0f32;
            let mut best_slot = 0usize;
            for p in 0..slots {
                let iou = iou_xyxy(four(&pred, b * slots + p), gt_box);
                if iou > best_iou {
                    best_iou = iou;
                    best_slot = p;
                }
            }

            let slot = b * slots + best_slot;
            objectness[slot] = 1.0;
            boxes[slot * 4..slot * 4 + 4].copy_from_slice(&gt_box);
            box_weights[slot * 4..slot * 4 + 4].copy_from_slice(&[1.0; 4]);

            let row = &mut classes[slot * num_classes..(slot + 1) * num_classes];
            row.fill(0.0);
            let label = labels.get(g_idx).copied().unwrap_or(0).max(0) as usize;
            if label < num_classes {
                row[label] = 1.0;
            }
        }
    }

    let matched = objectness.iter().filter(|v| **v > 0.5).count();

    DetectionTargets {
        objectness: Tensor::from_data(TensorData::new(objectness, [batch, slots]), &device),
        boxes: Tensor::from_data(TensorData::new(boxes, [batch, slots, 4]), &device),
        box_weights: Tensor::from_data(TensorData::new(box_weights, [batch, slots, 4]), &device),
        classes: Tensor::from_data(
            TensorData::new(classes, [batch, slots, num_classes]),
            &device,
        ),
        matched,
    }
}

/// Objectness BCE over all slots plus L1 box and class cross-entropy terms
/// averaged over matched slots
pub fn detection_loss<B: Backend>(
    output: DetectorOutput<B>,
    batch: &DetectionBatch<B>,
    num_classes: usize,
) -> Tensor<B, 1> {
    let targets = build_greedy_targets(
        output.boxes.clone(),
        batch.boxes.clone(),
        batch.box_mask.clone(),
        batch.labels.clone(),
        num_classes,
    );

    let objectness_loss = binary_cross_entropy(output.objectness, targets.objectness);
    if targets.matched == 0 {
        return objectness_loss;
    }

    let matched = targets.matched as f64;
    let box_loss = ((output.boxes - targets.boxes).abs() * targets.box_weights)
        .sum()
        .div_scalar(matched);
    let class_loss = (log_softmax(output.class_logits, 2) * targets.classes)
        .sum()
        .neg()
        .div_scalar(matched);

    objectness_loss + box_loss + class_loss
}

fn load_batch<B: Backend>(
    dataset: &DetectionDataset,
    indices: &[usize],
    batcher: &DetectionBatcher,
    device: &B::Device,
) -> Result<DetectionBatch<B>> {
    let items = indices
        .iter()
        .map(|&i| dataset.load(i))
        .collect::<Result<Vec<_>>>()?;
    Ok(batcher.batch(items, device))
}

/// Train `model` and return it with the per-epoch validation loss.
///
/// Every training image is used each epoch; the last batch may be short.
/// Validation images are evaluated one at a time at their native size. When
/// the validation split is empty the mean training loss is reported instead.
pub fn fit<B: AutodiffBackend>(
    mut model: MountingDetector<B>,
    train: &DetectionDataset,
    val: &DetectionDataset,
    config: &TrainerConfig,
    device: &B::Device,
) -> Result<(MountingDetector<B>, Vec<f64>)> {
    if train.is_empty() {
        return Err(PanelTrainError::Dataset(
            "detection training split has no annotated images".to_string(),
        ));
    }

    let num_classes = model.num_classes();
    let batcher = DetectionBatcher::new(model.max_boxes());
    let schedule = LrSchedule::step_decay(config.learning_rate, LR_DECAY_FACTOR, LR_STEP_EPOCHS);
    let mut optimizer = SgdConfig::new()
        .with_momentum(Some(
            MomentumConfig::new()
                .with_momentum(MOMENTUM)
                .with_dampening(0.0),
        ))
        .with_weight_decay(Some(WeightDecayConfig::new(WEIGHT_DECAY)))
        .init();

    let mut logger = TrainingLogger::new("detection", config.epoch_count);
    let mut rng = ChaCha8Rng::seed_from_u64(config.seed);
    let mut losses = Vec::with_capacity(config.epoch_count);

    for epoch in 0..config.epoch_count {
        logger.start_epoch(epoch);
        let lr = schedule.lr_at(epoch);
        debug!("Learning rate {:.2e}", lr);

        let mut indices: Vec<usize> = (0..train.len()).collect();
        indices.shuffle(&mut rng);

        let mut train_loss = RunningMean::default();
        for chunk in indices.chunks(config.batch_size) {
            let batch = load_batch::<B>(train, chunk, &batcher, device)?;
            let output = model.forward(batch.images.clone());
            let loss = detection_loss(output, &batch, num_classes);

            train_loss.add(scalar(loss.clone()));
            let grads = GradientsParams::from_grads(loss.backward(), &model);
            model = optimizer.step(lr, model, grads);
        }

        let epoch_loss = if val.is_empty() {
            train_loss.mean()
        } else {
            evaluate(&model.valid(), val, &batcher, device)?
        };
        losses.push(epoch_loss);

        logger.end_epoch(&[
            ("loss", train_loss.mean()),
            ("val_loss", epoch_loss),
            ("lr", lr),
        ]);
    }

    logger.log_complete();
    Ok((model, losses))
}

fn evaluate<B: Backend>(
    model: &MountingDetector<B>,
    dataset: &DetectionDataset,
    batcher: &DetectionBatcher,
    device: &B::Device,
) -> Result<f64> {
    let mut loss = RunningMean::default();
    for index in 0..dataset.len() {
        let batch = load_batch::<B>(dataset, &[index], batcher, device)?;
        let output = model.forward(batch.images.clone());
        loss.add(scalar(detection_loss(output, &batch, model.num_classes())));
    }
    Ok(loss.mean())
}

/// Full detection pipeline on `<dir>/images` + `<dir>/annotations` splits
pub fn train_mounting_detector<B: AutodiffBackend>(
    config: &TrainerConfig,
    architecture: &ArchitectureConfig,
    device: &B::Device,
    train_dir: &Path,
    val_dir: &Path,
) -> Result<(MountingDetector<B>, Vec<f64>)> {
    config.validate()?;
    architecture.validate()?;

    let data = prepare_detection_data(
        train_dir,
        val_dir,
        architecture.detector.long_edge,
        config.seed,
    )?;

    let backbone = Backbone::init(&architecture.backbone, device)?;
    let model = MountingDetector::<B>::new(backbone, architecture, MOUNTING_CLASSES.len(), device);

    fit(model, &data.train, &data.val, config, device)
}

/// Location of the converted table of a split
pub fn annotation_table_path(split_dir: &Path) -> PathBuf {
    split_dir.join(ANNOTATION_CSV)
}

/// Read back the table written by [`prepare_detection_data`]
pub fn load_annotation_table(split_dir: &Path) -> Result<AnnotationTable> {
    AnnotationTable::read_csv(&annotation_table_path(split_dir))
}
