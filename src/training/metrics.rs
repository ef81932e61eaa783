//! Loss functions and per-batch metrics.
//!
//! Everything here works on engine tensors so the same code runs on the
//! autodiff backend during training and on the inner backend during
//! validation.

use burn::tensor::{backend::Backend, ElementConversion, Int, Tensor};

/// Smoothing constant of the overlap coefficient
pub const OVERLAP_SMOOTHING: f64 = 1.0;

/// Probability clamp used by the cross-entropy losses
const PROBABILITY_EPSILON: f64 = 1e-7;

/// Dice-style overlap between two `[B, C, H, W]` masks.
///
/// Per sample `(2 * sum(t * p) + smooth) / (sum(t) + sum(p) + smooth)`,
/// averaged over the batch. The smoothing keeps the denominator nonzero for
/// empty masks, where the coefficient is exactly 1.
pub fn overlap_coefficient<B: Backend>(
    truth: Tensor<B, 4>,
    prediction: Tensor<B, 4>,
    smooth: f64,
) -> Tensor<B, 1> {
    let [batch_size, channels, height, width] = truth.dims();
    let truth = truth.reshape([batch_size, channels * height * width]);
    let prediction = prediction.reshape([batch_size, channels * height * width]);

    let intersection = (truth.clone() * prediction.clone()).sum_dim(1);
    let totals = truth.sum_dim(1) + prediction.sum_dim(1);

    ((intersection * 2.0 + smooth) / (totals + smooth)).mean()
}

/// `1 - overlap_coefficient`, with the default smoothing
pub fn overlap_loss<B: Backend>(truth: Tensor<B, 4>, prediction: Tensor<B, 4>) -> Tensor<B, 1> {
    overlap_coefficient(truth, prediction, OVERLAP_SMOOTHING)
        .neg()
        .add_scalar(1.0)
}

/// Mean binary cross-entropy between probabilities and float targets
pub fn binary_cross_entropy<B: Backend, const D: usize>(
    prediction: Tensor<B, D>,
    truth: Tensor<B, D>,
) -> Tensor<B, 1> {
    let p = prediction.clamp(PROBABILITY_EPSILON, 1.0 - PROBABILITY_EPSILON);
    let positive = truth.clone() * p.clone().log();
    let negative = truth.neg().add_scalar(1.0) * p.neg().add_scalar(1.0).log();

    (positive + negative).neg().mean()
}

/// Fraction of elements where `prediction > 0.5` matches `truth`
pub fn binary_accuracy<B: Backend, const D: usize>(
    prediction: Tensor<B, D>,
    truth: Tensor<B, D>,
) -> Tensor<B, 1> {
    prediction
        .greater_elem(0.5)
        .float()
        .equal(truth)
        .float()
        .mean()
}

/// Number of rows whose arg-max matches the target class
pub fn correct_predictions<B: Backend>(logits: Tensor<B, 2>, targets: Tensor<B, 1, Int>) -> usize {
    let [batch_size, _] = logits.dims();
    let correct: i64 = logits
        .argmax(1)
        .reshape([batch_size])
        .equal(targets)
        .int()
        .sum()
        .into_scalar()
        .elem();
    correct.max(0) as usize
}

/// Fraction of rows whose arg-max matches the target class
pub fn categorical_accuracy<B: Backend>(logits: Tensor<B, 2>, targets: Tensor<B, 1, Int>) -> f64 {
    let [batch_size, _] = logits.dims();
    if batch_size == 0 {
        return 0.0;
    }
    correct_predictions(logits, targets) as f64 / batch_size as f64
}

/// Read a single-element tensor
pub fn scalar<B: Backend>(tensor: Tensor<B, 1>) -> f64 {
    tensor.into_scalar().elem::<f64>()
}

/// Full batches per epoch; the remainder is dropped
pub fn steps_per_epoch(samples: usize, batch_size: usize) -> usize {
    if batch_size == 0 {
        0
    } else {
        samples / batch_size
    }
}

/// Average of the values recorded during one epoch
#[derive(Debug, Clone, Copy, Default)]
pub struct RunningMean {
    sum: f64,
    count: usize,
}

impl RunningMean {
    pub fn add(&mut self, value: f64) {
        self.sum += value;
        self.count += 1;
    }

    pub fn mean(&self) -> f64 {
        if self.count == 0 {
            0.0
        } else {
            self.sum / self.count as f64
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use burn_ndarray::NdArray;

    type TestBackend = NdArray;

    fn masks(values: Vec<f32>, shape: [usize; 4]) -> Tensor<TestBackend, 4> {
        Tensor::from_floats(burn::tensor::TensorData::new(values, shape), &Default::default())
    }

    #[test]
    fn test_identical_masks_overlap_near_one() {
        let truth = masks(vec![1.0, 0.0, 1.0, 1.0, 0.0, 1.0, 0.0, 0.0], [2, 1, 2, 2]);
        let coef = scalar(overlap_coefficient(truth.clone(), truth, OVERLAP_SMOOTHING));
        assert!((coef - 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_empty_masks_overlap_is_one() {
        let zeros = masks(vec![0.0; 8], [2, 1, 2, 2]);
        let coef = scalar(overlap_coefficient(zeros.clone(), zeros, OVERLAP_SMOOTHING));
        assert!(coef.is_finite());
        assert!((coef - 1.0).abs() < 1e-9);
    }

    #[test]
    fn test_disjoint_masks_overlap_is_small() {
        let truth = masks(vec![1.0, 1.0, 0.0, 0.0], [1, 1, 2, 2]);
        let prediction = masks(vec![0.0, 0.0, 1.0, 1.0], [1, 1, 2, 2]);
        // (0 + 1) / (4 + 1)
        let coef = scalar(overlap_coefficient(truth, prediction, OVERLAP_SMOOTHING));
        assert!((coef - 0.2).abs() < 1e-6);
    }

    #[test]
    fn test_overlap_loss_complements_coefficient() {
        let truth = masks(vec![1.0, 0.0, 1.0, 0.0], [1, 1, 2, 2]);
        let prediction = masks(vec![0.9, 0.2, 0.4, 0.1], [1, 1, 2, 2]);

        let coef = scalar(overlap_coefficient(
            truth.clone(),
            prediction.clone(),
            OVERLAP_SMOOTHING,
        ));
        let loss = scalar(overlap_loss(truth, prediction));
        assert!((loss - (1.0 - coef)).abs() < 1e-6);
    }

    #[test]
    fn test_bce_small_for_confident_correct_predictions() {
        let truth = masks(vec![1.0, 0.0], [1, 1, 1, 2]);
        let good = masks(vec![0.999, 0.001], [1, 1, 1, 2]);
        let bad = masks(vec![0.001, 0.999], [1, 1, 1, 2]);

        let good_loss = scalar(binary_cross_entropy(good, truth.clone()));
        let bad_loss = scalar(binary_cross_entropy(bad, truth));
        assert!(good_loss < 0.01);
        assert!(bad_loss > 5.0);
    }

    #[test]
    fn test_bce_finite_at_saturation() {
        let truth = masks(vec![1.0, 0.0], [1, 1, 1, 2]);
        let saturated = masks(vec![0.0, 1.0], [1, 1, 1, 2]);
        assert!(scalar(binary_cross_entropy(saturated, truth)).is_finite());
    }

    #[test]
    fn test_binary_accuracy_thresholds_at_half() {
        let truth = masks(vec![1.0, 0.0, 1.0, 0.0], [1, 1, 2, 2]);
        let prediction = masks(vec![0.7, 0.2, 0.4, 0.6], [1, 1, 2, 2]);
        let acc = scalar(binary_accuracy(prediction, truth));
        assert!((acc - 0.5).abs() < 1e-6);
    }

    #[test]
    fn test_correct_predictions() {
        let device = Default::default();
        let logits = Tensor::<TestBackend, 2>::from_floats([[2.0, 1.0], [0.0, 3.0], [5.0, 1.0]], &device);
        let targets = Tensor::<TestBackend, 1, Int>::from_ints([0, 1, 1], &device);
        assert_eq!(correct_predictions(logits.clone(), targets.clone()), 2);
        assert!((categorical_accuracy(logits, targets) - 2.0 / 3.0).abs() < 1e-12);
    }

    #[test]
    fn test_steps_per_epoch_truncates() {
        assert_eq!(steps_per_epoch(105, 32), 3);
        assert_eq!(steps_per_epoch(2, 2), 1);
        assert_eq!(steps_per_epoch(1, 2), 0);
        assert_eq!(steps_per_epoch(10, 0), 0);
    }

    #[test]
    fn test_running_mean() {
        let mut mean = RunningMean::default();
        assert_eq!(mean.mean(), 0.0);
        mean.add(1.0);
        mean.add(2.0);
        assert!((mean.mean() - 1.5).abs() < 1e-12);
    }
}
