//! Multibox mounting-configuration detector.
//!
//! Pooled backbone features feed a dense trunk with three heads: a fixed
//! number of box slots, an objectness score per slot and class logits per
//! slot. Images may differ in size, so each one is encoded separately before
//! the pooled features are stacked.

use burn::{
    module::Module,
    nn::{Linear, LinearConfig},
    tensor::{
        activation::{relu, sigmoid},
        backend::Backend,
        Tensor,
    },
};

use crate::model::backbone::Backbone;
use crate::model::config::ArchitectureConfig;

/// Raw detector predictions for a batch
#[derive(Debug, Clone)]
pub struct DetectorOutput<B: Backend> {
    /// `[batch, max_boxes, 4]`, normalised xyxy with x0 <= x1 and y0 <= y1
    pub boxes: Tensor<B, 3>,
    /// `[batch, max_boxes]` in (0, 1)
    pub objectness: Tensor<B, 2>,
    /// `[batch, max_boxes, num_classes]`
    pub class_logits: Tensor<B, 3>,
}

#[derive(Module, Debug)]
pub struct MountingDetector<B: Backend> {
    pub backbone: Backbone<B>,
    stem: Linear<B>,
    block: Linear<B>,
    box_head: Linear<B>,
    objectness_head: Linear<B>,
    class_head: Linear<B>,
    max_boxes: usize,
    num_classes: usize,
}

impl<B: Backend> MountingDetector<B> {
    pub fn new(
        backbone: Backbone<B>,
        config: &ArchitectureConfig,
        num_classes: usize,
        device: &B::Device,
    ) -> Self {
        let features = config.backbone.pooled_width();
        let hidden = config.detector.hidden;
        let max_boxes = config.detector.max_boxes.max(1);

        Self {
            backbone,
            stem: LinearConfig::new(features, hidden).init(device),
            block: LinearConfig::new(hidden, hidden).init(device),
            box_head: LinearConfig::new(hidden, max_boxes * 4).init(device),
            objectness_head: LinearConfig::new(hidden, max_boxes).init(device),
            class_head: LinearConfig::new(hidden, max_boxes * num_classes).init(device),
            max_boxes,
            num_classes,
        }
    }

    pub fn max_boxes(&self) -> usize {
        self.max_boxes
    }

    pub fn num_classes(&self) -> usize {
        self.num_classes
    }

    /// Forward pass over individually sized `[1, 3, H, W]` images
    pub fn forward(&self, images: Vec<Tensor<B, 4>>) -> DetectorOutput<B> {
        let pooled = images
            .into_iter()
            .map(|image| self.backbone.forward(image).pooled)
            .collect::<Vec<_>>();
        let x = Tensor::cat(pooled, 0);
        let batch = x.dims()[0];

        let x = relu(self.stem.forward(x));
        let x = relu(self.block.forward(x));

        let boxes = sigmoid(self.box_head.forward(x.clone())).reshape([batch, self.max_boxes, 4]);
        let objectness = sigmoid(self.objectness_head.forward(x.clone()));
        let class_logits =
            self.class_head
                .forward(x)
                .reshape([batch, self.max_boxes, self.num_classes]);

        DetectorOutput {
            boxes: order_corners(boxes),
            objectness,
            class_logits,
        }
    }
}

/// Reorder each box so that x0 <= x1 and y0 <= y1, clamped to [0, 1]
fn order_corners<B: Backend>(boxes: Tensor<B, 3>) -> Tensor<B, 3> {
    let [batch, slots, _] = boxes.dims();
    let coord = |i: usize| boxes.clone().slice([0..batch, 0..slots, i..i + 1]);
    let (x0, y0, x1, y1) = (coord(0), coord(1), coord(2), coord(3));

    let dx = (x0.clone() - x1.clone()).abs();
    let dy = (y0.clone() - y1.clone()).abs();

    let x_min = (x0.clone() + x1.clone() - dx.clone()) * 0.5;
    let x_max = (x0 + x1 + dx) * 0.5;
    let y_min = (y0.clone() + y1.clone() - dy.clone()) * 0.5;
    let y_max = (y0 + y1 + dy) * 0.5;

    Tensor::cat(
        vec![
            x_min.clamp(0.0, 1.0),
            y_min.clamp(0.0, 1.0),
            x_max.clamp(0.0, 1.0),
            y_max.clamp(0.0, 1.0),
        ],
        2,
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use burn_ndarray::NdArray;

    type TestBackend = NdArray;

    #[test]
    fn test_detector_handles_mixed_image_sizes() {
        let device = Default::default();
        let config = ArchitectureConfig::compact(2);
        let backbone = Backbone::<TestBackend>::new(&config.backbone, &device);
        let model = MountingDetector::new(backbone, &config, 4, &device);

        let images = vec![
            Tensor::<TestBackend, 4>::zeros([1, 3, 32, 64], &device),
            Tensor::<TestBackend, 4>::zeros([1, 3, 48, 32], &device),
        ];
        let output = model.forward(images);

        assert_eq!(output.boxes.dims(), [2, 16, 4]);
        assert_eq!(output.objectness.dims(), [2, 16]);
        assert_eq!(output.class_logits.dims(), [2, 16, 4]);
    }

    #[test]
    fn test_order_corners() {
        let device = Default::default();
        let boxes = Tensor::<TestBackend, 3>::from_floats([[[0.8, 0.1, 0.2, 0.9]]], &device);
        let ordered: Vec<f32> = order_corners(boxes).into_data().to_vec().unwrap();
        let expected = [0.2, 0.1, 0.8, 0.9];
        for (got, want) in ordered.iter().zip(expected) {
            assert!((got - want).abs() < 1e-6);
        }
    }
}
