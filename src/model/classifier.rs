//! Binary panel / no-panel classifier on top of the pooled backbone features.

use burn::{
    module::Module,
    nn::{Dropout, DropoutConfig, Linear, LinearConfig},
    tensor::{
        activation::{relu, softmax},
        backend::Backend,
        Tensor,
    },
};

use crate::model::backbone::Backbone;
use crate::model::config::ArchitectureConfig;

/// Number of output classes ("has panel", "no panel")
pub const PANEL_CLASSES: usize = 2;

/// Panel presence classifier
///
/// Architecture:
/// - VGG16 backbone, fully trainable
/// - Global max pooled features
/// - Two dense ReLU layers with dropout
/// - Two-way output
#[derive(Module, Debug)]
pub struct PanelClassifier<B: Backend> {
    pub backbone: Backbone<B>,
    fc1: Linear<B>,
    dropout1: Dropout,
    fc2: Linear<B>,
    dropout2: Dropout,
    output: Linear<B>,
}

impl<B: Backend> PanelClassifier<B> {
    pub fn new(backbone: Backbone<B>, config: &ArchitectureConfig, device: &B::Device) -> Self {
        let features = config.backbone.pooled_width();
        let hidden = config.classifier_hidden;

        Self {
            backbone,
            fc1: LinearConfig::new(features, hidden).init(device),
            dropout1: DropoutConfig::new(config.classifier_dropout).init(),
            fc2: LinearConfig::new(hidden, hidden).init(device),
            dropout2: DropoutConfig::new(config.classifier_dropout).init(),
            output: LinearConfig::new(hidden, PANEL_CLASSES).init(device),
        }
    }

    /// Forward pass returning logits of shape [batch_size, 2]
    pub fn forward(&self, x: Tensor<B, 4>) -> Tensor<B, 2> {
        let x = self.backbone.forward(x).pooled;

        let x = self.dropout1.forward(relu(self.fc1.forward(x)));
        let x = self.dropout2.forward(relu(self.fc2.forward(x)));
        self.output.forward(x)
    }

    /// Forward pass with softmax for inference
    pub fn forward_softmax(&self, x: Tensor<B, 4>) -> Tensor<B, 2> {
        softmax(self.forward(x), 1)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use burn_ndarray::NdArray;

    type TestBackend = NdArray;

    #[test]
    fn test_classifier_output_shape() {
        let device = Default::default();
        let config = ArchitectureConfig::compact(2);
        let backbone = Backbone::<TestBackend>::new(&config.backbone, &device);
        let model = PanelClassifier::new(backbone, &config, &device);

        let input = Tensor::<TestBackend, 4>::zeros([3, 3, 32, 32], &device);
        assert_eq!(model.forward(input).dims(), [3, PANEL_CLASSES]);
    }

    #[test]
    fn test_softmax_rows_sum_to_one() {
        let device = Default::default();
        let config = ArchitectureConfig::compact(2);
        let backbone = Backbone::<TestBackend>::new(&config.backbone, &device);
        let model = PanelClassifier::new(backbone, &config, &device);

        let input = Tensor::<TestBackend, 4>::ones([2, 3, 32, 32], &device);
        let probs: Vec<f32> = model.forward_softmax(input).into_data().to_vec().unwrap();
        for row in probs.chunks(PANEL_CLASSES) {
            assert!((row.iter().sum::<f32>() - 1.0).abs() < 1e-5);
        }
    }
}
