//! VGG16-shaped feature extractor shared by the three pipelines.
//!
//! Intermediate activations are exposed through [`StageFeatures`], an explicit
//! stage-name mapping built on every forward pass. Downstream heads pick the
//! stages they need by field instead of by layer name.

use std::path::Path;

use burn::{
    module::Module,
    nn::{
        conv::{Conv2d, Conv2dConfig},
        pool::{MaxPool2d, MaxPool2dConfig},
        PaddingConfig2d,
    },
    record::CompactRecorder,
    tensor::{activation::relu, backend::Backend, Tensor},
};
use tracing::{info, warn};

use crate::model::config::BackboneConfig;
use crate::utils::error::{PanelTrainError, Result};

/// Convolutions per stage, as in VGG16
const STAGE_DEPTHS: [usize; 5] = [2, 2, 3, 3, 3];

/// Index of the convolution whose activation each stage exposes.
/// Stage 3 exposes its second convolution, every other stage its last.
const STAGE_TAPS: [usize; 5] = [1, 1, 1, 2, 2];

/// Feature maps of one forward pass, by stage
#[derive(Debug, Clone)]
pub struct StageFeatures<B: Backend> {
    /// Full resolution, `b` channels
    pub stage1_output: Tensor<B, 4>,
    /// 1/2 resolution, `2b` channels
    pub stage2_output: Tensor<B, 4>,
    /// 1/4 resolution, `4b` channels
    pub stage3_output: Tensor<B, 4>,
    /// 1/8 resolution, `8b` channels
    pub stage4_output: Tensor<B, 4>,
    /// 1/16 resolution, `8b` channels
    pub stage5_output: Tensor<B, 4>,
    /// Global max pool of the last pooled map, `[batch, 8b]`
    pub pooled: Tensor<B, 2>,
}

/// A run of 3x3 ReLU convolutions followed by a 2x2 max pool
#[derive(Module, Debug)]
pub struct VggStage<B: Backend> {
    convs: Vec<Conv2d<B>>,
    pool: MaxPool2d,
    tap: usize,
}

impl<B: Backend> VggStage<B> {
    pub fn new(
        in_channels: usize,
        out_channels: usize,
        depth: usize,
        tap: usize,
        device: &B::Device,
    ) -> Self {
        let convs = (0..depth)
            .map(|i| {
                let input = if i == 0 { in_channels } else { out_channels };
                Conv2dConfig::new([input, out_channels], [3, 3])
                    .with_padding(PaddingConfig2d::Same)
                    .init(device)
            })
            .collect();

        Self {
            convs,
            pool: MaxPool2dConfig::new([2, 2]).with_strides([2, 2]).init(),
            tap,
        }
    }

    /// Returns `(tapped activation, pooled output)`
    pub fn forward(&self, x: Tensor<B, 4>) -> (Tensor<B, 4>, Tensor<B, 4>) {
        let mut x = x;
        let mut tapped = None;

        for (i, conv) in self.convs.iter().enumerate() {
            x = relu(conv.forward(x));
            if i == self.tap {
                tapped = Some(x.clone());
            }
        }

        let pooled = self.pool.forward(x.clone());
        (tapped.unwrap_or(x), pooled)
    }
}

/// Five-stage VGG16 encoder with global max pooling
#[derive(Module, Debug)]
pub struct Backbone<B: Backend> {
    pub stage1: VggStage<B>,
    pub stage2: VggStage<B>,
    pub stage3: VggStage<B>,
    pub stage4: VggStage<B>,
    pub stage5: VggStage<B>,
}

impl<B: Backend> Backbone<B> {
    /// Create a randomly initialised backbone
    pub fn new(config: &BackboneConfig, device: &B::Device) -> Self {
        let widths = config.stage_widths();
        let stage = |i: usize, input: usize| {
            VggStage::new(input, widths[i], STAGE_DEPTHS[i], STAGE_TAPS[i], device)
        };

        Self {
            stage1: stage(0, 3),
            stage2: stage(1, widths[0]),
            stage3: stage(2, widths[1]),
            stage4: stage(3, widths[2]),
            stage5: stage(4, widths[3]),
        }
    }

    /// Create a backbone, loading pretrained weights when the config names a file
    pub fn init(config: &BackboneConfig, device: &B::Device) -> Result<Self> {
        let backbone = Self::new(config, device);

        match &config.pretrained_weights {
            Some(path) => backbone.load_pretrained(path, device),
            None => {
                warn!("No pretrained backbone weights configured; starting from random initialisation");
                Ok(backbone)
            }
        }
    }

    /// Load weights saved with `CompactRecorder`
    pub fn load_pretrained(self, path: &Path, device: &B::Device) -> Result<Self> {
        let backbone = self
            .load_file(path, &CompactRecorder::new(), device)
            .map_err(|e| {
                PanelTrainError::Checkpoint(format!(
                    "Failed to load backbone weights from {:?}: {:?}",
                    path, e
                ))
            })?;
        info!("Loaded pretrained backbone weights from {:?}", path);
        Ok(backbone)
    }

    /// Exclude every backbone parameter from gradient updates
    pub fn freeze(self) -> Self {
        self.no_grad()
    }

    /// Forward pass
    ///
    /// # Arguments
    /// * `x` - Input tensor of shape [batch_size, 3, height, width]
    pub fn forward(&self, x: Tensor<B, 4>) -> StageFeatures<B> {
        let (stage1_output, x) = self.stage1.forward(x);
        let (stage2_output, x) = self.stage2.forward(x);
        let (stage3_output, x) = self.stage3.forward(x);
        let (stage4_output, x) = self.stage4.forward(x);
        let (stage5_output, x) = self.stage5.forward(x);

        StageFeatures {
            stage1_output,
            stage2_output,
            stage3_output,
            stage4_output,
            stage5_output,
            pooled: global_max_pool(x),
        }
    }
}

/// `[B, C, H, W] -> [B, C]`
pub fn global_max_pool<B: Backend>(x: Tensor<B, 4>) -> Tensor<B, 2> {
    let [batch_size, channels, height, width] = x.dims();
    x.reshape([batch_size, channels, height * width])
        .max_dim(2)
        .reshape([batch_size, channels])
}

#[cfg(test)]
mod tests {
    use super::*;
    use burn_ndarray::NdArray;

    type TestBackend = NdArray;

    #[test]
    fn test_stage_feature_shapes() {
        let device = Default::default();
        let config = BackboneConfig {
            base_filters: 2,
            pretrained_weights: None,
        };
        let backbone = Backbone::<TestBackend>::new(&config, &device);

        let input = Tensor::<TestBackend, 4>::zeros([1, 3, 64, 64], &device);
        let features = backbone.forward(input);

        assert_eq!(features.stage1_output.dims(), [1, 2, 64, 64]);
        assert_eq!(features.stage2_output.dims(), [1, 4, 32, 32]);
        assert_eq!(features.stage3_output.dims(), [1, 8, 16, 16]);
        assert_eq!(features.stage4_output.dims(), [1, 16, 8, 8]);
        assert_eq!(features.stage5_output.dims(), [1, 16, 4, 4]);
        assert_eq!(features.pooled.dims(), [1, 16]);
    }

    #[test]
    fn test_global_max_pool_picks_maximum() {
        let device = Default::default();
        let x = Tensor::<TestBackend, 4>::from_floats(
            [[[[1.0, 5.0], [2.0, 3.0]], [[-1.0, -2.0], [-3.0, -4.0]]]],
            &device,
        );
        let pooled: Vec<f32> = global_max_pool(x).into_data().to_vec().unwrap();
        assert_eq!(pooled, vec![5.0, -1.0]);
    }

    #[test]
    fn test_missing_pretrained_file_is_checkpoint_error() {
        let device = Default::default();
        let config = BackboneConfig {
            base_filters: 2,
            pretrained_weights: Some("/nonexistent/vgg16".into()),
        };
        let result = Backbone::<TestBackend>::init(&config, &device);
        assert!(matches!(result, Err(PanelTrainError::Checkpoint(_))));
    }
}
