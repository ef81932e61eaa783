//! Encoder-decoder network for panel masks.
//!
//! The frozen backbone is extended by four upsampling stages. Each stage
//! doubles the spatial size with a transposed convolution, concatenates the
//! encoder features of matching resolution and refines them with two ELU
//! convolutions. A 1x1 sigmoid convolution produces the mask.

use burn::{
    module::Module,
    nn::{
        conv::{Conv2d, Conv2dConfig, ConvTranspose2d, ConvTranspose2dConfig},
        Dropout, DropoutConfig, Initializer, PaddingConfig2d,
    },
    tensor::{activation::sigmoid, backend::Backend, Tensor},
};

use crate::model::backbone::Backbone;
use crate::model::config::ArchitectureConfig;

/// Exponential linear unit: `x` for positive inputs, `exp(x) - 1` otherwise
pub fn elu<B: Backend, const D: usize>(x: Tensor<B, D>) -> Tensor<B, D> {
    x.clone().clamp_min(0.0) + x.clamp_max(0.0).exp().sub_scalar(1.0)
}

fn he_normal_conv<B: Backend>(
    in_channels: usize,
    out_channels: usize,
    device: &B::Device,
) -> Conv2d<B> {
    Conv2dConfig::new([in_channels, out_channels], [3, 3])
        .with_padding(PaddingConfig2d::Same)
        .with_initializer(Initializer::KaimingNormal {
            gain: 2f64.sqrt(),
            fan_out_only: false,
        })
        .init(device)
}

/// Upsample, concatenate the skip connection, refine
#[derive(Module, Debug)]
pub struct DecoderStage<B: Backend> {
    up: ConvTranspose2d<B>,
    conv1: Conv2d<B>,
    dropout: Dropout,
    conv2: Conv2d<B>,
}

impl<B: Backend> DecoderStage<B> {
    pub fn new(
        in_channels: usize,
        up_channels: usize,
        skip_channels: usize,
        out_channels: usize,
        dropout: f64,
        device: &B::Device,
    ) -> Self {
        Self {
            up: ConvTranspose2dConfig::new([in_channels, up_channels], [2, 2])
                .with_stride([2, 2])
                .init(device),
            conv1: he_normal_conv(up_channels + skip_channels, out_channels, device),
            dropout: DropoutConfig::new(dropout).init(),
            conv2: he_normal_conv(out_channels, out_channels, device),
        }
    }

    pub fn forward(&self, x: Tensor<B, 4>, skip: Tensor<B, 4>) -> Tensor<B, 4> {
        let x = self.up.forward(x);
        let x = Tensor::cat(vec![x, skip], 1);
        let x = elu(self.conv1.forward(x));
        let x = self.dropout.forward(x);
        elu(self.conv2.forward(x))
    }
}

/// Panel segmentation network
#[derive(Module, Debug)]
pub struct SegmentationModel<B: Backend> {
    pub backbone: Backbone<B>,
    decoder4: DecoderStage<B>,
    decoder3: DecoderStage<B>,
    decoder2: DecoderStage<B>,
    decoder1: DecoderStage<B>,
    output: Conv2d<B>,
}

impl<B: Backend> SegmentationModel<B> {
    /// Attach a decoder to `backbone`. The backbone is frozen.
    pub fn new(backbone: Backbone<B>, config: &ArchitectureConfig, device: &B::Device) -> Self {
        let [w1, w2, w3, w4, w5] = config.backbone.stage_widths();
        let drop = config.segmentation_dropout;
        let last = (w1 / 2).max(1);

        Self {
            backbone: backbone.freeze(),
            decoder4: DecoderStage::new(w5, w4, w4, w4, drop, device),
            decoder3: DecoderStage::new(w4, w3, w3, w3, drop, device),
            decoder2: DecoderStage::new(w3, w2, w2, w2, drop, device),
            decoder1: DecoderStage::new(
                w2,
                w1,
                w1,
                last,
                config.segmentation_final_dropout,
                device,
            ),
            output: Conv2dConfig::new([last, 1], [1, 1]).init(device),
        }
    }

    /// Forward pass
    ///
    /// # Arguments
    /// * `x` - Input tensor of shape [batch_size, 3, height, width], height and
    ///   width divisible by 16
    ///
    /// # Returns
    /// * Mask probabilities of shape [batch_size, 1, height, width]
    pub fn forward(&self, x: Tensor<B, 4>) -> Tensor<B, 4> {
        let features = self.backbone.forward(x);

        let x = self
            .decoder4
            .forward(features.stage5_output, features.stage4_output);
        let x = self.decoder3.forward(x, features.stage3_output);
        let x = self.decoder2.forward(x, features.stage2_output);
        let x = self.decoder1.forward(x, features.stage1_output);

        sigmoid(self.output.forward(x))
    }
}
