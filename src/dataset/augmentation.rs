//! Detection image transforms.
//!
//! Training images are resized to a fixed long edge before conversion; the
//! validation transform keeps the native size so evaluation is deterministic.
//! Both end in the same tensor conversion and ImageNet normalization.

use image::imageops::FilterType;
use image::DynamicImage;

use crate::dataset::loader::rgb_to_chw;

/// ImageNet channel means (RGB)
pub const IMAGENET_MEAN: [f32; 3] = [0.485, 0.456, 0.406];

/// ImageNet channel standard deviations (RGB)
pub const IMAGENET_STD: [f32; 3] = [0.229, 0.224, 0.225];

/// Preprocessed image ready for batching
#[derive(Debug, Clone)]
pub struct TransformedImage {
    /// CHW, normalized
    pub data: Vec<f32>,
    pub height: usize,
    pub width: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DetectionTransform {
    /// Resize so the longer edge equals `long_edge`, keeping the aspect ratio
    Train { long_edge: usize },
    /// Native size
    Validation,
}

impl DetectionTransform {
    /// Size of a `width` x `height` image after the transform
    pub fn output_size(&self, width: u32, height: u32) -> (u32, u32) {
        match *self {
            DetectionTransform::Train { long_edge } => {
                long_edge_size(width, height, long_edge as u32)
            }
            DetectionTransform::Validation => (width, height),
        }
    }

    pub fn apply(&self, image: DynamicImage) -> TransformedImage {
        let image = match *self {
            DetectionTransform::Train { long_edge } => resize_long_edge(image, long_edge as u32),
            DetectionTransform::Validation => image,
        };

        let rgb = image.to_rgb8();
        let (width, height) = (rgb.width() as usize, rgb.height() as usize);
        let mut data = rgb_to_chw(&rgb);
        normalize_imagenet(&mut data, height * width);

        TransformedImage {
            data,
            height,
            width,
        }
    }
}

/// Scale so that `max(width, height) == long_edge`
pub fn resize_long_edge(image: DynamicImage, long_edge: u32) -> DynamicImage {
    let (width, height) = (image.width(), image.height());
    let (new_width, new_height) = long_edge_size(width, height, long_edge);
    if (new_width, new_height) == (width, height) {
        return image;
    }
    image.resize_exact(new_width, new_height, FilterType::Triangle)
}

fn long_edge_size(width: u32, height: u32, long_edge: u32) -> (u32, u32) {
    let longest = width.max(height);
    if longest == long_edge || longest == 0 {
        return (width, height);
    }

    let scale = long_edge as f64 / longest as f64;
    (
        ((width as f64 * scale).round() as u32).max(1),
        ((height as f64 * scale).round() as u32).max(1),
    )
}

/// `(x - mean) / std` per channel of planar CHW data
pub fn normalize_imagenet(chw: &mut [f32], plane: usize) {
    for (c, channel) in chw.chunks_mut(plane).enumerate().take(3) {
        for value in channel.iter_mut() {
            *value = (*value - IMAGENET_MEAN[c]) / IMAGENET_STD[c];
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{Rgb, RgbImage};

    fn image(width: u32, height: u32) -> DynamicImage {
        DynamicImage::ImageRgb8(RgbImage::from_pixel(width, height, Rgb([124, 116, 104])))
    }

    #[test]
    fn test_train_transform_resizes_long_edge() {
        let out = DetectionTransform::Train { long_edge: 80 }.apply(image(40, 20));
        assert_eq!((out.width, out.height), (80, 40));
        assert_eq!(out.data.len(), 3 * 80 * 40);
    }

    #[test]
    fn test_validation_transform_keeps_size() {
        let out = DetectionTransform::Validation.apply(image(40, 20));
        assert_eq!((out.width, out.height), (40, 20));
    }

    #[test]
    fn test_output_size_matches_apply() {
        let transform = DetectionTransform::Train { long_edge: 64 };
        let out = transform.apply(image(200, 30));
        assert_eq!(transform.output_size(200, 30), (out.width as u32, out.height as u32));
        assert_eq!(DetectionTransform::Validation.output_size(24, 24), (24, 24));
    }

    #[test]
    fn test_normalization_centers_imagenet_mean() {
        // 124/255, 116/255, 104/255 are close to the ImageNet means
        let out = DetectionTransform::Validation.apply(image(2, 2));
        assert!(out.data.iter().all(|v| v.abs() < 0.02));
    }
}
