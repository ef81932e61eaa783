//! Burn Dataset Integration
//!
//! Items and batchers for the three pipelines. Segmentation and
//! classification batches are dense `[B, 3, H, W]` tensors; detection images
//! keep their own sizes and only the targets are stacked.

use burn::data::dataloader::batcher::Batcher;
use burn::data::dataset::Dataset;
use burn::prelude::*;
use tracing::debug;

use crate::dataset::arrays::{validate_pair, ImageArray, MaskArray};
use crate::utils::error::Result;

// --------------------------------------------------------------------------------
// Segmentation
// --------------------------------------------------------------------------------

/// A single image/mask pair
#[derive(Clone, Debug)]
pub struct SegmentationItem {
    /// CHW in [0, 1]
    pub image: Vec<f32>,
    /// HW in [0, 1]
    pub mask: Vec<f32>,
}

/// Paired image and mask arrays, masks already scaled by their maximum
#[derive(Debug, Clone)]
pub struct SegmentationDataset {
    images: ImageArray,
    masks: MaskArray,
}

impl SegmentationDataset {
    /// Validate the pair and normalize the masks
    pub fn new(images: ImageArray, masks: &MaskArray) -> Result<Self> {
        validate_pair(&images, masks)?;
        let masks = masks.normalized()?;
        Ok(Self { images, masks })
    }

    /// `(height, width)` shared by every sample
    pub fn spatial_size(&self) -> (usize, usize) {
        let [_, height, width, _] = self.images.dims();
        (height, width)
    }
}

impl Dataset<SegmentationItem> for SegmentationDataset {
    fn get(&self, index: usize) -> Option<SegmentationItem> {
        if index >= self.images.len() {
            return None;
        }

        Some(SegmentationItem {
            image: self.images.sample_chw(index, 255.0),
            mask: self.masks.sample(index).to_vec(),
        })
    }

    fn len(&self) -> usize {
        self.images.len()
    }
}

#[derive(Clone, Debug)]
pub struct SegmentationBatch<B: Backend> {
    /// [batch_size, 3, height, width]
    pub images: Tensor<B, 4>,
    /// [batch_size, 1, height, width]
    pub masks: Tensor<B, 4>,
}

#[derive(Clone, Debug)]
pub struct SegmentationBatcher {
    height: usize,
    width: usize,
}

impl SegmentationBatcher {
    pub fn new(height: usize, width: usize) -> Self {
        Self { height, width }
    }
}

impl<B: Backend> Batcher<B, SegmentationItem, SegmentationBatch<B>> for SegmentationBatcher {
    fn batch(&self, items: Vec<SegmentationItem>, device: &B::Device) -> SegmentationBatch<B> {
        let batch_size = items.len();
        let (height, width) = (self.height, self.width);

        let images_data: Vec<f32> = items.iter().flat_map(|item| item.image.clone()).collect();
        let masks_data: Vec<f32> = items.into_iter().flat_map(|item| item.mask).collect();

        let images = Tensor::<B, 4>::from_floats(
            TensorData::new(images_data, [batch_size, 3, height, width]),
            device,
        );
        let masks = Tensor::<B, 4>::from_floats(
            TensorData::new(masks_data, [batch_size, 1, height, width]),
            device,
        );

        SegmentationBatch { images, masks }
    }
}

// --------------------------------------------------------------------------------
// Classification
// --------------------------------------------------------------------------------

/// A single labeled image
#[derive(Clone, Debug)]
pub struct ClassificationItem {
    /// CHW in [0, 1]
    pub image: Vec<f32>,
    pub label: usize,
}

#[derive(Clone, Debug)]
pub struct ClassificationBatch<B: Backend> {
    /// [batch_size, 3, image_size, image_size]
    pub images: Tensor<B, 4>,
    /// [batch_size]
    pub targets: Tensor<B, 1, Int>,
}

#[derive(Clone, Debug)]
pub struct ClassificationBatcher {
    image_size: usize,
}

impl ClassificationBatcher {
    pub fn new(image_size: usize) -> Self {
        Self { image_size }
    }
}

impl<B: Backend> Batcher<B, ClassificationItem, ClassificationBatch<B>> for ClassificationBatcher {
    fn batch(&self, items: Vec<ClassificationItem>, device: &B::Device) -> ClassificationBatch<B> {
        let batch_size = items.len();
        let size = self.image_size;

        let targets_data: Vec<i64> = items.iter().map(|item| item.label as i64).collect();
        let images_data: Vec<f32> = items.into_iter().flat_map(|item| item.image).collect();

        let images = Tensor::<B, 4>::from_floats(
            TensorData::new(images_data, [batch_size, 3, size, size]),
            device,
        );
        let targets =
            Tensor::<B, 1, Int>::from_data(TensorData::new(targets_data, [batch_size]), device);

        ClassificationBatch { images, targets }
    }
}

// --------------------------------------------------------------------------------
// Detection
// --------------------------------------------------------------------------------

/// One image with its ground-truth boxes
#[derive(Clone, Debug)]
pub struct DetectionItem {
    /// CHW, ImageNet-normalized
    pub image: Vec<f32>,
    pub height: usize,
    pub width: usize,
    /// xyxy normalized to [0, 1] by the image size
    pub boxes: Vec<[f32; 4]>,
    /// Index into the mounting class list, one per box
    pub labels: Vec<usize>,
}

#[derive(Clone, Debug)]
pub struct DetectionBatch<B: Backend> {
    /// One `[1, 3, H, W]` tensor per image
    pub images: Vec<Tensor<B, 4>>,
    /// [batch_size, max_boxes, 4], zero padded
    pub boxes: Tensor<B, 3>,
    /// [batch_size, max_boxes], 1.0 where a ground-truth box is present
    pub box_mask: Tensor<B, 2>,
    /// [batch_size, max_boxes]
    pub labels: Tensor<B, 2, Int>,
}

/// Pads or truncates the ground truth of each image to `max_boxes`
#[derive(Clone, Debug)]
pub struct DetectionBatcher {
    max_boxes: usize,
}

impl DetectionBatcher {
    pub fn new(max_boxes: usize) -> Self {
        Self { max_boxes }
    }
}

impl<B: Backend> Batcher<B, DetectionItem, DetectionBatch<B>> for DetectionBatcher {
    fn batch(&self, items: Vec<DetectionItem>, device: &B::Device) -> DetectionBatch<B> {
        let batch_size = items.len();
        let max_boxes = self.max_boxes;

        let mut boxes = vec![0.0f32; batch_size * max_boxes * 4];
        let mut box_mask = vec![0.0f32; batch_size * max_boxes];
        let mut labels = vec![0i64; batch_size * max_boxes];
        let mut images = Vec::with_capacity(batch_size);

        for (b, item) in items.into_iter().enumerate() {
            if item.boxes.len() > max_boxes {
                debug!(
                    "Truncating {} ground-truth boxes to {}",
                    item.boxes.len(),
                    max_boxes
                );
            }

            for (slot, (bbox, label)) in item
                .boxes
                .iter()
                .zip(item.labels.iter())
                .take(max_boxes)
                .enumerate()
            {
                let idx = b * max_boxes + slot;
                boxes[idx * 4..idx * 4 + 4].copy_from_slice(bbox);
                box_mask[idx] = 1.0;
                labels[idx] = *label as i64;
            }

            images.push(Tensor::<B, 4>::from_floats(
                TensorData::new(item.image, [1, 3, item.height, item.width]),
                device,
            ));
        }

        DetectionBatch {
            images,
            boxes: Tensor::<B, 3>::from_floats(
                TensorData::new(boxes, [batch_size, max_boxes, 4]),
                device,
            ),
            box_mask: Tensor::<B, 2>::from_floats(
                TensorData::new(box_mask, [batch_size, max_boxes]),
                device,
            ),
            labels: Tensor::<B, 2, Int>::from_data(
                TensorData::new(labels, [batch_size, max_boxes]),
                device,
            ),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use burn_ndarray::NdArray;

    type TestBackend = NdArray;

    #[test]
    fn test_segmentation_dataset_scales_inputs() {
        let images = ImageArray::new(vec![255.0; 2 * 32 * 32 * 3], 2, 32, 32).unwrap();
        let mut mask_data = vec![0.0; 2 * 32 * 32];
        mask_data[5] = 2.0;
        mask_data[1024 + 44] = 1.0;
        let masks = MaskArray::new(mask_data, 2, 32, 32).unwrap();

        let dataset = SegmentationDataset::new(images, &masks).unwrap();
        assert_eq!(dataset.len(), 2);
        assert!(dataset.get(2).is_none());

        let item = dataset.get(0).unwrap();
        assert!(item.image.iter().all(|v| (*v - 1.0).abs() < 1e-6));
        assert_eq!(item.mask[5], 1.0);
        assert_eq!(dataset.get(1).unwrap().mask[44], 0.5);
    }

    #[test]
    fn test_segmentation_batch_shapes() {
        let device = Default::default();
        let items = vec![
            SegmentationItem {
                image: vec![0.0; 3 * 16 * 16],
                mask: vec![0.0; 16 * 16],
            };
            3
        ];
        let batch: SegmentationBatch<TestBackend> =
            SegmentationBatcher::new(16, 16).batch(items, &device);

        assert_eq!(batch.images.dims(), [3, 3, 16, 16]);
        assert_eq!(batch.masks.dims(), [3, 1, 16, 16]);
    }

    #[test]
    fn test_classification_batch_targets() {
        let device = Default::default();
        let items = vec![
            ClassificationItem {
                image: vec![0.0; 3 * 8 * 8],
                label: 1,
            },
            ClassificationItem {
                image: vec![0.0; 3 * 8 * 8],
                label: 0,
            },
        ];
        let batch: ClassificationBatch<TestBackend> =
            ClassificationBatcher::new(8).batch(items, &device);

        let targets: Vec<i64> = batch.targets.into_data().to_vec().unwrap();
        assert_eq!(targets, vec![1, 0]);
        assert_eq!(batch.images.dims(), [2, 3, 8, 8]);
    }

    #[test]
    fn test_detection_batch_pads_and_truncates() {
        let device = Default::default();
        let item = |n: usize| DetectionItem {
            image: vec![0.0; 3 * 4 * 6],
            height: 4,
            width: 6,
            boxes: vec![[0.1, 0.2, 0.3, 0.4]; n],
            labels: vec![2; n],
        };

        let batch: DetectionBatch<TestBackend> =
            DetectionBatcher::new(2).batch(vec![item(1), item(3)], &device);

        assert_eq!(batch.images.len(), 2);
        assert_eq!(batch.images[0].dims(), [1, 3, 4, 6]);
        assert_eq!(batch.boxes.dims(), [2, 2, 4]);

        let mask: Vec<f32> = batch.box_mask.into_data().to_vec().unwrap();
        assert_eq!(mask, vec![1.0, 0.0, 1.0, 1.0]);
        let labels: Vec<i64> = batch.labels.into_data().to_vec().unwrap();
        assert_eq!(labels, vec![2, 0, 2, 2]);
    }
}
