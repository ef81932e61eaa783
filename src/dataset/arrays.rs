//! In-memory image and mask arrays for the segmentation pipeline.
//!
//! Both arrays are NHWC with raw pixel values as loaded from disk; scaling to
//! [0, 1] happens inside the pipeline.

use std::path::Path;

use crate::dataset::loader::{decode_image, list_images};
use crate::utils::error::{PanelTrainError, Result};
use crate::utils::logging::ProgressLogger;

/// Spatial dimensions must survive the five backbone poolings
pub const SPATIAL_MULTIPLE: usize = 32;

/// `(count, height, width, 3)` image tensor
#[derive(Debug, Clone, PartialEq)]
pub struct ImageArray {
    data: Vec<f32>,
    count: usize,
    height: usize,
    width: usize,
}

impl ImageArray {
    pub const CHANNELS: usize = 3;

    /// Wrap NHWC data of shape `[count, height, width, 3]`
    pub fn new(data: Vec<f32>, count: usize, height: usize, width: usize) -> Result<Self> {
        let expected = count * height * width * Self::CHANNELS;
        if data.len() != expected {
            return Err(PanelTrainError::ShapeMismatch(format!(
                "image data has {} values, expected {} for [{}, {}, {}, {}]",
                data.len(),
                expected,
                count,
                height,
                width,
                Self::CHANNELS
            )));
        }

        Ok(Self {
            data,
            count,
            height,
            width,
        })
    }

    /// Load every image of a flat directory in sorted order.
    /// All images must share one size.
    pub fn load_dir<P: AsRef<Path>>(dir: P) -> Result<Self> {
        let files = list_images(dir.as_ref())?;
        if files.is_empty() {
            return Err(PanelTrainError::Dataset(format!(
                "No images found in {:?}",
                dir.as_ref()
            )));
        }

        let mut progress = ProgressLogger::new("Loading images", files.len());
        let mut data = Vec::new();
        let mut size = None;

        for path in &files {
            let rgb = decode_image(path)?.to_rgb8();
            check_size(&mut size, rgb.dimensions(), path)?;
            data.extend(rgb.as_raw().iter().map(|v| *v as f32));
            progress.increment();
        }
        progress.finish();

        let (width, height) = size.unwrap_or((0, 0));
        Self::new(data, files.len(), height as usize, width as usize)
    }

    pub fn len(&self) -> usize {
        self.count
    }

    pub fn is_empty(&self) -> bool {
        self.count == 0
    }

    /// `[count, height, width, channels]`
    pub fn dims(&self) -> [usize; 4] {
        [self.count, self.height, self.width, Self::CHANNELS]
    }

    /// HWC pixels of image `index`
    pub fn sample(&self, index: usize) -> &[f32] {
        let stride = self.height * self.width * Self::CHANNELS;
        &self.data[index * stride..(index + 1) * stride]
    }

    /// CHW pixels of image `index`, divided by `scale`
    pub fn sample_chw(&self, index: usize, scale: f32) -> Vec<f32> {
        let plane = self.height * self.width;
        let mut chw = vec![0.0f32; Self::CHANNELS * plane];

        for (i, pixel) in self.sample(index).chunks_exact(Self::CHANNELS).enumerate() {
            for (c, value) in pixel.iter().enumerate() {
                chw[c * plane + i] = value / scale;
            }
        }

        chw
    }
}

/// `(count, height, width, 1)` mask tensor
#[derive(Debug, Clone, PartialEq)]
pub struct MaskArray {
    data: Vec<f32>,
    count: usize,
    height: usize,
    width: usize,
}

impl MaskArray {
    /// Wrap single channel data of shape `[count, height, width, 1]`
    pub fn new(data: Vec<f32>, count: usize, height: usize, width: usize) -> Result<Self> {
        let expected = count * height * width;
        if data.len() != expected {
            return Err(PanelTrainError::ShapeMismatch(format!(
                "mask data has {} values, expected {} for [{}, {}, {}, 1]",
                data.len(),
                expected,
                count,
                height,
                width
            )));
        }

        Ok(Self {
            data,
            count,
            height,
            width,
        })
    }

    /// Load every mask of a flat directory in sorted order as luma
    pub fn load_dir<P: AsRef<Path>>(dir: P) -> Result<Self> {
        let files = list_images(dir.as_ref())?;
        if files.is_empty() {
            return Err(PanelTrainError::Dataset(format!(
                "No masks found in {:?}",
                dir.as_ref()
            )));
        }

        let mut progress = ProgressLogger::new("Loading masks", files.len());
        let mut data = Vec::new();
        let mut size = None;

        for path in &files {
            let luma = decode_image(path)?.to_luma8();
            check_size(&mut size, luma.dimensions(), path)?;
            data.extend(luma.as_raw().iter().map(|v| *v as f32));
            progress.increment();
        }
        progress.finish();

        let (width, height) = size.unwrap_or((0, 0));
        Self::new(data, files.len(), height as usize, width as usize)
    }

    pub fn len(&self) -> usize {
        self.count
    }

    pub fn is_empty(&self) -> bool {
        self.count == 0
    }

    /// `[count, height, width, 1]`
    pub fn dims(&self) -> [usize; 4] {
        [self.count, self.height, self.width, 1]
    }

    /// Pixels of mask `index`
    pub fn sample(&self, index: usize) -> &[f32] {
        let stride = self.height * self.width;
        &self.data[index * stride..(index + 1) * stride]
    }

    /// Largest value across the whole array
    pub fn max_value(&self) -> f32 {
        self.data.iter().copied().fold(f32::NEG_INFINITY, f32::max)
    }

    /// Divide every value by the array-wide maximum.
    ///
    /// An array without any positive value cannot be normalized and is
    /// rejected instead of producing NaN.
    pub fn normalized(&self) -> Result<Self> {
        let max = self.max_value();
        if !max.is_finite() || max <= 0.0 {
            return Err(PanelTrainError::DegenerateMask(format!(
                "maximum value is {} across {} masks; at least one positive pixel is required",
                max, self.count
            )));
        }

        Ok(Self {
            data: self.data.iter().map(|v| v / max).collect(),
            count: self.count,
            height: self.height,
            width: self.width,
        })
    }
}

/// Check that images and masks describe the same samples
pub fn validate_pair(images: &ImageArray, masks: &MaskArray) -> Result<()> {
    let [n_images, h, w, _] = images.dims();
    let [n_masks, mh, mw, _] = masks.dims();

    if n_images != n_masks {
        return Err(PanelTrainError::ShapeMismatch(format!(
            "{} images but {} masks",
            n_images, n_masks
        )));
    }

    if (h, w) != (mh, mw) {
        return Err(PanelTrainError::ShapeMismatch(format!(
            "images are {}x{} but masks are {}x{}",
            h, w, mh, mw
        )));
    }

    if h % SPATIAL_MULTIPLE != 0 || w % SPATIAL_MULTIPLE != 0 || h == 0 || w == 0 {
        return Err(PanelTrainError::ShapeMismatch(format!(
            "image size {}x{} is not a positive multiple of {}",
            h, w, SPATIAL_MULTIPLE
        )));
    }

    Ok(())
}

fn check_size(expected: &mut Option<(u32, u32)>, actual: (u32, u32), path: &Path) -> Result<()> {
    match expected {
        None => {
            *expected = Some(actual);
            Ok(())
        }
        Some(size) if *size == actual => Ok(()),
        Some(size) => Err(PanelTrainError::ShapeMismatch(format!(
            "{:?} is {}x{}, expected {}x{}",
            path, actual.0, actual.1, size.0, size.1
        ))),
    }
}
